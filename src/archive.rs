//! JAR inspection: class and resource listing, raw entry reads.

use anyhow::{Context, Result};
use memmap2::Mmap;
use std::fs::File;
use std::io::{Cursor, Read};
use std::path::Path;
use zip::ZipArchive;

/// Entry listing of one archive, in archive order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ArchiveIndex {
    /// Binary class names (`a.b.Outer$Inner`), inner classes included.
    pub classes: Vec<String>,
    /// Every non-class, non-directory entry.
    pub resources: Vec<String>,
}

impl ArchiveIndex {
    pub fn top_level_classes(&self) -> impl Iterator<Item = &str> {
        self.classes
            .iter()
            .map(String::as_str)
            .filter(|c| !c.contains('$'))
    }
}

pub fn index_archive(jar_path: &Path) -> Result<ArchiveIndex> {
    let file =
        File::open(jar_path).with_context(|| format!("Failed to open jar: {}", jar_path.display()))?;
    // SAFETY: The file is opened read-only and outlives the mapping, which is
    // dropped at the end of this function.
    let mmap = unsafe { Mmap::map(&file) }
        .with_context(|| format!("Failed to mmap jar: {}", jar_path.display()))?;
    let mut archive = ZipArchive::new(Cursor::new(&mmap[..]))
        .with_context(|| format!("Failed to read zip structure: {}", jar_path.display()))?;

    let mut index = ArchiveIndex::default();
    for i in 0..archive.len() {
        let entry = archive.by_index(i)?;
        if entry.is_dir() {
            continue;
        }
        let name = entry.name();
        match class_name_from_entry(name) {
            Some(class_name) => index.classes.push(class_name),
            None if name.ends_with(".class") => {}
            None => index.resources.push(name.to_string()),
        }
    }
    Ok(index)
}

/// Reads one entry in full, `None` when the archive has no such entry.
pub fn read_entry(jar_path: &Path, entry_name: &str) -> Result<Option<Vec<u8>>> {
    let file =
        File::open(jar_path).with_context(|| format!("Failed to open jar: {}", jar_path.display()))?;
    // SAFETY: see `index_archive`.
    let mmap = unsafe { Mmap::map(&file) }
        .with_context(|| format!("Failed to mmap jar: {}", jar_path.display()))?;
    let mut archive = ZipArchive::new(Cursor::new(&mmap[..]))
        .with_context(|| format!("Failed to read zip structure: {}", jar_path.display()))?;

    let mut entry = match archive.by_name(entry_name) {
        Ok(entry) => entry,
        Err(zip::result::ZipError::FileNotFound) => return Ok(None),
        Err(e) => {
            return Err(e).with_context(|| format!("Failed to read entry: {entry_name}"));
        }
    };
    let mut buf = Vec::with_capacity(entry.size() as usize);
    entry
        .read_to_end(&mut buf)
        .with_context(|| format!("Failed to inflate entry: {entry_name}"))?;
    Ok(Some(buf))
}

/// `org/example/A$B.class` -> `org.example.A$B`. Module and package
/// descriptors are not classes.
pub fn class_name_from_entry(entry_name: &str) -> Option<String> {
    let stem = entry_name.strip_suffix(".class")?;
    if stem.ends_with("module-info") || stem.ends_with("package-info") {
        return None;
    }
    // Multi-release copies shadow the base entry.
    if stem.starts_with("META-INF/") {
        return None;
    }
    Some(stem.replace(['/', '\\'], "."))
}
