//! Splitting and identifying CFR output.

use anyhow::{Context, Result};
use sha2::{Digest, Sha256};
use std::fs::File;
use std::io::Read;
use std::path::Path;

const CFR_BANNER: &str = "/*\n * Decompiled with CFR";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecompiledUnit {
    pub class_name: String,
    pub content: String,
}

/// Splits CFR output on its per-class banner. Output without a banner is a
/// single unit when a class declaration can be found in it.
pub fn split_decompiled_output(content: &str) -> Vec<DecompiledUnit> {
    let normalized = content.replace("\r\n", "\n");

    let starts: Vec<usize> = normalized.match_indices(CFR_BANNER).map(|(i, _)| i).collect();
    if starts.is_empty() {
        return extract_class_name(&normalized)
            .map(|class_name| DecompiledUnit {
                class_name,
                content: normalized,
            })
            .into_iter()
            .collect();
    }

    let mut units = Vec::new();
    for (idx, start) in starts.iter().enumerate() {
        let end = starts.get(idx + 1).copied().unwrap_or(normalized.len());
        let unit = strip_banner(normalized[*start..end].trim());
        if unit.is_empty() {
            continue;
        }
        if let Some(class_name) = extract_class_name(unit) {
            units.push(DecompiledUnit {
                class_name,
                content: format!("{unit}\n"),
            });
        }
    }
    units
}

/// Source for `class_name` out of raw CFR output, falling back to the whole
/// (normalized) output when no unit declares it.
pub fn select_class_source(output: &str, class_name: &str) -> String {
    split_decompiled_output(output)
        .into_iter()
        .find(|u| u.class_name == class_name)
        .map(|u| u.content)
        .unwrap_or_else(|| strip_banner(&output.replace("\r\n", "\n")).to_string())
}

fn strip_banner(unit: &str) -> &str {
    if unit.starts_with(CFR_BANNER) {
        if let Some(end) = unit.find("*/") {
            return unit[end + 2..].trim_start();
        }
    }
    unit
}

pub fn extract_class_name(content: &str) -> Option<String> {
    let mut package: Option<String> = None;
    let mut type_name: Option<String> = None;

    for line in content.lines() {
        let line = line.trim();

        if package.is_none() && line.starts_with("package ") {
            let pkg = line
                .trim_start_matches("package ")
                .trim_end_matches(';')
                .trim()
                .to_string();
            if !pkg.is_empty() {
                package = Some(pkg);
            }
        }

        if type_name.is_none()
            && let Some(name) = extract_type_name_from_line(line)
        {
            type_name = Some(name);
        }

        if package.is_some() && type_name.is_some() {
            break;
        }
    }

    let type_name = type_name?;
    Some(match package {
        Some(pkg) => format!("{pkg}.{type_name}"),
        None => type_name,
    })
}

fn extract_type_name_from_line(line: &str) -> Option<String> {
    if line.starts_with("//") || line.starts_with('*') || line.starts_with("/*") {
        return None;
    }
    let keywords = ["class ", "interface ", "enum ", "record ", "@interface "];

    for kw in keywords {
        if let Some(pos) = line.find(kw) {
            let after = &line[pos + kw.len()..];
            let token = after.split_whitespace().next()?;
            let token = token.trim_end_matches('{').trim();
            let token = token.split('<').next().unwrap_or(token);
            if !token.is_empty() {
                return Some(token.to_string());
            }
        }
    }

    None
}

/// SHA-256 of a file, streamed.
pub fn hash_file(path: &Path) -> Result<String> {
    let mut file =
        File::open(path).with_context(|| format!("Failed to open for hashing: {}", path.display()))?;
    let mut hasher = Sha256::new();
    let mut buf = [0u8; 64 * 1024];
    loop {
        let n = file.read(&mut buf)?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }
    Ok(hex::encode(hasher.finalize()))
}
