//! A [`Decompiler`] backed by one JAR on disk and the CFR command line tool.
//!
//! Class text comes from CFR (memoized per top-level class and persisted in
//! the LMDB [`SourceCache`]); members and references come from the
//! tree-sitter outline of that text.

use anyhow::{Context, Result, bail};
use rayon::prelude::*;
use std::collections::{BTreeSet, HashMap};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::{Instant, SystemTime};
use tracing::{debug, info, warn};

use crate::archive::{self, ArchiveIndex};
use crate::cache::{SourceCache, source_key};
use crate::cfr::Cfr;
use crate::model::{
    ClassRef, Decompiler, FieldNode, MANIFEST_ENTRIES, MethodNode, ResourceContent,
    ResourceEntry, ResourceKind, UsageKind, UsageRef,
};
use crate::parse::{hash_file, select_class_source};
use crate::structure::{ClassOutline, MethodOutline, parse_class_outline};

const WORKSPACE_TARGET: &str = "class_inspector::workspace";

#[derive(Debug)]
struct DecompiledClass {
    source: String,
    outline: Option<ClassOutline>,
}

pub struct JarWorkspace {
    jar_path: PathBuf,
    loaded_mtime: Option<SystemTime>,
    archive_hash: String,
    index: ArchiveIndex,
    cfr: Cfr,
    cache: Option<SourceCache>,
    decompiled: Mutex<HashMap<String, Arc<DecompiledClass>>>,
}

#[derive(Debug, serde::Serialize)]
pub struct WarmupResult {
    pub jar: String,
    pub classes: usize,
    pub decompiled: usize,
    pub failed: usize,
    pub elapsed_ms: u128,
}

impl JarWorkspace {
    pub fn open(jar_path: &Path, cfr: Cfr, cache: Option<SourceCache>) -> Result<Self> {
        let jar_path = jar_path
            .canonicalize()
            .with_context(|| format!("JAR not found: {}", jar_path.display()))?;
        let loaded_mtime = modified_time(&jar_path);
        let archive_hash = hash_file(&jar_path)?;
        let index = archive::index_archive(&jar_path)?;

        info!(
            target: WORKSPACE_TARGET,
            jar = %jar_path.display(),
            classes = index.classes.len(),
            resources = index.resources.len(),
            "workspace loaded"
        );

        Ok(Self {
            jar_path,
            loaded_mtime,
            archive_hash,
            index,
            cfr,
            cache,
            decompiled: Mutex::new(HashMap::new()),
        })
    }

    pub fn jar_path(&self) -> &Path {
        &self.jar_path
    }

    /// Decompiles every top-level class in parallel.
    pub fn warm(&self) -> WarmupResult {
        let start = Instant::now();
        let classes: Vec<ClassRef> = self.index.top_level_classes().map(ClassRef::new).collect();

        let decompiled = classes
            .par_iter()
            .filter(|class| match self.unit(class) {
                Ok(_) => true,
                Err(e) => {
                    warn!(target: WORKSPACE_TARGET, class = %class.full_name, error = %format!("{e:#}"), "warm-up failed");
                    false
                }
            })
            .count();

        let result = WarmupResult {
            jar: self.jar_path.to_string_lossy().to_string(),
            classes: classes.len(),
            decompiled,
            failed: classes.len() - decompiled,
            elapsed_ms: start.elapsed().as_millis(),
        };
        info!(
            target: WORKSPACE_TARGET,
            decompiled = result.decompiled,
            failed = result.failed,
            elapsed_ms = result.elapsed_ms as u64,
            "warm-up finished"
        );
        result
    }

    fn unit(&self, class: &ClassRef) -> Result<Arc<DecompiledClass>> {
        let top_level = class.top_level_name();
        if let Some(hit) = self.lock().get(top_level) {
            return Ok(hit.clone());
        }

        let source = self.load_source(top_level)?;
        let simple = ClassRef::new(top_level).simple_name().to_string();
        let outline = parse_class_outline(&source, &simple);
        if outline.is_none() {
            debug!(target: WORKSPACE_TARGET, class = top_level, "no outline for decompiled text");
        }

        let unit = Arc::new(DecompiledClass { source, outline });
        self.lock().insert(top_level.to_string(), unit.clone());
        Ok(unit)
    }

    fn load_source(&self, top_level: &str) -> Result<String> {
        let key = source_key(&self.archive_hash, top_level);
        if let Some(cache) = &self.cache
            && let Some(hit) = cache.get_source(&key)?
        {
            debug!(target: WORKSPACE_TARGET, class = top_level, "cache hit");
            return Ok(hit);
        }

        let output = self.cfr.decompile_class(&self.jar_path, top_level)?;
        let source = select_class_source(&output, top_level);

        if let Some(cache) = &self.cache
            && let Err(e) = cache.put_source(&key, &source)
        {
            warn!(target: WORKSPACE_TARGET, class = top_level, error = %format!("{e:#}"), "cache write failed");
        }
        Ok(source)
    }

    fn outline(&self, class: &ClassRef) -> Result<Option<Arc<DecompiledClass>>> {
        // Only top-level declarations are outlined.
        if class.inner {
            return Ok(None);
        }
        let unit = self.unit(class)?;
        Ok(unit.outline.is_some().then_some(unit))
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<String, Arc<DecompiledClass>>> {
        self.decompiled
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Top-level classes, other than `class` itself, whose text refers to it.
    fn referencing_classes(&self, class: &ClassRef) -> Vec<(ClassRef, Arc<DecompiledClass>)> {
        let own = class.top_level_name();
        let candidates: Vec<ClassRef> = self
            .index
            .top_level_classes()
            .filter(|c| *c != own)
            .map(ClassRef::new)
            .collect();

        candidates
            .into_par_iter()
            .filter_map(|candidate| match self.unit(&candidate) {
                Ok(unit) => {
                    let refers = unit
                        .outline
                        .as_ref()
                        .is_some_and(|o| o.mentions_type(&class.full_name));
                    refers.then_some((candidate, unit))
                }
                Err(e) => {
                    warn!(
                        target: WORKSPACE_TARGET,
                        class = %candidate.full_name,
                        error = %format!("{e:#}"),
                        "skipping class in reference scan"
                    );
                    None
                }
            })
            .collect()
    }

    /// Methods of `class` and of every class referring to it whose bodies
    /// satisfy `uses`.
    fn member_usages(
        &self,
        class: &ClassRef,
        uses: impl Fn(&ClassRef, &MethodOutline) -> bool,
    ) -> Result<Vec<UsageRef>> {
        let mut scope = Vec::new();
        let own = ClassRef::new(class.top_level_name());
        if let Some(unit) = self.outline(&own)? {
            scope.push((own, unit));
        }
        scope.extend(self.referencing_classes(class));

        let mut usages = BTreeSet::new();
        for (owner, unit) in &scope {
            let Some(outline) = &unit.outline else {
                continue;
            };
            for method in outline.methods.iter().filter(|m| uses(owner, m)) {
                usages.insert((owner.full_name.clone(), method.name.clone()));
            }
        }

        Ok(usages
            .into_iter()
            .map(|(owner, name)| UsageRef {
                full_name: format!("{owner}.{name}"),
                name,
                kind: UsageKind::Method,
            })
            .collect())
    }
}

impl Decompiler for JarWorkspace {
    fn is_live(&self) -> bool {
        !self.index.classes.is_empty()
            && self.jar_path.is_file()
            && modified_time(&self.jar_path) == self.loaded_mtime
    }

    fn classes(&self) -> Result<Vec<ClassRef>> {
        Ok(self.index.top_level_classes().map(ClassRef::new).collect())
    }

    fn classes_with_inners(&self) -> Result<Vec<ClassRef>> {
        Ok(self.index.classes.iter().map(ClassRef::new).collect())
    }

    fn resources(&self) -> Result<Vec<ResourceEntry>> {
        Ok(self
            .index
            .resources
            .iter()
            .map(|name| ResourceEntry {
                name: name.clone(),
                kind: if MANIFEST_ENTRIES.contains(&name.as_str()) {
                    ResourceKind::Manifest
                } else {
                    ResourceKind::Other
                },
            })
            .collect())
    }

    fn load_resource(&self, entry: &ResourceEntry) -> Result<ResourceContent> {
        let Some(bytes) = archive::read_entry(&self.jar_path, &entry.name)? else {
            bail!("Entry disappeared from archive: {}", entry.name);
        };
        if bytes.contains(&0) {
            return Ok(ResourceContent::Binary(bytes.len()));
        }
        match String::from_utf8(bytes) {
            Ok(text) => Ok(ResourceContent::Text(text)),
            Err(e) => Ok(ResourceContent::Binary(e.into_bytes().len())),
        }
    }

    fn decompile(&self, class: &ClassRef) -> Result<()> {
        self.unit(class).map(|_| ())
    }

    fn class_code(&self, class: &ClassRef) -> Result<String> {
        Ok(self.unit(class)?.source.clone())
    }

    fn methods(&self, class: &ClassRef) -> Result<Vec<MethodNode>> {
        let Some(unit) = self.outline(class)? else {
            return Ok(Vec::new());
        };
        let outline = unit.outline.as_ref().map(|o| o.methods.as_slice()).unwrap_or(&[]);
        Ok(outline
            .iter()
            .map(|m| MethodNode {
                name: m.name.clone(),
                declaring_class: class.clone(),
                parameters: m.parameters.clone(),
                modifiers: m.modifiers,
            })
            .collect())
    }

    fn fields(&self, class: &ClassRef) -> Result<Vec<FieldNode>> {
        let Some(unit) = self.outline(class)? else {
            return Ok(Vec::new());
        };
        let fields = unit.outline.as_ref().map(|o| o.fields.as_slice()).unwrap_or(&[]);
        Ok(fields
            .iter()
            .map(|f| FieldNode {
                name: f.name.clone(),
                declaring_class: class.clone(),
                modifiers: f.modifiers,
            })
            .collect())
    }

    fn method_code(&self, _method: &MethodNode) -> Result<Option<String>> {
        // CFR only renders whole classes.
        Ok(None)
    }

    fn class_usages(&self, class: &ClassRef) -> Result<Vec<UsageRef>> {
        let mut usages: Vec<UsageRef> = self
            .referencing_classes(class)
            .into_iter()
            .map(|(owner, _)| UsageRef {
                name: owner.simple_name().to_string(),
                full_name: owner.full_name.clone(),
                kind: UsageKind::Class,
            })
            .collect();
        usages.sort_by(|a, b| a.full_name.cmp(&b.full_name));
        Ok(usages)
    }

    fn method_usages(&self, method: &MethodNode) -> Result<Vec<UsageRef>> {
        let declaring = method.declaring_class.top_level_name();
        self.member_usages(&method.declaring_class, |owner, m| {
            let is_target = owner.full_name == declaring
                && m.name == method.name
                && m.parameters.len() == method.parameter_count();
            !is_target && m.calls.contains(&method.name)
        })
    }

    fn field_usages(&self, field: &FieldNode) -> Result<Vec<UsageRef>> {
        self.member_usages(&field.declaring_class, |_, m| m.names.contains(&field.name))
    }
}

fn modified_time(path: &Path) -> Option<SystemTime> {
    path.metadata().and_then(|m| m.modified()).ok()
}
