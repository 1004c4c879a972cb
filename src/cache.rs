//! Persistent cache of decompiled class sources.
//!
//! Uses LMDB (via heed). Keys combine the archive's content hash with the
//! class name, so a rebuilt archive never sees text decompiled from an
//! older copy.

use anyhow::{Context, Result};
use heed::types::Str;
use heed::{Database, Env, EnvFlags, EnvOpenOptions};
use serde::Serialize;
use std::path::{Path, PathBuf};

pub const SOURCES_DB: &str = "sources";

const DEFAULT_MAP_SIZE: usize = 1024 * 1024 * 1024;
const DEFAULT_MAX_DBS: u32 = 4;

type StrDb = Database<Str, Str>;

#[derive(Debug)]
pub struct SourceCache {
    env: Env,
    db_path: PathBuf,
    sources: StrDb,
}

#[derive(Debug, Serialize)]
pub struct CacheStats {
    pub db_path: String,
    pub source_entries: u64,
}

pub fn source_key(archive_hash: &str, class_name: &str) -> String {
    format!("{archive_hash}::{class_name}")
}

impl SourceCache {
    pub fn open(db_path: PathBuf) -> Result<Self> {
        if let Some(parent) = db_path.parent() {
            std::fs::create_dir_all(parent).with_context(|| {
                format!("Failed to create cache directory: {}", parent.display())
            })?;
        }

        let env = open_env(&db_path)?;
        let mut wtxn = env.write_txn()?;
        let sources = env.create_database::<Str, Str>(&mut wtxn, Some(SOURCES_DB))?;
        wtxn.commit()?;

        Ok(Self {
            env,
            db_path,
            sources,
        })
    }

    pub fn get_source(&self, key: &str) -> Result<Option<String>> {
        let rtxn = self.env.read_txn()?;
        Ok(self.sources.get(&rtxn, key)?.map(str::to_string))
    }

    pub fn put_source(&self, key: &str, source: &str) -> Result<()> {
        let mut wtxn = self.env.write_txn()?;
        self.sources.put(&mut wtxn, key, source)?;
        wtxn.commit()?;
        Ok(())
    }

    pub fn stats(&self) -> Result<CacheStats> {
        let rtxn = self.env.read_txn()?;
        Ok(CacheStats {
            db_path: self.db_path.to_string_lossy().to_string(),
            source_entries: self.sources.len(&rtxn)?,
        })
    }
}

fn open_env(db_path: &Path) -> Result<Env> {
    let mut options = EnvOpenOptions::new();
    options.map_size(DEFAULT_MAP_SIZE);
    options.max_dbs(DEFAULT_MAX_DBS);
    // SAFETY: We do not use NO_LOCK and keep default LMDB locking guarantees.
    // NO_SUB_DIR keeps the cache a single file at the --db path.
    unsafe {
        options.flags(EnvFlags::NO_SUB_DIR);
        options
            .open(db_path)
            .with_context(|| format!("Failed to create/open db env: {}", db_path.display()))
    }
}
