use anyhow::{Context, Result};
use std::env;
use std::path::{Path, PathBuf};
use thiserror::Error;
use url::Url;

use crate::cli::Cli;

pub const DEFAULT_LISTEN: &str = "http://127.0.0.1:8085";

const CFR_URL: &str = "https://github.com/leibnitz27/cfr/releases/download/0.152/cfr-0.152.jar";

/// Host and port taken from a validated `http://host:port` interface.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ListenAddr {
    pub host: String,
    pub port: u16,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("Malformed HTTP interface URL: {0}")]
    Malformed(String),
    #[error("Invalid protocol: {0}. Only 'http' is supported.")]
    Protocol(String),
    #[error("Missing or invalid host in HTTP interface: {0}")]
    Host(String),
    #[error("Port must be explicitly specified in HTTP interface: {0}")]
    Port(String),
    #[error("Path is not allowed in HTTP interface: {0}")]
    Path(String),
    #[error("HTTP interface must not contain query, fragment, or user info: {0}")]
    Extras(String),
}

/// Accepts `http://host:port` with an optional trailing `/` and nothing else.
pub fn parse_listen_interface(interface: &str) -> Result<ListenAddr, ConfigError> {
    let url = Url::parse(interface).map_err(|_| ConfigError::Malformed(interface.to_string()))?;

    if !url.scheme().eq_ignore_ascii_case("http") {
        return Err(ConfigError::Protocol(url.scheme().to_string()));
    }
    let host = match url.host_str() {
        Some(host) if !host.is_empty() => host.trim_matches(['[', ']']).to_string(),
        _ => return Err(ConfigError::Host(interface.to_string())),
    };
    // `Url::port` hides the scheme default, so `:80` must be spelled out too.
    let port = match url.port() {
        Some(port) => port,
        None if has_explicit_port(interface) => 80,
        None => return Err(ConfigError::Port(interface.to_string())),
    };
    if !matches!(url.path(), "" | "/") {
        return Err(ConfigError::Path(interface.to_string()));
    }
    if url.query().is_some()
        || url.fragment().is_some()
        || !url.username().is_empty()
        || url.password().is_some()
    {
        return Err(ConfigError::Extras(interface.to_string()));
    }

    Ok(ListenAddr { host, port })
}

fn has_explicit_port(interface: &str) -> bool {
    let authority = interface
        .split_once("://")
        .map(|(_, rest)| rest)
        .unwrap_or(interface);
    let authority = authority.split(['/', '?', '#']).next().unwrap_or("");
    let host_port = authority.rsplit('@').next().unwrap_or(authority);
    let after_host = host_port.rsplit_once(']').map(|(_, p)| p).unwrap_or(host_port);
    after_host
        .rsplit_once(':')
        .is_some_and(|(_, port)| !port.is_empty())
}

pub fn resolve_db_path(cli: &Cli) -> Result<PathBuf> {
    if let Some(p) = cli.db.clone() {
        return Ok(p);
    }

    Ok(class_inspector_home()?.join("db.lmdb"))
}

pub fn resolve_cfr_path(cli: &Cli) -> Result<PathBuf> {
    if let Some(p) = cli.cfr.clone() {
        return Ok(p);
    }

    if let Ok(p) = env::var("CFR_JAR") {
        return Ok(PathBuf::from(p));
    }

    let default_path = class_inspector_home()?.join("tools").join("cfr.jar");
    if default_path.exists() {
        return Ok(default_path);
    }

    install_cfr_if_missing(&default_path)?;
    Ok(default_path)
}

pub fn clear_db(db_path: &Path) -> Result<()> {
    remove_file_if_exists(db_path, "db")?;
    remove_file_if_exists(&lmdb_lock_path(db_path), "db lock")?;
    Ok(())
}

fn class_inspector_home() -> Result<PathBuf> {
    let base = dirs::data_local_dir()
        .or_else(dirs::cache_dir)
        .or_else(dirs::home_dir)
        .ok_or_else(|| anyhow::anyhow!("Failed to resolve data directory"))?;
    Ok(base.join("class-inspector"))
}

fn lmdb_lock_path(db_path: &Path) -> PathBuf {
    let mut os = db_path.as_os_str().to_os_string();
    os.push("-lock");
    PathBuf::from(os)
}

fn remove_file_if_exists(path: &Path, kind: &str) -> Result<()> {
    if path.exists() {
        std::fs::remove_file(path)
            .with_context(|| format!("Failed to remove {kind} file: {}", path.display()))?;
    }
    Ok(())
}

fn install_cfr_if_missing(target_path: &Path) -> Result<()> {
    if target_path.exists() {
        return Ok(());
    }

    if let Some(parent) = target_path.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create directory: {}", parent.display()))?;
    }

    tracing::info!(
        target: "class_inspector::config",
        path = %target_path.display(),
        "CFR not found, downloading"
    );
    let status = std::process::Command::new("curl")
        .args([
            "-L",
            "--fail",
            "--silent",
            "--show-error",
            "-o",
            target_path
                .to_str()
                .context("cfr.jar target path is not valid UTF-8")?,
            CFR_URL,
        ])
        .status()
        .context(
            "Failed to execute curl (ensure curl is installed, or use --cfr to specify cfr.jar)",
        )?;

    if !status.success() {
        anyhow::bail!("Failed to download CFR. You can use --cfr to specify local cfr.jar");
    }

    Ok(())
}
