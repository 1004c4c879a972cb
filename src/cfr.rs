use anyhow::{Context, Result, bail};
use std::path::{Path, PathBuf};
use std::process::{Command, Output};
use tracing::debug;

const CFR_TARGET: &str = "class_inspector::cfr";

/// Runs the CFR decompiler as a child `java` process.
#[derive(Debug, Clone)]
pub struct Cfr {
    cfr_jar: PathBuf,
    java_bin: PathBuf,
}

impl Cfr {
    /// Uses `CLASS_INSPECTOR_JAVA` when set, `java` from `PATH` otherwise.
    pub fn new(cfr_jar: PathBuf) -> Self {
        let java_bin = std::env::var_os("CLASS_INSPECTOR_JAVA")
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from("java"));
        Self { cfr_jar, java_bin }
    }

    pub fn with_java_bin(mut self, java_bin: PathBuf) -> Self {
        self.java_bin = java_bin;
        self
    }

    /// Decompiles one top-level class; nested classes come back inline.
    pub fn decompile_class(&self, jar_path: &Path, class_name: &str) -> Result<String> {
        debug!(target: CFR_TARGET, class = class_name, jar = %jar_path.display(), "decompiling");
        let output = self.run(&[
            "-jar",
            self.cfr_jar
                .to_str()
                .context("cfr.jar path is not valid UTF-8")?,
            "--extraclasspath",
            jar_path.to_str().context("jar path is not valid UTF-8")?,
            class_name,
            "--silent",
            "true",
            "--comments",
            "false",
        ])?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            bail!("CFR decompilation failed for {class_name}: {}", stderr.trim());
        }

        Ok(String::from_utf8_lossy(&output.stdout).to_string())
    }

    fn run(&self, args: &[&str]) -> Result<Output> {
        #[cfg(windows)]
        {
            let lower = self.java_bin.to_string_lossy().to_ascii_lowercase();
            if lower.ends_with(".cmd") || lower.ends_with(".bat") {
                return Command::new("cmd")
                    .arg("/C")
                    .arg(&self.java_bin)
                    .args(args)
                    .output()
                    .context("Failed to execute java (ensure JRE/JDK is installed)");
            }
        }

        Command::new(&self.java_bin)
            .args(args)
            .output()
            .context("Failed to execute java (ensure JRE/JDK is installed)")
    }
}
