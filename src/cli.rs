use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

use crate::config::DEFAULT_LISTEN;
use crate::server::DEFAULT_WORKERS;

#[derive(Debug, Clone, Parser)]
#[command(name = "class-inspector")]
#[command(about = "Serve introspection queries over a decompiled Java archive")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    #[arg(long, value_name = "FILE", global = true)]
    pub cfr: Option<PathBuf>,

    #[arg(long, value_name = "FILE", global = true)]
    pub db: Option<PathBuf>,

    /// Keep decompiled sources in memory only.
    #[arg(long, global = true)]
    pub no_cache: bool,

    #[arg(long, value_name = "FILTER", default_value = "info", global = true)]
    pub log_filter: String,

    #[arg(long, value_enum, default_value_t = LogFormat::Compact, global = true)]
    pub log_format: LogFormat,
}

#[derive(Debug, Clone, Subcommand)]
pub enum Commands {
    /// Serve the operation table over HTTP.
    Serve {
        #[arg(value_name = "JAR")]
        jar_path: PathBuf,

        #[arg(long, value_name = "URL", default_value = DEFAULT_LISTEN)]
        listen: String,

        #[arg(long, value_name = "N", default_value_t = DEFAULT_WORKERS)]
        workers: usize,

        /// Decompile every class before accepting connections.
        #[arg(long)]
        warm: bool,

        #[arg(long, value_name = "N", default_value_t = 30)]
        startup_retries: u32,
    },
    /// Run one operation and print its envelope.
    Invoke {
        #[arg(value_name = "JAR")]
        jar_path: PathBuf,

        tool: String,

        #[arg(long, value_name = "JSON", default_value = "{}")]
        params: String,
    },
    /// Print the operation table.
    Tools,
    Stats,
    Clear,
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, ValueEnum)]
pub enum LogFormat {
    Compact,
    Json,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn serve_defaults() {
        let cli = Cli::try_parse_from(["class-inspector", "serve", "app.jar"]).unwrap();
        match cli.command {
            Commands::Serve {
                jar_path,
                listen,
                workers,
                warm,
                startup_retries,
            } => {
                assert_eq!(jar_path, PathBuf::from("app.jar"));
                assert_eq!(listen, DEFAULT_LISTEN);
                assert_eq!(workers, 5);
                assert!(!warm);
                assert_eq!(startup_retries, 30);
            }
            other => panic!("unexpected command: {other:?}"),
        }
        assert_eq!(cli.log_filter, "info");
        assert_eq!(cli.log_format, LogFormat::Compact);
        assert!(!cli.no_cache);
    }

    #[test]
    fn global_flags_follow_subcommand() {
        let cli = Cli::try_parse_from([
            "class-inspector",
            "invoke",
            "app.jar",
            "get_class_source",
            "--params",
            r#"{"class_name":"a.B"}"#,
            "--no-cache",
            "--log-format",
            "json",
        ])
        .unwrap();
        assert!(cli.no_cache);
        assert_eq!(cli.log_format, LogFormat::Json);
        assert!(matches!(cli.command, Commands::Invoke { ref tool, .. } if tool == "get_class_source"));
    }
}
