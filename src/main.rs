use anyhow::{Context, Result, bail};
use clap::Parser;
use class_inspector::cache::SourceCache;
use class_inspector::cfr::Cfr;
use class_inspector::cli::{Cli, Commands};
use class_inspector::config::{clear_db, parse_listen_interface, resolve_cfr_path, resolve_db_path};
use class_inspector::dispatch::Dispatcher;
use class_inspector::model::Decompiler;
use class_inspector::server::{Server, wait_until_live};
use class_inspector::telemetry;
use class_inspector::tools::tools_json;
use class_inspector::workspace::JarWorkspace;
use serde_json::Value;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

const STARTUP_POLL_INTERVAL: Duration = Duration::from_secs(1);

fn main() -> Result<()> {
    let cli = Cli::parse();
    telemetry::initialise(&cli.log_filter, cli.log_format)?;

    match cli.command.clone() {
        Commands::Tools => {
            println!("{}", serde_json::to_string_pretty(&tools_json())?);
        }
        Commands::Clear => {
            let db_path = resolve_db_path(&cli)?;
            clear_db(&db_path)?;
        }
        Commands::Stats => {
            let db_path = resolve_db_path(&cli)?;
            let cache = SourceCache::open(db_path)?;
            println!("{}", serde_json::to_string_pretty(&cache.stats()?)?);
        }
        Commands::Invoke {
            jar_path,
            tool,
            params,
        } => {
            let parameters = match serde_json::from_str::<Value>(&params)
                .context("--params is not valid JSON")?
            {
                Value::Object(map) => map,
                _ => bail!("--params must be a JSON object"),
            };
            let workspace = open_workspace(&cli, &jar_path)?;
            let envelope = Dispatcher::new(Arc::new(workspace)).invoke(&tool, &parameters);
            println!("{}", envelope.to_pretty_string());
            if envelope.is_error() {
                std::process::exit(1);
            }
        }
        Commands::Serve {
            jar_path,
            listen,
            workers,
            warm,
            startup_retries,
        } => {
            let addr = parse_listen_interface(&listen)?;
            let workspace = Arc::new(open_workspace(&cli, &jar_path)?);

            if !wait_until_live(workspace.as_ref(), startup_retries, STARTUP_POLL_INTERVAL) {
                bail!(
                    "Decompiler did not become ready after {startup_retries} attempts; not starting server"
                );
            }
            let classes = workspace.classes_with_inners()?.len();
            info!(classes, jar = %workspace.jar_path().display(), "decompiler ready");

            if warm {
                let result = workspace.warm();
                info!(
                    decompiled = result.decompiled,
                    failed = result.failed,
                    elapsed_ms = result.elapsed_ms as u64,
                    "warm-up complete"
                );
            }

            let server = Server::bind(&addr.host, addr.port, workers, Dispatcher::new(workspace))?;
            let local = server.local_addr()?;
            let handle = server.start()?;
            info!(%local, workers, "server started at http://{}:{}", addr.host, local.port());
            handle.join()?;
        }
    }

    Ok(())
}

fn open_workspace(cli: &Cli, jar_path: &Path) -> Result<JarWorkspace> {
    let cfr = Cfr::new(resolve_cfr_path(cli)?);
    let cache = if cli.no_cache {
        None
    } else {
        Some(SourceCache::open(resolve_db_path(cli)?)?)
    };
    JarWorkspace::open(jar_path, cfr, cache)
}
