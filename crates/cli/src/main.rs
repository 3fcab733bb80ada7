use std::collections::BTreeMap;
use std::io::BufReader;
use std::path::PathBuf;
use std::str::FromStr;

use anyhow::{anyhow, Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use importstatus_core::DeployMode;
use tracing::info;

mod controller;
mod reconciler;
mod replay;

use controller::ControllerOptions;

#[derive(Parser, Debug)]
#[command(name = "importstatusctl", version, about = "Import-status event filter")]
struct Cli {
    /// Output format
    #[arg(short = 'o', long = "output", value_enum, global = true, default_value_t = Output::Human)]
    output: Output,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, ValueEnum)]
enum Output { Human, Json }

#[derive(Subcommand, Debug)]
enum Commands {
    /// Watch ManagedClusters and klusterlet ManifestWorks and reconcile admitted keys
    Run {
        /// Clusters reconciled in parallel
        #[arg(long = "max-concurrent-reconciles", env = "MAX_CONCURRENT_RECONCILES", default_value_t = 1)]
        max_concurrent: usize,
        /// Label selector scoping the ManifestWork watch
        #[arg(long = "work-label-selector", env = "IMPORTSTATUS_WORK_SELECTOR")]
        work_label_selector: Option<String>,
        /// Raw events buffered per watch source
        #[arg(long = "event-buffer", default_value_t = 1024)]
        event_buffer: usize,
    },
    /// Replay recorded events (JSON lines, "-" for stdin) and print what would be enqueued
    Replay {
        file: PathBuf,
    },
    /// Classify a cluster's deploy mode from its annotations
    Mode {
        /// Annotation as key=value (repeatable)
        #[arg(short = 'a', long = "annotation", value_parser = parse_annotation)]
        annotations: Vec<(String, String)>,
    },
}

fn parse_annotation(s: &str) -> Result<(String, String)> {
    let (k, v) = s.split_once('=').ok_or_else(|| anyhow!("expected key=value, got {:?}", s))?;
    if k.is_empty() {
        return Err(anyhow!("empty annotation key in {:?}", s));
    }
    Ok((k.to_string(), v.to_string()))
}

fn init_tracing() {
    let env = std::env::var("IMPORTSTATUS_LOG").unwrap_or_else(|_| "info".to_string());
    let filter = tracing_subscriber::EnvFilter::from_str(&env).unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).with_target(true).with_writer(std::io::stderr).init();
}

fn init_metrics() {
    if let Ok(addr) = std::env::var("IMPORTSTATUS_METRICS_ADDR") {
        if let Ok(sock) = addr.parse::<std::net::SocketAddr>() {
            let builder = metrics_exporter_prometheus::PrometheusBuilder::new();
            match builder.with_http_listener(sock).install() {
                Ok(_) => tracing::info!(addr = %addr, "Prometheus metrics exporter listening"),
                Err(e) => tracing::warn!(error = %e, "failed to install metrics exporter"),
            }
        } else {
            tracing::warn!(addr = %addr, "invalid IMPORTSTATUS_METRICS_ADDR; expected host:port");
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();
    init_metrics();
    let cli = Cli::parse();

    match cli.command {
        Commands::Run { max_concurrent, work_label_selector, event_buffer } => {
            let opts = ControllerOptions { max_concurrent: max_concurrent.max(1), work_label_selector, event_buffer };
            info!(?opts, "run invoked");
            controller::run(opts).await?;
        }
        Commands::Replay { file } => {
            let lines = if file.as_os_str() == "-" {
                replay::replay(std::io::stdin().lock())?
            } else {
                let f = std::fs::File::open(&file).with_context(|| format!("opening {}", file.display()))?;
                replay::replay(BufReader::new(f))?
            };
            match cli.output {
                Output::Human => {
                    println!("{:<5} {:<15} {:<8} {:<10} CLUSTER", "LINE", "KIND", "EVENT", "OUTCOME");
                    for l in &lines {
                        println!("{:<5} {:<15} {:<8} {:<10} {}", l.line, l.kind, l.event, l.outcome, l.cluster.as_deref().unwrap_or("-"));
                    }
                }
                Output::Json => println!("{}", serde_json::to_string_pretty(&lines)?),
            }
        }
        Commands::Mode { annotations } => {
            let map: BTreeMap<String, String> = annotations.into_iter().collect();
            let mode = DeployMode::of(Some(&map));
            match cli.output {
                Output::Human => println!("{}", mode.as_str()),
                Output::Json => println!("{}", serde_json::to_string(&mode)?),
            }
        }
    }
    Ok(())
}
