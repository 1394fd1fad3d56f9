use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};

use netsentinel::baseline::model::{MetricKind, RecalibrationMethod};
use netsentinel::baseline::BaselineStore;
use netsentinel::config::Config;
use netsentinel::pipeline::ScanPipeline;
use netsentinel::scan::RawScan;
use netsentinel::storage::Store;

#[derive(Parser)]
#[command(
    name = "netsentinel",
    about = "Adaptive network-scan anomaly detection and alerting",
    version,
    long_about = None
)]
struct Cli {
    /// Path to the configuration file
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the daemon (ingest loop + baseline engine + alerting + API)
    Serve {
        /// Bind address override
        #[arg(long)]
        bind: Option<String>,
    },

    /// Process a single scan JSON file and print the result
    Process {
        /// Path to the scan document
        file: PathBuf,
    },

    /// Inspect and manage alerts
    Alerts {
        #[command(subcommand)]
        action: AlertAction,
    },

    /// Inspect and manage baselines
    Baseline {
        #[command(subcommand)]
        action: BaselineAction,
    },
}

#[derive(Subcommand)]
enum AlertAction {
    /// List recent alerts
    List {
        #[arg(long, default_value = "20")]
        limit: usize,
    },

    /// Acknowledge an alert
    Ack {
        /// Alert id
        id: String,

        /// Acknowledging operator
        #[arg(long)]
        actor: String,
    },

    /// Resolve a tracked incident (clears alert suppression)
    Resolve {
        /// Dedup key, e.g. "192.168.1.50:new_ports_opened"
        key: String,
    },
}

#[derive(Subcommand)]
enum BaselineAction {
    /// Show the stored baseline for a device
    Show {
        /// Device IP address
        device: String,

        /// Metric type
        #[arg(long, default_value = "response_time")]
        metric: String,
    },

    /// Force a recalibration from recent samples
    Recalibrate {
        /// Device IP address
        device: String,

        /// Metric type
        #[arg(long, default_value = "response_time")]
        metric: String,

        /// Method: full, gradual, seasonal, or adaptive
        #[arg(long, default_value = "adaptive")]
        method: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    let config = Config::resolve(cli.config.as_deref())?;

    match cli.command {
        Commands::Serve { bind } => {
            let mut config = config;
            if let Some(bind) = bind {
                config.server.bind = bind;
            }
            tracing::info!(bind = %config.server.bind, "starting netsentinel daemon");
            netsentinel::serve(config).await?;
        }
        Commands::Process { file } => {
            let content = std::fs::read_to_string(&file)
                .with_context(|| format!("could not read {}", file.display()))?;
            let raw: RawScan =
                serde_json::from_str(&content).context("scan file is not valid JSON")?;

            // One-shot processing runs against the configured store when it
            // is reachable, memory-only otherwise.
            let store = match Store::open(&config.storage.db_path) {
                Ok(store) => Some(store),
                Err(e) => {
                    tracing::warn!(error = %e, "store unavailable, processing in memory only");
                    None
                }
            };
            let baselines = Arc::new(BaselineStore::new(&config.baseline, store.clone()));
            let pipeline = ScanPipeline::new(&config, store, baselines);

            let result = pipeline.process(raw)?;
            println!("{}", serde_json::to_string_pretty(&result)?);
        }
        Commands::Alerts { action } => {
            let store = Store::open(&config.storage.db_path)?;
            match action {
                AlertAction::List { limit } => {
                    let alerts = store.recent_alerts(limit)?;
                    if alerts.is_empty() {
                        println!("No alerts found.");
                    } else {
                        println!(
                            "{:<38} | {:<18} | {:<8} | {:<10} | Delivered",
                            "Alert ID", "Type", "Severity", "Channel"
                        );
                        println!("{:-<38}-|-{:-<18}-|-{:-<8}-|-{:-<10}-|-{:-<9}", "", "", "", "", "");
                        for alert in alerts {
                            let delivered = match alert.delivered {
                                Some(true) => "yes",
                                Some(false) => "no",
                                None => "pending",
                            };
                            println!(
                                "{:<38} | {:<18} | {:<8} | {:<10} | {}",
                                alert.alert_id,
                                alert.alert_type,
                                alert.severity,
                                alert.channel,
                                delivered
                            );
                        }
                    }
                }
                AlertAction::Ack { id, actor } => {
                    if store.acknowledge_alert(&id, &actor)? {
                        println!("Alert {id} acknowledged by {actor}.");
                    } else {
                        println!("Alert {id} not found.");
                    }
                }
                AlertAction::Resolve { key } => {
                    if store.resolve_tracking(&key)? {
                        println!("Incident {key} resolved.");
                    } else {
                        println!("No tracked incident for {key}.");
                    }
                }
            }
        }
        Commands::Baseline { action } => {
            let store = Store::open(&config.storage.db_path)?;
            match action {
                BaselineAction::Show { device, metric } => {
                    let metric: MetricKind = metric
                        .parse()
                        .map_err(|e: String| anyhow::anyhow!(e))?;
                    match store.load_baseline(&device, metric)? {
                        Some(baseline) => {
                            println!("{}", serde_json::to_string_pretty(&baseline)?);
                        }
                        None => println!("No baseline stored for {device}/{metric}."),
                    }
                }
                BaselineAction::Recalibrate {
                    device,
                    metric,
                    method,
                } => {
                    let metric: MetricKind = metric
                        .parse()
                        .map_err(|e: String| anyhow::anyhow!(e))?;
                    let method: RecalibrationMethod = method
                        .parse()
                        .map_err(|e: String| anyhow::anyhow!(e))?;

                    let samples = store
                        .recent_latency_samples(&device, config.baseline.sample_window_hours)?;
                    let baselines =
                        Arc::new(BaselineStore::new(&config.baseline, Some(store.clone())));
                    match baselines.recalibrate(&device, metric, &samples, method) {
                        Ok(snapshot) => {
                            println!(
                                "Recalibrated {device}/{metric}: mean={:.2} std={:.2} (n={})",
                                snapshot.mean, snapshot.std_dev, snapshot.sample_count
                            );
                        }
                        Err(e) => {
                            println!("Recalibration failed: {e}");
                        }
                    }
                }
            }
        }
    }

    Ok(())
}
