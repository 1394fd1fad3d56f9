//! NetSentinel -- adaptive network-scan anomaly detection and alerting.
//!
//! This crate provides the scan-processing pipeline (validate -> enrich ->
//! analyze), the adaptive baseline engine with concept-drift detection,
//! and the deduplicated, throttled, multi-channel alert engine.

pub mod alert;
pub mod api;
pub mod baseline;
pub mod config;
pub mod detect;
pub mod ingest;
pub mod pipeline;
pub mod scan;
pub mod storage;

use std::sync::Arc;

use anyhow::{Context, Result};

use crate::config::Config;

/// Start the NetSentinel daemon: ingest loop, baseline recalibration,
/// alert maintenance, and the status API.
pub async fn serve(config: Config) -> Result<()> {
    tracing::info!(db_path = %config.storage.db_path, "initializing storage");
    let store = storage::Store::open(&config.storage.db_path)
        .context("failed to open database")?;

    let baselines = Arc::new(baseline::BaselineStore::new(
        &config.baseline,
        Some(store.clone()),
    ));
    let pipeline = Arc::new(pipeline::ScanPipeline::new(
        &config,
        Some(store.clone()),
        Arc::clone(&baselines),
    ));
    let channels = alert::channels::build_registry(&config.alerting);
    let engine = Arc::new(alert::AlertEngine::new(
        &config.alerting,
        channels,
        Some(store.clone()),
    ));

    tokio::spawn(ingest::run_ingest_loop(
        Arc::clone(&pipeline),
        Arc::clone(&engine),
        config.ingest.clone(),
    ));
    tokio::spawn(baseline::run_recalibration_loop(
        Arc::clone(&baselines),
        store.clone(),
    ));
    tokio::spawn(alert::escalate::run_escalation_sweep(
        Arc::clone(&engine),
        store.clone(),
        config.alerting.escalation_sweep_interval_secs,
    ));

    let state = api::state::AppState {
        store,
        engine,
        baselines,
    };
    let app = api::router(state);

    let addr: std::net::SocketAddr = config
        .server
        .bind
        .parse()
        .with_context(|| format!("invalid bind address: {}", config.server.bind))?;
    tracing::info!(%addr, "netsentinel listening");
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
