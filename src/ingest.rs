//! Spool-directory ingest loop.
//!
//! Collectors drop scan JSON documents into the spool directory; the loop
//! picks each file up exactly once, runs it through the pipeline, hands
//! the anomalies to the alert engine, and archives the file under
//! `processed/` or `failed/`.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use tracing::{error, info, warn};

use crate::alert::AlertEngine;
use crate::config::IngestConfig;
use crate::pipeline::ScanPipeline;
use crate::scan::RawScan;

pub async fn run_ingest_loop(
    pipeline: Arc<ScanPipeline>,
    engine: Arc<AlertEngine>,
    cfg: IngestConfig,
) {
    let spool = PathBuf::from(&cfg.spool_dir);
    let processed = spool.join("processed");
    let failed = spool.join("failed");
    for dir in [&spool, &processed, &failed] {
        if let Err(e) = std::fs::create_dir_all(dir) {
            error!(dir = %dir.display(), error = %e, "could not create ingest directory");
            return;
        }
    }

    info!(spool = %spool.display(), interval_secs = cfg.poll_interval_secs, "ingest loop started");
    let mut interval = tokio::time::interval(Duration::from_secs(cfg.poll_interval_secs.max(1)));

    loop {
        interval.tick().await;

        let mut files = match pending_files(&spool) {
            Ok(files) => files,
            Err(e) => {
                warn!(error = %e, "could not list spool directory");
                continue;
            }
        };
        files.sort();

        for file in files {
            let ok = ingest_file(&pipeline, &engine, &file).await;
            let target = if ok { &processed } else { &failed };
            archive(&file, target);
        }
    }
}

fn pending_files(spool: &Path) -> std::io::Result<Vec<PathBuf>> {
    let mut files = Vec::new();
    for entry in std::fs::read_dir(spool)? {
        let path = entry?.path();
        if path.is_file() && path.extension().is_some_and(|ext| ext == "json") {
            files.push(path);
        }
    }
    Ok(files)
}

/// Process one scan file end to end. Returns false when the document was
/// rejected (unreadable, unparseable, or failed validation).
async fn ingest_file(
    pipeline: &Arc<ScanPipeline>,
    engine: &Arc<AlertEngine>,
    path: &Path,
) -> bool {
    info!(file = %path.display(), "ingesting scan file");

    let content = match std::fs::read_to_string(path) {
        Ok(content) => content,
        Err(e) => {
            warn!(file = %path.display(), error = %e, "could not read scan file");
            return false;
        }
    };
    let raw: RawScan = match serde_json::from_str(&content) {
        Ok(raw) => raw,
        Err(e) => {
            warn!(file = %path.display(), error = %e, "scan file is not valid JSON");
            return false;
        }
    };

    let pipeline = Arc::clone(pipeline);
    let result = tokio::task::spawn_blocking(move || pipeline.process(raw)).await;

    match result {
        Ok(Ok(processed)) => {
            if !processed.analysis.anomalies.is_empty() {
                engine.process_anomalies(&processed.analysis.anomalies).await;
            }
            true
        }
        Ok(Err(e)) => {
            warn!(file = %path.display(), error = %e, "scan rejected");
            false
        }
        Err(e) => {
            error!(file = %path.display(), error = %e, "scan processing task failed");
            false
        }
    }
}

fn archive(file: &Path, target_dir: &Path) {
    let Some(name) = file.file_name() else {
        return;
    };
    let target = target_dir.join(name);
    if let Err(e) = std::fs::rename(file, &target) {
        warn!(file = %file.display(), error = %e, "could not archive scan file");
    }
}
