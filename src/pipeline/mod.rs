//! Scan-processing pipeline: validate -> enrich -> analyze.
//!
//! Only validation failures surface from `process`; lookup failures degrade
//! through the circuit breaker and persistence failures flip the pipeline
//! into a memory-only degraded mode instead of failing the scan.

pub mod analyze;
pub mod breaker;
pub mod enrich;
pub mod memory;
pub mod validate;

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::Utc;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::baseline::BaselineStore;
use crate::baseline::model::MetricKind;
use crate::config::Config;
use crate::scan::RawScan;
use crate::storage::Store;

use self::analyze::{analyze_devices, AnalysisSettings, ScanAnalysis};
use self::breaker::{BreakerError, CircuitBreaker};
use self::enrich::{classify, risk_score, EnrichedDevice};
use self::memory::DeviceMemory;
pub use self::validate::InvalidScanError;

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("invalid scan: {0}")]
    InvalidScan(#[from] InvalidScanError),
}

/// Result of processing one scan.
#[derive(Debug, serde::Serialize)]
pub struct ProcessedScan {
    pub scan_id: String,
    pub subnet: String,
    pub enriched_devices: Vec<EnrichedDevice>,
    pub analysis: ScanAnalysis,
}

pub struct ScanPipeline {
    settings: AnalysisSettings,
    uptime_window_hours: i64,
    memory: Mutex<DeviceMemory>,
    breaker: Mutex<CircuitBreaker>,
    store: Option<Store>,
    baselines: Arc<BaselineStore>,
    degraded: AtomicBool,
}

impl ScanPipeline {
    pub fn new(config: &Config, store: Option<Store>, baselines: Arc<BaselineStore>) -> Self {
        let settings = AnalysisSettings {
            uptime_threshold: config.processing.uptime_threshold_for_downtime_alert,
            latency_multiplier: config.processing.latency_spike_threshold_multiplier,
            port_whitelist: crate::alert::rules::port_whitelist(&config.alerting),
        };
        let breaker = CircuitBreaker::new(
            config.processing.breaker_failure_threshold,
            Duration::from_secs(config.processing.breaker_cooldown_secs),
        );

        let memory = match &store {
            Some(store) => {
                match DeviceMemory::load(store, config.baseline.sample_window_hours) {
                    Ok(memory) => memory,
                    Err(e) => {
                        warn!(error = %e, "could not hydrate device memory, starting cold");
                        DeviceMemory::new()
                    }
                }
            }
            None => DeviceMemory::new(),
        };

        Self {
            settings,
            uptime_window_hours: config.baseline.sample_window_hours,
            memory: Mutex::new(memory),
            breaker: Mutex::new(breaker),
            store,
            baselines,
            degraded: AtomicBool::new(false),
        }
    }

    /// True once any persistence call has failed; the pipeline keeps
    /// running on its in-memory state.
    pub fn is_degraded(&self) -> bool {
        self.degraded.load(Ordering::Relaxed)
    }

    /// Process one scan document. Replaying the same scan is idempotent
    /// with respect to persisted state.
    pub fn process(&self, raw: RawScan) -> Result<ProcessedScan, PipelineError> {
        let scan = validate::validate_scan(raw)?;
        let now = Utc::now();
        info!(scan_id = %scan.scan_id, subnet = %scan.subnet, devices = scan.devices.len(), "processing scan");

        let mut memory = self.memory.lock().unwrap_or_else(|e| e.into_inner());

        // Devices the in-memory cache has not seen may still exist in the
        // store (e.g. after a restart). That lookup is the fragile path the
        // circuit breaker guards; on failure we fall back to treating the
        // device as unknown.
        if let Some(store) = &self.store {
            for device in &scan.devices {
                if !memory.is_known(&device.ip) {
                    self.hydrate_from_store(store, &mut memory, &device.ip);
                }
            }
        }

        let known_before: HashSet<String> = scan
            .devices
            .iter()
            .filter(|d| memory.is_known(&d.ip))
            .map(|d| d.ip.clone())
            .collect();

        // Stage 2: enrichment, pure per-device.
        let enriched_devices: Vec<EnrichedDevice> = scan
            .devices
            .iter()
            .map(|device| {
                let known = known_before.contains(&device.ip);
                EnrichedDevice {
                    class: classify(device),
                    risk_score: risk_score(device, known),
                    first_seen: memory.first_seen(&device.ip).unwrap_or(now),
                    last_seen: now,
                    device: device.clone(),
                }
            })
            .collect();

        // Stage 3: analysis against remembered state and baselines.
        let baselines = Arc::clone(&self.baselines);
        let analysis = analyze_devices(
            &enriched_devices,
            &mut memory,
            &|ip| known_before.contains(ip),
            &|ip| {
                baselines
                    .snapshot(ip, MetricKind::ResponseTime)
                    .map(|s| s.mean)
            },
            &self.settings,
            now,
        );

        // Persist the outcome (best effort) and fold it into memory.
        if let Some(store) = &self.store {
            self.persist_outcome(store, &scan.scan_id, &scan.subnet, &enriched_devices, &analysis);
        }
        for device in &enriched_devices {
            memory.remember_device(&device.device.ip, device.first_seen, device.last_seen);
        }
        drop(memory);

        info!(
            scan_id = %scan.scan_id,
            anomalies = analysis.anomalies_detected,
            online = analysis.summary_stats.online_count,
            "scan processed"
        );

        Ok(ProcessedScan {
            scan_id: scan.scan_id,
            subnet: scan.subnet,
            enriched_devices,
            analysis,
        })
    }

    fn hydrate_from_store(&self, store: &Store, memory: &mut DeviceMemory, ip: &str) {
        let mut breaker = self.breaker.lock().unwrap_or_else(|e| e.into_inner());
        let result = breaker.call(|| store.device_by_ip(ip));
        drop(breaker);

        match result {
            Ok(Some(row)) => {
                memory.remember_device(ip, row.first_seen, row.last_seen);
                if let Ok(Some(ports)) = store.latest_ports(row.device_id) {
                    memory.remember_ports(ip, ports);
                }
                if let Ok(Some(ratio)) = store.uptime_ratio(row.device_id, self.uptime_window_hours)
                {
                    memory.set_uptime_ratio(ip, ratio);
                }
            }
            Ok(None) => {}
            Err(BreakerError::Open) => {
                debug!(ip, "device lookup skipped, circuit breaker open");
            }
            Err(BreakerError::Inner(e)) => {
                warn!(ip, error = %e, "device lookup failed, treating as unknown");
            }
        }
    }

    /// Best-effort persistence of devices, history, anomalies, and the
    /// scan summary. Any failure marks the pipeline degraded and is
    /// otherwise swallowed.
    fn persist_outcome(
        &self,
        store: &Store,
        scan_id: &str,
        subnet: &str,
        devices: &[EnrichedDevice],
        analysis: &ScanAnalysis,
    ) {
        for device in devices {
            let device_id = match store.upsert_device(device) {
                Ok(id) => id,
                Err(e) => {
                    self.mark_degraded("upsert_device", &e);
                    continue;
                }
            };
            let rtt = (device.device.response_time_ms > 0.0)
                .then_some(device.device.response_time_ms);
            if let Err(e) =
                store.append_status_history(device_id, scan_id, device.device.status, rtt)
            {
                self.mark_degraded("append_status_history", &e);
            }
            if device.device.status.is_online() {
                if let Err(e) =
                    store.insert_port_snapshot(device_id, scan_id, &device.device.open_ports)
                {
                    self.mark_degraded("insert_port_snapshot", &e);
                }
            }
        }

        for anomaly in &analysis.anomalies {
            let device_id = store.device_id_by_ip(&anomaly.device).unwrap_or(None);
            if let Err(e) = store.upsert_anomaly(scan_id, device_id, anomaly, &anomaly.summary()) {
                self.mark_degraded("upsert_anomaly", &e);
            }
        }

        match serde_json::to_string(&analysis.summary_stats) {
            Ok(summary) => {
                if let Err(e) = store.upsert_scan_summary(scan_id, subnet, &summary) {
                    self.mark_degraded("upsert_scan_summary", &e);
                }
            }
            Err(e) => warn!(error = %e, "could not serialize scan summary"),
        }
    }

    fn mark_degraded(&self, operation: &str, error: &crate::storage::StoreError) {
        if !self.degraded.swap(true, Ordering::Relaxed) {
            warn!(operation, error = %error, "store unavailable, continuing in memory-only mode");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detect::AnomalyKind;
    use crate::scan::RawScan;

    fn pipeline() -> ScanPipeline {
        let config = Config::default();
        let baselines = Arc::new(BaselineStore::new(&config.baseline, None));
        ScanPipeline::new(&config, None, baselines)
    }

    fn scan_json(scan_id: &str, devices: serde_json::Value) -> RawScan {
        serde_json::from_value(serde_json::json!({
            "scan_id": scan_id,
            "subnet": "192.168.1.0/24",
            "devices": devices,
        }))
        .unwrap()
    }

    #[test]
    fn test_invalid_scan_fails_atomically() {
        let pipeline = pipeline();
        let raw = scan_json(
            "s-1",
            serde_json::json!([
                {"ip": "192.168.1.1", "status": "online"},
                {"ip": "not-an-ip", "status": "online"},
            ]),
        );
        assert!(matches!(
            pipeline.process(raw),
            Err(PipelineError::InvalidScan(_))
        ));

        // The valid device was not remembered either.
        let memory = pipeline.memory.lock().unwrap();
        assert!(memory.is_empty());
    }

    #[test]
    fn test_new_device_only_on_first_replay() {
        let pipeline = pipeline();
        let raw = || {
            scan_json(
                "s-2",
                serde_json::json!([{"ip": "192.168.1.20", "status": "online",
                                    "open_ports": [80], "response_time_ms": 2.0}]),
            )
        };

        let first = pipeline.process(raw()).unwrap();
        assert!(first
            .analysis
            .anomalies
            .iter()
            .any(|a| a.kind() == AnomalyKind::NewDevice));

        let second = pipeline.process(raw()).unwrap();
        assert!(!second
            .analysis
            .anomalies
            .iter()
            .any(|a| a.kind() == AnomalyKind::NewDevice));
    }

    #[test]
    fn test_port_change_scenario() {
        let pipeline = pipeline();
        let initial = scan_json(
            "s-3",
            serde_json::json!([{"ip": "192.168.1.50", "status": "online",
                                "open_ports": [22, 80], "response_time_ms": 3.0}]),
        );
        pipeline.process(initial).unwrap();

        let changed = scan_json(
            "s-4",
            serde_json::json!([{"ip": "192.168.1.50", "status": "online",
                                "open_ports": [22, 80, 3389], "response_time_ms": 3.0}]),
        );
        let result = pipeline.process(changed).unwrap();

        let anomaly = result
            .analysis
            .anomalies
            .iter()
            .find(|a| a.kind() == AnomalyKind::NewPortsOpened)
            .expect("expected new_ports_opened anomaly");
        assert_eq!(anomaly.severity, crate::detect::Severity::Medium);
        assert_eq!(anomaly.confidence, 0.95);
        match &anomaly.detail {
            crate::detect::AnomalyDetail::NewPortsOpened { ports, .. } => {
                assert_eq!(ports, &vec![3389]);
            }
            other => panic!("unexpected detail: {other:?}"),
        }
    }
}
