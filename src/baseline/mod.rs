//! Adaptive baseline engine: per (entity, metric) statistical models with
//! concept-drift detection and recalibration.
//!
//! Pipeline readers only ever see a consistent snapshot: snapshots are
//! immutable and swapped atomically under the store's lock, so a baseline
//! read never observes a partially written model.

pub mod model;
pub mod stats;

use std::collections::HashMap;
use std::str::FromStr;
use std::sync::{Arc, RwLock};
use std::time::Duration;

use chrono::Utc;
use cron::Schedule as CronSchedule;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::config::BaselineConfig;
use crate::storage::Store;

use self::model::{
    apply_method, decide, validate_baseline, BaselineSnapshot, BaselineState, MetricKind,
    MetricSample, RecalibrationDecision, RecalibrationMethod, RecalibrationRecord,
};

#[derive(Debug, Error)]
pub enum BaselineError {
    #[error("no samples provided for recalibration")]
    EmptySamples,
}

struct Entry {
    snapshot: Option<Arc<BaselineSnapshot>>,
    state: BaselineState,
    validation_failures: u32,
}

/// Owner of every baseline model. Shared between the pipeline (reads) and
/// the background recalibration loop (writes).
pub struct BaselineStore {
    cfg: BaselineConfig,
    store: Option<Store>,
    entries: RwLock<HashMap<(String, MetricKind), Entry>>,
}

impl BaselineStore {
    pub fn new(cfg: &BaselineConfig, store: Option<Store>) -> Self {
        Self {
            cfg: cfg.clone(),
            store,
            entries: RwLock::new(HashMap::new()),
        }
    }

    /// Current snapshot for (entity, metric), loading lazily from the
    /// durable store on first access.
    pub fn snapshot(&self, entity: &str, metric: MetricKind) -> Option<Arc<BaselineSnapshot>> {
        let key = (entity.to_string(), metric);
        {
            let entries = self.entries.read().unwrap_or_else(|e| e.into_inner());
            if let Some(entry) = entries.get(&key) {
                return entry.snapshot.clone();
            }
        }
        self.load_entry(entity, metric)
    }

    pub fn state(&self, entity: &str, metric: MetricKind) -> BaselineState {
        let key = (entity.to_string(), metric);
        let entries = self.entries.read().unwrap_or_else(|e| e.into_inner());
        entries
            .get(&key)
            .map(|e| e.state)
            .unwrap_or(BaselineState::Learning)
    }

    /// Run the recalibration decision engine over recent samples and apply
    /// the resulting lifecycle transition.
    pub fn should_recalibrate(
        &self,
        entity: &str,
        metric: MetricKind,
        samples: &[MetricSample],
    ) -> RecalibrationDecision {
        let snapshot = self.snapshot(entity, metric);
        let decision = decide(snapshot.as_deref(), samples, &self.cfg);

        let mut entries = self.entries.write().unwrap_or_else(|e| e.into_inner());
        let entry = entries.entry((entity.to_string(), metric)).or_insert(Entry {
            snapshot,
            state: BaselineState::Learning,
            validation_failures: 0,
        });
        if entry.state != BaselineState::Degraded {
            match decision.reason.as_deref() {
                Some("insufficient_data") if entry.snapshot.is_none() => {
                    entry.state = BaselineState::Learning;
                }
                Some(_) if decision.recalibrate => {
                    entry.state = BaselineState::DriftDetected;
                }
                _ => {}
            }
        }

        decision
    }

    /// Execute a recalibration. The new baseline is stored even when
    /// post-recalibration validation fails; validity only drives the
    /// lifecycle state.
    pub fn recalibrate(
        &self,
        entity: &str,
        metric: MetricKind,
        samples: &[MetricSample],
        method: RecalibrationMethod,
    ) -> Result<Arc<BaselineSnapshot>, BaselineError> {
        if samples.is_empty() {
            return Err(BaselineError::EmptySamples);
        }
        let previous = self.snapshot(entity, metric);
        self.set_state(entity, metric, BaselineState::Recalibrating);

        let now = Utc::now();
        let (snapshot, method_used) =
            apply_method(previous.as_deref(), samples, method, &self.cfg, now);

        // Validate against a held-out tail of the recent samples.
        let values: Vec<f64> = samples.iter().map(|s| s.value).collect();
        let tail_start = values.len().saturating_sub(20);
        let validation = validate_baseline(&snapshot, &values[tail_start..]);

        let snapshot = Arc::new(snapshot);
        let state = {
            let mut entries = self.entries.write().unwrap_or_else(|e| e.into_inner());
            let entry = entries.entry((entity.to_string(), metric)).or_insert(Entry {
                snapshot: None,
                state: BaselineState::Learning,
                validation_failures: 0,
            });

            if validation.valid {
                entry.validation_failures = 0;
                entry.state = BaselineState::Stable;
            } else {
                entry.validation_failures += 1;
                entry.state = if entry.validation_failures >= self.cfg.max_validation_failures {
                    BaselineState::Degraded
                } else if previous.is_some() {
                    BaselineState::DriftDetected
                } else {
                    BaselineState::Learning
                };
            }
            entry.snapshot = Some(Arc::clone(&snapshot));
            entry.state
        };

        info!(
            entity,
            metric = %metric,
            method = %method_used,
            samples = samples.len(),
            mean = snapshot.mean,
            valid = validation.valid,
            state = state.as_str(),
            "baseline recalibrated"
        );

        // Persist best-effort; a store failure leaves the in-memory model
        // authoritative for this process.
        if let Some(store) = &self.store {
            if let Err(e) = store.save_baseline(entity, metric, &snapshot, state.as_str()) {
                warn!(entity, error = %e, "could not persist baseline");
            }
            let record = RecalibrationRecord {
                entity: entity.to_string(),
                metric,
                method: method_used,
                samples_used: samples.len(),
                previous_mean: previous.as_ref().map(|p| p.mean),
                new_mean: snapshot.mean,
                new_std: snapshot.std_dev,
                valid: validation.valid,
            };
            if let Err(e) = store.log_recalibration(&record) {
                warn!(entity, error = %e, "could not log recalibration");
            }
        }

        Ok(snapshot)
    }

    fn load_entry(&self, entity: &str, metric: MetricKind) -> Option<Arc<BaselineSnapshot>> {
        let loaded = match &self.store {
            Some(store) => match store.load_baseline(entity, metric) {
                Ok(snapshot) => snapshot.map(Arc::new),
                Err(e) => {
                    warn!(entity, error = %e, "could not load baseline");
                    None
                }
            },
            None => None,
        };

        let mut entries = self.entries.write().unwrap_or_else(|e| e.into_inner());
        let entry = entries.entry((entity.to_string(), metric)).or_insert(Entry {
            snapshot: None,
            state: BaselineState::Learning,
            validation_failures: 0,
        });
        if entry.snapshot.is_none() {
            if let Some(snapshot) = loaded {
                entry.snapshot = Some(snapshot);
                entry.state = BaselineState::Stable;
            }
        }
        entry.snapshot.clone()
    }

    fn set_state(&self, entity: &str, metric: MetricKind, state: BaselineState) {
        let mut entries = self.entries.write().unwrap_or_else(|e| e.into_inner());
        if let Some(entry) = entries.get_mut(&(entity.to_string(), metric)) {
            entry.state = state;
        }
    }
}

/// Background recalibration loop: periodically feeds each known device's
/// recent latency samples through the decision engine, recalibrating with
/// the adaptive policy when a check fires.
pub async fn run_recalibration_loop(baselines: Arc<BaselineStore>, store: Store) {
    let cfg = baselines.cfg.clone();
    let schedule = cfg
        .sweep_cron
        .as_deref()
        .and_then(|expr| match CronSchedule::from_str(expr) {
            Ok(schedule) => Some(schedule),
            Err(e) => {
                warn!(expr, error = %e, "invalid sweep cron expression, using interval");
                None
            }
        });

    info!(
        interval_secs = cfg.sweep_interval_secs,
        cron = schedule.is_some(),
        "baseline recalibration loop started"
    );

    loop {
        let delay = match &schedule {
            Some(schedule) => schedule
                .upcoming(Utc)
                .next()
                .and_then(|next| (next - Utc::now()).to_std().ok())
                .unwrap_or(Duration::from_secs(cfg.sweep_interval_secs)),
            None => Duration::from_secs(cfg.sweep_interval_secs),
        };
        tokio::time::sleep(delay).await;

        let baselines = Arc::clone(&baselines);
        let store = store.clone();
        let window = cfg.sample_window_hours;
        let result = tokio::task::spawn_blocking(move || sweep_once(&baselines, &store, window))
            .await;
        if let Err(e) = result {
            warn!(error = %e, "recalibration sweep task failed");
        }
    }
}

fn sweep_once(baselines: &BaselineStore, store: &Store, window_hours: i64) {
    let devices = match store.known_devices() {
        Ok(devices) => devices,
        Err(e) => {
            warn!(error = %e, "recalibration sweep skipped, store unavailable");
            return;
        }
    };

    for device in devices {
        let samples = match store.recent_latency_samples(&device.ip, window_hours) {
            Ok(samples) => samples,
            Err(e) => {
                warn!(ip = %device.ip, error = %e, "could not load samples");
                continue;
            }
        };

        let decision =
            baselines.should_recalibrate(&device.ip, MetricKind::ResponseTime, &samples);
        if decision.recalibrate {
            info!(
                ip = %device.ip,
                reason = decision.reason.as_deref().unwrap_or("unknown"),
                confidence = decision.confidence,
                "recalibrating baseline"
            );
            if let Err(e) = baselines.recalibrate(
                &device.ip,
                MetricKind::ResponseTime,
                &samples,
                RecalibrationMethod::Adaptive,
            ) {
                warn!(ip = %device.ip, error = %e, "recalibration failed, baseline unchanged");
            }
        } else {
            debug!(
                ip = %device.ip,
                reason = decision.reason.as_deref().unwrap_or("none"),
                "baseline maintained"
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn samples(values: &[f64]) -> Vec<MetricSample> {
        let t0 = Utc::now();
        values
            .iter()
            .enumerate()
            .map(|(i, &value)| MetricSample {
                value,
                timestamp: t0 + chrono::Duration::minutes(i as i64),
            })
            .collect()
    }

    fn store() -> BaselineStore {
        BaselineStore::new(&BaselineConfig::default(), None)
    }

    #[test]
    fn test_learning_until_enough_samples() {
        let baselines = store();
        let decision =
            baselines.should_recalibrate("10.0.0.1", MetricKind::ResponseTime, &samples(&[5.0; 10]));
        assert!(!decision.recalibrate);
        assert_eq!(
            baselines.state("10.0.0.1", MetricKind::ResponseTime),
            BaselineState::Learning
        );
    }

    #[test]
    fn test_recalibration_publishes_snapshot() {
        let baselines = store();
        let values = stats::normal_quantiles(10.0, 1.0, 100);
        let snapshot = baselines
            .recalibrate(
                "10.0.0.2",
                MetricKind::ResponseTime,
                &samples(&values),
                RecalibrationMethod::Full,
            )
            .unwrap();

        assert!((snapshot.mean - 10.0).abs() < 0.05);
        assert_eq!(
            baselines.state("10.0.0.2", MetricKind::ResponseTime),
            BaselineState::Stable
        );

        let read = baselines
            .snapshot("10.0.0.2", MetricKind::ResponseTime)
            .unwrap();
        assert_eq!(read.mean, snapshot.mean);
    }

    #[test]
    fn test_empty_samples_leave_baseline_unchanged() {
        let baselines = store();
        let values = stats::normal_quantiles(10.0, 1.0, 100);
        baselines
            .recalibrate(
                "10.0.0.3",
                MetricKind::ResponseTime,
                &samples(&values),
                RecalibrationMethod::Full,
            )
            .unwrap();

        let result =
            baselines.recalibrate("10.0.0.3", MetricKind::ResponseTime, &[], RecalibrationMethod::Full);
        assert!(matches!(result, Err(BaselineError::EmptySamples)));

        let snapshot = baselines
            .snapshot("10.0.0.3", MetricKind::ResponseTime)
            .unwrap();
        assert!((snapshot.mean - 10.0).abs() < 0.05);
    }

    #[test]
    fn test_repeated_validation_failures_degrade() {
        let baselines = store();
        // Constant samples give std 0, so the 3-sigma validation can never
        // pass; three rounds of that degrade the baseline.
        for i in 0..3 {
            let _ = baselines.recalibrate(
                "10.0.0.4",
                MetricKind::ResponseTime,
                &samples(&[10.0; 100]),
                RecalibrationMethod::Full,
            );
            let state = baselines.state("10.0.0.4", MetricKind::ResponseTime);
            if i < 2 {
                assert_ne!(state, BaselineState::Degraded);
            } else {
                assert_eq!(state, BaselineState::Degraded);
            }
        }
    }

    #[test]
    fn test_drift_transitions_state() {
        let baselines = store();
        let calm = stats::normal_quantiles(10.0, 1.0, 150);
        baselines
            .recalibrate(
                "10.0.0.5",
                MetricKind::ResponseTime,
                &samples(&calm),
                RecalibrationMethod::Full,
            )
            .unwrap();

        let shifted = stats::normal_quantiles(60.0, 1.0, 150);
        let decision =
            baselines.should_recalibrate("10.0.0.5", MetricKind::ResponseTime, &samples(&shifted));
        assert!(decision.recalibrate);
        assert_eq!(
            baselines.state("10.0.0.5", MetricKind::ResponseTime),
            BaselineState::DriftDetected
        );
    }
}
