//! Baseline model: rolling statistical summaries, the recalibration
//! decision engine, and the recalibration methods themselves.

use chrono::{DateTime, Timelike, Utc};
use serde::{Deserialize, Serialize};

use crate::config::BaselineConfig;

use super::stats;

/// Metric types a baseline can be kept for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MetricKind {
    ResponseTime,
    PacketLoss,
    Throughput,
}

impl MetricKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            MetricKind::ResponseTime => "response_time",
            MetricKind::PacketLoss => "packet_loss",
            MetricKind::Throughput => "throughput",
        }
    }
}

impl std::fmt::Display for MetricKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for MetricKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "response_time" => Ok(MetricKind::ResponseTime),
            "packet_loss" => Ok(MetricKind::PacketLoss),
            "throughput" => Ok(MetricKind::Throughput),
            other => Err(format!("unknown metric kind: {other}")),
        }
    }
}

/// One observed metric value.
#[derive(Debug, Clone, Copy)]
pub struct MetricSample {
    pub value: f64,
    pub timestamp: DateTime<Utc>,
}

/// Baseline lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BaselineState {
    Learning,
    Stable,
    DriftDetected,
    Recalibrating,
    Degraded,
}

impl BaselineState {
    pub fn as_str(&self) -> &'static str {
        match self {
            BaselineState::Learning => "learning",
            BaselineState::Stable => "stable",
            BaselineState::DriftDetected => "drift_detected",
            BaselineState::Recalibrating => "recalibrating",
            BaselineState::Degraded => "degraded",
        }
    }
}

/// Immutable statistical summary published to pipeline readers.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BaselineSnapshot {
    pub mean: f64,
    pub std_dev: f64,
    pub min: f64,
    pub max: f64,
    pub p25: f64,
    pub p50: f64,
    pub p75: f64,
    pub p95: f64,
    pub p99: f64,
    /// Hourly seasonal factors (24 entries), when computed.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub seasonal_hourly: Option<Vec<f64>>,
    pub sample_count: usize,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecalibrationMethod {
    Full,
    Gradual,
    Seasonal,
    Adaptive,
}

impl std::str::FromStr for RecalibrationMethod {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "full" => Ok(RecalibrationMethod::Full),
            "gradual" => Ok(RecalibrationMethod::Gradual),
            "seasonal" => Ok(RecalibrationMethod::Seasonal),
            "adaptive" => Ok(RecalibrationMethod::Adaptive),
            other => Err(format!("unknown recalibration method: {other}")),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RecommendedAction {
    Maintain,
    ContinueLearning,
    FullRecalibration,
    GradualRecalibration,
    SeasonalAdjustment,
    ModelRetraining,
}

/// Outcome of the recalibration decision engine.
#[derive(Debug, Clone, Serialize)]
pub struct RecalibrationDecision {
    pub recalibrate: bool,
    pub reason: Option<String>,
    pub confidence: f64,
    pub recommended_action: RecommendedAction,
}

/// Post-recalibration validation outcome. Observational only: it feeds
/// the lifecycle state, it does not block storing the baseline.
#[derive(Debug, Clone, Serialize)]
pub struct ValidationReport {
    pub valid: bool,
    pub within_3sigma_percent: f64,
    pub mean_abs_error: f64,
}

/// Audit row describing one executed recalibration.
#[derive(Debug, Clone)]
pub struct RecalibrationRecord {
    pub entity: String,
    pub metric: MetricKind,
    pub method: String,
    pub samples_used: usize,
    pub previous_mean: Option<f64>,
    pub new_mean: f64,
    pub new_std: f64,
    pub valid: bool,
}

// ---------------------------------------------------------------------------
// Decision engine
// ---------------------------------------------------------------------------

/// Decide whether (entity, metric) needs recalibration given recent
/// samples. First applicable reason wins; confidence is the max across
/// triggered checks.
pub fn decide(
    existing: Option<&BaselineSnapshot>,
    samples: &[MetricSample],
    cfg: &BaselineConfig,
) -> RecalibrationDecision {
    // CHECK 1: enough data to decide at all.
    if samples.len() < cfg.min_learning_samples {
        return RecalibrationDecision {
            recalibrate: false,
            reason: Some("insufficient_data".to_string()),
            confidence: 0.0,
            recommended_action: RecommendedAction::ContinueLearning,
        };
    }

    let Some(baseline) = existing else {
        return RecalibrationDecision {
            recalibrate: true,
            reason: Some("no_baseline_exists".to_string()),
            confidence: 1.0,
            recommended_action: RecommendedAction::FullRecalibration,
        };
    };

    let values: Vec<f64> = samples.iter().map(|s| s.value).collect();
    let mut decision = RecalibrationDecision {
        recalibrate: false,
        reason: None,
        confidence: 0.0,
        recommended_action: RecommendedAction::Maintain,
    };

    // CHECK 2: statistical drift against the stored distribution.
    if let Some((kinds, confidence)) =
        detect_statistical_drift(baseline, &values, cfg.drift_significance)
    {
        decision.recalibrate = true;
        decision.reason = Some(format!("statistical_drift_{kinds}"));
        decision.confidence = confidence;
        decision.recommended_action = RecommendedAction::GradualRecalibration;
    }

    // CHECK 3: seasonal pattern change.
    if let Some(confidence) =
        seasonal_pattern_change(baseline, samples, cfg.seasonal_correlation_threshold)
    {
        decision.recalibrate = true;
        decision.reason = Some("seasonal_pattern_change".to_string());
        decision.confidence = decision.confidence.max(confidence);
        decision.recommended_action = RecommendedAction::SeasonalAdjustment;
    }

    // CHECK 4: model performance degradation (MAPE).
    let mape = mean_absolute_percentage_error(baseline.mean, &values);
    if mape > cfg.mape_threshold_percent {
        decision.recalibrate = true;
        if decision.reason.is_none() {
            decision.reason = Some("model_performance_degradation".to_string());
        }
        decision.confidence = decision.confidence.max((mape / 50.0).min(1.0));
        decision.recommended_action = RecommendedAction::ModelRetraining;
    }

    decision
}

/// Run the drift test battery: KS for distribution shape, Mann-Whitney for
/// median shift, Levene for variance change. Returns the triggering test
/// names and a combined confidence.
fn detect_statistical_drift(
    baseline: &BaselineSnapshot,
    recent: &[f64],
    alpha: f64,
) -> Option<(String, f64)> {
    // The stored baseline is a summary, not raw samples; reconstruct a
    // deterministic reference distribution from its mean and spread.
    let reference = stats::normal_quantiles(baseline.mean, baseline.std_dev, 1000);

    let tests = [
        ("ks_test", stats::ks_2samp(&reference, recent)),
        ("mann_whitney", stats::mann_whitney_u(&reference, recent)),
        ("variance_change", stats::levene(&reference, recent)),
    ];

    let triggered: Vec<&(&str, stats::TestOutcome)> =
        tests.iter().filter(|(_, t)| t.p_value < alpha).collect();
    if triggered.is_empty() {
        return None;
    }

    let names = triggered
        .iter()
        .map(|(name, _)| *name)
        .collect::<Vec<_>>()
        .join(", ");
    let avg_p =
        triggered.iter().map(|(_, t)| t.p_value).sum::<f64>() / triggered.len() as f64;
    let confidence =
        ((1.0 - avg_p) * triggered.len() as f64 / tests.len() as f64).min(1.0);

    Some((names, confidence))
}

/// Pearson-correlate the recent hourly profile against the stored seasonal
/// factors; low correlation means the daily shape has changed.
fn seasonal_pattern_change(
    baseline: &BaselineSnapshot,
    samples: &[MetricSample],
    correlation_threshold: f64,
) -> Option<f64> {
    if samples.len() < 24 {
        return None;
    }
    let factors = baseline.seasonal_hourly.as_ref()?;
    if factors.len() != 24 {
        return None;
    }

    let profile = hourly_profile(samples);
    let correlation = stats::pearson(&profile, factors);
    if correlation < correlation_threshold {
        Some(1.0 - correlation)
    } else {
        None
    }
}

fn mean_absolute_percentage_error(baseline_mean: f64, values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    let denom = baseline_mean + 1e-10;
    values
        .iter()
        .map(|v| ((v - baseline_mean) / denom).abs())
        .sum::<f64>()
        / values.len() as f64
        * 100.0
}

/// Mean value per hour-of-day; hours without samples fall back to the
/// overall mean so the profile stays 24 entries long.
fn hourly_profile(samples: &[MetricSample]) -> Vec<f64> {
    let mut sums = [0.0f64; 24];
    let mut counts = [0usize; 24];
    for sample in samples {
        let hour = sample.timestamp.hour() as usize;
        sums[hour] += sample.value;
        counts[hour] += 1;
    }
    let overall = stats::mean(&samples.iter().map(|s| s.value).collect::<Vec<_>>());
    (0..24)
        .map(|h| {
            if counts[h] > 0 {
                sums[h] / counts[h] as f64
            } else {
                overall
            }
        })
        .collect()
}

// ---------------------------------------------------------------------------
// Recalibration methods
// ---------------------------------------------------------------------------

/// Complete recalibration from the full recent sample set.
pub fn full_recalibration(values: &[f64], now: DateTime<Utc>) -> BaselineSnapshot {
    let mean = stats::mean(values);
    BaselineSnapshot {
        mean,
        std_dev: stats::std_dev(values, mean),
        min: values.iter().copied().fold(f64::INFINITY, f64::min),
        max: values.iter().copied().fold(f64::NEG_INFINITY, f64::max),
        p25: stats::percentile(values, 25.0),
        p50: stats::percentile(values, 50.0),
        p75: stats::percentile(values, 75.0),
        p95: stats::percentile(values, 95.0),
        p99: stats::percentile(values, 99.0),
        seasonal_hourly: None,
        sample_count: values.len(),
        created_at: now,
        updated_at: now,
    }
}

/// Exponential-smoothing blend of the current baseline with the new
/// sample; tail percentiles are replaced outright.
pub fn gradual_update(
    current: &BaselineSnapshot,
    values: &[f64],
    alpha: f64,
    now: DateTime<Utc>,
) -> BaselineSnapshot {
    let new_mean = stats::mean(values);
    let new_std = stats::std_dev(values, new_mean);

    let mut updated = current.clone();
    updated.mean = (1.0 - alpha) * current.mean + alpha * new_mean;
    updated.std_dev = (1.0 - alpha) * current.std_dev + alpha * new_std;
    updated.p95 = stats::percentile(values, 95.0);
    updated.p99 = stats::percentile(values, 99.0);
    updated.updated_at = now;
    updated
}

/// Full recalibration plus hourly seasonal factors
/// (hourly mean / overall mean).
pub fn seasonal_adjustment(samples: &[MetricSample], now: DateTime<Utc>) -> BaselineSnapshot {
    let values: Vec<f64> = samples.iter().map(|s| s.value).collect();
    let mut baseline = full_recalibration(&values, now);

    let overall = baseline.mean + 1e-10;
    let factors = hourly_profile(samples)
        .into_iter()
        .map(|hourly_mean| hourly_mean / overall)
        .collect();
    baseline.seasonal_hourly = Some(factors);
    baseline
}

/// Apply a recalibration method; returns the new snapshot and the method
/// actually used (the adaptive policy records its chosen sub-method).
pub fn apply_method(
    existing: Option<&BaselineSnapshot>,
    samples: &[MetricSample],
    method: RecalibrationMethod,
    cfg: &BaselineConfig,
    now: DateTime<Utc>,
) -> (BaselineSnapshot, String) {
    let values: Vec<f64> = samples.iter().map(|s| s.value).collect();

    match method {
        RecalibrationMethod::Full => (full_recalibration(&values, now), "full".to_string()),
        RecalibrationMethod::Gradual => match existing {
            Some(current) => (
                gradual_update(current, &values, cfg.smoothing_alpha, now),
                "gradual".to_string(),
            ),
            None => (full_recalibration(&values, now), "full".to_string()),
        },
        RecalibrationMethod::Seasonal => {
            (seasonal_adjustment(samples, now), "seasonal".to_string())
        }
        RecalibrationMethod::Adaptive => {
            let mean = stats::mean(&values);
            let volatility = stats::std_dev(&values, mean) / (mean + 1e-10);
            if volatility > cfg.volatility_threshold {
                let snapshot = match existing {
                    Some(current) => gradual_update(current, &values, cfg.adaptive_alpha, now),
                    None => full_recalibration(&values, now),
                };
                (snapshot, "adaptive->gradual".to_string())
            } else {
                (full_recalibration(&values, now), "adaptive->full".to_string())
            }
        }
    }
}

/// Validate a new baseline against a held-out tail: at least 95% of the
/// tail must sit within 3 standard deviations of the new mean.
pub fn validate_baseline(snapshot: &BaselineSnapshot, tail: &[f64]) -> ValidationReport {
    if tail.is_empty() {
        return ValidationReport {
            valid: false,
            within_3sigma_percent: 0.0,
            mean_abs_error: 0.0,
        };
    }
    let within = tail
        .iter()
        .filter(|v| (**v - snapshot.mean).abs() < 3.0 * snapshot.std_dev)
        .count() as f64
        / tail.len() as f64;
    let mean_abs_error =
        tail.iter().map(|v| (v - snapshot.mean).abs()).sum::<f64>() / tail.len() as f64;

    ValidationReport {
        valid: within > 0.95,
        within_3sigma_percent: within * 100.0,
        mean_abs_error,
    }
}
