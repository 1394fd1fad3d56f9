//! Alert engine: deduplication, throttling, channel dispatch, delivery
//! accounting, acknowledgment, and incident resolution.
//!
//! `process_anomalies` never fails: per-anomaly problems surface only as
//! stored delivery status and logs. The dedup/throttle fast path runs
//! synchronously; channel dispatch runs on a bounded worker pool so one
//! hung send cannot stall subsequent anomalies.

pub mod channels;
pub mod escalate;
pub mod rules;

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::{DateTime, Utc};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::config::AlertingConfig;
use crate::detect::{Anomaly, AnomalyDetail, AnomalyKind, Severity};
use crate::storage::Store;

use self::channels::AlertChannel;
use self::rules::AlertRule;

/// One alert: a rendered message bound to a single channel. Created once
/// per (anomaly, channel) pair at dispatch time, mutated once to record
/// delivery and at most once to record acknowledgment.
#[derive(Debug, Clone)]
pub struct Alert {
    pub id: Uuid,
    pub anomaly_id: Option<i64>,
    pub device_id: Option<i64>,
    pub kind: AnomalyKind,
    pub severity: Severity,
    pub channel: String,
    pub message: String,
    pub created_at: DateTime<Utc>,
}

#[cfg(test)]
impl Alert {
    pub fn test_alert(channel: &str) -> Self {
        Self {
            id: Uuid::new_v4(),
            anomaly_id: None,
            device_id: None,
            kind: AnomalyKind::NewDevice,
            severity: Severity::Medium,
            channel: channel.to_string(),
            message: "test alert".to_string(),
            created_at: Utc::now(),
        }
    }
}

#[derive(Debug, Clone, Default)]
struct MemoryTracking {
    resolved: bool,
    throttle_until: Option<DateTime<Utc>>,
    occurrences: u64,
}

pub struct AlertEngine {
    enabled: bool,
    rules: HashMap<AnomalyKind, AlertRule>,
    channels: HashMap<String, Arc<dyn AlertChannel>>,
    store: Option<Store>,
    tracking: Mutex<HashMap<String, MemoryTracking>>,
    dispatch_slots: tokio::sync::Semaphore,
    send_timeout: Duration,
    degraded: AtomicBool,
}

impl AlertEngine {
    pub fn new(
        cfg: &AlertingConfig,
        channels: HashMap<String, Arc<dyn AlertChannel>>,
        store: Option<Store>,
    ) -> Self {
        Self {
            enabled: cfg.enabled,
            rules: rules::resolve_rules(cfg),
            channels,
            store,
            tracking: Mutex::new(HashMap::new()),
            dispatch_slots: tokio::sync::Semaphore::new(cfg.max_concurrent_dispatches.max(1)),
            send_timeout: Duration::from_secs(cfg.send_timeout_secs),
            degraded: AtomicBool::new(false),
        }
    }

    pub fn rule_for(&self, kind: AnomalyKind) -> Option<&AlertRule> {
        self.rules.get(&kind)
    }

    pub fn is_degraded(&self) -> bool {
        self.degraded.load(Ordering::Relaxed)
    }

    /// Process a batch of anomalies. Suppression decisions run in order;
    /// dispatch for the surviving anomalies proceeds concurrently on the
    /// bounded worker pool and this call waits for all of them.
    pub async fn process_anomalies(&self, anomalies: &[Anomaly]) {
        if !self.enabled {
            debug!("alerting is disabled");
            return;
        }

        let mut dispatches = Vec::new();
        for anomaly in anomalies {
            let kind = anomaly.kind();
            let Some(rule) = self.rules.get(&kind) else {
                debug!(kind = %kind, "no alert rule for anomaly type");
                continue;
            };
            let key = anomaly.dedup_key();

            // Deduplication: an unresolved tracked incident collapses the
            // repeat into its occurrence counter.
            if self.is_duplicate(&key) {
                debug!(key = %key, "duplicate alert suppressed");
                continue;
            }

            // Throttling.
            if self.is_throttled(&key, rule) {
                debug!(key = %key, "alert throttled");
                continue;
            }

            // Claim the key in memory before dispatch so a repeat later in
            // this batch is already suppressed.
            let throttle_until = rule
                .suppression_minutes()
                .map(|mins| Utc::now() + chrono::Duration::minutes(mins));
            {
                let mut tracking = self.tracking.lock().unwrap_or_else(|e| e.into_inner());
                let entry = tracking.entry(key.clone()).or_default();
                entry.resolved = false;
                entry.throttle_until = throttle_until;
                entry.occurrences += 1;
            }

            dispatches.push((anomaly.clone(), rule.channels.clone(), throttle_until));
        }

        let tasks = dispatches
            .into_iter()
            .map(|(anomaly, channel_names, throttle_until)| async move {
                // Worker-pool bound on concurrent dispatches.
                let _permit = self.dispatch_slots.acquire().await;
                self.dispatch_anomaly(&anomaly, &channel_names, throttle_until)
                    .await;
            });
        futures::future::join_all(tasks).await;
    }

    /// Dispatch one anomaly to each of its channels in order, then update
    /// the durable tracking record.
    async fn dispatch_anomaly(
        &self,
        anomaly: &Anomaly,
        channel_names: &[String],
        throttle_until: Option<DateTime<Utc>>,
    ) {
        let key = anomaly.dedup_key();
        let device_id = self
            .store
            .as_ref()
            .and_then(|store| store.device_id_by_ip(&anomaly.device).ok())
            .flatten();
        let anomaly_id = self
            .store
            .as_ref()
            .and_then(|store| store.latest_anomaly_id(&anomaly.device, anomaly.kind()).ok())
            .flatten();
        let message = render_message(anomaly);

        for channel_name in channel_names {
            let alert = Alert {
                id: Uuid::new_v4(),
                anomaly_id,
                device_id,
                kind: anomaly.kind(),
                severity: anomaly.severity,
                channel: channel_name.clone(),
                message: message.clone(),
                created_at: Utc::now(),
            };
            self.dispatch_to_channel(alert).await;
        }

        if let Some(store) = &self.store {
            if let Err(e) = store.upsert_alert_tracking(&key, throttle_until, Utc::now()) {
                self.mark_degraded("upsert_alert_tracking", &e);
            }
        }
    }

    /// Persist the alert row, invoke the channel with a bounded wait, and
    /// record the delivery outcome. Failure never propagates.
    pub(crate) async fn dispatch_to_channel(&self, alert: Alert) {
        let Some(channel) = self.channels.get(&alert.channel) else {
            warn!(channel = %alert.channel, "channel not available");
            return;
        };

        // Row first, so the outcome has an identity even if delivery fails.
        if let Some(store) = &self.store {
            if let Err(e) = store.insert_alert(&alert) {
                self.mark_degraded("insert_alert", &e);
            }
        }

        let (delivered, error) =
            match tokio::time::timeout(self.send_timeout, channel.send(&alert)).await {
                Ok(true) => (true, None),
                Ok(false) => (false, Some("channel send failed")),
                Err(_) => (false, Some("channel send timed out")),
            };

        if delivered {
            info!(alert_id = %alert.id, channel = %alert.channel, kind = %alert.kind, "alert sent");
        } else {
            warn!(
                alert_id = %alert.id,
                channel = %alert.channel,
                error = error.unwrap_or("unknown"),
                "alert delivery failed"
            );
        }

        if let Some(store) = &self.store {
            if let Err(e) = store.update_alert_delivery(&alert.id.to_string(), delivered, error) {
                self.mark_degraded("update_alert_delivery", &e);
            }
        }
    }

    /// Record acknowledgment against an alert. Idempotent; last writer
    /// wins. Does not touch incident tracking.
    pub fn acknowledge(&self, alert_id: &str, actor: &str) -> bool {
        match &self.store {
            Some(store) => match store.acknowledge_alert(alert_id, actor) {
                Ok(found) => {
                    if found {
                        info!(alert_id, actor, "alert acknowledged");
                    }
                    found
                }
                Err(e) => {
                    self.mark_degraded("acknowledge_alert", &e);
                    false
                }
            },
            None => false,
        }
    }

    /// Resolve a tracked incident, clearing its suppression so the next
    /// occurrence alerts again.
    pub fn resolve(&self, alert_key: &str) -> bool {
        let in_memory = {
            let mut tracking = self.tracking.lock().unwrap_or_else(|e| e.into_inner());
            match tracking.get_mut(alert_key) {
                Some(entry) => {
                    entry.resolved = true;
                    entry.throttle_until = None;
                    true
                }
                None => false,
            }
        };

        let in_store = match &self.store {
            Some(store) => match store.resolve_tracking(alert_key) {
                Ok(found) => found,
                Err(e) => {
                    self.mark_degraded("resolve_tracking", &e);
                    false
                }
            },
            None => false,
        };

        if in_memory || in_store {
            info!(key = %alert_key, "incident resolved");
        }
        in_memory || in_store
    }

    /// Duplicate check: memory first, then the durable store, which is
    /// authoritative across restarts. A hit increments the occurrence
    /// counter.
    fn is_duplicate(&self, key: &str) -> bool {
        {
            let mut tracking = self.tracking.lock().unwrap_or_else(|e| e.into_inner());
            if let Some(entry) = tracking.get_mut(key) {
                if !entry.resolved {
                    entry.occurrences += 1;
                    if let Some(store) = &self.store {
                        if let Err(e) = store.increment_tracking_occurrence(key, Utc::now()) {
                            self.mark_degraded("increment_tracking_occurrence", &e);
                        }
                    }
                    return true;
                }
            }
        }

        if let Some(store) = &self.store {
            match store.unresolved_tracking(key) {
                Ok(Some(row)) => {
                    if let Err(e) = store.increment_tracking_occurrence(key, Utc::now()) {
                        self.mark_degraded("increment_tracking_occurrence", &e);
                    }
                    let mut tracking = self.tracking.lock().unwrap_or_else(|e| e.into_inner());
                    tracking.insert(
                        key.to_string(),
                        MemoryTracking {
                            resolved: false,
                            throttle_until: row.throttle_until,
                            occurrences: row.occurrence_count as u64 + 1,
                        },
                    );
                    return true;
                }
                Ok(None) => {}
                Err(e) => self.mark_degraded("unresolved_tracking", &e),
            }
        }
        false
    }

    fn is_throttled(&self, key: &str, rule: &AlertRule) -> bool {
        if rule.suppression_minutes().is_none() {
            return false;
        }
        let now = Utc::now();

        {
            let tracking = self.tracking.lock().unwrap_or_else(|e| e.into_inner());
            if let Some(entry) = tracking.get(key) {
                if let Some(until) = entry.throttle_until {
                    if now < until {
                        return true;
                    }
                }
            }
        }

        if let Some(store) = &self.store {
            match store.tracking_for(key) {
                Ok(Some(row)) => {
                    if let Some(until) = row.throttle_until {
                        return now < until;
                    }
                }
                Ok(None) => {}
                Err(e) => self.mark_degraded("tracking_for", &e),
            }
        }
        false
    }

    fn mark_degraded(&self, operation: &str, error: &crate::storage::StoreError) {
        if !self.degraded.swap(true, Ordering::Relaxed) {
            warn!(operation, error = %error, "alert store unavailable, continuing in memory-only mode");
        }
    }
}

/// Human-readable message for one anomaly, with the detection timestamp
/// appended.
fn render_message(anomaly: &Anomaly) -> String {
    let name = &anomaly.device_name;
    let ip = &anomaly.device;

    let body = match &anomaly.detail {
        AnomalyDetail::SuddenDowntime { previous_uptime } => format!(
            "Device {name} ({ip}) has gone offline unexpectedly. Previous uptime: {:.1}%",
            previous_uptime * 100.0
        ),
        AnomalyDetail::NewPortsOpened { ports, .. } => format!(
            "New ports opened on {name} ({ip}): {}",
            crate::detect::join_ports(ports)
        ),
        AnomalyDetail::LatencySpike {
            current_ms,
            baseline_ms,
            increase_percent,
        } => format!(
            "Latency spike detected on {name} ({ip}). \
             Current: {current_ms:.2}ms, Baseline: {baseline_ms:.2}ms (+{increase_percent:.1}%)"
        ),
        AnomalyDetail::NewDevice { mac, vendor } => format!(
            "New device detected: {name} ({ip}). MAC: {}, Vendor: {}",
            mac.as_deref().unwrap_or("unknown"),
            vendor.as_deref().unwrap_or("unknown")
        ),
        AnomalyDetail::PortsClosed { ports } => format!(
            "Ports closed on {name} ({ip}): {}",
            crate::detect::join_ports(ports)
        ),
    };

    format!("{body}\nDetected at: {}", anomaly.detected_at.to_rfc3339())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    /// Recording channel for tests: counts sends, optionally fails.
    pub(crate) struct RecordingChannel {
        name: String,
        pub sent: Arc<AtomicUsize>,
        succeed: bool,
    }

    impl RecordingChannel {
        pub(crate) fn new(name: &str, succeed: bool) -> (Arc<Self>, Arc<AtomicUsize>) {
            let sent = Arc::new(AtomicUsize::new(0));
            let channel = Arc::new(Self {
                name: name.to_string(),
                sent: Arc::clone(&sent),
                succeed,
            });
            (channel, sent)
        }
    }

    #[async_trait::async_trait]
    impl AlertChannel for RecordingChannel {
        fn name(&self) -> &str {
            &self.name
        }

        async fn send(&self, _alert: &Alert) -> bool {
            self.sent.fetch_add(1, Ordering::SeqCst);
            self.succeed
        }
    }

    fn anomaly(ip: &str) -> Anomaly {
        Anomaly {
            device: ip.to_string(),
            device_name: ip.to_string(),
            severity: Severity::Medium,
            confidence: 1.0,
            detail: AnomalyDetail::NewDevice {
                mac: None,
                vendor: None,
            },
            detected_at: Utc::now(),
        }
    }

    fn engine_with_channels(
        channel_list: &[(&str, Arc<RecordingChannel>)],
    ) -> Arc<AlertEngine> {
        let cfg = AlertingConfig::default();
        let mut channels: HashMap<String, Arc<dyn AlertChannel>> = HashMap::new();
        for (name, channel) in channel_list {
            let channel: Arc<dyn AlertChannel> = channel.clone();
            channels.insert(name.to_string(), channel);
        }
        Arc::new(AlertEngine::new(&cfg, channels, None))
    }

    #[tokio::test]
    async fn test_duplicate_within_throttle_dispatches_once() {
        let (dashboard, dash_sent) = RecordingChannel::new("dashboard", true);
        let (email, email_sent) = RecordingChannel::new("email", true);
        let engine = engine_with_channels(&[("dashboard", dashboard), ("email", email)]);

        // new_device targets dashboard + email with a 60 minute throttle.
        engine.process_anomalies(&[anomaly("10.1.1.1")]).await;
        engine.process_anomalies(&[anomaly("10.1.1.1")]).await;

        assert_eq!(dash_sent.load(Ordering::SeqCst), 1);
        assert_eq!(email_sent.load(Ordering::SeqCst), 1);

        let tracking = engine.tracking.lock().unwrap();
        let entry = tracking.get("10.1.1.1:new_device").unwrap();
        assert_eq!(entry.occurrences, 2);
    }

    #[tokio::test]
    async fn test_duplicate_in_same_batch_suppressed() {
        let (dashboard, sent) = RecordingChannel::new("dashboard", true);
        let (email, _) = RecordingChannel::new("email", true);
        let engine = engine_with_channels(&[("dashboard", dashboard), ("email", email)]);

        engine
            .process_anomalies(&[anomaly("10.1.1.2"), anomaly("10.1.1.2")])
            .await;
        assert_eq!(sent.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_resolve_clears_suppression() {
        let (dashboard, sent) = RecordingChannel::new("dashboard", true);
        let (email, _) = RecordingChannel::new("email", true);
        let engine = engine_with_channels(&[("dashboard", dashboard), ("email", email)]);

        engine.process_anomalies(&[anomaly("10.1.1.3")]).await;
        assert!(engine.resolve("10.1.1.3:new_device"));
        engine.process_anomalies(&[anomaly("10.1.1.3")]).await;

        assert_eq!(sent.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_failed_channel_does_not_block_next() {
        let (dashboard, dash_sent) = RecordingChannel::new("dashboard", true);
        let (email, email_sent) = RecordingChannel::new("email", false);
        let engine = engine_with_channels(&[("dashboard", dashboard), ("email", email)]);

        // Channel order for new_device is dashboard then email; a failing
        // email channel still lets dashboard deliver, and vice versa.
        engine.process_anomalies(&[anomaly("10.1.1.4")]).await;
        assert_eq!(email_sent.load(Ordering::SeqCst), 1);
        assert_eq!(dash_sent.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_disabled_engine_is_noop() {
        let (dashboard, sent) = RecordingChannel::new("dashboard", true);
        let mut cfg = AlertingConfig::default();
        cfg.enabled = false;
        let mut channels: HashMap<String, Arc<dyn AlertChannel>> = HashMap::new();
        channels.insert("dashboard".to_string(), dashboard);
        let engine = Arc::new(AlertEngine::new(&cfg, channels, None));

        engine.process_anomalies(&[anomaly("10.1.1.5")]).await;
        assert_eq!(sent.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_message_rendering() {
        let mut anomaly = anomaly("192.168.1.9");
        anomaly.device_name = "camera-3".to_string();
        let message = render_message(&anomaly);
        assert!(message.contains("New device detected: camera-3 (192.168.1.9)"));
        assert!(message.contains("Detected at: "));

        let spike = Anomaly {
            device: "192.168.1.9".to_string(),
            device_name: "camera-3".to_string(),
            severity: Severity::Low,
            confidence: 0.75,
            detail: AnomalyDetail::LatencySpike {
                current_ms: 42.0,
                baseline_ms: 10.0,
                increase_percent: 320.0,
            },
            detected_at: Utc::now(),
        };
        let message = render_message(&spike);
        assert!(message.contains("Current: 42.00ms"));
        assert!(message.contains("+320.0%"));
    }
}
