//! SQLite storage layer -- schema, pooled connections, typed queries.
//!
//! Every operation is an idempotent upsert or append keyed by natural
//! identity, safe to retry. Callers treat any `StoreError` as a signal to
//! continue in degraded, memory-only mode; nothing in here panics.

pub mod schema;

use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use r2d2::Pool as R2D2Pool;
use r2d2_sqlite::SqliteConnectionManager;
use rusqlite::{params, OptionalExtension};
use thiserror::Error;

use crate::alert::Alert;
use crate::baseline::model::{BaselineSnapshot, MetricKind, MetricSample, RecalibrationRecord};
use crate::detect::Anomaly;
use crate::pipeline::enrich::EnrichedDevice;
use crate::scan::DeviceStatus;

/// Connection pool type.
pub type Pool = R2D2Pool<SqliteConnectionManager>;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("connection pool error: {0}")]
    Pool(#[from] r2d2::Error),
    #[error("database error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("serialization error: {0}")]
    Serde(#[from] serde_json::Error),
}

/// Handle over the pooled SQLite database.
#[derive(Clone)]
pub struct Store {
    pool: Pool,
}

impl Store {
    /// Open (or create) the database at `path` and run migrations.
    pub fn open(path: &str) -> Result<Self, StoreError> {
        if let Some(parent) = std::path::Path::new(path).parent() {
            let _ = std::fs::create_dir_all(parent);
        }
        let manager = SqliteConnectionManager::file(path).with_init(|c| {
            c.execute_batch(
                "PRAGMA journal_mode = WAL;
                 PRAGMA synchronous = NORMAL;
                 PRAGMA temp_store = MEMORY;
                 PRAGMA foreign_keys = ON;
                 PRAGMA busy_timeout = 5000;",
            )
        });

        let pool = R2D2Pool::new(manager)?;
        let conn = pool.get()?;
        schema::migrate(&conn)?;
        drop(conn);

        Ok(Self { pool })
    }

    pub fn pool(&self) -> &Pool {
        &self.pool
    }

    // -----------------------------------------------------------------------
    // Devices
    // -----------------------------------------------------------------------

    /// Upsert a device keyed by IP address; returns its row id.
    /// `first_seen` is only written on insert.
    pub fn upsert_device(&self, device: &EnrichedDevice) -> Result<i64, StoreError> {
        let conn = self.pool.get()?;
        conn.execute(
            "INSERT INTO devices
                (ip_address, mac_address, vendor, hostname, device_type, risk_score,
                 first_seen, last_seen)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
             ON CONFLICT (ip_address) DO UPDATE SET
                mac_address = excluded.mac_address,
                vendor = excluded.vendor,
                hostname = excluded.hostname,
                device_type = excluded.device_type,
                risk_score = excluded.risk_score,
                last_seen = excluded.last_seen",
            params![
                device.device.ip,
                device.device.mac,
                device.device.vendor,
                device.device.hostname,
                device.class.as_str(),
                device.risk_score,
                device.first_seen.to_rfc3339(),
                device.last_seen.to_rfc3339(),
            ],
        )?;

        let id = conn.query_row(
            "SELECT device_id FROM devices WHERE ip_address = ?1",
            params![device.device.ip],
            |row| row.get(0),
        )?;
        Ok(id)
    }

    pub fn device_id_by_ip(&self, ip: &str) -> Result<Option<i64>, StoreError> {
        let conn = self.pool.get()?;
        let id = conn
            .query_row(
                "SELECT device_id FROM devices WHERE ip_address = ?1",
                params![ip],
                |row| row.get(0),
            )
            .optional()?;
        Ok(id)
    }

    pub fn device_exists(&self, ip: &str) -> Result<bool, StoreError> {
        Ok(self.device_id_by_ip(ip)?.is_some())
    }

    pub fn device_by_ip(&self, ip: &str) -> Result<Option<KnownDeviceRow>, StoreError> {
        let conn = self.pool.get()?;
        let row = conn
            .query_row(
                "SELECT device_id, ip_address, mac_address, vendor, hostname,
                        device_type, risk_score, first_seen, last_seen
                 FROM devices WHERE ip_address = ?1",
                params![ip],
                |row| {
                    Ok(KnownDeviceRow {
                        device_id: row.get(0)?,
                        ip: row.get(1)?,
                        mac: row.get(2)?,
                        vendor: row.get(3)?,
                        hostname: row.get(4)?,
                        device_type: row.get(5)?,
                        risk_score: row.get(6)?,
                        first_seen: parse_ts(&row.get::<_, String>(7)?),
                        last_seen: parse_ts(&row.get::<_, String>(8)?),
                    })
                },
            )
            .optional()?;
        Ok(row)
    }

    /// All known devices, for hydrating the pipeline's device memory.
    pub fn known_devices(&self) -> Result<Vec<KnownDeviceRow>, StoreError> {
        let conn = self.pool.get()?;
        let mut stmt = conn.prepare(
            "SELECT device_id, ip_address, mac_address, vendor, hostname,
                    device_type, risk_score, first_seen, last_seen
             FROM devices",
        )?;
        let rows = stmt.query_map([], |row| {
            Ok(KnownDeviceRow {
                device_id: row.get(0)?,
                ip: row.get(1)?,
                mac: row.get(2)?,
                vendor: row.get(3)?,
                hostname: row.get(4)?,
                device_type: row.get(5)?,
                risk_score: row.get(6)?,
                first_seen: parse_ts(&row.get::<_, String>(7)?),
                last_seen: parse_ts(&row.get::<_, String>(8)?),
            })
        })?;

        let mut devices = Vec::new();
        for r in rows {
            devices.push(r?);
        }
        Ok(devices)
    }

    /// Append one status observation; idempotent per (device, scan).
    pub fn append_status_history(
        &self,
        device_id: i64,
        scan_id: &str,
        status: DeviceStatus,
        response_time_ms: Option<f64>,
    ) -> Result<(), StoreError> {
        let conn = self.pool.get()?;
        conn.execute(
            "INSERT OR IGNORE INTO device_status_history
                (device_id, scan_id, status, response_time_ms)
             VALUES (?1, ?2, ?3, ?4)",
            params![device_id, scan_id, status.as_str(), response_time_ms],
        )?;
        Ok(())
    }

    /// Snapshot the open-port set observed for a device in one scan.
    pub fn insert_port_snapshot(
        &self,
        device_id: i64,
        scan_id: &str,
        ports: &BTreeSet<u16>,
    ) -> Result<(), StoreError> {
        let conn = self.pool.get()?;
        let ports_json = serde_json::to_string(&ports.iter().collect::<Vec<_>>())?;
        conn.execute(
            "INSERT OR IGNORE INTO port_snapshots (device_id, scan_id, ports_json)
             VALUES (?1, ?2, ?3)",
            params![device_id, scan_id, ports_json],
        )?;
        Ok(())
    }

    /// Most recent open-port set recorded for a device.
    pub fn latest_ports(&self, device_id: i64) -> Result<Option<BTreeSet<u16>>, StoreError> {
        let conn = self.pool.get()?;
        let ports_json: Option<String> = conn
            .query_row(
                "SELECT ports_json FROM port_snapshots
                 WHERE device_id = ?1
                 ORDER BY created_at DESC, id DESC LIMIT 1",
                params![device_id],
                |row| row.get(0),
            )
            .optional()?;
        match ports_json {
            Some(json) => Ok(Some(serde_json::from_str(&json)?)),
            None => Ok(None),
        }
    }

    /// Fraction of status observations in the window where the device was
    /// online. `None` when there is no history at all.
    pub fn uptime_ratio(&self, device_id: i64, window_hours: i64) -> Result<Option<f64>, StoreError> {
        let conn = self.pool.get()?;
        let window = format!("-{window_hours} hours");
        let (total, online): (i64, i64) = conn.query_row(
            "SELECT COUNT(*), SUM(CASE WHEN status = 'online' THEN 1 ELSE 0 END)
             FROM device_status_history
             WHERE device_id = ?1 AND created_at > datetime('now', ?2)",
            params![device_id, window],
            |row| Ok((row.get(0)?, row.get::<_, Option<i64>>(1)?.unwrap_or(0))),
        )?;
        if total == 0 {
            return Ok(None);
        }
        Ok(Some(online as f64 / total as f64))
    }

    /// Recent latency samples for one device, oldest first.
    pub fn recent_latency_samples(
        &self,
        ip: &str,
        window_hours: i64,
    ) -> Result<Vec<MetricSample>, StoreError> {
        let conn = self.pool.get()?;
        let window = format!("-{window_hours} hours");
        let mut stmt = conn.prepare(
            "SELECT h.response_time_ms, h.created_at
             FROM device_status_history h
             JOIN devices d ON d.device_id = h.device_id
             WHERE d.ip_address = ?1
               AND h.response_time_ms IS NOT NULL
               AND h.response_time_ms > 0
               AND h.created_at > datetime('now', ?2)
             ORDER BY h.created_at ASC",
        )?;
        let rows = stmt.query_map(params![ip, window], |row| {
            Ok((row.get::<_, f64>(0)?, row.get::<_, String>(1)?))
        })?;

        let mut samples = Vec::new();
        for r in rows {
            let (value, ts) = r?;
            samples.push(MetricSample {
                value,
                timestamp: parse_ts(&ts),
            });
        }
        Ok(samples)
    }

    // -----------------------------------------------------------------------
    // Scans and anomalies
    // -----------------------------------------------------------------------

    pub fn upsert_scan_summary(
        &self,
        scan_id: &str,
        subnet: &str,
        summary_json: &str,
    ) -> Result<(), StoreError> {
        let conn = self.pool.get()?;
        conn.execute(
            "INSERT INTO scans (scan_id, subnet, summary_json)
             VALUES (?1, ?2, ?3)
             ON CONFLICT (scan_id) DO UPDATE SET
                subnet = excluded.subnet,
                summary_json = excluded.summary_json",
            params![scan_id, subnet, summary_json],
        )?;
        Ok(())
    }

    /// Upsert an anomaly keyed by (scan, device, type); returns its row id.
    pub fn upsert_anomaly(
        &self,
        scan_id: &str,
        device_id: Option<i64>,
        anomaly: &Anomaly,
        description: &str,
    ) -> Result<i64, StoreError> {
        let conn = self.pool.get()?;
        let payload = serde_json::to_string(anomaly)?;
        conn.execute(
            "INSERT INTO anomalies
                (scan_id, device_ip, device_id, anomaly_type, severity, confidence,
                 description, payload_json, detected_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
             ON CONFLICT (scan_id, device_ip, anomaly_type) DO UPDATE SET
                severity = excluded.severity,
                confidence = excluded.confidence,
                description = excluded.description,
                payload_json = excluded.payload_json",
            params![
                scan_id,
                anomaly.device,
                device_id,
                anomaly.kind().as_str(),
                anomaly.severity.as_str(),
                anomaly.confidence,
                description,
                payload,
                anomaly.detected_at.to_rfc3339(),
            ],
        )?;

        let id = conn.query_row(
            "SELECT anomaly_id FROM anomalies
             WHERE scan_id = ?1 AND device_ip = ?2 AND anomaly_type = ?3",
            params![scan_id, anomaly.device, anomaly.kind().as_str()],
            |row| row.get(0),
        )?;
        Ok(id)
    }

    /// Most recent anomaly row for a (device, type) pair.
    pub fn latest_anomaly_id(
        &self,
        device_ip: &str,
        kind: crate::detect::AnomalyKind,
    ) -> Result<Option<i64>, StoreError> {
        let conn = self.pool.get()?;
        let id = conn
            .query_row(
                "SELECT anomaly_id FROM anomalies
                 WHERE device_ip = ?1 AND anomaly_type = ?2
                 ORDER BY detected_at DESC, anomaly_id DESC LIMIT 1",
                params![device_ip, kind.as_str()],
                |row| row.get(0),
            )
            .optional()?;
        Ok(id)
    }

    /// Recent anomalies that have neither an alert row nor a tracking
    /// record -- candidates for the alerter drain loop.
    pub fn pending_anomalies(&self, limit: usize) -> Result<Vec<Anomaly>, StoreError> {
        let conn = self.pool.get()?;
        let mut stmt = conn.prepare(
            "SELECT a.payload_json
             FROM anomalies a
             WHERE datetime(a.detected_at) > datetime('now', '-1 hour')
               AND NOT EXISTS (
                   SELECT 1 FROM alerts x WHERE x.anomaly_id = a.anomaly_id
               )
               AND NOT EXISTS (
                   SELECT 1 FROM alert_tracking t
                   WHERE t.alert_key = a.device_ip || ':' || a.anomaly_type
               )
             ORDER BY a.detected_at DESC
             LIMIT ?1",
        )?;
        let rows = stmt.query_map(params![limit as i64], |row| row.get::<_, String>(0))?;

        let mut anomalies = Vec::new();
        for r in rows {
            anomalies.push(serde_json::from_str(&r?)?);
        }
        Ok(anomalies)
    }

    pub fn recent_anomalies(&self, limit: usize) -> Result<Vec<AnomalyRow>, StoreError> {
        let conn = self.pool.get()?;
        let mut stmt = conn.prepare(
            "SELECT device_ip, anomaly_type, severity, confidence, description, detected_at
             FROM anomalies ORDER BY detected_at DESC LIMIT ?1",
        )?;
        let rows = stmt.query_map(params![limit as i64], |row| {
            Ok(AnomalyRow {
                device_ip: row.get(0)?,
                anomaly_type: row.get(1)?,
                severity: row.get(2)?,
                confidence: row.get(3)?,
                description: row.get(4)?,
                detected_at: row.get(5)?,
            })
        })?;

        let mut out = Vec::new();
        for r in rows {
            out.push(r?);
        }
        Ok(out)
    }

    pub fn latest_scan_summary(&self) -> Result<Option<ScanRow>, StoreError> {
        let conn = self.pool.get()?;
        let row = conn
            .query_row(
                "SELECT scan_id, subnet, summary_json, processed_at
                 FROM scans ORDER BY processed_at DESC LIMIT 1",
                [],
                |row| {
                    Ok(ScanRow {
                        scan_id: row.get(0)?,
                        subnet: row.get(1)?,
                        summary_json: row.get(2)?,
                        processed_at: row.get(3)?,
                    })
                },
            )
            .optional()?;
        Ok(row)
    }

    // -----------------------------------------------------------------------
    // Alerts
    // -----------------------------------------------------------------------

    /// Persist an alert row before dispatch so delivery outcome has a home
    /// even when the send fails.
    pub fn insert_alert(&self, alert: &Alert) -> Result<(), StoreError> {
        let conn = self.pool.get()?;
        conn.execute(
            "INSERT OR REPLACE INTO alerts
                (alert_id, anomaly_id, device_id, alert_type, severity, channel,
                 message, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            params![
                alert.id.to_string(),
                alert.anomaly_id,
                alert.device_id,
                alert.kind.as_str(),
                alert.severity.as_str(),
                alert.channel,
                alert.message,
                alert.created_at.to_rfc3339(),
            ],
        )?;
        Ok(())
    }

    pub fn update_alert_delivery(
        &self,
        alert_id: &str,
        delivered: bool,
        error: Option<&str>,
    ) -> Result<(), StoreError> {
        let conn = self.pool.get()?;
        conn.execute(
            "UPDATE alerts SET delivered = ?2, delivery_error = ?3 WHERE alert_id = ?1",
            params![alert_id, delivered as i64, error],
        )?;
        Ok(())
    }

    /// Record acknowledgment; last writer wins. Returns false when the
    /// alert id is unknown.
    pub fn acknowledge_alert(&self, alert_id: &str, actor: &str) -> Result<bool, StoreError> {
        let conn = self.pool.get()?;
        let changed = conn.execute(
            "UPDATE alerts SET acknowledged_at = ?2, acknowledged_by = ?3
             WHERE alert_id = ?1",
            params![alert_id, Utc::now().to_rfc3339(), actor],
        )?;
        Ok(changed > 0)
    }

    pub fn recent_alerts(&self, limit: usize) -> Result<Vec<AlertRow>, StoreError> {
        let conn = self.pool.get()?;
        let mut stmt = conn.prepare(
            "SELECT alert_id, alert_type, severity, channel, message, delivered,
                    delivery_error, acknowledged_by, created_at
             FROM alerts ORDER BY created_at DESC LIMIT ?1",
        )?;
        let rows = stmt.query_map(params![limit as i64], |row| {
            Ok(AlertRow {
                alert_id: row.get(0)?,
                alert_type: row.get(1)?,
                severity: row.get(2)?,
                channel: row.get(3)?,
                message: row.get(4)?,
                delivered: row.get::<_, Option<i64>>(5)?.map(|v| v != 0),
                delivery_error: row.get(6)?,
                acknowledged_by: row.get(7)?,
                created_at: row.get(8)?,
            })
        })?;

        let mut out = Vec::new();
        for r in rows {
            out.push(r?);
        }
        Ok(out)
    }

    // -----------------------------------------------------------------------
    // Alert tracking
    // -----------------------------------------------------------------------

    /// Create or refresh the tracking record after a dispatch: atomic
    /// increment-or-insert keyed by the dedup key.
    pub fn upsert_alert_tracking(
        &self,
        alert_key: &str,
        throttle_until: Option<DateTime<Utc>>,
        now: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        let conn = self.pool.get()?;
        conn.execute(
            "INSERT INTO alert_tracking
                (alert_key, first_occurrence, last_occurrence, occurrence_count,
                 last_alert_sent, throttle_until, resolved)
             VALUES (?1, ?2, ?2, 1, ?2, ?3, 0)
             ON CONFLICT (alert_key) DO UPDATE SET
                last_occurrence = excluded.last_occurrence,
                occurrence_count = alert_tracking.occurrence_count + 1,
                last_alert_sent = excluded.last_alert_sent,
                throttle_until = excluded.throttle_until,
                resolved = 0",
            params![
                alert_key,
                now.to_rfc3339(),
                throttle_until.map(|t| t.to_rfc3339()),
            ],
        )?;
        Ok(())
    }

    /// Bump the occurrence counter of a suppressed repeat.
    pub fn increment_tracking_occurrence(
        &self,
        alert_key: &str,
        now: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        let conn = self.pool.get()?;
        conn.execute(
            "UPDATE alert_tracking
             SET occurrence_count = occurrence_count + 1, last_occurrence = ?2
             WHERE alert_key = ?1",
            params![alert_key, now.to_rfc3339()],
        )?;
        Ok(())
    }

    pub fn unresolved_tracking(&self, alert_key: &str) -> Result<Option<TrackingRow>, StoreError> {
        let conn = self.pool.get()?;
        let row = conn
            .query_row(
                &format!("{TRACKING_SELECT} WHERE alert_key = ?1 AND resolved = 0"),
                params![alert_key],
                tracking_row,
            )
            .optional()?;
        Ok(row)
    }

    pub fn tracking_for(&self, alert_key: &str) -> Result<Option<TrackingRow>, StoreError> {
        let conn = self.pool.get()?;
        let row = conn
            .query_row(
                &format!("{TRACKING_SELECT} WHERE alert_key = ?1"),
                params![alert_key],
                tracking_row,
            )
            .optional()?;
        Ok(row)
    }

    /// Every unresolved tracking record, for the escalation sweep.
    pub fn all_unresolved_tracking(&self) -> Result<Vec<TrackingRow>, StoreError> {
        let conn = self.pool.get()?;
        let mut stmt = conn.prepare(&format!("{TRACKING_SELECT} WHERE resolved = 0"))?;
        let rows = stmt.query_map([], tracking_row)?;

        let mut out = Vec::new();
        for r in rows {
            out.push(r?);
        }
        Ok(out)
    }

    /// Mark an incident resolved and clear its suppression window.
    pub fn resolve_tracking(&self, alert_key: &str) -> Result<bool, StoreError> {
        let conn = self.pool.get()?;
        let changed = conn.execute(
            "UPDATE alert_tracking SET resolved = 1, throttle_until = NULL
             WHERE alert_key = ?1",
            params![alert_key],
        )?;
        Ok(changed > 0)
    }

    pub fn set_escalation_level(&self, alert_key: &str, level: i64) -> Result<(), StoreError> {
        let conn = self.pool.get()?;
        conn.execute(
            "UPDATE alert_tracking SET escalation_level = ?2 WHERE alert_key = ?1",
            params![alert_key, level],
        )?;
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Baselines
    // -----------------------------------------------------------------------

    pub fn load_baseline(
        &self,
        entity: &str,
        metric: MetricKind,
    ) -> Result<Option<BaselineSnapshot>, StoreError> {
        let conn = self.pool.get()?;
        let json: Option<String> = conn
            .query_row(
                "SELECT baseline_json FROM device_baselines
                 WHERE device_ip = ?1 AND metric_type = ?2",
                params![entity, metric.as_str()],
                |row| row.get(0),
            )
            .optional()?;
        match json {
            Some(json) => Ok(Some(serde_json::from_str(&json)?)),
            None => Ok(None),
        }
    }

    pub fn save_baseline(
        &self,
        entity: &str,
        metric: MetricKind,
        snapshot: &BaselineSnapshot,
        state: &str,
    ) -> Result<(), StoreError> {
        let conn = self.pool.get()?;
        let json = serde_json::to_string(snapshot)?;
        conn.execute(
            "INSERT INTO device_baselines (device_ip, metric_type, baseline_json, state, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5)
             ON CONFLICT (device_ip, metric_type) DO UPDATE SET
                baseline_json = excluded.baseline_json,
                state = excluded.state,
                updated_at = excluded.updated_at",
            params![entity, metric.as_str(), json, state, Utc::now().to_rfc3339()],
        )?;
        Ok(())
    }

    pub fn log_recalibration(&self, record: &RecalibrationRecord) -> Result<(), StoreError> {
        let conn = self.pool.get()?;
        conn.execute(
            "INSERT INTO baseline_recalibrations
                (device_ip, metric_type, method, samples_used, previous_mean,
                 new_mean, new_std, valid)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            params![
                record.entity,
                record.metric.as_str(),
                record.method,
                record.samples_used as i64,
                record.previous_mean,
                record.new_mean,
                record.new_std,
                record.valid as i64,
            ],
        )?;
        Ok(())
    }

    pub fn baseline_states(&self) -> Result<Vec<BaselineStateRow>, StoreError> {
        let conn = self.pool.get()?;
        let mut stmt = conn.prepare(
            "SELECT device_ip, metric_type, state, updated_at FROM device_baselines",
        )?;
        let rows = stmt.query_map([], |row| {
            Ok(BaselineStateRow {
                device_ip: row.get(0)?,
                metric_type: row.get(1)?,
                state: row.get(2)?,
                updated_at: row.get(3)?,
            })
        })?;

        let mut out = Vec::new();
        for r in rows {
            out.push(r?);
        }
        Ok(out)
    }
}

const TRACKING_SELECT: &str = "SELECT alert_key, first_occurrence, last_occurrence, \
     occurrence_count, last_alert_sent, throttle_until, escalation_level, resolved \
     FROM alert_tracking";

fn tracking_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<TrackingRow> {
    Ok(TrackingRow {
        alert_key: row.get(0)?,
        first_occurrence: parse_ts(&row.get::<_, String>(1)?),
        last_occurrence: parse_ts(&row.get::<_, String>(2)?),
        occurrence_count: row.get(3)?,
        last_alert_sent: row.get::<_, Option<String>>(4)?.map(|s| parse_ts(&s)),
        throttle_until: row.get::<_, Option<String>>(5)?.map(|s| parse_ts(&s)),
        escalation_level: row.get(6)?,
        resolved: row.get::<_, i64>(7)? != 0,
    })
}

/// Timestamps are written as RFC 3339, but SQLite column defaults produce
/// `datetime('now')` format; accept both.
fn parse_ts(s: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .or_else(|_| {
            chrono::NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S").map(|n| n.and_utc())
        })
        .unwrap_or_default()
}

/// One tracked incident (dedup key plus suppression state).
#[derive(Debug, Clone)]
pub struct TrackingRow {
    pub alert_key: String,
    pub first_occurrence: DateTime<Utc>,
    pub last_occurrence: DateTime<Utc>,
    pub occurrence_count: i64,
    pub last_alert_sent: Option<DateTime<Utc>>,
    pub throttle_until: Option<DateTime<Utc>>,
    pub escalation_level: i64,
    pub resolved: bool,
}

#[derive(Debug, Clone, serde::Serialize)]
pub struct KnownDeviceRow {
    pub device_id: i64,
    pub ip: String,
    pub mac: Option<String>,
    pub vendor: Option<String>,
    pub hostname: Option<String>,
    pub device_type: String,
    pub risk_score: f64,
    pub first_seen: DateTime<Utc>,
    pub last_seen: DateTime<Utc>,
}

#[derive(Debug, Clone, serde::Serialize)]
pub struct AnomalyRow {
    pub device_ip: String,
    pub anomaly_type: String,
    pub severity: String,
    pub confidence: f64,
    pub description: String,
    pub detected_at: String,
}

#[derive(Debug, Clone, serde::Serialize)]
pub struct AlertRow {
    pub alert_id: String,
    pub alert_type: String,
    pub severity: String,
    pub channel: String,
    pub message: String,
    pub delivered: Option<bool>,
    pub delivery_error: Option<String>,
    pub acknowledged_by: Option<String>,
    pub created_at: String,
}

#[derive(Debug, Clone, serde::Serialize)]
pub struct ScanRow {
    pub scan_id: String,
    pub subnet: String,
    pub summary_json: String,
    pub processed_at: String,
}

#[derive(Debug, Clone, serde::Serialize)]
pub struct BaselineStateRow {
    pub device_ip: String,
    pub metric_type: String,
    pub state: String,
    pub updated_at: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn scratch_store() -> (tempfile::TempDir, Store) {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("test.db");
        let store = Store::open(path.to_str().unwrap()).unwrap();
        (dir, store)
    }

    #[test]
    fn test_tracking_increment_or_insert() {
        let (_dir, store) = scratch_store();
        let now = Utc::now();

        store
            .upsert_alert_tracking("10.0.0.1:new_device", None, now)
            .unwrap();
        store
            .upsert_alert_tracking("10.0.0.1:new_device", Some(now + Duration::minutes(5)), now)
            .unwrap();

        let row = store.tracking_for("10.0.0.1:new_device").unwrap().unwrap();
        assert_eq!(row.occurrence_count, 2);
        assert!(row.throttle_until.is_some());
        assert!(!row.resolved);
    }

    #[test]
    fn test_resolve_clears_suppression() {
        let (_dir, store) = scratch_store();
        let now = Utc::now();
        store
            .upsert_alert_tracking("10.0.0.2:sudden_downtime", Some(now + Duration::hours(1)), now)
            .unwrap();

        assert!(store.resolve_tracking("10.0.0.2:sudden_downtime").unwrap());
        assert!(store
            .unresolved_tracking("10.0.0.2:sudden_downtime")
            .unwrap()
            .is_none());

        let row = store.tracking_for("10.0.0.2:sudden_downtime").unwrap().unwrap();
        assert!(row.resolved);
        assert!(row.throttle_until.is_none());
    }

    #[test]
    fn test_resolve_unknown_key_returns_false() {
        let (_dir, store) = scratch_store();
        assert!(!store.resolve_tracking("nope:new_device").unwrap());
    }
}
