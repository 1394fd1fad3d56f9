//! Database schema and migrations.

use rusqlite::Connection;

use super::StoreError;

/// Run all pending migrations.
pub fn migrate(conn: &Connection) -> Result<(), StoreError> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS schema_version (
            version INTEGER PRIMARY KEY,
            applied_at TEXT NOT NULL DEFAULT (datetime('now'))
        );

        CREATE TABLE IF NOT EXISTS devices (
            device_id INTEGER PRIMARY KEY,
            ip_address TEXT NOT NULL UNIQUE,
            mac_address TEXT,
            vendor TEXT,
            hostname TEXT,
            device_type TEXT NOT NULL DEFAULT 'unknown',
            risk_score REAL NOT NULL DEFAULT 0,
            first_seen TEXT NOT NULL,
            last_seen TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS device_status_history (
            id INTEGER PRIMARY KEY,
            device_id INTEGER NOT NULL,
            scan_id TEXT NOT NULL,
            status TEXT NOT NULL,
            response_time_ms REAL,
            created_at TEXT NOT NULL DEFAULT (datetime('now')),
            UNIQUE (device_id, scan_id),
            FOREIGN KEY (device_id) REFERENCES devices(device_id)
        );

        CREATE TABLE IF NOT EXISTS port_snapshots (
            id INTEGER PRIMARY KEY,
            device_id INTEGER NOT NULL,
            scan_id TEXT NOT NULL,
            ports_json TEXT NOT NULL,
            created_at TEXT NOT NULL DEFAULT (datetime('now')),
            UNIQUE (device_id, scan_id),
            FOREIGN KEY (device_id) REFERENCES devices(device_id)
        );

        CREATE TABLE IF NOT EXISTS anomalies (
            anomaly_id INTEGER PRIMARY KEY,
            scan_id TEXT NOT NULL,
            device_ip TEXT NOT NULL,
            device_id INTEGER,
            anomaly_type TEXT NOT NULL,
            severity TEXT NOT NULL,
            confidence REAL NOT NULL,
            description TEXT NOT NULL,
            payload_json TEXT NOT NULL,
            detected_at TEXT NOT NULL,
            UNIQUE (scan_id, device_ip, anomaly_type)
        );

        CREATE TABLE IF NOT EXISTS alerts (
            alert_id TEXT PRIMARY KEY,
            anomaly_id INTEGER,
            device_id INTEGER,
            alert_type TEXT NOT NULL,
            severity TEXT NOT NULL,
            channel TEXT NOT NULL,
            message TEXT NOT NULL,
            delivered INTEGER,
            delivery_error TEXT,
            acknowledged_at TEXT,
            acknowledged_by TEXT,
            created_at TEXT NOT NULL DEFAULT (datetime('now'))
        );

        CREATE TABLE IF NOT EXISTS alert_tracking (
            alert_key TEXT PRIMARY KEY,
            first_occurrence TEXT NOT NULL,
            last_occurrence TEXT NOT NULL,
            occurrence_count INTEGER NOT NULL DEFAULT 1,
            last_alert_sent TEXT,
            throttle_until TEXT,
            escalation_level INTEGER NOT NULL DEFAULT 0,
            resolved INTEGER NOT NULL DEFAULT 0
        );

        CREATE TABLE IF NOT EXISTS device_baselines (
            id INTEGER PRIMARY KEY,
            device_ip TEXT NOT NULL,
            metric_type TEXT NOT NULL,
            baseline_json TEXT NOT NULL,
            state TEXT NOT NULL DEFAULT 'stable',
            updated_at TEXT NOT NULL DEFAULT (datetime('now')),
            UNIQUE (device_ip, metric_type)
        );

        CREATE TABLE IF NOT EXISTS baseline_recalibrations (
            id INTEGER PRIMARY KEY,
            device_ip TEXT NOT NULL,
            metric_type TEXT NOT NULL,
            method TEXT NOT NULL,
            samples_used INTEGER NOT NULL,
            previous_mean REAL,
            new_mean REAL NOT NULL,
            new_std REAL NOT NULL,
            valid INTEGER NOT NULL,
            created_at TEXT NOT NULL DEFAULT (datetime('now'))
        );

        CREATE TABLE IF NOT EXISTS scans (
            scan_id TEXT PRIMARY KEY,
            subnet TEXT NOT NULL,
            summary_json TEXT NOT NULL,
            processed_at TEXT NOT NULL DEFAULT (datetime('now'))
        );

        CREATE INDEX IF NOT EXISTS idx_status_history_device
            ON device_status_history(device_id, created_at);
        CREATE INDEX IF NOT EXISTS idx_anomalies_detected ON anomalies(detected_at);
        CREATE INDEX IF NOT EXISTS idx_alerts_created ON alerts(created_at);
        CREATE INDEX IF NOT EXISTS idx_tracking_resolved ON alert_tracking(resolved);
        CREATE INDEX IF NOT EXISTS idx_recalibrations_created
            ON baseline_recalibrations(created_at);",
    )?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_migrate_creates_tables() {
        let conn = Connection::open_in_memory().unwrap();
        migrate(&conn).unwrap();

        let count: i64 = conn
            .query_row("SELECT COUNT(*) FROM devices", [], |row| row.get(0))
            .unwrap();
        assert_eq!(count, 0);

        let count: i64 = conn
            .query_row("SELECT COUNT(*) FROM alert_tracking", [], |row| row.get(0))
            .unwrap();
        assert_eq!(count, 0);
    }

    #[test]
    fn test_migrate_is_idempotent() {
        let conn = Connection::open_in_memory().unwrap();
        migrate(&conn).unwrap();
        migrate(&conn).unwrap(); // Should not error
    }
}
