//! Known-device memory shared across scans.
//!
//! Owned by one `ScanPipeline` instance and accessed under its lock
//! (single-writer discipline). Absence of a device from a scan never
//! removes it here; disappearance is a signal, not a deletion.

use std::collections::{BTreeSet, HashMap};

use chrono::{DateTime, Utc};
use tracing::info;

use crate::storage::Store;

/// What the pipeline remembers about a device between scans.
#[derive(Debug, Clone)]
pub struct KnownDevice {
    pub first_seen: DateTime<Utc>,
    pub last_seen: DateTime<Utc>,
}

/// Remembered per-device state: identity, last open-port set, uptime ratio.
#[derive(Debug, Default)]
pub struct DeviceMemory {
    devices: HashMap<String, KnownDevice>,
    ports: HashMap<String, BTreeSet<u16>>,
    uptime: HashMap<String, f64>,
}

impl DeviceMemory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Hydrate from the durable store. Failures surface to the caller so
    /// the pipeline can route them through its circuit breaker.
    pub fn load(store: &Store, uptime_window_hours: i64) -> Result<Self, crate::storage::StoreError> {
        let mut memory = Self::new();
        for row in store.known_devices()? {
            if let Ok(Some(ratio)) = store.uptime_ratio(row.device_id, uptime_window_hours) {
                memory.uptime.insert(row.ip.clone(), ratio);
            }
            if let Ok(Some(ports)) = store.latest_ports(row.device_id) {
                memory.ports.insert(row.ip.clone(), ports);
            }
            memory.devices.insert(
                row.ip,
                KnownDevice {
                    first_seen: row.first_seen,
                    last_seen: row.last_seen,
                },
            );
        }
        info!(devices = memory.devices.len(), "loaded known-device memory");
        Ok(memory)
    }

    pub fn is_known(&self, ip: &str) -> bool {
        self.devices.contains_key(ip)
    }

    pub fn first_seen(&self, ip: &str) -> Option<DateTime<Utc>> {
        self.devices.get(ip).map(|d| d.first_seen)
    }

    /// Last open-port set observed while the device was online.
    pub fn previous_ports(&self, ip: &str) -> BTreeSet<u16> {
        self.ports.get(ip).cloned().unwrap_or_default()
    }

    /// Historical uptime ratio; 0.95 when no history exists yet.
    pub fn uptime_ratio(&self, ip: &str) -> f64 {
        self.uptime.get(ip).copied().unwrap_or(0.95)
    }

    pub fn set_uptime_ratio(&mut self, ip: &str, ratio: f64) {
        self.uptime.insert(ip.to_string(), ratio);
    }

    /// Remember a device seen in the current scan.
    pub fn remember_device(&mut self, ip: &str, first_seen: DateTime<Utc>, last_seen: DateTime<Utc>) {
        self.devices
            .entry(ip.to_string())
            .and_modify(|d| d.last_seen = last_seen)
            .or_insert(KnownDevice {
                first_seen,
                last_seen,
            });
    }

    /// Update the remembered port set. Only called while the device is
    /// online; offline scans keep the last known set.
    pub fn remember_ports(&mut self, ip: &str, ports: BTreeSet<u16>) {
        self.ports.insert(ip.to_string(), ports);
    }

    pub fn len(&self) -> usize {
        self.devices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.devices.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_remember_device_preserves_first_seen() {
        let mut memory = DeviceMemory::new();
        let t0 = Utc::now();
        let t1 = t0 + chrono::Duration::hours(1);

        memory.remember_device("10.0.0.5", t0, t0);
        memory.remember_device("10.0.0.5", t1, t1);

        assert_eq!(memory.first_seen("10.0.0.5"), Some(t0));
    }

    #[test]
    fn test_unknown_device_defaults() {
        let memory = DeviceMemory::new();
        assert!(!memory.is_known("10.0.0.9"));
        assert!(memory.previous_ports("10.0.0.9").is_empty());
        assert_eq!(memory.uptime_ratio("10.0.0.9"), 0.95);
    }
}
