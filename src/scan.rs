//! Scan document model -- the structured object delivered by a collector.
//!
//! A `RawScan` is what arrives on the ingest boundary: every field the
//! collector might omit is optional. Validation (stage 1 of the pipeline)
//! turns it into a strict `Scan` or rejects the whole document.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

/// Scan document as received from a collector, before validation.
#[derive(Debug, Clone, Deserialize)]
pub struct RawScan {
    pub scan_id: Option<String>,
    pub subnet: Option<String>,
    pub devices: Option<Vec<RawDevice>>,
    #[serde(default)]
    pub metadata: ScanMetadata,
}

/// Device record as received from a collector.
#[derive(Debug, Clone, Deserialize)]
pub struct RawDevice {
    pub ip: Option<String>,
    #[serde(default)]
    pub mac: Option<String>,
    #[serde(default)]
    pub hostname: Option<String>,
    #[serde(default)]
    pub vendor: Option<String>,
    #[serde(default)]
    pub open_ports: Vec<u16>,
    #[serde(default)]
    pub response_time_ms: f64,
    #[serde(default)]
    pub status: DeviceStatus,
}

/// Free-form scan metadata reported by the collector.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ScanMetadata {
    #[serde(default)]
    pub duration_ms: Option<f64>,
    #[serde(default)]
    pub packet_loss_percent: Option<f64>,
    #[serde(default, flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

/// Reported reachability of a device within one scan.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum DeviceStatus {
    Online,
    #[default]
    Offline,
    Degraded,
}

impl DeviceStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            DeviceStatus::Online => "online",
            DeviceStatus::Offline => "offline",
            DeviceStatus::Degraded => "degraded",
        }
    }

    pub fn is_online(&self) -> bool {
        matches!(self, DeviceStatus::Online)
    }
}

impl std::fmt::Display for DeviceStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A validated scan. Immutable once constructed; consumed exactly once by
/// the pipeline.
#[derive(Debug, Clone, Serialize)]
pub struct Scan {
    pub scan_id: String,
    pub subnet: String,
    pub devices: Vec<Device>,
    pub metadata: ScanMetadata,
}

/// A validated device record. Identity is the IP address string
/// (plus optional hardware address).
#[derive(Debug, Clone, Serialize)]
pub struct Device {
    pub ip: String,
    pub mac: Option<String>,
    pub hostname: Option<String>,
    pub vendor: Option<String>,
    pub open_ports: BTreeSet<u16>,
    pub response_time_ms: f64,
    pub status: DeviceStatus,
}

impl Device {
    /// Display name: hostname when known, IP otherwise.
    pub fn display_name(&self) -> &str {
        self.hostname.as_deref().unwrap_or(&self.ip)
    }
}
