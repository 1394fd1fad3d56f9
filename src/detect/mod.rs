//! Anomaly model -- typed anomaly kinds, severities, and dedup keys.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Severity levels for detected anomalies and the alerts raised from them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Low,
    Medium,
    High,
    Critical,
}

impl Severity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Severity::Low => "low",
            Severity::Medium => "medium",
            Severity::High => "high",
            Severity::Critical => "critical",
        }
    }
}

impl std::fmt::Display for Severity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Severity {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "low" => Ok(Severity::Low),
            "medium" => Ok(Severity::Medium),
            "high" => Ok(Severity::High),
            "critical" => Ok(Severity::Critical),
            other => Err(format!("unknown severity: {other}")),
        }
    }
}

/// The five anomaly kinds the analysis stage can emit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AnomalyKind {
    SuddenDowntime,
    NewPortsOpened,
    PortsClosed,
    LatencySpike,
    NewDevice,
}

impl AnomalyKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            AnomalyKind::SuddenDowntime => "sudden_downtime",
            AnomalyKind::NewPortsOpened => "new_ports_opened",
            AnomalyKind::PortsClosed => "ports_closed",
            AnomalyKind::LatencySpike => "latency_spike",
            AnomalyKind::NewDevice => "new_device",
        }
    }

    pub const ALL: [AnomalyKind; 5] = [
        AnomalyKind::SuddenDowntime,
        AnomalyKind::NewPortsOpened,
        AnomalyKind::PortsClosed,
        AnomalyKind::LatencySpike,
        AnomalyKind::NewDevice,
    ];
}

impl std::fmt::Display for AnomalyKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for AnomalyKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "sudden_downtime" => Ok(AnomalyKind::SuddenDowntime),
            "new_ports_opened" => Ok(AnomalyKind::NewPortsOpened),
            "ports_closed" => Ok(AnomalyKind::PortsClosed),
            "latency_spike" => Ok(AnomalyKind::LatencySpike),
            "new_device" => Ok(AnomalyKind::NewDevice),
            other => Err(format!("unknown anomaly kind: {other}")),
        }
    }
}

/// Type-specific anomaly payload. One variant per kind, so a match over
/// the payload is exhaustive by construction.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AnomalyDetail {
    SuddenDowntime {
        previous_uptime: f64,
    },
    NewPortsOpened {
        /// New ports that are not whitelisted.
        ports: Vec<u16>,
        /// Every newly opened port, whitelisted or not.
        all_new_ports: Vec<u16>,
    },
    PortsClosed {
        ports: Vec<u16>,
    },
    LatencySpike {
        current_ms: f64,
        baseline_ms: f64,
        increase_percent: f64,
    },
    NewDevice {
        mac: Option<String>,
        vendor: Option<String>,
    },
}

impl AnomalyDetail {
    pub fn kind(&self) -> AnomalyKind {
        match self {
            AnomalyDetail::SuddenDowntime { .. } => AnomalyKind::SuddenDowntime,
            AnomalyDetail::NewPortsOpened { .. } => AnomalyKind::NewPortsOpened,
            AnomalyDetail::PortsClosed { .. } => AnomalyKind::PortsClosed,
            AnomalyDetail::LatencySpike { .. } => AnomalyKind::LatencySpike,
            AnomalyDetail::NewDevice { .. } => AnomalyKind::NewDevice,
        }
    }
}

/// A detected anomaly. Never mutated after creation; a repeat occurrence
/// of the same (device, kind) pair is a new `Anomaly` value, collapsed by
/// the alert engine through its dedup key.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Anomaly {
    /// Device identity (IP address).
    pub device: String,
    /// Display name (hostname when known, IP otherwise).
    pub device_name: String,
    pub severity: Severity,
    /// Detection confidence in [0, 1].
    pub confidence: f64,
    pub detail: AnomalyDetail,
    pub detected_at: DateTime<Utc>,
}

impl Anomaly {
    pub fn kind(&self) -> AnomalyKind {
        self.detail.kind()
    }

    /// Deduplication key: (device identity, anomaly kind).
    pub fn dedup_key(&self) -> String {
        format!("{}:{}", self.device, self.kind())
    }

    /// Short one-line description used for persistence and logs.
    pub fn summary(&self) -> String {
        match &self.detail {
            AnomalyDetail::SuddenDowntime { previous_uptime } => format!(
                "{} went offline unexpectedly (uptime {:.1}%)",
                self.device_name,
                previous_uptime * 100.0
            ),
            AnomalyDetail::NewPortsOpened { ports, .. } => format!(
                "new ports opened on {}: {}",
                self.device_name,
                join_ports(ports)
            ),
            AnomalyDetail::PortsClosed { ports } => {
                format!("ports closed on {}: {}", self.device_name, join_ports(ports))
            }
            AnomalyDetail::LatencySpike {
                current_ms,
                baseline_ms,
                increase_percent,
            } => format!(
                "latency spike on {}: {current_ms:.2}ms vs baseline {baseline_ms:.2}ms (+{increase_percent:.1}%)",
                self.device_name
            ),
            AnomalyDetail::NewDevice { .. } => {
                format!("new device detected: {} ({})", self.device_name, self.device)
            }
        }
    }
}

pub(crate) fn join_ports(ports: &[u16]) -> String {
    ports
        .iter()
        .map(u16::to_string)
        .collect::<Vec<_>>()
        .join(", ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dedup_key_is_device_and_kind() {
        let anomaly = Anomaly {
            device: "192.168.1.50".to_string(),
            device_name: "printer-2".to_string(),
            severity: Severity::Low,
            confidence: 0.85,
            detail: AnomalyDetail::PortsClosed { ports: vec![631] },
            detected_at: Utc::now(),
        };
        assert_eq!(anomaly.dedup_key(), "192.168.1.50:ports_closed");
    }

    #[test]
    fn test_detail_round_trips_as_tagged_json() {
        let detail = AnomalyDetail::NewPortsOpened {
            ports: vec![3389],
            all_new_ports: vec![443, 3389],
        };
        let json = serde_json::to_value(&detail).unwrap();
        assert_eq!(json["type"], "new_ports_opened");

        let back: AnomalyDetail = serde_json::from_value(json).unwrap();
        assert_eq!(back.kind(), AnomalyKind::NewPortsOpened);
    }

    #[test]
    fn test_kind_strings_round_trip() {
        for kind in AnomalyKind::ALL {
            assert_eq!(kind.as_str().parse::<AnomalyKind>().unwrap(), kind);
        }
    }
}
