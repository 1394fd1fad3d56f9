//! Stage 2: enrichment. Pure function of a device record plus known-device
//! memory: classification, risk score, first-seen preservation.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::scan::Device;

/// High-risk ports that bump the risk score when open.
const HIGH_RISK_PORTS: [u16; 9] = [21, 23, 135, 139, 445, 1433, 3306, 5432, 3389];

/// Vendor keywords that classify a device as a router/gateway.
const ROUTER_VENDOR_KEYWORDS: [&str; 4] = ["cisco", "juniper", "arista", "router"];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeviceClass {
    Router,
    Server,
    Printer,
    IotDevice,
    Unknown,
}

impl DeviceClass {
    pub fn as_str(&self) -> &'static str {
        match self {
            DeviceClass::Router => "router",
            DeviceClass::Server => "server",
            DeviceClass::Printer => "printer",
            DeviceClass::IotDevice => "iot_device",
            DeviceClass::Unknown => "unknown",
        }
    }
}

impl std::fmt::Display for DeviceClass {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A device plus everything enrichment derived for it.
#[derive(Debug, Clone, Serialize)]
pub struct EnrichedDevice {
    #[serde(flatten)]
    pub device: Device,
    pub class: DeviceClass,
    pub risk_score: f64,
    pub first_seen: DateTime<Utc>,
    pub last_seen: DateTime<Utc>,
}

/// Classify a device; first matching rule wins.
pub fn classify(device: &Device) -> DeviceClass {
    let vendor = device
        .vendor
        .as_deref()
        .unwrap_or_default()
        .to_ascii_lowercase();
    let ports = &device.open_ports;

    if ROUTER_VENDOR_KEYWORDS.iter().any(|k| vendor.contains(k)) {
        return DeviceClass::Router;
    }
    if ports.contains(&22) && (ports.contains(&80) || ports.contains(&443)) {
        return DeviceClass::Server;
    }
    if ports.contains(&9100) || vendor.contains("printer") {
        return DeviceClass::Printer;
    }
    if ports.len() <= 1 {
        return DeviceClass::IotDevice;
    }
    DeviceClass::Unknown
}

/// Risk score in [0, 100]: open-port surface, high-risk services, unknown
/// identity, missing vendor info.
pub fn risk_score(device: &Device, known: bool) -> f64 {
    let mut score = device.open_ports.len() as f64 * 2.0;

    for port in &device.open_ports {
        if HIGH_RISK_PORTS.contains(port) {
            score += 10.0;
        }
    }

    if !known {
        score += 5.0;
    }

    if device.vendor.as_deref().unwrap_or_default().is_empty() {
        score += 3.0;
    }

    score.clamp(0.0, 100.0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeSet;

    fn device(vendor: Option<&str>, ports: &[u16]) -> Device {
        Device {
            ip: "192.168.1.10".to_string(),
            mac: None,
            hostname: None,
            vendor: vendor.map(str::to_string),
            open_ports: ports.iter().copied().collect::<BTreeSet<u16>>(),
            response_time_ms: 1.0,
            status: crate::scan::DeviceStatus::Online,
        }
    }

    #[test]
    fn test_classification_rule_order() {
        // Vendor keyword beats port-based rules.
        assert_eq!(
            classify(&device(Some("Cisco Systems"), &[22, 80])),
            DeviceClass::Router
        );
        assert_eq!(classify(&device(None, &[22, 443])), DeviceClass::Server);
        assert_eq!(classify(&device(None, &[9100, 515, 631])), DeviceClass::Printer);
        assert_eq!(
            classify(&device(Some("HP Printer Co"), &[])),
            DeviceClass::Printer
        );
        assert_eq!(classify(&device(None, &[1883])), DeviceClass::IotDevice);
        assert_eq!(classify(&device(None, &[])), DeviceClass::IotDevice);
        assert_eq!(classify(&device(None, &[25, 110, 143])), DeviceClass::Unknown);
    }

    #[test]
    fn test_risk_score_components() {
        // 2 ports * 2 + high-risk 3389 (+10) + unknown (+5) + no vendor (+3)
        let d = device(None, &[80, 3389]);
        assert_eq!(risk_score(&d, false), 4.0 + 10.0 + 5.0 + 3.0);

        // Known device with vendor: only the port surface counts.
        let d = device(Some("Netgear"), &[80]);
        assert_eq!(risk_score(&d, true), 2.0);
    }

    #[test]
    fn test_risk_score_is_clamped() {
        let ports: Vec<u16> = (1..=2000).collect();
        let d = device(None, &ports);
        assert_eq!(risk_score(&d, false), 100.0);
    }
}
