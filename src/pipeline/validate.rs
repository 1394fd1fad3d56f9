//! Stage 1: validation. A scan either passes whole or is rejected whole;
//! nothing downstream sees a partially valid document.

use std::collections::BTreeSet;

use thiserror::Error;

use crate::scan::{Device, RawScan, Scan};

#[derive(Debug, Error, PartialEq, Eq)]
pub enum InvalidScanError {
    #[error("scan is missing scan_id")]
    MissingScanId,
    #[error("scan is missing subnet")]
    MissingSubnet,
    #[error("scan is missing devices array")]
    MissingDevices,
    #[error("device at index {index} is missing an IP address")]
    MissingDeviceIp { index: usize },
    #[error("invalid IP address: {ip}")]
    InvalidIp { ip: String },
}

/// Validate a raw scan document into a strict `Scan`.
pub fn validate_scan(raw: RawScan) -> Result<Scan, InvalidScanError> {
    let scan_id = match raw.scan_id {
        Some(id) if !id.is_empty() => id,
        _ => return Err(InvalidScanError::MissingScanId),
    };
    let subnet = match raw.subnet {
        Some(s) if !s.is_empty() => s,
        _ => return Err(InvalidScanError::MissingSubnet),
    };
    let raw_devices = raw.devices.ok_or(InvalidScanError::MissingDevices)?;

    let mut devices = Vec::with_capacity(raw_devices.len());
    for (index, device) in raw_devices.into_iter().enumerate() {
        let ip = device
            .ip
            .ok_or(InvalidScanError::MissingDeviceIp { index })?;
        if !is_valid_ipv4(&ip) {
            return Err(InvalidScanError::InvalidIp { ip });
        }
        devices.push(Device {
            ip,
            mac: device.mac,
            hostname: device.hostname,
            vendor: device.vendor,
            open_ports: device.open_ports.into_iter().collect::<BTreeSet<u16>>(),
            response_time_ms: device.response_time_ms,
            status: device.status,
        });
    }

    Ok(Scan {
        scan_id,
        subnet,
        devices,
        metadata: raw.metadata,
    })
}

/// Dotted-quad check: four numeric octets, each 0..=255.
fn is_valid_ipv4(ip: &str) -> bool {
    let parts: Vec<&str> = ip.split('.').collect();
    if parts.len() != 4 {
        return false;
    }
    parts.iter().all(|part| {
        !part.is_empty()
            && part.chars().all(|c| c.is_ascii_digit())
            && part.parse::<u32>().map(|v| v <= 255).unwrap_or(false)
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scan::RawDevice;

    fn raw_device(ip: &str) -> RawDevice {
        serde_json::from_value(serde_json::json!({ "ip": ip })).unwrap()
    }

    fn raw_scan(devices: Vec<RawDevice>) -> RawScan {
        RawScan {
            scan_id: Some("scan-1".to_string()),
            subnet: Some("192.168.1.0/24".to_string()),
            devices: Some(devices),
            metadata: Default::default(),
        }
    }

    #[test]
    fn test_missing_fields_rejected() {
        let mut raw = raw_scan(vec![]);
        raw.scan_id = None;
        assert_eq!(validate_scan(raw).unwrap_err(), InvalidScanError::MissingScanId);

        let mut raw = raw_scan(vec![]);
        raw.subnet = None;
        assert_eq!(validate_scan(raw).unwrap_err(), InvalidScanError::MissingSubnet);

        let mut raw = raw_scan(vec![]);
        raw.devices = None;
        assert_eq!(validate_scan(raw).unwrap_err(), InvalidScanError::MissingDevices);
    }

    #[test]
    fn test_bad_ip_rejects_whole_scan() {
        let raw = raw_scan(vec![raw_device("192.168.1.1"), raw_device("192.168.1.300")]);
        assert_eq!(
            validate_scan(raw).unwrap_err(),
            InvalidScanError::InvalidIp {
                ip: "192.168.1.300".to_string()
            }
        );

        let raw = raw_scan(vec![raw_device("192.168.1")]);
        assert!(validate_scan(raw).is_err());

        let raw = raw_scan(vec![raw_device("a.b.c.d")]);
        assert!(validate_scan(raw).is_err());
    }

    #[test]
    fn test_valid_scan_passes_and_dedupes_ports() {
        let mut device = raw_device("10.1.2.3");
        device.open_ports = vec![443, 80, 443];
        let scan = validate_scan(raw_scan(vec![device])).unwrap();

        assert_eq!(scan.scan_id, "scan-1");
        assert_eq!(scan.devices.len(), 1);
        assert_eq!(
            scan.devices[0].open_ports.iter().copied().collect::<Vec<_>>(),
            vec![80, 443]
        );
    }

    #[test]
    fn test_empty_device_list_is_valid() {
        assert!(validate_scan(raw_scan(vec![])).is_ok());
    }
}
