//! Stage 3: analysis. Compares enriched devices against remembered state
//! and per-device baselines; emits anomalies and scan summary statistics.

use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::detect::{Anomaly, AnomalyDetail, Severity};
use crate::pipeline::enrich::EnrichedDevice;
use crate::pipeline::memory::DeviceMemory;

/// Tunables for the analysis checks.
#[derive(Debug, Clone)]
pub struct AnalysisSettings {
    pub uptime_threshold: f64,
    pub latency_multiplier: f64,
    /// Newly opened ports in this set never raise an anomaly.
    pub port_whitelist: BTreeSet<u16>,
}

/// Outcome of the analysis stage for one scan.
#[derive(Debug, Clone, Serialize)]
pub struct ScanAnalysis {
    pub timestamp: DateTime<Utc>,
    pub anomalies_detected: usize,
    pub anomalies: Vec<Anomaly>,
    pub summary_stats: ScanSummary,
}

#[derive(Debug, Clone, Serialize)]
pub struct ScanSummary {
    pub total_devices: usize,
    pub online_count: usize,
    pub offline_count: usize,
    pub availability_percent: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub latency: Option<LatencySummary>,
}

#[derive(Debug, Clone, Serialize)]
pub struct LatencySummary {
    pub avg_response_time_ms: f64,
    pub min_response_time_ms: f64,
    pub max_response_time_ms: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub std_dev_response_time_ms: Option<f64>,
}

/// Run the four per-device checks and compute summary statistics.
///
/// `known_before_scan` must reflect the memory state before this scan's
/// devices were remembered; `latency_baseline` returns the baseline mean
/// latency for a device, when one exists.
pub fn analyze_devices(
    devices: &[EnrichedDevice],
    memory: &mut DeviceMemory,
    known_before_scan: &dyn Fn(&str) -> bool,
    latency_baseline: &dyn Fn(&str) -> Option<f64>,
    settings: &AnalysisSettings,
    now: DateTime<Utc>,
) -> ScanAnalysis {
    let mut anomalies = Vec::new();

    for enriched in devices {
        let device = &enriched.device;
        let ip = device.ip.as_str();
        let known = known_before_scan(ip);
        let online = device.status.is_online();

        // CHECK 1: sudden downtime of a historically reliable device.
        if known && device.status == crate::scan::DeviceStatus::Offline {
            let uptime = memory.uptime_ratio(ip);
            if uptime > settings.uptime_threshold {
                anomalies.push(Anomaly {
                    device: ip.to_string(),
                    device_name: device.display_name().to_string(),
                    severity: Severity::High,
                    confidence: 0.89,
                    detail: AnomalyDetail::SuddenDowntime {
                        previous_uptime: uptime,
                    },
                    detected_at: now,
                });
            }
        }

        // CHECK 2: port-set changes, evaluated only while online.
        if online {
            let previous = memory.previous_ports(ip);
            let current = &device.open_ports;

            let new_ports: Vec<u16> = current.difference(&previous).copied().collect();
            let closed_ports: Vec<u16> = previous.difference(current).copied().collect();

            if !new_ports.is_empty() {
                let suspicious: Vec<u16> = new_ports
                    .iter()
                    .copied()
                    .filter(|p| !settings.port_whitelist.contains(p))
                    .collect();
                if !suspicious.is_empty() {
                    anomalies.push(Anomaly {
                        device: ip.to_string(),
                        device_name: device.display_name().to_string(),
                        severity: Severity::Medium,
                        confidence: 0.95,
                        detail: AnomalyDetail::NewPortsOpened {
                            ports: suspicious,
                            all_new_ports: new_ports,
                        },
                        detected_at: now,
                    });
                }
            }

            if !closed_ports.is_empty() {
                anomalies.push(Anomaly {
                    device: ip.to_string(),
                    device_name: device.display_name().to_string(),
                    severity: Severity::Low,
                    confidence: 0.85,
                    detail: AnomalyDetail::PortsClosed {
                        ports: closed_ports,
                    },
                    detected_at: now,
                });
            }
        }

        // CHECK 3: latency spike against the baseline mean.
        if online {
            let current_ms = device.response_time_ms;
            if let Some(baseline_ms) = latency_baseline(ip) {
                if baseline_ms > 0.0 && current_ms > baseline_ms * settings.latency_multiplier {
                    let increase = (current_ms - baseline_ms) / baseline_ms * 100.0;
                    anomalies.push(Anomaly {
                        device: ip.to_string(),
                        device_name: device.display_name().to_string(),
                        severity: Severity::Low,
                        confidence: 0.75,
                        detail: AnomalyDetail::LatencySpike {
                            current_ms,
                            baseline_ms,
                            increase_percent: round2(increase),
                        },
                        detected_at: now,
                    });
                }
            }
        }

        // CHECK 4: new device, raised regardless of the other checks.
        if !known && online {
            anomalies.push(Anomaly {
                device: ip.to_string(),
                device_name: device.display_name().to_string(),
                severity: Severity::Medium,
                confidence: 1.0,
                detail: AnomalyDetail::NewDevice {
                    mac: device.mac.clone(),
                    vendor: device.vendor.clone(),
                },
                detected_at: now,
            });
        }

        // Port memory only follows online observations.
        if online {
            memory.remember_ports(ip, device.open_ports.clone());
        }
    }

    let summary_stats = summarize(devices);

    ScanAnalysis {
        timestamp: now,
        anomalies_detected: anomalies.len(),
        anomalies,
        summary_stats,
    }
}

fn summarize(devices: &[EnrichedDevice]) -> ScanSummary {
    let total = devices.len();
    let online: Vec<&EnrichedDevice> = devices
        .iter()
        .filter(|d| d.device.status.is_online())
        .collect();
    let offline_count = devices
        .iter()
        .filter(|d| d.device.status == crate::scan::DeviceStatus::Offline)
        .count();

    let availability = if total > 0 {
        online.len() as f64 / total as f64 * 100.0
    } else {
        0.0
    };

    let latencies: Vec<f64> = online
        .iter()
        .map(|d| d.device.response_time_ms)
        .filter(|&ms| ms > 0.0)
        .collect();

    let latency = if latencies.is_empty() {
        None
    } else {
        let n = latencies.len() as f64;
        let mean = latencies.iter().sum::<f64>() / n;
        let min = latencies.iter().copied().fold(f64::INFINITY, f64::min);
        let max = latencies.iter().copied().fold(f64::NEG_INFINITY, f64::max);
        let std_dev = if latencies.len() > 1 {
            let var = latencies.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / (n - 1.0);
            Some(round2(var.sqrt()))
        } else {
            None
        };
        Some(LatencySummary {
            avg_response_time_ms: round2(mean),
            min_response_time_ms: round2(min),
            max_response_time_ms: round2(max),
            std_dev_response_time_ms: std_dev,
        })
    };

    ScanSummary {
        total_devices: total,
        online_count: online.len(),
        offline_count,
        availability_percent: round2(availability),
        latency,
    }
}

pub(crate) fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detect::AnomalyKind;
    use crate::pipeline::enrich::{classify, risk_score, DeviceClass};
    use crate::scan::{Device, DeviceStatus};

    fn settings() -> AnalysisSettings {
        AnalysisSettings {
            uptime_threshold: 0.95,
            latency_multiplier: 2.5,
            port_whitelist: [80, 443, 22].into_iter().collect(),
        }
    }

    fn enriched(ip: &str, ports: &[u16], status: DeviceStatus, rtt: f64) -> EnrichedDevice {
        let device = Device {
            ip: ip.to_string(),
            mac: None,
            hostname: None,
            vendor: Some("TestVendor".to_string()),
            open_ports: ports.iter().copied().collect(),
            response_time_ms: rtt,
            status,
        };
        let class = classify(&device);
        let score = risk_score(&device, true);
        let now = Utc::now();
        EnrichedDevice {
            device,
            class,
            risk_score: score,
            first_seen: now,
            last_seen: now,
        }
    }

    #[test]
    fn test_new_ports_whitelist_filtering() {
        let mut memory = DeviceMemory::new();
        memory.remember_ports("192.168.1.50", [22, 80].into_iter().collect());
        let now = Utc::now();
        memory.remember_device("192.168.1.50", now, now);

        let devices = vec![enriched(
            "192.168.1.50",
            &[22, 80, 3389],
            DeviceStatus::Online,
            5.0,
        )];
        let analysis = analyze_devices(
            &devices,
            &mut memory,
            &|ip| ip == "192.168.1.50",
            &|_| None,
            &settings(),
            now,
        );

        assert_eq!(analysis.anomalies.len(), 1);
        let anomaly = &analysis.anomalies[0];
        assert_eq!(anomaly.kind(), AnomalyKind::NewPortsOpened);
        assert_eq!(anomaly.severity, Severity::Medium);
        assert_eq!(anomaly.confidence, 0.95);
        match &anomaly.detail {
            AnomalyDetail::NewPortsOpened { ports, all_new_ports } => {
                assert_eq!(ports, &vec![3389]);
                assert_eq!(all_new_ports, &vec![3389]);
            }
            other => panic!("unexpected detail: {other:?}"),
        }
    }

    #[test]
    fn test_sudden_downtime_requires_reliable_history() {
        let mut memory = DeviceMemory::new();
        let now = Utc::now();
        memory.remember_device("10.0.0.1", now, now);
        memory.set_uptime_ratio("10.0.0.1", 0.98);

        let devices = vec![enriched("10.0.0.1", &[], DeviceStatus::Offline, 0.0)];
        let analysis = analyze_devices(
            &devices,
            &mut memory,
            &|_| true,
            &|_| None,
            &settings(),
            now,
        );

        assert_eq!(analysis.anomalies.len(), 1);
        let anomaly = &analysis.anomalies[0];
        assert_eq!(anomaly.kind(), AnomalyKind::SuddenDowntime);
        assert_eq!(anomaly.severity, Severity::High);
        assert_eq!(anomaly.confidence, 0.89);

        // Flaky device (uptime at the default 0.95) stays quiet.
        let mut memory = DeviceMemory::new();
        memory.remember_device("10.0.0.2", now, now);
        let devices = vec![enriched("10.0.0.2", &[], DeviceStatus::Offline, 0.0)];
        let analysis = analyze_devices(
            &devices,
            &mut memory,
            &|_| true,
            &|_| None,
            &settings(),
            now,
        );
        assert!(analysis.anomalies.is_empty());
    }

    #[test]
    fn test_latency_spike_against_baseline() {
        let mut memory = DeviceMemory::new();
        let now = Utc::now();
        memory.remember_device("10.0.0.3", now, now);

        let devices = vec![enriched("10.0.0.3", &[], DeviceStatus::Online, 30.0)];
        let analysis = analyze_devices(
            &devices,
            &mut memory,
            &|_| true,
            &|_| Some(10.0),
            &settings(),
            now,
        );

        let spike = analysis
            .anomalies
            .iter()
            .find(|a| a.kind() == AnomalyKind::LatencySpike)
            .unwrap();
        match &spike.detail {
            AnomalyDetail::LatencySpike {
                increase_percent, ..
            } => assert_eq!(*increase_percent, 200.0),
            other => panic!("unexpected detail: {other:?}"),
        }

        // 2x the baseline is under the 2.5 multiplier: no anomaly.
        let devices = vec![enriched("10.0.0.3", &[], DeviceStatus::Online, 20.0)];
        let analysis = analyze_devices(
            &devices,
            &mut memory,
            &|_| true,
            &|_| Some(10.0),
            &settings(),
            now,
        );
        assert!(analysis.anomalies.is_empty());
    }

    #[test]
    fn test_offline_scan_keeps_port_memory() {
        let mut memory = DeviceMemory::new();
        let now = Utc::now();
        memory.remember_device("10.0.0.4", now, now);
        memory.remember_ports("10.0.0.4", [22, 80].into_iter().collect());

        let devices = vec![enriched("10.0.0.4", &[], DeviceStatus::Offline, 0.0)];
        let _ = analyze_devices(
            &devices,
            &mut memory,
            &|_| true,
            &|_| None,
            &settings(),
            now,
        );

        assert_eq!(
            memory.previous_ports("10.0.0.4").into_iter().collect::<Vec<_>>(),
            vec![22, 80]
        );
    }

    #[test]
    fn test_summary_stats() {
        let devices = vec![
            enriched("10.0.0.5", &[], DeviceStatus::Online, 10.0),
            enriched("10.0.0.6", &[], DeviceStatus::Online, 20.0),
            enriched("10.0.0.7", &[], DeviceStatus::Offline, 0.0),
        ];
        let mut memory = DeviceMemory::new();
        let analysis = analyze_devices(
            &devices,
            &mut memory,
            &|_| true,
            &|_| None,
            &settings(),
            Utc::now(),
        );

        let stats = &analysis.summary_stats;
        assert_eq!(stats.total_devices, 3);
        assert_eq!(stats.online_count, 2);
        assert_eq!(stats.offline_count, 1);
        assert_eq!(stats.availability_percent, 66.67);

        let latency = stats.latency.as_ref().unwrap();
        assert_eq!(latency.avg_response_time_ms, 15.0);
        assert_eq!(latency.min_response_time_ms, 10.0);
        assert_eq!(latency.max_response_time_ms, 20.0);
        // Sample std dev of [10, 20] is ~7.07.
        assert_eq!(latency.std_dev_response_time_ms, Some(7.07));
    }

    #[test]
    fn test_confidence_bounds_and_class() {
        let mut memory = DeviceMemory::new();
        let devices = vec![enriched("10.0.0.8", &[22, 443], DeviceStatus::Online, 1.0)];
        assert_eq!(devices[0].class, DeviceClass::Server);

        let analysis = analyze_devices(
            &devices,
            &mut memory,
            &|_| false,
            &|_| None,
            &settings(),
            Utc::now(),
        );

        for anomaly in &analysis.anomalies {
            assert!((0.0..=1.0).contains(&anomaly.confidence));
        }
        // Unknown online device raises new_device with confidence 1.0.
        let new_device = analysis
            .anomalies
            .iter()
            .find(|a| a.kind() == AnomalyKind::NewDevice)
            .unwrap();
        assert_eq!(new_device.confidence, 1.0);
    }
}
