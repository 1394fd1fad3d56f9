//! Alert rule table: per anomaly type, the target channels, throttling,
//! escalation ladder, and whitelist parameters. Built-in defaults are
//! overridable from configuration.

use std::collections::{BTreeSet, HashMap};

use tracing::warn;

use crate::config::{AlertingConfig, RuleConfig};
use crate::detect::{AnomalyKind, Severity};

#[derive(Debug, Clone)]
pub struct EscalationStep {
    pub after_minutes: i64,
    pub add_channel: Option<String>,
    pub raise_severity: Option<Severity>,
}

#[derive(Debug, Clone)]
pub struct AlertRule {
    pub channels: Vec<String>,
    pub throttle_minutes: Option<i64>,
    /// Declared severity, used when an escalation step raises it.
    pub severity: Option<Severity>,
    pub whitelist_ports: Vec<u16>,
    /// Aggregation window: repeats inside it collapse into the tracked
    /// incident instead of dispatching again.
    pub aggregate_minutes: Option<i64>,
    pub require_acknowledgment: bool,
    pub escalation: Vec<EscalationStep>,
}

impl AlertRule {
    fn new(channels: &[&str]) -> Self {
        Self {
            channels: channels.iter().map(|c| c.to_string()).collect(),
            throttle_minutes: None,
            severity: None,
            whitelist_ports: Vec::new(),
            aggregate_minutes: None,
            require_acknowledgment: false,
            escalation: Vec::new(),
        }
    }

    /// Suppression window applied after a dispatch: the throttle, or the
    /// aggregation window when no throttle is declared.
    pub fn suppression_minutes(&self) -> Option<i64> {
        self.throttle_minutes.or(self.aggregate_minutes)
    }
}

/// Built-in rule table.
pub fn default_rules() -> HashMap<AnomalyKind, AlertRule> {
    let mut rules = HashMap::new();

    rules.insert(
        AnomalyKind::SuddenDowntime,
        AlertRule {
            throttle_minutes: Some(5),
            escalation: vec![
                EscalationStep {
                    after_minutes: 15,
                    add_channel: Some("sms".to_string()),
                    raise_severity: None,
                },
                EscalationStep {
                    after_minutes: 60,
                    add_channel: None,
                    raise_severity: Some(Severity::Critical),
                },
            ],
            ..AlertRule::new(&["email", "telegram"])
        },
    );

    rules.insert(
        AnomalyKind::NewPortsOpened,
        AlertRule {
            require_acknowledgment: true,
            whitelist_ports: vec![80, 443, 22],
            ..AlertRule::new(&["email", "dashboard"])
        },
    );

    rules.insert(
        AnomalyKind::LatencySpike,
        AlertRule {
            aggregate_minutes: Some(30),
            ..AlertRule::new(&["dashboard"])
        },
    );

    rules.insert(
        AnomalyKind::NewDevice,
        AlertRule {
            throttle_minutes: Some(60),
            ..AlertRule::new(&["dashboard", "email"])
        },
    );

    rules.insert(
        AnomalyKind::PortsClosed,
        AlertRule {
            severity: Some(Severity::Low),
            ..AlertRule::new(&["dashboard"])
        },
    );

    rules
}

/// Defaults merged with configuration overrides.
pub fn resolve_rules(cfg: &AlertingConfig) -> HashMap<AnomalyKind, AlertRule> {
    let mut rules = default_rules();

    for (name, override_cfg) in &cfg.rules {
        let Ok(kind) = name.parse::<AnomalyKind>() else {
            warn!(rule = %name, "ignoring rule override for unknown anomaly type");
            continue;
        };
        let rule = rules.entry(kind).or_insert_with(|| AlertRule::new(&[]));
        apply_override(rule, override_cfg);
    }

    rules
}

fn apply_override(rule: &mut AlertRule, cfg: &RuleConfig) {
    if let Some(channels) = &cfg.channels {
        rule.channels = channels.clone();
    }
    if let Some(throttle) = cfg.throttle_minutes {
        rule.throttle_minutes = Some(throttle);
    }
    if let Some(severity) = &cfg.severity {
        match severity.parse() {
            Ok(severity) => rule.severity = Some(severity),
            Err(e) => warn!(error = %e, "ignoring rule severity override"),
        }
    }
    if let Some(ports) = &cfg.whitelist_ports {
        rule.whitelist_ports = ports.clone();
    }
    if let Some(aggregate) = cfg.aggregate_minutes {
        rule.aggregate_minutes = Some(aggregate);
    }
    if let Some(require_ack) = cfg.require_acknowledgment {
        rule.require_acknowledgment = require_ack;
    }
    if let Some(steps) = &cfg.escalation {
        rule.escalation = steps
            .iter()
            .map(|step| EscalationStep {
                after_minutes: step.after_minutes,
                add_channel: step.add_channel.clone(),
                raise_severity: step
                    .severity
                    .as_deref()
                    .and_then(|s| s.parse().ok()),
            })
            .collect();
    }
}

/// Whitelist the pipeline's port-change check consults, taken from the
/// (possibly overridden) `new_ports_opened` rule.
pub fn port_whitelist(cfg: &AlertingConfig) -> BTreeSet<u16> {
    resolve_rules(cfg)
        .get(&AnomalyKind::NewPortsOpened)
        .map(|rule| rule.whitelist_ports.iter().copied().collect())
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_rule_table() {
        let rules = default_rules();

        let downtime = &rules[&AnomalyKind::SuddenDowntime];
        assert_eq!(downtime.channels, vec!["email", "telegram"]);
        assert_eq!(downtime.throttle_minutes, Some(5));
        assert_eq!(downtime.escalation.len(), 2);
        assert_eq!(downtime.escalation[0].after_minutes, 15);
        assert_eq!(downtime.escalation[0].add_channel.as_deref(), Some("sms"));
        assert_eq!(downtime.escalation[1].raise_severity, Some(Severity::Critical));

        let new_ports = &rules[&AnomalyKind::NewPortsOpened];
        assert!(new_ports.require_acknowledgment);
        assert_eq!(new_ports.whitelist_ports, vec![80, 443, 22]);

        let spike = &rules[&AnomalyKind::LatencySpike];
        assert_eq!(spike.channels, vec!["dashboard"]);
        assert_eq!(spike.suppression_minutes(), Some(30));

        assert_eq!(rules[&AnomalyKind::NewDevice].throttle_minutes, Some(60));
        assert_eq!(rules[&AnomalyKind::PortsClosed].severity, Some(Severity::Low));
    }

    #[test]
    fn test_overrides_merge_onto_defaults() {
        let mut cfg = AlertingConfig::default();
        cfg.rules.insert(
            "new_device".to_string(),
            crate::config::RuleConfig {
                throttle_minutes: Some(120),
                ..Default::default()
            },
        );

        let rules = resolve_rules(&cfg);
        let rule = &rules[&AnomalyKind::NewDevice];
        assert_eq!(rule.throttle_minutes, Some(120));
        // Untouched fields keep their defaults.
        assert_eq!(rule.channels, vec!["dashboard", "email"]);
    }

    #[test]
    fn test_port_whitelist_follows_override() {
        let cfg = AlertingConfig::default();
        assert_eq!(
            port_whitelist(&cfg).into_iter().collect::<Vec<_>>(),
            vec![22, 80, 443]
        );

        let mut cfg = AlertingConfig::default();
        cfg.rules.insert(
            "new_ports_opened".to_string(),
            crate::config::RuleConfig {
                whitelist_ports: Some(vec![8080]),
                ..Default::default()
            },
        );
        assert_eq!(
            port_whitelist(&cfg).into_iter().collect::<Vec<_>>(),
            vec![8080]
        );
    }
}
