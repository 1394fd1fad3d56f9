//! Escalation sweep: a periodic pass over unresolved tracked incidents
//! that applies each rule's escalation ladder (add a channel, raise the
//! severity) once the incident has been open long enough. The same loop
//! drains anomalies that were persisted but never alerted.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tracing::{info, warn};
use uuid::Uuid;

use crate::detect::{AnomalyKind, Severity};
use crate::storage::{Store, TrackingRow};

use super::rules::EscalationStep;
use super::{Alert, AlertEngine};

/// Run the alert maintenance loop: escalations plus the pending-anomaly
/// drain, every `interval_secs`.
pub async fn run_escalation_sweep(engine: Arc<AlertEngine>, store: Store, interval_secs: u64) {
    info!(interval_secs, "alert escalation sweep started");
    let mut interval = tokio::time::interval(Duration::from_secs(interval_secs.max(1)));

    loop {
        interval.tick().await;
        drain_pending(&engine, &store).await;
        sweep_escalations(&engine, &store).await;
    }
}

async fn drain_pending(engine: &Arc<AlertEngine>, store: &Store) {
    let pending = {
        let store = store.clone();
        tokio::task::spawn_blocking(move || store.pending_anomalies(10)).await
    };
    match pending {
        Ok(Ok(anomalies)) if !anomalies.is_empty() => {
            info!(count = anomalies.len(), "draining unalerted anomalies");
            engine.process_anomalies(&anomalies).await;
        }
        Ok(Ok(_)) => {}
        Ok(Err(e)) => warn!(error = %e, "could not load pending anomalies"),
        Err(e) => warn!(error = %e, "pending-anomaly drain task failed"),
    }
}

async fn sweep_escalations(engine: &Arc<AlertEngine>, store: &Store) {
    let rows = {
        let store = store.clone();
        tokio::task::spawn_blocking(move || store.all_unresolved_tracking()).await
    };
    let rows = match rows {
        Ok(Ok(rows)) => rows,
        Ok(Err(e)) => {
            warn!(error = %e, "could not load unresolved incidents");
            return;
        }
        Err(e) => {
            warn!(error = %e, "escalation sweep task failed");
            return;
        }
    };

    for row in rows {
        if let Err(e) = escalate_row(engine, store, &row).await {
            warn!(key = %row.alert_key, error = %e, "escalation failed");
        }
    }
}

async fn escalate_row(
    engine: &Arc<AlertEngine>,
    store: &Store,
    row: &TrackingRow,
) -> Result<(), crate::storage::StoreError> {
    // Dedup key format is "<ip>:<anomaly_type>".
    let Some((device, kind)) = row.alert_key.rsplit_once(':') else {
        return Ok(());
    };
    let Ok(kind) = kind.parse::<AnomalyKind>() else {
        return Ok(());
    };
    let Some(rule) = engine.rule_for(kind) else {
        return Ok(());
    };
    if rule.escalation.is_empty() {
        return Ok(());
    }

    let open_minutes = (Utc::now() - row.first_occurrence).num_minutes();
    let mut level = row.escalation_level;

    for (index, step) in rule.escalation.iter().enumerate() {
        if (index as i64) < level || open_minutes < step.after_minutes {
            continue;
        }

        info!(
            key = %row.alert_key,
            step = index,
            open_minutes,
            "escalating unresolved incident"
        );
        dispatch_escalation(engine, rule_severity(rule, step), device, kind, step, row).await;

        level = index as i64 + 1;
        store.set_escalation_level(&row.alert_key, level)?;
    }

    Ok(())
}

fn rule_severity(rule: &super::rules::AlertRule, step: &EscalationStep) -> Severity {
    step.raise_severity
        .or(rule.severity)
        .unwrap_or(Severity::High)
}

async fn dispatch_escalation(
    engine: &Arc<AlertEngine>,
    severity: Severity,
    device: &str,
    kind: AnomalyKind,
    step: &EscalationStep,
    row: &TrackingRow,
) {
    // An added channel gets the escalation notice; a pure severity raise
    // re-notifies the rule's primary channel.
    let channel = step
        .add_channel
        .clone()
        .or_else(|| {
            engine
                .rule_for(kind)
                .and_then(|r| r.channels.first().cloned())
        })
        .unwrap_or_else(|| "dashboard".to_string());

    let open_minutes = (Utc::now() - row.first_occurrence).num_minutes();
    let message = format!(
        "ESCALATION: {kind} on {device} unresolved for {open_minutes} minutes \
         ({} occurrences).\nFirst seen: {}",
        row.occurrence_count,
        row.first_occurrence.to_rfc3339()
    );

    let alert = Alert {
        id: Uuid::new_v4(),
        anomaly_id: None,
        device_id: None,
        kind,
        severity,
        channel,
        message,
        created_at: Utc::now(),
    };
    engine.dispatch_to_channel(alert).await;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::alert::rules::default_rules;

    #[test]
    fn test_escalation_severity_resolution() {
        let rules = default_rules();
        let downtime = &rules[&AnomalyKind::SuddenDowntime];

        // Step 1 adds a channel without raising severity.
        assert_eq!(rule_severity(downtime, &downtime.escalation[0]), Severity::High);
        // Step 2 raises to critical.
        assert_eq!(
            rule_severity(downtime, &downtime.escalation[1]),
            Severity::Critical
        );
    }
}
