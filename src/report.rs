//! Read-only snapshot export for the presentation layer.
//!
//! The snapshot is built from the committed worklist, never from a run in
//! flight, so the dashboard always shows what the store holds.

use std::collections::BTreeMap;
use std::path::Path;

use chrono::{DateTime, Utc};
use rust_decimal::{Decimal, RoundingStrategy};
use serde::Serialize;
use tracing::info;

use crate::error::ReportError;
use crate::pipeline::types::{NextAction, Provenance, WorklistRow};
use crate::store::RunRecord;

/// Headline counts over the current worklist.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Overview {
    pub total: usize,
    pub ready_to_post: usize,
    /// Rows needing a human, duplicates excluded.
    pub needs_action: usize,
    pub duplicates: usize,
    /// Rows carrying at least one estimated value.
    pub estimated_values: usize,
    /// Share of non-duplicate rows that are ready to post, 1 dp.
    pub ready_pct: Option<Decimal>,
    /// Gross across ready rows.
    pub ready_gross: Decimal,
}

/// Rows and gross per next action.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ActionCount {
    pub action: NextAction,
    pub reason: String,
    pub priority: u8,
    pub count: usize,
    pub gross: Decimal,
}

#[derive(Debug, Clone, Serialize)]
pub struct Snapshot {
    pub generated_at: DateTime<Utc>,
    pub last_run: Option<RunRecord>,
    pub overview: Overview,
    /// Ordered by priority, hardest blocker first.
    pub action_breakdown: Vec<ActionCount>,
    pub worklist: Vec<WorklistRow>,
}

/// Assemble the snapshot from committed rows.
pub fn build_snapshot(
    rows: Vec<WorklistRow>,
    last_run: Option<RunRecord>,
    generated_at: DateTime<Utc>,
) -> Snapshot {
    Snapshot {
        generated_at,
        last_run,
        overview: overview(&rows),
        action_breakdown: action_breakdown(&rows),
        worklist: rows,
    }
}

fn gross_of(row: &WorklistRow) -> Decimal {
    row.values.gross.map(|v| v.amount).unwrap_or_default()
}

fn overview(rows: &[WorklistRow]) -> Overview {
    let duplicates = rows
        .iter()
        .filter(|r| r.action == NextAction::SkipDuplicate)
        .count();
    let ready: Vec<&WorklistRow> = rows.iter().filter(|r| r.ready_to_post).collect();
    let considered = rows.len() - duplicates;

    let ready_pct = (considered > 0).then(|| {
        (Decimal::from(ready.len() as u64) * Decimal::ONE_HUNDRED
            / Decimal::from(considered as u64))
        .round_dp_with_strategy(1, RoundingStrategy::MidpointAwayFromZero)
    });

    let estimated_values = rows
        .iter()
        .filter(|r| {
            [r.values.gross, r.values.net, r.values.vat]
                .iter()
                .flatten()
                .any(|v| v.provenance == Provenance::Estimated)
        })
        .count();

    Overview {
        total: rows.len(),
        ready_to_post: ready.len(),
        needs_action: considered - ready.len(),
        duplicates,
        estimated_values,
        ready_pct,
        ready_gross: ready.iter().map(|r| gross_of(r)).sum(),
    }
}

fn action_breakdown(rows: &[WorklistRow]) -> Vec<ActionCount> {
    // Keyed by (priority, reason): two rules can share an action.
    let mut groups: BTreeMap<(u8, &str), ActionCount> = BTreeMap::new();
    for row in rows {
        let entry = groups
            .entry((row.priority, row.reason.as_str()))
            .or_insert_with(|| ActionCount {
                action: row.action,
                reason: row.reason.clone(),
                priority: row.priority,
                count: 0,
                gross: Decimal::ZERO,
            });
        entry.count += 1;
        entry.gross += gross_of(row);
    }
    groups.into_values().collect()
}

/// Write the snapshot as pretty JSON, creating the parent directory.
pub fn write_snapshot(path: &Path, snapshot: &Snapshot) -> Result<(), ReportError> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let json = serde_json::to_string_pretty(snapshot)?;
    std::fs::write(path, json)?;
    info!(
        path = %path.display(),
        rows = snapshot.worklist.len(),
        ready = snapshot.overview.ready_to_post,
        "Snapshot written"
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use rust_decimal_macros::dec;

    use super::*;
    use crate::pipeline::types::{MonetaryValue, ValueSnapshot};

    fn row(source_ref: &str, action: NextAction, priority: u8, gross: Option<MonetaryValue>) -> WorklistRow {
        WorklistRow {
            source_ref: source_ref.into(),
            fingerprint: None,
            ready_to_post: action == NextAction::Post,
            action,
            reason: format!("reason_{priority}"),
            priority,
            values: ValueSnapshot {
                gross,
                ..ValueSnapshot::default()
            },
            matched_po: None,
            po_remaining_value: None,
            sender_domain: None,
            email_subject: None,
            attachment_name: format!("{source_ref}.pdf"),
            received_at: None,
        }
    }

    fn sample() -> Vec<WorklistRow> {
        vec![
            row("M1/01", NextAction::SkipDuplicate, 1, None),
            row("M2/01", NextAction::RequestPoFromVendor, 3, Some(MonetaryValue::extracted(dec!(50.00)))),
            row("M3/01", NextAction::ConfirmEstimatedValues, 9, Some(MonetaryValue::estimated(dec!(1200.00)))),
            row("M4/01", NextAction::Post, 10, Some(MonetaryValue::extracted(dec!(4800.00)))),
            row("M5/01", NextAction::Post, 10, Some(MonetaryValue::extracted(dec!(200.00)))),
        ]
    }

    #[test]
    fn overview_counts() {
        let snapshot = build_snapshot(sample(), None, Utc::now());
        let o = &snapshot.overview;
        assert_eq!(o.total, 5);
        assert_eq!(o.duplicates, 1);
        assert_eq!(o.ready_to_post, 2);
        assert_eq!(o.needs_action, 2);
        assert_eq!(o.estimated_values, 1);
        assert_eq!(o.ready_pct, Some(dec!(50.0)));
        assert_eq!(o.ready_gross, dec!(5000.00));
    }

    #[test]
    fn breakdown_is_in_priority_order() {
        let snapshot = build_snapshot(sample(), None, Utc::now());
        let breakdown = &snapshot.action_breakdown;
        let priorities: Vec<u8> = breakdown.iter().map(|a| a.priority).collect();
        assert_eq!(priorities, vec![1, 3, 9, 10]);

        let post = breakdown.last().unwrap();
        assert_eq!(post.action, NextAction::Post);
        assert_eq!(post.count, 2);
        assert_eq!(post.gross, dec!(5000.00));
    }

    #[test]
    fn empty_worklist_has_no_percentage() {
        let snapshot = build_snapshot(Vec::new(), None, Utc::now());
        assert_eq!(snapshot.overview.total, 0);
        assert_eq!(snapshot.overview.ready_pct, None);
        assert!(snapshot.action_breakdown.is_empty());
    }

    #[test]
    fn writes_json_into_new_directory() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("exports").join("snapshot.json");
        let snapshot = build_snapshot(sample(), None, Utc::now());
        write_snapshot(&path, &snapshot).unwrap();

        let json: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(json["overview"]["total"], 5);
        assert_eq!(json["worklist"].as_array().unwrap().len(), 5);
        assert_eq!(json["action_breakdown"][0]["action"], "skip_duplicate");
        assert!(json["last_run"].is_null());
    }
}
