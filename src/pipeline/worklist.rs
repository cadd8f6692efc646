//! Next-action assignment.
//!
//! An explicit ordered table of (predicate, action, reason) rules. The first
//! rule whose predicate holds wins, and its position in the table is the
//! row's priority (1 = hardest blocker). The last rule always holds, so every
//! input gets exactly one action.

use std::cmp::Ordering;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::pipeline::types::{
    FingerprintStatus, NextAction, ValidationResult, ValueState, WorklistRow,
};

/// Where a PO conflict ranks relative to value problems.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConflictPrecedence {
    /// Conflict outranks missing or estimated values.
    #[default]
    BlockerFirst,
    /// Missing and estimated values outrank a conflict.
    EstimateFirst,
}

impl FromStr for ConflictPrecedence {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "blocker_first" => Ok(Self::BlockerFirst),
            "estimate_first" => Ok(Self::EstimateFirst),
            other => Err(format!(
                "unknown conflict precedence '{other}' (expected blocker_first or estimate_first)"
            )),
        }
    }
}

/// What the rule table looks at for one document.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ActionInput {
    pub fingerprint_status: FingerprintStatus,
    pub validation: ValidationResult,
    pub value_state: ValueState,
}

/// A single worklist rule.
#[derive(Debug, Clone)]
pub struct ActionRule {
    /// Rule name, recorded in the audit trail.
    pub name: &'static str,
    pub predicate: fn(&ActionInput) -> bool,
    pub action: NextAction,
    pub reason: &'static str,
}

/// The outcome of the rule table for one document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Assignment {
    pub action: NextAction,
    pub reason: &'static str,
    pub priority: u8,
    pub ready_to_post: bool,
    /// Name of the rule that fired.
    pub rule: &'static str,
}

const RULE_CLEAN: &str = "clean";
const RULE_CONFLICT: &str = "conflict";

/// Ordered worklist rule table.
#[derive(Debug, Clone)]
pub struct RuleTable {
    rules: Vec<ActionRule>,
}

impl Default for RuleTable {
    fn default() -> Self {
        Self::new(ConflictPrecedence::default())
    }
}

impl RuleTable {
    /// Build the standard table with the given conflict precedence.
    pub fn new(precedence: ConflictPrecedence) -> Self {
        let mut rules = vec![
            ActionRule {
                name: "duplicate",
                predicate: |i| i.fingerprint_status == FingerprintStatus::Duplicate,
                action: NextAction::SkipDuplicate,
                reason: "duplicate_document",
            },
            ActionRule {
                name: "unreadable",
                predicate: |i| i.fingerprint_status == FingerprintStatus::Unreadable,
                action: NextAction::ManualReview,
                reason: "unreadable_document",
            },
            ActionRule {
                name: "no_po",
                predicate: |i| i.validation == ValidationResult::NoPoFound,
                action: NextAction::RequestPoFromVendor,
                reason: "no_po_found",
            },
            ActionRule {
                name: "po_not_found",
                predicate: |i| i.validation == ValidationResult::PoNotFound,
                action: NextAction::VerifyPoNumber,
                reason: "po_not_found",
            },
            ActionRule {
                name: "po_closed",
                predicate: |i| i.validation == ValidationResult::PoClosed,
                action: NextAction::EscalateClosedPo,
                reason: "po_closed",
            },
            ActionRule {
                name: "po_unapproved",
                predicate: |i| i.validation == ValidationResult::PoUnapproved,
                action: NextAction::ChasePoApproval,
                reason: "po_unapproved",
            },
            ActionRule {
                name: RULE_CONFLICT,
                predicate: |i| i.validation == ValidationResult::MultiplePoConflict,
                action: NextAction::ResolvePoConflict,
                reason: "multiple_po_conflict",
            },
            ActionRule {
                name: "values_missing",
                predicate: |i| i.value_state == ValueState::Missing,
                action: NextAction::ManualReview,
                reason: "values_missing_no_population",
            },
            ActionRule {
                name: "values_estimated",
                predicate: |i| i.value_state == ValueState::Estimated,
                action: NextAction::ConfirmEstimatedValues,
                reason: "po_valid_values_estimated",
            },
            ActionRule {
                name: RULE_CLEAN,
                predicate: |_| true,
                action: NextAction::Post,
                reason: "po_valid_and_values_extracted",
            },
        ];

        if precedence == ConflictPrecedence::EstimateFirst {
            if let Some(pos) = rules.iter().position(|r| r.name == RULE_CONFLICT) {
                let conflict = rules.remove(pos);
                // Just above the catch-all.
                let clean = rules.len() - 1;
                rules.insert(clean, conflict);
            }
        }

        Self { rules }
    }

    pub fn rules(&self) -> &[ActionRule] {
        &self.rules
    }

    /// First matching rule wins.
    pub fn assign(&self, input: &ActionInput) -> Assignment {
        for (index, rule) in self.rules.iter().enumerate() {
            if (rule.predicate)(input) {
                debug!(
                    rule = rule.name,
                    action = rule.action.as_str(),
                    fingerprint_status = input.fingerprint_status.as_str(),
                    validation = input.validation.as_str(),
                    "Worklist rule fired"
                );
                return Assignment {
                    action: rule.action,
                    reason: rule.reason,
                    priority: (index + 1) as u8,
                    ready_to_post: rule.name == RULE_CLEAN,
                    rule: rule.name,
                };
            }
        }

        // Unreachable while the table ends in `clean`; kept total anyway.
        Assignment {
            action: NextAction::ManualReview,
            reason: "no_rule_matched",
            priority: self.rules.len() as u8 + 1,
            ready_to_post: false,
            rule: "none",
        }
    }
}

/// Assign with the default table.
pub fn assign_action(
    validation: ValidationResult,
    value_state: ValueState,
    fingerprint_status: FingerprintStatus,
) -> Assignment {
    RuleTable::default().assign(&ActionInput {
        fingerprint_status,
        validation,
        value_state,
    })
}

/// Worklist order: priority, then fingerprint, then source reference.
///
/// Rows without a fingerprint sort before fingerprinted rows of the same
/// priority.
pub fn compare_rows(a: &WorklistRow, b: &WorklistRow) -> Ordering {
    a.priority
        .cmp(&b.priority)
        .then_with(|| a.fingerprint.cmp(&b.fingerprint))
        .then_with(|| a.source_ref.cmp(&b.source_ref))
}
