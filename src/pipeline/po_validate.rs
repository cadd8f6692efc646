//! PO validation against the master snapshot.
//!
//! Classification only. The references passed in are never altered, so
//! detection truth stays visible in the audit trail next to the verdict.

use std::collections::BTreeSet;

use tracing::debug;

use crate::pipeline::types::{
    master_key, PoMaster, PoReference, PoStatus, Validation, ValidationResult,
};

/// Classify a document's PO references. Total over every input.
pub fn validate(refs: &[PoReference], master: &PoMaster) -> Validation {
    if refs.is_empty() {
        return Validation {
            result: ValidationResult::NoPoFound,
            matched_po: None,
            remaining_value: None,
        };
    }

    // `PO-010045` and `PO-10045` are the same order.
    let keys: BTreeSet<String> = refs.iter().filter_map(|r| master_key(&r.number)).collect();
    if keys.len() > 1 {
        debug!(refs = keys.len(), "Multiple distinct PO references");
        return Validation {
            result: ValidationResult::MultiplePoConflict,
            matched_po: None,
            remaining_value: None,
        };
    }

    let number = &refs[0].number;
    let Some(record) = master.get(number) else {
        debug!(po = %number, "PO not in master");
        return Validation {
            result: ValidationResult::PoNotFound,
            matched_po: None,
            remaining_value: None,
        };
    };

    let result = match record.status {
        PoStatus::Closed => ValidationResult::PoClosed,
        PoStatus::Unapproved => ValidationResult::PoUnapproved,
        PoStatus::Open => ValidationResult::PoValid,
    };
    debug!(po = %record.po_number, result = result.as_str(), "PO validated");

    Validation {
        result,
        matched_po: Some(record.po_number.clone()),
        remaining_value: record.remaining_value,
    }
}
