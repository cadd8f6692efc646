//! One pipeline run over a batch of documents.
//!
//! Pure: everything the run reads comes in through [`RunInput`] and
//! everything it decides goes out through [`RunOutput`]. Persisting the
//! output is the store's job.

use tracing::{debug, info, warn};

use crate::config::RuleConfig;
use crate::error::PipelineError;
use crate::pipeline::fingerprint::{fingerprint_document, FingerprintLedger, FingerprintSnapshot};
use crate::pipeline::po_extract::{extract_po_refs, masked_preview};
use crate::pipeline::po_validate::validate;
use crate::pipeline::types::{
    AuditRecord, Fingerprint, FingerprintStatus, InboundDocument, PoMaster, UnreadableCause,
    ValueSnapshot, WorklistRow,
};
use crate::pipeline::values::{
    extract_values, resolve_values, unreadable_values, ExtractedValues, ValuePopulation,
};
use crate::pipeline::worklist::{compare_rows, ActionInput, RuleTable};

const PREVIEW_LINES: usize = 20;
const PREVIEW_CHARS: usize = 140;

/// Everything a run reads.
#[derive(Debug)]
pub struct RunInput<'a> {
    pub run_id: String,
    pub documents: Vec<InboundDocument>,
    pub master: &'a PoMaster,
    /// Seen-fingerprint snapshot left by the previous run.
    pub fingerprints: FingerprintSnapshot,
    /// Extracted values from earlier runs, keyed by fingerprint.
    pub value_history: ValuePopulation,
    pub rules: &'a RuleConfig,
}

/// Counts for the run log and the run record.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RunSummary {
    pub documents: usize,
    pub new: usize,
    pub reappeared: usize,
    pub duplicates: usize,
    pub unreadable: usize,
    pub ready_to_post: usize,
}

/// Everything a run decided.
#[derive(Debug, Clone)]
pub struct RunOutput {
    pub run_id: String,
    /// One row per document, in worklist order.
    pub rows: Vec<WorklistRow>,
    /// One audit record per document, ordered by source reference.
    pub audits: Vec<AuditRecord>,
    /// Snapshot to persist for the next run.
    pub fingerprints: FingerprintSnapshot,
    /// Population the estimates were drawn from.
    pub population: ValuePopulation,
    pub summary: RunSummary,
}

/// First-pass result for one document.
struct Scanned {
    doc: InboundDocument,
    fingerprint: Option<Fingerprint>,
    status: FingerprintStatus,
    cause: Option<UnreadableCause>,
    extracted: Option<ExtractedValues>,
}

/// Run the decision pipeline over one batch.
///
/// Fails only when the master dataset is empty. Per-document problems become
/// rows, never errors.
pub fn run_pipeline(input: RunInput<'_>) -> Result<RunOutput, PipelineError> {
    let RunInput {
        run_id,
        mut documents,
        master,
        fingerprints,
        value_history,
        rules,
    } = input;

    if master.is_empty() {
        return Err(PipelineError::MasterDatasetUnavailable(
            "PO master contains no records".into(),
        ));
    }

    // The first copy of a duplicate must not depend on feed order.
    documents.sort_by(|a, b| {
        a.meta
            .received_at
            .cmp(&b.meta.received_at)
            .then_with(|| a.source_ref.cmp(&b.source_ref))
    });

    info!(run_id = %run_id, documents = documents.len(), master_records = master.len(), "Starting pipeline run");

    // ── Pass 1: identity and extracted values ───────────────────────

    let mut ledger = FingerprintLedger::from_snapshot(fingerprints, run_id.clone());
    let mut population = value_history;
    let mut scanned = Vec::with_capacity(documents.len());

    for doc in documents {
        let entry = match fingerprint_document(&doc) {
            Err(e) => {
                warn!(source_ref = %doc.source_ref, error = %e, "Unreadable attachment");
                Scanned {
                    doc,
                    fingerprint: None,
                    status: FingerprintStatus::Unreadable,
                    cause: Some(UnreadableCause::Corrupt),
                    extracted: None,
                }
            }
            Ok(fp) => {
                let status = ledger.classify(&fp);
                if status != FingerprintStatus::Duplicate && doc.text.trim().is_empty() {
                    debug!(source_ref = %doc.source_ref, fingerprint = fp.short(), "No text layer");
                    Scanned {
                        doc,
                        fingerprint: Some(fp),
                        status: FingerprintStatus::Unreadable,
                        cause: Some(UnreadableCause::NoTextLayer),
                        extracted: None,
                    }
                } else {
                    debug!(
                        source_ref = %doc.source_ref,
                        fingerprint = fp.short(),
                        status = status.as_str(),
                        preview = %masked_preview(&doc.text, PREVIEW_LINES, PREVIEW_CHARS),
                        "Document scanned"
                    );
                    let extracted = extract_values(&doc.text);
                    if status != FingerprintStatus::Duplicate {
                        population.insert(fp.clone(), extracted.observed());
                    }
                    Scanned {
                        doc,
                        fingerprint: Some(fp),
                        status,
                        cause: None,
                        extracted: Some(extracted),
                    }
                }
            }
        };
        scanned.push(entry);
    }

    // ── Pass 2: PO checks, values and action ────────────────────────

    let table = RuleTable::new(rules.conflict_precedence);
    let mut summary = RunSummary {
        documents: scanned.len(),
        ..RunSummary::default()
    };
    let mut rows = Vec::with_capacity(scanned.len());
    let mut audits = Vec::with_capacity(scanned.len());

    for entry in scanned {
        let Scanned {
            doc,
            fingerprint,
            status,
            cause,
            extracted,
        } = entry;

        let po_refs = match &extracted {
            Some(_) => extract_po_refs(&doc.text),
            None => Vec::new(),
        };
        let validation = validate(&po_refs, master);
        let values = match &extracted {
            Some(extracted) => resolve_values(extracted, &population, &rules.required_value_fields),
            None => unreadable_values(&rules.required_value_fields),
        };

        let assignment = table.assign(&ActionInput {
            fingerprint_status: status,
            validation: validation.result,
            value_state: values.state(),
        });

        match status {
            FingerprintStatus::New => summary.new += 1,
            FingerprintStatus::Reappeared => summary.reappeared += 1,
            FingerprintStatus::Duplicate => summary.duplicates += 1,
            FingerprintStatus::Unreadable => summary.unreadable += 1,
        }
        if assignment.ready_to_post {
            summary.ready_to_post += 1;
        }

        rows.push(WorklistRow {
            source_ref: doc.source_ref.clone(),
            fingerprint: fingerprint.clone(),
            ready_to_post: assignment.ready_to_post,
            action: assignment.action,
            reason: assignment.reason.to_string(),
            priority: assignment.priority,
            values: ValueSnapshot::from(&values),
            matched_po: validation.matched_po.clone(),
            po_remaining_value: validation.remaining_value,
            sender_domain: doc.meta.sender_domain(),
            email_subject: doc.meta.subject.clone(),
            attachment_name: doc.meta.attachment_name.clone(),
            received_at: doc.meta.received_at,
        });

        audits.push(AuditRecord {
            source_ref: doc.source_ref,
            fingerprint,
            fingerprint_status: status,
            unreadable_cause: cause,
            po_refs,
            validation,
            values,
            fired_rule: assignment.rule.to_string(),
        });
    }

    rows.sort_by(compare_rows);
    audits.sort_by(|a, b| a.source_ref.cmp(&b.source_ref));

    info!(
        run_id = %run_id,
        documents = summary.documents,
        new = summary.new,
        reappeared = summary.reappeared,
        duplicates = summary.duplicates,
        unreadable = summary.unreadable,
        ready_to_post = summary.ready_to_post,
        population = population.len(),
        "Pipeline run complete"
    );

    Ok(RunOutput {
        run_id,
        rows,
        audits,
        fingerprints: ledger.finish_run(),
        population,
        summary,
    })
}
