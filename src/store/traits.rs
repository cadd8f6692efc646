//! `WorklistStore` trait: the single async interface for persistence.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::error::DatabaseError;
use crate::pipeline::fingerprint::FingerprintSnapshot;
use crate::pipeline::runner::RunOutput;
use crate::pipeline::types::{AuditRecord, Fingerprint, NextAction, WorklistRow};
use crate::pipeline::values::ValuePopulation;

/// A committed pipeline run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RunRecord {
    pub run_id: String,
    pub generated_at: DateTime<Utc>,
    pub documents: usize,
    pub new_documents: usize,
    pub reappeared: usize,
    pub duplicates: usize,
    pub unreadable: usize,
    pub ready_to_post: usize,
}

/// A row whose action differs between two runs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ActionChange {
    pub source_ref: String,
    pub previous: NextAction,
    pub current: NextAction,
}

/// How a run's worklist differs from the run before it, keyed by source
/// reference.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RunDelta {
    pub run_id: String,
    pub previous_run_id: Option<String>,
    /// Rows with no counterpart in the previous run.
    pub added: Vec<String>,
    /// Rows of the previous run that are gone.
    pub removed: Vec<String>,
    pub changed: Vec<ActionChange>,
    pub unchanged: usize,
}

impl RunDelta {
    pub fn is_empty(&self) -> bool {
        self.added.is_empty() && self.removed.is_empty() && self.changed.is_empty()
    }
}

/// Backend-agnostic store for worklist rows, audit trail and run state.
#[async_trait]
pub trait WorklistStore: Send + Sync {
    /// Run all pending schema migrations.
    async fn run_migrations(&self) -> Result<(), DatabaseError>;

    // ── Run inputs ──────────────────────────────────────────────────

    /// Seen-fingerprint snapshot left by the last committed run.
    async fn load_fingerprint_snapshot(&self) -> Result<FingerprintSnapshot, DatabaseError>;

    /// Extracted values of every document ever stored.
    async fn load_value_history(&self) -> Result<ValuePopulation, DatabaseError>;

    // ── Run output ──────────────────────────────────────────────────

    /// Persist a run atomically: replace the current worklist, append to
    /// history, upsert documents, replace the fingerprint snapshot and
    /// record the run. Nothing is written if any step fails.
    async fn commit_run(
        &self,
        output: &RunOutput,
        generated_at: DateTime<Utc>,
    ) -> Result<(), DatabaseError>;

    // ── Queries ─────────────────────────────────────────────────────

    /// The current worklist, in worklist order.
    async fn current_worklist(&self) -> Result<Vec<WorklistRow>, DatabaseError>;

    /// The worklist as it stood after `run_id`.
    async fn worklist_history(&self, run_id: &str) -> Result<Vec<WorklistRow>, DatabaseError>;

    /// Audit records for every document with this fingerprint, from the most
    /// recent run that saw it.
    async fn audit_for(&self, fingerprint: &Fingerprint) -> Result<Vec<AuditRecord>, DatabaseError>;

    /// Most recent runs first.
    async fn list_runs(&self, limit: usize) -> Result<Vec<RunRecord>, DatabaseError>;

    /// Action changes between `run_id` and the run committed before it.
    async fn run_delta(&self, run_id: &str) -> Result<RunDelta, DatabaseError>;
}
