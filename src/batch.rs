//! One batch run against a store: inputs from disk, pipeline, commit.

use chrono::Utc;
use tracing::info;

use crate::config::PipelineConfig;
use crate::error::{PipelineError, Result};
use crate::ingest::InboxFeed;
use crate::master::load_po_master;
use crate::pipeline::runner::{run_pipeline, RunInput, RunOutput};
use crate::store::WorklistStore;

/// Load inputs, run the pipeline and commit the output.
///
/// Master data, feed and store state are all read before anything is
/// written. Any failure up to and including the commit leaves the store as
/// it was.
pub async fn execute_run<S: WorklistStore + ?Sized>(
    config: &PipelineConfig,
    store: &S,
    run_id: &str,
) -> Result<RunOutput> {
    let master = load_po_master(&config.po_master_csv)?;
    let documents = InboxFeed::from_config(config).load_documents()?;

    let fingerprints = store
        .load_fingerprint_snapshot()
        .await
        .map_err(PipelineError::StoreUnavailable)?;
    let value_history = store
        .load_value_history()
        .await
        .map_err(PipelineError::StoreUnavailable)?;

    info!(run_id, documents = documents.len(), "Starting run");
    let output = run_pipeline(RunInput {
        run_id: run_id.to_string(),
        documents,
        master: &master,
        fingerprints,
        value_history,
        rules: &config.rules,
    })?;

    store
        .commit_run(&output, Utc::now())
        .await
        .map_err(PipelineError::StoreUnavailable)?;

    Ok(output)
}
