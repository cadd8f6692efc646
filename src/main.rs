use anyhow::Context;
use chrono::Utc;

use invoice_worklist::batch::execute_run;
use invoice_worklist::config::PipelineConfig;
use invoice_worklist::report::{build_snapshot, write_snapshot};
use invoice_worklist::store::{LibSqlBackend, WorklistStore};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_target(false)
        .init();

    let config = PipelineConfig::from_env().context("Invalid configuration")?;

    eprintln!("🧾 Invoice Worklist v{}", env!("CARGO_PKG_VERSION"));
    eprintln!("   Database: {}", config.db_path.display());
    eprintln!("   Inbox feed: {}", config.inbox_json.display());
    eprintln!("   PO master: {}", config.po_master_csv.display());
    eprintln!("   Snapshot: {}\n", config.snapshot_json.display());

    // ── Database ─────────────────────────────────────────────────────────
    let store = LibSqlBackend::new_local(&config.db_path)
        .await
        .with_context(|| format!("Failed to open database at {}", config.db_path.display()))?;

    // ── Run ──────────────────────────────────────────────────────────────
    let run_id = uuid::Uuid::new_v4().to_string();
    execute_run(&config, &store, &run_id)
        .await
        .with_context(|| format!("Run {run_id} failed"))?;

    let delta = store.run_delta(&run_id).await?;
    tracing::info!(
        run_id = %delta.run_id,
        previous = delta.previous_run_id.as_deref().unwrap_or("-"),
        added = delta.added.len(),
        removed = delta.removed.len(),
        changed = delta.changed.len(),
        unchanged = delta.unchanged,
        "Run delta"
    );
    for change in &delta.changed {
        tracing::info!(
            source_ref = %change.source_ref,
            from = change.previous.as_str(),
            to = change.current.as_str(),
            "Action changed"
        );
    }

    // ── Snapshot ─────────────────────────────────────────────────────────
    let rows = store.current_worklist().await?;
    let last_run = store.list_runs(1).await?.into_iter().next();
    let snapshot = build_snapshot(rows, last_run, Utc::now());
    write_snapshot(&config.snapshot_json, &snapshot).with_context(|| {
        format!(
            "Failed to write snapshot to {}",
            config.snapshot_json.display()
        )
    })?;

    eprintln!(
        "✅ {} documents, {} ready to post, {} need action",
        snapshot.overview.total, snapshot.overview.ready_to_post, snapshot.overview.needs_action
    );

    Ok(())
}
