//! Version-tracked database migrations for the libSQL backend.
//!
//! Each migration has a version number and SQL. `run_migrations()` checks
//! the current version and applies only the new ones sequentially.

use libsql::Connection;

use crate::error::DatabaseError;

/// A single migration step.
struct Migration {
    version: i64,
    name: &'static str,
    sql: &'static str,
}

/// All migrations in order. Add new versions to the end.
static MIGRATIONS: &[Migration] = &[
    Migration {
        version: 1,
        name: "initial_schema",
        sql: r#"
            CREATE TABLE IF NOT EXISTS pipeline_runs (
                seq INTEGER PRIMARY KEY AUTOINCREMENT,
                run_id TEXT NOT NULL UNIQUE,
                generated_at TEXT NOT NULL,
                documents INTEGER NOT NULL,
                new_documents INTEGER NOT NULL,
                reappeared INTEGER NOT NULL,
                duplicates INTEGER NOT NULL,
                unreadable INTEGER NOT NULL,
                ready_to_post INTEGER NOT NULL
            );

            CREATE TABLE IF NOT EXISTS invoice_worklist (
                position INTEGER PRIMARY KEY,
                run_id TEXT NOT NULL,
                source_ref TEXT NOT NULL,
                fingerprint TEXT,
                ready_to_post INTEGER NOT NULL,
                next_action TEXT NOT NULL,
                action_reason TEXT NOT NULL,
                priority INTEGER NOT NULL,
                gross TEXT,
                matched_po TEXT,
                sender_domain TEXT,
                attachment_name TEXT NOT NULL,
                row_json TEXT NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_worklist_action ON invoice_worklist(next_action);

            CREATE TABLE IF NOT EXISTS invoice_worklist_history (
                run_id TEXT NOT NULL,
                position INTEGER NOT NULL,
                source_ref TEXT NOT NULL,
                fingerprint TEXT,
                next_action TEXT NOT NULL,
                action_reason TEXT NOT NULL,
                priority INTEGER NOT NULL,
                row_json TEXT NOT NULL,
                PRIMARY KEY (run_id, position)
            );
            CREATE INDEX IF NOT EXISTS idx_worklist_history_source
                ON invoice_worklist_history(source_ref);

            CREATE TABLE IF NOT EXISTS documents (
                fingerprint TEXT PRIMARY KEY,
                source_ref TEXT NOT NULL,
                attachment_name TEXT NOT NULL,
                value_rule TEXT NOT NULL,
                gross TEXT,
                net TEXT,
                vat TEXT,
                first_seen_run TEXT NOT NULL,
                last_seen_run TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS document_po_refs (
                fingerprint TEXT NOT NULL REFERENCES documents(fingerprint) ON DELETE CASCADE,
                po_number TEXT NOT NULL,
                rule TEXT NOT NULL,
                position INTEGER NOT NULL,
                PRIMARY KEY (fingerprint, po_number)
            );

            CREATE TABLE IF NOT EXISTS document_audit (
                run_id TEXT NOT NULL,
                source_ref TEXT NOT NULL,
                fingerprint TEXT,
                fingerprint_status TEXT NOT NULL,
                fired_rule TEXT NOT NULL,
                audit_json TEXT NOT NULL,
                PRIMARY KEY (run_id, source_ref)
            );
            CREATE INDEX IF NOT EXISTS idx_document_audit_fingerprint
                ON document_audit(fingerprint);

            CREATE TABLE IF NOT EXISTS seen_fingerprints (
                fingerprint TEXT PRIMARY KEY,
                first_seen_run TEXT NOT NULL,
                last_seen_run TEXT NOT NULL,
                present INTEGER NOT NULL
            );
        "#,
    },
];

/// Run all pending migrations against the given connection.
///
/// Creates the `_migrations` table if it doesn't exist.
pub async fn run_migrations(conn: &Connection) -> Result<(), DatabaseError> {
    conn.execute(
        "CREATE TABLE IF NOT EXISTS _migrations (
            version INTEGER PRIMARY KEY,
            name TEXT NOT NULL,
            applied_at TEXT NOT NULL DEFAULT (datetime('now'))
        )",
        (),
    )
    .await
    .map_err(|e| DatabaseError::Migration(format!("Failed to create _migrations table: {e}")))?;

    let current_version = get_current_version(conn).await?;

    for migration in MIGRATIONS {
        if migration.version > current_version {
            tracing::info!(
                version = migration.version,
                name = migration.name,
                "Applying migration"
            );
            conn.execute_batch(migration.sql).await.map_err(|e| {
                DatabaseError::Migration(format!(
                    "Migration V{} ({}) failed: {e}",
                    migration.version, migration.name
                ))
            })?;
            seed_version(conn, migration.version, migration.name).await?;
        }
    }

    let version = get_current_version(conn).await?;
    tracing::debug!(version, "Database migrations complete");

    Ok(())
}

/// Get the highest applied migration version, or 0 if none.
async fn get_current_version(conn: &Connection) -> Result<i64, DatabaseError> {
    let mut rows = conn
        .query("SELECT COALESCE(MAX(version), 0) FROM _migrations", ())
        .await
        .map_err(|e| DatabaseError::Migration(format!("Failed to query migration version: {e}")))?;

    let row = rows
        .next()
        .await
        .map_err(|e| DatabaseError::Migration(format!("Failed to read migration version: {e}")))?;

    match row {
        Some(row) => {
            let version: i64 = row.get(0).map_err(|e| {
                DatabaseError::Migration(format!("Failed to parse migration version: {e}"))
            })?;
            Ok(version)
        }
        None => Ok(0),
    }
}

/// Insert a version record into `_migrations`.
async fn seed_version(conn: &Connection, version: i64, name: &str) -> Result<(), DatabaseError> {
    conn.execute(
        "INSERT OR IGNORE INTO _migrations (version, name) VALUES (?1, ?2)",
        libsql::params![version, name],
    )
    .await
    .map_err(|e| DatabaseError::Migration(format!("Failed to record migration V{version}: {e}")))?;
    Ok(())
}
