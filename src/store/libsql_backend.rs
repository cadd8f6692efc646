//! libSQL backend: async `WorklistStore` implementation.
//!
//! Supports local file and in-memory databases. Rows and audit records are
//! stored both as queryable columns and as their JSON form; reads go
//! through the JSON so a row comes back exactly as it was written.

use std::collections::BTreeMap;
use std::path::Path;
use std::str::FromStr;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use libsql::{params, Connection, Database as LibSqlDatabase};
use rust_decimal::Decimal;
use serde::de::DeserializeOwned;
use tracing::{debug, info};

use crate::error::DatabaseError;
use crate::pipeline::fingerprint::{FingerprintSnapshot, SeenFingerprint};
use crate::pipeline::runner::RunOutput;
use crate::pipeline::types::{AuditRecord, Fingerprint, FingerprintStatus, WorklistRow};
use crate::pipeline::values::{ObservedValues, ValuePopulation};
use crate::store::migrations;
use crate::store::traits::{ActionChange, RunDelta, RunRecord, WorklistStore};

/// libSQL database backend.
///
/// Stores a single connection that is reused for all operations.
pub struct LibSqlBackend {
    #[allow(dead_code)]
    db: Arc<LibSqlDatabase>,
    conn: Connection,
}

impl LibSqlBackend {
    /// Open (or create) a local database file and run migrations.
    pub async fn new_local(path: &Path) -> Result<Self, DatabaseError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| {
                DatabaseError::Pool(format!("Failed to create database directory: {e}"))
            })?;
        }

        let db = libsql::Builder::new_local(path)
            .build()
            .await
            .map_err(|e| DatabaseError::Pool(format!("Failed to open libSQL database: {e}")))?;

        let conn = db
            .connect()
            .map_err(|e| DatabaseError::Pool(format!("Failed to create connection: {e}")))?;

        let backend = Self {
            db: Arc::new(db),
            conn,
        };
        backend.run_migrations().await?;
        info!(path = %path.display(), "Database opened");
        Ok(backend)
    }

    /// Create an in-memory database (for tests).
    pub async fn new_memory() -> Result<Self, DatabaseError> {
        let db = libsql::Builder::new_local(":memory:")
            .build()
            .await
            .map_err(|e| {
                DatabaseError::Pool(format!("Failed to create in-memory database: {e}"))
            })?;

        let conn = db
            .connect()
            .map_err(|e| DatabaseError::Pool(format!("Failed to create connection: {e}")))?;

        let backend = Self {
            db: Arc::new(db),
            conn,
        };
        backend.run_migrations().await?;
        Ok(backend)
    }

    /// Get the connection.
    fn conn(&self) -> &Connection {
        &self.conn
    }

    async fn run_seq(&self, run_id: &str) -> Result<Option<i64>, DatabaseError> {
        let mut rows = self
            .conn()
            .query(
                "SELECT seq FROM pipeline_runs WHERE run_id = ?1",
                params![run_id],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("run_seq: {e}")))?;

        match rows.next().await {
            Ok(Some(row)) => Ok(Some(
                row.get::<i64>(0)
                    .map_err(|e| DatabaseError::Query(format!("run_seq row parse: {e}")))?,
            )),
            Ok(None) => Ok(None),
            Err(e) => Err(DatabaseError::Query(format!("run_seq: {e}"))),
        }
    }
}

// ── Helper functions ────────────────────────────────────────────────

/// Parse an RFC 3339 or SQLite datetime string into DateTime<Utc>.
fn parse_datetime(s: &str) -> DateTime<Utc> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return dt.with_timezone(&Utc);
    }
    if let Ok(ndt) = chrono::NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S") {
        return ndt.and_utc();
    }
    DateTime::<Utc>::MIN_UTC
}

/// Convert `Option<&str>` to libsql Value.
fn opt_text(s: Option<&str>) -> libsql::Value {
    match s {
        Some(s) => libsql::Value::Text(s.to_string()),
        None => libsql::Value::Null,
    }
}

/// Money is stored as decimal TEXT.
fn opt_decimal(d: Option<Decimal>) -> libsql::Value {
    match d {
        Some(d) => libsql::Value::Text(d.to_string()),
        None => libsql::Value::Null,
    }
}

fn parse_decimal(s: Option<String>) -> Option<Decimal> {
    s.and_then(|s| Decimal::from_str(&s).ok())
}

fn to_json<T: serde::Serialize>(value: &T, what: &str) -> Result<String, DatabaseError> {
    serde_json::to_string(value)
        .map_err(|e| DatabaseError::Serialization(format!("{what}: {e}")))
}

/// Collect a single JSON column from every row.
async fn collect_json<T: DeserializeOwned>(
    mut rows: libsql::Rows,
    op: &str,
) -> Result<Vec<T>, DatabaseError> {
    let mut out = Vec::new();
    while let Some(row) = rows
        .next()
        .await
        .map_err(|e| DatabaseError::Query(format!("{op}: {e}")))?
    {
        let json: String = row
            .get(0)
            .map_err(|e| DatabaseError::Query(format!("{op} row parse: {e}")))?;
        let value = serde_json::from_str(&json)
            .map_err(|e| DatabaseError::Serialization(format!("{op}: {e}")))?;
        out.push(value);
    }
    Ok(out)
}

/// Every write of one run. Runs inside the caller's transaction.
async fn write_run(
    conn: &Connection,
    output: &RunOutput,
    generated_at: DateTime<Utc>,
) -> Result<(), DatabaseError> {
    let run_id = output.run_id.as_str();
    let summary = &output.summary;

    conn.execute(
        "INSERT INTO pipeline_runs (run_id, generated_at, documents, new_documents, reappeared, duplicates, unreadable, ready_to_post) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
        params![
            run_id,
            generated_at.to_rfc3339(),
            summary.documents as i64,
            summary.new as i64,
            summary.reappeared as i64,
            summary.duplicates as i64,
            summary.unreadable as i64,
            summary.ready_to_post as i64,
        ],
    )
    .await
    .map_err(|e| DatabaseError::Query(format!("insert pipeline_run: {e}")))?;

    // ── Worklist: full replace + append-only history ────────────────

    conn.execute("DELETE FROM invoice_worklist", ())
        .await
        .map_err(|e| DatabaseError::Query(format!("clear invoice_worklist: {e}")))?;

    for (position, row) in output.rows.iter().enumerate() {
        let row_json = to_json(row, "worklist row")?;
        let fingerprint = row.fingerprint.as_ref().map(Fingerprint::as_str);

        conn.execute(
            "INSERT INTO invoice_worklist (position, run_id, source_ref, fingerprint, ready_to_post, next_action, action_reason, priority, gross, matched_po, sender_domain, attachment_name, row_json) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)",
            params![
                position as i64,
                run_id,
                row.source_ref.as_str(),
                opt_text(fingerprint),
                row.ready_to_post as i64,
                row.action.as_str(),
                row.reason.as_str(),
                row.priority as i64,
                opt_decimal(row.values.gross.map(|v| v.amount)),
                opt_text(row.matched_po.as_deref()),
                opt_text(row.sender_domain.as_deref()),
                row.attachment_name.as_str(),
                row_json.as_str(),
            ],
        )
        .await
        .map_err(|e| DatabaseError::Query(format!("insert invoice_worklist: {e}")))?;

        conn.execute(
            "INSERT INTO invoice_worklist_history (run_id, position, source_ref, fingerprint, next_action, action_reason, priority, row_json) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            params![
                run_id,
                position as i64,
                row.source_ref.as_str(),
                opt_text(fingerprint),
                row.action.as_str(),
                row.reason.as_str(),
                row.priority as i64,
                row_json.as_str(),
            ],
        )
        .await
        .map_err(|e| DatabaseError::Query(format!("insert invoice_worklist_history: {e}")))?;
    }

    // ── Documents, PO refs and audit ────────────────────────────────

    let attachment_names: BTreeMap<&str, &str> = output
        .rows
        .iter()
        .map(|r| (r.source_ref.as_str(), r.attachment_name.as_str()))
        .collect();

    for audit in &output.audits {
        conn.execute(
            "INSERT INTO document_audit (run_id, source_ref, fingerprint, fingerprint_status, fired_rule, audit_json) VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                run_id,
                audit.source_ref.as_str(),
                opt_text(audit.fingerprint.as_ref().map(Fingerprint::as_str)),
                audit.fingerprint_status.as_str(),
                audit.fired_rule.as_str(),
                to_json(audit, "audit record")?,
            ],
        )
        .await
        .map_err(|e| DatabaseError::Query(format!("insert document_audit: {e}")))?;

        let Some(fp) = &audit.fingerprint else {
            continue;
        };
        if audit.fingerprint_status == FingerprintStatus::Duplicate {
            continue;
        }

        let observed = ObservedValues::from(&audit.values);
        conn.execute(
            "INSERT INTO documents (fingerprint, source_ref, attachment_name, value_rule, gross, net, vat, first_seen_run, last_seen_run) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?8)
             ON CONFLICT(fingerprint) DO UPDATE SET
                source_ref = excluded.source_ref,
                attachment_name = excluded.attachment_name,
                value_rule = excluded.value_rule,
                gross = excluded.gross,
                net = excluded.net,
                vat = excluded.vat,
                last_seen_run = excluded.last_seen_run",
            params![
                fp.as_str(),
                audit.source_ref.as_str(),
                attachment_names
                    .get(audit.source_ref.as_str())
                    .copied()
                    .unwrap_or_default(),
                audit.values.rule.as_str(),
                opt_decimal(observed.gross),
                opt_decimal(observed.net),
                opt_decimal(observed.vat),
                run_id,
            ],
        )
        .await
        .map_err(|e| DatabaseError::Query(format!("upsert document: {e}")))?;

        conn.execute(
            "DELETE FROM document_po_refs WHERE fingerprint = ?1",
            params![fp.as_str()],
        )
        .await
        .map_err(|e| DatabaseError::Query(format!("clear document_po_refs: {e}")))?;

        for po_ref in &audit.po_refs {
            conn.execute(
                "INSERT INTO document_po_refs (fingerprint, po_number, rule, position) VALUES (?1, ?2, ?3, ?4)",
                params![
                    fp.as_str(),
                    po_ref.number.as_str(),
                    po_ref.rule.as_str(),
                    po_ref.position as i64,
                ],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("insert document_po_ref: {e}")))?;
        }
    }

    // ── Seen-fingerprint snapshot: full replace ─────────────────────

    conn.execute("DELETE FROM seen_fingerprints", ())
        .await
        .map_err(|e| DatabaseError::Query(format!("clear seen_fingerprints: {e}")))?;

    for (fp, seen) in &output.fingerprints {
        conn.execute(
            "INSERT INTO seen_fingerprints (fingerprint, first_seen_run, last_seen_run, present) VALUES (?1, ?2, ?3, ?4)",
            params![
                fp.as_str(),
                seen.first_seen_run.as_str(),
                seen.last_seen_run.as_str(),
                seen.present as i64,
            ],
        )
        .await
        .map_err(|e| DatabaseError::Query(format!("insert seen_fingerprint: {e}")))?;
    }

    Ok(())
}

// ── Trait implementation ────────────────────────────────────────────

const RUN_COLUMNS: &str = "run_id, generated_at, documents, new_documents, reappeared, duplicates, unreadable, ready_to_post";

fn row_to_run(row: &libsql::Row) -> Result<RunRecord, libsql::Error> {
    let generated_at: String = row.get(1)?;
    Ok(RunRecord {
        run_id: row.get(0)?,
        generated_at: parse_datetime(&generated_at),
        documents: row.get::<i64>(2)? as usize,
        new_documents: row.get::<i64>(3)? as usize,
        reappeared: row.get::<i64>(4)? as usize,
        duplicates: row.get::<i64>(5)? as usize,
        unreadable: row.get::<i64>(6)? as usize,
        ready_to_post: row.get::<i64>(7)? as usize,
    })
}

#[async_trait]
impl WorklistStore for LibSqlBackend {
    async fn run_migrations(&self) -> Result<(), DatabaseError> {
        migrations::run_migrations(self.conn()).await
    }

    // ── Run inputs ──────────────────────────────────────────────────

    async fn load_fingerprint_snapshot(&self) -> Result<FingerprintSnapshot, DatabaseError> {
        let mut rows = self
            .conn()
            .query(
                "SELECT fingerprint, first_seen_run, last_seen_run, present FROM seen_fingerprints",
                (),
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("load_fingerprint_snapshot: {e}")))?;

        let mut snapshot = FingerprintSnapshot::new();
        while let Some(row) = rows
            .next()
            .await
            .map_err(|e| DatabaseError::Query(format!("load_fingerprint_snapshot: {e}")))?
        {
            let parse = |e: libsql::Error| {
                DatabaseError::Query(format!("load_fingerprint_snapshot row parse: {e}"))
            };
            let fp: String = row.get(0).map_err(parse)?;
            snapshot.insert(
                Fingerprint::from_hex(fp),
                SeenFingerprint {
                    first_seen_run: row.get(1).map_err(parse)?,
                    last_seen_run: row.get(2).map_err(parse)?,
                    present: row.get::<i64>(3).map_err(parse)? != 0,
                },
            );
        }

        debug!(fingerprints = snapshot.len(), "Loaded fingerprint snapshot");
        Ok(snapshot)
    }

    async fn load_value_history(&self) -> Result<ValuePopulation, DatabaseError> {
        let mut rows = self
            .conn()
            .query("SELECT fingerprint, gross, net, vat FROM documents", ())
            .await
            .map_err(|e| DatabaseError::Query(format!("load_value_history: {e}")))?;

        let mut history = Vec::new();
        while let Some(row) = rows
            .next()
            .await
            .map_err(|e| DatabaseError::Query(format!("load_value_history: {e}")))?
        {
            let parse =
                |e: libsql::Error| DatabaseError::Query(format!("load_value_history row parse: {e}"));
            let fp: String = row.get(0).map_err(parse)?;
            history.push((
                Fingerprint::from_hex(fp),
                ObservedValues {
                    gross: parse_decimal(row.get(1).map_err(parse)?),
                    net: parse_decimal(row.get(2).map_err(parse)?),
                    vat: parse_decimal(row.get(3).map_err(parse)?),
                },
            ));
        }

        let population = ValuePopulation::from_history(history);
        debug!(documents = population.len(), "Loaded value history");
        Ok(population)
    }

    // ── Run output ──────────────────────────────────────────────────

    async fn commit_run(
        &self,
        output: &RunOutput,
        generated_at: DateTime<Utc>,
    ) -> Result<(), DatabaseError> {
        let tx = self
            .conn()
            .transaction()
            .await
            .map_err(|e| DatabaseError::Query(format!("commit_run begin: {e}")))?;

        if let Err(e) = write_run(&tx, output, generated_at).await {
            if let Err(rollback) = tx.rollback().await {
                tracing::warn!(error = %rollback, "Rollback failed");
            }
            return Err(e);
        }

        tx.commit()
            .await
            .map_err(|e| DatabaseError::Query(format!("commit_run commit: {e}")))?;

        info!(
            run_id = %output.run_id,
            rows = output.rows.len(),
            fingerprints = output.fingerprints.len(),
            "Run committed"
        );
        Ok(())
    }

    // ── Queries ─────────────────────────────────────────────────────

    async fn current_worklist(&self) -> Result<Vec<WorklistRow>, DatabaseError> {
        let rows = self
            .conn()
            .query(
                "SELECT row_json FROM invoice_worklist ORDER BY position ASC",
                (),
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("current_worklist: {e}")))?;
        collect_json(rows, "current_worklist").await
    }

    async fn worklist_history(&self, run_id: &str) -> Result<Vec<WorklistRow>, DatabaseError> {
        let rows = self
            .conn()
            .query(
                "SELECT row_json FROM invoice_worklist_history WHERE run_id = ?1 ORDER BY position ASC",
                params![run_id],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("worklist_history: {e}")))?;
        collect_json(rows, "worklist_history").await
    }

    async fn audit_for(&self, fingerprint: &Fingerprint) -> Result<Vec<AuditRecord>, DatabaseError> {
        let rows = self
            .conn()
            .query(
                "SELECT a.audit_json
                 FROM document_audit a
                 JOIN pipeline_runs r ON r.run_id = a.run_id
                 WHERE a.fingerprint = ?1
                   AND r.seq = (
                       SELECT MAX(r2.seq)
                       FROM document_audit a2
                       JOIN pipeline_runs r2 ON r2.run_id = a2.run_id
                       WHERE a2.fingerprint = ?1
                   )
                 ORDER BY a.source_ref ASC",
                params![fingerprint.as_str()],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("audit_for: {e}")))?;
        collect_json(rows, "audit_for").await
    }

    async fn list_runs(&self, limit: usize) -> Result<Vec<RunRecord>, DatabaseError> {
        let mut rows = self
            .conn()
            .query(
                &format!("SELECT {RUN_COLUMNS} FROM pipeline_runs ORDER BY seq DESC LIMIT ?1"),
                params![limit as i64],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("list_runs: {e}")))?;

        let mut runs = Vec::new();
        while let Some(row) = rows
            .next()
            .await
            .map_err(|e| DatabaseError::Query(format!("list_runs: {e}")))?
        {
            runs.push(
                row_to_run(&row)
                    .map_err(|e| DatabaseError::Query(format!("list_runs row parse: {e}")))?,
            );
        }
        Ok(runs)
    }

    async fn run_delta(&self, run_id: &str) -> Result<RunDelta, DatabaseError> {
        let Some(seq) = self.run_seq(run_id).await? else {
            return Err(DatabaseError::Query(format!("run_delta: unknown run {run_id}")));
        };

        let mut rows = self
            .conn()
            .query(
                "SELECT run_id FROM pipeline_runs WHERE seq < ?1 ORDER BY seq DESC LIMIT 1",
                params![seq],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("run_delta: {e}")))?;
        let previous_run_id: Option<String> = match rows.next().await {
            Ok(Some(row)) => Some(
                row.get(0)
                    .map_err(|e| DatabaseError::Query(format!("run_delta row parse: {e}")))?,
            ),
            Ok(None) => None,
            Err(e) => return Err(DatabaseError::Query(format!("run_delta: {e}"))),
        };

        let current = self.worklist_history(run_id).await?;
        let previous = match &previous_run_id {
            Some(id) => self.worklist_history(id).await?,
            None => Vec::new(),
        };

        let before: BTreeMap<&str, _> = previous
            .iter()
            .map(|r| (r.source_ref.as_str(), r.action))
            .collect();
        let after: BTreeMap<&str, _> = current
            .iter()
            .map(|r| (r.source_ref.as_str(), r.action))
            .collect();

        let mut delta = RunDelta {
            run_id: run_id.to_string(),
            previous_run_id,
            ..RunDelta::default()
        };
        for (source_ref, action) in &after {
            match before.get(source_ref) {
                None => delta.added.push(source_ref.to_string()),
                Some(previous) if previous != action => delta.changed.push(ActionChange {
                    source_ref: source_ref.to_string(),
                    previous: *previous,
                    current: *action,
                }),
                Some(_) => delta.unchanged += 1,
            }
        }
        delta.removed = before
            .keys()
            .filter(|k| !after.contains_key(*k))
            .map(|k| k.to_string())
            .collect();

        Ok(delta)
    }
}

#[cfg(test)]
mod tests {
    use rust_decimal_macros::dec;

    use super::*;
    use crate::config::RuleConfig;
    use crate::pipeline::runner::{run_pipeline, RunInput};
    use crate::pipeline::types::{
        AttachmentPayload, InboundDocument, MessageMeta, NextAction, PoMaster, PoMasterRecord,
        PoStatus,
    };

    async fn test_db() -> LibSqlBackend {
        LibSqlBackend::new_memory().await.unwrap()
    }

    fn master() -> PoMaster {
        PoMaster::from_records([PoMasterRecord {
            po_number: "PO-10045".into(),
            supplier_account: None,
            status: PoStatus::Open,
            remaining_value: Some(dec!(5000.00)),
        }])
    }

    fn doc(source_ref: &str, bytes: &[u8], text: &str) -> InboundDocument {
        InboundDocument {
            source_ref: source_ref.into(),
            payload: AttachmentPayload::Bytes {
                data: bytes.to_vec(),
            },
            text: text.into(),
            meta: MessageMeta {
                attachment_name: format!("{}.pdf", source_ref.replace('/', "_")),
                ..MessageMeta::default()
            },
        }
    }

    async fn run_and_commit(
        db: &LibSqlBackend,
        run_id: &str,
        documents: Vec<InboundDocument>,
    ) -> RunOutput {
        let master = master();
        let rules = RuleConfig::default();
        let output = run_pipeline(RunInput {
            run_id: run_id.into(),
            documents,
            master: &master,
            fingerprints: db.load_fingerprint_snapshot().await.unwrap(),
            value_history: db.load_value_history().await.unwrap(),
            rules: &rules,
        })
        .unwrap();
        db.commit_run(&output, Utc::now()).await.unwrap();
        output
    }

    #[tokio::test]
    async fn fresh_store_is_empty() {
        let db = test_db().await;
        assert!(db.load_fingerprint_snapshot().await.unwrap().is_empty());
        assert!(db.load_value_history().await.unwrap().is_empty());
        assert!(db.current_worklist().await.unwrap().is_empty());
        assert!(db.list_runs(10).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn commit_and_read_back() {
        let db = test_db().await;
        let output = run_and_commit(
            &db,
            "run-1",
            vec![
                doc("M1/01", b"a", "PO 10045\nTotal: 4,800.00"),
                doc("M2/01", b"b", "no po\nTotal: 10.00"),
            ],
        )
        .await;

        assert_eq!(db.current_worklist().await.unwrap(), output.rows);
        assert_eq!(db.worklist_history("run-1").await.unwrap(), output.rows);
        assert_eq!(db.load_fingerprint_snapshot().await.unwrap(), output.fingerprints);

        let history = db.load_value_history().await.unwrap();
        assert_eq!(history.len(), 2);
        assert_eq!(history.median(crate::pipeline::types::ValueField::Gross), Some(dec!(2405.00)));

        let runs = db.list_runs(10).await.unwrap();
        assert_eq!(runs.len(), 1);
        assert_eq!(runs[0].run_id, "run-1");
        assert_eq!(runs[0].documents, 2);
        assert_eq!(runs[0].ready_to_post, 1);
    }

    #[tokio::test]
    async fn worklist_is_replaced_and_history_appended() {
        let db = test_db().await;
        run_and_commit(&db, "run-1", vec![doc("M1/01", b"a", "PO 10045\nTotal: 1.00")]).await;
        let second = run_and_commit(&db, "run-2", vec![doc("M2/01", b"b", "PO 10045\nTotal: 2.00")]).await;

        let current = db.current_worklist().await.unwrap();
        assert_eq!(current, second.rows);
        assert_eq!(db.worklist_history("run-1").await.unwrap().len(), 1);
        assert_eq!(db.worklist_history("run-2").await.unwrap().len(), 1);

        let snapshot = db.load_fingerprint_snapshot().await.unwrap();
        assert_eq!(snapshot.len(), 2);
        assert_eq!(snapshot.values().filter(|s| s.present).count(), 1);

        let runs = db.list_runs(1).await.unwrap();
        assert_eq!(runs.len(), 1);
        assert_eq!(runs[0].run_id, "run-2");
    }

    #[tokio::test]
    async fn audit_covers_original_and_duplicate() {
        let db = test_db().await;
        let output = run_and_commit(
            &db,
            "run-1",
            vec![
                doc("M1/01", b"same", "PO 10045\nTotal: 5.00"),
                doc("M2/01", b"same", "PO 10045\nTotal: 5.00"),
            ],
        )
        .await;
        let fp = output.rows[0].fingerprint.clone().unwrap();

        let audits = db.audit_for(&fp).await.unwrap();
        assert_eq!(audits.len(), 2);
        assert_eq!(audits[0].fingerprint_status, FingerprintStatus::New);
        assert_eq!(audits[0].fired_rule, "clean");
        assert_eq!(audits[1].fingerprint_status, FingerprintStatus::Duplicate);
        assert_eq!(audits[1].fired_rule, "duplicate");

        let unknown = Fingerprint::from_hex("00");
        assert!(db.audit_for(&unknown).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn run_delta_reports_action_changes() {
        let db = test_db().await;
        run_and_commit(
            &db,
            "run-1",
            vec![
                doc("M1/01", b"a", "no reference\nTotal: 1.00"),
                doc("M2/01", b"b", "PO 10045\nTotal: 2.00"),
            ],
        )
        .await;
        run_and_commit(
            &db,
            "run-2",
            vec![
                doc("M1/01", b"a2", "PO 10045\nTotal: 1.00"),
                doc("M3/01", b"c", "PO 10045\nTotal: 3.00"),
            ],
        )
        .await;

        let first = db.run_delta("run-1").await.unwrap();
        assert_eq!(first.previous_run_id, None);
        assert_eq!(first.added.len(), 2);

        let delta = db.run_delta("run-2").await.unwrap();
        assert_eq!(delta.previous_run_id.as_deref(), Some("run-1"));
        assert_eq!(delta.added, vec!["M3/01".to_string()]);
        assert_eq!(delta.removed, vec!["M2/01".to_string()]);
        assert_eq!(
            delta.changed,
            vec![ActionChange {
                source_ref: "M1/01".into(),
                previous: NextAction::RequestPoFromVendor,
                current: NextAction::Post,
            }]
        );
        assert_eq!(delta.unchanged, 0);

        assert!(db.run_delta("run-404").await.is_err());
    }

    #[tokio::test]
    async fn rerun_is_byte_identical() {
        let db = test_db().await;
        let docs = vec![
            doc("M1/01", b"a", "PO 10045\nTotal: 100.00"),
            doc("M2/01", b"b", "PO 10045\nno total"),
        ];
        let first = run_and_commit(&db, "run-1", docs.clone()).await;
        let second = run_and_commit(&db, "run-2", docs).await;

        assert_eq!(
            serde_json::to_string(&first.rows).unwrap(),
            serde_json::to_string(&second.rows).unwrap()
        );
        assert_eq!(
            serde_json::to_string(&db.current_worklist().await.unwrap()).unwrap(),
            serde_json::to_string(&first.rows).unwrap()
        );
        assert!(db.run_delta("run-2").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn file_store_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("worklist.db");
        {
            let db = LibSqlBackend::new_local(&path).await.unwrap();
            run_and_commit(&db, "run-1", vec![doc("M1/01", b"a", "PO 10045\nTotal: 1.00")]).await;
        }
        let db = LibSqlBackend::new_local(&path).await.unwrap();
        assert_eq!(db.current_worklist().await.unwrap().len(), 1);
        assert_eq!(db.load_fingerprint_snapshot().await.unwrap().len(), 1);
    }
}
