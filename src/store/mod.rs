//! Persistence layer: libSQL-backed storage for the worklist, its history,
//! the audit trail and the seen-fingerprint snapshot.

pub mod libsql_backend;
pub mod migrations;
pub mod traits;

pub use libsql_backend::LibSqlBackend;
pub use traits::{ActionChange, RunDelta, RunRecord, WorklistStore};
