//! Invoice decision pipeline.
//!
//! Every inbound attachment flows through:
//! 1. `fingerprint`: content identity and the seen-fingerprint ledger
//! 2. `po_extract`: PO reference patterns over the text layer
//! 3. `po_validate`: classification against the PO master snapshot
//! 4. `values`: gross/net/VAT extraction, median estimates for the rest
//! 5. `worklist`: ordered rule table, one action per document
//!
//! `runner` composes the stages into one pure run over a batch.

pub mod fingerprint;
pub mod po_extract;
pub mod po_validate;
pub mod runner;
pub mod types;
pub mod values;
pub mod worklist;
