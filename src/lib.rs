//! Invoice worklist: deterministic decision pipeline over inbound invoices.

pub mod batch;
pub mod config;
pub mod error;
pub mod ingest;
pub mod master;
pub mod pipeline;
pub mod report;
pub mod store;
