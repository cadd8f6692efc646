//! Content fingerprints and the seen-fingerprint ledger.
//!
//! A fingerprint is the SHA-256 of the attachment bytes, so the same PDF
//! saved under two names, or delivered twice, gets one identity. The ledger
//! is the persisted set of fingerprints from earlier scans: loaded before a
//! run, consulted per document, and handed back as the next snapshot.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::debug;

use crate::error::DocumentError;
use crate::pipeline::types::{AttachmentPayload, Fingerprint, FingerprintStatus, InboundDocument};

/// Digest raw bytes. Pure and stable across runs.
pub fn fingerprint(bytes: &[u8]) -> Fingerprint {
    Fingerprint::from_hex(hex::encode(Sha256::digest(bytes)))
}

/// Fingerprint a document's attachment.
///
/// Fails with `UnreadableDocument` when ingestion could not read the bytes
/// or the byte stream is empty.
pub fn fingerprint_document(doc: &InboundDocument) -> Result<Fingerprint, DocumentError> {
    match &doc.payload {
        AttachmentPayload::Bytes { data } if data.is_empty() => {
            Err(DocumentError::UnreadableDocument {
                source_ref: doc.source_ref.clone(),
                reason: "empty byte stream".into(),
            })
        }
        AttachmentPayload::Bytes { data } => Ok(fingerprint(data)),
        AttachmentPayload::Unreadable { reason } => Err(DocumentError::UnreadableDocument {
            source_ref: doc.source_ref.clone(),
            reason: reason.clone(),
        }),
    }
}

/// Persisted state for one fingerprint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SeenFingerprint {
    pub first_seen_run: String,
    pub last_seen_run: String,
    /// Whether the fingerprint was present in the most recent scan.
    pub present: bool,
}

/// Snapshot of every fingerprint ever seen.
pub type FingerprintSnapshot = BTreeMap<Fingerprint, SeenFingerprint>;

/// Seen-fingerprint set for the duration of one run.
#[derive(Debug)]
pub struct FingerprintLedger {
    run_id: String,
    entries: FingerprintSnapshot,
    seen_this_run: BTreeSet<Fingerprint>,
}

impl FingerprintLedger {
    /// Start a run against the snapshot left by the previous one.
    pub fn from_snapshot(snapshot: FingerprintSnapshot, run_id: impl Into<String>) -> Self {
        Self {
            run_id: run_id.into(),
            entries: snapshot,
            seen_this_run: BTreeSet::new(),
        }
    }

    /// Classify a fingerprint and record it as seen in this run.
    ///
    /// The first occurrence in the run is `New`, or `Reappeared` when the
    /// previous scan did not contain it. Every later occurrence is `Duplicate`.
    pub fn classify(&mut self, fp: &Fingerprint) -> FingerprintStatus {
        if !self.seen_this_run.insert(fp.clone()) {
            debug!(fingerprint = fp.short(), "Duplicate of a document earlier in this scan");
            return FingerprintStatus::Duplicate;
        }

        match self.entries.get_mut(fp) {
            Some(entry) => {
                let status = if entry.present {
                    FingerprintStatus::New
                } else {
                    debug!(fingerprint = fp.short(), "Fingerprint reappeared after being absent");
                    FingerprintStatus::Reappeared
                };
                entry.last_seen_run = self.run_id.clone();
                entry.present = true;
                status
            }
            None => {
                self.entries.insert(
                    fp.clone(),
                    SeenFingerprint {
                        first_seen_run: self.run_id.clone(),
                        last_seen_run: self.run_id.clone(),
                        present: true,
                    },
                );
                FingerprintStatus::New
            }
        }
    }

    /// Close the run: anything not seen in this scan becomes absent.
    pub fn finish_run(mut self) -> FingerprintSnapshot {
        for (fp, entry) in self.entries.iter_mut() {
            if !self.seen_this_run.contains(fp) {
                entry.present = false;
            }
        }
        self.entries
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::types::MessageMeta;

    fn doc(source_ref: &str, payload: AttachmentPayload) -> InboundDocument {
        InboundDocument {
            source_ref: source_ref.into(),
            payload,
            text: "Invoice".into(),
            meta: MessageMeta::default(),
        }
    }

    #[test]
    fn fingerprint_is_deterministic() {
        let a = fingerprint(b"%PDF-1.7 invoice 1001");
        let b = fingerprint(b"%PDF-1.7 invoice 1001");
        assert_eq!(a, b);
        assert_eq!(a.as_str().len(), 64);
        assert!(a.as_str().chars().all(|c| c.is_ascii_hexdigit() && !c.is_ascii_uppercase()));
    }

    #[test]
    fn different_bytes_different_fingerprint() {
        assert_ne!(fingerprint(b"invoice A"), fingerprint(b"invoice B"));
    }

    #[test]
    fn known_sha256_vector() {
        assert_eq!(
            fingerprint(b"abc").as_str(),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }

    #[test]
    fn filename_does_not_affect_fingerprint() {
        let bytes = b"%PDF-1.4 same bytes".to_vec();
        let mut a = doc("MSG-1/01", AttachmentPayload::Bytes { data: bytes.clone() });
        a.meta.attachment_name = "INV-1001.pdf".into();
        let mut b = doc("MSG-2/01", AttachmentPayload::Bytes { data: bytes });
        b.meta.attachment_name = "copy of invoice.pdf".into();
        assert_eq!(
            fingerprint_document(&a).unwrap(),
            fingerprint_document(&b).unwrap()
        );
    }

    #[test]
    fn unreadable_payloads_fail() {
        let empty = doc("MSG-1/01", AttachmentPayload::Bytes { data: vec![] });
        assert!(matches!(
            fingerprint_document(&empty),
            Err(DocumentError::UnreadableDocument { .. })
        ));

        let broken = doc(
            "MSG-1/02",
            AttachmentPayload::Unreadable {
                reason: "permission denied".into(),
            },
        );
        match fingerprint_document(&broken) {
            Err(DocumentError::UnreadableDocument { source_ref, reason }) => {
                assert_eq!(source_ref, "MSG-1/02");
                assert_eq!(reason, "permission denied");
            }
            other => panic!("expected UnreadableDocument, got {other:?}"),
        }
    }

    #[test]
    fn second_copy_in_same_run_is_duplicate() {
        let fp = fingerprint(b"bytes");
        let mut ledger = FingerprintLedger::from_snapshot(FingerprintSnapshot::new(), "run-1");
        assert_eq!(ledger.classify(&fp), FingerprintStatus::New);
        assert_eq!(ledger.classify(&fp), FingerprintStatus::Duplicate);
    }

    #[test]
    fn still_present_document_stays_new_across_runs() {
        let fp = fingerprint(b"bytes");
        let mut first = FingerprintLedger::from_snapshot(FingerprintSnapshot::new(), "run-1");
        first.classify(&fp);
        let snapshot = first.finish_run();

        let mut second = FingerprintLedger::from_snapshot(snapshot, "run-2");
        assert_eq!(second.classify(&fp), FingerprintStatus::New);
        let snapshot = second.finish_run();
        assert_eq!(snapshot[&fp].first_seen_run, "run-1");
        assert_eq!(snapshot[&fp].last_seen_run, "run-2");
    }

    #[test]
    fn absent_then_back_is_reappeared() {
        let fp = fingerprint(b"bytes");
        let mut run1 = FingerprintLedger::from_snapshot(FingerprintSnapshot::new(), "run-1");
        run1.classify(&fp);
        let run2 = FingerprintLedger::from_snapshot(run1.finish_run(), "run-2");
        let snapshot = run2.finish_run();
        assert!(!snapshot[&fp].present);

        let mut run3 = FingerprintLedger::from_snapshot(snapshot, "run-3");
        assert_eq!(run3.classify(&fp), FingerprintStatus::Reappeared);
        assert!(run3.finish_run()[&fp].present);
    }
}
