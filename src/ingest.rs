//! Inbox feed adapter.
//!
//! Reads a JSON export of mailbox messages (`inbox.json`) whose PDF
//! attachments live in a sibling directory, and turns every PDF attachment
//! into an [`InboundDocument`]. The PDF text layer is not parsed here: it
//! comes from an inline `text` field on the attachment or a `.txt` sidecar
//! next to the PDF.
//!
//! ```json
//! [
//!   {
//!     "message_id": "MSG-0001",
//!     "folder_path": "Inbox",
//!     "received_datetime": "2026-03-02T09:15:00Z",
//!     "sender_address": "ap@supplier.example",
//!     "subject": "Invoice INV-1001",
//!     "attachments": [
//!       { "file_name": "INV-1001.pdf", "source_file": "INV-1001.pdf" }
//!     ]
//!   }
//! ]
//! ```

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use chrono::{DateTime, NaiveDateTime, Utc};
use serde::Deserialize;
use tracing::{debug, info, warn};

use crate::config::PipelineConfig;
use crate::error::IngestError;
use crate::pipeline::types::{AttachmentPayload, InboundDocument, MessageMeta};

const DEFAULT_FOLDER: &str = "Inbox";

#[derive(Debug, Deserialize)]
struct FeedMessage {
    #[serde(default)]
    message_id: Option<String>,
    #[serde(default)]
    folder_path: Option<String>,
    #[serde(default)]
    received_datetime: Option<String>,
    #[serde(default)]
    sender_address: Option<String>,
    #[serde(default)]
    subject: Option<String>,
    #[serde(default)]
    attachments: Vec<FeedAttachment>,
}

#[derive(Debug, Deserialize)]
struct FeedAttachment {
    #[serde(default)]
    file_name: String,
    #[serde(default)]
    source_file: String,
    /// Text layer supplied inline instead of a sidecar file.
    #[serde(default)]
    text: Option<String>,
}

/// Reads documents from a JSON inbox feed.
#[derive(Debug, Clone)]
pub struct InboxFeed {
    pub inbox_json: PathBuf,
    pub attachments_dir: PathBuf,
    pub tracked_folders: Vec<String>,
    pub max_items_per_folder: usize,
}

impl InboxFeed {
    pub fn from_config(config: &PipelineConfig) -> Self {
        Self {
            inbox_json: config.inbox_json.clone(),
            attachments_dir: config.attachments_dir.clone(),
            tracked_folders: config.tracked_folders.clone(),
            max_items_per_folder: config.max_items_per_folder,
        }
    }

    /// Load every PDF attachment in the tracked folders.
    ///
    /// A missing feed or attachments directory is fatal. A single attachment
    /// that cannot be read becomes a document with an unreadable payload.
    pub fn load_documents(&self) -> Result<Vec<InboundDocument>, IngestError> {
        if !self.inbox_json.exists() {
            return Err(IngestError::FeedNotFound(self.inbox_json.clone()));
        }
        if !self.attachments_dir.is_dir() {
            return Err(IngestError::AttachmentsDirNotFound(
                self.attachments_dir.clone(),
            ));
        }

        let raw = std::fs::read_to_string(&self.inbox_json)?;
        let messages: Vec<FeedMessage> = serde_json::from_str(&raw)?;

        let mut by_folder: BTreeMap<String, Vec<FeedMessage>> = BTreeMap::new();
        for message in messages {
            let folder = message
                .folder_path
                .clone()
                .filter(|f| !f.trim().is_empty())
                .unwrap_or_else(|| DEFAULT_FOLDER.to_string());
            by_folder.entry(folder).or_default().push(message);
        }

        let mut documents = Vec::new();
        let mut message_count = 0usize;

        for folder in &self.tracked_folders {
            let Some(messages) = by_folder.remove(folder) else {
                debug!(folder = %folder, "Tracked folder has no messages");
                continue;
            };

            for message in messages.into_iter().take(self.max_items_per_folder) {
                message_count += 1;
                let message_id = message
                    .message_id
                    .as_deref()
                    .map(str::trim)
                    .filter(|id| !id.is_empty())
                    .map(str::to_string)
                    .unwrap_or_else(|| format!("MSG-{message_count:04}"));
                let received_at = message
                    .received_datetime
                    .as_deref()
                    .and_then(|raw| parse_received(raw, &message_id));

                let pdfs = message.attachments.iter().filter(|a| {
                    let name = a.file_name.trim();
                    !name.is_empty()
                        && !a.source_file.trim().is_empty()
                        && name.to_ascii_lowercase().ends_with(".pdf")
                });

                for (index, attachment) in pdfs.enumerate() {
                    let source_ref = format!("{message_id}/{:02}", index + 1);
                    let path = self.attachments_dir.join(attachment.source_file.trim());
                    let (payload, text) = read_attachment(&path, attachment.text.as_deref());

                    documents.push(InboundDocument {
                        source_ref,
                        payload,
                        text,
                        meta: MessageMeta {
                            message_id: message_id.clone(),
                            folder: folder.clone(),
                            sender: non_blank(message.sender_address.as_deref()),
                            subject: non_blank(message.subject.as_deref()),
                            attachment_name: attachment.file_name.trim().to_string(),
                            received_at,
                        },
                    });
                }
            }
        }

        info!(
            feed = %self.inbox_json.display(),
            messages = message_count,
            documents = documents.len(),
            "Inbox feed loaded"
        );
        Ok(documents)
    }
}

/// Bytes plus text layer. Read failures become an unreadable payload.
fn read_attachment(path: &Path, inline_text: Option<&str>) -> (AttachmentPayload, String) {
    let payload = match std::fs::read(path) {
        Ok(data) => AttachmentPayload::Bytes { data },
        Err(e) => {
            warn!(path = %path.display(), error = %e, "Attachment could not be read");
            return (
                AttachmentPayload::Unreadable {
                    reason: e.to_string(),
                },
                String::new(),
            );
        }
    };

    let text = match inline_text {
        Some(text) => text.to_string(),
        None => {
            let sidecar = path.with_extension("txt");
            match std::fs::read_to_string(&sidecar) {
                Ok(text) => text,
                Err(e) => {
                    debug!(sidecar = %sidecar.display(), error = %e, "No text layer sidecar");
                    String::new()
                }
            }
        }
    };

    (payload, text)
}

/// RFC 3339, or a naive timestamp taken as UTC.
fn parse_received(raw: &str, message_id: &str) -> Option<DateTime<Utc>> {
    let raw = raw.trim();
    if raw.is_empty() {
        return None;
    }
    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return Some(dt.with_timezone(&Utc));
    }
    if let Ok(naive) = NaiveDateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S") {
        return Some(naive.and_utc());
    }
    warn!(message_id, received = raw, "Unparseable received timestamp");
    None
}

fn non_blank(value: Option<&str>) -> Option<String> {
    value
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string)
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Fixture {
        dir: tempfile::TempDir,
    }

    impl Fixture {
        fn new() -> Self {
            let dir = tempfile::tempdir().unwrap();
            std::fs::create_dir(dir.path().join("attachments")).unwrap();
            Self { dir }
        }

        fn attachment(&self, name: &str, bytes: &[u8]) {
            std::fs::write(self.dir.path().join("attachments").join(name), bytes).unwrap();
        }

        fn feed(&self, json: &str) -> InboxFeed {
            let inbox_json = self.dir.path().join("inbox.json");
            std::fs::write(&inbox_json, json).unwrap();
            InboxFeed {
                inbox_json,
                attachments_dir: self.dir.path().join("attachments"),
                tracked_folders: vec!["Inbox".into()],
                max_items_per_folder: 50,
            }
        }
    }

    #[test]
    fn reads_pdf_with_sidecar_text() {
        let fx = Fixture::new();
        fx.attachment("INV-1001.pdf", b"%PDF-1.4 one");
        fx.attachment("INV-1001.txt", b"PO 10045\nTotal: 4,800.00");
        let feed = fx.feed(
            r#"[{
                "message_id": "MSG-0001",
                "folder_path": "Inbox",
                "received_datetime": "2026-03-02T09:15:00Z",
                "sender_address": "ap@supplier.example",
                "subject": "Invoice INV-1001",
                "attachments": [
                    {"file_name": "INV-1001.pdf", "source_file": "INV-1001.pdf"},
                    {"file_name": "terms.docx", "source_file": "terms.docx"}
                ]
            }]"#,
        );

        let docs = feed.load_documents().unwrap();
        assert_eq!(docs.len(), 1);
        let doc = &docs[0];
        assert_eq!(doc.source_ref, "MSG-0001/01");
        assert_eq!(doc.text, "PO 10045\nTotal: 4,800.00");
        assert_eq!(
            doc.payload,
            AttachmentPayload::Bytes {
                data: b"%PDF-1.4 one".to_vec()
            }
        );
        assert_eq!(doc.meta.attachment_name, "INV-1001.pdf");
        assert_eq!(doc.meta.sender_domain().as_deref(), Some("supplier.example"));
        assert!(doc.meta.received_at.is_some());
    }

    #[test]
    fn inline_text_and_missing_file() {
        let fx = Fixture::new();
        fx.attachment("a.pdf", b"%PDF a");
        let feed = fx.feed(
            r#"[{
                "message_id": "M1",
                "attachments": [
                    {"file_name": "a.pdf", "source_file": "a.pdf", "text": "Total: 10.00"},
                    {"file_name": "gone.PDF", "source_file": "gone.pdf"}
                ]
            }]"#,
        );

        let docs = feed.load_documents().unwrap();
        assert_eq!(docs.len(), 2);
        assert_eq!(docs[0].text, "Total: 10.00");
        assert_eq!(docs[0].meta.folder, "Inbox");
        assert_eq!(docs[1].source_ref, "M1/02");
        assert!(matches!(docs[1].payload, AttachmentPayload::Unreadable { .. }));
    }

    #[test]
    fn missing_sidecar_leaves_readable_pdf_without_text() {
        let fx = Fixture::new();
        fx.attachment("scan.pdf", b"%PDF scanned");
        let path = fx.dir.path().join("attachments").join("scan.pdf");

        let (payload, text) = read_attachment(&path, None);
        assert_eq!(
            payload,
            AttachmentPayload::Bytes {
                data: b"%PDF scanned".to_vec()
            }
        );
        assert!(text.is_empty());
    }

    #[test]
    fn only_tracked_folders_and_capped() {
        let fx = Fixture::new();
        fx.attachment("x.pdf", b"%PDF x");
        let feed = fx.feed(
            r#"[
                {"message_id": "A", "folder_path": "Inbox", "attachments": [{"file_name": "x.pdf", "source_file": "x.pdf"}]},
                {"message_id": "B", "folder_path": "Inbox", "attachments": [{"file_name": "x.pdf", "source_file": "x.pdf"}]},
                {"message_id": "C", "folder_path": "Archive", "attachments": [{"file_name": "x.pdf", "source_file": "x.pdf"}]}
            ]"#,
        );
        let feed = InboxFeed {
            max_items_per_folder: 1,
            ..feed
        };
        let docs = feed.load_documents().unwrap();
        assert_eq!(docs.len(), 1);
        assert_eq!(docs[0].meta.message_id, "A");
    }

    #[test]
    fn missing_feed_is_fatal() {
        let fx = Fixture::new();
        let feed = InboxFeed {
            inbox_json: fx.dir.path().join("nope.json"),
            attachments_dir: fx.dir.path().join("attachments"),
            tracked_folders: vec!["Inbox".into()],
            max_items_per_folder: 50,
        };
        assert!(matches!(
            feed.load_documents(),
            Err(IngestError::FeedNotFound(_))
        ));
    }

    #[test]
    fn malformed_feed_is_fatal() {
        let fx = Fixture::new();
        let feed = fx.feed("{not json");
        assert!(matches!(
            feed.load_documents(),
            Err(IngestError::InvalidFeed(_))
        ));
    }

    #[test]
    fn received_timestamp_formats() {
        assert!(parse_received("2026-03-02T09:15:00+01:00", "m").is_some());
        assert!(parse_received("2026-03-02T09:15:00", "m").is_some());
        assert!(parse_received("yesterday", "m").is_none());
        assert!(parse_received("  ", "m").is_none());
    }
}
