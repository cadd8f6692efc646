//! Shared types for the invoice decision pipeline.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

// ── Inbound document ────────────────────────────────────────────────

/// Where an attachment came from. Used to locate the invoice in the mailbox.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageMeta {
    /// Mail-system message id.
    pub message_id: String,
    /// Mail folder the message was found in.
    pub folder: String,
    /// Sender address (SMTP or Exchange legacy DN).
    pub sender: Option<String>,
    pub subject: Option<String>,
    /// Original attachment file name.
    pub attachment_name: String,
    pub received_at: Option<DateTime<Utc>>,
}

impl MessageMeta {
    /// Domain part of the sender, lowercased.
    ///
    /// Exchange legacy DNs (`/O=...`) map to `"internal"`; anything without
    /// an `@` gives `None`.
    pub fn sender_domain(&self) -> Option<String> {
        let sender = self.sender.as_deref()?.trim();
        if sender.is_empty() {
            return None;
        }
        if sender.starts_with("/O=") || sender.starts_with("\\O=") {
            return Some("internal".to_string());
        }
        let (_, domain) = sender.split_once('@')?;
        let domain = domain.trim().to_lowercase();
        if domain.is_empty() { None } else { Some(domain) }
    }
}

/// Attachment bytes as handed over by ingestion.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum AttachmentPayload {
    Bytes { data: Vec<u8> },
    /// Ingestion could not read the byte stream.
    Unreadable { reason: String },
}

/// One inbound attachment, normalized by the ingestion collaborator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InboundDocument {
    /// Ingestion-side id: `<message_id>/<attachment index>`.
    pub source_ref: String,
    pub payload: AttachmentPayload,
    /// Text layer of the PDF. Empty when the PDF has none.
    pub text: String,
    pub meta: MessageMeta,
}

// ── Fingerprints ────────────────────────────────────────────────────

/// Lowercase hex SHA-256 of attachment bytes.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Fingerprint(String);

impl Fingerprint {
    pub fn from_hex(hex: impl Into<String>) -> Self {
        Self(hex.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// First 12 hex chars, for log lines.
    pub fn short(&self) -> &str {
        &self.0[..self.0.len().min(12)]
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// How a document's fingerprint relates to what has been seen before.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FingerprintStatus {
    /// First copy in this scan; unknown, or known and still present.
    New,
    /// Known from an earlier scan in which it was absent.
    Reappeared,
    /// Same bytes as an earlier document in this scan.
    Duplicate,
    /// No usable bytes or text layer.
    Unreadable,
}

impl FingerprintStatus {
    pub const ALL: [FingerprintStatus; 4] = [
        Self::New,
        Self::Reappeared,
        Self::Duplicate,
        Self::Unreadable,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::New => "new",
            Self::Reappeared => "reappeared",
            Self::Duplicate => "duplicate",
            Self::Unreadable => "unreadable",
        }
    }
}

/// Why a document went down the unreadable path.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UnreadableCause {
    /// Byte stream missing, empty or unreadable.
    Corrupt,
    /// Bytes fine but the PDF carries no text.
    NoTextLayer,
}

// ── PO references ───────────────────────────────────────────────────

/// Extraction rule that produced a PO reference, in priority order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PoRule {
    PoDash,
    PoColon,
    PurchaseOrder,
    PoDotted,
    PoSpaced,
    BareNumeric,
}

impl PoRule {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::PoDash => "po_dash",
            Self::PoColon => "po_colon",
            Self::PurchaseOrder => "purchase_order",
            Self::PoDotted => "po_dotted",
            Self::PoSpaced => "po_spaced",
            Self::BareNumeric => "bare_numeric",
        }
    }
}

/// A purchase-order number found in document text.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PoReference {
    /// Canonical form `PO-<digits>`, digits as written.
    pub number: String,
    pub rule: PoRule,
    /// Byte offset of the match in the text.
    pub position: usize,
}

// ── PO master data ──────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PoStatus {
    Open,
    Closed,
    Unapproved,
}

impl FromStr for PoStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "open" | "open order" => Ok(Self::Open),
            "closed" | "invoiced" | "cancelled" | "received" => Ok(Self::Closed),
            "unapproved" | "pending" | "pending approval" | "draft" => Ok(Self::Unapproved),
            other => Err(format!("unknown PO status '{other}'")),
        }
    }
}

/// One PO from the external master dataset.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PoMasterRecord {
    pub po_number: String,
    pub supplier_account: Option<String>,
    pub status: PoStatus,
    /// Remaining (uninvoiced) value on the PO.
    pub remaining_value: Option<Decimal>,
}

/// Read-only PO master snapshot, keyed by normalized PO number.
#[derive(Debug, Clone, Default)]
pub struct PoMaster {
    records: BTreeMap<String, PoMasterRecord>,
}

impl PoMaster {
    /// Build from records. Later records with the same key replace earlier ones.
    pub fn from_records(records: impl IntoIterator<Item = PoMasterRecord>) -> Self {
        let mut map = BTreeMap::new();
        for record in records {
            if let Some(key) = master_key(&record.po_number) {
                map.insert(key, record);
            }
        }
        Self { records: map }
    }

    pub fn get(&self, po_number: &str) -> Option<&PoMasterRecord> {
        self.records.get(&master_key(po_number)?)
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

/// Normalized lookup key for a PO number: its digits without leading zeros.
///
/// `PO-010045`, `10045` and `PO 10045` share a key. `None` when the number
/// has no digits.
pub fn master_key(po_number: &str) -> Option<String> {
    let digits: String = po_number.chars().filter(char::is_ascii_digit).collect();
    if digits.is_empty() {
        return None;
    }
    let trimmed = digits.trim_start_matches('0');
    Some(if trimmed.is_empty() { "0".to_string() } else { trimmed.to_string() })
}

// ── Validation ──────────────────────────────────────────────────────

/// Classification of a document's PO references against master data.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ValidationResult {
    NoPoFound,
    PoNotFound,
    PoClosed,
    PoUnapproved,
    PoValid,
    MultiplePoConflict,
}

impl ValidationResult {
    pub const ALL: [ValidationResult; 6] = [
        Self::NoPoFound,
        Self::PoNotFound,
        Self::PoClosed,
        Self::PoUnapproved,
        Self::PoValid,
        Self::MultiplePoConflict,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::NoPoFound => "no_po_found",
            Self::PoNotFound => "po_not_found",
            Self::PoClosed => "po_closed",
            Self::PoUnapproved => "po_unapproved",
            Self::PoValid => "po_valid",
            Self::MultiplePoConflict => "multiple_po_conflict",
        }
    }
}

/// Validation result plus the master record it resolved to, if any.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Validation {
    pub result: ValidationResult,
    pub matched_po: Option<String>,
    pub remaining_value: Option<Decimal>,
}

// ── Monetary values ─────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ValueField {
    Gross,
    Net,
    Vat,
}

impl ValueField {
    pub const ALL: [ValueField; 3] = [Self::Gross, Self::Net, Self::Vat];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Gross => "gross",
            Self::Net => "net",
            Self::Vat => "vat",
        }
    }
}

impl FromStr for ValueField {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "gross" => Ok(Self::Gross),
            "net" => Ok(Self::Net),
            "vat" => Ok(Self::Vat),
            other => Err(format!("unknown value field '{other}' (expected gross, net or vat)")),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Provenance {
    Extracted,
    Estimated,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct MonetaryValue {
    pub amount: Decimal,
    pub provenance: Provenance,
}

impl MonetaryValue {
    pub fn extracted(amount: Decimal) -> Self {
        Self {
            amount,
            provenance: Provenance::Extracted,
        }
    }

    pub fn estimated(amount: Decimal) -> Self {
        Self {
            amount,
            provenance: Provenance::Estimated,
        }
    }
}

/// Which labelled-pattern rule produced the extracted values.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ValueRule {
    ExplicitNetVatBlock,
    SingleTotalLine,
    LabelledTotal,
    NotFound,
    NoText,
}

impl ValueRule {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ExplicitNetVatBlock => "explicit_net_vat_block",
            Self::SingleTotalLine => "single_total_line",
            Self::LabelledTotal => "labelled_total",
            Self::NotFound => "not_found",
            Self::NoText => "no_text",
        }
    }
}

/// Gross/net/VAT for one document with per-field provenance.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MonetaryValues {
    pub gross: Option<MonetaryValue>,
    pub net: Option<MonetaryValue>,
    pub vat: Option<MonetaryValue>,
    pub rule: ValueRule,
    /// Required fields left absent because the population had no observations.
    pub unresolved: Vec<ValueField>,
}

impl MonetaryValues {
    pub fn get(&self, field: ValueField) -> Option<&MonetaryValue> {
        match field {
            ValueField::Gross => self.gross.as_ref(),
            ValueField::Net => self.net.as_ref(),
            ValueField::Vat => self.vat.as_ref(),
        }
    }

    pub fn set(&mut self, field: ValueField, value: Option<MonetaryValue>) {
        match field {
            ValueField::Gross => self.gross = value,
            ValueField::Net => self.net = value,
            ValueField::Vat => self.vat = value,
        }
    }

    /// Whether any field carries an estimate.
    pub fn has_estimate(&self) -> bool {
        ValueField::ALL
            .iter()
            .filter_map(|f| self.get(*f))
            .any(|v| v.provenance == Provenance::Estimated)
    }

    /// Collapse to the state the worklist rules look at.
    pub fn state(&self) -> ValueState {
        if !self.unresolved.is_empty() {
            ValueState::Missing
        } else if self.has_estimate() {
            ValueState::Estimated
        } else {
            ValueState::Extracted
        }
    }
}

/// Value quality as seen by the worklist rule table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ValueState {
    /// All required fields extracted from text.
    Extracted,
    /// At least one field estimated, none missing.
    Estimated,
    /// A required field could not be extracted or estimated.
    Missing,
}

impl ValueState {
    pub const ALL: [ValueState; 3] = [Self::Extracted, Self::Estimated, Self::Missing];
}

// ── Worklist output ─────────────────────────────────────────────────

/// The single next action assigned to an invoice.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NextAction {
    SkipDuplicate,
    ManualReview,
    RequestPoFromVendor,
    VerifyPoNumber,
    EscalateClosedPo,
    ChasePoApproval,
    ResolvePoConflict,
    ConfirmEstimatedValues,
    Post,
}

impl NextAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::SkipDuplicate => "skip_duplicate",
            Self::ManualReview => "manual_review",
            Self::RequestPoFromVendor => "request_po_from_vendor",
            Self::VerifyPoNumber => "verify_po_number",
            Self::EscalateClosedPo => "escalate_closed_po",
            Self::ChasePoApproval => "chase_po_approval",
            Self::ResolvePoConflict => "resolve_po_conflict",
            Self::ConfirmEstimatedValues => "confirm_estimated_values",
            Self::Post => "post",
        }
    }
}

impl FromStr for NextAction {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s {
            "skip_duplicate" => Self::SkipDuplicate,
            "manual_review" => Self::ManualReview,
            "request_po_from_vendor" => Self::RequestPoFromVendor,
            "verify_po_number" => Self::VerifyPoNumber,
            "escalate_closed_po" => Self::EscalateClosedPo,
            "chase_po_approval" => Self::ChasePoApproval,
            "resolve_po_conflict" => Self::ResolvePoConflict,
            "confirm_estimated_values" => Self::ConfirmEstimatedValues,
            "post" => Self::Post,
            other => return Err(format!("unknown action '{other}'")),
        })
    }
}

/// Value snapshot carried on a worklist row.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValueSnapshot {
    pub gross: Option<MonetaryValue>,
    pub net: Option<MonetaryValue>,
    pub vat: Option<MonetaryValue>,
}

impl From<&MonetaryValues> for ValueSnapshot {
    fn from(values: &MonetaryValues) -> Self {
        Self {
            gross: values.gross,
            net: values.net,
            vat: values.vat,
        }
    }
}

/// One worklist entry: exactly one per document per run.
///
/// Carries no wall-clock fields, so identical inputs produce identical rows.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorklistRow {
    pub source_ref: String,
    pub fingerprint: Option<Fingerprint>,
    pub ready_to_post: bool,
    pub action: NextAction,
    /// Name of the rule that fired.
    pub reason: String,
    /// 1 = hardest blocker.
    pub priority: u8,
    pub values: ValueSnapshot,
    pub matched_po: Option<String>,
    pub po_remaining_value: Option<Decimal>,
    pub sender_domain: Option<String>,
    pub email_subject: Option<String>,
    pub attachment_name: String,
    pub received_at: Option<DateTime<Utc>>,
}

/// Everything the pipeline decided about one document, for audit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuditRecord {
    pub source_ref: String,
    pub fingerprint: Option<Fingerprint>,
    pub fingerprint_status: FingerprintStatus,
    pub unreadable_cause: Option<UnreadableCause>,
    pub po_refs: Vec<PoReference>,
    pub validation: Validation,
    pub values: MonetaryValues,
    pub fired_rule: String,
}
