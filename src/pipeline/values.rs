//! Monetary value extraction and estimation.
//!
//! Extraction is an ordered set of labelled patterns over document text.
//! Totals require decimals so a bare PO-like integer is never read as money.
//! Fields still missing after extraction are estimated from the median of
//! the value population.

use std::collections::BTreeMap;
use std::str::FromStr;
use std::sync::LazyLock;

use regex::Regex;
use rust_decimal::{Decimal, RoundingStrategy};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::pipeline::types::{
    Fingerprint, MonetaryValue, MonetaryValues, Provenance, ValueField, ValueRule,
};

// ── Patterns ────────────────────────────────────────────────────────

/// Looser amount: decimals optional. Used inside an explicit net/VAT block.
const MONEY: &str = r"([0-9][0-9,]*)(?:\.(\d{1,2}))?";

/// Strict amount: decimals required.
const TOTAL_MONEY: &str = r"(?:£\s*)?([0-9][0-9,]*)\.(\d{1,2})";

struct ValuePatterns {
    net_amount: Regex,
    vat_amount: Regex,
    /// Gross sources inside a net/VAT block, tried in order.
    block_gross: Vec<Regex>,
    single_total: Regex,
    labelled_total: Regex,
}

fn block_label(label: &str) -> Regex {
    Regex::new(&format!(r"(?i)\b{label}\s*[:\-]?\s*£?\s*{MONEY}")).unwrap()
}

static PATTERNS: LazyLock<ValuePatterns> = LazyLock::new(|| ValuePatterns {
    net_amount: block_label(r"NET\s+AMOUNT"),
    vat_amount: block_label(r"VAT\s+AMOUNT"),
    block_gross: vec![
        block_label(r"TOTAL\s+AMOUNT"),
        block_label(r"GROSS\s+AMOUNT"),
        block_label(r"DUE\s+AMOUNT"),
    ],
    single_total: Regex::new(&format!(r"(?i)\bTOTAL\b\s*[:\-]?\s*{TOTAL_MONEY}\b")).unwrap(),
    labelled_total: Regex::new(&format!(
        r"(?i)\b(?:INVOICE\s+TOTAL|TOTAL\s+DUE|AMOUNT\s+DUE|BALANCE\s+DUE|GRAND\s+TOTAL|TOTAL\s+PAYABLE|TOTAL\s+TO\s+PAY|GROSS(?:\s+TOTAL)?)\b\s*[:\-]?\s*{TOTAL_MONEY}\b"
    ))
    .unwrap(),
});

// ── Extraction ──────────────────────────────────────────────────────

/// Values read directly from text, before any estimation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExtractedValues {
    pub gross: Option<Decimal>,
    pub net: Option<Decimal>,
    pub vat: Option<Decimal>,
    pub rule: ValueRule,
}

impl ExtractedValues {
    fn none(rule: ValueRule) -> Self {
        Self {
            gross: None,
            net: None,
            vat: None,
            rule,
        }
    }

    pub fn observed(&self) -> ObservedValues {
        ObservedValues {
            gross: self.gross,
            net: self.net,
            vat: self.vat,
        }
    }
}

/// Apply the value rules in order; the first that produces a value wins.
pub fn extract_values(text: &str) -> ExtractedValues {
    if text.trim().is_empty() {
        return ExtractedValues::none(ValueRule::NoText);
    }
    let p = &*PATTERNS;

    let net = first_amount(&p.net_amount, text);
    let vat = first_amount(&p.vat_amount, text);
    if net.is_some() || vat.is_some() {
        let gross = p.block_gross.iter().find_map(|re| first_amount(re, text));
        return ExtractedValues {
            gross,
            net,
            vat,
            rule: ValueRule::ExplicitNetVatBlock,
        };
    }

    if let Some(gross) = first_amount(&p.single_total, text) {
        return ExtractedValues {
            gross: Some(gross),
            net: None,
            vat: None,
            rule: ValueRule::SingleTotalLine,
        };
    }

    if let Some(gross) = first_amount(&p.labelled_total, text) {
        return ExtractedValues {
            gross: Some(gross),
            net: None,
            vat: None,
            rule: ValueRule::LabelledTotal,
        };
    }

    ExtractedValues::none(ValueRule::NotFound)
}

/// First match of `re`, parsed from groups 1 (whole) and 2 (pence).
fn first_amount(re: &Regex, text: &str) -> Option<Decimal> {
    let caps = re.captures(text)?;
    let whole = caps.get(1)?.as_str();
    let pence = caps.get(2).map(|m| m.as_str()).unwrap_or("");
    parse_amount(whole, pence)
}

/// `"1,796"`, `"25"` → `1796.25`. Always two decimal places.
fn parse_amount(whole: &str, pence: &str) -> Option<Decimal> {
    let whole: String = whole.chars().filter(|c| *c != ',').collect();
    if whole.is_empty() {
        return None;
    }
    let pence = format!("{pence:0<2}");
    Decimal::from_str(&format!("{whole}.{}", &pence[..2])).ok()
}

// ── Population ──────────────────────────────────────────────────────

/// Extracted values for one document in the population.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ObservedValues {
    pub gross: Option<Decimal>,
    pub net: Option<Decimal>,
    pub vat: Option<Decimal>,
}

impl ObservedValues {
    pub fn get(&self, field: ValueField) -> Option<Decimal> {
        match field {
            ValueField::Gross => self.gross,
            ValueField::Net => self.net,
            ValueField::Vat => self.vat,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.gross.is_none() && self.net.is_none() && self.vat.is_none()
    }
}

/// Keeps extracted fields only; estimates never feed the population.
impl From<&MonetaryValues> for ObservedValues {
    fn from(values: &MonetaryValues) -> Self {
        let extracted = |v: Option<MonetaryValue>| {
            v.filter(|v| v.provenance == Provenance::Extracted)
                .map(|v| v.amount)
        };
        Self {
            gross: extracted(values.gross),
            net: extracted(values.net),
            vat: extracted(values.vat),
        }
    }
}

/// Extracted (never estimated) values keyed by fingerprint.
///
/// Keyed so that a document seen in history and again in the current run is
/// counted once, which keeps the median stable across re-runs.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ValuePopulation {
    entries: BTreeMap<Fingerprint, ObservedValues>,
}

impl ValuePopulation {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_history(history: impl IntoIterator<Item = (Fingerprint, ObservedValues)>) -> Self {
        let mut population = Self::new();
        for (fp, values) in history {
            population.insert(fp, values);
        }
        population
    }

    /// Add or replace a document's observations. Empty observations are ignored.
    pub fn insert(&mut self, fp: Fingerprint, values: ObservedValues) {
        if values.is_empty() {
            return;
        }
        self.entries.insert(fp, values);
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Median of `field` across the population, rounded to 2 dp.
    ///
    /// An even count gives the mean of the two middle values. `None` with no
    /// observations.
    pub fn median(&self, field: ValueField) -> Option<Decimal> {
        let mut observed: Vec<Decimal> = self.entries.values().filter_map(|v| v.get(field)).collect();
        if observed.is_empty() {
            return None;
        }
        observed.sort();
        let mid = observed.len() / 2;
        let median = if observed.len() % 2 == 1 {
            observed[mid]
        } else {
            (observed[mid - 1] + observed[mid]) / Decimal::TWO
        };
        Some(median.round_dp_with_strategy(2, RoundingStrategy::MidpointAwayFromZero))
    }
}

// ── Resolution ──────────────────────────────────────────────────────

/// Combine extracted values with population estimates for required fields.
///
/// Extracted fields are kept as-is. A required field that was not extracted
/// gets the population median, tagged estimated. With no observations the
/// field stays absent and is listed in `unresolved`.
pub fn resolve_values(
    extracted: &ExtractedValues,
    population: &ValuePopulation,
    required_fields: &[ValueField],
) -> MonetaryValues {
    let mut values = MonetaryValues {
        gross: extracted.gross.map(MonetaryValue::extracted),
        net: extracted.net.map(MonetaryValue::extracted),
        vat: extracted.vat.map(MonetaryValue::extracted),
        rule: extracted.rule,
        unresolved: Vec::new(),
    };

    for &field in required_fields {
        if values.get(field).is_some() {
            continue;
        }
        match population.median(field) {
            Some(median) => {
                debug!(field = field.as_str(), %median, population = population.len(), "Estimated value from population median");
                values.set(field, Some(MonetaryValue::estimated(median)));
            }
            None => {
                debug!(field = field.as_str(), "No population to estimate from");
                values.unresolved.push(field);
            }
        }
    }

    values
}

/// Values for a document with no usable text: nothing extracted, nothing
/// estimated, every required field unresolved.
pub fn unreadable_values(required_fields: &[ValueField]) -> MonetaryValues {
    MonetaryValues {
        gross: None,
        net: None,
        vat: None,
        rule: ValueRule::NoText,
        unresolved: required_fields.to_vec(),
    }
}
