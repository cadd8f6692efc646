//! Purchase-order reference extraction.
//!
//! An ordered table of labelled regex rules. Every rule runs over the whole
//! text and every match is collected; rule order, then position, decides the
//! order of the result. A match is skipped when its digits overlap digits an
//! earlier match already claimed, so `Purchase Order: PO-123456` yields one
//! reference, not two.

use std::ops::Range;
use std::sync::LazyLock;

use regex::{Captures, Regex};
use tracing::debug;

use crate::pipeline::types::{PoReference, PoRule};

/// Extra acceptance check run on a match after the regex.
type AllowFn = fn(&str, &Captures<'_>) -> bool;

/// A single PO detection rule with a compiled regex.
#[derive(Debug, Clone)]
pub struct PoPattern {
    pub rule: PoRule,
    /// Must capture the PO digits as group 1.
    pub regex: Regex,
    pub allow: Option<AllowFn>,
}

/// Ordered PO extraction rules.
#[derive(Debug, Clone)]
pub struct PoExtractor {
    patterns: Vec<PoPattern>,
}

static DEFAULT_EXTRACTOR: LazyLock<PoExtractor> = LazyLock::new(PoExtractor::default_rules);

/// Extract PO references with the default rule table.
pub fn extract_po_refs(text: &str) -> Vec<PoReference> {
    DEFAULT_EXTRACTOR.extract(text)
}

impl PoExtractor {
    /// The standard rule table, highest priority first.
    pub fn default_rules() -> Self {
        // Hyphen plus the Unicode dash block (‐ ‑ ‒ – — ―).
        const DASH: &str = r"[\-\x{2010}-\x{2015}]";

        let patterns = vec![
            // "PO-123456", "PO – 123456"
            PoPattern {
                rule: PoRule::PoDash,
                regex: Regex::new(&format!(r"(?i)\bPO\s*{DASH}\s*(\d{{4,10}})\b")).unwrap(),
                allow: None,
            },
            // "PO: 123456", "PO # : 123456"
            PoPattern {
                rule: PoRule::PoColon,
                regex: Regex::new(r"(?i)\bPO\s*#?\s*:\s*(\d{4,10})\b").unwrap(),
                allow: None,
            },
            // "Purchase Order: 123456", "Purchase Order No. PO-123456"
            PoPattern {
                rule: PoRule::PurchaseOrder,
                regex: Regex::new(&format!(
                    r"(?i)\bPurchase\s*Order\s*(?:No\.?|Number|Ref\.?)?\s*[:#]?\s*(?:PO\s*{DASH}?\s*)?(\d{{4,10}})\b"
                ))
                .unwrap(),
                allow: None,
            },
            // "P.O. 123456", "P.O. No: 123456"
            PoPattern {
                rule: PoRule::PoDotted,
                regex: Regex::new(r"(?i)\bP\.\s?O\.\s*(?:No\.?|Number)?\s*[:#]?\s*(\d{4,10})\b")
                    .unwrap(),
                allow: None,
            },
            // "PO 10045", "PO No: 10045", "PO#10045"
            PoPattern {
                rule: PoRule::PoSpaced,
                regex: Regex::new(r"(?i)\bPO\s*(?:No\.?|Number|Ref\.?)?\s*[:#]?\s*(\d{4,10})\b")
                    .unwrap(),
                allow: None,
            },
            // Bare six-digit number
            PoPattern {
                rule: PoRule::BareNumeric,
                regex: Regex::new(r"\b(\d{6})\b").unwrap(),
                allow: Some(allow_bare_po),
            },
        ];

        Self { patterns }
    }

    /// A table with no rules (for testing).
    pub fn empty() -> Self {
        Self {
            patterns: Vec::new(),
        }
    }

    /// Append a rule at the lowest priority.
    pub fn add_pattern(&mut self, rule: PoRule, pattern: &str) -> Result<(), regex::Error> {
        self.patterns.push(PoPattern {
            rule,
            regex: Regex::new(pattern)?,
            allow: None,
        });
        Ok(())
    }

    /// Run every rule over `text` and collect unique references.
    pub fn extract(&self, text: &str) -> Vec<PoReference> {
        if text.trim().is_empty() {
            return Vec::new();
        }

        let mut claimed: Vec<Range<usize>> = Vec::new();
        let mut refs: Vec<PoReference> = Vec::new();

        for pattern in &self.patterns {
            for caps in pattern.regex.captures_iter(text) {
                let Some(digits) = caps.get(1) else {
                    continue;
                };
                let span = digits.range();
                if claimed.iter().any(|c| c.start < span.end && span.start < c.end) {
                    continue;
                }
                if let Some(allow) = pattern.allow {
                    if !allow(text, &caps) {
                        continue;
                    }
                }
                claimed.push(span);

                let number = format!("PO-{}", digits.as_str());
                if refs.iter().any(|r| r.number == number) {
                    continue;
                }
                let position = caps.get(0).map(|m| m.start()).unwrap_or(digits.start());
                debug!(po = %number, rule = pattern.rule.as_str(), position, "PO reference matched");
                refs.push(PoReference {
                    number,
                    rule: pattern.rule,
                    position,
                });
            }
        }

        refs
    }
}

/// Reject bare digits that are really money, or that sit right after a PO
/// label some other rule should have handled.
fn allow_bare_po(text: &str, caps: &Captures<'_>) -> bool {
    let Some(digits) = caps.get(1) else {
        return false;
    };

    // "123456.00", "123456,50"
    let mut after = text[digits.end()..].chars();
    if let (Some(sep), Some(next)) = (after.next(), after.next()) {
        if (sep == '.' || sep == ',') && next.is_ascii_digit() {
            return false;
        }
    }

    // "£123456", "1,123456"
    if let Some(prev) = text[..digits.start()].chars().next_back() {
        if matches!(prev, '£' | '$' | '€' | ',' | '.') {
            return false;
        }
    }

    // A "PO" label within the preceding 16 chars, ignoring spacing and dashes.
    let window_start = text[..digits.start()]
        .char_indices()
        .rev()
        .nth(15)
        .map(|(i, _)| i)
        .unwrap_or(0);
    let collapsed: String = text[window_start..digits.start()]
        .chars()
        .filter(|c| !c.is_whitespace() && !is_dash(*c) && *c != '#' && *c != ':')
        .collect::<String>()
        .to_uppercase();
    !collapsed.ends_with("PO")
}

fn is_dash(c: char) -> bool {
    c == '-' || ('\u{2010}'..='\u{2015}').contains(&c)
}

/// First lines of `text` with digits masked and long lines clipped, for
/// debug logging without leaking invoice numbers.
pub fn masked_preview(text: &str, max_lines: usize, max_chars: usize) -> String {
    text.lines()
        .take(max_lines)
        .map(|line| {
            let masked: String = line
                .chars()
                .map(|c| if c.is_ascii_digit() { 'X' } else { c })
                .collect();
            if masked.chars().count() > max_chars {
                let clipped: String = masked.chars().take(max_chars).collect();
                format!("{clipped}…")
            } else {
                masked
            }
        })
        .collect::<Vec<_>>()
        .join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn numbers(text: &str) -> Vec<String> {
        extract_po_refs(text).into_iter().map(|r| r.number).collect()
    }

    #[test]
    fn empty_and_blank_text_yield_nothing() {
        assert!(extract_po_refs("").is_empty());
        assert!(extract_po_refs("  \n\t ").is_empty());
    }

    #[test]
    fn no_pattern_matches() {
        assert!(extract_po_refs("Invoice INV-77\nThank you for your business").is_empty());
    }

    #[test]
    fn spaced_label() {
        let refs = extract_po_refs("Invoice 1001\nPO 10045\nTotal: 4,800.00");
        assert_eq!(refs.len(), 1);
        assert_eq!(refs[0].number, "PO-10045");
        assert_eq!(refs[0].rule, PoRule::PoSpaced);
    }

    #[test]
    fn spaced_label_with_number_word_and_colon() {
        for text in [
            "PO No: 10045",
            "PO Number: 10045",
            "PO No.: 10045",
            "PO Ref: 10045",
        ] {
            let refs = extract_po_refs(text);
            assert_eq!(refs.len(), 1, "{text}");
            assert_eq!(refs[0].number, "PO-10045", "{text}");
            assert_eq!(refs[0].rule, PoRule::PoSpaced, "{text}");
        }
        assert_eq!(numbers("PO Number: 1234567"), vec!["PO-1234567"]);
    }

    #[test]
    fn dash_variants_including_unicode() {
        assert_eq!(numbers("Ref PO-123456"), vec!["PO-123456"]);
        assert_eq!(numbers("Ref PO – 123456"), vec!["PO-123456"]);
        assert_eq!(numbers("Ref po\u{2011}123456"), vec!["PO-123456"]);
        assert_eq!(extract_po_refs("PO-123456")[0].rule, PoRule::PoDash);
    }

    #[test]
    fn colon_and_hash_label() {
        let refs = extract_po_refs("PO # : 654321");
        assert_eq!(refs.len(), 1);
        assert_eq!(refs[0].rule, PoRule::PoColon);
    }

    #[test]
    fn purchase_order_with_embedded_po_prefix_is_one_reference() {
        let refs = extract_po_refs("Purchase Order No. PO-222333");
        assert_eq!(refs.len(), 1);
        assert_eq!(refs[0].number, "PO-222333");
        // "PO-222333" is claimed by the dash rule first.
        assert_eq!(refs[0].rule, PoRule::PoDash);
    }

    #[test]
    fn purchase_order_label() {
        let refs = extract_po_refs("Purchase Order: 445566");
        assert_eq!(refs.len(), 1);
        assert_eq!(refs[0].rule, PoRule::PurchaseOrder);
    }

    #[test]
    fn dotted_label() {
        let refs = extract_po_refs("P.O. No: 778899");
        assert_eq!(refs.len(), 1);
        assert_eq!(refs[0].number, "PO-778899");
        assert_eq!(refs[0].rule, PoRule::PoDotted);
    }

    #[test]
    fn bare_number_used_when_nothing_labelled() {
        let refs = extract_po_refs("Your order 123456 has been invoiced");
        assert_eq!(refs.len(), 1);
        assert_eq!(refs[0].rule, PoRule::BareNumeric);
    }

    #[test]
    fn bare_number_rejects_money() {
        assert!(extract_po_refs("Amount 123456.00 payable").is_empty());
        assert!(extract_po_refs("Amount £123456 payable").is_empty());
        assert!(extract_po_refs("Amount 1,123456 payable").is_empty());
    }

    #[test]
    fn bare_number_not_double_counted_after_label() {
        assert_eq!(numbers("PO - 123456"), vec!["PO-123456"]);
    }

    #[test]
    fn repeated_number_is_deduplicated() {
        let refs = extract_po_refs("PO-123456 on page one\nPO-123456 on page two");
        assert_eq!(refs.len(), 1);
        assert_eq!(refs[0].position, 0);
    }

    #[test]
    fn multiple_distinct_references_kept_in_rule_order() {
        // The spaced reference appears first in the text but its rule ranks
        // below the dash rule.
        let text = "PO 55555 replaces PO-666666";
        assert_eq!(numbers(text), vec!["PO-666666", "PO-55555"]);
    }

    #[test]
    fn extraction_is_deterministic() {
        let text = "Purchase Order: 111111\nP.O. 222222\nPO 33333\nref 444444";
        let first = extract_po_refs(text);
        for _ in 0..5 {
            assert_eq!(extract_po_refs(text), first);
        }
        assert_eq!(first.len(), 4);
    }

    #[test]
    fn custom_rule_appended_last() {
        let mut extractor = PoExtractor::empty();
        extractor
            .add_pattern(PoRule::PoSpaced, r"(?i)\border\s+ref\s+(\d{4,10})\b")
            .unwrap();
        let refs = extractor.extract("Order ref 98765");
        assert_eq!(refs.len(), 1);
        assert_eq!(refs[0].number, "PO-98765");
    }

    #[test]
    fn preview_masks_digits_and_clips() {
        let preview = masked_preview("PO 10045\nline two is long", 2, 8);
        assert_eq!(preview, "PO XXXXX\nline two…");
        assert_eq!(masked_preview("a\nb\nc", 2, 80), "a\nb");
    }
}
