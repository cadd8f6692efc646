//! PO master snapshot loader.
//!
//! Accepts the short canonical headers (`po_number,status,value`) or the
//! headers of a typical ERP export (`Purchase order`, `Purchase order
//! status`, `Approval status`, ...). The whole file is the snapshot; there is
//! no incremental update.

use std::io::Read;
use std::path::Path;
use std::str::FromStr;

use rust_decimal::Decimal;
use tracing::{debug, info};

use crate::error::MasterDataError;
use crate::pipeline::types::{PoMaster, PoMasterRecord, PoStatus};

const PO_NUMBER: &[&str] = &["po_number", "Purchase order", "PO Number", "PO"];
const SUPPLIER: &[&str] = &["supplier_account", "Supplier account"];
const STATUS: &[&str] = &["status", "po_status", "Purchase order status", "PO status"];
const APPROVAL: &[&str] = &["approval_status", "Approval status"];
const VALUE: &[&str] = &["value", "remaining_value", "Remaining value", "PO value"];

/// Export spelling of an approved PO.
const APPROVED: &str = "confirmed";

/// Resolved column positions for one file.
#[derive(Debug)]
struct Columns {
    po_number: usize,
    status: usize,
    supplier: Option<usize>,
    approval: Option<usize>,
    value: Option<usize>,
}

impl Columns {
    fn resolve(headers: &csv::StringRecord) -> Result<Self, MasterDataError> {
        let find = |aliases: &[&str]| {
            headers
                .iter()
                .position(|h| aliases.iter().any(|a| h.trim().eq_ignore_ascii_case(a)))
        };

        let po_number = find(PO_NUMBER);
        let status = find(STATUS);
        match (po_number, status) {
            (Some(po_number), Some(status)) => Ok(Self {
                po_number,
                status,
                supplier: find(SUPPLIER),
                approval: find(APPROVAL),
                value: find(VALUE),
            }),
            _ => {
                let mut missing = Vec::new();
                if po_number.is_none() {
                    missing.push("po_number".to_string());
                }
                if status.is_none() {
                    missing.push("status".to_string());
                }
                Err(MasterDataError::MissingColumns {
                    missing,
                    found: headers.iter().map(str::to_string).collect(),
                })
            }
        }
    }
}

/// Load the master snapshot from a CSV file.
pub fn load_po_master(path: &Path) -> Result<PoMaster, MasterDataError> {
    if !path.exists() {
        return Err(MasterDataError::NotFound(path.to_path_buf()));
    }
    let file = std::fs::File::open(path)?;
    let records = parse_po_master(file)?;
    info!(path = %path.display(), records = records.len(), "Loaded PO master");
    Ok(PoMaster::from_records(records))
}

/// Parse master records from any CSV source. Rows with a blank PO number
/// are skipped.
pub fn parse_po_master<R: Read>(source: R) -> Result<Vec<PoMasterRecord>, MasterDataError> {
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(true)
        .flexible(true)
        .trim(csv::Trim::All)
        .from_reader(source);

    let columns = Columns::resolve(reader.headers()?)?;
    debug!(?columns, "PO master columns resolved");

    let mut records = Vec::new();
    for result in reader.records() {
        let row = result?;
        let line = row.position().map(|p| p.line()).unwrap_or(0);
        let field = |idx: usize| row.get(idx).unwrap_or("").trim();
        let optional = |idx: Option<usize>| {
            idx.map(field)
                .filter(|v| !v.is_empty())
                .map(str::to_string)
        };

        let po_number = field(columns.po_number);
        if po_number.is_empty() {
            continue;
        }

        let raw_status = field(columns.status);
        let approval = columns.approval.map(field);
        let status = derive_status(raw_status, approval).ok_or_else(|| {
            MasterDataError::InvalidField {
                line,
                field: "status".into(),
                value: raw_status.to_string(),
            }
        })?;

        let remaining_value = match optional(columns.value) {
            Some(raw) => Some(parse_money(&raw).ok_or_else(|| MasterDataError::InvalidField {
                line,
                field: "value".into(),
                value: raw.clone(),
            })?),
            None => None,
        };

        records.push(PoMasterRecord {
            po_number: po_number.to_string(),
            supplier_account: optional(columns.supplier),
            status,
            remaining_value,
        });
    }

    Ok(records)
}

/// Order status first, then approval.
///
/// With an approval column (ERP export), any order status other than open
/// counts as closed. Without one, the status must be a known spelling.
fn derive_status(raw_status: &str, approval: Option<&str>) -> Option<PoStatus> {
    match approval {
        Some(approval) => {
            if PoStatus::from_str(raw_status).ok() != Some(PoStatus::Open) {
                Some(PoStatus::Closed)
            } else if !approval.eq_ignore_ascii_case(APPROVED) {
                Some(PoStatus::Unapproved)
            } else {
                Some(PoStatus::Open)
            }
        }
        None => PoStatus::from_str(raw_status).ok(),
    }
}

/// `"£5,000.00"` → `5000.00`.
fn parse_money(raw: &str) -> Option<Decimal> {
    let cleaned: String = raw.chars().filter(|c| !matches!(c, '£' | ',' | ' ')).collect();
    Decimal::from_str(&cleaned).ok()
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use rust_decimal_macros::dec;

    use super::*;

    #[test]
    fn canonical_headers() {
        let csv = "po_number,status,value,supplier_account\n\
                   PO-10045,open,5000.00,SUP-001\n\
                   PO-20001,closed,0,\n\
                   PO-30001,unapproved,,SUP-003\n";
        let records = parse_po_master(csv.as_bytes()).unwrap();
        assert_eq!(records.len(), 3);
        assert_eq!(records[0].status, PoStatus::Open);
        assert_eq!(records[0].remaining_value, Some(dec!(5000.00)));
        assert_eq!(records[0].supplier_account.as_deref(), Some("SUP-001"));
        assert_eq!(records[1].status, PoStatus::Closed);
        assert_eq!(records[1].supplier_account, None);
        assert_eq!(records[2].status, PoStatus::Unapproved);
        assert_eq!(records[2].remaining_value, None);
    }

    #[test]
    fn erp_export_headers() {
        let csv = "Purchase order,Supplier account,Purchase order status,Approval status\n\
                   00010045,V-1,Open order,Confirmed\n\
                   00020001,V-2,Invoiced,Confirmed\n\
                   00030001,V-3,Open order,In review\n\
                   00040001,V-4,Received,Draft\n";
        let records = parse_po_master(csv.as_bytes()).unwrap();
        let statuses: Vec<PoStatus> = records.iter().map(|r| r.status).collect();
        assert_eq!(
            statuses,
            vec![
                PoStatus::Open,
                PoStatus::Closed,
                PoStatus::Unapproved,
                PoStatus::Closed
            ]
        );

        let master = PoMaster::from_records(records);
        assert_eq!(master.get("PO-10045").map(|r| r.status), Some(PoStatus::Open));
    }

    #[test]
    fn blank_po_numbers_skipped() {
        let csv = "po_number,status\n,open\nPO-1,open\n";
        assert_eq!(parse_po_master(csv.as_bytes()).unwrap().len(), 1);
    }

    #[test]
    fn missing_columns_reported() {
        let err = parse_po_master("po,amount\n1,2\n".as_bytes()).unwrap_err();
        match err {
            MasterDataError::MissingColumns { missing, found } => {
                assert_eq!(missing, vec!["status".to_string()]);
                assert_eq!(found, vec!["po".to_string(), "amount".to_string()]);
            }
            other => panic!("expected MissingColumns, got {other:?}"),
        }
    }

    #[test]
    fn unknown_status_is_invalid() {
        let err = parse_po_master("po_number,status\nPO-1,on fire\n".as_bytes()).unwrap_err();
        assert!(matches!(
            err,
            MasterDataError::InvalidField { line: 2, ref field, .. } if field == "status"
        ));
    }

    #[test]
    fn bad_value_is_invalid() {
        let err = parse_po_master("po_number,status,value\nPO-1,open,lots\n".as_bytes()).unwrap_err();
        assert!(matches!(err, MasterDataError::InvalidField { .. }));
    }

    #[test]
    fn money_with_symbols() {
        let csv = "po_number,status,value\nPO-1,open,\"£5,000.00\"\n";
        let records = parse_po_master(csv.as_bytes()).unwrap();
        assert_eq!(records[0].remaining_value, Some(dec!(5000.00)));
    }

    #[test]
    fn load_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "po_number,status,value").unwrap();
        writeln!(file, "PO-10045,open,5000.00").unwrap();
        let master = load_po_master(file.path()).unwrap();
        assert_eq!(master.len(), 1);
    }

    #[test]
    fn load_missing_file() {
        let err = load_po_master(Path::new("/nonexistent/po_master.csv")).unwrap_err();
        assert!(matches!(err, MasterDataError::NotFound(_)));
    }
}
