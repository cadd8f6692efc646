//! Configuration types.

use std::path::PathBuf;

use crate::error::ConfigError;
use crate::pipeline::types::ValueField;
use crate::pipeline::worklist::ConflictPrecedence;

const DEFAULT_DB_PATH: &str = "./data/invoice-worklist.db";
const DEFAULT_DATA_DIR: &str = "./data";
const DEFAULT_SNAPSHOT_JSON: &str = "./exports/snapshot.json";
const DEFAULT_MAX_ITEMS_PER_FOLDER: usize = 50;

/// Decision-rule settings. The only knobs the pure pipeline reads.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RuleConfig {
    /// Fields that must carry a value (extracted or estimated) for a document
    /// to be postable. Missing required fields are estimated from the
    /// population median.
    pub required_value_fields: Vec<ValueField>,
    /// Whether a PO conflict outranks value problems in the worklist table.
    pub conflict_precedence: ConflictPrecedence,
}

impl Default for RuleConfig {
    fn default() -> Self {
        Self {
            required_value_fields: vec![ValueField::Gross],
            conflict_precedence: ConflictPrecedence::BlockerFirst,
        }
    }
}

/// Batch run configuration, built from `ICS_*` environment variables.
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    /// libSQL database file holding worklist, history and fingerprints.
    pub db_path: PathBuf,
    /// Inbox feed (messages + attachment references).
    pub inbox_json: PathBuf,
    /// Directory the feed's attachment files live in.
    pub attachments_dir: PathBuf,
    /// PO master snapshot.
    pub po_master_csv: PathBuf,
    /// Where the presentation snapshot is written.
    pub snapshot_json: PathBuf,
    /// Mail folders included in the scan, in order.
    pub tracked_folders: Vec<String>,
    /// Cap on messages taken from each folder.
    pub max_items_per_folder: usize,
    pub rules: RuleConfig,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        let data_dir = PathBuf::from(DEFAULT_DATA_DIR);
        Self {
            db_path: PathBuf::from(DEFAULT_DB_PATH),
            inbox_json: data_dir.join("inbox.json"),
            attachments_dir: data_dir.join("attachments"),
            po_master_csv: data_dir.join("po_master.csv"),
            snapshot_json: PathBuf::from(DEFAULT_SNAPSHOT_JSON),
            tracked_folders: vec!["Inbox".to_string()],
            max_items_per_folder: DEFAULT_MAX_ITEMS_PER_FOLDER,
            rules: RuleConfig::default(),
        }
    }
}

impl PipelineConfig {
    /// Build config from the process environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_vars(|key| std::env::var(key).ok())
    }

    /// Build config from an arbitrary variable lookup.
    ///
    /// Blank values count as unset. Paths under the data directory default
    /// relative to `ICS_DATA_DIR`.
    pub fn from_vars(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let var = |key: &str| {
            lookup(key)
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
        };

        let data_dir = var("ICS_DATA_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from(DEFAULT_DATA_DIR));

        let path_or = |key: &str, default: PathBuf| var(key).map(PathBuf::from).unwrap_or(default);

        let max_items_per_folder = match var("ICS_MAX_ITEMS_PER_FOLDER") {
            Some(raw) => raw.parse::<usize>().map_err(|e| ConfigError::InvalidValue {
                key: "ICS_MAX_ITEMS_PER_FOLDER".into(),
                message: format!("'{raw}': {e}"),
            })?,
            None => DEFAULT_MAX_ITEMS_PER_FOLDER,
        };

        let tracked_folders: Vec<String> = var("ICS_TRACKED_FOLDERS")
            .map(|raw| {
                raw.split(',')
                    .map(|s| s.trim().to_string())
                    .filter(|s| !s.is_empty())
                    .collect()
            })
            .unwrap_or_else(|| vec!["Inbox".to_string()]);

        let required_value_fields = match var("ICS_REQUIRED_VALUE_FIELDS") {
            Some(raw) => parse_value_fields(&raw)?,
            None => RuleConfig::default().required_value_fields,
        };

        let conflict_precedence = match var("ICS_CONFLICT_PRECEDENCE") {
            Some(raw) => raw
                .parse::<ConflictPrecedence>()
                .map_err(|message| ConfigError::InvalidValue {
                    key: "ICS_CONFLICT_PRECEDENCE".into(),
                    message,
                })?,
            None => ConflictPrecedence::BlockerFirst,
        };

        Ok(Self {
            db_path: path_or("ICS_DB_PATH", PathBuf::from(DEFAULT_DB_PATH)),
            inbox_json: path_or("ICS_INBOX_JSON", data_dir.join("inbox.json")),
            attachments_dir: path_or("ICS_ATTACHMENTS_DIR", data_dir.join("attachments")),
            po_master_csv: path_or("ICS_PO_MASTER_CSV", data_dir.join("po_master.csv")),
            snapshot_json: path_or("ICS_SNAPSHOT_JSON", PathBuf::from(DEFAULT_SNAPSHOT_JSON)),
            tracked_folders,
            max_items_per_folder,
            rules: RuleConfig {
                required_value_fields,
                conflict_precedence,
            },
        })
    }
}

fn parse_value_fields(raw: &str) -> Result<Vec<ValueField>, ConfigError> {
    let mut fields = Vec::new();
    for part in raw.split(',').map(str::trim).filter(|s| !s.is_empty()) {
        let field = part
            .parse::<ValueField>()
            .map_err(|message| ConfigError::InvalidValue {
                key: "ICS_REQUIRED_VALUE_FIELDS".into(),
                message,
            })?;
        if !fields.contains(&field) {
            fields.push(field);
        }
    }
    if fields.is_empty() {
        return Err(ConfigError::InvalidValue {
            key: "ICS_REQUIRED_VALUE_FIELDS".into(),
            message: format!("'{raw}': at least one of gross, net or vat is required"),
        });
    }
    Ok(fields)
}
