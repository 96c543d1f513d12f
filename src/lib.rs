pub mod blocks;
pub mod config;
pub mod http;
pub mod merge;
pub mod vault;

pub use blocks::{BlockLibrary, BlockTemplate, ComputeRule};
pub use merge::{MergeOutcome, RejectedFile, RenamedSchema, UploadedFile};
pub use vault::{MergeReport, SchemaVault};

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum VaultError {
    #[error("Storage failure: {0}")]
    Storage(#[from] std::io::Error),
    #[error("Malformed schema data: {0}")]
    Format(String),
    #[error("Unsupported file type: {0}")]
    UnsupportedFileType(String),
}

/// The full store: schema name to record.
pub type SchemaMap = BTreeMap<String, SchemaRecord>;

/// A stored schema: either a structured graph definition as produced by the
/// editor, or raw JSON text kept verbatim from an earlier writer.
///
/// `Text` must stay ahead of `Graph` so plain JSON strings keep their tag.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(untagged)]
pub enum SchemaRecord {
    Text(String),
    Graph(Value),
}

impl SchemaRecord {
    /// Resolves the record to its structured form, parsing raw text records.
    pub fn to_graph(&self) -> Result<Value, VaultError> {
        match self {
            SchemaRecord::Graph(value) => Ok(value.clone()),
            SchemaRecord::Text(text) => serde_json::from_str(text)
                .map_err(|e| VaultError::Format(format!("schema text is not valid JSON: {e}"))),
        }
    }
}
