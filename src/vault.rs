use std::collections::BTreeMap;
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::merge::{self, MergeOutcome, UploadedFile};
use crate::{SchemaMap, SchemaRecord, VaultError};

/// Store key that aggregates the result of a merge. The combined mapping is
/// nested one level below it, never spliced into the top-level namespace.
pub const MERGED_SCHEMA_KEY: &str = "merged_schema";

const SNAPSHOT_VERSION: u32 = 1;

/// On-disk layout: a versioned binary envelope whose records carry their own
/// JSON text, so arbitrary nested values survive the codec.
#[derive(Serialize, Deserialize)]
struct Snapshot {
    version: u32,
    entries: BTreeMap<String, StoredRecord>,
}

#[derive(Serialize, Deserialize)]
enum StoredRecord {
    Graph(String),
    Text(String),
}

pub(crate) fn encode_snapshot(schemas: &SchemaMap) -> Result<Vec<u8>, VaultError> {
    let mut entries = BTreeMap::new();
    for (name, record) in schemas {
        let stored = match record {
            SchemaRecord::Graph(value) => StoredRecord::Graph(
                serde_json::to_string(value).map_err(|e| VaultError::Format(e.to_string()))?,
            ),
            SchemaRecord::Text(text) => StoredRecord::Text(text.clone()),
        };
        entries.insert(name.clone(), stored);
    }
    let snapshot = Snapshot {
        version: SNAPSHOT_VERSION,
        entries,
    };
    bincode::serde::encode_to_vec(&snapshot, bincode::config::standard())
        .map_err(|e| VaultError::Format(e.to_string()))
}

pub(crate) fn decode_snapshot(bytes: &[u8]) -> Result<SchemaMap, VaultError> {
    let (snapshot, _): (Snapshot, _) =
        bincode::serde::decode_from_slice(bytes, bincode::config::standard())
            .map_err(|e| VaultError::Format(e.to_string()))?;
    if snapshot.version != SNAPSHOT_VERSION {
        return Err(VaultError::Format(format!(
            "unknown snapshot version {}",
            snapshot.version
        )));
    }
    let mut schemas = SchemaMap::new();
    for (name, stored) in snapshot.entries {
        let record = match stored {
            StoredRecord::Graph(json) => SchemaRecord::Graph(
                serde_json::from_str(&json).map_err(|e| VaultError::Format(e.to_string()))?,
            ),
            StoredRecord::Text(text) => SchemaRecord::Text(text),
        };
        schemas.insert(name, record);
    }
    Ok(schemas)
}

/// Durable mapping from schema name to record, backed by a single file.
///
/// There is no in-memory cache: every operation reloads the file, mutates the
/// mapping and rewrites the whole thing. Each call is atomic only at the level
/// of its own load+mutate+save cycle.
#[derive(Clone, Debug)]
pub struct SchemaVault {
    path: PathBuf,
}

impl SchemaVault {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Reads the full store. A missing backing file is an empty store.
    pub fn load(&self) -> Result<SchemaMap, VaultError> {
        match fs::read(&self.path) {
            Ok(bytes) => decode_snapshot(&bytes),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(SchemaMap::new()),
            Err(e) => Err(VaultError::Storage(e)),
        }
    }

    /// Rewrites the backing file with the full mapping. Writes go through a
    /// sibling temp file and a rename, so a failed write leaves the previous
    /// snapshot intact.
    pub fn save_all(&self, schemas: &SchemaMap) -> Result<(), VaultError> {
        let bytes = encode_snapshot(schemas)?;
        let tmp = self.path.with_extension("tmp");
        fs::write(&tmp, &bytes)?;
        fs::rename(&tmp, &self.path)?;
        Ok(())
    }

    pub fn save_one(&self, name: &str, record: SchemaRecord) -> Result<(), VaultError> {
        let mut schemas = self.load()?;
        schemas.insert(name.to_string(), record);
        self.save_all(&schemas)
    }

    /// Removes a schema. Absence is a normal outcome, not an error.
    pub fn delete(&self, name: &str) -> Result<bool, VaultError> {
        let mut schemas = self.load()?;
        if schemas.remove(name).is_some() {
            self.save_all(&schemas)?;
            Ok(true)
        } else {
            Ok(false)
        }
    }

    /// Combines uploaded schema files and stores the result under
    /// [`MERGED_SCHEMA_KEY`]. Files the batch cannot use are reported in the
    /// outcome and never abort the rest; the key is written even when nothing
    /// was accepted.
    pub fn merge(&self, files: &[UploadedFile]) -> Result<MergeReport, VaultError> {
        let outcome = merge::merge_uploads(files);
        let mut schemas = self.load()?;
        let combined =
            serde_json::to_value(&outcome.merged).map_err(|e| VaultError::Format(e.to_string()))?;
        schemas.insert(MERGED_SCHEMA_KEY.to_string(), SchemaRecord::Graph(combined));
        self.save_all(&schemas)?;
        Ok(MergeReport { schemas, outcome })
    }

    /// Serializes one record to pretty-printed interchange JSON. Raw text
    /// records are parsed to their structured form first.
    pub fn export_one(&self, record: &SchemaRecord) -> Result<String, VaultError> {
        let graph = record.to_graph()?;
        serde_json::to_string_pretty(&graph).map_err(|e| VaultError::Format(e.to_string()))
    }

    /// Parses interchange JSON into a record without touching the store. The
    /// caller picks a name and calls [`SchemaVault::save_one`] separately.
    pub fn import_one(&self, bytes: &[u8]) -> Result<SchemaRecord, VaultError> {
        serde_json::from_slice(bytes)
            .map_err(|e| VaultError::Format(format!("invalid JSON import: {e}")))
    }
}

/// Full result of a merge: the updated store plus the per-file report.
#[derive(Debug)]
pub struct MergeReport {
    pub schemas: SchemaMap,
    pub outcome: MergeOutcome,
}
