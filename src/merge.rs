use serde::Serialize;
use tracing::warn;

use crate::vault;
use crate::{SchemaMap, VaultError};

/// One file handed over by the upload interface.
#[derive(Debug, Clone)]
pub struct UploadedFile {
    pub name: String,
    pub bytes: Vec<u8>,
}

/// A schema that collided with an earlier arrival and was stored under a
/// fresh key.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RenamedSchema {
    pub original: String,
    pub stored_as: String,
    pub source: String,
}

/// A file the merge could not use, with the cause.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RejectedFile {
    pub name: String,
    pub reason: String,
}

/// Result of folding a batch of uploads: the combined mapping plus what was
/// renamed or rejected along the way.
#[derive(Debug, Default)]
pub struct MergeOutcome {
    pub merged: SchemaMap,
    pub renamed: Vec<RenamedSchema>,
    pub rejected: Vec<RejectedFile>,
}

/// Decodes one uploaded file into a name-to-record batch based on its suffix.
/// `.barfi` files are interchange JSON, `.pkl` files are native snapshot
/// bytes (a whole backing file can be uploaded as-is).
fn decode_batch(file: &UploadedFile) -> Result<SchemaMap, VaultError> {
    if file.name.ends_with(".barfi") {
        let text = std::str::from_utf8(&file.bytes)
            .map_err(|e| VaultError::Format(format!("not UTF-8 text: {e}")))?;
        serde_json::from_str(text).map_err(|e| VaultError::Format(e.to_string()))
    } else if file.name.ends_with(".pkl") {
        vault::decode_snapshot(&file.bytes)
    } else {
        Err(VaultError::UnsupportedFileType(file.name.clone()))
    }
}

/// Folds every uploaded batch into one combined mapping. The first writer of
/// a name keeps it; later arrivals are stored under a conflict key. A file
/// that fails to decode is reported and skipped, never aborting the batch.
pub fn merge_uploads(files: &[UploadedFile]) -> MergeOutcome {
    let mut outcome = MergeOutcome::default();
    for file in files {
        let batch = match decode_batch(file) {
            Ok(batch) => batch,
            Err(err) => {
                warn!("rejected {} during merge: {err}", file.name);
                outcome.rejected.push(RejectedFile {
                    name: file.name.clone(),
                    reason: err.to_string(),
                });
                continue;
            }
        };
        for (name, record) in batch {
            if outcome.merged.contains_key(&name) {
                let stored_as = conflict_key(&outcome.merged, &name);
                warn!("schema name conflict for {name}, storing as {stored_as}");
                outcome.renamed.push(RenamedSchema {
                    original: name,
                    stored_as: stored_as.clone(),
                    source: file.name.clone(),
                });
                outcome.merged.insert(stored_as, record);
            } else {
                outcome.merged.insert(name, record);
            }
        }
    }
    outcome
}

/// Picks a free key for a colliding schema name: `name_merged`, then
/// `name_merged_2`, `name_merged_3` and so on.
fn conflict_key(taken: &SchemaMap, name: &str) -> String {
    let base = format!("{name}_merged");
    if !taken.contains_key(&base) {
        return base;
    }
    let mut n = 2u32;
    loop {
        let candidate = format!("{base}_{n}");
        if !taken.contains_key(&candidate) {
            return candidate;
        }
        n += 1;
    }
}
