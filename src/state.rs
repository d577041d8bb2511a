use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::PersistenceError;
use crate::model::KnownIds;

#[derive(Debug, Serialize, Deserialize)]
struct StateFile {
    #[serde(default)]
    site_id: String,
    // older records stored AmiAmi gcodes under their own key
    #[serde(default, alias = "gcodes")]
    ids: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    updated_at: Option<String>,
}

/// Known ids for one site. A missing record is the first-run state, not an error.
pub fn load(path: &Path) -> Result<KnownIds, PersistenceError> {
    let bytes = match fs::read(path) {
        Ok(b) => b,
        Err(e) if e.kind() == ErrorKind::NotFound => {
            debug!(path = %path.display(), "no state record yet");
            return Ok(KnownIds::new());
        }
        Err(source) => {
            return Err(PersistenceError::Read {
                path: path.to_path_buf(),
                source,
            })
        }
    };
    let record: StateFile = serde_json::from_slice(&bytes).map_err(|source| PersistenceError::Corrupt {
        path: path.to_path_buf(),
        source,
    })?;
    Ok(record
        .ids
        .into_iter()
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect())
}

/// Replace the record with `known`. Written to a sibling temp file and
/// renamed into place, so readers see either the old or the new record.
pub fn save(path: &Path, site_id: &str, known: &KnownIds) -> Result<(), PersistenceError> {
    let write_err = |source| PersistenceError::Write {
        path: path.to_path_buf(),
        source,
    };

    if let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) {
        fs::create_dir_all(dir).map_err(write_err)?;
    }

    let record = StateFile {
        site_id: site_id.to_string(),
        ids: known.iter().cloned().collect(),
        updated_at: Some(Utc::now().to_rfc3339()),
    };
    let body = serde_json::to_vec_pretty(&record).map_err(|e| write_err(e.into()))?;

    let tmp = temp_path(path);
    fs::write(&tmp, body).map_err(write_err)?;
    fs::rename(&tmp, path).map_err(|e| {
        let _ = fs::remove_file(&tmp);
        write_err(e)
    })?;
    debug!(path = %path.display(), ids = known.len(), "state saved");
    Ok(())
}

fn temp_path(path: &Path) -> PathBuf {
    let mut name = path.file_name().map(|n| n.to_os_string()).unwrap_or_default();
    name.push(".tmp");
    path.with_file_name(name)
}
