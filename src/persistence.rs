//! Persistence for vector stores and evaluation reports.
//!
//! Stores can be saved as JSON (human-readable) or bincode (compact binary),
//! chosen by file extension. Every write goes to a sibling temp file that is
//! renamed over the target, so a crash never leaves a half-written file.

use crate::error::{EvalError, Result};
use crate::store::FlatStore;
use serde::Serialize;
use std::fs;
use std::path::{Path, PathBuf};

/// Store location used by the command-line tools when none is given.
pub const DEFAULT_STORE_PATH: &str = "data/vector_store.bin";

/// Save format for stores.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SaveFormat {
    /// JSON format (human-readable, larger).
    Json,
    /// Bincode format (binary, compact).
    Bincode,
}

impl SaveFormat {
    /// Determine format from file extension.
    pub fn from_path(path: &Path) -> Self {
        match path.extension().and_then(|e| e.to_str()) {
            Some("json") => SaveFormat::Json,
            Some("bin") | Some("bincode") => SaveFormat::Bincode,
            _ => SaveFormat::Bincode,
        }
    }
}

fn temp_path(path: &Path) -> PathBuf {
    let mut name = path
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_default();
    name.push(".tmp");
    path.with_file_name(name)
}

/// Write `data` to `path` via temp file + rename.
pub fn write_atomic(path: &Path, data: &[u8]) -> Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() && !parent.exists() {
            fs::create_dir_all(parent).map_err(|e| EvalError::io(parent, e))?;
        }
    }

    let tmp = temp_path(path);
    if let Err(e) = fs::write(&tmp, data) {
        let _ = fs::remove_file(&tmp);
        return Err(EvalError::io(&tmp, e));
    }
    fs::rename(&tmp, path).map_err(|e| {
        let _ = fs::remove_file(&tmp);
        EvalError::io(path, e)
    })
}

/// Save a store, choosing the format from the extension.
pub fn save_store(store: &FlatStore, path: &Path) -> Result<()> {
    save_store_with_format(store, path, SaveFormat::from_path(path))
}

/// Save a store with a specific format.
pub fn save_store_with_format(store: &FlatStore, path: &Path, format: SaveFormat) -> Result<()> {
    let data = match format {
        SaveFormat::Json => serde_json::to_vec_pretty(store)
            .map_err(|e| EvalError::Serialization(e.to_string()))?,
        SaveFormat::Bincode => bincode::encode_to_vec(store, bincode::config::standard())
            .map_err(|e| EvalError::Serialization(e.to_string()))?,
    };

    write_atomic(path, &data)
}

/// Load a store saved by [`save_store`].
///
/// A missing or undecodable file is a store error: the run cannot proceed
/// without its index.
pub fn load_store(path: &Path) -> Result<FlatStore> {
    if !path.is_file() {
        return Err(EvalError::Store(format!(
            "No vector store at '{}'. Run the index command first.",
            path.display()
        )));
    }

    let data = fs::read(path).map_err(|e| EvalError::io(path, e))?;
    let store = match SaveFormat::from_path(path) {
        SaveFormat::Json => serde_json::from_slice(&data)
            .map_err(|e| EvalError::Store(format!("Corrupted store file: {}", e)))?,
        SaveFormat::Bincode => {
            let (store, _): (FlatStore, usize) =
                bincode::decode_from_slice(&data, bincode::config::standard())
                    .map_err(|e| EvalError::Store(format!("Corrupted store file: {}", e)))?;
            store
        }
    };

    Ok(store)
}

/// Check if a store file exists at the given path.
pub fn store_exists(path: &Path) -> bool {
    path.exists() && path.is_file()
}

/// Get the size of a file in bytes.
pub fn file_size(path: &Path) -> Result<u64> {
    let metadata = fs::metadata(path).map_err(|e| EvalError::io(path, e))?;
    Ok(metadata.len())
}

/// Save any serializable value (typically a report) as pretty JSON.
pub fn save_json<T: Serialize>(value: &T, path: &Path) -> Result<()> {
    let data = serde_json::to_vec_pretty(value)?;
    write_atomic(path, &data)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dataset::ContentItem;
    use crate::store::VectorStore;
    use tempfile::TempDir;

    fn create_test_store() -> FlatStore {
        let mut store = FlatStore::for_model("text-embedding-3-small");
        store
            .insert(vec![1.0, 0.0], ContentItem::new(1, "Rust", "ownership"))
            .unwrap();
        store
            .insert(vec![0.0, 1.0], ContentItem::new(2, "Python", "pandas"))
            .unwrap();
        store
    }

    #[test]
    fn test_save_and_load_both_formats() {
        let dir = TempDir::new().unwrap();
        for name in ["store.json", "store.bin"] {
            let path = dir.path().join(name);
            save_store(&create_test_store(), &path).unwrap();
            assert!(store_exists(&path));

            let loaded = load_store(&path).unwrap();
            assert_eq!(loaded.len(), 2);
            assert_eq!(loaded.model(), Some("text-embedding-3-small"));
            assert_eq!(loaded.query(&[0.0, 1.0], 1).unwrap()[0].id, 2);
        }
    }

    #[test]
    fn test_format_detection() {
        assert_eq!(SaveFormat::from_path(Path::new("s.json")), SaveFormat::Json);
        assert_eq!(SaveFormat::from_path(Path::new("s.bin")), SaveFormat::Bincode);
        assert_eq!(SaveFormat::from_path(Path::new("s.bincode")), SaveFormat::Bincode);
        assert_eq!(SaveFormat::from_path(Path::new("s")), SaveFormat::Bincode);
        assert_eq!(
            SaveFormat::from_path(Path::new(DEFAULT_STORE_PATH)),
            SaveFormat::Bincode
        );
    }

    #[test]
    fn test_atomic_write_leaves_no_temp_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("nested/report.json");
        save_json(&serde_json::json!({"ok": true}), &path).unwrap();

        assert!(path.exists());
        assert!(!temp_path(&path).exists());
        assert!(file_size(&path).unwrap() > 0);
    }

    #[test]
    fn test_missing_store_is_store_error() {
        let result = load_store(Path::new("/nonexistent/store.bin"));
        assert!(matches!(result, Err(EvalError::Store(_))));
    }

    #[test]
    fn test_corrupted_store_is_store_error() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("store.json");
        fs::write(&path, "{not json").unwrap();
        assert!(matches!(load_store(&path), Err(EvalError::Store(_))));
    }
}
