use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{anyhow, Context, Result};
use serde_json::Value;

/// Named JSON documents stored as one file per name under a directory.
///
/// This backs both the service's authoritative per-collection files and the
/// gateway's local cache. Writes are whole-document replacements: the new
/// content lands in a temp file first and is renamed over the old one, so a
/// reader never observes a half-written document.
#[derive(Debug, Clone)]
pub struct JsonDocumentStore {
    dir: PathBuf,
}

impl JsonDocumentStore {
    /// Open a store rooted at `dir`, creating the directory if needed.
    ///
    /// # Errors
    /// Returns an error when the directory cannot be created.
    pub fn open(dir: &Path) -> Result<Self> {
        fs::create_dir_all(dir)
            .with_context(|| format!("failed to create store directory {}", dir.display()))?;
        Ok(Self { dir: dir.to_path_buf() })
    }

    #[must_use]
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn document_path(&self, name: &str) -> Result<PathBuf> {
        if name.is_empty()
            || !name.chars().all(|ch| ch.is_ascii_alphanumeric() || ch == '-' || ch == '_')
        {
            return Err(anyhow!("invalid document name `{name}`"));
        }
        Ok(self.dir.join(format!("{name}.json")))
    }

    /// Read and parse a document, or `None` when the file does not exist yet.
    ///
    /// # Errors
    /// Returns an error for an invalid name, an unreadable file, or a file
    /// whose content is not valid JSON.
    pub fn read(&self, name: &str) -> Result<Option<Value>> {
        let path = self.document_path(name)?;
        let body = match fs::read_to_string(&path) {
            Ok(body) => body,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(err) => {
                return Err(err)
                    .with_context(|| format!("failed to read document {}", path.display()));
            }
        };
        let value = serde_json::from_str(&body)
            .with_context(|| format!("document {} holds malformed JSON", path.display()))?;
        Ok(Some(value))
    }

    /// Replace a document with the serialized form of `value`.
    ///
    /// # Errors
    /// Returns an error for an invalid name or a failed write.
    pub fn replace(&self, name: &str, value: &Value) -> Result<()> {
        let body = serde_json::to_string(value)
            .with_context(|| format!("failed to serialize document `{name}`"))?;
        self.write_atomic(name, &body)
    }

    /// Replace a document with a raw body, after validating it parses as
    /// JSON. The body is stored byte-for-byte as received, so replacing a
    /// document with equal content is idempotent.
    ///
    /// # Errors
    /// Returns an error for an invalid name, a body that is not valid JSON,
    /// or a failed write. The caller can distinguish the malformed-body case
    /// via [`MalformedDocument`].
    pub fn replace_raw(&self, name: &str, body: &str) -> Result<Value> {
        let value: Value = serde_json::from_str(body)
            .map_err(|err| anyhow!(MalformedDocument(err.to_string())))?;
        self.write_atomic(name, body)?;
        Ok(value)
    }

    fn write_atomic(&self, name: &str, body: &str) -> Result<()> {
        let path = self.document_path(name)?;
        let tmp_path = self.dir.join(format!("{name}.json.tmp"));
        fs::write(&tmp_path, body)
            .with_context(|| format!("failed to write temp document {}", tmp_path.display()))?;
        fs::rename(&tmp_path, &path).with_context(|| {
            format!("failed to replace document {} atomically", path.display())
        })?;
        Ok(())
    }

    /// Remove a document; missing files are fine.
    ///
    /// # Errors
    /// Returns an error for an invalid name or a failed removal.
    pub fn remove(&self, name: &str) -> Result<()> {
        let path = self.document_path(name)?;
        match fs::remove_file(&path) {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(err) => {
                Err(err).with_context(|| format!("failed to remove document {}", path.display()))
            }
        }
    }
}

/// A write was rejected because the submitted body is not valid JSON.
#[derive(Debug, Clone, thiserror::Error, Eq, PartialEq)]
#[error("malformed JSON body: {0}")]
pub struct MalformedDocument(pub String);

#[cfg(test)]
mod tests {
    use super::*;

    fn temp_store() -> JsonDocumentStore {
        let dir = std::env::temp_dir().join(format!("homeboard-store-{}", ulid::Ulid::new()));
        match JsonDocumentStore::open(&dir) {
            Ok(store) => store,
            Err(err) => panic!("failed to open temp store: {err}"),
        }
    }

    fn must_read(store: &JsonDocumentStore, name: &str) -> Option<Value> {
        match store.read(name) {
            Ok(value) => value,
            Err(err) => panic!("read should succeed: {err}"),
        }
    }

    #[test]
    fn missing_document_reads_as_none() {
        let store = temp_store();
        assert_eq!(must_read(&store, "tasks"), None);
    }

    #[test]
    fn replace_then_read_round_trips() {
        let store = temp_store();
        let value = serde_json::json!({ "2025-01-15": [{ "text": "buy milk" }] });
        if let Err(err) = store.replace("tasks", &value) {
            panic!("replace should succeed: {err}");
        }
        assert_eq!(must_read(&store, "tasks"), Some(value));
    }

    #[test]
    fn replace_raw_validates_json_before_writing() {
        let store = temp_store();
        let err = match store.replace_raw("tasks", "{not json") {
            Ok(value) => panic!("expected malformed-body error, got {value}"),
            Err(err) => err,
        };
        assert!(err.downcast_ref::<MalformedDocument>().is_some());
        assert_eq!(must_read(&store, "tasks"), None);
    }

    #[test]
    fn repeated_replace_with_same_body_is_idempotent() {
        let store = temp_store();
        let body = r#"{"2025-01-15":[{"text":"once"}]}"#;
        for _ in 0..2 {
            if let Err(err) = store.replace_raw("tasks", body) {
                panic!("replace_raw should succeed: {err}");
            }
        }
        let path = store.dir().join("tasks.json");
        let stored = match fs::read_to_string(&path) {
            Ok(stored) => stored,
            Err(err) => panic!("stored file should be readable: {err}"),
        };
        assert_eq!(stored, body);
    }

    #[test]
    fn replace_overwrites_not_merges() {
        let store = temp_store();
        let first = serde_json::json!({ "2025-01-15": [{ "text": "old" }] });
        let second = serde_json::json!({ "2025-02-01": [{ "text": "new" }] });
        for value in [&first, &second] {
            if let Err(err) = store.replace("tasks", value) {
                panic!("replace should succeed: {err}");
            }
        }
        assert_eq!(must_read(&store, "tasks"), Some(second));
    }

    #[test]
    fn document_names_are_confined_to_the_store_directory() {
        let store = temp_store();
        for name in ["../escape", "a/b", "", "dot.dot"] {
            assert!(store.replace(name, &serde_json::json!({})).is_err(), "name `{name}`");
        }
    }

    #[test]
    fn corrupt_document_is_an_error_not_a_panic() {
        let store = temp_store();
        let path = store.dir().join("tasks.json");
        if let Err(err) = fs::write(&path, "{broken") {
            panic!("failed to seed corrupt file: {err}");
        }
        assert!(store.read("tasks").is_err());
    }

    #[test]
    fn remove_is_quiet_for_missing_documents() {
        let store = temp_store();
        if let Err(err) = store.remove("tasks") {
            panic!("remove of missing document should succeed: {err}");
        }
    }
}
