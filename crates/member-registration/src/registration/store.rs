use std::collections::HashMap;
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

/// Storage abstraction for serialized drafts so the wizard never touches ambient state.
pub trait DraftStore: Send + Sync {
    fn get(&self, key: &str) -> Result<Option<String>, StorageError>;
    fn set(&self, key: &str, value: String) -> Result<(), StorageError>;
    fn delete(&self, key: &str) -> Result<(), StorageError>;
}

/// Error enumeration for draft storage failures. None of these ever block the user.
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("draft is corrupt: {0}")]
    Corrupt(String),
    #[error("draft storage io failure: {0}")]
    Io(#[from] std::io::Error),
    #[error("draft could not be serialized: {0}")]
    Serialization(#[from] serde_json::Error),
    #[error("draft storage unavailable: {0}")]
    Unavailable(String),
}

/// Process-local store; shared clones see the same slots.
#[derive(Debug, Default, Clone)]
pub struct MemoryDraftStore {
    slots: Arc<Mutex<HashMap<String, String>>>,
}

impl MemoryDraftStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn keys(&self) -> Vec<String> {
        let guard = self.slots.lock().expect("draft store mutex poisoned");
        let mut keys: Vec<_> = guard.keys().cloned().collect();
        keys.sort();
        keys
    }
}

impl DraftStore for MemoryDraftStore {
    fn get(&self, key: &str) -> Result<Option<String>, StorageError> {
        let guard = self.slots.lock().expect("draft store mutex poisoned");
        Ok(guard.get(key).cloned())
    }

    fn set(&self, key: &str, value: String) -> Result<(), StorageError> {
        let mut guard = self.slots.lock().expect("draft store mutex poisoned");
        guard.insert(key.to_string(), value);
        Ok(())
    }

    fn delete(&self, key: &str) -> Result<(), StorageError> {
        let mut guard = self.slots.lock().expect("draft store mutex poisoned");
        guard.remove(key);
        Ok(())
    }
}

/// One JSON file per slot under a root directory.
#[derive(Debug, Clone)]
pub struct FileDraftStore {
    root: PathBuf,
}

impl FileDraftStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Map a key to its file. Bytes outside `[A-Za-z0-9-]` become `_XX` hex escapes, so
    /// distinct keys never share a file.
    fn path_for(&self, key: &str) -> PathBuf {
        let mut file_name = String::with_capacity(key.len());
        for byte in key.bytes() {
            if byte.is_ascii_alphanumeric() || byte == b'-' {
                file_name.push(char::from(byte));
            } else {
                file_name.push_str(&format!("_{byte:02X}"));
            }
        }
        self.root.join(format!("{file_name}.json"))
    }
}

impl DraftStore for FileDraftStore {
    fn get(&self, key: &str) -> Result<Option<String>, StorageError> {
        match fs::read_to_string(self.path_for(key)) {
            Ok(contents) => Ok(Some(contents)),
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(None),
            Err(err) => Err(err.into()),
        }
    }

    fn set(&self, key: &str, value: String) -> Result<(), StorageError> {
        fs::create_dir_all(&self.root)?;
        let target = self.path_for(key);
        let staging = target.with_extension("json.tmp");
        fs::write(&staging, value)?;
        fs::rename(&staging, &target)?;
        Ok(())
    }

    fn delete(&self, key: &str) -> Result<(), StorageError> {
        match fs::remove_file(self.path_for(key)) {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(()),
            Err(err) => Err(err.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn memory_store_round_trips_and_deletes() {
        let store = MemoryDraftStore::new();
        store.set("a", "{}".to_string()).expect("set succeeds");
        assert_eq!(store.get("a").expect("get succeeds").as_deref(), Some("{}"));
        store.delete("a").expect("delete succeeds");
        assert!(store.get("a").expect("get succeeds").is_none());
        store.delete("a").expect("deleting a missing slot is fine");
    }

    #[test]
    fn file_store_persists_slots_as_files() {
        let dir = tempfile::tempdir().expect("temp dir");
        let store = FileDraftStore::new(dir.path().join("drafts"));

        assert!(store.get("web:registration-draft:public").expect("read").is_none());
        store
            .set("web:registration-draft:public", "{\"mode\":\"public\"}".to_string())
            .expect("write");

        let reopened = FileDraftStore::new(dir.path().join("drafts"));
        assert_eq!(
            reopened
                .get("web:registration-draft:public")
                .expect("read")
                .as_deref(),
            Some("{\"mode\":\"public\"}")
        );
        assert!(reopened.get("web:registration-draft:admin").expect("read").is_none());

        reopened.delete("web:registration-draft:public").expect("delete");
        assert!(store.get("web:registration-draft:public").expect("read").is_none());
    }

    #[test]
    fn file_store_keeps_similar_keys_apart() {
        let dir = tempfile::tempdir().expect("temp dir");
        let store = FileDraftStore::new(dir.path());

        store.set("a:b", "colon".to_string()).expect("write");
        store.set("a_b", "underscore".to_string()).expect("write");
        store.set("a_3Ab", "escaped".to_string()).expect("write");

        assert_eq!(store.get("a:b").expect("read").as_deref(), Some("colon"));
        assert_eq!(store.get("a_b").expect("read").as_deref(), Some("underscore"));
        assert_eq!(store.get("a_3Ab").expect("read").as_deref(), Some("escaped"));
        assert_ne!(store.path_for("a:b"), store.path_for("a_b"));
        assert_eq!(store.path_for("a:b"), dir.path().join("a_3Ab.json"));

        store.delete("a:b").expect("delete");
        assert!(store.get("a:b").expect("read").is_none());
        assert_eq!(store.get("a_b").expect("read").as_deref(), Some("underscore"));
    }
}
