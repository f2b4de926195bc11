//! Durable session storage.
//!
//! - `FileStorage`: JSON key/value file, rewritten atomically on every update.
//! - `MemoryStorage`: process-local map for tests and ephemeral sessions.
//!
//! Only four keys are ever written: credential, email, display name and the
//! serialized advisor record.

use std::collections::BTreeMap;
use std::io::Write;
use std::path::{Path, PathBuf};

use parking_lot::Mutex;

use crate::advisor::AdvisorRecord;
use crate::error::StoreError;

pub const KEY_CREDENTIAL: &str = "gcp_token";
pub const KEY_EMAIL: &str = "user_email";
pub const KEY_NAME: &str = "user_name";
pub const KEY_ADVISOR: &str = "advisor_data";

const ALL_KEYS: [&str; 4] = [KEY_CREDENTIAL, KEY_EMAIL, KEY_NAME, KEY_ADVISOR];

/// Key/value backend. `update` applies all writes and removals as one unit.
pub trait KeyValueStorage: Send + Sync {
    fn get(&self, key: &str) -> Result<Option<String>, StoreError>;
    fn update(&self, set: &[(&str, String)], remove: &[&str]) -> Result<(), StoreError>;
}

#[derive(Debug, Default)]
pub struct MemoryStorage {
    entries: Mutex<BTreeMap<String, String>>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }
}

impl KeyValueStorage for MemoryStorage {
    fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        Ok(self.entries.lock().get(key).cloned())
    }

    fn update(&self, set: &[(&str, String)], remove: &[&str]) -> Result<(), StoreError> {
        let mut entries = self.entries.lock();
        for key in remove {
            entries.remove(*key);
        }
        for (key, value) in set {
            entries.insert((*key).to_string(), value.clone());
        }
        Ok(())
    }
}

/// JSON file backend. The whole map is rewritten via temp file + rename so a
/// reader never observes a half-applied update.
#[derive(Debug)]
pub struct FileStorage {
    path: PathBuf,
    lock: Mutex<()>,
}

impl FileStorage {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            lock: Mutex::new(()),
        }
    }

    fn read_map(&self) -> Result<BTreeMap<String, String>, StoreError> {
        if !self.path.exists() {
            return Ok(BTreeMap::new());
        }
        let content = std::fs::read_to_string(&self.path)?;
        if content.trim().is_empty() {
            return Ok(BTreeMap::new());
        }
        Ok(serde_json::from_str(&content)?)
    }

    fn write_map(&self, map: &BTreeMap<String, String>) -> Result<(), StoreError> {
        let parent = self
            .path
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .unwrap_or(Path::new("."));
        if !parent.exists() {
            std::fs::create_dir_all(parent)?;
            #[cfg(unix)]
            {
                use std::os::unix::fs::PermissionsExt;
                std::fs::set_permissions(parent, std::fs::Permissions::from_mode(0o700))?;
            }
        }

        let content = serde_json::to_string_pretty(map)?;
        let mut tmp = tempfile::NamedTempFile::new_in(parent)?;
        tmp.write_all(content.as_bytes())?;
        tmp.as_file().sync_all()?;
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            std::fs::set_permissions(tmp.path(), std::fs::Permissions::from_mode(0o600))?;
        }
        tmp.persist(&self.path).map_err(|e| StoreError::Persist {
            path: self.path.clone(),
            message: e.error.to_string(),
        })?;
        Ok(())
    }
}

impl KeyValueStorage for FileStorage {
    fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        let _guard = self.lock.lock();
        Ok(self.read_map()?.remove(key))
    }

    fn update(&self, set: &[(&str, String)], remove: &[&str]) -> Result<(), StoreError> {
        let _guard = self.lock.lock();
        let mut map = match self.read_map() {
            Ok(map) => map,
            Err(e) => {
                log::warn!(
                    "Session file {} unreadable ({}); starting fresh",
                    self.path.display(),
                    e
                );
                BTreeMap::new()
            }
        };
        for key in remove {
            map.remove(*key);
        }
        for (key, value) in set {
            map.insert((*key).to_string(), value.clone());
        }

        if map.is_empty() {
            if self.path.exists() {
                std::fs::remove_file(&self.path)?;
            }
            return Ok(());
        }
        self.write_map(&map)
    }
}

/// What survives a reload.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StoredSession {
    pub credential: Option<String>,
    pub email: Option<String>,
    pub name: Option<String>,
    pub advisor: Option<AdvisorRecord>,
}

impl StoredSession {
    pub fn is_empty(&self) -> bool {
        self.credential.is_none() && self.email.is_none() && self.name.is_none() && self.advisor.is_none()
    }
}

pub struct SessionStore {
    storage: Box<dyn KeyValueStorage>,
}

impl SessionStore {
    pub fn new(storage: Box<dyn KeyValueStorage>) -> Self {
        Self { storage }
    }

    pub fn in_memory() -> Self {
        Self::new(Box::new(MemoryStorage::new()))
    }

    pub fn file(path: impl Into<PathBuf>) -> Self {
        Self::new(Box::new(FileStorage::new(path)))
    }

    /// Replace the stored session wholesale. Absent fields are removed.
    pub fn persist(&self, session: &StoredSession) -> Result<(), StoreError> {
        let mut set: Vec<(&str, String)> = Vec::new();
        let mut remove: Vec<&str> = Vec::new();

        for (key, value) in [
            (KEY_CREDENTIAL, &session.credential),
            (KEY_EMAIL, &session.email),
            (KEY_NAME, &session.name),
        ] {
            match value {
                Some(v) => set.push((key, v.clone())),
                None => remove.push(key),
            }
        }
        match &session.advisor {
            Some(advisor) => set.push((KEY_ADVISOR, serde_json::to_string(advisor)?)),
            None => remove.push(KEY_ADVISOR),
        }

        self.storage.update(&set, &remove)
    }

    /// Overwrite only the cached advisor record.
    pub fn persist_advisor(&self, advisor: &AdvisorRecord) -> Result<(), StoreError> {
        let json = serde_json::to_string(advisor)?;
        self.storage.update(&[(KEY_ADVISOR, json)], &[])
    }

    /// Load the stored session. Storage failures yield an empty session.
    pub fn restore(&self) -> StoredSession {
        let read = |key: &str| match self.storage.get(key) {
            Ok(value) => value.filter(|v| !v.is_empty()),
            Err(e) => {
                log::warn!("Failed to read {} from session storage: {}", key, e);
                None
            }
        };

        let advisor = read(KEY_ADVISOR).and_then(|raw| {
            serde_json::from_str::<AdvisorRecord>(&raw)
                .map_err(|e| log::warn!("Ignoring corrupt stored advisor record: {}", e))
                .ok()
        });

        StoredSession {
            credential: read(KEY_CREDENTIAL),
            email: read(KEY_EMAIL),
            name: read(KEY_NAME),
            advisor,
        }
    }

    /// Drop the credential and email after the backend rejected them.
    pub fn clear_credential(&self) -> Result<(), StoreError> {
        self.storage.update(&[], &[KEY_CREDENTIAL, KEY_EMAIL])
    }

    /// Remove every session key in one update.
    pub fn clear(&self) -> Result<(), StoreError> {
        self.storage.update(&[], &ALL_KEYS)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::FallbackProfile;

    fn sample() -> StoredSession {
        StoredSession {
            credential: Some("tok-123".to_string()),
            email: Some("ana@privatebank.com".to_string()),
            name: Some("Ana Ortiz".to_string()),
            advisor: Some(FallbackProfile::default().advisor),
        }
    }

    #[test]
    fn test_file_persist_then_restore() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("nested").join("session.json");

        SessionStore::file(&path).persist(&sample()).expect("persist");

        // A fresh handle simulates a reload.
        let restored = SessionStore::file(&path).restore();
        assert_eq!(restored, sample());

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let mode = std::fs::metadata(&path).unwrap().permissions().mode();
            assert_eq!(mode & 0o777, 0o600);
        }
    }

    #[test]
    fn test_clear_removes_every_key() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("session.json");
        let store = SessionStore::file(&path);
        store.persist(&sample()).unwrap();

        store.clear().unwrap();
        assert!(!path.exists());
        assert!(SessionStore::file(&path).restore().is_empty());
    }

    #[test]
    fn test_persist_removes_absent_fields() {
        let store = SessionStore::in_memory();
        store.persist(&sample()).unwrap();

        store
            .persist(&StoredSession {
                credential: Some("manual".to_string()),
                ..StoredSession::default()
            })
            .unwrap();

        let restored = store.restore();
        assert_eq!(restored.credential.as_deref(), Some("manual"));
        assert!(restored.email.is_none());
        assert!(restored.advisor.is_none());
    }

    #[test]
    fn test_corrupt_advisor_is_ignored() {
        let storage = MemoryStorage::new();
        storage
            .update(
                &[
                    (KEY_CREDENTIAL, "tok".to_string()),
                    (KEY_ADVISOR, "{not json".to_string()),
                ],
                &[],
            )
            .unwrap();

        let restored = SessionStore::new(Box::new(storage)).restore();
        assert_eq!(restored.credential.as_deref(), Some("tok"));
        assert!(restored.advisor.is_none());
    }

    #[test]
    fn test_corrupt_file_restores_empty_and_recovers_on_write() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("session.json");
        std::fs::write(&path, "garbage").unwrap();

        let store = SessionStore::file(&path);
        assert!(store.restore().is_empty());

        store.persist(&sample()).unwrap();
        assert_eq!(store.restore(), sample());
    }

    #[test]
    fn test_clear_credential_keeps_advisor() {
        let store = SessionStore::in_memory();
        store.persist(&sample()).unwrap();
        store.clear_credential().unwrap();

        let restored = store.restore();
        assert!(restored.credential.is_none());
        assert!(restored.email.is_none());
        assert_eq!(restored.name.as_deref(), Some("Ana Ortiz"));
        assert!(restored.advisor.is_some());
    }
}
