//! Registered users, keyed by RFID card UID, persisted as one JSON object.

use crate::types::Embedding;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("malformed JSON in {path}: {source}")]
    Json {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    #[error("name cannot be empty")]
    EmptyName,
    #[error("RFID cannot be empty")]
    EmptyRfid,
}

/// Canonical form of a card UID: trimmed and upper-cased.
pub fn normalize_rfid(raw: &str) -> String {
    raw.trim().to_uppercase()
}

/// One registered card holder.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserRecord {
    pub name: String,
    pub face_encoding: Vec<f32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub registered_at: Option<String>,
}

impl UserRecord {
    pub fn new(name: &str, embedding: &Embedding) -> Result<Self, StoreError> {
        let name = name.trim();
        if name.is_empty() {
            return Err(StoreError::EmptyName);
        }
        Ok(Self {
            name: name.to_string(),
            face_encoding: embedding.values.clone(),
            registered_at: Some(chrono::Local::now().format("%Y-%m-%d %H:%M:%S").to_string()),
        })
    }

    pub fn embedding(&self) -> Embedding {
        Embedding::new(self.face_encoding.clone())
    }
}

/// In-memory user registry backed by `users.json`.
pub struct UserStore {
    path: PathBuf,
    users: BTreeMap<String, UserRecord>,
}

impl UserStore {
    /// Load the registry. A missing file yields an empty registry.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, StoreError> {
        let path = path.as_ref().to_path_buf();
        let users = match read_json::<BTreeMap<String, UserRecord>>(&path)? {
            Some(raw) => {
                let mut users = BTreeMap::new();
                for (key, rec) in raw {
                    let rfid = normalize_rfid(&key);
                    if let Some(dropped) = users.insert(rfid.clone(), rec) {
                        tracing::warn!(
                            rfid = %rfid,
                            key = %key,
                            dropped = %dropped.name,
                            "duplicate RFID after normalisation; later entry wins"
                        );
                    }
                }
                users
            }
            None => {
                tracing::warn!(path = %path.display(), "no users file found; register users first");
                BTreeMap::new()
            }
        };

        tracing::info!(path = %path.display(), count = users.len(), "loaded registered users");
        Ok(Self { path, users })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn get(&self, rfid: &str) -> Option<&UserRecord> {
        self.users.get(&normalize_rfid(rfid))
    }

    pub fn contains(&self, rfid: &str) -> bool {
        self.get(rfid).is_some()
    }

    /// Insert or replace a user, returning the record it replaced.
    pub fn insert(&mut self, rfid: &str, record: UserRecord) -> Result<Option<UserRecord>, StoreError> {
        let rfid = normalize_rfid(rfid);
        if rfid.is_empty() {
            return Err(StoreError::EmptyRfid);
        }
        if record.name.trim().is_empty() {
            return Err(StoreError::EmptyName);
        }
        Ok(self.users.insert(rfid, record))
    }

    pub fn remove(&mut self, rfid: &str) -> Option<UserRecord> {
        self.users.remove(&normalize_rfid(rfid))
    }

    pub fn len(&self) -> usize {
        self.users.len()
    }

    pub fn is_empty(&self) -> bool {
        self.users.is_empty()
    }

    /// Users ordered by RFID.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &UserRecord)> {
        self.users.iter().map(|(k, v)| (k.as_str(), v))
    }

    /// Rewrite the whole file.
    pub fn save(&self) -> Result<(), StoreError> {
        write_json(&self.path, &self.users)?;
        tracing::info!(path = %self.path.display(), count = self.users.len(), "saved users");
        Ok(())
    }
}

/// `Ok(None)` when the file does not exist.
pub(crate) fn read_json<T: serde::de::DeserializeOwned>(path: &Path) -> Result<Option<T>, StoreError> {
    let contents = match fs::read_to_string(path) {
        Ok(c) => c,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(source) => {
            return Err(StoreError::Io {
                path: path.to_path_buf(),
                source,
            })
        }
    };
    serde_json::from_str(&contents)
        .map(Some)
        .map_err(|source| StoreError::Json {
            path: path.to_path_buf(),
            source,
        })
}

pub(crate) fn write_json<T: Serialize>(path: &Path, value: &T) -> Result<(), StoreError> {
    let io_err = |source| StoreError::Io {
        path: path.to_path_buf(),
        source,
    };

    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent).map_err(io_err)?;
    }

    let json = serde_json::to_string_pretty(value).map_err(|source| StoreError::Json {
        path: path.to_path_buf(),
        source,
    })?;
    fs::write(path, json).map_err(io_err)
}
