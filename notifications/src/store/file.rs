use std::collections::BTreeMap;
use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};

use blake3::Hasher as Blake3;
use chrono::Utc;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

use super::{ChangeNotifier, KeyValueStore};
use crate::errors::{NotificationError, NotificationResult};

const STORE_VERSION: u16 = 1;

#[derive(Debug, Clone, Serialize, Deserialize)]
struct StoreEnvelope {
    version: u16,
    checksum: [u8; 32],
    payload: BTreeMap<String, String>,
    modified_at_unix: i64,
}

/// Key-value store persisted as a single checksummed JSON file.
///
/// The whole map is rewritten on every change through a temp file and a rename.
/// A file that cannot be read or fails its integrity check loads as empty.
#[derive(Debug)]
pub struct FileStore {
    path: PathBuf,
    values: RwLock<BTreeMap<String, String>>,
    notifier: ChangeNotifier,
}

impl FileStore {
    pub fn open(path: impl AsRef<Path>) -> Self {
        let path = path.as_ref().to_path_buf();
        let values = match load_envelope(&path) {
            Ok(Some(values)) => values,
            Ok(None) => BTreeMap::new(),
            Err(err) => {
                log::warn!(
                    "Notification store at {} is unreadable, starting empty: {}",
                    path.display(),
                    err
                );
                BTreeMap::new()
            }
        };

        Self {
            path,
            values: RwLock::new(values),
            notifier: ChangeNotifier::new(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn persist(&self, values: &BTreeMap<String, String>) -> NotificationResult<()> {
        let envelope = StoreEnvelope {
            version: STORE_VERSION,
            checksum: checksum(values)?,
            modified_at_unix: Utc::now().timestamp(),
            payload: values.clone(),
        };

        let serialized = serde_json::to_vec_pretty(&envelope)?;
        let tmp_path = self.path.with_extension("new");
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }
        {
            let mut file = File::create(&tmp_path)?;
            file.write_all(&serialized)?;
            file.sync_all()?;
        }
        fs::rename(tmp_path, &self.path)?;
        Ok(())
    }

    fn mutate<F>(&self, key: &str, change: F) -> NotificationResult<()>
    where
        F: FnOnce(&mut BTreeMap<String, String>) -> bool,
    {
        let mut guard = self.values.write();
        let mut next = guard.clone();
        if !change(&mut next) {
            return Ok(());
        }
        self.persist(&next)?;
        *guard = next;
        drop(guard);
        self.notifier.notify(key);
        Ok(())
    }
}

impl KeyValueStore for FileStore {
    fn get_string(&self, key: &str) -> NotificationResult<Option<String>> {
        Ok(self.values.read().get(key).cloned())
    }

    fn set_string(&self, key: &str, value: &str) -> NotificationResult<()> {
        self.mutate(key, |values| {
            values.insert(key.to_string(), value.to_string());
            true
        })
    }

    fn remove(&self, key: &str) -> NotificationResult<()> {
        self.mutate(key, |values| values.remove(key).is_some())
    }

    fn subscribe(&self) -> broadcast::Receiver<String> {
        self.notifier.subscribe()
    }
}

fn load_envelope(path: &Path) -> NotificationResult<Option<BTreeMap<String, String>>> {
    if !path.exists() {
        return Ok(None);
    }

    let bytes = fs::read(path)?;
    let envelope: StoreEnvelope = serde_json::from_slice(&bytes)?;
    if envelope.version != STORE_VERSION {
        return Err(NotificationError::StorageError(format!(
            "Unsupported store version {}",
            envelope.version
        )));
    }

    if checksum(&envelope.payload)? != envelope.checksum {
        return Err(NotificationError::StorageError(
            "Store integrity verification failed".to_string(),
        ));
    }

    Ok(Some(envelope.payload))
}

fn checksum(values: &BTreeMap<String, String>) -> NotificationResult<[u8; 32]> {
    let mut hasher = Blake3::new();
    hasher.update(&serde_json::to_vec(values)?);
    let mut output = [0u8; 32];
    output.copy_from_slice(hasher.finalize().as_bytes());
    Ok(output)
}
