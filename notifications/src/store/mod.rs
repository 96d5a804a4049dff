//! Key-value persistence used for notification settings.
//!
//! Values are strings; numbers are stored as their decimal representation.
//! Every successful write publishes the changed key to subscribers.

pub mod file;
pub mod memory;

pub use file::FileStore;
pub use memory::MemoryStore;

use tokio::sync::broadcast;

use crate::errors::{NotificationError, NotificationResult};

const CHANGE_CHANNEL_CAPACITY: usize = 64;

/// Synchronous string key-value store with change notifications.
pub trait KeyValueStore: Send + Sync {
    fn get_string(&self, key: &str) -> NotificationResult<Option<String>>;

    fn set_string(&self, key: &str, value: &str) -> NotificationResult<()>;

    fn remove(&self, key: &str) -> NotificationResult<()>;

    /// Receiver yielding the name of every key written after this call.
    fn subscribe(&self) -> broadcast::Receiver<String>;

    fn get_number(&self, key: &str) -> NotificationResult<Option<i64>> {
        match self.get_string(key)? {
            Some(raw) => raw.trim().parse::<i64>().map(Some).map_err(|_| {
                NotificationError::SerializationError(format!(
                    "Value for key '{}' is not a number",
                    key
                ))
            }),
            None => Ok(None),
        }
    }

    fn set_number(&self, key: &str, value: i64) -> NotificationResult<()> {
        self.set_string(key, &value.to_string())
    }
}

/// Fan-out of changed key names.
#[derive(Debug, Clone)]
pub(crate) struct ChangeNotifier {
    sender: broadcast::Sender<String>,
}

impl ChangeNotifier {
    pub(crate) fn new() -> Self {
        let (sender, _) = broadcast::channel(CHANGE_CHANNEL_CAPACITY);
        Self { sender }
    }

    pub(crate) fn notify(&self, key: &str) {
        // No receivers is fine.
        let _ = self.sender.send(key.to_string());
    }

    pub(crate) fn subscribe(&self) -> broadcast::Receiver<String> {
        self.sender.subscribe()
    }
}
