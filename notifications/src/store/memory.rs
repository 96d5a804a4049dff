use std::collections::HashMap;

use parking_lot::RwLock;
use tokio::sync::broadcast;

use super::{ChangeNotifier, KeyValueStore};
use crate::errors::NotificationResult;

/// In-process store. Contents are lost when the process exits.
#[derive(Debug)]
pub struct MemoryStore {
    values: RwLock<HashMap<String, String>>,
    notifier: ChangeNotifier,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self {
            values: RwLock::new(HashMap::new()),
            notifier: ChangeNotifier::new(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.values.read().is_empty()
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl KeyValueStore for MemoryStore {
    fn get_string(&self, key: &str) -> NotificationResult<Option<String>> {
        Ok(self.values.read().get(key).cloned())
    }

    fn set_string(&self, key: &str, value: &str) -> NotificationResult<()> {
        self.values
            .write()
            .insert(key.to_string(), value.to_string());
        self.notifier.notify(key);
        Ok(())
    }

    fn remove(&self, key: &str) -> NotificationResult<()> {
        if self.values.write().remove(key).is_some() {
            self.notifier.notify(key);
        }
        Ok(())
    }

    fn subscribe(&self) -> broadcast::Receiver<String> {
        self.notifier.subscribe()
    }
}
