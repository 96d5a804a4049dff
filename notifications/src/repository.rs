//! Canonical persisted representation of notification settings.
//!
//! Every write replaces the whole collection stored under one key. Callers in
//! the same process are serialised through an internal lock so a
//! read-modify-write sequence cannot interleave with another one; there is no
//! transaction spanning the settings key and the group key.

use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::broadcast;

use crate::errors::NotificationResult;
use crate::store::KeyValueStore;
use crate::types::{
    GroupSettings, NotificationRelationship, WalletNotificationSettings, WalletSettingsPatch,
    NOTIFICATIONS_SETTINGS_VERSION_KEY, WALLET_GROUPS_STORAGE_KEY, WALLET_TOPICS_STORAGE_KEY,
};

/// Version assumed when none has been written yet.
pub const INITIAL_SETTINGS_VERSION: i64 = 1;

pub struct SettingsRepository {
    store: Arc<dyn KeyValueStore>,
    write_lock: Mutex<()>,
}

impl std::fmt::Debug for SettingsRepository {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SettingsRepository").finish_non_exhaustive()
    }
}

impl SettingsRepository {
    pub fn new(store: Arc<dyn KeyValueStore>) -> Self {
        Self {
            store,
            write_lock: Mutex::new(()),
        }
    }

    /// All wallet settings, or an empty collection when nothing usable is stored.
    pub fn get_all(&self) -> Vec<WalletNotificationSettings> {
        let raw = match self.store.get_string(WALLET_TOPICS_STORAGE_KEY) {
            Ok(Some(raw)) => raw,
            Ok(None) => return Vec::new(),
            Err(err) => {
                log::warn!("Notifications: failed to read wallet settings: {}", err);
                return Vec::new();
            }
        };

        serde_json::from_str(&raw).unwrap_or_else(|err| {
            log::warn!(
                "Notifications: stored wallet settings are corrupt, ignoring: {}",
                err
            );
            Vec::new()
        })
    }

    pub fn set_all(&self, settings: &[WalletNotificationSettings]) -> NotificationResult<()> {
        let _guard = self.write_lock.lock();
        self.write_all(settings)
    }

    /// Runs `op` on the stored collection and writes the result back as one batch.
    pub fn update<F, T>(&self, op: F) -> NotificationResult<T>
    where
        F: FnOnce(&mut Vec<WalletNotificationSettings>) -> T,
    {
        let _guard = self.write_lock.lock();
        let mut settings = self.get_all();
        let output = op(&mut settings);
        self.write_all(&settings)?;
        Ok(output)
    }

    pub fn wallet_has_settings(&self, address: &str) -> bool {
        self.settings_for_address(address).is_some()
    }

    pub fn settings_for_address(&self, address: &str) -> Option<WalletNotificationSettings> {
        self.get_all()
            .into_iter()
            .find(|wallet| wallet.matches_address(address))
    }

    /// Merges `patch` onto every wallet with the given relationship.
    pub fn update_settings_for_wallets_with_relationship_type(
        &self,
        relationship: NotificationRelationship,
        patch: &WalletSettingsPatch,
    ) -> NotificationResult<Vec<WalletNotificationSettings>> {
        self.update(|settings| {
            settings
                .iter_mut()
                .filter(|wallet| wallet.relationship == relationship)
                .for_each(|wallet| patch.apply(wallet));
            settings.clone()
        })
    }

    /// Merges `patch` onto the wallet with `address`; `None` when there is no such wallet.
    pub fn update_settings_for_wallet_with_address(
        &self,
        address: &str,
        patch: &WalletSettingsPatch,
    ) -> NotificationResult<Option<WalletNotificationSettings>> {
        let _guard = self.write_lock.lock();
        let mut settings = self.get_all();
        let Some(wallet) = settings
            .iter_mut()
            .find(|wallet| wallet.matches_address(address))
        else {
            return Ok(None);
        };
        patch.apply(wallet);
        let updated = wallet.clone();
        self.write_all(&settings)?;
        Ok(Some(updated))
    }

    /// Drops the record for `address` and returns it.
    pub fn remove_settings_for_wallet(
        &self,
        address: &str,
    ) -> NotificationResult<Option<WalletNotificationSettings>> {
        let _guard = self.write_lock.lock();
        let mut settings = self.get_all();
        let Some(position) = settings
            .iter()
            .position(|wallet| wallet.matches_address(address))
        else {
            return Ok(None);
        };
        let removed = settings.remove(position);
        self.write_all(&settings)?;
        Ok(Some(removed))
    }

    /// Stored group toggles; empty when nothing usable is stored.
    pub fn get_group_settings(&self) -> GroupSettings {
        let raw = match self.store.get_string(WALLET_GROUPS_STORAGE_KEY) {
            Ok(Some(raw)) => raw,
            Ok(None) => return GroupSettings::new(),
            Err(err) => {
                log::warn!("Notifications: failed to read group settings: {}", err);
                return GroupSettings::new();
            }
        };

        serde_json::from_str(&raw).unwrap_or_else(|err| {
            log::warn!(
                "Notifications: stored group settings are corrupt, ignoring: {}",
                err
            );
            GroupSettings::new()
        })
    }

    /// Merges `partial` onto the stored group toggles and returns the result.
    pub fn set_group_settings(&self, partial: &GroupSettings) -> NotificationResult<GroupSettings> {
        let _guard = self.write_lock.lock();
        let mut merged = self.get_group_settings();
        merged.merge(partial);
        self.store
            .set_string(WALLET_GROUPS_STORAGE_KEY, &serde_json::to_string(&merged)?)?;
        Ok(merged)
    }

    /// Writes default group toggles when none are stored. Returns whether it wrote.
    pub fn add_default_group_settings(&self) -> NotificationResult<bool> {
        let _guard = self.write_lock.lock();
        if matches!(self.store.get_string(WALLET_GROUPS_STORAGE_KEY), Ok(Some(_))) {
            return Ok(false);
        }
        self.store.set_string(
            WALLET_GROUPS_STORAGE_KEY,
            &serde_json::to_string(&GroupSettings::defaults())?,
        )?;
        Ok(true)
    }

    pub fn get_settings_version(&self) -> i64 {
        match self.store.get_number(NOTIFICATIONS_SETTINGS_VERSION_KEY) {
            Ok(Some(version)) => version,
            Ok(None) => INITIAL_SETTINGS_VERSION,
            Err(err) => {
                log::warn!("Notifications: unreadable settings version: {}", err);
                INITIAL_SETTINGS_VERSION
            }
        }
    }

    pub fn set_settings_version(&self, version: i64) -> NotificationResult<()> {
        self.store
            .set_number(NOTIFICATIONS_SETTINGS_VERSION_KEY, version)
    }

    /// Follows the wallet settings key, yielding the collection after every write.
    pub fn watch_settings(self: &Arc<Self>) -> SettingsWatcher {
        SettingsWatcher {
            repository: Arc::clone(self),
            changes: self.store.subscribe(),
        }
    }

    fn write_all(&self, settings: &[WalletNotificationSettings]) -> NotificationResult<()> {
        let serialized = serde_json::to_string(settings)?;
        self.store
            .set_string(WALLET_TOPICS_STORAGE_KEY, &serialized)
    }
}

/// Stream of wallet settings snapshots.
pub struct SettingsWatcher {
    repository: Arc<SettingsRepository>,
    changes: broadcast::Receiver<String>,
}

impl SettingsWatcher {
    /// Waits for the next write to the settings key. `None` once the store is gone.
    pub async fn changed(&mut self) -> Option<Vec<WalletNotificationSettings>> {
        loop {
            match self.changes.recv().await {
                Ok(key) if key == WALLET_TOPICS_STORAGE_KEY => {
                    return Some(self.repository.get_all());
                }
                Ok(_) => continue,
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    log::debug!("Notifications: settings watcher skipped {} changes", skipped);
                    return Some(self.repository.get_all());
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }
}
