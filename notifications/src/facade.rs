//! Read/update surface for the settings UI.
//!
//! Local state is written synchronously through the repository. Remote calls
//! are queued and never awaited here; their failures are logged by the
//! subscriber and do not reach the caller.

use std::sync::Arc;

use crate::errors::NotificationResult;
use crate::queue::TaskQueue;
use crate::repository::{SettingsRepository, SettingsWatcher};
use crate::topics::TopicSubscriber;
use crate::types::{
    GroupSettings, NotificationRelationship, NotificationTopic, WalletNotificationSettings,
    WalletSettingsPatch,
};

#[derive(Clone)]
pub struct NotificationSettings {
    repository: Arc<SettingsRepository>,
    subscriber: TopicSubscriber,
    queue: TaskQueue,
}

impl NotificationSettings {
    pub fn new(
        repository: Arc<SettingsRepository>,
        subscriber: TopicSubscriber,
        queue: TaskQueue,
    ) -> Self {
        Self {
            repository,
            subscriber,
            queue,
        }
    }

    pub fn all_settings(&self) -> Vec<WalletNotificationSettings> {
        self.repository.get_all()
    }

    pub fn settings_for_wallet(&self, address: &str) -> Option<WalletNotificationSettings> {
        self.repository.settings_for_address(address)
    }

    pub fn wallets_with_relationship(
        &self,
        relationship: NotificationRelationship,
    ) -> Vec<WalletNotificationSettings> {
        self.repository
            .get_all()
            .into_iter()
            .filter(|wallet| wallet.relationship == relationship)
            .collect()
    }

    pub fn group_settings(&self) -> GroupSettings {
        self.repository.get_group_settings()
    }

    pub fn watch_settings(&self) -> SettingsWatcher {
        self.repository.watch_settings()
    }

    /// Queues one subscribe or unsubscribe call. Does not touch stored topic flags.
    pub fn toggle_topic_for_wallet(
        &self,
        relationship: NotificationRelationship,
        address: &str,
        topic: NotificationTopic,
        enable: bool,
    ) -> NotificationResult<()> {
        let subscriber = self.subscriber.clone();
        let address = address.to_string();
        if enable {
            self.queue.submit("subscribe_topic", async move {
                let _ = subscriber
                    .subscribe_to_topic(relationship, &address, topic)
                    .await;
            })
        } else {
            self.queue.submit("unsubscribe_topic", async move {
                let _ = subscriber
                    .unsubscribe_from_topic(relationship, &address, topic)
                    .await;
            })
        }
    }

    /// Best-effort bulk toggle for a set of wallets sharing `relationship`.
    ///
    /// Enabling subscribes each wallet to its flagged topics, one call per
    /// topic. Disabling issues one unsubscribe-from-all per wallet.
    pub fn toggle_group_notifications(
        &self,
        wallets: &[WalletNotificationSettings],
        relationship: NotificationRelationship,
        enable: bool,
    ) -> NotificationResult<()> {
        for wallet in wallets {
            if enable {
                for topic in wallet.enabled_topics() {
                    self.toggle_topic_for_wallet(relationship, &wallet.address, topic, true)?;
                }
            } else {
                let subscriber = self.subscriber.clone();
                let address = wallet.address.clone();
                self.queue.submit("unsubscribe_all_topics", async move {
                    let _ = subscriber
                        .unsubscribe_from_all_topics(relationship, &address)
                        .await;
                })?;
            }
        }
        Ok(())
    }

    pub fn update_settings_for_wallets_with_relationship_type(
        &self,
        relationship: NotificationRelationship,
        patch: &WalletSettingsPatch,
    ) -> NotificationResult<Vec<WalletNotificationSettings>> {
        self.repository
            .update_settings_for_wallets_with_relationship_type(relationship, patch)
    }

    /// `Ok(None)` when no wallet has `address`.
    pub fn update_settings_for_wallet_with_address(
        &self,
        address: &str,
        patch: &WalletSettingsPatch,
    ) -> NotificationResult<Option<WalletNotificationSettings>> {
        self.repository
            .update_settings_for_wallet_with_address(address, patch)
    }

    pub fn update_group_settings(&self, partial: &GroupSettings) -> NotificationResult<GroupSettings> {
        self.repository.set_group_settings(partial)
    }

    /// Flips a group toggle and, when it changed, toggles that group's wallets remotely.
    pub fn set_group_enabled(
        &self,
        relationship: NotificationRelationship,
        enable: bool,
    ) -> NotificationResult<GroupSettings> {
        let was_enabled = self.repository.get_group_settings().is_enabled(relationship);
        let updated = self
            .repository
            .set_group_settings(&GroupSettings::new().with(relationship, enable))?;

        if was_enabled != enable {
            let wallets = self.wallets_with_relationship(relationship);
            log::info!(
                "Notifications: {} {} group ({} wallets)",
                if enable { "enabling" } else { "disabling" },
                relationship,
                wallets.len()
            );
            self.toggle_group_notifications(&wallets, relationship, enable)?;
        }
        Ok(updated)
    }

    /// Master switch for one wallet: persists `enabled` and toggles its topics remotely.
    pub fn set_wallet_enabled(
        &self,
        address: &str,
        enable: bool,
    ) -> NotificationResult<Option<WalletNotificationSettings>> {
        let Some(updated) = self.update_settings_for_wallet_with_address(
            address,
            &WalletSettingsPatch::new().enabled(enable),
        )?
        else {
            return Ok(None);
        };

        self.toggle_group_notifications(
            std::slice::from_ref(&updated),
            updated.relationship,
            enable,
        )?;
        Ok(Some(updated))
    }

    /// Persists one topic flag, then toggles it remotely if the wallet and its group are on.
    pub fn set_topic_for_wallet(
        &self,
        address: &str,
        topic: NotificationTopic,
        enable: bool,
    ) -> NotificationResult<Option<WalletNotificationSettings>> {
        let Some(current) = self.repository.settings_for_address(address) else {
            return Ok(None);
        };
        let mut topics = current.topics.clone();
        topics.insert(topic, enable);

        let Some(updated) = self.update_settings_for_wallet_with_address(
            address,
            &WalletSettingsPatch::new().topics(topics),
        )?
        else {
            return Ok(None);
        };

        let group_enabled = self
            .repository
            .get_group_settings()
            .is_enabled(updated.relationship);
        if updated.enabled && group_enabled {
            self.toggle_topic_for_wallet(updated.relationship, &updated.address, topic, enable)?;
        }
        Ok(Some(updated))
    }

    /// Waits until every queued remote call has settled.
    pub async fn flush(&self) -> NotificationResult<()> {
        self.queue.idle().await
    }
}
