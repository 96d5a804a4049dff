//! Settings records shared by the repository, the reconciliation engine and the facade.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::errors::{NotificationError, NotificationResult};

/// Mainnet. Topic identifiers are not scoped per chain.
pub const NOTIFICATIONS_DEFAULT_CHAIN_ID: u64 = 1;

/// Storage key holding the JSON array of per-wallet settings.
pub const WALLET_TOPICS_STORAGE_KEY: &str = "notificationSettings";
/// Storage key holding the JSON object of group toggles.
pub const WALLET_GROUPS_STORAGE_KEY: &str = "notificationGroupToggle";
/// Storage key holding the settings schema version.
pub const NOTIFICATIONS_SETTINGS_VERSION_KEY: &str = "notifications_settings_version";

/// Notification category a wallet can subscribe to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NotificationTopic {
    Sent,
    Received,
    Purchased,
    Sold,
    Minted,
    Swapped,
    Approvals,
    Other,
}

impl NotificationTopic {
    pub const ALL: [NotificationTopic; 8] = [
        NotificationTopic::Sent,
        NotificationTopic::Received,
        NotificationTopic::Purchased,
        NotificationTopic::Sold,
        NotificationTopic::Minted,
        NotificationTopic::Swapped,
        NotificationTopic::Approvals,
        NotificationTopic::Other,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            NotificationTopic::Sent => "sent",
            NotificationTopic::Received => "received",
            NotificationTopic::Purchased => "purchased",
            NotificationTopic::Sold => "sold",
            NotificationTopic::Minted => "minted",
            NotificationTopic::Swapped => "swapped",
            NotificationTopic::Approvals => "approvals",
            NotificationTopic::Other => "other",
        }
    }
}

impl fmt::Display for NotificationTopic {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for NotificationTopic {
    type Err = NotificationError;

    fn from_str(value: &str) -> NotificationResult<Self> {
        let normalized = value.trim().to_ascii_lowercase();
        NotificationTopic::ALL
            .into_iter()
            .find(|topic| topic.as_str() == normalized)
            .ok_or_else(|| {
                NotificationError::ValidationError(format!(
                    "Unsupported notification topic '{}'",
                    value
                ))
            })
    }
}

/// Relationship of a wallet to this device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NotificationRelationship {
    /// Keys are held locally.
    Owner,
    /// Address is tracked without keys.
    Watcher,
}

impl NotificationRelationship {
    pub const ALL: [NotificationRelationship; 2] = [
        NotificationRelationship::Owner,
        NotificationRelationship::Watcher,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            NotificationRelationship::Owner => "owner",
            NotificationRelationship::Watcher => "watcher",
        }
    }
}

impl fmt::Display for NotificationRelationship {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for NotificationRelationship {
    type Err = NotificationError;

    fn from_str(value: &str) -> NotificationResult<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "owner" => Ok(NotificationRelationship::Owner),
            "watcher" => Ok(NotificationRelationship::Watcher),
            _ => Err(NotificationError::ValidationError(format!(
                "Unsupported wallet relationship '{}'",
                value
            ))),
        }
    }
}

/// Desired subscription state per topic.
pub type TopicSettings = BTreeMap<NotificationTopic, bool>;

/// Every topic enabled.
pub fn default_enabled_topic_settings() -> TopicSettings {
    NotificationTopic::ALL
        .into_iter()
        .map(|topic| (topic, true))
        .collect()
}

/// Addresses are case-insensitive identifiers.
pub fn addresses_match(left: &str, right: &str) -> bool {
    left.eq_ignore_ascii_case(right)
}

/// Canonical form used in topic identifiers and lookup maps.
pub fn normalize_address(address: &str) -> String {
    address.to_ascii_lowercase()
}

/// Notification settings for a single wallet address.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct WalletNotificationSettings {
    pub address: String,
    #[serde(rename = "type")]
    pub relationship: NotificationRelationship,
    pub topics: TopicSettings,
    /// Master switch for this wallet.
    pub enabled: bool,
    /// Set once the transport confirmed the default subscription.
    #[serde(default)]
    pub successfully_finished_initial_subscription: bool,
    /// Previous relationship whose topics still have to be unsubscribed.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub old_type: Option<NotificationRelationship>,
}

impl WalletNotificationSettings {
    /// Fresh record for an address seen for the first time.
    ///
    /// Watched wallets get no default subscription, so they start out finished.
    pub fn new(address: impl Into<String>, relationship: NotificationRelationship) -> Self {
        Self {
            address: address.into(),
            relationship,
            topics: default_enabled_topic_settings(),
            enabled: false,
            successfully_finished_initial_subscription: relationship
                == NotificationRelationship::Watcher,
            old_type: None,
        }
    }

    /// Topics whose flag is set.
    pub fn enabled_topics(&self) -> BTreeSet<NotificationTopic> {
        self.topics
            .iter()
            .filter(|(_, enabled)| **enabled)
            .map(|(topic, _)| *topic)
            .collect()
    }

    pub fn is_topic_enabled(&self, topic: NotificationTopic) -> bool {
        self.topics.get(&topic).copied().unwrap_or(false)
    }

    pub fn matches_address(&self, address: &str) -> bool {
        addresses_match(&self.address, address)
    }

    /// True while a compensating unsubscribe or the initial subscribe is outstanding.
    pub fn has_pending_subscription_work(&self) -> bool {
        self.old_type.is_some() || !self.successfully_finished_initial_subscription
    }
}

/// An address known to the wallet manager together with its relationship.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AddressWithRelationship {
    pub address: String,
    pub relationship: NotificationRelationship,
}

impl AddressWithRelationship {
    pub fn new(address: impl Into<String>, relationship: NotificationRelationship) -> Self {
        Self {
            address: address.into(),
            relationship,
        }
    }

    pub fn owner(address: impl Into<String>) -> Self {
        Self::new(address, NotificationRelationship::Owner)
    }

    pub fn watcher(address: impl Into<String>) -> Self {
        Self::new(address, NotificationRelationship::Watcher)
    }
}

/// Partial update merged onto a [`WalletNotificationSettings`] record.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WalletSettingsPatch {
    pub topics: Option<TopicSettings>,
    pub enabled: Option<bool>,
    pub relationship: Option<NotificationRelationship>,
    pub successfully_finished_initial_subscription: Option<bool>,
    /// `Some(None)` clears the pending old relationship.
    pub old_type: Option<Option<NotificationRelationship>>,
}

impl WalletSettingsPatch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn enabled(mut self, enabled: bool) -> Self {
        self.enabled = Some(enabled);
        self
    }

    pub fn topics(mut self, topics: TopicSettings) -> Self {
        self.topics = Some(topics);
        self
    }

    pub fn relationship(mut self, relationship: NotificationRelationship) -> Self {
        self.relationship = Some(relationship);
        self
    }

    pub fn successfully_finished_initial_subscription(mut self, finished: bool) -> Self {
        self.successfully_finished_initial_subscription = Some(finished);
        self
    }

    pub fn old_type(mut self, old_type: Option<NotificationRelationship>) -> Self {
        self.old_type = Some(old_type);
        self
    }

    pub fn apply(&self, settings: &mut WalletNotificationSettings) {
        if let Some(topics) = &self.topics {
            settings.topics = topics.clone();
        }
        if let Some(enabled) = self.enabled {
            settings.enabled = enabled;
        }
        if let Some(relationship) = self.relationship {
            settings.relationship = relationship;
        }
        if let Some(finished) = self.successfully_finished_initial_subscription {
            settings.successfully_finished_initial_subscription = finished;
        }
        if let Some(old_type) = self.old_type {
            settings.old_type = old_type;
        }
    }
}

/// Master toggle per relationship group, stored as `{"owner": bool, "watcher": bool}`.
///
/// Keys may be missing; a partial value merges onto the stored one.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct GroupSettings(BTreeMap<NotificationRelationship, bool>);

impl GroupSettings {
    pub fn new() -> Self {
        Self::default()
    }

    /// Owners on, watchers off.
    pub fn defaults() -> Self {
        Self::new()
            .with(NotificationRelationship::Owner, true)
            .with(NotificationRelationship::Watcher, false)
    }

    pub fn with(mut self, relationship: NotificationRelationship, enabled: bool) -> Self {
        self.0.insert(relationship, enabled);
        self
    }

    pub fn get(&self, relationship: NotificationRelationship) -> Option<bool> {
        self.0.get(&relationship).copied()
    }

    /// Stored toggle, falling back to the default policy for missing keys.
    pub fn is_enabled(&self, relationship: NotificationRelationship) -> bool {
        self.get(relationship)
            .unwrap_or(relationship == NotificationRelationship::Owner)
    }

    /// Keys present in `other` overwrite ours; missing keys are preserved.
    pub fn merge(&mut self, other: &GroupSettings) {
        self.0.extend(other.0.iter().map(|(k, v)| (*k, *v)));
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}
