// lib.rs - Wallet push notification settings

pub mod client;
pub mod config;
pub mod context;
pub mod errors;
pub mod facade;
pub mod migration;
pub mod queue;
pub mod reconcile;
pub mod repository;
pub mod store;
pub mod testing;
pub mod topics;
pub mod types;

pub mod notifications {
    //! Startup entry point

    use crate::config::NotificationConfig;
    use crate::context::{NotificationContext, SharedNotificationContext};
    use crate::errors::NotificationResult;

    /// Initialize the notification subsystem from environment configuration
    pub fn init(device_token: &str) -> NotificationResult<SharedNotificationContext> {
        log::info!("Initializing notification subsystem");

        let config = NotificationConfig::from_env()?;
        log::set_max_level(config.log_level());

        let context = NotificationContext::from_config(config, device_token)?;
        Ok(SharedNotificationContext::new(context))
    }
}

// Re-export common types
pub use client::HttpTopicClient;
pub use config::{Environment, NotificationConfig};
pub use context::{NotificationContext, SharedNotificationContext};
pub use errors::{NotificationError, NotificationResult};
pub use facade::NotificationSettings;
pub use queue::TaskQueue;
pub use reconcile::{ReconciliationEngine, ReconciliationPlan, ReconciliationReport};
pub use repository::{SettingsRepository, SettingsWatcher};
pub use store::{FileStore, KeyValueStore, MemoryStore};
pub use topics::{topic_identifier, TopicSubscriber, TopicSubscriptionClient};
pub use types::{
    AddressWithRelationship, GroupSettings, NotificationRelationship, NotificationTopic,
    TopicSettings, WalletNotificationSettings, WalletSettingsPatch,
    NOTIFICATIONS_DEFAULT_CHAIN_ID,
};
