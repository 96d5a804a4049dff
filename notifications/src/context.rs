//! Process-lifetime wiring of store, repository, engine, queue and facade.

use std::ops::Deref;
use std::sync::Arc;

use crate::client::HttpTopicClient;
use crate::config::NotificationConfig;
use crate::errors::NotificationResult;
use crate::facade::NotificationSettings;
use crate::migration;
use crate::queue::TaskQueue;
use crate::reconcile::{ReconciliationEngine, ReconciliationReport};
use crate::repository::SettingsRepository;
use crate::store::{FileStore, KeyValueStore};
use crate::topics::{TopicSubscriber, TopicSubscriptionClient};
use crate::types::AddressWithRelationship;

/// Everything the app needs to drive notification settings, built once at startup.
pub struct NotificationContext {
    config: NotificationConfig,
    push_enabled: bool,
    repository: Arc<SettingsRepository>,
    engine: Arc<ReconciliationEngine>,
    settings: NotificationSettings,
    queue: TaskQueue,
}

impl NotificationContext {
    /// Must be called from within a tokio runtime.
    pub fn initialize(
        config: NotificationConfig,
        store: Arc<dyn KeyValueStore>,
        client: Arc<dyn TopicSubscriptionClient>,
    ) -> NotificationResult<Self> {
        let push_enabled = config.push_enabled()?;
        let repository = Arc::new(SettingsRepository::new(store));

        let found_version = migration::migrate(&repository)?;
        if repository.add_default_group_settings()? {
            log::info!("Notifications: wrote default group settings");
        }

        let queue = TaskQueue::start()?;
        let subscriber = TopicSubscriber::new(client);
        let engine = Arc::new(ReconciliationEngine::new(
            repository.clone(),
            subscriber.clone(),
        ));
        let settings = NotificationSettings::new(repository.clone(), subscriber, queue.clone());

        log::info!(
            "Notifications: initialized ({:?}, settings version {}, push {})",
            config.environment(),
            found_version,
            if push_enabled { "enabled" } else { "disabled" }
        );

        Ok(Self {
            config,
            push_enabled,
            repository,
            engine,
            settings,
            queue,
        })
    }

    /// File-backed store and HTTP topic client for `device_token`, both from `config`.
    pub fn from_config(
        config: NotificationConfig,
        device_token: impl Into<String>,
    ) -> NotificationResult<Self> {
        let store = Arc::new(FileStore::open(config.store_path()?));
        let mut client = HttpTopicClient::new(
            config.topic_endpoint()?,
            device_token,
            config.request_timeout()?,
        )?;
        if let Some(authorization) = config.topic_authorization() {
            client = client.with_authorization(authorization);
        }
        Self::initialize(config, store, Arc::new(client))
    }

    /// Schedules a reconciliation pass for the new wallet set and returns immediately.
    pub fn on_wallets_changed(
        &self,
        addresses: Vec<AddressWithRelationship>,
    ) -> NotificationResult<()> {
        if !self.push_enabled {
            let plan = self.engine.plan(&addresses)?;
            log::debug!(
                "Notifications: push disabled, recorded {} new wallets and {} relationship changes",
                plan.created.len(),
                plan.relationship_changes.len()
            );
            return Ok(());
        }

        let engine = self.engine.clone();
        self.queue.submit("reconcile", async move {
            if let Err(err) = engine.reconcile(&addresses).await {
                log::error!("Notifications: reconciliation failed: {}", err);
            }
        })
    }

    /// Runs a pass inline. Remote work is skipped while push is disabled.
    pub async fn reconcile_now(
        &self,
        addresses: &[AddressWithRelationship],
    ) -> NotificationResult<ReconciliationReport> {
        if !self.push_enabled {
            let plan = self.engine.plan(addresses)?;
            return Ok(ReconciliationReport {
                created: plan.created.len(),
                relationship_changes: plan.relationship_changes.len(),
                ..ReconciliationReport::default()
            });
        }
        self.engine.reconcile(addresses).await
    }

    pub fn settings(&self) -> &NotificationSettings {
        &self.settings
    }

    pub fn engine(&self) -> &ReconciliationEngine {
        &self.engine
    }

    pub fn repository(&self) -> &SettingsRepository {
        &self.repository
    }

    pub fn config(&self) -> &NotificationConfig {
        &self.config
    }

    pub fn push_enabled(&self) -> bool {
        self.push_enabled
    }

    /// Waits for every queued pass and remote call to settle.
    pub async fn flush(&self) -> NotificationResult<()> {
        self.queue.idle().await
    }
}

/// Shared notification context handed to the rest of the app.
#[derive(Clone)]
pub struct SharedNotificationContext(pub Arc<NotificationContext>);

impl SharedNotificationContext {
    pub fn new(inner: NotificationContext) -> Self {
        Self(Arc::new(inner))
    }
}

impl Deref for SharedNotificationContext {
    type Target = NotificationContext;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}
