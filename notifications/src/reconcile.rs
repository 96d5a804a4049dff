//! Reconciliation of stored settings and remote topic subscriptions against the
//! live wallet set.
//!
//! A pass has two halves. [`ReconciliationEngine::plan`] is synchronous: it
//! creates records for new addresses, resets records whose relationship
//! changed, and persists that before any remote call is made.
//! [`ReconciliationEngine::execute`] then issues the remote calls and writes
//! back only what the transport confirmed. An unconfirmed flag is the retry
//! signal: the record is picked up again by the next pass.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use futures::future::join_all;
use tokio::sync::Mutex as AsyncMutex;

use crate::errors::NotificationResult;
use crate::repository::SettingsRepository;
use crate::topics::TopicSubscriber;
use crate::types::{
    default_enabled_topic_settings, normalize_address, AddressWithRelationship,
    NotificationRelationship, WalletNotificationSettings,
};

/// Work derived from one wallet-set snapshot.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReconciliationPlan {
    /// Addresses that got a fresh record.
    pub created: Vec<String>,
    /// Addresses whose relationship changed.
    pub relationship_changes: Vec<String>,
    /// Records with an outstanding unsubscribe or initial subscribe.
    pub subscription_queue: Vec<WalletNotificationSettings>,
    /// Records whose address left the wallet set.
    pub removals: Vec<WalletNotificationSettings>,
}

/// Counts of what a pass achieved.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReconciliationReport {
    pub created: usize,
    pub relationship_changes: usize,
    pub queued: usize,
    pub removed: usize,
    pub removal_failures: usize,
    pub old_type_cleared: usize,
    pub old_type_failures: usize,
    pub subscriptions_completed: usize,
    pub subscription_failures: usize,
}

impl ReconciliationReport {
    /// No remote call failed, so nothing is left for the next pass.
    pub fn is_converged(&self) -> bool {
        self.removal_failures == 0 && self.old_type_failures == 0 && self.subscription_failures == 0
    }
}

/// Result of processing one queued record.
#[derive(Debug, Clone)]
struct QueueOutcome {
    address: String,
    relationship: NotificationRelationship,
    old_type: Option<NotificationRelationship>,
    old_type_cleared: Option<bool>,
    subscribed: Option<bool>,
}

pub struct ReconciliationEngine {
    repository: Arc<SettingsRepository>,
    subscriber: TopicSubscriber,
    run_lock: AsyncMutex<()>,
}

impl ReconciliationEngine {
    pub fn new(repository: Arc<SettingsRepository>, subscriber: TopicSubscriber) -> Self {
        Self {
            repository,
            subscriber,
            run_lock: AsyncMutex::new(()),
        }
    }

    /// Full pass. Passes never overlap.
    pub async fn reconcile(
        &self,
        addresses: &[AddressWithRelationship],
    ) -> NotificationResult<ReconciliationReport> {
        let _running = self.run_lock.lock().await;
        let plan = self.plan(addresses)?;
        let report = self.execute(plan).await?;
        log::info!(
            "Notifications: reconciled {} wallets (created {}, changed {}, queued {}, removed {}, converged {})",
            addresses.len(),
            report.created,
            report.relationship_changes,
            report.queued,
            report.removed,
            report.is_converged()
        );
        Ok(report)
    }

    /// Updates local records for `addresses` and persists them.
    pub fn plan(
        &self,
        addresses: &[AddressWithRelationship],
    ) -> NotificationResult<ReconciliationPlan> {
        self.repository.update(|settings| plan_changes(settings, addresses))
    }

    /// Issues the remote calls for `plan` and persists confirmed progress.
    pub async fn execute(
        &self,
        plan: ReconciliationPlan,
    ) -> NotificationResult<ReconciliationReport> {
        let mut report = ReconciliationReport {
            created: plan.created.len(),
            relationship_changes: plan.relationship_changes.len(),
            queued: plan.subscription_queue.len(),
            ..ReconciliationReport::default()
        };

        let removals = join_all(plan.removals.iter().map(|wallet| self.remove_wallet(wallet)));
        let queue = join_all(
            plan.subscription_queue
                .iter()
                .map(|wallet| self.process_queue_item(wallet)),
        );
        let (removal_results, outcomes) = futures::join!(removals, queue);

        for removed in removal_results {
            if removed {
                report.removed += 1;
            } else {
                report.removal_failures += 1;
            }
        }

        for outcome in &outcomes {
            match outcome.old_type_cleared {
                Some(true) => report.old_type_cleared += 1,
                Some(false) => report.old_type_failures += 1,
                None => {}
            }
            match outcome.subscribed {
                Some(true) => report.subscriptions_completed += 1,
                Some(false) => report.subscription_failures += 1,
                None => {}
            }
        }

        if !outcomes.is_empty() {
            self.repository
                .update(|settings| merge_outcomes(settings, &outcomes))?;
        }

        Ok(report)
    }

    /// Unsubscribes a departed wallet, then drops its record. `false` leaves it for the next pass.
    async fn remove_wallet(&self, wallet: &WalletNotificationSettings) -> bool {
        let mut relationships = vec![wallet.relationship];
        relationships.extend(wallet.old_type.filter(|old| *old != wallet.relationship));

        let results = join_all(relationships.iter().map(|relationship| {
            self.subscriber
                .unsubscribe_from_all_topics(*relationship, &wallet.address)
        }))
        .await;

        if let Some(err) = results.into_iter().find_map(Result::err) {
            log::error!(
                "Notifications: failed to unsubscribe removed wallet {}: {}",
                wallet.address,
                err
            );
            return false;
        }

        match self.repository.remove_settings_for_wallet(&wallet.address) {
            Ok(_) => true,
            Err(err) => {
                log::error!(
                    "Notifications: failed to drop settings for removed wallet {}: {}",
                    wallet.address,
                    err
                );
                false
            }
        }
    }

    async fn process_queue_item(&self, wallet: &WalletNotificationSettings) -> QueueOutcome {
        let mut outcome = QueueOutcome {
            address: wallet.address.clone(),
            relationship: wallet.relationship,
            old_type: wallet.old_type,
            old_type_cleared: None,
            subscribed: None,
        };

        if let Some(old_type) = wallet.old_type {
            let result = self
                .subscriber
                .unsubscribe_from_all_topics(old_type, &wallet.address)
                .await;
            if let Err(err) = &result {
                log::error!(
                    "Notifications: failed to unsubscribe old {} topics for {}: {}",
                    old_type,
                    wallet.address,
                    err
                );
            }
            outcome.old_type_cleared = Some(result.is_ok());
        }

        if wallet.relationship == NotificationRelationship::Owner
            && !wallet.successfully_finished_initial_subscription
        {
            let result = self
                .subscriber
                .subscribe_to_all_enabled_topics(wallet)
                .await;
            if let Err(err) = &result {
                log::error!(
                    "Notifications: failed to subscribe {} to default topics: {}",
                    wallet.address,
                    err
                );
            }
            outcome.subscribed = Some(result.is_ok());
        }

        outcome
    }
}

/// Steps 1 to 3 of a pass, applied to the stored collection in place.
fn plan_changes(
    settings: &mut Vec<WalletNotificationSettings>,
    addresses: &[AddressWithRelationship],
) -> ReconciliationPlan {
    let mut plan = ReconciliationPlan::default();

    let mut index: HashMap<String, usize> = HashMap::with_capacity(settings.len());
    for (position, wallet) in settings.iter().enumerate() {
        index.entry(normalize_address(&wallet.address)).or_insert(position);
    }

    let live: HashSet<String> = addresses
        .iter()
        .map(|entry| normalize_address(&entry.address))
        .collect();

    plan.removals = settings
        .iter()
        .filter(|wallet| !live.contains(&normalize_address(&wallet.address)))
        .cloned()
        .collect();

    let mut seen = HashSet::with_capacity(addresses.len());
    for entry in addresses {
        let key = normalize_address(&entry.address);
        if !seen.insert(key.clone()) {
            log::debug!(
                "Notifications: ignoring duplicate wallet entry {}",
                entry.address
            );
            continue;
        }

        match index.get(&key).copied() {
            Some(position) if settings[position].relationship != entry.relationship => {
                let wallet = &mut settings[position];
                log::info!(
                    "Notifications: {} changed from {} to {}",
                    wallet.address,
                    wallet.relationship,
                    entry.relationship
                );
                wallet.old_type = Some(wallet.relationship);
                wallet.relationship = entry.relationship;
                wallet.topics = default_enabled_topic_settings();
                wallet.successfully_finished_initial_subscription = false;
                plan.relationship_changes.push(wallet.address.clone());
                plan.subscription_queue.push(wallet.clone());
            }
            Some(position) => {
                if settings[position].has_pending_subscription_work() {
                    plan.subscription_queue.push(settings[position].clone());
                }
            }
            None => {
                let wallet = WalletNotificationSettings::new(&entry.address, entry.relationship);
                if wallet.has_pending_subscription_work() {
                    plan.subscription_queue.push(wallet.clone());
                }
                plan.created.push(wallet.address.clone());
                index.insert(key, settings.len());
                settings.push(wallet);
            }
        }
    }

    plan
}

/// Step 8: writes confirmed bookkeeping onto the current records.
///
/// Records whose relationship changed again meanwhile, or that were removed,
/// are left untouched.
fn merge_outcomes(settings: &mut [WalletNotificationSettings], outcomes: &[QueueOutcome]) {
    let index: HashMap<String, usize> = settings
        .iter()
        .enumerate()
        .map(|(position, wallet)| (normalize_address(&wallet.address), position))
        .collect();

    for outcome in outcomes {
        let Some(position) = index.get(&normalize_address(&outcome.address)) else {
            continue;
        };
        let wallet = &mut settings[*position];
        if wallet.relationship != outcome.relationship {
            continue;
        }

        if outcome.old_type_cleared == Some(true) && wallet.old_type == outcome.old_type {
            wallet.old_type = None;
        }
        if outcome.subscribed == Some(true) {
            wallet.successfully_finished_initial_subscription = true;
            wallet.enabled = true;
        }
        // Watchers have no default subscription to wait for.
        if wallet.relationship == NotificationRelationship::Watcher {
            wallet.successfully_finished_initial_subscription = true;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;
    use crate::testing::{MockTopicClient, TopicCall};
    use crate::types::NotificationTopic;

    struct Harness {
        client: Arc<MockTopicClient>,
        repository: Arc<SettingsRepository>,
        engine: ReconciliationEngine,
    }

    fn harness() -> Harness {
        let client = Arc::new(MockTopicClient::new());
        let repository = Arc::new(SettingsRepository::new(Arc::new(MemoryStore::new())));
        let engine = ReconciliationEngine::new(
            repository.clone(),
            TopicSubscriber::new(client.clone()),
        );
        Harness {
            client,
            repository,
            engine,
        }
    }

    #[tokio::test]
    async fn new_owner_is_subscribed_to_every_default_topic() {
        let h = harness();
        let report = h
            .engine
            .reconcile(&[AddressWithRelationship::owner("0xOwner")])
            .await
            .unwrap();

        assert_eq!(report.created, 1);
        assert_eq!(report.subscriptions_completed, 1);
        assert!(report.is_converged());
        let subscribed = h.client.subscribed_topics();
        assert_eq!(subscribed.len(), NotificationTopic::ALL.len());
        assert!(subscribed.contains(&"owner_1_0xowner_sent".to_string()));

        let stored = h.repository.settings_for_address("0xOwner").unwrap();
        assert!(stored.successfully_finished_initial_subscription);
        assert!(stored.enabled);
    }

    #[tokio::test]
    async fn new_watcher_makes_no_calls() {
        let h = harness();
        let report = h
            .engine
            .reconcile(&[AddressWithRelationship::watcher("0xWatched")])
            .await
            .unwrap();

        assert_eq!(report.queued, 0);
        assert!(h.client.calls().is_empty());
        let stored = h.repository.settings_for_address("0xwatched").unwrap();
        assert!(stored.successfully_finished_initial_subscription);
        assert!(!stored.enabled);
    }

    #[tokio::test]
    async fn plan_persists_before_remote_calls() {
        let h = harness();
        let plan = h
            .engine
            .plan(&[AddressWithRelationship::owner("0xOwner")])
            .unwrap();

        assert_eq!(plan.subscription_queue.len(), 1);
        assert!(h.client.calls().is_empty());
        let stored = h.repository.settings_for_address("0xOwner").unwrap();
        assert!(!stored.successfully_finished_initial_subscription);
        assert!(!stored.enabled);
    }

    #[tokio::test]
    async fn failed_subscription_is_retried_next_pass() {
        let h = harness();
        let wallets = [AddressWithRelationship::owner("0xOwner")];
        h.client.fail_when(|call| call.topic().ends_with("_swapped"));

        let first = h.engine.reconcile(&wallets).await.unwrap();
        assert_eq!(first.subscription_failures, 1);
        assert!(!first.is_converged());
        let stored = h.repository.settings_for_address("0xOwner").unwrap();
        assert!(!stored.successfully_finished_initial_subscription);
        assert!(!stored.enabled);

        h.client.succeed_all();
        h.client.clear_calls();
        let second = h.engine.reconcile(&wallets).await.unwrap();
        assert_eq!(second.created, 0);
        assert_eq!(second.queued, 1);
        assert!(second.is_converged());
        assert_eq!(h.client.subscribed_topics().len(), NotificationTopic::ALL.len());
        assert!(
            h.repository
                .settings_for_address("0xOwner")
                .unwrap()
                .successfully_finished_initial_subscription
        );

        h.client.clear_calls();
        let third = h.engine.reconcile(&wallets).await.unwrap();
        assert_eq!(third.queued, 0);
        assert!(h.client.calls().is_empty());
    }

    #[tokio::test]
    async fn watcher_becoming_owner_swaps_subscriptions() {
        let h = harness();
        h.engine
            .reconcile(&[AddressWithRelationship::watcher("0xAbc")])
            .await
            .unwrap();
        let mut topics = default_enabled_topic_settings();
        topics.insert(NotificationTopic::Sold, false);
        h.repository
            .update_settings_for_wallet_with_address(
                "0xabc",
                &crate::types::WalletSettingsPatch::new().topics(topics),
            )
            .unwrap();

        let plan = h
            .engine
            .plan(&[AddressWithRelationship::owner("0xAbc")])
            .unwrap();
        let pending = h.repository.settings_for_address("0xabc").unwrap();
        assert_eq!(pending.old_type, Some(NotificationRelationship::Watcher));
        assert_eq!(pending.relationship, NotificationRelationship::Owner);
        assert_eq!(pending.topics, default_enabled_topic_settings());
        assert!(!pending.successfully_finished_initial_subscription);

        let report = h.engine.execute(plan).await.unwrap();
        assert_eq!(report.relationship_changes, 1);
        assert_eq!(report.old_type_cleared, 1);
        assert_eq!(report.subscriptions_completed, 1);

        let unsubscribed = h.client.unsubscribed_topics();
        assert_eq!(unsubscribed.len(), NotificationTopic::ALL.len());
        assert!(unsubscribed.iter().all(|t| t.starts_with("watcher_1_0xabc_")));
        let subscribed = h.client.subscribed_topics();
        assert_eq!(subscribed.len(), NotificationTopic::ALL.len());
        assert!(subscribed.iter().all(|t| t.starts_with("owner_1_0xabc_")));

        let done = h.repository.settings_for_address("0xabc").unwrap();
        assert_eq!(done.old_type, None);
        assert!(done.successfully_finished_initial_subscription);
    }

    #[tokio::test]
    async fn old_type_survives_failed_unsubscribe_even_if_subscribe_succeeds() {
        let h = harness();
        h.engine
            .reconcile(&[AddressWithRelationship::watcher("0xAbc")])
            .await
            .unwrap();
        h.client.fail_when(|call| !call.is_subscribe());

        let report = h
            .engine
            .reconcile(&[AddressWithRelationship::owner("0xAbc")])
            .await
            .unwrap();
        assert_eq!(report.old_type_failures, 1);
        assert_eq!(report.subscriptions_completed, 1);

        let stored = h.repository.settings_for_address("0xabc").unwrap();
        assert_eq!(stored.old_type, Some(NotificationRelationship::Watcher));
        assert!(stored.successfully_finished_initial_subscription);

        h.client.succeed_all();
        h.client.clear_calls();
        let retry = h
            .engine
            .reconcile(&[AddressWithRelationship::owner("0xAbc")])
            .await
            .unwrap();
        assert_eq!(retry.old_type_cleared, 1);
        assert!(h.client.subscribed_topics().is_empty());
        assert!(h
            .repository
            .settings_for_address("0xabc")
            .unwrap()
            .old_type
            .is_none());
    }

    #[tokio::test]
    async fn owner_becoming_watcher_settles_without_subscribing() {
        let h = harness();
        h.engine
            .reconcile(&[AddressWithRelationship::owner("0xAbc")])
            .await
            .unwrap();
        h.client.clear_calls();

        h.engine
            .reconcile(&[AddressWithRelationship::watcher("0xAbc")])
            .await
            .unwrap();
        assert!(h.client.subscribed_topics().is_empty());
        assert_eq!(
            h.client.unsubscribed_topics().len(),
            NotificationTopic::ALL.len()
        );

        let stored = h.repository.settings_for_address("0xabc").unwrap();
        assert_eq!(stored.relationship, NotificationRelationship::Watcher);
        assert!(stored.old_type.is_none());
        assert!(!stored.has_pending_subscription_work());
    }

    #[tokio::test]
    async fn departed_wallets_are_unsubscribed_then_dropped() {
        let h = harness();
        h.engine
            .reconcile(&[
                AddressWithRelationship::owner("0x1"),
                AddressWithRelationship::watcher("0x2"),
            ])
            .await
            .unwrap();
        h.client.clear_calls();
        h.client.fail_when(|call| call.topic().starts_with("watcher_"));

        let report = h
            .engine
            .reconcile(&[AddressWithRelationship::owner("0x3")])
            .await
            .unwrap();
        assert_eq!(report.removed, 1);
        assert_eq!(report.removal_failures, 1);
        assert!(!h.repository.wallet_has_settings("0x1"));
        assert!(h.repository.wallet_has_settings("0x2"));
        assert!(h.repository.wallet_has_settings("0x3"));

        h.client.succeed_all();
        let retry = h
            .engine
            .reconcile(&[AddressWithRelationship::owner("0x3")])
            .await
            .unwrap();
        assert_eq!(retry.removed, 1);
        let remaining: Vec<_> = h
            .repository
            .get_all()
            .into_iter()
            .map(|wallet| wallet.address)
            .collect();
        assert_eq!(remaining, vec!["0x3".to_string()]);
        assert!(h
            .client
            .calls()
            .iter()
            .any(|call| call == &TopicCall::Unsubscribe("watcher_1_0x2_other".to_string())));
    }

    #[tokio::test]
    async fn address_case_does_not_create_duplicates() {
        let h = harness();
        h.engine
            .reconcile(&[AddressWithRelationship::owner("0xABC")])
            .await
            .unwrap();
        let report = h
            .engine
            .reconcile(&[
                AddressWithRelationship::owner("0xabc"),
                AddressWithRelationship::owner("0xAbC"),
            ])
            .await
            .unwrap();

        assert_eq!(report.created, 0);
        assert_eq!(report.removed, 0);
        assert_eq!(h.repository.get_all().len(), 1);
    }

    #[test]
    fn merge_skips_records_that_changed_relationship_again() {
        let mut settings = vec![WalletNotificationSettings::new(
            "0x1",
            NotificationRelationship::Watcher,
        )];
        let outcomes = [QueueOutcome {
            address: "0x1".to_string(),
            relationship: NotificationRelationship::Owner,
            old_type: None,
            old_type_cleared: None,
            subscribed: Some(true),
        }];

        merge_outcomes(&mut settings, &outcomes);
        assert!(!settings[0].enabled);
    }
}
