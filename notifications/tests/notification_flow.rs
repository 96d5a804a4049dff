use std::sync::Arc;

use silica_wallet_notifications::config::Environment;
use silica_wallet_notifications::testing::MockTopicClient;
use silica_wallet_notifications::{
    topic_identifier, AddressWithRelationship, FileStore, KeyValueStore, MemoryStore,
    NotificationConfig, NotificationContext, NotificationRelationship, NotificationResult,
    NotificationTopic, WalletNotificationSettings,
};
use tempfile::TempDir;

fn push_config() -> NotificationConfig {
    let mut config = NotificationConfig::new(Environment::Test);
    config.set("ENABLE_PUSH_NOTIFICATIONS", "true");
    config
}

fn context_with(client: &Arc<MockTopicClient>) -> NotificationResult<NotificationContext> {
    NotificationContext::initialize(
        push_config(),
        Arc::new(MemoryStore::new()),
        client.clone(),
    )
}

fn stored(context: &NotificationContext, address: &str) -> WalletNotificationSettings {
    context
        .repository()
        .settings_for_address(address)
        .expect("settings stored for wallet")
}

#[test]
fn topic_identifier_lowercases_address() {
    assert_eq!(
        topic_identifier(
            NotificationRelationship::Owner,
            1,
            "0xABCdef0123",
            NotificationTopic::Sent
        ),
        "owner_1_0xabcdef0123_sent"
    );
}

#[tokio::test]
async fn storage_converges_to_latest_wallet_set() -> NotificationResult<()> {
    let client = Arc::new(MockTopicClient::new());
    let context = context_with(&client)?;

    context
        .reconcile_now(&[
            AddressWithRelationship::owner("0xA"),
            AddressWithRelationship::owner("0xB"),
            AddressWithRelationship::watcher("0xC"),
        ])
        .await?;

    client.fail_when(|call| call.topic().contains("_0xb_"));
    let latest = [
        AddressWithRelationship::owner("0xA"),
        AddressWithRelationship::watcher("0xD"),
    ];
    let report = context.reconcile_now(&latest).await?;
    assert_eq!(report.removed, 1);
    assert_eq!(report.removal_failures, 1);
    // 0xB stays until its unsubscribe succeeds.
    assert!(context.repository().wallet_has_settings("0xB"));

    client.succeed_all();
    let report = context.reconcile_now(&latest).await?;
    assert!(report.is_converged());

    let mut addresses: Vec<String> = context
        .settings()
        .all_settings()
        .into_iter()
        .map(|wallet| wallet.address)
        .collect();
    addresses.sort();
    assert_eq!(addresses, vec!["0xA".to_string(), "0xD".to_string()]);
    Ok(())
}

#[tokio::test]
async fn first_seen_watcher_issues_no_subscribe_calls() -> NotificationResult<()> {
    let client = Arc::new(MockTopicClient::new());
    let context = context_with(&client)?;

    context.on_wallets_changed(vec![AddressWithRelationship::watcher("0xWatch")])?;
    context.flush().await?;

    assert!(stored(&context, "0xWatch").successfully_finished_initial_subscription);
    assert!(client.subscribed_topics().is_empty());
    Ok(())
}

#[tokio::test]
async fn first_seen_owner_subscribes_each_default_topic_once() -> NotificationResult<()> {
    let client = Arc::new(MockTopicClient::new());
    let context = context_with(&client)?;

    let plan = context
        .engine()
        .plan(&[AddressWithRelationship::owner("0xOwn")])?;
    assert!(!stored(&context, "0xOwn").successfully_finished_initial_subscription);

    context.engine().execute(plan).await?;

    let mut subscribed = client.subscribed_topics();
    subscribed.sort();
    let mut expected: Vec<String> = NotificationTopic::ALL
        .iter()
        .map(|topic| topic_identifier(NotificationRelationship::Owner, 1, "0xOwn", *topic))
        .collect();
    expected.sort();
    assert_eq!(subscribed, expected);
    assert!(stored(&context, "0xOwn").successfully_finished_initial_subscription);
    Ok(())
}

#[tokio::test]
async fn watcher_promoted_to_owner_swaps_topic_families() -> NotificationResult<()> {
    let client = Arc::new(MockTopicClient::new());
    let context = context_with(&client)?;
    context
        .reconcile_now(&[AddressWithRelationship::watcher("0xSwap")])
        .await?;

    client.fail_when(|call| !call.is_subscribe());
    let promoted = [AddressWithRelationship::owner("0xSwap")];
    context.reconcile_now(&promoted).await?;

    let pending = stored(&context, "0xSwap");
    assert_eq!(pending.relationship, NotificationRelationship::Owner);
    assert_eq!(pending.old_type, Some(NotificationRelationship::Watcher));
    assert!(client
        .unsubscribed_topics()
        .iter()
        .all(|topic| topic.starts_with("watcher_1_0xswap_")));
    assert!(client
        .subscribed_topics()
        .iter()
        .all(|topic| topic.starts_with("owner_1_0xswap_")));

    client.succeed_all();
    context.reconcile_now(&promoted).await?;
    assert_eq!(stored(&context, "0xSwap").old_type, None);
    Ok(())
}

#[tokio::test]
async fn failed_subscribe_is_requeued_with_same_input() -> NotificationResult<()> {
    let client = Arc::new(MockTopicClient::new());
    let context = context_with(&client)?;
    let wallets = [AddressWithRelationship::owner("0xRetry")];

    client.fail_when(|call| call.is_subscribe());
    context.reconcile_now(&wallets).await?;
    assert!(!stored(&context, "0xRetry").successfully_finished_initial_subscription);

    client.succeed_all();
    let report = context.reconcile_now(&wallets).await?;
    assert_eq!(report.queued, 1);
    assert_eq!(report.subscriptions_completed, 1);
    assert!(stored(&context, "0xRetry").successfully_finished_initial_subscription);
    Ok(())
}

#[tokio::test]
async fn disabling_group_unsubscribes_every_wallet() -> NotificationResult<()> {
    let client = Arc::new(MockTopicClient::new());
    let context = context_with(&client)?;
    let owners: Vec<_> = (0..4)
        .map(|i| AddressWithRelationship::owner(format!("0x{}", i)))
        .collect();
    context.reconcile_now(&owners).await?;

    let mut quiet = stored(&context, "0x0");
    quiet.topics.values_mut().for_each(|enabled| *enabled = false);
    context.repository().update(|settings| {
        if let Some(wallet) = settings.iter_mut().find(|w| w.address == "0x0") {
            *wallet = quiet.clone();
        }
    })?;
    client.clear_calls();

    context
        .settings()
        .set_group_enabled(NotificationRelationship::Owner, false)?;
    context.flush().await?;

    let unsubscribed = client.unsubscribed_topics();
    assert_eq!(
        unsubscribed.len(),
        owners.len() * NotificationTopic::ALL.len()
    );
    assert!(client.subscribed_topics().is_empty());
    Ok(())
}

#[tokio::test]
async fn settings_survive_restart_on_file_store() -> NotificationResult<()> {
    let dir = TempDir::new().expect("create temp dir");
    let path = dir.path().join("notifications.store");
    let client = Arc::new(MockTopicClient::new());

    {
        let context = NotificationContext::initialize(
            push_config(),
            Arc::new(FileStore::open(&path)),
            client.clone(),
        )?;
        context
            .reconcile_now(&[AddressWithRelationship::owner("0xKeep")])
            .await?;
        context
            .settings()
            .set_topic_for_wallet("0xKeep", NotificationTopic::Swapped, false)?;
        context.flush().await?;
    }

    client.clear_calls();
    let reopened = NotificationContext::initialize(
        push_config(),
        Arc::new(FileStore::open(&path)),
        client.clone(),
    )?;
    let wallet = stored(&reopened, "0xKeep");
    assert!(wallet.successfully_finished_initial_subscription);
    assert!(!wallet.is_topic_enabled(NotificationTopic::Swapped));

    let report = reopened
        .reconcile_now(&[AddressWithRelationship::owner("0xKeep")])
        .await?;
    assert_eq!(report.queued, 0);
    assert!(client.calls().is_empty());
    Ok(())
}

#[tokio::test]
async fn legacy_muted_owner_stays_muted_after_upgrade() -> NotificationResult<()> {
    let store = Arc::new(MemoryStore::new());
    store.set_string(
        "notificationSettings",
        r#"[
            {"address":"0xMuted","topics":{"sent":true,"received":true},"enabled":false,"type":"owner"},
            {"address":"0xLoud","topics":{"sent":true},"enabled":true,"type":"owner"}
        ]"#,
    )?;
    let client = Arc::new(MockTopicClient::new());
    let context = NotificationContext::initialize(push_config(), store, client.clone())?;

    context
        .reconcile_now(&[
            AddressWithRelationship::owner("0xMuted"),
            AddressWithRelationship::owner("0xLoud"),
        ])
        .await?;

    assert!(!stored(&context, "0xMuted").enabled);
    assert_eq!(client.subscribed_topics(), vec!["owner_1_0xloud_sent".to_string()]);
    assert!(client.unsubscribed_topics().is_empty());
    Ok(())
}
