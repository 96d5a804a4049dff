//! Topic identifiers and the push-messaging subscription boundary.
//!
//! A topic identifier is `{relationship}_{chainId}_{address}_{topic}` with the
//! address lowercased. The transport accepts `[a-zA-Z0-9-_.~%]` only.

use std::collections::BTreeSet;
use std::sync::Arc;

use async_trait::async_trait;
use futures::future::join_all;
use once_cell::sync::Lazy;
use regex::Regex;

use crate::errors::{NotificationError, NotificationResult};
use crate::types::{
    normalize_address, NotificationRelationship, NotificationTopic, WalletNotificationSettings,
    NOTIFICATIONS_DEFAULT_CHAIN_ID,
};

static TOPIC_PATTERN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^[a-zA-Z0-9\-_.~%]{1,900}$").expect("topic pattern must compile")
});

/// Builds the transport topic for one wallet/topic pair.
pub fn topic_identifier(
    relationship: NotificationRelationship,
    chain_id: u64,
    address: &str,
    topic: NotificationTopic,
) -> String {
    format!(
        "{}_{}_{}_{}",
        relationship.as_str(),
        chain_id,
        normalize_address(address),
        topic.as_str()
    )
}

/// Rejects topic strings the transport would refuse.
pub fn validate_topic(topic: &str) -> NotificationResult<()> {
    if TOPIC_PATTERN.is_match(topic) {
        Ok(())
    } else {
        Err(NotificationError::InvalidTopic(topic.to_string()))
    }
}

/// Push-messaging transport. Calls are independent and may fail.
#[async_trait]
pub trait TopicSubscriptionClient: Send + Sync {
    async fn subscribe_to_topic(&self, topic: &str) -> NotificationResult<()>;

    async fn unsubscribe_from_topic(&self, topic: &str) -> NotificationResult<()>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Direction {
    Subscribe,
    Unsubscribe,
}

/// Wallet-level subscribe/unsubscribe operations on top of a transport client.
#[derive(Clone)]
pub struct TopicSubscriber {
    client: Arc<dyn TopicSubscriptionClient>,
    chain_id: u64,
}

impl TopicSubscriber {
    pub fn new(client: Arc<dyn TopicSubscriptionClient>) -> Self {
        Self {
            client,
            chain_id: NOTIFICATIONS_DEFAULT_CHAIN_ID,
        }
    }

    pub async fn subscribe_to_topic(
        &self,
        relationship: NotificationRelationship,
        address: &str,
        topic: NotificationTopic,
    ) -> NotificationResult<()> {
        self.call(Direction::Subscribe, relationship, address, topic)
            .await
    }

    pub async fn unsubscribe_from_topic(
        &self,
        relationship: NotificationRelationship,
        address: &str,
        topic: NotificationTopic,
    ) -> NotificationResult<()> {
        self.call(Direction::Unsubscribe, relationship, address, topic)
            .await
    }

    /// Subscribes every topic in `topics`. Fails if any single call failed.
    pub async fn subscribe_to_topics(
        &self,
        relationship: NotificationRelationship,
        address: &str,
        topics: &BTreeSet<NotificationTopic>,
    ) -> NotificationResult<()> {
        self.call_all(Direction::Subscribe, relationship, address, topics)
            .await
    }

    /// Subscribes the wallet's relationship to each topic flagged true.
    pub async fn subscribe_to_all_enabled_topics(
        &self,
        settings: &WalletNotificationSettings,
    ) -> NotificationResult<()> {
        self.subscribe_to_topics(
            settings.relationship,
            &settings.address,
            &settings.enabled_topics(),
        )
        .await
    }

    /// Unsubscribes every known topic regardless of stored flags.
    pub async fn unsubscribe_from_all_topics(
        &self,
        relationship: NotificationRelationship,
        address: &str,
    ) -> NotificationResult<()> {
        let every_topic: BTreeSet<_> = NotificationTopic::ALL.into_iter().collect();
        self.call_all(Direction::Unsubscribe, relationship, address, &every_topic)
            .await
    }

    async fn call_all(
        &self,
        direction: Direction,
        relationship: NotificationRelationship,
        address: &str,
        topics: &BTreeSet<NotificationTopic>,
    ) -> NotificationResult<()> {
        let results = join_all(
            topics
                .iter()
                .map(|topic| self.call(direction, relationship, address, *topic)),
        )
        .await;

        let total = results.len();
        let mut failures = results.into_iter().filter_map(Result::err);
        match failures.next() {
            None => Ok(()),
            Some(first) => {
                let failed = 1 + failures.count();
                Err(NotificationError::TransportError(format!(
                    "{} of {} topic calls failed for {}:{} (first: {})",
                    failed, total, relationship, address, first
                )))
            }
        }
    }

    async fn call(
        &self,
        direction: Direction,
        relationship: NotificationRelationship,
        address: &str,
        topic: NotificationTopic,
    ) -> NotificationResult<()> {
        let identifier = topic_identifier(relationship, self.chain_id, address, topic);
        validate_topic(&identifier)?;

        let result = match direction {
            Direction::Subscribe => {
                log::debug!(
                    "Notifications: subscribing {}:{} to [ {} ]",
                    relationship,
                    address,
                    topic
                );
                self.client.subscribe_to_topic(&identifier).await
            }
            Direction::Unsubscribe => {
                log::debug!(
                    "Notifications: unsubscribing {}:{} from [ {} ]",
                    relationship,
                    address,
                    topic
                );
                self.client.unsubscribe_from_topic(&identifier).await
            }
        };

        if let Err(err) = &result {
            log::error!(
                "Notifications: {:?} failed for {}:{} [ {} ]: {}",
                direction,
                relationship,
                address,
                topic,
                err
            );
        }
        result
    }
}
