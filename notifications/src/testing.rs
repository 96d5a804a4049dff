//! Recording transport for tests and offline builds.

use async_trait::async_trait;
use parking_lot::Mutex;

use crate::errors::{NotificationError, NotificationResult};
use crate::topics::TopicSubscriptionClient;

type FailurePredicate = Box<dyn Fn(&TopicCall) -> bool + Send + Sync>;

/// A single transport call as seen by [`MockTopicClient`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TopicCall {
    Subscribe(String),
    Unsubscribe(String),
}

impl TopicCall {
    pub fn topic(&self) -> &str {
        match self {
            TopicCall::Subscribe(topic) | TopicCall::Unsubscribe(topic) => topic,
        }
    }

    pub fn is_subscribe(&self) -> bool {
        matches!(self, TopicCall::Subscribe(_))
    }
}

/// Records every call; fails the ones matching the configured predicate.
#[derive(Default)]
pub struct MockTopicClient {
    calls: Mutex<Vec<TopicCall>>,
    failure: Mutex<Option<FailurePredicate>>,
}

impl MockTopicClient {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fail_when<F>(&self, predicate: F)
    where
        F: Fn(&TopicCall) -> bool + Send + Sync + 'static,
    {
        *self.failure.lock() = Some(Box::new(predicate));
    }

    pub fn succeed_all(&self) {
        *self.failure.lock() = None;
    }

    /// Calls made so far, in completion order.
    pub fn calls(&self) -> Vec<TopicCall> {
        self.calls.lock().clone()
    }

    pub fn clear_calls(&self) {
        self.calls.lock().clear();
    }

    pub fn subscribed_topics(&self) -> Vec<String> {
        self.calls
            .lock()
            .iter()
            .filter(|call| call.is_subscribe())
            .map(|call| call.topic().to_string())
            .collect()
    }

    pub fn unsubscribed_topics(&self) -> Vec<String> {
        self.calls
            .lock()
            .iter()
            .filter(|call| !call.is_subscribe())
            .map(|call| call.topic().to_string())
            .collect()
    }

    fn record(&self, call: TopicCall) -> NotificationResult<()> {
        let failed = self
            .failure
            .lock()
            .as_ref()
            .is_some_and(|predicate| predicate(&call));
        let topic = call.topic().to_string();
        self.calls.lock().push(call);
        if failed {
            Err(NotificationError::TransportError(format!(
                "simulated failure for {}",
                topic
            )))
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl TopicSubscriptionClient for MockTopicClient {
    async fn subscribe_to_topic(&self, topic: &str) -> NotificationResult<()> {
        self.record(TopicCall::Subscribe(topic.to_string()))
    }

    async fn unsubscribe_from_topic(&self, topic: &str) -> NotificationResult<()> {
        self.record(TopicCall::Unsubscribe(topic.to_string()))
    }
}
