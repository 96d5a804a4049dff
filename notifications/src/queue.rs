//! Fire-and-forget work queue for remote subscription calls.
//!
//! Submitting never waits for the task. Tasks run concurrently on the runtime
//! the queue was started on, so a hung call only delays its own task.

use std::future::Future;
use std::pin::Pin;

use tokio::runtime::Handle;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinSet;

use crate::errors::{NotificationError, NotificationResult};

type Task = Pin<Box<dyn Future<Output = ()> + Send + 'static>>;

enum Message {
    Run(&'static str, Task),
    Idle(oneshot::Sender<()>),
}

/// Handle to the queue worker. Cloning shares the same worker.
#[derive(Debug, Clone)]
pub struct TaskQueue {
    sender: mpsc::UnboundedSender<Message>,
}

impl std::fmt::Debug for Message {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Message::Run(label, _) => write!(f, "Run({})", label),
            Message::Idle(_) => write!(f, "Idle"),
        }
    }
}

impl TaskQueue {
    /// Starts the worker on the current tokio runtime.
    pub fn start() -> NotificationResult<Self> {
        let handle = Handle::try_current().map_err(|_| NotificationError::NotInitialized)?;
        Ok(Self::start_on(&handle))
    }

    pub fn start_on(handle: &Handle) -> Self {
        let (sender, receiver) = mpsc::unbounded_channel();
        handle.spawn(run_worker(receiver));
        Self { sender }
    }

    /// Queues `task`; `label` only appears in logs.
    pub fn submit<F>(&self, label: &'static str, task: F) -> NotificationResult<()>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        self.sender
            .send(Message::Run(label, Box::pin(task)))
            .map_err(|_| NotificationError::QueueClosed)
    }

    /// Resolves once every task submitted so far has finished.
    pub async fn idle(&self) -> NotificationResult<()> {
        let (done, wait) = oneshot::channel();
        self.sender
            .send(Message::Idle(done))
            .map_err(|_| NotificationError::QueueClosed)?;
        wait.await.map_err(|_| NotificationError::QueueClosed)
    }
}

async fn run_worker(mut receiver: mpsc::UnboundedReceiver<Message>) {
    let mut in_flight: JoinSet<&'static str> = JoinSet::new();
    let mut waiters: Vec<oneshot::Sender<()>> = Vec::new();

    loop {
        tokio::select! {
            message = receiver.recv() => match message {
                Some(Message::Run(label, task)) => {
                    log::trace!("Notifications: running task {}", label);
                    in_flight.spawn(async move {
                        task.await;
                        label
                    });
                }
                Some(Message::Idle(done)) => {
                    if in_flight.is_empty() {
                        let _ = done.send(());
                    } else {
                        waiters.push(done);
                    }
                }
                None => break,
            },
            Some(joined) = in_flight.join_next(), if !in_flight.is_empty() => {
                if let Err(err) = joined {
                    log::error!("Notifications: queued task aborted: {}", err);
                }
                if in_flight.is_empty() {
                    waiters.drain(..).for_each(|done| {
                        let _ = done.send(());
                    });
                }
            }
        }
    }

    while let Some(joined) = in_flight.join_next().await {
        if let Err(err) = joined {
            log::error!("Notifications: queued task aborted: {}", err);
        }
    }
    waiters.drain(..).for_each(|done| {
        let _ = done.send(());
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::time::Duration;

    #[tokio::test]
    async fn idle_waits_for_submitted_tasks() {
        let queue = TaskQueue::start().unwrap();
        let finished = Arc::new(AtomicUsize::new(0));

        for delay in [30u64, 10, 20] {
            let finished = finished.clone();
            queue
                .submit("sleep", async move {
                    tokio::time::sleep(Duration::from_millis(delay)).await;
                    finished.fetch_add(1, Ordering::SeqCst);
                })
                .unwrap();
        }

        queue.idle().await.unwrap();
        assert_eq!(finished.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn idle_on_empty_queue_returns_immediately() {
        let queue = TaskQueue::start().unwrap();
        queue.idle().await.unwrap();
    }

    #[tokio::test]
    async fn hung_task_does_not_block_others() {
        let queue = TaskQueue::start().unwrap();
        let (tx, rx) = oneshot::channel::<()>();

        queue
            .submit("hung", async move {
                std::future::pending::<()>().await;
            })
            .unwrap();
        queue
            .submit("quick", async move {
                let _ = tx.send(());
            })
            .unwrap();

        tokio::time::timeout(Duration::from_secs(1), rx)
            .await
            .expect("quick task should complete")
            .unwrap();
    }

    #[test]
    fn start_outside_runtime_fails() {
        assert!(matches!(
            TaskQueue::start(),
            Err(NotificationError::NotInitialized)
        ));
    }
}
