use futures::{stream, Stream};
use serde_json::{json, Value};
use std::collections::HashSet;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::sync::broadcast::{self, error::RecvError};
use uuid::Uuid;

use crate::models::{Assignment, ProgressRow};

/// Push event names the dashboard listens for.
pub const ACTIVE_ASSIGNMENTS_UPDATE: &str = "active-assignments-update";
pub const QUIZ_PROGRESS_UPDATE: &str = "quiz-progress-update";

pub const DEFAULT_CAPACITY: usize = 64;

#[derive(Clone, Debug)]
pub struct ServerEvent {
    pub name: &'static str,
    pub payload: Value,
}

impl ServerEvent {
    pub fn active_assignments(assignments: &[Assignment]) -> Self {
        Self {
            name: ACTIVE_ASSIGNMENTS_UPDATE,
            payload: json!(assignments),
        }
    }

    pub fn quiz_progress(assignment_id: i64, progress: &[ProgressRow]) -> Self {
        Self {
            name: QUIZ_PROGRESS_UPDATE,
            payload: json!({ "assignment_id": assignment_id, "progress": progress }),
        }
    }
}

type Registry = Arc<Mutex<HashSet<Uuid>>>;

fn lock(registry: &Registry) -> MutexGuard<'_, HashSet<Uuid>> {
    registry.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Fans events out to every connected dashboard and tracks who is connected.
#[derive(Clone)]
pub struct Broadcaster {
    sender: broadcast::Sender<ServerEvent>,
    subscribers: Registry,
}

impl Broadcaster {
    pub fn new(capacity: usize) -> Self {
        let (sender, _receiver) = broadcast::channel(capacity);
        Self {
            sender,
            subscribers: Arc::default(),
        }
    }

    pub fn subscribe(&self) -> Subscription {
        let id = Uuid::new_v4();
        let receiver = self.sender.subscribe();
        let count = {
            let mut set = lock(&self.subscribers);
            set.insert(id);
            set.len()
        };
        tracing::info!(subscriber = %id, subscribers = count, "client connected");
        Subscription {
            receiver,
            guard: SubscriberGuard {
                id,
                registry: self.subscribers.clone(),
            },
        }
    }

    /// Send to all current subscribers. Never waits on a slow one; with
    /// nobody connected the event is dropped.
    pub fn publish(&self, event: ServerEvent) -> usize {
        self.sender.send(event).unwrap_or(0)
    }

    pub fn subscriber_count(&self) -> usize {
        lock(&self.subscribers).len()
    }
}

impl Default for Broadcaster {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

struct SubscriberGuard {
    id: Uuid,
    registry: Registry,
}

impl Drop for SubscriberGuard {
    fn drop(&mut self) {
        let count = {
            let mut set = lock(&self.registry);
            set.remove(&self.id);
            set.len()
        };
        tracing::info!(subscriber = %self.id, subscribers = count, "client disconnected");
    }
}

/// A live connection. Dropping it disconnects the subscriber.
pub struct Subscription {
    receiver: broadcast::Receiver<ServerEvent>,
    guard: SubscriberGuard,
}

impl Subscription {
    pub fn id(&self) -> Uuid {
        self.guard.id
    }

    /// Next event, skipping over anything missed while lagging.
    /// `None` once the broadcaster is gone.
    pub async fn recv(&mut self) -> Option<ServerEvent> {
        loop {
            match self.receiver.recv().await {
                Ok(event) => return Some(event),
                Err(RecvError::Lagged(skipped)) => {
                    tracing::debug!(subscriber = %self.guard.id, skipped, "subscriber lagging");
                }
                Err(RecvError::Closed) => return None,
            }
        }
    }

    /// Turn the subscription into a stream; the subscriber stays registered
    /// until the stream is dropped.
    pub fn into_stream(self) -> impl Stream<Item = ServerEvent> + Send + 'static {
        stream::unfold(self, |mut sub| async move {
            let event = sub.recv().await?;
            Some((event, sub))
        })
    }
}
