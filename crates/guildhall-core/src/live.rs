// In-process fan-out of notifications and chat messages to connected clients.

use std::sync::Arc;

use serde::Serialize;
use tokio::sync::broadcast;
use tracing::{debug, warn};

use crate::chat::ChatMessage;
use crate::notifications::Notification;

/// Buffered events per subscriber before it starts lagging.
const HUB_CAPACITY: usize = 1024;

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", content = "data", rename_all = "camelCase")]
pub enum LivePayload {
    Notification(Notification),
    Chat(ChatMessage),
}

impl LivePayload {
    /// SSE event name for this payload.
    pub fn event_name(&self) -> &'static str {
        match self {
            LivePayload::Notification(_) => "notification",
            LivePayload::Chat(_) => "chat",
        }
    }
}

/// One published event and the users it is addressed to.
#[derive(Debug, Clone, PartialEq)]
pub struct LiveEvent {
    pub recipients: Vec<i64>,
    pub payload: LivePayload,
}

impl LiveEvent {
    pub fn is_for(&self, user_id: i64) -> bool {
        self.recipients.contains(&user_id)
    }
}

#[derive(Clone)]
pub struct LiveHub {
    tx: broadcast::Sender<Arc<LiveEvent>>,
}

impl LiveHub {
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(HUB_CAPACITY);
        Self { tx }
    }

    /// Publish an event. Having no subscribers is not an error.
    pub fn publish(&self, event: LiveEvent) {
        if event.recipients.is_empty() {
            return;
        }
        match self.tx.send(Arc::new(event)) {
            Ok(n) => debug!(subscribers = n, "live event published"),
            Err(_) => debug!("live event dropped, no subscribers"),
        }
    }

    /// Subscribe on behalf of `user_id`; only events addressed to that user
    /// are yielded.
    pub fn subscribe(&self, user_id: i64) -> LiveSubscription {
        LiveSubscription {
            user_id,
            rx: self.tx.subscribe(),
        }
    }

    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

impl Default for LiveHub {
    fn default() -> Self {
        Self::new()
    }
}

pub struct LiveSubscription {
    user_id: i64,
    rx: broadcast::Receiver<Arc<LiveEvent>>,
}

impl LiveSubscription {
    pub fn user_id(&self) -> i64 {
        self.user_id
    }

    /// Wait for the next event addressed to this subscriber. Returns `None`
    /// once the hub is gone. Events missed while lagging are skipped.
    pub async fn next(&mut self) -> Option<Arc<LiveEvent>> {
        loop {
            match self.rx.recv().await {
                Ok(event) if event.is_for(self.user_id) => return Some(event),
                Ok(_) => continue,
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!(user_id = self.user_id, skipped, "live subscriber lagged");
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }
}
