//! EventBus - broadcast of pipeline events inside one actor
//!
//! The writer and the console publish here after their store writes commit.
//! Notification delivery to the operator (push, mail) subscribes to this bus;
//! no component relies on it for correctness, the store stays authoritative.

use serde::Serialize;
use tokio::sync::broadcast;

use crate::identity::UserId;

/// Events emitted after a store write commits
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AccessEvent {
    /// A client recorded a payment claim
    RequestSubmitted {
        /// Owner of the request
        user_id: UserId,
        /// Display id of the request
        request_id: String,
        /// Requested plan
        plan_id: String,
        /// Claimed amount in minor units
        amount_minor: i64,
    },
    /// The console approved a request and wrote the grant
    RequestApproved {
        /// Owner of the request
        user_id: UserId,
        /// Display id of the request
        request_id: String,
        /// Operator who decided
        operator_id: String,
    },
    /// The console denied a request
    RequestDenied {
        /// Owner of the request
        user_id: UserId,
        /// Display id of the request
        request_id: String,
        /// Operator who decided
        operator_id: String,
        /// Whether the grant was revoked in the same transaction
        grant_revoked: bool,
    },
}

impl AccessEvent {
    /// Owner of the request this event is about
    #[must_use]
    pub fn user_id(&self) -> &UserId {
        match self {
            Self::RequestSubmitted { user_id, .. }
            | Self::RequestApproved { user_id, .. }
            | Self::RequestDenied { user_id, .. } => user_id,
        }
    }
}

/// Broadcast-based event bus
///
/// Slow subscribers miss events (lagged) rather than blocking the publisher.
#[derive(Debug, Clone)]
pub struct EventBus {
    sender: broadcast::Sender<AccessEvent>,
}

impl EventBus {
    /// Create a bus buffering up to `capacity` events per subscriber
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Receive all future events
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<AccessEvent> {
        self.sender.subscribe()
    }

    /// Publish to all current subscribers; returns how many received it
    pub fn publish(&self, event: AccessEvent) -> usize {
        // send() fails only when nobody is listening
        self.sender.send(event).unwrap_or(0)
    }

    /// Number of active subscribers
    #[must_use]
    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(64)
    }
}
