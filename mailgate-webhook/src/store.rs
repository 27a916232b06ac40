//! Idempotency records for webhook notifications.
//!
//! `claim` is the only synchronisation point between concurrent deliveries
//! of the same event: exactly one caller wins and processes the message.

use std::fmt;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::{DashMap, mapref::entry::Entry};
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EventStatus {
    Processing,
    Ok,
    Failed,
}

impl fmt::Display for EventStatus {
    fn fmt(&self, fmt: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt.write_str(match self {
            Self::Processing => "processing",
            Self::Ok => "ok",
            Self::Failed => "failed",
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InboundEvent {
    pub event_id: String,
    pub status: EventStatus,
    pub error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl InboundEvent {
    #[must_use]
    pub fn processing(event_id: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            event_id: event_id.into(),
            status: EventStatus::Processing,
            error: None,
            created_at: now,
            updated_at: now,
        }
    }
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Unknown event {0}")]
    NotFound(String),

    #[error("Event {event_id} already finished as {status}")]
    AlreadyFinished {
        event_id: String,
        status: EventStatus,
    },

    #[error("Event store unavailable: {0}")]
    Unavailable(String),
}

/// Durable record of which notifications have been seen.
#[async_trait]
pub trait EventStore: Send + Sync {
    /// Inserts a `processing` record for `event_id` unless one exists.
    /// Returns `false` when the event was already claimed.
    async fn claim(&self, event_id: &str) -> Result<bool, StoreError>;

    /// Moves a claimed event out of `processing`. Happens once per event.
    async fn mark_status(
        &self,
        event_id: &str,
        status: EventStatus,
        error: Option<String>,
    ) -> Result<(), StoreError>;

    async fn get(&self, event_id: &str) -> Result<Option<InboundEvent>, StoreError>;
}

/// Process-local [`EventStore`]. Records live as long as the process.
#[derive(Debug, Default)]
pub struct MemoryEventStore {
    events: DashMap<String, InboundEvent>,
}

impl MemoryEventStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.events.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }
}

#[async_trait]
impl EventStore for MemoryEventStore {
    async fn claim(&self, event_id: &str) -> Result<bool, StoreError> {
        match self.events.entry(event_id.to_string()) {
            Entry::Occupied(_) => Ok(false),
            Entry::Vacant(entry) => {
                entry.insert(InboundEvent::processing(event_id));
                Ok(true)
            }
        }
    }

    async fn mark_status(
        &self,
        event_id: &str,
        status: EventStatus,
        error: Option<String>,
    ) -> Result<(), StoreError> {
        let mut event = self
            .events
            .get_mut(event_id)
            .ok_or_else(|| StoreError::NotFound(event_id.to_string()))?;

        if event.status != EventStatus::Processing {
            return Err(StoreError::AlreadyFinished {
                event_id: event_id.to_string(),
                status: event.status,
            });
        }

        event.status = status;
        event.error = error;
        event.updated_at = Utc::now();

        Ok(())
    }

    async fn get(&self, event_id: &str) -> Result<Option<InboundEvent>, StoreError> {
        Ok(self.events.get(event_id).map(|event| event.clone()))
    }
}
