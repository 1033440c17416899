use crate::core::errors::IngestError;
use crate::core::types::{EntityState, StateChange};
use async_trait::async_trait;

/// Downstream consumer of normalized events.
///
/// Each registered sink gets its own bounded queue and worker; a failing
/// sink is isolated from the others by the dispatcher.
#[async_trait]
pub trait EventSink: Send + Sync {
    /// Stable name used in logs and per-sink statistics.
    fn name(&self) -> &str;

    /// Deliver one event. Errors are retried per dispatcher policy.
    async fn deliver(&self, event: &StateChange) -> Result<(), IngestError>;
}

/// Message-queue publish call consumed by [`crate::dispatch::sinks::QueueSink`].
#[async_trait]
pub trait MessagePublisher: Send + Sync {
    async fn publish(&self, topic: &str, key: &str, payload: Vec<u8>) -> Result<(), IngestError>;
}

/// Key/value last-known-state cache consumed by
/// [`crate::dispatch::sinks::StateCacheSink`].
///
/// An entity with no prior cached state is a fresh insert, not an error.
#[async_trait]
pub trait StateStore: Send + Sync {
    async fn put(&self, entity_id: &str, state: EntityState) -> Result<(), IngestError>;

    async fn get(&self, entity_id: &str) -> Result<Option<EntityState>, IngestError>;
}

/// Counter/gauge sink consumed by [`crate::dispatch::sinks::MetricsSink`].
pub trait MetricsRecorder: Send + Sync {
    fn increment_counter(&self, name: &str, value: u64);

    fn record_gauge(&self, name: &str, value: f64);
}

// Shared-ownership passthroughs so a collaborator can back a sink and stay
// observable from the caller's side.

#[async_trait]
impl<T: MessagePublisher + ?Sized> MessagePublisher for std::sync::Arc<T> {
    async fn publish(&self, topic: &str, key: &str, payload: Vec<u8>) -> Result<(), IngestError> {
        (**self).publish(topic, key, payload).await
    }
}

#[async_trait]
impl<T: StateStore + ?Sized> StateStore for std::sync::Arc<T> {
    async fn put(&self, entity_id: &str, state: EntityState) -> Result<(), IngestError> {
        (**self).put(entity_id, state).await
    }

    async fn get(&self, entity_id: &str) -> Result<Option<EntityState>, IngestError> {
        (**self).get(entity_id).await
    }
}

impl<T: MetricsRecorder + ?Sized> MetricsRecorder for std::sync::Arc<T> {
    fn increment_counter(&self, name: &str, value: u64) {
        (**self).increment_counter(name, value);
    }

    fn record_gauge(&self, name: &str, value: f64) {
        (**self).record_gauge(name, value);
    }
}
