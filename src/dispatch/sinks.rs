//! Bundled sinks adapting events to the downstream collaborator calls:
//! a message-queue publish, a last-known-state cache update, and a
//! metrics recorder. In-memory collaborator implementations back the demo
//! binary and tests.

use crate::core::errors::IngestError;
use crate::core::traits::{EventSink, MessagePublisher, MetricsRecorder, StateStore};
use crate::core::types::{EntityState, StateChange};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Mutex;
use tokio::sync::RwLock;

/// Publishes each event to a message queue, partitioned by entity id.
pub struct QueueSink<P> {
    topic: String,
    publisher: P,
}

impl<P: MessagePublisher> QueueSink<P> {
    #[must_use]
    pub fn new(topic: impl Into<String>, publisher: P) -> Self {
        Self {
            topic: topic.into(),
            publisher,
        }
    }
}

#[async_trait]
impl<P: MessagePublisher> EventSink for QueueSink<P> {
    fn name(&self) -> &str {
        "queue"
    }

    async fn deliver(&self, event: &StateChange) -> Result<(), IngestError> {
        let payload = serde_json::to_vec(event)?;
        self.publisher
            .publish(&self.topic, &event.entity_id, payload)
            .await
    }
}

/// Maintains the best-effort last-known-state view per entity.
pub struct StateCacheSink<S> {
    store: S,
}

impl<S: StateStore> StateCacheSink<S> {
    #[must_use]
    pub fn new(store: S) -> Self {
        Self { store }
    }
}

#[async_trait]
impl<S: StateStore> EventSink for StateCacheSink<S> {
    fn name(&self) -> &str {
        "state-cache"
    }

    async fn deliver(&self, event: &StateChange) -> Result<(), IngestError> {
        // Cold start included: an entity never seen before is simply
        // inserted fresh.
        self.store
            .put(&event.entity_id, event.new_state.clone())
            .await
    }
}

/// Feeds per-event counters to a metrics recorder.
pub struct MetricsSink<M> {
    recorder: M,
}

impl<M: MetricsRecorder> MetricsSink<M> {
    #[must_use]
    pub fn new(recorder: M) -> Self {
        Self { recorder }
    }
}

#[async_trait]
impl<M: MetricsRecorder> EventSink for MetricsSink<M> {
    fn name(&self) -> &str {
        "metrics"
    }

    async fn deliver(&self, event: &StateChange) -> Result<(), IngestError> {
        self.recorder.increment_counter("events_ingested", 1);
        self.recorder
            .increment_counter(&format!("events_ingested.{}", event.connection_id), 1);
        self.recorder.record_gauge(
            "last_event_unix_seconds",
            event.received_at.timestamp() as f64,
        );
        Ok(())
    }
}

/// In-process state cache.
#[derive(Default)]
pub struct MemoryStateStore {
    inner: RwLock<HashMap<String, EntityState>>,
}

impl MemoryStateStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self) -> usize {
        self.inner.read().await.len()
    }
}

#[async_trait]
impl StateStore for MemoryStateStore {
    async fn put(&self, entity_id: &str, state: EntityState) -> Result<(), IngestError> {
        self.inner.write().await.insert(entity_id.to_string(), state);
        Ok(())
    }

    async fn get(&self, entity_id: &str) -> Result<Option<EntityState>, IngestError> {
        Ok(self.inner.read().await.get(entity_id).cloned())
    }
}

/// In-process publisher recording every publish call.
#[derive(Default)]
pub struct MemoryPublisher {
    published: Mutex<Vec<(String, String, Vec<u8>)>>,
}

impl MemoryPublisher {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn published(&self) -> Vec<(String, String, Vec<u8>)> {
        self.published.lock().expect("publisher lock poisoned").clone()
    }
}

#[async_trait]
impl MessagePublisher for MemoryPublisher {
    async fn publish(&self, topic: &str, key: &str, payload: Vec<u8>) -> Result<(), IngestError> {
        self.published
            .lock()
            .expect("publisher lock poisoned")
            .push((topic.to_string(), key.to_string(), payload));
        Ok(())
    }
}

/// In-process counter/gauge recorder.
#[derive(Default)]
pub struct MemoryMetrics {
    counters: Mutex<HashMap<String, u64>>,
    gauges: Mutex<HashMap<String, f64>>,
}

impl MemoryMetrics {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn counter(&self, name: &str) -> u64 {
        self.counters
            .lock()
            .expect("metrics lock poisoned")
            .get(name)
            .copied()
            .unwrap_or(0)
    }

    #[must_use]
    pub fn gauge(&self, name: &str) -> Option<f64> {
        self.gauges
            .lock()
            .expect("metrics lock poisoned")
            .get(name)
            .copied()
    }
}

impl MetricsRecorder for MemoryMetrics {
    fn increment_counter(&self, name: &str, value: u64) {
        *self
            .counters
            .lock()
            .expect("metrics lock poisoned")
            .entry(name.to_string())
            .or_insert(0) += value;
    }

    fn record_gauge(&self, name: &str, value: f64) {
        self.gauges
            .lock()
            .expect("metrics lock poisoned")
            .insert(name.to_string(), value);
    }
}
