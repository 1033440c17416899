//! Event fan-out with per-sink failure isolation.
//!
//! Every registered sink owns a bounded queue and a worker task. The read
//! path only ever performs a non-blocking enqueue, so a slow or failing
//! sink can never stall the transport session or the other sinks.

pub mod sinks;

use crate::core::traits::EventSink;
use crate::core::types::StateChange;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

#[derive(Debug, Clone)]
pub struct DispatchConfig {
    /// Capacity of each sink's queue; backpressure beyond it is absorbed
    /// by dropping for that sink only.
    pub queue_capacity: usize,
    /// Delivery attempts per event before drop-and-log.
    pub max_attempts: u32,
    pub retry_delay: Duration,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            queue_capacity: 256,
            max_attempts: 3,
            retry_delay: Duration::from_millis(200),
        }
    }
}

#[derive(Default)]
struct SinkStats {
    delivered: AtomicU64,
    retries: AtomicU64,
    dropped_queue_full: AtomicU64,
    dropped_failed: AtomicU64,
}

/// Per-sink delivery counters.
#[derive(Debug, Clone)]
pub struct SinkStatsSnapshot {
    pub sink: String,
    pub delivered: u64,
    pub retries: u64,
    pub dropped_queue_full: u64,
    pub dropped_failed: u64,
}

struct SinkWorker {
    name: String,
    tx: mpsc::Sender<StateChange>,
    stats: Arc<SinkStats>,
    handle: JoinHandle<()>,
}

pub struct Dispatcher {
    config: DispatchConfig,
    workers: Vec<SinkWorker>,
}

impl Dispatcher {
    #[must_use]
    pub fn new(config: DispatchConfig) -> Self {
        Self {
            config,
            workers: Vec::new(),
        }
    }

    /// Register a sink and spawn its worker.
    pub fn register(&mut self, sink: Arc<dyn EventSink>) {
        let (tx, rx) = mpsc::channel(self.config.queue_capacity);
        let stats = Arc::new(SinkStats::default());
        let name = sink.name().to_string();
        let handle = tokio::spawn(worker_loop(
            sink,
            rx,
            self.config.clone(),
            Arc::clone(&stats),
        ));

        self.workers.push(SinkWorker {
            name,
            tx,
            stats,
            handle,
        });
    }

    /// Enqueue one event to every sink. Non-blocking: a sink whose queue
    /// is full loses this event without affecting the others.
    pub fn dispatch(&self, event: &StateChange) {
        for worker in &self.workers {
            match worker.tx.try_send(event.clone()) {
                Ok(()) => {}
                Err(TrySendError::Full(_)) => {
                    worker.stats.dropped_queue_full.fetch_add(1, Ordering::Relaxed);
                    warn!(
                        sink = %worker.name,
                        entity_id = %event.entity_id,
                        "sink queue full, dropping event"
                    );
                }
                Err(TrySendError::Closed(_)) => {
                    warn!(sink = %worker.name, "sink worker gone, dropping event");
                }
            }
        }
    }

    #[must_use]
    pub fn sink_count(&self) -> usize {
        self.workers.len()
    }

    #[must_use]
    pub fn stats(&self) -> Vec<SinkStatsSnapshot> {
        self.workers
            .iter()
            .map(|worker| SinkStatsSnapshot {
                sink: worker.name.clone(),
                delivered: worker.stats.delivered.load(Ordering::Relaxed),
                retries: worker.stats.retries.load(Ordering::Relaxed),
                dropped_queue_full: worker.stats.dropped_queue_full.load(Ordering::Relaxed),
                dropped_failed: worker.stats.dropped_failed.load(Ordering::Relaxed),
            })
            .collect()
    }

    /// Close every queue and wait for the workers to drain.
    pub async fn shutdown(self) {
        let mut handles = Vec::with_capacity(self.workers.len());
        for worker in self.workers {
            drop(worker.tx);
            handles.push(worker.handle);
        }
        for handle in handles {
            let _ = handle.await;
        }
    }
}

async fn worker_loop(
    sink: Arc<dyn EventSink>,
    mut rx: mpsc::Receiver<StateChange>,
    config: DispatchConfig,
    stats: Arc<SinkStats>,
) {
    while let Some(event) = rx.recv().await {
        let mut attempt = 1;
        loop {
            match sink.deliver(&event).await {
                Ok(()) => {
                    stats.delivered.fetch_add(1, Ordering::Relaxed);
                    break;
                }
                Err(e) if attempt < config.max_attempts => {
                    stats.retries.fetch_add(1, Ordering::Relaxed);
                    debug!(
                        sink = sink.name(),
                        attempt,
                        error = %e,
                        "sink delivery failed, retrying"
                    );
                    tokio::time::sleep(config.retry_delay).await;
                    attempt += 1;
                }
                Err(e) => {
                    stats.dropped_failed.fetch_add(1, Ordering::Relaxed);
                    warn!(
                        sink = sink.name(),
                        entity_id = %event.entity_id,
                        error = %e,
                        "sink delivery failed persistently, dropping event"
                    );
                    break;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::errors::IngestError;
    use crate::core::types::EntityState;
    use async_trait::async_trait;
    use chrono::Utc;
    use std::sync::Mutex;

    fn event(entity_id: &str) -> StateChange {
        StateChange {
            event_type: "state_changed".to_string(),
            entity_id: entity_id.to_string(),
            old_state: None,
            new_state: EntityState::new("on"),
            time_fired: None,
            received_at: Utc::now(),
            connection_id: "home".to_string(),
        }
    }

    struct RecordingSink {
        name: String,
        seen: Mutex<Vec<String>>,
        fail_always: bool,
    }

    impl RecordingSink {
        fn new(name: &str, fail_always: bool) -> Arc<Self> {
            Arc::new(Self {
                name: name.to_string(),
                seen: Mutex::new(Vec::new()),
                fail_always,
            })
        }
    }

    #[async_trait]
    impl EventSink for RecordingSink {
        fn name(&self) -> &str {
            &self.name
        }

        async fn deliver(&self, event: &StateChange) -> Result<(), IngestError> {
            if self.fail_always {
                return Err(IngestError::SinkDelivery("simulated outage".to_string()));
            }
            self.seen.lock().unwrap().push(event.entity_id.clone());
            Ok(())
        }
    }

    async fn drain(dispatcher: Dispatcher) {
        dispatcher.shutdown().await;
    }

    #[tokio::test]
    async fn healthy_sinks_each_receive_every_event_once() {
        let mut dispatcher = Dispatcher::new(DispatchConfig::default());
        let a = RecordingSink::new("a", false);
        let b = RecordingSink::new("b", false);
        dispatcher.register(a.clone());
        dispatcher.register(b.clone());

        for i in 0..5 {
            dispatcher.dispatch(&event(&format!("light.{i}")));
        }
        drain(dispatcher).await;

        for sink in [&a, &b] {
            let seen = sink.seen.lock().unwrap();
            assert_eq!(seen.len(), 5);
            assert_eq!(seen[0], "light.0");
            assert_eq!(seen[4], "light.4");
        }
    }

    #[tokio::test]
    async fn failing_sink_never_affects_the_healthy_one() {
        let config = DispatchConfig {
            retry_delay: Duration::from_millis(1),
            ..DispatchConfig::default()
        };
        let mut dispatcher = Dispatcher::new(config);
        let failing = RecordingSink::new("failing", true);
        let healthy = RecordingSink::new("healthy", false);
        dispatcher.register(failing.clone());
        dispatcher.register(healthy.clone());

        for i in 0..10 {
            dispatcher.dispatch(&event(&format!("sensor.{i}")));
        }

        let stats = loop {
            tokio::time::sleep(Duration::from_millis(10)).await;
            let stats = dispatcher.stats();
            if stats[1].delivered == 10 && stats[0].dropped_failed == 10 {
                break stats;
            }
        };

        assert_eq!(healthy.seen.lock().unwrap().len(), 10);
        assert!(failing.seen.lock().unwrap().is_empty());
        // Each failed event burned max_attempts - 1 retries.
        assert_eq!(stats[0].retries, 20);
        drain(dispatcher).await;
    }

    #[tokio::test]
    async fn full_queue_drops_without_blocking() {
        struct StuckSink;

        #[async_trait]
        impl EventSink for StuckSink {
            fn name(&self) -> &str {
                "stuck"
            }

            async fn deliver(&self, _event: &StateChange) -> Result<(), IngestError> {
                tokio::time::sleep(Duration::from_secs(3600)).await;
                Ok(())
            }
        }

        let config = DispatchConfig {
            queue_capacity: 2,
            ..DispatchConfig::default()
        };
        let mut dispatcher = Dispatcher::new(config);
        dispatcher.register(Arc::new(StuckSink));

        // Give the worker a moment to pull the first event off the queue.
        dispatcher.dispatch(&event("light.0"));
        tokio::time::sleep(Duration::from_millis(20)).await;
        for i in 1..6 {
            dispatcher.dispatch(&event(&format!("light.{i}")));
        }

        let stats = dispatcher.stats();
        assert!(stats[0].dropped_queue_full >= 3);
    }
}
