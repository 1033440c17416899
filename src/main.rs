use anyhow::Context;
use hublink::core::traits::EventSink;
use hublink::dispatch::sinks::{
    MemoryMetrics, MemoryPublisher, MemoryStateStore, MetricsSink, QueueSink, StateCacheSink,
};
use hublink::{ConnectionConfig, DispatchConfig, Dispatcher, HealthRegistry, IngestService};
use std::sync::Arc;
use tracing::info;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt::init();

    // Expects HUB_WS_URL and HUB_TOKEN, e.g.
    // HUB_WS_URL=ws://homeassistant.local:8123/api/websocket
    #[cfg(feature = "env-file")]
    let config = ConnectionConfig::from_env_file("home", "HUB")
        .context("reading connection settings from environment")?;
    #[cfg(not(feature = "env-file"))]
    let config = ConnectionConfig::from_env("home", "HUB")
        .context("reading connection settings from environment")?;

    let publisher = Arc::new(MemoryPublisher::new());
    let store = Arc::new(MemoryStateStore::new());
    let metrics = Arc::new(MemoryMetrics::new());

    let mut dispatcher = Dispatcher::new(DispatchConfig::default());
    dispatcher.register(Arc::new(QueueSink::new("hub-events", Arc::clone(&publisher)))
        as Arc<dyn EventSink>);
    dispatcher.register(Arc::new(StateCacheSink::new(Arc::clone(&store))) as Arc<dyn EventSink>);
    dispatcher.register(Arc::new(MetricsSink::new(Arc::clone(&metrics))) as Arc<dyn EventSink>);

    let health = Arc::new(HealthRegistry::new());
    let service = IngestService::new(dispatcher, Arc::clone(&health));
    service.add_connection(config).await;

    info!("ingesting events, press Ctrl-C to stop");
    tokio::signal::ctrl_c().await?;

    service.shutdown().await;

    for snapshot in health.snapshots() {
        info!(
            connection = %snapshot.connection_id,
            state = %snapshot.state,
            events = snapshot.events_received,
            malformed = snapshot.events_malformed,
            errors = snapshot.error_count,
            auth_failures = snapshot.auth_failures,
            uptime_pct = format!("{:.1}", snapshot.uptime_pct),
            "final connection health"
        );
    }
    info!(
        cached_entities = store.len().await,
        published = publisher.published().len(),
        events_total = metrics.counter("events_ingested"),
        "final sink totals"
    );

    Ok(())
}
