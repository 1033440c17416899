//! Connection lifecycle supervision.
//!
//! One supervisor task per connection record runs the connect / session /
//! backoff loop, honoring administrative enable/disable and keeping at
//! most one live session per connection at any time. [`IngestService`]
//! holds the id-keyed handles, playing the registry's non-owning side of
//! the relationship.

use crate::core::config::{BackoffConfig, ConnectionConfig, SessionConfig};
use crate::core::kernel::TungsteniteWs;
use crate::core::types::CloseReason;
use crate::dispatch::Dispatcher;
use crate::health::{HealthRegistry, HealthSnapshot};
use crate::hub::codec::HubCodec;
use crate::hub::reconnect::ReconnectController;
use crate::hub::session::{Session, SessionExit, SessionHandle};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SupervisorCommand {
    Enable,
    Disable,
    Shutdown,
}

/// Handle to one connection's supervisor task.
pub struct SupervisorHandle {
    connection_id: String,
    commands: mpsc::Sender<SupervisorCommand>,
    session_rx: watch::Receiver<Option<SessionHandle>>,
    task: JoinHandle<()>,
}

impl SupervisorHandle {
    #[must_use]
    pub fn connection_id(&self) -> &str {
        &self.connection_id
    }

    /// Current live session, if one exists right now.
    #[must_use]
    pub fn session(&self) -> Option<SessionHandle> {
        self.session_rx.borrow().clone()
    }

    /// Re-enable the connection; restarts the backoff schedule from zero.
    pub async fn enable(&self) {
        let _ = self.commands.send(SupervisorCommand::Enable).await;
    }

    /// Disable the connection: cancels any pending reconnect attempt and
    /// requests graceful closure of a live session.
    pub async fn disable(&self) {
        let _ = self.commands.send(SupervisorCommand::Disable).await;
    }

    async fn shutdown(self) {
        let _ = self.commands.send(SupervisorCommand::Shutdown).await;
        let _ = self.task.await;
    }
}

/// Spawn the supervisor task for one connection record.
#[must_use]
pub fn spawn_supervisor(
    config: ConnectionConfig,
    session_config: SessionConfig,
    backoff: BackoffConfig,
    dispatcher: Arc<Dispatcher>,
    health: Arc<HealthRegistry>,
) -> SupervisorHandle {
    let (commands_tx, commands_rx) = mpsc::channel(8);
    let (session_tx, session_rx) = watch::channel(None);
    let connection_id = config.id.clone();

    let task = tokio::spawn(supervise(
        config,
        session_config,
        backoff,
        dispatcher,
        health,
        commands_rx,
        session_tx,
    ));

    SupervisorHandle {
        connection_id,
        commands: commands_tx,
        session_rx,
        task,
    }
}

async fn supervise(
    config: ConnectionConfig,
    session_config: SessionConfig,
    backoff: BackoffConfig,
    dispatcher: Arc<Dispatcher>,
    health: Arc<HealthRegistry>,
    mut commands: mpsc::Receiver<SupervisorCommand>,
    session_tx: watch::Sender<Option<SessionHandle>>,
) {
    let mut controller = ReconnectController::new(backoff);
    let mut enabled = config.enabled;

    loop {
        if !enabled {
            match commands.recv().await {
                Some(SupervisorCommand::Enable) => {
                    info!(connection = %config.id, "connection enabled");
                    controller.reset();
                    enabled = true;
                }
                Some(SupervisorCommand::Disable) => continue,
                Some(SupervisorCommand::Shutdown) | None => return,
            }
        }

        let transport = TungsteniteWs::new(config.ws_url.clone(), config.id.clone(), HubCodec)
            .with_connect_timeout(session_config.connect_timeout);
        let (session, handle) = Session::new(
            &config,
            session_config.clone(),
            transport,
            Arc::clone(&dispatcher),
            Arc::clone(&health),
        );
        let _ = session_tx.send(Some(handle.clone()));

        let exit = run_session(session, &handle, &mut commands, &mut enabled).await;
        let _ = session_tx.send(None);

        let Some(exit) = exit else { return };

        match exit.reason {
            CloseReason::AuthFailed(ref msg) => {
                // Operator must fix the credential; do not schedule retry.
                error!(connection = %config.id, reason = %msg, "authentication failed, disabling");
                enabled = false;
            }
            CloseReason::Disabled => {
                enabled = false;
            }
            ref reason if reason.is_retryable() => {
                controller.note_session_end(exit.active_for);
                let delay = controller.next_delay();
                warn!(
                    connection = %config.id,
                    reason = %reason,
                    attempt = controller.attempts(),
                    ?delay,
                    "session lost, scheduling reconnect"
                );

                tokio::select! {
                    _ = tokio::time::sleep(delay) => {}
                    command = commands.recv() => match command {
                        Some(SupervisorCommand::Disable) => enabled = false,
                        Some(SupervisorCommand::Enable) => controller.reset(),
                        Some(SupervisorCommand::Shutdown) | None => return,
                    },
                }
            }
            ref reason => {
                warn!(connection = %config.id, reason = %reason, "session ended without retry");
                enabled = false;
            }
        }
    }
}

/// Drive one session while staying responsive to administrative commands.
/// Returns `None` when the supervisor itself should stop.
async fn run_session(
    session: Session<TungsteniteWs<HubCodec>>,
    handle: &SessionHandle,
    commands: &mut mpsc::Receiver<SupervisorCommand>,
    enabled: &mut bool,
) -> Option<SessionExit> {
    let run = session.run();
    tokio::pin!(run);
    let mut shutting_down = false;

    loop {
        tokio::select! {
            exit = &mut run => {
                return if shutting_down { None } else { Some(exit) };
            }
            command = commands.recv() => match command {
                Some(SupervisorCommand::Disable) => {
                    handle.close(CloseReason::Disabled).await;
                    *enabled = false;
                }
                Some(SupervisorCommand::Enable) => {}
                Some(SupervisorCommand::Shutdown) | None => {
                    handle.close(CloseReason::Disabled).await;
                    shutting_down = true;
                }
            },
        }
    }
}

/// Registry-facing front: connection id -> supervisor handle.
///
/// Sessions report status by connection id through the health registry;
/// this type only looks supervisors up by id and never owns session state
/// directly.
pub struct IngestService {
    session_config: SessionConfig,
    backoff: BackoffConfig,
    dispatcher: Arc<Dispatcher>,
    health: Arc<HealthRegistry>,
    connections: Mutex<HashMap<String, SupervisorHandle>>,
}

impl IngestService {
    #[must_use]
    pub fn new(dispatcher: Dispatcher, health: Arc<HealthRegistry>) -> Self {
        Self {
            session_config: SessionConfig::default(),
            backoff: BackoffConfig::default(),
            dispatcher: Arc::new(dispatcher),
            health,
            connections: Mutex::new(HashMap::new()),
        }
    }

    #[must_use]
    pub fn with_session_config(mut self, config: SessionConfig) -> Self {
        self.session_config = config;
        self
    }

    #[must_use]
    pub fn with_backoff(mut self, backoff: BackoffConfig) -> Self {
        self.backoff = backoff;
        self
    }

    /// Register a connection record and start supervising it. Replaces and
    /// shuts down any previous supervisor under the same id.
    pub async fn add_connection(&self, config: ConnectionConfig) {
        let handle = spawn_supervisor(
            config,
            self.session_config.clone(),
            self.backoff.clone(),
            Arc::clone(&self.dispatcher),
            Arc::clone(&self.health),
        );

        let previous = self
            .connections
            .lock()
            .expect("connection map lock poisoned")
            .insert(handle.connection_id().to_string(), handle);
        if let Some(previous) = previous {
            previous.shutdown().await;
        }
    }

    pub async fn enable(&self, connection_id: &str) -> bool {
        let commands = self.commands_for(connection_id);
        match commands {
            Some(tx) => tx.send(SupervisorCommand::Enable).await.is_ok(),
            None => false,
        }
    }

    pub async fn disable(&self, connection_id: &str) -> bool {
        let commands = self.commands_for(connection_id);
        match commands {
            Some(tx) => tx.send(SupervisorCommand::Disable).await.is_ok(),
            None => false,
        }
    }

    /// Current live session handle for issuing commands, if any.
    #[must_use]
    pub fn session(&self, connection_id: &str) -> Option<SessionHandle> {
        self.connections
            .lock()
            .expect("connection map lock poisoned")
            .get(connection_id)
            .and_then(SupervisorHandle::session)
    }

    #[must_use]
    pub fn health(&self, connection_id: &str) -> Option<HealthSnapshot> {
        self.health.snapshot(connection_id)
    }

    #[must_use]
    pub fn health_registry(&self) -> &HealthRegistry {
        &self.health
    }

    #[must_use]
    pub fn dispatcher(&self) -> &Dispatcher {
        &self.dispatcher
    }

    /// Stop every supervisor and wait for their sessions to close.
    pub async fn shutdown(&self) {
        let handles: Vec<SupervisorHandle> = {
            let mut connections = self
                .connections
                .lock()
                .expect("connection map lock poisoned");
            connections.drain().map(|(_, handle)| handle).collect()
        };
        for handle in handles {
            handle.shutdown().await;
        }
    }

    fn commands_for(&self, connection_id: &str) -> Option<mpsc::Sender<SupervisorCommand>> {
        self.connections
            .lock()
            .expect("connection map lock poisoned")
            .get(connection_id)
            .map(|handle| handle.commands.clone())
    }
}
