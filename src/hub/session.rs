//! Transport session state machine.
//!
//! One session owns one connection's full lifecycle: handshake, the
//! ordered read path, the serialized write path, heartbeat supervision and
//! correlation-table sweeping. Callers interact through a [`SessionHandle`];
//! the heartbeat supervisor and the reconnection layer request transitions
//! through the same message channel and never touch the transport.

use crate::core::config::{ConnectionConfig, SessionConfig};
use crate::core::errors::IngestError;
use crate::core::kernel::WsTransport;
use crate::core::types::{CloseReason, SessionState};
use crate::dispatch::Dispatcher;
use crate::health::HealthRegistry;
use crate::hub::codec::HubCodec;
use crate::hub::correlation::{CommandHandle, CorrelationTable};
use crate::hub::heartbeat::{HeartbeatAction, HeartbeatSupervisor};
use crate::hub::normalizer;
use crate::hub::types::{ClientFrame, FeatureFlags, ServerFrame};
use chrono::Utc;
use serde_json::{Map, Value};
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{mpsc, watch};
use tokio::time::{interval, timeout, MissedTickBehavior};
use tracing::{debug, info, instrument, warn};

const REQUEST_CHANNEL_CAPACITY: usize = 64;

enum SessionRequest {
    Send(ClientFrame),
    Close(CloseReason),
}

/// Cheap cloneable handle for issuing commands and requesting closure.
#[derive(Clone)]
pub struct SessionHandle {
    connection_id: String,
    requests: mpsc::Sender<SessionRequest>,
    correlation: Arc<CorrelationTable>,
    state_rx: watch::Receiver<SessionState>,
}

impl SessionHandle {
    #[must_use]
    pub fn connection_id(&self) -> &str {
        &self.connection_id
    }

    #[must_use]
    pub fn state(&self) -> SessionState {
        *self.state_rx.borrow()
    }

    /// Watch receiver for observing state transitions.
    #[must_use]
    pub fn state_changes(&self) -> watch::Receiver<SessionState> {
        self.state_rx.clone()
    }

    /// Issue an arbitrary correlated command. The returned handle resolves
    /// with the command's result, its explicit error, or a timeout.
    pub async fn command(
        &self,
        command_type: &str,
        payload: Map<String, Value>,
    ) -> CommandHandle {
        let (id, handle) = self.correlation.allocate(command_type);
        let frame = ClientFrame::Command {
            id,
            command_type: command_type.to_string(),
            payload,
        };
        if self.requests.send(SessionRequest::Send(frame)).await.is_err() {
            self.correlation.resolve(id, Err(IngestError::ConnectionClosed));
        }
        handle
    }

    /// Issue a correlated liveness probe by hand.
    pub async fn ping(&self) -> CommandHandle {
        let (id, handle) = self.correlation.allocate("ping");
        if self
            .requests
            .send(SessionRequest::Send(ClientFrame::Ping { id }))
            .await
            .is_err()
        {
            self.correlation.resolve(id, Err(IngestError::ConnectionClosed));
        }
        handle
    }

    /// Request closure with the given reason. Best effort: a session that
    /// already terminated is fine.
    pub async fn close(&self, reason: CloseReason) {
        let _ = self.requests.send(SessionRequest::Close(reason)).await;
    }
}

/// Outcome of a completed session, consumed by the reconnection layer.
#[derive(Debug)]
pub struct SessionExit {
    pub reason: CloseReason,
    /// How long the session stayed Active, if it got there at all.
    pub active_for: Option<Duration>,
}

pub struct Session<W: WsTransport<HubCodec>> {
    connection_id: String,
    transport: W,
    config: SessionConfig,
    access_token: String,
    event_filter: Option<String>,
    correlation: Arc<CorrelationTable>,
    dispatcher: Arc<Dispatcher>,
    health: Arc<HealthRegistry>,
    heartbeat: HeartbeatSupervisor,
    state: SessionState,
    state_tx: watch::Sender<SessionState>,
    requests_rx: mpsc::Receiver<SessionRequest>,
    /// Frames decoded but not yet handled (coalesced batches).
    inbox: VecDeque<ServerFrame>,
    subscribe_id: Option<u64>,
    subscription_id: Option<u64>,
    activated_at: Option<Instant>,
}

impl<W: WsTransport<HubCodec>> Session<W> {
    pub fn new(
        connection: &ConnectionConfig,
        config: SessionConfig,
        transport: W,
        dispatcher: Arc<Dispatcher>,
        health: Arc<HealthRegistry>,
    ) -> (Self, SessionHandle) {
        let correlation = Arc::new(CorrelationTable::new(config.command_deadline));
        let (requests_tx, requests_rx) = mpsc::channel(REQUEST_CHANNEL_CAPACITY);
        let (state_tx, state_rx) = watch::channel(SessionState::Connecting);
        let heartbeat = HeartbeatSupervisor::new(config.heartbeat_grace);

        let handle = SessionHandle {
            connection_id: connection.id.clone(),
            requests: requests_tx,
            correlation: Arc::clone(&correlation),
            state_rx,
        };

        let session = Self {
            connection_id: connection.id.clone(),
            transport,
            config,
            access_token: connection.access_token().to_string(),
            event_filter: connection.event_filter.clone(),
            correlation,
            dispatcher,
            health,
            heartbeat,
            state: SessionState::Connecting,
            state_tx,
            requests_rx,
            inbox: VecDeque::new(),
            subscribe_id: None,
            subscription_id: None,
            activated_at: None,
        };

        (session, handle)
    }

    /// Drive the session to completion.
    #[instrument(skip(self), fields(connection = %self.connection_id))]
    pub async fn run(mut self) -> SessionExit {
        self.report_transition(SessionState::Connecting);
        let reason = self.drive().await;
        let active_for = self.activated_at.map(|t| t.elapsed());

        info!(reason = %reason, "session ended");
        self.teardown(&reason).await;

        SessionExit { reason, active_for }
    }

    async fn drive(&mut self) -> CloseReason {
        if let Err(e) = self.transport.connect().await {
            return CloseReason::Transport(e.to_string());
        }
        self.set_state(SessionState::AuthPending);

        if let Err(reason) = self.handshake().await {
            return reason;
        }
        self.set_state(SessionState::Authenticated);

        if self.config.negotiate_coalescing {
            // Fire-and-observe: the result resolves through the table and
            // a hub that predates the feature just rejects the command.
            let (id, _handle) = self.correlation.allocate("supported_features");
            let frame = ClientFrame::SupportedFeatures {
                id,
                features: FeatureFlags {
                    coalesce_messages: true,
                },
            };
            if let Err(e) = self.transport.send(&frame).await {
                return CloseReason::Transport(e.to_string());
            }
        }

        let (id, _handle) = self.correlation.allocate("subscribe_events");
        self.subscribe_id = Some(id);
        let frame = ClientFrame::SubscribeEvents {
            id,
            event_type: self.event_filter.clone(),
        };
        if let Err(e) = self.transport.send(&frame).await {
            return CloseReason::Transport(e.to_string());
        }
        self.set_state(SessionState::Subscribing);

        self.event_loop().await
    }

    /// Await `auth_required`, present the credential, await the verdict.
    async fn handshake(&mut self) -> Result<(), CloseReason> {
        match self.expect_frame().await? {
            ServerFrame::AuthRequired { ha_version } => {
                debug!(?ha_version, "hub requested authentication");
            }
            frame => {
                return Err(CloseReason::Protocol(format!(
                    "expected auth_required, got {frame:?}"
                )));
            }
        }

        let auth = ClientFrame::Auth {
            access_token: self.access_token.clone(),
        };
        if let Err(e) = self.transport.send(&auth).await {
            return Err(CloseReason::Transport(e.to_string()));
        }

        match self.expect_frame().await? {
            ServerFrame::AuthOk { ha_version } => {
                info!(?ha_version, "authenticated with hub");
                Ok(())
            }
            ServerFrame::AuthInvalid { message } => {
                let error = IngestError::AuthenticationFailure(
                    message.unwrap_or_else(|| "invalid access token".to_string()),
                );
                Err(close_reason_for(&error))
            }
            frame => Err(CloseReason::Protocol(format!(
                "expected auth verdict, got {frame:?}"
            ))),
        }
    }

    /// Next handshake-phase frame, bounded by the auth timeout. Unknown
    /// frame types are skipped.
    async fn expect_frame(&mut self) -> Result<ServerFrame, CloseReason> {
        let deadline = self.config.auth_timeout;
        loop {
            if let Some(frame) = self.inbox.pop_front() {
                if matches!(frame, ServerFrame::Unknown) {
                    continue;
                }
                return Ok(frame);
            }

            match timeout(deadline, self.transport.next()).await {
                Ok(Some(Ok(frames))) => self.inbox.extend(frames),
                Ok(Some(Err(e))) => return Err(close_reason_for(&e)),
                Ok(None) => return Err(CloseReason::ServerClosed),
                Err(_) => {
                    return Err(CloseReason::Transport(
                        "handshake timed out".to_string(),
                    ));
                }
            }
        }
    }

    /// Ordered single-reader loop over inbound frames, interleaved with
    /// the serialized write path and the scheduled supervisors.
    async fn event_loop(&mut self) -> CloseReason {
        let mut heartbeat_timer = interval(self.config.heartbeat_interval);
        heartbeat_timer.set_missed_tick_behavior(MissedTickBehavior::Skip);
        let sweep_every = (self.config.command_deadline / 2).max(Duration::from_millis(100));
        let mut sweep_timer = interval(sweep_every);
        sweep_timer.set_missed_tick_behavior(MissedTickBehavior::Skip);

        // Frames from the handshake batch may already be queued.
        while let Some(frame) = self.inbox.pop_front() {
            if let Err(reason) = self.handle_frame(frame).await {
                return reason;
            }
        }

        loop {
            tokio::select! {
                batch = self.transport.next() => match batch {
                    Some(Ok(frames)) => {
                        for frame in frames {
                            if let Err(reason) = self.handle_frame(frame).await {
                                return reason;
                            }
                        }
                    }
                    Some(Err(e)) => return close_reason_for(&e),
                    None => return CloseReason::ServerClosed,
                },

                request = self.requests_rx.recv() => match request {
                    Some(SessionRequest::Send(frame)) => {
                        if let Err(e) = self.transport.send(&frame).await {
                            return CloseReason::Transport(e.to_string());
                        }
                    }
                    Some(SessionRequest::Close(reason)) => return reason,
                    // Every handle dropped: nobody can issue commands or
                    // observe this session anymore.
                    None => return CloseReason::Disabled,
                },

                _ = heartbeat_timer.tick(), if self.state == SessionState::Active => {
                    let now = Instant::now();
                    match self.heartbeat.on_tick(now) {
                        HeartbeatAction::Probe => {
                            let (id, _handle) = self.correlation.allocate("ping");
                            self.heartbeat.note_probe(id, now);
                            if let Err(e) = self.transport.send(&ClientFrame::Ping { id }).await {
                                return CloseReason::Transport(e.to_string());
                            }
                        }
                        HeartbeatAction::Close => {
                            warn!("liveness probe unanswered past grace window");
                            return CloseReason::HeartbeatTimeout;
                        }
                        HeartbeatAction::Idle => {}
                    }
                },

                _ = sweep_timer.tick() => {
                    let timed_out = self.correlation.sweep();
                    if timed_out > 0 {
                        debug!(timed_out, "swept expired commands");
                    }
                },
            }
        }
    }

    async fn handle_frame(&mut self, frame: ServerFrame) -> Result<(), CloseReason> {
        match frame {
            ServerFrame::Event { id: _, event } => {
                match normalizer::normalize(&self.connection_id, event, Utc::now()) {
                    Ok(change) => {
                        self.health.record_event(&self.connection_id);
                        self.dispatcher.dispatch(&change);
                    }
                    Err(e) => {
                        // Only the frame is discarded; the session is fine.
                        self.health.record_malformed(&self.connection_id);
                        debug!(error = %e, "dropping malformed event frame");
                    }
                }
                Ok(())
            }

            ServerFrame::CommandResult {
                id,
                success,
                result,
                error,
            } => {
                let outcome = if success {
                    Ok(result)
                } else {
                    let reason = error
                        .map(|e| e.describe())
                        .unwrap_or_else(|| "unspecified".to_string());
                    Err(IngestError::CommandRejected { id, reason })
                };
                let rejected = outcome.is_err();

                if let Some(rtt) = self.correlation.resolve(id, outcome) {
                    self.health.record_rtt(&self.connection_id, rtt);
                } else {
                    debug!(id, "result for unknown or already-resolved command");
                }

                if self.subscribe_id == Some(id) {
                    if rejected {
                        return Err(CloseReason::Protocol(
                            "hub rejected the event subscription".to_string(),
                        ));
                    }
                    self.subscription_id = Some(id);
                    self.activated_at = Some(Instant::now());
                    self.set_state(SessionState::Active);
                    info!("subscription established, session active");
                }
                Ok(())
            }

            ServerFrame::Pong { id } => {
                if let Some(rtt) = self.correlation.resolve(id, Ok(None)) {
                    self.health.record_rtt(&self.connection_id, rtt);
                }
                self.heartbeat.on_reply(id);
                Ok(())
            }

            ServerFrame::Ping { id } => self
                .transport
                .send(&ClientFrame::Pong { id })
                .await
                .map_err(|e| CloseReason::Transport(e.to_string())),

            ServerFrame::Unknown => {
                debug!("ignoring unrecognized frame type");
                Ok(())
            }

            frame @ (ServerFrame::AuthRequired { .. }
            | ServerFrame::AuthOk { .. }
            | ServerFrame::AuthInvalid { .. }) => Err(CloseReason::Protocol(format!(
                "unexpected handshake frame after authentication: {frame:?}"
            ))),
        }
    }

    async fn teardown(&mut self, reason: &CloseReason) {
        self.set_state(SessionState::Closing);

        // Refuse new requests before failing pending commands. A caller
        // racing closure either fails at the channel and resolves its own
        // entry, or had its request queued and gets resolved in this drain;
        // its handle is never left unresolved.
        self.requests_rx.close();
        while let Ok(request) = self.requests_rx.try_recv() {
            if let SessionRequest::Send(frame) = request {
                if let Some(id) = frame.command_id() {
                    self.correlation
                        .resolve(id, Err(IngestError::ConnectionClosed));
                }
            }
        }

        // Graceful disable: best-effort unsubscribe before the socket goes.
        if *reason == CloseReason::Disabled {
            if let (true, Some(subscription)) =
                (self.transport.is_connected(), self.subscription_id)
            {
                let (id, _handle) = self.correlation.allocate("unsubscribe_events");
                let frame = ClientFrame::UnsubscribeEvents { id, subscription };
                let _ = timeout(self.config.close_timeout, self.transport.send(&frame)).await;
            }
        }

        let _ = timeout(self.config.close_timeout, self.transport.close()).await;

        let failed = self.correlation.fail_all();
        if failed > 0 {
            debug!(failed, "failed pending commands on teardown");
        }

        match reason {
            CloseReason::AuthFailed(_) => {
                self.health.record_error(&self.connection_id, true);
                self.set_state(SessionState::Failed);
            }
            CloseReason::Transport(_) | CloseReason::Protocol(_) | CloseReason::HeartbeatTimeout => {
                self.health.record_error(&self.connection_id, false);
                self.set_state(SessionState::Closed);
            }
            CloseReason::Disabled | CloseReason::ServerClosed => {
                self.set_state(SessionState::Closed);
            }
        }
    }

    /// Single choke point for state transitions: validates the lifecycle
    /// graph, publishes to watchers and reports to the health aggregator.
    fn set_state(&mut self, next: SessionState) {
        if self.state == next {
            return;
        }
        if !self.state.can_transition_to(next) {
            warn!(from = %self.state, to = %next, "refusing illegal state transition");
            return;
        }
        debug!(from = %self.state, to = %next, "session state transition");
        self.state = next;
        let _ = self.state_tx.send(next);
        self.health.record_transition(&self.connection_id, next);
    }

    fn report_transition(&mut self, state: SessionState) {
        self.state = state;
        let _ = self.state_tx.send(state);
        self.health.record_transition(&self.connection_id, state);
    }
}

fn close_reason_for(error: &IngestError) -> CloseReason {
    match error {
        IngestError::AuthenticationFailure(msg) => CloseReason::AuthFailed(msg.clone()),
        IngestError::ProtocolViolation(msg) => CloseReason::Protocol(msg.clone()),
        other => CloseReason::Transport(other.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn errors_map_to_close_reasons() {
        assert!(matches!(
            close_reason_for(&IngestError::AuthenticationFailure("bad token".to_string())),
            CloseReason::AuthFailed(_)
        ));
        assert!(matches!(
            close_reason_for(&IngestError::ProtocolViolation("junk frame".to_string())),
            CloseReason::Protocol(_)
        ));
        assert!(matches!(
            close_reason_for(&IngestError::ConnectionClosed),
            CloseReason::Transport(_)
        ));
    }
}
