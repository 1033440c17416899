use std::time::{Duration, Instant};

/// What the session loop should do on a heartbeat tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HeartbeatAction {
    /// Nothing due; a probe is still inside its grace window.
    Idle,
    /// Send a liveness probe.
    Probe,
    /// The outstanding probe outlived the grace window: the connection is
    /// dead regardless of what the transport thinks.
    Close,
}

/// Liveness supervisor driven by the session loop's timer.
///
/// Pure decision logic: it requests probes and closure but never touches
/// the transport itself.
#[derive(Debug)]
pub struct HeartbeatSupervisor {
    grace: Duration,
    outstanding: Option<(u64, Instant)>,
}

impl HeartbeatSupervisor {
    #[must_use]
    pub fn new(grace: Duration) -> Self {
        Self {
            grace,
            outstanding: None,
        }
    }

    /// Decide what is due at `now`. Ticks arrive once per probe interval.
    pub fn on_tick(&mut self, now: Instant) -> HeartbeatAction {
        match self.outstanding {
            Some((_, sent_at)) if now.duration_since(sent_at) >= self.grace => HeartbeatAction::Close,
            Some(_) => HeartbeatAction::Idle,
            None => HeartbeatAction::Probe,
        }
    }

    /// Record that a probe with the given correlation id went out.
    pub fn note_probe(&mut self, id: u64, now: Instant) {
        self.outstanding = Some((id, now));
    }

    /// Record a probe reply. Returns whether it matched the outstanding
    /// probe; stale replies are ignored.
    pub fn on_reply(&mut self, id: u64) -> bool {
        match self.outstanding {
            Some((expected, _)) if expected == id => {
                self.outstanding = None;
                true
            }
            _ => false,
        }
    }

    #[must_use]
    pub fn has_outstanding(&self) -> bool {
        self.outstanding.is_some()
    }
}
