use crate::core::errors::IngestError;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::{Duration, Instant};
use tokio::sync::oneshot;
use tracing::debug;

/// Result delivered to a command's issuer: the optional `result` payload on
/// success, or the failure that ended the command.
pub type CommandOutcome = Result<Option<Value>, IngestError>;

/// Awaitable handle for one outstanding command.
pub struct CommandHandle {
    id: u64,
    rx: oneshot::Receiver<CommandOutcome>,
}

impl CommandHandle {
    #[must_use]
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Wait for the command's resolution.
    ///
    /// A dropped sender means the session tore down without running its
    /// teardown sweep, which still reads as a closed connection.
    pub async fn wait(self) -> CommandOutcome {
        self.rx.await.unwrap_or(Err(IngestError::ConnectionClosed))
    }
}

struct PendingEntry {
    tx: oneshot::Sender<CommandOutcome>,
    issued_at: Instant,
    command_type: String,
}

/// Maps outstanding command ids to their pending response handles.
///
/// Ids are allocated from a per-session monotonic counter and never repeat
/// within the session's lifetime. Removal and resolution are one step:
/// taking the entry out of the map under the lock is what makes an entry
/// impossible to resolve twice.
pub struct CorrelationTable {
    entries: Mutex<HashMap<u64, PendingEntry>>,
    next_id: AtomicU64,
    deadline: Duration,
}

impl CorrelationTable {
    #[must_use]
    pub fn new(deadline: Duration) -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            next_id: AtomicU64::new(1),
            deadline,
        }
    }

    /// Allocate a fresh command id and register a pending entry for it.
    pub fn allocate(&self, command_type: &str) -> (u64, CommandHandle) {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let (tx, rx) = oneshot::channel();

        let entry = PendingEntry {
            tx,
            issued_at: Instant::now(),
            command_type: command_type.to_string(),
        };
        self.entries
            .lock()
            .expect("correlation table lock poisoned")
            .insert(id, entry);

        (id, CommandHandle { id, rx })
    }

    /// Complete and remove the entry for `id`.
    ///
    /// Returns the entry's age (a round-trip-time sample) when the id was
    /// outstanding, `None` when it was unknown or already resolved.
    pub fn resolve(&self, id: u64, outcome: CommandOutcome) -> Option<Duration> {
        let entry = self
            .entries
            .lock()
            .expect("correlation table lock poisoned")
            .remove(&id)?;

        let rtt = entry.issued_at.elapsed();
        // Issuer may have dropped its handle; resolution still counts.
        let _ = entry.tx.send(outcome);
        Some(rtt)
    }

    /// Resolve-as-failed every entry older than the configured deadline.
    pub fn sweep(&self) -> usize {
        let expired: Vec<(u64, PendingEntry)> = {
            let mut entries = self
                .entries
                .lock()
                .expect("correlation table lock poisoned");
            let ids: Vec<u64> = entries
                .iter()
                .filter(|(_, entry)| entry.issued_at.elapsed() >= self.deadline)
                .map(|(id, _)| *id)
                .collect();
            ids.into_iter()
                .filter_map(|id| entries.remove(&id).map(|entry| (id, entry)))
                .collect()
        };

        let count = expired.len();
        for (id, entry) in expired {
            debug!(
                id,
                command_type = %entry.command_type,
                "command timed out without a response"
            );
            let _ = entry.tx.send(Err(IngestError::CommandTimeout {
                id,
                deadline: self.deadline,
            }));
        }
        count
    }

    /// Session teardown: resolve every still-pending entry as failed.
    pub fn fail_all(&self) -> usize {
        let drained: Vec<PendingEntry> = {
            let mut entries = self
                .entries
                .lock()
                .expect("correlation table lock poisoned");
            entries.drain().map(|(_, entry)| entry).collect()
        };

        let count = drained.len();
        for entry in drained {
            let _ = entry.tx.send(Err(IngestError::ConnectionClosed));
        }
        count
    }

    #[must_use]
    pub fn pending(&self) -> usize {
        self.entries
            .lock()
            .expect("correlation table lock poisoned")
            .len()
    }
}
