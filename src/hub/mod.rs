//! Hub protocol implementation on top of the transport kernel: wire
//! frames, codec, correlation, heartbeat, reconnection, normalization,
//! the session state machine and its supervision.

pub mod codec;
pub mod correlation;
pub mod heartbeat;
pub mod normalizer;
pub mod reconnect;
pub mod session;
pub mod supervisor;
pub mod types;

pub use codec::HubCodec;
pub use correlation::{CommandHandle, CorrelationTable};
pub use session::{Session, SessionExit, SessionHandle};
pub use supervisor::{spawn_supervisor, IngestService, SupervisorHandle};
