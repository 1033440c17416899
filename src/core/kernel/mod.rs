/// Transport kernel - protocol-agnostic WebSocket plumbing
///
/// The kernel contains only transport logic and generic interfaces; the
/// hub protocol state machine lives in [`crate::hub`] on top of it.
///
/// - `WsTransport`: connection management over tokio-tungstenite
/// - `WsCodec`: protocol-specific frame encoding/decoding
pub mod codec;
pub mod ws;

// Re-export key types for convenience
pub use codec::WsCodec;
pub use ws::{TungsteniteWs, WsTransport};
