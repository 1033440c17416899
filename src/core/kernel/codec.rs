use crate::core::errors::IngestError;
use tokio_tungstenite::tungstenite::Message;

/// Codec trait for protocol-specific WebSocket frame encoding/decoding
///
/// Converts between raw WebSocket messages and typed protocol frames. The
/// transport handles control messages (ping, pong, close); the codec only
/// ever sees data frames.
pub trait WsCodec: Send + Sync + 'static {
    /// Typed frames received from the hub.
    type Inbound: Send;

    /// Typed frames sent to the hub.
    type Outbound: Send + Sync;

    /// Encode an outbound frame into a WebSocket message.
    fn encode(&self, frame: &Self::Outbound) -> Result<Message, IngestError>;

    /// Decode a raw WebSocket message into typed frames.
    ///
    /// Returns a vector because a hub negotiating message coalescing may
    /// batch several frames into one message. An empty vector means the
    /// codec chose to ignore the message.
    fn decode(&self, message: Message) -> Result<Vec<Self::Inbound>, IngestError>;
}
