use bytes::Bytes;

/// Transport-neutral websocket frame.
///
/// Transports convert their native message representation into/from `WsFrame`;
/// everything above the transport boundary speaks this type. Ping/pong frames
/// never surface as events, and close frames are consumed by the drivers.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum WsFrame {
    Text(Bytes),
    Binary(Bytes),
    Ping(Bytes),
    Pong(Bytes),
    Close(Option<WsCloseFrame>),
}

/// Status code and reason carried by a close frame.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct WsCloseFrame {
    pub code: u16,
    pub reason: Bytes,
}

impl WsCloseFrame {
    pub fn new(code: u16, reason: impl Into<Bytes>) -> Self {
        Self {
            code,
            reason: reason.into(),
        }
    }

    /// The close reason as text, empty when it is not valid UTF-8.
    pub fn reason_str(&self) -> &str {
        std::str::from_utf8(self.reason.as_ref()).unwrap_or("")
    }
}

/// Normal-closure status code (RFC 6455).
pub const CLOSE_NORMAL: u16 = 1000;

/// Abnormal-closure status code, synthesized when the peer vanishes without a
/// close frame.
pub const CLOSE_ABNORMAL: u16 = 1006;
