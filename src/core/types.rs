use http::HeaderMap;
use thiserror::Error;

/// Convenience result alias for websocket operations.
pub type WsResult<T> = Result<T, WsError>;

/// Boxed error returned by consumer event handlers.
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Canonical error surface shared across the crate.
///
/// Errors are funneled through event callbacks or stream termination, never
/// thrown synchronously from `send`/`close`.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum WsError {
    #[error("connection failed: {0}")]
    ConnectionFailed(String),

    #[error("transport error ({context}): {error}")]
    Transport {
        context: &'static str,
        error: String,
    },

    /// `send` was invoked while the underlying socket was not open.
    #[error("socket is not in the open state")]
    NotOpen,

    /// The connection closed uncleanly or with a non-normal status code.
    #[error("socket closed with status code: {code} ({reason})")]
    UncleanClose { code: u16, reason: String },

    /// A consumer event handler failed while processing received data.
    #[error("event handler failed: {0}")]
    Handler(String),
}

/// Client socket configuration.
///
/// Handshake headers and the optional TLS connector are passed through
/// verbatim to the transport.
#[derive(Clone, Debug, Default)]
pub struct WsOptions {
    /// Extra request headers sent with the websocket handshake.
    pub headers: HeaderMap,
    /// Custom TLS connector; `None` uses the transport default.
    pub connector: Option<crate::transport::tungstenite::WsConnector>,
    pub buffers: WsBufferConfig,
}

/// Buffer sizing parameters handed to the transport.
#[derive(Clone, Copy, Debug)]
pub struct WsBufferConfig {
    pub max_message_bytes: usize,
    pub max_frame_bytes: usize,
    pub write_buffer_bytes: usize,
    pub max_write_buffer_bytes: usize,
}

impl Default for WsBufferConfig {
    fn default() -> Self {
        Self {
            max_message_bytes: 16 * 1024 * 1024,
            max_frame_bytes: 16 * 1024 * 1024,
            write_buffer_bytes: 128 << 10,
            max_write_buffer_bytes: 256 << 10,
        }
    }
}

/// Listener configuration.
#[derive(Clone, Debug)]
pub struct WsServerOptions {
    pub host: String,
    /// Port to bind; 0 picks an ephemeral port, reported by the listening
    /// event.
    pub port: u16,
}

impl WsServerOptions {
    pub fn port(port: u16) -> Self {
        Self {
            port,
            ..Self::default()
        }
    }
}

impl Default for WsServerOptions {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 0,
        }
    }
}

/// Request metadata captured during the server-side handshake. Immutable for
/// the lifetime of the accepted connection.
#[derive(Clone, Debug, Default)]
pub struct WsRequest {
    pub uri: String,
    pub headers: HeaderMap,
}
