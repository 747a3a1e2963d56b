//! Websocket connections normalized into ordered event feeds and pull-based
//! payload streams.
//!
//! Four entry points:
//! - [`WsSocket::create`]: client connection as a single-callback event feed.
//! - [`WsStream::create`]: client connection as a `Stream` of payloads, with
//!   sends issued before the connection opens buffered and flushed in order.
//! - [`WsServer::create`]: listener as an event feed yielding acceptable
//!   connections.
//! - [`WsServerStream::create`]: listener as a `Stream` of per-connection
//!   payload streams carrying request metadata.
//!
//! Every connection emits at most one `Opened`/`Listening`, exactly one
//! terminal `Closed` with nothing after it, and reports pre-open failures as
//! errors rather than closes. `send`/`close` never block and never fail.

pub mod core;
pub mod server;
pub mod server_stream;
pub mod socket;
pub mod stream;
pub mod testing;
pub mod tls;
pub mod transport;

pub use crate::core::{
    BoxError, WsBufferConfig, WsCloseFrame, WsData, WsError, WsEvent, WsFrame, WsOptions,
    WsRequest, WsResult, WsServerOptions, CLOSE_ABNORMAL, CLOSE_NORMAL,
};
pub use crate::server::{WsIncomingClient, WsServer, WsServerEvent, WsServerEventHandler};
pub use crate::server_stream::{WsRequestStream, WsServerStream};
pub use crate::socket::{WsEventHandler, WsSocket};
pub use crate::stream::WsStream;
pub use crate::transport::tungstenite::WsConnector;
