use std::future::Future;
use std::pin::Pin;

use futures_util::{Sink, Stream};

use crate::core::{WsError, WsFrame, WsOptions, WsRequest, WsResult, WsServerOptions};

pub mod tungstenite;

/// Future resolving to the reader/writer pair of an established connection.
pub type WsConnectFuture<R, W> = Pin<Box<dyn Future<Output = WsResult<(R, W)>> + Send>>;

/// Future resolving to the incoming-connection stream and the bound port.
pub type WsBindFuture<I> = Pin<Box<dyn Future<Output = WsResult<(I, u16)>> + Send>>;

/// Type-erased reader handed to accepted-connection wrappers.
pub type DynFrameReader = Box<dyn Stream<Item = WsResult<WsFrame>> + Send + Unpin>;

/// Client transport boundary.
///
/// Intentionally minimal so implementations can be swapped (tokio-tungstenite
/// in production, in-memory channels in tests) while the normalization and
/// stream logic stays unchanged. `connect` resolves once the handshake
/// completes; the reader ending without a close frame means the peer vanished.
pub trait WsTransport: Clone + Send + Sync + 'static {
    type Reader: Stream<Item = WsResult<WsFrame>> + Send + Unpin + 'static;
    type Writer: Sink<WsFrame, Error = WsError> + Send + Unpin + 'static;

    fn connect(&self, url: String, options: &WsOptions)
        -> WsConnectFuture<Self::Reader, Self::Writer>;
}

/// Listener transport boundary.
///
/// `bind` resolves once the listener is accepting, reporting the actual bound
/// port. `Incoming` yields one fully-handshaken connection per element along
/// with the request metadata captured during the handshake; per-connection
/// handshake failures surface as `Err` elements and do not end the stream.
/// Dropping `Incoming` closes the listening socket.
pub trait WsListenerTransport: Clone + Send + Sync + 'static {
    type Reader: Stream<Item = WsResult<WsFrame>> + Send + Unpin + 'static;
    type Writer: Sink<WsFrame, Error = WsError> + Send + Unpin + 'static;
    type Incoming: Stream<Item = WsResult<(Self::Reader, Self::Writer, WsRequest)>>
        + Send
        + Unpin
        + 'static;

    fn bind(&self, options: &WsServerOptions) -> WsBindFuture<Self::Incoming>;
}
