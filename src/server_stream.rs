//! Pull-based adaptation of a listener: a stream of per-connection payload
//! streams, with broadcasts issued before `Listening` buffered and flushed
//! once at the readiness boundary.

use std::pin::Pin;
use std::task::{Context, Poll};

use futures_util::Stream;
use http::HeaderMap;
use tokio::sync::mpsc;

use crate::core::{WsData, WsError, WsRequest, WsServerOptions};
use crate::server::{WsIncomingClient, WsServer, WsServerEvent};
use crate::stream::WsStream;
use crate::transport::WsListenerTransport;

/// A listener consumed as a stream of accepted-connection streams.
///
/// Yields one [`WsRequestStream`] per accepted connection. An `Error` event
/// with a cause ends the stream with `Err`; the listener closing ends it
/// normally. Dropping the stream closes the listener only; already-yielded
/// client streams keep running and tear down independently.
pub struct WsServerStream {
    server: WsServer,
    events: mpsc::UnboundedReceiver<WsServerEvent>,
    pending: Vec<WsData>,
    ready: bool,
    done: bool,
}

impl WsServerStream {
    /// Bind a listener and consume it as a stream.
    ///
    /// Must be called from within a tokio runtime.
    pub fn create(options: WsServerOptions) -> WsServerStream {
        Self::create_with(
            crate::transport::tungstenite::TungsteniteListener,
            options,
        )
    }

    /// Same as [`WsServerStream::create`] with an explicit transport (test
    /// seam).
    pub fn create_with<L: WsListenerTransport>(
        listener: L,
        options: WsServerOptions,
    ) -> WsServerStream {
        let (events_tx, events) = mpsc::unbounded_channel();
        let server = WsServer::create_with(
            listener,
            move |event| {
                let _ = events_tx.send(event);
                Ok(())
            },
            options,
        );
        WsServerStream {
            server,
            events,
            pending: Vec::new(),
            ready: false,
            done: false,
        }
    }

    /// The bound port; `None` until the `Listening` event has fired.
    pub fn port(&self) -> Option<u16> {
        self.server.port()
    }

    /// Broadcast a payload to every connected client. Until the listener
    /// reports `Listening` the payload is buffered; the buffer is flushed
    /// exactly once at that transition (to the possibly-empty client set) and
    /// never re-sent.
    pub fn send(&mut self, data: impl Into<WsData>) {
        if self.ready {
            self.server.send(data);
        } else {
            self.pending.push(data.into());
        }
    }

    fn finish(&mut self) {
        self.done = true;
        self.server.close();
    }
}

impl Stream for WsServerStream {
    type Item = Result<WsRequestStream, WsError>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();
        if this.done {
            return Poll::Ready(None);
        }
        loop {
            match this.events.poll_recv(cx) {
                Poll::Ready(Some(WsServerEvent::Listening { .. })) => {
                    for data in this.pending.drain(..) {
                        this.server.send(data);
                    }
                    this.ready = true;
                }
                Poll::Ready(Some(WsServerEvent::Connected(incoming))) => {
                    return Poll::Ready(Some(Ok(WsRequestStream::accept(incoming))));
                }
                Poll::Ready(Some(WsServerEvent::Error { error })) => {
                    this.finish();
                    return Poll::Ready(Some(Err(error)));
                }
                Poll::Ready(Some(WsServerEvent::Closed { .. })) => {
                    this.finish();
                    return Poll::Ready(None);
                }
                Poll::Ready(None) => {
                    this.finish();
                    return Poll::Ready(None);
                }
                Poll::Pending => return Poll::Pending,
            }
        }
    }
}

impl Drop for WsServerStream {
    fn drop(&mut self) {
        self.server.close();
    }
}

/// An accepted connection consumed as a stream of payloads, carrying the
/// request metadata captured during the handshake.
///
/// The underlying socket is already open, so sends forward immediately; there
/// is no buffering window.
pub struct WsRequestStream {
    request: WsRequest,
    inner: WsStream,
}

impl WsRequestStream {
    fn accept(incoming: WsIncomingClient) -> WsRequestStream {
        let request = incoming.request().clone();
        let (events_tx, events) = mpsc::unbounded_channel();
        let socket = incoming.accept(move |event| {
            let _ = events_tx.send(event);
            Ok(())
        });
        WsRequestStream {
            request,
            // Accepted sockets never emit `Opened`; start ready.
            inner: WsStream::from_socket(socket, events, true),
        }
    }

    pub fn request(&self) -> &WsRequest {
        &self.request
    }

    pub fn uri(&self) -> &str {
        &self.request.uri
    }

    pub fn headers(&self) -> &HeaderMap {
        &self.request.headers
    }

    pub fn send(&mut self, data: impl Into<WsData>) {
        self.inner.send(data);
    }
}

impl std::fmt::Debug for WsRequestStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WsRequestStream")
            .field("request", &self.request)
            .finish_non_exhaustive()
    }
}

impl Stream for WsRequestStream {
    type Item = Result<WsData, WsError>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        Pin::new(&mut self.get_mut().inner).poll_next(cx)
    }
}
