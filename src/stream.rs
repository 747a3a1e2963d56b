//! Pull-based adaptation of a client socket: events are bridged through an
//! unbounded queue and projected into a stream of payloads, with sends issued
//! before readiness buffered and flushed in order on `Opened`.

use std::pin::Pin;
use std::task::{Context, Poll};

use futures_util::Stream;
use tokio::sync::mpsc;

use crate::core::{WsData, WsError, WsEvent, WsOptions};
use crate::socket::WsSocket;
use crate::transport::WsTransport;

/// A client connection consumed as a stream of payloads.
///
/// Yields `Ok(data)` per received payload; an `Error` event with a cause ends
/// the stream with `Err`, and a `Closed` event ends it normally even when the
/// close was unclean; terminal close information belongs to the event API.
/// Dropping the stream mid-iteration closes the underlying socket; teardown
/// runs exactly once no matter how iteration ends.
pub struct WsStream {
    endpoint_url: String,
    socket: WsSocket,
    events: mpsc::UnboundedReceiver<WsEvent>,
    pending: Vec<WsData>,
    ready: bool,
    done: bool,
}

impl WsStream {
    /// Connect to `endpoint_url` and consume the connection as a stream.
    ///
    /// Must be called from within a tokio runtime.
    pub fn create(endpoint_url: impl Into<String>, options: WsOptions) -> WsStream {
        Self::create_with(
            crate::transport::tungstenite::TungsteniteTransport,
            endpoint_url,
            options,
        )
    }

    /// Same as [`WsStream::create`] with an explicit transport (test seam).
    pub fn create_with<T: WsTransport>(
        transport: T,
        endpoint_url: impl Into<String>,
        options: WsOptions,
    ) -> WsStream {
        let (events_tx, events) = mpsc::unbounded_channel();
        let socket = WsSocket::create_with(
            transport,
            endpoint_url,
            move |event| {
                // Every event is bridged; filtering happens on the pull side.
                let _ = events_tx.send(event);
                Ok(())
            },
            options,
        );
        Self::from_socket(socket, events, false)
    }

    pub(crate) fn from_socket(
        socket: WsSocket,
        events: mpsc::UnboundedReceiver<WsEvent>,
        ready: bool,
    ) -> WsStream {
        WsStream {
            endpoint_url: socket.endpoint_url().to_string(),
            socket,
            events,
            pending: Vec::new(),
            ready,
            done: false,
        }
    }

    pub fn endpoint_url(&self) -> &str {
        &self.endpoint_url
    }

    /// Send a payload. Until the connection reports `Opened` the payload is
    /// buffered (unbounded); buffered payloads are flushed in insertion order
    /// before anything sent after the flush.
    pub fn send(&mut self, data: impl Into<WsData>) {
        if self.ready {
            self.socket.send(data);
        } else {
            self.pending.push(data.into());
        }
    }

    fn finish(&mut self) {
        self.done = true;
        self.socket.close();
    }
}

impl Stream for WsStream {
    type Item = Result<WsData, WsError>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();
        if this.done {
            return Poll::Ready(None);
        }
        loop {
            match this.events.poll_recv(cx) {
                Poll::Ready(Some(WsEvent::Opened)) => {
                    // Flush within the same turn so no later send can
                    // interleave ahead of buffered payloads.
                    for data in this.pending.drain(..) {
                        this.socket.send(data);
                    }
                    this.ready = true;
                }
                Poll::Ready(Some(WsEvent::DataReceived { data })) => {
                    return Poll::Ready(Some(Ok(data)));
                }
                Poll::Ready(Some(WsEvent::Error { error })) => {
                    this.finish();
                    return Poll::Ready(Some(Err(error)));
                }
                Poll::Ready(Some(WsEvent::Closed { .. })) => {
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

impl Drop for WsStream {
    fn drop(&mut self) {
        // Consumer-initiated early termination takes the same teardown path
        // as natural termination; `close` is idempotent.
        self.socket.close();
    }
}
