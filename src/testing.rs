//! In-memory transports for exercising sockets and servers without a network.
//!
//! [`MockTransport::channel_pair`] yields the transport for a client socket
//! plus a [`MockPeer`] handle acting as the remote end: tests complete or
//! refuse the handshake, push inbound frames, observe outbound frames, and
//! drop the socket. [`MockListener::channel_pair`] does the same for
//! listeners, with a [`MockNetwork`] handle that delivers connections.

use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Duration;

use bytes::Bytes;
use futures_util::{Sink, Stream};
use tokio::sync::{mpsc, oneshot, Mutex};

use crate::core::{WsCloseFrame, WsError, WsFrame, WsOptions, WsRequest, WsResult, WsServerOptions};
use crate::transport::{WsBindFuture, WsConnectFuture, WsListenerTransport, WsTransport};

/// Reader half backed by an in-memory channel.
pub struct MockReader {
    rx: mpsc::UnboundedReceiver<WsFrame>,
}

impl Stream for MockReader {
    type Item = WsResult<WsFrame>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        match self.get_mut().rx.poll_recv(cx) {
            Poll::Ready(Some(frame)) => Poll::Ready(Some(Ok(frame))),
            Poll::Ready(None) => Poll::Ready(None),
            Poll::Pending => Poll::Pending,
        }
    }
}

/// Writer half backed by an in-memory channel.
pub struct MockWriter {
    tx: mpsc::UnboundedSender<WsFrame>,
}

impl Sink<WsFrame> for MockWriter {
    type Error = WsError;

    fn poll_ready(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        Poll::Ready(Ok(()))
    }

    fn start_send(self: Pin<&mut Self>, item: WsFrame) -> Result<(), Self::Error> {
        self.get_mut().tx.send(item).map_err(|_| WsError::Transport {
            context: "mock_write",
            error: "mock outbound channel closed".to_string(),
        })
    }

    fn poll_flush(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        Poll::Ready(Ok(()))
    }

    fn poll_close(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        Poll::Ready(Ok(()))
    }
}

struct PendingConnect {
    open_rx: oneshot::Receiver<()>,
    reader: MockReader,
    writer: MockWriter,
}

/// Client transport backed by channels; supports a single connection.
#[derive(Clone)]
pub struct MockTransport {
    state: Arc<Mutex<Option<PendingConnect>>>,
}

impl MockTransport {
    /// Build a transport + remote-peer control pair. The connect future stays
    /// pending until [`MockPeer::open`] (or fails on [`MockPeer::refuse`]),
    /// so pre-open behavior is observable.
    pub fn channel_pair() -> (Self, MockPeer) {
        let (open_tx, open_rx) = oneshot::channel();
        let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
        let (inbound_tx, inbound_rx) = mpsc::unbounded_channel();
        (
            Self {
                state: Arc::new(Mutex::new(Some(PendingConnect {
                    open_rx,
                    reader: MockReader { rx: inbound_rx },
                    writer: MockWriter { tx: outbound_tx },
                }))),
            },
            MockPeer {
                open_tx: Some(open_tx),
                outbound_rx,
                inbound_tx: Some(inbound_tx),
            },
        )
    }
}

impl WsTransport for MockTransport {
    type Reader = MockReader;
    type Writer = MockWriter;

    fn connect(&self, _url: String, _options: &WsOptions) -> WsConnectFuture<MockReader, MockWriter> {
        let state = Arc::clone(&self.state);
        Box::pin(async move {
            let pending = state.lock().await.take().ok_or_else(|| {
                WsError::ConnectionFailed(
                    "mock transport only supports a single connection".to_string(),
                )
            })?;
            match pending.open_rx.await {
                Ok(()) => Ok((pending.reader, pending.writer)),
                Err(_) => Err(WsError::ConnectionFailed(
                    "mock peer refused the connection".to_string(),
                )),
            }
        })
    }
}

/// Remote end of a mocked connection.
pub struct MockPeer {
    open_tx: Option<oneshot::Sender<()>>,
    outbound_rx: mpsc::UnboundedReceiver<WsFrame>,
    inbound_tx: Option<mpsc::UnboundedSender<WsFrame>>,
}

impl MockPeer {
    /// Complete the handshake, letting the pending connect resolve.
    pub fn open(&mut self) {
        if let Some(tx) = self.open_tx.take() {
            let _ = tx.send(());
        }
    }

    /// Fail the handshake; the pending connect resolves with an error.
    pub fn refuse(&mut self) {
        self.open_tx = None;
    }

    /// Push an inbound frame toward the socket under test.
    pub fn send_frame(&self, frame: WsFrame) {
        if let Some(tx) = &self.inbound_tx {
            let _ = tx.send(frame);
        }
    }

    pub fn send_text(&self, text: impl Into<String>) {
        self.send_frame(WsFrame::Text(Bytes::from(text.into())));
    }

    pub fn send_binary(&self, bytes: impl Into<Bytes>) {
        self.send_frame(WsFrame::Binary(bytes.into()));
    }

    /// Close with a status code and reason, then drop the socket.
    pub fn close(&mut self, code: u16, reason: &str) {
        self.send_frame(WsFrame::Close(Some(WsCloseFrame::new(
            code,
            Bytes::copy_from_slice(reason.as_bytes()),
        ))));
        self.inbound_tx = None;
    }

    /// Drop the socket without a close frame (abnormal closure).
    pub fn drop_socket(&mut self) {
        self.inbound_tx = None;
    }

    /// Receive the next frame written by the socket under test.
    pub async fn recv_outbound(&mut self) -> Option<WsFrame> {
        self.outbound_rx.recv().await
    }

    /// Receive a frame with a timeout; `None` when nothing arrives in time.
    pub async fn recv_outbound_timeout(&mut self, timeout: Duration) -> Option<WsFrame> {
        tokio::time::timeout(timeout, self.outbound_rx.recv())
            .await
            .unwrap_or_default()
    }
}

type MockConnection = WsResult<(MockReader, MockWriter, WsRequest)>;

struct PendingBind {
    listen_rx: oneshot::Receiver<u16>,
    incoming: MockIncoming,
}

/// Listener transport backed by channels; supports a single bind.
#[derive(Clone)]
pub struct MockListener {
    state: Arc<Mutex<Option<PendingBind>>>,
}

impl MockListener {
    /// Build a listener transport + network control pair. The bind future
    /// stays pending until [`MockNetwork::listen`] (or fails on
    /// [`MockNetwork::refuse`]).
    pub fn channel_pair() -> (Self, MockNetwork) {
        let (listen_tx, listen_rx) = oneshot::channel();
        let (conn_tx, conn_rx) = mpsc::unbounded_channel();
        (
            Self {
                state: Arc::new(Mutex::new(Some(PendingBind {
                    listen_rx,
                    incoming: MockIncoming { rx: conn_rx },
                }))),
            },
            MockNetwork {
                listen_tx: Some(listen_tx),
                conn_tx: Some(conn_tx),
            },
        )
    }
}

pub struct MockIncoming {
    rx: mpsc::UnboundedReceiver<MockConnection>,
}

impl Stream for MockIncoming {
    type Item = MockConnection;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.get_mut().rx.poll_recv(cx)
    }
}

impl WsListenerTransport for MockListener {
    type Reader = MockReader;
    type Writer = MockWriter;
    type Incoming = MockIncoming;

    fn bind(&self, _options: &WsServerOptions) -> WsBindFuture<MockIncoming> {
        let state = Arc::clone(&self.state);
        Box::pin(async move {
            let pending = state.lock().await.take().ok_or_else(|| {
                WsError::ConnectionFailed("mock listener only supports a single bind".to_string())
            })?;
            match pending.listen_rx.await {
                Ok(port) => Ok((pending.incoming, port)),
                Err(_) => Err(WsError::ConnectionFailed(
                    "mock network refused the bind".to_string(),
                )),
            }
        })
    }
}

/// Control handle delivering connections to a mocked listener.
pub struct MockNetwork {
    listen_tx: Option<oneshot::Sender<u16>>,
    conn_tx: Option<mpsc::UnboundedSender<MockConnection>>,
}

impl MockNetwork {
    /// Complete the bind, reporting `port` as the bound port.
    pub fn listen(&mut self, port: u16) {
        if let Some(tx) = self.listen_tx.take() {
            let _ = tx.send(port);
        }
    }

    /// Fail the bind; the pending bind resolves with an error.
    pub fn refuse(&mut self) {
        self.listen_tx = None;
    }

    /// Deliver a handshaken connection, returning the remote peer control.
    pub fn connect(&self, request: WsRequest) -> MockPeer {
        let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
        let (inbound_tx, inbound_rx) = mpsc::unbounded_channel();
        if let Some(tx) = &self.conn_tx {
            let _ = tx.send(Ok((
                MockReader { rx: inbound_rx },
                MockWriter { tx: outbound_tx },
                request,
            )));
        }
        MockPeer {
            open_tx: None,
            outbound_rx,
            inbound_tx: Some(inbound_tx),
        }
    }

    /// Deliver a per-connection handshake failure.
    pub fn fail_handshake(&self, error: WsError) {
        if let Some(tx) = &self.conn_tx {
            let _ = tx.send(Err(error));
        }
    }

    /// Drop the listening socket out from underneath the server.
    pub fn drop_listener(&mut self) {
        self.conn_tx = None;
    }
}
