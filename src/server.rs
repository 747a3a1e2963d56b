//! Server-side acceptor: one listening socket in, one ordered event callback
//! out, plus an already-open client wrapper per accepted connection.

use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex, OnceLock, PoisonError};

use futures_util::{Sink, SinkExt, Stream, StreamExt};
use http::HeaderMap;
use tokio::sync::mpsc;
use tracing::{debug, info};

use crate::core::{
    data_from_frame, BoxError, WsData, WsError, WsEvent, WsFrame, WsRequest, WsServerOptions,
};
use crate::socket::{closed_error, CloseCause, Command, WsEventHandler, WsSocket};
use crate::transport::tungstenite::TungsteniteListener;
use crate::transport::{DynFrameReader, WsBindFuture, WsListenerTransport};

/// Consumer callback invoked for every normalized listener event.
pub type WsServerEventHandler = Box<dyn FnMut(WsServerEvent) -> Result<(), BoxError> + Send>;

/// Normalized listener-side event.
///
/// `Listening` fires at most once and always before any `Connected`; `Closed`
/// is the sole terminal event. A listener that fails before ever listening
/// reports `Error`, not `Closed`.
#[derive(Debug)]
pub enum WsServerEvent {
    /// The listener is accepting connections on `port`.
    Listening { port: u16 },
    /// A connection completed its handshake and is ready to be accepted.
    Connected(WsIncomingClient),
    /// Non-terminal failure (bind failure, per-connection handshake failure).
    Error { error: WsError },
    /// Terminal. Listener closes are always clean.
    Closed { error: Option<WsError> },
}

/// A handshaken connection waiting to be claimed.
///
/// `accept` consumes the value, so a connection can be claimed at most once.
/// The underlying socket is already open: the wrapper built by `accept` starts
/// in the open state, never emits `Opened`, and reports every raw close as
/// `Closed`.
pub struct WsIncomingClient {
    request: WsRequest,
    reader: DynFrameReader,
    outbound: mpsc::UnboundedSender<WsFrame>,
    clients: ConnectedClients,
    id: u64,
}

impl WsIncomingClient {
    pub fn request(&self) -> &WsRequest {
        &self.request
    }

    pub fn uri(&self) -> &str {
        &self.request.uri
    }

    pub fn headers(&self) -> &HeaderMap {
        &self.request.headers
    }

    /// Claim the connection, delivering its normalized events to `on_event`.
    pub fn accept(
        self,
        on_event: impl FnMut(WsEvent) -> Result<(), BoxError> + Send + 'static,
    ) -> WsSocket {
        let (commands, cmd_rx) = mpsc::unbounded_channel();
        let socket = WsSocket::from_parts(self.request.uri.clone(), commands);
        tokio::spawn(run_accepted(
            self.reader,
            self.outbound,
            self.clients,
            self.id,
            Box::new(on_event),
            cmd_rx,
        ));
        socket
    }
}

impl fmt::Debug for WsIncomingClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WsIncomingClient")
            .field("uri", &self.request.uri)
            .field("id", &self.id)
            .finish()
    }
}

/// Shared set of live accepted-connection writers, keyed by connection id.
/// This is the broadcast target; entries are removed when the accepted
/// connection tears down.
#[derive(Clone, Default)]
pub(crate) struct ConnectedClients {
    inner: Arc<Mutex<HashMap<u64, mpsc::UnboundedSender<WsFrame>>>>,
}

impl ConnectedClients {
    fn insert(&self, id: u64, outbound: mpsc::UnboundedSender<WsFrame>) {
        self.lock().insert(id, outbound);
    }

    pub(crate) fn remove(&self, id: u64) {
        self.lock().remove(&id);
    }

    fn broadcast(&self, frame: WsFrame) {
        for outbound in self.lock().values() {
            let _ = outbound.send(frame.clone());
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<u64, mpsc::UnboundedSender<WsFrame>>> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Handle to a live listener.
///
/// `send` broadcasts to every currently connected client; like
/// [`WsSocket::send`] it never blocks, never fails, and does not buffer.
#[derive(Clone, Debug)]
pub struct WsServer {
    port: Arc<OnceLock<u16>>,
    commands: mpsc::UnboundedSender<Command>,
}

impl WsServer {
    /// Bind a listener and deliver normalized events to `on_event`.
    ///
    /// Must be called from within a tokio runtime.
    pub fn create(
        on_event: impl FnMut(WsServerEvent) -> Result<(), BoxError> + Send + 'static,
        options: WsServerOptions,
    ) -> WsServer {
        Self::create_with(TungsteniteListener, on_event, options)
    }

    /// Same as [`WsServer::create`] with an explicit transport (test seam).
    pub fn create_with<L: WsListenerTransport>(
        listener: L,
        on_event: impl FnMut(WsServerEvent) -> Result<(), BoxError> + Send + 'static,
        options: WsServerOptions,
    ) -> WsServer {
        let (commands, cmd_rx) = mpsc::unbounded_channel();
        let port = Arc::new(OnceLock::new());
        let bind = listener.bind(&options);
        tokio::spawn(run_server(
            bind,
            Arc::clone(&port),
            Box::new(on_event),
            cmd_rx,
        ));
        WsServer { port, commands }
    }

    /// The bound port; `None` until the `Listening` event has fired.
    pub fn port(&self) -> Option<u16> {
        self.port.get().copied()
    }

    /// Broadcast a payload to every connected client. Before the listener is
    /// ready this is a no-op that reports an `Error` event.
    pub fn send(&self, data: impl Into<WsData>) {
        let _ = self.commands.send(Command::Send(data.into()));
    }

    /// Close the listening socket. Accepted connections are not cascaded;
    /// each client wrapper tears down independently.
    pub fn close(&self) {
        let _ = self.commands.send(Command::Close);
    }
}

async fn run_server<I, R, W>(
    mut bind: WsBindFuture<I>,
    port_slot: Arc<OnceLock<u16>>,
    mut on_event: WsServerEventHandler,
    mut commands: mpsc::UnboundedReceiver<Command>,
) where
    I: Stream<Item = Result<(R, W, WsRequest), WsError>> + Send + Unpin + 'static,
    R: Stream<Item = Result<WsFrame, WsError>> + Send + Unpin + 'static,
    W: Sink<WsFrame, Error = WsError> + Send + Unpin + 'static,
{
    // Bind phase: broadcasts fail fast (no buffering at this layer) and a
    // deliberate close is reported as a clean shutdown.
    let (mut incoming, port) = loop {
        tokio::select! {
            result = &mut bind => match result {
                Ok(bound) => break bound,
                Err(error) => {
                    let _ = on_event(WsServerEvent::Error { error });
                    return;
                }
            },
            command = commands.recv() => match command {
                Some(Command::Send(_)) => {
                    let _ = on_event(WsServerEvent::Error { error: WsError::NotOpen });
                }
                Some(Command::Close) | None => {
                    info!(target: "ws-server", "closed before listening");
                    let _ = on_event(WsServerEvent::Closed { error: None });
                    return;
                }
            },
        }
    };

    let _ = port_slot.set(port);
    info!(target: "ws-server", port, "listening");
    let _ = on_event(WsServerEvent::Listening { port });

    let clients = ConnectedClients::default();
    let mut next_id: u64 = 0;
    loop {
        tokio::select! {
            conn = incoming.next() => match conn {
                Some(Ok((reader, writer, request))) => {
                    let (outbound, outbound_rx) = mpsc::unbounded_channel();
                    tokio::spawn(write_frames(writer, outbound_rx));
                    let id = next_id;
                    next_id += 1;
                    clients.insert(id, outbound.clone());
                    debug!(target: "ws-server", uri = %request.uri, id, "connection ready");
                    let _ = on_event(WsServerEvent::Connected(WsIncomingClient {
                        request,
                        reader: Box::new(reader),
                        outbound,
                        clients: clients.clone(),
                        id,
                    }));
                }
                Some(Err(error)) => {
                    let _ = on_event(WsServerEvent::Error { error });
                }
                // The listening socket went away underneath us.
                None => break,
            },
            command = commands.recv() => match command {
                Some(Command::Send(data)) => {
                    debug!(target: "ws-server", "broadcasting data");
                    clients.broadcast(data.into_frame());
                }
                Some(Command::Close) | None => break,
            },
        }
    }

    // Teardown: dropping the incoming stream closes the listening socket.
    // Listener closes are always clean once listening was reached.
    drop(incoming);
    info!(target: "ws-server", "closed");
    let _ = on_event(WsServerEvent::Closed { error: None });
}

/// Driver for an accepted connection: already open, so there is no connect
/// phase and every raw close is reported as `Closed`.
async fn run_accepted(
    mut reader: DynFrameReader,
    outbound: mpsc::UnboundedSender<WsFrame>,
    clients: ConnectedClients,
    id: u64,
    mut on_event: WsEventHandler,
    mut commands: mpsc::UnboundedReceiver<Command>,
) {
    let mut read_failure: Option<WsError> = None;
    let cause = loop {
        tokio::select! {
            frame = reader.next() => match frame {
                Some(Ok(WsFrame::Close(frame))) => break CloseCause::Remote(frame),
                Some(Ok(frame)) => {
                    if let Some(data) = data_from_frame(frame) {
                        debug!(target: "ws-server", id, "received data");
                        if let Err(err) = on_event(WsEvent::DataReceived { data }) {
                            break CloseCause::Failure(WsError::Handler(err.to_string()));
                        }
                    }
                }
                Some(Err(error)) => {
                    read_failure = Some(error.clone());
                    let _ = on_event(WsEvent::Error { error });
                }
                None => break match read_failure.take() {
                    Some(error) => CloseCause::Failure(error),
                    None => CloseCause::Remote(None),
                },
            },
            command = commands.recv() => match command {
                Some(Command::Send(data)) => {
                    debug!(target: "ws-server", id, "sending data");
                    if outbound.send(data.into_frame()).is_err() {
                        let _ = on_event(WsEvent::Error { error: WsError::NotOpen });
                    }
                }
                Some(Command::Close) | None => break CloseCause::Local,
            },
        }
    };

    // Leave the broadcast set before the close frame goes out so a concurrent
    // broadcast cannot race onto a closing connection.
    clients.remove(id);
    let _ = outbound.send(WsFrame::Close(None));
    drop(outbound);
    info!(target: "ws-server", id, "connection closed");
    let _ = on_event(WsEvent::Closed {
        error: closed_error(cause),
    });
}

/// Writer task owning an accepted connection's sink; serializes all writes,
/// including broadcasts. Ends after a close frame or a write failure.
async fn write_frames<W>(mut writer: W, mut frames: mpsc::UnboundedReceiver<WsFrame>)
where
    W: Sink<WsFrame, Error = WsError> + Send + Unpin + 'static,
{
    while let Some(frame) = frames.recv().await {
        let done = matches!(frame, WsFrame::Close(_));
        if writer.send(frame).await.is_err() || done {
            break;
        }
    }
    let _ = writer.close().await;
}
