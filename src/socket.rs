//! Client-side event normalization: one raw websocket in, one ordered event
//! callback out.
//!
//! A spawned driver task owns the connection and all of its state; the
//! [`WsSocket`] handle talks to it over an unbounded command channel. Because
//! every transition happens on the driver task there is no shared mutable
//! state, `send`/`close` never block, and the terminal `Closed` event is
//! emitted exactly once on every path out of the driver.

use futures_util::{Sink, SinkExt, Stream, StreamExt};
use tokio::sync::mpsc;
use tracing::{debug, info};

use crate::core::{
    data_from_frame, BoxError, WsCloseFrame, WsData, WsError, WsEvent, WsFrame, WsOptions,
    CLOSE_ABNORMAL, CLOSE_NORMAL,
};
use crate::transport::tungstenite::TungsteniteTransport;
use crate::transport::{WsConnectFuture, WsTransport};

/// Consumer callback invoked for every normalized event.
///
/// Returning an error from a `DataReceived` invocation closes the socket with
/// that error as the close cause; results for other events are ignored.
pub type WsEventHandler = Box<dyn FnMut(WsEvent) -> Result<(), BoxError> + Send>;

/// Commands a handle may issue to its driver task.
pub(crate) enum Command {
    Send(WsData),
    Close,
}

/// Why a connection is going down; decides the `Closed` payload.
pub(crate) enum CloseCause {
    /// Deliberate local `close()`.
    Local,
    /// The peer closed, with or without a close frame.
    Remote(Option<WsCloseFrame>),
    /// A failure (read error, consumer handler error) forced the close.
    Failure(WsError),
}

pub(crate) fn closed_error(cause: CloseCause) -> Option<WsError> {
    match cause {
        CloseCause::Local => None,
        CloseCause::Remote(Some(frame)) if frame.code == CLOSE_NORMAL => None,
        CloseCause::Remote(Some(frame)) => Some(WsError::UncleanClose {
            code: frame.code,
            reason: frame.reason_str().to_string(),
        }),
        CloseCause::Remote(None) => Some(WsError::UncleanClose {
            code: CLOSE_ABNORMAL,
            reason: "connection dropped without a close frame".to_string(),
        }),
        CloseCause::Failure(error) => Some(error),
    }
}

/// Handle to a live client socket.
///
/// `send` and `close` never block and never fail: a send while the socket is
/// not open surfaces as an `Error` event, and commands issued after the
/// terminal `Closed` event are silently dropped (the socket is inert).
/// Dropping every handle is equivalent to calling `close`.
#[derive(Clone, Debug)]
pub struct WsSocket {
    endpoint_url: String,
    commands: mpsc::UnboundedSender<Command>,
}

impl WsSocket {
    /// Connect to `endpoint_url` and deliver normalized events to `on_event`.
    ///
    /// Must be called from within a tokio runtime.
    pub fn create(
        endpoint_url: impl Into<String>,
        on_event: impl FnMut(WsEvent) -> Result<(), BoxError> + Send + 'static,
        options: WsOptions,
    ) -> WsSocket {
        Self::create_with(TungsteniteTransport, endpoint_url, on_event, options)
    }

    /// Same as [`WsSocket::create`] with an explicit transport (test seam).
    pub fn create_with<T: WsTransport>(
        transport: T,
        endpoint_url: impl Into<String>,
        on_event: impl FnMut(WsEvent) -> Result<(), BoxError> + Send + 'static,
        options: WsOptions,
    ) -> WsSocket {
        let endpoint_url = endpoint_url.into();
        let (commands, cmd_rx) = mpsc::unbounded_channel();
        let connect = transport.connect(endpoint_url.clone(), &options);
        tokio::spawn(run_client(connect, Box::new(on_event), cmd_rx));
        WsSocket {
            endpoint_url,
            commands,
        }
    }

    pub(crate) fn from_parts(
        endpoint_url: String,
        commands: mpsc::UnboundedSender<Command>,
    ) -> WsSocket {
        WsSocket {
            endpoint_url,
            commands,
        }
    }

    pub fn endpoint_url(&self) -> &str {
        &self.endpoint_url
    }

    /// Send a payload. Not buffered: while the socket is not open this is a
    /// no-op that reports an `Error` event.
    pub fn send(&self, data: impl Into<WsData>) {
        let _ = self.commands.send(Command::Send(data.into()));
    }

    /// Request teardown. Idempotent; a close before the connection opens
    /// yields a clean `Closed`.
    pub fn close(&self) {
        let _ = self.commands.send(Command::Close);
    }
}

async fn run_client<R, W>(
    mut connect: WsConnectFuture<R, W>,
    mut on_event: WsEventHandler,
    mut commands: mpsc::UnboundedReceiver<Command>,
) where
    R: Stream<Item = Result<WsFrame, WsError>> + Send + Unpin + 'static,
    W: Sink<WsFrame, Error = WsError> + Send + Unpin + 'static,
{
    // Connect phase: the socket is not usable yet, so sends fail fast and a
    // deliberate close is reported as a clean shutdown.
    let (reader, mut writer) = loop {
        tokio::select! {
            result = &mut connect => match result {
                Ok(pair) => break pair,
                Err(error) => {
                    // The consumer never observed a usable connection: report
                    // the establishment failure as an error, never a close.
                    let _ = on_event(WsEvent::Error { error });
                    return;
                }
            },
            command = commands.recv() => match command {
                Some(Command::Send(_)) => {
                    let _ = on_event(WsEvent::Error { error: WsError::NotOpen });
                }
                Some(Command::Close) | None => {
                    info!(target: "ws-socket", "closed before opening");
                    let _ = on_event(WsEvent::Closed { error: None });
                    return;
                }
            },
        }
    };

    debug!(target: "ws-socket", "connection opened");
    let _ = on_event(WsEvent::Opened);

    let cause = pump_frames(reader, &mut writer, &mut on_event, &mut commands).await;

    // Teardown: the reader was dropped by the pump, so no further raw
    // notifications can be observed; close the wire, then report the single
    // terminal event.
    let _ = writer.send(WsFrame::Close(None)).await;
    let _ = writer.close().await;
    info!(target: "ws-socket", "closed");
    let _ = on_event(WsEvent::Closed {
        error: closed_error(cause),
    });
}

async fn pump_frames<R, W>(
    mut reader: R,
    writer: &mut W,
    on_event: &mut WsEventHandler,
    commands: &mut mpsc::UnboundedReceiver<Command>,
) -> CloseCause
where
    R: Stream<Item = Result<WsFrame, WsError>> + Unpin,
    W: Sink<WsFrame, Error = WsError> + Unpin,
{
    let mut read_failure: Option<WsError> = None;
    loop {
        tokio::select! {
            frame = reader.next() => match frame {
                Some(Ok(WsFrame::Close(frame))) => return CloseCause::Remote(frame),
                Some(Ok(frame)) => {
                    if let Some(data) = data_from_frame(frame) {
                        debug!(target: "ws-socket", "received data");
                        if let Err(err) = on_event(WsEvent::DataReceived { data }) {
                            // A failing consumer must not leave the socket
                            // half torn down; its error becomes the cause.
                            return CloseCause::Failure(WsError::Handler(err.to_string()));
                        }
                    }
                }
                Some(Err(error)) => {
                    read_failure = Some(error.clone());
                    let _ = on_event(WsEvent::Error { error });
                }
                None => {
                    return match read_failure.take() {
                        Some(error) => CloseCause::Failure(error),
                        None => CloseCause::Remote(None),
                    };
                }
            },
            command = commands.recv() => match command {
                Some(Command::Send(data)) => {
                    debug!(target: "ws-socket", "sending data");
                    if let Err(error) = writer.send(data.into_frame()).await {
                        let _ = on_event(WsEvent::Error { error });
                    }
                }
                Some(Command::Close) | None => return CloseCause::Local,
            },
        }
    }
}
