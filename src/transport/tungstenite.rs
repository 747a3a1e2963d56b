use std::fmt;
use std::pin::Pin;
use std::sync::{Arc, Mutex};
use std::task::{Context, Poll};

use bytes::Bytes;
use futures_util::{Sink, Stream, StreamExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio_tungstenite::{
    accept_hdr_async, connect_async_tls_with_config, connect_async_with_config, Connector,
    MaybeTlsStream, WebSocketStream,
    tungstenite::{
        client::IntoClientRequest,
        handshake::server::{Request, Response},
        protocol::{CloseFrame as TungCloseFrame, WebSocketConfig},
        Message as TungsteniteMessage, Utf8Bytes,
    },
};
use tracing::debug;

use crate::core::{WsCloseFrame, WsError, WsFrame, WsOptions, WsRequest, WsResult, WsServerOptions};
use crate::tls::install_rustls_crypto_provider;
use crate::transport::{WsBindFuture, WsConnectFuture, WsListenerTransport, WsTransport};

fn map_ws_error(context: &'static str, err: impl ToString) -> WsError {
    WsError::Transport {
        context,
        error: err.to_string(),
    }
}

fn utf8_or_empty(bytes: Bytes) -> Utf8Bytes {
    match std::str::from_utf8(bytes.as_ref()) {
        Ok(_) => unsafe { Utf8Bytes::from_bytes_unchecked(bytes) },
        Err(_) => Utf8Bytes::from_static(""),
    }
}

impl From<TungsteniteMessage> for WsFrame {
    fn from(msg: TungsteniteMessage) -> Self {
        match msg {
            TungsteniteMessage::Text(text) => WsFrame::Text(Bytes::from(text)),
            TungsteniteMessage::Binary(bytes) => WsFrame::Binary(bytes),
            TungsteniteMessage::Ping(bytes) => WsFrame::Ping(bytes),
            TungsteniteMessage::Pong(bytes) => WsFrame::Pong(bytes),
            TungsteniteMessage::Close(frame) => WsFrame::Close(frame.map(|f| WsCloseFrame {
                code: u16::from(f.code),
                reason: Bytes::from(f.reason),
            })),
            // Raw frames are not produced by the read path; treat defensively.
            TungsteniteMessage::Frame(_) => WsFrame::Binary(Bytes::new()),
        }
    }
}

impl From<WsFrame> for TungsteniteMessage {
    fn from(frame: WsFrame) -> Self {
        match frame {
            WsFrame::Text(bytes) => match std::str::from_utf8(bytes.as_ref()) {
                Ok(_) => TungsteniteMessage::Text(unsafe { Utf8Bytes::from_bytes_unchecked(bytes) }),
                Err(_) => TungsteniteMessage::Binary(bytes),
            },
            WsFrame::Binary(bytes) => TungsteniteMessage::Binary(bytes),
            WsFrame::Ping(bytes) => TungsteniteMessage::Ping(bytes),
            WsFrame::Pong(bytes) => TungsteniteMessage::Pong(bytes),
            WsFrame::Close(frame) => TungsteniteMessage::Close(frame.map(|f| TungCloseFrame {
                code: f.code.into(),
                reason: utf8_or_empty(f.reason),
            })),
        }
    }
}

/// Connector wrapper so tokio-tungstenite types stay inside this module.
#[derive(Clone)]
pub struct WsConnector {
    inner: Connector,
}

impl WsConnector {
    pub fn rustls(config: Arc<rustls::ClientConfig>) -> Self {
        Self {
            inner: Connector::Rustls(config),
        }
    }
}

impl fmt::Debug for WsConnector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("WsConnector")
    }
}

type WsTcpStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

pub struct TungsteniteReader {
    inner: futures_util::stream::SplitStream<WsTcpStream>,
}

impl Stream for TungsteniteReader {
    type Item = WsResult<WsFrame>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        match Pin::new(&mut self.inner).poll_next(cx) {
            Poll::Ready(Some(Ok(msg))) => Poll::Ready(Some(Ok(msg.into()))),
            Poll::Ready(Some(Err(err))) => Poll::Ready(Some(Err(map_ws_error("read", err)))),
            Poll::Ready(None) => Poll::Ready(None),
            Poll::Pending => Poll::Pending,
        }
    }
}

pub struct TungsteniteWriter {
    inner: futures_util::stream::SplitSink<WsTcpStream, TungsteniteMessage>,
}

impl Sink<WsFrame> for TungsteniteWriter {
    type Error = WsError;

    fn poll_ready(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        Pin::new(&mut self.inner)
            .poll_ready(cx)
            .map_err(|e| map_ws_error("write", e))
    }

    fn start_send(mut self: Pin<&mut Self>, item: WsFrame) -> Result<(), Self::Error> {
        Pin::new(&mut self.inner)
            .start_send(item.into())
            .map_err(|e| map_ws_error("write", e))
    }

    fn poll_flush(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        Pin::new(&mut self.inner)
            .poll_flush(cx)
            .map_err(|e| map_ws_error("write", e))
    }

    fn poll_close(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        Pin::new(&mut self.inner)
            .poll_close(cx)
            .map_err(|e| map_ws_error("write", e))
    }
}

fn websocket_config(options: &WsOptions) -> WebSocketConfig {
    WebSocketConfig::default()
        .max_message_size(Some(options.buffers.max_message_bytes))
        .max_frame_size(Some(options.buffers.max_frame_bytes))
        .write_buffer_size(options.buffers.write_buffer_bytes)
        .max_write_buffer_size(options.buffers.max_write_buffer_bytes)
}

/// Production client transport over tokio-tungstenite.
#[derive(Clone, Default)]
pub struct TungsteniteTransport;

impl WsTransport for TungsteniteTransport {
    type Reader = TungsteniteReader;
    type Writer = TungsteniteWriter;

    fn connect(
        &self,
        url: String,
        options: &WsOptions,
    ) -> WsConnectFuture<Self::Reader, Self::Writer> {
        let config = websocket_config(options);
        let headers = options.headers.clone();
        let connector = options.connector.clone().map(|c| c.inner);
        Box::pin(async move {
            install_rustls_crypto_provider();

            let mut request = url
                .into_client_request()
                .map_err(|err| WsError::ConnectionFailed(err.to_string()))?;
            for (name, value) in headers.iter() {
                request.headers_mut().append(name, value.clone());
            }

            let (stream, _) = match connector {
                Some(connector) => {
                    connect_async_tls_with_config(request, Some(config), false, Some(connector))
                        .await
                }
                None => connect_async_with_config(request, Some(config), false).await,
            }
            .map_err(|err| WsError::ConnectionFailed(err.to_string()))?;

            let (write, read) = stream.split();
            Ok((
                TungsteniteReader { inner: read },
                TungsteniteWriter { inner: write },
            ))
        })
    }
}

/// Production listener transport: a `TcpListener` with a per-connection
/// websocket handshake that captures the request line and headers.
#[derive(Clone, Default)]
pub struct TungsteniteListener;

pub struct TungsteniteIncoming {
    rx: mpsc::UnboundedReceiver<WsResult<(TungsteniteReader, TungsteniteWriter, WsRequest)>>,
}

impl Stream for TungsteniteIncoming {
    type Item = WsResult<(TungsteniteReader, TungsteniteWriter, WsRequest)>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.get_mut().rx.poll_recv(cx)
    }
}

async fn server_handshake(
    stream: TcpStream,
) -> WsResult<(TungsteniteReader, TungsteniteWriter, WsRequest)> {
    let captured: Arc<Mutex<Option<WsRequest>>> = Arc::new(Mutex::new(None));
    let slot = Arc::clone(&captured);
    let ws = accept_hdr_async(
        MaybeTlsStream::Plain(stream),
        move |request: &Request, response: Response| {
            if let Ok(mut slot) = slot.lock() {
                *slot = Some(WsRequest {
                    uri: request.uri().to_string(),
                    headers: request.headers().clone(),
                });
            }
            Ok(response)
        },
    )
    .await
    .map_err(|err| WsError::ConnectionFailed(err.to_string()))?;

    let request = captured
        .lock()
        .ok()
        .and_then(|mut slot| slot.take())
        .unwrap_or_default();
    let (write, read) = ws.split();
    Ok((
        TungsteniteReader { inner: read },
        TungsteniteWriter { inner: write },
        request,
    ))
}

impl WsListenerTransport for TungsteniteListener {
    type Reader = TungsteniteReader;
    type Writer = TungsteniteWriter;
    type Incoming = TungsteniteIncoming;

    fn bind(&self, options: &WsServerOptions) -> WsBindFuture<Self::Incoming> {
        let host = options.host.clone();
        let port = options.port;
        Box::pin(async move {
            let listener = TcpListener::bind((host.as_str(), port))
                .await
                .map_err(|err| WsError::ConnectionFailed(err.to_string()))?;
            let port = listener
                .local_addr()
                .map_err(|err| WsError::ConnectionFailed(err.to_string()))?
                .port();

            let (tx, rx) = mpsc::unbounded_channel();
            tokio::spawn(async move {
                loop {
                    tokio::select! {
                        accepted = listener.accept() => match accepted {
                            Ok((stream, addr)) => {
                                debug!(target: "ws-server", %addr, "tcp connection accepted");
                                let tx = tx.clone();
                                tokio::spawn(async move {
                                    let _ = tx.send(server_handshake(stream).await);
                                });
                            }
                            Err(err) => {
                                if tx.send(Err(map_ws_error("accept", err))).is_err() {
                                    break;
                                }
                            }
                        },
                        // Listener teardown: the incoming stream was dropped.
                        _ = tx.closed() => break,
                    }
                }
            });

            Ok((TungsteniteIncoming { rx }, port))
        })
    }
}
