use std::time::Duration;

use bytes::Bytes;
use http::header::{HeaderMap, HeaderValue};
use tokio::sync::mpsc;
use ws_streams::testing::MockListener;
use ws_streams::{
    WsData, WsError, WsEvent, WsFrame, WsRequest, WsServer, WsServerEvent, WsServerOptions,
};

fn server_event_channel() -> (
    impl FnMut(WsServerEvent) -> Result<(), ws_streams::BoxError> + Send + 'static,
    mpsc::UnboundedReceiver<WsServerEvent>,
) {
    let (tx, rx) = mpsc::unbounded_channel();
    (
        move |event| {
            tx.send(event).unwrap();
            Ok(())
        },
        rx,
    )
}

fn client_event_channel() -> (
    impl FnMut(WsEvent) -> Result<(), ws_streams::BoxError> + Send + 'static,
    mpsc::UnboundedReceiver<WsEvent>,
) {
    let (tx, rx) = mpsc::unbounded_channel();
    (
        move |event| {
            tx.send(event).unwrap();
            Ok(())
        },
        rx,
    )
}

async fn next_event<T: std::fmt::Debug>(rx: &mut mpsc::UnboundedReceiver<T>) -> T {
    tokio::time::timeout(Duration::from_secs(1), rx.recv())
        .await
        .expect("timed out waiting for event")
        .expect("event channel closed")
}

fn request(uri: &str) -> WsRequest {
    let mut headers = HeaderMap::new();
    headers.insert("x-token", HeaderValue::from_static("s3cr3t"));
    WsRequest {
        uri: uri.to_string(),
        headers,
    }
}

#[tokio::test]
async fn listening_then_connected_then_accept() {
    let (listener, mut network) = MockListener::channel_pair();
    let (handler, mut rx) = server_event_channel();
    let server = WsServer::create_with(listener, handler, WsServerOptions::default());
    assert_eq!(server.port(), None);

    network.listen(8080);
    assert!(matches!(
        next_event(&mut rx).await,
        WsServerEvent::Listening { port: 8080 }
    ));
    assert_eq!(server.port(), Some(8080));

    let mut peer = network.connect(request("/feed"));
    let incoming = match next_event(&mut rx).await {
        WsServerEvent::Connected(incoming) => incoming,
        other => panic!("expected connected event, got {other:?}"),
    };
    assert_eq!(incoming.uri(), "/feed");
    assert_eq!(
        incoming.headers().get("x-token"),
        Some(&HeaderValue::from_static("s3cr3t"))
    );

    let (client_handler, mut client_rx) = client_event_channel();
    let socket = incoming.accept(client_handler);

    // Already open: data flows both ways with no `Opened` event.
    peer.send_text("hi");
    assert_eq!(
        next_event(&mut client_rx).await,
        WsEvent::DataReceived {
            data: WsData::Text("hi".to_string())
        }
    );
    socket.send("yo");
    assert_eq!(
        peer.recv_outbound().await,
        Some(WsFrame::Text(Bytes::from("yo")))
    );

    socket.close();
    assert_eq!(
        next_event(&mut client_rx).await,
        WsEvent::Closed { error: None }
    );
    assert_eq!(peer.recv_outbound().await, Some(WsFrame::Close(None)));
}

#[tokio::test]
async fn broadcast_before_listening_reports_error() {
    let (listener, mut network) = MockListener::channel_pair();
    let (handler, mut rx) = server_event_channel();
    let server = WsServer::create_with(listener, handler, WsServerOptions::default());

    server.send("too early");
    assert!(matches!(
        next_event(&mut rx).await,
        WsServerEvent::Error {
            error: WsError::NotOpen
        }
    ));

    // The listener still comes up afterwards; nothing was buffered.
    network.listen(9000);
    assert!(matches!(
        next_event(&mut rx).await,
        WsServerEvent::Listening { port: 9000 }
    ));
    let mut peer = network.connect(request("/"));
    let _ = next_event(&mut rx).await;
    assert_eq!(
        peer.recv_outbound_timeout(Duration::from_millis(50)).await,
        None
    );
}

#[tokio::test]
async fn broadcast_reaches_every_connected_client() {
    let (listener, mut network) = MockListener::channel_pair();
    let (handler, mut rx) = server_event_channel();
    let server = WsServer::create_with(listener, handler, WsServerOptions::default());

    network.listen(9001);
    let _ = next_event(&mut rx).await;

    let mut first = network.connect(request("/a"));
    let _ = next_event(&mut rx).await;
    let mut second = network.connect(request("/b"));
    let _ = next_event(&mut rx).await;

    server.send("to all");
    assert_eq!(
        first.recv_outbound().await,
        Some(WsFrame::Text(Bytes::from("to all")))
    );
    assert_eq!(
        second.recv_outbound().await,
        Some(WsFrame::Text(Bytes::from("to all")))
    );
}

#[tokio::test]
async fn closing_the_listener_does_not_cascade_to_clients() {
    let (listener, mut network) = MockListener::channel_pair();
    let (handler, mut rx) = server_event_channel();
    let server = WsServer::create_with(listener, handler, WsServerOptions::default());

    network.listen(9002);
    let _ = next_event(&mut rx).await;

    let mut peer = network.connect(request("/live"));
    let incoming = match next_event(&mut rx).await {
        WsServerEvent::Connected(incoming) => incoming,
        other => panic!("expected connected event, got {other:?}"),
    };
    let (client_handler, mut client_rx) = client_event_channel();
    let socket = incoming.accept(client_handler);

    server.close();
    assert!(matches!(
        next_event(&mut rx).await,
        WsServerEvent::Closed { error: None }
    ));

    // The accepted connection keeps working after the listener is gone.
    socket.send("still here");
    assert_eq!(
        peer.recv_outbound().await,
        Some(WsFrame::Text(Bytes::from("still here")))
    );
    peer.send_text("ack");
    assert_eq!(
        next_event(&mut client_rx).await,
        WsEvent::DataReceived {
            data: WsData::Text("ack".to_string())
        }
    );
}

#[tokio::test]
async fn accepted_connection_unclean_close_carries_status() {
    let (listener, mut network) = MockListener::channel_pair();
    let (handler, mut rx) = server_event_channel();
    let _server = WsServer::create_with(listener, handler, WsServerOptions::default());

    network.listen(9003);
    let _ = next_event(&mut rx).await;

    let mut peer = network.connect(request("/fragile"));
    let incoming = match next_event(&mut rx).await {
        WsServerEvent::Connected(incoming) => incoming,
        other => panic!("expected connected event, got {other:?}"),
    };
    let (client_handler, mut client_rx) = client_event_channel();
    let _socket = incoming.accept(client_handler);

    peer.close(1011, "oops");
    assert_eq!(
        next_event(&mut client_rx).await,
        WsEvent::Closed {
            error: Some(WsError::UncleanClose {
                code: 1011,
                reason: "oops".to_string()
            })
        }
    );
}

#[tokio::test]
async fn bind_failure_is_an_error_not_a_close() {
    let (listener, mut network) = MockListener::channel_pair();
    let (handler, mut rx) = server_event_channel();
    let _server = WsServer::create_with(listener, handler, WsServerOptions::default());

    network.refuse();
    assert!(matches!(
        next_event(&mut rx).await,
        WsServerEvent::Error {
            error: WsError::ConnectionFailed(_)
        }
    ));
    let next = tokio::time::timeout(Duration::from_secs(1), rx.recv())
        .await
        .expect("timed out waiting for event channel to close");
    assert!(next.is_none(), "unexpected event after failure: {next:?}");
}

#[tokio::test]
async fn handshake_failure_is_non_terminal() {
    let (listener, mut network) = MockListener::channel_pair();
    let (handler, mut rx) = server_event_channel();
    let _server = WsServer::create_with(listener, handler, WsServerOptions::default());

    network.listen(9004);
    let _ = next_event(&mut rx).await;

    network.fail_handshake(WsError::ConnectionFailed("bad upgrade".to_string()));
    assert!(matches!(
        next_event(&mut rx).await,
        WsServerEvent::Error {
            error: WsError::ConnectionFailed(_)
        }
    ));

    // Later connections still come through.
    let _peer = network.connect(request("/after"));
    assert!(matches!(
        next_event(&mut rx).await,
        WsServerEvent::Connected(_)
    ));
}
