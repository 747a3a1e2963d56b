use std::time::Duration;

use bytes::Bytes;
use tokio::sync::mpsc;
use ws_streams::testing::MockTransport;
use ws_streams::{WsData, WsError, WsEvent, WsFrame, WsOptions, WsSocket};

const URL: &str = "ws://localhost:9";

fn event_channel() -> (
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

async fn next_event(rx: &mut mpsc::UnboundedReceiver<WsEvent>) -> WsEvent {
    tokio::time::timeout(Duration::from_secs(1), rx.recv())
        .await
        .expect("timed out waiting for event")
        .expect("event channel closed")
}

async fn assert_no_more_events(rx: &mut mpsc::UnboundedReceiver<WsEvent>) {
    let next = tokio::time::timeout(Duration::from_secs(1), rx.recv())
        .await
        .expect("timed out waiting for event channel to close");
    assert!(next.is_none(), "unexpected event after terminal: {next:?}");
}

#[tokio::test]
async fn opened_data_send_and_clean_close() {
    let (transport, mut peer) = MockTransport::channel_pair();
    let (handler, mut rx) = event_channel();
    let socket = WsSocket::create_with(transport, URL, handler, WsOptions::default());
    assert_eq!(socket.endpoint_url(), URL);

    peer.open();
    assert_eq!(next_event(&mut rx).await, WsEvent::Opened);

    peer.send_text("hello");
    assert_eq!(
        next_event(&mut rx).await,
        WsEvent::DataReceived {
            data: WsData::Text("hello".to_string())
        }
    );

    socket.send("world");
    assert_eq!(
        peer.recv_outbound().await,
        Some(WsFrame::Text(Bytes::from("world")))
    );

    peer.close(1000, "");
    assert_eq!(next_event(&mut rx).await, WsEvent::Closed { error: None });

    // Nothing of any kind after the terminal event.
    assert_no_more_events(&mut rx).await;
}

#[tokio::test]
async fn send_before_open_reports_error_and_sends_nothing() {
    let (transport, mut peer) = MockTransport::channel_pair();
    let (handler, mut rx) = event_channel();
    let socket = WsSocket::create_with(transport, URL, handler, WsOptions::default());

    socket.send("too early");
    assert_eq!(
        next_event(&mut rx).await,
        WsEvent::Error {
            error: WsError::NotOpen
        }
    );

    // The socket is still usable afterwards and the payload was dropped.
    peer.open();
    assert_eq!(next_event(&mut rx).await, WsEvent::Opened);
    assert_eq!(
        peer.recv_outbound_timeout(Duration::from_millis(50)).await,
        None
    );
}

#[tokio::test]
async fn close_before_open_is_a_clean_close() {
    let (transport, _peer) = MockTransport::channel_pair();
    let (handler, mut rx) = event_channel();
    let socket = WsSocket::create_with(transport, URL, handler, WsOptions::default());

    socket.close();
    assert_eq!(next_event(&mut rx).await, WsEvent::Closed { error: None });
    assert_no_more_events(&mut rx).await;
}

#[tokio::test]
async fn connect_failure_is_an_error_not_a_close() {
    let (transport, mut peer) = MockTransport::channel_pair();
    let (handler, mut rx) = event_channel();
    let _socket = WsSocket::create_with(transport, URL, handler, WsOptions::default());

    peer.refuse();
    assert!(matches!(
        next_event(&mut rx).await,
        WsEvent::Error {
            error: WsError::ConnectionFailed(_)
        }
    ));

    // No `Closed` ever follows a pre-open failure.
    assert_no_more_events(&mut rx).await;
}

#[tokio::test]
async fn unclean_close_carries_the_status_code() {
    let (transport, mut peer) = MockTransport::channel_pair();
    let (handler, mut rx) = event_channel();
    let _socket = WsSocket::create_with(transport, URL, handler, WsOptions::default());

    peer.open();
    assert_eq!(next_event(&mut rx).await, WsEvent::Opened);

    peer.close(1002, "protocol error");
    assert_eq!(
        next_event(&mut rx).await,
        WsEvent::Closed {
            error: Some(WsError::UncleanClose {
                code: 1002,
                reason: "protocol error".to_string()
            })
        }
    );
}

#[tokio::test]
async fn dropped_socket_closes_with_abnormal_status() {
    let (transport, mut peer) = MockTransport::channel_pair();
    let (handler, mut rx) = event_channel();
    let _socket = WsSocket::create_with(transport, URL, handler, WsOptions::default());

    peer.open();
    assert_eq!(next_event(&mut rx).await, WsEvent::Opened);

    peer.drop_socket();
    match next_event(&mut rx).await {
        WsEvent::Closed {
            error: Some(WsError::UncleanClose { code, .. }),
        } => assert_eq!(code, 1006),
        other => panic!("expected abnormal close, got {other:?}"),
    }
}

#[tokio::test]
async fn handler_failure_tears_the_socket_down() {
    let (transport, mut peer) = MockTransport::channel_pair();
    let (tx, mut rx) = mpsc::unbounded_channel();
    let _socket = WsSocket::create_with(
        transport,
        URL,
        move |event| {
            let fail = matches!(
                &event,
                WsEvent::DataReceived { data } if *data == "boom"
            );
            tx.send(event).unwrap();
            if fail {
                Err("consumer bug".into())
            } else {
                Ok(())
            }
        },
        WsOptions::default(),
    );

    peer.open();
    assert_eq!(next_event(&mut rx).await, WsEvent::Opened);

    peer.send_text("boom");
    assert_eq!(
        next_event(&mut rx).await,
        WsEvent::DataReceived {
            data: WsData::Text("boom".to_string())
        }
    );
    match next_event(&mut rx).await {
        WsEvent::Closed {
            error: Some(WsError::Handler(message)),
        } => assert!(message.contains("consumer bug")),
        other => panic!("expected handler-caused close, got {other:?}"),
    }

    // Teardown reached the wire.
    assert_eq!(peer.recv_outbound().await, Some(WsFrame::Close(None)));
    assert_no_more_events(&mut rx).await;
}

#[tokio::test]
async fn echo_scenario_steps_through_three_transitions() {
    let (transport, mut peer) = MockTransport::channel_pair();
    let (handler, mut rx) = event_channel();
    let socket = WsSocket::create_with(transport, URL, handler, WsOptions::default());

    peer.open();
    tokio::spawn(async move {
        // Echo every text frame back until the socket closes.
        while let Some(frame) = peer.recv_outbound().await {
            match frame {
                WsFrame::Text(bytes) => peer.send_frame(WsFrame::Text(bytes)),
                WsFrame::Close(_) => break,
                _ => {}
            }
        }
    });

    // open -> send "hello", "hello" -> send "world", "world" -> close.
    let mut step = 0;
    loop {
        match next_event(&mut rx).await {
            WsEvent::Opened => {
                socket.send("hello");
                step += 1;
            }
            WsEvent::DataReceived { data } if data == "hello" => {
                socket.send("world");
                step += 1;
            }
            WsEvent::DataReceived { data } if data == "world" => {
                socket.close();
                step += 1;
            }
            WsEvent::Closed { error: None } => break,
            other => panic!("unexpected event: {other:?}"),
        }
    }
    assert_eq!(step, 3);
}

#[tokio::test]
async fn local_close_emits_close_frame_and_clean_event() {
    let (transport, mut peer) = MockTransport::channel_pair();
    let (handler, mut rx) = event_channel();
    let socket = WsSocket::create_with(transport, URL, handler, WsOptions::default());

    peer.open();
    assert_eq!(next_event(&mut rx).await, WsEvent::Opened);

    socket.close();
    assert_eq!(next_event(&mut rx).await, WsEvent::Closed { error: None });
    assert_eq!(peer.recv_outbound().await, Some(WsFrame::Close(None)));

    // Commands after the terminal event are dropped silently.
    socket.send("into the void");
    socket.close();
    assert_no_more_events(&mut rx).await;
}
