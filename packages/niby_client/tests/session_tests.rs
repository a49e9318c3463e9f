//! Session tests against a real local WebSocket server.
//!
//! Each test binds a `tokio-tungstenite` server on an ephemeral port and
//! drives the assistant side of the conversation by hand.

use std::time::{Duration, Instant};

use futures_util::{SinkExt, StreamExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::time::timeout;
use tokio_tungstenite::WebSocketStream;
use tokio_tungstenite::tungstenite::Message as WsMessage;

use niby_client::{
    ChatSession, ConnectionState, EventStream, Message, Mode, ReasoningPolicy, ReconnectPolicy,
    SessionConfig, SessionError, SessionEvent, SubmitOutcome, WireFormat,
};

/// Timeout for each async operation in tests.
const TEST_TIMEOUT: Duration = Duration::from_secs(10);

async fn bind() -> (TcpListener, String) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    (listener, format!("ws://{addr}/niby-ws"))
}

async fn accept(listener: &TcpListener) -> WebSocketStream<TcpStream> {
    let (stream, _) = timeout(TEST_TIMEOUT, listener.accept())
        .await
        .expect("timed out waiting for client")
        .unwrap();
    tokio_tungstenite::accept_async(stream).await.unwrap()
}

async fn recv_text(server: &mut WebSocketStream<TcpStream>) -> String {
    loop {
        let msg = timeout(TEST_TIMEOUT, server.next())
            .await
            .expect("timed out waiting for client frame")
            .expect("client hung up")
            .unwrap();
        if let WsMessage::Text(text) = msg {
            return text.as_str().to_owned();
        }
    }
}

async fn send_text(server: &mut WebSocketStream<TcpStream>, text: &str) {
    server
        .send(WsMessage::Text(text.to_owned().into()))
        .await
        .unwrap();
}

/// Skip events until one matches.
async fn wait_for(
    events: &mut EventStream,
    matches: impl Fn(&SessionEvent) -> bool,
) -> SessionEvent {
    timeout(TEST_TIMEOUT, async {
        loop {
            let event = events.recv().await.expect("event stream ended");
            if matches(&event) {
                return event;
            }
        }
    })
    .await
    .expect("timed out waiting for event")
}

async fn wait_for_state(events: &mut EventStream, state: ConnectionState) -> u32 {
    match wait_for(events, |e| matches!(e, SessionEvent::StateChanged { state: s, .. } if *s == state)).await {
        SessionEvent::StateChanged { attempt, .. } => attempt,
        _ => unreachable!(),
    }
}

fn fast_reconnect() -> ReconnectPolicy {
    ReconnectPolicy {
        base: Duration::from_millis(50),
        growth: 1.5,
        max_delay: Duration::from_millis(200),
        max_jitter: Duration::from_millis(10),
    }
}

#[tokio::test]
async fn end_to_end_scenario() {
    let (listener, url) = bind().await;
    let mut session = ChatSession::new(SessionConfig::new(url));
    let mut events = session.subscribe();
    let handle = session.start();

    let first = timeout(TEST_TIMEOUT, events.recv()).await.unwrap().unwrap();
    assert_eq!(
        first,
        SessionEvent::StateChanged {
            state: ConnectionState::Connecting,
            attempt: 0
        }
    );

    let mut server = accept(&listener).await;
    assert_eq!(wait_for_state(&mut events, ConnectionState::Open).await, 0);

    assert_eq!(handle.submit("hi").await.unwrap(), SubmitOutcome::Sent);
    assert_eq!(
        recv_text(&mut server).await,
        r#"{"message":"hi","mode":"basic"}"#
    );

    send_text(&mut server, "<think>evaluating</think>Hello!").await;

    let reasoning = wait_for(&mut events, |e| {
        matches!(e, SessionEvent::Reasoning { text } if !text.is_empty())
    })
    .await;
    assert_eq!(
        reasoning,
        SessionEvent::Reasoning {
            text: "evaluating".into()
        }
    );

    let appended = wait_for(&mut events, |e| {
        matches!(e, SessionEvent::MessageAppended { index: 1, .. })
    })
    .await;
    assert_eq!(
        appended,
        SessionEvent::MessageAppended {
            index: 1,
            message: Message::assistant("Hello!")
        }
    );

    let snapshot = handle.snapshot().await.unwrap();
    assert_eq!(
        snapshot.messages,
        vec![Message::user("hi"), Message::assistant("Hello!")]
    );

    server.close(None).await.unwrap();

    wait_for_state(&mut events, ConnectionState::Closed).await;
    match wait_for(&mut events, |e| matches!(e, SessionEvent::ReconnectScheduled { .. })).await {
        SessionEvent::ReconnectScheduled { attempt, delay, .. } => {
            assert_eq!(attempt, 0);
            assert!(delay >= Duration::from_millis(3000), "{delay:?}");
            assert!(delay <= Duration::from_millis(3300), "{delay:?}");
        }
        _ => unreachable!(),
    }

    handle.shutdown().await.unwrap();
}

#[tokio::test]
async fn streamed_chunks_fold_into_one_message() {
    let (listener, url) = bind().await;
    let mut config = SessionConfig::new(url);
    config.quiet_period = Duration::from_millis(150);
    let mut session = ChatSession::new(config);
    let mut events = session.subscribe();
    let handle = session.start();

    let mut server = accept(&listener).await;
    wait_for_state(&mut events, ConnectionState::Open).await;

    for chunk in ["<think>drafting</think>Hel", "lo ", "world"] {
        send_text(&mut server, chunk).await;
    }

    let ended = wait_for(&mut events, |e| matches!(e, SessionEvent::TurnEnded { .. })).await;
    assert_eq!(ended, SessionEvent::TurnEnded { index: 0 });

    // ClearOnTurnEnd is the default policy.
    let cleared = wait_for(&mut events, |e| matches!(e, SessionEvent::Reasoning { .. })).await;
    assert_eq!(cleared, SessionEvent::Reasoning { text: String::new() });

    let snapshot = handle.snapshot().await.unwrap();
    assert_eq!(snapshot.messages, vec![Message::assistant("Hello world")]);
    assert!(!snapshot.turn_open);

    // After the quiet period a new chunk starts a new message.
    send_text(&mut server, "Again").await;
    let appended = wait_for(&mut events, |e| matches!(e, SessionEvent::MessageAppended { .. })).await;
    assert_eq!(
        appended,
        SessionEvent::MessageAppended {
            index: 1,
            message: Message::assistant("Again")
        }
    );

    handle.shutdown().await.unwrap();
}

#[tokio::test]
async fn persist_policy_keeps_reasoning_after_turn() {
    let (listener, url) = bind().await;
    let mut config = SessionConfig::new(url);
    config.quiet_period = Duration::from_millis(100);
    config.reasoning_policy = ReasoningPolicy::Persist;
    let mut session = ChatSession::new(config);
    let mut events = session.subscribe();
    let handle = session.start();

    let mut server = accept(&listener).await;
    wait_for_state(&mut events, ConnectionState::Open).await;

    send_text(&mut server, "<think>kept</think>Hi").await;
    wait_for(&mut events, |e| matches!(e, SessionEvent::TurnEnded { .. })).await;
    tokio::time::sleep(Duration::from_millis(50)).await;

    while let Ok(event) = events.try_recv() {
        assert_ne!(event, SessionEvent::Reasoning { text: String::new() });
    }

    handle.shutdown().await.unwrap();
}

#[tokio::test]
async fn submit_while_disconnected_is_echoed_but_not_sent() {
    // Grab a free port and leave nothing listening on it.
    let (listener, url) = bind().await;
    drop(listener);

    let session = ChatSession::new(SessionConfig::new(url));
    let handle = session.start();

    assert!(matches!(
        handle.submit("hi").await,
        Err(SessionError::NotConnected)
    ));
    assert_eq!(handle.submit("   ").await.unwrap(), SubmitOutcome::Ignored);

    let snapshot = handle.snapshot().await.unwrap();
    assert_ne!(snapshot.state, ConnectionState::Open);
    assert_eq!(snapshot.messages, vec![Message::user("hi")]);

    handle.shutdown().await.unwrap();
}

#[tokio::test]
async fn blank_submission_is_not_transmitted() {
    let (listener, url) = bind().await;
    let mut session = ChatSession::new(SessionConfig::new(url));
    let mut events = session.subscribe();
    let handle = session.start();

    let mut server = accept(&listener).await;
    wait_for_state(&mut events, ConnectionState::Open).await;

    assert_eq!(handle.submit(" \n ").await.unwrap(), SubmitOutcome::Ignored);
    assert_eq!(handle.submit("real").await.unwrap(), SubmitOutcome::Sent);

    // The first frame the server sees is the real one.
    let frame = recv_text(&mut server).await;
    assert_eq!(frame, r#"{"message":"real","mode":"basic"}"#);
    assert_eq!(handle.snapshot().await.unwrap().messages.len(), 1);

    handle.shutdown().await.unwrap();
}

#[tokio::test]
async fn mode_and_wire_format_shape_the_frame() {
    let (listener, url) = bind().await;
    let mut config = SessionConfig::new(url.clone());
    config.initial_mode = Mode::Plan;
    let mut session = ChatSession::new(config);
    let mut events = session.subscribe();
    let handle = session.start();

    let mut server = accept(&listener).await;
    wait_for_state(&mut events, ConnectionState::Open).await;

    handle.submit("draft it").await.unwrap();
    assert_eq!(
        recv_text(&mut server).await,
        r#"{"message":"draft it","mode":"plan"}"#
    );

    handle.set_mode(Mode::Act).await.unwrap();
    wait_for(&mut events, |e| matches!(e, SessionEvent::ModeChanged { mode: Mode::Act })).await;
    handle.submit("do it").await.unwrap();
    assert_eq!(
        recv_text(&mut server).await,
        r#"{"message":"do it","mode":"act"}"#
    );
    handle.shutdown().await.unwrap();

    let mut config = SessionConfig::new(url);
    config.wire_format = WireFormat::PlainText;
    let mut session = ChatSession::new(config);
    let mut events = session.subscribe();
    let handle = session.start();

    let mut server = accept(&listener).await;
    wait_for_state(&mut events, ConnectionState::Open).await;
    handle.submit("  just text ").await.unwrap();
    assert_eq!(recv_text(&mut server).await, "just text");

    handle.shutdown().await.unwrap();
}

#[tokio::test]
async fn reconnects_and_resets_backoff() {
    let (listener, url) = bind().await;
    let mut config = SessionConfig::new(url);
    config.reconnect = fast_reconnect();
    let mut session = ChatSession::new(config);
    let mut events = session.subscribe();
    let handle = session.start();

    let server = accept(&listener).await;
    assert_eq!(wait_for_state(&mut events, ConnectionState::Open).await, 0);

    // Vanish without a close frame.
    drop(server);
    wait_for_state(&mut events, ConnectionState::Closed).await;
    match wait_for(&mut events, |e| matches!(e, SessionEvent::ReconnectScheduled { .. })).await {
        SessionEvent::ReconnectScheduled { attempt, .. } => assert_eq!(attempt, 0),
        _ => unreachable!(),
    }

    // Every reconnection passes through Connecting.
    wait_for_state(&mut events, ConnectionState::Connecting).await;
    let server = accept(&listener).await;
    assert_eq!(wait_for_state(&mut events, ConnectionState::Open).await, 0);

    // The counter was reset, so the next closure backs off from the base again.
    drop(server);
    match wait_for(&mut events, |e| matches!(e, SessionEvent::ReconnectScheduled { .. })).await {
        SessionEvent::ReconnectScheduled { attempt, delay, .. } => {
            assert_eq!(attempt, 0);
            assert!(delay <= Duration::from_millis(60), "{delay:?}");
        }
        _ => unreachable!(),
    }

    handle.shutdown().await.unwrap();
}

#[tokio::test]
async fn close_stops_retrying_until_connect() {
    let (listener, url) = bind().await;
    let mut config = SessionConfig::new(url);
    config.reconnect = fast_reconnect();
    let mut session = ChatSession::new(config);
    let mut events = session.subscribe();
    let handle = session.start();

    let _server = accept(&listener).await;
    wait_for_state(&mut events, ConnectionState::Open).await;

    handle.close().await.unwrap();
    wait_for_state(&mut events, ConnectionState::Closed).await;

    // Well past several backoff periods.
    tokio::time::sleep(Duration::from_millis(400)).await;
    while let Ok(event) = events.try_recv() {
        assert!(
            !matches!(
                event,
                SessionEvent::ReconnectScheduled { .. }
                    | SessionEvent::StateChanged {
                        state: ConnectionState::Connecting,
                        ..
                    }
            ),
            "unexpected {event:?}"
        );
    }
    assert!(matches!(
        handle.submit("anyone?").await,
        Err(SessionError::NotConnected)
    ));

    handle.connect().await.unwrap();
    wait_for_state(&mut events, ConnectionState::Connecting).await;
    let _server = accept(&listener).await;
    wait_for_state(&mut events, ConnectionState::Open).await;

    // connect() while open is a no-op.
    handle.connect().await.unwrap();
    assert_eq!(handle.snapshot().await.unwrap().state, ConnectionState::Open);

    handle.shutdown().await.unwrap();
}

#[tokio::test]
async fn shut_down_session_rejects_commands() {
    let (listener, url) = bind().await;
    drop(listener);

    let handle = ChatSession::new(SessionConfig::new(url)).start();
    handle.shutdown().await.unwrap();

    assert!(matches!(
        handle.submit("late").await,
        Err(SessionError::SessionClosed)
    ));
    assert!(matches!(
        handle.snapshot().await,
        Err(SessionError::SessionClosed)
    ));
}

#[tokio::test]
async fn slow_subscriber_sees_every_fragment() {
    let (listener, url) = bind().await;
    let mut config = SessionConfig::new(url);
    config.quiet_period = Duration::from_millis(500);
    let mut session = ChatSession::new(config);
    let mut events = session.subscribe();
    let handle = session.start();

    let mut server = accept(&listener).await;
    wait_for_state(&mut events, ConnectionState::Open).await;

    // Far more events than any fixed buffer would hold, while nobody reads.
    let chunks: Vec<String> = (0..300).map(|i| format!("t{i} ")).collect();
    for chunk in &chunks {
        send_text(&mut server, chunk).await;
    }
    tokio::time::sleep(Duration::from_millis(200)).await;

    let mut frames = 0;
    let mut printed = String::new();
    timeout(TEST_TIMEOUT, async {
        loop {
            match events.recv().await.expect("event stream ended") {
                SessionEvent::Frame { .. } => frames += 1,
                SessionEvent::MessageAppended { message, .. } => printed.push_str(&message.text),
                SessionEvent::MessageExtended { fragment, .. } => printed.push_str(&fragment),
                SessionEvent::TurnEnded { .. } => break,
                _ => {}
            }
        }
    })
    .await
    .expect("timed out waiting for turn end");

    assert_eq!(frames, chunks.len());
    assert_eq!(printed, chunks.concat());
    let snapshot = handle.snapshot().await.unwrap();
    assert_eq!(snapshot.messages, vec![Message::assistant(chunks.concat())]);

    handle.shutdown().await.unwrap();
}

#[tokio::test]
async fn late_subscriber_sees_later_events() {
    let (listener, url) = bind().await;
    let mut session = ChatSession::new(SessionConfig::new(url));
    let mut early = session.subscribe();
    let handle = session.start();

    let mut server = accept(&listener).await;
    wait_for_state(&mut early, ConnectionState::Open).await;

    let mut late = handle.subscribe().await.unwrap();
    send_text(&mut server, "welcome").await;

    for events in [&mut early, &mut late] {
        let appended =
            wait_for(events, |e| matches!(e, SessionEvent::MessageAppended { .. })).await;
        assert_eq!(
            appended,
            SessionEvent::MessageAppended {
                index: 0,
                message: Message::assistant("welcome")
            }
        );
    }

    // Streams end once the session stops.
    handle.shutdown().await.unwrap();
    let drained = timeout(TEST_TIMEOUT, async { while late.recv().await.is_some() {} }).await;
    assert!(drained.is_ok());
}

#[tokio::test]
async fn submit_closes_the_streaming_turn_first() {
    let (listener, url) = bind().await;
    let mut config = SessionConfig::new(url);
    // Long enough that only the submission can end the turn.
    config.quiet_period = Duration::from_secs(30);
    let mut session = ChatSession::new(config);
    let mut events = session.subscribe();
    let handle = session.start();

    let mut server = accept(&listener).await;
    wait_for_state(&mut events, ConnectionState::Open).await;

    send_text(&mut server, "<think>hmm</think>Still typ").await;
    wait_for(&mut events, |e| matches!(e, SessionEvent::MessageAppended { .. })).await;

    handle.submit("interrupt").await.unwrap();

    let mut tail = Vec::new();
    while let Ok(event) = events.try_recv() {
        tail.push(event);
    }
    assert_eq!(
        tail,
        vec![
            SessionEvent::TurnEnded { index: 0 },
            SessionEvent::Reasoning {
                text: String::new()
            },
            SessionEvent::MessageAppended {
                index: 1,
                message: Message::user("interrupt")
            },
        ]
    );

    // A late chunk of the old reply cannot reopen it.
    send_text(&mut server, "ing").await;
    let appended = wait_for(&mut events, |e| matches!(e, SessionEvent::MessageAppended { .. })).await;
    assert_eq!(
        appended,
        SessionEvent::MessageAppended {
            index: 2,
            message: Message::assistant("ing")
        }
    );

    handle.shutdown().await.unwrap();
}

#[tokio::test]
async fn reasoning_only_payload_does_not_extend_the_turn() {
    let (listener, url) = bind().await;
    let quiet = Duration::from_millis(300);
    let mut config = SessionConfig::new(url);
    config.quiet_period = quiet;
    let mut session = ChatSession::new(config);
    let mut events = session.subscribe();
    let handle = session.start();

    let mut server = accept(&listener).await;
    wait_for_state(&mut events, ConnectionState::Open).await;

    let started = Instant::now();
    send_text(&mut server, "Hi").await;
    tokio::time::sleep(Duration::from_millis(200)).await;
    send_text(&mut server, "<think>more thoughts</think>").await;

    let reasoning = wait_for(&mut events, |e| {
        matches!(e, SessionEvent::Reasoning { text } if !text.is_empty())
    })
    .await;
    assert_eq!(
        reasoning,
        SessionEvent::Reasoning {
            text: "more thoughts".into()
        }
    );

    wait_for(&mut events, |e| matches!(e, SessionEvent::TurnEnded { .. })).await;
    // A restart would push the end past 200ms + quiet.
    let elapsed = started.elapsed();
    assert!(elapsed < Duration::from_millis(480), "{elapsed:?}");
    assert_eq!(
        handle.snapshot().await.unwrap().messages,
        vec![Message::assistant("Hi")]
    );

    handle.shutdown().await.unwrap();
}
