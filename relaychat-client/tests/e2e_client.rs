use std::{
    sync::mpsc::{Receiver, TryRecvError},
    time::Duration,
};

use bytes::{BufMut, BytesMut};
use relaychat_client::{
    Client, ClientConfig, ClientError, ClientEvent, CloseReason, ConnectionState, EventSink,
    StagingDir,
};
use relaychat_core::{
    TAG_MSG_FROM, TAG_MSG_TO, TAG_SEND_FILE, TAG_SUBMIT_NICK, TAG_TEXT, put_length, put_text,
    read_length, read_text,
};
use tokio::{
    io::{AsyncReadExt, AsyncWriteExt},
    net::{TcpListener, TcpStream},
    task::JoinHandle,
    time::{sleep, timeout},
};

struct Harness {
    client: Client,
    events: Receiver<ClientEvent>,
    server: TcpStream,
    dir: tempfile::TempDir,
}

#[tokio::test]
async fn roster_and_messages_flow_through_one_connection() {
    let mut h = connect("nina").await;

    send_frame(&mut h.server, &[TAG_TEXT, "USERLIST:nina,bob"]).await;
    assert_eq!(
        next_event(&h.events).await,
        ClientEvent::RosterChanged(vec!["bob".to_owned()])
    );
    assert_eq!(h.client.handle().roster(), vec!["bob".to_owned()]);

    send_frame(&mut h.server, &[TAG_MSG_FROM, "bob:hey: there"]).await;
    assert_eq!(
        next_event(&h.events).await,
        ClientEvent::ConversationOpened {
            peer: "bob".to_owned()
        }
    );
    assert_eq!(
        next_event(&h.events).await,
        ClientEvent::PeerMessage {
            from: "bob".to_owned(),
            text: "hey: there".to_owned(),
        }
    );
    assert_no_event(&h.events).await;

    // Unknown tags are skipped and the next frame still parses.
    send_frame(&mut h.server, &["PING"]).await;
    send_frame(&mut h.server, &[TAG_MSG_FROM, "bob:second"]).await;
    assert_eq!(
        next_event(&h.events).await,
        ClientEvent::PeerMessage {
            from: "bob".to_owned(),
            text: "second".to_owned(),
        }
    );
    assert_eq!(h.client.handle().sessions().len(), 1);

    let handle = h.client.handle();
    handle.send_text("bob", "hi bob").await.expect("send text");
    assert_eq!(read_text(&mut h.server).await.expect("tag"), TAG_MSG_TO);
    assert_eq!(read_text(&mut h.server).await.expect("to"), "bob");
    assert_eq!(read_text(&mut h.server).await.expect("text"), "hi bob");
    assert_eq!(
        next_event(&h.events).await,
        ClientEvent::MessageSent {
            to: "bob".to_owned(),
            text: "hi bob".to_owned(),
        }
    );

    handle.shutdown();
    assert_eq!(
        next_event(&h.events).await,
        ClientEvent::ConnectionClosed {
            reason: CloseReason::Shutdown
        }
    );
    assert_eq!(h.client.wait().await, CloseReason::Shutdown);

    let mut rest = Vec::new();
    timeout(Duration::from_secs(2), h.server.read_to_end(&mut rest))
        .await
        .expect("server sees eof")
        .expect("read to end");
    assert!(rest.is_empty());
}

#[tokio::test]
async fn announced_file_is_staged_and_framing_continues() {
    let mut h = connect("nina").await;

    let payload: Vec<u8> = (0..10_000_u32).map(|i| (i % 251) as u8).collect();
    let mut frame = BytesMut::new();
    put_text(&mut frame, TAG_SEND_FILE).expect("tag");
    put_text(&mut frame, "bob").expect("from");
    put_text(&mut frame, "notes.txt").expect("name");
    put_length(&mut frame, payload.len() as u64).expect("size");
    frame.extend_from_slice(&payload);
    put_text(&mut frame, TAG_MSG_FROM).expect("tag");
    put_text(&mut frame, "bob:did it arrive?").expect("payload");
    h.server.write_all(&frame).await.expect("write file frame");

    assert_eq!(
        next_event(&h.events).await,
        ClientEvent::ConversationOpened {
            peer: "bob".to_owned()
        }
    );
    let staged = match next_event(&h.events).await {
        ClientEvent::FileReceived {
            from,
            file_name,
            path,
        } => {
            assert_eq!(from, "bob");
            assert_eq!(file_name, "notes.txt");
            path
        }
        other => panic!("expected FileReceived, got {other:?}"),
    };
    assert_eq!(std::fs::read(&staged).expect("read staged"), payload);
    assert!(staged.starts_with(h.dir.path().canonicalize().expect("canonical")));

    assert_eq!(
        next_event(&h.events).await,
        ClientEvent::PeerMessage {
            from: "bob".to_owned(),
            text: "did it arrive?".to_owned(),
        }
    );
}

#[tokio::test]
async fn malformed_frames_are_skipped_without_closing() {
    let mut h = connect("nina").await;

    let mut frames = BytesMut::new();
    put_text(&mut frames, TAG_MSG_FROM).expect("tag");
    put_text(&mut frames, "no separator here").expect("payload");
    put_text(&mut frames, TAG_TEXT).expect("tag");
    put_text(&mut frames, "hello everyone").expect("payload");
    // `bob:` followed by an unpaired high surrogate.
    put_text(&mut frames, TAG_MSG_FROM).expect("tag");
    let body = b"bob:\xED\xA0\xBD";
    frames.put_u16(body.len() as u16);
    frames.extend_from_slice(body);
    put_text(&mut frames, TAG_MSG_FROM).expect("tag");
    put_text(&mut frames, "bob:after").expect("payload");
    h.server.write_all(&frames).await.expect("write frames");

    assert_eq!(
        next_event(&h.events).await,
        ClientEvent::ConversationOpened {
            peer: "bob".to_owned()
        }
    );
    assert_eq!(
        next_event(&h.events).await,
        ClientEvent::PeerMessage {
            from: "bob".to_owned(),
            text: "after".to_owned(),
        }
    );
    assert_no_event(&h.events).await;
    assert_eq!(h.client.handle().state(), ConnectionState::Ready);
}

#[tokio::test]
async fn staging_failure_is_reported_and_reading_continues() {
    let mut h = connect("nina").await;
    std::fs::remove_dir_all(h.dir.path().join("tempDownloads")).expect("remove staging");

    let mut frame = BytesMut::new();
    put_text(&mut frame, TAG_SEND_FILE).expect("tag");
    put_text(&mut frame, "bob").expect("from");
    put_text(&mut frame, "lost.bin").expect("name");
    put_length(&mut frame, 5000).expect("size");
    frame.extend_from_slice(&[3_u8; 5000]);
    put_text(&mut frame, TAG_MSG_FROM).expect("tag");
    put_text(&mut frame, "bob:still here").expect("payload");
    h.server.write_all(&frame).await.expect("write frames");

    match next_event(&h.events).await {
        ClientEvent::LocalError { peer, message } => {
            assert_eq!(peer.as_deref(), Some("bob"));
            assert!(message.contains("lost.bin"), "{message}");
        }
        other => panic!("expected LocalError, got {other:?}"),
    }
    assert_eq!(
        next_event(&h.events).await,
        ClientEvent::ConversationOpened {
            peer: "bob".to_owned()
        }
    );
    assert_eq!(
        next_event(&h.events).await,
        ClientEvent::PeerMessage {
            from: "bob".to_owned(),
            text: "still here".to_owned(),
        }
    );
    assert_no_event(&h.events).await;
    assert_eq!(h.client.handle().state(), ConnectionState::Ready);
}

#[tokio::test]
async fn outbound_file_is_streamed_after_its_header() {
    let mut h = connect("nina").await;

    let source = h.dir.path().join("report.bin");
    let body: Vec<u8> = (0..9_000_u32).map(|i| (i * 7 % 256) as u8).collect();
    std::fs::write(&source, &body).expect("write source");

    let sent = h
        .client
        .handle()
        .send_file("bob", &source)
        .await
        .expect("send file");
    assert_eq!(sent.size, body.len() as u64);

    assert_eq!(read_text(&mut h.server).await.expect("tag"), TAG_SEND_FILE);
    assert_eq!(read_text(&mut h.server).await.expect("to"), "bob");
    assert_eq!(read_text(&mut h.server).await.expect("name"), "report.bin");
    let size = read_length(&mut h.server).await.expect("size");
    assert_eq!(size, body.len() as u64);
    let mut received = vec![0_u8; size as usize];
    h.server
        .read_exact(&mut received)
        .await
        .expect("read body");
    assert_eq!(received, body);

    assert_eq!(
        next_event(&h.events).await,
        ClientEvent::ConversationOpened {
            peer: "bob".to_owned()
        }
    );
    assert_eq!(
        next_event(&h.events).await,
        ClientEvent::FileSent {
            to: "bob".to_owned(),
            file_name: "report.bin".to_owned(),
            size: body.len() as u64,
        }
    );
}

#[tokio::test]
async fn server_disconnect_closes_every_conversation() {
    let h = connect("nina").await;
    let handle = h.client.handle();
    let _ = handle.conversation("bob");
    assert_eq!(
        next_event(&h.events).await,
        ClientEvent::ConversationOpened {
            peer: "bob".to_owned()
        }
    );

    drop(h.server);

    assert_eq!(
        next_event(&h.events).await,
        ClientEvent::ConnectionClosed {
            reason: CloseReason::ServerClosed
        }
    );
    assert_eq!(h.client.wait().await, CloseReason::ServerClosed);
    assert_eq!(handle.state(), ConnectionState::Closed);

    let err = handle
        .send_text("bob", "anyone there?")
        .await
        .expect_err("send after close");
    assert!(matches!(err, ClientError::ConnectionClosed));
    assert!(
        handle
            .conversation("bob")
            .send_text("still?")
            .await
            .is_err()
    );
}

#[tokio::test]
async fn wrong_handshake_tag_is_rejected() {
    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
    let port = listener.local_addr().expect("addr").port();
    let server = tokio::spawn(async move {
        let (mut stream, _) = listener.accept().await.expect("accept");
        let mut frame = BytesMut::new();
        put_text(&mut frame, "WELCOME").expect("tag");
        stream.write_all(&frame).await.expect("write");
        stream
    });

    let dir = tempfile::tempdir().expect("create tempdir");
    let staging = StagingDir::prepare(dir.path().join("tempDownloads")).expect("staging");
    let mut config = ClientConfig::new("nina");
    config.port = port;
    let (events, _rx) = EventSink::channel();

    match Client::connect(&config, staging, events).await {
        Err(ClientError::HandshakeViolation { expected, received }) => {
            assert_eq!(expected, TAG_SUBMIT_NICK);
            assert_eq!(received, "WELCOME");
        }
        Err(other) => panic!("expected handshake violation, got {other}"),
        Ok(_) => panic!("handshake unexpectedly succeeded"),
    }
    let _ = server.await;
}

async fn connect(nickname: &str) -> Harness {
    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
    let port = listener.local_addr().expect("addr").port();
    let server: JoinHandle<(TcpStream, String)> = tokio::spawn(async move {
        let (mut stream, _) = listener.accept().await.expect("accept");
        send_frame(&mut stream, &[TAG_SUBMIT_NICK]).await;
        let nickname = read_text(&mut stream).await.expect("read nickname");
        (stream, nickname)
    });

    let dir = tempfile::tempdir().expect("create tempdir");
    let staging = StagingDir::prepare(dir.path().join("tempDownloads")).expect("staging");
    let mut config = ClientConfig::new(nickname);
    config.port = port;
    let (events, rx) = EventSink::channel();

    let client = Client::connect(&config, staging, events)
        .await
        .expect("connect");
    let (server, submitted) = timeout(Duration::from_secs(2), server)
        .await
        .expect("server handshake in time")
        .expect("server task");
    assert_eq!(submitted, nickname);
    assert_eq!(client.handle().state(), ConnectionState::Ready);
    assert_eq!(client.handle().nickname(), nickname);

    Harness {
        client,
        events: rx,
        server,
        dir,
    }
}

async fn send_frame(stream: &mut TcpStream, parts: &[&str]) {
    let mut frame = BytesMut::new();
    for part in parts {
        put_text(&mut frame, part).expect("encode part");
    }
    stream.write_all(&frame).await.expect("write frame");
}

/// Polls the std receiver without blocking the runtime the dispatcher runs on.
async fn next_event(events: &Receiver<ClientEvent>) -> ClientEvent {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(3);
    loop {
        match events.try_recv() {
            Ok(event) => return event,
            Err(TryRecvError::Disconnected) => panic!("event channel closed"),
            Err(TryRecvError::Empty) => {
                assert!(
                    tokio::time::Instant::now() < deadline,
                    "timed out waiting for an event"
                );
                sleep(Duration::from_millis(10)).await;
            }
        }
    }
}

async fn assert_no_event(events: &Receiver<ClientEvent>) {
    sleep(Duration::from_millis(150)).await;
    match events.try_recv() {
        Err(TryRecvError::Empty) => {}
        other => panic!("unexpected extra event: {other:?}"),
    }
}
