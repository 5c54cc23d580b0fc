//! End-to-end tests against a real relay on a loopback port.

use futures_util::{SinkExt, StreamExt};
use rendezvous_relay::config::Config;
use rendezvous_relay::server::{RelayEvent, RelayServer};
use rendezvous_types::{Key, PeerId, ServerMessage};
use std::net::SocketAddr;
use std::sync::atomic::Ordering;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::{self, Message};
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};

type Ws = WebSocketStream<MaybeTlsStream<TcpStream>>;

const WAIT: Duration = Duration::from_secs(5);

fn local_config() -> Config {
    let mut config = Config::default();
    config.server.host = "127.0.0.1".to_string();
    config.server.port = 0;
    config
}

async fn start_relay() -> (RelayServer, SocketAddr) {
    start_relay_with(local_config()).await
}

async fn start_relay_with(config: Config) -> (RelayServer, SocketAddr) {
    let server = RelayServer::new(config).unwrap();
    let addr = server.listen().await.unwrap();
    (server, addr)
}

async fn open(addr: SocketAddr, path: &str) -> Ws {
    let url = format!("ws://{}{}", addr, path);
    let (ws, _response) = tokio_tungstenite::connect_async(url.as_str())
        .await
        .unwrap_or_else(|e| panic!("connect {} failed: {}", url, e));
    ws
}

async fn register(addr: SocketAddr, id: &str) -> Ws {
    open(addr, &format!("/introduction/{}", id)).await
}

async fn join(ws: &mut Ws, id: &str, keys: &[&str]) {
    let keys: Vec<String> = keys.iter().map(|k| format!("\"{}\"", k)).collect();
    let frame = format!(r#"{{"type":"Join","id":"{}","join":[{}]}}"#, id, keys.join(","));
    ws.send(Message::Text(frame)).await.unwrap();
}

/// Next data frame as text, skipping control frames.
async fn next_text(ws: &mut Ws) -> String {
    loop {
        let frame = tokio::time::timeout(WAIT, ws.next())
            .await
            .expect("timed out waiting for a frame")
            .expect("socket closed")
            .expect("socket error");
        match frame {
            Message::Text(text) => return text,
            Message::Binary(data) => return String::from_utf8(data).unwrap(),
            Message::Close(_) => panic!("socket closed"),
            _ => continue,
        }
    }
}

async fn next_connect(ws: &mut Ws) -> (PeerId, Vec<Key>) {
    let text = next_text(ws).await;
    match ServerMessage::from_json(&text).unwrap() {
        ServerMessage::Connect(connect) => (connect.id, connect.keys),
    }
}

/// Whether the socket yields a data frame within `within`.
async fn receives_data(ws: &mut Ws, within: Duration) -> bool {
    let deadline = tokio::time::Instant::now() + within;
    loop {
        match tokio::time::timeout_at(deadline, ws.next()).await {
            Err(_) => return false,
            Ok(None) | Ok(Some(Err(_))) => return false,
            Ok(Some(Ok(Message::Text(_) | Message::Binary(_)))) => return true,
            Ok(Some(Ok(Message::Close(_)))) => return false,
            Ok(Some(Ok(_))) => continue,
        }
    }
}

/// Whether the socket reports closure within [`WAIT`].
async fn closes(ws: &mut Ws) -> bool {
    let deadline = tokio::time::Instant::now() + WAIT;
    loop {
        match tokio::time::timeout_at(deadline, ws.next()).await {
            Err(_) => return false,
            Ok(None) | Ok(Some(Err(_))) | Ok(Some(Ok(Message::Close(_)))) => return true,
            Ok(Some(Ok(_))) => continue,
        }
    }
}

async fn eventually(mut condition: impl FnMut() -> bool) {
    for _ in 0..500 {
        if condition() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("condition not reached");
}

fn has_key(server: &RelayServer, peer: &str, key: &str) -> bool {
    server
        .relay()
        .introductions()
        .registry()
        .keys(&PeerId::from(peer))
        .map(|keys| keys.contains(&Key::from(key)))
        .unwrap_or(false)
}

#[tokio::test]
async fn shared_key_introduces_both_peers() {
    let (server, addr) = start_relay().await;

    let mut local = register(addr, "local-1").await;
    let mut remote = register(addr, "remote-1").await;

    join(&mut local, "local-1", &["doc-42"]).await;
    eventually(|| has_key(&server, "local-1", "doc-42")).await;
    join(&mut remote, "remote-1", &["doc-42"]).await;

    assert_eq!(
        next_connect(&mut local).await,
        (PeerId::from("remote-1"), vec![Key::from("doc-42")])
    );
    assert_eq!(
        next_connect(&mut remote).await,
        (PeerId::from("local-1"), vec![Key::from("doc-42")])
    );

    // Exactly one each
    assert!(!receives_data(&mut local, Duration::from_millis(200)).await);
    assert!(!receives_data(&mut remote, Duration::from_millis(200)).await);

    server.close().await;
}

#[tokio::test]
async fn n_interested_peers_receive_all_directed_connects() {
    let (server, addr) = start_relay().await;
    let n = 4;

    let mut sockets = Vec::new();
    for i in 0..n {
        let id = format!("peer-{}", i);
        let mut ws = register(addr, &id).await;
        join(&mut ws, &id, &["room"]).await;
        eventually(|| has_key(&server, &id, "room")).await;
        sockets.push((id, ws));
    }

    let mut directed = 0;
    for (id, ws) in sockets.iter_mut() {
        for _ in 0..(n - 1) {
            let (other, keys) = next_connect(ws).await;
            assert_ne!(other.as_str(), id.as_str());
            assert_eq!(keys, vec![Key::from("room")]);
            directed += 1;
        }
    }
    assert_eq!(directed, n * (n - 1));

    server.close().await;
}

#[tokio::test]
async fn first_writer_bytes_reach_late_partner() {
    let (server, addr) = start_relay().await;

    let mut local = open(addr, "/connect/local-1/remote-1/doc-42").await;
    local.send(Message::Text("hello".to_string())).await.unwrap();
    eventually(|| server.relay().pending_count() == 1).await;

    let mut remote = open(addr, "/connect/remote-1/local-1/doc-42").await;
    assert_eq!(next_text(&mut remote).await, "hello");

    server.close().await;
}

#[tokio::test]
async fn buffered_frames_replay_in_order_then_pipe() {
    let (server, addr) = start_relay().await;

    let mut a = open(addr, "/connect/a/b/k").await;
    for i in 0..10 {
        a.send(Message::Text(format!("frame-{}", i))).await.unwrap();
    }
    a.send(Message::Binary(b"raw".to_vec())).await.unwrap();
    eventually(|| server.relay().pending_count() == 1).await;

    let mut b = open(addr, "/connect/b/a/k").await;
    for i in 0..10 {
        assert_eq!(next_text(&mut b).await, format!("frame-{}", i));
    }
    match tokio::time::timeout(WAIT, b.next()).await.unwrap().unwrap().unwrap() {
        Message::Binary(data) => assert_eq!(data, b"raw"),
        other => panic!("expected binary frame, got {:?}", other),
    }

    // Piped in both directions after the replay
    b.send(Message::Text("reply".to_string())).await.unwrap();
    assert_eq!(next_text(&mut a).await, "reply");
    a.send(Message::Text("live".to_string())).await.unwrap();
    assert_eq!(next_text(&mut b).await, "live");

    eventually(|| server.relay().active_pairs() == 1).await;
    assert_eq!(server.relay().pending_count(), 0);

    server.close().await;
}

/// Both sides write two frames; `first` connects and writes before `second`.
async fn exchange(first: &str, second: &str) -> (Vec<String>, Vec<String>) {
    let (server, addr) = start_relay().await;

    let mut ws_first = open(addr, &format!("/connect/{}/{}/k", first, second)).await;
    ws_first.send(Message::Text(format!("{}-1", first))).await.unwrap();
    ws_first.send(Message::Text(format!("{}-2", first))).await.unwrap();
    eventually(|| server.relay().pending_count() == 1).await;

    let mut ws_second = open(addr, &format!("/connect/{}/{}/k", second, first)).await;
    ws_second.send(Message::Text(format!("{}-1", second))).await.unwrap();
    ws_second.send(Message::Text(format!("{}-2", second))).await.unwrap();

    let got_second = vec![next_text(&mut ws_second).await, next_text(&mut ws_second).await];
    let got_first = vec![next_text(&mut ws_first).await, next_text(&mut ws_first).await];

    server.close().await;

    if first == "a" {
        (got_first, got_second)
    } else {
        (got_second, got_first)
    }
}

#[tokio::test]
async fn delivery_is_symmetric() {
    let (a_got, b_got) = exchange("a", "b").await;
    assert_eq!(a_got, vec!["b-1", "b-2"]);
    assert_eq!(b_got, vec!["a-1", "a-2"]);

    let (a_got, b_got) = exchange("b", "a").await;
    assert_eq!(a_got, vec!["b-1", "b-2"]);
    assert_eq!(b_got, vec!["a-1", "a-2"]);
}

#[tokio::test]
async fn orphaned_pending_connection_is_discarded() {
    let (server, addr) = start_relay().await;

    let mut a = open(addr, "/connect/a/b/k").await;
    a.send(Message::Text("lost".to_string())).await.unwrap();
    eventually(|| server.relay().pending_count() == 1).await;
    a.close(None).await.unwrap();

    eventually(|| {
        server
            .relay()
            .metrics()
            .pending_orphaned_total
            .load(Ordering::Relaxed)
            == 1
    })
    .await;
    assert_eq!(server.relay().pending_count(), 0);

    let mut b = open(addr, "/connect/b/a/k").await;
    assert!(!receives_data(&mut b, Duration::from_millis(300)).await);
    b.close(None).await.unwrap();

    // Relay keeps serving
    let mut c = register(addr, "c").await;
    join(&mut c, "c", &["k"]).await;
    eventually(|| has_key(&server, "c", "k")).await;

    server.close().await;
}

#[tokio::test]
async fn closing_one_side_closes_the_other() {
    let (server, addr) = start_relay().await;

    let mut a = open(addr, "/connect/a/b/k").await;
    eventually(|| server.relay().pending_count() == 1).await;
    let mut b = open(addr, "/connect/b/a/k").await;
    eventually(|| server.relay().active_pairs() == 1).await;

    a.close(None).await.unwrap();
    assert!(closes(&mut b).await);
    eventually(|| server.relay().active_pairs() == 0).await;

    server.close().await;
}

#[tokio::test]
async fn malformed_frame_keeps_registration_open() {
    let (server, addr) = start_relay().await;

    let mut a = register(addr, "a").await;
    let mut b = register(addr, "b").await;

    a.send(Message::Text("{not json".to_string())).await.unwrap();
    a.send(Message::Text(r#"{"type":"Join","peerId":"a","peerChannels":["k"]}"#.to_string()))
        .await
        .unwrap();
    join(&mut a, "a", &["k"]).await;
    eventually(|| has_key(&server, "a", "k")).await;
    join(&mut b, "b", &["k"]).await;

    assert_eq!(next_connect(&mut a).await.0, PeerId::from("b"));
    assert_eq!(
        server
            .relay()
            .metrics()
            .malformed_messages_total
            .load(Ordering::Relaxed),
        2
    );

    server.close().await;
}

#[tokio::test]
async fn reconnect_replaces_registration() {
    let (server, addr) = start_relay().await;

    let mut first = register(addr, "a").await;
    join(&mut first, "a", &["k"]).await;
    eventually(|| has_key(&server, "a", "k")).await;

    let _second = register(addr, "a").await;
    // The replaced connection is closed and the new one starts without keys
    assert!(closes(&mut first).await);
    eventually(|| {
        server.relay().total_peers() == 1 && !has_key(&server, "a", "k")
    })
    .await;

    server.close().await;
}

#[tokio::test]
async fn disconnect_purges_interest() {
    let (server, addr) = start_relay().await;

    let mut a = register(addr, "a").await;
    join(&mut a, "a", &["k"]).await;
    eventually(|| has_key(&server, "a", "k")).await;

    a.close(None).await.unwrap();
    eventually(|| server.relay().total_peers() == 0).await;

    let mut b = register(addr, "b").await;
    join(&mut b, "b", &["k"]).await;
    eventually(|| has_key(&server, "b", "k")).await;
    assert!(!receives_data(&mut b, Duration::from_millis(200)).await);

    server.close().await;
}

#[tokio::test]
async fn close_disconnects_clients_and_is_idempotent() {
    let (server, addr) = start_relay().await;

    let mut a = register(addr, "a").await;
    let mut pending = open(addr, "/connect/a/b/k").await;
    eventually(|| server.relay().total_peers() == 1 && server.relay().pending_count() == 1).await;

    server.close().await;
    server.close().await;

    assert!(closes(&mut a).await);
    assert!(closes(&mut pending).await);
    assert_eq!(server.relay().total_peers(), 0);
    assert_eq!(server.relay().pending_count(), 0);

    assert!(tokio_tungstenite::connect_async(format!("ws://{}/introduction/x", addr))
        .await
        .is_err());
}

#[tokio::test]
async fn connection_quota_refuses_with_429() {
    let mut config = local_config();
    config.limits.connections_per_second = 1;
    let (server, addr) = start_relay_with(config).await;

    let _first = register(addr, "a").await;
    match tokio_tungstenite::connect_async(format!("ws://{}/introduction/b", addr)).await {
        Err(tungstenite::Error::Http(response)) => assert_eq!(response.status(), 429),
        Err(e) => panic!("unexpected error: {}", e),
        Ok(_) => panic!("second connection should be refused"),
    }

    server.close().await;
}

#[tokio::test]
async fn message_quota_closes_registration() {
    let mut config = local_config();
    config.limits.messages_per_minute = 1;
    let (server, addr) = start_relay_with(config).await;

    let mut a = register(addr, "a").await;
    join(&mut a, "a", &["k1"]).await;
    eventually(|| has_key(&server, "a", "k1")).await;

    join(&mut a, "a", &["k2"]).await;
    let deadline = tokio::time::Instant::now() + WAIT;
    let close = loop {
        match tokio::time::timeout_at(deadline, a.next()).await {
            Ok(Some(Ok(Message::Close(frame)))) => break frame,
            Ok(Some(Ok(_))) => continue,
            other => panic!("expected a close frame, got {:?}", other),
        }
    };
    assert_eq!(
        close.map(|frame| frame.code),
        Some(tungstenite::protocol::frame::coding::CloseCode::Policy)
    );

    // Interest is purged with the registration
    eventually(|| server.relay().total_peers() == 0).await;
    assert!(!has_key(&server, "a", "k1"));
    assert_eq!(server.relay().metrics().rate_limit_hits.load(Ordering::Relaxed), 1);

    server.close().await;
}

#[tokio::test]
async fn events_describe_relay_activity() {
    let (server, addr) = start_relay().await;
    let mut events = server.subscribe();

    let mut a = register(addr, "a").await;
    let mut b = register(addr, "b").await;
    join(&mut a, "a", &["k"]).await;
    eventually(|| has_key(&server, "a", "k")).await;
    join(&mut b, "b", &["k"]).await;

    let mut seen = Vec::new();
    while seen.len() < 3 {
        let event = tokio::time::timeout(WAIT, events.recv()).await.unwrap().unwrap();
        seen.push(event);
    }

    assert!(matches!(seen[0], RelayEvent::PeerConnected(_)));
    assert!(matches!(seen[1], RelayEvent::PeerConnected(_)));
    assert_eq!(
        seen[2],
        RelayEvent::Introduced {
            a: PeerId::from("b"),
            b: PeerId::from("a"),
            keys: vec![Key::from("k")],
        }
    );

    server.close().await;
}

#[tokio::test]
async fn health_reports_counts_over_http() {
    let (server, addr) = start_relay().await;
    let _a = register(addr, "a").await;
    eventually(|| server.relay().total_peers() == 1).await;

    let mut stream = TcpStream::connect(addr).await.unwrap();
    stream
        .write_all(b"GET /health HTTP/1.1\r\nHost: localhost\r\nConnection: close\r\n\r\n")
        .await
        .unwrap();
    let mut response = String::new();
    stream.read_to_string(&mut response).await.unwrap();

    assert!(response.starts_with("HTTP/1.1 200"));
    assert!(response.contains("\"peers\":1"));

    server.close().await;
}
