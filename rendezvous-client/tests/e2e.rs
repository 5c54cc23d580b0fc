//! Client tests against a real relay on a loopback port.

use rendezvous_client::{
    BackoffConfig, ClientConfig, ClientEvent, DirectSocket, Key, PeerId, RegistrationState,
    RelayClient,
};
use rendezvous_relay::config::Config;
use rendezvous_relay::server::RelayServer;
use std::net::SocketAddr;
use std::sync::atomic::Ordering;
use std::time::Duration;
use tokio::sync::broadcast;

const WAIT: Duration = Duration::from_secs(5);

fn relay_config(port: u16) -> Config {
    let mut config = Config::default();
    config.server.host = "127.0.0.1".to_string();
    config.server.port = port;
    config
}

async fn start_relay(port: u16) -> (RelayServer, SocketAddr) {
    start_relay_with(relay_config(port)).await
}

async fn start_relay_with(config: Config) -> (RelayServer, SocketAddr) {
    let server = RelayServer::new(config).unwrap();
    let addr = server.listen().await.unwrap();
    (server, addr)
}

fn client(addr: SocketAddr, id: &str) -> RelayClient {
    let config = ClientConfig::new(&format!("ws://{}", addr))
        .with_peer_id(id)
        .with_backoff(BackoffConfig::default().with_initial_delay(Duration::from_millis(20)));
    RelayClient::new(config).unwrap()
}

async fn wait_state(client: &RelayClient, wanted: impl Fn(&RegistrationState) -> bool) {
    let mut state = client.watch_state();
    tokio::time::timeout(WAIT, state.wait_for(|s| wanted(s)))
        .await
        .expect("timed out waiting for state")
        .expect("state channel closed");
}

/// Wait for the direct socket to `peer` for `key`.
async fn next_socket(
    events: &mut broadcast::Receiver<ClientEvent>,
    peer: &str,
    key: &str,
) -> DirectSocket {
    let peer = PeerId::from(peer);
    let key = Key::from(key);
    loop {
        let event = tokio::time::timeout(WAIT, events.recv())
            .await
            .expect("timed out waiting for a direct socket")
            .expect("event channel closed");
        if let ClientEvent::Peer {
            peer: p,
            key: k,
            socket,
        } = event
        {
            if p == peer && k == key {
                return socket;
            }
        }
    }
}

async fn recv(socket: &DirectSocket) -> Vec<u8> {
    tokio::time::timeout(WAIT, socket.recv())
        .await
        .expect("timed out waiting for data")
        .expect("socket closed")
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

fn relay_has_key(server: &RelayServer, peer: &str, key: &str) -> bool {
    server
        .relay()
        .introductions()
        .registry()
        .keys(&PeerId::from(peer))
        .map(|keys| keys.contains(&Key::from(key)))
        .unwrap_or(false)
}

#[tokio::test]
async fn registration_reaches_open() {
    let (server, addr) = start_relay(0).await;
    let local = client(addr, "local-1");

    wait_state(&local, RegistrationState::is_open).await;
    assert_eq!(local.id(), &PeerId::from("local-1"));
    eventually(|| server.relay().total_peers() == 1).await;

    local.close().await;
    server.close().await;
}

#[tokio::test]
async fn shared_key_opens_direct_sockets_both_ways() {
    let (server, addr) = start_relay(0).await;
    let local = client(addr, "local-1");
    let remote = client(addr, "remote-1");
    let mut local_events = local.subscribe();
    let mut remote_events = remote.subscribe();

    local.join("doc-42").unwrap();
    remote.join("doc-42").unwrap();

    let to_remote = next_socket(&mut local_events, "remote-1", "doc-42").await;
    let to_local = next_socket(&mut remote_events, "local-1", "doc-42").await;

    to_remote.send(b"hello".to_vec()).unwrap();
    assert_eq!(recv(&to_local).await, b"hello");

    to_local.send_text("world").unwrap();
    assert_eq!(recv(&to_remote).await, b"world");

    let handle = local.peer(&PeerId::from("remote-1")).unwrap();
    assert!(handle.has(&Key::from("doc-42")));
    assert_eq!(local.peers(), vec![PeerId::from("remote-1")]);

    local.close().await;
    remote.close().await;
    server.close().await;
}

#[tokio::test]
async fn closing_direct_socket_reaches_partner() {
    let (server, addr) = start_relay(0).await;
    let local = client(addr, "local-1");
    let remote = client(addr, "remote-1");
    let mut local_events = local.subscribe();
    let mut remote_events = remote.subscribe();

    local.join("doc-42").unwrap();
    remote.join("doc-42").unwrap();
    let to_remote = next_socket(&mut local_events, "remote-1", "doc-42").await;
    let to_local = next_socket(&mut remote_events, "local-1", "doc-42").await;

    // Make sure the pipe is established before closing
    to_remote.send(b"ping".to_vec()).unwrap();
    assert_eq!(recv(&to_local).await, b"ping");

    let handle = local.peer(&PeerId::from("remote-1")).unwrap();
    assert!(handle.close(&Key::from("doc-42")));
    assert!(!handle.has(&Key::from("doc-42")));

    let ended = tokio::time::timeout(WAIT, to_local.recv()).await.unwrap();
    assert!(ended.is_none());
    eventually(|| to_local.is_closed()).await;

    local.close().await;
    remote.close().await;
    server.close().await;
}

#[tokio::test]
async fn leave_drops_interest_on_relay() {
    let (server, addr) = start_relay(0).await;
    let local = client(addr, "local-1");
    wait_state(&local, RegistrationState::is_open).await;

    local.join("doc-42").unwrap();
    eventually(|| relay_has_key(&server, "local-1", "doc-42")).await;

    local.leave("doc-42").unwrap();
    eventually(|| !relay_has_key(&server, "local-1", "doc-42")).await;
    assert!(local.joined_keys().is_empty());

    local.close().await;
    server.close().await;
}

#[tokio::test]
async fn rate_limited_leave_resyncs_through_reconnect() {
    let mut config = relay_config(0);
    // Burst of 60, refilling one per second
    config.limits.messages_per_minute = 60;
    let (server, addr) = start_relay_with(config).await;
    let local = client(addr, "local-1");
    wait_state(&local, RegistrationState::is_open).await;

    let keys: Vec<String> = (0..60).map(|i| format!("doc-{}", i)).collect();
    for key in &keys {
        local.join(key.as_str()).unwrap();
    }
    eventually(|| relay_has_key(&server, "local-1", "doc-59")).await;

    // Over quota: the relay closes the registration instead of dropping it
    local.leave("doc-0").unwrap();

    eventually(|| {
        !relay_has_key(&server, "local-1", "doc-0") && relay_has_key(&server, "local-1", "doc-1")
    })
    .await;
    wait_state(&local, RegistrationState::is_open).await;
    assert_eq!(local.joined_keys().len(), 59);
    assert!(server.relay().metrics().rate_limit_hits.load(Ordering::Relaxed) >= 1);

    local.close().await;
    server.close().await;
}

#[tokio::test]
async fn keys_reannounced_after_relay_restart() {
    let (server, addr) = start_relay(0).await;
    let local = client(addr, "local-1");
    local.join("doc-42").unwrap();
    local.join("doc-7").unwrap();
    eventually(|| relay_has_key(&server, "local-1", "doc-42")).await;

    server.close().await;
    wait_state(&local, |s| matches!(s, RegistrationState::Closed { .. })).await;

    let (restarted, _) = start_relay(addr.port()).await;
    wait_state(&local, RegistrationState::is_open).await;
    eventually(|| {
        relay_has_key(&restarted, "local-1", "doc-42") && relay_has_key(&restarted, "local-1", "doc-7")
    })
    .await;

    local.close().await;
    restarted.close().await;
}

#[tokio::test]
async fn close_unregisters_from_relay() {
    let (server, addr) = start_relay(0).await;
    let local = client(addr, "local-1");
    let mut events = local.subscribe();
    local.join("doc-42").unwrap();
    eventually(|| relay_has_key(&server, "local-1", "doc-42")).await;

    local.close().await;
    assert_eq!(local.state(), RegistrationState::Stopped);
    eventually(|| server.relay().total_peers() == 0).await;

    let mut saw_stopped = false;
    while let Ok(event) = events.try_recv() {
        if let ClientEvent::StateChanged(RegistrationState::Stopped) = event {
            saw_stopped = true;
        }
    }
    assert!(saw_stopped);

    server.close().await;
}
