//! Integration tests running real clients against a real server.

use ntables_client::{Client, ClientConfig, ClientError, ClientHandshakeState};
use ntables_core::{
    ConnectionState, Endpoint, EntryFlags, EntryValue, Participant, ParticipantEvent,
};
use ntables_protocol::Message;
use ntables_server::{Server, ServerConfig};
use std::net::SocketAddr;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;
use tokio::time::{sleep, timeout};

const WAIT: Duration = Duration::from_secs(5);

async fn start_server(identity: &str) -> (Server, SocketAddr) {
    let server = Server::new(
        ServerConfig::new("127.0.0.1:0".parse().unwrap()).with_identity(identity),
    );
    let addr = server.start().await.unwrap();
    (server, addr)
}

fn client_for(identity: &str, addr: SocketAddr) -> Client {
    Client::new(
        ClientConfig::new(identity, Endpoint::new("127.0.0.1", addr.port()))
            .with_reconnect_delay(Duration::from_millis(50)),
    )
}

async fn connected_client(identity: &str, addr: SocketAddr) -> Client {
    let client = client_for(identity, addr);
    client.start();
    timeout(WAIT, client.wait_connected())
        .await
        .expect("handshake timed out")
        .unwrap();
    client
}

/// Polls `condition` until it holds or the wait runs out.
async fn eventually(what: &str, mut condition: impl FnMut() -> bool) {
    let polled = timeout(WAIT, async {
        while !condition() {
            sleep(Duration::from_millis(10)).await;
        }
    })
    .await;
    assert!(polled.is_ok(), "timed out waiting for {what}");
}

#[tokio::test]
async fn handshake_reconciles_pending_entries() {
    let (server, addr) = start_server("field").await;
    server.set_boolean("B", true);
    server.set_string("C", "server");

    let client = client_for("robot", addr);
    client.set_double("A", 1.0);
    assert_eq!(client.pending_count(), 1);

    client.start();
    timeout(WAIT, client.wait_connected()).await.unwrap().unwrap();
    assert_eq!(client.handshake_state(), ClientHandshakeState::Complete);
    assert_eq!(client.server_identity().as_deref(), Some("field"));

    for name in ["B", "C"] {
        let ours = client.entry(name).unwrap();
        let theirs = server.entry(name).unwrap();
        assert_eq!(ours.id, theirs.id);
        assert_eq!(ours.value, theirs.value);
    }

    eventually("A to be assigned", || client.pending_count() == 0).await;
    let assigned = client.entry("A").unwrap();
    assert_eq!(server.entry("A").unwrap().id, assigned.id);
    assert_eq!(server.get_double("A").unwrap(), 1.0);
}

#[tokio::test]
async fn server_value_wins_on_handshake() {
    let (server, addr) = start_server("field").await;
    server.set_double("X", 7.0);

    let client = client_for("robot", addr);
    client.set_double("X", 1.0);
    client.start();
    timeout(WAIT, client.wait_connected()).await.unwrap().unwrap();

    assert_eq!(client.get_double("X").unwrap(), 7.0);
    assert_eq!(server.get_double("X").unwrap(), 7.0);
    assert_eq!(client.pending_count(), 0);
}

#[tokio::test]
async fn updates_flow_between_clients() {
    let (server, addr) = start_server("field").await;
    let first = connected_client("first", addr).await;
    let second = connected_client("second", addr).await;

    first.set_double("/speed", 1.0);
    eventually("second to see /speed", || second.entry("/speed").is_some()).await;
    assert_eq!(second.get_double("/speed").unwrap(), 1.0);

    second.set_double("/speed", 2.0);
    eventually("first to see the update", || {
        first.get_double("/speed").ok() == Some(2.0)
    })
    .await;
    let entry = server.entry("/speed").unwrap();
    assert_eq!(entry.seq, 1);
    assert_eq!(entry.value, EntryValue::Double(2.0));

    server.set_double("/speed", 3.0);
    eventually("server write to reach both", || {
        first.get_double("/speed").ok() == Some(3.0)
            && second.get_double("/speed").ok() == Some(3.0)
    })
    .await;
    assert_eq!(first.entry("/speed").unwrap().seq, 2);
}

#[tokio::test]
async fn flags_delete_and_clear_propagate() {
    let (server, addr) = start_server("field").await;
    let first = connected_client("first", addr).await;
    let second = connected_client("second", addr).await;

    first.set_string("/name", "robot");
    first.set_boolean("/enabled", false);
    eventually("second to see both entries", || {
        second.entries_with_prefix("/").len() == 2
    })
    .await;

    assert!(second.set_entry_flags("/name", EntryFlags::persistent()));
    eventually("flags to reach first", || {
        first.entry("/name").map(|e| e.flags.persistent) == Some(true)
    })
    .await;
    assert!(server.entry("/name").unwrap().flags.persistent);

    assert!(second.delete_entry("/name"));
    eventually("delete to reach first", || first.entry("/name").is_none()).await;
    assert!(server.entry("/name").is_none());

    first.clear_all();
    eventually("clear to reach second", || second.entries_with_prefix("").is_empty()).await;
    eventually("clear to reach server", || server.entries_with_prefix("").is_empty()).await;
}

#[tokio::test]
async fn retarget_moves_client_to_new_server() {
    let (_old, old_addr) = start_server("old").await;
    let (target, new_addr) = start_server("new").await;

    let client = connected_client("robot", old_addr).await;
    client.set_double("/carried", 4.0);
    eventually("entry to be assigned", || client.pending_count() == 0).await;

    let mut events = client.subscribe();
    client.set_port(new_addr.port());

    let mut transitions = Vec::new();
    timeout(WAIT, async {
        loop {
            if let Ok(ParticipantEvent::ConnectionStateChanged { new, .. }) = events.recv().await
            {
                transitions.push(new);
                if new == ConnectionState::Connected {
                    break;
                }
            }
        }
    })
    .await
    .expect("client never reconnected");

    assert_eq!(
        transitions,
        vec![
            ConnectionState::NotConnected,
            ConnectionState::Connecting,
            ConnectionState::Connected
        ]
    );
    assert_eq!(client.server_identity().as_deref(), Some("new"));
    eventually("entry to reach the new server", || target.entry("/carried").is_some()).await;
    assert_eq!(target.get_double("/carried").unwrap(), 4.0);
}

#[tokio::test]
async fn client_survives_server_restart() {
    let (server, addr) = start_server("field").await;
    let client = connected_client("robot", addr).await;
    server.set_double("/kept", 1.0);
    eventually("entry to arrive", || client.entry("/kept").is_some()).await;

    server.stop().unwrap();
    eventually("client to notice", || {
        client.connection_state() == ConnectionState::NotConnected
    })
    .await;

    client.set_double("/offline", 2.0);
    assert_eq!(client.pending_count(), 1);

    let (replacement, new_addr) = start_server("replacement").await;
    client.set_port(new_addr.port());
    timeout(WAIT, client.wait_connected()).await.unwrap().unwrap();
    eventually("offline write to be assigned", || client.pending_count() == 0).await;
    assert!(replacement.entry("/kept").is_some());
    assert_eq!(replacement.get_double("/offline").unwrap(), 2.0);
}

#[tokio::test]
async fn protocol_rejection_is_reported() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        let (mut stream, _) = listener.accept().await.unwrap();
        let mut hello = [0u8; 64];
        let _ = stream.read(&mut hello).await.unwrap();
        let reply = Message::ProtoVersionUnsupported { major: 2, minor: 0 }
            .encode()
            .unwrap();
        stream.write_all(&reply).await.unwrap();
        // Hold the socket open until the client hangs up.
        let _ = stream.read(&mut hello).await;
    });

    let client = client_for("robot", addr);
    client.start();
    let result = timeout(WAIT, client.wait_connected()).await.unwrap();
    assert!(matches!(
        result,
        Err(ClientError::ProtocolUnsupported { major: 2, minor: 0 })
    ));
    assert_eq!(client.connection_state(), ConnectionState::NotConnected);
}

#[tokio::test]
async fn keep_alives_do_not_disturb_the_session() {
    let (server, addr) = start_server("field").await;
    let client = Client::new(
        ClientConfig::new("robot", Endpoint::new("127.0.0.1", addr.port()))
            .with_keep_alive_interval(Duration::from_millis(20)),
    );
    client.start();
    timeout(WAIT, client.wait_connected()).await.unwrap().unwrap();

    sleep(Duration::from_millis(150)).await;
    assert_eq!(client.connection_state(), ConnectionState::Connected);
    assert_eq!(server.connection_count(), 1);

    client.set_boolean("/alive", true);
    eventually("write after keep-alives", || server.entry("/alive").is_some()).await;
}
