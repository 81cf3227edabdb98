use std::{net::SocketAddr, rc::Rc, time::Duration};

use bytes::BytesMut;
use monoio::{
    io::{AsyncReadRent, AsyncWriteRentExt},
    net::TcpStream,
};
use monoio_ws_relay::{
    Identity, Registry, RelayClient, RelayConfig, Role, Server, connect, connect_with,
    protocol::frame::{Frame, codec::FrameEncoder},
    relay_message,
};

const UPGRADE_KEY: &str = "dGhlIHNhbXBsZSBub25jZQ==";

fn spawn_relay(config: RelayConfig) -> (SocketAddr, Rc<Registry>) {
    let server = Server::bind(config.listen("127.0.0.1:0".parse().unwrap()))
        .expect("Can't listen on localhost");
    let addr = server.local_addr().unwrap();
    let registry = server.registry();
    monoio::spawn(server.run());
    (addr, registry)
}

async fn wait_for(registry: &Registry, role: Role, len: usize) {
    for _ in 0..200 {
        if registry.len(role) == len {
            return;
        }
        monoio::time::sleep(Duration::from_millis(5)).await;
    }
    panic!(
        "expected {len} {role} connections, found {}",
        registry.len(role)
    );
}

async fn join_as_server(addr: SocketAddr) -> (RelayClient<TcpStream>, Identity) {
    let stream = TcpStream::connect(addr).await.unwrap();
    let identity = Identity::from(stream.local_addr().unwrap());
    let client = RelayClient::handshake(stream, &addr.to_string(), Role::Server, "User-Agent")
        .await
        .unwrap();
    (client, identity)
}

/// Sends a raw request and reads until the end of the response head or EOF.
async fn raw_exchange(addr: SocketAddr, request: String) -> String {
    let mut stream = TcpStream::connect(addr).await.unwrap();
    let (res, _) = stream.write_all(request.into_bytes()).await;
    res.unwrap();

    let mut response = Vec::new();
    loop {
        let (res, buf) = stream.read(Vec::with_capacity(1024)).await;
        let n = res.unwrap();
        if n == 0 {
            break;
        }
        response.extend_from_slice(&buf[..n]);
        if response.windows(4).any(|w| w == b"\r\n\r\n") {
            break;
        }
    }
    String::from_utf8(response).unwrap()
}

/// Reads exactly `len` bytes.
async fn read_exact(stream: &mut TcpStream, len: usize) -> Vec<u8> {
    let mut data = Vec::with_capacity(len);
    while data.len() < len {
        let (res, buf) = stream.read(Vec::with_capacity(len - data.len())).await;
        let n = res.unwrap();
        assert!(n > 0, "connection closed after {} of {len} bytes", data.len());
        data.extend_from_slice(&buf[..n]);
    }
    data
}

/// Reads one short unmasked text frame sent by the relay.
async fn read_relayed(stream: &mut TcpStream) -> String {
    let header = read_exact(stream, 2).await;
    assert_eq!(header[0], 0x81);
    assert!(header[1] < 126);
    let payload = read_exact(stream, header[1] as usize).await;
    String::from_utf8(payload).unwrap()
}

fn upgrade_request(agent: &str) -> String {
    format!(
        "GET / HTTP/1.1\r\n\
         Host: localhost\r\n\
         User-Agent: {agent}\r\n\
         Connection: Upgrade\r\n\
         Upgrade: websocket\r\n\
         Sec-WebSocket-Version: 13\r\n\
         Sec-WebSocket-Key: {UPGRADE_KEY}\r\n\
         \r\n"
    )
}

#[monoio::test(timer_enabled = true)]
async fn server_message_reaches_client() {
    let (addr, registry) = spawn_relay(RelayConfig::default());

    let mut client = connect(addr, Role::Client).await.unwrap();
    wait_for(&registry, Role::Client, 1).await;
    let (mut server, identity) = join_as_server(addr).await;
    wait_for(&registry, Role::Server, 1).await;

    server.send_text("ping").await.unwrap();
    assert_eq!(
        client.read_text().await.unwrap(),
        Some(relay_message(identity, "ping"))
    );
}

#[monoio::test(timer_enabled = true)]
async fn every_client_receives_every_server_message() {
    let (addr, registry) = spawn_relay(RelayConfig::default());

    let mut clients = Vec::new();
    for _ in 0..3 {
        clients.push(connect(addr, Role::Client).await.unwrap());
    }
    wait_for(&registry, Role::Client, 3).await;

    let (mut first, first_id) = join_as_server(addr).await;
    let (mut second, second_id) = join_as_server(addr).await;
    wait_for(&registry, Role::Server, 2).await;

    first.send_text("one").await.unwrap();
    for client in &mut clients {
        assert_eq!(
            client.read_text().await.unwrap(),
            Some(relay_message(first_id, "one"))
        );
    }

    second.send_text("two").await.unwrap();
    for client in &mut clients {
        assert_eq!(
            client.read_text().await.unwrap(),
            Some(relay_message(second_id, "two"))
        );
    }
}

#[monoio::test(timer_enabled = true)]
async fn client_messages_are_not_relayed() {
    let (addr, registry) = spawn_relay(RelayConfig::default());

    let mut sender = connect(addr, Role::Client).await.unwrap();
    let mut listener = connect(addr, Role::Client).await.unwrap();
    let (mut server, _) = join_as_server(addr).await;
    wait_for(&registry, Role::Client, 2).await;
    wait_for(&registry, Role::Server, 1).await;

    sender.send_text("hello from a client").await.unwrap();

    let quiet = Duration::from_millis(100);
    assert!(monoio::time::timeout(quiet, listener.read_text()).await.is_err());
    assert!(monoio::time::timeout(quiet, server.read_text()).await.is_err());
}

#[monoio::test(timer_enabled = true)]
async fn handshake_reply_is_exact() {
    let (addr, _) = spawn_relay(RelayConfig::default());

    let response = raw_exchange(addr, upgrade_request("client")).await;
    assert_eq!(
        response,
        "HTTP/1.1 101 Web Socket Protocol Handshake\r\n\
         Upgrade: websocket\r\n\
         Sec-WebSocket-Accept: s3pPLMBiTxaQ9kYGzzhZRbK+xOo=\r\n\
         Connection: Upgrade\r\n\
         \r\n"
    );
}

#[monoio::test(timer_enabled = true)]
async fn refused_handshake_does_not_stop_the_listener() {
    let (addr, registry) = spawn_relay(RelayConfig::default());

    let response = raw_exchange(addr, upgrade_request("curl/8.0")).await;
    assert!(response.starts_with("HTTP/1.1 400 Bad Request\r\n"));
    assert!(registry.is_empty());

    let _client = connect(addr, Role::Client).await.unwrap();
    wait_for(&registry, Role::Client, 1).await;
}

#[monoio::test(timer_enabled = true)]
async fn custom_role_header() {
    let config = RelayConfig::default().role_header("X-Relay-Role");
    let (addr, registry) = spawn_relay(config);

    let mut client = connect_with(addr, Role::Client, "X-Relay-Role").await.unwrap();
    let mut server = connect_with(addr, Role::Server, "X-Relay-Role").await.unwrap();
    wait_for(&registry, Role::Client, 1).await;
    wait_for(&registry, Role::Server, 1).await;

    server.send_text("custom").await.unwrap();
    let relayed = client.read_text().await.unwrap().unwrap();
    assert!(relayed.ends_with(": custom\""));

    // the default header no longer selects a role
    assert!(connect(addr, Role::Client).await.is_err());
}

#[monoio::test(timer_enabled = true)]
async fn stalled_handshake_times_out() {
    let config = RelayConfig::default().handshake_timeout(Duration::from_millis(50));
    let (addr, registry) = spawn_relay(config);

    let mut stalled = TcpStream::connect(addr).await.unwrap();
    let (res, _) = stalled.write_all(&b"GET / HTTP/1.1\r\n"[..]).await;
    res.unwrap();
    let (res, _) = stalled.read(Vec::with_capacity(64)).await;
    assert_eq!(res.unwrap(), 0);

    let _client = connect(addr, Role::Client).await.unwrap();
    wait_for(&registry, Role::Client, 1).await;
}

#[monoio::test(timer_enabled = true)]
async fn departed_client_is_deregistered() {
    let (addr, registry) = spawn_relay(RelayConfig::default());

    let leaving = connect(addr, Role::Client).await.unwrap();
    let mut staying = connect(addr, Role::Client).await.unwrap();
    let (mut server, identity) = join_as_server(addr).await;
    wait_for(&registry, Role::Client, 2).await;
    wait_for(&registry, Role::Server, 1).await;

    leaving.close().await.unwrap();
    wait_for(&registry, Role::Client, 1).await;

    server.send_text("after").await.unwrap();
    assert_eq!(
        staying.read_text().await.unwrap(),
        Some(relay_message(identity, "after"))
    );
}

#[monoio::test(timer_enabled = true)]
async fn connection_limit() {
    let config = RelayConfig::default().max_connections(Some(1));
    let (addr, registry) = spawn_relay(config);

    let first = connect(addr, Role::Client).await.unwrap();
    wait_for(&registry, Role::Client, 1).await;
    assert!(connect(addr, Role::Client).await.is_err());

    first.close().await.unwrap();
    wait_for(&registry, Role::Client, 0).await;
    // the slot is freed once the connection task has finished
    monoio::time::sleep(Duration::from_millis(50)).await;
    let _again = connect(addr, Role::Client).await.unwrap();
    wait_for(&registry, Role::Client, 1).await;
}

#[monoio::test(timer_enabled = true)]
async fn broadcast_does_not_cut_a_partly_received_frame() {
    let (addr, registry) = spawn_relay(RelayConfig::default());

    let mut raw = TcpStream::connect(addr).await.unwrap();
    let (res, _) = raw.write_all(upgrade_request("client").into_bytes()).await;
    res.unwrap();
    let response = read_exact(&mut raw, 139).await;
    assert!(response.ends_with(b"\r\n\r\n"));
    wait_for(&registry, Role::Client, 1).await;

    let (mut server, identity) = join_as_server(addr).await;
    wait_for(&registry, Role::Server, 1).await;

    let mut frame = Frame::text("a".repeat(200));
    frame.set_mask([0x11, 0x22, 0x33, 0x44]);
    let mut encoded = BytesMut::new();
    FrameEncoder::write_frame(frame, &mut encoded);
    assert_eq!(encoded.len(), 208);
    let tail = encoded.split_off(58);

    let (res, _) = raw.write_all(encoded.freeze()).await;
    res.unwrap();
    monoio::time::sleep(Duration::from_millis(20)).await;

    server.send_text("x").await.unwrap();
    assert_eq!(read_relayed(&mut raw).await, relay_message(identity, "x"));

    let (res, _) = raw.write_all(tail.freeze()).await;
    res.unwrap();
    monoio::time::sleep(Duration::from_millis(20)).await;
    assert_eq!(registry.len(Role::Client), 1);

    server.send_text("y").await.unwrap();
    assert_eq!(read_relayed(&mut raw).await, relay_message(identity, "y"));
}
