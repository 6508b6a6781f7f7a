use bercon::checksum;
use bercon::packet::{self, PacketReader, PacketType, CHECKSUM_OFFSET};
use bercon::server::RconServer;
use std::net::{SocketAddr, UdpSocket};
use std::thread;
use std::time::{Duration, Instant};

const RESPONSE_TIMEOUT: Duration = Duration::from_secs(2);

// Client-side framing. The crate only builds server-to-client datagrams, so
// tests assemble client packets by hand, straight from the header rules.
fn frame(body: &[u8]) -> Vec<u8> {
    let mut covered = vec![0xff];
    covered.extend_from_slice(body);
    let crc = checksum::compute(&covered);

    let mut out = Vec::new();
    out.extend_from_slice(b"BE");
    out.extend_from_slice(&crc.to_le_bytes());
    out.push(0xff);
    out.extend_from_slice(body);
    out
}

fn login_packet(password: &[u8]) -> Vec<u8> {
    let mut body = vec![0x00];
    body.extend_from_slice(password);
    frame(&body)
}

fn command_packet(seq: u8, command: &[u8]) -> Vec<u8> {
    let mut body = vec![0x01, seq];
    body.extend_from_slice(command);
    frame(&body)
}

fn ack_packet(seq: u8) -> Vec<u8> {
    frame(&[0x02, seq])
}

fn spawn_listen(server: &RconServer) -> SocketAddr {
    let listener = server.clone();
    thread::spawn(move || {
        let _ = listener.listen();
    });

    for _ in 0..200 {
        if let Some(addr) = server.local_addr() {
            return addr;
        }
        thread::sleep(Duration::from_millis(5));
    }
    panic!("server did not bind in time");
}

fn client() -> UdpSocket {
    let socket = UdpSocket::bind("127.0.0.1:0").expect("client bind");
    socket
        .set_read_timeout(Some(RESPONSE_TIMEOUT))
        .expect("set read timeout");
    socket
}

fn recv(socket: &UdpSocket) -> Vec<u8> {
    let mut buf = [0u8; 4096];
    let (len, _) = socket.recv_from(&mut buf).expect("expected a response");
    buf[..len].to_vec()
}

fn try_recv(socket: &UdpSocket, timeout: Duration) -> Option<Vec<u8>> {
    let mut buf = [0u8; 4096];
    socket.set_read_timeout(Some(timeout)).expect("set timeout");
    let result = socket.recv_from(&mut buf).ok();
    socket
        .set_read_timeout(Some(RESPONSE_TIMEOUT))
        .expect("restore timeout");
    result.map(|(len, _)| buf[..len].to_vec())
}

// Checks framing and returns (packet type, bytes after the type).
fn parse(data: &[u8]) -> (PacketType, Vec<u8>) {
    let mut reader = PacketReader::new(data);
    let header = reader.read_header().expect("valid header");
    assert!(
        checksum::verify(&data[CHECKSUM_OFFSET..], header.checksum),
        "response failed checksum verification"
    );
    let packet_type = reader.read_packet_type().expect("packet type");
    let rest = if reader.is_empty() {
        Vec::new()
    } else {
        reader.read_command().expect("body").to_vec()
    };
    (packet_type, rest)
}

fn login(socket: &UdpSocket, server: SocketAddr, password: &[u8]) {
    socket
        .send_to(&login_packet(password), server)
        .expect("send login");
    let (packet_type, rest) = parse(&recv(socket));
    assert_eq!(packet_type, PacketType::Login);
    assert_eq!(rest, vec![0x01], "expected a successful login response");
}

#[test]
fn login_with_correct_password_creates_a_session() {
    let server = RconServer::new("127.0.0.1", 0, "secret");
    let addr = spawn_listen(&server);

    let socket = client();
    login(&socket, addr, b"secret");

    let local = socket.local_addr().expect("client addr");
    assert_eq!(server.clients(), vec![local]);
}

#[test]
fn login_with_wrong_password_is_rejected_without_a_session() {
    let server = RconServer::new("127.0.0.1", 0, "secret");
    let addr = spawn_listen(&server);

    let socket = client();
    socket
        .send_to(&login_packet(b"nope"), addr)
        .expect("send login");

    let (packet_type, rest) = parse(&recv(&socket));
    assert_eq!(packet_type, PacketType::Login);
    assert_eq!(rest, vec![0x00]);
    assert!(server.clients().is_empty());
}

#[test]
fn five_wrong_passwords_block_the_source_silently() {
    let server = RconServer::new("127.0.0.1", 0, "x");
    let addr = spawn_listen(&server);

    let socket = client();
    for _ in 0..5 {
        socket
            .send_to(&login_packet(b"wrong"), addr)
            .expect("send login");
        let (packet_type, rest) = parse(&recv(&socket));
        assert_eq!(packet_type, PacketType::Login);
        assert_eq!(rest, vec![0x00]);
    }

    // The block lands after the fifth failure response is written; give the
    // handler thread a moment to finish.
    thread::sleep(Duration::from_millis(300));

    // Even a correct password gets nothing back now.
    socket
        .send_to(&login_packet(b"x"), addr)
        .expect("send login");
    assert_eq!(try_recv(&socket, Duration::from_millis(800)), None);
    assert!(server.clients().is_empty());
}

#[test]
fn unauthenticated_commands_are_ignored() {
    let server = RconServer::new("127.0.0.1", 0, "secret");
    let addr = spawn_listen(&server);

    let socket = client();
    socket
        .send_to(&command_packet(1, b"players"), addr)
        .expect("send command");

    assert_eq!(try_recv(&socket, Duration::from_millis(800)), None);
    assert!(server.clients().is_empty());
}

#[test]
fn keep_alive_is_echoed_with_the_same_sequence() {
    let server = RconServer::new("127.0.0.1", 0, "secret");
    let addr = spawn_listen(&server);

    let socket = client();
    login(&socket, addr, b"secret");

    socket
        .send_to(&command_packet(0x42, b""), addr)
        .expect("send keep-alive");

    let data = recv(&socket);
    let mut reader = PacketReader::new(&data);
    reader.read_header().expect("valid header");
    assert_eq!(reader.read_packet_type(), Ok(PacketType::Command));
    assert_eq!(reader.read_sequence(), Ok(0x42));
    assert!(reader.is_empty(), "keep-alive response carries no payload");

    // The session survived the exchange.
    let local = socket.local_addr().expect("client addr");
    assert_eq!(server.clients(), vec![local]);
}

#[test]
fn commands_reach_the_callback_and_replies_reach_the_client() {
    let server = RconServer::new("127.0.0.1", 0, "secret");
    let handle = server.clone();
    let server = server.on_command(move |seq, command, from| {
        let reply = packet::command_response(seq, format!("echo {command}").as_bytes());
        handle.send_response(from, &reply).expect("send reply");
    });
    let addr = spawn_listen(&server);

    let socket = client();
    login(&socket, addr, b"secret");

    socket
        .send_to(&command_packet(9, b"status"), addr)
        .expect("send command");

    let data = recv(&socket);
    let mut reader = PacketReader::new(&data);
    reader.read_header().expect("valid header");
    assert_eq!(reader.read_packet_type(), Ok(PacketType::Command));
    assert_eq!(reader.read_sequence(), Ok(9));
    assert_eq!(reader.read_command(), Ok(&b"echo status"[..]));
}

#[test]
fn checksum_mismatch_is_dropped_but_the_loop_survives() {
    let server = RconServer::new("127.0.0.1", 0, "secret");
    let addr = spawn_listen(&server);

    let socket = client();
    let mut corrupted = login_packet(b"secret");
    corrupted[2] ^= 0xff;
    socket.send_to(&corrupted, addr).expect("send corrupted");
    assert_eq!(try_recv(&socket, Duration::from_millis(800)), None);

    // The very next valid datagram is served normally.
    login(&socket, addr, b"secret");
}

#[test]
fn banned_ips_get_no_response_at_all() {
    let server = RconServer::new("127.0.0.1", 0, "secret")
        .with_ip_ban_list(vec!["127.0.0.1".parse().expect("valid ip")]);
    let addr = spawn_listen(&server);

    let socket = client();
    socket
        .send_to(&login_packet(b"secret"), addr)
        .expect("send login");

    assert_eq!(try_recv(&socket, Duration::from_millis(800)), None);
    assert!(server.clients().is_empty());
}

// Scenario: two authenticated peers, one acknowledges the broadcast, one
// never answers. The acknowledging peer receives the message exactly once;
// the silent peer receives all five retransmissions and loses its session.
// Runs through the full 10 second retry window.
#[test]
fn broadcast_retries_until_ack_and_evicts_dead_peers() {
    let server = RconServer::new("127.0.0.1", 0, "secret");
    let addr = spawn_listen(&server);

    let alive = client();
    login(&alive, addr, b"secret");
    let alive_addr = alive.local_addr().expect("client addr");

    let silent = client();
    login(&silent, addr, b"secret");

    assert_eq!(server.clients().len(), 2);

    let message = packet::server_message(7, b"hello");
    server.broadcast(&message);

    // First delivery arrives immediately; acknowledge it.
    let delivered = recv(&alive);
    assert_eq!(delivered, message);
    alive.send_to(&ack_packet(7), addr).expect("send ack");

    // Sit out the retry window plus slack.
    thread::sleep(Duration::from_secs(11));

    // The acknowledged peer saw no retransmission.
    assert_eq!(try_recv(&alive, Duration::from_millis(200)), None);

    // The silent peer got all five attempts, then lost its session.
    let mut deliveries = 0;
    while try_recv(&silent, Duration::from_millis(200)).is_some() {
        deliveries += 1;
    }
    assert_eq!(deliveries, 5);
    assert_eq!(server.clients(), vec![alive_addr]);
}

#[test]
fn broadcasts_are_not_deduplicated() {
    let server = RconServer::new("127.0.0.1", 0, "secret");
    let addr = spawn_listen(&server);

    let socket = client();
    login(&socket, addr, b"secret");

    let message = packet::server_message(3, b"twice");
    server.broadcast(&message);
    assert_eq!(recv(&socket), message);
    socket.send_to(&ack_packet(3), addr).expect("send ack");
    // Let the first retry loop consume the ack before reusing the sequence.
    thread::sleep(Duration::from_millis(2500));

    server.broadcast(&message);
    assert_eq!(recv(&socket), message);
    socket.send_to(&ack_packet(3), addr).expect("send ack");
}

#[test]
fn sessions_expire_when_a_peer_falls_silent() {
    // The engine pads the protocol's 45 second idle window to 50 seconds;
    // waiting that out keeps this test honest but slow.
    let start = Instant::now();

    let server = RconServer::new("127.0.0.1", 0, "secret");
    let addr = spawn_listen(&server);

    let socket = client();
    login(&socket, addr, b"secret");
    assert_eq!(server.clients().len(), 1);

    while start.elapsed() < Duration::from_secs(51) {
        thread::sleep(Duration::from_secs(1));
    }

    assert!(server.clients().is_empty());
}
