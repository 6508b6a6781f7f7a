//! The RCon server engine: datagram loop, dispatch, and broadcast.
//!
//! [`RconServer`] owns the UDP socket and every piece of per-client state.
//! Each received datagram is handled on its own thread, so a slow command
//! callback never stalls the accept loop. Banned and blocked sources are
//! dropped before dispatch without any wire response: over UDP a silent
//! server is indistinguishable from an absent one, which keeps probing
//! uninformative.

use std::io;
use std::net::{IpAddr, SocketAddr, UdpSocket};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, OnceLock};
use std::thread;
use std::time::Duration;

use log::{debug, error, info, warn};

use crate::checksum;
use crate::error::PacketError;
use crate::metrics::ServerMetrics;
use crate::packet::{self, LoginResult, PacketReader, PacketType, CHECKSUM_OFFSET};
use crate::table::ExpiringTable;

/// Idle window before a session expires. The protocol documentation says 45
/// seconds; 50 leaves margin for client-side clock skew.
pub const SESSION_TTL: Duration = Duration::from_secs(50);
/// Lifetime of a wrong-password counter and duration of a brute-force block.
pub const BLOCK_TTL: Duration = Duration::from_secs(30 * 60);
/// Failed logins from one source IP before that IP is blocked.
pub const LOGIN_TRIES: u32 = 5;
/// Transmission attempts per peer for one broadcast.
pub const BROADCAST_TRIES: u32 = 5;
/// Total retry window for one broadcast; each attempt waits a fifth of it.
pub const BROADCAST_RETRY_PERIOD: Duration = Duration::from_secs(10);
/// Deadline applied to every socket write.
pub const WRITE_DEADLINE: Duration = Duration::from_secs(1);
/// Lifetime of a recorded server-message acknowledgement.
pub const ACK_TTL: Duration = Duration::from_secs(15);
/// Largest inbound datagram the engine honors.
pub const MAX_DATAGRAM: usize = 4096;

/// Callback invoked for every command an authenticated peer sends.
pub type CommandHandler = dyn Fn(u8, &str, SocketAddr) + Send + Sync;

/// BattlEye RCon v2 server engine.
///
/// The server is a cheap handle: cloning shares the socket, the tables, the
/// counters, and the sequence register, so a clone kept by the host (or
/// captured by the command callback) can answer peers while another clone
/// runs [`listen`](Self::listen).
///
/// # Example
/// ```no_run
/// use bercon::packet;
/// use bercon::server::RconServer;
///
/// let server = RconServer::new("0.0.0.0", 2301, "secret");
/// let handle = server.clone();
/// let server = server.on_command(move |seq, command, from| {
///     let reply = packet::command_response(seq, command.as_bytes());
///     let _ = handle.send_response(from, &reply);
/// });
/// server.listen().expect("socket bind failed");
/// ```
#[derive(Clone)]
pub struct RconServer {
    host: Arc<str>,
    port: u16,
    password: Arc<str>,
    ban_list: Arc<[IpAddr]>,
    command_handler: Option<Arc<CommandHandler>>,
    socket: Arc<OnceLock<UdpSocket>>,
    sessions: ExpiringTable<SocketAddr, ()>,
    blocked: ExpiringTable<IpAddr, ()>,
    wrong_passwords: ExpiringTable<IpAddr, u32>,
    acks: ExpiringTable<(SocketAddr, u8), ()>,
    seq: Arc<AtomicU32>,
    /// Operational counters for this instance.
    pub metrics: ServerMetrics,
}

impl RconServer {
    /// Create a server for `host:port` guarded by `password`.
    ///
    /// Nothing is bound until [`listen`](Self::listen) is called.
    pub fn new(host: impl Into<String>, port: u16, password: impl Into<String>) -> Self {
        Self {
            host: host.into().into(),
            port,
            password: password.into().into(),
            ban_list: Arc::from(Vec::new()),
            command_handler: None,
            socket: Arc::new(OnceLock::new()),
            sessions: ExpiringTable::new(),
            blocked: ExpiringTable::new(),
            wrong_passwords: ExpiringTable::new(),
            acks: ExpiringTable::new(),
            seq: Arc::new(AtomicU32::new(0)),
            metrics: ServerMetrics::new(),
        }
    }

    /// Statically ban a set of source IPs.
    ///
    /// Datagrams from a banned IP are dropped without any response, exactly
    /// like datagrams from a brute-force-blocked IP.
    pub fn with_ip_ban_list(mut self, ban_list: Vec<IpAddr>) -> Self {
        self.ban_list = ban_list.into();
        self
    }

    /// Register the callback run for every command an authenticated peer
    /// sends.
    ///
    /// The callback receives the client-chosen sequence number, the command
    /// text, and the peer address, and is expected to answer via
    /// [`send_response`](Self::send_response); the engine only answers
    /// keep-alives on its own.
    pub fn on_command<F>(mut self, handler: F) -> Self
    where
        F: Fn(u8, &str, SocketAddr) + Send + Sync + 'static,
    {
        self.command_handler = Some(Arc::new(handler));
        self
    }

    /// Next sequence number to use with [`packet::server_message`].
    ///
    /// The register is wider than the wire field: it hands out its current
    /// value truncated to eight bits, then advances, resetting to zero once
    /// the advanced value passes 255. Allocations racing each other may skip
    /// or repeat a value; the protocol only needs the 0..=255 cycle.
    pub fn next_sequence_number(&self) -> u8 {
        let number = self.seq.load(Ordering::SeqCst);
        let advanced = self.seq.fetch_add(1, Ordering::SeqCst) + 1;
        if advanced > 255 {
            self.seq.store(0, Ordering::SeqCst);
        }
        number as u8
    }

    /// Addresses of every authenticated peer.
    pub fn clients(&self) -> Vec<SocketAddr> {
        self.sessions.keys()
    }

    /// Bound socket address, available once [`listen`](Self::listen) has
    /// bound the socket. Useful when the server was configured for port 0.
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.socket.get().and_then(|s| s.local_addr().ok())
    }

    /// Send one prebuilt datagram to `to`.
    ///
    /// The socket-wide write deadline ([`WRITE_DEADLINE`]) applies. Errors
    /// are returned, not retried; the broadcast path counts a failed write
    /// as a missed attempt.
    pub fn send_response(&self, to: SocketAddr, data: &[u8]) -> io::Result<()> {
        let socket = self.socket.get().ok_or_else(|| {
            io::Error::new(io::ErrorKind::NotConnected, "server is not listening")
        })?;
        socket.send_to(data, to)?;
        Ok(())
    }

    /// Fan a prebuilt server-message datagram out to every authenticated
    /// peer, retrying each until it acknowledges.
    ///
    /// The sequence number is parsed out of the datagram itself, so the
    /// value matched against incoming acknowledgements is exactly the value
    /// on the wire. Per peer, up to [`BROADCAST_TRIES`] transmissions go out
    /// two seconds apart; a peer that never acknowledges is evicted from the
    /// session table. Returns immediately; delivery runs on one thread per
    /// peer.
    pub fn broadcast(&self, data: &[u8]) {
        let seq = match embedded_sequence(data) {
            Ok(seq) => seq,
            Err(err) => {
                warn!("not broadcasting an unparseable server message, {err}");
                return;
            }
        };

        let data: Arc<[u8]> = Arc::from(data);
        for peer in self.clients() {
            let server = self.clone();
            let data = Arc::clone(&data);
            thread::spawn(move || server.deliver_to_peer(peer, seq, &data));
        }
    }

    /// Bind the UDP socket and serve datagrams until an unrecoverable
    /// socket error occurs.
    ///
    /// Malformed datagrams and transient read failures are logged and never
    /// abort the loop.
    ///
    /// # Errors
    /// Returns the bind error, or a fatal read error from the socket.
    pub fn listen(&self) -> io::Result<()> {
        let socket = UdpSocket::bind((&*self.host, self.port))?;
        socket.set_write_timeout(Some(WRITE_DEADLINE))?;
        if self.socket.set(socket.try_clone()?).is_err() {
            return Err(io::Error::new(
                io::ErrorKind::AddrInUse,
                "server is already listening",
            ));
        }

        info!("starting RCON server on port {}", self.port);

        let mut buf = [0u8; MAX_DATAGRAM];
        loop {
            let (len, addr) = match socket.recv_from(&mut buf) {
                Ok(read) => read,
                Err(err) if is_transient(&err) => {
                    warn!("error reading packet, {err}");
                    continue;
                }
                Err(err) => {
                    error!("unrecoverable socket error, {err}");
                    return Err(err);
                }
            };
            self.metrics.datagrams_received.fetch_add(1, Ordering::Relaxed);

            let ip = addr.ip();
            if self.ban_list.contains(&ip) || self.blocked.contains(&ip) {
                // No response of any kind: the sender cannot tell a silent
                // server from an absent one.
                self.metrics.dropped_banned.fetch_add(1, Ordering::Relaxed);
                debug!("{addr}: dropping datagram from banned or blocked source");
                continue;
            }

            let server = self.clone();
            let data = buf[..len].to_vec();
            thread::spawn(move || server.handle_datagram(addr, &data));
        }
    }

    fn handle_datagram(&self, addr: SocketAddr, data: &[u8]) {
        let authenticated = self.sessions.contains(&addr);

        let mut reader = PacketReader::new(data);
        let header = match reader.read_header() {
            Ok(header) => header,
            Err(err) => {
                self.metrics.dropped_malformed.fetch_add(1, Ordering::Relaxed);
                warn!("{addr}: error reading packet header, {err}");
                return;
            }
        };

        // The checksummed range starts at the header trailer byte.
        let covered = &data[CHECKSUM_OFFSET..];
        if !checksum::verify(covered, header.checksum) {
            self.metrics.dropped_checksum.fetch_add(1, Ordering::Relaxed);
            warn!(
                "{addr}: wrong packet checksum, expected {}, got {}",
                checksum::compute(covered),
                header.checksum
            );
            return;
        }

        let packet_type = match reader.read_packet_type() {
            Ok(packet_type) => packet_type,
            Err(err) => {
                self.metrics.dropped_malformed.fetch_add(1, Ordering::Relaxed);
                warn!("{addr}: error reading packet type, {err}");
                return;
            }
        };

        if !authenticated && packet_type != PacketType::Login {
            self.metrics
                .dropped_unauthenticated
                .fetch_add(1, Ordering::Relaxed);
            warn!("{addr}: client trying to issue commands without authentication ({packet_type}), ignoring");
            return;
        }

        if !authenticated {
            let password = match reader.read_command() {
                Ok(password) => password,
                Err(err) => {
                    self.metrics.dropped_malformed.fetch_add(1, Ordering::Relaxed);
                    warn!("{addr}: error reading password, {err}");
                    return;
                }
            };
            self.handle_login(addr, password);
            return;
        }

        // Every accepted packet from an authenticated peer keeps its
        // session alive.
        self.sessions.insert(addr, (), SESSION_TTL);

        match packet_type {
            PacketType::Command => self.handle_command(addr, &mut reader),
            PacketType::ServerMessage => self.handle_ack(addr, &mut reader),
            PacketType::Login | PacketType::Unknown => {}
        }
    }

    fn handle_command(&self, addr: SocketAddr, reader: &mut PacketReader<'_>) {
        let seq = match reader.read_sequence() {
            Ok(seq) => seq,
            Err(err) => {
                warn!("{addr}: error reading sequence number, {err}");
                return;
            }
        };

        // Nothing after the sequence number is a keep-alive; answer it with
        // an empty command response.
        if reader.is_empty() {
            self.metrics.keepalives_answered.fetch_add(1, Ordering::Relaxed);
            if let Err(err) = self.send_response(addr, &packet::command_response(seq, &[])) {
                warn!("{addr}: could not write to connection, {err}");
            }
            return;
        }

        let command = match reader.read_command() {
            Ok(command) => command,
            Err(err) => {
                warn!("{addr}: error reading command, {err}");
                return;
            }
        };

        if let Some(handler) = &self.command_handler {
            self.metrics.commands_dispatched.fetch_add(1, Ordering::Relaxed);
            handler(seq, &String::from_utf8_lossy(command), addr);
        }
    }

    fn handle_ack(&self, addr: SocketAddr, reader: &mut PacketReader<'_>) {
        let seq = match reader.read_sequence() {
            Ok(seq) => seq,
            Err(err) => {
                warn!("{addr}: error reading server message sequence number, {err}");
                return;
            }
        };

        self.acks.insert((addr, seq), (), ACK_TTL);
        self.metrics.acks_recorded.fetch_add(1, Ordering::Relaxed);
    }

    fn handle_login(&self, addr: SocketAddr, password: &[u8]) {
        let ip = addr.ip();

        if password != self.password.as_bytes() {
            self.metrics.logins_failed.fetch_add(1, Ordering::Relaxed);
            if let Err(err) = self.send_response(addr, &packet::login_response(LoginResult::Failed))
            {
                warn!("{addr}: could not write to connection, {err}");
            }

            let times = self.wrong_passwords.increment(ip, BLOCK_TTL);
            warn!("{addr}: wrong password provided - {times} times");

            if times >= LOGIN_TRIES {
                self.blocked.insert(ip, (), BLOCK_TTL);
                self.metrics.ips_blocked.fetch_add(1, Ordering::Relaxed);
                warn!(
                    "{addr}: ip blocked for {} minutes, reached maximum tries",
                    BLOCK_TTL.as_secs() / 60
                );
            }
            return;
        }

        self.sessions.insert(addr, (), SESSION_TTL);
        self.metrics.logins_succeeded.fetch_add(1, Ordering::Relaxed);
        info!("{addr}: authenticated with password");
        if let Err(err) = self.send_response(addr, &packet::login_response(LoginResult::Successful))
        {
            warn!("{addr}: could not write to connection, {err}");
        }
    }

    fn deliver_to_peer(&self, peer: SocketAddr, seq: u8, data: &[u8]) {
        let wait = BROADCAST_RETRY_PERIOD / BROADCAST_TRIES;

        for _ in 0..BROADCAST_TRIES {
            if let Err(err) = self.send_response(peer, data) {
                warn!("{peer}: could not write to connection, {err}");
            }
            thread::sleep(wait);

            if self.acks.remove(&(peer, seq)).is_some() {
                return;
            }
        }

        // Five unacknowledged attempts: the peer is gone.
        self.sessions.remove(&peer);
        self.metrics.peers_evicted.fetch_add(1, Ordering::Relaxed);
        info!("{peer}: no acknowledgement for server message {seq}, dropping session");
    }
}

// The sequence a broadcast is matched on is the one embedded in the
// caller-built datagram.
fn embedded_sequence(data: &[u8]) -> Result<u8, PacketError> {
    let mut reader = PacketReader::new(data);
    reader.read_header()?;
    reader.read_packet_type()?;
    reader.read_sequence()
}

fn is_transient(err: &io::Error) -> bool {
    matches!(
        err.kind(),
        io::ErrorKind::Interrupted
            | io::ErrorKind::WouldBlock
            | io::ErrorKind::TimedOut
            | io::ErrorKind::ConnectionReset
    )
}
