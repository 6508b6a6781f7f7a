//! Wire format for RCon v2 datagrams.
//!
//! Every datagram starts with a 7-byte header: the ASCII magic `BE`, a
//! little-endian CRC32, and a constant `0xff` trailer. The checksum covers
//! the trailer byte plus everything after it, so corruption anywhere in the
//! typed body is detected. [`PacketReader`] walks a received datagram field
//! by field in wire order; the builder functions produce complete datagrams
//! ready for transmission.
//!
//! No I/O happens here; this is pure data transformation.

use crate::checksum;
use crate::error::PacketError;

/// Header magic, always `BE`.
pub const MAGIC: [u8; 2] = *b"BE";
/// Constant byte closing the header; also the first byte of the checksummed range.
pub const TRAILER: u8 = 0xff;
/// Fixed header size in bytes.
pub const HEADER_LEN: usize = 7;
/// Offset where the checksummed range starts (trailer byte through end of datagram).
pub const CHECKSUM_OFFSET: usize = 6;

/// Packet type byte, directly after the header.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PacketType {
    /// Login request (client to server) or login response (server to client)
    Login,
    /// Command, keep-alive, or command response
    Command,
    /// Server-initiated message and its acknowledgement
    ServerMessage,
    /// Any other type byte; the engine discards these
    Unknown,
}

impl PacketType {
    /// Map a wire byte to its packet type.
    pub fn from_byte(b: u8) -> Self {
        match b {
            0x00 => Self::Login,
            0x01 => Self::Command,
            0x02 => Self::ServerMessage,
            _ => Self::Unknown,
        }
    }

    /// Wire byte for this packet type.
    pub fn as_byte(self) -> u8 {
        match self {
            Self::Login => 0x00,
            Self::Command => 0x01,
            Self::ServerMessage => 0x02,
            Self::Unknown => 0xff,
        }
    }
}

impl std::fmt::Display for PacketType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Login => write!(f, "login (0x00)"),
            Self::Command => write!(f, "command (0x01)"),
            Self::ServerMessage => write!(f, "server message (0x02)"),
            Self::Unknown => write!(f, "unknown (0xff)"),
        }
    }
}

/// Result byte inside a server-to-client login packet.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LoginResult {
    /// Password rejected
    Failed = 0x00,
    /// Password accepted
    Successful = 0x01,
}

/// Validated header of a received datagram.
///
/// Magic and trailer are checked during the read and not stored.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PacketHeader {
    /// CRC32 the sender computed over the trailer byte and the typed body
    pub checksum: u32,
}

/// Sequential reader over one received datagram.
///
/// Mirrors the order fields appear on the wire: header, packet type,
/// sequence number, command body. Each step consumes its bytes and fails
/// with the [`PacketError`] naming the field that was missing or invalid.
pub struct PacketReader<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> PacketReader<'a> {
    /// Start reading at the front of `buf`.
    pub fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    fn take(&mut self, n: usize) -> Option<&'a [u8]> {
        let end = self.pos.checked_add(n)?;
        let slice = self.buf.get(self.pos..end)?;
        self.pos = end;
        Some(slice)
    }

    /// Read and validate the 7-byte header.
    pub fn read_header(&mut self) -> Result<PacketHeader, PacketError> {
        let magic = self.take(2).ok_or(PacketError::MagicMissing)?;
        if magic != MAGIC {
            return Err(PacketError::MagicMismatch);
        }

        let crc = self.take(4).ok_or(PacketError::ChecksumFieldShort)?;
        let checksum = u32::from_le_bytes([crc[0], crc[1], crc[2], crc[3]]);

        match self.take(1) {
            Some(&[TRAILER]) => Ok(PacketHeader { checksum }),
            _ => Err(PacketError::TrailerMismatch),
        }
    }

    /// Read the packet type byte.
    pub fn read_packet_type(&mut self) -> Result<PacketType, PacketError> {
        match self.take(1) {
            Some(&[b]) => Ok(PacketType::from_byte(b)),
            _ => Err(PacketError::PacketTypeMissing),
        }
    }

    /// Read the one-byte sequence number.
    pub fn read_sequence(&mut self) -> Result<u8, PacketError> {
        match self.take(1) {
            Some(&[b]) => Ok(b),
            _ => Err(PacketError::SequenceMissing),
        }
    }

    /// Read the rest of the datagram as a raw command body.
    ///
    /// The protocol does not promise valid UTF-8; bytes pass through as-is.
    pub fn read_command(&mut self) -> Result<&'a [u8], PacketError> {
        if self.is_empty() {
            return Err(PacketError::CommandReadFailed);
        }
        let rest = &self.buf[self.pos..];
        self.pos = self.buf.len();
        Ok(rest)
    }

    /// True when every byte has been consumed.
    ///
    /// A command packet with nothing left after the sequence number is a
    /// keep-alive.
    pub fn is_empty(&self) -> bool {
        self.pos >= self.buf.len()
    }
}

// The checksum is computed over the trailer byte prepended to the typed
// body, matching the range verified on decode.
fn seal(body: &[u8]) -> Vec<u8> {
    let mut covered = Vec::with_capacity(1 + body.len());
    covered.push(TRAILER);
    covered.extend_from_slice(body);
    let crc = checksum::compute(&covered);

    let mut out = Vec::with_capacity(HEADER_LEN + body.len());
    out.extend_from_slice(&MAGIC);
    out.extend_from_slice(&crc.to_le_bytes());
    out.push(TRAILER);
    out.extend_from_slice(body);
    out
}

/// Build a complete login response datagram carrying `result`.
pub fn login_response(result: LoginResult) -> Vec<u8> {
    seal(&[PacketType::Login.as_byte(), result as u8])
}

/// Build a complete command response datagram answering sequence number `seq`.
///
/// Pass an empty `payload` to answer a keep-alive.
pub fn command_response(seq: u8, payload: &[u8]) -> Vec<u8> {
    let mut body = Vec::with_capacity(2 + payload.len());
    body.push(PacketType::Command.as_byte());
    body.push(seq);
    body.extend_from_slice(payload);
    seal(&body)
}

/// Build a complete server message datagram.
///
/// Obtain `seq` from
/// [`RconServer::next_sequence_number`](crate::server::RconServer::next_sequence_number)
/// and hand the result to [`RconServer::broadcast`](crate::server::RconServer::broadcast).
pub fn server_message(seq: u8, payload: &[u8]) -> Vec<u8> {
    let mut body = Vec::with_capacity(2 + payload.len());
    body.push(PacketType::ServerMessage.as_byte());
    body.push(seq);
    body.extend_from_slice(payload);
    seal(&body)
}
