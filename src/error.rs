//! Error types for the RCon wire codec.

use thiserror::Error;

/// Decode failures for inbound datagrams.
///
/// Each sequential read step fails with its own cause, so log lines name
/// exactly where a malformed datagram stopped parsing.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum PacketError {
    /// Datagram too short to hold the two magic bytes
    #[error("packet header magic missing")]
    MagicMissing,
    /// Magic bytes are not `BE`
    #[error("packet header magic mismatch")]
    MagicMismatch,
    /// Datagram truncated inside the checksum field
    #[error("packet header checksum field short")]
    ChecksumFieldShort,
    /// Header trailer byte missing or not 0xff
    #[error("packet header trailer mismatch")]
    TrailerMismatch,
    /// No byte left for the packet type
    #[error("packet type missing")]
    PacketTypeMissing,
    /// No byte left for the sequence number
    #[error("sequence number missing")]
    SequenceMissing,
    /// Command body expected but nothing left to read
    #[error("command read failed")]
    CommandReadFailed,
}
