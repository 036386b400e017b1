use thiserror::Error;

/// The crate's single error type. Every fallible boundary described in the
/// spec (codec, metainfo parser, tracker client, peer session) returns one
/// of these variants rather than a boxed `dyn Error`.
#[derive(Debug, Error)]
pub enum Error {
    #[error("malformed bencode: {0}")]
    MalformedBencode(#[from] crate::bencode::Error),

    #[error("malformed torrent file: {0}")]
    MalformedTorrent(String),

    #[error("unsupported tracker scheme: {0}")]
    UnsupportedScheme(String),

    #[error("tracker request timed out")]
    TrackerTimeout,

    #[error("tracker protocol error: {0}")]
    TrackerProtocolError(String),

    #[error("tracker rejected announce: {0}")]
    TrackerRejected(String),

    #[error("peer unreachable: {0}")]
    PeerUnreachable(String),

    #[error("peer handshake info-hash mismatch")]
    HandshakeMismatch,

    #[error("peer protocol error: {0}")]
    PeerProtocolError(String),

    #[error("I/O error: {0}")]
    IoError(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, Error>;
