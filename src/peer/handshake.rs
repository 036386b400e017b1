//! The 68-byte handshake exchanged before any length-prefixed messages.

use crate::error::{Error, Result};

const PSTR: &str = "BitTorrent protocol";

#[derive(Debug, PartialEq, Eq, Clone)]
pub struct Handshake {
    pub pstr: String,
    /// 8 reserved bytes. This crate always sends and expects all zeroes.
    pub reserved: [u8; 8],
    pub info_hash: [u8; 20],
    pub peer_id: [u8; 20],
}

impl Handshake {
    pub fn new(info_hash: [u8; 20], peer_id: [u8; 20]) -> Handshake {
        Handshake {
            pstr: PSTR.to_string(),
            reserved: [0; 8],
            info_hash,
            peer_id,
        }
    }

    /// Parses a 68-byte handshake and checks its info-hash against
    /// `expected_info_hash` in the same step — a handshake that parses but
    /// doesn't match the torrent we're downloading is as useless to a
    /// caller as one that doesn't parse at all.
    pub fn from_bytes(bytes: &[u8], expected_info_hash: &[u8; 20]) -> Result<Handshake> {
        if bytes.len() < 68 {
            return Err(Error::PeerProtocolError(
                "handshake shorter than 68 bytes".into(),
            ));
        }
        let pstrlen = bytes[0] as usize;
        if pstrlen != PSTR.len() || bytes.len() < 1 + pstrlen + 8 + 20 + 20 {
            return Err(Error::PeerProtocolError(
                "unexpected protocol string length".into(),
            ));
        }

        let pstr = String::from_utf8(bytes[1..1 + pstrlen].to_vec())
            .map_err(|_| Error::PeerProtocolError("protocol string is not UTF-8".into()))?;
        if pstr != PSTR {
            return Err(Error::PeerProtocolError("unexpected protocol string".into()));
        }

        let mut reserved = [0u8; 8];
        reserved.copy_from_slice(&bytes[pstrlen + 1..pstrlen + 9]);

        let mut info_hash = [0u8; 20];
        info_hash.copy_from_slice(&bytes[pstrlen + 9..pstrlen + 29]);
        if &info_hash != expected_info_hash {
            return Err(Error::HandshakeMismatch);
        }

        let mut peer_id = [0u8; 20];
        peer_id.copy_from_slice(&bytes[pstrlen + 29..pstrlen + 49]);

        Ok(Handshake {
            pstr,
            reserved,
            info_hash,
            peer_id,
        })
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        let mut bytes = Vec::with_capacity(68);
        bytes.push(self.pstr.len() as u8);
        bytes.extend_from_slice(self.pstr.as_bytes());
        bytes.extend_from_slice(&self.reserved);
        bytes.extend_from_slice(&self.info_hash);
        bytes.extend_from_slice(&self.peer_id);
        bytes
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_with_matching_info_hash() {
        let info_hash = [3u8; 20];
        let peer_id = [9u8; 20];
        let handshake = Handshake::new(info_hash, peer_id);
        let bytes = handshake.to_bytes();
        assert_eq!(bytes.len(), 68);

        let parsed = Handshake::from_bytes(&bytes, &info_hash).unwrap();
        assert_eq!(parsed, handshake);
    }

    #[test]
    fn rejects_info_hash_mismatch() {
        let handshake = Handshake::new([1u8; 20], [2u8; 20]);
        let bytes = handshake.to_bytes();
        let result = Handshake::from_bytes(&bytes, &[0xFFu8; 20]);
        assert!(matches!(result, Err(Error::HandshakeMismatch)));
    }

    #[test]
    fn rejects_truncated_handshake() {
        let result = Handshake::from_bytes(&[19, b'B'], &[0u8; 20]);
        assert!(result.is_err());
    }
}
