//! Peer wire messages: length-prefixed framing over TCP, post-handshake.
//!
//! [`Message::to_frame`] produces the full `<len><id><body>` bytes ready to
//! write to the socket. [`Message::from_payload`] takes the bytes *after*
//! the 4-byte length prefix has already been read and stripped off by the
//! caller (see `peer::session`, which owns the framing loop) — an empty
//! payload is a keep-alive.

use byteorder::{BigEndian, ByteOrder};

#[derive(Debug, PartialEq, Eq, Clone)]
pub enum Message {
    KeepAlive,
    Choke,
    Unchoke,
    Interested,
    NotInterested,
    Have(u32),
    Bitfield(Vec<u8>),
    Request(u32, u32, u32),
    Piece(u32, u32, Vec<u8>),
    Cancel(u32, u32, u32),
    /// An id this crate doesn't interpret. Per the spec, unknown ids are
    /// logged and skipped rather than treated as a session-ending error.
    Unknown(u8),
}

impl Message {
    /// Full wire frame: 4-byte big-endian length prefix followed by the
    /// message id and body.
    pub fn to_frame(&self) -> Vec<u8> {
        let mut body = Vec::new();
        match self {
            Message::KeepAlive => {}
            Message::Choke => body.push(0),
            Message::Unchoke => body.push(1),
            Message::Interested => body.push(2),
            Message::NotInterested => body.push(3),
            Message::Have(index) => {
                body.push(4);
                body.extend_from_slice(&index.to_be_bytes());
            }
            Message::Bitfield(bits) => {
                body.push(5);
                body.extend_from_slice(bits);
            }
            Message::Request(index, begin, length) => {
                body.push(6);
                body.extend_from_slice(&index.to_be_bytes());
                body.extend_from_slice(&begin.to_be_bytes());
                body.extend_from_slice(&length.to_be_bytes());
            }
            Message::Piece(index, begin, block) => {
                body.push(7);
                body.extend_from_slice(&index.to_be_bytes());
                body.extend_from_slice(&begin.to_be_bytes());
                body.extend_from_slice(block);
            }
            Message::Cancel(index, begin, length) => {
                body.push(8);
                body.extend_from_slice(&index.to_be_bytes());
                body.extend_from_slice(&begin.to_be_bytes());
                body.extend_from_slice(&length.to_be_bytes());
            }
            Message::Unknown(id) => body.push(*id),
        }

        let mut frame = Vec::with_capacity(4 + body.len());
        frame.extend_from_slice(&(body.len() as u32).to_be_bytes());
        frame.extend_from_slice(&body);
        frame
    }

    /// Parses a message body (no length prefix). An empty slice is a
    /// keep-alive. Bodies with a valid id but the wrong length for that id
    /// are *not* rejected outright — the spec calls for "skip, don't kill
    /// the session" — so callers should treat `Message::Unknown` and any
    /// length mismatch the same way: log and move on. We surface length
    /// mismatches as `None` so the caller can decide; everything else
    /// always parses to some `Message`.
    pub fn from_payload(payload: &[u8]) -> Option<Message> {
        if payload.is_empty() {
            return Some(Message::KeepAlive);
        }
        let id = payload[0];
        let body = &payload[1..];
        Some(match id {
            0 if body.is_empty() => Message::Choke,
            1 if body.is_empty() => Message::Unchoke,
            2 if body.is_empty() => Message::Interested,
            3 if body.is_empty() => Message::NotInterested,
            4 if body.len() == 4 => Message::Have(BigEndian::read_u32(body)),
            5 => Message::Bitfield(body.to_vec()),
            6 if body.len() == 12 => Message::Request(
                BigEndian::read_u32(&body[0..4]),
                BigEndian::read_u32(&body[4..8]),
                BigEndian::read_u32(&body[8..12]),
            ),
            7 if body.len() >= 8 => Message::Piece(
                BigEndian::read_u32(&body[0..4]),
                BigEndian::read_u32(&body[4..8]),
                body[8..].to_vec(),
            ),
            8 if body.len() == 12 => Message::Cancel(
                BigEndian::read_u32(&body[0..4]),
                BigEndian::read_u32(&body[4..8]),
                BigEndian::read_u32(&body[8..12]),
            ),
            0..=8 => return None, // known id, wrong body length: skip
            other => Message::Unknown(other),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn strip_length_prefix(frame: &[u8]) -> &[u8] {
        &frame[4..]
    }

    #[test]
    fn keep_alive_round_trips() {
        let frame = Message::KeepAlive.to_frame();
        assert_eq!(frame, vec![0, 0, 0, 0]);
        assert_eq!(
            Message::from_payload(strip_length_prefix(&frame)),
            Some(Message::KeepAlive)
        );
    }

    #[test]
    fn choke_round_trips() {
        let frame = Message::Choke.to_frame();
        assert_eq!(frame, vec![0, 0, 0, 1, 0]);
        assert_eq!(
            Message::from_payload(strip_length_prefix(&frame)),
            Some(Message::Choke)
        );
    }

    #[test]
    fn have_round_trips() {
        let frame = Message::Have(7).to_frame();
        assert_eq!(
            Message::from_payload(strip_length_prefix(&frame)),
            Some(Message::Have(7))
        );
    }

    #[test]
    fn request_round_trips() {
        let frame = Message::Request(1, 16384, 16384).to_frame();
        assert_eq!(
            Message::from_payload(strip_length_prefix(&frame)),
            Some(Message::Request(1, 16384, 16384))
        );
    }

    #[test]
    fn piece_round_trips_with_large_block() {
        let block = vec![0xABu8; 16384];
        let frame = Message::Piece(2, 0, block.clone()).to_frame();
        assert_eq!(
            Message::from_payload(strip_length_prefix(&frame)),
            Some(Message::Piece(2, 0, block))
        );
    }

    #[test]
    fn malformed_have_length_is_skipped_not_erred() {
        // id 4 ("have") but only 2 body bytes instead of 4.
        let payload = [4u8, 0, 1];
        assert_eq!(Message::from_payload(&payload), None);
    }

    #[test]
    fn unknown_id_is_surfaced_for_logging_and_skipping() {
        let payload = [200u8, 1, 2, 3];
        assert_eq!(Message::from_payload(&payload), Some(Message::Unknown(200)));
    }
}
