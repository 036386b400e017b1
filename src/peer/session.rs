//! One connected peer: handshake, framed message loop, block scheduling,
//! and piece verification/persistence. Single-threaded and cooperative —
//! everything suspends at socket reads/writes, gated by `mio::Poll` with a
//! timeout, never by a background thread.

use crate::bitfield::BitField;
use crate::error::{Error, Result};
use crate::peer::handshake::Handshake;
use crate::peer::message::Message;
use crate::storage::Storage;
use crate::torrent::Torrent;
use mio::net::TcpStream;
use mio::{Events, Interest, Poll, Token};
use std::collections::{BTreeMap, BTreeSet};
use std::io::{Read, Write};
use std::net::SocketAddr;
use std::time::Duration;

const BLOCK_SIZE: u32 = 16384;
const TOKEN: Token = Token(0);

/// An in-flight piece: blocks received so far, keyed by offset, plus the
/// set of offsets requested but not yet answered.
struct PieceProgress {
    piece_length: usize,
    blocks: BTreeMap<u32, Vec<u8>>,
    requested: BTreeSet<u32>,
}

impl PieceProgress {
    fn new(piece_length: usize) -> PieceProgress {
        PieceProgress {
            piece_length,
            blocks: BTreeMap::new(),
            requested: BTreeSet::new(),
        }
    }

    fn is_complete(&self) -> bool {
        let mut offset = 0u32;
        while offset < self.piece_length as u32 {
            match self.blocks.get(&offset) {
                Some(block) => offset += block.len() as u32,
                None => return false,
            }
        }
        true
    }

    fn assemble(self) -> Vec<u8> {
        let mut out = Vec::with_capacity(self.piece_length);
        for (_, block) in self.blocks {
            out.extend_from_slice(&block);
        }
        out
    }
}

pub struct PeerSession {
    stream: TcpStream,
    poll: Poll,
    addr: SocketAddr,
    peer_id: [u8; 20],
    total_pieces: usize,
    peer_choking: bool,
    am_interested: bool,
    available_pieces: BTreeSet<usize>,
    pieces_in_progress: BTreeMap<usize, PieceProgress>,
    completed_pieces: BTreeSet<usize>,
    read_buf: Vec<u8>,
}

impl PeerSession {
    /// Connects to `addr` and performs the handshake for `torrent`. Blocks
    /// (cooperatively, via `poll`) until the handshake completes or
    /// `timeout` elapses.
    pub fn connect(
        addr: SocketAddr,
        torrent: &Torrent,
        my_id: [u8; 20],
        timeout: Duration,
    ) -> Result<PeerSession> {
        let mut stream = TcpStream::connect(addr)
            .map_err(|e| Error::PeerUnreachable(format!("{addr}: {e}")))?;
        let poll = Poll::new().map_err(Error::IoError)?;
        poll.registry()
            .register(&mut stream, TOKEN, Interest::READABLE | Interest::WRITABLE)
            .map_err(Error::IoError)?;

        let handshake_out = Handshake::new(torrent.info_hash, my_id).to_bytes();
        let mut events = Events::with_capacity(16);
        let mut sent = false;
        let mut response = Vec::with_capacity(68);

        loop {
            poll.poll(&mut events, Some(timeout)).map_err(Error::IoError)?;
            if events.is_empty() {
                return Err(Error::PeerUnreachable(format!("{addr}: handshake timed out")));
            }
            for event in events.iter() {
                if event.is_writable() && !sent {
                    stream.write_all(&handshake_out).map_err(Error::IoError)?;
                    sent = true;
                }
                if event.is_readable() {
                    let mut buf = [0u8; 256];
                    loop {
                        match stream.read(&mut buf) {
                            Ok(0) => {
                                return Err(Error::PeerUnreachable(format!(
                                    "{addr}: closed during handshake"
                                )))
                            }
                            Ok(n) => response.extend_from_slice(&buf[..n]),
                            Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => break,
                            Err(e) => return Err(Error::IoError(e)),
                        }
                        if response.len() >= 68 {
                            break;
                        }
                    }
                }
            }
            if response.len() >= 68 {
                break;
            }
        }

        let handshake_in = Handshake::from_bytes(&response[..68], &torrent.info_hash)?;
        poll.registry()
            .reregister(&mut stream, TOKEN, Interest::READABLE | Interest::WRITABLE)
            .map_err(Error::IoError)?;

        Ok(PeerSession {
            stream,
            poll,
            addr,
            peer_id: handshake_in.peer_id,
            total_pieces: torrent.piece_count(),
            peer_choking: true,
            am_interested: false,
            available_pieces: BTreeSet::new(),
            pieces_in_progress: BTreeMap::new(),
            completed_pieces: BTreeSet::new(),
            read_buf: response[68..].to_vec(),
        })
    }

    pub fn peer_id(&self) -> [u8; 20] {
        self.peer_id
    }

    pub fn completed_pieces(&self) -> &BTreeSet<usize> {
        &self.completed_pieces
    }

    /// Drives the message loop until `target_pieces` (or, if `None`, every
    /// piece in the torrent) has been verified and persisted, the peer
    /// disconnects, or `timeout` elapses with no activity.
    pub fn run(
        &mut self,
        torrent: &Torrent,
        storage: &mut Storage,
        target_pieces: Option<usize>,
        timeout: Duration,
    ) -> Result<()> {
        let target = target_pieces.unwrap_or(self.total_pieces);
        let mut events = Events::with_capacity(64);

        while self.completed_pieces.len() < target {
            self.poll.poll(&mut events, Some(timeout)).map_err(Error::IoError)?;
            if events.is_empty() {
                return Err(Error::PeerProtocolError(format!("{}: timed out", self.addr)));
            }
            for event in events.iter() {
                if event.is_readable() && !self.pump_read(torrent, storage)? {
                    return Ok(());
                }
            }
        }
        Ok(())
    }

    fn pump_read(&mut self, torrent: &Torrent, storage: &mut Storage) -> Result<bool> {
        let mut buf = [0u8; 65536];
        loop {
            match self.stream.read(&mut buf) {
                Ok(0) => return Ok(false),
                Ok(n) => self.read_buf.extend_from_slice(&buf[..n]),
                Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => break,
                Err(e) => return Err(Error::IoError(e)),
            }
        }
        self.drain_frames(torrent, storage)?;
        Ok(true)
    }

    fn drain_frames(&mut self, torrent: &Torrent, storage: &mut Storage) -> Result<()> {
        loop {
            if self.read_buf.len() < 4 {
                return Ok(());
            }
            let len = u32::from_be_bytes(self.read_buf[0..4].try_into().unwrap()) as usize;
            if self.read_buf.len() < 4 + len {
                return Ok(());
            }
            let payload: Vec<u8> = self.read_buf[4..4 + len].to_vec();
            self.read_buf.drain(0..4 + len);

            match Message::from_payload(&payload) {
                Some(message) => self.handle_message(message, torrent, storage)?,
                None => log::warn!("{}: skipping malformed message", self.addr),
            }
        }
    }

    fn handle_message(
        &mut self,
        message: Message,
        torrent: &Torrent,
        storage: &mut Storage,
    ) -> Result<()> {
        match message {
            Message::KeepAlive => {}
            Message::Choke => self.peer_choking = true,
            Message::Unchoke => {
                self.peer_choking = false;
                if self.am_interested {
                    self.schedule_requests(torrent)?;
                }
            }
            Message::Interested | Message::NotInterested => {
                // This client doesn't seed, so the peer's interest in us is moot.
            }
            Message::Have(index) => {
                let index = index as usize;
                if index < self.total_pieces {
                    self.available_pieces.insert(index);
                    self.declare_interest_if_needed()?;
                }
            }
            Message::Bitfield(bits) => {
                let bitfield = BitField::from_payload(&bits, self.total_pieces);
                self.available_pieces.extend(bitfield.iter());
                self.declare_interest_if_needed()?;
            }
            Message::Request(..) | Message::Cancel(..) => {
                // This client doesn't seed.
            }
            Message::Piece(index, begin, data) => {
                self.handle_piece(index as usize, begin, data, torrent, storage)?;
            }
            Message::Unknown(id) => {
                log::debug!("{}: ignoring unknown message id {id}", self.addr);
            }
        }
        Ok(())
    }

    fn declare_interest_if_needed(&mut self) -> Result<()> {
        if !self.am_interested && !self.available_pieces.is_empty() {
            self.send(&Message::Interested)?;
            self.am_interested = true;
        }
        Ok(())
    }

    fn handle_piece(
        &mut self,
        index: usize,
        begin: u32,
        data: Vec<u8>,
        torrent: &Torrent,
        storage: &mut Storage,
    ) -> Result<()> {
        let Some(progress) = self.pieces_in_progress.get_mut(&index) else {
            return Ok(());
        };
        progress.blocks.insert(begin, data);
        progress.requested.remove(&begin);

        if progress.is_complete() {
            let progress = self.pieces_in_progress.remove(&index).unwrap();
            let assembled = progress.assemble();
            if storage.write_piece(index, &assembled)? {
                self.completed_pieces.insert(index);
            }
            // A hash mismatch leaves the piece out of both sets, so the
            // scheduler will pick it up again on the next pass.
        }

        if !self.peer_choking && self.am_interested {
            self.schedule_requests(torrent)?;
        }
        Ok(())
    }

    /// Pipelining depth 1: at most one outstanding request is created per
    /// call. §4.4.5.
    fn schedule_requests(&mut self, torrent: &Torrent) -> Result<()> {
        if self.peer_choking {
            return Ok(());
        }

        let index = match self
            .available_pieces
            .iter()
            .find(|i| !self.completed_pieces.contains(i))
        {
            Some(&i) => i,
            None => return Ok(()),
        };

        let piece_length = torrent.piece_length_for(index) as usize;
        let progress = self
            .pieces_in_progress
            .entry(index)
            .or_insert_with(|| PieceProgress::new(piece_length));

        let piece_length = progress.piece_length as u32;
        let mut offset = 0u32;
        while offset < piece_length {
            if !progress.blocks.contains_key(&offset) && !progress.requested.contains(&offset) {
                let length = BLOCK_SIZE.min(piece_length - offset);
                progress.requested.insert(offset);
                self.send(&Message::Request(index as u32, offset, length))?;
                return Ok(());
            }
            offset += BLOCK_SIZE;
        }
        Ok(())
    }

    fn send(&mut self, message: &Message) -> Result<()> {
        let frame = message.to_frame();
        let mut written = 0;
        let mut events = Events::with_capacity(4);
        while written < frame.len() {
            match self.stream.write(&frame[written..]) {
                Ok(n) => written += n,
                Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => {
                    self.poll
                        .poll(&mut events, Some(Duration::from_secs(5)))
                        .map_err(Error::IoError)?;
                }
                Err(e) => return Err(Error::IoError(e)),
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bencode::{self, Value};
    use sha1::{Digest, Sha1};
    use std::net::{TcpListener, TcpStream as StdTcpStream};

    /// Builds a connected mio `TcpStream`/`Poll` pair over real loopback
    /// sockets, so `send`/`pump_read` exercise actual I/O instead of a mock.
    /// The returned std stream is the "peer" end; it must stay alive for the
    /// session's socket to remain connected.
    fn test_session(total_pieces: usize) -> (PeerSession, StdTcpStream) {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        let client_std = StdTcpStream::connect(addr).unwrap();
        let (peer_std, _) = listener.accept().unwrap();
        client_std.set_nonblocking(true).unwrap();

        let mut stream = TcpStream::from_std(client_std);
        let poll = Poll::new().unwrap();
        poll.registry()
            .register(&mut stream, TOKEN, Interest::READABLE | Interest::WRITABLE)
            .unwrap();

        let session = PeerSession {
            stream,
            poll,
            addr,
            peer_id: [0u8; 20],
            total_pieces,
            peer_choking: true,
            am_interested: false,
            available_pieces: BTreeSet::new(),
            pieces_in_progress: BTreeMap::new(),
            completed_pieces: BTreeSet::new(),
            read_buf: Vec::new(),
        };
        (session, peer_std)
    }

    fn two_piece_torrent(piece0: &[u8], piece1: &[u8]) -> Torrent {
        let mut pieces = Vec::new();
        pieces.extend_from_slice(&<[u8; 20]>::from(Sha1::digest(piece0)));
        pieces.extend_from_slice(&<[u8; 20]>::from(Sha1::digest(piece1)));

        let mut info = BTreeMap::new();
        info.insert(b"name".to_vec(), Value::Bytes(b"x".to_vec()));
        info.insert(b"piece length".to_vec(), Value::Int(piece0.len() as i64));
        info.insert(b"pieces".to_vec(), Value::Bytes(pieces));
        info.insert(
            b"length".to_vec(),
            Value::Int((piece0.len() + piece1.len()) as i64),
        );
        let mut root = BTreeMap::new();
        root.insert(
            b"announce".to_vec(),
            Value::Bytes(b"http://tracker.example/announce".to_vec()),
        );
        root.insert(b"info".to_vec(), Value::Dict(info));

        Torrent::from_bytes(&bencode::encode(&Value::Dict(root))).unwrap()
    }

    /// Scenario 4: bitfield -> interested, unchoke -> request, piece ->
    /// verified write, and the scheduler moving on to the next piece.
    #[test]
    fn bitfield_then_unchoke_drives_request_and_verified_write() {
        let torrent = two_piece_torrent(b"AAAA", b"BBBB");
        let tmp = tempfile::NamedTempFile::new().unwrap();
        let mut storage = Storage::new(&torrent, tmp.path()).unwrap();
        let (mut session, _peer) = test_session(torrent.piece_count());

        // Peer claims to hold both pieces (bits 0 and 1 set).
        session
            .handle_message(Message::Bitfield(vec![0b1100_0000]), &torrent, &mut storage)
            .unwrap();
        assert!(session.am_interested);
        assert_eq!(session.available_pieces, BTreeSet::from([0, 1]));

        session
            .handle_message(Message::Unchoke, &torrent, &mut storage)
            .unwrap();
        assert!(!session.peer_choking);
        assert!(session.pieces_in_progress.contains_key(&0));

        session
            .handle_message(
                Message::Piece(0, 0, b"AAAA".to_vec()),
                &torrent,
                &mut storage,
            )
            .unwrap();

        assert!(session.completed_pieces.contains(&0));
        assert!(!session.pieces_in_progress.contains_key(&0));
        // The scheduler should have moved straight on to the next piece.
        assert!(session.pieces_in_progress.contains_key(&1));

        let on_disk = std::fs::read(tmp.path()).unwrap();
        assert_eq!(&on_disk[..4], b"AAAA");
    }

    /// Scenario 6: a piece that fails hash verification is dropped from
    /// `completed_pieces` and its in-progress record cleared, so the next
    /// scheduling pass re-requests it from scratch.
    #[test]
    fn hash_mismatch_clears_the_record_so_the_piece_is_re_requested() {
        let torrent = two_piece_torrent(b"AAAA", b"BBBB");
        let tmp = tempfile::NamedTempFile::new().unwrap();
        let mut storage = Storage::new(&torrent, tmp.path()).unwrap();
        let (mut session, _peer) = test_session(torrent.piece_count());

        session.available_pieces.insert(0);
        session.am_interested = true;
        session.peer_choking = false;
        session
            .pieces_in_progress
            .insert(0, PieceProgress::new(4));

        session
            .handle_message(
                Message::Piece(0, 0, b"XXXX".to_vec()),
                &torrent,
                &mut storage,
            )
            .unwrap();

        assert!(!session.completed_pieces.contains(&0));
        // A fresh record was created for piece 0 rather than leaving it gone.
        assert!(session.pieces_in_progress.contains_key(&0));
        assert!(session.pieces_in_progress[&0].blocks.is_empty());
    }

    #[test]
    fn have_index_past_total_pieces_is_ignored() {
        let torrent = two_piece_torrent(b"AAAA", b"BBBB");
        let tmp = tempfile::NamedTempFile::new().unwrap();
        let mut storage = Storage::new(&torrent, tmp.path()).unwrap();
        let (mut session, _peer) = test_session(torrent.piece_count());

        session
            .handle_message(Message::Have(99), &torrent, &mut storage)
            .unwrap();

        assert!(session.available_pieces.is_empty());
        assert!(!session.am_interested);
    }

    #[test]
    fn piece_progress_completes_only_once_every_offset_is_filled() {
        let mut progress = PieceProgress::new(32768);
        assert!(!progress.is_complete());
        progress.blocks.insert(0, vec![0u8; 16384]);
        assert!(!progress.is_complete());
        progress.blocks.insert(16384, vec![0u8; 16384]);
        assert!(progress.is_complete());
    }

    #[test]
    fn piece_progress_handles_short_final_block() {
        let mut progress = PieceProgress::new(20000);
        progress.blocks.insert(0, vec![0u8; 16384]);
        progress.blocks.insert(16384, vec![0u8; 3616]);
        assert!(progress.is_complete());
        assert_eq!(progress.assemble().len(), 20000);
    }
}
