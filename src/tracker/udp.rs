//! UDP tracker client (BEP 15). The wire format here is raw big-endian
//! binary — never bencode — so every field is packed and unpacked with
//! explicit `byteorder` primitives instead of a serde-style codec.

use super::{AnnounceParams, AnnounceResult, Event};
use crate::error::{Error, Result};
use crate::torrent::Torrent;
use byteorder::{BigEndian, ReadBytesExt, WriteBytesExt};
use rand::Rng;
use std::io::Cursor;
use std::net::{Ipv4Addr, SocketAddr, SocketAddrV4, ToSocketAddrs, UdpSocket};
use std::time::Duration;
use url::Url;

/// Magic constant identifying a connect request, per BEP 15.
const PROTOCOL_ID: u64 = 0x41727101980;
const ACTION_CONNECT: u32 = 0;
const ACTION_ANNOUNCE: u32 = 1;
const ACTION_ERROR: u32 = 3;
const MAX_ATTEMPTS: u32 = 4;

fn event_code(event: Event) -> u32 {
    match event {
        Event::None => 0,
        Event::Completed => 1,
        Event::Started => 2,
        Event::Stopped => 3,
    }
}

fn resolve(url: &Url) -> Result<SocketAddr> {
    let host = url
        .host_str()
        .ok_or_else(|| Error::TrackerProtocolError("udp tracker url has no host".into()))?;
    let port = url
        .port()
        .ok_or_else(|| Error::TrackerProtocolError("udp tracker url has no port".into()))?;
    (host, port)
        .to_socket_addrs()
        .map_err(|e| Error::TrackerProtocolError(e.to_string()))?
        .next()
        .ok_or_else(|| Error::TrackerProtocolError("could not resolve tracker host".into()))
}

/// Connects, then announces, retrying each step with a fixed timeout
/// instead of BEP 15's exponential backoff (15 * 2^n seconds up to 8
/// retries) — a 4-attempt fixed timeout is plenty for a client that isn't
/// trying to survive adversarial network conditions.
pub fn announce(torrent: &Torrent, url: &Url, params: &AnnounceParams) -> Result<AnnounceResult> {
    let addr = resolve(url)?;
    let socket = UdpSocket::bind("0.0.0.0:0").map_err(Error::IoError)?;
    socket.set_read_timeout(Some(Duration::from_secs(5))).ok();

    let connection_id = connect(&socket, addr)?;
    announce_with_connection(&socket, addr, connection_id, torrent, params)
}

fn connect(socket: &UdpSocket, addr: SocketAddr) -> Result<u64> {
    let transaction_id: u32 = rand::thread_rng().gen();
    let mut request = Vec::with_capacity(16);
    request.write_u64::<BigEndian>(PROTOCOL_ID).unwrap();
    request.write_u32::<BigEndian>(ACTION_CONNECT).unwrap();
    request.write_u32::<BigEndian>(transaction_id).unwrap();

    for _ in 0..MAX_ATTEMPTS {
        socket.send_to(&request, addr).map_err(Error::IoError)?;

        let mut buf = [0u8; 512];
        let received = match socket.recv(&mut buf) {
            Ok(n) => n,
            Err(e) if matches!(e.kind(), std::io::ErrorKind::WouldBlock | std::io::ErrorKind::TimedOut) => {
                continue
            }
            Err(e) => return Err(Error::IoError(e)),
        };
        // Every response (success or error) starts with action(4) + transaction_id(4).
        if received < 8 {
            continue;
        }

        let mut cursor = Cursor::new(&buf[..received]);
        let action = cursor.read_u32::<BigEndian>().unwrap();
        let response_txn = cursor.read_u32::<BigEndian>().unwrap();
        if response_txn != transaction_id {
            continue;
        }

        if action == ACTION_ERROR {
            let message = String::from_utf8_lossy(&buf[8..received]).into_owned();
            return Err(Error::TrackerRejected(message));
        }
        if action != ACTION_CONNECT || received < 16 {
            return Err(Error::TrackerProtocolError(
                "udp tracker returned a non-connect action".into(),
            ));
        }
        let connection_id = cursor.read_u64::<BigEndian>().unwrap();
        return Ok(connection_id);
    }

    Err(Error::TrackerTimeout)
}

fn announce_with_connection(
    socket: &UdpSocket,
    addr: SocketAddr,
    connection_id: u64,
    torrent: &Torrent,
    params: &AnnounceParams,
) -> Result<AnnounceResult> {
    let transaction_id: u32 = rand::thread_rng().gen();
    let key: u32 = rand::thread_rng().gen();

    let mut request = Vec::with_capacity(98);
    request.write_u64::<BigEndian>(connection_id).unwrap();
    request.write_u32::<BigEndian>(ACTION_ANNOUNCE).unwrap();
    request.write_u32::<BigEndian>(transaction_id).unwrap();
    request.extend_from_slice(&torrent.info_hash);
    request.extend_from_slice(&params.peer_id);
    request.write_u64::<BigEndian>(params.downloaded).unwrap();
    request.write_u64::<BigEndian>(params.left).unwrap();
    request.write_u64::<BigEndian>(params.uploaded).unwrap();
    request.write_u32::<BigEndian>(event_code(params.event)).unwrap();
    request.write_u32::<BigEndian>(0).unwrap(); // ip_address: 0 = use source address
    request.write_u32::<BigEndian>(key).unwrap();
    request.write_i32::<BigEndian>(-1).unwrap(); // num_want: -1 = default
    request.write_u16::<BigEndian>(params.port).unwrap();

    for _ in 0..MAX_ATTEMPTS {
        socket.send_to(&request, addr).map_err(Error::IoError)?;

        let mut buf = [0u8; 4096];
        let received = match socket.recv(&mut buf) {
            Ok(n) => n,
            Err(e) if matches!(e.kind(), std::io::ErrorKind::WouldBlock | std::io::ErrorKind::TimedOut) => {
                continue
            }
            Err(e) => return Err(Error::IoError(e)),
        };
        // Every response (success or error) starts with action(4) + transaction_id(4).
        if received < 8 {
            continue;
        }

        let mut cursor = Cursor::new(&buf[..received]);
        let action = cursor.read_u32::<BigEndian>().unwrap();
        let response_txn = cursor.read_u32::<BigEndian>().unwrap();
        if response_txn != transaction_id {
            continue;
        }

        if action == ACTION_ERROR {
            let message = String::from_utf8_lossy(&buf[8..received]).into_owned();
            return Err(Error::TrackerRejected(message));
        }
        if action != ACTION_ANNOUNCE || received < 20 {
            return Err(Error::TrackerProtocolError(
                "udp tracker returned a non-announce action".into(),
            ));
        }

        let interval = cursor.read_u32::<BigEndian>().unwrap() as u64;
        let _leechers = cursor.read_u32::<BigEndian>().unwrap();
        let _seeders = cursor.read_u32::<BigEndian>().unwrap();

        let peers_raw = &buf[20..received];
        let peers = peers_raw
            .chunks_exact(6)
            .map(|chunk| {
                let ip = Ipv4Addr::new(chunk[0], chunk[1], chunk[2], chunk[3]);
                let port = u16::from_be_bytes([chunk[4], chunk[5]]);
                SocketAddr::V4(SocketAddrV4::new(ip, port))
            })
            .collect();

        return Ok(AnnounceResult { interval, peers });
    }

    Err(Error::TrackerTimeout)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn event_codes_match_bep_15() {
        assert_eq!(event_code(Event::None), 0);
        assert_eq!(event_code(Event::Completed), 1);
        assert_eq!(event_code(Event::Started), 2);
        assert_eq!(event_code(Event::Stopped), 3);
    }

    #[test]
    fn connect_request_is_16_bytes_with_magic_prefix() {
        let mut request = Vec::with_capacity(16);
        request.write_u64::<BigEndian>(PROTOCOL_ID).unwrap();
        request.write_u32::<BigEndian>(ACTION_CONNECT).unwrap();
        request.write_u32::<BigEndian>(7).unwrap();
        assert_eq!(request.len(), 16);
        assert_eq!(&request[0..8], &PROTOCOL_ID.to_be_bytes());
    }

    #[test]
    fn connect_surfaces_tracker_rejection_message() {
        let tracker = UdpSocket::bind("127.0.0.1:0").unwrap();
        let tracker_addr = tracker.local_addr().unwrap();
        let client = UdpSocket::bind("127.0.0.1:0").unwrap();

        let responder = std::thread::spawn(move || {
            let mut request = [0u8; 16];
            let (_, from) = tracker.recv_from(&mut request).unwrap();
            let transaction_id = Cursor::new(&request[12..16]).read_u32::<BigEndian>().unwrap();

            let mut response = Vec::new();
            response.write_u32::<BigEndian>(ACTION_ERROR).unwrap();
            response.write_u32::<BigEndian>(transaction_id).unwrap();
            response.extend_from_slice(b"torrent not registered");
            tracker.send_to(&response, from).unwrap();
        });

        let result = connect(&client, tracker_addr);
        responder.join().unwrap();

        match result {
            Err(Error::TrackerRejected(message)) => assert_eq!(message, "torrent not registered"),
            other => panic!("expected TrackerRejected, got {other:?}"),
        }
    }
}
