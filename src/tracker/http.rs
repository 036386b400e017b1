//! HTTP(S) tracker client (BEP 3). Requests go out over `reqwest::blocking`
//! so TLS (and redirects, proxies, etc.) are handled by a real HTTP stack
//! rather than hand-rolled socket code; the query string's binary fields
//! are still percent-encoded byte-for-byte, since `info_hash`/`peer_id`
//! are raw 20-byte strings that happen to live in a URL.

use super::{AnnounceParams, AnnounceResult, Event};
use crate::bencode::{self, Value};
use crate::error::{Error, Result};
use crate::torrent::Torrent;
use std::net::{Ipv4Addr, Ipv6Addr, SocketAddr, SocketAddrV4, SocketAddrV6};
use std::time::Duration;
use url::Url;

fn event_str(event: Event) -> Option<&'static str> {
    match event {
        Event::Started => Some("started"),
        Event::Stopped => Some("stopped"),
        Event::Completed => Some("completed"),
        Event::None => None,
    }
}

fn build_url(torrent: &Torrent, base: &Url, params: &AnnounceParams) -> String {
    let mut query = format!(
        "info_hash={}&peer_id={}&port={}&uploaded={}&downloaded={}&left={}&compact=1",
        urlencoding::encode_binary(&torrent.info_hash),
        urlencoding::encode_binary(&params.peer_id),
        params.port,
        params.uploaded,
        params.downloaded,
        params.left,
    );
    if let Some(event) = event_str(params.event) {
        query.push_str("&event=");
        query.push_str(event);
    }

    let mut url = base.clone();
    url.set_query(Some(&query));
    url.to_string()
}

pub fn announce(torrent: &Torrent, base: &Url, params: &AnnounceParams) -> Result<AnnounceResult> {
    let request_url = build_url(torrent, base, params);
    log::debug!("announcing to {}", base);

    let client = reqwest::blocking::Client::builder()
        .timeout(Duration::from_secs(15))
        .build()
        .map_err(|e| Error::TrackerProtocolError(e.to_string()))?;

    let response = client.get(&request_url).send().map_err(|e| {
        if e.is_timeout() {
            Error::TrackerTimeout
        } else {
            Error::TrackerProtocolError(e.to_string())
        }
    })?;

    let body = response
        .bytes()
        .map_err(|e| Error::TrackerProtocolError(e.to_string()))?;

    parse_announce_response(&body)
}

fn parse_announce_response(body: &[u8]) -> Result<AnnounceResult> {
    let value = bencode::decode(body)?;
    let dict = value
        .as_dict()
        .ok_or_else(|| Error::TrackerProtocolError("response is not a dictionary".into()))?;

    if let Some(reason) = dict.get(b"failure reason".as_slice()).and_then(Value::as_bytes) {
        return Err(Error::TrackerRejected(
            String::from_utf8_lossy(reason).into_owned(),
        ));
    }

    let interval = dict
        .get(b"interval".as_slice())
        .and_then(Value::as_int)
        .ok_or_else(|| Error::TrackerProtocolError("missing interval".into()))?;

    let peers_value = dict
        .get(b"peers".as_slice())
        .ok_or_else(|| Error::TrackerProtocolError("missing peers".into()))?;

    let peers = match peers_value {
        Value::Bytes(compact) => parse_compact_peers(compact)?,
        Value::List(entries) => entries
            .iter()
            .filter_map(|entry| {
                let dict = entry.as_dict()?;
                let ip = dict.get(b"ip".as_slice()).and_then(Value::as_bytes)?;
                let ip = std::str::from_utf8(ip).ok()?;
                let ip: std::net::IpAddr = ip.parse().ok()?;
                let port = dict.get(b"port".as_slice()).and_then(Value::as_int)?;
                Some(SocketAddr::new(ip, port as u16))
            })
            .collect(),
        _ => return Err(Error::TrackerProtocolError("malformed peers field".into())),
    };

    Ok(AnnounceResult {
        interval: interval as u64,
        peers,
    })
}

/// Unpacks the compact peer format: 6 bytes per IPv4 peer, or 18 per IPv6
/// peer when requested over `peers6`. This crate always requests the IPv4
/// compact form (6-byte stride).
fn parse_compact_peers(raw: &[u8]) -> Result<Vec<SocketAddr>> {
    if raw.len() % 6 == 0 {
        Ok(raw
            .chunks_exact(6)
            .map(|chunk| {
                let ip = Ipv4Addr::new(chunk[0], chunk[1], chunk[2], chunk[3]);
                let port = u16::from_be_bytes([chunk[4], chunk[5]]);
                SocketAddr::V4(SocketAddrV4::new(ip, port))
            })
            .collect())
    } else if raw.len() % 18 == 0 {
        Ok(raw
            .chunks_exact(18)
            .map(|chunk| {
                let mut octets = [0u8; 16];
                octets.copy_from_slice(&chunk[0..16]);
                let ip = Ipv6Addr::from(octets);
                let port = u16::from_be_bytes([chunk[16], chunk[17]]);
                SocketAddr::V6(SocketAddrV6::new(ip, port, 0, 0))
            })
            .collect())
    } else {
        Err(Error::TrackerProtocolError(
            "compact peers field has unexpected length".into(),
        ))
    }
}
