//! Tracker clients: HTTP(S) announce (BEP 3) and UDP announce (BEP 15),
//! dispatched by the scheme of the torrent's `announce` URL.

pub mod http;
pub mod udp;

use crate::error::{Error, Result};
use crate::torrent::Torrent;
use std::net::SocketAddr;

/// The event field of an announce, per BEP 3 §"event".
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Event {
    /// First announce of a download.
    Started,
    /// Sent when the client is shutting down gracefully.
    Stopped,
    /// Sent when the download completes.
    Completed,
    /// Any announce after the first that isn't stopped/completed.
    None,
}

/// The fields every announce request carries, independent of transport.
#[derive(Debug, Clone)]
pub struct AnnounceParams {
    pub peer_id: [u8; 20],
    pub port: u16,
    pub uploaded: u64,
    pub downloaded: u64,
    pub left: u64,
    pub event: Event,
}

/// What a tracker (of either transport) hands back.
#[derive(Debug, Clone)]
pub struct AnnounceResult {
    pub interval: u64,
    pub peers: Vec<SocketAddr>,
}

/// Announces to `torrent`'s tracker, picking the transport from the
/// announce URL's scheme.
///
/// A failed announce does not propagate as an error: the caller gets an
/// empty peer list back and may retry, with another tracker or later,
/// instead of the whole pipeline dying because one tracker had a bad day.
/// An unparseable or unsupported URL scheme is different — that's a
/// configuration problem this client can't work around, so it still fails
/// the call outright.
pub fn announce(torrent: &Torrent, params: &AnnounceParams) -> Result<AnnounceResult> {
    let url = url::Url::parse(&torrent.announce)
        .map_err(|e| Error::TrackerProtocolError(format!("invalid announce url: {e}")))?;

    let result = match url.scheme() {
        "http" | "https" => http::announce(torrent, &url, params),
        "udp" => udp::announce(torrent, &url, params),
        other => return Err(Error::UnsupportedScheme(other.to_string())),
    };

    match result {
        Ok(result) => Ok(result),
        Err(err) => {
            log::warn!("announce to {} failed: {err}", torrent.announce);
            Ok(AnnounceResult {
                interval: 0,
                peers: Vec::new(),
            })
        }
    }
}
