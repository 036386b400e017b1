pub mod bencode;
pub mod bitfield;
pub mod error;
pub mod storage;
pub mod torrent;
pub mod tracker;
pub mod utils;

pub mod peer {
    pub mod handshake;
    pub mod message;
    pub mod session;
}
