//! Torrent metainfo: reads a `.torrent` file, decodes it through the
//! [`crate::bencode`] codec, and exposes a typed view plus the info-hash.

use crate::bencode::{self, Value};
use crate::error::{Error, Result};
use sha1::{Digest, Sha1};
use std::fs;
use std::path::Path;

/// One entry of a multi-file torrent's `files` list.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileEntry {
    pub path: Vec<String>,
    pub length: i64,
}

/// Either a single output file or a list of files laid end to end.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Layout {
    SingleFile { length: i64 },
    MultiFile { files: Vec<FileEntry> },
}

/// A parsed torrent: the fields the rest of the crate needs, plus the raw
/// `info` sub-dictionary (kept around so re-encoding it is always possible,
/// even though the info-hash is computed eagerly at parse time).
#[derive(Debug, Clone)]
pub struct Torrent {
    pub announce: String,
    pub name: String,
    pub piece_length: i64,
    pub pieces: Vec<[u8; 20]>,
    pub layout: Layout,
    pub info_hash: [u8; 20],
    info: Value,
}

impl Torrent {
    pub fn from_file(path: impl AsRef<Path>) -> Result<Torrent> {
        let bytes = fs::read(path)?;
        Torrent::from_bytes(&bytes)
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Torrent> {
        let root = bencode::decode(bytes)?;
        let root_dict = root
            .as_dict()
            .ok_or_else(|| Error::MalformedTorrent("top-level value is not a dictionary".into()))?;

        let announce = root_dict
            .get(b"announce".as_slice())
            .and_then(Value::as_bytes)
            .ok_or_else(|| Error::MalformedTorrent("missing announce".into()))?;
        let announce = String::from_utf8(announce.to_vec())
            .map_err(|_| Error::MalformedTorrent("announce is not valid UTF-8".into()))?;

        let info = root_dict
            .get(b"info".as_slice())
            .ok_or_else(|| Error::MalformedTorrent("missing info dictionary".into()))?
            .clone();
        let info_dict = info
            .as_dict()
            .ok_or_else(|| Error::MalformedTorrent("info is not a dictionary".into()))?;

        let info_hash: [u8; 20] = {
            let encoded = bencode::encode(&info);
            let digest = Sha1::digest(&encoded);
            digest.into()
        };

        let name = info_dict
            .get(b"name".as_slice())
            .and_then(Value::as_bytes)
            .ok_or_else(|| Error::MalformedTorrent("missing info.name".into()))?;
        let name = String::from_utf8_lossy(name).into_owned();

        let piece_length = info_dict
            .get(b"piece length".as_slice())
            .and_then(Value::as_int)
            .ok_or_else(|| Error::MalformedTorrent("missing info.piece length".into()))?;
        if piece_length <= 0 {
            return Err(Error::MalformedTorrent("piece length must be positive".into()));
        }

        let pieces_raw = info_dict
            .get(b"pieces".as_slice())
            .and_then(Value::as_bytes)
            .ok_or_else(|| Error::MalformedTorrent("missing info.pieces".into()))?;
        if pieces_raw.len() % 20 != 0 {
            return Err(Error::MalformedTorrent(
                "pieces length is not a multiple of 20".into(),
            ));
        }
        let pieces = pieces_raw
            .chunks_exact(20)
            .map(|chunk| {
                let mut hash = [0u8; 20];
                hash.copy_from_slice(chunk);
                hash
            })
            .collect();

        let layout = if let Some(length) = info_dict.get(b"length".as_slice()).and_then(Value::as_int) {
            Layout::SingleFile { length }
        } else if let Some(files) = info_dict.get(b"files".as_slice()).and_then(Value::as_list) {
            let mut entries = Vec::with_capacity(files.len());
            for file in files {
                let file_dict = file.as_dict().ok_or_else(|| {
                    Error::MalformedTorrent("files entry is not a dictionary".into())
                })?;
                let length = file_dict
                    .get(b"length".as_slice())
                    .and_then(Value::as_int)
                    .ok_or_else(|| Error::MalformedTorrent("file entry missing length".into()))?;
                let path_list = file_dict
                    .get(b"path".as_slice())
                    .and_then(Value::as_list)
                    .ok_or_else(|| Error::MalformedTorrent("file entry missing path".into()))?;
                let mut path = Vec::with_capacity(path_list.len());
                for part in path_list {
                    let part = part
                        .as_bytes()
                        .ok_or_else(|| Error::MalformedTorrent("path component not a string".into()))?;
                    path.push(String::from_utf8_lossy(part).into_owned());
                }
                entries.push(FileEntry { path, length });
            }
            Layout::MultiFile { files: entries }
        } else {
            return Err(Error::MalformedTorrent(
                "info has neither length nor files".into(),
            ));
        };

        Ok(Torrent {
            announce,
            name,
            piece_length,
            pieces,
            layout,
            info_hash,
            info,
        })
    }

    /// Total content length, single-file or summed across `files`.
    pub fn total_length(&self) -> i64 {
        match &self.layout {
            Layout::SingleFile { length } => *length,
            Layout::MultiFile { files } => files.iter().map(|f| f.length).sum(),
        }
    }

    pub fn piece_count(&self) -> usize {
        self.pieces.len()
    }

    /// Length of a given piece, accounting for the final (possibly shorter)
    /// piece. Panics if `index >= piece_count()`, same as any other
    /// out-of-bounds indexing in this crate.
    pub fn piece_length_for(&self, index: usize) -> i64 {
        assert!(index < self.piece_count());
        let remaining = self.total_length() - index as i64 * self.piece_length;
        remaining.min(self.piece_length)
    }

    /// The raw, decoded `info` sub-dictionary, preserved in case a caller
    /// needs to re-encode or inspect fields this view doesn't expose.
    pub fn raw_info(&self) -> &Value {
        &self.info
    }
}
