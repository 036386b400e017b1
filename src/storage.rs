//! Output file handling: pre-sizing the destination file and persisting
//! verified pieces at their byte offset. Piece verification itself
//! (independent per-piece SHA-1, not a single hash over the whole file)
//! lives here too, since it's the gate before a write is allowed.

use crate::error::Result;
use crate::torrent::Torrent;
use sha1::{Digest, Sha1};
use std::fs::{File, OpenOptions};
use std::io::{Seek, SeekFrom, Write};
use std::path::Path;

#[derive(Debug)]
pub struct Storage {
    file: File,
    piece_length: i64,
    pieces: Vec<[u8; 20]>,
    total_length: i64,
}

impl Storage {
    /// Opens (creating if needed) the output file and pre-sizes it to the
    /// torrent's total length, per the "contiguous scratch file" approach —
    /// multi-file layouts are a post-processing step outside this crate's
    /// core.
    pub fn new(torrent: &Torrent, path: impl AsRef<Path>) -> Result<Storage> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .open(path)?;
        let total_length = torrent.total_length();
        file.set_len(total_length.max(0) as u64)?;

        Ok(Storage {
            file,
            piece_length: torrent.piece_length,
            pieces: torrent.pieces.clone(),
            total_length,
        })
    }

    /// Verifies `data` against the expected hash for `index` and, on a
    /// match, writes it to the output file at `index * piece_length`.
    /// Returns whether the piece verified; a caller that gets `false`
    /// should discard its in-progress record and re-request the piece.
    pub fn write_piece(&mut self, index: usize, data: &[u8]) -> Result<bool> {
        let expected = self
            .pieces
            .get(index)
            .expect("piece index out of range for this torrent");

        let digest: [u8; 20] = Sha1::digest(data).into();
        if &digest != expected {
            log::warn!("piece {index} failed hash verification, discarding");
            return Ok(false);
        }

        let offset = index as u64 * self.piece_length as u64;
        self.file.seek(SeekFrom::Start(offset))?;
        self.file.write_all(data)?;
        Ok(true)
    }

    pub fn total_length(&self) -> i64 {
        self.total_length
    }

    pub fn piece_count(&self) -> usize {
        self.pieces.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bencode::{self, Value};
    use std::collections::BTreeMap;

    fn torrent_with_one_piece(data: &[u8]) -> Torrent {
        let digest: [u8; 20] = Sha1::digest(data).into();

        let mut info = BTreeMap::new();
        info.insert(b"name".to_vec(), Value::Bytes(b"x".to_vec()));
        info.insert(b"piece length".to_vec(), Value::Int(data.len() as i64));
        info.insert(b"pieces".to_vec(), Value::Bytes(digest.to_vec()));
        info.insert(b"length".to_vec(), Value::Int(data.len() as i64));
        let mut root = BTreeMap::new();
        root.insert(
            b"announce".to_vec(),
            Value::Bytes(b"http://tracker.example/announce".to_vec()),
        );
        root.insert(b"info".to_vec(), Value::Dict(info));

        Torrent::from_bytes(&bencode::encode(&Value::Dict(root))).unwrap()
    }

    #[test]
    fn writes_matching_piece_and_reports_success() {
        let data = b"hello world piece bytes";
        let torrent = torrent_with_one_piece(data);
        let tmp = tempfile::NamedTempFile::new().unwrap();

        let mut storage = Storage::new(&torrent, tmp.path()).unwrap();
        let wrote = storage.write_piece(0, data).unwrap();
        assert!(wrote);

        let on_disk = std::fs::read(tmp.path()).unwrap();
        assert_eq!(&on_disk[..data.len()], data);
    }

    #[test]
    fn rejects_piece_with_wrong_hash() {
        let data = b"hello world piece bytes";
        let torrent = torrent_with_one_piece(data);
        let tmp = tempfile::NamedTempFile::new().unwrap();

        let mut storage = Storage::new(&torrent, tmp.path()).unwrap();
        let wrote = storage.write_piece(0, b"not the right bytes!!!!").unwrap();
        assert!(!wrote);
    }

    #[test]
    fn pre_sizes_file_to_total_length() {
        let data = b"0123456789abcdef";
        let torrent = torrent_with_one_piece(data);
        let tmp = tempfile::NamedTempFile::new().unwrap();

        let _storage = Storage::new(&torrent, tmp.path()).unwrap();
        let metadata = std::fs::metadata(tmp.path()).unwrap();
        assert_eq!(metadata.len(), data.len() as u64);
    }
}
