use rand::Rng;

/// A 20-byte peer-id: the 8-byte client convention prefix `-TT0001-`
/// followed by 12 random bytes.
pub fn generate_peer_id() -> [u8; 20] {
    let mut peer_id = [0u8; 20];
    peer_id[..8].copy_from_slice(b"-TT0001-");
    rand::thread_rng().fill(&mut peer_id[8..]);
    peer_id
}
