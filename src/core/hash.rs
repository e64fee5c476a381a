//! Snapshot Hashing
//!
//! SHA-256 digests over the canonical JSON encoding of a snapshot. All maps
//! in the game state are BTreeMaps, so the encoding (and the digest) is
//! stable for equal states. Used by replicas to spot repeated snapshots and
//! by the host for log correlation.

use serde::Serialize;
use sha2::{Sha256, Digest};

/// Hash output type (256 bits / 32 bytes)
pub type StateHash = [u8; 32];

/// Domain-separated SHA-256 hasher.
pub struct StateHasher {
    hasher: Sha256,
}

impl StateHasher {
    /// Create a new hasher with domain separator.
    pub fn new(domain: &[u8]) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(domain);
        Self { hasher }
    }

    /// Create hasher for game snapshots.
    pub fn for_snapshot() -> Self {
        Self::new(b"DICE_DUNGEON_SNAPSHOT_V1")
    }

    /// Update with raw bytes.
    #[inline]
    pub fn update_bytes(&mut self, bytes: &[u8]) {
        self.hasher.update(bytes);
    }

    /// Finalize and return the hash.
    pub fn finalize(self) -> StateHash {
        self.hasher.finalize().into()
    }
}

/// Digest any serializable snapshot.
pub fn digest_json<T: Serialize>(value: &T) -> Result<StateHash, serde_json::Error> {
    let bytes = serde_json::to_vec(value)?;
    let mut hasher = StateHasher::for_snapshot();
    hasher.update_bytes(&bytes);
    Ok(hasher.finalize())
}

/// Short hex prefix of a digest, for log lines.
pub fn short_hex(hash: &StateHash) -> String {
    hex::encode(&hash[..4])
}
