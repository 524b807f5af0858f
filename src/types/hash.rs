//! 32-byte SHA3-256 digests of heap images.

use crate::types::encoding::{Encode, EncodeSink};
use sha3::{Digest, Sha3_256};
use std::fmt;
use ufork_derive::BinaryCodec;

/// SHA3-256 hash length in bytes.
pub const HASH_LEN: usize = 32;

/// Digest used to compare snapshots for determinism.
#[derive(Clone, Copy, Debug, PartialEq, Eq, BinaryCodec, Default, Hash)]
pub struct Hash(pub [u8; HASH_LEN]);

impl Hash {
    pub fn as_slice(&self) -> &[u8] {
        &self.0
    }

    /// Creates a new SHA3-256 hash builder for incremental hashing.
    pub fn sha3() -> HashBuilder {
        HashBuilder::new()
    }

    /// Hashes the binary encoding of `value` without an intermediate buffer.
    pub fn of<T: Encode>(value: &T) -> Hash {
        let mut h = Hash::sha3();
        value.encode(&mut h);
        h.finalize()
    }
}

impl fmt::Display for Hash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for byte in &self.0 {
            write!(f, "{:02x}", byte)?;
        }
        Ok(())
    }
}

/// Incremental SHA3-256 hash builder.
///
/// Implements [`EncodeSink`] so encodable types can be hashed directly.
pub struct HashBuilder {
    hasher: Sha3_256,
}

impl HashBuilder {
    pub fn new() -> Self {
        Self {
            hasher: Sha3_256::new(),
        }
    }

    pub fn update(&mut self, data: &[u8]) {
        self.hasher.update(data);
    }

    /// Consumes the builder and returns the final hash.
    pub fn finalize(self) -> Hash {
        Hash(self.hasher.finalize().into())
    }
}

impl EncodeSink for HashBuilder {
    fn write(&mut self, bytes: &[u8]) {
        self.hasher.update(bytes);
    }
}
