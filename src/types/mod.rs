//! Serialization primitives shared by the VM.
//!
//! - `encoding`: deterministic little-endian `Encode`/`Decode`
//! - `hash`: SHA3-256 digests over encoded values

pub mod encoding;
pub mod hash;
