//! Heap snapshots.
//!
//! A snapshot is the raw little-endian image of ROM `[0, rom_top)` and RAM
//! `[0, ram_top)`. Since every piece of core state lives in the quad banks,
//! restoring a snapshot reproduces the core exactly, except for device
//! tables and host callbacks. Two cores that ran the same inputs produce
//! byte-identical snapshots, which [`Snapshot::digest`] makes cheap to compare.

use crate::info;
use crate::types::encoding::{Decode, DecodeError, Encode};
use crate::types::hash::Hash;
use crate::virtual_machine::any::*;
use crate::virtual_machine::errors::HostError;
use crate::virtual_machine::quad::{Quad, QUAD_BYTES};
use crate::virtual_machine::vm::Core;
use std::path::Path;
use ufork_derive::BinaryCodec;

#[derive(Clone, Debug, Default, PartialEq, Eq, BinaryCodec)]
pub struct Snapshot {
    pub rom: Vec<u8>,
    pub ram: Vec<u8>,
}

impl Snapshot {
    /// SHA3-256 of the encoded snapshot.
    pub fn digest(&self) -> Hash {
        Hash::of(self)
    }

    pub fn save(&self, path: impl AsRef<Path>) -> std::io::Result<()> {
        std::fs::write(path, self.to_bytes())
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Snapshot, HostError> {
        let bytes = std::fs::read(path)?;
        Ok(Snapshot::from_bytes(&bytes)?)
    }

    fn quads(bytes: &[u8], reserved: usize, limit: usize) -> Result<Vec<Quad>, DecodeError> {
        if bytes.len() % QUAD_BYTES != 0 {
            return Err(DecodeError::UnexpectedEof);
        }
        let count = bytes.len() / QUAD_BYTES;
        if count < reserved || count > limit {
            return Err(DecodeError::LengthOverflow);
        }
        bytes.chunks_exact(QUAD_BYTES).map(Quad::from_bytes).collect()
    }
}

fn image_bytes(quads: &[Quad]) -> Vec<u8> {
    let mut out = Vec::with_capacity(quads.len() * QUAD_BYTES);
    for quad in quads {
        quad.encode(&mut out);
    }
    out
}

impl Core {
    pub fn snapshot(&self) -> Snapshot {
        Snapshot {
            rom: image_bytes(self.rom_image()),
            ram: image_bytes(self.ram_image()),
        }
    }

    /// Replaces both banks with the snapshot's images and rebuilds the GC
    /// colors. The core is unchanged when the snapshot does not fit.
    pub fn restore(&mut self, snapshot: &Snapshot) -> Result<(), DecodeError> {
        let rom = Snapshot::quads(&snapshot.rom, ROM_BASE_OFS, self.config().rom_max)?;
        let ram = Snapshot::quads(&snapshot.ram, RAM_BASE_OFS, self.config().ram_max)?;
        if ram[MEMORY.ofs()].t.fix_num() != Some(ram.len() as i32) {
            return Err(DecodeError::InvalidValue);
        }
        self.load_images(&rom, &ram);
        info!(
            "restored snapshot: rom_top={} ram_top={}",
            rom.len(),
            ram.len()
        );
        Ok(())
    }
}
