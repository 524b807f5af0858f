//! Core sizing and root sponsor quotas.

use crate::virtual_machine::any::{OFS_MASK, QUAD_RAM_MAX, QUAD_ROM_MAX, RAM_BASE_OFS, ROM_BASE_OFS};
use crate::virtual_machine::errors::ConfigError;

pub const DEFAULT_GC_STRIDE: usize = 32;
pub const DEFAULT_MEMORY: i32 = 4096;
pub const DEFAULT_EVENTS: i32 = 256;
pub const DEFAULT_CYCLES: i32 = 8192;

/// Configuration for a [`Core`](crate::virtual_machine::vm::Core).
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CoreConfig {
    /// ROM bank size in quads.
    pub rom_max: usize,
    /// RAM bank size in quads.
    pub ram_max: usize,
    /// Units of GC work per run-loop iteration.
    pub gc_stride: usize,
    pub memory: i32,
    pub events: i32,
    pub cycles: i32,
}

impl Default for CoreConfig {
    fn default() -> Self {
        Self {
            rom_max: QUAD_ROM_MAX,
            ram_max: QUAD_RAM_MAX,
            gc_stride: DEFAULT_GC_STRIDE,
            memory: DEFAULT_MEMORY,
            events: DEFAULT_EVENTS,
            cycles: DEFAULT_CYCLES,
        }
    }
}

impl CoreConfig {
    pub fn with_rom_max(mut self, rom_max: usize) -> Self {
        self.rom_max = rom_max;
        self
    }

    pub fn with_ram_max(mut self, ram_max: usize) -> Self {
        self.ram_max = ram_max;
        self
    }

    pub fn with_gc_stride(mut self, gc_stride: usize) -> Self {
        self.gc_stride = gc_stride;
        self
    }

    /// Sets the root sponsor quotas.
    pub fn with_quotas(mut self, memory: i32, events: i32, cycles: i32) -> Self {
        self.memory = memory;
        self.events = events;
        self.cycles = cycles;
        self
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        check_bank("rom", self.rom_max, ROM_BASE_OFS)?;
        check_bank("ram", self.ram_max, RAM_BASE_OFS)?;
        if self.gc_stride == 0 {
            return Err(ConfigError::ZeroStride);
        }
        for (name, value) in [
            ("memory", self.memory),
            ("events", self.events),
            ("cycles", self.cycles),
        ] {
            if value < 0 {
                return Err(ConfigError::NegativeQuota { name, value });
            }
        }
        Ok(())
    }
}

fn check_bank(bank: &'static str, size: usize, reserved: usize) -> Result<(), ConfigError> {
    if size <= reserved {
        return Err(ConfigError::BankTooSmall {
            bank,
            size,
            reserved,
        });
    }
    if size > OFS_MASK as usize + 1 {
        return Err(ConfigError::BankTooLarge { bank, size });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        let config = CoreConfig::default();
        assert_eq!(config.rom_max, 8192);
        assert_eq!(config.ram_max, 4096);
        assert_eq!(config.gc_stride, 32);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn rejects_tiny_banks() {
        let err = CoreConfig::default().with_ram_max(16).validate().unwrap_err();
        assert_eq!(
            err,
            ConfigError::BankTooSmall {
                bank: "ram",
                size: 16,
                reserved: RAM_BASE_OFS
            }
        );
    }

    #[test]
    fn rejects_oversized_banks() {
        let err = CoreConfig::default()
            .with_rom_max(1 << 29)
            .validate()
            .unwrap_err();
        assert!(matches!(err, ConfigError::BankTooLarge { bank: "rom", .. }));
    }

    #[test]
    fn rejects_zero_stride_and_negative_quota() {
        assert_eq!(
            CoreConfig::default().with_gc_stride(0).validate(),
            Err(ConfigError::ZeroStride)
        );
        assert_eq!(
            CoreConfig::default().with_quotas(10, -1, 10).validate(),
            Err(ConfigError::NegativeQuota {
                name: "events",
                value: -1
            })
        );
    }
}
