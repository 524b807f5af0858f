//! Tagged machine words.
//!
//! Every field of every quad is an [`Any`]: a 32-bit word whose top bits
//! select one of four classes.
//!
//! | class      | DIR | MUT | OPQ | payload                  |
//! |------------|-----|-----|-----|--------------------------|
//! | fixnum     | 1   | -   | -   | 31-bit signed integer    |
//! | ROM ptr    | 0   | 0   | -   | immutable quad offset    |
//! | RAM ptr    | 0   | 1   | 0   | mutable quad offset      |
//! | capability | 0   | 1   | 1   | opaque actor/proxy offset|
//!
//! Low ROM and RAM offsets are reserved for constants, type descriptors,
//! the allocator/queue roots, device actors and the root sponsor.

use crate::virtual_machine::errors::Fault;
use std::fmt;
use ufork_derive::BinaryCodec;

pub const DIR_RAW: u32 = 0x8000_0000;
pub const MUT_RAW: u32 = 0x4000_0000;
pub const OPQ_RAW: u32 = 0x2000_0000;
pub const MSK_RAW: u32 = 0xF000_0000;
/// Offset bits of a pointer or capability.
pub const OFS_MASK: u32 = 0x0FFF_FFFF;

pub const FIX_MAX: i32 = (1 << 30) - 1;
pub const FIX_MIN: i32 = -(1 << 30);

/// A tagged word: fixnum, ROM pointer, RAM pointer or capability.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, BinaryCodec)]
pub struct Any(u32);

impl Any {
    pub const fn new(raw: u32) -> Any {
        Any(raw)
    }

    pub const fn raw(self) -> u32 {
        self.0
    }

    /// Encodes the low 31 bits of `num`; used for constants known to be in range.
    pub const fn fix(num: i32) -> Any {
        Any(DIR_RAW | (num as u32 & !DIR_RAW))
    }

    /// Encodes `num` as a fixnum, saturating to `FIX_MIN..=FIX_MAX`.
    pub const fn fixnum(num: i32) -> Any {
        let n = if num > FIX_MAX {
            FIX_MAX
        } else if num < FIX_MIN {
            FIX_MIN
        } else {
            num
        };
        Any::fix(n)
    }

    /// Sign-extends the 31-bit payload. Only meaningful when [`Any::is_fix`].
    pub const fn fix_to_i32(self) -> i32 {
        ((self.0 << 1) as i32) >> 1
    }

    pub const fn rom(ofs: usize) -> Any {
        Any(ofs as u32 & OFS_MASK)
    }

    pub const fn ram(ofs: usize) -> Any {
        Any(MUT_RAW | (ofs as u32 & OFS_MASK))
    }

    pub const fn cap(ofs: usize) -> Any {
        Any(MUT_RAW | OPQ_RAW | (ofs as u32 & OFS_MASK))
    }

    pub const fn ofs(self) -> usize {
        (self.0 & OFS_MASK) as usize
    }

    pub const fn is_fix(self) -> bool {
        (self.0 & DIR_RAW) != 0
    }

    pub const fn is_cap(self) -> bool {
        (self.0 & (DIR_RAW | MUT_RAW | OPQ_RAW)) == (MUT_RAW | OPQ_RAW)
    }

    pub const fn is_rom(self) -> bool {
        (self.0 & (DIR_RAW | MUT_RAW)) == 0
    }

    pub const fn is_ram(self) -> bool {
        (self.0 & (DIR_RAW | MUT_RAW | OPQ_RAW)) == MUT_RAW
    }

    /// ROM or RAM pointer; capabilities are not directly dereferenceable.
    pub const fn is_ptr(self) -> bool {
        self.is_rom() || self.is_ram()
    }

    pub const fn fix_num(self) -> Option<i32> {
        if self.is_fix() {
            Some(self.fix_to_i32())
        } else {
            None
        }
    }

    pub fn get_fix(self) -> Result<i32, Fault> {
        self.fix_num().ok_or(Fault::NotFix(self))
    }

    /// Built-in types whose quads only the core itself creates.
    pub fn is_reserved_type(self) -> bool {
        [FIXNUM_T, ACTOR_T, PROXY_T, STUB_T, FWD_REF_T, FREE_T].contains(&self)
    }

    /// Sets the opaque bit of a RAM pointer; anything else yields `UNDEF`.
    pub const fn ptr_to_cap(self) -> Any {
        if self.is_ram() {
            Any(self.0 | OPQ_RAW)
        } else {
            UNDEF
        }
    }

    /// Clears the opaque bit of a capability; anything else yields `UNDEF`.
    pub const fn cap_to_ptr(self) -> Any {
        if self.is_cap() {
            Any(self.0 & !OPQ_RAW)
        } else {
            UNDEF
        }
    }

    /// The RAM pointer behind a RAM pointer or capability.
    pub const fn to_ram(self) -> Option<Any> {
        if self.is_ram() {
            Some(self)
        } else if self.is_cap() {
            Some(self.cap_to_ptr())
        } else {
            None
        }
    }

    /// `#f`, `#?`, `()` and `0` are false; everything else is true.
    pub fn falsy(self) -> bool {
        self == FALSE || self == UNDEF || self == NIL || self == ZERO
    }

    pub const fn from_bool(b: bool) -> Any {
        if b { TRUE } else { FALSE }
    }

    fn reserved_name(self) -> Option<&'static str> {
        if !self.is_rom() || self.ofs() >= ROM_BASE_OFS {
            return None;
        }
        const NAMES: [&str; ROM_BASE_OFS] = [
            "#?", "()", "#f", "#t", "#unit", "#empty_dq", "#type_t", "#fixnum_t", "#actor_t",
            "#proxy_t", "#stub_t", "#instr_t", "#pair_t", "#dict_t", "#fwd_ref_t", "#free_t",
        ];
        Some(NAMES[self.ofs()])
    }
}

/// Renders fixnums as `+n`/`-n`, reserved constants by name, ROM as `^ofs`,
/// RAM as `@ofs` and capabilities as `&ofs` (hex offsets).
impl fmt::Display for Any {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(n) = self.fix_num() {
            write!(f, "{:+}", n)
        } else if let Some(name) = self.reserved_name() {
            f.write_str(name)
        } else if self.is_rom() {
            write!(f, "^{:x}", self.ofs())
        } else if self.is_ram() {
            write!(f, "@{:x}", self.ofs())
        } else {
            write!(f, "&{:x}", self.ofs())
        }
    }
}

impl fmt::Debug for Any {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} (${:08x})", self, self.0)
    }
}

// literal values
pub const UNDEF: Any = Any::rom(0x00);
pub const NIL: Any = Any::rom(0x01);
pub const FALSE: Any = Any::rom(0x02);
pub const TRUE: Any = Any::rom(0x03);
pub const ROM_04: Any = Any::rom(0x04);
pub const EMPTY_DQ: Any = Any::rom(0x05);

// type descriptors
pub const TYPE_T: Any = Any::rom(0x06);
pub const FIXNUM_T: Any = Any::rom(0x07);
pub const ACTOR_T: Any = Any::rom(0x08);
pub const PROXY_T: Any = Any::rom(0x09);
pub const STUB_T: Any = Any::rom(0x0A);
pub const INSTR_T: Any = Any::rom(0x0B);
pub const PAIR_T: Any = Any::rom(0x0C);
pub const DICT_T: Any = Any::rom(0x0D);
pub const FWD_REF_T: Any = Any::rom(0x0E);
pub const FREE_T: Any = Any::rom(0x0F);

/// First ROM offset handed out by the loader.
pub const ROM_BASE_OFS: usize = 0x10;
/// Literal quads carry `UNDEF` in `t`.
pub const LITERAL_T: Any = UNDEF;

// reserved RAM
pub const MEMORY: Any = Any::ram(0x00);
pub const DDEQUE: Any = Any::ram(0x01);
pub const DEBUG_DEV: Any = Any::cap(0x02);
pub const CLOCK_DEV: Any = Any::cap(0x03);
pub const TIMER_DEV: Any = Any::cap(0x04);
pub const IO_DEV: Any = Any::cap(0x05);
pub const BLOB_DEV: Any = Any::cap(0x06);
pub const RANDOM_DEV: Any = Any::cap(0x07);
pub const HOST_DEV: Any = Any::cap(0x0E);
pub const SPONSOR: Any = Any::ram(0x0F);

/// First RAM offset handed out by the allocator.
pub const RAM_BASE_OFS: usize = 0x10;
/// RAM offset of the first device actor.
pub const DEVICE_BASE_OFS: usize = 0x02;
pub const DEVICE_MAX: usize = 13;

pub const QUAD_ROM_MAX: usize = 1 << 13;
pub const QUAD_RAM_MAX: usize = 1 << 12;

pub const MINUS_1: Any = Any::fix(-1);
pub const ZERO: Any = Any::fix(0);
pub const PLUS_1: Any = Any::fix(1);
pub const PLUS_2: Any = Any::fix(2);
pub const PLUS_3: Any = Any::fix(3);
