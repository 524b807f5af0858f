//! The quad: four tagged words `t, x, y, z`, the only unit of heap storage.
//!
//! The raw layout is what lives in ROM/RAM and in snapshots. [`Role`]
//! decodes a quad into a typed view at API edges.

use crate::virtual_machine::any::*;
use std::fmt;
use ufork_derive::BinaryCodec;

/// Size of one encoded quad in bytes.
pub const QUAD_BYTES: usize = 16;

#[derive(Clone, Copy, PartialEq, Eq, Default, BinaryCodec)]
pub struct Quad {
    pub t: Any,
    pub x: Any,
    pub y: Any,
    pub z: Any,
}

impl Quad {
    pub const fn new(t: Any, x: Any, y: Any, z: Any) -> Quad {
        Quad { t, x, y, z }
    }

    pub const fn empty() -> Quad {
        Quad::new(UNDEF, UNDEF, UNDEF, UNDEF)
    }

    pub const fn literal_t() -> Quad {
        Quad::new(LITERAL_T, UNDEF, UNDEF, UNDEF)
    }

    pub const fn type_t(arity: Any) -> Quad {
        Quad::new(TYPE_T, arity, UNDEF, UNDEF)
    }

    pub const fn pair_t(car: Any, cdr: Any) -> Quad {
        Quad::new(PAIR_T, car, cdr, UNDEF)
    }

    pub const fn dict_t(key: Any, value: Any, next: Any) -> Quad {
        Quad::new(DICT_T, key, value, next)
    }

    pub const fn instr_t(op: Any, imm: Any, next: Any) -> Quad {
        Quad::new(INSTR_T, op, imm, next)
    }

    pub const fn actor_t(beh: Any, state: Any, effect: Any) -> Quad {
        Quad::new(ACTOR_T, beh, state, effect)
    }

    pub const fn new_actor(beh: Any, state: Any) -> Quad {
        Quad::actor_t(beh, state, UNDEF)
    }

    pub const fn proxy_t(device: Any, handle: Any) -> Quad {
        Quad::new(PROXY_T, device, handle, UNDEF)
    }

    pub const fn stub_t(device: Any, target: Any, next: Any) -> Quad {
        Quad::new(STUB_T, device, target, next)
    }

    pub const fn fwd_ref_t(target: Any) -> Quad {
        Quad::new(FWD_REF_T, UNDEF, UNDEF, target)
    }

    pub const fn free_t(next: Any) -> Quad {
        Quad::new(FREE_T, UNDEF, UNDEF, next)
    }

    pub const fn new_event(sponsor: Any, target: Any, msg: Any) -> Quad {
        Quad::new(sponsor, target, msg, NIL)
    }

    pub const fn new_cont(ip: Any, sp: Any, ep: Any) -> Quad {
        Quad::new(ip, sp, ep, NIL)
    }

    pub const fn sponsor_t(memory: Any, events: Any, cycles: Any, signal: Any) -> Quad {
        Quad::new(memory, events, cycles, signal)
    }

    pub const fn memory_t(top: Any, next: Any, free: Any, root: Any) -> Quad {
        Quad::new(top, next, free, root)
    }

    pub const fn ddeque_t(e_first: Any, e_last: Any, k_first: Any, k_last: Any) -> Quad {
        Quad::new(e_first, e_last, k_first, k_last)
    }

    /// Decodes the quad by its `t` field.
    pub fn role(&self) -> Role {
        match self.t {
            TYPE_T => Role::Type { arity: self.x },
            INSTR_T => Role::Instr {
                op: self.x,
                imm: self.y,
                next: self.z,
            },
            PAIR_T => Role::Pair {
                car: self.x,
                cdr: self.y,
            },
            DICT_T => Role::Dict {
                key: self.x,
                value: self.y,
                next: self.z,
            },
            ACTOR_T => Role::Actor {
                beh: self.x,
                state: self.y,
                effect: self.z,
            },
            PROXY_T => Role::Proxy {
                device: self.x,
                handle: self.y,
            },
            STUB_T => Role::Stub {
                device: self.x,
                target: self.y,
                next: self.z,
            },
            FWD_REF_T => Role::FwdRef { target: self.z },
            FREE_T => Role::Free { next: self.z },
            LITERAL_T => Role::Literal,
            t => Role::Other { t },
        }
    }
}

impl fmt::Debug for Quad {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{{t:{}, x:{}, y:{}, z:{}}}", self.t, self.x, self.y, self.z)
    }
}

/// Typed view of a quad, selected by its `t` field.
///
/// Events, continuations, sponsors and custom-typed quads do not carry a
/// distinguishing built-in type and decode as [`Role::Other`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Role {
    Literal,
    Type { arity: Any },
    Instr { op: Any, imm: Any, next: Any },
    Pair { car: Any, cdr: Any },
    Dict { key: Any, value: Any, next: Any },
    Actor { beh: Any, state: Any, effect: Any },
    Proxy { device: Any, handle: Any },
    Stub { device: Any, target: Any, next: Any },
    FwdRef { target: Any },
    Free { next: Any },
    Other { t: Any },
}

impl Role {
    /// Rebuilds the raw quad for this view.
    pub fn to_quad(self) -> Quad {
        match self {
            Role::Literal => Quad::literal_t(),
            Role::Type { arity } => Quad::type_t(arity),
            Role::Instr { op, imm, next } => Quad::instr_t(op, imm, next),
            Role::Pair { car, cdr } => Quad::pair_t(car, cdr),
            Role::Dict { key, value, next } => Quad::dict_t(key, value, next),
            Role::Actor { beh, state, effect } => Quad::actor_t(beh, state, effect),
            Role::Proxy { device, handle } => Quad::proxy_t(device, handle),
            Role::Stub {
                device,
                target,
                next,
            } => Quad::stub_t(device, target, next),
            Role::FwdRef { target } => Quad::fwd_ref_t(target),
            Role::Free { next } => Quad::free_t(next),
            Role::Other { t } => Quad::new(t, UNDEF, UNDEF, UNDEF),
        }
    }
}

/// The reserved ROM image below `ROM_BASE_OFS`.
pub(crate) const RESERVED_ROM: [Quad; ROM_BASE_OFS] = [
    Quad::literal_t(),                 // UNDEF
    Quad::literal_t(),                 // NIL
    Quad::literal_t(),                 // FALSE
    Quad::literal_t(),                 // TRUE
    Quad::literal_t(),                 // ROM_04
    Quad::pair_t(NIL, NIL),            // EMPTY_DQ
    Quad::type_t(PLUS_1),              // TYPE_T
    Quad::type_t(UNDEF),               // FIXNUM_T
    Quad::type_t(PLUS_2),              // ACTOR_T
    Quad::type_t(PLUS_2),              // PROXY_T
    Quad::type_t(PLUS_2),              // STUB_T
    Quad::type_t(PLUS_3),              // INSTR_T
    Quad::type_t(PLUS_2),              // PAIR_T
    Quad::type_t(PLUS_3),              // DICT_T
    Quad::type_t(MINUS_1),             // FWD_REF_T
    Quad::type_t(ZERO),                // FREE_T
];
