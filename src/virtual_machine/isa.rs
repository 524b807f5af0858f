//! Instruction Set Architecture (ISA) definitions.
//!
//! The [`for_each_op!`](crate::for_each_op) macro holds the canonical opcode
//! table and invokes a callback macro for code generation, so the loader,
//! the interpreter and the ISA fingerprint test all read the same list.
//!
//! This module generates:
//! - The [`Op`] enum with opcode mappings and immediate kinds
//! - `TryFrom<Any>` for decoding the opcode fixnum of an `INSTR_T` quad
//! - One label enum per sub-op family (`alu add`, `actor send`, ...)
//!
//! # Instruction Format
//!
//! An instruction is the quad `INSTR_T(op, imm, k)`: `op` is the opcode
//! fixnum, `imm` the immediate (interpreted per [`ImmKind`]) and `k` the
//! next instruction. `if` keeps its false branch in `k` and its true branch
//! in `imm`; `end` has no `k`.

use crate::virtual_machine::any::Any;
use crate::virtual_machine::errors::Fault;

/// How an instruction's `imm` field is interpreted.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum ImmKind {
    /// Ignored.
    None,
    /// Any value; forward references are resolved.
    Value,
    /// A type quad.
    Type,
    /// A small fixnum count.
    Fix,
    /// A sub-op label fixnum.
    Label,
    /// The true branch of `if`.
    Branch,
}

impl ImmKind {
    pub const fn name(self) -> &'static str {
        match self {
            ImmKind::None => "none",
            ImmKind::Value => "value",
            ImmKind::Type => "type",
            ImmKind::Fix => "fix",
            ImmKind::Label => "label",
            ImmKind::Branch => "branch",
        }
    }
}

/// Invokes a callback macro with the complete opcode list.
#[macro_export]
macro_rules! for_each_op {
    ($callback:ident) => {
        $callback! {
            // =========================
            // Control
            // =========================
            /// debug ; no-op hook
            Debug = 0x00, "debug" => None,
            /// jump ; k = pop()
            Jump = 0x01, "jump" => None,
            /// push v ; push v
            Push = 0x02, "push" => Value,
            /// if t f ; b = pop(); falsy(b) ? f : t
            If = 0x03, "if" => Branch,
            /// typeq T ; push type(pop()) == T
            Typeq = 0x05, "typeq" => Type,
            /// eq v ; push pop() == v
            Eq = 0x06, "eq" => Value,
            /// assert v ; pop() != v => E_ASSERT
            Assert = 0x07, "assert" => Value,
            // =========================
            // Actors and sponsors
            // =========================
            /// sponsor new|memory|events|cycles|reclaim|start|stop
            Sponsor = 0x08, "sponsor" => Label,
            /// actor send|post|create|become|self
            Actor = 0x09, "actor" => Label,
            // =========================
            // Data structures
            // =========================
            /// dict has|get|add|set|del
            Dict = 0x0A, "dict" => Label,
            /// deque new|empty|push|pop|put|pull|len
            Deque = 0x0B, "deque" => Label,
            // =========================
            // Arithmetic
            // =========================
            /// alu not|and|or|xor|add|sub|mul|lsl|lsr|asr|rol|ror
            Alu = 0x0D, "alu" => Label,
            /// cmp eq|ge|gt|lt|le|ne
            Cmp = 0x0E, "cmp" => Label,
            /// end abort|stop|commit ; ends the transaction
            End = 0x0F, "end" => Label,
            // =========================
            // Quads and lists
            // =========================
            /// quad n ; compose (n > 0) or decompose (n < 0) a quad
            Quad = 0x10, "quad" => Fix,
            /// pair n ; cons n items onto the next one
            Pair = 0x11, "pair" => Fix,
            /// part n ; split a list into n items and a tail
            Part = 0x12, "part" => Fix,
            /// nth n ; push extract_nth(pop(), n)
            Nth = 0x13, "nth" => Fix,
            // =========================
            // Stack
            // =========================
            /// pick n ; copy the nth item to the top
            Pick = 0x14, "pick" => Fix,
            /// roll n ; rotate the nth item to the top
            Roll = 0x15, "roll" => Fix,
            /// dup n ; duplicate the top n items
            Dup = 0x16, "dup" => Fix,
            /// drop n ; discard the top n items
            Drop = 0x17, "drop" => Fix,
            /// msg n ; push extract_nth(message, n)
            Msg = 0x18, "msg" => Fix,
            /// state n ; push extract_nth(state, n)
            State = 0x19, "state" => Fix,
        }
    };
}

#[macro_export]
macro_rules! define_ops {
    (
        $(
            $(#[$doc:meta])*
            $name:ident = $opcode:expr, $mnemonic:literal => $kind:ident
        ),* $(,)?
    ) => {
        #[derive(Copy, Clone, Debug, Eq, PartialEq)]
        pub enum Op {
            $(
                $(#[$doc])*
                $name = $opcode,
            )*
        }

        impl Op {
            /// Every opcode in table order.
            pub const ALL: &'static [Op] = &[ $( Op::$name, )* ];

            pub const fn from_code(code: i32) -> Option<Op> {
                match code {
                    $( $opcode => Some(Op::$name), )*
                    _ => None,
                }
            }

            pub const fn code(self) -> i32 {
                self as i32
            }

            /// The opcode as it is stored in `INSTR_T.x`.
            pub const fn to_any(self) -> Any {
                Any::fix(self as i32)
            }

            /// Returns the IR mnemonic for this op.
            pub const fn mnemonic(&self) -> &'static str {
                match self {
                    $( Op::$name => $mnemonic, )*
                }
            }

            pub fn from_mnemonic(name: &str) -> Option<Op> {
                match name {
                    $( $mnemonic => Some(Op::$name), )*
                    _ => None,
                }
            }

            pub const fn imm_kind(&self) -> ImmKind {
                match self {
                    $( Op::$name => ImmKind::$kind, )*
                }
            }
        }

        impl TryFrom<Any> for Op {
            type Error = Fault;

            fn try_from(value: Any) -> Result<Self, Self::Error> {
                value
                    .fix_num()
                    .and_then(Op::from_code)
                    .ok_or(Fault::Bounds(value))
            }
        }
    };
}

for_each_op!(define_ops);

/// Declares a sub-op label family: `code <-> label` tables for one op.
macro_rules! define_labels {
    (
        $(#[$meta:meta])*
        $ty:ident { $( $name:ident = $code:literal, $label:literal ),* $(,)? }
    ) => {
        $(#[$meta])*
        #[repr(i32)]
        #[derive(Copy, Clone, Debug, Eq, PartialEq)]
        pub enum $ty {
            $( $name = $code, )*
        }

        impl $ty {
            pub const ALL: &'static [$ty] = &[ $( $ty::$name, )* ];

            pub const fn from_code(code: i32) -> Option<$ty> {
                match code {
                    $( $code => Some($ty::$name), )*
                    _ => None,
                }
            }

            pub const fn label(self) -> &'static str {
                match self {
                    $( $ty::$name => $label, )*
                }
            }

            pub fn from_label(label: &str) -> Option<$ty> {
                match label {
                    $( $label => Some($ty::$name), )*
                    _ => None,
                }
            }

            pub const fn to_any(self) -> Any {
                Any::fix(self as i32)
            }
        }

        impl TryFrom<Any> for $ty {
            type Error = Fault;

            fn try_from(value: Any) -> Result<Self, Self::Error> {
                value
                    .fix_num()
                    .and_then($ty::from_code)
                    .ok_or(Fault::Bounds(value))
            }
        }
    };
}

define_labels! {
    SponsorOp {
        New = 0, "new",
        Memory = 1, "memory",
        Events = 2, "events",
        Cycles = 3, "cycles",
        Reclaim = 4, "reclaim",
        Start = 5, "start",
        Stop = 6, "stop",
    }
}

define_labels! {
    ActorOp {
        Send = 0, "send",
        Post = 1, "post",
        Create = 2, "create",
        Become = 3, "become",
        SelfCap = 4, "self",
    }
}

define_labels! {
    DictOp {
        Has = 0, "has",
        Get = 1, "get",
        Add = 2, "add",
        Set = 3, "set",
        Del = 4, "del",
    }
}

define_labels! {
    DequeOp {
        New = 0, "new",
        Empty = 1, "empty",
        Push = 2, "push",
        Pop = 3, "pop",
        Put = 4, "put",
        Pull = 5, "pull",
        Len = 6, "len",
    }
}

define_labels! {
    /// `div` is reserved: it decodes but faults when executed.
    AluOp {
        Not = 0, "not",
        And = 1, "and",
        Or = 2, "or",
        Xor = 3, "xor",
        Add = 4, "add",
        Sub = 5, "sub",
        Mul = 6, "mul",
        Div = 7, "div",
        Lsl = 8, "lsl",
        Lsr = 9, "lsr",
        Asr = 10, "asr",
        Rol = 11, "rol",
        Ror = 12, "ror",
    }
}

define_labels! {
    CmpOp {
        Eq = 0, "eq",
        Ge = 1, "ge",
        Gt = 2, "gt",
        Lt = 3, "lt",
        Le = 4, "le",
        Ne = 5, "ne",
    }
}

define_labels! {
    EndOp {
        Abort = -1, "abort",
        Stop = 0, "stop",
        Commit = 1, "commit",
    }
}

impl Op {
    /// Maps a sub-op label of this op to its fixnum, or `None` when the op
    /// takes no label or the label is unknown.
    pub fn label_code(self, label: &str) -> Option<Any> {
        match self {
            Op::Sponsor => SponsorOp::from_label(label).map(SponsorOp::to_any),
            Op::Actor => ActorOp::from_label(label).map(ActorOp::to_any),
            Op::Dict => DictOp::from_label(label).map(DictOp::to_any),
            Op::Deque => DequeOp::from_label(label).map(DequeOp::to_any),
            Op::Alu => AluOp::from_label(label).map(AluOp::to_any),
            Op::Cmp => CmpOp::from_label(label).map(CmpOp::to_any),
            Op::End => EndOp::from_label(label).map(EndOp::to_any),
            _ => None,
        }
    }

    /// `end` is the only op without a continuation.
    pub const fn has_next(self) -> bool {
        !matches!(self, Op::End)
    }
}
