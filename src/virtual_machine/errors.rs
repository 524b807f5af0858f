use crate::types::encoding::DecodeError;
use crate::virtual_machine::any::Any;
use ufork_derive::Error;

pub const E_OK: i32 = 0;
pub const E_FAIL: i32 = -1;
pub const E_BOUNDS: i32 = -2;
pub const E_NO_MEM: i32 = -3;
pub const E_NOT_FIX: i32 = -4;
pub const E_NOT_CAP: i32 = -5;
pub const E_NOT_PTR: i32 = -6;
pub const E_NOT_ROM: i32 = -7;
pub const E_NOT_RAM: i32 = -8;
pub const E_NOT_EXE: i32 = -9;
pub const E_NO_TYPE: i32 = -10;
pub const E_MEM_LIM: i32 = -11;
pub const E_CPU_LIM: i32 = -12;
pub const E_MSG_LIM: i32 = -13;
pub const E_ASSERT: i32 = -14;
pub const E_STOP: i32 = -15;
pub const E_ABORT: i32 = -16;

/// A transaction-level fault.
///
/// Each variant carries the offending value as evidence. Faults never
/// escape the transaction that raised them: the run-loop rolls the
/// transaction back and reports `(code, evidence)` to the audit callback.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum Fault {
    #[error("general failure ({0})")]
    Fail(Any),
    #[error("out of bounds ({0})")]
    Bounds(Any),
    #[error("no memory available ({0})")]
    NoMem(Any),
    #[error("fixnum required ({0})")]
    NotFix(Any),
    #[error("capability required ({0})")]
    NotCap(Any),
    #[error("memory pointer required ({0})")]
    NotPtr(Any),
    #[error("ROM pointer required ({0})")]
    NotRom(Any),
    #[error("RAM pointer required ({0})")]
    NotRam(Any),
    #[error("instruction required ({0})")]
    NotExe(Any),
    #[error("type required ({0})")]
    NoType(Any),
    #[error("sponsor memory limit reached ({0})")]
    MemLimit(Any),
    #[error("sponsor instruction limit reached ({0})")]
    CpuLimit(Any),
    #[error("sponsor event limit reached ({0})")]
    MsgLimit(Any),
    #[error("assertion failed ({0})")]
    Assert(Any),
    #[error("sponsor stopped ({0})")]
    Stop(Any),
    #[error("abort requested ({0})")]
    Abort(Any),
}

impl Fault {
    pub const fn code(&self) -> i32 {
        match self {
            Fault::Fail(_) => E_FAIL,
            Fault::Bounds(_) => E_BOUNDS,
            Fault::NoMem(_) => E_NO_MEM,
            Fault::NotFix(_) => E_NOT_FIX,
            Fault::NotCap(_) => E_NOT_CAP,
            Fault::NotPtr(_) => E_NOT_PTR,
            Fault::NotRom(_) => E_NOT_ROM,
            Fault::NotRam(_) => E_NOT_RAM,
            Fault::NotExe(_) => E_NOT_EXE,
            Fault::NoType(_) => E_NO_TYPE,
            Fault::MemLimit(_) => E_MEM_LIM,
            Fault::CpuLimit(_) => E_CPU_LIM,
            Fault::MsgLimit(_) => E_MSG_LIM,
            Fault::Assert(_) => E_ASSERT,
            Fault::Stop(_) => E_STOP,
            Fault::Abort(_) => E_ABORT,
        }
    }

    pub const fn evidence(&self) -> Any {
        match *self {
            Fault::Fail(v)
            | Fault::Bounds(v)
            | Fault::NoMem(v)
            | Fault::NotFix(v)
            | Fault::NotCap(v)
            | Fault::NotPtr(v)
            | Fault::NotRom(v)
            | Fault::NotRam(v)
            | Fault::NotExe(v)
            | Fault::NoType(v)
            | Fault::MemLimit(v)
            | Fault::CpuLimit(v)
            | Fault::MsgLimit(v)
            | Fault::Assert(v)
            | Fault::Stop(v)
            | Fault::Abort(v) => v,
        }
    }

    /// The fault code as a sponsor signal.
    pub const fn signal(&self) -> Any {
        Any::fix(self.code())
    }

    /// Quota exhaustion, as opposed to a fault in the program itself.
    pub const fn is_resource(&self) -> bool {
        matches!(self, Fault::MemLimit(_) | Fault::CpuLimit(_) | Fault::MsgLimit(_))
    }

    /// Human-readable description of a fault code.
    pub const fn message(code: i32) -> &'static str {
        match code {
            E_OK => "no error",
            E_FAIL => "general failure",
            E_BOUNDS => "out of bounds",
            E_NO_MEM => "no memory available",
            E_NOT_FIX => "fixnum required",
            E_NOT_CAP => "capability required",
            E_NOT_PTR => "memory pointer required",
            E_NOT_ROM => "ROM pointer required",
            E_NOT_RAM => "RAM pointer required",
            E_NOT_EXE => "instruction required",
            E_NO_TYPE => "type required",
            E_MEM_LIM => "sponsor memory limit reached",
            E_CPU_LIM => "sponsor instruction limit reached",
            E_MSG_LIM => "sponsor event limit reached",
            E_ASSERT => "assertion failed",
            E_STOP => "sponsor stopped",
            E_ABORT => "abort requested",
            _ => "unknown error",
        }
    }
}

/// Failure to load an IR module. Nothing is written to ROM when a load fails.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum LoadError {
    #[error("not defined: {0}")]
    UndefinedSymbol(String),
    #[error("not exported: {module}.{name}")]
    NotExported { module: String, name: String },
    #[error("not imported: {0}")]
    NotImported(String),
    #[error("cyclic refs: {0}")]
    CyclicRefs(String),
    #[error("cyclic data: {0}")]
    CyclicData(String),
    #[error("wrong arity for type in {name}: expected {expected}, got {actual}")]
    BadArity {
        name: String,
        expected: i32,
        actual: i32,
    },
    #[error("not a type: {0}")]
    NotAType(String),
    #[error("{name}: expected {expected}")]
    TypeMismatch { name: String, expected: &'static str },
    #[error("bad label {label:?} for {op}")]
    BadLabel { op: String, label: String },
    #[error("not an op: {0}")]
    NotAnOp(String),
    #[error("not a fixnum: {0}")]
    NotAFixnum(String),
    #[error("not a literal: {0}")]
    NotALiteral(String),
    #[error("not a value: {0}")]
    NotAValue(String),
    #[error("ROM is full")]
    RomFull,
    #[error("import cycle through {0}")]
    ImportCycle(String),
    #[error("cannot resolve module {src}: {reason}")]
    Unresolved { src: String, reason: String },
    #[error("malformed module: {0}")]
    Json(String),
}

/// Invalid [`CoreConfig`](crate::virtual_machine::config::CoreConfig).
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("{bank} bank of {size} quads cannot hold its {reserved} reserved quads")]
    BankTooSmall {
        bank: &'static str,
        size: usize,
        reserved: usize,
    },
    #[error("{bank} bank of {size} quads exceeds the addressable range")]
    BankTooLarge { bank: &'static str, size: usize },
    #[error("gc stride must be at least 1")]
    ZeroStride,
    #[error("{name} quota must not be negative, got {value}")]
    NegativeQuota { name: &'static str, value: i32 },
}

/// Errors surfaced by the [`Host`](crate::virtual_machine::host::Host) wrapper.
#[derive(Debug, Error)]
pub enum HostError {
    #[error("host call while another host call is in progress")]
    Reentrant,
    #[error("deferred callbacks may only be queued during a host call")]
    DeferOutsideCall,
    #[error("load failed: {0}")]
    Load(#[from] LoadError),
    #[error("fault: {0}")]
    Fault(#[from] Fault),
    #[error("bad snapshot: {0}")]
    Decode(#[from] DecodeError),
    #[error("bad configuration: {0}")]
    Config(#[from] ConfigError),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("module does not export {0}")]
    MissingExport(String),
    #[error("no device slot {0}")]
    NoDeviceSlot(usize),
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::virtual_machine::any::{NIL, UNDEF};

    #[test]
    fn codes_and_evidence() {
        let fault = Fault::Assert(NIL);
        assert_eq!(fault.code(), E_ASSERT);
        assert_eq!(fault.evidence(), NIL);
        assert_eq!(fault.signal(), Any::fix(E_ASSERT));
    }

    #[test]
    fn messages_cover_every_code() {
        for code in E_ABORT..=E_OK {
            assert_ne!(Fault::message(code), "unknown error", "code {code}");
        }
        assert_eq!(Fault::message(-99), "unknown error");
    }

    #[test]
    fn display_includes_evidence() {
        assert_eq!(Fault::NotFix(UNDEF).to_string(), "fixnum required (#?)");
        assert_eq!(
            LoadError::NotExported {
                module: "lib".into(),
                name: "x".into()
            }
            .to_string(),
            "not exported: lib.x"
        );
    }

    #[test]
    fn host_error_wraps_with_question_mark() {
        fn load() -> Result<(), HostError> {
            Err(LoadError::RomFull)?
        }
        assert!(matches!(load(), Err(HostError::Load(LoadError::RomFull))));
    }

    #[test]
    fn resource_faults() {
        assert!(Fault::CpuLimit(UNDEF).is_resource());
        assert!(!Fault::Assert(UNDEF).is_resource());
    }
}
