//! uFork: an actor-model virtual machine over a heap of tagged quads.
//!
//! Memory is two banks of fixed-size quads (`t`, `x`, `y`, `z`), each field a
//! 32-bit tagged word ([`any::Any`]). Code is data: an instruction is an
//! `INSTR_T` quad whose `z` field links to its continuation.
//!
//! # Execution model
//!
//! - **Actors** handle one event at a time inside a transaction. Sends,
//!   creates and `become` are buffered and applied only on `end commit`.
//! - **Run-loop**: each iteration executes one instruction of the head
//!   continuation, dispatches one event, then does a bounded unit of GC.
//! - **Sponsors** meter memory, events and instruction cycles. Exhausting a
//!   quota aborts the transaction and signals the sponsor's controller.
//! - **Devices** are native actors living in reserved RAM slots; the host
//!   device bridges events out to the embedder through stubs and proxies.
//!
//! # Modules
//!
//! - [`any`]: tagged words and reserved constants
//! - [`quad`]: the quad record and its role constructors
//! - [`isa`]: opcodes and sub-op label tables
//! - [`errors`]: fault, load, config and host error types
//! - [`config`]: core sizing and root quotas
//! - [`vm`]: the core (memory, GC, interpreter, scheduler, sponsors)
//! - [`device`]: the device trait, debug device and host bridge
//! - [`ir`]: the JSON IR module model
//! - [`loader`]: IR linking into ROM, module graph imports
//! - [`snapshot`]: heap images and digests
//! - [`host`]: the embedding wrapper with reentrancy guard

pub mod any;
pub mod config;
pub mod device;
pub mod errors;
pub mod host;
pub mod ir;
pub mod isa;
#[cfg(test)]
mod isa_static_check;
pub mod loader;
pub mod quad;
pub mod snapshot;
pub mod vm;
