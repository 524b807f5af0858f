//! uFork library.
//!
//! Provides the quad virtual machine, its IR loader and host wrapper, and
//! the encoding and logging utilities they share.

pub mod types;
pub mod utils;
pub mod virtual_machine;
