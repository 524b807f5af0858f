//! Derive macros for the ufork crate.
//!
//! Provides:
//! - `#[derive(BinaryCodec)]` - fixed-layout little-endian encoding for heap images
//! - `#[derive(Error)]` - `Display`, `Error` and optional `From` impls for error enums

mod binary_codec;
mod error;

use proc_macro::TokenStream;

/// Implements `Encode` and `Decode` by encoding each field in declaration order.
#[proc_macro_derive(BinaryCodec)]
pub fn derive_binary_codec(input: TokenStream) -> TokenStream {
    binary_codec::derive_binary_codec(input)
}

/// Implements `Display` and `Error` from `#[error("...")]` attributes.
///
/// A single-field tuple variant marked `#[from]` also gets a `From` impl.
#[proc_macro_derive(Error, attributes(error, from))]
pub fn derive_error(input: TokenStream) -> TokenStream {
    error::derive_error(input)
}
