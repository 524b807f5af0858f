//! Derive macro for fixed-layout binary encoding.
//!
//! Heap images are plain records of machine words, so only structs are
//! supported. Fields are written in declaration order through
//! `crate::types::encoding::Encode` and read back through
//! `crate::types::encoding::Decode`, which makes the layout of a quad or a
//! snapshot exactly the concatenation of its fields.
//!
//! ```ignore
//! use ufork_derive::BinaryCodec;
//!
//! #[derive(BinaryCodec)]
//! pub struct Quad {
//!     pub t: Any,
//!     pub x: Any,
//!     pub y: Any,
//!     pub z: Any,
//! }
//! ```

use proc_macro::TokenStream;
use quote::quote;
use syn::{Data, DeriveInput, Fields, parse_macro_input};

pub fn derive_binary_codec(input: TokenStream) -> TokenStream {
    let input = parse_macro_input!(input as DeriveInput);

    match expand(&input) {
        Ok(tokens) => TokenStream::from(tokens),
        Err(err) => err.to_compile_error().into(),
    }
}

fn expand(input: &DeriveInput) -> syn::Result<proc_macro2::TokenStream> {
    let name = &input.ident;
    let (impl_generics, ty_generics, where_clause) = input.generics.split_for_impl();

    let data = match &input.data {
        Data::Struct(data) => data,
        _ => {
            return Err(syn::Error::new_spanned(
                input,
                "BinaryCodec only supports structs; heap records have a fixed field layout",
            ));
        }
    };

    let (encode_body, decode_body) = match &data.fields {
        Fields::Named(fields) => {
            let names: Vec<_> = fields.named.iter().map(|f| &f.ident).collect();
            (
                quote! {
                    #( crate::types::encoding::Encode::encode(&self.#names, out); )*
                },
                quote! {
                    Ok(Self {
                        #( #names: crate::types::encoding::Decode::decode(input)?, )*
                    })
                },
            )
        }
        Fields::Unnamed(fields) => {
            let indices: Vec<_> = (0..fields.unnamed.len()).map(syn::Index::from).collect();
            let reads = indices.iter().map(|_| {
                quote! { crate::types::encoding::Decode::decode(input)?, }
            });
            (
                quote! {
                    #( crate::types::encoding::Encode::encode(&self.#indices, out); )*
                },
                quote! {
                    Ok(Self( #(#reads)* ))
                },
            )
        }
        Fields::Unit => (quote! {}, quote! { Ok(Self) }),
    };

    Ok(quote! {
        impl #impl_generics crate::types::encoding::Encode for #name #ty_generics #where_clause {
            #[allow(unused_variables)]
            fn encode<S: crate::types::encoding::EncodeSink>(&self, out: &mut S) {
                #encode_body
            }
        }

        impl #impl_generics crate::types::encoding::Decode for #name #ty_generics #where_clause {
            #[allow(unused_variables)]
            fn decode(
                input: &mut &[u8],
            ) -> ::std::result::Result<Self, crate::types::encoding::DecodeError> {
                #decode_body
            }
        }
    })
}
