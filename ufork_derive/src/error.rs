//! Derive macro for error enums.
//!
//! Generates `std::fmt::Display` and `std::error::Error`. A one-field tuple
//! variant tagged `#[from]` additionally gets `From<Field> for Enum`, so
//! wrapper errors can be built with `?`.
//!
//! ```ignore
//! use ufork_derive::Error;
//!
//! #[derive(Debug, Error)]
//! pub enum HostError {
//!     #[error("load failed: {0}")]
//!     Load(#[from] LoadError),
//!
//!     #[error("core is already inside a call")]
//!     Reentrant,
//!
//!     #[error("bad quota {name}: {value}")]
//!     BadQuota { name: &'static str, value: i32 },
//! }
//! ```

use proc_macro::TokenStream;
use quote::{ToTokens, format_ident, quote};
use syn::{Attribute, Data, DeriveInput, Fields, Lit, Meta, parse_macro_input};

pub fn derive_error(input: TokenStream) -> TokenStream {
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
        Data::Enum(data) => data,
        Data::Struct(_) => {
            let message = message_of(&input.attrs, &input.ident, "struct")?;
            return Ok(quote! {
                impl #impl_generics ::std::fmt::Display for #name #ty_generics #where_clause {
                    fn fmt(&self, f: &mut ::std::fmt::Formatter<'_>) -> ::std::fmt::Result {
                        f.write_str(#message)
                    }
                }

                impl #impl_generics ::std::error::Error for #name #ty_generics #where_clause {}
            });
        }
        Data::Union(_) => {
            return Err(syn::Error::new_spanned(input, "Error derive does not support unions"));
        }
    };

    let mut arms = Vec::with_capacity(data.variants.len());
    let mut conversions = Vec::new();

    for variant in &data.variants {
        let ident = &variant.ident;
        let message = message_of(&variant.attrs, ident, "variant")?;

        let arm = match &variant.fields {
            Fields::Unit => quote! {
                Self::#ident => f.write_str(#message),
            },
            Fields::Unnamed(fields) => {
                let bindings: Vec<_> = (0..fields.unnamed.len())
                    .map(|i| format_ident!("f{}", i))
                    .collect();
                let format = positional_to_named(&message, bindings.len());

                let from_fields: Vec<_> = fields
                    .unnamed
                    .iter()
                    .filter(|field| field.attrs.iter().any(|a| a.path().is_ident("from")))
                    .collect();
                if !from_fields.is_empty() {
                    if fields.unnamed.len() != 1 {
                        return Err(syn::Error::new_spanned(
                            variant,
                            "#[from] is only allowed on a variant with exactly one field",
                        ));
                    }
                    let source = &from_fields[0].ty;
                    conversions.push(quote! {
                        impl #impl_generics ::std::convert::From<#source> for #name #ty_generics #where_clause {
                            fn from(source: #source) -> Self {
                                Self::#ident(source)
                            }
                        }
                    });
                }

                let used: Vec<_> = bindings
                    .iter()
                    .filter(|b| mentions(&format, &b.to_string()))
                    .collect();
                quote! {
                    #[allow(unused_variables)]
                    Self::#ident(#(#bindings),*) => write!(f, #format, #(#used = #used),*),
                }
            }
            Fields::Named(fields) => {
                let names: Vec<_> = fields.named.iter().filter_map(|f| f.ident.as_ref()).collect();
                let used: Vec<_> = names
                    .iter()
                    .filter(|n| mentions(&message, &n.to_string()))
                    .collect();
                quote! {
                    #[allow(unused_variables)]
                    Self::#ident { #(#names),* } => write!(f, #message, #(#used = #used),*),
                }
            }
        };
        arms.push(arm);
    }

    Ok(quote! {
        impl #impl_generics ::std::fmt::Display for #name #ty_generics #where_clause {
            fn fmt(&self, f: &mut ::std::fmt::Formatter<'_>) -> ::std::fmt::Result {
                match self {
                    #(#arms)*
                }
            }
        }

        impl #impl_generics ::std::error::Error for #name #ty_generics #where_clause {}

        #(#conversions)*
    })
}

/// Reads the string literal out of an `#[error("...")]` attribute.
fn message_of<T: ToTokens>(attrs: &[Attribute], target: &T, what: &str) -> syn::Result<String> {
    let attr = attrs
        .iter()
        .find(|attr| attr.path().is_ident("error"))
        .ok_or_else(|| {
            syn::Error::new_spanned(
                target,
                format!("every error {what} needs an #[error(\"...\")] message"),
            )
        })?;

    let Meta::List(list) = &attr.meta else {
        return Err(syn::Error::new_spanned(
            &attr.meta,
            "expected #[error(\"message\")]",
        ));
    };

    match syn::parse2::<Lit>(list.tokens.clone()) {
        Ok(Lit::Str(lit)) => Ok(lit.value()),
        _ => Err(syn::Error::new_spanned(
            &attr.meta,
            "#[error] takes a single string literal, e.g. #[error(\"not a fixnum: {0}\")]",
        )),
    }
}

/// Whether `format` interpolates the argument `name`.
fn mentions(format: &str, name: &str) -> bool {
    format.contains(&format!("{{{name}}}")) || format.contains(&format!("{{{name}:"))
}

/// Rewrites `{0}`, `{1:?}` into `{f0}`, `{f1:?}` so tuple fields can be bound by name.
fn positional_to_named(format: &str, count: usize) -> String {
    let mut out = format.to_string();
    for i in (0..count).rev() {
        out = out
            .replace(&format!("{{{i}}}"), &format!("{{f{i}}}"))
            .replace(&format!("{{{i}:"), &format!("{{f{i}:"));
    }
    out
}
