use proc_macro::TokenStream;
use quote::quote;
use syn::{DeriveInput, parse_macro_input};

extern crate proc_macro;

/// Derives everything a sample type needs and implements `stampede::Metric` for it.
///
/// Works on structs and enums, generic or not.
#[proc_macro_attribute]
pub fn metric(_attr: TokenStream, item: TokenStream) -> TokenStream {
    let ast = parse_macro_input!(item as DeriveInput);
    let ident = &ast.ident;
    let (impl_generics, ty_generics, where_clause) = ast.generics.split_for_impl();
    let expanded = quote! {
        #[derive(
            ::serde::Serialize,
            ::serde::Deserialize,
            ::std::cmp::PartialOrd,
            ::std::cmp::PartialEq,
            ::std::fmt::Debug,
            ::std::clone::Clone
        )]
        #ast

        impl #impl_generics ::stampede::Metric for #ident #ty_generics #where_clause {}
    };

    TokenStream::from(expanded)
}

/// Derives the bounds required by `stampede::Aggregate`.
///
/// The `Aggregate` impl itself stays hand-written since `consume` and `merge`
/// are the interesting part.
#[proc_macro_attribute]
pub fn aggregate(_attr: TokenStream, item: TokenStream) -> TokenStream {
    let ast = parse_macro_input!(item as DeriveInput);
    let expanded = quote! {
        #[derive(
            ::serde::Serialize,
            ::serde::Deserialize,
            ::std::cmp::PartialOrd,
            ::std::cmp::PartialEq,
            ::std::fmt::Debug,
            ::std::clone::Clone
        )]
        #ast
    };

    TokenStream::from(expanded)
}
