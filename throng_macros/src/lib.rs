use proc_macro::TokenStream;
use quote::quote;
use syn::{DeriveInput, parse_macro_input};

extern crate proc_macro;

/// Turns a struct or enum into an outbound engine event.
///
/// Adds the serde, comparison, debug and clone derives every event needs and
/// implements the `Event` marker trait, which must be in scope at the call site.
#[proc_macro_attribute]
pub fn event(_attr: TokenStream, item: TokenStream) -> TokenStream {
    let ast = parse_macro_input!(item as DeriveInput);
    let ident = &ast.ident;
    let (impl_generics, ty_generics, where_clause) = ast.generics.split_for_impl();
    let expanded = quote! {
        #[derive(
            serde::Serialize,
            serde::Deserialize,
            std::cmp::PartialEq,
            std::fmt::Debug,
            std::clone::Clone
        )]
        #ast

        impl #impl_generics Event for #ident #ty_generics #where_clause {}
    };

    TokenStream::from(expanded)
}

/// Derive bundle for mergeable accumulators that never leave the engine as events.
#[proc_macro_attribute]
pub fn aggregate(_attr: TokenStream, item: TokenStream) -> TokenStream {
    let ast = parse_macro_input!(item as DeriveInput);
    let expanded = quote! {
        #[derive(
            serde::Serialize,
            serde::Deserialize,
            std::cmp::PartialEq,
            std::fmt::Debug,
            std::clone::Clone,
            std::default::Default
        )]
        #ast
    };

    TokenStream::from(expanded)
}
