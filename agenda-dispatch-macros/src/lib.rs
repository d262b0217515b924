//! Procedural macros for agenda-dispatch

use darling::{FromDeriveInput, FromVariant};
use proc_macro::TokenStream;
use quote::quote;
use syn::{parse_macro_input, DeriveInput};

/// Container-level attributes for #[derive(Action)]
#[derive(Debug, FromDeriveInput)]
#[darling(attributes(action), supports(enum_any))]
struct ActionOpts {
    ident: syn::Ident,
    generics: syn::Generics,
    data: darling::ast::Data<ActionVariant, ()>,
}

/// Variant-level attributes
#[derive(Debug, FromVariant)]
#[darling(attributes(action))]
struct ActionVariant {
    ident: syn::Ident,
    fields: darling::ast::Fields<()>,

    /// Name reported by `Action::name()` instead of the variant name
    #[darling(default)]
    rename: Option<String>,

    /// Mark the variant as carrying no intent (`Action::is_noop()`)
    #[darling(default)]
    noop: bool,
}

/// Derive macro for the Action trait
///
/// Generates:
/// - `name()` returning the variant name (or `#[action(rename = "...")]`)
/// - `is_noop()` returning `true` for variants marked `#[action(noop)]`
/// - `From<YourAction> for Input<YourAction>`, so actions can be passed to
///   `Engine::next` directly
///
/// # Example
/// ```ignore
/// #[derive(Action, Clone, Debug)]
/// enum Counter {
///     Inc,
///     Add(u32),
///     #[action(rename = "reset")]
///     Reset { to: u32 },
///     #[action(noop)]
///     Idle,
/// }
///
/// assert_eq!(Counter::Add(2).name(), "Add");
/// assert_eq!(Counter::Reset { to: 0 }.name(), "reset");
/// assert!(Counter::Idle.is_noop());
/// engine.next(Counter::Inc)?;
/// ```
#[proc_macro_derive(Action, attributes(action))]
pub fn derive_action(input: TokenStream) -> TokenStream {
    let input = parse_macro_input!(input as DeriveInput);

    let opts = match ActionOpts::from_derive_input(&input) {
        Ok(opts) => opts,
        Err(e) => return e.write_errors().into(),
    };

    let name = &opts.ident;

    let variants = match &opts.data {
        darling::ast::Data::Enum(variants) => variants,
        _ => {
            return syn::Error::new_spanned(&input, "Action can only be derived for enums")
                .to_compile_error()
                .into();
        }
    };

    let name_arms = variants.iter().map(|v| {
        let variant_name = &v.ident;
        let variant_str = v
            .rename
            .clone()
            .unwrap_or_else(|| variant_name.to_string());

        match &v.fields.style {
            darling::ast::Style::Unit => quote! {
                #name::#variant_name => #variant_str
            },
            darling::ast::Style::Tuple => quote! {
                #name::#variant_name(..) => #variant_str
            },
            darling::ast::Style::Struct => quote! {
                #name::#variant_name { .. } => #variant_str
            },
        }
    });

    let noop_patterns: Vec<_> = variants
        .iter()
        .filter(|v| v.noop)
        .map(|v| {
            let variant_name = &v.ident;
            quote! { #name::#variant_name { .. } }
        })
        .collect();

    let is_noop = if noop_patterns.is_empty() {
        quote! {}
    } else {
        quote! {
            fn is_noop(&self) -> bool {
                matches!(self, #(#noop_patterns)|*)
            }
        }
    };

    let (impl_generics, ty_generics, where_clause) = opts.generics.split_for_impl();

    let expanded = quote! {
        impl #impl_generics agenda_dispatch::Action for #name #ty_generics #where_clause {
            fn name(&self) -> &'static str {
                match self {
                    #(#name_arms),*
                }
            }

            #is_noop
        }

        impl #impl_generics ::core::convert::From<#name #ty_generics>
            for agenda_dispatch::Input<#name #ty_generics> #where_clause
        {
            fn from(action: #name #ty_generics) -> Self {
                agenda_dispatch::Input::Action(action)
            }
        }
    };

    TokenStream::from(expanded)
}
