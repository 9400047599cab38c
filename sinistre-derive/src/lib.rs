//! A derive macro for the `Event` trait in the `sinistre` crate.
use proc_macro::TokenStream;
use quote::quote;
use syn::{Attribute, Data, DeriveInput, Fields, LitStr, parse_macro_input};

const DEFAULT_SOURCE: &str = "urn:sinistre:event";

/// Derives the `Event` trait for a fact payload enum.
///
/// Every variant name becomes a fact kind: `event_type` returns it and the
/// generated `KINDS` constant lists all of them, so replay can reject kinds
/// that are not part of the enum. The CloudEvents source defaults to
/// `urn:sinistre:event` and can be set with `#[event(source = "...")]` on the
/// enum.
#[proc_macro_derive(Event, attributes(event))]
pub fn event_derive(input: TokenStream) -> TokenStream {
    let input = parse_macro_input!(input as DeriveInput);
    let name = &input.ident;

    let variants = match &input.data {
        Data::Enum(data) => &data.variants,
        _ => {
            return syn::Error::new_spanned(name, "Event derive macro can only be used on enums")
                .to_compile_error()
                .into();
        }
    };

    let source = match parse_source(&input.attrs) {
        Ok(source) => source,
        Err(e) => return e.to_compile_error().into(),
    };

    let kinds: Vec<String> = variants.iter().map(|v| v.ident.to_string()).collect();

    let event_type_arms = variants.iter().map(|variant| {
        let variant_name = &variant.ident;
        let kind = variant_name.to_string();
        let fields = match &variant.fields {
            Fields::Named(_) => quote! { { .. } },
            Fields::Unnamed(_) => quote! { (..) },
            Fields::Unit => quote! {},
        };
        quote! {
            #name::#variant_name #fields => #kind
        }
    });

    let (impl_generics, ty_generics, where_clause) = input.generics.split_for_impl();

    let expanded = quote! {
        impl #impl_generics ::sinistre::Event for #name #ty_generics #where_clause {
            const KINDS: &'static [&'static str] = &[#(#kinds),*];

            fn event_type(&self) -> &'static str {
                match self {
                    #(#event_type_arms),*
                }
            }

            fn event_source(&self) -> &'static str {
                #source
            }
        }
    };

    TokenStream::from(expanded)
}

fn parse_source(attrs: &[Attribute]) -> syn::Result<String> {
    let mut source = DEFAULT_SOURCE.to_owned();
    for attr in attrs.iter().filter(|a| a.path().is_ident("event")) {
        attr.parse_nested_meta(|meta| {
            if meta.path.is_ident("source") {
                let lit: LitStr = meta.value()?.parse()?;
                source = lit.value();
                Ok(())
            } else {
                Err(meta.error("unsupported event attribute, expected `source`"))
            }
        })?;
    }
    Ok(source)
}
