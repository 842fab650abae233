//! `#[derive(Attributes)]`: builds a GATT service out of a plain struct.
//!
//! A struct annotated with `#[service(uuid = "...")]` and fields annotated with
//! `#[characteristic(uuid = "...", properties = "...", permissions = "...")]` gets an
//! `into_service` method that folds the struct's fields into a `bluetoe::gatt::ServiceListBuilder`
//! chain, in field declaration order. This is the compile-time half of the attribute-table
//! assembly the runtime `ServiceListBuilder` otherwise requires spelling out by hand.
//!
//! `properties`/`permissions` are `|`-separated flag names matching
//! `bluetoe::gatt::characteristic::Properties`/`bluetoe::att::AttributePermissions`'s constants
//! (eg. `"READ | NOTIFY"`). A characteristic with `NOTIFY` or `INDICATE` in its properties
//! automatically gets a trailing CCCD attribute.
//!
//! Field values must be fixed-size integers (anything with a `to_le_bytes` inherent method) -
//! their little-endian bytes become the characteristic's initial value.

extern crate proc_macro;

use proc_macro::TokenStream;
use proc_macro2::{Span, TokenStream as TokenStream2};
use quote::quote;
use syn::{
    parse_macro_input, Data, DeriveInput, Fields, Lit, Meta, MetaList, MetaNameValue, NestedMeta,
};

#[proc_macro_derive(Attributes, attributes(service, characteristic))]
pub fn derive_attributes(input: TokenStream) -> TokenStream {
    let input = parse_macro_input!(input as DeriveInput);
    expand(input)
        .unwrap_or_else(|err| err.to_compile_error())
        .into()
}

fn expand(input: DeriveInput) -> syn::Result<TokenStream> {
    let name = &input.ident;

    let service_uuid = find_name_value(&input.attrs, "service", "uuid")?
        .ok_or_else(|| syn::Error::new_spanned(&input, "missing #[service(uuid = \"...\")]"))?;
    let service_uuid = parse_uuid16(&service_uuid)?;

    let fields = match &input.data {
        Data::Struct(data) => match &data.fields {
            Fields::Named(fields) => &fields.named,
            _ => return Err(syn::Error::new_spanned(&input, "expected named fields")),
        },
        _ => return Err(syn::Error::new_spanned(&input, "Attributes can only be derived for structs")),
    };

    let mut chain = quote! {
        builder.primary_service(bluetoe::att::AttUuid::Uuid16(bluetoe::uuid::Uuid16(#service_uuid)))
    };

    for field in fields {
        let characteristic = match find_list(&field.attrs, "characteristic")? {
            Some(list) => list,
            None => continue,
        };

        let field_name = field
            .ident
            .as_ref()
            .ok_or_else(|| syn::Error::new_spanned(field, "characteristic fields must be named"))?;

        let uuid = name_value_in(&characteristic, "uuid")?
            .ok_or_else(|| syn::Error::new_spanned(&characteristic, "missing uuid"))?;
        let uuid = parse_uuid16(&uuid)?;

        let properties = name_value_in(&characteristic, "properties")?
            .ok_or_else(|| syn::Error::new_spanned(&characteristic, "missing properties"))?;
        let (properties_expr, notifies) = parse_flags(
            &properties,
            "bluetoe::gatt::characteristic::Properties",
            &["BROADCAST", "READ", "WRITE_NO_RSP", "WRITE", "NOTIFY", "INDICATE", "AUTH_WRITES", "EXTENDED"],
        )?;
        let notifies = notifies.contains(&"NOTIFY") || notifies.contains(&"INDICATE");

        let permissions_expr = match name_value_in(&characteristic, "permissions")? {
            Some(permissions) => {
                parse_flags(
                    &permissions,
                    "bluetoe::att::AttributePermissions",
                    &["READABLE", "WRITEABLE", "REQUIRES_ENCRYPTION", "REQUIRES_AUTHENTICATION"],
                )?
                .0
            }
            None => quote! { bluetoe::att::AttributePermissions::default() },
        };

        chain = quote! {
            #chain.characteristic(
                bluetoe::att::AttUuid::Uuid16(bluetoe::uuid::Uuid16(#uuid)),
                #properties_expr,
                &self.#field_name.to_le_bytes(),
                #permissions_expr,
            )
        };
        if notifies {
            chain = quote! { #chain.cccd() };
        }
    }

    Ok(quote! {
        impl #name {
            /// Appends this struct's service and characteristics onto `builder`, in field
            /// declaration order.
            pub fn into_service(self, builder: bluetoe::gatt::ServiceListBuilder) -> bluetoe::gatt::ServiceListBuilder {
                #chain
            }
        }
    }
    .into())
}

/// Finds the single `#[name(...)]` attribute on `attrs` and returns its argument list.
fn find_list<'a>(attrs: &'a [syn::Attribute], name: &str) -> syn::Result<Option<Vec<NestedMeta>>> {
    for attr in attrs {
        if attr.path.is_ident(name) {
            return match attr.parse_meta()? {
                Meta::List(MetaList { nested, .. }) => Ok(Some(nested.into_iter().collect())),
                other => Err(syn::Error::new_spanned(other, format!("expected #[{}(...)]", name))),
            };
        }
    }
    Ok(None)
}

/// Finds `key = "..."` among `#[attr_name(key = "...", ...)]`'s arguments, as a string literal.
fn find_name_value(attrs: &[syn::Attribute], attr_name: &str, key: &str) -> syn::Result<Option<String>> {
    match find_list(attrs, attr_name)? {
        Some(nested) => name_value_in(&nested, key),
        None => Ok(None),
    }
}

fn name_value_in(nested: &[NestedMeta], key: &str) -> syn::Result<Option<String>> {
    for item in nested {
        if let NestedMeta::Meta(Meta::NameValue(MetaNameValue { path, lit: Lit::Str(s), .. })) = item {
            if path.is_ident(key) {
                return Ok(Some(s.value()));
            }
        }
    }
    Ok(None)
}

/// Parses a `"0x1234"` or `"1234"` string literal into a `u16` token (suffixed `u16` so it infers
/// correctly regardless of the surrounding expression).
fn parse_uuid16(s: &str) -> syn::Result<TokenStream2> {
    let trimmed = s.trim_start_matches("0x").trim_start_matches("0X");
    let radix = if trimmed.len() != s.len() { 16 } else { 10 };
    let value = u16::from_str_radix(trimmed, radix)
        .map_err(|_| syn::Error::new(Span::call_site(), format!("invalid 16-bit UUID: {:?}", s)))?;
    Ok(quote! { #value })
}

/// Parses a `"A | B | C"` flag-name list against `valid`, returning the OR'd expression (referring
/// to `type_path`'s associated constants) and the set of flag names actually present.
fn parse_flags<'a>(
    s: &'a str,
    type_path: &str,
    valid: &[&'a str],
) -> syn::Result<(TokenStream2, Vec<&'a str>)> {
    let type_path: syn::Path = syn::parse_str(type_path)?;
    let mut present = Vec::new();
    let mut expr = None;
    for name in s.split('|').map(str::trim).filter(|s| !s.is_empty()) {
        let matched = valid
            .iter()
            .find(|v| **v == name)
            .ok_or_else(|| syn::Error::new(Span::call_site(), format!("unknown flag {:?}", name)))?;
        present.push(*matched);
        let ident = syn::Ident::new(matched, Span::call_site());
        let term = quote! { #type_path::#ident };
        expr = Some(match expr {
            None => term,
            Some(prev) => quote! { (#prev | #term) },
        });
    }
    let expr = expr.ok_or_else(|| syn::Error::new(Span::call_site(), "empty flag list"))?;
    Ok((expr, present))
}
