//! Procedural macros for brainstem
//!
//! This crate provides macros to reduce boilerplate when handing plain Rust
//! structs to the presenter layer:
//!
//! - `#[derive(Attributes)]` - expose a struct's fields as a presentable attribute map

use proc_macro::TokenStream;
use quote::quote;
use syn::{Data, DeriveInput, Fields, LitStr, parse_macro_input};

/// Generate an `Attributes` implementation that copies every named field into
/// the attribute map consumed by `Record::from_model`.
///
/// # Usage
///
/// ```ignore
/// #[derive(Attributes)]
/// struct Workspace {
///     id: i64,
///     title: String,
///     #[attribute(rename = "description")]
///     body: Option<String>,
///     #[attribute(skip)]
///     cached_html: String,
/// }
/// ```
///
/// # Generated Code
///
/// ```ignore
/// impl ::brainstem::Attributes for Workspace {
///     fn attributes(&self) -> BTreeMap<String, ::brainstem::Value> {
///         let mut attributes = BTreeMap::new();
///         attributes.insert("id".to_string(), ::brainstem::Value::from(self.id.clone()));
///         attributes.insert("title".to_string(), ::brainstem::Value::from(self.title.clone()));
///         attributes.insert("description".to_string(), ::brainstem::Value::from(self.body.clone()));
///         attributes
///     }
/// }
/// ```
#[proc_macro_derive(Attributes, attributes(attribute))]
pub fn derive_attributes(input: TokenStream) -> TokenStream {
    let parsed = parse_macro_input!(input as DeriveInput);

    match expand_attributes(&parsed) {
        Ok(output) => output.into(),
        Err(err) => err.to_compile_error().into(),
    }
}

fn expand_attributes(input: &DeriveInput) -> syn::Result<proc_macro2::TokenStream> {
    let struct_name = &input.ident;
    let (impl_generics, ty_generics, where_clause) = input.generics.split_for_impl();

    let fields = match &input.data {
        Data::Struct(data) => match &data.fields {
            Fields::Named(named) => &named.named,
            _ => {
                return Err(syn::Error::new_spanned(
                    struct_name,
                    "Attributes can only be derived for structs with named fields",
                ));
            }
        },
        _ => {
            return Err(syn::Error::new_spanned(
                struct_name,
                "Attributes can only be derived for structs",
            ));
        }
    };

    let mut inserts = Vec::new();
    for field in fields {
        let Some(ident) = field.ident.as_ref() else {
            continue;
        };

        let options = AttributeOptions::from_attrs(&field.attrs)?;
        if options.skip {
            continue;
        }

        let key = options.rename.unwrap_or_else(|| {
            let raw = ident.to_string();
            raw.strip_prefix("r#").map(str::to_string).unwrap_or(raw)
        });

        inserts.push(quote! {
            attributes.insert(
                ::std::string::String::from(#key),
                ::brainstem::Value::from(::std::clone::Clone::clone(&self.#ident)),
            );
        });
    }

    Ok(quote! {
        impl #impl_generics ::brainstem::Attributes for #struct_name #ty_generics #where_clause {
            fn attributes(
                &self,
            ) -> ::std::collections::BTreeMap<::std::string::String, ::brainstem::Value> {
                let mut attributes = ::std::collections::BTreeMap::new();
                #(#inserts)*
                attributes
            }
        }
    })
}

/// Options accepted by `#[attribute(...)]` on a field
#[derive(Default)]
struct AttributeOptions {
    skip: bool,
    rename: Option<String>,
}

impl AttributeOptions {
    fn from_attrs(attrs: &[syn::Attribute]) -> syn::Result<Self> {
        let mut options = AttributeOptions::default();

        for attr in attrs {
            if !attr.path().is_ident("attribute") {
                continue;
            }

            attr.parse_nested_meta(|meta| {
                if meta.path.is_ident("skip") {
                    options.skip = true;
                    Ok(())
                } else if meta.path.is_ident("rename") {
                    let value: LitStr = meta.value()?.parse()?;
                    options.rename = Some(value.value());
                    Ok(())
                } else {
                    Err(meta.error("expected `skip` or `rename = \"...\"`"))
                }
            })?;
        }

        Ok(options)
    }
}
