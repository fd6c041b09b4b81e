use proc_macro::TokenStream;
use quote::quote;
use syn::{parse_macro_input, Attribute, Data, DeriveInput, Fields, Lit};

/// Derives `seqjob_manager_sdk::ArgSchema` for a struct with named fields.
///
/// Flags are emitted in field declaration order. Per-field options go in
/// `#[flag(...)]`:
///
/// * `name = "--flag"` overrides the default `--field-name` spelling
/// * `value = "text"` makes a `bool` field emit `--flag text` when set
/// * `nested` delegates to the field's own `ArgSchema` impl
#[proc_macro_derive(ArgSchema, attributes(flag))]
pub fn derive_arg_schema(input: TokenStream) -> TokenStream {
    let input = parse_macro_input!(input as DeriveInput);
    let struct_name = &input.ident;

    let fields = match &input.data {
        Data::Struct(data) => match &data.fields {
            Fields::Named(fields) => &fields.named,
            _ => {
                return syn::Error::new_spanned(
                    &input.ident,
                    "ArgSchema only supports structs with named fields",
                )
                .to_compile_error()
                .into()
            }
        },
        _ => {
            return syn::Error::new_spanned(&input.ident, "ArgSchema only supports structs")
                .to_compile_error()
                .into()
        }
    };

    let mut field_entries = Vec::new();
    let mut append_calls = Vec::new();

    for f in fields {
        let ident = match f.ident.as_ref() {
            Some(ident) => ident,
            None => continue,
        };
        let name = ident.to_string();
        let ty = &f.ty;

        let meta = match extract_flag_meta(&f.attrs) {
            Ok(meta) => meta,
            Err(err) => return err.to_compile_error().into(),
        };

        let flag = meta
            .name
            .clone()
            .unwrap_or_else(|| format!("--{}", name.replace('_', "-")));

        if meta.nested {
            field_entries.push(quote! {
                fields.extend(<#ty as seqjob_manager_sdk::ArgSchema>::arg_fields());
            });
            append_calls.push(quote! {
                seqjob_manager_sdk::ArgSchema::append_args(&self.#ident, argv);
            });
        } else if let Some(value) = meta.value {
            field_entries.push(quote! {
                fields.push(seqjob_manager_sdk::ArgField {
                    name: #name.to_string(),
                    flag: Some(#flag.to_string()),
                    kind: seqjob_manager_sdk::ArgKind::FixedValue(#value.to_string()),
                });
            });
            append_calls.push(quote! {
                if self.#ident {
                    argv.push(#flag.to_string());
                    argv.push(#value.to_string());
                }
            });
        } else {
            field_entries.push(quote! {
                fields.push(seqjob_manager_sdk::ArgField {
                    name: #name.to_string(),
                    flag: Some(#flag.to_string()),
                    kind: seqjob_manager_sdk::ArgKind::Value,
                });
            });
            append_calls.push(quote! {
                seqjob_manager_sdk::ArgValue::push_flag(&self.#ident, #flag, argv);
            });
        }
    }

    let expanded = quote! {
        impl seqjob_manager_sdk::ArgSchema for #struct_name {
            fn arg_fields() -> Vec<seqjob_manager_sdk::ArgField> {
                let mut fields = Vec::new();
                #(#field_entries)*
                fields
            }

            fn append_args(&self, argv: &mut Vec<String>) {
                #(#append_calls)*
            }
        }
    };

    TokenStream::from(expanded)
}

#[derive(Default)]
struct FlagMeta {
    name: Option<String>,
    value: Option<String>,
    nested: bool,
}

fn extract_flag_meta(attrs: &[Attribute]) -> syn::Result<FlagMeta> {
    let mut meta_out = FlagMeta::default();

    for attr in attrs {
        if !attr.path().is_ident("flag") {
            continue;
        }

        attr.parse_nested_meta(|meta| {
            if meta.path.is_ident("name") {
                let value = meta.value()?;
                let lit: Lit = value.parse()?;
                if let Lit::Str(s) = lit {
                    meta_out.name = Some(s.value());
                }
            } else if meta.path.is_ident("value") {
                let value = meta.value()?;
                let lit: Lit = value.parse()?;
                if let Lit::Str(s) = lit {
                    meta_out.value = Some(s.value());
                }
            } else if meta.path.is_ident("nested") {
                meta_out.nested = true;
            } else {
                return Err(meta.error("unsupported flag option"));
            }
            Ok(())
        })?;
    }

    Ok(meta_out)
}
