use proc_macro::TokenStream;
use quote::quote;
use syn::*;

macro_rules! error {
    ($tokens:expr, $($tt:tt)*) => {
        return Err(syn::Error::new_spanned($tokens, format!($($tt)*)))
    };
}

pub fn from_row(input: DeriveInput) -> Result<TokenStream> {
    let DeriveInput { attrs: _, vis: _, ident, generics, data } = input;
    let Data::Struct(data) = data else {
        error!(&ident, "only struct are currently supported")
    };

    let output = match data.fields {
        Fields::Named(FieldsNamed { named, .. }) => {
            let mut fields = vec![];
            for field in named {
                let column = column_name(&field)?;
                let Some(id) = field.ident else {
                    error!(&field.ty, "named field without ident")
                };
                let column = column.unwrap_or_else(|| id.to_string());
                fields.push(quote! { #id: row.try_get(#column)?, });
            }
            quote! { Self { #(#fields)* } }
        }
        Fields::Unnamed(FieldsUnnamed { unnamed, .. }) => {
            for field in &unnamed {
                if let Some(attr) = field.attrs.iter().find(|a| a.path().is_ident("postwire")) {
                    error!(attr, "`rename` is only supported on named field")
                }
            }
            let fields = (0..unnamed.len()).map(|i| quote! { row.try_get(#i)?, });
            quote! { Self ( #(#fields)* ) }
        }
        Fields::Unit => quote! { Self },
    };

    let (g1, g2, g3) = generics.split_for_impl();

    Ok(quote! {
        impl #g1 ::postwire::FromRow for #ident #g2 #g3 {
            fn from_row(row: ::postwire::Row) -> ::std::result::Result<Self, ::postwire::codec::DecodeError> {
                let _ = &row;
                Ok(#output)
            }
        }
    }.into())
}

/// Read `#[postwire(rename = "..")]`.
fn column_name(field: &Field) -> Result<Option<String>> {
    let mut rename = None;
    for attr in field.attrs.iter().filter(|a| a.path().is_ident("postwire")) {
        attr.parse_nested_meta(|meta| {
            if meta.path.is_ident("rename") {
                let value: LitStr = meta.value()?.parse()?;
                rename = Some(value.value());
                Ok(())
            } else {
                Err(meta.error("unsupported attribute, expected `rename`"))
            }
        })?;
    }
    Ok(rename)
}
