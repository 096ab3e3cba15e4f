use proc_macro::TokenStream;
use syn::DeriveInput;

mod from_row;

/// Derive `FromRow` for a struct.
///
/// Named fields are read from the column of the same name, which can be
/// changed with `#[postwire(rename = "column")]`. Tuple struct fields are read
/// by position. Every field type must implement `Decode`.
///
/// ```ignore
/// #[derive(postwire::FromRow)]
/// struct Post {
///     id: i32,
///     #[postwire(rename = "title")]
///     name: String,
///     note: Option<String>,
/// }
/// ```
#[proc_macro_derive(FromRow, attributes(postwire))]
pub fn from_row(input: TokenStream) -> TokenStream {
    match from_row::from_row(syn::parse_macro_input!(input as DeriveInput)) {
        Ok(ok) => ok,
        Err(err) => err.into_compile_error().into(),
    }
}
