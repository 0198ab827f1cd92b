//! Augment the development of the simulator with procedural macros.
//!
//! Crates using these macros must depend on `tracing` and `tracing-subscriber`
//! (usually as dev-dependencies), as the generated code refers to both.

use proc_macro::TokenStream;
use quote::quote;
use syn::{parse_macro_input, Error, ItemFn, LitStr};

/// Run a test function with a `tracing` subscriber installed for its duration.
///
/// The level defaults to `DEBUG` and may be overridden with a string literal
/// (`TRACE`, `DEBUG`, `INFO`, `WARN`, or `ERROR`). Output is captured by the
/// test harness and only shown for failing tests.
///
/// # Example
///
/// ```rust,ignore
/// use pilo_macros::test_traced;
///
/// #[test_traced("INFO")]
/// fn test_routes_converge() {
///     tracing::info!("visible");
///     tracing::debug!("hidden");
/// }
/// ```
#[proc_macro_attribute]
pub fn test_traced(attr: TokenStream, item: TokenStream) -> TokenStream {
    let input = parse_macro_input!(item as ItemFn);

    // Parse the requested level
    let level = if attr.is_empty() {
        String::from("DEBUG")
    } else {
        let literal = parse_macro_input!(attr as LitStr);
        literal.value().to_uppercase()
    };
    let level = match level.as_str() {
        "TRACE" => quote!(tracing::Level::TRACE),
        "DEBUG" => quote!(tracing::Level::DEBUG),
        "INFO" => quote!(tracing::Level::INFO),
        "WARN" => quote!(tracing::Level::WARN),
        "ERROR" => quote!(tracing::Level::ERROR),
        other => {
            return Error::new(
                proc_macro2::Span::call_site(),
                format!("invalid tracing level: {other}"),
            )
            .to_compile_error()
            .into();
        }
    };

    // Wrap the body so the subscriber only applies to this test's thread
    let name = &input.sig.ident;
    let attrs = &input.attrs;
    let vis = &input.vis;
    let body = &input.block;
    let expanded = quote! {
        #[test]
        #(#attrs)*
        #vis fn #name() {
            let subscriber = tracing_subscriber::fmt()
                .with_test_writer()
                .with_max_level(#level)
                .with_line_number(true)
                .finish();
            let dispatcher = tracing::Dispatch::new(subscriber);
            tracing::dispatcher::with_default(&dispatcher, || #body)
        }
    };
    TokenStream::from(expanded)
}
