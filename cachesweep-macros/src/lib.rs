//! Procedural macros for cachesweep.
//!
//! This crate provides the `#[cachesweep::test]` attribute macro for writing
//! tests that run within a SweepRuntime.

use proc_macro::TokenStream;
use proc_macro2::TokenStream as TokenStream2;
use quote::quote;
use syn::{parse_macro_input, FnArg, ItemFn, Meta};

/// Configuration parsed from the macro attributes.
#[derive(Default)]
struct TestConfig {
    tokio_threads: Option<usize>,
    workers: Option<usize>,
}

impl TestConfig {
    fn parse(attrs: &[Meta]) -> syn::Result<Self> {
        let mut config = Self::default();

        for meta in attrs {
            let Meta::NameValue(nv) = meta else {
                return Err(syn::Error::new_spanned(
                    meta,
                    "expected `key = value` format",
                ));
            };

            let ident = nv
                .path
                .get_ident()
                .ok_or_else(|| syn::Error::new_spanned(&nv.path, "expected identifier"))?;

            let value = match &nv.value {
                syn::Expr::Lit(syn::ExprLit {
                    lit: syn::Lit::Int(lit),
                    ..
                }) => lit.base10_parse::<usize>()?,
                _ => {
                    return Err(syn::Error::new_spanned(
                        &nv.value,
                        "expected integer literal",
                    ))
                }
            };

            match ident.to_string().as_str() {
                "tokio_threads" => config.tokio_threads = Some(value),
                "workers" => config.workers = Some(value),
                _ => {
                    return Err(syn::Error::new_spanned(
                        ident,
                        format!(
                            "unknown attribute `{}`, expected `tokio_threads` or `workers`",
                            ident
                        ),
                    ))
                }
            }
        }

        Ok(config)
    }
}

/// Runs an async test body inside a fresh `SweepRuntime`.
///
/// The test may take a single `&SweepRuntime` argument, bound to the runtime
/// the body is running on. After the body returns the runtime is shut down
/// and every submitted job is awaited.
///
/// # Default Configuration
///
/// - 1 tokio thread
/// - 2 worker threads
///
/// # Attributes
///
/// - `tokio_threads = N` - Set the number of tokio threads
/// - `workers = N` - Set the number of worker threads
///
/// # Examples
///
/// ```ignore
/// #[cachesweep::test]
/// async fn test_submit(runtime: &cachesweep::SweepRuntime) {
///     let result = runtime.submit(|| Ok(42)).await.unwrap();
///     assert_eq!(result, 42);
/// }
///
/// #[cachesweep::test(workers = 4)]
/// async fn test_full_row(runtime: &cachesweep::SweepRuntime) {
///     assert_eq!(runtime.worker_threads(), 4);
/// }
/// ```
#[proc_macro_attribute]
pub fn test(attr: TokenStream, item: TokenStream) -> TokenStream {
    let input = parse_macro_input!(item as ItemFn);

    let attr_parser = syn::punctuated::Punctuated::<Meta, syn::Token![,]>::parse_terminated;
    let attrs = match syn::parse::Parser::parse(attr_parser, attr) {
        Ok(attrs) => attrs,
        Err(e) => return e.to_compile_error().into(),
    };

    let config = match TestConfig::parse(&attrs.into_iter().collect::<Vec<_>>()) {
        Ok(c) => c,
        Err(e) => return e.to_compile_error().into(),
    };

    match generate_test(input, config) {
        Ok(tokens) => tokens.into(),
        Err(e) => e.to_compile_error().into(),
    }
}

fn generate_test(input: ItemFn, config: TestConfig) -> syn::Result<TokenStream2> {
    let ItemFn {
        attrs,
        vis,
        sig,
        block,
    } = input;

    if sig.asyncness.is_none() {
        return Err(syn::Error::new_spanned(
            sig.fn_token,
            "test function must be async",
        ));
    }

    let fn_name = &sig.ident;
    let tokio_threads = config.tokio_threads.unwrap_or(1);
    let workers = config.workers.unwrap_or(2);

    let binding = match sig.inputs.len() {
        0 => None,
        1 => match &sig.inputs[0] {
            FnArg::Typed(arg) => {
                let pat = &arg.pat;
                let ty = &arg.ty;
                Some(quote! { let #pat: #ty = &__sweep_runtime; })
            }
            FnArg::Receiver(receiver) => {
                return Err(syn::Error::new_spanned(
                    receiver,
                    "test function cannot take `self`",
                ))
            }
        },
        _ => {
            return Err(syn::Error::new_spanned(
                &sig.inputs,
                "test function takes at most one `&SweepRuntime` argument",
            ))
        }
    };

    let mut new_sig = sig.clone();
    new_sig.asyncness = None;
    new_sig.inputs = syn::punctuated::Punctuated::new();

    let output = quote! {
        #[::core::prelude::v1::test]
        #(#attrs)*
        #vis #new_sig {
            let __sweep_runtime = ::cachesweep::SweepRuntime::new(::cachesweep::RuntimeOptions {
                prefix: concat!("test-", stringify!(#fn_name)).to_string(),
                tokio_threads: #tokio_threads,
                worker_threads: #workers,
            })
            .expect("failed to create test runtime");

            __sweep_runtime.block_on(async {
                #binding
                #block
            });
            __sweep_runtime.block_until_idle();
        }
    };

    Ok(output)
}
