use proc_macro::TokenStream;
use quote::quote;
use syn::parse::Parser;
use syn::punctuated::Punctuated;
use syn::{Attribute, Expr, ExprLit, ItemFn, Lit, ReturnType, Token, parse_macro_input};

struct TestArgs {
    timeout_secs: u64,
    start_paused: bool,
}

/// Runs an async test on a current-thread tokio runtime with a wall-clock
/// timeout.
///
/// Accepts an optional timeout in seconds and the `start_paused` flag, in any
/// order: `#[tokio_timeout_test]`, `#[tokio_timeout_test(10)]`,
/// `#[tokio_timeout_test(10, start_paused)]`. With `start_paused` the tokio
/// clock starts frozen and auto-advances; the timeout is still measured in real
/// time.
///
/// The test may return a value such as `anyhow::Result<()>`; it is handed
/// back to the harness unchanged.
#[proc_macro_attribute]
pub fn tokio_timeout_test(attr: TokenStream, item: TokenStream) -> TokenStream {
    let args = match parse_args(attr) {
        Ok(args) => args,
        Err(err) => return err.to_compile_error().into(),
    };

    let ItemFn {
        attrs,
        vis,
        mut sig,
        block,
    } = parse_macro_input!(item as ItemFn);

    if sig.asyncness.is_none() {
        return syn::Error::new_spanned(
            &sig.ident,
            "tokio_timeout_test can only be applied to async functions",
        )
        .to_compile_error()
        .into();
    }

    sig.asyncness = None;

    let filtered_attrs: Vec<Attribute> = attrs
        .into_iter()
        .filter(|attr| !is_tokio_test_attribute(attr))
        .collect();

    let timeout = args.timeout_secs;
    let start_paused = args.start_paused;
    let clock = if start_paused {
        quote! { .start_paused(true) }
    } else {
        quote! {}
    };
    // A frozen clock auto-advances through tokio timers, so only the real-time
    // guard below can bound a paused test.
    let output = match &sig.output {
        ReturnType::Default => quote! { () },
        ReturnType::Type(_, ty) => quote! { #ty },
    };
    // Pinning the body behind its declared output type lets `?` infer the
    // error type of a `Result`-returning test.
    let test_body = quote! {
        let test_body = async move #block;
        let test_body: std::pin::Pin<&mut dyn std::future::Future<Output = #output>> =
            std::pin::pin!(test_body);
    };
    let body = if start_paused {
        quote! {
            runtime.block_on(async move {
                #test_body
                test_body.await
            })
        }
    } else {
        quote! {
            runtime.block_on(async move {
                #test_body
                tokio::time::timeout(timeout_duration, test_body)
                    .await
                    .expect("test timed out")
            })
        }
    };

    TokenStream::from(quote! {
        #[test]
        #(#filtered_attrs)*
        #vis #sig {
            let timeout_duration = std::time::Duration::from_secs(#timeout);
            let (sender, receiver) = std::sync::mpsc::channel();
            std::thread::spawn(move || {
                let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
                    let runtime = tokio::runtime::Builder::new_current_thread()
                        .enable_all()
                        #clock
                        .build()
                        .expect("failed to build Tokio runtime");
                    #body
                }));
                let _ = sender.send(result);
            });
            match receiver.recv_timeout(timeout_duration) {
                Ok(Ok(value)) => value,
                Ok(Err(payload)) => std::panic::resume_unwind(payload),
                Err(std::sync::mpsc::RecvTimeoutError::Timeout) => panic!("test timed out"),
                Err(std::sync::mpsc::RecvTimeoutError::Disconnected) => {
                    panic!("test thread failed before reporting result")
                }
            }
        }
    })
}

fn parse_args(attr: TokenStream) -> syn::Result<TestArgs> {
    let mut args = TestArgs {
        timeout_secs: 60,
        start_paused: false,
    };
    let exprs = Punctuated::<Expr, Token![,]>::parse_terminated.parse(attr)?;
    for expr in exprs {
        match &expr {
            Expr::Lit(ExprLit {
                lit: Lit::Int(lit), ..
            }) => {
                let secs: u64 = lit.base10_parse()?;
                if secs == 0 {
                    return Err(syn::Error::new_spanned(lit, "timeout must be greater than zero"));
                }
                args.timeout_secs = secs;
            }
            Expr::Path(path) if path.path.is_ident("start_paused") => {
                args.start_paused = true;
            }
            other => {
                return Err(syn::Error::new_spanned(
                    other,
                    "expected a timeout in seconds or `start_paused`",
                ));
            }
        }
    }
    Ok(args)
}

fn is_tokio_test_attribute(attr: &Attribute) -> bool {
    let mut segments = attr.path().segments.iter();
    matches!(
        (segments.next(), segments.next(), segments.next()),
        (Some(first), Some(second), None)
            if first.ident == "tokio" && second.ident == "test"
    )
}
