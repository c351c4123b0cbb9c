use proc_macro::TokenStream;
use proc_macro2::TokenStream as TokenStream2;
use quote::{format_ident, quote};
use syn::{parse_macro_input, spanned::Spanned, FnArg, Ident, ItemFn, Pat, Signature, Type};

/// Transform an asynchronous test into a synchronous one and inject dependencies.
///
/// Each test gets its own server backed by a fresh in-memory store and a
/// recording outbox. Injectable dependencies are
/// [`rocket::local::asynchronous::Client`], [`crate::store::MemoryOtpStore`],
/// and [`crate::notify::Outbox`]. The store and outbox are shared with the
/// server, so tests can inspect and steer them.
///
/// `#[backend_test(issued)]` issues a code to the example subject before
/// the test runs.
#[proc_macro_attribute]
pub fn backend_test(args: TokenStream, input: TokenStream) -> TokenStream {
    let mut item_fn = parse_macro_input!(input as ItemFn);

    // Extract the parameters to inject and reject invalid function signatures.
    let test_args = match check_sig(item_fn.sig.clone()) {
        Ok(args) => args,
        Err(err) => {
            return err.into_compile_error().into();
        }
    };

    // Rename the future so the test can have its original name.
    let name = item_fn.sig.ident.clone();
    let new_name = format_ident!("{}_fut", name);
    item_fn.sig.ident = new_name.clone();

    // Issue a code before the test if needed.
    let maybe_issue = match parse_macro_input!(args as Option<Ident>) {
        None => quote! {},
        // The response borrows the client, so keep it in its own block.
        Some(arg) if arg == "issued" => quote! {{
            let response = rocket_client
                .post(uri!(crate::api::otp::issue))
                .header(rocket::http::ContentType::JSON)
                .body(rocket::serde::json::json!(crate::model::api::otp::SubjectRequest::example()).to_string())
                .dispatch()
                .await;
            assert_eq!(rocket::http::Status::Ok, response.status(), "Failed to issue a code before the test");
        }},
        Some(arg) => {
            return syn::Error::new(arg.span(), "Expected no argument or `issued`")
                .into_compile_error()
                .into();
        }
    };

    // Rewrite the test function.
    quote! {
        #[test]
        fn #name() {
            /// Test setup.
            async fn setup() -> (
                rocket::local::asynchronous::Client,
                crate::store::MemoryOtpStore,
                crate::notify::Outbox,
            ) {
                let store = crate::store::MemoryOtpStore::default();
                let outbox = crate::notify::Outbox::default();
                let rocket = crate::rocket_for_store_and_notifier(
                    crate::test_figment(),
                    std::sync::Arc::new(store.clone()),
                    std::sync::Arc::new(outbox.clone()),
                );
                let rocket_client = rocket::local::asynchronous::Client::tracked(rocket)
                    .await
                    .unwrap();

                #maybe_issue

                (rocket_client, store, outbox)
            }

            /// The test itself.
            #item_fn

            let runtime = rocket::tokio::runtime::Builder::new_multi_thread()
                .thread_name("rocket-worker-test-thread")
                .worker_threads(1)
                .enable_all()
                .build()
                .unwrap();

            // Run the setup, then the test.
            #[allow(unused_variables)]
            let (rocket_client, store, outbox) = runtime.block_on(setup());
            runtime.block_on(#new_name(#(#test_args),*));
        }
    }
    .into()
}

/// Ensure the wrapped test is async, extract parameters to inject, and reject unknown parameters.
fn check_sig(sig: Signature) -> Result<Vec<TokenStream2>, syn::Error> {
    if sig.asyncness.is_none() {
        return Err(syn::Error::new(sig.span(), "Test must be marked `async`"));
    }

    let mut has_client = false;
    let mut has_store = false;
    let mut has_outbox = false;
    let mut args = vec![];

    for input in &sig.inputs {
        if let FnArg::Typed(pat_type) = input {
            if let (Pat::Ident(_), Type::Path(type_path)) = (&*pat_type.pat, &*pat_type.ty) {
                if let Some(type_ident) = type_path.path.get_ident() {
                    let (seen, arg, full_name) = if type_ident == "Client" {
                        (&mut has_client, quote! { rocket_client }, "rocket::local::asynchronous::Client")
                    } else if type_ident == "MemoryOtpStore" {
                        (&mut has_store, quote! { store }, "crate::store::MemoryOtpStore")
                    } else if type_ident == "Outbox" {
                        (&mut has_outbox, quote! { outbox }, "crate::notify::Outbox")
                    } else {
                        return Err(unexpected(input));
                    };
                    if *seen {
                        return Err(syn::Error::new(
                            input.span(),
                            format!("Test cannot accept more than one `{full_name}`"),
                        ));
                    }
                    *seen = true;
                    args.push(arg);
                    continue;
                }
            }
        }

        return Err(unexpected(input));
    }

    Ok(args)
}

fn unexpected(input: &FnArg) -> syn::Error {
    syn::Error::new(
        input.span(),
        "Expected one of `client_ident: Client`, `store_ident: MemoryOtpStore` or `outbox_ident: Outbox`",
    )
}
