use proc_macro::TokenStream;
use proc_macro2::TokenStream as TokenStream2;
use quote::{format_ident, quote};
use syn::{parse_macro_input, spanned::Spanned, FnArg, Ident, ItemFn, Pat, Signature, Type};

/// Transform an asynchronous test into a synchronous one and inject dependencies.
///
/// Every test gets a fresh example service over an in-memory ledger, so no
/// state is shared between tests. Injectable dependencies are
/// [`rocket::local::asynchronous::Client`] and `crate::model::service::SharedService`.
///
/// `#[backend_test(session)]` starts a verification session on the client
/// before the test body runs.
#[proc_macro_attribute]
pub fn backend_test(args: TokenStream, input: TokenStream) -> TokenStream {
    let mut item_fn = parse_macro_input!(input as ItemFn);

    // Extract type information and reject invalid function signatures.
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

    // Start a session on the client if needed.
    let maybe_session = match parse_macro_input!(args as Option<Ident>) {
        Some(arg) if arg == "session" => quote! {
            {
                let response = rocket_client
                    .post(uri!(crate::api::session::start))
                    .dispatch()
                    .await;
                assert_eq!(rocket::http::Status::Created, response.status());
            }
        },
        Some(arg) => {
            return syn::Error::new(arg.span(), "Expected no argument or `session`")
                .into_compile_error()
                .into();
        }
        None => quote! {},
    };

    // Rewrite the test function.
    quote! {
        #[test]
        fn #name() {
            // This test enters backend code, so enable logging.
            log4rs_test_utils::test_logging::init_logging_once_for(
                ["votecheck_backend"],
                None,
                None,
            );

            /// Test setup.
            async fn setup() -> (rocket::local::asynchronous::Client, crate::model::service::SharedService) {
                let service = std::sync::Arc::new(crate::model::service::VerificationService::example());
                let rocket = crate::build_for_service(service.clone(), std::time::Duration::from_secs(60));
                let rocket_client = rocket::local::asynchronous::Client::tracked(rocket)
                    .await
                    .unwrap();

                #maybe_session

                (rocket_client, service)
            }

            /// The test itself.
            #item_fn

            let runtime = rocket::tokio::runtime::Builder::new_multi_thread()
                .thread_name("rocket-worker-test-thread")
                .worker_threads(2)
                .enable_all()
                .build()
                .unwrap();

            #[allow(unused_variables)]
            let (rocket_client, service) = runtime.block_on(setup());
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
    let mut has_service = false;
    let mut args = vec![];

    for input in &sig.inputs {
        if let FnArg::Typed(pat_type) = input {
            if let Pat::Ident(_) = &*pat_type.pat {
                if let Type::Path(type_path) = &*pat_type.ty {
                    if let Some(type_ident) = type_path.path.get_ident() {
                        if type_ident == "Client" {
                            if has_client {
                                return Err(syn::Error::new(input.span(), "Test cannot accept more than one `rocket::local::asynchronous::Client`"));
                            }
                            has_client = true;
                            args.push(quote! { rocket_client });
                            continue;
                        } else if type_ident == "SharedService" {
                            if has_service {
                                return Err(syn::Error::new(
                                    input.span(),
                                    "Test cannot accept more than one `SharedService`",
                                ));
                            }
                            has_service = true;
                            args.push(quote! { service });
                            continue;
                        }
                    }
                }
            }
        }

        return Err(syn::Error::new(
            input.span(),
            "Expected one of `client_ident: Client` or `service_ident: SharedService`",
        ));
    }

    Ok(args)
}
