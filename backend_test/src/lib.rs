use proc_macro::TokenStream;
use proc_macro2::TokenStream as TokenStream2;
use quote::{format_ident, quote};
use syn::{
    parse_macro_input, spanned::Spanned, FnArg, GenericArgument, Ident, ItemFn, Pat, PathArguments,
    Signature, Type,
};

/// Must match `TEST_DB_URI_VAR` in the crate under test.
const TEST_DB_URI_VAR: &str = "VOTE_LEDGER_TEST_DB_URI";

/// Transform an asynchronous test into a synchronous one, inject dependencies,
/// and ensure that any test database is dropped regardless of how the test terminates.
///
/// With no arguments the test runs against the in-memory stores. With `mongodb`
/// it runs against a fresh database on the deployment named by `VOTE_LEDGER_TEST_DB_URI`,
/// and is marked `#[ignore]` if that variable is unset at compile time.
///
/// Injectable dependencies are [`rocket::local::asynchronous::Client`] and
/// `crate::VoteCoordinator`, plus [`mongodb::Database`] and
/// `crate::model::mongodb::Coll<T>` for `mongodb` tests.
#[proc_macro_attribute]
pub fn backend_test(args: TokenStream, input: TokenStream) -> TokenStream {
    let mut item_fn = parse_macro_input!(input as ItemFn);

    let use_db = match parse_macro_input!(args as Option<Ident>) {
        None => false,
        Some(arg) if arg == "mongodb" => true,
        Some(arg) => {
            return syn::Error::new(arg.span(), "Expected no argument or `mongodb`")
                .into_compile_error()
                .into();
        }
    };

    // Extract type information and reject invalid function signatures.
    let (test_args, collection_idents, collection_types) = match check_sig(&item_fn.sig, use_db) {
        Ok(args) => args,
        Err(err) => {
            return err.into_compile_error().into();
        }
    };

    // Rename the future so the test can have its original name.
    let name = item_fn.sig.ident.clone();
    let new_name = format_ident!("{}_fut", name);
    item_fn.sig.ident = new_name.clone();

    let setup_store = if use_db {
        quote! {
            let db_client = crate::test_db_client()
                .await
                .unwrap_or_else(|| panic!("{} is not set", crate::TEST_DB_URI_VAR));
            let db = db_client.database(&crate::config::get_database_name("voting"));
            crate::model::mongodb::prepare_database(&db).await.unwrap();
            let coordinator = crate::VoteCoordinator::from_db(&db, crate::coordinator::DEFAULT_STORE_TIMEOUT);
            let db = Some(db);
        }
    } else {
        quote! {
            let coordinator = crate::VoteCoordinator::in_memory(crate::coordinator::DEFAULT_STORE_TIMEOUT);
            let db: Option<mongodb::Database> = None;
        }
    };

    // Database tests without a database are reported as ignored rather than passed.
    // `option_env!` makes cargo re-expand the tests when the variable changes.
    let maybe_ignore = if use_db && std::env::var(TEST_DB_URI_VAR).is_err() {
        let reason = format!("{TEST_DB_URI_VAR} is not set");
        quote! { #[ignore = #reason] }
    } else {
        quote! {}
    };
    let track_env = if use_db {
        quote! { const _: Option<&str> = option_env!(#TEST_DB_URI_VAR); }
    } else {
        quote! {}
    };

    // Rewrite the test function.
    quote! {
        #[test]
        #maybe_ignore
        fn #name() {
            #track_env

            /// Test setup.
            async fn setup() -> (rocket::local::asynchronous::Client, crate::VoteCoordinator, Option<mongodb::Database>) {
                #setup_store

                let rocket_client = rocket::local::asynchronous::Client::tracked(
                    crate::rocket_for_coordinator(coordinator.clone(), crate::Config::example()),
                )
                .await
                .unwrap();

                (rocket_client, coordinator, db)
            }

            /// The test itself.
            #item_fn

            /// Test cleanup.
            async fn cleanup(db: Option<mongodb::Database>) {
                if let Some(db) = db {
                    db.drop(None).await.unwrap();
                }
            }

            // Create an async runtime. We need a separate one for inside and
            // outside the `catch_unwind`.
            let outer_runtime = rocket::tokio::runtime::Builder::new_multi_thread()
                .thread_name("test-setup-cleanup")
                .worker_threads(1)
                .enable_all()
                .build()
                .unwrap();
            let inner_runtime = rocket::tokio::runtime::Builder::new_multi_thread()
                .thread_name("rocket-worker-test-thread")
                .worker_threads(2)
                .enable_all()
                .build()
                .unwrap();

            // Run the setup.
            let (rocket_client, coordinator, db) = outer_runtime.block_on(setup());

            // Run the test, catching any panics.
            // Use mutexes to safely transfer `!UnwindSafe` data.
            let client_mutex = std::sync::Mutex::new(rocket_client);
            let coordinator_mutex = std::sync::Mutex::new(coordinator);
            let db_mutex = std::sync::Mutex::new(db.clone());
            let runtime_mutex = std::sync::Mutex::new(inner_runtime);
            let result = std::panic::catch_unwind(|| {
                let rocket_client = client_mutex.into_inner().unwrap();
                let coordinator = coordinator_mutex.into_inner().unwrap();
                let db = db_mutex.into_inner().unwrap();
                let runtime = runtime_mutex.into_inner().unwrap();

                #(
                    let #collection_idents = crate::model::mongodb::Coll::<#collection_types>::from_db(db.as_ref().unwrap());
                )*

                runtime.block_on(#new_name(#(#test_args,)* #(#collection_idents,)*));
            });

            // Run the cleanup.
            outer_runtime.block_on(cleanup(db));

            // If the test panicked, re-raise the panic.
            if let Err(cause) = result {
                std::panic::panic_any(cause);
            }
        }
    }
    .into()
}

/// Ensure the wrapped test is async, extract parameters to inject, and reject unknown parameters.
#[allow(clippy::type_complexity)]
fn check_sig(
    sig: &Signature,
    use_db: bool,
) -> Result<(Vec<TokenStream2>, Vec<Ident>, Vec<Ident>), syn::Error> {
    if sig.asyncness.is_none() {
        return Err(syn::Error::new(sig.span(), "Test must be marked `async`"));
    }

    let mut has_client = false;
    let mut has_coordinator = false;
    let mut has_db = false;
    let mut args = vec![];
    let mut collection_idents = vec![];
    let mut collection_types = vec![];

    let needs_db = |span| {
        syn::Error::new(
            span,
            "Database dependencies require `#[backend_test(mongodb)]`",
        )
    };

    for input in &sig.inputs {
        if let FnArg::Typed(pat_type) = input {
            if let Pat::Ident(pat_ident) = &*pat_type.pat {
                if let Type::Path(type_path) = &*pat_type.ty {
                    if let Some(type_ident) = type_path.path.get_ident() {
                        if type_ident == "Client" {
                            if has_client {
                                return Err(syn::Error::new(input.span(), "Test cannot accept more than one `rocket::local::asynchronous::Client`"));
                            }
                            has_client = true;
                            args.push(quote! { rocket_client });
                            continue;
                        } else if type_ident == "VoteCoordinator" {
                            if has_coordinator {
                                return Err(syn::Error::new(
                                    input.span(),
                                    "Test cannot accept more than one `VoteCoordinator`",
                                ));
                            }
                            has_coordinator = true;
                            args.push(quote! { coordinator });
                            continue;
                        } else if type_ident == "Database" {
                            if !use_db {
                                return Err(needs_db(input.span()));
                            }
                            if has_db {
                                return Err(syn::Error::new(
                                    input.span(),
                                    "Test cannot accept more than one `mongodb::Database`",
                                ));
                            }
                            has_db = true;
                            args.push(quote! { db.clone().unwrap() });
                            continue;
                        }
                    } else {
                        // Valid as the last path segment for any type is itself
                        let possible_collection = type_path.path.segments.last().unwrap();
                        if possible_collection.ident == "Coll" {
                            if !use_db {
                                return Err(needs_db(input.span()));
                            }
                            if let PathArguments::AngleBracketed(generics) =
                                &possible_collection.arguments
                            {
                                if let Some(GenericArgument::Type(Type::Path(type_path))) =
                                    generics.args.first()
                                {
                                    if let Some(type_ident) = type_path.path.get_ident() {
                                        collection_idents.push(pat_ident.ident.clone());
                                        collection_types.push(type_ident.clone());
                                        continue;
                                    }
                                }
                            }
                        }
                    }
                }
            }
        }

        return Err(syn::Error::new(
            input.span(),
            "Expected one of `client_ident: Client`, `coordinator_ident: VoteCoordinator`, `db_ident: Database` or `collection_ident: Coll<T>`",
        ));
    }

    Ok((args, collection_idents, collection_types))
}
