//! Users service - a versioned handler served through every parameter source.
//!
//! This example demonstrates:
//! - Declaring a handler with two versions, a cached version and declared errors
//! - Building a registry and printing the generated handler documentation
//! - Dispatching the same operation from a query string, a JSON body and
//!   JSON-RPC params
//! - Serving repeated calls from the response cache
//!
//! ```text
//! RUST_LOG=versioned_rpc=trace cargo run --example users
//! ```

use std::sync::Arc;
use std::time::Duration;

use serde_json::json;
use tracing_subscriber::EnvFilter;
use versioned_rpc::{
    CallContext, DispatchCallbacks, Dispatcher, FormSource, JsonSource, MapCache, RegistryBuilder,
    RegistryConfig, RpcSource,
};

mod handlers {
    pub mod users {
        use std::collections::HashMap;
        use std::sync::Arc;

        use serde::{Deserialize, Serialize};
        use versioned_rpc::{CallContext, ErrorsVar, Handler, MethodError, MethodSet};

        versioned_rpc::rpc_struct! {
            #[derive(Debug, Deserialize)]
            pub struct V1Args {
                #[param(key = "id", description = "User identifier")]
                pub id: u32,
            }
        }

        versioned_rpc::rpc_struct! {
            #[derive(Debug, Serialize)]
            pub struct V1Result {
                #[param(key = "name", description = "Display name")]
                pub name: String,
            }
        }

        versioned_rpc::rpc_struct! {
            #[derive(Debug, Deserialize)]
            pub struct V2Args {
                #[param(key = "ids", description = "User identifiers")]
                pub ids: Vec<u32>,
                #[param(key = "with_email", description = "Include e-mail addresses")]
                pub with_email: Option<bool>,
            }
        }

        versioned_rpc::rpc_struct! {
            #[derive(Debug, Serialize)]
            pub struct Profile {
                #[param(key = "name", description = "Display name")]
                pub name: String,
                #[param(key = "email", description = "E-mail address")]
                pub email: Option<String>,
            }
        }

        versioned_rpc::rpc_struct! {
            #[derive(Debug, Serialize)]
            pub struct V2Result {
                #[param(key = "profiles", description = "Profiles by identifier")]
                pub profiles: HashMap<u32, Profile>,
            }
        }

        versioned_rpc::errors_var! {
            pub struct V2Errors {
                NOT_FOUND = "User not found",
            }
        }

        pub struct Users {
            names: HashMap<u32, &'static str>,
            errors: V2Errors,
        }

        impl Default for Users {
            fn default() -> Self {
                Self {
                    names: HashMap::from([(1, "Ann"), (2, "Bob"), (7, "Eve")]),
                    errors: V2Errors::new(),
                }
            }
        }

        impl Users {
            async fn v1(self: Arc<Self>, _ctx: CallContext, args: V1Args) -> Result<V1Result, MethodError> {
                let name = self.names.get(&args.id).copied().unwrap_or("anonymous");
                Ok(V1Result {
                    name: name.to_string(),
                })
            }

            async fn v2(self: Arc<Self>, _ctx: CallContext, args: V2Args) -> Result<V2Result, MethodError> {
                let mut profiles = HashMap::with_capacity(args.ids.len());
                for id in args.ids {
                    let Some(name) = self.names.get(&id) else {
                        return Err(self.errors.NOT_FOUND.error().into());
                    };
                    let email = args
                        .with_email
                        .unwrap_or(false)
                        .then(|| format!("{}@example.org", name.to_lowercase()));
                    profiles.insert(
                        id,
                        Profile {
                            name: name.to_string(),
                            email,
                        },
                    );
                }
                Ok(V2Result { profiles })
            }
        }

        fn v2_errors(users: &Users) -> &dyn ErrorsVar {
            &users.errors
        }

        impl Handler for Users {
            fn caption(&self) -> &str {
                "Users"
            }

            fn description(&self) -> &str {
                "User directory lookups"
            }

            fn module_path(&self) -> &'static str {
                module_path!()
            }

            fn methods(methods: &mut MethodSet<Self>) {
                methods
                    .version("V1", Users::v1)
                    .version("V2", Users::v2)
                    .marker("V1UseCache")
                    .errors_var("V2ErrorsVar", v2_errors);
            }
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let mut builder = RegistryBuilder::new(RegistryConfig::new("users::handlers"));
    builder.register(handlers::users::Users::default())?;
    let registry = Arc::new(builder.finish()?);

    for handler in registry.handlers() {
        print!("{handler}");
    }

    let callbacks = DispatchCallbacks::new()
        .on_success(|_, version, response, elapsed| {
            println!(
                "{} in {elapsed:?}{}",
                version.route(),
                if response.is_from_cache() { " (cached)" } else { "" }
            );
        })
        .on_error(|_, version, err| println!("{} failed: {}", version.route(), err.user_message()));

    let dispatcher = Dispatcher::builder(registry)
        .cache(Arc::new(MapCache::new()))
        .cache_ttl(Duration::from_secs(60))
        .callbacks(callbacks)
        .build();

    let ctx = CallContext::new();
    ctx.enable_cache();
    ctx.enable_etag();

    for _ in 0..2 {
        let mut source = FormSource::from_query("id=7");
        let response = dispatcher.dispatch(&ctx, "/users/v1/", &mut source).await?;
        println!("{} etag={:?}", response.body(), response.etag());
    }

    let mut source = JsonSource::new(r#"{"ids": [1, 2], "with_email": true}"#);
    let response = dispatcher.dispatch(&ctx, "/users/v2/", &mut source).await?;
    println!("{}", response.body());

    let mut source = RpcSource::new(json!({"ids": [3]}));
    if let Err(err) = dispatcher.dispatch(&ctx, "/users/v2", &mut source).await {
        println!("{:?}: {}", err.error_type(), err.error_code().unwrap_or("-"));
    }

    Ok(())
}
