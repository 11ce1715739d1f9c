//! Integration tests for versioned-rpc.
//!
//! Handlers live under `integration::handlers`, so `handlers::handler1`
//! is served at `/handler1`.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use serde_json::json;
use versioned_rpc::error::{ErrorType, RegistrationError};
use versioned_rpc::schema::{Fields, Shape};
use versioned_rpc::{
    CallContext, DispatchCallbacks, Dispatcher, FormSource, JsonSource, MapCache, Registry,
    RegistryBuilder, RegistryConfig,
};

const ROOT: &str = "integration::handlers";

mod handlers {
    pub mod handler1 {
        use std::sync::Arc;

        use serde::{Deserialize, Serialize};
        use versioned_rpc::{CallContext, ErrorsVar, Handler, MethodError, MethodSet};

        versioned_rpc::rpc_struct! {
            #[derive(Debug, Deserialize)]
            #[serde(rename_all = "camelCase")]
            pub struct V1Args {
                #[param(key = "req_int", description = "Required integer argument")]
                pub req_int: i64,
                #[param(key = "int", description = "Unrequired integer argument")]
                pub int: Option<i64>,
            }
        }

        versioned_rpc::rpc_struct! {
            #[derive(Debug, Serialize)]
            pub struct V1Result {
                #[param(key = "String", description = "Constant text")]
                pub string: String,
                #[param(key = "Int", description = "Echo of req_int")]
                pub int: i64,
            }
        }

        versioned_rpc::rpc_struct! {
            #[derive(Debug, Deserialize)]
            pub struct V2Args {
                #[param(key = "mode", description = "Which failure to produce")]
                pub mode: String,
            }
        }

        versioned_rpc::rpc_struct! {
            #[derive(Debug, Serialize)]
            pub struct V2Result {
                #[param(key = "ok", description = "Always true")]
                pub ok: bool,
            }
        }

        versioned_rpc::errors_var! {
            pub struct V2Errors {
                ERROR_TYPE1 = "Error 1 description",
                ERROR_TYPE2 = "Error 2 description",
                ERROR_TYPE3 = "Error 3 description",
            }
        }

        pub struct Handler1 {
            errors: V2Errors,
        }

        impl Default for Handler1 {
            fn default() -> Self {
                Self {
                    errors: V2Errors::new(),
                }
            }
        }

        impl Handler1 {
            async fn v1(self: Arc<Self>, _ctx: CallContext, args: V1Args) -> Result<V1Result, MethodError> {
                Ok(V1Result {
                    string: "Test".to_string(),
                    int: args.req_int,
                })
            }

            async fn v2(self: Arc<Self>, _ctx: CallContext, args: V2Args) -> Result<V2Result, MethodError> {
                match args.mode.as_str() {
                    "1" => Err(self.errors.ERROR_TYPE1.error().into()),
                    "2" => Err(self.errors.ERROR_TYPE2.error().into()),
                    "3" => Err(self.errors.ERROR_TYPE3.error().into()),
                    "generic" => Err(MethodError::msg("connection reset")),
                    "panic" => panic!("handler1 gave up"),
                    _ => Ok(V2Result { ok: true }),
                }
            }
        }

        fn v2_errors(handler: &Handler1) -> &dyn ErrorsVar {
            &handler.errors
        }

        impl Handler for Handler1 {
            fn caption(&self) -> &str {
                "Handler 1"
            }

            fn description(&self) -> &str {
                "Echoes a required integer"
            }

            fn module_path(&self) -> &'static str {
                module_path!()
            }

            fn methods(methods: &mut MethodSet<Self>) {
                methods
                    .version("V1", Handler1::v1)
                    .version("V2", Handler1::v2)
                    .errors_var("V2ErrorsVar", v2_errors);
            }
        }
    }

    pub mod gap {
        use std::sync::Arc;

        use serde::{Deserialize, Serialize};
        use versioned_rpc::{CallContext, Handler, MethodError, MethodSet};

        versioned_rpc::rpc_struct! {
            #[derive(Debug, Deserialize)]
            pub struct Args {
                #[param(key = "id", description = "Identifier")]
                pub id: u64,
            }
        }

        versioned_rpc::rpc_struct! {
            #[derive(Debug, Serialize)]
            pub struct Reply {
                #[param(key = "id", description = "Identifier")]
                pub id: u64,
            }
        }

        pub struct Gap;

        async fn call(_h: Arc<Gap>, _ctx: CallContext, args: Args) -> Result<Reply, MethodError> {
            Ok(Reply { id: args.id })
        }

        impl Handler for Gap {
            fn caption(&self) -> &str {
                "Gap"
            }

            fn description(&self) -> &str {
                "Skips version 2"
            }

            fn module_path(&self) -> &'static str {
                module_path!()
            }

            fn methods(methods: &mut MethodSet<Self>) {
                methods.version("V1", call).version("V3", call);
            }
        }
    }

    pub mod shared {
        use std::sync::Arc;

        use serde::{Deserialize, Serialize};
        use versioned_rpc::{CallContext, Handler, MethodError, MethodSet};

        versioned_rpc::rpc_struct! {
            #[derive(Debug, Deserialize)]
            pub struct Args {
                #[param(key = "id", description = "Identifier")]
                pub id: u64,
            }
        }

        versioned_rpc::rpc_struct! {
            #[derive(Debug, Serialize)]
            pub struct Common {
                #[param(key = "id", description = "Identifier")]
                pub id: u64,
            }
        }

        pub struct Shared;

        async fn call(_h: Arc<Shared>, _ctx: CallContext, args: Args) -> Result<Common, MethodError> {
            Ok(Common { id: args.id })
        }

        impl Handler for Shared {
            fn caption(&self) -> &str {
                "Shared"
            }

            fn description(&self) -> &str {
                "Two versions with one request and response type"
            }

            fn module_path(&self) -> &'static str {
                module_path!()
            }

            fn methods(methods: &mut MethodSet<Self>) {
                methods.version("V1", call).version("V2", call);
            }
        }
    }

    pub mod tree {
        use std::sync::Arc;

        use serde::{Deserialize, Serialize};
        use versioned_rpc::{CallContext, Handler, MethodError, MethodSet};

        versioned_rpc::rpc_struct! {
            #[derive(Debug, Deserialize)]
            pub struct Node {
                #[param(key = "name", description = "Node name")]
                pub name: String,
                #[param(key = "children", description = "Child nodes")]
                pub children: Option<Vec<Node>>,
            }
        }

        versioned_rpc::rpc_struct! {
            #[derive(Debug, Deserialize)]
            pub struct V1Args {
                #[param(key = "root", description = "Tree root")]
                pub root: Node,
            }
        }

        versioned_rpc::rpc_struct! {
            #[derive(Debug, Serialize)]
            pub struct V1Result {
                #[param(key = "names", description = "Node names, depth first")]
                pub names: Vec<String>,
            }
        }

        versioned_rpc::rpc_struct! {
            #[derive(Debug, Deserialize)]
            pub struct Item {
                #[param(key = "f1", description = "First value")]
                pub f1: i64,
                #[param(key = "f2", description = "Second value")]
                pub f2: Option<i64>,
            }
        }

        versioned_rpc::rpc_struct! {
            #[derive(Debug, Deserialize)]
            pub struct V2Args {
                #[param(key = "items", description = "Items in order")]
                pub items: Vec<Item>,
            }
        }

        versioned_rpc::rpc_struct! {
            #[derive(Debug, Serialize)]
            pub struct V2Result {
                #[param(key = "sums", description = "f1 + f2 per item")]
                pub sums: Vec<i64>,
            }
        }

        fn collect(node: &Node, names: &mut Vec<String>) {
            names.push(node.name.clone());
            for child in node.children.iter().flatten() {
                collect(child, names);
            }
        }

        pub struct Tree;

        async fn walk(_h: Arc<Tree>, _ctx: CallContext, args: V1Args) -> Result<V1Result, MethodError> {
            let mut names = Vec::new();
            collect(&args.root, &mut names);
            Ok(V1Result { names })
        }

        async fn sum(_h: Arc<Tree>, _ctx: CallContext, args: V2Args) -> Result<V2Result, MethodError> {
            Ok(V2Result {
                sums: args
                    .items
                    .iter()
                    .map(|item| item.f1 + item.f2.unwrap_or(0))
                    .collect(),
            })
        }

        impl Handler for Tree {
            fn caption(&self) -> &str {
                "Tree"
            }

            fn description(&self) -> &str {
                "Nested and recursive requests"
            }

            fn module_path(&self) -> &'static str {
                module_path!()
            }

            fn methods(methods: &mut MethodSet<Self>) {
                methods.version("V1", walk).version("V2", sum);
            }
        }
    }

    pub mod slow {
        use std::sync::atomic::{AtomicUsize, Ordering};
        use std::sync::Arc;
        use std::time::Duration;

        use serde::{Deserialize, Serialize};
        use versioned_rpc::{CallContext, Handler, MethodError, MethodSet};

        pub const DELAY: Duration = Duration::from_millis(200);

        versioned_rpc::rpc_struct! {
            #[derive(Debug, Deserialize)]
            pub struct V1Args {
                #[param(key = "id", description = "Identifier")]
                pub id: u64,
            }
        }

        versioned_rpc::rpc_struct! {
            #[derive(Debug, Serialize)]
            pub struct V1Result {
                #[param(key = "id", description = "Identifier")]
                pub id: u64,
            }
        }

        #[derive(Default)]
        pub struct Slow {
            pub calls: AtomicUsize,
        }

        impl Slow {
            async fn v1(self: Arc<Self>, _ctx: CallContext, args: V1Args) -> Result<V1Result, MethodError> {
                self.calls.fetch_add(1, Ordering::SeqCst);
                tokio::time::sleep(DELAY).await;
                Ok(V1Result { id: args.id })
            }
        }

        impl Handler for Slow {
            fn caption(&self) -> &str {
                "Slow"
            }

            fn description(&self) -> &str {
                "Takes its time"
            }

            fn module_path(&self) -> &'static str {
                module_path!()
            }

            fn methods(methods: &mut MethodSet<Self>) {
                methods.version("V1", Slow::v1).marker("V1UseCache");
            }
        }
    }
}

use handlers::{gap::Gap, handler1::Handler1, shared::Shared, slow::Slow, tree::Tree};

fn registry() -> Arc<Registry> {
    let mut builder = RegistryBuilder::new(RegistryConfig::new(ROOT));
    builder.register(Handler1::default()).unwrap();
    builder.register(Tree).unwrap();
    Arc::new(builder.finish().unwrap())
}

#[test]
fn test_version_gap_names_missing_version() {
    let mut builder = RegistryBuilder::new(RegistryConfig::new(ROOT));
    let err = builder.register(Gap).unwrap_err();
    assert!(matches!(
        &err,
        RegistrationError::MissingVersion { missing: 2, .. }
    ));
    assert!(err.to_string().contains("version number 2"));
}

#[tokio::test]
async fn test_required_and_optional_parameters() {
    let dispatcher = Dispatcher::builder(registry()).build();
    let ctx = CallContext::new();

    let mut source = FormSource::from_query("req_int=123");
    let response = dispatcher.dispatch(&ctx, "/handler1/v1/", &mut source).await.unwrap();
    assert_eq!(response.body(), &json!({"String": "Test", "Int": 123}));

    let version = dispatcher.registry().find_handler("/handler1", 1).unwrap();
    let mut source = FormSource::from_query("req_int=123");
    let request = dispatcher
        .unmarshal_parameters(&ctx, version, &mut source)
        .unwrap();
    assert_eq!(request.params(), &json!({"req_int": 123}));

    let mut source = FormSource::from_query("req_int=1&int=2");
    let request = dispatcher
        .unmarshal_parameters(&ctx, version, &mut source)
        .unwrap();
    assert_eq!(request.params(), &json!({"req_int": 1, "int": 2}));

    let mut source = FormSource::from_query("int=2");
    let err = dispatcher
        .dispatch(&ctx, "/handler1/v1/", &mut source)
        .await
        .unwrap_err();
    assert_eq!(err.error_type(), ErrorType::Parameters);
    assert!(err.to_string().contains("missing required field"));
}

#[test]
fn test_shared_structure_detected_at_finish() {
    let mut builder = RegistryBuilder::new(RegistryConfig::new(ROOT));
    builder.register(Handler1::default()).unwrap();
    builder.register(Shared).unwrap();
    match builder.finish() {
        Err(RegistrationError::SharedStructures(shared)) => {
            let names: Vec<_> = shared.iter().map(|s| s.type_name.as_str()).collect();
            assert_eq!(names, ["Args", "Common"]);
            assert_eq!(
                shared[0].users,
                [("/shared".to_string(), 1), ("/shared".to_string(), 2)]
            );
        }
        other => panic!("expected shared structure error, got {:?}", other.err()),
    }

    let mut builder = RegistryBuilder::new(RegistryConfig::new(ROOT));
    builder.register(Handler1::default()).unwrap();
    assert!(builder.finish().is_ok());
}

#[tokio::test]
async fn test_recursive_request() {
    let registry = registry();
    let version = registry.find_handler("/tree", 1).unwrap();

    let Shape::Struct(Fields::Expanded(root)) = &version.request().fields[0].shape else {
        panic!("root should be expanded");
    };
    let Shape::Sequence { element, .. } = &root[1].shape else {
        panic!("children should be a sequence");
    };
    assert!(matches!(
        element.shape,
        Shape::Struct(Fields::Recursive { name: "Node", .. })
    ));

    let dispatcher = Dispatcher::builder(Arc::clone(&registry)).build();
    let mut source = JsonSource::new(
        r#"{"root": {"name": "a", "children": [
            {"name": "b", "children": [{"name": "c"}]},
            {"name": "d"}
        ]}}"#,
    );
    let response = dispatcher
        .dispatch(&CallContext::new(), "/tree/v1/", &mut source)
        .await
        .unwrap();
    assert_eq!(response.body(), &json!({"names": ["a", "b", "c", "d"]}));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_cached_calls_invoke_once() {
    const CALLS: usize = 10;

    let slow = Arc::new(Slow::default());
    let mut builder = RegistryBuilder::new(RegistryConfig::new(ROOT));
    builder.register_shared(Arc::clone(&slow)).unwrap();

    let hits = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&hits);
    let dispatcher = Arc::new(
        Dispatcher::builder(Arc::new(builder.finish().unwrap()))
            .cache(Arc::new(MapCache::new()))
            .callbacks(DispatchCallbacks::new().on_cache_hit(move |_, _, _| {
                counter.fetch_add(1, Ordering::SeqCst);
            }))
            .build(),
    );

    let started = Instant::now();
    let tasks: Vec<_> = (0..CALLS)
        .map(|_| {
            let dispatcher = Arc::clone(&dispatcher);
            tokio::spawn(async move {
                let ctx = CallContext::new();
                ctx.enable_cache();
                let mut source = FormSource::from_query("id=42");
                dispatcher.dispatch(&ctx, "/slow/v1", &mut source).await
            })
        })
        .collect();

    for task in tasks {
        let response = task.await.unwrap().unwrap();
        assert_eq!(response.body(), &json!({"id": 42}));
    }
    let elapsed = started.elapsed();

    assert_eq!(slow.calls.load(Ordering::SeqCst), 1);
    assert_eq!(hits.load(Ordering::SeqCst), CALLS - 1);
    assert!(elapsed < handlers::slow::DELAY * 3, "took {elapsed:?}");
}

#[tokio::test]
async fn test_sequence_of_structs_keeps_order() {
    let dispatcher = Dispatcher::builder(registry()).build();
    let mut source = JsonSource::new(r#"{"items": [{"f1": 1}, {"f1": 2, "f2": 20}]}"#);
    let response = dispatcher
        .dispatch(&CallContext::new(), "/tree/v2/", &mut source)
        .await
        .unwrap();
    assert_eq!(response.body(), &json!({"sums": [1, 22]}));
}

#[tokio::test]
async fn test_error_classification() {
    let dispatcher = Dispatcher::builder(registry()).build();
    let ctx = CallContext::new();

    let version = dispatcher.registry().find_handler("/handler1", 2).unwrap();
    let codes: Vec<_> = version.errors().iter().map(|e| e.code.as_str()).collect();
    assert_eq!(codes, ["ERROR_TYPE1", "ERROR_TYPE2", "ERROR_TYPE3"]);

    let mut source = FormSource::from_query("mode=2");
    let err = dispatcher.dispatch(&ctx, "/handler1/v2/", &mut source).await.unwrap_err();
    assert_eq!(err.error_type(), ErrorType::ReturnedFromCall);
    assert_eq!(err.error_code(), Some("ERROR_TYPE2"));
    assert_eq!(err.user_message(), "Error 2 description");

    let mut source = FormSource::from_query("mode=generic");
    let err = dispatcher.dispatch(&ctx, "/handler1/v2/", &mut source).await.unwrap_err();
    assert_eq!(err.error_type(), ErrorType::Unknown);

    let mut source = FormSource::from_query("mode=panic");
    let err = dispatcher.dispatch(&ctx, "/handler1/v2/", &mut source).await.unwrap_err();
    assert_eq!(err.error_type(), ErrorType::Panic);
    match err {
        versioned_rpc::CallError::Panic { message, trace } => {
            assert_eq!(message, "handler1 gave up");
            assert!(!trace.is_empty());
        }
        other => panic!("expected panic, got {other:?}"),
    }

    let mut source = FormSource::from_query("mode=fine");
    let response = dispatcher.dispatch(&ctx, "/handler1/v2/", &mut source).await.unwrap();
    assert_eq!(response.body(), &json!({"ok": true}));
}

#[test]
fn test_handler_info() {
    let registry = registry();
    assert_eq!(registry.handler_paths(), ["/handler1", "/tree"]);

    let info = registry.handler_info("/handler1").unwrap();
    assert_eq!(info.caption(), "Handler 1");
    let text = info.to_string();
    assert!(text.contains("/handler1/v1/"));
    assert!(text.contains("req_int"));
    assert!(text.contains("ERROR_TYPE1"));
}
