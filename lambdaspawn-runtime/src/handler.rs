//! Handler plugins
//!
//! Handler code is compiled into the worker binary and registered by name in
//! a [`HandlerRegistry`]. The worker resolves the module path and export name
//! from INIT against that registry, the same way a script runtime would
//! `require` a file and pick an export off it.
//!
//! Two calling conventions are supported behind the single [`Handler`] trait:
//! callback style ([`Export::callback`]) where the handler reports through a
//! [`Completion`], and future style ([`Export::future`]) where it returns a
//! future. The adapter is picked once, at registration.

use crate::once::OnceCallback;
use futures::future::{BoxFuture, FutureExt};
use lambdaspawn_core::{ErrorCode, ErrorPayload};
use serde_json::Value;
use std::any::Any;
use std::collections::HashMap;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::path::Path;
use std::sync::Arc;
use tokio::sync::oneshot;

pub type HandlerOutcome = Result<Value, ErrorPayload>;
pub type HandlerFuture = BoxFuture<'static, HandlerOutcome>;

/// A loaded, callable handler
pub trait Handler: Send + Sync {
    fn call(&self, event: Value, context: Value) -> HandlerFuture;
}

/// Completion callback handed to callback-style handlers.
///
/// Only the first completion counts. Dropping every clone without completing
/// fails the invocation.
#[derive(Clone, Debug)]
pub struct Completion {
    inner: OnceCallback<HandlerOutcome>,
}

impl Completion {
    pub fn complete(&self, outcome: HandlerOutcome) {
        self.inner.complete(outcome);
    }

    pub fn succeed(&self, result: Value) {
        self.complete(Ok(result));
    }

    pub fn fail(&self, err: ErrorPayload) {
        self.complete(Err(err));
    }
}

struct CallbackHandler<F>(F);

impl<F> Handler for CallbackHandler<F>
where
    F: Fn(Value, Value, Completion) + Send + Sync + 'static,
{
    fn call(&self, event: Value, context: Value) -> HandlerFuture {
        let (tx, rx) = oneshot::channel();
        let completion = Completion {
            inner: OnceCallback::new(move |outcome| {
                let _ = tx.send(outcome);
            }),
        };

        let guard = completion.clone();
        if let Err(panic) =
            std::panic::catch_unwind(AssertUnwindSafe(|| (self.0)(event, context, completion)))
        {
            guard.fail(panic_error(panic));
        }
        drop(guard);

        async move {
            rx.await.unwrap_or_else(|_| {
                Err(ErrorPayload::new(
                    ErrorCode::HandlerRuntime,
                    "Handler dropped its callback without completing",
                ))
            })
        }
        .boxed()
    }
}

struct FutureHandler<F>(F);

impl<F, Fut> Handler for FutureHandler<F>
where
    F: Fn(Value, Value) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = HandlerOutcome> + Send + 'static,
{
    fn call(&self, event: Value, context: Value) -> HandlerFuture {
        match std::panic::catch_unwind(AssertUnwindSafe(|| (self.0)(event, context))) {
            Ok(fut) => AssertUnwindSafe(fut)
                .catch_unwind()
                .map(|outcome| outcome.unwrap_or_else(|panic| Err(panic_error(panic))))
                .boxed(),
            Err(panic) => futures::future::ready(Err(panic_error(panic))).boxed(),
        }
    }
}

/// Turn a caught panic into a runtime error carrying the panic message
fn panic_error(panic: Box<dyn Any + Send>) -> ErrorPayload {
    let message = if let Some(s) = panic.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "Handler panicked".to_string()
    };
    let stack = format!("{}: handler panicked: {}", ErrorCode::HandlerRuntime, message);
    ErrorPayload::new(ErrorCode::HandlerRuntime, message).with_stack(stack)
}

/// A named binding exported by a module
#[derive(Clone)]
pub enum Export {
    Handler(Arc<dyn Handler>),
    /// Exported data; resolving it as a handler fails
    Value(Value),
}

impl Export {
    /// Callback-style handler: `f(event, context, completion)`
    pub fn callback<F>(f: F) -> Self
    where
        F: Fn(Value, Value, Completion) + Send + Sync + 'static,
    {
        Self::Handler(Arc::new(CallbackHandler(f)))
    }

    /// Future-style handler: `f(event, context).await`
    pub fn future<F, Fut>(f: F) -> Self
    where
        F: Fn(Value, Value) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = HandlerOutcome> + Send + 'static,
    {
        Self::Handler(Arc::new(FutureHandler(f)))
    }

    pub fn handler(handler: impl Handler + 'static) -> Self {
        Self::Handler(Arc::new(handler))
    }

    pub fn value(value: impl Into<Value>) -> Self {
        Self::Value(value.into())
    }

    pub fn is_callable(&self) -> bool {
        matches!(self, Self::Handler(_))
    }
}

impl std::fmt::Debug for Export {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Handler(_) => f.write_str("Export::Handler"),
            Self::Value(v) => f.debug_tuple("Export::Value").field(v).finish(),
        }
    }
}

/// The exported bindings of one module
#[derive(Clone, Debug, Default)]
pub struct Module {
    exports: HashMap<String, Export>,
}

impl Module {
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn export(mut self, name: impl Into<String>, export: Export) -> Self {
        self.exports.insert(name.into(), export);
        self
    }

    pub fn get(&self, name: &str) -> Option<&Export> {
        self.exports.get(name)
    }

    pub fn export_names(&self) -> impl Iterator<Item = &str> {
        self.exports.keys().map(String::as_str)
    }
}

/// Resolves a module path to its exports
pub trait ModuleLoader: Send + Sync {
    fn load(&self, module_path: &Path) -> Result<Module, ErrorPayload>;
}

/// Modules compiled into the worker, keyed by module name
#[derive(Clone, Debug, Default)]
pub struct HandlerRegistry {
    modules: HashMap<String, Module>,
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_module(mut self, name: impl Into<String>, module: Module) -> Self {
        self.register(name, module);
        self
    }

    pub fn register(&mut self, name: impl Into<String>, module: Module) {
        self.modules.insert(name.into(), module);
    }

    pub fn module_names(&self) -> impl Iterator<Item = &str> {
        self.modules.keys().map(String::as_str)
    }
}

impl ModuleLoader for HandlerRegistry {
    /// `<dir>/<name>` loads the module registered as `name` (any extension is
    /// ignored), provided `<dir>` exists.
    fn load(&self, module_path: &Path) -> Result<Module, ErrorPayload> {
        let not_found = || {
            ErrorPayload::new(
                ErrorCode::HandlerLoad,
                format!("Cannot find module '{}'", module_path.display()),
            )
        };

        let dir_exists = module_path
            .parent()
            .map_or(false, |dir| dir.as_os_str().is_empty() || dir.is_dir());
        if !dir_exists {
            return Err(not_found());
        }

        module_path
            .file_stem()
            .and_then(|stem| stem.to_str())
            .and_then(|name| self.modules.get(name))
            .cloned()
            .ok_or_else(not_found)
    }
}

/// Load `module_path` and resolve `handler_name` to a callable handler
pub fn resolve_handler(
    loader: &dyn ModuleLoader,
    module_path: &Path,
    handler_name: &str,
) -> Result<Arc<dyn Handler>, ErrorPayload> {
    let module = loader.load(module_path)?;

    match module.get(handler_name) {
        Some(Export::Handler(handler)) => Ok(handler.clone()),
        Some(Export::Value(_)) | None => Err(ErrorPayload::new(
            ErrorCode::HandlerLoad,
            format!(
                "Module '{}' does not export the handler '{}'.",
                module_path.display(),
                handler_name
            ),
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn echo_module() -> Module {
        Module::new()
            .export(
                "handler",
                Export::callback(|event, _ctx, done| done.succeed(json!({ "event": event }))),
            )
            .export(
                "asyncHandler",
                Export::future(|event, _ctx| async move { Ok(json!({ "event": event })) }),
            )
            .export("version", Export::value("1.0.0"))
    }

    fn registry() -> HandlerRegistry {
        HandlerRegistry::new().with_module("index", echo_module())
    }

    #[tokio::test]
    async fn test_callback_handler() {
        let dir = tempfile::tempdir().unwrap();
        let handler = resolve_handler(&registry(), &dir.path().join("index"), "handler").unwrap();

        let result = handler.call(json!({"test": "test"}), json!({})).await.unwrap();
        assert_eq!(result, json!({"event": {"test": "test"}}));
    }

    #[tokio::test]
    async fn test_future_handler() {
        let dir = tempfile::tempdir().unwrap();
        let handler =
            resolve_handler(&registry(), &dir.path().join("index.js"), "asyncHandler").unwrap();

        let result = handler.call(json!(1), json!({})).await.unwrap();
        assert_eq!(result, json!({"event": 1}));
    }

    #[test]
    fn test_missing_module_mentions_path() {
        let err = resolve_handler(&registry(), Path::new("/does/not/exist/index"), "handler")
            .err()
            .unwrap();

        assert!(err.is(ErrorCode::HandlerLoad));
        assert!(err.message.contains("/does/not/exist/index"));
    }

    #[test]
    fn test_unregistered_module() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("other");

        let err = resolve_handler(&registry(), &path, "handler").err().unwrap();
        assert_eq!(err.message, format!("Cannot find module '{}'", path.display()));
    }

    #[test]
    fn test_missing_and_non_callable_exports() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("index");

        let missing = resolve_handler(&registry(), &path, "nope").err().unwrap();
        assert!(missing.message.contains("does not export the handler 'nope'"));

        let value = resolve_handler(&registry(), &path, "version").err().unwrap();
        assert!(value.is(ErrorCode::HandlerLoad));
        assert!(value.message.contains("'version'"));
    }

    #[tokio::test]
    async fn test_callback_error_and_first_completion_wins() {
        let handler = CallbackHandler(|_event: Value, _ctx: Value, done: Completion| {
            done.fail(ErrorPayload::custom("MyError", "bad input"));
            done.succeed(json!("ignored"));
        });

        let err = handler.call(json!({}), json!({})).await.unwrap_err();
        assert_eq!(err.code.as_deref(), Some("MyError"));
        assert_eq!(err.message, "bad input");
    }

    #[tokio::test]
    async fn test_callback_completed_later() {
        let handler = CallbackHandler(|event: Value, _ctx: Value, done: Completion| {
            tokio::spawn(async move {
                tokio::time::sleep(std::time::Duration::from_millis(10)).await;
                done.succeed(event);
            });
        });

        let result = handler.call(json!("late"), json!({})).await.unwrap();
        assert_eq!(result, json!("late"));
    }

    #[tokio::test]
    async fn test_dropped_callback_fails() {
        let handler = CallbackHandler(|_event: Value, _ctx: Value, _done: Completion| {});

        let err = handler.call(json!({}), json!({})).await.unwrap_err();
        assert!(err.is(ErrorCode::HandlerRuntime));
    }

    #[tokio::test]
    async fn test_panics_become_runtime_errors() {
        let sync_panic = CallbackHandler(|_event: Value, _ctx: Value, _done: Completion| {
            panic!("boom");
        });
        let err = sync_panic.call(json!({}), json!({})).await.unwrap_err();
        assert!(err.is(ErrorCode::HandlerRuntime));
        assert_eq!(err.message, "boom");

        let async_panic = FutureHandler(|_event: Value, _ctx: Value| async move {
            let reason = String::from("async boom");
            if !reason.is_empty() {
                panic!("{}", reason);
            }
            Ok::<Value, ErrorPayload>(Value::Null)
        });
        let err = async_panic.call(json!({}), json!({})).await.unwrap_err();
        assert_eq!(err.message, "async boom");
    }
}
