//! Typed service registration.
//!
//! A [`Service`] is a named bundle of callable methods. Methods are
//! registered through [`ServiceBuilder`] with plain async closures taking
//! a deserializable argument and returning a serializable reply; the
//! builder erases the types so the dispatch engine works uniformly in
//! [`serde_json::Value`]s. The descriptor kept per method (argument and
//! reply type names, call counter) is what a reflective runtime would
//! recover by introspection.

use std::any::type_name;
use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use futures::future::BoxFuture;
use myrpc_core::{Result, RpcError};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;

type Handler = Arc<dyn Fn(Value) -> BoxFuture<'static, Result<Value>> + Send + Sync>;

/// Descriptor for one registered method: the erased handler plus the
/// introspection data kept alongside it.
pub struct Method {
    name: String,
    arg_type: &'static str,
    reply_type: &'static str,
    handler: Handler,
    calls: AtomicU64,
}

impl Method {
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Rust type name of the argument, as registered.
    pub fn arg_type(&self) -> &'static str {
        self.arg_type
    }

    /// Rust type name of the reply, as registered.
    pub fn reply_type(&self) -> &'static str {
        self.reply_type
    }

    /// How many times this method has been invoked.
    pub fn num_calls(&self) -> u64 {
        self.calls.load(Ordering::Relaxed)
    }
}

impl std::fmt::Debug for Method {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Method")
            .field("name", &self.name)
            .field("arg_type", &self.arg_type)
            .field("reply_type", &self.reply_type)
            .field("calls", &self.num_calls())
            .finish()
    }
}

/// A named set of methods, ready for registration with a server.
pub struct Service {
    name: String,
    methods: HashMap<String, Arc<Method>>,
}

impl Service {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn method(&self, name: &str) -> Option<Arc<Method>> {
        self.methods.get(name).cloned()
    }

    /// Invokes a method: bumps its call counter, runs the handler, and
    /// propagates whatever error it returned.
    pub async fn call(&self, method: &Method, args: Value) -> Result<Value> {
        method.calls.fetch_add(1, Ordering::Relaxed);
        (method.handler)(args).await
    }
}

/// Builder collecting typed methods into a [`Service`].
///
/// Service and method names must be exported-style identifiers (leading
/// ASCII uppercase), matching the `Service.Method` naming on the wire.
/// Violations and duplicate method names surface from [`build`].
///
/// [`build`]: ServiceBuilder::build
pub struct ServiceBuilder {
    name: String,
    methods: HashMap<String, Arc<Method>>,
    error: Option<RpcError>,
}

impl ServiceBuilder {
    pub fn new(name: impl Into<String>) -> Self {
        ServiceBuilder {
            name: name.into(),
            methods: HashMap::new(),
            error: None,
        }
    }

    /// Registers a method. The handler takes the decoded argument and
    /// resolves to the reply; argument decoding failures are reported to
    /// the caller as application errors without invoking the handler.
    pub fn method<A, R, F, Fut>(mut self, name: &str, f: F) -> Self
    where
        A: DeserializeOwned + Send + 'static,
        R: Serialize + Send + 'static,
        F: Fn(A) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<R>> + Send + 'static,
    {
        if self.error.is_some() {
            return self;
        }
        if !is_exported(name) {
            self.error = Some(RpcError::NotExported(name.to_string()));
            return self;
        }
        if self.methods.contains_key(name) {
            self.error = Some(RpcError::DuplicateMethod(name.to_string()));
            return self;
        }

        let handler: Handler = Arc::new(move |raw: Value| -> BoxFuture<'static, Result<Value>> {
            match serde_json::from_value::<A>(raw) {
                Err(e) => Box::pin(async move {
                    Err(RpcError::Application(format!("decoding arguments: {e}")))
                }),
                Ok(args) => {
                    let reply = f(args);
                    Box::pin(async move { Ok(serde_json::to_value(reply.await?)?) })
                }
            }
        });

        self.methods.insert(
            name.to_string(),
            Arc::new(Method {
                name: name.to_string(),
                arg_type: type_name::<A>(),
                reply_type: type_name::<R>(),
                handler,
                calls: AtomicU64::new(0),
            }),
        );
        self
    }

    pub fn build(self) -> Result<Service> {
        if let Some(error) = self.error {
            return Err(error);
        }
        if !is_exported(&self.name) {
            return Err(RpcError::NotExported(self.name));
        }
        Ok(Service {
            name: self.name,
            methods: self.methods,
        })
    }
}

/// Exported identifier: leading ASCII uppercase, alphanumeric or
/// underscore tail.
fn is_exported(name: &str) -> bool {
    let mut chars = name.chars();
    matches!(chars.next(), Some(c) if c.is_ascii_uppercase())
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;
    use serde_json::json;

    #[derive(Deserialize, Serialize)]
    struct SumArgs {
        a: i64,
        b: i64,
    }

    fn arith() -> Service {
        ServiceBuilder::new("Arith")
            .method("Sum", |args: SumArgs| async move { Ok(args.a + args.b) })
            .method("Fail", |_: Value| async move {
                Err::<i64, _>(RpcError::Application("division by zero".into()))
            })
            .build()
            .unwrap()
    }

    #[tokio::test]
    async fn call_invokes_the_handler() {
        let service = arith();
        let method = service.method("Sum").unwrap();
        let reply = service.call(&method, json!({"a": 3, "b": 4})).await.unwrap();
        assert_eq!(reply, json!(7));
    }

    #[tokio::test]
    async fn call_counts_invocations() {
        let service = arith();
        let method = service.method("Sum").unwrap();
        assert_eq!(method.num_calls(), 0);
        for _ in 0..3 {
            service.call(&method, json!({"a": 1, "b": 2})).await.unwrap();
        }
        assert_eq!(method.num_calls(), 3);
    }

    #[tokio::test]
    async fn handler_errors_propagate() {
        let service = arith();
        let method = service.method("Fail").unwrap();
        let err = service.call(&method, json!(null)).await.unwrap_err();
        assert_eq!(err.to_string(), "division by zero");
    }

    #[tokio::test]
    async fn bad_arguments_do_not_invoke_the_handler() {
        let service = arith();
        let method = service.method("Sum").unwrap();
        let err = service.call(&method, json!("not an object")).await.unwrap_err();
        assert!(err.to_string().contains("decoding arguments"));
        // The counter still ticks: the request reached the method.
        assert_eq!(method.num_calls(), 1);
    }

    #[test]
    fn unknown_method_is_absent() {
        let service = arith();
        assert!(service.method("Product").is_none());
    }

    #[test]
    fn method_descriptor_captures_types() {
        let service = arith();
        let method = service.method("Sum").unwrap();
        assert!(method.arg_type().contains("SumArgs"));
        assert!(method.reply_type().contains("i64"));
    }

    #[test]
    fn lowercase_service_name_is_rejected() {
        let result = ServiceBuilder::new("arith")
            .method("Sum", |args: SumArgs| async move { Ok(args.a + args.b) })
            .build();
        assert!(matches!(result, Err(RpcError::NotExported(_))));
    }

    #[test]
    fn lowercase_method_name_is_rejected() {
        let result = ServiceBuilder::new("Arith")
            .method("sum", |args: SumArgs| async move { Ok(args.a + args.b) })
            .build();
        assert!(matches!(result, Err(RpcError::NotExported(_))));
    }

    #[test]
    fn duplicate_method_is_rejected() {
        let result = ServiceBuilder::new("Arith")
            .method("Sum", |args: SumArgs| async move { Ok(args.a + args.b) })
            .method("Sum", |args: SumArgs| async move { Ok(args.a * args.b) })
            .build();
        assert!(matches!(result, Err(RpcError::DuplicateMethod(_))));
    }
}
