//! Operation providers and their registry.
//!
//! An operation is the underlying asynchronous call a fetch stands for.
//! The engine calls exactly one operation per started task and never
//! retries. Dropping the returned future is the cancellation contract:
//! whatever the call holds (timers, sockets) must be released on drop.

use async_trait::async_trait;
use futures::future::BoxFuture;
use indexmap::IndexMap;
use keyfetch_core::OperationError;
use serde_json::Value;
use std::future::Future;
use std::sync::Arc;

/// An asynchronous operation bound to an operation type
#[async_trait]
pub trait Operation: Send + Sync {
    /// Run the operation with the request arguments
    async fn call(&self, arguments: Vec<Value>) -> Result<Value, OperationError>;
}

/// Operation backed by a closure returning a future
pub struct FnOperation<F> {
    f: F,
}

impl<F, Fut> FnOperation<F>
where
    F: Fn(Vec<Value>) -> Fut + Send + Sync,
    Fut: Future<Output = Result<Value, OperationError>> + Send + 'static,
{
    /// Wrap a closure
    #[must_use]
    pub fn new(f: F) -> Self {
        Self { f }
    }
}

#[async_trait]
impl<F, Fut> Operation for FnOperation<F>
where
    F: Fn(Vec<Value>) -> Fut + Send + Sync,
    Fut: Future<Output = Result<Value, OperationError>> + Send + 'static,
{
    async fn call(&self, arguments: Vec<Value>) -> Result<Value, OperationError> {
        (self.f)(arguments).await
    }
}

/// Shorthand for an `Arc<dyn Operation>` built from a closure
pub fn operation_fn<F, Fut>(f: F) -> Arc<dyn Operation>
where
    F: Fn(Vec<Value>) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<Value, OperationError>> + Send + 'static,
{
    Arc::new(FnOperation::new(f))
}

/// Boxed call future, as spawned by the supervisor
pub type CallFuture = BoxFuture<'static, Result<Value, OperationError>>;

/// Error from registry operations
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RegistryError {
    /// Provider already registered
    #[error("Provider already registered: {name}")]
    AlreadyRegistered { name: String },

    /// Provider not found and no default to fall back on
    #[error("No provider registered for {name}")]
    NotFound { name: String },
}

/// Registry of operation providers
///
/// Named providers are looked up by [`FetchRequest::provider`]; a request
/// naming no provider, or one that is not registered, falls back to the
/// default provider.
///
/// [`FetchRequest::provider`]: keyfetch_core::FetchRequest::provider
#[derive(Clone, Default)]
pub struct OperationRegistry {
    /// Fallback provider
    default: Option<Arc<dyn Operation>>,
    /// Providers by name
    named: IndexMap<String, Arc<dyn Operation>>,
}

impl OperationRegistry {
    /// Create an empty registry
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a registry with a single default provider
    #[must_use]
    pub fn with_default(operation: Arc<dyn Operation>) -> Self {
        Self {
            default: Some(operation),
            named: IndexMap::new(),
        }
    }

    /// Replace the default provider
    pub fn set_default(&mut self, operation: Arc<dyn Operation>) {
        self.default = Some(operation);
    }

    /// Register a named provider
    ///
    /// # Errors
    ///
    /// Returns error if the name is taken
    pub fn register(
        &mut self,
        name: impl Into<String>,
        operation: Arc<dyn Operation>,
    ) -> Result<(), RegistryError> {
        let name = name.into();
        if self.named.contains_key(&name) {
            return Err(RegistryError::AlreadyRegistered { name });
        }
        self.named.insert(name, operation);
        Ok(())
    }

    /// Resolve the provider for a request
    ///
    /// # Errors
    ///
    /// Returns error if neither the named provider nor a default exists
    pub fn resolve(&self, name: Option<&str>) -> Result<Arc<dyn Operation>, RegistryError> {
        name.and_then(|n| self.named.get(n))
            .or(self.default.as_ref())
            .map(Arc::clone)
            .ok_or_else(|| RegistryError::NotFound {
                name: name.unwrap_or("default").to_string(),
            })
    }

    /// Start a call on the resolved provider
    ///
    /// Resolution failures come back as an already-failed call, so a missing
    /// provider follows the normal failure lifecycle.
    #[must_use]
    pub fn call(&self, name: Option<&str>, arguments: Vec<Value>) -> CallFuture {
        match self.resolve(name) {
            Ok(operation) => Box::pin(async move { operation.call(arguments).await }),
            Err(err) => {
                let error = OperationError::new(err.to_string());
                Box::pin(async move { Err(error) })
            }
        }
    }

    /// Names of registered providers
    #[must_use]
    pub fn names(&self) -> Vec<String> {
        self.named.keys().cloned().collect()
    }

    /// Check if a named provider is registered
    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.named.contains_key(name)
    }

    /// Whether a default provider is set
    #[must_use]
    pub fn has_default(&self) -> bool {
        self.default.is_some()
    }
}

impl std::fmt::Debug for OperationRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OperationRegistry")
            .field("default", &self.default.is_some())
            .field("named", &self.names())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn constant(value: Value) -> Arc<dyn Operation> {
        operation_fn(move |_args| {
            let value = value.clone();
            async move { Ok(value) }
        })
    }

    #[tokio::test]
    async fn test_fn_operation_call() {
        let op = operation_fn(|args| async move { Ok(json!({ "apiResult": args })) });
        let result = op.call(vec![json!(1), json!(2)]).await.unwrap();
        assert_eq!(result, json!({"apiResult": [1, 2]}));
    }

    #[tokio::test]
    async fn test_resolve_default() {
        let registry = OperationRegistry::with_default(constant(json!("default")));
        let op = registry.resolve(None).unwrap();
        assert_eq!(op.call(vec![]).await.unwrap(), json!("default"));
    }

    #[tokio::test]
    async fn test_resolve_named() {
        let mut registry = OperationRegistry::with_default(constant(json!("default")));
        registry.register("users", constant(json!("users"))).unwrap();

        let op = registry.resolve(Some("users")).unwrap();
        assert_eq!(op.call(vec![]).await.unwrap(), json!("users"));
        assert!(registry.contains("users"));
    }

    #[tokio::test]
    async fn test_resolve_unknown_falls_back_to_default() {
        let registry = OperationRegistry::with_default(constant(json!("default")));
        let op = registry.resolve(Some("missing")).unwrap();
        assert_eq!(op.call(vec![]).await.unwrap(), json!("default"));
    }

    #[test]
    fn test_resolve_without_default() {
        let registry = OperationRegistry::new();
        let err = registry.resolve(Some("missing")).err().unwrap();
        assert_eq!(
            err,
            RegistryError::NotFound {
                name: "missing".to_string()
            }
        );
        assert!(registry.resolve(None).is_err());
    }

    #[test]
    fn test_register_duplicate() {
        let mut registry = OperationRegistry::new();
        registry.register("users", constant(json!(1))).unwrap();
        let err = registry.register("users", constant(json!(2))).unwrap_err();
        assert!(matches!(err, RegistryError::AlreadyRegistered { .. }));
    }

    #[tokio::test]
    async fn test_call_missing_provider_fails() {
        let registry = OperationRegistry::new();
        let err = registry.call(None, vec![]).await.unwrap_err();
        assert!(err.message.contains("default"));
    }
}
