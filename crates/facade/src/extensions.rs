//! Capability extensions attached to service clients.
//!
//! Extensions are registered per service name in an [`ExtensionRegistry`] at
//! initialization time. Every time a client is constructed the
//! [`ExtensionLoader`] runs the registered factories against the freshly bound
//! SDK client and collects the survivors into an [`ExtensionHandle`].
//!
//! Activation never fails as a whole: a factory that errors is logged and
//! skipped, and the client is built with whatever extensions did activate.

use std::collections::BTreeMap;
use std::sync::{Arc, PoisonError, RwLock};

use async_trait::async_trait;
use serde_json::Value;
use thiserror::Error;
use tracing::{debug, warn};

use crate::{
    ExtensionName, OperationName, SdkError, ServiceEndpoint, ServiceName, ServiceSdkClient,
};

/// Failures raised while activating or invoking an extension.
#[derive(Debug, Clone, Error)]
pub enum ExtensionError {
    /// The factory could not build the extension for this client.
    #[error("extension could not be activated: {message}")]
    Activation {
        /// Why activation failed.
        message: String,
    },

    /// No activated extension provides the operation.
    #[error("no activated extension provides operation '{operation}'")]
    UnknownOperation {
        /// Operation that was requested.
        operation: String,
    },

    /// The arguments do not fit the operation.
    #[error("invalid arguments for '{operation}': {message}")]
    InvalidArguments {
        /// Operation that was invoked.
        operation: String,
        /// What was wrong with the arguments.
        message: String,
    },

    /// The service call behind the operation failed.
    #[error(transparent)]
    Sdk(#[from] SdkError),
}

/// A named set of extra operations layered over a service client.
#[async_trait]
pub trait Extension: Send + Sync {
    /// Name the extension was registered under.
    fn name(&self) -> ExtensionName;

    /// Operations this extension provides.
    fn operations(&self) -> Vec<OperationName>;

    /// Runs `operation` with JSON `args`.
    async fn invoke(&self, operation: &OperationName, args: Value) -> Result<Value, ExtensionError>;
}

/// What a factory gets to build an extension from.
#[derive(Debug, Clone)]
pub struct ExtensionContext {
    /// Service the client belongs to.
    pub service: ServiceName,
    /// The freshly bound SDK client.
    pub sdk: Arc<dyn ServiceSdkClient>,
    /// The service's own entry in the session catalog, on the client's
    /// interface. Differs from `sdk.endpoint()` for tenant-path services.
    pub catalog_endpoint: Option<ServiceEndpoint>,
}

/// Builds an extension for one client.
pub type ExtensionFactory =
    Arc<dyn Fn(&ExtensionContext) -> Result<Arc<dyn Extension>, ExtensionError> + Send + Sync>;

// ---------------------------------------------------------------------------
// Registry
// ---------------------------------------------------------------------------

/// Extension factories, keyed by service name, in registration order.
#[derive(Default)]
pub struct ExtensionRegistry {
    factories: RwLock<BTreeMap<ServiceName, Vec<(ExtensionName, ExtensionFactory)>>>,
}

impl ExtensionRegistry {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `factory` as extension `name` of `service`.
    ///
    /// Registering the same name twice for a service replaces the earlier
    /// factory in place.
    pub fn register<F>(&self, service: ServiceName, name: ExtensionName, factory: F)
    where
        F: Fn(&ExtensionContext) -> Result<Arc<dyn Extension>, ExtensionError>
            + Send
            + Sync
            + 'static,
    {
        let mut factories = self.factories.write().unwrap_or_else(PoisonError::into_inner);
        let entries = factories.entry(service.clone()).or_default();
        let factory: ExtensionFactory = Arc::new(factory);
        match entries.iter_mut().find(|(existing, _)| *existing == name) {
            Some(slot) => {
                debug!(service = %service, extension = %name, "Replacing extension registration");
                slot.1 = factory;
            }
            None => entries.push((name, factory)),
        }
    }

    /// Names of the extensions registered for `service`.
    pub fn registered(&self, service: &ServiceName) -> Vec<ExtensionName> {
        self.factories_for(service)
            .into_iter()
            .map(|(name, _)| name)
            .collect()
    }

    /// Services that have at least one extension registered.
    pub fn services(&self) -> Vec<ServiceName> {
        self.factories
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .keys()
            .cloned()
            .collect()
    }

    fn factories_for(&self, service: &ServiceName) -> Vec<(ExtensionName, ExtensionFactory)> {
        self.factories
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(service)
            .cloned()
            .unwrap_or_default()
    }
}

impl std::fmt::Debug for ExtensionRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let factories = self.factories.read().unwrap_or_else(PoisonError::into_inner);
        let names: BTreeMap<&ServiceName, Vec<&ExtensionName>> = factories
            .iter()
            .map(|(service, entries)| (service, entries.iter().map(|(name, _)| name).collect()))
            .collect();
        f.debug_struct("ExtensionRegistry")
            .field("factories", &names)
            .finish()
    }
}

// ---------------------------------------------------------------------------
// Loader
// ---------------------------------------------------------------------------

/// Activates registered extensions against newly built clients.
#[derive(Debug, Clone)]
pub struct ExtensionLoader {
    registry: Arc<ExtensionRegistry>,
}

impl ExtensionLoader {
    /// Creates a loader reading from `registry`.
    pub fn new(registry: Arc<ExtensionRegistry>) -> Self {
        Self { registry }
    }

    /// The registry this loader reads from.
    pub fn registry(&self) -> &Arc<ExtensionRegistry> {
        &self.registry
    }

    /// Activates every extension registered for `service` against `sdk`.
    /// `catalog_endpoint` is the service's catalog entry, if the session
    /// lists one.
    ///
    /// Factories that fail are skipped with a warning. When two extensions
    /// expose the same operation, the one registered first keeps it.
    pub fn activate(
        &self,
        service: &ServiceName,
        sdk: &Arc<dyn ServiceSdkClient>,
        catalog_endpoint: Option<&ServiceEndpoint>,
    ) -> ExtensionHandle {
        let context = ExtensionContext {
            service: service.clone(),
            sdk: Arc::clone(sdk),
            catalog_endpoint: catalog_endpoint.cloned(),
        };

        let mut handle = ExtensionHandle::empty(service.clone());
        for (name, factory) in self.registry.factories_for(service) {
            match factory(&context) {
                Ok(extension) => {
                    debug!(service = %service, extension = %name, "Extension activated");
                    handle.push(extension);
                }
                Err(error) => {
                    warn!(
                        service = %service,
                        extension = %name,
                        error = %error,
                        "Skipping extension that failed to activate"
                    );
                }
            }
        }
        handle
    }
}

// ---------------------------------------------------------------------------
// Handle
// ---------------------------------------------------------------------------

/// The extensions activated for one client.
#[derive(Clone)]
pub struct ExtensionHandle {
    service: ServiceName,
    extensions: Vec<Arc<dyn Extension>>,
    routes: BTreeMap<OperationName, usize>,
}

impl ExtensionHandle {
    /// A handle with no extensions.
    pub fn empty(service: ServiceName) -> Self {
        Self {
            service,
            extensions: Vec::new(),
            routes: BTreeMap::new(),
        }
    }

    fn push(&mut self, extension: Arc<dyn Extension>) {
        let index = self.extensions.len();
        for operation in extension.operations() {
            if let Some(owner) = self.routes.get(&operation) {
                warn!(
                    service = %self.service,
                    operation = %operation,
                    kept = %self.extensions[*owner].name(),
                    ignored = %extension.name(),
                    "Operation already provided by another extension"
                );
                continue;
            }
            self.routes.insert(operation, index);
        }
        self.extensions.push(extension);
    }

    /// Service the extensions belong to.
    pub fn service(&self) -> &ServiceName {
        &self.service
    }

    /// `true` when nothing activated.
    pub fn is_empty(&self) -> bool {
        self.extensions.is_empty()
    }

    /// Names of the activated extensions, in registration order.
    pub fn extension_names(&self) -> Vec<ExtensionName> {
        self.extensions.iter().map(|e| e.name()).collect()
    }

    /// Every operation that can be invoked.
    pub fn operations(&self) -> Vec<&OperationName> {
        self.routes.keys().collect()
    }

    /// Returns `true` if some activated extension provides `operation`.
    pub fn provides(&self, operation: &str) -> bool {
        self.route(operation).is_some()
    }

    /// Invokes `operation` on whichever extension provides it.
    ///
    /// # Errors
    ///
    /// [`ExtensionError::UnknownOperation`] when nothing provides it, or the
    /// extension's own failure.
    pub async fn invoke(&self, operation: &str, args: Value) -> Result<Value, ExtensionError> {
        let (name, extension) = self
            .route(operation)
            .ok_or_else(|| ExtensionError::UnknownOperation {
                operation: operation.to_owned(),
            })?;
        extension.invoke(name, args).await
    }

    fn route(&self, operation: &str) -> Option<(&OperationName, &Arc<dyn Extension>)> {
        let (name, index) = self.routes.get_key_value(operation)?;
        Some((name, &self.extensions[*index]))
    }
}

impl std::fmt::Debug for ExtensionHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExtensionHandle")
            .field("service", &self.service)
            .field("extensions", &self.extension_names())
            .field("operations", &self.operations())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::tests::FakeSdkClient;
    use crate::ApiVersion;
    use serde_json::json;

    struct Fixed {
        name: &'static str,
        operations: &'static [&'static str],
    }

    #[async_trait]
    impl Extension for Fixed {
        fn name(&self) -> ExtensionName {
            ExtensionName::new(self.name).unwrap()
        }

        fn operations(&self) -> Vec<OperationName> {
            self.operations
                .iter()
                .map(|op| OperationName::new(*op).unwrap())
                .collect()
        }

        async fn invoke(
            &self,
            operation: &OperationName,
            _args: Value,
        ) -> Result<Value, ExtensionError> {
            Ok(json!({ "extension": self.name, "operation": operation.as_str() }))
        }
    }

    fn fixed(
        name: &'static str,
        operations: &'static [&'static str],
    ) -> impl Fn(&ExtensionContext) -> Result<Arc<dyn Extension>, ExtensionError> + Send + Sync {
        move |_ctx: &ExtensionContext| {
            Ok(Arc::new(Fixed { name, operations }) as Arc<dyn Extension>)
        }
    }

    fn storage() -> ServiceName {
        ServiceName::new("block-storage").unwrap()
    }

    fn sdk() -> Arc<dyn ServiceSdkClient> {
        Arc::new(FakeSdkClient {
            endpoint: "http://cinder.example".into(),
            api_version: ApiVersion::new(3, 0),
        })
    }

    fn name(value: &str) -> ExtensionName {
        ExtensionName::new(value).unwrap()
    }

    #[tokio::test]
    async fn activated_operations_are_invocable() {
        let registry = Arc::new(ExtensionRegistry::new());
        registry.register(storage(), name("quotas"), fixed("quotas", &["quota_show"]));
        registry.register(storage(), name("backups"), fixed("backups", &["backup_list"]));

        let handle = ExtensionLoader::new(registry).activate(&storage(), &sdk(), None);

        assert_eq!(handle.extension_names(), vec![name("quotas"), name("backups")]);
        assert!(handle.provides("backup_list"));
        let out = handle.invoke("quota_show", Value::Null).await.unwrap();
        assert_eq!(out["extension"], "quotas");
    }

    #[tokio::test]
    async fn failing_factory_is_skipped() {
        let registry = Arc::new(ExtensionRegistry::new());
        registry.register(storage(), name("broken"), |_ctx: &ExtensionContext| {
            Err(ExtensionError::Activation {
                message: "requires microversion 3.40".into(),
            })
        });
        registry.register(storage(), name("quotas"), fixed("quotas", &["quota_show"]));

        let handle = ExtensionLoader::new(registry).activate(&storage(), &sdk(), None);

        assert_eq!(handle.extension_names(), vec![name("quotas")]);
        assert!(!handle.provides("broken"));
    }

    #[tokio::test]
    async fn unknown_operation_is_reported() {
        let handle = ExtensionLoader::new(Arc::new(ExtensionRegistry::new()))
            .activate(&storage(), &sdk(), None);

        assert!(handle.is_empty());
        let err = handle.invoke("volume_retype", json!({})).await.unwrap_err();
        assert!(matches!(
            err,
            ExtensionError::UnknownOperation { operation } if operation == "volume_retype"
        ));
    }

    #[test]
    fn first_registration_keeps_a_shared_operation() {
        let registry = Arc::new(ExtensionRegistry::new());
        registry.register(storage(), name("a"), fixed("a", &["list"]));
        registry.register(storage(), name("b"), fixed("b", &["list", "show"]));

        let handle = ExtensionLoader::new(registry).activate(&storage(), &sdk(), None);
        let ops: Vec<&str> = handle.operations().iter().map(|op| op.as_str()).collect();
        assert_eq!(ops, vec!["list", "show"]);
        assert_eq!(handle.extension_names().len(), 2);
    }

    #[test]
    fn re_registering_replaces_in_place() {
        let registry = ExtensionRegistry::new();
        registry.register(storage(), name("a"), fixed("a", &["one"]));
        registry.register(storage(), name("b"), fixed("b", &["two"]));
        registry.register(storage(), name("a"), fixed("a", &["three"]));

        assert_eq!(registry.registered(&storage()), vec![name("a"), name("b")]);
        assert_eq!(registry.services(), vec![storage()]);
        assert!(registry
            .registered(&ServiceName::new("orchestration").unwrap())
            .is_empty());
    }

    #[test]
    fn factory_sees_the_bound_client() {
        let registry = Arc::new(ExtensionRegistry::new());
        registry.register(storage(), name("inspect"), |ctx: &ExtensionContext| {
            if ctx.sdk.endpoint().starts_with("http://cinder") {
                Ok(Arc::new(Fixed {
                    name: "inspect",
                    operations: &["ping"],
                }) as Arc<dyn Extension>)
            } else {
                Err(ExtensionError::Activation {
                    message: "wrong endpoint".into(),
                })
            }
        });

        let handle = ExtensionLoader::new(registry).activate(&storage(), &sdk(), None);
        assert!(handle.provides("ping"));
    }

    #[test]
    fn factory_sees_the_catalog_endpoint() {
        let registry = Arc::new(ExtensionRegistry::new());
        registry.register(storage(), name("catalog"), |ctx: &ExtensionContext| {
            let listed = ctx
                .catalog_endpoint
                .as_ref()
                .is_some_and(|endpoint| endpoint.url == "http://cinder.example/v3");
            if !listed {
                return Err(ExtensionError::Activation {
                    message: "no catalog endpoint".into(),
                });
            }
            Ok(Arc::new(Fixed {
                name: "catalog",
                operations: &["where"],
            }) as Arc<dyn Extension>)
        });
        let loader = ExtensionLoader::new(registry);
        let listed = ServiceEndpoint {
            service_type: crate::ServiceType::new("block-storage").unwrap(),
            interface: crate::Interface::Public,
            url: "http://cinder.example/v3".to_owned(),
        };

        assert!(loader.activate(&storage(), &sdk(), Some(&listed)).provides("where"));
        assert!(loader.activate(&storage(), &sdk(), None).is_empty());
    }
}
