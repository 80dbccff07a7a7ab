//! The `Nimbus` façade: one entry point wiring resolver, identity provider,
//! service SDK and registries together.

use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use crate::{
    ApiVersion, AuthSession, AuthSessionFactory, ConfigStore, CredentialOverrides,
    CredentialResolver, CredentialSet, Environment, ExtensionLoader, ExtensionRegistry,
    FacadeConfig, FacadeError, IdentityProvider, ProcessEnvironment, ProtocolVersion,
    ServiceClient, ServiceClientFactory, ServiceDescriptor, ServiceSdk, TrackerModuleHandle,
    TrackerModuleLoader, TrackerRegistry,
};

/// Entry point to a cloud: establishes sessions and builds service clients.
///
/// Built once at process start through [`Nimbus::builder`]; cheap to share
/// behind `Arc`.
pub struct Nimbus {
    config: FacadeConfig,
    sessions: AuthSessionFactory,
    sdk: Arc<dyn ServiceSdk>,
    extensions: ExtensionLoader,
    trackers: TrackerModuleLoader,
}

impl Nimbus {
    /// Starts building a façade over `config_store`.
    pub fn builder(config_store: Arc<dyn ConfigStore>) -> NimbusBuilder {
        NimbusBuilder {
            config_store,
            config: None,
            environment: Arc::new(ProcessEnvironment),
            identity: None,
            sdk: None,
            extensions: Arc::new(ExtensionRegistry::new()),
            trackers: Arc::new(TrackerRegistry::new()),
        }
    }

    /// Effective façade settings.
    pub fn config(&self) -> &FacadeConfig {
        &self.config
    }

    /// Resolves the credentials a session would be built from.
    pub fn resolve_credentials(
        &self,
        version: ProtocolVersion,
        read_from_environment: bool,
        overrides: &CredentialOverrides,
    ) -> CredentialSet {
        self.sessions
            .resolver()
            .resolve(version, read_from_environment, overrides)
    }

    /// Authenticates and returns a shared session.
    ///
    /// # Errors
    ///
    /// See [`AuthSessionFactory::create_session`].
    pub async fn connect(
        &self,
        version: ProtocolVersion,
        read_from_environment: bool,
        overrides: &CredentialOverrides,
    ) -> Result<Arc<AuthSession>, FacadeError> {
        self.sessions
            .create_session(version, read_from_environment, overrides)
            .await
    }

    /// [`Nimbus::connect`] that gives up when `cancel` fires.
    ///
    /// # Errors
    ///
    /// See [`AuthSessionFactory::create_session_cancellable`].
    pub async fn connect_cancellable(
        &self,
        version: ProtocolVersion,
        read_from_environment: bool,
        overrides: &CredentialOverrides,
        cancel: &CancellationToken,
    ) -> Result<Arc<AuthSession>, FacadeError> {
        self.sessions
            .create_session_cancellable(version, read_from_environment, overrides, cancel)
            .await
    }

    /// A client factory for `descriptor`, configured from [`FacadeConfig`].
    pub fn client_factory(&self, descriptor: ServiceDescriptor) -> ServiceClientFactory {
        ServiceClientFactory::new(descriptor, Arc::clone(&self.sdk), self.extensions.clone())
            .with_interface(self.config.interface)
            .with_retry(self.config.client_retry.clone())
            .with_timeout(self.config.request_timeout())
    }

    /// The API version a client for `descriptor` speaks: `requested`, else
    /// the configured version for the service, else the service default.
    pub fn api_version_for(
        &self,
        descriptor: &ServiceDescriptor,
        requested: Option<ApiVersion>,
    ) -> ApiVersion {
        requested
            .or_else(|| self.config.api_version_for(&descriptor.name))
            .unwrap_or(descriptor.default_api_version)
    }

    /// Builds a client for `descriptor` bound to `session`.
    ///
    /// # Errors
    ///
    /// See [`ServiceClientFactory::create_client`].
    pub async fn client(
        &self,
        descriptor: ServiceDescriptor,
        session: &Arc<AuthSession>,
        api_version: Option<ApiVersion>,
    ) -> Result<ServiceClient, FacadeError> {
        let version = self.api_version_for(&descriptor, api_version);
        self.client_factory(descriptor)
            .create_client(session, version)
            .await
    }

    /// Loads the tracker module for `platform`.
    ///
    /// # Errors
    ///
    /// [`FacadeError::ModuleNotFound`] when nothing is registered under it.
    pub fn tracker(&self, platform: &str) -> Result<TrackerModuleHandle, FacadeError> {
        self.trackers.load(platform)
    }

    /// The extension registry clients are activated from.
    pub fn extension_registry(&self) -> &Arc<ExtensionRegistry> {
        self.extensions.registry()
    }
}

impl std::fmt::Debug for Nimbus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Nimbus")
            .field("config", &self.config)
            .field("sessions", &self.sessions)
            .field("extensions", &self.extensions)
            .field("trackers", &self.trackers)
            .finish_non_exhaustive()
    }
}

/// Builder for [`Nimbus`].
pub struct NimbusBuilder {
    config_store: Arc<dyn ConfigStore>,
    config: Option<FacadeConfig>,
    environment: Arc<dyn Environment>,
    identity: Option<Arc<dyn IdentityProvider>>,
    sdk: Option<Arc<dyn ServiceSdk>>,
    extensions: Arc<ExtensionRegistry>,
    trackers: Arc<TrackerRegistry>,
}

impl NimbusBuilder {
    /// Uses `config` instead of reading the `nimbus` section of the store.
    #[must_use]
    pub fn config(mut self, config: FacadeConfig) -> Self {
        self.config = Some(config);
        self
    }

    /// Reads environment credentials from `environment` instead of the
    /// process environment.
    #[must_use]
    pub fn environment(mut self, environment: Arc<dyn Environment>) -> Self {
        self.environment = environment;
        self
    }

    /// Authenticates through `identity`.
    #[must_use]
    pub fn identity_provider(mut self, identity: Arc<dyn IdentityProvider>) -> Self {
        self.identity = Some(identity);
        self
    }

    /// Binds service clients through `sdk`.
    #[must_use]
    pub fn service_sdk(mut self, sdk: Arc<dyn ServiceSdk>) -> Self {
        self.sdk = Some(sdk);
        self
    }

    /// Activates extensions from `registry`.
    #[must_use]
    pub fn extensions(mut self, registry: Arc<ExtensionRegistry>) -> Self {
        self.extensions = registry;
        self
    }

    /// Loads tracker modules from `registry`.
    #[must_use]
    pub fn trackers(mut self, registry: Arc<TrackerRegistry>) -> Self {
        self.trackers = registry;
        self
    }

    /// Validates the configuration and assembles the façade.
    ///
    /// # Errors
    ///
    /// [`FacadeError::Configuration`] when the `nimbus` section is invalid or
    /// no identity provider or service SDK was supplied.
    pub fn build(self) -> Result<Nimbus, FacadeError> {
        let config = match self.config {
            Some(config) => {
                config.validate()?;
                config
            }
            None => FacadeConfig::from_store(self.config_store.as_ref())?,
        };
        let identity = self
            .identity
            .ok_or_else(|| FacadeError::configuration("no identity provider configured"))?;
        let sdk = self
            .sdk
            .ok_or_else(|| FacadeError::configuration("no service SDK configured"))?;

        let resolver = CredentialResolver::new(self.config_store, self.environment);
        Ok(Nimbus {
            sessions: AuthSessionFactory::new(resolver, identity, config.request_timeout()),
            sdk,
            extensions: ExtensionLoader::new(self.extensions),
            trackers: TrackerModuleLoader::new(self.trackers),
            config,
        })
    }
}

impl std::fmt::Debug for NimbusBuilder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NimbusBuilder")
            .field("config", &self.config)
            .field("has_identity", &self.identity.is_some())
            .field("has_sdk", &self.sdk.is_some())
            .finish_non_exhaustive()
    }
}
