//! Service client construction.
//!
//! A [`ServiceClientFactory`] is built once per target service from a
//! [`ServiceDescriptor`]. Each [`ServiceClientFactory::create_client`] call
//! derives the endpoint from the session, binds a versioned SDK client through
//! the [`ServiceSdk`] port, and attaches the extensions registered for the
//! service. Nothing is cached between calls: two calls yield two independent
//! clients, and catalog changes are observed on the next construction.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::{
    ApiVersion, AuthSession, AuthToken, ClientRetryConfig, ExtensionError, ExtensionHandle,
    ExtensionLoader, FacadeError, Interface, RetryPolicy, ServiceEndpoint, ServiceName,
    ServiceType, SessionId,
};

// ---------------------------------------------------------------------------
// SDK port
// ---------------------------------------------------------------------------

/// Failures reported by a [`ServiceSdk`] or one of its clients.
#[derive(Debug, Clone, Error)]
pub enum SdkError {
    /// The endpoint is not a usable URL.
    #[error("malformed endpoint: {message}")]
    MalformedEndpoint {
        /// Why the endpoint was rejected.
        message: String,
    },

    /// The service could not be reached.
    #[error("service unreachable: {message}")]
    Unreachable {
        /// Transport-level description.
        message: String,
    },

    /// No answer arrived within the configured timeout.
    #[error("service request timed out after {after:?}")]
    Timeout {
        /// Timeout that elapsed.
        after: Duration,
    },

    /// The service answered with an error status.
    #[error("service rejected the request (HTTP {status}): {message}")]
    Rejected {
        /// HTTP status returned by the service.
        status: u16,
        /// Service-supplied explanation.
        message: String,
    },

    /// The service answered with a body that could not be decoded.
    #[error("invalid service response: {message}")]
    InvalidResponse {
        /// What was wrong with the response.
        message: String,
    },
}

impl SdkError {
    /// Transport failures, timeouts and server-side errors may be transient;
    /// everything else is permanent.
    pub fn retry_policy(&self) -> RetryPolicy {
        match self {
            Self::Unreachable { .. } | Self::Timeout { .. } => {
                RetryPolicy::Retryable { after: None }
            }
            Self::Rejected { status, .. } if *status >= 500 => {
                RetryPolicy::Retryable { after: None }
            }
            Self::Rejected { .. }
            | Self::MalformedEndpoint { .. }
            | Self::InvalidResponse { .. } => RetryPolicy::NonRetryable,
        }
    }
}

/// Everything an SDK needs to bind a client.
#[derive(Debug, Clone, Copy)]
pub struct ConnectRequest<'a> {
    /// Service the client is for.
    pub service: &'a ServiceName,
    /// API version the client speaks.
    pub api_version: ApiVersion,
    /// Endpoint the client is bound to.
    pub endpoint: &'a ServiceEndpoint,
    /// Token attached to every request.
    pub token: &'a AuthToken,
}

/// A bound, versioned client for one service endpoint.
///
/// Service-specific operations are out of scope for the façade; the generic
/// read below is what extensions build on.
#[async_trait]
pub trait ServiceSdkClient: Send + Sync + std::fmt::Debug {
    /// Base URL the client is bound to.
    fn endpoint(&self) -> &str;

    /// API version the client speaks.
    fn api_version(&self) -> ApiVersion;

    /// Issues an authenticated `GET` for `path` and decodes the JSON body.
    /// `path` is relative to the endpoint, or an absolute URL on the
    /// endpoint's own origin; other origins are rejected so the token never
    /// leaves the bound service.
    async fn get_json(&self, path: &str) -> Result<Value, SdkError>;

    /// Issues a `GET` for the absolute `url` without the session token and
    /// decodes the JSON body. Used for unauthenticated discovery documents.
    async fn get_public_json(&self, url: &str) -> Result<Value, SdkError>;
}

/// Binds versioned service clients to an endpoint and token.
#[async_trait]
pub trait ServiceSdk: Send + Sync {
    /// Performs one binding attempt. Must not retry internally.
    async fn connect(
        &self,
        request: ConnectRequest<'_>,
    ) -> Result<Arc<dyn ServiceSdkClient>, SdkError>;
}

// ---------------------------------------------------------------------------
// Service descriptors
// ---------------------------------------------------------------------------

/// How a service's endpoint URL is derived from the session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EndpointStrategy {
    /// The service must be listed in the catalog; the URL is the identity
    /// endpoint followed by the session's tenant id.
    TenantPath,
    /// The URL is the catalog entry for the service type and interface.
    CatalogLookup,
}

/// Static description of a target service.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceDescriptor {
    /// Name extensions are registered under.
    pub name: ServiceName,
    /// Catalog service type.
    pub service_type: ServiceType,
    /// How the endpoint is derived.
    pub strategy: EndpointStrategy,
    /// API version used when neither the caller nor configuration picks one.
    pub default_api_version: ApiVersion,
}

impl ServiceDescriptor {
    /// Builds a descriptor; returns `None` if either name is empty.
    pub fn new(
        name: &str,
        service_type: &str,
        strategy: EndpointStrategy,
        default_api_version: ApiVersion,
    ) -> Option<Self> {
        Some(Self {
            name: ServiceName::new(name)?,
            service_type: ServiceType::new(service_type)?,
            strategy,
            default_api_version,
        })
    }

    /// The orchestration service (tenant-path endpoints, API 1.0).
    pub fn orchestration() -> Self {
        Self {
            name: ServiceName::from_static("orchestration"),
            service_type: ServiceType::from_static("orchestration"),
            strategy: EndpointStrategy::TenantPath,
            default_api_version: ApiVersion::new(1, 0),
        }
    }

    /// The block storage service (catalog endpoints, API 3.0).
    pub fn block_storage() -> Self {
        Self {
            name: ServiceName::from_static("block-storage"),
            service_type: ServiceType::from_static("block-storage"),
            strategy: EndpointStrategy::CatalogLookup,
            default_api_version: ApiVersion::new(3, 0),
        }
    }

    /// Resolves a built-in descriptor by service name.
    pub fn builtin(name: &str) -> Option<Self> {
        match name {
            "orchestration" => Some(Self::orchestration()),
            "block-storage" => Some(Self::block_storage()),
            _ => None,
        }
    }
}

// ---------------------------------------------------------------------------
// Service client
// ---------------------------------------------------------------------------

/// A ready-to-use client for one service, bound to one session.
#[derive(Debug)]
pub struct ServiceClient {
    service: ServiceName,
    session: Arc<AuthSession>,
    endpoint: ServiceEndpoint,
    api_version: ApiVersion,
    sdk: Arc<dyn ServiceSdkClient>,
    extensions: ExtensionHandle,
}

impl ServiceClient {
    /// Service this client is for.
    pub fn service(&self) -> &ServiceName {
        &self.service
    }

    /// Id of the session the client is bound to.
    pub fn session_id(&self) -> SessionId {
        self.session.id()
    }

    /// The session the client is bound to.
    pub fn session(&self) -> &Arc<AuthSession> {
        &self.session
    }

    /// Endpoint the client was bound to.
    pub fn endpoint(&self) -> &ServiceEndpoint {
        &self.endpoint
    }

    /// API version the client speaks.
    pub fn api_version(&self) -> ApiVersion {
        self.api_version
    }

    /// The underlying SDK client.
    pub fn sdk(&self) -> &Arc<dyn ServiceSdkClient> {
        &self.sdk
    }

    /// Extensions activated for this client.
    pub fn extensions(&self) -> &ExtensionHandle {
        &self.extensions
    }

    /// Invokes an extension operation.
    ///
    /// # Errors
    ///
    /// Returns [`ExtensionError::UnknownOperation`] when no activated
    /// extension provides `operation`, or the extension's own failure.
    pub async fn invoke_extension(
        &self,
        operation: &str,
        args: Value,
    ) -> Result<Value, ExtensionError> {
        self.extensions.invoke(operation, args).await
    }
}

// ---------------------------------------------------------------------------
// Factory
// ---------------------------------------------------------------------------

/// Builds [`ServiceClient`]s for one service.
#[derive(Clone)]
pub struct ServiceClientFactory {
    descriptor: ServiceDescriptor,
    sdk: Arc<dyn ServiceSdk>,
    extensions: ExtensionLoader,
    interface: Interface,
    retry: ClientRetryConfig,
    timeout: Duration,
}

impl ServiceClientFactory {
    /// Creates a factory with the default interface (`public`), a single
    /// attempt, and a 30 second timeout.
    pub fn new(
        descriptor: ServiceDescriptor,
        sdk: Arc<dyn ServiceSdk>,
        extensions: ExtensionLoader,
    ) -> Self {
        Self {
            descriptor,
            sdk,
            extensions,
            interface: Interface::Public,
            retry: ClientRetryConfig::default(),
            timeout: Duration::from_secs(30),
        }
    }

    /// Uses `interface` for catalog lookups.
    #[must_use]
    pub fn with_interface(mut self, interface: Interface) -> Self {
        self.interface = interface;
        self
    }

    /// Retries transient binding failures per `retry`.
    #[must_use]
    pub fn with_retry(mut self, retry: ClientRetryConfig) -> Self {
        self.retry = retry;
        self
    }

    /// Bounds each binding attempt by `timeout`.
    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// The service this factory builds clients for.
    pub fn descriptor(&self) -> &ServiceDescriptor {
        &self.descriptor
    }

    /// Derives the endpoint for this service from `session`.
    ///
    /// # Errors
    ///
    /// Returns [`FacadeError::EndpointNotFound`] when the catalog does not
    /// list the service, has no endpoint on the interface, or (for
    /// tenant-path services) the session has no tenant id.
    pub fn resolve_endpoint(&self, session: &AuthSession) -> Result<ServiceEndpoint, FacadeError> {
        let identity = session.identity();
        let service_type = &self.descriptor.service_type;

        match self.descriptor.strategy {
            EndpointStrategy::CatalogLookup => identity.get_endpoint(service_type, self.interface),
            EndpointStrategy::TenantPath => {
                let not_found = |reason: &str| FacadeError::EndpointNotFound {
                    service_type: service_type.clone(),
                    interface: self.interface,
                    reason: reason.to_owned(),
                };
                if !identity.service_catalog().contains(service_type) {
                    return Err(not_found("service type is not in the catalog"));
                }
                let tenant_id = identity
                    .tenant_id()
                    .ok_or_else(|| not_found("session is not scoped to a tenant"))?;
                Ok(ServiceEndpoint {
                    service_type: service_type.clone(),
                    interface: self.interface,
                    url: format!("{}/{}", identity.auth_url().trim_end_matches('/'), tenant_id),
                })
            }
        }
    }

    /// Builds a new client bound to `session`, speaking `api_version`.
    ///
    /// # Errors
    ///
    /// - [`FacadeError::EndpointNotFound`]: see
    ///   [`ServiceClientFactory::resolve_endpoint`].
    /// - [`FacadeError::ClientConstruction`] when the SDK rejects the
    ///   endpoint/token pair on every permitted attempt.
    pub async fn create_client(
        &self,
        session: &Arc<AuthSession>,
        api_version: ApiVersion,
    ) -> Result<ServiceClient, FacadeError> {
        self.create_client_cancellable(session, api_version, &CancellationToken::new())
            .await
    }

    /// [`ServiceClientFactory::create_client`] that gives up when `cancel`
    /// fires.
    ///
    /// # Errors
    ///
    /// As [`ServiceClientFactory::create_client`], plus
    /// [`FacadeError::Cancelled`].
    #[tracing::instrument(
        skip_all,
        fields(
            service = %self.descriptor.name,
            session_id = %session.id(),
            api_version = %api_version
        )
    )]
    pub async fn create_client_cancellable(
        &self,
        session: &Arc<AuthSession>,
        api_version: ApiVersion,
        cancel: &CancellationToken,
    ) -> Result<ServiceClient, FacadeError> {
        let endpoint = self.resolve_endpoint(session)?;
        let request = ConnectRequest {
            service: &self.descriptor.name,
            api_version,
            endpoint: &endpoint,
            token: session.identity().auth_token(),
        };

        let sdk = self.connect_with_retry(request, cancel).await?;
        let catalog_endpoint = session
            .identity()
            .get_endpoint(&self.descriptor.service_type, self.interface)
            .ok();
        let extensions = self.extensions.activate(
            &self.descriptor.name,
            &sdk,
            catalog_endpoint.as_ref(),
        );

        info!(
            endpoint = %endpoint.url,
            extensions = extensions.extension_names().len(),
            "Service client ready"
        );
        Ok(ServiceClient {
            service: self.descriptor.name.clone(),
            session: Arc::clone(session),
            endpoint,
            api_version,
            sdk,
            extensions,
        })
    }

    async fn connect_with_retry(
        &self,
        request: ConnectRequest<'_>,
        cancel: &CancellationToken,
    ) -> Result<Arc<dyn ServiceSdkClient>, FacadeError> {
        let mut attempt = 1;
        loop {
            let connect = tokio::time::timeout(self.timeout, self.sdk.connect(request));
            let outcome = tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    return Err(FacadeError::Cancelled { operation: "connect" });
                }
                outcome = connect => outcome,
            };

            let error = match outcome {
                Ok(Ok(client)) => return Ok(client),
                Ok(Err(error)) => error,
                Err(_elapsed) => SdkError::Timeout {
                    after: self.timeout,
                },
            };

            if attempt >= self.retry.max_attempts || !error.retry_policy().is_retryable() {
                warn!(attempt, error = %error, "Service client construction failed");
                return Err(FacadeError::ClientConstruction {
                    service: request.service.clone(),
                    endpoint: request.endpoint.url.clone(),
                    source: error,
                });
            }

            let delay = self.retry.backoff_after(attempt);
            warn!(
                attempt,
                error = %error,
                delay = ?delay,
                "Service client construction failed; retrying"
            );
            tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    return Err(FacadeError::Cancelled { operation: "connect" });
                }
                _ = tokio::time::sleep(delay) => {}
            }
            attempt += 1;
        }
    }
}

impl std::fmt::Debug for ServiceClientFactory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServiceClientFactory")
            .field("descriptor", &self.descriptor)
            .field("interface", &self.interface)
            .field("retry", &self.retry)
            .field("timeout", &self.timeout)
            .finish_non_exhaustive()
    }
}
