//! Session establishment.
//!
//! [`AuthSessionFactory`] resolves credentials, turns them into a
//! [`PasswordAuth`] descriptor, authenticates through the
//! [`IdentityProvider`] port and wraps the result in an [`AuthSession`]. The
//! session is immutable and shared behind `Arc` by every service client built
//! from it.
//!
//! No retry happens at this layer: a rejected or failed authentication
//! surfaces immediately.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::credentials::keys;
use crate::{
    AuthToken, CredentialOverrides, CredentialResolver, CredentialSet, FacadeError, Interface,
    ProtocolVersion, RetryPolicy, ServiceCatalog, ServiceEndpoint, ServiceType, SessionId,
    Timestamp,
};

// ---------------------------------------------------------------------------
// Authentication descriptor
// ---------------------------------------------------------------------------

/// Project the token is scoped to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProjectScope {
    /// Project (tenant) name.
    pub name: String,
    /// Domain owning the project; always `Some` for v3.
    pub domain_name: Option<String>,
}

/// Password-based authentication request, validated for one protocol version.
#[derive(Clone, PartialEq, Eq)]
pub struct PasswordAuth {
    /// Protocol version the request is shaped for.
    pub version: ProtocolVersion,
    /// Identity endpoint, including the version path segment.
    pub auth_url: String,
    /// User to authenticate as.
    pub username: String,
    /// Password; `None` when no source supplied one.
    pub password: Option<String>,
    /// Domain owning the user; always `Some` for v3.
    pub user_domain_name: Option<String>,
    /// Project scope, when a project was named.
    pub project: Option<ProjectScope>,
}

impl PasswordAuth {
    /// Builds the descriptor from resolved credentials.
    ///
    /// Both versions need `auth_url` and `username`. v3 also needs
    /// `user_domain_name`, and `project_domain_name` whenever a project is
    /// named. v2 ignores domain keys.
    ///
    /// # Errors
    ///
    /// Returns [`FacadeError::Configuration`] naming the first missing key.
    pub fn from_credentials(
        version: ProtocolVersion,
        creds: &CredentialSet,
    ) -> Result<Self, FacadeError> {
        let require = |key: &str| {
            creds.get(key).map(str::to_owned).ok_or_else(|| {
                FacadeError::configuration(format!(
                    "identity {version} credentials are missing '{key}'"
                ))
            })
        };

        let auth_url = require(keys::AUTH_URL)?;
        let username = require(keys::USERNAME)?;
        let password = creds.get(keys::PASSWORD).map(str::to_owned);
        if password.is_none() {
            warn!(username = %username, "No password resolved; the identity provider will decide");
        }

        let (user_domain_name, project) = match version {
            ProtocolVersion::V2 => {
                let project = creds.project_name().map(|name| ProjectScope {
                    name: name.to_owned(),
                    domain_name: None,
                });
                (None, project)
            }
            ProtocolVersion::V3 => {
                let user_domain = require(keys::USER_DOMAIN_NAME)?;
                let project = match creds.project_name() {
                    Some(name) => Some(ProjectScope {
                        name: name.to_owned(),
                        domain_name: Some(require(keys::PROJECT_DOMAIN_NAME)?),
                    }),
                    None => None,
                };
                (Some(user_domain), project)
            }
        };

        Ok(Self {
            version,
            auth_url,
            username,
            password,
            user_domain_name,
            project,
        })
    }
}

impl std::fmt::Debug for PasswordAuth {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PasswordAuth")
            .field("version", &self.version)
            .field("auth_url", &self.auth_url)
            .field("username", &self.username)
            .field("password", &self.password.as_ref().map(|_| "<redacted>"))
            .field("user_domain_name", &self.user_domain_name)
            .field("project", &self.project)
            .finish()
    }
}

// ---------------------------------------------------------------------------
// Identity provider port
// ---------------------------------------------------------------------------

/// What a successful authentication yields.
#[derive(Debug, Clone)]
pub struct AuthGrant {
    /// Token to attach to subsequent service calls.
    pub token: AuthToken,
    /// Id of the project (tenant) the token is scoped to.
    pub project_id: Option<String>,
    /// Id of the authenticated user.
    pub user_id: Option<String>,
    /// When the token stops being accepted, if the provider said.
    pub expires_at: Option<Timestamp>,
    /// Endpoints the token may be used against.
    pub catalog: ServiceCatalog,
}

/// Failures reported by an [`IdentityProvider`].
#[derive(Debug, Clone, Error)]
pub enum IdentityError {
    /// The provider answered and refused the credentials.
    #[error("identity provider rejected the request (HTTP {status}): {message}")]
    Rejected {
        /// HTTP status returned by the provider.
        status: u16,
        /// Provider-supplied explanation.
        message: String,
    },

    /// The provider could not be reached.
    #[error("identity provider unreachable: {message}")]
    Unreachable {
        /// Transport-level description.
        message: String,
    },

    /// No answer arrived within the configured timeout.
    #[error("identity request timed out after {after:?}")]
    Timeout {
        /// Timeout that elapsed.
        after: Duration,
    },

    /// The provider answered with something that is not a usable token.
    #[error("invalid identity response: {message}")]
    InvalidResponse {
        /// What was wrong with the response.
        message: String,
    },
}

/// Authenticates a password descriptor and returns a token plus catalog.
#[async_trait]
pub trait IdentityProvider: Send + Sync {
    /// Performs one authentication request. Must not retry internally.
    async fn authenticate(&self, auth: &PasswordAuth) -> Result<AuthGrant, IdentityError>;
}

// ---------------------------------------------------------------------------
// Session
// ---------------------------------------------------------------------------

/// Identity view of a session: token, tenant and catalog.
#[derive(Debug, Clone)]
pub struct IdentityClient {
    auth_url: String,
    grant: AuthGrant,
}

impl IdentityClient {
    /// Identity endpoint the session authenticated against.
    pub fn auth_url(&self) -> &str {
        &self.auth_url
    }

    /// Id of the project (tenant) the token is scoped to.
    pub fn tenant_id(&self) -> Option<&str> {
        self.grant.project_id.as_deref()
    }

    /// Id of the authenticated user.
    pub fn user_id(&self) -> Option<&str> {
        self.grant.user_id.as_deref()
    }

    /// The session token.
    pub fn auth_token(&self) -> &AuthToken {
        &self.grant.token
    }

    /// The service catalog returned with the token.
    pub fn service_catalog(&self) -> &ServiceCatalog {
        &self.grant.catalog
    }

    /// Looks up the endpoint of `service_type` on `interface`.
    ///
    /// # Errors
    ///
    /// Returns [`FacadeError::EndpointNotFound`] when the catalog has no such
    /// endpoint.
    pub fn get_endpoint(
        &self,
        service_type: &ServiceType,
        interface: Interface,
    ) -> Result<ServiceEndpoint, FacadeError> {
        self.grant.catalog.url_for(service_type, interface)
    }
}

/// An authenticated session shared read-only by every service client.
#[derive(Debug)]
pub struct AuthSession {
    id: SessionId,
    version: ProtocolVersion,
    credentials: CredentialSet,
    identity: IdentityClient,
    created_at: Timestamp,
}

impl AuthSession {
    /// Wraps a grant obtained for `credentials`.
    pub fn new(
        version: ProtocolVersion,
        credentials: CredentialSet,
        auth_url: String,
        grant: AuthGrant,
    ) -> Self {
        Self {
            id: SessionId::new_random(),
            version,
            credentials,
            identity: IdentityClient { auth_url, grant },
            created_at: Timestamp::now(),
        }
    }

    /// Unique id of this session.
    pub fn id(&self) -> SessionId {
        self.id
    }

    /// Protocol version the session authenticated with.
    pub fn protocol_version(&self) -> ProtocolVersion {
        self.version
    }

    /// Credentials the session was established with.
    pub fn credentials(&self) -> &CredentialSet {
        &self.credentials
    }

    /// Identity client bound to this session.
    pub fn identity(&self) -> &IdentityClient {
        &self.identity
    }

    /// When the session was established.
    pub fn created_at(&self) -> Timestamp {
        self.created_at
    }

    /// Returns `true` once the token's reported expiry has passed. A token
    /// without a reported expiry never counts as expired.
    pub fn is_expired(&self) -> bool {
        self.identity
            .grant
            .expires_at
            .is_some_and(|at| at <= Timestamp::now())
    }
}

// ---------------------------------------------------------------------------
// Factory
// ---------------------------------------------------------------------------

/// Builds [`AuthSession`]s from resolved credentials.
#[derive(Clone)]
pub struct AuthSessionFactory {
    resolver: CredentialResolver,
    provider: Arc<dyn IdentityProvider>,
    timeout: Duration,
}

impl AuthSessionFactory {
    /// Creates a factory; `timeout` bounds each authentication call.
    pub fn new(
        resolver: CredentialResolver,
        provider: Arc<dyn IdentityProvider>,
        timeout: Duration,
    ) -> Self {
        Self {
            resolver,
            provider,
            timeout,
        }
    }

    /// The resolver sessions are built from.
    pub fn resolver(&self) -> &CredentialResolver {
        &self.resolver
    }

    /// Resolves credentials and authenticates.
    ///
    /// # Errors
    ///
    /// - [`FacadeError::Configuration`] when the credentials lack a key the
    ///   version needs.
    /// - [`FacadeError::Authentication`] when the provider rejects them, is
    ///   unreachable, or does not answer in time.
    pub async fn create_session(
        &self,
        version: ProtocolVersion,
        read_from_environment: bool,
        overrides: &CredentialOverrides,
    ) -> Result<Arc<AuthSession>, FacadeError> {
        self.create_session_cancellable(
            version,
            read_from_environment,
            overrides,
            &CancellationToken::new(),
        )
        .await
    }

    /// [`AuthSessionFactory::create_session`] that gives up when `cancel`
    /// fires.
    ///
    /// # Errors
    ///
    /// As [`AuthSessionFactory::create_session`], plus
    /// [`FacadeError::Cancelled`].
    #[tracing::instrument(skip_all, fields(version = %version))]
    pub async fn create_session_cancellable(
        &self,
        version: ProtocolVersion,
        read_from_environment: bool,
        overrides: &CredentialOverrides,
        cancel: &CancellationToken,
    ) -> Result<Arc<AuthSession>, FacadeError> {
        let credentials = self
            .resolver
            .resolve(version, read_from_environment, overrides);
        let auth = PasswordAuth::from_credentials(version, &credentials)?;

        let attempt = tokio::time::timeout(self.timeout, self.provider.authenticate(&auth));
        let outcome = tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                return Err(FacadeError::Cancelled { operation: "authenticate" });
            }
            outcome = attempt => outcome,
        };

        let grant = match outcome {
            Ok(Ok(grant)) => grant,
            Ok(Err(source)) => {
                warn!(auth_url = %auth.auth_url, error = %source, "Authentication failed");
                return Err(FacadeError::Authentication {
                    auth_url: auth.auth_url,
                    source,
                });
            }
            Err(_elapsed) => {
                warn!(
                    auth_url = %auth.auth_url,
                    timeout = ?self.timeout,
                    "Authentication timed out"
                );
                return Err(FacadeError::Authentication {
                    auth_url: auth.auth_url,
                    source: IdentityError::Timeout {
                        after: self.timeout,
                    },
                });
            }
        };

        let session = AuthSession::new(version, credentials, auth.auth_url, grant);
        info!(
            session_id = %session.id(),
            tenant_id = session.identity().tenant_id().unwrap_or("-"),
            services = session.identity().service_catalog().entries().len(),
            "Identity session established"
        );
        Ok(Arc::new(session))
    }
}

impl std::fmt::Debug for AuthSessionFactory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuthSessionFactory")
            .field("timeout", &self.timeout)
            .finish_non_exhaustive()
    }
}

impl IdentityError {
    /// Identity failures are never retried by the façade.
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::NonRetryable
    }
}
