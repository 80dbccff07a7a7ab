//! Top-level error and retry-policy types for the façade.
//!
//! [`FacadeError`] is the typed failure every public façade operation returns.
//! Port-level errors ([`crate::IdentityError`], [`crate::SdkError`],
//! [`crate::ExtensionError`]) are defined beside their traits and wrapped here.
//!
//! [`RetryPolicy`] is a cross-cutting concern: every error that participates
//! in retry decisions can produce one. The façade itself only retries client
//! construction, and only when configured to.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::{IdentityError, Interface, SdkError, ServiceName, ServiceType};

// ---------------------------------------------------------------------------
// Retry semantics
// ---------------------------------------------------------------------------

/// Whether an error condition is safe to retry and, if so, after what delay.
///
/// ## Rules
///
/// - `Retryable`: transport failures and timeouts while binding a service
///   client, server-side (5xx) rejections.
/// - `NonRetryable`: insufficient configuration, rejected credentials, missing
///   catalog entries, unknown modules. Retrying with the same input cannot
///   succeed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum RetryPolicy {
    /// The operation may be retried.
    Retryable {
        /// Minimum back-off before the next attempt. `None` means apply the
        /// caller's own back-off schedule.
        after: Option<Duration>,
    },
    /// The operation must not be retried.
    NonRetryable,
}

impl RetryPolicy {
    /// Returns `true` for [`RetryPolicy::Retryable`].
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Retryable { .. })
    }
}

// ---------------------------------------------------------------------------
// Façade errors
// ---------------------------------------------------------------------------

/// Errors surfaced by credential resolution, session establishment, client
/// construction and module lookup.
///
/// Every variant propagates to the immediate caller. The only failures the
/// façade swallows are individual extension activation failures, which are
/// logged and skipped (see [`crate::ExtensionLoader`]).
#[derive(Debug, Error)]
pub enum FacadeError {
    /// The resolved credentials are insufficient or malformed for the requested
    /// protocol version, or the façade configuration is invalid.
    #[error("Configuration error: {message}")]
    Configuration {
        /// Description of the configuration problem.
        message: String,
    },

    /// The identity provider rejected the credentials or could not be reached.
    #[error("Authentication against '{auth_url}' failed: {source}")]
    Authentication {
        /// Identity endpoint the request was sent to.
        auth_url: String,
        /// Failure reported by the identity adapter.
        #[source]
        source: IdentityError,
    },

    /// The session has no usable endpoint for the requested service.
    ///
    /// Fatal for that client construction only; other services are unaffected.
    #[error("No {interface} endpoint for service type '{service_type}': {reason}")]
    EndpointNotFound {
        /// Catalog service type that was looked up.
        service_type: ServiceType,
        /// Interface that was requested.
        interface: Interface,
        /// Why the lookup failed.
        reason: String,
    },

    /// The service SDK rejected the endpoint/token pair.
    #[error("Could not construct '{service}' client for '{endpoint}': {source}")]
    ClientConstruction {
        /// Service the client was being built for.
        service: ServiceName,
        /// Endpoint URL handed to the SDK.
        endpoint: String,
        /// Failure reported by the SDK adapter.
        #[source]
        source: SdkError,
    },

    /// No tracker module is registered under the requested platform name.
    #[error("No tracker module registered for platform '{platform}'")]
    ModuleNotFound {
        /// Platform name that was requested.
        platform: String,
    },

    /// A network-bound operation was cancelled by the caller.
    #[error("Operation cancelled: {operation}")]
    Cancelled {
        /// Name of the operation that was cancelled.
        operation: &'static str,
    },
}

impl FacadeError {
    /// Builds a [`FacadeError::Configuration`].
    #[must_use]
    pub fn configuration(message: impl Into<String>) -> Self {
        Self::Configuration {
            message: message.into(),
        }
    }

    /// Returns whether this failure may be retried.
    pub fn retry_policy(&self) -> RetryPolicy {
        match self {
            Self::ClientConstruction { source, .. } => source.retry_policy(),
            Self::Configuration { .. }
            | Self::Authentication { .. }
            | Self::EndpointNotFound { .. }
            | Self::ModuleNotFound { .. }
            | Self::Cancelled { .. } => RetryPolicy::NonRetryable,
        }
    }
}
