//! Configuration consumed by the façade.
//!
//! Two things live here:
//!
//! - [`ConfigStore`], the read-only port over the process configuration
//!   document. Credential sections are keyed by protocol version (`v2`, `v3`).
//!   The store is created by the entry point and passed explicitly to every
//!   component that needs it; there is no global instance.
//! - [`FacadeConfig`], the `nimbus` section of that document: timeouts,
//!   endpoint interface, retry and SDK version settings.

use std::collections::BTreeMap;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::{ApiVersion, FacadeError, Interface, ServiceName};

/// Section of the configuration document holding [`FacadeConfig`].
pub const FACADE_SECTION: &str = "nimbus";

// ---------------------------------------------------------------------------
// Config store port
// ---------------------------------------------------------------------------

/// Read-only access to the nested configuration document.
///
/// Both operations are synchronous, side-effect-free reads.
pub trait ConfigStore: Send + Sync {
    /// Returns the whole configuration document as a nested mapping.
    fn dump_config(&self) -> Value;
}

/// Finds the mapping stored under `key` anywhere in `mapping`.
///
/// Direct children are checked before descending, so a top-level `v3` section
/// wins over a nested one. Returns `None` when no object is stored under the
/// key.
pub fn lookup<'a>(mapping: &'a Value, key: &str) -> Option<&'a Map<String, Value>> {
    let object = mapping.as_object()?;
    if let Some(found) = object.get(key).and_then(Value::as_object) {
        return Some(found);
    }
    object.values().find_map(|child| lookup(child, key))
}

/// A [`ConfigStore`] over an in-memory document.
#[derive(Debug, Clone, Default)]
pub struct StaticConfigStore {
    document: Value,
}

impl StaticConfigStore {
    /// Wraps an already-parsed document.
    pub fn new(document: Value) -> Self {
        Self { document }
    }

    /// A store with no sections.
    pub fn empty() -> Self {
        Self::new(Value::Object(Map::new()))
    }
}

impl ConfigStore for StaticConfigStore {
    fn dump_config(&self) -> Value {
        self.document.clone()
    }
}

// ---------------------------------------------------------------------------
// Façade settings
// ---------------------------------------------------------------------------

/// Bounded retry of service client construction.
///
/// The default is a single attempt: construction failures surface immediately.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ClientRetryConfig {
    /// Total attempts including the first. Must be at least 1.
    pub max_attempts: u32,
    /// Delay before the second attempt; doubled for each further attempt.
    pub initial_backoff_ms: u64,
}

impl Default for ClientRetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 1,
            initial_backoff_ms: 200,
        }
    }
}

impl ClientRetryConfig {
    /// Back-off to wait after the given (1-based) failed attempt.
    pub fn backoff_after(&self, attempt: u32) -> Duration {
        let factor = 2u64.saturating_pow(attempt.saturating_sub(1));
        Duration::from_millis(self.initial_backoff_ms.saturating_mul(factor))
    }
}

/// Settings for session establishment and client construction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct FacadeConfig {
    /// Upper bound, in seconds, on every network call made while
    /// authenticating or binding a client.
    pub request_timeout_secs: u64,

    /// Endpoint interface used for catalog lookups.
    pub interface: Interface,

    /// Retry of transient client construction failures.
    pub client_retry: ClientRetryConfig,

    /// When `true`, the SDK adapter contacts each endpoint while binding a
    /// client so unreachable services fail at construction time.
    pub probe_endpoints: bool,

    /// SDK API version per service name (e.g. `block-storage: "3.0"`).
    pub api_versions: BTreeMap<String, String>,
}

impl Default for FacadeConfig {
    fn default() -> Self {
        Self {
            request_timeout_secs: 30,
            interface: Interface::Public,
            client_retry: ClientRetryConfig::default(),
            probe_endpoints: false,
            api_versions: BTreeMap::new(),
        }
    }
}

impl FacadeConfig {
    /// Reads the [`FACADE_SECTION`] of `store`, falling back to defaults when
    /// the section is absent.
    ///
    /// # Errors
    ///
    /// Returns [`FacadeError::Configuration`] when the section does not
    /// deserialize or fails [`FacadeConfig::validate`].
    pub fn from_store(store: &dyn ConfigStore) -> Result<Self, FacadeError> {
        let document = store.dump_config();
        let config = match document.get(FACADE_SECTION) {
            Some(section) => serde_json::from_value(section.clone()).map_err(|e| {
                FacadeError::configuration(format!("invalid '{FACADE_SECTION}' section: {e}"))
            })?,
            None => Self::default(),
        };
        config.validate()?;
        Ok(config)
    }

    /// Checks the invariants serde cannot express.
    ///
    /// # Errors
    ///
    /// Returns [`FacadeError::Configuration`] for a zero timeout, zero retry
    /// attempts, or an unparseable API version.
    pub fn validate(&self) -> Result<(), FacadeError> {
        if self.request_timeout_secs == 0 {
            return Err(FacadeError::configuration(
                "request_timeout_secs must be greater than zero",
            ));
        }
        if self.client_retry.max_attempts == 0 {
            return Err(FacadeError::configuration(
                "client_retry.max_attempts must be at least 1",
            ));
        }
        for (service, version) in &self.api_versions {
            if ApiVersion::parse(version).is_none() {
                return Err(FacadeError::configuration(format!(
                    "api_versions.{service}: '{version}' is not a valid API version"
                )));
            }
        }
        Ok(())
    }

    /// Returns the timeout applied to network calls.
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    /// Returns the configured SDK API version for `service`, if any.
    pub fn api_version_for(&self, service: &ServiceName) -> Option<ApiVersion> {
        self.api_versions
            .get(service.as_str())
            .and_then(|v| ApiVersion::parse(v))
    }
}
