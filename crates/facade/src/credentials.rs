//! Credential resolution.
//!
//! [`CredentialResolver`] picks exactly one source for the effective
//! [`CredentialSet`]:
//!
//! 1. caller overrides, when any were supplied;
//! 2. the `OS_*` environment variables, when the caller asks for them;
//! 3. the configuration section named after the protocol version.
//!
//! Sources are never merged. Keys without a value are dropped from whichever
//! source wins, so downstream stages only ever see defined values.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use serde_json::Value;
use tracing::{debug, info};

use crate::config::{lookup, ConfigStore};
use crate::ProtocolVersion;

/// Recognised credential keys.
pub mod keys {
    /// Name of the user to authenticate as.
    pub const USERNAME: &str = "username";
    /// Password for [`USERNAME`].
    pub const PASSWORD: &str = "password";
    /// Identity endpoint, including the version path segment.
    pub const AUTH_URL: &str = "auth_url";
    /// Project to scope the token to (v3 naming).
    pub const PROJECT_NAME: &str = "project_name";
    /// Project to scope the token to (v2 naming).
    pub const TENANT_NAME: &str = "tenant_name";
    /// Domain owning the user (v3 only).
    pub const USER_DOMAIN_NAME: &str = "user_domain_name";
    /// Domain owning the project (v3 only).
    pub const PROJECT_DOMAIN_NAME: &str = "project_domain_name";
}

/// Keys whose values never appear in diagnostic output.
const SECRET_KEYS: &[&str] = &[keys::PASSWORD];

const REDACTED: &str = "<redacted>";

/// Environment variables read when resolving from the environment, and the
/// credential key each one populates.
pub const ENVIRONMENT_VARIABLES: &[(&str, &str)] = &[
    ("OS_USERNAME", keys::USERNAME),
    ("OS_PASSWORD", keys::PASSWORD),
    ("OS_AUTH_URL", keys::AUTH_URL),
    ("OS_TENANT_NAME", keys::TENANT_NAME),
];

// ---------------------------------------------------------------------------
// Credential set
// ---------------------------------------------------------------------------

/// The effective credentials produced by one resolution.
///
/// Only keys with a defined value are present. Unrecognised keys from the
/// winning source are carried through. Immutable once built.
#[derive(Clone, Default, PartialEq, Eq)]
pub struct CredentialSet(BTreeMap<String, String>);

impl CredentialSet {
    /// Builds a set from key/value pairs.
    pub fn from_pairs<K, V>(pairs: impl IntoIterator<Item = (K, V)>) -> Self
    where
        K: Into<String>,
        V: Into<String>,
    {
        Self(
            pairs
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        )
    }

    /// Returns the value stored under `key`.
    pub fn get(&self, key: &str) -> Option<&str> {
        self.0.get(key).map(String::as_str)
    }

    /// Returns `true` if `key` has a value.
    pub fn contains(&self, key: &str) -> bool {
        self.0.contains_key(key)
    }

    /// Number of keys with a value.
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Returns `true` when no key has a value.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Iterates the keys in sorted order.
    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.0.keys().map(String::as_str)
    }

    /// Project name under either its v3 (`project_name`) or v2
    /// (`tenant_name`) key, preferring the v3 one.
    pub fn project_name(&self) -> Option<&str> {
        self.get(keys::PROJECT_NAME)
            .or_else(|| self.get(keys::TENANT_NAME))
    }

    /// A copy of the set safe to log or print: secret values are replaced.
    pub fn redacted(&self) -> BTreeMap<String, String> {
        self.0
            .iter()
            .map(|(k, v)| {
                let shown = if SECRET_KEYS.contains(&k.as_str()) {
                    REDACTED.to_owned()
                } else {
                    v.clone()
                };
                (k.clone(), shown)
            })
            .collect()
    }
}

impl std::fmt::Debug for CredentialSet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_map().entries(self.redacted()).finish()
    }
}

// ---------------------------------------------------------------------------
// Overrides
// ---------------------------------------------------------------------------

/// Caller-supplied credentials.
///
/// Entries may be present with no value; such an entry still counts towards
/// "overrides were supplied" but is dropped from the resolved set.
#[derive(Clone, Default)]
pub struct CredentialOverrides(BTreeMap<String, Option<String>>);

impl CredentialOverrides {
    /// No overrides.
    pub fn none() -> Self {
        Self::default()
    }

    /// Sets `key` to `value`.
    #[must_use]
    pub fn with(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.0.insert(key.into(), Some(value.into()));
        self
    }

    /// Records `key` with no value.
    #[must_use]
    pub fn with_unset(mut self, key: impl Into<String>) -> Self {
        self.0.insert(key.into(), None);
        self
    }

    /// Returns `true` when no entries were supplied at all.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl<K: Into<String>> FromIterator<(K, Option<String>)> for CredentialOverrides {
    fn from_iter<I: IntoIterator<Item = (K, Option<String>)>>(iter: I) -> Self {
        Self(iter.into_iter().map(|(k, v)| (k.into(), v)).collect())
    }
}

impl std::fmt::Debug for CredentialOverrides {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_map()
            .entries(self.0.iter().map(|(k, v)| {
                let shown = match v {
                    Some(_) if SECRET_KEYS.contains(&k.as_str()) => Some(REDACTED),
                    other => other.as_deref(),
                };
                (k, shown)
            }))
            .finish()
    }
}

// ---------------------------------------------------------------------------
// Environment port
// ---------------------------------------------------------------------------

/// Read-only key/value view of the process environment.
pub trait Environment: Send + Sync {
    /// Returns the value of `key`, or `None` when it is unset or not valid
    /// Unicode.
    fn var(&self, key: &str) -> Option<String>;
}

/// The real process environment.
#[derive(Debug, Clone, Copy, Default)]
pub struct ProcessEnvironment;

impl Environment for ProcessEnvironment {
    fn var(&self, key: &str) -> Option<String> {
        std::env::var(key).ok()
    }
}

impl Environment for HashMap<String, String> {
    fn var(&self, key: &str) -> Option<String> {
        self.get(key).cloned()
    }
}

// ---------------------------------------------------------------------------
// Resolver
// ---------------------------------------------------------------------------

/// Chooses the effective credentials from overrides, environment or config.
#[derive(Clone)]
pub struct CredentialResolver {
    config: Arc<dyn ConfigStore>,
    environment: Arc<dyn Environment>,
}

impl CredentialResolver {
    /// Creates a resolver over the given configuration and environment.
    pub fn new(config: Arc<dyn ConfigStore>, environment: Arc<dyn Environment>) -> Self {
        Self {
            config,
            environment,
        }
    }

    /// Resolves the effective credentials.
    ///
    /// Never fails: a set with no keys is a valid result, and it is the
    /// authenticator's job to reject it.
    pub fn resolve(
        &self,
        version: ProtocolVersion,
        read_from_environment: bool,
        overrides: &CredentialOverrides,
    ) -> CredentialSet {
        let creds = if !overrides.is_empty() {
            CredentialSet(
                overrides
                    .0
                    .iter()
                    .filter_map(|(k, v)| v.clone().map(|v| (k.clone(), v)))
                    .collect(),
            )
        } else if read_from_environment {
            info!("Reading credentials from environment variables");
            CredentialSet(
                ENVIRONMENT_VARIABLES
                    .iter()
                    .filter_map(|(var, key)| {
                        self.environment.var(var).map(|v| ((*key).to_owned(), v))
                    })
                    .collect(),
            )
        } else {
            self.from_config(version)
        };

        debug!(version = %version, credentials = ?creds, "Resolved identity credentials");
        creds
    }

    fn from_config(&self, version: ProtocolVersion) -> CredentialSet {
        let document = self.config.dump_config();
        let Some(section) = lookup(&document, version.section()) else {
            debug!(section = version.section(), "No credential section in configuration");
            return CredentialSet::default();
        };

        CredentialSet(
            section
                .iter()
                .filter_map(|(k, v)| scalar_to_string(k, v).map(|v| (k.clone(), v)))
                .collect(),
        )
    }
}

impl std::fmt::Debug for CredentialResolver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CredentialResolver").finish_non_exhaustive()
    }
}

/// Converts a configuration value to its credential form. Nulls are dropped;
/// nested values cannot be credentials and are dropped too.
fn scalar_to_string(key: &str, value: &Value) -> Option<String> {
    match value {
        Value::Null => None,
        Value::String(s) => Some(s.clone()),
        Value::Bool(b) => Some(b.to_string()),
        Value::Number(n) => Some(n.to_string()),
        Value::Array(_) | Value::Object(_) => {
            debug!(key, "Ignoring non-scalar credential value");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::StaticConfigStore;
    use serde_json::json;

    fn alice_config() -> Arc<dyn ConfigStore> {
        Arc::new(StaticConfigStore::new(json!({
            "v3": {
                "username": "alice",
                "auth_url": "http://id.example/v3",
                "project_name": "ops",
                "user_domain_name": "default",
                "project_domain_name": "default",
                "password": null
            },
            "v2": {"username": "legacy", "tenant_name": "ops"}
        })))
    }

    fn env(pairs: &[(&str, &str)]) -> Arc<dyn Environment> {
        Arc::new(
            pairs
                .iter()
                .map(|(k, v)| ((*k).to_owned(), (*v).to_owned()))
                .collect::<HashMap<String, String>>(),
        )
    }

    fn full_env() -> Arc<dyn Environment> {
        env(&[
            ("OS_USERNAME", "bob"),
            ("OS_PASSWORD", "hunter2"),
            ("OS_AUTH_URL", "http://env.example/v3"),
            ("OS_TENANT_NAME", "dev"),
        ])
    }

    #[test]
    fn config_section_is_used_when_nothing_else_applies() {
        let resolver = CredentialResolver::new(alice_config(), full_env());
        let creds = resolver.resolve(ProtocolVersion::V3, false, &CredentialOverrides::none());

        assert_eq!(
            creds,
            CredentialSet::from_pairs([
                ("username", "alice"),
                ("auth_url", "http://id.example/v3"),
                ("project_name", "ops"),
                ("user_domain_name", "default"),
                ("project_domain_name", "default"),
            ])
        );
        assert!(!creds.contains(keys::PASSWORD));
    }

    #[test]
    fn config_section_follows_the_protocol_version() {
        let resolver = CredentialResolver::new(alice_config(), full_env());
        let creds = resolver.resolve(ProtocolVersion::V2, false, &CredentialOverrides::none());
        assert_eq!(creds.get(keys::USERNAME), Some("legacy"));
        assert_eq!(creds.project_name(), Some("ops"));
    }

    #[test]
    fn environment_returns_only_present_variables() {
        let resolver = CredentialResolver::new(
            alice_config(),
            env(&[
                ("OS_USERNAME", "bob"),
                ("OS_AUTH_URL", "http://id.example/v3"),
            ]),
        );
        let creds = resolver.resolve(ProtocolVersion::V3, true, &CredentialOverrides::none());

        assert_eq!(
            creds,
            CredentialSet::from_pairs([
                ("username", "bob"),
                ("auth_url", "http://id.example/v3"),
            ])
        );
        assert!(!creds.contains(keys::PASSWORD));
        assert!(!creds.contains(keys::TENANT_NAME));
    }

    #[test]
    fn environment_wins_over_config_when_requested() {
        let resolver = CredentialResolver::new(alice_config(), full_env());
        let creds = resolver.resolve(ProtocolVersion::V3, true, &CredentialOverrides::none());
        assert_eq!(creds.get(keys::USERNAME), Some("bob"));
        assert_eq!(creds.get(keys::TENANT_NAME), Some("dev"));
        assert!(!creds.contains(keys::USER_DOMAIN_NAME));
    }

    #[test]
    fn overrides_win_and_drop_unset_keys() {
        let resolver = CredentialResolver::new(alice_config(), full_env());
        let overrides = CredentialOverrides::none()
            .with("username", "carol")
            .with("auth_url", "http://override.example/v3")
            .with_unset("password");

        for read_env in [true, false] {
            let creds = resolver.resolve(ProtocolVersion::V3, read_env, &overrides);
            assert_eq!(
                creds,
                CredentialSet::from_pairs([
                    ("username", "carol"),
                    ("auth_url", "http://override.example/v3"),
                ])
            );
        }
    }

    #[test]
    fn overrides_with_only_unset_keys_still_take_precedence() {
        let resolver = CredentialResolver::new(alice_config(), full_env());
        let overrides = CredentialOverrides::none().with_unset("username");
        let creds = resolver.resolve(ProtocolVersion::V3, true, &overrides);
        assert!(creds.is_empty());
    }

    #[test]
    fn missing_section_resolves_to_empty_set() {
        let resolver =
            CredentialResolver::new(Arc::new(StaticConfigStore::empty()), env(&[]));
        let creds = resolver.resolve(ProtocolVersion::V3, false, &CredentialOverrides::none());
        assert!(creds.is_empty());
    }

    #[test]
    fn non_string_scalars_are_stringified_and_nested_values_dropped() {
        let store = StaticConfigStore::new(json!({
            "v3": {"username": "alice", "insecure": true, "port": 5000, "extra": {"a": 1}}
        }));
        let resolver = CredentialResolver::new(Arc::new(store), env(&[]));
        let creds = resolver.resolve(ProtocolVersion::V3, false, &CredentialOverrides::none());
        assert_eq!(creds.get("insecure"), Some("true"));
        assert_eq!(creds.get("port"), Some("5000"));
        assert!(!creds.contains("extra"));
    }

    #[test]
    fn resolve_is_idempotent() {
        let resolver = CredentialResolver::new(alice_config(), full_env());
        for read_env in [true, false] {
            let none = CredentialOverrides::none();
            let first = resolver.resolve(ProtocolVersion::V3, read_env, &none);
            let second = resolver.resolve(ProtocolVersion::V3, read_env, &none);
            assert_eq!(first, second);
        }
    }

    #[test]
    fn passwords_are_redacted_in_diagnostics() {
        let creds = CredentialSet::from_pairs([("username", "bob"), ("password", "hunter2")]);
        let printed = format!("{creds:?}");
        assert!(printed.contains("bob"));
        assert!(!printed.contains("hunter2"));
        assert_eq!(creds.redacted()["password"], "<redacted>");

        let overrides = CredentialOverrides::none().with("password", "hunter2");
        assert!(!format!("{overrides:?}").contains("hunter2"));
    }
}
