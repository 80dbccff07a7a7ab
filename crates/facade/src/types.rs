//! Shared value types for the façade domain.
//!
//! Unlike the newtype identifiers in [`crate::identifiers`], these types carry
//! values with invariants (a protocol version is one of a closed set, a token
//! never prints its value) and participate in domain decisions.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::FacadeError;

// ---------------------------------------------------------------------------
// Versioning
// ---------------------------------------------------------------------------

/// Version of the identity protocol used to authenticate.
///
/// The version also names the configuration section credentials are read
/// from, so [`ProtocolVersion::section`] is the canonical section key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProtocolVersion {
    /// Identity API v2.0 (tenant-scoped, no domains).
    V2,
    /// Identity API v3 (domain-aware).
    V3,
}

impl ProtocolVersion {
    /// Parses a version string such as `"v3"`, `"/v3"`, `"v2.0"` or `"3"`.
    ///
    /// Returns `None` for anything else.
    pub fn parse(value: &str) -> Option<Self> {
        let v = value.trim().trim_start_matches('/');
        let v = v.strip_prefix('v').or_else(|| v.strip_prefix('V')).unwrap_or(v);
        match v {
            "2" | "2.0" => Some(Self::V2),
            "3" | "3.0" => Some(Self::V3),
            _ => None,
        }
    }

    /// Returns the configuration section name for this version (`"v2"` / `"v3"`).
    pub fn section(self) -> &'static str {
        match self {
            Self::V2 => "v2",
            Self::V3 => "v3",
        }
    }
}

impl std::str::FromStr for ProtocolVersion {
    type Err = FacadeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s).ok_or_else(|| {
            FacadeError::configuration(format!("unsupported identity protocol version '{s}'"))
        })
    }
}

impl std::fmt::Display for ProtocolVersion {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.section())
    }
}

// ---------------------------------------------------------------------------

/// Major/minor API version requested from a service SDK client
/// (e.g. block storage `3.0`, orchestration `1.0`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ApiVersion {
    /// Major version; selects the URL prefix on the service (`/v3`).
    pub major: u32,
    /// Minor version: the microversion, where the service supports one.
    pub minor: u32,
}

impl ApiVersion {
    /// Creates a new [`ApiVersion`].
    pub fn new(major: u32, minor: u32) -> Self {
        Self { major, minor }
    }

    /// Parses `"3"`, `"3.0"` or `"v3.59"`. Returns `None` on anything else.
    pub fn parse(value: &str) -> Option<Self> {
        let v = value.trim().trim_start_matches('v');
        let (major, minor) = match v.split_once('.') {
            Some((major, minor)) => (major, minor),
            None => (v, "0"),
        };
        Some(Self::new(major.parse().ok()?, minor.parse().ok()?))
    }
}

impl std::fmt::Display for ApiVersion {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}.{}", self.major, self.minor)
    }
}

// ---------------------------------------------------------------------------
// Endpoint interfaces
// ---------------------------------------------------------------------------

/// Which of a service's published endpoints to use.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Interface {
    /// Externally reachable endpoint.
    #[default]
    Public,
    /// Endpoint on the cloud's internal network.
    Internal,
    /// Administrative endpoint.
    Admin,
}

impl Interface {
    /// Returns the v3 catalog name of this interface.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Public => "public",
            Self::Internal => "internal",
            Self::Admin => "admin",
        }
    }

    /// Parses a v3 interface name (`"public"`) or a v2 endpoint key
    /// (`"publicURL"`).
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim_end_matches("URL").to_ascii_lowercase().as_str() {
            "public" => Some(Self::Public),
            "internal" => Some(Self::Internal),
            "admin" => Some(Self::Admin),
            _ => None,
        }
    }
}

impl std::fmt::Display for Interface {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// Tokens
// ---------------------------------------------------------------------------

/// An authentication token issued by the identity provider.
///
/// `Debug` and `Display` never reveal the token value; use
/// [`AuthToken::expose`] at the single point where it is placed on the wire.
#[derive(Clone, PartialEq, Eq)]
pub struct AuthToken(String);

impl AuthToken {
    /// Wraps a raw token value.
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    /// Returns the raw token value.
    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Debug for AuthToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("AuthToken(<redacted>)")
    }
}

impl std::fmt::Display for AuthToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("<redacted>")
    }
}

// ---------------------------------------------------------------------------
// Time
// ---------------------------------------------------------------------------

/// A UTC wall-clock timestamp.
///
/// Wraps [`chrono::DateTime<Utc>`] so callers never depend on `chrono` types
/// directly.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Timestamp(DateTime<Utc>);

impl Timestamp {
    /// Returns the current UTC time as a [`Timestamp`].
    pub fn now() -> Self {
        Self(Utc::now())
    }

    /// Creates a [`Timestamp`] from a [`DateTime<Utc>`].
    pub fn from_utc(dt: DateTime<Utc>) -> Self {
        Self(dt)
    }

    /// Returns the underlying [`DateTime<Utc>`].
    pub fn as_datetime(self) -> DateTime<Utc> {
        self.0
    }
}

impl std::fmt::Display for Timestamp {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0.to_rfc3339())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn protocol_version_accepts_common_spellings() {
        for v in ["v3", "/v3", "V3", "3", "v3.0"] {
            assert_eq!(ProtocolVersion::parse(v), Some(ProtocolVersion::V3), "{v}");
        }
        for v in ["v2", "/v2.0", "2.0"] {
            assert_eq!(ProtocolVersion::parse(v), Some(ProtocolVersion::V2), "{v}");
        }
        assert_eq!(ProtocolVersion::parse("v4"), None);
        assert_eq!(ProtocolVersion::parse(""), None);
        assert!(matches!(
            "v1".parse::<ProtocolVersion>(),
            Err(FacadeError::Configuration { .. })
        ));
    }

    #[test]
    fn api_version_parses_major_and_minor() {
        assert_eq!(ApiVersion::parse("3"), Some(ApiVersion::new(3, 0)));
        assert_eq!(ApiVersion::parse("v3.59"), Some(ApiVersion::new(3, 59)));
        assert_eq!(ApiVersion::parse("three"), None);
        assert_eq!(ApiVersion::new(1, 0).to_string(), "1.0");
    }

    #[test]
    fn interface_parses_v2_and_v3_names() {
        assert_eq!(Interface::parse("publicURL"), Some(Interface::Public));
        assert_eq!(Interface::parse("internal"), Some(Interface::Internal));
        assert_eq!(Interface::parse("adminURL"), Some(Interface::Admin));
        assert_eq!(Interface::parse("private"), None);
    }

    #[test]
    fn token_is_never_printed() {
        let token = AuthToken::new("gAAAAAB-secret");
        assert!(!format!("{token:?}").contains("secret"));
        assert!(!token.to_string().contains("secret"));
        assert_eq!(token.expose(), "gAAAAAB-secret");
    }
}
