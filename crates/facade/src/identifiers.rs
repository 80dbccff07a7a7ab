//! Newtype domain identifiers.
//!
//! Every name the façade keys a lookup by is a distinct newtype wrapping a
//! `String`. This prevents accidentally passing, for example, a
//! [`PlatformName`] where a [`ServiceName`] is expected, even though both are
//! plain strings under the hood.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

// ---------------------------------------------------------------------------
// Macro for String-wrapped newtypes.
// Generates: struct, new() returning Option<Self>, as_str(), Display, and
// Borrow<str> so maps keyed by the id can be queried with a plain &str.
// ---------------------------------------------------------------------------
macro_rules! string_id {
    (
        $(#[$attr:meta])*
        $name:ident
    ) => {
        $(#[$attr])*
        #[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        pub struct $name(String);

        impl $name {
            /// Creates a new identifier, returning `None` if the value is empty.
            pub fn new(value: impl Into<String>) -> Option<Self> {
                let v = value.into();
                if v.is_empty() { None } else { Some(Self(v)) }
            }

            /// Returns the identifier as a string slice.
            pub fn as_str(&self) -> &str {
                &self.0
            }

            /// Creates an identifier from a literal known to be non-empty.
            pub fn from_static(value: &'static str) -> Self {
                debug_assert!(!value.is_empty(), "identifiers must not be empty");
                Self(value.to_owned())
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl std::borrow::Borrow<str> for $name {
            fn borrow(&self) -> &str {
                &self.0
            }
        }
    };
}

// ---------------------------------------------------------------------------
// String-backed identifiers
// ---------------------------------------------------------------------------

string_id! {
    /// Identifies a target service by the name extensions are registered under
    /// (e.g. `"orchestration"`, `"block-storage"`).
    ServiceName
}

string_id! {
    /// A service type as published in the identity provider's service catalog
    /// (e.g. `"orchestration"`, `"block-storage"`, `"identity"`).
    ServiceType
}

string_id! {
    /// Identifies a tracker module by the platform it integrates with
    /// (e.g. `"aws"`, `"openstack"`).
    PlatformName
}

string_id! {
    /// Identifies one capability extension within the set registered for a
    /// service.
    ExtensionName
}

string_id! {
    /// Names an operation exposed by an activated extension.
    OperationName
}

// ---------------------------------------------------------------------------
// UUID-backed identifiers (internally generated)
// ---------------------------------------------------------------------------

/// Identifies one authenticated session.
///
/// Generated fresh for every successful authentication; propagated through
/// spans so all clients derived from a session can be correlated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SessionId(Uuid);

impl SessionId {
    /// Generates a new random session identifier.
    pub fn new_random() -> Self {
        Self(Uuid::new_v4())
    }

    /// Returns the underlying [`Uuid`].
    pub fn as_uuid(self) -> Uuid {
        self.0
    }
}

impl std::fmt::Display for SessionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}
