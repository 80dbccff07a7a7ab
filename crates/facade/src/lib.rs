//! Core domain for Nimbus, a thin façade over an OpenStack-style cloud.
//!
//! This crate turns credentials into an authenticated session and turns a
//! session into ready-to-use service clients, with capability extensions and
//! per-platform tracker modules attached by name. Infrastructure crates
//! implement the ports defined here (identity, service SDK); they never add
//! domain rules.
//!
//! ## Architectural Layer
//!
//! **Business logic + port definitions.** This crate has no network
//! dependencies. It defines *what* is needed; the `keystone` and `service-sdk`
//! crates define *how* to supply it.
//!
//! ## Module Layout
//!
//! | Module | Contents |
//! |--------|----------|
//! | [`identifiers`] | Newtype identifiers (`ServiceName`, `PlatformName`, `SessionId`, etc.) |
//! | [`types`] | Shared value types (`ProtocolVersion`, `ApiVersion`, `AuthToken`, ...) |
//! | [`errors`] | `FacadeError` and `RetryPolicy` |
//! | [`config`] | `ConfigStore` port and `FacadeConfig` |
//! | [`credentials`] | `CredentialResolver` and the credential/override sets |
//! | [`catalog`] | The service catalog returned with a token |
//! | [`session`] | `IdentityProvider` port, `AuthSession`, `AuthSessionFactory` |
//! | [`client`] | `ServiceSdk` port, `ServiceDescriptor`, `ServiceClientFactory` |
//! | [`extensions`] | `ExtensionRegistry`, `ExtensionLoader`, `ExtensionHandle` |
//! | [`trackers`] | `TrackerRegistry`, `TrackerModuleLoader` |
//! | [`nimbus`] | The `Nimbus` entry point and its builder |

pub mod catalog;
pub mod client;
pub mod config;
pub mod credentials;
pub mod errors;
pub mod extensions;
pub mod identifiers;
pub mod nimbus;
pub mod session;
pub mod trackers;
pub mod types;

// Re-export everything at the crate root for ergonomic usage by downstream crates.
pub use catalog::{CatalogEndpoint, CatalogEntry, ServiceCatalog, ServiceEndpoint};
pub use client::{
    ConnectRequest, EndpointStrategy, SdkError, ServiceClient, ServiceClientFactory,
    ServiceDescriptor, ServiceSdk, ServiceSdkClient,
};
pub use config::{
    lookup, ClientRetryConfig, ConfigStore, FacadeConfig, StaticConfigStore, FACADE_SECTION,
};
pub use credentials::{
    CredentialOverrides, CredentialResolver, CredentialSet, Environment, ProcessEnvironment,
    ENVIRONMENT_VARIABLES,
};
pub use errors::{FacadeError, RetryPolicy};
pub use extensions::{
    Extension, ExtensionContext, ExtensionError, ExtensionFactory, ExtensionHandle,
    ExtensionLoader, ExtensionRegistry,
};
pub use identifiers::{
    ExtensionName, OperationName, PlatformName, ServiceName, ServiceType, SessionId,
};
pub use nimbus::{Nimbus, NimbusBuilder};
pub use session::{
    AuthGrant, AuthSession, AuthSessionFactory, IdentityClient, IdentityError, IdentityProvider,
    PasswordAuth, ProjectScope,
};
pub use trackers::{
    TrackerEvent, TrackerModule, TrackerModuleHandle, TrackerModuleLoader, TrackerRegistry,
};
pub use types::{ApiVersion, AuthToken, Interface, ProtocolVersion, Timestamp};
