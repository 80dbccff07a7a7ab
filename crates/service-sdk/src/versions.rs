//! The built-in `versions` extension.
//!
//! Lists the API versions a service publishes at its root URL. The root is
//! taken from the service's own catalog entry, not the client's endpoint:
//! tenant-path services are bound under the identity URL, which would answer
//! with the identity service's versions instead. Version documents are public,
//! so they are read without the session token.
//!
//! Registered for orchestration and block storage by [`register_builtin`].

use std::sync::Arc;

use async_trait::async_trait;
use facade::{
    Extension, ExtensionContext, ExtensionError, ExtensionName, ExtensionRegistry, OperationName,
    SdkError, ServiceDescriptor, ServiceSdkClient,
};
use serde_json::Value;

use crate::parse_endpoint;

/// Name the extension is registered under.
pub const EXTENSION_NAME: &str = "versions";

/// Returns every published version.
pub const LIST_VERSIONS: &str = "list_versions";

/// Returns the version whose status is `CURRENT`, or `null`.
pub const CURRENT_VERSION: &str = "current_version";

/// Version discovery against the service root.
#[derive(Debug)]
pub struct VersionsExtension {
    sdk: Arc<dyn ServiceSdkClient>,
    root: String,
}

impl VersionsExtension {
    /// Factory suitable for [`ExtensionRegistry::register`].
    ///
    /// # Errors
    ///
    /// [`ExtensionError::Activation`] when the session catalog does not list
    /// the service, or its catalog URL has no usable root.
    pub fn activate(context: &ExtensionContext) -> Result<Arc<dyn Extension>, ExtensionError> {
        let endpoint = context.catalog_endpoint.as_ref().ok_or_else(|| {
            ExtensionError::Activation {
                message: format!("'{}' has no catalog endpoint", context.service),
            }
        })?;
        let root = root_of(&endpoint.url).map_err(|e| ExtensionError::Activation {
            message: e.to_string(),
        })?;
        Ok(Arc::new(Self {
            sdk: Arc::clone(&context.sdk),
            root,
        }))
    }

    /// Root URL the versions are read from.
    pub fn root(&self) -> &str {
        &self.root
    }

    async fn versions(&self) -> Result<Vec<Value>, ExtensionError> {
        let body = self.sdk.get_public_json(&self.root).await?;
        // Services answer either {"versions": [...]} or {"versions": {"values": [...]}}.
        let versions = match body.get("versions") {
            Some(Value::Array(list)) => list.clone(),
            Some(Value::Object(wrapped)) => match wrapped.get("values") {
                Some(Value::Array(list)) => list.clone(),
                _ => Vec::new(),
            },
            _ => Vec::new(),
        };
        Ok(versions)
    }
}

#[async_trait]
impl Extension for VersionsExtension {
    fn name(&self) -> ExtensionName {
        ExtensionName::from_static(EXTENSION_NAME)
    }

    fn operations(&self) -> Vec<OperationName> {
        [LIST_VERSIONS, CURRENT_VERSION]
            .into_iter()
            .filter_map(OperationName::new)
            .collect()
    }

    async fn invoke(
        &self,
        operation: &OperationName,
        _args: Value,
    ) -> Result<Value, ExtensionError> {
        match operation.as_str() {
            LIST_VERSIONS => Ok(Value::Array(self.versions().await?)),
            CURRENT_VERSION => Ok(self
                .versions()
                .await?
                .into_iter()
                .find(|v| v.get("status").and_then(Value::as_str) == Some("CURRENT"))
                .unwrap_or(Value::Null)),
            other => Err(ExtensionError::UnknownOperation {
                operation: other.to_owned(),
            }),
        }
    }
}

/// `scheme://host[:port]/` of `endpoint`.
fn root_of(endpoint: &str) -> Result<String, SdkError> {
    let mut url = parse_endpoint(endpoint)?;
    url.set_path("/");
    url.set_query(None);
    Ok(url.to_string())
}

/// Registers the built-in extensions for the built-in services.
pub fn register_builtin(registry: &ExtensionRegistry) {
    for descriptor in [
        ServiceDescriptor::orchestration(),
        ServiceDescriptor::block_storage(),
    ] {
        registry.register(
            descriptor.name,
            ExtensionName::from_static(EXTENSION_NAME),
            VersionsExtension::activate,
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tests::{connect, endpoint, mock_service};
    use crate::HttpServiceSdk;
    use axum::routing::get;
    use axum::{Json, Router};
    use facade::{
        ApiVersion, AuthGrant, AuthSession, AuthToken, CredentialSet, ExtensionLoader,
        ProtocolVersion, ServiceCatalog, ServiceClientFactory, ServiceName,
    };
    use serde_json::json;
    use std::time::Duration;

    fn loader() -> ExtensionLoader {
        let registry = Arc::new(ExtensionRegistry::new());
        register_builtin(&registry);
        ExtensionLoader::new(registry)
    }

    /// Serves `{"versions": [{"id": current, "status": "CURRENT"}]}` at `/`.
    async fn version_root(current: &'static str) -> String {
        let app = Router::new().route(
            "/",
            get(move || async move {
                Json(json!({ "versions": [{ "id": current, "status": "CURRENT" }] }))
            }),
        );
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        format!("http://{addr}")
    }

    #[tokio::test]
    async fn lists_versions_from_the_service_root() {
        let base = mock_service().await;
        let sdk = HttpServiceSdk::new(Duration::from_secs(5), false).unwrap();
        let url = format!("{base}/v3/p-42");
        let client = connect(&sdk, &url).await.unwrap();

        let handle = loader().activate(
            &ServiceName::new("block-storage").unwrap(),
            &client,
            Some(&endpoint(&url)),
        );

        let all = handle.invoke(LIST_VERSIONS, Value::Null).await.unwrap();
        assert_eq!(all.as_array().unwrap().len(), 2);

        let current = handle.invoke(CURRENT_VERSION, Value::Null).await.unwrap();
        assert_eq!(current["id"], "v3.0");
    }

    #[tokio::test]
    async fn orchestration_versions_come_from_the_catalog_host() {
        let identity = version_root("identity-v3").await;
        let heat = version_root("heat-v1.0").await;
        let heat_url = format!("{heat}/v1/p-42");
        let session = Arc::new(AuthSession::new(
            ProtocolVersion::V3,
            CredentialSet::default(),
            format!("{identity}/v3"),
            AuthGrant {
                token: AuthToken::new("tok-123"),
                project_id: Some("p-42".into()),
                user_id: None,
                expires_at: None,
                catalog: ServiceCatalog::from_public_urls([(
                    "orchestration",
                    heat_url.as_str(),
                )]),
            },
        ));
        let sdk = HttpServiceSdk::new(Duration::from_secs(5), false).unwrap();
        let factory =
            ServiceClientFactory::new(ServiceDescriptor::orchestration(), Arc::new(sdk), loader());

        let client = factory
            .create_client(&session, ApiVersion::new(1, 0))
            .await
            .unwrap();
        assert_eq!(client.endpoint().url, format!("{identity}/v3/p-42"));

        let current = client
            .invoke_extension(CURRENT_VERSION, Value::Null)
            .await
            .unwrap();
        assert_eq!(current["id"], "heat-v1.0");
    }

    #[tokio::test]
    async fn unlisted_service_does_not_activate() {
        let sdk = HttpServiceSdk::new(Duration::from_secs(5), false).unwrap();
        let client = connect(&sdk, "http://cinder.example/v3/p-42").await.unwrap();

        let service = ServiceName::new("block-storage").unwrap();
        let handle = loader().activate(&service, &client, None);
        assert!(handle.is_empty());
    }

    #[test]
    fn registered_for_both_builtin_services() {
        let registry = ExtensionRegistry::new();
        register_builtin(&registry);
        for service in ["orchestration", "block-storage"] {
            assert_eq!(
                registry.registered(&ServiceName::new(service).unwrap()),
                vec![ExtensionName::new(EXTENSION_NAME).unwrap()]
            );
        }
    }

    #[test]
    fn root_drops_path_and_query() {
        assert_eq!(
            root_of("http://heat.example:8004/v1/p-42?x=1").unwrap(),
            "http://heat.example:8004/"
        );
        assert!(root_of("heat").is_err());
    }
}
