//! Service catalog returned by the identity provider.
//!
//! The catalog is the source of truth for every endpoint lookup made after
//! authentication. Lookups are not cached: each client construction asks the
//! session's catalog again.

use serde::{Deserialize, Serialize};

use crate::{FacadeError, Interface, ServiceType};

/// One published endpoint of a catalog service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CatalogEndpoint {
    /// Which network the endpoint is reachable from.
    pub interface: Interface,
    /// Endpoint base URL.
    pub url: String,
    /// Region the endpoint belongs to, when the provider reports one.
    pub region: Option<String>,
}

/// A service and all of its published endpoints.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CatalogEntry {
    /// Catalog service type (e.g. `"block-storage"`).
    pub service_type: String,
    /// Deployment-specific service name (e.g. `"cinderv3"`).
    pub name: Option<String>,
    /// Published endpoints.
    pub endpoints: Vec<CatalogEndpoint>,
}

/// A resolved `(service_type, interface) → URL` relation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceEndpoint {
    /// Service type the URL was derived for.
    pub service_type: ServiceType,
    /// Interface the URL was derived for.
    pub interface: Interface,
    /// Endpoint base URL.
    pub url: String,
}

/// Directory mapping service type and interface to a reachable URL.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceCatalog {
    entries: Vec<CatalogEntry>,
}

impl ServiceCatalog {
    /// Creates a catalog from provider entries.
    pub fn new(entries: Vec<CatalogEntry>) -> Self {
        Self { entries }
    }

    /// Builds a catalog where each service has a single public endpoint.
    pub fn from_public_urls<'a>(urls: impl IntoIterator<Item = (&'a str, &'a str)>) -> Self {
        Self::new(
            urls.into_iter()
                .map(|(service_type, url)| CatalogEntry {
                    service_type: service_type.to_owned(),
                    name: None,
                    endpoints: vec![CatalogEndpoint {
                        interface: Interface::Public,
                        url: url.to_owned(),
                        region: None,
                    }],
                })
                .collect(),
        )
    }

    /// All catalog entries, in provider order.
    pub fn entries(&self) -> &[CatalogEntry] {
        &self.entries
    }

    /// Returns `true` if the catalog lists `service_type` at all.
    pub fn contains(&self, service_type: &ServiceType) -> bool {
        self.entry(service_type).is_some()
    }

    /// Returns the URL published for `service_type` on `interface`.
    ///
    /// When a service publishes several endpoints on the same interface (one
    /// per region), the first one listed is used.
    ///
    /// # Errors
    ///
    /// Returns [`FacadeError::EndpointNotFound`] when the service type is not
    /// in the catalog or has no endpoint on the interface.
    pub fn url_for(
        &self,
        service_type: &ServiceType,
        interface: Interface,
    ) -> Result<ServiceEndpoint, FacadeError> {
        let not_found = |reason: &str| FacadeError::EndpointNotFound {
            service_type: service_type.clone(),
            interface,
            reason: reason.to_owned(),
        };

        let entry = self
            .entry(service_type)
            .ok_or_else(|| not_found("service type is not in the catalog"))?;

        let endpoint = entry
            .endpoints
            .iter()
            .find(|e| e.interface == interface)
            .ok_or_else(|| not_found("service publishes no endpoint on this interface"))?;

        Ok(ServiceEndpoint {
            service_type: service_type.clone(),
            interface,
            url: endpoint.url.clone(),
        })
    }

    fn entry(&self, service_type: &ServiceType) -> Option<&CatalogEntry> {
        self.entries
            .iter()
            .find(|e| e.service_type == service_type.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn block_storage() -> ServiceType {
        ServiceType::new("block-storage").unwrap()
    }

    #[test]
    fn url_for_returns_matching_interface() {
        let catalog = ServiceCatalog::new(vec![CatalogEntry {
            service_type: "block-storage".into(),
            name: Some("cinderv3".into()),
            endpoints: vec![
                CatalogEndpoint {
                    interface: Interface::Internal,
                    url: "http://10.0.0.5:8776/v3".into(),
                    region: Some("RegionOne".into()),
                },
                CatalogEndpoint {
                    interface: Interface::Public,
                    url: "http://cinder.example/v3".into(),
                    region: Some("RegionOne".into()),
                },
            ],
        }]);

        let public = catalog.url_for(&block_storage(), Interface::Public).unwrap();
        assert_eq!(public.url, "http://cinder.example/v3");
        let internal = catalog.url_for(&block_storage(), Interface::Internal).unwrap();
        assert_eq!(internal.url, "http://10.0.0.5:8776/v3");
    }

    #[test]
    fn missing_service_type_is_endpoint_not_found() {
        let catalog =
            ServiceCatalog::from_public_urls([("block-storage", "http://cinder.example")]);
        let orchestration = ServiceType::new("orchestration").unwrap();

        assert!(!catalog.contains(&orchestration));
        assert!(matches!(
            catalog.url_for(&orchestration, Interface::Public),
            Err(FacadeError::EndpointNotFound { .. })
        ));
    }

    #[test]
    fn missing_interface_is_endpoint_not_found() {
        let catalog =
            ServiceCatalog::from_public_urls([("block-storage", "http://cinder.example")]);
        let err = catalog
            .url_for(&block_storage(), Interface::Admin)
            .unwrap_err();
        match err {
            FacadeError::EndpointNotFound { interface, .. } => {
                assert_eq!(interface, Interface::Admin)
            }
            other => panic!("unexpected error: {other}"),
        }
    }
}
