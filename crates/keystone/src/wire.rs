//! Request and response bodies of the Keystone password token API.
//!
//! Only the fields Nimbus reads are modelled; everything else in the response
//! is ignored.

use facade::{CatalogEndpoint, CatalogEntry, Interface, PasswordAuth, ServiceCatalog, Timestamp};
use serde::{Deserialize, Serialize};
use tracing::debug;

// ---------------------------------------------------------------------------
// v3
// ---------------------------------------------------------------------------

#[derive(Debug, Serialize)]
pub(crate) struct V3Request<'a> {
    auth: V3Auth<'a>,
}

#[derive(Debug, Serialize)]
struct V3Auth<'a> {
    identity: V3Identity<'a>,
    #[serde(skip_serializing_if = "Option::is_none")]
    scope: Option<V3Scope<'a>>,
}

#[derive(Debug, Serialize)]
struct V3Identity<'a> {
    methods: [&'static str; 1],
    password: V3Password<'a>,
}

#[derive(Debug, Serialize)]
struct V3Password<'a> {
    user: V3User<'a>,
}

#[derive(Debug, Serialize)]
struct V3User<'a> {
    name: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    domain: Option<Named<'a>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    password: Option<&'a str>,
}

#[derive(Debug, Serialize)]
struct V3Scope<'a> {
    project: V3Project<'a>,
}

#[derive(Debug, Serialize)]
struct V3Project<'a> {
    name: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    domain: Option<Named<'a>>,
}

#[derive(Debug, Serialize)]
struct Named<'a> {
    name: &'a str,
}

impl<'a> V3Request<'a> {
    pub(crate) fn from_auth(auth: &'a PasswordAuth) -> Self {
        Self {
            auth: V3Auth {
                identity: V3Identity {
                    methods: ["password"],
                    password: V3Password {
                        user: V3User {
                            name: &auth.username,
                            domain: auth.user_domain_name.as_deref().map(|name| Named { name }),
                            password: auth.password.as_deref(),
                        },
                    },
                },
                scope: auth.project.as_ref().map(|project| V3Scope {
                    project: V3Project {
                        name: &project.name,
                        domain: project.domain_name.as_deref().map(|name| Named { name }),
                    },
                }),
            },
        }
    }
}

#[derive(Debug, Deserialize)]
pub(crate) struct V3Response {
    pub(crate) token: V3Token,
}

#[derive(Debug, Deserialize)]
pub(crate) struct V3Token {
    pub(crate) expires_at: Option<String>,
    pub(crate) project: Option<IdOnly>,
    pub(crate) user: Option<IdOnly>,
    #[serde(default)]
    pub(crate) catalog: Vec<V3CatalogEntry>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct IdOnly {
    pub(crate) id: String,
}

#[derive(Debug, Deserialize)]
pub(crate) struct V3CatalogEntry {
    #[serde(rename = "type")]
    service_type: String,
    name: Option<String>,
    #[serde(default)]
    endpoints: Vec<V3Endpoint>,
}

#[derive(Debug, Deserialize)]
struct V3Endpoint {
    interface: String,
    url: String,
    region: Option<String>,
}

pub(crate) fn v3_catalog(entries: Vec<V3CatalogEntry>) -> ServiceCatalog {
    ServiceCatalog::new(
        entries
            .into_iter()
            .map(|entry| CatalogEntry {
                service_type: entry.service_type,
                name: entry.name,
                endpoints: entry
                    .endpoints
                    .into_iter()
                    .filter_map(|endpoint| {
                        let interface = Interface::parse(&endpoint.interface).or_else(|| {
                            debug!(
                                interface = %endpoint.interface,
                                "Ignoring endpoint with unknown interface"
                            );
                            None
                        })?;
                        Some(CatalogEndpoint {
                            interface,
                            url: endpoint.url,
                            region: endpoint.region,
                        })
                    })
                    .collect(),
            })
            .collect(),
    )
}

// ---------------------------------------------------------------------------
// v2.0
// ---------------------------------------------------------------------------

#[derive(Debug, Serialize)]
pub(crate) struct V2Request<'a> {
    auth: V2Auth<'a>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct V2Auth<'a> {
    password_credentials: V2PasswordCredentials<'a>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tenant_name: Option<&'a str>,
}

#[derive(Debug, Serialize)]
struct V2PasswordCredentials<'a> {
    username: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    password: Option<&'a str>,
}

impl<'a> V2Request<'a> {
    pub(crate) fn from_auth(auth: &'a PasswordAuth) -> Self {
        Self {
            auth: V2Auth {
                password_credentials: V2PasswordCredentials {
                    username: &auth.username,
                    password: auth.password.as_deref(),
                },
                tenant_name: auth.project.as_ref().map(|project| project.name.as_str()),
            },
        }
    }
}

#[derive(Debug, Deserialize)]
pub(crate) struct V2Response {
    pub(crate) access: V2Access,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct V2Access {
    pub(crate) token: V2Token,
    pub(crate) user: Option<IdOnly>,
    #[serde(default)]
    pub(crate) service_catalog: Vec<V2CatalogEntry>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct V2Token {
    pub(crate) id: String,
    pub(crate) expires: Option<String>,
    pub(crate) tenant: Option<IdOnly>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct V2CatalogEntry {
    #[serde(rename = "type")]
    service_type: String,
    name: Option<String>,
    #[serde(default)]
    endpoints: Vec<V2Endpoint>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct V2Endpoint {
    #[serde(rename = "publicURL")]
    public_url: Option<String>,
    #[serde(rename = "internalURL")]
    internal_url: Option<String>,
    #[serde(rename = "adminURL")]
    admin_url: Option<String>,
    region: Option<String>,
}

/// v2 lists one object per region with a URL per interface; flatten it to the
/// v3 shape of one endpoint per interface.
pub(crate) fn v2_catalog(entries: Vec<V2CatalogEntry>) -> ServiceCatalog {
    ServiceCatalog::new(
        entries
            .into_iter()
            .map(|entry| CatalogEntry {
                service_type: entry.service_type,
                name: entry.name,
                endpoints: entry
                    .endpoints
                    .into_iter()
                    .flat_map(|endpoint| {
                        let region = endpoint.region;
                        [
                            (Interface::Public, endpoint.public_url),
                            (Interface::Internal, endpoint.internal_url),
                            (Interface::Admin, endpoint.admin_url),
                        ]
                        .into_iter()
                        .filter_map(move |(interface, url)| {
                            Some(CatalogEndpoint {
                                interface,
                                url: url?,
                                region: region.clone(),
                            })
                        })
                    })
                    .collect(),
            })
            .collect(),
    )
}

/// Parses an RFC 3339 expiry. An unparseable value is treated as "no expiry
/// reported".
pub(crate) fn parse_expiry(value: Option<&str>) -> Option<Timestamp> {
    let value = value?;
    match chrono::DateTime::parse_from_rfc3339(value) {
        Ok(at) => Some(Timestamp::from_utc(at.with_timezone(&chrono::Utc))),
        Err(error) => {
            debug!(value, error = %error, "Ignoring unparseable token expiry");
            None
        }
    }
}
