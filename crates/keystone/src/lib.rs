//! Keystone identity adapter for Nimbus.
//!
//! Implements [`facade::IdentityProvider`] over the Keystone password token
//! API: `POST {auth_url}/auth/tokens` for v3 (token in the `X-Subject-Token`
//! header) and `POST {auth_url}/tokens` for v2.0 (token in the body).
//!
//! ## Architectural Layer
//!
//! **Infrastructure.** Translates between the façade's [`PasswordAuth`] /
//! [`AuthGrant`] and Keystone's JSON. No domain rules live here; in particular
//! the adapter never retries.

mod wire;

use std::time::Duration;

use async_trait::async_trait;
use facade::{
    AuthGrant, AuthToken, FacadeError, IdentityError, IdentityProvider, PasswordAuth,
    ProtocolVersion,
};
use reqwest::{Client, Response};
use tracing::{debug, info};

use crate::wire::{V2Request, V2Response, V3Request, V3Response};

/// Header carrying the issued token on v3.
pub const SUBJECT_TOKEN_HEADER: &str = "X-Subject-Token";

/// Identity provider speaking the Keystone v2.0 and v3 token APIs.
#[derive(Debug, Clone)]
pub struct KeystoneIdentity {
    client: Client,
    timeout: Duration,
}

impl KeystoneIdentity {
    /// Creates a provider whose requests time out after `timeout`.
    ///
    /// # Errors
    ///
    /// Returns [`FacadeError::Configuration`] when the HTTP client cannot be
    /// built (e.g. no TLS backend).
    pub fn new(timeout: Duration) -> Result<Self, FacadeError> {
        let client = Client::builder()
            .user_agent(concat!("nimbus/", env!("CARGO_PKG_VERSION")))
            .timeout(timeout)
            .build()
            .map_err(|e| FacadeError::configuration(format!("cannot build HTTP client: {e}")))?;
        Ok(Self { client, timeout })
    }

    /// Wraps an existing client. `timeout` is only used to report
    /// [`IdentityError::Timeout`].
    pub fn with_client(client: Client, timeout: Duration) -> Self {
        Self { client, timeout }
    }

    async fn authenticate_v3(&self, auth: &PasswordAuth) -> Result<AuthGrant, IdentityError> {
        let url = format!("{}/auth/tokens", auth.auth_url.trim_end_matches('/'));
        let response = self
            .client
            .post(&url)
            .json(&V3Request::from_auth(auth))
            .send()
            .await
            .map_err(|e| self.transport_error(e))?;
        let response = reject_on_error_status(response).await?;

        let token = response
            .headers()
            .get(SUBJECT_TOKEN_HEADER)
            .and_then(|value| value.to_str().ok())
            .map(AuthToken::new)
            .ok_or_else(|| IdentityError::InvalidResponse {
                message: format!("response has no {SUBJECT_TOKEN_HEADER} header"),
            })?;
        let body: V3Response = decode(response).await?;

        Ok(AuthGrant {
            token,
            project_id: body.token.project.map(|p| p.id),
            user_id: body.token.user.map(|u| u.id),
            expires_at: wire::parse_expiry(body.token.expires_at.as_deref()),
            catalog: wire::v3_catalog(body.token.catalog),
        })
    }

    async fn authenticate_v2(&self, auth: &PasswordAuth) -> Result<AuthGrant, IdentityError> {
        let url = format!("{}/tokens", auth.auth_url.trim_end_matches('/'));
        let response = self
            .client
            .post(&url)
            .json(&V2Request::from_auth(auth))
            .send()
            .await
            .map_err(|e| self.transport_error(e))?;
        let response = reject_on_error_status(response).await?;
        let body: V2Response = decode(response).await?;

        let access = body.access;
        Ok(AuthGrant {
            token: AuthToken::new(access.token.id),
            project_id: access.token.tenant.map(|t| t.id),
            user_id: access.user.map(|u| u.id),
            expires_at: wire::parse_expiry(access.token.expires.as_deref()),
            catalog: wire::v2_catalog(access.service_catalog),
        })
    }

    fn transport_error(&self, error: reqwest::Error) -> IdentityError {
        if error.is_timeout() {
            IdentityError::Timeout {
                after: self.timeout,
            }
        } else {
            IdentityError::Unreachable {
                message: error.to_string(),
            }
        }
    }
}

#[async_trait]
impl IdentityProvider for KeystoneIdentity {
    #[tracing::instrument(skip_all, fields(auth_url = %auth.auth_url, version = %auth.version))]
    async fn authenticate(&self, auth: &PasswordAuth) -> Result<AuthGrant, IdentityError> {
        debug!(username = %auth.username, "Requesting Keystone token");
        let grant = match auth.version {
            ProtocolVersion::V3 => self.authenticate_v3(auth).await?,
            ProtocolVersion::V2 => self.authenticate_v2(auth).await?,
        };
        info!(
            project_id = grant.project_id.as_deref().unwrap_or("-"),
            services = grant.catalog.entries().len(),
            "Keystone issued a token"
        );
        Ok(grant)
    }
}

async fn reject_on_error_status(response: Response) -> Result<Response, IdentityError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let message = response
        .text()
        .await
        .unwrap_or_default()
        .chars()
        .take(512)
        .collect::<String>();
    Err(IdentityError::Rejected {
        status: status.as_u16(),
        message: if message.is_empty() {
            status.canonical_reason().unwrap_or("error").to_owned()
        } else {
            message
        },
    })
}

async fn decode<T: serde::de::DeserializeOwned>(response: Response) -> Result<T, IdentityError> {
    response
        .json::<T>()
        .await
        .map_err(|e| IdentityError::InvalidResponse {
            message: e.to_string(),
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::extract::State;
    use axum::http::StatusCode as AxumStatus;
    use axum::response::IntoResponse;
    use axum::routing::post;
    use axum::{Json, Router};
    use facade::{
        AuthSessionFactory, CredentialOverrides, CredentialResolver, Interface, ServiceType,
        StaticConfigStore,
    };
    use serde_json::{json, Value};
    use std::collections::HashMap;
    use std::sync::{Arc, Mutex};

    type Seen = Arc<Mutex<Vec<Value>>>;

    async fn v3_tokens(State(seen): State<Seen>, Json(body): Json<Value>) -> impl IntoResponse {
        seen.lock().unwrap().push(body);
        (
            AxumStatus::CREATED,
            [(SUBJECT_TOKEN_HEADER, "gAAAA-token")],
            Json(json!({
                "token": {
                    "expires_at": "2099-01-01T00:00:00.000000Z",
                    "project": { "id": "p-42", "name": "ops" },
                    "user": { "id": "u-1", "name": "alice" },
                    "catalog": [{
                        "type": "block-storage",
                        "name": "cinderv3",
                        "endpoints": [
                            {
                                "interface": "public",
                                "url": "http://cinder.example",
                                "region": "RegionOne"
                            },
                            {
                                "interface": "internal",
                                "url": "http://10.0.0.5:8776",
                                "region": "RegionOne"
                            }
                        ]
                    }]
                }
            })),
        )
    }

    async fn v2_tokens(State(seen): State<Seen>, Json(body): Json<Value>) -> impl IntoResponse {
        seen.lock().unwrap().push(body);
        Json(json!({
            "access": {
                "token": {
                    "id": "v2-token",
                    "expires": "2099-01-01T00:00:00Z",
                    "tenant": { "id": "t-7" }
                },
                "user": { "id": "u-2" },
                "serviceCatalog": [{
                    "type": "orchestration",
                    "endpoints": [{ "publicURL": "http://heat.example/v1/t-7" }]
                }]
            }
        }))
    }

    async fn unauthorized() -> impl IntoResponse {
        (
            AxumStatus::UNAUTHORIZED,
            Json(json!({
                "error": {
                    "code": 401,
                    "message": "The request you have made requires authentication."
                }
            })),
        )
    }

    async fn missing_header() -> impl IntoResponse {
        (AxumStatus::CREATED, Json(json!({ "token": {} })))
    }

    async fn stalled() -> impl IntoResponse {
        tokio::time::sleep(Duration::from_secs(5)).await;
        AxumStatus::GATEWAY_TIMEOUT
    }

    /// Serves a mock Keystone on an ephemeral port and returns its base URL.
    async fn mock_keystone() -> (String, Seen) {
        let seen: Seen = Arc::default();
        let app = Router::new()
            .route("/v3/auth/tokens", post(v3_tokens))
            .route("/v2.0/tokens", post(v2_tokens))
            .route("/denied/auth/tokens", post(unauthorized))
            .route("/headerless/auth/tokens", post(missing_header))
            .route("/stalled/auth/tokens", post(stalled))
            .with_state(seen.clone());
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        (format!("http://{addr}"), seen)
    }

    fn keystone() -> KeystoneIdentity {
        KeystoneIdentity::new(Duration::from_secs(5)).unwrap()
    }

    #[tokio::test]
    async fn session_from_config_section() {
        let (base, seen) = mock_keystone().await;
        let store = Arc::new(StaticConfigStore::new(json!({
            "v3": {
                "username": "alice",
                "auth_url": format!("{base}/v3"),
                "project_name": "ops",
                "user_domain_name": "default",
                "project_domain_name": "default"
            }
        })));
        let factory = AuthSessionFactory::new(
            CredentialResolver::new(store, Arc::new(HashMap::<String, String>::new())),
            Arc::new(keystone()),
            Duration::from_secs(5),
        );

        let session = factory
            .create_session(ProtocolVersion::V3, false, &CredentialOverrides::none())
            .await
            .unwrap();

        let identity = session.identity();
        assert_eq!(identity.auth_token().expose(), "gAAAA-token");
        assert_eq!(identity.tenant_id(), Some("p-42"));
        assert_eq!(identity.user_id(), Some("u-1"));
        assert!(!session.is_expired());
        let storage = ServiceType::new("block-storage").unwrap();
        assert_eq!(
            identity.get_endpoint(&storage, Interface::Public).unwrap().url,
            "http://cinder.example"
        );
        assert_eq!(
            identity.get_endpoint(&storage, Interface::Internal).unwrap().url,
            "http://10.0.0.5:8776"
        );

        let seen = seen.lock().unwrap();
        let body = &seen[0];
        assert_eq!(body["auth"]["identity"]["password"]["user"]["name"], "alice");
        assert_eq!(body["auth"]["scope"]["project"]["name"], "ops");
    }

    #[tokio::test]
    async fn v2_token_is_read_from_the_body() {
        let (base, seen) = mock_keystone().await;
        let creds = facade::CredentialSet::from_pairs([
            ("username", "bob"),
            ("password", "pw"),
            ("tenant_name", "dev"),
            ("auth_url", &*format!("{base}/v2.0")),
        ]);
        let auth = PasswordAuth::from_credentials(ProtocolVersion::V2, &creds).unwrap();

        let grant = keystone().authenticate(&auth).await.unwrap();

        assert_eq!(grant.token.expose(), "v2-token");
        assert_eq!(grant.project_id.as_deref(), Some("t-7"));
        assert!(grant
            .catalog
            .contains(&ServiceType::new("orchestration").unwrap()));
        assert_eq!(seen.lock().unwrap()[0]["auth"]["tenantName"], "dev");
    }

    #[tokio::test]
    async fn rejected_credentials_map_to_rejected() {
        let (base, _) = mock_keystone().await;
        let creds = facade::CredentialSet::from_pairs([
            ("username", "mallory"),
            ("user_domain_name", "default"),
            ("auth_url", &*format!("{base}/denied")),
        ]);
        let auth = PasswordAuth::from_credentials(ProtocolVersion::V3, &creds).unwrap();

        match keystone().authenticate(&auth).await {
            Err(IdentityError::Rejected { status, message }) => {
                assert_eq!(status, 401);
                assert!(message.contains("requires authentication"), "{message}");
            }
            other => panic!("unexpected outcome: {other:?}"),
        }
    }

    #[tokio::test]
    async fn missing_subject_token_is_invalid_response() {
        let (base, _) = mock_keystone().await;
        let creds = facade::CredentialSet::from_pairs([
            ("username", "alice"),
            ("user_domain_name", "default"),
            ("auth_url", &*format!("{base}/headerless")),
        ]);
        let auth = PasswordAuth::from_credentials(ProtocolVersion::V3, &creds).unwrap();

        assert!(matches!(
            keystone().authenticate(&auth).await,
            Err(IdentityError::InvalidResponse { .. })
        ));
    }

    #[tokio::test]
    async fn closed_port_is_unreachable() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let creds = facade::CredentialSet::from_pairs([
            ("username", "alice"),
            ("user_domain_name", "default"),
            ("auth_url", &*format!("http://{addr}/v3")),
        ]);
        let auth = PasswordAuth::from_credentials(ProtocolVersion::V3, &creds).unwrap();

        assert!(matches!(
            keystone().authenticate(&auth).await,
            Err(IdentityError::Unreachable { .. })
        ));
    }

    #[tokio::test]
    async fn slow_keystone_times_out() {
        let (base, _) = mock_keystone().await;
        let creds = facade::CredentialSet::from_pairs([
            ("username", "alice"),
            ("user_domain_name", "default"),
            ("auth_url", &*format!("{base}/stalled")),
        ]);
        let auth = PasswordAuth::from_credentials(ProtocolVersion::V3, &creds).unwrap();
        let keystone = KeystoneIdentity::new(Duration::from_millis(200)).unwrap();

        match keystone.authenticate(&auth).await {
            Err(IdentityError::Timeout { after }) => {
                assert_eq!(after, Duration::from_millis(200));
            }
            other => panic!("unexpected outcome: {other:?}"),
        }
    }
}
