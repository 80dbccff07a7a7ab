//! HTTP service SDK adapter for Nimbus.
//!
//! [`HttpServiceSdk`] implements [`facade::ServiceSdk`]: it validates the
//! endpoint handed over by the client factory, optionally probes it, and
//! returns an [`HttpServiceClient`] that attaches the session token to every
//! request on the bound endpoint's origin.
//!
//! ## Architectural Layer
//!
//! **Infrastructure.** One binding attempt per `connect` call; retries belong
//! to the façade's client factory.
//!
//! ## Module Layout
//!
//! | Module | Contents |
//! |--------|----------|
//! | [`versions`] | Built-in `versions` extension and its registration |

pub mod versions;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use facade::{
    ApiVersion, AuthToken, ConnectRequest, FacadeError, SdkError, ServiceSdk, ServiceSdkClient,
};
use reqwest::{Client, Url};
use serde_json::Value;
use tracing::{debug, info};

/// Header carrying the session token on service requests.
pub const AUTH_TOKEN_HEADER: &str = "X-Auth-Token";

/// Binds service clients over HTTP.
#[derive(Debug, Clone)]
pub struct HttpServiceSdk {
    http: Client,
    timeout: Duration,
    probe: bool,
}

impl HttpServiceSdk {
    /// Creates an SDK whose requests time out after `timeout`. With `probe`
    /// set, `connect` contacts the endpoint before returning a client.
    ///
    /// # Errors
    ///
    /// Returns [`FacadeError::Configuration`] when the HTTP client cannot be
    /// built.
    pub fn new(timeout: Duration, probe: bool) -> Result<Self, FacadeError> {
        let http = Client::builder()
            .user_agent(concat!("nimbus/", env!("CARGO_PKG_VERSION")))
            .timeout(timeout)
            .build()
            .map_err(|e| FacadeError::configuration(format!("cannot build HTTP client: {e}")))?;
        Ok(Self {
            http,
            timeout,
            probe,
        })
    }

    async fn probe(&self, base: &Url, token: &AuthToken) -> Result<(), SdkError> {
        // Any HTTP answer proves reachability; only transport failures count.
        let response = self
            .http
            .get(base.clone())
            .header(AUTH_TOKEN_HEADER, token.expose())
            .send()
            .await
            .map_err(|e| transport_error(e, self.timeout))?;
        debug!(status = response.status().as_u16(), "Endpoint probe answered");
        Ok(())
    }
}

#[async_trait]
impl ServiceSdk for HttpServiceSdk {
    #[tracing::instrument(
        skip_all,
        fields(service = %request.service, endpoint = %request.endpoint.url)
    )]
    async fn connect(
        &self,
        request: ConnectRequest<'_>,
    ) -> Result<Arc<dyn ServiceSdkClient>, SdkError> {
        let base = parse_endpoint(&request.endpoint.url)?;
        if self.probe {
            self.probe(&base, request.token).await?;
        }
        info!(api_version = %request.api_version, "Service client bound");
        Ok(Arc::new(HttpServiceClient {
            http: self.http.clone(),
            base,
            token: request.token.clone(),
            api_version: request.api_version,
            timeout: self.timeout,
        }))
    }
}

/// Validates an endpoint URL: absolute, `http` or `https`, with a host.
///
/// # Errors
///
/// Returns [`SdkError::MalformedEndpoint`] otherwise.
pub fn parse_endpoint(endpoint: &str) -> Result<Url, SdkError> {
    let url = Url::parse(endpoint).map_err(|e| SdkError::MalformedEndpoint {
        message: format!("'{endpoint}': {e}"),
    })?;
    if !matches!(url.scheme(), "http" | "https") {
        return Err(SdkError::MalformedEndpoint {
            message: format!("'{endpoint}': unsupported scheme '{}'", url.scheme()),
        });
    }
    if url.host_str().map_or(true, str::is_empty) {
        return Err(SdkError::MalformedEndpoint {
            message: format!("'{endpoint}': missing host"),
        });
    }
    Ok(url)
}

// ---------------------------------------------------------------------------
// Client
// ---------------------------------------------------------------------------

/// A service client bound to one endpoint and token.
#[derive(Clone)]
pub struct HttpServiceClient {
    http: Client,
    base: Url,
    token: AuthToken,
    api_version: ApiVersion,
    timeout: Duration,
}

impl HttpServiceClient {
    /// Resolves `path` against the base URL. Absolute URLs must stay on the
    /// base's origin since the token is attached to them.
    fn resolve(&self, path: &str) -> Result<Url, SdkError> {
        if path.starts_with("http://") || path.starts_with("https://") {
            let url = parse_endpoint(path)?;
            if url.origin() != self.base.origin() {
                return Err(SdkError::MalformedEndpoint {
                    message: format!(
                        "'{}' is outside the bound endpoint's origin",
                        url.origin().ascii_serialization()
                    ),
                });
            }
            return Ok(url);
        }
        let joined = format!(
            "{}/{}",
            self.base.as_str().trim_end_matches('/'),
            path.trim_start_matches('/')
        );
        parse_endpoint(&joined)
    }

    async fn fetch(&self, url: Url, token: Option<&AuthToken>) -> Result<Value, SdkError> {
        debug!(url = %url, authenticated = token.is_some(), "GET");
        let mut request = self.http.get(url);
        if let Some(token) = token {
            request = request.header(AUTH_TOKEN_HEADER, token.expose());
        }
        let response = request
            .send()
            .await
            .map_err(|e| transport_error(e, self.timeout))?;

        let status = response.status();
        if !status.is_success() {
            let message = response.text().await.unwrap_or_default();
            return Err(SdkError::Rejected {
                status: status.as_u16(),
                message: message.chars().take(512).collect(),
            });
        }
        response
            .json::<Value>()
            .await
            .map_err(|e| SdkError::InvalidResponse {
                message: e.to_string(),
            })
    }
}

#[async_trait]
impl ServiceSdkClient for HttpServiceClient {
    fn endpoint(&self) -> &str {
        self.base.as_str()
    }

    fn api_version(&self) -> ApiVersion {
        self.api_version
    }

    async fn get_json(&self, path: &str) -> Result<Value, SdkError> {
        let url = self.resolve(path)?;
        self.fetch(url, Some(&self.token)).await
    }

    async fn get_public_json(&self, url: &str) -> Result<Value, SdkError> {
        let url = parse_endpoint(url)?;
        self.fetch(url, None).await
    }
}

impl std::fmt::Debug for HttpServiceClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpServiceClient")
            .field("base", &self.base.as_str())
            .field("token", &self.token)
            .field("api_version", &self.api_version)
            .finish_non_exhaustive()
    }
}

fn transport_error(error: reqwest::Error, timeout: Duration) -> SdkError {
    if error.is_timeout() {
        SdkError::Timeout { after: timeout }
    } else {
        SdkError::Unreachable {
            message: error.to_string(),
        }
    }
}
