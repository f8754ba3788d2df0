//! Session-aware MoSAPI client.
//!
//! Owns the login/logout lifecycle and exposes a uniform request API that
//! re-logs in at most once per outward request when the server reports an
//! expired session. Cookies live in the cluster-shared [`SessionCache`];
//! credentials are resolved lazily per entity through the [`Credentials`]
//! seam. Non-401 statuses are returned verbatim: interpreting them is the
//! facades' job.

use crate::error::{MosApiError, Result};
use crate::metrics_defs::SESSION_RELOGIN;
use crate::secrets::{self, CachedSecrets, SecretStore};
use crate::session::SessionCache;
use crate::transport::{RawResponse, Transport};
use async_trait::async_trait;
use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use http::header::{ACCEPT_ENCODING, AUTHORIZATION, CONTENT_TYPE, COOKIE, SET_COOKIE};
use http::{HeaderMap, HeaderValue, Method, StatusCode};
use metrics::counter;
use serde::Deserialize;
use std::sync::Arc;
use url::Url;

const LOGIN_PATH: &str = "/login";
const LOGOUT_PATH: &str = "/logout";
const CONTENT_TYPE_JSON: &str = "application/json";
const COOKIE_ID_PREFIX: &str = "id=";
const GZIP_ENCODINGS: &str = "gzip, deflate";

/// Position of the operator in the MoSAPI URL space.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub enum EntityType {
    #[serde(rename = "ry")]
    Registry,
    #[serde(rename = "rr")]
    Registrar,
}

impl EntityType {
    pub const fn as_str(&self) -> &'static str {
        match self {
            EntityType::Registry => "ry",
            EntityType::Registrar => "rr",
        }
    }
}

/// Per-entity credential lookup, typically resolving per-TLD secrets.
#[async_trait]
pub trait Credentials: Send + Sync {
    async fn username(&self, entity_id: &str) -> Result<String>;
    async fn password(&self, entity_id: &str) -> Result<String>;
}

/// Credentials resolved from the secret store under the conventional
/// `mosapi_username_<entity>` / `mosapi_password_<entity>` names, with a
/// short-TTL read-through cache in front.
pub struct SecretStoreCredentials {
    secrets: CachedSecrets,
}

impl SecretStoreCredentials {
    pub fn new(store: Arc<dyn SecretStore>) -> Self {
        SecretStoreCredentials {
            secrets: CachedSecrets::new(store),
        }
    }
}

#[async_trait]
impl Credentials for SecretStoreCredentials {
    async fn username(&self, entity_id: &str) -> Result<String> {
        self.secrets
            .get(&secrets::username_secret(entity_id))
            .await
            .map_err(|e| {
                MosApiError::other(format!("failed to resolve MoSAPI username for {entity_id}: {e}"))
            })
    }

    async fn password(&self, entity_id: &str) -> Result<String> {
        self.secrets
            .get(&secrets::password_secret(entity_id))
            .await
            .map_err(|e| {
                MosApiError::other(format!("failed to resolve MoSAPI password for {entity_id}: {e}"))
            })
    }
}

pub struct MosApiClient {
    transport: Transport,
    /// `<rootUrl>/<entityType>`, no trailing slash.
    base_url: String,
    session_cache: Arc<dyn SessionCache>,
    credentials: Arc<dyn Credentials>,
}

impl MosApiClient {
    pub fn new(
        transport: Transport,
        root_url: &str,
        entity_type: EntityType,
        session_cache: Arc<dyn SessionCache>,
        credentials: Arc<dyn Credentials>,
    ) -> Self {
        MosApiClient {
            transport,
            base_url: format!("{}/{}", root_url.trim_end_matches('/'), entity_type.as_str()),
            session_cache,
            credentials,
        }
    }

    /// Authenticates with MoSAPI and stores the session cookie in the shared
    /// cache. A 200 without a usable `Set-Cookie` header fails without
    /// mutating the cache.
    pub async fn login(&self, entity_id: &str) -> Result<()> {
        let url = self.build_url(entity_id, LOGIN_PATH, &[])?;
        let username = self.credentials.username(entity_id).await?;
        let password = self.credentials.password(entity_id).await?;
        let encoded = BASE64.encode(format!("{username}:{password}"));

        let mut headers = HeaderMap::new();
        headers.insert(AUTHORIZATION, header_value(&format!("Basic {encoded}"))?);

        let response = self
            .transport
            .execute(Method::POST, &url, &headers, None)
            .await?;

        match response.status {
            StatusCode::OK => {
                let set_cookie = response
                    .headers
                    .get(SET_COOKIE)
                    .and_then(|v| v.to_str().ok())
                    .ok_or_else(|| {
                        MosApiError::other(
                            "Login succeeded but server did not return a Set-Cookie header",
                        )
                    })?;
                let cookie = parse_cookie_value(set_cookie)?;
                self.session_cache
                    .put(entity_id, &cookie)
                    .await
                    .map_err(|e| MosApiError::other(e.to_string()))?;
                tracing::info!(entity_id, "MoSAPI login successful");
                Ok(())
            }
            StatusCode::UNAUTHORIZED => Err(MosApiError::InvalidCredentials(response.body)),
            StatusCode::FORBIDDEN => Err(MosApiError::IpNotAllowed(response.body)),
            StatusCode::TOO_MANY_REQUESTS => Err(MosApiError::RateLimited(response.body)),
            status => Err(MosApiError::other(format!(
                "Login failed with unexpected status code: {} - {}",
                status.as_u16(),
                response.body
            ))),
        }
    }

    /// Terminates the session. The cache entry is cleared on every exit path,
    /// including errors: a cookie we failed to invalidate server-side is
    /// still useless to keep.
    pub async fn logout(&self, entity_id: &str) -> Result<()> {
        let result = self.logout_request(entity_id).await;
        self.session_cache.clear(entity_id).await;
        tracing::info!(entity_id, "cleared session cache");
        result
    }

    async fn logout_request(&self, entity_id: &str) -> Result<()> {
        let url = self.build_url(entity_id, LOGOUT_PATH, &[])?;
        let mut headers = HeaderMap::new();
        if let Some(cookie) = self.session_cache.get(entity_id).await {
            headers.insert(COOKIE, header_value(&cookie)?);
        }

        let response = self
            .transport
            .execute(Method::POST, &url, &headers, None)
            .await?;

        match response.status {
            StatusCode::OK => {
                tracing::info!(entity_id, "logout successful");
                Ok(())
            }
            StatusCode::UNAUTHORIZED => {
                tracing::warn!(entity_id, body = %response.body, "logout returned 401 (session may have already expired)");
                Ok(())
            }
            StatusCode::FORBIDDEN => Err(MosApiError::IpNotAllowed(response.body)),
            status => Err(MosApiError::other(format!(
                "Logout failed with unexpected status code: {} - {}",
                status.as_u16(),
                response.body
            ))),
        }
    }

    /// GET with automatic session handling.
    pub async fn get(
        &self,
        entity_id: &str,
        path: &str,
        query: &[(&str, String)],
        headers: HeaderMap,
    ) -> Result<RawResponse> {
        let url = self.build_url(entity_id, path, query)?;
        self.execute_with_retry(entity_id, Method::GET, url, headers, None)
            .await
    }

    /// GET that advertises `Accept-Encoding: gzip, deflate`; the transport
    /// decompresses the body before it reaches the caller.
    pub async fn get_with_decompression(
        &self,
        entity_id: &str,
        path: &str,
        query: &[(&str, String)],
        mut headers: HeaderMap,
    ) -> Result<RawResponse> {
        headers.insert(ACCEPT_ENCODING, HeaderValue::from_static(GZIP_ENCODINGS));
        self.get(entity_id, path, query, headers).await
    }

    /// POST with automatic session handling. A non-empty body is sent as
    /// `application/json`.
    pub async fn post(
        &self,
        entity_id: &str,
        path: &str,
        body: Option<String>,
        mut headers: HeaderMap,
    ) -> Result<RawResponse> {
        let url = self.build_url(entity_id, path, &[])?;
        if body.as_deref().is_some_and(|b| !b.is_empty()) {
            headers.insert(CONTENT_TYPE, HeaderValue::from_static(CONTENT_TYPE_JSON));
        }
        self.execute_with_retry(entity_id, Method::POST, url, headers, body)
            .await
    }

    /// The retry protocol: try with the cached cookie, re-login once on 401
    /// (or on a cold cache), retry once, and translate a second 401 into
    /// [`MosApiError::Unauthorized`].
    async fn execute_with_retry(
        &self,
        entity_id: &str,
        method: Method,
        url: Url,
        headers: HeaderMap,
        body: Option<String>,
    ) -> Result<RawResponse> {
        if let Some(cookie) = self.session_cache.get(entity_id).await {
            let response = self
                .send_with_cookie(method.clone(), &url, &headers, body.clone(), &cookie)
                .await?;
            if response.status != StatusCode::UNAUTHORIZED {
                return Ok(response);
            }
            tracing::warn!(entity_id, "session expired; re-logging in");
            counter!(SESSION_RELOGIN.name).increment(1);
        } else {
            tracing::info!(entity_id, "no session cookie cached; logging in");
        }

        match self.login(entity_id).await {
            Ok(()) => {}
            Err(e @ MosApiError::RateLimited(_)) => {
                return Err(MosApiError::with_cause("Try running after some time", e));
            }
            Err(e) => {
                return Err(MosApiError::with_cause("Automatic re-login failed", e));
            }
        }

        // The cookie must be present now; its absence is a bug in the cache.
        let cookie = self.session_cache.get(entity_id).await.ok_or_else(|| {
            MosApiError::other("Login succeeded but failed to retrieve new session cookie")
        })?;

        let response = self
            .send_with_cookie(method, &url, &headers, body, &cookie)
            .await?;
        if response.status == StatusCode::UNAUTHORIZED {
            return Err(MosApiError::Unauthorized(
                "authentication failed even after re-login".into(),
            ));
        }
        Ok(response)
    }

    async fn send_with_cookie(
        &self,
        method: Method,
        url: &Url,
        headers: &HeaderMap,
        body: Option<String>,
        cookie: &str,
    ) -> Result<RawResponse> {
        let mut headers = headers.clone();
        headers.insert(COOKIE, header_value(cookie)?);
        Ok(self.transport.execute(method, url, &headers, body).await?)
    }

    /// `<base>/<entityId>/<path>?<query>`, with exactly one slash between the
    /// entity id and the path and percent-encoded query values.
    pub(crate) fn build_url(
        &self,
        entity_id: &str,
        path: &str,
        query: &[(&str, String)],
    ) -> Result<Url> {
        let sanitized = path.strip_prefix('/').unwrap_or(path);
        let mut url = Url::parse(&format!("{}/{entity_id}/{sanitized}", self.base_url))
            .map_err(|e| MosApiError::other(format!("invalid request URL: {e}")))?;
        if !query.is_empty() {
            url.query_pairs_mut()
                .extend_pairs(query.iter().map(|(k, v)| (*k, v.as_str())));
        }
        Ok(url)
    }
}

fn header_value(value: &str) -> Result<HeaderValue> {
    HeaderValue::from_str(value)
        .map_err(|e| MosApiError::other(format!("invalid header value: {e}")))
}

/// Picks the `id=...` fragment out of a `Set-Cookie` header.
fn parse_cookie_value(set_cookie: &str) -> Result<String> {
    set_cookie
        .split(';')
        .map(str::trim)
        .find(|fragment| fragment.starts_with(COOKIE_ID_PREFIX))
        .map(String::from)
        .ok_or_else(|| {
            MosApiError::other(format!(
                "Could not parse 'id' from Set-Cookie header: {set_cookie}"
            ))
        })
}
