// Node command client
//
// Wraps `reqwest::Client` with node URL construction, session token
// injection and status-string error mapping. The command surface is split
// across sibling files as inherent impl blocks (auth, job, setup, system)
// so this module only carries transport mechanics.

mod auth;
mod job;
mod setup;
mod system;

use std::sync::Arc;

use arc_swap::ArcSwapOption;
use secrecy::{ExposeSecret, SecretString};
use serde::Serialize;
use serde::de::DeserializeOwned;
use tracing::{debug, trace};
use url::Url;

use crate::endpoint::NodeEndpoint;
use crate::error::Error;
use crate::transport::TransportConfig;

/// Longest body excerpt carried in an error status.
const BODY_PREVIEW_LEN: usize = 200;

/// Raw HTTP client for one verification node.
///
/// Every operation performs exactly one wire call and returns either the
/// decoded payload or an [`Error`] whose `Display` is the status string.
/// Nothing here retries or touches device state; that belongs to the
/// controller in `labelval-core`.
///
/// Cheap to clone: clones share the HTTP pool and the session token.
#[derive(Clone)]
pub struct NodeClient {
    http: reqwest::Client,
    endpoint: NodeEndpoint,
    node_base: Url,
    system_base: Url,
    /// Session token from the last successful login, sent as the
    /// `Authorization` header on every request.
    token: Arc<ArcSwapOption<SecretString>>,
}

impl NodeClient {
    /// Create a client from a `TransportConfig`.
    pub fn new(endpoint: NodeEndpoint, transport: &TransportConfig) -> Result<Self, Error> {
        let http = transport.build_client()?;
        Self::with_client(http, endpoint)
    }

    /// Create a client around a pre-built `reqwest::Client`.
    pub fn with_client(http: reqwest::Client, endpoint: NodeEndpoint) -> Result<Self, Error> {
        let node_base = endpoint.node_base()?;
        let system_base = endpoint.system_base()?;
        Ok(Self {
            http,
            endpoint,
            node_base,
            system_base,
            token: Arc::new(ArcSwapOption::empty()),
        })
    }

    pub fn endpoint(&self) -> &NodeEndpoint {
        &self.endpoint
    }

    /// The current session token, if logged in.
    pub fn token(&self) -> Option<SecretString> {
        self.token.load_full().map(|t| (*t).clone())
    }

    pub fn is_authenticated(&self) -> bool {
        self.token.load().is_some()
    }

    pub(crate) fn set_token(&self, token: Option<SecretString>) {
        self.token.store(token.map(Arc::new));
    }

    // ── URL builders ─────────────────────────────────────────────────

    /// `{node_base}/{path}`
    pub(crate) fn node_url(&self, path: &str) -> Result<Url, Error> {
        let base = self.node_base.as_str().trim_end_matches('/');
        Ok(Url::parse(&format!("{base}/{path}"))?)
    }

    /// `{system_base}/{path}`
    pub(crate) fn system_url(&self, path: &str) -> Result<Url, Error> {
        let base = self.system_base.as_str().trim_end_matches('/');
        Ok(Url::parse(&format!("{base}/{path}"))?)
    }

    // ── Request helpers ──────────────────────────────────────────────

    fn apply_token(&self, builder: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match self.token.load().as_deref() {
            Some(token) => builder.header("Authorization", token.expose_secret()),
            None => builder,
        }
    }

    /// GET and decode a JSON body.
    pub(crate) async fn get_json<T: DeserializeOwned>(&self, url: Url) -> Result<T, Error> {
        debug!("GET {}", url);
        let resp = self.apply_token(self.http.get(url)).send().await?;
        let body = Self::check(resp).await?.text().await?;
        Self::decode(&body)
    }

    /// GET a binary body (repeat images).
    pub(crate) async fn get_bytes(&self, url: Url) -> Result<bytes::Bytes, Error> {
        debug!("GET {}", url);
        let resp = self.apply_token(self.http.get(url)).send().await?;
        Ok(Self::check(resp).await?.bytes().await?)
    }

    /// PUT without a body; the response body is ignored.
    pub(crate) async fn put_empty(&self, url: Url) -> Result<(), Error> {
        debug!("PUT {}", url);
        let resp = self.apply_token(self.http.put(url)).send().await?;
        Self::check(resp).await?;
        Ok(())
    }

    /// PUT a JSON body; the response body is ignored.
    pub(crate) async fn put_json(
        &self,
        url: Url,
        body: &(impl Serialize + Sync),
    ) -> Result<(), Error> {
        debug!("PUT {}", url);
        let resp = self.apply_token(self.http.put(url).json(body)).send().await?;
        Self::check(resp).await?;
        Ok(())
    }

    /// PUT a raw JSON document that the caller already serialized.
    pub(crate) async fn put_raw_json(&self, url: Url, json: String) -> Result<(), Error> {
        debug!("PUT {}", url);
        let builder = self
            .http
            .put(url)
            .header(reqwest::header::CONTENT_TYPE, "application/json")
            .body(json);
        let resp = self.apply_token(builder).send().await?;
        Self::check(resp).await?;
        Ok(())
    }

    /// DELETE; the response body is ignored.
    pub(crate) async fn delete(&self, url: Url) -> Result<(), Error> {
        debug!("DELETE {}", url);
        let resp = self.apply_token(self.http.delete(url)).send().await?;
        Self::check(resp).await?;
        Ok(())
    }

    /// Map a non-success status into [`Error::Status`].
    async fn check(resp: reqwest::Response) -> Result<reqwest::Response, Error> {
        let status = resp.status();
        trace!(%status, "response");
        if status.is_success() {
            return Ok(resp);
        }
        let body = resp.text().await.unwrap_or_default();
        Err(Error::Status {
            code: status.as_u16(),
            reason: status.canonical_reason().unwrap_or("Unknown").to_owned(),
            body: preview(&body).to_owned(),
        })
    }

    /// Decode a body that must be a JSON object or array.
    pub(crate) fn decode<T: DeserializeOwned>(body: &str) -> Result<T, Error> {
        let trimmed = body.trim_start();
        if !(trimmed.starts_with('{') || trimmed.starts_with('[')) {
            return Err(Error::NotJson {
                preview: preview(body).to_owned(),
            });
        }
        serde_json::from_str(body).map_err(|e| Error::Deserialization {
            message: format!("{e} (body preview: {:?})", preview(body)),
            body: body.to_owned(),
        })
    }
}

impl std::fmt::Debug for NodeClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NodeClient")
            .field("endpoint", &self.endpoint)
            .field("authenticated", &self.is_authenticated())
            .finish_non_exhaustive()
    }
}

fn preview(body: &str) -> &str {
    match body.char_indices().nth(BODY_PREVIEW_LEN) {
        Some((idx, _)) => &body[..idx],
        None => body,
    }
}
