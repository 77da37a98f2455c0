//! HTTP transport and the built-in senders
//!
//! Every replayed request carries an `Idempotency-Key` header set to the
//! row id, so a server that saw the request before the connection dropped
//! can recognise the retry.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::header::CONTENT_TYPE;
use reqwest::multipart::Form;
use reqwest::{Method, RequestBuilder, Url};
use serde_json::Value;
use tracing::debug;

use super::payload::{self, FormPart, PayloadShape};
use super::sender::{
    SendError, Sender, SenderRegistry, AUTO_SENDER, JSON_SENDER, METHOD_OVERRIDE_SENDER,
    MULTIPART_SENDER,
};
use crate::config::Config;
use crate::models::QueuedMutation;

pub const IDEMPOTENCY_HEADER: &str = "Idempotency-Key";
pub const METHOD_OVERRIDE_HEADER: &str = "X-HTTP-Method-Override";

/// Longest response body kept in an error message
const MAX_ERROR_BODY: usize = 512;

const PROBE_TIMEOUT: Duration = Duration::from_secs(5);

/// Shared HTTP client bound to the API base URL
#[derive(Clone)]
pub struct HttpTransport {
    http: reqwest::Client,
    base_url: Url,
    token: Option<String>,
}

impl HttpTransport {
    /// Create a transport for `base_url`
    ///
    /// Relative endpoints are resolved against the base, so a base of
    /// `https://host/api` and an endpoint of `beds/7` give
    /// `https://host/api/beds/7`. Endpoints starting with `/` replace the
    /// base path, and absolute URLs are used as is.
    pub fn new(base_url: &str) -> Result<Self> {
        Self::with_client(base_url, reqwest::Client::new())
    }

    pub fn with_client(base_url: &str, http: reqwest::Client) -> Result<Self> {
        let mut base_url = Url::parse(base_url).context("invalid API base URL")?;
        if !base_url.path().ends_with('/') {
            let path = format!("{}/", base_url.path());
            base_url.set_path(&path);
        }
        Ok(Self {
            http,
            base_url,
            token: None,
        })
    }

    /// Build a transport from `api_base_url`, `api_token` and
    /// `request_timeout_secs`
    pub fn from_config(config: &Config) -> Result<Self> {
        let base_url = config
            .api_base_url
            .as_deref()
            .context("api_base_url is not configured (set MEDSYNC_API_URL)")?;

        let mut builder = reqwest::Client::builder();
        if let Some(secs) = config.request_timeout_secs {
            builder = builder.timeout(Duration::from_secs(secs));
        }
        let http = builder.build().context("failed to build HTTP client")?;

        let transport = Self::with_client(base_url, http)?;
        Ok(match &config.api_token {
            Some(token) => transport.with_token(token),
            None => transport,
        })
    }

    /// Attach a bearer token to every request
    pub fn with_token(mut self, token: impl Into<String>) -> Self {
        self.token = Some(token.into());
        self
    }

    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    /// Resolve an endpoint under the base URL
    ///
    /// A leading `/` is relative to the base path, not the host root.
    /// Absolute URLs are used as given.
    fn url(&self, endpoint: &str) -> Result<Url, SendError> {
        self.base_url
            .join(endpoint.trim_start_matches('/'))
            .map_err(|e| SendError::Request(format!("bad endpoint '{}': {}", endpoint, e)))
    }

    fn request(&self, method: &str, endpoint: &str) -> Result<RequestBuilder, SendError> {
        let method = Method::from_bytes(method.as_bytes())
            .map_err(|_| SendError::Request(format!("invalid HTTP method '{}'", method)))?;
        let mut req = self.http.request(method, self.url(endpoint)?);
        if let Some(token) = &self.token {
            req = req.bearer_auth(token);
        }
        Ok(req)
    }

    async fn execute(&self, req: RequestBuilder) -> Result<(), SendError> {
        let response = req.send().await?;
        let status = response.status();
        if status.is_success() {
            return Ok(());
        }

        let body = response.text().await.unwrap_or_default();
        Err(SendError::Status {
            status: status.as_u16(),
            body: body.chars().take(MAX_ERROR_BODY).collect(),
        })
    }

    /// Send a JSON body (no body when `payload` is null)
    pub async fn send_json(
        &self,
        method: &str,
        endpoint: &str,
        payload: &Value,
    ) -> Result<(), SendError> {
        let req = self.request(method, endpoint)?;
        self.execute(json_body(req, payload)?).await
    }

    /// Send a live multipart form
    ///
    /// Forms holding in-memory file handles cannot be persisted, so callers
    /// try this first and only queue a tagged description when it fails.
    pub async fn send_form(&self, method: &str, endpoint: &str, form: Form) -> Result<(), SendError> {
        let req = self.request(method, endpoint)?;
        self.execute(req.multipart(form)).await
    }

    /// Replay a queued row
    ///
    /// `verb` is the method actually put on the wire; when it differs from
    /// the row's method the latter is passed in the override header.
    async fn replay(
        &self,
        verb: &str,
        row: &QueuedMutation,
        mode: BodyMode,
    ) -> Result<(), SendError> {
        let mut req = self
            .request(verb, &row.endpoint)?
            .header(IDEMPOTENCY_HEADER, row.id.as_str());
        if !verb.eq_ignore_ascii_case(&row.method) {
            req = req.header(METHOD_OVERRIDE_HEADER, row.method.as_str());
        }

        let req = match mode {
            BodyMode::Multipart => multipart_body(req, payload::to_parts(&row.payload)?)?,
            BodyMode::Classify => match payload::classify(&row.payload)? {
                PayloadShape::Json => json_body(req, &row.payload)?,
                shape => multipart_body(req, shape.into_parts().unwrap_or_default())?,
            },
        };

        debug!(id = %row.id, verb, endpoint = %row.endpoint, "replaying mutation");
        self.execute(req).await
    }

    /// Reachability check: any HTTP response means online
    pub async fn probe(&self) -> bool {
        self.http
            .get(self.base_url.clone())
            .timeout(PROBE_TIMEOUT)
            .send()
            .await
            .is_ok()
    }
}

fn json_body(req: RequestBuilder, payload: &Value) -> Result<RequestBuilder, SendError> {
    if payload.is_null() {
        return Ok(req);
    }
    let body = serde_json::to_vec(payload).map_err(|e| SendError::Payload(e.to_string()))?;
    Ok(req.header(CONTENT_TYPE, "application/json").body(body))
}

fn multipart_body(req: RequestBuilder, parts: Vec<FormPart>) -> Result<RequestBuilder, SendError> {
    Ok(req.multipart(payload::build_form(parts)?))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum BodyMode {
    /// Multipart for described payloads, JSON otherwise
    Classify,
    /// Always multipart, flattening plain objects
    Multipart,
}

/// Replays rows with their own verb
pub struct HttpSender {
    transport: Arc<HttpTransport>,
    mode: BodyMode,
}

impl HttpSender {
    /// Payload-classifying sender, registered as `auto` and `json`
    pub fn classifying(transport: Arc<HttpTransport>) -> Self {
        Self {
            transport,
            mode: BodyMode::Classify,
        }
    }

    /// Sender that always emits `multipart/form-data`
    pub fn multipart(transport: Arc<HttpTransport>) -> Self {
        Self {
            transport,
            mode: BodyMode::Multipart,
        }
    }
}

#[async_trait]
impl Sender for HttpSender {
    async fn dispatch(&self, row: &QueuedMutation) -> Result<(), SendError> {
        self.transport.replay(&row.method, row, self.mode).await
    }
}

/// Sends every row as POST with the real verb in `X-HTTP-Method-Override`
pub struct MethodOverrideSender {
    transport: Arc<HttpTransport>,
}

impl MethodOverrideSender {
    pub fn new(transport: Arc<HttpTransport>) -> Self {
        Self { transport }
    }
}

#[async_trait]
impl Sender for MethodOverrideSender {
    async fn dispatch(&self, row: &QueuedMutation) -> Result<(), SendError> {
        self.transport.replay("POST", row, BodyMode::Classify).await
    }
}

impl SenderRegistry {
    /// Registry with the built-in HTTP senders
    ///
    /// `auto` and `json` share one classifying sender; applications can
    /// replace either key independently.
    pub fn with_http_defaults(transport: Arc<HttpTransport>) -> Self {
        let classifying: Arc<dyn Sender> = Arc::new(HttpSender::classifying(transport.clone()));
        let mut registry = SenderRegistry::new();
        registry
            .register_shared(AUTO_SENDER, classifying.clone())
            .register_shared(JSON_SENDER, classifying)
            .register(MULTIPART_SENDER, HttpSender::multipart(transport.clone()))
            .register(METHOD_OVERRIDE_SENDER, MethodOverrideSender::new(transport));
        registry
    }
}
