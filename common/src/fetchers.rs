//! Management platform transport.
//!
//! Requests are described by a path template such as
//! `/platform/projects/{ref}/config/supavisor` plus [`PathParams`]. Every call
//! carries a [`CancellationToken`] so a superseded query can abort its request.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{header, Client, StatusCode};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::Value;
use thiserror::Error;
use tokio_util::sync::CancellationToken;

use crate::config::AppConfig;

/// What went wrong with a platform call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResponseErrorKind {
    /// The platform answered with a non-success status.
    Status,
    /// No response was received.
    Transport,
    /// The caller cancelled the request.
    Aborted,
    /// The request could not be built or its body could not be decoded.
    Invalid,
}

/// Error produced by the transport for a failed platform call.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{message}")]
pub struct ResponseError {
    /// Human-readable message.
    pub message: String,
    /// HTTP status code, when a response was received.
    pub code: Option<u16>,
    /// `x-request-id` reported by the platform.
    pub request_id: Option<String>,
    /// `retry-after` in seconds, when the platform asked to back off.
    pub retry_after: Option<u64>,
    pub kind: ResponseErrorKind,
}

impl ResponseError {
    /// Error for a non-success platform response.
    pub fn new(message: impl Into<String>, code: Option<u16>) -> Self {
        Self::with_kind(ResponseErrorKind::Status, message, code)
    }

    pub fn with_kind(kind: ResponseErrorKind, message: impl Into<String>, code: Option<u16>) -> Self {
        Self {
            message: message.into(),
            code,
            request_id: None,
            retry_after: None,
            kind,
        }
    }

    /// The platform could not be reached.
    pub fn transport(message: impl Into<String>) -> Self {
        Self::with_kind(ResponseErrorKind::Transport, message, None)
    }

    /// The request or its response was malformed.
    pub fn invalid(message: impl Into<String>, code: Option<u16>) -> Self {
        Self::with_kind(ResponseErrorKind::Invalid, message, code)
    }

    /// The request was cancelled before it completed.
    pub fn aborted() -> Self {
        Self::with_kind(ResponseErrorKind::Aborted, "The request was aborted", None)
    }

    pub fn is_aborted(&self) -> bool {
        self.kind == ResponseErrorKind::Aborted
    }
}

/// Named path parameters substituted into a path template.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PathParams(Vec<(String, String)>);

impl PathParams {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a parameter; a later value for the same name wins.
    pub fn path(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        let name = name.into();
        self.0.retain(|(existing, _)| *existing != name);
        self.0.push((name, value.into()));
        self
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.0
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, v)| v.as_str())
    }

    /// Substitutes every `{name}` placeholder with its percent-encoded value.
    ///
    /// Fails when the template references a parameter that was not supplied.
    pub fn render(&self, template: &str) -> Result<String, ResponseError> {
        let mut rendered = String::with_capacity(template.len());
        let mut rest = template;

        while let Some(open) = rest.find('{') {
            let close = rest[open..].find('}').map(|i| open + i).ok_or_else(|| {
                ResponseError::invalid(format!("Unterminated path parameter in {template}"), None)
            })?;
            let name = &rest[open + 1..close];
            let value = self.get(name).ok_or_else(|| {
                ResponseError::invalid(format!("Missing path parameter `{name}` for {template}"), None)
            })?;
            rendered.push_str(&rest[..open]);
            rendered.push_str(&urlencoding::encode(value));
            rest = &rest[close + 1..];
        }
        rendered.push_str(rest);
        Ok(rendered)
    }
}

/// GET capability against the management platform.
#[async_trait]
pub trait Fetcher: Send + Sync {
    /// Performs a GET and returns the decoded JSON body.
    async fn get(
        &self,
        path: &str,
        params: &PathParams,
        signal: &CancellationToken,
    ) -> Result<Value, ResponseError>;
}

/// Performs a GET and deserializes the body into `T`.
pub async fn get_json<T: DeserializeOwned>(
    fetcher: &dyn Fetcher,
    path: &str,
    params: &PathParams,
    signal: &CancellationToken,
) -> Result<T, ResponseError> {
    let body = fetcher.get(path, params, signal).await?;
    serde_json::from_value(body)
        .map_err(|e| ResponseError::invalid(format!("Invalid response body for {path}: {e}"), None))
}

/// reqwest-backed [`Fetcher`].
#[derive(Clone)]
pub struct HttpFetcher {
    client: Client,
    base_url: String,
    access_token: Option<String>,
}

impl HttpFetcher {
    /// Creates a fetcher with its own client.
    pub fn new(
        base_url: impl Into<String>,
        access_token: Option<String>,
        timeout: Duration,
    ) -> Result<Self, reqwest::Error> {
        let client = Client::builder().timeout(timeout).build()?;
        Ok(Self::with_client(client, base_url, access_token))
    }

    /// Creates a fetcher over an existing client.
    pub fn with_client(
        client: Client,
        base_url: impl Into<String>,
        access_token: Option<String>,
    ) -> Self {
        Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            access_token,
        }
    }

    /// Creates a fetcher from service configuration.
    pub fn from_config(config: &AppConfig) -> Result<Self, reqwest::Error> {
        Self::new(
            config.platform_api_url.clone(),
            config.platform_api_token.clone(),
            config.http_timeout(),
        )
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    async fn send(&self, url: &str) -> Result<Value, ResponseError> {
        let mut request = self
            .client
            .get(url)
            .header(header::ACCEPT, "application/json");
        if let Some(token) = &self.access_token {
            request = request.bearer_auth(token);
        }

        let response = request
            .send()
            .await
            .map_err(|e| ResponseError::transport(format!("Failed to reach platform API: {e}")))?;

        let status = response.status();
        if status.is_success() {
            return response.json::<Value>().await.map_err(|e| {
                ResponseError::invalid(
                    format!("Platform API returned an invalid body: {e}"),
                    Some(status.as_u16()),
                )
            });
        }

        let request_id = header_str(&response, "x-request-id").map(str::to_string);
        let retry_after = header_str(&response, "retry-after").and_then(|v| v.trim().parse().ok());
        let body = response.text().await.unwrap_or_default();

        Err(ResponseError {
            message: error_message(status, &body),
            code: Some(status.as_u16()),
            request_id,
            retry_after,
            kind: ResponseErrorKind::Status,
        })
    }
}

#[async_trait]
impl Fetcher for HttpFetcher {
    async fn get(
        &self,
        path: &str,
        params: &PathParams,
        signal: &CancellationToken,
    ) -> Result<Value, ResponseError> {
        let url = format!("{}{}", self.base_url, params.render(path)?);
        tracing::debug!(url = %url, "GET platform API");

        tokio::select! {
            biased;
            _ = signal.cancelled() => {
                tracing::debug!(url = %url, "Platform request cancelled");
                Err(ResponseError::aborted())
            }
            result = self.send(&url) => result,
        }
    }
}

fn header_str<'a>(response: &'a reqwest::Response, name: &str) -> Option<&'a str> {
    response.headers().get(name).and_then(|v| v.to_str().ok())
}

#[derive(Deserialize)]
struct ErrorBody {
    message: Option<String>,
    msg: Option<String>,
    error: Option<String>,
}

/// Extracts the platform's error message, falling back to the status text.
fn error_message(status: StatusCode, body: &str) -> String {
    serde_json::from_str::<ErrorBody>(body)
        .ok()
        .and_then(|b| b.message.or(b.msg).or(b.error))
        .filter(|m| !m.is_empty())
        .unwrap_or_else(|| {
            status
                .canonical_reason()
                .map(str::to_string)
                .unwrap_or_else(|| format!("HTTP {}", status.as_u16()))
        })
}
