//! Network seam.
//! `Transport` sends one fully-formed request and returns whatever status the
//! backend answered with; only connection-level failures are errors here.
//! Deciding what a 401 means is the pipeline's job, not the transport's.

use std::time::Instant;

use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use tracing::debug;

use crate::config::SessionConfig;
use crate::error::{AuthError, AuthResult};
use crate::logging::TARGET_CLIENT;

pub const AUTHORIZATION_HEADER: &str = "Authorization";
pub const APP_KEY_HEADER: &str = "appKey";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Method {
    Get,
    Post,
    Put,
    Patch,
    Delete,
}

impl Method {
    pub fn as_str(&self) -> &'static str {
        match self {
            Method::Get => "GET",
            Method::Post => "POST",
            Method::Put => "PUT",
            Method::Patch => "PATCH",
            Method::Delete => "DELETE",
        }
    }

    fn to_reqwest(self) -> reqwest::Method {
        match self {
            Method::Get => reqwest::Method::GET,
            Method::Post => reqwest::Method::POST,
            Method::Put => reqwest::Method::PUT,
            Method::Patch => reqwest::Method::PATCH,
            Method::Delete => reqwest::Method::DELETE,
        }
    }
}

/// One outgoing call. Cloneable so it can be replayed once with a fresh token.
#[derive(Debug, Clone, PartialEq)]
pub struct ApiRequest {
    pub method: Method,
    /// Path relative to the configured API base, always starting with `/`.
    pub path: String,
    pub query: Vec<(String, String)>,
    pub headers: Vec<(String, String)>,
    pub body: Option<Value>,
}

impl ApiRequest {
    pub fn new(method: Method, path: impl Into<String>) -> Self {
        let mut path = path.into();
        if !path.starts_with('/') { path.insert(0, '/'); }
        Self { method, path, query: Vec::new(), headers: Vec::new(), body: None }
    }

    pub fn get(path: impl Into<String>) -> Self { Self::new(Method::Get, path) }
    pub fn delete(path: impl Into<String>) -> Self { Self::new(Method::Delete, path) }
    pub fn post(path: impl Into<String>, body: Value) -> Self { Self::new(Method::Post, path).with_body(body) }
    pub fn put(path: impl Into<String>, body: Value) -> Self { Self::new(Method::Put, path).with_body(body) }
    pub fn patch(path: impl Into<String>, body: Value) -> Self { Self::new(Method::Patch, path).with_body(body) }

    /// Serialize any body type into the request.
    pub fn json<T: Serialize>(method: Method, path: impl Into<String>, body: &T) -> AuthResult<Self> {
        Ok(Self::new(method, path).with_body(serde_json::to_value(body)?))
    }

    pub fn with_body(mut self, body: Value) -> Self { self.body = Some(body); self }

    pub fn with_query(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.query.push((key.into(), value.into()));
        self
    }

    /// Set a header, replacing any existing value (header names compare case-insensitively).
    pub fn with_header(mut self, name: &str, value: impl Into<String>) -> Self {
        self.headers.retain(|(n, _)| !n.eq_ignore_ascii_case(name));
        self.headers.push((name.to_string(), value.into()));
        self
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.iter().find(|(n, _)| n.eq_ignore_ascii_case(name)).map(|(_, v)| v.as_str())
    }

    /// Bearer token carried by this request, if any.
    pub fn bearer(&self) -> Option<&str> {
        self.header(AUTHORIZATION_HEADER).and_then(|v| v.strip_prefix("Bearer "))
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ApiResponse {
    pub status: u16,
    /// Parsed JSON body; `Null` when empty, a JSON string when the body was not JSON.
    pub body: Value,
}

impl ApiResponse {
    pub fn new(status: u16, body: Value) -> Self { Self { status, body } }

    pub fn is_success(&self) -> bool { (200..300).contains(&self.status) }

    pub fn is_unauthorized(&self) -> bool { self.status == 401 }

    pub fn json<T: DeserializeOwned>(&self) -> AuthResult<T> {
        serde_json::from_value(self.body.clone()).map_err(AuthError::from)
    }

    /// Turn a non-2xx response into `AuthError::Status`, using the backend's `message` field when present.
    pub fn error_for_status(self) -> AuthResult<Self> {
        if self.is_success() { return Ok(self); }
        let message = self
            .body
            .get("message")
            .and_then(|m| m.as_str())
            .map(str::to_string)
            .or_else(|| self.body.as_str().map(str::to_string))
            .unwrap_or_else(|| format!("HTTP {}", self.status));
        Err(match self.status {
            401 => AuthError::unauthenticated(message),
            403 => AuthError::forbidden(message),
            s => AuthError::status(s, message),
        })
    }
}

#[async_trait]
pub trait Transport: Send + Sync {
    async fn send(&self, req: &ApiRequest) -> AuthResult<ApiResponse>;
}

/// `reqwest`-backed transport rooted at `SessionConfig::api_base`.
#[derive(Clone)]
pub struct HttpTransport {
    base: String,
    client: reqwest::Client,
}

impl HttpTransport {
    pub fn new(config: &SessionConfig) -> AuthResult<Self> {
        config.validate()?;
        let client = reqwest::Client::builder()
            .timeout(config.request_timeout())
            .build()
            .map_err(|e| AuthError::config(format!("failed to build http client: {}", e)))?;
        Ok(Self { base: config.api_base.trim_end_matches('/').to_string(), client })
    }

    pub fn url_for(&self, path: &str) -> AuthResult<reqwest::Url> {
        let joined = format!("{}{}", self.base, path);
        reqwest::Url::parse(&joined).map_err(|e| AuthError::config(format!("invalid url '{}': {}", joined, e)))
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn send(&self, req: &ApiRequest) -> AuthResult<ApiResponse> {
        let url = self.url_for(&req.path)?;
        let mut headers = HeaderMap::new();
        for (name, value) in &req.headers {
            let name = HeaderName::from_bytes(name.as_bytes())
                .map_err(|e| AuthError::config(format!("invalid header name '{}': {}", name, e)))?;
            let value = HeaderValue::from_str(value)
                .map_err(|e| AuthError::config(format!("invalid header value for '{}': {}", name.as_str(), e)))?;
            headers.insert(name, value);
        }
        let mut builder = self.client.request(req.method.to_reqwest(), url).headers(headers);
        if !req.query.is_empty() { builder = builder.query(&req.query); }
        if let Some(body) = &req.body { builder = builder.json(body); }

        let started = Instant::now();
        let resp = builder.send().await?;
        let status = resp.status().as_u16();
        let bytes = resp.bytes().await?;
        debug!(
            target: TARGET_CLIENT,
            "http {} {} -> {} in {}ms",
            req.method.as_str(), req.path, status, started.elapsed().as_millis()
        );
        let body = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap_or_else(|_| Value::String(String::from_utf8_lossy(&bytes).into_owned()))
        };
        Ok(ApiResponse { status, body })
    }
}
