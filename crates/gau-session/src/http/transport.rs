// HTTP transport seam: one request in, one response out.
//
// Transports never follow redirects and never remember cookies. Both are the
// job of `HttpClient`, which keeps that state in a jar it can persist. The
// production transport wraps `reqwest`; tests substitute a scripted fake.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::{HeaderMap, LOCATION};
use reqwest::{Method, StatusCode, Url};
use thiserror::Error;
use tracing::debug;

// ---------------------------------------------------------------------------
// Error types
// ---------------------------------------------------------------------------

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("request to {url} timed out")]
    Timeout { url: String },

    #[error("request to {url} failed: {message}")]
    Network { url: String, message: String },

    #[error("invalid URL `{url}`: {message}")]
    InvalidUrl { url: String, message: String },

    #[error("too many redirects starting from {url}")]
    TooManyRedirects { url: String },

    #[error("failed to build HTTP client: {0}")]
    Client(String),
}

// ---------------------------------------------------------------------------
// Request / response values
// ---------------------------------------------------------------------------

/// Request payload. Only urlencoded forms are needed by the portal.
#[derive(Debug, Clone, PartialEq, Default)]
pub enum Body {
    #[default]
    Empty,
    Form(Vec<(String, String)>),
}

#[derive(Debug, Clone)]
pub struct HttpRequest {
    pub method: Method,
    pub url: Url,
    pub headers: HeaderMap,
    pub body: Body,
}

impl HttpRequest {
    pub fn get(url: Url) -> Self {
        Self {
            method: Method::GET,
            url,
            headers: HeaderMap::new(),
            body: Body::Empty,
        }
    }

    pub fn post_form(url: Url, fields: Vec<(String, String)>) -> Self {
        Self {
            method: Method::POST,
            url,
            headers: HeaderMap::new(),
            body: Body::Form(fields),
        }
    }
}

/// A single HTTP response. `url` is the URL that produced it (after all
/// redirects when returned from `HttpClient`).
#[derive(Debug, Clone)]
pub struct HttpResponse {
    pub url: Url,
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: Vec<u8>,
}

impl HttpResponse {
    /// Body decoded as UTF-8, replacing invalid sequences. The portal always
    /// serves UTF-8 even when its headers claim otherwise.
    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }

    /// The `Location` target if this is a followable redirect.
    pub fn redirect_location(&self) -> Option<&str> {
        match self.status.as_u16() {
            301 | 302 | 303 | 307 | 308 => self.headers.get(LOCATION)?.to_str().ok(),
            _ => None,
        }
    }
}

// ---------------------------------------------------------------------------
// Transport trait
// ---------------------------------------------------------------------------

/// Sends exactly one request and returns exactly one response.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn send(&self, request: HttpRequest) -> Result<HttpResponse, TransportError>;
}

// ---------------------------------------------------------------------------
// reqwest-backed transport
// ---------------------------------------------------------------------------

/// Production transport. Redirects and proxy environment variables are
/// disabled; every request carries the same fixed timeout.
pub struct ReqwestTransport {
    http: reqwest::Client,
}

impl ReqwestTransport {
    pub fn new(timeout: Duration) -> Result<Self, TransportError> {
        let http = reqwest::Client::builder()
            .redirect(reqwest::redirect::Policy::none())
            .no_proxy()
            .timeout(timeout)
            .build()
            .map_err(|e| TransportError::Client(e.to_string()))?;
        Ok(Self { http })
    }
}

#[async_trait]
impl Transport for ReqwestTransport {
    async fn send(&self, request: HttpRequest) -> Result<HttpResponse, TransportError> {
        let url_text = request.url.to_string();
        debug!(method = %request.method, url = %url_text, "sending request");

        let mut builder = self
            .http
            .request(request.method, request.url)
            .headers(request.headers);
        if let Body::Form(fields) = &request.body {
            builder = builder.form(fields);
        }

        let response = builder
            .send()
            .await
            .map_err(|e| classify_error(&url_text, e))?;

        let url = response.url().clone();
        let status = response.status();
        let headers = response.headers().clone();
        let body = response
            .bytes()
            .await
            .map_err(|e| classify_error(&url_text, e))?
            .to_vec();

        Ok(HttpResponse {
            url,
            status,
            headers,
            body,
        })
    }
}

fn classify_error(url: &str, err: reqwest::Error) -> TransportError {
    if err.is_timeout() {
        TransportError::Timeout {
            url: url.to_string(),
        }
    } else {
        TransportError::Network {
            url: url.to_string(),
            message: err.to_string(),
        }
    }
}

// ---------------------------------------------------------------------------
// Unit tests
// ---------------------------------------------------------------------------
