// Stateful HTTP client: cookie jar, browser identity, and HTTP redirect
// following on top of a single-shot `Transport`.

use std::sync::Arc;

use rand::Rng;
use reqwest::header::{HeaderValue, COOKIE, USER_AGENT};
use reqwest::{Method, StatusCode, Url};
use tracing::{debug, warn};

use super::cookies::CookieJar;
use super::transport::{Body, HttpRequest, HttpResponse, Transport, TransportError};

/// Upper bound on HTTP (3xx) redirects followed for a single request.
pub const MAX_HTTP_REDIRECTS: usize = 10;

/// Build a desktop Chrome user agent with a randomized version number.
pub fn random_user_agent() -> String {
    let mut rng = rand::thread_rng();
    let major: u32 = rng.gen_range(120..=144);
    let build: u32 = rng.gen_range(0..=8000);
    let patch: u32 = rng.gen_range(0..=200);
    format!(
        "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 \
         (KHTML, like Gecko) Chrome/{major}.0.{build}.{patch} Safari/537.36"
    )
}

pub struct HttpClient {
    transport: Arc<dyn Transport>,
    jar: CookieJar,
    user_agent: String,
}

impl HttpClient {
    /// Create a client with an empty jar. The user agent is fixed for the
    /// lifetime of the client.
    pub fn new(transport: Arc<dyn Transport>, user_agent: String) -> Self {
        Self {
            transport,
            jar: CookieJar::new(),
            user_agent,
        }
    }

    pub fn user_agent(&self) -> &str {
        &self.user_agent
    }

    pub fn jar(&self) -> &CookieJar {
        &self.jar
    }

    pub fn replace_jar(&mut self, jar: CookieJar) {
        self.jar = jar;
    }

    pub fn clear_cookies(&mut self) {
        self.jar.clear();
    }

    pub async fn get(&mut self, url: Url) -> Result<HttpResponse, TransportError> {
        self.execute(HttpRequest::get(url)).await
    }

    pub async fn post_form(
        &mut self,
        url: Url,
        fields: Vec<(String, String)>,
    ) -> Result<HttpResponse, TransportError> {
        self.execute(HttpRequest::post_form(url, fields)).await
    }

    /// Send `request`, following HTTP redirects and recording cookies from
    /// every hop. Returns the first non-redirect response; its `url` is the
    /// final location.
    pub async fn execute(&mut self, request: HttpRequest) -> Result<HttpResponse, TransportError> {
        let origin = request.url.to_string();
        let mut current = request;

        for _ in 0..=MAX_HTTP_REDIRECTS {
            let prepared = self.prepare(current.clone());
            let response = self.transport.send(prepared).await?;
            self.jar.store_response_cookies(&response.url, &response.headers);

            let Some(location) = response.redirect_location() else {
                return Ok(response);
            };
            let next_url = match response.url.join(location) {
                Ok(u) => u,
                Err(e) => {
                    warn!(location, "unparseable redirect target, stopping");
                    return Err(TransportError::InvalidUrl {
                        url: location.to_string(),
                        message: e.to_string(),
                    });
                }
            };
            debug!(status = %response.status, from = %response.url, to = %next_url, "following redirect");

            current = redirected_request(current, response.status, next_url);
        }

        Err(TransportError::TooManyRedirects { url: origin })
    }

    fn prepare(&self, mut request: HttpRequest) -> HttpRequest {
        if let Ok(ua) = HeaderValue::from_str(&self.user_agent) {
            request.headers.insert(USER_AGENT, ua);
        }
        request.headers.remove(COOKIE);
        if let Some(cookie_header) = self.jar.header_for(&request.url) {
            if let Ok(value) = HeaderValue::from_str(&cookie_header) {
                request.headers.insert(COOKIE, value);
            }
        }
        request
    }
}

/// 301/302/303 turn into a body-less GET; 307/308 replay method and body.
fn redirected_request(previous: HttpRequest, status: StatusCode, url: Url) -> HttpRequest {
    match status.as_u16() {
        307 | 308 => HttpRequest { url, ..previous },
        _ => HttpRequest {
            method: Method::GET,
            url,
            headers: previous.headers,
            body: Body::Empty,
        },
    }
}

// ---------------------------------------------------------------------------
// Unit tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::http::testing::ScriptedTransport;

    fn url(s: &str) -> Url {
        Url::parse(s).unwrap()
    }

    // -- user agent --

    #[test]
    fn user_agent_has_chrome_shape() {
        let ua = random_user_agent();
        assert!(ua.starts_with("Mozilla/5.0 (Windows NT 10.0; Win64; x64)"));
        assert!(ua.ends_with("Safari/537.36"));

        let version = ua.split("Chrome/").nth(1).unwrap().split(' ').next().unwrap();
        let parts: Vec<u32> = version.split('.').map(|p| p.parse().unwrap()).collect();
        assert_eq!(parts.len(), 4);
        assert!((120..=144).contains(&parts[0]));
        assert_eq!(parts[1], 0);
        assert!(parts[2] <= 8000);
        assert!(parts[3] <= 200);
    }

    // -- redirects and cookies --

    #[tokio::test]
    async fn follows_redirect_and_carries_cookies() {
        let transport = Arc::new(ScriptedTransport::new());
        transport.redirect("https://a.example/start", "/next", &["sid=1; Path=/"]);
        transport.page("https://a.example/next", 200, "done");

        let mut client = HttpClient::new(transport.clone(), "ua-test".into());
        let resp = client.get(url("https://a.example/start")).await.unwrap();

        assert_eq!(resp.url.as_str(), "https://a.example/next");
        assert_eq!(resp.text(), "done");

        let requests = transport.requests();
        assert_eq!(requests.len(), 2);
        assert_eq!(requests[0].cookie.as_deref(), None);
        assert_eq!(requests[1].cookie.as_deref(), Some("sid=1"));
        assert!(requests.iter().all(|r| r.user_agent.as_deref() == Some("ua-test")));
    }

    #[tokio::test]
    async fn post_redirect_becomes_get() {
        let transport = Arc::new(ScriptedTransport::new());
        transport.redirect("https://a.example/login", "https://b.example/home", &[]);
        transport.page("https://b.example/home", 200, "home");

        let mut client = HttpClient::new(transport.clone(), "ua".into());
        client
            .post_form(url("https://a.example/login"), vec![("k".into(), "v".into())])
            .await
            .unwrap();

        let requests = transport.requests();
        assert_eq!(requests[0].method, Method::POST);
        assert_eq!(requests[1].method, Method::GET);
        assert_eq!(requests[1].body, Body::Empty);
    }

    #[tokio::test]
    async fn redirect_loop_is_bounded() {
        let transport = Arc::new(ScriptedTransport::new());
        transport.redirect("https://a.example/loop", "/loop", &[]);

        let mut client = HttpClient::new(transport.clone(), "ua".into());
        let err = client.get(url("https://a.example/loop")).await.unwrap_err();

        assert!(matches!(err, TransportError::TooManyRedirects { .. }));
        assert_eq!(transport.requests().len(), MAX_HTTP_REDIRECTS + 1);
    }

    #[tokio::test]
    async fn transport_errors_propagate() {
        let transport = Arc::new(ScriptedTransport::new());
        let mut client = HttpClient::new(transport, "ua".into());
        let err = client.get(url("https://unscripted.example/")).await.unwrap_err();
        assert!(matches!(err, TransportError::Network { .. }));
    }
}
