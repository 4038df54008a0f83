// Scripted in-memory transport for unit tests.

use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;

use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderValue, COOKIE, LOCATION, SET_COOKIE, USER_AGENT};
use reqwest::{Method, StatusCode, Url};

use super::transport::{Body, HttpRequest, HttpResponse, Transport, TransportError};

/// What the fake saw for one request.
#[derive(Debug, Clone)]
pub struct RecordedRequest {
    pub method: Method,
    pub url: String,
    pub cookie: Option<String>,
    pub user_agent: Option<String>,
    pub body: Body,
}

impl RecordedRequest {
    pub fn form_value(&self, key: &str) -> Option<&str> {
        match &self.body {
            Body::Form(fields) => fields
                .iter()
                .find(|(k, _)| k == key)
                .map(|(_, v)| v.as_str()),
            Body::Empty => None,
        }
    }
}

enum Scripted {
    Respond {
        status: u16,
        headers: Vec<(&'static str, String)>,
        body: String,
    },
    Timeout,
}

/// Serves queued responses per URL (query string ignored). The last queued
/// response for a URL is repeated. Unscripted URLs fail with a network error.
#[derive(Default)]
pub struct ScriptedTransport {
    routes: Mutex<HashMap<String, VecDeque<Scripted>>>,
    requests: Mutex<Vec<RecordedRequest>>,
}

impl ScriptedTransport {
    pub fn new() -> Self {
        Self::default()
    }

    fn push(&self, url: &str, entry: Scripted) {
        self.routes
            .lock()
            .unwrap()
            .entry(route_key(url))
            .or_default()
            .push_back(entry);
    }

    pub fn page(&self, url: &str, status: u16, body: &str) {
        self.push(
            url,
            Scripted::Respond {
                status,
                headers: Vec::new(),
                body: body.to_string(),
            },
        );
    }

    pub fn page_with_cookies(&self, url: &str, body: &str, cookies: &[&str]) {
        self.push(
            url,
            Scripted::Respond {
                status: 200,
                headers: cookies.iter().map(|c| ("set-cookie", c.to_string())).collect(),
                body: body.to_string(),
            },
        );
    }

    pub fn redirect(&self, url: &str, location: &str, cookies: &[&str]) {
        let mut headers: Vec<(&'static str, String)> =
            cookies.iter().map(|c| ("set-cookie", c.to_string())).collect();
        headers.push(("location", location.to_string()));
        self.push(
            url,
            Scripted::Respond {
                status: 302,
                headers,
                body: String::new(),
            },
        );
    }

    pub fn timeout(&self, url: &str) {
        self.push(url, Scripted::Timeout);
    }

    pub fn requests(&self) -> Vec<RecordedRequest> {
        self.requests.lock().unwrap().clone()
    }

    pub fn requests_to(&self, url: &str) -> Vec<RecordedRequest> {
        let key = route_key(url);
        self.requests()
            .into_iter()
            .filter(|r| route_key(&r.url) == key)
            .collect()
    }

    pub fn count(&self, method: &Method) -> usize {
        self.requests().iter().filter(|r| &r.method == method).count()
    }
}

fn route_key(url: &str) -> String {
    match Url::parse(url) {
        Ok(mut u) => {
            u.set_query(None);
            u.to_string()
        }
        Err(_) => url.to_string(),
    }
}

#[async_trait]
impl Transport for ScriptedTransport {
    async fn send(&self, request: HttpRequest) -> Result<HttpResponse, TransportError> {
        let header = |name| {
            request
                .headers
                .get(name)
                .and_then(|v: &HeaderValue| v.to_str().ok())
                .map(str::to_string)
        };
        self.requests.lock().unwrap().push(RecordedRequest {
            method: request.method.clone(),
            url: request.url.to_string(),
            cookie: header(COOKIE),
            user_agent: header(USER_AGENT),
            body: request.body.clone(),
        });

        let mut routes = self.routes.lock().unwrap();
        let queue = routes
            .get_mut(&route_key(request.url.as_str()))
            .ok_or_else(|| TransportError::Network {
                url: request.url.to_string(),
                message: "no scripted response".into(),
            })?;

        let entry = if queue.len() > 1 {
            queue.pop_front()
        } else {
            queue.front().map(|e| match e {
                Scripted::Respond {
                    status,
                    headers,
                    body,
                } => Scripted::Respond {
                    status: *status,
                    headers: headers.clone(),
                    body: body.clone(),
                },
                Scripted::Timeout => Scripted::Timeout,
            })
        };

        match entry {
            Some(Scripted::Respond {
                status,
                headers,
                body,
            }) => {
                let mut map = HeaderMap::new();
                for (name, value) in headers {
                    let value = HeaderValue::from_str(&value).unwrap();
                    match name {
                        "set-cookie" => map.append(SET_COOKIE, value),
                        "location" => map.append(LOCATION, value),
                        _ => unreachable!("unsupported scripted header"),
                    };
                }
                Ok(HttpResponse {
                    url: request.url,
                    status: StatusCode::from_u16(status).unwrap(),
                    headers: map,
                    body: body.into_bytes(),
                })
            }
            Some(Scripted::Timeout) => Err(TransportError::Timeout {
                url: request.url.to_string(),
            }),
            None => Err(TransportError::Network {
                url: request.url.to_string(),
                message: "script exhausted".into(),
            }),
        }
    }
}
