// Cookie jar owned by the HTTP client.
//
// Kept as a flat list of plain records so the whole jar can be written to the
// session file and read back without loss.

use cookie::time::OffsetDateTime;
use cookie::Cookie;
use reqwest::header::{HeaderMap, SET_COOKIE};
use reqwest::Url;
use serde::{Deserialize, Serialize};
use tracing::debug;

/// One stored cookie.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredCookie {
    pub name: String,
    pub value: String,
    /// Lowercased host (host-only) or domain without a leading dot.
    pub domain: String,
    pub path: String,
    /// When true the cookie is only sent to exactly `domain`.
    #[serde(default)]
    pub host_only: bool,
    #[serde(default)]
    pub secure: bool,
}

impl StoredCookie {
    fn matches(&self, host: &str, path: &str, https: bool) -> bool {
        if self.secure && !https {
            return false;
        }
        let host_ok = if self.host_only {
            host == self.domain
        } else {
            domain_matches(host, &self.domain)
        };
        host_ok && path_matches(path, &self.path)
    }

    fn same_slot(&self, other: &StoredCookie) -> bool {
        self.name == other.name && self.domain == other.domain && self.path == other.path
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct CookieJar {
    cookies: Vec<StoredCookie>,
}

impl CookieJar {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_cookies(cookies: Vec<StoredCookie>) -> Self {
        Self { cookies }
    }

    pub fn cookies(&self) -> &[StoredCookie] {
        &self.cookies
    }

    pub fn len(&self) -> usize {
        self.cookies.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cookies.is_empty()
    }

    pub fn clear(&mut self) {
        self.cookies.clear();
    }

    /// Apply every `Set-Cookie` header of a response received from `url`.
    pub fn store_response_cookies(&mut self, url: &Url, headers: &HeaderMap) {
        for value in headers.get_all(SET_COOKIE) {
            match value.to_str() {
                Ok(raw) => self.set_cookie(url, raw),
                Err(_) => debug!(url = %url, "skipping non-ASCII Set-Cookie header"),
            }
        }
    }

    /// Apply a single `Set-Cookie` header value. Malformed values and cookies
    /// for a foreign domain are ignored. An expired cookie removes any stored
    /// cookie with the same name, domain and path.
    pub fn set_cookie(&mut self, url: &Url, raw: &str) {
        let Ok(parsed) = Cookie::parse(raw.to_owned()) else {
            debug!(url = %url, "ignoring malformed Set-Cookie header");
            return;
        };
        let Some(host) = url.host_str().map(|h| h.to_ascii_lowercase()) else {
            return;
        };

        let (domain, host_only) = match parsed.domain() {
            Some(d) if !d.trim_start_matches('.').is_empty() => {
                let d = d.trim_start_matches('.').to_ascii_lowercase();
                if !domain_matches(&host, &d) {
                    debug!(host = %host, domain = %d, "rejecting cookie for foreign domain");
                    return;
                }
                (d, false)
            }
            _ => (host, true),
        };

        let path = match parsed.path() {
            Some(p) if p.starts_with('/') => p.to_string(),
            _ => "/".to_string(),
        };

        let expired = match parsed.max_age() {
            Some(age) => age.is_zero() || age.is_negative(),
            None => parsed
                .expires_datetime()
                .is_some_and(|at| at <= OffsetDateTime::now_utc()),
        };

        let cookie = StoredCookie {
            name: parsed.name().to_string(),
            value: parsed.value().to_string(),
            domain,
            path,
            host_only,
            secure: parsed.secure().unwrap_or(false),
        };

        self.cookies.retain(|c| !c.same_slot(&cookie));
        if !expired {
            self.cookies.push(cookie);
        }
    }

    /// Value for the `Cookie` request header when requesting `url`, or `None`
    /// if no stored cookie applies.
    pub fn header_for(&self, url: &Url) -> Option<String> {
        let host = url.host_str()?.to_ascii_lowercase();
        let https = url.scheme() == "https";
        let pairs: Vec<String> = self
            .cookies
            .iter()
            .filter(|c| c.matches(&host, url.path(), https))
            .map(|c| format!("{}={}", c.name, c.value))
            .collect();

        if pairs.is_empty() {
            None
        } else {
            Some(pairs.join("; "))
        }
    }
}

fn domain_matches(host: &str, domain: &str) -> bool {
    host == domain
        || (host.len() > domain.len()
            && host.ends_with(domain)
            && host.as_bytes()[host.len() - domain.len() - 1] == b'.')
}

fn path_matches(request_path: &str, cookie_path: &str) -> bool {
    if request_path == cookie_path {
        return true;
    }
    request_path.starts_with(cookie_path)
        && (cookie_path.ends_with('/')
            || request_path.as_bytes().get(cookie_path.len()) == Some(&b'/'))
}

// ---------------------------------------------------------------------------
// Unit tests
// ---------------------------------------------------------------------------
