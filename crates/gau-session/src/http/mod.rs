// HTTP plumbing: transport seam, cookie jar, redirect-following client.

pub mod client;
pub mod cookies;
pub mod transport;

#[cfg(test)]
pub(crate) mod testing;

pub use client::{random_user_agent, HttpClient};
pub use cookies::{CookieJar, StoredCookie};
pub use transport::{Body, HttpRequest, HttpResponse, ReqwestTransport, Transport, TransportError};
