// Library root: GSAU portal session engine. Downstream tools build a
// `SessionEngine` from a `Config` and issue authenticated requests through it.

pub mod auth;
pub mod config;
pub mod http;
pub mod session;

pub use config::{load_config, Config};
pub use http::HttpResponse;
pub use session::{LoginOutcome, RequestOptions, SessionEngine, SessionError, SessionStatus};
