// Session management: login state machine, persistence, errors.

pub mod engine;
pub mod error;
pub mod store;

pub use engine::{
    EngineBuilder, LoginPhase, RequestOptions, SessionEngine, SessionStatus, MAX_JS_REDIRECTS,
};
pub use error::{LoginOutcome, SessionError};
pub use store::{Clock, FileSessionStore, SessionRecord, SessionStore, StoreError, SystemClock};
