// Login outcomes and the engine's error type.

use std::fmt;

use serde::Serialize;
use thiserror::Error;

use crate::auth::EncryptError;
use crate::http::TransportError;

use super::store::StoreError;

/// Result of one pass through the login flow. Only `Authenticated` means the
/// engine holds a verified session; the other variants are ordinary
/// "not logged in" results, not errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum LoginOutcome {
    Authenticated,
    /// No username or password could be resolved from any source.
    CredentialsUnavailable,
    /// The SSO page had no execution token in its password form.
    LoginParameterMissing,
    /// The form was submitted but verification still landed on the SSO
    /// server or its login form.
    AuthenticationRejected,
}

impl LoginOutcome {
    pub fn is_success(self) -> bool {
        self == LoginOutcome::Authenticated
    }
}

impl fmt::Display for LoginOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            LoginOutcome::Authenticated => "authenticated",
            LoginOutcome::CredentialsUnavailable => "no username or password available",
            LoginOutcome::LoginParameterMissing => "login page is missing the execution token",
            LoginOutcome::AuthenticationRejected => "credentials were rejected by the SSO server",
        };
        f.write_str(text)
    }
}

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("login failed: {0}")]
    LoginFailed(LoginOutcome),

    #[error("session expired: request was redirected to the SSO server ({url})")]
    SessionExpired { url: String },

    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error("password encryption failed: {0}")]
    Encrypt(#[from] EncryptError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("invalid request: {0}")]
    InvalidRequest(String),
}
