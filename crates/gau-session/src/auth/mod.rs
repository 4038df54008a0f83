// SSO login building blocks: credentials, page scraping, password encryption.

pub mod credentials;
pub mod crypto;
pub mod extract;

pub use credentials::{
    CredentialPrompt, CredentialResolver, CredentialSource, Credentials, PartialCredentials,
    TerminalPrompt,
};
pub use crypto::{encrypt_password, EncryptError};
pub use extract::{extract_login_params, find_js_redirect, has_login_form, LoginParams};
