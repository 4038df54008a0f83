// Credential resolution: explicit value > environment > config file > prompt,
// decided independently for username and password.

use std::fmt;
use std::io::{self, BufRead, Write};

use tracing::{debug, info};

pub const USERNAME_ENV: &str = "GSAU_USERNAME";
pub const PASSWORD_ENV: &str = "GSAU_PASSWORD";

/// A resolved username/password pair. Either field may be empty, which means
/// no source supplied it.
#[derive(Clone, Default, PartialEq, Eq)]
pub struct Credentials {
    pub username: String,
    pub password: String,
}

impl Credentials {
    pub fn is_complete(&self) -> bool {
        !self.username.is_empty() && !self.password.is_empty()
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .finish()
    }
}

/// Values one source may or may not provide.
#[derive(Clone, Default, PartialEq, Eq)]
pub struct PartialCredentials {
    pub username: Option<String>,
    pub password: Option<String>,
}

impl PartialCredentials {
    /// Blank values count as absent; surrounding whitespace is dropped.
    pub fn new(username: Option<String>, password: Option<String>) -> Self {
        Self {
            username: normalize(username),
            password: normalize(password),
        }
    }

    /// Read `GSAU_USERNAME` / `GSAU_PASSWORD` from the process environment.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        Self::new(lookup(USERNAME_ENV), lookup(PASSWORD_ENV))
    }
}

impl fmt::Debug for PartialCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PartialCredentials")
            .field("username", &self.username)
            .field("password", &self.password.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}

fn normalize(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

// ---------------------------------------------------------------------------
// Interactive prompt
// ---------------------------------------------------------------------------

/// Asks the user for missing credentials. Returning an empty string means
/// the user supplied nothing.
pub trait CredentialPrompt: Send + Sync {
    fn username(&self) -> String;
    fn password(&self) -> String;
}

/// Reads the username from stdin and the password from the terminal with
/// echo disabled. End of input or read errors yield an empty string.
pub struct TerminalPrompt;

impl CredentialPrompt for TerminalPrompt {
    fn username(&self) -> String {
        eprint!("GSAU username: ");
        let _ = io::stderr().flush();
        let mut line = String::new();
        match io::stdin().lock().read_line(&mut line) {
            Ok(_) => line.trim().to_string(),
            Err(_) => String::new(),
        }
    }

    fn password(&self) -> String {
        rpassword::prompt_password("GSAU password: ")
            .map(|p| p.trim().to_string())
            .unwrap_or_default()
    }
}

// ---------------------------------------------------------------------------
// Resolver
// ---------------------------------------------------------------------------

/// Where a resolved field came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CredentialSource {
    Explicit,
    Environment,
    ConfigFile,
    Prompt,
    Missing,
}

pub struct CredentialResolver {
    explicit: PartialCredentials,
    env: PartialCredentials,
    file: PartialCredentials,
    prompt: Option<Box<dyn CredentialPrompt>>,
}

impl CredentialResolver {
    /// `prompt = None` means non-interactive: missing fields stay empty.
    pub fn new(
        explicit: PartialCredentials,
        env: PartialCredentials,
        file: PartialCredentials,
        prompt: Option<Box<dyn CredentialPrompt>>,
    ) -> Self {
        Self {
            explicit,
            env,
            file,
            prompt,
        }
    }

    pub fn is_interactive(&self) -> bool {
        self.prompt.is_some()
    }

    /// Replace the explicit values, e.g. after a successful login so later
    /// attempts reuse what worked.
    pub fn remember(&mut self, credentials: &Credentials) {
        self.explicit = PartialCredentials::new(
            Some(credentials.username.clone()),
            Some(credentials.password.clone()),
        );
    }

    /// Resolve both fields. Never fails; unresolved fields are empty.
    pub fn resolve(&self) -> Credentials {
        let (mut username, mut user_source) = pick(
            &self.explicit.username,
            &self.env.username,
            &self.file.username,
        );
        let (mut password, mut pass_source) = pick(
            &self.explicit.password,
            &self.env.password,
            &self.file.password,
        );

        if let Some(prompt) = &self.prompt {
            if username.is_empty() {
                username = prompt.username().trim().to_string();
                user_source = prompted(&username);
            }
            if password.is_empty() {
                password = prompt.password().trim().to_string();
                pass_source = prompted(&password);
            }
        }

        info!(?user_source, ?pass_source, username = %username, "credentials resolved");
        if user_source == CredentialSource::Missing || pass_source == CredentialSource::Missing {
            debug!(interactive = self.is_interactive(), "credentials incomplete");
        }

        Credentials { username, password }
    }
}

fn pick(
    explicit: &Option<String>,
    env: &Option<String>,
    file: &Option<String>,
) -> (String, CredentialSource) {
    if let Some(v) = explicit {
        (v.clone(), CredentialSource::Explicit)
    } else if let Some(v) = env {
        (v.clone(), CredentialSource::Environment)
    } else if let Some(v) = file {
        (v.clone(), CredentialSource::ConfigFile)
    } else {
        (String::new(), CredentialSource::Missing)
    }
}

fn prompted(value: &str) -> CredentialSource {
    if value.is_empty() {
        CredentialSource::Missing
    } else {
        CredentialSource::Prompt
    }
}

// ---------------------------------------------------------------------------
// Unit tests
// ---------------------------------------------------------------------------
