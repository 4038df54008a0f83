// Session engine: SSO login state machine, session persistence, and the
// authenticated get/post facade used by everything downstream.
//
// Login flow:
//   ANONYMOUS        fetch entry page, scrape salt + execution token
//                    encrypt password, POST the login form
//   PENDING_REDIRECT follow `window.location.href` redirects (at most 5)
//   VERIFYING        landed page and probe page must be off the SSO server
//                    and free of the password form
//   AUTHENTICATED    cookies saved, credentials remembered

use std::path::PathBuf;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use reqwest::{Method, Url};
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::auth::{
    encrypt_password, extract_login_params, find_js_redirect, has_login_form, CredentialPrompt,
    CredentialResolver, Credentials, PartialCredentials, TerminalPrompt,
};
use crate::config::{resolve_session_path, Config, PortalConfig, SESSION_FILE_ENV};
use crate::http::{
    random_user_agent, Body, CookieJar, HttpClient, HttpRequest, HttpResponse, ReqwestTransport,
    StoredCookie, Transport,
};

use super::error::{LoginOutcome, SessionError};
use super::store::{Clock, FileSessionStore, SessionRecord, SessionStore, SystemClock};

/// Upper bound on script redirects followed after submitting the login form.
/// Reaching it is not a failure; verification decides.
pub const MAX_JS_REDIRECTS: usize = 5;

// ---------------------------------------------------------------------------
// State
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum LoginPhase {
    #[default]
    Anonymous,
    PendingRedirect,
    Verifying,
    Authenticated,
}

#[derive(Debug, Clone, Default)]
struct SessionState {
    phase: LoginPhase,
    logged_in: bool,
    username: Option<String>,
    /// Cookies came from a saved session and have not been verified yet.
    restored: bool,
    saved_at: Option<DateTime<Utc>>,
    last_outcome: Option<LoginOutcome>,
}

/// Snapshot of the engine for display.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SessionStatus {
    pub logged_in: bool,
    pub phase: LoginPhase,
    pub username: Option<String>,
    pub restored: bool,
    pub cookies: usize,
    pub session_file: Option<PathBuf>,
    pub saved_at: Option<DateTime<Utc>>,
}

// ---------------------------------------------------------------------------
// Request options
// ---------------------------------------------------------------------------

/// Extra request data for [`SessionEngine::get`] / [`SessionEngine::post`].
#[derive(Debug, Clone, Default)]
pub struct RequestOptions {
    pub query: Vec<(String, String)>,
    pub form: Vec<(String, String)>,
    pub headers: Vec<(String, String)>,
}

impl RequestOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn query(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.query.push((key.into(), value.into()));
        self
    }

    pub fn form(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.form.push((key.into(), value.into()));
        self
    }

    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }
}

// ---------------------------------------------------------------------------
// Builder
// ---------------------------------------------------------------------------

pub struct EngineBuilder {
    config: Config,
    explicit: PartialCredentials,
    env: Option<PartialCredentials>,
    interactive: bool,
    persist: Option<bool>,
    session_file: Option<PathBuf>,
    session_file_env: Option<Option<String>>,
    transport: Option<Arc<dyn Transport>>,
    store: Option<Box<dyn SessionStore>>,
    clock: Option<Arc<dyn Clock>>,
    prompt: Option<Box<dyn CredentialPrompt>>,
}

impl EngineBuilder {
    fn new(config: Config) -> Self {
        Self {
            config,
            explicit: PartialCredentials::default(),
            env: None,
            interactive: true,
            persist: None,
            session_file: None,
            session_file_env: None,
            transport: None,
            store: None,
            clock: None,
            prompt: None,
        }
    }

    pub fn username(mut self, username: impl Into<String>) -> Self {
        self.explicit = PartialCredentials::new(Some(username.into()), self.explicit.password);
        self
    }

    pub fn password(mut self, password: impl Into<String>) -> Self {
        self.explicit = PartialCredentials::new(self.explicit.username, Some(password.into()));
        self
    }

    /// Replace the process environment as a credential source.
    pub fn environment(mut self, env: PartialCredentials) -> Self {
        self.env = Some(env);
        self
    }

    /// When false, missing credentials are never prompted for.
    pub fn interactive(mut self, interactive: bool) -> Self {
        self.interactive = interactive;
        self
    }

    /// Override `[session] persist`.
    pub fn persist(mut self, persist: bool) -> Self {
        self.persist = Some(persist);
        self
    }

    /// Session file path, taking precedence over environment and config.
    pub fn session_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.session_file = Some(path.into());
        self
    }

    /// Replace the process environment as the source of `GSAU_SESSION_FILE`.
    pub fn session_file_env(mut self, value: Option<String>) -> Self {
        self.session_file_env = Some(value);
        self
    }

    pub fn transport(mut self, transport: Arc<dyn Transport>) -> Self {
        self.transport = Some(transport);
        self
    }

    pub fn store(mut self, store: Box<dyn SessionStore>) -> Self {
        self.store = Some(store);
        self
    }

    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = Some(clock);
        self
    }

    pub fn prompt(mut self, prompt: Box<dyn CredentialPrompt>) -> Self {
        self.prompt = Some(prompt);
        self
    }

    /// Assemble the engine and restore a saved session if one exists.
    pub fn build(self) -> Result<SessionEngine, SessionError> {
        let config = self.config;

        let env = self.env.unwrap_or_else(PartialCredentials::from_env);
        let prompt = if self.interactive {
            Some(
                self.prompt
                    .unwrap_or_else(|| Box::new(TerminalPrompt) as Box<dyn CredentialPrompt>),
            )
        } else {
            None
        };
        let credentials =
            CredentialResolver::new(self.explicit, env, config.auth.credentials(), prompt);

        let transport: Arc<dyn Transport> = match self.transport {
            Some(t) => t,
            None => Arc::new(ReqwestTransport::new(config.http.timeout())?),
        };

        let env_session_file = self
            .session_file_env
            .unwrap_or_else(|| std::env::var(SESSION_FILE_ENV).ok());
        let persist = self.persist.unwrap_or(config.session.persist);
        let store: Option<Box<dyn SessionStore>> = if !persist {
            None
        } else if let Some(store) = self.store {
            Some(store)
        } else {
            self.session_file
                .or_else(|| resolve_session_path(env_session_file, &config))
                .map(|path| Box::new(FileSessionStore::new(path)) as Box<dyn SessionStore>)
        };
        if persist && store.is_none() {
            warn!("session persistence enabled but no session file location is available");
        }

        let user_agent = random_user_agent();
        debug!(user_agent = %user_agent, "engine user agent chosen");

        let mut engine = SessionEngine {
            http: HttpClient::new(transport, user_agent),
            portal: config.portal,
            credentials,
            store,
            clock: self
                .clock
                .unwrap_or_else(|| Arc::new(SystemClock) as Arc<dyn Clock>),
            state: SessionState::default(),
        };
        engine.restore();
        Ok(engine)
    }
}

// ---------------------------------------------------------------------------
// SessionEngine
// ---------------------------------------------------------------------------

/// One logical portal session. Not shareable between tasks: run separate
/// engines for parallel work.
pub struct SessionEngine {
    http: HttpClient,
    portal: PortalConfig,
    credentials: CredentialResolver,
    store: Option<Box<dyn SessionStore>>,
    clock: Arc<dyn Clock>,
    state: SessionState,
}

impl SessionEngine {
    pub fn builder(config: Config) -> EngineBuilder {
        EngineBuilder::new(config)
    }

    pub fn is_logged_in(&self) -> bool {
        self.state.logged_in
    }

    pub fn phase(&self) -> LoginPhase {
        self.state.phase
    }

    pub fn username(&self) -> Option<&str> {
        self.state.username.as_deref()
    }

    pub fn cookies(&self) -> &[StoredCookie] {
        self.http.jar().cookies()
    }

    pub fn user_agent(&self) -> &str {
        self.http.user_agent()
    }

    pub fn last_outcome(&self) -> Option<LoginOutcome> {
        self.state.last_outcome
    }

    pub fn status(&self) -> SessionStatus {
        SessionStatus {
            logged_in: self.state.logged_in,
            phase: self.state.phase,
            username: self.state.username.clone(),
            restored: self.state.restored,
            cookies: self.http.jar().len(),
            session_file: self
                .store
                .as_ref()
                .and_then(|s| s.location())
                .map(|p| p.to_path_buf()),
            saved_at: self.state.saved_at,
        }
    }

    // -- login flow --

    /// Run the full login flow from an empty cookie jar.
    ///
    /// Rejections come back as a non-success [`LoginOutcome`]; only network
    /// failures and unusable salts are errors.
    pub async fn login(&mut self) -> Result<LoginOutcome, SessionError> {
        let result = self.attempt_login().await;
        match &result {
            Ok(LoginOutcome::Authenticated) => {}
            Ok(outcome) => {
                warn!(reason = %outcome, "login failed");
                self.mark_anonymous();
            }
            Err(e) => {
                warn!("login aborted: {e}");
                self.mark_anonymous();
            }
        }
        if let Ok(outcome) = &result {
            self.state.last_outcome = Some(*outcome);
        }
        result
    }

    async fn attempt_login(&mut self) -> Result<LoginOutcome, SessionError> {
        let credentials = self.credentials.resolve();
        if !credentials.is_complete() {
            return Ok(LoginOutcome::CredentialsUnavailable);
        }

        self.http.clear_cookies();
        self.state.restored = false;
        self.set_phase(LoginPhase::Anonymous);

        let entry = self.http.get(self.portal.entry_url.clone()).await?;
        let params = extract_login_params(&entry.text());
        if !params.has_execution() {
            debug!(url = %entry.url, "no execution token on login page");
            return Ok(LoginOutcome::LoginParameterMissing);
        }
        if params.salt.is_empty() {
            warn!("login page has no encryption salt, submitting password unencrypted");
        }

        let password = encrypt_password(&credentials.password, &params.salt)?;
        let form = login_form(&credentials.username, password, &params.execution);
        info!(username = %credentials.username, "submitting login form");
        let submitted = self
            .http
            .post_form(self.portal.login_url.clone(), form)
            .await?;

        self.set_phase(LoginPhase::PendingRedirect);
        let landed = self.follow_js_redirects(submitted).await?;

        self.set_phase(LoginPhase::Verifying);
        if !self.is_authenticated_page(&landed) {
            debug!(url = %landed.url, "login landed on SSO page");
            return Ok(LoginOutcome::AuthenticationRejected);
        }
        let probe = self.http.get(self.portal.probe_url.clone()).await?;
        if !self.is_authenticated_page(&probe) {
            debug!(url = %probe.url, "probe page not authenticated");
            return Ok(LoginOutcome::AuthenticationRejected);
        }

        self.mark_authenticated(&credentials);
        Ok(LoginOutcome::Authenticated)
    }

    /// Follow script redirects, refetching each target, until a page has
    /// none or [`MAX_JS_REDIRECTS`] hops were taken.
    async fn follow_js_redirects(
        &mut self,
        mut current: HttpResponse,
    ) -> Result<HttpResponse, SessionError> {
        let mut hops = 0;
        loop {
            let body = current.text();
            let Some(target) = find_js_redirect(&body) else {
                break;
            };
            if hops == MAX_JS_REDIRECTS {
                warn!(url = %current.url, "script redirect limit reached, verifying last page");
                break;
            }
            let next = match current.url.join(target) {
                Ok(url) => url,
                Err(e) => {
                    warn!(target, "unparseable script redirect target: {e}");
                    break;
                }
            };
            hops += 1;
            debug!(hop = hops, url = %next, "following script redirect");
            current = self.http.get(next).await?;
        }
        Ok(current)
    }

    fn is_authenticated_page(&self, page: &HttpResponse) -> bool {
        !self.portal.is_sso_url(&page.url) && !has_login_form(&page.text())
    }

    /// Log in unless already authenticated. A restored session is checked
    /// with the probe page first and only falls back to a full login if the
    /// probe fails.
    pub async fn ensure_login(&mut self) -> Result<bool, SessionError> {
        Ok(self.ensure_login_outcome().await?.is_success())
    }

    async fn ensure_login_outcome(&mut self) -> Result<LoginOutcome, SessionError> {
        if self.state.logged_in {
            return Ok(LoginOutcome::Authenticated);
        }
        if self.state.restored && self.verify_restored().await? {
            return Ok(LoginOutcome::Authenticated);
        }
        self.login().await
    }

    async fn verify_restored(&mut self) -> Result<bool, SessionError> {
        self.set_phase(LoginPhase::Verifying);
        let probe = match self.http.get(self.portal.probe_url.clone()).await {
            Ok(probe) => probe,
            Err(e) => {
                self.set_phase(LoginPhase::Anonymous);
                return Err(e.into());
            }
        };

        self.state.restored = false;
        if self.is_authenticated_page(&probe) {
            info!(username = ?self.state.username, "saved session is still valid");
            self.state.logged_in = true;
            self.state.last_outcome = Some(LoginOutcome::Authenticated);
            self.set_phase(LoginPhase::Authenticated);
            Ok(true)
        } else {
            info!("saved session has expired, logging in again");
            self.http.clear_cookies();
            self.set_phase(LoginPhase::Anonymous);
            Ok(false)
        }
    }

    // -- facade --

    /// Authenticated GET. `path` may be absolute or relative to the portal
    /// entry URL.
    pub async fn get(
        &mut self,
        path: &str,
        options: RequestOptions,
    ) -> Result<HttpResponse, SessionError> {
        self.request(Method::GET, path, options).await
    }

    /// Authenticated POST with `options.form` as urlencoded body.
    pub async fn post(
        &mut self,
        path: &str,
        options: RequestOptions,
    ) -> Result<HttpResponse, SessionError> {
        self.request(Method::POST, path, options).await
    }

    async fn request(
        &mut self,
        method: Method,
        path: &str,
        options: RequestOptions,
    ) -> Result<HttpResponse, SessionError> {
        let outcome = self.ensure_login_outcome().await?;
        if !outcome.is_success() {
            return Err(SessionError::LoginFailed(outcome));
        }

        let request = build_request(&self.portal.entry_url, method, path, options)?;
        let response = self.http.execute(request).await?;

        if self.portal.is_sso_url(&response.url) {
            warn!(url = %response.url, "request bounced to SSO server, session expired");
            self.mark_anonymous();
            return Err(SessionError::SessionExpired {
                url: response.url.to_string(),
            });
        }
        Ok(response)
    }

    // -- persistence --

    fn restore(&mut self) {
        let Some(record) = self.store.as_ref().and_then(|s| s.load()) else {
            return;
        };
        info!(
            username = %record.username,
            saved_at = %record.saved_at,
            "restored saved session, pending verification"
        );
        self.http.replace_jar(CookieJar::from_cookies(record.cookies));
        self.state.username = Some(record.username);
        self.state.saved_at = Some(record.saved_at);
        self.state.restored = true;
    }

    fn persist(&mut self, username: &str) {
        let Some(store) = &self.store else {
            return;
        };
        let record = SessionRecord {
            cookies: self.http.jar().cookies().to_vec(),
            username: username.to_string(),
            saved_at: self.clock.now(),
        };
        match store.save(&record) {
            Ok(()) => self.state.saved_at = Some(record.saved_at),
            Err(e) => warn!("failed to save session: {e}"),
        }
    }

    /// Forget the session: delete the saved record, drop cookies, and mark
    /// the engine unauthenticated.
    pub fn clear(&mut self) -> Result<(), SessionError> {
        self.http.clear_cookies();
        self.state = SessionState::default();
        if let Some(store) = &self.store {
            store.clear()?;
        }
        info!("session cleared");
        Ok(())
    }

    // -- state transitions --

    fn set_phase(&mut self, phase: LoginPhase) {
        if self.state.phase != phase {
            debug!(from = ?self.state.phase, to = ?phase, "login phase");
        }
        self.state.phase = phase;
    }

    fn mark_anonymous(&mut self) {
        self.state.logged_in = false;
        self.set_phase(LoginPhase::Anonymous);
    }

    fn mark_authenticated(&mut self, credentials: &Credentials) {
        info!(username = %credentials.username, "login verified");
        self.state.logged_in = true;
        self.state.username = Some(credentials.username.clone());
        self.set_phase(LoginPhase::Authenticated);
        self.credentials.remember(credentials);
        self.persist(&credentials.username);
    }
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn login_form(username: &str, password: String, execution: &str) -> Vec<(String, String)> {
    [
        ("username", username.to_string()),
        ("password", password),
        ("captcha", String::new()),
        ("_eventId", "submit".to_string()),
        ("cllt", "userNameLogin".to_string()),
        ("dllt", "generalLogin".to_string()),
        ("lt", String::new()),
        ("execution", execution.to_string()),
    ]
    .into_iter()
    .map(|(k, v)| (k.to_string(), v))
    .collect()
}

fn build_request(
    base: &Url,
    method: Method,
    path: &str,
    options: RequestOptions,
) -> Result<HttpRequest, SessionError> {
    let mut url = base
        .join(path)
        .map_err(|e| SessionError::InvalidRequest(format!("bad URL `{path}`: {e}")))?;
    if !options.query.is_empty() {
        url.query_pairs_mut().extend_pairs(options.query.iter());
    }

    let mut headers = HeaderMap::new();
    for (name, value) in &options.headers {
        let name = HeaderName::from_bytes(name.as_bytes())
            .map_err(|e| SessionError::InvalidRequest(format!("bad header name `{name}`: {e}")))?;
        let value = HeaderValue::from_str(value)
            .map_err(|e| SessionError::InvalidRequest(format!("bad header value: {e}")))?;
        headers.append(name, value);
    }

    let body = if method == Method::POST {
        Body::Form(options.form)
    } else {
        Body::Empty
    };

    Ok(HttpRequest {
        method,
        url,
        headers,
        body,
    })
}

// ---------------------------------------------------------------------------
// Unit tests
// ---------------------------------------------------------------------------
