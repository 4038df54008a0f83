// Configuration loading and parsing (config.ini) plus session-file path
// resolution.

use std::path::{Path, PathBuf};
use std::time::Duration;

use ini::{Ini, ParseOption};
use reqwest::Url;
use thiserror::Error;
use tracing::{debug, info};

use crate::auth::PartialCredentials;

pub const SESSION_FILE_ENV: &str = "GSAU_SESSION_FILE";

pub const CONFIG_FILE_NAME: &str = "config.ini";
pub const EXAMPLE_CONFIG_FILE_NAME: &str = "config.example.ini";

pub const DEFAULT_ENTRY_URL: &str = "https://jwgl.gsau.edu.cn/";
pub const DEFAULT_LOGIN_URL: &str = "https://authserver.gsau.edu.cn/authserver/login?\
service=https%3A%2F%2Fweb.gsau.edu.cn%2Fwengine-auth%2Flogin%3Fcas_login%3Dtrue";
pub const DEFAULT_PROBE_URL: &str = "https://jwgl.gsau.edu.cn/jsxsd/framework/xsMain.jsp";
pub const DEFAULT_SSO_ROOT: &str = "https://authserver.gsau.edu.cn/";
pub const DEFAULT_TIMEOUT_SECS: u64 = 30;

// ---------------------------------------------------------------------------
// Error types
// ---------------------------------------------------------------------------

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    ReadError {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("failed to parse config file {path}: {source}")]
    ParseError {
        path: PathBuf,
        source: ini::ParseError,
    },

    #[error("validation error for field `{field}`: {message}")]
    ValidationError { field: String, message: String },
}

// ---------------------------------------------------------------------------
// Config structs
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default)]
pub struct Config {
    pub auth: AuthConfig,
    pub session: SessionConfig,
    pub http: HttpConfig,
    pub portal: PortalConfig,
    /// The file this config was read from, if any.
    pub source: Option<PathBuf>,
}

/// `[auth]` section.
#[derive(Clone, Default)]
pub struct AuthConfig {
    pub username: Option<String>,
    pub password: Option<String>,
}

impl std::fmt::Debug for AuthConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuthConfig")
            .field("username", &self.username)
            .field("password", &self.password.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}

impl AuthConfig {
    pub fn credentials(&self) -> PartialCredentials {
        PartialCredentials::new(self.username.clone(), self.password.clone())
    }
}

/// `[session]` section.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    pub file: Option<PathBuf>,
    pub persist: bool,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            file: None,
            persist: true,
        }
    }
}

/// `[http]` section.
#[derive(Debug, Clone)]
pub struct HttpConfig {
    pub timeout_secs: u64,
}

impl HttpConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            timeout_secs: DEFAULT_TIMEOUT_SECS,
        }
    }
}

/// `[portal]` section: the URLs the login flow talks to.
#[derive(Debug, Clone, PartialEq)]
pub struct PortalConfig {
    /// Portal landing page; redirects to the SSO login page when anonymous.
    pub entry_url: Url,
    /// SSO form submission endpoint.
    pub login_url: Url,
    /// Authenticated page used to verify a login.
    pub probe_url: Url,
    /// Any URL under this root (same host and port, path prefix) belongs to
    /// the SSO server.
    pub sso_root: Url,
}

impl Default for PortalConfig {
    fn default() -> Self {
        Self {
            entry_url: Url::parse(DEFAULT_ENTRY_URL).expect("valid default entry URL"),
            login_url: Url::parse(DEFAULT_LOGIN_URL).expect("valid default login URL"),
            probe_url: Url::parse(DEFAULT_PROBE_URL).expect("valid default probe URL"),
            sso_root: Url::parse(DEFAULT_SSO_ROOT).expect("valid default SSO root"),
        }
    }
}

impl PortalConfig {
    /// True if `url` is served by the SSO server.
    pub fn is_sso_url(&self, url: &Url) -> bool {
        url.host_str() == self.sso_root.host_str()
            && url.port_or_known_default() == self.sso_root.port_or_known_default()
            && url.path().starts_with(self.sso_root.path())
    }
}

// ---------------------------------------------------------------------------
// Loading logic
// ---------------------------------------------------------------------------

/// Candidate config locations in lookup order: working directory, then the
/// install root, then the example variants of both.
pub fn candidate_paths(cwd: &Path, install_root: Option<&Path>) -> Vec<PathBuf> {
    let mut paths = Vec::with_capacity(4);
    for name in [CONFIG_FILE_NAME, EXAMPLE_CONFIG_FILE_NAME] {
        paths.push(cwd.join(name));
        if let Some(root) = install_root {
            paths.push(root.join(name));
        }
    }
    paths
}

/// First candidate that exists on disk.
pub fn find_config_file(candidates: &[PathBuf]) -> Option<PathBuf> {
    candidates.iter().find(|p| p.is_file()).cloned()
}

/// Load and validate a config file.
pub fn load_config_from(path: &Path) -> Result<Config, ConfigError> {
    let text = std::fs::read_to_string(path).map_err(|source| ConfigError::ReadError {
        path: path.to_path_buf(),
        source,
    })?;
    let mut config = parse_config(&text, path)?;
    config.source = Some(path.to_path_buf());
    validate(&config)?;
    Ok(config)
}

/// Convenience wrapper: discover `config.ini` relative to the working
/// directory and the executable's directory. No file means defaults.
pub fn load_config() -> Result<Config, ConfigError> {
    let cwd = std::env::current_dir().unwrap_or_else(|_| PathBuf::from("."));
    let install_root = std::env::current_exe()
        .ok()
        .and_then(|exe| exe.parent().map(Path::to_path_buf));

    let candidates = candidate_paths(&cwd, install_root.as_deref());
    match find_config_file(&candidates) {
        Some(path) => {
            info!("Loading config from {}", path.display());
            load_config_from(&path)
        }
        None => {
            debug!("no config file found, using defaults");
            Ok(Config::default())
        }
    }
}

fn parse_config(text: &str, path: &Path) -> Result<Config, ConfigError> {
    let option = ParseOption {
        enabled_escape: false,
        ..ParseOption::default()
    };
    let ini = Ini::load_from_str_opt(text, option).map_err(|source| ConfigError::ParseError {
        path: path.to_path_buf(),
        source,
    })?;

    let get = |section: &str, key: &str| -> Option<String> {
        ini.section(Some(section))
            .and_then(|props| props.get(key))
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty())
    };

    let auth = AuthConfig {
        username: get("auth", "username"),
        password: get("auth", "password"),
    };

    let persist = match get("session", "persist") {
        Some(raw) => parse_bool(&raw).ok_or_else(|| ConfigError::ValidationError {
            field: "session.persist".into(),
            message: format!("expected true/false, got `{raw}`"),
        })?,
        None => true,
    };
    let session = SessionConfig {
        file: get("session", "file").map(PathBuf::from),
        persist,
    };

    let timeout_secs = match get("http", "timeout_secs") {
        Some(raw) => raw.parse().map_err(|_| ConfigError::ValidationError {
            field: "http.timeout_secs".into(),
            message: format!("expected a whole number of seconds, got `{raw}`"),
        })?,
        None => DEFAULT_TIMEOUT_SECS,
    };

    let defaults = PortalConfig::default();
    let url_field = |key: &str, fallback: Url| -> Result<Url, ConfigError> {
        match get("portal", key) {
            Some(raw) => Url::parse(&raw).map_err(|e| ConfigError::ValidationError {
                field: format!("portal.{key}"),
                message: format!("invalid URL `{raw}`: {e}"),
            }),
            None => Ok(fallback),
        }
    };
    let portal = PortalConfig {
        entry_url: url_field("entry_url", defaults.entry_url)?,
        login_url: url_field("login_url", defaults.login_url)?,
        probe_url: url_field("probe_url", defaults.probe_url)?,
        sso_root: url_field("sso_root", defaults.sso_root)?,
    };

    Ok(Config {
        auth,
        session,
        http: HttpConfig { timeout_secs },
        portal,
        source: None,
    })
}

fn parse_bool(raw: &str) -> Option<bool> {
    match raw.to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

// ---------------------------------------------------------------------------
// Validation
// ---------------------------------------------------------------------------

fn validate(config: &Config) -> Result<(), ConfigError> {
    if config.http.timeout_secs == 0 {
        return Err(ConfigError::ValidationError {
            field: "http.timeout_secs".into(),
            message: "must be greater than 0".into(),
        });
    }

    let portal = &config.portal;
    let urls: &[(&str, &Url)] = &[
        ("portal.entry_url", &portal.entry_url),
        ("portal.login_url", &portal.login_url),
        ("portal.probe_url", &portal.probe_url),
        ("portal.sso_root", &portal.sso_root),
    ];
    for (name, url) in urls {
        if !matches!(url.scheme(), "http" | "https") || url.host_str().is_none() {
            return Err(ConfigError::ValidationError {
                field: name.to_string(),
                message: format!("must be an absolute http(s) URL, got {url}"),
            });
        }
    }

    Ok(())
}

// ---------------------------------------------------------------------------
// Session file location
// ---------------------------------------------------------------------------

/// `~/.gautools/session.json`, or `None` if no home directory is known.
pub fn default_session_path() -> Option<PathBuf> {
    directories::BaseDirs::new().map(|dirs| dirs.home_dir().join(".gautools").join("session.json"))
}

/// Session file precedence: environment override > `[session] file` >
/// default under the home directory.
pub fn resolve_session_path(env_override: Option<String>, config: &Config) -> Option<PathBuf> {
    env_override
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
        .map(PathBuf::from)
        .or_else(|| config.session.file.clone())
        .or_else(default_session_path)
}

// ---------------------------------------------------------------------------
// Unit tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    fn write_config(dir: &TempDir, name: &str, body: &str) -> PathBuf {
        let path = dir.path().join(name);
        fs::write(&path, body).unwrap();
        path
    }

    // -- parsing --

    #[test]
    fn loads_all_sections() {
        let dir = TempDir::new().unwrap();
        let path = write_config(
            &dir,
            CONFIG_FILE_NAME,
            "[auth]\nusername = 2021001\npassword = pa\\ssword\n\n\
             [session]\nfile = /tmp/gau-session.json\npersist = no\n\n\
             [http]\ntimeout_secs = 12\n\n\
             [portal]\nprobe_url = https://jwgl.example.edu/probe\n",
        );

        let config = load_config_from(&path).expect("should load valid config");
        assert_eq!(config.auth.username.as_deref(), Some("2021001"));
        assert_eq!(config.auth.password.as_deref(), Some("pa\\ssword"));
        assert_eq!(config.session.file, Some(PathBuf::from("/tmp/gau-session.json")));
        assert!(!config.session.persist);
        assert_eq!(config.http.timeout(), Duration::from_secs(12));
        assert_eq!(config.portal.probe_url.as_str(), "https://jwgl.example.edu/probe");
        assert_eq!(config.portal.entry_url.as_str(), DEFAULT_ENTRY_URL);
        assert_eq!(config.source, Some(path));
    }

    #[test]
    fn missing_sections_and_keys_are_absent() {
        let dir = TempDir::new().unwrap();
        let path = write_config(&dir, CONFIG_FILE_NAME, "[other]\nkey = value\n");

        let config = load_config_from(&path).unwrap();
        assert!(config.auth.username.is_none());
        assert!(config.auth.password.is_none());
        assert!(config.session.file.is_none());
        assert!(config.session.persist);
        assert_eq!(config.http.timeout_secs, DEFAULT_TIMEOUT_SECS);
        assert_eq!(config.portal, PortalConfig::default());
    }

    #[test]
    fn blank_values_are_absent() {
        let dir = TempDir::new().unwrap();
        let path = write_config(&dir, CONFIG_FILE_NAME, "[auth]\nusername =\npassword =   \n");
        let config = load_config_from(&path).unwrap();
        assert!(config.auth.credentials().username.is_none());
        assert!(config.auth.credentials().password.is_none());
    }

    #[test]
    fn rejects_zero_timeout() {
        let dir = TempDir::new().unwrap();
        let path = write_config(&dir, CONFIG_FILE_NAME, "[http]\ntimeout_secs = 0\n");
        match load_config_from(&path).unwrap_err() {
            ConfigError::ValidationError { field, .. } => assert_eq!(field, "http.timeout_secs"),
            other => panic!("expected ValidationError, got: {other}"),
        }
    }

    #[test]
    fn rejects_non_numeric_timeout() {
        let dir = TempDir::new().unwrap();
        let path = write_config(&dir, CONFIG_FILE_NAME, "[http]\ntimeout_secs = soon\n");
        match load_config_from(&path).unwrap_err() {
            ConfigError::ValidationError { field, .. } => assert_eq!(field, "http.timeout_secs"),
            other => panic!("expected ValidationError, got: {other}"),
        }
    }

    #[test]
    fn rejects_bad_persist_flag() {
        let dir = TempDir::new().unwrap();
        let path = write_config(&dir, CONFIG_FILE_NAME, "[session]\npersist = maybe\n");
        match load_config_from(&path).unwrap_err() {
            ConfigError::ValidationError { field, .. } => assert_eq!(field, "session.persist"),
            other => panic!("expected ValidationError, got: {other}"),
        }
    }

    #[test]
    fn rejects_invalid_portal_url() {
        let dir = TempDir::new().unwrap();
        let path = write_config(&dir, CONFIG_FILE_NAME, "[portal]\nentry_url = not a url\n");
        match load_config_from(&path).unwrap_err() {
            ConfigError::ValidationError { field, .. } => assert_eq!(field, "portal.entry_url"),
            other => panic!("expected ValidationError, got: {other}"),
        }
    }

    #[test]
    fn rejects_non_http_portal_url() {
        let dir = TempDir::new().unwrap();
        let path = write_config(&dir, CONFIG_FILE_NAME, "[portal]\nsso_root = ftp://sso.example/\n");
        match load_config_from(&path).unwrap_err() {
            ConfigError::ValidationError { field, .. } => assert_eq!(field, "portal.sso_root"),
            other => panic!("expected ValidationError, got: {other}"),
        }
    }

    #[test]
    fn unreadable_path_is_read_error() {
        let dir = TempDir::new().unwrap();
        let err = load_config_from(&dir.path().join("absent.ini")).unwrap_err();
        assert!(matches!(err, ConfigError::ReadError { .. }));
    }

    // -- discovery --

    #[test]
    fn candidate_order_is_cwd_root_then_examples() {
        let cwd = Path::new("/work");
        let root = Path::new("/opt/gau");
        let paths = candidate_paths(cwd, Some(root));
        assert_eq!(
            paths,
            vec![
                PathBuf::from("/work/config.ini"),
                PathBuf::from("/opt/gau/config.ini"),
                PathBuf::from("/work/config.example.ini"),
                PathBuf::from("/opt/gau/config.example.ini"),
            ]
        );
    }

    #[test]
    fn first_existing_candidate_wins() {
        let cwd = TempDir::new().unwrap();
        let root = TempDir::new().unwrap();
        write_config(&root, CONFIG_FILE_NAME, "[auth]\nusername = root\n");
        write_config(&cwd, EXAMPLE_CONFIG_FILE_NAME, "[auth]\nusername = example\n");

        let candidates = candidate_paths(cwd.path(), Some(root.path()));
        let found = find_config_file(&candidates).unwrap();
        assert_eq!(found, root.path().join(CONFIG_FILE_NAME));

        write_config(&cwd, CONFIG_FILE_NAME, "[auth]\nusername = cwd\n");
        let found = find_config_file(&candidates).unwrap();
        assert_eq!(found, cwd.path().join(CONFIG_FILE_NAME));
    }

    #[test]
    fn no_candidates_found() {
        let cwd = TempDir::new().unwrap();
        assert!(find_config_file(&candidate_paths(cwd.path(), None)).is_none());
    }

    // -- session path --

    #[test]
    fn session_path_precedence() {
        let mut config = Config::default();
        config.session.file = Some(PathBuf::from("/from/config.json"));

        assert_eq!(
            resolve_session_path(Some("/from/env.json".into()), &config),
            Some(PathBuf::from("/from/env.json"))
        );
        assert_eq!(
            resolve_session_path(Some("  ".into()), &config),
            Some(PathBuf::from("/from/config.json"))
        );
        assert_eq!(
            resolve_session_path(None, &config),
            Some(PathBuf::from("/from/config.json"))
        );

        config.session.file = None;
        assert_eq!(resolve_session_path(None, &config), default_session_path());
    }

    // -- portal --

    #[test]
    fn sso_url_detection() {
        let portal = PortalConfig::default();
        let url = |s: &str| Url::parse(s).unwrap();
        assert!(portal.is_sso_url(&url("https://authserver.gsau.edu.cn/authserver/login")));
        assert!(portal.is_sso_url(&url("https://authserver.gsau.edu.cn/other")));
        assert!(!portal.is_sso_url(&url("https://jwgl.gsau.edu.cn/jsxsd/")));
        assert!(!portal.is_sso_url(&url("http://authserver.gsau.edu.cn:8080/")));
    }

    #[test]
    fn sso_root_path_prefix() {
        let portal = PortalConfig {
            sso_root: Url::parse("http://127.0.0.1:9000/authserver/").unwrap(),
            ..PortalConfig::default()
        };
        let url = |s: &str| Url::parse(s).unwrap();
        assert!(portal.is_sso_url(&url("http://127.0.0.1:9000/authserver/login?x=1")));
        assert!(!portal.is_sso_url(&url("http://127.0.0.1:9000/jsxsd/main")));
        assert!(!portal.is_sso_url(&url("http://127.0.0.1:9001/authserver/login")));
    }
}
