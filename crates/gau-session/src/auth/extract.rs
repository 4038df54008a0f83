// Markup scanning for the SSO pages: login form parameters and script
// redirects. Everything that pattern-matches portal HTML lives here.

use std::sync::OnceLock;

use regex::Regex;

/// Container id of the username/password login form on the SSO page.
pub const PASSWORD_FORM_MARKER: &str = "pwdLoginDiv";

const SALT_INPUT_ID: &str = "pwdEncryptSalt";
const EXECUTION_INPUT_NAME: &str = "execution";

/// Values scraped from the SSO entry page.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LoginParams {
    /// Encryption salt. Empty when the page does not provide one.
    pub salt: String,
    /// One-time form token. Empty when the password form is missing.
    pub execution: String,
}

impl LoginParams {
    pub fn has_execution(&self) -> bool {
        !self.execution.is_empty()
    }
}

fn input_tag_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?is)<input\b[^>]*>").expect("valid input tag regex"))
}

fn attribute_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r#"(?s)([A-Za-z_:][-A-Za-z0-9_:.]*)\s*=\s*(?:"([^"]*)"|'([^']*)')"#)
            .expect("valid attribute regex")
    })
}

fn form_marker_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(&format!(r#"(?:^|\s)id\s*=\s*["']{PASSWORD_FORM_MARKER}["']"#))
            .expect("valid form marker regex")
    })
}

fn js_redirect_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r#"window\.location\.href\s*=\s*(?:'([^']+)'|"([^"]+)")"#)
            .expect("valid redirect regex")
    })
}

/// Attribute value of a single `<input ...>` tag, case-insensitive on the
/// attribute name.
fn attribute<'a>(tag: &'a str, name: &str) -> Option<&'a str> {
    attribute_re().captures_iter(tag).find_map(|caps| {
        let key = caps.get(1)?.as_str();
        if key.eq_ignore_ascii_case(name) {
            caps.get(2).or_else(|| caps.get(3)).map(|m| m.as_str())
        } else {
            None
        }
    })
}

/// Value of the first input in `html` whose `key` attribute equals `expected`.
fn input_value<'a>(html: &'a str, key: &str, expected: &str) -> Option<&'a str> {
    input_tag_re()
        .find_iter(html)
        .map(|m| m.as_str())
        .find(|tag| attribute(tag, key) == Some(expected))
        .and_then(|tag| attribute(tag, "value"))
}

/// Extract the salt and execution token from the SSO entry page.
///
/// The salt may sit anywhere in the page. The execution token is only taken
/// from the password-login section (from the `pwdLoginDiv` container to the
/// end of the document) because other login forms on the same page carry
/// their own, unrelated tokens.
pub fn extract_login_params(html: &str) -> LoginParams {
    let salt = input_value(html, "id", SALT_INPUT_ID)
        .unwrap_or_default()
        .to_string();

    let execution = form_marker_re()
        .find(html)
        .and_then(|m| input_value(&html[m.start()..], "name", EXECUTION_INPUT_NAME))
        .unwrap_or_default()
        .to_string();

    LoginParams { salt, execution }
}

/// Target of a `window.location.href = '...'` script redirect, if present.
pub fn find_js_redirect(html: &str) -> Option<&str> {
    let caps = js_redirect_re().captures(html)?;
    caps.get(1).or_else(|| caps.get(2)).map(|m| m.as_str())
}

/// True if the page still shows the SSO password form.
pub fn has_login_form(html: &str) -> bool {
    html.contains(PASSWORD_FORM_MARKER)
}

// ---------------------------------------------------------------------------
// Unit tests
// ---------------------------------------------------------------------------
