// `gau` command-line front-end over the session engine.
//
// Startup sequence:
// 1. Parse arguments
// 2. Initialize tracing (stderr)
// 3. Load config, apply command-line overrides
// 4. Build the session engine (restores a saved session if present)
// 5. Run the subcommand

use std::fs;
use std::io::{self, IsTerminal, Write};
use std::path::PathBuf;

use anyhow::{bail, Context};
use clap::{Parser, Subcommand};
use gau_session::config;
use gau_session::{LoginOutcome, RequestOptions, SessionEngine};
use tracing::{debug, info};

#[derive(Debug, Parser)]
#[command(name = "gau", version, about = "GSAU portal session tool")]
struct Cli {
    /// Portal username (overrides GSAU_USERNAME and config.ini)
    #[arg(long, global = true)]
    username: Option<String>,

    /// Portal password (overrides GSAU_PASSWORD and config.ini)
    #[arg(long, global = true)]
    password: Option<String>,

    /// Never prompt for missing credentials
    #[arg(long, global = true)]
    no_prompt: bool,

    /// Do not read or write the session file
    #[arg(long, global = true)]
    no_persist: bool,

    /// Session file location (overrides GSAU_SESSION_FILE and config.ini)
    #[arg(long, global = true, value_name = "FILE")]
    session_file: Option<PathBuf>,

    /// Per-request timeout in seconds
    #[arg(
        long,
        global = true,
        value_name = "SECS",
        value_parser = clap::value_parser!(u64).range(1..)
    )]
    timeout: Option<u64>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Log in (or verify the saved session)
    Login,
    /// Forget the saved session
    Logout,
    /// Print session status as JSON
    Status,
    /// Fetch a portal page with the authenticated session
    Fetch(FetchArgs),
}

#[derive(Debug, clap::Args)]
struct FetchArgs {
    /// Absolute URL or path relative to the portal entry page
    path: String,

    /// Send a POST instead of a GET
    #[arg(long)]
    post: bool,

    /// Form field for POST bodies, repeatable
    #[arg(long = "form", value_name = "KEY=VALUE", value_parser = parse_pair)]
    form: Vec<(String, String)>,

    /// Query parameter, repeatable
    #[arg(long = "query", value_name = "KEY=VALUE", value_parser = parse_pair)]
    query: Vec<(String, String)>,

    /// Write the body here instead of stdout
    #[arg(long, short = 'o', value_name = "FILE")]
    output: Option<PathBuf>,
}

fn parse_pair(raw: &str) -> Result<(String, String), String> {
    match raw.split_once('=') {
        Some((key, value)) if !key.is_empty() => Ok((key.to_string(), value.to_string())),
        _ => Err(format!("expected KEY=VALUE, got `{raw}`")),
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    init_tracing()?;
    debug!(command = ?cli.command, "gau starting");

    let mut config = config::load_config().context("failed to load configuration")?;
    if let Some(secs) = cli.timeout {
        config.http.timeout_secs = secs;
    }
    match &config.source {
        Some(path) => info!("Config loaded from {}", path.display()),
        None => info!("No config file found, using defaults"),
    }

    let mut builder = SessionEngine::builder(config)
        .interactive(!cli.no_prompt)
        .persist(!cli.no_persist);
    if let Some(username) = cli.username {
        builder = builder.username(username);
    }
    if let Some(password) = cli.password {
        builder = builder.password(password);
    }
    if let Some(path) = cli.session_file {
        builder = builder.session_file(path);
    }
    let mut engine = builder.build().context("failed to initialize session engine")?;

    match cli.command {
        Command::Login => login(&mut engine).await,
        Command::Logout => {
            engine.clear().context("failed to clear session")?;
            eprintln!("Logged out.");
            Ok(())
        }
        Command::Status => {
            let status = serde_json::to_string_pretty(&engine.status())?;
            println!("{status}");
            Ok(())
        }
        Command::Fetch(args) => fetch(&mut engine, args).await,
    }
}

async fn login(engine: &mut SessionEngine) -> anyhow::Result<()> {
    if engine.ensure_login().await.context("login failed")? {
        eprintln!("Logged in as {}.", engine.username().unwrap_or("<unknown>"));
        return Ok(());
    }
    let reason = engine
        .last_outcome()
        .unwrap_or(LoginOutcome::AuthenticationRejected);
    bail!("login failed: {reason}")
}

async fn fetch(engine: &mut SessionEngine, args: FetchArgs) -> anyhow::Result<()> {
    let options = RequestOptions {
        query: args.query,
        form: args.form,
        headers: Vec::new(),
    };
    let result = if args.post {
        engine.post(&args.path, options).await
    } else {
        engine.get(&args.path, options).await
    };
    let response = result.with_context(|| format!("request to `{}` failed", args.path))?;

    eprintln!("{} {}", response.status, response.url);
    match args.output {
        Some(path) => fs::write(&path, &response.body)
            .with_context(|| format!("failed to write {}", path.display()))?,
        None => {
            let mut stdout = io::stdout().lock();
            stdout.write_all(&response.body)?;
            stdout.flush()?;
        }
    }
    Ok(())
}

/// Initialize tracing to stderr; stdout carries command output.
fn init_tracing() -> anyhow::Result<()> {
    use tracing_subscriber::fmt;
    use tracing_subscriber::EnvFilter;

    let subscriber = fmt::Subscriber::builder()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("gau=warn,gau_session=info")),
        )
        .with_writer(io::stderr)
        .with_ansi(io::stderr().is_terminal())
        .with_target(true)
        .finish();

    tracing::subscriber::set_global_default(subscriber)
        .context("failed to set tracing subscriber")?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn parse_pair_splits_on_first_equals() {
        assert_eq!(
            parse_pair("a=b=c"),
            Ok(("a".to_string(), "b=c".to_string()))
        );
        assert_eq!(parse_pair("empty="), Ok(("empty".to_string(), String::new())));
        assert!(parse_pair("novalue").is_err());
        assert!(parse_pair("=v").is_err());
    }

    #[test]
    fn global_flags_work_after_subcommand() {
        let cli = Cli::try_parse_from([
            "gau",
            "fetch",
            "/jsxsd/xskb/xskb_list.do",
            "--query",
            "xnxq01id=2024-2025-1",
            "--no-prompt",
            "--timeout",
            "5",
        ])
        .unwrap();
        assert!(cli.no_prompt);
        assert_eq!(cli.timeout, Some(5));
        let Command::Fetch(args) = cli.command else {
            panic!("expected fetch");
        };
        assert!(!args.post);
        assert_eq!(
            args.query,
            vec![("xnxq01id".to_string(), "2024-2025-1".to_string())]
        );
    }

    #[test]
    fn zero_timeout_is_rejected() {
        assert!(Cli::try_parse_from(["gau", "--timeout", "0", "status"]).is_err());
    }
}
