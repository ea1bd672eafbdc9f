//! tokenkeeper CLI - Access tokens for named systems
//!
//! This binary keeps one access token per system and can:
//! - Log in with the OAuth device flow
//! - Print a usable access token, refreshing or re-authenticating first
//! - Show the login status of a system
//! - Show where settings and credentials are read from

mod prompt;

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use tokenkeeper_core::{
    AuthError, AuthSettings, InterruptGuard, Session, SystemRecord, secrets, settings, token,
};

use crate::prompt::TerminalObserver;

/// Exit status used when the user interrupts a command.
const EXIT_INTERRUPTED: i32 = 130;

#[derive(Parser)]
#[command(name = "tokenkeeper")]
#[command(author = "Tokenkeeper Developers")]
#[command(version)]
#[command(about = "Keep access tokens for your systems fresh")]
#[command(long_about = "
tokenkeeper caches one access token per system and hands out a usable
one on demand: it is reused while valid, renewed with the stored refresh
token when close to expiry, and replaced through a browser login when
renewal is impossible or the requested scopes changed.

Quick start:
  1. Log in:          tokenkeeper login --system prod
  2. Use the token:   curl -H \"Authorization: Bearer $(tokenkeeper token --system prod)\" ...
")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// System whose token to use
    #[arg(short, long, global = true, env = "TOKENKEEPER_SYSTEM", default_value = "public")]
    pub system: String,

    /// Credential file location
    #[arg(long, global = true, env = "TOKENKEEPER_CONFIG_PATH")]
    pub config_path: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Output format
    #[arg(short, long, global = true, default_value = "text")]
    pub format: OutputFormat,
}

#[derive(Clone, Copy, ValueEnum)]
pub enum OutputFormat {
    /// Human-readable text output
    Text,
    /// JSON output for scripting
    Json,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Log in to a system using the device flow
    Login,

    /// Print a valid access token, renewing it if needed
    Token,

    /// Show login status
    Status,

    /// Show configuration paths and settings
    Config,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize logging
    let log_level = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| format!("tokenkeeper={},tokenkeeper_core={}", log_level, log_level).into()),
        )
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let interrupt = InterruptGuard::on_interrupt();

    let result = match cli.command {
        Commands::Login => cmd_login(&cli, &interrupt).await,
        Commands::Token => cmd_token(&cli, &interrupt).await,
        Commands::Status => cmd_status(&cli),
        Commands::Config => cmd_config(&cli),
    };

    if let Err(e) = &result {
        let cancelled = e
            .downcast_ref::<AuthError>()
            .is_some_and(AuthError::is_cancelled);
        if cancelled || interrupt.is_interrupted() {
            eprintln!("\nLogin cancelled.");
            std::process::exit(EXIT_INTERRUPTED);
        }
    }

    result
}

fn credentials_path(cli: &Cli) -> Result<PathBuf> {
    match &cli.config_path {
        Some(path) => Ok(path.clone()),
        None => settings::default_credentials_path()
            .context("could not determine the configuration directory; pass --config-path"),
    }
}

fn open_session(cli: &Cli) -> Result<Session> {
    let path = credentials_path(cli)?;
    let session = Session::open(path, Some(cli.system.clone()))
        .context("failed to load tokenkeeper settings")?;
    Ok(session.with_observer(Arc::new(TerminalObserver::new(cli.format))))
}

async fn cmd_login(cli: &Cli, interrupt: &InterruptGuard) -> Result<()> {
    let session = open_session(cli)?;
    let record = session.login(interrupt.token()).await?;

    if let OutputFormat::Json = cli.format {
        println!(
            "{}",
            serde_json::json!({
                "status": "logged_in",
                "system": cli.system,
                "expires_at": record.expires_at,
                "scopes": record.scopes,
            })
        );
    }
    Ok(())
}

async fn cmd_token(cli: &Cli, interrupt: &InterruptGuard) -> Result<()> {
    let session = open_session(cli)?;
    let record = session.prepare_system(interrupt.token()).await?;

    match cli.format {
        OutputFormat::Text => println!("{}", record.access_token),
        OutputFormat::Json => {
            println!(
                "{}",
                serde_json::json!({
                    "system": cli.system,
                    "access_token": record.access_token,
                    "expires_at": record.expires_at,
                })
            );
        }
    }
    Ok(())
}

fn cmd_status(cli: &Cli) -> Result<()> {
    let session = open_session(cli)?;
    let logged_in = session.is_logged_in();
    let record = session.system_record().ok();
    let subject = record
        .as_ref()
        .and_then(|r| token::inspect(&r.access_token, session.issuer()).ok())
        .and_then(|claims| claims.sub);
    let storage = session.secret_store().describe();

    match cli.format {
        OutputFormat::Text => {
            println!("System:  {}", cli.system);
            if logged_in {
                println!("Status:  Logged in");
                println!("Subject: {}", subject.as_deref().unwrap_or("-"));
            } else {
                println!("Status:  Not logged in");
            }
            if let Some(record) = &record {
                println!("Expires: {}", describe_expiry(record));
                println!("Scopes:  {}", describe_scopes(record));
            }
            println!();
            println!("Credentials:   {}", session.path().display());
            println!("Refresh store: {}", storage);
            if !logged_in {
                println!();
                println!("Run 'tokenkeeper login --system {}' to authenticate.", cli.system);
            }
        }
        OutputFormat::Json => {
            println!(
                "{}",
                serde_json::json!({
                    "system": cli.system,
                    "logged_in": logged_in,
                    "subject": subject,
                    "expires_at": record.as_ref().map(|r| r.expires_at),
                    "scopes": record.as_ref().and_then(|r| r.scopes.clone()),
                    "credentials_path": session.path(),
                    "storage_info": storage,
                })
            );
        }
    }
    Ok(())
}

fn cmd_config(cli: &Cli) -> Result<()> {
    let settings = AuthSettings::load()?;
    let settings_path = settings::settings_file_path()
        .map(|p| p.display().to_string())
        .unwrap_or_else(|| "(unavailable)".to_string());
    let credentials = credentials_path(cli)?;
    let storage = credentials
        .parent()
        .map(|dir| secrets::default_secret_store(dir).describe())
        .unwrap_or_default();

    let rows = [
        ("Audience", settings::ENV_AUDIENCE, &settings.audience),
        ("Client ID", settings::ENV_CLIENT_ID, &settings.client_id),
        ("Device code URL", settings::ENV_DEVICE_CODE_ENDPOINT, &settings.device_code_endpoint),
        ("Token URL", settings::ENV_TOKEN_ENDPOINT, &settings.token_endpoint),
    ];

    match cli.format {
        OutputFormat::Text => {
            println!("Configuration");
            println!("=============");
            println!();
            println!("Settings file:    {}", settings_path);
            println!("Credential file:  {}", credentials.display());
            println!("Refresh store:    {}", storage);
            println!("Issuer:           {}", settings.issuer());
            for (label, key, value) in rows {
                println!("{:<17} {} (from {})", format!("{}:", label), value, settings.source_of(key));
            }
            println!();
            println!("Environment variables:");
            for (_, key, _) in rows {
                println!("  {}", key);
            }
            println!();
            println!("Example settings.toml:");
            println!();
            print!("{}", settings::generate_example_settings());
        }
        OutputFormat::Json => {
            let sources: serde_json::Map<String, serde_json::Value> = rows
                .iter()
                .map(|(_, key, _)| (key.to_string(), settings.source_of(key).to_string().into()))
                .collect();
            println!(
                "{}",
                serde_json::json!({
                    "settings_file": settings_path,
                    "credentials_path": credentials,
                    "storage_info": storage,
                    "issuer": settings.issuer(),
                    "audience": settings.audience,
                    "client_id": settings.client_id,
                    "device_code_endpoint": settings.device_code_endpoint,
                    "token_endpoint": settings.token_endpoint,
                    "sources": sources,
                })
            );
        }
    }
    Ok(())
}

fn describe_expiry(record: &SystemRecord) -> String {
    let remaining = record.expires_at - chrono::Utc::now();
    if remaining.num_seconds() <= 0 {
        format!("{} (expired)", record.expires_at.to_rfc3339())
    } else {
        format!("{} (in {} min)", record.expires_at.to_rfc3339(), remaining.num_minutes())
    }
}

fn describe_scopes(record: &SystemRecord) -> String {
    match &record.scopes {
        Some(scopes) if !scopes.is_empty() => scopes.join(" "),
        _ => "-".to_string(),
    }
}
