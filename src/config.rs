use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use dialoguer::{Input, Password};
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use crate::auth::{RenewalTiming, SessionConfig, StorageConfig};

/// Session Keeper - authenticated client with automatic token renewal
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct CliArgs {
    /// Backend base URL (e.g. https://api.example.com)
    #[arg(short = 'u', long, env = "AUTH_BASE_URL")]
    pub base_url: Option<String>,

    /// Path to the token database ("none" disables persistent storage)
    #[arg(short = 'd', long, env = "TOKEN_DB_FILE")]
    pub db_file: Option<String>,

    /// Production mode (cookies marked Secure)
    #[arg(long, env = "PRODUCTION")]
    pub production: bool,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, env = "LOG_LEVEL", default_value = "info")]
    pub log_level: String,

    /// HTTP request timeout in seconds
    #[arg(long, env = "HTTP_REQUEST_TIMEOUT", default_value = "60")]
    pub http_timeout: u64,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug, Clone, PartialEq)]
pub enum Command {
    /// Log in and store the issued tokens
    Login {
        /// Account email (prompted when omitted)
        #[arg(short, long, env = "AUTH_EMAIL")]
        email: Option<String>,

        /// Account password (prompted when omitted)
        #[arg(long, env = "AUTH_PASSWORD", hide_env_values = true)]
        password: Option<String>,
    },

    /// Create an account and store the issued tokens
    Register {
        /// Account email (prompted when omitted)
        #[arg(short, long, env = "AUTH_EMAIL")]
        email: Option<String>,

        /// Display name
        #[arg(short, long)]
        name: Option<String>,

        /// Account password (prompted when omitted)
        #[arg(long, env = "AUTH_PASSWORD", hide_env_values = true)]
        password: Option<String>,
    },

    /// Show the stored session
    Status,

    /// Send an authorized GET request to a backend path
    Get {
        /// Path relative to the base URL, e.g. /api/profile
        path: String,
    },

    /// Revoke the session and clear stored tokens
    Logout,

    /// Keep the session alive and print renewal events
    Watch,
}

#[derive(Clone, Debug)]
pub struct Config {
    // Backend
    pub base_url: String,

    // Storage
    pub token_db_file: Option<PathBuf>,
    pub production: bool,
    pub refresh_cookie_max_age_days: u64,

    // Renewal
    pub renewal_margin_secs: u64,
    pub renewal_min_delay_secs: u64,
    pub startup_renewal_delay_ms: u64,

    // HTTP client
    pub http_connect_timeout: u64,
    pub http_request_timeout: u64,

    // Logging
    pub log_level: String,
}

impl Config {
    /// Load configuration from all sources with priority: CLI > ENV > defaults
    pub fn load() -> Result<(Self, Command)> {
        // Load .env file if it exists
        dotenvy::dotenv().ok();

        let args = CliArgs::parse();
        let command = args.command.clone();
        Ok((Self::from_args(args)?, command))
    }

    /// Resolve parsed arguments plus environment-only settings
    pub fn from_args(args: CliArgs) -> Result<Self> {
        let config = Config {
            base_url: args
                .base_url
                .context("AUTH_BASE_URL is required (use -u or set AUTH_BASE_URL env var)")?,

            token_db_file: match args.db_file {
                Some(raw) => parse_db_path(&raw),
                None => default_db_path(),
            },

            production: args.production,

            refresh_cookie_max_age_days: env_or("REFRESH_COOKIE_MAX_AGE_DAYS", 30),

            renewal_margin_secs: env_or("RENEWAL_MARGIN_SECS", 300),
            renewal_min_delay_secs: env_or("RENEWAL_MIN_DELAY_SECS", 60),
            startup_renewal_delay_ms: env_or("STARTUP_RENEWAL_DELAY_MS", 1000),

            http_connect_timeout: env_or("HTTP_CONNECT_TIMEOUT", 30),
            http_request_timeout: args.http_timeout,

            log_level: args.log_level,
        };

        Ok(config)
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        let url = reqwest::Url::parse(&self.base_url)
            .with_context(|| format!("AUTH_BASE_URL is not a valid URL: {}", self.base_url))?;

        if !matches!(url.scheme(), "http" | "https") {
            anyhow::bail!("AUTH_BASE_URL must use http or https: {}", self.base_url);
        }

        if self.production && url.scheme() != "https" {
            tracing::warn!("Production mode with a non-https backend: {}", self.base_url);
        }

        if self.http_request_timeout == 0 {
            anyhow::bail!("HTTP_REQUEST_TIMEOUT must be greater than zero");
        }

        Ok(())
    }

    /// Coordinator settings derived from this configuration
    pub fn session_config(&self) -> SessionConfig {
        SessionConfig {
            base_url: self.base_url.clone(),
            storage: StorageConfig {
                db_path: self.token_db_file.clone(),
                secure_cookies: self.production,
                refresh_cookie_max_age: Duration::from_secs(
                    self.refresh_cookie_max_age_days.saturating_mul(24 * 60 * 60),
                ),
            },
            timing: RenewalTiming {
                margin: Duration::from_secs(self.renewal_margin_secs),
                min_delay: Duration::from_secs(self.renewal_min_delay_secs),
                startup_delay: Duration::from_millis(self.startup_renewal_delay_ms),
            },
            connect_timeout: Duration::from_secs(self.http_connect_timeout),
            request_timeout: Duration::from_secs(self.http_request_timeout),
        }
    }
}

/// Read an environment setting, falling back to `default` when unset or malformed
fn env_or<T: FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or(default)
}

/// Parse the token database setting; "none" or empty disables persistent storage
fn parse_db_path(raw: &str) -> Option<PathBuf> {
    let trimmed = raw.trim();
    if trimmed.is_empty() || trimmed.eq_ignore_ascii_case("none") {
        None
    } else {
        Some(expand_tilde(trimmed))
    }
}

/// Default token database location under the user's data directory
fn default_db_path() -> Option<PathBuf> {
    dirs::data_dir().map(|dir| dir.join("session-keeper").join("tokens.sqlite3"))
}

/// Expand tilde (~) in file paths to user's home directory
fn expand_tilde(path: &str) -> PathBuf {
    if let Some(rest) = path.strip_prefix("~/") {
        if let Some(home) = dirs::home_dir() {
            return home.join(rest);
        }
    }
    PathBuf::from(path)
}

// === Interactive Login ===

/// Prompt for whichever credentials were not supplied
pub fn prompt_credentials(
    email: Option<String>,
    password: Option<String>,
) -> Result<(String, String)> {
    let email = match email {
        Some(email) => email,
        None => Input::new()
            .with_prompt("Email")
            .interact_text()
            .context("Failed to read email")?,
    };

    let password = match password {
        Some(password) => password,
        None => Password::new()
            .with_prompt("Password")
            .interact()
            .context("Failed to read password")?,
    };

    if password.is_empty() {
        anyhow::bail!("Password cannot be empty");
    }

    Ok((email, password))
}
