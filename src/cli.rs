//! CLI argument parsing, validation, and startup helpers.

use crate::ServerConfig;
use crate::clock::SystemClock;
use crate::db::{Database, UserRole};
use crate::jwt::{
    DEFAULT_ACCESS_TOKEN_SECS, DEFAULT_REFRESH_TOKEN_SECS, KeyMaterial, TokenLifetimes,
    generate_key_material,
};
use crate::notify::LogNotifier;
use crate::rate_limit::{RateLimitConfig, RateLimitQuotas};
use crate::reset::DEFAULT_RESET_WINDOW_SECS;
use clap::Parser;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info};
use url::Url;

#[derive(clap::ValueEnum, Clone, Debug, Default)]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
    Compact,
}

#[derive(Parser, Debug, Clone)]
#[command(
    name = "Gatehouse",
    about = "Account service with signed session tokens and password reset"
)]
pub struct Args {
    /// Port to listen on
    #[arg(short, long, env = "PORT", default_value = "8000")]
    pub port: u16,

    /// Path to SQLite database file
    #[arg(short, long, env = "DATABASE", default_value = "gatehouse.db")]
    pub database: String,

    /// Client origin used in email links (e.g., "http://localhost:3000")
    #[arg(long, env = "ORIGIN", default_value = "http://localhost:3000")]
    pub origin: String,

    /// Access token lifetime in seconds
    #[arg(long, env = "ACCESS_TOKEN_TTL", default_value_t = DEFAULT_ACCESS_TOKEN_SECS)]
    pub access_token_ttl: u64,

    /// Refresh token lifetime in seconds
    #[arg(long, env = "REFRESH_TOKEN_TTL", default_value_t = DEFAULT_REFRESH_TOKEN_SECS)]
    pub refresh_token_ttl: u64,

    /// How long a password reset token stays valid, in seconds
    #[arg(long, env = "RESET_WINDOW", default_value_t = DEFAULT_RESET_WINDOW_SECS)]
    pub reset_window: u64,

    /// Deadline for loading the user behind a token, in milliseconds
    #[arg(long, env = "LOOKUP_TIMEOUT_MS", default_value = "5000")]
    pub lookup_timeout_ms: u64,

    /// Login attempts allowed per client IP per minute
    #[arg(long, env = "LOGIN_RATE_LIMIT", default_value = "10")]
    pub login_rate_limit: u32,

    /// Forgotten-password requests allowed per client IP per minute
    #[arg(long, env = "RESET_RATE_LIMIT", default_value = "3")]
    pub reset_rate_limit: u32,

    /// Path to file containing the access token private key. Prefer ACCESS_TOKEN_PRIVATE_KEY
    #[arg(long)]
    pub access_private_key_file: Option<String>,

    /// Path to file containing the access token public key. Prefer ACCESS_TOKEN_PUBLIC_KEY
    #[arg(long)]
    pub access_public_key_file: Option<String>,

    /// Path to file containing the refresh token private key. Prefer REFRESH_TOKEN_PRIVATE_KEY
    #[arg(long)]
    pub refresh_private_key_file: Option<String>,

    /// Path to file containing the refresh token public key. Prefer REFRESH_TOKEN_PUBLIC_KEY
    #[arg(long)]
    pub refresh_public_key_file: Option<String>,

    /// Print freshly generated key pairs as env assignments and exit
    #[arg(long)]
    pub generate_keys: bool,

    /// Give the account with this email the admin role on startup
    #[arg(long)]
    pub promote_admin: Option<String>,

    /// Log output format
    #[arg(short, long, env = "LOG_FORMAT", default_value = "pretty")]
    pub log_format: LogFormat,
}

/// Initialize logging based on the specified format.
pub fn init_logging(format: &LogFormat) {
    match format {
        LogFormat::Pretty => tracing_subscriber::fmt::init(),
        LogFormat::Json => tracing_subscriber::fmt().json().init(),
        LogFormat::Compact => tracing_subscriber::fmt().compact().init(),
    }
}

/// Load one key from an environment variable or file.
/// Returns None and logs an error if the key cannot be loaded.
fn load_key(env_var: &str, file: Option<&str>) -> Option<String> {
    if let Ok(key) = std::env::var(env_var) {
        // Clear the environment variable to prevent leaking
        // SAFETY: We're single-threaded at this point during startup,
        // and no other code is reading this environment variable.
        unsafe { std::env::remove_var(env_var) };
        return Some(key.trim().to_string());
    }

    match file {
        Some(path) => match std::fs::read_to_string(path) {
            Ok(content) => Some(content.trim().to_string()),
            Err(e) => {
                error!(path = %path, error = %e, "Failed to read key file");
                None
            }
        },
        None => {
            error!(
                env = env_var,
                "Signing key is required. Set the environment variable (recommended) or pass the key file option"
            );
            None
        }
    }
}

/// Load both key pairs. Decoding happens later, in [`crate::create_app`].
pub fn load_key_material(args: &Args) -> Option<(KeyMaterial, KeyMaterial)> {
    let access = KeyMaterial {
        private_key: load_key(
            "ACCESS_TOKEN_PRIVATE_KEY",
            args.access_private_key_file.as_deref(),
        )?,
        public_key: load_key(
            "ACCESS_TOKEN_PUBLIC_KEY",
            args.access_public_key_file.as_deref(),
        )?,
    };
    let refresh = KeyMaterial {
        private_key: load_key(
            "REFRESH_TOKEN_PRIVATE_KEY",
            args.refresh_private_key_file.as_deref(),
        )?,
        public_key: load_key(
            "REFRESH_TOKEN_PUBLIC_KEY",
            args.refresh_public_key_file.as_deref(),
        )?,
    };
    Some((access, refresh))
}

/// Handle the --generate-keys flag.
pub fn print_generated_keys() -> Result<(), openssl::error::ErrorStack> {
    let access = generate_key_material()?;
    let refresh = generate_key_material()?;
    println!("ACCESS_TOKEN_PRIVATE_KEY={}", access.private_key);
    println!("ACCESS_TOKEN_PUBLIC_KEY={}", access.public_key);
    println!("REFRESH_TOKEN_PRIVATE_KEY={}", refresh.private_key);
    println!("REFRESH_TOKEN_PUBLIC_KEY={}", refresh.public_key);
    Ok(())
}

/// Parse and validate the origin URL.
/// Returns None and logs an error if validation fails.
pub fn validate_origin(origin: &str) -> Option<Url> {
    let url = match Url::parse(origin) {
        Ok(url) => url,
        Err(e) => {
            error!(origin = %origin, error = %e, "Invalid origin URL");
            return None;
        }
    };

    let is_https = url.scheme() == "https";
    let is_localhost = url.host_str() == Some("localhost");

    if !is_https && !is_localhost {
        error!("origin must use HTTPS for non-localhost deployments");
        return None;
    }

    Some(url)
}

/// Handle the --promote-admin flag.
pub async fn handle_promote_admin(db: &Database, email: &str) -> bool {
    let email = email.trim().to_lowercase();
    match db.users().get_by_email(&email).await {
        Ok(Some(user)) => match db.users().set_role(user.id, UserRole::Admin).await {
            Ok(_) => {
                info!(user = %user.uuid, "User promoted to admin");
                true
            }
            Err(e) => {
                error!(error = %e, "Failed to promote user");
                false
            }
        },
        Ok(None) => {
            error!(email = %email, "No account with this email");
            false
        }
        Err(e) => {
            error!(error = %e, "Failed to look up user");
            false
        }
    }
}

/// Build ServerConfig from validated arguments.
pub fn build_config(
    args: &Args,
    db: Database,
    origin: Url,
    access_keys: KeyMaterial,
    refresh_keys: KeyMaterial,
) -> ServerConfig {
    let secure_cookies = origin.scheme() == "https";

    ServerConfig {
        db,
        access_keys,
        refresh_keys,
        lifetimes: TokenLifetimes {
            access_secs: args.access_token_ttl,
            refresh_secs: args.refresh_token_ttl,
        },
        origin,
        secure_cookies,
        reset_window_secs: args.reset_window,
        lookup_timeout: Duration::from_millis(args.lookup_timeout_ms),
        clock: Arc::new(SystemClock),
        notifier: Arc::new(LogNotifier),
        rate_limits: Arc::new(RateLimitConfig::new(RateLimitQuotas {
            login_per_minute: args.login_rate_limit,
            reset_per_minute: args.reset_rate_limit,
        })),
    }
}

/// Open the database, logging errors if it fails.
pub async fn open_database(path: &str) -> Option<Database> {
    match Database::open(path).await {
        Ok(db) => {
            info!(path = %path, "Database opened");
            Some(db)
        }
        Err(e) => {
            error!(path = %path, error = %e, "Failed to open database");
            None
        }
    }
}
