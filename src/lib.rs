pub mod api;
pub mod auth;
pub mod cleanup;
pub mod cli;
pub mod clock;
pub mod db;
pub mod jwt;
pub mod notify;
pub mod password;
pub mod rate_limit;
pub mod reset;
pub mod secret;

use api::{ApiContext, ApiError, create_api_router};
use auth::{AnonymousGuard, AuthGate, CredentialLocation};
use axum::Router;
use clock::Clock;
use db::Database;
use jwt::{KeyMaterial, TokenCodec, TokenError, TokenIssuer, TokenLifetimes, TokenType};
use notify::Notifier;
use rate_limit::RateLimitConfig;
use reset::PasswordResetFlow;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use url::Url;

pub struct ServerConfig {
    /// Database connection (cloneable, uses connection pool internally)
    pub db: Database,
    /// Key pair for access tokens
    pub access_keys: KeyMaterial,
    /// Key pair for refresh tokens
    pub refresh_keys: KeyMaterial,
    pub lifetimes: TokenLifetimes,
    /// Client origin used in notification links
    pub origin: Url,
    /// Whether to set Secure flag on cookies (should be true in production with HTTPS)
    pub secure_cookies: bool,
    /// How long a password reset token stays valid, in seconds
    pub reset_window_secs: u64,
    /// Deadline for loading the identity behind a token
    pub lookup_timeout: Duration,
    pub clock: Arc<dyn Clock>,
    pub notifier: Arc<dyn Notifier>,
    /// Shared with the cleanup scheduler, which prunes idle clients
    pub rate_limits: Arc<RateLimitConfig>,
}

/// Create the application router with the given configuration.
///
/// Fails if either key pair cannot be decoded.
pub fn create_app(config: &ServerConfig) -> Result<Router, TokenError> {
    let access = Arc::new(TokenCodec::new(
        TokenType::Access,
        &config.access_keys,
        config.clock.clone(),
    )?);
    let refresh = Arc::new(TokenCodec::new(
        TokenType::Refresh,
        &config.refresh_keys,
        config.clock.clone(),
    )?);

    let issuer = Arc::new(TokenIssuer::new(
        access.clone(),
        refresh.clone(),
        config.lifetimes,
        config.clock.clone(),
    )?);

    let users = config.db.users();
    let access_gate = AuthGate::new(access.clone(), CredentialLocation::access(), users.clone())
        .with_lookup_timeout(config.lookup_timeout);
    let refresh_gate = AuthGate::new(refresh, CredentialLocation::refresh(), users.clone())
        .with_lookup_timeout(config.lookup_timeout);

    let reset = PasswordResetFlow::new(
        users,
        config.clock.clone(),
        config.notifier.clone(),
        config.origin.clone(),
    )
    .with_window(config.reset_window_secs);

    let context = ApiContext {
        db: config.db.clone(),
        issuer,
        access_gate,
        refresh_gate,
        guard: AnonymousGuard::new(access),
        reset: Arc::new(reset),
        notifier: config.notifier.clone(),
        origin: config.origin.clone(),
        secure_cookies: config.secure_cookies,
        rate_limit_config: config.rate_limits.clone(),
    };

    Ok(Router::new()
        .nest("/api", create_api_router(context))
        .fallback(|| async {
            ApiError::not_found("Sorry, the requested item does not exist in our records.")
        }))
}

/// Run cleanup tasks and spawn background scheduler.
/// Call this before starting the server.
pub async fn init_cleanup(config: &ServerConfig) {
    cleanup::run_cleanup(&config.db, config.clock.as_ref(), config.reset_window_secs).await;
    cleanup::spawn_cleanup_scheduler(
        config.db.clone(),
        config.clock.clone(),
        config.reset_window_secs,
        config.rate_limits.clone(),
    );
}

/// Run the server on the given listener. This function blocks until the server exits.
/// Call `init_cleanup` before this to run cleanup on startup.
pub async fn run_server(config: ServerConfig, listener: TcpListener) -> Result<(), std::io::Error> {
    let app = create_app(&config).map_err(std::io::Error::other)?;
    let make_service = app.into_make_service_with_connect_info::<SocketAddr>();
    axum::serve(listener, make_service).await
}

/// Start the server on the given port in a background task. Use port 0 to let the OS choose a random port.
/// Returns the actual address the server is listening on.
/// Note: For production use, prefer `run_server` directly in main.
pub async fn start_server(
    config: ServerConfig,
    port: u16,
) -> Result<(tokio::task::JoinHandle<()>, SocketAddr), std::io::Error> {
    // Run cleanup tasks on startup
    init_cleanup(&config).await;

    let addr = format!("127.0.0.1:{}", port);
    let listener = TcpListener::bind(&addr).await?;
    let local_addr = listener.local_addr()?;

    let handle = tokio::spawn(async move {
        if let Err(e) = run_server(config, listener).await {
            tracing::error!(error = %e, "Server error");
        }
    });

    Ok((handle, local_addr))
}
