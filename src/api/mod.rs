mod error;
mod posts;
mod users;

use axum::Router;
use std::sync::Arc;
use url::Url;

use crate::auth::{AnonymousGuard, AuthGate};
use crate::db::{Database, UserStore};
use crate::jwt::TokenIssuer;
use crate::notify::Notifier;
use crate::rate_limit::RateLimitConfig;
use crate::reset::PasswordResetFlow;

pub use error::{
    ApiError, ApiJson, ApiPath, ApiQuery, INTERNAL_ERROR_NOTIFICATION, ResultExt,
    failure_response, success_notification, validate_uuid,
};
pub use posts::PostsState;
pub use users::{UsersState, VERIFY_LINK_PATH};

/// Everything the API routers share, built once by [`crate::create_app`].
#[derive(Clone)]
pub struct ApiContext {
    pub db: Database,
    pub issuer: Arc<TokenIssuer>,
    pub access_gate: AuthGate<UserStore>,
    pub refresh_gate: AuthGate<UserStore>,
    pub guard: AnonymousGuard,
    pub reset: Arc<PasswordResetFlow<UserStore>>,
    pub notifier: Arc<dyn Notifier>,
    pub origin: Url,
    pub secure_cookies: bool,
    pub rate_limit_config: Arc<RateLimitConfig>,
}

/// Create the API router.
pub fn create_api_router(context: ApiContext) -> Router {
    let posts_state = posts::PostsState {
        db: context.db.clone(),
        access_gate: context.access_gate.clone(),
    };

    let users_state = users::UsersState {
        db: context.db,
        issuer: context.issuer,
        access_gate: context.access_gate,
        refresh_gate: context.refresh_gate,
        guard: context.guard,
        reset: context.reset,
        notifier: context.notifier,
        origin: context.origin,
        secure_cookies: context.secure_cookies,
        rate_limit_config: context.rate_limit_config,
    };

    Router::new()
        .nest("/users", users::router(users_state))
        .nest("/posts", posts::router(posts_state))
}
