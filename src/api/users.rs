//! Account endpoints: registration, login, token refresh and password reset.

use axum::{
    Json, Router,
    extract::State,
    http::{HeaderMap, StatusCode},
    middleware,
    response::{IntoResponse, Response},
    routing::{get, post},
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{error, info, warn};
use url::Url;

use super::error::{ApiError, ApiJson, ApiPath, ResultExt, success_notification};
use crate::auth::{
    ACCESS_COOKIE_NAME, AnonymousGuard, AuthGate, Authenticated, LOGGED_IN_COOKIE_NAME,
    REFRESH_COOKIE_NAME, append_cookies, expired_cookie, reject_authenticated, require_auth,
    session_cookie, visible_cookie,
};
use crate::db::{Database, UserRole, UserStore};
use crate::jwt::{TokenIssuer, TokenPair};
use crate::notify::{Notification, NotificationKind, Notifier};
use crate::password::{hash_password, validate_password, verify_password};
use crate::rate_limit::{RateLimitConfig, rate_limit_forgotten_password, rate_limit_login};
use crate::reset::{PasswordResetFlow, ResetError};
use crate::secret::{OneTimeSecret, stored_form};

/// Client path the verification link points at.
pub const VERIFY_LINK_PATH: &str = "verifyemail";

const MAX_NAME_LENGTH: usize = 100;
const MAX_EMAIL_LENGTH: usize = 254;

const INVALID_TOKEN_NOTIFICATION: &str = "The token is invalid. Please use the correct token.";
const EXPIRED_TOKEN_NOTIFICATION: &str = "Sorry, the time is expired and not valid anymore";
const PASSWORD_MISMATCH_NOTIFICATION: &str = "Passwords do not match";
const EMAIL_FAILED_NOTIFICATION: &str = "There was an error sending the email.";
const RESET_REQUESTED_NOTIFICATION: &str =
    "You will receive an email with detailed instructions shortly.";

#[derive(Clone)]
pub struct UsersState {
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

pub fn router(state: UsersState) -> Router {
    let login_router = Router::new()
        .route("/login", post(login))
        .with_state(state.clone())
        .layer(middleware::from_fn_with_state(
            state.rate_limit_config.clone(),
            rate_limit_login,
        ));

    let forgotten_router = Router::new()
        .route("/forgotten-password", post(forgotten_password))
        .with_state(state.clone())
        .layer(middleware::from_fn_with_state(
            state.rate_limit_config.clone(),
            rate_limit_forgotten_password,
        ));

    // Only for clients without a valid access token
    let anonymous_router = Router::new()
        .route("/register", post(register))
        .route("/reset-password/{reset_token}", post(reset_password))
        .with_state(state.clone())
        .merge(login_router)
        .merge(forgotten_router)
        .route_layer(middleware::from_fn_with_state(
            state.guard.clone(),
            reject_authenticated,
        ));

    let refresh_router = Router::new()
        .route("/refresh", post(refresh))
        .with_state(state.clone())
        .route_layer(middleware::from_fn_with_state(
            state.refresh_gate.clone(),
            require_auth::<UserStore>,
        ));

    let session_router = Router::new()
        .route("/logout", post(logout))
        .route("/me", get(me))
        .with_state(state.clone())
        .route_layer(middleware::from_fn_with_state(
            state.access_gate.clone(),
            require_auth::<UserStore>,
        ));

    Router::new()
        .route("/verify/{code}", get(verify_email))
        .with_state(state)
        .merge(anonymous_router)
        .merge(refresh_router)
        .merge(session_router)
}

// --- Request/Response types ---

#[derive(Deserialize)]
struct RegisterRequest {
    name: String,
    email: String,
    password: String,
    #[serde(alias = "passwordConfirm")]
    password_confirm: String,
}

#[derive(Deserialize)]
struct LoginRequest {
    email: String,
    password: String,
}

#[derive(Deserialize)]
struct ForgottenPasswordRequest {
    email: String,
}

#[derive(Deserialize)]
struct ResetPasswordRequest {
    password: String,
    #[serde(alias = "passwordConfirm")]
    password_confirm: String,
}

#[derive(Serialize)]
struct TokensResponse {
    status: &'static str,
    access_token: String,
    refresh_token: String,
}

#[derive(Serialize)]
struct UserView {
    id: String,
    name: String,
    email: String,
    role: UserRole,
    verified: bool,
    created_at: String,
    updated_at: String,
}

#[derive(Serialize)]
struct UserData {
    user: UserView,
}

#[derive(Serialize)]
struct MeResponse {
    status: &'static str,
    data: UserData,
}

// --- Helpers ---

fn normalize_email(email: &str) -> Result<String, ApiError> {
    let email = email.trim().to_lowercase();
    let valid = email.len() <= MAX_EMAIL_LENGTH
        && email
            .split_once('@')
            .is_some_and(|(local, domain)| !local.is_empty() && domain.contains('.'));
    if !valid {
        return Err(ApiError::bad_request("Please provide a valid email address."));
    }
    Ok(email)
}

/// Session cookies plus the tokens in the body.
fn session_response(pair: TokenPair, secure: bool) -> Response {
    let mut headers = HeaderMap::new();
    append_cookies(
        &mut headers,
        [
            session_cookie(
                ACCESS_COOKIE_NAME,
                &pair.access_token,
                pair.access_lifetime,
                secure,
            ),
            session_cookie(
                REFRESH_COOKIE_NAME,
                &pair.refresh_token,
                pair.refresh_lifetime,
                secure,
            ),
            visible_cookie(LOGGED_IN_COOKIE_NAME, "true", pair.access_lifetime, secure),
        ],
    );
    (
        headers,
        Json(TokensResponse {
            status: "success",
            access_token: pair.access_token,
            refresh_token: pair.refresh_token,
        }),
    )
        .into_response()
}

fn cleared_cookies(secure: bool) -> HeaderMap {
    let mut headers = HeaderMap::new();
    append_cookies(
        &mut headers,
        [
            expired_cookie(ACCESS_COOKIE_NAME, secure),
            expired_cookie(REFRESH_COOKIE_NAME, secure),
            expired_cookie(LOGGED_IN_COOKIE_NAME, secure),
        ],
    );
    headers
}

fn issue_session(state: &UsersState, subject_id: &str, role: UserRole) -> Result<Response, ApiError> {
    let pair = state.issuer.issue_pair(subject_id, role).map_err(|e| {
        error!(kind = e.kind(), error = %e, "Failed to issue token pair");
        ApiError::internal()
    })?;
    Ok(session_response(pair, state.secure_cookies))
}

// --- Handlers ---

async fn register(
    State(state): State<UsersState>,
    ApiJson(payload): ApiJson<RegisterRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let name = payload.name.trim();
    if name.is_empty() {
        return Err(ApiError::bad_request("Name cannot be empty"));
    }
    if name.chars().count() > MAX_NAME_LENGTH {
        return Err(ApiError::bad_request(format!(
            "Name cannot be longer than {} characters",
            MAX_NAME_LENGTH
        )));
    }
    let email = normalize_email(&payload.email)?;

    if payload.password != payload.password_confirm {
        return Err(ApiError::bad_request(PASSWORD_MISMATCH_NOTIFICATION));
    }
    validate_password(&payload.password).map_err(|e| ApiError::bad_request(e.to_string()))?;

    let users = state.db.users();
    if users
        .is_email_taken(&email)
        .await
        .db_err("Failed to check email availability")?
    {
        return Err(ApiError::conflict(
            "An account with this email address already exists.",
        ));
    }

    let password_hash = hash_password(&payload.password).map_err(|e| {
        error!(error = %e, "Failed to hash password");
        ApiError::internal()
    })?;

    let code = OneTimeSecret::generate();
    let uuid = uuid::Uuid::new_v4().to_string();
    match users
        .create(&uuid, name, &email, &password_hash, &code.stored)
        .await
    {
        Ok(_) => {}
        // Lost a race with a concurrent registration
        Err(sqlx::Error::Database(e)) if e.is_unique_violation() => {
            return Err(ApiError::conflict(
                "An account with this email address already exists.",
            ));
        }
        Err(e) => return Err(ApiError::db_error("Failed to create user", e)),
    }
    info!(user = %uuid, "User registered");

    let notification = Notification::new(
        NotificationKind::EmailVerification,
        &email,
        &code.presentable,
        &state.origin,
        VERIFY_LINK_PATH,
    );
    if let Err(e) = state.notifier.deliver(&notification) {
        error!(user = %uuid, error = %e, "Failed to send verification email");
        return Err(ApiError::bad_gateway(EMAIL_FAILED_NOTIFICATION));
    }

    let mut response = success_notification(
        "We have sent an email with a verification code to the provided address.",
    );
    *response.status_mut() = StatusCode::CREATED;
    Ok(response)
}

async fn verify_email(
    State(state): State<UsersState>,
    ApiPath(code): ApiPath<String>,
) -> Result<impl IntoResponse, ApiError> {
    let stored = stored_form(&code).ok_or_else(|| ApiError::unauthorized("Could not verify email"))?;

    let verified = state
        .db
        .users()
        .verify(&stored)
        .await
        .db_err("Failed to verify email")?;

    if !verified {
        return Err(ApiError::unauthorized("Could not verify email"));
    }

    Ok(success_notification("Email verified successfully"))
}

async fn login(
    State(state): State<UsersState>,
    ApiJson(payload): ApiJson<LoginRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let invalid = || ApiError::bad_request("Invalid email or password");

    let email = payload.email.trim().to_lowercase();
    let user = state
        .db
        .users()
        .get_by_email(&email)
        .await
        .db_err("Failed to load user")?
        .ok_or_else(invalid)?;

    if !verify_password(&payload.password, &user.password_hash) {
        return Err(invalid());
    }

    if !user.verified {
        return Err(ApiError::forbidden(
            "You are not verified, check your email to verify your account",
        ));
    }

    info!(user = %user.uuid, "User logged in");
    issue_session(&state, &user.uuid, user.role)
}

async fn refresh(
    State(state): State<UsersState>,
    identity: Authenticated,
) -> Result<impl IntoResponse, ApiError> {
    issue_session(&state, &identity.subject_id, identity.role)
}

async fn logout(State(state): State<UsersState>, identity: Authenticated) -> impl IntoResponse {
    info!(user = %identity.subject_id, "User logged out");
    (
        cleared_cookies(state.secure_cookies),
        success_notification("You are successfully logged out."),
    )
}

async fn me(
    State(state): State<UsersState>,
    identity: Authenticated,
) -> Result<impl IntoResponse, ApiError> {
    let user = state
        .db
        .users()
        .get_by_uuid(&identity.subject_id)
        .await
        .db_err("Failed to load user")?
        .ok_or_else(|| ApiError::not_found("Sorry, the requested item does not exist in our records."))?;

    Ok(Json(MeResponse {
        status: "success",
        data: UserData {
            user: UserView {
                id: user.uuid,
                name: user.name,
                email: user.email,
                role: user.role,
                verified: user.verified,
                created_at: user.created_at,
                updated_at: user.updated_at,
            },
        },
    }))
}

async fn forgotten_password(
    State(state): State<UsersState>,
    ApiJson(payload): ApiJson<ForgottenPasswordRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let email = normalize_email(&payload.email)?;

    match state.reset.request_reset(&email).await {
        Ok(()) => {}
        // Same answer as success so accounts cannot be enumerated
        Err(ResetError::UnknownEmail) => {
            info!("Password reset requested for an unknown email");
        }
        Err(e) => return Err(reset_error(e)),
    }

    Ok(success_notification(RESET_REQUESTED_NOTIFICATION))
}

async fn reset_password(
    State(state): State<UsersState>,
    ApiPath(reset_token): ApiPath<String>,
    ApiJson(payload): ApiJson<ResetPasswordRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let result = state
        .reset
        .consume_reset(&reset_token, &payload.password, &payload.password_confirm)
        .await;

    match result {
        Ok(()) => Ok((
            cleared_cookies(state.secure_cookies),
            success_notification(
                "Congratulations! Your password was updated successfully! Please sign in again.",
            ),
        )),
        Err(ResetError::TimeExpired(record)) => {
            if let Err(e) = state.reset.discard(&record).await {
                warn!(error = %e, "Failed to discard expired reset token");
            }
            Err(ApiError::bad_request(EXPIRED_TOKEN_NOTIFICATION))
        }
        Err(e) => Err(reset_error(e)),
    }
}

fn reset_error(e: ResetError) -> ApiError {
    match e {
        ResetError::InvalidToken => ApiError::bad_request(INVALID_TOKEN_NOTIFICATION),
        ResetError::TimeExpired(_) => ApiError::bad_request(EXPIRED_TOKEN_NOTIFICATION),
        ResetError::PasswordMismatch => ApiError::bad_request(PASSWORD_MISMATCH_NOTIFICATION),
        ResetError::WeakPassword(e) => ApiError::bad_request(e.to_string()),
        ResetError::UnknownEmail => ApiError::bad_request(INVALID_TOKEN_NOTIFICATION),
        ResetError::Notification(e) => {
            error!(error = %e, "Failed to send password reset email");
            ApiError::bad_gateway(EMAIL_FAILED_NOTIFICATION)
        }
        ResetError::Hashing(e) => {
            error!(error = %e, "Failed to hash password");
            ApiError::internal()
        }
        ResetError::Store(e) => ApiError::db_error("Reset store error", e),
    }
}
