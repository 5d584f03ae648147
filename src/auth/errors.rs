//! Authentication error types.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
};

use crate::api::{INTERNAL_ERROR_NOTIFICATION, failure_response};
use crate::jwt::TokenError;

pub const NOT_LOGGED_IN_NOTIFICATION: &str = "You are not logged in.";
pub const TIMED_OUT_NOTIFICATION: &str = "The request timed out. Please try again later.";

/// Why a gate rejected a request. Logged, never sent to the client.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthErrorKind {
    MissingCredential,
    MalformedToken,
    Signature,
    ExpiredToken,
    NotYetValid,
    WrongTokenType,
    KeyDecode,
    Signing,
    /// Valid token for a subject that no longer exists
    NotFound,
    /// Identity lookup missed its deadline
    Timeout,
    /// Identity lookup failed
    Store,
}

impl AuthErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            AuthErrorKind::MissingCredential => "missing_credential",
            AuthErrorKind::MalformedToken => "malformed_token",
            AuthErrorKind::Signature => "signature",
            AuthErrorKind::ExpiredToken => "expired_token",
            AuthErrorKind::NotYetValid => "not_yet_valid",
            AuthErrorKind::WrongTokenType => "wrong_token_type",
            AuthErrorKind::KeyDecode => "key_decode",
            AuthErrorKind::Signing => "signing",
            AuthErrorKind::NotFound => "not_found",
            AuthErrorKind::Timeout => "timeout",
            AuthErrorKind::Store => "store",
        }
    }

    fn status_code(&self) -> StatusCode {
        match self {
            AuthErrorKind::Timeout => StatusCode::GATEWAY_TIMEOUT,
            AuthErrorKind::Store => StatusCode::INTERNAL_SERVER_ERROR,
            _ => StatusCode::UNAUTHORIZED,
        }
    }

    fn notification(&self) -> &'static str {
        match self {
            AuthErrorKind::Timeout => TIMED_OUT_NOTIFICATION,
            AuthErrorKind::Store => INTERNAL_ERROR_NOTIFICATION,
            _ => NOT_LOGGED_IN_NOTIFICATION,
        }
    }
}

impl From<&TokenError> for AuthErrorKind {
    fn from(e: &TokenError) -> Self {
        match e {
            TokenError::KeyDecode(_) => AuthErrorKind::KeyDecode,
            TokenError::Signing(_) => AuthErrorKind::Signing,
            TokenError::Malformed(_) => AuthErrorKind::MalformedToken,
            TokenError::Signature(_) => AuthErrorKind::Signature,
            TokenError::Expired => AuthErrorKind::ExpiredToken,
            TokenError::NotYetValid => AuthErrorKind::NotYetValid,
            TokenError::WrongTokenType => AuthErrorKind::WrongTokenType,
        }
    }
}

/// Rejection written by the gate and by the [`Authenticated`](super::Authenticated) extractor.
#[derive(Debug)]
pub struct AuthError {
    kind: AuthErrorKind,
}

impl AuthError {
    pub(super) fn new(kind: AuthErrorKind) -> Self {
        Self { kind }
    }

    pub fn kind(&self) -> AuthErrorKind {
        self.kind
    }
}

impl std::fmt::Display for AuthError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Authentication failed: {}", self.kind.as_str())
    }
}

impl std::error::Error for AuthError {}

impl IntoResponse for AuthError {
    fn into_response(self) -> Response {
        failure_response(self.kind.status_code(), self.kind.notification())
    }
}
