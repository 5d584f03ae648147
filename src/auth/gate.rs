//! Authentication gate middleware.
//!
//! Each request walks the states below once:
//!
//! ```text
//! Unauthenticated -> ExtractingCredential -> Verifying -> LoadingIdentity -> Authenticated
//!                            |                  |               |
//!                            +------------------+---------------+--> Rejected
//! ```
//!
//! `Rejected` writes the response and stops the request. `Authenticated`
//! attaches the identity and runs the downstream handler.

use std::sync::Arc;
use std::time::Duration;

use axum::{
    extract::{Request, State},
    http::{HeaderMap, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
};
use tracing::{debug, warn};

use super::credential::{Credential, CredentialLocation, extract_credential};
use super::errors::{AuthError, AuthErrorKind};
use super::identity::{AttachedIdentity, IdentityLookup, RequestIdentity};
use crate::api::failure_response;
use crate::jwt::{TokenCodec, TokenPayload};

/// Deadline for the identity lookup.
pub const DEFAULT_LOOKUP_TIMEOUT: Duration = Duration::from_secs(5);

pub const ALREADY_LOGGED_IN_NOTIFICATION: &str = "Already logged in. This action is not allowed.";

/// Gate state, with the data each state carries.
#[derive(Debug)]
pub enum GateState {
    Unauthenticated,
    ExtractingCredential,
    Verifying(Credential),
    LoadingIdentity(TokenPayload),
    Authenticated(RequestIdentity),
    Rejected(AuthErrorKind),
}

impl GateState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, GateState::Authenticated(_) | GateState::Rejected(_))
    }

    pub fn name(&self) -> &'static str {
        match self {
            GateState::Unauthenticated => "unauthenticated",
            GateState::ExtractingCredential => "extracting_credential",
            GateState::Verifying(_) => "verifying",
            GateState::LoadingIdentity(_) => "loading_identity",
            GateState::Authenticated(_) => "authenticated",
            GateState::Rejected(_) => "rejected",
        }
    }
}

/// Verifies one kind of token and resolves its subject.
///
/// The access gate and the refresh gate are both this type with a different
/// codec and credential location.
#[derive(Clone)]
pub struct AuthGate<L> {
    codec: Arc<TokenCodec>,
    location: CredentialLocation,
    lookup: L,
    lookup_timeout: Duration,
}

impl<L> AuthGate<L>
where
    L: IdentityLookup + Send + Sync,
{
    pub fn new(codec: Arc<TokenCodec>, location: CredentialLocation, lookup: L) -> Self {
        Self {
            codec,
            location,
            lookup,
            lookup_timeout: DEFAULT_LOOKUP_TIMEOUT,
        }
    }

    pub fn with_lookup_timeout(mut self, lookup_timeout: Duration) -> Self {
        self.lookup_timeout = lookup_timeout;
        self
    }

    /// Run the state machine to a terminal state.
    pub async fn authenticate(&self, headers: &HeaderMap) -> Result<RequestIdentity, AuthError> {
        let mut state = GateState::Unauthenticated;
        loop {
            state = match state {
                GateState::Authenticated(identity) => return Ok(identity),
                GateState::Rejected(kind) => {
                    warn!(kind = kind.as_str(), "Request rejected by auth gate");
                    return Err(AuthError::new(kind));
                }
                other => self.step(other, headers).await,
            };
        }
    }

    /// One transition.
    pub async fn step(&self, state: GateState, headers: &HeaderMap) -> GateState {
        match state {
            GateState::Unauthenticated => GateState::ExtractingCredential,

            GateState::ExtractingCredential => match extract_credential(headers, &self.location) {
                Ok(credential) => GateState::Verifying(credential),
                Err(_) => GateState::Rejected(AuthErrorKind::MissingCredential),
            },

            GateState::Verifying(credential) => match self.codec.verify(credential.as_str()) {
                Ok(payload) => GateState::LoadingIdentity(payload),
                Err(e) => {
                    debug!(
                        kind = e.kind(),
                        source = ?credential.source(),
                        error = %e,
                        "Token verification failed"
                    );
                    GateState::Rejected(AuthErrorKind::from(&e))
                }
            },

            GateState::LoadingIdentity(payload) => {
                let lookup = self.lookup.get_identity_by_id(&payload.subject_id);
                match tokio::time::timeout(self.lookup_timeout, lookup).await {
                    Ok(Ok(Some(identity))) => GateState::Authenticated(identity),
                    Ok(Ok(None)) => {
                        debug!(subject = %payload.subject_id, "Token subject not found");
                        GateState::Rejected(AuthErrorKind::NotFound)
                    }
                    Ok(Err(e)) => {
                        tracing::error!(error = %e, "Identity lookup failed");
                        GateState::Rejected(AuthErrorKind::Store)
                    }
                    Err(_) => GateState::Rejected(AuthErrorKind::Timeout),
                }
            }

            terminal => terminal,
        }
    }
}

/// Middleware that runs the gate for every request.
///
/// ```ignore
/// router.route_layer(middleware::from_fn_with_state(gate, require_auth::<UserStore>))
/// ```
pub async fn require_auth<L>(State(gate): State<AuthGate<L>>, request: Request, next: Next) -> Response
where
    L: IdentityLookup + Clone + Send + Sync + 'static,
{
    let (mut parts, body) = request.into_parts();

    match gate.authenticate(&parts.headers).await {
        Ok(identity) => {
            if parts.extensions.get::<AttachedIdentity>().is_some() {
                warn!("Identity already attached, keeping the first one");
            } else {
                parts.extensions.insert(AttachedIdentity::new(identity));
            }
            next.run(Request::from_parts(parts, body)).await
        }
        Err(e) => e.into_response(),
    }
}

/// Turns away requests that already carry a valid access token.
#[derive(Clone)]
pub struct AnonymousGuard {
    codec: Arc<TokenCodec>,
    location: CredentialLocation,
}

impl AnonymousGuard {
    pub fn new(codec: Arc<TokenCodec>) -> Self {
        Self {
            codec,
            location: CredentialLocation::access(),
        }
    }

    /// A stale or broken credential does not count as logged in.
    pub fn is_logged_in(&self, headers: &HeaderMap) -> bool {
        extract_credential(headers, &self.location)
            .map(|credential| self.codec.verify(credential.as_str()).is_ok())
            .unwrap_or(false)
    }
}

/// Middleware for routes only meant for anonymous users.
pub async fn reject_authenticated(
    State(guard): State<AnonymousGuard>,
    request: Request,
    next: Next,
) -> Response {
    if guard.is_logged_in(request.headers()) {
        debug!("Rejected request from a logged in user");
        return failure_response(StatusCode::FORBIDDEN, ALREADY_LOGGED_IN_NOTIFICATION);
    }
    next.run(request).await
}
