//! The authenticated identity attached to a request.

use std::sync::Arc;

use axum::{extract::FromRequestParts, http::request::Parts};
use serde::Serialize;

use super::errors::{AuthError, AuthErrorKind};
use crate::db::UserRole;

/// The subject resolved for one request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RequestIdentity {
    pub subject_id: String,
    pub role: UserRole,
}

impl RequestIdentity {
    pub fn is_admin(&self) -> bool {
        self.role == UserRole::Admin
    }
}

/// Resolves a token subject to an identity.
#[trait_variant::make(IdentityLookup: Send)]
pub trait LocalIdentityLookup {
    /// `None` if no such subject exists.
    async fn get_identity_by_id(
        &self,
        subject_id: &str,
    ) -> Result<Option<RequestIdentity>, sqlx::Error>;
}

/// Request extension holding the identity. Only the gate can create one.
#[derive(Debug, Clone)]
pub struct AttachedIdentity(Arc<RequestIdentity>);

impl AttachedIdentity {
    pub(super) fn new(identity: RequestIdentity) -> Self {
        Self(Arc::new(identity))
    }
}

/// Extractor for handlers behind a gate.
///
/// Rejects with 401 if no gate ran for this route.
#[derive(Debug, Clone)]
pub struct Authenticated(pub Arc<RequestIdentity>);

impl std::ops::Deref for Authenticated {
    type Target = RequestIdentity;

    fn deref(&self) -> &RequestIdentity {
        &self.0
    }
}

impl<S> FromRequestParts<S> for Authenticated
where
    S: Send + Sync,
{
    type Rejection = AuthError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        parts
            .extensions
            .get::<AttachedIdentity>()
            .map(|attached| Authenticated(attached.0.clone()))
            .ok_or_else(|| {
                tracing::error!("Authenticated extractor used on a route without a gate");
                AuthError::new(AuthErrorKind::MissingCredential)
            })
    }
}
