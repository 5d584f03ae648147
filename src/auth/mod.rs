//! Request authentication.
//!
//! A gate verifies the bearer token of each request against one codec and
//! attaches the resolved identity. Handlers read it with [`Authenticated`].
//! Access tokens are accepted on resource routes; refresh tokens only on the
//! refresh endpoint, through a second gate.

mod cookie;
mod credential;
mod errors;
mod gate;
mod identity;

pub use cookie::{
    ACCESS_COOKIE_NAME, LOGGED_IN_COOKIE_NAME, REFRESH_COOKIE_NAME, append_cookies,
    expired_cookie, get_cookie, session_cookie, visible_cookie,
};
pub use credential::{
    BEARER_SCHEME, Credential, CredentialLocation, CredentialSource, MissingCredential,
    extract_credential,
};
pub use errors::{AuthError, AuthErrorKind, NOT_LOGGED_IN_NOTIFICATION, TIMED_OUT_NOTIFICATION};
pub use gate::{
    ALREADY_LOGGED_IN_NOTIFICATION, AnonymousGuard, AuthGate, DEFAULT_LOOKUP_TIMEOUT, GateState,
    reject_authenticated, require_auth,
};
pub use identity::{
    AttachedIdentity, Authenticated, IdentityLookup, LocalIdentityLookup, RequestIdentity,
};
