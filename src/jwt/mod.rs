//! Signed token generation and validation.
//!
//! Uses a dual-token system signed with RS256:
//! - Access tokens: short-lived, presented on every protected request
//! - Refresh tokens: long-lived, only accepted by the refresh endpoint
//!
//! Each kind has its own key pair and its own [`TokenCodec`].

mod codec;
mod issuer;
mod keys;

use serde::{Deserialize, Serialize};

use crate::db::UserRole;

pub use codec::{SIGNING_ALGORITHM, TokenCodec};
pub use issuer::{
    DEFAULT_ACCESS_TOKEN_SECS, DEFAULT_REFRESH_TOKEN_SECS, TokenIssuer, TokenLifetimes, TokenPair,
};
pub use keys::{KeyMaterial, decode_key_pem, generate_key_material};

/// Token type for distinguishing access vs refresh tokens.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TokenType {
    Access,
    Refresh,
}

impl TokenType {
    pub fn as_str(&self) -> &'static str {
        match self {
            TokenType::Access => "access",
            TokenType::Refresh => "refresh",
        }
    }
}

/// The claims carried by a signed token.
///
/// Invariant: `not_before <= issued_at < expires_at`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TokenPayload {
    pub subject_id: String,
    pub role: UserRole,
    /// Unix seconds
    pub issued_at: u64,
    /// Unix seconds
    pub not_before: u64,
    /// Unix seconds
    pub expires_at: u64,
}

impl TokenPayload {
    /// Payload valid from `now` for `lifetime_secs`.
    pub fn new(subject_id: &str, role: UserRole, now: u64, lifetime_secs: u64) -> Self {
        Self {
            subject_id: subject_id.to_string(),
            role,
            issued_at: now,
            not_before: now,
            expires_at: now.saturating_add(lifetime_secs),
        }
    }

    pub(crate) fn check_invariant(&self) -> Result<(), TokenError> {
        if self.subject_id.is_empty() {
            return Err(TokenError::Signing("subject id is empty".into()));
        }
        if self.not_before > self.issued_at || self.issued_at >= self.expires_at {
            return Err(TokenError::Signing(
                "payload timestamps out of order".into(),
            ));
        }
        Ok(())
    }
}

/// Errors that can occur during token operations.
#[derive(Debug)]
pub enum TokenError {
    /// Key material could not be decoded (server misconfiguration)
    KeyDecode(String),
    /// Cryptographic failure while signing, or a payload that breaks its invariant
    Signing(String),
    /// Not parseable as a signed token
    Malformed(String),
    /// Signature mismatch or unexpected signing algorithm
    Signature(String),
    /// Valid signature, past expiry
    Expired,
    /// Valid signature, `nbf` still in the future
    NotYetValid,
    /// A refresh token used as an access token or vice versa
    WrongTokenType,
}

impl TokenError {
    /// Short, stable label for logs.
    pub fn kind(&self) -> &'static str {
        match self {
            TokenError::KeyDecode(_) => "key_decode",
            TokenError::Signing(_) => "signing",
            TokenError::Malformed(_) => "malformed_token",
            TokenError::Signature(_) => "signature",
            TokenError::Expired => "expired_token",
            TokenError::NotYetValid => "not_yet_valid",
            TokenError::WrongTokenType => "wrong_token_type",
        }
    }
}

impl std::fmt::Display for TokenError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TokenError::KeyDecode(e) => write!(f, "Failed to decode key: {}", e),
            TokenError::Signing(e) => write!(f, "Failed to sign token: {}", e),
            TokenError::Malformed(e) => write!(f, "Malformed token: {}", e),
            TokenError::Signature(e) => write!(f, "Invalid token signature: {}", e),
            TokenError::Expired => write!(f, "Token has expired"),
            TokenError::NotYetValid => write!(f, "Token is not valid yet"),
            TokenError::WrongTokenType => write!(f, "Wrong token type"),
        }
    }
}

impl std::error::Error for TokenError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_payload_new_sets_window() {
        let payload = TokenPayload::new("u1", UserRole::User, 100, 900);
        assert_eq!(payload.issued_at, 100);
        assert_eq!(payload.not_before, 100);
        assert_eq!(payload.expires_at, 1_000);
        assert!(payload.check_invariant().is_ok());
    }

    #[test]
    fn test_payload_invariant_rejects_empty_subject() {
        let payload = TokenPayload::new("", UserRole::User, 100, 900);
        assert!(matches!(
            payload.check_invariant(),
            Err(TokenError::Signing(_))
        ));
    }

    #[test]
    fn test_payload_invariant_rejects_zero_lifetime() {
        let payload = TokenPayload::new("u1", UserRole::User, 100, 0);
        assert!(payload.check_invariant().is_err());
    }
}
