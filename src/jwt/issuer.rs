use std::sync::Arc;

use super::{TokenCodec, TokenError, TokenPayload, TokenType};
use crate::clock::Clock;
use crate::db::UserRole;

/// Access token lifetime: 15 minutes.
pub const DEFAULT_ACCESS_TOKEN_SECS: u64 = 15 * 60;

/// Refresh token lifetime: 24 hours.
pub const DEFAULT_REFRESH_TOKEN_SECS: u64 = 24 * 60 * 60;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TokenLifetimes {
    pub access_secs: u64,
    pub refresh_secs: u64,
}

impl Default for TokenLifetimes {
    fn default() -> Self {
        Self {
            access_secs: DEFAULT_ACCESS_TOKEN_SECS,
            refresh_secs: DEFAULT_REFRESH_TOKEN_SECS,
        }
    }
}

/// An access and a refresh token for the same subject.
#[derive(Clone)]
pub struct TokenPair {
    pub access_token: String,
    pub refresh_token: String,
    pub access_expires_at: u64,
    pub refresh_expires_at: u64,
    /// Seconds, for the cookie `Max-Age`
    pub access_lifetime: u64,
    /// Seconds, for the cookie `Max-Age`
    pub refresh_lifetime: u64,
}

impl std::fmt::Debug for TokenPair {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenPair")
            .field("access_token", &"<redacted>")
            .field("refresh_token", &"<redacted>")
            .field("access_expires_at", &self.access_expires_at)
            .field("refresh_expires_at", &self.refresh_expires_at)
            .finish()
    }
}

/// Builds token pairs on login and refresh.
#[derive(Clone)]
pub struct TokenIssuer {
    access: Arc<TokenCodec>,
    refresh: Arc<TokenCodec>,
    lifetimes: TokenLifetimes,
    clock: Arc<dyn Clock>,
}

impl TokenIssuer {
    /// Fails with `WrongTokenType` if the codecs are swapped.
    pub fn new(
        access: Arc<TokenCodec>,
        refresh: Arc<TokenCodec>,
        lifetimes: TokenLifetimes,
        clock: Arc<dyn Clock>,
    ) -> Result<Self, TokenError> {
        if access.token_type() != TokenType::Access || refresh.token_type() != TokenType::Refresh {
            return Err(TokenError::WrongTokenType);
        }
        Ok(Self {
            access,
            refresh,
            lifetimes,
            clock,
        })
    }

    pub fn lifetimes(&self) -> TokenLifetimes {
        self.lifetimes
    }

    /// Sign both tokens. Either both succeed or the first error is returned.
    pub fn issue_pair(&self, subject_id: &str, role: UserRole) -> Result<TokenPair, TokenError> {
        let now = self.clock.now();

        let access_payload = TokenPayload::new(subject_id, role, now, self.lifetimes.access_secs);
        let refresh_payload =
            TokenPayload::new(subject_id, role, now, self.lifetimes.refresh_secs);

        let access_token = self.access.sign(&access_payload)?;
        let refresh_token = self.refresh.sign(&refresh_payload)?;

        Ok(TokenPair {
            access_token,
            refresh_token,
            access_expires_at: access_payload.expires_at,
            refresh_expires_at: refresh_payload.expires_at,
            access_lifetime: self.lifetimes.access_secs,
            refresh_lifetime: self.lifetimes.refresh_secs,
        })
    }
}
