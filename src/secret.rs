//! One-time secrets for password resets and email verification.
//!
//! The user is given the URL-safe base64 of a random alphanumeric string. The
//! store only keeps the URL-safe base64 of its SHA-256 digest.

use base64::{Engine, engine::general_purpose::URL_SAFE_NO_PAD};
use rand::{Rng, distr::Alphanumeric};
use sha2::{Digest, Sha256};

/// Length of the raw random secret.
pub const SECRET_LENGTH: usize = 20;

/// A freshly generated secret in both of its forms.
#[derive(Clone)]
pub struct OneTimeSecret {
    /// Sent to the user
    pub presentable: String,
    /// Persisted
    pub stored: String,
}

impl std::fmt::Debug for OneTimeSecret {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OneTimeSecret")
            .field("presentable", &"<redacted>")
            .field("stored", &self.stored)
            .finish()
    }
}

impl OneTimeSecret {
    pub fn generate() -> Self {
        let raw: String = rand::rng()
            .sample_iter(&Alphanumeric)
            .take(SECRET_LENGTH)
            .map(char::from)
            .collect();
        Self {
            presentable: URL_SAFE_NO_PAD.encode(raw.as_bytes()),
            stored: digest(raw.as_bytes()),
        }
    }
}

/// Stored form of a presented secret, or `None` if it does not decode.
///
/// Trailing padding is accepted so padded and unpadded encodings of the same
/// secret map to the same stored form.
pub fn stored_form(presented: &str) -> Option<String> {
    let trimmed = presented.trim().trim_end_matches('=');
    if trimmed.is_empty() {
        return None;
    }
    let raw = URL_SAFE_NO_PAD.decode(trimmed).ok()?;
    Some(digest(&raw))
}

fn digest(raw: &[u8]) -> String {
    URL_SAFE_NO_PAD.encode(Sha256::digest(raw))
}
