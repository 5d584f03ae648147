//! Key material encoding.
//!
//! Keys are configured as base64-encoded PEM so they fit in a single env var.

use base64::{Engine, engine::general_purpose::STANDARD};
use openssl::rsa::Rsa;

use super::TokenError;

const RSA_KEY_BITS: u32 = 2048;

/// A private/public key pair, each as base64-encoded PEM.
#[derive(Clone)]
pub struct KeyMaterial {
    pub private_key: String,
    pub public_key: String,
}

impl std::fmt::Debug for KeyMaterial {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KeyMaterial")
            .field("private_key", &"<redacted>")
            .field("public_key", &self.public_key)
            .finish()
    }
}

/// Decode a base64-encoded PEM key into raw PEM bytes.
pub fn decode_key_pem(encoded: &str) -> Result<Vec<u8>, TokenError> {
    let pem = STANDARD
        .decode(encoded.trim())
        .map_err(|e| TokenError::KeyDecode(format!("key is not valid base64: {}", e)))?;
    if !pem.starts_with(b"-----BEGIN") {
        return Err(TokenError::KeyDecode("key is not PEM encoded".into()));
    }
    Ok(pem)
}

/// Generate a fresh RSA key pair in the configured encoding.
pub fn generate_key_material() -> Result<KeyMaterial, openssl::error::ErrorStack> {
    let rsa = Rsa::generate(RSA_KEY_BITS)?;
    let private_pem = rsa.private_key_to_pem()?;
    let public_pem = rsa.public_key_to_pem()?;
    Ok(KeyMaterial {
        private_key: STANDARD.encode(private_pem),
        public_key: STANDARD.encode(public_pem),
    })
}
