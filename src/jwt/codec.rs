//! Token signing and verification with a pinned algorithm.

use std::collections::HashSet;
use std::sync::Arc;

use base64::{Engine, engine::general_purpose::URL_SAFE_NO_PAD};
use jsonwebtoken::{Algorithm, DecodingKey, EncodingKey, Header, Validation, errors::ErrorKind};
use serde::{Deserialize, Serialize};

use super::keys::{KeyMaterial, decode_key_pem};
use super::{TokenError, TokenPayload, TokenType};
use crate::clock::Clock;
use crate::db::UserRole;

/// The only algorithm accepted on verify.
pub const SIGNING_ALGORITHM: Algorithm = Algorithm::RS256;

/// Wire form of [`TokenPayload`].
#[derive(Debug, Clone, Serialize, Deserialize)]
struct Claims {
    /// Subject (user UUID)
    sub: String,
    role: UserRole,
    #[serde(rename = "typ")]
    token_type: TokenType,
    iat: u64,
    nbf: u64,
    exp: u64,
}

/// Only the header field we pin on.
#[derive(Deserialize)]
struct RawHeader {
    alg: String,
}

/// Signs and verifies one kind of token with one key pair.
#[derive(Clone)]
pub struct TokenCodec {
    token_type: TokenType,
    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
    clock: Arc<dyn Clock>,
}

impl TokenCodec {
    /// Decode the key pair. Fails with [`TokenError::KeyDecode`] on bad key material.
    pub fn new(
        token_type: TokenType,
        keys: &KeyMaterial,
        clock: Arc<dyn Clock>,
    ) -> Result<Self, TokenError> {
        let private_pem = decode_key_pem(&keys.private_key)?;
        let public_pem = decode_key_pem(&keys.public_key)?;

        let encoding_key = EncodingKey::from_rsa_pem(&private_pem)
            .map_err(|e| TokenError::KeyDecode(format!("private key: {}", e)))?;
        let decoding_key = DecodingKey::from_rsa_pem(&public_pem)
            .map_err(|e| TokenError::KeyDecode(format!("public key: {}", e)))?;

        Ok(Self {
            token_type,
            encoding_key,
            decoding_key,
            clock,
        })
    }

    pub fn token_type(&self) -> TokenType {
        self.token_type
    }

    pub fn now(&self) -> u64 {
        self.clock.now()
    }

    /// Sign a payload.
    pub fn sign(&self, payload: &TokenPayload) -> Result<String, TokenError> {
        payload.check_invariant()?;

        let claims = Claims {
            sub: payload.subject_id.clone(),
            role: payload.role,
            token_type: self.token_type,
            iat: payload.issued_at,
            nbf: payload.not_before,
            exp: payload.expires_at,
        };

        jsonwebtoken::encode(&Header::new(SIGNING_ALGORITHM), &claims, &self.encoding_key).map_err(
            |e| match e.kind() {
                ErrorKind::InvalidRsaKey(_) | ErrorKind::InvalidKeyFormat => {
                    TokenError::KeyDecode(e.to_string())
                }
                _ => TokenError::Signing(e.to_string()),
            },
        )
    }

    /// Verify a token and return its payload.
    pub fn verify(&self, token: &str) -> Result<TokenPayload, TokenError> {
        check_structure(token)?;

        let mut validation = Validation::new(SIGNING_ALGORITHM);
        // Time checks run against the injected clock below.
        validation.validate_exp = false;
        validation.validate_nbf = false;
        validation.leeway = 0;
        validation.required_spec_claims = HashSet::from(
            ["sub", "iat", "nbf", "exp"].map(String::from),
        );

        let claims = jsonwebtoken::decode::<Claims>(token, &self.decoding_key, &validation)
            .map_err(map_decode_error)?
            .claims;

        if claims.token_type != self.token_type {
            return Err(TokenError::WrongTokenType);
        }

        let now = self.clock.now();
        if now > claims.exp {
            return Err(TokenError::Expired);
        }
        if now < claims.nbf {
            return Err(TokenError::NotYetValid);
        }

        Ok(TokenPayload {
            subject_id: claims.sub,
            role: claims.role,
            issued_at: claims.iat,
            not_before: claims.nbf,
            expires_at: claims.exp,
        })
    }
}

/// Reject anything that is not three base64url segments with the pinned `alg`,
/// before any key is involved.
fn check_structure(token: &str) -> Result<(), TokenError> {
    let segments: Vec<&str> = token.split('.').collect();
    let [header, payload, signature] = segments.as_slice() else {
        return Err(TokenError::Malformed("expected three segments".into()));
    };

    let header = URL_SAFE_NO_PAD
        .decode(header)
        .map_err(|e| TokenError::Malformed(format!("header: {}", e)))?;
    let header: RawHeader = serde_json::from_slice(&header)
        .map_err(|e| TokenError::Malformed(format!("header: {}", e)))?;

    match header.alg.parse::<Algorithm>() {
        Ok(alg) if alg == SIGNING_ALGORITHM => {}
        _ => {
            return Err(TokenError::Signature(format!(
                "unexpected algorithm {:?}",
                header.alg
            )));
        }
    }

    URL_SAFE_NO_PAD
        .decode(payload)
        .map_err(|e| TokenError::Malformed(format!("payload: {}", e)))?;

    let signature = URL_SAFE_NO_PAD
        .decode(signature)
        .map_err(|e| TokenError::Signature(format!("signature encoding: {}", e)))?;
    if signature.is_empty() {
        return Err(TokenError::Signature("missing signature".into()));
    }

    Ok(())
}

fn map_decode_error(e: jsonwebtoken::errors::Error) -> TokenError {
    match e.kind() {
        ErrorKind::ExpiredSignature => TokenError::Expired,
        ErrorKind::ImmatureSignature => TokenError::NotYetValid,
        ErrorKind::InvalidRsaKey(_) | ErrorKind::InvalidKeyFormat => {
            TokenError::KeyDecode(e.to_string())
        }
        ErrorKind::InvalidToken
        | ErrorKind::Base64(_)
        | ErrorKind::Json(_)
        | ErrorKind::Utf8(_)
        | ErrorKind::MissingRequiredClaim(_) => TokenError::Malformed(e.to_string()),
        _ => TokenError::Signature(e.to_string()),
    }
}
