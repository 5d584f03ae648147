//! Password hashing with Argon2id.

use argon2::{
    Argon2,
    password_hash::{PasswordHash, PasswordHasher, PasswordVerifier, SaltString, rand_core::OsRng},
};

pub const MIN_PASSWORD_LENGTH: usize = 8;
pub const MAX_PASSWORD_LENGTH: usize = 128;

#[derive(Debug)]
pub enum PasswordError {
    TooShort,
    TooLong,
    Hash(String),
}

impl std::fmt::Display for PasswordError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PasswordError::TooShort => write!(
                f,
                "Password must be at least {} characters long.",
                MIN_PASSWORD_LENGTH
            ),
            PasswordError::TooLong => write!(
                f,
                "Password must be at most {} characters long.",
                MAX_PASSWORD_LENGTH
            ),
            PasswordError::Hash(e) => write!(f, "Failed to hash password: {}", e),
        }
    }
}

impl std::error::Error for PasswordError {}

/// Length policy, counted in characters.
pub fn validate_password(password: &str) -> Result<(), PasswordError> {
    let len = password.chars().count();
    if len < MIN_PASSWORD_LENGTH {
        return Err(PasswordError::TooShort);
    }
    if len > MAX_PASSWORD_LENGTH {
        return Err(PasswordError::TooLong);
    }
    Ok(())
}

/// Validate and hash. Returns a PHC string.
pub fn hash_password(password: &str) -> Result<String, PasswordError> {
    validate_password(password)?;
    let salt = SaltString::generate(&mut OsRng);
    Argon2::default()
        .hash_password(password.as_bytes(), &salt)
        .map(|hash| hash.to_string())
        .map_err(|e| PasswordError::Hash(e.to_string()))
}

/// A malformed stored hash never matches.
pub fn verify_password(password: &str, hash: &str) -> bool {
    match PasswordHash::new(hash) {
        Ok(parsed) => Argon2::default()
            .verify_password(password.as_bytes(), &parsed)
            .is_ok(),
        Err(e) => {
            tracing::warn!(error = %e, "Stored password hash is malformed");
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hash_and_verify() {
        let hash = hash_password("correct horse").unwrap();
        assert!(hash.starts_with("$argon2id$"));
        assert!(verify_password("correct horse", &hash));
        assert!(!verify_password("wrong horse", &hash));
    }

    #[test]
    fn test_salt_differs() {
        let a = hash_password("password123").unwrap();
        let b = hash_password("password123").unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn test_length_policy() {
        assert!(matches!(
            hash_password("short"),
            Err(PasswordError::TooShort)
        ));
        assert!(validate_password("12345678").is_ok());
        assert!(matches!(
            validate_password(&"x".repeat(MAX_PASSWORD_LENGTH + 1)),
            Err(PasswordError::TooLong)
        ));
    }

    #[test]
    fn test_malformed_hash_never_matches() {
        assert!(!verify_password("anything", "not-a-phc-string"));
        assert!(!verify_password("anything", ""));
    }
}
