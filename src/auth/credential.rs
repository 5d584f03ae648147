//! Bearer credential extraction.
//!
//! A credential is looked for in the configured header first, then in the
//! configured cookie. A header with a different scheme does not count and
//! lookup falls through to the cookie.

use axum::http::{HeaderMap, HeaderName, header};

use super::cookie::{ACCESS_COOKIE_NAME, REFRESH_COOKIE_NAME, get_cookie};

/// Authorization scheme. Matched case-sensitively.
pub const BEARER_SCHEME: &str = "Bearer";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CredentialSource {
    Header,
    Cookie,
}

/// Where to look for a credential.
#[derive(Debug, Clone)]
pub struct CredentialLocation {
    pub header: HeaderName,
    pub scheme: &'static str,
    pub cookie: &'static str,
}

impl CredentialLocation {
    /// `Authorization: Bearer` or the `access_token` cookie.
    pub fn access() -> Self {
        Self {
            header: header::AUTHORIZATION,
            scheme: BEARER_SCHEME,
            cookie: ACCESS_COOKIE_NAME,
        }
    }

    /// `Authorization: Bearer` or the `refresh_token` cookie.
    pub fn refresh() -> Self {
        Self {
            header: header::AUTHORIZATION,
            scheme: BEARER_SCHEME,
            cookie: REFRESH_COOKIE_NAME,
        }
    }
}

/// A raw bearer string taken from a request.
#[derive(Clone)]
pub struct Credential {
    value: String,
    source: CredentialSource,
}

impl Credential {
    pub fn as_str(&self) -> &str {
        &self.value
    }

    pub fn source(&self) -> CredentialSource {
        self.source
    }
}

impl std::fmt::Debug for Credential {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credential")
            .field("value", &"<redacted>")
            .field("source", &self.source)
            .finish()
    }
}

/// No usable credential in the request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MissingCredential;

impl std::fmt::Display for MissingCredential {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "No credential in request")
    }
}

impl std::error::Error for MissingCredential {}

/// Pull a credential out of the request headers.
///
/// Empty values in either location count as absent.
pub fn extract_credential(
    headers: &HeaderMap,
    location: &CredentialLocation,
) -> Result<Credential, MissingCredential> {
    if let Some(token) = from_header(headers, location) {
        return Ok(Credential {
            value: token.to_string(),
            source: CredentialSource::Header,
        });
    }

    match get_cookie(headers, location.cookie) {
        Some(token) if !token.is_empty() => Ok(Credential {
            value: token.to_string(),
            source: CredentialSource::Cookie,
        }),
        _ => Err(MissingCredential),
    }
}

fn from_header<'a>(headers: &'a HeaderMap, location: &CredentialLocation) -> Option<&'a str> {
    let value = headers.get(&location.header)?.to_str().ok()?.trim_start();
    let rest = value.strip_prefix(location.scheme)?;
    // The scheme must be a whole field: "Bearerxyz" is not "Bearer xyz".
    if !rest.starts_with(char::is_whitespace) {
        return None;
    }
    let token = rest.trim();
    (!token.is_empty()).then_some(token)
}
