//! Cookie parsing and `Set-Cookie` formatting.

use axum::http::{HeaderMap, HeaderValue, header};

/// Cookie name for the access token.
pub const ACCESS_COOKIE_NAME: &str = "access_token";

/// Cookie name for the refresh token.
pub const REFRESH_COOKIE_NAME: &str = "refresh_token";

/// Non-HttpOnly marker so the client can tell it has a session.
pub const LOGGED_IN_COOKIE_NAME: &str = "logged_in";

/// Extract a cookie value from the Cookie headers. The first match wins.
pub fn get_cookie<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers
        .get_all(header::COOKIE)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .flat_map(|value| value.split(';'))
        .filter_map(|pair| pair.trim().split_once('='))
        .find(|(key, _)| key.trim() == name)
        .map(|(_, value)| value.trim())
}

/// An HttpOnly session cookie.
pub fn session_cookie(name: &str, value: &str, max_age: u64, secure: bool) -> String {
    format!(
        "{}={}; HttpOnly; SameSite=Strict; Path=/; Max-Age={}{}",
        name,
        value,
        max_age,
        secure_suffix(secure)
    )
}

/// A cookie readable by the client.
pub fn visible_cookie(name: &str, value: &str, max_age: u64, secure: bool) -> String {
    format!(
        "{}={}; SameSite=Strict; Path=/; Max-Age={}{}",
        name,
        value,
        max_age,
        secure_suffix(secure)
    )
}

/// Expire a cookie in the browser.
pub fn expired_cookie(name: &str, secure: bool) -> String {
    format!(
        "{}=; HttpOnly; SameSite=Strict; Path=/; Max-Age=0{}",
        name,
        secure_suffix(secure)
    )
}

/// Append `Set-Cookie` headers, skipping any value that is not a valid header.
pub fn append_cookies<I>(headers: &mut HeaderMap, cookies: I)
where
    I: IntoIterator<Item = String>,
{
    for cookie in cookies {
        if let Ok(value) = HeaderValue::from_str(&cookie) {
            headers.append(header::SET_COOKIE, value);
        }
    }
}

fn secure_suffix(secure: bool) -> &'static str {
    if secure { "; Secure" } else { "" }
}
