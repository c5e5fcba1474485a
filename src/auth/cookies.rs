//! Identity cookies shared with the storefront frontend

use crate::auth::token_provider::TokenData;
use crate::proxy::headers::{COOKIE, SET_COOKIE};
use cookie::time::Duration;
use cookie::{Cookie, SameSite};
use http::{HeaderMap, HeaderValue};
use tracing::warn;

pub const ACCESS_TOKEN_COOKIE: &str = "access_token";
pub const ACCESS_TYPE_COOKIE: &str = "access_type";

/// Value of the first cookie called `name` in the request's `Cookie` headers
pub fn read_cookie(headers: &HeaderMap, name: &str) -> Option<String> {
    headers
        .get_all(COOKIE)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .flat_map(Cookie::split_parse_encoded)
        .filter_map(Result::ok)
        .find(|cookie| cookie.name() == name && !cookie.value().is_empty())
        .map(|cookie| cookie.value().to_string())
}

fn identity_cookie(
    name: &'static str,
    value: String,
    max_age_seconds: u64,
    secure: bool,
) -> Cookie<'static> {
    Cookie::build((name, value))
        .http_only(true)
        .secure(secure)
        .same_site(SameSite::Strict)
        .path("/")
        .max_age(Duration::seconds(
            i64::try_from(max_age_seconds).unwrap_or(i64::MAX),
        ))
        .build()
}

/// Append `access_token` and `access_type` cookies for a freshly minted token
pub fn append_token_cookies(headers: &mut HeaderMap, token: &TokenData, secure: bool) {
    let cookies = [
        identity_cookie(
            ACCESS_TOKEN_COOKIE,
            token.access_token.clone(),
            token.max_age_seconds,
            secure,
        ),
        identity_cookie(
            ACCESS_TYPE_COOKIE,
            token.role.clone(),
            token.max_age_seconds,
            secure,
        ),
    ];

    for cookie in cookies {
        match HeaderValue::from_str(&cookie.encoded().to_string()) {
            Ok(value) => {
                headers.append(SET_COOKIE, value);
            }
            Err(err) => warn!(cookie = cookie.name(), error = %err, "Could not encode cookie"),
        }
    }
}
