//! Resolves the visitor's identity token for a request

use crate::auth::client::GuestTokenIssuer;
use crate::auth::cookies::{read_cookie, ACCESS_TOKEN_COOKIE, ACCESS_TYPE_COOKIE};
use chrono::Utc;
use http::HeaderMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

/// Role assumed when the cookie carries a token but no role
pub const DEFAULT_ROLE: &str = "guest";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TokenData {
    pub access_token: String,
    pub role: String,
    pub max_age_seconds: u64,
}

/// Token for the current request and whether it was minted just now
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ResolvedToken {
    pub token: Option<TokenData>,
    pub minted: bool,
}

impl ResolvedToken {
    pub fn access_token(&self) -> Option<&str> {
        self.token.as_ref().map(|token| token.access_token.as_str())
    }
}

#[derive(Clone)]
pub struct AuthTokenProvider {
    issuer: Arc<dyn GuestTokenIssuer>,
    safety_margin: Duration,
}

impl AuthTokenProvider {
    pub fn new(issuer: Arc<dyn GuestTokenIssuer>, safety_margin: Duration) -> Self {
        Self {
            issuer,
            safety_margin,
        }
    }

    /// Use the identity cookie when present, otherwise mint a guest token.
    ///
    /// Minting failures are logged and the request continues anonymously.
    pub async fn resolve(&self, headers: &HeaderMap) -> ResolvedToken {
        if let Some(access_token) = read_cookie(headers, ACCESS_TOKEN_COOKIE) {
            let role =
                read_cookie(headers, ACCESS_TYPE_COOKIE).unwrap_or_else(|| DEFAULT_ROLE.to_string());
            return ResolvedToken {
                token: Some(TokenData {
                    access_token,
                    role,
                    max_age_seconds: 0,
                }),
                minted: false,
            };
        }

        match self.issuer.issue_guest_token().await {
            Ok(guest) => {
                let max_age_seconds = cookie_max_age(
                    guest.exp,
                    guest.iat,
                    Utc::now().timestamp(),
                    self.safety_margin,
                );
                debug!(role = %guest.role, max_age_seconds, "Minted guest token");
                ResolvedToken {
                    token: Some(TokenData {
                        access_token: guest.access_token,
                        role: guest.role,
                        max_age_seconds,
                    }),
                    minted: true,
                }
            }
            Err(err) => {
                warn!(code = err.code(), error = %err, "Could not mint guest token");
                ResolvedToken::default()
            }
        }
    }
}

/// Remaining token lifetime minus `margin`, clamped at zero.
///
/// All instants are seconds since the epoch.
pub fn cookie_max_age(exp: i64, iat: i64, now: i64, margin: Duration) -> u64 {
    let lifetime = exp.saturating_sub(iat);
    let elapsed = now.saturating_sub(iat);
    let margin = i64::try_from(margin.as_secs()).unwrap_or(i64::MAX);
    let remaining = lifetime.saturating_sub(elapsed).saturating_sub(margin);
    u64::try_from(remaining).unwrap_or(0)
}
