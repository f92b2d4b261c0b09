//! Per-request session context.
//!
//! A `SessionContext` is built from the request's cookies when the request
//! arrives, handed explicitly to the route guard and the lifecycle
//! controller, and torn down on sign-out. It records every change to the
//! session so the response can carry the matching `Set-Cookie` headers.

use std::time::Duration;

use axum::http::header::{COOKIE, SET_COOKIE};
use axum::http::{HeaderMap, HeaderValue};
use chrono::{DateTime, TimeZone, Utc};
use secrecy::{ExposeSecret, SecretString};
use tracing::warn;

use crate::identity::Session;

pub const ACCESS_COOKIE: &str = "sb-access-token";
pub const REFRESH_COOKIE: &str = "sb-refresh-token";
pub const EXPIRES_COOKIE: &str = "sb-expires-at";
pub const VERIFIER_COOKIE: &str = "sb-code-verifier";

/// Session cookies outlive the access token; the refresh token decides.
const SESSION_COOKIE_MAX_AGE: u64 = 60 * 60 * 24 * 30;
const VERIFIER_COOKIE_MAX_AGE: u64 = 60 * 10;

/// Attributes applied to every cookie this service writes.
#[derive(Debug, Clone, Copy, Default)]
pub struct CookieSettings {
    pub secure: bool,
}

/// Token pair carried by the browser.
#[derive(Debug, Clone)]
pub struct SessionTokens {
    pub access_token: SecretString,
    pub refresh_token: SecretString,
    pub expires_at: DateTime<Utc>,
}

impl SessionTokens {
    /// True if the access token expires within `leeway` of `now`.
    pub fn expires_within(&self, leeway: Duration, now: DateTime<Utc>) -> bool {
        let leeway = chrono::Duration::from_std(leeway).unwrap_or(chrono::Duration::zero());
        self.expires_at - leeway <= now
    }
}

impl From<&Session> for SessionTokens {
    fn from(session: &Session) -> Self {
        Self {
            access_token: session.access_token.clone(),
            refresh_token: session.refresh_token.clone(),
            expires_at: session.expires_at,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
enum Pending {
    #[default]
    Unchanged,
    Set,
    Clear,
}

/// Explicit session state for one request.
#[derive(Debug, Clone, Default)]
pub struct SessionContext {
    tokens: Option<SessionTokens>,
    tokens_pending: Pending,
    code_verifier: Option<String>,
    verifier_pending: Pending,
}

impl SessionContext {
    /// Read the session cookies from a request.
    ///
    /// A partial or malformed cookie set yields an anonymous context that
    /// clears the leftovers on the way out.
    pub fn from_headers(headers: &HeaderMap) -> Self {
        let mut access = None;
        let mut refresh = None;
        let mut expires = None;
        let mut verifier = None;

        for (name, value) in cookie_pairs(headers) {
            match name.as_str() {
                ACCESS_COOKIE => access = Some(value),
                REFRESH_COOKIE => refresh = Some(value),
                EXPIRES_COOKIE => expires = Some(value),
                VERIFIER_COOKIE => verifier = Some(value),
                _ => {}
            }
        }

        let expires_at = expires
            .as_deref()
            .and_then(|raw| raw.parse::<i64>().ok())
            .and_then(|ts| Utc.timestamp_opt(ts, 0).single());

        let mut ctx = Self {
            code_verifier: verifier.filter(|v| !v.is_empty()),
            ..Default::default()
        };

        match (access, refresh, expires_at) {
            (Some(access), Some(refresh), Some(expires_at))
                if !access.is_empty() && !refresh.is_empty() =>
            {
                ctx.tokens = Some(SessionTokens {
                    access_token: SecretString::from(access),
                    refresh_token: SecretString::from(refresh),
                    expires_at,
                });
            }
            (None, None, None) => {}
            _ => ctx.tokens_pending = Pending::Clear,
        }
        ctx
    }

    pub fn tokens(&self) -> Option<&SessionTokens> {
        self.tokens.as_ref()
    }

    /// Whether the browser presented a session. Not a proof of validity.
    pub fn has_session(&self) -> bool {
        self.tokens.is_some()
    }

    /// Adopt a freshly issued or refreshed session.
    pub fn establish(&mut self, session: &Session) {
        self.tokens = Some(SessionTokens::from(session));
        self.tokens_pending = Pending::Set;
    }

    /// Drop the session. Returns the tokens that were held so the caller
    /// can revoke them at the provider.
    pub fn teardown(&mut self) -> Option<SessionTokens> {
        self.tokens_pending = Pending::Clear;
        self.tokens.take()
    }

    pub fn set_code_verifier(&mut self, verifier: String) {
        self.code_verifier = Some(verifier);
        self.verifier_pending = Pending::Set;
    }

    /// One-shot: the verifier cookie is cleared once read.
    pub fn take_code_verifier(&mut self) -> Option<String> {
        let verifier = self.code_verifier.take();
        if verifier.is_some() {
            self.verifier_pending = Pending::Clear;
        }
        verifier
    }

    pub fn has_changes(&self) -> bool {
        self.tokens_pending != Pending::Unchanged || self.verifier_pending != Pending::Unchanged
    }

    /// `Set-Cookie` values describing every pending change.
    pub fn set_cookie_values(&self, settings: &CookieSettings) -> Vec<String> {
        let mut values = Vec::new();
        match (self.tokens_pending, self.tokens.as_ref()) {
            (Pending::Set, Some(tokens)) => {
                values.push(cookie(settings, ACCESS_COOKIE, tokens.access_token.expose_secret(), SESSION_COOKIE_MAX_AGE));
                values.push(cookie(settings, REFRESH_COOKIE, tokens.refresh_token.expose_secret(), SESSION_COOKIE_MAX_AGE));
                values.push(cookie(
                    settings,
                    EXPIRES_COOKIE,
                    &tokens.expires_at.timestamp().to_string(),
                    SESSION_COOKIE_MAX_AGE,
                ));
            }
            (Pending::Clear, _) | (Pending::Set, None) => {
                for name in [ACCESS_COOKIE, REFRESH_COOKIE, EXPIRES_COOKIE] {
                    values.push(cookie(settings, name, "", 0));
                }
            }
            (Pending::Unchanged, _) => {}
        }
        match (self.verifier_pending, self.code_verifier.as_deref()) {
            (Pending::Set, Some(verifier)) => {
                values.push(cookie(settings, VERIFIER_COOKIE, verifier, VERIFIER_COOKIE_MAX_AGE));
            }
            (Pending::Clear, _) | (Pending::Set, None) => {
                values.push(cookie(settings, VERIFIER_COOKIE, "", 0));
            }
            (Pending::Unchanged, _) => {}
        }
        values
    }

    /// Append the pending changes to a response's headers.
    pub fn write_to(&self, settings: &CookieSettings, headers: &mut HeaderMap) {
        for value in self.set_cookie_values(settings) {
            match HeaderValue::from_str(&value) {
                Ok(header) => {
                    headers.append(SET_COOKIE, header);
                }
                Err(e) => warn!(error = %e, "Dropping unencodable session cookie"),
            }
        }
    }
}

fn cookie(settings: &CookieSettings, name: &str, value: &str, max_age: u64) -> String {
    let secure = if settings.secure { "; Secure" } else { "" };
    format!("{name}={value}; Path=/; HttpOnly; SameSite=Lax; Max-Age={max_age}{secure}")
}

/// All `name=value` pairs across the request's `Cookie` headers.
fn cookie_pairs(headers: &HeaderMap) -> impl Iterator<Item = (String, String)> + '_ {
    headers
        .get_all(COOKIE)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .flat_map(|raw| raw.split(';'))
        .filter_map(|pair| {
            let (name, value) = pair.trim().split_once('=')?;
            Some((name.trim().to_string(), value.trim().to_string()))
        })
}
