//! Route guard.
//!
//! Runs before any page logic. Keeps the session fresh, then decides
//! whether the request may reach a protected page at all.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tracing::{debug, info, warn};

use crate::accounts::model::Role;
use crate::accounts::routing::Route;
use crate::error::IdentityError;
use crate::identity::{Account, IdentityProvider};
use crate::session::SessionContext;
use crate::store::ProfileStore;

/// Protection class of a request path.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Protection {
    Public,
    /// Any authenticated account.
    Member,
    /// Authenticated account whose profile role is `admin`.
    Admin,
}

impl Protection {
    /// Where an unauthenticated request for this class is sent.
    pub fn login_route(&self) -> Route {
        match self {
            Self::Admin => Route::AdminLogin,
            Self::Public | Self::Member => Route::Login,
        }
    }
}

/// Classify a path. Matching is by whole segments, so `/dashboards` is
/// public while `/dashboard` and `/dashboard/x` are not.
pub fn protection_for(path: &str) -> Protection {
    let mut segments = path.split('/').filter(|s| !s.is_empty());
    match (segments.next(), segments.next()) {
        (Some("admin"), Some("login")) => Protection::Public,
        (Some("admin"), _) => Protection::Admin,
        (Some("dashboard"), _) => Protection::Member,
        _ => Protection::Public,
    }
}

/// Outcome of guarding one request.
#[derive(Debug, Clone, PartialEq)]
pub enum GuardDecision {
    /// Let the request through. `account` is set when the guard verified
    /// the session with the provider.
    Allow { account: Option<Account> },
    Redirect(Route),
}

pub struct RouteGuard {
    identity: Arc<dyn IdentityProvider>,
    store: Arc<dyn ProfileStore>,
    refresh_leeway: Duration,
}

impl RouteGuard {
    pub fn new(
        identity: Arc<dyn IdentityProvider>,
        store: Arc<dyn ProfileStore>,
        refresh_leeway: Duration,
    ) -> Self {
        Self {
            identity,
            store,
            refresh_leeway,
        }
    }

    /// Guard a request for `path`.
    ///
    /// The session refresh is applied to `ctx` before the redirect decision,
    /// so rotated tokens reach the response either way. Provider outages
    /// fail closed on protected paths.
    pub async fn check(&self, path: &str, ctx: &mut SessionContext) -> GuardDecision {
        let protection = protection_for(path);
        let refreshed = self.refresh_if_needed(ctx).await;

        if protection == Protection::Public {
            return GuardDecision::Allow { account: None };
        }
        if !refreshed {
            debug!(path, "Session refresh failed, treating request as unauthenticated");
            return GuardDecision::Redirect(protection.login_route());
        }

        let Some(access_token) = ctx.tokens().map(|t| t.access_token.clone()) else {
            debug!(path, "No session on protected path");
            return GuardDecision::Redirect(protection.login_route());
        };

        let account = match self.identity.get_user(&access_token).await {
            Ok(account) => account,
            Err(IdentityError::Rejected { message }) => {
                info!(path, reason = %message, "Session rejected by identity provider");
                ctx.teardown();
                return GuardDecision::Redirect(protection.login_route());
            }
            Err(e) => {
                warn!(path, error = %e, "Identity provider unavailable, failing closed");
                return GuardDecision::Redirect(protection.login_route());
            }
        };

        if protection == Protection::Admin {
            match self.store.get_profile(account.id).await {
                Ok(Some(profile)) if profile.role == Role::Admin => {}
                Ok(_) => {
                    info!(user_id = %account.id, path, "Non-admin account on admin path");
                    return GuardDecision::Redirect(Route::AdminLogin);
                }
                Err(e) => {
                    warn!(user_id = %account.id, path, error = %e, "Admin check failed, failing closed");
                    return GuardDecision::Redirect(Route::AdminLogin);
                }
            }
        }

        GuardDecision::Allow {
            account: Some(account),
        }
    }

    /// Sliding refresh. Returns `false` only when a refresh was needed and
    /// did not succeed. A refresh token the provider rejects ends the session.
    async fn refresh_if_needed(&self, ctx: &mut SessionContext) -> bool {
        let refresh_token = match ctx.tokens() {
            Some(tokens) if tokens.expires_within(self.refresh_leeway, Utc::now()) => {
                tokens.refresh_token.clone()
            }
            _ => return true,
        };

        match self.identity.refresh_session(&refresh_token).await {
            Ok(session) => {
                debug!(user_id = %session.account.id, "Session refreshed");
                ctx.establish(&session);
                true
            }
            Err(IdentityError::Rejected { message }) => {
                info!(reason = %message, "Refresh token rejected, ending session");
                ctx.teardown();
                false
            }
            Err(e) => {
                warn!(error = %e, "Session refresh failed");
                false
            }
        }
    }
}
