//! Account lifecycle state machine.

use serde::Serialize;

use super::model::{Profile, Role};
use super::routing::Route;

/// Where an account stands between "no session" and "routed to a dashboard".
///
/// ```text
/// Anonymous ─signup/login/oauth─▶ Authenticating ─profile read─▶ ProfileMissing
///                                        │                          │ self-heal
///                                        ▼                          ▼
///                          RoleUnconfirmed ◀──▶ OnboardingIncomplete ─▶ Ready(role)
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "state", content = "role", rename_all = "snake_case")]
pub enum AccountState {
    Anonymous,
    Authenticating,
    ProfileMissing,
    /// Onboarding not done and the user is still free to switch role.
    RoleUnconfirmed(Role),
    OnboardingIncomplete(Role),
    Ready(Role),
}

impl AccountState {
    /// State implied by a stored profile.
    pub fn for_profile(profile: &Profile) -> Self {
        match profile.role {
            Role::Admin => Self::Ready(Role::Admin),
            role if profile.onboarding_completed => Self::Ready(role),
            role => Self::OnboardingIncomplete(role),
        }
    }

    /// Check if a transition from `self` to `target` is valid.
    pub fn can_transition_to(&self, target: AccountState) -> bool {
        use AccountState::*;
        match (self, target) {
            // Sign-out is always allowed.
            (_, Anonymous) => true,
            (Anonymous, Authenticating) => true,
            (Authenticating, ProfileMissing | OnboardingIncomplete(_) | Ready(_)) => true,
            (ProfileMissing, OnboardingIncomplete(_) | Ready(Role::Admin)) => true,
            (OnboardingIncomplete(_), RoleUnconfirmed(_) | OnboardingIncomplete(_) | Ready(_)) => {
                true
            }
            (RoleUnconfirmed(_), OnboardingIncomplete(_)) => true,
            (Ready(a), Ready(b)) => *a == b,
            _ => false,
        }
    }

    /// Whether the account has reached a dashboard.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Ready(_))
    }

    /// The page an account in this state should be sent to.
    pub fn destination(&self) -> Route {
        match self {
            Self::Ready(role) => Route::dashboard_for(*role),
            Self::OnboardingIncomplete(role) | Self::RoleUnconfirmed(role) => {
                Route::onboarding_for(*role)
            }
            Self::Anonymous | Self::Authenticating | Self::ProfileMissing => Route::Login,
        }
    }
}

impl std::fmt::Display for AccountState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Anonymous => write!(f, "anonymous"),
            Self::Authenticating => write!(f, "authenticating"),
            Self::ProfileMissing => write!(f, "profile_missing"),
            Self::RoleUnconfirmed(role) => write!(f, "role_unconfirmed({role})"),
            Self::OnboardingIncomplete(role) => write!(f, "onboarding_incomplete({role})"),
            Self::Ready(role) => write!(f, "ready({role})"),
        }
    }
}

/// Tracks one account's walk through the state machine during a single
/// controller operation, rejecting illegal moves.
#[derive(Debug, Clone)]
pub struct Lifecycle {
    state: AccountState,
}

impl Default for Lifecycle {
    fn default() -> Self {
        Self {
            state: AccountState::Anonymous,
        }
    }
}

impl Lifecycle {
    /// Start from a known state, e.g. one derived from a stored profile.
    pub fn at(state: AccountState) -> Self {
        Self { state }
    }

    pub fn state(&self) -> AccountState {
        self.state
    }

    /// Move to `target`. Returns the previous state on success.
    pub fn advance(&mut self, target: AccountState) -> Result<AccountState, (AccountState, AccountState)> {
        if !self.state.can_transition_to(target) {
            return Err((self.state, target));
        }
        let previous = std::mem::replace(&mut self.state, target);
        tracing::debug!(from = %previous, to = %target, "Account state transition");
        Ok(previous)
    }
}
