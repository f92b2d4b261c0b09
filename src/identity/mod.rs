//! Identity provider integration.
//!
//! The provider owns accounts, credentials and sessions. This crate only
//! reads an account's id, email and signup metadata, and holds session
//! tokens on the user's behalf.
//!
//! Supports:
//! - **GoTrue**: hosted auth REST API over `reqwest`
//! - **Memory**: in-process provider for local development and tests

pub mod gotrue;
pub mod memory;

pub use gotrue::GoTrueClient;
pub use memory::MemoryIdentityProvider;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use secrecy::SecretString;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::accounts::model::Role;
use crate::error::IdentityError;

/// Metadata attached to an account at signup.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AccountMetadata {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub role: Option<String>,
}

impl AccountMetadata {
    pub fn with_role(role: Role) -> Self {
        Self {
            role: Some(role.to_string()),
        }
    }

    /// The signup role, if it names a self-assignable role.
    pub fn role(&self) -> Option<Role> {
        self.role.as_deref().and_then(Role::parse_untrusted)
    }
}

/// Provider-owned identity record.
#[derive(Debug, Clone, PartialEq)]
pub struct Account {
    pub id: Uuid,
    pub email: String,
    pub metadata: AccountMetadata,
}

/// A live session token pair.
#[derive(Debug, Clone)]
pub struct Session {
    pub access_token: SecretString,
    pub refresh_token: SecretString,
    pub expires_at: DateTime<Utc>,
    pub account: Account,
}

/// Result of a signup. `session` is `None` when the provider requires the
/// email address to be confirmed first.
#[derive(Debug, Clone)]
pub struct SignUp {
    pub account: Account,
    pub session: Option<Session>,
}

/// OAuth providers offered on the login and signup pages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OAuthProvider {
    Google,
}

impl OAuthProvider {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Google => "google",
        }
    }
}

impl std::str::FromStr for OAuthProvider {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "google" => Ok(Self::Google),
            other => Err(format!("unsupported OAuth provider '{other}'")),
        }
    }
}

/// Identity provider contract.
#[async_trait]
pub trait IdentityProvider: Send + Sync {
    /// Provider name for logs.
    fn name(&self) -> &str;

    /// Register an account with credentials and signup metadata.
    async fn sign_up(
        &self,
        email: &str,
        password: &SecretString,
        metadata: AccountMetadata,
    ) -> Result<SignUp, IdentityError>;

    /// Password login.
    async fn sign_in_with_password(
        &self,
        email: &str,
        password: &SecretString,
    ) -> Result<Session, IdentityError>;

    /// URL the browser is sent to in order to start an OAuth login.
    fn authorize_url(
        &self,
        provider: OAuthProvider,
        redirect_to: &str,
        code_challenge: &str,
    ) -> Result<String, IdentityError>;

    /// Exchange the OAuth callback `code` for a session.
    async fn exchange_code_for_session(
        &self,
        code: &str,
        code_verifier: Option<&str>,
    ) -> Result<Session, IdentityError>;

    /// Look up the account behind an access token.
    async fn get_user(&self, access_token: &SecretString) -> Result<Account, IdentityError>;

    /// Trade a refresh token for a new token pair.
    async fn refresh_session(&self, refresh_token: &SecretString) -> Result<Session, IdentityError>;

    /// Revoke the session behind an access token.
    async fn sign_out(&self, access_token: &SecretString) -> Result<(), IdentityError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn metadata_role_is_untrusted() {
        assert_eq!(AccountMetadata::with_role(Role::Exporter).role(), Some(Role::Exporter));
        let forged = AccountMetadata {
            role: Some("admin".into()),
        };
        assert_eq!(forged.role(), None);
        assert_eq!(AccountMetadata::default().role(), None);
    }

    #[test]
    fn oauth_provider_parse() {
        assert_eq!("google".parse::<OAuthProvider>().unwrap(), OAuthProvider::Google);
        assert!("myspace".parse::<OAuthProvider>().is_err());
    }
}
