//! In-process identity provider.
//!
//! Behaves like the hosted provider as far as the lifecycle controller can
//! observe: provider-worded errors, rotating refresh tokens, and an optional
//! post-signup hook that creates the profile row asynchronously after a
//! delay. Used for local development (`TRADELINK_IDENTITY=memory`) and tests.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use reqwest::Url;
use secrecy::{ExposeSecret, SecretString};
use tokio::sync::RwLock;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::{Account, AccountMetadata, IdentityProvider, OAuthProvider, Session, SignUp};
use crate::accounts::model::NewProfile;
use crate::error::{DatabaseError, IdentityError};
use crate::store::ProfileStore;

const DEFAULT_SESSION_TTL: Duration = Duration::from_secs(3600);

/// Profile-creating hook fired after each new account, mimicking a
/// database trigger on the provider side.
struct ProvisioningHook {
    store: Arc<dyn ProfileStore>,
    delay: Duration,
}

struct StoredAccount {
    account: Account,
    /// `None` for accounts created through OAuth.
    password: Option<SecretString>,
}

#[derive(Default)]
struct Inner {
    /// Keyed by lowercased email.
    accounts: HashMap<String, StoredAccount>,
    /// access token → (account id, expiry)
    sessions: HashMap<String, (Uuid, chrono::DateTime<Utc>)>,
    /// refresh token → account id
    refresh_tokens: HashMap<String, Uuid>,
    /// one-shot OAuth codes → account id
    codes: HashMap<String, Uuid>,
}

impl Inner {
    fn account_by_id(&self, id: Uuid) -> Option<&Account> {
        self.accounts
            .values()
            .map(|stored| &stored.account)
            .find(|account| account.id == id)
    }
}

/// In-memory `IdentityProvider`.
pub struct MemoryIdentityProvider {
    inner: RwLock<Inner>,
    session_ttl: Duration,
    available: AtomicBool,
    confirm_email: bool,
    hook: Option<ProvisioningHook>,
}

impl Default for MemoryIdentityProvider {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryIdentityProvider {
    pub fn new() -> Self {
        Self {
            inner: RwLock::new(Inner::default()),
            session_ttl: DEFAULT_SESSION_TTL,
            available: AtomicBool::new(true),
            confirm_email: false,
            hook: None,
        }
    }

    /// Lifetime of issued access tokens.
    pub fn with_session_ttl(mut self, ttl: Duration) -> Self {
        self.session_ttl = ttl;
        self
    }

    /// Create a profile row for every new account, `delay` after the
    /// account is created.
    pub fn with_provisioning_hook(mut self, store: Arc<dyn ProfileStore>, delay: Duration) -> Self {
        self.hook = Some(ProvisioningHook { store, delay });
        self
    }

    /// Withhold the session at signup until the address is confirmed.
    pub fn with_email_confirmation(mut self) -> Self {
        self.confirm_email = true;
        self
    }

    /// Simulate a provider outage (`false`) or recovery (`true`).
    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::SeqCst);
    }

    /// Complete an OAuth login at the provider and return the callback
    /// `code`. Creates the account on first use.
    pub async fn issue_oauth_code(&self, email: &str, metadata: AccountMetadata) -> String {
        let key = email.to_ascii_lowercase();
        let code = token("code");
        let (account, created) = {
            let mut inner = self.inner.write().await;
            let created = !inner.accounts.contains_key(&key);
            let stored = inner.accounts.entry(key).or_insert_with(|| StoredAccount {
                account: Account {
                    id: Uuid::new_v4(),
                    email: email.to_string(),
                    metadata,
                },
                password: None,
            });
            let account = stored.account.clone();
            inner.codes.insert(code.clone(), account.id);
            (account, created)
        };
        if created {
            self.fire_hook(&account);
        }
        code
    }

    /// Number of sessions currently live (for tests).
    pub async fn active_sessions(&self) -> usize {
        self.inner.read().await.sessions.len()
    }

    fn ensure_available(&self) -> Result<(), IdentityError> {
        if self.available.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(IdentityError::Unavailable("memory provider offline".into()))
        }
    }

    fn issue_session(&self, inner: &mut Inner, account: Account) -> Session {
        let now = Utc::now();
        // Expired access tokens can never verify again.
        inner.sessions.retain(|_, (_, expires_at)| *expires_at > now);

        let access = token("at");
        let refresh = token("rt");
        let ttl = chrono::Duration::from_std(self.session_ttl).unwrap_or(chrono::Duration::hours(1));
        let expires_at = now + ttl;
        inner.sessions.insert(access.clone(), (account.id, expires_at));
        inner.refresh_tokens.insert(refresh.clone(), account.id);
        Session {
            access_token: SecretString::from(access),
            refresh_token: SecretString::from(refresh),
            expires_at,
            account,
        }
    }

    fn fire_hook(&self, account: &Account) {
        let Some(hook) = self.hook.as_ref() else {
            return;
        };
        let store = Arc::clone(&hook.store);
        let delay = hook.delay;
        let profile = NewProfile::provisioned(
            account.id,
            account.email.clone(),
            account.metadata.role().unwrap_or_default(),
        );
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            match store.insert_profile(&profile).await {
                Ok(()) => debug!(user_id = %profile.id, "Provisioning hook created profile"),
                // The application may have self-healed first.
                Err(DatabaseError::Constraint(_)) => {
                    debug!(user_id = %profile.id, "Provisioning hook found profile already present")
                }
                Err(e) => warn!(user_id = %profile.id, error = %e, "Provisioning hook failed"),
            }
        });
    }
}

fn token(prefix: &str) -> String {
    format!("mem-{prefix}-{}", Uuid::new_v4().simple())
}

#[async_trait]
impl IdentityProvider for MemoryIdentityProvider {
    fn name(&self) -> &str {
        "memory"
    }

    async fn sign_up(
        &self,
        email: &str,
        password: &SecretString,
        metadata: AccountMetadata,
    ) -> Result<SignUp, IdentityError> {
        self.ensure_available()?;
        let key = email.to_ascii_lowercase();
        let (account, session) = {
            let mut inner = self.inner.write().await;
            if inner.accounts.contains_key(&key) {
                return Err(IdentityError::rejected("User already registered"));
            }
            let account = Account {
                id: Uuid::new_v4(),
                email: email.to_string(),
                metadata,
            };
            inner.accounts.insert(
                key,
                StoredAccount {
                    account: account.clone(),
                    password: Some(password.clone()),
                },
            );
            let session = (!self.confirm_email).then(|| self.issue_session(&mut inner, account.clone()));
            (account, session)
        };
        info!(user_id = %account.id, "Memory provider created account");
        self.fire_hook(&account);
        Ok(SignUp { account, session })
    }

    async fn sign_in_with_password(
        &self,
        email: &str,
        password: &SecretString,
    ) -> Result<Session, IdentityError> {
        self.ensure_available()?;
        let mut inner = self.inner.write().await;
        let account = match inner.accounts.get(&email.to_ascii_lowercase()) {
            Some(StoredAccount {
                account,
                password: Some(stored),
            }) if stored.expose_secret() == password.expose_secret() => account.clone(),
            _ => return Err(IdentityError::rejected("Invalid login credentials")),
        };
        Ok(self.issue_session(&mut inner, account))
    }

    fn authorize_url(
        &self,
        provider: OAuthProvider,
        redirect_to: &str,
        code_challenge: &str,
    ) -> Result<String, IdentityError> {
        let url = Url::parse_with_params(
            "memory://authorize",
            &[
                ("provider", provider.as_str()),
                ("redirect_to", redirect_to),
                ("code_challenge", code_challenge),
            ],
        )
        .map_err(|e| IdentityError::InvalidResponse(e.to_string()))?;
        Ok(url.to_string())
    }

    async fn exchange_code_for_session(
        &self,
        code: &str,
        _code_verifier: Option<&str>,
    ) -> Result<Session, IdentityError> {
        self.ensure_available()?;
        let mut inner = self.inner.write().await;
        let account = inner
            .codes
            .remove(code)
            .and_then(|id| inner.account_by_id(id).cloned())
            .ok_or_else(|| IdentityError::rejected("invalid flow state, no valid flow state found"))?;
        Ok(self.issue_session(&mut inner, account))
    }

    async fn get_user(&self, access_token: &SecretString) -> Result<Account, IdentityError> {
        self.ensure_available()?;
        let inner = self.inner.read().await;
        let (id, expires_at) = inner
            .sessions
            .get(access_token.expose_secret())
            .copied()
            .ok_or_else(|| IdentityError::rejected("invalid JWT: unable to parse or verify signature"))?;
        if expires_at <= Utc::now() {
            return Err(IdentityError::rejected("invalid JWT: token is expired"));
        }
        inner
            .account_by_id(id)
            .cloned()
            .ok_or_else(|| IdentityError::rejected("User from sub claim in JWT does not exist"))
    }

    async fn refresh_session(&self, refresh_token: &SecretString) -> Result<Session, IdentityError> {
        self.ensure_available()?;
        let mut inner = self.inner.write().await;
        let account = inner
            .refresh_tokens
            .remove(refresh_token.expose_secret())
            .and_then(|id| inner.account_by_id(id).cloned())
            .ok_or_else(|| IdentityError::rejected("Invalid Refresh Token: Refresh Token Not Found"))?;
        // Rotation: the old access token dies with its refresh token.
        inner.sessions.retain(|_, (id, _)| *id != account.id);
        Ok(self.issue_session(&mut inner, account))
    }

    async fn sign_out(&self, access_token: &SecretString) -> Result<(), IdentityError> {
        self.ensure_available()?;
        let mut inner = self.inner.write().await;
        if let Some((id, _)) = inner.sessions.remove(access_token.expose_secret()) {
            inner.refresh_tokens.retain(|_, owner| *owner != id);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::accounts::model::Role;
    use crate::store::LibSqlBackend;

    fn secret(s: &str) -> SecretString {
        SecretString::from(s.to_string())
    }

    #[tokio::test]
    async fn sign_up_then_sign_in() {
        let idp = MemoryIdentityProvider::new();
        let signup = idp
            .sign_up("a@x.com", &secret("secret1"), AccountMetadata::with_role(Role::Exporter))
            .await
            .unwrap();
        assert!(signup.session.is_some());
        assert_eq!(signup.account.metadata.role(), Some(Role::Exporter));

        let session = idp.sign_in_with_password("A@X.com", &secret("secret1")).await.unwrap();
        assert_eq!(session.account.id, signup.account.id);

        let user = idp.get_user(&session.access_token).await.unwrap();
        assert_eq!(user.email, "a@x.com");
    }

    #[tokio::test]
    async fn wrong_password_uses_provider_wording() {
        let idp = MemoryIdentityProvider::new();
        idp.sign_up("a@x.com", &secret("secret1"), AccountMetadata::default())
            .await
            .unwrap();
        let err = idp
            .sign_in_with_password("a@x.com", &secret("nope"))
            .await
            .unwrap_err();
        assert_eq!(err.to_string(), "Invalid login credentials");
    }

    #[tokio::test]
    async fn duplicate_signup_rejected() {
        let idp = MemoryIdentityProvider::new();
        idp.sign_up("a@x.com", &secret("secret1"), AccountMetadata::default())
            .await
            .unwrap();
        let err = idp
            .sign_up("a@x.com", &secret("secret2"), AccountMetadata::default())
            .await
            .unwrap_err();
        assert_eq!(err.to_string(), "User already registered");
    }

    #[tokio::test]
    async fn email_confirmation_withholds_session() {
        let idp = MemoryIdentityProvider::new().with_email_confirmation();
        let signup = idp
            .sign_up("a@x.com", &secret("secret1"), AccountMetadata::default())
            .await
            .unwrap();
        assert!(signup.session.is_none());
        assert_eq!(idp.active_sessions().await, 0);
    }

    #[tokio::test]
    async fn refresh_rotates_tokens() {
        let idp = MemoryIdentityProvider::new();
        let session = idp
            .sign_up("a@x.com", &secret("secret1"), AccountMetadata::default())
            .await
            .unwrap()
            .session
            .unwrap();

        let refreshed = idp.refresh_session(&session.refresh_token).await.unwrap();
        assert!(idp.get_user(&refreshed.access_token).await.is_ok());
        assert!(idp.get_user(&session.access_token).await.is_err());
        assert!(idp.refresh_session(&session.refresh_token).await.is_err());
    }

    #[tokio::test]
    async fn expired_access_token_is_rejected() {
        let idp = MemoryIdentityProvider::new().with_session_ttl(Duration::ZERO);
        let session = idp
            .sign_up("a@x.com", &secret("secret1"), AccountMetadata::default())
            .await
            .unwrap()
            .session
            .unwrap();
        assert!(idp.get_user(&session.access_token).await.is_err());
    }

    #[tokio::test]
    async fn expired_sessions_are_pruned_on_issue() {
        let idp = MemoryIdentityProvider::new().with_session_ttl(Duration::ZERO);
        for i in 0..3 {
            idp.sign_up(&format!("u{i}@x.com"), &secret("secret1"), AccountMetadata::default())
                .await
                .unwrap();
        }
        // Only the most recent, already expired, token is still held.
        assert_eq!(idp.active_sessions().await, 1);

        let session = idp
            .sign_in_with_password("u0@x.com", &secret("secret1"))
            .await
            .unwrap();
        assert_eq!(idp.active_sessions().await, 1);
        assert!(idp.get_user(&session.access_token).await.is_err());
    }

    #[tokio::test]
    async fn oauth_code_is_single_use() {
        let idp = MemoryIdentityProvider::new();
        let code = idp.issue_oauth_code("g@x.com", AccountMetadata::default()).await;
        assert!(idp.exchange_code_for_session(&code, None).await.is_ok());
        assert!(idp.exchange_code_for_session(&code, None).await.is_err());
    }

    #[tokio::test]
    async fn outage_reports_unavailable() {
        let idp = MemoryIdentityProvider::new();
        idp.set_available(false);
        let err = idp
            .sign_in_with_password("a@x.com", &secret("secret1"))
            .await
            .unwrap_err();
        assert!(matches!(err, IdentityError::Unavailable(_)));
    }

    #[tokio::test]
    async fn sign_out_revokes_session() {
        let idp = MemoryIdentityProvider::new();
        let session = idp
            .sign_up("a@x.com", &secret("secret1"), AccountMetadata::default())
            .await
            .unwrap()
            .session
            .unwrap();
        idp.sign_out(&session.access_token).await.unwrap();
        assert_eq!(idp.active_sessions().await, 0);
        assert!(idp.refresh_session(&session.refresh_token).await.is_err());
    }

    #[tokio::test]
    async fn provisioning_hook_creates_profile_after_delay() {
        let store: Arc<dyn ProfileStore> = Arc::new(LibSqlBackend::new_memory().await.unwrap());
        let idp = MemoryIdentityProvider::new()
            .with_provisioning_hook(Arc::clone(&store), Duration::from_millis(20));
        let signup = idp
            .sign_up("a@x.com", &secret("secret1"), AccountMetadata::with_role(Role::Exporter))
            .await
            .unwrap();

        assert!(store.get_profile(signup.account.id).await.unwrap().is_none());
        tokio::time::sleep(Duration::from_millis(200)).await;
        let profile = store.get_profile(signup.account.id).await.unwrap().unwrap();
        assert_eq!(profile.role, Role::Exporter);
        assert!(!profile.onboarding_completed);
    }
}
