//! `LifecycleController` drives an account from signup or login to the page
//! it belongs on.
//!
//! Every operation takes the request's `SessionContext` explicitly and
//! records session changes on it. Profile creation happens only on the
//! signup and OAuth callback paths; login and page visits never create one.

use std::sync::{Arc, LazyLock};
use std::time::Duration;

use rand::Rng;
use rand::distributions::Alphanumeric;
use regex::Regex;
use secrecy::{ExposeSecret, SecretString};
use serde::Serialize;
use tracing::{debug, error, info, warn};

use super::model::{NewProfile, Profile, ProfileUpdate, Role};
use super::onboarding::OnboardingSubmission;
use super::routing::{Route, resolve_destination};
use super::state::{AccountState, Lifecycle};
use crate::config::{CallbackErrorRedirect, LifecycleConfig};
use crate::error::{DatabaseError, IdentityError, LifecycleError};
use crate::identity::{Account, AccountMetadata, IdentityProvider, OAuthProvider};
use crate::session::SessionContext;
use crate::store::ProfileStore;

const MIN_PASSWORD_LEN: usize = 6;
const CODE_VERIFIER_LEN: usize = 64;

static EMAIL_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[^\s@]+@[^\s@]+\.[^\s@]+$").expect("email pattern is valid")
});

/// Error codes the login page understands in its `?error=` parameter.
pub mod callback_error {
    pub const OAUTH_FAILED: &str = "oauth_failed";
    pub const PROVISIONING_FAILED: &str = "provisioning_failed";

    /// Message for a known code. Unknown codes render nothing.
    pub fn message(code: &str) -> Option<&'static str> {
        match code {
            OAUTH_FAILED => Some("Could not complete sign-in with your provider. Please try again."),
            PROVISIONING_FAILED => {
                Some("We could not finish setting up your account. Please try again.")
            }
            _ => None,
        }
    }
}

/// Signup form input.
#[derive(Debug, Clone)]
pub struct SignupRequest {
    pub email: String,
    pub password: SecretString,
    pub confirm_password: SecretString,
    /// Raw role choice. Anything other than `importer`/`exporter` counts
    /// as no choice.
    pub role: String,
}

impl SignupRequest {
    /// Checks that run before the identity provider is contacted.
    pub fn validate(&self) -> Result<(), LifecycleError> {
        if !EMAIL_RE.is_match(self.email.trim()) {
            return Err(LifecycleError::Validation(
                "Please enter a valid email address".into(),
            ));
        }
        if self.password.expose_secret() != self.confirm_password.expose_secret() {
            return Err(LifecycleError::Validation("Passwords do not match".into()));
        }
        if self.password.expose_secret().chars().count() < MIN_PASSWORD_LEN {
            return Err(LifecycleError::Validation(format!(
                "Password must be at least {MIN_PASSWORD_LEN} characters"
            )));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum SignupOutcome {
    /// Session established and profile in place.
    Redirect(Route),
    /// The provider wants the address confirmed before issuing a session.
    ConfirmEmail { email: String },
}

/// Where the OAuth callback sends the browser.
#[derive(Debug, Clone, PartialEq)]
pub struct CallbackOutcome {
    pub route: Route,
    /// Code from [`callback_error`], appended as `?error=`.
    pub error: Option<&'static str>,
}

impl CallbackOutcome {
    fn to(route: Route) -> Self {
        Self { route, error: None }
    }

    pub fn location(&self) -> String {
        match self.error {
            Some(code) => format!("{}?error={code}", self.route.path()),
            None => self.route.path().to_string(),
        }
    }
}

/// An authenticated account together with its profile.
#[derive(Debug, Clone, Serialize)]
pub struct ResolvedAccount {
    #[serde(skip)]
    pub account: Account,
    pub profile: Profile,
}

/// Whether a page may render for the current account.
#[derive(Debug, Clone)]
pub enum PageAccess {
    Render(ResolvedAccount),
    Redirect(Route),
}

/// Coordinates the identity provider and the profile store.
pub struct LifecycleController {
    identity: Arc<dyn IdentityProvider>,
    store: Arc<dyn ProfileStore>,
    config: LifecycleConfig,
}

impl LifecycleController {
    pub fn new(
        identity: Arc<dyn IdentityProvider>,
        store: Arc<dyn ProfileStore>,
        config: LifecycleConfig,
    ) -> Self {
        Self {
            identity,
            store,
            config,
        }
    }

    pub fn config(&self) -> &LifecycleConfig {
        &self.config
    }

    // ── Entry points ────────────────────────────────────────────────

    /// Register a new account.
    ///
    /// 1. Validate the form.
    /// 2. Create the account with the chosen role as metadata.
    /// 3. Wait out the grace interval for the provider's provisioning hook.
    /// 4. Read the profile, creating it if the hook has not.
    ///
    /// A profile that still cannot be read ends the new session.
    pub async fn sign_up(
        &self,
        ctx: &mut SessionContext,
        request: &SignupRequest,
    ) -> Result<SignupOutcome, LifecycleError> {
        request.validate()?;
        let email = request.email.trim().to_string();
        let metadata = match Role::parse_untrusted(&request.role) {
            Some(role) => AccountMetadata::with_role(role),
            None => AccountMetadata::default(),
        };

        let mut lifecycle = Lifecycle::default();
        let signup = self
            .identity
            .sign_up(&email, &request.password, metadata)
            .await?;
        advance(&mut lifecycle, AccountState::Authenticating)?;
        info!(user_id = %signup.account.id, "Account created");

        let Some(session) = signup.session else {
            info!(user_id = %signup.account.id, "Signup awaiting email confirmation");
            return Ok(SignupOutcome::ConfirmEmail { email });
        };
        ctx.establish(&session);

        if let Err(e) = self
            .provision(&mut lifecycle, &session.account, None, self.config.profile_grace)
            .await
        {
            self.sign_out(ctx).await;
            return Err(e);
        }
        Ok(SignupOutcome::Redirect(Route::Onboarding))
    }

    /// Password login. Never creates a profile.
    pub async fn sign_in(
        &self,
        ctx: &mut SessionContext,
        email: &str,
        password: &SecretString,
    ) -> Result<Route, LifecycleError> {
        let mut lifecycle = Lifecycle::default();
        let session = self
            .identity
            .sign_in_with_password(email.trim(), password)
            .await?;
        advance(&mut lifecycle, AccountState::Authenticating)?;
        ctx.establish(&session);
        let user_id = session.account.id;

        let profile = match self.store.get_profile(user_id).await {
            Ok(Some(profile)) => profile,
            Ok(None) => {
                warn!(%user_id, "Login for account without a profile, signing out");
                self.sign_out(ctx).await;
                return Err(LifecycleError::InvalidCredentials);
            }
            Err(e) => {
                error!(%user_id, error = %e, "Profile fetch failed during login");
                self.sign_out(ctx).await;
                return Err(LifecycleError::Unavailable);
            }
        };

        let state = AccountState::for_profile(&profile);
        advance(&mut lifecycle, state)?;
        let destination = state.destination();
        info!(%user_id, role = %profile.role, %destination, "Login routed");
        Ok(destination)
    }

    /// Password login restricted to admin profiles.
    pub async fn admin_sign_in(
        &self,
        ctx: &mut SessionContext,
        email: &str,
        password: &SecretString,
    ) -> Result<Route, LifecycleError> {
        let session = self
            .identity
            .sign_in_with_password(email.trim(), password)
            .await?;
        ctx.establish(&session);
        let user_id = session.account.id;

        match self.store.get_profile(user_id).await {
            Ok(Some(profile)) if profile.role == Role::Admin => {
                info!(%user_id, "Admin login");
                Ok(Route::AdminDashboard)
            }
            Ok(Some(profile)) => {
                warn!(%user_id, role = %profile.role, "Non-admin attempted admin login");
                self.sign_out(ctx).await;
                Err(LifecycleError::AdminOnly)
            }
            Ok(None) => {
                warn!(%user_id, "Admin login for account without a profile");
                self.sign_out(ctx).await;
                Err(LifecycleError::AdminVerificationFailed)
            }
            Err(e) => {
                error!(%user_id, error = %e, "Profile fetch failed during admin login");
                self.sign_out(ctx).await;
                Err(LifecycleError::AdminVerificationFailed)
            }
        }
    }

    /// Begin an OAuth login. Returns the provider URL to redirect to.
    ///
    /// The PKCE verifier is stored on the session context and sent as a
    /// plain challenge.
    pub async fn start_oauth(
        &self,
        ctx: &mut SessionContext,
        provider: &str,
        role: Option<&str>,
    ) -> Result<String, LifecycleError> {
        let provider: OAuthProvider = provider
            .parse()
            .map_err(|_| LifecycleError::Validation("Unsupported sign-in provider".into()))?;

        let verifier: String = rand::thread_rng()
            .sample_iter(&Alphanumeric)
            .take(CODE_VERIFIER_LEN)
            .map(char::from)
            .collect();

        let mut redirect_to = format!("{}/auth/callback", self.config.site_url);
        if let Some(role) = role.and_then(Role::parse_untrusted) {
            redirect_to.push_str("?role=");
            redirect_to.push_str(role.as_str());
        }

        let url = self
            .identity
            .authorize_url(provider, &redirect_to, &verifier)?;
        ctx.set_code_verifier(verifier);
        debug!(provider = provider.as_str(), %redirect_to, "OAuth login started");
        Ok(url)
    }

    /// OAuth callback: exchange the code, provision, then hand off to
    /// `/onboarding`, which routes onward.
    pub async fn complete_oauth(
        &self,
        ctx: &mut SessionContext,
        code: Option<&str>,
        role: Option<&str>,
    ) -> CallbackOutcome {
        let verifier = ctx.take_code_verifier();
        let role = role.and_then(Role::parse_untrusted);

        let Some(code) = code.filter(|c| !c.is_empty()) else {
            warn!("OAuth callback without a code");
            return self.callback_failure();
        };

        let mut lifecycle = Lifecycle::default();
        let session = match self
            .identity
            .exchange_code_for_session(code, verifier.as_deref())
            .await
        {
            Ok(session) => session,
            Err(e) => {
                warn!(error = %e, "OAuth code exchange failed");
                return self.callback_failure();
            }
        };
        if let Err(e) = advance(&mut lifecycle, AccountState::Authenticating) {
            warn!(error = %e, "Unexpected lifecycle state at OAuth callback");
        }
        ctx.establish(&session);

        match self
            .provision(&mut lifecycle, &session.account, role, Duration::ZERO)
            .await
        {
            Ok(_) => CallbackOutcome::to(Route::Onboarding),
            Err(e) => {
                error!(user_id = %session.account.id, error = %e, "OAuth provisioning failed");
                self.sign_out(ctx).await;
                CallbackOutcome {
                    route: Route::Login,
                    error: Some(callback_error::PROVISIONING_FAILED),
                }
            }
        }
    }

    /// Already-authenticated visit to `/login` or `/signup`.
    ///
    /// Returns the page to skip to, or `None` to render the form. The
    /// result is never a login or signup page, so a single call per page
    /// load cannot loop. Upstream failures come back as errors so the form
    /// can suggest a retry.
    pub async fn resume_session(
        &self,
        ctx: &mut SessionContext,
    ) -> Result<Option<Route>, LifecycleError> {
        if !ctx.has_session() {
            return Ok(None);
        }
        match self.current_account(ctx, None).await {
            Ok(resolved) => {
                let destination = resolve_destination(&resolved.profile);
                debug!(user_id = %resolved.account.id, %destination, "Resuming existing session");
                Ok(Some(destination))
            }
            Err(LifecycleError::NotAuthenticated) => Ok(None),
            Err(e) => {
                warn!(error = %e, "Could not resume session, showing form");
                Err(e)
            }
        }
    }

    // ── Authenticated operations ────────────────────────────────────

    /// The signed-in account and its profile.
    ///
    /// `known` is an account the route guard already verified for this
    /// request. A missing profile ends the session.
    pub async fn current_account(
        &self,
        ctx: &mut SessionContext,
        known: Option<Account>,
    ) -> Result<ResolvedAccount, LifecycleError> {
        let account = match known {
            Some(account) => account,
            None => self.verified_account(ctx).await?,
        };

        match self.store.get_profile(account.id).await? {
            Some(profile) => Ok(ResolvedAccount { account, profile }),
            None => {
                warn!(user_id = %account.id, "Session without a profile, signing out");
                self.sign_out(ctx).await;
                Err(LifecycleError::NotAuthenticated)
            }
        }
    }

    /// Where the signed-in account belongs. Anything unresolvable goes to
    /// the login page.
    pub async fn current_destination(
        &self,
        ctx: &mut SessionContext,
        known: Option<Account>,
    ) -> Route {
        match self.current_account(ctx, known).await {
            Ok(resolved) => resolve_destination(&resolved.profile),
            Err(e) => {
                debug!(error = %e, "No destination for request");
                Route::Login
            }
        }
    }

    /// Gate for a page that only the account's current destination may see.
    pub async fn page_access(
        &self,
        ctx: &mut SessionContext,
        known: Option<Account>,
        page: Route,
    ) -> Result<PageAccess, LifecycleError> {
        let resolved = self.current_account(ctx, known).await?;
        let destination = resolve_destination(&resolved.profile);
        if destination == page {
            Ok(PageAccess::Render(resolved))
        } else {
            debug!(user_id = %resolved.account.id, %page, %destination, "Page not current for account");
            Ok(PageAccess::Redirect(destination))
        }
    }

    /// State shown by the `/onboarding` role selector.
    ///
    /// `RoleUnconfirmed` while the role can still change, otherwise the
    /// account's settled state.
    pub async fn onboarding_state(
        &self,
        ctx: &mut SessionContext,
        known: Option<Account>,
    ) -> Result<(ResolvedAccount, AccountState), LifecycleError> {
        let resolved = self.current_account(ctx, known).await?;
        let state = AccountState::for_profile(&resolved.profile);
        if state.is_terminal() {
            return Ok((resolved, state));
        }
        let state = if self.store.has_role_extension(resolved.profile.id).await? {
            state
        } else {
            AccountState::RoleUnconfirmed(resolved.profile.role)
        };
        Ok((resolved, state))
    }

    /// Pick or confirm a role before onboarding. Returns the matching form.
    pub async fn select_role(
        &self,
        ctx: &mut SessionContext,
        known: Option<Account>,
        raw_role: &str,
    ) -> Result<Route, LifecycleError> {
        let role = Role::parse_untrusted(raw_role).ok_or_else(|| {
            LifecycleError::Validation("Choose either importer or exporter".into())
        })?;
        let ResolvedAccount { profile, .. } = self.current_account(ctx, known).await?;
        let user_id = profile.id;

        let mut lifecycle = Lifecycle::at(AccountState::for_profile(&profile));
        if lifecycle.state().is_terminal() {
            info!(%user_id, "Role change refused for onboarded account");
            return Err(LifecycleError::RoleLocked);
        }
        if self.store.has_role_extension(user_id).await? {
            info!(%user_id, "Role change refused, business details already saved");
            return Err(LifecycleError::RoleLocked);
        }
        advance(&mut lifecycle, AccountState::RoleUnconfirmed(profile.role))?;

        if role != profile.role {
            self.store
                .update_profile(user_id, &ProfileUpdate::role(role))
                .await?;
            info!(%user_id, from = %profile.role, to = %role, "Role changed");
        }
        advance(&mut lifecycle, AccountState::OnboardingIncomplete(role))?;
        Ok(Route::onboarding_for(role))
    }

    /// Save the role's business details and mark the account ready.
    ///
    /// Safe to repeat: a ready account is routed to its dashboard with no
    /// writes, and an existing extension row is kept as is.
    pub async fn complete_onboarding(
        &self,
        ctx: &mut SessionContext,
        known: Option<Account>,
        submission: &OnboardingSubmission,
    ) -> Result<Route, LifecycleError> {
        let ResolvedAccount { profile, .. } = self.current_account(ctx, known).await?;
        let user_id = profile.id;
        let state = AccountState::for_profile(&profile);

        if state.is_terminal() || submission.role() != profile.role {
            debug!(%user_id, %state, submitted = %submission.role(), "Onboarding submission not applicable");
            return Ok(state.destination());
        }
        let mut lifecycle = Lifecycle::at(state);

        let created = match submission {
            OnboardingSubmission::Exporter(form) => {
                if self.store.get_exporter_profile(user_id).await?.is_some() {
                    false
                } else {
                    let row = form.validate(user_id)?;
                    ignore_duplicate(self.store.insert_exporter_profile(&row).await.map(|_| ()))?
                }
            }
            OnboardingSubmission::Importer(form) => {
                if self.store.get_importer_profile(user_id).await?.is_some() {
                    false
                } else {
                    let row = form.validate(user_id)?;
                    ignore_duplicate(self.store.insert_importer_profile(&row).await.map(|_| ()))?
                }
            }
        };

        self.store
            .update_profile(user_id, &ProfileUpdate::onboarding_completed())
            .await?;
        advance(&mut lifecycle, AccountState::Ready(profile.role))?;
        info!(%user_id, role = %profile.role, extension_created = created, "Onboarding completed");
        Ok(Route::dashboard_for(profile.role))
    }

    /// End the session locally and, best effort, at the provider.
    pub async fn sign_out(&self, ctx: &mut SessionContext) {
        let Some(tokens) = ctx.teardown() else {
            return;
        };
        if let Err(e) = self.identity.sign_out(&tokens.access_token).await {
            warn!(error = %e, "Provider sign-out failed, local session cleared anyway");
        }
    }

    // ── Internals ───────────────────────────────────────────────────

    async fn verified_account(&self, ctx: &mut SessionContext) -> Result<Account, LifecycleError> {
        let access_token = ctx
            .tokens()
            .map(|t| t.access_token.clone())
            .ok_or(LifecycleError::NotAuthenticated)?;
        match self.identity.get_user(&access_token).await {
            Ok(account) => Ok(account),
            Err(IdentityError::Rejected { message }) => {
                debug!(reason = %message, "Stale session dropped");
                ctx.teardown();
                Err(LifecycleError::NotAuthenticated)
            }
            Err(e) => {
                warn!(error = %e, "Identity provider unavailable");
                Err(LifecycleError::Unavailable)
            }
        }
    }

    /// Make sure a freshly authenticated account has a profile.
    ///
    /// A failed read counts as absence here. A missing profile is created
    /// with the role from, in order: `role_param`, account metadata,
    /// `importer`. An explicit `role_param` also overrides the stored role
    /// of an existing profile that is still free to change.
    async fn provision(
        &self,
        lifecycle: &mut Lifecycle,
        account: &Account,
        role_param: Option<Role>,
        grace: Duration,
    ) -> Result<Profile, LifecycleError> {
        let user_id = account.id;
        if !grace.is_zero() {
            debug!(%user_id, grace_ms = grace.as_millis() as u64, "Waiting for profile provisioning");
            tokio::time::sleep(grace).await;
        }

        let existing = match self.store.get_profile(user_id).await {
            Ok(profile) => profile,
            Err(e) => {
                warn!(%user_id, error = %e, "Profile fetch failed, treating as absent");
                None
            }
        };

        let profile = match existing {
            Some(profile) => self.apply_role_param(profile, role_param).await,
            None => {
                let role = role_param
                    .or_else(|| account.metadata.role())
                    .unwrap_or_default();
                match self
                    .store
                    .insert_profile(&NewProfile::provisioned(user_id, &account.email, role))
                    .await
                {
                    Ok(()) => {
                        advance(lifecycle, AccountState::ProfileMissing)?;
                        info!(%user_id, %role, "Created missing profile");
                    }
                    Err(DatabaseError::Constraint(_)) => {
                        debug!(%user_id, "Profile appeared concurrently");
                    }
                    Err(e) => {
                        error!(%user_id, error = %e, "Profile insert failed");
                        return Err(LifecycleError::ProvisioningFailed);
                    }
                }
                match self.store.get_profile(user_id).await {
                    Ok(Some(profile)) => self.apply_role_param(profile, role_param).await,
                    Ok(None) => {
                        error!(%user_id, "Profile still missing after provisioning");
                        return Err(LifecycleError::ProvisioningFailed);
                    }
                    Err(e) => {
                        error!(%user_id, error = %e, "Profile re-read failed");
                        return Err(LifecycleError::ProvisioningFailed);
                    }
                }
            }
        };

        advance(lifecycle, AccountState::for_profile(&profile))?;
        Ok(profile)
    }

    /// Last-writer-wins role override from the auth flow. Locked profiles
    /// and failed writes keep the stored role.
    async fn apply_role_param(&self, mut profile: Profile, role_param: Option<Role>) -> Profile {
        let Some(role) = role_param else {
            return profile;
        };
        if role == profile.role {
            return profile;
        }
        let user_id = profile.id;
        if profile.role == Role::Admin || profile.onboarding_completed {
            debug!(%user_id, requested = %role, "Ignoring role parameter for settled profile");
            return profile;
        }
        match self.store.has_role_extension(user_id).await {
            Ok(false) => {}
            Ok(true) => {
                debug!(%user_id, requested = %role, "Ignoring role parameter, business details saved");
                return profile;
            }
            Err(e) => {
                warn!(%user_id, error = %e, "Extension check failed, keeping stored role");
                return profile;
            }
        }
        match self
            .store
            .update_profile(user_id, &ProfileUpdate::role(role))
            .await
        {
            Ok(()) => {
                info!(%user_id, from = %profile.role, to = %role, "Role updated from auth flow");
                profile.role = role;
            }
            Err(e) => warn!(%user_id, error = %e, "Role update failed, keeping stored role"),
        }
        profile
    }

    fn callback_failure(&self) -> CallbackOutcome {
        match self.config.callback_error_redirect {
            CallbackErrorRedirect::Login => CallbackOutcome {
                route: Route::Login,
                error: Some(callback_error::OAUTH_FAILED),
            },
            CallbackErrorRedirect::Onboarding => CallbackOutcome::to(Route::Onboarding),
        }
    }
}

fn advance(lifecycle: &mut Lifecycle, target: AccountState) -> Result<(), LifecycleError> {
    lifecycle
        .advance(target)
        .map(|_| ())
        .map_err(|(from, to)| LifecycleError::InvalidTransition {
            from: from.to_string(),
            to: to.to_string(),
        })
}

/// `Ok(true)` if the row was inserted, `Ok(false)` if it already existed.
fn ignore_duplicate(result: Result<(), DatabaseError>) -> Result<bool, LifecycleError> {
    match result {
        Ok(()) => Ok(true),
        Err(DatabaseError::Constraint(_)) => Ok(false),
        Err(e) => Err(e.into()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::accounts::model::{
        ExporterProfile, ImporterProfile, NewExporterProfile, NewImporterProfile, ProfileStatus,
    };
    use crate::accounts::onboarding::{ExporterOnboardingForm, ImporterOnboardingForm};
    use crate::identity::MemoryIdentityProvider;
    use crate::store::LibSqlBackend;

    struct Fixture {
        identity: Arc<MemoryIdentityProvider>,
        store: Arc<LibSqlBackend>,
        controller: LifecycleController,
    }

    async fn fixture_with(
        identity: MemoryIdentityProvider,
        config: LifecycleConfig,
    ) -> Fixture {
        let identity = Arc::new(identity);
        let store = Arc::new(LibSqlBackend::new_memory().await.unwrap());
        let controller = LifecycleController::new(identity.clone(), store.clone(), config);
        Fixture {
            identity,
            store,
            controller,
        }
    }

    async fn fixture() -> Fixture {
        fixture_with(
            MemoryIdentityProvider::new(),
            LifecycleConfig {
                profile_grace: Duration::from_millis(10),
                ..Default::default()
            },
        )
        .await
    }

    fn signup(email: &str, role: &str) -> SignupRequest {
        SignupRequest {
            email: email.into(),
            password: SecretString::from("secret1"),
            confirm_password: SecretString::from("secret1"),
            role: role.into(),
        }
    }

    async fn signed_up(fx: &Fixture, email: &str, role: &str) -> (SessionContext, ResolvedAccount) {
        let mut ctx = SessionContext::default();
        fx.controller.sign_up(&mut ctx, &signup(email, role)).await.unwrap();
        let resolved = fx.controller.current_account(&mut ctx, None).await.unwrap();
        (ctx, resolved)
    }

    fn exporter_form() -> OnboardingSubmission {
        OnboardingSubmission::Exporter(ExporterOnboardingForm {
            company_name: "Acme Textiles".into(),
            city: "Surat".into(),
            products: "cotton, silk".into(),
            moq: "100".into(),
            ..Default::default()
        })
    }

    fn importer_form() -> OnboardingSubmission {
        OnboardingSubmission::Importer(ImporterOnboardingForm {
            company_name: "Globex".into(),
            country: "Netherlands".into(),
            city: "Rotterdam".into(),
            ..Default::default()
        })
    }

    // ── Signup ──────────────────────────────────────────────────────

    #[tokio::test]
    async fn signup_creates_profile_with_chosen_role() {
        let fx = fixture().await;
        let mut ctx = SessionContext::default();
        let outcome = fx
            .controller
            .sign_up(&mut ctx, &signup("a@x.com", "exporter"))
            .await
            .unwrap();
        assert_eq!(outcome, SignupOutcome::Redirect(Route::Onboarding));
        assert!(ctx.has_session());

        let resolved = fx.controller.current_account(&mut ctx, None).await.unwrap();
        assert_eq!(resolved.profile.role, Role::Exporter);
        assert!(!resolved.profile.onboarding_completed);
        assert_eq!(resolved.profile.status, ProfileStatus::Pending);
        assert_eq!(fx.store.count_profiles().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn signup_picks_up_hook_created_profile() {
        let store = Arc::new(LibSqlBackend::new_memory().await.unwrap());
        let identity = Arc::new(
            MemoryIdentityProvider::new()
                .with_provisioning_hook(store.clone(), Duration::from_millis(10)),
        );
        let controller = LifecycleController::new(
            identity.clone(),
            store.clone(),
            LifecycleConfig {
                profile_grace: Duration::from_millis(150),
                ..Default::default()
            },
        );

        let mut ctx = SessionContext::default();
        controller
            .sign_up(&mut ctx, &signup("a@x.com", "exporter"))
            .await
            .unwrap();
        let resolved = controller.current_account(&mut ctx, None).await.unwrap();
        assert_eq!(resolved.profile.role, Role::Exporter);
        assert_eq!(store.count_profiles().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn signup_validation_runs_before_provider() {
        let fx = fixture().await;
        let mut ctx = SessionContext::default();

        let mut request = signup("a@x.com", "importer");
        request.confirm_password = SecretString::from("secret2");
        let err = fx.controller.sign_up(&mut ctx, &request).await.unwrap_err();
        assert_eq!(err.to_string(), "Passwords do not match");

        let mut request = signup("a@x.com", "importer");
        request.password = SecretString::from("abc");
        request.confirm_password = SecretString::from("abc");
        let err = fx.controller.sign_up(&mut ctx, &request).await.unwrap_err();
        assert_eq!(err.to_string(), "Password must be at least 6 characters");

        let err = fx
            .controller
            .sign_up(&mut ctx, &signup("not-an-email", "importer"))
            .await
            .unwrap_err();
        assert!(matches!(err, LifecycleError::Validation(_)));

        assert!(!ctx.has_session());
        assert_eq!(fx.identity.active_sessions().await, 0);
    }

    #[tokio::test]
    async fn signup_cannot_claim_admin() {
        let fx = fixture().await;
        let (_, resolved) = signed_up(&fx, "a@x.com", "admin").await;
        assert_eq!(resolved.profile.role, Role::Importer);
    }

    #[tokio::test]
    async fn duplicate_signup_shows_provider_message() {
        let fx = fixture().await;
        signed_up(&fx, "a@x.com", "importer").await;
        let mut ctx = SessionContext::default();
        let err = fx
            .controller
            .sign_up(&mut ctx, &signup("a@x.com", "importer"))
            .await
            .unwrap_err();
        assert_eq!(err.user_message(), "User already registered");
        assert!(!ctx.has_session());
    }

    #[tokio::test]
    async fn signup_with_email_confirmation_does_not_provision() {
        let fx = fixture_with(
            MemoryIdentityProvider::new().with_email_confirmation(),
            LifecycleConfig::default(),
        )
        .await;
        let mut ctx = SessionContext::default();
        let outcome = fx
            .controller
            .sign_up(&mut ctx, &signup("a@x.com", "exporter"))
            .await
            .unwrap();
        assert_eq!(
            outcome,
            SignupOutcome::ConfirmEmail {
                email: "a@x.com".into()
            }
        );
        assert!(!ctx.has_session());
        assert_eq!(fx.store.count_profiles().await.unwrap(), 0);
    }

    // ── OAuth ───────────────────────────────────────────────────────

    #[tokio::test]
    async fn oauth_without_role_creates_importer() {
        let fx = fixture().await;
        let code = fx
            .identity
            .issue_oauth_code("g@x.com", AccountMetadata::default())
            .await;
        let mut ctx = SessionContext::default();
        let outcome = fx.controller.complete_oauth(&mut ctx, Some(&code), None).await;
        assert_eq!(outcome, CallbackOutcome::to(Route::Onboarding));

        let resolved = fx.controller.current_account(&mut ctx, None).await.unwrap();
        assert_eq!(resolved.profile.role, Role::Importer);
        assert!(!resolved.profile.onboarding_completed);
    }

    #[tokio::test]
    async fn oauth_role_priority() {
        let fx = fixture().await;

        let code = fx
            .identity
            .issue_oauth_code("meta@x.com", AccountMetadata::with_role(Role::Exporter))
            .await;
        let mut ctx = SessionContext::default();
        fx.controller.complete_oauth(&mut ctx, Some(&code), None).await;
        let resolved = fx.controller.current_account(&mut ctx, None).await.unwrap();
        assert_eq!(resolved.profile.role, Role::Exporter);

        let code = fx
            .identity
            .issue_oauth_code("param@x.com", AccountMetadata::with_role(Role::Exporter))
            .await;
        let mut ctx = SessionContext::default();
        fx.controller
            .complete_oauth(&mut ctx, Some(&code), Some("importer"))
            .await;
        let resolved = fx.controller.current_account(&mut ctx, None).await.unwrap();
        assert_eq!(resolved.profile.role, Role::Importer);

        let code = fx
            .identity
            .issue_oauth_code("forged@x.com", AccountMetadata::default())
            .await;
        let mut ctx = SessionContext::default();
        fx.controller
            .complete_oauth(&mut ctx, Some(&code), Some("admin"))
            .await;
        let resolved = fx.controller.current_account(&mut ctx, None).await.unwrap();
        assert_eq!(resolved.profile.role, Role::Importer);
    }

    #[tokio::test]
    async fn oauth_role_param_updates_existing_profile() {
        let fx = fixture().await;
        let code = fx
            .identity
            .issue_oauth_code("g@x.com", AccountMetadata::default())
            .await;
        let mut ctx = SessionContext::default();
        fx.controller.complete_oauth(&mut ctx, Some(&code), None).await;

        let code = fx
            .identity
            .issue_oauth_code("g@x.com", AccountMetadata::default())
            .await;
        let mut ctx = SessionContext::default();
        fx.controller
            .complete_oauth(&mut ctx, Some(&code), Some("exporter"))
            .await;
        let resolved = fx.controller.current_account(&mut ctx, None).await.unwrap();
        assert_eq!(resolved.profile.role, Role::Exporter);
        assert_eq!(fx.store.count_profiles().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn oauth_exchange_failure_follows_config() {
        let fx = fixture().await;
        let mut ctx = SessionContext::default();
        let outcome = fx
            .controller
            .complete_oauth(&mut ctx, Some("bogus"), None)
            .await;
        assert_eq!(outcome.location(), "/login?error=oauth_failed");
        assert!(!ctx.has_session());

        let fx = fixture_with(
            MemoryIdentityProvider::new(),
            LifecycleConfig {
                callback_error_redirect: CallbackErrorRedirect::Onboarding,
                ..Default::default()
            },
        )
        .await;
        let outcome = fx.controller.complete_oauth(&mut ctx, None, None).await;
        assert_eq!(outcome.location(), "/onboarding");
    }

    /// Store whose profile inserts always fail; everything else delegates.
    struct FailingInserts(LibSqlBackend);

    #[async_trait::async_trait]
    impl ProfileStore for FailingInserts {
        async fn get_profile(&self, id: uuid::Uuid) -> Result<Option<Profile>, DatabaseError> {
            self.0.get_profile(id).await
        }
        async fn insert_profile(&self, _profile: &NewProfile) -> Result<(), DatabaseError> {
            Err(DatabaseError::Query("disk I/O error".into()))
        }
        async fn update_profile(
            &self,
            id: uuid::Uuid,
            update: &ProfileUpdate,
        ) -> Result<(), DatabaseError> {
            self.0.update_profile(id, update).await
        }
        async fn list_profiles(&self, limit: usize) -> Result<Vec<Profile>, DatabaseError> {
            self.0.list_profiles(limit).await
        }
        async fn count_profiles(&self) -> Result<u64, DatabaseError> {
            self.0.count_profiles().await
        }
        async fn get_exporter_profile(
            &self,
            user_id: uuid::Uuid,
        ) -> Result<Option<ExporterProfile>, DatabaseError> {
            self.0.get_exporter_profile(user_id).await
        }
        async fn insert_exporter_profile(
            &self,
            profile: &NewExporterProfile,
        ) -> Result<ExporterProfile, DatabaseError> {
            self.0.insert_exporter_profile(profile).await
        }
        async fn count_exporters(&self, verified: bool) -> Result<u64, DatabaseError> {
            self.0.count_exporters(verified).await
        }
        async fn list_exporters(
            &self,
            verified: bool,
            limit: usize,
        ) -> Result<Vec<ExporterProfile>, DatabaseError> {
            self.0.list_exporters(verified, limit).await
        }
        async fn toggle_exporter_verified(&self, id: uuid::Uuid) -> Result<bool, DatabaseError> {
            self.0.toggle_exporter_verified(id).await
        }
        async fn get_importer_profile(
            &self,
            user_id: uuid::Uuid,
        ) -> Result<Option<ImporterProfile>, DatabaseError> {
            self.0.get_importer_profile(user_id).await
        }
        async fn insert_importer_profile(
            &self,
            profile: &NewImporterProfile,
        ) -> Result<ImporterProfile, DatabaseError> {
            self.0.insert_importer_profile(profile).await
        }
    }

    async fn failing_insert_controller(identity: Arc<MemoryIdentityProvider>) -> LifecycleController {
        let store = Arc::new(FailingInserts(LibSqlBackend::new_memory().await.unwrap()));
        LifecycleController::new(
            identity,
            store,
            LifecycleConfig {
                profile_grace: Duration::from_millis(10),
                ..Default::default()
            },
        )
    }

    #[tokio::test]
    async fn signup_provisioning_failure_signs_out() {
        let identity = Arc::new(MemoryIdentityProvider::new());
        let controller = failing_insert_controller(identity.clone()).await;
        let mut ctx = SessionContext::default();

        let err = controller
            .sign_up(&mut ctx, &signup("a@x.com", "exporter"))
            .await
            .unwrap_err();
        assert!(matches!(err, LifecycleError::ProvisioningFailed));
        assert!(!ctx.has_session());
        assert_eq!(identity.active_sessions().await, 0);
    }

    #[tokio::test]
    async fn oauth_provisioning_failure_returns_to_login() {
        let identity = Arc::new(MemoryIdentityProvider::new());
        let controller = failing_insert_controller(identity.clone()).await;
        let code = identity
            .issue_oauth_code("g@x.com", AccountMetadata::default())
            .await;
        let mut ctx = SessionContext::default();

        let outcome = controller.complete_oauth(&mut ctx, Some(&code), None).await;
        assert_eq!(outcome.location(), "/login?error=provisioning_failed");
        assert!(!ctx.has_session());
        assert_eq!(identity.active_sessions().await, 0);
    }

    #[tokio::test]
    async fn start_oauth_stores_verifier_and_role() {
        let fx = fixture().await;
        let mut ctx = SessionContext::default();
        let url = fx
            .controller
            .start_oauth(&mut ctx, "google", Some("exporter"))
            .await
            .unwrap();
        assert!(url.starts_with("memory://authorize?"));
        assert!(url.contains("provider=google"));
        assert!(url.contains("role%3Dexporter"));

        let verifier = ctx.take_code_verifier().unwrap();
        assert_eq!(verifier.len(), CODE_VERIFIER_LEN);
        assert!(url.contains(&verifier));

        let err = fx
            .controller
            .start_oauth(&mut ctx, "myspace", None)
            .await
            .unwrap_err();
        assert!(matches!(err, LifecycleError::Validation(_)));
    }

    // ── Login ───────────────────────────────────────────────────────

    #[tokio::test]
    async fn login_routes_onboarded_exporter_without_writes() {
        let fx = fixture().await;
        let (mut ctx, resolved) = signed_up(&fx, "a@x.com", "exporter").await;
        fx.controller
            .complete_onboarding(&mut ctx, None, &exporter_form())
            .await
            .unwrap();
        let before = fx.store.get_profile(resolved.account.id).await.unwrap().unwrap();

        for _ in 0..2 {
            let mut ctx = SessionContext::default();
            let route = fx
                .controller
                .sign_in(&mut ctx, "a@x.com", &SecretString::from("secret1"))
                .await
                .unwrap();
            assert_eq!(route, Route::DashboardExporter);
        }
        let after = fx.store.get_profile(resolved.account.id).await.unwrap().unwrap();
        assert_eq!(before, after);
    }

    #[tokio::test]
    async fn login_without_profile_signs_out() {
        let fx = fixture().await;
        fx.identity
            .sign_up("ghost@x.com", &SecretString::from("secret1"), AccountMetadata::default())
            .await
            .unwrap();

        let mut ctx = SessionContext::default();
        let err = fx
            .controller
            .sign_in(&mut ctx, "ghost@x.com", &SecretString::from("secret1"))
            .await
            .unwrap_err();
        assert_eq!(err.to_string(), "Invalid credentials");
        assert!(!ctx.has_session());
        assert!(ctx.has_changes());
        // The signup session is still live; the login session is gone.
        assert_eq!(fx.identity.active_sessions().await, 1);
        assert_eq!(fx.store.count_profiles().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn login_failure_passes_provider_message() {
        let fx = fixture().await;
        signed_up(&fx, "a@x.com", "importer").await;
        let mut ctx = SessionContext::default();
        let err = fx
            .controller
            .sign_in(&mut ctx, "a@x.com", &SecretString::from("wrong!"))
            .await
            .unwrap_err();
        assert_eq!(err.user_message(), "Invalid login credentials");
        assert!(!ctx.has_session());
    }

    #[tokio::test]
    async fn login_during_outage_suggests_retry() {
        let fx = fixture().await;
        fx.identity.set_available(false);
        let mut ctx = SessionContext::default();
        let err = fx
            .controller
            .sign_in(&mut ctx, "a@x.com", &SecretString::from("secret1"))
            .await
            .unwrap_err();
        assert!(matches!(err, LifecycleError::Unavailable));
    }

    #[tokio::test]
    async fn admin_login_requires_admin_role() {
        let fx = fixture().await;
        signed_up(&fx, "trader@x.com", "exporter").await;
        let mut ctx = SessionContext::default();
        let err = fx
            .controller
            .admin_sign_in(&mut ctx, "trader@x.com", &SecretString::from("secret1"))
            .await
            .unwrap_err();
        assert_eq!(err.to_string(), "Unauthorized: Admin access only");
        assert!(!ctx.has_session());

        let admin = fx
            .identity
            .sign_up("root@x.com", &SecretString::from("secret1"), AccountMetadata::default())
            .await
            .unwrap()
            .account;
        fx.store
            .insert_profile(&NewProfile::provisioned(admin.id, &admin.email, Role::Admin))
            .await
            .unwrap();
        let mut ctx = SessionContext::default();
        let route = fx
            .controller
            .admin_sign_in(&mut ctx, "root@x.com", &SecretString::from("secret1"))
            .await
            .unwrap();
        assert_eq!(route, Route::AdminDashboard);
        assert_eq!(fx.controller.current_destination(&mut ctx, None).await, Route::AdminDashboard);
    }

    // ── Existing sessions ───────────────────────────────────────────

    #[tokio::test]
    async fn resume_session_is_stable() {
        let fx = fixture().await;
        let (mut ctx, _) = signed_up(&fx, "a@x.com", "exporter").await;
        let first = fx.controller.resume_session(&mut ctx).await.unwrap();
        let second = fx.controller.resume_session(&mut ctx).await.unwrap();
        assert_eq!(first, Some(Route::OnboardingExporter));
        assert_eq!(first, second);

        let mut anonymous = SessionContext::default();
        assert_eq!(fx.controller.resume_session(&mut anonymous).await.unwrap(), None);
    }

    #[tokio::test]
    async fn resume_session_during_outage_reports_unavailable() {
        let fx = fixture().await;
        let (mut ctx, _) = signed_up(&fx, "a@x.com", "importer").await;
        fx.identity.set_available(false);

        let err = fx.controller.resume_session(&mut ctx).await.unwrap_err();
        assert!(matches!(err, LifecycleError::Unavailable));
        assert!(ctx.has_session());
    }

    #[tokio::test]
    async fn resume_session_with_missing_profile_signs_out() {
        let fx = fixture().await;
        let session = fx
            .identity
            .sign_up("ghost@x.com", &SecretString::from("secret1"), AccountMetadata::default())
            .await
            .unwrap()
            .session
            .unwrap();
        let mut ctx = SessionContext::default();
        ctx.establish(&session);
        assert_eq!(fx.controller.resume_session(&mut ctx).await.unwrap(), None);
        assert!(!ctx.has_session());
        assert_eq!(fx.store.count_profiles().await.unwrap(), 0);
    }

    // ── Role selection and onboarding ───────────────────────────────

    #[tokio::test]
    async fn select_role_switches_form() {
        let fx = fixture().await;
        let (mut ctx, resolved) = signed_up(&fx, "a@x.com", "importer").await;

        let (_, state) = fx.controller.onboarding_state(&mut ctx, None).await.unwrap();
        assert_eq!(state, AccountState::RoleUnconfirmed(Role::Importer));

        let route = fx
            .controller
            .select_role(&mut ctx, None, "exporter")
            .await
            .unwrap();
        assert_eq!(route, Route::OnboardingExporter);
        let profile = fx.store.get_profile(resolved.account.id).await.unwrap().unwrap();
        assert_eq!(profile.role, Role::Exporter);

        let err = fx
            .controller
            .select_role(&mut ctx, None, "admin")
            .await
            .unwrap_err();
        assert!(matches!(err, LifecycleError::Validation(_)));
    }

    #[tokio::test]
    async fn onboarding_completes_once() {
        let fx = fixture().await;
        let (mut ctx, resolved) = signed_up(&fx, "a@x.com", "exporter").await;

        let route = fx
            .controller
            .complete_onboarding(&mut ctx, None, &exporter_form())
            .await
            .unwrap();
        assert_eq!(route, Route::DashboardExporter);
        let done = fx.store.get_profile(resolved.account.id).await.unwrap().unwrap();
        assert!(done.onboarding_completed);
        assert!(fx.store.get_exporter_profile(resolved.account.id).await.unwrap().is_some());

        let route = fx
            .controller
            .complete_onboarding(&mut ctx, None, &exporter_form())
            .await
            .unwrap();
        assert_eq!(route, Route::DashboardExporter);
        let again = fx.store.get_profile(resolved.account.id).await.unwrap().unwrap();
        assert_eq!(done, again);

        let err = fx
            .controller
            .select_role(&mut ctx, None, "importer")
            .await
            .unwrap_err();
        assert!(matches!(err, LifecycleError::RoleLocked));
    }

    #[tokio::test]
    async fn wrong_form_redirects_without_writes() {
        let fx = fixture().await;
        let (mut ctx, resolved) = signed_up(&fx, "a@x.com", "exporter").await;
        let route = fx
            .controller
            .complete_onboarding(&mut ctx, None, &importer_form())
            .await
            .unwrap();
        assert_eq!(route, Route::OnboardingExporter);
        assert!(fx.store.get_importer_profile(resolved.account.id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn invalid_form_is_rejected() {
        let fx = fixture().await;
        let (mut ctx, _) = signed_up(&fx, "a@x.com", "exporter").await;
        let form = OnboardingSubmission::Exporter(ExporterOnboardingForm {
            company_name: "Acme".into(),
            city: "Surat".into(),
            products: "cotton".into(),
            moq: "0".into(),
            ..Default::default()
        });
        let err = fx
            .controller
            .complete_onboarding(&mut ctx, None, &form)
            .await
            .unwrap_err();
        assert!(matches!(err, LifecycleError::Validation(_)));
    }

    #[tokio::test]
    async fn extension_row_locks_role() {
        let fx = fixture().await;
        let (mut ctx, resolved) = signed_up(&fx, "a@x.com", "importer").await;
        let row = match importer_form() {
            OnboardingSubmission::Importer(form) => form.validate(resolved.account.id).unwrap(),
            OnboardingSubmission::Exporter(_) => unreachable!(),
        };
        fx.store.insert_importer_profile(&row).await.unwrap();

        let (_, state) = fx.controller.onboarding_state(&mut ctx, None).await.unwrap();
        assert_eq!(state, AccountState::OnboardingIncomplete(Role::Importer));
        let err = fx
            .controller
            .select_role(&mut ctx, None, "exporter")
            .await
            .unwrap_err();
        assert!(matches!(err, LifecycleError::RoleLocked));

        // Existing row, flag unset: completion only flips the flag.
        let route = fx
            .controller
            .complete_onboarding(&mut ctx, None, &importer_form())
            .await
            .unwrap();
        assert_eq!(route, Route::DashboardImporter);
    }

    #[tokio::test]
    async fn page_access_redirects_to_current_destination() {
        let fx = fixture().await;
        let (mut ctx, _) = signed_up(&fx, "a@x.com", "exporter").await;
        match fx
            .controller
            .page_access(&mut ctx, None, Route::DashboardExporter)
            .await
            .unwrap()
        {
            PageAccess::Redirect(route) => assert_eq!(route, Route::OnboardingExporter),
            PageAccess::Render(_) => panic!("incomplete account must not see the dashboard"),
        }
        assert!(matches!(
            fx.controller
                .page_access(&mut ctx, None, Route::OnboardingExporter)
                .await
                .unwrap(),
            PageAccess::Render(_)
        ));
    }

    #[tokio::test]
    async fn sign_out_clears_session() {
        let fx = fixture().await;
        let (mut ctx, _) = signed_up(&fx, "a@x.com", "importer").await;
        fx.controller.sign_out(&mut ctx).await;
        assert!(!ctx.has_session());
        assert_eq!(fx.identity.active_sessions().await, 0);
        assert_eq!(fx.controller.current_destination(&mut ctx, None).await, Route::Login);
    }
}
