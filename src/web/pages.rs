//! Account pages: login, signup, OAuth, onboarding, dashboards.

use axum::Extension;
use axum::extract::{Form, Query, State};
use axum::response::{IntoResponse, Response};
use secrecy::SecretString;
use serde::Deserialize;
use serde_json::json;
use tracing::{info, warn};

use super::{AppState, PageView, RequestSession, found, page_error};
use crate::accounts::controller::callback_error;
use crate::accounts::onboarding::{
    ExporterOnboardingForm, ImporterOnboardingForm, OnboardingSubmission,
};
use crate::accounts::{AccountState, PageAccess, Role, Route, SignupOutcome, SignupRequest};
use crate::error::LifecycleError;

#[derive(Debug, Default, Deserialize)]
pub struct LoginQuery {
    pub error: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct LoginForm {
    #[serde(default)]
    pub email: String,
    #[serde(default)]
    pub password: String,
}

#[derive(Debug, Deserialize)]
pub struct SignupForm {
    #[serde(default)]
    pub email: String,
    #[serde(default)]
    pub password: String,
    #[serde(default)]
    pub confirm_password: String,
    #[serde(default)]
    pub role: String,
}

impl From<SignupForm> for SignupRequest {
    fn from(form: SignupForm) -> Self {
        Self {
            email: form.email,
            password: SecretString::from(form.password),
            confirm_password: SecretString::from(form.confirm_password),
            role: form.role,
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct OAuthStartQuery {
    pub provider: Option<String>,
    pub role: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct CallbackQuery {
    pub code: Option<String>,
    pub role: Option<String>,
    /// Set by the provider when the user cancels or the login fails.
    pub error_description: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct RoleForm {
    #[serde(default)]
    pub role: String,
}

// ── Login and signup ────────────────────────────────────────────────────

/// GET /login
///
/// Signed-in visitors skip straight to where they belong.
pub async fn login_page(
    State(state): State<AppState>,
    Extension(session): Extension<RequestSession>,
    Query(query): Query<LoginQuery>,
) -> Response {
    let mut ctx = session.lock().await;
    match state.controller.resume_session(&mut ctx).await {
        Ok(Some(route)) => return found(route.path()),
        Ok(None) => {}
        Err(e) => return page_error("login", &e),
    }
    let mut view = PageView::new("login");
    if let Some(message) = query.error.as_deref().and_then(callback_error::message) {
        view = view.with_error(message);
    }
    view.into_response()
}

/// POST /login
pub async fn login(
    State(state): State<AppState>,
    Extension(session): Extension<RequestSession>,
    Form(form): Form<LoginForm>,
) -> Response {
    let mut ctx = session.lock().await;
    let password = SecretString::from(form.password);
    match state.controller.sign_in(&mut ctx, &form.email, &password).await {
        Ok(route) => found(route.path()),
        Err(e) => page_error("login", &e),
    }
}

/// GET /signup
pub async fn signup_page(
    State(state): State<AppState>,
    Extension(session): Extension<RequestSession>,
) -> Response {
    let mut ctx = session.lock().await;
    match state.controller.resume_session(&mut ctx).await {
        Ok(Some(route)) => return found(route.path()),
        Ok(None) => {}
        Err(e) => return page_error("signup", &e),
    }
    PageView::new("signup")
        .with_data(json!({ "roles": [Role::Importer, Role::Exporter] }))
        .into_response()
}

/// POST /signup
pub async fn signup(
    State(state): State<AppState>,
    Extension(session): Extension<RequestSession>,
    Form(form): Form<SignupForm>,
) -> Response {
    let mut ctx = session.lock().await;
    let request = SignupRequest::from(form);
    match state.controller.sign_up(&mut ctx, &request).await {
        Ok(SignupOutcome::Redirect(route)) => found(route.path()),
        Ok(SignupOutcome::ConfirmEmail { email }) => PageView::new("signup")
            .with_notice(format!("Check {email} for a link to confirm your account."))
            .into_response(),
        Err(e) => page_error("signup", &e),
    }
}

/// GET /admin/login
pub async fn admin_login_page() -> Response {
    PageView::new("admin_login").into_response()
}

/// POST /admin/login
pub async fn admin_login(
    State(state): State<AppState>,
    Extension(session): Extension<RequestSession>,
    Form(form): Form<LoginForm>,
) -> Response {
    let mut ctx = session.lock().await;
    let password = SecretString::from(form.password);
    match state
        .controller
        .admin_sign_in(&mut ctx, &form.email, &password)
        .await
    {
        Ok(route) => found(route.path()),
        Err(e) => page_error("admin_login", &e),
    }
}

/// POST /logout
pub async fn logout(
    State(state): State<AppState>,
    Extension(session): Extension<RequestSession>,
) -> Response {
    let mut ctx = session.lock().await;
    state.controller.sign_out(&mut ctx).await;
    found(Route::Login.path())
}

// ── OAuth ───────────────────────────────────────────────────────────────

/// GET /auth/oauth?provider&role
pub async fn oauth_start(
    State(state): State<AppState>,
    Extension(session): Extension<RequestSession>,
    Query(query): Query<OAuthStartQuery>,
) -> Response {
    let mut ctx = session.lock().await;
    let provider = query.provider.as_deref().unwrap_or("google");
    match state
        .controller
        .start_oauth(&mut ctx, provider, query.role.as_deref())
        .await
    {
        Ok(url) => found(url),
        Err(e) => page_error("login", &e),
    }
}

/// GET /auth/callback?code&role
pub async fn oauth_callback(
    State(state): State<AppState>,
    Extension(session): Extension<RequestSession>,
    Query(query): Query<CallbackQuery>,
) -> Response {
    if let Some(description) = query.error_description.as_deref() {
        warn!(reason = description, "Provider reported an OAuth error");
    }
    let mut ctx = session.lock().await;
    let outcome = state
        .controller
        .complete_oauth(&mut ctx, query.code.as_deref(), query.role.as_deref())
        .await;
    found(outcome.location())
}

// ── Onboarding ──────────────────────────────────────────────────────────

/// GET /onboarding: the role selector.
pub async fn onboarding_page(
    State(state): State<AppState>,
    Extension(session): Extension<RequestSession>,
) -> Response {
    let mut ctx = session.lock().await;
    let (resolved, account_state) = match state
        .controller
        .onboarding_state(&mut ctx, session.verified_account())
        .await
    {
        Ok(pair) => pair,
        Err(e) => return authenticated_error("onboarding", &e),
    };

    match account_state {
        AccountState::RoleUnconfirmed(_) => PageView::new("onboarding")
            .with_data(json!({
                "profile": resolved.profile,
                "state": account_state,
                "roles": [Role::Importer, Role::Exporter],
            }))
            .into_response(),
        settled => found(settled.destination().path()),
    }
}

/// POST /onboarding/role
pub async fn select_role(
    State(state): State<AppState>,
    Extension(session): Extension<RequestSession>,
    Form(form): Form<RoleForm>,
) -> Response {
    let mut ctx = session.lock().await;
    match state
        .controller
        .select_role(&mut ctx, session.verified_account(), &form.role)
        .await
    {
        Ok(route) => found(route.path()),
        Err(e) => authenticated_error("onboarding", &e),
    }
}

/// GET /onboarding/exporter
pub async fn exporter_onboarding_page(
    state: State<AppState>,
    session: Extension<RequestSession>,
) -> Response {
    guarded_page(state, session, Route::OnboardingExporter, "onboarding_exporter").await
}

/// GET /onboarding/importer
pub async fn importer_onboarding_page(
    state: State<AppState>,
    session: Extension<RequestSession>,
) -> Response {
    guarded_page(state, session, Route::OnboardingImporter, "onboarding_importer").await
}

/// POST /onboarding/exporter
pub async fn exporter_onboarding(
    state: State<AppState>,
    session: Extension<RequestSession>,
    Form(form): Form<ExporterOnboardingForm>,
) -> Response {
    submit_onboarding(state, session, OnboardingSubmission::Exporter(form), "onboarding_exporter")
        .await
}

/// POST /onboarding/importer
pub async fn importer_onboarding(
    state: State<AppState>,
    session: Extension<RequestSession>,
    Form(form): Form<ImporterOnboardingForm>,
) -> Response {
    submit_onboarding(state, session, OnboardingSubmission::Importer(form), "onboarding_importer")
        .await
}

async fn submit_onboarding(
    State(state): State<AppState>,
    Extension(session): Extension<RequestSession>,
    submission: OnboardingSubmission,
    page: &'static str,
) -> Response {
    let mut ctx = session.lock().await;
    match state
        .controller
        .complete_onboarding(&mut ctx, session.verified_account(), &submission)
        .await
    {
        Ok(route) => found(route.path()),
        Err(e) => authenticated_error(page, &e),
    }
}

// ── Dashboards ──────────────────────────────────────────────────────────

/// GET /dashboard
pub async fn dashboard(
    State(state): State<AppState>,
    Extension(session): Extension<RequestSession>,
) -> Response {
    let mut ctx = session.lock().await;
    let destination = state
        .controller
        .current_destination(&mut ctx, session.verified_account())
        .await;
    found(destination.path())
}

/// GET /dashboard/exporter
pub async fn exporter_dashboard(
    state: State<AppState>,
    session: Extension<RequestSession>,
) -> Response {
    guarded_page(state, session, Route::DashboardExporter, "dashboard_exporter").await
}

/// GET /dashboard/importer
pub async fn importer_dashboard(
    state: State<AppState>,
    session: Extension<RequestSession>,
) -> Response {
    guarded_page(state, session, Route::DashboardImporter, "dashboard_importer").await
}

/// Render a page reserved for the account's current destination, with the
/// profile and any role-extension row.
async fn guarded_page(
    State(state): State<AppState>,
    Extension(session): Extension<RequestSession>,
    route: Route,
    page: &'static str,
) -> Response {
    let mut ctx = session.lock().await;
    let resolved = match state
        .controller
        .page_access(&mut ctx, session.verified_account(), route)
        .await
    {
        Ok(PageAccess::Render(resolved)) => resolved,
        Ok(PageAccess::Redirect(route)) => return found(route.path()),
        Err(e) => return authenticated_error(page, &e),
    };

    let extension = match state
        .store
        .get_role_extension(resolved.profile.id, resolved.profile.role)
        .await
    {
        Ok(extension) => extension,
        Err(e) => return page_error(page, &LifecycleError::Database(e)),
    };
    info!(user_id = %resolved.profile.id, page, "Rendering account page");
    PageView::new(page)
        .with_data(json!({
            "profile": resolved.profile,
            "extension": extension,
        }))
        .into_response()
}

/// Errors on pages that need a signed-in account. No account means the
/// login page.
fn authenticated_error(page: &'static str, err: &LifecycleError) -> Response {
    match err {
        LifecycleError::NotAuthenticated => found(Route::Login.path()),
        other => page_error(page, other),
    }
}
