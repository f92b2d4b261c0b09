//! HTTP surface: router, session middleware, and shared response helpers.
//!
//! Pages return a small JSON view model or a `302 Found` redirect. Every
//! request passes through [`session_layer`], which builds the request's
//! `SessionContext`, runs the route guard, and writes session cookie
//! changes onto the response after the handler is done.

pub mod admin;
pub mod pages;

use std::sync::Arc;

use axum::extract::{Request, State};
use axum::http::StatusCode;
use axum::http::header::LOCATION;
use axum::middleware::{self, Next};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Serialize;
use tokio::sync::{Mutex, MutexGuard};
use tower_http::trace::TraceLayer;
use tracing::error;

use crate::accounts::LifecycleController;
use crate::error::LifecycleError;
use crate::guard::{GuardDecision, RouteGuard};
use crate::identity::Account;
use crate::session::{CookieSettings, SessionContext};
use crate::store::ProfileStore;

/// Application state shared across handlers.
#[derive(Clone)]
pub struct AppState {
    pub controller: Arc<LifecycleController>,
    pub guard: Arc<RouteGuard>,
    /// Direct store access for the admin pages.
    pub store: Arc<dyn ProfileStore>,
    pub cookies: CookieSettings,
}

/// Per-request session handle placed in request extensions by the
/// middleware. Handlers lock it to pass the context to the controller.
#[derive(Clone)]
pub struct RequestSession {
    ctx: Arc<Mutex<SessionContext>>,
    account: Option<Account>,
}

impl RequestSession {
    fn new(ctx: SessionContext, account: Option<Account>) -> Self {
        Self {
            ctx: Arc::new(Mutex::new(ctx)),
            account,
        }
    }

    pub async fn lock(&self) -> MutexGuard<'_, SessionContext> {
        self.ctx.lock().await
    }

    /// Account the route guard verified for this request, if any.
    pub fn verified_account(&self) -> Option<Account> {
        self.account.clone()
    }
}

/// Build the application router.
pub fn app_routes(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/login", get(pages::login_page).post(pages::login))
        .route("/signup", get(pages::signup_page).post(pages::signup))
        .route("/admin/login", get(pages::admin_login_page).post(pages::admin_login))
        .route("/auth/oauth", get(pages::oauth_start))
        .route("/auth/callback", get(pages::oauth_callback))
        .route("/logout", post(pages::logout))
        .route("/onboarding", get(pages::onboarding_page))
        .route("/onboarding/role", post(pages::select_role))
        .route(
            "/onboarding/exporter",
            get(pages::exporter_onboarding_page).post(pages::exporter_onboarding),
        )
        .route(
            "/onboarding/importer",
            get(pages::importer_onboarding_page).post(pages::importer_onboarding),
        )
        .route("/dashboard", get(pages::dashboard))
        .route("/dashboard/exporter", get(pages::exporter_dashboard))
        .route("/dashboard/importer", get(pages::importer_dashboard))
        .route("/admin/dashboard", get(admin::dashboard))
        .route("/admin/users", get(admin::users))
        .route("/admin/verification/{id}", post(admin::toggle_verification))
        .layer(middleware::from_fn_with_state(state.clone(), session_layer))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Guard the request, run the handler, then persist session changes.
///
/// Cookie changes from a refresh are written on redirects too.
async fn session_layer(State(state): State<AppState>, mut request: Request, next: Next) -> Response {
    let path = request.uri().path().to_string();
    let mut ctx = SessionContext::from_headers(request.headers());

    let account = match state.guard.check(&path, &mut ctx).await {
        GuardDecision::Allow { account } => account,
        GuardDecision::Redirect(route) => {
            let mut response = found(route.path());
            ctx.write_to(&state.cookies, response.headers_mut());
            return response;
        }
    };

    let session = RequestSession::new(ctx, account);
    request.extensions_mut().insert(session.clone());
    let mut response = next.run(request).await;

    let ctx = session.lock().await;
    ctx.write_to(&state.cookies, response.headers_mut());
    response
}

async fn health() -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "ok",
        "service": "tradelink"
    }))
}

// ── Response helpers ────────────────────────────────────────────────────

/// What a page would render.
#[derive(Debug, Serialize)]
pub struct PageView {
    pub page: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub notice: Option<String>,
    pub data: serde_json::Value,
}

impl PageView {
    pub fn new(page: &'static str) -> Self {
        Self {
            page,
            error: None,
            notice: None,
            data: serde_json::Value::Null,
        }
    }

    pub fn with_data(mut self, data: impl Serialize) -> Self {
        self.data = serde_json::to_value(data).unwrap_or_default();
        self
    }

    pub fn with_error(mut self, error: impl Into<String>) -> Self {
        self.error = Some(error.into());
        self
    }

    pub fn with_notice(mut self, notice: impl Into<String>) -> Self {
        self.notice = Some(notice.into());
        self
    }
}

impl IntoResponse for PageView {
    fn into_response(self) -> Response {
        Json(self).into_response()
    }
}

/// `302 Found` to `location`.
pub fn found(location: impl Into<String>) -> Response {
    (StatusCode::FOUND, [(LOCATION, location.into())]).into_response()
}

/// Render `page` with an inline error from the lifecycle controller.
pub fn page_error(page: &'static str, err: &LifecycleError) -> Response {
    if let LifecycleError::Database(e) = err {
        error!(page, error = %e, "Storage error while rendering page");
    }
    (err.status_code(), PageView::new(page).with_error(err.user_message())).into_response()
}
