//! Admin pages. The route guard has already checked the admin role.

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Deserialize;
use tracing::error;
use uuid::Uuid;

use super::{AppState, PageView};
use crate::error::DatabaseError;

/// Pending exporters shown on the admin dashboard.
const RECENT_PENDING_LIMIT: usize = 5;
const DEFAULT_USER_LIMIT: usize = 100;
const MAX_USER_LIMIT: usize = 500;

#[derive(Debug, Deserialize)]
pub struct UsersQuery {
    pub limit: Option<usize>,
}

/// GET /admin/dashboard
pub async fn dashboard(State(state): State<AppState>) -> Response {
    match state.store.admin_stats(RECENT_PENDING_LIMIT).await {
        Ok(stats) => PageView::new("admin_dashboard")
            .with_data(stats)
            .into_response(),
        Err(e) => storage_error("admin_dashboard", e),
    }
}

/// GET /admin/users
pub async fn users(State(state): State<AppState>, Query(query): Query<UsersQuery>) -> Response {
    let limit = user_limit(query.limit);
    match state.store.list_profiles(limit).await {
        Ok(profiles) => PageView::new("admin_users")
            .with_data(serde_json::json!({ "users": profiles }))
            .into_response(),
        Err(e) => storage_error("admin_users", e),
    }
}

/// POST /admin/verification/{id}
pub async fn toggle_verification(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Response {
    match state.store.toggle_exporter_verified(id).await {
        Ok(verified) => Json(serde_json::json!({ "id": id, "verified": verified })).into_response(),
        Err(DatabaseError::NotFound { .. }) => (
            StatusCode::NOT_FOUND,
            Json(serde_json::json!({ "error": "Exporter not found" })),
        )
            .into_response(),
        Err(e) => storage_error("admin_verification", e),
    }
}

/// Page size for `/admin/users`, capped at `MAX_USER_LIMIT`.
fn user_limit(requested: Option<usize>) -> usize {
    requested.unwrap_or(DEFAULT_USER_LIMIT).min(MAX_USER_LIMIT)
}

fn storage_error(page: &'static str, e: DatabaseError) -> Response {
    error!(page, error = %e, "Admin page storage error");
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        PageView::new(page).with_error("Could not load data. Please try again."),
    )
        .into_response()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn user_limit_is_capped() {
        assert_eq!(user_limit(None), DEFAULT_USER_LIMIT);
        assert_eq!(user_limit(Some(7)), 7);
        assert_eq!(user_limit(Some(usize::MAX)), MAX_USER_LIMIT);
    }
}
