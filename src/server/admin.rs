use std::sync::Arc;

use axum::{
    Json, Router,
    extract::{Path, State},
    response::IntoResponse,
    routing::{delete, get, post},
};
use chrono::Utc;

use crate::auth::RequireAdmin;
use crate::server::AppState;
use crate::server::dto::{ApiKeyResponse, SyncGroupsRequest, UpdatePrincipalRequest};
use crate::server::response::{ApiError, ApiResponse, StoreOptionExt, StoreResultExt};

pub fn admin_router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/users", get(list_principals))
        .route("/users/{id}/update", post(update_principal))
        .route("/users/{id}", delete(delete_principal))
        .route("/users/{id}/groups/sync", post(sync_principal_groups))
        .route("/users/{id}/api-key", post(issue_api_key))
}

async fn list_principals(
    RequireAdmin(_admin): RequireAdmin,
    State(state): State<Arc<AppState>>,
) -> Result<impl IntoResponse, ApiError> {
    let principals = state
        .store
        .list_principals()
        .api_err("Failed to list principals")?;
    Ok(Json(ApiResponse::success(principals)))
}

async fn update_principal(
    RequireAdmin(_admin): RequireAdmin,
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    Json(req): Json<UpdatePrincipalRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let mut principal = state
        .store
        .get_principal(&id)
        .api_err("Failed to load principal")?
        .or_not_found("Principal not found")?;

    if let Some(name) = req.name {
        principal.name = name;
    }
    if let Some(role) = req.role {
        principal.role = role;
    }
    if let Some(department) = req.department {
        principal.department = if department.is_empty() {
            None
        } else {
            Some(department)
        };
    }
    principal.updated_at = Utc::now().timestamp();

    state
        .store
        .update_principal(&principal)
        .api_err("Failed to update principal")?;

    Ok(Json(ApiResponse::success(principal)))
}

async fn delete_principal(
    RequireAdmin(admin): RequireAdmin,
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    if admin.id == id {
        return Err(ApiError::bad_request("Cannot delete yourself"));
    }

    // Membership cascade first, then the identity record itself.
    if !state.groups.remove_principal_everywhere(&id) {
        return Err(ApiError::internal("Failed to remove group memberships"));
    }

    let deleted = state
        .store
        .delete_principal(&id)
        .api_err("Failed to delete principal")?;
    if !deleted {
        return Err(ApiError::not_found("Principal not found"));
    }

    Ok(Json(ApiResponse::success(true)))
}

async fn sync_principal_groups(
    RequireAdmin(_admin): RequireAdmin,
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    Json(req): Json<SyncGroupsRequest>,
) -> Result<impl IntoResponse, ApiError> {
    state
        .store
        .get_principal(&id)
        .api_err("Failed to load principal")?
        .or_not_found("Principal not found")?;

    if !state.groups.sync_membership_by_names(&id, &req.group_names) {
        return Err(ApiError::internal("Failed to sync group membership"));
    }

    Ok(Json(ApiResponse::success(state.groups.groups_by_member(&id))))
}

async fn issue_api_key(
    RequireAdmin(_admin): RequireAdmin,
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let mut principal = state
        .store
        .get_principal(&id)
        .api_err("Failed to load principal")?
        .or_not_found("Principal not found")?;

    let api_key = state.tokens.issue_api_key();
    principal.api_key = Some(api_key.clone());
    principal.updated_at = Utc::now().timestamp();

    state
        .store
        .update_principal(&principal)
        .api_err("Failed to store API key")?;

    Ok(Json(ApiResponse::success(ApiKeyResponse { api_key })))
}
