use std::sync::Arc;

use axum::{
    Json, Router,
    extract::{Path, State},
    response::IntoResponse,
    routing::{delete, get, post},
};
use chrono::Utc;
use uuid::Uuid;

use crate::auth::RequireUser;
use crate::server::AppState;
use crate::server::response::{ApiError, ApiResponse, StoreOptionExt, StoreResultExt};
use crate::server::validation::validate_display_name;
use crate::types::{Action, KnowledgeBase, KnowledgeForm, Principal};

pub fn knowledge_router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/", get(list_readable))
        .route("/list", get(list_writable))
        .route("/create", post(create_knowledge))
        .route("/{id}", get(get_knowledge))
        .route("/{id}/update", post(update_knowledge))
        .route("/{id}/delete", delete(delete_knowledge))
}

/// Listing is strictly compliant: owner or explicit grant. The legacy admin
/// override is a per-access exception, it never widens visibility.
fn accessible(
    state: &AppState,
    principal: &Principal,
    action: Action,
) -> Result<Vec<KnowledgeBase>, ApiError> {
    let all = state
        .store
        .list_knowledge()
        .api_err("Failed to list knowledge bases")?;

    Ok(all
        .into_iter()
        .filter(|kb| state.policy.has_compliant_access(principal, kb, action))
        .collect())
}

async fn list_readable(
    RequireUser(principal): RequireUser,
    State(state): State<Arc<AppState>>,
) -> Result<impl IntoResponse, ApiError> {
    let bases = accessible(&state, &principal, Action::Read)?;
    Ok(Json(ApiResponse::success(bases)))
}

async fn list_writable(
    RequireUser(principal): RequireUser,
    State(state): State<Arc<AppState>>,
) -> Result<impl IntoResponse, ApiError> {
    let bases = accessible(&state, &principal, Action::Write)?;
    Ok(Json(ApiResponse::success(bases)))
}

async fn create_knowledge(
    RequireUser(principal): RequireUser,
    State(state): State<Arc<AppState>>,
    Json(form): Json<KnowledgeForm>,
) -> Result<impl IntoResponse, ApiError> {
    validate_display_name(&form.name)?;

    let now = Utc::now().timestamp();
    let kb = KnowledgeBase {
        id: Uuid::new_v4().to_string(),
        owner_id: principal.id.clone(),
        name: form.name,
        description: form.description,
        data: form.data,
        access_control: form.access_control,
        created_at: now,
        updated_at: now,
    };

    state
        .store
        .create_knowledge(&kb)
        .api_err("Failed to create knowledge base")?;

    Ok(Json(ApiResponse::success(kb)))
}

async fn get_knowledge(
    RequireUser(principal): RequireUser,
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let kb = state
        .store
        .get_knowledge(&id)
        .api_err("Failed to load knowledge base")?
        .or_not_found("Knowledge base not found")?;

    if !state.policy.can_read(&principal, &kb) {
        return Err(ApiError::forbidden(
            "Insufficient rights to this knowledge base",
        ));
    }

    Ok(Json(ApiResponse::success(kb)))
}

async fn update_knowledge(
    RequireUser(principal): RequireUser,
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    Json(form): Json<KnowledgeForm>,
) -> Result<impl IntoResponse, ApiError> {
    let mut kb = state
        .store
        .get_knowledge(&id)
        .api_err("Failed to load knowledge base")?
        .or_not_found("Knowledge base not found")?;

    if !state.policy.can_write(&principal, &kb) {
        return Err(ApiError::forbidden(
            "Insufficient rights to this knowledge base",
        ));
    }

    validate_display_name(&form.name)?;
    kb.name = form.name;
    kb.description = form.description;
    if let Some(data) = form.data {
        kb.data = Some(data);
    }
    if let Some(access_control) = form.access_control {
        kb.access_control = Some(access_control);
    }
    kb.updated_at = Utc::now().timestamp();

    state
        .store
        .update_knowledge(&kb)
        .api_err("Failed to update knowledge base")?;

    Ok(Json(ApiResponse::success(kb)))
}

async fn delete_knowledge(
    RequireUser(principal): RequireUser,
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let kb = state
        .store
        .get_knowledge(&id)
        .api_err("Failed to load knowledge base")?
        .or_not_found("Knowledge base not found")?;

    if !state.policy.can_write(&principal, &kb) {
        return Err(ApiError::forbidden(
            "Insufficient rights to this knowledge base",
        ));
    }

    state
        .store
        .delete_knowledge(&kb.id)
        .api_err("Failed to delete knowledge base")?;

    Ok(Json(ApiResponse::success(true)))
}
