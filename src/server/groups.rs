use std::sync::Arc;

use axum::{
    Json, Router,
    extract::{Path, State},
    response::IntoResponse,
    routing::{delete, get, post},
};

use crate::auth::{RequireManager, RequireUser};
use crate::error::Error;
use crate::server::AppState;
use crate::server::dto::MemberRequest;
use crate::server::response::{ApiError, ApiResponse, StoreOptionExt, StoreResultExt};
use crate::server::validation::validate_display_name;
use crate::store::Store;
use crate::types::{Group, GroupForm, GroupUpdateForm, Role};

pub fn groups_router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/", get(list_groups))
        .route("/create", post(create_group))
        .route("/id/{id}", get(get_group))
        .route("/id/{id}/update", post(update_group))
        .route("/id/{id}/delete", delete(delete_group))
        .route("/id/{id}/members/add", post(add_group_member))
        .route("/id/{id}/members/remove", post(remove_group_member))
}

/// Keeps only member ids that resolve to known principals.
fn known_principals(store: &dyn Store, ids: Vec<String>) -> Result<Vec<String>, ApiError> {
    let mut valid = Vec::new();
    for id in ids {
        if store
            .get_principal(&id)
            .api_err("Failed to look up principal")?
            .is_some()
        {
            valid.push(id);
        }
    }
    Ok(valid)
}

async fn list_groups(
    RequireUser(principal): RequireUser,
    State(state): State<Arc<AppState>>,
) -> impl IntoResponse {
    let groups = state.policy.accessible_groups(&principal);
    Json(ApiResponse::success(groups))
}

async fn create_group(
    RequireManager(principal): RequireManager,
    State(state): State<Arc<AppState>>,
    Json(mut form): Json<GroupForm>,
) -> Result<impl IntoResponse, ApiError> {
    validate_display_name(&form.name)?;

    if let Some(member_ids) = form.member_ids.take() {
        form.member_ids = Some(known_principals(state.store.as_ref(), member_ids)?);
    }

    let group = match principal.role {
        Role::DepartmentManager => {
            let department = principal.department.as_deref().ok_or_else(|| {
                ApiError::bad_request("Department manager has no department assigned")
            })?;
            state
                .groups
                .create_for_department(&principal.id, department, &form)
        }
        _ => state.groups.create(&principal.id, &form),
    };

    let group = group.ok_or_else(|| ApiError::internal("Failed to create group"))?;
    Ok(Json(ApiResponse::success(group)))
}

async fn get_group(
    RequireUser(principal): RequireUser,
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let group = state.groups.get_by_id(&id).or_not_found("Group not found")?;

    if !state.policy.can_manage_group(&principal, &group) && !group.is_member(&principal.id) {
        return Err(ApiError::forbidden("Insufficient rights to this group"));
    }

    Ok(Json(ApiResponse::success(group)))
}

async fn update_group(
    RequireManager(principal): RequireManager,
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    Json(mut form): Json<GroupUpdateForm>,
) -> Result<impl IntoResponse, ApiError> {
    let group = state.groups.get_by_id(&id).or_not_found("Group not found")?;

    if !state.policy.can_manage_group(&principal, &group) {
        return Err(ApiError::forbidden("Insufficient rights to this group"));
    }

    if let Some(name) = &form.name {
        validate_display_name(name)?;
    }
    if let Some(member_ids) = form.member_ids.take() {
        form.member_ids = Some(known_principals(state.store.as_ref(), member_ids)?);
    }

    let updated = state.groups.update(&id, &form, false).map_err(|e| match e {
        Error::NotFound => ApiError::not_found("Group not found"),
        _ => ApiError::internal("Failed to update group"),
    })?;

    Ok(Json(ApiResponse::success(updated)))
}

async fn delete_group(
    RequireManager(principal): RequireManager,
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let group = state.groups.get_by_id(&id).or_not_found("Group not found")?;

    if !state.policy.can_manage_group(&principal, &group) {
        return Err(ApiError::forbidden("Insufficient rights to this group"));
    }

    if !state.groups.delete_by_id(&id) {
        return Err(ApiError::internal("Failed to delete group"));
    }

    Ok(Json(ApiResponse::success(true)))
}

async fn add_group_member(
    RequireManager(principal): RequireManager,
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    Json(req): Json<MemberRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let group = state.groups.get_by_id(&id).or_not_found("Group not found")?;

    let target = state
        .store
        .get_principal(&req.principal_id)
        .api_err("Failed to look up principal")?
        .or_not_found("Principal not found")?;

    if !state.policy.can_add_member(&principal, &target, &group) {
        return Err(ApiError::forbidden(
            "Cannot add this principal to the group",
        ));
    }

    state
        .store
        .add_group_member(&group.id, &target.id)
        .api_err("Failed to add member")?;

    let group: Group = state.groups.get_by_id(&id).or_not_found("Group not found")?;
    Ok(Json(ApiResponse::success(group)))
}

async fn remove_group_member(
    RequireManager(principal): RequireManager,
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    Json(req): Json<MemberRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let group = state.groups.get_by_id(&id).or_not_found("Group not found")?;

    if !state.policy.can_manage_group(&principal, &group) {
        return Err(ApiError::forbidden("Insufficient rights to this group"));
    }

    state
        .store
        .remove_group_member(&group.id, &req.principal_id)
        .api_err("Failed to remove member")?;

    let group: Group = state.groups.get_by_id(&id).or_not_found("Group not found")?;
    Ok(Json(ApiResponse::success(group)))
}
