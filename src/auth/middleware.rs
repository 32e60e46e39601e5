use std::sync::Arc;

use axum::{
    Json,
    extract::FromRequestParts,
    http::{
        StatusCode,
        header::{AUTHORIZATION, COOKIE},
        request::Parts,
    },
    response::{IntoResponse, Response},
};
use serde_json::json;

use super::resolver::Credential;
use crate::error::Error;
use crate::server::AppState;
use crate::types::{Principal, Role};

/// Extractor that requires any authenticated principal.
pub struct RequireUser(pub Principal);

/// Extractor that requires an admin or department manager.
pub struct RequireManager(pub Principal);

/// Extractor that requires an admin.
pub struct RequireAdmin(pub Principal);

#[derive(Debug)]
pub enum AuthError {
    MissingCredential,
    InvalidScheme,
    Unauthorized(String),
    Forbidden(String),
    InternalError,
}

impl IntoResponse for AuthError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            AuthError::MissingCredential => {
                (StatusCode::UNAUTHORIZED, "Authentication required".to_string())
            }
            AuthError::InvalidScheme => (
                StatusCode::UNAUTHORIZED,
                "Invalid authorization scheme".to_string(),
            ),
            AuthError::Unauthorized(reason) => (StatusCode::UNAUTHORIZED, reason),
            AuthError::Forbidden(reason) => (StatusCode::FORBIDDEN, reason),
            AuthError::InternalError => {
                (StatusCode::INTERNAL_SERVER_ERROR, "Internal server error".to_string())
            }
        };

        let body = json!({ "data": null, "error": message });

        let mut response = (status, Json(body)).into_response();

        if status == StatusCode::UNAUTHORIZED {
            response.headers_mut().insert(
                "WWW-Authenticate",
                "Bearer realm=\"warden\"".parse().unwrap(),
            );
        }

        response
    }
}

impl From<Error> for AuthError {
    fn from(e: Error) -> Self {
        match e {
            Error::Unauthorized(reason) => AuthError::Unauthorized(reason),
            Error::InvalidTokenFormat => AuthError::Unauthorized("invalid token".to_string()),
            Error::TokenExpired => AuthError::Unauthorized("token expired".to_string()),
            Error::Forbidden(reason) => AuthError::Forbidden(reason),
            _ => AuthError::InternalError,
        }
    }
}

impl FromRequestParts<Arc<AppState>> for RequireUser {
    type Rejection = AuthError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &Arc<AppState>,
    ) -> Result<Self, Self::Rejection> {
        let principal = authenticate(parts, state)?;
        Ok(RequireUser(principal))
    }
}

impl FromRequestParts<Arc<AppState>> for RequireManager {
    type Rejection = AuthError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &Arc<AppState>,
    ) -> Result<Self, Self::Rejection> {
        let principal = authenticate(parts, state)?;

        if !matches!(principal.role, Role::Admin | Role::DepartmentManager) {
            return Err(AuthError::Forbidden("Manager access required".to_string()));
        }

        Ok(RequireManager(principal))
    }
}

impl FromRequestParts<Arc<AppState>> for RequireAdmin {
    type Rejection = AuthError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &Arc<AppState>,
    ) -> Result<Self, Self::Rejection> {
        let principal = authenticate(parts, state)?;

        if principal.role != Role::Admin {
            return Err(AuthError::Forbidden("Admin access required".to_string()));
        }

        Ok(RequireAdmin(principal))
    }
}

/// Extracts the bearer credential from the Authorization header, falling
/// back to a `token` cookie.
fn bearer_credential(parts: &Parts) -> Result<Option<String>, AuthError> {
    if let Some(header) = parts.headers.get(AUTHORIZATION).and_then(|h| h.to_str().ok()) {
        return match header.strip_prefix("Bearer ") {
            Some(token) if !token.is_empty() => Ok(Some(token.to_string())),
            _ => Err(AuthError::InvalidScheme),
        };
    }

    if let Some(cookies) = parts.headers.get(COOKIE).and_then(|h| h.to_str().ok()) {
        for pair in cookies.split(';') {
            if let Some((name, value)) = pair.trim().split_once('=') {
                if name == "token" && !value.is_empty() {
                    return Ok(Some(value.to_string()));
                }
            }
        }
    }

    Ok(None)
}

fn authenticate(parts: &Parts, state: &Arc<AppState>) -> Result<Principal, AuthError> {
    let raw = bearer_credential(parts)?.ok_or(AuthError::MissingCredential)?;
    let credential = Credential::parse(&raw);

    // API keys are confined to the configured endpoint prefixes here, before
    // the resolver sees them: the resolver sits above the routing layer.
    if matches!(credential, Credential::ApiKey(_))
        && !state.config.api_key_path_allowed(parts.uri.path())
    {
        return Err(AuthError::Forbidden(
            "API key not allowed for this endpoint".to_string(),
        ));
    }

    let trusted_email = state
        .config
        .trusted_email_header
        .as_deref()
        .and_then(|name| parts.headers.get(name).and_then(|v| v.to_str().ok()));

    state
        .resolver
        .resolve(&credential, trusted_email)
        .map_err(AuthError::from)
}
