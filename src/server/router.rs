use std::sync::Arc;
use std::time::Instant;

use axum::extract::Request;
use axum::middleware::{self, Next};
use axum::response::Response;
use axum::{Router, routing::get};

use super::admin::admin_router;
use super::groups::groups_router;
use super::knowledge::knowledge_router;
use crate::auth::{IdentityResolver, TokenService};
use crate::config::AuthConfig;
use crate::groups::GroupHierarchy;
use crate::policy::PolicyEngine;
use crate::store::Store;

pub struct AppState {
    pub store: Arc<dyn Store>,
    pub resolver: IdentityResolver,
    pub policy: PolicyEngine,
    pub groups: GroupHierarchy,
    pub tokens: TokenService,
    pub config: Arc<AuthConfig>,
}

impl AppState {
    #[must_use]
    pub fn new(store: Arc<dyn Store>, config: AuthConfig) -> Self {
        let config = Arc::new(config);
        let groups = GroupHierarchy::new(Arc::clone(&store));
        let policy = PolicyEngine::new(groups.clone(), config.legacy_admin_override);
        let resolver = IdentityResolver::new(
            Arc::clone(&store),
            TokenService::new(config.signing_secret.clone()),
            Arc::clone(&config),
        );
        let tokens = TokenService::new(config.signing_secret.clone());

        Self {
            store,
            resolver,
            policy,
            groups,
            tokens,
            config,
        }
    }
}

async fn health() -> &'static str {
    "OK"
}

async fn log_request(request: Request, next: Next) -> Response {
    let method = request.method().clone();
    let uri = request.uri().clone();
    let start = Instant::now();

    let response = next.run(request).await;

    let latency = start.elapsed();
    let status = response.status();

    tracing::info!(
        "{} {} {} {}ms",
        method,
        uri.path(),
        status.as_u16(),
        latency.as_millis()
    );

    response
}

pub fn create_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(health))
        .nest("/api/v1/groups", groups_router())
        .nest("/api/v1/knowledge", knowledge_router())
        .nest("/api/v1/admin", admin_router())
        .layer(middleware::from_fn(log_request))
        .with_state(state)
}
