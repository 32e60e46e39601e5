use std::sync::Arc;

use super::token::{API_KEY_PREFIX, TokenService};
use crate::config::AuthConfig;
use crate::error::{Error, Result};
use crate::store::Store;
use crate::types::Principal;

/// A bearer credential as presented by a caller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Credential {
    SessionToken(String),
    ApiKey(String),
}

impl Credential {
    /// Routes a raw bearer string: anything carrying the `sk-` prefix is an
    /// API key; everything else is treated as a session token and has to
    /// pass token validation on its own terms.
    #[must_use]
    pub fn parse(raw: &str) -> Credential {
        if raw.starts_with(API_KEY_PREFIX) {
            Credential::ApiKey(raw.to_string())
        } else {
            Credential::SessionToken(raw.to_string())
        }
    }
}

/// Resolves raw credentials to persisted principals.
pub struct IdentityResolver {
    store: Arc<dyn Store>,
    tokens: TokenService,
    config: Arc<AuthConfig>,
}

impl IdentityResolver {
    pub fn new(store: Arc<dyn Store>, tokens: TokenService, config: Arc<AuthConfig>) -> Self {
        Self {
            store,
            tokens,
            config,
        }
    }

    /// Resolves a credential to a principal.
    ///
    /// `trusted_email` is the value of the configured trusted identity
    /// header, when present; a mismatch against the resolved principal's
    /// email invalidates the session.
    ///
    /// Caller obligation: when API-key endpoint restrictions are configured,
    /// the transport layer must check the request path against
    /// [`AuthConfig::api_key_path_allowed`] before accepting an API key. The
    /// resolver operates above the routing layer and cannot see the path.
    pub fn resolve(
        &self,
        credential: &Credential,
        trusted_email: Option<&str>,
    ) -> Result<Principal> {
        match credential {
            Credential::ApiKey(key) => self.resolve_api_key(key),
            Credential::SessionToken(raw) => self.resolve_session_token(raw, trusted_email),
        }
    }

    fn resolve_api_key(&self, key: &str) -> Result<Principal> {
        if !self.config.enable_api_key {
            return Err(Error::Unauthorized(
                "API key authentication is not enabled".to_string(),
            ));
        }

        let principal = self
            .store
            .get_principal_by_api_key(key)?
            .ok_or_else(|| Error::Unauthorized("invalid token".to_string()))?;

        self.touch_last_active(&principal.id);
        Ok(principal)
    }

    fn resolve_session_token(
        &self,
        raw: &str,
        trusted_email: Option<&str>,
    ) -> Result<Principal> {
        let claims = self.tokens.validate(raw)?;

        // Tokens are not proactively revoked on deletion; a deleted
        // principal is rejected here, at next resolution.
        let principal = self
            .store
            .get_principal(&claims.subject)?
            .ok_or_else(|| Error::Unauthorized("invalid token".to_string()))?;

        if self.config.trusted_email_header.is_some() {
            if let Some(trusted) = trusted_email {
                if principal.email != trusted {
                    return Err(Error::Unauthorized("user mismatch".to_string()));
                }
            }
        }

        self.touch_last_active(&principal.id);
        Ok(principal)
    }

    /// Schedules a non-blocking last-active update. Failures are logged and
    /// never surface to the authentication result.
    fn touch_last_active(&self, principal_id: &str) {
        let store = Arc::clone(&self.store);
        let principal_id = principal_id.to_string();
        tokio::task::spawn_blocking(move || {
            if let Err(e) = store.touch_last_active(&principal_id) {
                tracing::warn!("failed to update last_active_at for {principal_id}: {e}");
            }
        });
    }
}
