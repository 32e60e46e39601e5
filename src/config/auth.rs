/// Authentication settings supplied by the embedding application at startup.
/// Treated as immutable for the lifetime of a request; reloading means
/// constructing a new engine over a new snapshot.
#[derive(Debug, Clone)]
pub struct AuthConfig {
    /// Server-held secret used to sign session tokens and to verify
    /// out-of-band signed payloads.
    pub signing_secret: String,
    /// Name of a reverse-proxy header carrying a trusted caller email. When
    /// set, a mismatch between header and resolved principal invalidates the
    /// session.
    pub trusted_email_header: Option<String>,
    /// Whether API keys are accepted at all.
    pub enable_api_key: bool,
    /// Endpoint path prefixes API keys may call. None = unrestricted.
    pub api_key_allowed_endpoints: Option<Vec<String>>,
    /// Compatibility flag: admins bypass explicit-grant checks on shared
    /// resources. Off by default.
    pub legacy_admin_override: bool,
}

impl AuthConfig {
    #[must_use]
    pub fn new(signing_secret: impl Into<String>) -> Self {
        Self {
            signing_secret: signing_secret.into(),
            trusted_email_header: None,
            enable_api_key: true,
            api_key_allowed_endpoints: None,
            legacy_admin_override: false,
        }
    }

    /// Returns true if an API key may be used against the given request
    /// path. A configured prefix matches the path itself or any segment
    /// below it.
    #[must_use]
    pub fn api_key_path_allowed(&self, path: &str) -> bool {
        match &self.api_key_allowed_endpoints {
            None => true,
            Some(allowed) => allowed.iter().any(|prefix| {
                path.strip_prefix(prefix.as_str())
                    .is_some_and(|rest| rest.is_empty() || rest.starts_with('/'))
            }),
        }
    }
}
