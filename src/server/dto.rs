use serde::{Deserialize, Serialize};

use crate::types::Role;

#[derive(Debug, Deserialize)]
pub struct MemberRequest {
    pub principal_id: String,
}

#[derive(Debug, Deserialize)]
pub struct UpdatePrincipalRequest {
    pub name: Option<String>,
    pub role: Option<Role>,
    /// New department. An empty string clears the assignment.
    pub department: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct SyncGroupsRequest {
    pub group_names: Vec<String>,
}

#[derive(Debug, Serialize)]
pub struct ApiKeyResponse {
    pub api_key: String,
}
