use std::fmt;

use serde::{Deserialize, Serialize};

use super::AccessControl;
use crate::error::{Error, Result};

/// The closed set of principal roles. Unknown role strings are rejected at
/// the store boundary, never downstream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    Admin,
    DepartmentManager,
    User,
}

impl Role {
    pub fn parse(s: &str) -> Result<Role> {
        match s {
            "admin" => Ok(Role::Admin),
            "department_manager" => Ok(Role::DepartmentManager),
            "user" => Ok(Role::User),
            _ => Err(Error::BadRequest(format!("unknown role: {s}"))),
        }
    }

    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Role::Admin => "admin",
            Role::DepartmentManager => "department_manager",
            Role::User => "user",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Resolved identity of a caller, backed by a persisted identity record.
///
/// `department` is meaningful for department managers and department-scoped
/// users; it is ignored for admins.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Principal {
    pub id: String,
    pub email: String,
    pub name: String,
    pub role: Role,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub department: Option<String>,
    #[serde(skip)]
    pub api_key: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_active_at: Option<i64>,
    pub created_at: i64,
    pub updated_at: i64,
}

/// A named collection of principals with optional department attribution.
///
/// `created_by`, `managed_by` and `department` are nullable for records
/// created before department features existed.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Group {
    pub id: String,
    pub owner_id: String,
    pub name: String,
    pub description: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub permissions: Option<AccessControl>,
    pub member_ids: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub created_by: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub managed_by: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub department: Option<String>,
    pub created_at: i64,
    pub updated_at: i64,
}

impl Group {
    #[must_use]
    pub fn is_member(&self, principal_id: &str) -> bool {
        self.member_ids.iter().any(|id| id == principal_id)
    }
}

/// A knowledge base, governed by the same ownership/ACL model as groups.
/// `data` is an opaque payload (e.g. file ids); ingestion lives elsewhere.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KnowledgeBase {
    pub id: String,
    pub owner_id: String,
    pub name: String,
    pub description: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub access_control: Option<AccessControl>,
    pub created_at: i64,
    pub updated_at: i64,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct GroupForm {
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub permissions: Option<AccessControl>,
    #[serde(default)]
    pub member_ids: Option<Vec<String>>,
}

/// Update form: absent fields leave the stored record untouched unless the
/// caller asks for an overwrite.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct GroupUpdateForm {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub permissions: Option<AccessControl>,
    #[serde(default)]
    pub member_ids: Option<Vec<String>>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct KnowledgeForm {
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub data: Option<serde_json::Value>,
    #[serde(default)]
    pub access_control: Option<AccessControl>,
}
