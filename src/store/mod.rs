mod schema;
mod sqlite;

pub use sqlite::SqliteStore;

use crate::error::Result;
use crate::types::*;

/// Store defines the database interface.
pub trait Store: Send + Sync {
    fn initialize(&self) -> Result<()>;

    // Principal operations
    fn create_principal(&self, principal: &Principal) -> Result<()>;
    fn get_principal(&self, id: &str) -> Result<Option<Principal>>;
    fn get_principal_by_email(&self, email: &str) -> Result<Option<Principal>>;
    fn get_principal_by_api_key(&self, api_key: &str) -> Result<Option<Principal>>;
    fn list_principals(&self) -> Result<Vec<Principal>>;
    fn update_principal(&self, principal: &Principal) -> Result<()>;
    fn delete_principal(&self, id: &str) -> Result<bool>;
    fn touch_last_active(&self, id: &str) -> Result<()>;
    fn has_admin(&self) -> Result<bool>;

    // Group operations. Member sets live in a normalized join table; each
    // mutation below is atomic with respect to a single group row.
    fn create_group(&self, group: &Group) -> Result<()>;
    fn get_group(&self, id: &str) -> Result<Option<Group>>;
    fn list_groups(&self) -> Result<Vec<Group>>;
    fn list_groups_by_names(&self, names: &[String]) -> Result<Vec<Group>>;
    fn list_groups_by_member(&self, principal_id: &str) -> Result<Vec<Group>>;
    fn list_groups_by_department(&self, department: &str) -> Result<Vec<Group>>;
    fn list_groups_managed_by(&self, principal_id: &str) -> Result<Vec<Group>>;
    fn update_group(&self, group: &Group) -> Result<()>;
    fn delete_group(&self, id: &str) -> Result<bool>;
    fn delete_all_groups(&self) -> Result<()>;
    /// Returns true if the principal was newly added.
    fn add_group_member(&self, group_id: &str, principal_id: &str) -> Result<bool>;
    /// Returns true if the principal was a member and has been removed.
    fn remove_group_member(&self, group_id: &str, principal_id: &str) -> Result<bool>;

    // Knowledge base operations
    fn create_knowledge(&self, kb: &KnowledgeBase) -> Result<()>;
    fn get_knowledge(&self, id: &str) -> Result<Option<KnowledgeBase>>;
    fn list_knowledge(&self) -> Result<Vec<KnowledgeBase>>;
    fn update_knowledge(&self, kb: &KnowledgeBase) -> Result<()>;
    fn delete_knowledge(&self, id: &str) -> Result<bool>;

    fn close(&self) -> Result<()>;
}
