use std::collections::BTreeSet;
use std::sync::Arc;

use chrono::Utc;
use uuid::Uuid;

use crate::error::{Error, Result};
use crate::store::Store;
use crate::types::{Group, GroupForm, GroupUpdateForm};

/// Authoritative model of groups, their attribution, and membership
/// reconciliation.
///
/// Storage failures are caught here and normalized to `None`/`false`/empty
/// results with a warning log. The exception is [`GroupHierarchy::update`],
/// whose callers need "not found" distinguished from a storage failure.
#[derive(Clone)]
pub struct GroupHierarchy {
    store: Arc<dyn Store>,
}

impl GroupHierarchy {
    pub fn new(store: Arc<dyn Store>) -> Self {
        Self { store }
    }

    /// Creates a group owned by `owner_id`, with no department attribution.
    pub fn create(&self, owner_id: &str, form: &GroupForm) -> Option<Group> {
        self.insert(owner_id, form, None)
    }

    /// Creates a group through the department-manager path: the manager is
    /// recorded as creator and manager, and the group is attributed to the
    /// department.
    pub fn create_for_department(
        &self,
        manager_id: &str,
        department: &str,
        form: &GroupForm,
    ) -> Option<Group> {
        self.insert(manager_id, form, Some(department))
    }

    fn insert(&self, owner_id: &str, form: &GroupForm, department: Option<&str>) -> Option<Group> {
        let now = Utc::now().timestamp();
        let group = Group {
            id: Uuid::new_v4().to_string(),
            owner_id: owner_id.to_string(),
            name: form.name.clone(),
            description: form.description.clone(),
            permissions: form.permissions.clone(),
            member_ids: dedup_members(form.member_ids.as_deref().unwrap_or(&[])),
            created_by: department.map(|_| owner_id.to_string()),
            managed_by: department.map(|_| owner_id.to_string()),
            department: department.map(str::to_string),
            created_at: now,
            updated_at: now,
        };

        match self.store.create_group(&group) {
            Ok(()) => Some(group),
            Err(e) => {
                tracing::warn!("failed to create group '{}': {e}", group.name);
                None
            }
        }
    }

    /// `None` covers both a missing group and a storage failure; callers
    /// must treat it as "deny access", never as "absent, safe to proceed".
    pub fn get_by_id(&self, id: &str) -> Option<Group> {
        match self.store.get_group(id) {
            Ok(group) => group,
            Err(e) => {
                tracing::warn!("failed to load group {id}: {e}");
                None
            }
        }
    }

    /// Merges non-null form fields into the stored record and bumps
    /// `updated_at`. With `overwrite`, fields absent from the form clear the
    /// stored value instead of leaving it untouched.
    pub fn update(&self, id: &str, form: &GroupUpdateForm, overwrite: bool) -> Result<Group> {
        let mut group = self.store.get_group(id)?.ok_or(Error::NotFound)?;

        if let Some(name) = &form.name {
            group.name = name.clone();
        }
        if let Some(description) = &form.description {
            group.description = description.clone();
        }
        match (&form.permissions, overwrite) {
            (Some(permissions), _) => group.permissions = Some(permissions.clone()),
            (None, true) => group.permissions = None,
            (None, false) => {}
        }
        match (&form.member_ids, overwrite) {
            (Some(member_ids), _) => group.member_ids = dedup_members(member_ids),
            (None, true) => group.member_ids.clear(),
            (None, false) => {}
        }
        group.updated_at = Utc::now().timestamp();

        self.store.update_group(&group)?;
        Ok(group)
    }

    pub fn delete_by_id(&self, id: &str) -> bool {
        match self.store.delete_group(id) {
            Ok(deleted) => deleted,
            Err(e) => {
                tracing::warn!("failed to delete group {id}: {e}");
                false
            }
        }
    }

    pub fn delete_all(&self) -> bool {
        match self.store.delete_all_groups() {
            Ok(()) => true,
            Err(e) => {
                tracing::warn!("failed to delete groups: {e}");
                false
            }
        }
    }

    /// Removes the principal from every group containing it. Idempotent: a
    /// second call finds nothing to remove and succeeds.
    pub fn remove_principal_everywhere(&self, principal_id: &str) -> bool {
        let groups = match self.store.list_groups_by_member(principal_id) {
            Ok(groups) => groups,
            Err(e) => {
                tracing::warn!("failed to list groups for {principal_id}: {e}");
                return false;
            }
        };

        let mut ok = true;
        for group in groups {
            if let Err(e) = self.store.remove_group_member(&group.id, principal_id) {
                tracing::warn!("failed to remove {principal_id} from group {}: {e}", group.id);
                ok = false;
            }
        }
        ok
    }

    /// Reconciles the principal's membership against a named target set:
    /// leaves every group whose name is not in `names`, joins every named
    /// group not yet joined. Idempotent; never duplicates membership.
    pub fn sync_membership_by_names(&self, principal_id: &str, names: &[String]) -> bool {
        let desired = match self.store.list_groups_by_names(names) {
            Ok(groups) => groups,
            Err(e) => {
                tracing::warn!("failed to resolve group names: {e}");
                return false;
            }
        };
        let current = match self.store.list_groups_by_member(principal_id) {
            Ok(groups) => groups,
            Err(e) => {
                tracing::warn!("failed to list groups for {principal_id}: {e}");
                return false;
            }
        };

        let desired_ids: BTreeSet<&str> = desired.iter().map(|g| g.id.as_str()).collect();

        let mut ok = true;
        for group in &current {
            if !desired_ids.contains(group.id.as_str()) {
                if let Err(e) = self.store.remove_group_member(&group.id, principal_id) {
                    tracing::warn!(
                        "failed to remove {principal_id} from group {}: {e}",
                        group.id
                    );
                    ok = false;
                }
            }
        }
        for group in &desired {
            if !group.is_member(principal_id) {
                if let Err(e) = self.store.add_group_member(&group.id, principal_id) {
                    tracing::warn!("failed to add {principal_id} to group {}: {e}", group.id);
                    ok = false;
                }
            }
        }
        ok
    }

    pub fn all_groups(&self) -> Vec<Group> {
        self.collect(self.store.list_groups())
    }

    pub fn groups_by_member(&self, principal_id: &str) -> Vec<Group> {
        self.collect(self.store.list_groups_by_member(principal_id))
    }

    pub fn groups_by_department(&self, department: &str) -> Vec<Group> {
        self.collect(self.store.list_groups_by_department(department))
    }

    pub fn groups_managed_by(&self, principal_id: &str) -> Vec<Group> {
        self.collect(self.store.list_groups_managed_by(principal_id))
    }

    fn collect(&self, result: Result<Vec<Group>>) -> Vec<Group> {
        match result {
            Ok(groups) => groups,
            Err(e) => {
                tracing::warn!("group query failed: {e}");
                Vec::new()
            }
        }
    }
}

fn dedup_members(ids: &[String]) -> Vec<String> {
    let mut seen = BTreeSet::new();
    ids.iter()
        .filter(|id| seen.insert(id.as_str()))
        .cloned()
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{SqliteStore, Store as _};

    fn hierarchy() -> GroupHierarchy {
        let store = Arc::new(SqliteStore::new(":memory:").unwrap());
        store.initialize().unwrap();
        GroupHierarchy::new(store)
    }

    fn form(name: &str, members: &[&str]) -> GroupForm {
        GroupForm {
            name: name.to_string(),
            description: String::new(),
            permissions: None,
            member_ids: Some(members.iter().map(|m| m.to_string()).collect()),
        }
    }

    #[test]
    fn test_create_dedups_members() {
        let groups = hierarchy();
        let group = groups.create("u1", &form("eng", &["u2", "u2", "u3"])).unwrap();
        assert_eq!(group.member_ids, vec!["u2", "u3"]);
        assert_eq!(group.created_at, group.updated_at);
        assert!(group.department.is_none());
        assert!(group.managed_by.is_none());
    }

    #[test]
    fn test_create_for_department_sets_attribution() {
        let groups = hierarchy();
        let group = groups
            .create_for_department("m1", "eng", &form("eng-team", &[]))
            .unwrap();
        assert_eq!(group.department.as_deref(), Some("eng"));
        assert_eq!(group.created_by.as_deref(), Some("m1"));
        assert_eq!(group.managed_by.as_deref(), Some("m1"));
        assert_eq!(group.owner_id, "m1");
    }

    #[test]
    fn test_update_merges_and_bumps() {
        let groups = hierarchy();
        let group = groups.create("u1", &form("eng", &["u2"])).unwrap();

        let updated = groups
            .update(
                &group.id,
                &GroupUpdateForm {
                    description: Some("the eng team".to_string()),
                    ..Default::default()
                },
                false,
            )
            .unwrap();
        assert_eq!(updated.name, "eng");
        assert_eq!(updated.description, "the eng team");
        assert_eq!(updated.member_ids, vec!["u2"]);
    }

    #[test]
    fn test_update_overwrite_clears_absent_fields() {
        let groups = hierarchy();
        let group = groups.create("u1", &form("eng", &["u2"])).unwrap();

        let updated = groups
            .update(&group.id, &GroupUpdateForm::default(), true)
            .unwrap();
        assert!(updated.member_ids.is_empty());
        assert!(updated.permissions.is_none());
    }

    #[test]
    fn test_update_missing_group() {
        let groups = hierarchy();
        assert!(matches!(
            groups.update("missing", &GroupUpdateForm::default(), false),
            Err(Error::NotFound)
        ));
    }

    #[test]
    fn test_remove_principal_everywhere_idempotent() {
        let groups = hierarchy();
        groups.create("u1", &form("a", &["u2", "u3"])).unwrap();
        groups.create("u1", &form("b", &["u2"])).unwrap();

        assert!(groups.remove_principal_everywhere("u2"));
        assert!(groups.groups_by_member("u2").is_empty());
        assert_eq!(groups.groups_by_member("u3").len(), 1);

        // Second call finds nothing to do and still succeeds.
        assert!(groups.remove_principal_everywhere("u2"));
    }

    #[test]
    fn test_delete_by_id_and_delete_all() {
        let groups = hierarchy();
        let a = groups.create("u1", &form("a", &[])).unwrap();
        groups.create("u1", &form("b", &[])).unwrap();

        assert!(groups.delete_by_id(&a.id));
        assert!(!groups.delete_by_id(&a.id));
        assert_eq!(groups.all_groups().len(), 1);

        assert!(groups.delete_all());
        assert!(groups.all_groups().is_empty());
    }

    #[test]
    fn test_groups_managed_by() {
        let groups = hierarchy();
        groups
            .create_for_department("m1", "eng", &form("a", &[]))
            .unwrap();
        groups.create("u1", &form("b", &[])).unwrap();

        let managed = groups.groups_managed_by("m1");
        assert_eq!(managed.len(), 1);
        assert_eq!(managed[0].name, "a");
        assert!(groups.groups_managed_by("u1").is_empty());
    }

    #[test]
    fn test_sync_membership_reconciles() {
        let groups = hierarchy();
        groups.create("u1", &form("a", &["u2"])).unwrap();
        groups.create("u1", &form("b", &[])).unwrap();
        groups.create("u1", &form("c", &["u2"])).unwrap();

        let names = vec!["a".to_string(), "b".to_string()];
        assert!(groups.sync_membership_by_names("u2", &names));

        let joined: Vec<String> = groups
            .groups_by_member("u2")
            .into_iter()
            .map(|g| g.name)
            .collect();
        assert!(joined.contains(&"a".to_string()));
        assert!(joined.contains(&"b".to_string()));
        assert!(!joined.contains(&"c".to_string()));
    }

    #[test]
    fn test_sync_membership_idempotent() {
        let groups = hierarchy();
        groups.create("u1", &form("a", &[])).unwrap();
        groups.create("u1", &form("b", &["u2"])).unwrap();

        let names = vec!["a".to_string()];
        assert!(groups.sync_membership_by_names("u2", &names));
        let first: Vec<String> = groups
            .groups_by_member("u2")
            .into_iter()
            .map(|g| g.id)
            .collect();

        assert!(groups.sync_membership_by_names("u2", &names));
        let second: Vec<String> = groups
            .groups_by_member("u2")
            .into_iter()
            .map(|g| g.id)
            .collect();

        assert_eq!(first, second);
        assert_eq!(first.len(), 1);
    }

    #[test]
    fn test_sync_with_empty_names_leaves_everything() {
        let groups = hierarchy();
        groups.create("u1", &form("a", &["u2"])).unwrap();
        groups.create("u1", &form("b", &["u2"])).unwrap();

        assert!(groups.sync_membership_by_names("u2", &[]));
        assert!(groups.groups_by_member("u2").is_empty());
    }

    #[test]
    fn test_unknown_names_are_ignored() {
        let groups = hierarchy();
        groups.create("u1", &form("a", &[])).unwrap();

        let names = vec!["a".to_string(), "ghost".to_string()];
        assert!(groups.sync_membership_by_names("u2", &names));
        assert_eq!(groups.groups_by_member("u2").len(), 1);
    }
}
