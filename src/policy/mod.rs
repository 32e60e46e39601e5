use crate::groups::GroupHierarchy;
use crate::types::{AccessControl, Action, Group, KnowledgeBase, Principal, Role};

/// A shared entity governed by the ownership/ACL model.
pub trait Resource {
    fn resource_id(&self) -> &str;
    fn owner_id(&self) -> &str;
    fn access_control(&self) -> Option<&AccessControl>;
}

impl Resource for Group {
    fn resource_id(&self) -> &str {
        &self.id
    }

    fn owner_id(&self) -> &str {
        &self.owner_id
    }

    fn access_control(&self) -> Option<&AccessControl> {
        self.permissions.as_ref()
    }
}

impl Resource for KnowledgeBase {
    fn resource_id(&self) -> &str {
        &self.id
    }

    fn owner_id(&self) -> &str {
        &self.owner_id
    }

    fn access_control(&self) -> Option<&AccessControl> {
        self.access_control.as_ref()
    }
}

/// Outcome of a policy decision, with a reason suitable for audit logs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Decision {
    pub allowed: bool,
    pub reason: &'static str,
}

impl Decision {
    const fn allow(reason: &'static str) -> Self {
        Self {
            allowed: true,
            reason,
        }
    }

    const fn deny(reason: &'static str) -> Self {
        Self {
            allowed: false,
            reason,
        }
    }
}

/// The decision core. Holds no mutable state; the legacy override flag is
/// fixed at construction and a configuration reload means a new engine.
pub struct PolicyEngine {
    groups: GroupHierarchy,
    legacy_admin_override: bool,
}

impl PolicyEngine {
    pub fn new(groups: GroupHierarchy, legacy_admin_override: bool) -> Self {
        Self {
            groups,
            legacy_admin_override,
        }
    }

    /// Ownership or explicit ACL grant, the compliant access paths.
    fn has_explicit_access(
        &self,
        principal: &Principal,
        resource: &dyn Resource,
        action: Action,
    ) -> Option<Decision> {
        if resource.owner_id() == principal.id {
            return Some(Decision::allow("owner"));
        }

        if let Some(acl) = resource.access_control() {
            let member_group_ids: Vec<String> = self
                .groups
                .groups_by_member(&principal.id)
                .into_iter()
                .map(|g| g.id)
                .collect();
            if acl.grants(action).permits(&principal.id, &member_group_ids) {
                return Some(Decision::allow("explicit grant"));
            }
        }

        None
    }

    /// Decides whether `principal` may perform `action` on `resource`.
    pub fn decide(
        &self,
        principal: &Principal,
        resource: &dyn Resource,
        action: Action,
    ) -> Decision {
        if let Some(decision) = self.has_explicit_access(principal, resource, action) {
            return decision;
        }

        // Non-compliant compatibility path: admin status alone grants
        // nothing unless the override is switched on, and every use is
        // audit-logged.
        if self.legacy_admin_override && principal.role == Role::Admin {
            tracing::warn!(
                "admin {} granted {action} on {} via legacy override",
                principal.id,
                resource.resource_id(),
            );
            return Decision::allow("legacy admin override");
        }

        Decision::deny("no grant")
    }

    pub fn can_read(&self, principal: &Principal, resource: &dyn Resource) -> bool {
        self.decide(principal, resource, Action::Read).allowed
    }

    pub fn can_write(&self, principal: &Principal, resource: &dyn Resource) -> bool {
        self.decide(principal, resource, Action::Write).allowed
    }

    /// Access check without the legacy override path, for listing the
    /// resources a principal is entitled to see. The override is a
    /// per-access exception, not a visibility grant.
    pub fn has_compliant_access(
        &self,
        principal: &Principal,
        resource: &dyn Resource,
        action: Action,
    ) -> bool {
        self.has_explicit_access(principal, resource, action)
            .is_some()
    }

    /// Group management rights. Department affiliation is the primary axis;
    /// explicit manager or creator assignment is supplementary.
    pub fn can_manage_group(&self, principal: &Principal, group: &Group) -> bool {
        if principal.role == Role::Admin {
            return true;
        }

        if principal.role == Role::DepartmentManager {
            if group.department.is_some() && group.department == principal.department {
                return true;
            }
            if group.managed_by.as_deref() == Some(principal.id.as_str()) {
                return true;
            }
            if group.created_by.as_deref() == Some(principal.id.as_str()) {
                return true;
            }
        }

        group.owner_id == principal.id
    }

    /// Whether `manager` may add `target` to `group`. Department managers
    /// may only add principals of their own department; plain owners may
    /// manage their group but not grow it.
    pub fn can_add_member(&self, manager: &Principal, target: &Principal, group: &Group) -> bool {
        if !self.can_manage_group(manager, group) {
            return false;
        }

        match manager.role {
            Role::Admin => true,
            Role::DepartmentManager => target.department == manager.department,
            Role::User => false,
        }
    }

    /// The groups a principal can see: all for admins, the department's for
    /// department managers, joined groups for users. A manager without a
    /// department sees nothing rather than everything.
    pub fn accessible_groups(&self, principal: &Principal) -> Vec<Group> {
        match principal.role {
            Role::Admin => self.groups.all_groups(),
            Role::DepartmentManager => match &principal.department {
                Some(department) => self.groups.groups_by_department(department),
                None => Vec::new(),
            },
            Role::User => self.groups.groups_by_member(&principal.id),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::store::{SqliteStore, Store};
    use crate::types::{AccessGrants, GroupForm};

    fn engine(legacy_admin_override: bool) -> (Arc<SqliteStore>, PolicyEngine) {
        let store = Arc::new(SqliteStore::new(":memory:").unwrap());
        store.initialize().unwrap();
        let groups = GroupHierarchy::new(store.clone());
        (store, PolicyEngine::new(groups, legacy_admin_override))
    }

    fn principal(id: &str, role: Role, department: Option<&str>) -> Principal {
        Principal {
            id: id.to_string(),
            email: format!("{id}@example.com"),
            name: id.to_string(),
            role,
            department: department.map(str::to_string),
            api_key: None,
            last_active_at: None,
            created_at: 1000,
            updated_at: 1000,
        }
    }

    fn group(id: &str, owner: &str) -> Group {
        Group {
            id: id.to_string(),
            owner_id: owner.to_string(),
            name: id.to_string(),
            description: String::new(),
            permissions: None,
            member_ids: Vec::new(),
            created_by: None,
            managed_by: None,
            department: None,
            created_at: 1000,
            updated_at: 1000,
        }
    }

    fn knowledge(id: &str, owner: &str, acl: Option<AccessControl>) -> KnowledgeBase {
        KnowledgeBase {
            id: id.to_string(),
            owner_id: owner.to_string(),
            name: id.to_string(),
            description: String::new(),
            data: None,
            access_control: acl,
            created_at: 1000,
            updated_at: 1000,
        }
    }

    fn read_acl_for(user_ids: &[&str], group_ids: &[&str]) -> AccessControl {
        AccessControl {
            read: AccessGrants {
                user_ids: user_ids.iter().map(|s| s.to_string()).collect(),
                group_ids: group_ids.iter().map(|s| s.to_string()).collect(),
            },
            write: AccessGrants::default(),
        }
    }

    #[test]
    fn test_owner_always_allowed() {
        let (_store, policy) = engine(false);
        let owner = principal("u1", Role::User, None);
        let kb = knowledge("k1", "u1", None);
        assert!(policy.can_read(&owner, &kb));
        assert!(policy.can_write(&owner, &kb));
    }

    #[test]
    fn test_explicit_user_grant() {
        let (_store, policy) = engine(false);
        let reader = principal("u2", Role::User, None);
        let kb = knowledge("k1", "u1", Some(read_acl_for(&["u2"], &[])));
        assert!(policy.can_read(&reader, &kb));
        assert!(!policy.can_write(&reader, &kb));
    }

    #[test]
    fn test_grant_via_group_membership() {
        let (store, policy) = engine(false);
        store
            .create_group(&Group {
                member_ids: vec!["u2".to_string()],
                ..group("g1", "u1")
            })
            .unwrap();

        let reader = principal("u2", Role::User, None);
        let outsider = principal("u3", Role::User, None);
        let kb = knowledge("k1", "u1", Some(read_acl_for(&[], &["g1"])));
        assert!(policy.can_read(&reader, &kb));
        assert!(!policy.can_read(&outsider, &kb));
    }

    #[test]
    fn test_groups_are_resources_too() {
        let (_store, policy) = engine(false);
        let reader = principal("u2", Role::User, None);
        let mut g = group("g1", "u1");
        g.permissions = Some(read_acl_for(&["u2"], &[]));

        let decision = policy.decide(&reader, &g, Action::Read);
        assert!(decision.allowed);
        assert_eq!(decision.reason, "explicit grant");
        assert!(!policy.can_write(&reader, &g));
    }

    #[test]
    fn test_admin_gets_nothing_without_override() {
        let (_store, policy) = engine(false);
        let admin = principal("a1", Role::Admin, None);
        let kb = knowledge("k1", "u1", Some(read_acl_for(&["u2"], &[])));
        let decision = policy.decide(&admin, &kb, Action::Read);
        assert!(!decision.allowed);
        assert_eq!(decision.reason, "no grant");
    }

    #[test]
    fn test_legacy_override_admits_admin() {
        let (_store, policy) = engine(true);
        let admin = principal("a1", Role::Admin, None);
        let kb = knowledge("k1", "u1", None);

        let decision = policy.decide(&admin, &kb, Action::Read);
        assert!(decision.allowed);
        assert_eq!(decision.reason, "legacy admin override");

        // Non-admins gain nothing from the override.
        let user = principal("u2", Role::User, None);
        assert!(!policy.can_read(&user, &kb));
    }

    #[test]
    fn test_compliant_access_ignores_override() {
        let (_store, policy) = engine(true);
        let admin = principal("a1", Role::Admin, None);
        let kb = knowledge("k1", "u1", None);
        assert!(!policy.has_compliant_access(&admin, &kb, Action::Read));
        assert!(policy.can_read(&admin, &kb));
    }

    #[test]
    fn test_admin_manages_any_group() {
        let (_store, policy) = engine(false);
        let admin = principal("a1", Role::Admin, None);
        let mut g = group("g1", "u9");
        assert!(policy.can_manage_group(&admin, &g));

        g.department = Some("sales".to_string());
        g.managed_by = Some("u9".to_string());
        assert!(policy.can_manage_group(&admin, &g));
    }

    #[test]
    fn test_department_match_overrides_explicit_manager() {
        let (_store, policy) = engine(false);
        let manager = principal("u1", Role::DepartmentManager, Some("eng"));
        let mut g = group("g1", "u9");
        g.department = Some("eng".to_string());
        g.managed_by = Some("u9".to_string());
        assert!(policy.can_manage_group(&manager, &g));
    }

    #[test]
    fn test_manager_rights_are_department_scoped() {
        let (_store, policy) = engine(false);
        let manager = principal("u1", Role::DepartmentManager, Some("eng"));

        let mut other = group("g1", "u9");
        other.department = Some("sales".to_string());
        assert!(!policy.can_manage_group(&manager, &other));

        // Explicit assignment still counts outside the department.
        other.managed_by = Some("u1".to_string());
        assert!(policy.can_manage_group(&manager, &other));

        other.managed_by = None;
        other.created_by = Some("u1".to_string());
        assert!(policy.can_manage_group(&manager, &other));
    }

    #[test]
    fn test_departmentless_group_not_matched_by_departmentless_manager() {
        let (_store, policy) = engine(false);
        let manager = principal("u1", Role::DepartmentManager, None);
        let g = group("g1", "u9");
        assert!(!policy.can_manage_group(&manager, &g));
    }

    #[test]
    fn test_owner_manages_own_group() {
        let (_store, policy) = engine(false);
        let owner = principal("u1", Role::User, None);
        assert!(policy.can_manage_group(&owner, &group("g1", "u1")));
        assert!(!policy.can_manage_group(&owner, &group("g2", "u9")));
    }

    #[test]
    fn test_add_member_requires_manage() {
        let (_store, policy) = engine(false);
        let manager = principal("u1", Role::DepartmentManager, Some("eng"));
        let target = principal("u2", Role::User, Some("eng"));
        let g = group("g1", "u9");
        assert!(!policy.can_add_member(&manager, &target, &g));
    }

    #[test]
    fn test_manager_adds_only_own_department() {
        let (_store, policy) = engine(false);
        let manager = principal("u1", Role::DepartmentManager, Some("eng"));
        let mut g = group("g1", "u9");
        g.department = Some("eng".to_string());

        let same = principal("u2", Role::User, Some("eng"));
        let other = principal("u3", Role::User, Some("sales"));
        let unscoped = principal("u4", Role::User, None);
        assert!(policy.can_add_member(&manager, &same, &g));
        assert!(!policy.can_add_member(&manager, &other, &g));
        assert!(!policy.can_add_member(&manager, &unscoped, &g));
    }

    #[test]
    fn test_admin_adds_anyone() {
        let (_store, policy) = engine(false);
        let admin = principal("a1", Role::Admin, None);
        let target = principal("u3", Role::User, Some("sales"));
        assert!(policy.can_add_member(&admin, &target, &group("g1", "u9")));
    }

    #[test]
    fn test_plain_owner_cannot_add_members() {
        let (_store, policy) = engine(false);
        let owner = principal("u1", Role::User, None);
        let target = principal("u2", Role::User, None);
        assert!(!policy.can_add_member(&owner, &target, &group("g1", "u1")));
    }

    #[test]
    fn test_accessible_groups_by_role() {
        let store = Arc::new(SqliteStore::new(":memory:").unwrap());
        store.initialize().unwrap();
        let groups = GroupHierarchy::new(store);
        groups
            .create(
                "u1",
                &GroupForm {
                    name: "g1".to_string(),
                    member_ids: Some(vec!["u2".to_string()]),
                    ..Default::default()
                },
            )
            .unwrap();
        groups
            .create(
                "u1",
                &GroupForm {
                    name: "g2".to_string(),
                    member_ids: Some(vec!["u3".to_string()]),
                    ..Default::default()
                },
            )
            .unwrap();
        groups
            .create_for_department("m1", "eng", &GroupForm {
                name: "g3".to_string(),
                ..Default::default()
            })
            .unwrap();
        let policy = PolicyEngine::new(groups, false);

        let admin = principal("a1", Role::Admin, None);
        assert_eq!(policy.accessible_groups(&admin).len(), 3);

        let user = principal("u2", Role::User, None);
        let visible = policy.accessible_groups(&user);
        assert_eq!(visible.len(), 1);
        assert_eq!(visible[0].name, "g1");

        let manager = principal("m2", Role::DepartmentManager, Some("eng"));
        let visible = policy.accessible_groups(&manager);
        assert_eq!(visible.len(), 1);
        assert_eq!(visible[0].name, "g3");

        // Fail-closed: a manager without a department sees nothing.
        let unassigned = principal("m3", Role::DepartmentManager, None);
        assert!(policy.accessible_groups(&unassigned).is_empty());
    }
}
