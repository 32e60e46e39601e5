use std::path::Path;
use std::sync::Mutex;

use chrono::Utc;
use rusqlite::types::Type;
use rusqlite::{Connection, OptionalExtension, params, params_from_iter};

use super::Store;
use super::schema::SCHEMA;
use crate::error::{Error, Result};
use crate::types::*;

pub struct SqliteStore {
    conn: Mutex<Connection>,
}

impl SqliteStore {
    pub fn new<P: AsRef<Path>>(db_path: P) -> Result<Self> {
        let conn = Connection::open(db_path)?;

        conn.pragma_update(None, "foreign_keys", "ON")?;
        conn.pragma_update(None, "journal_mode", "WAL")?;

        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn conn(&self) -> std::sync::MutexGuard<'_, Connection> {
        self.conn.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Returns a guard to the underlying database connection.
    /// This allows consuming applications to execute custom SQL.
    pub fn connection(&self) -> std::sync::MutexGuard<'_, Connection> {
        self.conn()
    }
}

fn now_epoch() -> i64 {
    Utc::now().timestamp()
}

fn row_to_principal(row: &rusqlite::Row) -> rusqlite::Result<Principal> {
    let role_str: String = row.get(3)?;
    let role = Role::parse(&role_str)
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(3, Type::Text, Box::new(e)))?;

    Ok(Principal {
        id: row.get(0)?,
        email: row.get(1)?,
        name: row.get(2)?,
        role,
        department: row.get(4)?,
        api_key: row.get(5)?,
        last_active_at: row.get(6)?,
        created_at: row.get(7)?,
        updated_at: row.get(8)?,
    })
}

/// Deserializes an optional JSON ACL column. A corrupted payload is logged
/// and read as "no explicit grants", which denies rather than grants.
fn parse_acl(raw: Option<String>, table: &str, id: &str) -> Option<AccessControl> {
    let raw = raw?;
    match serde_json::from_str(&raw) {
        Ok(acl) => Some(acl),
        Err(e) => {
            tracing::error!("invalid access control JSON on {table} {id}: {e}");
            None
        }
    }
}

fn acl_to_json(acl: Option<&AccessControl>) -> Option<String> {
    acl.map(|a| serde_json::to_string(a).unwrap_or_default())
}

const PRINCIPAL_COLUMNS: &str =
    "id, email, name, role, department, api_key, last_active_at, created_at, updated_at";

const GROUP_COLUMNS: &str =
    "id, owner_id, name, description, permissions, created_by, managed_by, department, created_at, updated_at";

struct GroupRow {
    id: String,
    owner_id: String,
    name: String,
    description: String,
    permissions: Option<String>,
    created_by: Option<String>,
    managed_by: Option<String>,
    department: Option<String>,
    created_at: i64,
    updated_at: i64,
}

fn row_to_group_row(row: &rusqlite::Row) -> rusqlite::Result<GroupRow> {
    Ok(GroupRow {
        id: row.get(0)?,
        owner_id: row.get(1)?,
        name: row.get(2)?,
        description: row.get(3)?,
        permissions: row.get(4)?,
        created_by: row.get(5)?,
        managed_by: row.get(6)?,
        department: row.get(7)?,
        created_at: row.get(8)?,
        updated_at: row.get(9)?,
    })
}

impl SqliteStore {
    fn load_members(conn: &Connection, group_id: &str) -> Result<Vec<String>> {
        let mut stmt = conn.prepare(
            "SELECT principal_id FROM group_members WHERE group_id = ?1 ORDER BY principal_id",
        )?;
        let members = stmt
            .query_map(params![group_id], |row| row.get(0))?
            .collect::<rusqlite::Result<Vec<String>>>()?;
        Ok(members)
    }

    fn hydrate_group(conn: &Connection, row: GroupRow) -> Result<Group> {
        let member_ids = Self::load_members(conn, &row.id)?;
        let permissions = parse_acl(row.permissions, "group", &row.id);
        Ok(Group {
            id: row.id,
            owner_id: row.owner_id,
            name: row.name,
            description: row.description,
            permissions,
            member_ids,
            created_by: row.created_by,
            managed_by: row.managed_by,
            department: row.department,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }

    fn query_groups(&self, sql: &str, args: &[&dyn rusqlite::ToSql]) -> Result<Vec<Group>> {
        let conn = self.conn();
        let mut stmt = conn.prepare(sql)?;
        let rows = stmt
            .query_map(args, row_to_group_row)?
            .collect::<rusqlite::Result<Vec<GroupRow>>>()?;

        rows.into_iter()
            .map(|row| Self::hydrate_group(&conn, row))
            .collect()
    }
}

fn row_to_knowledge(row: &rusqlite::Row) -> rusqlite::Result<(KnowledgeBase, Option<String>)> {
    let data: Option<String> = row.get(4)?;
    let data = match data {
        Some(raw) => Some(serde_json::from_str(&raw).map_err(|e| {
            rusqlite::Error::FromSqlConversionFailure(4, Type::Text, Box::new(e))
        })?),
        None => None,
    };

    let access_control: Option<String> = row.get(5)?;

    Ok((
        KnowledgeBase {
            id: row.get(0)?,
            owner_id: row.get(1)?,
            name: row.get(2)?,
            description: row.get(3)?,
            data,
            access_control: None,
            created_at: row.get(6)?,
            updated_at: row.get(7)?,
        },
        access_control,
    ))
}

const KNOWLEDGE_COLUMNS: &str =
    "id, owner_id, name, description, data, access_control, created_at, updated_at";

fn is_constraint_violation(e: &rusqlite::Error) -> bool {
    matches!(
        e,
        rusqlite::Error::SqliteFailure(inner, _)
            if inner.code == rusqlite::ErrorCode::ConstraintViolation
    )
}

impl Store for SqliteStore {
    fn initialize(&self) -> Result<()> {
        self.conn().execute_batch(SCHEMA)?;
        Ok(())
    }

    // Principal operations

    fn create_principal(&self, principal: &Principal) -> Result<()> {
        let result = self.conn().execute(
            "INSERT INTO principals (id, email, name, role, department, api_key, last_active_at, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
            params![
                principal.id,
                principal.email,
                principal.name,
                principal.role.as_str(),
                principal.department,
                principal.api_key,
                principal.last_active_at,
                principal.created_at,
                principal.updated_at,
            ],
        );

        match result {
            Ok(_) => Ok(()),
            Err(e) if is_constraint_violation(&e) => Err(Error::AlreadyExists),
            Err(e) => Err(e.into()),
        }
    }

    fn get_principal(&self, id: &str) -> Result<Option<Principal>> {
        self.conn()
            .query_row(
                &format!("SELECT {PRINCIPAL_COLUMNS} FROM principals WHERE id = ?1"),
                params![id],
                row_to_principal,
            )
            .optional()
            .map_err(Error::from)
    }

    fn get_principal_by_email(&self, email: &str) -> Result<Option<Principal>> {
        self.conn()
            .query_row(
                &format!("SELECT {PRINCIPAL_COLUMNS} FROM principals WHERE email = ?1"),
                params![email],
                row_to_principal,
            )
            .optional()
            .map_err(Error::from)
    }

    fn get_principal_by_api_key(&self, api_key: &str) -> Result<Option<Principal>> {
        self.conn()
            .query_row(
                &format!("SELECT {PRINCIPAL_COLUMNS} FROM principals WHERE api_key = ?1"),
                params![api_key],
                row_to_principal,
            )
            .optional()
            .map_err(Error::from)
    }

    fn list_principals(&self) -> Result<Vec<Principal>> {
        let conn = self.conn();
        let mut stmt = conn
            .prepare(&format!("SELECT {PRINCIPAL_COLUMNS} FROM principals ORDER BY created_at"))?;
        let principals = stmt
            .query_map([], row_to_principal)?
            .collect::<rusqlite::Result<Vec<Principal>>>()?;
        Ok(principals)
    }

    fn update_principal(&self, principal: &Principal) -> Result<()> {
        let updated = self.conn().execute(
            "UPDATE principals
             SET email = ?2, name = ?3, role = ?4, department = ?5, api_key = ?6,
                 last_active_at = ?7, updated_at = ?8
             WHERE id = ?1",
            params![
                principal.id,
                principal.email,
                principal.name,
                principal.role.as_str(),
                principal.department,
                principal.api_key,
                principal.last_active_at,
                principal.updated_at,
            ],
        )?;

        if updated == 0 {
            return Err(Error::NotFound);
        }
        Ok(())
    }

    fn delete_principal(&self, id: &str) -> Result<bool> {
        let deleted = self
            .conn()
            .execute("DELETE FROM principals WHERE id = ?1", params![id])?;
        Ok(deleted > 0)
    }

    fn touch_last_active(&self, id: &str) -> Result<()> {
        self.conn().execute(
            "UPDATE principals SET last_active_at = ?1 WHERE id = ?2",
            params![now_epoch(), id],
        )?;
        Ok(())
    }

    fn has_admin(&self) -> Result<bool> {
        let exists: bool = self.conn().query_row(
            "SELECT EXISTS(SELECT 1 FROM principals WHERE role = 'admin')",
            [],
            |row| row.get(0),
        )?;
        Ok(exists)
    }

    // Group operations

    fn create_group(&self, group: &Group) -> Result<()> {
        let mut conn = self.conn();
        let tx = conn.transaction()?;

        tx.execute(
            "INSERT INTO groups (id, owner_id, name, description, permissions, created_by, managed_by, department, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
            params![
                group.id,
                group.owner_id,
                group.name,
                group.description,
                acl_to_json(group.permissions.as_ref()),
                group.created_by,
                group.managed_by,
                group.department,
                group.created_at,
                group.updated_at,
            ],
        )?;

        for member in &group.member_ids {
            tx.execute(
                "INSERT OR IGNORE INTO group_members (group_id, principal_id) VALUES (?1, ?2)",
                params![group.id, member],
            )?;
        }

        tx.commit()?;
        Ok(())
    }

    fn get_group(&self, id: &str) -> Result<Option<Group>> {
        let conn = self.conn();
        let row = conn
            .query_row(
                &format!("SELECT {GROUP_COLUMNS} FROM groups WHERE id = ?1"),
                params![id],
                row_to_group_row,
            )
            .optional()?;

        match row {
            Some(row) => Ok(Some(Self::hydrate_group(&conn, row)?)),
            None => Ok(None),
        }
    }

    fn list_groups(&self) -> Result<Vec<Group>> {
        self.query_groups(
            &format!("SELECT {GROUP_COLUMNS} FROM groups ORDER BY updated_at DESC"),
            &[],
        )
    }

    fn list_groups_by_names(&self, names: &[String]) -> Result<Vec<Group>> {
        if names.is_empty() {
            return Ok(Vec::new());
        }

        let placeholders = vec!["?"; names.len()].join(", ");
        let sql = format!(
            "SELECT {GROUP_COLUMNS} FROM groups WHERE name IN ({placeholders}) ORDER BY updated_at DESC"
        );

        let conn = self.conn();
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt
            .query_map(params_from_iter(names.iter()), row_to_group_row)?
            .collect::<rusqlite::Result<Vec<GroupRow>>>()?;

        rows.into_iter()
            .map(|row| Self::hydrate_group(&conn, row))
            .collect()
    }

    fn list_groups_by_member(&self, principal_id: &str) -> Result<Vec<Group>> {
        self.query_groups(
            &format!(
                "SELECT {GROUP_COLUMNS} FROM groups
                 WHERE id IN (SELECT group_id FROM group_members WHERE principal_id = ?1)
                 ORDER BY updated_at DESC"
            ),
            &[&principal_id],
        )
    }

    fn list_groups_by_department(&self, department: &str) -> Result<Vec<Group>> {
        self.query_groups(
            &format!(
                "SELECT {GROUP_COLUMNS} FROM groups WHERE department = ?1 ORDER BY updated_at DESC"
            ),
            &[&department],
        )
    }

    fn list_groups_managed_by(&self, principal_id: &str) -> Result<Vec<Group>> {
        self.query_groups(
            &format!(
                "SELECT {GROUP_COLUMNS} FROM groups WHERE managed_by = ?1 ORDER BY updated_at DESC"
            ),
            &[&principal_id],
        )
    }

    fn update_group(&self, group: &Group) -> Result<()> {
        let mut conn = self.conn();
        let tx = conn.transaction()?;

        let updated = tx.execute(
            "UPDATE groups
             SET owner_id = ?2, name = ?3, description = ?4, permissions = ?5,
                 created_by = ?6, managed_by = ?7, department = ?8, updated_at = ?9
             WHERE id = ?1",
            params![
                group.id,
                group.owner_id,
                group.name,
                group.description,
                acl_to_json(group.permissions.as_ref()),
                group.created_by,
                group.managed_by,
                group.department,
                group.updated_at,
            ],
        )?;

        if updated == 0 {
            return Err(Error::NotFound);
        }

        tx.execute(
            "DELETE FROM group_members WHERE group_id = ?1",
            params![group.id],
        )?;
        for member in &group.member_ids {
            tx.execute(
                "INSERT OR IGNORE INTO group_members (group_id, principal_id) VALUES (?1, ?2)",
                params![group.id, member],
            )?;
        }

        tx.commit()?;
        Ok(())
    }

    fn delete_group(&self, id: &str) -> Result<bool> {
        let deleted = self
            .conn()
            .execute("DELETE FROM groups WHERE id = ?1", params![id])?;
        Ok(deleted > 0)
    }

    fn delete_all_groups(&self) -> Result<()> {
        let mut conn = self.conn();
        let tx = conn.transaction()?;
        tx.execute("DELETE FROM group_members", [])?;
        tx.execute("DELETE FROM groups", [])?;
        tx.commit()?;
        Ok(())
    }

    fn add_group_member(&self, group_id: &str, principal_id: &str) -> Result<bool> {
        let mut conn = self.conn();
        let tx = conn.transaction()?;

        let inserted = tx.execute(
            "INSERT OR IGNORE INTO group_members (group_id, principal_id) VALUES (?1, ?2)",
            params![group_id, principal_id],
        )?;
        if inserted > 0 {
            tx.execute(
                "UPDATE groups SET updated_at = ?1 WHERE id = ?2",
                params![now_epoch(), group_id],
            )?;
        }

        tx.commit()?;
        Ok(inserted > 0)
    }

    fn remove_group_member(&self, group_id: &str, principal_id: &str) -> Result<bool> {
        let mut conn = self.conn();
        let tx = conn.transaction()?;

        let removed = tx.execute(
            "DELETE FROM group_members WHERE group_id = ?1 AND principal_id = ?2",
            params![group_id, principal_id],
        )?;
        if removed > 0 {
            tx.execute(
                "UPDATE groups SET updated_at = ?1 WHERE id = ?2",
                params![now_epoch(), group_id],
            )?;
        }

        tx.commit()?;
        Ok(removed > 0)
    }

    // Knowledge base operations

    fn create_knowledge(&self, kb: &KnowledgeBase) -> Result<()> {
        let result = self.conn().execute(
            "INSERT INTO knowledge_bases (id, owner_id, name, description, data, access_control, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            params![
                kb.id,
                kb.owner_id,
                kb.name,
                kb.description,
                kb.data.as_ref().map(|d| d.to_string()),
                acl_to_json(kb.access_control.as_ref()),
                kb.created_at,
                kb.updated_at,
            ],
        );

        match result {
            Ok(_) => Ok(()),
            Err(e) if is_constraint_violation(&e) => Err(Error::AlreadyExists),
            Err(e) => Err(e.into()),
        }
    }

    fn get_knowledge(&self, id: &str) -> Result<Option<KnowledgeBase>> {
        let row = self
            .conn()
            .query_row(
                &format!("SELECT {KNOWLEDGE_COLUMNS} FROM knowledge_bases WHERE id = ?1"),
                params![id],
                row_to_knowledge,
            )
            .optional()?;

        Ok(row.map(|(mut kb, acl)| {
            kb.access_control = parse_acl(acl, "knowledge base", &kb.id);
            kb
        }))
    }

    fn list_knowledge(&self) -> Result<Vec<KnowledgeBase>> {
        let conn = self.conn();
        let mut stmt = conn.prepare(&format!(
            "SELECT {KNOWLEDGE_COLUMNS} FROM knowledge_bases ORDER BY updated_at DESC"
        ))?;
        let rows = stmt
            .query_map([], row_to_knowledge)?
            .collect::<rusqlite::Result<Vec<_>>>()?;

        Ok(rows
            .into_iter()
            .map(|(mut kb, acl)| {
                kb.access_control = parse_acl(acl, "knowledge base", &kb.id);
                kb
            })
            .collect())
    }

    fn update_knowledge(&self, kb: &KnowledgeBase) -> Result<()> {
        let updated = self.conn().execute(
            "UPDATE knowledge_bases
             SET owner_id = ?2, name = ?3, description = ?4, data = ?5, access_control = ?6, updated_at = ?7
             WHERE id = ?1",
            params![
                kb.id,
                kb.owner_id,
                kb.name,
                kb.description,
                kb.data.as_ref().map(|d| d.to_string()),
                acl_to_json(kb.access_control.as_ref()),
                kb.updated_at,
            ],
        )?;

        if updated == 0 {
            return Err(Error::NotFound);
        }
        Ok(())
    }

    fn delete_knowledge(&self, id: &str) -> Result<bool> {
        let deleted = self
            .conn()
            .execute("DELETE FROM knowledge_bases WHERE id = ?1", params![id])?;
        Ok(deleted > 0)
    }

    fn close(&self) -> Result<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_store() -> SqliteStore {
        let store = SqliteStore::new(":memory:").unwrap();
        store.initialize().unwrap();
        store
    }

    fn principal(id: &str, role: Role) -> Principal {
        Principal {
            id: id.to_string(),
            email: format!("{id}@example.com"),
            name: id.to_string(),
            role,
            department: None,
            api_key: None,
            last_active_at: None,
            created_at: 1000,
            updated_at: 1000,
        }
    }

    #[test]
    fn test_principal_round_trip() {
        let store = test_store();
        store
            .create_principal(&principal("u1", Role::Admin))
            .unwrap();

        let loaded = store.get_principal("u1").unwrap().unwrap();
        assert_eq!(loaded.email, "u1@example.com");
        assert_eq!(loaded.role, Role::Admin);
        assert!(store.has_admin().unwrap());
    }

    #[test]
    fn test_duplicate_email_is_conflict() {
        let store = test_store();
        store.create_principal(&principal("u1", Role::User)).unwrap();

        let mut dup = principal("u2", Role::User);
        dup.email = "u1@example.com".to_string();
        assert!(matches!(
            store.create_principal(&dup),
            Err(Error::AlreadyExists)
        ));
    }

    #[test]
    fn test_unknown_role_rejected_at_row_mapping() {
        let store = test_store();
        store
            .connection()
            .execute(
                "INSERT INTO principals (id, email, name, role, created_at, updated_at)
                 VALUES ('u1', 'u1@example.com', 'u1', 'superuser', 0, 0)",
                [],
            )
            .unwrap();

        assert!(store.get_principal("u1").is_err());
    }

    #[test]
    fn test_lookup_by_api_key() {
        let store = test_store();
        let mut p = principal("u1", Role::User);
        p.api_key = Some("sk-0123456789abcdef0123456789abcdef".to_string());
        store.create_principal(&p).unwrap();

        let found = store
            .get_principal_by_api_key("sk-0123456789abcdef0123456789abcdef")
            .unwrap();
        assert_eq!(found.unwrap().id, "u1");

        assert!(store.get_principal_by_api_key("sk-missing").unwrap().is_none());
    }

    fn group(id: &str, owner: &str, members: &[&str]) -> Group {
        Group {
            id: id.to_string(),
            owner_id: owner.to_string(),
            name: id.to_string(),
            description: String::new(),
            permissions: None,
            member_ids: members.iter().map(|m| m.to_string()).collect(),
            created_by: None,
            managed_by: None,
            department: None,
            created_at: 1000,
            updated_at: 1000,
        }
    }

    #[test]
    fn test_group_membership_round_trip() {
        let store = test_store();
        store.create_group(&group("g1", "u1", &["u2", "u3"])).unwrap();

        let loaded = store.get_group("g1").unwrap().unwrap();
        assert_eq!(loaded.member_ids, vec!["u2", "u3"]);

        let by_member = store.list_groups_by_member("u2").unwrap();
        assert_eq!(by_member.len(), 1);
        assert_eq!(by_member[0].id, "g1");

        assert!(store.list_groups_by_member("u9").unwrap().is_empty());
    }

    #[test]
    fn test_member_ids_never_duplicated() {
        let store = test_store();
        store.create_group(&group("g1", "u1", &["u2", "u2"])).unwrap();

        let loaded = store.get_group("g1").unwrap().unwrap();
        assert_eq!(loaded.member_ids, vec!["u2"]);

        // Adding an existing member is a no-op.
        assert!(!store.add_group_member("g1", "u2").unwrap());
        assert!(store.add_group_member("g1", "u4").unwrap());
        let loaded = store.get_group("g1").unwrap().unwrap();
        assert_eq!(loaded.member_ids, vec!["u2", "u4"]);
    }

    #[test]
    fn test_remove_member_bumps_updated_at_only_when_removed() {
        let store = test_store();
        store.create_group(&group("g1", "u1", &["u2"])).unwrap();

        assert!(store.remove_group_member("g1", "u2").unwrap());
        assert!(!store.remove_group_member("g1", "u2").unwrap());

        let loaded = store.get_group("g1").unwrap().unwrap();
        assert!(loaded.member_ids.is_empty());
    }

    #[test]
    fn test_update_missing_group_is_not_found() {
        let store = test_store();
        let g = group("g1", "u1", &[]);
        assert!(matches!(store.update_group(&g), Err(Error::NotFound)));
    }

    #[test]
    fn test_list_groups_by_names() {
        let store = test_store();
        store.create_group(&group("g1", "u1", &[])).unwrap();
        store.create_group(&group("g2", "u1", &[])).unwrap();

        let named = store
            .list_groups_by_names(&["g1".to_string(), "g3".to_string()])
            .unwrap();
        assert_eq!(named.len(), 1);
        assert_eq!(named[0].id, "g1");

        assert!(store.list_groups_by_names(&[]).unwrap().is_empty());
    }

    #[test]
    fn test_knowledge_acl_round_trip() {
        let store = test_store();
        let kb = KnowledgeBase {
            id: "k1".to_string(),
            owner_id: "u1".to_string(),
            name: "docs".to_string(),
            description: String::new(),
            data: Some(serde_json::json!({"file_ids": ["f1"]})),
            access_control: Some(AccessControl {
                read: AccessGrants {
                    user_ids: vec!["u2".to_string()],
                    group_ids: vec![],
                },
                write: AccessGrants::default(),
            }),
            created_at: 1000,
            updated_at: 1000,
        };
        store.create_knowledge(&kb).unwrap();

        let loaded = store.get_knowledge("k1").unwrap().unwrap();
        let acl = loaded.access_control.unwrap();
        assert_eq!(acl.read.user_ids, vec!["u2"]);
        assert_eq!(loaded.data.unwrap()["file_ids"][0], "f1");
    }

    #[test]
    fn test_corrupt_acl_reads_as_no_grants() {
        let store = test_store();
        store
            .connection()
            .execute(
                "INSERT INTO knowledge_bases (id, owner_id, name, description, access_control, created_at, updated_at)
                 VALUES ('k1', 'u1', 'docs', '', 'not json', 0, 0)",
                [],
            )
            .unwrap();

        let loaded = store.get_knowledge("k1").unwrap().unwrap();
        assert!(loaded.access_control.is_none());
    }
}
