pub const SCHEMA: &str = r#"
-- Principals are the unit of identity; API keys are opaque lookup secrets
CREATE TABLE IF NOT EXISTS principals (
    id TEXT PRIMARY KEY,
    email TEXT NOT NULL UNIQUE,
    name TEXT NOT NULL,
    role TEXT NOT NULL DEFAULT 'user',

    -- Department scoping (NULL for admins and unscoped users)
    department TEXT,

    -- Opaque bearer secret, NULL when no key has been issued
    api_key TEXT UNIQUE,

    last_active_at INTEGER,
    created_at INTEGER NOT NULL,
    updated_at INTEGER NOT NULL
);

CREATE TABLE IF NOT EXISTS groups (
    id TEXT PRIMARY KEY,
    owner_id TEXT NOT NULL,
    name TEXT NOT NULL,
    description TEXT NOT NULL DEFAULT '',

    -- Explicit read/write grants (JSON), NULL = no explicit grants
    permissions TEXT,

    -- Department attribution, nullable for pre-department records
    created_by TEXT,
    managed_by TEXT,
    department TEXT,

    created_at INTEGER NOT NULL,
    updated_at INTEGER NOT NULL
);

-- Normalized membership join table; membership queries go through this,
-- never through serialized member-set text
CREATE TABLE IF NOT EXISTS group_members (
    group_id TEXT NOT NULL REFERENCES groups(id) ON DELETE CASCADE,
    principal_id TEXT NOT NULL,
    PRIMARY KEY (group_id, principal_id)
);

CREATE TABLE IF NOT EXISTS knowledge_bases (
    id TEXT PRIMARY KEY,
    owner_id TEXT NOT NULL,
    name TEXT NOT NULL,
    description TEXT NOT NULL DEFAULT '',

    -- Opaque payload (JSON), e.g. attached file ids
    data TEXT,

    -- Explicit read/write grants (JSON), NULL = owner-only
    access_control TEXT,

    created_at INTEGER NOT NULL,
    updated_at INTEGER NOT NULL
);

-- Create indexes
CREATE INDEX IF NOT EXISTS idx_principals_api_key ON principals(api_key);
CREATE INDEX IF NOT EXISTS idx_groups_department ON groups(department);
CREATE INDEX IF NOT EXISTS idx_groups_managed_by ON groups(managed_by);
CREATE INDEX IF NOT EXISTS idx_groups_name ON groups(name);
CREATE INDEX IF NOT EXISTS idx_group_members_principal ON group_members(principal_id);
CREATE INDEX IF NOT EXISTS idx_knowledge_owner ON knowledge_bases(owner_id);
"#;
