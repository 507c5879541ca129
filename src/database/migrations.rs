//! Database schema for repo-sync

/// SQL statement to create the database schema
pub const CREATE_SCHEMA: &str = r#"
PRAGMA foreign_keys = ON;

-- Owners
CREATE TABLE IF NOT EXISTS owners (
    id INTEGER PRIMARY KEY,
    label TEXT NOT NULL,
    active INTEGER NOT NULL DEFAULT 1,
    updated_at DATETIME DEFAULT CURRENT_TIMESTAMP
);

CREATE INDEX IF NOT EXISTS idx_owners_active ON owners(active);

-- Source URLs attached to an owner, in submission order
CREATE TABLE IF NOT EXISTS owner_urls (
    owner_id INTEGER NOT NULL REFERENCES owners(id) ON DELETE CASCADE,
    position INTEGER NOT NULL,
    url TEXT NOT NULL,
    PRIMARY KEY (owner_id, position)
);

-- Repository records
CREATE TABLE IF NOT EXISTS repositories (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    owner_id INTEGER NOT NULL,
    machine_name TEXT NOT NULL,
    label TEXT NOT NULL,
    description TEXT,
    num_open_issues INTEGER NOT NULL DEFAULT 0,
    source TEXT NOT NULL,
    url TEXT NOT NULL,
    content_hash TEXT NOT NULL,
    created_at DATETIME DEFAULT CURRENT_TIMESTAMP,
    updated_at DATETIME DEFAULT CURRENT_TIMESTAMP,
    UNIQUE(owner_id, machine_name, source)
);

CREATE INDEX IF NOT EXISTS idx_repositories_owner ON repositories(owner_id);
CREATE INDEX IF NOT EXISTS idx_repositories_url ON repositories(url);

-- A url may belong to only one owner
CREATE TRIGGER IF NOT EXISTS trg_repositories_url_insert
BEFORE INSERT ON repositories
WHEN EXISTS (SELECT 1 FROM repositories WHERE url = NEW.url AND owner_id <> NEW.owner_id)
BEGIN
    SELECT RAISE(ABORT, 'repository url is held by another owner');
END;

CREATE TRIGGER IF NOT EXISTS trg_repositories_url_update
BEFORE UPDATE OF url, owner_id ON repositories
WHEN EXISTS (
    SELECT 1 FROM repositories
    WHERE url = NEW.url AND owner_id <> NEW.owner_id AND id <> NEW.id
)
BEGIN
    SELECT RAISE(ABORT, 'repository url is held by another owner');
END;
"#;

/// Get the current schema version
pub fn migration_version() -> u32 {
    1
}
