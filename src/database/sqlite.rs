//! SQLite implementation of the RepositoryStore trait
//!
//! Uses rusqlite on tokio-rusqlite's background thread for async access.

use async_trait::async_trait;
use rusqlite::types::Value;
use rusqlite::OptionalExtension;
use tokio_rusqlite::Connection;

use super::migrations::CREATE_SCHEMA;
use super::RepositoryStore;
use crate::error::DbError;
use crate::models::{Owner, OwnerId, RepositoryRecord};

const RECORD_COLUMNS: &str =
    "id, owner_id, machine_name, label, description, num_open_issues, source, url, content_hash";

/// SQLite-backed entity store
pub struct SqliteStore {
    conn: Connection,
}

impl SqliteStore {
    /// Open (or create) a database
    ///
    /// Use `:memory:` for an in-memory database or a file path for persistent storage.
    pub async fn new(path: &str) -> Result<Self, DbError> {
        let conn = Connection::open(path).await?;

        conn.call(|conn| {
            conn.execute_batch(CREATE_SCHEMA)?;
            Ok(())
        })
        .await?;

        Ok(Self { conn })
    }

    /// Create a new in-memory database (useful for testing)
    pub async fn in_memory() -> Result<Self, DbError> {
        Self::new(":memory:").await
    }
}

fn record_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<RepositoryRecord> {
    Ok(RepositoryRecord {
        id: Some(row.get(0)?),
        owner_id: row.get(1)?,
        machine_name: row.get(2)?,
        label: row.get(3)?,
        description: row.get(4)?,
        num_open_issues: row.get::<_, i64>(5)?.max(0) as u64,
        source: row.get(6)?,
        url: row.get(7)?,
        content_hash: row.get(8)?,
    })
}

fn load_urls(conn: &rusqlite::Connection, owner_id: OwnerId) -> rusqlite::Result<Vec<String>> {
    let mut stmt =
        conn.prepare("SELECT url FROM owner_urls WHERE owner_id = ?1 ORDER BY position")?;
    let urls = stmt
        .query_map([owner_id], |row| row.get(0))?
        .collect::<Result<Vec<String>, _>>()?;
    Ok(urls)
}

fn replace_urls(
    tx: &rusqlite::Transaction<'_>,
    owner_id: OwnerId,
    urls: &[String],
) -> rusqlite::Result<()> {
    tx.execute("DELETE FROM owner_urls WHERE owner_id = ?1", [owner_id])?;
    let mut stmt =
        tx.prepare("INSERT INTO owner_urls (owner_id, position, url) VALUES (?1, ?2, ?3)")?;
    for (position, url) in urls.iter().enumerate() {
        stmt.execute(rusqlite::params![owner_id, position as i64, url])?;
    }
    Ok(())
}

#[async_trait]
impl RepositoryStore for SqliteStore {
    // =========================================================================
    // Owner operations
    // =========================================================================

    async fn upsert_owner(&self, owner: &Owner) -> Result<(), DbError> {
        let owner = owner.clone();

        self.conn
            .call(move |conn| {
                let tx = conn.transaction()?;
                tx.execute(
                    r#"
                    INSERT INTO owners (id, label, active, updated_at)
                    VALUES (?1, ?2, ?3, CURRENT_TIMESTAMP)
                    ON CONFLICT(id) DO UPDATE SET
                        label = excluded.label,
                        active = excluded.active,
                        updated_at = CURRENT_TIMESTAMP
                    "#,
                    rusqlite::params![owner.id, owner.label, owner.active],
                )?;
                replace_urls(&tx, owner.id, &owner.urls)?;
                tx.commit()?;
                Ok(())
            })
            .await?;

        Ok(())
    }

    async fn get_owner(&self, id: OwnerId) -> Result<Option<Owner>, DbError> {
        self.conn
            .call(move |conn| {
                let owner = conn
                    .query_row(
                        "SELECT id, label, active FROM owners WHERE id = ?1",
                        [id],
                        |row| {
                            Ok(Owner {
                                id: row.get(0)?,
                                label: row.get(1)?,
                                urls: Vec::new(),
                                active: row.get(2)?,
                            })
                        },
                    )
                    .optional()?;

                match owner {
                    Some(mut owner) => {
                        owner.urls = load_urls(conn, owner.id)?;
                        Ok(Some(owner))
                    }
                    None => Ok(None),
                }
            })
            .await
            .map_err(Into::into)
    }

    async fn list_active_owner_ids(&self) -> Result<Vec<OwnerId>, DbError> {
        self.conn
            .call(|conn| {
                let mut stmt = conn.prepare("SELECT id FROM owners WHERE active = 1 ORDER BY id")?;
                let ids = stmt
                    .query_map([], |row| row.get(0))?
                    .collect::<Result<Vec<OwnerId>, _>>()?;
                Ok(ids)
            })
            .await
            .map_err(Into::into)
    }

    async fn set_owner_urls(&self, id: OwnerId, urls: &[String]) -> Result<(), DbError> {
        let urls = urls.to_vec();

        let updated = self
            .conn
            .call(move |conn| {
                let tx = conn.transaction()?;
                let exists = tx
                    .query_row("SELECT 1 FROM owners WHERE id = ?1", [id], |_| Ok(()))
                    .optional()?
                    .is_some();
                if !exists {
                    return Ok(false);
                }
                replace_urls(&tx, id, &urls)?;
                tx.execute(
                    "UPDATE owners SET updated_at = CURRENT_TIMESTAMP WHERE id = ?1",
                    [id],
                )?;
                tx.commit()?;
                Ok(true)
            })
            .await?;

        if !updated {
            return Err(DbError::NotFound);
        }
        Ok(())
    }

    // =========================================================================
    // Repository record operations
    // =========================================================================

    async fn records_for_owner(&self, owner_id: OwnerId) -> Result<Vec<RepositoryRecord>, DbError> {
        self.conn
            .call(move |conn| {
                let mut stmt = conn.prepare(&format!(
                    "SELECT {} FROM repositories WHERE owner_id = ?1 ORDER BY machine_name, source",
                    RECORD_COLUMNS
                ))?;
                let records = stmt
                    .query_map([owner_id], record_from_row)?
                    .collect::<Result<Vec<_>, _>>()?;
                Ok(records)
            })
            .await
            .map_err(Into::into)
    }

    async fn find_record(
        &self,
        owner_id: OwnerId,
        machine_name: &str,
        source: &str,
    ) -> Result<Option<RepositoryRecord>, DbError> {
        let machine_name = machine_name.to_string();
        let source = source.to_string();

        self.conn
            .call(move |conn| {
                let record = conn
                    .query_row(
                        &format!(
                            "SELECT {} FROM repositories
                             WHERE owner_id = ?1 AND machine_name = ?2 AND source = ?3",
                            RECORD_COLUMNS
                        ),
                        rusqlite::params![owner_id, machine_name, source],
                        record_from_row,
                    )
                    .optional()?;
                Ok(record)
            })
            .await
            .map_err(Into::into)
    }

    async fn find_records_excluding(
        &self,
        owner_id: OwnerId,
        machine_names: &[String],
    ) -> Result<Vec<RepositoryRecord>, DbError> {
        let mut params = vec![Value::Integer(owner_id)];
        params.extend(machine_names.iter().cloned().map(Value::Text));

        let sql = if machine_names.is_empty() {
            format!(
                "SELECT {} FROM repositories WHERE owner_id = ?1 ORDER BY machine_name",
                RECORD_COLUMNS
            )
        } else {
            let placeholders = (2..=machine_names.len() + 1)
                .map(|i| format!("?{}", i))
                .collect::<Vec<_>>()
                .join(", ");
            format!(
                "SELECT {} FROM repositories
                 WHERE owner_id = ?1 AND machine_name NOT IN ({})
                 ORDER BY machine_name",
                RECORD_COLUMNS, placeholders
            )
        };

        self.conn
            .call(move |conn| {
                let mut stmt = conn.prepare(&sql)?;
                let records = stmt
                    .query_map(rusqlite::params_from_iter(params.iter()), record_from_row)?
                    .collect::<Result<Vec<_>, _>>()?;
                Ok(records)
            })
            .await
            .map_err(Into::into)
    }

    async fn url_claimed_by_other(&self, url: &str, owner_id: OwnerId) -> Result<bool, DbError> {
        let url = url.to_string();

        self.conn
            .call(move |conn| {
                let claimed = conn
                    .query_row(
                        "SELECT 1 FROM repositories WHERE url = ?1 AND owner_id <> ?2 LIMIT 1",
                        rusqlite::params![url, owner_id],
                        |_| Ok(()),
                    )
                    .optional()?
                    .is_some();
                Ok(claimed)
            })
            .await
            .map_err(Into::into)
    }

    async fn insert_record(&self, record: &RepositoryRecord) -> Result<i64, DbError> {
        let record = record.clone();

        self.conn
            .call(move |conn| {
                conn.execute(
                    r#"
                    INSERT INTO repositories
                    (owner_id, machine_name, label, description, num_open_issues, source, url, content_hash)
                    VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
                    "#,
                    rusqlite::params![
                        record.owner_id,
                        record.machine_name,
                        record.label,
                        record.description,
                        record.num_open_issues as i64,
                        record.source,
                        record.url,
                        record.content_hash
                    ],
                )?;
                Ok(conn.last_insert_rowid())
            })
            .await
            .map_err(Into::into)
    }

    async fn update_record(&self, record: &RepositoryRecord) -> Result<(), DbError> {
        let id = record.id.ok_or(DbError::NotFound)?;
        let record = record.clone();

        let rows_affected = self
            .conn
            .call(move |conn| {
                let rows = conn.execute(
                    r#"
                    UPDATE repositories SET
                        owner_id = ?2,
                        machine_name = ?3,
                        label = ?4,
                        description = ?5,
                        num_open_issues = ?6,
                        source = ?7,
                        url = ?8,
                        content_hash = ?9,
                        updated_at = CURRENT_TIMESTAMP
                    WHERE id = ?1
                    "#,
                    rusqlite::params![
                        id,
                        record.owner_id,
                        record.machine_name,
                        record.label,
                        record.description,
                        record.num_open_issues as i64,
                        record.source,
                        record.url,
                        record.content_hash
                    ],
                )?;
                Ok(rows)
            })
            .await?;

        if rows_affected == 0 {
            return Err(DbError::NotFound);
        }
        Ok(())
    }

    async fn delete_record(&self, id: i64) -> Result<(), DbError> {
        let rows_affected = self
            .conn
            .call(move |conn| {
                let rows = conn.execute("DELETE FROM repositories WHERE id = ?1", [id])?;
                Ok(rows)
            })
            .await?;

        if rows_affected == 0 {
            return Err(DbError::NotFound);
        }
        Ok(())
    }

    // =========================================================================
    // Statistics
    // =========================================================================

    async fn total_open_issues(&self, owner_id: Option<OwnerId>) -> Result<u64, DbError> {
        self.conn
            .call(move |conn| {
                let total: i64 = match owner_id {
                    Some(owner_id) => conn.query_row(
                        "SELECT COALESCE(SUM(num_open_issues), 0) FROM repositories WHERE owner_id = ?1",
                        [owner_id],
                        |row| row.get(0),
                    )?,
                    None => conn.query_row(
                        "SELECT COALESCE(SUM(num_open_issues), 0) FROM repositories",
                        [],
                        |row| row.get(0),
                    )?,
                };
                Ok(total.max(0) as u64)
            })
            .await
            .map_err(Into::into)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(owner_id: OwnerId, machine_name: &str, url: &str) -> RepositoryRecord {
        RepositoryRecord {
            id: None,
            owner_id,
            machine_name: machine_name.to_string(),
            label: machine_name.to_string(),
            description: Some("desc".to_string()),
            num_open_issues: 2,
            source: "github".to_string(),
            url: url.to_string(),
            content_hash: "hash".to_string(),
        }
    }

    // Test 1: Create in-memory database
    #[tokio::test]
    async fn test_create_in_memory_database() {
        assert!(SqliteStore::in_memory().await.is_ok());
    }

    // Test 2: Owner round trip keeps URL order
    #[tokio::test]
    async fn test_owner_round_trip() {
        let store = SqliteStore::in_memory().await.unwrap();
        let owner = Owner::new(1, "Bruce").with_urls(["https://b.test/2.yml", "https://a.test/1.yml"]);

        store.upsert_owner(&owner).await.unwrap();
        let loaded = store.get_owner(1).await.unwrap().unwrap();

        assert_eq!(loaded, owner);
        assert!(store.get_owner(2).await.unwrap().is_none());
    }

    // Test 3: Only active owners are listed
    #[tokio::test]
    async fn test_list_active_owner_ids() {
        let store = SqliteStore::in_memory().await.unwrap();
        store.upsert_owner(&Owner::new(3, "c")).await.unwrap();
        store.upsert_owner(&Owner::new(1, "a")).await.unwrap();
        store.upsert_owner(&Owner::new(2, "b").inactive()).await.unwrap();

        assert_eq!(store.list_active_owner_ids().await.unwrap(), vec![1, 3]);
    }

    // Test 4: Replacing URLs
    #[tokio::test]
    async fn test_set_owner_urls() {
        let store = SqliteStore::in_memory().await.unwrap();
        store
            .upsert_owner(&Owner::new(1, "a").with_urls(["https://old.test/x.yml"]))
            .await
            .unwrap();

        let urls = vec!["https://new.test/y.yml".to_string()];
        store.set_owner_urls(1, &urls).await.unwrap();

        assert_eq!(store.get_owner(1).await.unwrap().unwrap().urls, urls);
        assert!(matches!(
            store.set_owner_urls(99, &urls).await,
            Err(DbError::NotFound)
        ));
    }

    // Test 5: Insert, find and update a record
    #[tokio::test]
    async fn test_insert_find_update_record() {
        let store = SqliteStore::in_memory().await.unwrap();
        let id = store
            .insert_record(&record(1, "a/b", "https://github.com/a/b"))
            .await
            .unwrap();

        let mut found = store.find_record(1, "a/b", "github").await.unwrap().unwrap();
        assert_eq!(found.id, Some(id));
        assert_eq!(found.num_open_issues, 2);
        assert!(store.find_record(1, "a/b", "yml_remote").await.unwrap().is_none());

        found.label = "renamed".to_string();
        found.content_hash = "hash2".to_string();
        store.update_record(&found).await.unwrap();

        let reloaded = store.find_record(1, "a/b", "github").await.unwrap().unwrap();
        assert_eq!(reloaded.label, "renamed");
        assert_eq!(reloaded.content_hash, "hash2");
    }

    // Test 6: Duplicate triple is a constraint violation
    #[tokio::test]
    async fn test_duplicate_triple_rejected() {
        let store = SqliteStore::in_memory().await.unwrap();
        store
            .insert_record(&record(1, "a/b", "https://github.com/a/b"))
            .await
            .unwrap();

        let result = store
            .insert_record(&record(1, "a/b", "https://github.com/a/b"))
            .await;
        assert!(matches!(result, Err(DbError::ConstraintViolation(_))));
    }

    // Test 7: Cross-owner url claim is rejected by the store and reported by the query
    #[tokio::test]
    async fn test_url_claimed_by_other() {
        let store = SqliteStore::in_memory().await.unwrap();
        store
            .insert_record(&record(1, "a/b", "https://github.com/a/b"))
            .await
            .unwrap();

        assert!(store.url_claimed_by_other("https://github.com/a/b", 2).await.unwrap());
        assert!(!store.url_claimed_by_other("https://github.com/a/b", 1).await.unwrap());
        assert!(!store.url_claimed_by_other("https://github.com/c/d", 2).await.unwrap());

        let result = store
            .insert_record(&record(2, "a/b", "https://github.com/a/b"))
            .await;
        assert!(matches!(result, Err(DbError::ConstraintViolation(_))));
    }

    // Test 8: Records outside a machine-name set
    #[tokio::test]
    async fn test_find_records_excluding() {
        let store = SqliteStore::in_memory().await.unwrap();
        for name in ["a/a", "b/b", "c/c"] {
            store
                .insert_record(&record(1, name, &format!("https://github.com/{}", name)))
                .await
                .unwrap();
        }
        store
            .insert_record(&record(2, "z/z", "https://github.com/z/z"))
            .await
            .unwrap();

        let keep = vec!["b/b".to_string()];
        let stale = store.find_records_excluding(1, &keep).await.unwrap();
        let names: Vec<_> = stale.iter().map(|r| r.machine_name.as_str()).collect();
        assert_eq!(names, vec!["a/a", "c/c"]);

        let all = store.find_records_excluding(1, &[]).await.unwrap();
        assert_eq!(all.len(), 3);
    }

    // Test 9: Delete and missing ids
    #[tokio::test]
    async fn test_delete_record() {
        let store = SqliteStore::in_memory().await.unwrap();
        let id = store
            .insert_record(&record(1, "a/b", "https://github.com/a/b"))
            .await
            .unwrap();

        store.delete_record(id).await.unwrap();
        assert!(store.records_for_owner(1).await.unwrap().is_empty());
        assert!(matches!(store.delete_record(id).await, Err(DbError::NotFound)));

        let unsaved = record(1, "x/y", "https://github.com/x/y");
        assert!(matches!(store.update_record(&unsaved).await, Err(DbError::NotFound)));
    }

    // Test 10: Open issue totals
    #[tokio::test]
    async fn test_total_open_issues() {
        let store = SqliteStore::in_memory().await.unwrap();
        assert_eq!(store.total_open_issues(None).await.unwrap(), 0);

        store
            .insert_record(&record(1, "a/a", "https://github.com/a/a"))
            .await
            .unwrap();
        store
            .insert_record(&record(1, "b/b", "https://github.com/b/b"))
            .await
            .unwrap();
        store
            .insert_record(&record(2, "c/c", "https://github.com/c/c"))
            .await
            .unwrap();

        assert_eq!(store.total_open_issues(None).await.unwrap(), 6);
        assert_eq!(store.total_open_issues(Some(1)).await.unwrap(), 4);
        assert_eq!(store.total_open_issues(Some(3)).await.unwrap(), 0);
    }
}
