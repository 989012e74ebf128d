use crate::Error;

use std::fmt::{Debug, Formatter, Result as FmtResult};
use std::path::Path;

use libsql::{Builder, Connection, Row, Value};
use sha2::{Digest, Sha256};
use tracing::debug;

static CREATE_MIGRATIONS_TABLE_SQL: &str = include_str!("../sql/00_create_migrations_table.sql");
static INSERT_MIGRATION_SQL: &str = include_str!("../sql/insert_migration.sql");

/// A libsql connection that tracks which migrations it has applied.
#[derive(Clone)]
pub struct Database {
    connection: Connection,
}

impl Debug for Database {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        f.debug_struct("Database").finish_non_exhaustive()
    }
}

impl Database {
    /// Opens (or creates) the database at `path`. `":memory:"` is accepted.
    pub async fn connect(path: impl AsRef<Path> + Send) -> Result<Self, Error> {
        let connection = Builder::new_local(path).build().await?.connect()?;

        connection
            .execute(CREATE_MIGRATIONS_TABLE_SQL, Vec::<Value>::new())
            .await?;

        Ok(Self { connection })
    }

    /// Applies a schema statement once. Returns false if it was already applied.
    pub async fn migrate(&self, query: &str) -> Result<bool, Error> {
        let mut hasher = Sha256::new();
        hasher.update(query);
        let hash = format!("{:x}", hasher.finalize());

        let applied = self
            .query_one(
                "SELECT COUNT(*) FROM __hookstream_migrations WHERE query_hash = ?1",
                vec![Value::Text(hash.clone())],
            )
            .await?
            .map(|row| integer(&row, 0))
            .transpose()?
            .unwrap_or(0);

        if applied > 0 {
            return Ok(false);
        }

        let transaction = self.connection.transaction().await?;

        transaction.execute(query, Vec::<Value>::new()).await?;
        transaction
            .execute(
                INSERT_MIGRATION_SQL,
                vec![Value::Text(hash.clone()), Value::Text(query.to_string())],
            )
            .await?;

        transaction.commit().await?;

        debug!(hash = %hash, "applied migration");

        Ok(true)
    }

    /// Runs a statement, returning the number of affected rows.
    pub async fn execute(&self, query: &str, params: Vec<Value>) -> Result<u64, Error> {
        Ok(self.connection.execute(query, params).await?)
    }

    /// Runs a query and collects every row.
    pub async fn query(&self, query: &str, params: Vec<Value>) -> Result<Vec<Row>, Error> {
        let mut rows = self.connection.query(query, params).await?;
        let mut collected = Vec::new();

        while let Some(row) = rows.next().await? {
            collected.push(row);
        }

        Ok(collected)
    }

    /// Runs a query and returns its first row, if any.
    pub async fn query_one(&self, query: &str, params: Vec<Value>) -> Result<Option<Row>, Error> {
        let mut rows = self.connection.query(query, params).await?;

        Ok(rows.next().await?)
    }
}

pub fn integer(row: &Row, index: i32) -> Result<i64, Error> {
    match row.get_value(index)? {
        Value::Integer(i) => Ok(i),
        _ => Err(Error::Column {
            index,
            expected: "an integer",
        }),
    }
}

pub fn text(row: &Row, index: i32) -> Result<String, Error> {
    match row.get_value(index)? {
        Value::Text(s) => Ok(s),
        _ => Err(Error::Column {
            index,
            expected: "text",
        }),
    }
}

pub fn optional_text(row: &Row, index: i32) -> Result<Option<String>, Error> {
    match row.get_value(index)? {
        Value::Null => Ok(None),
        Value::Text(s) => Ok(Some(s)),
        _ => Err(Error::Column {
            index,
            expected: "text or null",
        }),
    }
}

pub fn blob(row: &Row, index: i32) -> Result<Vec<u8>, Error> {
    match row.get_value(index)? {
        Value::Blob(b) => Ok(b),
        Value::Null => Ok(Vec::new()),
        _ => Err(Error::Column {
            index,
            expected: "a blob",
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_migration_applies_once() {
        let db = Database::connect(":memory:").await.unwrap();
        let create = "CREATE TABLE IF NOT EXISTS things (id INTEGER)";

        assert!(db.migrate(create).await.unwrap());
        assert!(!db.migrate(create).await.unwrap());

        db.execute("INSERT INTO things (id) VALUES (?1)", vec![Value::Integer(7)])
            .await
            .unwrap();

        let row = db
            .query_one("SELECT id FROM things", Vec::new())
            .await
            .unwrap()
            .unwrap();

        assert_eq!(integer(&row, 0).unwrap(), 7);
        assert!(text(&row, 0).is_err());
    }
}
