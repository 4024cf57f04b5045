//! PostgreSQL document adapter.
//!
//! Each collection is a table `(seq BIGSERIAL, id UUID PRIMARY KEY, doc JSONB)`.
//! Filters become JSONB containment (`doc @> $1`), updates a JSONB merge
//! (`doc || $2`). Tables are created by the first insert or by an explicit
//! `create_collection`; reads of a missing table return nothing, matching
//! the document-store semantics of [`super::MemoryAdapter`].
//!
//! Claims live in `svelty_claims`, keyed by a primary key so that two
//! processes can never both hold the same key.

use std::sync::LazyLock;
use std::time::Duration;

use async_trait::async_trait;
use regex::Regex;
use serde_json::Value;
use sqlx::{PgPool, Row};
use tracing::debug;
use uuid::Uuid;

use super::{AdapterError, AdapterResult, ClaimStore, CollectionManager, DatabaseAdapter, Filter};

/// Postgres SQLSTATE for "relation does not exist".
const UNDEFINED_TABLE: &str = "42P01";

const CLAIMS_TABLE_DDL: &str = "CREATE TABLE IF NOT EXISTS svelty_claims (\
     key TEXT PRIMARY KEY, \
     owner TEXT NOT NULL, \
     claimed_at BIGINT NOT NULL, \
     expires_at BIGINT NOT NULL)";

// The pattern is a literal; it cannot fail to compile.
#[allow(clippy::expect_used)]
static COLLECTION_NAME: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[a-z][a-z0-9_]{0,62}$").expect("valid collection name regex"));

/// Validate a collection name and return it as a quoted SQL identifier.
fn table_ident(collection: &str) -> AdapterResult<String> {
    if COLLECTION_NAME.is_match(collection) {
        Ok(format!("\"{collection}\""))
    } else {
        Err(AdapterError::new(
            AdapterError::INVALID_COLLECTION,
            format!(
                "collection name '{collection}' must be lowercase alphanumeric/underscore, starting with a letter"
            ),
        ))
    }
}

fn is_undefined_table(e: &sqlx::Error) -> bool {
    match e {
        sqlx::Error::Database(db) => db.code().as_deref() == Some(UNDEFINED_TABLE),
        _ => false,
    }
}

impl From<sqlx::Error> for AdapterError {
    fn from(e: sqlx::Error) -> Self {
        Self::new(Self::DATABASE_ERROR, e.to_string())
    }
}

/// [`DatabaseAdapter`] backed by a PostgreSQL pool.
#[derive(Clone)]
pub struct PgDocumentAdapter {
    pool: PgPool,
}

impl PgDocumentAdapter {
    /// Wrap a pool and make sure the claims table exists.
    pub async fn new(pool: PgPool) -> AdapterResult<Self> {
        sqlx::raw_sql(CLAIMS_TABLE_DDL).execute(&pool).await?;
        Ok(Self { pool })
    }

    async fn create_table(&self, table: &str) -> AdapterResult<()> {
        let ddl = format!(
            "CREATE TABLE IF NOT EXISTS {table} (\
             seq BIGSERIAL, \
             id UUID PRIMARY KEY, \
             doc JSONB NOT NULL)"
        );
        sqlx::raw_sql(&ddl).execute(&self.pool).await?;
        debug!(table = %table, "ensured collection table");
        Ok(())
    }

    async fn insert_row(&self, table: &str, id: Uuid, doc: &Value) -> Result<(), sqlx::Error> {
        sqlx::query(&format!("INSERT INTO {table} (id, doc) VALUES ($1, $2)"))
            .bind(id)
            .bind(doc)
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}

#[async_trait]
impl DatabaseAdapter for PgDocumentAdapter {
    fn name(&self) -> &'static str {
        "postgres"
    }

    async fn count(&self, collection: &str) -> AdapterResult<u64> {
        let table = table_ident(collection)?;
        let row = sqlx::query(&format!("SELECT COUNT(*) AS cnt FROM {table}"))
            .fetch_one(&self.pool)
            .await
            .map_err(|e| {
                if is_undefined_table(&e) {
                    AdapterError::collection_not_found(collection)
                } else {
                    AdapterError::from(e)
                }
            })?;

        let count: i64 = row.try_get("cnt")?;
        Ok(u64::try_from(count).unwrap_or_default())
    }

    async fn insert(&self, collection: &str, mut doc: Value) -> AdapterResult<Value> {
        let table = table_ident(collection)?;

        let Some(obj) = doc.as_object_mut() else {
            return Err(AdapterError::invalid_document(format!(
                "documents inserted into '{collection}' must be JSON objects"
            )));
        };
        let id = Uuid::now_v7();
        obj.entry("_id")
            .or_insert_with(|| Value::String(id.to_string()));

        match self.insert_row(&table, id, &doc).await {
            Ok(()) => {}
            Err(e) if is_undefined_table(&e) => {
                self.create_table(&table).await?;
                self.insert_row(&table, id, &doc).await?;
            }
            Err(e) => return Err(e.into()),
        }

        Ok(doc)
    }

    async fn delete_many(&self, collection: &str, filter: &Filter) -> AdapterResult<u64> {
        let table = table_ident(collection)?;
        let result = sqlx::query(&format!("DELETE FROM {table} WHERE doc @> $1"))
            .bind(Value::Object(filter.clone()))
            .execute(&self.pool)
            .await;

        match result {
            Ok(r) => Ok(r.rows_affected()),
            Err(e) if is_undefined_table(&e) => Ok(0),
            Err(e) => Err(e.into()),
        }
    }

    async fn find_many(&self, collection: &str, filter: &Filter) -> AdapterResult<Vec<Value>> {
        let table = table_ident(collection)?;
        let result = sqlx::query(&format!(
            "SELECT doc FROM {table} WHERE doc @> $1 ORDER BY seq"
        ))
        .bind(Value::Object(filter.clone()))
        .fetch_all(&self.pool)
        .await;

        let rows = match result {
            Ok(rows) => rows,
            Err(e) if is_undefined_table(&e) => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        rows.iter()
            .map(|r| r.try_get::<Value, _>("doc").map_err(AdapterError::from))
            .collect()
    }

    async fn update_many(
        &self,
        collection: &str,
        filter: &Filter,
        patch: &Filter,
    ) -> AdapterResult<u64> {
        let table = table_ident(collection)?;
        let result = sqlx::query(&format!(
            "UPDATE {table} SET doc = doc || $2 WHERE doc @> $1"
        ))
        .bind(Value::Object(filter.clone()))
        .bind(Value::Object(patch.clone()))
        .execute(&self.pool)
        .await;

        match result {
            Ok(r) => Ok(r.rows_affected()),
            Err(e) if is_undefined_table(&e) => Ok(0),
            Err(e) => Err(e.into()),
        }
    }

    fn collections(&self) -> Option<&dyn CollectionManager> {
        Some(self)
    }

    fn claims(&self) -> Option<&dyn ClaimStore> {
        Some(self)
    }
}

#[async_trait]
impl CollectionManager for PgDocumentAdapter {
    async fn create_collection(&self, name: &str) -> AdapterResult<()> {
        let table = table_ident(name)?;
        self.create_table(&table).await
    }
}

#[async_trait]
impl ClaimStore for PgDocumentAdapter {
    async fn try_claim(&self, key: &str, owner: &str, ttl: Duration) -> AdapterResult<bool> {
        let now = chrono::Utc::now().timestamp();
        let expires_at = now.saturating_add(i64::try_from(ttl.as_secs()).unwrap_or(i64::MAX));

        // Insert, or take over when the claim is ours or has expired.
        let result = sqlx::query(
            r#"
            INSERT INTO svelty_claims (key, owner, claimed_at, expires_at)
            VALUES ($1, $2, $3, $4)
            ON CONFLICT (key) DO UPDATE
            SET owner = $2, claimed_at = $3, expires_at = $4
            WHERE svelty_claims.owner = $2 OR svelty_claims.expires_at <= $3
            "#,
        )
        .bind(key)
        .bind(owner)
        .bind(now)
        .bind(expires_at)
        .execute(&self.pool)
        .await?;

        let claimed = result.rows_affected() > 0;
        debug!(key = %key, owner = %owner, claimed, "claim attempt");
        Ok(claimed)
    }

    async fn release(&self, key: &str, owner: &str) -> AdapterResult<bool> {
        let result = sqlx::query("DELETE FROM svelty_claims WHERE key = $1 AND owner = $2")
            .bind(key)
            .bind(owner)
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected() > 0)
    }
}
