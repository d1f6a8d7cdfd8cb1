//! `PostgreSQL` store backend.
//!
//! Each collection is one table of `(id UUID PRIMARY KEY, body JSONB NOT
//! NULL)`. Filters compile to JSONB path expressions; updates are
//! read-modify-write using the same [`apply_update`] semantics as the
//! in-memory backend, executed inside the surrounding transaction (auto-commit
//! operations open a short transaction of their own). Sessions run at
//! `REPEATABLE READ`; serialization failures surface as
//! [`StoreError::TransactionAborted`].

use secrecy::ExposeSecret;
use serde_json::Value;
use sqlx::postgres::{PgPool, PgPoolOptions, PgRow};
use sqlx::types::Json;
use sqlx::{Connection, PgConnection, Postgres, QueryBuilder, Row, Transaction};
use uuid::Uuid;

use crate::backend::{DocumentStore, StoreExecutor, StoreSession};
use crate::config::StoreConfig;
use crate::document::RawDocument;
use crate::error::StoreError;
use crate::query::{
    Comparator, Filter, FindOptions, IndexSpec, SortOrder, Update, UpdateReport, apply_update,
    as_decimal,
};

/// A Postgres-backed document store over one connection pool.
#[derive(Debug, Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    /// Connect with bounded retries and a fixed delay between attempts.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Connection`] after exhausting
    /// `config.connect_attempts`.
    pub async fn connect(config: &StoreConfig) -> Result<Self, StoreError> {
        let attempts = config.connect_attempts.max(1);
        let mut last_error = String::new();
        for attempt in 1..=attempts {
            match Self::try_connect(config).await {
                Ok(pool) => {
                    tracing::info!(attempt, "connected to store");
                    return Ok(Self { pool });
                }
                Err(e) => {
                    tracing::warn!(attempt, attempts, error = %e, "store connection failed");
                    last_error = e.to_string();
                    if attempt < attempts {
                        tokio::time::sleep(config.connect_retry_delay).await;
                    }
                }
            }
        }
        Err(StoreError::Connection(format!(
            "gave up after {attempts} attempts: {last_error}"
        )))
    }

    async fn try_connect(config: &StoreConfig) -> Result<PgPool, sqlx::Error> {
        PgPoolOptions::new()
            .max_connections(config.max_pool_size)
            .min_connections(config.min_pool_size)
            .idle_timeout(Some(config.max_idle_time))
            .acquire_timeout(config.acquire_timeout)
            .connect(config.uri.expose_secret())
            .await
    }

    /// Wrap an already-connected pool.
    #[must_use]
    pub const fn from_pool(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Create the tables backing the given collections if they do not exist.
    ///
    /// # Errors
    ///
    /// Propagates database errors.
    pub async fn ensure_collections(&self, collections: &[&str]) -> Result<(), StoreError> {
        let mut conn = self.pool.acquire().await.map_err(map_db_err)?;
        for collection in collections {
            ensure_table(&mut *conn, collection).await?;
        }
        Ok(())
    }
}

impl DocumentStore for PgStore {
    type Conn = PgConn;
    type Session = PgSession;

    async fn conn(&self) -> Result<Self::Conn, StoreError> {
        Ok(PgConn {
            pool: self.pool.clone(),
        })
    }

    async fn begin(&self) -> Result<Self::Session, StoreError> {
        let mut tx = self.pool.begin().await.map_err(map_db_err)?;
        // Snapshot-style isolation: no dirty reads, and concurrent writers
        // to the same rows fail with a serialization error instead of
        // silently interleaving.
        sqlx::query("SET TRANSACTION ISOLATION LEVEL REPEATABLE READ")
            .execute(&mut *tx)
            .await
            .map_err(map_db_err)?;
        Ok(PgSession { tx })
    }

    async fn ping(&self) -> bool {
        sqlx::query("SELECT 1").execute(&self.pool).await.is_ok()
    }

    async fn close(&self) {
        self.pool.close().await;
    }
}

/// Auto-commit executor: single operations run directly against the pool;
/// read-modify-write updates open a short transaction of their own.
#[derive(Debug)]
pub struct PgConn {
    pool: PgPool,
}

impl StoreExecutor for PgConn {
    async fn insert_one(&mut self, collection: &str, doc: RawDocument) -> Result<(), StoreError> {
        let mut conn = self.pool.acquire().await.map_err(map_db_err)?;
        op_insert(&mut *conn, collection, &doc).await
    }

    async fn insert_many(
        &mut self,
        collection: &str,
        docs: Vec<RawDocument>,
    ) -> Result<(), StoreError> {
        let mut conn = self.pool.acquire().await.map_err(map_db_err)?;
        for doc in &docs {
            op_insert(&mut *conn, collection, doc).await?;
        }
        Ok(())
    }

    async fn find_raw(
        &mut self,
        collection: &str,
        filter: &Filter,
        options: &FindOptions,
    ) -> Result<Vec<RawDocument>, StoreError> {
        let mut conn = self.pool.acquire().await.map_err(map_db_err)?;
        op_find(&mut *conn, collection, filter, options, false).await
    }

    async fn count(&mut self, collection: &str, filter: &Filter) -> Result<u64, StoreError> {
        let mut conn = self.pool.acquire().await.map_err(map_db_err)?;
        op_count(&mut *conn, collection, filter).await
    }

    async fn update(
        &mut self,
        collection: &str,
        filter: &Filter,
        update: &Update,
        multi: bool,
    ) -> Result<UpdateReport, StoreError> {
        let mut conn = self.pool.acquire().await.map_err(map_db_err)?;
        let mut tx = conn.begin().await.map_err(map_db_err)?;
        let report = op_update(&mut *tx, collection, filter, update, multi).await?;
        tx.commit().await.map_err(map_db_err)?;
        Ok(report)
    }

    async fn replace(&mut self, collection: &str, doc: RawDocument) -> Result<u64, StoreError> {
        let mut conn = self.pool.acquire().await.map_err(map_db_err)?;
        op_replace(&mut *conn, collection, &doc).await
    }

    async fn delete(
        &mut self,
        collection: &str,
        filter: &Filter,
        multi: bool,
    ) -> Result<u64, StoreError> {
        let mut conn = self.pool.acquire().await.map_err(map_db_err)?;
        op_delete(&mut *conn, collection, filter, multi).await
    }

    async fn ensure_indexes(
        &mut self,
        collection: &str,
        specs: &[IndexSpec],
    ) -> Result<(), StoreError> {
        let mut conn = self.pool.acquire().await.map_err(map_db_err)?;
        op_ensure_indexes(&mut *conn, collection, specs).await
    }

    async fn drop_collection(&mut self, collection: &str) -> Result<(), StoreError> {
        let mut conn = self.pool.acquire().await.map_err(map_db_err)?;
        op_drop(&mut *conn, collection).await
    }
}

/// A transactional session: one `REPEATABLE READ` Postgres transaction.
/// Dropping the session without committing rolls it back.
#[derive(Debug)]
pub struct PgSession {
    tx: Transaction<'static, Postgres>,
}

impl StoreExecutor for PgSession {
    async fn insert_one(&mut self, collection: &str, doc: RawDocument) -> Result<(), StoreError> {
        op_insert(&mut *self.tx, collection, &doc).await
    }

    async fn insert_many(
        &mut self,
        collection: &str,
        docs: Vec<RawDocument>,
    ) -> Result<(), StoreError> {
        for doc in &docs {
            op_insert(&mut *self.tx, collection, doc).await?;
        }
        Ok(())
    }

    async fn find_raw(
        &mut self,
        collection: &str,
        filter: &Filter,
        options: &FindOptions,
    ) -> Result<Vec<RawDocument>, StoreError> {
        op_find(&mut *self.tx, collection, filter, options, false).await
    }

    async fn count(&mut self, collection: &str, filter: &Filter) -> Result<u64, StoreError> {
        op_count(&mut *self.tx, collection, filter).await
    }

    async fn update(
        &mut self,
        collection: &str,
        filter: &Filter,
        update: &Update,
        multi: bool,
    ) -> Result<UpdateReport, StoreError> {
        op_update(&mut *self.tx, collection, filter, update, multi).await
    }

    async fn replace(&mut self, collection: &str, doc: RawDocument) -> Result<u64, StoreError> {
        op_replace(&mut *self.tx, collection, &doc).await
    }

    async fn delete(
        &mut self,
        collection: &str,
        filter: &Filter,
        multi: bool,
    ) -> Result<u64, StoreError> {
        op_delete(&mut *self.tx, collection, filter, multi).await
    }

    async fn ensure_indexes(
        &mut self,
        collection: &str,
        specs: &[IndexSpec],
    ) -> Result<(), StoreError> {
        op_ensure_indexes(&mut *self.tx, collection, specs).await
    }

    async fn drop_collection(&mut self, collection: &str) -> Result<(), StoreError> {
        op_drop(&mut *self.tx, collection).await
    }
}

impl StoreSession for PgSession {
    async fn commit(self) -> Result<(), StoreError> {
        self.tx.commit().await.map_err(map_db_err)
    }

    async fn abort(self) -> Result<(), StoreError> {
        self.tx.rollback().await.map_err(map_db_err)
    }
}

// =============================================================================
// Operations (shared between auto-commit connections and sessions)
// =============================================================================

async fn op_insert(
    conn: &mut PgConnection,
    collection: &str,
    doc: &RawDocument,
) -> Result<(), StoreError> {
    let table = table_name(collection)?;
    let sql = format!("INSERT INTO {table} (id, body) VALUES ($1, $2)");
    let first = sqlx::query(&sql)
        .bind(doc.id.as_uuid())
        .bind(Json(doc.body.clone()))
        .execute(&mut *conn)
        .await;
    let result = match first {
        Err(e) if is_undefined_table(&e) => {
            ensure_table(conn, collection).await?;
            sqlx::query(&sql)
                .bind(doc.id.as_uuid())
                .bind(Json(doc.body.clone()))
                .execute(&mut *conn)
                .await
                .map_err(map_db_err)?
        }
        other => other.map_err(map_db_err)?,
    };
    if result.rows_affected() == 0 {
        return Err(StoreError::WriteNotAcknowledged);
    }
    Ok(())
}

async fn op_find(
    conn: &mut PgConnection,
    collection: &str,
    filter: &Filter,
    options: &FindOptions,
    lock: bool,
) -> Result<Vec<RawDocument>, StoreError> {
    let table = table_name(collection)?;
    let mut qb = QueryBuilder::<Postgres>::new(format!("SELECT id, body FROM {table}"));
    push_filter(&mut qb, filter);
    for (i, (path, order)) in options.sort.iter().enumerate() {
        qb.push(if i == 0 { " ORDER BY " } else { ", " });
        qb.push("body #> ");
        qb.push_bind(segments(path));
        match order {
            SortOrder::Asc => qb.push(" ASC"),
            SortOrder::Desc => qb.push(" DESC"),
        };
    }
    if let Some(skip) = options.skip {
        qb.push(" OFFSET ");
        qb.push_bind(i64::try_from(skip).unwrap_or(i64::MAX));
    }
    if let Some(limit) = options.limit {
        qb.push(" LIMIT ");
        qb.push_bind(i64::try_from(limit).unwrap_or(i64::MAX));
    }
    if lock {
        qb.push(" FOR UPDATE");
    }

    let rows = match qb.build().fetch_all(&mut *conn).await {
        Err(e) if is_undefined_table(&e) => return Ok(Vec::new()),
        other => other.map_err(map_db_err)?,
    };
    rows.iter().map(row_to_raw).collect()
}

async fn op_count(
    conn: &mut PgConnection,
    collection: &str,
    filter: &Filter,
) -> Result<u64, StoreError> {
    let table = table_name(collection)?;
    let mut qb = QueryBuilder::<Postgres>::new(format!("SELECT COUNT(*) AS n FROM {table}"));
    push_filter(&mut qb, filter);
    let row = match qb.build().fetch_one(&mut *conn).await {
        Err(e) if is_undefined_table(&e) => return Ok(0),
        other => other.map_err(map_db_err)?,
    };
    let n: i64 = row.try_get("n").map_err(map_db_err)?;
    Ok(u64::try_from(n).unwrap_or(0))
}

async fn op_update(
    conn: &mut PgConnection,
    collection: &str,
    filter: &Filter,
    update: &Update,
    multi: bool,
) -> Result<UpdateReport, StoreError> {
    let table = table_name(collection)?;
    let options = if multi {
        FindOptions::new()
    } else {
        FindOptions::new().limit(1)
    };
    let targets = op_find(conn, collection, filter, &options, true).await?;

    let mut report = UpdateReport::default();
    for target in targets {
        report.matched += 1;
        let mut next = target.body.clone();
        apply_update(&mut next, update)?;
        if next == target.body {
            continue;
        }
        let result = sqlx::query(&format!("UPDATE {table} SET body = $1 WHERE id = $2"))
            .bind(Json(next))
            .bind(target.id.as_uuid())
            .execute(&mut *conn)
            .await
            .map_err(map_db_err)?;
        report.modified += result.rows_affected();
    }
    Ok(report)
}

async fn op_replace(
    conn: &mut PgConnection,
    collection: &str,
    doc: &RawDocument,
) -> Result<u64, StoreError> {
    let table = table_name(collection)?;
    let result = match sqlx::query(&format!("UPDATE {table} SET body = $1 WHERE id = $2"))
        .bind(Json(doc.body.clone()))
        .bind(doc.id.as_uuid())
        .execute(&mut *conn)
        .await
    {
        Err(e) if is_undefined_table(&e) => return Ok(0),
        other => other.map_err(map_db_err)?,
    };
    Ok(result.rows_affected())
}

async fn op_delete(
    conn: &mut PgConnection,
    collection: &str,
    filter: &Filter,
    multi: bool,
) -> Result<u64, StoreError> {
    let table = table_name(collection)?;
    let mut qb = QueryBuilder::<Postgres>::new(format!("DELETE FROM {table}"));
    if multi {
        push_filter(&mut qb, filter);
    } else {
        qb.push(" WHERE id IN (SELECT id FROM ");
        qb.push(&table);
        push_filter(&mut qb, filter);
        qb.push(" LIMIT 1)");
    }
    let result = match qb.build().execute(&mut *conn).await {
        Err(e) if is_undefined_table(&e) => return Ok(0),
        other => other.map_err(map_db_err)?,
    };
    Ok(result.rows_affected())
}

async fn op_ensure_indexes(
    conn: &mut PgConnection,
    collection: &str,
    specs: &[IndexSpec],
) -> Result<(), StoreError> {
    ensure_table(conn, collection).await?;
    let table = table_name(collection)?;
    for spec in specs {
        let index = identifier(&spec.name)?;
        let path = literal_path(&spec.path)?;
        let unique = if spec.unique { "UNIQUE " } else { "" };
        // DDL cannot take bind parameters; every fragment is validated above.
        sqlx::query(&format!(
            "CREATE {unique}INDEX IF NOT EXISTS {index} ON {table} ((body #>> '{path}'))"
        ))
        .execute(&mut *conn)
        .await
        .map_err(map_db_err)?;
    }
    Ok(())
}

async fn op_drop(conn: &mut PgConnection, collection: &str) -> Result<(), StoreError> {
    let table = table_name(collection)?;
    sqlx::query(&format!("DROP TABLE IF EXISTS {table}"))
        .execute(&mut *conn)
        .await
        .map_err(map_db_err)?;
    Ok(())
}

async fn ensure_table(conn: &mut PgConnection, collection: &str) -> Result<(), StoreError> {
    let table = table_name(collection)?;
    sqlx::query(&format!(
        "CREATE TABLE IF NOT EXISTS {table} (id UUID PRIMARY KEY, body JSONB NOT NULL)"
    ))
    .execute(&mut *conn)
    .await
    .map_err(map_db_err)?;
    Ok(())
}

// =============================================================================
// SQL building
// =============================================================================

fn push_filter(qb: &mut QueryBuilder<'_, Postgres>, filter: &Filter) {
    let mut first = true;
    for cond in filter.conditions() {
        qb.push(if first { " WHERE (" } else { " AND (" });
        first = false;
        let path = segments(&cond.path);
        match cond.comparator {
            Comparator::Eq => {
                if cond.value.is_null() {
                    qb.push("body #> ");
                    qb.push_bind(path);
                    qb.push(" IS NULL OR body #> ");
                    qb.push_bind(segments(&cond.path));
                    qb.push(" = 'null'::jsonb");
                } else {
                    qb.push("body #> ");
                    qb.push_bind(path);
                    qb.push(" = ");
                    qb.push_bind(Json(cond.value.clone()));
                }
            }
            Comparator::Ne => {
                qb.push("body #> ");
                qb.push_bind(path);
                qb.push(" IS DISTINCT FROM ");
                qb.push_bind(Json(cond.value.clone()));
            }
            Comparator::Gt | Comparator::Gte | Comparator::Lt | Comparator::Lte => {
                let op = match cond.comparator {
                    Comparator::Gt => ">",
                    Comparator::Gte => ">=",
                    Comparator::Lt => "<",
                    _ => "<=",
                };
                // Numeric operands (including decimal strings, how Money
                // serializes) compare numerically; everything else as text.
                if let Some(decimal) = as_decimal(&cond.value) {
                    qb.push("(body #>> ");
                    qb.push_bind(path);
                    qb.push(format!(")::numeric {op} "));
                    qb.push_bind(decimal.to_string());
                    qb.push("::numeric");
                } else {
                    qb.push("body #>> ");
                    qb.push_bind(path);
                    qb.push(format!(" {op} "));
                    qb.push_bind(cond.value.as_str().unwrap_or_default().to_owned());
                }
            }
            Comparator::Within => {
                let options: Vec<Json<Value>> = cond
                    .value
                    .as_array()
                    .map(|vs| vs.iter().cloned().map(Json).collect())
                    .unwrap_or_default();
                qb.push("body #> ");
                qb.push_bind(path);
                qb.push(" = ANY(");
                qb.push_bind(options);
                qb.push(")");
            }
            Comparator::Exists => {
                let present = cond.value.as_bool().unwrap_or(true);
                qb.push("body #> ");
                qb.push_bind(path);
                qb.push(if present { " IS NOT NULL" } else { " IS NULL" });
            }
        }
        qb.push(")");
    }
}

fn row_to_raw(row: &PgRow) -> Result<RawDocument, StoreError> {
    let id: Uuid = row.try_get("id").map_err(map_db_err)?;
    let body: Json<Value> = row.try_get("body").map_err(map_db_err)?;
    Ok(RawDocument {
        id: id.into(),
        body: body.0,
    })
}

fn segments(path: &str) -> Vec<String> {
    path.split('.').map(str::to_owned).collect()
}

/// Validate a name for direct embedding in SQL: lowercase alphanumerics and
/// underscores, starting with a letter.
fn identifier(name: &str) -> Result<String, StoreError> {
    let valid = !name.is_empty()
        && name.chars().next().is_some_and(|c| c.is_ascii_lowercase())
        && name
            .chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_');
    if valid {
        Ok(name.to_owned())
    } else {
        Err(StoreError::Corruption(format!(
            "invalid identifier for SQL: {name}"
        )))
    }
}

fn table_name(collection: &str) -> Result<String, StoreError> {
    identifier(collection).map(|name| format!("\"{name}\""))
}

/// Validate a dotted path for embedding in an index DDL literal.
fn literal_path(path: &str) -> Result<String, StoreError> {
    let segs: Vec<&str> = path.split('.').collect();
    for seg in &segs {
        let valid = !seg.is_empty()
            && seg
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '_');
        if !valid {
            return Err(StoreError::Corruption(format!(
                "invalid index path: {path}"
            )));
        }
    }
    Ok(format!("{{{}}}", segs.join(",")))
}

fn is_undefined_table(e: &sqlx::Error) -> bool {
    e.as_database_error()
        .and_then(|db| db.code())
        .is_some_and(|code| code == "42P01")
}

fn map_db_err(e: sqlx::Error) -> StoreError {
    if let Some(db) = e.as_database_error() {
        if db.is_unique_violation() {
            return StoreError::Conflict(db.message().to_owned());
        }
        if db
            .code()
            .is_some_and(|code| code == "40001" || code == "40P01")
        {
            return StoreError::TransactionAborted;
        }
    }
    StoreError::Database(e)
}
