//! Trace sources and their agent tokens.

use base64::engine::general_purpose::URL_SAFE;
use base64::Engine;
use rand::Rng;
use sea_query::{Expr, OnConflict, Order, Query, SelectStatement, SqliteQueryBuilder};
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqlitePool};
use tracing::info;
use uuid::Uuid;

use crate::storage::models::{TraceSource, EXTERNAL_TRACE_SOURCE_ID};
use crate::storage::schema::TraceSources;
use crate::storage::{Result, StorageError};

/// Name of the always-present external source.
pub const EXTERNAL_TRACE_SOURCE_NAME: &str = "Default Trace Source";

const TOKEN_BYTES: usize = 32;

/// Fresh agent token: 32 random bytes, URL-safe base64.
pub fn generate_token() -> String {
    let mut secret = [0u8; TOKEN_BYTES];
    rand::rng().fill(&mut secret[..]);
    URL_SAFE.encode(secret)
}

/// Typed access to `trace_sources`.
pub struct TraceSourcesTable {
    pool: SqlitePool,
}

impl TraceSourcesTable {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    fn select() -> SelectStatement {
        Query::select()
            .columns([
                TraceSources::Id,
                TraceSources::Uid,
                TraceSources::Name,
                TraceSources::Type,
                TraceSources::Description,
                TraceSources::AuthToken,
            ])
            .from(TraceSources::Table)
            .to_owned()
    }

    /// Ensure the external source (id 0, nil uid) exists.
    pub async fn prepopulate(&self) -> Result<()> {
        let query = Query::insert()
            .into_table(TraceSources::Table)
            .columns([TraceSources::Id, TraceSources::Uid, TraceSources::Name])
            .values_panic([
                EXTERNAL_TRACE_SOURCE_ID.into(),
                Uuid::nil().to_string().into(),
                EXTERNAL_TRACE_SOURCE_NAME.into(),
            ])
            .on_conflict(OnConflict::column(TraceSources::Id).do_nothing().to_owned())
            .to_string(SqliteQueryBuilder);
        sqlx::query(&query).execute(&self.pool).await?;
        Ok(())
    }

    /// Create a source with a fresh uid and token. A source with the same
    /// name is returned as is.
    pub async fn create(
        &self,
        name: &str,
        source_type: &str,
        description: &str,
    ) -> Result<TraceSource> {
        if let Some(existing) = self.find_by_name(name).await? {
            return Ok(existing);
        }

        let uid = Uuid::new_v4();
        let token = generate_token();
        let query = Query::insert()
            .into_table(TraceSources::Table)
            .columns([
                TraceSources::Uid,
                TraceSources::Name,
                TraceSources::Type,
                TraceSources::Description,
                TraceSources::AuthToken,
            ])
            .values_panic([
                uid.to_string().into(),
                name.into(),
                source_type.into(),
                description.into(),
                token.clone().into(),
            ])
            .to_string(SqliteQueryBuilder);
        let result = sqlx::query(&query).execute(&self.pool).await?;
        info!(name, %uid, "trace source created");

        Ok(TraceSource {
            id: result.last_insert_rowid(),
            uid,
            name: name.to_string(),
            source_type: source_type.to_string(),
            description: description.to_string(),
            token: Some(token),
        })
    }

    pub async fn get(&self, id: i64) -> Result<TraceSource> {
        let query = Self::select()
            .and_where(Expr::col(TraceSources::Id).eq(id))
            .to_string(SqliteQueryBuilder);
        let row = sqlx::query(&query).fetch_one(&self.pool).await?;
        trace_source_from_row(&row)
    }

    pub async fn get_by_uid(&self, uid: Uuid) -> Result<TraceSource> {
        let query = Self::select()
            .and_where(Expr::col(TraceSources::Uid).eq(uid.to_string()))
            .to_string(SqliteQueryBuilder);
        let row = sqlx::query(&query).fetch_one(&self.pool).await?;
        trace_source_from_row(&row)
    }

    /// Source owning `token`, if any.
    pub async fn get_by_token(&self, token: &str) -> Result<Option<TraceSource>> {
        let query = Self::select()
            .and_where(Expr::col(TraceSources::AuthToken).eq(token))
            .to_string(SqliteQueryBuilder);
        sqlx::query(&query)
            .fetch_optional(&self.pool)
            .await?
            .map(|row| trace_source_from_row(&row))
            .transpose()
    }

    async fn find_by_name(&self, name: &str) -> Result<Option<TraceSource>> {
        let query = Self::select()
            .and_where(Expr::col(TraceSources::Name).eq(name))
            .to_string(SqliteQueryBuilder);
        sqlx::query(&query)
            .fetch_optional(&self.pool)
            .await?
            .map(|row| trace_source_from_row(&row))
            .transpose()
    }

    pub async fn list(&self) -> Result<Vec<TraceSource>> {
        let query = Self::select()
            .order_by(TraceSources::Id, Order::Asc)
            .to_string(SqliteQueryBuilder);
        let rows = sqlx::query(&query).fetch_all(&self.pool).await?;
        rows.iter().map(trace_source_from_row).collect()
    }

    /// Delete by uid. Inventory rows of the source cascade.
    pub async fn delete(&self, uid: Uuid) -> Result<()> {
        if uid.is_nil() {
            return Err(StorageError::NotFound);
        }
        let query = Query::delete()
            .from_table(TraceSources::Table)
            .and_where(Expr::col(TraceSources::Uid).eq(uid.to_string()))
            .to_string(SqliteQueryBuilder);
        let result = sqlx::query(&query).execute(&self.pool).await?;
        if result.rows_affected() == 0 {
            return Err(StorageError::NotFound);
        }
        Ok(())
    }
}

fn trace_source_from_row(row: &SqliteRow) -> Result<TraceSource> {
    let uid: String = row.get("uid");
    Ok(TraceSource {
        id: row.get("id"),
        uid: Uuid::parse_str(&uid).map_err(|e| StorageError::Serialization(e.to_string()))?,
        name: row.get("name"),
        source_type: row.get("type"),
        description: row.get("description"),
        token: row.get("auth_token"),
    })
}
