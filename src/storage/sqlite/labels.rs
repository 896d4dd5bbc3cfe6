//! Event labels.

use sea_query::{Expr, OnConflict, Order, Query, SqliteQueryBuilder};
use sqlx::{Row, SqlitePool};

use crate::storage::models::{ApiEvent, Label};
use crate::storage::schema::Labels;
use crate::storage::Result;

/// Typed access to `labels`.
pub struct LabelsTable {
    pool: SqlitePool,
}

impl LabelsTable {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Label `event`, replacing any value already set for `key`.
    pub async fn create(&self, event: &ApiEvent, key: &str, value: &str) -> Result<()> {
        let path = if !event.provided_path_id.is_empty() {
            &event.provided_path_id
        } else if !event.reconstructed_path_id.is_empty() {
            &event.reconstructed_path_id
        } else {
            &event.path
        };

        let query = Query::insert()
            .into_table(Labels::Table)
            .columns([
                Labels::ApiInfoId,
                Labels::Path,
                Labels::Method,
                Labels::EventId,
                Labels::Key,
                Labels::Value,
            ])
            .values_panic([
                event.api_info_id.into(),
                path.clone().into(),
                event.method.clone().into(),
                event.id.into(),
                key.into(),
                value.into(),
            ])
            .on_conflict(
                OnConflict::columns([Labels::EventId, Labels::Key])
                    .update_column(Labels::Value)
                    .to_owned(),
            )
            .to_string(SqliteQueryBuilder);
        sqlx::query(&query).execute(&self.pool).await?;
        Ok(())
    }

    pub async fn list_by_event(&self, event_id: i64) -> Result<Vec<Label>> {
        let query = Query::select()
            .columns([
                Labels::Id,
                Labels::ApiInfoId,
                Labels::Path,
                Labels::Method,
                Labels::EventId,
                Labels::Key,
                Labels::Value,
            ])
            .from(Labels::Table)
            .and_where(Expr::col(Labels::EventId).eq(event_id))
            .order_by(Labels::Id, Order::Asc)
            .to_string(SqliteQueryBuilder);
        let rows = sqlx::query(&query).fetch_all(&self.pool).await?;
        Ok(rows
            .iter()
            .map(|row| Label {
                id: row.get("id"),
                api_info_id: row.get("api_info_id"),
                path: row.get("path"),
                method: row.get("method"),
                event_id: row.get("event_id"),
                key: row.get("key"),
                value: row.get("value"),
            })
            .collect())
    }

    pub async fn delete_by_event(&self, event_id: i64) -> Result<()> {
        let query = Query::delete()
            .from_table(Labels::Table)
            .and_where(Expr::col(Labels::EventId).eq(event_id))
            .to_string(SqliteQueryBuilder);
        sqlx::query(&query).execute(&self.pool).await?;
        Ok(())
    }
}
