//! Module annotation tables, keyed by (module, event|api, name).

use sea_query::{Expr, OnConflict, Order, Query, SqliteQueryBuilder};
use sqlx::{Row, SqlitePool};

use crate::storage::filters;
use crate::storage::models::{ApiAnnotation, EventAnnotation, ALERT_ANNOTATION};
use crate::storage::schema::{ApiAnnotations, EventAnnotations};
use crate::storage::Result;

/// Typed access to `event_annotations`.
pub struct EventAnnotationsTable {
    pool: SqlitePool,
}

impl EventAnnotationsTable {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Insert, or replace the payload of, `(module, event, name)`.
    pub async fn upsert(&self, annotation: &EventAnnotation) -> Result<()> {
        self.upsert_many(std::slice::from_ref(annotation)).await
    }

    pub async fn upsert_many(&self, annotations: &[EventAnnotation]) -> Result<()> {
        if annotations.is_empty() {
            return Ok(());
        }
        let mut insert = Query::insert()
            .into_table(EventAnnotations::Table)
            .columns([
                EventAnnotations::ModuleName,
                EventAnnotations::EventId,
                EventAnnotations::Name,
                EventAnnotations::Annotation,
            ])
            .on_conflict(
                OnConflict::columns([
                    EventAnnotations::ModuleName,
                    EventAnnotations::EventId,
                    EventAnnotations::Name,
                ])
                .update_column(EventAnnotations::Annotation)
                .to_owned(),
            )
            .to_owned();
        for a in annotations {
            insert.values_panic([
                a.module_name.clone().into(),
                a.event_id.into(),
                a.name.clone().into(),
                a.annotation.clone().into(),
            ]);
        }
        let query = insert.to_string(SqliteQueryBuilder);
        sqlx::query(&query).execute(&self.pool).await?;
        Ok(())
    }

    pub async fn get(
        &self,
        module: &str,
        event_id: i64,
        name: &str,
    ) -> Result<Option<EventAnnotation>> {
        let query = Query::select()
            .columns([
                EventAnnotations::ModuleName,
                EventAnnotations::EventId,
                EventAnnotations::Name,
                EventAnnotations::Annotation,
            ])
            .from(EventAnnotations::Table)
            .and_where(Expr::col(EventAnnotations::ModuleName).eq(module))
            .and_where(Expr::col(EventAnnotations::EventId).eq(event_id))
            .and_where(Expr::col(EventAnnotations::Name).eq(name))
            .to_string(SqliteQueryBuilder);
        let row = sqlx::query(&query).fetch_optional(&self.pool).await?;
        Ok(row.map(|row| EventAnnotation {
            module_name: row.get("module_name"),
            event_id: row.get("event_id"),
            name: row.get("name"),
            annotation: row.get("annotation"),
        }))
    }

    /// A module's annotations on one event, alert annotation excluded.
    pub async fn list(&self, module: &str, event_id: i64) -> Result<Vec<EventAnnotation>> {
        let query = Query::select()
            .columns([
                EventAnnotations::ModuleName,
                EventAnnotations::EventId,
                EventAnnotations::Name,
                EventAnnotations::Annotation,
            ])
            .from(EventAnnotations::Table)
            .and_where(Expr::col(EventAnnotations::ModuleName).eq(module))
            .and_where(Expr::col(EventAnnotations::EventId).eq(event_id))
            .and_where(Expr::col(EventAnnotations::Name).ne(ALERT_ANNOTATION))
            .order_by(EventAnnotations::Id, Order::Asc)
            .to_string(SqliteQueryBuilder);
        let rows = sqlx::query(&query).fetch_all(&self.pool).await?;
        Ok(rows
            .iter()
            .map(|row| EventAnnotation {
                module_name: row.get("module_name"),
                event_id: row.get("event_id"),
                name: row.get("name"),
                annotation: row.get("annotation"),
            })
            .collect())
    }
}

/// Typed access to `api_annotations`.
pub struct ApiAnnotationsTable {
    pool: SqlitePool,
}

impl ApiAnnotationsTable {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Insert, or replace the payload of, `(module, api, name)`.
    pub async fn upsert(&self, annotation: &ApiAnnotation) -> Result<()> {
        self.upsert_many(std::slice::from_ref(annotation)).await
    }

    pub async fn upsert_many(&self, annotations: &[ApiAnnotation]) -> Result<()> {
        if annotations.is_empty() {
            return Ok(());
        }
        let mut insert = Query::insert()
            .into_table(ApiAnnotations::Table)
            .columns([
                ApiAnnotations::ModuleName,
                ApiAnnotations::ApiId,
                ApiAnnotations::Name,
                ApiAnnotations::Annotation,
            ])
            .on_conflict(
                OnConflict::columns([
                    ApiAnnotations::ModuleName,
                    ApiAnnotations::ApiId,
                    ApiAnnotations::Name,
                ])
                .update_column(ApiAnnotations::Annotation)
                .to_owned(),
            )
            .to_owned();
        for a in annotations {
            insert.values_panic([
                a.module_name.clone().into(),
                a.api_id.into(),
                a.name.clone().into(),
                a.annotation.clone().into(),
            ]);
        }
        let query = insert.to_string(SqliteQueryBuilder);
        sqlx::query(&query).execute(&self.pool).await?;
        Ok(())
    }

    pub async fn get(&self, module: &str, api_id: i64, name: &str) -> Result<Option<ApiAnnotation>> {
        let query = Query::select()
            .columns([
                ApiAnnotations::ModuleName,
                ApiAnnotations::ApiId,
                ApiAnnotations::Name,
                ApiAnnotations::Annotation,
            ])
            .from(ApiAnnotations::Table)
            .and_where(Expr::col(ApiAnnotations::ModuleName).eq(module))
            .and_where(Expr::col(ApiAnnotations::ApiId).eq(api_id))
            .and_where(Expr::col(ApiAnnotations::Name).eq(name))
            .to_string(SqliteQueryBuilder);
        let row = sqlx::query(&query).fetch_optional(&self.pool).await?;
        Ok(row.map(|row| api_annotation_from_row(&row)))
    }

    /// Annotations on one API; an empty `module` lists every module's.
    pub async fn list(&self, module: &str, api_id: i64) -> Result<Vec<ApiAnnotation>> {
        let mut stmt = Query::select()
            .columns([
                ApiAnnotations::ModuleName,
                ApiAnnotations::ApiId,
                ApiAnnotations::Name,
                ApiAnnotations::Annotation,
            ])
            .from(ApiAnnotations::Table)
            .and_where(Expr::col(ApiAnnotations::ApiId).eq(api_id))
            .order_by(ApiAnnotations::Id, Order::Asc)
            .to_owned();
        if !module.is_empty() {
            stmt.and_where(filters::eq(ApiAnnotations::ModuleName, module));
        }
        let query = stmt.to_string(SqliteQueryBuilder);
        let rows = sqlx::query(&query).fetch_all(&self.pool).await?;
        Ok(rows.iter().map(api_annotation_from_row).collect())
    }

    pub async fn delete(&self, module: &str, api_id: i64, names: &[String]) -> Result<()> {
        if names.is_empty() {
            return Ok(());
        }
        let query = Query::delete()
            .from_table(ApiAnnotations::Table)
            .and_where(Expr::col(ApiAnnotations::ModuleName).eq(module))
            .and_where(Expr::col(ApiAnnotations::ApiId).eq(api_id))
            .and_where(Expr::col(ApiAnnotations::Name).is_in(names.iter().cloned()))
            .to_string(SqliteQueryBuilder);
        sqlx::query(&query).execute(&self.pool).await?;
        Ok(())
    }

    pub async fn delete_all(&self, module: &str, api_id: i64) -> Result<()> {
        let query = Query::delete()
            .from_table(ApiAnnotations::Table)
            .and_where(Expr::col(ApiAnnotations::ModuleName).eq(module))
            .and_where(Expr::col(ApiAnnotations::ApiId).eq(api_id))
            .to_string(SqliteQueryBuilder);
        sqlx::query(&query).execute(&self.pool).await?;
        Ok(())
    }
}

fn api_annotation_from_row(row: &sqlx::sqlite::SqliteRow) -> ApiAnnotation {
    ApiAnnotation {
        module_name: row.get("module_name"),
        api_id: row.get("api_id"),
        name: row.get("name"),
        annotation: row.get("annotation"),
    }
}
