//! API inventory table.

use sea_query::{Alias, Expr, Func, OnConflict, Query, SelectStatement, SqliteQueryBuilder};
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqlitePool};
use tracing::debug;

use crate::storage::filters::{self, Page, SortDir};
use crate::storage::models::{ApiInfo, ApiType, SpecSource};
use crate::storage::schema::ApiInventory;
use crate::storage::{format_time, Result, StorageError};

const COLUMNS: [ApiInventory; 14] = [
    ApiInventory::Id,
    ApiInventory::Type,
    ApiInventory::Name,
    ApiInventory::Port,
    ApiInventory::TraceSourceId,
    ApiInventory::DestinationNamespace,
    ApiInventory::HasProvidedSpec,
    ApiInventory::HasReconstructedSpec,
    ApiInventory::ProvidedSpec,
    ApiInventory::ProvidedSpecInfo,
    ApiInventory::ReconstructedSpec,
    ApiInventory::ReconstructedSpecInfo,
    ApiInventory::ProvidedSpecCreatedAt,
    ApiInventory::ReconstructedSpecCreatedAt,
];

const SORT_KEYS: &[(&str, ApiInventory)] = &[
    ("name", ApiInventory::Name),
    ("port", ApiInventory::Port),
    ("hasProvidedSpec", ApiInventory::HasProvidedSpec),
    ("hasReconstructedSpec", ApiInventory::HasReconstructedSpec),
];

/// Listing filters for the inventory.
#[derive(Debug, Clone, Default)]
pub struct ApiInventoryFilter {
    pub api_type: Option<ApiType>,
    pub api_id: Option<i64>,
    pub name_is: Vec<String>,
    pub name_is_not: Vec<String>,
    pub name_contains: Vec<String>,
    pub name_start: Option<String>,
    pub name_end: Option<String>,
    pub port_is: Vec<i64>,
    pub port_is_not: Vec<i64>,
    pub has_provided_spec: Option<bool>,
    pub has_reconstructed_spec: Option<bool>,
    pub trace_source_id: Option<i64>,
}

impl ApiInventoryFilter {
    fn apply(&self, stmt: &mut SelectStatement) {
        if let Some(api_type) = self.api_type {
            stmt.and_where(filters::eq(ApiInventory::Type, api_type.as_str()));
        }
        if let Some(id) = self.api_id {
            stmt.and_where(filters::eq(ApiInventory::Id, id));
        }
        if let Some(source) = self.trace_source_id {
            stmt.and_where(filters::eq(ApiInventory::TraceSourceId, source));
        }
        filters::filter_is(stmt, ApiInventory::Name, &self.name_is);
        filters::filter_is_not(stmt, ApiInventory::Name, &self.name_is_not);
        filters::filter_contains(stmt, ApiInventory::Name, &self.name_contains);
        filters::filter_starts_with(stmt, ApiInventory::Name, self.name_start.as_deref());
        filters::filter_ends_with(stmt, ApiInventory::Name, self.name_end.as_deref());
        filters::filter_is(stmt, ApiInventory::Port, &self.port_is);
        filters::filter_is_not(stmt, ApiInventory::Port, &self.port_is_not);
        filters::filter_bool(stmt, ApiInventory::HasProvidedSpec, self.has_provided_spec);
        filters::filter_bool(
            stmt,
            ApiInventory::HasReconstructedSpec,
            self.has_reconstructed_spec,
        );
    }
}

/// Typed access to `api_inventory`.
pub struct ApiInventoryTable {
    pool: SqlitePool,
}

impl ApiInventoryTable {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    fn select() -> SelectStatement {
        Query::select()
            .columns(COLUMNS)
            .from(ApiInventory::Table)
            .to_owned()
    }

    /// Return the row for `(name, port, trace_source_id)`, inserting it when
    /// absent. The flag reports whether this call created the row.
    pub async fn first_or_create(&self, api: &ApiInfo) -> Result<(ApiInfo, bool)> {
        let insert = Query::insert()
            .into_table(ApiInventory::Table)
            .columns([
                ApiInventory::Type,
                ApiInventory::Name,
                ApiInventory::Port,
                ApiInventory::TraceSourceId,
                ApiInventory::DestinationNamespace,
            ])
            .values_panic([
                api.api_type.as_str().into(),
                api.name.clone().into(),
                api.port.into(),
                api.trace_source_id.into(),
                api.destination_namespace.clone().into(),
            ])
            .on_conflict(
                OnConflict::columns([
                    ApiInventory::Name,
                    ApiInventory::Port,
                    ApiInventory::TraceSourceId,
                ])
                .do_nothing()
                .to_owned(),
            )
            .to_string(SqliteQueryBuilder);

        let created = sqlx::query(&insert)
            .execute(&self.pool)
            .await?
            .rows_affected()
            > 0;

        let row = self
            .find(&api.name, api.port, api.trace_source_id)
            .await?
            .ok_or(StorageError::NotFound)?;
        if created {
            debug!(api_id = row.id, name = %row.name, port = row.port, "api created");
        }
        Ok((row, created))
    }

    pub async fn get(&self, id: i64) -> Result<ApiInfo> {
        let query = Self::select()
            .and_where(Expr::col(ApiInventory::Id).eq(id))
            .to_string(SqliteQueryBuilder);
        let row = sqlx::query(&query).fetch_one(&self.pool).await?;
        api_info_from_row(&row)
    }

    pub async fn find(
        &self,
        name: &str,
        port: i64,
        trace_source_id: i64,
    ) -> Result<Option<ApiInfo>> {
        let query = Self::select()
            .and_where(Expr::col(ApiInventory::Name).eq(name))
            .and_where(Expr::col(ApiInventory::Port).eq(port))
            .and_where(Expr::col(ApiInventory::TraceSourceId).eq(trace_source_id))
            .to_string(SqliteQueryBuilder);
        sqlx::query(&query)
            .fetch_optional(&self.pool)
            .await?
            .map(|row| api_info_from_row(&row))
            .transpose()
    }

    /// Identifier of `(name, port, trace_source_id)`.
    pub async fn api_id(&self, name: &str, port: i64, trace_source_id: i64) -> Result<i64> {
        let query = Query::select()
            .column(ApiInventory::Id)
            .from(ApiInventory::Table)
            .and_where(Expr::col(ApiInventory::Name).eq(name))
            .and_where(Expr::col(ApiInventory::Port).eq(port))
            .and_where(Expr::col(ApiInventory::TraceSourceId).eq(trace_source_id))
            .to_string(SqliteQueryBuilder);
        let row = sqlx::query(&query).fetch_one(&self.pool).await?;
        Ok(row.get("id"))
    }

    /// Filtered, sorted page plus the total matching count.
    pub async fn list(
        &self,
        filter: &ApiInventoryFilter,
        sort_key: &str,
        sort_dir: SortDir,
        page: Page,
    ) -> Result<(Vec<ApiInfo>, i64)> {
        let sort = filters::sort_column(SORT_KEYS, sort_key)?;

        let mut count = Query::select()
            .expr_as(Func::count(Expr::col(ApiInventory::Id)), Alias::new("total"))
            .from(ApiInventory::Table)
            .to_owned();
        filter.apply(&mut count);
        let count = count.to_string(SqliteQueryBuilder);
        let total: i64 = sqlx::query(&count).fetch_one(&self.pool).await?.get("total");

        let mut stmt = Self::select();
        filter.apply(&mut stmt);
        stmt.order_by(sort, sort_dir.order())
            .order_by(ApiInventory::Id, sort_dir.order());
        page.apply(&mut stmt);
        let query = stmt.to_string(SqliteQueryBuilder);

        let rows = sqlx::query(&query).fetch_all(&self.pool).await?;
        let items = rows
            .iter()
            .map(api_info_from_row)
            .collect::<Result<Vec<_>>>()?;
        Ok((items, total))
    }

    /// Every API, unpaged.
    pub async fn all(&self) -> Result<Vec<ApiInfo>> {
        let query = Self::select()
            .order_by(ApiInventory::Id, sea_query::Order::Asc)
            .to_string(SqliteQueryBuilder);
        let rows = sqlx::query(&query).fetch_all(&self.pool).await?;
        rows.iter().map(api_info_from_row).collect()
    }

    /// Store a spec payload and raise the matching `has_*` flag.
    pub async fn put_spec(
        &self,
        id: i64,
        source: SpecSource,
        spec: &str,
        spec_info: &str,
    ) -> Result<()> {
        let now = format_time(chrono::Utc::now());
        let (spec_col, info_col, flag_col, created_col) = spec_columns(source);
        let query = Query::update()
            .table(ApiInventory::Table)
            .values([
                (spec_col, spec.into()),
                (info_col, spec_info.into()),
                (flag_col, (!spec.is_empty()).into()),
                (created_col, now.into()),
            ])
            .and_where(Expr::col(ApiInventory::Id).eq(id))
            .to_string(SqliteQueryBuilder);
        let result = sqlx::query(&query).execute(&self.pool).await?;
        if result.rows_affected() == 0 {
            return Err(StorageError::NotFound);
        }
        Ok(())
    }

    pub async fn delete_provided_spec(&self, id: i64) -> Result<()> {
        self.clear_spec(id, SpecSource::Provided).await
    }

    pub async fn delete_reconstructed_spec(&self, id: i64) -> Result<()> {
        self.clear_spec(id, SpecSource::Reconstructed).await
    }

    async fn clear_spec(&self, id: i64, source: SpecSource) -> Result<()> {
        let (spec_col, info_col, flag_col, created_col) = spec_columns(source);
        let query = Query::update()
            .table(ApiInventory::Table)
            .values([
                (spec_col, "".into()),
                (info_col, "".into()),
                (flag_col, false.into()),
                (created_col, Option::<String>::None.into()),
            ])
            .and_where(Expr::col(ApiInventory::Id).eq(id))
            .to_string(SqliteQueryBuilder);
        let result = sqlx::query(&query).execute(&self.pool).await?;
        if result.rows_affected() == 0 {
            return Err(StorageError::NotFound);
        }
        Ok(())
    }
}

fn spec_columns(source: SpecSource) -> (ApiInventory, ApiInventory, ApiInventory, ApiInventory) {
    match source {
        SpecSource::Provided => (
            ApiInventory::ProvidedSpec,
            ApiInventory::ProvidedSpecInfo,
            ApiInventory::HasProvidedSpec,
            ApiInventory::ProvidedSpecCreatedAt,
        ),
        SpecSource::Reconstructed => (
            ApiInventory::ReconstructedSpec,
            ApiInventory::ReconstructedSpecInfo,
            ApiInventory::HasReconstructedSpec,
            ApiInventory::ReconstructedSpecCreatedAt,
        ),
    }
}

fn api_info_from_row(row: &SqliteRow) -> Result<ApiInfo> {
    let api_type: String = row.get("type");
    Ok(ApiInfo {
        id: row.get("id"),
        api_type: ApiType::parse(&api_type)
            .ok_or_else(|| StorageError::Serialization(format!("api type '{api_type}'")))?,
        name: row.get("name"),
        port: row.get("port"),
        trace_source_id: row.get("trace_source_id"),
        destination_namespace: row.get("destination_namespace"),
        has_provided_spec: row.get("has_provided_spec"),
        has_reconstructed_spec: row.get("has_reconstructed_spec"),
        provided_spec: row.get("provided_spec"),
        provided_spec_info: row.get("provided_spec_info"),
        reconstructed_spec: row.get("reconstructed_spec"),
        reconstructed_spec_info: row.get("reconstructed_spec_info"),
        provided_spec_created_at: row.get("provided_spec_created_at"),
        reconstructed_spec_created_at: row.get("reconstructed_spec_created_at"),
    })
}
