//! API events table.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use sea_query::{
    Alias, Cond, Expr, Func, Order, Query, SelectStatement, SimpleExpr, SqliteQueryBuilder,
};
use serde::{Deserialize, Serialize};
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqlitePool};

use super::in_immediate_tx;
use crate::storage::filters::{self, Page, SortDir};
use crate::storage::models::{
    ApiEvent, ApiType, DiffType, EventAnnotation, SpecDiff, ALERT_ANNOTATION,
};
use crate::storage::schema::{ApiEvents, ApiInventory, EventAnnotations};
use crate::storage::{Result, StorageError};

/// Columns read by listings. Diff payloads are fetched on demand.
const COLUMNS: [ApiEvents; 20] = [
    ApiEvents::Id,
    ApiEvents::Time,
    ApiEvents::RequestTime,
    ApiEvents::Method,
    ApiEvents::Path,
    ApiEvents::Query,
    ApiEvents::StatusCode,
    ApiEvents::SourceIp,
    ApiEvents::DestinationIp,
    ApiEvents::DestinationPort,
    ApiEvents::HasReconstructedSpecDiff,
    ApiEvents::HasProvidedSpecDiff,
    ApiEvents::HasSpecDiff,
    ApiEvents::SpecDiffType,
    ApiEvents::HostSpecName,
    ApiEvents::IsNonApi,
    ApiEvents::ProvidedPathId,
    ApiEvents::ReconstructedPathId,
    ApiEvents::ApiInfoId,
    ApiEvents::EventType,
];

const SORT_KEYS: &[(&str, ApiEvents)] = &[
    ("time", ApiEvents::Time),
    ("method", ApiEvents::Method),
    ("path", ApiEvents::Path),
    ("statusCode", ApiEvents::StatusCode),
    ("sourceIP", ApiEvents::SourceIp),
    ("destinationIP", ApiEvents::DestinationIp),
    ("destinationPort", ApiEvents::DestinationPort),
    ("specDiffType", ApiEvents::SpecDiffType),
    ("hostSpecName", ApiEvents::HostSpecName),
    ("apiType", ApiEvents::EventType),
];

/// Number of points in each dashboard usage series.
pub const USAGE_BUCKETS: u32 = 50;

/// Listing filters for events.
#[derive(Debug, Clone, Default)]
pub struct ApiEventsFilter {
    pub method_is: Vec<String>,
    pub provided_path_id_is: Vec<String>,
    pub reconstructed_path_id_is: Vec<String>,
    pub path_is: Vec<String>,
    pub path_is_not: Vec<String>,
    pub path_contains: Vec<String>,
    pub path_start: Option<String>,
    pub path_end: Option<String>,
    pub status_code_is: Vec<i64>,
    pub status_code_is_not: Vec<i64>,
    pub status_code_gte: Option<i64>,
    pub status_code_lte: Option<i64>,
    pub source_ip_is: Vec<String>,
    pub source_ip_is_not: Vec<String>,
    pub destination_ip_is: Vec<String>,
    pub destination_ip_is_not: Vec<String>,
    pub destination_port_is: Vec<i64>,
    pub destination_port_is_not: Vec<i64>,
    pub has_spec_diff: Option<bool>,
    pub spec_diff_type_is: Vec<String>,
    pub spec_is: Vec<String>,
    pub spec_is_not: Vec<String>,
    pub spec_contains: Vec<String>,
    pub spec_start: Option<String>,
    pub spec_end: Option<String>,
    pub api_info_id: Option<i64>,
    pub start_time: Option<String>,
    pub end_time: Option<String>,
    pub request_start_time: Option<String>,
    pub request_end_time: Option<String>,
    pub show_non_api: bool,
    /// Alert severities (`ALERT_INFO`, ...) any module raised on the event.
    pub alert_is: Vec<String>,
    /// Modules that raised an alert on the event.
    pub alert_module_is: Vec<String>,
}

impl ApiEventsFilter {
    fn apply(&self, stmt: &mut SelectStatement) {
        filters::filter_time_range(
            stmt,
            ApiEvents::Time,
            self.start_time.as_deref(),
            self.end_time.as_deref(),
        );
        filters::filter_time_range(
            stmt,
            ApiEvents::RequestTime,
            self.request_start_time.as_deref(),
            self.request_end_time.as_deref(),
        );

        filters::filter_is(stmt, ApiEvents::Method, &self.method_is);
        filters::filter_is(stmt, ApiEvents::ProvidedPathId, &self.provided_path_id_is);
        filters::filter_is(
            stmt,
            ApiEvents::ReconstructedPathId,
            &self.reconstructed_path_id_is,
        );

        filters::filter_is(stmt, ApiEvents::Path, &self.path_is);
        filters::filter_is_not(stmt, ApiEvents::Path, &self.path_is_not);
        filters::filter_contains(stmt, ApiEvents::Path, &self.path_contains);
        filters::filter_starts_with(stmt, ApiEvents::Path, self.path_start.as_deref());
        filters::filter_ends_with(stmt, ApiEvents::Path, self.path_end.as_deref());

        filters::filter_is(stmt, ApiEvents::StatusCode, &self.status_code_is);
        filters::filter_is_not(stmt, ApiEvents::StatusCode, &self.status_code_is_not);
        filters::filter_gte(stmt, ApiEvents::StatusCode, self.status_code_gte);
        filters::filter_lte(stmt, ApiEvents::StatusCode, self.status_code_lte);

        filters::filter_is(stmt, ApiEvents::SourceIp, &self.source_ip_is);
        filters::filter_is_not(stmt, ApiEvents::SourceIp, &self.source_ip_is_not);
        filters::filter_is(stmt, ApiEvents::DestinationIp, &self.destination_ip_is);
        filters::filter_is_not(stmt, ApiEvents::DestinationIp, &self.destination_ip_is_not);
        filters::filter_is(stmt, ApiEvents::DestinationPort, &self.destination_port_is);
        filters::filter_is_not(
            stmt,
            ApiEvents::DestinationPort,
            &self.destination_port_is_not,
        );

        filters::filter_bool(stmt, ApiEvents::HasSpecDiff, self.has_spec_diff);
        filters::filter_is(stmt, ApiEvents::SpecDiffType, &self.spec_diff_type_is);

        filters::filter_is(stmt, ApiEvents::HostSpecName, &self.spec_is);
        filters::filter_is_not(stmt, ApiEvents::HostSpecName, &self.spec_is_not);
        filters::filter_contains(stmt, ApiEvents::HostSpecName, &self.spec_contains);
        filters::filter_starts_with(stmt, ApiEvents::HostSpecName, self.spec_start.as_deref());
        filters::filter_ends_with(stmt, ApiEvents::HostSpecName, self.spec_end.as_deref());

        if let Some(api_id) = self.api_info_id {
            stmt.and_where(filters::eq(ApiEvents::ApiInfoId, api_id));
        }

        if !self.show_non_api {
            stmt.and_where(filters::eq(ApiEvents::IsNonApi, false));
        }

        if !self.alert_is.is_empty() || !self.alert_module_is.is_empty() {
            let mut alerts = Query::select()
                .column(EventAnnotations::EventId)
                .from(EventAnnotations::Table)
                .and_where(filters::eq(EventAnnotations::Name, ALERT_ANNOTATION))
                .to_owned();
            filters::filter_is(&mut alerts, EventAnnotations::ModuleName, &self.alert_module_is);
            if !self.alert_is.is_empty() {
                alerts.and_where(annotation_text().is_in(self.alert_is.iter().cloned()));
            }
            stmt.and_where(Expr::col(ApiEvents::Id).in_subquery(alerts));
        }
    }
}

/// Full listing request for [`ApiEventsTable::list_with_annotations`].
#[derive(Debug, Clone)]
pub struct ApiEventsQuery {
    pub event_id: Option<i64>,
    pub filter: Option<ApiEventsFilter>,
    pub offset: u64,
    /// `None` means unbounded.
    pub limit: Option<u64>,
    pub sort_key: String,
    pub ascending: bool,
}

impl Default for ApiEventsQuery {
    fn default() -> Self {
        Self {
            event_id: None,
            filter: None,
            offset: 0,
            limit: None,
            sort_key: "time".to_string(),
            ascending: false,
        }
    }
}

/// Event count per API, for the "most used" dashboard.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HostGroup {
    pub api_host_name: String,
    pub api_port: i64,
    pub api_type: ApiType,
    #[serde(rename = "apiInfoId")]
    pub api_info_id: Option<i64>,
    pub num_calls: i64,
}

/// One point of a dashboard usage series.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApiUsagePoint {
    pub time: String,
    pub num_of_calls: i64,
}

/// Dashboard usage series.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApiUsageKind {
    /// Events that differ from a known spec.
    ApiWithDiffs,
    /// API events without diffs whose API has at least one spec.
    ExistingApi,
    /// API events without diffs whose API has no spec yet.
    NewApi,
}

/// One parameterized path of an approved review and the raw paths it covers.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApprovedPathItem {
    pub path_uuid: String,
    pub paths: Vec<String>,
}

/// Typed access to `api_events`.
pub struct ApiEventsTable {
    pool: SqlitePool,
}

impl ApiEventsTable {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    fn select() -> SelectStatement {
        Query::select()
            .columns(COLUMNS)
            .from(ApiEvents::Table)
            .to_owned()
    }

    /// Insert an event and return its id.
    pub async fn create(&self, event: &ApiEvent) -> Result<i64> {
        let query = Query::insert()
            .into_table(ApiEvents::Table)
            .columns([
                ApiEvents::Time,
                ApiEvents::RequestTime,
                ApiEvents::Method,
                ApiEvents::Path,
                ApiEvents::Query,
                ApiEvents::StatusCode,
                ApiEvents::SourceIp,
                ApiEvents::DestinationIp,
                ApiEvents::DestinationPort,
                ApiEvents::HasReconstructedSpecDiff,
                ApiEvents::HasProvidedSpecDiff,
                ApiEvents::HasSpecDiff,
                ApiEvents::SpecDiffType,
                ApiEvents::HostSpecName,
                ApiEvents::IsNonApi,
                ApiEvents::NewReconstructedSpec,
                ApiEvents::OldReconstructedSpec,
                ApiEvents::NewProvidedSpec,
                ApiEvents::OldProvidedSpec,
                ApiEvents::ProvidedPathId,
                ApiEvents::ReconstructedPathId,
                ApiEvents::ApiInfoId,
                ApiEvents::EventType,
            ])
            .values_panic([
                event.time.clone().into(),
                event.request_time.clone().into(),
                event.method.clone().into(),
                event.path.clone().into(),
                event.query.clone().into(),
                event.status_code.into(),
                event.source_ip.clone().into(),
                event.destination_ip.clone().into(),
                event.destination_port.into(),
                event.has_reconstructed_spec_diff.into(),
                event.has_provided_spec_diff.into(),
                event.has_spec_diff.into(),
                event.spec_diff_type.as_str().into(),
                event.host_spec_name.clone().into(),
                event.is_non_api.into(),
                event.new_reconstructed_spec.clone().into(),
                event.old_reconstructed_spec.clone().into(),
                event.new_provided_spec.clone().into(),
                event.old_provided_spec.clone().into(),
                event.provided_path_id.clone().into(),
                event.reconstructed_path_id.clone().into(),
                event.api_info_id.into(),
                event.event_type.as_str().into(),
            ])
            .to_string(SqliteQueryBuilder);

        let result = sqlx::query(&query).execute(&self.pool).await?;
        Ok(result.last_insert_rowid())
    }

    /// Event by id with its alert annotations.
    pub async fn get(&self, id: i64) -> Result<ApiEvent> {
        let query = Self::select()
            .and_where(Expr::col(ApiEvents::Id).eq(id))
            .to_string(SqliteQueryBuilder);
        let row = sqlx::query(&query).fetch_one(&self.pool).await?;
        let mut events = vec![event_from_row(&row)?];
        self.attach_annotations(&mut events, true).await?;
        events.pop().ok_or(StorageError::NotFound)
    }

    pub async fn reconstructed_spec_diff(&self, id: i64) -> Result<SpecDiff> {
        self.spec_diff(
            id,
            ApiEvents::OldReconstructedSpec,
            ApiEvents::NewReconstructedSpec,
        )
        .await
    }

    pub async fn provided_spec_diff(&self, id: i64) -> Result<SpecDiff> {
        self.spec_diff(id, ApiEvents::OldProvidedSpec, ApiEvents::NewProvidedSpec)
            .await
    }

    async fn spec_diff(&self, id: i64, old: ApiEvents, new: ApiEvents) -> Result<SpecDiff> {
        let query = Query::select()
            .expr_as(Expr::col(old), Alias::new("old_spec"))
            .expr_as(Expr::col(new), Alias::new("new_spec"))
            .column(ApiEvents::SpecDiffType)
            .from(ApiEvents::Table)
            .and_where(Expr::col(ApiEvents::Id).eq(id))
            .to_string(SqliteQueryBuilder);
        let row = sqlx::query(&query).fetch_one(&self.pool).await?;
        Ok(SpecDiff {
            diff_type: diff_type_from_row(&row)?,
            old_spec: row.get("old_spec"),
            new_spec: row.get("new_spec"),
        })
    }

    /// Filtered, sorted page with alert annotations, plus the total count.
    pub async fn list(
        &self,
        filter: &ApiEventsFilter,
        sort_key: &str,
        sort_dir: SortDir,
        page: Page,
    ) -> Result<(Vec<ApiEvent>, i64)> {
        let sort = filters::sort_column(SORT_KEYS, sort_key)?;

        let total = self.count(filter).await?;

        let mut stmt = Self::select();
        filter.apply(&mut stmt);
        stmt.order_by(sort, sort_dir.order())
            .order_by(ApiEvents::Id, sort_dir.order());
        page.apply(&mut stmt);
        let query = stmt.to_string(SqliteQueryBuilder);

        let rows = sqlx::query(&query).fetch_all(&self.pool).await?;
        let mut events = rows
            .iter()
            .map(event_from_row)
            .collect::<Result<Vec<_>>>()?;
        self.attach_annotations(&mut events, true).await?;
        Ok((events, total))
    }

    pub async fn count(&self, filter: &ApiEventsFilter) -> Result<i64> {
        let mut stmt = Query::select()
            .expr_as(Func::count(Expr::col(ApiEvents::Id)), Alias::new("total"))
            .from(ApiEvents::Table)
            .to_owned();
        filter.apply(&mut stmt);
        let query = stmt.to_string(SqliteQueryBuilder);
        Ok(sqlx::query(&query).fetch_one(&self.pool).await?.get("total"))
    }

    /// Events with every module annotation joined in, for module consumers.
    pub async fn list_with_annotations(&self, query: &ApiEventsQuery) -> Result<Vec<ApiEvent>> {
        let sort = filters::sort_column(SORT_KEYS, &query.sort_key)?;
        let order = if query.ascending {
            Order::Asc
        } else {
            Order::Desc
        };

        let mut stmt = Self::select();
        if let Some(filter) = &query.filter {
            filter.apply(&mut stmt);
        }
        if let Some(id) = query.event_id {
            stmt.and_where(Expr::col(ApiEvents::Id).eq(id));
        }
        stmt.order_by(sort, order.clone()).order_by(ApiEvents::Id, order);
        if let Some(limit) = query.limit {
            stmt.limit(limit);
        }
        if query.offset > 0 {
            stmt.offset(query.offset);
        }
        let sql = stmt.to_string(SqliteQueryBuilder);

        let rows = sqlx::query(&sql).fetch_all(&self.pool).await?;
        let mut events = rows
            .iter()
            .map(event_from_row)
            .collect::<Result<Vec<_>>>()?;
        self.attach_annotations(&mut events, false).await?;
        Ok(events)
    }

    /// Most recent events that differ from a spec.
    pub async fn latest_diffs(&self, limit: u64) -> Result<Vec<ApiEvent>> {
        let query = Self::select()
            .and_where(filters::eq(ApiEvents::HasSpecDiff, true))
            .order_by(ApiEvents::Time, Order::Desc)
            .order_by(ApiEvents::Id, Order::Desc)
            .limit(limit)
            .to_string(SqliteQueryBuilder);
        let rows = sqlx::query(&query).fetch_all(&self.pool).await?;
        rows.iter().map(event_from_row).collect()
    }

    /// APIs with the most events, busiest first.
    pub async fn most_used(&self, limit: u64) -> Result<Vec<HostGroup>> {
        let query = Query::select()
            .columns([
                ApiEvents::HostSpecName,
                ApiEvents::DestinationPort,
                ApiEvents::ApiInfoId,
                ApiEvents::EventType,
            ])
            .expr_as(Func::count(Expr::col(ApiEvents::Id)), Alias::new("count"))
            .from(ApiEvents::Table)
            .and_where(filters::eq(ApiEvents::IsNonApi, false))
            .group_by_columns([
                ApiEvents::HostSpecName,
                ApiEvents::DestinationPort,
                ApiEvents::ApiInfoId,
                ApiEvents::EventType,
            ])
            .order_by(Alias::new("count"), Order::Desc)
            .limit(limit)
            .to_string(SqliteQueryBuilder);

        let rows = sqlx::query(&query).fetch_all(&self.pool).await?;
        rows.iter()
            .map(|row| {
                let event_type: String = row.get("event_type");
                Ok(HostGroup {
                    api_host_name: row.get("host_spec_name"),
                    api_port: row.get("destination_port"),
                    api_type: parse_api_type(&event_type)?,
                    api_info_id: row.get("api_info_id"),
                    num_calls: row.get("count"),
                })
            })
            .collect()
    }

    /// Event counts of one usage series in `buckets` equal slices of
    /// `[start, end]`.
    pub async fn api_usage(
        &self,
        kind: ApiUsageKind,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        buckets: u32,
    ) -> Result<Vec<ApiUsagePoint>> {
        let mut base = Query::select()
            .expr_as(Func::count(Expr::col(ApiEvents::Id)), Alias::new("total"))
            .from(ApiEvents::Table)
            .to_owned();

        match kind {
            ApiUsageKind::ApiWithDiffs => {
                base.and_where(filters::eq(ApiEvents::HasSpecDiff, true));
            }
            ApiUsageKind::ExistingApi | ApiUsageKind::NewApi => {
                let mut apis = Query::select()
                    .column(ApiInventory::Id)
                    .from(ApiInventory::Table)
                    .to_owned();
                if kind == ApiUsageKind::ExistingApi {
                    apis.cond_where(
                        Cond::any()
                            .add(filters::eq(ApiInventory::HasReconstructedSpec, true))
                            .add(filters::eq(ApiInventory::HasProvidedSpec, true)),
                    );
                } else {
                    apis.and_where(filters::eq(ApiInventory::HasReconstructedSpec, false))
                        .and_where(filters::eq(ApiInventory::HasProvidedSpec, false));
                }
                base.and_where(filters::eq(ApiEvents::IsNonApi, false))
                    .and_where(filters::eq(ApiEvents::HasSpecDiff, false))
                    .and_where(Expr::col(ApiEvents::ApiInfoId).in_subquery(apis));
            }
        }

        let buckets = buckets.max(1);
        let step = (end - start) / buckets as i32;
        let mut points = Vec::with_capacity(buckets as usize);
        let mut bucket_start = start;
        for _ in 0..buckets {
            let bucket_end = bucket_start + step;
            let query = base
                .clone()
                .and_where(Expr::col(ApiEvents::Time).between(
                    crate::storage::format_time(bucket_start),
                    crate::storage::format_time(bucket_end),
                ))
                .to_string(SqliteQueryBuilder);
            let total: i64 = sqlx::query(&query).fetch_one(&self.pool).await?.get("total");
            points.push(ApiUsagePoint {
                time: crate::storage::format_time(bucket_start),
                num_of_calls: total,
            });
            bucket_start = bucket_end;
        }
        Ok(points)
    }

    /// Point every event of `host:port` whose path an approved review covers
    /// at that review's path id. All or nothing.
    pub async fn set_reconstructed_path_ids(
        &self,
        items: &[ApprovedPathItem],
        host: &str,
        port: i64,
    ) -> Result<()> {
        let statements = items
            .iter()
            .filter(|item| !item.paths.is_empty())
            .map(|item| {
                Query::update()
                    .table(ApiEvents::Table)
                    .value(ApiEvents::ReconstructedPathId, item.path_uuid.clone())
                    .and_where(Expr::col(ApiEvents::Path).is_in(item.paths.iter().cloned()))
                    .and_where(Expr::col(ApiEvents::HostSpecName).eq(host))
                    .and_where(Expr::col(ApiEvents::DestinationPort).eq(port))
                    .to_string(SqliteQueryBuilder)
            })
            .collect::<Vec<_>>();

        let mut conn = self.pool.acquire().await?;
        in_immediate_tx(&mut conn, |tx| {
            Box::pin(async move {
                for statement in &statements {
                    sqlx::query(statement).execute(&mut *tx).await?;
                }
                Ok::<(), StorageError>(())
            })
        })
        .await
    }

    /// Fill `annotations` on each event, optionally only the alert ones.
    async fn attach_annotations(&self, events: &mut [ApiEvent], alerts_only: bool) -> Result<()> {
        if events.is_empty() {
            return Ok(());
        }
        let mut stmt = Query::select()
            .columns([
                EventAnnotations::ModuleName,
                EventAnnotations::EventId,
                EventAnnotations::Name,
                EventAnnotations::Annotation,
            ])
            .from(EventAnnotations::Table)
            .and_where(
                Expr::col(EventAnnotations::EventId).is_in(events.iter().map(|e| e.id)),
            )
            .order_by(EventAnnotations::Id, Order::Asc)
            .to_owned();
        if alerts_only {
            stmt.and_where(filters::eq(EventAnnotations::Name, ALERT_ANNOTATION));
        }
        let query = stmt.to_string(SqliteQueryBuilder);

        let mut by_event: HashMap<i64, Vec<EventAnnotation>> = HashMap::new();
        for row in sqlx::query(&query).fetch_all(&self.pool).await? {
            let annotation = EventAnnotation {
                module_name: row.get("module_name"),
                event_id: row.get("event_id"),
                name: row.get("name"),
                annotation: row.get("annotation"),
            };
            by_event
                .entry(annotation.event_id)
                .or_default()
                .push(annotation);
        }
        for event in events.iter_mut() {
            event.annotations = by_event.remove(&event.id).unwrap_or_default();
        }
        Ok(())
    }
}

/// The annotation payload compared as text.
fn annotation_text() -> Expr {
    Expr::expr(SimpleExpr::from(Func::cast_as(
        Expr::col(EventAnnotations::Annotation),
        Alias::new("TEXT"),
    )))
}

fn parse_api_type(value: &str) -> Result<ApiType> {
    ApiType::parse(value).ok_or_else(|| StorageError::Serialization(format!("api type '{value}'")))
}

fn diff_type_from_row(row: &SqliteRow) -> Result<DiffType> {
    let value: String = row.get("spec_diff_type");
    DiffType::parse(&value)
        .ok_or_else(|| StorageError::Serialization(format!("diff type '{value}'")))
}

fn event_from_row(row: &SqliteRow) -> Result<ApiEvent> {
    let event_type: String = row.get("event_type");
    Ok(ApiEvent {
        id: row.get("id"),
        time: row.get("time"),
        request_time: row.get("request_time"),
        method: row.get("method"),
        path: row.get("path"),
        query: row.get("query"),
        status_code: row.get("status_code"),
        source_ip: row.get("source_ip"),
        destination_ip: row.get("destination_ip"),
        destination_port: row.get("destination_port"),
        has_reconstructed_spec_diff: row.get("has_reconstructed_spec_diff"),
        has_provided_spec_diff: row.get("has_provided_spec_diff"),
        has_spec_diff: row.get("has_spec_diff"),
        spec_diff_type: diff_type_from_row(row)?,
        host_spec_name: row.get("host_spec_name"),
        is_non_api: row.get("is_non_api"),
        provided_path_id: row.get("provided_path_id"),
        reconstructed_path_id: row.get("reconstructed_path_id"),
        api_info_id: row.get("api_info_id"),
        event_type: parse_api_type(&event_type)?,
        ..ApiEvent::default()
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::models::ApiInfo;
    use crate::storage::{format_time, Database};

    fn event(api_id: Option<i64>, path: &str, time: DateTime<Utc>) -> ApiEvent {
        ApiEvent {
            time: format_time(time),
            request_time: format_time(time),
            method: "GET".to_string(),
            path: path.to_string(),
            status_code: 200,
            destination_port: 8080,
            host_spec_name: "svc".to_string(),
            is_non_api: api_id.is_none(),
            api_info_id: api_id,
            ..ApiEvent::default()
        }
    }

    async fn api(db: &Database) -> i64 {
        db.api_inventory()
            .first_or_create(&ApiInfo::new("svc", 8080, 0, ApiType::Internal, ""))
            .await
            .unwrap()
            .0
            .id
    }

    #[tokio::test]
    async fn test_create_and_get() {
        let db = Database::in_memory().await.unwrap();
        let api_id = api(&db).await;
        let mut e = event(Some(api_id), "/pets/1", Utc::now());
        e.new_reconstructed_spec = "{\"get\":{}}".to_string();
        e.spec_diff_type = DiffType::ShadowDiff;
        let id = db.api_events().create(&e).await.unwrap();

        let stored = db.api_events().get(id).await.unwrap();
        assert_eq!(stored.path, "/pets/1");
        assert_eq!(stored.api_info_id, Some(api_id));
        assert!(stored.new_reconstructed_spec.is_empty());

        let diff = db.api_events().reconstructed_spec_diff(id).await.unwrap();
        assert_eq!(diff.diff_type, DiffType::ShadowDiff);
        assert_eq!(diff.new_spec, "{\"get\":{}}");
    }

    #[tokio::test]
    async fn test_list_hides_non_api_by_default() {
        let db = Database::in_memory().await.unwrap();
        let api_id = api(&db).await;
        let events = db.api_events();
        events.create(&event(Some(api_id), "/a", Utc::now())).await.unwrap();
        events.create(&event(None, "/index.html", Utc::now())).await.unwrap();

        let mut filter = ApiEventsFilter::default();
        let (items, total) = events
            .list(&filter, "time", SortDir::Asc, Page::default())
            .await
            .unwrap();
        assert_eq!(total, 1);
        assert_eq!(items[0].path, "/a");

        filter.show_non_api = true;
        assert_eq!(events.count(&filter).await.unwrap(), 2);
    }

    #[tokio::test]
    async fn test_time_range_is_inclusive() {
        let db = Database::in_memory().await.unwrap();
        let api_id = api(&db).await;
        let t0 = Utc::now();
        let events = db.api_events();
        for i in 0..3 {
            events
                .create(&event(Some(api_id), "/a", t0 + chrono::Duration::seconds(i)))
                .await
                .unwrap();
        }
        let filter = ApiEventsFilter {
            start_time: Some(format_time(t0)),
            end_time: Some(format_time(t0 + chrono::Duration::seconds(1))),
            ..Default::default()
        };
        assert_eq!(events.count(&filter).await.unwrap(), 2);
    }

    #[tokio::test]
    async fn test_alert_filter() {
        let db = Database::in_memory().await.unwrap();
        let api_id = api(&db).await;
        let events = db.api_events();
        let flagged = events.create(&event(Some(api_id), "/a", Utc::now())).await.unwrap();
        events.create(&event(Some(api_id), "/b", Utc::now())).await.unwrap();
        db.event_annotations()
            .upsert(&EventAnnotation {
                module_name: "traceanalyzer".to_string(),
                event_id: flagged,
                name: ALERT_ANNOTATION.to_string(),
                annotation: b"ALERT_WARN".to_vec(),
            })
            .await
            .unwrap();

        let filter = ApiEventsFilter {
            alert_is: vec!["ALERT_WARN".to_string()],
            ..Default::default()
        };
        let (items, _) = events
            .list(&filter, "time", SortDir::Asc, Page::default())
            .await
            .unwrap();
        assert_eq!(items.len(), 1);
        assert_eq!(items[0].id, flagged);
        assert_eq!(items[0].annotations.len(), 1);
    }

    #[tokio::test]
    async fn test_set_reconstructed_path_ids_touches_only_covered_paths() {
        let db = Database::in_memory().await.unwrap();
        let api_id = api(&db).await;
        let events = db.api_events();
        let now = Utc::now();
        let p1 = events.create(&event(Some(api_id), "/pets/1", now)).await.unwrap();
        let p2 = events.create(&event(Some(api_id), "/pets/2", now)).await.unwrap();
        let other = events.create(&event(Some(api_id), "/owners", now)).await.unwrap();

        events
            .set_reconstructed_path_ids(
                &[ApprovedPathItem {
                    path_uuid: "uuid-1".to_string(),
                    paths: vec!["/pets/1".to_string(), "/pets/2".to_string()],
                }],
                "svc",
                8080,
            )
            .await
            .unwrap();

        assert_eq!(events.get(p1).await.unwrap().reconstructed_path_id, "uuid-1");
        assert_eq!(events.get(p2).await.unwrap().reconstructed_path_id, "uuid-1");
        assert_eq!(events.get(other).await.unwrap().reconstructed_path_id, "");
    }

    #[tokio::test]
    async fn test_api_usage_series() {
        let db = Database::in_memory().await.unwrap();
        let api_id = api(&db).await;
        let events = db.api_events();
        let start = Utc::now();
        let mut diff = event(Some(api_id), "/a", start + chrono::Duration::seconds(2));
        diff.has_spec_diff = true;
        events.create(&diff).await.unwrap();
        events
            .create(&event(Some(api_id), "/b", start + chrono::Duration::seconds(2)))
            .await
            .unwrap();

        let end = start + chrono::Duration::seconds(10);
        let sum = |points: Vec<ApiUsagePoint>| points.iter().map(|p| p.num_of_calls).sum::<i64>();

        let with_diffs = events
            .api_usage(ApiUsageKind::ApiWithDiffs, start, end, 2)
            .await
            .unwrap();
        assert_eq!(with_diffs.len(), 2);
        assert_eq!(sum(with_diffs), 1);
        assert_eq!(
            sum(events.api_usage(ApiUsageKind::NewApi, start, end, 2).await.unwrap()),
            1
        );
        assert_eq!(
            sum(events.api_usage(ApiUsageKind::ExistingApi, start, end, 2).await.unwrap()),
            0
        );
    }

    #[tokio::test]
    async fn test_most_used_orders_by_count() {
        let db = Database::in_memory().await.unwrap();
        let busy = api(&db).await;
        let (quiet, _) = db
            .api_inventory()
            .first_or_create(&ApiInfo::new("quiet", 80, 0, ApiType::External, ""))
            .await
            .unwrap();
        let events = db.api_events();
        for _ in 0..3 {
            events.create(&event(Some(busy), "/a", Utc::now())).await.unwrap();
        }
        let mut e = event(Some(quiet.id), "/b", Utc::now());
        e.host_spec_name = "quiet".to_string();
        e.destination_port = 80;
        e.event_type = ApiType::External;
        events.create(&e).await.unwrap();

        let groups = events.most_used(5).await.unwrap();
        assert_eq!(groups.len(), 2);
        assert_eq!(groups[0].api_info_id, Some(busy));
        assert_eq!(groups[0].num_calls, 3);
        assert_eq!(groups[1].api_type, ApiType::External);
    }
}
