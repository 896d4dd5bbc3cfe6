//! (api, trace source, component) sampling tuples.

use std::collections::{BTreeMap, HashSet};

use sea_query::{Expr, OnConflict, Order, Query, SelectStatement, SqliteQueryBuilder};
use sqlx::{Row, SqlitePool};

use crate::storage::models::TraceSampling as TraceSamplingRow;
use crate::storage::schema::{ApiInventory, TraceSampling};
use crate::storage::Result;

/// Component value that matches every component.
pub const WILDCARD_COMPONENT: &str = "*";

/// Host strings an agent should trace for one API.
///
/// `host:port` when the port is set; the bare host as well for port 0 or 80.
pub fn format_hosts(name: &str, port: i64) -> Vec<String> {
    let mut hosts = Vec::with_capacity(2);
    if port > 0 {
        hosts.push(format!("{name}:{port}"));
    }
    if port == 0 || port == 80 {
        hosts.push(name.to_string());
    }
    hosts
}

/// Typed access to `trace_sampling`.
pub struct TraceSamplingTable {
    pool: SqlitePool,
}

impl TraceSamplingTable {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub async fn add(&self, api_id: i64, trace_source_id: i64, component: &str) -> Result<()> {
        let query = Query::insert()
            .into_table(TraceSampling::Table)
            .columns([
                TraceSampling::ApiId,
                TraceSampling::TraceSourceId,
                TraceSampling::Component,
            ])
            .values_panic([api_id.into(), trace_source_id.into(), component.into()])
            .on_conflict(
                OnConflict::columns([
                    TraceSampling::ApiId,
                    TraceSampling::TraceSourceId,
                    TraceSampling::Component,
                ])
                .do_nothing()
                .to_owned(),
            )
            .to_string(SqliteQueryBuilder);
        sqlx::query(&query).execute(&self.pool).await?;
        Ok(())
    }

    pub async fn delete(&self, api_id: i64, trace_source_id: i64, component: &str) -> Result<()> {
        let query = Query::delete()
            .from_table(TraceSampling::Table)
            .and_where(Expr::col(TraceSampling::ApiId).eq(api_id))
            .and_where(Expr::col(TraceSampling::TraceSourceId).eq(trace_source_id))
            .and_where(Expr::col(TraceSampling::Component).eq(component))
            .to_string(SqliteQueryBuilder);
        sqlx::query(&query).execute(&self.pool).await?;
        Ok(())
    }

    /// Remove every tuple of `component`, across all sources.
    pub async fn delete_by_component(&self, component: &str) -> Result<()> {
        let query = Query::delete()
            .from_table(TraceSampling::Table)
            .and_where(Expr::col(TraceSampling::Component).eq(component))
            .to_string(SqliteQueryBuilder);
        sqlx::query(&query).execute(&self.pool).await?;
        Ok(())
    }

    pub async fn delete_all(&self) -> Result<()> {
        let query = Query::delete()
            .from_table(TraceSampling::Table)
            .to_string(SqliteQueryBuilder);
        sqlx::query(&query).execute(&self.pool).await?;
        Ok(())
    }

    pub async fn list(&self) -> Result<Vec<TraceSamplingRow>> {
        let query = Query::select()
            .columns([
                TraceSampling::ApiId,
                TraceSampling::TraceSourceId,
                TraceSampling::Component,
            ])
            .from(TraceSampling::Table)
            .order_by(TraceSampling::ApiId, Order::Asc)
            .to_string(SqliteQueryBuilder);
        let rows = sqlx::query(&query).fetch_all(&self.pool).await?;
        Ok(rows
            .iter()
            .map(|row| TraceSamplingRow {
                api_id: row.get("api_id"),
                trace_source_id: row.get("trace_source_id"),
                component: row.get("component"),
            })
            .collect())
    }

    /// Hosts per trace source that `component` (or the wildcard) samples.
    pub async fn hosts_by_component(&self, component: &str) -> Result<BTreeMap<i64, Vec<String>>> {
        let query = Self::hosts_query(component).to_string(SqliteQueryBuilder);
        let rows = sqlx::query(&query).fetch_all(&self.pool).await?;

        let mut seen: HashSet<(i64, String)> = HashSet::new();
        let mut hosts: BTreeMap<i64, Vec<String>> = BTreeMap::new();
        for row in rows {
            let source: i64 = row.get("trace_source_id");
            let name: String = row.get("name");
            let port: i64 = row.get("port");
            for host in format_hosts(&name, port) {
                if seen.insert((source, host.clone())) {
                    hosts.entry(source).or_default().push(host);
                }
            }
        }
        Ok(hosts)
    }

    /// Hosts from one trace source that `component` (or the wildcard) samples.
    pub async fn hosts_by_trace_source(
        &self,
        component: &str,
        trace_source_id: i64,
    ) -> Result<Vec<String>> {
        let query = Self::hosts_query(component)
            .and_where(Expr::col((TraceSampling::Table, TraceSampling::TraceSourceId)).eq(trace_source_id))
            .to_string(SqliteQueryBuilder);
        let rows = sqlx::query(&query).fetch_all(&self.pool).await?;

        let mut seen = HashSet::new();
        let mut hosts = Vec::new();
        for row in rows {
            let name: String = row.get("name");
            let port: i64 = row.get("port");
            for host in format_hosts(&name, port) {
                if seen.insert(host.clone()) {
                    hosts.push(host);
                }
            }
        }
        Ok(hosts)
    }

    fn hosts_query(component: &str) -> SelectStatement {
        Query::select()
            .column((ApiInventory::Table, ApiInventory::Name))
            .column((ApiInventory::Table, ApiInventory::Port))
            .column((TraceSampling::Table, TraceSampling::TraceSourceId))
            .from(TraceSampling::Table)
            .inner_join(
                ApiInventory::Table,
                Expr::col((ApiInventory::Table, ApiInventory::Id))
                    .equals((TraceSampling::Table, TraceSampling::ApiId)),
            )
            .and_where(
                Expr::col((TraceSampling::Table, TraceSampling::Component))
                    .is_in([component.to_string(), WILDCARD_COMPONENT.to_string()]),
            )
            .order_by((ApiInventory::Table, ApiInventory::Id), Order::Asc)
            .to_owned()
    }
}
