//! SQLite table handles.

mod annotations;
mod api_events;
mod api_inventory;
mod labels;
mod reviews;
mod trace_sampling;
mod trace_sources;

pub use annotations::{ApiAnnotationsTable, EventAnnotationsTable};
pub use api_events::{
    ApiEventsFilter, ApiEventsQuery, ApiEventsTable, ApiUsageKind, ApiUsagePoint,
    ApprovedPathItem, HostGroup, USAGE_BUCKETS,
};
pub use api_inventory::{ApiInventoryFilter, ApiInventoryTable};
pub use labels::LabelsTable;
pub use reviews::ReviewsTable;
pub use trace_sampling::{format_hosts, TraceSamplingTable, WILDCARD_COMPONENT};
pub use trace_sources::{generate_token, TraceSourcesTable, EXTERNAL_TRACE_SOURCE_NAME};

use sqlx::SqliteConnection;

use super::Result;

/// Run `body` inside `BEGIN IMMEDIATE`, committing on success.
///
/// IMMEDIATE takes the write lock upfront so concurrent writers queue on
/// `busy_timeout` instead of failing to upgrade a shared lock.
pub(crate) async fn in_immediate_tx<T, F>(conn: &mut SqliteConnection, body: F) -> Result<T>
where
    F: for<'c> FnOnce(
        &'c mut SqliteConnection,
    ) -> futures::future::BoxFuture<'c, Result<T>>,
{
    sqlx::query("BEGIN IMMEDIATE").execute(&mut *conn).await?;
    match body(&mut *conn).await {
        Ok(value) => {
            sqlx::query("COMMIT").execute(&mut *conn).await?;
            Ok(value)
        }
        Err(e) => {
            let _ = sqlx::query("ROLLBACK").execute(&mut *conn).await;
            Err(e)
        }
    }
}
