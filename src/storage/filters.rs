//! Filter, sort and pagination helpers shared by listing queries.
//!
//! Each helper is a no-op when its input is empty/None, so callers apply
//! them unconditionally in a fixed order: is → is-not → contains →
//! starts-with → ends-with → gte/lte → range.

use sea_query::{Expr, IntoColumnRef, Order, SelectStatement, SimpleExpr, Value};
use serde::Deserialize;

use super::{Result, StorageError};

/// `column IN (values)`.
pub fn filter_is<C, V>(stmt: &mut SelectStatement, column: C, values: &[V])
where
    C: IntoColumnRef,
    V: Clone + Into<Value>,
{
    if values.is_empty() {
        return;
    }
    stmt.and_where(Expr::col(column).is_in(values.iter().cloned().map(Into::<Value>::into)));
}

/// `column NOT IN (values)`.
pub fn filter_is_not<C, V>(stmt: &mut SelectStatement, column: C, values: &[V])
where
    C: IntoColumnRef,
    V: Clone + Into<Value>,
{
    if values.is_empty() {
        return;
    }
    stmt.and_where(Expr::col(column).is_not_in(values.iter().cloned().map(Into::<Value>::into)));
}

/// `column LIKE '%v%'` for every value.
pub fn filter_contains<C>(stmt: &mut SelectStatement, column: C, values: &[String])
where
    C: IntoColumnRef + Clone,
{
    for value in values {
        stmt.and_where(Expr::col(column.clone()).like(format!("%{}%", value)));
    }
}

/// `column LIKE 'v%'`.
pub fn filter_starts_with<C: IntoColumnRef>(
    stmt: &mut SelectStatement,
    column: C,
    value: Option<&str>,
) {
    if let Some(value) = value {
        stmt.and_where(Expr::col(column).like(format!("{}%", value)));
    }
}

/// `column LIKE '%v'`.
pub fn filter_ends_with<C: IntoColumnRef>(
    stmt: &mut SelectStatement,
    column: C,
    value: Option<&str>,
) {
    if let Some(value) = value {
        stmt.and_where(Expr::col(column).like(format!("%{}", value)));
    }
}

/// `column >= v`.
pub fn filter_gte<C: IntoColumnRef>(stmt: &mut SelectStatement, column: C, value: Option<i64>) {
    if let Some(value) = value {
        stmt.and_where(Expr::col(column).gte(value));
    }
}

/// `column <= v`.
pub fn filter_lte<C: IntoColumnRef>(stmt: &mut SelectStatement, column: C, value: Option<i64>) {
    if let Some(value) = value {
        stmt.and_where(Expr::col(column).lte(value));
    }
}

/// Boolean equality; `None` means no filter.
pub fn filter_bool<C: IntoColumnRef>(stmt: &mut SelectStatement, column: C, value: Option<bool>) {
    if let Some(value) = value {
        stmt.and_where(Expr::col(column).eq(value));
    }
}

/// Inclusive `BETWEEN start AND end`; both bounds are required.
pub fn filter_time_range<C: IntoColumnRef>(
    stmt: &mut SelectStatement,
    column: C,
    start: Option<&str>,
    end: Option<&str>,
) {
    if let (Some(start), Some(end)) = (start, end) {
        stmt.and_where(Expr::col(column).between(start, end));
    }
}

/// Sort direction, parsed case-insensitively.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum SortDir {
    #[default]
    Asc,
    Desc,
}

impl SortDir {
    pub fn parse(value: &str) -> Result<Self> {
        match value.to_ascii_lowercase().as_str() {
            "asc" | "ascending" => Ok(SortDir::Asc),
            "desc" | "descending" => Ok(SortDir::Desc),
            _ => Err(StorageError::InvalidSortDirection(value.to_string())),
        }
    }

    pub fn order(&self) -> Order {
        match self {
            SortDir::Asc => Order::Asc,
            SortDir::Desc => Order::Desc,
        }
    }
}

/// Resolve a sort key against a whitelist of `(key, column)` pairs.
pub fn sort_column<C: Copy>(whitelist: &[(&str, C)], key: &str) -> Result<C> {
    whitelist
        .iter()
        .find(|(k, _)| *k == key)
        .map(|(_, c)| *c)
        .ok_or_else(|| StorageError::UnknownSortKey(key.to_string()))
}

/// 1-based pagination.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Page {
    pub page: u64,
    pub page_size: u64,
}

impl Default for Page {
    fn default() -> Self {
        Self {
            page: 1,
            page_size: 50,
        }
    }
}

impl Page {
    pub fn new(page: u64, page_size: u64) -> Self {
        Self { page, page_size }
    }

    pub fn offset(&self) -> u64 {
        self.page.saturating_sub(1) * self.page_size
    }

    pub fn apply(&self, stmt: &mut SelectStatement) {
        stmt.offset(self.offset()).limit(self.page_size);
    }
}

/// `column = value` as a reusable expression.
pub fn eq<C: IntoColumnRef, V: Into<Value>>(column: C, value: V) -> SimpleExpr {
    Expr::col(column).eq(value.into())
}
