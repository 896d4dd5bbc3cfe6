//! Review proposals.

use sea_query::{Expr, Query, SqliteQueryBuilder};
use sqlx::{Row, SqlitePool};

use crate::storage::models::Review;
use crate::storage::schema::Reviews;
use crate::storage::{Result, StorageError};

/// Typed access to `reviews`.
pub struct ReviewsTable {
    pool: SqlitePool,
}

impl ReviewsTable {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub async fn create(&self, spec_key: &str, path_to_path_item: &str) -> Result<i64> {
        let query = Query::insert()
            .into_table(Reviews::Table)
            .columns([Reviews::Approved, Reviews::SpecKey, Reviews::PathToPathItemStr])
            .values_panic([false.into(), spec_key.into(), path_to_path_item.into()])
            .to_string(SqliteQueryBuilder);
        let result = sqlx::query(&query).execute(&self.pool).await?;
        Ok(result.last_insert_rowid())
    }

    pub async fn get(&self, id: i64) -> Result<Review> {
        let query = Query::select()
            .columns([
                Reviews::Id,
                Reviews::Approved,
                Reviews::SpecKey,
                Reviews::PathToPathItemStr,
            ])
            .from(Reviews::Table)
            .and_where(Expr::col(Reviews::Id).eq(id))
            .to_string(SqliteQueryBuilder);
        let row = sqlx::query(&query).fetch_one(&self.pool).await?;
        Ok(Review {
            id: row.get("id"),
            approved: row.get("approved"),
            spec_key: row.get("spec_key"),
            path_to_path_item_str: row.get("path_to_path_item_str"),
        })
    }

    pub async fn mark_approved(&self, id: i64) -> Result<()> {
        let query = Query::update()
            .table(Reviews::Table)
            .value(Reviews::Approved, true)
            .and_where(Expr::col(Reviews::Id).eq(id))
            .to_string(SqliteQueryBuilder);
        let result = sqlx::query(&query).execute(&self.pool).await?;
        if result.rows_affected() == 0 {
            return Err(StorageError::NotFound);
        }
        Ok(())
    }

    /// Sweep approved reviews; returns how many were removed.
    pub async fn delete_approved(&self) -> Result<u64> {
        let query = Query::delete()
            .from_table(Reviews::Table)
            .and_where(Expr::col(Reviews::Approved).eq(true))
            .to_string(SqliteQueryBuilder);
        let result = sqlx::query(&query).execute(&self.pool).await?;
        Ok(result.rows_affected())
    }
}

#[cfg(test)]
mod tests {
    use crate::storage::{Database, StorageError};

    #[tokio::test]
    async fn test_review_lifecycle() {
        let db = Database::in_memory().await.unwrap();
        let reviews = db.reviews();

        let kept = reviews.create("svc:80", "{}").await.unwrap();
        let approved = reviews.create("svc:80", "{}").await.unwrap();
        reviews.mark_approved(approved).await.unwrap();
        assert!(reviews.get(approved).await.unwrap().approved);

        assert_eq!(reviews.delete_approved().await.unwrap(), 1);
        assert!(!reviews.get(kept).await.unwrap().approved);
        assert!(matches!(
            reviews.get(approved).await,
            Err(StorageError::NotFound)
        ));
    }
}
