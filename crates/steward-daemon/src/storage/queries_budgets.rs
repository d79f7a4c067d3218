//! Database queries for budgets.

use steward_core::db::unix_timestamp;

use super::db::{Database, DatabaseError};
use super::models::{BudgetRow, ResetPeriod};

/// Parameters for inserting a budget.
#[derive(Debug, Clone)]
pub struct NewBudget<'a> {
    pub id: &'a str,
    pub project_path: Option<&'a str>,
    pub session_id: Option<&'a str>,
    pub limit_usd: f64,
    pub warning_threshold: f64,
    pub hard_stop_enabled: bool,
    pub reset_period: ResetPeriod,
}

impl Database {
    /// Create a new budget record.
    pub async fn insert_budget(&self, budget: &NewBudget<'_>) -> Result<BudgetRow, DatabaseError> {
        let now = unix_timestamp();

        sqlx::query(
            r"
            INSERT INTO budgets
                (id, project_path, session_id, limit_usd, spent_usd, warning_threshold,
                 hard_stop_enabled, reset_period, last_reset, created_at, updated_at)
            VALUES (?, ?, ?, ?, 0, ?, ?, ?, ?, ?, ?)
            ",
        )
        .bind(budget.id)
        .bind(budget.project_path)
        .bind(budget.session_id)
        .bind(budget.limit_usd)
        .bind(budget.warning_threshold)
        .bind(i64::from(budget.hard_stop_enabled))
        .bind(budget.reset_period.as_str())
        .bind(now)
        .bind(now)
        .bind(now)
        .execute(self.pool())
        .await?;

        self.get_budget(budget.id).await
    }

    /// Get a budget by ID.
    pub async fn get_budget(&self, id: &str) -> Result<BudgetRow, DatabaseError> {
        sqlx::query_as::<_, BudgetRow>("SELECT * FROM budgets WHERE id = ?")
            .bind(id)
            .fetch_optional(self.pool())
            .await?
            .ok_or_else(|| DatabaseError::NotFound(format!("Budget {id}")))
    }

    /// List all budgets, oldest first.
    pub async fn list_budgets(&self) -> Result<Vec<BudgetRow>, DatabaseError> {
        let rows = sqlx::query_as::<_, BudgetRow>("SELECT * FROM budgets ORDER BY created_at, id")
            .fetch_all(self.pool())
            .await?;

        Ok(rows)
    }

    /// Replace a budget's limit settings. Spend is left untouched.
    pub async fn update_budget_settings(
        &self,
        id: &str,
        limit_usd: f64,
        warning_threshold: f64,
        hard_stop_enabled: bool,
        reset_period: ResetPeriod,
    ) -> Result<BudgetRow, DatabaseError> {
        let now = unix_timestamp();

        let result = sqlx::query(
            r"
            UPDATE budgets
            SET limit_usd = ?, warning_threshold = ?, hard_stop_enabled = ?,
                reset_period = ?, updated_at = ?
            WHERE id = ?
            ",
        )
        .bind(limit_usd)
        .bind(warning_threshold)
        .bind(i64::from(hard_stop_enabled))
        .bind(reset_period.as_str())
        .bind(now)
        .bind(id)
        .execute(self.pool())
        .await?;

        if result.rows_affected() == 0 {
            return Err(DatabaseError::NotFound(format!("Budget {id}")));
        }
        self.get_budget(id).await
    }

    /// Set only the limit of a budget.
    pub async fn set_budget_limit(
        &self,
        id: &str,
        limit_usd: f64,
    ) -> Result<BudgetRow, DatabaseError> {
        let now = unix_timestamp();

        let result = sqlx::query("UPDATE budgets SET limit_usd = ?, updated_at = ? WHERE id = ?")
            .bind(limit_usd)
            .bind(now)
            .bind(id)
            .execute(self.pool())
            .await?;

        if result.rows_affected() == 0 {
            return Err(DatabaseError::NotFound(format!("Budget {id}")));
        }
        self.get_budget(id).await
    }

    /// Add spend to a budget. `amount` must be non-negative.
    pub async fn add_budget_spend(&self, id: &str, amount: f64) -> Result<BudgetRow, DatabaseError> {
        let now = unix_timestamp();

        let result =
            sqlx::query("UPDATE budgets SET spent_usd = spent_usd + ?, updated_at = ? WHERE id = ?")
                .bind(amount)
                .bind(now)
                .bind(id)
                .execute(self.pool())
                .await?;

        if result.rows_affected() == 0 {
            return Err(DatabaseError::NotFound(format!("Budget {id}")));
        }
        self.get_budget(id).await
    }

    /// Zero a budget's spend and stamp the reset time.
    pub async fn reset_budget_spend(&self, id: &str, at: i64) -> Result<BudgetRow, DatabaseError> {
        let result = sqlx::query(
            "UPDATE budgets SET spent_usd = 0, last_reset = ?, updated_at = ? WHERE id = ?",
        )
        .bind(at)
        .bind(at)
        .bind(id)
        .execute(self.pool())
        .await?;

        if result.rows_affected() == 0 {
            return Err(DatabaseError::NotFound(format!("Budget {id}")));
        }
        self.get_budget(id).await
    }

    /// Delete a budget. Returns whether a row was removed.
    pub async fn delete_budget(&self, id: &str) -> Result<bool, DatabaseError> {
        let result = sqlx::query("DELETE FROM budgets WHERE id = ?")
            .bind(id)
            .execute(self.pool())
            .await?;

        Ok(result.rows_affected() > 0)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn global(id: &str) -> NewBudget<'_> {
        NewBudget {
            id,
            project_path: None,
            session_id: None,
            limit_usd: 10.0,
            warning_threshold: 0.8,
            hard_stop_enabled: true,
            reset_period: ResetPeriod::None,
        }
    }

    #[tokio::test]
    async fn insert_and_get() {
        let db = Database::open_in_memory().await.unwrap();
        db.insert_budget(&global("b1")).await.unwrap();

        let found = db.get_budget("b1").await.unwrap();
        assert!(found.project_path.is_none());
        assert!(found.session_id.is_none());
        assert!(matches!(
            db.get_budget("missing").await,
            Err(DatabaseError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn scope_is_unique() {
        let db = Database::open_in_memory().await.unwrap();
        db.insert_budget(&global("b1")).await.unwrap();
        assert!(db.insert_budget(&global("b2")).await.is_err());
    }

    #[tokio::test]
    async fn spend_accumulates_and_resets() {
        let db = Database::open_in_memory().await.unwrap();
        db.insert_budget(&global("b1")).await.unwrap();

        db.add_budget_spend("b1", 1.5).await.unwrap();
        let row = db.add_budget_spend("b1", 2.0).await.unwrap();
        assert!((row.spent_usd - 3.5).abs() < f64::EPSILON);

        let row = db.reset_budget_spend("b1", 42).await.unwrap();
        assert!(row.spent_usd.abs() < f64::EPSILON);
        assert_eq!(row.last_reset, 42);
    }

    #[tokio::test]
    async fn missing_budget_is_not_found() {
        let db = Database::open_in_memory().await.unwrap();
        assert!(matches!(
            db.add_budget_spend("nope", 1.0).await,
            Err(DatabaseError::NotFound(_))
        ));
        assert!(!db.delete_budget("nope").await.unwrap());
    }
}
