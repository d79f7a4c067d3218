//! Database queries for approval policies.

use steward_core::db::unix_timestamp;

use super::db::{Database, DatabaseError};
use super::models::PolicyRow;

/// Parameters for inserting or replacing a policy.
#[derive(Debug, Clone)]
pub struct NewPolicy<'a> {
    pub id: &'a str,
    pub name: &'a str,
    pub description: Option<&'a str>,
    pub matcher: &'a str,
    pub action: &'a str,
    pub priority: i64,
    pub enabled: bool,
    /// JSON-encoded conditions, if any.
    pub conditions: Option<&'a str>,
}

impl Database {
    /// Create a new policy record.
    pub async fn insert_policy(&self, policy: &NewPolicy<'_>) -> Result<PolicyRow, DatabaseError> {
        let now = unix_timestamp();

        sqlx::query(
            r"
            INSERT INTO approval_policies
                (id, name, description, matcher, action, priority, enabled, conditions,
                 created_at, updated_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            ",
        )
        .bind(policy.id)
        .bind(policy.name)
        .bind(policy.description)
        .bind(policy.matcher)
        .bind(policy.action)
        .bind(policy.priority)
        .bind(i64::from(policy.enabled))
        .bind(policy.conditions)
        .bind(now)
        .bind(now)
        .execute(self.pool())
        .await?;

        self.get_policy(policy.id).await
    }

    /// Get a policy by ID.
    pub async fn get_policy(&self, id: &str) -> Result<PolicyRow, DatabaseError> {
        sqlx::query_as::<_, PolicyRow>("SELECT * FROM approval_policies WHERE id = ?")
            .bind(id)
            .fetch_optional(self.pool())
            .await?
            .ok_or_else(|| DatabaseError::NotFound(format!("Policy {id}")))
    }

    /// List all policies in evaluation order (priority descending, then
    /// insertion order).
    pub async fn list_policies(&self) -> Result<Vec<PolicyRow>, DatabaseError> {
        let rows = sqlx::query_as::<_, PolicyRow>(
            "SELECT * FROM approval_policies ORDER BY priority DESC, rowid ASC",
        )
        .fetch_all(self.pool())
        .await?;

        Ok(rows)
    }

    /// Replace every mutable field of a policy.
    pub async fn update_policy(&self, policy: &NewPolicy<'_>) -> Result<PolicyRow, DatabaseError> {
        let now = unix_timestamp();

        let result = sqlx::query(
            r"
            UPDATE approval_policies
            SET name = ?, description = ?, matcher = ?, action = ?, priority = ?,
                enabled = ?, conditions = ?, updated_at = ?
            WHERE id = ?
            ",
        )
        .bind(policy.name)
        .bind(policy.description)
        .bind(policy.matcher)
        .bind(policy.action)
        .bind(policy.priority)
        .bind(i64::from(policy.enabled))
        .bind(policy.conditions)
        .bind(now)
        .bind(policy.id)
        .execute(self.pool())
        .await?;

        if result.rows_affected() == 0 {
            return Err(DatabaseError::NotFound(format!("Policy {}", policy.id)));
        }
        self.get_policy(policy.id).await
    }

    /// Delete a policy. Returns whether a row was removed.
    pub async fn delete_policy(&self, id: &str) -> Result<bool, DatabaseError> {
        let result = sqlx::query("DELETE FROM approval_policies WHERE id = ?")
            .bind(id)
            .execute(self.pool())
            .await?;

        Ok(result.rows_affected() > 0)
    }
}
