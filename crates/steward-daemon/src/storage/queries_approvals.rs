//! Database queries for the approval queue.

use steward_core::db::unix_timestamp;

use super::db::{Database, DatabaseError};
use super::models::{ApprovalItemRow, ApprovalStatus, DecidedBy};

impl Database {
    /// Create a pending approval item.
    pub async fn insert_approval_item(
        &self,
        id: &str,
        session_id: &str,
        request_type: &str,
        request_details: &str,
        policy_id: Option<&str>,
    ) -> Result<ApprovalItemRow, DatabaseError> {
        let now = unix_timestamp();

        sqlx::query(
            r"
            INSERT INTO approval_queue
                (id, session_id, request_type, request_details, status, policy_id, created_at)
            VALUES (?, ?, ?, ?, 'pending', ?, ?)
            ",
        )
        .bind(id)
        .bind(session_id)
        .bind(request_type)
        .bind(request_details)
        .bind(policy_id)
        .bind(now)
        .execute(self.pool())
        .await?;

        self.get_approval_item(id).await
    }

    /// Get an approval item by ID.
    pub async fn get_approval_item(&self, id: &str) -> Result<ApprovalItemRow, DatabaseError> {
        sqlx::query_as::<_, ApprovalItemRow>("SELECT * FROM approval_queue WHERE id = ?")
            .bind(id)
            .fetch_optional(self.pool())
            .await?
            .ok_or_else(|| DatabaseError::NotFound(format!("Approval item {id}")))
    }

    /// List approval items, optionally filtered by status and session.
    pub async fn list_approval_items(
        &self,
        status: Option<ApprovalStatus>,
        session_id: Option<&str>,
    ) -> Result<Vec<ApprovalItemRow>, DatabaseError> {
        let rows = sqlx::query_as::<_, ApprovalItemRow>(
            r"
            SELECT * FROM approval_queue
            WHERE (?1 IS NULL OR status = ?1) AND (?2 IS NULL OR session_id = ?2)
            ORDER BY created_at ASC, rowid ASC
            ",
        )
        .bind(status.map(|s| s.as_str()))
        .bind(session_id)
        .fetch_all(self.pool())
        .await?;

        Ok(rows)
    }

    /// Move a pending item to a terminal status.
    ///
    /// Returns `false` without touching the row if the item is no longer
    /// pending.
    pub async fn decide_approval_item(
        &self,
        id: &str,
        status: ApprovalStatus,
        decided_by: DecidedBy,
    ) -> Result<bool, DatabaseError> {
        let now = unix_timestamp();

        let result = sqlx::query(
            r"
            UPDATE approval_queue
            SET status = ?, decided_by = ?, decided_at = ?
            WHERE id = ? AND status = 'pending'
            ",
        )
        .bind(status.as_str())
        .bind(decided_by.as_str())
        .bind(now)
        .bind(id)
        .execute(self.pool())
        .await?;

        Ok(result.rows_affected() > 0)
    }

    /// Expire every pending item created at or before `cutoff`.
    ///
    /// Returns the IDs of the items that were expired.
    pub async fn expire_pending_before(&self, cutoff: i64) -> Result<Vec<String>, DatabaseError> {
        let now = unix_timestamp();

        let ids: Vec<String> = sqlx::query_scalar(
            r"
            UPDATE approval_queue
            SET status = 'expired', decided_by = 'system', decided_at = ?
            WHERE status = 'pending' AND created_at <= ?
            RETURNING id
            ",
        )
        .bind(now)
        .bind(cutoff)
        .fetch_all(self.pool())
        .await?;

        Ok(ids)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn second_decision_does_not_touch_row() {
        let db = Database::open_in_memory().await.unwrap();
        db.insert_approval_item("a1", "s1", "tool_use", "{}", None)
            .await
            .unwrap();

        assert!(
            db.decide_approval_item("a1", ApprovalStatus::Approved, DecidedBy::User)
                .await
                .unwrap()
        );
        assert!(
            !db.decide_approval_item("a1", ApprovalStatus::Denied, DecidedBy::Policy)
                .await
                .unwrap()
        );

        let row = db.get_approval_item("a1").await.unwrap();
        assert_eq!(row.status, "approved");
        assert_eq!(row.decided_by.as_deref(), Some("user"));
    }

    #[tokio::test]
    async fn filters_by_status_and_session() {
        let db = Database::open_in_memory().await.unwrap();
        db.insert_approval_item("a1", "s1", "tool_use", "{}", None)
            .await
            .unwrap();
        db.insert_approval_item("a2", "s2", "tool_use", "{}", None)
            .await
            .unwrap();
        db.decide_approval_item("a2", ApprovalStatus::Denied, DecidedBy::User)
            .await
            .unwrap();

        let pending = db
            .list_approval_items(Some(ApprovalStatus::Pending), None)
            .await
            .unwrap();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].id, "a1");

        let s2 = db.list_approval_items(None, Some("s2")).await.unwrap();
        assert_eq!(s2.len(), 1);
        assert_eq!(s2[0].status, "denied");
    }

    #[tokio::test]
    async fn expiry_only_touches_pending() {
        let db = Database::open_in_memory().await.unwrap();
        db.insert_approval_item("a1", "s1", "tool_use", "{}", None)
            .await
            .unwrap();
        db.insert_approval_item("a2", "s1", "tool_use", "{}", None)
            .await
            .unwrap();
        db.decide_approval_item("a2", ApprovalStatus::Approved, DecidedBy::User)
            .await
            .unwrap();

        let expired = db.expire_pending_before(unix_timestamp()).await.unwrap();
        assert_eq!(expired, vec!["a1".to_string()]);
        assert_eq!(db.get_approval_item("a2").await.unwrap().status, "approved");
    }
}
