use sqlx::{Sqlite, SqliteConnection, SqlitePool};
use tracing::info;

use crate::error::{CoreError, CoreResult};
use crate::filter::{FilteredResult, QueryFilter};
use crate::model::{AuditLogEntry, AuditLogEntryCreationInput};
use crate::repo;
use crate::store::Store;

/// Append one audit entry on the caller's connection. Callers recording a
/// mutation pass the transaction that carries the mutation so both commit
/// or roll back together; this function never opens its own transaction.
pub async fn append(
    conn: &mut SqliteConnection,
    entry: &AuditLogEntryCreationInput,
    created_at: i64,
) -> CoreResult<AuditLogEntry> {
    if entry.resource_type.trim().is_empty() || entry.event_type.trim().is_empty() {
        return Err(CoreError::NilInput);
    }
    CoreError::require_id(&entry.id)?;
    CoreError::require_id(&entry.belongs_to_user)?;

    let changes = serde_json::to_string(&entry.changes)?;

    sqlx::query::<Sqlite>(
        "INSERT INTO audit_log_entries \
           (id, created_at, event_type, resource_type, relevant_id, changes, \
            belongs_to_user, belongs_to_household) \
         VALUES (?, ?, ?, ?, ?, ?, ?, ?)",
    )
    .bind(&entry.id)
    .bind(created_at)
    .bind(&entry.event_type)
    .bind(&entry.resource_type)
    .bind(&entry.relevant_id)
    .bind(&changes)
    .bind(&entry.belongs_to_user)
    .bind(&entry.belongs_to_household)
    .execute(&mut *conn)
    .await?;

    info!(
        target = "mealwise",
        event = "audit_entry_appended",
        entry_id = %entry.id,
        resource_type = %entry.resource_type,
        event_type = %entry.event_type
    );

    Ok(AuditLogEntry {
        id: entry.id.clone(),
        created_at,
        event_type: entry.event_type.clone(),
        resource_type: entry.resource_type.clone(),
        relevant_id: entry.relevant_id.clone(),
        changes,
        belongs_to_user: entry.belongs_to_user.clone(),
        belongs_to_household: entry.belongs_to_household.clone(),
    })
}

pub async fn list_for_user(
    pool: &SqlitePool,
    user_id: &str,
    filter: &QueryFilter,
) -> CoreResult<FilteredResult<serde_json::Value>> {
    repo::list_scoped(pool, "audit_log_entries", "belongs_to_user", user_id, filter).await
}

pub async fn list_for_household(
    pool: &SqlitePool,
    household_id: &str,
    filter: &QueryFilter,
) -> CoreResult<FilteredResult<serde_json::Value>> {
    repo::list_scoped(
        pool,
        "audit_log_entries",
        "belongs_to_household",
        household_id,
        filter,
    )
    .await
}

impl Store {
    /// Convenience wrapper for callers already holding a transaction.
    pub async fn append_audit_entry(
        &self,
        conn: &mut SqliteConnection,
        entry: &AuditLogEntryCreationInput,
    ) -> CoreResult<AuditLogEntry> {
        append(conn, entry, self.now()).await
    }
}
