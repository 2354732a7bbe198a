use serde_json::{Map, Value};
use sqlx::{sqlite::SqliteRow, Column, Row, SqlitePool, TypeInfo, ValueRef};

use crate::error::{CoreError, CoreResult};
use crate::filter::{FilteredResult, QueryFilter};

/// Tables reachable through the generic scoped-read path, with the scope
/// columns callers may filter them by and whether they carry `archived_at`.
struct ScopedTable {
    table: &'static str,
    scope_columns: &'static [&'static str],
    soft_deletable: bool,
}

const SCOPED_TABLES: &[ScopedTable] = &[
    ScopedTable {
        table: "audit_log_entries",
        scope_columns: &["belongs_to_user", "belongs_to_household"],
        soft_deletable: false,
    },
    ScopedTable {
        table: "service_setting_configurations",
        scope_columns: &["belongs_to_user", "belongs_to_household"],
        soft_deletable: true,
    },
    ScopedTable {
        table: "user_ingredient_preferences",
        scope_columns: &["belongs_to_user"],
        soft_deletable: true,
    },
    ScopedTable {
        table: "household_invitations",
        scope_columns: &["from_user", "to_user", "destination_household"],
        soft_deletable: true,
    },
    ScopedTable {
        table: "household_memberships",
        scope_columns: &["belongs_to_user", "belongs_to_household"],
        soft_deletable: true,
    },
    ScopedTable {
        table: "recipes",
        scope_columns: &["created_by_user"],
        soft_deletable: true,
    },
    ScopedTable {
        table: "recipe_ratings",
        scope_columns: &["by_user"],
        soft_deletable: true,
    },
    ScopedTable {
        table: "meals",
        scope_columns: &["created_by_user"],
        soft_deletable: true,
    },
    ScopedTable {
        table: "webhooks",
        scope_columns: &["belongs_to_household"],
        soft_deletable: true,
    },
    ScopedTable {
        table: "household_instrument_ownerships",
        scope_columns: &["belongs_to_household"],
        soft_deletable: true,
    },
    ScopedTable {
        table: "meal_plans",
        scope_columns: &["belongs_to_household"],
        soft_deletable: true,
    },
];

/// Tables the generic archive/restore path may touch.
const ARCHIVABLE_TABLES: &[&str] = &[
    "users",
    "households",
    "household_memberships",
    "valid_ingredients",
    "valid_measurement_units",
    "valid_instruments",
    "valid_preparations",
    "valid_vessels",
    "valid_ingredient_states",
    "valid_measurement_unit_conversions",
    "recipes",
    "recipe_steps",
    "recipe_step_ingredients",
    "recipe_step_products",
    "recipe_ratings",
    "meals",
    "meal_components",
    "meal_plan_grocery_list_items",
    "webhooks",
    "service_setting_configurations",
    "user_ingredient_preferences",
    "household_invitations",
    "household_instrument_ownerships",
    "oauth2_client_tokens",
];

fn scoped_table(table: &str, scope_col: &str) -> CoreResult<&'static ScopedTable> {
    SCOPED_TABLES
        .iter()
        .find(|t| t.table == table && t.scope_columns.contains(&scope_col))
        .ok_or_else(|| {
            CoreError::InvalidInput(format!("unsupported scoped read: {table}.{scope_col}"))
        })
}

fn ensure_archivable(table: &str) -> CoreResult<()> {
    if ARCHIVABLE_TABLES.contains(&table) {
        Ok(())
    } else {
        Err(CoreError::InvalidInput(format!(
            "table {table} is not archivable through the generic path"
        )))
    }
}

pub fn row_to_json(row: SqliteRow) -> Value {
    let mut map = Map::new();
    for col in row.columns() {
        let idx = col.ordinal();
        let v = row.try_get_raw(idx).ok();
        let val = match v {
            Some(raw) => {
                if raw.is_null() {
                    Value::Null
                } else {
                    match raw.type_info().name() {
                        "INTEGER" => row
                            .try_get::<i64, _>(idx)
                            .map(Value::from)
                            .unwrap_or(Value::Null),
                        "REAL" => row
                            .try_get::<f64, _>(idx)
                            .map(Value::from)
                            .unwrap_or(Value::Null),
                        _ => row
                            .try_get::<String, _>(idx)
                            .map(Value::from)
                            .unwrap_or(Value::Null),
                    }
                }
            }
            None => Value::Null,
        };
        map.insert(col.name().to_string(), val);
    }
    Value::Object(map)
}

/// Generic scoped list query. Both counts come back in the same statement
/// as the rows (window count for the filter, sub-select for the live total);
/// an empty page falls back to a dedicated count statement.
pub async fn list_scoped(
    pool: &SqlitePool,
    table: &str,
    scope_col: &str,
    scope_id: &str,
    filter: &QueryFilter,
) -> CoreResult<FilteredResult<Value>> {
    CoreError::require_id(scope_id)?;
    let scoped = scoped_table(table, scope_col)?;

    let archived_clause = if scoped.soft_deletable {
        "AND (t.archived_at IS NULL OR ? = 1)"
    } else {
        "AND (1 = 1 OR ? = 1)"
    };
    let total_where = if scoped.soft_deletable {
        "WHERE archived_at IS NULL"
    } else {
        ""
    };

    let sql = format!(
        "SELECT t.*, \
           COUNT(*) OVER () AS __filtered_count, \
           (SELECT COUNT(*) FROM {table} {total_where}) AS __total_count \
         FROM {table} t \
         WHERE t.{scope_col} = ? \
           {archived_clause} \
           AND (? IS NULL OR t.created_at > ?) \
           AND (? IS NULL OR t.created_at < ?) \
           AND (? IS NULL OR t.last_updated_at > ?) \
           AND (? IS NULL OR t.last_updated_at < ?) \
         ORDER BY t.created_at {order}, t.id {order} \
         LIMIT ? OFFSET ?",
        table = table,
        total_where = total_where,
        scope_col = scope_col,
        archived_clause = archived_clause,
        order = filter.sort_by.sql(),
    );

    let rows = sqlx::query(&sql)
        .bind(scope_id)
        .bind(filter.include_archived as i64)
        .bind(filter.created_after)
        .bind(filter.created_after)
        .bind(filter.created_before)
        .bind(filter.created_before)
        .bind(filter.updated_after)
        .bind(filter.updated_after)
        .bind(filter.updated_before)
        .bind(filter.updated_before)
        .bind(filter.limit())
        .bind(filter.offset())
        .fetch_all(pool)
        .await?;

    let mut filtered_count = 0i64;
    let mut total_count = 0i64;
    if let Some(first) = rows.first() {
        filtered_count = first.try_get("__filtered_count")?;
        total_count = first.try_get("__total_count")?;
    }

    let mut data: Vec<Value> = Vec::with_capacity(rows.len());
    for row in rows {
        let mut value = row_to_json(row);
        if let Value::Object(map) = &mut value {
            map.remove("__filtered_count");
            map.remove("__total_count");
        }
        data.push(value);
    }

    // A page past the end returns no rows; fetch the counts on their own.
    if data.is_empty() {
        let count_sql = format!(
            "SELECT \
               (SELECT COUNT(*) FROM {table} t \
                 WHERE t.{scope_col} = ? \
                   {archived_clause} \
                   AND (? IS NULL OR t.created_at > ?) \
                   AND (? IS NULL OR t.created_at < ?) \
                   AND (? IS NULL OR t.last_updated_at > ?) \
                   AND (? IS NULL OR t.last_updated_at < ?)) AS filtered_count, \
               (SELECT COUNT(*) FROM {table} {total_where}) AS total_count",
            table = table,
            scope_col = scope_col,
            archived_clause = archived_clause,
            total_where = total_where,
        );
        let row = sqlx::query(&count_sql)
            .bind(scope_id)
            .bind(filter.include_archived as i64)
            .bind(filter.created_after)
            .bind(filter.created_after)
            .bind(filter.created_before)
            .bind(filter.created_before)
            .bind(filter.updated_after)
            .bind(filter.updated_after)
            .bind(filter.updated_before)
            .bind(filter.updated_before)
            .fetch_one(pool)
            .await?;
        filtered_count = row.try_get("filtered_count")?;
        total_count = row.try_get("total_count")?;
    }

    Ok(FilteredResult {
        data,
        page: filter.page(),
        limit: filter.limit(),
        filtered_count,
        total_count,
    })
}

pub async fn get_by_id(pool: &SqlitePool, table: &str, id: &str) -> CoreResult<Value> {
    CoreError::require_id(id)?;
    ensure_archivable(table)?;
    let sql = format!("SELECT * FROM {table} WHERE id = ? AND archived_at IS NULL");
    let row = sqlx::query(&sql)
        .bind(id)
        .fetch_optional(pool)
        .await?
        .ok_or(CoreError::NotFound)?;
    Ok(row_to_json(row))
}

pub async fn exists(pool: &SqlitePool, table: &str, id: &str) -> CoreResult<bool> {
    CoreError::require_id(id)?;
    ensure_archivable(table)?;
    let sql = format!("SELECT 1 FROM {table} WHERE id = ? AND archived_at IS NULL");
    let found: Option<i64> = sqlx::query_scalar(&sql).bind(id).fetch_optional(pool).await?;
    Ok(found.is_some())
}

pub async fn set_archived_at(
    pool: &SqlitePool,
    table: &str,
    id: &str,
    now: i64,
) -> CoreResult<()> {
    CoreError::require_id(id)?;
    ensure_archivable(table)?;
    let sql = format!(
        "UPDATE {table} SET archived_at = ?, last_updated_at = ? \
         WHERE id = ? AND archived_at IS NULL"
    );
    let res = sqlx::query(&sql)
        .bind(now)
        .bind(now)
        .bind(id)
        .execute(pool)
        .await?;
    if res.rows_affected() == 0 {
        return Err(CoreError::NotFound);
    }
    Ok(())
}

pub async fn clear_archived_at(
    pool: &SqlitePool,
    table: &str,
    id: &str,
    now: i64,
) -> CoreResult<()> {
    CoreError::require_id(id)?;
    ensure_archivable(table)?;
    let sql = format!(
        "UPDATE {table} SET archived_at = NULL, last_updated_at = ? \
         WHERE id = ? AND archived_at IS NOT NULL"
    );
    let res = sqlx::query(&sql).bind(now).bind(id).execute(pool).await?;
    if res.rows_affected() == 0 {
        return Err(CoreError::NotFound);
    }
    Ok(())
}
