use std::collections::HashMap;

use futures::future::BoxFuture;
use futures::stream::{self, StreamExt};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sqlx::SqlitePool;
use tracing::info;

use crate::error::{CoreError, CoreResult};
use crate::filter::QueryFilter;
use crate::repo;
use crate::store::Store;

/// How many fan-out queries run at once during an aggregate.
const FAN_OUT_CONCURRENCY: usize = 8;

/// Everything the system knows about one user, across every scope that
/// owns data on their behalf. Per-household sections are keyed by
/// household ID.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UserDataCollection {
    pub user: Value,
    pub households: Vec<Value>,
    pub audit_log_entries: Vec<Value>,
    pub service_setting_configurations: Vec<Value>,
    pub user_ingredient_preferences: Vec<Value>,
    pub received_invites: Vec<Value>,
    pub sent_invites: Vec<Value>,
    pub recipes: Vec<Value>,
    pub recipe_ratings: Vec<Value>,
    pub meals: Vec<Value>,
    pub household_audit_log_entries: HashMap<String, Vec<Value>>,
    pub household_service_setting_configurations: HashMap<String, Vec<Value>>,
    pub household_webhooks: HashMap<String, Vec<Value>>,
    pub household_instrument_ownerships: HashMap<String, Vec<Value>>,
    pub household_meal_plans: HashMap<String, Vec<Value>>,
}

/// One completed fan-out fetch, tagged with where it lands in the
/// collection.
enum Fetched {
    AuditLogEntries(Vec<Value>),
    ServiceSettings(Vec<Value>),
    IngredientPreferences(Vec<Value>),
    ReceivedInvites(Vec<Value>),
    SentInvites(Vec<Value>),
    Recipes(Vec<Value>),
    RecipeRatings(Vec<Value>),
    Meals(Vec<Value>),
    HouseholdAuditLogEntries(String, Vec<Value>),
    HouseholdServiceSettings(String, Vec<Value>),
    HouseholdWebhooks(String, Vec<Value>),
    HouseholdInstrumentOwnerships(String, Vec<Value>),
    HouseholdMealPlans(String, Vec<Value>),
}

impl Store {
    /// Assemble a user's entire data footprint: their own records plus, per
    /// household they belong to, the household-scoped records. Fetches run
    /// concurrently with a bounded width; the first failure aborts the
    /// whole aggregate. Read-only, best-effort consistency.
    pub async fn aggregate_user_data(&self, user_id: &str) -> CoreResult<UserDataCollection> {
        CoreError::require_id(user_id)?;
        let pool = self.pool();

        let user = sqlx::query("SELECT * FROM users WHERE id = ?")
            .bind(user_id)
            .fetch_optional(pool)
            .await?
            .map(repo::row_to_json)
            .ok_or(CoreError::NotFound)?;

        // Household IDs drive the per-household fan-out, so they come first.
        let households = sqlx::query(
            "SELECT h.* FROM households h \
             JOIN household_memberships m ON m.belongs_to_household = h.id \
             WHERE m.belongs_to_user = ? AND m.archived_at IS NULL \
             ORDER BY h.created_at, h.id",
        )
        .bind(user_id)
        .fetch_all(pool)
        .await?
        .into_iter()
        .map(repo::row_to_json)
        .collect::<Vec<_>>();

        let household_ids: Vec<String> = households
            .iter()
            .filter_map(|h| h.get("id").and_then(Value::as_str).map(str::to_string))
            .collect();

        let mut fetches: Vec<BoxFuture<'_, CoreResult<Fetched>>> = vec![
            Box::pin(async move {
                fetch_all_scoped(pool, "audit_log_entries", "belongs_to_user", user_id)
                    .await
                    .map(Fetched::AuditLogEntries)
            }),
            Box::pin(async move {
                fetch_all_scoped(
                    pool,
                    "service_setting_configurations",
                    "belongs_to_user",
                    user_id,
                )
                .await
                .map(Fetched::ServiceSettings)
            }),
            Box::pin(async move {
                fetch_all_scoped(pool, "user_ingredient_preferences", "belongs_to_user", user_id)
                    .await
                    .map(Fetched::IngredientPreferences)
            }),
            Box::pin(async move {
                fetch_all_scoped(pool, "household_invitations", "to_user", user_id)
                    .await
                    .map(Fetched::ReceivedInvites)
            }),
            Box::pin(async move {
                fetch_all_scoped(pool, "household_invitations", "from_user", user_id)
                    .await
                    .map(Fetched::SentInvites)
            }),
            Box::pin(async move {
                fetch_all_scoped(pool, "recipes", "created_by_user", user_id)
                    .await
                    .map(Fetched::Recipes)
            }),
            Box::pin(async move {
                fetch_all_scoped(pool, "recipe_ratings", "by_user", user_id)
                    .await
                    .map(Fetched::RecipeRatings)
            }),
            Box::pin(async move {
                fetch_all_scoped(pool, "meals", "created_by_user", user_id)
                    .await
                    .map(Fetched::Meals)
            }),
        ];

        for household_id in &household_ids {
            let id = household_id.clone();
            fetches.push(Box::pin(async move {
                fetch_all_scoped(pool, "audit_log_entries", "belongs_to_household", &id)
                    .await
                    .map(|rows| Fetched::HouseholdAuditLogEntries(id.clone(), rows))
            }));
            let id = household_id.clone();
            fetches.push(Box::pin(async move {
                fetch_all_scoped(
                    pool,
                    "service_setting_configurations",
                    "belongs_to_household",
                    &id,
                )
                .await
                .map(|rows| Fetched::HouseholdServiceSettings(id.clone(), rows))
            }));
            let id = household_id.clone();
            fetches.push(Box::pin(async move {
                fetch_all_scoped(pool, "webhooks", "belongs_to_household", &id)
                    .await
                    .map(|rows| Fetched::HouseholdWebhooks(id.clone(), rows))
            }));
            let id = household_id.clone();
            fetches.push(Box::pin(async move {
                fetch_all_scoped(
                    pool,
                    "household_instrument_ownerships",
                    "belongs_to_household",
                    &id,
                )
                .await
                .map(|rows| Fetched::HouseholdInstrumentOwnerships(id.clone(), rows))
            }));
            let id = household_id.clone();
            fetches.push(Box::pin(async move {
                fetch_all_scoped(pool, "meal_plans", "belongs_to_household", &id)
                    .await
                    .map(|rows| Fetched::HouseholdMealPlans(id.clone(), rows))
            }));
        }

        let mut collection = UserDataCollection {
            user,
            households,
            ..UserDataCollection::default()
        };

        let mut results = stream::iter(fetches).buffer_unordered(FAN_OUT_CONCURRENCY);
        while let Some(fetched) = results.next().await {
            match fetched? {
                Fetched::AuditLogEntries(rows) => collection.audit_log_entries = rows,
                Fetched::ServiceSettings(rows) => {
                    collection.service_setting_configurations = rows
                }
                Fetched::IngredientPreferences(rows) => {
                    collection.user_ingredient_preferences = rows
                }
                Fetched::ReceivedInvites(rows) => collection.received_invites = rows,
                Fetched::SentInvites(rows) => collection.sent_invites = rows,
                Fetched::Recipes(rows) => collection.recipes = rows,
                Fetched::RecipeRatings(rows) => collection.recipe_ratings = rows,
                Fetched::Meals(rows) => collection.meals = rows,
                Fetched::HouseholdAuditLogEntries(id, rows) => {
                    collection.household_audit_log_entries.insert(id, rows);
                }
                Fetched::HouseholdServiceSettings(id, rows) => {
                    collection
                        .household_service_setting_configurations
                        .insert(id, rows);
                }
                Fetched::HouseholdWebhooks(id, rows) => {
                    collection.household_webhooks.insert(id, rows);
                }
                Fetched::HouseholdInstrumentOwnerships(id, rows) => {
                    collection.household_instrument_ownerships.insert(id, rows);
                }
                Fetched::HouseholdMealPlans(id, rows) => {
                    collection.household_meal_plans.insert(id, rows);
                }
            }
        }

        info!(
            target = "mealwise",
            event = "user_data_aggregated",
            user_id = %user_id,
            household_count = household_ids.len(),
            audit_entry_count = collection.audit_log_entries.len()
        );
        Ok(collection)
    }
}

/// Crawl every page of a scoped list, archived rows included, until the
/// running total covers the filtered count. Always returns a slice, empty
/// when nothing matches.
pub(crate) async fn fetch_all_scoped(
    pool: &SqlitePool,
    table: &str,
    scope_col: &str,
    scope_id: &str,
) -> CoreResult<Vec<Value>> {
    let mut filter = QueryFilter::everything();
    let mut rows = Vec::new();
    loop {
        let page = repo::list_scoped(pool, table, scope_col, scope_id, &filter).await?;
        if page.data.is_empty() {
            break;
        }
        rows.extend(page.data);
        if rows.len() as i64 >= page.filtered_count {
            break;
        }
        filter.page += 1;
    }
    Ok(rows)
}
