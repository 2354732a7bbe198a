use std::collections::{BTreeMap, HashMap};

use serde_json::json;
use sqlx::SqliteConnection;
use tracing::{debug, info};

use crate::audit;
use crate::conversion::ConversionGraph;
use crate::db::rollback_quietly;
use crate::error::{CoreError, CoreResult};
use crate::model::{AuditLogEntryCreationInput, GroceryListItem, GroceryListItemStatus, MealPlan};
use crate::store::Store;

/// One ingredient requirement pulled out of a winning option's recipes,
/// already scaled by the option's meal scale and the component's recipe
/// scale.
#[derive(Debug, Clone, sqlx::FromRow)]
struct IngredientDemand {
    valid_ingredient: String,
    measurement_unit: String,
    minimum_quantity: f64,
    maximum_quantity: Option<f64>,
    meal_scale: f64,
    recipe_scale: f64,
}

#[derive(Debug, Clone, Default)]
struct Accumulated {
    minimum: f64,
    maximum: f64,
}

impl Store {
    /// Turn a finalized plan into grocery-list items, one per canonical
    /// `(ingredient, unit)` pair, summed across every winning option. Runs
    /// in one transaction together with the `grocery_list_initialized` flip;
    /// a plan whose list already exists is a no-op.
    pub async fn materialize_grocery_list(
        &self,
        plan_id: &str,
        household_id: &str,
    ) -> CoreResult<Vec<GroceryListItem>> {
        CoreError::require_id(plan_id)?;
        CoreError::require_id(household_id)?;

        let graph = ConversionGraph::load(self.pool()).await?;
        let now = self.now();
        let mut tx = self.pool().begin().await?;

        let plan = match fetch_finalized_plan(&mut tx, plan_id, household_id).await {
            Ok(plan) => plan,
            Err(err) => {
                rollback_quietly(tx).await;
                return Err(err);
            }
        };
        if plan.grocery_list_initialized {
            rollback_quietly(tx).await;
            debug!(
                target = "mealwise",
                event = "grocery_list_already_initialized",
                plan_id = %plan_id
            );
            return Ok(Vec::new());
        }

        let demand = match fetch_ingredient_demand(&mut tx, plan_id).await {
            Ok(demand) => demand,
            Err(err) => {
                rollback_quietly(tx).await;
                return Err(err);
            }
        };

        let canonical = match canonical_units(&mut tx, &demand).await {
            Ok(canonical) => canonical,
            Err(err) => {
                rollback_quietly(tx).await;
                return Err(err);
            }
        };

        let mut totals: BTreeMap<(String, String), Accumulated> = BTreeMap::new();
        for row in &demand {
            let unit = canonical
                .get(&row.valid_ingredient)
                .cloned()
                .unwrap_or_else(|| row.measurement_unit.clone());
            let scale = row.meal_scale * row.recipe_scale;
            let minimum = match graph.convert(
                row.minimum_quantity * scale,
                &row.measurement_unit,
                &unit,
                Some(&row.valid_ingredient),
            ) {
                Ok(qty) => qty,
                Err(err) => {
                    rollback_quietly(tx).await;
                    return Err(err);
                }
            };
            let raw_max = row.maximum_quantity.unwrap_or(row.minimum_quantity);
            let maximum = match graph.convert(
                raw_max * scale,
                &row.measurement_unit,
                &unit,
                Some(&row.valid_ingredient),
            ) {
                Ok(qty) => qty,
                Err(err) => {
                    rollback_quietly(tx).await;
                    return Err(err);
                }
            };
            let slot = totals
                .entry((row.valid_ingredient.clone(), unit))
                .or_default();
            slot.minimum += minimum;
            slot.maximum += maximum;
        }

        let mut items = Vec::with_capacity(totals.len());
        for ((ingredient, unit), needed) in totals {
            let item = GroceryListItem {
                id: self.new_id(),
                belongs_to_meal_plan: plan_id.to_string(),
                valid_ingredient: ingredient,
                valid_measurement_unit: unit,
                minimum_quantity_needed: needed.minimum,
                maximum_quantity_needed: Some(needed.maximum),
                quantity_purchased: None,
                purchased_measurement_unit: None,
                purchased_upc: None,
                purchase_price: None,
                status: GroceryListItemStatus::Needs,
                status_explanation: String::new(),
                created_at: now,
                last_updated_at: None,
                archived_at: None,
            };
            let res = sqlx::query(
                "INSERT INTO meal_plan_grocery_list_items \
                   (id, belongs_to_meal_plan, valid_ingredient, valid_measurement_unit, \
                    minimum_quantity_needed, maximum_quantity_needed, status, \
                    status_explanation, created_at) \
                 VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)",
            )
            .bind(&item.id)
            .bind(&item.belongs_to_meal_plan)
            .bind(&item.valid_ingredient)
            .bind(&item.valid_measurement_unit)
            .bind(item.minimum_quantity_needed)
            .bind(item.maximum_quantity_needed)
            .bind(item.status)
            .bind(&item.status_explanation)
            .bind(item.created_at)
            .execute(&mut *tx)
            .await;
            if let Err(err) = res {
                rollback_quietly(tx).await;
                return Err(err.into());
            }
            items.push(item);
        }

        // Concurrent materializers race on this flag; losing means someone
        // else already wrote the list.
        let res = sqlx::query(
            "UPDATE meal_plans \
             SET grocery_list_initialized = 1, last_updated_at = ? \
             WHERE id = ? AND grocery_list_initialized = 0",
        )
        .bind(now)
        .bind(plan_id)
        .execute(&mut *tx)
        .await;
        match res {
            Ok(done) if done.rows_affected() == 1 => {}
            Ok(_) => {
                rollback_quietly(tx).await;
                return Ok(Vec::new());
            }
            Err(err) => {
                rollback_quietly(tx).await;
                return Err(err.into());
            }
        }

        let audit_entry = AuditLogEntryCreationInput {
            id: self.new_id(),
            event_type: "grocery_list_initialized".into(),
            resource_type: "meal_plan".into(),
            relevant_id: plan_id.to_string(),
            changes: json!({ "item_count": items.len() }),
            belongs_to_user: plan.created_by_user.clone(),
            belongs_to_household: Some(household_id.to_string()),
        };
        if let Err(err) = audit::append(&mut tx, &audit_entry, now).await {
            rollback_quietly(tx).await;
            return Err(err);
        }

        tx.commit().await?;

        info!(
            target = "mealwise",
            event = "grocery_list_materialized",
            plan_id = %plan_id,
            item_count = items.len()
        );
        Ok(items)
    }

    pub async fn grocery_list_items_for_plan(
        &self,
        plan_id: &str,
    ) -> CoreResult<Vec<GroceryListItem>> {
        CoreError::require_id(plan_id)?;
        let items = sqlx::query_as::<_, GroceryListItem>(
            "SELECT * FROM meal_plan_grocery_list_items \
             WHERE belongs_to_meal_plan = ? AND archived_at IS NULL \
             ORDER BY valid_ingredient, valid_measurement_unit, id",
        )
        .bind(plan_id)
        .fetch_all(self.pool())
        .await?;
        Ok(items)
    }
}

async fn fetch_finalized_plan(
    conn: &mut SqliteConnection,
    plan_id: &str,
    household_id: &str,
) -> CoreResult<MealPlan> {
    let plan = sqlx::query_as::<_, MealPlan>(
        "SELECT * FROM meal_plans \
         WHERE id = ? AND belongs_to_household = ? \
           AND status = 'finalized' AND archived_at IS NULL",
    )
    .bind(plan_id)
    .bind(household_id)
    .fetch_optional(&mut *conn)
    .await?
    .ok_or(CoreError::NotFound)?;
    Ok(plan)
}

/// Walk winning options to their recipes' step ingredients. Step inputs
/// that are products of earlier steps have no valid ingredient and do not
/// appear on a shopping list.
async fn fetch_ingredient_demand(
    conn: &mut SqliteConnection,
    plan_id: &str,
) -> CoreResult<Vec<IngredientDemand>> {
    let demand = sqlx::query_as::<_, IngredientDemand>(
        "SELECT rsi.valid_ingredient, rsi.measurement_unit, \
                rsi.minimum_quantity, rsi.maximum_quantity, \
                o.meal_scale, mc.recipe_scale \
         FROM meal_plan_events e \
         JOIN meal_plan_options o \
           ON o.belongs_to_meal_plan_event = e.id \
          AND o.chosen = 1 AND o.archived_at IS NULL \
         JOIN meal_components mc \
           ON mc.belongs_to_meal = o.meal_id AND mc.archived_at IS NULL \
         JOIN recipes r ON r.id = mc.recipe_id AND r.archived_at IS NULL \
         JOIN recipe_steps rs \
           ON rs.belongs_to_recipe = r.id AND rs.archived_at IS NULL \
         JOIN recipe_step_ingredients rsi \
           ON rsi.belongs_to_recipe_step = rs.id AND rsi.archived_at IS NULL \
         WHERE e.belongs_to_meal_plan = ? AND e.archived_at IS NULL \
           AND rsi.valid_ingredient IS NOT NULL \
         ORDER BY e.starts_at, e.id, o.id, rs.step_index, rsi.id",
    )
    .bind(plan_id)
    .fetch_all(&mut *conn)
    .await?;
    Ok(demand)
}

/// Canonical unit per ingredient: the ingredient's preferred unit when one
/// is configured, otherwise the unit most often referenced by this plan's
/// demand (first-encountered wins a count tie).
async fn canonical_units(
    conn: &mut SqliteConnection,
    demand: &[IngredientDemand],
) -> CoreResult<HashMap<String, String>> {
    let mut usage: HashMap<&str, Vec<(String, usize)>> = HashMap::new();
    for row in demand {
        let units = usage.entry(row.valid_ingredient.as_str()).or_default();
        match units.iter_mut().find(|(unit, _)| *unit == row.measurement_unit) {
            Some((_, count)) => *count += 1,
            None => units.push((row.measurement_unit.clone(), 1)),
        }
    }

    let mut canonical = HashMap::with_capacity(usage.len());
    for (ingredient, units) in usage {
        let preferred: Option<String> = sqlx::query_scalar(
            "SELECT preferred_measurement_unit FROM valid_ingredients \
             WHERE id = ? AND archived_at IS NULL",
        )
        .bind(ingredient)
        .fetch_optional(&mut *conn)
        .await?
        .flatten();

        let unit = match preferred {
            Some(unit) => unit,
            None => {
                // First-encountered unit wins a count tie.
                let mut best: Option<(&str, usize)> = None;
                for (unit, count) in &units {
                    if best.map_or(true, |(_, top)| *count > top) {
                        best = Some((unit.as_str(), *count));
                    }
                }
                best.map(|(unit, _)| unit.to_string()).unwrap_or_default()
            }
        };
        canonical.insert(ingredient.to_string(), unit);
    }
    Ok(canonical)
}
