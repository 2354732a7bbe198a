#![allow(dead_code)]

use std::str::FromStr;
use std::sync::Arc;

use anyhow::Result;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::SqlitePool;

use mealwise::id::SequentialIdGenerator;
use mealwise::migrate::apply_migrations;
use mealwise::model::{
    MealPlanCreationInput, MealPlanEventCreationInput, MealPlanOptionCreationInput,
};
use mealwise::time::FixedClock;
use mealwise::Store;

/// A fixed instant the deterministic clock starts from.
pub const T0: i64 = 1_700_000_000_000;

/// Route crate logs through the test harness when `RUST_LOG` asks for them.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

pub async fn memory_pool() -> Result<SqlitePool> {
    init_tracing();
    let opts = SqliteConnectOptions::from_str("sqlite::memory:")?.foreign_keys(true);
    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .connect_with(opts)
        .await?;
    apply_migrations(&pool).await?;
    Ok(pool)
}

/// Store over an in-memory database with a deterministic clock and
/// sequential IDs.
pub async fn memory_store() -> Result<(Store, Arc<FixedClock>)> {
    let pool = memory_pool().await?;
    let clock = Arc::new(FixedClock::at(T0));
    let ids = Arc::new(SequentialIdGenerator::new("id"));
    let store = Store::new(pool, clock.clone(), ids);
    Ok((store, clock))
}

pub async fn seed_user(pool: &SqlitePool, id: &str) -> Result<()> {
    sqlx::query("INSERT INTO users (id, username, created_at) VALUES (?, ?, ?)")
        .bind(id)
        .bind(id)
        .bind(T0)
        .execute(pool)
        .await?;
    Ok(())
}

pub async fn seed_household(pool: &SqlitePool, id: &str, owner: &str) -> Result<()> {
    sqlx::query("INSERT INTO households (id, name, belongs_to_user, created_at) VALUES (?, ?, ?, ?)")
        .bind(id)
        .bind(id)
        .bind(owner)
        .bind(T0)
        .execute(pool)
        .await?;
    Ok(())
}

pub async fn seed_membership(pool: &SqlitePool, household: &str, user: &str) -> Result<()> {
    sqlx::query(
        "INSERT INTO household_memberships \
           (id, belongs_to_household, belongs_to_user, created_at) \
         VALUES (?, ?, ?, ?)",
    )
    .bind(format!("membership-{household}-{user}"))
    .bind(household)
    .bind(user)
    .bind(T0)
    .execute(pool)
    .await?;
    Ok(())
}

/// A household with the given members, owned by the first.
pub async fn seed_household_with_members(
    pool: &SqlitePool,
    household: &str,
    members: &[&str],
) -> Result<()> {
    for member in members {
        seed_user(pool, member).await?;
    }
    seed_household(pool, household, members[0]).await?;
    for member in members {
        seed_membership(pool, household, member).await?;
    }
    Ok(())
}

pub async fn seed_unit(pool: &SqlitePool, id: &str, universal: bool) -> Result<()> {
    sqlx::query(
        "INSERT INTO valid_measurement_units (id, name, universal, created_at) VALUES (?, ?, ?, ?)",
    )
    .bind(id)
    .bind(id)
    .bind(universal)
    .bind(T0)
    .execute(pool)
    .await?;
    Ok(())
}

pub async fn seed_ingredient(
    pool: &SqlitePool,
    id: &str,
    preferred_unit: Option<&str>,
) -> Result<()> {
    sqlx::query(
        "INSERT INTO valid_ingredients (id, name, preferred_measurement_unit, created_at) \
         VALUES (?, ?, ?, ?)",
    )
    .bind(id)
    .bind(id)
    .bind(preferred_unit)
    .bind(T0)
    .execute(pool)
    .await?;
    Ok(())
}

pub async fn seed_conversion(
    pool: &SqlitePool,
    id: &str,
    from_unit: &str,
    to_unit: &str,
    modifier: f64,
    only_for_ingredient: Option<&str>,
) -> Result<()> {
    sqlx::query(
        "INSERT INTO valid_measurement_unit_conversions \
           (id, from_unit, to_unit, only_for_ingredient, modifier, created_at) \
         VALUES (?, ?, ?, ?, ?, ?)",
    )
    .bind(id)
    .bind(from_unit)
    .bind(to_unit)
    .bind(only_for_ingredient)
    .bind(modifier)
    .bind(T0)
    .execute(pool)
    .await?;
    Ok(())
}

/// A meal backed by a one-step recipe using the given ingredient lines.
/// Each line is `(ingredient, unit, minimum, maximum)`.
pub async fn seed_meal(
    pool: &SqlitePool,
    meal_id: &str,
    created_by: &str,
    lines: &[(&str, &str, f64, Option<f64>)],
) -> Result<()> {
    let recipe_id = format!("recipe-{meal_id}");
    sqlx::query("INSERT INTO recipes (id, name, created_by_user, created_at) VALUES (?, ?, ?, ?)")
        .bind(&recipe_id)
        .bind(&recipe_id)
        .bind(created_by)
        .bind(T0)
        .execute(pool)
        .await?;

    let step_id = format!("step-{meal_id}");
    sqlx::query(
        "INSERT INTO recipe_steps (id, belongs_to_recipe, step_index, created_at) \
         VALUES (?, ?, 0, ?)",
    )
    .bind(&step_id)
    .bind(&recipe_id)
    .bind(T0)
    .execute(pool)
    .await?;

    for (n, (ingredient, unit, minimum, maximum)) in lines.iter().enumerate() {
        sqlx::query(
            "INSERT INTO recipe_step_ingredients \
               (id, belongs_to_recipe_step, valid_ingredient, measurement_unit, \
                minimum_quantity, maximum_quantity, created_at) \
             VALUES (?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(format!("rsi-{meal_id}-{n}"))
        .bind(&step_id)
        .bind(ingredient)
        .bind(unit)
        .bind(minimum)
        .bind(maximum)
        .bind(T0)
        .execute(pool)
        .await?;
    }

    sqlx::query("INSERT INTO meals (id, name, created_by_user, created_at) VALUES (?, ?, ?, ?)")
        .bind(meal_id)
        .bind(meal_id)
        .bind(created_by)
        .bind(T0)
        .execute(pool)
        .await?;
    sqlx::query(
        "INSERT INTO meal_components (id, belongs_to_meal, recipe_id, recipe_scale, created_at) \
         VALUES (?, ?, ?, 1, ?)",
    )
    .bind(format!("component-{meal_id}"))
    .bind(meal_id)
    .bind(&recipe_id)
    .bind(T0)
    .execute(pool)
    .await?;
    Ok(())
}

/// A one-event plan offering the given meals as options, due at `deadline`.
pub fn plan_input(
    household: &str,
    creator: &str,
    meal_ids: &[&str],
    deadline: i64,
) -> MealPlanCreationInput {
    MealPlanCreationInput {
        belongs_to_household: household.to_string(),
        created_by_user: creator.to_string(),
        notes: String::new(),
        voting_deadline: deadline,
        events: vec![MealPlanEventCreationInput {
            starts_at: T0 + 60_000,
            ends_at: T0 + 120_000,
            meal_name: "dinner".into(),
            notes: String::new(),
            options: meal_ids
                .iter()
                .map(|meal_id| MealPlanOptionCreationInput {
                    meal_id: meal_id.to_string(),
                    meal_scale: 1.0,
                    assigned_cook: None,
                    assigned_dishwasher: None,
                    notes: String::new(),
                })
                .collect(),
        }],
    }
}
