mod util;

use anyhow::Result;

use mealwise::model::{MealPlanStatus, VoteCreationInput};
use mealwise::CoreError;

use util::{memory_store, plan_input, seed_household_with_members, seed_meal, T0};

const HOUR_MS: i64 = 60 * 60 * 1000;

fn ballot(ranked: &[&str]) -> Vec<VoteCreationInput> {
    ranked
        .iter()
        .enumerate()
        .map(|(rank, option_id)| VoteCreationInput {
            option_id: option_id.to_string(),
            rank: rank as i64,
            abstain: false,
            notes: String::new(),
        })
        .collect()
}

#[tokio::test]
async fn single_option_plan_is_born_finalized() -> Result<()> {
    let (store, _clock) = memory_store().await?;
    seed_household_with_members(store.pool(), "h1", &["u1", "u2"]).await?;
    seed_meal(store.pool(), "meal-a", "u1", &[]).await?;

    let plan = store
        .create_meal_plan(&plan_input("h1", "u1", &["meal-a"], T0 + HOUR_MS))
        .await?;
    assert_eq!(plan.status, MealPlanStatus::Finalized);
    assert!(!plan.grocery_list_initialized);
    assert!(plan.events[0].options[0].chosen);

    let err = store.attempt_to_finalize(&plan.id, "h1").await.unwrap_err();
    assert!(matches!(err, CoreError::AlreadyFinalized));

    let reloaded = store.get_meal_plan(&plan.id, "h1").await?;
    assert_eq!(reloaded.status, MealPlanStatus::Finalized);
    assert!(!reloaded.grocery_list_initialized);
    Ok(())
}

#[tokio::test]
async fn majority_on_first_preferences_finalizes_without_tiebreak() -> Result<()> {
    let (store, _clock) = memory_store().await?;
    seed_household_with_members(store.pool(), "h1", &["u1", "u2", "u3"]).await?;
    seed_meal(store.pool(), "meal-a", "u1", &[]).await?;
    seed_meal(store.pool(), "meal-b", "u1", &[]).await?;

    let plan = store
        .create_meal_plan(&plan_input("h1", "u1", &["meal-a", "meal-b"], T0 + HOUR_MS))
        .await?;
    assert_eq!(plan.status, MealPlanStatus::AwaitingVotes);
    let event = &plan.events[0];
    let option_a = event.options[0].id.clone();
    let option_b = event.options[1].id.clone();

    store
        .create_meal_plan_votes(&plan.id, &event.id, "u1", &ballot(&[&option_a, &option_b]))
        .await?;
    store
        .create_meal_plan_votes(&plan.id, &event.id, "u2", &ballot(&[&option_a, &option_b]))
        .await?;
    let mid = store.get_meal_plan(&plan.id, "h1").await?;
    assert_eq!(mid.status, MealPlanStatus::AwaitingVotes);

    // The last ballot completes the electorate and triggers finalization.
    store
        .create_meal_plan_votes(&plan.id, &event.id, "u3", &ballot(&[&option_b, &option_a]))
        .await?;

    let done = store.get_meal_plan(&plan.id, "h1").await?;
    assert_eq!(done.status, MealPlanStatus::Finalized);
    let winner = done.events[0]
        .options
        .iter()
        .find(|o| o.chosen)
        .expect("an option should be chosen");
    assert_eq!(winner.id, option_a);
    assert!(!winner.tiebroken);
    Ok(())
}

#[tokio::test]
async fn dead_tie_breaks_toward_the_first_created_option() -> Result<()> {
    let (store, _clock) = memory_store().await?;
    seed_household_with_members(store.pool(), "h1", &["u1", "u2"]).await?;
    seed_meal(store.pool(), "meal-x", "u1", &[]).await?;
    seed_meal(store.pool(), "meal-y", "u1", &[]).await?;

    let plan = store
        .create_meal_plan(&plan_input("h1", "u1", &["meal-x", "meal-y"], T0 + HOUR_MS))
        .await?;
    let event = &plan.events[0];
    let option_x = event.options[0].id.clone();
    let option_y = event.options[1].id.clone();

    store
        .create_meal_plan_votes(&plan.id, &event.id, "u1", &ballot(&[&option_x]))
        .await?;
    store
        .create_meal_plan_votes(&plan.id, &event.id, "u2", &ballot(&[&option_y]))
        .await?;

    let done = store.get_meal_plan(&plan.id, "h1").await?;
    assert_eq!(done.status, MealPlanStatus::Finalized);
    let winner = done.events[0]
        .options
        .iter()
        .find(|o| o.chosen)
        .expect("an option should be chosen");
    assert_eq!(winner.id, option_x);
    assert!(winner.tiebroken);
    Ok(())
}

#[tokio::test]
async fn passed_deadline_finalizes_despite_a_missing_voter() -> Result<()> {
    let (store, clock) = memory_store().await?;
    seed_household_with_members(store.pool(), "h1", &["u1", "u2"]).await?;
    seed_meal(store.pool(), "meal-a", "u1", &[]).await?;
    seed_meal(store.pool(), "meal-b", "u1", &[]).await?;

    let plan = store
        .create_meal_plan(&plan_input("h1", "u1", &["meal-a", "meal-b"], T0 + HOUR_MS))
        .await?;
    let event = &plan.events[0];
    let option_a = event.options[0].id.clone();
    let option_b = event.options[1].id.clone();

    store
        .create_meal_plan_votes(&plan.id, &event.id, "u1", &ballot(&[&option_a, &option_b]))
        .await?;
    let waiting = store.get_meal_plan(&plan.id, "h1").await?;
    assert_eq!(waiting.status, MealPlanStatus::AwaitingVotes);

    clock.advance(2 * HOUR_MS);
    assert!(store.attempt_to_finalize(&plan.id, "h1").await?);

    let done = store.get_meal_plan(&plan.id, "h1").await?;
    assert_eq!(done.status, MealPlanStatus::Finalized);
    let winner = done.events[0]
        .options
        .iter()
        .find(|o| o.chosen)
        .expect("an option should be chosen");
    assert_eq!(winner.id, option_a);
    assert!(!winner.tiebroken);
    Ok(())
}

#[tokio::test]
async fn finalization_is_monotonic() -> Result<()> {
    let (store, _clock) = memory_store().await?;
    seed_household_with_members(store.pool(), "h1", &["u1"]).await?;
    seed_meal(store.pool(), "meal-a", "u1", &[]).await?;

    let plan = store
        .create_meal_plan(&plan_input("h1", "u1", &["meal-a"], T0 + HOUR_MS))
        .await?;
    for _ in 0..3 {
        let err = store.attempt_to_finalize(&plan.id, "h1").await.unwrap_err();
        assert!(matches!(err, CoreError::AlreadyFinalized));
        let reloaded = store.get_meal_plan(&plan.id, "h1").await?;
        assert_eq!(reloaded.status, MealPlanStatus::Finalized);
    }
    Ok(())
}

#[tokio::test]
async fn missing_votes_shrink_as_ballots_arrive() -> Result<()> {
    let (store, _clock) = memory_store().await?;
    seed_household_with_members(store.pool(), "h1", &["u1", "u2"]).await?;
    seed_meal(store.pool(), "meal-a", "u1", &[]).await?;
    seed_meal(store.pool(), "meal-b", "u1", &[]).await?;

    let plan = store
        .create_meal_plan(&plan_input("h1", "u1", &["meal-a", "meal-b"], T0 + HOUR_MS))
        .await?;
    let event = &plan.events[0];
    let option_a = event.options[0].id.clone();
    let option_b = event.options[1].id.clone();

    // Two options, two members, nobody has voted.
    let missing = store.fetch_missing_votes(&plan.id, "h1").await?;
    assert_eq!(missing.len(), 4);

    store
        .create_meal_plan_votes(&plan.id, &event.id, "u1", &ballot(&[&option_a, &option_b]))
        .await?;
    let missing = store.fetch_missing_votes(&plan.id, "h1").await?;
    assert_eq!(missing.len(), 2);
    assert!(missing.iter().all(|m| m.user_id == "u2"));

    store
        .create_meal_plan_votes(&plan.id, &event.id, "u2", &ballot(&[&option_b, &option_a]))
        .await?;
    let missing = store.fetch_missing_votes(&plan.id, "h1").await?;
    assert!(missing.is_empty());
    Ok(())
}

#[tokio::test]
async fn expired_voting_period_sweep_feeds_the_finalizer() -> Result<()> {
    let (store, clock) = memory_store().await?;
    seed_household_with_members(store.pool(), "h1", &["u1", "u2"]).await?;
    seed_meal(store.pool(), "meal-a", "u1", &[]).await?;
    seed_meal(store.pool(), "meal-b", "u1", &[]).await?;

    let plan = store
        .create_meal_plan(&plan_input("h1", "u1", &["meal-a", "meal-b"], T0 + HOUR_MS))
        .await?;
    assert!(store
        .unfinalized_plans_with_expired_voting_periods()
        .await?
        .is_empty());

    clock.advance(2 * HOUR_MS);
    let expired = store.unfinalized_plans_with_expired_voting_periods().await?;
    assert_eq!(expired.len(), 1);
    assert_eq!(expired[0].id, plan.id);

    assert!(store.attempt_to_finalize(&plan.id, "h1").await?);
    assert!(store
        .unfinalized_plans_with_expired_voting_periods()
        .await?
        .is_empty());
    Ok(())
}

#[tokio::test]
async fn archiving_hides_the_plan_from_reads() -> Result<()> {
    let (store, _clock) = memory_store().await?;
    seed_household_with_members(store.pool(), "h1", &["u1"]).await?;
    seed_meal(store.pool(), "meal-a", "u1", &[]).await?;

    let plan = store
        .create_meal_plan(&plan_input("h1", "u1", &["meal-a"], T0 + HOUR_MS))
        .await?;
    store.archive_meal_plan(&plan.id, "h1").await?;

    let err = store.get_meal_plan(&plan.id, "h1").await.unwrap_err();
    assert!(matches!(err, CoreError::NotFound));

    let (status, archived_at): (String, Option<i64>) =
        sqlx::query_as("SELECT status, archived_at FROM meal_plans WHERE id = ?")
            .bind(&plan.id)
            .fetch_one(store.pool())
            .await?;
    assert_eq!(status, "archived");
    assert!(archived_at.is_some());

    let err = store.archive_meal_plan(&plan.id, "h1").await.unwrap_err();
    assert!(matches!(err, CoreError::NotFound));
    Ok(())
}

#[tokio::test]
async fn creation_input_is_validated() -> Result<()> {
    let (store, _clock) = memory_store().await?;
    seed_household_with_members(store.pool(), "h1", &["u1"]).await?;
    seed_meal(store.pool(), "meal-a", "u1", &[]).await?;

    let mut no_events = plan_input("h1", "u1", &["meal-a"], T0 + HOUR_MS);
    no_events.events.clear();
    assert!(matches!(
        store.create_meal_plan(&no_events).await.unwrap_err(),
        CoreError::InvalidInput(_)
    ));

    let mut bad_scale = plan_input("h1", "u1", &["meal-a"], T0 + HOUR_MS);
    bad_scale.events[0].options[0].meal_scale = 0.0;
    assert!(matches!(
        store.create_meal_plan(&bad_scale).await.unwrap_err(),
        CoreError::InvalidInput(_)
    ));

    let mut inverted = plan_input("h1", "u1", &["meal-a"], T0 + HOUR_MS);
    inverted.events[0].ends_at = inverted.events[0].starts_at;
    assert!(matches!(
        store.create_meal_plan(&inverted).await.unwrap_err(),
        CoreError::InvalidInput(_)
    ));
    Ok(())
}

#[tokio::test]
async fn ranks_stay_a_prefix_across_separate_submissions() -> Result<()> {
    let (store, _clock) = memory_store().await?;
    seed_household_with_members(store.pool(), "h1", &["u1", "u2"]).await?;
    seed_meal(store.pool(), "meal-a", "u1", &[]).await?;
    seed_meal(store.pool(), "meal-b", "u1", &[]).await?;

    let plan = store
        .create_meal_plan(&plan_input("h1", "u1", &["meal-a", "meal-b"], T0 + HOUR_MS))
        .await?;
    let event = &plan.events[0];
    let option_a = event.options[0].id.clone();
    let option_b = event.options[1].id.clone();

    store
        .create_meal_plan_votes(&plan.id, &event.id, "u1", &ballot(&[&option_a]))
        .await?;

    // Repeating rank 0, on the same option or a different one, collides
    // with the vote already on record.
    let err = store
        .create_meal_plan_votes(&plan.id, &event.id, "u1", &ballot(&[&option_a]))
        .await
        .unwrap_err();
    assert!(matches!(err, CoreError::InvalidInput(_)));
    let err = store
        .create_meal_plan_votes(&plan.id, &event.id, "u1", &ballot(&[&option_b]))
        .await
        .unwrap_err();
    assert!(matches!(err, CoreError::InvalidInput(_)));

    let persisted: i64 = sqlx::query_scalar(
        "SELECT COUNT(*) FROM meal_plan_option_votes WHERE by_user = 'u1'",
    )
    .fetch_one(store.pool())
    .await?;
    assert_eq!(persisted, 1);

    // Extending the prefix is still allowed.
    let second = vec![VoteCreationInput {
        option_id: option_b.clone(),
        rank: 1,
        abstain: false,
        notes: String::new(),
    }];
    store
        .create_meal_plan_votes(&plan.id, &event.id, "u1", &second)
        .await?;
    Ok(())
}

#[tokio::test]
async fn next_week_results_group_recipes_per_winning_option() -> Result<()> {
    let (store, _clock) = memory_store().await?;
    seed_household_with_members(store.pool(), "h1", &["u1"]).await?;
    seed_meal(store.pool(), "meal-a", "u1", &[]).await?;

    // A second recipe on the same meal to observe grouping.
    sqlx::query("INSERT INTO recipes (id, name, created_by_user, created_at) VALUES (?, ?, ?, ?)")
        .bind("recipe-extra")
        .bind("recipe-extra")
        .bind("u1")
        .bind(T0)
        .execute(store.pool())
        .await?;
    sqlx::query(
        "INSERT INTO meal_components (id, belongs_to_meal, recipe_id, recipe_scale, created_at) \
         VALUES ('component-extra', 'meal-a', 'recipe-extra', 1, ?)",
    )
    .bind(T0)
    .execute(store.pool())
    .await?;

    let plan = store
        .create_meal_plan(&plan_input("h1", "u1", &["meal-a"], T0 + HOUR_MS))
        .await?;

    let results = store.finalized_plan_results_for_next_week().await?;
    assert_eq!(results.len(), 1);
    assert_eq!(results[0].meal_plan_id, plan.id);
    assert_eq!(results[0].meal_id, "meal-a");
    assert_eq!(results[0].recipe_ids.len(), 2);
    Ok(())
}
