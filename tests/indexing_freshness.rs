mod util;

use anyhow::Result;

use mealwise::IndexableFamily;

use util::{memory_store, seed_ingredient, seed_unit, T0};

const DAY_MS: i64 = 24 * 60 * 60 * 1000;

#[tokio::test]
async fn never_indexed_rows_need_indexing() -> Result<()> {
    let (store, _clock) = memory_store().await?;
    seed_unit(store.pool(), "gram", true).await?;
    seed_unit(store.pool(), "cup", false).await?;

    let ids = store
        .ids_needing_indexing(IndexableFamily::ValidMeasurementUnits)
        .await?;
    assert_eq!(ids, vec!["cup".to_string(), "gram".to_string()]);
    Ok(())
}

#[tokio::test]
async fn marking_clears_until_the_staleness_window_lapses() -> Result<()> {
    let (store, clock) = memory_store().await?;
    seed_unit(store.pool(), "gram", true).await?;

    assert_eq!(
        store
            .mark_as_indexed(IndexableFamily::ValidMeasurementUnits, "gram")
            .await?,
        1
    );
    assert!(store
        .ids_needing_indexing(IndexableFamily::ValidMeasurementUnits)
        .await?
        .is_empty());

    // Just inside the window: still fresh.
    clock.advance(DAY_MS - 1);
    assert!(store
        .ids_needing_indexing(IndexableFamily::ValidMeasurementUnits)
        .await?
        .is_empty());

    // Past 24 hours the row is stale again.
    clock.advance(2);
    assert_eq!(
        store
            .ids_needing_indexing(IndexableFamily::ValidMeasurementUnits)
            .await?,
        vec!["gram".to_string()]
    );
    Ok(())
}

#[tokio::test]
async fn archived_rows_are_neither_listed_nor_marked() -> Result<()> {
    let (store, _clock) = memory_store().await?;
    seed_ingredient(store.pool(), "flour", None).await?;
    sqlx::query("UPDATE valid_ingredients SET archived_at = ? WHERE id = 'flour'")
        .bind(T0)
        .execute(store.pool())
        .await?;

    assert!(store
        .ids_needing_indexing(IndexableFamily::ValidIngredients)
        .await?
        .is_empty());
    // Matching nothing is not an error for the marker.
    assert_eq!(
        store
            .mark_as_indexed(IndexableFamily::ValidIngredients, "flour")
            .await?,
        0
    );
    Ok(())
}

#[tokio::test]
async fn families_are_tracked_independently() -> Result<()> {
    let (store, _clock) = memory_store().await?;
    seed_unit(store.pool(), "gram", true).await?;
    seed_ingredient(store.pool(), "flour", None).await?;

    store
        .mark_as_indexed(IndexableFamily::ValidMeasurementUnits, "gram")
        .await?;
    assert!(store
        .ids_needing_indexing(IndexableFamily::ValidMeasurementUnits)
        .await?
        .is_empty());
    assert_eq!(
        store
            .ids_needing_indexing(IndexableFamily::ValidIngredients)
            .await?,
        vec!["flour".to_string()]
    );
    Ok(())
}
