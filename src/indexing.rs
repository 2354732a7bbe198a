use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{CoreError, CoreResult};
use crate::store::Store;

/// Entities stale after this long count as needing a re-crawl.
const INDEX_STALENESS_MS: i64 = 24 * 60 * 60 * 1000;

/// Entity families mirrored into the external search index.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IndexableFamily {
    Recipes,
    ValidIngredients,
    ValidInstruments,
    ValidMeasurementUnits,
    ValidPreparations,
    ValidVessels,
    ValidIngredientStates,
}

impl IndexableFamily {
    pub const ALL: [IndexableFamily; 7] = [
        IndexableFamily::Recipes,
        IndexableFamily::ValidIngredients,
        IndexableFamily::ValidInstruments,
        IndexableFamily::ValidMeasurementUnits,
        IndexableFamily::ValidPreparations,
        IndexableFamily::ValidVessels,
        IndexableFamily::ValidIngredientStates,
    ];

    pub fn table(self) -> &'static str {
        match self {
            IndexableFamily::Recipes => "recipes",
            IndexableFamily::ValidIngredients => "valid_ingredients",
            IndexableFamily::ValidInstruments => "valid_instruments",
            IndexableFamily::ValidMeasurementUnits => "valid_measurement_units",
            IndexableFamily::ValidPreparations => "valid_preparations",
            IndexableFamily::ValidVessels => "valid_vessels",
            IndexableFamily::ValidIngredientStates => "valid_ingredient_states",
        }
    }
}

impl Store {
    /// Live rows that have never been indexed or whose last crawl is more
    /// than a day old. Unpaginated: the indexing worker drains the whole
    /// list in one pass.
    pub async fn ids_needing_indexing(
        &self,
        family: IndexableFamily,
    ) -> CoreResult<Vec<String>> {
        let cutoff = self.now() - INDEX_STALENESS_MS;
        let sql = format!(
            "SELECT id FROM {table} \
             WHERE archived_at IS NULL \
               AND (last_indexed_at IS NULL OR last_indexed_at < ?) \
             ORDER BY id",
            table = family.table(),
        );
        let ids: Vec<String> = sqlx::query_scalar(&sql)
            .bind(cutoff)
            .fetch_all(self.pool())
            .await?;
        Ok(ids)
    }

    /// Stamp one row as freshly indexed. Returns rows affected; a row
    /// archived since the crawl started simply matches nothing.
    pub async fn mark_as_indexed(&self, family: IndexableFamily, id: &str) -> CoreResult<u64> {
        CoreError::require_id(id)?;
        let sql = format!(
            "UPDATE {table} SET last_indexed_at = ? \
             WHERE id = ? AND archived_at IS NULL",
            table = family.table(),
        );
        let res = sqlx::query(&sql)
            .bind(self.now())
            .bind(id)
            .execute(self.pool())
            .await?;
        let affected = res.rows_affected();
        if affected == 0 {
            debug!(
                target = "mealwise",
                event = "index_mark_missed",
                family = ?family,
                id = %id
            );
        }
        Ok(affected)
    }
}
