use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Wire values for plan status are identical in storage and API.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "snake_case")]
#[sqlx(rename_all = "snake_case")]
pub enum MealPlanStatus {
    AwaitingVotes,
    Finalized,
    Archived,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "snake_case")]
#[sqlx(rename_all = "snake_case")]
pub enum GroceryListItemStatus {
    Unknown,
    AlreadyOwned,
    Needs,
    Unavailable,
    Acquired,
    PartiallyAcquired,
    SubstitutionRequired,
    Substituted,
}

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Household {
    pub id: String,
    pub name: String,
    pub belongs_to_user: String,
    pub created_at: i64,
    pub last_updated_at: Option<i64>,
    pub archived_at: Option<i64>,
}

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct HouseholdMembership {
    pub id: String,
    pub belongs_to_household: String,
    pub belongs_to_user: String,
    pub default_household: bool,
    pub household_role: String,
    pub created_at: i64,
    pub last_updated_at: Option<i64>,
    pub archived_at: Option<i64>,
}

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct MealPlan {
    pub id: String,
    pub belongs_to_household: String,
    pub created_by_user: String,
    pub status: MealPlanStatus,
    pub notes: String,
    pub voting_deadline: i64,
    pub election_method: String,
    pub grocery_list_initialized: bool,
    pub tasks_created: bool,
    pub created_at: i64,
    pub last_updated_at: Option<i64>,
    pub archived_at: Option<i64>,
    #[sqlx(skip)]
    #[serde(default)]
    pub events: Vec<MealPlanEvent>,
}

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct MealPlanEvent {
    pub id: String,
    pub belongs_to_meal_plan: String,
    pub starts_at: i64,
    pub ends_at: i64,
    pub meal_name: String,
    pub notes: String,
    pub created_at: i64,
    pub last_updated_at: Option<i64>,
    pub archived_at: Option<i64>,
    #[sqlx(skip)]
    #[serde(default)]
    pub options: Vec<MealPlanOption>,
}

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct MealPlanOption {
    pub id: String,
    pub belongs_to_meal_plan_event: String,
    pub meal_id: String,
    pub meal_scale: f64,
    pub assigned_cook: Option<String>,
    pub assigned_dishwasher: Option<String>,
    pub notes: String,
    pub chosen: bool,
    pub tiebroken: bool,
    pub created_at: i64,
    pub last_updated_at: Option<i64>,
    pub archived_at: Option<i64>,
    #[sqlx(skip)]
    #[serde(default)]
    pub votes: Vec<MealPlanOptionVote>,
}

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct MealPlanOptionVote {
    pub id: String,
    pub belongs_to_meal_plan_option: String,
    pub by_user: String,
    pub rank: i64,
    pub abstain: bool,
    pub notes: String,
    pub created_at: i64,
    pub last_updated_at: Option<i64>,
    pub archived_at: Option<i64>,
}

/// One reminder-notification target: a member who has not voted on an
/// option.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MissingVote {
    pub event_id: String,
    pub option_id: String,
    pub user_id: String,
}

/// Grouped result for the weekly task scheduler.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FinalizedPlanResult {
    pub meal_plan_id: String,
    pub meal_plan_event_id: String,
    pub meal_plan_option_id: String,
    pub meal_id: String,
    pub recipe_ids: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct GroceryListItem {
    pub id: String,
    pub belongs_to_meal_plan: String,
    pub valid_ingredient: String,
    pub valid_measurement_unit: String,
    pub minimum_quantity_needed: f64,
    pub maximum_quantity_needed: Option<f64>,
    pub quantity_purchased: Option<f64>,
    pub purchased_measurement_unit: Option<String>,
    pub purchased_upc: Option<String>,
    pub purchase_price: Option<f64>,
    pub status: GroceryListItemStatus,
    pub status_explanation: String,
    pub created_at: i64,
    pub last_updated_at: Option<i64>,
    pub archived_at: Option<i64>,
}

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct AuditLogEntry {
    pub id: String,
    pub created_at: i64,
    pub event_type: String,
    pub resource_type: String,
    pub relevant_id: String,
    pub changes: String,
    pub belongs_to_user: String,
    pub belongs_to_household: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct ValidMeasurementUnit {
    pub id: String,
    pub name: String,
    pub plural_name: String,
    pub description: String,
    pub volumetric: bool,
    pub universal: bool,
    pub metric: bool,
    pub imperial: bool,
    pub last_indexed_at: Option<i64>,
    pub created_at: i64,
    pub last_updated_at: Option<i64>,
    pub archived_at: Option<i64>,
}

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct ValidIngredient {
    pub id: String,
    pub name: String,
    pub plural_name: String,
    pub description: String,
    pub warning: String,
    pub storage_instructions: String,
    pub is_liquid: bool,
    pub preferred_measurement_unit: Option<String>,
    pub last_indexed_at: Option<i64>,
    pub created_at: i64,
    pub last_updated_at: Option<i64>,
    pub archived_at: Option<i64>,
}

/// OAuth2 token record as returned to callers: secrets in plaintext,
/// expiries as both absolute instants and remaining durations.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OAuth2ClientToken {
    pub id: String,
    pub client_id: String,
    pub belongs_to_user: String,
    pub scope: String,
    pub code: String,
    pub access: String,
    pub refresh: String,
    pub redirect_uri: String,
    pub code_challenge: String,
    pub code_challenge_method: String,
    pub code_created_at: i64,
    pub access_created_at: i64,
    pub refresh_created_at: i64,
    pub code_expires_at: i64,
    pub access_expires_at: i64,
    pub refresh_expires_at: i64,
    /// Derived: `code_expires_at - code_created_at`, milliseconds.
    pub code_expires_in: i64,
    pub access_expires_in: i64,
    pub refresh_expires_in: i64,
    pub created_at: i64,
}

// ---------------------------------------------------------------------------
// Creation inputs. IDs are minted by the store's ID generator.
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MealPlanCreationInput {
    pub belongs_to_household: String,
    pub created_by_user: String,
    pub notes: String,
    pub voting_deadline: i64,
    pub events: Vec<MealPlanEventCreationInput>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MealPlanEventCreationInput {
    pub starts_at: i64,
    pub ends_at: i64,
    pub meal_name: String,
    pub notes: String,
    pub options: Vec<MealPlanOptionCreationInput>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MealPlanOptionCreationInput {
    pub meal_id: String,
    pub meal_scale: f64,
    pub assigned_cook: Option<String>,
    pub assigned_dishwasher: Option<String>,
    pub notes: String,
}

/// One ranked ballot line from a member; `rank` is ignored when `abstain`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VoteCreationInput {
    pub option_id: String,
    pub rank: i64,
    pub abstain: bool,
    pub notes: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditLogEntryCreationInput {
    pub id: String,
    pub event_type: String,
    pub resource_type: String,
    pub relevant_id: String,
    pub changes: Value,
    pub belongs_to_user: String,
    pub belongs_to_household: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OAuth2ClientTokenCreationInput {
    pub client_id: String,
    pub belongs_to_user: String,
    pub scope: String,
    pub code: String,
    pub access: String,
    pub refresh: String,
    pub redirect_uri: String,
    pub code_challenge: String,
    pub code_challenge_method: String,
    pub code_expires_at: i64,
    pub access_expires_at: i64,
    pub refresh_expires_at: i64,
}
