use std::collections::{BTreeSet, HashMap};

use serde_json::json;
use sqlx::SqliteConnection;
use tracing::info;

use crate::audit;
use crate::db::rollback_quietly;
use crate::error::{CoreError, CoreResult};
use crate::model::{
    AuditLogEntryCreationInput, FinalizedPlanResult, MealPlan, MealPlanCreationInput,
    MealPlanEvent, MealPlanOption, MealPlanOptionVote, MealPlanStatus, MissingVote,
    VoteCreationInput,
};
use crate::store::Store;

const SEVEN_DAYS_MS: i64 = 7 * 24 * 60 * 60 * 1000;

/// Outcome of an instant-runoff election over one event's options.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct OptionWinner {
    pub option_id: String,
    pub tiebroken: bool,
    pub chosen: bool,
}

impl Store {
    /// Create a plan with its nested events and options in one transaction.
    /// A plan where every event carries exactly one option has nothing to
    /// vote on and is born finalized, with each sole option chosen.
    pub async fn create_meal_plan(&self, input: &MealPlanCreationInput) -> CoreResult<MealPlan> {
        CoreError::require_id(&input.belongs_to_household)?;
        CoreError::require_id(&input.created_by_user)?;
        if input.events.is_empty() {
            return Err(CoreError::InvalidInput(
                "meal plan requires at least one event".into(),
            ));
        }
        for event in &input.events {
            if event.options.is_empty() {
                return Err(CoreError::InvalidInput(
                    "meal plan event requires at least one option".into(),
                ));
            }
            if event.starts_at >= event.ends_at {
                return Err(CoreError::InvalidInput(
                    "meal plan event must start before it ends".into(),
                ));
            }
            for option in &event.options {
                if option.meal_scale <= 0.0 {
                    return Err(CoreError::InvalidInput("meal scale must be positive".into()));
                }
            }
        }

        let now = self.now();
        let trivially_decided = input.events.iter().all(|e| e.options.len() == 1);
        let status = if trivially_decided {
            MealPlanStatus::Finalized
        } else {
            MealPlanStatus::AwaitingVotes
        };

        let mut tx = self.pool().begin().await?;

        let plan_id = self.new_id();
        let res = sqlx::query(
            "INSERT INTO meal_plans \
               (id, belongs_to_household, created_by_user, status, notes, \
                voting_deadline, grocery_list_initialized, tasks_created, created_at) \
             VALUES (?, ?, ?, ?, ?, ?, 0, 0, ?)",
        )
        .bind(&plan_id)
        .bind(&input.belongs_to_household)
        .bind(&input.created_by_user)
        .bind(status)
        .bind(&input.notes)
        .bind(input.voting_deadline)
        .bind(now)
        .execute(&mut *tx)
        .await;
        if let Err(err) = res {
            rollback_quietly(tx).await;
            return Err(err.into());
        }

        let mut events = Vec::with_capacity(input.events.len());
        for event_input in &input.events {
            let event_id = self.new_id();
            let res = sqlx::query(
                "INSERT INTO meal_plan_events \
                   (id, belongs_to_meal_plan, starts_at, ends_at, meal_name, notes, created_at) \
                 VALUES (?, ?, ?, ?, ?, ?, ?)",
            )
            .bind(&event_id)
            .bind(&plan_id)
            .bind(event_input.starts_at)
            .bind(event_input.ends_at)
            .bind(&event_input.meal_name)
            .bind(&event_input.notes)
            .bind(now)
            .execute(&mut *tx)
            .await;
            if let Err(err) = res {
                rollback_quietly(tx).await;
                return Err(err.into());
            }

            let mut options = Vec::with_capacity(event_input.options.len());
            for option_input in &event_input.options {
                let option_id = self.new_id();
                let chosen = trivially_decided;
                let res = sqlx::query(
                    "INSERT INTO meal_plan_options \
                       (id, belongs_to_meal_plan_event, meal_id, meal_scale, assigned_cook, \
                        assigned_dishwasher, notes, chosen, tiebroken, created_at) \
                     VALUES (?, ?, ?, ?, ?, ?, ?, ?, 0, ?)",
                )
                .bind(&option_id)
                .bind(&event_id)
                .bind(&option_input.meal_id)
                .bind(option_input.meal_scale)
                .bind(&option_input.assigned_cook)
                .bind(&option_input.assigned_dishwasher)
                .bind(&option_input.notes)
                .bind(chosen)
                .bind(now)
                .execute(&mut *tx)
                .await;
                if let Err(err) = res {
                    rollback_quietly(tx).await;
                    return Err(err.into());
                }
                options.push(MealPlanOption {
                    id: option_id,
                    belongs_to_meal_plan_event: event_id.clone(),
                    meal_id: option_input.meal_id.clone(),
                    meal_scale: option_input.meal_scale,
                    assigned_cook: option_input.assigned_cook.clone(),
                    assigned_dishwasher: option_input.assigned_dishwasher.clone(),
                    notes: option_input.notes.clone(),
                    chosen,
                    tiebroken: false,
                    created_at: now,
                    last_updated_at: None,
                    archived_at: None,
                    votes: Vec::new(),
                });
            }
            events.push(MealPlanEvent {
                id: event_id,
                belongs_to_meal_plan: plan_id.clone(),
                starts_at: event_input.starts_at,
                ends_at: event_input.ends_at,
                meal_name: event_input.meal_name.clone(),
                notes: event_input.notes.clone(),
                created_at: now,
                last_updated_at: None,
                archived_at: None,
                options,
            });
        }

        let audit_entry = AuditLogEntryCreationInput {
            id: self.new_id(),
            event_type: "meal_plan_created".into(),
            resource_type: "meal_plan".into(),
            relevant_id: plan_id.clone(),
            changes: json!({ "status": status }),
            belongs_to_user: input.created_by_user.clone(),
            belongs_to_household: Some(input.belongs_to_household.clone()),
        };
        if let Err(err) = audit::append(&mut tx, &audit_entry, now).await {
            rollback_quietly(tx).await;
            return Err(err);
        }

        tx.commit().await?;

        info!(
            target = "mealwise",
            event = "meal_plan_created",
            plan_id = %plan_id,
            household_id = %input.belongs_to_household,
            status = ?status
        );

        Ok(MealPlan {
            id: plan_id,
            belongs_to_household: input.belongs_to_household.clone(),
            created_by_user: input.created_by_user.clone(),
            status,
            notes: input.notes.clone(),
            voting_deadline: input.voting_deadline,
            election_method: "instant-runoff".into(),
            grocery_list_initialized: false,
            tasks_created: false,
            created_at: now,
            last_updated_at: None,
            archived_at: None,
            events,
        })
    }

    /// Fetch a live plan with its events, options, and votes.
    pub async fn get_meal_plan(&self, plan_id: &str, household_id: &str) -> CoreResult<MealPlan> {
        let mut conn = self.pool().acquire().await?;
        load_plan(&mut conn, plan_id, household_id).await
    }

    /// Record one member's ballot for an event, then give finalization a
    /// chance to run. Returns the stored votes.
    pub async fn create_meal_plan_votes(
        &self,
        plan_id: &str,
        event_id: &str,
        by_user: &str,
        ballot: &[VoteCreationInput],
    ) -> CoreResult<Vec<MealPlanOptionVote>> {
        CoreError::require_id(plan_id)?;
        CoreError::require_id(event_id)?;
        CoreError::require_id(by_user)?;
        if ballot.is_empty() {
            return Err(CoreError::NilInput);
        }

        let now = self.now();
        let mut tx = self.pool().begin().await?;

        let household_id = match household_id_of(&mut tx, plan_id).await {
            Ok(household_id) => household_id,
            Err(err) => {
                rollback_quietly(tx).await;
                return Err(err);
            }
        };
        let plan = match load_plan(&mut tx, plan_id, &household_id).await {
            Ok(plan) => plan,
            Err(err) => {
                rollback_quietly(tx).await;
                return Err(err);
            }
        };
        let Some(event) = plan.events.iter().find(|e| e.id == event_id) else {
            rollback_quietly(tx).await;
            return Err(CoreError::NotFound);
        };
        if let Err(err) = validate_ballot(event, by_user, ballot) {
            rollback_quietly(tx).await;
            return Err(err);
        }

        let mut votes = Vec::with_capacity(ballot.len());
        for line in ballot {
            let vote_id = self.new_id();
            let res = sqlx::query(
                "INSERT INTO meal_plan_option_votes \
                   (id, belongs_to_meal_plan_option, by_user, rank, abstain, notes, created_at) \
                 VALUES (?, ?, ?, ?, ?, ?, ?)",
            )
            .bind(&vote_id)
            .bind(&line.option_id)
            .bind(by_user)
            .bind(line.rank)
            .bind(line.abstain)
            .bind(&line.notes)
            .bind(now)
            .execute(&mut *tx)
            .await;
            if let Err(err) = res {
                rollback_quietly(tx).await;
                return Err(err.into());
            }
            votes.push(MealPlanOptionVote {
                id: vote_id,
                belongs_to_meal_plan_option: line.option_id.clone(),
                by_user: by_user.to_string(),
                rank: line.rank,
                abstain: line.abstain,
                notes: line.notes.clone(),
                created_at: now,
                last_updated_at: None,
                archived_at: None,
            });
        }

        let audit_entry = AuditLogEntryCreationInput {
            id: self.new_id(),
            event_type: "meal_plan_votes_cast".into(),
            resource_type: "meal_plan_option_vote".into(),
            relevant_id: event_id.to_string(),
            changes: json!({ "vote_count": votes.len() }),
            belongs_to_user: by_user.to_string(),
            belongs_to_household: Some(plan.belongs_to_household.clone()),
        };
        if let Err(err) = audit::append(&mut tx, &audit_entry, now).await {
            rollback_quietly(tx).await;
            return Err(err);
        }

        tx.commit().await?;

        // A complete set of ballots may make the plan decidable right away.
        match self
            .attempt_to_finalize(plan_id, &plan.belongs_to_household)
            .await
        {
            Ok(_) | Err(CoreError::AlreadyFinalized) => {}
            Err(err) => return Err(err),
        }

        Ok(votes)
    }

    /// Try to move a plan from `awaiting_votes` to `finalized`, deciding the
    /// winner of every fully voted event along the way. Returns whether this
    /// call finalized the plan.
    pub async fn attempt_to_finalize(
        &self,
        plan_id: &str,
        household_id: &str,
    ) -> CoreResult<bool> {
        let now = self.now();
        let mut tx = self.pool().begin().await?;

        let plan = match load_plan(&mut tx, plan_id, household_id).await {
            Ok(plan) => plan,
            Err(err) => {
                rollback_quietly(tx).await;
                return Err(err);
            }
        };
        match plan.status {
            MealPlanStatus::AwaitingVotes => {}
            MealPlanStatus::Finalized => {
                rollback_quietly(tx).await;
                return Err(CoreError::AlreadyFinalized);
            }
            MealPlanStatus::Archived => {
                rollback_quietly(tx).await;
                return Err(CoreError::NotFound);
            }
        }

        let members = match member_user_ids(&mut tx, household_id).await {
            Ok(members) => members,
            Err(err) => {
                rollback_quietly(tx).await;
                return Err(err);
            }
        };

        let deadline_passed = plan.voting_deadline < now;
        let mut all_votes_submitted = true;
        let mut any_event_had_votes = false;

        for event in &plan.events {
            if event.options.is_empty() {
                continue;
            }
            if event.options.iter().any(|o| !o.votes.is_empty()) {
                any_event_had_votes = true;
            }
            if event.options.iter().any(|o| o.chosen) {
                continue;
            }

            let mut has_voted: HashMap<&str, bool> =
                members.iter().map(|m| (m.as_str(), false)).collect();
            for option in &event.options {
                for vote in &option.votes {
                    if let Some(flag) = has_voted.get_mut(vote.by_user.as_str()) {
                        *flag = true;
                    }
                }
            }

            if has_voted.values().any(|voted| !voted) && !deadline_passed {
                all_votes_submitted = false;
                continue;
            }

            let winner = decide_option_winner(&event.options);
            if winner.chosen {
                let res = sqlx::query(
                    "UPDATE meal_plan_options \
                     SET chosen = 1, tiebroken = ?, last_updated_at = ? \
                     WHERE id = ? AND archived_at IS NULL",
                )
                .bind(winner.tiebroken)
                .bind(now)
                .bind(&winner.option_id)
                .execute(&mut *tx)
                .await;
                if let Err(err) = res {
                    rollback_quietly(tx).await;
                    return Err(err.into());
                }
            }
        }

        if !(all_votes_submitted || (deadline_passed && any_event_had_votes)) {
            tx.commit().await?;
            return Ok(false);
        }

        // Guarded update: a concurrent finalizer that got here first wins.
        let res = sqlx::query(
            "UPDATE meal_plans SET status = 'finalized', last_updated_at = ? \
             WHERE id = ? AND status = 'awaiting_votes'",
        )
        .bind(now)
        .bind(plan_id)
        .execute(&mut *tx)
        .await;
        match res {
            Ok(done) if done.rows_affected() == 1 => {}
            Ok(_) => {
                rollback_quietly(tx).await;
                return Err(CoreError::AlreadyFinalized);
            }
            Err(err) => {
                rollback_quietly(tx).await;
                return Err(err.into());
            }
        }

        let audit_entry = AuditLogEntryCreationInput {
            id: self.new_id(),
            event_type: "meal_plan_finalized".into(),
            resource_type: "meal_plan".into(),
            relevant_id: plan_id.to_string(),
            changes: json!({ "status": MealPlanStatus::Finalized }),
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
            event = "meal_plan_finalized",
            plan_id = %plan_id,
            household_id = %household_id,
            deadline_passed = deadline_passed
        );
        Ok(true)
    }

    /// Every `(event, option, member)` combination still waiting on a ballot.
    /// Drives reminder notifications; pure read.
    pub async fn fetch_missing_votes(
        &self,
        plan_id: &str,
        household_id: &str,
    ) -> CoreResult<Vec<MissingVote>> {
        let mut conn = self.pool().acquire().await?;
        let plan = load_plan(&mut conn, plan_id, household_id).await?;
        let members = member_user_ids(&mut conn, household_id).await?;

        let mut missing = Vec::new();
        for event in &plan.events {
            for option in &event.options {
                let voters: BTreeSet<&str> =
                    option.votes.iter().map(|v| v.by_user.as_str()).collect();
                for member in &members {
                    if !voters.contains(member.as_str()) {
                        missing.push(MissingVote {
                            event_id: event.id.clone(),
                            option_id: option.id.clone(),
                            user_id: member.clone(),
                        });
                    }
                }
            }
        }
        Ok(missing)
    }

    /// Soft-archive a plan: status and `archived_at` move together.
    pub async fn archive_meal_plan(&self, plan_id: &str, household_id: &str) -> CoreResult<()> {
        CoreError::require_id(plan_id)?;
        CoreError::require_id(household_id)?;
        let now = self.now();
        let mut tx = self.pool().begin().await?;

        let res = sqlx::query(
            "UPDATE meal_plans \
             SET status = 'archived', archived_at = ?, last_updated_at = ? \
             WHERE id = ? AND belongs_to_household = ? AND archived_at IS NULL",
        )
        .bind(now)
        .bind(now)
        .bind(plan_id)
        .bind(household_id)
        .execute(&mut *tx)
        .await;
        let created_by_user: String = match res {
            Ok(done) if done.rows_affected() == 1 => {
                match sqlx::query_scalar("SELECT created_by_user FROM meal_plans WHERE id = ?")
                    .bind(plan_id)
                    .fetch_one(&mut *tx)
                    .await
                {
                    Ok(user) => user,
                    Err(err) => {
                        rollback_quietly(tx).await;
                        return Err(err.into());
                    }
                }
            }
            Ok(_) => {
                rollback_quietly(tx).await;
                return Err(CoreError::NotFound);
            }
            Err(err) => {
                rollback_quietly(tx).await;
                return Err(err.into());
            }
        };

        let audit_entry = AuditLogEntryCreationInput {
            id: self.new_id(),
            event_type: "meal_plan_archived".into(),
            resource_type: "meal_plan".into(),
            relevant_id: plan_id.to_string(),
            changes: json!({ "status": MealPlanStatus::Archived }),
            belongs_to_user: created_by_user,
            belongs_to_household: Some(household_id.to_string()),
        };
        if let Err(err) = audit::append(&mut tx, &audit_entry, now).await {
            rollback_quietly(tx).await;
            return Err(err);
        }

        tx.commit().await?;
        Ok(())
    }

    /// Plans whose voting window has closed without finalization. The sweep
    /// worker feeds each of these back into `attempt_to_finalize`.
    pub async fn unfinalized_plans_with_expired_voting_periods(
        &self,
    ) -> CoreResult<Vec<MealPlan>> {
        let plans = sqlx::query_as::<_, MealPlan>(
            "SELECT * FROM meal_plans \
             WHERE status = 'awaiting_votes' AND voting_deadline < ? \
               AND archived_at IS NULL \
             ORDER BY created_at, id",
        )
        .bind(self.now())
        .fetch_all(self.pool())
        .await?;
        Ok(plans)
    }

    /// Finalized plans still waiting for grocery-list materialization.
    pub async fn finalized_plans_with_uninitialized_grocery_lists(
        &self,
    ) -> CoreResult<Vec<MealPlan>> {
        let plans = sqlx::query_as::<_, MealPlan>(
            "SELECT * FROM meal_plans \
             WHERE status = 'finalized' AND grocery_list_initialized = 0 \
               AND archived_at IS NULL \
             ORDER BY created_at, id",
        )
        .fetch_all(self.pool())
        .await?;
        Ok(plans)
    }

    /// Chosen options for events starting within the next seven days, with
    /// the recipe IDs of each winning meal grouped per option. Consumed by
    /// the prep-task scheduler.
    pub async fn finalized_plan_results_for_next_week(
        &self,
    ) -> CoreResult<Vec<FinalizedPlanResult>> {
        let now = self.now();
        let rows: Vec<(String, String, String, String, String)> = sqlx::query_as(
            "SELECT p.id, e.id, o.id, o.meal_id, mc.recipe_id \
             FROM meal_plans p \
             JOIN meal_plan_events e \
               ON e.belongs_to_meal_plan = p.id AND e.archived_at IS NULL \
             JOIN meal_plan_options o \
               ON o.belongs_to_meal_plan_event = e.id \
              AND o.chosen = 1 AND o.archived_at IS NULL \
             JOIN meal_components mc \
               ON mc.belongs_to_meal = o.meal_id AND mc.archived_at IS NULL \
             WHERE p.status = 'finalized' AND p.archived_at IS NULL \
               AND e.starts_at >= ? AND e.starts_at < ? \
             ORDER BY p.id, e.starts_at, e.id, o.id, mc.recipe_id",
        )
        .bind(now)
        .bind(now + SEVEN_DAYS_MS)
        .fetch_all(self.pool())
        .await?;

        let mut results: Vec<FinalizedPlanResult> = Vec::new();
        for (plan_id, event_id, option_id, meal_id, recipe_id) in rows {
            match results.last_mut() {
                Some(last) if last.meal_plan_option_id == option_id => {
                    last.recipe_ids.push(recipe_id);
                }
                _ => results.push(FinalizedPlanResult {
                    meal_plan_id: plan_id,
                    meal_plan_event_id: event_id,
                    meal_plan_option_id: option_id,
                    meal_id,
                    recipe_ids: vec![recipe_id],
                }),
            }
        }
        Ok(results)
    }
}

async fn household_id_of(conn: &mut SqliteConnection, plan_id: &str) -> CoreResult<String> {
    let household: Option<String> = sqlx::query_scalar(
        "SELECT belongs_to_household FROM meal_plans WHERE id = ? AND archived_at IS NULL",
    )
    .bind(plan_id)
    .fetch_optional(&mut *conn)
    .await?;
    household.ok_or(CoreError::NotFound)
}

/// Load a live plan and its full event/option/vote tree on the caller's
/// connection, so finalization sees one consistent snapshot inside its tx.
async fn load_plan(
    conn: &mut SqliteConnection,
    plan_id: &str,
    household_id: &str,
) -> CoreResult<MealPlan> {
    CoreError::require_id(plan_id)?;
    CoreError::require_id(household_id)?;

    let mut plan = sqlx::query_as::<_, MealPlan>(
        "SELECT * FROM meal_plans \
         WHERE id = ? AND belongs_to_household = ? AND archived_at IS NULL",
    )
    .bind(plan_id)
    .bind(household_id)
    .fetch_optional(&mut *conn)
    .await?
    .ok_or(CoreError::NotFound)?;

    plan.events = sqlx::query_as::<_, MealPlanEvent>(
        "SELECT * FROM meal_plan_events \
         WHERE belongs_to_meal_plan = ? AND archived_at IS NULL \
         ORDER BY starts_at, id",
    )
    .bind(plan_id)
    .fetch_all(&mut *conn)
    .await?;

    for event in &mut plan.events {
        event.options = sqlx::query_as::<_, MealPlanOption>(
            "SELECT * FROM meal_plan_options \
             WHERE belongs_to_meal_plan_event = ? AND archived_at IS NULL \
             ORDER BY created_at, id",
        )
        .bind(&event.id)
        .fetch_all(&mut *conn)
        .await?;

        for option in &mut event.options {
            option.votes = sqlx::query_as::<_, MealPlanOptionVote>(
                "SELECT * FROM meal_plan_option_votes \
                 WHERE belongs_to_meal_plan_option = ? AND archived_at IS NULL \
                 ORDER BY rank, id",
            )
            .bind(&option.id)
            .fetch_all(&mut *conn)
            .await?;
        }
    }
    Ok(plan)
}

async fn member_user_ids(
    conn: &mut SqliteConnection,
    household_id: &str,
) -> CoreResult<Vec<String>> {
    let members: Vec<String> = sqlx::query_scalar(
        "SELECT belongs_to_user FROM household_memberships \
         WHERE belongs_to_household = ? AND archived_at IS NULL \
         ORDER BY created_at, id",
    )
    .bind(household_id)
    .fetch_all(&mut *conn)
    .await?;
    Ok(members)
}

/// A member's ranks on one event must be distinct and form the prefix
/// `0..k`, counting votes from earlier submissions; an abstention carries
/// no ranked lines at all, ever. Every line must name an option on the
/// event being voted on.
fn validate_ballot(
    event: &MealPlanEvent,
    by_user: &str,
    ballot: &[VoteCreationInput],
) -> CoreResult<()> {
    let option_ids: BTreeSet<&str> = event.options.iter().map(|o| o.id.as_str()).collect();
    for line in ballot {
        if !option_ids.contains(line.option_id.as_str()) {
            return Err(CoreError::InvalidInput(format!(
                "option {} is not part of event {}",
                line.option_id, event.id
            )));
        }
    }

    let existing: Vec<&MealPlanOptionVote> = event
        .options
        .iter()
        .flat_map(|option| option.votes.iter())
        .filter(|vote| vote.by_user == by_user)
        .collect();

    let abstaining =
        ballot.iter().any(|line| line.abstain) || existing.iter().any(|vote| vote.abstain);
    let mut ranks: Vec<i64> = ballot
        .iter()
        .filter(|line| !line.abstain)
        .map(|line| line.rank)
        .chain(
            existing
                .iter()
                .filter(|vote| !vote.abstain)
                .map(|vote| vote.rank),
        )
        .collect();
    if abstaining && !ranks.is_empty() {
        return Err(CoreError::InvalidInput(
            "an abstaining member cannot also carry ranked votes".into(),
        ));
    }
    ranks.sort_unstable();
    if ranks.len() > event.options.len() {
        return Err(CoreError::InvalidInput(
            "more ranked votes than options on the event".into(),
        ));
    }
    for (expected, rank) in ranks.iter().enumerate() {
        if *rank != expected as i64 {
            return Err(CoreError::InvalidInput(
                "a member's ranks on an event must be distinct and start at zero".into(),
            ));
        }
    }
    Ok(())
}

/// Instant-runoff election. Each member's non-abstaining votes form a
/// ranked ballot (rank 0 highest). A strict majority of active ballots
/// wins a round outright; otherwise the weakest options are eliminated and
/// their ballots redistributed. A full tie falls back to creation order.
pub(crate) fn decide_option_winner(options: &[MealPlanOption]) -> OptionWinner {
    let mut ballots: HashMap<&str, Vec<(i64, &str)>> = HashMap::new();
    for option in options {
        for vote in &option.votes {
            if vote.abstain {
                continue;
            }
            ballots
                .entry(vote.by_user.as_str())
                .or_default()
                .push((vote.rank, option.id.as_str()));
        }
    }
    for ballot in ballots.values_mut() {
        ballot.sort_unstable();
    }

    if ballots.is_empty() {
        return OptionWinner {
            option_id: String::new(),
            tiebroken: false,
            chosen: false,
        };
    }

    let mut surviving: BTreeSet<&str> = options.iter().map(|o| o.id.as_str()).collect();
    loop {
        let mut tallies: HashMap<&str, usize> =
            surviving.iter().map(|id| (*id, 0usize)).collect();
        let mut active_ballots = 0usize;
        for ballot in ballots.values() {
            if let Some((_, first_choice)) = ballot
                .iter()
                .find(|(_, option_id)| surviving.contains(option_id))
            {
                if let Some(tally) = tallies.get_mut(first_choice) {
                    *tally += 1;
                }
                active_ballots += 1;
            }
        }

        // Every remaining ballot is exhausted; nothing distinguishes the
        // survivors except creation order.
        if active_ballots == 0 {
            return tie_break(options, &surviving);
        }

        if let Some((leader, count)) = tallies.iter().max_by_key(|(_, count)| **count) {
            if *count * 2 > active_ballots {
                return OptionWinner {
                    option_id: (*leader).to_string(),
                    tiebroken: false,
                    chosen: true,
                };
            }
        }

        let min = *tallies.values().min().unwrap_or(&0);
        let max = *tallies.values().max().unwrap_or(&0);
        if min == max {
            // Eliminating the weakest would eliminate everyone.
            return tie_break(options, &surviving);
        }
        surviving.retain(|id| tallies.get(id).copied().unwrap_or(0) > min);
    }
}

fn tie_break(options: &[MealPlanOption], surviving: &BTreeSet<&str>) -> OptionWinner {
    let winner = options
        .iter()
        .filter(|o| surviving.contains(o.id.as_str()))
        .min_by(|a, b| {
            a.created_at
                .cmp(&b.created_at)
                .then_with(|| a.id.cmp(&b.id))
        });
    match winner {
        Some(option) => OptionWinner {
            option_id: option.id.clone(),
            tiebroken: true,
            chosen: true,
        },
        None => OptionWinner {
            option_id: String::new(),
            tiebroken: false,
            chosen: false,
        },
    }
}
