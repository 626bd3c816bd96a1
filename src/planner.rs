//! Builds a day's practice plan from the spots of the selected pieces.

use chrono::{DateTime, Duration, Utc};
use rand::seq::SliceRandom;
use rand::Rng;
use serde::Serialize;
use tracing::{debug, info};

use crate::config::Config;
use crate::db::{next_index, Database};
use crate::error::{PracticeError, Result};
use crate::models::{Intensity, PieceStage, PracticePlan, PracticeType, Spot, SpotStage};

#[derive(Debug, Clone)]
pub struct PlanRequest {
    pub piece_ids: Vec<i64>,
    pub intensity: Intensity,
    pub new_spots: bool,
    pub starting_point: bool,
    pub random_single: bool,
}

/// Plan items derived from one piece, in insertion order.
#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize)]
pub struct PiecePlan {
    pub spots: Vec<(i64, PracticeType)>,
    pub pieces: Vec<PracticeType>,
}

/// Picks `min(n, candidates.len())` distinct candidates uniformly at random.
pub fn sample_new_spots<R: Rng + ?Sized>(mut candidates: Vec<i64>, n: usize, rng: &mut R) -> Vec<i64> {
    let n = n.min(candidates.len());
    let (picked, _) = candidates.partial_shuffle(rng, n);
    picked.to_vec()
}

/// Classifies a piece's spots by stage into plan items.
pub fn plan_piece<R: Rng + ?Sized>(
    spots: &[Spot],
    request: &PlanRequest,
    recent_window: Duration,
    now: DateTime<Utc>,
    rng: &mut R,
) -> PiecePlan {
    let mut new_candidates = Vec::new();
    let mut extra_repeat = Vec::new();
    let mut interleave = Vec::new();
    let mut interleave_days = Vec::new();
    let mut random_eligible = false;

    for spot in spots {
        match spot.stage {
            SpotStage::Repeat => new_candidates.push(spot.id),
            SpotStage::ExtraRepeat => extra_repeat.push(spot.id),
            SpotStage::Interleave => {
                interleave.push(spot.id);
                random_eligible = true;
            }
            SpotStage::InterleaveDays => {
                if !spot.practiced_within(now, recent_window) {
                    interleave_days.push(spot.id);
                }
                random_eligible = true;
            }
            SpotStage::Random => random_eligible = true,
            SpotStage::Completed => {}
        }
    }

    let mut plan = PiecePlan::default();

    if request.new_spots {
        let picked = sample_new_spots(
            new_candidates,
            request.intensity.new_spots_per_piece(),
            rng,
        );
        plan.spots
            .extend(picked.into_iter().map(|id| (id, PracticeType::New)));
    }
    plan.spots
        .extend(extra_repeat.into_iter().map(|id| (id, PracticeType::ExtraRepeat)));
    plan.spots
        .extend(interleave.into_iter().map(|id| (id, PracticeType::Interleave)));
    plan.spots.extend(
        interleave_days
            .into_iter()
            .map(|id| (id, PracticeType::InterleaveDays)),
    );

    if request.starting_point {
        plan.pieces.push(PracticeType::StartingPoint);
    }
    if request.random_single && random_eligible {
        plan.pieces.push(PracticeType::RandomSpots);
    }

    plan
}

pub struct PlanGenerator<'a> {
    db: &'a Database,
    config: &'a Config,
}

impl<'a> PlanGenerator<'a> {
    pub fn new(db: &'a Database, config: &'a Config) -> Self {
        Self { db, config }
    }

    /// Creates the plan, its practice session and every plan item in one
    /// transaction, replacing the user's previously active plan.
    pub fn generate<R: Rng + ?Sized>(
        &self,
        user_id: &str,
        request: &PlanRequest,
        now: DateTime<Utc>,
        rng: &mut R,
    ) -> Result<PracticePlan> {
        let piece_ids = dedup(&request.piece_ids);
        if piece_ids.is_empty() {
            return Err(PracticeError::validation("select at least one piece"));
        }

        let recent_window = Duration::hours(self.config.planning.recent_practice_hours);

        let tx = self.db.begin()?;

        let mut piece_plans = Vec::with_capacity(piece_ids.len());
        for &piece_id in &piece_ids {
            let piece = self
                .db
                .get_piece(user_id, piece_id)?
                .ok_or_else(|| PracticeError::not_found(format!("piece {}", piece_id)))?;
            if piece.stage == PieceStage::Completed {
                return Err(PracticeError::validation(format!(
                    "piece '{}' is completed and cannot be planned",
                    piece.title
                )));
            }
            let spots = self.db.list_spots(piece_id)?;
            let plan = plan_piece(&spots, request, recent_window, now, rng);
            debug!(
                piece_id,
                spots = plan.spots.len(),
                pieces = plan.pieces.len(),
                "classified piece"
            );
            piece_plans.push((piece_id, plan));
        }

        let replaced = self.db.deactivate_plans(user_id)?;
        let session_id = self.db.create_practice_session(user_id, now)?;
        let plan_id = self
            .db
            .insert_plan(user_id, request.intensity, session_id, now)?;

        for (piece_id, plan) in &piece_plans {
            for &(spot_id, practice_type) in &plan.spots {
                let idx = next_index(self.db.max_plan_spot_idx(plan_id)?);
                self.db.add_plan_spot(plan_id, spot_id, practice_type, idx)?;
            }
            for &practice_type in &plan.pieces {
                let idx = next_index(self.db.max_plan_piece_idx(plan_id)?);
                self.db
                    .add_plan_piece(plan_id, *piece_id, practice_type, idx)?;
            }
        }

        let plan = self
            .db
            .get_plan(user_id, plan_id)?
            .ok_or_else(|| PracticeError::not_found(format!("plan {}", plan_id)))?;

        tx.commit()?;

        info!(
            plan_id,
            pieces = piece_ids.len(),
            intensity = request.intensity.as_str(),
            replaced,
            "created practice plan"
        );
        Ok(plan)
    }

    /// Deactivates the user's active plan, returning its id.
    pub fn stop(&self, user_id: &str) -> Result<Option<i64>> {
        let tx = self.db.begin()?;
        let active = self.db.get_active_plan(user_id)?;
        if active.is_some() {
            self.db.deactivate_plans(user_id)?;
        }
        tx.commit()?;

        if let Some(plan) = &active {
            info!(plan_id = plan.id, "stopped practice plan");
        }
        Ok(active.map(|p| p.id))
    }

    /// Makes an earlier, unfinished plan the active one again.
    pub fn resume(&self, user_id: &str, plan_id: i64) -> Result<PracticePlan> {
        let tx = self.db.begin()?;
        let plan = self
            .db
            .get_plan(user_id, plan_id)?
            .ok_or_else(|| PracticeError::not_found(format!("plan {}", plan_id)))?;
        if plan.completed {
            return Err(PracticeError::state(format!(
                "plan {} is already completed",
                plan_id
            )));
        }
        if !plan.active {
            self.db.deactivate_plans(user_id)?;
            self.db.activate_plan(plan_id)?;
        }
        tx.commit()?;

        info!(plan_id, "resumed practice plan");
        Ok(PracticePlan {
            active: true,
            ..plan
        })
    }
}

fn dedup(ids: &[i64]) -> Vec<i64> {
    let mut seen = Vec::with_capacity(ids.len());
    for &id in ids {
        if !seen.contains(&id) {
            seen.push(id);
        }
    }
    seen
}
