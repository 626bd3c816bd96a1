//! Runs practice against an active plan: the interactive interleave cursor,
//! repeat practice, bulk completion and progress.

use chrono::{DateTime, Utc};
use rand::seq::SliceRandom;
use rand::Rng;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::db::Database;
use crate::error::{PracticeError, Result};
use crate::models::{
    Evaluation, PlanProgress, PracticeCategory, PracticePlan, PracticeSession, PracticeType, Spot,
    SpotStage,
};
use crate::signals::{Notifier, Severity, Signal};
use crate::stage::{self, PracticeInput, StageThresholds, Transition};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CursorEntry {
    pub spot_id: i64,
    pub piece_id: i64,
}

/// Shuffled walk over one category of a plan's spot items.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InterleaveCursor {
    pub plan_id: i64,
    pub category: PracticeCategory,
    pub entries: Vec<CursorEntry>,
    pub index: usize,
    /// Whether the caller moves on to the next category once this one is done.
    pub go_on: bool,
}

impl InterleaveCursor {
    pub fn current(&self) -> Option<CursorEntry> {
        self.entries.get(self.index).copied()
    }

    pub fn advance(&mut self) {
        if self.index < self.entries.len() {
            self.index += 1;
        }
    }

    pub fn is_exhausted(&self) -> bool {
        self.index >= self.entries.len()
    }

    pub fn remaining(&self) -> usize {
        self.entries.len().saturating_sub(self.index)
    }

    pub fn finish(&mut self) {
        self.entries.clear();
        self.index = 0;
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Submission {
    pub spot_id: i64,
    pub piece_id: i64,
    pub evaluation: Evaluation,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum SubmitOutcome {
    Next {
        transition: Transition,
        next: CursorEntry,
        progress: PlanProgress,
    },
    Finished {
        transition: Transition,
        category: PracticeCategory,
        category_progress: PlanProgress,
        progress: PlanProgress,
        go_on: bool,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct PracticeOutcome {
    pub transition: Transition,
    pub progress: PlanProgress,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct CategoryCompletion {
    pub practice_type: PracticeType,
    pub completed: usize,
    pub progress: PlanProgress,
}

pub struct PlanExecutor<'a> {
    db: &'a Database,
    thresholds: StageThresholds,
    notifier: &'a dyn Notifier,
}

impl<'a> PlanExecutor<'a> {
    pub fn new(db: &'a Database, thresholds: StageThresholds, notifier: &'a dyn Notifier) -> Self {
        Self {
            db,
            thresholds,
            notifier,
        }
    }

    pub fn start_session<R: Rng + ?Sized>(
        &self,
        user_id: &str,
        plan_id: i64,
        category: PracticeCategory,
        go_on: bool,
        rng: &mut R,
    ) -> Result<InterleaveCursor> {
        let plan = self.active_plan(user_id, plan_id)?;
        let mut entries: Vec<CursorEntry> = self
            .db
            .incomplete_plan_spots(plan.id, category.practice_type())?
            .into_iter()
            .map(|item| CursorEntry {
                spot_id: item.spot_id,
                piece_id: item.piece_id,
            })
            .collect();
        entries.shuffle(rng);

        let cursor = InterleaveCursor {
            plan_id: plan.id,
            category,
            entries,
            index: 0,
            go_on,
        };

        info!(
            plan_id,
            category = category.as_str(),
            spots = cursor.entries.len(),
            "started practice session"
        );
        if cursor.is_exhausted() {
            self.notifier.notify(Signal::SessionFinished { category });
        }
        Ok(cursor)
    }

    /// Applies an evaluation to the cursor's current spot and advances.
    ///
    /// A state error ends the session: the cursor is finished and a
    /// session-finished signal is emitted, so the caller has to start over.
    pub fn submit(
        &self,
        user_id: &str,
        cursor: &mut InterleaveCursor,
        submission: Submission,
        now: DateTime<Utc>,
    ) -> Result<SubmitOutcome> {
        match self.try_submit(user_id, cursor, submission, now) {
            Err(err @ PracticeError::State(_)) => {
                warn!(error = %err, plan_id = cursor.plan_id, "aborting practice session");
                cursor.finish();
                self.notifier.notify(Signal::SessionFinished {
                    category: cursor.category,
                });
                Err(err)
            }
            other => other,
        }
    }

    fn try_submit(
        &self,
        user_id: &str,
        cursor: &mut InterleaveCursor,
        submission: Submission,
        now: DateTime<Utc>,
    ) -> Result<SubmitOutcome> {
        let expected = cursor
            .current()
            .ok_or_else(|| PracticeError::state("no spot left in this practice session"))?;
        if expected.spot_id != submission.spot_id || expected.piece_id != submission.piece_id {
            return Err(PracticeError::state(format!(
                "spot {} of piece {} is not the current spot (expected spot {} of piece {})",
                submission.spot_id, submission.piece_id, expected.spot_id, expected.piece_id
            )));
        }

        let plan = self.active_plan(user_id, cursor.plan_id)?;
        let practice_type = cursor.category.practice_type();

        let tx = self.db.begin()?;
        let spot = self.owned_spot(user_id, submission.spot_id)?;
        let item = self
            .db
            .get_plan_spot(plan.id, spot.id, practice_type)?
            .ok_or_else(|| {
                PracticeError::not_found(format!(
                    "spot {} in the {} items of plan {}",
                    spot.id,
                    practice_type.as_str(),
                    plan.id
                ))
            })?;
        if item.completed {
            return Err(PracticeError::state(format!(
                "spot '{}' was already practiced in this plan",
                spot.name
            )));
        }

        let transition = self.practice(
            &plan,
            &spot,
            PracticeInput::Evaluated(submission.evaluation),
            now,
        )?;
        self.db
            .complete_plan_spot(plan.id, spot.id, practice_type, Some(submission.evaluation))?;
        let (progress, plan_done) = self.settle(&plan)?;
        tx.commit()?;

        debug!(
            spot_id = spot.id,
            from = spot.stage.as_str(),
            to = transition.stage.as_str(),
            skip_days = transition.skip_days,
            "evaluated spot"
        );
        self.announce(progress, plan_done);

        cursor.advance();
        if let Some(next) = cursor.current() {
            return Ok(SubmitOutcome::Next {
                transition,
                next,
                progress,
            });
        }

        let category = cursor.category;
        let category_progress = self.db.category_progress(plan.id, practice_type)?;
        cursor.finish();
        info!(plan_id = plan.id, category = category.as_str(), "practice session finished");
        self.notifier.notify(Signal::SessionFinished { category });

        Ok(SubmitOutcome::Finished {
            transition,
            category,
            category_progress,
            progress,
            go_on: cursor.go_on,
        })
    }

    /// Marks every remaining item of one practice type as practiced, without
    /// evaluation. Running it on an already finished category does nothing.
    pub fn complete_category(
        &self,
        user_id: &str,
        plan_id: i64,
        practice_type: PracticeType,
        now: DateTime<Utc>,
    ) -> Result<CategoryCompletion> {
        let plan = self.active_plan(user_id, plan_id)?;

        let tx = self.db.begin()?;
        let mut completed = 0;
        if practice_type.is_piece_item() {
            for item in self.db.incomplete_plan_pieces(plan.id, practice_type)? {
                if self
                    .db
                    .complete_plan_piece(plan.id, item.piece_id, practice_type)?
                {
                    self.db.touch_piece(item.piece_id, now)?;
                    completed += 1;
                }
            }
        } else {
            for item in self.db.incomplete_plan_spots(plan.id, practice_type)? {
                let spot = self.owned_spot(user_id, item.spot_id)?;
                self.practice(&plan, &spot, PracticeInput::Practiced, now)?;
                if self
                    .db
                    .complete_plan_spot(plan.id, spot.id, practice_type, None)?
                {
                    completed += 1;
                }
            }
        }
        let (progress, plan_done) = if completed > 0 {
            self.settle(&plan)?
        } else {
            (self.db.plan_progress(plan.id)?, false)
        };
        tx.commit()?;

        info!(
            plan_id,
            practice_type = practice_type.as_str(),
            completed,
            "completed category"
        );
        if completed > 0 {
            self.announce(progress, plan_done);
        }
        if let Some(category) = category_of(practice_type) {
            self.notifier.notify(Signal::SessionFinished { category });
        }

        Ok(CategoryCompletion {
            practice_type,
            completed,
            progress,
        })
    }

    /// Repeat practice of a `new` or `extra_repeat` item. The item counts as
    /// done whether or not the repetition succeeded.
    pub fn practice_repeat(
        &self,
        user_id: &str,
        plan_id: i64,
        spot_id: i64,
        success: bool,
        to_stage: SpotStage,
        now: DateTime<Utc>,
    ) -> Result<PracticeOutcome> {
        let plan = self.active_plan(user_id, plan_id)?;

        let tx = self.db.begin()?;
        let spot = self.owned_spot(user_id, spot_id)?;

        let mut item = None;
        for practice_type in [PracticeType::New, PracticeType::ExtraRepeat] {
            if let Some(found) = self.db.get_plan_spot(plan.id, spot.id, practice_type)? {
                item = Some(found);
                break;
            }
        }
        let item = item.ok_or_else(|| {
            PracticeError::not_found(format!(
                "spot {} among the repeat items of plan {}",
                spot.id, plan.id
            ))
        })?;
        if item.completed {
            return Err(PracticeError::state(format!(
                "spot '{}' was already practiced in this plan",
                spot.name
            )));
        }

        let transition = self.practice(
            &plan,
            &spot,
            PracticeInput::Repeat { success, to_stage },
            now,
        )?;
        self.db
            .complete_plan_spot(plan.id, spot.id, item.practice_type, None)?;
        let (progress, plan_done) = self.settle(&plan)?;
        tx.commit()?;

        info!(
            spot_id,
            success,
            to = transition.stage.as_str(),
            "repeat practice recorded"
        );
        self.announce(progress, plan_done);

        Ok(PracticeOutcome {
            transition,
            progress,
        })
    }

    /// Completes a `starting_point` or `random_spots` piece item.
    pub fn complete_piece(
        &self,
        user_id: &str,
        plan_id: i64,
        piece_id: i64,
        practice_type: PracticeType,
        now: DateTime<Utc>,
    ) -> Result<PlanProgress> {
        if !practice_type.is_piece_item() {
            return Err(PracticeError::validation(format!(
                "{} is not a piece practice type",
                practice_type.as_str()
            )));
        }
        let plan = self.active_plan(user_id, plan_id)?;

        let tx = self.db.begin()?;
        let item = self
            .db
            .plan_pieces(plan.id)?
            .into_iter()
            .find(|p| p.piece_id == piece_id && p.practice_type == practice_type)
            .ok_or_else(|| {
                PracticeError::not_found(format!(
                    "{} item for piece {} in plan {}",
                    practice_type.as_str(),
                    piece_id,
                    plan.id
                ))
            })?;
        if item.completed {
            return Err(PracticeError::state(format!(
                "'{}' was already practiced in this plan",
                item.piece_title
            )));
        }

        self.db.complete_plan_piece(plan.id, piece_id, practice_type)?;
        self.db.touch_piece(piece_id, now)?;
        let (progress, plan_done) = self.settle(&plan)?;
        tx.commit()?;

        info!(plan_id, piece_id, practice_type = practice_type.as_str(), "piece item completed");
        self.announce(progress, plan_done);
        Ok(progress)
    }

    /// Adds practice time to the active plan's session.
    pub fn log_minutes(&self, user_id: &str, plan_id: i64, minutes: i64) -> Result<PracticeSession> {
        if minutes <= 0 {
            return Err(PracticeError::validation(format!(
                "minutes must be > 0, got {}",
                minutes
            )));
        }
        let plan = self.active_plan(user_id, plan_id)?;

        let tx = self.db.begin()?;
        self.db
            .extend_practice_session(plan.practice_session_id, minutes)?;
        let session = self
            .db
            .get_practice_session(plan.practice_session_id)?
            .ok_or_else(|| {
                PracticeError::not_found(format!("practice session {}", plan.practice_session_id))
            })?;
        tx.commit()?;

        debug!(session_id = session.id, minutes, total = session.duration_minutes, "logged practice time");
        Ok(session)
    }

    pub fn plan_progress(&self, user_id: &str, plan_id: i64) -> Result<PlanProgress> {
        let plan = self.owned_plan(user_id, plan_id)?;
        Ok(self.db.plan_progress(plan.id)?)
    }

    pub fn category_progress(
        &self,
        user_id: &str,
        plan_id: i64,
        practice_type: PracticeType,
    ) -> Result<PlanProgress> {
        let plan = self.owned_plan(user_id, plan_id)?;
        Ok(self.db.category_progress(plan.id, practice_type)?)
    }

    fn owned_plan(&self, user_id: &str, plan_id: i64) -> Result<PracticePlan> {
        self.db
            .get_plan(user_id, plan_id)?
            .ok_or_else(|| PracticeError::not_found(format!("plan {}", plan_id)))
    }

    fn active_plan(&self, user_id: &str, plan_id: i64) -> Result<PracticePlan> {
        let plan = self.owned_plan(user_id, plan_id)?;
        if !plan.active {
            return Err(PracticeError::state(format!("plan {} is not active", plan_id)));
        }
        Ok(plan)
    }

    fn owned_spot(&self, user_id: &str, spot_id: i64) -> Result<Spot> {
        self.db
            .get_spot(user_id, spot_id)?
            .ok_or_else(|| PracticeError::not_found(format!("spot {}", spot_id)))
    }

    // Runs the stage machine and stores its result along with one rep.
    fn practice(
        &self,
        plan: &PracticePlan,
        spot: &Spot,
        input: PracticeInput,
        now: DateTime<Utc>,
    ) -> Result<Transition> {
        let elapsed = now.signed_duration_since(spot.stage_started);
        let transition =
            stage::transition(spot.stage, spot.skip_days, input, elapsed, &self.thresholds)?;

        self.db.apply_transition(spot.id, spot.stage, &transition, now)?;
        if transition.record_practiced {
            self.db.touch_piece(spot.piece_id, now)?;
        }
        self.db.record_spot_rep(plan.practice_session_id, spot.id)?;
        Ok(transition)
    }

    fn settle(&self, plan: &PracticePlan) -> Result<(PlanProgress, bool)> {
        let progress = self.db.plan_progress(plan.id)?;
        let done = progress.is_complete() && self.db.mark_plan_completed(plan.id)?;
        Ok((progress, done))
    }

    fn announce(&self, progress: PlanProgress, plan_done: bool) {
        self.notifier.notify(Signal::progress(progress));
        if plan_done {
            self.notifier.notify(Signal::alert(
                "Plan complete",
                "Every item in today's practice plan is done.",
                Severity::Success,
            ));
        }
    }
}

fn category_of(practice_type: PracticeType) -> Option<PracticeCategory> {
    match practice_type {
        PracticeType::Interleave => Some(PracticeCategory::Interleave),
        PracticeType::InterleaveDays => Some(PracticeCategory::InterleaveDays),
        _ => None,
    }
}

fn cursor_key(user_id: &str, category: PracticeCategory) -> String {
    format!("cursor:{}:{}", user_id, category.as_str())
}

/// Stores the cursor between CLI invocations.
///
/// Nothing guards the stored value: two processes advancing the same cursor
/// race and the last write wins.
pub fn save_cursor(
    db: &Database,
    user_id: &str,
    cursor: &InterleaveCursor,
    now: DateTime<Utc>,
) -> Result<()> {
    let key = cursor_key(user_id, cursor.category);
    if cursor.is_exhausted() {
        db.remove_state(&key)?;
        return Ok(());
    }
    let json = serde_json::to_string(cursor)
        .map_err(|e| PracticeError::state(format!("cannot store practice session: {}", e)))?;
    db.put_state(&key, &json, now)?;
    Ok(())
}

pub fn load_cursor(
    db: &Database,
    user_id: &str,
    category: PracticeCategory,
) -> Result<Option<InterleaveCursor>> {
    let Some(json) = db.get_state(&cursor_key(user_id, category))? else {
        return Ok(None);
    };
    serde_json::from_str(&json)
        .map(Some)
        .map_err(|e| PracticeError::state(format!("stored practice session is unreadable: {}", e)))
}

pub fn clear_cursor(db: &Database, user_id: &str, category: PracticeCategory) -> Result<bool> {
    Ok(db.remove_state(&cursor_key(user_id, category))?)
}
