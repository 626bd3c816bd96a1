//! Spot stage transitions.
//!
//! Everything here is a pure function of its inputs: the caller supplies the
//! spot's current stage and skip interval, what happened at the instrument,
//! and how long the spot has been in its current stage.

use chrono::Duration;
use serde::{Deserialize, Serialize};

use crate::error::{PracticeError, Result};
use crate::models::{Evaluation, SpotStage};

/// Day thresholds that gate evaluation-driven promotion and demotion.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct StageThresholds {
    /// An excellent interleave spot moves to infrequent review after this many days.
    pub interleave_min_days: i64,
    /// A fine interleave spot falls back to random practice after this many days.
    pub interleave_max_days: i64,
    /// Excellent infrequent spots double their skip interval once past this many days.
    pub skip_growth_after_days: i64,
    /// Skip intervals stop doubling at this value.
    pub skip_days_ceiling: i64,
    /// Infrequent spots at the ceiling graduate once past this many days.
    pub completed_after_days: i64,
}

impl Default for StageThresholds {
    fn default() -> Self {
        Self {
            interleave_min_days: 4,
            interleave_max_days: 10,
            skip_growth_after_days: 4,
            skip_days_ceiling: 7,
            completed_after_days: 30,
        }
    }
}

/// Upper bound for every day threshold, roughly a century.
pub const MAX_THRESHOLD_DAYS: i64 = 36_500;

impl StageThresholds {
    pub fn validate(&self) -> std::result::Result<(), String> {
        let days = [
            ("interleave_min_days", self.interleave_min_days),
            ("interleave_max_days", self.interleave_max_days),
            ("skip_growth_after_days", self.skip_growth_after_days),
            ("completed_after_days", self.completed_after_days),
        ];
        for (name, value) in days {
            if !(0..=MAX_THRESHOLD_DAYS).contains(&value) {
                return Err(format!(
                    "stages.{} must be between 0 and {}, got {}",
                    name, MAX_THRESHOLD_DAYS, value
                ));
            }
        }
        if self.interleave_min_days > self.interleave_max_days {
            return Err("stages.interleave_min_days must be <= stages.interleave_max_days".into());
        }
        if !(2..=MAX_THRESHOLD_DAYS).contains(&self.skip_days_ceiling) {
            return Err(format!(
                "stages.skip_days_ceiling must be between 2 and {}",
                MAX_THRESHOLD_DAYS
            ));
        }
        Ok(())
    }
}

/// What happened when the spot was practiced.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PracticeInput {
    /// Repeat practice with a caller-chosen destination on success.
    Repeat { success: bool, to_stage: SpotStage },
    /// Self-evaluation of an interleaved or infrequent spot.
    Evaluated(Evaluation),
    /// Marked done without an evaluation.
    Practiced,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Transition {
    pub stage: SpotStage,
    pub skip_days: i64,
    pub record_practiced: bool,
}

impl Transition {
    fn to(stage: SpotStage, skip_days: i64) -> Self {
        Self {
            stage,
            skip_days,
            record_practiced: true,
        }
    }

    pub fn changes_stage(&self, from: SpotStage) -> bool {
        self.stage != from
    }
}

pub fn transition(
    stage: SpotStage,
    skip_days: i64,
    input: PracticeInput,
    elapsed: Duration,
    thresholds: &StageThresholds,
) -> Result<Transition> {
    if skip_days < 0 {
        return Err(PracticeError::validation(format!(
            "skip_days must be >= 0, got {}",
            skip_days
        )));
    }

    if stage == SpotStage::Completed {
        return Ok(Transition {
            stage,
            skip_days,
            record_practiced: false,
        });
    }

    match input {
        PracticeInput::Practiced => Ok(Transition::to(stage, skip_days)),
        PracticeInput::Repeat { success, to_stage } => repeat(stage, skip_days, success, to_stage),
        PracticeInput::Evaluated(evaluation) => match stage {
            SpotStage::Interleave => Ok(interleave(skip_days, evaluation, elapsed, thresholds)),
            SpotStage::InterleaveDays => {
                Ok(interleave_days(skip_days, evaluation, elapsed, thresholds))
            }
            SpotStage::Random | SpotStage::Completed => {
                Ok(Transition::to(stage, skip_days))
            }
            SpotStage::Repeat | SpotStage::ExtraRepeat => Err(PracticeError::validation(format!(
                "{} spots are practiced with repeat, not evaluated",
                stage.as_str()
            ))),
        },
    }
}

fn repeat(
    stage: SpotStage,
    skip_days: i64,
    success: bool,
    to_stage: SpotStage,
) -> Result<Transition> {
    let allowed: &[SpotStage] = match stage {
        SpotStage::Repeat => &[SpotStage::Random, SpotStage::ExtraRepeat],
        SpotStage::ExtraRepeat => &[SpotStage::Interleave],
        other => {
            return Err(PracticeError::validation(format!(
                "{} spots cannot be repeat-practiced",
                other.as_str()
            )))
        }
    };

    if !allowed.contains(&to_stage) {
        return Err(PracticeError::validation(format!(
            "{} spots cannot move to {}",
            stage.as_str(),
            to_stage.as_str()
        )));
    }

    if success {
        Ok(Transition::to(to_stage, skip_days))
    } else {
        Ok(Transition::to(stage, skip_days))
    }
}

fn interleave(
    skip_days: i64,
    evaluation: Evaluation,
    elapsed: Duration,
    t: &StageThresholds,
) -> Transition {
    let min = Duration::days(t.interleave_min_days);
    let max = Duration::days(t.interleave_max_days);

    if evaluation == Evaluation::Excellent && elapsed >= min {
        return Transition::to(SpotStage::InterleaveDays, 1);
    }

    // Poor demotes unconditionally; only fine waits for the max window.
    if evaluation == Evaluation::Poor || (evaluation == Evaluation::Fine && elapsed >= max) {
        return Transition::to(SpotStage::Random, skip_days);
    }

    Transition::to(SpotStage::Interleave, skip_days)
}

fn interleave_days(
    skip_days: i64,
    evaluation: Evaluation,
    elapsed: Duration,
    t: &StageThresholds,
) -> Transition {
    let growth_after = Duration::days(t.skip_growth_after_days);
    let completed_after = Duration::days(t.completed_after_days);

    if evaluation == Evaluation::Excellent
        && elapsed > growth_after
        && skip_days < t.skip_days_ceiling
    {
        return Transition::to(SpotStage::InterleaveDays, skip_days.saturating_mul(2).max(1));
    }

    if evaluation == Evaluation::Poor {
        if skip_days < 2 {
            return Transition::to(SpotStage::Interleave, 1);
        }
        return Transition::to(SpotStage::InterleaveDays, 1);
    }

    if evaluation == Evaluation::Excellent
        && skip_days >= t.skip_days_ceiling
        && elapsed > completed_after
    {
        return Transition::to(SpotStage::Completed, skip_days);
    }

    Transition::to(SpotStage::InterleaveDays, skip_days)
}
