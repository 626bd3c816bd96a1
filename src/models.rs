use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// Aggregate stage of a piece in the user's repertoire
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PieceStage {
    Active,
    Future,
    Completed,
}

impl PieceStage {
    pub fn as_str(&self) -> &'static str {
        match self {
            PieceStage::Active => "active",
            PieceStage::Future => "future",
            PieceStage::Completed => "completed",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "active" => Some(PieceStage::Active),
            "future" => Some(PieceStage::Future),
            "completed" | "done" => Some(PieceStage::Completed),
            _ => None,
        }
    }
}

/// Position of a spot in the practice lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SpotStage {
    Repeat,
    ExtraRepeat,
    Random,
    Interleave,
    InterleaveDays,
    Completed,
}

impl SpotStage {
    pub const ALL: [SpotStage; 6] = [
        SpotStage::Repeat,
        SpotStage::ExtraRepeat,
        SpotStage::Random,
        SpotStage::Interleave,
        SpotStage::InterleaveDays,
        SpotStage::Completed,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            SpotStage::Repeat => "repeat",
            SpotStage::ExtraRepeat => "extra_repeat",
            SpotStage::Random => "random",
            SpotStage::Interleave => "interleave",
            SpotStage::InterleaveDays => "interleave_days",
            SpotStage::Completed => "completed",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().replace('-', "_").as_str() {
            "repeat" => Some(SpotStage::Repeat),
            "extra_repeat" => Some(SpotStage::ExtraRepeat),
            "random" => Some(SpotStage::Random),
            "interleave" => Some(SpotStage::Interleave),
            "interleave_days" | "infrequent" => Some(SpotStage::InterleaveDays),
            "completed" => Some(SpotStage::Completed),
            _ => None,
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            SpotStage::Repeat => "Repeat",
            SpotStage::ExtraRepeat => "Extra Repeat",
            SpotStage::Random => "Random",
            SpotStage::Interleave => "Interleave",
            SpotStage::InterleaveDays => "Infrequent",
            SpotStage::Completed => "Completed",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Evaluation {
    Excellent,
    Fine,
    Poor,
}

impl Evaluation {
    pub fn as_str(&self) -> &'static str {
        match self {
            Evaluation::Excellent => "excellent",
            Evaluation::Fine => "fine",
            Evaluation::Poor => "poor",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "excellent" | "e" | "great" | "3" => Some(Evaluation::Excellent),
            "fine" | "f" | "ok" | "2" => Some(Evaluation::Fine),
            "poor" | "p" | "bad" | "1" => Some(Evaluation::Poor),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Intensity {
    Light,
    Medium,
    Heavy,
}

impl Intensity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Intensity::Light => "light",
            Intensity::Medium => "medium",
            Intensity::Heavy => "heavy",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "light" | "l" => Some(Intensity::Light),
            "medium" | "m" => Some(Intensity::Medium),
            "heavy" | "h" => Some(Intensity::Heavy),
            _ => None,
        }
    }

    /// How many repeat-stage spots per piece are sampled as new spots.
    pub fn new_spots_per_piece(&self) -> usize {
        match self {
            Intensity::Light => 1,
            Intensity::Medium => 2,
            Intensity::Heavy => 3,
        }
    }
}

/// Tag carried by every plan item, telling how the item is practiced.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PracticeType {
    New,
    ExtraRepeat,
    Interleave,
    InterleaveDays,
    RandomSpots,
    StartingPoint,
}

impl PracticeType {
    pub const ALL: [PracticeType; 6] = [
        PracticeType::New,
        PracticeType::ExtraRepeat,
        PracticeType::Interleave,
        PracticeType::InterleaveDays,
        PracticeType::RandomSpots,
        PracticeType::StartingPoint,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            PracticeType::New => "new",
            PracticeType::ExtraRepeat => "extra_repeat",
            PracticeType::Interleave => "interleave",
            PracticeType::InterleaveDays => "interleave_days",
            PracticeType::RandomSpots => "random_spots",
            PracticeType::StartingPoint => "starting_point",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().replace('-', "_").as_str() {
            "new" => Some(PracticeType::New),
            "extra_repeat" => Some(PracticeType::ExtraRepeat),
            "interleave" => Some(PracticeType::Interleave),
            "interleave_days" | "infrequent" => Some(PracticeType::InterleaveDays),
            "random_spots" | "random" => Some(PracticeType::RandomSpots),
            "starting_point" => Some(PracticeType::StartingPoint),
            _ => None,
        }
    }

    /// Piece items are whole-piece practice; everything else targets a spot.
    pub fn is_piece_item(&self) -> bool {
        matches!(self, PracticeType::RandomSpots | PracticeType::StartingPoint)
    }
}

/// Plan categories that are driven through an interactive cursor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PracticeCategory {
    Interleave,
    InterleaveDays,
}

impl PracticeCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            PracticeCategory::Interleave => "interleave",
            PracticeCategory::InterleaveDays => "interleave_days",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().replace('-', "_").as_str() {
            "interleave" => Some(PracticeCategory::Interleave),
            "interleave_days" | "infrequent" => Some(PracticeCategory::InterleaveDays),
            _ => None,
        }
    }

    pub fn practice_type(&self) -> PracticeType {
        match self {
            PracticeCategory::Interleave => PracticeType::Interleave,
            PracticeCategory::InterleaveDays => PracticeType::InterleaveDays,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Piece {
    pub id: i64,
    pub user_id: String,
    pub title: String,
    pub composer: Option<String>,
    pub measures: Option<i64>,
    pub beats_per_measure: Option<i64>,
    pub goal_tempo: Option<i64>,
    pub stage: PieceStage,
    pub last_practiced: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Spot {
    pub id: i64,
    pub piece_id: i64,
    pub name: String,
    pub idx: i64,
    pub stage: SpotStage,
    pub skip_days: i64,
    pub stage_started: DateTime<Utc>,
    pub last_practiced: Option<DateTime<Utc>>,
}

impl Spot {
    pub fn practiced_within(&self, now: DateTime<Utc>, window: chrono::Duration) -> bool {
        self.last_practiced
            .map(|last| now.signed_duration_since(last) < window)
            .unwrap_or(false)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PracticePlan {
    pub id: i64,
    pub user_id: String,
    pub intensity: Intensity,
    pub date: DateTime<Utc>,
    pub completed: bool,
    pub active: bool,
    pub practice_session_id: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlanPieceItem {
    pub plan_id: i64,
    pub piece_id: i64,
    pub piece_title: String,
    pub practice_type: PracticeType,
    pub idx: i64,
    pub completed: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlanSpotItem {
    pub plan_id: i64,
    pub spot_id: i64,
    pub piece_id: i64,
    pub spot_name: String,
    pub practice_type: PracticeType,
    pub evaluation: Option<Evaluation>,
    pub idx: i64,
    pub completed: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PracticeSession {
    pub id: i64,
    pub user_id: String,
    pub duration_minutes: i64,
    pub date: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlanProgress {
    pub completed: i64,
    pub total: i64,
}

impl PlanProgress {
    pub fn is_complete(&self) -> bool {
        self.total > 0 && self.completed >= self.total
    }

    pub fn percent(&self) -> f64 {
        if self.total == 0 {
            0.0
        } else {
            (self.completed as f64 / self.total as f64) * 100.0
        }
    }
}

// JSON output wrapper for CLI
#[derive(Debug, Serialize)]
pub struct JsonOutput<T: Serialize> {
    pub success: bool,
    pub data: Option<T>,
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub kind: Option<&'static str>,
}

impl<T: Serialize> JsonOutput<T> {
    pub fn ok(data: T) -> Self {
        Self {
            success: true,
            data: Some(data),
            error: None,
            kind: None,
        }
    }

    pub fn err(msg: impl Into<String>, kind: &'static str) -> Self {
        Self {
            success: false,
            data: None,
            error: Some(msg.into()),
            kind: Some(kind),
        }
    }
}
