mod config;
mod db;
mod error;
mod executor;
mod logging;
mod models;
mod planner;
mod signals;
mod stage;

use chrono::{DateTime, Utc};
use clap::{Parser, Subcommand};
use serde::Serialize;
use std::time::Duration;

use config::Config;
use db::{Database, NewPiece};
use error::PracticeError;
use executor::{CursorEntry, InterleaveCursor, PlanExecutor, Submission, SubmitOutcome};
use models::{
    Evaluation, Intensity, JsonOutput, PieceStage, PracticeCategory, PracticePlan, PracticeType,
    SpotStage,
};
use planner::{PlanGenerator, PlanRequest};
use signals::{RecordingNotifier, Signal};

#[derive(Parser)]
#[command(name = "woodshed")]
#[command(about = "Plan and track spot practice for the pieces you are learning")]
#[command(version)]
struct Cli {
    /// Output as JSON
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize the database
    Init,

    /// Manage pieces
    #[command(subcommand)]
    Piece(PieceCommands),

    /// Manage spots within a piece
    #[command(subcommand)]
    Spot(SpotCommands),

    /// Create and manage practice plans
    #[command(subcommand)]
    Plan(PlanCommands),

    /// Practice the items of the active plan
    #[command(subcommand)]
    Practice(PracticeCommands),

    /// Show progress of the active plan
    Progress,
}

#[derive(Subcommand)]
enum PieceCommands {
    /// List all pieces
    List,

    /// Add a new piece
    Add {
        /// Piece title
        title: String,

        #[arg(long, short)]
        composer: Option<String>,

        /// Number of measures
        #[arg(long, short)]
        measures: Option<i64>,

        /// Beats per measure
        #[arg(long, short)]
        beats: Option<i64>,

        /// Goal tempo in BPM
        #[arg(long, short)]
        tempo: Option<i64>,
    },

    /// Show piece details and its spots
    Show {
        /// Piece ID
        id: i64,
    },

    /// Set the piece's stage: active/future/completed
    Stage {
        /// Piece ID
        id: i64,

        stage: String,
    },
}

#[derive(Subcommand)]
enum SpotCommands {
    /// Add a spot to a piece
    Add {
        /// Piece ID
        piece_id: i64,

        /// Spot name, e.g. "mm. 12-16"
        name: String,

        /// Starting stage
        #[arg(long, short, default_value = "repeat")]
        stage: String,
    },

    /// List the spots of a piece
    List {
        /// Piece ID
        piece_id: i64,
    },
}

#[derive(Subcommand)]
enum PlanCommands {
    /// Create a new plan from the given pieces (replaces the active plan)
    Create {
        /// Piece IDs
        #[arg(required = true)]
        pieces: Vec<i64>,

        /// Intensity: light/medium/heavy
        #[arg(long, short, default_value = "medium")]
        intensity: String,

        /// Leave out new spots
        #[arg(long)]
        no_new: bool,

        /// Include starting-point practice for each piece
        #[arg(long, short)]
        starting_point: bool,

        /// Include random-spot practice for each piece
        #[arg(long, short)]
        random: bool,
    },

    /// Show a plan (defaults to the active plan)
    Show {
        /// Plan ID
        id: Option<i64>,
    },

    /// List all plans
    List,

    /// Stop the active plan
    Stop,

    /// Make an earlier plan active again
    Resume {
        /// Plan ID
        id: i64,
    },
}

#[derive(Subcommand)]
enum PracticeCommands {
    /// Start an interleave or infrequent session
    Start {
        /// interleave/infrequent
        category: String,

        /// Move on to the next category when this one is done
        #[arg(long)]
        go_on: bool,
    },

    /// Show the current spot of a running session
    Current {
        /// interleave/infrequent
        category: String,
    },

    /// Evaluate the current spot of a running session
    Submit {
        /// interleave/infrequent
        category: String,

        /// Spot ID
        spot_id: i64,

        /// Piece ID
        piece_id: i64,

        /// Evaluation: excellent/fine/poor
        #[arg(long, short)]
        eval: String,
    },

    /// Record repeat practice of a new or extra-repeat spot
    Repeat {
        /// Spot ID
        spot_id: i64,

        /// The repetitions did not succeed
        #[arg(long)]
        failed: bool,

        /// Stage to move to on success
        #[arg(long)]
        to: Option<String>,
    },

    /// Complete a starting-point or random-spots item
    Piece {
        /// Piece ID
        piece_id: i64,

        /// starting_point/random_spots
        #[arg(long = "type", short = 't')]
        practice_type: String,
    },

    /// Mark every remaining item of one practice type as practiced
    CompleteAll {
        /// Practice type, e.g. interleave
        practice_type: String,
    },

    /// Add practice minutes to the plan's session
    Log {
        minutes: i64,
    },
}

#[derive(Serialize)]
struct WithSignals<T: Serialize> {
    result: T,
    signals: Vec<Signal>,
}

fn main() {
    logging::init();
    let cli = Cli::parse();
    let json = cli.json;

    if let Err(e) = run(cli) {
        if json {
            let kind = if let Some(err) = e.downcast_ref::<PracticeError>() {
                err.kind()
            } else if e.downcast_ref::<rusqlite::Error>().is_some() {
                "persistence"
            } else {
                "error"
            };
            match serde_json::to_string(&JsonOutput::<()>::err(e.to_string(), kind)) {
                Ok(out) => println!("{}", out),
                Err(_) => eprintln!("Error: {}", e),
            }
        } else {
            eprintln!("Error: {}", e);
        }
        std::process::exit(1);
    }
}

fn run(cli: Cli) -> Result<(), Box<dyn std::error::Error>> {
    let config = config::load_config(&config::config_path())?;
    let db_path = config::db_path();
    let db = Database::open(&db_path)?;
    db.set_busy_timeout(Duration::from_millis(config.busy_timeout_ms))?;
    let now = Utc::now();

    match cli.command {
        Commands::Init => {
            db.init()?;
            if cli.json {
                print_json(())?;
            } else {
                println!("Database initialized at: {}", db_path.display());
            }
        }
        Commands::Piece(cmd) => piece_command(&db, &config, cmd, cli.json, now)?,
        Commands::Spot(cmd) => spot_command(&db, &config, cmd, cli.json, now)?,
        Commands::Plan(cmd) => plan_command(&db, &config, cmd, cli.json, now)?,
        Commands::Practice(cmd) => practice_command(&db, &config, cmd, cli.json, now)?,
        Commands::Progress => {
            let plan = require_active_plan(&db, &config.user)?;
            let notifier = RecordingNotifier::new();
            let plan_executor = PlanExecutor::new(&db, config.stages, &notifier);
            let progress = plan_executor.plan_progress(&config.user, plan.id)?;
            let reps = db.total_reps(plan.practice_session_id)?;
            let mut by_type = Vec::new();
            for practice_type in PracticeType::ALL {
                let p = plan_executor.category_progress(&config.user, plan.id, practice_type)?;
                if p.total > 0 {
                    by_type.push((practice_type, p));
                }
            }

            if cli.json {
                let categories: Vec<_> = by_type
                    .iter()
                    .map(|(t, p)| {
                        serde_json::json!({
                            "practice_type": t,
                            "completed": p.completed,
                            "total": p.total
                        })
                    })
                    .collect();
                print_json(serde_json::json!({
                    "plan_id": plan.id,
                    "progress": progress,
                    "reps": reps,
                    "categories": categories
                }))?;
            } else {
                println!("=== Plan {} ({}) ===", plan.id, plan.intensity.as_str());
                println!(
                    "Overall: {}/{} ({:.0}%)",
                    progress.completed,
                    progress.total,
                    progress.percent()
                );
                for (t, p) in by_type {
                    println!("  {:<16} {}/{}", t.as_str(), p.completed, p.total);
                }
                println!("Reps this session: {}", reps);
            }
        }
    }

    Ok(())
}

fn piece_command(
    db: &Database,
    config: &Config,
    cmd: PieceCommands,
    json: bool,
    now: DateTime<Utc>,
) -> Result<(), Box<dyn std::error::Error>> {
    let user = config.user.as_str();
    match cmd {
        PieceCommands::List => {
            let pieces = db.list_pieces(user)?;
            if json {
                print_json(&pieces)?;
            } else if pieces.is_empty() {
                println!("No pieces found.");
            } else {
                println!("{:<5} {:<36} {:<20} STAGE", "ID", "TITLE", "COMPOSER");
                println!("{}", "-".repeat(72));
                for piece in pieces {
                    println!(
                        "{:<5} {:<36} {:<20} {}",
                        piece.id,
                        truncate(&piece.title, 34),
                        truncate(piece.composer.as_deref().unwrap_or("-"), 18),
                        piece.stage.as_str()
                    );
                }
            }
        }

        PieceCommands::Add {
            title,
            composer,
            measures,
            beats,
            tempo,
        } => {
            if title.trim().is_empty() {
                return Err(PracticeError::validation("title must not be empty").into());
            }
            for (name, value) in [("measures", measures), ("beats", beats), ("tempo", tempo)] {
                if matches!(value, Some(v) if v <= 0) {
                    return Err(PracticeError::validation(format!("{} must be > 0", name)).into());
                }
            }

            let id = db.add_piece(
                user,
                &NewPiece {
                    title: &title,
                    composer: composer.as_deref(),
                    measures,
                    beats_per_measure: beats,
                    goal_tempo: tempo,
                },
                now,
            )?;

            if json {
                print_json(serde_json::json!({ "id": id, "title": title }))?;
            } else {
                println!("Added piece '{}' with ID: {}", title, id);
            }
        }

        PieceCommands::Show { id } => {
            let piece = db
                .get_piece(user, id)?
                .ok_or_else(|| PracticeError::not_found(format!("piece {}", id)))?;
            let spots = db.list_spots(piece.id)?;
            let counts = db.spot_stage_counts(piece.id)?;

            if json {
                let stage_counts: serde_json::Map<String, serde_json::Value> = counts
                    .iter()
                    .map(|(stage, n)| (stage.as_str().to_string(), (*n).into()))
                    .collect();
                print_json(serde_json::json!({
                    "piece": piece,
                    "spots": spots,
                    "stage_counts": stage_counts
                }))?;
            } else {
                println!("Piece: {}", piece.title);
                println!("ID: {}", piece.id);
                if let Some(composer) = &piece.composer {
                    println!("Composer: {}", composer);
                }
                if let Some(measures) = piece.measures {
                    println!("Measures: {}", measures);
                }
                if let Some(tempo) = piece.goal_tempo {
                    println!("Goal tempo: {} BPM", tempo);
                }
                println!("Stage: {}", piece.stage.as_str());
                if let Some(last) = &piece.last_practiced {
                    println!("Last practiced: {}", last);
                }

                if !counts.is_empty() {
                    println!();
                    println!("--- Spots ---");
                    for stage in SpotStage::ALL {
                        let n = counts
                            .iter()
                            .find(|(s, _)| *s == stage)
                            .map(|(_, n)| *n)
                            .unwrap_or(0);
                        println!("{:<14} {}", stage.label(), n);
                    }
                    println!();
                    print_spots(&spots);
                }
            }
        }

        PieceCommands::Stage { id, stage } => {
            let stage = parse_arg(&stage, "stage", "active, future, or completed", PieceStage::from_str)?;
            let piece = db
                .get_piece(user, id)?
                .ok_or_else(|| PracticeError::not_found(format!("piece {}", id)))?;
            db.set_piece_stage(piece.id, stage)?;

            if json {
                print_json(())?;
            } else {
                println!("'{}' is now {}.", piece.title, stage.as_str());
            }
        }
    }
    Ok(())
}

fn spot_command(
    db: &Database,
    config: &Config,
    cmd: SpotCommands,
    json: bool,
    now: DateTime<Utc>,
) -> Result<(), Box<dyn std::error::Error>> {
    let user = config.user.as_str();
    match cmd {
        SpotCommands::Add {
            piece_id,
            name,
            stage,
        } => {
            let stage = parse_arg(&stage, "stage", STAGE_NAMES, SpotStage::from_str)?;
            if name.trim().is_empty() {
                return Err(PracticeError::validation("spot name must not be empty").into());
            }
            let piece = db
                .get_piece(user, piece_id)?
                .ok_or_else(|| PracticeError::not_found(format!("piece {}", piece_id)))?;
            let id = db.add_spot(piece.id, &name, stage, now)?;

            if json {
                print_json(serde_json::json!({ "id": id, "name": name, "stage": stage }))?;
            } else {
                println!("Added spot '{}' to '{}' with ID: {}", name, piece.title, id);
            }
        }

        SpotCommands::List { piece_id } => {
            let piece = db
                .get_piece(user, piece_id)?
                .ok_or_else(|| PracticeError::not_found(format!("piece {}", piece_id)))?;
            let spots = db.list_spots(piece.id)?;
            if json {
                print_json(&spots)?;
            } else if spots.is_empty() {
                println!("No spots found.");
            } else {
                print_spots(&spots);
            }
        }
    }
    Ok(())
}

fn plan_command(
    db: &Database,
    config: &Config,
    cmd: PlanCommands,
    json: bool,
    now: DateTime<Utc>,
) -> Result<(), Box<dyn std::error::Error>> {
    let user = config.user.as_str();
    let generator = PlanGenerator::new(db, config);
    match cmd {
        PlanCommands::Create {
            pieces,
            intensity,
            no_new,
            starting_point,
            random,
        } => {
            let intensity =
                parse_arg(&intensity, "intensity", "light, medium, or heavy", Intensity::from_str)?;
            let request = PlanRequest {
                piece_ids: pieces,
                intensity,
                new_spots: !no_new,
                starting_point,
                random_single: random,
            };
            let plan = generator.generate(user, &request, now, &mut rand::thread_rng())?;
            print_plan(db, &plan, json)?;
        }

        PlanCommands::Show { id } => {
            let plan = match id {
                Some(id) => db
                    .get_plan(user, id)?
                    .ok_or_else(|| PracticeError::not_found(format!("plan {}", id)))?,
                None => require_active_plan(db, user)?,
            };
            print_plan(db, &plan, json)?;
        }

        PlanCommands::List => {
            let plans = db.list_plans(user)?;
            if json {
                print_json(&plans)?;
            } else if plans.is_empty() {
                println!("No plans found.");
            } else {
                println!("{:<5} {:<18} {:<10} STATUS", "ID", "DATE", "INTENSITY");
                println!("{}", "-".repeat(50));
                for plan in plans {
                    let status = match (plan.active, plan.completed) {
                        (_, true) => "completed",
                        (true, false) => "active",
                        (false, false) => "stopped",
                    };
                    println!(
                        "{:<5} {:<18} {:<10} {}",
                        plan.id,
                        plan.date.format("%Y-%m-%d %H:%M"),
                        plan.intensity.as_str(),
                        status
                    );
                }
            }
        }

        PlanCommands::Stop => {
            let stopped = generator.stop(user)?;
            if json {
                print_json(serde_json::json!({ "stopped": stopped }))?;
            } else if let Some(id) = stopped {
                println!("Stopped plan {}.", id);
            } else {
                println!("No active plan.");
            }
        }

        PlanCommands::Resume { id } => {
            let plan = generator.resume(user, id)?;
            if json {
                print_json(&plan)?;
            } else {
                println!("Plan {} is active again.", plan.id);
            }
        }
    }
    Ok(())
}

fn practice_command(
    db: &Database,
    config: &Config,
    cmd: PracticeCommands,
    json: bool,
    now: DateTime<Utc>,
) -> Result<(), Box<dyn std::error::Error>> {
    let user = config.user.as_str();
    let notifier = RecordingNotifier::new();
    let plan_executor = PlanExecutor::new(db, config.stages, &notifier);

    match cmd {
        PracticeCommands::Start { category, go_on } => {
            let category = parse_category(&category)?;
            let plan = require_active_plan(db, user)?;
            let cursor =
                plan_executor.start_session(user, plan.id, category, go_on, &mut rand::thread_rng())?;
            executor::save_cursor(db, user, &cursor, now)?;

            if json {
                print_json(WithSignals {
                    result: &cursor,
                    signals: notifier.take(),
                })?;
            } else {
                println!(
                    "Started {} session: {} spot(s).",
                    category_label(category),
                    cursor.entries.len()
                );
                print_current(db, user, &cursor)?;
                print_signals(&notifier.take());
            }
        }

        PracticeCommands::Current { category } => {
            let category = parse_category(&category)?;
            let cursor = load_cursor(db, user, category)?;
            if json {
                print_json(&cursor)?;
            } else if let Some(cursor) = cursor {
                print_current(db, user, &cursor)?;
            } else {
                println!("No {} session in progress.", category_label(category));
            }
        }

        PracticeCommands::Submit {
            category,
            spot_id,
            piece_id,
            eval,
        } => {
            let category = parse_category(&category)?;
            let evaluation = parse_arg(&eval, "evaluation", "excellent, fine, or poor", Evaluation::from_str)?;
            let mut cursor = load_cursor(db, user, category)?.ok_or_else(|| {
                PracticeError::state(format!(
                    "no {} session in progress; start one with `woodshed practice start`",
                    category_label(category)
                ))
            })?;

            let result = plan_executor.submit(
                user,
                &mut cursor,
                Submission {
                    spot_id,
                    piece_id,
                    evaluation,
                },
                now,
            );
            executor::save_cursor(db, user, &cursor, now)?;
            let outcome = result?;

            if json {
                print_json(WithSignals {
                    result: &outcome,
                    signals: notifier.take(),
                })?;
            } else {
                match &outcome {
                    SubmitOutcome::Next { transition, .. } => {
                        println!("Spot is now {}.", transition.stage.label());
                        print_current(db, user, &cursor)?;
                    }
                    SubmitOutcome::Finished {
                        transition,
                        category_progress,
                        go_on,
                        ..
                    } => {
                        println!("Spot is now {}.", transition.stage.label());
                        println!(
                            "All {} spots done ({}/{}).",
                            category_label(category),
                            category_progress.completed,
                            category_progress.total
                        );
                        if *go_on {
                            println!("Continue with the next category of your plan.");
                        }
                    }
                }
                print_signals(&notifier.take());
            }
        }

        PracticeCommands::Repeat {
            spot_id,
            failed,
            to,
        } => {
            let spot = db
                .get_spot(user, spot_id)?
                .ok_or_else(|| PracticeError::not_found(format!("spot {}", spot_id)))?;
            let to_stage = match to {
                Some(s) => parse_arg(&s, "stage", STAGE_NAMES, SpotStage::from_str)?,
                None => default_repeat_target(spot.stage),
            };
            let plan = require_active_plan(db, user)?;
            let outcome =
                plan_executor.practice_repeat(user, plan.id, spot.id, !failed, to_stage, now)?;

            if json {
                print_json(WithSignals {
                    result: outcome,
                    signals: notifier.take(),
                })?;
            } else {
                println!("'{}' is now {}.", spot.name, outcome.transition.stage.label());
                print_signals(&notifier.take());
            }
        }

        PracticeCommands::Piece {
            piece_id,
            practice_type,
        } => {
            let practice_type = parse_practice_type(&practice_type)?;
            let plan = require_active_plan(db, user)?;
            let progress = plan_executor.complete_piece(user, plan.id, piece_id, practice_type, now)?;

            if json {
                print_json(WithSignals {
                    result: progress,
                    signals: notifier.take(),
                })?;
            } else {
                println!("Marked {} practice of piece {} done.", practice_type.as_str(), piece_id);
                print_signals(&notifier.take());
            }
        }

        PracticeCommands::CompleteAll { practice_type } => {
            let practice_type = parse_practice_type(&practice_type)?;
            let plan = require_active_plan(db, user)?;
            let done = plan_executor.complete_category(user, plan.id, practice_type, now)?;
            if let Some(category) = PracticeCategory::from_str(practice_type.as_str()) {
                executor::clear_cursor(db, user, category)?;
            }

            if json {
                print_json(WithSignals {
                    result: done,
                    signals: notifier.take(),
                })?;
            } else {
                println!(
                    "Completed {} {} item(s).",
                    done.completed,
                    practice_type.as_str()
                );
                print_signals(&notifier.take());
            }
        }

        PracticeCommands::Log { minutes } => {
            let plan = require_active_plan(db, user)?;
            let session = plan_executor.log_minutes(user, plan.id, minutes)?;
            if json {
                print_json(&session)?;
            } else {
                println!(
                    "Logged {} minute(s); {} minute(s) practiced in this session.",
                    minutes, session.duration_minutes
                );
            }
        }
    }
    Ok(())
}

const STAGE_NAMES: &str = "repeat, extra_repeat, random, interleave, infrequent, or completed";

fn parse_arg<T>(
    value: &str,
    what: &str,
    expected: &str,
    parse: fn(&str) -> Option<T>,
) -> Result<T, PracticeError> {
    parse(value).ok_or_else(|| {
        PracticeError::validation(format!("invalid {} '{}'. Use: {}", what, value, expected))
    })
}

fn parse_category(value: &str) -> Result<PracticeCategory, PracticeError> {
    parse_arg(value, "category", "interleave or infrequent", PracticeCategory::from_str)
}

fn parse_practice_type(value: &str) -> Result<PracticeType, PracticeError> {
    parse_arg(
        value,
        "practice type",
        "new, extra_repeat, interleave, infrequent, random_spots, or starting_point",
        PracticeType::from_str,
    )
}

fn category_label(category: PracticeCategory) -> &'static str {
    match category {
        PracticeCategory::Interleave => "interleave",
        PracticeCategory::InterleaveDays => "infrequent",
    }
}

/// Where a successful repetition moves the spot when `--to` is not given.
fn default_repeat_target(stage: SpotStage) -> SpotStage {
    match stage {
        SpotStage::ExtraRepeat => SpotStage::Interleave,
        _ => SpotStage::Random,
    }
}

fn require_active_plan(db: &Database, user: &str) -> Result<PracticePlan, PracticeError> {
    db.get_active_plan(user)?
        .ok_or_else(|| PracticeError::state("no active plan; create one with `woodshed plan create`"))
}

// An unreadable stored cursor is dropped so the next start begins clean.
fn load_cursor(
    db: &Database,
    user: &str,
    category: PracticeCategory,
) -> Result<Option<InterleaveCursor>, PracticeError> {
    match executor::load_cursor(db, user, category) {
        Err(err @ PracticeError::State(_)) => {
            executor::clear_cursor(db, user, category)?;
            Err(err)
        }
        other => other,
    }
}

fn print_json<T: Serialize>(data: T) -> Result<(), serde_json::Error> {
    println!("{}", serde_json::to_string(&JsonOutput::ok(data))?);
    Ok(())
}

fn print_plan(
    db: &Database,
    plan: &PracticePlan,
    json: bool,
) -> Result<(), Box<dyn std::error::Error>> {
    let spots = db.plan_spots(plan.id)?;
    let pieces = db.plan_pieces(plan.id)?;
    let progress = db.plan_progress(plan.id)?;

    if json {
        print_json(serde_json::json!({
            "plan": plan,
            "spots": spots,
            "pieces": pieces,
            "progress": progress
        }))?;
        return Ok(());
    }

    println!(
        "=== Plan {} ({}, {}) ===",
        plan.id,
        plan.intensity.as_str(),
        plan.date.format("%Y-%m-%d")
    );
    println!("Progress: {}/{}", progress.completed, progress.total);
    if spots.is_empty() && pieces.is_empty() {
        println!("Nothing to practice.");
        return Ok(());
    }
    for item in &spots {
        let reps = db.spot_reps(plan.practice_session_id, item.spot_id)?;
        println!(
            "[{}] {:<16} {:<30} spot {:<5} reps {}",
            if item.completed { "x" } else { " " },
            item.practice_type.as_str(),
            truncate(&item.spot_name, 28),
            item.spot_id,
            reps
        );
    }
    for item in &pieces {
        println!(
            "[{}] {:<16} {:<30} piece {}",
            if item.completed { "x" } else { " " },
            item.practice_type.as_str(),
            truncate(&item.piece_title, 28),
            item.piece_id
        );
    }
    Ok(())
}

fn print_spots(spots: &[models::Spot]) {
    println!("{:<5} {:<28} {:<14} {:<5} LAST PRACTICED", "ID", "NAME", "STAGE", "SKIP");
    println!("{}", "-".repeat(72));
    for spot in spots {
        println!(
            "{:<5} {:<28} {:<14} {:<5} {}",
            spot.id,
            truncate(&spot.name, 26),
            spot.stage.label(),
            spot.skip_days,
            spot.last_practiced
                .map(|t| t.format("%Y-%m-%d").to_string())
                .unwrap_or_else(|| "-".to_string())
        );
    }
}

fn print_current(
    db: &Database,
    user: &str,
    cursor: &InterleaveCursor,
) -> Result<(), PracticeError> {
    let Some(CursorEntry { spot_id, piece_id }) = cursor.current() else {
        println!("Nothing left to practice in this session.");
        return Ok(());
    };
    let spot = db
        .get_spot(user, spot_id)?
        .ok_or_else(|| PracticeError::not_found(format!("spot {}", spot_id)))?;
    let title = db
        .get_piece(user, piece_id)?
        .map(|p| p.title)
        .unwrap_or_default();

    println!();
    println!("Now: '{}' from '{}' ({} left)", spot.name, title, cursor.remaining());
    println!(
        "  woodshed practice submit {} {} {} --eval <excellent|fine|poor>",
        category_label(cursor.category),
        spot_id,
        piece_id
    );
    Ok(())
}

fn print_signals(signals: &[Signal]) {
    for signal in signals {
        match signal {
            Signal::Alert {
                title,
                message,
                severity,
                ..
            } => println!("[{}] {}: {}", severity.as_str(), title, message),
            Signal::Progress { completed, total } => {
                println!("Plan progress: {}/{}", completed, total)
            }
            Signal::SessionFinished { category } => {
                println!("{} session finished.", category_label(*category))
            }
        }
    }
}

fn truncate(s: &str, max_len: usize) -> String {
    if s.chars().count() <= max_len {
        s.to_string()
    } else {
        let head: String = s.chars().take(max_len.saturating_sub(3)).collect();
        format!("{}...", head)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;

    mod truncate_tests {
        use super::*;

        #[test]
        fn truncate_short_string() {
            assert_eq!(truncate("hello", 10), "hello");
        }

        #[test]
        fn truncate_exact_length() {
            assert_eq!(truncate("hello", 5), "hello");
        }

        #[test]
        fn truncate_long_string() {
            assert_eq!(truncate("hello world", 8), "hello...");
        }

        #[test]
        fn truncate_empty_string() {
            assert_eq!(truncate("", 10), "");
        }

        #[test]
        fn truncate_multibyte() {
            assert_eq!(truncate("Dvořák Humoreske", 7), "Dvoř...");
        }
    }

    mod cli_parsing_tests {
        use super::*;

        #[test]
        fn parse_init_with_json() {
            let cli = Cli::try_parse_from(["woodshed", "--json", "init"]).unwrap();
            assert!(cli.json);
            assert!(matches!(cli.command, Commands::Init));
        }

        #[test]
        fn parse_piece_add_full() {
            let cli = Cli::try_parse_from([
                "woodshed", "piece", "add", "Ballade No. 1", "-c", "Chopin", "-m", "264", "-t",
                "66",
            ])
            .unwrap();
            match cli.command {
                Commands::Piece(PieceCommands::Add {
                    title,
                    composer,
                    measures,
                    beats,
                    tempo,
                }) => {
                    assert_eq!(title, "Ballade No. 1");
                    assert_eq!(composer, Some("Chopin".to_string()));
                    assert_eq!(measures, Some(264));
                    assert!(beats.is_none());
                    assert_eq!(tempo, Some(66));
                }
                _ => panic!("Expected Piece Add command"),
            }
        }

        #[test]
        fn parse_spot_add_default_stage() {
            let cli = Cli::try_parse_from(["woodshed", "spot", "add", "3", "mm. 12-16"]).unwrap();
            match cli.command {
                Commands::Spot(SpotCommands::Add {
                    piece_id,
                    name,
                    stage,
                }) => {
                    assert_eq!(piece_id, 3);
                    assert_eq!(name, "mm. 12-16");
                    assert_eq!(stage, "repeat");
                }
                _ => panic!("Expected Spot Add command"),
            }
        }

        #[test]
        fn parse_plan_create() {
            let cli = Cli::try_parse_from([
                "woodshed", "plan", "create", "1", "2", "-i", "heavy", "--no-new", "-s",
            ])
            .unwrap();
            match cli.command {
                Commands::Plan(PlanCommands::Create {
                    pieces,
                    intensity,
                    no_new,
                    starting_point,
                    random,
                }) => {
                    assert_eq!(pieces, vec![1, 2]);
                    assert_eq!(intensity, "heavy");
                    assert!(no_new);
                    assert!(starting_point);
                    assert!(!random);
                }
                _ => panic!("Expected Plan Create command"),
            }
        }

        #[test]
        fn parse_plan_create_requires_pieces() {
            assert!(Cli::try_parse_from(["woodshed", "plan", "create"]).is_err());
        }

        #[test]
        fn parse_plan_show_optional_id() {
            let cli = Cli::try_parse_from(["woodshed", "plan", "show"]).unwrap();
            assert!(matches!(
                cli.command,
                Commands::Plan(PlanCommands::Show { id: None })
            ));
            let cli = Cli::try_parse_from(["woodshed", "plan", "show", "4"]).unwrap();
            assert!(matches!(
                cli.command,
                Commands::Plan(PlanCommands::Show { id: Some(4) })
            ));
        }

        #[test]
        fn parse_practice_submit() {
            let cli = Cli::try_parse_from([
                "woodshed",
                "practice",
                "submit",
                "infrequent",
                "7",
                "2",
                "--eval",
                "excellent",
            ])
            .unwrap();
            match cli.command {
                Commands::Practice(PracticeCommands::Submit {
                    category,
                    spot_id,
                    piece_id,
                    eval,
                }) => {
                    assert_eq!(category, "infrequent");
                    assert_eq!(spot_id, 7);
                    assert_eq!(piece_id, 2);
                    assert_eq!(eval, "excellent");
                }
                _ => panic!("Expected Practice Submit command"),
            }
        }

        #[test]
        fn parse_practice_submit_requires_eval() {
            let result =
                Cli::try_parse_from(["woodshed", "practice", "submit", "interleave", "7", "2"]);
            assert!(result.is_err());
        }

        #[test]
        fn parse_practice_repeat() {
            let cli = Cli::try_parse_from([
                "woodshed", "practice", "repeat", "5", "--failed", "--to", "extra_repeat",
            ])
            .unwrap();
            match cli.command {
                Commands::Practice(PracticeCommands::Repeat {
                    spot_id,
                    failed,
                    to,
                }) => {
                    assert_eq!(spot_id, 5);
                    assert!(failed);
                    assert_eq!(to, Some("extra_repeat".to_string()));
                }
                _ => panic!("Expected Practice Repeat command"),
            }
        }

        #[test]
        fn parse_practice_piece_and_complete_all() {
            let cli = Cli::try_parse_from([
                "woodshed", "practice", "piece", "1", "--type", "starting_point",
            ])
            .unwrap();
            assert!(matches!(
                cli.command,
                Commands::Practice(PracticeCommands::Piece { piece_id: 1, .. })
            ));

            let cli =
                Cli::try_parse_from(["woodshed", "practice", "complete-all", "interleave"]).unwrap();
            assert!(matches!(
                cli.command,
                Commands::Practice(PracticeCommands::CompleteAll { .. })
            ));
        }

        #[test]
        fn parse_json_flag_global() {
            let cli = Cli::try_parse_from(["woodshed", "progress", "--json"]).unwrap();
            assert!(cli.json);
            assert!(matches!(cli.command, Commands::Progress));
        }

        #[test]
        fn parse_invalid_command_fails() {
            assert!(Cli::try_parse_from(["woodshed", "invalid"]).is_err());
        }
    }

    mod arg_tests {
        use super::*;

        #[test]
        fn category_aliases() {
            assert_eq!(
                parse_category("infrequent").unwrap(),
                PracticeCategory::InterleaveDays
            );
            assert_eq!(
                parse_category("Interleave").unwrap(),
                PracticeCategory::Interleave
            );
        }

        #[test]
        fn bad_value_is_validation_error() {
            let err = parse_category("scales").unwrap_err();
            assert_eq!(err.kind(), "validation");
            assert!(err.to_string().contains("scales"));

            let err = parse_practice_type("etude").unwrap_err();
            assert_eq!(err.kind(), "validation");
        }

        #[test]
        fn repeat_targets() {
            assert_eq!(default_repeat_target(SpotStage::Repeat), SpotStage::Random);
            assert_eq!(
                default_repeat_target(SpotStage::ExtraRepeat),
                SpotStage::Interleave
            );
        }
    }
}
