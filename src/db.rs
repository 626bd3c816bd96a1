use chrono::{DateTime, Utc};
use rusqlite::types::Type;
use rusqlite::{params, Connection, OptionalExtension, Result, Row, Transaction};
use std::path::Path;
use std::time::Duration;

use crate::models::{
    Evaluation, Intensity, Piece, PieceStage, PlanPieceItem, PlanProgress, PlanSpotItem,
    PracticePlan, PracticeSession, PracticeType, Spot, SpotStage,
};
use crate::stage::Transition;

const SCHEMA_VERSION: i32 = 1;

const PIECE_COLUMNS: &str = "p.id, p.user_id, p.title, p.composer, p.measures, \
     p.beats_per_measure, p.goal_tempo, p.stage, p.last_practiced, p.created_at";

const SPOT_COLUMNS: &str =
    "s.id, s.piece_id, s.name, s.idx, s.stage, s.skip_days, s.stage_started, s.last_practiced";

const PLAN_COLUMNS: &str =
    "id, user_id, intensity, date, completed, active, practice_session_id";

const PLAN_SPOT_COLUMNS: &str = "ps.plan_id, ps.spot_id, s.piece_id, s.name, ps.practice_type, \
     ps.evaluation, ps.idx, ps.completed";

const PLAN_PIECE_COLUMNS: &str =
    "pp.plan_id, pp.piece_id, p.title, pp.practice_type, pp.idx, pp.completed";

/// Fields accepted when adding a piece.
#[derive(Debug, Clone, Default)]
pub struct NewPiece<'a> {
    pub title: &'a str,
    pub composer: Option<&'a str>,
    pub measures: Option<i64>,
    pub beats_per_measure: Option<i64>,
    pub goal_tempo: Option<i64>,
}

pub struct Database {
    conn: Connection,
}

impl Database {
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let conn = Connection::open(path)?;
        conn.execute_batch("PRAGMA foreign_keys = ON;")?;
        Ok(Self { conn })
    }

    pub fn set_busy_timeout(&self, timeout: Duration) -> Result<()> {
        self.conn.busy_timeout(timeout)
    }

    pub fn init(&self) -> Result<()> {
        self.conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS pieces (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                user_id TEXT NOT NULL,
                title TEXT NOT NULL,
                composer TEXT,
                measures INTEGER,
                beats_per_measure INTEGER,
                goal_tempo INTEGER,
                stage TEXT NOT NULL DEFAULT 'active' CHECK(stage IN ('active', 'future', 'completed')),
                last_practiced TEXT,
                created_at TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS spots (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                piece_id INTEGER NOT NULL,
                name TEXT NOT NULL,
                idx INTEGER NOT NULL,
                stage TEXT NOT NULL DEFAULT 'repeat' CHECK(stage IN ('repeat', 'extra_repeat', 'random', 'interleave', 'interleave_days', 'completed')),
                skip_days INTEGER NOT NULL DEFAULT 1 CHECK(skip_days >= 0),
                stage_started TEXT NOT NULL,
                last_practiced TEXT,
                FOREIGN KEY (piece_id) REFERENCES pieces(id) ON DELETE CASCADE
            );

            CREATE TABLE IF NOT EXISTS practice_sessions (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                user_id TEXT NOT NULL,
                duration_minutes INTEGER NOT NULL DEFAULT 0,
                date TEXT NOT NULL
            );

            -- Reps per spot within one practice session
            CREATE TABLE IF NOT EXISTS practice_spot_reps (
                session_id INTEGER NOT NULL,
                spot_id INTEGER NOT NULL,
                reps INTEGER NOT NULL DEFAULT 1,
                PRIMARY KEY (session_id, spot_id),
                FOREIGN KEY (session_id) REFERENCES practice_sessions(id) ON DELETE CASCADE,
                FOREIGN KEY (spot_id) REFERENCES spots(id) ON DELETE CASCADE
            );

            CREATE TABLE IF NOT EXISTS practice_plans (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                user_id TEXT NOT NULL,
                intensity TEXT NOT NULL CHECK(intensity IN ('light', 'medium', 'heavy')),
                date TEXT NOT NULL,
                completed INTEGER NOT NULL DEFAULT 0,
                active INTEGER NOT NULL DEFAULT 1,
                practice_session_id INTEGER NOT NULL,
                FOREIGN KEY (practice_session_id) REFERENCES practice_sessions(id)
            );

            CREATE TABLE IF NOT EXISTS practice_plan_pieces (
                plan_id INTEGER NOT NULL,
                piece_id INTEGER NOT NULL,
                practice_type TEXT NOT NULL CHECK(practice_type IN ('random_spots', 'starting_point')),
                idx INTEGER NOT NULL,
                completed INTEGER NOT NULL DEFAULT 0,
                PRIMARY KEY (plan_id, piece_id, practice_type),
                FOREIGN KEY (plan_id) REFERENCES practice_plans(id) ON DELETE CASCADE,
                FOREIGN KEY (piece_id) REFERENCES pieces(id) ON DELETE CASCADE
            );

            CREATE TABLE IF NOT EXISTS practice_plan_spots (
                plan_id INTEGER NOT NULL,
                spot_id INTEGER NOT NULL,
                practice_type TEXT NOT NULL CHECK(practice_type IN ('new', 'extra_repeat', 'interleave', 'interleave_days')),
                evaluation TEXT CHECK(evaluation IN ('excellent', 'fine', 'poor')),
                idx INTEGER NOT NULL,
                completed INTEGER NOT NULL DEFAULT 0,
                PRIMARY KEY (plan_id, spot_id, practice_type),
                FOREIGN KEY (plan_id) REFERENCES practice_plans(id) ON DELETE CASCADE,
                FOREIGN KEY (spot_id) REFERENCES spots(id) ON DELETE CASCADE
            );

            -- Small per-user values that outlive one CLI invocation
            CREATE TABLE IF NOT EXISTS session_state (
                key TEXT PRIMARY KEY,
                value TEXT NOT NULL,
                updated_at TEXT NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_pieces_user ON pieces(user_id);
            CREATE INDEX IF NOT EXISTS idx_spots_piece ON spots(piece_id);
            CREATE INDEX IF NOT EXISTS idx_spots_stage ON spots(stage);
            CREATE INDEX IF NOT EXISTS idx_plans_user ON practice_plans(user_id);
            CREATE UNIQUE INDEX IF NOT EXISTS idx_plans_one_active
                ON practice_plans(user_id) WHERE active = 1;
            CREATE INDEX IF NOT EXISTS idx_plan_spots_type ON practice_plan_spots(plan_id, practice_type);
            CREATE INDEX IF NOT EXISTS idx_plan_pieces_type ON practice_plan_pieces(plan_id, practice_type);
            "#,
        )?;

        self.migrate()?;

        Ok(())
    }

    fn migrate(&self) -> Result<()> {
        let version: i32 = self
            .conn
            .query_row("PRAGMA user_version", [], |row| row.get(0))?;

        if version < SCHEMA_VERSION {
            self.conn
                .execute_batch(&format!("PRAGMA user_version = {};", SCHEMA_VERSION))?;
        }

        Ok(())
    }

    /// Everything executed on this database until the returned transaction is
    /// committed is rolled back if it is dropped instead.
    pub fn begin(&self) -> Result<Transaction<'_>> {
        self.conn.unchecked_transaction()
    }

    // Piece operations
    pub fn add_piece(&self, user_id: &str, piece: &NewPiece<'_>, now: DateTime<Utc>) -> Result<i64> {
        self.conn.execute(
            r#"
            INSERT INTO pieces (user_id, title, composer, measures, beats_per_measure, goal_tempo, created_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
            "#,
            params![
                user_id,
                piece.title,
                piece.composer,
                piece.measures,
                piece.beats_per_measure,
                piece.goal_tempo,
                now
            ],
        )?;
        Ok(self.conn.last_insert_rowid())
    }

    pub fn get_piece(&self, user_id: &str, id: i64) -> Result<Option<Piece>> {
        self.conn
            .query_row(
                &format!(
                    "SELECT {} FROM pieces p WHERE p.id = ?1 AND p.user_id = ?2",
                    PIECE_COLUMNS
                ),
                params![id, user_id],
                piece_from_row,
            )
            .optional()
    }

    pub fn list_pieces(&self, user_id: &str) -> Result<Vec<Piece>> {
        let mut stmt = self.conn.prepare(&format!(
            "SELECT {} FROM pieces p WHERE p.user_id = ?1 ORDER BY p.title",
            PIECE_COLUMNS
        ))?;
        let rows = stmt.query_map(params![user_id], piece_from_row)?;
        rows.collect()
    }

    pub fn set_piece_stage(&self, piece_id: i64, stage: PieceStage) -> Result<()> {
        self.conn.execute(
            "UPDATE pieces SET stage = ?1 WHERE id = ?2",
            params![stage.as_str(), piece_id],
        )?;
        Ok(())
    }

    pub fn touch_piece(&self, piece_id: i64, now: DateTime<Utc>) -> Result<()> {
        self.conn.execute(
            "UPDATE pieces SET last_practiced = ?1 WHERE id = ?2",
            params![now, piece_id],
        )?;
        Ok(())
    }

    // Spot operations
    pub fn add_spot(
        &self,
        piece_id: i64,
        name: &str,
        stage: SpotStage,
        stage_started: DateTime<Utc>,
    ) -> Result<i64> {
        let max_idx: Option<i64> = self.conn.query_row(
            "SELECT MAX(idx) FROM spots WHERE piece_id = ?1",
            params![piece_id],
            |row| row.get(0),
        )?;

        self.conn.execute(
            r#"
            INSERT INTO spots (piece_id, name, idx, stage, stage_started)
            VALUES (?1, ?2, ?3, ?4, ?5)
            "#,
            params![
                piece_id,
                name,
                next_index(max_idx),
                stage.as_str(),
                stage_started
            ],
        )?;
        Ok(self.conn.last_insert_rowid())
    }

    pub fn get_spot(&self, user_id: &str, spot_id: i64) -> Result<Option<Spot>> {
        self.conn
            .query_row(
                &format!(
                    r#"
                    SELECT {}
                    FROM spots s
                    JOIN pieces p ON p.id = s.piece_id
                    WHERE s.id = ?1 AND p.user_id = ?2
                    "#,
                    SPOT_COLUMNS
                ),
                params![spot_id, user_id],
                spot_from_row,
            )
            .optional()
    }

    pub fn list_spots(&self, piece_id: i64) -> Result<Vec<Spot>> {
        let mut stmt = self.conn.prepare(&format!(
            "SELECT {} FROM spots s WHERE s.piece_id = ?1 ORDER BY s.idx",
            SPOT_COLUMNS
        ))?;
        let rows = stmt.query_map(params![piece_id], spot_from_row)?;
        rows.collect()
    }

    pub fn spot_stage_counts(&self, piece_id: i64) -> Result<Vec<(SpotStage, i64)>> {
        let mut stmt = self.conn.prepare(
            "SELECT stage, COUNT(*) FROM spots WHERE piece_id = ?1 GROUP BY stage ORDER BY stage",
        )?;
        let rows = stmt.query_map(params![piece_id], |row| {
            let stage: String = row.get(0)?;
            Ok((parse_enum(0, &stage, SpotStage::from_str)?, row.get(1)?))
        })?;
        rows.collect()
    }

    /// Stores the outcome of a stage transition. `stage_started` moves only
    /// when the stage changed; `last_practiced` only when practice was recorded.
    pub fn apply_transition(
        &self,
        spot_id: i64,
        from: SpotStage,
        transition: &Transition,
        now: DateTime<Utc>,
    ) -> Result<()> {
        self.conn.execute(
            r#"
            UPDATE spots
            SET stage = ?1,
                skip_days = ?2,
                stage_started = CASE WHEN ?3 THEN ?4 ELSE stage_started END,
                last_practiced = CASE WHEN ?5 THEN ?4 ELSE last_practiced END
            WHERE id = ?6
            "#,
            params![
                transition.stage.as_str(),
                transition.skip_days,
                transition.changes_stage(from),
                now,
                transition.record_practiced,
                spot_id
            ],
        )?;
        Ok(())
    }

    // Practice session operations
    pub fn create_practice_session(&self, user_id: &str, now: DateTime<Utc>) -> Result<i64> {
        self.conn.execute(
            "INSERT INTO practice_sessions (user_id, date) VALUES (?1, ?2)",
            params![user_id, now],
        )?;
        Ok(self.conn.last_insert_rowid())
    }

    pub fn extend_practice_session(&self, session_id: i64, minutes: i64) -> Result<()> {
        self.conn.execute(
            "UPDATE practice_sessions SET duration_minutes = duration_minutes + ?1 WHERE id = ?2",
            params![minutes, session_id],
        )?;
        Ok(())
    }

    pub fn get_practice_session(&self, session_id: i64) -> Result<Option<PracticeSession>> {
        self.conn
            .query_row(
                "SELECT id, user_id, duration_minutes, date FROM practice_sessions WHERE id = ?1",
                params![session_id],
                |row| {
                    Ok(PracticeSession {
                        id: row.get(0)?,
                        user_id: row.get(1)?,
                        duration_minutes: row.get(2)?,
                        date: row.get(3)?,
                    })
                },
            )
            .optional()
    }

    pub fn record_spot_rep(&self, session_id: i64, spot_id: i64) -> Result<()> {
        self.conn.execute(
            r#"
            INSERT INTO practice_spot_reps (session_id, spot_id, reps) VALUES (?1, ?2, 1)
            ON CONFLICT(session_id, spot_id) DO UPDATE SET reps = reps + 1
            "#,
            params![session_id, spot_id],
        )?;
        Ok(())
    }

    pub fn spot_reps(&self, session_id: i64, spot_id: i64) -> Result<i64> {
        let reps: Option<i64> = self
            .conn
            .query_row(
                "SELECT reps FROM practice_spot_reps WHERE session_id = ?1 AND spot_id = ?2",
                params![session_id, spot_id],
                |row| row.get(0),
            )
            .optional()?;
        Ok(reps.unwrap_or(0))
    }

    pub fn total_reps(&self, session_id: i64) -> Result<i64> {
        self.conn.query_row(
            "SELECT COALESCE(SUM(reps), 0) FROM practice_spot_reps WHERE session_id = ?1",
            params![session_id],
            |row| row.get(0),
        )
    }

    // Plan operations
    pub fn insert_plan(
        &self,
        user_id: &str,
        intensity: Intensity,
        session_id: i64,
        now: DateTime<Utc>,
    ) -> Result<i64> {
        self.conn.execute(
            r#"
            INSERT INTO practice_plans (user_id, intensity, date, practice_session_id)
            VALUES (?1, ?2, ?3, ?4)
            "#,
            params![user_id, intensity.as_str(), now, session_id],
        )?;
        Ok(self.conn.last_insert_rowid())
    }

    pub fn get_plan(&self, user_id: &str, plan_id: i64) -> Result<Option<PracticePlan>> {
        self.conn
            .query_row(
                &format!(
                    "SELECT {} FROM practice_plans WHERE id = ?1 AND user_id = ?2",
                    PLAN_COLUMNS
                ),
                params![plan_id, user_id],
                plan_from_row,
            )
            .optional()
    }

    pub fn get_active_plan(&self, user_id: &str) -> Result<Option<PracticePlan>> {
        self.conn
            .query_row(
                &format!(
                    "SELECT {} FROM practice_plans WHERE user_id = ?1 AND active = 1",
                    PLAN_COLUMNS
                ),
                params![user_id],
                plan_from_row,
            )
            .optional()
    }

    pub fn list_plans(&self, user_id: &str) -> Result<Vec<PracticePlan>> {
        let mut stmt = self.conn.prepare(&format!(
            "SELECT {} FROM practice_plans WHERE user_id = ?1 ORDER BY date DESC, id DESC",
            PLAN_COLUMNS
        ))?;
        let rows = stmt.query_map(params![user_id], plan_from_row)?;
        rows.collect()
    }

    pub fn deactivate_plans(&self, user_id: &str) -> Result<usize> {
        self.conn.execute(
            "UPDATE practice_plans SET active = 0 WHERE user_id = ?1 AND active = 1",
            params![user_id],
        )
    }

    pub fn activate_plan(&self, plan_id: i64) -> Result<()> {
        self.conn.execute(
            "UPDATE practice_plans SET active = 1 WHERE id = ?1",
            params![plan_id],
        )?;
        Ok(())
    }

    pub fn mark_plan_completed(&self, plan_id: i64) -> Result<bool> {
        let rows = self.conn.execute(
            "UPDATE practice_plans SET completed = 1 WHERE id = ?1 AND completed = 0",
            params![plan_id],
        )?;
        Ok(rows > 0)
    }

    // Plan item operations
    pub fn max_plan_piece_idx(&self, plan_id: i64) -> Result<Option<i64>> {
        self.conn.query_row(
            "SELECT MAX(idx) FROM practice_plan_pieces WHERE plan_id = ?1",
            params![plan_id],
            |row| row.get(0),
        )
    }

    pub fn max_plan_spot_idx(&self, plan_id: i64) -> Result<Option<i64>> {
        self.conn.query_row(
            "SELECT MAX(idx) FROM practice_plan_spots WHERE plan_id = ?1",
            params![plan_id],
            |row| row.get(0),
        )
    }

    pub fn add_plan_piece(
        &self,
        plan_id: i64,
        piece_id: i64,
        practice_type: PracticeType,
        idx: i64,
    ) -> Result<()> {
        self.conn.execute(
            r#"
            INSERT INTO practice_plan_pieces (plan_id, piece_id, practice_type, idx)
            VALUES (?1, ?2, ?3, ?4)
            "#,
            params![plan_id, piece_id, practice_type.as_str(), idx],
        )?;
        Ok(())
    }

    pub fn add_plan_spot(
        &self,
        plan_id: i64,
        spot_id: i64,
        practice_type: PracticeType,
        idx: i64,
    ) -> Result<()> {
        self.conn.execute(
            r#"
            INSERT INTO practice_plan_spots (plan_id, spot_id, practice_type, idx)
            VALUES (?1, ?2, ?3, ?4)
            "#,
            params![plan_id, spot_id, practice_type.as_str(), idx],
        )?;
        Ok(())
    }

    pub fn plan_spots(&self, plan_id: i64) -> Result<Vec<PlanSpotItem>> {
        let mut stmt = self.conn.prepare(&format!(
            r#"
            SELECT {}
            FROM practice_plan_spots ps
            JOIN spots s ON s.id = ps.spot_id
            WHERE ps.plan_id = ?1
            ORDER BY ps.idx
            "#,
            PLAN_SPOT_COLUMNS
        ))?;
        let rows = stmt.query_map(params![plan_id], plan_spot_from_row)?;
        rows.collect()
    }

    pub fn incomplete_plan_spots(
        &self,
        plan_id: i64,
        practice_type: PracticeType,
    ) -> Result<Vec<PlanSpotItem>> {
        let mut stmt = self.conn.prepare(&format!(
            r#"
            SELECT {}
            FROM practice_plan_spots ps
            JOIN spots s ON s.id = ps.spot_id
            WHERE ps.plan_id = ?1 AND ps.practice_type = ?2 AND ps.completed = 0
            ORDER BY ps.idx
            "#,
            PLAN_SPOT_COLUMNS
        ))?;
        let rows = stmt.query_map(params![plan_id, practice_type.as_str()], plan_spot_from_row)?;
        rows.collect()
    }

    pub fn get_plan_spot(
        &self,
        plan_id: i64,
        spot_id: i64,
        practice_type: PracticeType,
    ) -> Result<Option<PlanSpotItem>> {
        self.conn
            .query_row(
                &format!(
                    r#"
                    SELECT {}
                    FROM practice_plan_spots ps
                    JOIN spots s ON s.id = ps.spot_id
                    WHERE ps.plan_id = ?1 AND ps.spot_id = ?2 AND ps.practice_type = ?3
                    "#,
                    PLAN_SPOT_COLUMNS
                ),
                params![plan_id, spot_id, practice_type.as_str()],
                plan_spot_from_row,
            )
            .optional()
    }

    /// Returns false when the item was already completed (or does not exist).
    pub fn complete_plan_spot(
        &self,
        plan_id: i64,
        spot_id: i64,
        practice_type: PracticeType,
        evaluation: Option<Evaluation>,
    ) -> Result<bool> {
        let rows = self.conn.execute(
            r#"
            UPDATE practice_plan_spots
            SET completed = 1, evaluation = COALESCE(?1, evaluation)
            WHERE plan_id = ?2 AND spot_id = ?3 AND practice_type = ?4 AND completed = 0
            "#,
            params![
                evaluation.map(|e| e.as_str()),
                plan_id,
                spot_id,
                practice_type.as_str()
            ],
        )?;
        Ok(rows > 0)
    }

    pub fn plan_pieces(&self, plan_id: i64) -> Result<Vec<PlanPieceItem>> {
        let mut stmt = self.conn.prepare(&format!(
            r#"
            SELECT {}
            FROM practice_plan_pieces pp
            JOIN pieces p ON p.id = pp.piece_id
            WHERE pp.plan_id = ?1
            ORDER BY pp.idx
            "#,
            PLAN_PIECE_COLUMNS
        ))?;
        let rows = stmt.query_map(params![plan_id], plan_piece_from_row)?;
        rows.collect()
    }

    pub fn incomplete_plan_pieces(
        &self,
        plan_id: i64,
        practice_type: PracticeType,
    ) -> Result<Vec<PlanPieceItem>> {
        let mut stmt = self.conn.prepare(&format!(
            r#"
            SELECT {}
            FROM practice_plan_pieces pp
            JOIN pieces p ON p.id = pp.piece_id
            WHERE pp.plan_id = ?1 AND pp.practice_type = ?2 AND pp.completed = 0
            ORDER BY pp.idx
            "#,
            PLAN_PIECE_COLUMNS
        ))?;
        let rows = stmt.query_map(params![plan_id, practice_type.as_str()], plan_piece_from_row)?;
        rows.collect()
    }

    pub fn complete_plan_piece(
        &self,
        plan_id: i64,
        piece_id: i64,
        practice_type: PracticeType,
    ) -> Result<bool> {
        let rows = self.conn.execute(
            r#"
            UPDATE practice_plan_pieces
            SET completed = 1
            WHERE plan_id = ?1 AND piece_id = ?2 AND practice_type = ?3 AND completed = 0
            "#,
            params![plan_id, piece_id, practice_type.as_str()],
        )?;
        Ok(rows > 0)
    }

    pub fn plan_progress(&self, plan_id: i64) -> Result<PlanProgress> {
        self.conn.query_row(
            r#"
            SELECT
                (SELECT COUNT(*) FROM practice_plan_spots WHERE plan_id = ?1 AND completed = 1)
              + (SELECT COUNT(*) FROM practice_plan_pieces WHERE plan_id = ?1 AND completed = 1),
                (SELECT COUNT(*) FROM practice_plan_spots WHERE plan_id = ?1)
              + (SELECT COUNT(*) FROM practice_plan_pieces WHERE plan_id = ?1)
            "#,
            params![plan_id],
            |row| {
                Ok(PlanProgress {
                    completed: row.get(0)?,
                    total: row.get(1)?,
                })
            },
        )
    }

    pub fn category_progress(
        &self,
        plan_id: i64,
        practice_type: PracticeType,
    ) -> Result<PlanProgress> {
        let table = if practice_type.is_piece_item() {
            "practice_plan_pieces"
        } else {
            "practice_plan_spots"
        };
        self.conn.query_row(
            &format!(
                "SELECT COALESCE(SUM(completed), 0), COUNT(*) FROM {} WHERE plan_id = ?1 AND practice_type = ?2",
                table
            ),
            params![plan_id, practice_type.as_str()],
            |row| {
                Ok(PlanProgress {
                    completed: row.get(0)?,
                    total: row.get(1)?,
                })
            },
        )
    }

    // Session state operations
    pub fn get_state(&self, key: &str) -> Result<Option<String>> {
        self.conn
            .query_row(
                "SELECT value FROM session_state WHERE key = ?1",
                params![key],
                |row| row.get(0),
            )
            .optional()
    }

    pub fn put_state(&self, key: &str, value: &str, now: DateTime<Utc>) -> Result<()> {
        self.conn.execute(
            r#"
            INSERT INTO session_state (key, value, updated_at) VALUES (?1, ?2, ?3)
            ON CONFLICT(key) DO UPDATE SET value = excluded.value, updated_at = excluded.updated_at
            "#,
            params![key, value, now],
        )?;
        Ok(())
    }

    pub fn remove_state(&self, key: &str) -> Result<bool> {
        let rows = self
            .conn
            .execute("DELETE FROM session_state WHERE key = ?1", params![key])?;
        Ok(rows > 0)
    }
}

/// Ordering index for the next row given the current typed `MAX(idx)`.
pub fn next_index(max_idx: Option<i64>) -> i64 {
    max_idx.map_or(0, |m| m + 1)
}

fn parse_enum<T>(idx: usize, raw: &str, parse: fn(&str) -> Option<T>) -> Result<T> {
    parse(raw).ok_or_else(|| {
        rusqlite::Error::FromSqlConversionFailure(
            idx,
            Type::Text,
            format!("unexpected value '{}'", raw).into(),
        )
    })
}

fn piece_from_row(row: &Row<'_>) -> Result<Piece> {
    let stage: String = row.get(7)?;
    Ok(Piece {
        id: row.get(0)?,
        user_id: row.get(1)?,
        title: row.get(2)?,
        composer: row.get(3)?,
        measures: row.get(4)?,
        beats_per_measure: row.get(5)?,
        goal_tempo: row.get(6)?,
        stage: parse_enum(7, &stage, PieceStage::from_str)?,
        last_practiced: row.get(8)?,
        created_at: row.get(9)?,
    })
}

fn spot_from_row(row: &Row<'_>) -> Result<Spot> {
    let stage: String = row.get(4)?;
    Ok(Spot {
        id: row.get(0)?,
        piece_id: row.get(1)?,
        name: row.get(2)?,
        idx: row.get(3)?,
        stage: parse_enum(4, &stage, SpotStage::from_str)?,
        skip_days: row.get(5)?,
        stage_started: row.get(6)?,
        last_practiced: row.get(7)?,
    })
}

fn plan_from_row(row: &Row<'_>) -> Result<PracticePlan> {
    let intensity: String = row.get(2)?;
    Ok(PracticePlan {
        id: row.get(0)?,
        user_id: row.get(1)?,
        intensity: parse_enum(2, &intensity, Intensity::from_str)?,
        date: row.get(3)?,
        completed: row.get(4)?,
        active: row.get(5)?,
        practice_session_id: row.get(6)?,
    })
}

fn plan_spot_from_row(row: &Row<'_>) -> Result<PlanSpotItem> {
    let practice_type: String = row.get(4)?;
    let evaluation: Option<String> = row.get(5)?;
    Ok(PlanSpotItem {
        plan_id: row.get(0)?,
        spot_id: row.get(1)?,
        piece_id: row.get(2)?,
        spot_name: row.get(3)?,
        practice_type: parse_enum(4, &practice_type, PracticeType::from_str)?,
        evaluation: evaluation
            .map(|e| parse_enum(5, &e, Evaluation::from_str))
            .transpose()?,
        idx: row.get(6)?,
        completed: row.get(7)?,
    })
}

fn plan_piece_from_row(row: &Row<'_>) -> Result<PlanPieceItem> {
    let practice_type: String = row.get(3)?;
    Ok(PlanPieceItem {
        plan_id: row.get(0)?,
        piece_id: row.get(1)?,
        piece_title: row.get(2)?,
        practice_type: parse_enum(3, &practice_type, PracticeType::from_str)?,
        idx: row.get(4)?,
        completed: row.get(5)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration as ChronoDuration;

    const USER: &str = "ana";

    fn setup_db() -> Database {
        let db = Database::open(":memory:").expect("Failed to create in-memory database");
        db.init().expect("Failed to initialize database");
        db
    }

    fn piece(db: &Database, title: &str) -> i64 {
        db.add_piece(
            USER,
            &NewPiece {
                title,
                ..NewPiece::default()
            },
            Utc::now(),
        )
        .unwrap()
    }

    mod init_tests {
        use super::*;

        #[test]
        fn init_creates_tables() {
            let db = setup_db();
            for table in [
                "pieces",
                "spots",
                "practice_sessions",
                "practice_spot_reps",
                "practice_plans",
                "practice_plan_pieces",
                "practice_plan_spots",
                "session_state",
            ] {
                let count: i64 = db
                    .conn
                    .query_row(&format!("SELECT COUNT(*) FROM {}", table), [], |row| {
                        row.get(0)
                    })
                    .unwrap_or_else(|_| panic!("{} table should exist", table));
                assert_eq!(count, 0);
            }
        }

        #[test]
        fn init_is_idempotent() {
            let db = setup_db();
            piece(&db, "Etude");

            db.init().expect("Re-init should succeed");

            assert_eq!(db.list_pieces(USER).unwrap().len(), 1);
        }

        #[test]
        fn init_sets_schema_version() {
            let db = setup_db();
            let version: i32 = db
                .conn
                .query_row("PRAGMA user_version", [], |row| row.get(0))
                .unwrap();
            assert_eq!(version, SCHEMA_VERSION);
        }
    }

    mod piece_tests {
        use super::*;

        #[test]
        fn add_and_get_piece() {
            let db = setup_db();
            let id = db
                .add_piece(
                    USER,
                    &NewPiece {
                        title: "Ballade No. 1",
                        composer: Some("Chopin"),
                        measures: Some(264),
                        beats_per_measure: Some(6),
                        goal_tempo: Some(69),
                    },
                    Utc::now(),
                )
                .unwrap();

            let p = db.get_piece(USER, id).unwrap().unwrap();
            assert_eq!(p.title, "Ballade No. 1");
            assert_eq!(p.composer.as_deref(), Some("Chopin"));
            assert_eq!(p.measures, Some(264));
            assert_eq!(p.stage, PieceStage::Active);
            assert!(p.last_practiced.is_none());
        }

        #[test]
        fn get_piece_is_scoped_to_owner() {
            let db = setup_db();
            let id = piece(&db, "Etude");
            assert!(db.get_piece("someone-else", id).unwrap().is_none());
            assert!(db.get_piece(USER, 999).unwrap().is_none());
        }

        #[test]
        fn list_pieces_sorted_by_title() {
            let db = setup_db();
            piece(&db, "Sonata");
            piece(&db, "Arabesque");
            db.add_piece("bob", &NewPiece { title: "Other", ..NewPiece::default() }, Utc::now())
                .unwrap();

            let titles: Vec<String> = db
                .list_pieces(USER)
                .unwrap()
                .into_iter()
                .map(|p| p.title)
                .collect();
            assert_eq!(titles, vec!["Arabesque", "Sonata"]);
        }

        #[test]
        fn touch_and_stage() {
            let db = setup_db();
            let id = piece(&db, "Etude");
            let now = Utc::now();
            db.touch_piece(id, now).unwrap();
            db.set_piece_stage(id, PieceStage::Completed).unwrap();

            let p = db.get_piece(USER, id).unwrap().unwrap();
            assert_eq!(p.stage, PieceStage::Completed);
            assert_eq!(p.last_practiced, Some(now));
        }
    }

    mod spot_tests {
        use super::*;

        #[test]
        fn add_spot_assigns_increasing_idx() {
            let db = setup_db();
            let p = piece(&db, "Etude");
            let now = Utc::now();
            db.add_spot(p, "mm. 1-4", SpotStage::Repeat, now).unwrap();
            db.add_spot(p, "mm. 5-8", SpotStage::Repeat, now).unwrap();

            let spots = db.list_spots(p).unwrap();
            assert_eq!(spots.len(), 2);
            assert_eq!(spots[0].idx, 0);
            assert_eq!(spots[1].idx, 1);
            assert_eq!(spots[0].skip_days, 1);
            assert_eq!(spots[0].stage_started, now);
        }

        #[test]
        fn get_spot_checks_owner() {
            let db = setup_db();
            let p = piece(&db, "Etude");
            let s = db.add_spot(p, "A", SpotStage::Repeat, Utc::now()).unwrap();
            assert!(db.get_spot(USER, s).unwrap().is_some());
            assert!(db.get_spot("mallory", s).unwrap().is_none());
        }

        #[test]
        fn apply_transition_moves_stage_started_only_on_change() {
            let db = setup_db();
            let p = piece(&db, "Etude");
            let started = Utc::now() - ChronoDuration::days(10);
            let s = db.add_spot(p, "A", SpotStage::Interleave, started).unwrap();
            let now = Utc::now();

            let same = Transition {
                stage: SpotStage::Interleave,
                skip_days: 1,
                record_practiced: true,
            };
            db.apply_transition(s, SpotStage::Interleave, &same, now).unwrap();
            let spot = db.get_spot(USER, s).unwrap().unwrap();
            assert_eq!(spot.stage_started, started);
            assert_eq!(spot.last_practiced, Some(now));

            let later = now + ChronoDuration::minutes(1);
            let moved = Transition {
                stage: SpotStage::InterleaveDays,
                skip_days: 1,
                record_practiced: true,
            };
            db.apply_transition(s, SpotStage::Interleave, &moved, later).unwrap();
            let spot = db.get_spot(USER, s).unwrap().unwrap();
            assert_eq!(spot.stage, SpotStage::InterleaveDays);
            assert_eq!(spot.stage_started, later);
        }

        #[test]
        fn stage_counts() {
            let db = setup_db();
            let p = piece(&db, "Etude");
            let now = Utc::now();
            db.add_spot(p, "A", SpotStage::Repeat, now).unwrap();
            db.add_spot(p, "B", SpotStage::Repeat, now).unwrap();
            db.add_spot(p, "C", SpotStage::Interleave, now).unwrap();

            let counts = db.spot_stage_counts(p).unwrap();
            assert!(counts.contains(&(SpotStage::Repeat, 2)));
            assert!(counts.contains(&(SpotStage::Interleave, 1)));
        }

        #[test]
        fn deleting_piece_cascades_to_spots() {
            let db = setup_db();
            let p = piece(&db, "Etude");
            db.add_spot(p, "A", SpotStage::Repeat, Utc::now()).unwrap();
            db.conn
                .execute("DELETE FROM pieces WHERE id = ?1", params![p])
                .unwrap();
            assert!(db.list_spots(p).unwrap().is_empty());
        }
    }

    mod session_tests {
        use super::*;

        #[test]
        fn reps_create_then_increment() {
            let db = setup_db();
            let p = piece(&db, "Etude");
            let s = db.add_spot(p, "A", SpotStage::Random, Utc::now()).unwrap();
            let session = db.create_practice_session(USER, Utc::now()).unwrap();

            assert_eq!(db.spot_reps(session, s).unwrap(), 0);
            db.record_spot_rep(session, s).unwrap();
            db.record_spot_rep(session, s).unwrap();
            assert_eq!(db.spot_reps(session, s).unwrap(), 2);
            assert_eq!(db.total_reps(session).unwrap(), 2);
        }

        #[test]
        fn extend_session_adds_minutes() {
            let db = setup_db();
            let session = db.create_practice_session(USER, Utc::now()).unwrap();
            db.extend_practice_session(session, 15).unwrap();
            db.extend_practice_session(session, 10).unwrap();
            let s = db.get_practice_session(session).unwrap().unwrap();
            assert_eq!(s.duration_minutes, 25);
        }
    }

    mod plan_tests {
        use super::*;

        fn plan(db: &Database) -> i64 {
            let session = db.create_practice_session(USER, Utc::now()).unwrap();
            db.insert_plan(USER, Intensity::Medium, session, Utc::now())
                .unwrap()
        }

        #[test]
        fn only_one_active_plan_per_user() {
            let db = setup_db();
            plan(&db);
            let session = db.create_practice_session(USER, Utc::now()).unwrap();
            let second = db.insert_plan(USER, Intensity::Light, session, Utc::now());
            assert!(second.is_err());

            assert_eq!(db.deactivate_plans(USER).unwrap(), 1);
            let third = plan(&db);
            assert_eq!(db.get_active_plan(USER).unwrap().unwrap().id, third);
        }

        #[test]
        fn max_idx_is_none_for_empty_plan() {
            let db = setup_db();
            let id = plan(&db);
            assert_eq!(db.max_plan_spot_idx(id).unwrap(), None);
            assert_eq!(db.max_plan_piece_idx(id).unwrap(), None);
            assert_eq!(next_index(None), 0);
            assert_eq!(next_index(Some(4)), 5);
        }

        #[test]
        fn completion_is_monotone_and_counted() {
            let db = setup_db();
            let id = plan(&db);
            let p = piece(&db, "Etude");
            let s = db.add_spot(p, "A", SpotStage::Interleave, Utc::now()).unwrap();
            db.add_plan_spot(id, s, PracticeType::Interleave, 0).unwrap();
            db.add_plan_piece(id, p, PracticeType::StartingPoint, 0).unwrap();

            assert_eq!(db.plan_progress(id).unwrap(), PlanProgress { completed: 0, total: 2 });

            assert!(db
                .complete_plan_spot(id, s, PracticeType::Interleave, Some(Evaluation::Fine))
                .unwrap());
            assert!(!db
                .complete_plan_spot(id, s, PracticeType::Interleave, Some(Evaluation::Poor))
                .unwrap());

            let item = db
                .get_plan_spot(id, s, PracticeType::Interleave)
                .unwrap()
                .unwrap();
            assert!(item.completed);
            assert_eq!(item.evaluation, Some(Evaluation::Fine));
            assert_eq!(item.piece_id, p);

            assert!(db.complete_plan_piece(id, p, PracticeType::StartingPoint).unwrap());
            assert_eq!(db.plan_progress(id).unwrap(), PlanProgress { completed: 2, total: 2 });
            assert_eq!(
                db.category_progress(id, PracticeType::Interleave).unwrap(),
                PlanProgress { completed: 1, total: 1 }
            );
            assert!(db.incomplete_plan_spots(id, PracticeType::Interleave).unwrap().is_empty());
        }

        #[test]
        fn get_plan_is_scoped_to_owner() {
            let db = setup_db();
            let id = plan(&db);
            assert!(db.get_plan(USER, id).unwrap().is_some());
            assert!(db.get_plan("bob", id).unwrap().is_none());
        }

        #[test]
        fn dropped_transaction_rolls_back() {
            let db = setup_db();
            {
                let _tx = db.begin().unwrap();
                piece(&db, "Never saved");
            }
            assert!(db.list_pieces(USER).unwrap().is_empty());

            let tx = db.begin().unwrap();
            piece(&db, "Saved");
            tx.commit().unwrap();
            assert_eq!(db.list_pieces(USER).unwrap().len(), 1);
        }
    }

    mod state_tests {
        use super::*;

        #[test]
        fn put_get_remove() {
            let db = setup_db();
            assert!(db.get_state("k").unwrap().is_none());

            db.put_state("k", "v1", Utc::now()).unwrap();
            db.put_state("k", "v2", Utc::now()).unwrap();
            assert_eq!(db.get_state("k").unwrap().as_deref(), Some("v2"));

            assert!(db.remove_state("k").unwrap());
            assert!(!db.remove_state("k").unwrap());
            assert!(db.get_state("k").unwrap().is_none());
        }
    }
}
