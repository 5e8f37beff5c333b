// src/store/store.rs — SQLite operations

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};

use crate::core::types::{
    Candidate, EvaluationRun, EvaluationTask, IterationMode, IterationState, IterationStatus,
    Round, RunStatus, StopReason, StrategyTag, TaskStatus,
};

/// Low-level SQLite operations for runs and iterations.
pub struct Store {
    conn: Connection,
}

fn ts(t: &DateTime<Utc>) -> String {
    t.to_rfc3339()
}

fn parse_ts(s: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(s)
        .map(|t| t.with_timezone(&Utc))
        .unwrap_or_else(|_| Utc::now())
}

fn to_json<T: serde::Serialize>(value: &Option<T>) -> anyhow::Result<Option<String>> {
    Ok(match value {
        Some(v) => Some(serde_json::to_string(v)?),
        None => None,
    })
}

fn from_json<T: serde::de::DeserializeOwned>(raw: Option<String>) -> Option<T> {
    raw.and_then(|s| serde_json::from_str(&s).ok())
}

impl Store {
    pub fn new(conn: Connection) -> Self {
        Self { conn }
    }

    // -- Evaluation runs --

    /// Insert a run together with its full task matrix.
    pub fn insert_run(&self, run: &EvaluationRun) -> anyhow::Result<()> {
        let tx = self.conn.unchecked_transaction()?;
        tx.execute(
            "INSERT INTO evaluation_runs (id, project_id, status, total_tasks, completed_tasks,
             failed_tasks, last_checkpoint, started_at, finished_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
            params![
                run.id,
                run.project_id,
                run.status.to_string(),
                run.total_tasks() as i64,
                run.completed_tasks as i64,
                run.failed_tasks as i64,
                run.last_checkpoint.map(|c| c as i64),
                ts(&run.started_at),
                run.finished_at.as_ref().map(ts),
            ],
        )?;
        {
            let mut stmt = tx.prepare(
                "INSERT INTO evaluation_tasks (run_id, idx, task_id, skill_id, case_id, status,
                 attempts, outcome, error)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
            )?;
            for task in &run.tasks {
                stmt.execute(params![
                    run.id,
                    task.index as i64,
                    task.id,
                    task.skill_id,
                    task.case_id,
                    task.status.to_string(),
                    task.attempts,
                    to_json(&task.outcome)?,
                    to_json(&task.error)?,
                ])?;
            }
        }
        tx.commit()?;
        Ok(())
    }

    /// Persist run-level status, counters and checkpoint.
    pub fn update_run(&self, run: &EvaluationRun) -> anyhow::Result<()> {
        self.conn.execute(
            "UPDATE evaluation_runs SET status = ?1, completed_tasks = ?2, failed_tasks = ?3,
             last_checkpoint = ?4, finished_at = ?5
             WHERE id = ?6",
            params![
                run.status.to_string(),
                run.completed_tasks as i64,
                run.failed_tasks as i64,
                run.last_checkpoint.map(|c| c as i64),
                run.finished_at.as_ref().map(ts),
                run.id,
            ],
        )?;
        Ok(())
    }

    /// Record one task and the run counters in a single transaction.
    pub fn record_task(&self, run: &EvaluationRun, index: usize) -> anyhow::Result<()> {
        let Some(task) = run.tasks.get(index) else {
            anyhow::bail!("task index {index} out of range");
        };
        let tx = self.conn.unchecked_transaction()?;
        tx.execute(
            "UPDATE evaluation_tasks SET status = ?1, attempts = ?2, outcome = ?3, error = ?4
             WHERE run_id = ?5 AND idx = ?6",
            params![
                task.status.to_string(),
                task.attempts,
                to_json(&task.outcome)?,
                to_json(&task.error)?,
                run.id,
                index as i64,
            ],
        )?;
        tx.execute(
            "UPDATE evaluation_runs SET status = ?1, completed_tasks = ?2, failed_tasks = ?3,
             last_checkpoint = ?4
             WHERE id = ?5",
            params![
                run.status.to_string(),
                run.completed_tasks as i64,
                run.failed_tasks as i64,
                run.last_checkpoint.map(|c| c as i64),
                run.id,
            ],
        )?;
        tx.commit()?;
        Ok(())
    }

    /// Persist every task's status (after a requeue or release).
    pub fn update_tasks(&self, run: &EvaluationRun) -> anyhow::Result<()> {
        let tx = self.conn.unchecked_transaction()?;
        {
            let mut stmt = tx.prepare(
                "UPDATE evaluation_tasks SET status = ?1, attempts = ?2, outcome = ?3, error = ?4
                 WHERE run_id = ?5 AND idx = ?6",
            )?;
            for task in &run.tasks {
                stmt.execute(params![
                    task.status.to_string(),
                    task.attempts,
                    to_json(&task.outcome)?,
                    to_json(&task.error)?,
                    run.id,
                    task.index as i64,
                ])?;
            }
        }
        tx.commit()?;
        self.update_run(run)
    }

    fn load_run(&self, id: &str) -> anyhow::Result<Option<EvaluationRun>> {
        let header = self
            .conn
            .query_row(
                "SELECT id, project_id, status, completed_tasks, failed_tasks, last_checkpoint,
                 started_at, finished_at
                 FROM evaluation_runs WHERE id = ?1",
                params![id],
                |row| {
                    Ok((
                        row.get::<_, String>(0)?,
                        row.get::<_, String>(1)?,
                        row.get::<_, String>(2)?,
                        row.get::<_, i64>(3)?,
                        row.get::<_, i64>(4)?,
                        row.get::<_, Option<i64>>(5)?,
                        row.get::<_, String>(6)?,
                        row.get::<_, Option<String>>(7)?,
                    ))
                },
            )
            .optional()?;
        let Some((id, project_id, status, completed, failed, checkpoint, started, finished)) =
            header
        else {
            return Ok(None);
        };

        let mut stmt = self.conn.prepare(
            "SELECT idx, task_id, skill_id, case_id, status, attempts, outcome, error
             FROM evaluation_tasks WHERE run_id = ?1 ORDER BY idx",
        )?;
        let rows = stmt.query_map(params![id], |row| {
            Ok(EvaluationTask {
                index: row.get::<_, i64>(0)? as usize,
                id: row.get(1)?,
                skill_id: row.get(2)?,
                case_id: row.get(3)?,
                status: TaskStatus::parse(&row.get::<_, String>(4)?).unwrap_or(TaskStatus::Pending),
                attempts: row.get(5)?,
                outcome: from_json(row.get(6)?),
                error: from_json(row.get(7)?),
            })
        })?;
        let mut tasks = Vec::new();
        for row in rows {
            tasks.push(row?);
        }

        Ok(Some(EvaluationRun {
            id,
            project_id,
            status: RunStatus::parse(&status).unwrap_or(RunStatus::Error),
            tasks,
            completed_tasks: completed as usize,
            failed_tasks: failed as usize,
            last_checkpoint: checkpoint.map(|c| c as usize),
            started_at: parse_ts(&started),
            finished_at: finished.as_deref().map(parse_ts),
        }))
    }

    /// Runs interrupted while running or paused.
    pub fn load_active_runs(&self) -> anyhow::Result<Vec<EvaluationRun>> {
        let mut stmt = self.conn.prepare(
            "SELECT id FROM evaluation_runs WHERE status IN ('running', 'paused')
             ORDER BY started_at",
        )?;
        let ids = stmt.query_map([], |row| row.get::<_, String>(0))?;
        let mut runs = Vec::new();
        for id in ids {
            if let Some(run) = self.load_run(&id?)? {
                runs.push(run);
            }
        }
        Ok(runs)
    }

    pub fn latest_run(&self, project_id: &str) -> anyhow::Result<Option<EvaluationRun>> {
        let id: Option<String> = self
            .conn
            .query_row(
                "SELECT id FROM evaluation_runs WHERE project_id = ?1
                 ORDER BY started_at DESC LIMIT 1",
                params![project_id],
                |row| row.get(0),
            )
            .optional()?;
        match id {
            Some(id) => self.load_run(&id),
            None => Ok(None),
        }
    }

    // -- Iterations --

    pub fn insert_iteration(&self, state: &IterationState) -> anyhow::Result<()> {
        self.conn.execute(
            "INSERT INTO iterations (id, project_id, status, mode, params, current_round,
             seed_score, best, plateau_level, consecutive_plateau, stop_reason, started_at,
             finished_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)",
            params![
                state.id,
                state.project_id,
                state.status.to_string(),
                state.mode.to_string(),
                serde_json::to_string(&state.params)?,
                state.current_round,
                state.seed_score,
                to_json(&state.best)?,
                state.plateau_level,
                state.consecutive_plateau,
                state.stop_reason.map(|r| r.to_string()),
                ts(&state.started_at),
                state.finished_at.as_ref().map(ts),
            ],
        )?;
        Ok(())
    }

    pub fn update_iteration(&self, state: &IterationState) -> anyhow::Result<()> {
        self.conn.execute(
            "UPDATE iterations SET status = ?1, current_round = ?2, best = ?3,
             plateau_level = ?4, consecutive_plateau = ?5, stop_reason = ?6, finished_at = ?7
             WHERE id = ?8",
            params![
                state.status.to_string(),
                state.current_round,
                to_json(&state.best)?,
                state.plateau_level,
                state.consecutive_plateau,
                state.stop_reason.map(|r| r.to_string()),
                state.finished_at.as_ref().map(ts),
                state.id,
            ],
        )?;
        Ok(())
    }

    /// Append a resolved round and its candidates.
    pub fn insert_round(&self, iteration_id: &str, round: &Round) -> anyhow::Result<()> {
        let tx = self.conn.unchecked_transaction()?;
        tx.execute(
            "INSERT INTO iteration_rounds (iteration_id, round, strategy, plateau_level, winner,
             score_delta, started_at, finished_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            params![
                iteration_id,
                round.round,
                round.strategy.as_str(),
                round.plateau_level,
                round.winner.map(|w| w as i64),
                round.score_delta,
                ts(&round.started_at),
                ts(&round.finished_at),
            ],
        )?;
        {
            let mut stmt = tx.prepare(
                "INSERT INTO round_candidates (iteration_id, round, idx, skill_ref, strategy,
                 avg_score, score_breakdown, error, won)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
            )?;
            for c in &round.candidates {
                stmt.execute(params![
                    iteration_id,
                    round.round,
                    c.index as i64,
                    c.skill_ref.as_ref().map(|r| r.0.clone()),
                    c.strategy.as_str(),
                    c.avg_score,
                    to_json(&c.score_breakdown)?,
                    to_json(&c.error)?,
                    c.won,
                ])?;
            }
        }
        tx.commit()?;
        Ok(())
    }

    fn load_rounds(&self, iteration_id: &str) -> anyhow::Result<Vec<Round>> {
        let mut stmt = self.conn.prepare(
            "SELECT round, strategy, plateau_level, winner, score_delta, started_at, finished_at
             FROM iteration_rounds WHERE iteration_id = ?1 ORDER BY round",
        )?;
        let rows = stmt.query_map(params![iteration_id], |row| {
            Ok(Round {
                round: row.get(0)?,
                strategy: StrategyTag::parse(&row.get::<_, String>(1)?)
                    .unwrap_or(StrategyTag::Greedy),
                plateau_level: row.get(2)?,
                candidates: Vec::new(),
                winner: row.get::<_, Option<i64>>(3)?.map(|w| w as usize),
                score_delta: row.get(4)?,
                started_at: parse_ts(&row.get::<_, String>(5)?),
                finished_at: parse_ts(&row.get::<_, String>(6)?),
            })
        })?;
        let mut rounds = Vec::new();
        for row in rows {
            rounds.push(row?);
        }

        let mut stmt = self.conn.prepare(
            "SELECT idx, skill_ref, strategy, avg_score, score_breakdown, error, won
             FROM round_candidates WHERE iteration_id = ?1 AND round = ?2 ORDER BY idx",
        )?;
        for round in &mut rounds {
            let rows = stmt.query_map(params![iteration_id, round.round], |row| {
                Ok(Candidate {
                    index: row.get::<_, i64>(0)? as usize,
                    skill_ref: row.get::<_, Option<String>>(1)?.map(crate::project::SkillRef),
                    strategy: StrategyTag::parse(&row.get::<_, String>(2)?)
                        .unwrap_or(StrategyTag::Greedy),
                    avg_score: row.get(3)?,
                    score_breakdown: from_json(row.get(4)?),
                    error: from_json(row.get(5)?),
                    won: row.get(6)?,
                })
            })?;
            for row in rows {
                round.candidates.push(row?);
            }
        }
        Ok(rounds)
    }

    /// Most recent iteration for a project, with its full round log.
    pub fn latest_iteration(&self, project_id: &str) -> anyhow::Result<Option<IterationState>> {
        let row = self
            .conn
            .query_row(
                "SELECT id, status, mode, params, current_round, seed_score, best, plateau_level,
                 consecutive_plateau, stop_reason, started_at, finished_at
                 FROM iterations WHERE project_id = ?1 ORDER BY started_at DESC LIMIT 1",
                params![project_id],
                |row| {
                    Ok((
                        row.get::<_, String>(0)?,
                        row.get::<_, String>(1)?,
                        row.get::<_, String>(2)?,
                        row.get::<_, String>(3)?,
                        row.get::<_, u32>(4)?,
                        row.get::<_, Option<f64>>(5)?,
                        row.get::<_, Option<String>>(6)?,
                        row.get::<_, u8>(7)?,
                        row.get::<_, u32>(8)?,
                        row.get::<_, Option<String>>(9)?,
                        row.get::<_, String>(10)?,
                        row.get::<_, Option<String>>(11)?,
                    ))
                },
            )
            .optional()?;
        let Some((
            id,
            status,
            mode,
            params_json,
            current_round,
            seed_score,
            best,
            plateau_level,
            consecutive_plateau,
            stop_reason,
            started,
            finished,
        )) = row
        else {
            return Ok(None);
        };

        let rounds = self.load_rounds(&id)?;
        Ok(Some(IterationState {
            id,
            project_id: project_id.to_string(),
            status: IterationStatus::parse(&status).unwrap_or(IterationStatus::Idle),
            mode: mode.parse::<IterationMode>().unwrap_or_default(),
            params: serde_json::from_str(&params_json)?,
            current_round,
            seed_score,
            best: from_json(best),
            plateau_level,
            consecutive_plateau,
            stop_reason: stop_reason.as_deref().and_then(StopReason::parse),
            rounds,
            started_at: parse_ts(&started),
            finished_at: finished.as_deref().map(parse_ts),
        }))
    }

    /// Close iterations a previous process left running. Returns how many.
    pub fn close_interrupted_iterations(&self) -> anyhow::Result<usize> {
        let now = Utc::now().to_rfc3339();
        let n = self.conn.execute(
            "UPDATE iterations
             SET status = CASE WHEN current_round = 0 THEN 'idle' ELSE 'completed' END,
                 stop_reason = 'manual_stop', finished_at = ?1
             WHERE status = 'running'",
            params![now],
        )?;
        Ok(n)
    }
}
