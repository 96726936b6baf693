use crate::model::{Case, GradeOutcome};
use crate::storage::rows::{ModelRecord, NewOutput, OutputRow, RunRow, ScoreRow};
use anyhow::Context;
use rusqlite::{params, Connection, OptionalExtension};
use serde_json::{Map, Value};
use std::collections::HashSet;
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};

/// Append-mostly run ledger. One writer per process.
#[derive(Clone)]
pub struct Store {
    pub conn: Arc<Mutex<Connection>>,
}

impl Store {
    pub fn open(path: &Path) -> anyhow::Result<Self> {
        let conn = Connection::open(path)
            .with_context(|| format!("failed to open sqlite db {}", path.display()))?;
        conn.execute_batch("PRAGMA journal_mode = WAL; PRAGMA foreign_keys = ON;")?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    pub fn memory() -> anyhow::Result<Self> {
        let conn = Connection::open_in_memory().context("failed to open in-memory sqlite db")?;
        conn.execute("PRAGMA foreign_keys = ON", [])?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    fn lock(&self) -> anyhow::Result<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| anyhow::anyhow!("ledger connection lock poisoned"))
    }

    pub fn init_schema(&self) -> anyhow::Result<()> {
        let conn = self.lock()?;
        conn.execute_batch(crate::storage::schema::DDL)?;
        migrate_tool_meta(&conn)?;
        Ok(())
    }

    /// First write wins; later calls with the same id change nothing.
    pub fn upsert_model(&self, model: &ModelRecord) -> anyhow::Result<()> {
        let conn = self.lock()?;
        conn.execute(
            "INSERT OR IGNORE INTO models (model_id, name, provider, version) VALUES (?1, ?2, ?3, ?4)",
            params![model.model_id, model.name, model.provider, model.version],
        )
        .context("insert model")?;
        Ok(())
    }

    pub fn create_run(
        &self,
        pack_id: &str,
        model_id: &str,
        git_sha: Option<&str>,
        params: &Value,
    ) -> anyhow::Result<String> {
        let run_id = new_id();
        let created_at = chrono::Utc::now().to_rfc3339();
        let conn = self.lock()?;
        conn.execute(
            "INSERT INTO runs (run_id, created_at, git_sha, pack_id, model_id, params_json)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![run_id, created_at, git_sha, pack_id, model_id, json_or_null(params)],
        )
        .context("insert run")?;
        Ok(run_id)
    }

    /// Cases without an id get a fresh one. Existing rows are left untouched.
    pub fn upsert_case(&self, pack_id: &str, case: &Case) -> anyhow::Result<String> {
        let case_id = if case.id.is_empty() {
            new_id()
        } else {
            case.id.clone()
        };
        let metadata = if case.metadata.is_empty() {
            None
        } else {
            Some(serde_json::to_string(&case.metadata)?)
        };

        let conn = self.lock()?;
        conn.execute(
            "INSERT OR IGNORE INTO cases (case_id, pack_id, scheme, metadata_json, expected)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![case_id, pack_id, case.scheme, metadata, case.expected],
        )
        .context("insert case")?;
        Ok(case_id)
    }

    pub fn append_output(&self, out: &NewOutput) -> anyhow::Result<String> {
        let output_id = new_id();
        let tool_meta = out
            .tool_meta
            .as_ref()
            .map(serde_json::to_string)
            .transpose()?;

        let conn = self.lock()?;
        conn.execute(
            "INSERT INTO outputs (output_id, run_id, case_id, raw_text, latency_ms, tokens_in, tokens_out, tool_meta_json)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            params![
                output_id,
                out.run_id,
                out.case_id,
                out.raw_text,
                out.latency_ms,
                out.tokens_in.map(|t| t as i64),
                out.tokens_out.map(|t| t as i64),
                tool_meta
            ],
        )
        .context("insert output")?;
        Ok(output_id)
    }

    /// Fails if the output already has a score.
    pub fn append_score(&self, output_id: &str, grade: &GradeOutcome) -> anyhow::Result<()> {
        let details = details_json(grade);
        let conn = self.lock()?;
        conn.execute(
            "INSERT INTO scores (output_id, score, label, reason, details_json) VALUES (?1, ?2, ?3, ?4, ?5)",
            params![output_id, grade.score, grade.label, grade.reason, details],
        )
        .with_context(|| format!("insert score for output {}", output_id))?;
        Ok(())
    }

    /// Overwrite an existing score in place. Returns false when the output has
    /// no score row yet.
    pub fn regrade_score(&self, output_id: &str, grade: &GradeOutcome) -> anyhow::Result<bool> {
        let details = details_json(grade);
        let conn = self.lock()?;
        let n = conn
            .execute(
                "UPDATE scores SET score = ?2, label = ?3, reason = ?4, details_json = ?5
                 WHERE output_id = ?1",
                params![output_id, grade.score, grade.label, grade.reason, details],
            )
            .context("update score")?;
        Ok(n > 0)
    }

    pub fn outputs_for_run(&self, run_id: &str) -> anyhow::Result<Vec<OutputRow>> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(
            "SELECT o.output_id, o.case_id, o.raw_text, o.latency_ms, o.tokens_in, o.tokens_out,
                    o.tool_meta_json, s.score, s.label, s.reason, s.details_json,
                    c.expected, c.scheme, c.metadata_json
             FROM outputs o
             LEFT JOIN scores s ON s.output_id = o.output_id
             LEFT JOIN cases c ON c.case_id = o.case_id
             WHERE o.run_id = ?1
             ORDER BY o.case_id, o.rowid",
        )?;

        let rows = stmt.query_map(params![run_id], |row| {
            let metadata: Option<String> = row.get(13)?;
            Ok(OutputRow {
                output_id: row.get(0)?,
                case_id: row.get(1)?,
                raw_text: row.get::<_, Option<String>>(2)?.unwrap_or_default(),
                latency_ms: row.get(3)?,
                tokens_in: row.get::<_, Option<i64>>(4)?.map(|t| t as u64),
                tokens_out: row.get::<_, Option<i64>>(5)?.map(|t| t as u64),
                tool_meta: parse_json(row.get(6)?),
                score: row.get(7)?,
                label: row.get(8)?,
                reason: row.get(9)?,
                details: parse_json(row.get(10)?),
                expected: row.get(11)?,
                scheme: row.get(12)?,
                metadata: match parse_json(metadata) {
                    Some(Value::Object(m)) => m,
                    _ => Map::new(),
                },
            })
        })?;

        let mut out = Vec::new();
        for r in rows {
            out.push(r?);
        }
        Ok(out)
    }

    pub fn scores_for_run(&self, run_id: &str) -> anyhow::Result<Vec<ScoreRow>> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(
            "SELECT s.output_id, o.case_id, s.score, s.label, s.reason, s.details_json,
                    o.latency_ms, o.tokens_in, o.tokens_out
             FROM scores s
             JOIN outputs o ON o.output_id = s.output_id
             WHERE o.run_id = ?1
             ORDER BY o.case_id, o.rowid",
        )?;

        let rows = stmt.query_map(params![run_id], |row| {
            Ok(ScoreRow {
                output_id: row.get(0)?,
                case_id: row.get(1)?,
                score: row.get(2)?,
                label: row.get(3)?,
                reason: row.get(4)?,
                details: parse_json(row.get(5)?),
                latency_ms: row.get(6)?,
                tokens_in: row.get::<_, Option<i64>>(7)?.map(|t| t as u64),
                tokens_out: row.get::<_, Option<i64>>(8)?.map(|t| t as u64),
            })
        })?;

        let mut out = Vec::new();
        for r in rows {
            out.push(r?);
        }
        Ok(out)
    }

    pub fn get_model(&self, model_id: &str) -> anyhow::Result<Option<ModelRecord>> {
        let conn = self.lock()?;
        let model = conn
            .query_row(
                "SELECT model_id, name, provider, version FROM models WHERE model_id = ?1",
                params![model_id],
                |row| {
                    Ok(ModelRecord {
                        model_id: row.get(0)?,
                        name: row.get(1)?,
                        provider: row.get(2)?,
                        version: row.get(3)?,
                    })
                },
            )
            .optional()?;
        Ok(model)
    }

    pub fn get_run(&self, run_id: &str) -> anyhow::Result<Option<RunRow>> {
        let conn = self.lock()?;
        let run = conn
            .query_row(
                "SELECT run_id, created_at, git_sha, pack_id, model_id, params_json
                 FROM runs WHERE run_id = ?1",
                params![run_id],
                |row| {
                    Ok(RunRow {
                        run_id: row.get(0)?,
                        created_at: row.get(1)?,
                        git_sha: row.get(2)?,
                        pack_id: row.get(3)?,
                        model_id: row.get(4)?,
                        params: parse_json(row.get(5)?),
                    })
                },
            )
            .optional()?;
        Ok(run)
    }

    /// Most recently created run, optionally restricted to one pack.
    pub fn latest_run_id(&self, pack_id: Option<&str>) -> anyhow::Result<Option<String>> {
        let conn = self.lock()?;
        let id = conn
            .query_row(
                "SELECT run_id FROM runs
                 WHERE ?1 IS NULL OR pack_id = ?1
                 ORDER BY created_at DESC, rowid DESC
                 LIMIT 1",
                params![pack_id],
                |row| row.get(0),
            )
            .optional()?;
        Ok(id)
    }

    pub fn count_rows(&self, table: &str) -> anyhow::Result<i64> {
        let conn = self.lock()?;
        if !["models", "runs", "cases", "outputs", "scores"].contains(&table) {
            anyhow::bail!("Invalid table name for count_rows: {}", table);
        }
        let sql = format!("SELECT COUNT(*) FROM {}", table);
        let n: i64 = conn.query_row(&sql, [], |r| r.get(0))?;
        Ok(n)
    }
}

fn new_id() -> String {
    uuid::Uuid::new_v4().simple().to_string()
}

fn json_or_null(v: &Value) -> Option<String> {
    match v {
        Value::Null => None,
        Value::Object(m) if m.is_empty() => None,
        other => Some(other.to_string()),
    }
}

fn details_json(grade: &GradeOutcome) -> Option<String> {
    grade.details.as_ref().and_then(json_or_null)
}

fn parse_json(s: Option<String>) -> Option<Value> {
    s.and_then(|s| serde_json::from_str(&s).ok())
}

// Files written before tool use was recorded lack this column.
fn migrate_tool_meta(conn: &Connection) -> anyhow::Result<()> {
    let cols = get_columns(conn, "outputs")?;
    add_column_if_missing(conn, &cols, "outputs", "tool_meta_json", "TEXT")?;
    Ok(())
}

fn get_columns(conn: &Connection, table: &str) -> anyhow::Result<HashSet<String>> {
    let mut stmt = conn.prepare(&format!("PRAGMA table_info({})", table))?;
    let rows = stmt.query_map([], |row| row.get::<_, String>(1))?;
    let mut out = HashSet::new();
    for r in rows {
        out.insert(r?);
    }
    Ok(out)
}

fn add_column_if_missing(
    conn: &Connection,
    cols: &HashSet<String>,
    table: &str,
    col: &str,
    ty: &str,
) -> anyhow::Result<()> {
    if !cols.contains(col) {
        let sql = format!("ALTER TABLE {} ADD COLUMN {} {}", table, col, ty);
        conn.execute(&sql, [])?;
    }
    Ok(())
}
