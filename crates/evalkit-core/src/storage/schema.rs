pub const DDL: &str = r#"
CREATE TABLE IF NOT EXISTS models (
  model_id TEXT PRIMARY KEY,
  name TEXT NOT NULL,
  provider TEXT NOT NULL,
  version TEXT
);

CREATE TABLE IF NOT EXISTS runs (
  run_id TEXT PRIMARY KEY,
  created_at TEXT NOT NULL,
  git_sha TEXT,
  pack_id TEXT NOT NULL,
  model_id TEXT NOT NULL REFERENCES models(model_id),
  params_json TEXT
);

CREATE TABLE IF NOT EXISTS cases (
  case_id TEXT PRIMARY KEY,
  pack_id TEXT NOT NULL,
  scheme TEXT,
  metadata_json TEXT,
  expected TEXT
);

CREATE TABLE IF NOT EXISTS outputs (
  output_id TEXT PRIMARY KEY,
  run_id TEXT NOT NULL REFERENCES runs(run_id),
  case_id TEXT NOT NULL REFERENCES cases(case_id),
  raw_text TEXT,
  latency_ms REAL,
  tokens_in INTEGER,
  tokens_out INTEGER
);

CREATE TABLE IF NOT EXISTS scores (
  output_id TEXT PRIMARY KEY REFERENCES outputs(output_id),
  score REAL,
  label TEXT,
  reason TEXT,
  details_json TEXT
);

CREATE INDEX IF NOT EXISTS idx_outputs_run_case ON outputs(run_id, case_id);
CREATE INDEX IF NOT EXISTS idx_runs_model ON runs(model_id);
"#;
