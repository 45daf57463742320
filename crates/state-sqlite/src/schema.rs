pub const MIG_0001_INIT: &str = r#"
BEGIN;

CREATE TABLE domains (
  domain          TEXT PRIMARY KEY NOT NULL,
  active          INTEGER NOT NULL CHECK (active IN (0,1)) DEFAULT 1,
  live            INTEGER NOT NULL CHECK (live IN (0,1)) DEFAULT 0,
  first_seen      TEXT NOT NULL,
  last_seen       TEXT NOT NULL,
  CHECK (last_seen >= first_seen)
);

CREATE TABLE runs (
  run_id            TEXT PRIMARY KEY,
  started_at        TEXT NOT NULL,
  finished_at       TEXT,
  mode              TEXT NOT NULL CHECK (mode IN ('fast','complete')),
  tool_version      TEXT NOT NULL,
  seeds_json        TEXT NOT NULL,
  candidate_count   INTEGER DEFAULT 0,
  new_active        INTEGER DEFAULT 0,
  new_live          INTEGER DEFAULT 0,
  deprecated_active INTEGER DEFAULT 0,
  deprecated_live   INTEGER DEFAULT 0,
  error_count       INTEGER DEFAULT 0
);

CREATE TABLE run_errors (
  error_id        INTEGER PRIMARY KEY AUTOINCREMENT,
  run_id          TEXT NOT NULL REFERENCES runs(run_id) ON DELETE CASCADE,
  scope           TEXT NOT NULL,
  code            TEXT NOT NULL,
  message         TEXT NOT NULL,
  at_ms           INTEGER NOT NULL
);

CREATE INDEX idx_domains_active ON domains(active);
CREATE INDEX idx_domains_live ON domains(live);
CREATE INDEX idx_errors_run ON run_errors(run_id);

COMMIT;
"#
;
