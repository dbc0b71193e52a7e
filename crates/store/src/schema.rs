pub const SCHEMA_VERSION: i64 = 1;

/// Ordered migrations; entry `n` brings the schema to `user_version = n + 1`.
pub const MIGRATIONS: &[&str] = &[MIG_0001_INIT];

const MIG_0001_INIT: &str = r#"
CREATE TABLE queue (
  id              INTEGER PRIMARY KEY AUTOINCREMENT,
  name            TEXT NOT NULL UNIQUE,
  config          TEXT NOT NULL,
  group_size      INTEGER NOT NULL CHECK (group_size > 0),
  priority        INTEGER NOT NULL DEFAULT 0,
  active          INTEGER NOT NULL CHECK (active IN (0,1)) DEFAULT 0,
  reqs            TEXT NOT NULL DEFAULT '[]'
);

CREATE TABLE target (
  id              INTEGER PRIMARY KEY AUTOINCREMENT,
  queue_id        INTEGER NOT NULL REFERENCES queue(id) ON DELETE CASCADE,
  target          TEXT NOT NULL,
  hashval         TEXT NOT NULL
);

CREATE TABLE job (
  id              TEXT PRIMARY KEY,
  queue_id        INTEGER NOT NULL REFERENCES queue(id) ON DELETE CASCADE,
  assignment      TEXT NOT NULL,
  time_start      INTEGER NOT NULL,
  time_end        INTEGER,
  retval          INTEGER,
  output          TEXT
);

CREATE TABLE heatmap (
  hashval         TEXT PRIMARY KEY,
  count           INTEGER NOT NULL DEFAULT 0,
  updated_ms      INTEGER NOT NULL
);

CREATE TABLE stage_lock (
  name            TEXT PRIMARY KEY,
  holder          TEXT,
  expires_ms      INTEGER,
  last_run_ms     INTEGER
);

CREATE TABLE host (
  id              INTEGER PRIMARY KEY AUTOINCREMENT,
  address         TEXT NOT NULL UNIQUE,
  hostname        TEXT,
  os              TEXT,
  comment         TEXT,
  created_ms      INTEGER NOT NULL,
  modified_ms     INTEGER NOT NULL,
  rescan_ms       INTEGER
);

CREATE TABLE service (
  id              INTEGER PRIMARY KEY AUTOINCREMENT,
  host_id         INTEGER NOT NULL REFERENCES host(id) ON DELETE CASCADE,
  proto           TEXT NOT NULL,
  port            INTEGER NOT NULL CHECK (port BETWEEN 0 AND 65535),
  state           TEXT NOT NULL,
  name            TEXT,
  info            TEXT,
  rescan_ms       INTEGER,
  UNIQUE (host_id, proto, port)
);

CREATE TABLE note (
  id              INTEGER PRIMARY KEY AUTOINCREMENT,
  host_id         INTEGER NOT NULL REFERENCES host(id) ON DELETE CASCADE,
  service_id      INTEGER REFERENCES service(id) ON DELETE CASCADE,
  via_target      TEXT,
  xtype           TEXT NOT NULL,
  data            TEXT NOT NULL DEFAULT ''
);

CREATE TABLE vuln (
  id              INTEGER PRIMARY KEY AUTOINCREMENT,
  host_id         INTEGER NOT NULL REFERENCES host(id) ON DELETE CASCADE,
  service_id      INTEGER REFERENCES service(id) ON DELETE CASCADE,
  via_target      TEXT,
  xtype           TEXT NOT NULL,
  name            TEXT NOT NULL,
  severity        TEXT NOT NULL DEFAULT 'unknown',
  descr           TEXT NOT NULL DEFAULT '',
  data            TEXT NOT NULL DEFAULT '',
  refs            TEXT NOT NULL DEFAULT '[]'
);

CREATE INDEX idx_target_queue ON target(queue_id);
CREATE INDEX idx_target_hashval ON target(hashval);
CREATE INDEX idx_job_queue ON job(queue_id);
CREATE INDEX idx_service_host ON service(host_id);
CREATE INDEX idx_service_rescan ON service(rescan_ms);
CREATE INDEX idx_host_rescan ON host(rescan_ms);
CREATE INDEX idx_note_lookup ON note(host_id, xtype);
CREATE INDEX idx_vuln_lookup ON vuln(host_id, xtype);
"#;
