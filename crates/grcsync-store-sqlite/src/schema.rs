//! SQL schema for the GRC sync SQLite store.
//!
//! Executed once at connection startup. Future migrations will be gated on
//! `PRAGMA user_version`.

/// Full schema DDL; idempotent thanks to `IF NOT EXISTS`.
pub const SCHEMA: &str = "
PRAGMA journal_mode = WAL;
PRAGMA foreign_keys = ON;

-- Written only by pulls.
CREATE TABLE IF NOT EXISTS systems (
    system_id         TEXT PRIMARY KEY,
    external_id       TEXT NOT NULL UNIQUE,
    name              TEXT NOT NULL,
    description       TEXT,
    remote_updated_at TEXT,
    last_pulled_at    TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS controls (
    control_id        TEXT PRIMARY KEY,
    system_id         TEXT NOT NULL REFERENCES systems(system_id),
    external_id       TEXT NOT NULL,
    control_number    TEXT NOT NULL,
    title             TEXT NOT NULL,
    family            TEXT,
    baseline          TEXT,
    remote_updated_at TEXT,
    last_pulled_at    TEXT NOT NULL,
    UNIQUE (system_id, external_id)
);

-- One statement per control. Every write is a compare-and-set on version.
CREATE TABLE IF NOT EXISTS statements (
    statement_id      TEXT PRIMARY KEY,
    control_id        TEXT NOT NULL UNIQUE REFERENCES controls(control_id),
    external_id       TEXT NOT NULL,
    remote_content    TEXT NOT NULL,
    remote_updated_at TEXT NOT NULL,
    local_content     TEXT,
    local_baseline_at TEXT NOT NULL,
    is_modified       INTEGER NOT NULL DEFAULT 0,
    sync_status       TEXT NOT NULL,   -- 'synced' | 'modified' | 'conflict'
    version           INTEGER NOT NULL DEFAULT 1,
    updated_at        TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS sync_jobs (
    job_id      TEXT PRIMARY KEY,
    kind        TEXT NOT NULL,        -- 'pull' | 'push'
    status      TEXT NOT NULL,
    actor       TEXT NOT NULL,
    target_ids  TEXT NOT NULL,        -- JSON array
    progress    TEXT NOT NULL,        -- JSON-encoded JobProgress
    results     TEXT NOT NULL DEFAULT '[]',
    error       TEXT,
    created_at  TEXT NOT NULL,
    started_at  TEXT,
    finished_at TEXT
);

-- Audit events are strictly append-only.
-- No UPDATE or DELETE is ever issued against this table; the triggers below
-- turn any attempt into an error.
CREATE TABLE IF NOT EXISTS audit_events (
    event_id    TEXT PRIMARY KEY,
    event_type  TEXT NOT NULL,
    entity_type TEXT NOT NULL,
    entity_id   TEXT NOT NULL,
    actor       TEXT NOT NULL,
    status      TEXT NOT NULL,
    details     TEXT NOT NULL DEFAULT 'null',
    created_at  TEXT NOT NULL        -- fixed-width RFC 3339; sorts as text
);

CREATE TRIGGER IF NOT EXISTS audit_events_no_update
BEFORE UPDATE ON audit_events
BEGIN
    SELECT RAISE(ABORT, 'audit events are append-only');
END;

CREATE TRIGGER IF NOT EXISTS audit_events_no_delete
BEFORE DELETE ON audit_events
BEGIN
    SELECT RAISE(ABORT, 'audit events are append-only');
END;

CREATE INDEX IF NOT EXISTS controls_system_idx     ON controls(system_id);
CREATE INDEX IF NOT EXISTS statements_status_idx   ON statements(sync_status);
CREATE INDEX IF NOT EXISTS sync_jobs_kind_idx      ON sync_jobs(kind, created_at);
CREATE INDEX IF NOT EXISTS audit_type_idx          ON audit_events(event_type, entity_type, created_at);
CREATE INDEX IF NOT EXISTS audit_actor_idx         ON audit_events(actor);
CREATE INDEX IF NOT EXISTS audit_created_idx       ON audit_events(created_at);

PRAGMA user_version = 1;
";
