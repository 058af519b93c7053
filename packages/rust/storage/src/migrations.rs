//! SQL migration definitions for the Curator database.
//!
//! Migrations are applied in order on database open; each records its
//! version in `schema_migrations`.

pub(crate) struct Migration {
    pub version: u32,
    pub description: &'static str,
    pub sql: &'static str,
}

/// All migrations, in ascending version order.
pub(crate) fn all_migrations() -> Vec<Migration> {
    vec![
        Migration {
            version: 1,
            description: "Initial schema: records, runs",
            sql: r#"
CREATE TABLE IF NOT EXISTS schema_migrations (
    version    INTEGER PRIMARY KEY,
    applied_at TEXT NOT NULL DEFAULT (datetime('now'))
);

-- Integrated snippets, one row per record key
CREATE TABLE IF NOT EXISTS records (
    key           TEXT PRIMARY KEY,
    content       TEXT NOT NULL,
    source        TEXT NOT NULL,
    language      TEXT NOT NULL,
    quality_score REAL NOT NULL,
    quality_tier  TEXT NOT NULL,
    fingerprint   TEXT NOT NULL,
    integrated_at TEXT NOT NULL,
    metadata_json TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_records_language ON records(language);
CREATE INDEX IF NOT EXISTS idx_records_score ON records(quality_score DESC);
CREATE INDEX IF NOT EXISTS idx_records_fingerprint ON records(fingerprint);

-- One row per pipeline run started from the CLI
CREATE TABLE IF NOT EXISTS runs (
    id          TEXT PRIMARY KEY,
    started_at  TEXT NOT NULL,
    finished_at TEXT,
    final_state TEXT,
    stats_json  TEXT
);

INSERT INTO schema_migrations (version) VALUES (1);
"#,
        },
    ]
}
