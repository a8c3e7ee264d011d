//! SQL migration definitions for the carebot database.
//!
//! Migrations are applied in order on database open.

/// A database migration with a version and SQL statements.
pub(crate) struct Migration {
    pub version: u32,
    pub description: &'static str,
    pub sql: &'static str,
}

/// All migrations, in ascending version order.
pub(crate) fn all_migrations() -> Vec<Migration> {
    vec![Migration {
        version: 1,
        description: "Initial schema: user_programs",
        sql: r#"
-- Schema version tracking
CREATE TABLE IF NOT EXISTS schema_migrations (
    version    INTEGER PRIMARY KEY,
    applied_at TEXT NOT NULL DEFAULT (datetime('now'))
);

-- Generated programs, one row per document on disk
CREATE TABLE IF NOT EXISTS user_programs (
    program_id   TEXT PRIMARY KEY,
    user_id      TEXT NOT NULL,
    username     TEXT NOT NULL,
    filename     TEXT NOT NULL,
    file_path    TEXT NOT NULL,
    content_hash TEXT NOT NULL,
    created_at   TEXT NOT NULL,
    program_type TEXT NOT NULL DEFAULT 'nutrition',
    status       TEXT NOT NULL DEFAULT 'active'
);

CREATE INDEX IF NOT EXISTS idx_user_programs_user ON user_programs(user_id, status);

INSERT INTO schema_migrations (version) VALUES (1);
"#,
    }]
}
