//! Schema and migrations, following `crucible-sqlite::schema::apply_migrations`:
//! one idempotent `CREATE TABLE IF NOT EXISTS` batch, no external migration
//! framework. Foreign keys are enforced per spec.md §6.

use rusqlite::Connection;

const SCHEMA_SQL: &str = r#"
PRAGMA foreign_keys = ON;

CREATE TABLE IF NOT EXISTS servers (
    name            TEXT PRIMARY KEY,
    transport_kind  TEXT NOT NULL,
    transport_json  TEXT NOT NULL,
    enabled         INTEGER NOT NULL DEFAULT 0,
    placement_host  TEXT,
    placement_mode  TEXT,
    created_at      TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS placements (
    id          INTEGER PRIMARY KEY AUTOINCREMENT,
    server      TEXT NOT NULL REFERENCES servers(name) ON DELETE CASCADE,
    host        TEXT NOT NULL,
    enabled     INTEGER NOT NULL DEFAULT 1,
    UNIQUE(server, host)
);

CREATE TABLE IF NOT EXISTS contexts (
    name        TEXT PRIMARY KEY,
    description TEXT NOT NULL DEFAULT '',
    is_default  INTEGER NOT NULL DEFAULT 0
);

-- At most one default context: enforced in application code via a
-- transactional swap (spec.md §4.6), not a SQL constraint, since SQLite
-- has no native "unique where true" short of a partial index -- which we
-- do add as defense in depth.
CREATE UNIQUE INDEX IF NOT EXISTS idx_contexts_single_default
    ON contexts(is_default) WHERE is_default = 1;

CREATE TABLE IF NOT EXISTS context_servers (
    id          INTEGER PRIMARY KEY AUTOINCREMENT,
    context     TEXT NOT NULL REFERENCES contexts(name) ON DELETE CASCADE,
    server      TEXT NOT NULL REFERENCES servers(name) ON DELETE CASCADE,
    enabled     INTEGER NOT NULL DEFAULT 1,
    UNIQUE(context, server)
);

CREATE TABLE IF NOT EXISTS tool_overrides (
    id              INTEGER PRIMARY KEY AUTOINCREMENT,
    context         TEXT NOT NULL,
    server          TEXT NOT NULL,
    tool_name       TEXT NOT NULL,
    enabled         INTEGER NOT NULL,
    UNIQUE(context, server, tool_name),
    FOREIGN KEY(context, server) REFERENCES context_servers(context, server) ON DELETE CASCADE
);

CREATE TABLE IF NOT EXISTS schema_meta (
    key     TEXT PRIMARY KEY,
    value   TEXT NOT NULL
);
"#;

pub fn apply_migrations(conn: &Connection) -> rusqlite::Result<()> {
    // `context_servers` needs a UNIQUE(context, server) index before the
    // tool_overrides FK referencing it can be created; executed in one
    // batch in declaration order above, which already satisfies that.
    conn.execute_batch(SCHEMA_SQL)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn migrations_are_idempotent() {
        let conn = Connection::open_in_memory().unwrap();
        apply_migrations(&conn).unwrap();
        apply_migrations(&conn).unwrap();
    }

    #[test]
    fn enforces_single_default_context() {
        let conn = Connection::open_in_memory().unwrap();
        apply_migrations(&conn).unwrap();
        conn.execute(
            "INSERT INTO contexts (name, description, is_default) VALUES ('a', '', 1)",
            [],
        )
        .unwrap();
        let err = conn
            .execute(
                "INSERT INTO contexts (name, description, is_default) VALUES ('b', '', 1)",
                [],
            )
            .unwrap_err();
        assert!(format!("{err}").to_lowercase().contains("unique"));
    }
}
