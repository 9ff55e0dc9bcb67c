//! Schema initialization for the shared store
//!
//! Every agent process opens the same SQLite database; the schema is
//! created on first open and is append-only thereafter.

use rusqlite::Connection;

/// Creates all tables and indexes if they do not already exist
pub fn initialize_schema(conn: &Connection) -> Result<(), rusqlite::Error> {
    conn.execute_batch(
        "
        -- Every URL the system has ever fetched. Acts as the dedup key
        -- for already-downloaded checks and anchors content versions and
        -- referer edges.
        CREATE TABLE IF NOT EXISTS urls (
            uuid TEXT PRIMARY KEY,
            url TEXT NOT NULL UNIQUE,
            last_retrieved TEXT
        );

        -- Fetched payload versions, owned by a url record. The oldest
        -- version is the one consulted by default fetch policy.
        CREATE TABLE IF NOT EXISTS content (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            url_uuid TEXT NOT NULL REFERENCES urls(uuid),
            data TEXT,
            cache_path TEXT,
            retrieved_at TEXT NOT NULL
        );
        CREATE INDEX IF NOT EXISTS idx_content_url ON content(url_uuid);

        -- Discovery provenance: which page referred to which. Edges are
        -- idempotent; duplicates are ignored at insert time.
        CREATE TABLE IF NOT EXISTS referers (
            url_uuid TEXT NOT NULL,
            referer_uuid TEXT NOT NULL,
            PRIMARY KEY (url_uuid, referer_uuid)
        );

        -- The distributed work queue. dl_order is the enqueue order used
        -- for lease priority; uuid is the item identity.
        CREATE TABLE IF NOT EXISTS dl_queue (
            dl_order INTEGER PRIMARY KEY AUTOINCREMENT,
            uuid TEXT NOT NULL UNIQUE,
            url TEXT NOT NULL UNIQUE,
            added_at TEXT NOT NULL,
            paused INTEGER NOT NULL DEFAULT 0,
            paused_until TEXT,
            locked_by TEXT,
            refresh_interval INTEGER
        );

        -- Domain-level cooldowns, shared across all agents. Rows are
        -- purged once wait_until passes.
        CREATE TABLE IF NOT EXISTS domain_wait (
            domain TEXT PRIMARY KEY,
            wait_until TEXT NOT NULL
        );

        -- Operator-maintained pattern cooldowns; read-only from the
        -- engine's perspective.
        CREATE TABLE IF NOT EXISTS pattern_wait (
            pattern TEXT PRIMARY KEY,
            wait INTEGER NOT NULL
        );

        -- Ephemeral rows present only while a fetch is in flight.
        CREATE TABLE IF NOT EXISTS active_dl (
            url_uuid TEXT PRIMARY KEY,
            url TEXT NOT NULL,
            started_by TEXT NOT NULL,
            started_at TEXT NOT NULL
        );
    ",
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_schema_is_idempotent() {
        let conn = Connection::open_in_memory().unwrap();
        initialize_schema(&conn).unwrap();
        initialize_schema(&conn).unwrap();

        let count: i64 = conn
            .query_row(
                "SELECT COUNT(*) FROM sqlite_master WHERE type = 'table' AND name = 'dl_queue'",
                [],
                |row| row.get(0),
            )
            .unwrap();
        assert_eq!(count, 1);
    }
}
