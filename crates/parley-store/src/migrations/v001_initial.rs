//! v001 -- Initial schema creation.
//!
//! Creates the `kv` table shared by every named store.

use rusqlite::Connection;

const UP_SQL: &str = r#"
CREATE TABLE IF NOT EXISTS kv (
    store      TEXT NOT NULL,                 -- named store: state, session, users, ...
    key        TEXT NOT NULL,
    value      TEXT NOT NULL,                 -- JSON
    updated_at TEXT NOT NULL,                 -- RFC-3339

    PRIMARY KEY (store, key)
);
"#;

/// Apply the initial migration.
pub fn up(conn: &Connection) -> Result<(), rusqlite::Error> {
    conn.execute_batch(UP_SQL)
}
