//! v001 -- Initial schema creation.
//!
//! Creates the `documents` table shared by all collections.

use rusqlite::Connection;

/// SQL executed when upgrading from version 0 to version 1.
const UP_SQL: &str = r#"
-- ----------------------------------------------------------------
-- Documents
-- ----------------------------------------------------------------
CREATE TABLE IF NOT EXISTS documents (
    collection TEXT NOT NULL,                 -- "messages" | "users"
    id         TEXT NOT NULL,                 -- store-assigned or caller-chosen key
    seq        INTEGER NOT NULL,              -- insertion order, kept on replace
    body       TEXT NOT NULL,                 -- JSON object
    created_at TEXT NOT NULL,                 -- RFC-3339
    updated_at TEXT NOT NULL,                 -- RFC-3339

    PRIMARY KEY (collection, id)
);

CREATE INDEX IF NOT EXISTS idx_documents_collection_seq
    ON documents(collection, seq);
"#;

/// Apply the initial migration.
pub fn up(conn: &Connection) -> Result<(), rusqlite::Error> {
    conn.execute_batch(UP_SQL)
}
