//! Read/write helpers for stored documents.

use chrono::Utc;
use rusqlite::params;

use agora_shared::remote::Document;
use agora_shared::types::{Collection, DocumentId};

use crate::database::Database;
use crate::error::{Result, StoreError};

/// A document as persisted, with the collection it belongs to and its
/// insertion sequence number.
#[derive(Debug, Clone, PartialEq)]
pub struct StoredDocument {
    pub collection: Collection,
    pub seq: u64,
    pub document: Document,
}

impl Database {
    // ------------------------------------------------------------------
    // Write
    // ------------------------------------------------------------------

    /// Insert a document, or replace the body of an existing one.
    ///
    /// On replace the original `seq` and `created_at` are kept, so a
    /// document's position in insertion order never moves.
    pub fn upsert_document(&self, collection: Collection, seq: u64, doc: &Document) -> Result<()> {
        let now = Utc::now().to_rfc3339();
        let body = serde_json::to_string(&doc.fields)?;
        self.conn().execute(
            "INSERT INTO documents (collection, id, seq, body, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?5)
             ON CONFLICT(collection, id) DO UPDATE SET
                 body = excluded.body,
                 updated_at = excluded.updated_at",
            params![collection.as_str(), doc.id.as_str(), seq as i64, body, now],
        )?;
        Ok(())
    }

    // ------------------------------------------------------------------
    // Read
    // ------------------------------------------------------------------

    /// Load every document of one collection in insertion order.
    pub fn load_collection(&self, collection: Collection) -> Result<Vec<StoredDocument>> {
        let mut stmt = self.conn().prepare(
            "SELECT collection, id, seq, body
             FROM documents
             WHERE collection = ?1
             ORDER BY seq ASC",
        )?;

        let rows = stmt.query_map(params![collection.as_str()], row_to_parts)?;

        let mut docs = Vec::new();
        for row in rows {
            docs.push(parts_to_document(row?)?);
        }
        Ok(docs)
    }

    /// Number of documents in one collection.
    pub fn count_documents(&self, collection: Collection) -> Result<u64> {
        let count: i64 = self.conn().query_row(
            "SELECT COUNT(*) FROM documents WHERE collection = ?1",
            params![collection.as_str()],
            |row| row.get(0),
        )?;
        Ok(count as u64)
    }

    /// Highest sequence number in use across all collections, 0 when empty.
    pub fn max_seq(&self) -> Result<u64> {
        let max: Option<i64> =
            self.conn()
                .query_row("SELECT MAX(seq) FROM documents", [], |row| row.get(0))?;
        Ok(max.unwrap_or(0) as u64)
    }

    // ------------------------------------------------------------------
    // Delete
    // ------------------------------------------------------------------

    /// Delete a document. Returns `true` if a row was deleted.
    pub fn delete_document(&self, collection: Collection, id: &DocumentId) -> Result<bool> {
        let affected = self.conn().execute(
            "DELETE FROM documents WHERE collection = ?1 AND id = ?2",
            params![collection.as_str(), id.as_str()],
        )?;
        Ok(affected > 0)
    }
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

type RowParts = (String, String, i64, String);

fn row_to_parts(row: &rusqlite::Row<'_>) -> rusqlite::Result<RowParts> {
    Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?))
}

fn parts_to_document((collection, id, seq, body): RowParts) -> Result<StoredDocument> {
    let collection =
        Collection::from_name(&collection).ok_or(StoreError::UnknownCollection(collection))?;
    let fields = serde_json::from_str(&body)?;
    Ok(StoredDocument {
        collection,
        seq: seq as u64,
        document: Document::new(DocumentId::new(id), fields),
    })
}
