//! Embedding storage for the memory subsystem's semantic-search side (spec
//! §3). Conflict key is `(source_type, source_id, model)`; upserting also
//! stamps `entities.embedded_at`.

use rusqlite::{params, OptionalExtension};

use super::types::Embedding;
use super::Store;
use crate::error::Result;

impl Store {
    pub fn upsert_embedding(&self, embedding: &Embedding) -> Result<()> {
        let conn = self.conn()?;
        conn.execute(
            r#"
            INSERT INTO embeddings (entity_id, source_type, source_id, text_hash, vector, model, dimensions)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
            ON CONFLICT(source_type, source_id, model) DO UPDATE SET
                entity_id = excluded.entity_id,
                text_hash = excluded.text_hash,
                vector = excluded.vector,
                dimensions = excluded.dimensions
            "#,
            params![
                embedding.entity_id,
                embedding.source_type,
                embedding.source_id,
                embedding.text_hash,
                embedding.vector,
                embedding.model,
                embedding.dimensions,
            ],
        )?;
        conn.execute(
            "UPDATE entities SET embedded_at = strftime('%Y-%m-%dT%H:%M:%fZ','now') WHERE id = ?1",
            [embedding.entity_id],
        )?;
        Ok(())
    }

    pub fn get_embeddings_for_entity(&self, entity_id: i64) -> Result<Vec<Embedding>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(&format!("{} WHERE entity_id = ?1", EMBEDDING_SELECT))?;
        let rows = stmt.query_map([entity_id], row_to_embedding)?;
        Ok(rows.collect::<std::result::Result<Vec<_>, _>>()?)
    }

    pub fn get_all_embeddings(&self, model: &str) -> Result<Vec<Embedding>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(&format!("{} WHERE model = ?1", EMBEDDING_SELECT))?;
        let rows = stmt.query_map([model], row_to_embedding)?;
        Ok(rows.collect::<std::result::Result<Vec<_>, _>>()?)
    }

    pub fn delete_embeddings_for_entity(&self, entity_id: i64) -> Result<()> {
        let conn = self.conn()?;
        conn.execute("DELETE FROM embeddings WHERE entity_id = ?1", [entity_id])?;
        Ok(())
    }

    /// Entities with no embedded_at, i.e. never indexed (spec §4.4 embedding
    /// indexer, §4.1 `list-unembedded`).
    pub fn list_unembedded_entities(&self, limit: i64) -> Result<Vec<i64>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT id FROM entities WHERE embedded_at IS NULL ORDER BY id LIMIT ?1",
        )?;
        let rows = stmt.query_map([limit], |r| r.get(0))?;
        Ok(rows.collect::<std::result::Result<Vec<_>, _>>()?)
    }

    pub fn get_embedding(&self, source_type: &str, source_id: i64, model: &str) -> Result<Option<Embedding>> {
        let conn = self.conn()?;
        conn.query_row(
            &format!("{} WHERE source_type = ?1 AND source_id = ?2 AND model = ?3", EMBEDDING_SELECT),
            params![source_type, source_id, model],
            row_to_embedding,
        )
        .optional()
        .map_err(Into::into)
    }
}

const EMBEDDING_SELECT: &str =
    "SELECT entity_id, source_type, source_id, text_hash, vector, model, dimensions FROM embeddings";

fn row_to_embedding(row: &rusqlite::Row) -> rusqlite::Result<Embedding> {
    Ok(Embedding {
        entity_id: row.get(0)?,
        source_type: row.get(1)?,
        source_id: row.get(2)?,
        text_hash: row.get(3)?,
        vector: row.get(4)?,
        model: row.get(5)?,
        dimensions: row.get(6)?,
    })
}
