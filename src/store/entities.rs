//! Entity / Observation / Relation CRUD (the memory graph, spec §3/§4.1).

use rusqlite::params;

use super::types::{Entity, Observation, Relation};
use super::Store;
use crate::error::Result;

impl Store {
    pub fn create_entity(&self, name: &str, entity_type: &str, category: Option<&str>) -> Result<Entity> {
        let conn = self.conn()?;
        conn.execute(
            "INSERT INTO entities (name, entity_type, category) VALUES (?1, ?2, ?3)",
            params![name, entity_type, category],
        )?;
        let id = conn.last_insert_rowid();
        self.get_entity(id)?.ok_or_else(|| {
            crate::error::DaymonError::Memory(format!("entity {id} vanished after insert"))
        })
    }

    pub fn get_entity(&self, id: i64) -> Result<Option<Entity>> {
        let conn = self.conn()?;
        let result = conn.query_row(
            "SELECT id, name, entity_type, category, embedded_at, created_at, updated_at FROM entities WHERE id = ?1",
            [id],
            row_to_entity,
        );
        match result {
            Ok(e) => Ok(Some(e)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    pub fn list_entities(&self, category: Option<&str>) -> Result<Vec<Entity>> {
        let conn = self.conn()?;
        let mut stmt = if category.is_some() {
            conn.prepare(
                "SELECT id, name, entity_type, category, embedded_at, created_at, updated_at FROM entities WHERE category = ?1 ORDER BY id DESC",
            )?
        } else {
            conn.prepare(
                "SELECT id, name, entity_type, category, embedded_at, created_at, updated_at FROM entities ORDER BY id DESC",
            )?
        };
        let rows = if let Some(c) = category {
            stmt.query_map([c], row_to_entity)?
        } else {
            stmt.query_map([], row_to_entity)?
        };
        Ok(rows.collect::<std::result::Result<Vec<_>, _>>()?)
    }

    pub fn update_entity(
        &self,
        id: i64,
        name: Option<&str>,
        category: Option<&str>,
    ) -> Result<()> {
        let conn = self.conn()?;
        conn.execute(
            "UPDATE entities SET name = COALESCE(?2, name), category = COALESCE(?3, category), updated_at = strftime('%Y-%m-%dT%H:%M:%fZ','now') WHERE id = ?1",
            params![id, name, category],
        )?;
        Ok(())
    }

    pub fn delete_entity(&self, id: i64) -> Result<()> {
        let conn = self.conn()?;
        conn.execute("DELETE FROM entities WHERE id = ?1", [id])?;
        Ok(())
    }

    /// FTS search over name+category; falls back to LIKE on special
    /// characters the FTS5 `MATCH` query syntax rejects (spec §4.1 failure
    /// mode).
    pub fn search_entities(&self, query: &str) -> Result<Vec<Entity>> {
        let conn = self.conn()?;
        let fts_result = conn
            .prepare(
                r#"
                SELECT e.id, e.name, e.entity_type, e.category, e.embedded_at, e.created_at, e.updated_at
                FROM entities_fts f
                JOIN entities e ON f.rowid = e.id
                WHERE entities_fts MATCH ?1
                ORDER BY rank
                "#,
            )
            .and_then(|mut stmt| {
                let rows = stmt.query_map([query], row_to_entity)?;
                rows.collect::<std::result::Result<Vec<_>, _>>()
            });

        match fts_result {
            Ok(rows) => Ok(rows),
            Err(_) => {
                let like = format!("%{}%", query.replace('%', "").replace('_', ""));
                let mut stmt = conn.prepare(
                    "SELECT id, name, entity_type, category, embedded_at, created_at, updated_at FROM entities WHERE name LIKE ?1 OR category LIKE ?1 ORDER BY id DESC",
                )?;
                let rows = stmt.query_map([&like], row_to_entity)?;
                Ok(rows.collect::<std::result::Result<Vec<_>, _>>()?)
            }
        }
    }

    pub fn add_observation(&self, entity_id: i64, content: &str, source: Option<&str>) -> Result<Observation> {
        let conn = self.conn()?;
        conn.execute(
            "INSERT INTO observations (entity_id, content, source) VALUES (?1, ?2, ?3)",
            params![entity_id, content, source],
        )?;
        let id = conn.last_insert_rowid();
        conn.execute(
            "UPDATE entities SET updated_at = strftime('%Y-%m-%dT%H:%M:%fZ','now') WHERE id = ?1",
            [entity_id],
        )?;
        conn.query_row(
            "SELECT id, entity_id, content, source, created_at FROM observations WHERE id = ?1",
            [id],
            row_to_observation,
        )
        .map_err(Into::into)
    }

    /// Newest first, per spec §4.1.
    pub fn list_observations(&self, entity_id: i64, limit: Option<i64>) -> Result<Vec<Observation>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT id, entity_id, content, source, created_at FROM observations WHERE entity_id = ?1 ORDER BY id DESC LIMIT ?2",
        )?;
        let rows = stmt.query_map(params![entity_id, limit.unwrap_or(i64::MAX)], row_to_observation)?;
        Ok(rows.collect::<std::result::Result<Vec<_>, _>>()?)
    }

    pub fn delete_observation(&self, id: i64) -> Result<()> {
        let conn = self.conn()?;
        conn.execute("DELETE FROM observations WHERE id = ?1", [id])?;
        Ok(())
    }

    /// Prune an entity's observations down to the most recent `keep`,
    /// ordered by `id DESC` (insertion order) — spec §9 Open Question:
    /// preserve id-DESC, never reorder by updated_at.
    pub fn prune_observations(&self, entity_id: i64, keep: i64) -> Result<()> {
        let conn = self.conn()?;
        conn.execute(
            r#"
            DELETE FROM observations
            WHERE entity_id = ?1
              AND id NOT IN (
                  SELECT id FROM observations WHERE entity_id = ?1 ORDER BY id DESC LIMIT ?2
              )
            "#,
            params![entity_id, keep],
        )?;
        Ok(())
    }

    pub fn add_relation(&self, from_entity_id: i64, to_entity_id: i64, relation_type: &str) -> Result<Relation> {
        let conn = self.conn()?;
        conn.execute(
            "INSERT INTO relations (from_entity_id, to_entity_id, relation_type) VALUES (?1, ?2, ?3)",
            params![from_entity_id, to_entity_id, relation_type],
        )?;
        let id = conn.last_insert_rowid();
        conn.query_row(
            "SELECT id, from_entity_id, to_entity_id, relation_type, created_at FROM relations WHERE id = ?1",
            [id],
            row_to_relation,
        )
        .map_err(Into::into)
    }

    pub fn list_relations_for_entity(&self, entity_id: i64) -> Result<Vec<Relation>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT id, from_entity_id, to_entity_id, relation_type, created_at FROM relations WHERE from_entity_id = ?1 OR to_entity_id = ?1",
        )?;
        let rows = stmt.query_map([entity_id], row_to_relation)?;
        Ok(rows.collect::<std::result::Result<Vec<_>, _>>()?)
    }

    pub fn delete_relation(&self, id: i64) -> Result<()> {
        let conn = self.conn()?;
        conn.execute("DELETE FROM relations WHERE id = ?1", [id])?;
        Ok(())
    }
}

fn row_to_entity(row: &rusqlite::Row) -> rusqlite::Result<Entity> {
    Ok(Entity {
        id: row.get(0)?,
        name: row.get(1)?,
        entity_type: row.get(2)?,
        category: row.get(3)?,
        embedded_at: row.get(4)?,
        created_at: row.get(5)?,
        updated_at: row.get(6)?,
    })
}

fn row_to_observation(row: &rusqlite::Row) -> rusqlite::Result<Observation> {
    Ok(Observation {
        id: row.get(0)?,
        entity_id: row.get(1)?,
        content: row.get(2)?,
        source: row.get(3)?,
        created_at: row.get(4)?,
    })
}

fn row_to_relation(row: &rusqlite::Row) -> rusqlite::Result<Relation> {
    Ok(Relation {
        id: row.get(0)?,
        from_entity_id: row.get(1)?,
        to_entity_id: row.get(2)?,
        relation_type: row.get(3)?,
        created_at: row.get(4)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_store() -> (Store, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let store = Store::open(&dir.path().join("daymon.db")).unwrap();
        (store, dir)
    }

    // Invariant 7: create+addObservation round-trips through get/list, and
    // FTS search for any whitespace-separated name substring (len >= 2)
    // returns the entity.
    #[test]
    fn entity_round_trips_through_get_and_fts_search() {
        let (store, _dir) = test_store();
        let entity = store.create_entity("Project Phoenix", "task_result", Some("task")).unwrap();
        store.add_observation(entity.id, "kicked off the migration", Some("task_run")).unwrap();

        let fetched = store.get_entity(entity.id).unwrap().unwrap();
        assert_eq!(fetched.name, "Project Phoenix");

        let listed = store.list_entities(Some("task")).unwrap();
        assert!(listed.iter().any(|e| e.id == entity.id));

        for token in ["Project", "Phoenix"] {
            let hits = store.search_entities(token).unwrap();
            assert!(hits.iter().any(|e| e.id == entity.id), "expected {token} to match via FTS");
        }

        let observations = store.list_observations(entity.id, None).unwrap();
        assert_eq!(observations.len(), 1);
        assert_eq!(observations[0].content, "kicked off the migration");
    }

    #[test]
    fn search_falls_back_to_like_on_fts_special_characters() {
        let (store, _dir) = test_store();
        store.create_entity("Weird \"Quoted\" Name", "note", None).unwrap();
        // FTS5 MATCH rejects bare unbalanced quotes; the LIKE fallback should
        // still find it rather than propagating the parse error.
        let hits = store.search_entities("\"Quoted").unwrap();
        assert!(hits.iter().any(|e| e.name.contains("Quoted")));
    }

    #[test]
    fn cascade_delete_removes_observations_and_relations() {
        let (store, _dir) = test_store();
        let a = store.create_entity("A", "note", None).unwrap();
        let b = store.create_entity("B", "note", None).unwrap();
        store.add_observation(a.id, "obs", None).unwrap();
        store.add_relation(a.id, b.id, "relates_to").unwrap();

        store.delete_entity(a.id).unwrap();

        assert!(store.list_observations(a.id, None).unwrap().is_empty());
        assert!(store.list_relations_for_entity(a.id).unwrap().is_empty());
        // b survives; only a's rows cascaded.
        assert!(store.get_entity(b.id).unwrap().is_some());
    }

    // Spec §9 Open Question: prune_observations keeps the most recent `keep`
    // ordered by id DESC (insertion order), never reordered by updated_at.
    #[test]
    fn prune_observations_keeps_newest_by_insertion_order() {
        let (store, _dir) = test_store();
        let entity = store.create_entity("Task: X", "task_result", Some("task")).unwrap();
        for i in 0..15 {
            store.add_observation(entity.id, &format!("obs {i}"), None).unwrap();
        }
        store.prune_observations(entity.id, 10).unwrap();

        let remaining = store.list_observations(entity.id, None).unwrap();
        assert_eq!(remaining.len(), 10);
        assert_eq!(remaining[0].content, "obs 14");
        assert_eq!(remaining[9].content, "obs 5");
    }
}
