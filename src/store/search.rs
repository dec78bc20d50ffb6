//! Hybrid search: reciprocal-rank-fusion of FTS ranking against a
//! precomputed semantic (cosine-similarity) list (spec §3/§4.1).
//!
//! Grounded in the teacher's `recover_context_hybrid` (RRF over FTS rank +
//! vector rank), adapted to this spec's exact blend: combined score is
//! `0.4 * (1 / (60 + r_fts)) + 0.6 * semantic_score`, not a symmetric RRF
//! sum — the semantic side contributes its raw cosine score, not a second
//! rank-based term. An entity present in only one list contributes only
//! that side's term.

use std::collections::HashMap;

use super::types::{Entity, EntitySearchHit, SemanticHit};
use super::Store;
use crate::error::Result;

const FTS_WEIGHT: f64 = 0.4;
const SEMANTIC_WEIGHT: f64 = 0.6;
const RRF_K: f64 = 60.0;

impl Store {
    /// `semantic_results`, when present, is assumed already sorted by
    /// descending score; it need not be exhaustive. With `None` this
    /// degenerates to plain FTS ordering (spec invariant 8).
    pub fn hybrid_search(
        &self,
        query: &str,
        semantic_results: Option<&[SemanticHit]>,
        limit: i64,
    ) -> Result<Vec<EntitySearchHit>> {
        let fts_hits = self.search_entities(query)?;

        let semantic_results = match semantic_results {
            Some(hits) if !hits.is_empty() => hits,
            _ => {
                return Ok(fts_hits
                    .into_iter()
                    .take(limit.max(0) as usize)
                    .map(|entity| EntitySearchHit { entity, rank: 0.0 })
                    .collect());
            }
        };

        let mut by_id: HashMap<i64, Entity> = HashMap::new();
        let mut scores: HashMap<i64, f64> = HashMap::new();

        for (rank, entity) in fts_hits.into_iter().enumerate() {
            let score = FTS_WEIGHT * (1.0 / (RRF_K + rank as f64));
            *scores.entry(entity.id).or_insert(0.0) += score;
            by_id.insert(entity.id, entity);
        }

        for hit in semantic_results {
            let score = SEMANTIC_WEIGHT * hit.score;
            *scores.entry(hit.entity_id).or_insert(0.0) += score;
            by_id.entry(hit.entity_id).or_insert_with(|| {
                self.get_entity(hit.entity_id).ok().flatten().unwrap_or_else(|| Entity {
                    id: hit.entity_id,
                    name: String::new(),
                    entity_type: String::new(),
                    category: None,
                    embedded_at: None,
                    created_at: String::new(),
                    updated_at: String::new(),
                })
            });
        }

        let mut ranked: Vec<(i64, f64)> = scores.into_iter().collect();
        ranked.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));

        Ok(ranked
            .into_iter()
            .filter_map(|(id, score)| by_id.remove(&id).map(|entity| EntitySearchHit { entity, rank: score }))
            .take(limit.max(0) as usize)
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_store() -> (Store, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let store = Store::open(&dir.path().join("daymon.db")).unwrap();
        (store, dir)
    }

    // Invariant 8: with an empty/absent semantic list, hybridSearch
    // degenerates to plain FTS ordering.
    #[test]
    fn empty_semantic_list_degenerates_to_fts_ordering() {
        let (store, _dir) = test_store();
        store.create_entity("Rust Release Notes", "note", None).unwrap();
        store.create_entity("Rust Style Guide", "note", None).unwrap();

        let fts_only = store.search_entities("Rust").unwrap();
        let hybrid_none = store.hybrid_search("Rust", None, 10).unwrap();
        let hybrid_empty = store.hybrid_search("Rust", Some(&[]), 10).unwrap();

        let fts_ids: Vec<i64> = fts_only.iter().map(|e| e.id).collect();
        let hybrid_none_ids: Vec<i64> = hybrid_none.iter().map(|h| h.entity.id).collect();
        let hybrid_empty_ids: Vec<i64> = hybrid_empty.iter().map(|h| h.entity.id).collect();

        assert_eq!(fts_ids, hybrid_none_ids);
        assert_eq!(fts_ids, hybrid_empty_ids);
    }

    #[test]
    fn semantic_only_hit_still_surfaces_via_rrf() {
        let (store, _dir) = test_store();
        let fts_hit = store.create_entity("Rust Release Notes", "note", None).unwrap();
        let semantic_only = store.create_entity("Completely Unrelated", "note", None).unwrap();

        let semantic = vec![SemanticHit { entity_id: semantic_only.id, score: 0.9 }];
        let results = store.hybrid_search("Rust", Some(&semantic), 10).unwrap();

        let ids: Vec<i64> = results.iter().map(|h| h.entity.id).collect();
        assert!(ids.contains(&fts_hit.id));
        assert!(ids.contains(&semantic_only.id));
    }

    #[test]
    fn limit_bounds_result_count() {
        let (store, _dir) = test_store();
        for i in 0..5 {
            store.create_entity(&format!("Rust Thing {i}"), "note", None).unwrap();
        }
        let results = store.hybrid_search("Rust", None, 2).unwrap();
        assert_eq!(results.len(), 2);
    }
}
