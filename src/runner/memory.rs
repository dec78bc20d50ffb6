//! Prompt-composition memory context: the blend of a task's own history and
//! cross-task "related knowledge" pulled from the memory graph (spec §4.3).
//! Behaviorally load-bearing for session continuity (spec §9) — tests D/F/G
//! pin the full-vs-cross-task-only split.

use crate::error::Result;
use crate::store::types::Task;
use crate::store::Store;

const OWN_HISTORY_LIMIT: i64 = 5;
const RELATED_ENTITY_LIMIT: usize = 5;
const RELATED_OBSERVATION_LIMIT: i64 = 3;
const MIN_TOKEN_LEN: usize = 2;

/// Full memory context: own history + cross-task related knowledge. `None`
/// if both sections are empty.
pub fn compose_full_context(store: &Store, task: &Task) -> Result<Option<String>> {
    let own = own_history_section(store, task)?;
    let related = related_knowledge_section(store, task)?;
    Ok(join_sections(&[own, related]))
}

/// Cross-task related knowledge only — used when continuing an existing
/// session, where the task's own history is already in the child's context.
pub fn compose_cross_task_context(store: &Store, task: &Task) -> Result<Option<String>> {
    let related = related_knowledge_section(store, task)?;
    Ok(join_sections(&[related]))
}

fn own_history_section(store: &Store, task: &Task) -> Result<Option<String>> {
    let Some(entity_id) = task.memory_entity_id else { return Ok(None) };
    let observations = store.list_observations(entity_id, Some(OWN_HISTORY_LIMIT))?;
    if observations.is_empty() {
        return Ok(None);
    }
    let mut section = String::from("## Your previous results:\n");
    for obs in &observations {
        section.push_str(&obs.content);
        section.push('\n');
    }
    Ok(Some(section.trim_end().to_string()))
}

fn related_knowledge_section(store: &Store, task: &Task) -> Result<Option<String>> {
    let own_entity_id = task.memory_entity_id;

    let mut seen = std::collections::HashSet::new();
    let mut related = Vec::new();

    for token in task.name.split_whitespace().filter(|t| t.chars().count() >= MIN_TOKEN_LEN) {
        for entity in store.search_entities(token)? {
            if Some(entity.id) == own_entity_id {
                continue;
            }
            if seen.insert(entity.id) {
                related.push(entity);
            }
        }
    }
    related.truncate(RELATED_ENTITY_LIMIT);

    if related.is_empty() {
        return Ok(None);
    }

    let mut section = String::from("## Related knowledge:\n");
    for entity in &related {
        let observations = store.list_observations(entity.id, Some(RELATED_OBSERVATION_LIMIT))?;
        for obs in &observations {
            section.push_str(&format!("[{}] {}\n", entity.name, obs.content));
        }
    }
    Ok(Some(section.trim_end().to_string()))
}

fn join_sections(sections: &[Option<String>]) -> Option<String> {
    let parts: Vec<&str> = sections.iter().filter_map(|s| s.as_deref()).collect();
    if parts.is_empty() {
        None
    } else {
        Some(parts.join("\n\n"))
    }
}

/// Divide the composed context from the task's raw prompt text (spec §4.3).
pub fn compose_prompt(context: Option<&str>, prompt: &str) -> String {
    match context {
        Some(context) => format!("{context}\n\n---\n\n{prompt}"),
        None => prompt.to_string(),
    }
}
