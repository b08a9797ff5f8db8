use std::collections::HashMap;

use cortex_types::{Memory, content_key};

/// A group of near-duplicate memories sharing one content key, newest first
#[derive(Debug, Clone)]
pub struct DuplicateGroup {
    pub key: String,
    pub memories: Vec<Memory>,
}

/// What to do with identified duplicate groups
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DedupeAction {
    Report,
    Merge,
    DeleteOlder,
}

impl DedupeAction {
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "report" => Some(DedupeAction::Report),
            "merge" => Some(DedupeAction::Merge),
            "delete_older" => Some(DedupeAction::DeleteOlder),
            _ => None,
        }
    }
}

/// A planned collapse: the surviving memory, the ids to delete, and the
/// merged category set for the survivor.
#[derive(Debug, Clone)]
pub struct CollapsePlan {
    pub survivor_id: String,
    pub delete_ids: Vec<String>,
    pub merged_categories: Vec<String>,
}

/// Group memories by their first-100-char lowercased key. Only groups with
/// more than one member are returned. Idempotent: running it over an
/// already-collapsed set yields no groups.
pub fn find_duplicate_groups(memories: &[Memory]) -> Vec<DuplicateGroup> {
    let mut by_key: HashMap<String, Vec<Memory>> = HashMap::new();
    for memory in memories {
        by_key
            .entry(content_key(&memory.content))
            .or_default()
            .push(memory.clone());
    }

    let mut groups: Vec<DuplicateGroup> = by_key
        .into_iter()
        .filter(|(_, members)| members.len() > 1)
        .map(|(key, mut members)| {
            members.sort_by(|a, b| b.created_at.cmp(&a.created_at));
            DuplicateGroup { key, memories: members }
        })
        .collect();
    groups.sort_by(|a, b| a.key.cmp(&b.key));
    groups
}

/// Plan the collapse of a duplicate group. The newest memory survives;
/// merge unions every member's categories into it.
pub fn plan_collapse(group: &DuplicateGroup, action: DedupeAction) -> Option<CollapsePlan> {
    if action == DedupeAction::Report || group.memories.len() < 2 {
        return None;
    }
    let survivor = &group.memories[0];
    let mut merged_categories = survivor.categories.clone();
    if action == DedupeAction::Merge {
        for member in &group.memories[1..] {
            for category in &member.categories {
                if !merged_categories.contains(category) {
                    merged_categories.push(category.clone());
                }
            }
        }
    }
    Some(CollapsePlan {
        survivor_id: survivor.id.clone(),
        delete_ids: group.memories[1..].iter().map(|m| m.id.clone()).collect(),
        merged_categories,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use cortex_types::MemorySource;

    fn memory(id: &str, content: &str, categories: &[&str], age_minutes: i64) -> Memory {
        let now = Utc::now();
        Memory {
            id: id.to_string(),
            content: content.to_string(),
            categories: categories.iter().map(|c| c.to_string()).collect(),
            importance: 1.0,
            confidence: 1.0,
            access_count: 0,
            created_at: now - chrono::Duration::minutes(age_minutes),
            last_accessed: now,
            expires_at: None,
            source: MemorySource::Agent,
            source_message_id: None,
        }
    }

    #[test]
    fn test_groups_by_normalized_prefix() {
        let memories = vec![
            memory("new", "The gateway   drains before restart", &["process"], 1),
            memory("old", "the gateway drains before restart", &["gotchas"], 60),
            memory("other", "completely different fact", &["general"], 5),
        ];
        let groups = find_duplicate_groups(&memories);
        assert_eq!(groups.len(), 1);
        assert_eq!(groups[0].memories[0].id, "new");
        assert_eq!(groups[0].memories[1].id, "old");
    }

    #[test]
    fn test_merge_plan_unions_categories() {
        let memories = vec![
            memory("new", "duplicate fact", &["process"], 1),
            memory("old", "duplicate fact", &["gotchas"], 60),
        ];
        let groups = find_duplicate_groups(&memories);
        let plan = plan_collapse(&groups[0], DedupeAction::Merge).unwrap();
        assert_eq!(plan.survivor_id, "new");
        assert_eq!(plan.delete_ids, vec!["old"]);
        assert!(plan.merged_categories.contains(&"process".to_string()));
        assert!(plan.merged_categories.contains(&"gotchas".to_string()));
    }

    #[test]
    fn test_delete_older_keeps_survivor_categories() {
        let memories = vec![
            memory("new", "duplicate fact", &["process"], 1),
            memory("old", "duplicate fact", &["gotchas"], 60),
        ];
        let groups = find_duplicate_groups(&memories);
        let plan = plan_collapse(&groups[0], DedupeAction::DeleteOlder).unwrap();
        assert_eq!(plan.merged_categories, vec!["process"]);
    }

    #[test]
    fn test_report_is_plan_free_and_idempotent() {
        let memories = vec![
            memory("new", "duplicate fact", &["process"], 1),
            memory("old", "duplicate fact", &["gotchas"], 60),
        ];
        let groups = find_duplicate_groups(&memories);
        assert!(plan_collapse(&groups[0], DedupeAction::Report).is_none());

        // After a collapse, a second run finds nothing
        let survivors = vec![memories[0].clone()];
        assert!(find_duplicate_groups(&survivors).is_empty());
    }
}
