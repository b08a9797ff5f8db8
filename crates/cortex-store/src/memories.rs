use chrono::{DateTime, Utc};
use cortex_types::{
    CONFIDENCE_MAX, CONFIDENCE_MIN, ConfidenceAudit, IMPORTANCE_MAX, IMPORTANCE_MIN, Memory,
    MemorySource, NewMemory,
};
use rusqlite::{OptionalExtension, Row, params};
use uuid::Uuid;

use crate::store::{fts_expr, json_list, not_found, retry_once, to_json};
use crate::{Error, Result, Store};

/// Content mutation for an existing memory
#[derive(Debug, Clone)]
pub enum EditOp {
    Append(String),
    Replace(String),
}

/// Metadata mutation for an existing memory. Unset fields are untouched.
#[derive(Debug, Clone, Default)]
pub struct MemoryUpdate {
    pub importance: Option<f64>,
    pub categories: Option<Vec<String>>,
    pub confidence: Option<(f64, String)>,
    pub expires_at: Option<Option<DateTime<Utc>>>,
}

fn memory_from_row(row: &Row) -> rusqlite::Result<(Memory, String)> {
    let categories_raw: String = row.get(2)?;
    let source_raw: String = row.get(9)?;
    let memory = Memory {
        id: row.get(0)?,
        content: row.get(1)?,
        categories: Vec::new(),
        importance: row.get(3)?,
        confidence: row.get(4)?,
        access_count: row.get::<_, i64>(5)? as u32,
        created_at: row.get(6)?,
        last_accessed: row.get(7)?,
        expires_at: row.get(8)?,
        source: MemorySource::parse(&source_raw).unwrap_or(MemorySource::Agent),
        source_message_id: row.get(10)?,
    };
    Ok((memory, categories_raw))
}

fn finish(pair: (Memory, String)) -> Result<Memory> {
    let (mut memory, categories_raw) = pair;
    memory.categories = json_list(&categories_raw)?;
    Ok(memory)
}

const MEMORY_COLUMNS: &str = "id, content, categories, importance, confidence, access_count, \
     created_at, last_accessed, expires_at, source, source_message_id";

impl Store {
    pub fn add_memory(&self, new: NewMemory) -> Result<Memory> {
        validate_confidence(new.confidence)?;
        validate_importance(new.importance)?;
        if new.content.trim().is_empty() {
            return Err(Error::Validation("memory content is empty".to_string()));
        }

        let categories = if new.categories.is_empty() {
            vec![cortex_types::DEFAULT_CATEGORY.to_string()]
        } else {
            new.categories
        };

        let now = Utc::now();
        let memory = Memory {
            id: Uuid::new_v4().to_string(),
            content: new.content,
            categories,
            importance: new.importance,
            confidence: new.confidence,
            access_count: 0,
            created_at: now,
            last_accessed: now,
            expires_at: new.expires_at,
            source: new.source,
            source_message_id: new.source_message_id,
        };

        let tx = self.conn().unchecked_transaction()?;
        retry_once(|| {
            tx.execute(
                r#"
                INSERT INTO memories (id, content, categories, importance, confidence,
                    access_count, created_at, last_accessed, last_updated, expires_at,
                    source, source_message_id)
                VALUES (?1, ?2, ?3, ?4, ?5, 0, ?6, ?6, ?6, ?7, ?8, ?9)
                "#,
                params![
                    &memory.id,
                    &memory.content,
                    to_json(&memory.categories).unwrap_or_else(|_| "[]".to_string()),
                    memory.importance,
                    memory.confidence,
                    now,
                    memory.expires_at,
                    memory.source.as_str(),
                    &memory.source_message_id,
                ],
            )
        })?;
        tx.execute(
            "INSERT INTO memories_fts (content, memory_id) VALUES (?1, ?2)",
            params![&memory.content, &memory.id],
        )?;
        tx.execute(
            "INSERT INTO confidence_audit (memory_id, old, new, reason, at) VALUES (?1, ?2, ?3, ?4, ?5)",
            params![&memory.id, memory.confidence, memory.confidence, "created", now],
        )?;
        tx.commit()?;

        Ok(memory)
    }

    pub fn get_memory(&self, id: &str) -> Result<Memory> {
        let pair = self
            .conn()
            .query_row(
                &format!("SELECT {} FROM memories WHERE id = ?1", MEMORY_COLUMNS),
                [id],
                memory_from_row,
            )
            .optional()?;
        match pair {
            Some(pair) => finish(pair),
            None => not_found("memory", id),
        }
    }

    pub fn edit_memory(&self, id: &str, op: EditOp) -> Result<Memory> {
        let existing = self.get_memory(id)?;
        let content = match op {
            EditOp::Append(extra) => format!("{}\n{}", existing.content, extra),
            EditOp::Replace(new_content) => new_content,
        };
        if content.trim().is_empty() {
            return Err(Error::Validation("memory content is empty".to_string()));
        }

        let now = Utc::now();
        let tx = self.conn().unchecked_transaction()?;
        tx.execute(
            "UPDATE memories SET content = ?1, last_updated = ?2 WHERE id = ?3",
            params![&content, now, id],
        )?;
        tx.execute("DELETE FROM memories_fts WHERE memory_id = ?1", [id])?;
        tx.execute(
            "INSERT INTO memories_fts (content, memory_id) VALUES (?1, ?2)",
            params![&content, id],
        )?;
        tx.commit()?;

        self.get_memory(id)
    }

    pub fn update_memory_fields(&self, id: &str, update: MemoryUpdate) -> Result<Memory> {
        let existing = self.get_memory(id)?;
        let now = Utc::now();

        if let Some(importance) = update.importance {
            validate_importance(importance)?;
        }
        if let Some((confidence, _)) = &update.confidence {
            validate_confidence(*confidence)?;
        }
        if let Some(categories) = &update.categories
            && categories.is_empty()
        {
            return Err(Error::Validation(
                "memory must keep at least one category".to_string(),
            ));
        }

        let tx = self.conn().unchecked_transaction()?;
        if let Some(importance) = update.importance {
            tx.execute(
                "UPDATE memories SET importance = ?1, last_updated = ?2 WHERE id = ?3",
                params![importance, now, id],
            )?;
        }
        if let Some(categories) = &update.categories {
            tx.execute(
                "UPDATE memories SET categories = ?1, last_updated = ?2 WHERE id = ?3",
                params![to_json(categories)?, now, id],
            )?;
        }
        if let Some((confidence, reason)) = &update.confidence {
            tx.execute(
                "UPDATE memories SET confidence = ?1, last_updated = ?2 WHERE id = ?3",
                params![confidence, now, id],
            )?;
            tx.execute(
                "INSERT INTO confidence_audit (memory_id, old, new, reason, at) VALUES (?1, ?2, ?3, ?4, ?5)",
                params![id, existing.confidence, confidence, reason, now],
            )?;
        }
        if let Some(expires_at) = update.expires_at {
            tx.execute(
                "UPDATE memories SET expires_at = ?1, last_updated = ?2 WHERE id = ?3",
                params![expires_at, now, id],
            )?;
        }
        tx.commit()?;

        self.get_memory(id)
    }

    /// Confidence update with its audit row, in one logical operation
    pub fn update_confidence(&self, id: &str, new: f64, reason: &str) -> Result<Memory> {
        self.update_memory_fields(
            id,
            MemoryUpdate {
                confidence: Some((new, reason.to_string())),
                ..Default::default()
            },
        )
    }

    pub fn delete_memory(&self, id: &str) -> Result<()> {
        let tx = self.conn().unchecked_transaction()?;
        let deleted = tx.execute("DELETE FROM memories WHERE id = ?1", [id])?;
        tx.execute("DELETE FROM memories_fts WHERE memory_id = ?1", [id])?;
        tx.commit()?;
        if deleted == 0 {
            return not_found("memory", id);
        }
        Ok(())
    }

    pub fn batch_delete(&self, ids: &[String]) -> Result<usize> {
        let tx = self.conn().unchecked_transaction()?;
        let mut deleted = 0;
        for id in ids {
            deleted += tx.execute("DELETE FROM memories WHERE id = ?1", [id])?;
            tx.execute("DELETE FROM memories_fts WHERE memory_id = ?1", [id])?;
        }
        tx.commit()?;
        Ok(deleted)
    }

    pub fn get_recent(&self, limit: usize, categories: Option<&[String]>) -> Result<Vec<Memory>> {
        let fetch = if categories.is_some() { limit * 5 } else { limit };
        let mut stmt = self.conn().prepare(&format!(
            "SELECT {} FROM memories ORDER BY created_at DESC LIMIT ?1",
            MEMORY_COLUMNS
        ))?;
        let pairs = stmt
            .query_map([fetch as i64], memory_from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;

        let mut memories = Vec::with_capacity(pairs.len());
        for pair in pairs {
            memories.push(finish(pair)?);
        }
        if let Some(wanted) = categories {
            memories.retain(|m| m.categories.iter().any(|c| wanted.contains(c)));
        }
        memories.truncate(limit);
        Ok(memories)
    }

    /// Full-text search over memory content, filtered by category set and
    /// minimum confidence, ordered by FTS rank.
    pub fn search(
        &self,
        query: &str,
        categories: Option<&[String]>,
        min_confidence: Option<f64>,
        limit: usize,
    ) -> Result<Vec<Memory>> {
        let Some(expr) = fts_expr(query) else {
            return Ok(Vec::new());
        };

        let columns = MEMORY_COLUMNS
            .split(", ")
            .map(|c| format!("m.{}", c))
            .collect::<Vec<_>>()
            .join(", ");
        let mut stmt = self.conn().prepare(&format!(
            r#"
            SELECT {} FROM memories m
            JOIN (
                SELECT memory_id, rank FROM memories_fts
                WHERE memories_fts MATCH ?1
                ORDER BY rank
                LIMIT ?2
            ) f ON m.id = f.memory_id
            ORDER BY f.rank
            "#,
            columns
        ))?;
        let fetch = (limit * 5).max(20);
        let pairs = stmt
            .query_map(params![expr, fetch as i64], memory_from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;

        let mut memories = Vec::with_capacity(pairs.len());
        for pair in pairs {
            memories.push(finish(pair)?);
        }
        if let Some(wanted) = categories {
            memories.retain(|m| m.categories.iter().any(|c| wanted.contains(c)));
        }
        if let Some(floor) = min_confidence {
            memories.retain(|m| m.confidence >= floor);
        }
        memories.truncate(limit);
        Ok(memories)
    }

    /// Record an explicit retrieval. Context injection never calls this.
    pub fn record_access(&self, id: &str) -> Result<()> {
        let now = Utc::now();
        let updated = retry_once(|| {
            self.conn().execute(
                "UPDATE memories SET access_count = access_count + 1, last_accessed = ?1, last_updated = ?1 WHERE id = ?2",
                params![now, id],
            )
        })?;
        if updated == 0 {
            return not_found("memory", id);
        }
        Ok(())
    }

    /// Memories touched after the watermark, for cache delta sync
    pub fn updated_since(&self, watermark: DateTime<Utc>) -> Result<Vec<Memory>> {
        let mut stmt = self.conn().prepare(&format!(
            "SELECT {} FROM memories WHERE last_updated > ?1 ORDER BY last_updated",
            MEMORY_COLUMNS
        ))?;
        let pairs = stmt
            .query_map([watermark], memory_from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        pairs.into_iter().map(finish).collect()
    }

    pub fn confidence_audit_for(&self, memory_id: &str) -> Result<Vec<ConfidenceAudit>> {
        let mut stmt = self.conn().prepare(
            "SELECT memory_id, old, new, reason, at FROM confidence_audit WHERE memory_id = ?1 ORDER BY id",
        )?;
        let rows = stmt
            .query_map([memory_id], |row| {
                Ok(ConfidenceAudit {
                    memory_id: row.get(0)?,
                    old: row.get(1)?,
                    new: row.get(2)?,
                    reason: row.get(3)?,
                    at: row.get(4)?,
                })
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
    }

    pub fn count_memories(&self) -> Result<usize> {
        let count: i64 = self
            .conn()
            .query_row("SELECT COUNT(*) FROM memories", [], |row| row.get(0))?;
        Ok(count as usize)
    }

    /// Category name -> memory count, for stats reporting
    pub fn category_distribution(&self) -> Result<Vec<(String, usize)>> {
        let memories = self.get_recent(usize::MAX / 2, None)?;
        let mut counts: std::collections::BTreeMap<String, usize> = Default::default();
        for memory in &memories {
            for category in &memory.categories {
                *counts.entry(category.clone()).or_default() += 1;
            }
        }
        Ok(counts.into_iter().collect())
    }

    /// Ten-bucket confidence histogram over [0, 1]
    pub fn confidence_histogram(&self) -> Result<[usize; 10]> {
        let mut stmt = self.conn().prepare("SELECT confidence FROM memories")?;
        let values = stmt
            .query_map([], |row| row.get::<_, f64>(0))?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        let mut buckets = [0usize; 10];
        for value in values {
            let idx = ((value * 10.0) as usize).min(9);
            buckets[idx] += 1;
        }
        Ok(buckets)
    }

    /// Purge expired memories. Returns the number removed.
    pub fn expire_memories(&self, now: DateTime<Utc>) -> Result<usize> {
        let mut stmt = self
            .conn()
            .prepare("SELECT id FROM memories WHERE expires_at IS NOT NULL AND expires_at <= ?1")?;
        let ids = stmt
            .query_map([now], |row| row.get::<_, String>(0))?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        drop(stmt);
        self.batch_delete(&ids)
    }
}

fn validate_confidence(value: f64) -> Result<()> {
    if !(CONFIDENCE_MIN..=CONFIDENCE_MAX).contains(&value) {
        return Err(Error::Validation(format!(
            "confidence {} outside [{}, {}]",
            value, CONFIDENCE_MIN, CONFIDENCE_MAX
        )));
    }
    Ok(())
}

fn validate_importance(value: f64) -> Result<()> {
    if !(IMPORTANCE_MIN..=IMPORTANCE_MAX).contains(&value) {
        return Err(Error::Validation(format!(
            "importance {} outside [{}, {}]",
            value, IMPORTANCE_MIN, IMPORTANCE_MAX
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn new_memory(content: &str, categories: &[&str]) -> NewMemory {
        NewMemory::new(content)
            .with_categories(categories.iter().map(|c| c.to_string()).collect())
    }

    #[test]
    fn test_add_and_get() {
        let store = Store::open_in_memory().unwrap();
        let memory = store
            .add_memory(new_memory("the executor needs a cooldown after restart", &["process"]))
            .unwrap();

        let loaded = store.get_memory(&memory.id).unwrap();
        assert_eq!(loaded.content, memory.content);
        assert_eq!(loaded.categories, vec!["process"]);
        assert_eq!(loaded.confidence, 1.0);
        assert_eq!(loaded.access_count, 0);
    }

    #[test]
    fn test_add_defaults_to_general() {
        let store = Store::open_in_memory().unwrap();
        let memory = store.add_memory(NewMemory::new("uncategorized fact")).unwrap();
        assert_eq!(memory.categories, vec!["general"]);
    }

    #[test]
    fn test_confidence_out_of_range_rejected() {
        let store = Store::open_in_memory().unwrap();
        let mut new = NewMemory::new("bad");
        new.confidence = 0.05;
        match store.add_memory(new) {
            Err(Error::Validation(_)) => {}
            other => panic!("expected validation error, got {:?}", other.map(|m| m.id)),
        }
    }

    #[test]
    fn test_search_respects_min_confidence() {
        let store = Store::open_in_memory().unwrap();
        let kept = store
            .add_memory(new_memory("restart procedure for the fleet gateway", &["process"]))
            .unwrap();
        let dropped = store
            .add_memory(new_memory("restart notes, speculative and unverified", &["process"]))
            .unwrap();
        store.update_confidence(&dropped.id, 0.3, "age decay").unwrap();

        let results = store
            .search("restart", None, Some(0.5), 10)
            .unwrap();
        let ids: Vec<&str> = results.iter().map(|m| m.id.as_str()).collect();
        assert!(ids.contains(&kept.id.as_str()));
        assert!(!ids.contains(&dropped.id.as_str()));
    }

    #[test]
    fn test_search_filters_categories() {
        let store = Store::open_in_memory().unwrap();
        store
            .add_memory(new_memory("deploy checklist for augur", &["process"]))
            .unwrap();
        store
            .add_memory(new_memory("deploy colors for the dashboard", &["preference"]))
            .unwrap();

        let results = store
            .search("deploy", Some(&["process".to_string()]), None, 10)
            .unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].categories, vec!["process"]);
    }

    #[test]
    fn test_edit_updates_fts() {
        let store = Store::open_in_memory().unwrap();
        let memory = store
            .add_memory(new_memory("original phrasing", &["general"]))
            .unwrap();
        store
            .edit_memory(&memory.id, EditOp::Replace("entirely new wording".to_string()))
            .unwrap();

        assert!(store.search("phrasing", None, None, 10).unwrap().is_empty());
        assert_eq!(store.search("wording", None, None, 10).unwrap().len(), 1);
    }

    #[test]
    fn test_confidence_update_audited() {
        let store = Store::open_in_memory().unwrap();
        let memory = store.add_memory(new_memory("audited fact", &["general"])).unwrap();
        store.update_confidence(&memory.id, 0.7, "contradiction flagged").unwrap();

        let audit = store.confidence_audit_for(&memory.id).unwrap();
        assert_eq!(audit.len(), 2);
        assert_eq!(audit[0].reason, "created");
        assert_eq!(audit[1].old, 1.0);
        assert_eq!(audit[1].new, 0.7);
        assert_eq!(audit[1].reason, "contradiction flagged");
    }

    #[test]
    fn test_record_access_increments() {
        let store = Store::open_in_memory().unwrap();
        let memory = store.add_memory(new_memory("hot fact", &["general"])).unwrap();
        store.record_access(&memory.id).unwrap();
        store.record_access(&memory.id).unwrap();
        assert_eq!(store.get_memory(&memory.id).unwrap().access_count, 2);
    }

    #[test]
    fn test_updated_since_watermark() {
        let store = Store::open_in_memory().unwrap();
        let watermark = Utc::now() - chrono::Duration::seconds(5);
        store.add_memory(new_memory("after watermark", &["general"])).unwrap();

        let delta = store.updated_since(watermark).unwrap();
        assert_eq!(delta.len(), 1);
        let delta = store.updated_since(Utc::now() + chrono::Duration::seconds(5)).unwrap();
        assert!(delta.is_empty());
    }

    #[test]
    fn test_expire_memories() {
        let store = Store::open_in_memory().unwrap();
        let mut ephemeral = NewMemory::new("short lived");
        ephemeral.expires_at = Some(Utc::now() - chrono::Duration::minutes(1));
        store.add_memory(ephemeral).unwrap();
        store.add_memory(NewMemory::new("durable")).unwrap();

        let removed = store.expire_memories(Utc::now()).unwrap();
        assert_eq!(removed, 1);
        assert_eq!(store.count_memories().unwrap(), 1);
    }

    #[test]
    fn test_batch_delete() {
        let store = Store::open_in_memory().unwrap();
        let a = store.add_memory(NewMemory::new("first")).unwrap();
        let b = store.add_memory(NewMemory::new("second")).unwrap();
        let removed = store.batch_delete(&[a.id.clone(), b.id.clone()]).unwrap();
        assert_eq!(removed, 2);
        assert!(matches!(store.get_memory(&a.id), Err(Error::NotFound(_))));
    }
}
