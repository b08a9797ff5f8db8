use std::collections::VecDeque;

use chrono::{DateTime, Utc};

/// Speaker role for a ring entry
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RingRole {
    User,
    Assistant,
}

#[derive(Debug, Clone)]
pub struct RingEntry {
    pub role: RingRole,
    pub text: String,
    pub at: DateTime<Utc>,
}

/// Bounded FIFO of recent conversation lines with a byte cap. Search is
/// keyword scoring only; nothing here is persisted and nothing here
/// influences confidence.
pub struct ActiveSessionRing {
    entries: VecDeque<RingEntry>,
    max_entries: usize,
    max_bytes: usize,
    bytes: usize,
}

impl ActiveSessionRing {
    pub fn new(max_entries: usize, max_bytes: usize) -> Self {
        Self {
            entries: VecDeque::with_capacity(max_entries),
            max_entries,
            max_bytes,
            bytes: 0,
        }
    }

    pub fn push(&mut self, role: RingRole, text: impl Into<String>) {
        let text = text.into();
        self.bytes += text.len();
        self.entries.push_back(RingEntry {
            role,
            text,
            at: Utc::now(),
        });
        while self.entries.len() > self.max_entries || self.bytes > self.max_bytes {
            match self.entries.pop_front() {
                Some(evicted) => self.bytes -= evicted.text.len(),
                None => break,
            }
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
        self.bytes = 0;
    }

    /// Keyword-overlap scoring over the ring, best matches first. Score is
    /// the number of distinct query terms present in the entry.
    pub fn search(&self, query: &str) -> Vec<(usize, &RingEntry)> {
        let terms: Vec<String> = query
            .split(|c: char| !c.is_alphanumeric())
            .filter(|t| t.len() >= 3)
            .map(str::to_lowercase)
            .collect();
        if terms.is_empty() {
            return Vec::new();
        }

        let mut scored: Vec<(usize, &RingEntry)> = self
            .entries
            .iter()
            .filter_map(|entry| {
                let haystack = entry.text.to_lowercase();
                let score = terms.iter().filter(|t| haystack.contains(t.as_str())).count();
                (score > 0).then_some((score, entry))
            })
            .collect();
        scored.sort_by(|a, b| b.0.cmp(&a.0).then(b.1.at.cmp(&a.1.at)));
        scored
    }

    /// Newest entries first, for episodic context
    pub fn recent(&self, n: usize) -> Vec<&RingEntry> {
        self.entries.iter().rev().take(n).collect()
    }
}
