use serde::{Deserialize, Serialize};

/// A category definition loaded from persistent config.
///
/// Names are lowercase snake_case; keyword sets are pairwise disjoint
/// across categories (enforced by the category manager on add).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CategoryDef {
    pub name: String,
    pub description: String,
    pub keywords: Vec<String>,
}

impl CategoryDef {
    pub fn new(
        name: impl Into<String>,
        description: impl Into<String>,
        keywords: Vec<String>,
    ) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            keywords,
        }
    }
}

/// Fallback category when detection finds no match
pub const DEFAULT_CATEGORY: &str = "general";
