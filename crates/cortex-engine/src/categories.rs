use cortex_types::{CategoryDef, DEFAULT_CATEGORY};
use regex::Regex;

use crate::{Error, Result};

/// Category registry with keyword-based detection.
///
/// Detection compiles one alternation per category; `detect` returns the
/// matching categories ordered by hit count. Names are normalized to
/// lowercase snake_case, and keyword sets stay pairwise disjoint.
pub struct CategoryManager {
    defs: Vec<CategoryDef>,
    matchers: Vec<Regex>,
}

impl CategoryManager {
    pub fn new(defs: Vec<CategoryDef>) -> Result<Self> {
        let mut manager = Self {
            defs: Vec::new(),
            matchers: Vec::new(),
        };
        for def in defs {
            manager.push(def)?;
        }
        Ok(manager)
    }

    /// The built-in category set used when no persisted definitions exist.
    pub fn with_defaults() -> Self {
        let defaults = vec![
            CategoryDef::new(
                "process",
                "Operational procedures and restart/deploy sequences",
                ["restart", "deploy", "procedure", "rollout", "drain", "migration"]
                    .map(String::from)
                    .to_vec(),
            ),
            CategoryDef::new(
                "technical",
                "Implementation facts, APIs, configuration details",
                ["config", "api", "endpoint", "schema", "flag", "version"]
                    .map(String::from)
                    .to_vec(),
            ),
            CategoryDef::new(
                "security",
                "Access control, exposure, and hardening",
                ["firewall", "permission", "exposed", "vulnerability", "cve", "sudo"]
                    .map(String::from)
                    .to_vec(),
            ),
            CategoryDef::new(
                "gotchas",
                "Traps, surprising behaviors, and known failure modes",
                ["gotcha", "beware", "silently", "corrupts", "footgun", "flaky"]
                    .map(String::from)
                    .to_vec(),
            ),
            CategoryDef::new(
                "credentials",
                "Secrets handling and rotation",
                ["token", "secret", "password", "credential", "keyfile", "rotate"]
                    .map(String::from)
                    .to_vec(),
            ),
            CategoryDef::new(
                "preference",
                "User and operator preferences",
                ["prefer", "always use", "never use", "style"]
                    .map(String::from)
                    .to_vec(),
            ),
            CategoryDef::new("general", "Uncategorized knowledge", Vec::new()),
        ];
        // Defaults are static and disjoint; construction cannot fail.
        Self::new(defaults).expect("default categories are valid")
    }

    /// Register a category. Rejects duplicate names and keywords already
    /// claimed by another category.
    pub fn add(
        &mut self,
        name: &str,
        description: &str,
        keywords: Vec<String>,
    ) -> Result<&CategoryDef> {
        let name = normalize_name(name);
        if name.is_empty() {
            return Err(Error::Validation("category name is empty".to_string()));
        }
        if self.defs.iter().any(|d| d.name == name) {
            return Err(Error::Validation(format!("category '{}' already exists", name)));
        }
        let keywords: Vec<String> = keywords
            .into_iter()
            .map(|k| k.trim().to_lowercase())
            .filter(|k| !k.is_empty())
            .collect();
        for keyword in &keywords {
            if let Some(owner) = self
                .defs
                .iter()
                .find(|d| d.keywords.iter().any(|k| k == keyword))
            {
                return Err(Error::Validation(format!(
                    "keyword '{}' already belongs to category '{}'",
                    keyword, owner.name
                )));
            }
        }

        self.push(CategoryDef::new(name, description, keywords))?;
        Ok(self.defs.last().expect("just pushed"))
    }

    fn push(&mut self, def: CategoryDef) -> Result<()> {
        self.matchers.push(compile_matcher(&def.keywords)?);
        self.defs.push(def);
        Ok(())
    }

    /// Categories whose keywords appear in `content`, ordered by hit count.
    /// Falls back to `general` when nothing matches.
    pub fn detect(&self, content: &str) -> Vec<String> {
        let haystack = content.to_lowercase();
        let mut hits: Vec<(usize, &str)> = self
            .defs
            .iter()
            .zip(&self.matchers)
            .filter_map(|(def, matcher)| {
                let count = matcher.find_iter(&haystack).count();
                (count > 0).then_some((count, def.name.as_str()))
            })
            .collect();
        if hits.is_empty() {
            return vec![DEFAULT_CATEGORY.to_string()];
        }
        hits.sort_by(|a, b| b.0.cmp(&a.0).then(a.1.cmp(b.1)));
        hits.into_iter().map(|(_, name)| name.to_string()).collect()
    }

    pub fn list(&self) -> &[CategoryDef] {
        &self.defs
    }

    pub fn contains(&self, name: &str) -> bool {
        self.defs.iter().any(|d| d.name == name)
    }
}

fn normalize_name(name: &str) -> String {
    name.trim()
        .to_lowercase()
        .chars()
        .map(|c| if c.is_alphanumeric() { c } else { '_' })
        .collect::<String>()
        .split('_')
        .filter(|s| !s.is_empty())
        .collect::<Vec<_>>()
        .join("_")
}

fn compile_matcher(keywords: &[String]) -> Result<Regex> {
    if keywords.is_empty() {
        // A matcher that never fires, for keywordless categories
        return Ok(Regex::new(r"\z.\A")?);
    }
    let alternation = keywords
        .iter()
        .map(|k| regex::escape(k))
        .collect::<Vec<_>>()
        .join("|");
    Ok(Regex::new(&format!(r"\b(?:{})\b", alternation))?)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_detect_orders_by_hits() {
        let manager = CategoryManager::with_defaults();
        let categories =
            manager.detect("rotate the token and the credential keyfile before the restart");
        assert_eq!(categories[0], "credentials");
        assert!(categories.contains(&"process".to_string()));
    }

    #[test]
    fn test_detect_falls_back_to_general() {
        let manager = CategoryManager::with_defaults();
        assert_eq!(manager.detect("nothing relevant here"), vec!["general"]);
    }

    #[test]
    fn test_add_normalizes_and_rejects_duplicates() {
        let mut manager = CategoryManager::with_defaults();
        let def = manager
            .add("Fleet Ops", "Fleet operations", vec!["fleet".to_string()])
            .unwrap();
        assert_eq!(def.name, "fleet_ops");

        assert!(matches!(
            manager.add("fleet_ops", "again", vec![]),
            Err(Error::Validation(_))
        ));
    }

    #[test]
    fn test_add_rejects_claimed_keyword() {
        let mut manager = CategoryManager::with_defaults();
        let result = manager.add("tokens", "Token handling", vec!["token".to_string()]);
        match result {
            Err(Error::Validation(msg)) => assert!(msg.contains("credentials")),
            _ => panic!("expected keyword conflict"),
        }
    }

    #[test]
    fn test_new_category_detected() {
        let mut manager = CategoryManager::with_defaults();
        manager
            .add("fleet_ops", "Fleet operations", vec!["fleet".to_string()])
            .unwrap();
        assert_eq!(manager.detect("the fleet is drifting"), vec!["fleet_ops"]);
    }
}
