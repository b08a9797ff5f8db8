use std::collections::HashMap;
use std::path::{Path, PathBuf};

use regex::Regex;

use crate::Result;

/// Match priority for an SOP pattern
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum SopPriority {
    Low,
    Medium,
    High,
}

impl SopPriority {
    pub fn as_str(&self) -> &'static str {
        match self {
            SopPriority::Low => "low",
            SopPriority::Medium => "medium",
            SopPriority::High => "high",
        }
    }
}

/// One entry in the detection table: a regex over the lowercased parameter
/// serialization mapped to an SOP document.
pub struct SopPattern {
    pub pattern: Regex,
    pub label: String,
    pub file: PathBuf,
    pub priority: SopPriority,
}

/// A matched SOP with its extracted sections
#[derive(Debug, Clone)]
pub struct SopMatch {
    pub label: String,
    pub path: PathBuf,
    pub content: String,
    pub priority: SopPriority,
    pub matched_pattern: String,
    pub sections: HashMap<String, String>,
}

/// Section names extracted from SOP bodies
pub const SOP_SECTIONS: [&str; 3] = ["preflight", "gotchas", "credentials"];

/// Scans tool parameters for project/host/service patterns and returns the
/// matching SOP bodies. Missing or unreadable SOP files are non-fatal.
pub struct SopEnhancer {
    catalog_dir: PathBuf,
    patterns: Vec<SopPattern>,
}

impl SopEnhancer {
    pub fn new(catalog_dir: PathBuf, patterns: Vec<SopPattern>) -> Self {
        Self {
            catalog_dir,
            patterns,
        }
    }

    /// Built-in pattern table over a catalog directory. Patterns match the
    /// lowercase serialization of tool params.
    pub fn with_defaults(catalog_dir: PathBuf) -> Result<Self> {
        let table: [(&str, &str, SopPriority); 5] = [
            (r"augur|trading|executor", "fleet.ai.sop", SopPriority::High),
            (r"systemctl|journalctl|\.service\b", "systemd.sop", SopPriority::High),
            (r"ssh\s+\S+|scp\s+\S+", "remote-hosts.sop", SopPriority::Medium),
            (r"docker|container|compose", "containers.sop", SopPriority::Medium),
            (r"\bdeploy\b|release|rollout", "deploys.sop", SopPriority::Medium),
        ];
        let mut patterns = Vec::with_capacity(table.len());
        for (pattern, label, priority) in table {
            patterns.push(SopPattern {
                pattern: Regex::new(pattern)?,
                label: label.to_string(),
                file: catalog_dir.join(label),
                priority,
            });
        }
        Ok(Self::new(catalog_dir, patterns))
    }

    pub fn catalog_dir(&self) -> &Path {
        &self.catalog_dir
    }

    /// All patterns matching the given parameter serialization, highest
    /// priority first. Unreadable SOP files are skipped with a warning left
    /// to the caller (the match list simply omits them).
    pub fn find_matches(&self, params_str: &str) -> Vec<SopMatch> {
        let haystack = params_str.to_lowercase();
        let mut matches: Vec<SopMatch> = self
            .patterns
            .iter()
            .filter(|p| p.pattern.is_match(&haystack))
            .filter_map(|p| {
                let content = std::fs::read_to_string(&p.file).ok()?;
                let sections = parse_sections(&content);
                Some(SopMatch {
                    label: p.label.clone(),
                    path: p.file.clone(),
                    content,
                    priority: p.priority,
                    matched_pattern: p.pattern.as_str().to_string(),
                    sections,
                })
            })
            .collect();
        matches.sort_by(|a, b| b.priority.cmp(&a.priority).then(a.label.cmp(&b.label)));
        matches
    }
}

/// Parse top-level `key:` lines with indented bodies into named sections.
/// Only the conventional section names are kept.
pub fn parse_sections(content: &str) -> HashMap<String, String> {
    let mut sections = HashMap::new();
    let mut current: Option<(String, Vec<String>)> = None;

    for line in content.lines() {
        let indented = line.starts_with(' ') || line.starts_with('\t');
        let is_top_level_key =
            !indented && line.trim_end().ends_with(':') && !line.trim().is_empty();

        if is_top_level_key {
            if let Some((name, body)) = current.take() {
                sections.insert(name, body.join("\n"));
            }
            let name = line.trim_end().trim_end_matches(':').trim().to_lowercase();
            if SOP_SECTIONS.contains(&name.as_str()) {
                current = Some((name, Vec::new()));
            }
        } else if indented {
            if let Some((_, body)) = current.as_mut() {
                body.push(line.trim().to_string());
            }
        } else if !line.trim().is_empty() {
            // Unindented non-key line ends any open section
            if let Some((name, body)) = current.take() {
                sections.insert(name, body.join("\n"));
            }
        }
    }
    if let Some((name, body)) = current.take() {
        sections.insert(name, body.join("\n"));
    }
    sections
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE_SOP: &str = "\
fleet executor operations

preflight:
    check the queue depth
    confirm no open positions
gotchas:
    restarting mid-epoch loses the batch
credentials:
    use the service keyfile, never personal tokens
notes:
    this section is not extracted
";

    #[test]
    fn test_parse_sections() {
        let sections = parse_sections(SAMPLE_SOP);
        assert_eq!(sections.len(), 3);
        assert!(sections["preflight"].contains("queue depth"));
        assert!(sections["gotchas"].contains("mid-epoch"));
        assert!(sections["credentials"].contains("service keyfile"));
        assert!(!sections.contains_key("notes"));
    }

    #[test]
    fn test_find_matches_orders_by_priority() {
        let dir = tempfile::TempDir::new().unwrap();
        std::fs::write(dir.path().join("fleet.ai.sop"), SAMPLE_SOP).unwrap();
        std::fs::write(dir.path().join("deploys.sop"), "preflight:\n    tag first\n").unwrap();

        let enhancer = SopEnhancer::with_defaults(dir.path().to_path_buf()).unwrap();
        let matches = enhancer.find_matches("deploy the augur executor");
        assert_eq!(matches.len(), 2);
        assert_eq!(matches[0].label, "fleet.ai.sop");
        assert_eq!(matches[0].priority, SopPriority::High);
        assert_eq!(matches[1].label, "deploys.sop");
    }

    #[test]
    fn test_missing_sop_file_is_nonfatal() {
        let dir = tempfile::TempDir::new().unwrap();
        let enhancer = SopEnhancer::with_defaults(dir.path().to_path_buf()).unwrap();
        // Pattern matches but no file exists on disk
        assert!(enhancer.find_matches("systemctl restart something").is_empty());
    }

    #[test]
    fn test_no_match_returns_empty() {
        let dir = tempfile::TempDir::new().unwrap();
        let enhancer = SopEnhancer::with_defaults(dir.path().to_path_buf()).unwrap();
        assert!(enhancer.find_matches("cat notes.txt").is_empty());
    }
}
