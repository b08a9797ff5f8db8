use std::collections::HashMap;

use cortex_types::{Memory, truncate_chars};

use crate::extract::{ActionContext, RiskLevel};
use crate::scoring::{CONFIDENCE_CRITICAL, CONFIDENCE_ROUTINE};
use crate::sop::{SopMatch, SopPriority};

/// Per-category enforcement level
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnforcementLevel {
    Strict,
    Category,
    Advisory,
    Disabled,
}

impl EnforcementLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            EnforcementLevel::Strict => "strict",
            EnforcementLevel::Category => "category",
            EnforcementLevel::Advisory => "advisory",
            EnforcementLevel::Disabled => "disabled",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "strict" => Some(EnforcementLevel::Strict),
            "category" => Some(EnforcementLevel::Category),
            "advisory" => Some(EnforcementLevel::Advisory),
            "disabled" => Some(EnforcementLevel::Disabled),
            _ => None,
        }
    }
}

/// Static enforcement policy consulted per decision
#[derive(Debug, Clone)]
pub struct EnforcementConfig {
    pub level: EnforcementLevel,
    pub category_rules: HashMap<String, EnforcementLevel>,
    /// Categories enforced when `level` is Category
    pub enforced_categories: Vec<String>,
    pub min_sop_priority: SopPriority,
    pub confidence_critical: f64,
    pub confidence_routine: f64,
    pub max_knowledge_length: usize,
    pub emergency_bypass: bool,
}

impl Default for EnforcementConfig {
    fn default() -> Self {
        Self {
            level: EnforcementLevel::Strict,
            category_rules: HashMap::new(),
            enforced_categories: vec![
                "process".to_string(),
                "security".to_string(),
                "credentials".to_string(),
            ],
            min_sop_priority: SopPriority::Medium,
            confidence_critical: CONFIDENCE_CRITICAL,
            confidence_routine: CONFIDENCE_ROUTINE,
            max_knowledge_length: 2_000,
            emergency_bypass: false,
        }
    }
}

/// Knowledge gathered by the gate's parallel lookups
#[derive(Debug, Clone, Default)]
pub struct KnowledgeBundle {
    pub sops: Vec<SopMatch>,
    pub memories: Vec<Memory>,
}

impl KnowledgeBundle {
    pub fn is_empty(&self) -> bool {
        self.sops.is_empty() && self.memories.is_empty()
    }
}

/// Outcome of the enforcement decision
#[derive(Debug, Clone, PartialEq)]
pub enum Verdict {
    Pass,
    /// Pass, but record an advisory audit
    Advisory,
    Block { reason: String },
    /// Emergency bypass was active; pass loudly
    Bypassed,
}

/// Pure decision function mapping (context, knowledge, config) to a verdict.
pub fn decide(
    context: &ActionContext,
    primary_category: &str,
    knowledge: &KnowledgeBundle,
    config: &EnforcementConfig,
) -> Verdict {
    if config.emergency_bypass {
        return Verdict::Bypassed;
    }
    if knowledge.is_empty() {
        return Verdict::Pass;
    }

    let level = config
        .category_rules
        .get(primary_category)
        .copied()
        .unwrap_or(config.level);

    match level {
        EnforcementLevel::Disabled => Verdict::Pass,
        EnforcementLevel::Advisory => Verdict::Advisory,
        EnforcementLevel::Strict => strict_verdict(context, knowledge, config),
        EnforcementLevel::Category => {
            if config
                .enforced_categories
                .iter()
                .any(|c| c == primary_category)
            {
                strict_verdict(context, knowledge, config)
            } else {
                Verdict::Advisory
            }
        }
    }
}

fn strict_verdict(
    context: &ActionContext,
    knowledge: &KnowledgeBundle,
    config: &EnforcementConfig,
) -> Verdict {
    let sop_hit = knowledge
        .sops
        .iter()
        .any(|s| s.priority >= config.min_sop_priority);
    let threshold = match context.risk_level {
        RiskLevel::High => config.confidence_routine,
        _ => config.confidence_critical,
    };
    let memory_hit = knowledge.memories.iter().any(|m| m.confidence >= threshold);

    if sop_hit || memory_hit {
        Verdict::Block {
            reason: compose_block_reason(knowledge, config.max_knowledge_length),
        }
    } else {
        Verdict::Advisory
    }
}

/// Compose the block message: matched SOPs first, then memories with
/// confidence percentages, then a single call-to-action line. The whole
/// message is truncated to the configured budget.
pub fn compose_block_reason(knowledge: &KnowledgeBundle, max_length: usize) -> String {
    let mut parts: Vec<String> = Vec::new();
    parts.push("Relevant operational knowledge exists for this action:".to_string());

    for sop in &knowledge.sops {
        let per_sop_budget = max_length / (knowledge.sops.len().max(1) * 2);
        parts.push(format!(
            "[SOP {} | {}] (pattern: {})\n{}",
            sop.label,
            sop.priority.as_str(),
            sop.matched_pattern,
            truncate_chars(sop.content.trim(), per_sop_budget.max(120)),
        ));
    }
    for memory in &knowledge.memories {
        parts.push(format!(
            "[memory {:.0}%] {}",
            memory.confidence * 100.0,
            truncate_chars(&memory.content, 200),
        ));
    }
    parts.push(
        "Review the knowledge above, acknowledge it, and retry the call if still appropriate."
            .to_string(),
    );

    truncate_chars(&parts.join("\n\n"), max_length)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::extract::{CommandType, extract_context};
    use chrono::Utc;
    use cortex_types::MemorySource;
    use serde_json::json;
    use std::collections::HashMap as Map;

    fn context() -> ActionContext {
        extract_context(
            "exec",
            &json!({"command": "systemctl restart augur-executor"}),
        )
    }

    fn memory(confidence: f64) -> Memory {
        let now = Utc::now();
        Memory {
            id: format!("m-{}", (confidence * 100.0) as u32),
            content: "executor restarts need a drain first".to_string(),
            categories: vec!["process".to_string()],
            importance: 1.0,
            confidence,
            access_count: 0,
            created_at: now,
            last_accessed: now,
            expires_at: None,
            source: MemorySource::Agent,
            source_message_id: None,
        }
    }

    fn sop(priority: SopPriority) -> SopMatch {
        SopMatch {
            label: "fleet.ai.sop".to_string(),
            path: "/sops/fleet.ai.sop".into(),
            content: "preflight:\n  drain connections first".to_string(),
            priority,
            matched_pattern: "augur|trading|executor".to_string(),
            sections: Map::new(),
        }
    }

    #[test]
    fn test_empty_knowledge_passes() {
        let verdict = decide(
            &context(),
            "process",
            &KnowledgeBundle::default(),
            &EnforcementConfig::default(),
        );
        assert_eq!(verdict, Verdict::Pass);
    }

    #[test]
    fn test_strict_blocks_on_high_priority_sop() {
        let knowledge = KnowledgeBundle {
            sops: vec![sop(SopPriority::High)],
            memories: vec![],
        };
        match decide(&context(), "process", &knowledge, &EnforcementConfig::default()) {
            Verdict::Block { reason } => {
                assert!(reason.contains("fleet.ai.sop"));
                assert!(reason.contains("retry"));
            }
            other => panic!("expected block, got {:?}", other),
        }
    }

    #[test]
    fn test_strict_blocks_on_confident_memory() {
        let knowledge = KnowledgeBundle {
            sops: vec![],
            memories: vec![memory(0.92), memory(0.71)],
        };
        // High-risk action uses the routine threshold
        let ctx = context();
        assert_eq!(ctx.risk_level, RiskLevel::High);
        match decide(&ctx, "process", &knowledge, &EnforcementConfig::default()) {
            Verdict::Block { reason } => {
                assert!(reason.contains("92%"));
                assert!(reason.contains("71%"));
            }
            other => panic!("expected block, got {:?}", other),
        }
    }

    #[test]
    fn test_low_confidence_memory_is_advisory() {
        let mut ctx = context();
        ctx.risk_level = RiskLevel::Low;
        ctx.command_type = CommandType::Unknown;
        let knowledge = KnowledgeBundle {
            sops: vec![],
            memories: vec![memory(0.6)],
        };
        assert_eq!(
            decide(&ctx, "process", &knowledge, &EnforcementConfig::default()),
            Verdict::Advisory
        );
    }

    #[test]
    fn test_disabled_category_rule_wins() {
        let mut config = EnforcementConfig::default();
        config
            .category_rules
            .insert("process".to_string(), EnforcementLevel::Disabled);
        let knowledge = KnowledgeBundle {
            sops: vec![sop(SopPriority::High)],
            memories: vec![],
        };
        assert_eq!(decide(&context(), "process", &knowledge, &config), Verdict::Pass);
    }

    #[test]
    fn test_category_level_only_enforces_listed() {
        let mut config = EnforcementConfig::default();
        config.level = EnforcementLevel::Category;
        let knowledge = KnowledgeBundle {
            sops: vec![sop(SopPriority::High)],
            memories: vec![],
        };
        assert!(matches!(
            decide(&context(), "process", &knowledge, &config),
            Verdict::Block { .. }
        ));
        assert_eq!(
            decide(&context(), "preference", &knowledge, &config),
            Verdict::Advisory
        );
    }

    #[test]
    fn test_emergency_bypass() {
        let mut config = EnforcementConfig::default();
        config.emergency_bypass = true;
        let knowledge = KnowledgeBundle {
            sops: vec![sop(SopPriority::High)],
            memories: vec![],
        };
        assert_eq!(
            decide(&context(), "process", &knowledge, &config),
            Verdict::Bypassed
        );
    }

    #[test]
    fn test_block_reason_respects_budget() {
        let knowledge = KnowledgeBundle {
            sops: vec![sop(SopPriority::High)],
            memories: vec![memory(0.92)],
        };
        let reason = compose_block_reason(&knowledge, 300);
        assert!(reason.chars().count() <= 300);
    }
}
