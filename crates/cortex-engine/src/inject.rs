use chrono::{DateTime, Utc};
use cortex_types::{Memory, WorkingMemoryPin, content_key, estimate_tokens, time_delta_label, truncate_chars};

// NOTE: Injection Design Rationale
//
// Two rules keep this composer honest:
// - One shared dedup key set across every tier. A memory surfaced by the
//   hot tier never reappears via STM or the diversity pass.
// - Injection never records accesses. The hot tier is fed only by explicit
//   retrieval, so context composition cannot inflate its own inputs.

/// Budget and tier limits for context composition
#[derive(Debug, Clone)]
pub struct InjectorConfig {
    pub base_budget: usize,
    pub technical_bonus: usize,
    pub length_bonus: usize,
    pub max_budget: usize,
    pub session_lines: usize,
    pub session_line_chars: usize,
    pub hot_items: usize,
    pub stm_items: usize,
    pub truncate_old_memories_to: usize,
    pub min_match_score: f64,
    pub relevance_threshold: f64,
    pub semantic_min_budget: usize,
    pub deep_min_budget: usize,
    pub diversity_min_budget: usize,
    pub diversity_items: usize,
}

impl Default for InjectorConfig {
    fn default() -> Self {
        Self {
            base_budget: 1_500,
            technical_bonus: 500,
            length_bonus: 300,
            max_budget: 2_500,
            session_lines: 5,
            session_line_chars: 150,
            hot_items: 3,
            stm_items: 3,
            truncate_old_memories_to: 300,
            min_match_score: 0.3,
            relevance_threshold: 0.5,
            semantic_min_budget: 100,
            deep_min_budget: 200,
            diversity_min_budget: 50,
            diversity_items: 2,
        }
    }
}

/// Hot-tier candidate with its smoothed access count
#[derive(Debug, Clone)]
pub struct HotCandidate {
    pub memory: Memory,
    pub smoothed_access: f64,
}

/// STM candidate with its composite match score
#[derive(Debug, Clone)]
pub struct StmCandidate {
    pub memory: Memory,
    pub score: f64,
}

/// Semantic candidate with its relevance score
#[derive(Debug, Clone)]
pub struct SemanticCandidate {
    pub memory: Memory,
    pub relevance: f64,
}

/// Everything the composer consumes for one agent turn. Candidates are
/// gathered by the runtime; composition itself is pure.
pub struct InjectionInputs<'a> {
    pub prompt: &'a str,
    /// One-shot session continuity preamble; budget-exempt
    pub preamble: Option<String>,
    /// Working-memory pins; always included, budget-exempt
    pub pins: Vec<WorkingMemoryPin>,
    /// Active-session ring matches, best first (score, line)
    pub session_matches: Vec<(usize, String)>,
    pub hot: Vec<HotCandidate>,
    pub stm: Vec<StmCandidate>,
    pub semantic: Vec<SemanticCandidate>,
    /// Freshest memory per active category, for the diversity pass
    pub diversity: Vec<Memory>,
    pub active_categories: Vec<String>,
    pub now: DateTime<Utc>,
}

/// A composed context ready to prepend to the agent prompt
#[derive(Debug, Clone)]
pub struct ComposedContext {
    pub text: String,
    pub budget: usize,
    pub charged_tokens: usize,
    pub sections: Vec<&'static str>,
    pub injected_memory_ids: Vec<String>,
}

/// Dynamic budget from prompt shape: technical markers and longer prompts
/// earn more context, capped hard.
pub fn compute_budget(prompt: &str, config: &InjectorConfig) -> usize {
    let mut budget = config.base_budget;
    let lower = prompt.to_lowercase();
    const TECHNICAL_MARKERS: [&str; 10] = [
        "error", "build", "compile", "deploy", "config", "stack", "function", "test", "code", "```",
    ];
    if TECHNICAL_MARKERS.iter().any(|m| lower.contains(m)) {
        budget += config.technical_bonus;
    }
    let sentences = prompt.split(['.', '!', '?']).filter(|s| !s.trim().is_empty()).count();
    if sentences >= 3 || prompt.contains('?') {
        budget += config.length_bonus;
    }
    budget.min(config.max_budget)
}

/// Compose the tiered context. Returns None when nothing qualified.
pub fn compose(
    inputs: InjectionInputs,
    config: &InjectorConfig,
    deep_provider: Option<&dyn Fn() -> Option<String>>,
) -> Option<ComposedContext> {
    let budget = compute_budget(inputs.prompt, config);
    let mut remaining = budget;
    let mut charged = 0usize;
    let mut seen_keys: std::collections::HashSet<String> = Default::default();
    let mut injected_ids: Vec<String> = Vec::new();
    let mut sections: Vec<&'static str> = Vec::new();
    let mut blocks: Vec<String> = Vec::new();

    let mut charge = |text: &str, remaining: &mut usize, charged: &mut usize| -> bool {
        let cost = estimate_tokens(text);
        if cost > *remaining {
            return false;
        }
        *remaining -= cost;
        *charged += cost;
        true
    };

    // L0: continuity preamble, uncharged, one-shot
    if let Some(preamble) = &inputs.preamble
        && !preamble.is_empty()
    {
        sections.push("session-continuity");
        blocks.push(format!("<session-continuity>\n{}\n</session-continuity>", preamble.trim()));
    }

    // L1: working-memory pins, always included, uncharged
    if !inputs.pins.is_empty() {
        let lines: Vec<String> = inputs
            .pins
            .iter()
            .map(|pin| match &pin.label {
                Some(label) => format!("- [{}] {}", label, pin.content),
                None => format!("- {}", pin.content),
            })
            .collect();
        sections.push("working-memory");
        blocks.push(format!("<working-memory>\n{}\n</working-memory>", lines.join("\n")));
    }

    // L2: active session matches
    let mut session_lines = Vec::new();
    for (_, line) in inputs.session_matches.iter().take(config.session_lines) {
        let rendered = truncate_chars(line, config.session_line_chars);
        if seen_keys.insert(content_key(&rendered)) && charge(&rendered, &mut remaining, &mut charged)
        {
            session_lines.push(format!("- {}", rendered));
        }
    }
    if !session_lines.is_empty() {
        sections.push("episodic-memory");
        blocks.push(format!(
            "<episodic-memory>\n{}\n</episodic-memory>",
            session_lines.join("\n")
        ));
    }

    let prompt_terms: Vec<String> = inputs
        .prompt
        .to_lowercase()
        .split(|c: char| !c.is_alphanumeric())
        .filter(|t| t.len() >= 3)
        .map(str::to_string)
        .collect();

    // L3: hot tier, query-overlap gated
    let mut hot_lines = Vec::new();
    for candidate in &inputs.hot {
        if hot_lines.len() >= config.hot_items {
            break;
        }
        let content_lower = candidate.memory.content.to_lowercase();
        if !prompt_terms.iter().any(|t| content_lower.contains(t.as_str())) {
            continue;
        }
        if !seen_keys.insert(content_key(&candidate.memory.content)) {
            continue;
        }
        let line = format!(
            "- ({}, {:.1} accesses) {}",
            time_delta_label(candidate.memory.created_at, inputs.now),
            candidate.smoothed_access,
            truncate_chars(&candidate.memory.content, config.truncate_old_memories_to),
        );
        if charge(&line, &mut remaining, &mut charged) {
            injected_ids.push(candidate.memory.id.clone());
            hot_lines.push(line);
        } else {
            break;
        }
    }
    if !hot_lines.is_empty() {
        sections.push("hot-memory");
        blocks.push(format!("<hot-memory>\n{}\n</hot-memory>", hot_lines.join("\n")));
    }

    // L3.5: STM composite matches
    let mut stm_lines = Vec::new();
    for candidate in &inputs.stm {
        if stm_lines.len() >= config.stm_items {
            break;
        }
        if candidate.score < config.min_match_score {
            continue;
        }
        if !seen_keys.insert(content_key(&candidate.memory.content)) {
            continue;
        }
        let line = format!(
            "- ({}) {}",
            time_delta_label(candidate.memory.created_at, inputs.now),
            truncate_chars(&candidate.memory.content, config.truncate_old_memories_to),
        );
        if charge(&line, &mut remaining, &mut charged) {
            injected_ids.push(candidate.memory.id.clone());
            stm_lines.push(line);
        } else {
            break;
        }
    }
    if !stm_lines.is_empty() {
        sections.push("relevant-memory");
        blocks.push(format!(
            "<relevant-memory>\n{}\n</relevant-memory>",
            stm_lines.join("\n")
        ));
    }

    // L4: semantic tier, only with real budget headroom
    if remaining >= config.semantic_min_budget {
        let mut semantic_lines = Vec::new();
        for candidate in &inputs.semantic {
            if candidate.relevance < config.relevance_threshold {
                continue;
            }
            if !seen_keys.insert(content_key(&candidate.memory.content)) {
                continue;
            }
            let truncated = truncate_chars(&candidate.memory.content, config.truncate_old_memories_to);
            let line = format!("- ({:.2}) {}", candidate.relevance, truncated);
            if charge(&line, &mut remaining, &mut charged) {
                injected_ids.push(candidate.memory.id.clone());
                semantic_lines.push(line);
            } else {
                break;
            }
        }
        if !semantic_lines.is_empty() {
            sections.push("semantic-memory");
            blocks.push(format!(
                "<semantic-memory>\n{}\n</semantic-memory>",
                semantic_lines.join("\n")
            ));
        }
    }

    // L5: deep causal abstraction, only with generous headroom
    if remaining >= config.deep_min_budget
        && let Some(provider) = deep_provider
        && let Some(insight) = provider()
        && !insight.is_empty()
        && charge(&insight, &mut remaining, &mut charged)
    {
        sections.push("causal-insight");
        blocks.push(format!("<causal-insight>\n{}\n</causal-insight>", insight.trim()));
    }

    // Category diversity pass: one freshest untouched memory per absent
    // category, up to the configured count.
    if remaining >= config.diversity_min_budget {
        let injected_categories: std::collections::HashSet<&str> = injected_ids
            .iter()
            .filter_map(|id| {
                inputs
                    .hot
                    .iter()
                    .map(|c| &c.memory)
                    .chain(inputs.stm.iter().map(|c| &c.memory))
                    .chain(inputs.semantic.iter().map(|c| &c.memory))
                    .find(|m| &m.id == id)
            })
            .flat_map(|m| m.categories.iter().map(String::as_str))
            .collect();

        let mut diversity_lines = Vec::new();
        for memory in &inputs.diversity {
            if diversity_lines.len() >= config.diversity_items {
                break;
            }
            let covers_missing = memory.categories.iter().any(|c| {
                inputs.active_categories.contains(c) && !injected_categories.contains(c.as_str())
            });
            if !covers_missing {
                continue;
            }
            if !seen_keys.insert(content_key(&memory.content)) {
                continue;
            }
            let line = format!(
                "- [{}] {}",
                memory.primary_category(),
                truncate_chars(&memory.content, config.truncate_old_memories_to),
            );
            if charge(&line, &mut remaining, &mut charged) {
                injected_ids.push(memory.id.clone());
                diversity_lines.push(line);
            } else {
                break;
            }
        }
        if !diversity_lines.is_empty() {
            sections.push("category-context");
            blocks.push(format!(
                "<category-context>\n{}\n</category-context>",
                diversity_lines.join("\n")
            ));
        }
    }

    if blocks.is_empty() {
        return None;
    }

    Some(ComposedContext {
        text: blocks.join("\n\n"),
        budget,
        charged_tokens: charged,
        sections,
        injected_memory_ids: injected_ids,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use cortex_types::MemorySource;

    fn memory(id: &str, content: &str, categories: &[&str]) -> Memory {
        let now = Utc::now();
        Memory {
            id: id.to_string(),
            content: content.to_string(),
            categories: categories.iter().map(|c| c.to_string()).collect(),
            importance: 1.0,
            confidence: 1.0,
            access_count: 0,
            created_at: now - chrono::Duration::hours(2),
            last_accessed: now,
            expires_at: None,
            source: MemorySource::Agent,
            source_message_id: None,
        }
    }

    fn base_inputs(prompt: &str) -> InjectionInputs<'_> {
        InjectionInputs {
            prompt,
            preamble: None,
            pins: Vec::new(),
            session_matches: Vec::new(),
            hot: Vec::new(),
            stm: Vec::new(),
            semantic: Vec::new(),
            diversity: Vec::new(),
            active_categories: Vec::new(),
            now: Utc::now(),
        }
    }

    #[test]
    fn test_budget_computation() {
        let config = InjectorConfig::default();
        assert_eq!(compute_budget("short note", &config), 1_500);
        assert_eq!(compute_budget("why does the build fail", &config), 2_000);
        assert_eq!(
            compute_budget("the build fails. it worked before. what changed?", &config),
            2_300
        );

        let mut capped = InjectorConfig::default();
        capped.max_budget = 2_000;
        assert_eq!(
            compute_budget("the build fails. it worked before. what changed?", &capped),
            2_000
        );
    }

    #[test]
    fn test_pins_always_included_uncharged() {
        let mut inputs = base_inputs("anything at all");
        inputs.pins = vec![
            WorkingMemoryPin::new("a".repeat(40), Some("first".to_string())),
            WorkingMemoryPin::new("b".repeat(60), None),
        ];
        let composed = compose(inputs, &InjectorConfig::default(), None).unwrap();
        assert!(composed.text.contains("<working-memory>"));
        assert!(composed.text.contains("[first]"));
        assert_eq!(composed.charged_tokens, 0);
    }

    #[test]
    fn test_hot_tier_requires_term_overlap() {
        let mut inputs = base_inputs("tell me about the gateway");
        inputs.hot = vec![
            HotCandidate {
                memory: memory("m1", "the gateway drains before restart", &["process"]),
                smoothed_access: 4.0,
            },
            HotCandidate {
                memory: memory("m2", "tax paperwork is due in april", &["general"]),
                smoothed_access: 9.0,
            },
        ];
        let composed = compose(inputs, &InjectorConfig::default(), None).unwrap();
        assert!(composed.injected_memory_ids.contains(&"m1".to_string()));
        assert!(!composed.injected_memory_ids.contains(&"m2".to_string()));
        assert!(composed.text.contains("<hot-memory>"));
    }

    #[test]
    fn test_cross_tier_dedup() {
        let duplicate = memory("m1", "the gateway drains before restart", &["process"]);
        let mut inputs = base_inputs("gateway restart question?");
        inputs.hot = vec![HotCandidate {
            memory: duplicate.clone(),
            smoothed_access: 2.0,
        }];
        inputs.stm = vec![StmCandidate {
            memory: Memory {
                id: "m1-copy".to_string(),
                ..duplicate
            },
            score: 0.9,
        }];
        let composed = compose(inputs, &InjectorConfig::default(), None).unwrap();
        assert_eq!(composed.injected_memory_ids, vec!["m1".to_string()]);
        assert!(!composed.text.contains("<relevant-memory>"));
    }

    #[test]
    fn test_charged_tokens_within_budget() {
        let mut inputs = base_inputs("gateway gateway gateway");
        for i in 0..30 {
            inputs.hot.push(HotCandidate {
                memory: memory(
                    &format!("m{}", i),
                    &format!("gateway fact number {} with plenty of padding text {}", i, "x".repeat(200)),
                    &["process"],
                ),
                smoothed_access: 1.0,
            });
        }
        let config = InjectorConfig::default();
        let composed = compose(inputs, &config, None).unwrap();
        assert!(composed.charged_tokens <= composed.budget);
    }

    #[test]
    fn test_semantic_tier_respects_threshold_and_budget() {
        let mut inputs = base_inputs("gateway?");
        inputs.semantic = vec![
            SemanticCandidate {
                memory: memory("rel", "relevant gateway background", &["technical"]),
                relevance: 0.8,
            },
            SemanticCandidate {
                memory: memory("irr", "barely related trivia", &["general"]),
                relevance: 0.2,
            },
        ];
        let composed = compose(inputs, &InjectorConfig::default(), None).unwrap();
        assert!(composed.injected_memory_ids.contains(&"rel".to_string()));
        assert!(!composed.injected_memory_ids.contains(&"irr".to_string()));
        assert!(composed.text.contains("<semantic-memory>"));
    }

    #[test]
    fn test_deep_provider_invoked_only_with_headroom() {
        let mut config = InjectorConfig::default();
        let inputs = base_inputs("why did the pipeline stall?");
        let called = std::cell::Cell::new(false);
        let deep = || {
            called.set(true);
            Some("stalls follow disk pressure within the hour".to_string())
        };
        let composed = compose(inputs, &config, Some(&deep)).unwrap();
        assert!(called.get());
        assert!(composed.text.contains("<causal-insight>"));

        // Starve the budget so the deep tier cannot run
        config.base_budget = 100;
        config.max_budget = 150;
        called.set(false);
        let mut inputs = base_inputs("why did the pipeline stall?");
        inputs.pins = vec![WorkingMemoryPin::new("pin", None)];
        let _ = compose(inputs, &config, Some(&deep));
        assert!(!called.get());
    }

    #[test]
    fn test_diversity_pass_fills_missing_category() {
        let mut inputs = base_inputs("gateway restart?");
        inputs.active_categories = vec!["process".to_string(), "credentials".to_string()];
        inputs.hot = vec![HotCandidate {
            memory: memory("m1", "gateway restart drains first", &["process"]),
            smoothed_access: 2.0,
        }];
        inputs.diversity = vec![memory("m2", "gateway token rotates monthly", &["credentials"])];
        let composed = compose(inputs, &InjectorConfig::default(), None).unwrap();
        assert!(composed.injected_memory_ids.contains(&"m2".to_string()));
        assert!(composed.text.contains("<category-context>"));
    }

    #[test]
    fn test_empty_composition_returns_none() {
        let inputs = base_inputs("hello");
        assert!(compose(inputs, &InjectorConfig::default(), None).is_none());
    }
}
