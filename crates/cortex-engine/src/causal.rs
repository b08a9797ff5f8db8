use cortex_types::{Atom, truncate_chars};
use once_cell::sync::Lazy;
use regex::Regex;

/// Query classification for the deep-abstraction tier
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueryClass {
    Causal,
    Temporal,
    Factual,
}

impl QueryClass {
    pub fn as_str(&self) -> &'static str {
        match self {
            QueryClass::Causal => "causal",
            QueryClass::Temporal => "temporal",
            QueryClass::Factual => "factual",
        }
    }
}

static CAUSAL_CUES: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)\b(why|cause[ds]?|because|led to|leads to|result(?:ed|s)? in|due to|root cause)\b")
        .expect("causal cue pattern compiles")
});

static TEMPORAL_CUES: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)\b(before|after|when|while|since|until|yesterday|last (?:week|night|month)|ago)\b")
        .expect("temporal cue pattern compiles")
});

/// Classify a query by cue words. Causal cues win over temporal ones
/// because "why did X fail after the deploy" wants the causal path.
pub fn classify_query(query: &str) -> QueryClass {
    if CAUSAL_CUES.is_match(query) {
        QueryClass::Causal
    } else if TEMPORAL_CUES.is_match(query) {
        QueryClass::Temporal
    } else {
        QueryClass::Factual
    }
}

/// Sanitize memory/atom text before it flows into synthesized prompt
/// content: alphanumerics plus light punctuation, capped length.
pub fn sanitize_fragment(text: &str, max_chars: usize) -> String {
    let cleaned: String = text
        .chars()
        .filter(|c| c.is_alphanumeric() || " .,:;-()'/".contains(*c))
        .collect();
    truncate_chars(cleaned.trim(), max_chars)
}

/// Template-based synthesis over a causal chain: render the atoms nearest
/// the queried outcome as a "novel indicators" block.
pub fn synthesize_insight(chain: &[(usize, Atom)], max_chars: usize) -> Option<String> {
    if chain.is_empty() {
        return None;
    }
    let mut lines = vec!["Novel indicators from the causal graph:".to_string()];
    for (depth, atom) in chain.iter().take(4) {
        lines.push(format!(
            "- depth {}: {} {} -> {} ({})",
            depth,
            sanitize_fragment(&atom.subject, 60),
            sanitize_fragment(&atom.action, 60),
            sanitize_fragment(&atom.outcome, 80),
            sanitize_fragment(&atom.consequences, 80),
        ));
    }
    Some(truncate_chars(&lines.join("\n"), max_chars))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn atom(subject: &str, outcome: &str) -> Atom {
        Atom {
            id: "a".to_string(),
            subject: subject.to_string(),
            action: "observed".to_string(),
            outcome: outcome.to_string(),
            consequences: "follow-on load".to_string(),
            confidence: 0.8,
            validation_count: 0,
            source: "agent".to_string(),
            created_at: Utc::now(),
        }
    }

    #[test]
    fn test_classify_query() {
        assert_eq!(classify_query("why did the pipeline stall"), QueryClass::Causal);
        assert_eq!(classify_query("what happened before the crash"), QueryClass::Temporal);
        assert_eq!(classify_query("list the gateway endpoints"), QueryClass::Factual);
        // Causal cues win over temporal ones
        assert_eq!(
            classify_query("why did it fail after the deploy"),
            QueryClass::Causal
        );
    }

    #[test]
    fn test_sanitize_fragment() {
        let dirty = "drop `rm -rf` {now}\x1b[31m!!";
        let clean = sanitize_fragment(dirty, 100);
        assert!(!clean.contains('`'));
        assert!(!clean.contains('{'));
        assert!(!clean.contains('\x1b'));
        assert!(clean.contains("rm -rf"));
    }

    #[test]
    fn test_synthesize_insight() {
        let chain = vec![(1, atom("disk pressure", "writes stall")), (2, atom("writes stall", "queue grows"))];
        let insight = synthesize_insight(&chain, 500).unwrap();
        assert!(insight.contains("depth 1"));
        assert!(insight.contains("disk pressure"));
        assert!(synthesize_insight(&[], 500).is_none());
    }
}
