use once_cell::sync::Lazy;
use regex::Regex;

// Auto-capture heuristics. Conservative on purpose: a missed capture
// costs nothing, a junk memory pollutes every future injection.

const MIN_CAPTURE_CHARS: usize = 25;
const MAX_CAPTURE_CHARS: usize = 500;
const MAX_CAPTURES_PER_TURN: usize = 3;

static EXPLICIT_MARKER: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)^\s*(remember|note|important|learned|til)\s*[:!-]\s*(.+)$")
        .expect("marker pattern compiles")
});

static RESOLUTION: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)\b(fixed by|resolved by|the fix was|turned out|root cause was|works after)\b")
        .expect("resolution pattern compiles")
});

static DURABLE_FACT: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)\b(always|never|must|requires|instead of|is located at|listens on|runs under)\b")
        .expect("fact pattern compiles")
});

/// Extract capture-worthy lines from assistant output. Explicit markers
/// win; resolutions and durable facts are taken as found, bounded per
/// turn.
pub fn extract_salient(text: &str) -> Vec<String> {
    let mut captures = Vec::new();
    for line in text.lines() {
        if captures.len() >= MAX_CAPTURES_PER_TURN {
            break;
        }
        let trimmed = line.trim();
        if let Some(caught) = EXPLICIT_MARKER.captures(trimmed) {
            let body = caught[2].trim().to_string();
            if body.chars().count() >= MIN_CAPTURE_CHARS {
                captures.push(clip(&body));
                continue;
            }
        }
        let length = trimmed.chars().count();
        if (MIN_CAPTURE_CHARS..=MAX_CAPTURE_CHARS).contains(&length)
            && (RESOLUTION.is_match(trimmed) || DURABLE_FACT.is_match(trimmed))
        {
            captures.push(clip(trimmed));
        }
    }
    captures
}

fn clip(text: &str) -> String {
    text.chars().take(MAX_CAPTURE_CHARS).collect()
}
