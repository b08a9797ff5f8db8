use chrono::{DateTime, Duration, Utc};
use cortex_store::NewAtom;
use cortex_types::{Atom, AtomField, CausalLink, LinkType, content_key};
use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::{Value, json};

use super::{ToolResponse, arg_f64, arg_str, arg_usize, require_str};
use crate::runtime::Cortex;

const DEFAULT_ATOM_CONFIDENCE: f64 = 0.8;
const MAX_TRAVERSAL_DEPTH: usize = 10;

pub fn create(cortex: &Cortex, args: &Value) -> ToolResponse {
    let mut facets = [""; 4];
    for (i, key) in ["subject", "action", "outcome", "consequences"].iter().enumerate() {
        match require_str(args, key) {
            Ok(value) => facets[i] = value,
            Err(resp) => return resp,
        }
    }
    let new = NewAtom {
        subject: facets[0].to_string(),
        action: facets[1].to_string(),
        outcome: facets[2].to_string(),
        consequences: facets[3].to_string(),
        confidence: arg_f64(args, "confidence").unwrap_or(DEFAULT_ATOM_CONFIDENCE),
        source: arg_str(args, "source").unwrap_or("agent").to_string(),
    };
    let result = cortex.store.lock().expect("store mutex poisoned").create_atom(new);
    match result {
        Ok(atom) => ToolResponse::with_details(
            format!("Created atom {}: {} -> {}", &atom.id[..8], atom.subject, atom.outcome),
            json!({"atom_id": atom.id, "confidence": atom.confidence}),
        ),
        Err(err) => err.into(),
    }
}

pub fn search(cortex: &Cortex, args: &Value) -> ToolResponse {
    let field = match require_str(args, "field") {
        Ok(field) => field,
        Err(resp) => return resp,
    };
    let Some(field) = AtomField::parse(field) else {
        return ToolResponse::with_details(
            format!("Unknown atom field '{}'", field),
            json!({"error": "validation_error"}),
        );
    };
    let query = match require_str(args, "query") {
        Ok(query) => query,
        Err(resp) => return resp,
    };
    let limit = arg_usize(args, "limit").unwrap_or(10).min(50);

    let result = cortex
        .store
        .lock()
        .expect("store mutex poisoned")
        .search_atoms_by_field(field, query, limit);
    match result {
        Ok(atoms) if atoms.is_empty() => {
            ToolResponse::with_details("No atoms matched", json!({"count": 0}))
        }
        Ok(atoms) => {
            let lines: Vec<String> = atoms.iter().map(render_atom).collect();
            let ids: Vec<&str> = atoms.iter().map(|a| a.id.as_str()).collect();
            ToolResponse::with_details(lines.join("\n"), json!({"count": atoms.len(), "ids": ids}))
        }
        Err(err) => err.into(),
    }
}

pub fn find_causes(cortex: &Cortex, args: &Value) -> ToolResponse {
    let max_depth = arg_usize(args, "max_depth").unwrap_or(3).min(MAX_TRAVERSAL_DEPTH);
    let store = cortex.store.lock().expect("store mutex poisoned");

    let atom_id = match arg_str(args, "atom_id") {
        Some(id) => id.to_string(),
        None => {
            let Some(outcome) = arg_str(args, "outcome") else {
                return ToolResponse::with_details(
                    "Provide 'atom_id' or 'outcome'",
                    json!({"error": "validation_error"}),
                );
            };
            match store.search_atoms_by_field(AtomField::Outcome, outcome, 1) {
                Ok(atoms) if !atoms.is_empty() => atoms[0].id.clone(),
                Ok(_) => {
                    return ToolResponse::with_details(
                        format!("No atom with outcome matching '{}'", outcome),
                        json!({"error": "not_found"}),
                    );
                }
                Err(err) => return err.into(),
            }
        }
    };

    match store.find_causes(&atom_id, max_depth) {
        Ok(causes) if causes.is_empty() => {
            ToolResponse::with_details("No recorded causes", json!({"count": 0}))
        }
        Ok(causes) => {
            let lines: Vec<String> = causes
                .iter()
                .map(|(depth, atom)| format!("depth {}: {}", depth, render_atom(atom)))
                .collect();
            ToolResponse::with_details(
                lines.join("\n"),
                json!({
                    "count": causes.len(),
                    "ids": causes.iter().map(|(_, a)| a.id.as_str()).collect::<Vec<_>>(),
                }),
            )
        }
        Err(err) => err.into(),
    }
}

pub fn link(cortex: &Cortex, args: &Value) -> ToolResponse {
    let from = match require_str(args, "from") {
        Ok(from) => from,
        Err(resp) => return resp,
    };
    let to = match require_str(args, "to") {
        Ok(to) => to,
        Err(resp) => return resp,
    };
    let link_type = match arg_str(args, "type") {
        Some(raw) => match LinkType::parse(raw) {
            Some(link_type) => link_type,
            None => {
                return ToolResponse::with_details(
                    format!("Unknown link type '{}'", raw),
                    json!({"error": "validation_error"}),
                );
            }
        },
        None => LinkType::Causes,
    };
    let link = CausalLink {
        from_atom_id: from.to_string(),
        to_atom_id: to.to_string(),
        link_type,
        strength: arg_f64(args, "strength").unwrap_or(0.5),
    };
    match cortex.store.lock().expect("store mutex poisoned").create_link(&link) {
        Ok(()) => ToolResponse::with_details(
            format!("Linked {} -{}-> {}", &from[..from.len().min(8)], link_type.as_str(), &to[..to.len().min(8)]),
            json!({"type": link_type.as_str(), "strength": link.strength}),
        ),
        Err(err) => err.into(),
    }
}

pub fn stats(cortex: &Cortex, _args: &Value) -> ToolResponse {
    match cortex.store.lock().expect("store mutex poisoned").atom_stats() {
        Ok(stats) => ToolResponse::with_details(
            format!(
                "{} atoms, {} links, {} validated",
                stats.atom_count, stats.link_count, stats.validated_count
            ),
            json!({
                "atoms": stats.atom_count,
                "links": stats.link_count,
                "validated": stats.validated_count,
            }),
        ),
        Err(err) => err.into(),
    }
}

static CAUSAL_STATEMENT: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)(.{10,120}?)\s+(causes|caused|leads to|led to|results in|resulted in)\s+(.{10,160})")
        .expect("causal statement pattern compiles")
});

/// Extract template-matched causal statements from free text
fn extract_causal_statements(text: &str) -> Vec<(String, String, String)> {
    text.split(['\n', '.'])
        .filter_map(|sentence| {
            let caught = CAUSAL_STATEMENT.captures(sentence.trim())?;
            Some((
                caught[1].trim().to_string(),
                caught[2].to_lowercase(),
                caught[3].trim().to_string(),
            ))
        })
        .collect()
}

pub fn atomize(cortex: &Cortex, args: &Value) -> ToolResponse {
    let source = arg_str(args, "source").unwrap_or("atomize").to_string();

    let texts: Vec<String> = if let Some(text) = arg_str(args, "text") {
        vec![text.to_string()]
    } else if args.get("batch_stm").is_some() {
        let limit = arg_usize(args, "batch_stm").unwrap_or(50).min(200);
        let store = cortex.store.lock().expect("store mutex poisoned");
        match store.get_recent(limit, None) {
            Ok(memories) => memories.into_iter().map(|m| m.content).collect(),
            Err(err) => return err.into(),
        }
    } else if args.get("batch_embeddings").is_some() {
        return ToolResponse::with_details(
            "Embedding-driven extraction is unavailable in this build",
            json!({"error": "unavailable"}),
        );
    } else {
        return ToolResponse::with_details(
            "Provide 'text', 'batch_stm', or 'batch_embeddings'",
            json!({"error": "validation_error"}),
        );
    };

    let store = cortex.store.lock().expect("store mutex poisoned");
    let mut created = Vec::new();
    for text in &texts {
        for (subject, verb, outcome) in extract_causal_statements(text) {
            let new = NewAtom {
                subject,
                action: verb,
                outcome: outcome.clone(),
                consequences: outcome,
                confidence: 0.6,
                source: source.clone(),
            };
            if let Ok(atom) = store.create_atom(new) {
                created.push(atom.id);
            }
        }
    }
    ToolResponse::with_details(
        format!("Extracted {} atom(s) from {} text(s)", created.len(), texts.len()),
        json!({"created": created}),
    )
}

pub fn abstract_deeper(cortex: &Cortex, args: &Value) -> ToolResponse {
    let query = match require_str(args, "query") {
        Ok(query) => query,
        Err(resp) => return resp,
    };
    let max_depth = arg_usize(args, "max_depth").unwrap_or(3).min(MAX_TRAVERSAL_DEPTH);

    let class = cortex_engine::classify_query(query);
    if class != cortex_engine::QueryClass::Causal {
        return ToolResponse::with_details(
            format!("Query classified as {}; no causal traversal", class.as_str()),
            json!({"class": class.as_str()}),
        );
    }

    let store = cortex.store.lock().expect("store mutex poisoned");
    let seeds = match store.search_atoms_by_field(AtomField::Outcome, query, 1) {
        Ok(seeds) => seeds,
        Err(err) => return err.into(),
    };
    let Some(seed) = seeds.first() else {
        return ToolResponse::with_details(
            "No atoms relate to this outcome yet",
            json!({"class": "causal", "count": 0}),
        );
    };
    let chain = match store.find_causes(&seed.id, max_depth) {
        Ok(chain) => chain,
        Err(err) => return err.into(),
    };
    match cortex_engine::synthesize_insight(&chain, 1_000) {
        Some(insight) => ToolResponse::with_details(
            insight,
            json!({"class": "causal", "count": chain.len(), "seed": seed.id}),
        ),
        None => ToolResponse::with_details(
            format!("{} has no recorded causes", render_atom(seed)),
            json!({"class": "causal", "count": 0, "seed": seed.id}),
        ),
    }
}

pub fn classify(_cortex: &Cortex, args: &Value) -> ToolResponse {
    let query = match require_str(args, "query") {
        Ok(query) => query,
        Err(resp) => return resp,
    };
    let class = cortex_engine::classify_query(query);
    ToolResponse::with_details(
        format!("Query class: {}", class.as_str()),
        json!({"class": class.as_str()}),
    )
}

/// Parse a loose time reference into a [start, end) window
fn parse_time_reference(reference: &str, now: DateTime<Utc>) -> Option<(DateTime<Utc>, DateTime<Utc>)> {
    static HOURS_AGO: Lazy<Regex> =
        Lazy::new(|| Regex::new(r"(?i)^(\d+)\s*h(?:ours?)?\s*ago$").expect("hours pattern compiles"));
    static DAYS_AGO: Lazy<Regex> =
        Lazy::new(|| Regex::new(r"(?i)^(\d+)\s*d(?:ays?)?\s*ago$").expect("days pattern compiles"));

    let reference = reference.trim().to_lowercase();
    match reference.as_str() {
        "today" => Some((now - Duration::hours(24), now)),
        "yesterday" => Some((now - Duration::hours(48), now - Duration::hours(24))),
        "last week" | "this week" => Some((now - Duration::days(7), now)),
        "last month" => Some((now - Duration::days(30), now)),
        "last hour" => Some((now - Duration::hours(1), now)),
        _ => {
            if let Some(caught) = HOURS_AGO.captures(&reference) {
                let hours: i64 = caught[1].parse().ok()?;
                return Some((now - Duration::hours(hours + 1), now - Duration::hours(hours - 1).max(Duration::zero())));
            }
            if let Some(caught) = DAYS_AGO.captures(&reference) {
                let days: i64 = caught[1].parse().ok()?;
                return Some((now - Duration::days(days + 1), now - Duration::days(days - 1).max(Duration::zero())));
            }
            if let Ok(date) = DateTime::parse_from_rfc3339(&reference) {
                let start = date.with_timezone(&Utc);
                return Some((start, start + Duration::hours(24)));
            }
            None
        }
    }
}

pub fn temporal_search(cortex: &Cortex, args: &Value) -> ToolResponse {
    let query = match require_str(args, "query") {
        Ok(query) => query,
        Err(resp) => return resp,
    };
    let reference = match require_str(args, "time_reference") {
        Ok(reference) => reference,
        Err(resp) => return resp,
    };
    let limit = arg_usize(args, "limit").unwrap_or(10).min(50);
    let now = Utc::now();
    let Some((start, end)) = parse_time_reference(reference, now) else {
        return ToolResponse::with_details(
            format!("Unrecognized time reference '{}'", reference),
            json!({"error": "validation_error"}),
        );
    };

    let store = cortex.store.lock().expect("store mutex poisoned");
    let mut memories = match store.search(query, None, None, limit * 5) {
        Ok(memories) => memories,
        Err(err) => return err.into(),
    };
    memories.retain(|m| m.created_at >= start && m.created_at < end);
    memories.truncate(limit);
    for memory in &memories {
        let _ = store.record_access(&memory.id);
    }

    if memories.is_empty() {
        return ToolResponse::with_details(
            format!("Nothing matched '{}' in that window", query),
            json!({"count": 0, "window": [start.to_rfc3339(), end.to_rfc3339()]}),
        );
    }
    let lines: Vec<String> = memories
        .iter()
        .map(|m| format!("[{}] ({}) {}", &m.id[..8], cortex_types::time_delta_label(m.created_at, now), m.content))
        .collect();
    ToolResponse::with_details(
        lines.join("\n"),
        json!({
            "count": memories.len(),
            "window": [start.to_rfc3339(), end.to_rfc3339()],
            "ids": memories.iter().map(|m| m.id.as_str()).collect::<Vec<_>>(),
        }),
    )
}

pub fn what_happened_before(cortex: &Cortex, args: &Value) -> ToolResponse {
    let event = match require_str(args, "event") {
        Ok(event) => event,
        Err(resp) => return resp,
    };
    let hours_before = arg_f64(args, "hours_before").unwrap_or(2.0).clamp(0.1, 72.0);

    let store = cortex.store.lock().expect("store mutex poisoned");
    let anchors = match store.search(event, None, None, 1) {
        Ok(anchors) => anchors,
        Err(err) => return err.into(),
    };
    let Some(anchor) = anchors.first() else {
        return ToolResponse::with_details(
            format!("No memory matches '{}'", event),
            json!({"error": "not_found"}),
        );
    };

    let window_start = anchor.created_at - Duration::minutes((hours_before * 60.0) as i64);
    let recent = match store.get_recent(500, None) {
        Ok(recent) => recent,
        Err(err) => return err.into(),
    };
    let preceding: Vec<_> = recent
        .into_iter()
        .filter(|m| m.id != anchor.id && m.created_at >= window_start && m.created_at < anchor.created_at)
        .collect();

    if preceding.is_empty() {
        return ToolResponse::with_details(
            format!("Nothing recorded in the {}h before '{}'", hours_before, event),
            json!({"count": 0, "anchor": anchor.id}),
        );
    }
    let lines: Vec<String> = preceding
        .iter()
        .map(|m| format!("[{}] {}", &m.id[..8], m.content))
        .collect();
    ToolResponse::with_details(
        lines.join("\n"),
        json!({"count": preceding.len(), "anchor": anchor.id}),
    )
}

pub fn temporal_patterns(cortex: &Cortex, args: &Value) -> ToolResponse {
    let outcome = match require_str(args, "outcome") {
        Ok(outcome) => outcome,
        Err(resp) => return resp,
    };
    let min_observations = arg_usize(args, "min_observations").unwrap_or(2).max(1);

    let store = cortex.store.lock().expect("store mutex poisoned");
    let occurrences = match store.search(outcome, None, None, 20) {
        Ok(occurrences) => occurrences,
        Err(err) => return err.into(),
    };
    if occurrences.is_empty() {
        return ToolResponse::with_details(
            format!("No occurrences of '{}'", outcome),
            json!({"count": 0}),
        );
    }
    let recent = match store.get_recent(500, None) {
        Ok(recent) => recent,
        Err(err) => return err.into(),
    };

    // Count contents that recur in the window before each occurrence
    let mut counts: std::collections::HashMap<String, (usize, String)> = Default::default();
    for occurrence in &occurrences {
        let window_start = occurrence.created_at - Duration::hours(2);
        for memory in &recent {
            if memory.id != occurrence.id
                && memory.created_at >= window_start
                && memory.created_at < occurrence.created_at
            {
                let entry = counts
                    .entry(content_key(&memory.content))
                    .or_insert((0, memory.content.clone()));
                entry.0 += 1;
            }
        }
    }
    let mut patterns: Vec<(usize, String)> = counts
        .into_values()
        .filter(|(count, _)| *count >= min_observations)
        .collect();
    patterns.sort_by(|a, b| b.0.cmp(&a.0));

    if patterns.is_empty() {
        return ToolResponse::with_details(
            format!(
                "No precursors recur at least {} time(s) before '{}'",
                min_observations, outcome
            ),
            json!({"occurrences": occurrences.len(), "patterns": 0}),
        );
    }
    let lines: Vec<String> = patterns
        .iter()
        .take(10)
        .map(|(count, content)| format!("seen {}x before: {}", count, content))
        .collect();
    ToolResponse::with_details(
        lines.join("\n"),
        json!({"occurrences": occurrences.len(), "patterns": patterns.len()}),
    )
}

fn render_atom(atom: &Atom) -> String {
    format!(
        "[{}] {} {} -> {} ({:.0}%)",
        &atom.id[..8],
        atom.subject,
        atom.action,
        atom.outcome,
        atom.confidence * 100.0
    )
}
