use chrono::Utc;
use cortex_engine::{DedupeAction, find_duplicate_groups, plan_collapse};
use cortex_store::{EditOp, MemoryUpdate, NewMemory};
use cortex_types::{
    IMPORTANCE_MAX, IMPORTANCE_MIN, MAX_PIN_CONTENT_CHARS, MAX_PINS, MemorySource,
    WorkingMemoryPin, time_delta_label,
};
use serde_json::{Value, json};

use super::{ToolResponse, arg_f64, arg_str, arg_str_list, arg_usize, require_str};
use crate::runtime::Cortex;

pub fn add(cortex: &Cortex, args: &Value) -> ToolResponse {
    let content = match require_str(args, "content") {
        Ok(content) => content,
        Err(resp) => return resp,
    };
    let categories = match arg_str_list(args, "categories") {
        Some(categories) if !categories.is_empty() => categories,
        _ => cortex
            .categories
            .lock()
            .expect("category manager poisoned")
            .detect(content),
    };
    let importance = arg_f64(args, "importance").unwrap_or(IMPORTANCE_MIN);
    if !(IMPORTANCE_MIN..=IMPORTANCE_MAX).contains(&importance) {
        return ToolResponse::with_details(
            format!("Importance {} outside [{}, {}]", importance, IMPORTANCE_MIN, IMPORTANCE_MAX),
            json!({"error": "validation_error"}),
        );
    }

    let new = NewMemory::new(content)
        .with_categories(categories.clone())
        .with_importance(importance)
        .with_source(MemorySource::Agent);
    let result = cortex.store.lock().expect("store mutex poisoned").add_memory(new);
    match result {
        Ok(memory) => {
            cortex.sessions.note_learning(&memory.id);
            cortex.sync_index();
            ToolResponse::with_details(
                format!(
                    "Stored memory {} in [{}]",
                    &memory.id[..8],
                    categories.join(", ")
                ),
                json!({"memory_id": memory.id, "categories": categories, "confidence": memory.confidence}),
            )
        }
        Err(err) => err.into(),
    }
}

pub fn stm(cortex: &Cortex, args: &Value) -> ToolResponse {
    let limit = arg_usize(args, "limit").unwrap_or(10).min(50);
    let categories = arg_str_list(args, "categories");
    let now = Utc::now();

    let memories = {
        let store = cortex.store.lock().expect("store mutex poisoned");
        let memories = match store.get_recent(limit, categories.as_deref()) {
            Ok(memories) => memories,
            Err(err) => return err.into(),
        };
        // Explicit retrieval counts as access; injection never does.
        for memory in &memories {
            let _ = store.record_access(&memory.id);
        }
        memories
    };
    if memories.is_empty() {
        return ToolResponse::with_details("No memories found", json!({"count": 0}));
    }

    let lines: Vec<String> = memories
        .iter()
        .map(|m| {
            format!(
                "[{}] ({}, {:.0}%) {}",
                &m.id[..8],
                time_delta_label(m.created_at, now),
                m.confidence * 100.0,
                m.content
            )
        })
        .collect();
    let ids: Vec<&str> = memories.iter().map(|m| m.id.as_str()).collect();
    ToolResponse::with_details(lines.join("\n"), json!({"count": memories.len(), "ids": ids}))
}

pub fn stats(cortex: &Cortex, _args: &Value) -> ToolResponse {
    let store = cortex.store.lock().expect("store mutex poisoned");
    let memory_count = store.count_memories().unwrap_or(0);
    let message_count = store.count_messages().unwrap_or(0);
    let distribution = store.category_distribution().unwrap_or_default();
    let histogram = store.confidence_histogram().unwrap_or([0; 10]);
    let atom_stats = store.atom_stats().ok();
    drop(store);

    let index = cortex.index.lock().expect("index poisoned");
    let cached = index.len();
    let hot_cap = index.hot_cap();
    drop(index);
    let ring_len = cortex.ring.lock().expect("ring poisoned").len();

    let text = format!(
        "{} memories ({} cached, hot cap {}), {} messages, {} ring entries, {} atoms",
        memory_count,
        cached,
        hot_cap,
        message_count,
        ring_len,
        atom_stats.as_ref().map(|s| s.atom_count).unwrap_or(0),
    );
    ToolResponse::with_details(
        text,
        json!({
            "memories": memory_count,
            "cached": cached,
            "hot_tier_cap": hot_cap,
            "messages": message_count,
            "ring_entries": ring_len,
            "atoms": atom_stats.as_ref().map(|s| s.atom_count).unwrap_or(0),
            "links": atom_stats.as_ref().map(|s| s.link_count).unwrap_or(0),
            "categories": distribution
                .iter()
                .map(|(name, count)| json!({"name": name, "count": count}))
                .collect::<Vec<_>>(),
            "confidence_histogram": histogram.to_vec(),
            "max_context_tokens": cortex.config.max_context_tokens,
        }),
    )
}

pub fn dedupe(cortex: &Cortex, args: &Value) -> ToolResponse {
    let action = match require_str(args, "action") {
        Ok(action) => action,
        Err(resp) => return resp,
    };
    let Some(action) = DedupeAction::parse(action) else {
        return ToolResponse::with_details(
            format!("Unknown dedupe action '{}'", action),
            json!({"error": "validation_error"}),
        );
    };
    if let Some(threshold) = arg_f64(args, "similarity_threshold")
        && !(0.0..=1.0).contains(&threshold)
    {
        return ToolResponse::with_details(
            "similarity_threshold must be in [0, 1]",
            json!({"error": "validation_error"}),
        );
    }
    let categories = arg_str_list(args, "categories");

    let store = cortex.store.lock().expect("store mutex poisoned");
    let memories = match store.get_recent(cortex.config.stm_capacity * 2, categories.as_deref()) {
        Ok(memories) => memories,
        Err(err) => return err.into(),
    };
    let groups = find_duplicate_groups(&memories);
    if groups.is_empty() {
        return ToolResponse::with_details(
            "No near-duplicates found",
            json!({"groups": 0, "deleted": 0, "threshold_reserved": true}),
        );
    }

    let mut deleted = 0;
    if action != DedupeAction::Report {
        for group in &groups {
            let Some(plan) = plan_collapse(group, action) else {
                continue;
            };
            if action == DedupeAction::Merge {
                let update = MemoryUpdate {
                    categories: Some(plan.merged_categories.clone()),
                    ..Default::default()
                };
                if let Err(err) = store.update_memory_fields(&plan.survivor_id, update) {
                    return err.into();
                }
            }
            match store.batch_delete(&plan.delete_ids) {
                Ok(count) => deleted += count,
                Err(err) => return err.into(),
            }
        }
    }
    drop(store);
    if deleted > 0 {
        cortex.sync_index();
    }

    let summary: Vec<Value> = groups
        .iter()
        .map(|g| {
            json!({
                "key": g.key,
                "ids": g.memories.iter().map(|m| m.id.as_str()).collect::<Vec<_>>(),
            })
        })
        .collect();
    ToolResponse::with_details(
        format!("{} duplicate group(s), {} deleted", groups.len(), deleted),
        json!({"groups": summary, "deleted": deleted, "threshold_reserved": true}),
    )
}

pub fn update(cortex: &Cortex, args: &Value) -> ToolResponse {
    let memory_id = match require_str(args, "memory_id") {
        Ok(id) => id,
        Err(resp) => return resp,
    };
    let update = MemoryUpdate {
        importance: arg_f64(args, "importance"),
        categories: arg_str_list(args, "categories"),
        ..Default::default()
    };
    let result = cortex
        .store
        .lock()
        .expect("store mutex poisoned")
        .update_memory_fields(memory_id, update);
    match result {
        Ok(memory) => {
            cortex.sync_index();
            ToolResponse::with_details(
                format!("Updated memory {}", &memory.id[..8]),
                json!({"memory_id": memory.id, "importance": memory.importance, "categories": memory.categories}),
            )
        }
        Err(err) => err.into(),
    }
}

pub fn edit(cortex: &Cortex, args: &Value) -> ToolResponse {
    let memory_id = match require_str(args, "memory_id") {
        Ok(id) => id,
        Err(resp) => return resp,
    };
    let op = match (arg_str(args, "append"), arg_str(args, "replace")) {
        (Some(extra), None) => EditOp::Append(extra.to_string()),
        (None, Some(content)) => EditOp::Replace(content.to_string()),
        _ => {
            return ToolResponse::with_details(
                "Provide exactly one of 'append' or 'replace'",
                json!({"error": "validation_error"}),
            );
        }
    };
    let result = cortex
        .store
        .lock()
        .expect("store mutex poisoned")
        .edit_memory(memory_id, op);
    match result {
        Ok(memory) => {
            cortex.sync_index();
            ToolResponse::with_details(
                format!("Edited memory {}", &memory.id[..8]),
                json!({"memory_id": memory.id}),
            )
        }
        Err(err) => err.into(),
    }
}

pub fn move_categories(cortex: &Cortex, args: &Value) -> ToolResponse {
    let memory_id = match require_str(args, "memory_id") {
        Ok(id) => id,
        Err(resp) => return resp,
    };
    let Some(to_categories) = arg_str_list(args, "to_categories").filter(|c| !c.is_empty()) else {
        return ToolResponse::with_details(
            "Missing required argument 'to_categories'",
            json!({"error": "validation_error", "missing": "to_categories"}),
        );
    };
    let update = MemoryUpdate {
        categories: Some(to_categories.clone()),
        ..Default::default()
    };
    let result = cortex
        .store
        .lock()
        .expect("store mutex poisoned")
        .update_memory_fields(memory_id, update);
    match result {
        Ok(memory) => {
            cortex.sync_index();
            ToolResponse::with_details(
                format!("Moved memory {} to [{}]", &memory.id[..8], to_categories.join(", ")),
                json!({"memory_id": memory.id, "categories": to_categories}),
            )
        }
        Err(err) => err.into(),
    }
}

pub fn create_category(cortex: &Cortex, args: &Value) -> ToolResponse {
    let name = match require_str(args, "name") {
        Ok(name) => name,
        Err(resp) => return resp,
    };
    let description = arg_str(args, "description").unwrap_or_default().to_string();
    let keywords = arg_str_list(args, "keywords").unwrap_or_default();

    let def = {
        let mut manager = cortex.categories.lock().expect("category manager poisoned");
        match manager.add(name, &description, keywords) {
            Ok(def) => def.clone(),
            Err(err) => {
                let code = if err.to_string().contains("already") {
                    "conflict"
                } else {
                    "validation_error"
                };
                return ToolResponse::with_details(err.to_string(), json!({"error": code}));
            }
        }
    };
    if let Err(err) = cortex
        .store
        .lock()
        .expect("store mutex poisoned")
        .insert_category(&def)
    {
        return err.into();
    }
    ToolResponse::with_details(
        format!("Created category '{}'", def.name),
        json!({"name": def.name, "keywords": def.keywords}),
    )
}

pub fn list_categories(cortex: &Cortex, _args: &Value) -> ToolResponse {
    let manager = cortex.categories.lock().expect("category manager poisoned");
    let lines: Vec<String> = manager
        .list()
        .iter()
        .map(|def| format!("{}: {} [{}]", def.name, def.description, def.keywords.join(", ")))
        .collect();
    let names: Vec<&str> = manager.list().iter().map(|d| d.name.as_str()).collect();
    ToolResponse::with_details(lines.join("\n"), json!({"categories": names}))
}

pub fn working_memory(cortex: &Cortex, args: &Value) -> ToolResponse {
    let action = match require_str(args, "action") {
        Ok(action) => action,
        Err(resp) => return resp,
    };
    let store = cortex.store.lock().expect("store mutex poisoned");
    let mut pins = match store.get_working_memory() {
        Ok(pins) => pins,
        Err(err) => return err.into(),
    };

    match action {
        "view" => {
            if pins.is_empty() {
                return ToolResponse::with_details("No pins", json!({"count": 0}));
            }
            let now = Utc::now();
            let lines: Vec<String> = pins
                .iter()
                .enumerate()
                .map(|(i, pin)| match &pin.label {
                    Some(label) => format!(
                        "{}. [{}] {} ({})",
                        i, label, pin.content, time_delta_label(pin.pinned_at, now)
                    ),
                    None => format!(
                        "{}. {} ({})",
                        i, pin.content, time_delta_label(pin.pinned_at, now)
                    ),
                })
                .collect();
            ToolResponse::with_details(lines.join("\n"), json!({"count": pins.len()}))
        }
        "pin" => {
            let content = match require_str(args, "content") {
                Ok(content) => content,
                Err(resp) => return resp,
            };
            if content.chars().count() > MAX_PIN_CONTENT_CHARS {
                return ToolResponse::with_details(
                    format!("Pin content exceeds {} chars", MAX_PIN_CONTENT_CHARS),
                    json!({"error": "validation_error"}),
                );
            }
            if pins.len() >= MAX_PINS {
                return ToolResponse::with_details(
                    format!("Pin set is full ({} max); unpin something first", MAX_PINS),
                    json!({"error": "validation_error"}),
                );
            }
            let label = arg_str(args, "label").map(str::to_string);
            let pin = WorkingMemoryPin::new(content, label);
            // Identical content+label pin is a no-op, keeping pin/unpin
            // order-invariant.
            if !pins.iter().any(|p| p.content == pin.content && p.label == pin.label) {
                pins.push(pin);
            }
            match store.save_working_memory(&pins) {
                Ok(()) => ToolResponse::with_details(
                    format!("Pinned ({}/{})", pins.len(), MAX_PINS),
                    json!({"count": pins.len()}),
                ),
                Err(err) => err.into(),
            }
        }
        "unpin" => {
            let before = pins.len();
            if let Some(index) = arg_usize(args, "index") {
                if index >= pins.len() {
                    return ToolResponse::with_details(
                        format!("No pin at index {}", index),
                        json!({"error": "not_found"}),
                    );
                }
                pins.remove(index);
            } else if let Some(label) = arg_str(args, "label") {
                pins.retain(|p| p.label.as_deref() != Some(label));
            } else if let Some(content) = arg_str(args, "content") {
                pins.retain(|p| p.content != content);
            } else {
                return ToolResponse::with_details(
                    "Provide 'index', 'label', or 'content' to unpin",
                    json!({"error": "validation_error"}),
                );
            }
            if pins.len() == before {
                return ToolResponse::with_details("No matching pin", json!({"error": "not_found"}));
            }
            match store.save_working_memory(&pins) {
                Ok(()) => ToolResponse::with_details(
                    format!("Unpinned ({} remaining)", pins.len()),
                    json!({"count": pins.len()}),
                ),
                Err(err) => err.into(),
            }
        }
        "clear" => match store.save_working_memory(&[]) {
            Ok(()) => ToolResponse::with_details("Cleared all pins", json!({"count": 0})),
            Err(err) => err.into(),
        },
        other => ToolResponse::with_details(
            format!("Unknown working_memory action '{}'", other),
            json!({"error": "validation_error"}),
        ),
    }
}

pub fn session_continue(cortex: &Cortex, args: &Value) -> ToolResponse {
    let session_id = match require_str(args, "session_id") {
        Ok(id) => id,
        Err(resp) => return resp,
    };
    match cortex.sessions.continue_from(session_id) {
        Ok(restored) => {
            if let Some(preamble) = &restored.preamble {
                *cortex.preamble.lock().expect("preamble poisoned") = Some(preamble.clone());
            }
            ToolResponse::with_details(
                format!(
                    "Continuing from session {} ({} pins inherited)",
                    &session_id[..session_id.len().min(8)],
                    restored.inherited_pins
                ),
                json!({"session_id": session_id, "inherited_pins": restored.inherited_pins}),
            )
        }
        Err(err) => err.into(),
    }
}
