mod atoms;
mod heal;
mod memory;
mod messaging;

use serde::Serialize;
use serde_json::{Value, json};

use crate::runtime::Cortex;

/// Two-part tool result: a plain-language message plus machine-readable
/// details. Tools never silently drop an invocation; errors come back as
/// a message with a structured code.
#[derive(Debug, Clone, Serialize)]
pub struct ContentBlock {
    #[serde(rename = "type")]
    pub kind: String,
    pub text: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct ToolResponse {
    pub content: Vec<ContentBlock>,
    pub details: Value,
}

impl ToolResponse {
    pub fn text(message: impl Into<String>) -> Self {
        Self::with_details(message, json!({}))
    }

    pub fn with_details(message: impl Into<String>, details: Value) -> Self {
        Self {
            content: vec![ContentBlock {
                kind: "text".to_string(),
                text: message.into(),
            }],
            details,
        }
    }

    pub fn from_error(err: &crate::Error) -> Self {
        Self::with_details(err.to_string(), json!({"error": err.code()}))
    }

    pub fn message(&self) -> &str {
        self.content
            .first()
            .map(|block| block.text.as_str())
            .unwrap_or_default()
    }
}

impl From<crate::Error> for ToolResponse {
    fn from(err: crate::Error) -> Self {
        Self::from_error(&err)
    }
}

impl From<cortex_store::Error> for ToolResponse {
    fn from(err: cortex_store::Error) -> Self {
        Self::from_error(&crate::Error::Store(err))
    }
}

/// Dispatch a registered tool by name.
pub fn handle_tool(cortex: &Cortex, name: &str, args: &Value) -> ToolResponse {
    match name {
        "cortex_add" => memory::add(cortex, args),
        "cortex_stm" => memory::stm(cortex, args),
        "cortex_stats" => memory::stats(cortex, args),
        "cortex_dedupe" => memory::dedupe(cortex, args),
        "cortex_update" => memory::update(cortex, args),
        "cortex_edit" => memory::edit(cortex, args),
        "cortex_move" => memory::move_categories(cortex, args),
        "cortex_create_category" => memory::create_category(cortex, args),
        "cortex_list_categories" => memory::list_categories(cortex, args),
        "working_memory" => memory::working_memory(cortex, args),
        "cortex_session_continue" => memory::session_continue(cortex, args),
        "atom_create" => atoms::create(cortex, args),
        "atom_search" => atoms::search(cortex, args),
        "atom_find_causes" => atoms::find_causes(cortex, args),
        "atom_link" => atoms::link(cortex, args),
        "atom_stats" => atoms::stats(cortex, args),
        "atomize" => atoms::atomize(cortex, args),
        "abstract_deeper" => atoms::abstract_deeper(cortex, args),
        "classify_query" => atoms::classify(cortex, args),
        "temporal_search" => atoms::temporal_search(cortex, args),
        "what_happened_before" => atoms::what_happened_before(cortex, args),
        "temporal_patterns" => atoms::temporal_patterns(cortex, args),
        "synapse" => messaging::synapse(cortex, args),
        "cortex_heal" => heal::heal(cortex, args),
        _ => ToolResponse::with_details(
            format!("Unknown tool '{}'", name),
            json!({"error": "unknown_tool"}),
        ),
    }
}

// Argument extraction helpers shared by the tool modules

pub(crate) fn arg_str<'a>(args: &'a Value, key: &str) -> Option<&'a str> {
    args.get(key).and_then(Value::as_str).filter(|s| !s.is_empty())
}

pub(crate) fn require_str<'a>(args: &'a Value, key: &str) -> Result<&'a str, ToolResponse> {
    arg_str(args, key).ok_or_else(|| {
        ToolResponse::with_details(
            format!("Missing required argument '{}'", key),
            json!({"error": "validation_error", "missing": key}),
        )
    })
}

pub(crate) fn arg_f64(args: &Value, key: &str) -> Option<f64> {
    args.get(key).and_then(Value::as_f64)
}

pub(crate) fn arg_usize(args: &Value, key: &str) -> Option<usize> {
    args.get(key).and_then(Value::as_u64).map(|v| v as usize)
}

pub(crate) fn arg_bool(args: &Value, key: &str) -> Option<bool> {
    args.get(key).and_then(Value::as_bool)
}

pub(crate) fn arg_str_list(args: &Value, key: &str) -> Option<Vec<String>> {
    args.get(key).and_then(Value::as_array).map(|items| {
        items
            .iter()
            .filter_map(Value::as_str)
            .map(str::to_string)
            .collect()
    })
}
