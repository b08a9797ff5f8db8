use cortex_engine::{is_read_only_command, serialize_params};
use cortex_types::RiskTier;
use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::Value;

/// Risk classification for one tool call
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Classification {
    pub tier: RiskTier,
    pub category: String,
}

// Tier-4 financial patterns. These are evaluated before any read-only
// shortcut: a compound like `ls && augur trade --live` must classify as
// financial, never as a harmless listing.
static FINANCIAL: Lazy<[(Regex, &'static str); 3]> = Lazy::new(|| {
    [
        (
            Regex::new(r"(?i)\baugur\b.{0,40}\b(trade|execute|order)\b|\b(trade|execute|order)\b.{0,40}\baugur\b")
                .expect("augur pattern compiles"),
            "financial_augur",
        ),
        (
            Regex::new(r"(?i)\b(crypto|wallet|btc|eth)\b.{0,40}\b(transfer|send|withdraw)\b")
                .expect("crypto pattern compiles"),
            "financial_crypto",
        ),
        (
            Regex::new(r"(?i)\b(payment|charge|invoice)\b.{0,40}\b(create|execute|capture)\b")
                .expect("payment pattern compiles"),
            "financial_payment",
        ),
    ]
});

static REMOTE_EXEC: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\bssh\b|\bscp\b|\brsync\b.{0,40}@").expect("remote pattern compiles"));

static SYSTEM_CONTROL: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"\bsystemctl\b|\bservice\b|\breboot\b|\bshutdown\b|\bkill\b|\bpkill\b")
        .expect("system pattern compiles")
});

static FILE_WRITE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"\b(rm|mv|cp|mkdir|touch|truncate|chmod|chown|tee)\b|>\s*\S").expect("file pattern compiles")
});

/// Deterministic rule table mapping (tool_name, params) to a tier and
/// category. Order matters: financial first, read-only shortcut second,
/// then escalating rule rows. Unknown shapes fall back to tier 2.
pub fn classify_action(tool_name: &str, params: &Value) -> Classification {
    let serialized = serialize_params(params).to_lowercase();

    for (pattern, category) in FINANCIAL.iter() {
        if pattern.is_match(&serialized) {
            return Classification {
                tier: RiskTier::Tier4,
                category: (*category).to_string(),
            };
        }
    }

    let command = params
        .get("command")
        .and_then(Value::as_str)
        .unwrap_or_default();
    if tool_name == "exec" && is_read_only_command(command) {
        return Classification {
            tier: RiskTier::Tier1,
            category: "read_only".to_string(),
        };
    }

    if tool_name.starts_with("cortex_")
        || tool_name.starts_with("atom_")
        || tool_name.starts_with("temporal_")
        || matches!(
            tool_name,
            "working_memory" | "atomize" | "abstract_deeper" | "classify_query" | "what_happened_before"
        )
    {
        return Classification {
            tier: RiskTier::Tier1,
            category: "memory_ops".to_string(),
        };
    }

    match tool_name {
        "message" | "synapse" => Classification {
            tier: RiskTier::Tier1,
            category: "messaging".to_string(),
        },
        "browser" => Classification {
            tier: RiskTier::Tier2,
            category: "browser_nav".to_string(),
        },
        "write_file" | "edit_file" => Classification {
            tier: RiskTier::Tier2,
            category: "file_write".to_string(),
        },
        "nodes" => Classification {
            tier: RiskTier::Tier3,
            category: "fleet_control".to_string(),
        },
        "exec" if REMOTE_EXEC.is_match(&serialized) => Classification {
            tier: RiskTier::Tier3,
            category: "remote_exec".to_string(),
        },
        "exec" if SYSTEM_CONTROL.is_match(&serialized) => Classification {
            tier: RiskTier::Tier3,
            category: "system_control".to_string(),
        },
        "exec" if FILE_WRITE.is_match(&serialized) => Classification {
            tier: RiskTier::Tier2,
            category: "file_write".to_string(),
        },
        "exec" => Classification {
            tier: RiskTier::Tier2,
            category: "shell_exec".to_string(),
        },
        _ => {
            // Conservative fallback for unrecognized tools
            tracing::debug!(tool_name, "unclassified tool, defaulting to tier 2");
            Classification {
                tier: RiskTier::Tier2,
                category: "general_tool".to_string(),
            }
        }
    }
}
