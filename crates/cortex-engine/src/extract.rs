use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::Value;

/// Coarse command classification derived from tool parameters
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommandType {
    ReadOnly,
    Mutating,
    Service,
    Deploy,
    Network,
    Unknown,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum RiskLevel {
    Low,
    Medium,
    High,
}

/// Everything the gate needs to know about one tool call, derived from the
/// tool name and its parameters.
#[derive(Debug, Clone)]
pub struct ActionContext {
    pub keywords: Vec<String>,
    pub project_path: Option<String>,
    pub service_type: Option<String>,
    pub host_target: Option<String>,
    pub working_dir: Option<String>,
    pub url_host: Option<String>,
    pub command_type: CommandType,
    pub risk_level: RiskLevel,
}

// Anchored allow-list of read-only command heads. Matching the head token
// (not a substring) is what keeps `ls && rm -rf /` out of the fast path:
// only the full trimmed command participates, and compound commands fail
// the anchor.
static READ_ONLY: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"(?x)^(
            ls|cat|head|tail|grep|find|wc|stat|echo|pwd|which|type|test|diff|
            git\s+(log|tag|status|diff|show|branch)|
            systemctl\s+--user\s+(status|list-units|is-active)|
            journalctl|nvidia-smi|free|df|du|uptime|ps|top|htop
        )(\s|$)",
    )
    .expect("read-only allow-list compiles")
});

static RISKY_VERBS: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"\b(rm|chmod|chown|mkfs|dd|systemctl|kill|pkill|reboot|shutdown|deploy|truncate)\b")
        .expect("risky verb list compiles")
});

static SSH_TARGET: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\bssh\s+(?:-\S+\s+)*([a-zA-Z0-9_.@-]+)").expect("ssh pattern compiles"));

static URL_HOST: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"https?://([a-zA-Z0-9_.-]+)").expect("url pattern compiles"));

static SERVICE_NAME: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"\bsystemctl\s+(?:--user\s+)?\w+\s+([a-zA-Z0-9@_.-]+)").expect("service pattern compiles")
});

const STOPWORDS: [&str; 12] = [
    "the", "and", "for", "with", "this", "that", "from", "into", "then", "else", "true", "false",
];
const MAX_KEYWORDS: usize = 8;

/// True when a command's head token is on the anchored read-only allow-list
/// and the command is not compound.
pub fn is_read_only_command(command: &str) -> bool {
    let trimmed = command.trim();
    if trimmed.contains("&&") || trimmed.contains("||") || trimmed.contains(';') || trimmed.contains('|') {
        return false;
    }
    READ_ONLY.is_match(trimmed)
}

/// Derive an [`ActionContext`] from a tool invocation.
pub fn extract_context(tool_name: &str, params: &Value) -> ActionContext {
    let command = params
        .get("command")
        .and_then(Value::as_str)
        .unwrap_or_default();
    let working_dir = params
        .get("workdir")
        .or_else(|| params.get("working_dir"))
        .or_else(|| params.get("cwd"))
        .and_then(Value::as_str)
        .map(str::to_string);
    let serialized = serialize_params(params).to_lowercase();

    let command_type = classify_command(tool_name, command, &serialized);
    let risk_level = if RISKY_VERBS.is_match(&serialized) {
        RiskLevel::High
    } else if matches!(command_type, CommandType::Network | CommandType::Service) {
        RiskLevel::Medium
    } else {
        RiskLevel::Low
    };

    ActionContext {
        keywords: derive_keywords(&serialized, working_dir.as_deref()),
        project_path: working_dir.as_deref().and_then(project_from_path),
        service_type: SERVICE_NAME
            .captures(&serialized)
            .map(|c| c[1].to_string()),
        host_target: SSH_TARGET.captures(&serialized).map(|c| c[1].to_string()),
        working_dir,
        url_host: URL_HOST.captures(&serialized).map(|c| c[1].to_string()),
        command_type,
        risk_level,
    }
}

/// Flatten tool params into a searchable line
pub fn serialize_params(params: &Value) -> String {
    match params {
        Value::Object(map) => map
            .iter()
            .map(|(k, v)| format!("{}={}", k, serialize_params(v)))
            .collect::<Vec<_>>()
            .join(" "),
        Value::Array(items) => items
            .iter()
            .map(serialize_params)
            .collect::<Vec<_>>()
            .join(" "),
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

fn classify_command(tool_name: &str, command: &str, serialized: &str) -> CommandType {
    if tool_name == "exec" && is_read_only_command(command) {
        return CommandType::ReadOnly;
    }
    if serialized.contains("systemctl") || serialized.contains(".service") {
        return CommandType::Service;
    }
    if serialized.contains("deploy") || serialized.contains("rollout") {
        return CommandType::Deploy;
    }
    if serialized.contains("http://") || serialized.contains("https://") || serialized.contains("ssh ")
    {
        return CommandType::Network;
    }
    if tool_name == "exec" && !command.is_empty() {
        return CommandType::Mutating;
    }
    CommandType::Unknown
}

fn derive_keywords(serialized: &str, working_dir: Option<&str>) -> Vec<String> {
    let mut keywords: Vec<String> = Vec::new();
    let mut push = |token: &str| {
        let token = token.to_lowercase();
        if token.len() >= 3
            && !STOPWORDS.contains(&token.as_str())
            && !keywords.contains(&token)
            && keywords.len() < MAX_KEYWORDS
        {
            keywords.push(token);
        }
    };

    if let Some(dir) = working_dir {
        for segment in dir.split(['/', '\\']) {
            push(segment);
        }
    }
    for token in serialized.split(|c: char| !c.is_alphanumeric() && c != '_' && c != '-') {
        push(token);
    }
    keywords
}

/// Last meaningful path segment under a conventional projects root
fn project_from_path(path: &str) -> Option<String> {
    let segments: Vec<&str> = path.split('/').filter(|s| !s.is_empty()).collect();
    if let Some(idx) = segments
        .iter()
        .position(|s| s.eq_ignore_ascii_case("projects") || s.eq_ignore_ascii_case("src"))
    {
        return segments.get(idx + 1).map(|s| s.to_string());
    }
    segments.last().map(|s| s.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_read_only_allow_list_is_anchored() {
        assert!(is_read_only_command("ls -la"));
        assert!(is_read_only_command("git status"));
        assert!(is_read_only_command("systemctl --user status augur"));
        assert!(is_read_only_command("df -h"));

        // Compound commands never take the fast path
        assert!(!is_read_only_command("ls && augur trade --live"));
        assert!(!is_read_only_command("cat x; rm -rf /"));
        assert!(!is_read_only_command("echo hi | sh"));
        // Substring of a non-read-only command
        assert!(!is_read_only_command("lsof -i"));
        assert!(!is_read_only_command("git push origin main"));
        assert!(!is_read_only_command("systemctl restart augur"));
    }

    #[test]
    fn test_extract_keywords_and_project() {
        let ctx = extract_context(
            "exec",
            &json!({
                "command": "systemctl restart augur-executor",
                "workdir": "/home/u/Projects/augur"
            }),
        );
        assert!(ctx.keywords.contains(&"augur".to_string()));
        assert!(ctx.keywords.contains(&"restart".to_string()));
        assert_eq!(ctx.project_path.as_deref(), Some("augur"));
        assert_eq!(ctx.service_type.as_deref(), Some("augur-executor"));
        assert_eq!(ctx.command_type, CommandType::Service);
        assert_eq!(ctx.risk_level, RiskLevel::High);
    }

    #[test]
    fn test_extract_ssh_and_url() {
        let ctx = extract_context(
            "exec",
            &json!({"command": "ssh fleet-03 uptime"}),
        );
        assert_eq!(ctx.host_target.as_deref(), Some("fleet-03"));
        assert_eq!(ctx.command_type, CommandType::Network);
        assert_eq!(ctx.risk_level, RiskLevel::Medium);

        let ctx = extract_context(
            "browser",
            &json!({"url": "https://dash.internal.example/metrics"}),
        );
        assert_eq!(ctx.url_host.as_deref(), Some("dash.internal.example"));
    }

    #[test]
    fn test_read_only_context() {
        let ctx = extract_context("exec", &json!({"command": "ls -la"}));
        assert_eq!(ctx.command_type, CommandType::ReadOnly);
        assert_eq!(ctx.risk_level, RiskLevel::Low);
    }

    #[test]
    fn test_short_path_tokens_dropped() {
        let ctx = extract_context(
            "exec",
            &json!({"command": "pwd", "workdir": "/a/b/longname"}),
        );
        assert!(ctx.keywords.contains(&"longname".to_string()));
        assert!(!ctx.keywords.iter().any(|k| k == "a" || k == "b"));
    }
}
