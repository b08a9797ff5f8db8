use std::collections::HashMap;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::{Error, Result};

/// Resolve the workspace data directory path based on priority:
/// 1. Explicit path (with tilde expansion)
/// 2. CORTEX_PATH environment variable (with tilde expansion)
/// 3. XDG data directory (recommended default)
/// 4. ~/.cortex (fallback for systems without XDG)
pub fn resolve_workspace_path(explicit_path: Option<&str>) -> Result<PathBuf> {
    if let Some(path) = explicit_path {
        return Ok(expand_tilde(path));
    }

    if let Ok(env_path) = std::env::var("CORTEX_PATH") {
        return Ok(expand_tilde(&env_path));
    }

    if let Some(data_dir) = dirs::data_dir() {
        return Ok(data_dir.join("cortex"));
    }

    if let Some(home) = std::env::var_os("HOME") {
        return Ok(PathBuf::from(home).join(".cortex"));
    }

    Err(Error::Config(
        "Could not determine workspace path: no HOME directory or XDG data directory found"
            .to_string(),
    ))
}

/// Expand tilde (~) in paths to the user's home directory
fn expand_tilde(path: &str) -> PathBuf {
    if let Some(stripped) = path.strip_prefix("~/")
        && let Some(home) = std::env::var_os("HOME")
    {
        return PathBuf::from(home).join(stripped);
    }
    PathBuf::from(path)
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PreActionConfig {
    pub enabled: bool,
    /// strict | category | advisory | disabled
    pub enforcement_level: String,
    /// Per-category overrides of the enforcement level
    pub category_rules: HashMap<String, String>,
    pub intercept_tools: Vec<String>,
    pub cooldown_minutes: u64,
    pub max_lookup_ms: u64,
    pub max_knowledge_length: usize,
    pub confidence_threshold: f64,
    pub emergency_bypass: bool,
}

impl Default for PreActionConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            enforcement_level: "strict".to_string(),
            category_rules: HashMap::new(),
            intercept_tools: ["exec", "nodes", "browser", "message"]
                .map(String::from)
                .to_vec(),
            cooldown_minutes: 5,
            max_lookup_ms: 150,
            max_knowledge_length: 2_000,
            confidence_threshold: 0.5,
            emergency_bypass: false,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionPersistenceConfig {
    pub enabled: bool,
    pub lookback_days: i64,
    pub relevance_threshold: f64,
    pub max_sessions_scored: usize,
    pub max_inherited_pins: usize,
    pub decay_min_floor: f64,
    pub critical_inheritance_days: i64,
    pub restore_budget_ms: u64,
    pub sessions_dir: Option<PathBuf>,
    pub debug: bool,
}

impl Default for SessionPersistenceConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            lookback_days: 7,
            relevance_threshold: 0.25,
            max_sessions_scored: 3,
            max_inherited_pins: 5,
            decay_min_floor: 0.3,
            critical_inheritance_days: 30,
            restore_budget_ms: 1_500,
            sessions_dir: None,
            debug: false,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SelfHealingConfig {
    pub enabled: bool,
    pub tier3_signal_channel: Option<String>,
    pub confidence_auto_execute: f64,
    pub dry_run_graduation_count: u32,
    pub verification_interval_ms: u64,
    pub min_clear_readings: u32,
    pub incident_dismiss_window_ms: u64,
    pub auto_execute_whitelist: Vec<String>,
    pub probe_intervals_ms: HashMap<String, u64>,
    pub debug: bool,
}

impl Default for SelfHealingConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            tier3_signal_channel: None,
            confidence_auto_execute: 0.85,
            dry_run_graduation_count: 3,
            verification_interval_ms: 30_000,
            min_clear_readings: 3,
            incident_dismiss_window_ms: 4 * 3_600_000,
            auto_execute_whitelist: ["rb-rotate-logs", "rb-gc-notify"].map(String::from).to_vec(),
            probe_intervals_ms: HashMap::new(),
            debug: false,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TrustConfig {
    pub correction_window_minutes: i64,
    pub outcome_sweep_interval_minutes: u64,
    pub retention_days: i64,
}

impl Default for TrustConfig {
    fn default() -> Self {
        Self {
            correction_window_minutes: 30,
            outcome_sweep_interval_minutes: 5,
            retention_days: 90,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CortexConfig {
    pub enabled: bool,
    pub auto_capture: bool,
    pub stm_fast_path: bool,
    pub temporal_rerank: bool,
    pub temporal_weight: f64,
    pub importance_weight: f64,
    pub stm_capacity: usize,
    pub min_match_score: f64,
    pub episodic_memory_turns: usize,
    pub hot_tier_size: usize,
    pub max_context_tokens: usize,
    pub relevance_threshold: f64,
    pub truncate_old_memories_to: usize,
    pub delta_sync_enabled: bool,
    pub prefetch_enabled: bool,
    pub sop_catalog_dir: Option<PathBuf>,
    pub pre_action_hooks: PreActionConfig,
    pub session_persistence: SessionPersistenceConfig,
    pub self_healing: SelfHealingConfig,
    pub trust: TrustConfig,
}

impl Default for CortexConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            auto_capture: true,
            stm_fast_path: true,
            temporal_rerank: true,
            temporal_weight: 0.3,
            importance_weight: 0.2,
            stm_capacity: 500,
            min_match_score: 0.3,
            episodic_memory_turns: 50,
            hot_tier_size: 200,
            max_context_tokens: 2_500,
            relevance_threshold: 0.5,
            truncate_old_memories_to: 300,
            delta_sync_enabled: true,
            prefetch_enabled: true,
            sop_catalog_dir: None,
            pre_action_hooks: PreActionConfig::default(),
            session_persistence: SessionPersistenceConfig::default(),
            self_healing: SelfHealingConfig::default(),
            trust: TrustConfig::default(),
        }
    }
}

impl CortexConfig {
    pub fn load() -> Result<Self> {
        let config_path = Self::default_path()?;
        Self::load_from(&config_path)
    }

    pub fn load_from(path: &PathBuf) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(path)?;
        let config: CortexConfig = toml::from_str(&content)?;
        Ok(config)
    }

    pub fn save_to(&self, path: &PathBuf) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }

    pub fn default_path() -> Result<PathBuf> {
        Ok(resolve_workspace_path(None)?.join("config.toml"))
    }

    /// Injector settings derived from the flat config surface
    pub fn injector(&self) -> cortex_engine::InjectorConfig {
        cortex_engine::InjectorConfig {
            max_budget: self.max_context_tokens,
            min_match_score: self.min_match_score,
            relevance_threshold: self.relevance_threshold,
            truncate_old_memories_to: self.truncate_old_memories_to,
            ..cortex_engine::InjectorConfig::default()
        }
    }

    /// Scoring weights derived from the flat config surface
    pub fn scoring(&self) -> cortex_engine::ScoringParams {
        cortex_engine::ScoringParams {
            temporal_weight: self.temporal_weight,
            importance_weight: self.importance_weight,
        }
    }

    /// Enforcement policy derived from the pre-action block
    pub fn enforcement(&self) -> cortex_engine::EnforcementConfig {
        let level = cortex_engine::EnforcementLevel::parse(&self.pre_action_hooks.enforcement_level)
            .unwrap_or(cortex_engine::EnforcementLevel::Strict);
        let category_rules = self
            .pre_action_hooks
            .category_rules
            .iter()
            .filter_map(|(category, raw)| {
                cortex_engine::EnforcementLevel::parse(raw).map(|l| (category.clone(), l))
            })
            .collect();
        cortex_engine::EnforcementConfig {
            level,
            category_rules,
            max_knowledge_length: self.pre_action_hooks.max_knowledge_length,
            emergency_bypass: self.pre_action_hooks.emergency_bypass,
            confidence_routine: self.pre_action_hooks.confidence_threshold,
            ..cortex_engine::EnforcementConfig::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_config_defaults() {
        let config = CortexConfig::default();
        assert!(config.enabled);
        assert_eq!(config.pre_action_hooks.max_lookup_ms, 150);
        assert_eq!(config.pre_action_hooks.cooldown_minutes, 5);
        assert_eq!(config.session_persistence.max_sessions_scored, 3);
        assert_eq!(config.self_healing.min_clear_readings, 3);
        assert_eq!(config.trust.correction_window_minutes, 30);
    }

    #[test]
    fn test_config_save_and_load() -> Result<()> {
        let temp_dir = TempDir::new()?;
        let config_path = temp_dir.path().join("config.toml");

        let mut config = CortexConfig::default();
        config.hot_tier_size = 64;
        config.pre_action_hooks.emergency_bypass = true;
        config.save_to(&config_path)?;

        let loaded = CortexConfig::load_from(&config_path)?;
        assert_eq!(loaded.hot_tier_size, 64);
        assert!(loaded.pre_action_hooks.emergency_bypass);
        Ok(())
    }

    #[test]
    fn test_load_nonexistent_returns_default() -> Result<()> {
        let temp_dir = TempDir::new()?;
        let config_path = temp_dir.path().join("nonexistent.toml");

        let config = CortexConfig::load_from(&config_path)?;
        assert!(config.enabled);
        Ok(())
    }

    #[test]
    fn test_partial_toml_fills_defaults() -> Result<()> {
        let temp_dir = TempDir::new()?;
        let config_path = temp_dir.path().join("config.toml");
        std::fs::write(
            &config_path,
            "hot_tier_size = 32\n\n[pre_action_hooks]\nmax_lookup_ms = 75\n",
        )?;

        let loaded = CortexConfig::load_from(&config_path)?;
        assert_eq!(loaded.hot_tier_size, 32);
        assert_eq!(loaded.pre_action_hooks.max_lookup_ms, 75);
        assert_eq!(loaded.pre_action_hooks.cooldown_minutes, 5);
        Ok(())
    }

    #[test]
    fn test_enforcement_derivation() {
        let mut config = CortexConfig::default();
        config
            .pre_action_hooks
            .category_rules
            .insert("preference".to_string(), "disabled".to_string());
        let enforcement = config.enforcement();
        assert_eq!(
            enforcement.category_rules.get("preference"),
            Some(&cortex_engine::EnforcementLevel::Disabled)
        );
    }
}
