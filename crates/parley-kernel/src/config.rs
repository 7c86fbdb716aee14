use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use parley_completion::{CompletionConfig, DEFAULT_CACHE_CAPACITY};
use parley_memory::ContextConfig;
use parley_policy::PolicyConfig;
use parley_understanding::ClassifierConfig;
use serde::{Deserialize, Serialize};

/// Everything tunable about the pipeline. Every field has a default, so a
/// config file only names what it changes.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    pub classifier: ClassifierConfig,
    pub policy: PolicyConfig,
    pub context: ContextConfig,
    /// Completion backend; `None` runs on rules and pattern memory alone.
    pub completion: Option<CompletionConfig>,
    /// Response cache entries in front of the backend; 0 disables it.
    pub cache_capacity: usize,
    pub min_slots_before_model: usize,
    /// Root for sessions, patterns, and the journal; in memory when unset.
    pub storage_root: Option<PathBuf>,
    pub event_buffer: usize,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            classifier: ClassifierConfig::default(),
            policy: PolicyConfig::default(),
            context: ContextConfig::default(),
            completion: Some(CompletionConfig::default()),
            cache_capacity: DEFAULT_CACHE_CAPACITY,
            min_slots_before_model: 2,
            storage_root: None,
            event_buffer: 1024,
        }
    }
}

impl PipelineConfig {
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("failed reading config {path:?}"))?;
        serde_json::from_str(&raw).with_context(|| format!("failed parsing config {path:?}"))
    }
}

#[cfg(test)]
mod tests {
    use std::time::{SystemTime, UNIX_EPOCH};

    use super::*;
    use parley_policy::PolicyKind;

    fn unique_test_root(name: &str) -> PathBuf {
        let nanos = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_nanos())
            .unwrap_or(0);
        std::env::temp_dir().join(format!("{name}-{nanos}"))
    }

    #[test]
    fn defaults_match_documented_values() {
        let config = PipelineConfig::default();
        assert_eq!(config.classifier.rule_high_cutoff, 0.8);
        assert_eq!(config.classifier.model_confidence, 0.85);
        assert_eq!(config.policy.fixed.low, 0.81);
        assert_eq!(config.policy.fixed.high, 0.91);
        assert_eq!(config.context.history_cap, 10);
        assert_eq!(config.min_slots_before_model, 2);
        assert_eq!(config.cache_capacity, 256);
        assert_eq!(
            config.completion.as_ref().map(|completion| completion.timeout_ms),
            Some(15_000)
        );
    }

    #[test]
    fn partial_file_overrides_only_named_fields() -> Result<()> {
        let root = unique_test_root("parley-config");
        std::fs::create_dir_all(&root)?;
        let path = root.join("parley.json");
        std::fs::write(
            &path,
            r#"{
                "policy": { "kind": "semantic" },
                "context": { "history_cap": 4 },
                "completion": { "model": "qwen2.5", "timeout_ms": 2000 },
                "storage_root": "/var/lib/parley"
            }"#,
        )?;

        let config = PipelineConfig::from_json_file(&path)?;
        assert_eq!(config.policy.kind, PolicyKind::Semantic);
        assert_eq!(config.policy.semantic.high, 0.7);
        assert_eq!(config.context.history_cap, 4);
        assert_eq!(config.context.recent_topics_cap, 5);
        let completion = config.completion.expect("completion configured");
        assert_eq!(completion.model, "qwen2.5");
        assert_eq!(completion.base_url, "http://localhost:11434");
        assert_eq!(config.storage_root, Some(PathBuf::from("/var/lib/parley")));

        let _ = std::fs::remove_dir_all(root);
        Ok(())
    }

    #[test]
    fn null_completion_disables_the_backend() -> Result<()> {
        let config: PipelineConfig = serde_json::from_str(r#"{ "completion": null }"#)?;
        assert!(config.completion.is_none());
        Ok(())
    }

    #[test]
    fn missing_file_is_reported_with_its_path() {
        let error = PipelineConfig::from_json_file("/nonexistent/parley.json").unwrap_err();
        assert!(format!("{error:#}").contains("/nonexistent/parley.json"));
    }
}
