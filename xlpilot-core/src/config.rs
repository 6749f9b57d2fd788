//! Runtime settings: an optional YAML file, then `XLPILOT_*` environment overrides.

use std::fs;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use xlpilot_planner::{
    HttpPlanGenerator, NullPlanGenerator, PlanGenerator, RetryPolicy, RetryingPlanGenerator,
};

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("cannot read {path}: {message}")]
    Io { path: String, message: String },
    #[error("invalid config file: {0}")]
    Yaml(#[from] serde_yaml::Error),
    #[error("{var}: cannot parse `{value}`")]
    Invalid { var: &'static str, value: String },
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PlannerSettings {
    pub api_base: String,
    pub api_key: Option<String>,
    pub model: String,
    pub deterministic: bool,
    pub seed: Option<u64>,
    pub timeout_ms: u64,
    pub max_attempts: u32,
    pub backoff_ms: u64,
    /// Run without a planner backend; every refine round fails with a generator error.
    pub stub: bool,
}

impl Default for PlannerSettings {
    fn default() -> Self {
        Self {
            api_base: "https://api.openai.com/v1".into(),
            api_key: None,
            model: "gpt-4o-mini".into(),
            deterministic: true,
            seed: Some(42),
            timeout_ms: 60_000,
            max_attempts: 3,
            backoff_ms: 500,
            stub: false,
        }
    }
}

impl PlannerSettings {
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            timeout: Duration::from_millis(self.timeout_ms),
            max_attempts: self.max_attempts,
            backoff: Duration::from_millis(self.backoff_ms),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub planner: PlannerSettings,
    pub max_clarification_rounds: u32,
    /// Jaro-Winkler similarity a fuzzy column match must reach.
    pub fuzzy_threshold: f64,
    pub session_ttl_secs: u64,
    pub sweep_interval_secs: u64,
    pub max_concurrent_executions: usize,
    pub bind_addr: String,
    pub receipts_file: Option<String>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            planner: PlannerSettings::default(),
            max_clarification_rounds: 3,
            fuzzy_threshold: 0.85,
            session_ttl_secs: 3600,
            sweep_interval_secs: 60,
            max_concurrent_executions: 4,
            bind_addr: "0.0.0.0:8000".into(),
            receipts_file: Some("./receipts.jsonl".into()),
        }
    }
}

fn flag(v: &str) -> bool {
    v == "1" || v.eq_ignore_ascii_case("true")
}

fn number<T: std::str::FromStr>(var: &'static str, value: String) -> Result<T, ConfigError> {
    value
        .trim()
        .parse()
        .map_err(|_| ConfigError::Invalid { var, value })
}

impl Settings {
    pub fn from_path(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let text = fs::read_to_string(path).map_err(|e| ConfigError::Io {
            path: path.display().to_string(),
            message: e.to_string(),
        })?;
        Ok(serde_yaml::from_str(&text)?)
    }

    /// File named by `XLPILOT_CONFIG` (if any) plus the process environment.
    pub fn load() -> Result<Self, ConfigError> {
        let base = match std::env::var("XLPILOT_CONFIG") {
            Ok(path) if !path.trim().is_empty() => Self::from_path(path)?,
            _ => Self::default(),
        };
        base.with_overrides(|key| std::env::var(key).ok())
    }

    /// Applies `XLPILOT_*` overrides read through `lookup`.
    pub fn with_overrides(
        mut self,
        lookup: impl Fn(&str) -> Option<String>,
    ) -> Result<Self, ConfigError> {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        if let Some(v) = get("XLPILOT_LLM_API_BASE") {
            self.planner.api_base = v;
        }
        if let Some(v) = get("XLPILOT_LLM_API_KEY") {
            self.planner.api_key = Some(v);
        }
        if let Some(v) = get("XLPILOT_LLM_MODEL") {
            self.planner.model = v;
        }
        if let Some(v) = get("XLPILOT_LLM_DETERMINISTIC") {
            self.planner.deterministic = flag(&v);
        }
        if let Some(v) = get("XLPILOT_LLM_SEED") {
            self.planner.seed = Some(number("XLPILOT_LLM_SEED", v)?);
        }
        if let Some(v) = get("XLPILOT_PLANNER_TIMEOUT_MS") {
            self.planner.timeout_ms = number("XLPILOT_PLANNER_TIMEOUT_MS", v)?;
        }
        if let Some(v) = get("XLPILOT_PLANNER_MAX_ATTEMPTS") {
            self.planner.max_attempts = number("XLPILOT_PLANNER_MAX_ATTEMPTS", v)?;
        }
        if let Some(v) = get("XLPILOT_PLANNER_BACKOFF_MS") {
            self.planner.backoff_ms = number("XLPILOT_PLANNER_BACKOFF_MS", v)?;
        }
        if let Some(v) = get("XLPILOT_PLANNER_STUB") {
            self.planner.stub = flag(&v);
        }
        if let Some(v) = get("XLPILOT_MAX_CLARIFICATION_ROUNDS") {
            self.max_clarification_rounds = number("XLPILOT_MAX_CLARIFICATION_ROUNDS", v)?;
        }
        if let Some(v) = get("XLPILOT_FUZZY_THRESHOLD") {
            self.fuzzy_threshold = number("XLPILOT_FUZZY_THRESHOLD", v)?;
        }
        if let Some(v) = get("XLPILOT_SESSION_TTL_SECS") {
            self.session_ttl_secs = number("XLPILOT_SESSION_TTL_SECS", v)?;
        }
        if let Some(v) = get("XLPILOT_SWEEP_INTERVAL_SECS") {
            self.sweep_interval_secs = number("XLPILOT_SWEEP_INTERVAL_SECS", v)?;
        }
        if let Some(v) = get("XLPILOT_MAX_CONCURRENT_EXECUTIONS") {
            self.max_concurrent_executions = number("XLPILOT_MAX_CONCURRENT_EXECUTIONS", v)?;
        }
        if let Some(v) = get("XLPILOT_BIND_ADDR") {
            self.bind_addr = v;
        }
        if let Some(v) = lookup("XLPILOT_RECEIPTS_FILE") {
            // An explicitly empty value disables the receipt log.
            self.receipts_file = Some(v).filter(|p| !p.trim().is_empty());
        }
        Ok(self)
    }

    pub fn session_ttl(&self) -> Duration {
        Duration::from_secs(self.session_ttl_secs)
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs.max(1))
    }

    /// The generator these settings describe, wrapped in retry and timeout handling.
    pub fn plan_generator(&self) -> Arc<dyn PlanGenerator> {
        if self.planner.stub {
            return Arc::new(NullPlanGenerator);
        }
        let p = &self.planner;
        let http = HttpPlanGenerator::new(
            p.api_base.clone(),
            p.api_key.clone(),
            p.model.clone(),
            p.deterministic,
            p.seed,
        );
        Arc::new(RetryingPlanGenerator::new(http, p.retry_policy()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn env(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |k| map.get(k).cloned()
    }

    #[test]
    fn yaml_fills_missing_fields_with_defaults() {
        let s: Settings = serde_yaml::from_str(
            "max_clarification_rounds: 5\nplanner:\n  model: local-llm\n  timeout_ms: 1000\n",
        )
        .unwrap();
        assert_eq!(s.max_clarification_rounds, 5);
        assert_eq!(s.planner.model, "local-llm");
        assert_eq!(s.planner.retry_policy().timeout, Duration::from_secs(1));
        assert_eq!(s.planner.max_attempts, 3);
        assert_eq!(s.fuzzy_threshold, 0.85);
    }

    #[test]
    fn environment_overrides_file_values() {
        let s = Settings::default()
            .with_overrides(env(&[
                ("XLPILOT_LLM_MODEL", "qwen"),
                ("XLPILOT_LLM_DETERMINISTIC", "false"),
                ("XLPILOT_PLANNER_STUB", "1"),
                ("XLPILOT_SESSION_TTL_SECS", "5"),
                ("XLPILOT_RECEIPTS_FILE", ""),
            ]))
            .unwrap();
        assert_eq!(s.planner.model, "qwen");
        assert!(!s.planner.deterministic);
        assert!(s.planner.stub);
        assert_eq!(s.session_ttl(), Duration::from_secs(5));
        assert!(s.receipts_file.is_none());
    }

    #[test]
    fn bad_numbers_name_the_variable() {
        let err = Settings::default()
            .with_overrides(env(&[("XLPILOT_MAX_CONCURRENT_EXECUTIONS", "lots")]))
            .unwrap_err();
        assert!(err.to_string().starts_with("XLPILOT_MAX_CONCURRENT_EXECUTIONS"));
    }

    #[test]
    fn missing_file_is_an_io_error() {
        let err = Settings::from_path("/definitely/not/here.yaml").unwrap_err();
        assert!(matches!(err, ConfigError::Io { .. }));
    }
}
