//! Configuration file and storage path helpers.
//!
//! The config lives at `<config-home>/invisibrow.json`; persisted state
//! lives under `<data-home>/invisibrow/storage/`. Both roots honor the XDG
//! variables and fall back to the conventional `$HOME` locations. Tests and
//! multi-instance setups can point the data root elsewhere with
//! `INVISIBROW_DATA_DIR`.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::InvisibrowError;

/// Default model for the planner agent.
pub const DEFAULT_PLANNER_MODEL: &str = "claude-sonnet-4-20250514";

/// Default model for the executor agent.
pub const DEFAULT_EXECUTOR_MODEL: &str = "claude-sonnet-4-20250514";

/// Default model for the watchdog agent. The watchdog runs on every executor
/// step, so it defaults to the cheapest tier.
pub const DEFAULT_WATCHDOG_MODEL: &str = "claude-3-5-haiku-20241022";

/// Default bound on concurrently executing tasks.
pub const DEFAULT_MAX_CONCURRENT_TASKS: usize = 2;

fn default_planner_model() -> String {
    DEFAULT_PLANNER_MODEL.to_string()
}

fn default_executor_model() -> String {
    DEFAULT_EXECUTOR_MODEL.to_string()
}

fn default_watchdog_model() -> String {
    DEFAULT_WATCHDOG_MODEL.to_string()
}

fn default_max_concurrent() -> usize {
    DEFAULT_MAX_CONCURRENT_TASKS
}

/// Per-agent model assignments, from the `models` config object.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelsConfig {
    #[serde(rename = "plannerAgent", default = "default_planner_model")]
    pub planner_agent: String,
    #[serde(rename = "executorAgent", default = "default_executor_model")]
    pub executor_agent: String,
    #[serde(rename = "watchdogAgent", default = "default_watchdog_model")]
    pub watchdog_agent: String,
}

impl Default for ModelsConfig {
    fn default() -> Self {
        Self {
            planner_agent: default_planner_model(),
            executor_agent: default_executor_model(),
            watchdog_agent: default_watchdog_model(),
        }
    }
}

/// Top-level configuration, loaded from `<config-home>/invisibrow.json`.
/// Unset keys take the documented defaults.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InvisibrowConfig {
    #[serde(default)]
    pub models: ModelsConfig,
    #[serde(rename = "maxConcurrentTasks", default = "default_max_concurrent")]
    pub max_concurrent_tasks: usize,
}

impl Default for InvisibrowConfig {
    fn default() -> Self {
        Self {
            models: ModelsConfig::default(),
            max_concurrent_tasks: DEFAULT_MAX_CONCURRENT_TASKS,
        }
    }
}

impl InvisibrowConfig {
    /// Parse a configuration from a JSON string.
    pub fn from_json(content: &str) -> Result<Self, InvisibrowError> {
        serde_json::from_str(content)
            .map_err(|e| InvisibrowError::Config(format!("invalid config: {e}")))
    }

    /// Load the configuration from [`config_path`], falling back to defaults
    /// when the file does not exist.
    pub fn load() -> Result<Self, InvisibrowError> {
        let path = config_path();
        if !path.exists() {
            return Ok(Self::default());
        }
        let content = std::fs::read_to_string(&path).map_err(|e| {
            InvisibrowError::Config(format!("failed to read {}: {e}", path.display()))
        })?;
        Self::from_json(&content)
    }
}

fn home_dir() -> PathBuf {
    PathBuf::from(std::env::var("HOME").unwrap_or_else(|_| "/tmp".into()))
}

/// Path to the configuration file.
pub fn config_path() -> PathBuf {
    let config_home = std::env::var("XDG_CONFIG_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| home_dir().join(".config"));
    config_home.join("invisibrow.json")
}

/// Root of all persisted state. Honors `INVISIBROW_DATA_DIR`, then
/// `XDG_DATA_HOME`, then `$HOME/.local/share`.
pub fn data_dir() -> PathBuf {
    if let Ok(dir) = std::env::var("INVISIBROW_DATA_DIR") {
        return PathBuf::from(dir);
    }
    let data_home = std::env::var("XDG_DATA_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| home_dir().join(".local").join("share"));
    data_home.join("invisibrow")
}

/// The storage directory holding all persisted files.
pub fn storage_dir() -> PathBuf {
    data_dir().join("storage")
}

/// Path of the persisted session list.
pub fn sessions_path() -> PathBuf {
    storage_dir().join("sessions.json")
}

/// Path of the persisted task list.
pub fn tasks_path() -> PathBuf {
    storage_dir().join("tasks.json")
}

/// Path of the long-term memory database.
pub fn memory_db_path() -> PathBuf {
    storage_dir().join("memory.sqlite")
}

/// Browser profile directory for a session. Owned by the page driver.
pub fn profile_dir(session_id: &str) -> PathBuf {
    storage_dir().join("session").join(session_id)
}

/// Directory receiving LLM request/response transcripts for one agent of
/// one session.
pub fn message_dir(session_id: &str, agent_type: &str) -> PathBuf {
    storage_dir()
        .join("message")
        .join(session_id)
        .join(agent_type)
}

/// Whether deterministic mock execution is enabled (no driver, no LLM).
pub fn ui_test_enabled() -> bool {
    std::env::var("UI_TEST").is_ok_and(|v| v == "1" || v.eq_ignore_ascii_case("true"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_when_keys_unset() {
        let config = InvisibrowConfig::from_json("{}").unwrap();
        assert_eq!(config.models.planner_agent, DEFAULT_PLANNER_MODEL);
        assert_eq!(config.models.executor_agent, DEFAULT_EXECUTOR_MODEL);
        assert_eq!(config.models.watchdog_agent, DEFAULT_WATCHDOG_MODEL);
        assert_eq!(config.max_concurrent_tasks, DEFAULT_MAX_CONCURRENT_TASKS);
    }

    #[test]
    fn camel_case_keys_parsed() {
        let config = InvisibrowConfig::from_json(
            r#"{
                "models": {
                    "plannerAgent": "gpt-4o",
                    "watchdogAgent": "gpt-4o-mini"
                },
                "maxConcurrentTasks": 4
            }"#,
        )
        .unwrap();
        assert_eq!(config.models.planner_agent, "gpt-4o");
        assert_eq!(config.models.executor_agent, DEFAULT_EXECUTOR_MODEL);
        assert_eq!(config.models.watchdog_agent, "gpt-4o-mini");
        assert_eq!(config.max_concurrent_tasks, 4);
    }

    #[test]
    fn invalid_json_rejected() {
        assert!(InvisibrowConfig::from_json("not json").is_err());
    }

    #[test]
    fn storage_paths_are_rooted_in_data_dir() {
        let root = data_dir();
        assert!(sessions_path().starts_with(&root));
        assert!(tasks_path().starts_with(&root));
        assert!(memory_db_path().starts_with(&root));
        assert!(profile_dir("abc").starts_with(&root));
        assert!(message_dir("abc", "planner").ends_with("message/abc/planner"));
    }
}
