//! Cross-component callbacks threaded from the scheduler down through the
//! agent loops.
//!
//! The scheduler implements [`TaskHooks`] for each in-flight task; agents
//! call it to persist step records, account LLM usage, and read/extend the
//! session's history. Hook implementations absorb their own storage errors
//! (logging them) so a persistence hiccup never turns into an agent fault.

use async_trait::async_trait;

use invisibrow_types::{AgentKind, ChatUsage, StepUsage};

/// Per-task callbacks bundled by the scheduler.
#[async_trait]
pub trait TaskHooks: Send + Sync {
    /// Append one step to the task's trace and persist it.
    async fn record_step(
        &self,
        agent: AgentKind,
        step: u32,
        thought: &str,
        command: &str,
        usage: Option<StepUsage>,
    );

    /// Account one LLM call: fold into the task aggregate and the owning
    /// session's rolling stats. Returns the per-call record for the step
    /// trace.
    async fn record_usage(&self, model: &str, usage: &ChatUsage) -> StepUsage;

    /// The owning session's history entries, oldest first.
    async fn session_history(&self) -> Vec<String>;

    /// Append a summary of this (successful) task to the session's history.
    async fn append_history(&self, entry: &str);
}

/// Test double that collects everything it is handed.
#[derive(Default)]
pub struct CollectingHooks {
    pub steps: std::sync::Mutex<Vec<(AgentKind, u32, String, String, Option<StepUsage>)>>,
    pub usages: std::sync::Mutex<Vec<(String, ChatUsage)>>,
    pub history: std::sync::Mutex<Vec<String>>,
    pub seeded_history: Vec<String>,
}

impl CollectingHooks {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_history(seeded: Vec<String>) -> Self {
        Self {
            seeded_history: seeded,
            ..Self::default()
        }
    }
}

#[async_trait]
impl TaskHooks for CollectingHooks {
    async fn record_step(
        &self,
        agent: AgentKind,
        step: u32,
        thought: &str,
        command: &str,
        usage: Option<StepUsage>,
    ) {
        self.steps.lock().expect("steps lock").push((
            agent,
            step,
            thought.to_string(),
            command.to_string(),
            usage,
        ));
    }

    async fn record_usage(&self, model: &str, usage: &ChatUsage) -> StepUsage {
        self.usages
            .lock()
            .expect("usages lock")
            .push((model.to_string(), *usage));
        StepUsage {
            input_tokens: usage.prompt_tokens.saturating_sub(usage.cached_tokens),
            cached_tokens: usage.cached_tokens,
            output_tokens: usage.completion_tokens,
            cost: 0.0,
        }
    }

    async fn session_history(&self) -> Vec<String> {
        self.seeded_history.clone()
    }

    async fn append_history(&self, entry: &str) {
        self.history
            .lock()
            .expect("history lock")
            .push(entry.to_string());
    }
}
