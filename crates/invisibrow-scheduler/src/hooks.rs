//! The scheduler's [`TaskHooks`] implementation.
//!
//! Binds one in-flight task to its durable records: steps append to the
//! persisted task, usage folds into both the task aggregate and the owning
//! session's rolling stats, and history reads/writes go to the session
//! store. Storage errors are logged, never surfaced to the agents.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use tracing::error;

use invisibrow_agent::hooks::TaskHooks;
use invisibrow_llm::{estimate_cost, TokenAccounting};
use invisibrow_store::{SessionStore, TaskStore};
use invisibrow_types::{AgentKind, ChatUsage, StepUsage, TaskStep};

pub struct SchedulerHooks {
    task_id: String,
    session_id: String,
    tasks: Arc<TaskStore>,
    sessions: Arc<SessionStore>,
    accounting: Arc<TokenAccounting>,
}

impl SchedulerHooks {
    pub fn new(
        task_id: String,
        session_id: String,
        tasks: Arc<TaskStore>,
        sessions: Arc<SessionStore>,
        accounting: Arc<TokenAccounting>,
    ) -> Self {
        Self {
            task_id,
            session_id,
            tasks,
            sessions,
            accounting,
        }
    }
}

#[async_trait]
impl TaskHooks for SchedulerHooks {
    async fn record_step(
        &self,
        agent: AgentKind,
        step: u32,
        thought: &str,
        command: &str,
        usage: Option<StepUsage>,
    ) {
        let record = TaskStep {
            agent,
            step,
            thought: thought.to_string(),
            command: command.to_string(),
            timestamp: Utc::now(),
            token_usage: usage,
        };
        if let Err(e) = self.tasks.update(&self.task_id, |task| {
            task.steps.push(record);
        }) {
            error!(task_id = %self.task_id, error = %e, "failed to persist step");
        }
    }

    async fn record_usage(&self, model: &str, usage: &ChatUsage) -> StepUsage {
        let step_usage = match self.accounting.record(&self.session_id, model, usage) {
            Ok(step_usage) => step_usage,
            Err(e) => {
                error!(session_id = %self.session_id, error = %e, "failed to account usage");
                StepUsage {
                    input_tokens: usage.prompt_tokens.saturating_sub(usage.cached_tokens),
                    cached_tokens: usage.cached_tokens,
                    output_tokens: usage.completion_tokens,
                    cost: estimate_cost(model, usage),
                }
            }
        };
        if let Err(e) = self.tasks.update(&self.task_id, |task| {
            task.token_usage.add(&step_usage);
        }) {
            error!(task_id = %self.task_id, error = %e, "failed to persist task usage");
        }
        step_usage
    }

    async fn session_history(&self) -> Vec<String> {
        self.sessions
            .session_history(&self.session_id)
            .unwrap_or_else(|e| {
                error!(session_id = %self.session_id, error = %e, "failed to read session history");
                Vec::new()
            })
    }

    async fn append_history(&self, entry: &str) {
        if let Err(e) = self.sessions.append_history(&self.session_id, entry) {
            error!(session_id = %self.session_id, error = %e, "failed to append session history");
        }
    }
}
