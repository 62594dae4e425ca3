//! Task records with step traces and token usage aggregates.
//!
//! Tasks follow a strict state machine: Pending -> Running ->
//! Completed|Failed, with Cancelled as a terminal state reachable from
//! Pending or Running. A task's terminal status is set at most once, and
//! `completed_at` is present exactly when the status is terminal.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Task lifecycle status.
///
/// Valid transitions:
/// - Pending -> Running (worker picked the task up)
/// - Pending -> Cancelled (stopped before execution)
/// - Running -> Completed (planner reached `finish`)
/// - Running -> Failed (budget overrun, LLM fault, driver fault)
/// - Running -> Cancelled (stopped mid-flight)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Pending,
    Running,
    Completed,
    Failed,
    Cancelled,
}

impl TaskStatus {
    /// Whether this status is a terminal state (no further transitions).
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            TaskStatus::Completed | TaskStatus::Failed | TaskStatus::Cancelled
        )
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TaskStatus::Pending => write!(f, "pending"),
            TaskStatus::Running => write!(f, "running"),
            TaskStatus::Completed => write!(f, "completed"),
            TaskStatus::Failed => write!(f, "failed"),
            TaskStatus::Cancelled => write!(f, "cancelled"),
        }
    }
}

/// Which agent produced a step.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentKind {
    Planner,
    Executor,
}

impl AgentKind {
    /// Stable string form, used in transcript paths and step records.
    pub fn as_str(&self) -> &'static str {
        match self {
            AgentKind::Planner => "planner",
            AgentKind::Executor => "executor",
        }
    }
}

impl fmt::Display for AgentKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Token usage and estimated cost of a single LLM call.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct StepUsage {
    /// Non-cached prompt tokens.
    pub input_tokens: u64,
    /// Cached prompt tokens (billed at a reduced rate).
    pub cached_tokens: u64,
    /// Completion tokens.
    pub output_tokens: u64,
    /// Estimated cost in USD.
    pub cost: f64,
}

/// One unit of agent work within a task. Steps are append-only and
/// persisted eagerly as they are produced.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskStep {
    /// Which agent produced this step.
    pub agent: AgentKind,
    /// 1-based step index within that agent's loop.
    pub step: u32,
    /// The agent's reasoning for this step.
    pub thought: String,
    /// The command or action the agent chose.
    pub command: String,
    /// When the step was recorded.
    pub timestamp: DateTime<Utc>,
    /// Usage of the LLM call(s) behind this step, if any.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub token_usage: Option<StepUsage>,
}

/// Per-task aggregate of token usage across all LLM calls.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct TaskUsage {
    pub input_tokens: u64,
    pub cached_tokens: u64,
    pub output_tokens: u64,
    pub cost: f64,
    /// Number of LLM calls recorded.
    pub calls: u64,
}

impl TaskUsage {
    /// Fold one call's usage into the aggregate.
    pub fn add(&mut self, usage: &StepUsage) {
        self.input_tokens += usage.input_tokens;
        self.cached_tokens += usage.cached_tokens;
        self.output_tokens += usage.output_tokens;
        self.cost += usage.cost;
        self.calls += 1;
    }
}

/// A unit of work: one natural-language goal driven against one session.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    /// Unique task identifier.
    pub id: String,
    /// The session whose browser profile this task runs against.
    pub session_id: String,
    /// The user's natural-language goal.
    pub goal: String,
    /// Current lifecycle status.
    pub status: TaskStatus,
    /// Final answer on completion.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<String>,
    /// Last page URL observed when the task finished.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    /// Failure or cancellation message.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// When the task was submitted.
    pub created_at: DateTime<Utc>,
    /// When the task reached a terminal status.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
    /// Ordered step trace.
    #[serde(default)]
    pub steps: Vec<TaskStep>,
    /// Aggregate token usage across all LLM calls in this task.
    #[serde(default)]
    pub token_usage: TaskUsage,
}

impl Task {
    /// Create a new pending task.
    pub fn new(session_id: impl Into<String>, goal: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            session_id: session_id.into(),
            goal: goal.into(),
            status: TaskStatus::Pending,
            result: None,
            url: None,
            error: None,
            created_at: Utc::now(),
            completed_at: None,
            steps: Vec::new(),
            token_usage: TaskUsage::default(),
        }
    }

    /// Move the task to a terminal status, stamping `completed_at`.
    ///
    /// Returns `false` (and changes nothing) if the task is already terminal.
    pub fn finalize(&mut self, status: TaskStatus) -> bool {
        if self.status.is_terminal() || !status.is_terminal() {
            return false;
        }
        self.status = status;
        self.completed_at = Some(Utc::now());
        true
    }
}
