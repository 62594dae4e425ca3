//! Goal decomposition loop driving the executor.
//!
//! The planner never sees a page snapshot: its world is the goal, recalled
//! memory, the session's history, and the executor's summarized results.
//! Each iteration asks the plan-step LLM for one command (`browser`,
//! `finish`, `wait`); `finish` persists the task summary to long-term
//! memory and appends it to the session history.

use std::sync::Arc;

use chrono::Utc;
use serde_json::json;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use invisibrow_browser::{BrowserResult, DriverFactory};
use invisibrow_bus::EventBus;
use invisibrow_llm::{ChatClient, ChatScope};
use invisibrow_memory::{MemoryRecord, MemoryStore};
use invisibrow_types::{AgentKind, ChatMessage, ChatRequest, CoreEvent, ModelsConfig};

use crate::executor::{ExecOutcome, Executor, MANUAL_LOGIN_GOAL};
use crate::hooks::TaskHooks;
use crate::prompts::{self, PlanCommand};
use crate::watchdog::Watchdog;
use crate::{sleep_cancellable, TaskError, TaskOutcome, MAX_STEPS};

/// Seconds the `wait` command pauses before re-planning.
const WAIT_COMMAND_SECS: u64 = 5;

/// One planner invocation: everything the scheduler knows about the task.
pub struct PlanRequest {
    pub task_id: String,
    pub session_id: String,
    pub goal: String,
    /// The session's preferred headless mode, restored after interventions.
    pub headless: bool,
    pub cancel: CancellationToken,
}

/// Plans one task at a time against one session.
///
/// The planner lazily creates its executor on the first `browser` command;
/// the executor (and the driver it holds) is exclusively owned for the
/// duration of the task.
pub struct Planner {
    chat: Arc<dyn ChatClient>,
    memory: Arc<MemoryStore>,
    bus: Arc<EventBus>,
    drivers: Arc<dyn DriverFactory>,
    models: ModelsConfig,
}

impl Planner {
    pub fn new(
        chat: Arc<dyn ChatClient>,
        memory: Arc<MemoryStore>,
        bus: Arc<EventBus>,
        drivers: Arc<dyn DriverFactory>,
        models: ModelsConfig,
    ) -> Self {
        Self {
            chat,
            memory,
            bus,
            drivers,
            models,
        }
    }

    /// Run the planning loop to completion.
    pub async fn run(
        &self,
        request: &PlanRequest,
        hooks: &dyn TaskHooks,
    ) -> Result<TaskOutcome, TaskError> {
        if request.goal == MANUAL_LOGIN_GOAL {
            return self.manual_login(request, hooks).await;
        }

        let scope = ChatScope::new(request.session_id.clone(), "planner");

        // Recall: keywords from the goal, then memory hits they match.
        let keywords = self.extract_keywords(&scope, request, hooks).await?;
        let recalled = self.memory.search(&keywords).unwrap_or_else(|e| {
            warn!(error = %e, "memory recall failed; planning without it");
            Vec::new()
        });
        let memory_block = prompts::format_memory_block(&recalled);
        let history_block = prompts::format_history_block(&hooks.session_history().await);

        let mut executor: Option<Executor> = None;
        let mut last_result: Option<BrowserResult> = None;
        let mut trace: Vec<String> = Vec::new();
        let mut step: u32 = 1;

        while step <= MAX_STEPS {
            if request.cancel.is_cancelled() {
                return Err(TaskError::aborted());
            }

            let user_message = match &last_result {
                Some(result) => format!(
                    "Browser result:\n{}",
                    serde_json::to_string_pretty(result)
                        .unwrap_or_else(|_| result.summary.clone())
                ),
                None => prompts::NO_BROWSER_RESULT_SENTINEL.to_string(),
            };
            let plan_request = ChatRequest::new(
                self.models.planner_agent.clone(),
                vec![
                    ChatMessage::system(prompts::planner_system_prompt(
                        &request.goal,
                        &memory_block,
                        &history_block,
                        &trace,
                    )),
                    ChatMessage::user(user_message),
                ],
            )
            .with_schema(prompts::planner_schema());

            let response = self
                .chat
                .chat(&scope, plan_request)
                .await
                .map_err(|e| TaskError::Failed(e.to_string()))?;
            let usage = hooks.record_usage(&response.model, &response.usage).await;
            let decision = prompts::parse_plan_decision(&response.content)
                .map_err(|e| TaskError::Failed(e.to_string()))?;

            let command = match decision.command {
                PlanCommand::Browser => format!(
                    "browser {}",
                    decision.input.task.as_deref().unwrap_or(&request.goal)
                ),
                other => other.as_str().to_string(),
            };
            hooks
                .record_step(AgentKind::Planner, step, &decision.thought, &command, Some(usage))
                .await;
            trace.push(format!("{step}: {} -> {command}", decision.thought));

            match decision.command {
                PlanCommand::Finish => {
                    let answer = decision
                        .input
                        .answer
                        .filter(|a| !a.is_empty())
                        .or_else(|| last_result.as_ref().map(|r| r.summary.clone()))
                        .unwrap_or_else(|| "task complete".to_string());
                    let url = last_result.as_ref().map(|r| r.url.clone());
                    let extracted = last_result
                        .as_ref()
                        .map(|r| r.extracted.clone())
                        .unwrap_or_else(|| json!({}));
                    self.finish(request, &keywords, &answer, extracted, hooks).await;
                    return Ok(TaskOutcome { answer, url });
                }
                PlanCommand::Wait => {
                    if !sleep_cancellable(
                        std::time::Duration::from_secs(WAIT_COMMAND_SECS),
                        &request.cancel,
                    )
                    .await
                    {
                        return Err(TaskError::aborted());
                    }
                    step += 1;
                }
                PlanCommand::Browser => {
                    let executor_goal = decision
                        .input
                        .task
                        .clone()
                        .unwrap_or_else(|| request.goal.clone());
                    if executor.is_none() {
                        executor = Some(self.build_executor(request).await?);
                    }
                    let exec = executor.as_ref().expect("executor just created");
                    match exec
                        .run(&executor_goal, request.headless, &request.cancel, hooks)
                        .await?
                    {
                        ExecOutcome::Success(result) => {
                            last_result = Some(result);
                            step += 1;
                        }
                        ExecOutcome::Intervention { reason } => {
                            // This iteration does not count against the
                            // budget; the same logical step retries after
                            // the human resolves the block.
                            self.intervention_handshake(request, exec, &reason).await?;
                        }
                    }
                }
            }
        }
        Err(TaskError::max_steps())
    }

    /// One keyword-extraction LLM call over the goal.
    async fn extract_keywords(
        &self,
        scope: &ChatScope,
        request: &PlanRequest,
        hooks: &dyn TaskHooks,
    ) -> Result<Vec<String>, TaskError> {
        let chat_request = ChatRequest::new(
            self.models.planner_agent.clone(),
            vec![ChatMessage::user(prompts::keyword_extraction_prompt(
                &request.goal,
            ))],
        )
        .with_schema(prompts::keyword_schema());
        let response = self
            .chat
            .chat(scope, chat_request)
            .await
            .map_err(|e| TaskError::Failed(e.to_string()))?;
        hooks.record_usage(&response.model, &response.usage).await;
        let extraction = prompts::parse_keywords(&response.content)
            .map_err(|e| TaskError::Failed(e.to_string()))?;
        Ok(extraction
            .keywords
            .into_iter()
            .map(|k| k.trim().to_lowercase())
            .filter(|k| !k.is_empty())
            .collect())
    }

    async fn build_executor(&self, request: &PlanRequest) -> Result<Executor, TaskError> {
        let driver = self
            .drivers
            .acquire(&request.session_id, request.headless)
            .await
            .map_err(|e| TaskError::Failed(e.to_string()))?;
        let watchdog = Arc::new(Watchdog::new(
            self.memory.clone(),
            self.chat.clone(),
            self.models.watchdog_agent.clone(),
        ));
        Ok(Executor::new(
            self.chat.clone(),
            watchdog,
            driver,
            self.models.executor_agent.clone(),
            &request.session_id,
        ))
    }

    /// The intervention handshake: surface the block, hand the browser to
    /// the user (headed mode), and wait for resolution or cancellation.
    async fn intervention_handshake(
        &self,
        request: &PlanRequest,
        executor: &Executor,
        reason: &str,
    ) -> Result<(), TaskError> {
        let driver = executor.driver();
        let url = driver.current_url().await.unwrap_or_default();

        // Subscribe before publishing so a fast resolver cannot be missed.
        let mut rx = self.bus.subscribe();
        self.bus.publish(CoreEvent::VerificationNeeded {
            session_id: request.session_id.clone(),
            reason: reason.to_string(),
            url,
        });
        info!(session_id = %request.session_id, reason = %reason, "waiting for human verification");

        if let Err(e) = driver.set_headless(false).await {
            warn!(error = %e, "failed to switch browser to headed mode");
        }

        let resolved = loop {
            tokio::select! {
                _ = request.cancel.cancelled() => break false,
                received = rx.recv() => match received {
                    Ok(CoreEvent::VerificationResolved { session_id })
                        if session_id == request.session_id => break true,
                    Ok(_) => {}
                    Err(tokio::sync::broadcast::error::RecvError::Lagged(missed)) => {
                        warn!(missed, "verification listener lagged");
                    }
                    Err(tokio::sync::broadcast::error::RecvError::Closed) => break false,
                },
            }
        };
        if !resolved {
            return Err(TaskError::verification_cancelled());
        }

        if let Err(e) = driver.set_headless(request.headless).await {
            warn!(error = %e, "failed to restore preferred headless mode");
        }
        info!(session_id = %request.session_id, "verification resolved; resuming");
        Ok(())
    }

    /// `MANUAL_LOGIN`: hand the session's browser to the user via the
    /// executor's manual mode, then finish with its sentinel summary.
    async fn manual_login(
        &self,
        request: &PlanRequest,
        hooks: &dyn TaskHooks,
    ) -> Result<TaskOutcome, TaskError> {
        let executor = self.build_executor(request).await?;
        match executor
            .run(MANUAL_LOGIN_GOAL, false, &request.cancel, hooks)
            .await?
        {
            ExecOutcome::Success(result) => {
                let url = if result.url.is_empty() {
                    None
                } else {
                    Some(result.url.clone())
                };
                self.finish(request, &[], &result.summary, result.extracted.clone(), hooks)
                    .await;
                Ok(TaskOutcome {
                    answer: result.summary,
                    url,
                })
            }
            ExecOutcome::Intervention { reason } => Err(TaskError::Failed(format!(
                "unexpected intervention during manual login: {reason}"
            ))),
        }
    }

    /// Persist the success memory and append the session-history entry.
    async fn finish(
        &self,
        request: &PlanRequest,
        keywords: &[String],
        answer: &str,
        extracted: serde_json::Value,
        hooks: &dyn TaskHooks,
    ) {
        let record = MemoryRecord {
            id: request.task_id.clone(),
            goal: request.goal.clone(),
            keywords: keywords.to_vec(),
            summary: answer.to_string(),
            artifacts: extracted,
            status: "success".to_string(),
            timestamp: Utc::now(),
        };
        if let Err(e) = self.memory.save(&record) {
            warn!(error = %e, task_id = %request.task_id, "failed to persist task memory");
        }
        let entry = format!(
            "{} goal: {} / result: {}",
            Utc::now().format("%Y-%m-%d %H:%M"),
            request.goal,
            answer
        );
        hooks.append_history(&entry).await;
        info!(task_id = %request.task_id, "task finished");
    }
}
