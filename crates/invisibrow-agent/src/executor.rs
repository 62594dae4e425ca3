//! One-step browser action loop.
//!
//! Each iteration: snapshot the page, let the watchdog screen it, ask the
//! decision LLM for one action, perform it, and let the page settle. The
//! loop ends by answering (which runs the summarization call, the only
//! place raw page content is compressed for the planner), by intervention,
//! by cancellation, or by exhausting the step budget.
//!
//! Driver faults during an action are logged and the loop continues; only a
//! snapshot that fails twice in a row aborts the task.

use std::sync::Arc;
use std::time::Duration;

use rand::Rng;
use serde_json::json;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use invisibrow_browser::{
    BrowserResult, PageDriver, PageSnapshot, SEARCH_NAVIGATION_TIMEOUT,
};
use invisibrow_llm::{ChatClient, ChatScope};
use invisibrow_types::{AgentKind, ChatMessage, ChatRequest, StepUsage};

use crate::hooks::TaskHooks;
use crate::prompts::{self, ExecAction, ExecDecision};
use crate::watchdog::{Watchdog, WatchdogVerdict};
use crate::{sleep_cancellable, TaskError, MAX_STEPS};

/// Goal string that switches the executor into manual mode: the browser is
/// held open for the user instead of being driven.
pub const MANUAL_LOGIN_GOAL: &str = "MANUAL_LOGIN";

/// How long manual mode holds the browser open.
pub const MANUAL_SESSION_SECS: u64 = 300;

/// Summary returned when manual mode ends naturally.
pub const MANUAL_SESSION_SUMMARY: &str = "manual session ended";

/// Home page of the default search engine.
const SEARCH_ENGINE_HOME: &str = "https://www.google.com";

/// Seconds for the explicit `wait` action.
const WAIT_ACTION_SECS: u64 = 5;

/// How many trailing history lines the watchdog sees.
const WATCHDOG_TAIL: usize = 5;

/// Pick a jittered duration in `[min_ms, max_ms]`.
fn jitter_ms(min_ms: u64, max_ms: u64) -> Duration {
    let ms = rand::thread_rng().gen_range(min_ms..=max_ms);
    Duration::from_millis(ms)
}

/// What an executor run produced for the planner.
#[derive(Debug, Clone)]
pub enum ExecOutcome {
    Success(BrowserResult),
    Intervention { reason: String },
}

/// Drives one session's browser, one action per LLM decision.
pub struct Executor {
    chat: Arc<dyn ChatClient>,
    watchdog: Arc<Watchdog>,
    driver: Arc<dyn PageDriver>,
    model: String,
    scope: ChatScope,
    watchdog_scope: ChatScope,
}

impl Executor {
    pub fn new(
        chat: Arc<dyn ChatClient>,
        watchdog: Arc<Watchdog>,
        driver: Arc<dyn PageDriver>,
        model: String,
        session_id: &str,
    ) -> Self {
        Self {
            chat,
            watchdog,
            driver,
            model,
            scope: ChatScope::new(session_id, "executor"),
            watchdog_scope: ChatScope::new(session_id, "watchdog"),
        }
    }

    /// The session's driver, shared with the planner for the intervention
    /// handshake's headless toggle.
    pub fn driver(&self) -> Arc<dyn PageDriver> {
        self.driver.clone()
    }

    /// Run the action loop for one executor goal.
    pub async fn run(
        &self,
        goal: &str,
        headless: bool,
        cancel: &CancellationToken,
        hooks: &dyn TaskHooks,
    ) -> Result<ExecOutcome, TaskError> {
        self.driver
            .ensure_started(headless)
            .await
            .map_err(|e| TaskError::Failed(e.to_string()))?;

        if goal == MANUAL_LOGIN_GOAL {
            return self.manual_mode(cancel).await;
        }

        let mut history: Vec<String> = Vec::new();
        for step in 1..=MAX_STEPS {
            if cancel.is_cancelled() {
                return Err(TaskError::aborted());
            }

            let snapshot = self.snapshot_with_retry().await?;

            let tail: Vec<String> = history
                .iter()
                .rev()
                .take(WATCHDOG_TAIL)
                .rev()
                .cloned()
                .collect();
            let (verdict, watchdog_usage) = self
                .watchdog
                .check(&self.watchdog_scope, goal, &snapshot, &tail, hooks)
                .await;
            if let WatchdogVerdict::Intervention { reason } = verdict {
                hooks
                    .record_step(AgentKind::Executor, step, &reason, "intervention", watchdog_usage)
                    .await;
                return Ok(ExecOutcome::Intervention { reason });
            }

            let request = ChatRequest::new(
                self.model.clone(),
                vec![
                    ChatMessage::system(prompts::executor_system_prompt(goal, &history)),
                    ChatMessage::user(snapshot.to_prompt_text()),
                ],
            )
            .with_schema(prompts::executor_schema());
            let response = self
                .chat
                .chat(&self.scope, request)
                .await
                .map_err(|e| TaskError::Failed(e.to_string()))?;
            let decision_usage = hooks.record_usage(&response.model, &response.usage).await;
            let decision = prompts::parse_exec_decision(&response.content)
                .map_err(|e| TaskError::Failed(e.to_string()))?;

            let merged = merge_usage(watchdog_usage, decision_usage);
            let command = match &decision.param {
                Some(param) => format!("{} {param}", decision.action.as_str()),
                None => decision.action.as_str().to_string(),
            };
            hooks
                .record_step(AgentKind::Executor, step, &decision.thought, &command, Some(merged))
                .await;
            history.push(format!("{step}: {}", decision.thought));

            if matches!(decision.action, ExecAction::Finish | ExecAction::Answer) {
                return self.summarize(goal, &snapshot, decision.answer.as_deref(), hooks).await;
            }

            self.perform(&decision, cancel).await?;

            if !sleep_cancellable(jitter_ms(2000, 4000), cancel).await {
                return Err(TaskError::aborted());
            }
        }
        Err(TaskError::max_steps())
    }

    /// Hold the browser open for the user, then report the session ended.
    async fn manual_mode(&self, cancel: &CancellationToken) -> Result<ExecOutcome, TaskError> {
        info!(secs = MANUAL_SESSION_SECS, "manual login mode: holding browser open");
        if !sleep_cancellable(Duration::from_secs(MANUAL_SESSION_SECS), cancel).await {
            return Err(TaskError::aborted());
        }
        let url = self.driver.current_url().await.unwrap_or_default();
        Ok(ExecOutcome::Success(BrowserResult {
            summary: MANUAL_SESSION_SUMMARY.to_string(),
            extracted: json!({}),
            url,
        }))
    }

    /// Read the page state, retrying once on a driver fault.
    async fn snapshot_with_retry(&self) -> Result<PageSnapshot, TaskError> {
        match self.driver.snapshot().await {
            Ok(snapshot) => Ok(snapshot),
            Err(first) => {
                warn!(error = %first, "snapshot failed; retrying once");
                self.driver
                    .snapshot()
                    .await
                    .map_err(|e| TaskError::Failed(format!("page state unavailable: {e}")))
            }
        }
    }

    /// Execute one decided action. Driver faults are logged and absorbed so
    /// the loop can try again from a fresh snapshot; only cancellation
    /// propagates.
    async fn perform(
        &self,
        decision: &ExecDecision,
        cancel: &CancellationToken,
    ) -> Result<(), TaskError> {
        let param = decision.param.as_deref().unwrap_or("");
        let result = match decision.action {
            ExecAction::Goto => self.driver.goto(param).await,
            ExecAction::Search => return self.search(param, cancel).await,
            ExecAction::Click => match param.parse::<usize>() {
                Ok(index) => self.driver.click(index).await,
                Err(_) => {
                    warn!(param = %param, "click target is not a snapshot index");
                    Ok(())
                }
            },
            ExecAction::Type => return self.type_into(param, cancel).await,
            ExecAction::Wait => {
                if !sleep_cancellable(Duration::from_secs(WAIT_ACTION_SECS), cancel).await {
                    return Err(TaskError::aborted());
                }
                Ok(())
            }
            ExecAction::Finish | ExecAction::Answer => Ok(()),
        };
        if let Err(e) = result {
            warn!(action = decision.action.as_str(), error = %e, "action failed; continuing");
        }
        Ok(())
    }

    /// `type` takes `"index:text"`: focus the element, insert the text via
    /// the driver primitive, and submit with Enter.
    async fn type_into(&self, param: &str, cancel: &CancellationToken) -> Result<(), TaskError> {
        if cancel.is_cancelled() {
            return Err(TaskError::aborted());
        }
        let Some((index, text)) = param.split_once(':') else {
            warn!(param = %param, "type parameter is not in index:text form");
            return Ok(());
        };
        let Ok(index) = index.trim().parse::<usize>() else {
            warn!(param = %param, "type target is not a snapshot index");
            return Ok(());
        };
        let typed = async {
            self.driver.focus(index).await?;
            self.driver.insert_text(index, text).await?;
            self.driver.press_enter().await
        }
        .await;
        if let Err(e) = typed {
            warn!(error = %e, "type action failed; continuing");
        }
        Ok(())
    }

    /// Simulate a human search: open the engine home, find the search box,
    /// type the query with per-character jitter, pause, submit, and wait for
    /// the results navigation. Any fault falls back to direct query-string
    /// navigation.
    async fn search(&self, query: &str, cancel: &CancellationToken) -> Result<(), TaskError> {
        match self.human_search(query, cancel).await {
            Ok(()) => Ok(()),
            Err(TaskError::Cancelled(msg)) => Err(TaskError::Cancelled(msg)),
            Err(e) => {
                warn!(error = %e, "human-like search failed; falling back to query URL");
                let encoded: String =
                    url::form_urlencoded::byte_serialize(query.as_bytes()).collect();
                if let Err(e) = self
                    .driver
                    .goto(&format!("{SEARCH_ENGINE_HOME}/search?q={encoded}"))
                    .await
                {
                    warn!(error = %e, "search fallback navigation failed; continuing");
                }
                Ok(())
            }
        }
    }

    async fn human_search(&self, query: &str, cancel: &CancellationToken) -> Result<(), TaskError> {
        self.driver
            .goto(SEARCH_ENGINE_HOME)
            .await
            .map_err(|e| TaskError::Failed(e.to_string()))?;
        let snapshot = self
            .driver
            .snapshot()
            .await
            .map_err(|e| TaskError::Failed(e.to_string()))?;

        let input = snapshot
            .interactive_elements
            .iter()
            .find(|e| {
                let tag = e.tag.to_lowercase();
                tag == "input" || tag == "textarea" || e.text.to_lowercase().contains("search")
            })
            .ok_or_else(|| TaskError::Failed("no search input found on engine home".into()))?;

        self.driver
            .focus(input.index)
            .await
            .map_err(|e| TaskError::Failed(e.to_string()))?;
        self.driver
            .click(input.index)
            .await
            .map_err(|e| TaskError::Failed(e.to_string()))?;

        for c in query.chars() {
            self.driver
                .type_char(c)
                .await
                .map_err(|e| TaskError::Failed(e.to_string()))?;
            if !sleep_cancellable(jitter_ms(150, 350), cancel).await {
                return Err(TaskError::aborted());
            }
        }
        if !sleep_cancellable(jitter_ms(500, 1000), cancel).await {
            return Err(TaskError::aborted());
        }
        self.driver
            .press_enter()
            .await
            .map_err(|e| TaskError::Failed(e.to_string()))?;
        if let Err(e) = self.driver.wait_for_navigation(SEARCH_NAVIGATION_TIMEOUT).await {
            warn!(error = %e, "search results navigation timed out");
        }
        Ok(())
    }

    /// Compress the final page + answer into the planner-facing result.
    /// Non-fatal: any fault falls back to the raw answer.
    async fn summarize(
        &self,
        goal: &str,
        snapshot: &PageSnapshot,
        answer: Option<&str>,
        hooks: &dyn TaskHooks,
    ) -> Result<ExecOutcome, TaskError> {
        let url = self
            .driver
            .current_url()
            .await
            .unwrap_or_else(|_| snapshot.url.clone());
        let fallback = || BrowserResult {
            summary: answer
                .filter(|a| !a.is_empty())
                .unwrap_or("task complete")
                .to_string(),
            extracted: json!({}),
            url: url.clone(),
        };

        let request = ChatRequest::new(
            self.model.clone(),
            vec![ChatMessage::user(prompts::summarize_prompt(
                goal,
                &snapshot.to_prompt_text(),
                answer.unwrap_or(""),
            ))],
        )
        .with_schema(prompts::summarize_schema());

        let result = match self.chat.chat(&self.scope, request).await {
            Ok(response) => {
                hooks.record_usage(&response.model, &response.usage).await;
                match prompts::parse_summarization(&response.content) {
                    Ok(summarization) => BrowserResult {
                        summary: summarization.summary,
                        extracted: summarization.extracted,
                        url,
                    },
                    Err(e) => {
                        warn!(error = %e, "summarization malformed; using raw answer");
                        fallback()
                    }
                }
            }
            Err(e) => {
                warn!(error = %e, "summarization call failed; using raw answer");
                fallback()
            }
        };
        Ok(ExecOutcome::Success(result))
    }
}

fn merge_usage(a: Option<StepUsage>, b: StepUsage) -> StepUsage {
    match a {
        Some(a) => StepUsage {
            input_tokens: a.input_tokens + b.input_tokens,
            cached_tokens: a.cached_tokens + b.cached_tokens,
            output_tokens: a.output_tokens + b.output_tokens,
            cost: a.cost + b.cost,
        },
        None => b,
    }
}
