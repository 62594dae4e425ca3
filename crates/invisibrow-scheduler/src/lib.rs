//! Bounded-concurrency task scheduler.
//!
//! Each submitted task runs as an independent tokio task gated by two
//! locks, in order: the owning session's mutex (a browser is not safe for
//! concurrent use), then a global semaphore bounding parallel work at `N`
//! (config, default 2). Admission is FIFO per the semaphore's queue.
//!
//! Every job owns a cancellation token. `stop` triggers it; a job cancelled
//! before starting finalizes as cancelled from the gate, one cancelled
//! mid-flight surfaces `cancelled` (never `failed`) from the planner. Every
//! terminal transition persists synchronously.

mod hooks;

pub use hooks::SchedulerHooks;

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use invisibrow_agent::planner::{PlanRequest, Planner};
use invisibrow_agent::TaskError;
use invisibrow_bus::EventBus;
use invisibrow_llm::TokenAccounting;
use invisibrow_store::{SessionStore, TaskStore};
use invisibrow_types::{InvisibrowError, LogLevel, Task, TaskStatus};

/// Scheduler configuration.
#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    /// Maximum tasks executing concurrently.
    pub max_concurrent: usize,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            max_concurrent: invisibrow_types::config::DEFAULT_MAX_CONCURRENT_TASKS,
        }
    }
}

struct Inner {
    tasks: Arc<TaskStore>,
    sessions: Arc<SessionStore>,
    accounting: Arc<TokenAccounting>,
    planner: Arc<Planner>,
    bus: Arc<EventBus>,
    max_concurrent: usize,
    semaphore: Arc<Semaphore>,
    running: Mutex<HashMap<String, CancellationToken>>,
    session_locks: Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>,
}

/// Submits, cancels, and lists tasks; owns all task runtime state.
#[derive(Clone)]
pub struct Scheduler {
    inner: Arc<Inner>,
}

impl Scheduler {
    pub fn new(
        config: SchedulerConfig,
        tasks: Arc<TaskStore>,
        sessions: Arc<SessionStore>,
        accounting: Arc<TokenAccounting>,
        planner: Arc<Planner>,
        bus: Arc<EventBus>,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                tasks,
                sessions,
                accounting,
                planner,
                bus,
                max_concurrent: config.max_concurrent.max(1),
                semaphore: Arc::new(Semaphore::new(config.max_concurrent.max(1))),
                running: Mutex::new(HashMap::new()),
                session_locks: Mutex::new(HashMap::new()),
            }),
        }
    }

    /// Create a pending task for the session, persist it, and enqueue its
    /// job. Returns the task id.
    pub fn submit(&self, session_id: &str, goal: &str) -> Result<String, InvisibrowError> {
        let session = self
            .inner
            .sessions
            .get(session_id)?
            .ok_or_else(|| InvisibrowError::Scheduler(format!("unknown session '{session_id}'")))?;

        let task = Task::new(session_id, goal);
        let task_id = task.id.clone();
        self.inner.tasks.insert(task)?;

        let token = CancellationToken::new();
        self.inner
            .running
            .lock()
            .map_err(|e| InvisibrowError::Scheduler(format!("running lock poisoned: {e}")))?
            .insert(task_id.clone(), token.clone());

        info!(task_id = %task_id, session_id = %session_id, "task submitted");
        self.inner.bus.log(LogLevel::Info, format!("task submitted: {goal}"));

        let inner = self.inner.clone();
        let job = JobContext {
            task_id: task_id.clone(),
            session_id: session_id.to_string(),
            goal: goal.to_string(),
            headless: session.headless,
            token,
        };
        tokio::spawn(async move { run_job(inner, job).await });

        Ok(task_id)
    }

    /// Signal cancellation for a task. Running jobs observe the token at
    /// their next suspension point; queued jobs short-circuit at the gate.
    /// Returns `false` if the task is not in flight.
    pub fn stop(&self, task_id: &str) -> Result<bool, InvisibrowError> {
        let running = self
            .inner
            .running
            .lock()
            .map_err(|e| InvisibrowError::Scheduler(format!("running lock poisoned: {e}")))?;
        match running.get(task_id) {
            Some(token) => {
                token.cancel();
                info!(task_id = %task_id, "cancellation requested");
                Ok(true)
            }
            None => Ok(false),
        }
    }

    /// All tasks, newest first.
    pub fn tasks(&self) -> Result<Vec<Task>, InvisibrowError> {
        self.inner.tasks.list()
    }

    /// Number of jobs currently holding an execution slot.
    pub fn in_flight(&self) -> usize {
        self.inner
            .max_concurrent
            .saturating_sub(self.inner.semaphore.available_permits())
    }
}

struct JobContext {
    task_id: String,
    session_id: String,
    goal: String,
    headless: bool,
    token: CancellationToken,
}

async fn run_job(inner: Arc<Inner>, job: JobContext) {
    let JobContext {
        task_id,
        session_id,
        goal,
        headless,
        token,
    } = job;

    // Per-session serialization first: a waiting same-session task must not
    // hold a global slot.
    let session_lock = {
        let mut locks = match inner.session_locks.lock() {
            Ok(locks) => locks,
            Err(e) => {
                error!(error = %e, "session lock table poisoned");
                finalize(&inner, &task_id, TaskStatus::Failed, None, None, Some("internal lock failure".into()));
                return;
            }
        };
        locks
            .entry(session_id.clone())
            .or_insert_with(|| Arc::new(tokio::sync::Mutex::new(())))
            .clone()
    };

    let _session_guard = tokio::select! {
        guard = session_lock.lock() => guard,
        _ = token.cancelled() => {
            finalize_cancelled(&inner, &task_id);
            return;
        }
    };

    let _permit = tokio::select! {
        permit = inner.semaphore.clone().acquire_owned() => match permit {
            Ok(permit) => permit,
            Err(_) => {
                finalize(&inner, &task_id, TaskStatus::Failed, None, None, Some("scheduler shut down".into()));
                return;
            }
        },
        _ = token.cancelled() => {
            finalize_cancelled(&inner, &task_id);
            return;
        }
    };

    // Gate: a task cancelled before start never runs.
    if token.is_cancelled() {
        finalize_cancelled(&inner, &task_id);
        return;
    }

    if let Err(e) = inner.tasks.update(&task_id, |task| {
        task.status = TaskStatus::Running;
    }) {
        error!(task_id = %task_id, error = %e, "failed to persist running transition");
    }
    info!(task_id = %task_id, "task running");

    let hooks = SchedulerHooks::new(
        task_id.clone(),
        session_id.clone(),
        inner.tasks.clone(),
        inner.sessions.clone(),
        inner.accounting.clone(),
    );
    let request = PlanRequest {
        task_id: task_id.clone(),
        session_id,
        goal,
        headless,
        cancel: token.clone(),
    };

    match inner.planner.run(&request, &hooks).await {
        Ok(outcome) => {
            inner
                .bus
                .log(LogLevel::Info, format!("task completed: {}", outcome.answer));
            finalize(
                &inner,
                &task_id,
                TaskStatus::Completed,
                Some(outcome.answer),
                outcome.url,
                None,
            );
        }
        Err(TaskError::Cancelled(message)) => {
            inner.bus.log(LogLevel::Warn, "task cancelled");
            finalize(&inner, &task_id, TaskStatus::Cancelled, None, None, Some(message));
        }
        Err(TaskError::Failed(message)) => {
            inner
                .bus
                .log(LogLevel::Error, format!("task failed: {message}"));
            finalize(&inner, &task_id, TaskStatus::Failed, None, None, Some(message));
        }
    }
}

fn finalize_cancelled(inner: &Arc<Inner>, task_id: &str) {
    finalize(
        inner,
        task_id,
        TaskStatus::Cancelled,
        None,
        None,
        Some("User aborted".into()),
    );
}

fn finalize(
    inner: &Arc<Inner>,
    task_id: &str,
    status: TaskStatus,
    result: Option<String>,
    url: Option<String>,
    error: Option<String>,
) {
    if let Err(e) = inner.tasks.finalize(task_id, status, result, url, error) {
        error!(task_id = %task_id, error = %e, "failed to persist terminal transition");
    }
    if let Ok(mut running) = inner.running.lock() {
        running.remove(task_id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use invisibrow_agent::planner::Planner;
    use invisibrow_browser::MockDriverFactory;
    use invisibrow_llm::ScriptedChatClient;
    use invisibrow_memory::MemoryStore;
    use invisibrow_types::ModelsConfig;
    use tempfile::TempDir;

    const KEYWORDS: &str = r#"{"keywords": ["alpha", "beta", "gamma"]}"#;

    struct Fixture {
        scheduler: Scheduler,
        sessions: Arc<SessionStore>,
        tasks: Arc<TaskStore>,
        _dir: TempDir,
    }

    fn fixture(script: Vec<&str>, max_concurrent: usize) -> Fixture {
        let dir = TempDir::new().unwrap();
        let sessions = Arc::new(SessionStore::load(dir.path().join("sessions.json")).unwrap());
        let tasks = Arc::new(TaskStore::load(dir.path().join("tasks.json")).unwrap());
        let memory = Arc::new(MemoryStore::open(&dir.path().join("memory.sqlite")).unwrap());
        let bus = EventBus::new(64);
        let accounting = Arc::new(TokenAccounting::new(sessions.clone(), bus.clone()));
        let chat = Arc::new(ScriptedChatClient::new(script));
        let planner = Arc::new(Planner::new(
            chat,
            memory,
            bus.clone(),
            MockDriverFactory::new(),
            ModelsConfig::default(),
        ));
        let scheduler = Scheduler::new(
            SchedulerConfig { max_concurrent },
            tasks.clone(),
            sessions.clone(),
            accounting,
            planner,
            bus,
        );
        Fixture {
            scheduler,
            sessions,
            tasks,
            _dir: dir,
        }
    }

    async fn wait_terminal(tasks: &TaskStore, task_id: &str) -> Task {
        for _ in 0..500 {
            if let Some(task) = tasks.get(task_id).unwrap() {
                if task.status.is_terminal() {
                    return task;
                }
            }
            tokio::time::sleep(std::time::Duration::from_millis(5)).await;
        }
        panic!("task {task_id} never reached a terminal status");
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn submit_runs_to_completion() {
        let f = fixture(
            vec![
                KEYWORDS,
                r#"{"thought": "trivial", "command": "finish", "input": {"answer": "done"}}"#,
            ],
            2,
        );
        let session = f.sessions.create("default", true).unwrap();

        let task_id = f.scheduler.submit(&session.id, "trivial goal").unwrap();
        let task = wait_terminal(&f.tasks, &task_id).await;

        assert_eq!(task.status, TaskStatus::Completed);
        assert_eq!(task.result.as_deref(), Some("done"));
        assert!(task.completed_at.is_some());
        // Keyword + plan usage both aggregated.
        assert_eq!(task.token_usage.calls, 2);
        // One planner step persisted.
        assert_eq!(task.steps.len(), 1);

        // Session stats rolled up.
        let stats = f.sessions.get(&session.id).unwrap().unwrap().stats;
        assert!(stats.tokens > 0);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn submit_unknown_session_rejected() {
        let f = fixture(vec![], 2);
        assert!(f.scheduler.submit("missing", "goal").is_err());
    }

    #[tokio::test]
    async fn stop_before_start_cancels_at_gate() {
        // Single-threaded runtime: the spawned job cannot run until this
        // test awaits, so the stop always lands before the gate.
        let f = fixture(vec![], 1);
        let session = f.sessions.create("default", true).unwrap();

        let task_id = f.scheduler.submit(&session.id, "never runs").unwrap();
        assert!(f.scheduler.stop(&task_id).unwrap());

        let task = wait_terminal(&f.tasks, &task_id).await;
        assert_eq!(task.status, TaskStatus::Cancelled);
        assert_eq!(task.error.as_deref(), Some("User aborted"));
        // The planner was never reached.
        assert!(task.steps.is_empty());
        assert_eq!(task.token_usage.calls, 0);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn stop_unknown_task_reports_false() {
        let f = fixture(vec![], 2);
        assert!(!f.scheduler.stop("missing").unwrap());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn tasks_listed_newest_first() {
        let f = fixture(
            vec![
                KEYWORDS,
                r#"{"thought": "a", "command": "finish", "input": {"answer": "1"}}"#,
                KEYWORDS,
                r#"{"thought": "b", "command": "finish", "input": {"answer": "2"}}"#,
            ],
            1,
        );
        let session = f.sessions.create("default", true).unwrap();
        let first = f.scheduler.submit(&session.id, "first").unwrap();
        let second = f.scheduler.submit(&session.id, "second").unwrap();
        wait_terminal(&f.tasks, &first).await;
        wait_terminal(&f.tasks, &second).await;

        let listed = f.scheduler.tasks().unwrap();
        assert_eq!(listed.len(), 2);
        assert_eq!(listed[0].id, second);
        assert_eq!(listed[1].id, first);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn failed_task_records_error() {
        let f = fixture(vec![KEYWORDS, "not json"], 2);
        let session = f.sessions.create("default", true).unwrap();
        let task_id = f.scheduler.submit(&session.id, "goal").unwrap();

        let task = wait_terminal(&f.tasks, &task_id).await;
        assert_eq!(task.status, TaskStatus::Failed);
        assert!(task.error.unwrap().contains("malformed"));
    }
}
