//! Shared helpers for integration tests.
//!
//! Each integration test file compiles common/ as its own module, so not
//! every helper is used in every file.
#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tempfile::TempDir;

use invisibrow::agent::planner::Planner;
use invisibrow::browser::{normalize_snapshot, MockDriverFactory, PageSnapshot};
use invisibrow::bus::EventBus;
use invisibrow::llm::{ChatClient, ChatScope, ScriptedChatClient, TokenAccounting};
use invisibrow::memory::MemoryStore;
use invisibrow::scheduler::{Scheduler, SchedulerConfig};
use invisibrow::store::{SessionStore, TaskStore};
use invisibrow::types::{
    ChatRequest, ChatResponse, InvisibrowError, ModelsConfig, Task, TaskStatus,
};

/// Scripted response for a clear watchdog check.
pub const CLEAR: &str = r#"{"isStuck": false, "needsIntervention": false}"#;

/// Scripted response for keyword extraction.
pub const KEYWORDS: &str = r#"{"keywords": ["alpha", "beta", "gamma"]}"#;

/// Routes chat calls to a per-session script, so concurrent tasks in
/// different sessions never interleave their queues.
pub struct RoutingChatClient {
    scripts: Mutex<HashMap<String, Arc<ScriptedChatClient>>>,
}

impl RoutingChatClient {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            scripts: Mutex::new(HashMap::new()),
        })
    }

    pub fn register(&self, session_id: &str, script: Vec<&str>) {
        self.scripts
            .lock()
            .expect("scripts lock")
            .insert(session_id.to_string(), Arc::new(ScriptedChatClient::new(script)));
    }
}

#[async_trait]
impl ChatClient for RoutingChatClient {
    async fn chat(
        &self,
        scope: &ChatScope,
        request: ChatRequest,
    ) -> Result<ChatResponse, InvisibrowError> {
        let client = self
            .scripts
            .lock()
            .expect("scripts lock")
            .get(&scope.session_id)
            .cloned()
            .ok_or_else(|| {
                InvisibrowError::Llm(format!("no script for session '{}'", scope.session_id))
            })?;
        client.chat(scope, request).await
    }
}

/// A fully wired core over temporary storage.
pub struct Core {
    pub scheduler: Scheduler,
    pub sessions: Arc<SessionStore>,
    pub tasks: Arc<TaskStore>,
    pub memory: Arc<MemoryStore>,
    pub bus: Arc<EventBus>,
    pub drivers: Arc<MockDriverFactory>,
    pub chat: Arc<RoutingChatClient>,
    pub dir: TempDir,
}

/// Build a core with per-session scripted chat and mock drivers.
pub fn core(max_concurrent: usize) -> Core {
    let dir = TempDir::new().expect("temp dir");
    core_in(dir, max_concurrent)
}

/// Build a core over an existing storage directory (for restart tests).
pub fn core_in(dir: TempDir, max_concurrent: usize) -> Core {
    let sessions =
        Arc::new(SessionStore::load(dir.path().join("sessions.json")).expect("session store"));
    let tasks = Arc::new(TaskStore::load(dir.path().join("tasks.json")).expect("task store"));
    let memory = Arc::new(MemoryStore::open(&dir.path().join("memory.sqlite")).expect("memory"));
    let bus = EventBus::new(256);
    let accounting = Arc::new(TokenAccounting::new(sessions.clone(), bus.clone()));
    let chat = RoutingChatClient::new();
    let drivers = MockDriverFactory::new();
    let planner = Arc::new(Planner::new(
        chat.clone(),
        memory.clone(),
        bus.clone(),
        drivers.clone(),
        ModelsConfig::default(),
    ));
    let scheduler = Scheduler::new(
        SchedulerConfig { max_concurrent },
        tasks.clone(),
        sessions.clone(),
        accounting,
        planner,
        bus.clone(),
    );
    Core {
        scheduler,
        sessions,
        tasks,
        memory,
        bus,
        drivers,
        chat,
        dir,
    }
}

/// A snapshot with no interactive elements.
pub fn page(url: &str, title: &str) -> PageSnapshot {
    normalize_snapshot(url.into(), title.into(), vec![], "page content".into())
}

/// Poll until the task reaches a terminal status (10 s budget).
pub async fn wait_terminal(tasks: &TaskStore, task_id: &str) -> Task {
    for _ in 0..1000 {
        if let Some(task) = tasks.get(task_id).expect("task store read") {
            if task.status.is_terminal() {
                return task;
            }
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("task {task_id} never reached a terminal status");
}

/// Poll until `predicate` holds over the task (10 s budget).
pub async fn wait_until(
    tasks: &TaskStore,
    task_id: &str,
    predicate: impl Fn(&Task) -> bool,
) -> Task {
    for _ in 0..1000 {
        if let Some(task) = tasks.get(task_id).expect("task store read") {
            if predicate(&task) {
                return task;
            }
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("task {task_id} never satisfied the predicate");
}

/// Poll until the task is observed running.
pub async fn wait_running(tasks: &TaskStore, task_id: &str) -> Task {
    wait_until(tasks, task_id, |t| t.status == TaskStatus::Running).await
}
