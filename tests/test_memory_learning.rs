//! Long-term memory recall and watchdog keyword self-learning across the
//! full stack.

mod common;

use common::{core, page, wait_terminal, CLEAR, KEYWORDS};

use std::sync::Arc;

use chrono::Utc;
use invisibrow::agent::watchdog::Watchdog;
use invisibrow::browser::MockPageDriver;
use invisibrow::llm::ScriptedChatClient;
use invisibrow::memory::{MemoryRecord, MemoryStore};
use invisibrow::types::TaskStatus;
use tempfile::TempDir;

fn success_record(id: &str, goal: &str, keywords: &[&str], summary: &str) -> MemoryRecord {
    MemoryRecord {
        id: id.into(),
        goal: goal.into(),
        keywords: keywords.iter().map(|k| k.to_string()).collect(),
        summary: summary.into(),
        artifacts: serde_json::json!({}),
        status: "success".into(),
        timestamp: Utc::now(),
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn recalled_memory_reaches_the_plan_prompt() {
    let core = core(2);
    let session = core.sessions.create("default", true).unwrap();

    // A prior task left a recallable value behind. The keyword script
    // returns "alpha", which matches this record.
    core.memory
        .save(&success_record(
            "earlier-task",
            "find the alpha dashboard",
            &["alpha", "dashboard"],
            "the alpha dashboard lives at https://alpha.example.com/d/42",
        ))
        .unwrap();

    core.chat.register(
        &session.id,
        vec![
            KEYWORDS,
            r#"{"thought": "memory already has the URL", "command": "browser",
                "input": {"task": "open https://alpha.example.com/d/42"}}"#,
            CLEAR,
            r#"{"thought": "dashboard open", "action": "answer", "answer": "opened"}"#,
            r#"{"summary": "Dashboard 42 open.", "extracted": {}}"#,
            r#"{"thought": "done", "command": "finish", "input": {}}"#,
        ],
    );
    core.drivers.register(
        &session.id,
        MockPageDriver::new(vec![page("https://alpha.example.com/d/42", "Dashboard 42")]),
    );

    let task_id = core.scheduler.submit(&session.id, "open the alpha dashboard").unwrap();
    let task = wait_terminal(&core.tasks, &task_id).await;
    assert_eq!(task.status, TaskStatus::Completed);

    // The known value flowed into the executor goal (spec: known values are
    // embedded verbatim, so the executor does not re-query).
    let browser_step = task
        .steps
        .iter()
        .find(|s| s.command.starts_with("browser"))
        .unwrap();
    assert!(browser_step.command.contains("https://alpha.example.com/d/42"));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn failed_tasks_never_surface_in_recall() {
    let core = core(2);

    let mut failed = success_record("failed-task", "broken goal", &["alpha"], "went wrong");
    failed.status = "failed".into();
    core.memory.save(&failed).unwrap();
    core.memory
        .save(&success_record("ok-task", "good goal", &["alpha"], "went right"))
        .unwrap();

    let hits = core.memory.search(&["alpha".into()]).unwrap();
    assert_eq!(hits.len(), 1);
    assert_eq!(hits[0].id, "ok-task");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn learned_keywords_harden_the_tier1_scan() {
    let dir = TempDir::new().unwrap();
    let memory = Arc::new(MemoryStore::open(&dir.path().join("memory.sqlite")).unwrap());

    // Tier 2 reports a novel block and teaches the store.
    let chat = Arc::new(ScriptedChatClient::new(vec![
        r#"{"isStuck": false, "needsIntervention": true,
            "reason": "interstitial blocks everything",
            "newBlockKeywords": ["checking your browser"]}"#,
    ]));
    let watchdog = Watchdog::new(memory.clone(), chat, "claude-3-5-haiku-20241022".into());
    let hooks = invisibrow::agent::hooks::CollectingHooks::new();
    let scope = invisibrow::llm::ChatScope::new("s", "watchdog");

    let novel = page("https://example.com", "One moment");
    let (verdict, _) = watchdog.check(&scope, "goal", &novel, &[], &hooks).await;
    assert!(matches!(
        verdict,
        invisibrow::agent::watchdog::WatchdogVerdict::Intervention { .. }
    ));

    // The same block now trips tier 1 with no LLM available.
    let repeat = page("https://other.example.com", "Checking your browser…");
    assert!(watchdog.keyword_scan(&repeat).is_some());

    // And the keyword store never goes empty, even after deleting all.
    for kw in memory.bot_keywords().unwrap() {
        memory.delete_bot_keyword(&kw).unwrap();
    }
    assert!(!memory.bot_keywords().unwrap().is_empty());
}
