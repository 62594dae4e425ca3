//! Deterministic in-memory driver for tests and `UI_TEST` mode.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;

use invisibrow_types::InvisibrowError;

use crate::driver::{DriverFactory, PageDriver};
use crate::snapshot::PageSnapshot;

/// An action the mock driver observed, for test assertions.
#[derive(Debug, Clone, PartialEq)]
pub enum RecordedAction {
    EnsureStarted { headless: bool },
    SetHeadless { headless: bool },
    Goto(String),
    Click(usize),
    Focus(usize),
    InsertText { index: usize, text: String },
    TypeChar(char),
    PressEnter,
    WaitForNavigation,
    Close,
}

/// Scripted page driver: replays a queue of snapshots and records every
/// action. When the snapshot queue runs dry the last snapshot repeats, which
/// models a page that stopped changing.
pub struct MockPageDriver {
    snapshots: Mutex<VecDeque<PageSnapshot>>,
    last_snapshot: Mutex<Option<PageSnapshot>>,
    actions: Mutex<Vec<RecordedAction>>,
    headless: AtomicBool,
    started: AtomicBool,
    current_url: Mutex<String>,
    /// When set, `snapshot` fails this many times before succeeding.
    snapshot_failures: Mutex<u32>,
}

impl MockPageDriver {
    pub fn new(snapshots: Vec<PageSnapshot>) -> Arc<Self> {
        Arc::new(Self {
            snapshots: Mutex::new(snapshots.into()),
            last_snapshot: Mutex::new(None),
            actions: Mutex::new(Vec::new()),
            headless: AtomicBool::new(true),
            started: AtomicBool::new(false),
            current_url: Mutex::new("about:blank".to_string()),
            snapshot_failures: Mutex::new(0),
        })
    }

    /// Queue additional snapshots.
    pub fn push_snapshot(&self, snapshot: PageSnapshot) {
        self.snapshots.lock().expect("snapshots lock").push_back(snapshot);
    }

    /// Make the next `count` snapshot calls fail with a driver fault.
    pub fn fail_next_snapshots(&self, count: u32) {
        *self.snapshot_failures.lock().expect("failures lock") = count;
    }

    /// Everything the driver was asked to do, in order.
    pub fn actions(&self) -> Vec<RecordedAction> {
        self.actions.lock().expect("actions lock").clone()
    }

    /// The current headless mode.
    pub fn is_headless(&self) -> bool {
        self.headless.load(Ordering::SeqCst)
    }

    /// Whether the browser was started.
    pub fn is_started(&self) -> bool {
        self.started.load(Ordering::SeqCst)
    }

    fn record(&self, action: RecordedAction) {
        self.actions.lock().expect("actions lock").push(action);
    }
}

#[async_trait]
impl PageDriver for MockPageDriver {
    async fn ensure_started(&self, headless: bool) -> Result<(), InvisibrowError> {
        self.record(RecordedAction::EnsureStarted { headless });
        if !self.started.swap(true, Ordering::SeqCst) {
            self.headless.store(headless, Ordering::SeqCst);
        }
        Ok(())
    }

    async fn set_headless(&self, headless: bool) -> Result<(), InvisibrowError> {
        self.record(RecordedAction::SetHeadless { headless });
        self.headless.store(headless, Ordering::SeqCst);
        self.started.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn goto(&self, url: &str) -> Result<(), InvisibrowError> {
        self.record(RecordedAction::Goto(url.to_string()));
        *self.current_url.lock().expect("url lock") = url.to_string();
        Ok(())
    }

    async fn snapshot(&self) -> Result<PageSnapshot, InvisibrowError> {
        {
            let mut failures = self.snapshot_failures.lock().expect("failures lock");
            if *failures > 0 {
                *failures -= 1;
                return Err(InvisibrowError::Browser("detached frame".into()));
            }
        }
        let next = self.snapshots.lock().expect("snapshots lock").pop_front();
        let mut last = self.last_snapshot.lock().expect("last lock");
        if let Some(snapshot) = next {
            *last = Some(snapshot.clone());
            *self.current_url.lock().expect("url lock") = snapshot.url.clone();
            return Ok(snapshot);
        }
        last.clone()
            .ok_or_else(|| InvisibrowError::Browser("no snapshot scripted".into()))
    }

    async fn click(&self, index: usize) -> Result<(), InvisibrowError> {
        self.record(RecordedAction::Click(index));
        Ok(())
    }

    async fn focus(&self, index: usize) -> Result<(), InvisibrowError> {
        self.record(RecordedAction::Focus(index));
        Ok(())
    }

    async fn insert_text(&self, index: usize, text: &str) -> Result<(), InvisibrowError> {
        self.record(RecordedAction::InsertText {
            index,
            text: text.to_string(),
        });
        Ok(())
    }

    async fn type_char(&self, c: char) -> Result<(), InvisibrowError> {
        self.record(RecordedAction::TypeChar(c));
        Ok(())
    }

    async fn press_enter(&self) -> Result<(), InvisibrowError> {
        self.record(RecordedAction::PressEnter);
        Ok(())
    }

    async fn wait_for_navigation(&self, _timeout: Duration) -> Result<(), InvisibrowError> {
        self.record(RecordedAction::WaitForNavigation);
        Ok(())
    }

    async fn current_url(&self) -> Result<String, InvisibrowError> {
        Ok(self.current_url.lock().expect("url lock").clone())
    }

    async fn close(&self) -> Result<(), InvisibrowError> {
        self.record(RecordedAction::Close);
        self.started.store(false, Ordering::SeqCst);
        Ok(())
    }
}

/// Factory handing out one [`MockPageDriver`] per session id.
#[derive(Default)]
pub struct MockDriverFactory {
    drivers: Mutex<HashMap<String, Arc<MockPageDriver>>>,
}

impl MockDriverFactory {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Pre-register a scripted driver for a session.
    pub fn register(&self, session_id: &str, driver: Arc<MockPageDriver>) {
        self.drivers
            .lock()
            .expect("drivers lock")
            .insert(session_id.to_string(), driver);
    }

    /// The driver bound to a session, if one was handed out or registered.
    pub fn get(&self, session_id: &str) -> Option<Arc<MockPageDriver>> {
        self.drivers.lock().expect("drivers lock").get(session_id).cloned()
    }
}

#[async_trait]
impl DriverFactory for MockDriverFactory {
    async fn acquire(
        &self,
        session_id: &str,
        headless: bool,
    ) -> Result<Arc<dyn PageDriver>, InvisibrowError> {
        let driver = {
            let mut drivers = self.drivers.lock().expect("drivers lock");
            drivers
                .entry(session_id.to_string())
                .or_insert_with(|| MockPageDriver::new(Vec::new()))
                .clone()
        };
        driver.ensure_started(headless).await?;
        Ok(driver)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::snapshot::normalize_snapshot;

    fn page(url: &str, title: &str) -> PageSnapshot {
        normalize_snapshot(url.into(), title.into(), vec![], "content".into())
    }

    #[tokio::test]
    async fn snapshots_replay_then_repeat_last() {
        let driver = MockPageDriver::new(vec![page("https://a", "A"), page("https://b", "B")]);
        driver.ensure_started(true).await.unwrap();

        assert_eq!(driver.snapshot().await.unwrap().title, "A");
        assert_eq!(driver.snapshot().await.unwrap().title, "B");
        // Queue exhausted: the page stopped changing.
        assert_eq!(driver.snapshot().await.unwrap().title, "B");
    }

    #[tokio::test]
    async fn actions_recorded_in_order() {
        let driver = MockPageDriver::new(vec![page("https://a", "A")]);
        driver.goto("https://example.com").await.unwrap();
        driver.click(3).await.unwrap();
        driver.press_enter().await.unwrap();

        let actions = driver.actions();
        assert_eq!(actions[0], RecordedAction::Goto("https://example.com".into()));
        assert_eq!(actions[1], RecordedAction::Click(3));
        assert_eq!(actions[2], RecordedAction::PressEnter);
    }

    #[tokio::test]
    async fn headless_toggle_tracked() {
        let driver = MockPageDriver::new(vec![]);
        driver.ensure_started(true).await.unwrap();
        assert!(driver.is_headless());
        driver.set_headless(false).await.unwrap();
        assert!(!driver.is_headless());
    }

    #[tokio::test]
    async fn scripted_snapshot_failures() {
        let driver = MockPageDriver::new(vec![page("https://a", "A")]);
        driver.fail_next_snapshots(1);
        assert!(driver.snapshot().await.is_err());
        assert_eq!(driver.snapshot().await.unwrap().title, "A");
    }

    #[tokio::test]
    async fn factory_reuses_driver_per_session() {
        let factory = MockDriverFactory::new();
        let a1 = factory.acquire("s1", true).await.unwrap();
        let a2 = factory.acquire("s1", true).await.unwrap();
        let b = factory.acquire("s2", true).await.unwrap();

        a1.goto("https://example.com").await.unwrap();
        assert_eq!(a2.current_url().await.unwrap(), "https://example.com");
        assert_eq!(b.current_url().await.unwrap(), "about:blank");
    }
}
