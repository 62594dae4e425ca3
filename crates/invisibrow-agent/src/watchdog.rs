//! Two-tier intervention and dead-loop detector.
//!
//! Tier 1 is free: a containment scan of the page title and content snippet
//! against the bot-keyword list, plus the search engine's challenge-URL
//! pattern. Tier 2 is one JSON-mode LLM call, consulted only when tier 1
//! misses. When tier 2 confirms an intervention it learns new keywords so
//! the next occurrence is caught by tier 1.

use std::sync::{Arc, Mutex};

use tracing::{info, warn};

use invisibrow_browser::PageSnapshot;
use invisibrow_llm::{ChatClient, ChatScope};
use invisibrow_memory::MemoryStore;
use invisibrow_types::{ChatMessage, ChatRequest, StepUsage};

use crate::hooks::TaskHooks;
use crate::prompts;

/// URL substrings of the major search engine's challenge page.
const CHALLENGE_URL_PATTERNS: &[&str] = &["google.com/sorry", "/sorry/index"];

/// Outcome of a watchdog check.
#[derive(Debug, Clone, PartialEq)]
pub enum WatchdogVerdict {
    /// Nothing blocking; the executor may proceed.
    Clear,
    /// A human must interact with the browser before the task can continue.
    Intervention { reason: String },
}

struct KeywordCache {
    version: u64,
    keywords: Vec<String>,
}

/// Screens executor steps for intervention conditions.
pub struct Watchdog {
    memory: Arc<MemoryStore>,
    chat: Arc<dyn ChatClient>,
    model: String,
    cache: Mutex<Option<KeywordCache>>,
}

impl Watchdog {
    pub fn new(memory: Arc<MemoryStore>, chat: Arc<dyn ChatClient>, model: String) -> Self {
        Self {
            memory,
            chat,
            model,
            cache: Mutex::new(None),
        }
    }

    /// Tier 1: case-insensitive containment scan of the snapshot against the
    /// bot-keyword list and the challenge-URL pattern. Returns the
    /// intervention reason on a hit. No LLM involved.
    pub fn keyword_scan(&self, snapshot: &PageSnapshot) -> Option<String> {
        let url = snapshot.url.to_lowercase();
        for pattern in CHALLENGE_URL_PATTERNS {
            if url.contains(pattern) {
                return Some("search engine challenge page detected".to_string());
            }
        }

        let title = snapshot.title.to_lowercase();
        let content = snapshot.content_snippet.to_lowercase();
        for keyword in self.cached_keywords() {
            if title.contains(&keyword) || content.contains(&keyword) {
                return Some(format!(
                    "blocked page detected (keyword '{keyword}' on '{}')",
                    snapshot.title
                ));
            }
        }
        None
    }

    /// Full check: tier 1, then tier 2 on a miss.
    ///
    /// Tier 2's LLM usage is accounted through `hooks` and returned so the
    /// executor can merge it into the step record. An LLM fault in tier 2 is
    /// treated as no intervention.
    pub async fn check(
        &self,
        scope: &ChatScope,
        goal: &str,
        snapshot: &PageSnapshot,
        history_tail: &[String],
        hooks: &dyn TaskHooks,
    ) -> (WatchdogVerdict, Option<StepUsage>) {
        if let Some(reason) = self.keyword_scan(snapshot) {
            info!(reason = %reason, "tier-1 keyword scan hit");
            return (WatchdogVerdict::Intervention { reason }, None);
        }

        let request = ChatRequest::new(
            self.model.clone(),
            vec![ChatMessage::user(prompts::watchdog_prompt(
                goal,
                &snapshot.to_prompt_text(),
                history_tail,
            ))],
        )
        .with_schema(prompts::watchdog_schema());

        let response = match self.chat.chat(scope, request).await {
            Ok(response) => response,
            Err(e) => {
                warn!(error = %e, "watchdog LLM call failed; treating as clear");
                return (WatchdogVerdict::Clear, None);
            }
        };
        let usage = hooks.record_usage(&response.model, &response.usage).await;

        let report = match prompts::parse_watchdog_report(&response.content) {
            Ok(report) => report,
            Err(e) => {
                warn!(error = %e, "watchdog response malformed; treating as clear");
                return (WatchdogVerdict::Clear, Some(usage));
            }
        };

        if report.needs_intervention {
            self.learn_from(&report, snapshot);
            let reason = if report.reason.is_empty() {
                "page requires human verification".to_string()
            } else {
                report.reason
            };
            info!(reason = %reason, "tier-2 intervention detected");
            return (WatchdogVerdict::Intervention { reason }, Some(usage));
        }
        if report.is_stuck {
            let reason = if report.reason.is_empty() {
                "agent is repeating the same action without progress".to_string()
            } else {
                report.reason
            };
            info!(reason = %reason, "dead loop detected");
            return (WatchdogVerdict::Intervention { reason }, Some(usage));
        }
        (WatchdogVerdict::Clear, Some(usage))
    }

    /// Store the reported keywords plus tokens mined from the page title and
    /// the reason text, then drop the cache so the next scan sees them.
    fn learn_from(&self, report: &prompts::WatchdogReport, snapshot: &PageSnapshot) {
        for keyword in &report.new_block_keywords {
            if let Err(e) = self.memory.add_bot_keyword(keyword) {
                warn!(error = %e, "failed to store reported keyword");
            }
        }
        let mined = format!("{} {}", snapshot.title, report.reason);
        if let Err(e) = self.memory.add_bot_keywords_from_text(&mined) {
            warn!(error = %e, "failed to mine keywords from intervention");
        }
        *self.cache.lock().unwrap_or_else(|p| p.into_inner()) = None;
    }

    fn cached_keywords(&self) -> Vec<String> {
        let mut cache = self.cache.lock().unwrap_or_else(|p| p.into_inner());
        let current_version = self.memory.keyword_version();
        if let Some(cached) = cache.as_ref() {
            if cached.version == current_version {
                return cached.keywords.clone();
            }
        }
        let keywords = self.memory.bot_keywords().unwrap_or_default();
        *cache = Some(KeywordCache {
            version: current_version,
            keywords: keywords.clone(),
        });
        keywords
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use invisibrow_browser::normalize_snapshot;
    use invisibrow_llm::ScriptedChatClient;
    use tempfile::TempDir;

    use crate::hooks::CollectingHooks;

    fn memory(dir: &TempDir) -> Arc<MemoryStore> {
        Arc::new(MemoryStore::open(&dir.path().join("memory.sqlite")).unwrap())
    }

    fn snapshot(url: &str, title: &str, content: &str) -> PageSnapshot {
        normalize_snapshot(url.into(), title.into(), vec![], content.into())
    }

    fn watchdog(memory: Arc<MemoryStore>, script: Vec<&str>) -> Watchdog {
        Watchdog::new(
            memory,
            Arc::new(ScriptedChatClient::new(script)),
            "claude-3-5-haiku-20241022".into(),
        )
    }

    #[tokio::test]
    async fn tier1_hits_on_default_keyword_without_llm() {
        let dir = TempDir::new().unwrap();
        let wd = watchdog(memory(&dir), vec![]);
        let hooks = CollectingHooks::new();
        let scope = ChatScope::new("s", "watchdog");

        let page = snapshot("https://example.com", "Complete the CAPTCHA", "solve it");
        let (verdict, usage) = wd.check(&scope, "goal", &page, &[], &hooks).await;
        assert!(matches!(verdict, WatchdogVerdict::Intervention { .. }));
        // Tier 1 records no LLM usage.
        assert!(usage.is_none());
        assert!(hooks.usages.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn tier1_matches_content_snippet_case_insensitive() {
        let dir = TempDir::new().unwrap();
        let wd = watchdog(memory(&dir), vec![]);
        let page = snapshot(
            "https://example.com",
            "Example",
            "We detected UNUSUAL TRAFFIC from your network",
        );
        assert!(wd.keyword_scan(&page).is_some());
    }

    #[tokio::test]
    async fn tier1_hits_on_challenge_url() {
        let dir = TempDir::new().unwrap();
        let wd = watchdog(memory(&dir), vec![]);
        let page = snapshot("https://www.google.com/sorry/index?continue=x", "", "");
        let reason = wd.keyword_scan(&page).unwrap();
        assert!(reason.contains("challenge"));
    }

    #[tokio::test]
    async fn tier2_clear_page_passes() {
        let dir = TempDir::new().unwrap();
        let wd = watchdog(
            memory(&dir),
            vec![r#"{"isStuck": false, "needsIntervention": false}"#],
        );
        let hooks = CollectingHooks::new();
        let scope = ChatScope::new("s", "watchdog");

        let page = snapshot("https://news.example.com", "Daily News", "headlines");
        let (verdict, usage) = wd.check(&scope, "read news", &page, &[], &hooks).await;
        assert_eq!(verdict, WatchdogVerdict::Clear);
        assert!(usage.is_some());
        assert_eq!(hooks.usages.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn tier2_intervention_learns_keywords_for_tier1() {
        let dir = TempDir::new().unwrap();
        let store = memory(&dir);
        let wd = watchdog(
            store.clone(),
            vec![
                r#"{"isStuck": false, "needsIntervention": true,
                    "reason": "full-page verification wall",
                    "newBlockKeywords": ["slide to verify"]}"#,
            ],
        );
        let hooks = CollectingHooks::new();
        let scope = ChatScope::new("s", "watchdog");

        let page = snapshot(
            "https://shop.example.com",
            "Checkpoint required",
            "please confirm",
        );
        let (verdict, _) = wd.check(&scope, "buy socks", &page, &[], &hooks).await;
        assert!(matches!(verdict, WatchdogVerdict::Intervention { .. }));

        // The reported keyword is stored...
        assert!(store
            .bot_keywords()
            .unwrap()
            .contains(&"slide to verify".to_string()));
        // ...and the cache was invalidated: a page with a mined title token
        // now hits tier 1 directly.
        let next = snapshot("https://x", "Checkpoint again", "");
        assert!(wd.keyword_scan(&next).is_some());
    }

    #[tokio::test]
    async fn stuck_report_is_treated_as_intervention() {
        let dir = TempDir::new().unwrap();
        let wd = watchdog(
            memory(&dir),
            vec![r#"{"isStuck": true, "needsIntervention": false, "reason": "clicking in circles"}"#],
        );
        let hooks = CollectingHooks::new();
        let scope = ChatScope::new("s", "watchdog");
        let page = snapshot("https://app.example.com", "Dashboard", "widgets");

        let tail = vec!["3: click 5".into(), "4: click 5".into(), "5: click 5".into()];
        let (verdict, _) = wd.check(&scope, "goal", &page, &tail, &hooks).await;
        assert_eq!(
            verdict,
            WatchdogVerdict::Intervention {
                reason: "clicking in circles".into()
            }
        );
    }

    #[tokio::test]
    async fn llm_fault_is_non_intervention() {
        let dir = TempDir::new().unwrap();
        let store = memory(&dir);
        let wd = Watchdog::new(
            store,
            Arc::new(ScriptedChatClient::with_outcomes(vec![Err(
                "transport down".into()
            )])),
            "claude-3-5-haiku-20241022".into(),
        );
        let hooks = CollectingHooks::new();
        let scope = ChatScope::new("s", "watchdog");
        let page = snapshot("https://example.com", "Fine page", "fine");

        let (verdict, usage) = wd.check(&scope, "goal", &page, &[], &hooks).await;
        assert_eq!(verdict, WatchdogVerdict::Clear);
        assert!(usage.is_none());
    }

    #[tokio::test]
    async fn malformed_report_is_non_intervention() {
        let dir = TempDir::new().unwrap();
        let wd = watchdog(memory(&dir), vec!["this is not json"]);
        let hooks = CollectingHooks::new();
        let scope = ChatScope::new("s", "watchdog");
        let page = snapshot("https://example.com", "Fine page", "fine");

        let (verdict, usage) = wd.check(&scope, "goal", &page, &[], &hooks).await;
        assert_eq!(verdict, WatchdogVerdict::Clear);
        // The call happened, so its usage is still accounted.
        assert!(usage.is_some());
    }

    #[tokio::test]
    async fn learned_keyword_scan_roundtrip() {
        let dir = TempDir::new().unwrap();
        let store = memory(&dir);
        let wd = watchdog(store.clone(), vec![]);

        store.add_bot_keywords_from_text("Distil Networks interstitial").unwrap();
        let page = snapshot("https://x", "Distil check", "hold on");
        assert!(wd.keyword_scan(&page).is_some());
    }
}
