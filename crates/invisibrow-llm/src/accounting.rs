//! Rolling session accounting for LLM usage.

use std::sync::Arc;

use tracing::debug;

use invisibrow_bus::EventBus;
use invisibrow_store::SessionStore;
use invisibrow_types::{ChatUsage, CoreEvent, InvisibrowError, StepUsage};

use crate::pricing::estimate_cost;

/// Applies each LLM call's usage to the owning session's rolling stats and
/// notifies the UI.
///
/// For every call: `tokens += prompt + completion`, `cached_tokens +=
/// cached`, `cost += estimate`, `last_prompt_tokens = prompt`, then a
/// `session:stats-updated` event is published.
pub struct TokenAccounting {
    sessions: Arc<SessionStore>,
    bus: Arc<EventBus>,
}

impl TokenAccounting {
    pub fn new(sessions: Arc<SessionStore>, bus: Arc<EventBus>) -> Self {
        Self { sessions, bus }
    }

    /// Record one call against a session. Returns the per-call usage record
    /// for the step trace.
    pub fn record(
        &self,
        session_id: &str,
        model: &str,
        usage: &ChatUsage,
    ) -> Result<StepUsage, InvisibrowError> {
        let cost = estimate_cost(model, usage);
        self.sessions.apply_usage(
            session_id,
            usage.prompt_tokens,
            usage.cached_tokens,
            usage.completion_tokens,
            cost,
        )?;
        self.bus.publish(CoreEvent::SessionStatsUpdated {
            session_id: session_id.to_string(),
        });
        debug!(
            session_id = %session_id,
            model = %model,
            prompt_tokens = usage.prompt_tokens,
            completion_tokens = usage.completion_tokens,
            cost,
            "usage recorded"
        );
        Ok(StepUsage {
            input_tokens: usage.prompt_tokens.saturating_sub(usage.cached_tokens),
            cached_tokens: usage.cached_tokens,
            output_tokens: usage.completion_tokens,
            cost,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn fixtures(dir: &TempDir) -> (Arc<SessionStore>, Arc<EventBus>, TokenAccounting) {
        let sessions = Arc::new(SessionStore::load(dir.path().join("sessions.json")).unwrap());
        let bus = EventBus::new(16);
        let accounting = TokenAccounting::new(sessions.clone(), bus.clone());
        (sessions, bus, accounting)
    }

    #[tokio::test]
    async fn record_updates_stats_and_emits_event() {
        let dir = TempDir::new().unwrap();
        let (sessions, bus, accounting) = fixtures(&dir);
        let session = sessions.create("default", true).unwrap();
        let mut rx = bus.subscribe();

        let step = accounting
            .record(
                &session.id,
                "claude-sonnet-4-20250514",
                &ChatUsage {
                    prompt_tokens: 1000,
                    cached_tokens: 200,
                    completion_tokens: 300,
                },
            )
            .unwrap();

        assert_eq!(step.input_tokens, 800);
        assert_eq!(step.cached_tokens, 200);
        assert_eq!(step.output_tokens, 300);
        assert!(step.cost > 0.0);

        let stats = sessions.get(&session.id).unwrap().unwrap().stats;
        assert_eq!(stats.tokens, 1300);
        assert_eq!(stats.cached_tokens, 200);
        assert_eq!(stats.last_prompt_tokens, 1000);
        assert!((stats.cost - step.cost).abs() < 1e-12);

        match rx.recv().await.unwrap() {
            CoreEvent::SessionStatsUpdated { session_id } => assert_eq!(session_id, session.id),
            other => panic!("unexpected event: {other:?}"),
        }
    }

    #[tokio::test]
    async fn session_tokens_increase_by_prompt_plus_completion() {
        let dir = TempDir::new().unwrap();
        let (sessions, _bus, accounting) = fixtures(&dir);
        let session = sessions.create("default", true).unwrap();

        for _ in 0..3 {
            accounting
                .record(
                    &session.id,
                    "claude-3-5-haiku-20241022",
                    &ChatUsage {
                        prompt_tokens: 50,
                        cached_tokens: 0,
                        completion_tokens: 25,
                    },
                )
                .unwrap();
        }
        let stats = sessions.get(&session.id).unwrap().unwrap().stats;
        assert_eq!(stats.tokens, 225);
        assert_eq!(stats.last_prompt_tokens, 50);
    }
}
