//! The opaque page-driver contract.
//!
//! A driver owns one live browser bound to one session's profile directory.
//! Restarting with a different headless mode must reuse the same profile so
//! cookies and logged-in state survive the toggle.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use invisibrow_types::InvisibrowError;

use crate::snapshot::PageSnapshot;

/// Full-navigation timeout.
pub const NAVIGATION_TIMEOUT: Duration = Duration::from_secs(30);

/// Navigation timeout after submitting a search.
pub const SEARCH_NAVIGATION_TIMEOUT: Duration = Duration::from_secs(45);

/// Narrow async surface over one session's live browser.
///
/// Element-addressing methods take indices from the most recent
/// [`PageDriver::snapshot`]; a fresh snapshot is required for each decision.
/// All methods may fail with `InvisibrowError::Browser`.
#[async_trait]
pub trait PageDriver: Send + Sync {
    /// Start the browser for this session if not already running, honoring
    /// the requested headless mode.
    async fn ensure_started(&self, headless: bool) -> Result<(), InvisibrowError>;

    /// Restart the browser in the given headless mode, reusing the same
    /// profile directory.
    async fn set_headless(&self, headless: bool) -> Result<(), InvisibrowError>;

    /// Navigate and wait for network idle, bounded by
    /// [`NAVIGATION_TIMEOUT`].
    async fn goto(&self, url: &str) -> Result<(), InvisibrowError>;

    /// Produce a normalized snapshot of the current page.
    async fn snapshot(&self) -> Result<PageSnapshot, InvisibrowError>;

    /// Scroll the element into view and click it.
    async fn click(&self, index: usize) -> Result<(), InvisibrowError>;

    /// Focus the element.
    async fn focus(&self, index: usize) -> Result<(), InvisibrowError>;

    /// Insert text into the element via the driver's text-insertion
    /// primitive (no per-key events).
    async fn insert_text(&self, index: usize, text: &str) -> Result<(), InvisibrowError>;

    /// Type a single character into the focused element.
    async fn type_char(&self, c: char) -> Result<(), InvisibrowError>;

    /// Press Enter in the focused element.
    async fn press_enter(&self) -> Result<(), InvisibrowError>;

    /// Wait for the next navigation to finish, up to `timeout`.
    async fn wait_for_navigation(&self, timeout: Duration) -> Result<(), InvisibrowError>;

    /// The current page URL.
    async fn current_url(&self) -> Result<String, InvisibrowError>;

    /// Shut the browser down.
    async fn close(&self) -> Result<(), InvisibrowError>;
}

/// Hands out the driver bound to a session's profile.
///
/// Drivers are not safe for concurrent use; the scheduler serializes tasks
/// per session so each acquired driver has one user at a time.
#[async_trait]
pub trait DriverFactory: Send + Sync {
    async fn acquire(
        &self,
        session_id: &str,
        headless: bool,
    ) -> Result<Arc<dyn PageDriver>, InvisibrowError>;
}
