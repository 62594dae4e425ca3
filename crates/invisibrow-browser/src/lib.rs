//! Browser control contract for the orchestration core.
//!
//! The concrete browser is opaque: the core sees [`PageDriver`], a narrow
//! async surface for navigation, snapshotting, and element interaction, plus
//! [`DriverFactory`] which hands out one driver per session. The snapshot
//! normalization rules (element cap, text truncation, content bound) live
//! here so every driver implementation satisfies the same contract.

mod driver;
mod mock;
mod profile;
mod snapshot;

pub use driver::{DriverFactory, PageDriver, NAVIGATION_TIMEOUT, SEARCH_NAVIGATION_TIMEOUT};
pub use mock::{MockDriverFactory, MockPageDriver, RecordedAction};
pub use profile::ProfileManager;
pub use snapshot::{
    normalize_snapshot, BrowserResult, InteractiveElement, PageSnapshot, MAX_CONTENT_SNIPPET,
    MAX_ELEMENTS, MAX_ELEMENT_TEXT,
};
