//! Facade over the invisibrow workspace crates.
//!
//! Re-exports the orchestration core so embedding applications (and the
//! integration tests under `tests/`) can depend on one crate.

pub use invisibrow_agent as agent;
pub use invisibrow_browser as browser;
pub use invisibrow_bus as bus;
pub use invisibrow_llm as llm;
pub use invisibrow_memory as memory;
pub use invisibrow_scheduler as scheduler;
pub use invisibrow_store as store;
pub use invisibrow_types as types;
