//! Core types shared across all invisibrow crates.
//!
//! Defines sessions, tasks, chat messages, core events, configuration, and
//! error types used by the memory store, scheduler, agents, and CLI.

pub mod chat;
pub mod config;
pub mod error;
pub mod events;
pub mod session;
pub mod task;

pub use chat::{ChatMessage, ChatRequest, ChatResponse, ChatRole, ChatUsage, MaskedApiKey};
pub use config::{InvisibrowConfig, ModelsConfig};
pub use error::InvisibrowError;
pub use events::{CoreEvent, LogLevel};
pub use session::{Session, SessionStats};
pub use task::{AgentKind, StepUsage, Task, TaskStatus, TaskStep, TaskUsage};
