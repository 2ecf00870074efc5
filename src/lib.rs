//! # eoka-pilot
//!
//! Decision layer for an LLM-driven browser agent. The model answers in
//! free text; eoka-pilot turns that text into one well-formed [`Action`],
//! resolves the action's target into a concrete element, and advances a
//! bounded-retry state machine until the task terminates.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use eoka_pilot::{Config, EokaDriver, OpenAiClient, StateMachine};
//!
//! # #[tokio::main]
//! # async fn main() -> eoka_pilot::Result<()> {
//! let config = Config::load("task.yaml")?;
//! let driver = Arc::new(EokaDriver::launch(&config.browser).await?);
//! let llm = Arc::new(OpenAiClient::from_config(&config.llm)?);
//!
//! let mut machine = StateMachine::builder(&config, driver, llm).build();
//! let outcome = machine.run().await?;
//! println!("{} after {} steps", outcome.exit_reason, outcome.steps);
//! # Ok(())
//! # }
//! ```

pub mod action;
pub mod config;
pub mod driver;
pub mod human;
pub mod llm;
pub mod machine;
pub mod notes;
pub mod resolve;
pub mod snapshot;

pub use action::{
    Action, ActionExtractor, ActionType, ActionValidator, NoteOperation, ScrollDirection,
    SelectorType,
};
pub use config::{AgentConfig, BrowserConfig, Config, LlmConfig, ParamDef, Params};
pub use driver::{eoka::EokaDriver, BrowserDriver, ElementHandle};
pub use human::{HumanChannel, ScriptedHuman, TerminalHuman};
pub use llm::{LanguageModel, OpenAiClient, ScriptedModel};
pub use machine::{
    ActionRecord, ExecutionContext, Observation, RunOutcome, State, StateMachine, StopReason,
    MAX_RETRIES,
};
pub use notes::{FileNoteStore, MemoryNoteStore, NoteStore};
pub use resolve::{ElementContext, ElementResolver, Strategy};
pub use snapshot::{DomSnapshotter, PageSnapshot, SnapshotElement, SnapshotSource};

/// Result type for eoka-pilot operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur while configuring or driving a session.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("config error: {0}")]
    Config(String),

    #[error("yaml parse error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("browser error: {0}")]
    Browser(#[from] eoka::Error),

    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("language model error: {0}")]
    Llm(String),

    #[error("element not found: {0}")]
    ElementNotFound(String),

    #[error("action failed: {0}")]
    ActionFailed(String),

    #[error("validation error: {0}")]
    Validation(String),
}
