//! # vibecraft Agent
//!
//! Turns one user instruction into a running web app:
//! 1. A sandbox is provisioned for the run
//! 2. The latest project messages become the conversation history
//! 3. The coding agent writes files and runs commands through its tools
//! 4. The router stops the loop once the agent emits a `<task_summary>`, or at the turn cap
//! 5. Two generators turn the summary into a title and a reply
//! 6. Exactly one RESULT or ERROR message is saved, and the sandbox is released
//!
//! Every side effect runs as a durable step, so a resumed run replays what
//! already happened instead of doing it twice.

mod agent;
mod config;
mod network;
mod orchestrator;
mod prompt;

pub use agent::{
    extract_text, Agent, AgentTurn, Generator, ModelBinding, OutputItem, ResponseHook, TaskSummaryHook,
    TextContent, TextPart,
};
pub use config::{
    ModelConfig, NetworkConfig, QuotaConfig, SandboxBackend, SandboxConfig, StepsConfig, StoreConfig,
    VibecraftConfig, DEFAULT_CONFIG_FILE, DEFAULT_MODEL,
};
pub use network::{HaltReason, Network, NetworkRun, Router, RouterState, DEFAULT_MAX_ITER};
pub use orchestrator::{
    Orchestrator, RunEvent, RunOutcome, RunSettings, RunVerdict, CODE_AGENT, DEFAULT_HISTORY_LIMIT,
    DEFAULT_TEMPLATE, FRAGMENT_TITLE_GENERATOR, INCOMPLETE_RUN_MESSAGE, NETWORK, RESPONSE_FALLBACK,
    RESPONSE_GENERATOR, TITLE_FALLBACK,
};
pub use prompt::{Prompts, CODING_PROMPT, FRAGMENT_TITLE_PROMPT, RESPONSE_PROMPT, TASK_SUMMARY_MARKER};
