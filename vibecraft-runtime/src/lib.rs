//! # vibecraft runtime
//!
//! The leaf components a coding-agent run is assembled from.
//!
//! ## Core Concepts
//! - **Provider**: Trait-based LLM communication (OpenAI-compatible endpoints, OpenRouter)
//! - **Sandbox**: An ephemeral execution environment with commands and whole-file IO
//! - **Steps**: Named, journaled units of work that replay instead of re-executing
//! - **Run State**: The summary/files record one run mutates through its tools
//! - **Tools**: `terminal`, `createOrUpdateFiles` and `readFiles` over a sandbox
//! - **Store**: Message/fragment persistence, **Quota**: per-user generation points

pub mod error;
pub mod provider;
pub mod quota;
pub mod sandbox;
pub mod state;
pub mod steps;
pub mod storage;
pub mod store;
pub mod tools;

pub use error::{Error, ErrorKind, ErrorStatus, Result};
pub use provider::{
    ChatMessage, CompletionRequest, CompletionResponse, FinishReason, LlmProvider,
    OpenAIProvider, ProviderConfig, Role, ToolCall, ToolDefinition, Usage, UsageTracker,
};
pub use quota::{Plan, QuotaLimiter, QuotaPolicy, UsageStatus};
pub use sandbox::{
    CommandEvent, CommandOutput, CommandStream, LocalSandboxService, RemoteSandboxService,
    Sandbox, SandboxService, DEFAULT_PREVIEW_PORT,
};
pub use state::{ConversationTurn, FileMap, RunState, TurnRole};
pub use steps::{generate_run_id, RetryPolicy, StepRunner};
pub use storage::{FileStorage, MemoryStorage, Storage, StorageBackend};
pub use store::{
    FileMessageStore, Fragment, MemoryMessageStore, Message, MessageRole, MessageStore,
    MessageType, NewFragment, NewMessage, SortOrder,
};
pub use tools::{
    FileContent, FileWrite, ToolContext, ToolFailure, ToolInvocation, ToolKit, ToolOutcome,
};
