//! # Orchestrator
//!
//! One run, end to end, as a sequence of durable steps:
//!
//! 1. `get-sandbox-id` provisions the sandbox
//! 2. `get-previous-messages` loads the latest conversation turns
//! 3. the network runs the coding agent until it concludes or hits the cap
//! 4. `fragment-title-generator` and `response-generator` turn the summary into text
//! 5. `get-sandbox-url` resolves the preview URL
//! 6. `save-result` persists exactly one RESULT or ERROR message
//! 7. `close-sandbox` releases the sandbox, on every exit path once it exists
//!
//! The saved message carries an id derived from the run id, so re-running
//! `save-result` after a crash overwrites rather than duplicates it. A run
//! whose sandbox was already released without saving cannot be resumed.

use crate::agent::{extract_text, Agent, Generator, ModelBinding};
use crate::network::{Network, Router, DEFAULT_MAX_ITER};
use crate::prompt::Prompts;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{info, warn};
use vibecraft_runtime::{
    ConversationTurn, Error, FileMap, LlmProvider, Message, MessageRole, MessageStore, NewFragment,
    NewMessage, Result, RunState, SandboxService, SortOrder, StepRunner, ToolContext, TurnRole,
    DEFAULT_PREVIEW_PORT,
};

pub const DEFAULT_TEMPLATE: &str = "vibegourab";
pub const DEFAULT_HISTORY_LIMIT: usize = 5;

pub const CODE_AGENT: &str = "code-agent";
pub const NETWORK: &str = "coding-agent-network";
pub const FRAGMENT_TITLE_GENERATOR: &str = "fragment-title-generator";
pub const RESPONSE_GENERATOR: &str = "response-generator";

pub const TITLE_FALLBACK: &str = "Fragment";
pub const RESPONSE_FALLBACK: &str = "Here's what I built for you.";
pub const INCOMPLETE_RUN_MESSAGE: &str = "Error: No summary or files generated.";

/// The trigger of a run: a project and the user's latest instruction
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunEvent {
    pub project_id: String,
    pub value: String,
}

impl RunEvent {
    pub fn new(project_id: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            project_id: project_id.into(),
            value: value.into(),
        }
    }
}

/// Whether a run produced both a summary and files
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunVerdict {
    Completed,
    Incomplete,
}

impl RunVerdict {
    pub fn of(state: &RunState) -> Self {
        if state.summary().is_empty() || state.files().is_empty() {
            RunVerdict::Incomplete
        } else {
            RunVerdict::Completed
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunOutcome {
    pub url: String,
    pub title: String,
    pub files: FileMap,
    pub summary: String,
    pub verdict: RunVerdict,
}

/// Knobs of a run that come from configuration
#[derive(Debug, Clone, PartialEq)]
pub struct RunSettings {
    pub template: String,
    pub preview_port: u16,
    pub max_iter: usize,
    pub history_limit: usize,
    pub binding: ModelBinding,
    pub prompts: Prompts,
}

impl Default for RunSettings {
    fn default() -> Self {
        Self {
            template: DEFAULT_TEMPLATE.to_string(),
            preview_port: DEFAULT_PREVIEW_PORT,
            max_iter: DEFAULT_MAX_ITER,
            history_limit: DEFAULT_HISTORY_LIMIT,
            binding: ModelBinding::default(),
            prompts: Prompts::default(),
        }
    }
}

/// Drives runs against a model provider, a sandbox service and a message store
pub struct Orchestrator {
    provider: Arc<dyn LlmProvider>,
    sandboxes: Arc<dyn SandboxService>,
    store: Arc<dyn MessageStore>,
    settings: RunSettings,
}

impl Orchestrator {
    pub fn new(
        provider: Arc<dyn LlmProvider>,
        sandboxes: Arc<dyn SandboxService>,
        store: Arc<dyn MessageStore>,
    ) -> Self {
        Self {
            provider,
            sandboxes,
            store,
            settings: RunSettings::default(),
        }
    }

    pub fn with_settings(mut self, settings: RunSettings) -> Self {
        self.settings = settings;
        self
    }

    pub fn settings(&self) -> &RunSettings {
        &self.settings
    }

    /// Execute a run. Steps already journaled by `steps` replay instead of
    /// executing again.
    pub async fn run(&self, event: &RunEvent, steps: &StepRunner) -> Result<RunOutcome> {
        if event.project_id.is_empty() {
            return Err(Error::invalid_argument("run event has no project id").with_operation("orchestrator::run"));
        }
        let completed = steps.completed_steps();
        if completed.iter().any(|s| s == "close-sandbox") && !completed.iter().any(|s| s == "save-result") {
            return Err(Error::step_failed(
                "close-sandbox",
                format!("run {} already released its sandbox; start a new run", steps.run_id()),
            )
            .with_operation("orchestrator::run"));
        }
        info!(run_id = steps.run_id(), project_id = %event.project_id, "starting run");

        let template = self.settings.template.as_str();
        let sandbox_id = steps
            .run("get-sandbox-id", move || self.create_sandbox(template))
            .await?;

        let result = self.run_in_sandbox(event, steps, &sandbox_id).await;

        let sandboxes = self.sandboxes.as_ref();
        let id = sandbox_id.as_str();
        let released = steps.run("close-sandbox", move || sandboxes.release(id)).await;

        match (result, released) {
            (Ok(outcome), Ok(())) => {
                info!(
                    run_id = steps.run_id(),
                    project_id = %event.project_id,
                    verdict = ?outcome.verdict,
                    files = outcome.files.len(),
                    "run finished"
                );
                Ok(outcome)
            }
            (Ok(_), Err(release_err)) => Err(release_err),
            (Err(err), Ok(())) => Err(err),
            (Err(err), Err(release_err)) => {
                warn!(run_id = steps.run_id(), error = %release_err, "sandbox release failed after run error");
                Err(err)
            }
        }
    }

    async fn run_in_sandbox(&self, event: &RunEvent, steps: &StepRunner, sandbox_id: &str) -> Result<RunOutcome> {
        let project_id = event.project_id.as_str();
        let history = steps
            .run("get-previous-messages", move || self.previous_messages(project_id))
            .await?;

        let mut state = RunState::with_history(history);
        let network = Network::new(
            NETWORK,
            Agent::new(CODE_AGENT, &self.settings.prompts.coding, self.provider.clone())
                .with_binding(self.settings.binding.clone()),
            Router::new(self.settings.max_iter),
        );
        let mut ctx = ToolContext {
            steps,
            sandboxes: self.sandboxes.as_ref(),
            sandbox_id,
            state: &mut state,
        };
        let network_run = network.run(&event.value, &mut ctx).await?;
        info!(
            run_id = steps.run_id(),
            turns = network_run.turns,
            halt = ?network_run.halt,
            total_tokens = network_run.usage.total_tokens(),
            "network halted"
        );

        let title_output = Generator::new(
            FRAGMENT_TITLE_GENERATOR,
            &self.settings.prompts.fragment_title,
            self.provider.clone(),
        )
        .with_binding(self.settings.binding.clone())
        .generate(steps, state.summary())
        .await?;
        let response_output = Generator::new(RESPONSE_GENERATOR, &self.settings.prompts.response, self.provider.clone())
            .with_binding(self.settings.binding.clone())
            .generate(steps, state.summary())
            .await?;
        let title = extract_text(&title_output, TITLE_FALLBACK);
        let response = extract_text(&response_output, RESPONSE_FALLBACK);

        let port = self.settings.preview_port;
        let url = steps
            .run("get-sandbox-url", move || self.sandbox_url(sandbox_id, port))
            .await?;

        let verdict = RunVerdict::of(&state);
        let message = match verdict {
            RunVerdict::Incomplete => NewMessage::error(project_id, INCOMPLETE_RUN_MESSAGE),
            RunVerdict::Completed => NewMessage::result(
                project_id,
                response,
                NewFragment {
                    sandbox_url: url.clone(),
                    title: title.clone(),
                    files: state.files().clone(),
                },
            ),
        }
        .with_id(format!("{}:save-result", steps.run_id()));
        let store = self.store.as_ref();
        let saved: Message = steps
            .run("save-result", move || store.create_message(message.clone()))
            .await
            .map_err(|e| e.with_context("project_id", project_id))?;
        info!(run_id = steps.run_id(), message_id = %saved.id, kind = ?saved.kind, "saved result");

        Ok(RunOutcome {
            url,
            title,
            files: state.files().clone(),
            summary: state.summary().to_string(),
            verdict,
        })
    }

    async fn create_sandbox(&self, template: &str) -> Result<String> {
        let sandbox = self.sandboxes.create(template).await?;
        Ok(sandbox.id().to_string())
    }

    /// The latest turns of the project, oldest first
    async fn previous_messages(&self, project_id: &str) -> Result<Vec<ConversationTurn>> {
        let latest = self
            .store
            .find_messages(project_id, self.settings.history_limit, SortOrder::Desc)
            .await?;

        Ok(latest
            .iter()
            .rev()
            .map(|message| {
                let role = match message.role {
                    MessageRole::Assistant => TurnRole::Assistant,
                    MessageRole::User => TurnRole::User,
                };
                ConversationTurn::text(role, message.content.clone())
            })
            .collect())
    }

    async fn sandbox_url(&self, sandbox_id: &str, port: u16) -> Result<String> {
        let sandbox = self.sandboxes.connect(sandbox_id).await?;
        Ok(sandbox.preview_url(port))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_verdict_needs_summary_and_files() {
        let mut state = RunState::new();
        assert_eq!(RunVerdict::of(&state), RunVerdict::Incomplete);

        state.record_summary("<task_summary>x</task_summary>");
        assert_eq!(RunVerdict::of(&state), RunVerdict::Incomplete);

        let merged = state.merged_files([("app/page.tsx", "x")]);
        state.commit_files(merged);
        assert_eq!(RunVerdict::of(&state), RunVerdict::Completed);

        let mut files_only = RunState::new();
        let merged = files_only.merged_files([("app/page.tsx", "x")]);
        files_only.commit_files(merged);
        assert_eq!(RunVerdict::of(&files_only), RunVerdict::Incomplete);
    }

    #[test]
    fn test_event_wire_format() {
        let event: RunEvent = serde_json::from_str(r#"{"projectId": "p1", "value": "build a todo app"}"#).unwrap();
        assert_eq!(event, RunEvent::new("p1", "build a todo app"));
    }
}
