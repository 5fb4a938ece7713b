//! Agent implementation - one LLM turn against the tool set, plus the
//! single-shot generators that post-process a finished run

use crate::prompt::TASK_SUMMARY_MARKER;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, info};
use vibecraft_runtime::{
    ChatMessage, CompletionRequest, CompletionResponse, ConversationTurn, LlmProvider, Result,
    RunState, StepRunner, ToolCall, ToolContext, ToolKit,
};

/// Inspects each completed turn and may update the run state
pub trait ResponseHook: Send + Sync {
    fn on_response(&self, turn: &AgentTurn, state: &mut RunState);
}

/// Stores the turn's text as the run summary when it carries the completion marker
#[derive(Debug, Clone, Copy, Default)]
pub struct TaskSummaryHook;

impl ResponseHook for TaskSummaryHook {
    fn on_response(&self, turn: &AgentTurn, state: &mut RunState) {
        let Some(text) = turn.text.as_deref() else {
            return;
        };
        if text.contains(TASK_SUMMARY_MARKER) && state.record_summary(text) {
            info!(agent = %turn.agent, "agent signalled completion");
        }
    }
}

/// Sampling parameters passed through to the provider
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ModelBinding {
    pub model: Option<String>,
    pub temperature: Option<f32>,
    pub max_tokens: Option<usize>,
}

impl ModelBinding {
    fn request(&self, messages: Vec<ChatMessage>) -> CompletionRequest {
        let request = CompletionRequest::new(messages)
            .with_temperature(self.temperature)
            .with_max_tokens(self.max_tokens);
        match &self.model {
            Some(model) => request.with_model(model.clone()),
            None => request,
        }
    }
}

/// What one agent turn produced
#[derive(Debug, Clone)]
pub struct AgentTurn {
    pub agent: String,
    /// Assistant text of this turn, if the model wrote any
    pub text: Option<String>,
    pub tool_calls: Vec<ToolCall>,
    /// Tool calls that came back as failures
    pub failed_tools: usize,
    pub response: CompletionResponse,
}

/// The coding agent: a system prompt, a model, the tool set and a response hook
pub struct Agent {
    name: String,
    system_prompt: String,
    provider: Arc<dyn LlmProvider>,
    binding: ModelBinding,
    tools: ToolKit,
    hook: Box<dyn ResponseHook>,
}

impl Agent {
    pub fn new(name: impl Into<String>, system_prompt: impl Into<String>, provider: Arc<dyn LlmProvider>) -> Self {
        Self {
            name: name.into(),
            system_prompt: system_prompt.into(),
            provider,
            binding: ModelBinding::default(),
            tools: ToolKit::new(),
            hook: Box::new(TaskSummaryHook),
        }
    }

    pub fn with_binding(mut self, binding: ModelBinding) -> Self {
        self.binding = binding;
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// The opening conversation: system prompt, prior turns, then the instruction
    pub fn seed_messages(&self, history: &[ConversationTurn], input: &str) -> Vec<ChatMessage> {
        let mut messages = Vec::with_capacity(history.len() + 2);
        messages.push(ChatMessage::system(&self.system_prompt));
        messages.extend(history.iter().map(ChatMessage::from));
        messages.push(ChatMessage::user(input));
        messages
    }

    /// Run one turn: a durable inference, then every requested tool call in
    /// order, then the response hook.
    pub async fn run_turn(&self, messages: &mut Vec<ChatMessage>, ctx: &mut ToolContext<'_>) -> Result<AgentTurn> {
        let request = self
            .binding
            .request(messages.clone())
            .with_tools(self.tools.definitions());
        let response = infer(ctx.steps, &self.name, self.provider.as_ref(), &request).await?;

        let text = response
            .content
            .as_deref()
            .filter(|text| !text.trim().is_empty())
            .map(str::to_string);
        messages.push(ChatMessage::assistant_turn(response.content.clone(), response.tool_calls.clone()));

        let mut failed_tools = 0;
        for call in &response.tool_calls {
            let outcome = self.tools.execute(ctx, call).await?;
            let content = match outcome {
                Ok(output) => output,
                Err(failure) => {
                    failed_tools += 1;
                    failure.to_string()
                }
            };
            messages.push(ChatMessage::tool_result(&call.id, content));
        }

        let turn = AgentTurn {
            agent: self.name.clone(),
            text,
            tool_calls: response.tool_calls.clone(),
            failed_tools,
            response,
        };
        self.hook.on_response(&turn, ctx.state);

        debug!(
            agent = %self.name,
            tool_calls = turn.tool_calls.len(),
            failed_tools,
            concluded = ctx.state.is_concluded(),
            "agent turn finished"
        );
        Ok(turn)
    }
}

/// Model inference as a durable step named after the agent
async fn infer(
    steps: &StepRunner,
    name: &str,
    provider: &dyn LlmProvider,
    request: &CompletionRequest,
) -> Result<CompletionResponse> {
    steps.run(name, move || provider.complete(request.clone())).await
}

// ============================================================================
// Generators
// ============================================================================

/// Text of a text output item: a plain string or a list of parts
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum TextContent {
    Plain(String),
    Parts(Vec<TextPart>),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TextPart {
    #[serde(default)]
    pub text: Option<String>,
}

impl TextContent {
    /// Plain text, parts joined by a space
    pub fn to_text(&self) -> String {
        match self {
            TextContent::Plain(text) => text.clone(),
            TextContent::Parts(parts) => parts
                .iter()
                .map(|p| p.text.as_deref().unwrap_or(""))
                .collect::<Vec<_>>()
                .join(" "),
        }
    }
}

/// One item of a generator's output
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum OutputItem {
    Text { content: TextContent },
    ToolCall { name: String, arguments: String },
    /// Any item kind this crate does not interpret (images, audio, ...)
    #[serde(other)]
    Unsupported,
}

impl OutputItem {
    pub fn text(content: impl Into<String>) -> Self {
        OutputItem::Text {
            content: TextContent::Plain(content.into()),
        }
    }

    /// The items a completion yields: its text first, then its tool calls
    pub fn from_response(response: &CompletionResponse) -> Vec<OutputItem> {
        let mut items = Vec::new();
        if let Some(content) = &response.content {
            items.push(OutputItem::text(content.clone()));
        }
        items.extend(response.tool_calls.iter().map(|call| OutputItem::ToolCall {
            name: call.name.clone(),
            arguments: call.arguments.clone(),
        }));
        items
    }
}

/// Trimmed text of the first output item, or `fallback` when that item is
/// missing, not text, or blank
pub fn extract_text(output: &[OutputItem], fallback: &str) -> String {
    match output.first() {
        Some(OutputItem::Text { content }) => {
            let text = content.to_text();
            let text = text.trim();
            if text.is_empty() {
                fallback.to_string()
            } else {
                text.to_string()
            }
        }
        _ => fallback.to_string(),
    }
}

/// A single-turn agent without tools, fed one input
pub struct Generator {
    name: String,
    system_prompt: String,
    provider: Arc<dyn LlmProvider>,
    binding: ModelBinding,
}

impl Generator {
    pub fn new(name: impl Into<String>, system_prompt: impl Into<String>, provider: Arc<dyn LlmProvider>) -> Self {
        Self {
            name: name.into(),
            system_prompt: system_prompt.into(),
            provider,
            binding: ModelBinding::default(),
        }
    }

    pub fn with_binding(mut self, binding: ModelBinding) -> Self {
        self.binding = binding;
        self
    }

    pub async fn generate(&self, steps: &StepRunner, input: &str) -> Result<Vec<OutputItem>> {
        let request = self
            .binding
            .request(vec![ChatMessage::system(&self.system_prompt), ChatMessage::user(input)]);
        let response = infer(steps, &self.name, self.provider.as_ref(), &request).await?;
        Ok(OutputItem::from_response(&response))
    }
}
