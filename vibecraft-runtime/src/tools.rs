//! # Tool Executor
//!
//! The three tools the coding agent can call, each backed by sandbox
//! operations and executed as a durable step:
//!
//! | tool                  | arguments                       | result                          |
//! |-----------------------|---------------------------------|---------------------------------|
//! | `terminal`            | `command`                       | stdout                          |
//! | `createOrUpdateFiles` | `files: [{path, content}]`      | confirmation, files merged      |
//! | `readFiles`           | `files: [path]`                 | JSON list of `{path, content}`  |
//!
//! A failing sandbox operation never aborts the run: it becomes a
//! [`ToolFailure`] whose text is handed back to the agent. Only a sandbox
//! that no longer exists and failures to journal a step surface as errors.
//! Retryable connect errors are retried by the step first.
//!
//! Every call re-resolves the sandbox by id, so a replayed step never
//! depends on a handle captured by an earlier attempt.

use crate::error::{Error, ErrorKind, Result};
use crate::provider::{ToolCall, ToolDefinition};
use crate::sandbox::{CommandOutput, Sandbox, SandboxService};
use crate::state::{FileMap, RunState};
use crate::steps::StepRunner;
use futures_util::StreamExt;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::fmt;
use std::sync::Arc;
use tracing::{debug, warn};

pub const TERMINAL: &str = "terminal";
pub const CREATE_OR_UPDATE_FILES: &str = "createOrUpdateFiles";
pub const READ_FILES: &str = "readFiles";

/// Durable step names the tools journal under
const TERMINAL_STEP: &str = "terminal";
const WRITE_STEP: &str = "create-or-update-files";
const READ_STEP: &str = "read-files";

/// Result of one tool call as the agent sees it
pub type ToolOutcome = std::result::Result<String, ToolFailure>;

/// A recoverable tool failure, reported to the agent as text
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolFailure {
    pub tool: String,
    pub message: String,
}

impl ToolFailure {
    pub fn new(tool: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            tool: tool.into(),
            message: message.into(),
        }
    }
}

impl fmt::Display for ToolFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.message)
    }
}

/// One file to write
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileWrite {
    pub path: String,
    pub content: String,
}

/// One file read back from the sandbox
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileContent {
    pub path: String,
    pub content: String,
}

/// A parsed tool call
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ToolInvocation {
    Terminal { command: String },
    CreateOrUpdateFiles { files: Vec<FileWrite> },
    ReadFiles { files: Vec<String> },
}

#[derive(Deserialize)]
struct TerminalArgs {
    command: String,
}

#[derive(Deserialize)]
struct WriteArgs {
    files: Vec<FileWrite>,
}

#[derive(Deserialize)]
struct ReadArgs {
    files: Vec<String>,
}

impl ToolInvocation {
    /// Parse a model tool call. Unknown tools and malformed arguments are
    /// failures the agent can correct.
    pub fn parse(call: &ToolCall) -> std::result::Result<Self, ToolFailure> {
        let bad_args = |e: serde_json::Error| {
            ToolFailure::new(call.name.clone(), format!("Error: invalid arguments for {}: {}", call.name, e))
        };
        match call.name.as_str() {
            TERMINAL => call
                .parse_arguments::<TerminalArgs>()
                .map(|args| ToolInvocation::Terminal { command: args.command })
                .map_err(bad_args),
            CREATE_OR_UPDATE_FILES => call
                .parse_arguments::<WriteArgs>()
                .map(|args| ToolInvocation::CreateOrUpdateFiles { files: args.files })
                .map_err(bad_args),
            READ_FILES => call
                .parse_arguments::<ReadArgs>()
                .map(|args| ToolInvocation::ReadFiles { files: args.files })
                .map_err(bad_args),
            other => Err(ToolFailure::new(other, format!("Error: unknown tool '{}'", other))),
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            ToolInvocation::Terminal { .. } => TERMINAL,
            ToolInvocation::CreateOrUpdateFiles { .. } => CREATE_OR_UPDATE_FILES,
            ToolInvocation::ReadFiles { .. } => READ_FILES,
        }
    }
}

/// Everything a tool call may touch during one run
pub struct ToolContext<'a> {
    pub steps: &'a StepRunner,
    pub sandboxes: &'a dyn SandboxService,
    pub sandbox_id: &'a str,
    pub state: &'a mut RunState,
}

/// The fixed tool set of the coding agent
#[derive(Debug, Clone, Copy, Default)]
pub struct ToolKit;

impl ToolKit {
    pub fn new() -> Self {
        Self
    }

    /// Schemas advertised to the model
    pub fn definitions(&self) -> Vec<ToolDefinition> {
        vec![
            ToolDefinition::new(TERMINAL, "Use the terminal to run commands").with_parameters(json!({
                "type": "object",
                "properties": {
                    "command": { "type": "string" }
                },
                "required": ["command"]
            })),
            ToolDefinition::new(CREATE_OR_UPDATE_FILES, "Create or update files in the sandbox").with_parameters(
                json!({
                    "type": "object",
                    "properties": {
                        "files": {
                            "type": "array",
                            "items": {
                                "type": "object",
                                "properties": {
                                    "path": { "type": "string" },
                                    "content": { "type": "string" }
                                },
                                "required": ["path", "content"]
                            }
                        }
                    },
                    "required": ["files"]
                }),
            ),
            ToolDefinition::new(READ_FILES, "Read files from the sandbox").with_parameters(json!({
                "type": "object",
                "properties": {
                    "files": {
                        "type": "array",
                        "items": { "type": "string" }
                    }
                },
                "required": ["files"]
            })),
        ]
    }

    /// Execute one tool call as a durable step
    pub async fn execute(&self, ctx: &mut ToolContext<'_>, call: &ToolCall) -> Result<ToolOutcome> {
        let invocation = match ToolInvocation::parse(call) {
            Ok(invocation) => invocation,
            Err(failure) => {
                warn!(tool = %call.name, error = %failure, "rejected tool call");
                return Ok(Err(failure));
            }
        };
        debug!(tool = invocation.name(), sandbox_id = ctx.sandbox_id, "executing tool");

        let outcome = match &invocation {
            ToolInvocation::Terminal { command } => terminal(ctx, command).await?,
            ToolInvocation::CreateOrUpdateFiles { files } => create_or_update_files(ctx, files).await?,
            ToolInvocation::ReadFiles { files } => read_files(ctx, files).await?,
        };

        if let Err(failure) = &outcome {
            warn!(tool = invocation.name(), sandbox_id = ctx.sandbox_id, error = %failure, "tool failed");
        }
        Ok(outcome)
    }
}

fn command_failure(cause: impl fmt::Display, output: &CommandOutput) -> ToolFailure {
    ToolFailure::new(
        TERMINAL,
        format!("Command failed: {}\nstdout: {}\nstderr: {}", cause, output.stdout, output.stderr),
    )
}

/// How `tool` reports a sandbox error to the agent
fn sandbox_failure(tool: &'static str, e: &Error) -> ToolFailure {
    match tool {
        TERMINAL => command_failure(e, &CommandOutput::default()),
        CREATE_OR_UPDATE_FILES => ToolFailure::new(tool, format!("Error creating or updating files: {}", e)),
        _ => ToolFailure::new(tool, format!("Error reading files: {}", e)),
    }
}

/// Resolve the sandbox for one tool call.
///
/// A missing sandbox and retryable errors stay errors; anything else is a
/// failure for the agent.
async fn connect(
    sandboxes: &dyn SandboxService,
    sandbox_id: &str,
    tool: &'static str,
) -> Result<std::result::Result<Arc<dyn Sandbox>, ToolFailure>> {
    match sandboxes.connect(sandbox_id).await {
        Ok(sandbox) => Ok(Ok(sandbox)),
        Err(e) if e.kind() == ErrorKind::SandboxNotFound || e.is_retryable() => Err(e),
        Err(e) => Ok(Err(sandbox_failure(tool, &e))),
    }
}

/// Turn a connect error that outlived its retries into a failure
fn settle<T>(
    tool: &'static str,
    result: Result<std::result::Result<T, ToolFailure>>,
) -> Result<std::result::Result<T, ToolFailure>> {
    match result {
        Err(e) if e.kind().is_retryable() => Ok(Err(sandbox_failure(tool, &e))),
        other => other,
    }
}

async fn terminal(ctx: &ToolContext<'_>, command: &str) -> Result<ToolOutcome> {
    let sandboxes = ctx.sandboxes;
    let sandbox_id = ctx.sandbox_id;
    let result = ctx
        .steps
        .run(TERMINAL_STEP, move || run_terminal(sandboxes, sandbox_id, command))
        .await;
    settle(TERMINAL, result)
}

async fn run_terminal(sandboxes: &dyn SandboxService, sandbox_id: &str, command: &str) -> Result<ToolOutcome> {
    let sandbox = match connect(sandboxes, sandbox_id, TERMINAL).await? {
        Ok(sandbox) => sandbox,
        Err(failure) => return Ok(Err(failure)),
    };
    let mut output = CommandOutput::default();

    let cause = match collect_output(sandbox.as_ref(), command, &mut output).await {
        Ok(()) if output.succeeded() => return Ok(Ok(output.stdout)),
        Ok(()) => match output.exit_code {
            Some(code) => format!("exit status {}", code),
            None => "command ended without an exit status".to_string(),
        },
        Err(e) => e.to_string(),
    };
    Ok(Err(command_failure(cause, &output)))
}

/// Drain a command's events into `output`, keeping what arrived before any error
async fn collect_output(sandbox: &dyn Sandbox, command: &str, output: &mut CommandOutput) -> Result<()> {
    let mut stream = sandbox.run_command(command).await?;
    while let Some(event) = stream.next().await {
        output.record(event?);
    }
    Ok(())
}

async fn create_or_update_files(ctx: &mut ToolContext<'_>, files: &[FileWrite]) -> Result<ToolOutcome> {
    let sandboxes = ctx.sandboxes;
    let sandbox_id = ctx.sandbox_id;
    let state: &RunState = ctx.state;

    // the step yields the merged map; it is committed only once the whole batch is written
    let result = ctx
        .steps
        .run(WRITE_STEP, move || write_batch(sandboxes, sandbox_id, state, files))
        .await;
    let merged = settle(CREATE_OR_UPDATE_FILES, result)?;

    Ok(merged.map(|merged| {
        ctx.state.commit_files(merged);
        let paths: Vec<&str> = files.iter().map(|f| f.path.as_str()).collect();
        format!("Files updated successfully: {}", paths.join(", "))
    }))
}

async fn write_batch(
    sandboxes: &dyn SandboxService,
    sandbox_id: &str,
    state: &RunState,
    files: &[FileWrite],
) -> Result<std::result::Result<FileMap, ToolFailure>> {
    let sandbox = match connect(sandboxes, sandbox_id, CREATE_OR_UPDATE_FILES).await? {
        Ok(sandbox) => sandbox,
        Err(failure) => return Ok(Err(failure)),
    };
    for file in files {
        if let Err(e) = sandbox.write_file(&file.path, &file.content).await {
            return Ok(Err(ToolFailure::new(CREATE_OR_UPDATE_FILES, format!("Error creating or updating files: {}", e))));
        }
    }
    Ok(Ok(state.merged_files(files.iter().map(|f| (f.path.as_str(), f.content.as_str())))))
}

async fn read_files(ctx: &ToolContext<'_>, paths: &[String]) -> Result<ToolOutcome> {
    let sandboxes = ctx.sandboxes;
    let sandbox_id = ctx.sandbox_id;
    let result = ctx
        .steps
        .run(READ_STEP, move || read_batch(sandboxes, sandbox_id, paths))
        .await;
    settle(READ_FILES, result)
}

async fn read_batch(sandboxes: &dyn SandboxService, sandbox_id: &str, paths: &[String]) -> Result<ToolOutcome> {
    let sandbox = match connect(sandboxes, sandbox_id, READ_FILES).await? {
        Ok(sandbox) => sandbox,
        Err(failure) => return Ok(Err(failure)),
    };
    let mut contents = Vec::with_capacity(paths.len());
    for path in paths {
        match sandbox.read_file(path).await {
            Ok(content) => contents.push(FileContent {
                path: path.clone(),
                content,
            }),
            Err(e) => return Ok(Err(ToolFailure::new(READ_FILES, format!("Error reading files: {}", e)))),
        }
    }
    Ok(serde_json::to_string(&contents).map_err(|e| ToolFailure::new(READ_FILES, format!("Error reading files: {}", e))))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sandbox::{CommandEvent, CommandStream};
    use crate::steps::RetryPolicy;
    use std::time::Duration;
    use async_trait::async_trait;
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{Arc, Mutex};

    /// Files live in a shared map; paths containing "readonly" refuse writes
    #[derive(Default)]
    struct FakeSandbox {
        files: Mutex<HashMap<String, String>>,
        writes: AtomicUsize,
        commands: AtomicUsize,
    }

    #[async_trait]
    impl Sandbox for FakeSandbox {
        fn id(&self) -> &str {
            "sbx_fake"
        }

        async fn run_command(&self, command: &str) -> Result<CommandStream> {
            self.commands.fetch_add(1, Ordering::SeqCst);
            let events = match command {
                "npm run dev" => vec![CommandEvent::Stdout("ready on 3000\n".into())],
                "npm run build" => vec![
                    CommandEvent::Stdout("building\n".into()),
                    CommandEvent::Stderr("Module not found\n".into()),
                    CommandEvent::Exit { code: 1 },
                ],
                _ => vec![CommandEvent::Stdout("ok\n".into()), CommandEvent::Exit { code: 0 }],
            };
            Ok(CommandStream::from_events(events))
        }

        async fn write_file(&self, path: &str, content: &str) -> Result<()> {
            if path.contains("readonly") {
                return Err(Error::new(ErrorKind::PermissionDenied, format!("{} is read-only", path)));
            }
            self.writes.fetch_add(1, Ordering::SeqCst);
            self.files.lock().unwrap().insert(path.into(), content.into());
            Ok(())
        }

        async fn read_file(&self, path: &str) -> Result<String> {
            self.files
                .lock()
                .unwrap()
                .get(path)
                .cloned()
                .ok_or_else(|| Error::new(ErrorKind::FileNotFound, format!("no such file: {}", path)))
        }

        fn host(&self, port: u16) -> String {
            format!("{}-sbx_fake.test", port)
        }

        async fn kill(&self) -> Result<()> {
            Ok(())
        }
    }

    struct FakeService(Arc<FakeSandbox>);

    #[async_trait]
    impl SandboxService for FakeService {
        async fn create(&self, _template: &str) -> Result<Arc<dyn Sandbox>> {
            Ok(self.0.clone())
        }

        async fn connect(&self, sandbox_id: &str) -> Result<Arc<dyn Sandbox>> {
            if sandbox_id == "sbx_fake" {
                Ok(self.0.clone())
            } else {
                Err(Error::sandbox_not_found(sandbox_id))
            }
        }
    }

    /// Every connect fails with the same kind of error
    struct BrokenService {
        kind: ErrorKind,
        connects: AtomicUsize,
    }

    impl BrokenService {
        fn new(kind: ErrorKind) -> Self {
            Self {
                kind,
                connects: AtomicUsize::new(0),
            }
        }
    }

    #[async_trait]
    impl SandboxService for BrokenService {
        async fn create(&self, _template: &str) -> Result<Arc<dyn Sandbox>> {
            Err(Error::new(self.kind, "sandbox api unavailable"))
        }

        async fn connect(&self, _sandbox_id: &str) -> Result<Arc<dyn Sandbox>> {
            self.connects.fetch_add(1, Ordering::SeqCst);
            Err(Error::new(self.kind, "sandbox api unavailable"))
        }
    }

    fn call(name: &str, arguments: serde_json::Value) -> ToolCall {
        ToolCall {
            id: "call_1".into(),
            name: name.into(),
            arguments: arguments.to_string(),
        }
    }

    fn write_call(paths: &[(&str, &str)]) -> ToolCall {
        let files: Vec<_> = paths.iter().map(|(p, c)| json!({"path": p, "content": c})).collect();
        call(CREATE_OR_UPDATE_FILES, json!({ "files": files }))
    }

    #[tokio::test]
    async fn test_write_batch_commits_to_state() {
        let service = FakeService(Arc::new(FakeSandbox::default()));
        let steps = StepRunner::in_memory();
        let mut state = RunState::new();
        let mut ctx = ToolContext {
            steps: &steps,
            sandboxes: &service,
            sandbox_id: "sbx_fake",
            state: &mut state,
        };

        let outcome = ToolKit::new()
            .execute(&mut ctx, &write_call(&[("app/page.tsx", "A"), ("app/layout.tsx", "L")]))
            .await
            .unwrap();
        assert_eq!(outcome.unwrap(), "Files updated successfully: app/page.tsx, app/layout.tsx");

        ToolKit::new()
            .execute(&mut ctx, &write_call(&[("app/page.tsx", "B")]))
            .await
            .unwrap()
            .unwrap();

        assert_eq!(state.files().len(), 2);
        assert_eq!(state.files()["app/page.tsx"], "B");
    }

    #[tokio::test]
    async fn test_partial_batch_failure_leaves_state_unchanged() {
        let service = FakeService(Arc::new(FakeSandbox::default()));
        let steps = StepRunner::in_memory();
        let mut state = RunState::new();
        let mut ctx = ToolContext {
            steps: &steps,
            sandboxes: &service,
            sandbox_id: "sbx_fake",
            state: &mut state,
        };
        ToolKit::new().execute(&mut ctx, &write_call(&[("a.ts", "1")])).await.unwrap().unwrap();

        let failure = ToolKit::new()
            .execute(
                &mut ctx,
                &write_call(&[("b.ts", "2"), ("readonly/c.ts", "3"), ("readonly/d.ts", "4")]),
            )
            .await
            .unwrap()
            .unwrap_err();

        assert!(failure.message.starts_with("Error creating or updating files: "));
        assert!(failure.message.contains("read-only"));
        assert_eq!(state.files().len(), 1);
        assert_eq!(state.files()["a.ts"], "1");
    }

    #[tokio::test]
    async fn test_terminal_failure_carries_output() {
        let service = FakeService(Arc::new(FakeSandbox::default()));
        let steps = StepRunner::in_memory();
        let mut state = RunState::new();
        let mut ctx = ToolContext {
            steps: &steps,
            sandboxes: &service,
            sandbox_id: "sbx_fake",
            state: &mut state,
        };

        let ok = ToolKit::new()
            .execute(&mut ctx, &call(TERMINAL, json!({"command": "npm install"})))
            .await
            .unwrap();
        assert_eq!(ok.unwrap(), "ok\n");

        let failure = ToolKit::new()
            .execute(&mut ctx, &call(TERMINAL, json!({"command": "npm run build"})))
            .await
            .unwrap()
            .unwrap_err();
        assert_eq!(
            failure.message,
            "Command failed: exit status 1\nstdout: building\n\nstderr: Module not found\n"
        );

        let failure = ToolKit::new()
            .execute(&mut ctx, &call(TERMINAL, json!({"command": "npm run dev"})))
            .await
            .unwrap()
            .unwrap_err();
        assert_eq!(
            failure.message,
            "Command failed: command ended without an exit status\nstdout: ready on 3000\n\nstderr: "
        );
    }

    #[tokio::test]
    async fn test_read_files_returns_json() {
        let sandbox = Arc::new(FakeSandbox::default());
        sandbox.files.lock().unwrap().insert("app/page.tsx".into(), "hello".into());
        let service = FakeService(sandbox);
        let steps = StepRunner::in_memory();
        let mut state = RunState::new();
        let mut ctx = ToolContext {
            steps: &steps,
            sandboxes: &service,
            sandbox_id: "sbx_fake",
            state: &mut state,
        };

        let output = ToolKit::new()
            .execute(&mut ctx, &call(READ_FILES, json!({"files": ["app/page.tsx"]})))
            .await
            .unwrap()
            .unwrap();
        let parsed: Vec<FileContent> = serde_json::from_str(&output).unwrap();
        assert_eq!(parsed, vec![FileContent { path: "app/page.tsx".into(), content: "hello".into() }]);

        let failure = ToolKit::new()
            .execute(&mut ctx, &call(READ_FILES, json!({"files": ["missing.ts"]})))
            .await
            .unwrap()
            .unwrap_err();
        assert!(failure.message.contains("no such file: missing.ts"));
        assert!(state.files().is_empty());
    }

    #[tokio::test]
    async fn test_bad_calls_become_failures() {
        let service = FakeService(Arc::new(FakeSandbox::default()));
        let steps = StepRunner::in_memory();
        let mut state = RunState::new();
        let mut ctx = ToolContext {
            steps: &steps,
            sandboxes: &service,
            sandbox_id: "sbx_fake",
            state: &mut state,
        };

        let failure = ToolKit::new()
            .execute(&mut ctx, &call("deploy", json!({})))
            .await
            .unwrap()
            .unwrap_err();
        assert_eq!(failure.message, "Error: unknown tool 'deploy'");

        let failure = ToolKit::new()
            .execute(&mut ctx, &call(TERMINAL, json!({"cmd": "ls"})))
            .await
            .unwrap()
            .unwrap_err();
        assert!(failure.message.starts_with("Error: invalid arguments for terminal"));
        assert!(steps.completed_steps().is_empty());
    }

    #[tokio::test]
    async fn test_missing_sandbox_is_an_error() {
        let service = FakeService(Arc::new(FakeSandbox::default()));
        let steps = StepRunner::in_memory().with_retry(crate::steps::RetryPolicy::no_retry());
        let mut state = RunState::new();
        let mut ctx = ToolContext {
            steps: &steps,
            sandboxes: &service,
            sandbox_id: "sbx_gone",
            state: &mut state,
        };

        let err = ToolKit::new()
            .execute(&mut ctx, &call(TERMINAL, json!({"command": "ls"})))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::SandboxNotFound);
    }

    #[tokio::test]
    async fn test_connect_error_becomes_failure() {
        let service = BrokenService::new(ErrorKind::Unexpected);
        let steps = StepRunner::in_memory().with_retry(RetryPolicy::no_retry());
        let mut state = RunState::new();
        let mut ctx = ToolContext {
            steps: &steps,
            sandboxes: &service,
            sandbox_id: "sbx_fake",
            state: &mut state,
        };

        let failure = ToolKit::new()
            .execute(&mut ctx, &call(TERMINAL, json!({"command": "ls"})))
            .await
            .unwrap()
            .unwrap_err();
        assert!(failure.message.starts_with("Command failed: "));
        assert!(failure.message.contains("sandbox api unavailable"));

        let failure = ToolKit::new()
            .execute(&mut ctx, &write_call(&[("a.ts", "1")]))
            .await
            .unwrap()
            .unwrap_err();
        assert!(failure.message.starts_with("Error creating or updating files: "));
        assert!(state.files().is_empty());
    }

    #[tokio::test]
    async fn test_retryable_connect_error_retries_then_fails() {
        let service = BrokenService::new(ErrorKind::NetworkFailed);
        let steps = StepRunner::in_memory().with_retry(RetryPolicy {
            max_attempts: 2,
            backoff: Duration::ZERO,
        });
        let mut state = RunState::new();
        let mut ctx = ToolContext {
            steps: &steps,
            sandboxes: &service,
            sandbox_id: "sbx_fake",
            state: &mut state,
        };

        let failure = ToolKit::new()
            .execute(&mut ctx, &call(READ_FILES, json!({"files": ["app/page.tsx"]})))
            .await
            .unwrap()
            .unwrap_err();
        assert!(failure.message.starts_with("Error reading files: "));
        assert_eq!(service.connects.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_replayed_tool_step_does_not_touch_sandbox() {
        let sandbox = Arc::new(FakeSandbox::default());
        let service = FakeService(sandbox.clone());
        let storage_dir = tempfile::TempDir::new().unwrap();

        for _ in 0..2 {
            let steps = StepRunner::new("run_tools", crate::storage::Storage::file(storage_dir.path()).unwrap());
            let mut state = RunState::new();
            let mut ctx = ToolContext {
                steps: &steps,
                sandboxes: &service,
                sandbox_id: "sbx_fake",
                state: &mut state,
            };
            ToolKit::new().execute(&mut ctx, &write_call(&[("a.ts", "1")])).await.unwrap().unwrap();
            ToolKit::new()
                .execute(&mut ctx, &call(TERMINAL, json!({"command": "ls"})))
                .await
                .unwrap()
                .unwrap();
            assert_eq!(state.files()["a.ts"], "1");
        }

        assert_eq!(sandbox.writes.load(Ordering::SeqCst), 1);
        assert_eq!(sandbox.commands.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_definitions_cover_every_tool() {
        let names: Vec<String> = ToolKit::new().definitions().into_iter().map(|d| d.name).collect();
        assert_eq!(names, vec![TERMINAL, CREATE_OR_UPDATE_FILES, READ_FILES]);
    }
}
