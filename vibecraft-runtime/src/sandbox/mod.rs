//! # Sandbox Handle
//!
//! An ephemeral execution environment the agent works inside. A
//! [`SandboxService`] provisions sandboxes from a template and re-resolves
//! existing ones by id; a [`Sandbox`] runs shell commands with streamed
//! output and reads/writes whole files.
//!
//! ## Backends
//! - [`LocalSandboxService`]: a directory per sandbox, commands run with `sh -c`
//! - [`RemoteSandboxService`]: an HTTP sandbox API, command output over SSE

pub mod local;
pub mod remote;

pub use local::LocalSandboxService;
pub use remote::RemoteSandboxService;

use crate::error::{ErrorKind, Result};
use async_trait::async_trait;
use futures_core::Stream;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

/// Port the generated app is served on inside the sandbox
pub const DEFAULT_PREVIEW_PORT: u16 = 3000;

/// Provisions and re-resolves sandboxes
#[async_trait]
pub trait SandboxService: Send + Sync {
    /// Provision a new sandbox from `template`
    async fn create(&self, template: &str) -> Result<Arc<dyn Sandbox>>;

    /// Resolve an existing sandbox by id
    async fn connect(&self, sandbox_id: &str) -> Result<Arc<dyn Sandbox>>;

    /// Tear down the sandbox with `sandbox_id`.
    ///
    /// Safe to call on a sandbox that is already gone.
    async fn release(&self, sandbox_id: &str) -> Result<()> {
        match self.connect(sandbox_id).await {
            Ok(sandbox) => sandbox.kill().await,
            Err(e) if e.kind() == ErrorKind::SandboxNotFound => Ok(()),
            Err(e) => Err(e),
        }
    }
}

/// A handle to one sandbox
#[async_trait]
pub trait Sandbox: Send + Sync {
    fn id(&self) -> &str;

    /// Start `command` in a shell and stream its output
    async fn run_command(&self, command: &str) -> Result<CommandStream>;

    async fn write_file(&self, path: &str, content: &str) -> Result<()>;

    async fn read_file(&self, path: &str) -> Result<String>;

    /// Routable address of a service listening on `port` inside the sandbox
    fn host(&self, port: u16) -> String;

    /// Public URL for the service on `port`
    fn preview_url(&self, port: u16) -> String {
        format!("https://{}", self.host(port))
    }

    /// Destroy the sandbox. Killing twice is not an error.
    async fn kill(&self) -> Result<()>;
}

/// One piece of command output
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CommandEvent {
    Stdout(String),
    Stderr(String),
    Exit { code: i32 },
}

/// Stream of events produced by a running command, ending with `Exit`
pub struct CommandStream {
    inner: Pin<Box<dyn Stream<Item = Result<CommandEvent>> + Send>>,
}

impl CommandStream {
    pub fn new(stream: impl Stream<Item = Result<CommandEvent>> + Send + 'static) -> Self {
        Self {
            inner: Box::pin(stream),
        }
    }

    /// A stream that replays fixed events
    pub fn from_events(events: Vec<CommandEvent>) -> Self {
        Self::new(futures_util::stream::iter(events.into_iter().map(Ok)))
    }
}

impl Stream for CommandStream {
    type Item = Result<CommandEvent>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.inner.as_mut().poll_next(cx)
    }
}

/// Output accumulated from a command's events
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandOutput {
    pub stdout: String,
    pub stderr: String,
    pub exit_code: Option<i32>,
}

impl CommandOutput {
    pub fn record(&mut self, event: CommandEvent) {
        match event {
            CommandEvent::Stdout(data) => self.stdout.push_str(&data),
            CommandEvent::Stderr(data) => self.stderr.push_str(&data),
            CommandEvent::Exit { code } => self.exit_code = Some(code),
        }
    }

    /// True only for a reported exit status of zero
    pub fn succeeded(&self) -> bool {
        matches!(self.exit_code, Some(0))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures_util::StreamExt;

    #[tokio::test]
    async fn test_command_output_accumulates() {
        let mut stream = CommandStream::from_events(vec![
            CommandEvent::Stdout("a\n".into()),
            CommandEvent::Stderr("warn\n".into()),
            CommandEvent::Stdout("b\n".into()),
            CommandEvent::Exit { code: 0 },
        ]);

        let mut output = CommandOutput::default();
        while let Some(event) = stream.next().await {
            output.record(event.unwrap());
        }

        assert_eq!(output.stdout, "a\nb\n");
        assert_eq!(output.stderr, "warn\n");
        assert!(output.succeeded());
    }

    #[test]
    fn test_nonzero_exit_is_failure() {
        let mut output = CommandOutput::default();
        output.record(CommandEvent::Exit { code: 2 });
        assert!(!output.succeeded());
    }

    #[test]
    fn test_missing_exit_is_failure() {
        let mut output = CommandOutput::default();
        output.record(CommandEvent::Stdout("compiled\n".into()));
        assert!(!output.succeeded());
    }
}
