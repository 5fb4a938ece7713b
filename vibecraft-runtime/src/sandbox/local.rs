//! Local sandbox backend
//!
//! Each sandbox is a directory under a root; commands run through `sh -c`
//! with that directory as the working directory. Useful for development and
//! tests, it provides no isolation beyond the path checks on file access.

use super::{CommandEvent, CommandStream, Sandbox, SandboxService};
use crate::error::{self, Error, ErrorKind, Result};
use async_trait::async_trait;
use std::path::{Component, Path, PathBuf};
use std::process::Stdio;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::Command;
use tracing::{debug, info};

/// Provisions directory-backed sandboxes under `root`
#[derive(Debug, Clone)]
pub struct LocalSandboxService {
    root: PathBuf,
}

impl LocalSandboxService {
    pub fn new(root: impl AsRef<Path>) -> Result<Self> {
        let root = root.as_ref().to_path_buf();
        std::fs::create_dir_all(&root)
            .map_err(|e| error::io_error(format!("Failed to create sandbox root {}: {}", root.display(), e)))?;
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn sandbox_dir(&self, sandbox_id: &str) -> Option<PathBuf> {
        // ids are uuids; anything else cannot name one of our directories
        uuid::Uuid::parse_str(sandbox_id).ok()?;
        Some(self.root.join(sandbox_id))
    }
}

#[async_trait]
impl SandboxService for LocalSandboxService {
    async fn create(&self, template: &str) -> Result<Arc<dyn Sandbox>> {
        let id = uuid::Uuid::new_v4().to_string();
        let dir = self.root.join(&id);
        tokio::fs::create_dir_all(&dir).await.map_err(|e| {
            Error::provisioning_failed(template, e.to_string()).with_operation("local_sandbox::create")
        })?;

        info!(sandbox_id = %id, template, "created local sandbox");
        Ok(Arc::new(LocalSandbox { id, dir }))
    }

    async fn connect(&self, sandbox_id: &str) -> Result<Arc<dyn Sandbox>> {
        let dir = self
            .sandbox_dir(sandbox_id)
            .filter(|dir| dir.is_dir())
            .ok_or_else(|| Error::sandbox_not_found(sandbox_id).with_operation("local_sandbox::connect"))?;

        Ok(Arc::new(LocalSandbox {
            id: sandbox_id.to_string(),
            dir,
        }))
    }
}

/// A sandbox rooted at one directory
#[derive(Debug, Clone)]
pub struct LocalSandbox {
    id: String,
    dir: PathBuf,
}

impl LocalSandbox {
    /// Map a sandbox path onto the host filesystem. Absolute paths are taken
    /// relative to the sandbox root; `..` is rejected.
    fn resolve(&self, path: &str) -> Result<PathBuf> {
        let relative = Path::new(path.trim_start_matches('/'));
        let mut resolved = self.dir.clone();
        for component in relative.components() {
            match component {
                Component::Normal(part) => resolved.push(part),
                Component::CurDir => {}
                Component::ParentDir | Component::RootDir | Component::Prefix(_) => {
                    return Err(error::path_escapes_sandbox(path));
                }
            }
        }
        if resolved == self.dir {
            return Err(Error::invalid_argument("path names the sandbox root").with_context("path", path));
        }
        Ok(resolved)
    }
}

#[async_trait]
impl Sandbox for LocalSandbox {
    fn id(&self) -> &str {
        &self.id
    }

    async fn run_command(&self, command: &str) -> Result<CommandStream> {
        debug!(sandbox_id = %self.id, command, "running command");

        let mut child = Command::new("sh")
            .arg("-c")
            .arg(command)
            .current_dir(&self.dir)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| error::io_error(format!("Failed to spawn command: {}", e)).with_operation("local_sandbox::run_command"))?;

        let stdout = child.stdout.take().ok_or_else(|| Error::unexpected("child stdout not captured"))?;
        let stderr = child.stderr.take().ok_or_else(|| Error::unexpected("child stderr not captured"))?;

        let stream = async_stream::stream! {
            let mut stdout = BufReader::new(stdout).lines();
            let mut stderr = BufReader::new(stderr).lines();
            let mut stdout_open = true;
            let mut stderr_open = true;

            while stdout_open || stderr_open {
                let event = tokio::select! {
                    line = stdout.next_line(), if stdout_open => match line {
                        Ok(Some(line)) => Some(Ok(CommandEvent::Stdout(format!("{}\n", line)))),
                        Ok(None) => {
                            stdout_open = false;
                            None
                        }
                        Err(e) => {
                            stdout_open = false;
                            Some(Err(error::io_error(format!("Failed to read stdout: {}", e))))
                        }
                    },
                    line = stderr.next_line(), if stderr_open => match line {
                        Ok(Some(line)) => Some(Ok(CommandEvent::Stderr(format!("{}\n", line)))),
                        Ok(None) => {
                            stderr_open = false;
                            None
                        }
                        Err(e) => {
                            stderr_open = false;
                            Some(Err(error::io_error(format!("Failed to read stderr: {}", e))))
                        }
                    },
                };
                if let Some(event) = event {
                    yield event;
                }
            }

            match child.wait().await {
                Ok(status) => yield Ok(CommandEvent::Exit { code: status.code().unwrap_or(-1) }),
                Err(e) => yield Err(error::io_error(format!("Failed to wait for command: {}", e))),
            }
        };

        Ok(CommandStream::new(stream))
    }

    async fn write_file(&self, path: &str, content: &str) -> Result<()> {
        let target = self.resolve(path)?;
        if let Some(parent) = target.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(&target, content).await.map_err(|e| {
            error::io_error(format!("Failed to write {}: {}", path, e)).with_operation("local_sandbox::write_file")
        })
    }

    async fn read_file(&self, path: &str) -> Result<String> {
        let target = self.resolve(path)?;
        match tokio::fs::read_to_string(&target).await {
            Ok(content) => Ok(content),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(Error::new(ErrorKind::FileNotFound, format!("no such file: {}", path))
                    .with_operation("local_sandbox::read_file"))
            }
            Err(e) => Err(error::io_error(format!("Failed to read {}: {}", path, e))
                .with_operation("local_sandbox::read_file")),
        }
    }

    fn host(&self, port: u16) -> String {
        format!("localhost:{}", port)
    }

    fn preview_url(&self, port: u16) -> String {
        format!("http://{}", self.host(port))
    }

    async fn kill(&self) -> Result<()> {
        match tokio::fs::remove_dir_all(&self.dir).await {
            Ok(()) => {
                info!(sandbox_id = %self.id, "removed local sandbox");
                Ok(())
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(error::io_error(format!("Failed to remove sandbox: {}", e))
                .with_operation("local_sandbox::kill")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sandbox::CommandOutput;
    use futures_util::StreamExt;
    use tempfile::TempDir;

    async fn collect(sandbox: &dyn Sandbox, command: &str) -> CommandOutput {
        let mut stream = sandbox.run_command(command).await.unwrap();
        let mut output = CommandOutput::default();
        while let Some(event) = stream.next().await {
            output.record(event.unwrap());
        }
        output
    }

    #[tokio::test]
    async fn test_files_round_trip_through_commands() {
        let root = TempDir::new().unwrap();
        let service = LocalSandboxService::new(root.path()).unwrap();
        let sandbox = service.create("vibegourab").await.unwrap();

        sandbox.write_file("app/page.tsx", "export default 1").await.unwrap();
        assert_eq!(sandbox.read_file("/app/page.tsx").await.unwrap(), "export default 1");

        let output = collect(sandbox.as_ref(), "cat app/page.tsx; echo oops >&2; exit 3").await;
        assert_eq!(output.stdout, "export default 1\n");
        assert_eq!(output.stderr, "oops\n");
        assert_eq!(output.exit_code, Some(3));
    }

    #[tokio::test]
    async fn test_paths_cannot_escape() {
        let root = TempDir::new().unwrap();
        let service = LocalSandboxService::new(root.path()).unwrap();
        let sandbox = service.create("t").await.unwrap();

        let err = sandbox.write_file("../outside.txt", "x").await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::PermissionDenied);

        let err = sandbox.read_file("missing.txt").await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::FileNotFound);
    }

    #[tokio::test]
    async fn test_connect_and_release() {
        let root = TempDir::new().unwrap();
        let service = LocalSandboxService::new(root.path()).unwrap();
        let sandbox = service.create("t").await.unwrap();
        let id = sandbox.id().to_string();

        let again = service.connect(&id).await.unwrap();
        assert_eq!(again.id(), id);
        assert_eq!(again.preview_url(3000), "http://localhost:3000");

        service.release(&id).await.unwrap();
        service.release(&id).await.unwrap();
        sandbox.kill().await.unwrap();

        let err = service.connect(&id).await.err().unwrap();
        assert_eq!(err.kind(), ErrorKind::SandboxNotFound);
        let err = service.connect("../etc").await.err().unwrap();
        assert_eq!(err.kind(), ErrorKind::SandboxNotFound);
    }
}
