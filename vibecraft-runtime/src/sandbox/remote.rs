//! Remote sandbox backend
//!
//! Talks to a hosted sandbox API over HTTP:
//! - `POST /sandboxes` with `{"templateID": ..}` provisions a sandbox
//! - `GET /sandboxes/{id}` resolves one, `DELETE /sandboxes/{id}` destroys it
//! - `POST /sandboxes/{id}/commands` runs a command; output comes back as
//!   server-sent events whose data is `{"stdout": ..}`, `{"stderr": ..}`,
//!   `{"exit": code}` or `{"error": ..}`
//! - `PUT|GET /sandboxes/{id}/files?path=..` writes/reads whole files

use super::{CommandEvent, CommandStream, Sandbox, SandboxService};
use crate::error::{self, Error, ErrorKind, Result};
use async_trait::async_trait;
use futures_core::Stream;
use reqwest::{Client, Method, RequestBuilder, Response};
use serde::{Deserialize, Serialize};
use std::fmt::Display;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

/// Shared HTTP plumbing for the service and its sandboxes
#[derive(Clone)]
struct Endpoint {
    client: Client,
    base_url: String,
    api_key: Option<String>,
}

impl Endpoint {
    fn request(&self, method: Method, path: &str) -> RequestBuilder {
        let mut req = self
            .client
            .request(method, format!("{}{}", self.base_url.trim_end_matches('/'), path));
        if let Some(key) = &self.api_key {
            req = req.header("X-API-Key", key);
        }
        req
    }

    async fn send(&self, req: RequestBuilder, operation: &'static str) -> Result<Response> {
        req.send()
            .await
            .map_err(|e| Error::network_failed(e.to_string()).with_operation(operation))
    }
}

async fn failure(operation: &'static str, response: Response) -> Error {
    let status = response.status().as_u16();
    let body = response.text().await.unwrap_or_default();
    error::http_status(operation, status, body)
}

/// Client for a hosted sandbox API
#[derive(Clone)]
pub struct RemoteSandboxService {
    endpoint: Endpoint,
    domain: String,
}

impl RemoteSandboxService {
    pub fn new(base_url: impl Into<String>, api_key: Option<String>, domain: impl Into<String>) -> Result<Self> {
        let client = Client::builder()
            .connect_timeout(Duration::from_secs(30))
            .build()
            .map_err(|e| {
                Error::config_invalid("failed to create HTTP client")
                    .with_operation("remote_sandbox::new")
                    .set_source(e)
            })?;

        Ok(Self {
            endpoint: Endpoint {
                client,
                base_url: base_url.into(),
                api_key,
            },
            domain: domain.into(),
        })
    }

    fn handle(&self, id: String) -> Arc<dyn Sandbox> {
        Arc::new(RemoteSandbox {
            id,
            endpoint: self.endpoint.clone(),
            domain: self.domain.clone(),
        })
    }
}

#[derive(Serialize)]
struct CreateRequest<'a> {
    #[serde(rename = "templateID")]
    template_id: &'a str,
}

#[derive(Deserialize)]
struct SandboxInfo {
    #[serde(rename = "sandboxID")]
    sandbox_id: String,
}

#[async_trait]
impl SandboxService for RemoteSandboxService {
    async fn create(&self, template: &str) -> Result<Arc<dyn Sandbox>> {
        const OP: &str = "remote_sandbox::create";
        let req = self
            .endpoint
            .request(Method::POST, "/sandboxes")
            .json(&CreateRequest { template_id: template });

        let response = self
            .endpoint
            .send(req, OP)
            .await
            .map_err(|e| Error::provisioning_failed(template, e.message()).with_operation(OP).set_source(e))?;
        if !response.status().is_success() {
            let cause = failure(OP, response).await;
            return Err(Error::provisioning_failed(template, cause.message())
                .with_operation(OP)
                .set_source(cause));
        }

        let info: SandboxInfo = response
            .json()
            .await
            .map_err(|e| Error::provisioning_failed(template, e.to_string()).with_operation(OP))?;

        info!(sandbox_id = %info.sandbox_id, template, "created remote sandbox");
        Ok(self.handle(info.sandbox_id))
    }

    async fn connect(&self, sandbox_id: &str) -> Result<Arc<dyn Sandbox>> {
        const OP: &str = "remote_sandbox::connect";
        let path = format!("/sandboxes/{}", urlencoding::encode(sandbox_id));
        let response = self
            .endpoint
            .send(self.endpoint.request(Method::GET, &path), OP)
            .await?;

        match response.status().as_u16() {
            200..=299 => Ok(self.handle(sandbox_id.to_string())),
            404 => Err(Error::sandbox_not_found(sandbox_id).with_operation(OP)),
            _ => Err(failure(OP, response).await.with_context("sandbox_id", sandbox_id)),
        }
    }
}

/// A sandbox hosted by the remote API
pub struct RemoteSandbox {
    id: String,
    endpoint: Endpoint,
    domain: String,
}

impl RemoteSandbox {
    fn path(&self, suffix: &str) -> String {
        format!("/sandboxes/{}{}", urlencoding::encode(&self.id), suffix)
    }

    fn file_path(&self, path: &str) -> String {
        self.path(&format!("/files?path={}", urlencoding::encode(path)))
    }
}

#[derive(Serialize)]
struct CommandRequest<'a> {
    cmd: &'a str,
}

/// Data payload of one command output event
#[derive(Debug, Deserialize)]
#[serde(rename_all = "lowercase")]
enum WireEvent {
    Stdout(String),
    Stderr(String),
    Exit(i32),
    Error(String),
}

impl WireEvent {
    fn into_event(self) -> Result<CommandEvent> {
        match self {
            WireEvent::Stdout(data) => Ok(CommandEvent::Stdout(data)),
            WireEvent::Stderr(data) => Ok(CommandEvent::Stderr(data)),
            WireEvent::Exit(code) => Ok(CommandEvent::Exit { code }),
            WireEvent::Error(message) => Err(Error::unexpected(message).with_operation("remote_sandbox::command")),
        }
    }
}

/// Pull every complete SSE event out of `buffer`, leaving any partial tail.
///
/// Only complete events are decoded, so a character split across network
/// chunks stays intact.
fn drain_events(buffer: &mut Vec<u8>) -> Vec<Result<CommandEvent>> {
    let mut events = Vec::new();
    while let Some(pos) = buffer.windows(2).position(|w| w == b"\n\n") {
        let raw: Vec<u8> = buffer.drain(..pos + 2).collect();
        let event = String::from_utf8_lossy(&raw[..pos]);

        for line in event.lines() {
            if let Some(data) = line.strip_prefix("data: ") {
                match serde_json::from_str::<WireEvent>(data) {
                    Ok(wire) => events.push(wire.into_event()),
                    Err(e) => events.push(Err(Error::parse_failed(format!("bad command event: {}", e))
                        .with_operation("remote_sandbox::command"))),
                }
            }
        }
    }
    events
}

/// Decode a body of SSE chunks into command events.
///
/// The stream ends after `Exit`; a body that ends before it yields an error.
fn command_events<S, B, E>(chunks: S) -> CommandStream
where
    S: Stream<Item = std::result::Result<B, E>> + Send + 'static,
    B: AsRef<[u8]> + Send + 'static,
    E: Display + Send + 'static,
{
    const OP: &str = "remote_sandbox::run_command";

    CommandStream::new(async_stream::stream! {
        use futures_util::StreamExt;

        let mut chunks = Box::pin(chunks);
        let mut buffer = Vec::new();

        while let Some(chunk) = chunks.next().await {
            match chunk {
                Ok(bytes) => {
                    buffer.extend_from_slice(bytes.as_ref());
                    for event in drain_events(&mut buffer) {
                        let done = matches!(event, Ok(CommandEvent::Exit { .. }));
                        yield event;
                        if done {
                            return;
                        }
                    }
                }
                Err(e) => {
                    yield Err(Error::network_failed(e.to_string()).with_operation(OP));
                    return;
                }
            }
        }
        yield Err(Error::network_failed("command stream ended without an exit status").with_operation(OP));
    })
}

#[async_trait]
impl Sandbox for RemoteSandbox {
    fn id(&self) -> &str {
        &self.id
    }

    async fn run_command(&self, command: &str) -> Result<CommandStream> {
        const OP: &str = "remote_sandbox::run_command";
        debug!(sandbox_id = %self.id, command, "running remote command");

        let req = self
            .endpoint
            .request(Method::POST, &self.path("/commands"))
            .header("Accept", "text/event-stream")
            .json(&CommandRequest { cmd: command });
        let response = self.endpoint.send(req, OP).await?;
        if !response.status().is_success() {
            return Err(failure(OP, response).await);
        }

        Ok(command_events(response.bytes_stream()))
    }

    async fn write_file(&self, path: &str, content: &str) -> Result<()> {
        const OP: &str = "remote_sandbox::write_file";
        let req = self
            .endpoint
            .request(Method::PUT, &self.file_path(path))
            .body(content.to_string());
        let response = self.endpoint.send(req, OP).await?;
        if !response.status().is_success() {
            return Err(failure(OP, response).await.with_context("path", path));
        }
        Ok(())
    }

    async fn read_file(&self, path: &str) -> Result<String> {
        const OP: &str = "remote_sandbox::read_file";
        let response = self
            .endpoint
            .send(self.endpoint.request(Method::GET, &self.file_path(path)), OP)
            .await?;

        match response.status().as_u16() {
            200..=299 => response
                .text()
                .await
                .map_err(|e| Error::network_failed(e.to_string()).with_operation(OP)),
            404 => Err(Error::new(ErrorKind::FileNotFound, format!("no such file: {}", path)).with_operation(OP)),
            _ => Err(failure(OP, response).await.with_context("path", path)),
        }
    }

    fn host(&self, port: u16) -> String {
        format!("{}-{}.{}", port, self.id, self.domain)
    }

    async fn kill(&self) -> Result<()> {
        const OP: &str = "remote_sandbox::kill";
        let response = self
            .endpoint
            .send(self.endpoint.request(Method::DELETE, &self.path("")), OP)
            .await?;

        match response.status().as_u16() {
            200..=299 | 404 => {
                info!(sandbox_id = %self.id, "killed remote sandbox");
                Ok(())
            }
            _ => Err(failure(OP, response).await.with_context("sandbox_id", self.id.clone())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sandbox(id: &str) -> RemoteSandbox {
        let service = RemoteSandboxService::new("https://api.sandbox.test/", None, "sandbox.test").unwrap();
        RemoteSandbox {
            id: id.into(),
            endpoint: service.endpoint,
            domain: service.domain,
        }
    }

    #[test]
    fn test_host_and_preview_url() {
        let sbx = sandbox("i3k9");
        assert_eq!(sbx.host(3000), "3000-i3k9.sandbox.test");
        assert_eq!(sbx.preview_url(3000), "https://3000-i3k9.sandbox.test");
    }

    #[test]
    fn test_file_path_is_encoded() {
        let sbx = sandbox("i3k9");
        assert_eq!(
            sbx.file_path("app/my page.tsx"),
            "/sandboxes/i3k9/files?path=app%2Fmy%20page.tsx"
        );
    }

    #[test]
    fn test_drain_events_keeps_partial_tail() {
        let mut buffer = b"data: {\"stdout\":\"hi\\n\"}\n\ndata: {\"stderr\":\"w\"}\n\ndata: {\"exit\":".to_vec();
        let events = drain_events(&mut buffer);

        assert_eq!(events.len(), 2);
        assert_eq!(events[0].as_ref().unwrap(), &CommandEvent::Stdout("hi\n".into()));
        assert_eq!(events[1].as_ref().unwrap(), &CommandEvent::Stderr("w".into()));
        assert_eq!(buffer, b"data: {\"exit\":");

        buffer.extend_from_slice(b"1}\n\n");
        let events = drain_events(&mut buffer);
        assert_eq!(events[0].as_ref().unwrap(), &CommandEvent::Exit { code: 1 });
        assert!(buffer.is_empty());
    }

    #[test]
    fn test_error_event_becomes_error() {
        let mut buffer = b"data: {\"error\":\"process killed\"}\n\n".to_vec();
        let events = drain_events(&mut buffer);
        assert_eq!(events[0].as_ref().unwrap_err().message(), "process killed");
    }

    async fn collect(chunks: Vec<&'static [u8]>) -> Vec<Result<CommandEvent>> {
        use futures_util::StreamExt;
        let body = futures_util::stream::iter(chunks.into_iter().map(Ok::<_, std::io::Error>));
        command_events(body).collect().await
    }

    #[tokio::test]
    async fn test_character_split_across_chunks() {
        let event = "data: {\"stdout\":\"✓ done\"}\n\ndata: {\"exit\":0}\n\n".as_bytes();
        let split = event.iter().position(|&b| b == 0xE2).unwrap() + 1;
        let (head, tail) = event.split_at(split);

        let events = collect(vec![head, tail]).await;
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].as_ref().unwrap(), &CommandEvent::Stdout("✓ done".into()));
        assert_eq!(events[1].as_ref().unwrap(), &CommandEvent::Exit { code: 0 });
    }

    #[tokio::test]
    async fn test_body_without_exit_is_an_error() {
        let events = collect(vec![&b"data: {\"stdout\":\"building\"}\n\n"[..]]).await;
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].as_ref().unwrap(), &CommandEvent::Stdout("building".into()));
        let err = events[1].as_ref().unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NetworkFailed);
    }

    #[tokio::test]
    async fn test_events_after_exit_are_ignored() {
        let events = collect(vec![&b"data: {\"exit\":2}\n\ndata: {\"stdout\":\"late\"}\n\n"[..]]).await;
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].as_ref().unwrap(), &CommandEvent::Exit { code: 2 });
    }
}
