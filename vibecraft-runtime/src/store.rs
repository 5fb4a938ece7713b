//! # Message store
//!
//! Persistence for project conversations: user instructions, run results
//! with their fragment, and run errors. The orchestrator depends on two
//! operations only, [`MessageStore::find_messages`] and
//! [`MessageStore::create_message`]; insertion order is creation order.
//! A message created with an id that is already stored replaces the stored
//! one in place, so a step that saves the same message twice leaves one.

use crate::error::{self, Error, Result};
use crate::state::FileMap;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tracing::debug;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum MessageRole {
    User,
    Assistant,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum MessageType {
    Text,
    Result,
    Error,
}

/// A generated artifact: the live preview plus the files that produced it
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Fragment {
    pub id: String,
    pub sandbox_url: String,
    pub title: String,
    pub files: FileMap,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    pub id: String,
    pub project_id: String,
    pub content: String,
    pub role: MessageRole,
    #[serde(rename = "type")]
    pub kind: MessageType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fragment: Option<Fragment>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct NewFragment {
    pub sandbox_url: String,
    pub title: String,
    pub files: FileMap,
}

#[derive(Debug, Clone, PartialEq)]
pub struct NewMessage {
    /// Fixed id for the message; a fresh one is generated when absent
    pub id: Option<String>,
    pub project_id: String,
    pub content: String,
    pub role: MessageRole,
    pub kind: MessageType,
    pub fragment: Option<NewFragment>,
}

impl NewMessage {
    /// The user's instruction for a project
    pub fn user_text(project_id: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            id: None,
            project_id: project_id.into(),
            content: content.into(),
            role: MessageRole::User,
            kind: MessageType::Text,
            fragment: None,
        }
    }

    pub fn result(project_id: impl Into<String>, content: impl Into<String>, fragment: NewFragment) -> Self {
        Self {
            id: None,
            project_id: project_id.into(),
            content: content.into(),
            role: MessageRole::Assistant,
            kind: MessageType::Result,
            fragment: Some(fragment),
        }
    }

    pub fn error(project_id: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            id: None,
            project_id: project_id.into(),
            content: content.into(),
            role: MessageRole::Assistant,
            kind: MessageType::Error,
            fragment: None,
        }
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(id.into());
        self
    }

    fn into_message(self) -> Message {
        let now = Utc::now();
        Message {
            id: self.id.unwrap_or_else(|| uuid::Uuid::new_v4().to_string()),
            project_id: self.project_id,
            content: self.content,
            role: self.role,
            kind: self.kind,
            fragment: self.fragment.map(|f| Fragment {
                id: uuid::Uuid::new_v4().to_string(),
                sandbox_url: f.sandbox_url,
                title: f.title,
                files: f.files,
                created_at: now,
            }),
            created_at: now,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SortOrder {
    /// Oldest first
    Asc,
    /// Newest first
    Desc,
}

#[async_trait]
pub trait MessageStore: Send + Sync {
    /// Up to `limit` messages of a project, from the oldest or the newest end
    async fn find_messages(&self, project_id: &str, limit: usize, order: SortOrder) -> Result<Vec<Message>>;

    async fn create_message(&self, message: NewMessage) -> Result<Message>;
}

fn select(messages: &[Message], limit: usize, order: SortOrder) -> Vec<Message> {
    match order {
        SortOrder::Asc => messages.iter().take(limit).cloned().collect(),
        SortOrder::Desc => messages.iter().rev().take(limit).cloned().collect(),
    }
}

/// Replace the message with the same id, keeping its position and creation
/// time, or append
fn upsert(messages: &mut Vec<Message>, mut message: Message) -> Message {
    match messages.iter_mut().find(|m| m.id == message.id) {
        Some(existing) => {
            message.created_at = existing.created_at;
            *existing = message.clone();
        }
        None => messages.push(message.clone()),
    }
    message
}

fn validate(message: &NewMessage) -> Result<()> {
    if message.project_id.is_empty() {
        return Err(Error::invalid_argument("message has no project id").with_operation("store::create_message"));
    }
    Ok(())
}

/// Messages held in memory, per project in creation order
#[derive(Debug, Default)]
pub struct MemoryMessageStore {
    projects: Mutex<HashMap<String, Vec<Message>>>,
}

impl MemoryMessageStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn projects(&self) -> std::sync::MutexGuard<'_, HashMap<String, Vec<Message>>> {
        self.projects.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[async_trait]
impl MessageStore for MemoryMessageStore {
    async fn find_messages(&self, project_id: &str, limit: usize, order: SortOrder) -> Result<Vec<Message>> {
        Ok(self
            .projects()
            .get(project_id)
            .map(|messages| select(messages, limit, order))
            .unwrap_or_default())
    }

    async fn create_message(&self, message: NewMessage) -> Result<Message> {
        validate(&message)?;
        let message = message.into_message();
        let mut projects = self.projects();
        Ok(upsert(projects.entry(message.project_id.clone()).or_default(), message))
    }
}

/// Messages stored as one JSON document per project
pub struct FileMessageStore {
    dir: PathBuf,
    write_lock: tokio::sync::Mutex<()>,
}

impl FileMessageStore {
    pub fn new(dir: impl AsRef<Path>) -> Result<Self> {
        let dir = dir.as_ref().to_path_buf();
        std::fs::create_dir_all(&dir)
            .map_err(|e| error::io_error(format!("Failed to create message dir: {}", e)))?;
        Ok(Self {
            dir,
            write_lock: tokio::sync::Mutex::new(()),
        })
    }

    fn project_path(&self, project_id: &str) -> PathBuf {
        self.dir.join(format!("{}.json", urlencoding::encode(project_id)))
    }

    async fn load(&self, project_id: &str) -> Result<Vec<Message>> {
        let path = self.project_path(project_id);
        let content = match tokio::fs::read_to_string(&path).await {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => {
                return Err(Error::persistence_failed(format!("Failed to read {}: {}", path.display(), e))
                    .with_operation("store::load"))
            }
        };
        serde_json::from_str(&content)
            .map_err(|e| error::serialization_error(format!("{}: {}", path.display(), e)).with_operation("store::load"))
    }
}

#[async_trait]
impl MessageStore for FileMessageStore {
    async fn find_messages(&self, project_id: &str, limit: usize, order: SortOrder) -> Result<Vec<Message>> {
        let messages = self.load(project_id).await?;
        Ok(select(&messages, limit, order))
    }

    async fn create_message(&self, message: NewMessage) -> Result<Message> {
        validate(&message)?;
        let _guard = self.write_lock.lock().await;

        let mut messages = self.load(&message.project_id).await?;
        let message = upsert(&mut messages, message.into_message());

        let path = self.project_path(&message.project_id);
        let content = serde_json::to_string_pretty(&messages)
            .map_err(|e| error::serialization_error(e.to_string()).with_operation("store::create_message"))?;
        let tmp = path.with_extension("json.tmp");
        let written = async {
            tokio::fs::write(&tmp, content).await?;
            tokio::fs::rename(&tmp, &path).await
        }
        .await;
        written.map_err(|e| {
            Error::persistence_failed(format!("Failed to write {}: {}", path.display(), e))
                .with_operation("store::create_message")
        })?;

        debug!(project_id = %message.project_id, message_id = %message.id, kind = ?message.kind, "stored message");
        Ok(message)
    }
}
