//! # Run State
//!
//! The record one run mutates through its agent turns and tools. It is
//! created fresh per run, passed by reference into every tool invocation and
//! into the router's decision, and discarded when the run ends; only the
//! derived summary and files are ever persisted.

use crate::provider::ChatMessage;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Mapping of sandbox path to file content
pub type FileMap = BTreeMap<String, String>;

/// The mutable summary/files record of one run
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RunState {
    summary: String,
    files: FileMap,
    history: Vec<ConversationTurn>,
}

impl RunState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Empty summary and files, seeded with prior conversation turns (oldest first)
    pub fn with_history(history: Vec<ConversationTurn>) -> Self {
        Self {
            history,
            ..Self::default()
        }
    }

    pub fn summary(&self) -> &str {
        &self.summary
    }

    pub fn files(&self) -> &FileMap {
        &self.files
    }

    pub fn history(&self) -> &[ConversationTurn] {
        &self.history
    }

    /// The agent has signalled completion
    pub fn is_concluded(&self) -> bool {
        !self.summary.is_empty()
    }

    /// Store the completion summary. The first non-empty summary wins; later
    /// calls never replace or clear it. Returns whether the summary was set.
    pub fn record_summary(&mut self, summary: impl Into<String>) -> bool {
        let summary = summary.into();
        if self.is_concluded() || summary.is_empty() {
            return false;
        }
        self.summary = summary;
        true
    }

    /// Current files with `batch` applied on top, later entries overwriting
    /// earlier ones. Does not modify the state.
    pub fn merged_files<'a, I>(&self, batch: I) -> FileMap
    where
        I: IntoIterator<Item = (&'a str, &'a str)>,
    {
        let mut merged = self.files.clone();
        for (path, content) in batch {
            merged.insert(path.to_string(), content.to_string());
        }
        merged
    }

    /// Replace the file map with a merged map produced by [`merged_files`].
    ///
    /// Paths already present are never dropped; a map missing some of them
    /// is merged over the current files instead.
    ///
    /// [`merged_files`]: RunState::merged_files
    pub fn commit_files(&mut self, merged: FileMap) {
        if self.files.keys().all(|path| merged.contains_key(path)) {
            self.files = merged;
        } else {
            self.files.extend(merged);
        }
    }
}

/// Who authored a conversation turn
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TurnRole {
    User,
    Assistant,
}

/// One turn of prior conversation fed to the agent
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ConversationTurn {
    Text { role: TurnRole, content: String },
}

impl ConversationTurn {
    pub fn text(role: TurnRole, content: impl Into<String>) -> Self {
        ConversationTurn::Text {
            role,
            content: content.into(),
        }
    }

    pub fn role(&self) -> TurnRole {
        match self {
            ConversationTurn::Text { role, .. } => *role,
        }
    }

    pub fn content(&self) -> &str {
        match self {
            ConversationTurn::Text { content, .. } => content,
        }
    }
}

impl From<&ConversationTurn> for ChatMessage {
    fn from(turn: &ConversationTurn) -> Self {
        match turn {
            ConversationTurn::Text { role: TurnRole::User, content } => ChatMessage::user(content.clone()),
            ConversationTurn::Text { role: TurnRole::Assistant, content } => {
                ChatMessage::assistant(content.clone())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provider::Role;

    #[test]
    fn test_first_summary_wins() {
        let mut state = RunState::new();
        assert!(!state.is_concluded());

        assert!(!state.record_summary(""));
        assert!(state.record_summary("<task_summary>first</task_summary>"));
        assert!(!state.record_summary("<task_summary>second</task_summary>"));

        assert_eq!(state.summary(), "<task_summary>first</task_summary>");
    }

    #[test]
    fn test_overwrite_same_path() {
        let mut state = RunState::new();
        let merged = state.merged_files([("app/page.tsx", "A")]);
        state.commit_files(merged);
        let merged = state.merged_files([("app/page.tsx", "B")]);
        state.commit_files(merged);

        assert_eq!(state.files()["app/page.tsx"], "B");
        assert_eq!(state.files().len(), 1);
    }

    #[test]
    fn test_distinct_paths_accumulate() {
        let mut state = RunState::new();
        let merged = state.merged_files([("a.ts", "1")]);
        state.commit_files(merged);
        let merged = state.merged_files([("b.ts", "2")]);
        state.commit_files(merged);

        assert_eq!(state.files().len(), 2);
    }

    #[test]
    fn test_merged_files_does_not_mutate() {
        let state = RunState::new();
        let merged = state.merged_files([("a.ts", "1")]);
        assert_eq!(merged.len(), 1);
        assert!(state.files().is_empty());
    }

    #[test]
    fn test_commit_never_drops_paths() {
        let mut state = RunState::new();
        let merged = state.merged_files([("a.ts", "1")]);
        state.commit_files(merged);

        let mut unrelated = FileMap::new();
        unrelated.insert("b.ts".into(), "2".into());
        state.commit_files(unrelated);

        assert_eq!(state.files().len(), 2);
    }

    #[test]
    fn test_turn_wire_format() {
        let turn = ConversationTurn::text(TurnRole::Assistant, "Built it");
        let json = serde_json::to_value(&turn).unwrap();
        assert_eq!(json["type"], "text");
        assert_eq!(json["role"], "assistant");

        let msg = ChatMessage::from(&turn);
        assert_eq!(msg.role, Role::Assistant);
        assert_eq!(msg.content.as_deref(), Some("Built it"));
    }
}
