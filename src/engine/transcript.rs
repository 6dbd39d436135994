//! Transcript reconciliation and conversation storage.
//!
//! Transcription arrives as independent incremental fragments per role.
//! The reconciler merges them into a stable ordered log: fragments append
//! to the currently-open item of their role, a role switch closes the
//! previous open item, and session close finalizes open model items.
//! Persistence is externalized behind `TranscriptStore`.

use crate::defaults;
use crate::live::message::SourceRef;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Who produced a transcript item.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Model,
}

/// Streaming status of a transcript item.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ItemStatus {
    Streaming,
    Complete,
    Error,
}

/// One message in the transcript log.
///
/// Text is append-only while the item streams; role never changes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TranscriptItem {
    pub id: String,
    pub role: Role,
    pub text: String,
    pub timestamp: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub sources: Vec<SourceRef>,
    pub status: ItemStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl TranscriptItem {
    fn new(role: Role, text: &str, status: ItemStatus) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            role,
            text: text.to_string(),
            timestamp: now_timestamp(),
            sources: Vec::new(),
            status,
            error: None,
        }
    }
}

/// Wall-clock HH:MM stamp shown next to items.
fn now_timestamp() -> String {
    chrono::Local::now().format("%H:%M").to_string()
}

/// An ordered transcript with identity and housekeeping timestamps.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Conversation {
    pub id: String,
    pub title: String,
    pub messages: Vec<TranscriptItem>,
    pub created_at: String,
    pub updated_at: String,
}

impl Conversation {
    pub fn new() -> Self {
        let now = chrono::Utc::now().to_rfc3339();
        Self {
            id: Uuid::new_v4().to_string(),
            title: defaults::UNTITLED_CONVERSATION.to_string(),
            messages: Vec::new(),
            created_at: now.clone(),
            updated_at: now,
        }
    }
}

impl Default for Conversation {
    fn default() -> Self {
        Self::new()
    }
}

/// Derives a conversation title from its first user message.
pub fn title_from_message(text: &str) -> String {
    let trimmed = text.trim();
    if trimmed.is_empty() {
        return defaults::UNTITLED_CONVERSATION.to_string();
    }
    trimmed.chars().take(defaults::TITLE_MAX_CHARS).collect()
}

/// Externally-owned transcript persistence.
///
/// The engine only appends through `update`; where and how the log is
/// stored is the embedder's decision.
pub trait TranscriptStore: Send {
    /// Apply a mutation to the message log.
    fn update(&mut self, f: &mut dyn FnMut(&mut Vec<TranscriptItem>));

    /// Read the current log.
    fn items(&self) -> Vec<TranscriptItem>;
}

/// In-memory store wrapping a single conversation.
#[derive(Debug, Default)]
pub struct MemoryStore {
    conversation: Conversation,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_conversation(conversation: Conversation) -> Self {
        Self { conversation }
    }

    pub fn conversation(&self) -> &Conversation {
        &self.conversation
    }
}

impl TranscriptStore for MemoryStore {
    fn update(&mut self, f: &mut dyn FnMut(&mut Vec<TranscriptItem>)) {
        f(&mut self.conversation.messages);

        if let Some(first_user) = self
            .conversation
            .messages
            .iter()
            .find(|m| m.role == Role::User)
        {
            self.conversation.title = title_from_message(&first_user.text);
        }
        self.conversation.updated_at = chrono::Utc::now().to_rfc3339();
    }

    fn items(&self) -> Vec<TranscriptItem> {
        self.conversation.messages.clone()
    }
}

/// A set of conversations with one active at a time.
///
/// Consumed by UIs for history browsing; the engine itself only ever
/// touches the active conversation through a `TranscriptStore`.
#[derive(Debug, Default, Serialize, Deserialize)]
pub struct ConversationLog {
    conversations: Vec<Conversation>,
    active_id: Option<String>,
}

impl ConversationLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a conversation, makes it active, and returns its id.
    pub fn create(&mut self) -> String {
        let conversation = Conversation::new();
        let id = conversation.id.clone();
        self.conversations.insert(0, conversation);
        self.active_id = Some(id.clone());
        id
    }

    /// Removes a conversation; clears the active id if it pointed there.
    pub fn delete(&mut self, id: &str) {
        self.conversations.retain(|c| c.id != id);
        if self.active_id.as_deref() == Some(id) {
            self.active_id = None;
        }
    }

    /// Switches the active conversation. Unknown ids are ignored.
    pub fn set_active(&mut self, id: &str) {
        if self.conversations.iter().any(|c| c.id == id) {
            self.active_id = Some(id.to_string());
        }
    }

    pub fn active(&self) -> Option<&Conversation> {
        let id = self.active_id.as_deref()?;
        self.conversations.iter().find(|c| c.id == id)
    }

    pub fn conversations(&self) -> &[Conversation] {
        &self.conversations
    }
}

/// Merges streaming transcription fragments into the log.
///
/// Tracks the currently-open item explicitly instead of mutating
/// "whatever is last in the array", which makes the merge rule
/// independently testable.
#[derive(Debug, Default)]
pub struct TranscriptReconciler {
    open_item: Option<(Role, String)>,
}

impl TranscriptReconciler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Forget the open item (new session, cleared history).
    pub fn reset(&mut self) {
        self.open_item = None;
    }

    /// Apply one user transcription fragment.
    ///
    /// User items are created complete: input transcription arrives
    /// authoritative, there is no later finalization step for them.
    pub fn user_fragment(&mut self, store: &mut dyn TranscriptStore, text: &str) {
        if text.is_empty() {
            return;
        }

        if let Some((Role::User, id)) = &self.open_item {
            let id = id.clone();
            store.update(&mut |items| {
                if let Some(item) = items.iter_mut().find(|i| i.id == id) {
                    item.text.push_str(text);
                }
            });
            return;
        }

        let item = TranscriptItem::new(Role::User, text, ItemStatus::Complete);
        self.open_item = Some((Role::User, item.id.clone()));
        store.update(&mut |items| items.push(item.clone()));
    }

    /// Append a whole user message as its own item.
    ///
    /// Used for typed text: unlike `user_fragment`, this never merges
    /// into a previous user item, so typed text and transcribed speech
    /// stay separate messages.
    pub fn user_message(&mut self, store: &mut dyn TranscriptStore, text: &str) {
        let item = TranscriptItem::new(Role::User, text, ItemStatus::Complete);
        self.open_item = Some((Role::User, item.id.clone()));
        store.update(&mut |items| items.push(item.clone()));
    }

    /// Apply one model transcription fragment and/or grounding sources.
    ///
    /// A fragment with no text and no sources is a no-op. Source lists
    /// merge append-only; empty lists are never re-added.
    pub fn model_fragment(
        &mut self,
        store: &mut dyn TranscriptStore,
        text: Option<&str>,
        sources: Vec<SourceRef>,
    ) {
        let text = text.unwrap_or_default();
        if text.is_empty() && sources.is_empty() {
            return;
        }

        if let Some((Role::Model, id)) = &self.open_item {
            let id = id.clone();
            store.update(&mut |items| {
                if let Some(item) = items.iter_mut().find(|i| i.id == id) {
                    item.text.push_str(text);
                    item.sources.extend(sources.iter().cloned());
                    item.status = ItemStatus::Streaming;
                }
            });
            return;
        }

        let mut item = TranscriptItem::new(Role::Model, text, ItemStatus::Streaming);
        item.sources = sources;
        self.open_item = Some((Role::Model, item.id.clone()));
        store.update(&mut |items| items.push(item.clone()));
    }

    /// Session closed: every still-streaming model item becomes complete.
    pub fn finalize_model_items(&mut self, store: &mut dyn TranscriptStore) {
        store.update(&mut |items| {
            for item in items.iter_mut() {
                if item.role == Role::Model && item.status == ItemStatus::Streaming {
                    item.status = ItemStatus::Complete;
                }
            }
        });
        self.open_item = None;
    }

    /// Role of the currently-open item, if any.
    pub fn open_role(&self) -> Option<Role> {
        self.open_item.as_ref().map(|(role, _)| *role)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn source(title: &str, url: &str) -> SourceRef {
        SourceRef {
            title: title.to_string(),
            url: url.to_string(),
        }
    }

    #[test]
    fn test_same_role_fragments_merge_into_one_item() {
        let mut store = MemoryStore::new();
        let mut reconciler = TranscriptReconciler::new();

        reconciler.model_fragment(&mut store, Some("Hola "), Vec::new());
        reconciler.model_fragment(&mut store, Some("mundo"), Vec::new());

        let items = store.items();
        assert_eq!(items.len(), 1);
        assert_eq!(items[0].text, "Hola mundo");
        assert_eq!(items[0].status, ItemStatus::Streaming);
    }

    #[test]
    fn test_role_switch_opens_new_item() {
        let mut store = MemoryStore::new();
        let mut reconciler = TranscriptReconciler::new();

        reconciler.model_fragment(&mut store, Some("First answer"), Vec::new());
        reconciler.user_fragment(&mut store, "A question");
        reconciler.model_fragment(&mut store, Some("Second answer"), Vec::new());

        let items = store.items();
        assert_eq!(items.len(), 3);
        assert_eq!(items[0].role, Role::Model);
        assert_eq!(items[1].role, Role::User);
        assert_eq!(items[2].role, Role::Model);
        assert_eq!(items[2].text, "Second answer");
    }

    #[test]
    fn test_user_items_are_complete_on_creation() {
        let mut store = MemoryStore::new();
        let mut reconciler = TranscriptReconciler::new();

        reconciler.user_fragment(&mut store, "hola ");
        reconciler.user_fragment(&mut store, "che");

        let items = store.items();
        assert_eq!(items.len(), 1);
        assert_eq!(items[0].text, "hola che");
        assert_eq!(items[0].status, ItemStatus::Complete);
    }

    #[test]
    fn test_empty_fragments_are_noops() {
        let mut store = MemoryStore::new();
        let mut reconciler = TranscriptReconciler::new();

        reconciler.user_fragment(&mut store, "");
        reconciler.model_fragment(&mut store, None, Vec::new());
        reconciler.model_fragment(&mut store, Some(""), Vec::new());

        assert!(store.items().is_empty());
    }

    #[test]
    fn test_sources_merge_without_duplicating_empty_lists() {
        let mut store = MemoryStore::new();
        let mut reconciler = TranscriptReconciler::new();

        reconciler.model_fragment(
            &mut store,
            Some("According to"),
            vec![source("Wiki", "https://w.example")],
        );
        reconciler.model_fragment(&mut store, Some(" the article"), Vec::new());
        reconciler.model_fragment(&mut store, None, vec![source("News", "https://n.example")]);

        let items = store.items();
        assert_eq!(items.len(), 1);
        assert_eq!(items[0].text, "According to the article");
        assert_eq!(items[0].sources.len(), 2);
    }

    #[test]
    fn test_sources_only_fragment_opens_model_item() {
        let mut store = MemoryStore::new();
        let mut reconciler = TranscriptReconciler::new();

        reconciler.model_fragment(&mut store, None, vec![source("Wiki", "https://w.example")]);

        let items = store.items();
        assert_eq!(items.len(), 1);
        assert_eq!(items[0].text, "");
        assert_eq!(items[0].sources.len(), 1);
    }

    #[test]
    fn test_finalize_marks_streaming_model_items_complete() {
        let mut store = MemoryStore::new();
        let mut reconciler = TranscriptReconciler::new();

        reconciler.user_fragment(&mut store, "question");
        reconciler.model_fragment(&mut store, Some("partial answ"), Vec::new());
        reconciler.finalize_model_items(&mut store);

        let items = store.items();
        assert_eq!(items[1].status, ItemStatus::Complete);
        assert!(reconciler.open_role().is_none());
    }

    #[test]
    fn test_reset_prevents_appending_across_sessions() {
        let mut store = MemoryStore::new();
        let mut reconciler = TranscriptReconciler::new();

        reconciler.model_fragment(&mut store, Some("before"), Vec::new());
        reconciler.reset();
        reconciler.model_fragment(&mut store, Some("after"), Vec::new());

        let items = store.items();
        assert_eq!(items.len(), 2);
        assert_eq!(items[0].text, "before");
        assert_eq!(items[1].text, "after");
    }

    #[test]
    fn test_user_message_never_merges() {
        let mut store = MemoryStore::new();
        let mut reconciler = TranscriptReconciler::new();

        reconciler.user_fragment(&mut store, "spoken words");
        reconciler.user_message(&mut store, "typed words");

        let items = store.items();
        assert_eq!(items.len(), 2);
        assert_eq!(items[1].text, "typed words");
    }

    #[test]
    fn test_memory_store_titles_from_first_user_message() {
        let mut store = MemoryStore::new();
        let mut reconciler = TranscriptReconciler::new();

        assert_eq!(store.conversation().title, "New chat");

        reconciler.model_fragment(&mut store, Some("hello!"), Vec::new());
        assert_eq!(store.conversation().title, "New chat");

        reconciler.user_fragment(&mut store, "  what is the weather in Montevideo today?  ");
        assert_eq!(
            store.conversation().title,
            "what is the weather in Montevideo today?"
        );
    }

    #[test]
    fn test_title_truncation() {
        let long = "x".repeat(100);
        assert_eq!(title_from_message(&long).chars().count(), 48);
        assert_eq!(title_from_message("   "), "New chat");
    }

    #[test]
    fn test_conversation_log_create_and_switch() {
        let mut log = ConversationLog::new();
        let first = log.create();
        let second = log.create();

        // Newest first, newest active
        assert_eq!(log.conversations().len(), 2);
        assert_eq!(log.conversations()[0].id, second);
        assert_eq!(log.active().unwrap().id, second);

        log.set_active(&first);
        assert_eq!(log.active().unwrap().id, first);

        log.set_active("no-such-id");
        assert_eq!(log.active().unwrap().id, first);
    }

    #[test]
    fn test_conversation_log_delete_clears_active() {
        let mut log = ConversationLog::new();
        let id = log.create();

        log.delete(&id);
        assert!(log.conversations().is_empty());
        assert!(log.active().is_none());
    }

    #[test]
    fn test_transcript_item_serde_round_trip() {
        let mut item = TranscriptItem::new(Role::Model, "hi", ItemStatus::Streaming);
        item.sources.push(source("Wiki", "https://w.example"));

        let json = serde_json::to_string(&item).unwrap();
        let parsed: TranscriptItem = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, item);
    }

    #[test]
    fn test_status_serializes_lowercase() {
        let json = serde_json::to_string(&ItemStatus::Streaming).unwrap();
        assert_eq!(json, "\"streaming\"");
        let json = serde_json::to_string(&Role::Model).unwrap();
        assert_eq!(json, "\"model\"");
    }
}
