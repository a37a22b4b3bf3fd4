//! Conversation context shared by the aggregators and the response generator
//!
//! The context is append-only for the lifetime of a call. Readers take
//! snapshots; any two snapshots are ordered by the prefix relation.

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Message author
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::System => "system",
            Role::User => "user",
            Role::Assistant => "assistant",
        }
    }
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One conversation message
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub content: String,
}

impl Message {
    pub fn new(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
        }
    }

    pub fn system(content: impl Into<String>) -> Self {
        Self::new(Role::System, content)
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::new(Role::User, content)
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self::new(Role::Assistant, content)
    }
}

/// Ordered, append-only message history for one call
#[derive(Debug)]
pub struct ConversationContext {
    messages: RwLock<Vec<Message>>,
}

impl ConversationContext {
    /// Create a context holding the seed messages
    pub fn new(seed: impl IntoIterator<Item = Message>) -> Arc<Self> {
        Arc::new(Self {
            messages: RwLock::new(seed.into_iter().collect()),
        })
    }

    /// Copy of the current history
    pub fn snapshot(&self) -> Vec<Message> {
        self.messages.read().clone()
    }

    pub fn len(&self) -> usize {
        self.messages.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.read().is_empty()
    }

    /// Last message, if any
    pub fn last(&self) -> Option<Message> {
        self.messages.read().last().cloned()
    }

    /// Hand out a write handle
    ///
    /// Only the two context aggregators hold one.
    pub fn writer(self: &Arc<Self>) -> ContextWriter {
        ContextWriter {
            context: Arc::clone(self),
        }
    }
}

/// Append handle for a [`ConversationContext`]
///
/// There is no way to remove, replace or reorder messages through it.
#[derive(Debug)]
pub struct ContextWriter {
    context: Arc<ConversationContext>,
}

impl ContextWriter {
    /// Append a message to the tail, returning the new length
    pub fn append(&self, message: Message) -> usize {
        let mut messages = self.context.messages.write();
        messages.push(message);
        messages.len()
    }

    pub fn context(&self) -> &Arc<ConversationContext> {
        &self.context
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[test]
    fn test_seed_and_append() {
        let context = ConversationContext::new([Message::system("be brief")]);
        let writer = context.writer();

        assert_eq!(writer.append(Message::user("hi")), 2);
        assert_eq!(writer.append(Message::assistant("hello")), 3);

        let roles: Vec<Role> = context.snapshot().iter().map(|m| m.role).collect();
        assert_eq!(roles, vec![Role::System, Role::User, Role::Assistant]);
        assert_eq!(context.last().unwrap().content, "hello");
    }

    #[test]
    fn test_role_serialization() {
        let json = serde_json::to_string(&Message::user("hey")).unwrap();
        assert_eq!(json, r#"{"role":"user","content":"hey"}"#);
    }

    #[test]
    fn test_snapshots_are_prefixes() {
        let context = ConversationContext::new([Message::system("seed")]);
        let user = context.writer();
        let assistant = context.writer();

        let writers = vec![
            thread::spawn(move || {
                for i in 0..200 {
                    user.append(Message::user(format!("u{i}")));
                }
            }),
            thread::spawn(move || {
                for i in 0..200 {
                    assistant.append(Message::assistant(format!("a{i}")));
                }
            }),
        ];

        let reader_ctx = Arc::clone(&context);
        let reader = thread::spawn(move || {
            let mut previous = reader_ctx.snapshot();
            for _ in 0..500 {
                let current = reader_ctx.snapshot();
                assert!(current.len() >= previous.len());
                assert_eq!(&current[..previous.len()], &previous[..]);
                previous = current;
            }
        });

        for w in writers {
            w.join().unwrap();
        }
        reader.join().unwrap();

        let final_view = context.snapshot();
        assert_eq!(final_view.len(), 401);
        assert_eq!(final_view[0], Message::system("seed"));
    }
}
