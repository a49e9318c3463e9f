//! The ordered message log a session owns.

use serde::{Deserialize, Serialize};

/// Who produced a message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub text: String,
}

impl Message {
    pub fn user(text: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            text: text.into(),
        }
    }

    pub fn assistant(text: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            text: text.into(),
        }
    }
}

/// Insertion-ordered conversation history.
///
/// Append-only, except that the trailing assistant message may grow in place
/// while its turn is still streaming. Nothing is ever removed.
#[derive(Debug, Clone, Default)]
pub struct ConversationLog {
    messages: Vec<Message>,
}

impl ConversationLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a message and return its index.
    pub fn push(&mut self, message: Message) -> usize {
        self.messages.push(message);
        self.messages.len() - 1
    }

    /// Append `fragment` to the last message if it is an assistant message.
    ///
    /// Returns the index of the extended message, or `None` when the log is
    /// empty or ends with a user message.
    pub fn extend_last_assistant(&mut self, fragment: &str) -> Option<usize> {
        let index = self.messages.len().checked_sub(1)?;
        let last = &mut self.messages[index];
        if last.role != Role::Assistant {
            return None;
        }
        last.text.push_str(fragment);
        Some(index)
    }

    pub fn last(&self) -> Option<&Message> {
        self.messages.last()
    }

    pub fn get(&self, index: usize) -> Option<&Message> {
        self.messages.get(index)
    }

    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn push_returns_insertion_index() {
        let mut log = ConversationLog::new();
        assert_eq!(log.push(Message::user("hi")), 0);
        assert_eq!(log.push(Message::assistant("hello")), 1);
        assert_eq!(log.len(), 2);
        assert_eq!(log.messages()[0].role, Role::User);
    }

    #[test]
    fn extend_last_assistant_appends_without_separator() {
        let mut log = ConversationLog::new();
        log.push(Message::assistant("Hel"));
        assert_eq!(log.extend_last_assistant("lo"), Some(0));
        assert_eq!(log.last().unwrap().text, "Hello");
    }

    #[test]
    fn extend_refuses_user_tail() {
        let mut log = ConversationLog::new();
        log.push(Message::assistant("answer"));
        log.push(Message::user("question"));
        assert_eq!(log.extend_last_assistant("more"), None);
        assert_eq!(log.get(0).unwrap().text, "answer");
        assert_eq!(log.get(1).unwrap().text, "question");
    }

    #[test]
    fn extend_on_empty_log() {
        let mut log = ConversationLog::new();
        assert_eq!(log.extend_last_assistant("x"), None);
        assert!(log.is_empty());
    }

    #[test]
    fn message_serde_uses_lowercase_roles() {
        let json = serde_json::to_string(&Message::assistant("ok")).unwrap();
        assert_eq!(json, r#"{"role":"assistant","text":"ok"}"#);
    }
}
