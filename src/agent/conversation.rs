//! Conversation management

use crate::agent::types::Message;

/// Ordered, append-only history of one console session.
///
/// Insertion order is the model's view of the conversation and is never
/// rearranged; the system prompt is kept apart and prepended on the wire.
#[derive(Debug, Clone, Default)]
pub struct Conversation {
    /// Messages in the conversation
    messages: Vec<Message>,
    /// System prompt for this conversation
    system_prompt: Option<String>,
}

impl Conversation {
    /// Create a new conversation
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the system prompt
    pub fn with_system_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.system_prompt = Some(prompt.into());
        self
    }

    /// Add a message to the conversation
    pub fn push(&mut self, message: Message) {
        self.messages.push(message);
    }

    /// Add a user message
    pub fn add_user_message(&mut self, content: impl Into<String>) {
        self.push(Message::user(content));
    }

    /// Get messages formatted for API request (includes system prompt)
    pub fn api_messages(&self) -> Vec<Message> {
        let mut messages = Vec::with_capacity(self.messages.len() + 1);

        if let Some(ref system) = self.system_prompt {
            messages.push(Message::system(system));
        }

        messages.extend(self.messages.iter().cloned());
        messages
    }

    /// History without the system prompt
    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    /// Get message count
    pub fn len(&self) -> usize {
        self.messages.len()
    }

    /// Check if conversation is empty
    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent::types::Role;

    #[test]
    fn test_add_messages() {
        let mut conv = Conversation::new();
        conv.add_user_message("Hello");
        conv.push(Message::assistant("Hi there!"));

        assert_eq!(conv.len(), 2);
        assert_eq!(conv.messages()[0].role, Role::User);
        assert_eq!(conv.messages()[1].role, Role::Assistant);
        assert_eq!(conv.messages()[1].content, "Hi there!");
    }

    #[test]
    fn test_api_messages_with_system() {
        let mut conv = Conversation::new().with_system_prompt("You are a helpful assistant.");
        assert!(conv.is_empty());

        conv.add_user_message("Hello");
        let api_messages = conv.api_messages();
        assert_eq!(api_messages.len(), 2);
        assert_eq!(api_messages[0].role, Role::System);
        assert_eq!(api_messages[1].role, Role::User);
        // the system prompt does not count as history
        assert_eq!(conv.len(), 1);
    }
}
