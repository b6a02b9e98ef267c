use anyhow::{Context, Result};
use async_openai::types::{
    ChatCompletionRequestAssistantMessageArgs, ChatCompletionRequestMessage,
    ChatCompletionRequestSystemMessageArgs, ChatCompletionRequestUserMessageArgs,
};

const DEFAULT_SYSTEM_MESSAGE: &str = "You are a helpful assistant.";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    User,
    Assistant,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Message {
    pub role: Role,
    /// `None` marks the assistant reply still being generated
    pub content: Option<String>,
}

/// Ordered chat history.
///
/// Every step returns a new value so concurrent choices never share state.
#[derive(Debug, Clone, PartialEq)]
pub struct Conversation {
    system_message: String,
    messages: Vec<Message>,
}

impl Default for Conversation {
    fn default() -> Self {
        Self::new(DEFAULT_SYSTEM_MESSAGE)
    }
}

impl Conversation {
    pub fn new(system_message: impl Into<String>) -> Self {
        Self {
            system_message: system_message.into(),
            messages: Vec::new(),
        }
    }

    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    fn with_message(&self, role: Role, content: Option<String>) -> Self {
        let mut messages = self.messages.clone();
        messages.push(Message { role, content });
        Self {
            system_message: self.system_message.clone(),
            messages,
        }
    }

    pub fn with_user_turn(&self, prompt: impl Into<String>) -> Self {
        self.with_message(Role::User, Some(prompt.into()))
    }

    /// Append the empty assistant slot the next completion will fill
    pub fn with_pending_reply(&self) -> Self {
        self.with_message(Role::Assistant, None)
    }

    /// Replace the content of the last message
    pub fn with_reply(&self, reply: impl Into<String>) -> Self {
        let mut next = self.clone();
        match next.messages.last_mut() {
            Some(last) => last.content = Some(reply.into()),
            None => next.messages.push(Message {
                role: Role::Assistant,
                content: Some(reply.into()),
            }),
        }
        next
    }

    /// Convert to chat completion messages, skipping the pending slot
    pub fn to_openai_messages(&self) -> Result<Vec<ChatCompletionRequestMessage>> {
        let mut request_messages = Vec::with_capacity(self.messages.len() + 1);

        request_messages.push(
            ChatCompletionRequestSystemMessageArgs::default()
                .content(self.system_message.clone())
                .build()
                .context("Failed to build system message")?
                .into(),
        );

        for message in &self.messages {
            let Some(content) = &message.content else {
                continue;
            };
            let request_message = match message.role {
                Role::User => ChatCompletionRequestUserMessageArgs::default()
                    .content(content.clone())
                    .build()
                    .context("Failed to build user message")?
                    .into(),
                Role::Assistant => ChatCompletionRequestAssistantMessageArgs::default()
                    .content(content.clone())
                    .build()
                    .context("Failed to build assistant message")?
                    .into(),
            };
            request_messages.push(request_message);
        }

        Ok(request_messages)
    }
}
