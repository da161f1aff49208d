use std::fmt::Write as _;

use crate::context::{AgentContext, Message, MessageRole};
use crate::llm::ChatMessage;

/// History messages replayed into a conversational prompt.
pub const CONVERSATION_WINDOW: usize = 10;

/// History lines quoted inside specialist prompts.
pub const PROMPT_HISTORY_WINDOW: usize = 5;

fn chat_role(role: MessageRole) -> &'static str {
    match role {
        MessageRole::User => "user",
        _ => "assistant",
    }
}

fn last_n(history: &[Message], window: usize) -> &[Message] {
    &history[history.len().saturating_sub(window)..]
}

/// System prompt, then the tail of the history, then the current message.
pub fn build_conversation_messages(
    context: &AgentContext,
    message: &Message,
    system_prompt: &str,
    window: usize,
) -> Vec<ChatMessage> {
    let history = last_n(context.conversation_history(), window);
    let mut messages = Vec::with_capacity(history.len() + 2);
    messages.push(ChatMessage::system(system_prompt));
    messages.extend(
        history
            .iter()
            .map(|msg| ChatMessage::new(chat_role(msg.role), msg.content.clone())),
    );
    messages.push(ChatMessage::new(chat_role(message.role), message.content.clone()));
    messages
}

/// `[role]: content` lines for the last `window` history messages.
pub fn history_lines(context: &AgentContext, window: usize) -> String {
    let mut out = String::new();
    for msg in last_n(context.conversation_history(), window) {
        let _ = writeln!(out, "[{}]: {}", msg.role.as_str(), msg.content);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn context_with(count: usize) -> AgentContext {
        let history = (0..count)
            .map(|i| {
                if i % 2 == 0 {
                    Message::user(format!("q{i}"))
                } else {
                    Message::agent(format!("a{i}"))
                }
            })
            .collect();
        AgentContext::new("s1").with_history(history)
    }

    #[test]
    fn conversation_is_windowed_and_roles_collapse_to_assistant() {
        let ctx = context_with(14);
        let messages =
            build_conversation_messages(&ctx, &Message::user("now"), "sys", CONVERSATION_WINDOW);

        assert_eq!(messages.len(), 12);
        assert_eq!(messages[0], ChatMessage::system("sys"));
        assert_eq!(messages[1].content, "q4");
        assert_eq!(messages[2].role, "assistant");
        assert_eq!(messages[11], ChatMessage::user("now"));
    }

    #[test]
    fn history_lines_use_message_roles() {
        let ctx = context_with(3);
        let lines = history_lines(&ctx, 2);
        assert_eq!(lines, "[agent]: a1\n[user]: q2\n");
    }
}
