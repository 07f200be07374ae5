//! Plain-text rendering of a materialized session.

use std::fmt::Write as _;

use session_store::{ContentBlock, Message, ResourcePayload, Role};

/// Renders messages in store order. Consecutive text (or thinking) chunks are
/// joined; tool calls show their latest status only.
pub fn render(messages: &[Message]) -> String {
    let mut out = String::new();

    for message in messages {
        let _ = writeln!(out, "{}>", role_label(message.role));
        let latest_tool_calls = message.latest_tool_calls();
        let mut run = TextRun::default();

        for block in &message.content {
            match block {
                ContentBlock::Text { text } => run.push(&mut out, false, text),
                ContentBlock::Thinking { text } => run.push(&mut out, true, text),
                _ => {
                    run.flush(&mut out);
                    let superseded = block.tool_call_id().is_some()
                        && !latest_tool_calls
                            .iter()
                            .any(|latest| std::ptr::eq(*latest, block));
                    if !superseded {
                        render_block(&mut out, block);
                    }
                }
            }
        }
        run.flush(&mut out);

        if message.is_streaming {
            out.push_str("  (incomplete)\n");
        }
        out.push('\n');
    }

    out
}

#[derive(Default)]
struct TextRun {
    thinking: bool,
    text: String,
}

impl TextRun {
    fn push(&mut self, out: &mut String, thinking: bool, text: &str) {
        if self.thinking != thinking {
            self.flush(out);
            self.thinking = thinking;
        }
        self.text.push_str(text);
    }

    fn flush(&mut self, out: &mut String) {
        if self.text.is_empty() {
            return;
        }

        let text = std::mem::take(&mut self.text);
        if self.thinking {
            push_indented(out, &format!("(thinking) {text}"));
        } else {
            push_indented(out, &text);
        }
    }
}

fn role_label(role: Role) -> &'static str {
    match role {
        Role::User => "user",
        Role::Assistant => "assistant",
        Role::System => "system",
    }
}

fn render_block(out: &mut String, block: &ContentBlock) {
    match block {
        ContentBlock::Text { text } => push_indented(out, text),
        ContentBlock::Thinking { text } => push_indented(out, &format!("(thinking) {text}")),
        ContentBlock::Code { text, language } => {
            let _ = writeln!(out, "  ```{}", language.as_deref().unwrap_or(""));
            push_indented(out, text);
            out.push_str("  ```\n");
        }
        ContentBlock::ToolCall {
            tool_call_id,
            name,
            status,
            ..
        } => {
            let _ = writeln!(
                out,
                "  [tool {} ({tool_call_id}): {}]",
                name.as_deref().unwrap_or("unnamed"),
                status.as_str()
            );
        }
        ContentBlock::ResourceLink { uri, name, .. } => {
            let _ = writeln!(out, "  [link {name} <{uri}>]");
        }
        ContentBlock::Resource {
            uri,
            mime_type,
            payload,
        } => {
            let encoding = match payload {
                ResourcePayload::Text { .. } => "text",
                ResourcePayload::Blob { .. } => "blob",
            };
            let _ = writeln!(
                out,
                "  [resource {} {} {encoding}]",
                uri.as_deref().unwrap_or("inline"),
                mime_type.as_deref().unwrap_or("application/octet-stream")
            );
        }
    }
}

fn push_indented(out: &mut String, text: &str) {
    for line in text.lines() {
        out.push_str("  ");
        out.push_str(line);
        out.push('\n');
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;
    use session_store::{MessageId, SessionId, ToolCallId, ToolCallStatus};

    use super::*;

    fn message(role: Role, content: Vec<ContentBlock>, is_streaming: bool) -> Message {
        Message {
            id: MessageId::generate(),
            session_id: SessionId::parse("sess-1").expect("valid id"),
            role,
            content,
            created_at: time::OffsetDateTime::UNIX_EPOCH,
            is_streaming,
        }
    }

    fn tool_call(status: ToolCallStatus) -> ContentBlock {
        ContentBlock::ToolCall {
            tool_call_id: ToolCallId::parse("call-1").expect("valid id"),
            name: Some("read".to_string()),
            arguments: None,
            status,
            result: None,
        }
    }

    #[test]
    fn renders_roles_blocks_and_latest_tool_status() {
        let rendered = render(&[
            message(Role::User, vec![ContentBlock::text("fix it")], false),
            message(
                Role::Assistant,
                vec![
                    tool_call(ToolCallStatus::Pending),
                    ContentBlock::text("Done"),
                    tool_call(ToolCallStatus::Succeeded),
                ],
                true,
            ),
        ]);

        assert_eq!(
            rendered,
            "user>\n  fix it\n\nassistant>\n  Done\n  [tool read (call-1): succeeded]\n  (incomplete)\n\n"
        );
    }

    #[test]
    fn consecutive_text_chunks_render_as_one_paragraph() {
        let rendered = render(&[message(
            Role::Assistant,
            vec![
                ContentBlock::thinking("let me "),
                ContentBlock::thinking("check"),
                ContentBlock::text("Hello "),
                ContentBlock::text("world"),
            ],
            false,
        )]);

        assert_eq!(
            rendered,
            "assistant>\n  (thinking) let me check\n  Hello world\n\n"
        );
    }

    #[test]
    fn renders_thinking_and_code() {
        let rendered = render(&[message(
            Role::Assistant,
            vec![
                ContentBlock::thinking("plan"),
                ContentBlock::Code {
                    text: "ls".to_string(),
                    language: Some("sh".to_string()),
                },
            ],
            false,
        )]);

        assert_eq!(
            rendered,
            "assistant>\n  (thinking) plan\n  ```sh\n  ls\n  ```\n\n"
        );
    }
}
