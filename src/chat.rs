//! Client for the streaming chat endpoint and the conversation record the
//! side panel renders.

use crate::error::{ViewerError, ViewerResult};
use crate::segmentation::check_status;
use log::{debug, info};
use reqwest::blocking::Client;
use serde::{Deserialize, Serialize};
use std::io::{BufRead, BufReader};
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChatRole {
    System,
    User,
    Assistant,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: ChatRole,
    pub content: String,
}

impl ChatMessage {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: ChatRole::User,
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: ChatRole::Assistant,
            content: content.into(),
        }
    }
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    messages: &'a [ChatMessage],
}

/// Drop messages without content. Nothing left is refused, the same way the
/// endpoint answers 400.
pub fn prepare_messages(messages: &[ChatMessage]) -> ViewerResult<Vec<ChatMessage>> {
    let valid: Vec<_> = messages
        .iter()
        .filter(|m| !m.content.is_empty())
        .cloned()
        .collect();
    if valid.is_empty() {
        return Err(ViewerError::Validation("No valid messages provided".to_string()));
    }
    Ok(valid)
}

/// One line of the response body.
#[derive(Debug, Clone, PartialEq)]
pub enum StreamChunk {
    Text(String),
    Error(String),
    /// Protocol parts the viewer does not render (tool calls, finish and
    /// usage records).
    Ignored,
}

/// `(type code, payload)` of a data-stream part. A part has a one or two
/// character code and a JSON payload; anything else is plain text.
fn data_stream_prefix(line: &str) -> Option<(&str, &str)> {
    let (kind, payload) = line.split_once(':')?;
    let is_code = !kind.is_empty() && kind.len() <= 2 && kind.chars().all(|c| c.is_ascii_alphanumeric());
    let is_part = is_code && serde_json::from_str::<serde_json::Value>(payload).is_ok();
    is_part.then_some((kind, payload))
}

/// Classify one line of a data stream. Lines that are not data-stream
/// parts are plain text and pass through as-is.
pub fn parse_stream_line(line: &str) -> StreamChunk {
    let Some((kind, payload)) = data_stream_prefix(line) else {
        return StreamChunk::Text(line.to_string());
    };
    let decoded = || serde_json::from_str::<String>(payload).unwrap_or_else(|_| payload.to_string());
    match kind {
        "0" => StreamChunk::Text(decoded()),
        "3" => StreamChunk::Error(decoded()),
        _ => StreamChunk::Ignored,
    }
}

/// Read a chat response to the end, handing each text delta to `on_delta`.
/// Returns the whole reply.
pub fn read_stream(reader: impl BufRead, on_delta: &mut dyn FnMut(&str)) -> ViewerResult<String> {
    let mut reply = String::new();
    let mut raw_lines = 0usize;
    for line in reader.lines() {
        let line = line?;
        if line.is_empty() {
            continue;
        }
        match parse_stream_line(&line) {
            StreamChunk::Text(text) => {
                if data_stream_prefix(&line).is_none() {
                    // raw text streams keep their line breaks
                    if raw_lines > 0 {
                        reply.push('\n');
                        on_delta("\n");
                    }
                    raw_lines += 1;
                }
                reply.push_str(&text);
                on_delta(&text);
            }
            StreamChunk::Error(message) => return Err(ViewerError::Network(message)),
            StreamChunk::Ignored => {}
        }
    }
    Ok(reply)
}

/// Blocking client for `POST {chat-url}`.
pub struct ChatClient {
    client: Client,
    url: String,
}

impl ChatClient {
    pub fn new(url: &str, timeout: Duration) -> ViewerResult<Self> {
        let client = Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            url: url.to_string(),
        })
    }

    /// Send the conversation and stream the assistant's reply.
    pub fn send(&self, messages: &[ChatMessage], on_delta: &mut dyn FnMut(&str)) -> ViewerResult<String> {
        let messages = prepare_messages(messages)?;
        info!("chat request with {} message(s)", messages.len());
        let response = self
            .client
            .post(&self.url)
            .json(&ChatRequest { messages: &messages })
            .send()?;
        let response = check_status(response, "chat request failed")?;
        let reply = read_stream(BufReader::new(response), on_delta)?;
        debug!("chat reply of {} chars", reply.chars().count());
        Ok(reply)
    }
}

/// Conversation shown in the side panel.
#[derive(Debug, Clone, Default)]
pub struct Conversation {
    pub messages: Vec<ChatMessage>,
    /// Assistant reply being streamed in.
    pub pending: Option<String>,
    pub draft: String,
}

impl Conversation {
    pub fn is_streaming(&self) -> bool {
        self.pending.is_some()
    }

    /// Move the draft into the history and open a pending reply. Returns the
    /// messages to send, or `None` if the draft is blank or a reply is
    /// still streaming.
    pub fn submit_draft(&mut self) -> Option<Vec<ChatMessage>> {
        let text = self.draft.trim();
        if text.is_empty() || self.is_streaming() {
            return None;
        }
        self.messages.push(ChatMessage::user(text));
        self.draft.clear();
        self.pending = Some(String::new());
        Some(self.messages.clone())
    }

    pub fn push_delta(&mut self, delta: &str) {
        if let Some(pending) = self.pending.as_mut() {
            pending.push_str(delta);
        }
    }

    pub fn finish(&mut self, reply: String) {
        self.pending = None;
        self.messages.push(ChatMessage::assistant(reply));
    }

    /// Drop the pending reply; the user's message stays in the history.
    pub fn abandon(&mut self) {
        self.pending = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn empty_contents_are_filtered() {
        let messages = vec![ChatMessage::user(""), ChatMessage::user("hi")];
        assert_eq!(prepare_messages(&messages).unwrap(), vec![ChatMessage::user("hi")]);
        let none = vec![ChatMessage::user("")];
        assert!(matches!(prepare_messages(&none), Err(ViewerError::Validation(_))));
        assert!(matches!(prepare_messages(&[]), Err(ViewerError::Validation(_))));
    }

    #[test]
    fn data_stream_lines() {
        assert_eq!(parse_stream_line(r#"0:"Hel""#), StreamChunk::Text("Hel".to_string()));
        assert_eq!(parse_stream_line(r#"0:"a\nb""#), StreamChunk::Text("a\nb".to_string()));
        assert_eq!(parse_stream_line(r#"3:"quota exceeded""#), StreamChunk::Error("quota exceeded".to_string()));
        assert_eq!(parse_stream_line(r#"e:{"finishReason":"stop"}"#), StreamChunk::Ignored);
        assert_eq!(parse_stream_line(r#"f:{"messageId":"m1"}"#), StreamChunk::Ignored);
        assert_eq!(parse_stream_line("plain words"), StreamChunk::Text("plain words".to_string()));
        assert_eq!(parse_stream_line("note: spaced"), StreamChunk::Text("note: spaced".to_string()));
    }

    #[test]
    fn stream_collects_deltas() {
        let body = "f:{\"messageId\":\"m\"}\n0:\"Hello\"\n0:\", world\"\ne:{}\nd:{}\n";
        let mut seen = Vec::new();
        let reply = read_stream(Cursor::new(body), &mut |d| seen.push(d.to_string())).unwrap();
        assert_eq!(reply, "Hello, world");
        assert_eq!(seen, vec!["Hello", ", world"]);
    }

    #[test]
    fn stream_error_part_fails() {
        let body = "0:\"partial\"\n3:\"model overloaded\"\n";
        let err = read_stream(Cursor::new(body), &mut |_| {}).unwrap_err();
        assert_eq!(err.to_string(), "model overloaded");
    }

    #[test]
    fn short_labels_in_plain_text_are_kept() {
        let reply = read_stream(Cursor::new("Q: is it normal?\nA: yes\n"), &mut |_| {}).unwrap();
        assert_eq!(reply, "Q: is it normal?\nA: yes");
        assert_eq!(parse_stream_line("0: not json"), StreamChunk::Text("0: not json".to_string()));
    }

    #[test]
    fn raw_text_keeps_lines() {
        let reply = read_stream(Cursor::new("first\nsecond\n"), &mut |_| {}).unwrap();
        assert_eq!(reply, "first\nsecond");
    }

    #[test]
    fn conversation_flow() {
        let mut conversation = Conversation {
            draft: "  what is this?  ".to_string(),
            ..Conversation::default()
        };
        let outgoing = conversation.submit_draft().unwrap();
        assert_eq!(outgoing, vec![ChatMessage::user("what is this?")]);
        assert!(conversation.submit_draft().is_none());
        conversation.push_delta("A liver");
        assert_eq!(conversation.pending.as_deref(), Some("A liver"));
        conversation.finish("A liver CT".to_string());
        assert!(!conversation.is_streaming());
        assert_eq!(conversation.messages.len(), 2);
    }
}
