//! Stream-json event parser: three pure handlers (progress, console,
//! session) dispatched on a tagged-union event type (spec §4.2, §9).
//!
//! Grounded in the teacher's SSE line-level extractors
//! (`proxy/sse/mod.rs`): decode each line independently, ignore whatever
//! doesn't parse, drive several small state machines off the same stream.
//! The stateful block accumulator there (`assemble_to_json`'s content block
//! building) is the direct model for `open_block` here.

use serde::Deserialize;
use serde_json::Value;

use super::{ConsoleEvent, ProgressEvent};

#[derive(Debug, Deserialize)]
struct RawEvent {
    #[serde(rename = "type")]
    event_type: String,
    #[serde(default)]
    content_block: Option<Value>,
    #[serde(default)]
    delta: Option<Value>,
    #[serde(default)]
    session_id: Option<String>,
    #[serde(default)]
    result: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum BlockKind {
    Text,
    ToolResult,
}

impl BlockKind {
    fn entry_type(self) -> &'static str {
        match self {
            BlockKind::Text => "assistant_text",
            BlockKind::ToolResult => "tool_result",
        }
    }

    fn cap(self) -> usize {
        match self {
            BlockKind::Text => 2_000,
            BlockKind::ToolResult => 500,
        }
    }
}

struct OpenBlock {
    kind: BlockKind,
    content: String,
}

/// Owns the rolling decode buffer and per-run parse state. One instance per
/// `AiExecutor::execute` call — not shared across runs.
#[derive(Default)]
pub struct StreamParser {
    buffer: Vec<u8>,
    open_block: Option<OpenBlock>,
    tool_counter: u32,
    session_id: Option<String>,
    canonical_result: Option<String>,
}

/// Events produced while parsing one chunk of stdout.
#[derive(Default)]
pub struct ParsedChunk {
    pub progress: Vec<ProgressEvent>,
    pub console: Vec<ConsoleEvent>,
}

impl StreamParser {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn session_id(&self) -> Option<&str> {
        self.session_id.as_deref()
    }

    /// The `result` event's `result` text, if one was observed — preferred
    /// over raw stdout as the canonical outcome text (spec §4.2.3).
    pub fn canonical_result(&self) -> Option<&str> {
        self.canonical_result.as_deref()
    }

    /// Feed newly read bytes; splits on newline, JSON-decodes each complete
    /// line, silently skips lines that fail to parse (spec §7 Parse errors),
    /// and carries any trailing partial line forward in `buffer`.
    pub fn feed(&mut self, chunk: &[u8]) -> ParsedChunk {
        self.buffer.extend_from_slice(chunk);
        let mut out = ParsedChunk::default();

        loop {
            let Some(pos) = self.buffer.iter().position(|&b| b == b'\n') else {
                break;
            };
            let line: Vec<u8> = self.buffer.drain(..=pos).collect();
            let line = &line[..line.len() - 1]; // drop the newline itself
            if let Ok(text) = std::str::from_utf8(line) {
                self.process_line(text.trim(), &mut out);
            }
        }

        out
    }

    fn process_line(&mut self, line: &str, out: &mut ParsedChunk) {
        if line.is_empty() {
            return;
        }
        let Ok(event) = serde_json::from_str::<RawEvent>(line) else {
            return;
        };

        match event.event_type.as_str() {
            "content_block_start" => self.on_block_start(&event, out),
            "content_block_delta" => self.on_block_delta(&event),
            "content_block_stop" => self.on_block_stop(out),
            "result" => self.on_result(&event, out),
            _ => {}
        }
    }

    fn on_block_start(&mut self, event: &RawEvent, out: &mut ParsedChunk) {
        let Some(block) = &event.content_block else { return };
        let block_type = block.get("type").and_then(Value::as_str).unwrap_or("");

        match block_type {
            "tool_use" => {
                self.tool_counter += 1;
                let name = block.get("name").and_then(Value::as_str).unwrap_or("tool");
                let message = format!("Step {}: Using {}...", self.tool_counter, name);
                out.progress.push(ProgressEvent {
                    fraction: None,
                    message: message.clone(),
                    is_tool_use: true,
                });
                out.console.push(ConsoleEvent { entry_type: "tool_call".into(), content: message });
            }
            "text" => {
                self.open_block = Some(OpenBlock { kind: BlockKind::Text, content: String::new() });
            }
            "tool_result" => {
                let seed = block
                    .get("content")
                    .map(|c| match c.as_str() {
                        Some(s) => s.to_string(),
                        None => c.to_string(),
                    })
                    .unwrap_or_default();
                self.open_block = Some(OpenBlock { kind: BlockKind::ToolResult, content: seed });
            }
            _ => {}
        }
    }

    fn on_block_delta(&mut self, event: &RawEvent) {
        let Some(delta) = &event.delta else { return };
        if delta.get("type").and_then(Value::as_str) != Some("text_delta") {
            return;
        }
        let Some(text) = delta.get("text").and_then(Value::as_str) else { return };
        if let Some(block) = &mut self.open_block {
            block.content.push_str(text);
        }
    }

    fn on_block_stop(&mut self, out: &mut ParsedChunk) {
        if let Some(block) = self.flush_open_block() {
            out.console.push(block);
        }
    }

    fn on_result(&mut self, event: &RawEvent, out: &mut ParsedChunk) {
        if let Some(block) = self.flush_open_block() {
            out.console.push(block);
        }

        if let Some(sid) = &event.session_id {
            self.session_id = Some(sid.clone());
        }
        if let Some(text) = &event.result {
            self.canonical_result = Some(text.clone());
        }

        let content = event.result.clone().unwrap_or_default();
        out.console.push(ConsoleEvent { entry_type: "result".into(), content: truncate(&content, 2_000) });
        out.progress.push(ProgressEvent { fraction: Some(1.0), message: "Completed".into(), is_tool_use: false });
    }

    fn flush_open_block(&mut self) -> Option<ConsoleEvent> {
        let block = self.open_block.take()?;
        Some(ConsoleEvent {
            entry_type: block.kind.entry_type().to_string(),
            content: truncate(&block.content, block.kind.cap()),
        })
    }
}

fn truncate(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        s.to_string()
    } else {
        s.chars().take(max).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn line(v: serde_json::Value) -> Vec<u8> {
        let mut s = v.to_string();
        s.push('\n');
        s.into_bytes()
    }

    #[test]
    fn tool_use_emits_progress_and_tool_call() {
        let mut parser = StreamParser::new();
        let chunk = line(serde_json::json!({
            "type": "content_block_start",
            "content_block": {"type": "tool_use", "name": "Read", "id": "t1"}
        }));
        let parsed = parser.feed(&chunk);
        assert_eq!(parsed.progress.len(), 1);
        assert!(parsed.progress[0].is_tool_use);
        assert_eq!(parsed.progress[0].message, "Step 1: Using Read...");
        assert_eq!(parsed.console.len(), 1);
        assert_eq!(parsed.console[0].entry_type, "tool_call");
    }

    #[test]
    fn text_block_accumulates_and_flushes_on_stop() {
        let mut parser = StreamParser::new();
        let mut chunk = line(serde_json::json!({
            "type": "content_block_start",
            "content_block": {"type": "text"}
        }));
        chunk.extend(line(serde_json::json!({
            "type": "content_block_delta",
            "delta": {"type": "text_delta", "text": "Hello "}
        })));
        chunk.extend(line(serde_json::json!({
            "type": "content_block_delta",
            "delta": {"type": "text_delta", "text": "world"}
        })));
        chunk.extend(line(serde_json::json!({"type": "content_block_stop"})));

        let parsed = parser.feed(&chunk);
        assert_eq!(parsed.console.len(), 1);
        assert_eq!(parsed.console[0].entry_type, "assistant_text");
        assert_eq!(parsed.console[0].content, "Hello world");
    }

    #[test]
    fn result_event_captures_session_and_canonical_text() {
        let mut parser = StreamParser::new();
        let chunk = line(serde_json::json!({
            "type": "result",
            "session_id": "abc123",
            "result": "All done"
        }));
        let parsed = parser.feed(&chunk);
        assert_eq!(parser.session_id(), Some("abc123"));
        assert_eq!(parser.canonical_result(), Some("All done"));
        assert_eq!(parsed.progress.last().unwrap().fraction, Some(1.0));
        assert!(parsed.console.iter().any(|c| c.entry_type == "result"));
    }

    #[test]
    fn malformed_line_is_silently_skipped() {
        let mut parser = StreamParser::new();
        let mut chunk = b"not json at all\n".to_vec();
        chunk.extend(line(serde_json::json!({"type": "content_block_stop"})));
        let parsed = parser.feed(&chunk);
        assert!(parsed.console.is_empty());
        assert!(parsed.progress.is_empty());
    }

    #[test]
    fn partial_line_carries_across_feed_calls() {
        let mut parser = StreamParser::new();
        let full = line(serde_json::json!({"type": "result", "result": "ok"}));
        let (first, second) = full.split_at(full.len() / 2);
        let parsed1 = parser.feed(first);
        assert!(parsed1.console.is_empty());
        let parsed2 = parser.feed(second);
        assert!(parsed2.console.iter().any(|c| c.entry_type == "result"));
    }
}
