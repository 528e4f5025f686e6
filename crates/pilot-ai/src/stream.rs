//! Streaming event types and response accumulation

use std::collections::BTreeMap;
use std::pin::Pin;

use futures::StreamExt;
use serde::Deserialize;
use tokio_stream::Stream;

use crate::error::{Error, Result};
use crate::types::{FinishReason, Message, Response, ToolCall, Usage};

/// Events emitted during message streaming
#[derive(Debug)]
pub enum StreamEvent {
    /// A chunk of assistant text
    TextDelta { delta: String },
    /// Incremental tool call data, indexed by position
    ToolCallDeltas { deltas: Vec<ToolCallDelta> },
    /// Token usage, populated when the provider reports it
    Usage { usage: Usage },
    /// Finish reason from the final chunk
    FinishReason { reason: FinishReason },
    /// Stream completed successfully
    Done,
    /// Error occurred mid-stream
    Error { error: Error },
}

/// An incremental update to a tool call during streaming.
///
/// `id` and `name` arrive at most once per index; `arguments` fragments
/// arrive in delivery order and are concatenated.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ToolCallDelta {
    pub index: usize,
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub arguments: Option<String>,
}

/// A stream of events for one LLM response
pub type EventStream = Pin<Box<dyn Stream<Item = StreamEvent> + Send>>;

#[derive(Default)]
struct PartialCall {
    id: String,
    name: String,
    arguments: String,
}

/// Collapse a stream of events into a complete [`Response`].
///
/// `on_text` is invoked per text delta for live display; text already
/// delivered through it is not retracted when the stream later errors.
/// The assistant body is absent if no text event arrived, present (possibly
/// empty) otherwise. Tool calls come back in ascending index order.
pub async fn accumulate<F>(mut events: EventStream, mut on_text: F) -> Result<Response>
where
    F: FnMut(&str),
{
    let mut content = String::new();
    let mut saw_text = false;
    let mut calls: BTreeMap<usize, PartialCall> = BTreeMap::new();
    let mut usage = Usage::default();
    let mut finish_reason = None;

    while let Some(event) = events.next().await {
        match event {
            StreamEvent::TextDelta { delta } => {
                saw_text = true;
                content.push_str(&delta);
                on_text(&delta);
            }
            StreamEvent::ToolCallDeltas { deltas } => {
                for delta in deltas {
                    let call = calls.entry(delta.index).or_default();
                    if call.id.is_empty() {
                        if let Some(id) = delta.id.filter(|s| !s.is_empty()) {
                            call.id = id;
                        }
                    }
                    if call.name.is_empty() {
                        if let Some(name) = delta.name.filter(|s| !s.is_empty()) {
                            call.name = name;
                        }
                    }
                    if let Some(fragment) = delta.arguments {
                        call.arguments.push_str(&fragment);
                    }
                }
            }
            StreamEvent::Usage { usage: u } => usage = u,
            StreamEvent::FinishReason { reason } => finish_reason = Some(reason),
            StreamEvent::Done => break,
            StreamEvent::Error { error } => return Err(error),
        }
    }

    let tool_calls: Vec<ToolCall> = calls
        .into_values()
        .map(|c| ToolCall {
            id: c.id,
            name: c.name,
            arguments: c.arguments,
        })
        .collect();

    let body = if saw_text { Some(content) } else { None };

    Ok(Response {
        message: Message::assistant(body, tool_calls),
        finish_reason,
        usage,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn stream_of(events: Vec<StreamEvent>) -> EventStream {
        Box::pin(tokio_stream::iter(events))
    }

    fn delta(index: usize, id: Option<&str>, name: Option<&str>, args: Option<&str>) -> ToolCallDelta {
        ToolCallDelta {
            index,
            id: id.map(String::from),
            name: name.map(String::from),
            arguments: args.map(String::from),
        }
    }

    #[tokio::test]
    async fn test_text_concatenation_and_callback() {
        let events = stream_of(vec![
            StreamEvent::TextDelta {
                delta: "Hel".into(),
            },
            StreamEvent::TextDelta {
                delta: "lo".into(),
            },
            StreamEvent::FinishReason {
                reason: FinishReason::Stop,
            },
            StreamEvent::Done,
        ]);

        let mut seen = String::new();
        let resp = accumulate(events, |t| seen.push_str(t)).await.unwrap();
        assert_eq!(resp.message.content.as_deref(), Some("Hello"));
        assert_eq!(seen, "Hello");
        assert_eq!(resp.finish_reason, Some(FinishReason::Stop));
    }

    #[tokio::test]
    async fn test_absent_body_when_no_text() {
        let events = stream_of(vec![
            StreamEvent::ToolCallDeltas {
                deltas: vec![delta(0, Some("c1"), Some("glob"), Some("{}"))],
            },
            StreamEvent::Done,
        ]);
        let resp = accumulate(events, |_| {}).await.unwrap();
        assert!(resp.message.content.is_none());
        assert_eq!(resp.message.tool_calls.len(), 1);
    }

    #[tokio::test]
    async fn test_present_but_empty_body() {
        let events = stream_of(vec![
            StreamEvent::TextDelta { delta: "".into() },
            StreamEvent::Done,
        ]);
        let resp = accumulate(events, |_| {}).await.unwrap();
        assert_eq!(resp.message.content.as_deref(), Some(""));
    }

    // For any partition of a call's argument deltas into fragments, the
    // accumulated string equals their concatenation in delivery order.
    #[tokio::test]
    async fn test_argument_fragment_associativity() {
        let full = r#"{"pattern":"**/*.rs"}"#;
        for split in [1, 5, 9, full.len() - 1] {
            let (a, b) = full.split_at(split);
            let events = stream_of(vec![
                StreamEvent::ToolCallDeltas {
                    deltas: vec![delta(0, Some("c1"), Some("glob"), None)],
                },
                StreamEvent::ToolCallDeltas {
                    deltas: vec![delta(0, None, None, Some(a))],
                },
                StreamEvent::ToolCallDeltas {
                    deltas: vec![delta(0, None, None, Some(b))],
                },
                StreamEvent::Done,
            ]);
            let resp = accumulate(events, |_| {}).await.unwrap();
            assert_eq!(resp.message.tool_calls[0].arguments, full);
        }
    }

    #[tokio::test]
    async fn test_tool_calls_ascending_index_order() {
        // Deltas interleave across indexes and arrive with index 1 first.
        let events = stream_of(vec![
            StreamEvent::ToolCallDeltas {
                deltas: vec![delta(1, Some("c2"), Some("grep"), Some("{\"pattern\""))],
            },
            StreamEvent::ToolCallDeltas {
                deltas: vec![delta(0, Some("c1"), Some("glob"), Some("{}"))],
            },
            StreamEvent::ToolCallDeltas {
                deltas: vec![delta(1, None, None, Some(":\"x\"}"))],
            },
            StreamEvent::Done,
        ]);
        let resp = accumulate(events, |_| {}).await.unwrap();
        let calls = &resp.message.tool_calls;
        assert_eq!(calls.len(), 2);
        assert_eq!(calls[0].id, "c1");
        assert_eq!(calls[1].id, "c2");
        assert_eq!(calls[1].arguments, "{\"pattern\":\"x\"}");
    }

    #[tokio::test]
    async fn test_first_nonempty_id_and_name_win() {
        let events = stream_of(vec![
            StreamEvent::ToolCallDeltas {
                deltas: vec![delta(0, Some(""), None, None)],
            },
            StreamEvent::ToolCallDeltas {
                deltas: vec![delta(0, Some("c1"), Some("read"), None)],
            },
            StreamEvent::ToolCallDeltas {
                deltas: vec![delta(0, Some("c9"), Some("write"), Some("{}"))],
            },
            StreamEvent::Done,
        ]);
        let resp = accumulate(events, |_| {}).await.unwrap();
        assert_eq!(resp.message.tool_calls[0].id, "c1");
        assert_eq!(resp.message.tool_calls[0].name, "read");
    }

    #[tokio::test]
    async fn test_error_surfaces_after_partial_text() {
        let events = stream_of(vec![
            StreamEvent::TextDelta {
                delta: "partial".into(),
            },
            StreamEvent::Error {
                error: Error::Stream("connection reset".into()),
            },
        ]);
        let mut seen = String::new();
        let err = accumulate(events, |t| seen.push_str(t)).await.unwrap_err();
        // The caller saw everything delivered before the error.
        assert_eq!(seen, "partial");
        assert!(err.to_string().contains("connection reset"));
    }

    #[tokio::test]
    async fn test_usage_capture() {
        let events = stream_of(vec![
            StreamEvent::TextDelta { delta: "ok".into() },
            StreamEvent::Usage {
                usage: Usage {
                    prompt_tokens: 10,
                    completion_tokens: 5,
                    total_tokens: 15,
                },
            },
            StreamEvent::Done,
        ]);
        let resp = accumulate(events, |_| {}).await.unwrap();
        assert_eq!(resp.usage.total_tokens, 15);
    }
}
