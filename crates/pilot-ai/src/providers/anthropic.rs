//! Anthropic Messages API provider

use std::collections::HashMap;

use async_stream::stream;
use async_trait::async_trait;
use futures::StreamExt;
use reqwest_eventsource::{Event, EventSource};
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

use crate::client::LlmClient;
use crate::error::{Error, Result};
use crate::retry::{classify_response, do_with_retry, AttemptError, RetryConfig};
use crate::stream::{EventStream, StreamEvent, ToolCallDelta};
use crate::types::{Message, Response, Role, ToolCall, ToolDef, Usage};

use super::{classify_eventsource_error, http_client, map_finish_reason};

const ANTHROPIC_VERSION: &str = "2023-06-01";

/// Anthropic API client
pub struct AnthropicClient {
    http: reqwest::Client,
    api_key: String,
    model: String,
    max_tokens: u32,
    base_url: String,
    retry: RetryConfig,
}

impl AnthropicClient {
    pub fn new(
        api_key: impl Into<String>,
        model: impl Into<String>,
        max_tokens: u32,
        base_url: impl Into<String>,
    ) -> Self {
        Self {
            http: http_client(),
            api_key: api_key.into(),
            model: model.into(),
            max_tokens,
            base_url: base_url.into(),
            retry: RetryConfig::default(),
        }
    }

    /// Create from the `ANTHROPIC_API_KEY` environment variable
    pub fn from_env(model: impl Into<String>, max_tokens: u32) -> Result<Self> {
        let api_key = std::env::var("ANTHROPIC_API_KEY").map_err(|_| Error::InvalidApiKey)?;
        Ok(Self::new(
            api_key,
            model,
            max_tokens,
            "https://api.anthropic.com/v1",
        ))
    }

    fn build_request<'a>(
        &'a self,
        messages: &[Message],
        tools: &'a [ToolDef],
        stream: bool,
    ) -> AnthropicRequest<'a> {
        let (system, wire_messages) = convert_messages(messages);
        AnthropicRequest {
            model: &self.model,
            max_tokens: self.max_tokens,
            system,
            messages: wire_messages,
            tools: if tools.is_empty() {
                None
            } else {
                Some(tools.iter().map(WireToolDef::from).collect())
            },
            stream,
        }
    }

    fn request_builder(&self, body: &AnthropicRequest<'_>) -> reqwest::RequestBuilder {
        self.http
            .post(format!("{}/messages", self.base_url))
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", ANTHROPIC_VERSION)
            .json(body)
    }
}

#[async_trait]
impl LlmClient for AnthropicClient {
    async fn send(
        &self,
        cancel: &CancellationToken,
        messages: &[Message],
        tools: &[ToolDef],
    ) -> Result<Response> {
        let body = self.build_request(messages, tools, false);

        let api_resp: AnthropicResponse = do_with_retry(cancel, &self.retry, |_| {
            let req = self.request_builder(&body);
            async move {
                let resp = tokio::select! {
                    _ = cancel.cancelled() => return Err(AttemptError::Fatal(Error::Cancelled)),
                    r = req.send() => r.map_err(AttemptError::Transport)?,
                };
                if resp.status().is_success() {
                    resp.json::<AnthropicResponse>()
                        .await
                        .map_err(|e| AttemptError::Fatal(Error::UnexpectedResponse(e.to_string())))
                } else {
                    Err(classify_response(resp).await)
                }
            }
        })
        .await?;

        Ok(convert_response(api_resp))
    }

    async fn stream(
        &self,
        cancel: &CancellationToken,
        messages: &[Message],
        tools: &[ToolDef],
    ) -> Result<EventStream> {
        let body = self.build_request(messages, tools, true);

        let es = do_with_retry(cancel, &self.retry, |_| {
            let req = self.request_builder(&body);
            async move {
                let mut es = EventSource::new(req)
                    .map_err(|e| AttemptError::Fatal(Error::Stream(e.to_string())))?;
                match es.next().await {
                    Some(Ok(Event::Open)) => Ok(es),
                    Some(Err(err)) => Err(classify_eventsource_error(err).await),
                    _ => Err(AttemptError::Fatal(Error::Stream(
                        "stream closed before opening".into(),
                    ))),
                }
            }
        })
        .await?;

        Ok(Box::pin(translate_stream(es, cancel.clone())))
    }
}

/// Translate Anthropic SSE events into the shared stream model.
///
/// Anthropic indexes content blocks, counting text blocks; tool-call deltas
/// are re-indexed densely so downstream accumulation groups them 0..n.
fn translate_stream(
    mut es: EventSource,
    cancel: CancellationToken,
) -> impl futures::Stream<Item = StreamEvent> {
    stream! {
        // content block index -> dense tool call index
        let mut tool_indexes: HashMap<usize, usize> = HashMap::new();
        let mut next_tool_index = 0usize;

        loop {
            let next = tokio::select! {
                _ = cancel.cancelled() => None,
                ev = es.next() => Some(ev),
            };
            let Some(ev) = next else {
                es.close();
                yield StreamEvent::Error { error: Error::Cancelled };
                return;
            };

            match ev {
                None => break,
                Some(Ok(Event::Open)) => {}
                Some(Ok(Event::Message(msg))) => match msg.event.as_str() {
                    "content_block_start" => {
                        let Ok(ev) = serde_json::from_str::<ContentBlockStart>(&msg.data) else {
                            continue;
                        };
                        if ev.content_block.kind == "tool_use" {
                            let index = next_tool_index;
                            next_tool_index += 1;
                            tool_indexes.insert(ev.index, index);
                            yield StreamEvent::ToolCallDeltas {
                                deltas: vec![ToolCallDelta {
                                    index,
                                    id: ev.content_block.id,
                                    name: ev.content_block.name,
                                    arguments: None,
                                }],
                            };
                        }
                    }
                    "content_block_delta" => {
                        let Ok(ev) = serde_json::from_str::<ContentBlockDelta>(&msg.data) else {
                            continue;
                        };
                        match ev.delta.kind.as_str() {
                            "text_delta" => {
                                if let Some(text) = ev.delta.text {
                                    yield StreamEvent::TextDelta { delta: text };
                                }
                            }
                            "input_json_delta" => {
                                if let Some(&index) = tool_indexes.get(&ev.index) {
                                    yield StreamEvent::ToolCallDeltas {
                                        deltas: vec![ToolCallDelta {
                                            index,
                                            id: None,
                                            name: None,
                                            arguments: ev.delta.partial_json,
                                        }],
                                    };
                                }
                            }
                            _ => {}
                        }
                    }
                    "message_delta" => {
                        let Ok(ev) = serde_json::from_str::<MessageDelta>(&msg.data) else {
                            continue;
                        };
                        if let Some(usage) = ev.usage {
                            yield StreamEvent::Usage { usage: usage.into() };
                        }
                        if let Some(reason) = ev.delta.stop_reason {
                            if let Some(reason) = map_finish_reason(&reason) {
                                yield StreamEvent::FinishReason { reason };
                            }
                        }
                    }
                    "message_stop" => {
                        es.close();
                        yield StreamEvent::Done;
                        return;
                    }
                    "error" => {
                        es.close();
                        let detail = serde_json::from_str::<ErrorEvent>(&msg.data)
                            .map(|e| e.error.message)
                            .unwrap_or(msg.data);
                        yield StreamEvent::Error { error: Error::Stream(detail) };
                        return;
                    }
                    _ => {}
                },
                Some(Err(reqwest_eventsource::Error::StreamEnded)) => break,
                Some(Err(err)) => {
                    es.close();
                    yield StreamEvent::Error {
                        error: Error::Stream(err.to_string()),
                    };
                    return;
                }
            }
        }
        yield StreamEvent::Done;
    }
}

// --- History translation ---

/// Convert shared messages to the Anthropic shape.
///
/// The system message becomes the request's `system` field; tool results
/// become `tool_result` blocks inside a user message, merged with an
/// immediately preceding tool-result user message when present.
fn convert_messages(messages: &[Message]) -> (Option<String>, Vec<WireMessage>) {
    let mut system = None;
    let mut result: Vec<WireMessage> = Vec::new();

    for msg in messages {
        match msg.role {
            Role::System => system = Some(msg.content_str().to_string()),
            Role::User => result.push(WireMessage {
                role: "user",
                content: WireContent::Text(msg.content_str().to_string()),
            }),
            Role::Assistant => {
                let mut blocks = Vec::new();
                if let Some(text) = msg.content.as_deref().filter(|t| !t.is_empty()) {
                    blocks.push(ContentBlock::text(text));
                }
                for call in &msg.tool_calls {
                    // Arguments are an opaque JSON string in the history; the
                    // wire format needs a JSON value.
                    let input = serde_json::from_str(&call.arguments)
                        .unwrap_or_else(|_| serde_json::json!({}));
                    blocks.push(ContentBlock::tool_use(&call.id, &call.name, input));
                }
                if blocks.is_empty() {
                    blocks.push(ContentBlock::text(""));
                }
                result.push(WireMessage {
                    role: "assistant",
                    content: WireContent::Blocks(blocks),
                });
            }
            Role::Tool => {
                let block = ContentBlock::tool_result(
                    msg.tool_call_id.as_deref().unwrap_or_default(),
                    msg.content_str(),
                );
                if let Some(last) = result.last_mut() {
                    if last.role == "user" {
                        if let WireContent::Blocks(blocks) = &mut last.content {
                            blocks.push(block);
                            continue;
                        }
                    }
                }
                result.push(WireMessage {
                    role: "user",
                    content: WireContent::Blocks(vec![block]),
                });
            }
        }
    }

    (system, result)
}

fn convert_response(resp: AnthropicResponse) -> Response {
    let mut content = String::new();
    let mut tool_calls = Vec::new();

    for block in resp.content {
        match block.kind.as_str() {
            "text" => content.push_str(block.text.as_deref().unwrap_or_default()),
            "tool_use" => {
                let arguments = block
                    .input
                    .map(|v| v.to_string())
                    .unwrap_or_else(|| "{}".into());
                tool_calls.push(ToolCall {
                    id: block.id.unwrap_or_default(),
                    name: block.name.unwrap_or_default(),
                    arguments,
                });
            }
            _ => {}
        }
    }

    let body = (!content.is_empty()).then_some(content);

    Response {
        message: Message::assistant(body, tool_calls),
        finish_reason: resp.stop_reason.as_deref().and_then(map_finish_reason),
        usage: resp.usage.into(),
    }
}

// --- Wire types ---

#[derive(Serialize)]
struct AnthropicRequest<'a> {
    model: &'a str,
    max_tokens: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    system: Option<String>,
    messages: Vec<WireMessage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tools: Option<Vec<WireToolDef<'a>>>,
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    stream: bool,
}

#[derive(Serialize)]
struct WireMessage {
    role: &'static str,
    content: WireContent,
}

#[derive(Serialize)]
#[serde(untagged)]
enum WireContent {
    Text(String),
    Blocks(Vec<ContentBlock>),
}

#[derive(Serialize, Deserialize)]
struct ContentBlock {
    #[serde(rename = "type")]
    kind: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    text: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    input: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tool_use_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    content: Option<String>,
}

impl ContentBlock {
    fn empty(kind: &str) -> Self {
        Self {
            kind: kind.into(),
            text: None,
            id: None,
            name: None,
            input: None,
            tool_use_id: None,
            content: None,
        }
    }

    fn text(text: &str) -> Self {
        Self {
            text: Some(text.into()),
            ..Self::empty("text")
        }
    }

    fn tool_use(id: &str, name: &str, input: serde_json::Value) -> Self {
        Self {
            id: Some(id.into()),
            name: Some(name.into()),
            input: Some(input),
            ..Self::empty("tool_use")
        }
    }

    fn tool_result(tool_use_id: &str, content: &str) -> Self {
        Self {
            tool_use_id: Some(tool_use_id.into()),
            content: Some(content.into()),
            ..Self::empty("tool_result")
        }
    }
}

#[derive(Serialize)]
struct WireToolDef<'a> {
    name: &'a str,
    description: &'a str,
    input_schema: &'a serde_json::Value,
}

impl<'a> From<&'a ToolDef> for WireToolDef<'a> {
    fn from(def: &'a ToolDef) -> Self {
        Self {
            name: &def.name,
            description: &def.description,
            input_schema: &def.parameters,
        }
    }
}

#[derive(Deserialize)]
struct AnthropicResponse {
    content: Vec<ContentBlock>,
    stop_reason: Option<String>,
    usage: WireUsage,
}

#[derive(Deserialize, Default)]
#[serde(default)]
struct WireUsage {
    input_tokens: u32,
    output_tokens: u32,
}

impl From<WireUsage> for Usage {
    fn from(u: WireUsage) -> Self {
        Self {
            prompt_tokens: u.input_tokens,
            completion_tokens: u.output_tokens,
            total_tokens: u.input_tokens + u.output_tokens,
        }
    }
}

#[derive(Deserialize)]
struct ContentBlockStart {
    index: usize,
    content_block: StartBlock,
}

#[derive(Deserialize)]
struct StartBlock {
    #[serde(rename = "type")]
    kind: String,
    id: Option<String>,
    name: Option<String>,
}

#[derive(Deserialize)]
struct ContentBlockDelta {
    index: usize,
    delta: DeltaBody,
}

#[derive(Deserialize)]
struct DeltaBody {
    #[serde(rename = "type")]
    kind: String,
    text: Option<String>,
    partial_json: Option<String>,
}

#[derive(Deserialize)]
struct MessageDelta {
    delta: MessageDeltaBody,
    usage: Option<WireUsage>,
}

#[derive(Deserialize)]
struct MessageDeltaBody {
    stop_reason: Option<String>,
}

#[derive(Deserialize)]
struct ErrorEvent {
    error: ErrorBody,
}

#[derive(Deserialize)]
struct ErrorBody {
    message: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_system_message_extracted() {
        let messages = vec![Message::system("be helpful"), Message::user("hi")];
        let (system, wire) = convert_messages(&messages);
        assert_eq!(system.as_deref(), Some("be helpful"));
        assert_eq!(wire.len(), 1);
        assert_eq!(wire[0].role, "user");
    }

    #[test]
    fn test_tool_results_merge_into_one_user_message() {
        let messages = vec![
            Message::system("s"),
            Message::user("go"),
            Message::assistant(
                None,
                vec![
                    ToolCall {
                        id: "c1".into(),
                        name: "glob".into(),
                        arguments: "{}".into(),
                    },
                    ToolCall {
                        id: "c2".into(),
                        name: "grep".into(),
                        arguments: "{}".into(),
                    },
                ],
            ),
            Message::tool_result("c1", "a.rs"),
            Message::tool_result("c2", "b.rs:3: fn main"),
        ];
        let (_, wire) = convert_messages(&messages);
        // user, assistant, single user message holding both tool results
        assert_eq!(wire.len(), 3);
        match &wire[2].content {
            WireContent::Blocks(blocks) => {
                assert_eq!(blocks.len(), 2);
                assert_eq!(blocks[0].tool_use_id.as_deref(), Some("c1"));
                assert_eq!(blocks[1].tool_use_id.as_deref(), Some("c2"));
            }
            WireContent::Text(_) => panic!("expected blocks"),
        }
    }

    #[test]
    fn test_assistant_text_precedes_tool_calls() {
        let messages = vec![Message::assistant(
            Some("let me look".into()),
            vec![ToolCall {
                id: "c1".into(),
                name: "read".into(),
                arguments: r#"{"path":"x.rs"}"#.into(),
            }],
        )];
        let (_, wire) = convert_messages(&messages);
        match &wire[0].content {
            WireContent::Blocks(blocks) => {
                assert_eq!(blocks[0].kind, "text");
                assert_eq!(blocks[1].kind, "tool_use");
                assert_eq!(blocks[1].input, Some(serde_json::json!({"path": "x.rs"})));
            }
            WireContent::Text(_) => panic!("expected blocks"),
        }
    }

    #[test]
    fn test_convert_response_maps_stop_reasons() {
        let resp = AnthropicResponse {
            content: vec![ContentBlock::tool_use("c1", "bash", serde_json::json!({}))],
            stop_reason: Some("tool_use".into()),
            usage: WireUsage {
                input_tokens: 100,
                output_tokens: 20,
            },
        };
        let converted = convert_response(resp);
        assert_eq!(
            converted.finish_reason,
            Some(crate::types::FinishReason::ToolCalls)
        );
        assert_eq!(converted.usage.total_tokens, 120);
        assert!(converted.message.content.is_none());
        assert_eq!(converted.message.tool_calls.len(), 1);
    }
}
