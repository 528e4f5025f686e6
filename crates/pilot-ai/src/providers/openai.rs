//! OpenAI Chat Completions provider

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

/// OpenAI API client
pub struct OpenAiClient {
    http: reqwest::Client,
    api_key: String,
    model: String,
    max_tokens: u32,
    base_url: String,
    retry: RetryConfig,
}

impl OpenAiClient {
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

    /// Create from the `OPENAI_API_KEY` environment variable
    pub fn from_env(model: impl Into<String>, max_tokens: u32) -> Result<Self> {
        let api_key = std::env::var("OPENAI_API_KEY").map_err(|_| Error::InvalidApiKey)?;
        Ok(Self::new(
            api_key,
            model,
            max_tokens,
            "https://api.openai.com/v1",
        ))
    }

    fn build_request<'a>(
        &'a self,
        messages: &[Message],
        tools: &'a [ToolDef],
        stream: bool,
    ) -> ChatRequest<'a> {
        ChatRequest {
            model: &self.model,
            messages: messages.iter().map(WireMessage::from).collect(),
            max_tokens: self.max_tokens,
            tools: if tools.is_empty() {
                None
            } else {
                Some(tools.iter().map(WireToolDef::from).collect())
            },
            stream,
            stream_options: stream.then_some(StreamOptions {
                include_usage: true,
            }),
        }
    }

    fn url(&self) -> String {
        format!("{}/chat/completions", self.base_url)
    }
}

#[async_trait]
impl LlmClient for OpenAiClient {
    async fn send(
        &self,
        cancel: &CancellationToken,
        messages: &[Message],
        tools: &[ToolDef],
    ) -> Result<Response> {
        let body = self.build_request(messages, tools, false);
        let url = self.url();

        let api_resp: ChatResponse = do_with_retry(cancel, &self.retry, |_| {
            let req = self.http.post(&url).bearer_auth(&self.api_key).json(&body);
            async move {
                let resp = tokio::select! {
                    _ = cancel.cancelled() => return Err(AttemptError::Fatal(Error::Cancelled)),
                    r = req.send() => r.map_err(AttemptError::Transport)?,
                };
                if resp.status().is_success() {
                    resp.json::<ChatResponse>()
                        .await
                        .map_err(|e| AttemptError::Fatal(Error::UnexpectedResponse(e.to_string())))
                } else {
                    Err(classify_response(resp).await)
                }
            }
        })
        .await?;

        let choice = api_resp
            .choices
            .into_iter()
            .next()
            .ok_or_else(|| Error::UnexpectedResponse("no choices in API response".into()))?;

        let tool_calls = choice
            .message
            .tool_calls
            .unwrap_or_default()
            .into_iter()
            .map(|c| ToolCall {
                id: c.id,
                name: c.function.name,
                arguments: c.function.arguments,
            })
            .collect();

        Ok(Response {
            message: Message::assistant(choice.message.content, tool_calls),
            finish_reason: choice.finish_reason.as_deref().and_then(map_finish_reason),
            usage: api_resp.usage.map(Usage::from).unwrap_or_default(),
        })
    }

    async fn stream(
        &self,
        cancel: &CancellationToken,
        messages: &[Message],
        tools: &[ToolDef],
    ) -> Result<EventStream> {
        let body = self.build_request(messages, tools, true);
        let url = self.url();

        // Open the SSE connection through the retry policy; HTTP-level
        // failures (status codes, transport) are retried, stream errors
        // after opening are not.
        let es = do_with_retry(cancel, &self.retry, |_| {
            let req = self.http.post(&url).bearer_auth(&self.api_key).json(&body);
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

fn translate_stream(
    mut es: EventSource,
    cancel: CancellationToken,
) -> impl futures::Stream<Item = StreamEvent> {
    stream! {
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
                Some(Ok(Event::Message(msg))) => {
                    if msg.data == "[DONE]" {
                        es.close();
                        yield StreamEvent::Done;
                        return;
                    }
                    let chunk: ChatChunk = match serde_json::from_str(&msg.data) {
                        Ok(c) => c,
                        Err(e) => {
                            tracing::debug!("skipping malformed chunk: {}", e);
                            continue;
                        }
                    };

                    if let Some(usage) = chunk.usage {
                        yield StreamEvent::Usage { usage: usage.into() };
                    }

                    let Some(choice) = chunk.choices.into_iter().next() else {
                        continue;
                    };

                    if let Some(text) = choice.delta.content {
                        if !text.is_empty() {
                            yield StreamEvent::TextDelta { delta: text };
                        }
                    }

                    if let Some(calls) = choice.delta.tool_calls {
                        let deltas = calls
                            .into_iter()
                            .map(|c| ToolCallDelta {
                                index: c.index,
                                id: c.id,
                                name: c.function.as_ref().and_then(|f| f.name.clone()),
                                arguments: c.function.and_then(|f| f.arguments),
                            })
                            .collect();
                        yield StreamEvent::ToolCallDeltas { deltas };
                    }

                    if let Some(reason) = choice.finish_reason {
                        if let Some(reason) = map_finish_reason(&reason) {
                            yield StreamEvent::FinishReason { reason };
                        }
                    }
                }
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

// --- Wire types ---

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<WireMessage>,
    max_tokens: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    tools: Option<Vec<WireToolDef<'a>>>,
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    stream: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    stream_options: Option<StreamOptions>,
}

#[derive(Serialize)]
struct StreamOptions {
    include_usage: bool,
}

#[derive(Serialize)]
struct WireMessage {
    role: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    content: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tool_calls: Option<Vec<WireToolCall>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tool_call_id: Option<String>,
}

impl From<&Message> for WireMessage {
    fn from(msg: &Message) -> Self {
        let role = match msg.role {
            Role::System => "system",
            Role::User => "user",
            Role::Assistant => "assistant",
            Role::Tool => "tool",
        };
        let tool_calls = if msg.tool_calls.is_empty() {
            None
        } else {
            Some(msg.tool_calls.iter().map(WireToolCall::from).collect())
        };
        // Tool results must keep an empty-string body; an assistant message
        // with only tool calls legitimately has none.
        let content = match msg.role {
            Role::Tool => Some(msg.content_str().to_string()),
            _ => msg.content.clone(),
        };
        Self {
            role,
            content,
            tool_calls,
            tool_call_id: msg.tool_call_id.clone(),
        }
    }
}

#[derive(Serialize, Deserialize)]
struct WireToolCall {
    id: String,
    #[serde(rename = "type")]
    kind: String,
    function: WireFunctionCall,
}

impl From<&ToolCall> for WireToolCall {
    fn from(call: &ToolCall) -> Self {
        Self {
            id: call.id.clone(),
            kind: "function".into(),
            function: WireFunctionCall {
                name: call.name.clone(),
                arguments: call.arguments.clone(),
            },
        }
    }
}

#[derive(Serialize, Deserialize)]
struct WireFunctionCall {
    name: String,
    arguments: String,
}

#[derive(Serialize)]
struct WireToolDef<'a> {
    #[serde(rename = "type")]
    kind: &'static str,
    function: WireFunctionDef<'a>,
}

#[derive(Serialize)]
struct WireFunctionDef<'a> {
    name: &'a str,
    description: &'a str,
    parameters: &'a serde_json::Value,
}

impl<'a> From<&'a ToolDef> for WireToolDef<'a> {
    fn from(def: &'a ToolDef) -> Self {
        Self {
            kind: "function",
            function: WireFunctionDef {
                name: &def.name,
                description: &def.description,
                parameters: &def.parameters,
            },
        }
    }
}

#[derive(Deserialize)]
struct ChatResponse {
    choices: Vec<Choice>,
    usage: Option<WireUsage>,
}

#[derive(Deserialize)]
struct Choice {
    message: RespMessage,
    finish_reason: Option<String>,
}

#[derive(Deserialize)]
struct RespMessage {
    content: Option<String>,
    tool_calls: Option<Vec<WireToolCall>>,
}

#[derive(Deserialize)]
struct WireUsage {
    #[serde(default)]
    prompt_tokens: u32,
    #[serde(default)]
    completion_tokens: u32,
    #[serde(default)]
    total_tokens: u32,
}

impl From<WireUsage> for Usage {
    fn from(u: WireUsage) -> Self {
        Self {
            prompt_tokens: u.prompt_tokens,
            completion_tokens: u.completion_tokens,
            total_tokens: u.total_tokens,
        }
    }
}

#[derive(Deserialize)]
struct ChatChunk {
    #[serde(default)]
    choices: Vec<ChunkChoice>,
    usage: Option<WireUsage>,
}

#[derive(Deserialize)]
struct ChunkChoice {
    delta: ChunkDelta,
    finish_reason: Option<String>,
}

#[derive(Deserialize, Default)]
#[serde(default)]
struct ChunkDelta {
    content: Option<String>,
    tool_calls: Option<Vec<ChunkToolCall>>,
}

#[derive(Deserialize)]
struct ChunkToolCall {
    index: usize,
    id: Option<String>,
    function: Option<ChunkFunction>,
}

#[derive(Deserialize)]
struct ChunkFunction {
    name: Option<String>,
    arguments: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_wire_message_keeps_empty_tool_body() {
        let msg = Message::tool_result("c1", "");
        let wire = WireMessage::from(&msg);
        assert_eq!(wire.role, "tool");
        assert_eq!(wire.content.as_deref(), Some(""));
        assert_eq!(wire.tool_call_id.as_deref(), Some("c1"));
    }

    #[test]
    fn test_wire_message_omits_absent_assistant_body() {
        let msg = Message::assistant(
            None,
            vec![ToolCall {
                id: "c1".into(),
                name: "glob".into(),
                arguments: r#"{"pattern":"*.rs"}"#.into(),
            }],
        );
        let wire = WireMessage::from(&msg);
        let json = serde_json::to_string(&wire).unwrap();
        assert!(!json.contains("\"content\""));
        // Arguments are passed through verbatim.
        assert!(json.contains(r#"{\"pattern\":\"*.rs\"}"#));
    }

    #[test]
    fn test_chunk_parsing() {
        let data = r#"{"choices":[{"delta":{"tool_calls":[{"index":0,"id":"c1","function":{"name":"glob","arguments":"{\"pa"}}]},"finish_reason":null}]}"#;
        let chunk: ChatChunk = serde_json::from_str(data).unwrap();
        let calls = chunk.choices[0].delta.tool_calls.as_ref().unwrap();
        assert_eq!(calls[0].index, 0);
        assert_eq!(calls[0].id.as_deref(), Some("c1"));
        assert_eq!(
            calls[0].function.as_ref().unwrap().arguments.as_deref(),
            Some("{\"pa")
        );
    }

    #[test]
    fn test_request_serialization_without_tools() {
        let client = OpenAiClient::new("k", "gpt-4o-mini", 1024, "https://api.openai.com/v1");
        let req = client.build_request(&[Message::user("hi")], &[], false);
        let json = serde_json::to_string(&req).unwrap();
        assert!(!json.contains("\"tools\""));
        assert!(!json.contains("\"stream\""));
    }
}
