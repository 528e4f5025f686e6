//! The provider-agnostic client interface

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use crate::error::Result;
use crate::stream::EventStream;
use crate::types::{Message, Response, ToolDef};

/// Interface to an LLM provider.
///
/// `send` is unary and used where streamed output would be unwelcome
/// (compaction, the explore sub-agent); `stream` drives main turns.
/// Implementations translate the history into their own wire format; a
/// tool-role message must round-trip its `tool_call_id`, and tool-call
/// argument strings pass through without canonicalization.
#[async_trait]
pub trait LlmClient: Send + Sync {
    /// Send a request and wait for the complete response
    async fn send(
        &self,
        cancel: &CancellationToken,
        messages: &[Message],
        tools: &[ToolDef],
    ) -> Result<Response>;

    /// Send a request, returning a stream of response events
    async fn stream(
        &self,
        cancel: &CancellationToken,
        messages: &[Message],
        tools: &[ToolDef],
    ) -> Result<EventStream>;
}
