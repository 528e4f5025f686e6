//! pilot-ai: provider-agnostic LLM client abstraction
//!
//! This crate defines the message and tool types shared across the agent,
//! the streaming event model with its accumulator, the retry policy for
//! provider HTTP calls, and concrete OpenAI/Anthropic providers.

pub mod client;
pub mod error;
pub mod providers;
pub mod retry;
pub mod stream;
pub mod types;

pub use client::LlmClient;
pub use error::{Error, Result};
pub use retry::{do_with_retry, RetryConfig};
pub use stream::{accumulate, EventStream, StreamEvent, ToolCallDelta};
pub use types::{FinishReason, Message, Response, Role, ToolCall, ToolDef, Usage};
