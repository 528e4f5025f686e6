//! LLM provider implementations

pub mod anthropic;
pub mod openai;

use std::time::Duration;

pub use anthropic::AnthropicClient;
pub use openai::OpenAiClient;

/// Per-request transport timeout shared by all providers
pub(crate) const HTTP_TIMEOUT: Duration = Duration::from_secs(120);

/// Build the shared HTTP client
pub(crate) fn http_client() -> reqwest::Client {
    reqwest::Client::builder()
        .timeout(HTTP_TIMEOUT)
        .build()
        .expect("failed to build HTTP client")
}

/// Map a provider finish-reason string to the shared enum
pub(crate) fn map_finish_reason(reason: &str) -> Option<crate::types::FinishReason> {
    match reason {
        "stop" | "end_turn" | "stop_sequence" => Some(crate::types::FinishReason::Stop),
        "tool_calls" | "tool_use" => Some(crate::types::FinishReason::ToolCalls),
        "length" | "max_tokens" => Some(crate::types::FinishReason::Length),
        _ => None,
    }
}

/// Classify a `reqwest-eventsource` connection error for the retry loop
pub(crate) async fn classify_eventsource_error(
    err: reqwest_eventsource::Error,
) -> crate::retry::AttemptError {
    use crate::retry::AttemptError;
    match err {
        reqwest_eventsource::Error::InvalidStatusCode(_, resp) => {
            crate::retry::classify_response(resp).await
        }
        reqwest_eventsource::Error::Transport(e) => AttemptError::Transport(e),
        other => AttemptError::Fatal(crate::error::Error::Stream(other.to_string())),
    }
}
