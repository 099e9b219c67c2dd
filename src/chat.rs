//! Streaming chat completions grounded in retrieved context.
//!
//! [`ChatClient::stream_answer`] relays the upstream SSE body as a
//! stream of [`ChatStreamEvent`]s. The event grammar is: zero or more
//! `content` events, then exactly one terminal, either `error` (upstream
//! rejected the request) or `sources` (normal completion). One exception:
//! a transport failure after streaming has begun emits a word-by-word
//! diagnostic as `content` events and closes without a terminal, since
//! at that point neither terminal would be truthful.

use futures_core::Stream;
use futures_util::StreamExt;
use std::sync::Arc;
use std::time::Duration;

use crate::config::ChatConfig;
use crate::models::ChatStreamEvent;

const SYSTEM_PROMPT: &str = "You are a helpful AI study assistant. Answer questions based on the provided document context. Structure your answers as clear markdown with headings, bullet points, and bold key terms where appropriate. If the context does not contain the answer, say so instead of inventing one.";

/// Diagnostic streamed word-by-word when the upstream connection drops.
const TRANSPORT_FAILURE_DIAGNOSTIC: &str = "I apologize, but I encountered a connection issue while generating your answer. This is usually temporary. Please check your network connection and try asking your question again.";

const DIAGNOSTIC_WORD_DELAY: Duration = Duration::from_millis(20);

pub struct ChatClient {
    config: ChatConfig,
    api_key: Option<String>,
    client: reqwest::Client,
}

impl ChatClient {
    pub fn new(config: &ChatConfig, api_key: Option<String>) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;
        Ok(Self {
            config: config.clone(),
            api_key,
            client,
        })
    }

    /// Stream an answer to `question` grounded in `context`. `sources`
    /// is echoed in the terminal event so clients can render citations.
    pub fn stream_answer(
        self: &Arc<Self>,
        question: String,
        context: String,
        sources: Vec<String>,
    ) -> impl Stream<Item = ChatStreamEvent> + Send + 'static {
        let this = Arc::clone(self);

        async_stream::stream! {
            let Some(api_key) = this.api_key.clone() else {
                yield ChatStreamEvent::error(
                    "Chat is not configured: no API key is set. Add an OPENROUTER_API_KEY and restart the service.",
                );
                return;
            };

            let user_message = if context.is_empty() {
                format!("Question: {question}")
            } else {
                format!("Context from documents:\n{context}\n\nQuestion: {question}")
            };

            let body = serde_json::json!({
                "model": this.config.model,
                "messages": [
                    { "role": "system", "content": SYSTEM_PROMPT },
                    { "role": "user", "content": user_message },
                ],
                "stream": true,
            });

            let request = this
                .client
                .post(&this.config.url)
                .bearer_auth(&api_key)
                .header("Content-Type", "application/json")
                .header("HTTP-Referer", &this.config.referer)
                .header("X-Title", &this.config.title)
                .json(&body);

            let response = match request.send().await {
                Ok(response) => response,
                Err(err) => {
                    tracing::warn!(error = %err, "chat request could not be sent");
                    for word in TRANSPORT_FAILURE_DIAGNOSTIC.split_whitespace() {
                        yield ChatStreamEvent::content(format!("{word} "));
                        tokio::time::sleep(DIAGNOSTIC_WORD_DELAY).await;
                    }
                    return;
                }
            };

            let status = response.status();
            if !status.is_success() {
                let body_text = response.text().await.unwrap_or_default();
                yield ChatStreamEvent::error(upstream_error_message(status.as_u16(), &body_text));
                return;
            }

            let mut byte_stream = response.bytes_stream();
            let mut buffer = String::new();

            while let Some(next) = byte_stream.next().await {
                let bytes = match next {
                    Ok(bytes) => bytes,
                    Err(err) => {
                        tracing::warn!(error = %err, "chat stream interrupted mid-body");
                        for word in TRANSPORT_FAILURE_DIAGNOSTIC.split_whitespace() {
                            yield ChatStreamEvent::content(format!("{word} "));
                            tokio::time::sleep(DIAGNOSTIC_WORD_DELAY).await;
                        }
                        return;
                    }
                };

                buffer.push_str(&String::from_utf8_lossy(&bytes));

                while let Some(newline) = buffer.find('\n') {
                    let line = buffer[..newline].trim().to_string();
                    buffer.drain(..=newline);

                    if line.is_empty() {
                        continue;
                    }
                    let Some(payload) = line.strip_prefix("data: ") else {
                        continue;
                    };
                    let payload = payload.trim();

                    if payload == "[DONE]" || payload.is_empty() {
                        yield ChatStreamEvent::sources(sources.clone());
                        return;
                    }

                    match serde_json::from_str::<serde_json::Value>(payload) {
                        Ok(frame) => {
                            if let Some(message) = frame.get("error") {
                                let message = message
                                    .get("message")
                                    .and_then(|m| m.as_str())
                                    .unwrap_or("The AI service reported an error.");
                                yield ChatStreamEvent::error(message);
                                return;
                            }
                            if let Some(content) = extract_content(&frame) {
                                if !content.is_empty() {
                                    yield ChatStreamEvent::content(content);
                                }
                            }
                        }
                        Err(err) => {
                            tracing::debug!(error = %err, line = %payload, "skipping unparseable stream line");
                        }
                    }
                }
            }

            // Upstream closed the body without a [DONE] marker.
            yield ChatStreamEvent::sources(sources);
        }
    }
}

/// Pull the content delta out of an upstream frame. Providers differ:
/// streaming chat uses `delta.content`, non-streaming `message.content`,
/// legacy completions `text`.
fn extract_content(frame: &serde_json::Value) -> Option<String> {
    let choice = frame.get("choices")?.as_array()?.first()?;
    choice
        .get("delta")
        .and_then(|d| d.get("content"))
        .or_else(|| choice.get("message").and_then(|m| m.get("content")))
        .or_else(|| choice.get("text"))
        .and_then(|c| c.as_str())
        .map(String::from)
}

/// Map an upstream failure status to a user-facing message, preserving
/// the status code for support escalation.
fn upstream_error_message(status: u16, body: &str) -> String {
    let upstream_detail = serde_json::from_str::<serde_json::Value>(body)
        .ok()
        .and_then(|v| {
            v.get("error")
                .and_then(|e| e.get("message"))
                .and_then(|m| m.as_str())
                .map(String::from)
        })
        .unwrap_or_default();

    let friendly = match status {
        401 => {
            if upstream_detail.contains("User not found")
                || upstream_detail.contains("Invalid API key")
            {
                "The AI service API key is invalid or expired. Please update the configured key."
            } else {
                "Authentication with the AI service failed."
            }
        }
        429 => "The AI service is rate-limiting requests. Please wait a moment and try again.",
        s if s >= 500 => "The AI service is temporarily unavailable. Please try again shortly.",
        _ => {
            return if upstream_detail.is_empty() {
                format!("Error ({status}): The AI service rejected the request.")
            } else {
                format!("Error ({status}): {upstream_detail}")
            };
        }
    };

    format!("Error ({status}): {friendly}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extracts_streaming_delta_content() {
        let frame = serde_json::json!({
            "choices": [{ "delta": { "content": "Hello" } }]
        });
        assert_eq!(extract_content(&frame).as_deref(), Some("Hello"));
    }

    #[test]
    fn extracts_message_and_text_shapes() {
        let message = serde_json::json!({
            "choices": [{ "message": { "content": "full" } }]
        });
        assert_eq!(extract_content(&message).as_deref(), Some("full"));

        let text = serde_json::json!({ "choices": [{ "text": "legacy" }] });
        assert_eq!(extract_content(&text).as_deref(), Some("legacy"));
    }

    #[test]
    fn extract_content_handles_missing_choices() {
        assert_eq!(extract_content(&serde_json::json!({})), None);
        assert_eq!(
            extract_content(&serde_json::json!({ "choices": [] })),
            None
        );
    }

    #[test]
    fn maps_invalid_key_401() {
        let body = r#"{"error":{"message":"User not found."}}"#;
        let msg = upstream_error_message(401, body);
        assert!(msg.starts_with("Error (401):"), "{msg}");
        assert!(msg.contains("invalid or expired"), "{msg}");
    }

    #[test]
    fn maps_rate_limit_and_server_errors() {
        let msg = upstream_error_message(429, "");
        assert!(msg.contains("429") && msg.contains("rate-limiting"), "{msg}");

        let msg = upstream_error_message(503, "not json");
        assert!(msg.contains("503") && msg.contains("temporarily unavailable"), "{msg}");
    }

    #[test]
    fn passes_through_other_statuses_with_detail() {
        let body = r#"{"error":{"message":"model not found"}}"#;
        let msg = upstream_error_message(404, body);
        assert_eq!(msg, "Error (404): model not found");
    }
}
