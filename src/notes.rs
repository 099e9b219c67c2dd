//! Study-notes generation from extracted document text.
//!
//! One chat-completion call per upload batch. Infallible by contract:
//! a missing credential, an upstream failure, or an empty completion
//! all degrade to a locally built markdown summary so the upload still
//! yields a note.

use std::time::Duration;

use crate::config::ChatConfig;

/// Input cap for the notes prompt, in characters.
const NOTES_INPUT_CAP: usize = 8_000;
const TRUNCATION_MARKER: &str = "\n\n[Content truncated for processing...]";

const NOTES_SYSTEM_PROMPT: &str = "You are an expert study assistant. Given document content, produce comprehensive study notes in markdown: a title, a short overview, key concepts with bold terms, and a bullet-point summary of the main ideas. Be faithful to the source material.";

pub struct NoteGenerator {
    config: ChatConfig,
    api_key: Option<String>,
    client: reqwest::Client,
}

impl NoteGenerator {
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

    /// Generate study notes for `text`. Never fails; degraded paths
    /// return a markdown summary built from the source.
    pub async fn generate(&self, title: &str, text: &str) -> String {
        let input = cap_input(text);

        let Some(api_key) = &self.api_key else {
            return placeholder_notes(title, &input);
        };

        match self.generate_remote(api_key, &input).await {
            Ok(notes) if !notes.trim().is_empty() => notes,
            Ok(_) => {
                tracing::warn!("notes completion was empty, using local summary");
                summary_notes(title, &input)
            }
            Err(err) => {
                tracing::warn!(error = %err, "notes generation failed, using local summary");
                summary_notes(title, &input)
            }
        }
    }

    async fn generate_remote(&self, api_key: &str, input: &str) -> anyhow::Result<String> {
        let body = serde_json::json!({
            "model": self.config.model,
            "messages": [
                { "role": "system", "content": NOTES_SYSTEM_PROMPT },
                { "role": "user", "content": format!("Create study notes for the following content:\n\n{input}") },
            ],
            "temperature": 0.3,
            "max_tokens": 2000,
        });

        let response = self
            .client
            .post(&self.config.url)
            .bearer_auth(api_key)
            .header("Content-Type", "application/json")
            .header("HTTP-Referer", &self.config.referer)
            .header("X-Title", &self.config.title)
            .json(&body)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            anyhow::bail!("notes API error {}: {}", status, text);
        }

        let json: serde_json::Value = response.json().await?;
        Ok(json
            .get("choices")
            .and_then(|c| c.as_array())
            .and_then(|c| c.first())
            .and_then(|choice| choice.get("message"))
            .and_then(|m| m.get("content"))
            .and_then(|c| c.as_str())
            .unwrap_or_default()
            .to_string())
    }
}

fn cap_input(text: &str) -> String {
    if text.chars().count() <= NOTES_INPUT_CAP {
        return text.to_string();
    }
    let capped: String = text.chars().take(NOTES_INPUT_CAP).collect();
    format!("{capped}{TRUNCATION_MARKER}")
}

fn char_prefix(text: &str, max_chars: usize) -> String {
    text.chars().take(max_chars).collect()
}

/// Notes body when no credential is configured at all.
fn placeholder_notes(title: &str, text: &str) -> String {
    format!(
        "# Study Notes: {title}\n\n> AI note generation is not configured. Below is an excerpt of the uploaded content.\n\n## Content Preview\n\n{}\n",
        char_prefix(text, 500)
    )
}

/// Notes body when the API call failed or returned nothing.
fn summary_notes(title: &str, text: &str) -> String {
    format!(
        "# Study Notes: {title}\n\n> Automatic note generation was unavailable for this upload. This summary was generated from the document text.\n\n## Document Excerpt\n\n{}\n\n## Next Steps\n\n- Review the excerpt above and highlight key terms.\n- Re-upload or regenerate notes once the AI service is reachable.\n",
        char_prefix(text, 1500)
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ChatConfig;

    #[tokio::test]
    async fn missing_key_returns_placeholder() {
        let generator = NoteGenerator::new(&ChatConfig::default(), None).unwrap();
        let notes = generator
            .generate("Biology 101", "Cells are the basic unit of life.")
            .await;
        assert!(notes.starts_with("# Study Notes: Biology 101"));
        assert!(notes.contains("Cells are the basic unit of life."));
        assert!(notes.contains("not configured"));
    }

    #[test]
    fn input_is_capped_with_marker() {
        let long = "x".repeat(NOTES_INPUT_CAP + 100);
        let capped = cap_input(&long);
        assert!(capped.ends_with(TRUNCATION_MARKER));
        assert_eq!(
            capped.chars().count(),
            NOTES_INPUT_CAP + TRUNCATION_MARKER.chars().count()
        );

        let short = "short text";
        assert_eq!(cap_input(short), short);
    }

    #[test]
    fn cap_input_counts_chars_not_bytes() {
        let long = "é".repeat(NOTES_INPUT_CAP);
        assert_eq!(cap_input(&long), long);
    }

    #[test]
    fn summary_includes_excerpt_prefix() {
        let text = "a".repeat(3000);
        let notes = summary_notes("Doc", &text);
        assert!(notes.contains(&"a".repeat(1500)));
        assert!(!notes.contains(&"a".repeat(1501)));
    }
}
