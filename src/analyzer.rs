//! AI message classification.
//!
//! The pipeline does not host a classifier; it hands message batches to a
//! [`MessageAnalyzer`] collaborator. The production implementation posts to
//! an OpenAI-compatible chat-completions endpoint and decodes a strict JSON
//! verdict list. A malformed response degrades to "no findings" with a warn
//! log so one flaky completion cannot stall a scan.

use crate::config::AnalyzerConfig;
use crate::error::{ScanError, ScanResult};
use async_trait::async_trait;
use condo_proto::{GuildId, MessageId, UserId};
use serde::Deserialize;
use serde_json::json;
use std::time::Duration;
use tracing::{debug, warn};

const REQUEST_TIMEOUT: Duration = Duration::from_secs(60);

/// One message handed to the analyzer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MessageContent {
    pub id: MessageId,
    pub content: String,
}

/// One message the analyzer flagged.
#[derive(Debug, Clone, PartialEq)]
pub struct FlaggedMessage {
    pub message_id: MessageId,
    pub content: String,
    /// Short classification, e.g. "sexual content".
    pub reason: String,
    /// Classifier confidence in `[0, 1]`.
    pub confidence: f64,
}

/// The classification seam.
#[async_trait]
pub trait MessageAnalyzer: Send + Sync {
    /// Classify a user's messages from one guild. Returns only the flagged
    /// subset; an empty vec means nothing inappropriate was found.
    async fn process_messages(
        &self,
        guild: GuildId,
        guild_name: &str,
        user: UserId,
        messages: &[MessageContent],
    ) -> ScanResult<Vec<FlaggedMessage>>;
}

/// Production analyzer over an OpenAI-compatible endpoint.
pub struct AiAnalyzer {
    http: reqwest::Client,
    config: AnalyzerConfig,
}

const SYSTEM_PROMPT: &str = "You are a trust-and-safety classifier reviewing chat messages \
from a gaming community for content that is sexually explicit, grooming-adjacent, or \
solicits off-platform contact with minors. Respond with JSON only: \
{\"flagged\":[{\"index\":<message index>,\"reason\":\"<short reason>\",\
\"confidence\":<0..1>}]}. Flag nothing that is merely crude or profane.";

#[derive(Deserialize)]
struct CompletionResponse {
    choices: Vec<CompletionChoice>,
}

#[derive(Deserialize)]
struct CompletionChoice {
    message: CompletionMessage,
}

#[derive(Deserialize)]
struct CompletionMessage {
    content: String,
}

#[derive(Deserialize)]
struct VerdictList {
    #[serde(default)]
    flagged: Vec<Verdict>,
}

#[derive(Deserialize)]
struct Verdict {
    index: usize,
    #[serde(default)]
    reason: String,
    #[serde(default)]
    confidence: f64,
}

impl AiAnalyzer {
    /// Build from analyzer config.
    pub fn new(config: AnalyzerConfig) -> Self {
        let http = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());
        Self { http, config }
    }

    fn batch_prompt(guild_name: &str, messages: &[MessageContent]) -> String {
        let mut prompt = format!("Server: {guild_name}\nMessages:\n");
        for (index, message) in messages.iter().enumerate() {
            prompt.push_str(&format!("{index}: {}\n", message.content));
        }
        prompt
    }

    fn decode_verdicts(raw: &str, messages: &[MessageContent]) -> Option<Vec<FlaggedMessage>> {
        // Some models wrap JSON in a code fence; strip it before parsing.
        let trimmed = raw
            .trim()
            .trim_start_matches("```json")
            .trim_start_matches("```")
            .trim_end_matches("```")
            .trim();
        let verdicts: VerdictList = serde_json::from_str(trimmed).ok()?;
        Some(
            verdicts
                .flagged
                .into_iter()
                .filter_map(|v| {
                    let message = messages.get(v.index)?;
                    Some(FlaggedMessage {
                        message_id: message.id,
                        content: message.content.clone(),
                        reason: if v.reason.is_empty() {
                            "inappropriate content".to_string()
                        } else {
                            v.reason
                        },
                        confidence: v.confidence.clamp(0.0, 1.0),
                    })
                })
                .collect(),
        )
    }
}

#[async_trait]
impl MessageAnalyzer for AiAnalyzer {
    async fn process_messages(
        &self,
        guild: GuildId,
        guild_name: &str,
        user: UserId,
        messages: &[MessageContent],
    ) -> ScanResult<Vec<FlaggedMessage>> {
        if messages.is_empty() {
            return Ok(Vec::new());
        }

        let batch: Vec<MessageContent> = messages
            .iter()
            .take(self.config.max_messages)
            .cloned()
            .collect();

        let payload = json!({
            "model": self.config.model,
            "temperature": 0.0,
            "messages": [
                {"role": "system", "content": SYSTEM_PROMPT},
                {"role": "user", "content": Self::batch_prompt(guild_name, &batch)},
            ],
        });

        let response = self
            .http
            .post(&self.config.endpoint)
            .bearer_auth(&self.config.api_key)
            .json(&payload)
            .send()
            .await?;
        let status = response.status();
        if status.as_u16() == 429 {
            return Err(ScanError::RateLimited);
        }
        if !status.is_success() {
            return Err(ScanError::Api(status.as_u16()));
        }

        let completion: CompletionResponse = response.json().await?;
        let Some(choice) = completion.choices.first() else {
            warn!(guild = %guild, user = %user, "analyzer returned no choices");
            return Ok(Vec::new());
        };

        match Self::decode_verdicts(&choice.message.content, &batch) {
            Some(flagged) => {
                debug!(
                    guild = %guild,
                    user = %user,
                    scanned = batch.len(),
                    flagged = flagged.len(),
                    "analyzer batch complete"
                );
                Ok(flagged)
            }
            None => {
                warn!(guild = %guild, user = %user, "analyzer response was not valid JSON, treating as clean");
                Ok(Vec::new())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn batch() -> Vec<MessageContent> {
        vec![
            MessageContent { id: MessageId(1), content: "hello".into() },
            MessageContent { id: MessageId(2), content: "bad".into() },
        ]
    }

    #[test]
    fn decodes_plain_json_verdicts() {
        let raw = r#"{"flagged":[{"index":1,"reason":"explicit","confidence":0.9}]}"#;
        let flagged = AiAnalyzer::decode_verdicts(raw, &batch()).unwrap();
        assert_eq!(flagged.len(), 1);
        assert_eq!(flagged[0].message_id, MessageId(2));
        assert_eq!(flagged[0].reason, "explicit");
    }

    #[test]
    fn decodes_fenced_json() {
        let raw = "```json\n{\"flagged\":[]}\n```";
        let flagged = AiAnalyzer::decode_verdicts(raw, &batch()).unwrap();
        assert!(flagged.is_empty());
    }

    #[test]
    fn out_of_range_index_is_dropped() {
        let raw = r#"{"flagged":[{"index":9,"reason":"x","confidence":0.5}]}"#;
        let flagged = AiAnalyzer::decode_verdicts(raw, &batch()).unwrap();
        assert!(flagged.is_empty());
    }

    #[test]
    fn garbage_yields_none() {
        assert!(AiAnalyzer::decode_verdicts("not json at all", &batch()).is_none());
    }

    #[test]
    fn confidence_is_clamped() {
        let raw = r#"{"flagged":[{"index":0,"reason":"x","confidence":3.0}]}"#;
        let flagged = AiAnalyzer::decode_verdicts(raw, &batch()).unwrap();
        assert_eq!(flagged[0].confidence, 1.0);
    }
}
