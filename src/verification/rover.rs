//! RoVer-style verification service.
//!
//! RoVer answers with a plain embed rather than components: either a title of
//! the form `username (id)` or a `Roblox Username` / `Roblox ID` field pair.
//! The parser raises the same taxonomy as the Bloxlink one so the manager's
//! retry/skip logic is uniform.

use super::{CommandExecutor, VerificationService};
use crate::error::{ScanError, ScanResult};
use async_trait::async_trait;
use condo_proto::rest::Embed;
use condo_proto::{Message, RobloxId, UserId};
use regex::Regex;
use std::sync::Arc;
use std::sync::LazyLock;
use tokio_util::sync::CancellationToken;

static TITLE_FORM: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(?P<name>.+?)\s*\((?P<id>\d+)\)\s*$").expect("title pattern")
});

/// Parse a RoVer reply into `(roblox id, username)`.
pub fn parse_reply(reply: &Message) -> ScanResult<(RobloxId, String)> {
    let lowered_content = reply.content.to_ascii_lowercase();
    if lowered_content.contains("not verified") {
        return Err(ScanError::UserNotVerified);
    }

    let Some(embed) = reply.embeds.first() else {
        return Err(ScanError::MissingNested);
    };

    if let Some(description) = embed.description.as_deref() {
        let lowered = description.to_ascii_lowercase();
        if lowered.contains("not verified") {
            return Err(ScanError::UserNotVerified);
        }
        if lowered.contains("try again later") || lowered.contains("unable to process") {
            return Err(ScanError::ServiceUnavailable);
        }
    }

    // Preferred shape: explicit field pair.
    if let Some((name, raw_id)) = field_pair(embed) {
        let id = raw_id
            .trim()
            .parse::<u64>()
            .map_err(|_| ScanError::InvalidRobloxId(raw_id))?;
        return Ok((RobloxId(id), name));
    }

    // Fallback shape: `username (id)` title.
    if let Some(title) = embed.title.as_deref()
        && let Some(captures) = TITLE_FORM.captures(title)
    {
        let raw_id = &captures["id"];
        let id = raw_id
            .parse::<u64>()
            .map_err(|_| ScanError::InvalidRobloxId(raw_id.to_string()))?;
        return Ok((RobloxId(id), captures["name"].to_string()));
    }

    Err(ScanError::InvalidFormat(
        "embed carried neither field pair nor titled identity".to_string(),
    ))
}

fn field_pair(embed: &Embed) -> Option<(String, String)> {
    let mut name = None;
    let mut id = None;
    for field in &embed.fields {
        match field.name.to_ascii_lowercase().as_str() {
            "roblox username" => name = Some(field.value.clone()),
            "roblox id" => id = Some(field.value.clone()),
            _ => {}
        }
    }
    Some((name?, id?))
}

/// RoVer service over a shared executor.
pub struct RoverService {
    executor: Arc<CommandExecutor>,
}

impl RoverService {
    pub fn new(executor: Arc<CommandExecutor>) -> Self {
        Self { executor }
    }
}

#[async_trait]
impl VerificationService for RoverService {
    fn name(&self) -> &'static str {
        "rover"
    }

    async fn execute_command(
        &self,
        cancel: &CancellationToken,
        target: UserId,
    ) -> ScanResult<Message> {
        self.executor.execute(cancel, target).await
    }

    fn parse_response(&self, reply: &Message) -> ScanResult<(RobloxId, String)> {
        parse_reply(reply)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use condo_proto::rest::EmbedField;

    fn reply_with_embed(embed: Embed) -> Message {
        let mut reply: Message = serde_json::from_value(serde_json::json!({
            "id": "1", "channel_id": "2", "author": {"id": "3", "bot": true}
        }))
        .unwrap();
        reply.embeds = vec![embed];
        reply
    }

    #[test]
    fn parses_field_pair() {
        let reply = reply_with_embed(Embed {
            title: Some("Verification".into()),
            description: None,
            fields: vec![
                EmbedField {
                    name: "Roblox Username".into(),
                    value: "builderman".into(),
                },
                EmbedField {
                    name: "Roblox ID".into(),
                    value: "156".into(),
                },
            ],
        });
        let (id, name) = parse_reply(&reply).unwrap();
        assert_eq!(id, RobloxId(156));
        assert_eq!(name, "builderman");
    }

    #[test]
    fn parses_titled_identity() {
        let reply = reply_with_embed(Embed {
            title: Some("builderman (156)".into()),
            description: None,
            fields: vec![],
        });
        let (id, name) = parse_reply(&reply).unwrap();
        assert_eq!(id, RobloxId(156));
        assert_eq!(name, "builderman");
    }

    #[test]
    fn not_verified_in_description() {
        let reply = reply_with_embed(Embed {
            title: None,
            description: Some("That user is not verified with RoVer.".into()),
            fields: vec![],
        });
        assert!(matches!(
            parse_reply(&reply),
            Err(ScanError::UserNotVerified)
        ));
    }

    #[test]
    fn try_again_maps_to_unavailable() {
        let reply = reply_with_embed(Embed {
            title: None,
            description: Some("Something went wrong, try again later.".into()),
            fields: vec![],
        });
        assert!(matches!(
            parse_reply(&reply),
            Err(ScanError::ServiceUnavailable)
        ));
    }

    #[test]
    fn missing_embed_is_missing_nested() {
        let reply: Message = serde_json::from_value(serde_json::json!({
            "id": "1", "channel_id": "2", "author": {"id": "3", "bot": true}
        }))
        .unwrap();
        assert!(matches!(parse_reply(&reply), Err(ScanError::MissingNested)));
    }

    #[test]
    fn bad_id_in_field_pair() {
        let reply = reply_with_embed(Embed {
            title: None,
            description: None,
            fields: vec![
                EmbedField {
                    name: "Roblox Username".into(),
                    value: "x".into(),
                },
                EmbedField {
                    name: "Roblox ID".into(),
                    value: "not-a-number".into(),
                },
            ],
        });
        assert!(matches!(
            parse_reply(&reply),
            Err(ScanError::InvalidRobloxId(_))
        ));
    }
}
