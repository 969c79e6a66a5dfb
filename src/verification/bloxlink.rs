//! Bloxlink-style verification service.
//!
//! The reply nests a markdown profile link inside container components:
//! `### [username](https://www.roblox.com/users/<id>/profile) (<id>)`.
//! An embed with "unable to process" maps to temporary unavailability so the
//! manager's one-shot retry applies.

use super::{CommandExecutor, VerificationService};
use crate::error::{ScanError, ScanResult};
use async_trait::async_trait;
use condo_proto::rest::MessageComponent;
use condo_proto::{Message, RobloxId, UserId};
use regex::Regex;
use std::sync::Arc;
use std::sync::LazyLock;
use tokio_util::sync::CancellationToken;

static PROFILE_LINK: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\[(?P<name>[^\]]+)\]\(https://www\.roblox\.com/users/(?P<id>\d+)/profile\)")
        .expect("profile link pattern")
});

/// Parse a Bloxlink reply into `(roblox id, username)`.
pub fn parse_reply(reply: &Message) -> ScanResult<(RobloxId, String)> {
    if reply.components.is_empty() {
        // Degraded replies fall back to a plain embed.
        let unavailable = reply.embeds.iter().any(|embed| {
            embed
                .description
                .as_deref()
                .is_some_and(|d| d.to_ascii_lowercase().contains("unable to process"))
        });
        if unavailable {
            return Err(ScanError::ServiceUnavailable);
        }
        return Err(ScanError::MissingNested);
    }

    let mut contents = Vec::new();
    collect_content(&reply.components, &mut contents);
    if contents.is_empty() {
        return Err(ScanError::MissingContent);
    }

    let joined = contents.join("\n");
    let lowered = joined.to_ascii_lowercase();
    if lowered.contains("not verified") {
        return Err(ScanError::UserNotVerified);
    }
    if lowered.contains("unable to process") {
        return Err(ScanError::ServiceUnavailable);
    }

    let captures = PROFILE_LINK
        .captures(&joined)
        .ok_or_else(|| ScanError::InvalidFormat("no profile link in reply".to_string()))?;
    let raw_id = &captures["id"];
    let id = raw_id
        .parse::<u64>()
        .map_err(|_| ScanError::InvalidRobloxId(raw_id.to_string()))?;
    Ok((RobloxId(id), captures["name"].to_string()))
}

/// Depth-first collect of every text-display content string.
fn collect_content(components: &[MessageComponent], out: &mut Vec<String>) {
    for component in components {
        if let Some(content) = &component.content
            && !content.is_empty()
        {
            out.push(content.clone());
        }
        collect_content(&component.components, out);
    }
}

/// Bloxlink service over a shared executor.
pub struct BloxlinkService {
    executor: Arc<CommandExecutor>,
}

impl BloxlinkService {
    pub fn new(executor: Arc<CommandExecutor>) -> Self {
        Self { executor }
    }
}

#[async_trait]
impl VerificationService for BloxlinkService {
    fn name(&self) -> &'static str {
        "bloxlink"
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
    use condo_proto::rest::Embed;

    fn base_reply() -> Message {
        serde_json::from_value(serde_json::json!({
            "id": "1", "channel_id": "2", "author": {"id": "3", "bot": true}
        }))
        .unwrap()
    }

    fn text_component(content: &str) -> MessageComponent {
        MessageComponent {
            kind: 10,
            content: Some(content.to_string()),
            components: Vec::new(),
        }
    }

    fn container(children: Vec<MessageComponent>) -> MessageComponent {
        MessageComponent {
            kind: 17,
            content: None,
            components: children,
        }
    }

    #[test]
    fn parses_nested_profile_link() {
        let mut reply = base_reply();
        reply.components = vec![container(vec![text_component(
            "### [builderman](https://www.roblox.com/users/156/profile) (156)",
        )])];
        let (id, name) = parse_reply(&reply).unwrap();
        assert_eq!(id, RobloxId(156));
        assert_eq!(name, "builderman");
    }

    #[test]
    fn not_verified_maps_to_taxonomy() {
        let mut reply = base_reply();
        reply.components = vec![text_component("This user is not verified with Bloxlink.")];
        assert!(matches!(
            parse_reply(&reply),
            Err(ScanError::UserNotVerified)
        ));
    }

    #[test]
    fn empty_components_with_degraded_embed_is_unavailable() {
        let mut reply = base_reply();
        reply.embeds = vec![Embed {
            title: None,
            description: Some("We were unable to process your request, try again.".into()),
            fields: vec![],
        }];
        assert!(matches!(
            parse_reply(&reply),
            Err(ScanError::ServiceUnavailable)
        ));
    }

    #[test]
    fn empty_components_without_embed_is_missing_nested() {
        assert!(matches!(
            parse_reply(&base_reply()),
            Err(ScanError::MissingNested)
        ));
    }

    #[test]
    fn component_without_link_is_invalid_format() {
        let mut reply = base_reply();
        reply.components = vec![text_component("something unexpected")];
        assert!(matches!(
            parse_reply(&reply),
            Err(ScanError::InvalidFormat(_))
        ));
    }
}
