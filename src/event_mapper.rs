//! The event classifier and content mapper.
//!
//! Pure mapping from raw protocol events to typed view-model fragments or
//! relation patches. Events that are not message-carrying, and encrypted
//! events whose clear payload has not arrived yet, map to `None`; the latter
//! may be re-offered later when decryption completes and the event re-emits.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::{
    events::{
        DecryptedPayload, ENCRYPTED_EVENT_TYPE, MESSAGE_EVENT_TYPE, MessageContent, PayloadError,
        REACTION_EVENT_TYPE, RawProtocolEvent, RelationDescriptor,
    },
    ids::{OwnedEventId, OwnedUserId},
};

/// One entry of a reaction tally on a target event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReactionTally {
    /// The reaction key (usually a single emoji).
    pub key: String,
    pub count: u64,
    /// Whether the local user is among the reactors.
    pub own_user_reacted: bool,
}

/// Per-room context the classifier needs beyond the event itself.
pub struct RoomContext<'a> {
    /// The local user, for "did I react" checks.
    pub own_user_id: &'a OwnedUserId,
    /// Server-aggregated reaction tallies keyed by target event id, when the
    /// transport provides them. Preferred over the manual fallback scan.
    pub server_aggregations: Option<&'a HashMap<OwnedEventId, Vec<ReactionTally>>>,
    /// The currently visible raw events of this room, used for the manual
    /// fallback scan when server aggregation is unavailable.
    pub visible_events: &'a [RawProtocolEvent],
}

/// A new-message fragment produced by the classifier; the timeline
/// reconciler turns it into a full `ViewMessage`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MessageFragment {
    pub event_id: OwnedEventId,
    pub sender: OwnedUserId,
    pub sender_display_name: Option<String>,
    pub timestamp: u64,
    pub content: MessageContent,
}

/// An edit targeting a previously-seen message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RelationPatch {
    pub target: OwnedEventId,
    pub new_body: String,
}

/// An updated reaction tally for one key on one target message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReactionUpdate {
    pub target: OwnedEventId,
    pub tally: ReactionTally,
}

/// A threaded reply associated with its parent's comment collection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ThreadAssociation {
    pub parent: OwnedEventId,
    pub reply: MessageFragment,
}

/// The classifier's output: either a view-model fragment or a relation patch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Classified {
    NewMessage(MessageFragment),
    Edit(RelationPatch),
    Reaction(ReactionUpdate),
    ThreadReply(ThreadAssociation),
}

/// Classifies a raw event into a view-model fragment or relation patch.
///
/// Returns `None` for non-message event types, for encrypted events without a
/// decrypted payload, and for malformed payloads (logged, never fatal).
pub fn classify(event: &RawProtocolEvent, ctx: &RoomContext<'_>) -> Option<Classified> {
    let (event_type, content, relation) = effective_payload(event)?;

    if event_type == REACTION_EVENT_TYPE {
        let Some(RelationDescriptor::Annotation { target, key }) = relation else {
            warn!("dropping malformed reaction event {}: no annotation relation", event.event_id);
            return None;
        };
        return Some(Classified::Reaction(aggregate_reaction(event, target, key, ctx)));
    }

    if event_type != MESSAGE_EVENT_TYPE {
        return None;
    }

    match relation {
        Some(RelationDescriptor::Replace { target }) => {
            let new_body = replacement_body(content)?;
            Some(Classified::Edit(RelationPatch { target: target.clone(), new_body }))
        }
        Some(RelationDescriptor::Thread { parent }) => {
            let fragment = parse_fragment(event, content)?;
            Some(Classified::ThreadReply(ThreadAssociation {
                parent: parent.clone(),
                reply: fragment,
            }))
        }
        Some(RelationDescriptor::Annotation { target, key }) => {
            // Some servers deliver annotations under the message event type.
            Some(Classified::Reaction(aggregate_reaction(event, target, key, ctx)))
        }
        None => {
            let fragment = parse_fragment(event, content)?;
            Some(Classified::NewMessage(fragment))
        }
    }
}

/// Resolves the message-bearing payload of an event: its own content, or the
/// decrypted clear payload for encrypted events.
fn effective_payload(
    event: &RawProtocolEvent,
) -> Option<(&str, &serde_json::Value, Option<&RelationDescriptor>)> {
    if event.event_type == ENCRYPTED_EVENT_TYPE {
        match &event.decrypted {
            Some(DecryptedPayload { event_type, content, relation }) => {
                Some((event_type.as_str(), content, relation.as_ref()))
            }
            None => {
                debug!("dropping still-encrypted event {}; may re-emit decrypted", event.event_id);
                None
            }
        }
    } else {
        Some((event.event_type.as_str(), &event.content, event.relation.as_ref()))
    }
}

fn parse_fragment(event: &RawProtocolEvent, content: &serde_json::Value) -> Option<MessageFragment> {
    match MessageContent::from_payload(content) {
        Ok(content) => Some(MessageFragment {
            event_id: event.event_id.clone(),
            sender: event.sender.clone(),
            sender_display_name: event.sender_display_name.clone(),
            timestamp: event.origin_server_ts,
            content,
        }),
        Err(PayloadError::UnknownKind) => {
            debug!("ignoring non-displayable payload in event {}", event.event_id);
            None
        }
        Err(e) => {
            warn!("dropping malformed event {}: {e}", event.event_id);
            None
        }
    }
}

/// Extracts the replacement body of an edit: the `m.new_content` payload when
/// present and valid, else the edit event's own (fallback-rendered) body.
fn replacement_body(content: &serde_json::Value) -> Option<String> {
    if let Some(new_content) = content.get("m.new_content") {
        if let Ok(parsed) = MessageContent::from_payload(new_content) {
            return Some(parsed.display_body());
        }
    }
    match MessageContent::from_payload(content) {
        Ok(parsed) => Some(parsed.display_body()),
        Err(e) => {
            warn!("dropping malformed edit payload: {e}");
            None
        }
    }
}

/// Builds the reaction tally for `key` on `target`, preferring the server's
/// aggregated counts and falling back to a manual scan of visible events.
fn aggregate_reaction(
    event: &RawProtocolEvent,
    target: &OwnedEventId,
    key: &str,
    ctx: &RoomContext<'_>,
) -> ReactionUpdate {
    if let Some(tallies) = ctx.server_aggregations.and_then(|aggs| aggs.get(target)) {
        if let Some(tally) = tallies.iter().find(|t| t.key == key) {
            return ReactionUpdate { target: target.clone(), tally: tally.clone() };
        }
    }

    // Manual fallback: count visible annotation events referencing the target.
    let mut count = 0;
    let mut own_user_reacted = false;
    let mut saw_this_event = false;
    for visible in ctx.visible_events {
        let matches = match (&visible.relation, visible.event_type.as_str()) {
            (Some(RelationDescriptor::Annotation { target: t, key: k }), REACTION_EVENT_TYPE) => {
                t == target && k == key
            }
            _ => false,
        };
        if matches {
            count += 1;
            own_user_reacted |= visible.sender == *ctx.own_user_id;
            saw_this_event |= visible.event_id == event.event_id;
        }
    }
    // The event being classified counts even if it isn't in the visible set yet.
    if !saw_this_event {
        count += 1;
        own_user_reacted |= event.sender == *ctx.own_user_id;
    }

    ReactionUpdate {
        target: target.clone(),
        tally: ReactionTally { key: key.to_owned(), count, own_user_reacted },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ids::OwnedRoomId;
    use serde_json::json;

    fn own_user() -> OwnedUserId {
        OwnedUserId::parse("@me:example.org").unwrap()
    }

    fn raw_event(id: &str, event_type: &str, content: serde_json::Value) -> RawProtocolEvent {
        RawProtocolEvent {
            event_id: OwnedEventId::parse(id).unwrap(),
            room_id: OwnedRoomId::parse("!room:example.org").unwrap(),
            sender: OwnedUserId::parse("@alice:example.org").unwrap(),
            sender_display_name: Some("Alice".to_owned()),
            event_type: event_type.to_owned(),
            origin_server_ts: 1_700_000_000_000,
            content,
            relation: None,
            decrypted: None,
        }
    }

    fn ctx<'a>(own: &'a OwnedUserId, visible: &'a [RawProtocolEvent]) -> RoomContext<'a> {
        RoomContext { own_user_id: own, server_aggregations: None, visible_events: visible }
    }

    #[test]
    fn plain_text_message_classifies_as_new_message() {
        let own = own_user();
        let event = raw_event("$e1", MESSAGE_EVENT_TYPE, json!({"msgtype": "m.text", "body": "hi"}));
        let Some(Classified::NewMessage(fragment)) = classify(&event, &ctx(&own, &[])) else {
            panic!("expected a new message");
        };
        assert_eq!(fragment.content, MessageContent::Text { body: "hi".into() });
        assert_eq!(fragment.sender_display_name.as_deref(), Some("Alice"));
    }

    #[test]
    fn non_message_event_types_map_to_none() {
        let own = own_user();
        let event = raw_event("$e1", "m.room.topic", json!({"topic": "hello"}));
        assert_eq!(classify(&event, &ctx(&own, &[])), None);
    }

    #[test]
    fn encrypted_event_without_clear_payload_is_droppable() {
        let own = own_user();
        let mut event = raw_event("$e1", ENCRYPTED_EVENT_TYPE, json!({"algorithm": "m.megolm.v1"}));
        assert_eq!(classify(&event, &ctx(&own, &[])), None);

        // Re-offered once decrypted, the same event classifies normally.
        event.decrypted = Some(DecryptedPayload {
            event_type: MESSAGE_EVENT_TYPE.to_owned(),
            content: json!({"msgtype": "m.text", "body": "now readable"}),
            relation: None,
        });
        assert!(matches!(
            classify(&event, &ctx(&own, &[])),
            Some(Classified::NewMessage(_)),
        ));
    }

    #[test]
    fn malformed_message_is_dropped_not_fatal() {
        let own = own_user();
        let event = raw_event("$e1", MESSAGE_EVENT_TYPE, json!({"msgtype": "m.image"}));
        assert_eq!(classify(&event, &ctx(&own, &[])), None);
    }

    #[test]
    fn replace_relation_becomes_a_patch_not_a_message() {
        let own = own_user();
        let mut event = raw_event(
            "$e2",
            MESSAGE_EVENT_TYPE,
            json!({
                "msgtype": "m.text",
                "body": "* fixed",
                "m.new_content": {"msgtype": "m.text", "body": "fixed"},
            }),
        );
        event.relation = Some(RelationDescriptor::Replace {
            target: OwnedEventId::parse("$e1").unwrap(),
        });
        let Some(Classified::Edit(patch)) = classify(&event, &ctx(&own, &[])) else {
            panic!("expected an edit patch");
        };
        assert_eq!(patch.target.as_str(), "$e1");
        assert_eq!(patch.new_body, "fixed");
    }

    #[test]
    fn reaction_prefers_server_aggregated_counts() {
        let own = own_user();
        let target = OwnedEventId::parse("$target").unwrap();
        let mut aggs = HashMap::new();
        aggs.insert(
            target.clone(),
            vec![ReactionTally { key: "👍".into(), count: 7, own_user_reacted: true }],
        );
        let mut event = raw_event("$r1", REACTION_EVENT_TYPE, json!({}));
        event.relation = Some(RelationDescriptor::Annotation {
            target: target.clone(),
            key: "👍".into(),
        });

        let ctx = RoomContext {
            own_user_id: &own,
            server_aggregations: Some(&aggs),
            visible_events: &[],
        };
        let Some(Classified::Reaction(update)) = classify(&event, &ctx) else {
            panic!("expected a reaction update");
        };
        assert_eq!(update.tally.count, 7);
        assert!(update.tally.own_user_reacted);
    }

    #[test]
    fn reaction_falls_back_to_scanning_visible_events() {
        let own = own_user();
        let target = OwnedEventId::parse("$target").unwrap();
        let mut visible_reaction = raw_event("$r0", REACTION_EVENT_TYPE, json!({}));
        visible_reaction.sender = own.clone();
        visible_reaction.relation = Some(RelationDescriptor::Annotation {
            target: target.clone(),
            key: "🎉".into(),
        });

        let mut incoming = raw_event("$r1", REACTION_EVENT_TYPE, json!({}));
        incoming.relation = Some(RelationDescriptor::Annotation {
            target: target.clone(),
            key: "🎉".into(),
        });

        let visible = [visible_reaction];
        let Some(Classified::Reaction(update)) = classify(&incoming, &ctx(&own, &visible)) else {
            panic!("expected a reaction update");
        };
        // One visible reaction (ours) plus the incoming one.
        assert_eq!(update.tally.count, 2);
        assert!(update.tally.own_user_reacted);
    }

    #[test]
    fn thread_relation_associates_reply_with_its_parent() {
        let own = own_user();
        let mut event = raw_event(
            "$reply",
            MESSAGE_EVENT_TYPE,
            json!({"msgtype": "m.text", "body": "in thread"}),
        );
        event.relation = Some(RelationDescriptor::Thread {
            parent: OwnedEventId::parse("$parent").unwrap(),
        });
        let Some(Classified::ThreadReply(assoc)) = classify(&event, &ctx(&own, &[])) else {
            panic!("expected a thread association");
        };
        assert_eq!(assoc.parent.as_str(), "$parent");
        assert_eq!(assoc.reply.content, MessageContent::Text { body: "in thread".into() });
    }
}
