//! The per-room timeline reconciler.
//!
//! Each room owns one [`TimelineReconciler`]: an insertion-ordered store of
//! message view models that merges live events, edits, reactions, thread
//! replies, optimistic local sends, and redactions into a stable, deduplicated
//! `ViewMessage` sequence. All reconciliation is single-threaded and runs to
//! completion per call; verb completions arrive out of band on an update
//! channel and are folded in by [`TimelineReconciler::process_updates`].

use chrono::Utc;
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::{
    client::{ClientRequest, RequestSender},
    errors::ClientError,
    event_mapper::{Classified, MessageFragment, ReactionTally, RelationPatch},
    events::{ContentUrl, MessageContent, MessageKind},
    ids::{OwnedEventId, OwnedRoomId, OwnedUserId},
};

/// The delivery status of a message in the view model.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageStatus {
    /// An optimistic local send awaiting server confirmation.
    Pending,
    /// Confirmed by (or received from) the server.
    Sent,
    /// The send verb failed; retained with no automatic retry.
    Failed,
}

/// A reconciled, display-ready message.
///
/// Ids are unique within a room's reconciled set; temporary (`~`-prefixed)
/// ids never collide with server ids and are never persisted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ViewMessage {
    pub id: OwnedEventId,
    pub room_id: OwnedRoomId,
    pub sender_id: OwnedUserId,
    pub sender_display_name: Option<String>,
    pub kind: MessageKind,
    pub body: String,
    /// The content-address URL of the message's media, if any.
    pub source: Option<ContentUrl>,
    pub status: MessageStatus,
    pub edited: bool,
    /// Milliseconds since the Unix epoch.
    pub timestamp: u64,
    /// Aggregated reaction tallies, one per reaction key.
    pub reactions: Vec<ReactionTally>,
    /// Event ids of threaded replies associated with this message.
    pub thread_replies: Vec<OwnedEventId>,
}

/// Out-of-band completions delivered to a room's reconciler by the client
/// worker, folded into the view model by `process_updates`.
#[derive(Debug)]
pub enum TimelineUpdate {
    /// An optimistic send was confirmed; the temp entry can be retired.
    /// The server-confirmed message arrives independently via the live stream.
    SendConfirmed {
        temp_id: OwnedEventId,
        event_id: OwnedEventId,
    },
    /// An optimistic send failed; the entry is kept with `status = Failed`.
    SendFailed {
        temp_id: OwnedEventId,
        error: ClientError,
    },
    EditFailed {
        target: OwnedEventId,
        error: ClientError,
    },
    /// A redact verb failed after the entry was already removed optimistically.
    /// There is no rollback path; the failure is logged and surfaced here.
    RedactFailed {
        event_id: OwnedEventId,
        error: ClientError,
    },
    ReactionFailed {
        target: OwnedEventId,
        key: String,
        error: ClientError,
    },
}

/// A verb failure that left no entry behind to carry a `Failed` status,
/// returned from [`TimelineReconciler::process_updates`] so the caller can
/// show it to the user (sends instead mark their entry `Failed` in place).
#[derive(Debug, Clone)]
pub enum OperationFailure {
    Edit {
        target: OwnedEventId,
        error: ClientError,
    },
    Redact {
        event_id: OwnedEventId,
        error: ClientError,
    },
    Reaction {
        target: OwnedEventId,
        key: String,
        error: ClientError,
    },
}

/// The per-room reconciliation state machine.
pub struct TimelineReconciler {
    room_id: OwnedRoomId,
    own_user_id: OwnedUserId,
    own_display_name: Option<String>,
    /// Insertion-ordered map from event id to its reconciled view model.
    /// Exclusively owned and mutated by this reconciler.
    messages: IndexMap<OwnedEventId, ViewMessage>,
    request_sender: RequestSender,
    update_sender: crossbeam_channel::Sender<TimelineUpdate>,
    update_receiver: crossbeam_channel::Receiver<TimelineUpdate>,
    /// The last non-temporary id a read receipt was emitted for.
    last_read_marker: Option<OwnedEventId>,
}

impl TimelineReconciler {
    pub fn new(
        room_id: OwnedRoomId,
        own_user_id: OwnedUserId,
        own_display_name: Option<String>,
        request_sender: RequestSender,
    ) -> Self {
        let (update_sender, update_receiver) = crossbeam_channel::unbounded();
        Self {
            room_id,
            own_user_id,
            own_display_name,
            messages: IndexMap::new(),
            request_sender,
            update_sender,
            update_receiver,
            last_read_marker: None,
        }
    }

    pub fn room_id(&self) -> &OwnedRoomId {
        &self.room_id
    }

    /// The reconciled messages, in insertion order.
    pub fn messages(&self) -> impl Iterator<Item = &ViewMessage> {
        self.messages.values()
    }

    pub fn get(&self, id: &OwnedEventId) -> Option<&ViewMessage> {
        self.messages.get(id)
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    /// Merges one classified live-stream item into the view model.
    pub fn apply(&mut self, classified: Classified) {
        match classified {
            Classified::NewMessage(fragment) => {
                if self.messages.contains_key(&fragment.event_id) {
                    debug!("ignoring duplicate event {} in {}", fragment.event_id, self.room_id);
                    return;
                }
                let message = self.view_message_from(fragment, MessageStatus::Sent);
                self.messages.insert(message.id.clone(), message);
                self.advance_read_marker();
            }
            Classified::Edit(patch) => self.apply_patch(patch),
            Classified::Reaction(update) => {
                let Some(target) = self.messages.get_mut(&update.target) else {
                    debug!("reaction for unknown event {} in {}", update.target, self.room_id);
                    return;
                };
                upsert_tally(&mut target.reactions, update.tally);
            }
            Classified::ThreadReply(assoc) => {
                let Some(parent) = self.messages.get_mut(&assoc.parent) else {
                    debug!("thread reply for unknown parent {} in {}", assoc.parent, self.room_id);
                    return;
                };
                if !parent.thread_replies.contains(&assoc.reply.event_id) {
                    parent.thread_replies.push(assoc.reply.event_id.clone());
                }
            }
        }
    }

    /// Applies an edit patch: idempotent, and a no-op for unknown targets.
    fn apply_patch(&mut self, patch: RelationPatch) {
        let Some(message) = self.messages.get_mut(&patch.target) else {
            debug!("edit for unknown event {} in {}", patch.target, self.room_id);
            return;
        };
        message.body = patch.new_body;
        message.edited = true;
    }

    /// Optimistically appends an outgoing message and issues the send verb.
    ///
    /// The returned temporary id identifies the pending entry until the
    /// server confirms the send (at which point the temp entry is retired and
    /// the confirmed event arrives independently through the live stream) or
    /// the send fails (the entry stays with `status = Failed`; no auto-retry).
    pub fn send_message(&mut self, content: MessageContent) -> OwnedEventId {
        let temp_id = OwnedEventId::temporary();
        let message = ViewMessage {
            id: temp_id.clone(),
            room_id: self.room_id.clone(),
            sender_id: self.own_user_id.clone(),
            sender_display_name: self.own_display_name.clone(),
            kind: content.kind(),
            body: content.display_body(),
            source: content.source().cloned(),
            status: MessageStatus::Pending,
            edited: false,
            timestamp: Utc::now().timestamp_millis() as u64,
            reactions: Vec::new(),
            thread_replies: Vec::new(),
        };
        self.messages.insert(temp_id.clone(), message);
        self.request_sender.submit(ClientRequest::SendMessage {
            room_id: self.room_id.clone(),
            temp_id: temp_id.clone(),
            content,
            update_sender: self.update_sender.clone(),
        });
        temp_id
    }

    /// Optimistically applies an edit to a known message and issues the edit verb.
    pub fn edit_message(&mut self, target: OwnedEventId, new_body: String) {
        if !self.messages.contains_key(&target) {
            warn!("refusing to edit unknown event {} in {}", target, self.room_id);
            return;
        }
        self.apply_patch(RelationPatch { target: target.clone(), new_body: new_body.clone() });
        self.request_sender.submit(ClientRequest::EditMessage {
            room_id: self.room_id.clone(),
            target,
            new_body,
            update_sender: self.update_sender.clone(),
        });
    }

    /// Optimistically removes the entry and issues the redact verb.
    ///
    /// Redacting an id that is not present is a precise no-op: nothing is
    /// removed and no verb is issued. A later verb failure does not roll the
    /// removal back.
    pub fn redact(&mut self, event_id: &OwnedEventId, reason: Option<String>) {
        if self.messages.shift_remove(event_id).is_none() {
            return;
        }
        // A temp id never reached the server, so there is nothing to redact
        // there; dropping the local entry is the whole operation.
        if event_id.is_temporary() {
            return;
        }
        self.request_sender.submit(ClientRequest::Redact {
            room_id: self.room_id.clone(),
            event_id: event_id.clone(),
            reason,
            update_sender: self.update_sender.clone(),
        });
    }

    /// Toggles the local user's reaction with `key` on a known message,
    /// applying the tally change optimistically and issuing the verb.
    pub fn toggle_reaction(&mut self, target: OwnedEventId, key: String) {
        let Some(message) = self.messages.get_mut(&target) else {
            warn!("refusing to react to unknown event {} in {}", target, self.room_id);
            return;
        };
        let existing = message.reactions.iter().position(|t| t.key == key);
        let reacted_now = match existing {
            Some(i) if message.reactions[i].own_user_reacted => {
                message.reactions[i].own_user_reacted = false;
                message.reactions[i].count = message.reactions[i].count.saturating_sub(1);
                if message.reactions[i].count == 0 {
                    message.reactions.remove(i);
                }
                false
            }
            Some(i) => {
                message.reactions[i].own_user_reacted = true;
                message.reactions[i].count += 1;
                true
            }
            None => {
                message.reactions.push(ReactionTally {
                    key: key.clone(),
                    count: 1,
                    own_user_reacted: true,
                });
                true
            }
        };
        self.request_sender.submit(ClientRequest::SetReaction {
            room_id: self.room_id.clone(),
            target,
            key,
            reacted: reacted_now,
            update_sender: self.update_sender.clone(),
        });
    }

    /// Drains and applies pending out-of-band verb completions.
    ///
    /// Send outcomes are folded into the view model (confirmed temp entries
    /// retire, failed ones keep `status = Failed`); edit, redact, and
    /// reaction failures have no entry to carry that state, so they are
    /// returned for the caller to handle.
    pub fn process_updates(&mut self) -> Vec<OperationFailure> {
        let mut failures = Vec::new();
        while let Ok(update) = self.update_receiver.try_recv() {
            match update {
                TimelineUpdate::SendConfirmed { temp_id, event_id } => {
                    // The confirmed entry arrives independently on the live
                    // stream; retiring the temp entry is all that's needed to
                    // avoid a duplicate. Matching is by exact id only.
                    if self.messages.shift_remove(&temp_id).is_none() {
                        debug!("send confirmed for already-retired temp id {temp_id}");
                    }
                    debug!("send confirmed in {}: {temp_id} -> {event_id}", self.room_id);
                }
                TimelineUpdate::SendFailed { temp_id, error } => {
                    warn!("send failed in {}: {error}", self.room_id);
                    if let Some(message) = self.messages.get_mut(&temp_id) {
                        message.status = MessageStatus::Failed;
                    }
                }
                TimelineUpdate::EditFailed { target, error } => {
                    warn!("edit of {target} failed in {}: {error}", self.room_id);
                    failures.push(OperationFailure::Edit { target, error });
                }
                TimelineUpdate::RedactFailed { event_id, error } => {
                    warn!("redaction of {event_id} failed in {}: {error}", self.room_id);
                    failures.push(OperationFailure::Redact { event_id, error });
                }
                TimelineUpdate::ReactionFailed { target, key, error } => {
                    warn!("reaction {key} on {target} failed in {}: {error}", self.room_id);
                    failures.push(OperationFailure::Reaction { target, key, error });
                }
            }
        }
        failures
    }

    /// A clone of this room's update sender, for routing verb completions here.
    pub fn update_sender(&self) -> crossbeam_channel::Sender<TimelineUpdate> {
        self.update_sender.clone()
    }

    fn view_message_from(&self, fragment: MessageFragment, status: MessageStatus) -> ViewMessage {
        ViewMessage {
            id: fragment.event_id,
            room_id: self.room_id.clone(),
            sender_id: fragment.sender,
            sender_display_name: fragment.sender_display_name,
            kind: fragment.content.kind(),
            body: fragment.content.display_body(),
            source: fragment.content.source().cloned(),
            status,
            edited: false,
            timestamp: fragment.timestamp,
            reactions: Vec::new(),
            thread_replies: Vec::new(),
        }
    }

    /// Emits a mark-read side effect whenever the tail advances to a new
    /// non-temporary id.
    fn advance_read_marker(&mut self) {
        let Some((tail_id, _)) = self.messages.last() else {
            return;
        };
        if tail_id.is_temporary() || self.last_read_marker.as_ref() == Some(tail_id) {
            return;
        }
        let tail_id = tail_id.clone();
        self.request_sender.submit(ClientRequest::SetReadReceipt {
            room_id: self.room_id.clone(),
            up_to: tail_id.clone(),
        });
        self.last_read_marker = Some(tail_id);
    }
}

/// Replaces (or inserts) the tally for one reaction key; zero-count tallies
/// are dropped entirely.
fn upsert_tally(reactions: &mut Vec<ReactionTally>, tally: ReactionTally) {
    match reactions.iter().position(|t| t.key == tally.key) {
        Some(i) if tally.count == 0 => {
            reactions.remove(i);
        }
        Some(i) => reactions[i] = tally,
        None if tally.count > 0 => reactions.push(tally),
        None => {}
    }
}
