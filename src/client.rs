//! The protocol-client boundary.
//!
//! The actual protocol client (login, sync engine, encryption) is an external
//! collaborator. This module defines the capability interface the engine
//! consumes from it ([`ProtocolVerbs`]), the queue of async requests submitted
//! toward it ([`ClientRequest`]), and the worker loop that executes those
//! requests and routes their completions back to per-room update channels.
//!
//! The verbs object is injected into each component's constructor; there is
//! no ambient "current client" global.

use std::sync::Arc;

use futures_util::future::BoxFuture;
use tokio::sync::mpsc::{UnboundedReceiver, UnboundedSender, unbounded_channel};
use tracing::{debug, error, warn};

use crate::{
    errors::ClientError,
    events::{ContentUrl, MessageContent},
    ids::{OwnedEventId, OwnedRoomId, OwnedUserId},
    timeline::TimelineUpdate,
};

pub type ClientResult<T> = Result<T, ClientError>;

/// The verbs the engine consumes from the underlying protocol client.
///
/// All verbs are asynchronous; their completions arrive out of band relative
/// to the live event stream. Methods return [`BoxFuture`]s so the trait stays
/// object-safe and implementations can be injected as `Arc<dyn ProtocolVerbs>`.
pub trait ProtocolVerbs: Send + Sync {
    /// Sends a message to a room, resolving to the server-issued event id.
    fn send_message(
        &self,
        room_id: OwnedRoomId,
        content: MessageContent,
    ) -> BoxFuture<'static, ClientResult<OwnedEventId>>;

    /// Edits a previously-sent message via a `replace` relation.
    fn edit_message(
        &self,
        room_id: OwnedRoomId,
        target: OwnedEventId,
        new_body: String,
    ) -> BoxFuture<'static, ClientResult<()>>;

    /// Redacts (erases) a previously-sent event.
    fn redact(
        &self,
        room_id: OwnedRoomId,
        event_id: OwnedEventId,
        reason: Option<String>,
    ) -> BoxFuture<'static, ClientResult<()>>;

    /// Adds or removes the caller's reaction with `key` on the target event.
    fn set_reaction(
        &self,
        room_id: OwnedRoomId,
        target: OwnedEventId,
        key: String,
        reacted: bool,
    ) -> BoxFuture<'static, ClientResult<()>>;

    /// Marks the room as read up to (and including) the given event.
    fn set_read_receipt(
        &self,
        room_id: OwnedRoomId,
        up_to: OwnedEventId,
    ) -> BoxFuture<'static, ClientResult<()>>;

    fn join_room(&self, room_id: OwnedRoomId) -> BoxFuture<'static, ClientResult<()>>;

    fn leave_room(&self, room_id: OwnedRoomId) -> BoxFuture<'static, ClientResult<()>>;

    fn invite_user(
        &self,
        room_id: OwnedRoomId,
        user_id: OwnedUserId,
    ) -> BoxFuture<'static, ClientResult<()>>;

    fn kick_user(
        &self,
        room_id: OwnedRoomId,
        user_id: OwnedUserId,
    ) -> BoxFuture<'static, ClientResult<()>>;

    /// Adds an account-scoped tag to a room.
    fn set_tag(&self, room_id: OwnedRoomId, tag: String) -> BoxFuture<'static, ClientResult<()>>;

    /// Removes an account-scoped tag from a room.
    fn remove_tag(&self, room_id: OwnedRoomId, tag: String)
    -> BoxFuture<'static, ClientResult<()>>;

    /// Fetches the bytes behind a content-address URL using the
    /// caller-supplied bearer credential.
    fn fetch_media(
        &self,
        source: ContentUrl,
        auth_header: String,
    ) -> BoxFuture<'static, ClientResult<Vec<u8>>>;
}

/// The set of requests for async work that can be submitted to the client worker.
pub enum ClientRequest {
    /// Send a message that was already appended optimistically with `temp_id`.
    SendMessage {
        room_id: OwnedRoomId,
        temp_id: OwnedEventId,
        content: MessageContent,
        update_sender: crossbeam_channel::Sender<TimelineUpdate>,
    },
    /// Edit a message via a `replace` relation.
    EditMessage {
        room_id: OwnedRoomId,
        target: OwnedEventId,
        new_body: String,
        update_sender: crossbeam_channel::Sender<TimelineUpdate>,
    },
    /// Redact an event that was already removed optimistically.
    Redact {
        room_id: OwnedRoomId,
        event_id: OwnedEventId,
        reason: Option<String>,
        update_sender: crossbeam_channel::Sender<TimelineUpdate>,
    },
    /// Add or remove the local user's reaction on an event.
    SetReaction {
        room_id: OwnedRoomId,
        target: OwnedEventId,
        key: String,
        reacted: bool,
        update_sender: crossbeam_channel::Sender<TimelineUpdate>,
    },
    /// Advance the room's read receipt to the given event.
    SetReadReceipt {
        room_id: OwnedRoomId,
        up_to: OwnedEventId,
    },
    /// Join a room (e.g. accept an invite). Settles on `on_complete` if given.
    JoinRoom {
        room_id: OwnedRoomId,
        on_complete: Option<crossbeam_channel::Sender<ClientResult<()>>>,
    },
    /// Leave a room (or reject an invite). Settles on `on_complete` if given.
    LeaveRoom {
        room_id: OwnedRoomId,
        on_complete: Option<crossbeam_channel::Sender<ClientResult<()>>>,
    },
    InviteUser {
        room_id: OwnedRoomId,
        user_id: OwnedUserId,
        on_complete: Option<crossbeam_channel::Sender<ClientResult<()>>>,
    },
    KickUser {
        room_id: OwnedRoomId,
        user_id: OwnedUserId,
        on_complete: Option<crossbeam_channel::Sender<ClientResult<()>>>,
    },
    SetTag {
        room_id: OwnedRoomId,
        tag: String,
    },
    RemoveTag {
        room_id: OwnedRoomId,
        tag: String,
    },
}

/// A cloneable handle for submitting [`ClientRequest`]s to the worker.
#[derive(Clone)]
pub struct RequestSender(UnboundedSender<ClientRequest>);

impl RequestSender {
    /// Submits a request to the worker to be executed asynchronously.
    ///
    /// A dead worker is logged, not fatal: every failure in this layer is
    /// terminal only for the operation that issued it.
    pub fn submit(&self, request: ClientRequest) {
        if self.0.send(request).is_err() {
            error!("client worker receiver has died; dropping request");
        }
    }

    /// Creates a sender/receiver pair without spawning a worker.
    ///
    /// Used by tests to inspect the requests the engine submits.
    pub fn channel() -> (Self, UnboundedReceiver<ClientRequest>) {
        let (sender, receiver) = unbounded_channel();
        (Self(sender), receiver)
    }
}

/// Spawns the client worker onto the current tokio runtime and returns the
/// sender used to submit requests to it.
pub fn spawn_client_worker(verbs: Arc<dyn ProtocolVerbs>) -> RequestSender {
    let (sender, receiver) = unbounded_channel();
    tokio::spawn(client_worker(receiver, verbs));
    RequestSender(sender)
}

/// The worker loop: waits for requests and executes each verb in its own task
/// so one slow operation never blocks the queue.
async fn client_worker(mut receiver: UnboundedReceiver<ClientRequest>, verbs: Arc<dyn ProtocolVerbs>) {
    while let Some(request) = receiver.recv().await {
        match request {
            ClientRequest::SendMessage { room_id, temp_id, content, update_sender } => {
                let fut = verbs.send_message(room_id, content);
                tokio::spawn(async move {
                    let update = match fut.await {
                        Ok(event_id) => TimelineUpdate::SendConfirmed { temp_id, event_id },
                        Err(error) => TimelineUpdate::SendFailed { temp_id, error },
                    };
                    let _ = update_sender.send(update);
                });
            }
            ClientRequest::EditMessage { room_id, target, new_body, update_sender } => {
                let fut = verbs.edit_message(room_id, target.clone(), new_body);
                tokio::spawn(async move {
                    if let Err(error) = fut.await {
                        let _ = update_sender.send(TimelineUpdate::EditFailed { target, error });
                    }
                });
            }
            ClientRequest::Redact { room_id, event_id, reason, update_sender } => {
                let fut = verbs.redact(room_id, event_id.clone(), reason);
                tokio::spawn(async move {
                    if let Err(error) = fut.await {
                        let _ = update_sender.send(TimelineUpdate::RedactFailed { event_id, error });
                    }
                });
            }
            ClientRequest::SetReaction { room_id, target, key, reacted, update_sender } => {
                let fut = verbs.set_reaction(room_id, target.clone(), key.clone(), reacted);
                tokio::spawn(async move {
                    if let Err(error) = fut.await {
                        let _ = update_sender.send(TimelineUpdate::ReactionFailed { target, key, error });
                    }
                });
            }
            ClientRequest::SetReadReceipt { room_id, up_to } => {
                let fut = verbs.set_read_receipt(room_id.clone(), up_to);
                tokio::spawn(async move {
                    if let Err(e) = fut.await {
                        debug!("failed to set read receipt in {room_id}: {e}");
                    }
                });
            }
            ClientRequest::JoinRoom { room_id, on_complete } => {
                settle(verbs.join_room(room_id), on_complete);
            }
            ClientRequest::LeaveRoom { room_id, on_complete } => {
                settle(verbs.leave_room(room_id), on_complete);
            }
            ClientRequest::InviteUser { room_id, user_id, on_complete } => {
                settle(verbs.invite_user(room_id, user_id), on_complete);
            }
            ClientRequest::KickUser { room_id, user_id, on_complete } => {
                settle(verbs.kick_user(room_id, user_id), on_complete);
            }
            ClientRequest::SetTag { room_id, tag } => {
                let fut = verbs.set_tag(room_id.clone(), tag.clone());
                tokio::spawn(async move {
                    if let Err(e) = fut.await {
                        warn!("failed to set tag {tag} on {room_id}: {e}");
                    }
                });
            }
            ClientRequest::RemoveTag { room_id, tag } => {
                let fut = verbs.remove_tag(room_id.clone(), tag.clone());
                tokio::spawn(async move {
                    if let Err(e) = fut.await {
                        warn!("failed to remove tag {tag} from {room_id}: {e}");
                    }
                });
            }
        }
    }
    debug!("client worker request sender dropped; worker exiting");
}

/// Runs a membership verb to completion and settles its result, if anyone
/// is waiting on one.
fn settle(
    fut: BoxFuture<'static, ClientResult<()>>,
    on_complete: Option<crossbeam_channel::Sender<ClientResult<()>>>,
) {
    tokio::spawn(async move {
        let result = fut.await;
        if let Err(e) = &result {
            warn!("membership operation failed: {e}");
        }
        if let Some(sender) = on_complete {
            let _ = sender.send(result);
        }
    });
}
