//! The room aggregator: categorized, sorted room lists with presence, typing,
//! and unread overlays.
//!
//! The aggregator never mutates the directory snapshot it reads; every pass
//! derives a fresh [`AggregatedRooms`] by full recompute. That is deliberate:
//! the recompute runs on every trigger (directory change, membership change,
//! read receipt, presence, typing, sync-ready) and trades efficiency for
//! correctness simplicity.

use std::collections::{BTreeSet, HashMap, HashSet};

use bitflags::bitflags;
use crossbeam_queue::SegQueue;
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::{
    categories::category_id_from_tag,
    events::ContentUrl,
    ids::{OwnedRoomId, OwnedUserId},
    subscription::SubscriberRegistry,
    utils::first_grapheme,
};

bitflags! {
    /// Classification flags for a room, assigned in a fixed order:
    /// space, then space-child, then mural, then direct.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct RoomFlags: u8 {
        /// The room's creation marker declares it a space container.
        const SPACE       = 0b0000_0001;
        /// The room is referenced as a child of some space.
        const SPACE_CHILD = 0b0000_0010;
        /// The room carries the dedicated mural state marker.
        const MURAL       = 0b0000_0100;
        /// The room has exactly two joined members.
        const DIRECT      = 0b0000_1000;
    }
}

impl Serialize for RoomFlags {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u8(self.bits())
    }
}
impl<'de> Deserialize<'de> for RoomFlags {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        u8::deserialize(deserializer).map(Self::from_bits_truncate)
    }
}

/// Our membership in a room, as reported by the directory.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Membership {
    Joined,
    Invited,
}

/// A user's presence, overlaid onto direct rooms.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Presence {
    Online,
    Idle,
    Offline,
}

/// One joined member of a room, as reported by the directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirectoryMember {
    pub user_id: OwnedUserId,
    pub display_name: Option<String>,
    pub avatar_url: Option<ContentUrl>,
}

/// One room in the directory snapshot consumed from the protocol client.
#[derive(Debug, Clone)]
pub struct DirectoryRoom {
    pub room_id: OwnedRoomId,
    pub name: Option<String>,
    pub avatar_url: Option<ContentUrl>,
    pub membership: Membership,
    pub joined_members: Vec<DirectoryMember>,
    /// The creation marker declares this room a space container.
    pub is_space: bool,
    /// Child room ids referenced by this room (meaningful for spaces).
    pub children: Vec<OwnedRoomId>,
    /// The dedicated mural state marker.
    pub has_mural_marker: bool,
    pub creator: Option<OwnedUserId>,
    pub unread_count: u64,
    pub highlighted: bool,
    /// The timestamp and one-line text preview of the room's latest message.
    pub latest: Option<(u64, String)>,
}

/// A read-only snapshot of the room directory.
#[derive(Debug, Clone, Default)]
pub struct DirectorySnapshot {
    pub rooms: Vec<DirectoryRoom>,
}

/// Account tags per room, as mirrored from the sync stream.
pub type TagMap = HashMap<OwnedRoomId, BTreeSet<String>>;

/// Presence per user, recomputed into summaries on every aggregation pass.
pub type PresenceOverlay = HashMap<OwnedUserId, Presence>;

/// Currently-typing users per room.
pub type TypingOverlay = HashMap<OwnedRoomId, Vec<OwnedUserId>>;

/// A room's resolved avatar: an image reference, or the first grapheme of
/// its display name as a textual fallback (the UI renders the placeholder).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum RoomAvatar {
    Image(ContentUrl),
    Text(String),
}
impl Default for RoomAvatar {
    fn default() -> Self {
        RoomAvatar::Text(String::new())
    }
}

/// A derived, display-ready summary of one room.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoomSummary {
    pub room_id: OwnedRoomId,
    pub display_name: String,
    pub avatar: RoomAvatar,
    pub membership: Membership,
    pub member_count: usize,
    pub flags: RoomFlags,
    pub unread_count: u64,
    pub highlighted: bool,
    /// The other member's presence; populated for direct rooms only.
    pub presence: Option<Presence>,
    /// Users currently typing in this room, excluding the local user.
    pub typing_user_ids: Vec<OwnedUserId>,
    /// Ids of the categories this room carries a reserved-namespace tag for.
    pub category_ids: BTreeSet<String>,
    pub latest: Option<(u64, String)>,
}

impl RoomSummary {
    pub fn is_space(&self) -> bool {
        self.flags.contains(RoomFlags::SPACE)
    }
    pub fn is_space_child(&self) -> bool {
        self.flags.contains(RoomFlags::SPACE_CHILD)
    }
    pub fn is_mural(&self) -> bool {
        self.flags.contains(RoomFlags::MURAL)
    }
    pub fn is_direct(&self) -> bool {
        self.flags.contains(RoomFlags::DIRECT)
    }
}

/// The output of one aggregation pass.
#[derive(Debug, Clone, Default)]
pub struct AggregatedRooms {
    /// The default conversation list: joined rooms that are not spaces,
    /// space children, or murals. Sorted by display name.
    pub joined: Vec<RoomSummary>,
    /// Pending invites, sorted by display name.
    pub invited: Vec<RoomSummary>,
    /// The separate mural partition, derived in the same pass.
    pub murals: Vec<RoomSummary>,
}

/// Derives categorized room lists from a directory snapshot plus overlays.
pub struct RoomAggregator {
    own_user_id: OwnedUserId,
}

impl RoomAggregator {
    pub fn new(own_user_id: OwnedUserId) -> Self {
        Self { own_user_id }
    }

    /// One full aggregation pass. Always recomputes everything from the
    /// snapshot; never patches a previous result incrementally.
    pub fn aggregate(
        &self,
        snapshot: &DirectorySnapshot,
        tag_map: &TagMap,
        presence: &PresenceOverlay,
        typing: &TypingOverlay,
    ) -> AggregatedRooms {
        // Space children can only be identified once all spaces are known.
        let space_ids: HashSet<&OwnedRoomId> = snapshot
            .rooms
            .iter()
            .filter(|r| r.is_space)
            .map(|r| &r.room_id)
            .collect();
        let child_ids: HashSet<&OwnedRoomId> = snapshot
            .rooms
            .iter()
            .filter(|r| r.is_space)
            .flat_map(|r| r.children.iter())
            .collect();

        let mut result = AggregatedRooms::default();
        for room in &snapshot.rooms {
            let mut flags = RoomFlags::empty();
            if space_ids.contains(&room.room_id) {
                flags |= RoomFlags::SPACE;
            }
            if child_ids.contains(&room.room_id) {
                flags |= RoomFlags::SPACE_CHILD;
            }
            if room.has_mural_marker {
                flags |= RoomFlags::MURAL;
            }
            if room.joined_members.len() == 2 {
                flags |= RoomFlags::DIRECT;
            }

            let summary = self.summarize(room, flags, tag_map, presence, typing);
            match summary.membership {
                Membership::Invited => result.invited.push(summary),
                Membership::Joined if summary.is_mural() => result.murals.push(summary),
                Membership::Joined if summary.is_space() || summary.is_space_child() => {
                    // Spaces and their children are excluded from the default
                    // conversation list; a space lobby surfaces them.
                }
                Membership::Joined => result.joined.push(summary),
            }
        }

        for list in [&mut result.joined, &mut result.invited, &mut result.murals] {
            list.sort_by_key(|s| s.display_name.to_lowercase());
        }
        result
    }

    fn summarize(
        &self,
        room: &DirectoryRoom,
        flags: RoomFlags,
        tag_map: &TagMap,
        presence: &PresenceOverlay,
        typing: &TypingOverlay,
    ) -> RoomSummary {
        let other_member = room
            .joined_members
            .iter()
            .find(|m| m.user_id != self.own_user_id);

        let display_name = room
            .name
            .clone()
            .or_else(|| {
                flags.contains(RoomFlags::DIRECT).then(|| {
                    other_member
                        .map(|m| {
                            m.display_name.clone().unwrap_or_else(|| m.user_id.to_string())
                        })
                        .unwrap_or_default()
                })
            })
            .filter(|name| !name.is_empty())
            .unwrap_or_else(|| room.room_id.to_string());

        // Avatar precedence: explicit room avatar, then (direct) the other
        // member's avatar, then (mural) the creator's avatar, then text.
        let avatar = room
            .avatar_url
            .clone()
            .or_else(|| {
                flags
                    .contains(RoomFlags::DIRECT)
                    .then(|| other_member.and_then(|m| m.avatar_url.clone()))
                    .flatten()
            })
            .or_else(|| {
                flags
                    .contains(RoomFlags::MURAL)
                    .then(|| {
                        room.creator.as_ref().and_then(|creator| {
                            room.joined_members
                                .iter()
                                .find(|m| &m.user_id == creator)
                                .and_then(|m| m.avatar_url.clone())
                        })
                    })
                    .flatten()
            })
            .map(RoomAvatar::Image)
            .unwrap_or_else(|| RoomAvatar::Text(first_grapheme(&display_name)));

        let room_presence = flags
            .contains(RoomFlags::DIRECT)
            .then(|| other_member.and_then(|m| presence.get(&m.user_id).copied()))
            .flatten();

        let typing_user_ids = typing
            .get(&room.room_id)
            .map(|users| {
                users
                    .iter()
                    .filter(|u| **u != self.own_user_id)
                    .cloned()
                    .collect()
            })
            .unwrap_or_default();

        let category_ids = tag_map
            .get(&room.room_id)
            .map(|tags| {
                tags.iter()
                    .filter_map(|tag| category_id_from_tag(tag))
                    .map(str::to_owned)
                    .collect()
            })
            .unwrap_or_default();

        RoomSummary {
            room_id: room.room_id.clone(),
            display_name,
            avatar,
            membership: room.membership,
            member_count: room.joined_members.len(),
            flags,
            unread_count: room.unread_count,
            highlighted: room.highlighted,
            presence: room_presence,
            typing_user_ids,
            category_ids,
            latest: room.latest.clone(),
        }
    }
}

/// The updates that mutate the room directory between aggregation passes.
///
/// These are enqueued by background tasks receiving sync output and drained
/// on the consumer side by [`RoomsListService::process_pending`].
#[derive(Debug)]
pub enum RoomsListUpdate {
    /// Add a room, or replace its directory entry wholesale.
    AddOrUpdateRoom(DirectoryRoom),
    RemoveRoom(OwnedRoomId),
    UpdateRoomName {
        room_id: OwnedRoomId,
        name: Option<String>,
    },
    UpdateRoomAvatar {
        room_id: OwnedRoomId,
        avatar_url: Option<ContentUrl>,
    },
    /// Update the latest-message preview for the given room.
    UpdateLatest {
        room_id: OwnedRoomId,
        timestamp: u64,
        preview: String,
    },
    UpdateUnread {
        room_id: OwnedRoomId,
        unread_count: u64,
        highlighted: bool,
    },
    UpdateMembership {
        room_id: OwnedRoomId,
        membership: Membership,
    },
    /// Replace the account tags for the given room.
    UpdateTags {
        room_id: OwnedRoomId,
        tags: BTreeSet<String>,
    },
    ClearRooms,
    /// The sync engine reached its ready state; triggers a recompute even if
    /// no directory entry changed.
    SyncReady,
}

/// Owns the room directory, drains pending updates, and publishes freshly
/// aggregated room lists to subscribers.
pub struct RoomsListService {
    directory: IndexMap<OwnedRoomId, DirectoryRoom>,
    tag_map: TagMap,
    pending: SegQueue<RoomsListUpdate>,
    aggregator: RoomAggregator,
    subscribers: SubscriberRegistry<AggregatedRooms>,
}

impl RoomsListService {
    pub fn new(own_user_id: OwnedUserId) -> Self {
        Self {
            directory: IndexMap::new(),
            tag_map: TagMap::new(),
            pending: SegQueue::new(),
            aggregator: RoomAggregator::new(own_user_id),
            subscribers: SubscriberRegistry::new(),
        }
    }

    /// Enqueues a directory update; safe to call from background tasks.
    pub fn enqueue_update(&self, update: RoomsListUpdate) {
        self.pending.push(update);
    }

    /// The registry consumers subscribe to for aggregated-room updates.
    pub fn subscribers(&self) -> &SubscriberRegistry<AggregatedRooms> {
        &self.subscribers
    }

    /// A read-only snapshot of the current directory.
    pub fn snapshot(&self) -> DirectorySnapshot {
        DirectorySnapshot { rooms: self.directory.values().cloned().collect() }
    }

    pub fn tag_map(&self) -> &TagMap {
        &self.tag_map
    }

    /// Drains pending updates; if any arrived, runs a full aggregation pass,
    /// notifies subscribers, and returns the fresh output.
    pub fn process_pending(
        &mut self,
        presence: &PresenceOverlay,
        typing: &TypingOverlay,
    ) -> Option<AggregatedRooms> {
        let mut num_updates = 0;
        while let Some(update) = self.pending.pop() {
            num_updates += 1;
            self.apply_update(update);
        }
        if num_updates == 0 {
            return None;
        }
        debug!("processed {num_updates} directory updates; recomputing room lists");
        Some(self.recompute(presence, typing))
    }

    /// One unconditional full recompute; used directly for presence, typing,
    /// and read-receipt triggers, which change no directory entry.
    pub fn recompute(
        &self,
        presence: &PresenceOverlay,
        typing: &TypingOverlay,
    ) -> AggregatedRooms {
        let aggregated =
            self.aggregator
                .aggregate(&self.snapshot(), &self.tag_map, presence, typing);
        self.subscribers.notify(&aggregated);
        aggregated
    }

    fn apply_update(&mut self, update: RoomsListUpdate) {
        match update {
            RoomsListUpdate::AddOrUpdateRoom(room) => {
                self.directory.insert(room.room_id.clone(), room);
            }
            RoomsListUpdate::RemoveRoom(room_id) => {
                if self.directory.shift_remove(&room_id).is_none() {
                    warn!("couldn't find room {room_id} to remove");
                }
                self.tag_map.remove(&room_id);
            }
            RoomsListUpdate::UpdateRoomName { room_id, name } => {
                match self.directory.get_mut(&room_id) {
                    Some(room) => room.name = name,
                    None => warn!("couldn't find room {room_id} to update name"),
                }
            }
            RoomsListUpdate::UpdateRoomAvatar { room_id, avatar_url } => {
                match self.directory.get_mut(&room_id) {
                    Some(room) => room.avatar_url = avatar_url,
                    None => warn!("couldn't find room {room_id} to update avatar"),
                }
            }
            RoomsListUpdate::UpdateLatest { room_id, timestamp, preview } => {
                match self.directory.get_mut(&room_id) {
                    Some(room) => room.latest = Some((timestamp, preview)),
                    None => warn!("couldn't find room {room_id} to update latest message"),
                }
            }
            RoomsListUpdate::UpdateUnread { room_id, unread_count, highlighted } => {
                match self.directory.get_mut(&room_id) {
                    Some(room) => {
                        room.unread_count = unread_count;
                        room.highlighted = highlighted;
                    }
                    None => warn!("couldn't find room {room_id} to update unread count"),
                }
            }
            RoomsListUpdate::UpdateMembership { room_id, membership } => {
                match self.directory.get_mut(&room_id) {
                    Some(room) => room.membership = membership,
                    None => warn!("couldn't find room {room_id} to update membership"),
                }
            }
            RoomsListUpdate::UpdateTags { room_id, tags } => {
                self.tag_map.insert(room_id, tags);
            }
            RoomsListUpdate::ClearRooms => {
                self.directory.clear();
                self.tag_map.clear();
            }
            RoomsListUpdate::SyncReady => {
                // Counts as a trigger; the recompute after draining covers it.
            }
        }
    }
}

bitflags! {
    /// The criteria a room-list keyword filter may match against.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct RoomFilterCriteria: u8 {
        const RoomId   = 0b0000_0001;
        const RoomName = 0b0000_0010;
        const Category = 0b0000_0100;
        const All = Self::RoomId.bits() | Self::RoomName.bits() | Self::Category.bits();
    }
}
impl Default for RoomFilterCriteria {
    fn default() -> Self {
        RoomFilterCriteria::All
    }
}

/// A filter function called for each room summary to decide whether it
/// should be displayed. The default displays everything.
pub struct RoomDisplayFilter(Box<dyn Fn(&RoomSummary) -> bool>);
impl Default for RoomDisplayFilter {
    fn default() -> Self {
        RoomDisplayFilter(Box::new(|_| true))
    }
}
impl std::ops::Deref for RoomDisplayFilter {
    type Target = Box<dyn Fn(&RoomSummary) -> bool>;
    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl RoomDisplayFilter {
    /// Builds a keyword filter over the given criteria. Matching is
    /// case-insensitive; an empty keyword matches everything.
    pub fn with_keywords(keywords: &str, criteria: RoomFilterCriteria) -> Self {
        let keywords = keywords.trim().to_lowercase();
        if keywords.is_empty() {
            return Self::default();
        }
        Self(Box::new(move |summary| {
            (criteria.contains(RoomFilterCriteria::RoomId)
                && summary.room_id.as_str().to_lowercase().contains(&keywords))
                || (criteria.contains(RoomFilterCriteria::RoomName)
                    && summary.display_name.to_lowercase().contains(&keywords))
                || (criteria.contains(RoomFilterCriteria::Category)
                    && summary.category_ids.iter().any(|id| id.to_lowercase() == keywords))
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn user(id: &str) -> OwnedUserId {
        OwnedUserId::parse(id).unwrap()
    }
    fn room_id(id: &str) -> OwnedRoomId {
        OwnedRoomId::parse(id).unwrap()
    }

    fn member(id: &str, name: Option<&str>, avatar: Option<&str>) -> DirectoryMember {
        DirectoryMember {
            user_id: user(id),
            display_name: name.map(str::to_owned),
            avatar_url: avatar.map(|a| ContentUrl::parse(a).unwrap()),
        }
    }

    fn plain_room(id: &str, name: &str, members: Vec<DirectoryMember>) -> DirectoryRoom {
        DirectoryRoom {
            room_id: room_id(id),
            name: Some(name.to_owned()),
            avatar_url: None,
            membership: Membership::Joined,
            joined_members: members,
            is_space: false,
            children: Vec::new(),
            has_mural_marker: false,
            creator: None,
            unread_count: 0,
            highlighted: false,
            latest: None,
        }
    }

    fn aggregator() -> RoomAggregator {
        RoomAggregator::new(user("@me:example.org"))
    }

    fn aggregate_simple(snapshot: &DirectorySnapshot) -> AggregatedRooms {
        aggregator().aggregate(
            snapshot,
            &TagMap::new(),
            &PresenceOverlay::new(),
            &TypingOverlay::new(),
        )
    }

    #[test]
    fn two_member_room_without_mural_marker_is_direct() {
        let snapshot = DirectorySnapshot {
            rooms: vec![plain_room(
                "!dm:example.org",
                "Alice",
                vec![
                    member("@me:example.org", Some("Me"), None),
                    member("@alice:example.org", Some("Alice"), None),
                ],
            )],
        };
        let out = aggregate_simple(&snapshot);
        assert_eq!(out.joined.len(), 1);
        let summary = &out.joined[0];
        assert!(summary.is_direct());
        assert!(!summary.is_mural());
        assert_eq!(summary.member_count, 2);
    }

    #[test]
    fn room_scenario_create_join_join_message() {
        // [create(roomA), join(alice), join(bob)] then a message from alice.
        let mut room = plain_room(
            "!roomA:example.org",
            "roomA",
            vec![
                member("@alice:example.org", Some("alice"), None),
                member("@bob:example.org", Some("bob"), None),
            ],
        );
        room.latest = Some((1_700_000_000_000, "alice: hi".to_owned()));
        let out = aggregate_simple(&DirectorySnapshot { rooms: vec![room] });
        let summary = &out.joined[0];
        assert_eq!(summary.member_count, 2);
        assert!(summary.is_direct());
        assert_eq!(summary.latest.as_ref().unwrap().1, "alice: hi");
    }

    #[test]
    fn spaces_and_their_children_are_excluded_from_the_default_list() {
        let mut space = plain_room("!space:example.org", "The Space", vec![]);
        space.is_space = true;
        space.children = vec![room_id("!child:example.org")];
        let child = plain_room("!child:example.org", "Child Room", vec![]);
        let regular = plain_room("!plain:example.org", "Plain Room", vec![]);

        let out = aggregate_simple(&DirectorySnapshot { rooms: vec![space, child, regular] });
        assert_eq!(out.joined.len(), 1);
        assert_eq!(out.joined[0].room_id.as_str(), "!plain:example.org");
    }

    #[test]
    fn murals_surface_in_their_own_partition() {
        let mut mural = plain_room("!mural:example.org", "Team Wall", vec![]);
        mural.has_mural_marker = true;
        let regular = plain_room("!plain:example.org", "Plain Room", vec![]);

        let out = aggregate_simple(&DirectorySnapshot { rooms: vec![mural, regular] });
        assert_eq!(out.joined.len(), 1);
        assert_eq!(out.murals.len(), 1);
        assert!(out.murals[0].is_mural());
    }

    #[test]
    fn lists_are_sorted_case_insensitively_by_display_name() {
        let out = aggregate_simple(&DirectorySnapshot {
            rooms: vec![
                plain_room("!b:example.org", "beta", vec![]),
                plain_room("!a:example.org", "Alpha", vec![]),
                plain_room("!g:example.org", "Gamma", vec![]),
            ],
        });
        let names: Vec<_> = out.joined.iter().map(|s| s.display_name.as_str()).collect();
        assert_eq!(names, ["Alpha", "beta", "Gamma"]);
    }

    #[test]
    fn avatar_precedence_prefers_explicit_then_other_member_then_creator() {
        // Direct room without an explicit avatar uses the other member's.
        let mut dm = plain_room(
            "!dm:example.org",
            "Alice",
            vec![
                member("@me:example.org", Some("Me"), None),
                member("@alice:example.org", Some("Alice"), Some("mxc://example.org/alice")),
            ],
        );
        dm.name = None;
        let out = aggregate_simple(&DirectorySnapshot { rooms: vec![dm] });
        assert_eq!(
            out.joined[0].avatar,
            RoomAvatar::Image(ContentUrl::parse("mxc://example.org/alice").unwrap()),
        );
        // The direct room's display name falls back to the other member.
        assert_eq!(out.joined[0].display_name, "Alice");

        // Mural room without an explicit avatar uses the creator's.
        let mut mural = plain_room(
            "!mural:example.org",
            "Team Wall",
            vec![
                member("@me:example.org", Some("Me"), None),
                member("@carol:example.org", Some("Carol"), Some("mxc://example.org/carol")),
                member("@dave:example.org", Some("Dave"), None),
            ],
        );
        mural.has_mural_marker = true;
        mural.creator = Some(user("@carol:example.org"));
        let out = aggregate_simple(&DirectorySnapshot { rooms: vec![mural] });
        assert_eq!(
            out.murals[0].avatar,
            RoomAvatar::Image(ContentUrl::parse("mxc://example.org/carol").unwrap()),
        );

        // No avatar anywhere: textual first-grapheme fallback.
        let bare = plain_room("!bare:example.org", "Zulip Refugees", vec![]);
        let out = aggregate_simple(&DirectorySnapshot { rooms: vec![bare] });
        assert_eq!(out.joined[0].avatar, RoomAvatar::Text("Z".to_owned()));
    }

    #[test]
    fn typing_overlay_excludes_the_local_user() {
        let snapshot = DirectorySnapshot {
            rooms: vec![plain_room("!r:example.org", "Room", vec![])],
        };
        let mut typing = TypingOverlay::new();
        typing.insert(
            room_id("!r:example.org"),
            vec![user("@me:example.org"), user("@alice:example.org")],
        );
        let out = aggregator().aggregate(
            &snapshot,
            &TagMap::new(),
            &PresenceOverlay::new(),
            &typing,
        );
        assert_eq!(out.joined[0].typing_user_ids, vec![user("@alice:example.org")]);
    }

    #[test]
    fn presence_is_populated_for_direct_rooms_only() {
        let dm = plain_room(
            "!dm:example.org",
            "Alice",
            vec![
                member("@me:example.org", Some("Me"), None),
                member("@alice:example.org", Some("Alice"), None),
            ],
        );
        let group = plain_room(
            "!group:example.org",
            "Group",
            vec![
                member("@me:example.org", Some("Me"), None),
                member("@alice:example.org", Some("Alice"), None),
                member("@bob:example.org", Some("Bob"), None),
            ],
        );
        let mut presence = PresenceOverlay::new();
        presence.insert(user("@alice:example.org"), Presence::Online);

        let out = aggregator().aggregate(
            &DirectorySnapshot { rooms: vec![dm, group] },
            &TagMap::new(),
            &presence,
            &TypingOverlay::new(),
        );
        let dm_summary = out.joined.iter().find(|s| s.is_direct()).unwrap();
        let group_summary = out.joined.iter().find(|s| !s.is_direct()).unwrap();
        assert_eq!(dm_summary.presence, Some(Presence::Online));
        assert_eq!(group_summary.presence, None);
    }

    #[test]
    fn category_ids_come_from_the_reserved_tag_namespace() {
        let snapshot = DirectorySnapshot {
            rooms: vec![plain_room("!r:example.org", "Room", vec![])],
        };
        let mut tag_map = TagMap::new();
        tag_map.insert(
            room_id("!r:example.org"),
            BTreeSet::from(["u.category.work".to_owned(), "m.favourite".to_owned()]),
        );
        let out = aggregator().aggregate(
            &snapshot,
            &tag_map,
            &PresenceOverlay::new(),
            &TypingOverlay::new(),
        );
        assert_eq!(out.joined[0].category_ids, BTreeSet::from(["work".to_owned()]));
    }

    #[test]
    fn service_drains_updates_and_recomputes_in_full() {
        let mut service = RoomsListService::new(user("@me:example.org"));
        assert!(service
            .process_pending(&PresenceOverlay::new(), &TypingOverlay::new())
            .is_none());

        service.enqueue_update(RoomsListUpdate::AddOrUpdateRoom(plain_room(
            "!r:example.org",
            "Room",
            vec![],
        )));
        service.enqueue_update(RoomsListUpdate::UpdateUnread {
            room_id: room_id("!r:example.org"),
            unread_count: 3,
            highlighted: true,
        });

        let out = service
            .process_pending(&PresenceOverlay::new(), &TypingOverlay::new())
            .expect("updates should trigger a recompute");
        assert_eq!(out.joined.len(), 1);
        assert_eq!(out.joined[0].unread_count, 3);
        assert!(out.joined[0].highlighted);

        // Queue drained: the next pass has nothing to do.
        assert!(service
            .process_pending(&PresenceOverlay::new(), &TypingOverlay::new())
            .is_none());
    }

    #[test]
    fn invite_membership_lands_in_the_invited_partition() {
        let mut invited = plain_room("!inv:example.org", "Invite Me", vec![]);
        invited.membership = Membership::Invited;
        let out = aggregate_simple(&DirectorySnapshot { rooms: vec![invited] });
        assert!(out.joined.is_empty());
        assert_eq!(out.invited.len(), 1);
    }

    #[test]
    fn keyword_filter_matches_name_case_insensitively() {
        let out = aggregate_simple(&DirectorySnapshot {
            rooms: vec![
                plain_room("!m:example.org", "Mural Planning", vec![]),
                plain_room("!o:example.org", "Other", vec![]),
            ],
        });
        let filter = RoomDisplayFilter::with_keywords("mural", RoomFilterCriteria::RoomName);
        let matched: Vec<_> = out.joined.iter().filter(|s| filter(s)).collect();
        assert_eq!(matched.len(), 1);
        assert_eq!(matched[0].display_name, "Mural Planning");
    }

    #[test]
    fn keyword_filter_matches_partial_room_ids() {
        let out = aggregate_simple(&DirectorySnapshot {
            rooms: vec![
                plain_room("!abcDEF:example.org", "First", vec![]),
                plain_room("!other:example.org", "Second", vec![]),
            ],
        });
        let filter = RoomDisplayFilter::with_keywords("abcdef", RoomFilterCriteria::RoomId);
        let matched: Vec<_> = out.joined.iter().filter(|s| filter(s)).collect();
        assert_eq!(matched.len(), 1);
        assert_eq!(matched[0].room_id.as_str(), "!abcDEF:example.org");
    }
}
