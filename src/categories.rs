//! User-defined room categories, mirrored through account-scoped room tags.
//!
//! A category is an account-level label (name + color); a room belongs to a
//! category iff it carries a tag in the reserved `u.category.` namespace for
//! that category's id. The account tag store is owned by the protocol client;
//! this store mirrors it read/write through the boundary verbs.

use std::collections::{BTreeSet, HashMap};

use indexmap::IndexMap;
use rand::{distributions::Alphanumeric, Rng};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::{
    client::{ClientRequest, RequestSender},
    ids::OwnedRoomId,
};

/// The reserved account-tag namespace for category membership tags.
pub const CATEGORY_TAG_PREFIX: &str = "u.category.";

/// A user-defined room category.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Category {
    pub id: String,
    pub name: String,
    /// Display color as a `#rrggbb` hex string; rendering is up to the UI.
    pub color: String,
}

/// The full account tag for a category id.
pub fn category_tag(category_id: &str) -> String {
    format!("{CATEGORY_TAG_PREFIX}{category_id}")
}

/// Extracts the category id from an account tag, if the tag is in the
/// reserved category namespace.
pub fn category_id_from_tag(tag: &str) -> Option<&str> {
    tag.strip_prefix(CATEGORY_TAG_PREFIX).filter(|id| !id.is_empty())
}

/// The category definitions plus the mirrored room-membership map.
pub struct CategoryStore {
    /// Category definitions in creation order.
    categories: IndexMap<String, Category>,
    /// Mirrored membership: category ids per room.
    room_categories: HashMap<OwnedRoomId, BTreeSet<String>>,
    request_sender: RequestSender,
}

impl CategoryStore {
    pub fn new(request_sender: RequestSender) -> Self {
        Self {
            categories: IndexMap::new(),
            room_categories: HashMap::new(),
            request_sender,
        }
    }

    /// Creates a new category with a fresh id and returns it.
    pub fn create_category(&mut self, name: String, color: String) -> Category {
        let id: String = rand::thread_rng()
            .sample_iter(&Alphanumeric)
            .take(8)
            .map(|b| (b as char).to_ascii_lowercase())
            .collect();
        let category = Category { id: id.clone(), name, color };
        self.categories.insert(id, category.clone());
        category
    }

    /// Deletes a category; removal cascades to every room carrying its tag,
    /// both in the local mirror and (via the remove-tag verb) on the account.
    pub fn delete_category(&mut self, category_id: &str) {
        if self.categories.shift_remove(category_id).is_none() {
            debug!("delete of unknown category {category_id}");
            return;
        }
        let tag = category_tag(category_id);
        for (room_id, ids) in &mut self.room_categories {
            if ids.remove(category_id) {
                self.request_sender.submit(ClientRequest::RemoveTag {
                    room_id: room_id.clone(),
                    tag: tag.clone(),
                });
            }
        }
    }

    pub fn categories(&self) -> impl Iterator<Item = &Category> {
        self.categories.values()
    }

    pub fn get(&self, category_id: &str) -> Option<&Category> {
        self.categories.get(category_id)
    }

    /// Tags a room with a known category. Returns `false` for unknown ids.
    pub fn tag_room(&mut self, room_id: OwnedRoomId, category_id: &str) -> bool {
        if !self.categories.contains_key(category_id) {
            return false;
        }
        let inserted = self
            .room_categories
            .entry(room_id.clone())
            .or_default()
            .insert(category_id.to_owned());
        if inserted {
            self.request_sender.submit(ClientRequest::SetTag {
                room_id,
                tag: category_tag(category_id),
            });
        }
        true
    }

    /// Removes a category tag from a room.
    pub fn untag_room(&mut self, room_id: &OwnedRoomId, category_id: &str) {
        let removed = self
            .room_categories
            .get_mut(room_id)
            .is_some_and(|ids| ids.remove(category_id));
        if removed {
            self.request_sender.submit(ClientRequest::RemoveTag {
                room_id: room_id.clone(),
                tag: category_tag(category_id),
            });
        }
    }

    /// The set of category ids the given room belongs to.
    pub fn room_categories(&self, room_id: &OwnedRoomId) -> BTreeSet<String> {
        self.room_categories.get(room_id).cloned().unwrap_or_default()
    }

    /// Whether a room belongs to the given category. `None` means the
    /// implicit "All" pseudo-category, which every room belongs to.
    pub fn is_room_in_category(&self, room_id: &OwnedRoomId, category_id: Option<&str>) -> bool {
        match category_id {
            None => true,
            Some(id) => self
                .room_categories
                .get(room_id)
                .is_some_and(|ids| ids.contains(id)),
        }
    }

    /// Replaces the mirrored membership for a room from the account tags the
    /// sync stream reports for it.
    pub fn apply_remote_tags(&mut self, room_id: OwnedRoomId, tags: &BTreeSet<String>) {
        let ids: BTreeSet<String> = tags
            .iter()
            .filter_map(|tag| category_id_from_tag(tag))
            .map(str::to_owned)
            .collect();
        if ids.is_empty() {
            self.room_categories.remove(&room_id);
        } else {
            self.room_categories.insert(room_id, ids);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn room(id: &str) -> OwnedRoomId {
        OwnedRoomId::parse(id).unwrap()
    }

    fn new_store() -> (CategoryStore, tokio::sync::mpsc::UnboundedReceiver<ClientRequest>) {
        let (sender, receiver) = RequestSender::channel();
        (CategoryStore::new(sender), receiver)
    }

    #[test]
    fn tagging_a_room_reports_all_its_categories() {
        let (mut store, _rx) = new_store();
        let a = store.create_category("Work".into(), "#ff0000".into());
        let b = store.create_category("Friends".into(), "#00ff00".into());
        let r = room("!r:example.org");

        assert!(store.tag_room(r.clone(), &a.id));
        assert!(store.tag_room(r.clone(), &b.id));
        assert_eq!(
            store.room_categories(&r),
            BTreeSet::from([a.id.clone(), b.id.clone()]),
        );
        assert!(store.is_room_in_category(&r, Some(&a.id)));
    }

    #[test]
    fn deleting_a_category_cascades_to_every_tagged_room() {
        let (mut store, mut rx) = new_store();
        let a = store.create_category("Work".into(), "#ff0000".into());
        let b = store.create_category("Friends".into(), "#00ff00".into());
        let r1 = room("!one:example.org");
        let r2 = room("!two:example.org");
        store.tag_room(r1.clone(), &a.id);
        store.tag_room(r2.clone(), &a.id);
        store.tag_room(r2.clone(), &b.id);
        while rx.try_recv().is_ok() {} // drain the set-tag verbs

        store.delete_category(&a.id);

        assert!(store.get(&a.id).is_none());
        assert!(!store.room_categories(&r1).contains(&a.id));
        assert_eq!(store.room_categories(&r2), BTreeSet::from([b.id.clone()]));

        // One remove-tag verb per previously-tagged room.
        let mut removals = 0;
        while let Ok(req) = rx.try_recv() {
            assert!(matches!(req, ClientRequest::RemoveTag { ref tag, .. } if *tag == category_tag(&a.id)));
            removals += 1;
        }
        assert_eq!(removals, 2);
    }

    #[test]
    fn unknown_category_cannot_be_applied() {
        let (mut store, mut rx) = new_store();
        assert!(!store.tag_room(room("!r:example.org"), "nope"));
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn every_room_is_in_the_implicit_all_category() {
        let (store, _rx) = new_store();
        assert!(store.is_room_in_category(&room("!any:example.org"), None));
    }

    #[test]
    fn remote_tags_outside_the_namespace_are_ignored() {
        let (mut store, _rx) = new_store();
        let r = room("!r:example.org");
        let tags = BTreeSet::from([
            "m.favourite".to_owned(),
            format!("{CATEGORY_TAG_PREFIX}abc123"),
        ]);
        store.apply_remote_tags(r.clone(), &tags);
        assert_eq!(store.room_categories(&r), BTreeSet::from(["abc123".to_owned()]));
    }
}
