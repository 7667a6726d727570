//! Peer interest tracking.
//!
//! Reference-counts which peers some subsystem currently needs resident,
//! under named interest types. A peer is tracked while its interest set is
//! non-empty. Exclusive slots let a named role point at exactly one peer at
//! a time; claiming the slot releases the previous holder.

use std::collections::{HashMap, HashSet};

use parley_shared::{PeerId, NULL_PEER_ID};
use tracing::debug;

use crate::events::{EventBus, StateEvent};

/// Why a subsystem needs a peer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PeerInterest {
    RecentSearch,
    TopPeer,
    Dialog,
    Contact,
    TopMessage,
    SelfPeer,
}

impl PeerInterest {
    pub fn as_str(&self) -> &'static str {
        match self {
            PeerInterest::RecentSearch => "recentSearch",
            PeerInterest::TopPeer => "topPeer",
            PeerInterest::Dialog => "dialog",
            PeerInterest::Contact => "contact",
            PeerInterest::TopMessage => "topMessage",
            PeerInterest::SelfPeer => "self",
        }
    }

    /// Name of the exclusive slot `{type}_{key}`.
    pub fn slot(&self, exclusive_key: PeerId) -> String {
        format!("{}_{}", self.as_str(), exclusive_key)
    }
}

/// Tracks which peers are needed and by whom.
#[derive(Debug)]
pub struct PeerInterestTracker {
    needed: HashMap<PeerId, HashSet<String>>,
    single: HashMap<String, PeerId>,
    events: EventBus,
}

impl PeerInterestTracker {
    pub fn new(events: EventBus) -> Self {
        Self {
            needed: HashMap::new(),
            single: HashMap::new(),
            events,
        }
    }

    /// Add `interest` to the peer's set and announce it as needed.
    ///
    /// No-op if the peer already holds `interest`. With `exclusive`, the
    /// interest type becomes a single-holder slot owned by `peer_id`.
    pub fn request(&mut self, peer_id: PeerId, interest: PeerInterest, exclusive: bool) {
        self.request_type(peer_id, interest.as_str(), exclusive);
    }

    /// Claim the exclusive slot `{interest}_{exclusive_key}` for `peer_id`.
    ///
    /// `exclusive_key` defaults to `peer_id` itself.
    pub fn request_single(
        &mut self,
        peer_id: PeerId,
        interest: PeerInterest,
        exclusive_key: Option<PeerId>,
    ) {
        let slot = interest.slot(exclusive_key.unwrap_or(peer_id));
        self.request_type(peer_id, &slot, true);
    }

    /// Release the slot `{interest}_{peer_id}`, leaving it empty.
    pub fn release_single(&mut self, peer_id: PeerId, interest: PeerInterest) {
        let slot = interest.slot(peer_id);
        self.keep_single_type(NULL_PEER_ID, &slot);
    }

    pub fn is_needed(&self, peer_id: PeerId) -> bool {
        self.needed.contains_key(&peer_id)
    }

    /// Make `peer_id` the only holder of `interest`.
    ///
    /// A different previous holder loses `interest`, and is announced as
    /// unneeded if that was its last one. Passing [`NULL_PEER_ID`] empties
    /// the slot.
    pub fn keep_single(&mut self, peer_id: PeerId, interest: PeerInterest) {
        self.keep_single_type(peer_id, interest.as_str());
    }

    /// Interest types currently held by `peer_id`, sorted.
    pub fn interests(&self, peer_id: PeerId) -> Vec<String> {
        let mut types: Vec<String> = self
            .needed
            .get(&peer_id)
            .map(|set| set.iter().cloned().collect())
            .unwrap_or_default();
        types.sort();
        types
    }

    /// Every tracked peer.
    pub fn needed_peers(&self) -> Vec<PeerId> {
        self.needed.keys().copied().collect()
    }

    /// Current holder of a named exclusive slot.
    pub fn slot_holder(&self, slot: &str) -> Option<PeerId> {
        self.single.get(slot).copied()
    }

    fn request_type(&mut self, peer_id: PeerId, type_name: &str, exclusive: bool) {
        if peer_id.is_null() {
            debug!(interest = type_name, "Ignoring interest request for the null peer");
            return;
        }

        let set = self.needed.entry(peer_id).or_default();
        if !set.insert(type_name.to_string()) {
            return;
        }

        debug!(peer = %peer_id, interest = type_name, "Peer needed");
        self.events.emit(StateEvent::PeerNeeded(peer_id));

        if exclusive {
            self.keep_single_type(peer_id, type_name);
        }
    }

    fn keep_single_type(&mut self, peer_id: PeerId, type_name: &str) {
        if let Some(existing) = self.single.get(type_name).copied() {
            if existing != peer_id {
                self.drop_interest(existing, type_name);
            }
        }

        if peer_id.is_null() {
            self.single.remove(type_name);
        } else {
            self.single.insert(type_name.to_string(), peer_id);
        }
    }

    fn drop_interest(&mut self, peer_id: PeerId, type_name: &str) {
        let Some(set) = self.needed.get_mut(&peer_id) else {
            return;
        };

        set.remove(type_name);
        if set.is_empty() {
            self.needed.remove(&peer_id);
            debug!(peer = %peer_id, interest = type_name, "Peer no longer needed");
            self.events.emit(StateEvent::PeerUnneeded(peer_id));
        }
    }
}
