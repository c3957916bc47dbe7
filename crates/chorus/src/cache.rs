use std::sync::{Mutex, MutexGuard, PoisonError};

use hashbrown::{HashMap, HashSet};
use nrelay::{Event, NoteId, Pubkey};
use tracing::trace;

use crate::profile::Profile;

#[derive(Default)]
struct CacheInner {
    events: HashMap<NoteId, Event>,
    profiles: HashMap<Pubkey, Profile>,
}

/// Session store for every event and profile seen so far.
///
/// One lock guards both maps, so readers never see a half-written entry.
/// Nothing is ever evicted. Accessors hand out clones.
#[derive(Default)]
pub struct EventCache {
    inner: Mutex<CacheInner>,
}

impl EventCache {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, CacheInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn has(&self, id: &NoteId) -> bool {
        self.lock().events.contains_key(id)
    }

    pub fn get(&self, id: &NoteId) -> Option<Event> {
        self.lock().events.get(id).cloned()
    }

    /// Store `event`, returning whether its id was new. A re-observed event
    /// keeps its stored fields and gains the new `extra` annotations.
    pub fn put(&self, event: Event) -> bool {
        let mut inner = self.lock();
        match inner.events.get_mut(&event.id) {
            Some(existing) => {
                trace!("cache: merging re-observed {}", event.id);
                existing.merge_extra(&event);
                false
            }
            None => {
                inner.events.insert(event.id, event);
                true
            }
        }
    }

    pub fn event_count(&self) -> usize {
        self.lock().events.len()
    }

    pub fn event_ids(&self) -> Vec<NoteId> {
        self.lock().events.keys().copied().collect()
    }

    pub fn has_profile(&self, pk: &Pubkey) -> bool {
        self.lock().profiles.contains_key(pk)
    }

    pub fn get_profile(&self, pk: &Pubkey) -> Option<Profile> {
        self.lock().profiles.get(pk).cloned()
    }

    /// Insert or replace unconditionally
    pub fn put_profile(&self, profile: Profile) {
        self.lock().profiles.insert(profile.pubkey, profile);
    }

    /// Store `profile` unless the cached one comes from a metadata event at
    /// least as new. Returns whether it was stored.
    pub fn put_profile_if_newer(&self, profile: Profile) -> bool {
        let mut inner = self.lock();
        if let Some(cached) = inner.profiles.get(&profile.pubkey) {
            if cached.created_at >= profile.created_at {
                trace!(
                    "cache: keeping profile {} ({} >= {})",
                    profile.pubkey,
                    cached.created_at,
                    profile.created_at
                );
                return false;
            }
        }
        inner.profiles.insert(profile.pubkey, profile);
        true
    }

    /// Re-derive every cached profile's `following` flag
    pub fn set_following(&self, following: &HashSet<Pubkey>) {
        for profile in self.lock().profiles.values_mut() {
            profile.following = following.contains(&profile.pubkey);
        }
    }

    pub fn profile_count(&self) -> usize {
        self.lock().profiles.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::profile::ProfileMetadata;
    use nrelay::kind;

    fn event(id: u8, relay: &str) -> Event {
        let mut ev = Event {
            id: NoteId::new([id; 32]),
            pubkey: Pubkey::new([9; 32]),
            created_at: 100,
            kind: kind::TEXT_NOTE,
            tags: vec![],
            content: "hello".to_owned(),
            sig: String::new(),
            extra: Default::default(),
        };
        ev.extra.add_relay(relay);
        ev
    }

    fn profile(created_at: u64, name: &str) -> Profile {
        let mut profile = Profile::placeholder(Pubkey::new([1; 32]));
        profile.created_at = created_at;
        profile.metadata = ProfileMetadata {
            name: Some(name.to_owned()),
            ..Default::default()
        };
        profile
    }

    #[test]
    fn put_twice_keeps_one_entry_and_adds_provenance() {
        let cache = EventCache::new();
        assert!(cache.put(event(1, "wss://a.example/")));

        let mut again = event(1, "wss://b.example/");
        again.content = "tampered".to_owned();
        assert!(!cache.put(again));

        assert_eq!(cache.event_count(), 1);
        let stored = cache.get(&NoteId::new([1; 32])).expect("stored");
        assert_eq!(stored.id, NoteId::new([1; 32]));
        assert_eq!(stored.content, "hello");
        assert_eq!(
            stored.extra.relays(),
            ["wss://a.example/".to_owned(), "wss://b.example/".to_owned()]
        );
    }

    #[test]
    fn missing_ids() {
        let cache = EventCache::new();
        assert!(!cache.has(&NoteId::new([7; 32])));
        assert!(cache.get(&NoteId::new([7; 32])).is_none());
        assert!(cache.get_profile(&Pubkey::new([7; 32])).is_none());
    }

    #[test]
    fn newer_profile_wins() {
        let cache = EventCache::new();
        assert!(cache.put_profile_if_newer(profile(200, "new")));
        assert!(!cache.put_profile_if_newer(profile(100, "old")));
        assert!(!cache.put_profile_if_newer(profile(200, "same age")));

        let pk = Pubkey::new([1; 32]);
        assert_eq!(
            cache.get_profile(&pk).map(|p| p.display_name().to_owned()),
            Some("new".to_owned())
        );

        assert!(cache.put_profile_if_newer(profile(300, "newest")));
        assert_eq!(cache.get_profile(&pk).map(|p| p.created_at), Some(300));
    }

    #[test]
    fn following_is_rederived() {
        let cache = EventCache::new();
        cache.put_profile(profile(1, "alice"));
        let pk = Pubkey::new([1; 32]);

        cache.set_following(&HashSet::from([pk]));
        assert!(cache.get_profile(&pk).is_some_and(|p| p.following));

        cache.set_following(&HashSet::new());
        assert!(cache.get_profile(&pk).is_some_and(|p| !p.following));
    }
}
