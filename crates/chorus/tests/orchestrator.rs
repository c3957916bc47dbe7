use std::collections::BTreeSet;
use std::sync::Arc;

use chorus::time::unix_time_secs;
use chorus::{
    Error, EventCache, FeedConfig, Identity, MergePolicy, Notification, NotificationReceiver,
    Orchestrator, ProfileMetadata,
};
use chorus_testing::{
    contact_list, init_tracing, metadata, note_id, pubkey, text_note, MockRelay, MockTransport,
};
use nrelay::{kind, KeysSigner, PoolConfig, Pubkey, RelayPool};
use pretty_assertions::assert_eq;

struct Harness {
    orch: Arc<Orchestrator>,
    rx: NotificationReceiver,
}

impl Harness {
    /// Everything notified so far
    fn drain(&mut self) -> Vec<Notification> {
        let mut out = Vec::new();
        while let Ok(n) = self.rx.try_recv() {
            out.push(n);
        }
        out
    }

    fn names(&mut self) -> Vec<&'static str> {
        self.drain().iter().map(Notification::name).collect()
    }
}

async fn harness_with(
    transport: &MockTransport,
    relays: &[&MockRelay],
    identity: Identity,
    config: FeedConfig,
) -> Harness {
    init_tracing();
    let pool = Arc::new(RelayPool::new(
        Arc::new(transport.clone()),
        PoolConfig::default(),
    ));
    pool.add_all(relays.iter().map(|r| r.descriptor()).collect())
        .await;

    let (tx, rx) = chorus::notification::channel();
    let orch = Orchestrator::new(pool, Arc::new(EventCache::new()), identity, config, tx);
    Harness {
        orch: Arc::new(orch),
        rx,
    }
}

async fn harness(
    transport: &MockTransport,
    relays: &[&MockRelay],
    identity: Identity,
) -> Harness {
    harness_with(transport, relays, identity, FeedConfig::default()).await
}

fn recent() -> u64 {
    unix_time_secs() - 60
}

fn me() -> Pubkey {
    pubkey(200)
}

#[tokio::test]
async fn same_event_from_two_relays_is_new_once() {
    let transport = MockTransport::new();
    let alice = pubkey(1);
    let note = text_note(1, alice, recent(), "gm");
    let a = transport.relay("wss://a.example").with_events([note.clone()]);
    let b = transport.relay("wss://b.example").with_events([note.clone()]);
    let mut h = harness(&transport, &[&a, &b], Identity::anonymous()).await;

    let new = h
        .orch
        .notes_by_authors(&[alice], &[kind::TEXT_NOTE], None, None, MergePolicy::NewOnly)
        .await;

    assert_eq!(new, 1);
    assert_eq!(h.orch.cache().event_count(), 1);
    assert_eq!(h.names(), vec!["new-event"]);

    let cached = h.orch.cache().get(&note.id).expect("cached");
    assert_eq!(cached.extra.relays().len(), 2);
    assert_eq!(cached.extra.get("when"), Some("1m"));
}

#[tokio::test]
async fn reposts_are_announced_only_when_asked() {
    let transport = MockTransport::new();
    let alice = pubkey(1);
    let a = transport
        .relay("wss://a.example")
        .with_events([text_note(1, alice, recent(), "gm")]);
    let mut h = harness(&transport, &[&a], Identity::anonymous()).await;

    let kinds = [kind::TEXT_NOTE];
    h.orch
        .notes_by_authors(&[alice], &kinds, None, None, MergePolicy::Silent)
        .await;
    assert!(h.drain().is_empty());

    let new = h
        .orch
        .notes_by_authors(&[alice], &kinds, None, None, MergePolicy::NewOnly)
        .await;
    assert_eq!(new, 0);
    assert!(h.drain().is_empty());

    h.orch
        .notes_by_authors(&[alice], &kinds, None, None, MergePolicy::WithReposts)
        .await;
    assert_eq!(h.names(), vec!["refreshed-event"]);
}

#[tokio::test]
async fn tagged_profiles_fetch_misses_in_one_batch() {
    let transport = MockTransport::new();
    let (cached, fetched, unknown) = (pubkey(2), pubkey(3), pubkey(4));
    let a = transport
        .relay("wss://a.example")
        .with_events([metadata(30, fetched, 100, r#"{"name":"fetched"}"#)]);
    let b = transport.relay("wss://b.example");
    let h = harness(&transport, &[&a, &b], Identity::anonymous()).await;

    h.orch
        .cache()
        .put_profile(chorus::Profile::placeholder(cached));
    let mut parent = text_note(99, pubkey(1), recent(), "hey");
    parent.tags = [cached, fetched, unknown, fetched]
        .iter()
        .map(|pk| vec!["p".to_owned(), pk.hex()])
        .collect();
    let parent_id = parent.id;
    h.orch.cache().put(parent);

    let profiles = h.orch.tagged_profiles(&parent_id).await;

    let found: Vec<Pubkey> = profiles.iter().map(|p| p.pubkey).collect();
    assert_eq!(found, vec![cached, fetched]);

    for relay in [&a, &b] {
        let reqs = relay.reqs();
        assert_eq!(reqs.len(), 1);
        assert_eq!(reqs[0].authors, vec![fetched, unknown]);
        assert_eq!(reqs[0].limit, Some(2));
    }
}

#[tokio::test]
async fn tagged_events_fetch_misses_in_one_batch() {
    let transport = MockTransport::new();
    let alice = pubkey(1);
    let known = text_note(10, alice, recent(), "known");
    let remote = text_note(11, alice, recent(), "remote");
    let a = transport.relay("wss://a.example").with_events([remote.clone()]);
    let h = harness(&transport, &[&a], Identity::anonymous()).await;

    h.orch.cache().put(known.clone());
    let mut parent = text_note(99, alice, recent(), "reply");
    parent.tags = vec![
        vec!["e".to_owned(), known.id.hex()],
        vec!["e".to_owned(), remote.id.hex()],
        vec!["e".to_owned(), note_id(12).hex()],
    ];
    let parent_id = parent.id;
    h.orch.cache().put(parent);

    let events = h.orch.tagged_events(&parent_id).await;

    let contents: Vec<&str> = events.iter().map(|e| e.content.as_str()).collect();
    assert_eq!(contents, vec!["known", "remote"]);
    assert_eq!(a.req_count(), 1);
    assert_eq!(a.reqs()[0].ids, vec![remote.id, note_id(12)]);
}

#[tokio::test]
async fn uncached_parent_resolves_to_nothing() {
    let transport = MockTransport::new();
    let a = transport.relay("wss://a.example");
    let h = harness(&transport, &[&a], Identity::anonymous()).await;

    assert!(h.orch.tagged_profiles(&note_id(1)).await.is_empty());
    assert!(h.orch.tagged_events(&note_id(1)).await.is_empty());
    assert_eq!(a.req_count(), 0);
}

#[tokio::test]
async fn newer_metadata_wins_whatever_the_arrival_order() {
    let transport = MockTransport::new();
    let alice = pubkey(1);
    let a = transport
        .relay("wss://a.example")
        .with_events([metadata(1, alice, 200, r#"{"name":"new"}"#)]);
    let b = transport
        .relay("wss://b.example")
        .with_events([metadata(2, alice, 100, r#"{"name":"old"}"#)]);
    let h = harness(&transport, &[&a, &b], Identity::anonymous()).await;

    h.orch.fetch_profiles(&[alice]).await;
    let profile = h.orch.cache().get_profile(&alice).expect("profile");
    assert_eq!(profile.display_name(), "new");
    assert_eq!(profile.created_at, 200);

    // again, with the old one already cached elsewhere
    h.orch.fetch_profiles(&[alice]).await;
    assert_eq!(
        h.orch.cache().get_profile(&alice).map(|p| p.created_at),
        Some(200)
    );
}

#[tokio::test]
async fn malformed_metadata_leaves_profile_alone() {
    let transport = MockTransport::new();
    let alice = pubkey(1);
    let a = transport
        .relay("wss://a.example")
        .with_events([metadata(1, alice, 300, "[not an object]")]);
    let h = harness(&transport, &[&a], Identity::anonymous()).await;

    let mut before = chorus::Profile::placeholder(alice);
    before.created_at = 100;
    h.orch.cache().put_profile(before.clone());

    assert_eq!(h.orch.fetch_profiles(&[alice]).await, 0);
    assert_eq!(h.orch.cache().get_profile(&alice), Some(before));
}

#[tokio::test]
async fn contacts_come_from_the_newest_list() {
    let transport = MockTransport::new();
    let (alice, bob) = (pubkey(1), pubkey(2));
    let a = transport
        .relay("wss://a.example")
        .with_events([contact_list(1, me(), 100, &[pubkey(9)])]);
    let mut newer = contact_list(2, me(), 200, &[alice, bob, alice]);
    newer.tags.push(vec!["p".to_owned(), "zz".to_owned()]);
    let b = transport.relay("wss://b.example").with_events([
        newer,
        metadata(3, alice, 50, r#"{"display_name":"Alice"}"#),
    ]);
    let mut h = harness(&transport, &[&a, &b], Identity::read_only(me())).await;

    let following = h.orch.refresh_contact_profiles().await;

    assert_eq!(following, vec![alice, bob]);
    assert_eq!(h.orch.following(), vec![alice, bob]);

    let notifications = h.drain();
    let updated: Vec<_> = notifications
        .iter()
        .filter_map(|n| match n {
            Notification::ProfileUpdated(p) => Some(p.pubkey),
            _ => None,
        })
        .collect();
    assert_eq!(updated, vec![alice]);
    assert!(h.orch.cache().get_profile(&alice).is_some_and(|p| p.following));
}

#[tokio::test]
async fn contact_profile_falls_back_to_placeholder() {
    let transport = MockTransport::new();
    let (alice, nobody) = (pubkey(1), pubkey(2));
    let a = transport
        .relay("wss://a.example")
        .with_events([metadata(1, alice, 100, r#"{"name":"alice"}"#)]);
    let h = harness(&transport, &[&a], Identity::anonymous()).await;

    let profile = h.orch.contact_profile(&alice).await;
    assert_eq!(profile.display_name(), "alice");
    assert_eq!(a.req_count(), 1);

    // second lookup is served from the cache
    h.orch.contact_profile(&alice).await;
    assert_eq!(a.req_count(), 1);

    let placeholder = h.orch.contact_profile(&nobody).await;
    assert!(placeholder.metadata.is_empty());
    assert_eq!(placeholder.pubkey, nobody);
    assert!(!h.orch.cache().has_profile(&nobody));
}

#[tokio::test]
async fn feed_refresh_chunks_followed_authors() {
    let transport = MockTransport::new();
    let follows: Vec<Pubkey> = (1..=30).map(pubkey).collect();
    let a = transport.relay("wss://a.example").with_events([
        contact_list(1, me(), 100, &follows),
        text_note(2, pubkey(5), recent(), "in window"),
        text_note(3, pubkey(6), 1_000, "too old"),
    ]);
    let h = harness(&transport, &[&a], Identity::read_only(me())).await;

    h.orch.refresh_contact_profiles().await;
    let since = h.orch.last_refresh();
    assert_eq!(a.req_count(), 2);

    let new = h.orch.refresh_feed(MergePolicy::NewOnly).await;
    assert_eq!(new, 1);

    let reqs = a.reqs();
    assert_eq!(reqs.len(), 4);
    let sizes: Vec<usize> = reqs[2..].iter().map(|f| f.authors.len()).collect();
    assert_eq!(sizes, vec![25, 5]);
    for filter in &reqs[2..] {
        assert_eq!(filter.kinds, vec![kind::TEXT_NOTE, kind::REPOST]);
        assert_eq!(filter.since, Some(since));
    }
    assert!(h.orch.last_refresh() > since);
}

#[tokio::test]
async fn feed_reset_reannounces_the_window() {
    let transport = MockTransport::new();
    let alice = pubkey(1);
    let a = transport.relay("wss://a.example").with_events([
        contact_list(1, me(), 100, &[alice]),
        text_note(2, alice, recent(), "hello"),
    ]);
    let mut h = harness(&transport, &[&a], Identity::read_only(me())).await;

    h.orch.refresh_contact_profiles().await;
    h.orch.refresh_feed(MergePolicy::NewOnly).await;
    assert_eq!(h.names(), vec!["new-event"]);

    // nothing new since the last refresh
    h.orch.refresh_feed(MergePolicy::NewOnly).await;
    assert!(h.drain().is_empty());

    h.orch.refresh_feed_reset().await;
    assert_eq!(h.names(), vec!["refreshed-event"]);
}

#[tokio::test]
async fn feed_subscription_applies_phase_policies() {
    let transport = MockTransport::new();
    let alice = pubkey(1);
    let a = transport.relay("wss://a.example").with_events([
        contact_list(1, me(), 100, &[alice]),
        text_note(2, alice, recent(), "stored"),
    ]);
    let mut h = harness(&transport, &[&a], Identity::read_only(me())).await;

    h.orch.refresh_contact_profiles().await;
    h.orch.refresh_feed(MergePolicy::Silent).await;
    // refresh_feed moved the window past `stored`
    assert_eq!(h.orch.subscribe_feed(), 1);
    assert!(h.orch.is_feed_active());

    let live = text_note(3, alice, unix_time_secs(), "live");
    a.push_live(live.clone());
    match h.rx.recv().await {
        Some(Notification::NewEvent(ev)) => assert_eq!(ev.content, "live"),
        other => panic!("expected a new live event, got {other:?}"),
    }

    // a live re-delivery of something cached stays quiet
    a.push_live(live);
    a.push_live(text_note(4, alice, unix_time_secs(), "after"));
    match h.rx.recv().await {
        Some(Notification::NewEvent(ev)) => assert_eq!(ev.content, "after"),
        other => panic!("expected the next live event, got {other:?}"),
    }

    h.orch.unsubscribe_feed();
    assert!(!h.orch.is_feed_active());
    assert_eq!(a.open_subscriptions(), 0);
}

#[tokio::test]
async fn backlog_of_known_events_is_refreshed() {
    let transport = MockTransport::new();
    let alice = pubkey(1);
    let a = transport.relay("wss://a.example").with_events([
        contact_list(1, me(), 100, &[alice]),
        text_note(2, alice, recent(), "stored"),
    ]);
    let mut h = harness(&transport, &[&a], Identity::read_only(me())).await;

    h.orch.refresh_contact_profiles().await;
    h.orch
        .notes_by_authors(&[alice], &[kind::TEXT_NOTE], None, None, MergePolicy::Silent)
        .await;

    h.orch.subscribe_feed();
    match h.rx.recv().await {
        Some(Notification::RefreshedEvent(ev)) => assert_eq!(ev.content, "stored"),
        other => panic!("expected a refreshed backlog event, got {other:?}"),
    }
}

#[tokio::test]
async fn follow_and_unfollow_publish_contact_lists() {
    let transport = MockTransport::new();
    let (alice, bob) = (pubkey(1), pubkey(2));
    let a = transport.relay("wss://a.example");
    let signer = Arc::new(KeysSigner::generate());
    let mut h = harness(&transport, &[&a], Identity::with_signer(signer.clone())).await;

    let published = h.orch.follow(&[alice, bob, alice]).await.expect("published");
    assert_eq!(published.event.kind, kind::CONTACT_LIST);
    assert_eq!(published.report.accepted.len(), 1);
    assert_eq!(h.orch.following(), vec![alice, bob]);
    assert_eq!(h.names(), vec!["new-event", "contacts-changed"]);

    let published = h.orch.unfollow(&alice).await.expect("published");
    let tagged: Vec<&str> = published.event.tag_values("p").collect();
    assert_eq!(tagged, vec![bob.hex()]);
    assert_eq!(h.orch.following(), vec![bob]);
    match h.drain().last() {
        Some(Notification::ContactsChanged(following)) => assert_eq!(following, &vec![bob]),
        other => panic!("expected the new contact set, got {other:?}"),
    }

    let sent = a.published();
    assert_eq!(sent.len(), 2);
    assert!(sent.iter().all(|ev| ev.pubkey == nrelay::Signer::pubkey(&*signer)));
}

#[tokio::test]
async fn delete_and_metadata_are_signed_and_sent() {
    let transport = MockTransport::new();
    let a = transport.relay("wss://a.example");
    let signer = Arc::new(KeysSigner::generate());
    let h = harness(&transport, &[&a], Identity::with_signer(signer)).await;

    let target = note_id(42);
    let deletion = h.orch.delete_event(&target).await.expect("published");
    assert_eq!(deletion.event.kind, kind::DELETION);
    assert_eq!(deletion.event.content, "Deletion request");
    assert_eq!(
        deletion.event.tag_values("e").collect::<Vec<_>>(),
        vec![target.hex()]
    );

    let meta = ProfileMetadata {
        name: Some("chorus".to_owned()),
        ..Default::default()
    };
    let published = h.orch.set_metadata(&meta).await.expect("published");
    let own = h
        .orch
        .cache()
        .get_profile(&published.event.pubkey)
        .expect("own profile cached");
    assert_eq!(own.display_name(), "chorus");
    assert_eq!(a.published().len(), 2);
}

#[tokio::test]
async fn publishing_needs_a_signer() {
    let transport = MockTransport::new();
    let a = transport.relay("wss://a.example");
    let h = harness(&transport, &[&a], Identity::read_only(me())).await;

    assert!(matches!(h.orch.follow(&[pubkey(1)]).await, Err(Error::NoSigner)));
    assert!(matches!(
        h.orch.publish(kind::TEXT_NOTE, vec![], "hi").await,
        Err(Error::NoSigner)
    ));
    assert!(a.published().is_empty());
    assert!(h.orch.following().is_empty());
}

#[tokio::test]
async fn rejected_publish_is_an_error() {
    let transport = MockTransport::new();
    let a = transport.relay("wss://a.example");
    a.accept_publishes(false);
    let signer = Arc::new(KeysSigner::generate());
    let h = harness(&transport, &[&a], Identity::with_signer(signer)).await;

    let result = h.orch.publish(kind::TEXT_NOTE, vec![], "hi").await;
    assert!(matches!(
        result,
        Err(Error::Relay(nrelay::Error::PublishRejected(_)))
    ));
    assert_eq!(h.orch.cache().event_count(), 0);
}

#[tokio::test]
async fn publish_to_selected_relays() {
    let transport = MockTransport::new();
    let a = transport.relay("wss://a.example");
    let b = transport.relay("wss://b.example");
    let signer = Arc::new(KeysSigner::generate());
    let h = harness(&transport, &[&a, &b], Identity::with_signer(signer)).await;

    let published = h
        .orch
        .publish_to(kind::TEXT_NOTE, vec![], "only b", &["wss://b.example/".to_owned()])
        .await
        .expect("published");

    assert_eq!(published.report.accepted.len(), 1);
    assert!(a.published().is_empty());
    assert_eq!(b.published().len(), 1);
}

#[tokio::test]
async fn health_snapshot_is_notified() {
    let transport = MockTransport::new();
    let a = transport.relay("wss://a.example");
    let b = transport.relay("wss://b.example");
    let mut h = harness(&transport, &[&a, &b], Identity::anonymous()).await;

    let health = h.orch.health_snapshot();
    assert_eq!(health.readable, 2);
    assert_eq!(health.writable, 2);

    match h.drain().as_slice() {
        [Notification::RelayHealth(sent)] => assert_eq!(*sent, health),
        other => panic!("expected one health notification, got {other:?}"),
    }
}

#[tokio::test]
async fn set_relays_replaces_the_pool() {
    let transport = MockTransport::new();
    let a = transport.relay("wss://a.example");
    let b = transport.relay("wss://b.example");
    let h = harness(&transport, &[&a], Identity::anonymous()).await;

    let connected = h.orch.set_relays(vec![b.descriptor()]).await;

    assert_eq!(connected, 1);
    assert_eq!(
        h.orch.pool().urls(),
        BTreeSet::from(["wss://b.example/".to_owned()])
    );
    assert_eq!(b.connects(), 1);
}

#[tokio::test(start_paused = true)]
async fn maintenance_ticks_and_reconnects() {
    let transport = MockTransport::new();
    let a = transport.relay("wss://a.example");
    let config = FeedConfig {
        poll_interval_secs: 60,
        reconnect_after_polls: 2,
        ..Default::default()
    };
    let mut h = harness_with(&transport, &[&a], Identity::anonymous(), config).await;

    h.orch.start_maintenance();
    tokio::time::sleep(std::time::Duration::from_secs(125)).await;

    let names = h.names();
    assert_eq!(names.iter().filter(|n| **n == "heartbeat").count(), 2);
    assert_eq!(names.iter().filter(|n| **n == "relay-health").count(), 2);
    assert_eq!(a.connects(), 2);

    h.orch.shutdown();
    tokio::time::sleep(std::time::Duration::from_secs(600)).await;
    assert!(h.names().is_empty());
    assert!(!h.orch.pool().get("wss://a.example").is_some_and(|c| c.is_connected()));
}
