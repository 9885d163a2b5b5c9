use futures::future::join_all;
use parley_core::PeerId;
use parley_server::{MembershipError, RegistryError, RemoteSignal};

use crate::integration::{TestAgent, init_tracing, room, test_config};

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_callers_share_one_room() {
    init_tracing();
    let agent = TestAgent::new(test_config());

    let handles = join_all((0..16).map(|_| {
        let registry = agent.registry.clone();
        tokio::spawn(async move { registry.get_or_create("R1").await })
    }))
    .await;

    let handles: Vec<_> = handles
        .into_iter()
        .map(|h| h.expect("task panicked").expect("room created"))
        .collect();
    assert!(handles.iter().all(|h| h.same_session(&handles[0])));
    assert_eq!(agent.registry.len(), 1);
    assert_eq!(agent.pipelines.builds(), 1);
    assert!(agent.feed.joined().iter().all(|r| *r == room("R1")));
}

#[tokio::test]
async fn test_existing_room_is_reused() {
    init_tracing();
    let agent = TestAgent::new(test_config());

    let first = agent.registry.get_or_create("R1").await.unwrap();
    let second = agent.registry.get_or_create("R1").await.unwrap();
    let other = agent.registry.get_or_create("R2").await.unwrap();

    assert!(first.same_session(&second));
    assert!(!first.same_session(&other));
    assert_eq!(agent.registry.room_ids(), vec![room("R1"), room("R2")]);
    assert_eq!(agent.feed.joined(), vec![room("R1"), room("R2")]);
}

#[tokio::test]
async fn test_invalid_room_id_creates_nothing() {
    init_tracing();
    let agent = TestAgent::new(test_config());

    let too_long = "x".repeat(129);
    for bad in ["", "room with spaces", "r/1", too_long.as_str()] {
        let err = agent.registry.get_or_create(bad).await.unwrap_err();
        assert!(matches!(err, RegistryError::InvalidRoomId(_)), "{bad:?}");
    }
    let err = agent
        .registry
        .notify_peer_joined("not ok", PeerId::from("a"), None)
        .await
        .unwrap_err();
    assert!(matches!(err, RegistryError::InvalidRoomId(_)));

    assert!(agent.registry.is_empty());
    assert_eq!(agent.pipelines.builds(), 0);
    assert!(agent.feed.joined().is_empty());
}

#[tokio::test]
async fn test_failed_membership_join_creates_nothing() {
    init_tracing();
    let agent = TestAgent::new(test_config());
    agent.feed.fail_joins_for("R2");

    let err = agent.registry.get_or_create("R2").await.unwrap_err();
    assert!(matches!(
        err,
        RegistryError::Membership(MembershipError::JoinFailed { .. })
    ));
    assert!(agent.registry.is_empty());
    assert_eq!(agent.pipelines.builds(), 0);
    assert_eq!(agent.media.connects(), 0);
}

#[tokio::test]
async fn test_signal_for_unknown_room_is_rejected() {
    init_tracing();
    let agent = TestAgent::new(test_config());

    let err = agent
        .registry
        .signal("R9", PeerId::from("a"), RemoteSignal::Offer("o".into()))
        .await
        .unwrap_err();
    assert!(matches!(err, RegistryError::UnknownRoom(_)));

    // Leaving a room that does not exist is harmless.
    agent
        .registry
        .notify_peer_left("R9", PeerId::from("a"))
        .await
        .unwrap();
    assert!(agent.registry.is_empty());
}

#[tokio::test]
async fn test_offer_from_unseen_peer_joins_it() {
    init_tracing();
    let agent = TestAgent::new(test_config());
    agent.registry.get_or_create("R1").await.unwrap();
    let peer = PeerId::from("late");

    agent
        .registry
        .signal("R1", peer.clone(), RemoteSignal::Candidate("c".into()))
        .await
        .unwrap();
    assert!(agent.peer_ids("R1").await.is_empty());

    agent
        .registry
        .signal("R1", peer.clone(), RemoteSignal::Offer("o".into()))
        .await
        .unwrap();
    assert_eq!(agent.peer_ids("R1").await, vec![peer.clone()]);
    assert!(
        agent
            .wait_for_peers(
                "R1",
                |peers| {
                    peers.first().is_some_and(|p| {
                        p.negotiation.state.is_stable() && p.negotiation.has_remote_description
                    })
                },
                2000
            )
            .await
    );
    assert_eq!(agent.signaling.answers_for(&peer).await.len(), 1);
}
