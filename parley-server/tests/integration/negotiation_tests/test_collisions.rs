use parley_server::{RemoteSignal, SdpKind};

use super::spawn_negotiator;
use crate::integration::init_tracing;
use crate::utils::TransportCall;

#[tokio::test]
async fn test_polite_peer_yields_to_colliding_offer() {
    init_tracing();
    let f = spawn_negotiator(true, 600_000);

    f.handle.renegotiate().await;
    assert!(f.signaling.wait_for_offers(&f.peer_id, 1, 2000).await);
    f.handle.wait_for(|s| s.awaiting_answer).await;

    f.handle
        .remote(RemoteSignal::Offer("remote-offer".into()))
        .await;
    let status = f
        .handle
        .wait_for(|s| s.state.is_stable() && s.has_remote_description)
        .await;
    assert!(status.state.is_stable());

    assert_eq!(f.signaling.answers_for(&f.peer_id).await, vec!["answer-p-1"]);
    let calls = f.transport.calls().await;
    assert!(calls.contains(&TransportCall::SetRemote {
        kind: SdpKind::Offer,
        sdp: "remote-offer".into(),
    }));
    assert!(calls.contains(&TransportCall::SetLocal {
        kind: SdpKind::Answer,
        sdp: "answer-p-1".into(),
    }));

    // The answer to the abandoned offer arrives late and must not be applied.
    f.handle
        .remote(RemoteSignal::Answer("late-answer".into()))
        .await;
    f.handle.renegotiate().await;
    assert!(f.signaling.wait_for_offers(&f.peer_id, 2, 2000).await);

    let calls = f.transport.calls().await;
    assert!(!calls.iter().any(|c| matches!(
        c,
        TransportCall::SetRemote {
            kind: SdpKind::Answer,
            ..
        }
    )));
}

#[tokio::test]
async fn test_impolite_peer_ignores_colliding_offer() {
    init_tracing();
    let f = spawn_negotiator(false, 600_000);

    f.handle.renegotiate().await;
    assert!(f.signaling.wait_for_offers(&f.peer_id, 1, 2000).await);

    f.handle
        .remote(RemoteSignal::Offer("remote-offer".into()))
        .await;
    f.handle
        .remote(RemoteSignal::Answer("remote-answer".into()))
        .await;

    let status = f
        .handle
        .wait_for(|s| s.state.is_stable() && s.has_remote_description)
        .await;
    assert!(!status.polite);

    assert!(f.signaling.answers_for(&f.peer_id).await.is_empty());
    let remote: Vec<_> = f
        .transport
        .calls()
        .await
        .into_iter()
        .filter(|c| matches!(c, TransportCall::SetRemote { .. }))
        .collect();
    assert_eq!(
        remote,
        vec![TransportCall::SetRemote {
            kind: SdpKind::Answer,
            sdp: "remote-answer".into(),
        }]
    );
}

#[tokio::test]
async fn test_collision_keeps_interrupted_ice_restart() {
    init_tracing();
    let f = spawn_negotiator(true, 600_000);

    f.handle.ice_failed().await;
    assert!(f.signaling.wait_for_offers(&f.peer_id, 1, 2000).await);

    f.handle
        .remote(RemoteSignal::Offer("remote-offer".into()))
        .await;

    assert!(f.signaling.wait_for_offers(&f.peer_id, 2, 2000).await);
    let offers = f.signaling.offers_for(&f.peer_id).await;
    assert_eq!(offers, vec!["offer-p-1-restart", "offer-p-2-restart"]);
    assert_eq!(f.signaling.answers_for(&f.peer_id).await.len(), 1);
}

#[tokio::test]
async fn test_candidates_wait_for_remote_description() {
    init_tracing();
    let f = spawn_negotiator(true, 600_000);

    f.handle
        .remote(RemoteSignal::Candidate("c1".into()))
        .await;
    f.handle
        .remote(RemoteSignal::Candidate("c2".into()))
        .await;
    let status = f.handle.wait_for(|s| s.buffered_candidates == 2).await;
    assert!(!status.has_remote_description);
    assert!(f.transport.candidates().await.is_empty());

    f.handle
        .remote(RemoteSignal::Offer("remote-offer".into()))
        .await;
    let status = f
        .handle
        .wait_for(|s| s.state.is_stable() && s.has_remote_description)
        .await;
    assert_eq!(status.buffered_candidates, 0);
    assert_eq!(f.transport.candidates().await, vec!["c1", "c2"]);

    f.handle
        .remote(RemoteSignal::Candidate("c3".into()))
        .await;
    assert!(
        f.transport
            .wait_for_calls(
                |calls| calls.contains(&TransportCall::AddCandidate("c3".into())),
                2000
            )
            .await
    );
}
