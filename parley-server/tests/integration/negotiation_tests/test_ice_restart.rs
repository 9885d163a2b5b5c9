use std::time::Duration;

use parley_server::RemoteSignal;

use super::spawn_negotiator;
use crate::integration::init_tracing;
use crate::utils::TransportCall;

#[tokio::test]
async fn test_ice_failure_triggers_restart_offer() {
    init_tracing();
    let f = spawn_negotiator(true, 600_000);

    f.handle.ice_failed().await;
    assert!(f.signaling.wait_for_offers(&f.peer_id, 1, 2000).await);

    assert_eq!(
        f.signaling.offers_for(&f.peer_id).await,
        vec!["offer-p-1-restart"]
    );
    let status = f.handle.wait_for(|s| s.awaiting_answer).await;
    assert_eq!(status.ice_restarts, 1);
    assert!(status.state.is_stable());
    assert!(
        f.transport
            .calls()
            .await
            .contains(&TransportCall::CreateOffer { ice_restart: true })
    );
}

#[tokio::test]
async fn test_lost_answer_does_not_block_ice_restart() {
    init_tracing();
    let f = spawn_negotiator(true, 600_000);

    f.handle.renegotiate().await;
    assert!(f.signaling.wait_for_offers(&f.peer_id, 1, 2000).await);
    f.handle.wait_for(|s| s.awaiting_answer).await;

    // The answer to offer-p-1 never arrives.
    f.handle.ice_failed().await;
    assert!(f.signaling.wait_for_offers(&f.peer_id, 2, 2000).await);
    assert_eq!(
        f.signaling.offers_for(&f.peer_id).await,
        vec!["offer-p-1", "offer-p-2-restart"]
    );

    f.handle
        .remote(RemoteSignal::Answer("restart-answer".into()))
        .await;
    let status = f
        .handle
        .wait_for(|s| !s.awaiting_answer && s.has_remote_description)
        .await;
    assert!(status.state.is_stable());
    assert_eq!(status.ice_restarts, 1);
}

#[tokio::test]
async fn test_renegotiation_waits_for_outstanding_answer() {
    init_tracing();
    let f = spawn_negotiator(true, 600_000);

    f.handle.renegotiate().await;
    assert!(f.signaling.wait_for_offers(&f.peer_id, 1, 2000).await);
    f.handle.wait_for(|s| s.awaiting_answer).await;

    f.handle.renegotiate().await;
    f.handle.renegotiate().await;
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(f.signaling.offers_for(&f.peer_id).await.len(), 1);

    f.handle
        .remote(RemoteSignal::Answer("remote-answer".into()))
        .await;
    assert!(f.signaling.wait_for_offers(&f.peer_id, 2, 2000).await);
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(
        f.signaling.offers_for(&f.peer_id).await,
        vec!["offer-p-1", "offer-p-2"]
    );
}

#[tokio::test]
async fn test_deferred_renegotiation_runs_after_restart_is_answered() {
    init_tracing();
    let f = spawn_negotiator(true, 600_000);

    f.handle.renegotiate().await;
    assert!(f.signaling.wait_for_offers(&f.peer_id, 1, 2000).await);
    f.handle.wait_for(|s| s.awaiting_answer).await;

    f.handle.renegotiate().await;
    f.handle.ice_failed().await;
    assert!(f.signaling.wait_for_offers(&f.peer_id, 2, 2000).await);

    f.handle
        .remote(RemoteSignal::Answer("restart-answer".into()))
        .await;
    assert!(f.signaling.wait_for_offers(&f.peer_id, 3, 2000).await);
    assert_eq!(
        f.signaling.offers_for(&f.peer_id).await,
        vec!["offer-p-1", "offer-p-2-restart", "offer-p-3"]
    );
}
