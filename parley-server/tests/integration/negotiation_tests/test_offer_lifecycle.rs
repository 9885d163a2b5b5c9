use std::time::Duration;

use bytes::Bytes;
use parley_server::RemoteSignal;

use super::spawn_negotiator;
use crate::integration::init_tracing;
use crate::utils::TransportCall;

#[tokio::test(start_paused = true)]
async fn test_follow_up_renegotiation_happens_once() {
    init_tracing();
    let f = spawn_negotiator(true, 1000);

    f.handle
        .remote(RemoteSignal::Offer("remote-offer".into()))
        .await;
    let status = f.handle.wait_for(|s| s.has_remote_description).await;
    assert!(!status.renegotiated);
    assert!(f.signaling.offers_for(&f.peer_id).await.is_empty());

    let status = f.handle.wait_for(|s| s.renegotiated).await;
    assert!(status.renegotiated);
    assert!(f.signaling.wait_for_offers(&f.peer_id, 1, 5000).await);
    assert_eq!(f.signaling.offers_for(&f.peer_id).await, vec!["offer-p-1"]);

    f.handle
        .remote(RemoteSignal::Answer("remote-answer".into()))
        .await;
    f.handle.wait_for(|s| s.state.is_stable()).await;

    tokio::time::sleep(Duration::from_secs(10)).await;
    assert_eq!(f.signaling.offers_for(&f.peer_id).await.len(), 1);
}

#[tokio::test]
async fn test_failed_offer_returns_to_stable() {
    init_tracing();
    let f = spawn_negotiator(true, 600_000);
    f.transport.fail_create_offer(true);

    f.handle.renegotiate().await;
    assert!(
        f.transport
            .wait_for_calls(
                |calls| calls.contains(&TransportCall::CreateOffer { ice_restart: false }),
                2000
            )
            .await
    );
    f.handle.wait_for(|s| s.state.is_stable()).await;
    assert!(f.signaling.offers_for(&f.peer_id).await.is_empty());

    f.transport.fail_create_offer(false);
    f.handle.renegotiate().await;
    assert!(f.signaling.wait_for_offers(&f.peer_id, 1, 2000).await);
    assert_eq!(f.signaling.offers_for(&f.peer_id).await, vec!["offer-p-1"]);
}

#[tokio::test]
async fn test_reply_is_sent_preamble_first() {
    init_tracing();
    let f = spawn_negotiator(true, 600_000);

    f.handle
        .deliver(
            r#"{"type":"AudioInfo"}"#.into(),
            vec![Bytes::from_static(b"ab"), Bytes::from_static(b"cd")],
        )
        .await;

    assert!(
        f.transport
            .wait_for_calls(|calls| calls.len() >= 3, 2000)
            .await
    );
    assert_eq!(
        f.transport.sent().await,
        vec![
            TransportCall::SendText(r#"{"type":"AudioInfo"}"#.into()),
            TransportCall::SendBinary(Bytes::from_static(b"ab")),
            TransportCall::SendBinary(Bytes::from_static(b"cd")),
        ]
    );
}

#[tokio::test]
async fn test_close_stops_negotiator_and_transport() {
    init_tracing();
    let f = spawn_negotiator(true, 600_000);
    assert!(f.handle.is_alive());

    f.handle.close().await;
    assert!(!f.handle.is_alive());
    assert!(
        f.transport
            .wait_for_calls(|calls| calls.contains(&TransportCall::Close), 2000)
            .await
    );
    assert!(f.transport.is_closed());

    // Inputs after close go nowhere.
    f.handle.renegotiate().await;
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(f.signaling.offers_for(&f.peer_id).await.is_empty());
}
