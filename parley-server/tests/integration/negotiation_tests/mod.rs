mod test_collisions;
mod test_ice_restart;
mod test_offer_lifecycle;

use std::sync::Arc;

use parley_core::PeerId;
use parley_server::{NegotiationConfig, Negotiator, NegotiatorHandle};

use crate::utils::{MockSignalingOutput, MockTransport};

pub struct NegotiatorFixture {
    pub peer_id: PeerId,
    pub handle: NegotiatorHandle,
    pub transport: Arc<MockTransport>,
    pub signaling: MockSignalingOutput,
}

pub fn spawn_negotiator(polite: bool, renegotiate_delay_ms: u64) -> NegotiatorFixture {
    let peer_id = PeerId::from("p");
    let transport = Arc::new(MockTransport::new(peer_id.clone()));
    let signaling = MockSignalingOutput::new_stored_only();
    let handle = Negotiator::spawn(
        peer_id.clone(),
        polite,
        transport.clone(),
        Arc::new(signaling.clone()),
        NegotiationConfig {
            renegotiate_delay_ms,
        },
    );

    NegotiatorFixture {
        peer_id,
        handle,
        transport,
        signaling,
    }
}
