use crate::negotiation::RemoteSignal;
use crate::room::RoomRegistry;
use crate::signaling::{SignalingService, candidate_to_init_json};
use axum::extract::ws::{Message, WebSocket};
use axum::extract::{Path, State, WebSocketUpgrade};
use axum::response::IntoResponse;
use futures::{SinkExt, StreamExt};
use parley_core::{PeerId, RoomId, SignalMessage};
use serde_json::json;
use tokio::sync::mpsc;
use tracing::{info, warn};

/// Shared state of the signaling endpoint.
#[derive(Clone)]
pub struct AppState {
    pub signaling: SignalingService,
    pub registry: RoomRegistry,
}

pub async fn ws_handler(
    ws: WebSocketUpgrade,
    Path(peer_id): Path<String>,
    State(state): State<AppState>,
) -> impl IntoResponse {
    let peer_id = PeerId::from(peer_id);

    ws.on_upgrade(move |socket| handle_socket(socket, peer_id, state))
}

async fn handle_socket(socket: WebSocket, peer_id: PeerId, state: AppState) {
    info!("New WebSocket connection: {}", peer_id);

    let (mut sender, mut receiver) = socket.split();
    let (tx, mut rx) = mpsc::unbounded_channel();

    let connection = state.signaling.add_peer(peer_id.clone(), tx);
    state.signaling.send_signal(
        peer_id.clone(),
        SignalMessage::Welcome {
            peer_id: peer_id.clone(),
        },
    );
    state.signaling.send_signal(
        peer_id.clone(),
        SignalMessage::IceConfig {
            ice_servers: state.signaling.get_ice_servers(),
        },
    );

    let mut send_task = tokio::spawn(async move {
        while let Some(msg) = rx.recv().await {
            if sender.send(msg).await.is_err() {
                break;
            }
        }
    });

    let mut recv_task = tokio::spawn({
        let state = state.clone();
        let peer_id = peer_id.clone();

        async move {
            while let Some(Ok(msg)) = receiver.next().await {
                match msg {
                    Message::Text(text) => match serde_json::from_str::<SignalMessage>(&text) {
                        Ok(signal) => handle_signal(&state, &peer_id, signal).await,
                        Err(e) => warn!("Invalid SignalMessage from {}: {:?}", peer_id, e),
                    },
                    Message::Close(_) => break,
                    _ => {}
                }
            }
        }
    });

    tokio::select! {
        _ = (&mut send_task) => recv_task.abort(),
        _ = (&mut recv_task) => send_task.abort(),
    };

    // A newer socket for the same peer owns the link and the room membership.
    if let Some(room) = state.signaling.remove_peer(&peer_id, connection) {
        if let Err(e) = state
            .registry
            .notify_peer_left(room.as_str(), peer_id.clone())
            .await
        {
            warn!("Failed to remove {} from {}: {}", peer_id, room, e);
        }
    }
    info!("WebSocket disconnected: {}", peer_id);
}

/// Apply one inbound signaling message from `peer_id`.
pub async fn handle_signal(state: &AppState, peer_id: &PeerId, signal: SignalMessage) {
    match signal {
        SignalMessage::Join { room, name, .. } => join_room(state, peer_id, &room, name).await,

        SignalMessage::Leave => {
            if let Some(room) = state.signaling.leave(peer_id) {
                if let Err(e) = state
                    .registry
                    .notify_peer_left(room.as_str(), peer_id.clone())
                    .await
                {
                    warn!("Failed to remove {} from {}: {}", peer_id, room, e);
                }
            }
        }

        SignalMessage::Offer { sdp } => {
            forward(state, peer_id, RemoteSignal::Offer(sdp)).await;
        }

        SignalMessage::Answer { sdp } => {
            forward(state, peer_id, RemoteSignal::Answer(sdp)).await;
        }

        SignalMessage::IceCandidate {
            candidate,
            sdp_mid,
            sdp_m_line_index,
        } => {
            let candidate = candidate_to_init_json(candidate, sdp_mid, sdp_m_line_index);
            forward(state, peer_id, RemoteSignal::Candidate(candidate)).await;
        }

        SignalMessage::Debug { command } => {
            let reply = debug_command(state, peer_id, &command).await;
            state.signaling.send_signal(peer_id.clone(), reply);
        }

        other => warn!("Unexpected message from {}: {:?}", peer_id, other),
    }
}

async fn join_room(state: &AppState, peer_id: &PeerId, room: &str, name: Option<String>) {
    let room_id = match RoomId::parse(room) {
        Ok(room_id) => room_id,
        Err(e) => return reply_error(state, peer_id, e.to_string()),
    };

    let previous = state
        .signaling
        .join(peer_id, room_id.clone(), name.clone());
    if let Some(previous) = previous.filter(|p| *p != room_id) {
        if let Err(e) = state
            .registry
            .notify_peer_left(previous.as_str(), peer_id.clone())
            .await
        {
            warn!("Failed to remove {} from {}: {}", peer_id, previous, e);
        }
    }

    info!("Peer {} joins room {}", peer_id, room_id);
    if let Err(e) = state
        .registry
        .notify_peer_joined(room_id.as_str(), peer_id.clone(), name)
        .await
    {
        state.signaling.leave(peer_id);
        reply_error(state, peer_id, e.to_string());
    }
}

async fn forward(state: &AppState, peer_id: &PeerId, signal: RemoteSignal) {
    let Some(room) = state.signaling.room_of(peer_id) else {
        return reply_error(state, peer_id, "join a room before negotiating".to_owned());
    };
    if let Err(e) = state
        .registry
        .signal(room.as_str(), peer_id.clone(), signal)
        .await
    {
        reply_error(state, peer_id, e.to_string());
    }
}

/// `rooms` lists every room; `room [id]` dumps one room, defaulting to the caller's.
pub async fn debug_command(state: &AppState, peer_id: &PeerId, command: &str) -> SignalMessage {
    let mut words = command.split_whitespace();
    match (words.next(), words.next()) {
        (Some("rooms"), _) => {
            let rooms: Vec<_> = state
                .registry
                .room_ids()
                .into_iter()
                .filter_map(|id| state.registry.get(&id))
                .map(|handle| {
                    json!({
                        "roomId": handle.room_id(),
                        "peers": handle.status().peer_count,
                    })
                })
                .collect();
            SignalMessage::DebugResult {
                payload: json!({ "rooms": rooms }),
            }
        }
        (Some("room"), explicit) => {
            let room = match explicit {
                Some(room) => room.to_owned(),
                None => match state.signaling.room_of(peer_id) {
                    Some(room) => room.to_string(),
                    None => {
                        return SignalMessage::Error {
                            message: "not in a room".to_owned(),
                        };
                    }
                },
            };
            match state.registry.inspect(&room).await {
                Ok(snapshot) => SignalMessage::DebugResult {
                    payload: serde_json::to_value(snapshot).unwrap_or_default(),
                },
                Err(e) => SignalMessage::Error {
                    message: e.to_string(),
                },
            }
        }
        _ => SignalMessage::Error {
            message: format!("unknown debug command {:?}", command),
        },
    }
}

fn reply_error(state: &AppState, peer_id: &PeerId, message: String) {
    warn!("Signaling error for {}: {}", peer_id, message);
    state
        .signaling
        .send_signal(peer_id.clone(), SignalMessage::Error { message });
}
