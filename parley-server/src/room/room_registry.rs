use crate::error::RegistryError;
use crate::negotiation::RemoteSignal;
use crate::room::{
    AgentDeps, MembershipFeed, RoomCommand, RoomHandle, RoomSession, RoomSnapshot,
};
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use parley_core::{PeerId, RoomId};
use std::collections::HashSet;
use std::sync::Arc;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

/// Outcome of one reconciliation pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReconcileReport {
    pub created: Vec<RoomId>,
    pub synced: usize,
    pub reaped: Vec<RoomId>,
    pub failed: usize,
}

impl ReconcileReport {
    pub fn is_quiet(&self) -> bool {
        self.created.is_empty() && self.reaped.is_empty() && self.failed == 0
    }
}

struct RegistryInner {
    rooms: DashMap<RoomId, RoomHandle>,
    deps: AgentDeps,
    feed: Arc<dyn MembershipFeed>,
}

/// Room id → running room session.
///
/// Rooms are created on first use and bound to the membership feed before they are
/// published. Membership events go straight to the room; a periodic reconcile repairs
/// whatever the events missed and tears down rooms that stayed empty past the grace
/// period.
#[derive(Clone)]
pub struct RoomRegistry {
    inner: Arc<RegistryInner>,
}

impl RoomRegistry {
    pub fn new(deps: AgentDeps, feed: Arc<dyn MembershipFeed>) -> Self {
        Self {
            inner: Arc::new(RegistryInner {
                rooms: DashMap::new(),
                deps,
                feed,
            }),
        }
    }

    pub fn len(&self) -> usize {
        self.inner.rooms.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.rooms.is_empty()
    }

    pub fn room_ids(&self) -> Vec<RoomId> {
        let mut ids: Vec<RoomId> = self.inner.rooms.iter().map(|r| r.key().clone()).collect();
        ids.sort();
        ids
    }

    pub fn get(&self, room_id: &RoomId) -> Option<RoomHandle> {
        self.inner
            .rooms
            .get(room_id)
            .map(|r| r.value().clone())
            .filter(|h| !h.is_closed())
    }

    /// Return the room's session, creating it if needed. Concurrent callers for the same
    /// id all receive the same session.
    pub async fn get_or_create(&self, room: &str) -> Result<RoomHandle, RegistryError> {
        let room_id = RoomId::parse(room)?;
        self.get_or_create_id(room_id).await
    }

    pub async fn get_or_create_id(&self, room_id: RoomId) -> Result<RoomHandle, RegistryError> {
        if let Some(handle) = self.get(&room_id) {
            return Ok(handle);
        }

        self.inner.feed.join_room(&room_id).await?;

        let handle = match self.inner.rooms.entry(room_id.clone()) {
            Entry::Occupied(entry) if !entry.get().is_closed() => entry.get().clone(),
            Entry::Occupied(mut entry) => {
                info!("Replacing stopped room {}", room_id);
                let handle = RoomSession::spawn(room_id, self.inner.deps.clone());
                entry.insert(handle.clone());
                handle
            }
            Entry::Vacant(entry) => {
                info!("Creating new room: {}", room_id);
                let handle = RoomSession::spawn(room_id, self.inner.deps.clone());
                entry.insert(handle.clone());
                handle
            }
        };
        Ok(handle)
    }

    pub async fn notify_peer_joined(
        &self,
        room: &str,
        peer_id: PeerId,
        display_name: Option<String>,
    ) -> Result<(), RegistryError> {
        let handle = self.get_or_create(room).await?;
        let cmd = RoomCommand::PeerJoined {
            peer_id,
            display_name,
            at: Instant::now(),
        };
        self.dispatch(handle, cmd).await
    }

    /// Leaving a room that does not exist is not an error.
    pub async fn notify_peer_left(&self, room: &str, peer_id: PeerId) -> Result<(), RegistryError> {
        let room_id = RoomId::parse(room)?;
        let Some(handle) = self.get(&room_id) else {
            debug!("Leave for {} from unknown room {}", peer_id, room_id);
            return Ok(());
        };
        let cmd = RoomCommand::PeerLeft {
            peer_id,
            at: Instant::now(),
        };
        self.dispatch(handle, cmd).await
    }

    pub async fn signal(
        &self,
        room: &str,
        peer_id: PeerId,
        signal: RemoteSignal,
    ) -> Result<(), RegistryError> {
        let room_id = RoomId::parse(room)?;
        let handle = self
            .get(&room_id)
            .ok_or(RegistryError::UnknownRoom(room_id))?;
        self.dispatch(handle, RoomCommand::Signal { peer_id, signal })
            .await
    }

    pub async fn inspect(&self, room: &str) -> Result<RoomSnapshot, RegistryError> {
        let room_id = RoomId::parse(room)?;
        let handle = self
            .get(&room_id)
            .ok_or_else(|| RegistryError::UnknownRoom(room_id.clone()))?;

        let (reply, rx) = oneshot::channel();
        handle
            .send(RoomCommand::Inspect { reply })
            .await
            .map_err(|_| RegistryError::RoomClosed(room_id.clone()))?;
        rx.await.map_err(|_| RegistryError::RoomClosed(room_id))
    }

    /// Send to a room, recreating it once if it stopped in the meantime.
    async fn dispatch(&self, handle: RoomHandle, cmd: RoomCommand) -> Result<(), RegistryError> {
        let cmd = match handle.send(cmd).await {
            Ok(()) => return Ok(()),
            Err(cmd) => cmd,
        };

        let room_id = handle.room_id().clone();
        warn!("Room {} stopped while in use, recreating", room_id);
        self.inner
            .rooms
            .remove_if(&room_id, |_, current| current.same_session(&handle));
        let fresh = self.get_or_create_id(room_id.clone()).await?;
        fresh
            .send(cmd)
            .await
            .map_err(|_| RegistryError::RoomClosed(room_id))
    }

    /// Diff every room against the membership snapshot, then tear down idle rooms.
    pub async fn reconcile(&self) -> Result<ReconcileReport, RegistryError> {
        let snapshot = self.inner.feed.snapshot().await?;
        let mut report = ReconcileReport::default();
        let mut seen = HashSet::new();

        for (room_id, members) in snapshot.rooms {
            if members.is_empty() {
                continue;
            }
            seen.insert(room_id.clone());

            let existed = self.get(&room_id).is_some();
            let handle = match self.get_or_create_id(room_id.clone()).await {
                Ok(handle) => handle,
                Err(e) => {
                    warn!("Reconcile could not open room {}: {}", room_id, e);
                    report.failed += 1;
                    continue;
                }
            };
            if !existed {
                report.created.push(room_id.clone());
            }

            let cmd = RoomCommand::Sync {
                members,
                taken_at: snapshot.taken_at,
            };
            match self.dispatch(handle, cmd).await {
                Ok(()) => report.synced += 1,
                Err(e) => {
                    warn!("Reconcile could not sync room {}: {}", room_id, e);
                    report.failed += 1;
                }
            }
        }

        let absent: Vec<RoomHandle> = self
            .inner
            .rooms
            .iter()
            .filter(|r| !seen.contains(r.key()))
            .map(|r| r.value().clone())
            .collect();
        for handle in absent {
            let cmd = RoomCommand::Sync {
                members: Vec::new(),
                taken_at: snapshot.taken_at,
            };
            if handle.send(cmd).await.is_ok() {
                report.synced += 1;
            }
        }

        report.reaped = self.reap_idle(Instant::now()).await;
        Ok(report)
    }

    /// Shut down and remove every room that is closed or has been empty past the grace
    /// period. The published status only nominates candidates; each room confirms from
    /// its own peer set, so a join already queued keeps it alive.
    pub async fn reap_idle(&self, now: Instant) -> Vec<RoomId> {
        let grace = self.inner.deps.config.registry.empty_room_grace();
        let candidates: Vec<RoomHandle> = self
            .inner
            .rooms
            .iter()
            .filter(|r| r.value().is_idle(now, grace))
            .map(|r| r.value().clone())
            .collect();

        let mut reaped = Vec::new();
        for handle in candidates {
            let (reply, rx) = oneshot::channel();
            let late = match handle
                .send(RoomCommand::ShutdownIfIdle { now, grace, reply })
                .await
            {
                Ok(()) => match rx.await {
                    Ok(Some(late)) => late,
                    Ok(None) => continue,
                    // The room stopped on its own while we asked.
                    Err(_) => Vec::new(),
                },
                Err(_) => Vec::new(),
            };

            let room_id = handle.room_id().clone();
            self.inner
                .rooms
                .remove_if(&room_id, |_, current| current.same_session(&handle));
            info!("Tore down idle room {}", room_id);
            reaped.push(room_id.clone());

            if late.iter().any(RoomCommand::keeps_room_alive) {
                self.replay(room_id, late).await;
            }
        }
        reaped
    }

    /// Hand commands that reached a room after it agreed to stop to a fresh session.
    async fn replay(&self, room_id: RoomId, commands: Vec<RoomCommand>) {
        debug!("Replaying {} late commands for room {}", commands.len(), room_id);
        let handle = match self.get_or_create_id(room_id.clone()).await {
            Ok(handle) => handle,
            Err(e) => {
                warn!("Could not reopen room {}: {}", room_id, e);
                return;
            }
        };
        for cmd in commands {
            if let Err(e) = self.dispatch(handle.clone(), cmd).await {
                warn!("Late command for room {} lost: {}", room_id, e);
            }
        }
    }

    /// Run `reconcile` on the configured interval until the task is aborted.
    pub fn spawn_reconciler(&self) -> JoinHandle<()> {
        let registry = self.clone();
        let period = self.inner.deps.config.registry.reconcile_interval();

        tokio::spawn(async move {
            let mut interval = tokio::time::interval(period);
            interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
            interval.tick().await;

            loop {
                interval.tick().await;
                match registry.reconcile().await {
                    Ok(report) if report.is_quiet() => {}
                    Ok(report) => info!("Reconciled rooms: {:?}", report),
                    Err(e) => warn!("Reconcile skipped: {}", e),
                }
            }
        })
    }

    /// Shut down every room and wait for each to finish tearing down.
    pub async fn shutdown(&self) {
        let rooms: Vec<RoomId> = self.room_ids();
        for room_id in rooms {
            if let Some((_, handle)) = self.inner.rooms.remove(&room_id) {
                if handle.send(RoomCommand::Shutdown).await.is_ok() {
                    handle.wait_for(|s| s.closed).await;
                }
            }
        }
        info!("All rooms shut down");
    }
}
