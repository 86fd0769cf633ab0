//! Accept loop and the dispatcher task owning all lobby state.
//!
//! Per-connection reader tasks turn sockets into a single event stream; the
//! dispatcher processes events one at a time, so the session table and the
//! port allocator need no locks. Only the game registry is shared (with the
//! match runtimes) and carries its own mutex.

use std::future::Future;
use std::io;
use std::net::SocketAddr;

use log::{debug, error, info, warn};
use shared::logging::log_comm;
use shared::{read_frame, write_frame};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;

use crate::db::{DbClient, DbError};
use crate::match_runtime::MatchOutcome;
use crate::registry::{GameRegistry, PortAllocator};
use crate::session::{ClientId, Session, SessionMap};

pub(crate) const MODULE: &str = "lobby";

pub enum LobbyEvent {
    Connected {
        id: ClientId,
        peer: SocketAddr,
        sender: mpsc::UnboundedSender<String>,
    },
    Frame {
        id: ClientId,
        body: String,
    },
    Disconnected {
        id: ClientId,
    },
    MatchFinished(MatchOutcome),
}

/// All lobby state, owned by the dispatcher task.
pub struct Lobby {
    pub(crate) sessions: SessionMap,
    pub(crate) db: DbClient,
    pub(crate) registry: GameRegistry,
    pub(crate) ports: PortAllocator,
    pub(crate) events: mpsc::UnboundedSender<LobbyEvent>,
}

impl Lobby {
    fn new(db: DbClient, events: mpsc::UnboundedSender<LobbyEvent>) -> Self {
        Self {
            sessions: SessionMap::new(),
            db,
            registry: GameRegistry::new(),
            ports: PortAllocator::new(),
            events,
        }
    }

    pub(crate) fn send_to(&self, id: ClientId, frame: &str) {
        if let Some(session) = self.sessions.get(id) {
            log_comm(MODULE, "TX", &format!("client={}", id), frame);
            session.send(frame);
        }
    }

    async fn handle_event(&mut self, event: LobbyEvent) -> Result<(), DbError> {
        match event {
            LobbyEvent::Connected { id, peer, sender } => {
                info!("client {} connected from {}", id, peer);
                self.sessions.insert(id, Session::new(sender));
                self.send_to(id, "WELCOME LOBBY");
                Ok(())
            }
            LobbyEvent::Frame { id, body } => {
                log_comm(MODULE, "RX", &format!("client={}", id), &body);
                self.handle_command(id, &body).await
            }
            LobbyEvent::Disconnected { id } => {
                self.reconcile_disconnect(id).await;
                Ok(())
            }
            LobbyEvent::MatchFinished(outcome) => self.finish_match(outcome).await,
        }
    }

    /// A client socket died. The durable side is reconciled best-effort:
    /// failures are logged, not retried, because the snapshot loader
    /// re-establishes the invariants on the next state-service boot.
    async fn reconcile_disconnect(&mut self, id: ClientId) {
        let Some(session) = self.sessions.remove(id) else {
            return;
        };
        if session.username.is_empty() {
            info!("client {} disconnected", id);
        } else {
            info!("client {} ({}) disconnected", id, session.username);
        }
        if !session.authed {
            return;
        }

        let user = session.username;
        if let Err(err) = self
            .db
            .request(format!("User setOnline username={} online=0", user))
            .await
        {
            warn!("cannot clear online flag for {}: {}", user, err);
        }
        if session.room_id != 0 {
            if let Err(err) = self
                .db
                .request(format!("Room leave roomId={} user={}", session.room_id, user))
                .await
            {
                warn!("cannot leave room {} for {}: {}", session.room_id, user, err);
            }
        }
        if session.spectate_room_id != 0 {
            if let Err(err) = self
                .db
                .request(format!(
                    "Room unspectate roomId={} user={}",
                    session.spectate_room_id, user
                ))
                .await
            {
                warn!(
                    "cannot unspectate room {} for {}: {}",
                    session.spectate_room_id, user, err
                );
            }
        }
    }

    /// Durable side of a finished match. The runtime has already removed
    /// its registry entry and closed its sockets.
    async fn finish_match(&mut self, outcome: MatchOutcome) -> Result<(), DbError> {
        info!(
            "match in room {} finished: {}={} {}={}",
            outcome.room_id, outcome.user1, outcome.score1, outcome.user2, outcome.score2
        );
        self.db
            .request(format!(
                "GameLog create roomId={} user1={} user2={} score1={} score2={}",
                outcome.room_id, outcome.user1, outcome.user2, outcome.score1, outcome.score2
            ))
            .await?;
        self.db
            .request(format!("Room setStatus roomId={} status=idle", outcome.room_id))
            .await?;
        Ok(())
    }
}

/// Runs the lobby until `shutdown` resolves or the state-service link dies.
pub async fn run<F>(listener: TcpListener, db: DbClient, shutdown: F)
where
    F: Future<Output = ()>,
{
    let (event_tx, mut event_rx) = mpsc::unbounded_channel();
    let db_watch = db.clone();
    let mut lobby = Lobby::new(db, event_tx.clone());
    let mut next_id: ClientId = 1;
    tokio::pin!(shutdown);

    loop {
        tokio::select! {
            accepted = listener.accept() => {
                match accepted {
                    Ok((stream, peer)) => {
                        let id = next_id;
                        next_id += 1;
                        spawn_client(id, peer, stream, event_tx.clone());
                    }
                    Err(err) => warn!("accept failed: {}", err),
                }
            }
            Some(event) = event_rx.recv() => {
                if let Err(err) = lobby.handle_event(event).await {
                    error!("state service link lost ({}), shutting down", err);
                    break;
                }
            }
            // The state service going away is fatal even while idle.
            _ = db_watch.closed() => {
                error!("state service connection lost, shutting down");
                break;
            }
            _ = &mut shutdown => {
                info!("shutdown requested");
                break;
            }
        }
    }
}

/// Reader and writer tasks for one client socket.
fn spawn_client(
    id: ClientId,
    peer: SocketAddr,
    stream: TcpStream,
    events: mpsc::UnboundedSender<LobbyEvent>,
) {
    let (mut read_half, mut write_half) = stream.into_split();
    let (sender, mut outbox) = mpsc::unbounded_channel::<String>();

    tokio::spawn(async move {
        while let Some(frame) = outbox.recv().await {
            if let Err(err) = write_frame(&mut write_half, &frame).await {
                debug!("write to client {} failed: {}", id, err);
                break;
            }
        }
    });

    tokio::spawn(async move {
        if events.send(LobbyEvent::Connected { id, peer, sender }).is_err() {
            return;
        }
        loop {
            match read_frame(&mut read_half).await {
                Ok(body) => {
                    if events.send(LobbyEvent::Frame { id, body }).is_err() {
                        return;
                    }
                }
                Err(err) => {
                    if err.kind() != io::ErrorKind::UnexpectedEof {
                        debug!("client {} read error: {}", id, err);
                    }
                    let _ = events.send(LobbyEvent::Disconnected { id });
                    return;
                }
            }
        }
    });
}
