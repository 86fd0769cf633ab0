//! One running match.
//!
//! The runtime is dedicated to a single room: it admits exactly two players
//! and any number of spectators by (username, token, role), ticks both
//! games on a fixed period, fans snapshots out to everyone and reports the
//! result when either game ends.
//!
//! Disconnect asymmetry, preserved deliberately: a seat lost before the
//! match starts becomes free again so the player can reconnect; a seat lost
//! after the start forfeits (that game is flagged over).

use std::collections::HashMap;
use std::io;
use std::net::SocketAddr;

use log::{debug, info, warn};
use shared::logging::log_comm;
use shared::wire::parse_kv_args;
use shared::{read_frame, write_frame, BAG_SIZE, GRAVITY_MS};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, oneshot};
use tokio::time::{interval, Duration, MissedTickBehavior};

use crate::db;
use crate::game::{Action, TetrisGame};
use crate::registry::GameRegistry;

const MODULE: &str = "match";

/// Everything a runtime needs to know at construction.
#[derive(Debug, Clone)]
pub struct MatchConfig {
    pub room_id: i32,
    pub p1: String,
    pub p2: String,
    pub token: String,
    pub seed: u64,
}

/// Final result, reported exactly once per match.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MatchOutcome {
    pub room_id: i32,
    pub user1: String,
    pub score1: i32,
    pub user2: String,
    pub score2: i32,
}

/// Where the outcome goes. The lobby variant keeps the runtime ignorant of
/// the durable storage; the direct variant exists for a runtime started
/// without a lobby and talks to the state service itself.
pub enum MatchReporter {
    Lobby(oneshot::Sender<MatchOutcome>),
    Direct(SocketAddr),
}

type ConnId = u64;

enum ConnEvent {
    Frame { conn: ConnId, body: String },
    Closed { conn: ConnId },
}

struct Seat {
    name: String,
    conn: Option<ConnId>,
    /// Stays true after a post-start disconnect so the seat cannot be
    /// re-taken mid-match.
    authed: bool,
    game: Option<TetrisGame>,
}

impl Seat {
    fn new(name: String) -> Self {
        Self {
            name,
            conn: None,
            authed: false,
            game: None,
        }
    }

    fn score(&self) -> i32 {
        self.game.as_ref().map_or(0, |g| g.score)
    }

    fn over(&self) -> bool {
        self.game.as_ref().map_or(true, |g| g.game_over)
    }
}

struct MatchState {
    config: MatchConfig,
    seats: [Seat; 2],
    spectators: HashMap<ConnId, String>,
    writers: HashMap<ConnId, mpsc::UnboundedSender<String>>,
    started: bool,
}

/// Runs the match to completion: admission, tick loop, result reporting,
/// registry release.
pub async fn run_match(
    listener: TcpListener,
    config: MatchConfig,
    registry: Option<GameRegistry>,
    reporter: MatchReporter,
) {
    let room_id = config.room_id;
    let mut state = MatchState {
        seats: [Seat::new(config.p1.clone()), Seat::new(config.p2.clone())],
        spectators: HashMap::new(),
        writers: HashMap::new(),
        started: false,
        config,
    };

    let (event_tx, mut event_rx) = mpsc::unbounded_channel::<ConnEvent>();
    let mut next_conn: ConnId = 1;
    let mut tick = interval(Duration::from_millis(GRAVITY_MS));
    tick.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            accepted = listener.accept() => {
                match accepted {
                    Ok((stream, peer)) => {
                        let conn = next_conn;
                        next_conn += 1;
                        debug!("[{}] room {}: connection {} from {}", MODULE, room_id, conn, peer);
                        let sender = spawn_connection(conn, stream, event_tx.clone());
                        state.writers.insert(conn, sender);
                    }
                    Err(err) => warn!("[{}] room {}: accept failed: {}", MODULE, room_id, err),
                }
            }
            Some(event) = event_rx.recv() => {
                match event {
                    ConnEvent::Frame { conn, body } => state.handle_frame(conn, &body),
                    ConnEvent::Closed { conn } => state.handle_closed(conn),
                }
            }
            _ = tick.tick(), if state.started => {
                state.advance_and_broadcast();
            }
        }

        if !state.started && state.seats.iter().all(|s| s.authed) {
            state.start();
            tick.reset();
        }

        if state.started && (state.seats[0].over() || state.seats[1].over()) {
            let p1_score = state.seats[0].score();
            let p2_score = state.seats[1].score();
            state.broadcast(&format!("GAME_OVER p1_score={} p2_score={}", p1_score, p2_score));
            break;
        }
    }

    let outcome = MatchOutcome {
        room_id,
        user1: state.seats[0].name.clone(),
        score1: state.seats[0].score(),
        user2: state.seats[1].name.clone(),
        score2: state.seats[1].score(),
    };
    info!(
        "[{}] room {} finished: {}={} {}={}",
        MODULE, room_id, outcome.user1, outcome.score1, outcome.user2, outcome.score2
    );

    match reporter {
        MatchReporter::Lobby(done) => {
            let _ = done.send(outcome);
        }
        MatchReporter::Direct(addr) => report_direct(addr, &outcome).await,
    }

    if let Some(registry) = registry {
        registry.remove(room_id);
    }
}

/// Durable writes for a runtime with no lobby above it.
async fn report_direct(addr: SocketAddr, outcome: &MatchOutcome) {
    let log_cmd = format!(
        "GameLog create roomId={} user1={} user2={} score1={} score2={}",
        outcome.room_id, outcome.user1, outcome.user2, outcome.score1, outcome.score2
    );
    if let Err(err) = db::oneshot_request(addr, &log_cmd).await {
        warn!("[{}] room {}: cannot write game log: {}", MODULE, outcome.room_id, err);
    }
    let status_cmd = format!("Room setStatus roomId={} status=idle", outcome.room_id);
    if let Err(err) = db::oneshot_request(addr, &status_cmd).await {
        warn!("[{}] room {}: cannot reset room status: {}", MODULE, outcome.room_id, err);
    }
}

/// Splits the socket into a reader task feeding `events` and a writer task
/// draining the returned sender. Dropping the sender closes the write half
/// after any queued frames are flushed.
fn spawn_connection(
    conn: ConnId,
    stream: TcpStream,
    events: mpsc::UnboundedSender<ConnEvent>,
) -> mpsc::UnboundedSender<String> {
    let (mut read_half, mut write_half) = stream.into_split();
    let (sender, mut outbox) = mpsc::unbounded_channel::<String>();

    tokio::spawn(async move {
        while let Some(frame) = outbox.recv().await {
            if write_frame(&mut write_half, &frame).await.is_err() {
                break;
            }
        }
    });

    tokio::spawn(async move {
        loop {
            match read_frame(&mut read_half).await {
                Ok(body) => {
                    log_comm(MODULE, "RX", &format!("conn={}", conn), &body);
                    if events.send(ConnEvent::Frame { conn, body }).is_err() {
                        break;
                    }
                }
                Err(err) => {
                    if err.kind() != io::ErrorKind::UnexpectedEof {
                        debug!("[{}] conn {} read error: {}", MODULE, conn, err);
                    }
                    let _ = events.send(ConnEvent::Closed { conn });
                    break;
                }
            }
        }
    });

    sender
}

impl MatchState {
    fn handle_frame(&mut self, conn: ConnId, body: &str) {
        let mut words = body.split_whitespace();
        match words.next() {
            Some("HELLO") => self.handle_hello(conn, body),
            Some("INPUT") => {
                if !self.started {
                    return;
                }
                let action = words.next().and_then(Action::parse);
                if let Some(action) = action {
                    if let Some(seat) = self.seats.iter_mut().find(|s| s.conn == Some(conn)) {
                        if let Some(game) = seat.game.as_mut() {
                            game.apply(action);
                        }
                    }
                }
            }
            _ => debug!("[{}] conn {}: ignoring {}", MODULE, conn, body),
        }
    }

    fn handle_hello(&mut self, conn: ConnId, body: &str) {
        // Re-HELLO from an admitted connection is ignored.
        if self.spectators.contains_key(&conn) || self.seats.iter().any(|s| s.conn == Some(conn)) {
            return;
        }

        let args = parse_kv_args(body);
        let username = args.get("username").cloned().unwrap_or_default();
        let token = args.get("token").map(String::as_str).unwrap_or("");
        let wants_spec = args.get("role").map(String::as_str) == Some("SPEC");

        if token != self.config.token {
            self.send_to(conn, "ERR invalid_player_or_token");
            info!("[{}] room {}: rejected {} (bad token)", MODULE, self.config.room_id, display_name(&username));
            self.writers.remove(&conn);
            return;
        }

        let seat_idx = (!wants_spec)
            .then(|| {
                self.seats
                    .iter()
                    .position(|s| !s.authed && s.name == username)
            })
            .flatten();

        match seat_idx {
            Some(idx) => {
                self.seats[idx].conn = Some(conn);
                self.seats[idx].authed = true;
                let role = if idx == 0 { "P1" } else { "P2" };
                self.send_to(conn, &welcome(role, self.config.seed));
                info!("[{}] room {}: {} seated as {}", MODULE, self.config.room_id, username, role);
            }
            None => {
                self.spectators.insert(conn, username.clone());
                self.send_to(conn, &welcome("SPEC", self.config.seed));
                info!("[{}] room {}: {} admitted as spectator", MODULE, self.config.room_id, display_name(&username));
            }
        }
    }

    fn handle_closed(&mut self, conn: ConnId) {
        self.writers.remove(&conn);

        if let Some(seat) = self.seats.iter_mut().find(|s| s.conn == Some(conn)) {
            seat.conn = None;
            if self.started {
                // Forfeit by disconnect.
                if let Some(game) = seat.game.as_mut() {
                    game.game_over = true;
                }
                info!("[{}] room {}: {} disconnected mid-match, forfeits", MODULE, self.config.room_id, seat.name);
            } else {
                seat.authed = false;
                info!("[{}] room {}: {} left before start, seat freed", MODULE, self.config.room_id, seat.name);
            }
            return;
        }

        if let Some(name) = self.spectators.remove(&conn) {
            debug!("[{}] room {}: spectator {} left", MODULE, self.config.room_id, display_name(&name));
        }
    }

    fn start(&mut self) {
        for seat in &mut self.seats {
            seat.game = Some(TetrisGame::new(self.config.seed));
        }
        self.started = true;
        info!(
            "[{}] room {} started: {} vs {} (seed {})",
            MODULE, self.config.room_id, self.seats[0].name, self.seats[1].name, self.config.seed
        );
    }

    fn advance_and_broadcast(&mut self) {
        for seat in &mut self.seats {
            if let Some(game) = seat.game.as_mut() {
                game.tick();
            }
        }
        for idx in 0..self.seats.len() {
            let seat = &self.seats[idx];
            if let Some(game) = seat.game.as_ref() {
                let frame = format!(
                    "SNAPSHOT user={} score={} lines={} gameover={} board={}",
                    seat.name,
                    game.score,
                    game.lines_cleared,
                    if game.game_over { 1 } else { 0 },
                    game.snapshot()
                );
                self.broadcast(&frame);
            }
        }
    }

    /// Sends to both players and every spectator; pending connections that
    /// have not completed HELLO get nothing.
    fn broadcast(&self, frame: &str) {
        for seat in &self.seats {
            if let Some(conn) = seat.conn {
                self.send_to(conn, frame);
            }
        }
        for conn in self.spectators.keys() {
            self.send_to(*conn, frame);
        }
    }

    fn send_to(&self, conn: ConnId, frame: &str) {
        if let Some(sender) = self.writers.get(&conn) {
            log_comm(MODULE, "TX", &format!("conn={}", conn), frame);
            let _ = sender.send(frame.to_string());
        }
    }
}

fn welcome(role: &str, seed: u64) -> String {
    format!("WELCOME role={} seed={} gravity={} bag={}", role, seed, GRAVITY_MS, BAG_SIZE)
}

fn display_name(name: &str) -> &str {
    if name.is_empty() {
        "unknown"
    } else {
        name
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn start_runtime(config: MatchConfig) -> (SocketAddr, oneshot::Receiver<MatchOutcome>, GameRegistry) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let registry = GameRegistry::new();
        registry.insert(
            config.room_id,
            crate::registry::GameEntry { port: addr.port(), token: config.token.clone() },
        );
        let (done_tx, done_rx) = oneshot::channel();
        tokio::spawn(run_match(
            listener,
            config,
            Some(registry.clone()),
            MatchReporter::Lobby(done_tx),
        ));
        (addr, done_rx, registry)
    }

    fn config() -> MatchConfig {
        MatchConfig {
            room_id: 1,
            p1: "alice".to_string(),
            p2: "bob".to_string(),
            token: "cafe1234".to_string(),
            seed: 99,
        }
    }

    async fn recv(stream: &mut TcpStream) -> String {
        tokio::time::timeout(Duration::from_secs(5), read_frame(stream))
            .await
            .expect("frame within deadline")
            .expect("open stream")
    }

    #[tokio::test]
    async fn wrong_token_is_rejected_and_closed() {
        let (addr, _done, _registry) = start_runtime(config()).await;
        let mut stream = TcpStream::connect(addr).await.unwrap();
        write_frame(&mut stream, "HELLO username=eve token=wrong").await.unwrap();
        assert_eq!(recv(&mut stream).await, "ERR invalid_player_or_token");
        // The runtime hangs up after the rejection.
        let next = tokio::time::timeout(Duration::from_secs(5), read_frame(&mut stream)).await;
        assert!(matches!(next, Ok(Err(_))));
    }

    #[tokio::test]
    async fn players_are_seated_and_extras_spectate() {
        let (addr, _done, _registry) = start_runtime(config()).await;

        let mut p1 = TcpStream::connect(addr).await.unwrap();
        write_frame(&mut p1, "HELLO username=alice token=cafe1234").await.unwrap();
        let hello = recv(&mut p1).await;
        assert!(hello.starts_with("WELCOME role=P1 seed=99 gravity=500 bag=7"), "{}", hello);

        // Same username again: the seat is taken, so it demotes to spectator.
        let mut imposter = TcpStream::connect(addr).await.unwrap();
        write_frame(&mut imposter, "HELLO username=alice token=cafe1234").await.unwrap();
        assert!(recv(&mut imposter).await.starts_with("WELCOME role=SPEC"));

        let mut spec = TcpStream::connect(addr).await.unwrap();
        write_frame(&mut spec, "HELLO username=carol token=cafe1234 role=SPEC").await.unwrap();
        assert!(recv(&mut spec).await.starts_with("WELCOME role=SPEC"));
    }

    #[tokio::test]
    async fn seat_freed_before_start_can_be_retaken() {
        let (addr, _done, _registry) = start_runtime(config()).await;

        let mut first = TcpStream::connect(addr).await.unwrap();
        write_frame(&mut first, "HELLO username=alice token=cafe1234").await.unwrap();
        assert!(recv(&mut first).await.starts_with("WELCOME role=P1"));
        drop(first);

        // Give the runtime a moment to observe the close.
        tokio::time::sleep(Duration::from_millis(100)).await;

        let mut second = TcpStream::connect(addr).await.unwrap();
        write_frame(&mut second, "HELLO username=alice token=cafe1234").await.unwrap();
        assert!(recv(&mut second).await.starts_with("WELCOME role=P1"));
    }

    #[tokio::test]
    async fn disconnect_after_start_forfeits_and_reports_once() {
        let (addr, done, registry) = start_runtime(config()).await;

        let mut p1 = TcpStream::connect(addr).await.unwrap();
        write_frame(&mut p1, "HELLO username=alice token=cafe1234").await.unwrap();
        assert!(recv(&mut p1).await.starts_with("WELCOME role=P1"));

        let mut p2 = TcpStream::connect(addr).await.unwrap();
        write_frame(&mut p2, "HELLO username=bob token=cafe1234").await.unwrap();
        assert!(recv(&mut p2).await.starts_with("WELCOME role=P2"));

        // Match is running now; P2 vanishes and thereby forfeits.
        drop(p2);

        let mut saw_game_over = false;
        for _ in 0..8 {
            let frame = recv(&mut p1).await;
            if frame.starts_with("GAME_OVER") {
                assert!(frame.contains("p1_score="));
                assert!(frame.contains("p2_score="));
                saw_game_over = true;
                break;
            }
            assert!(frame.starts_with("SNAPSHOT"), "unexpected frame {}", frame);
        }
        assert!(saw_game_over);

        let outcome = tokio::time::timeout(Duration::from_secs(5), done)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(outcome.room_id, 1);
        assert_eq!(outcome.user1, "alice");
        assert_eq!(outcome.user2, "bob");

        // The runtime released its registry entry on the way out.
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(registry.get(1).is_none());
    }

    #[tokio::test]
    async fn snapshots_reach_players_and_spectators() {
        let (addr, _done, _registry) = start_runtime(config()).await;

        let mut p1 = TcpStream::connect(addr).await.unwrap();
        write_frame(&mut p1, "HELLO username=alice token=cafe1234").await.unwrap();
        recv(&mut p1).await;
        let mut p2 = TcpStream::connect(addr).await.unwrap();
        write_frame(&mut p2, "HELLO username=bob token=cafe1234").await.unwrap();
        recv(&mut p2).await;
        let mut spec = TcpStream::connect(addr).await.unwrap();
        write_frame(&mut spec, "HELLO username=carol token=cafe1234 role=SPEC").await.unwrap();
        recv(&mut spec).await;

        for stream in [&mut p1, &mut p2, &mut spec] {
            let frame = recv(stream).await;
            assert!(frame.starts_with("SNAPSHOT user="), "{}", frame);
            assert!(frame.contains("board="));
        }
    }
}
