//! End-to-end tests: a real state service, a real lobby and framed TCP
//! clients, all in-process.

use std::net::SocketAddr;

use lobby::db::DbClient;
use lobby::server;
use shared::wire::parse_ok_reply;
use shared::{read_frame, write_frame};
use state_service::server::serve as serve_state;
use state_service::store::Store;
use tokio::net::{TcpListener, TcpStream};
use tokio::time::{sleep, timeout, Duration};

struct Stack {
    lobby_addr: SocketAddr,
    state_addr: SocketAddr,
}

async fn start_stack() -> Stack {
    let state_listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let state_addr = state_listener.local_addr().unwrap();
    tokio::spawn(serve_state(state_listener, Store::new(), std::future::pending()));

    let lobby_listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let lobby_addr = lobby_listener.local_addr().unwrap();
    let db_stream = TcpStream::connect(state_addr).await.unwrap();
    let db = DbClient::new(db_stream, format!("db:{}", state_addr));
    tokio::spawn(server::run(lobby_listener, db, std::future::pending()));

    Stack { lobby_addr, state_addr }
}

/// Direct line to the state service, for asserting on the authority.
async fn state_request(addr: SocketAddr, command: &str) -> String {
    let mut stream = TcpStream::connect(addr).await.unwrap();
    write_frame(&mut stream, command).await.unwrap();
    timeout(Duration::from_secs(5), read_frame(&mut stream))
        .await
        .expect("state reply within deadline")
        .expect("state connection open")
}

struct Client {
    stream: TcpStream,
}

impl Client {
    async fn connect(addr: SocketAddr) -> Self {
        let mut stream = TcpStream::connect(addr).await.unwrap();
        let greeting = timeout(Duration::from_secs(5), read_frame(&mut stream))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(greeting, "WELCOME LOBBY");
        Client { stream }
    }

    async fn recv(&mut self) -> String {
        timeout(Duration::from_secs(5), read_frame(&mut self.stream))
            .await
            .expect("frame within deadline")
            .expect("lobby connection open")
    }

    async fn cmd(&mut self, command: &str) -> String {
        write_frame(&mut self.stream, command).await.unwrap();
        self.recv().await
    }

    /// Register, log in and assert both succeeded.
    async fn login_fresh(&mut self, user: &str, pass: &str) {
        assert_eq!(self.cmd(&format!("REGISTER {} {}", user, pass)).await, format!("OK user={}", user));
        assert_eq!(self.cmd(&format!("LOGIN {} {}", user, pass)).await, "OK LOGIN");
    }
}

/// Raw match-endpoint connection (no lobby greeting).
async fn match_hello(port: u16, hello: &str) -> (TcpStream, String) {
    let mut stream = TcpStream::connect(("127.0.0.1", port)).await.unwrap();
    write_frame(&mut stream, hello).await.unwrap();
    let reply = timeout(Duration::from_secs(5), read_frame(&mut stream))
        .await
        .expect("match reply within deadline")
        .expect("match connection open");
    (stream, reply)
}

/// Polls `probe` until it reports true, failing after five seconds.
async fn eventually<F, Fut>(mut probe: F)
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = bool>,
{
    for _ in 0..50 {
        if probe().await {
            return;
        }
        sleep(Duration::from_millis(100)).await;
    }
    panic!("condition not reached within deadline");
}

#[tokio::test]
async fn register_then_login() {
    let stack = start_stack().await;
    let mut alice = Client::connect(stack.lobby_addr).await;

    assert_eq!(alice.cmd("REGISTER alice pw1").await, "OK user=alice");
    assert_eq!(alice.cmd("LOGIN alice pw1").await, "OK LOGIN");

    assert_eq!(
        state_request(stack.state_addr, "User read username=alice").await,
        "OK username=alice pass=pw1 online=1"
    );
}

#[tokio::test]
async fn duplicate_login_is_rejected() {
    let stack = start_stack().await;
    let mut alice = Client::connect(stack.lobby_addr).await;
    alice.login_fresh("alice", "pw1").await;

    let mut intruder = Client::connect(stack.lobby_addr).await;
    assert_eq!(intruder.cmd("LOGIN alice pw1").await, "ERR already_online");

    assert_eq!(
        state_request(stack.state_addr, "User read username=alice").await,
        "OK username=alice pass=pw1 online=1"
    );
}

#[tokio::test]
async fn wrong_password_is_rejected() {
    let stack = start_stack().await;
    let mut alice = Client::connect(stack.lobby_addr).await;
    assert_eq!(alice.cmd("REGISTER alice pw1").await, "OK user=alice");
    assert_eq!(alice.cmd("LOGIN alice nope").await, "ERR bad_credentials");
    assert_eq!(alice.cmd("LOGIN ghost pw").await, "ERR bad_credentials");
}

#[tokio::test]
async fn commands_require_login() {
    let stack = start_stack().await;
    let mut nobody = Client::connect(stack.lobby_addr).await;
    assert_eq!(nobody.cmd("CREATE_ROOM arena").await, "ERR not_logged_in");
    assert_eq!(nobody.cmd("LIST_ROOMS").await, "ERR not_logged_in");
    assert_eq!(nobody.cmd("START_GAME").await, "ERR not_logged_in");
}

#[tokio::test]
async fn private_room_gating() {
    let stack = start_stack().await;
    let mut alice = Client::connect(stack.lobby_addr).await;
    alice.login_fresh("alice", "pw1").await;
    let mut bob = Client::connect(stack.lobby_addr).await;
    bob.login_fresh("bob", "pw2").await;

    assert_eq!(alice.cmd("CREATE_ROOM r private").await, "OK roomId=1");
    assert_eq!(bob.cmd("JOIN_ROOM 1").await, "ERR private_room_not_invited");

    assert_eq!(alice.cmd("INVITE bob").await, "OK invited=bob");
    assert_eq!(bob.recv().await, "ROOM_INVITE roomId=1 name=r host=alice");
    assert_eq!(bob.cmd("LIST_INVITES").await, "OK 1:r:alice;");
    assert_eq!(bob.cmd("JOIN_ROOM 1").await, "OK joined");
}

#[tokio::test]
async fn match_start_and_token_admission() {
    let stack = start_stack().await;
    let mut alice = Client::connect(stack.lobby_addr).await;
    alice.login_fresh("alice", "pw1").await;
    let mut bob = Client::connect(stack.lobby_addr).await;
    bob.login_fresh("bob", "pw2").await;

    assert_eq!(alice.cmd("CREATE_ROOM arena").await, "OK roomId=1");
    assert_eq!(bob.cmd("JOIN_ROOM 1").await, "OK joined");

    // Only the host may start.
    assert_eq!(bob.cmd("START_GAME").await, "ERR not_host");

    write_frame(&mut alice.stream, "START_GAME").await.unwrap();
    let ready_alice = alice.recv().await;
    let ready_bob = bob.recv().await;
    assert!(ready_alice.starts_with("GAME_READY port="), "{}", ready_alice);
    assert_eq!(ready_alice, ready_bob);

    let fields = parse_ok_reply(&format!("OK {}", ready_alice));
    let port: u16 = fields.get("port").unwrap().parse().unwrap();
    let token = fields.get("token").unwrap().clone();

    // The room is now authoritatively playing, with the token on file.
    let room = state_request(stack.state_addr, "Room get roomId=1").await;
    assert!(room.contains("status=playing"), "{}", room);
    assert!(room.contains(&format!("token={}", token)), "{}", room);

    // Wrong token: rejected and hung up on.
    let (mut eve, reply) = match_hello(port, "HELLO username=eve token=wrong").await;
    assert_eq!(reply, "ERR invalid_player_or_token");
    let closed = timeout(Duration::from_secs(5), read_frame(&mut eve)).await;
    assert!(matches!(closed, Ok(Err(_))));

    // Right token and a seat name: welcomed with the match parameters.
    let (_bob_match, reply) = match_hello(port, &format!("HELLO username=bob token={}", token)).await;
    assert!(reply.starts_with("WELCOME role=P2 seed="), "{}", reply);
    assert!(reply.ends_with("gravity=500 bag=7"), "{}", reply);
}

#[tokio::test]
async fn spectate_requires_an_active_match() {
    let stack = start_stack().await;
    let mut alice = Client::connect(stack.lobby_addr).await;
    alice.login_fresh("alice", "pw1").await;
    let mut bob = Client::connect(stack.lobby_addr).await;
    bob.login_fresh("bob", "pw2").await;
    let mut carol = Client::connect(stack.lobby_addr).await;
    carol.login_fresh("carol", "pw3").await;

    assert_eq!(alice.cmd("CREATE_ROOM arena").await, "OK roomId=1");
    assert_eq!(bob.cmd("JOIN_ROOM 1").await, "OK joined");

    // Idle room: nothing to watch.
    assert_eq!(carol.cmd("SPECTATE 1").await, "ERR no_active_game");

    write_frame(&mut alice.stream, "START_GAME").await.unwrap();
    let ready = alice.recv().await;
    assert!(ready.starts_with("GAME_READY"));
    bob.recv().await;

    assert_eq!(carol.cmd("SPECTATE 1").await, "OK SPECTATE");
    let spectate_ready = carol.recv().await;
    assert!(spectate_ready.starts_with("SPECTATE_READY port="), "{}", spectate_ready);
    assert!(spectate_ready.ends_with("role=SPEC"), "{}", spectate_ready);

    // Repeated UNSPECTATE is not idempotent by design: the second call has
    // nothing to remove.
    assert_eq!(carol.cmd("UNSPECTATE").await, "OK UNSPECTATE");
    assert_eq!(carol.cmd("UNSPECTATE").await, "ERR not_spectating");
}

#[tokio::test]
async fn host_leaving_promotes_or_closes() {
    let stack = start_stack().await;
    let mut alice = Client::connect(stack.lobby_addr).await;
    alice.login_fresh("alice", "pw1").await;
    let mut bob = Client::connect(stack.lobby_addr).await;
    bob.login_fresh("bob", "pw2").await;

    assert_eq!(alice.cmd("CREATE_ROOM arena").await, "OK roomId=1");
    assert_eq!(bob.cmd("JOIN_ROOM 1").await, "OK joined");

    assert_eq!(alice.cmd("LEAVE_ROOM").await, "OK");
    let room = state_request(stack.state_addr, "Room get roomId=1").await;
    assert!(room.contains("host=bob"), "{}", room);
    assert!(room.contains("p1=bob"), "{}", room);
    assert!(room.contains("p2= "), "{}", room);

    // Bob is now alone; his departure closes the room.
    assert_eq!(bob.cmd("LEAVE_ROOM").await, "OK closed");
    assert_eq!(state_request(stack.state_addr, "Room get roomId=1").await, "ERR not_found");
}

#[tokio::test]
async fn match_completion_is_logged_exactly_once() {
    let stack = start_stack().await;
    let mut alice = Client::connect(stack.lobby_addr).await;
    alice.login_fresh("alice", "pw1").await;
    let mut bob = Client::connect(stack.lobby_addr).await;
    bob.login_fresh("bob", "pw2").await;

    assert_eq!(alice.cmd("CREATE_ROOM arena").await, "OK roomId=1");
    assert_eq!(bob.cmd("JOIN_ROOM 1").await, "OK joined");

    write_frame(&mut alice.stream, "START_GAME").await.unwrap();
    let ready = alice.recv().await;
    bob.recv().await;
    let fields = parse_ok_reply(&format!("OK {}", ready));
    let port: u16 = fields.get("port").unwrap().parse().unwrap();
    let token = fields.get("token").unwrap().clone();

    let (mut alice_match, reply) =
        match_hello(port, &format!("HELLO username=alice token={}", token)).await;
    assert!(reply.starts_with("WELCOME role=P1"));
    let (bob_match, reply) = match_hello(port, &format!("HELLO username=bob token={}", token)).await;
    assert!(reply.starts_with("WELCOME role=P2"));

    // The match is live; bob vanishing forfeits and ends it.
    drop(bob_match);
    loop {
        let frame = timeout(Duration::from_secs(5), read_frame(&mut alice_match))
            .await
            .expect("frame within deadline")
            .expect("match connection open");
        if frame.starts_with("GAME_OVER") {
            break;
        }
        assert!(frame.starts_with("SNAPSHOT"), "{}", frame);
    }

    // Exactly one log record appears, and the room returns to idle with the
    // token cleared.
    let state_addr = stack.state_addr;
    eventually(|| async move { state_request(state_addr, "GameLog list").await != "OK" }).await;
    let logs = state_request(stack.state_addr, "GameLog list").await;
    assert_eq!(logs.matches("id=").count(), 1, "{}", logs);
    assert!(logs.contains("room=1 p1=alice"), "{}", logs);
    assert!(logs.contains("p2=bob"), "{}", logs);

    eventually(|| async move {
        state_request(state_addr, "Room get roomId=1")
            .await
            .contains("status=idle")
    })
    .await;
    let room = state_request(stack.state_addr, "Room get roomId=1").await;
    assert!(room.ends_with("token="), "{}", room);
}

#[tokio::test]
async fn dead_session_is_reconciled() {
    let stack = start_stack().await;
    let mut alice = Client::connect(stack.lobby_addr).await;
    alice.login_fresh("alice", "pw1").await;
    assert_eq!(alice.cmd("CREATE_ROOM arena").await, "OK roomId=1");

    // The socket dies without a LOGOUT.
    drop(alice);

    let state_addr = stack.state_addr;
    eventually(|| async move {
        state_request(state_addr, "User read username=alice").await
            == "OK username=alice pass=pw1 online=0"
    })
    .await;
    // Alice was alone in the room, so it is gone as well.
    assert_eq!(state_request(stack.state_addr, "Room get roomId=1").await, "ERR not_found");
}

#[tokio::test]
async fn logout_releases_presence_and_room() {
    let stack = start_stack().await;
    let mut alice = Client::connect(stack.lobby_addr).await;
    alice.login_fresh("alice", "pw1").await;
    assert_eq!(alice.cmd("CREATE_ROOM arena").await, "OK roomId=1");

    assert_eq!(alice.cmd("LOGOUT").await, "OK LOGOUT");
    assert_eq!(
        state_request(stack.state_addr, "User read username=alice").await,
        "OK username=alice pass=pw1 online=0"
    );
    assert_eq!(state_request(stack.state_addr, "Room get roomId=1").await, "ERR not_found");

    // Logging in again works: the flag really was released.
    assert_eq!(alice.cmd("LOGIN alice pw1").await, "OK LOGIN");
}

#[tokio::test]
async fn room_listing_shows_public_rooms() {
    let stack = start_stack().await;
    let mut alice = Client::connect(stack.lobby_addr).await;
    alice.login_fresh("alice", "pw1").await;
    let mut bob = Client::connect(stack.lobby_addr).await;
    bob.login_fresh("bob", "pw2").await;

    assert_eq!(alice.cmd("CREATE_ROOM open").await, "OK roomId=1");
    assert_eq!(bob.cmd("CREATE_ROOM hidden private").await, "OK roomId=2");

    assert_eq!(alice.cmd("LIST_ROOMS").await, "OK 1:open:alice:idle:public:alice:;");
    assert_eq!(alice.cmd("LIST_ONLINE").await, "OK alice,bob");
}
