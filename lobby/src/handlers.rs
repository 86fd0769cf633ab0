//! Client command handling.
//!
//! Every command translates into state-service requests; the session is
//! mutated only after the state service confirms the durable change, so the
//! lobby's mirrors (`room_id`, `spectate_room_id`) can lag but never lead
//! the authority. `ERR` replies from the state service are forwarded
//! verbatim unless a more specific client-facing error applies.

use log::{info, warn};
use rand::Rng;
use shared::logging::log_comm;
use shared::wire::{is_ok, parse_ok_reply};
use tokio::sync::oneshot;

use crate::db::DbError;
use crate::match_runtime::{run_match, MatchConfig, MatchReporter};
use crate::registry::{generate_token, GameEntry};
use crate::server::{Lobby, LobbyEvent, MODULE};
use crate::session::ClientId;

/// Copy of the fields a handler needs, taken before any await so the
/// session table is free to change underneath.
struct SessionView {
    username: String,
    authed: bool,
    room_id: i32,
    spectate_room_id: i32,
}

impl Lobby {
    pub(crate) async fn handle_command(&mut self, id: ClientId, body: &str) -> Result<(), DbError> {
        let mut words = body.split_whitespace();
        let command = words.next().unwrap_or("");
        let args: Vec<&str> = words.collect();

        let Some(view) = self.view(id) else {
            return Ok(());
        };

        if !view.authed && !matches!(command, "REGISTER" | "LOGIN") {
            self.send_to(id, "ERR not_logged_in");
            return Ok(());
        }

        let arg = |n: usize| args.get(n).copied().unwrap_or("");
        match command {
            "REGISTER" => self.register(id, arg(0), arg(1)).await,
            "LOGIN" => self.login(id, arg(0), arg(1)).await,
            "LOGOUT" => self.logout(id, &view).await,
            "LIST_ONLINE" => self.forward(id, "User listOnline".to_string()).await,
            "LIST_ROOMS" => self.forward(id, "Room list".to_string()).await,
            "LIST_INVITES" => {
                self.forward(id, format!("Room listInvites user={}", view.username)).await
            }
            "CREATE_ROOM" => self.create_room(id, &view, arg(0), arg(1)).await,
            "JOIN_ROOM" => self.join_room(id, arg(0).parse().unwrap_or(0)).await,
            "LEAVE_ROOM" => self.leave_room(id, &view).await,
            "INVITE" => self.invite(id, &view, arg(0)).await,
            "SPECTATE" => self.spectate(id, &view, arg(0).parse().unwrap_or(0)).await,
            "UNSPECTATE" => self.unspectate(id, &view).await,
            "START_GAME" => self.start_game(id, &view).await,
            _ => {
                self.send_to(id, "ERR unknown_command");
                Ok(())
            }
        }
    }

    fn view(&self, id: ClientId) -> Option<SessionView> {
        self.sessions.get(id).map(|s| SessionView {
            username: s.username.clone(),
            authed: s.authed,
            room_id: s.room_id,
            spectate_room_id: s.spectate_room_id,
        })
    }

    /// One state-service request on behalf of a client. A transport failure
    /// earns the client `ERR db` and is fatal for the lobby: with the
    /// single shared link gone, no later request can succeed either.
    async fn db_request(&mut self, id: ClientId, command: String) -> Result<String, DbError> {
        match self.db.request(command).await {
            Ok(reply) => Ok(reply),
            Err(err) => {
                self.send_to(id, "ERR db");
                Err(err)
            }
        }
    }

    /// Relays one request and its reply verbatim.
    async fn forward(&mut self, id: ClientId, command: String) -> Result<(), DbError> {
        let reply = self.db_request(id, command).await?;
        self.send_to(id, &reply);
        Ok(())
    }

    fn notify_user(&self, username: &str, frame: &str) {
        if let Some(session) = self.sessions.find_authed(username) {
            log_comm(MODULE, "TX", &format!("user={}", username), frame);
            session.send(frame);
        }
    }

    async fn register(&mut self, id: ClientId, user: &str, pass: &str) -> Result<(), DbError> {
        let reply = self
            .db_request(id, format!("User create username={} pass={}", user, pass))
            .await?;
        if is_ok(&reply) {
            info!("registered user {}", user);
        } else {
            info!("registration for {} rejected: {}", user, reply);
        }
        self.send_to(id, &reply);
        Ok(())
    }

    /// The critical path. Credentials are checked against a fresh read,
    /// presence against both the state service and the local sessions, and
    /// then the CAS on `online` decides. The local scan is only a fast
    /// path: the CAS remains the sole authority on duplicate logins.
    async fn login(&mut self, id: ClientId, user: &str, pass: &str) -> Result<(), DbError> {
        let reply = self
            .db_request(id, format!("User read username={}", user))
            .await?;
        let record = parse_ok_reply(&reply);

        if !is_ok(&reply) || record.get("pass").map(String::as_str) != Some(pass) {
            self.send_to(id, "ERR bad_credentials");
            info!("login rejected for {}: bad credentials", user);
            return Ok(());
        }

        let mut already_online = record.get("online").map(String::as_str) == Some("1");
        if !already_online {
            already_online = self.sessions.find_authed(user).is_some();
        }
        if already_online {
            self.send_to(id, "ERR already_online");
            info!("login rejected for {}: already online", user);
            return Ok(());
        }

        let acquire = self
            .db_request(id, format!("User compareSetOnline username={} expect=0 value=1", user))
            .await?;
        if is_ok(&acquire) {
            if let Some(session) = self.sessions.get_mut(id) {
                session.username = user.to_string();
                session.authed = true;
            }
            self.send_to(id, "OK LOGIN");
            info!("login ok for {}", user);
        } else if acquire == "ERR mismatch" {
            // Lost the race against another lobby session.
            self.send_to(id, "ERR already_online");
            info!("login rejected for {}: lost the online race", user);
        } else {
            self.send_to(id, &acquire);
            info!("login rejected for {}: {}", user, acquire);
        }
        Ok(())
    }

    async fn logout(&mut self, id: ClientId, view: &SessionView) -> Result<(), DbError> {
        self.db_request(id, format!("User setOnline username={} online=0", view.username))
            .await?;
        if view.room_id != 0 {
            // Reply intentionally unchecked; a failed leave is reconciled
            // on the next state-service boot.
            self.db_request(id, format!("Room leave roomId={} user={}", view.room_id, view.username))
                .await?;
        }
        if view.spectate_room_id != 0 {
            self.db_request(
                id,
                format!("Room unspectate roomId={} user={}", view.spectate_room_id, view.username),
            )
            .await?;
        }
        if let Some(session) = self.sessions.get_mut(id) {
            session.clear_auth();
        }
        self.send_to(id, "OK LOGOUT");
        info!("logout for {}", view.username);
        Ok(())
    }

    async fn create_room(
        &mut self,
        id: ClientId,
        view: &SessionView,
        name: &str,
        visibility: &str,
    ) -> Result<(), DbError> {
        let visibility = if visibility.is_empty() { "public" } else { visibility };
        let reply = self
            .db_request(
                id,
                format!("Room create name={} host={} visibility={}", name, view.username, visibility),
            )
            .await?;

        match parse_ok_reply(&reply).get("roomId").and_then(|v| v.parse::<i32>().ok()) {
            Some(room_id) => {
                if let Some(session) = self.sessions.get_mut(id) {
                    session.room_id = room_id;
                    session.spectate_room_id = 0;
                }
                self.send_to(id, &reply);
                info!("room {} created by {} ({})", room_id, view.username, visibility);
            }
            None => {
                self.send_to(id, "ERR create_failed");
                warn!("room create for {} produced no id: {}", view.username, reply);
            }
        }
        Ok(())
    }

    async fn join_room(&mut self, id: ClientId, room_id: i32) -> Result<(), DbError> {
        let Some(view) = self.view(id) else {
            return Ok(());
        };
        let reply = self
            .db_request(id, format!("Room join roomId={} user={}", room_id, view.username))
            .await?;
        if is_ok(&reply) {
            if let Some(session) = self.sessions.get_mut(id) {
                session.room_id = room_id;
                session.spectate_room_id = 0;
            }
            self.send_to(id, "OK joined");
            info!("{} joined room {}", view.username, room_id);
        } else {
            self.send_to(id, &reply);
            info!("{} failed to join room {}: {}", view.username, room_id, reply);
        }
        Ok(())
    }

    async fn leave_room(&mut self, id: ClientId, view: &SessionView) -> Result<(), DbError> {
        if view.room_id == 0 {
            self.send_to(id, "ERR not_in_room");
            return Ok(());
        }
        let reply = self
            .db_request(id, format!("Room leave roomId={} user={}", view.room_id, view.username))
            .await?;
        if is_ok(&reply) {
            if let Some(session) = self.sessions.get_mut(id) {
                session.room_id = 0;
                session.spectate_room_id = 0;
            }
            info!("{} left room {}", view.username, view.room_id);
        }
        self.send_to(id, &reply);
        Ok(())
    }

    async fn invite(&mut self, id: ClientId, view: &SessionView, target: &str) -> Result<(), DbError> {
        if view.room_id == 0 {
            self.send_to(id, "ERR not_in_room");
            return Ok(());
        }
        let reply = self
            .db_request(
                id,
                format!("Room invite roomId={} user={} host={}", view.room_id, target, view.username),
            )
            .await?;
        self.send_to(id, &reply);
        if !is_ok(&reply) {
            info!("{} could not invite {}: {}", view.username, target, reply);
            return Ok(());
        }
        info!("{} invited {} to room {}", view.username, target, view.room_id);

        // Best-effort live notification; the invite itself is already
        // durable, so a missing session just means the invitee will find it
        // via LIST_INVITES.
        let room_info = self
            .db_request(id, format!("Room get roomId={}", view.room_id))
            .await?;
        if is_ok(&room_info) {
            let fields = parse_ok_reply(&room_info);
            let name = fields.get("name").map(String::as_str).unwrap_or("");
            let notice = format!(
                "ROOM_INVITE roomId={} name={} host={}",
                view.room_id, name, view.username
            );
            self.notify_user(target, &notice);
        }
        Ok(())
    }

    async fn spectate(&mut self, id: ClientId, view: &SessionView, room_id: i32) -> Result<(), DbError> {
        if room_id == 0 {
            self.send_to(id, "ERR invalid_room");
            return Ok(());
        }
        if view.room_id != 0 {
            self.send_to(id, "ERR must_leave_room");
            return Ok(());
        }
        if view.spectate_room_id != 0 {
            self.send_to(id, "ERR already_spectating");
            return Ok(());
        }

        let reply = self
            .db_request(id, format!("Room spectate roomId={} user={}", room_id, view.username))
            .await?;
        if !is_ok(&reply) {
            // An idle room cannot have a live runtime, so the client sees
            // the same error as a missing registry entry.
            if reply == "ERR not_playing" {
                self.send_to(id, "ERR no_active_game");
            } else {
                self.send_to(id, &reply);
            }
            info!("{} cannot spectate room {}: {}", view.username, room_id, reply);
            return Ok(());
        }

        match self.registry.get(room_id) {
            Some(entry) => {
                if let Some(session) = self.sessions.get_mut(id) {
                    session.spectate_room_id = room_id;
                }
                self.send_to(id, "OK SPECTATE");
                self.send_to(
                    id,
                    &format!("SPECTATE_READY port={} token={} role=SPEC", entry.port, entry.token),
                );
                info!("{} spectates room {} on port {}", view.username, room_id, entry.port);
            }
            None => {
                // The room claims to be playing but no runtime is alive
                // here; roll the durable spectate back.
                self.send_to(id, "ERR no_active_game");
                if let Err(err) = self
                    .db
                    .request(format!("Room unspectate roomId={} user={}", room_id, view.username))
                    .await
                {
                    warn!("cannot roll back spectate of room {}: {}", room_id, err);
                }
                info!("{} cannot spectate room {}: no active game", view.username, room_id);
            }
        }
        Ok(())
    }

    async fn unspectate(&mut self, id: ClientId, view: &SessionView) -> Result<(), DbError> {
        if view.spectate_room_id == 0 {
            self.send_to(id, "ERR not_spectating");
            return Ok(());
        }
        let reply = self
            .db_request(
                id,
                format!("Room unspectate roomId={} user={}", view.spectate_room_id, view.username),
            )
            .await?;
        if is_ok(&reply) {
            if let Some(session) = self.sessions.get_mut(id) {
                session.spectate_room_id = 0;
            }
            self.send_to(id, "OK UNSPECTATE");
            info!("{} stopped spectating room {}", view.username, view.spectate_room_id);
        } else {
            self.send_to(id, &reply);
        }
        Ok(())
    }

    /// Host-only. Validates against a fresh room read, then allocates the
    /// endpoint, issues the token, flips the room to playing and spawns the
    /// runtime.
    async fn start_game(&mut self, id: ClientId, view: &SessionView) -> Result<(), DbError> {
        if view.room_id == 0 {
            self.send_to(id, "ERR not_in_room");
            return Ok(());
        }
        let room_id = view.room_id;

        let details = self
            .db_request(id, format!("Room get roomId={}", room_id))
            .await?;
        if !is_ok(&details) {
            self.send_to(id, "ERR no_such_room");
            return Ok(());
        }
        let room = parse_ok_reply(&details);
        if room.get("host").map(String::as_str) != Some(view.username.as_str()) {
            self.send_to(id, "ERR not_host");
            return Ok(());
        }
        let p1 = room.get("p1").cloned().unwrap_or_default();
        let p2 = room.get("p2").cloned().unwrap_or_default();
        if p1.is_empty() || p2.is_empty() {
            self.send_to(id, "ERR need_2_players");
            return Ok(());
        }
        if room.get("status").map(String::as_str) != Some("idle") {
            self.send_to(id, "ERR already_playing");
            return Ok(());
        }

        let Some((listener, port)) = self.ports.allocate().await else {
            self.send_to(id, "ERR cannot_start_game_port");
            warn!("no free match port for room {}", room_id);
            return Ok(());
        };

        let token = generate_token();
        self.db_request(id, format!("Room setStatus roomId={} status=playing", room_id))
            .await?;
        self.db_request(id, format!("Room setToken roomId={} token={}", room_id, token))
            .await?;

        self.registry.insert(room_id, GameEntry { port, token: token.clone() });

        let ready = format!("GAME_READY port={} token={}", port, token);
        self.notify_user(&p1, &ready);
        self.notify_user(&p2, &ready);
        info!("match for room {} starting on port {} ({} vs {})", room_id, port, p1, p2);

        let config = MatchConfig {
            room_id,
            p1,
            p2,
            token,
            seed: rand::thread_rng().gen::<u64>(),
        };

        // The runtime reports through a one-shot; a forwarder folds it into
        // the lobby's event stream so the durable writes happen here.
        let (done_tx, done_rx) = oneshot::channel();
        let events = self.events.clone();
        tokio::spawn(async move {
            if let Ok(outcome) = done_rx.await {
                let _ = events.send(LobbyEvent::MatchFinished(outcome));
            }
        });
        tokio::spawn(run_match(
            listener,
            config,
            Some(self.registry.clone()),
            MatchReporter::Lobby(done_tx),
        ));
        Ok(())
    }
}
