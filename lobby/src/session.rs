//! Client sessions.
//!
//! One [`Session`] per connected socket. The lobby dispatcher owns the
//! whole table, so there is no locking; handlers mutate sessions only after
//! the state service has confirmed the corresponding durable change.

use std::collections::HashMap;

use tokio::sync::mpsc;

pub type ClientId = u64;

#[derive(Debug)]
pub struct Session {
    pub username: String,
    pub authed: bool,
    /// Room this session is seated in, 0 when none.
    pub room_id: i32,
    /// Room this session spectates, 0 when none.
    pub spectate_room_id: i32,
    sender: mpsc::UnboundedSender<String>,
}

impl Session {
    pub fn new(sender: mpsc::UnboundedSender<String>) -> Self {
        Self {
            username: String::new(),
            authed: false,
            room_id: 0,
            spectate_room_id: 0,
            sender,
        }
    }

    /// Queues one frame to this client. Best-effort: a dead writer means
    /// the disconnect event is already on its way.
    pub fn send(&self, frame: impl Into<String>) {
        let _ = self.sender.send(frame.into());
    }

    pub fn clear_auth(&mut self) {
        self.username.clear();
        self.authed = false;
        self.room_id = 0;
        self.spectate_room_id = 0;
    }
}

#[derive(Default)]
pub struct SessionMap {
    sessions: HashMap<ClientId, Session>,
}

impl SessionMap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, id: ClientId, session: Session) {
        self.sessions.insert(id, session);
    }

    pub fn remove(&mut self, id: ClientId) -> Option<Session> {
        self.sessions.remove(&id)
    }

    pub fn get(&self, id: ClientId) -> Option<&Session> {
        self.sessions.get(&id)
    }

    pub fn get_mut(&mut self, id: ClientId) -> Option<&mut Session> {
        self.sessions.get_mut(&id)
    }

    /// The live session authenticated as `username`, if any. Used for the
    /// duplicate-login fast path and for pushing notifications.
    pub fn find_authed(&self, username: &str) -> Option<&Session> {
        self.sessions
            .values()
            .find(|s| s.authed && s.username == username)
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }
}
