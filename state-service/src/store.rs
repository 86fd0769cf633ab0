//! Records and state transitions.
//!
//! The store is plain data plus methods; it knows nothing about sockets or
//! the command grammar. Every method either applies a complete transition or
//! returns a [`StoreError`] having changed nothing.

use std::collections::{BTreeMap, BTreeSet};
use thiserror::Error;

/// Domain failures, one per wire error kind. The enum's `Display` output is
/// the exact token sent after `ERR `.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum StoreError {
    #[error("missing_username")]
    MissingUsername,
    #[error("exists")]
    Exists,
    #[error("not_found")]
    NotFound,
    #[error("invalid_expect")]
    InvalidExpect,
    #[error("invalid_value")]
    InvalidValue,
    #[error("mismatch")]
    Mismatch,
    #[error("invalid_roomId")]
    InvalidRoomId,
    #[error("missing_user")]
    MissingUser,
    #[error("missing_host")]
    MissingHost,
    #[error("missing_status")]
    MissingStatus,
    #[error("invalid_status")]
    InvalidStatus,
    #[error("missing_token")]
    MissingToken,
    #[error("playing")]
    Playing,
    #[error("full")]
    Full,
    #[error("already_in_room")]
    AlreadyInRoom,
    #[error("private_room_not_invited")]
    PrivateRoomNotInvited,
    #[error("not_in_room")]
    NotInRoom,
    #[error("not_host")]
    NotHost,
    #[error("not_playing")]
    NotPlaying,
    #[error("not_spectating")]
    NotSpectating,
    #[error("invalid_score1")]
    InvalidScore1,
    #[error("invalid_score2")]
    InvalidScore2,
    #[error("unknown_command")]
    UnknownCommand,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Visibility {
    Public,
    Private,
}

impl Visibility {
    pub fn as_str(self) -> &'static str {
        match self {
            Visibility::Public => "public",
            Visibility::Private => "private",
        }
    }

    /// Lower-cases the input and coerces anything that is not exactly
    /// `private` to `public`, as the room-creation path always has.
    pub fn parse_lenient(text: &str) -> Self {
        if text.eq_ignore_ascii_case("private") {
            Visibility::Private
        } else {
            Visibility::Public
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RoomStatus {
    Idle,
    Playing,
}

impl RoomStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            RoomStatus::Idle => "idle",
            RoomStatus::Playing => "playing",
        }
    }

    pub fn parse(text: &str) -> Option<Self> {
        match text {
            "idle" => Some(RoomStatus::Idle),
            "playing" => Some(RoomStatus::Playing),
            _ => None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct User {
    pub username: String,
    pub pass: String,
    pub online: bool,
}

#[derive(Debug, Clone)]
pub struct Room {
    pub id: i32,
    pub name: String,
    pub host: String,
    pub visibility: Visibility,
    pub status: RoomStatus,
    pub p1: String,
    pub p2: String,
    pub token: String,
    pub invite_list: BTreeSet<String>,
    pub spectators: BTreeSet<String>,
}

#[derive(Debug, Clone)]
pub struct GameLog {
    pub id: i32,
    pub room_id: i32,
    pub user1: String,
    pub user2: String,
    pub score1: i32,
    pub score2: i32,
}

/// What a successful `Room leave` did, so the dispatcher can answer `OK`
/// versus `OK closed`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LeaveOutcome {
    Left,
    Closed,
}

#[derive(Debug, Default)]
pub struct Store {
    pub(crate) users: BTreeMap<String, User>,
    pub(crate) rooms: BTreeMap<i32, Room>,
    pub(crate) logs: Vec<GameLog>,
    pub(crate) next_room_id: i32,
    pub(crate) next_log_id: i32,
}

impl Store {
    pub fn new() -> Self {
        Self {
            users: BTreeMap::new(),
            rooms: BTreeMap::new(),
            logs: Vec::new(),
            next_room_id: 1,
            next_log_id: 1,
        }
    }

    // --- Users ---

    pub fn create_user(&mut self, username: &str, pass: &str) -> Result<(), StoreError> {
        if self.users.contains_key(username) {
            return Err(StoreError::Exists);
        }
        self.users.insert(
            username.to_string(),
            User {
                username: username.to_string(),
                pass: pass.to_string(),
                online: false,
            },
        );
        Ok(())
    }

    pub fn user(&self, username: &str) -> Option<&User> {
        self.users.get(username)
    }

    /// Atomic compare-and-set on the `online` flag. This is the primitive
    /// the lobby relies on to reject duplicate logins; the store's
    /// one-command-at-a-time execution makes it atomic for free.
    pub fn compare_set_online(
        &mut self,
        username: &str,
        expect: bool,
        value: bool,
    ) -> Result<(), StoreError> {
        let user = self.users.get_mut(username).ok_or(StoreError::NotFound)?;
        if user.online != expect {
            return Err(StoreError::Mismatch);
        }
        user.online = value;
        Ok(())
    }

    pub fn set_online(&mut self, username: &str, online: bool) -> Result<(), StoreError> {
        let user = self.users.get_mut(username).ok_or(StoreError::NotFound)?;
        user.online = online;
        Ok(())
    }

    pub fn list_online(&self) -> Vec<&str> {
        self.users
            .values()
            .filter(|u| u.online)
            .map(|u| u.username.as_str())
            .collect()
    }

    pub fn user_count(&self) -> usize {
        self.users.len()
    }

    pub fn room_count(&self) -> usize {
        self.rooms.len()
    }

    pub(crate) fn mark_all_offline(&mut self) {
        for user in self.users.values_mut() {
            user.online = false;
        }
    }

    // --- Rooms ---

    pub fn create_room(&mut self, name: &str, host: &str, visibility: Visibility) -> i32 {
        let id = self.next_room_id;
        self.next_room_id += 1;
        self.rooms.insert(
            id,
            Room {
                id,
                name: name.to_string(),
                host: host.to_string(),
                visibility,
                status: RoomStatus::Idle,
                p1: host.to_string(),
                p2: String::new(),
                token: String::new(),
                invite_list: BTreeSet::new(),
                spectators: BTreeSet::new(),
            },
        );
        id
    }

    pub fn room(&self, id: i32) -> Option<&Room> {
        self.rooms.get(&id)
    }

    pub fn public_rooms(&self) -> impl Iterator<Item = &Room> {
        self.rooms
            .values()
            .filter(|r| r.visibility == Visibility::Public)
    }

    pub fn join_room(&mut self, id: i32, user: &str) -> Result<(), StoreError> {
        let room = self.rooms.get_mut(&id).ok_or(StoreError::NotFound)?;
        if room.status != RoomStatus::Idle {
            return Err(StoreError::Playing);
        }
        if !room.p2.is_empty() {
            return Err(StoreError::Full);
        }
        if room.p1 == user || room.p2 == user {
            return Err(StoreError::AlreadyInRoom);
        }
        if room.visibility == Visibility::Public || room.invite_list.contains(user) {
            room.p2 = user.to_string();
            room.invite_list.remove(user);
            Ok(())
        } else {
            Err(StoreError::PrivateRoomNotInvited)
        }
    }

    /// Removes `user` from the room. Rules, evaluated in order: spectators
    /// are simply dropped; a host leaving with a guest promotes the guest
    /// and resets the transient match state; a host leaving alone destroys
    /// the room; a guest leaving clears the seat.
    pub fn leave_room(&mut self, id: i32, user: &str) -> Result<LeaveOutcome, StoreError> {
        let room = self.rooms.get_mut(&id).ok_or(StoreError::NotFound)?;

        if room.spectators.remove(user) {
            return Ok(LeaveOutcome::Left);
        }

        if room.host == user {
            if room.p2.is_empty() {
                self.rooms.remove(&id);
                return Ok(LeaveOutcome::Closed);
            }
            room.host = room.p2.clone();
            room.p1 = room.p2.clone();
            room.p2.clear();
            room.status = RoomStatus::Idle;
            room.token.clear();
            room.invite_list.remove(user);
            room.spectators.clear();
            return Ok(LeaveOutcome::Left);
        }

        if room.p2 == user {
            room.p2.clear();
            room.status = RoomStatus::Idle;
            room.token.clear();
            room.invite_list.remove(user);
            room.spectators.remove(user);
            return Ok(LeaveOutcome::Left);
        }

        Err(StoreError::NotInRoom)
    }

    pub fn set_status(&mut self, id: i32, status: RoomStatus) -> Result<(), StoreError> {
        let room = self.rooms.get_mut(&id).ok_or(StoreError::NotFound)?;
        room.status = status;
        if status == RoomStatus::Idle {
            // Back to idle resets the transient match state.
            room.token.clear();
            room.invite_list.clear();
            room.spectators.clear();
        }
        Ok(())
    }

    pub fn set_token(&mut self, id: i32, token: &str) -> Result<(), StoreError> {
        let room = self.rooms.get_mut(&id).ok_or(StoreError::NotFound)?;
        room.token = token.to_string();
        Ok(())
    }

    pub fn invite(&mut self, id: i32, user: &str, host: &str) -> Result<(), StoreError> {
        let room = self.rooms.get_mut(&id).ok_or(StoreError::NotFound)?;
        if room.host != host {
            return Err(StoreError::NotHost);
        }
        room.invite_list.insert(user.to_string());
        Ok(())
    }

    pub fn spectate(&mut self, id: i32, user: &str) -> Result<(), StoreError> {
        let room = self.rooms.get_mut(&id).ok_or(StoreError::NotFound)?;
        if room.status != RoomStatus::Playing {
            return Err(StoreError::NotPlaying);
        }
        room.spectators.insert(user.to_string());
        Ok(())
    }

    pub fn unspectate(&mut self, id: i32, user: &str) -> Result<(), StoreError> {
        let room = self.rooms.get_mut(&id).ok_or(StoreError::NotFound)?;
        if room.spectators.remove(user) {
            Ok(())
        } else {
            Err(StoreError::NotSpectating)
        }
    }

    pub fn rooms_inviting<'a>(&'a self, user: &'a str) -> impl Iterator<Item = &'a Room> {
        self.rooms
            .values()
            .filter(move |r| r.invite_list.contains(user))
    }

    // --- Game logs ---

    pub fn create_log(
        &mut self,
        room_id: i32,
        user1: &str,
        user2: &str,
        score1: i32,
        score2: i32,
    ) -> i32 {
        let id = self.next_log_id;
        self.next_log_id += 1;
        self.logs.push(GameLog {
            id,
            room_id,
            user1: user1.to_string(),
            user2: user2.to_string(),
            score1,
            score2,
        });
        id
    }

    pub fn logs(&self) -> &[GameLog] {
        &self.logs
    }
}
