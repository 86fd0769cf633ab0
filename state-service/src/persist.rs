//! Text snapshot persistence.
//!
//! Record format, one record per line:
//!
//! ```text
//! USER "alice" "pw1" 0
//! ROOM 3 "my room" "alice" "public" "idle" "alice" "bob" "" 1 "carol" 0
//! LOG 1 3 "alice" "bob" 800 0
//! ```
//!
//! String fields are quoted so whitespace round-trips; set-valued fields are
//! prefixed by their count. Blank lines and `#` lines are comments. Records
//! that fail to parse are skipped rather than aborting the load, so a
//! partially damaged snapshot salvages what it can.

use std::fs;
use std::io;
use std::path::Path;

use log::warn;
use shared::wire::{quote, FieldReader};

use crate::store::{GameLog, Room, RoomStatus, Store, User, Visibility};

/// Loads a snapshot into a fresh store. Returns `Ok(None)` when the file
/// does not exist (first boot). Every user is forced offline: presence is a
/// live fact and never survives a restart.
pub fn load(path: &Path) -> io::Result<Option<Store>> {
    let text = match fs::read_to_string(path) {
        Ok(text) => text,
        Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(None),
        Err(err) => return Err(err),
    };

    let mut store = Store::new();
    let mut max_room = 0;
    let mut max_log = 0;

    for line in text.lines() {
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let mut fields = FieldReader::new(line);
        match fields.next_token() {
            Some("USER") => {
                if let Some(user) = read_user(&mut fields) {
                    store.users.insert(user.username.clone(), user);
                } else {
                    warn!("skipping malformed USER record: {}", line);
                }
            }
            Some("ROOM") => {
                if let Some(room) = read_room(&mut fields) {
                    max_room = max_room.max(room.id);
                    store.rooms.insert(room.id, room);
                } else {
                    warn!("skipping malformed ROOM record: {}", line);
                }
            }
            Some("LOG") => {
                if let Some(log) = read_log(&mut fields) {
                    max_log = max_log.max(log.id);
                    store.logs.push(log);
                } else {
                    warn!("skipping malformed LOG record: {}", line);
                }
            }
            Some(tag) => warn!("skipping unknown record tag {}", tag),
            None => {}
        }
    }

    store.next_room_id = max_room + 1;
    store.next_log_id = max_log + 1;
    store.mark_all_offline();
    Ok(Some(store))
}

/// Writes the whole store as a snapshot.
pub fn save(path: &Path, store: &Store) -> io::Result<()> {
    let mut out = String::new();

    for user in store.users.values() {
        out.push_str(&format!(
            "USER {} {} {}\n",
            quote(&user.username),
            quote(&user.pass),
            if user.online { 1 } else { 0 }
        ));
    }

    for room in store.rooms.values() {
        out.push_str(&format!(
            "ROOM {} {} {} {} {} {} {} {}",
            room.id,
            quote(&room.name),
            quote(&room.host),
            quote(room.visibility.as_str()),
            quote(room.status.as_str()),
            quote(&room.p1),
            quote(&room.p2),
            quote(&room.token)
        ));
        out.push_str(&format!(" {}", room.invite_list.len()));
        for invitee in &room.invite_list {
            out.push(' ');
            out.push_str(&quote(invitee));
        }
        out.push_str(&format!(" {}", room.spectators.len()));
        for spectator in &room.spectators {
            out.push(' ');
            out.push_str(&quote(spectator));
        }
        out.push('\n');
    }

    for log in &store.logs {
        out.push_str(&format!(
            "LOG {} {} {} {} {} {}\n",
            log.id,
            log.room_id,
            quote(&log.user1),
            quote(&log.user2),
            log.score1,
            log.score2
        ));
    }

    fs::write(path, out)
}

fn read_user(fields: &mut FieldReader) -> Option<User> {
    let username = fields.next_string()?;
    let pass = fields.next_string()?;
    let online: i32 = fields.next_int()?;
    Some(User {
        username,
        pass,
        online: online != 0,
    })
}

fn read_room(fields: &mut FieldReader) -> Option<Room> {
    let id: i32 = fields.next_int()?;
    let name = fields.next_string()?;
    let host = fields.next_string()?;
    let visibility = Visibility::parse_lenient(&fields.next_string()?);
    let status = RoomStatus::parse(&fields.next_string()?)?;
    let p1 = fields.next_string()?;
    let p2 = fields.next_string()?;
    let token = fields.next_string()?;

    let mut room = Room {
        id,
        name,
        host,
        visibility,
        status,
        p1,
        p2,
        token,
        invite_list: Default::default(),
        spectators: Default::default(),
    };

    // Counted trailing sets; absent counts mean empty sets.
    if let Some(count) = fields.next_int::<usize>() {
        for _ in 0..count {
            room.invite_list.insert(fields.next_string()?);
        }
    }
    if let Some(count) = fields.next_int::<usize>() {
        for _ in 0..count {
            room.spectators.insert(fields.next_string()?);
        }
    }
    Some(room)
}

fn read_log(fields: &mut FieldReader) -> Option<GameLog> {
    Some(GameLog {
        id: fields.next_int()?,
        room_id: fields.next_int()?,
        user1: fields.next_string()?,
        user2: fields.next_string()?,
        score1: fields.next_int()?,
        score2: fields.next_int()?,
    })
}
