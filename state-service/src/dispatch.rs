//! Command grammar and reply formatting.
//!
//! A request is `<Collection> <Action> [key=value ...]`; the reply is
//! `OK [payload]` or `ERR <kind>`. Malformed requests get an `ERR` and
//! mutate nothing; the service never hangs up on a bad request.

use std::collections::HashMap;

use shared::wire::parse_kv_args;

use crate::store::{LeaveOutcome, RoomStatus, Store, StoreError, Visibility};

/// Executes one request against the store and renders the reply.
pub fn dispatch(store: &mut Store, request: &str) -> String {
    let mut words = request.split_whitespace();
    let collection = words.next().unwrap_or("");
    let action = words.next().unwrap_or("");
    // Command words never contain '=', so the whole request can feed the
    // argument parser.
    let args = parse_kv_args(request);

    let result = match (collection, action) {
        ("User", "create") => user_create(store, &args),
        ("User", "read") => user_read(store, &args),
        ("User", "compareSetOnline") => user_compare_set_online(store, &args),
        ("User", "setOnline") => user_set_online(store, &args),
        ("User", "listOnline") => Ok(render_online_list(store)),
        ("Room", "create") => room_create(store, &args),
        ("Room", "join") => room_join(store, &args),
        ("Room", "leave") => room_leave(store, &args),
        ("Room", "list") => Ok(render_room_list(store)),
        ("Room", "get") => room_get(store, &args),
        ("Room", "setStatus") => room_set_status(store, &args),
        ("Room", "setToken") => room_set_token(store, &args),
        ("Room", "invite") => room_invite(store, &args),
        ("Room", "spectate") => room_spectate(store, &args),
        ("Room", "unspectate") => room_unspectate(store, &args),
        ("Room", "listInvites") => room_list_invites(store, &args),
        ("GameLog", "create") => gamelog_create(store, &args),
        ("GameLog", "list") => Ok(render_log_list(store)),
        _ => Err(StoreError::UnknownCommand),
    };

    match result {
        Ok(reply) => reply,
        Err(err) => format!("ERR {}", err),
    }
}

type Args = HashMap<String, String>;

fn required<'a>(args: &'a Args, key: &str, missing: StoreError) -> Result<&'a str, StoreError> {
    match args.get(key).map(String::as_str) {
        Some(value) if !value.is_empty() => Ok(value),
        _ => Err(missing),
    }
}

/// Non-negative integer field, rejecting garbage and overflow.
fn int_field(args: &Args, key: &str, invalid: StoreError) -> Result<i32, StoreError> {
    let text = args.get(key).map(String::as_str).unwrap_or("");
    match text.parse::<i32>() {
        Ok(value) if value >= 0 => Ok(value),
        _ => Err(invalid),
    }
}

fn flag_field(args: &Args, key: &str, invalid: StoreError) -> Result<bool, StoreError> {
    match int_field(args, key, invalid)? {
        0 => Ok(false),
        1 => Ok(true),
        _ => Err(invalid),
    }
}

// --- User ---

fn user_create(store: &mut Store, args: &Args) -> Result<String, StoreError> {
    let username = required(args, "username", StoreError::MissingUsername)?;
    let pass = args.get("pass").map(String::as_str).unwrap_or("");
    store.create_user(username, pass)?;
    Ok(format!("OK user={}", username))
}

fn user_read(store: &mut Store, args: &Args) -> Result<String, StoreError> {
    let username = args.get("username").map(String::as_str).unwrap_or("");
    let user = store.user(username).ok_or(StoreError::NotFound)?;
    Ok(format!(
        "OK username={} pass={} online={}",
        user.username,
        user.pass,
        if user.online { "1" } else { "0" }
    ))
}

fn user_compare_set_online(store: &mut Store, args: &Args) -> Result<String, StoreError> {
    let username = required(args, "username", StoreError::MissingUsername)?;
    let expect = flag_field(args, "expect", StoreError::InvalidExpect)?;
    let value = flag_field(args, "value", StoreError::InvalidValue)?;
    store.compare_set_online(username, expect, value)?;
    Ok("OK".to_string())
}

fn user_set_online(store: &mut Store, args: &Args) -> Result<String, StoreError> {
    let username = args.get("username").map(String::as_str).unwrap_or("");
    let online = args.get("online").map(String::as_str) == Some("1");
    store.set_online(username, online)?;
    Ok("OK".to_string())
}

fn render_online_list(store: &Store) -> String {
    let online = store.list_online();
    if online.is_empty() {
        "OK".to_string()
    } else {
        format!("OK {}", online.join(","))
    }
}

// --- Room ---

fn room_create(store: &mut Store, args: &Args) -> Result<String, StoreError> {
    let name = args.get("name").map(String::as_str).unwrap_or("");
    let host = required(args, "host", StoreError::MissingHost)?;
    let visibility = args
        .get("visibility")
        .map(|v| Visibility::parse_lenient(v))
        .unwrap_or(Visibility::Public);
    let id = store.create_room(name, host, visibility);
    Ok(format!("OK roomId={}", id))
}

fn room_join(store: &mut Store, args: &Args) -> Result<String, StoreError> {
    let id = int_field(args, "roomId", StoreError::InvalidRoomId)?;
    let user = required(args, "user", StoreError::MissingUser)?;
    store.join_room(id, user)?;
    Ok("OK".to_string())
}

fn room_leave(store: &mut Store, args: &Args) -> Result<String, StoreError> {
    let id = int_field(args, "roomId", StoreError::InvalidRoomId)?;
    let user = required(args, "user", StoreError::MissingUser)?;
    match store.leave_room(id, user)? {
        LeaveOutcome::Left => Ok("OK".to_string()),
        LeaveOutcome::Closed => Ok("OK closed".to_string()),
    }
}

fn render_room_list(store: &Store) -> String {
    let mut out = String::from("OK");
    let mut first = true;
    for room in store.public_rooms() {
        if first {
            out.push(' ');
            first = false;
        }
        out.push_str(&format!(
            "{}:{}:{}:{}:{}:{}:{};",
            room.id,
            room.name,
            room.host,
            room.status.as_str(),
            room.visibility.as_str(),
            room.p1,
            room.p2
        ));
    }
    out
}

fn room_get(store: &mut Store, args: &Args) -> Result<String, StoreError> {
    let id = int_field(args, "roomId", StoreError::InvalidRoomId)?;
    let room = store.room(id).ok_or(StoreError::NotFound)?;
    Ok(format!(
        "OK id={} name={} host={} status={} p1={} p2={} token={}",
        room.id,
        room.name,
        room.host,
        room.status.as_str(),
        room.p1,
        room.p2,
        room.token
    ))
}

fn room_set_status(store: &mut Store, args: &Args) -> Result<String, StoreError> {
    let id = int_field(args, "roomId", StoreError::InvalidRoomId)?;
    let text = required(args, "status", StoreError::MissingStatus)?;
    let status = RoomStatus::parse(text).ok_or(StoreError::InvalidStatus)?;
    store.set_status(id, status)?;
    Ok("OK".to_string())
}

fn room_set_token(store: &mut Store, args: &Args) -> Result<String, StoreError> {
    let id = int_field(args, "roomId", StoreError::InvalidRoomId)?;
    let token = required(args, "token", StoreError::MissingToken)?;
    store.set_token(id, token)?;
    Ok("OK".to_string())
}

fn room_invite(store: &mut Store, args: &Args) -> Result<String, StoreError> {
    let id = int_field(args, "roomId", StoreError::InvalidRoomId)?;
    let host = required(args, "host", StoreError::MissingHost)?;
    let user = required(args, "user", StoreError::MissingUser)?;
    store.invite(id, user, host)?;
    Ok(format!("OK invited={}", user))
}

fn room_spectate(store: &mut Store, args: &Args) -> Result<String, StoreError> {
    let id = int_field(args, "roomId", StoreError::InvalidRoomId)?;
    let user = required(args, "user", StoreError::MissingUser)?;
    store.spectate(id, user)?;
    Ok("OK".to_string())
}

fn room_unspectate(store: &mut Store, args: &Args) -> Result<String, StoreError> {
    let id = int_field(args, "roomId", StoreError::InvalidRoomId)?;
    let user = required(args, "user", StoreError::MissingUser)?;
    store.unspectate(id, user)?;
    Ok("OK".to_string())
}

fn room_list_invites(store: &mut Store, args: &Args) -> Result<String, StoreError> {
    let user = required(args, "user", StoreError::MissingUser)?;
    let mut out = String::from("OK");
    let mut first = true;
    for room in store.rooms_inviting(user) {
        if first {
            out.push(' ');
            first = false;
        }
        out.push_str(&format!("{}:{}:{};", room.id, room.name, room.host));
    }
    Ok(out)
}

// --- GameLog ---

fn gamelog_create(store: &mut Store, args: &Args) -> Result<String, StoreError> {
    let room_id = int_field(args, "roomId", StoreError::InvalidRoomId)?;
    let score1 = int_field(args, "score1", StoreError::InvalidScore1)?;
    let score2 = int_field(args, "score2", StoreError::InvalidScore2)?;
    let user1 = required(args, "user1", StoreError::MissingUser)?;
    let user2 = required(args, "user2", StoreError::MissingUser)?;
    let id = store.create_log(room_id, user1, user2, score1, score2);
    Ok(format!("OK gameId={}", id))
}

fn render_log_list(store: &Store) -> String {
    let mut out = String::from("OK");
    let mut first = true;
    for log in store.logs() {
        if first {
            out.push(' ');
            first = false;
        }
        out.push_str(&format!(
            "id={} room={} p1={} s1={} p2={} s2={};",
            log.id, log.room_id, log.user1, log.score1, log.user2, log.score2
        ));
    }
    out
}
