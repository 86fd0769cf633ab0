//! # Lobby Library
//!
//! The lobby authenticates users, mediates matchmaking and hands players
//! off to per-match game runtimes. It owns no durable state: every durable
//! fact lives in the state service, reached over a single framed TCP
//! connection; the lobby's own maps (sessions, the game registry) are
//! rebuilt from scratch on every boot.
//!
//! ## Module Organization
//!
//! - `db`: the state-service client. One task owns the connection; callers
//!   send requests over a channel and await the reply, which keeps frames
//!   from interleaving without exposing a lock.
//! - `session`: per-client session state and the session table.
//! - `registry`: the game registry (room → port + token), the scanning
//!   port allocator and token generation.
//! - `server`: the accept loop and the dispatcher task that owns the lobby
//!   state and processes client commands one at a time.
//! - `handlers`: the command implementations, including the login CAS.
//! - `game`: the authoritative Tetris engine.
//! - `match_runtime`: one running match; admission, tick loop, snapshot
//!   fan-out and result reporting.

pub mod db;
pub mod game;
pub mod handlers;
pub mod match_runtime;
pub mod registry;
pub mod server;
pub mod session;
