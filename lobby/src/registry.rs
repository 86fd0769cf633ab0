//! Game registry, port allocation and token generation.
//!
//! The registry maps a playing room to its match endpoint and token. It is
//! the one piece of lobby state shared with running match runtimes, so it
//! sits behind a mutex. An entry exists exactly while the runtime is live:
//! inserted before the runtime task is spawned, removed by the runtime
//! right before it exits.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use rand::Rng;
use shared::{MATCH_PORT_ATTEMPTS, MATCH_PORT_MAX, MATCH_PORT_MIN};
use tokio::net::TcpListener;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GameEntry {
    pub port: u16,
    pub token: String,
}

#[derive(Clone, Default)]
pub struct GameRegistry {
    inner: Arc<Mutex<HashMap<i32, GameEntry>>>,
}

impl GameRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, room_id: i32, entry: GameEntry) {
        self.inner.lock().unwrap().insert(room_id, entry);
    }

    pub fn remove(&self, room_id: i32) {
        self.inner.lock().unwrap().remove(&room_id);
    }

    pub fn get(&self, room_id: i32) -> Option<GameEntry> {
        self.inner.lock().unwrap().get(&room_id).cloned()
    }

    pub fn len(&self) -> usize {
        self.inner.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.lock().unwrap().is_empty()
    }
}

/// Match token: two 32-bit random values as concatenated lowercase hex.
/// `thread_rng` is cryptographically secure, so the token is unguessable;
/// unguessability is the only protection the protocol claims.
pub fn generate_token() -> String {
    let mut rng = rand::thread_rng();
    format!("{:x}{:x}", rng.gen::<u32>(), rng.gen::<u32>())
}

/// Scanning allocator for match endpoints. Starts at [`MATCH_PORT_MIN`],
/// wraps at [`MATCH_PORT_MAX`] and remembers where it stopped so successive
/// matches spread across the range instead of piling onto one port.
pub struct PortAllocator {
    next: u16,
}

impl PortAllocator {
    pub fn new() -> Self {
        Self { next: MATCH_PORT_MIN }
    }

    /// Binds a listener on the first free port, trying up to
    /// [`MATCH_PORT_ATTEMPTS`] candidates.
    pub async fn allocate(&mut self) -> Option<(TcpListener, u16)> {
        for _ in 0..MATCH_PORT_ATTEMPTS {
            let candidate = self.next;
            self.next = if candidate >= MATCH_PORT_MAX {
                MATCH_PORT_MIN
            } else {
                candidate + 1
            };
            if let Ok(listener) = TcpListener::bind(("0.0.0.0", candidate)).await {
                return Some((listener, candidate));
            }
        }
        None
    }
}

impl Default for PortAllocator {
    fn default() -> Self {
        Self::new()
    }
}
