//! # Shared Protocol Library
//!
//! Common ground for the three services that make up the match-lifecycle
//! core: the state service, the lobby and the per-match game runtimes.
//! Everything that crosses a process boundary is defined here so the
//! services cannot drift apart:
//!
//! - **Framing** (`framing`): every TCP channel in the system carries
//!   length-prefixed frames, one logical ASCII message per frame.
//! - **Wire text** (`wire`): message bodies are space-separated tokens with
//!   `key=value` arguments; the state-service snapshot uses quoted fields.
//!   Parsing and quoting live here.
//! - **Log hygiene** (`logging`): frame bodies are logged at debug level on
//!   both ends of every channel, with credentials and tokens masked first.
//! - **Constants**: well-known ports, frame bounds, the match tick period
//!   and the board geometry baked into the snapshot format.

pub mod framing;
pub mod logging;
pub mod shutdown;
pub mod wire;

pub use framing::{read_frame, write_frame, MAX_FRAME_LEN};
pub use shutdown::shutdown_signal;

/// Default port of the state service.
pub const DEFAULT_STATE_PORT: u16 = 12977;

/// Default port of the lobby.
pub const DEFAULT_LOBBY_PORT: u16 = 13472;

/// Match runtimes listen on an ephemeral port scanned from this range.
pub const MATCH_PORT_MIN: u16 = 15000;
pub const MATCH_PORT_MAX: u16 = 60000;

/// How many candidate ports the allocator tries before giving up.
pub const MATCH_PORT_ATTEMPTS: u32 = 2000;

/// Gravity/broadcast period of a match, in milliseconds. Sent to clients in
/// the `WELCOME` frame so they can pace their rendering.
pub const GRAVITY_MS: u64 = 500;

/// Size of the piece bag announced in the `WELCOME` frame.
pub const BAG_SIZE: usize = 7;

/// Board geometry. The `SNAPSHOT` frame carries the board as
/// `BOARD_ROWS * BOARD_COLS` digits, row-major from the top.
pub const BOARD_ROWS: usize = 20;
pub const BOARD_COLS: usize = 10;
