pub mod envelope;
pub mod frame;
pub mod match_msg;
pub mod session_msg;
pub mod store_msg;

/// Current match protocol version, carried in HELLO.
pub const PROTOCOL_VERSION: u32 = 1;

/// Default listen port for the persistence service.
pub const DEFAULT_STORE_PORT: u16 = 10001;

/// Default listen port for the session service.
pub const DEFAULT_SESSION_PORT: u16 = 10002;

/// Base of the port pool match servers are allocated from.
pub const DEFAULT_MATCH_PORT_BASE: u16 = 10100;

/// Snapshot broadcast frequency of the match tick loop.
pub const TICK_HZ: u32 = 10;

/// Default gravity interval.
pub const GRAVITY_DROP_MS: u64 = 500;

/// Deadline for both players to complete HELLO, measured from the first
/// inbound connection.
pub const HANDSHAKE_TIMEOUT_SECS: u64 = 30;

/// Liveness read timeout on service connections.
pub const READ_IDLE_TIMEOUT_SECS: u64 = 300;
