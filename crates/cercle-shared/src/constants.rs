/// Supervisor sweep period: ages sessions, retries dials, revives endpoints.
pub const TICK_INTERVAL_MS: u64 = 5_000;

/// Idle time on an open session after which a PING is sent.
pub const PING_IDLE_MS: i64 = 15_000;

/// Idle time after which an open session is considered dead and closed.
pub const SESSION_TIMEOUT_MS: i64 = 30_000;

/// Time a dial may stay in flight before it is abandoned.
pub const DIAL_TIMEOUT_MS: i64 = 15_000;

/// Grace period between the goodbye broadcast and endpoint destruction.
pub const LEAVE_GRACE_MS: u64 = 500;

/// Display name of a joined group until the genesis event arrives.
pub const JOINING_PLACEHOLDER: &str = "Joining…";

/// Persistence key of the single state blob.
pub const STATE_KEY: &str = "APP_STATE";

/// Upper bound on a single wire frame (1 MiB).
pub const MAX_FRAME_SIZE: usize = 1_048_576;
