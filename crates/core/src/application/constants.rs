// Queue manager constants (no magic values)
use std::time::Duration;

/// Pause after the engine starts so schema creation settles before use (2s)
pub const SCHEMA_SETTLE_DELAY: Duration = Duration::from_secs(2);

/// Window used for the throughput figure (60s)
pub const THROUGHPUT_WINDOW: Duration = Duration::from_secs(60);
