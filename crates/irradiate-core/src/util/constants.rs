use std::time::Duration;

/// Bytes per mebibyte
pub const MIB: u64 = 1 << 20;

/// Lower bound of the mean wait between two flip batches (20 ms).
///
/// Above the corresponding rate, flips are grouped into batches instead of
/// shortening the wait any further.
pub const MIN_INTERVAL: Duration = Duration::from_millis(20);

/// Number of fresh addresses tried for a single flip before it is abandoned
pub const MAX_FLIP_RETRIES: usize = 100;

/// Wait before retrying a cycle that failed with a recoverable error
pub const RETRY_BACKOFF: Duration = Duration::from_millis(20);

/// Wait used for cycles without any readable memory
pub const IDLE_INTERVAL: Duration = Duration::from_secs(1);
