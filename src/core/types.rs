/*!
 * Core Types
 * Common types used across the crate
 */

use std::time::Duration;

/// Exit code of a terminated child process.
///
/// Signal deaths are folded into the same domain: on Unix a child killed by
/// signal S reports S here, matching the status the kernel delivers.
pub type ExitCode = i32;

/// Polling granularity for timed waits.
pub(crate) const POLL_INTERVAL: Duration = Duration::from_millis(50);
