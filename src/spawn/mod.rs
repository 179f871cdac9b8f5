/*!
 * Spawn Engine
 * Per-platform process creation behind a common interface
 */

use crate::io::SharedHandle;
use std::sync::Arc;

#[cfg(unix)]
mod unix;
#[cfg(unix)]
pub(crate) use unix::{spawn, ChildHandle};

#[cfg(windows)]
mod windows;
#[cfg(windows)]
pub(crate) use windows::{spawn, ChildHandle};

/// Result of a successful spawn: the native child reference plus the
/// parent-side stream handles (present only for piped streams).
#[derive(Debug)]
pub(crate) struct SpawnedChild {
    pub(crate) child: ChildHandle,
    pub(crate) stdin: Option<Arc<SharedHandle>>,
    pub(crate) stdout: Option<Arc<SharedHandle>>,
    pub(crate) stderr: Option<Arc<SharedHandle>>,
}
