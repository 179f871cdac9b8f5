/*!
 * I/O Module
 * Shared descriptor handles and derived streams
 */

pub mod handle;
pub mod stream;

#[cfg(unix)]
pub(crate) mod unix;
#[cfg(unix)]
pub(crate) use unix as platform;

#[cfg(windows)]
pub(crate) mod windows;
#[cfg(windows)]
pub(crate) use windows as platform;

pub use handle::SharedHandle;
pub use platform::RawDescriptor;
pub use stream::{lines, HandleReader, HandleWriter};
