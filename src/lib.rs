/*!
 * subspawn
 * Cross-platform subprocess execution with explicit stream redirection,
 * lifecycle control and deadlock-free communicate
 */

pub mod communicate;
pub mod config;
pub mod core;
pub mod env;
pub mod exec;
pub mod io;
pub mod process;

mod spawn;

pub use crate::communicate::CommunicateResult;
pub use crate::config::{LaunchConfig, LaunchConfigBuilder, Redirect};
pub use crate::core::errors::{Error, Result};
pub use crate::core::types::ExitCode;
pub use crate::env::Environment;
pub use crate::exec::Exec;
pub use crate::io::{HandleReader, HandleWriter, SharedHandle};
pub use crate::process::Process;
