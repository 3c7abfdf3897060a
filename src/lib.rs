//! Run a directory of scripts, one at a time, inside one interactive shell.
//!
//! Scripts are ordered by the number encoded in their file names, started
//! through their own shebang interpreter in a subshell of a long-lived PTY
//! session, and watched until they exit. Their output, errors and the
//! operator's input are routed through a pluggable [`presenter::Presenter`].
//!
//! Unix only: process liveness and stdio readiness go through `kill(2)` and
//! `poll(2)`.

#[cfg(not(unix))]
compile_error!("scriptrun supports unix platforms only");

pub mod cli;
pub mod collection;
pub mod config;
pub mod error_buffer;
pub mod errors;
pub mod executor;
pub mod log;
pub mod poll;
pub mod presenter;
pub mod process;
pub mod runner;
pub mod script;
pub mod shell;
