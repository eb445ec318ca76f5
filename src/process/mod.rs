//! Process and thread model
//!
//! The signal subsystem's view of processes: identity and credentials,
//! per-process and per-thread signal state, and the injected process
//! table registry.

pub mod cred;
pub mod manager;
pub mod process;
pub mod thread;

pub use cred::Credentials;
pub use manager::ProcessTable;
pub use process::{ExitStatus, Pid, Process, PsFlags};
pub use thread::{RunState, Thread, ThreadFlags, Tid};
