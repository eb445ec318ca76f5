//! Signal handling core
//!
//! This module implements POSIX-compatible signal semantics end to end:
//! - Signal constants and property classes (`constants`)
//! - Signal sets, actions, and trap metadata (`types`)
//! - The shared, refcounted disposition table (`disposition`)
//! - Posting, permissions, and run-state reactions (`post`)
//! - Delivery at the kernel/user boundary (`delivery`)
//! - Stop/continue job control and the parent sweep (`stop`)
//! - Single-thread quiescing for exec/exit/ptrace/coredump (`single_thread`)
//! - Core dump policy and orchestration (`coredump`)

pub mod constants;
pub mod coredump;
pub mod delivery;
pub mod disposition;
pub mod post;
pub mod single_thread;
pub mod stop;
pub mod types;

pub use types::*;
