//! Signal delivery and thread-quiescing core
//!
//! A kernel-side implementation of POSIX signal semantics: posting with
//! permission checks and run-state reactions, shared refcounted
//! dispositions, stop/continue job control, single-thread quiescing for
//! exec/exit/ptrace/core-dump, delivery at the kernel/user boundary, and
//! the core-dump trigger path.
//!
//! The surrounding kernel plugs in through a handful of seams:
//! - an injected [`process::ProcessTable`] registry (no globals)
//! - the [`kernel::SleepWake`] sleep/wakeup primitive
//! - the [`kernel::UserDelivery`] handler trampoline
//! - the [`signal::coredump::CoreFs`] / [`signal::coredump::CoreWriter`]
//!   dump collaborators
//!
//! The contract on the embedder's trap/syscall-return path is a single
//! call: [`signal::delivery::drain_at_boundary`] before resuming user
//! code. Everything else flows from posting entry points in
//! [`signal::post`] and the call contracts in [`syscall::signal`].

#![cfg_attr(not(test), no_std)]

extern crate alloc;

pub mod errno;
pub mod kernel;
pub mod process;
pub mod signal;
pub mod syscall;

#[cfg(test)]
pub(crate) mod testutil;

pub use errno::Errno;
pub use kernel::{Kernel, KernelConfig, SleepOutcome, SleepWake, UserDelivery, WaitChannel};
pub use process::{Credentials, ExitStatus, Pid, Process, ProcessTable, RunState, Thread, Tid};
pub use signal::types::{AltStack, SaFlags, SigAction, SigHandler, SigInfo, SigSet};
