//! Core dump orchestration and fatal termination
//!
//! Decides whether a fatal signal produces a core dump, enforces the
//! placement and ownership policy, and drives the format-specific writer
//! through an abstract I/O context. The filesystem itself stays outside:
//! the `CoreFs` collaborator opens the target and answers the metadata
//! questions the post-open verification asks.

use alloc::boxed::Box;
use alloc::format;
use alloc::string::String;
use alloc::sync::Arc;

use crate::errno::Errno;
use crate::kernel::{Kernel, WaitChannel};
use crate::process::cred::Uid;
use crate::process::process::{ExitStatus, Process, PsFlags};
use crate::process::thread::{RunState, Thread, ThreadFlags};
use crate::signal::constants::{sig_properties, signal_name, SigProp, SIGCHLD};
use crate::signal::post;
use crate::signal::single_thread::{single_thread_clear, single_thread_set, SingleMode};
use crate::signal::types::SigInfo;

/// Where core dumps of privilege-elevated processes may go.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CoredumpPolicy {
    /// Never dump a set-id process (unless the superuser asks)
    Refuse,
    /// Dump as `<dir>/<name>.core` in the fixed crash directory
    FlatNamed,
    /// Dump as `<dir>/<pid>/<name>.core`, one subdirectory per pid
    PerPidSubdir,
}

/// Byte sink of an open dump target.
pub trait DumpIo {
    fn write(&mut self, bytes: &[u8]) -> Result<(), Errno>;
    /// Release an address range that has been written out
    fn unmap(&mut self, start: u64, end: u64) -> Result<(), Errno>;
}

/// An opened dump target, with the metadata the orchestrator verifies
/// before trusting it.
pub trait DumpVnode {
    fn is_regular(&self) -> bool;
    fn link_count(&self) -> u32;
    fn owner_uid(&self) -> Uid;
    fn truncate(&mut self) -> Result<(), Errno>;
    fn io(&mut self) -> &mut dyn DumpIo;
}

/// Filesystem collaborator: opens the dump path create-exclusive-ish and
/// without following symlinks. Everything else about the filesystem is
/// out of scope here.
pub trait CoreFs: Send + Sync {
    fn open_dump(&self, path: &str) -> Result<Box<dyn DumpVnode>, Errno>;
}

/// Format-specific core writer collaborator.
pub trait CoreWriter: Send + Sync {
    fn write_core(&self, io: &mut dyn DumpIo, td: &Arc<Thread>, limit: u64) -> Result<(), Errno>;
}

/// Terminate the process on a fatal signal.
///
/// For core-class signals the process is first single-threaded so the
/// writer sees a consistent image, then the dump is attempted. The
/// termination itself never depends on the dump outcome; a policy
/// violation only costs the core file.
pub fn sig_exit(kern: &Kernel, td: &Arc<Thread>, signum: u32) {
    let proc = td.process();
    {
        let _g = kern.sched_lock();
        if proc.flags.contains(PsFlags::EXITING) {
            // Another thread is already tearing the process down.
            return;
        }
        proc.flags.set(PsFlags::EXITING);
    }

    let mut core = false;
    if sig_properties(signum).contains(SigProp::CORE) {
        proc.flags.set(PsFlags::COREDUMP);
        {
            let _g = kern.sched_lock();
            let mut ts = td.sig.lock();
            if ts.trap.is_none() {
                ts.trap = Some(SigInfo::new(signum));
            }
        }
        if single_thread_set(kern, td, SingleMode::Suspend, false).is_ok() {
            match dump(kern, td) {
                Ok(()) => core = true,
                Err(err) => log::warn!(
                    "pid {} core dump failed: {:?}",
                    proc.id().as_u64(),
                    err
                ),
            }
            single_thread_clear(kern, td, ThreadFlags::empty());
        }
        proc.flags.clear(PsFlags::COREDUMP);
    }

    exit_process(kern, td, ExitStatus { signum, core });
}

/// Final teardown: record the status, kill every thread, hand children
/// to the reaper, and tell the parent.
fn exit_process(kern: &Kernel, td: &Arc<Thread>, status: ExitStatus) {
    let proc = td.process();
    let parent;
    {
        let g = kern.sched_lock();
        {
            let mut inner = proc.inner.lock();
            inner.exit_status = Some(status);
            inner.single = None;
        }
        for q in proc.threads() {
            let mut qs = q.sig.lock();
            qs.run_state = RunState::Dead;
            qs.flags.insert(ThreadFlags::WEXIT);
            if let Some(ch) = qs.wchan.take() {
                kern.sleep.wakeup(ch);
            }
        }
        kern.table.reparent_children(&proc);
        parent = proc.parent_pid().and_then(|pp| kern.table.get(pp));
        if let Some(parent) = &parent {
            if parent.flags.contains(PsFlags::NOCLDWAIT) {
                // Parent won't wait: this process goes straight to the
                // reaper instead of lingering for it.
                if let Some(reaper) = kern.table.reaper() {
                    proc.inner.lock().parent = Some(reaper);
                }
            } else {
                post::post_to_process_locked(kern, &g, None, parent, SIGCHLD);
            }
        }
    }
    log::info!(
        "pid {} terminated by {}{}",
        proc.id().as_u64(),
        signal_name(status.signum),
        if status.core { " (core dumped)" } else { "" }
    );
    if let Some(parent) = parent {
        kern.sleep.wakeup(WaitChannel::ChildWait(parent.id()));
    }
}

fn dump_path(kern: &Kernel, proc: &Arc<Process>) -> Result<String, Errno> {
    if !proc.flags.contains(PsFlags::SUGID) || proc.cred.is_superuser() {
        return Ok(format!("{}.core", proc.name));
    }
    // Set-id processes may hold secrets of the elevated identity; their
    // cores only go where the administrator said they may.
    match kern.config.coredump {
        CoredumpPolicy::Refuse => Err(Errno::Eperm),
        CoredumpPolicy::FlatNamed => {
            Ok(format!("{}/{}.core", kern.config.crash_dir, proc.name))
        }
        CoredumpPolicy::PerPidSubdir => Ok(format!(
            "{}/{}/{}.core",
            kern.config.crash_dir,
            proc.id().as_u64(),
            proc.name
        )),
    }
}

/// Write the core file for the (already single-threaded) process.
pub fn dump(kern: &Kernel, td: &Arc<Thread>) -> Result<(), Errno> {
    let proc = td.process();
    let path = dump_path(kern, &proc)?;

    let limit = proc.inner.lock().limits.core_size;
    if limit == 0 {
        return Err(Errno::Efbig);
    }

    let mut vnode = kern.corefs.open_dump(&path)?;
    // The open raced with nothing we control: check that what we got is
    // a plain file nobody aliased or slipped underneath us.
    if !vnode.is_regular() || vnode.link_count() != 1 || vnode.owner_uid() != proc.cred.uid {
        log::warn!("pid {} refusing suspicious core target {}", proc.id().as_u64(), path);
        return Err(Errno::Eacces);
    }
    vnode.truncate()?;
    kern.writer.write_core(vnode.io(), td, limit)
}
