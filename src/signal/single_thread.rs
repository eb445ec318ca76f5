//! Single-thread coordination
//!
//! Quiesces every sibling of a process down to one driver thread for
//! operations that need a consistent process-wide view: exec, exit,
//! ptrace attach, and the core-dump snapshot. The driver starts an
//! episode, siblings fall into a checkpoint at their next kernel/user
//! boundary, and the driver proceeds once the countdown of still-running
//! siblings reaches zero.

use alloc::sync::Arc;

use crate::errno::Errno;
use crate::kernel::{Kernel, WaitChannel};
use crate::process::thread::{RunState, Thread, ThreadFlags, Tid};
use crate::signal::stop::{resume_thread, setrunnable};

/// What the episode quiesces for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SingleMode {
    /// Park siblings; they resume when the episode ends (exec, coredump)
    Suspend,
    /// Like suspend, but the driver does not wait for the countdown
    Ptrace,
    /// Siblings unwind out of the kernel before parking
    Unwind,
    /// Siblings terminate at their checkpoint
    Exit,
}

/// An active quiesce episode. At most one per process.
#[derive(Debug)]
pub struct SingleThreadEpisode {
    pub driver: Tid,
    pub mode: SingleMode,
    /// Siblings that still have to reach their checkpoint
    pub pending: u32,
}

/// Begin a single-thread episode with `td` as the driver.
///
/// If another driver's episode is already active, the caller first
/// quiesces itself through the checkpoint (propagating the restart or
/// interrupt indication for deep unwind/exit modes) and then retries.
/// Except in ptrace mode the call blocks until every counted sibling has
/// checked in.
pub fn single_thread_set(
    kern: &Kernel,
    td: &Arc<Thread>,
    mode: SingleMode,
    deep: bool,
) -> Result<(), Errno> {
    let proc = td.process();
    loop {
        {
            let g = kern.sched_lock();
            let mut inner = proc.inner.lock();
            match &inner.single {
                Some(ep) if ep.driver != td.id() => {
                    drop(inner);
                    drop(g);
                    single_thread_check(kern, td, deep)?;
                    continue;
                }
                Some(_) => panic!("nested single-thread episode"),
                None => {}
            }

            let mut count = 0u32;
            let threads = inner.threads.clone();
            for q in threads.iter().filter(|q| q.id() != td.id()) {
                let mut qs = q.sig.lock();
                if qs.run_state == RunState::Dead || qs.flags.contains(ThreadFlags::WEXIT) {
                    continue;
                }
                qs.flags.insert(ThreadFlags::SUSPSINGLE);
                match qs.run_state {
                    RunState::Runnable => count += 1,
                    RunState::OnCpu => {
                        count += 1;
                        kern.signotify(q);
                    }
                    RunState::SleepUninterruptible => {
                        // Checks in when the sleep finishes.
                        count += 1;
                    }
                    RunState::SleepInterruptible => match mode {
                        SingleMode::Suspend | SingleMode::Ptrace => {
                            // Already quiescent: lift it straight into the
                            // parked state, no checkpoint needed.
                            qs.prior_state = Some(RunState::SleepInterruptible);
                            qs.run_state = RunState::Stopped;
                            qs.flags.remove(ThreadFlags::SINTR);
                        }
                        SingleMode::Unwind | SingleMode::Exit => {
                            count += 1;
                            setrunnable(kern, &g, q, &mut qs);
                        }
                    },
                    RunState::Stopped => {
                        if mode == SingleMode::Exit {
                            // Must run to terminate itself.
                            count += 1;
                            qs.flags.remove(ThreadFlags::SUSPSIG);
                            setrunnable(kern, &g, q, &mut qs);
                        }
                        // Otherwise it is already parked; leave it.
                    }
                    RunState::Dead => {}
                }
            }
            inner.single = Some(SingleThreadEpisode {
                driver: td.id(),
                mode,
                pending: count,
            });
            log::debug!(
                "single-thread {:?} on pid {}: {} sibling(s) to quiesce",
                mode,
                proc.id().as_u64(),
                count
            );
        }

        if mode != SingleMode::Ptrace {
            let chan = WaitChannel::SingleThread(proc.id());
            loop {
                {
                    let _g = kern.sched_lock();
                    let inner = proc.inner.lock();
                    match &inner.single {
                        Some(ep) if ep.pending == 0 => break,
                        Some(_) => {}
                        None => break,
                    }
                }
                kern.sleep.sleep(chan, None);
            }
        }
        return Ok(());
    }
}

/// Checkpoint for non-driver threads, called at every kernel/user
/// boundary. Returns `Ok` when no episode (or our own) is active.
///
/// Deep callers are partway through a syscall: an unwind episode sends
/// them back out with a restart indication instead of parking them here.
/// In exit mode the thread terminates on the spot.
pub fn single_thread_check(kern: &Kernel, td: &Arc<Thread>, deep: bool) -> Result<(), Errno> {
    let proc = td.process();
    loop {
        let mode = {
            let _g = kern.sched_lock();
            let inner = proc.inner.lock();
            match &inner.single {
                Some(ep) if ep.driver != td.id() => ep.mode,
                _ => return Ok(()),
            }
        };

        if deep {
            match mode {
                SingleMode::Unwind => return Err(Errno::Erestart),
                SingleMode::Exit => return Err(Errno::Eintr),
                _ => {}
            }
        }

        {
            let _g = kern.sched_lock();
            let mut inner = proc.inner.lock();
            let Some(ep) = inner.single.as_mut() else {
                continue;
            };
            if ep.driver == td.id() {
                return Ok(());
            }
            if ep.pending > 0 {
                ep.pending -= 1;
            }
            let done = ep.pending == 0;
            let exiting = mode == SingleMode::Exit;
            drop(inner);

            {
                let mut ts = td.sig.lock();
                if exiting {
                    ts.run_state = RunState::Dead;
                    ts.flags.insert(ThreadFlags::WEXIT);
                    ts.flags.remove(ThreadFlags::SUSPSINGLE);
                } else {
                    ts.run_state = RunState::Stopped;
                }
            }
            if done {
                kern.sleep.wakeup(WaitChannel::SingleThread(proc.id()));
            }
            if exiting {
                log::debug!("thread {} exiting at single-thread checkpoint", td.id().as_u64());
                return Err(Errno::Eintr);
            }
        }

        // Park until the driver releases us, then look again: a new
        // episode may already be starting.
        let chan = WaitChannel::ThreadPark(td.id());
        loop {
            {
                let _g = kern.sched_lock();
                let mut ts = td.sig.lock();
                if !ts.flags.contains(ThreadFlags::SUSPSINGLE) {
                    ts.wchan = None;
                    break;
                }
                ts.wchan = Some(chan);
            }
            kern.sleep.sleep(chan, None);
        }
    }
}

/// End the episode. Every thread held solely for it - not also carrying
/// one of the `preserve` flags - is resumed to runnable or the sleep it
/// was lifted out of.
pub fn single_thread_clear(kern: &Kernel, td: &Arc<Thread>, preserve: ThreadFlags) {
    let proc = td.process();
    let g = kern.sched_lock();
    let mut inner = proc.inner.lock();
    match inner.single.take() {
        Some(ep) if ep.driver == td.id() => {}
        _ => panic!("single_thread_clear by a thread that is not the driver"),
    }
    let threads = inner.threads.clone();
    drop(inner);

    for q in threads.iter().filter(|q| q.id() != td.id()) {
        let mut qs = q.sig.lock();
        if !qs.flags.contains(ThreadFlags::SUSPSINGLE) {
            continue;
        }
        qs.flags.remove(ThreadFlags::SUSPSINGLE);
        if qs.run_state == RunState::Stopped && !qs.flags.intersects(preserve) {
            resume_thread(kern, &g, q, &mut qs);
        }
    }
}

/// Whether an episode by some other thread currently holds this process.
pub fn single_thread_active(td: &Arc<Thread>) -> bool {
    let proc = td.process();
    let inner = proc.inner.lock();
    matches!(&inner.single, Some(ep) if ep.driver != td.id())
}
