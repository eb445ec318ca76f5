//! Shared signal disposition table
//!
//! One table per process, shared by reference across fork until the first
//! post-fork mutation (copy-on-unshare) and replaced by a reset copy on
//! exec. The refcount is the `Arc` strong count; it always equals the
//! number of processes currently sharing the table.

use alloc::sync::Arc;

use spin::Mutex;

use crate::errno::Errno;
use crate::kernel::Kernel;
use crate::process::process::PsFlags;
use crate::process::thread::Thread;
use crate::signal::constants::*;
use crate::signal::types::{AltStack, SaFlags, SigAction, SigHandler, SigSet};

#[derive(Clone)]
struct SigActsInner {
    /// Per-signal actions, index `sig - 1`
    actions: [SigAction; NSIG as usize],
    /// Signals effectively ignored (explicit SIG_IGN, or default action
    /// with an ignore-class default)
    sig_ignore: SigSet,
    /// Signals with a user handler installed
    sig_catch: SigSet,
    alt_stack: AltStack,
}

/// Signal disposition table.
pub struct SigActs {
    inner: Mutex<SigActsInner>,
}

impl SigActs {
    /// Fresh table: every action default, ignore-class defaults
    /// pre-entered in the ignore bitmap (except SIGCONT, which posting
    /// treats specially).
    pub fn new() -> Arc<SigActs> {
        let mut ignore = SigSet::empty();
        for sig in 1..=NSIG {
            if sig_properties(sig).contains(SigProp::IGNORE) && sig != SIGCONT {
                ignore.insert(sig);
            }
        }
        Arc::new(SigActs {
            inner: Mutex::new(SigActsInner {
                actions: [SigAction::default(); NSIG as usize],
                sig_ignore: ignore,
                sig_catch: SigSet::empty(),
                alt_stack: AltStack::default(),
            }),
        })
    }

    /// Number of processes sharing this table.
    pub fn refcount(this: &Arc<SigActs>) -> usize {
        Arc::strong_count(this)
    }

    /// Copy-on-unshare: replace `slot` with a private copy if anyone else
    /// still shares it, and return the (now exclusive) handle.
    pub fn unshared(slot: &mut Arc<SigActs>) -> Arc<SigActs> {
        if Arc::strong_count(slot) > 1 {
            let copy = slot.inner.lock().clone();
            *slot = Arc::new(SigActs {
                inner: Mutex::new(copy),
            });
        }
        slot.clone()
    }

    /// Configured action for a signal.
    pub fn action(&self, sig: u32) -> SigAction {
        debug_assert!(is_valid_signal(sig));
        self.inner.lock().actions[(sig - 1) as usize]
    }

    /// Effectively-ignored bitmap.
    pub fn ignore_set(&self) -> SigSet {
        self.inner.lock().sig_ignore
    }

    /// Caught bitmap.
    pub fn catch_set(&self) -> SigSet {
        self.inner.lock().sig_catch
    }

    pub fn alt_stack(&self) -> AltStack {
        self.inner.lock().alt_stack
    }

    pub fn set_alt_stack(&self, stack: AltStack) {
        self.inner.lock().alt_stack = stack;
    }

    fn install(inner: &mut SigActsInner, sig: u32, action: SigAction) {
        inner.actions[(sig - 1) as usize] = action;
        inner.sig_ignore.remove(sig);
        inner.sig_catch.remove(sig);
        match action.handler {
            SigHandler::Ignore => inner.sig_ignore.insert(sig),
            SigHandler::Catch(_) => inner.sig_catch.insert(sig),
            SigHandler::Default => {
                if sig_properties(sig).contains(SigProp::IGNORE) && sig != SIGCONT {
                    inner.sig_ignore.insert(sig);
                }
            }
        }
    }

    /// Revert one signal to its default action, rebuilding the derived
    /// bitmaps. Used by reset-on-catch delivery and by exec.
    pub(crate) fn reset_to_default(&self, sig: u32) {
        let mut inner = self.inner.lock();
        Self::install(&mut inner, sig, SigAction::default());
    }

    /// Exec reset: every caught signal reverts to default (ignore-class
    /// defaults re-enter the ignore bitmap, except SIGCONT); explicitly
    /// ignored signals stay ignored; the alternate stack is cleared.
    pub(crate) fn exec_reset(&self) {
        let mut inner = self.inner.lock();
        for sig in 1..=NSIG {
            if inner.sig_catch.contains(sig) {
                Self::install(&mut inner, sig, SigAction::default());
            }
        }
        inner.alt_stack = AltStack::default();
    }
}

/// Install a signal action for the calling thread's process.
///
/// Returns the previous action. KILL and STOP are never configurable;
/// the table is unshared before the write so a forked sibling keeps its
/// own view. Setting a signal to ignore (other than CONT) discards any
/// already-pending instance process-wide.
pub fn set_signal_action(
    kern: &Kernel,
    td: &Arc<Thread>,
    sig: u32,
    action: SigAction,
) -> Result<SigAction, Errno> {
    if !is_valid_signal(sig) || !is_catchable(sig) {
        return Err(Errno::Einval);
    }

    let _g = kern.sched_lock();
    let proc = td.process();
    let mut inner = proc.inner.lock();
    let acts = SigActs::unshared(&mut inner.sigacts);
    let threads = inner.threads.clone();
    drop(inner);

    let old = {
        let mut table = acts.inner.lock();
        let old = table.actions[(sig - 1) as usize];
        SigActs::install(&mut table, sig, action);
        old
    };

    if sig == SIGCHLD {
        // SIGCHLD configuration doubles as child-handling policy: it
        // controls stop notifications and whether dying children are
        // handed straight to the reaper.
        if action.flags.contains(SaFlags::NOCLDSTOP) {
            proc.flags.set(PsFlags::NOCLDSTOP);
        } else {
            proc.flags.clear(PsFlags::NOCLDSTOP);
        }
        if action.flags.contains(SaFlags::NOCLDWAIT) || action.is_ignore() {
            proc.flags.set(PsFlags::NOCLDWAIT);
        } else {
            proc.flags.clear(PsFlags::NOCLDWAIT);
        }
    }

    if acts.ignore_set().contains(sig) && sig != SIGCONT {
        proc.pending.clear(sig);
        for q in &threads {
            q.pending.clear(sig);
        }
    }

    Ok(old)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::test_kernel;

    fn catch(addr: u64) -> SigAction {
        SigAction {
            handler: SigHandler::Catch(addr),
            mask: SigSet::empty(),
            flags: SaFlags::empty(),
        }
    }

    #[test]
    fn kill_and_stop_are_rejected() {
        let kern = test_kernel();
        let p = kern.table.new_process("a", crate::process::cred::Credentials::root(), None);
        let td = p.main_thread();
        for sig in [SIGKILL, SIGSTOP, 0, NSIG + 1] {
            assert_eq!(
                set_signal_action(&kern, &td, sig, SigAction::default()),
                Err(Errno::Einval)
            );
        }
        let acts = p.sigacts();
        assert!(!acts.ignore_set().contains(SIGKILL));
        assert!(!acts.catch_set().contains(SIGSTOP));
        assert!(acts.action(SIGKILL).is_default());
    }

    #[test]
    fn ignoring_discards_pending_instances() {
        let kern = test_kernel();
        let p = kern.table.new_process("a", crate::process::cred::Credentials::root(), None);
        let td = p.main_thread();
        p.pending.set(SIGUSR1);
        td.pending.set(SIGUSR1);

        let ign = SigAction {
            handler: SigHandler::Ignore,
            mask: SigSet::empty(),
            flags: SaFlags::empty(),
        };
        set_signal_action(&kern, &td, SIGUSR1, ign).unwrap();
        assert!(!p.pending.contains(SIGUSR1));
        assert!(!td.pending.contains(SIGUSR1));
        assert!(p.sigacts().ignore_set().contains(SIGUSR1));
    }

    #[test]
    fn first_write_after_fork_unshares() {
        let kern = test_kernel();
        let parent = kern.table.new_process("a", crate::process::cred::Credentials::root(), None);
        let ptd = parent.main_thread();
        let child = kern.table.fork(&ptd);
        assert_eq!(SigActs::refcount(&parent.sigacts()), 3); // 2 owners + this handle

        set_signal_action(&kern, &child.main_thread(), SIGTERM, catch(0x1000)).unwrap();
        assert!(!Arc::ptr_eq(&parent.sigacts(), &child.sigacts()));
        assert!(parent.sigacts().action(SIGTERM).is_default());
        assert!(child.sigacts().catch_set().contains(SIGTERM));
    }

    #[test]
    fn exec_reset_reverts_caught_keeps_ignored() {
        let kern = test_kernel();
        let p = kern.table.new_process("a", crate::process::cred::Credentials::root(), None);
        let td = p.main_thread();
        set_signal_action(&kern, &td, SIGTERM, catch(0x1000)).unwrap();
        let ign = SigAction {
            handler: SigHandler::Ignore,
            mask: SigSet::empty(),
            flags: SaFlags::empty(),
        };
        set_signal_action(&kern, &td, SIGHUP, ign).unwrap();
        p.sigacts().set_alt_stack(AltStack {
            base: 0x7000_0000,
            size: 8192,
            enabled: true,
            on_stack: false,
        });

        let acts = p.sigacts();
        acts.exec_reset();
        assert!(acts.action(SIGTERM).is_default());
        assert!(!acts.catch_set().contains(SIGTERM));
        assert!(acts.action(SIGHUP).is_ignore());
        assert!(acts.ignore_set().contains(SIGHUP));
        assert!(!acts.alt_stack().enabled);
        // Ignore-class defaults come back to the ignore bitmap
        assert!(acts.ignore_set().contains(SIGCHLD));
    }

    #[test]
    fn sigchld_flags_drive_child_policy() {
        let kern = test_kernel();
        let p = kern.table.new_process("a", crate::process::cred::Credentials::root(), None);
        let td = p.main_thread();

        let act = SigAction {
            handler: SigHandler::Ignore,
            mask: SigSet::empty(),
            flags: SaFlags::NOCLDSTOP,
        };
        set_signal_action(&kern, &td, SIGCHLD, act).unwrap();
        assert!(p.flags.contains(PsFlags::NOCLDSTOP));
        assert!(p.flags.contains(PsFlags::NOCLDWAIT));

        set_signal_action(&kern, &td, SIGCHLD, SigAction::default()).unwrap();
        assert!(!p.flags.contains(PsFlags::NOCLDSTOP));
        assert!(!p.flags.contains(PsFlags::NOCLDWAIT));
    }
}
