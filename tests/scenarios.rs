//! End-to-end signal scenarios
//!
//! Each test wires a kernel with fake collaborators and drives the whole
//! path: syscall contract -> poster -> run-state reaction -> boundary
//! drain -> default action or trampoline.

use std::sync::{Arc, Condvar, Mutex};
use std::time::{Duration, Instant};

use ksignal::kernel::{Kernel, KernelConfig, SleepOutcome, SleepWake, UserDelivery, WaitChannel};
use ksignal::process::{Credentials, PsFlags, RunState};
use ksignal::signal::constants::*;
use ksignal::signal::coredump::{CoreFs, CoreWriter, DumpIo, DumpVnode};
use ksignal::signal::delivery::{drain_at_boundary, handle_trap, next_deliverable};
use ksignal::signal::single_thread::{single_thread_check, single_thread_clear, single_thread_set, SingleMode};
use ksignal::signal::stop::stop_sweep;
use ksignal::signal::types::{SaFlags, SigAction, SigHandler, SigInfo, SigSet};
use ksignal::syscall::signal::{sys_kill, sys_sigaction, sys_sigtimedwait};
use ksignal::Errno;
use ksignal::Thread;

// --- collaborator fakes ----------------------------------------------------

struct CondSleep {
    gen: Mutex<u64>,
    cv: Condvar,
}

impl CondSleep {
    fn new() -> Self {
        CondSleep {
            gen: Mutex::new(0),
            cv: Condvar::new(),
        }
    }
}

impl SleepWake for CondSleep {
    fn sleep(&self, _chan: WaitChannel, timeout_ticks: Option<u64>) -> SleepOutcome {
        let start = Instant::now();
        let mut gen = self.gen.lock().unwrap();
        let seen = *gen;
        loop {
            if *gen != seen {
                return SleepOutcome::Woken;
            }
            if let Some(ticks) = timeout_ticks {
                if start.elapsed() >= Duration::from_millis(ticks) {
                    return SleepOutcome::TimedOut;
                }
            }
            if start.elapsed() >= Duration::from_millis(500) {
                // Spurious return; wait sites re-check their predicates.
                return SleepOutcome::Woken;
            }
            let (g, _) = self.cv.wait_timeout(gen, Duration::from_millis(5)).unwrap();
            gen = g;
        }
    }

    fn wakeup(&self, _chan: WaitChannel) {
        *self.gen.lock().unwrap() += 1;
        self.cv.notify_all();
    }
}

#[derive(Debug, Clone)]
struct Delivery {
    signum: u32,
    handler: u64,
    restore_mask: SigSet,
    info: SigInfo,
}

struct RecUser {
    log: Arc<Mutex<Vec<Delivery>>>,
}

impl UserDelivery for RecUser {
    fn deliver_to_user(
        &self,
        _td: &Arc<Thread>,
        handler: u64,
        signum: u32,
        restore_mask: SigSet,
        info: &SigInfo,
        _on_alt_stack: bool,
    ) {
        self.log.lock().unwrap().push(Delivery {
            signum,
            handler,
            restore_mask,
            info: *info,
        });
    }
}

struct MemVnode {
    data: Arc<Mutex<Vec<u8>>>,
}

impl DumpIo for MemVnode {
    fn write(&mut self, bytes: &[u8]) -> Result<(), Errno> {
        self.data.lock().unwrap().extend_from_slice(bytes);
        Ok(())
    }

    fn unmap(&mut self, _start: u64, _end: u64) -> Result<(), Errno> {
        Ok(())
    }
}

impl DumpVnode for MemVnode {
    fn is_regular(&self) -> bool {
        true
    }

    fn link_count(&self) -> u32 {
        1
    }

    fn owner_uid(&self) -> u32 {
        5
    }

    fn truncate(&mut self) -> Result<(), Errno> {
        self.data.lock().unwrap().clear();
        Ok(())
    }

    fn io(&mut self) -> &mut dyn DumpIo {
        self
    }
}

struct MemCoreFs {
    data: Arc<Mutex<Vec<u8>>>,
}

impl CoreFs for MemCoreFs {
    fn open_dump(&self, _path: &str) -> Result<Box<dyn DumpVnode>, Errno> {
        Ok(Box::new(MemVnode {
            data: self.data.clone(),
        }))
    }
}

struct MarkerWriter;

impl CoreWriter for MarkerWriter {
    fn write_core(&self, io: &mut dyn DumpIo, _td: &Arc<Thread>, _limit: u64) -> Result<(), Errno> {
        io.write(b"CORE")
    }
}

struct Rig {
    kern: Arc<Kernel>,
    deliveries: Arc<Mutex<Vec<Delivery>>>,
    core: Arc<Mutex<Vec<u8>>>,
}

fn rig() -> Rig {
    let deliveries = Arc::new(Mutex::new(Vec::new()));
    let core = Arc::new(Mutex::new(Vec::new()));
    let kern = Kernel::new(
        KernelConfig::default(),
        Box::new(CondSleep::new()),
        Box::new(RecUser {
            log: deliveries.clone(),
        }),
        Box::new(MemCoreFs { data: core.clone() }),
        Box::new(MarkerWriter),
    );
    Rig {
        kern: Arc::new(kern),
        deliveries,
        core,
    }
}

fn wait_until(mut cond: impl FnMut() -> bool) {
    let start = Instant::now();
    while !cond() {
        assert!(start.elapsed() < Duration::from_secs(5), "condition timed out");
        std::thread::yield_now();
    }
}

// --- scenarios -------------------------------------------------------------

/// Scenario A: an untraced process stops itself. The stop consumes the
/// pending bit, the parent hears about it through SIGCHLD, and SIGCONT
/// brings the process back.
#[test]
fn self_stop_notifies_parent_and_continue_resumes() {
    let r = rig();
    let shell = r.kern.table.new_process("sh", Credentials::user(5, 5), None);
    // Shell watches its children; without a handler SIGCHLD is
    // default-ignored and dropped at post time.
    let watch = SigAction {
        handler: SigHandler::Catch(0xc41d),
        mask: SigSet::empty(),
        flags: SaFlags::empty(),
    };
    sys_sigaction(&r.kern, &shell.main_thread(), SIGCHLD, Some(watch)).unwrap();
    let job = r.kern.table.new_process("job", Credentials::user(5, 5), Some(&shell));
    let td = job.main_thread();

    sys_kill(&r.kern, &td, job.id().as_u64() as i64, SIGSTOP).unwrap();

    let kern = r.kern.clone();
    let td2 = td.clone();
    let worker = std::thread::spawn(move || drain_at_boundary(&kern, &td2));

    wait_until(|| td.run_state() == RunState::Stopped);
    assert!(!td.pending.contains(SIGSTOP));
    assert!(!job.pending.contains(SIGSTOP));

    stop_sweep(&r.kern);
    let shell_sees = shell.pending.load() | shell.main_thread().pending.load();
    assert!(shell_sees.contains(SIGCHLD));

    sys_kill(&r.kern, &shell.main_thread(), job.id().as_u64() as i64, SIGCONT).unwrap();
    wait_until(|| td.run_state() != RunState::Stopped);
    worker.join().unwrap().unwrap();
    assert!(job.flags.contains(PsFlags::CONTINUED));
}

/// Scenario B: a SIGTERM handler with mask {SIGINT} blocks SIGINT for
/// the handler's duration, hands the original mask back for restore,
/// and reset-on-catch reverts the disposition afterwards.
#[test]
fn handler_mask_and_reset_on_catch() {
    let r = rig();
    let init = r.kern.table.new_process("init", Credentials::root(), None);
    let p = r.kern.table.new_process("app", Credentials::user(5, 5), Some(&init));
    let td = p.main_thread();

    let act = SigAction {
        handler: SigHandler::Catch(0x4100),
        mask: SigSet::from_sig(SIGINT),
        flags: SaFlags::RESETHAND,
    };
    sys_sigaction(&r.kern, &td, SIGTERM, Some(act)).unwrap();

    sys_kill(&r.kern, &td, p.id().as_u64() as i64, SIGTERM).unwrap();
    drain_at_boundary(&r.kern, &td).unwrap();

    let log = r.deliveries.lock().unwrap();
    assert_eq!(log.len(), 1);
    assert_eq!(log[0].signum, SIGTERM);
    assert_eq!(log[0].handler, 0x4100);
    assert!(!log[0].restore_mask.contains(SIGINT));
    drop(log);

    let blocked = td.blocked();
    assert!(blocked.contains(SIGINT));
    assert!(blocked.contains(SIGTERM));
    assert!(p.sigacts().action(SIGTERM).is_default());
}

/// Scenario C: SIGKILL posted to an interruptibly sleeping thread makes
/// it runnable regardless of the blocked mask and outranks every other
/// pending signal at delivery.
#[test]
fn sigkill_wakes_sleepers_and_outranks_everything() {
    let r = rig();
    let init = r.kern.table.new_process("init", Credentials::root(), None);
    let p = r.kern.table.new_process("victim", Credentials::user(5, 5), Some(&init));
    let td = p.main_thread();
    {
        let mut ts = td.sig.lock();
        ts.run_state = RunState::SleepInterruptible;
        // Block everything blockable; KILL must not care.
        ts.blocked = !SigSet::empty() & !SigSet::from_bits(UNCATCHABLE_SIGNALS);
    }
    td.pending.set(SIGHUP);

    sys_kill(&r.kern, &init.main_thread(), p.id().as_u64() as i64, SIGKILL).unwrap();
    assert_eq!(td.run_state(), RunState::Runnable);

    assert_eq!(next_deliverable(&r.kern, &td), Some(SIGKILL));
    ksignal::signal::delivery::deliver(&r.kern, &td, SIGKILL);
    let status = p.exit_status().unwrap();
    assert_eq!(status.signum, SIGKILL);
    assert!(!status.core);
}

/// Scenario D: a privilege-elevated process takes a synchronous fault
/// with the signal blocked. Termination is immediate; the signal never
/// shows up in a pending set; no core is written for the set-id image.
#[test]
fn masked_fault_in_sugid_process_is_immediately_fatal() {
    let r = rig();
    let init = r.kern.table.new_process("init", Credentials::root(), None);
    let p = r.kern.table.new_process("setuid-app", Credentials::user(5, 5), Some(&init));
    p.flags.set(PsFlags::SUGID);
    let td = p.main_thread();
    td.sig.lock().blocked.insert(SIGBUS);

    handle_trap(&r.kern, &td, SIGBUS, 10, 2, 0xbad0_0000);

    let status = p.exit_status().expect("process must be dead");
    assert_eq!(status.signum, SIGBUS);
    assert!(!status.core, "set-id process must not dump by default");
    assert!(!td.pending.contains(SIGBUS));
    assert!(!p.pending.contains(SIGBUS));
    assert!(r.core.lock().unwrap().is_empty());
}

/// Scenario E: a process-directed signal lands on a thread that isn't
/// blocking it, not on the one that is.
#[test]
fn process_directed_signal_avoids_blocking_thread() {
    let r = rig();
    let init = r.kern.table.new_process("init", Credentials::root(), None);
    let p = r.kern.table.new_process("mt-app", Credentials::user(5, 5), Some(&init));
    let blocker = p.main_thread();
    let open = r.kern.table.new_thread(&p);
    blocker.sig.lock().blocked.insert(SIGUSR1);

    sys_kill(&r.kern, &init.main_thread(), p.id().as_u64() as i64, SIGUSR1).unwrap();

    assert!(!blocker.pending.contains(SIGUSR1));
    assert!(open.pending.contains(SIGUSR1));
}

/// A core-class signal on an ordinary process single-threads it, writes
/// the core through the collaborator, and tags the exit status.
#[test]
fn fatal_core_signal_dumps_through_the_collaborator() {
    let r = rig();
    let init = r.kern.table.new_process("init", Credentials::root(), None);
    let p = r.kern.table.new_process("crasher", Credentials::user(5, 5), Some(&init));
    let td = p.main_thread();
    td.pending.set(SIGQUIT);

    drain_at_boundary(&r.kern, &td).unwrap();

    let status = p.exit_status().unwrap();
    assert_eq!(status.signum, SIGQUIT);
    assert!(status.core);
    assert_eq!(&r.core.lock().unwrap()[..4], b"CORE");
    assert_eq!(td.run_state(), RunState::Dead);
}

/// Single-threading invariant: while a suspend episode is active every
/// non-driver thread is stopped (or checking in), and the driver is
/// released exactly when the countdown reaches zero.
#[test]
fn suspend_episode_quiesces_every_sibling() {
    let r = rig();
    let p = r.kern.table.new_process("mt-app", Credentials::user(5, 5), None);
    let driver = p.main_thread();
    let running = r.kern.table.new_thread(&p);
    let sleeper = r.kern.table.new_thread(&p);
    sleeper.sig.lock().run_state = RunState::SleepInterruptible;

    let kern = r.kern.clone();
    let d = driver.clone();
    let set_done = Arc::new(Mutex::new(false));
    let set_done2 = set_done.clone();
    let drv = std::thread::spawn(move || {
        single_thread_set(&kern, &d, SingleMode::Suspend, false).unwrap();
        *set_done2.lock().unwrap() = true;
    });

    // The runnable sibling reaches its boundary checkpoint once the
    // episode is registered.
    wait_until(|| p.inner.lock().single.is_some());
    let kern2 = r.kern.clone();
    let q = running.clone();
    let chk = std::thread::spawn(move || single_thread_check(&kern2, &q, false));

    wait_until(|| *set_done.lock().unwrap());
    drv.join().unwrap();

    // Invariant: all non-driver threads are quiescent.
    assert_eq!(running.run_state(), RunState::Stopped);
    assert_eq!(sleeper.run_state(), RunState::Stopped);

    single_thread_clear(&r.kern, &driver, ksignal::process::ThreadFlags::empty());
    chk.join().unwrap().unwrap();
    assert_eq!(running.run_state(), RunState::Runnable);
    assert_eq!(sleeper.run_state(), RunState::SleepInterruptible);
}

/// The poster prefers a thread parked in a matching sigtimedwait: the
/// waiter gets the signal and its metadata, nobody else sees it.
#[test]
fn sigtimedwait_attracts_process_directed_signals() {
    let r = rig();
    let init = r.kern.table.new_process("init", Credentials::root(), None);
    let p = r.kern.table.new_process("waiter-app", Credentials::user(5, 5), Some(&init));
    let other = p.main_thread();
    let waiter = r.kern.table.new_thread(&p);
    other.sig.lock().blocked.insert(SIGUSR1);

    let kern = r.kern.clone();
    let w = waiter.clone();
    let wait_thread =
        std::thread::spawn(move || sys_sigtimedwait(&kern, &w, SigSet::from_sig(SIGUSR1), Some(3000)));

    wait_until(|| {
        let ts = waiter.sig.lock();
        ts.wait_set.contains(SIGUSR1) && ts.run_state == RunState::SleepInterruptible
    });

    sys_kill(&r.kern, &init.main_thread(), p.id().as_u64() as i64, SIGUSR1).unwrap();

    let info = wait_thread.join().unwrap().unwrap();
    assert_eq!(info.signo, SIGUSR1);
    assert!(!other.pending.contains(SIGUSR1));
    assert!(!p.pending.contains(SIGUSR1));
}
