//! Shared test doubles for the in-crate unit tests
//!
//! Collaborator fakes: a condvar-backed sleep host, a recording
//! trampoline, and an in-memory dump target. The sleep host leans on the
//! SleepWake contract - spurious returns are allowed - so it needs no
//! per-channel bookkeeping.

use std::sync::{Condvar, Mutex};
use std::time::{Duration, Instant};

use alloc::boxed::Box;
use alloc::string::String;
use alloc::sync::Arc;
use alloc::vec::Vec;

use crate::errno::Errno;
use crate::kernel::{Kernel, KernelConfig, SleepOutcome, SleepWake, UserDelivery, WaitChannel};
use crate::process::cred::Uid;
use crate::process::thread::Thread;
use crate::signal::coredump::{CoreFs, CoreWriter, DumpIo, DumpVnode};
use crate::signal::types::{SigInfo, SigSet};

/// Condvar sleep host. A single generation counter serves every channel;
/// wait sites re-check their predicates, so over-waking is harmless.
pub struct TestSleep {
    gen: Mutex<u64>,
    cv: Condvar,
}

/// Cap on any single sleep; a "lost" wakeup degrades into a spurious
/// return instead of a hang.
const SLEEP_CAP: Duration = Duration::from_millis(500);

impl TestSleep {
    pub fn new() -> Self {
        TestSleep {
            gen: Mutex::new(0),
            cv: Condvar::new(),
        }
    }
}

impl SleepWake for TestSleep {
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
            if start.elapsed() >= SLEEP_CAP {
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

/// One recorded trampoline invocation.
#[derive(Debug, Clone)]
pub struct Delivery {
    pub tid: u64,
    pub handler: u64,
    pub signum: u32,
    pub restore_mask: SigSet,
    pub info: SigInfo,
    pub on_alt_stack: bool,
}

/// Trampoline fake that records every handoff.
pub struct RecordingUser {
    log: Arc<Mutex<Vec<Delivery>>>,
}

impl RecordingUser {
    pub fn deliveries(&self) -> Vec<Delivery> {
        self.log.lock().unwrap().clone()
    }
}

impl UserDelivery for RecordingUser {
    fn deliver_to_user(
        &self,
        td: &Arc<Thread>,
        handler: u64,
        signum: u32,
        restore_mask: SigSet,
        info: &SigInfo,
        on_alt_stack: bool,
    ) {
        self.log.lock().unwrap().push(Delivery {
            tid: td.id().as_u64(),
            handler,
            signum,
            restore_mask,
            info: *info,
            on_alt_stack,
        });
    }
}

/// Metadata shape the fake filesystem reports for opened dump targets.
#[derive(Debug, Clone, Copy)]
pub struct VnodeShape {
    pub regular: bool,
    pub nlink: u32,
    pub owner: Uid,
}

impl Default for VnodeShape {
    fn default() -> Self {
        VnodeShape {
            regular: true,
            nlink: 1,
            owner: 5,
        }
    }
}

type DumpStore = Arc<Mutex<Vec<(String, Vec<u8>)>>>;

/// In-memory dump filesystem.
pub struct FakeCoreFs {
    shape: VnodeShape,
    store: DumpStore,
}

impl FakeCoreFs {
    /// Snapshot of (path, bytes) for every opened dump target.
    pub fn files(&self) -> Vec<(String, Vec<u8>)> {
        self.store.lock().unwrap().clone()
    }
}

impl CoreFs for FakeCoreFs {
    fn open_dump(&self, path: &str) -> Result<Box<dyn DumpVnode>, Errno> {
        let index = {
            let mut store = self.store.lock().unwrap();
            store.push((String::from(path), Vec::new()));
            store.len() - 1
        };
        Ok(Box::new(FakeVnode {
            shape: self.shape,
            store: self.store.clone(),
            index,
        }))
    }
}

struct FakeVnode {
    shape: VnodeShape,
    store: DumpStore,
    index: usize,
}

impl DumpIo for FakeVnode {
    fn write(&mut self, bytes: &[u8]) -> Result<(), Errno> {
        self.store.lock().unwrap()[self.index].1.extend_from_slice(bytes);
        Ok(())
    }

    fn unmap(&mut self, _start: u64, _end: u64) -> Result<(), Errno> {
        Ok(())
    }
}

impl DumpVnode for FakeVnode {
    fn is_regular(&self) -> bool {
        self.shape.regular
    }

    fn link_count(&self) -> u32 {
        self.shape.nlink
    }

    fn owner_uid(&self) -> Uid {
        self.shape.owner
    }

    fn truncate(&mut self) -> Result<(), Errno> {
        self.store.lock().unwrap()[self.index].1.clear();
        Ok(())
    }

    fn io(&mut self) -> &mut dyn DumpIo {
        self
    }
}

/// Core writer fake: emits a recognizable marker.
pub struct FakeWriter;

impl CoreWriter for FakeWriter {
    fn write_core(&self, io: &mut dyn DumpIo, td: &Arc<Thread>, _limit: u64) -> Result<(), Errno> {
        io.write(b"CORE")?;
        io.write(&td.id().as_u64().to_le_bytes())?;
        io.unmap(0, 0x1000)?;
        Ok(())
    }
}

/// Dump filesystem that refuses everything; for tests that never expect
/// a core file.
struct NoCoreFs;

impl CoreFs for NoCoreFs {
    fn open_dump(&self, _path: &str) -> Result<Box<dyn DumpVnode>, Errno> {
        Err(Errno::Eacces)
    }
}

struct NullUser;

impl UserDelivery for NullUser {
    fn deliver_to_user(
        &self,
        _td: &Arc<Thread>,
        _handler: u64,
        _signum: u32,
        _restore_mask: SigSet,
        _info: &SigInfo,
        _on_alt_stack: bool,
    ) {
    }
}

/// Kernel with inert collaborators.
pub fn test_kernel() -> Kernel {
    Kernel::new(
        KernelConfig::default(),
        Box::new(TestSleep::new()),
        Box::new(NullUser),
        Box::new(NoCoreFs),
        Box::new(FakeWriter),
    )
}

/// Kernel with a recording trampoline.
pub fn test_kernel_with_user() -> (Kernel, Arc<RecordingUser>) {
    let log = Arc::new(Mutex::new(Vec::new()));
    let kern = Kernel::new(
        KernelConfig::default(),
        Box::new(TestSleep::new()),
        Box::new(RecordingUser { log: log.clone() }),
        Box::new(NoCoreFs),
        Box::new(FakeWriter),
    );
    (kern, Arc::new(RecordingUser { log }))
}

/// Kernel with an in-memory dump filesystem of the given shape.
pub fn test_kernel_with_dumps(shape: VnodeShape) -> (Kernel, Arc<FakeCoreFs>) {
    let store: DumpStore = Arc::new(Mutex::new(Vec::new()));
    let kern = Kernel::new(
        KernelConfig::default(),
        Box::new(TestSleep::new()),
        Box::new(NullUser),
        Box::new(FakeCoreFs {
            shape,
            store: store.clone(),
        }),
        Box::new(FakeWriter),
    );
    (kern, Arc::new(FakeCoreFs { shape, store }))
}
