//! Process table - registry of processes and threads
//!
//! The table is an injected value, not a global: callers construct one,
//! hand it to the kernel context, and tests substitute populated tables
//! freely. Group operations and the broadcast scans iterate it.

use alloc::collections::BTreeMap;
use alloc::string::String;
use alloc::sync::Arc;
use alloc::vec::Vec;
use core::sync::atomic::{AtomicU64, Ordering};

use spin::Mutex;

use crate::process::cred::Credentials;
use crate::process::process::{Pid, Process, PsFlags};
use crate::process::thread::{Thread, Tid};
use crate::signal::disposition::SigActs;

/// Registry of all processes in the system.
pub struct ProcessTable {
    procs: Mutex<BTreeMap<Pid, Arc<Process>>>,
    next_pid: AtomicU64,
    next_tid: AtomicU64,
    /// Process that inherits children whose parent won't wait for them
    reaper: Mutex<Option<Pid>>,
}

impl ProcessTable {
    pub fn new() -> Self {
        ProcessTable {
            procs: Mutex::new(BTreeMap::new()),
            next_pid: AtomicU64::new(1),
            next_tid: AtomicU64::new(1),
            reaper: Mutex::new(None),
        }
    }

    fn alloc_pid(&self) -> Pid {
        Pid::new(self.next_pid.fetch_add(1, Ordering::SeqCst))
    }

    fn alloc_tid(&self) -> Tid {
        Tid::new(self.next_tid.fetch_add(1, Ordering::SeqCst))
    }

    /// Create a process with a fresh disposition table and a main thread.
    ///
    /// With no parent, the process leads its own group and session.
    pub fn new_process(
        &self,
        name: &str,
        cred: Credentials,
        parent: Option<&Arc<Process>>,
    ) -> Arc<Process> {
        let pid = self.alloc_pid();
        let (ppid, pgid, session) = match parent {
            Some(p) => (Some(p.id()), p.pgid(), p.session()),
            None => (None, pid, pid),
        };
        let proc = Process::new(
            pid,
            String::from(name),
            cred,
            ppid,
            pgid,
            session,
            SigActs::new(),
        );
        let main = Thread::new(self.alloc_tid(), &proc);
        proc.inner.lock().threads.push(main);
        self.procs.lock().insert(pid, proc.clone());
        log::info!("created process {} (pid {})", name, pid.as_u64());
        proc
    }

    /// Add a thread to an existing process.
    pub fn new_thread(&self, proc: &Arc<Process>) -> Arc<Thread> {
        let td = Thread::new(self.alloc_tid(), proc);
        proc.inner.lock().threads.push(td.clone());
        td
    }

    /// Fork: the child shares the parent's disposition table by reference
    /// and inherits the forking thread's blocked mask. Pending sets start
    /// empty.
    pub fn fork(&self, td: &Arc<Thread>) -> Arc<Process> {
        let parent = td.process();
        let pid = self.alloc_pid();
        let child = Process::new(
            pid,
            parent.name.clone(),
            parent.cred,
            Some(parent.id()),
            parent.pgid(),
            parent.session(),
            parent.sigacts(),
        );
        child
            .flags
            .set(parent.flags.load() & (PsFlags::SUGID | PsFlags::NOCLDSTOP | PsFlags::NOCLDWAIT));
        {
            let mut inner = child.inner.lock();
            inner.limits = parent.inner.lock().limits;
        }
        let main = Thread::new(self.alloc_tid(), &child);
        main.sig.lock().blocked = td.blocked();
        child.inner.lock().threads.push(main);
        self.procs.lock().insert(pid, child.clone());
        log::info!(
            "forked process {} (pid {} -> {})",
            parent.name,
            parent.id().as_u64(),
            pid.as_u64()
        );
        child
    }

    /// Look up a process by pid.
    pub fn get(&self, pid: Pid) -> Option<Arc<Process>> {
        self.procs.lock().get(&pid).cloned()
    }

    /// Snapshot of every process.
    pub fn processes(&self) -> Vec<Arc<Process>> {
        self.procs.lock().values().cloned().collect()
    }

    /// Snapshot of a process group's members.
    pub fn pgrp_members(&self, pgid: Pid) -> Vec<Arc<Process>> {
        self.procs
            .lock()
            .values()
            .filter(|p| p.pgid() == pgid)
            .cloned()
            .collect()
    }

    /// A group is orphaned when no member has a parent that is in the same
    /// session but a different group. Stop signals lose their meaning in
    /// an orphaned group: nobody is left to see the stop and continue it.
    pub fn pgrp_orphaned(&self, pgid: Pid) -> bool {
        let procs = self.procs.lock();
        for member in procs.values().filter(|p| p.pgid() == pgid) {
            let Some(ppid) = member.parent_pid() else {
                continue;
            };
            let Some(parent) = procs.get(&ppid) else {
                continue;
            };
            if parent.pgid() != pgid && parent.session() == member.session() {
                return false;
            }
        }
        true
    }

    /// Designate the process that adopts auto-reaped children.
    pub fn set_reaper(&self, pid: Pid) {
        *self.reaper.lock() = Some(pid);
    }

    pub fn reaper(&self) -> Option<Pid> {
        *self.reaper.lock()
    }

    /// Hand every child of `proc` to the reaper (or orphan it outright).
    pub fn reparent_children(&self, proc: &Arc<Process>) {
        let reaper = self.reaper();
        let procs = self.procs.lock();
        for p in procs.values() {
            let mut inner = p.inner.lock();
            if inner.parent == Some(proc.id()) {
                inner.parent = reaper;
            }
        }
    }
}

impl Default for ProcessTable {
    fn default() -> Self {
        Self::new()
    }
}
