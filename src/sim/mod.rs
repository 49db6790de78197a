// Copyright 2025 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! CONTEXT: Machine-level state and operations of the paging simulator
//! OWNERS: @kernel-mm-team
//! PUBLIC API: Machine (new/alloc_page/free_page/translate/handle_page_fault/switch_process/access), Process, SwitchOutcome, ForkError, SharingViolation
//! DEPENDS_ON: mm (FrameTable, PageTable), types (Pid, Frame, Access)
//! INVARIANTS: share counts mirror the valid entries of every table; no
//! writable entry maps a frame shared by more than one process; the
//! active table is the current process's own table, by construction

mod fault;

#[cfg(test)]
mod tests_prop;

pub use fault::{AccessError, FaultOutcome};

extern crate alloc;

use alloc::collections::{TryReserveError, VecDeque};
use alloc::vec;

use crate::config::VmGeometry;
use crate::mm::{FrameTable, MapError, PageEntry, PageTable, Translation};
use crate::types::{Access, Frame, Pid};

/// Error returned when a fork cannot duplicate table storage.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ForkError {
    /// Storage for the child's directories could not be allocated.
    /// Fatal: the parent's entries are already downgraded for sharing.
    Storage(TryReserveError),
}

impl From<TryReserveError> for ForkError {
    fn from(value: TryReserveError) -> Self {
        Self::Storage(value)
    }
}

/// Outcome of [`Machine::switch_process`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SwitchOutcome {
    /// The requested pid was already running; nothing changed.
    AlreadyCurrent,
    /// An existing ready process was made current.
    Switched,
    /// No such process existed; the current one was COW-forked.
    Forked,
}

/// Detected divergence between the share counts and the page tables.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SharingViolation {
    /// The tracked share count differs from the number of valid entries
    /// mapping the frame.
    CountMismatch { frame: Frame, tracked: u32, mapped: u32 },
    /// A writable entry maps a frame that is still shared.
    WritableShared { frame: Frame },
}

/// A simulated process: its identifier and its own page table.
#[derive(Debug)]
pub struct Process {
    pid: Pid,
    table: PageTable,
}

impl Process {
    /// Returns the process identifier.
    pub fn pid(&self) -> Pid {
        self.pid
    }

    /// Returns the process's page table.
    pub fn table(&self) -> &PageTable {
        &self.table
    }
}

/// Whole-machine state of the simulation: the frame pool, the running
/// process and the ready queue of everything else.
///
/// The page-table base register of the simulated MMU always walks the
/// current process's table; there is no separate active-table register
/// to keep in sync.
#[derive(Debug)]
pub struct Machine {
    geometry: VmGeometry,
    frames: FrameTable,
    current: Process,
    ready: VecDeque<Process>,
}

static_assertions::assert_impl_all!(Machine: Send);

impl Machine {
    /// Creates a machine seeded with the initial process ([`Pid::INIT`])
    /// holding an empty table.
    pub fn new(geometry: VmGeometry) -> Self {
        Self {
            geometry,
            frames: FrameTable::new(geometry.frames),
            current: Process { pid: Pid::INIT, table: PageTable::new(geometry) },
            ready: VecDeque::new(),
        }
    }

    /// Geometry the machine was built with.
    pub fn geometry(&self) -> VmGeometry {
        self.geometry
    }

    /// Pid of the running process.
    pub fn current_pid(&self) -> Pid {
        self.current.pid
    }

    /// The table the simulated MMU currently walks.
    pub fn active_table(&self) -> &PageTable {
        &self.current.table
    }

    /// Classifies the translation of `vpn` through the active table.
    pub fn translate(&self, vpn: usize) -> Translation {
        self.current.table.translate(vpn)
    }

    /// Looks up the table of `pid`, whether running or queued.
    pub fn table_of(&self, pid: Pid) -> Option<&PageTable> {
        if self.current.pid == pid {
            return Some(&self.current.table);
        }
        self.ready.iter().find(|process| process.pid == pid).map(Process::table)
    }

    /// Number of valid entries currently mapping `frame`.
    pub fn frame_sharers(&self, frame: Frame) -> u32 {
        self.frames.sharers(frame)
    }

    /// Pids waiting in the ready queue, in queue order.
    pub fn ready_pids(&self) -> impl Iterator<Item = Pid> + '_ {
        self.ready.iter().map(Process::pid)
    }

    /// Maps `vpn` in the active table to the smallest-indexed free frame.
    ///
    /// Creates the covering directory when absent, then installs the
    /// entry and the frame's first share in one step. The entry is
    /// writable exactly when `access` requests writes.
    ///
    /// Precondition: the entry for `vpn` holds no live translation.
    pub fn alloc_page(&mut self, vpn: usize, access: Access) -> Result<Frame, MapError> {
        // Directory creation precedes the frame claim: an empty directory
        // left behind by an exhausted pool is harmless, a stray share
        // count is not.
        let entry = self.current.table.ensure_entry_mut(vpn)?;
        let frame = self.frames.acquire()?;
        *entry = PageEntry::mapped(frame, access.is_write());
        log::trace!(target: "vm", "pid {} maps vpn {vpn} -> {frame}", self.current.pid);
        self.debug_verify("alloc_page");
        Ok(frame)
    }

    /// Unmaps `vpn` from the active table and drops its frame share.
    ///
    /// Precondition: the entry is valid. A missing or already-invalid
    /// entry is left untouched.
    pub fn free_page(&mut self, vpn: usize) {
        let Some(entry) = self.current.table.entry_mut(vpn) else {
            return;
        };
        if !entry.is_valid() {
            return;
        }
        let frame = entry.frame();
        entry.clear();
        self.frames.release(frame);
        log::trace!(target: "vm", "pid {} unmaps vpn {vpn} ({frame})", self.current.pid);
        self.debug_verify("free_page");
    }

    /// Switches to `pid` when it is ready; COW-forks the current process
    /// into a child with that pid otherwise.
    ///
    /// A fork downgrades every writable entry of the parent to a shared
    /// read-only COW entry, value-duplicates the table into the child,
    /// queues the parent and hands execution to the child. Switching
    /// never touches entry contents.
    pub fn switch_process(&mut self, pid: Pid) -> Result<SwitchOutcome, ForkError> {
        if pid == self.current.pid {
            return Ok(SwitchOutcome::AlreadyCurrent);
        }
        if let Some(position) = self.ready.iter().position(|process| process.pid == pid) {
            if let Some(next) = self.ready.remove(position) {
                let previous = core::mem::replace(&mut self.current, next);
                self.ready.push_back(previous);
                log::debug!(target: "vm", "switched to pid {pid}");
                self.debug_verify("switch");
                return Ok(SwitchOutcome::Switched);
            }
        }
        self.fork_current(pid)?;
        Ok(SwitchOutcome::Forked)
    }

    fn fork_current(&mut self, pid: Pid) -> Result<(), ForkError> {
        let Machine { frames, current, .. } = self;
        for entry in current.table.valid_entries_mut() {
            frames.retain(entry.frame());
            if entry.is_writable() {
                entry.share_for_cow();
            }
        }
        let child_table = current.table.duplicate()?;

        let parent_pid = self.current.pid;
        let parent = core::mem::replace(&mut self.current, Process { pid, table: child_table });
        self.ready.push_back(parent);
        log::debug!(target: "vm", "forked pid {pid} from pid {parent_pid}");
        self.debug_verify("fork");
        Ok(())
    }

    /// Recomputes the sharing bookkeeping from every table and compares
    /// it against the frame pool.
    ///
    /// Verifies, for every frame, that the tracked share count equals
    /// the number of valid entries mapping it across the current and
    /// queued processes, and that no writable entry maps a frame whose
    /// share count exceeds one.
    pub fn verify_sharing(&self) -> Result<(), SharingViolation> {
        let mut mapped = vec![0u32; self.frames.len()];
        let mut writable = vec![false; self.frames.len()];
        let tables =
            core::iter::once(&self.current.table).chain(self.ready.iter().map(Process::table));
        for table in tables {
            for (_, entry) in table.mapped_entries() {
                let index = entry.frame().as_index();
                if let Some(count) = mapped.get_mut(index) {
                    *count += 1;
                    writable[index] |= entry.is_writable();
                }
            }
        }
        for (index, &count) in mapped.iter().enumerate() {
            let frame = Frame::from_raw(index);
            let tracked = self.frames.sharers(frame);
            if tracked != count {
                return Err(SharingViolation::CountMismatch { frame, tracked, mapped: count });
            }
            if writable[index] && tracked > 1 {
                return Err(SharingViolation::WritableShared { frame });
            }
        }
        Ok(())
    }

    fn debug_verify(&self, operation: &str) {
        if cfg!(debug_assertions) {
            if let Err(violation) = self.verify_sharing() {
                log::error!(target: "vm", "share-verify: {violation:?} after {operation}");
            }
        }
    }
}
