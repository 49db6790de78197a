// Copyright 2025 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! Page-fault classification and copy-on-write resolution.

use crate::mm::{MapError, Translation};
use crate::types::{Access, Frame};

use super::Machine;

/// Outcome of a fault-resolution attempt.
#[must_use = "unresolvable faults are fatal for the faulting process"]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FaultOutcome {
    /// The mapping now satisfies the faulting access.
    Resolved,
    /// A genuine access violation; the machine state is unchanged.
    Unresolvable,
}

/// Error returned by [`Machine::access`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccessError {
    /// The fault handler declared the access a violation.
    Fault,
    /// Allocation failed while resolving the fault.
    Map(MapError),
}

impl From<MapError> for AccessError {
    fn from(value: MapError) -> Self {
        Self::Map(value)
    }
}

impl Machine {
    /// Resolves the failed translation of `vpn` for `access`.
    ///
    /// Missing mappings (absent directory or invalid entry) are populated
    /// through [`Machine::alloc_page`]. A write against a COW-shared
    /// entry either detaches onto a fresh exclusive frame or, when this
    /// process is the last sharer, upgrades the entry in place. Frames
    /// carry no payload, so detaching moves no bytes; a system with real
    /// page contents must copy the frame at that point.
    ///
    /// Frame exhaustion surfaces as `Err` and leaves the sharing
    /// bookkeeping intact. `Ok(FaultOutcome::Unresolvable)` reports a
    /// write to a genuinely read-only page; nothing is mutated on that
    /// path.
    pub fn handle_page_fault(
        &mut self,
        vpn: usize,
        access: Access,
    ) -> Result<FaultOutcome, MapError> {
        match self.translate(vpn) {
            Translation::DirectoryAbsent | Translation::EntryInvalid => {
                self.alloc_page(vpn, access)?;
                log::trace!(target: "vm", "fault vpn {vpn}: demand-mapped");
                Ok(FaultOutcome::Resolved)
            }
            Translation::Mapped(entry) if access.is_write() && !entry.is_writable() => {
                if !entry.is_cow() {
                    log::debug!(target: "vm", "fault vpn {vpn}: write to read-only page");
                    return Ok(FaultOutcome::Unresolvable);
                }
                let shared = entry.frame();
                if self.frame_sharers(shared) > 1 {
                    // Bind the fresh frame before dropping the old share,
                    // so an exhausted pool cannot leave the counts torn.
                    self.alloc_page(vpn, access)?;
                    self.frames.release(shared);
                    log::trace!(target: "vm", "fault vpn {vpn}: detached from {shared}");
                } else if let Some(entry) = self.current.table.entry_mut(vpn) {
                    entry.make_exclusive();
                    log::trace!(target: "vm", "fault vpn {vpn}: last sharer, upgraded in place");
                }
                self.debug_verify("fault");
                Ok(FaultOutcome::Resolved)
            }
            Translation::Mapped(_) => Ok(FaultOutcome::Unresolvable),
        }
    }

    /// Performs one simulated access: translate, resolve at most one
    /// fault, translate again.
    ///
    /// This is the walk the surrounding framework drives around the
    /// core; it returns the frame that finally backs `vpn`.
    pub fn access(&mut self, vpn: usize, access: Access) -> Result<Frame, AccessError> {
        if let Some(frame) = self.translation_hit(vpn, access) {
            return Ok(frame);
        }
        match self.handle_page_fault(vpn, access)? {
            FaultOutcome::Resolved => self.translation_hit(vpn, access).ok_or(AccessError::Fault),
            FaultOutcome::Unresolvable => Err(AccessError::Fault),
        }
    }

    fn translation_hit(&self, vpn: usize, access: Access) -> Option<Frame> {
        match self.translate(vpn) {
            Translation::Mapped(entry) if !access.is_write() || entry.is_writable() => {
                Some(entry.frame())
            }
            _ => None,
        }
    }
}
