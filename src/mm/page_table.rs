// Copyright 2025 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! Two-level page tables with lazily created directories.

extern crate alloc;

use alloc::collections::TryReserveError;
use alloc::vec;
use alloc::vec::Vec;

use bitflags::bitflags;

use crate::config::VmGeometry;
use crate::types::Frame;

use super::MapError;

bitflags! {
    #[derive(Clone, Copy, Debug, PartialEq, Eq)]
    /// Flags stored in a page-table entry.
    pub struct EntryFlags: u8 {
        /// Entry holds a live translation.
        const VALID = 1 << 0;
        /// Writes are permitted through this entry.
        const WRITABLE = 1 << 1;
        /// Copy-on-write marker: the frame may still be shared with
        /// another process and must be detached before the first write.
        const PRIVATE = 1 << 2;
    }
}

/// One slot of a page directory: validity, writability, COW marker and
/// target frame for a single virtual page.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PageEntry {
    flags: EntryFlags,
    frame: Frame,
}

impl PageEntry {
    /// The all-clear entry installed in fresh directories and restored by
    /// `free_page`.
    pub const INVALID: Self = Self { flags: EntryFlags::empty(), frame: Frame::from_raw(0) };

    pub(crate) fn mapped(frame: Frame, writable: bool) -> Self {
        let mut flags = EntryFlags::VALID;
        if writable {
            flags |= EntryFlags::WRITABLE;
        }
        Self { flags, frame }
    }

    /// Returns true when the entry holds a live translation.
    #[inline]
    pub fn is_valid(self) -> bool {
        self.flags.contains(EntryFlags::VALID)
    }

    /// Returns true when writes are permitted through the entry.
    #[inline]
    pub fn is_writable(self) -> bool {
        self.flags.contains(EntryFlags::WRITABLE)
    }

    /// Returns true when the entry carries the COW marker.
    #[inline]
    pub fn is_cow(self) -> bool {
        self.flags.contains(EntryFlags::PRIVATE)
    }

    /// Returns the mapped frame. Meaningful only while the entry is valid.
    #[inline]
    pub fn frame(self) -> Frame {
        self.frame
    }

    /// Raw flags, for diagnostics.
    #[inline]
    pub fn flags(self) -> EntryFlags {
        self.flags
    }

    pub(crate) fn clear(&mut self) {
        *self = Self::INVALID;
    }

    /// Drops write permission and marks the entry COW-shared.
    pub(crate) fn share_for_cow(&mut self) {
        self.flags.remove(EntryFlags::WRITABLE);
        self.flags.insert(EntryFlags::PRIVATE);
    }

    /// Restores exclusive write access once no other sharer remains.
    pub(crate) fn make_exclusive(&mut self) {
        self.flags.insert(EntryFlags::WRITABLE);
        self.flags.remove(EntryFlags::PRIVATE);
    }
}

/// A directory of consecutively addressed entries, created on first use
/// and kept for the rest of the run even when every entry becomes
/// invalid again.
#[derive(Debug)]
pub struct PageDirectory {
    entries: Vec<PageEntry>,
}

impl PageDirectory {
    fn new(len: usize) -> Self {
        Self { entries: vec![PageEntry::INVALID; len] }
    }

    fn duplicate(&self) -> Result<Self, TryReserveError> {
        let mut entries = Vec::new();
        entries.try_reserve_exact(self.entries.len())?;
        entries.extend_from_slice(&self.entries);
        Ok(Self { entries })
    }

    /// Returns the entry at `slot`.
    pub fn entry(&self, slot: usize) -> Option<PageEntry> {
        self.entries.get(slot).copied()
    }

    fn entry_mut(&mut self, slot: usize) -> Option<&mut PageEntry> {
        self.entries.get_mut(slot)
    }
}

/// Result of a pure lookup over a page table.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Translation {
    /// The directory covering the page was never created.
    DirectoryAbsent,
    /// The directory exists but the entry holds no translation.
    EntryInvalid,
    /// The entry holds a live translation.
    Mapped(PageEntry),
}

/// One process's entire address space: a pool of optional directory
/// slots addressed through the geometry's directory index.
#[derive(Debug)]
pub struct PageTable {
    geometry: VmGeometry,
    directories: Vec<Option<PageDirectory>>,
}

impl PageTable {
    /// Creates an empty table for the given geometry.
    pub fn new(geometry: VmGeometry) -> Self {
        Self {
            geometry,
            directories: core::iter::repeat_with(|| None).take(geometry.directories).collect(),
        }
    }

    /// Classifies the translation for `vpn` without mutating anything.
    pub fn translate(&self, vpn: usize) -> Translation {
        let Some(directory) = self
            .directories
            .get(self.geometry.directory_index(vpn))
            .and_then(Option::as_ref)
        else {
            return Translation::DirectoryAbsent;
        };
        match directory.entry(self.geometry.slot_index(vpn)) {
            Some(entry) if entry.is_valid() => Translation::Mapped(entry),
            _ => Translation::EntryInvalid,
        }
    }

    /// Returns the valid entry for `vpn`, if any.
    pub fn entry(&self, vpn: usize) -> Option<PageEntry> {
        match self.translate(vpn) {
            Translation::Mapped(entry) => Some(entry),
            _ => None,
        }
    }

    /// Returns the entry slot for `vpn` when its directory exists.
    pub(crate) fn entry_mut(&mut self, vpn: usize) -> Option<&mut PageEntry> {
        let slot = self.geometry.slot_index(vpn);
        self.directories
            .get_mut(self.geometry.directory_index(vpn))
            .and_then(Option::as_mut)
            .and_then(|directory| directory.entry_mut(slot))
    }

    /// Returns the entry slot for `vpn`, creating its directory when
    /// absent.
    pub(crate) fn ensure_entry_mut(&mut self, vpn: usize) -> Result<&mut PageEntry, MapError> {
        let index = self.geometry.directory_index(vpn);
        let slot = self.geometry.slot_index(vpn);
        let entries = self.geometry.entries_per_directory;
        let directory = self
            .directories
            .get_mut(index)
            .ok_or(MapError::OutOfRange)?
            .get_or_insert_with(|| PageDirectory::new(entries));
        directory.entry_mut(slot).ok_or(MapError::OutOfRange)
    }

    /// Mutable iteration over every valid entry.
    pub(crate) fn valid_entries_mut(&mut self) -> impl Iterator<Item = &mut PageEntry> {
        self.directories
            .iter_mut()
            .flatten()
            .flat_map(|directory| directory.entries.iter_mut())
            .filter(|entry| entry.is_valid())
    }

    /// Iterates every valid `(vpn, entry)` pair.
    pub fn mapped_entries(&self) -> impl Iterator<Item = (usize, PageEntry)> + '_ {
        let per_directory = self.geometry.entries_per_directory;
        self.directories.iter().enumerate().flat_map(move |(index, slot)| {
            slot.iter().flat_map(move |directory| {
                directory
                    .entries
                    .iter()
                    .enumerate()
                    .filter(|(_, entry)| entry.is_valid())
                    .map(move |(position, entry)| (index * per_directory + position, *entry))
            })
        })
    }

    /// Value-duplicates every created directory, e.g. to seed a forked
    /// child.
    pub(crate) fn duplicate(&self) -> Result<Self, TryReserveError> {
        let mut directories = Vec::new();
        directories.try_reserve_exact(self.directories.len())?;
        for slot in &self.directories {
            let copy = match slot {
                Some(directory) => Some(directory.duplicate()?),
                None => None,
            };
            directories.push(copy);
        }
        Ok(Self { geometry: self.geometry, directories })
    }

    /// Counts the directories created so far.
    pub fn directory_count(&self) -> usize {
        self.directories.iter().flatten().count()
    }
}
