// Copyright 2025 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! CONTEXT: Newtypes shared by every simulator operation
//! OWNERS: @kernel-mm-team
//! PUBLIC API: Pid, Frame, Access
//! INVARIANTS: Pid::INIT identifies the seeded first process; Frame indexes the fixed frame pool

use core::fmt;

use bitflags::bitflags;

/// Process identifier.
///
/// **Ownership**: only [`crate::sim::Machine`] creates processes; the
/// values themselves arrive from the surrounding framework.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[repr(transparent)]
pub struct Pid(u32);

impl Pid {
    /// The initial process seeded before the first operation.
    pub const INIT: Self = Self(0);

    /// Creates a PID from a raw value.
    #[inline]
    pub const fn from_raw(raw: u32) -> Self {
        Self(raw)
    }

    /// Returns the raw PID value.
    #[inline]
    pub const fn as_raw(self) -> u32 {
        self.0
    }
}

impl fmt::Display for Pid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Physical frame number indexing the fixed pool of memory frames.
///
/// Frames are handed out by the share-count table and never refer to
/// storage; the simulator tracks mappings, not contents.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[repr(transparent)]
pub struct Frame(usize);

impl Frame {
    /// Creates a frame number from a raw pool index.
    #[inline]
    pub const fn from_raw(raw: usize) -> Self {
        Self(raw)
    }

    /// Returns the raw frame number.
    #[inline]
    pub const fn as_raw(self) -> usize {
        self.0
    }

    /// Returns the frame number as an index into the share-count table.
    #[inline]
    pub const fn as_index(self) -> usize {
        self.0
    }
}

impl fmt::Display for Frame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "pfn {}", self.0)
    }
}

bitflags! {
    /// Access kind the framework requests for a virtual page.
    #[derive(Clone, Copy, Debug, PartialEq, Eq)]
    pub struct Access: u32 {
        const READ = 1 << 0;
        const WRITE = 1 << 1;
    }
}

impl Access {
    /// Read/write access, the common allocation request.
    pub const RW: Self = Self::READ.union(Self::WRITE);

    /// Returns true when the access requests a write.
    #[inline]
    pub fn is_write(self) -> bool {
        self.contains(Self::WRITE)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn write_detection() {
        assert!(!Access::READ.is_write());
        assert!(Access::WRITE.is_write());
        assert!(Access::RW.is_write());
    }
}
