// Copyright 2025 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! Share-count bookkeeping for the fixed pool of physical frames.

extern crate alloc;

use alloc::vec;
use alloc::vec::Vec;

use crate::types::Frame;

use super::MapError;

/// Tracks how many valid page-table entries point at each physical frame.
///
/// A frame with a share count of zero is free. The table never hands out
/// frame numbers on its own; [`crate::sim::Machine`] couples every count
/// change with the entry change it mirrors, in the same logical step.
#[derive(Debug)]
pub struct FrameTable {
    shares: Vec<u32>,
}

impl FrameTable {
    /// Creates a pool of `frames` free frames.
    pub fn new(frames: usize) -> Self {
        Self { shares: vec![0; frames] }
    }

    /// Claims the smallest-indexed free frame and records its first share.
    ///
    /// Fails exactly when zero frames have a share count of zero.
    pub fn acquire(&mut self) -> Result<Frame, MapError> {
        let index = self
            .shares
            .iter()
            .position(|&count| count == 0)
            .ok_or(MapError::FramesExhausted)?;
        self.shares[index] = 1;
        log::trace!(target: "mm", "frame {index} acquired");
        Ok(Frame::from_raw(index))
    }

    /// Records one more mapping of `frame` (sharing during fork).
    pub fn retain(&mut self, frame: Frame) {
        if let Some(count) = self.shares.get_mut(frame.as_index()) {
            *count += 1;
        }
    }

    /// Drops one mapping of `frame`, stopping at zero.
    pub fn release(&mut self, frame: Frame) {
        if let Some(count) = self.shares.get_mut(frame.as_index()) {
            *count = count.saturating_sub(1);
            if *count == 0 {
                log::trace!(target: "mm", "{frame} free");
            }
        }
    }

    /// Returns the number of valid entries currently mapping `frame`.
    pub fn sharers(&self, frame: Frame) -> u32 {
        self.shares.get(frame.as_index()).copied().unwrap_or(0)
    }

    /// Returns the number of frames in the pool.
    pub fn len(&self) -> usize {
        self.shares.len()
    }

    /// Returns true when the pool holds no frames at all.
    pub fn is_empty(&self) -> bool {
        self.shares.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn acquire_prefers_smallest_free_index() {
        let mut frames = FrameTable::new(3);
        assert_eq!(frames.acquire(), Ok(Frame::from_raw(0)));
        assert_eq!(frames.acquire(), Ok(Frame::from_raw(1)));
        frames.release(Frame::from_raw(0));
        assert_eq!(frames.acquire(), Ok(Frame::from_raw(0)));
        assert_eq!(frames.acquire(), Ok(Frame::from_raw(2)));
    }

    #[test]
    fn acquire_fails_only_when_no_frame_is_free() {
        let mut frames = FrameTable::new(2);
        assert!(frames.acquire().is_ok());
        assert!(frames.acquire().is_ok());
        assert_eq!(frames.acquire(), Err(MapError::FramesExhausted));
        frames.release(Frame::from_raw(1));
        assert_eq!(frames.acquire(), Ok(Frame::from_raw(1)));
    }

    #[test]
    fn release_floors_at_zero() {
        let mut frames = FrameTable::new(1);
        frames.release(Frame::from_raw(0));
        assert_eq!(frames.sharers(Frame::from_raw(0)), 0);
        assert_eq!(frames.acquire(), Ok(Frame::from_raw(0)));
    }

    #[test]
    fn retain_counts_additional_sharers() {
        let mut frames = FrameTable::new(2);
        let frame = frames.acquire().unwrap();
        frames.retain(frame);
        assert_eq!(frames.sharers(frame), 2);
        frames.release(frame);
        assert_eq!(frames.sharers(frame), 1);
    }
}
