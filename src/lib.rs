// Copyright 2025 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! Demand-paging and copy-on-write simulator for single-core teaching
//! kernels.
//!
//! The crate models the paging core only: frame share counts, two-level
//! page tables, fault resolution and process switch/fork. The surrounding
//! framework decides which pages are touched and when processes change;
//! frames are bookkeeping units and carry no payload bytes.

#![no_std]

extern crate alloc;

#[cfg(test)]
extern crate std;

pub mod config;
pub mod mm;
pub mod sim;
pub mod types;
