// Copyright 2025 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

#![cfg(test)]
//! CONTEXT: Property-based tests for the paging simulator
//! OWNERS: @kernel-mm-team
//! NOTE: Tests only; a well-behaved framework may interleave the four
//! operations arbitrarily and the sharing bookkeeping must stay exact.
//!
//! TEST_SCOPE:
//!   - share counts equal the valid entries mapping each frame, across
//!     every process, after every single operation
//!   - no writable entry maps a frame shared by more than one process
//!   - allocation fails exactly when zero frames are free
//!
//! TEST_SCENARIOS:
//!   - ops_preserve_sharing_invariants(): interleaved alloc/free/fault/switch
//!   - exhaustion_matches_free_frame_count(): alloc error iff no free frame

use proptest::prelude::*;

use crate::config::VmGeometry;
use crate::mm::{MapError, Translation};
use crate::sim::Machine;
use crate::types::{Access, Frame, Pid};

const GEOMETRY: VmGeometry = VmGeometry::new(4, 4, 12);

#[derive(Debug, Clone)]
enum Op {
    Alloc { vpn: usize, write: bool },
    Free { vpn: usize },
    Fault { vpn: usize, write: bool },
    Switch { pid: u32 },
}

fn arb_op(pages: usize) -> impl Strategy<Value = Op> {
    prop_oneof![
        (0..pages, any::<bool>()).prop_map(|(vpn, write)| Op::Alloc { vpn, write }),
        (0..pages).prop_map(|vpn| Op::Free { vpn }),
        (0..pages, any::<bool>()).prop_map(|(vpn, write)| Op::Fault { vpn, write }),
        (0u32..4).prop_map(|pid| Op::Switch { pid }),
    ]
}

fn access_for(write: bool) -> Access {
    if write {
        Access::RW
    } else {
        Access::READ
    }
}

fn mapped(machine: &Machine, vpn: usize) -> bool {
    matches!(machine.translate(vpn), Translation::Mapped(_))
}

/// Drives one operation the way a precondition-respecting framework
/// would: allocate only unmapped pages, free only mapped ones.
fn drive(machine: &mut Machine, op: Op) {
    match op {
        Op::Alloc { vpn, write } => {
            if !mapped(machine, vpn) {
                let _ = machine.alloc_page(vpn, access_for(write));
            }
        }
        Op::Free { vpn } => {
            if mapped(machine, vpn) {
                machine.free_page(vpn);
            }
        }
        Op::Fault { vpn, write } => {
            let _ = machine.handle_page_fault(vpn, access_for(write));
        }
        Op::Switch { pid } => {
            let _ = machine.switch_process(Pid::from_raw(pid));
        }
    }
}

fn free_frames(machine: &Machine) -> usize {
    (0..machine.geometry().frames)
        .filter(|&index| machine.frame_sharers(Frame::from_raw(index)) == 0)
        .count()
}

proptest! {
    #[test]
    fn ops_preserve_sharing_invariants(
        ops in proptest::collection::vec(arb_op(GEOMETRY.pages()), 1..64)
    ) {
        let mut machine = Machine::new(GEOMETRY);
        for op in ops {
            drive(&mut machine, op);
            prop_assert_eq!(machine.verify_sharing(), Ok(()));
        }
    }

    #[test]
    fn exhaustion_matches_free_frame_count(
        ops in proptest::collection::vec(arb_op(GEOMETRY.pages()), 1..48),
        vpn in 0..GEOMETRY.pages()
    ) {
        let mut machine = Machine::new(GEOMETRY);
        for op in ops {
            drive(&mut machine, op);
        }
        prop_assume!(!mapped(&machine, vpn));

        let free = free_frames(&machine);
        let result = machine.alloc_page(vpn, Access::READ);
        if free == 0 {
            prop_assert_eq!(result, Err(MapError::FramesExhausted));
        } else {
            prop_assert!(result.is_ok());
        }
    }
}
