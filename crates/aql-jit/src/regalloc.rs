//! Linear-Scan Register Allocation
//!
//! Classic Poletto/Sarkar over start-sorted intervals: expire the active
//! set, hand out a free physical register, and when none is free spill
//! whichever of (current, furthest-ending active) lives longest.

use crate::intervals::LiveInterval;
use crate::target::Arch;
use aql_util::FxHashMap;

/// Where a virtual register lives
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Location {
    /// Physical register (hardware encoding index)
    Reg(u8),
    /// Frame spill slot (8 bytes each)
    Spill(u32),
}

/// Allocation result
#[derive(Debug)]
pub struct Allocation {
    map: FxHashMap<u32, Location>,
    /// Spill slots used
    pub spill_slots: u32,
    /// Spills generated (allocation pressure diagnostic)
    pub spills_generated: u32,
}

impl Allocation {
    pub fn location(&self, vreg: u32) -> Option<Location> {
        self.map.get(&vreg).copied()
    }

    /// Bytes of frame space the spill area needs
    pub fn spill_area_bytes(&self) -> u32 {
        self.spill_slots * 8
    }
}

/// Run linear scan for `arch`
pub fn linear_scan(intervals: &[LiveInterval], arch: Arch) -> Allocation {
    let mut free: Vec<u8> = arch.allocatable();
    free.reverse(); // pop() hands out preference order

    // Active intervals with their assigned register, sorted by end
    let mut active: Vec<(LiveInterval, u8)> = Vec::new();
    let mut map: FxHashMap<u32, Location> = FxHashMap::default();
    let mut next_spill_slot: u32 = 0;
    let mut spills_generated: u32 = 0;

    for &current in intervals {
        // Expire intervals that ended before this one starts
        let mut index = 0;
        while index < active.len() {
            if active[index].0.end < current.start {
                let (_, reg) = active.remove(index);
                free.push(reg);
            } else {
                index += 1;
            }
        }

        if let Some(reg) = free.pop() {
            map.insert(current.vreg, Location::Reg(reg));
            let pos = active
                .binary_search_by_key(&current.end, |(iv, _)| iv.end)
                .unwrap_or_else(|e| e);
            active.insert(pos, (current, reg));
        } else {
            // Spill the longest-living of the active set or the current
            spills_generated += 1;
            let last = active.last().copied();
            match last {
                Some((victim, reg)) if victim.end > current.end => {
                    // Steal the victim's register, spill the victim
                    map.insert(victim.vreg, Location::Spill(next_spill_slot));
                    next_spill_slot += 1;
                    active.pop();
                    map.insert(current.vreg, Location::Reg(reg));
                    let pos = active
                        .binary_search_by_key(&current.end, |(iv, _)| iv.end)
                        .unwrap_or_else(|e| e);
                    active.insert(pos, (current, reg));
                }
                _ => {
                    map.insert(current.vreg, Location::Spill(next_spill_slot));
                    next_spill_slot += 1;
                }
            }
        }
    }

    log::debug!(
        "linear scan: {} intervals, {} spills, {} slots",
        intervals.len(),
        spills_generated,
        next_spill_slot
    );
    Allocation {
        map,
        spill_slots: next_spill_slot,
        spills_generated,
    }
}
