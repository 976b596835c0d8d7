use bytemuck::{Pod, Zeroable};

use crate::pcg;

/// One slot of an open-addressed hash grid; stores the full 64-bit key that
/// owns the slot, split into two words so that kernels without 64-bit
/// integers can compare it.
#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Pod, Zeroable)]
pub struct HashGridEntry {
    pub lo: u32,
    pub hi: u32,
}

impl HashGridEntry {
    pub const EMPTY: Self = Self { lo: 0, hi: 0 };

    pub fn new(key: u64) -> Self {
        Self {
            lo: key as u32,
            hi: (key >> 32) as u32,
        }
    }

    pub fn key(&self) -> u64 {
        (self.lo as u64) | ((self.hi as u64) << 32)
    }

    pub fn is_empty(&self) -> bool {
        *self == Self::EMPTY
    }
}

/// Home slot of `key` in a grid of `len` slots; `len` must be a power of two.
pub fn hash_grid_home(key: u64, len: usize) -> usize {
    debug_assert!(len.is_power_of_two());

    let hash = pcg(key as u32 ^ pcg((key >> 32) as u32));

    (hash as usize) & (len - 1)
}

/// Looks `key` up, testing at most `probing_size` consecutive slots.
pub fn hash_grid_find(
    entries: &[HashGridEntry],
    key: u64,
    probing_size: u32,
) -> Option<usize> {
    probe(entries, key, probing_size).and_then(|(slot, found)| {
        if found {
            Some(slot)
        } else {
            None
        }
    })
}

/// Looks `key` up and claims the first empty slot when it's not present yet;
/// returns `None` when all of the `probing_size` tested slots belong to other
/// keys (the sample is then dropped).
pub fn hash_grid_find_or_insert(
    entries: &mut [HashGridEntry],
    key: u64,
    probing_size: u32,
) -> Option<usize> {
    let (slot, found) = probe(entries, key, probing_size)?;

    if !found {
        entries[slot] = HashGridEntry::new(key);
    }

    Some(slot)
}

fn probe(
    entries: &[HashGridEntry],
    key: u64,
    probing_size: u32,
) -> Option<(usize, bool)> {
    debug_assert_ne!(0, key, "key 0 is reserved for empty slots");

    if entries.is_empty() {
        return None;
    }

    let home = hash_grid_home(key, entries.len());
    let tries = (probing_size.max(1) as usize).min(entries.len());

    (0..tries)
        .map(|offset| (home + offset) & (entries.len() - 1))
        .find_map(|slot| {
            let entry = entries[slot];

            if entry.key() == key {
                Some((slot, true))
            } else if entry.is_empty() {
                Some((slot, false))
            } else {
                None
            }
        })
}
