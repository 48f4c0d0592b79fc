//! Cache flooding before a measurement.

use core::ptr;
use std::hint::black_box;

use cache_utils::cache_info::{flood_size, get_cache_info, DEFAULT_FLOOD_BYTES};
use log::debug;

/// How many times the scratch buffer is swept per flood.
pub const FLOOD_PASSES: usize = 16;

/// Where the scratch buffer size comes from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FloodTarget {
    /// An explicit capacity in bytes.
    Bytes(usize),
    /// The detected capacity of a cache level, or [`DEFAULT_FLOOD_BYTES`] if it is unknown.
    Level(u8),
}

impl Default for FloodTarget {
    fn default() -> Self {
        FloodTarget::Level(2)
    }
}

impl FloodTarget {
    pub fn capacity_bytes(&self) -> usize {
        match *self {
            FloodTarget::Bytes(bytes) => bytes,
            FloodTarget::Level(level) => flood_size(&get_cache_info(), level),
        }
    }
}

/// Owns a scratch buffer at least as large as the cache level it evicts.
pub struct CacheConditioner {
    scratch: Vec<i64>,
    passes: usize,
}

impl CacheConditioner {
    pub fn new(capacity_bytes: usize) -> CacheConditioner {
        let len = (capacity_bytes / std::mem::size_of::<i64>()).max(1);
        CacheConditioner {
            scratch: vec![0; len],
            passes: FLOOD_PASSES,
        }
    }

    pub fn for_target(target: FloodTarget) -> CacheConditioner {
        CacheConditioner::new(target.capacity_bytes())
    }

    pub fn capacity_bytes(&self) -> usize {
        self.scratch.len() * std::mem::size_of::<i64>()
    }

    /// Number of bytes written by one flood.
    pub fn footprint_bytes(&self) -> usize {
        self.capacity_bytes() * self.passes
    }

    /// Write then read back every element of the scratch buffer, `FLOOD_PASSES` times over.
    pub fn flood(&mut self) -> i64 {
        let len = self.scratch.len();
        let base = self.scratch.as_mut_ptr();
        let mut acc: i64 = 0;
        for i in 0..len * self.passes {
            let cell = unsafe { base.add(i % len) };
            unsafe { ptr::write_volatile(cell, i as i64) };
            acc = acc.wrapping_add(unsafe { ptr::read_volatile(cell) });
        }
        debug!("flooded {} bytes", self.footprint_bytes());
        black_box(acc)
    }
}

impl Default for CacheConditioner {
    fn default() -> Self {
        CacheConditioner::new(DEFAULT_FLOOD_BYTES)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn flood_touches_every_cell_each_pass() {
        let mut conditioner = CacheConditioner::new(64);
        assert_eq!(conditioner.capacity_bytes(), 64);
        // 8 cells, 16 passes: values 0..128 are written and read back once each.
        let expected: i64 = (0..128).sum();
        assert_eq!(conditioner.flood(), expected);
        assert_eq!(conditioner.scratch, (120..128).collect::<Vec<i64>>());
    }

    #[test]
    fn explicit_target_sizes_scratch() {
        let conditioner = CacheConditioner::for_target(FloodTarget::Bytes(1 << 20));
        assert_eq!(conditioner.capacity_bytes(), 1 << 20);
        assert_eq!(conditioner.footprint_bytes(), 16 << 20);
    }

    #[test]
    fn level_target_is_never_empty() {
        assert!(FloodTarget::Level(7).capacity_bytes() >= DEFAULT_FLOOD_BYTES);
    }
}
