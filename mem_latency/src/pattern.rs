//! Pointer-chasing patterns.
//!
//! Every pattern is stored in the region itself: the slot at byte offset `i` holds the absolute
//! address of its successor. All patterns start at offset 0 and close back onto it.

use bitvec::prelude::*;
use log::debug;
use rand::Rng;

use crate::error::{ConfigError, Error, Result};
use crate::region::{MemoryRegion, SLOT_BYTES};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PatternKind {
    /// Jump by `stride` bytes modulo the region size. The region size must be a power of two.
    Sequential { stride: usize },
    /// Move forward by a random, slot aligned offset in `[slot, 2 * stride)` until the end of
    /// the region, then wrap to the start.
    RandomJump { stride: usize },
    /// Random permutation of the `size / stride` slots spaced `stride` bytes apart.
    FullRandom { stride: usize },
    /// Ring over the first `reuse_bytes / line_bytes` lines; every other line points to itself.
    ReuseDistance { reuse_bytes: usize, line_bytes: usize },
}

impl PatternKind {
    pub fn name(&self) -> &'static str {
        match self {
            PatternKind::Sequential { .. } => "sequential",
            PatternKind::RandomJump { .. } => "random",
            PatternKind::FullRandom { .. } => "full-random",
            PatternKind::ReuseDistance { .. } => "reuse",
        }
    }

    /// The distance this pattern is parameterised by: the stride, or the reuse distance.
    pub fn distance_bytes(&self) -> usize {
        match *self {
            PatternKind::Sequential { stride }
            | PatternKind::RandomJump { stride }
            | PatternKind::FullRandom { stride } => stride,
            PatternKind::ReuseDistance { reuse_bytes, .. } => reuse_bytes,
        }
    }

    /// Spacing between two slots of the pattern.
    pub fn slot_bytes(&self) -> usize {
        match *self {
            PatternKind::Sequential { .. } | PatternKind::RandomJump { .. } => SLOT_BYTES,
            PatternKind::FullRandom { stride } => stride,
            PatternKind::ReuseDistance { line_bytes, .. } => line_bytes,
        }
    }

    /// Check that the pattern can be laid out in a region of `size` bytes.
    pub fn validate(&self, size: usize) -> std::result::Result<(), ConfigError> {
        if size < SLOT_BYTES {
            return Err(ConfigError::RegionTooSmall {
                size,
                slot: SLOT_BYTES,
            });
        }
        let check_stride = |stride: usize| {
            if stride == 0 || stride % SLOT_BYTES != 0 || stride >= size {
                Err(ConfigError::BadStride {
                    stride,
                    size,
                    word: SLOT_BYTES,
                })
            } else {
                Ok(())
            }
        };
        match *self {
            PatternKind::Sequential { stride } => {
                if !size.is_power_of_two() {
                    return Err(ConfigError::NotPowerOfTwo { size });
                }
                check_stride(stride)
            }
            PatternKind::RandomJump { stride } | PatternKind::FullRandom { stride } => {
                check_stride(stride)
            }
            PatternKind::ReuseDistance {
                reuse_bytes,
                line_bytes,
            } => {
                if line_bytes == 0 || line_bytes % SLOT_BYTES != 0 {
                    return Err(ConfigError::BadLineSize {
                        line: line_bytes,
                        word: SLOT_BYTES,
                    });
                }
                if reuse_bytes < line_bytes {
                    return Err(ConfigError::ReuseSmallerThanLine {
                        reuse: reuse_bytes,
                        line: line_bytes,
                    });
                }
                if size < reuse_bytes {
                    return Err(ConfigError::RegionTooSmall {
                        size,
                        slot: reuse_bytes,
                    });
                }
                Ok(())
            }
        }
    }
}

/// Description of a pattern laid out in a particular region.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Pattern {
    pub kind: PatternKind,
    base: usize,
    size_bytes: usize,
    /// Number of distinct slots on the cycle through offset 0.
    pub active_slots: usize,
}

impl Pattern {
    /// Address of the first slot of the cycle.
    pub fn start(&self) -> *const usize {
        self.base as *const usize
    }

    /// Whether this pattern was laid out in `region`.
    pub fn matches<R: MemoryRegion + ?Sized>(&self, region: &R) -> bool {
        self.base == region.base() as usize && self.size_bytes == region.size_bytes()
    }

    /// Byte offset of the successor of the slot at `offset`, or `None` if it points outside.
    pub fn successor<R: MemoryRegion + ?Sized>(&self, region: &R, offset: usize) -> Option<usize> {
        let word = *region.words().get(offset / SLOT_BYTES)?;
        region.offset_of(word)
    }

    /// Offsets of the cycle through offset 0, in chase order. `None` if the chain leaves the
    /// region or does not come back to 0.
    pub fn walk_cycle<R: MemoryRegion + ?Sized>(&self, region: &R) -> Option<Vec<usize>> {
        let mut cycle = vec![0];
        let mut current = self.successor(region, 0)?;
        while current != 0 {
            if cycle.len() > region.slots() {
                return None;
            }
            cycle.push(current);
            current = self.successor(region, current)?;
        }
        Some(cycle)
    }
}

/// Lays out patterns, drawing randomness from an injected generator.
pub struct PatternBuilder<G> {
    rng: G,
}

impl<G: Rng> PatternBuilder<G> {
    pub fn new(rng: G) -> PatternBuilder<G> {
        PatternBuilder { rng }
    }

    /// Clear `region` and write `kind` into it.
    pub fn build<R: MemoryRegion + ?Sized>(
        &mut self,
        region: &mut R,
        kind: PatternKind,
    ) -> Result<Pattern> {
        let size = region.size_bytes();
        kind.validate(size).map_err(Error::from)?;
        clear(region);

        let base = region.base() as usize;
        let words = region.words_mut();
        let active_slots = match kind {
            PatternKind::Sequential { stride } => sequential_ring(words, base, size, stride),
            PatternKind::RandomJump { stride } => {
                random_jump_ring(words, base, size, stride, &mut self.rng)
            }
            PatternKind::FullRandom { stride } => {
                full_random_ring(words, base, size, stride, &mut self.rng)
            }
            PatternKind::ReuseDistance {
                reuse_bytes,
                line_bytes,
            } => reuse_ring(words, base, size, reuse_bytes, line_bytes),
        };
        debug!(
            "{} pattern over {} bytes: {} active slots",
            kind.name(),
            size,
            active_slots
        );

        Ok(Pattern {
            kind,
            base,
            size_bytes: size,
            active_slots,
        })
    }
}

/// Zero the whole region.
pub fn clear<R: MemoryRegion + ?Sized>(region: &mut R) {
    for w in region.words_mut() {
        *w = 0;
    }
}

#[inline]
fn link(words: &mut [usize], base: usize, from: usize, to: usize) {
    words[from / SLOT_BYTES] = base + to;
}

fn sequential_ring(words: &mut [usize], base: usize, size: usize, stride: usize) -> usize {
    let mask = size - 1;
    let mut i = 0;
    let mut active = 0;
    loop {
        let j = (i + stride) & mask;
        link(words, base, i, j);
        active += 1;
        i = j;
        if i == 0 {
            break active;
        }
    }
}

fn random_jump_ring<G: Rng + ?Sized>(
    words: &mut [usize],
    base: usize,
    size: usize,
    stride: usize,
    rng: &mut G,
) -> usize {
    let max_step = 2 * stride / SLOT_BYTES;
    let mut i = 0;
    let mut active = 1;
    loop {
        let j = i + rng.gen_range(1..max_step) * SLOT_BYTES;
        if j >= size {
            link(words, base, i, 0);
            break active;
        }
        link(words, base, i, j);
        active += 1;
        i = j;
    }
}

fn full_random_ring<G: Rng + ?Sized>(
    words: &mut [usize],
    base: usize,
    size: usize,
    stride: usize,
    rng: &mut G,
) -> usize {
    let count = size / stride;
    let mut used = bitvec![0; count];
    used.set(0, true);
    let mut current = 0;
    for _ in 1..count {
        let mut next = rng.gen_range(0..count);
        while used[next] {
            next = (next + 1) % count;
        }
        used.set(next, true);
        link(words, base, current * stride, next * stride);
        current = next;
    }
    link(words, base, current * stride, 0);
    count
}

fn reuse_ring(
    words: &mut [usize],
    base: usize,
    size: usize,
    reuse_bytes: usize,
    line_bytes: usize,
) -> usize {
    let lines = size / line_bytes;
    let reuse_lines = reuse_bytes / line_bytes;
    for k in 0..lines {
        let to = if k < reuse_lines {
            (k + 1) % reuse_lines
        } else {
            k
        };
        link(words, base, k * line_bytes, to * line_bytes);
    }
    reuse_lines
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::region::{AnonymousProvider, RawRegionProvider};
    use rand::rngs::StdRng;
    use rand::SeedableRng;
    use std::collections::HashSet;

    fn builder() -> PatternBuilder<StdRng> {
        PatternBuilder::new(StdRng::seed_from_u64(0x5eed))
    }

    fn region(size: usize) -> Box<dyn MemoryRegion> {
        AnonymousProvider::new(false).acquire(size).unwrap()
    }

    fn assert_single_cycle(cycle: &[usize], expected: usize) {
        assert_eq!(cycle.len(), expected);
        let distinct: HashSet<_> = cycle.iter().collect();
        assert_eq!(distinct.len(), expected);
    }

    #[test]
    fn sequential_covers_every_stride_slot() {
        let mut region = region(1 << 20);
        let pattern = builder()
            .build(&mut region, PatternKind::Sequential { stride: 64 })
            .unwrap();
        assert_eq!(pattern.active_slots, (1 << 20) / 64);
        let cycle = pattern.walk_cycle(&region).unwrap();
        assert_single_cycle(&cycle, (1 << 20) / 64);
        assert!(cycle.windows(2).all(|w| w[1] == w[0] + 64));
    }

    #[test]
    fn sequential_with_word_stride_covers_whole_region() {
        let mut region = region(4096);
        let pattern = builder()
            .build(&mut region, PatternKind::Sequential { stride: 8 })
            .unwrap();
        assert_eq!(pattern.active_slots, 4096 / SLOT_BYTES);
        assert_single_cycle(&pattern.walk_cycle(&region).unwrap(), 4096 / SLOT_BYTES);
    }

    #[test]
    fn sequential_requires_power_of_two() {
        let mut region = region(3 * 4096);
        let err = builder()
            .build(&mut region, PatternKind::Sequential { stride: 64 })
            .unwrap_err();
        assert!(matches!(
            err,
            Error::Config(ConfigError::NotPowerOfTwo { size: 12288 })
        ));
    }

    #[test]
    fn random_jump_is_one_forward_cycle() {
        let mut region = region(1 << 16);
        let pattern = builder()
            .build(&mut region, PatternKind::RandomJump { stride: 64 })
            .unwrap();
        let cycle = pattern.walk_cycle(&region).unwrap();
        assert_single_cycle(&cycle, pattern.active_slots);
        for w in cycle.windows(2) {
            assert!(w[1] > w[0]);
            assert!(w[1] - w[0] < 128);
            assert_eq!(w[1] % SLOT_BYTES, 0);
        }
    }

    #[test]
    fn full_random_visits_each_slot_once() {
        let mut region = region(1 << 18);
        let pattern = builder()
            .build(&mut region, PatternKind::FullRandom { stride: 64 })
            .unwrap();
        let cycle = pattern.walk_cycle(&region).unwrap();
        assert_single_cycle(&cycle, (1 << 18) / 64);
        assert!(cycle.iter().all(|o| o % 64 == 0));
    }

    #[test]
    fn full_random_is_reproducible_for_a_seed() {
        let mut a = region(1 << 14);
        let mut b = region(1 << 14);
        let kind = PatternKind::FullRandom { stride: 64 };
        let pa = PatternBuilder::new(StdRng::seed_from_u64(1))
            .build(&mut a, kind)
            .unwrap();
        let pb = PatternBuilder::new(StdRng::seed_from_u64(1))
            .build(&mut b, kind)
            .unwrap();
        assert_eq!(pa.walk_cycle(&a), pb.walk_cycle(&b));
    }

    #[test]
    fn reuse_ring_leaves_other_lines_isolated() {
        let mut region = region(1 << 16);
        let kind = PatternKind::ReuseDistance {
            reuse_bytes: 4096,
            line_bytes: 64,
        };
        let pattern = builder().build(&mut region, kind).unwrap();
        assert_eq!(pattern.active_slots, 64);
        let cycle = pattern.walk_cycle(&region).unwrap();
        assert_single_cycle(&cycle, 64);
        for line in 64..(1 << 16) / 64 {
            let offset = line * 64;
            assert_eq!(pattern.successor(&region, offset), Some(offset));
        }
    }

    #[test]
    fn reuse_smaller_than_line_is_rejected() {
        let mut region = region(4096);
        let kind = PatternKind::ReuseDistance {
            reuse_bytes: 32,
            line_bytes: 64,
        };
        let err = builder().build(&mut region, kind).unwrap_err();
        assert!(matches!(
            err,
            Error::Config(ConfigError::ReuseSmallerThanLine { .. })
        ));
    }

    #[test]
    fn rebuilding_clears_previous_pattern() {
        let mut region = region(1 << 14);
        let mut builder = builder();
        builder
            .build(&mut region, PatternKind::Sequential { stride: 8 })
            .unwrap();
        let pattern = builder
            .build(&mut region, PatternKind::FullRandom { stride: 256 })
            .unwrap();
        let linked = region.words().iter().filter(|&&w| w != 0).count();
        assert_eq!(linked, pattern.active_slots);
    }

    #[test]
    fn pattern_only_matches_its_region() {
        let mut a = region(4096);
        let b = region(4096);
        let pattern = builder()
            .build(&mut a, PatternKind::Sequential { stride: 64 })
            .unwrap();
        assert!(pattern.matches(&a));
        assert!(!pattern.matches(&b));
    }
}
