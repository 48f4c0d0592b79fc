//! The timed dependent-load chain.

use core::marker::PhantomData;
use core::sync::atomic::{compiler_fence, Ordering};
use std::hint::black_box;

use cache_utils::load_next;

use crate::clock::Clock;
use crate::error::{Error, Result};
use crate::pattern::Pattern;
use crate::region::MemoryRegion;

/// Number of dependent loads in one timed chase.
pub const CHASE_STEPS: usize = 1024;

// Each level doubles the previous one so that `chase1024` expands to 1024 straight-line loads.
macro_rules! chase1 {
    ($p:ident) => {
        $p = unsafe { load_next($p) };
    };
}
macro_rules! chase2 {
    ($p:ident) => {
        chase1!($p);
        chase1!($p);
    };
}
macro_rules! chase4 {
    ($p:ident) => {
        chase2!($p);
        chase2!($p);
    };
}
macro_rules! chase8 {
    ($p:ident) => {
        chase4!($p);
        chase4!($p);
    };
}
macro_rules! chase16 {
    ($p:ident) => {
        chase8!($p);
        chase8!($p);
    };
}
macro_rules! chase32 {
    ($p:ident) => {
        chase16!($p);
        chase16!($p);
    };
}
macro_rules! chase64 {
    ($p:ident) => {
        chase32!($p);
        chase32!($p);
    };
}
macro_rules! chase128 {
    ($p:ident) => {
        chase64!($p);
        chase64!($p);
    };
}
macro_rules! chase256 {
    ($p:ident) => {
        chase128!($p);
        chase128!($p);
    };
}
macro_rules! chase512 {
    ($p:ident) => {
        chase256!($p);
        chase256!($p);
    };
}
macro_rules! chase1024 {
    ($p:ident) => {
        chase512!($p);
        chase512!($p);
    };
}

/// A position on a pattern's cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Cursor(*const usize);

impl Cursor {
    /// Byte offset of the cursor in `region`.
    pub fn offset_in<R: MemoryRegion + ?Sized>(&self, region: &R) -> Option<usize> {
        region.offset_of(self.0 as usize)
    }
}

/// Follows the cycle of a pattern laid out in a borrowed region.
///
/// The borrow keeps the region alive and unmodified for as long as cursors are being chased,
/// which is what makes the raw loads sound.
pub struct Chaser<'a, R: ?Sized, C> {
    region: PhantomData<&'a R>,
    start: Cursor,
    clock: &'a C,
}

impl<'a, R: MemoryRegion + ?Sized, C: Clock> Chaser<'a, R, C> {
    pub fn new(region: &'a R, pattern: &Pattern, clock: &'a C) -> Result<Chaser<'a, R, C>> {
        if !pattern.matches(region) {
            return Err(Error::PatternMismatch);
        }
        Ok(Chaser {
            region: PhantomData,
            start: Cursor(pattern.start()),
            clock,
        })
    }

    /// The first slot of the cycle.
    pub fn start(&self) -> Cursor {
        self.start
    }

    /// Time exactly [`CHASE_STEPS`] dependent loads from `from`.
    ///
    /// Returns where the chain ended and the elapsed ticks.
    #[inline(never)]
    pub fn chase(&self, from: Cursor) -> (Cursor, u64) {
        let mut p = from.0;
        let start = self.clock.now();
        compiler_fence(Ordering::SeqCst);
        chase1024!(p);
        compiler_fence(Ordering::SeqCst);
        let end = self.clock.now();
        (Cursor(black_box(p)), end.wrapping_sub(start))
    }

    /// Follow `loads` links without timing them.
    pub fn walk(&self, from: Cursor, loads: usize) -> Cursor {
        let mut p = from.0;
        for _ in 0..loads {
            chase1!(p);
        }
        Cursor(black_box(p))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::{MonotonicClock, Unit};
    use crate::pattern::{PatternBuilder, PatternKind};
    use crate::region::{AnonymousProvider, RawRegionProvider};
    use rand::rngs::StdRng;
    use rand::SeedableRng;
    use std::cell::Cell;

    /// Advances by a fixed amount on every read.
    struct StepClock {
        t: Cell<u64>,
        step: u64,
    }

    impl Clock for StepClock {
        fn now(&self) -> u64 {
            let t = self.t.get();
            self.t.set(t + self.step);
            t
        }

        fn unit(&self) -> Unit {
            Unit::Cycles
        }

        fn ticks_per_usec(&self) -> f64 {
            1.0
        }
    }

    fn build(size: usize, kind: PatternKind) -> (Box<dyn MemoryRegion>, Pattern) {
        let mut region = AnonymousProvider::new(false).acquire(size).unwrap();
        let pattern = PatternBuilder::new(StdRng::seed_from_u64(7))
            .build(&mut region, kind)
            .unwrap();
        (region, pattern)
    }

    #[test]
    fn one_chase_advances_exactly_chase_steps() {
        // 4096 slots of 8 bytes: after 1024 sequential steps the cursor sits at slot 1024.
        let (region, pattern) = build(1 << 15, PatternKind::Sequential { stride: 8 });
        let clock = MonotonicClock::new();
        let chaser = Chaser::new(&region, &pattern, &clock).unwrap();
        let (end, _) = chaser.chase(chaser.start());
        assert_eq!(end.offset_in(&region), Some(CHASE_STEPS * 8));
        let (end, _) = chaser.chase(end);
        assert_eq!(end.offset_in(&region), Some(2 * CHASE_STEPS * 8));
    }

    #[test]
    fn chase_wraps_around_short_cycles() {
        // 64 line ring: 1024 = 16 * 64 steps lands back on the start.
        let kind = PatternKind::ReuseDistance {
            reuse_bytes: 64 * 64,
            line_bytes: 64,
        };
        let (region, pattern) = build(1 << 14, kind);
        let clock = MonotonicClock::new();
        let chaser = Chaser::new(&region, &pattern, &clock).unwrap();
        let (end, _) = chaser.chase(chaser.start());
        assert_eq!(end, chaser.start());
    }

    #[test]
    fn elapsed_is_end_minus_start() {
        let (region, pattern) = build(1 << 12, PatternKind::Sequential { stride: 64 });
        let clock = StepClock {
            t: Cell::new(100),
            step: 37,
        };
        let chaser = Chaser::new(&region, &pattern, &clock).unwrap();
        let (_, elapsed) = chaser.chase(chaser.start());
        assert_eq!(elapsed, 37);
    }

    #[test]
    fn walk_matches_chase_position() {
        let (region, pattern) = build(1 << 16, PatternKind::FullRandom { stride: 64 });
        let clock = MonotonicClock::new();
        let chaser = Chaser::new(&region, &pattern, &clock).unwrap();
        let (chased, _) = chaser.chase(chaser.start());
        let walked = chaser.walk(chaser.start(), CHASE_STEPS);
        assert_eq!(chased, walked);
    }

    #[test]
    fn foreign_pattern_is_rejected() {
        let (_region, pattern) = build(1 << 12, PatternKind::Sequential { stride: 64 });
        let other = AnonymousProvider::new(false).acquire(1 << 12).unwrap();
        let clock = MonotonicClock::new();
        assert!(matches!(
            Chaser::new(&other, &pattern, &clock),
            Err(Error::PatternMismatch)
        ));
    }
}
