//! Timing sources for the chase.

use std::str::FromStr;
use std::time::{Duration, Instant};

use log::{info, warn};

/// Ticks per microsecond assumed for the wall clock: one tick per nanosecond.
pub const CLOCK_PER_USEC: f64 = 1000.0;

/// How long the cycle counter is compared against the wall clock when calibrating.
pub const CALIBRATION_WINDOW: Duration = Duration::from_millis(20);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Unit {
    Cycles,
    Usec,
    Nsec,
}

impl Unit {
    pub fn suffix(&self) -> &'static str {
        match self {
            Unit::Cycles => "cycles",
            Unit::Usec => "usec",
            Unit::Nsec => "nsec",
        }
    }
}

/// A monotonic tick source.
pub trait Clock {
    fn now(&self) -> u64;

    /// What one tick is.
    fn unit(&self) -> Unit;

    /// Conversion factor from ticks to microseconds.
    fn ticks_per_usec(&self) -> f64;
}

/// The CPU cycle counter (`rdtsc` on x86_64, `rdcycle` on riscv64).
#[derive(Debug, Clone, Copy)]
pub struct CycleCounter {
    ticks_per_usec: f64,
}

impl CycleCounter {
    /// A cycle counter with a known rate. `None` when the target has no counter.
    pub fn with_rate(ticks_per_usec: f64) -> Option<CycleCounter> {
        if cache_utils::HAS_CYCLE_COUNTER {
            Some(CycleCounter { ticks_per_usec })
        } else {
            None
        }
    }

    /// Estimate the counter rate by timing a busy wait against the monotonic clock.
    pub fn calibrate() -> Option<CycleCounter> {
        let t0 = cache_utils::cycle_counter()?;
        let start = Instant::now();
        while start.elapsed() < CALIBRATION_WINDOW {
            std::hint::spin_loop();
        }
        let t1 = cache_utils::cycle_counter()?;
        let elapsed = start.elapsed();
        let ticks_per_usec = t1.wrapping_sub(t0) as f64 / (elapsed.as_nanos() as f64 / 1000.0);
        info!("cycle counter runs at {:.1} ticks/usec", ticks_per_usec);
        CycleCounter::with_rate(ticks_per_usec)
    }
}

impl Clock for CycleCounter {
    #[inline(always)]
    fn now(&self) -> u64 {
        cache_utils::cycle_counter().unwrap_or(0)
    }

    fn unit(&self) -> Unit {
        Unit::Cycles
    }

    fn ticks_per_usec(&self) -> f64 {
        self.ticks_per_usec
    }
}

/// Wall clock time since construction, scaled to a fixed tick rate.
#[derive(Debug, Clone, Copy)]
pub struct MonotonicClock {
    origin: Instant,
    ticks_per_usec: f64,
}

impl MonotonicClock {
    pub fn new() -> MonotonicClock {
        MonotonicClock::with_rate(CLOCK_PER_USEC)
    }

    pub fn with_rate(ticks_per_usec: f64) -> MonotonicClock {
        MonotonicClock {
            origin: Instant::now(),
            ticks_per_usec,
        }
    }
}

impl Default for MonotonicClock {
    fn default() -> Self {
        MonotonicClock::new()
    }
}

impl Clock for MonotonicClock {
    #[inline(always)]
    fn now(&self) -> u64 {
        let ns = self.origin.elapsed().as_nanos() as f64;
        (ns * self.ticks_per_usec / 1000.0) as u64
    }

    fn unit(&self) -> Unit {
        if (self.ticks_per_usec - CLOCK_PER_USEC).abs() < f64::EPSILON {
            Unit::Nsec
        } else if (self.ticks_per_usec - 1.0).abs() < f64::EPSILON {
            Unit::Usec
        } else {
            Unit::Cycles
        }
    }

    fn ticks_per_usec(&self) -> f64 {
        self.ticks_per_usec
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClockKind {
    Wall,
    Cycles,
}

impl FromStr for ClockKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "wall" => Ok(ClockKind::Wall),
            "cycles" => Ok(ClockKind::Cycles),
            _ => Err(format!("unknown clock {:?}", s)),
        }
    }
}

/// Either clock, chosen at run time.
#[derive(Debug, Clone, Copy)]
pub enum AnyClock {
    Wall(MonotonicClock),
    Cycles(CycleCounter),
}

impl AnyClock {
    /// Build the requested clock. Falls back to the wall clock when there is no cycle counter.
    pub fn select(kind: ClockKind, ticks_per_usec: Option<f64>) -> AnyClock {
        match kind {
            ClockKind::Wall => AnyClock::wall(ticks_per_usec),
            ClockKind::Cycles => {
                let counter = match ticks_per_usec {
                    Some(rate) => CycleCounter::with_rate(rate),
                    None => CycleCounter::calibrate(),
                };
                match counter {
                    Some(counter) => AnyClock::Cycles(counter),
                    None => {
                        warn!("no cycle counter on this target, using the wall clock");
                        AnyClock::wall(ticks_per_usec)
                    }
                }
            }
        }
    }

    /// The wall clock, at `ticks_per_usec` or one tick per nanosecond.
    fn wall(ticks_per_usec: Option<f64>) -> AnyClock {
        AnyClock::Wall(MonotonicClock::with_rate(
            ticks_per_usec.unwrap_or(CLOCK_PER_USEC),
        ))
    }
}

impl Clock for AnyClock {
    #[inline(always)]
    fn now(&self) -> u64 {
        match self {
            AnyClock::Wall(c) => c.now(),
            AnyClock::Cycles(c) => c.now(),
        }
    }

    fn unit(&self) -> Unit {
        match self {
            AnyClock::Wall(c) => c.unit(),
            AnyClock::Cycles(c) => c.unit(),
        }
    }

    fn ticks_per_usec(&self) -> f64 {
        match self {
            AnyClock::Wall(c) => c.ticks_per_usec(),
            AnyClock::Cycles(c) => c.ticks_per_usec(),
        }
    }
}
