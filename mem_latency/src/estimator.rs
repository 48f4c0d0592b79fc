//! Repeated chases reduced to a single latency figure.

use itertools::{Itertools, MinMaxResult};
use log::debug;

use crate::chaser::{Chaser, CHASE_STEPS};
use crate::clock::{Clock, Unit};
use crate::conditioner::CacheConditioner;
use crate::error::{ConfigError, Error, Result};
use crate::pattern::Pattern;
use crate::region::MemoryRegion;

/// Chases timed back to back inside one trial.
pub const CHASES_PER_TRIAL: usize = 4096;

/// The smallest trial count the min/max trimmed mean is defined for.
pub const MIN_TRIALS: usize = 3;

/// Aggregate of the chases of one trial.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct TrialSample {
    pub chases: usize,
    pub sum: u64,
    pub sum2: u128,
    pub min: u64,
    pub max: u64,
}

impl TrialSample {
    pub fn record(&mut self, delta: u64) {
        if self.chases == 0 {
            self.min = delta;
            self.max = delta;
        } else {
            self.min = self.min.min(delta);
            self.max = self.max.max(delta);
        }
        self.chases += 1;
        self.sum = self.sum.wrapping_add(delta);
        self.sum2 = self.sum2.wrapping_add(delta as u128 * delta as u128);
    }

    pub fn loads(&self) -> usize {
        self.chases * CHASE_STEPS
    }

    /// Mean ticks per dependent load.
    pub fn ticks_per_load(&self) -> f64 {
        if self.chases == 0 {
            return 0.0;
        }
        self.sum as f64 / self.loads() as f64
    }

    /// Sample standard deviation of the ticks of a whole chase.
    pub fn chase_stddev(&self) -> f64 {
        if self.chases < 2 {
            return 0.0;
        }
        let n = self.chases as f64;
        let sum = self.sum as f64;
        let var = (self.sum2 as f64 - sum * sum / n) / (n - 1.0);
        var.max(0.0).sqrt()
    }
}

/// A derived latency figure.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LatencyStatistic {
    pub mean: f64,
    pub unit: Unit,
    pub sample_count: usize,
}

/// `(sum - min - max) / (n - 2)`: the mean once the two extreme values are dropped.
pub fn trimmed_mean(values: &[f64]) -> Result<f64> {
    if values.len() < MIN_TRIALS {
        return Err(Error::TooFewTrials {
            trials: values.len(),
        });
    }
    let (min, max) = match values.iter().copied().minmax() {
        MinMaxResult::MinMax(min, max) => (min, max),
        MinMaxResult::OneElement(v) => (v, v),
        MinMaxResult::NoElements => unreachable!(),
    };
    let sum: f64 = values.iter().sum();
    Ok((sum - min - max) / (values.len() - 2) as f64)
}

/// Knobs of one estimator run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EstimatorOptions {
    pub trials: usize,
    pub chases_per_trial: usize,
    /// Walk the whole cycle once after flooding, before timing.
    pub warmup: bool,
}

impl EstimatorOptions {
    pub fn new(trials: usize) -> EstimatorOptions {
        EstimatorOptions {
            trials,
            chases_per_trial: CHASES_PER_TRIAL,
            warmup: false,
        }
    }

    pub fn validate(&self) -> std::result::Result<(), ConfigError> {
        if self.trials < MIN_TRIALS {
            return Err(ConfigError::TooFewTrials {
                trials: self.trials,
                min: MIN_TRIALS,
            });
        }
        if self.chases_per_trial == 0 {
            return Err(ConfigError::InvalidNumber {
                name: "chases per trial",
                value: "0".to_owned(),
            });
        }
        Ok(())
    }

    /// Dependent loads timed over the whole run.
    pub fn loads(&self) -> usize {
        self.trials * self.chases_per_trial * CHASE_STEPS
    }
}

/// Outcome of one estimator run.
#[derive(Debug, Clone, PartialEq)]
pub struct Estimate {
    pub samples: Vec<TrialSample>,
    /// Trimmed mean of the per-trial ticks per load.
    pub ticks_per_load: f64,
    pub ticks_per_usec: f64,
    pub clock_unit: Unit,
}

impl Estimate {
    pub fn latency_usec(&self) -> LatencyStatistic {
        LatencyStatistic {
            mean: self.ticks_per_load / self.ticks_per_usec,
            unit: Unit::Usec,
            sample_count: self.samples.len(),
        }
    }

    pub fn latency_ticks(&self) -> LatencyStatistic {
        LatencyStatistic {
            mean: self.ticks_per_load,
            unit: self.clock_unit,
            sample_count: self.samples.len(),
        }
    }

    pub fn loads(&self) -> usize {
        self.samples.iter().map(TrialSample::loads).sum()
    }
}

pub struct LatencyEstimator<'c> {
    conditioner: &'c mut CacheConditioner,
    options: EstimatorOptions,
}

impl<'c> LatencyEstimator<'c> {
    pub fn new(conditioner: &'c mut CacheConditioner, options: EstimatorOptions) -> Self {
        LatencyEstimator {
            conditioner,
            options,
        }
    }

    /// Run every trial over `pattern` and reduce them.
    ///
    /// Each trial floods the cache once, then times `chases_per_trial` chases back to back; the
    /// cursor carries over from one chase and one trial to the next. `on_trial` sees every
    /// trial as soon as it completes.
    pub fn estimate<R, C, F>(
        &mut self,
        region: &R,
        pattern: &Pattern,
        clock: &C,
        mut on_trial: F,
    ) -> Result<Estimate>
    where
        R: MemoryRegion + ?Sized,
        C: Clock,
        F: FnMut(usize, &TrialSample),
    {
        if self.options.trials < MIN_TRIALS {
            return Err(Error::TooFewTrials {
                trials: self.options.trials,
            });
        }
        let chaser = Chaser::new(region, pattern, clock)?;
        let mut cursor = chaser.start();
        let mut samples = Vec::with_capacity(self.options.trials);

        for trial in 0..self.options.trials {
            self.conditioner.flood();
            if self.options.warmup {
                cursor = chaser.walk(cursor, pattern.active_slots);
            }

            let mut sample = TrialSample::default();
            for _ in 0..self.options.chases_per_trial {
                let (next, delta) = chaser.chase(cursor);
                cursor = next;
                sample.record(delta);
            }
            debug!(
                "trial {}: {:.3} ticks/load, chase min {} max {} stddev {:.1}",
                trial + 1,
                sample.ticks_per_load(),
                sample.min,
                sample.max,
                sample.chase_stddev()
            );
            on_trial(trial, &sample);
            samples.push(sample);
        }

        let per_load: Vec<f64> = samples.iter().map(TrialSample::ticks_per_load).collect();
        let ticks_per_load = trimmed_mean(&per_load)?;
        Ok(Estimate {
            samples,
            ticks_per_load,
            ticks_per_usec: clock.ticks_per_usec(),
            clock_unit: clock.unit(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pattern::{PatternBuilder, PatternKind};
    use crate::region::{AnonymousProvider, RawRegionProvider};
    use rand::rngs::StdRng;
    use rand::SeedableRng;
    use std::cell::{Cell, RefCell};

    /// Replays a script of chase durations. Each chase reads the clock twice.
    struct ScriptedClock {
        deltas: RefCell<Vec<u64>>,
        now: Cell<u64>,
        reads: Cell<usize>,
    }

    impl ScriptedClock {
        fn new(mut deltas: Vec<u64>) -> ScriptedClock {
            deltas.reverse();
            ScriptedClock {
                deltas: RefCell::new(deltas),
                now: Cell::new(0),
                reads: Cell::new(0),
            }
        }
    }

    impl Clock for ScriptedClock {
        fn now(&self) -> u64 {
            let reads = self.reads.get();
            self.reads.set(reads + 1);
            if reads % 2 == 1 {
                let delta = self.deltas.borrow_mut().pop().unwrap_or(0);
                self.now.set(self.now.get() + delta);
            }
            self.now.get()
        }

        fn unit(&self) -> Unit {
            Unit::Cycles
        }

        fn ticks_per_usec(&self) -> f64 {
            2.0
        }
    }

    #[test]
    fn trimmed_mean_drops_extremes() {
        let values = [10.0, 2.0, 7.0, 100.0, 5.0];
        assert_eq!(trimmed_mean(&values).unwrap(), (10.0 + 7.0 + 5.0) / 3.0);
    }

    #[test]
    fn trimmed_mean_of_three_is_the_median() {
        assert_eq!(trimmed_mean(&[3.0, 1.0, 2.0]).unwrap(), 2.0);
    }

    #[test]
    fn trimmed_mean_with_repeated_extremes_drops_one_each() {
        assert_eq!(trimmed_mean(&[1.0, 1.0, 4.0, 4.0]).unwrap(), 2.5);
    }

    #[test]
    fn two_trials_are_rejected() {
        assert!(matches!(
            trimmed_mean(&[1.0, 2.0]),
            Err(Error::TooFewTrials { trials: 2 })
        ));
        assert!(matches!(
            EstimatorOptions::new(2).validate(),
            Err(ConfigError::TooFewTrials { trials: 2, min: 3 })
        ));
    }

    #[test]
    fn sample_statistics() {
        let mut sample = TrialSample::default();
        for d in &[1024u64, 2048, 3072] {
            sample.record(*d);
        }
        assert_eq!(sample.min, 1024);
        assert_eq!(sample.max, 3072);
        assert_eq!(sample.ticks_per_load(), 2.0);
        assert!((sample.chase_stddev() - 1024.0).abs() < 1e-9);
    }

    #[test]
    fn estimate_reduces_scripted_trials() {
        let mut region = AnonymousProvider::new(false).acquire(1 << 16).unwrap();
        let pattern = PatternBuilder::new(StdRng::seed_from_u64(3))
            .build(&mut region, PatternKind::Sequential { stride: 64 })
            .unwrap();
        // Two chases per trial; trial means in ticks per load are 1, 3, 2, 9, 4.
        let per_trial = [1u64, 3, 2, 9, 4];
        let script = per_trial
            .iter()
            .flat_map(|&t| vec![t * CHASE_STEPS as u64; 2])
            .collect();
        let clock = ScriptedClock::new(script);

        let mut conditioner = CacheConditioner::new(4096);
        let options = EstimatorOptions {
            trials: 5,
            chases_per_trial: 2,
            warmup: true,
        };
        let mut seen = Vec::new();
        let estimate = LatencyEstimator::new(&mut conditioner, options)
            .estimate(&region, &pattern, &clock, |i, s| seen.push((i, s.ticks_per_load())))
            .unwrap();

        assert_eq!(
            seen,
            vec![(0, 1.0), (1, 3.0), (2, 2.0), (3, 9.0), (4, 4.0)]
        );
        assert_eq!(estimate.ticks_per_load, 3.0);
        assert_eq!(estimate.latency_usec().mean, 1.5);
        assert_eq!(estimate.latency_usec().sample_count, 5);
        assert_eq!(estimate.latency_ticks().unit, Unit::Cycles);
        assert_eq!(estimate.loads(), 5 * 2 * CHASE_STEPS);
    }

    #[test]
    fn estimator_refuses_too_few_trials() {
        let mut region = AnonymousProvider::new(false).acquire(4096).unwrap();
        let pattern = PatternBuilder::new(StdRng::seed_from_u64(3))
            .build(&mut region, PatternKind::Sequential { stride: 64 })
            .unwrap();
        let clock = ScriptedClock::new(Vec::new());
        let mut conditioner = CacheConditioner::new(64);
        let res = LatencyEstimator::new(&mut conditioner, EstimatorOptions::new(2)).estimate(
            &region,
            &pattern,
            &clock,
            |_, _| {},
        );
        assert!(matches!(res, Err(Error::TooFewTrials { trials: 2 })));
    }
}
