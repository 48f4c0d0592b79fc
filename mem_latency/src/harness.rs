//! Local and remote measurement runs, and the access penalty between them.

use std::fmt;
use std::io::Write;

use log::{info, warn};
use rand::Rng;
use thiserror::Error;

use crate::clock::Clock;
use crate::conditioner::CacheConditioner;
use crate::config::Config;
use crate::error::{Error, Result};
use crate::estimator::{Estimate, LatencyEstimator, LatencyStatistic};
use crate::pattern::PatternBuilder;
use crate::region::RawRegionProvider;
use crate::report::Reporter;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Init,
    LocalAlloc,
    LocalMeasure,
    LocalRelease,
    RemoteAlloc,
    RemoteMeasure,
    RemoteRelease,
    Penalty,
    Done,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Stage::Init => "initialisation",
            Stage::LocalAlloc => "local region allocation",
            Stage::LocalMeasure => "local measurement",
            Stage::LocalRelease => "local region release",
            Stage::RemoteAlloc => "remote region mapping",
            Stage::RemoteMeasure => "remote measurement",
            Stage::RemoteRelease => "remote region release",
            Stage::Penalty => "penalty computation",
            Stage::Done => "completion",
        };
        f.write_str(name)
    }
}

/// An error, tagged with the stage it stopped the run in.
#[derive(Debug, Error)]
#[error("{stage} failed: {source}")]
pub struct HarnessError {
    pub stage: Stage,
    #[source]
    pub source: Error,
}

/// Relative latency overhead of `remote` over `local`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PenaltyResult {
    pub local: LatencyStatistic,
    pub remote: LatencyStatistic,
    pub penalty_pct: f64,
}

impl PenaltyResult {
    pub fn new(local: LatencyStatistic, remote: LatencyStatistic) -> Result<PenaltyResult> {
        if !(local.mean > 0.0) {
            return Err(Error::DegenerateBaseline);
        }
        Ok(PenaltyResult {
            local,
            remote,
            penalty_pct: (remote.mean - local.mean) / local.mean * 100.0,
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Side {
    Local,
    Remote,
}

impl Side {
    fn label(self) -> &'static str {
        match self {
            Side::Local => "Local",
            Side::Remote => "Remote",
        }
    }

    fn stages(self) -> (Stage, Stage, Stage) {
        match self {
            Side::Local => (Stage::LocalAlloc, Stage::LocalMeasure, Stage::LocalRelease),
            Side::Remote => (Stage::RemoteAlloc, Stage::RemoteMeasure, Stage::RemoteRelease),
        }
    }
}

/// Everything a completed run produced.
#[derive(Debug, Clone, PartialEq)]
pub struct Outcome {
    pub local: Estimate,
    pub remote: Option<Estimate>,
    pub penalty: Option<PenaltyResult>,
}

pub struct Harness<'a, C, G> {
    config: &'a Config,
    clock: &'a C,
    builder: PatternBuilder<G>,
    conditioner: CacheConditioner,
    stage: Stage,
}

impl<'a, C: Clock, G: Rng> Harness<'a, C, G> {
    pub fn new(config: &'a Config, clock: &'a C, rng: G) -> Harness<'a, C, G> {
        Harness {
            config,
            clock,
            builder: PatternBuilder::new(rng),
            conditioner: CacheConditioner::for_target(config.flood),
            stage: Stage::Init,
        }
    }

    pub fn stage(&self) -> Stage {
        self.stage
    }

    fn advance(&mut self, stage: Stage) {
        info!("entering {}", stage);
        self.stage = stage;
    }

    fn fail(&self, source: Error) -> HarnessError {
        HarnessError {
            stage: self.stage,
            source,
        }
    }

    /// Measure `local`, then `remote` when given, and report as results come in.
    ///
    /// Output already written for the local region stays valid if the remote branch fails.
    pub fn run<W: Write>(
        &mut self,
        local: &dyn RawRegionProvider,
        remote: Option<&dyn RawRegionProvider>,
        reporter: &mut Reporter<W>,
    ) -> std::result::Result<Outcome, HarnessError> {
        self.stage = Stage::Init;
        self.config
            .validate()
            .map_err(|e| self.fail(Error::from(e)))?;
        info!(
            "{} pattern, {} bytes, {} trials of {} chases, flood {} bytes",
            self.config.pattern_kind().name(),
            self.config.effective_size_bytes(),
            self.config.trials,
            self.config.chases_per_trial,
            self.conditioner.capacity_bytes()
        );

        let local = self.measure(Side::Local, local, reporter)?;

        let (remote, penalty) = match remote {
            Some(provider) => {
                let remote = self.measure(Side::Remote, provider, reporter)?;
                self.advance(Stage::Penalty);
                let penalty = PenaltyResult::new(local.latency_usec(), remote.latency_usec())
                    .map_err(|e| self.fail(e))?;
                reporter
                    .penalty(&penalty)
                    .map_err(|e| self.fail(Error::from(e)))?;
                (Some(remote), Some(penalty))
            }
            None => (None, None),
        };

        reporter.flush().map_err(|e| self.fail(Error::from(e)))?;
        self.advance(Stage::Done);
        Ok(Outcome {
            local,
            remote,
            penalty,
        })
    }

    fn measure<W: Write>(
        &mut self,
        side: Side,
        provider: &dyn RawRegionProvider,
        reporter: &mut Reporter<W>,
    ) -> std::result::Result<Estimate, HarnessError> {
        let (alloc, measure, release) = side.stages();
        let size = self.config.effective_size_bytes();
        if size != self.config.size_bytes {
            warn!(
                "array of {} bytes is too small for a reuse distance of {} bytes, using {} bytes",
                self.config.size_bytes, self.config.reuse_bytes, size
            );
        }

        self.advance(alloc);
        info!("acquiring {} bytes of {}", size, provider.describe());
        let mut region = provider.acquire(size).map_err(|e| self.fail(e))?;

        self.advance(measure);
        let pattern = self
            .builder
            .build(&mut region, self.config.pattern_kind())
            .map_err(|e| self.fail(e))?;
        reporter
            .begin(side.label())
            .map_err(|e| self.fail(Error::from(e)))?;

        let mut write_error = None;
        let estimate = LatencyEstimator::new(&mut self.conditioner, self.config.estimator_options())
            .estimate(&region, &pattern, self.clock, |index, sample| {
                if write_error.is_none() {
                    write_error = reporter.trial(index, sample).err();
                }
            });
        let estimate = estimate.map_err(|e| self.fail(e))?;
        if let Some(e) = write_error {
            return Err(self.fail(Error::from(e)));
        }
        reporter
            .summary(side.label(), &estimate)
            .map_err(|e| self.fail(Error::from(e)))?;

        self.advance(release);
        drop(region);
        Ok(estimate)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn stat(mean: f64) -> LatencyStatistic {
        LatencyStatistic {
            mean,
            unit: crate::clock::Unit::Usec,
            sample_count: 5,
        }
    }

    #[test]
    fn penalty_formula() {
        let p = PenaltyResult::new(stat(0.08), stat(0.2)).unwrap();
        assert!((p.penalty_pct - 150.0).abs() < 1e-9);
        let p = PenaltyResult::new(stat(2.0), stat(1.0)).unwrap();
        assert_eq!(p.penalty_pct, -50.0);
    }

    #[test]
    fn zero_baseline_has_no_penalty() {
        assert!(matches!(
            PenaltyResult::new(stat(0.0), stat(1.0)),
            Err(Error::DegenerateBaseline)
        ));
    }

    #[test]
    fn stage_names_read_as_steps() {
        let err = HarnessError {
            stage: Stage::RemoteAlloc,
            source: Error::PatternMismatch,
        };
        assert_eq!(
            err.to_string(),
            "remote region mapping failed: the pattern was not built in this region"
        );
    }
}
