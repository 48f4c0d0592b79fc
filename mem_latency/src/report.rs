//! Result lines, as human readable text or CSV.

use std::io::{self, Write};

use crate::config::OutputMode;
use crate::estimator::{Estimate, TrialSample};
use crate::harness::PenaltyResult;

pub struct Reporter<W> {
    out: W,
    mode: OutputMode,
    /// First CSV column: the reuse distance or the stride.
    distance_bytes: usize,
}

impl<W: Write> Reporter<W> {
    pub fn new(out: W, mode: OutputMode, distance_bytes: usize) -> Reporter<W> {
        Reporter {
            out,
            mode,
            distance_bytes,
        }
    }

    pub fn into_inner(self) -> W {
        self.out
    }

    pub fn begin(&mut self, label: &str) -> io::Result<()> {
        match self.mode {
            OutputMode::Text => writeln!(self.out, "{} Memory Test", label),
            OutputMode::Csv => Ok(()),
        }
    }

    pub fn trial(&mut self, index: usize, sample: &TrialSample) -> io::Result<()> {
        match self.mode {
            OutputMode::Text => writeln!(self.out, "{}: {:.2}", index + 1, sample.ticks_per_load()),
            OutputMode::Csv => Ok(()),
        }
    }

    pub fn summary(&mut self, label: &str, estimate: &Estimate) -> io::Result<()> {
        match self.mode {
            OutputMode::Text => writeln!(
                self.out,
                "{} Memory Latency: average = {:.6} usec",
                label,
                estimate.latency_usec().mean
            ),
            OutputMode::Csv => writeln!(
                self.out,
                "{},{:.3},{}",
                self.distance_bytes,
                estimate.latency_ticks().mean,
                estimate.loads()
            ),
        }
    }

    pub fn penalty(&mut self, penalty: &PenaltyResult) -> io::Result<()> {
        match self.mode {
            OutputMode::Text => writeln!(self.out, "Access Penalty: {:.2} %", penalty.penalty_pct),
            OutputMode::Csv => writeln!(self.out, "penalty_pct,{:.3}", penalty.penalty_pct),
        }
    }

    pub fn flush(&mut self) -> io::Result<()> {
        self.out.flush()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::Unit;
    use crate::estimator::LatencyStatistic;

    fn estimate() -> Estimate {
        let mut sample = TrialSample::default();
        sample.record(2048);
        Estimate {
            samples: vec![sample; 3],
            ticks_per_load: 2.0,
            ticks_per_usec: 1000.0,
            clock_unit: Unit::Nsec,
        }
    }

    fn lines(reporter: Reporter<Vec<u8>>) -> Vec<String> {
        String::from_utf8(reporter.into_inner())
            .unwrap()
            .lines()
            .map(str::to_owned)
            .collect()
    }

    #[test]
    fn text_lines() {
        let mut reporter = Reporter::new(Vec::new(), OutputMode::Text, 64);
        let estimate = estimate();
        reporter.begin("Local").unwrap();
        for (i, s) in estimate.samples.iter().enumerate() {
            reporter.trial(i, s).unwrap();
        }
        reporter.summary("Local", &estimate).unwrap();
        assert_eq!(
            lines(reporter),
            vec![
                "Local Memory Test",
                "1: 2.00",
                "2: 2.00",
                "3: 2.00",
                "Local Memory Latency: average = 0.002000 usec",
            ]
        );
    }

    #[test]
    fn csv_line_per_run() {
        let mut reporter = Reporter::new(Vec::new(), OutputMode::Csv, 65536);
        let estimate = estimate();
        reporter.begin("Local").unwrap();
        reporter.trial(0, &estimate.samples[0]).unwrap();
        reporter.summary("Local", &estimate).unwrap();
        let stat = LatencyStatistic {
            mean: 1.0,
            unit: Unit::Usec,
            sample_count: 3,
        };
        let penalty = PenaltyResult::new(stat, LatencyStatistic { mean: 1.5, ..stat }).unwrap();
        reporter.penalty(&penalty).unwrap();
        assert_eq!(lines(reporter), vec!["65536,2.000,3072", "penalty_pct,50.000"]);
    }
}
