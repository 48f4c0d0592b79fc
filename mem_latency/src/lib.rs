#![deny(unsafe_op_in_unsafe_fn)]

//! Memory latency measurement by pointer chasing.
//!
//! A region is threaded with a cyclic chain of absolute addresses ([`pattern`]), the chain is
//! followed by an unrolled sequence of dependent loads ([`chaser`]) after the caches have been
//! flooded ([`conditioner`]), and repeated trials are reduced to a trimmed mean
//! ([`estimator`]). The [`harness`] runs this over ordinary memory and optionally over a
//! mapping of a memory device, and derives the access penalty between the two.

pub mod chaser;
pub mod clock;
pub mod conditioner;
pub mod config;
pub mod error;
pub mod estimator;
pub mod harness;
pub mod pattern;
pub mod region;
pub mod report;

pub use crate::clock::{AnyClock, Clock, ClockKind};
pub use crate::config::{Config, OutputMode, PatternChoice};
pub use crate::error::{ConfigError, Error, Result};
pub use crate::estimator::{Estimate, LatencyEstimator, LatencyStatistic};
pub use crate::harness::{Harness, HarnessError, Outcome, PenaltyResult, Stage};
pub use crate::pattern::{Pattern, PatternBuilder, PatternKind};
pub use crate::region::{AnonymousProvider, DeviceProvider, MemoryRegion, RawRegionProvider};
pub use crate::report::Reporter;
