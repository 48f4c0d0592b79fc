use std::io;
use std::path::PathBuf;

use thiserror::Error;

/// A configuration that cannot be measured. Detected before any memory is allocated.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    #[error("invalid value {value:?} for {name}")]
    InvalidNumber { name: &'static str, value: String },
    #[error("line size must be a non-zero multiple of {word} bytes, got {line}")]
    BadLineSize { line: usize, word: usize },
    #[error("reuse distance ({reuse} bytes) must be at least one line ({line} bytes)")]
    ReuseSmallerThanLine { reuse: usize, line: usize },
    #[error("region size {size} is not a power of two")]
    NotPowerOfTwo { size: usize },
    #[error("stride {stride} must be a non-zero multiple of {word} bytes smaller than the region ({size} bytes)")]
    BadStride { stride: usize, size: usize, word: usize },
    #[error("region size {size} is smaller than one slot ({slot} bytes)")]
    RegionTooSmall { size: usize, slot: usize },
    #[error("at least {min} trials are required, got {trials}")]
    TooFewTrials { trials: usize, min: usize },
}

#[derive(Debug, Error)]
pub enum Error {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("unable to allocate {size} bytes: {source}")]
    Allocation {
        size: usize,
        #[source]
        source: nix::Error,
    },
    #[error("unable to open {}: {source}", path.display())]
    DeviceOpen {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("unable to map {size} bytes of {} at {offset:#x}: {source}", path.display())]
    DeviceMap {
        path: PathBuf,
        offset: u64,
        size: usize,
        #[source]
        source: nix::Error,
    },
    #[error("the trimmed mean needs at least 3 trials, got {trials}")]
    TooFewTrials { trials: usize },
    #[error("the reference latency is not positive, no penalty can be derived")]
    DegenerateBaseline,
    #[error("the pattern was not built in this region")]
    PatternMismatch,
    #[error("unable to write results: {0}")]
    Output(#[from] io::Error),
}

pub type Result<T> = std::result::Result<T, Error>;
