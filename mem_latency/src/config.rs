//! Validated run configuration, assembled by the binaries from their command lines.

use std::path::PathBuf;
use std::str::FromStr;

use crate::clock::ClockKind;
use crate::conditioner::FloodTarget;
use crate::error::ConfigError;
use crate::estimator::{EstimatorOptions, CHASES_PER_TRIAL};
use crate::pattern::PatternKind;
use crate::region::{DeviceProvider, DEFAULT_DEVICE_PATH, DEFAULT_PHYS_OFFSET};

pub const DEFAULT_LINE_BYTES: usize = 64;
pub const DEFAULT_REUSE_BYTES: usize = 64 << 10;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PatternChoice {
    Sequential,
    Random,
    FullRandom,
    Reuse,
}

impl FromStr for PatternChoice {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "sequential" => Ok(PatternChoice::Sequential),
            "random" => Ok(PatternChoice::Random),
            "full-random" => Ok(PatternChoice::FullRandom),
            "reuse" => Ok(PatternChoice::Reuse),
            _ => Err(format!("unknown pattern {:?}", s)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputMode {
    Text,
    Csv,
}

impl FromStr for OutputMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "text" => Ok(OutputMode::Text),
            "csv" => Ok(OutputMode::Csv),
            _ => Err(format!("unknown output format {:?}", s)),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Config {
    /// Requested region size; see [`Config::effective_size_bytes`].
    pub size_bytes: usize,
    pub stride_bytes: usize,
    pub trials: usize,
    pub skip_remote: bool,
    pub pattern: PatternChoice,
    pub reuse_bytes: usize,
    pub line_bytes: usize,
    pub output: OutputMode,
    pub seed: Option<u64>,
    pub warmup: bool,
    pub chases_per_trial: usize,
    pub flood: FloodTarget,
    pub clock: ClockKind,
    pub ticks_per_usec: Option<f64>,
    pub device_path: PathBuf,
    pub phys_offset: u64,
    pub huge_pages: bool,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            size_bytes: 1 << 20,
            stride_bytes: DEFAULT_LINE_BYTES,
            trials: 5,
            skip_remote: false,
            pattern: PatternChoice::Sequential,
            reuse_bytes: DEFAULT_REUSE_BYTES,
            line_bytes: DEFAULT_LINE_BYTES,
            output: OutputMode::Text,
            seed: None,
            warmup: false,
            chases_per_trial: CHASES_PER_TRIAL,
            flood: FloodTarget::default(),
            clock: ClockKind::Cycles,
            ticks_per_usec: None,
            device_path: PathBuf::from(DEFAULT_DEVICE_PATH),
            phys_offset: DEFAULT_PHYS_OFFSET,
            huge_pages: false,
        }
    }
}

/// Region size actually used for a reuse distance measurement: an array smaller than twice
/// the reuse distance is raised to four times the reuse distance.
pub fn adjusted_array_bytes(array_bytes: usize, reuse_bytes: usize) -> usize {
    if array_bytes < reuse_bytes.saturating_mul(2) {
        reuse_bytes.saturating_mul(4)
    } else {
        array_bytes
    }
}

impl Config {
    pub fn pattern_kind(&self) -> PatternKind {
        match self.pattern {
            PatternChoice::Sequential => PatternKind::Sequential {
                stride: self.stride_bytes,
            },
            PatternChoice::Random => PatternKind::RandomJump {
                stride: self.stride_bytes,
            },
            PatternChoice::FullRandom => PatternKind::FullRandom {
                stride: self.stride_bytes,
            },
            PatternChoice::Reuse => PatternKind::ReuseDistance {
                reuse_bytes: self.reuse_bytes,
                line_bytes: self.line_bytes,
            },
        }
    }

    pub fn effective_size_bytes(&self) -> usize {
        match self.pattern {
            PatternChoice::Reuse => adjusted_array_bytes(self.size_bytes, self.reuse_bytes),
            _ => self.size_bytes,
        }
    }

    pub fn estimator_options(&self) -> EstimatorOptions {
        EstimatorOptions {
            trials: self.trials,
            chases_per_trial: self.chases_per_trial,
            warmup: self.warmup,
        }
    }

    pub fn device_provider(&self) -> DeviceProvider {
        DeviceProvider::new(&self.device_path, self.phys_offset)
    }

    /// Everything that can be checked without touching memory.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.estimator_options().validate()?;
        if let PatternChoice::Reuse = self.pattern {
            if self.line_bytes == 0 || self.reuse_bytes < self.line_bytes {
                return Err(ConfigError::ReuseSmallerThanLine {
                    reuse: self.reuse_bytes,
                    line: self.line_bytes,
                });
            }
        }
        if let FloodTarget::Bytes(0) = self.flood {
            return Err(ConfigError::InvalidNumber {
                name: "flood bytes",
                value: "0".to_owned(),
            });
        }
        if let Some(rate) = self.ticks_per_usec {
            if !(rate > 0.0) {
                return Err(ConfigError::InvalidNumber {
                    name: "clock per usec",
                    value: rate.to_string(),
                });
            }
        }
        self.pattern_kind().validate(self.effective_size_bytes())
    }
}

fn parse_radix(value: &str) -> Option<u64> {
    let value = value.trim();
    match value
        .strip_prefix("0x")
        .or_else(|| value.strip_prefix("0X"))
    {
        Some(hex) => u64::from_str_radix(hex, 16).ok(),
        None => value.parse().ok(),
    }
}

/// Parse a decimal or `0x` prefixed hexadecimal number.
pub fn parse_u64(name: &'static str, value: &str) -> Result<u64, ConfigError> {
    parse_radix(value).ok_or_else(|| ConfigError::InvalidNumber {
        name,
        value: value.to_owned(),
    })
}

pub fn parse_usize(name: &'static str, value: &str) -> Result<usize, ConfigError> {
    parse_u64(name, value).and_then(|v| {
        if v > usize::MAX as u64 {
            Err(ConfigError::InvalidNumber {
                name,
                value: value.to_owned(),
            })
        } else {
            Ok(v as usize)
        }
    })
}
