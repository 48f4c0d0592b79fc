//! Latency of loads that hit the same line again after `--reuse-bytes` of other traffic.
//!
//! Prints a single CSV line `reuse_bytes,avg,loads`, where `avg` is in cycles when a cycle
//! counter is available and in nanoseconds otherwise. Sweeping `--reuse-bytes` over powers of
//! two shows the capacity of each cache level as a step in `avg`.

use std::io;
use std::process;

use clap::{clap_app, ArgMatches};
use log::{error, info};
use rand::rngs::StdRng;
use rand::SeedableRng;

use mem_latency::chaser::CHASE_STEPS;
use mem_latency::config::{parse_u64, parse_usize, DEFAULT_LINE_BYTES, DEFAULT_REUSE_BYTES};
use mem_latency::estimator::{CHASES_PER_TRIAL, MIN_TRIALS};
use mem_latency::{
    AnonymousProvider, AnyClock, Clock, ClockKind, Config, ConfigError, Harness, OutputMode,
    PatternChoice, Reporter,
};

const DEFAULT_ARRAY_BYTES: usize = 128 << 20;
const DEFAULT_ITERS: u64 = 1_000_000;

/// Upper bound on the derived trial count.
const MAX_TRIALS: u64 = 1 << 16;

/// Smallest trial count measuring at least `iters` loads.
fn trials_for(iters: u64, chases_per_trial: usize) -> Result<usize, ConfigError> {
    let per_trial = (chases_per_trial * CHASE_STEPS) as u64;
    let trials = iters / per_trial + (iters % per_trial != 0) as u64;
    if trials > MAX_TRIALS {
        return Err(ConfigError::InvalidNumber {
            name: "iters",
            value: iters.to_string(),
        });
    }
    Ok((trials as usize).max(MIN_TRIALS))
}

fn config_from(matches: &ArgMatches) -> Result<Config, ConfigError> {
    let mut config = Config {
        pattern: PatternChoice::Reuse,
        size_bytes: DEFAULT_ARRAY_BYTES,
        reuse_bytes: DEFAULT_REUSE_BYTES,
        line_bytes: DEFAULT_LINE_BYTES,
        output: OutputMode::Csv,
        skip_remote: true,
        warmup: true,
        clock: ClockKind::Cycles,
        ..Config::default()
    };

    if let Some(v) = matches.value_of("ARRAY_BYTES") {
        config.size_bytes = parse_usize("array bytes", v)?;
    }
    if let Some(v) = matches.value_of("REUSE_BYTES") {
        config.reuse_bytes = parse_usize("reuse bytes", v)?;
    }
    if let Some(v) = matches.value_of("LINE_BYTES") {
        config.line_bytes = parse_usize("line bytes", v)?;
    }
    let iters = match matches.value_of("ITERS") {
        Some(v) => match parse_u64("iters", v)? {
            0 => {
                return Err(ConfigError::InvalidNumber {
                    name: "iters",
                    value: v.to_owned(),
                })
            }
            n => n,
        },
        None => DEFAULT_ITERS,
    };
    if let Some(v) = matches.value_of("WARMUP") {
        config.warmup = parse_u64("warmup", v)? != 0;
    }
    if let Some(v) = matches.value_of("SEED") {
        config.seed = Some(parse_u64("seed", v)?);
    }
    config.trials = trials_for(iters, config.chases_per_trial)?;

    config.validate()?;
    Ok(config)
}

fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn")).init();

    let matches = clap_app! { reuse_distance =>
        (about: "Measures the load latency at a given reuse distance and prints it as CSV")
        (@arg REUSE_BYTES: --("reuse-bytes") +takes_value "Bytes touched between two uses of a line")
        (@arg ARRAY_BYTES: --("array-bytes") +takes_value "Size of the chased array")
        (@arg LINE_BYTES: --("line-bytes") +takes_value "Cache line size")
        (@arg ITERS: --iters +takes_value "Minimum number of timed loads")
        (@arg WARMUP: --warmup +takes_value "Walk the ring before timing, 0 or 1")
        (@arg SEED: --seed +takes_value "Seed of the pattern builder")
    }
    .get_matches();

    let config = match config_from(&matches) {
        Ok(config) => config,
        Err(e) => {
            error!("{}", e);
            process::exit(1);
        }
    };
    info!(
        "{} trials of {} chases over {} bytes, {} timed loads",
        config.trials,
        config.chases_per_trial,
        config.effective_size_bytes(),
        config.estimator_options().loads()
    );

    let clock = AnyClock::select(config.clock, None);
    info!("averages are in {}", clock.unit().suffix());
    let seed = config.seed.unwrap_or_else(rand::random);

    let stdout = io::stdout();
    let mut reporter = Reporter::new(stdout.lock(), config.output, config.reuse_bytes);
    let mut harness = Harness::new(&config, &clock, StdRng::seed_from_u64(seed));
    if let Err(e) = harness.run(&AnonymousProvider::new(false), None, &mut reporter) {
        let _ = reporter.flush();
        error!("{}", e);
        process::exit(1);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn trial_count_covers_the_requested_loads() {
        assert_eq!(trials_for(1, CHASES_PER_TRIAL), Ok(MIN_TRIALS));
        assert_eq!(trials_for(1_000_000, CHASES_PER_TRIAL), Ok(MIN_TRIALS));
        let per_trial = (CHASES_PER_TRIAL * CHASE_STEPS) as u64;
        assert_eq!(trials_for(10 * per_trial, CHASES_PER_TRIAL), Ok(10));
        assert_eq!(trials_for(10 * per_trial + 1, CHASES_PER_TRIAL), Ok(11));
    }

    #[test]
    fn measured_loads_are_never_fewer_than_requested() {
        let config = Config {
            trials: trials_for(5_000_000_000, CHASES_PER_TRIAL).unwrap(),
            ..Config::default()
        };
        assert!(config.estimator_options().loads() as u64 >= 5_000_000_000);
    }

    #[test]
    fn huge_iteration_counts_are_rejected() {
        assert!(matches!(
            trials_for(u64::MAX, CHASES_PER_TRIAL),
            Err(ConfigError::InvalidNumber { name: "iters", .. })
        ));
        assert!(trials_for(1 << 62, CHASES_PER_TRIAL).is_err());
        let per_trial = (CHASES_PER_TRIAL * CHASE_STEPS) as u64;
        assert_eq!(
            trials_for(MAX_TRIALS * per_trial, CHASES_PER_TRIAL),
            Ok(MAX_TRIALS as usize)
        );
        assert!(trials_for(MAX_TRIALS * per_trial + 1, CHASES_PER_TRIAL).is_err());
    }
}
