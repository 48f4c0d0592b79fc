//! Measure the average latency of dependent loads over local memory, then over a region of a
//! memory device, and print the access penalty of the latter.
//!
//! Results go to stdout. Diagnostics go through `log`; set `RUST_LOG=info` to see the chosen
//! seed, clock rate and stages.

use std::io;
use std::process;

use clap::{clap_app, ArgMatches};
use log::{error, info};
use rand::rngs::StdRng;
use rand::SeedableRng;

use mem_latency::conditioner::FloodTarget;
use mem_latency::config::{parse_u64, parse_usize};
use mem_latency::{
    AnonymousProvider, AnyClock, Clock, Config, ConfigError, Harness, RawRegionProvider,
    Reporter,
};

fn parse_choice<T: std::str::FromStr<Err = String>>(
    name: &'static str,
    value: &str,
) -> Result<T, ConfigError> {
    value.parse().map_err(|_: String| ConfigError::InvalidNumber {
        name,
        value: value.to_owned(),
    })
}

fn config_from(matches: &ArgMatches) -> Result<Config, ConfigError> {
    let mut config = Config::default();
    let required = |name: &'static str| matches.value_of(name).unwrap_or_default();

    config.size_bytes = parse_usize("size", required("SIZE"))?;
    config.stride_bytes = parse_usize("stride", required("STRIDE"))?;
    config.trials = parse_usize("loop count", required("LOOP"))?;
    config.skip_remote = match matches.value_of("SKIP_REMOTE") {
        Some(v) => parse_u64("skip remote", v)? != 0,
        None => false,
    };

    if let Some(v) = matches.value_of("PATTERN") {
        config.pattern = parse_choice("pattern", v)?;
    }
    if let Some(v) = matches.value_of("REUSE_BYTES") {
        config.reuse_bytes = parse_usize("reuse bytes", v)?;
    }
    if let Some(v) = matches.value_of("LINE_BYTES") {
        config.line_bytes = parse_usize("line bytes", v)?;
    }
    if let Some(v) = matches.value_of("FORMAT") {
        config.output = parse_choice("format", v)?;
    }
    if let Some(v) = matches.value_of("SEED") {
        config.seed = Some(parse_u64("seed", v)?);
    }
    config.warmup = matches.is_present("WARMUP");
    if let Some(v) = matches.value_of("FLOOD_LEVEL") {
        let level = parse_u64("flood level", v)?;
        if level == 0 || level > u8::MAX as u64 {
            return Err(ConfigError::InvalidNumber {
                name: "flood level",
                value: v.to_owned(),
            });
        }
        config.flood = FloodTarget::Level(level as u8);
    }
    if let Some(v) = matches.value_of("FLOOD_BYTES") {
        config.flood = FloodTarget::Bytes(parse_usize("flood bytes", v)?);
    }
    if let Some(v) = matches.value_of("CLOCK") {
        config.clock = parse_choice("clock", v)?;
    }
    if let Some(v) = matches.value_of("CLOCK_PER_USEC") {
        let rate = v.parse::<f64>().map_err(|_| ConfigError::InvalidNumber {
            name: "clock per usec",
            value: v.to_owned(),
        })?;
        config.ticks_per_usec = Some(rate);
    }
    if let Some(v) = matches.value_of("DEVICE") {
        config.device_path = v.into();
    }
    if let Some(v) = matches.value_of("PHYS_OFFSET") {
        config.phys_offset = parse_u64("physical offset", v)?;
    }
    config.huge_pages = matches.is_present("HUGE");

    config.validate()?;
    Ok(config)
}

fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn")).init();

    let matches = clap_app! { mem_latency =>
        (about: "Measures memory latency by pointer chasing, locally and in a memory device region")
        (@arg SIZE: "Region size in bytes")
        (@arg STRIDE: "Distance between two chased slots, in bytes")
        (@arg LOOP: "Number of trials, at least 3")
        (@arg SKIP_REMOTE: "Skip the device region when non-zero")
        (@arg PATTERN: --pattern +takes_value "sequential, random, full-random or reuse")
        (@arg REUSE_BYTES: --("reuse-bytes") +takes_value "Reuse distance of the reuse pattern")
        (@arg LINE_BYTES: --("line-bytes") +takes_value "Line size of the reuse pattern")
        (@arg FORMAT: --format +takes_value "text or csv")
        (@arg SEED: --seed +takes_value "Seed of the random patterns")
        (@arg WARMUP: --warmup "Walk the whole chain once before each trial")
        (@arg FLOOD_BYTES: --("flood-bytes") +takes_value "Size of the cache flooding buffer")
        (@arg FLOOD_LEVEL: --("flood-level") +takes_value "Cache level sizing the flooding buffer")
        (@arg CLOCK: --clock +takes_value "wall or cycles")
        (@arg CLOCK_PER_USEC: --("clock-per-usec") +takes_value "Clock ticks per microsecond")
        (@arg DEVICE: --device +takes_value "Memory device to map")
        (@arg PHYS_OFFSET: --("phys-offset") +takes_value "Physical address of the device region")
        (@arg HUGE: --huge "Back local memory with huge pages")
    }
    .get_matches();

    if !matches.is_present("LOOP") {
        println!("{}", matches.usage());
        return;
    }

    let config = match config_from(&matches) {
        Ok(config) => config,
        Err(e) => {
            error!("{}", e);
            process::exit(1);
        }
    };

    let seed = config.seed.unwrap_or_else(rand::random);
    info!("pattern seed {}", seed);
    let clock = AnyClock::select(config.clock, config.ticks_per_usec);
    info!(
        "clock runs at {:.3} ticks per usec, one tick is one {}",
        clock.ticks_per_usec(),
        clock.unit().suffix()
    );

    let local = AnonymousProvider::new(config.huge_pages);
    let device = config.device_provider();
    let remote: Option<&dyn RawRegionProvider> = if config.skip_remote {
        None
    } else {
        Some(&device)
    };

    let stdout = io::stdout();
    let mut reporter = Reporter::new(
        stdout.lock(),
        config.output,
        config.pattern_kind().distance_bytes(),
    );
    let mut harness = Harness::new(&config, &clock, StdRng::seed_from_u64(seed));
    if let Err(e) = harness.run(&local, remote, &mut reporter) {
        let _ = reporter.flush();
        error!("{}", e);
        process::exit(1);
    }
}
