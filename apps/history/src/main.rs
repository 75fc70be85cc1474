use anyhow::{bail, Context, Result};
use chrono::DateTime;
use serde::Serialize;
use std::env;
use std::path::Path;
use tracing_subscriber::EnvFilter;

use smoker_presets::{
    BandInterval, ControllerConfig, PresetStore, Reconstructor, Sector, SqliteStore,
    TemperatureRecord, TimeRange, Timestamp, TransactionalStore,
};

#[derive(Debug, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
struct Point {
    time: Timestamp,
    core: Option<i32>,
    oven: Option<i32>,
    core_on: bool,
    oven_on: bool,
}

/// One band of one sector, drawn as a box over `[start, end)`.
#[derive(Debug, Serialize, PartialEq)]
struct Limit {
    max: i32,
    min: i32,
    start: Timestamp,
    end: Timestamp,
}

#[derive(Debug, Serialize, PartialEq)]
struct Limits {
    core: Vec<Limit>,
    oven: Vec<Limit>,
}

#[derive(Debug, Serialize, PartialEq)]
struct Report {
    data: Vec<Point>,
    limit: Limits,
    start: Timestamp,
    end: Timestamp,
}

fn limits(bands: &[BandInterval], sector: Sector) -> Vec<Limit> {
    bands
        .iter()
        .filter_map(|interval| {
            interval.band.map(|band| {
                let band = band.sector(sector);
                Limit {
                    max: band.high,
                    min: band.low,
                    start: interval.start,
                    end: interval.end,
                }
            })
        })
        .collect()
}

fn report(range: TimeRange, bands: &[BandInterval], records: &[TemperatureRecord]) -> Report {
    Report {
        data: records
            .iter()
            .map(|r| Point {
                time: r.time,
                core: r.core,
                oven: r.oven,
                core_on: r.core_on,
                oven_on: r.oven_on,
            })
            .collect(),
        limit: Limits {
            core: limits(bands, Sector::Core),
            oven: limits(bands, Sector::Oven),
        },
        start: range.start,
        end: range.end,
    }
}

/// Unix seconds or RFC 3339.
fn parse_time(arg: &str) -> Result<Timestamp> {
    if let Ok(secs) = arg.parse::<Timestamp>() {
        return Ok(secs);
    }
    let time = DateTime::parse_from_rfc3339(arg).with_context(|| format!("bad time {:?}", arg))?;
    Ok(time.timestamp())
}

/// The report window, bounded like every reconstruction.
fn window(start: &str, end: &str) -> Result<TimeRange> {
    Ok(Reconstructor::window(parse_time(start)?, parse_time(end)?)?)
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .init();

    let args: Vec<String> = env::args().collect();
    if args.len() != 4 {
        bail!("Usage: {} (config.toml|-) start end", args[0]);
    }
    let config = match args[1].as_str() {
        "-" => ControllerConfig::load_or_default(None)?,
        path => ControllerConfig::load(Path::new(path))?,
    };
    let range = window(&args[2], &args[3])?;

    let reconstructor = Reconstructor::from(&config.resolver()?);
    let mut store = SqliteStore::open(&config.database_path, config.busy_timeout())
        .with_context(|| format!("opening {}", config.database_path.display()))?;
    let (bands, records) = store
        .read_snapshot(|s| {
            Ok((reconstructor.reconstruct_range(s, range)?, s.temperatures_between(range)?))
        })
        .context("reading history")?;

    println!("{}", serde_json::to_string_pretty(&report(range, &bands, &records))?);
    Ok(())
}
