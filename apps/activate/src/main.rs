use anyhow::{bail, Context, Result};
use chrono::Utc;
use std::env;
use std::path::Path;
use tracing_subscriber::EnvFilter;

use smoker_presets::{ControllerConfig, PresetId, PresetStore, SqliteStore};

fn parse_preset(arg: &str) -> Result<PresetId> {
    if arg == "off" {
        return Ok(PresetId::OFF);
    }
    let id: i64 = arg.parse().with_context(|| format!("bad preset id {:?}", arg))?;
    if id < 0 {
        bail!("bad preset id {}", id);
    }
    Ok(PresetId(id))
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let args: Vec<String> = env::args().collect();
    if args.len() != 3 {
        bail!("Usage: {} (config.toml|-) (preset-id|off)", args[0]);
    }
    let config = match args[1].as_str() {
        "-" => ControllerConfig::load_or_default(None)?,
        path => ControllerConfig::load(Path::new(path))?,
    };
    let preset_id = parse_preset(&args[2])?;

    let mut store = SqliteStore::open(&config.database_path, config.busy_timeout())
        .with_context(|| format!("opening {}", config.database_path.display()))?;
    store.activate(preset_id, Utc::now().timestamp())?;

    match store.connection().current_activation()? {
        Some(active) => {
            println!("Active: preset {} since {}", active.preset_id, active.active_from)
        }
        None => println!("Off"),
    }
    Ok(())
}
