//! shmkv - administrative CLI for shared-memory regions
//!
//! Pokes at named regions from the command line, which doubles as a quick
//! way to exercise cross-process behavior: run `set` in one shell and `get`
//! in another.

use std::io::Write;

use anyhow::{bail, Context, Result};
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use shmkv::{remove_region_with, Config, SharedStore, StoreError};

const USAGE: &str = "\
usage: shmkv <command> <region> [args]

commands:
  set <region> <key> <value>   upsert an entry
  get <region> <key>           print a value
  erase <region> <key>         remove an entry (no-op when absent)
  list <region>                print every value
  clear <region>               remove all entries
  info <region>                print region size, free bytes and entry count
  rm <region>                  delete the region itself

environment:
  SHMKV_DIR                region directory (default /dev/shm)
  SHMKV_DEFAULT_CAPACITY   capacity in bytes for newly created regions
  RUST_LOG                 log filter (default shmkv=info)
";

fn main() -> Result<()> {
    // Initialize tracing subscriber with env filter
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "shmkv=info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let args: Vec<String> = std::env::args().skip(1).collect();
    let (command, rest) = match args.split_first() {
        Some((command, rest)) => (command.as_str(), rest),
        None => bail!("missing command\n\n{USAGE}"),
    };

    let config = Config::from_env();
    run(command, rest, &config)
}

fn run(command: &str, rest: &[String], config: &Config) -> Result<()> {
    let name = rest
        .first()
        .with_context(|| format!("missing region name\n\n{USAGE}"))?;

    match (command, &rest[1..]) {
        ("set", [key, value]) => {
            let mut store = open(config, name)?;
            store.set(key.as_bytes(), value.as_bytes())?;
            info!(region = name.as_str(), key = key.as_str(), "entry stored");
        }
        ("get", [key]) => {
            let store = open(config, name)?;
            let value = store.get(key.as_bytes())?;
            print_value(&value)?;
        }
        ("erase", [key]) => {
            let mut store = open(config, name)?;
            store.erase(key.as_bytes())?;
            info!(region = name.as_str(), key = key.as_str(), "entry erased");
        }
        ("list", []) => {
            let store = open(config, name)?;
            for position in 0usize.. {
                match store.iterate(position) {
                    Ok(value) => print_value(&value)?,
                    Err(StoreError::EndOfSequence(_)) => break,
                    Err(err) => return Err(err.into()),
                }
            }
        }
        ("clear", []) => {
            let mut store = open(config, name)?;
            store.clear()?;
            info!(region = name.as_str(), "store cleared");
        }
        ("info", []) => {
            let store = open(config, name)?;
            println!("region:  {name}");
            println!("size:    {} bytes", store.size());
            println!("free:    {} bytes", store.free()?);
            println!("entries: {}", store.len()?);
        }
        ("rm", []) => {
            if remove_region_with(config, name)? {
                info!(region = name.as_str(), "region removed");
            } else {
                info!(region = name.as_str(), "no such region");
            }
        }
        _ => bail!("unknown command or wrong arguments\n\n{USAGE}"),
    }
    Ok(())
}

fn open(config: &Config, name: &str) -> Result<SharedStore> {
    SharedStore::open_or_create_with(config, name, config.default_capacity)
        .with_context(|| format!("opening region `{name}`"))
}

/// Values are arbitrary bytes; write them raw and let the terminal cope.
fn print_value(value: &[u8]) -> Result<()> {
    let mut stdout = std::io::stdout().lock();
    stdout.write_all(value)?;
    stdout.write_all(b"\n")?;
    Ok(())
}
