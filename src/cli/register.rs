use anyhow::{Context, Result};

use super::command::{PeekArgs, PokeArgs};
use super::open_control_engine;
use crate::config::Config;

pub fn cmd_peek(args: &PeekArgs, config: &Config) -> Result<()> {
    let (engine, _events) = open_control_engine(config)?;
    let value = engine
        .bus_read(args.register)
        .with_context(|| format!("Reading {} failed", args.register))?;
    engine.close();

    log::debug!("{} = {value:#04X}", args.register);
    println!("{value:02X}");
    Ok(())
}

pub fn cmd_poke(args: &PokeArgs, config: &Config) -> Result<()> {
    let (engine, _events) = open_control_engine(config)?;
    engine
        .bus_write(args.register, args.value)
        .with_context(|| format!("Writing {:02X} to {} failed", args.value, args.register))?;
    engine.close();

    log::info!("Wrote {:02X} to {}", args.value, args.register);
    Ok(())
}
