use anyhow::Result;
use clap::Parser as ClapParser;
use indicatif::MultiProgress;
use indicatif_log_bridge::LogWrapper;

use cli::capture::cmd_capture;
use cli::command::{Cli, Commands, LogFormat};
use cli::register::{cmd_peek, cmd_poke};
use cli::replay::cmd_replay;
use cli::serve::cmd_serve;
use config::Config;

mod cli;
mod config;
mod input;
mod remote;

fn main() -> Result<()> {
    let cli = Cli::parse();

    let base_level = cli.loglevel.to_level_filter();

    let multi = MultiProgress::new();

    let mut env_builder = env_logger::Builder::from_default_env();
    env_builder.filter_level(base_level);
    match cli.log_format {
        LogFormat::Plain => {
            env_builder.format_timestamp_millis();
        }
        LogFormat::Json => {
            env_builder.format(|buf, record| {
                use std::io::Write;
                writeln!(
                    buf,
                    "{{\"ts\":\"{}\",\"lvl\":\"{}\",\"target\":\"{}\",\"msg\":{:?}}}",
                    buf.timestamp(),
                    record.level(),
                    record.target(),
                    record.args().to_string()
                )
            });
        }
    }

    let pb = if cli.progress {
        let logger = env_builder.build();
        LogWrapper::new(multi.clone(), logger).try_init()?;
        Some(&multi)
    } else {
        env_builder.try_init()?;
        None
    };

    log::debug!(
        "{} {} (git {}, vdtap {}, built {})",
        env!("CARGO_PKG_NAME"),
        env!("CARGO_PKG_VERSION"),
        env!("VERGEN_GIT_DESCRIBE"),
        env!("VDTAP_VERSION"),
        env!("BUILD_TIMESTAMP")
    );

    let config = Config::load(cli.config.as_deref())?;

    match cli.command {
        Commands::Capture(ref args) => cmd_capture(args, &config, pb)?,
        Commands::Serve(ref args) => cmd_serve(args, &config)?,
        Commands::Peek(ref args) => cmd_peek(args, &config)?,
        Commands::Poke(ref args) => cmd_poke(args, &config)?,
        Commands::Replay(ref args) => cmd_replay(args, pb)?,
    }

    Ok(())
}
