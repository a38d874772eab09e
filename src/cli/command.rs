use std::net::SocketAddr;
use std::path::PathBuf;

use clap::{Args, Parser as ClapParser, Subcommand, ValueEnum};
use vdtap::structs::palette::PaletteKind;
use vdtap::structs::register::Register;

const LONG_VERSION: &str = concat!(
    env!("CARGO_PKG_VERSION"),
    "\ngit:   ",
    env!("VERGEN_GIT_DESCRIBE"),
    "\nvdtap: ",
    env!("VDTAP_VERSION"),
    "\nbuilt: ",
    env!("BUILD_TIMESTAMP"),
);

#[derive(Debug, ClapParser)]
#[command(
    name         = env!("CARGO_PKG_NAME"),
    version      = env!("CARGO_PKG_VERSION"),
    long_version = LONG_VERSION,
    author       = env!("CARGO_PKG_AUTHORS"),
    about        = "Capture monitor and remote control server for EF9345/TS9347 video probe boards",
    long_about   = None,
)]
pub struct Cli {
    /// Set the log level
    #[arg(long, global = true, value_enum, default_value_t = LogLevel::Info)]
    pub loglevel: LogLevel,

    /// Log output format.
    #[arg(long, global = true, value_enum, default_value_t = LogFormat::Plain)]
    pub log_format: LogFormat,

    /// Show a progress spinner during long-running operations.
    #[arg(long, global = true)]
    pub progress: bool,

    /// YAML configuration file.
    #[arg(long, global = true, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Choose an operation to perform.
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Capture from the board and report frame statistics.
    Capture(CaptureArgs),

    /// Serve the remote control text protocol over TCP.
    Serve(ServeArgs),

    /// Read a video chip register.
    Peek(PeekArgs),

    /// Write a video chip register.
    Poke(PokeArgs),

    /// Run a raw sample dump through the synchronizer and decoder.
    Replay(ReplayArgs),
}

#[derive(Debug, Args)]
pub struct CaptureArgs {
    /// Stop after this many frames.
    #[arg(long, value_name = "N")]
    pub frames: Option<u64>,
}

#[derive(Debug, Args)]
pub struct ServeArgs {
    /// Address and port to listen on.
    #[arg(long, value_name = "ADDR:PORT")]
    pub listen: Option<SocketAddr>,

    /// Palette used for RGB? replies.
    #[arg(long, value_parser = parse_palette)]
    pub palette: Option<PaletteKind>,

    /// Reply to RGB? with the full frame instead of the display area.
    #[arg(long)]
    pub uncropped: bool,
}

#[derive(Debug, Args)]
pub struct PeekArgs {
    /// Register name, R0-R7 or ER0-ER7.
    #[arg(value_name = "REG")]
    pub register: Register,
}

#[derive(Debug, Args)]
pub struct PokeArgs {
    /// Register name, R0-R7 or ER0-ER7.
    #[arg(value_name = "REG")]
    pub register: Register,

    /// Value to write, in hex (e.g. 2A or 0x2A).
    #[arg(value_name = "VALUE", value_parser = parse_byte)]
    pub value: u8,
}

#[derive(Debug, Args)]
pub struct ReplayArgs {
    /// Raw sample dump (use "-" for stdin).
    #[arg(value_name = "INPUT")]
    pub input: PathBuf,

    /// Bit carrying the red channel.
    #[arg(long, value_parser = parse_byte, default_value = "02")]
    pub red_mask: u8,

    /// Bit carrying the green channel.
    #[arg(long, value_parser = parse_byte, default_value = "04")]
    pub green_mask: u8,

    /// Bit carrying the blue channel.
    #[arg(long, value_parser = parse_byte, default_value = "08")]
    pub blue_mask: u8,

    /// Bit carrying the insert signal.
    #[arg(long, value_parser = parse_byte, default_value = "01")]
    pub insert_mask: u8,

    /// Bit carrying the composite sync.
    #[arg(long, value_parser = parse_byte, default_value = "80")]
    pub hvs_mask: u8,

    /// Text mode the dump was captured in.
    #[arg(long, value_enum, default_value_t = ModeArg::Columns80)]
    pub mode: ModeArg,

    /// Bytes read per push into the synchronizer.
    #[arg(long, value_name = "BYTES", default_value_t = 32 * 1024)]
    pub chunk_size: usize,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum LogLevel {
    /// Disable logging output.
    Off,
    /// No output except errors.
    Error,
    /// Show warnings and errors.
    Warn,
    /// Show info, warnings and errors (default).
    Info,
    /// Show debug, info, warnings and errors.
    Debug,
    /// Show all log messages including trace.
    Trace,
}

impl LogLevel {
    pub fn to_level_filter(self) -> log::LevelFilter {
        match self {
            LogLevel::Off => log::LevelFilter::Off,
            LogLevel::Error => log::LevelFilter::Error,
            LogLevel::Warn => log::LevelFilter::Warn,
            LogLevel::Info => log::LevelFilter::Info,
            LogLevel::Debug => log::LevelFilter::Debug,
            LogLevel::Trace => log::LevelFilter::Trace,
        }
    }
}

#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum LogFormat {
    /// Colorized human-readable text.
    Plain,
    /// Structured JSON per log record.
    Json,
}

#[derive(Debug, Clone, Copy, ValueEnum, PartialEq)]
pub enum ModeArg {
    /// 40 columns, double-sampled pixels.
    #[value(name = "40")]
    Columns40,
    /// 80 columns.
    #[value(name = "80")]
    Columns80,
}

/// Parses a byte written in hex, with or without a `0x` prefix.
pub fn parse_byte(s: &str) -> Result<u8, String> {
    let digits = s
        .strip_prefix("0x")
        .or_else(|| s.strip_prefix("0X"))
        .unwrap_or(s);
    u8::from_str_radix(digits, 16).map_err(|e| format!("invalid hex byte {s:?}: {e}"))
}

fn parse_palette(s: &str) -> Result<PaletteKind, String> {
    s.parse()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hex_bytes() {
        assert_eq!(parse_byte("2A"), Ok(0x2A));
        assert_eq!(parse_byte("0x80"), Ok(0x80));
        assert_eq!(parse_byte("ff"), Ok(0xFF));
        assert!(parse_byte("100").is_err());
        assert!(parse_byte("").is_err());
    }

    #[test]
    fn parse_poke_command() {
        let cli = Cli::try_parse_from(["vdtapd", "--loglevel", "debug", "poke", "ER1", "0x12"])
            .unwrap();
        match cli.command {
            Commands::Poke(args) => {
                assert_eq!(args.register.raw(), 0x09);
                assert_eq!(args.value, 0x12);
            }
            other => panic!("unexpected command {other:?}"),
        }
    }

    #[test]
    fn replay_defaults_match_board_wiring() {
        let cli = Cli::try_parse_from(["vdtapd", "replay", "-"]).unwrap();
        let Commands::Replay(args) = cli.command else {
            panic!("expected replay");
        };
        assert_eq!(
            (args.red_mask, args.green_mask, args.blue_mask, args.insert_mask, args.hvs_mask),
            (0x02, 0x04, 0x08, 0x01, 0x80)
        );
        assert_eq!(args.mode, ModeArg::Columns80);
    }

    #[test]
    fn serve_rejects_unknown_palette() {
        assert!(Cli::try_parse_from(["vdtapd", "serve", "--palette", "sepia"]).is_err());
        let cli = Cli::try_parse_from(["vdtapd", "serve", "--palette", "grayscale"]).unwrap();
        let Commands::Serve(args) = cli.command else {
            panic!("expected serve");
        };
        assert_eq!(args.palette, Some(PaletteKind::Grayscale));
    }
}
