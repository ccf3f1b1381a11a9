//! usx CLI - Command-line tool for downloading code to phone bootloaders.
//!
//! ## Features
//!
//! - Greet, connect, reset and execute on a device in download mode
//! - Download images with a progress bar
//! - Interactive shell for step-by-step sessions
//! - BootROM and FDL framing
//! - Shell completion generation
//! - Environment variable and config file support

use anyhow::Result;
use clap::{Parser, Subcommand};
use clap_complete::Shell;
use console::style;
use env_logger::Env;
use log::debug;
use std::env;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::atomic::{AtomicBool, Ordering};

mod commands;
mod config;

use commands::{Settings, parse_framing, parse_hex_u8, parse_hex_u16, parse_hex_u32};
use config::Config;

/// Whether stderr is a terminal (set once at startup).
static STDERR_IS_TTY: AtomicBool = AtomicBool::new(true);

/// Set by the Ctrl-C handler.
static INTERRUPTED: AtomicBool = AtomicBool::new(false);

/// Check if progress bars and colors should be used (TTY and colors enabled).
pub(crate) fn use_fancy_output() -> bool {
    STDERR_IS_TTY.load(Ordering::Relaxed) && console::colors_enabled_stderr()
}

/// Whether Ctrl-C was pressed since the last [`clear_interrupted`].
pub(crate) fn was_interrupted() -> bool {
    INTERRUPTED.load(Ordering::Relaxed)
}

/// Forget an earlier Ctrl-C, so the next operation can run.
pub(crate) fn clear_interrupted() {
    INTERRUPTED.store(false, Ordering::Relaxed);
}

/// Errors with a dedicated exit code.
#[derive(Debug, thiserror::Error)]
pub(crate) enum CliError {
    /// Invalid invocation or missing required setting (exit code 2).
    #[error("{0}")]
    Usage(String),
}

/// usx - Download and execute code on phone bootloaders.
///
/// Environment variables:
///   USX_PORT        - Serial port
///   USX_BAUD        - Serial baud rate (default: 115200)
///   USX_TIMEOUT     - Transport timeout in milliseconds (default: 3000)
///   USX_FRAMING     - Checksum framing: bootrom or fdl (default: bootrom)
///   USX_BLOCK_SIZE  - Transfer block size (default: 512)
#[derive(Parser)]
#[command(name = "usx")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
#[allow(clippy::struct_excessive_bools)]
pub(crate) struct Cli {
    /// Serial port to use.
    #[arg(short, long, global = true, env = "USX_PORT")]
    pub(crate) port: Option<String>,

    /// Serial baud rate.
    #[arg(short, long, global = true, env = "USX_BAUD")]
    pub(crate) baud: Option<u32>,

    /// Transport timeout in milliseconds.
    #[arg(short, long, global = true, env = "USX_TIMEOUT", value_name = "MS")]
    pub(crate) timeout: Option<u64>,

    /// Checksum framing (bootrom or fdl).
    #[arg(short, long, global = true, env = "USX_FRAMING", value_parser = parse_framing)]
    pub(crate) framing: Option<usx::ChecksumMode>,

    /// Transfer block size; each data frame carries twice this many bytes.
    #[arg(long, global = true, env = "USX_BLOCK_SIZE")]
    pub(crate) block_size: Option<usize>,

    /// Talk to raw USB bulk endpoints instead of a serial port.
    #[arg(long, global = true)]
    pub(crate) usb: bool,

    /// USB vendor ID (hex).
    #[arg(long, global = true, value_parser = parse_hex_u16)]
    pub(crate) vid: Option<u16>,

    /// USB product ID (hex).
    #[arg(long, global = true, value_parser = parse_hex_u16)]
    pub(crate) pid: Option<u16>,

    /// USB interface number.
    #[arg(long, global = true, value_parser = parse_hex_u8)]
    pub(crate) interface: Option<u8>,

    /// USB bulk IN endpoint (hex).
    #[arg(long = "in", global = true, value_parser = parse_hex_u8)]
    pub(crate) input: Option<u8>,

    /// USB bulk OUT endpoint (hex).
    #[arg(long = "out", global = true, value_parser = parse_hex_u8)]
    pub(crate) output: Option<u8>,

    /// Dump every frame and raw buffer exchanged with the device.
    #[arg(long, global = true)]
    pub(crate) trace: bool,

    /// Verbose output level (-v, -vv for increasing detail).
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    pub(crate) verbose: u8,

    /// Quiet mode (suppress non-essential output).
    #[arg(short, long, global = true)]
    pub(crate) quiet: bool,

    /// Path to a configuration file.
    #[arg(long = "config", global = true, value_name = "PATH")]
    pub(crate) config_path: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

/// Available commands.
#[derive(Subcommand)]
enum Commands {
    /// Wake the bootloader and print its banner.
    Greet,

    /// Send a Connect request.
    Connect,

    /// Ask the device to reset.
    Reset,

    /// Run the most recently downloaded image.
    Execute,

    /// Download a file to the device.
    Send {
        /// Image to download.
        file: PathBuf,

        /// Destination address (hex).
        #[arg(value_parser = parse_hex_u32)]
        address: u32,

        /// Greet and connect before the transfer.
        #[arg(long)]
        connect: bool,

        /// Execute the image after a successful transfer.
        #[arg(long)]
        execute: bool,
    },

    /// Interactive shell.
    Shell,

    /// Generate shell completion scripts.
    Completions {
        /// Shell type for completions.
        #[arg(value_enum)]
        shell: Shell,
    },
}

fn init_logging(cli: &Cli) {
    let log_level = if cli.quiet {
        "warn"
    } else {
        match cli.verbose {
            0 => "info",
            1 => "debug",
            _ => "trace",
        }
    };
    env_logger::Builder::from_env(Env::default().default_filter_or(log_level))
        .format_target(cli.verbose >= 2)
        .format_timestamp(if cli.verbose >= 2 {
            Some(env_logger::TimestampPrecision::Millis)
        } else {
            None
        })
        .init();
}

fn install_interrupt_handler() {
    if let Err(e) = ctrlc::set_handler(|| INTERRUPTED.store(true, Ordering::Relaxed)) {
        debug!("Could not install Ctrl-C handler: {e}");
    }
    usx::set_interrupt_checker(was_interrupted);
}

fn run(cli: &Cli) -> Result<()> {
    let config = if let Some(ref path) = cli.config_path {
        Config::load_from_path(path)
    } else {
        Config::load()
    };

    let settings = || Settings::resolve(cli, &config);

    match &cli.command {
        Commands::Greet => commands::device::cmd_greet(cli, &settings()),
        Commands::Connect => commands::device::cmd_connect(cli, &settings()),
        Commands::Reset => commands::device::cmd_reset(cli, &settings()),
        Commands::Execute => commands::device::cmd_execute(cli, &settings()),
        Commands::Send {
            file,
            address,
            connect,
            execute,
        } => commands::send::cmd_send(cli, &settings(), file, *address, *connect, *execute),
        Commands::Shell => commands::shell::cmd_shell(cli, settings()),
        Commands::Completions { shell } => {
            commands::completions::cmd_completions(*shell);
            Ok(())
        },
    }
}

/// Map an error to the process exit code.
fn exit_code_for(err: &anyhow::Error) -> u8 {
    if matches!(err.downcast_ref::<CliError>(), Some(CliError::Usage(_))) {
        return 2;
    }
    if matches!(err.downcast_ref::<usx::Error>(), Some(usx::Error::Interrupted)) {
        return 130;
    }
    1
}

fn main() -> ExitCode {
    let stderr_is_tty = console::Term::stderr().is_term();
    STDERR_IS_TTY.store(stderr_is_tty, Ordering::Relaxed);

    if env::var("NO_COLOR").is_ok() || !stderr_is_tty {
        console::set_colors_enabled(false);
        console::set_colors_enabled_stderr(false);
    }

    let cli = Cli::parse();
    init_logging(&cli);
    install_interrupt_handler();

    debug!(
        "usx v{} (verbose level: {})",
        env!("CARGO_PKG_VERSION"),
        cli.verbose
    );

    match run(&cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("{} {err:#}", style("Error:").red().bold());
            ExitCode::from(exit_code_for(&err))
        },
    }
}
