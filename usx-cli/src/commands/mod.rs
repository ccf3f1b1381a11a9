//! Command implementations.
//!
//! Each subcommand is implemented in its own module; this module holds the
//! settings and device-opening code they share.

pub(crate) mod completions;
pub(crate) mod device;
pub(crate) mod send;
pub(crate) mod shell;

use anyhow::{Context, Result};
use indicatif::{ProgressBar, ProgressStyle};
use std::fmt;
use std::time::Duration;
use usx::port::DEFAULT_TIMEOUT;
use usx::{
    ChecksumMode, Downloader, DownloaderConfig, NativePort, SerialConfig, Transport, UsbConfig,
};

use crate::config::Config;
use crate::{Cli, CliError, use_fancy_output};

/// Baud rate used when neither flags nor config name one.
const DEFAULT_BAUD: u32 = 115200;

/// An open device with a type-erased transport.
pub(crate) type Link = Downloader<Box<dyn Transport>>;

/// Which transport to open.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Target {
    /// Serial node; the path may still be unknown.
    Serial {
        /// Port path.
        port: Option<String>,
        /// Baud rate.
        baud: u32,
    },
    /// Raw USB bulk endpoints.
    Usb(UsbConfig),
}

impl fmt::Display for Target {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Serial {
                port: Some(port),
                baud,
            } => write!(f, "serial {port} @ {baud}"),
            Self::Serial { port: None, .. } => f.write_str("serial (no port set)"),
            Self::Usb(usb) => write!(
                f,
                "usb {:04x}:{:04x} interface {} in {:#04x} out {:#04x}",
                usb.vid, usb.pid, usb.interface, usb.input, usb.output
            ),
        }
    }
}

/// Everything needed to open and drive a device, after merging flags,
/// environment and config files.
#[derive(Debug, Clone)]
pub(crate) struct Settings {
    pub(crate) target: Target,
    pub(crate) timeout: Duration,
    pub(crate) downloader: DownloaderConfig,
}

impl Settings {
    /// Merge command-line values over config file values over defaults.
    pub(crate) fn resolve(cli: &Cli, config: &Config) -> Self {
        let timeout = cli
            .timeout
            .or(config.connection.timeout_ms)
            .map_or(DEFAULT_TIMEOUT, Duration::from_millis);

        let target = if cli.usb {
            let usb = &config.usb;
            let mut usb_config = UsbConfig::new(
                cli.vid.or(usb.vid).unwrap_or_default(),
                cli.pid.or(usb.pid).unwrap_or_default(),
            );
            usb_config = usb_config.with_endpoints(
                cli.interface.or(usb.interface).unwrap_or(usb_config.interface),
                cli.input.or(usb.input).unwrap_or(usb_config.input),
                cli.output.or(usb.output).unwrap_or(usb_config.output),
            );
            Target::Usb(usb_config)
        } else {
            Target::Serial {
                port: cli
                    .port
                    .clone()
                    .or_else(|| config.connection.serial.clone()),
                baud: cli
                    .baud
                    .or(config.connection.baud)
                    .unwrap_or(DEFAULT_BAUD),
            }
        };

        let mut downloader = DownloaderConfig::default().with_verbose(cli.trace);
        if let Some(mode) = cli.framing.or(config.protocol.framing) {
            downloader = downloader.with_checksum_mode(mode);
        }
        if let Some(block_size) = cli.block_size.or(config.protocol.block_size) {
            downloader = downloader.with_block_size(block_size);
        }

        Self {
            target,
            timeout,
            downloader,
        }
    }
}

/// Open the configured device.
pub(crate) fn open_link(settings: &Settings) -> Result<Link> {
    let transport: Box<dyn Transport> = match &settings.target {
        Target::Serial {
            port: Some(port),
            baud,
        } => {
            let config = SerialConfig::new(port.clone(), *baud).with_timeout(settings.timeout);
            Box::new(NativePort::open(&config).with_context(|| format!("Failed to open {port}"))?)
        },
        Target::Serial { port: None, .. } => {
            return Err(CliError::Usage(
                "No serial port given (use --port, USX_PORT or [connection] serial in usx.toml)"
                    .to_string(),
            )
            .into());
        },
        Target::Usb(usb) => open_usb(&usb.with_timeout(settings.timeout))?,
    };

    Ok(Downloader::new(transport, settings.downloader))
}

#[cfg(feature = "usb")]
fn open_usb(config: &UsbConfig) -> Result<Box<dyn Transport>> {
    if config.vid == 0 && config.pid == 0 {
        return Err(CliError::Usage(
            "USB device not set (use --vid/--pid or [usb] in usx.toml)".to_string(),
        )
        .into());
    }
    let port = usx::UsbPort::open(config)
        .with_context(|| format!("Failed to open USB device {:04x}:{:04x}", config.vid, config.pid))?;
    Ok(Box::new(port))
}

#[cfg(not(feature = "usb"))]
fn open_usb(_config: &UsbConfig) -> Result<Box<dyn Transport>> {
    Err(CliError::Usage(
        "This build has no USB support; rebuild usx-cli with `--features usb`".to_string(),
    )
    .into())
}

/// Progress bar for a transfer; the length is set from the first callback.
pub(crate) fn transfer_progress(quiet: bool) -> ProgressBar {
    if quiet || !use_fancy_output() {
        ProgressBar::hidden()
    } else {
        let pb = ProgressBar::new(0);
        #[allow(clippy::unwrap_used)] // Static template string
        pb.set_style(
            ProgressStyle::default_bar()
                .template(
                    "{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {bytes}/{total_bytes} {msg}",
                )
                .unwrap()
                .progress_chars("#>-"),
        );
        pb.set_draw_target(indicatif::ProgressDrawTarget::stderr());
        pb
    }
}

/// Parse a hexadecimal number (supports 0x prefix and underscores).
pub(crate) fn parse_hex_u32(s: &str) -> Result<u32, String> {
    let s = s.trim();
    let s = s
        .trim_start_matches("0x")
        .trim_start_matches("0X");
    // Support underscore separators like 0x00_80_00_00
    let s: String = s
        .chars()
        .filter(|c| *c != '_')
        .collect();
    u32::from_str_radix(&s, 16).map_err(|e| format!("Invalid hex value: {e}"))
}

/// Parse a 16-bit hexadecimal number.
pub(crate) fn parse_hex_u16(s: &str) -> Result<u16, String> {
    let value = parse_hex_u32(s)?;
    u16::try_from(value).map_err(|_| format!("Value {value:#x} does not fit in 16 bits"))
}

/// Parse an 8-bit hexadecimal number.
pub(crate) fn parse_hex_u8(s: &str) -> Result<u8, String> {
    let value = parse_hex_u32(s)?;
    u8::try_from(value).map_err(|_| format!("Value {value:#x} does not fit in 8 bits"))
}

/// Parse a framing name.
pub(crate) fn parse_framing(s: &str) -> Result<ChecksumMode, String> {
    s.parse::<ChecksumMode>()
        .map_err(|_| format!("Unknown framing '{s}' (expected bootrom or fdl)"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;

    fn parse(args: &[&str]) -> Cli {
        let mut argv = vec!["usx"];
        argv.extend_from_slice(args);
        argv.push("greet");
        Cli::try_parse_from(argv).unwrap()
    }

    #[test]
    fn test_parse_hex_u32() {
        assert_eq!(parse_hex_u32("0x80000000"), Ok(0x8000_0000));
        assert_eq!(parse_hex_u32("0X1f"), Ok(0x1F));
        assert_eq!(parse_hex_u32("9eff_fe00"), Ok(0x9EFF_FE00));
        assert_eq!(parse_hex_u32(" 40 "), Ok(0x40));
        assert!(parse_hex_u32("").is_err());
        assert!(parse_hex_u32("0xG").is_err());
        assert!(parse_hex_u32("1_0000_0000").is_err());
    }

    #[test]
    fn test_parse_hex_narrow() {
        assert_eq!(parse_hex_u16("0x1782"), Ok(0x1782));
        assert!(parse_hex_u16("0x10000").is_err());
        assert_eq!(parse_hex_u8("85"), Ok(0x85));
        assert!(parse_hex_u8("0x100").is_err());
    }

    #[test]
    fn test_parse_framing() {
        assert_eq!(parse_framing("bootrom"), Ok(ChecksumMode::BootRom));
        assert_eq!(parse_framing("FDL"), Ok(ChecksumMode::Fdl));
        assert!(parse_framing("xmodem").is_err());
    }

    #[test]
    fn test_resolve_defaults() {
        let settings = Settings::resolve(&parse(&[]), &Config::default());
        assert_eq!(
            settings.target,
            Target::Serial {
                port: None,
                baud: DEFAULT_BAUD
            }
        );
        assert_eq!(settings.timeout, DEFAULT_TIMEOUT);
        assert_eq!(settings.downloader, DownloaderConfig::default());
    }

    #[test]
    fn test_resolve_flags_beat_config() {
        let mut config = Config::default();
        config.connection.serial = Some("/dev/ttyUSB9".to_string());
        config.connection.timeout_ms = Some(100);
        config.protocol.framing = Some(ChecksumMode::Fdl);
        config.protocol.block_size = Some(256);

        let settings = Settings::resolve(
            &parse(&["-p", "/dev/ttyACM0", "--block-size", "128", "--trace"]),
            &config,
        );
        assert_eq!(
            settings.target,
            Target::Serial {
                port: Some("/dev/ttyACM0".to_string()),
                baud: DEFAULT_BAUD
            }
        );
        assert_eq!(settings.timeout, Duration::from_millis(100));
        assert_eq!(settings.downloader.checksum_mode, ChecksumMode::Fdl);
        assert_eq!(settings.downloader.block_size, 128);
        assert!(settings.downloader.verbose);
    }

    #[test]
    fn test_resolve_usb_target() {
        let mut config = Config::default();
        config.usb.vid = Some(0x1782);
        config.usb.pid = Some(0x4D00);
        config.usb.input = Some(0x85);

        let settings = Settings::resolve(&parse(&["--usb", "--out", "06"]), &config);
        let Target::Usb(usb) = settings.target else {
            panic!("expected usb target");
        };
        assert_eq!(usb.vid, 0x1782);
        assert_eq!(usb.pid, 0x4D00);
        assert_eq!(usb.interface, 0);
        assert_eq!(usb.input, 0x85);
        assert_eq!(usb.output, 0x06);
        assert_eq!(usb.timeout, DEFAULT_TIMEOUT);
    }

    #[test]
    fn test_open_without_port_is_usage_error() {
        let settings = Settings::resolve(&parse(&[]), &Config::default());
        let err = open_link(&settings)
            .err()
            .unwrap();
        assert!(matches!(
            err.downcast_ref::<CliError>(),
            Some(CliError::Usage(_))
        ));
    }

    #[test]
    fn test_target_display() {
        let serial = Target::Serial {
            port: Some("/dev/ttyUSB0".to_string()),
            baud: 115200,
        };
        assert_eq!(serial.to_string(), "serial /dev/ttyUSB0 @ 115200");

        let usb = Target::Usb(UsbConfig::new(0x1782, 0x4D00).with_endpoints(0, 0x85, 0x06));
        assert_eq!(
            usb.to_string(),
            "usb 1782:4d00 interface 0 in 0x85 out 0x06"
        );
    }
}
