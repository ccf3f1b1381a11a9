//! Interactive shell.
//!
//! One command per line. A failing command prints an error and the shell
//! keeps going; only `quit` or end of input leave it. On a terminal the
//! prompt uses `dialoguer`, otherwise lines are read straight from stdin so
//! sessions can be scripted.

use anyhow::{Context, Result, anyhow, bail};
use console::style;
use dialoguer::{Input, theme::ColorfulTheme};
use log::{debug, warn};
use std::io::{self, BufRead, IsTerminal, Write};
use std::path::Path;
use usx::UsbConfig;

use crate::commands::send::send_image;
use crate::commands::{
    Link, Settings, Target, open_link, parse_framing, parse_hex_u8, parse_hex_u16, parse_hex_u32,
};
use crate::{Cli, clear_interrupted};

/// Name, usage and description of every shell command.
const COMMANDS: &[(&str, &str, &str)] = &[
    ("?", "?", "List commands"),
    ("verbose", "verbose", "Dump every frame and buffer"),
    ("silent", "silent", "Stop dumping traffic"),
    ("quit", "quit", "Leave the shell"),
    ("device", "device VID PID IF IN OUT", "Use a raw USB device (hex values)"),
    ("device?", "device?", "Show the current device"),
    ("port", "port PATH", "Use a serial port"),
    ("open", "open", "Open the current device"),
    ("close", "close", "Close the device"),
    ("greet", "greet", "Wake the bootloader and show its banner"),
    ("connect", "connect", "Send a Connect request"),
    ("reset", "reset", "Ask the device to reset"),
    ("framing", "framing bootrom|fdl", "Select the checksum framing"),
    ("send", "send FILE ADDRESS", "Download FILE to ADDRESS (hex)"),
    ("execute", "execute", "Run the last downloaded image"),
];

/// What the input loop should do after a command.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Flow {
    Continue,
    Quit,
}

struct Shell {
    settings: Settings,
    link: Option<Link>,
    quiet: bool,
}

impl Shell {
    fn new(settings: Settings, quiet: bool) -> Self {
        Self {
            settings,
            link: None,
            quiet,
        }
    }

    fn link(&mut self) -> Result<&mut Link> {
        self.link
            .as_mut()
            .ok_or_else(|| anyhow!("Device not open"))
    }

    /// Run one line, reporting a failure on stderr.
    fn dispatch(&mut self, line: &str, out: &mut dyn Write) -> Flow {
        match self.execute(line, out) {
            Ok(flow) => flow,
            Err(e) => {
                eprintln!("{} {e:#}", style("Error:").red().bold());
                Flow::Continue
            },
        }
    }

    fn execute(&mut self, line: &str, out: &mut dyn Write) -> Result<Flow> {
        clear_interrupted();

        let mut words = line.split_whitespace();
        let Some(command) = words.next() else {
            return Ok(Flow::Continue);
        };
        let args: Vec<&str> = words.collect();
        debug!("shell: {command} {args:?}");

        match (command, args.as_slice()) {
            ("?" | "help", []) => {
                for (_, usage, description) in COMMANDS {
                    writeln!(out, "  {usage:<26} {description}")?;
                }
            },
            ("verbose", []) => self.set_verbose(true),
            ("silent", []) => self.set_verbose(false),
            ("quit" | "exit", []) => return Ok(Flow::Quit),
            ("device?", []) => writeln!(out, "{}", self.settings.target)?,
            ("device", [vid, pid, interface, input, output]) => {
                let usb = UsbConfig::new(hex(parse_hex_u16, vid)?, hex(parse_hex_u16, pid)?)
                    .with_endpoints(
                        hex(parse_hex_u8, interface)?,
                        hex(parse_hex_u8, input)?,
                        hex(parse_hex_u8, output)?,
                    )
                    .with_timeout(self.settings.timeout);
                self.set_target(Target::Usb(usb), out)?;
            },
            ("port", [path]) => {
                let baud = match self.settings.target {
                    Target::Serial { baud, .. } => baud,
                    Target::Usb(_) => super::DEFAULT_BAUD,
                };
                self.set_target(
                    Target::Serial {
                        port: Some((*path).to_string()),
                        baud,
                    },
                    out,
                )?;
            },
            ("open", []) => {
                if self.link.is_some() {
                    bail!("Device already open");
                }
                self.link = Some(open_link(&self.settings)?);
                writeln!(out, "Opened {}", self.settings.target)?;
            },
            ("close", []) => {
                let link = self
                    .link
                    .take()
                    .ok_or_else(|| anyhow!("Device not open"))?;
                link.close()
                    .context("Close failed")?;
                writeln!(out, "Closed")?;
            },
            ("greet", []) => {
                let banner = self
                    .link()?
                    .greet()?;
                writeln!(out, "{banner}")?;
            },
            ("connect", []) => {
                self.link()?
                    .connect()?;
                writeln!(out, "Connected")?;
            },
            ("reset", []) => {
                self.link()?
                    .reset()?;
                writeln!(out, "Reset acknowledged")?;
            },
            ("execute", []) => {
                self.link()?
                    .execute()?;
                writeln!(out, "Execute acknowledged")?;
            },
            ("framing", [name]) => {
                let mode = parse_framing(name).map_err(anyhow::Error::msg)?;
                self.settings
                    .downloader
                    .checksum_mode = mode;
                if let Some(link) = self
                    .link
                    .as_mut()
                {
                    link.set_checksum_mode(mode);
                }
                writeln!(out, "Framing: {mode}")?;
            },
            ("send", [file, address]) => {
                let address = hex(parse_hex_u32, address)?;
                let quiet = self.quiet;
                send_image(self.link()?, Path::new(file), address, quiet)?;
                writeln!(out, "Sent {file} to {address:#010x}")?;
            },
            (name, _) => {
                if let Some((_, usage, _)) = COMMANDS
                    .iter()
                    .find(|(known, _, _)| *known == name)
                {
                    bail!("Usage: {usage}");
                }
                bail!("Unknown command '{name}' (type ? for commands)");
            },
        }

        Ok(Flow::Continue)
    }

    fn set_verbose(&mut self, verbose: bool) {
        self.settings
            .downloader
            .verbose = verbose;
        if let Some(link) = self
            .link
            .as_mut()
        {
            link.set_verbose(verbose);
        }
    }

    fn set_target(&mut self, target: Target, out: &mut dyn Write) -> Result<()> {
        self.settings
            .target = target;
        writeln!(out, "Device: {}", self.settings.target)?;
        if self.link.is_some() {
            writeln!(out, "Takes effect after close and open")?;
        }
        Ok(())
    }

    /// Close the device if the session ends with it open.
    fn shutdown(&mut self) {
        if let Some(link) = self.link.take() {
            if let Err(e) = link.close() {
                warn!("Close failed: {e}");
            }
        }
    }
}

/// Adapt a clap-style hex parser for shell arguments.
fn hex<T>(parse: fn(&str) -> Result<T, String>, value: &str) -> Result<T> {
    parse(value).map_err(|e| anyhow!("{e}: '{value}'"))
}

fn read_terminal_line() -> Result<Option<String>> {
    match Input::<String>::with_theme(&ColorfulTheme::default())
        .with_prompt("usx")
        .allow_empty(true)
        .interact_text()
    {
        Ok(line) => Ok(Some(line)),
        Err(dialoguer::Error::IO(e)) if e.kind() == io::ErrorKind::Interrupted => Ok(None),
        Err(e) => Err(e).context("Failed to read command"),
    }
}

/// Shell command implementation.
pub(crate) fn cmd_shell(cli: &Cli, settings: Settings) -> Result<()> {
    let mut shell = Shell::new(settings, cli.quiet);
    let mut stdout = io::stdout();

    if io::stdin().is_terminal() && io::stderr().is_terminal() {
        if !cli.quiet {
            eprintln!(
                "usx {} shell on {}; type ? for commands",
                env!("CARGO_PKG_VERSION"),
                shell.settings.target
            );
        }
        while let Some(line) = read_terminal_line()? {
            if shell.dispatch(&line, &mut stdout) == Flow::Quit {
                break;
            }
        }
    } else {
        for line in io::stdin().lock().lines() {
            let line = line.context("Failed to read command")?;
            if shell.dispatch(&line, &mut stdout) == Flow::Quit {
                break;
            }
        }
    }

    shell.shutdown();
    Ok(())
}
