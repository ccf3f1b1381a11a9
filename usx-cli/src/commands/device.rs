//! Single-exchange commands: greet, connect, reset, execute.

use anyhow::{Context, Result};
use console::style;
use log::debug;

use crate::Cli;
use crate::commands::{Link, Settings, open_link};

/// Open the device, run `op`, and close it again whatever the outcome.
fn with_link<T>(cli: &Cli, settings: &Settings, op: impl FnOnce(&mut Link) -> Result<T>) -> Result<T> {
    let mut link = open_link(settings)?;
    if !cli.quiet {
        eprintln!(
            "{} Using {} ({} framing)",
            style("ℹ").blue(),
            settings.target,
            link.checksum_mode()
        );
    }

    let result = op(&mut link);
    if let Err(e) = link.close() {
        debug!("Close failed: {e}");
    }
    result
}

fn done(cli: &Cli, message: &str) {
    if !cli.quiet {
        eprintln!("{} {message}", style("✓").green());
    }
}

/// Greet command implementation. Prints the banner on stdout.
pub(crate) fn cmd_greet(cli: &Cli, settings: &Settings) -> Result<()> {
    let banner = with_link(cli, settings, |link| {
        link.greet()
            .context("Greeting failed")
    })?;
    println!("{banner}");
    Ok(())
}

/// Connect command implementation.
pub(crate) fn cmd_connect(cli: &Cli, settings: &Settings) -> Result<()> {
    with_link(cli, settings, |link| {
        link.connect()
            .context("Connect failed")
    })?;
    done(cli, "Connected");
    Ok(())
}

/// Reset command implementation.
pub(crate) fn cmd_reset(cli: &Cli, settings: &Settings) -> Result<()> {
    with_link(cli, settings, |link| {
        link.reset()
            .context("Reset failed")
    })?;
    done(cli, "Reset acknowledged");
    Ok(())
}

/// Execute command implementation.
pub(crate) fn cmd_execute(cli: &Cli, settings: &Settings) -> Result<()> {
    with_link(cli, settings, |link| {
        link.execute()
            .context("Execute failed")
    })?;
    done(cli, "Execute acknowledged");
    Ok(())
}
