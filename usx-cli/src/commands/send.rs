//! Image download command implementation.

use anyhow::{Context, Result};
use console::style;
use log::debug;
use std::fs;
use std::path::Path;

use crate::Cli;
use crate::commands::{Link, Settings, open_link, transfer_progress};

/// Download `file` to `address` on an open link, drawing a progress bar.
pub(crate) fn send_image(link: &mut Link, file: &Path, address: u32, quiet: bool) -> Result<()> {
    let pb = transfer_progress(quiet);
    pb.set_message(
        file.file_name()
            .map(|n| {
                n.to_string_lossy()
                    .into_owned()
            })
            .unwrap_or_default(),
    );

    let result = link.send_file(file, address, |sent, total| {
        pb.set_length(u64::from(total));
        pb.set_position(u64::from(sent));
    });

    match result {
        Ok(()) => {
            pb.finish_with_message("done");
            Ok(())
        },
        Err(e) => {
            pb.abandon();
            Err(e).with_context(|| format!("Failed to send {} to {address:#010x}", file.display()))
        },
    }
}

/// Send command implementation.
pub(crate) fn cmd_send(
    cli: &Cli,
    settings: &Settings,
    file: &Path,
    address: u32,
    connect: bool,
    execute: bool,
) -> Result<()> {
    // Fail on a bad path before touching the device.
    let size = fs::metadata(file)
        .with_context(|| format!("Cannot read image {}", file.display()))?
        .len();

    let mut link = open_link(settings)?;
    if !cli.quiet {
        eprintln!(
            "{} Sending {} ({size} bytes) to {address:#010x} via {}",
            style("📦").cyan(),
            file.display(),
            settings.target
        );
    }

    let result = run_send(cli, &mut link, file, address, connect, execute);
    if let Err(e) = link.close() {
        debug!("Close failed: {e}");
    }
    result
}

fn run_send(
    cli: &Cli,
    link: &mut Link,
    file: &Path,
    address: u32,
    connect: bool,
    execute: bool,
) -> Result<()> {
    if connect {
        let banner = link
            .greet()
            .context("Greeting failed")?;
        if !cli.quiet {
            eprintln!("{} Device: {banner}", style("ℹ").blue());
        }
        link.connect()
            .context("Connect failed")?;
    }

    send_image(link, file, address, cli.quiet)?;
    if !cli.quiet {
        eprintln!("{} Transfer complete", style("✓").green());
    }

    if execute {
        link.execute()
            .context("Execute failed")?;
        if !cli.quiet {
            eprintln!("{} Execute acknowledged", style("✓").green());
        }
    }
    Ok(())
}
