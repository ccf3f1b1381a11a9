//! Raw USB bulk transport using `rusb` (libusb).
//!
//! Opening claims the configured interface and sends the class control
//! request the ROM expects before it will talk on its bulk endpoints
//! (request type `0x21`, request `34`, value `output << 8 | 1`). The interface
//! is released again on [`close`](Transport::close) or drop.

use {
    crate::{
        error::{Error, Result},
        port::{Transport, UsbConfig},
    },
    log::{debug, trace, warn},
    rusb::{DeviceHandle, GlobalContext},
    std::time::Duration,
};

const CONTROL_REQUEST_TYPE: u8 = 0x21;
const CONTROL_REQUEST: u8 = 34;

/// USB bulk-endpoint transport.
pub struct UsbPort {
    handle: Option<DeviceHandle<GlobalContext>>,
    config: UsbConfig,
    name: String,
}

impl UsbPort {
    /// Find the device by VID/PID, claim its interface and enable the link.
    pub fn open(config: &UsbConfig) -> Result<Self> {
        let name = format!("usb:{:04x}:{:04x}", config.vid, config.pid);
        let mut handle = rusb::open_device_with_vid_pid(config.vid, config.pid)
            .ok_or_else(|| Error::DeviceNotFound(name.clone()))?;

        debug!("Claiming interface {} on {name}", config.interface);
        handle.claim_interface(config.interface)?;

        let value = (u16::from(config.output) << 8) | 1;
        if let Err(e) = handle.write_control(
            CONTROL_REQUEST_TYPE,
            CONTROL_REQUEST,
            value,
            0,
            &[],
            config.timeout,
        ) {
            let _ = handle.release_interface(config.interface);
            return Err(e.into());
        }

        Ok(Self {
            handle: Some(handle),
            config: *config,
            name,
        })
    }

    fn handle(&self) -> Result<&DeviceHandle<GlobalContext>> {
        self.handle
            .as_ref()
            .ok_or_else(|| Error::Usb(rusb::Error::NoDevice))
    }

    fn timeout_error(&self, what: &str) -> Error {
        Error::Timeout(format!(
            "{what} on {} did not complete within {} ms",
            self.name,
            self.config
                .timeout
                .as_millis()
        ))
    }
}

impl Transport for UsbPort {
    fn transmit(&mut self, buf: &[u8]) -> Result<()> {
        let handle = self.handle()?;
        let mut sent = 0;
        while sent < buf.len() {
            match handle.write_bulk(self.config.output, &buf[sent..], self.config.timeout) {
                Ok(0) => {
                    return Err(Error::Io(std::io::Error::new(
                        std::io::ErrorKind::WriteZero,
                        "bulk write accepted no data",
                    )));
                },
                Ok(n) => {
                    trace!("bulk write {n} bytes");
                    sent += n;
                },
                Err(rusb::Error::Timeout) => return Err(self.timeout_error("bulk write")),
                Err(e) => return Err(e.into()),
            }
        }
        Ok(())
    }

    fn receive(&mut self, buf: &mut [u8]) -> Result<usize> {
        let handle = self.handle()?;
        match handle.read_bulk(self.config.input, buf, self.config.timeout) {
            Ok(n) => {
                trace!("bulk read {n} bytes");
                Ok(n)
            },
            Err(rusb::Error::Timeout) => Err(self.timeout_error("bulk read")),
            Err(e) => Err(e.into()),
        }
    }

    fn set_timeout(&mut self, timeout: Duration) -> Result<()> {
        self.config
            .timeout = timeout;
        Ok(())
    }

    fn timeout(&self) -> Duration {
        self.config
            .timeout
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn close(&mut self) -> Result<()> {
        if let Some(mut handle) = self
            .handle
            .take()
        {
            handle.release_interface(self.config.interface)?;
        }
        Ok(())
    }
}

impl Drop for UsbPort {
    fn drop(&mut self) {
        if let Err(e) = self.close() {
            warn!("Failed to release interface on {}: {e}", self.name);
        }
    }
}
