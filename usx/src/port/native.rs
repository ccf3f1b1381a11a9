//! Serial transport using the `serialport` crate.
//!
//! Bootloaders in download mode usually enumerate as a USB CDC/ACM serial
//! node, so this is the default transport. Unlike a bulk endpoint, a serial
//! read may return any fragment of the device's reply. [`NativePort`] keeps
//! reading until a complete frame has arrived so that callers see the same
//! one-receive-one-frame behaviour as on raw USB.

use {
    crate::{
        error::{Error, Result},
        port::{SerialConfig, Transport},
        protocol::{FRAME_DELIMITER, MIN_FRAME_SIZE},
    },
    log::trace,
    serialport::ClearBuffer,
    std::{
        io::{self, Read, Write},
        time::{Duration, Instant},
    },
};

/// Serial port transport.
pub struct NativePort {
    port: Option<Box<dyn serialport::SerialPort>>,
    name: String,
    timeout: Duration,
}

impl NativePort {
    /// Open a serial port with the given configuration.
    pub fn open(config: &SerialConfig) -> Result<Self> {
        let port = serialport::new(&config.port_name, config.baud_rate)
            .timeout(config.timeout)
            .data_bits(serialport::DataBits::Eight)
            .parity(serialport::Parity::None)
            .stop_bits(serialport::StopBits::One)
            .flow_control(serialport::FlowControl::None)
            .open()?;

        // Drop anything left over from a previous session.
        port.clear(ClearBuffer::All)?;

        Ok(Self {
            port: Some(port),
            name: config
                .port_name
                .clone(),
            timeout: config.timeout,
        })
    }

    fn port_mut(&mut self) -> Result<&mut Box<dyn serialport::SerialPort>> {
        self.port
            .as_mut()
            .ok_or_else(|| {
                Error::Serial(serialport::Error::new(
                    serialport::ErrorKind::NoDevice,
                    "Port is closed",
                ))
            })
    }
}

/// Whether `buf` holds at least one complete frame.
///
/// Inside a frame every delimiter byte is escaped, so a trailing delimiter on
/// a buffer of at least minimum frame length can only be a closing one.
fn frame_complete(buf: &[u8]) -> bool {
    buf.len() >= MIN_FRAME_SIZE && buf.last() == Some(&FRAME_DELIMITER)
}

impl Transport for NativePort {
    fn transmit(&mut self, buf: &[u8]) -> Result<()> {
        let timeout = self.timeout;
        let port = self.port_mut()?;
        match port
            .write_all(buf)
            .and_then(|()| port.flush())
        {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == io::ErrorKind::TimedOut => Err(Error::Timeout(format!(
                "write of {} bytes did not complete within {} ms",
                buf.len(),
                timeout.as_millis()
            ))),
            Err(e) => Err(e.into()),
        }
    }

    fn receive(&mut self, buf: &mut [u8]) -> Result<usize> {
        let timeout = self.timeout;
        let deadline = Instant::now() + timeout;
        let port = self.port_mut()?;
        let mut len = 0;

        while len < buf.len() {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                break;
            }
            port.set_timeout(remaining)?;

            match port.read(&mut buf[len..]) {
                Ok(0) => {},
                Ok(n) => {
                    trace!("serial read {n} bytes");
                    len += n;
                    if frame_complete(&buf[..len]) {
                        break;
                    }
                },
                Err(e) if e.kind() == io::ErrorKind::TimedOut => break,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => {},
                Err(e) => return Err(e.into()),
            }
        }

        port.set_timeout(timeout)?;

        if len == 0 {
            return Err(Error::Timeout(format!(
                "no response within {} ms",
                timeout.as_millis()
            )));
        }
        Ok(len)
    }

    fn set_timeout(&mut self, timeout: Duration) -> Result<()> {
        if let Some(ref mut p) = self.port {
            p.set_timeout(timeout)?;
        }
        self.timeout = timeout;
        Ok(())
    }

    fn timeout(&self) -> Duration {
        self.timeout
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn close(&mut self) -> Result<()> {
        // Take ownership of the port and let it drop (close)
        self.port
            .take();
        Ok(())
    }
}
