//! Serial device link.

use std::io::{ErrorKind, Read};
use std::time::Duration;

use serialport::{DataBits, FlowControl, Parity, SerialPort, StopBits};
use tracing::{debug, info};

use nmea_proxy_core::{LinkError, LinkHandler, SerialErrorPolicy, SerialSpec};

use crate::error::ProxyError;
use crate::write::SentenceWriter;
use crate::READ_CHUNK_SIZE;

/// Zero timeout: reads and writes poll the device and return at once.
const IO_TIMEOUT: Duration = Duration::ZERO;

/// A serial device on the bus.
pub struct SerialLink {
    label: String,
    port: Option<Box<dyn SerialPort>>,
    policy: SerialErrorPolicy,
    buffer: Vec<u8>,
    writer: SentenceWriter,
}

impl SerialLink {
    /// Open `spec.path` at `spec.baud_rate`, 8N1 without flow control.
    pub fn open(spec: &SerialSpec, policy: SerialErrorPolicy) -> Result<Self, ProxyError> {
        let port = serialport::new(&spec.path, spec.baud_rate)
            .data_bits(DataBits::Eight)
            .parity(Parity::None)
            .stop_bits(StopBits::One)
            .flow_control(FlowControl::None)
            .timeout(IO_TIMEOUT)
            .open()
            .map_err(|source| ProxyError::SerialOpen {
                path: spec.path.clone(),
                source,
            })?;

        info!("Opened serial port: {} at {} baud", spec.path, spec.baud_rate);
        Ok(Self::from_port(&spec.path, port, policy))
    }

    /// Wrap an already opened port.
    pub fn from_port(path: &str, mut port: Box<dyn SerialPort>, policy: SerialErrorPolicy) -> Self {
        let label = format!("serial:{path}");
        if let Err(e) = port.set_timeout(IO_TIMEOUT) {
            debug!("{} keeps its own timeout: {}", label, e);
        }

        Self {
            label,
            port: Some(port),
            policy,
            buffer: vec![0; READ_CHUNK_SIZE],
            writer: SentenceWriter::new(),
        }
    }

    /// Apply the error policy: either swallow the error and return
    /// `fallback`, or report it as link-fatal.
    fn on_error<T>(&self, op: &str, error: LinkError, fallback: T) -> Result<T, LinkError> {
        match self.policy {
            SerialErrorPolicy::Ignore => {
                debug!("{} {} error ignored: {}", self.label, op, error);
                Ok(fallback)
            }
            SerialErrorPolicy::Deregister => Err(error),
        }
    }
}

impl LinkHandler for SerialLink {
    fn label(&self) -> &str {
        &self.label
    }

    fn receive(&mut self) -> Result<Option<Vec<u8>>, LinkError> {
        let Some(port) = self.port.as_mut() else {
            return Ok(None);
        };

        match port.read(&mut self.buffer) {
            // Readable but empty: the device hung up
            Ok(0) => self.on_error("read", LinkError::Disconnected, None),
            Ok(n) => Ok(Some(self.buffer[..n].to_vec())),
            Err(e)
                if matches!(
                    e.kind(),
                    ErrorKind::WouldBlock | ErrorKind::TimedOut | ErrorKind::Interrupted
                ) =>
            {
                Ok(None)
            }
            Err(e) => self.on_error("read", e.into(), None),
        }
    }

    fn send(&mut self, bytes: &[u8]) -> Result<bool, LinkError> {
        let Some(port) = self.port.as_mut() else {
            return Ok(false);
        };

        match self.writer.send(port.as_mut(), bytes) {
            Ok(sent) => Ok(sent),
            Err(e) => self.on_error("write", e.into(), false),
        }
    }

    fn flush(&mut self) -> Result<bool, LinkError> {
        let Some(port) = self.port.as_mut() else {
            return Ok(true);
        };

        match self.writer.flush(port.as_mut()) {
            Ok(done) => Ok(done),
            Err(e) => self.on_error("write", e.into(), false),
        }
    }

    fn close(&mut self) {
        if let Some(port) = self.port.take() {
            if self.writer.pending() > 0 {
                debug!("{} closed with {} unwritten bytes", self.label, self.writer.pending());
            }
            self.writer.clear();
            drop(port);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_open_missing_device_fails() {
        let spec = SerialSpec::new("/dev/nmea-proxy-does-not-exist", 4800);
        match SerialLink::open(&spec, SerialErrorPolicy::Ignore) {
            Err(ProxyError::SerialOpen { path, .. }) => {
                assert_eq!(path, "/dev/nmea-proxy-does-not-exist")
            }
            Err(other) => panic!("unexpected error: {other}"),
            Ok(_) => panic!("opening a missing device must fail"),
        }
    }

    #[cfg(unix)]
    mod pty {
        use super::*;
        use serialport::TTYPort;
        use std::io::Write;
        use std::thread::sleep;

        /// A link on the master side of a pseudo terminal, plus the slave
        /// side acting as the attached device.
        fn pty_link(policy: SerialErrorPolicy) -> (SerialLink, TTYPort) {
            let (master, slave) = TTYPort::pair().expect("Failed to open pty pair");
            (SerialLink::from_port("pty", Box::new(master), policy), slave)
        }

        fn receive_until_cr(link: &mut SerialLink) -> Vec<u8> {
            let mut received = Vec::new();
            for _ in 0..200 {
                if let Some(bytes) = link.receive().unwrap() {
                    received.extend_from_slice(&bytes);
                    if received.contains(&b'\r') {
                        break;
                    }
                }
                sleep(Duration::from_millis(5));
            }
            received
        }

        #[test]
        fn test_round_trip() {
            let (mut link, mut device) = pty_link(SerialErrorPolicy::Deregister);
            assert_eq!(link.label(), "serial:pty");
            assert!(matches!(link.receive(), Ok(None)));

            device.write_all(b"$GPRMC,1\r").unwrap();
            assert!(receive_until_cr(&mut link).starts_with(b"$GPRMC,1\r"));

            assert!(link.send(b"$GPGGA,2\r\n").unwrap());
            assert!(link.flush().unwrap());

            device.set_timeout(Duration::from_secs(1)).unwrap();
            let mut buf = [0u8; 64];
            let n = device.read(&mut buf).unwrap();
            assert!(String::from_utf8_lossy(&buf[..n]).contains("$GPGGA,2"));
        }

        #[test]
        fn test_deregister_policy_makes_hangup_fatal() {
            let (mut link, device) = pty_link(SerialErrorPolicy::Deregister);
            drop(device);

            let mut outcome = link.receive();
            for _ in 0..100 {
                if outcome.is_err() {
                    break;
                }
                sleep(Duration::from_millis(5));
                outcome = link.receive();
            }
            assert!(outcome.is_err(), "hangup must be link-fatal, got {:?}", outcome);
        }

        #[test]
        fn test_ignore_policy_swallows_hangup() {
            let (mut link, device) = pty_link(SerialErrorPolicy::Ignore);
            drop(device);

            for _ in 0..20 {
                assert!(matches!(link.receive(), Ok(None)));
                assert!(link.send(b"$GPGGA\r\n").is_ok());
                assert!(link.flush().is_ok());
                sleep(Duration::from_millis(2));
            }

            link.close();
            assert!(matches!(link.receive(), Ok(None)));
            assert!(matches!(link.send(b"$X\r\n"), Ok(false)));
        }
    }
}
