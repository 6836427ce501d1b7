//! Transport abstraction for the radio link.
//!
//! The engine never opens devices itself; it consumes an abstract duplex
//! byte stream supplied by the host environment. [`TransportOpener`] exists
//! because reconnection needs to produce a fresh stream after the old one
//! dies. A serial implementation (the common case, USB/UART radios) is
//! provided behind the `serial` cargo feature.
use std::io;

/// A duplex byte stream to the radio. Reads should block only briefly
/// (a timeout surfaces as [`io::ErrorKind::TimedOut`]) so the read loop
/// stays responsive to cancellation.
pub trait LinkTransport: Send {
    /// Read whatever bytes are available into `buf`. `Ok(0)` means no data
    /// right now, not end of stream.
    fn read_chunk(&mut self, buf: &mut [u8]) -> io::Result<usize>;
    fn write_all(&mut self, data: &[u8]) -> io::Result<()>;
    fn flush(&mut self) -> io::Result<()>;
}

/// Produces fresh [`LinkTransport`]s for connect and reconnect attempts.
pub trait TransportOpener: Send + Sync {
    fn open(&self) -> io::Result<Box<dyn LinkTransport>>;
    /// Human-readable description for logs, e.g. `/dev/ttyUSB0@115200`.
    fn describe(&self) -> String;
}

#[cfg(feature = "serial")]
pub use self::serial::SerialOpener;

#[cfg(feature = "serial")]
mod serial {
    use super::{LinkTransport, TransportOpener};
    use log::debug;
    use serialport::SerialPort;
    use std::io::{self, Read, Write};
    use std::time::Duration;

    /// Opens a USB/UART serial port to the radio.
    pub struct SerialOpener {
        port_name: String,
        baud_rate: u32,
    }

    impl SerialOpener {
        pub fn new(port_name: &str, baud_rate: u32) -> Self {
            Self {
                port_name: port_name.to_string(),
                baud_rate,
            }
        }
    }

    impl TransportOpener for SerialOpener {
        fn open(&self) -> io::Result<Box<dyn LinkTransport>> {
            let mut builder = serialport::new(&self.port_name, self.baud_rate)
                .timeout(Duration::from_millis(500));
            // Some USB serial adapters need explicit settings
            #[cfg(unix)]
            {
                builder = builder
                    .data_bits(serialport::DataBits::Eight)
                    .stop_bits(serialport::StopBits::One)
                    .parity(serialport::Parity::None);
            }
            let mut port = builder
                .open()
                .map_err(|e| io::Error::new(io::ErrorKind::Other, e.to_string()))?;

            // Toggle DTR/RTS to wake the device (common for ESP32 boards),
            // then drop any buffered startup text.
            let _ = port.write_data_terminal_ready(true);
            let _ = port.write_request_to_send(true);
            std::thread::sleep(Duration::from_millis(150));
            let mut purge_buf = [0u8; 512];
            if let Ok(available) = port.bytes_to_read() {
                if available > 0 {
                    let _ = port.read(&mut purge_buf);
                }
            }
            debug!("Serial port {} initialized", self.port_name);
            Ok(Box::new(SerialLink { port }))
        }

        fn describe(&self) -> String {
            format!("{}@{}", self.port_name, self.baud_rate)
        }
    }

    struct SerialLink {
        port: Box<dyn SerialPort>,
    }

    impl LinkTransport for SerialLink {
        fn read_chunk(&mut self, buf: &mut [u8]) -> io::Result<usize> {
            self.port.read(buf)
        }

        fn write_all(&mut self, data: &[u8]) -> io::Result<()> {
            self.port.write_all(data)
        }

        fn flush(&mut self) -> io::Result<()> {
            self.port.flush()
        }
    }
}
