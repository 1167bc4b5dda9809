//! Link adapter over any `Read + Write` byte stream
//!
//! Provides the line-available / read-line / write surface on top of a
//! serial port or TCP socket. Reads never block: a `WouldBlock` or
//! `TimedOut` read simply means no data has arrived yet.
//!
//! Supports:
//! - Serial ports opened through the `serialport` crate
//! - Non-blocking TCP sockets
//! - Any other `Read + Write` stream (used by tests)

use super::{Link, LineReader};
use cncstream_core::{ConnectionError, Result};
use std::io::{self, Read, Write};
use std::net::TcpStream;
use std::time::Duration;

/// Read chunk size per poll
const READ_CHUNK: usize = 256;

/// Attempts before a write that keeps returning `WouldBlock` is abandoned
const WRITE_RETRIES: usize = 100;

/// Serial read timeout; short so polling stays responsive
const SERIAL_TIMEOUT: Duration = Duration::from_millis(5);

/// Link over a byte stream
pub struct IoLink<S> {
    stream: Option<S>,
    reader: LineReader,
    name: String,
    error: Option<ConnectionError>,
}

impl<S: Read + Write + Send> IoLink<S> {
    /// Wrap an already opened stream
    pub fn new(stream: S, name: impl Into<String>) -> Self {
        Self {
            stream: Some(stream),
            reader: LineReader::new(),
            name: name.into(),
            error: None,
        }
    }

    /// Pull whatever bytes are ready into the line reader
    fn fill(&mut self) {
        let Some(stream) = self.stream.as_mut() else {
            return;
        };

        let mut buf = [0u8; READ_CHUNK];
        loop {
            match stream.read(&mut buf) {
                Ok(0) => {
                    self.fail(ConnectionError::ConnectionLost {
                        reason: "end of stream".to_string(),
                    });
                    break;
                }
                Ok(n) => {
                    tracing::trace!("{} <- {:?}", self.name, String::from_utf8_lossy(&buf[..n]));
                    self.reader.push_bytes(&buf[..n]);
                    if n < READ_CHUNK {
                        break;
                    }
                }
                Err(e) if is_no_data(&e) => break,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => {
                    self.fail(ConnectionError::ReadFailed {
                        reason: e.to_string(),
                    });
                    break;
                }
            }
        }
    }

    fn fail(&mut self, error: ConnectionError) {
        tracing::error!("{}: {}", self.name, error);
        self.stream = None;
        self.error = Some(error);
    }
}

impl IoLink<TcpStream> {
    /// Wrap a connected TCP socket, switching it to non-blocking mode
    pub fn tcp(stream: TcpStream) -> Result<Self> {
        let name = stream
            .peer_addr()
            .map(|addr| format!("tcp://{}", addr))
            .unwrap_or_else(|_| "tcp".to_string());
        stream.set_nonblocking(true)?;
        stream.set_nodelay(true)?;
        Ok(Self::new(stream, name))
    }
}

impl IoLink<Box<dyn serialport::SerialPort>> {
    /// Open a serial port at the given baud rate
    pub fn open_serial(port: &str, baud_rate: u32) -> Result<Self> {
        let opened = serialport::new(port, baud_rate)
            .timeout(SERIAL_TIMEOUT)
            .open()
            .map_err(|e| {
                tracing::warn!("Failed to open serial port {}: {}", port, e);
                ConnectionError::FailedToOpen {
                    target: port.to_string(),
                    reason: e.to_string(),
                }
            })?;
        Ok(Self::new(opened, port))
    }
}

impl<S: Read + Write + Send> Link for IoLink<S> {
    fn is_open(&self) -> bool {
        self.stream.is_some()
    }

    fn can_read_line(&mut self) -> bool {
        if !self.reader.has_line() {
            self.fill();
        }
        self.reader.has_line()
    }

    fn read_line(&mut self) -> Option<String> {
        if !self.reader.has_line() {
            self.fill();
        }
        self.reader.next_line()
    }

    fn write(&mut self, data: &[u8]) -> Result<usize> {
        let Some(stream) = self.stream.as_mut() else {
            return Err(ConnectionError::NotOpen.into());
        };

        let mut written = 0;
        let mut retries = 0;
        while written < data.len() {
            match stream.write(&data[written..]) {
                Ok(0) => break,
                Ok(n) => written += n,
                Err(e) if is_no_data(&e) && retries < WRITE_RETRIES => {
                    retries += 1;
                    std::thread::yield_now();
                }
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => {
                    let error = ConnectionError::WriteFailed {
                        reason: e.to_string(),
                    };
                    self.fail(error.clone());
                    return Err(error.into());
                }
            }
        }

        if let Err(e) = stream.flush() {
            if !is_no_data(&e) {
                let error = ConnectionError::WriteFailed {
                    reason: e.to_string(),
                };
                self.fail(error.clone());
                return Err(error.into());
            }
        }

        tracing::trace!("{} -> {:?}", self.name, String::from_utf8_lossy(&data[..written]));
        Ok(written)
    }

    fn close(&mut self) {
        self.stream = None;
        self.reader.clear();
    }

    fn take_error(&mut self) -> Option<ConnectionError> {
        self.error.take()
    }

    fn name(&self) -> String {
        self.name.clone()
    }
}

fn is_no_data(e: &io::Error) -> bool {
    matches!(e.kind(), io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    /// In-memory duplex stream: reads from a script, records writes
    struct Duplex {
        input: Cursor<Vec<u8>>,
        output: Vec<u8>,
        exhausted_is_eof: bool,
    }

    impl Read for Duplex {
        fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
            let n = self.input.read(buf)?;
            if n == 0 && !self.exhausted_is_eof {
                return Err(io::Error::new(io::ErrorKind::WouldBlock, "no data"));
            }
            Ok(n)
        }
    }

    impl Write for Duplex {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.output.extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    fn duplex(input: &[u8], exhausted_is_eof: bool) -> Duplex {
        Duplex {
            input: Cursor::new(input.to_vec()),
            output: Vec::new(),
            exhausted_is_eof,
        }
    }

    #[test]
    fn test_reads_lines_without_blocking() {
        let mut link = IoLink::new(duplex(b"ok\r\n<Idle|MPos:1,2,3>\n", false), "test");
        assert!(link.can_read_line());
        assert_eq!(link.read_line().as_deref(), Some("ok"));
        assert_eq!(link.read_line().as_deref(), Some("<Idle|MPos:1,2,3>"));
        assert!(!link.can_read_line());
        assert!(link.is_open());
    }

    #[test]
    fn test_end_of_stream_closes_and_reports() {
        let mut link = IoLink::new(duplex(b"", true), "test");
        assert!(!link.can_read_line());
        assert!(!link.is_open());
        assert!(matches!(
            link.take_error(),
            Some(ConnectionError::ConnectionLost { .. })
        ));
        assert!(link.write(b"?").is_err());
    }

    #[test]
    fn test_write_passes_bytes_through() {
        let mut link = IoLink::new(duplex(b"", false), "test");
        assert_eq!(link.write(b"G0X1\r").unwrap(), 5);
        let stream = link.stream.as_ref().map(|s| s.output.clone());
        assert_eq!(stream, Some(b"G0X1\r".to_vec()));
    }
}
