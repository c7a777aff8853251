//! Upstream line transport
//!
//! The channel-adapter side of the controller is a plain byte-stream
//! endpoint: raw SDLC-framed bytes arrive from the host system and raw
//! SDLC-framed bytes go back, unchanged by this layer. A dropped connection
//! is fatal for the line; the endpoint retries with a bounded reconnect
//! loop while the session table stays intact so sessions resume when the
//! line returns.

use std::io::{ErrorKind, Read, Write};
use std::net::{TcpStream, ToSocketAddrs};
use std::thread;
use std::time::Duration;

use log::{info, warn};

use crate::error::LineError;

/// How long a read blocks before the bridge loop gets control back.
const READ_TIMEOUT: Duration = Duration::from_millis(50);

/// The TCP endpoint standing in for a leased SDLC line.
pub struct LineEndpoint {
    host: String,
    port: u16,
    stream: Option<TcpStream>,
    reconnect_attempts: u32,
    reconnect_delay: Duration,
}

impl LineEndpoint {
    pub fn new(host: String, port: u16) -> Self {
        LineEndpoint {
            host,
            port,
            stream: None,
            reconnect_attempts: 30,
            reconnect_delay: Duration::from_secs(1),
        }
    }

    /// Override the bounded-reconnect policy.
    pub fn set_reconnect_policy(&mut self, attempts: u32, delay: Duration) {
        self.reconnect_attempts = attempts;
        self.reconnect_delay = delay;
    }

    pub fn is_connected(&self) -> bool {
        self.stream.is_some()
    }

    /// Dial the upstream line.
    pub fn connect(&mut self) -> Result<(), LineError> {
        let address = format!("{}:{}", self.host, self.port);
        let mut addrs = address.to_socket_addrs()?;
        let addr = addrs.next().ok_or_else(|| {
            LineError::Io(std::io::Error::new(
                ErrorKind::AddrNotAvailable,
                "no socket addresses resolved",
            ))
        })?;
        let stream = TcpStream::connect(addr)?;
        stream.set_read_timeout(Some(READ_TIMEOUT))?;
        stream.set_nodelay(true)?;
        info!("line connected to {address}");
        self.stream = Some(stream);
        Ok(())
    }

    /// Bounded reconnect loop after the line dropped.
    pub fn reconnect(&mut self) -> Result<(), LineError> {
        self.stream = None;
        for attempt in 1..=self.reconnect_attempts {
            warn!(
                "line to {}:{} dropped, reconnect attempt {attempt}/{}",
                self.host, self.port, self.reconnect_attempts
            );
            thread::sleep(self.reconnect_delay);
            if self.connect().is_ok() {
                return Ok(());
            }
        }
        Err(LineError::Disconnected { attempts: self.reconnect_attempts })
    }

    /// Read whatever is available. Returns 0 when the read timed out with
    /// nothing pending; a closed or failed connection triggers the bounded
    /// reconnect before surfacing an error.
    pub fn read_some(&mut self, buf: &mut [u8]) -> Result<usize, LineError> {
        let Some(stream) = self.stream.as_mut() else {
            self.reconnect()?;
            return Ok(0);
        };
        match stream.read(buf) {
            Ok(0) => {
                // Peer closed the line.
                self.reconnect()?;
                Ok(0)
            }
            Ok(n) => Ok(n),
            Err(e) if e.kind() == ErrorKind::WouldBlock || e.kind() == ErrorKind::TimedOut => Ok(0),
            Err(e) => {
                warn!("line read failed: {e}");
                self.reconnect()?;
                Ok(0)
            }
        }
    }

    /// Write a full buffer upstream.
    pub fn write_all(&mut self, bytes: &[u8]) -> Result<(), LineError> {
        let Some(stream) = self.stream.as_mut() else {
            return Err(LineError::Io(std::io::Error::new(
                ErrorKind::NotConnected,
                "line endpoint not connected",
            )));
        };
        match stream.write_all(bytes) {
            Ok(()) => Ok(()),
            Err(e) => {
                warn!("line write failed: {e}");
                self.reconnect()?;
                // The frame that failed is gone; the host's retransmission
                // discipline recovers the exchange.
                Ok(())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::TcpListener;

    #[test]
    fn connect_read_write_round_trip() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();

        let server = std::thread::spawn(move || {
            let (mut sock, _) = listener.accept().unwrap();
            let mut buf = [0u8; 4];
            sock.read_exact(&mut buf).unwrap();
            sock.write_all(&buf).unwrap();
            buf
        });

        let mut endpoint = LineEndpoint::new("127.0.0.1".to_string(), port);
        endpoint.connect().unwrap();
        assert!(endpoint.is_connected());
        endpoint.write_all(&[0x7E, 0xC1, 0x11, 0x7E]).unwrap();

        let mut buf = [0u8; 16];
        let mut got = 0;
        while got < 4 {
            got += endpoint.read_some(&mut buf[got..]).unwrap();
        }
        assert_eq!(&buf[..4], &[0x7E, 0xC1, 0x11, 0x7E]);
        assert_eq!(server.join().unwrap(), [0x7E, 0xC1, 0x11, 0x7E]);
    }

    #[test]
    fn bounded_reconnect_gives_up() {
        // Nothing listens on the port once the listener is dropped.
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);

        let mut endpoint = LineEndpoint::new("127.0.0.1".to_string(), port);
        endpoint.set_reconnect_policy(2, Duration::from_millis(10));
        let err = endpoint.reconnect().unwrap_err();
        assert!(matches!(err, LineError::Disconnected { attempts: 2 }));
    }
}
