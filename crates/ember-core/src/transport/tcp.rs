//! TCP transport implementation over `std::net::TcpStream`.

use std::io::{ErrorKind, Read, Write};
use std::net::{Shutdown, TcpStream, ToSocketAddrs};
use std::time::Duration;

use tracing::{debug, info, instrument};

use super::traits::{Transport, TransportError};

const RECV_BUF_SIZE: usize = 4096;

/// Blocking TCP transport. One socket, no reconnect logic; failure is
/// surfaced to the session, never masked.
pub struct TcpTransport {
    stream: Option<TcpStream>,
    host: String,
    port: u16,
}

impl TcpTransport {
    /// Connect to an Ember+ provider.
    #[instrument(level = "info", skip(connect_timeout))]
    pub fn open(host: &str, port: u16, connect_timeout: Duration) -> Result<Self, TransportError> {
        let addrs: Vec<_> = (host, port)
            .to_socket_addrs()
            .map_err(|e| TransportError::ConnectFailed {
                host: host.to_string(),
                port,
                message: e.to_string(),
            })?
            .collect();

        let mut last_err = None;
        for addr in addrs {
            match TcpStream::connect_timeout(&addr, connect_timeout) {
                Ok(stream) => {
                    stream.set_nodelay(true).ok();
                    info!(%addr, "Connected");
                    return Ok(Self {
                        stream: Some(stream),
                        host: host.to_string(),
                        port,
                    });
                }
                Err(e) => last_err = Some(e),
            }
        }

        Err(TransportError::ConnectFailed {
            host: host.to_string(),
            port,
            message: last_err
                .map(|e| e.to_string())
                .unwrap_or_else(|| "no addresses resolved".to_string()),
        })
    }

    pub fn peer(&self) -> (&str, u16) {
        (&self.host, self.port)
    }

    fn stream(&mut self) -> Result<&mut TcpStream, TransportError> {
        self.stream.as_mut().ok_or(TransportError::Disconnected)
    }
}

impl Transport for TcpTransport {
    fn send(&mut self, data: &[u8]) -> Result<(), TransportError> {
        let stream = self.stream()?;
        stream
            .write_all(data)
            .map_err(|e| TransportError::SendFailed(e.to_string()))?;
        debug!(bytes = data.len(), "Sent");
        Ok(())
    }

    fn recv(&mut self, timeout: Duration) -> Result<Vec<u8>, TransportError> {
        let timeout_ms = timeout.as_millis() as u64;
        let stream = self.stream()?;
        // A zero Duration would mean "no timeout" to the socket layer.
        stream
            .set_read_timeout(Some(timeout.max(Duration::from_millis(1))))
            .map_err(TransportError::Io)?;

        let mut buf = vec![0u8; RECV_BUF_SIZE];
        match stream.read(&mut buf) {
            Ok(0) => Err(TransportError::Disconnected),
            Ok(n) => {
                buf.truncate(n);
                debug!(bytes = n, "Received");
                Ok(buf)
            }
            Err(e) if e.kind() == ErrorKind::WouldBlock || e.kind() == ErrorKind::TimedOut => {
                Err(TransportError::Timeout { timeout_ms })
            }
            Err(e)
                if e.kind() == ErrorKind::ConnectionReset
                    || e.kind() == ErrorKind::ConnectionAborted
                    || e.kind() == ErrorKind::BrokenPipe =>
            {
                Err(TransportError::Disconnected)
            }
            Err(e) => Err(TransportError::RecvFailed(e.to_string())),
        }
    }

    fn is_connected(&self) -> bool {
        self.stream.is_some()
    }

    fn close(&mut self) {
        if let Some(stream) = self.stream.take() {
            stream.shutdown(Shutdown::Both).ok();
            info!(host = %self.host, port = self.port, "Connection closed");
        }
    }
}

impl Drop for TcpTransport {
    fn drop(&mut self) {
        self.close();
    }
}
