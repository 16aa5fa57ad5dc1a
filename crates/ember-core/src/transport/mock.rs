//! Mock transport for testing.

use std::collections::VecDeque;
use std::time::Duration;

use super::traits::{Transport, TransportError};

/// Mock transport for unit testing session logic.
///
/// Inbound chunks are scripted with `queue_chunk`; outbound frames are
/// captured for assertions. `recv` on an empty queue reports a timeout,
/// so a test that forgets to script a response fails fast instead of
/// hanging.
#[derive(Default)]
pub struct MockTransport {
    /// Queued inbound chunks returned one per `recv`.
    recv_queue: VecDeque<Vec<u8>>,
    /// Captured outbound writes.
    send_log: Vec<Vec<u8>>,
    /// Whether the peer is "connected".
    connected: bool,
    /// Disconnect after this many more recv calls (simulates mid-session drop).
    disconnect_after: Option<usize>,
}

impl MockTransport {
    pub fn new() -> Self {
        Self {
            recv_queue: VecDeque::new(),
            send_log: Vec::new(),
            connected: true,
            disconnect_after: None,
        }
    }

    /// Queue an inbound chunk to be returned on a later `recv`.
    pub fn queue_chunk(&mut self, chunk: &[u8]) {
        self.recv_queue.push_back(chunk.to_vec());
    }

    /// Get all captured writes.
    pub fn sent(&self) -> &[Vec<u8>] {
        &self.send_log
    }

    /// Number of writes so far.
    pub fn sent_count(&self) -> usize {
        self.send_log.len()
    }

    /// Simulate the peer closing the connection.
    pub fn disconnect(&mut self) {
        self.connected = false;
    }

    /// Drop the connection after `n` more successful or timed-out reads.
    pub fn disconnect_after(&mut self, n: usize) {
        self.disconnect_after = Some(n);
    }
}

impl Transport for MockTransport {
    fn send(&mut self, data: &[u8]) -> Result<(), TransportError> {
        if !self.connected {
            return Err(TransportError::Disconnected);
        }
        self.send_log.push(data.to_vec());
        Ok(())
    }

    fn recv(&mut self, timeout: Duration) -> Result<Vec<u8>, TransportError> {
        if !self.connected {
            return Err(TransportError::Disconnected);
        }
        if let Some(n) = &mut self.disconnect_after {
            if *n == 0 {
                self.connected = false;
                return Err(TransportError::Disconnected);
            }
            *n -= 1;
        }
        self.recv_queue
            .pop_front()
            .ok_or(TransportError::Timeout {
                timeout_ms: timeout.as_millis() as u64,
            })
    }

    fn is_connected(&self) -> bool {
        self.connected
    }

    fn close(&mut self) {
        self.connected = false;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mock_chunk_queue() {
        let mut mock = MockTransport::new();
        mock.queue_chunk(&[1, 2, 3]);
        mock.queue_chunk(&[4]);

        assert_eq!(mock.recv(Duration::from_millis(10)).unwrap(), vec![1, 2, 3]);
        assert_eq!(mock.recv(Duration::from_millis(10)).unwrap(), vec![4]);

        // Empty queue reads time out.
        assert!(matches!(
            mock.recv(Duration::from_millis(10)),
            Err(TransportError::Timeout { .. })
        ));
    }

    #[test]
    fn test_mock_send_capture() {
        let mut mock = MockTransport::new();
        mock.send(b"hello").unwrap();
        mock.send(b"world").unwrap();

        assert_eq!(mock.sent().len(), 2);
        assert_eq!(mock.sent()[0], b"hello");
    }

    #[test]
    fn test_mock_disconnect() {
        let mut mock = MockTransport::new();
        assert!(mock.is_connected());

        mock.disconnect();
        assert!(!mock.is_connected());
        assert!(mock.send(b"x").is_err());
        assert!(matches!(
            mock.recv(Duration::from_millis(10)),
            Err(TransportError::Disconnected)
        ));
    }
}
