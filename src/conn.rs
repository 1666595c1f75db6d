use std::collections::VecDeque;
use std::io::Write;

use mio::Interest;
use tracing::{debug, trace};

/// One accepted client. Owns its transport and the FIFO of messages queued
/// for it by broadcasts from other clients.
#[derive(Debug, PartialEq)]
pub struct Connection<S> {
    pub(crate) token: usize,
    pub(crate) stream: S,
    pub(crate) outbound: VecDeque<Vec<u8>>,
    /// Interest currently registered with the poller for this stream.
    pub(crate) interest: Interest,
}

impl<S> Connection<S> {
    pub fn new(token: usize, stream: S) -> Self {
        Self {
            token,
            stream,
            outbound: VecDeque::new(),
            interest: Interest::READABLE,
        }
    }

    pub fn token(&self) -> usize {
        self.token
    }

    /// Number of messages awaiting transmission.
    pub fn pending(&self) -> usize {
        self.outbound.len()
    }
}

impl<S: Write> Connection<S> {
    /// Drains the outbound queue, making exactly one send attempt per
    /// message. A failed or short write drops the message; nothing is
    /// retried or requeued, and neither endpoint is told.
    pub fn flush_outbound(&mut self) {
        while let Some(msg) = self.outbound.pop_front() {
            match self.stream.write(&msg) {
                Ok(n) if n < msg.len() => {
                    debug!(
                        token = self.token,
                        wrote = n,
                        len = msg.len(),
                        "short write, message dropped"
                    );
                }
                Ok(n) => trace!(token = self.token, len = n, "sent"),
                Err(err) => {
                    debug!(token = self.token, ?err, "send failed, message dropped");
                }
            }
        }
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use std::io::{self, Write};

    pub(crate) enum SinkMode {
        Ok,
        Short,
        Error,
    }

    /// In-memory transport for exercising flush behavior.
    pub(crate) struct TestSink {
        pub written: Vec<u8>,
        pub mode: SinkMode,
    }

    impl TestSink {
        pub fn ok() -> Self {
            Self {
                written: Vec::new(),
                mode: SinkMode::Ok,
            }
        }

        pub fn short() -> Self {
            Self {
                written: Vec::new(),
                mode: SinkMode::Short,
            }
        }

        pub fn failing() -> Self {
            Self {
                written: Vec::new(),
                mode: SinkMode::Error,
            }
        }
    }

    impl Write for TestSink {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            match self.mode {
                SinkMode::Ok => {
                    self.written.extend_from_slice(buf);
                    Ok(buf.len())
                }
                SinkMode::Short => {
                    let n = buf.len() / 2;
                    self.written.extend_from_slice(&buf[..n]);
                    Ok(n)
                }
                SinkMode::Error => Err(io::Error::new(io::ErrorKind::BrokenPipe, "peer gone")),
            }
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::test_support::TestSink;
    use super::*;

    #[test]
    fn flush_transmits_in_fifo_order() {
        let mut conn = Connection::new(7, TestSink::ok());
        conn.outbound.push_back(b"one".to_vec());
        conn.outbound.push_back(b"two".to_vec());

        conn.flush_outbound();

        assert_eq!(conn.stream.written, b"onetwo");
        assert_eq!(conn.pending(), 0);
    }

    #[test]
    fn failed_send_drops_without_retry() {
        let mut conn = Connection::new(7, TestSink::failing());
        conn.outbound.push_back(b"lost".to_vec());
        conn.outbound.push_back(b"also lost".to_vec());

        conn.flush_outbound();

        assert!(conn.stream.written.is_empty());
        assert_eq!(conn.pending(), 0);
    }

    #[test]
    fn short_write_drops_the_remainder() {
        let mut conn = Connection::new(7, TestSink::short());
        conn.outbound.push_back(b"abcd".to_vec());

        conn.flush_outbound();

        assert_eq!(conn.stream.written, b"ab");
        assert_eq!(conn.pending(), 0);
    }
}
