use std::collections::HashSet;
use std::io::{self, ErrorKind, Read};
use std::net::{Shutdown, SocketAddr};

use anyhow::{Context, Result};
use mio::net::{TcpListener, TcpStream};
use mio::{Events, Interest, Poll, Registry, Token, Waker};
use tracing::{debug, error, info, trace, warn};

use crate::broadcast::broadcast;
use crate::pool::ConnPool;
use crate::shutdown::ShutdownHandle;

const LISTENER: Token = Token(0);
const WAKER: Token = Token(1);
const FIRST_CONN_TOKEN: usize = 2;

/// Reads are bounded; a payload larger than this arrives as multiple
/// independent chunks and is relayed with the same boundaries. There is no
/// reassembly.
const READ_BUF_SIZE: usize = 1024;

/// Cap on reads per connection per cycle so one busy peer cannot starve the
/// rest of the dispatch. Leftover buffered data is picked up next cycle via
/// a re-arm.
const READS_PER_CYCLE: usize = 16;

const EVENTS_CAPACITY: usize = 256;

/// Single-threaded broadcast relay. One poller watches the listener and
/// every accepted connection; whatever one client sends is queued for all
/// the others and flushed when their sockets are writable.
pub struct Server {
    listener: TcpListener,
    poll: Poll,
    events: Events,
    pool: ConnPool<TcpStream>,
    next_token: usize,
    shutdown: ShutdownHandle,
}

impl Server {
    /// Binds the listening socket and sets up the poller. Failures here are
    /// fatal; the server cannot function without them.
    pub fn bind(addr: SocketAddr) -> Result<Self> {
        let poll = Poll::new().context("failed to create poller")?;
        let mut listener =
            TcpListener::bind(addr).with_context(|| format!("failed to bind {addr}"))?;
        poll.registry()
            .register(&mut listener, LISTENER, Interest::READABLE)
            .context("failed to register listener")?;
        let waker = Waker::new(poll.registry(), WAKER).context("failed to create waker")?;

        Ok(Self {
            listener,
            poll,
            events: Events::with_capacity(EVENTS_CAPACITY),
            pool: ConnPool::new(),
            next_token: FIRST_CONN_TOKEN,
            shutdown: ShutdownHandle::new(waker),
        })
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    pub fn shutdown_handle(&self) -> ShutdownHandle {
        self.shutdown.clone()
    }

    /// Runs the event loop until shutdown is requested or the readiness
    /// wait fails, then tears every connection down.
    pub fn run(&mut self) -> Result<()> {
        let mut outcome = Ok(());

        while !self.shutdown.requested() {
            if let Err(err) = self.sync_interests() {
                outcome = Err(err).context("failed to update poll registrations");
                break;
            }

            trace!(
                connections = self.pool.len(),
                max_token = ?self.pool.max_token(),
                "waiting for readiness"
            );

            if let Err(err) = self.poll.poll(&mut self.events, None) {
                if err.kind() == ErrorKind::Interrupted {
                    // Signal delivery; the loop condition re-checks the flag.
                    continue;
                }
                error!(?err, "readiness wait failed");
                outcome = Err(err.into());
                break;
            }

            let mut accept_ready = false;
            let mut ready_reads = HashSet::new();
            let mut ready_writes = HashSet::new();
            for event in self.events.iter() {
                match event.token() {
                    LISTENER => accept_ready = true,
                    WAKER => {} // wake-up only; flag checked at the loop top
                    Token(token) => {
                        if event.is_readable() {
                            ready_reads.insert(token);
                        }
                        if event.is_writable() {
                            ready_writes.insert(token);
                        }
                    }
                }
            }

            if accept_ready {
                self.accept_pending();
            }
            self.dispatch(&ready_reads, &ready_writes);
        }

        self.teardown();
        outcome
    }

    /// Accepts until the listener would block. A failed accept never stops
    /// the server; the attempt is logged and dropped.
    fn accept_pending(&mut self) {
        loop {
            match self.listener.accept() {
                Ok((mut stream, peer)) => {
                    if let Err(err) = stream.set_nodelay(true) {
                        debug!(%peer, ?err, "failed to set TCP_NODELAY");
                    }
                    let token = self.alloc_token();
                    if let Err(err) = self.poll.registry().register(
                        &mut stream,
                        Token(token),
                        Interest::READABLE,
                    ) {
                        warn!(%peer, ?err, "failed to register accepted connection");
                        continue;
                    }
                    info!(token, %peer, "new connection");
                    self.pool.add(token, stream);
                }
                Err(err) if err.kind() == ErrorKind::WouldBlock => break,
                Err(err) if err.kind() == ErrorKind::Interrupted => continue,
                Err(err) => {
                    warn!(?err, "accept failed");
                    break;
                }
            }
        }
    }

    fn alloc_token(&mut self) -> usize {
        loop {
            let token = self.next_token;
            self.next_token = self.next_token.checked_add(1).unwrap_or(FIRST_CONN_TOKEN);
            if !self.pool.contains(token) {
                return token;
            }
        }
    }

    fn dispatch(&mut self, ready_reads: &HashSet<usize>, ready_writes: &HashSet<usize>) {
        let poller = self.poll.registry();
        self.pool.for_each_safe(|pool, token| {
            if ready_reads.contains(&token) {
                Self::drain_readable(pool, poller, token);
            }
            // Readable and writable arrive merged on a single event, and an
            // edge is reported only once; the write side must still run
            // when the read side did. A connection removed by its read
            // phase gets no write phase this cycle.
            if ready_writes.contains(&token) && pool.wants_write(token) {
                if let Err(err) = pool.flush(token) {
                    debug!(token, %err, "flush skipped");
                }
            }
        });
    }

    /// Reads until the socket would block or the per-cycle budget is spent,
    /// broadcasting each chunk as it arrives. A zero-length read removes
    /// the connection; a read error is logged and skipped with the
    /// connection left open.
    fn drain_readable(pool: &mut ConnPool<TcpStream>, poller: &Registry, token: usize) {
        let mut buf = [0u8; READ_BUF_SIZE];
        for _ in 0..READS_PER_CYCLE {
            let Some(conn) = pool.get_mut(token) else {
                return;
            };
            match conn.stream.read(&mut buf) {
                Ok(0) => {
                    info!(token, "peer closed connection");
                    if let Ok(mut conn) = pool.remove(token) {
                        if let Err(err) = poller.deregister(&mut conn.stream) {
                            debug!(token, ?err, "failed to deregister closed connection");
                        }
                    }
                    return;
                }
                Ok(n) => {
                    trace!(token, len = n, "received");
                    if let Err(err) = broadcast(pool, token, &buf[..n]) {
                        debug!(token, %err, "broadcast rejected");
                    }
                }
                Err(err) if err.kind() == ErrorKind::WouldBlock => return,
                Err(err) if err.kind() == ErrorKind::Interrupted => continue,
                Err(err) => {
                    // Transient failure: skip this cycle, keep the
                    // connection. Only an orderly close removes it.
                    warn!(token, ?err, "read failed");
                    return;
                }
            }
        }

        // Budget spent without hitting WouldBlock: data may still be
        // buffered and the readable edge is consumed, so re-register to get
        // a fresh one next cycle.
        pool.request_rearm(token);
    }

    /// Re-registers every stream whose watched interest drifted from the
    /// pool's interest sets since the last cycle.
    fn sync_interests(&mut self) -> io::Result<()> {
        for (token, desired) in self.pool.stale_interests() {
            if let Some(conn) = self.pool.get_mut(token) {
                self.poll
                    .registry()
                    .reregister(&mut conn.stream, Token(token), desired)?;
                conn.interest = desired;
            }
        }
        Ok(())
    }

    fn teardown(&mut self) {
        info!(connections = self.pool.len(), "shutting down");
        let poller = self.poll.registry();
        self.pool.teardown(|conn| {
            if let Err(err) = conn.stream.shutdown(Shutdown::Both) {
                debug!(token = conn.token(), ?err, "transport shutdown failed");
            }
            if let Err(err) = poller.deregister(&mut conn.stream) {
                debug!(token = conn.token(), ?err, "deregister failed");
            }
        });
        if let Err(err) = poller.deregister(&mut self.listener) {
            debug!(?err, "failed to deregister listener");
        }
    }
}
