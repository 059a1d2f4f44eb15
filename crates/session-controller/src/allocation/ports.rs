//! Worker port allocation.
//!
//! Ports are probed by binding a throwaway listener. A port that passed the
//! probe is reserved in the allocator's lease set until its [`PortLease`] is
//! dropped, so two sessions in this process never receive the same port even
//! though probing and the worker's own bind are not atomic.

use crate::errors::ScError;
use crate::observability::metrics;
use rand::Rng;
use std::collections::HashSet;
use std::net::{IpAddr, SocketAddr};
use std::sync::{Arc, Mutex, PoisonError};
use tracing::{debug, warn};

/// Half-open port range `[start, end)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PortRange {
    start: u16,
    end: u16,
}

impl PortRange {
    /// # Errors
    ///
    /// Returns `ScError::Config` if the range is empty.
    pub fn new(start: u16, end: u16) -> Result<Self, ScError> {
        if start >= end {
            return Err(ScError::Config(format!("empty port range {start}..{end}")));
        }
        Ok(Self { start, end })
    }

    #[must_use]
    pub fn start(&self) -> u16 {
        self.start
    }

    #[must_use]
    pub fn end(&self) -> u16 {
        self.end
    }

    #[must_use]
    pub fn len(&self) -> u16 {
        self.end - self.start
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.start == self.end
    }

    #[must_use]
    pub fn contains(&self, port: u16) -> bool {
        (self.start..self.end).contains(&port)
    }

    /// The `index`-th port, wrapping around the range.
    fn nth_wrapping(&self, index: u32) -> u16 {
        let offset = index % u32::from(self.len());
        // offset < len <= u16::MAX, so the narrowing is lossless
        #[allow(clippy::cast_possible_truncation)]
        let offset = offset as u16;
        self.start + offset
    }
}

type LeaseSet = Arc<Mutex<HashSet<u16>>>;

/// Hands out ports from a [`PortRange`] that are bindable and not leased.
#[derive(Debug, Clone)]
pub struct PortAllocator {
    range: PortRange,
    bind_host: IpAddr,
    max_attempts: u32,
    leased: LeaseSet,
}

impl PortAllocator {
    #[must_use]
    pub fn new(range: PortRange, bind_host: IpAddr, max_attempts: u32) -> Self {
        Self {
            range,
            bind_host,
            max_attempts: max_attempts.max(1),
            leased: Arc::new(Mutex::new(HashSet::new())),
        }
    }

    #[must_use]
    pub fn range(&self) -> PortRange {
        self.range
    }

    #[must_use]
    pub fn bind_host(&self) -> IpAddr {
        self.bind_host
    }

    /// Ports currently leased by this allocator.
    #[must_use]
    pub fn leased_ports(&self) -> HashSet<u16> {
        self.leased
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Find a bindable port and lease it.
    ///
    /// Scans the range from a random starting point, probing at most
    /// `max_attempts` candidates.
    ///
    /// # Errors
    ///
    /// Returns `ScError::NoPortAvailable` once the attempt budget is spent.
    pub async fn allocate(&self) -> Result<PortLease, ScError> {
        let first = rand::thread_rng().gen_range(0..u32::from(self.range.len()));

        for attempt in 0..self.max_attempts {
            let candidate = self.range.nth_wrapping(first.wrapping_add(attempt));

            if !self.reserve(candidate) {
                continue;
            }

            if is_bindable(SocketAddr::new(self.bind_host, candidate)).await {
                debug!(target: "sc.ports", port = candidate, attempt, "Port leased");
                return Ok(PortLease {
                    port: candidate,
                    leased: Arc::clone(&self.leased),
                });
            }

            self.release(candidate);
        }

        metrics::record_port_allocation_failure();
        warn!(
            target: "sc.ports",
            start = self.range.start(),
            end = self.range.end(),
            attempts = self.max_attempts,
            "No port available"
        );
        Err(ScError::NoPortAvailable)
    }

    fn reserve(&self, port: u16) -> bool {
        self.leased
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(port)
    }

    fn release(&self, port: u16) {
        self.leased
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&port);
    }
}

/// Whether a listener can bind `addr` right now.
pub async fn is_bindable(addr: SocketAddr) -> bool {
    tokio::net::TcpListener::bind(addr).await.is_ok()
}

/// A leased port. The port returns to the pool when the lease is dropped.
#[derive(Debug)]
pub struct PortLease {
    port: u16,
    leased: LeaseSet,
}

impl PortLease {
    #[must_use]
    pub fn port(&self) -> u16 {
        self.port
    }
}

impl Drop for PortLease {
    fn drop(&mut self) {
        self.leased
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&self.port);
        debug!(target: "sc.ports", port = self.port, "Port released");
    }
}
