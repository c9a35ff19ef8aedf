//! # Connection Resilience
//!
//! Purpose: Hold a lazily created connection handle and decide, from a stream
//! of reported connection errors, when to throw it away and start over.
//!
//! ## Design Principles
//! 1. **Under-React**: Errors must persist for `error_persistence_threshold`
//!    and reconnects are spaced by at least `min_reconnect_interval`, so the
//!    connection gets every chance to recover on its own.
//! 2. **Single Decision**: The decision runs under one mutex with the
//!    interval re-checked inside it; concurrent reporters trigger at most one
//!    reconnect.
//! 3. **Traffic Never Waits**: Callers clone the current handle out of a
//!    read lock; a swap replaces the `Arc`, it never blocks a request already
//!    running on the old handle.
//! 4. **Stale Handles Fail Loudly**: The old handle is closed after the swap,
//!    so holders see `Disposed` and fetch the new one.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::{Mutex, RwLock};
use tracing::{debug, info, warn};

use crate::config::ReconnectConfig;
use crate::error::{ClientError, ClientResult};

/// Source of monotonic timestamps.
pub trait Clock: Send + Sync {
    fn now(&self) -> Instant;
}

/// Wall-clock-independent system time.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Instant {
        Instant::now()
    }
}

/// Clock that only moves when told to.
#[derive(Debug, Clone)]
pub struct ManualClock {
    start: Instant,
    offset: Arc<Mutex<Duration>>,
}

impl ManualClock {
    pub fn new() -> Self {
        ManualClock {
            start: Instant::now(),
            offset: Arc::new(Mutex::new(Duration::ZERO)),
        }
    }

    pub fn advance(&self, by: Duration) {
        *self.offset.lock() += by;
    }
}

impl Default for ManualClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Instant {
        self.start + *self.offset.lock()
    }
}

/// A connection handle that can be shut down while others still hold it.
pub trait ManagedConnection: Send + Sync {
    fn close(&self) -> ClientResult<()>;
}

type Factory<C> = dyn Fn() -> ClientResult<C> + Send + Sync;

/// Handle constructed on first use.
struct LazyConnection<C> {
    factory: Arc<Factory<C>>,
    cell: Mutex<Option<Arc<C>>>,
}

impl<C> LazyConnection<C> {
    fn new(factory: Arc<Factory<C>>) -> Self {
        LazyConnection {
            factory,
            cell: Mutex::new(None),
        }
    }

    fn get(&self) -> ClientResult<Arc<C>> {
        let mut cell = self.cell.lock();
        if let Some(conn) = cell.as_ref() {
            return Ok(conn.clone());
        }
        let conn = Arc::new((self.factory)()?);
        *cell = Some(conn.clone());
        Ok(conn)
    }

    /// The handle, only if it was ever constructed.
    fn created(&self) -> Option<Arc<C>> {
        self.cell.lock().clone()
    }
}

/// What a single error report led to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReconnectOutcome {
    /// Error class does not warrant a reconnect (timeouts, protocol errors).
    Ignored,
    /// A reconnect happened less than `min_reconnect_interval` ago.
    Suppressed,
    /// First error since the last reconnect; the window starts now.
    FirstErrorRecorded,
    /// Errors have not persisted long enough, or resumed after a gap.
    Waiting,
    /// The handle was replaced.
    Reconnected,
}

#[derive(Debug, Default)]
struct ErrorWindow {
    first_error: Option<Instant>,
    previous_error: Option<Instant>,
}

const NEVER: u64 = u64::MAX;

/// Owns the current connection handle and the forced-reconnect policy.
pub struct ConnectionManager<C> {
    factory: Arc<Factory<C>>,
    current: RwLock<Arc<LazyConnection<C>>>,
    window: Mutex<ErrorWindow>,
    clock: Arc<dyn Clock>,
    origin: Instant,
    // Nanoseconds after `origin`; `NEVER` until the first forced reconnect.
    last_reconnect: AtomicU64,
    reconnects: AtomicU64,
    min_interval: Duration,
    persistence: Duration,
}

impl<C: ManagedConnection> ConnectionManager<C> {
    pub fn new<F>(policy: ReconnectConfig, factory: F) -> Self
    where
        F: Fn() -> ClientResult<C> + Send + Sync + 'static,
    {
        Self::with_clock(policy, Arc::new(SystemClock), factory)
    }

    pub fn with_clock<F>(policy: ReconnectConfig, clock: Arc<dyn Clock>, factory: F) -> Self
    where
        F: Fn() -> ClientResult<C> + Send + Sync + 'static,
    {
        let factory: Arc<Factory<C>> = Arc::new(factory);
        let origin = clock.now();
        ConnectionManager {
            current: RwLock::new(Arc::new(LazyConnection::new(factory.clone()))),
            factory,
            window: Mutex::new(ErrorWindow::default()),
            clock,
            origin,
            last_reconnect: AtomicU64::new(NEVER),
            reconnects: AtomicU64::new(0),
            min_interval: policy.min_reconnect_interval(),
            persistence: policy.error_persistence_threshold(),
        }
    }

    /// Current handle, constructing it on first use.
    ///
    /// A construction failure is returned to the caller and retried on the
    /// next call.
    pub fn connection(&self) -> ClientResult<Arc<C>> {
        let handle = self.current.read().clone();
        handle.get()
    }

    /// Number of forced reconnects so far.
    pub fn reconnects(&self) -> u64 {
        self.reconnects.load(Ordering::Acquire)
    }

    /// Reports an error seen while using the handle. Only connection-broken
    /// errors feed the policy.
    pub fn on_error(&self, err: &ClientError) -> ReconnectOutcome {
        if !err.is_connection_broken() {
            return ReconnectOutcome::Ignored;
        }
        self.report_error()
    }

    /// Records one connection-level error and reconnects when the policy
    /// says so.
    pub fn report_error(&self) -> ReconnectOutcome {
        if !self.interval_elapsed(self.clock.now()) {
            return ReconnectOutcome::Suppressed;
        }

        let mut window = self.window.lock();
        let now = self.clock.now();
        // Another reporter may have reconnected while we waited for the lock.
        if !self.interval_elapsed(now) {
            return ReconnectOutcome::Suppressed;
        }

        let Some(first_error) = window.first_error else {
            window.first_error = Some(now);
            window.previous_error = Some(now);
            debug!("first connection error recorded");
            return ReconnectOutcome::FirstErrorRecorded;
        };
        let previous_error = window.previous_error.unwrap_or(first_error);

        let since_first = now.saturating_duration_since(first_error);
        let since_previous = now.saturating_duration_since(previous_error);
        let should_reconnect = since_first >= self.persistence && since_previous <= self.persistence;
        window.previous_error = Some(now);

        if !should_reconnect {
            return ReconnectOutcome::Waiting;
        }

        *window = ErrorWindow::default();
        let fresh = Arc::new(LazyConnection::new(self.factory.clone()));
        let old = std::mem::replace(&mut *self.current.write(), fresh);
        close_quietly(&old);
        self.last_reconnect
            .store(self.nanos_since_origin(now), Ordering::Release);
        let count = self.reconnects.fetch_add(1, Ordering::AcqRel) + 1;
        info!(
            reconnects = count,
            errors_for_ms = since_first.as_millis() as u64,
            "forced reconnect"
        );
        ReconnectOutcome::Reconnected
    }

    fn interval_elapsed(&self, now: Instant) -> bool {
        match self.last_reconnect.load(Ordering::Acquire) {
            NEVER => true,
            last => {
                let elapsed = self.nanos_since_origin(now).saturating_sub(last);
                Duration::from_nanos(elapsed) > self.min_interval
            }
        }
    }

    fn nanos_since_origin(&self, now: Instant) -> u64 {
        let nanos = now.saturating_duration_since(self.origin).as_nanos();
        u64::try_from(nanos).unwrap_or(NEVER - 1)
    }
}

fn close_quietly<C: ManagedConnection>(old: &LazyConnection<C>) {
    if let Some(conn) = old.created() {
        if let Err(err) = conn.close() {
            warn!(error = %err, "closing replaced connection failed");
        }
    }
}
