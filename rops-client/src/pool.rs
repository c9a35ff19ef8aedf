//! # Connection Pool
//!
//! Purpose: Reuse `AdminClient` connections across threads to avoid a TCP
//! (and TLS) handshake per command.
//!
//! ## Design Principles
//! 1. **Object Pool Pattern**: Keep a bounded set of reusable connections.
//! 2. **Minimal Locking**: Hold the mutex only while moving idle connections.
//! 3. **Fail Fast**: Exceeding the pool limit returns an error immediately.
//! 4. **Closeable Handle**: Closing the pool drops idle connections and
//!    refuses new acquisitions, so a replaced pool cannot be revived.

use std::collections::VecDeque;
use std::ops::{Deref, DerefMut};
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::debug;

use crate::client::AdminClient;
use crate::command::CommandNameTable;
use crate::config::ClientConfig;
use crate::error::{ClientError, ClientResult};
use crate::resilience::{ConnectionManager, ManagedConnection};

struct PoolState {
    idle: VecDeque<AdminClient>,
    total: usize,
    closed: bool,
}

struct PoolInner {
    config: ClientConfig,
    names: Arc<CommandNameTable>,
    state: Mutex<PoolState>,
}

/// Connection pool handle.
#[derive(Clone)]
pub struct ConnectionPool {
    inner: Arc<PoolInner>,
}

impl ConnectionPool {
    /// Creates an empty pool; connections are opened on demand.
    pub fn new(config: ClientConfig) -> Self {
        let names = CommandNameTable::new(&config.command_renames, config.internal_commands);
        let state = PoolState {
            idle: VecDeque::with_capacity(config.pool.max_idle),
            total: 0,
            closed: false,
        };
        ConnectionPool {
            inner: Arc::new(PoolInner {
                config,
                names: Arc::new(names),
                state: Mutex::new(state),
            }),
        }
    }

    /// Wraps pools built from `config` in a resilience manager that replaces
    /// the whole pool on persistent connection failures.
    pub fn managed(config: ClientConfig) -> ConnectionManager<ConnectionPool> {
        let policy = config.reconnect.clone();
        ConnectionManager::new(policy, move || Ok(ConnectionPool::new(config.clone())))
    }

    /// Acquires a connection from the pool.
    pub fn acquire(&self) -> ClientResult<PooledConnection> {
        if let Some(client) = self.pop_idle()? {
            return Ok(PooledConnection::new(self.inner.clone(), client));
        }

        self.try_reserve()?;

        match AdminClient::connect_with(&self.inner.config, self.inner.names.clone()) {
            Ok(client) => Ok(PooledConnection::new(self.inner.clone(), client)),
            Err(err) => {
                self.release_slot();
                Err(err)
            }
        }
    }

    /// Drops idle connections and refuses further acquisitions. Connections
    /// currently checked out are closed when they are returned.
    pub fn close(&self) {
        let drained: Vec<AdminClient> = {
            let mut state = self.inner.state.lock();
            state.closed = true;
            state.total = state.total.saturating_sub(state.idle.len());
            state.idle.drain(..).collect()
        };
        debug!(idle = drained.len(), "connection pool closed");
        drop(drained);
    }

    pub fn is_closed(&self) -> bool {
        self.inner.state.lock().closed
    }

    /// Connections currently parked in the pool.
    pub fn idle_count(&self) -> usize {
        self.inner.state.lock().idle.len()
    }

    /// Idle plus checked-out connections.
    pub fn total_count(&self) -> usize {
        self.inner.state.lock().total
    }

    fn pop_idle(&self) -> ClientResult<Option<AdminClient>> {
        let mut state = self.inner.state.lock();
        if state.closed {
            return Err(ClientError::Disposed);
        }
        Ok(state.idle.pop_front())
    }

    fn try_reserve(&self) -> ClientResult<()> {
        let mut state = self.inner.state.lock();
        if state.closed {
            return Err(ClientError::Disposed);
        }
        if state.total >= self.inner.config.pool.max_total {
            return Err(ClientError::PoolExhausted);
        }
        state.total += 1;
        Ok(())
    }

    fn release_slot(&self) {
        let mut state = self.inner.state.lock();
        state.total = state.total.saturating_sub(1);
    }

    fn return_connection(&self, client: AdminClient) {
        let mut state = self.inner.state.lock();
        if !state.closed && state.idle.len() < self.inner.config.pool.max_idle {
            state.idle.push_back(client);
        } else {
            state.total = state.total.saturating_sub(1);
            // Dropping the client closes its transport; do it outside the lock.
            drop(state);
            drop(client);
        }
    }
}

impl ManagedConnection for ConnectionPool {
    fn close(&self) -> ClientResult<()> {
        ConnectionPool::close(self);
        Ok(())
    }
}

/// RAII wrapper returning a connection to the pool on drop.
///
/// Derefs to `AdminClient`; a client that saw a transport fault is discarded
/// instead of being returned.
pub struct PooledConnection {
    pool: Arc<PoolInner>,
    client: Option<AdminClient>,
}

impl PooledConnection {
    fn new(pool: Arc<PoolInner>, client: AdminClient) -> Self {
        PooledConnection {
            pool,
            client: Some(client),
        }
    }
}

impl Deref for PooledConnection {
    type Target = AdminClient;

    fn deref(&self) -> &AdminClient {
        self.client.as_ref().expect("connection exists until drop")
    }
}

impl DerefMut for PooledConnection {
    fn deref_mut(&mut self) -> &mut AdminClient {
        self.client.as_mut().expect("connection exists until drop")
    }
}

impl Drop for PooledConnection {
    fn drop(&mut self) {
        let client = match self.client.take() {
            Some(client) => client,
            None => return,
        };

        let pool = ConnectionPool {
            inner: self.pool.clone(),
        };

        if client.is_healthy() {
            pool.return_connection(client);
        } else {
            pool.release_slot();
        }
    }
}
