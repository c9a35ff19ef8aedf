//! # rops Admin Client
//!
//! Purpose: Provide a RESP2 client for the administrative surface of a
//! Redis-compatible server: replication control, cluster topology, client
//! introspection and configuration, plus the GET/SET used for load tests.
//!
//! ## Design Principles
//! 1. **Protocol Clarity**: Encode/parse RESP2 explicitly; one decoder state
//!    machine drives both the blocking and the tokio transports.
//! 2. **Typed Replies**: A closed `Reply` enum is matched exhaustively by
//!    per-command contracts instead of being inspected ad hoc by callers.
//! 3. **Object Pool Pattern**: Reuse connections to avoid repeated handshakes.
//! 4. **Measured Resilience**: Forced reconnects are rate limited and only
//!    happen after connection errors persist.

mod async_client;
mod async_transport;
mod client;
mod command;
mod config;
mod contract;
mod error;
mod parse;
mod pool;
mod resilience;
mod resp;
mod tls;
mod transport;

pub use async_client::AsyncAdminClient;
pub use async_transport::AsyncTransport;
pub use client::AdminClient;
pub use command::{
    ClientType, CommandId, CommandNameTable, InfoSection, MigrateMode, ResetMode, SlotAction,
};
pub use config::{ClientConfig, PoolConfig, ReconnectConfig, TlsConfig};
pub use error::{ClientError, ClientResult};
pub use parse::{parse_client_list, parse_info, ClientInfo, InfoMap};
pub use pool::{ConnectionPool, PooledConnection};
pub use resilience::{
    Clock, ConnectionManager, ManagedConnection, ManualClock, ReconnectOutcome, SystemClock,
};
pub use resp::{encode_request, read_reply, read_reply_async, Reply, Request};
pub use tls::TrustPolicy;
pub use transport::{ShutdownHandle, Transport};
