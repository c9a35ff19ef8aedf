//! # Async Admin Client
//!
//! Purpose: Tokio counterpart of `AdminClient`. It builds the same requests
//! and applies the same reply contracts; only the transport calls suspend.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tracing::debug;

use crate::async_transport::AsyncTransport;
use crate::client::pick_config_value;
use crate::command::{ClientType, CommandNameTable, InfoSection, MigrateMode, ResetMode, SlotAction};
use crate::config::ClientConfig;
use crate::contract;
use crate::error::ClientResult;
use crate::parse::{parse_client_list, parse_info, ClientInfo, InfoMap};
use crate::resp::{Reply, Request};

/// Suspending client bound to one server connection.
///
/// Calls take `&mut self`, so one request is in flight at a time.
pub struct AsyncAdminClient {
    transport: AsyncTransport,
    names: Arc<CommandNameTable>,
    log_requests: bool,
    log_replies: bool,
    requests_sent: u64,
    healthy: bool,
}

impl AsyncAdminClient {
    /// Connects with a name table built from `config`.
    pub async fn connect(config: &ClientConfig) -> ClientResult<Self> {
        let names = CommandNameTable::new(&config.command_renames, config.internal_commands);
        Self::connect_with(config, Arc::new(names)).await
    }

    /// Connects sharing an existing name table, then authenticates when a
    /// password is configured.
    pub async fn connect_with(config: &ClientConfig, names: Arc<CommandNameTable>) -> ClientResult<Self> {
        let transport = AsyncTransport::connect(config).await?;
        let mut client = AsyncAdminClient {
            transport,
            names,
            log_requests: config.log_requests,
            log_replies: config.log_replies,
            requests_sent: 0,
            healthy: true,
        };
        if let Some(password) = config.password.as_deref() {
            let request = client.names.auth(password);
            let reply = client.execute(&request).await?;
            contract::ok(reply)?;
        }
        Ok(client)
    }

    /// Sends one request and returns the decoded reply, whatever its shape.
    pub async fn execute(&mut self, request: &Request) -> ClientResult<Reply> {
        if self.log_requests {
            debug!(peer = %self.transport.peer(), command = %request.name(), "request");
        }
        match self.round_trip(request).await {
            Ok(reply) => {
                if self.log_replies {
                    debug!(peer = %self.transport.peer(), reply = reply.kind(), "reply");
                }
                Ok(reply)
            }
            Err(err) => {
                // The stream position is unknown after a failed cycle.
                self.healthy = false;
                Err(err)
            }
        }
    }

    async fn round_trip(&mut self, request: &Request) -> ClientResult<Reply> {
        self.transport.send(request).await?;
        self.requests_sent += 1;
        self.transport.receive().await
    }

    pub fn names(&self) -> &CommandNameTable {
        &self.names
    }

    pub fn peer(&self) -> &str {
        self.transport.peer()
    }

    pub fn requests_sent(&self) -> u64 {
        self.requests_sent
    }

    /// False after a failed request/reply cycle or once closed.
    pub fn is_healthy(&self) -> bool {
        self.healthy && !self.transport.is_closed()
    }

    /// Releases the connection. Idempotent.
    pub async fn close(&mut self) {
        self.transport.close().await;
    }

    // --- status ---

    pub async fn ping(&mut self) -> ClientResult<bool> {
        let request = self.names.ping();
        self.execute(&request).await.and_then(contract::status)
    }

    /// AUTH; an absent password succeeds without a round trip.
    pub async fn auth(&mut self, password: Option<&str>) -> ClientResult<bool> {
        let Some(password) = password else {
            return Ok(true);
        };
        let request = self.names.auth(password);
        self.execute(&request).await.and_then(contract::status)
    }

    pub async fn privilege(&mut self) -> ClientResult<bool> {
        let request = self.names.privilege();
        self.execute(&request).await.and_then(contract::status)
    }

    pub async fn perform_command(&mut self, ops: &[&str]) -> ClientResult<bool> {
        let request = self.names.literal(ops);
        self.execute(&request).await.and_then(contract::status)
    }

    // --- introspection ---

    pub async fn info(&mut self) -> ClientResult<Option<InfoMap>> {
        let request = self.names.info(None);
        let body = self.execute(&request).await.and_then(contract::bulk_text)?;
        Ok(body.as_deref().map(parse_info))
    }

    pub async fn info_section(&mut self, section: InfoSection) -> ClientResult<Option<InfoMap>> {
        let request = self.names.info(Some(section));
        let body = self.execute(&request).await.and_then(contract::bulk_text)?;
        Ok(body.as_deref().map(parse_info))
    }

    pub async fn timings(&mut self) -> ClientResult<Option<String>> {
        let request = self.names.timings();
        self.execute(&request).await.and_then(contract::bulk_text)
    }

    pub async fn clock(&mut self) -> ClientResult<i64> {
        let request = self.names.clock();
        self.execute(&request).await.and_then(contract::integer)
    }

    pub async fn slowlog(&mut self) -> ClientResult<Option<Vec<Reply>>> {
        let request = self.names.slowlog();
        self.execute(&request).await.and_then(contract::array)
    }

    pub async fn config_get(&mut self, key: &str) -> ClientResult<Option<Vec<Reply>>> {
        let request = self.names.config_get(key);
        self.execute(&request).await.and_then(contract::array)
    }

    pub async fn config_get_all(&mut self) -> ClientResult<Vec<(String, String)>> {
        Ok(self.config_get("*").await?.map(contract::pairs).unwrap_or_default())
    }

    /// Value of a single parameter, `None` when the server has no such key.
    pub async fn config_value(&mut self, key: &str) -> ClientResult<Option<String>> {
        let pairs = self.config_get(key).await?.map(contract::pairs).unwrap_or_default();
        Ok(pick_config_value(pairs, key))
    }

    pub async fn config_set(&mut self, key: &str, value: &str) -> ClientResult<()> {
        let request = self.names.config_set(key, value);
        self.execute(&request).await.and_then(contract::ok)
    }

    pub async fn client_list(&mut self) -> ClientResult<Vec<ClientInfo>> {
        let request = self.names.client_list();
        let body = self.execute(&request).await.and_then(contract::bulk_text)?;
        Ok(body.as_deref().map(parse_client_list).unwrap_or_default())
    }

    /// Kills every connection of a class; true when at least one was killed.
    pub async fn kill_clients_of_type(&mut self, kind: ClientType) -> ClientResult<bool> {
        let request = self.names.client_kill_type(kind);
        Ok(self.execute(&request).await.and_then(contract::integer)? > 0)
    }

    pub async fn kill_client(&mut self, addr: SocketAddr) -> ClientResult<bool> {
        let request = self.names.client_kill_addr(addr);
        self.execute(&request).await.and_then(contract::status)
    }

    // --- replication ---

    pub async fn slave_of(&mut self, primary: SocketAddr) -> ClientResult<()> {
        let request = self.names.slave_of(primary);
        self.execute(&request).await.and_then(contract::ok)
    }

    pub async fn slave_of_no_one(&mut self) -> ClientResult<()> {
        let request = self.names.slave_of_no_one();
        self.execute(&request).await.and_then(contract::ok)
    }

    /// See `AdminClient::prepare_promotion`.
    pub async fn prepare_promotion(&mut self) -> ClientResult<Option<i64>> {
        let request = self.names.prepare_promotion();
        match self.execute(&request).await {
            Ok(reply) => Ok(contract::promotion(reply)),
            Err(err) if err.is_protocol() => {
                debug!(error = %err, "promotion prepare failed");
                Ok(None)
            }
            Err(err) => Err(err),
        }
    }

    pub async fn abort_promotion(&mut self) -> ClientResult<bool> {
        let request = self.names.abort_promotion();
        self.execute(&request).await.and_then(contract::status)
    }

    // --- cluster ---

    pub async fn cluster_info(&mut self) -> ClientResult<Option<InfoMap>> {
        let request = self.names.cluster_info();
        let body = self.execute(&request).await.and_then(contract::bulk_text)?;
        Ok(body.as_deref().map(parse_info))
    }

    pub async fn cluster_nodes(&mut self) -> ClientResult<Option<String>> {
        let request = self.names.cluster_nodes();
        self.execute(&request).await.and_then(contract::bulk_text)
    }

    pub async fn cluster_slots(&mut self) -> ClientResult<Option<Vec<Reply>>> {
        let request = self.names.cluster_slots();
        self.execute(&request).await.and_then(contract::array)
    }

    pub async fn cluster_failover_takeover(&mut self) -> ClientResult<()> {
        let request = self.names.cluster_failover_takeover();
        self.execute(&request).await.and_then(contract::ok)
    }

    pub async fn cluster_meet(&mut self, ip: &str, port: u16) -> ClientResult<()> {
        let request = self.names.cluster_meet(ip, port);
        self.execute(&request).await.and_then(contract::ok)
    }

    pub async fn cluster_replicate(&mut self, primary_node_id: &str) -> ClientResult<()> {
        let request = self.names.cluster_replicate(primary_node_id);
        self.execute(&request).await.and_then(contract::ok)
    }

    pub async fn cluster_add_slots(&mut self, slots: &[u16]) -> ClientResult<()> {
        let request = self.names.cluster_add_slots(slots, false);
        self.execute(&request).await.and_then(contract::ok)
    }

    pub async fn cluster_add_slots_force(&mut self, slots: &[u16]) -> ClientResult<()> {
        let request = self.names.cluster_add_slots(slots, true);
        self.execute(&request).await.and_then(contract::ok)
    }

    pub async fn cluster_forget(&mut self, node_id: &str) -> ClientResult<()> {
        let request = self.names.cluster_forget(node_id);
        self.execute(&request).await.and_then(contract::ok)
    }

    pub async fn cluster_set_config_epoch(&mut self, epoch: u64) -> ClientResult<()> {
        let request = self.names.cluster_set_config_epoch(epoch);
        self.execute(&request).await.and_then(contract::ok)
    }

    /// Returns the server's status text (`BUMPED <epoch>` or `STILL <epoch>`).
    pub async fn cluster_bump_epoch(&mut self) -> ClientResult<String> {
        let request = self.names.cluster_bump_epoch();
        self.execute(&request).await.and_then(contract::status_text)
    }

    pub async fn cluster_count_keys_in_slot(&mut self, slot: u16) -> ClientResult<i64> {
        let request = self.names.cluster_count_keys_in_slot(slot);
        self.execute(&request).await.and_then(contract::integer)
    }

    pub async fn cluster_get_keys_in_slot(&mut self, slot: u16, count: usize) -> ClientResult<Vec<Vec<u8>>> {
        let request = self.names.cluster_get_keys_in_slot(slot, count);
        let items = self.execute(&request).await.and_then(contract::array)?;
        Ok(items.map(contract::bulk_items).unwrap_or_default())
    }

    pub async fn cluster_set_slot(&mut self, slot: u16, action: &SlotAction) -> ClientResult<()> {
        let request = self.names.cluster_set_slot(slot, action);
        self.execute(&request).await.and_then(contract::ok)
    }

    pub async fn cluster_reset(&mut self, mode: ResetMode) -> ClientResult<()> {
        let request = self.names.cluster_reset(mode);
        self.execute(&request).await.and_then(contract::ok)
    }

    pub async fn migrate(
        &mut self,
        host: &str,
        port: u16,
        timeout: Duration,
        mode: Option<MigrateMode>,
        keys: &[&[u8]],
    ) -> ClientResult<()> {
        let request = self.names.migrate(host, port, timeout, mode, keys);
        self.execute(&request).await.and_then(contract::ok)
    }

    // --- data ---

    /// Returns `Ok(None)` when the key is missing.
    pub async fn get(&mut self, key: &[u8]) -> ClientResult<Option<Vec<u8>>> {
        let request = self.names.get(key);
        self.execute(&request).await.and_then(contract::value)
    }

    pub async fn set(&mut self, key: &[u8], value: &[u8]) -> ClientResult<()> {
        let request = self.names.set(key, value);
        self.execute(&request).await.and_then(contract::ok)
    }

    /// GET that discards the value; true when the server answered with a
    /// bulk string.
    pub async fn get_and_forget(&mut self, key: &[u8]) -> ClientResult<bool> {
        let request = self.names.get(key);
        self.execute(&request).await.and_then(contract::fetched)
    }

    pub async fn flush_all(&mut self) -> ClientResult<()> {
        let request = self.names.flush_all();
        self.execute(&request).await.and_then(contract::ok)
    }
}
