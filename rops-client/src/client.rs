//! # Blocking Admin Client
//!
//! Purpose: Expose the administrative and data commands over one blocking
//! connection. Each call is one request/reply cycle on the owned transport.
//!
//! ## Design Principles
//! 1. **Facade Pattern**: `AdminClient` hides framing, renaming and reply
//!    interpretation behind typed methods.
//! 2. **Borrow-Friendly API**: Keys and values are accepted as `&[u8]`.
//! 3. **Fail Fast**: A transport fault marks the client unhealthy so pools
//!    never hand out a desynchronized stream again.
//! 4. **No Secrets in Logs**: Only command names and reply kinds are traced.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tracing::debug;

use crate::command::{ClientType, CommandNameTable, InfoSection, MigrateMode, ResetMode, SlotAction};
use crate::config::ClientConfig;
use crate::contract;
use crate::error::ClientResult;
use crate::parse::{parse_client_list, parse_info, ClientInfo, InfoMap};
use crate::resp::{Reply, Request};
use crate::transport::{ShutdownHandle, Transport};

/// Blocking client bound to one server connection.
pub struct AdminClient {
    transport: Transport,
    names: Arc<CommandNameTable>,
    log_requests: bool,
    log_replies: bool,
    requests_sent: u64,
    healthy: bool,
}

impl AdminClient {
    /// Connects with a name table built from `config`.
    pub fn connect(config: &ClientConfig) -> ClientResult<Self> {
        let names = CommandNameTable::new(&config.command_renames, config.internal_commands);
        Self::connect_with(config, Arc::new(names))
    }

    /// Connects sharing an existing name table, then authenticates when a
    /// password is configured.
    pub fn connect_with(config: &ClientConfig, names: Arc<CommandNameTable>) -> ClientResult<Self> {
        let transport = Transport::connect(config)?;
        let mut client = AdminClient {
            transport,
            names,
            log_requests: config.log_requests,
            log_replies: config.log_replies,
            requests_sent: 0,
            healthy: true,
        };
        if let Some(password) = config.password.as_deref() {
            let request = client.names.auth(password);
            let reply = client.execute(&request)?;
            contract::ok(reply)?;
        }
        Ok(client)
    }

    /// Sends one request and returns the decoded reply, whatever its shape.
    pub fn execute(&mut self, request: &Request) -> ClientResult<Reply> {
        if self.log_requests {
            debug!(peer = %self.transport.peer(), command = %request.name(), "request");
        }
        match self.round_trip(request) {
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

    fn round_trip(&mut self, request: &Request) -> ClientResult<Reply> {
        self.transport.send(request)?;
        self.requests_sent += 1;
        self.transport.receive()
    }

    pub fn names(&self) -> &CommandNameTable {
        &self.names
    }

    pub fn peer(&self) -> &str {
        self.transport.peer()
    }

    /// Number of requests flushed to the server so far.
    pub fn requests_sent(&self) -> u64 {
        self.requests_sent
    }

    /// False after a failed request/reply cycle or once closed.
    pub fn is_healthy(&self) -> bool {
        self.healthy && !self.transport.is_closed()
    }

    /// Handle that can abort a blocked call from another thread.
    pub fn shutdown_handle(&self) -> ShutdownHandle {
        self.transport.shutdown_handle()
    }

    /// Releases the connection. Idempotent.
    pub fn close(&mut self) {
        self.transport.close();
    }

    // --- status ---

    pub fn ping(&mut self) -> ClientResult<bool> {
        let request = self.names.ping();
        self.execute(&request).and_then(contract::status)
    }

    /// AUTH; an absent password succeeds without a round trip.
    pub fn auth(&mut self, password: Option<&str>) -> ClientResult<bool> {
        let Some(password) = password else {
            return Ok(true);
        };
        let request = self.names.auth(password);
        self.execute(&request).and_then(contract::status)
    }

    /// Checks whether this connection holds the privileged role.
    pub fn privilege(&mut self) -> ClientResult<bool> {
        let request = self.names.privilege();
        self.execute(&request).and_then(contract::status)
    }

    /// Runs an arbitrary command given as literal tokens.
    pub fn perform_command(&mut self, ops: &[&str]) -> ClientResult<bool> {
        let request = self.names.literal(ops);
        self.execute(&request).and_then(contract::status)
    }

    // --- introspection ---

    pub fn info(&mut self) -> ClientResult<Option<InfoMap>> {
        let request = self.names.info(None);
        let body = self.execute(&request).and_then(contract::bulk_text)?;
        Ok(body.as_deref().map(parse_info))
    }

    pub fn info_section(&mut self, section: InfoSection) -> ClientResult<Option<InfoMap>> {
        let request = self.names.info(Some(section));
        let body = self.execute(&request).and_then(contract::bulk_text)?;
        Ok(body.as_deref().map(parse_info))
    }

    /// Raw `INFO timings` body.
    pub fn timings(&mut self) -> ClientResult<Option<String>> {
        let request = self.names.timings();
        self.execute(&request).and_then(contract::bulk_text)
    }

    /// Server clock from `INFO clock`.
    pub fn clock(&mut self) -> ClientResult<i64> {
        let request = self.names.clock();
        self.execute(&request).and_then(contract::integer)
    }

    pub fn slowlog(&mut self) -> ClientResult<Option<Vec<Reply>>> {
        let request = self.names.slowlog();
        self.execute(&request).and_then(contract::array)
    }

    pub fn config_get(&mut self, key: &str) -> ClientResult<Option<Vec<Reply>>> {
        let request = self.names.config_get(key);
        self.execute(&request).and_then(contract::array)
    }

    /// Every configuration parameter as name/value pairs.
    pub fn config_get_all(&mut self) -> ClientResult<Vec<(String, String)>> {
        Ok(self.config_get("*")?.map(contract::pairs).unwrap_or_default())
    }

    /// Value of a single parameter, `None` when the server has no such key.
    pub fn config_value(&mut self, key: &str) -> ClientResult<Option<String>> {
        let pairs = self.config_get(key)?.map(contract::pairs).unwrap_or_default();
        Ok(pick_config_value(pairs, key))
    }

    pub fn config_set(&mut self, key: &str, value: &str) -> ClientResult<()> {
        let request = self.names.config_set(key, value);
        self.execute(&request).and_then(contract::ok)
    }

    pub fn client_list(&mut self) -> ClientResult<Vec<ClientInfo>> {
        let request = self.names.client_list();
        let body = self.execute(&request).and_then(contract::bulk_text)?;
        Ok(body.as_deref().map(parse_client_list).unwrap_or_default())
    }

    /// Kills every connection of a class; true when at least one was killed.
    pub fn kill_clients_of_type(&mut self, kind: ClientType) -> ClientResult<bool> {
        let request = self.names.client_kill_type(kind);
        Ok(self.execute(&request).and_then(contract::integer)? > 0)
    }

    pub fn kill_client(&mut self, addr: SocketAddr) -> ClientResult<bool> {
        let request = self.names.client_kill_addr(addr);
        self.execute(&request).and_then(contract::status)
    }

    // --- replication ---

    pub fn slave_of(&mut self, primary: SocketAddr) -> ClientResult<()> {
        let request = self.names.slave_of(primary);
        self.execute(&request).and_then(contract::ok)
    }

    pub fn slave_of_no_one(&mut self) -> ClientResult<()> {
        let request = self.names.slave_of_no_one();
        self.execute(&request).and_then(contract::ok)
    }

    /// First phase of the promotion handshake.
    ///
    /// Returns the epoch granted by the server, or `None` when it refused or
    /// answered with an unusable reply. Transport failures still propagate.
    pub fn prepare_promotion(&mut self) -> ClientResult<Option<i64>> {
        let request = self.names.prepare_promotion();
        match self.execute(&request) {
            Ok(reply) => Ok(contract::promotion(reply)),
            Err(err) if err.is_protocol() => {
                debug!(error = %err, "promotion prepare failed");
                Ok(None)
            }
            Err(err) => Err(err),
        }
    }

    pub fn abort_promotion(&mut self) -> ClientResult<bool> {
        let request = self.names.abort_promotion();
        self.execute(&request).and_then(contract::status)
    }

    // --- cluster ---

    pub fn cluster_info(&mut self) -> ClientResult<Option<InfoMap>> {
        let request = self.names.cluster_info();
        let body = self.execute(&request).and_then(contract::bulk_text)?;
        Ok(body.as_deref().map(parse_info))
    }

    pub fn cluster_nodes(&mut self) -> ClientResult<Option<String>> {
        let request = self.names.cluster_nodes();
        self.execute(&request).and_then(contract::bulk_text)
    }

    pub fn cluster_slots(&mut self) -> ClientResult<Option<Vec<Reply>>> {
        let request = self.names.cluster_slots();
        self.execute(&request).and_then(contract::array)
    }

    pub fn cluster_failover_takeover(&mut self) -> ClientResult<()> {
        let request = self.names.cluster_failover_takeover();
        self.execute(&request).and_then(contract::ok)
    }

    pub fn cluster_meet(&mut self, ip: &str, port: u16) -> ClientResult<()> {
        let request = self.names.cluster_meet(ip, port);
        self.execute(&request).and_then(contract::ok)
    }

    pub fn cluster_replicate(&mut self, primary_node_id: &str) -> ClientResult<()> {
        let request = self.names.cluster_replicate(primary_node_id);
        self.execute(&request).and_then(contract::ok)
    }

    pub fn cluster_add_slots(&mut self, slots: &[u16]) -> ClientResult<()> {
        let request = self.names.cluster_add_slots(slots, false);
        self.execute(&request).and_then(contract::ok)
    }

    /// ADDSLOTSFORCE: claims slots even when another node owns them.
    pub fn cluster_add_slots_force(&mut self, slots: &[u16]) -> ClientResult<()> {
        let request = self.names.cluster_add_slots(slots, true);
        self.execute(&request).and_then(contract::ok)
    }

    pub fn cluster_forget(&mut self, node_id: &str) -> ClientResult<()> {
        let request = self.names.cluster_forget(node_id);
        self.execute(&request).and_then(contract::ok)
    }

    pub fn cluster_set_config_epoch(&mut self, epoch: u64) -> ClientResult<()> {
        let request = self.names.cluster_set_config_epoch(epoch);
        self.execute(&request).and_then(contract::ok)
    }

    /// Returns the server's status text (`BUMPED <epoch>` or `STILL <epoch>`).
    pub fn cluster_bump_epoch(&mut self) -> ClientResult<String> {
        let request = self.names.cluster_bump_epoch();
        self.execute(&request).and_then(contract::status_text)
    }

    pub fn cluster_count_keys_in_slot(&mut self, slot: u16) -> ClientResult<i64> {
        let request = self.names.cluster_count_keys_in_slot(slot);
        self.execute(&request).and_then(contract::integer)
    }

    pub fn cluster_get_keys_in_slot(&mut self, slot: u16, count: usize) -> ClientResult<Vec<Vec<u8>>> {
        let request = self.names.cluster_get_keys_in_slot(slot, count);
        let items = self.execute(&request).and_then(contract::array)?;
        Ok(items.map(contract::bulk_items).unwrap_or_default())
    }

    pub fn cluster_set_slot(&mut self, slot: u16, action: &SlotAction) -> ClientResult<()> {
        let request = self.names.cluster_set_slot(slot, action);
        self.execute(&request).and_then(contract::ok)
    }

    pub fn cluster_reset(&mut self, mode: ResetMode) -> ClientResult<()> {
        let request = self.names.cluster_reset(mode);
        self.execute(&request).and_then(contract::ok)
    }

    /// Moves `keys` to another node; `timeout` bounds the server-side transfer.
    pub fn migrate(
        &mut self,
        host: &str,
        port: u16,
        timeout: Duration,
        mode: Option<MigrateMode>,
        keys: &[&[u8]],
    ) -> ClientResult<()> {
        let request = self.names.migrate(host, port, timeout, mode, keys);
        self.execute(&request).and_then(contract::ok)
    }

    // --- data ---

    /// Returns `Ok(None)` when the key is missing.
    pub fn get(&mut self, key: &[u8]) -> ClientResult<Option<Vec<u8>>> {
        let request = self.names.get(key);
        self.execute(&request).and_then(contract::value)
    }

    pub fn set(&mut self, key: &[u8], value: &[u8]) -> ClientResult<()> {
        let request = self.names.set(key, value);
        self.execute(&request).and_then(contract::ok)
    }

    /// GET that discards the value; true when the server answered with a
    /// bulk string.
    pub fn get_and_forget(&mut self, key: &[u8]) -> ClientResult<bool> {
        let request = self.names.get(key);
        self.execute(&request).and_then(contract::fetched)
    }

    pub fn flush_all(&mut self) -> ClientResult<()> {
        let request = self.names.flush_all();
        self.execute(&request).and_then(contract::ok)
    }
}

/// Picks `key`'s value out of CONFIG GET pairs; falls back to the first pair
/// when the server echoes a differently-cased name.
pub(crate) fn pick_config_value(pairs: Vec<(String, String)>, key: &str) -> Option<String> {
    let exact = pairs
        .iter()
        .position(|(name, _)| name.eq_ignore_ascii_case(key));
    let index = exact.or(if pairs.is_empty() { None } else { Some(0) })?;
    pairs.into_iter().nth(index).map(|(_, value)| value)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn config_value_prefers_matching_name() {
        let pairs = vec![
            ("maxclients".to_string(), "10".to_string()),
            ("maxmemory".to_string(), "0".to_string()),
        ];
        assert_eq!(pick_config_value(pairs, "MAXMEMORY"), Some("0".to_string()));
    }

    #[test]
    fn config_value_empty_is_none() {
        assert_eq!(pick_config_value(Vec::new(), "maxmemory"), None);
    }
}
