//! # Command Names and Request Builders
//!
//! Purpose: Map logical commands to the wire tokens a deployment expects and
//! build every request the clients send.
//!
//! ## Design Principles
//! 1. **Instance-Owned Names**: Renames are applied once when the table is
//!    built; the table is then shared read-only (`Arc`) by every connection.
//! 2. **One Builder per Operation**: Blocking and async clients call the same
//!    builders, so both variants put identical bytes on the wire.

use std::collections::HashMap;
use std::fmt;
use std::net::SocketAddr;
use std::time::Duration;

use crate::resp::Request;

const COMMAND_COUNT: usize = 16;

/// Logical command identifiers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CommandId {
    SlaveOf,
    Info,
    InfoInternal,
    Auth,
    AuthInternal,
    Config,
    Client,
    Ping,
    Slowlog,
    Privilege,
    Cluster,
    Debug,
    Migrate,
    Get,
    Set,
    FlushAll,
}

impl CommandId {
    pub const ALL: [CommandId; COMMAND_COUNT] = [
        CommandId::SlaveOf,
        CommandId::Info,
        CommandId::InfoInternal,
        CommandId::Auth,
        CommandId::AuthInternal,
        CommandId::Config,
        CommandId::Client,
        CommandId::Ping,
        CommandId::Slowlog,
        CommandId::Privilege,
        CommandId::Cluster,
        CommandId::Debug,
        CommandId::Migrate,
        CommandId::Get,
        CommandId::Set,
        CommandId::FlushAll,
    ];

    /// Token used when no rename applies.
    pub const fn default_token(self) -> &'static str {
        match self {
            CommandId::SlaveOf => "SLAVEOF",
            CommandId::Info => "INFO",
            CommandId::InfoInternal => "INFOINTERNAL",
            CommandId::Auth => "AUTH",
            CommandId::AuthInternal => "AUTHINTERNAL",
            CommandId::Config => "CONFIG",
            CommandId::Client => "CLIENT",
            CommandId::Ping => "PING",
            CommandId::Slowlog => "SLOWLOG",
            // Wire token as registered server-side.
            CommandId::Privilege => "PRIVILIDGE",
            CommandId::Cluster => "CLUSTER",
            CommandId::Debug => "DEBUG",
            CommandId::Migrate => "MIGRATE",
            CommandId::Get => "GET",
            CommandId::Set => "SET",
            CommandId::FlushAll => "FLUSHALL",
        }
    }

    const fn index(self) -> usize {
        self as usize
    }
}

/// Sections accepted by `INFO <section>`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InfoSection {
    /// Every section, including commandstats.
    All,
    Server,
    Replication,
    Cluster,
    Persistence,
    Keyspace,
}

impl InfoSection {
    pub const fn as_str(self) -> &'static str {
        match self {
            InfoSection::All => "all",
            InfoSection::Server => "server",
            InfoSection::Replication => "replication",
            InfoSection::Cluster => "cluster",
            InfoSection::Persistence => "persistence",
            InfoSection::Keyspace => "keyspace",
        }
    }
}

/// Connection classes for `CLIENT KILL TYPE`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClientType {
    Normal,
    Slave,
    Pubsub,
}

impl ClientType {
    pub const fn as_str(self) -> &'static str {
        match self {
            ClientType::Normal => "normal",
            ClientType::Slave => "slave",
            ClientType::Pubsub => "pubsub",
        }
    }
}

/// Target state for `CLUSTER SETSLOT`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SlotAction {
    /// Slot is being imported from the given node.
    Importing(String),
    /// Slot is being migrated to the given node.
    Migrating(String),
    /// Slot is owned by the given node.
    Node(String),
    /// Clear importing/migrating state.
    Stable,
}

/// Optional MIGRATE modifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MigrateMode {
    Copy,
    Replace,
}

/// `CLUSTER RESET` flavor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResetMode {
    Soft,
    Hard,
}

/// Logical command -> wire token.
#[derive(Clone, PartialEq, Eq)]
pub struct CommandNameTable {
    tokens: [String; COMMAND_COUNT],
    internal_commands: bool,
}

impl Default for CommandNameTable {
    fn default() -> Self {
        CommandNameTable {
            tokens: CommandId::ALL.map(|id| id.default_token().to_string()),
            internal_commands: false,
        }
    }
}

impl fmt::Debug for CommandNameTable {
    // Renamed tokens are secrets in hardened deployments.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let renamed = CommandId::ALL
            .iter()
            .filter(|id| self.token(**id) != id.default_token())
            .count();
        f.debug_struct("CommandNameTable")
            .field("renamed", &renamed)
            .field("internal_commands", &self.internal_commands)
            .finish()
    }
}

impl CommandNameTable {
    /// Builds a table from default-token -> replacement renames.
    ///
    /// Keys are matched case-insensitively against default tokens; unknown
    /// keys are ignored.
    pub fn new(renames: &HashMap<String, String>, internal_commands: bool) -> Self {
        let mut table = CommandNameTable {
            internal_commands,
            ..CommandNameTable::default()
        };
        for (from, to) in renames {
            if let Some(id) = CommandId::ALL
                .iter()
                .find(|id| id.default_token().eq_ignore_ascii_case(from))
            {
                table.tokens[id.index()] = to.clone();
            }
        }
        table
    }

    /// Current wire token for a command.
    pub fn token(&self, id: CommandId) -> &str {
        &self.tokens[id.index()]
    }

    pub fn uses_internal_commands(&self) -> bool {
        self.internal_commands
    }

    fn request(&self, id: CommandId) -> Request {
        Request::new(self.token(id))
    }

    fn info_request(&self) -> Request {
        if self.internal_commands {
            self.request(CommandId::InfoInternal)
        } else {
            self.request(CommandId::Info)
        }
    }

    // --- connection / status ---

    pub fn ping(&self) -> Request {
        self.request(CommandId::Ping)
    }

    pub fn auth(&self, password: &str) -> Request {
        let id = if self.internal_commands {
            CommandId::AuthInternal
        } else {
            CommandId::Auth
        };
        self.request(id).text(password)
    }

    pub fn privilege(&self) -> Request {
        self.request(CommandId::Privilege)
    }

    /// Request made of literal tokens, the first being the command name.
    pub fn literal(&self, ops: &[&str]) -> Request {
        match ops.split_first() {
            Some((name, rest)) => Request::new(name).texts(rest.iter().copied()),
            None => Request::new(""),
        }
    }

    // --- introspection ---

    pub fn info(&self, section: Option<InfoSection>) -> Request {
        match section {
            Some(section) => self.info_request().text(section.as_str()),
            None => self.info_request(),
        }
    }

    pub fn timings(&self) -> Request {
        self.info_request().text("timings")
    }

    pub fn clock(&self) -> Request {
        self.info_request().text("clock")
    }

    pub fn slowlog(&self) -> Request {
        self.request(CommandId::Slowlog).text("getpublic")
    }

    pub fn config_get(&self, key: &str) -> Request {
        self.request(CommandId::Config).text("get").text(key)
    }

    pub fn config_set(&self, key: &str, value: &str) -> Request {
        self.request(CommandId::Config).text("set").text(key).text(value)
    }

    pub fn client_list(&self) -> Request {
        self.request(CommandId::Client).text("list")
    }

    pub fn client_kill_type(&self, kind: ClientType) -> Request {
        self.request(CommandId::Client)
            .text("kill")
            .text("type")
            .text(kind.as_str())
    }

    pub fn client_kill_addr(&self, addr: SocketAddr) -> Request {
        self.request(CommandId::Client).text("kill").text(&addr.to_string())
    }

    // --- replication ---

    pub fn slave_of(&self, primary: SocketAddr) -> Request {
        self.request(CommandId::SlaveOf)
            .text(&primary.ip().to_string())
            .number(primary.port())
    }

    pub fn slave_of_no_one(&self) -> Request {
        self.request(CommandId::SlaveOf).text("NO").text("ONE")
    }

    pub fn prepare_promotion(&self) -> Request {
        self.request(CommandId::SlaveOf).text("PREPARE").text("START")
    }

    pub fn abort_promotion(&self) -> Request {
        self.request(CommandId::SlaveOf).text("PREPARE").text("ABORT")
    }

    // --- cluster topology ---

    fn cluster(&self, subcommand: &str) -> Request {
        self.request(CommandId::Cluster).text(subcommand)
    }

    pub fn cluster_info(&self) -> Request {
        self.cluster("INFO")
    }

    pub fn cluster_nodes(&self) -> Request {
        self.cluster("NODES")
    }

    pub fn cluster_slots(&self) -> Request {
        self.cluster("SLOTS")
    }

    pub fn cluster_failover_takeover(&self) -> Request {
        self.cluster("FAILOVER").text("TAKEOVER")
    }

    pub fn cluster_meet(&self, ip: &str, port: u16) -> Request {
        self.cluster("MEET").text(ip).number(port)
    }

    pub fn cluster_replicate(&self, primary_node_id: &str) -> Request {
        self.cluster("REPLICATE").text(primary_node_id)
    }

    pub fn cluster_add_slots(&self, slots: &[u16], force: bool) -> Request {
        let subcommand = if force { "ADDSLOTSFORCE" } else { "ADDSLOTS" };
        slots
            .iter()
            .fold(self.cluster(subcommand), |request, slot| request.number(slot))
    }

    pub fn cluster_forget(&self, node_id: &str) -> Request {
        self.cluster("FORGET").text(node_id)
    }

    pub fn cluster_set_config_epoch(&self, epoch: u64) -> Request {
        self.cluster("SET-CONFIG-EPOCH").number(epoch)
    }

    pub fn cluster_bump_epoch(&self) -> Request {
        self.cluster("BUMPEPOCH")
    }

    pub fn cluster_count_keys_in_slot(&self, slot: u16) -> Request {
        self.cluster("COUNTKEYSINSLOT").number(slot)
    }

    pub fn cluster_get_keys_in_slot(&self, slot: u16, count: usize) -> Request {
        self.cluster("GETKEYSINSLOT").number(slot).number(count)
    }

    pub fn cluster_set_slot(&self, slot: u16, action: &SlotAction) -> Request {
        let request = self.cluster("SETSLOT").number(slot);
        match action {
            SlotAction::Importing(node) => request.text("IMPORTING").text(node),
            SlotAction::Migrating(node) => request.text("MIGRATING").text(node),
            SlotAction::Node(node) => request.text("NODE").text(node),
            SlotAction::Stable => request.text("STABLE"),
        }
    }

    pub fn cluster_reset(&self, mode: ResetMode) -> Request {
        let flavor = match mode {
            ResetMode::Soft => "SOFT",
            ResetMode::Hard => "HARD",
        };
        self.cluster("RESET").text(flavor)
    }

    /// `MIGRATE host port "" 0 timeout [COPY|REPLACE] KEYS key...`
    pub fn migrate(
        &self,
        host: &str,
        port: u16,
        timeout: Duration,
        mode: Option<MigrateMode>,
        keys: &[&[u8]],
    ) -> Request {
        let request = self
            .request(CommandId::Migrate)
            .text(host)
            .number(port)
            .text("")
            .text("0")
            .number(timeout.as_millis());
        let request = match mode {
            Some(MigrateMode::Copy) => request.text("COPY"),
            Some(MigrateMode::Replace) => request.text("REPLACE"),
            None => request,
        };
        keys.iter().fold(request.text("KEYS"), |request, key| request.arg(key))
    }

    // --- data ---

    pub fn get(&self, key: &[u8]) -> Request {
        self.request(CommandId::Get).arg(key)
    }

    pub fn set(&self, key: &[u8], value: &[u8]) -> Request {
        self.request(CommandId::Set).arg(key).arg(value)
    }

    pub fn flush_all(&self) -> Request {
        self.request(CommandId::FlushAll)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(request: &Request) -> Vec<String> {
        request
            .args()
            .iter()
            .map(|arg| String::from_utf8(arg.clone()).unwrap())
            .collect()
    }

    #[test]
    fn renames_apply_to_every_builder_that_uses_the_command() {
        let mut renames = HashMap::new();
        renames.insert("config".to_string(), "CFG-7f3a".to_string());
        renames.insert("CLUSTER".to_string(), "CL-19".to_string());
        renames.insert("NOT-A-COMMAND".to_string(), "X".to_string());
        let table = CommandNameTable::new(&renames, false);

        assert_eq!(args(&table.config_get("maxmemory")), ["CFG-7f3a", "get", "maxmemory"]);
        assert_eq!(args(&table.cluster_nodes()), ["CL-19", "NODES"]);
        assert_eq!(table.token(CommandId::Info), "INFO");
    }

    #[test]
    fn internal_mode_switches_info_and_auth() {
        let table = CommandNameTable::new(&HashMap::new(), true);
        assert_eq!(args(&table.info(None)), ["INFOINTERNAL"]);
        assert_eq!(args(&table.auth("pw")), ["AUTHINTERNAL", "pw"]);
        assert_eq!(args(&table.clock()), ["INFOINTERNAL", "clock"]);
    }

    #[test]
    fn migrate_appends_keys_after_fixed_arguments() {
        let table = CommandNameTable::default();
        let request = table.migrate(
            "10.0.0.2",
            7001,
            Duration::from_millis(1500),
            Some(MigrateMode::Replace),
            &[b"k1".as_slice(), b"k2".as_slice()],
        );
        assert_eq!(
            args(&request),
            ["MIGRATE", "10.0.0.2", "7001", "", "0", "1500", "REPLACE", "KEYS", "k1", "k2"]
        );
        assert_eq!(request.len(), 8 + 2);
    }

    #[test]
    fn cluster_slot_commands_carry_slot_numbers() {
        let table = CommandNameTable::default();
        assert_eq!(
            args(&table.cluster_add_slots(&[0, 1, 16383], true)),
            ["CLUSTER", "ADDSLOTSFORCE", "0", "1", "16383"]
        );
        assert_eq!(
            args(&table.cluster_count_keys_in_slot(42)),
            ["CLUSTER", "COUNTKEYSINSLOT", "42"]
        );
        assert_eq!(
            args(&table.cluster_set_slot(7, &SlotAction::Migrating("abc".into()))),
            ["CLUSTER", "SETSLOT", "7", "MIGRATING", "abc"]
        );
        assert_eq!(
            args(&table.cluster_set_slot(7, &SlotAction::Stable)),
            ["CLUSTER", "SETSLOT", "7", "STABLE"]
        );
    }

    #[test]
    fn slave_of_splits_address_and_port() {
        let table = CommandNameTable::default();
        let addr: SocketAddr = "10.1.2.3:6380".parse().unwrap();
        assert_eq!(args(&table.slave_of(addr)), ["SLAVEOF", "10.1.2.3", "6380"]);
        assert_eq!(args(&table.client_kill_addr(addr)), ["CLIENT", "kill", "10.1.2.3:6380"]);
    }

    #[test]
    fn debug_output_hides_renamed_tokens() {
        let mut renames = HashMap::new();
        renames.insert("CONFIG".to_string(), "secret-token".to_string());
        let rendered = format!("{:?}", CommandNameTable::new(&renames, false));
        assert!(!rendered.contains("secret-token"));
        assert!(rendered.contains("renamed: 1"));
    }
}
