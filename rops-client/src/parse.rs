//! # Response Parsers
//!
//! Purpose: Turn INFO-style and CLIENT LIST text into structured values.
//!
//! Both parsers are lenient: a malformed line is skipped (and traced), never
//! fatal to the rest of the response.

use std::collections::BTreeMap;
use std::net::{IpAddr, SocketAddr};

use tracing::trace;

/// Key/value view of an INFO (or CLUSTER INFO) body, sorted by key rather
/// than kept in the order the server sent the lines.
pub type InfoMap = BTreeMap<String, String>;

/// Parses `key:value` lines, skipping blanks and `#` section headers.
///
/// The value is everything after the first colon, so values such as paths
/// or addresses keep their own colons. Duplicate keys keep the last value.
pub fn parse_info(body: &str) -> InfoMap {
    let mut map = InfoMap::new();
    for line in body.lines() {
        let line = line.trim_end_matches('\r');
        if line.trim().is_empty() || line.starts_with('#') {
            continue;
        }
        match line.split_once(':') {
            Some((key, value)) if !key.is_empty() => {
                map.insert(key.to_string(), value.to_string());
            }
            _ => trace!(line, "skipping malformed info line"),
        }
    }
    map
}

/// One connection as reported by CLIENT LIST.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientInfo {
    /// `addr=` split into host and port, when it parses.
    pub endpoint: Option<SocketAddr>,
    /// `name=` (empty names are reported as `Some("")`).
    pub name: Option<String>,
    /// `flags=`
    pub flags: Option<String>,
    /// `numops=`, 0 when missing or unparsable.
    pub num_ops: i64,
    /// The line as received.
    pub raw: String,
    attributes: BTreeMap<String, String>,
}

impl ClientInfo {
    /// Parses one CLIENT LIST line. Returns `None` when no `key=value`
    /// token is present at all.
    pub fn parse(line: &str) -> Option<Self> {
        let mut attributes = BTreeMap::new();
        for token in line.split_whitespace() {
            let (key, value) = token.split_once('=').unwrap_or((token, ""));
            if key.is_empty() {
                continue;
            }
            attributes.insert(key.to_ascii_lowercase(), value.to_string());
        }
        if attributes.is_empty() {
            return None;
        }

        let endpoint = attributes
            .get("addr")
            .map(String::as_str)
            .and_then(parse_endpoint);
        let num_ops = attributes
            .get("numops")
            .and_then(|ops| ops.parse().ok())
            .unwrap_or(0);

        Some(ClientInfo {
            endpoint,
            name: attributes.get("name").cloned(),
            flags: attributes.get("flags").cloned(),
            num_ops,
            raw: line.to_string(),
            attributes,
        })
    }

    /// Case-insensitive attribute lookup.
    pub fn get(&self, key: &str) -> Option<&str> {
        self.attributes
            .get(&key.to_ascii_lowercase())
            .map(String::as_str)
    }

    /// Every attribute, keyed by lower-cased name.
    pub fn attributes(&self) -> &BTreeMap<String, String> {
        &self.attributes
    }
}

/// Parses a whole CLIENT LIST body, one record per non-blank line.
pub fn parse_client_list(body: &str) -> Vec<ClientInfo> {
    body.split(['\r', '\n'])
        .filter(|line| !line.trim().is_empty())
        .filter_map(|line| {
            let parsed = ClientInfo::parse(line);
            if parsed.is_none() {
                trace!(line, "skipping malformed client line");
            }
            parsed
        })
        .collect()
}

fn parse_endpoint(addr: &str) -> Option<SocketAddr> {
    let (host, port) = addr.rsplit_once(':')?;
    let host = host.trim_start_matches('[').trim_end_matches(']');
    let ip: IpAddr = host.parse().ok()?;
    let port: u16 = port.parse().ok()?;
    Some(SocketAddr::new(ip, port))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn info_skips_headers_and_blank_lines() {
        let map = parse_info("# Section\r\nkey1:val1\r\n\r\nkey2:val2\r\n");
        assert_eq!(map.len(), 2);
        assert_eq!(map["key1"], "val1");
        assert_eq!(map["key2"], "val2");
    }

    #[test]
    fn info_keeps_colons_in_values_and_last_duplicate() {
        let map = parse_info("executable:/usr/bin/server\nrole:master\nrole:slave\n");
        assert_eq!(map["executable"], "/usr/bin/server");
        assert_eq!(map["role"], "slave");
    }

    #[test]
    fn info_iterates_in_key_order() {
        let map = parse_info("zeta:1\nalpha:2\nmid:3\n");
        let keys: Vec<&str> = map.keys().map(String::as_str).collect();
        assert_eq!(keys, ["alpha", "mid", "zeta"]);
    }

    #[test]
    fn info_skips_lines_without_colon() {
        let map = parse_info("garbage\n:novalue\nok:1\n");
        assert_eq!(map.len(), 1);
        assert_eq!(map["ok"], "1");
    }

    #[test]
    fn client_list_projects_known_fields() {
        let clients = parse_client_list("id=1 addr=127.0.0.1:6380 name=foo flags=N numops=42\n");
        assert_eq!(clients.len(), 1);
        let client = &clients[0];
        assert_eq!(client.endpoint, Some("127.0.0.1:6380".parse().unwrap()));
        assert_eq!(client.name.as_deref(), Some("foo"));
        assert_eq!(client.flags.as_deref(), Some("N"));
        assert_eq!(client.num_ops, 42);
        assert_eq!(client.get("ID"), Some("1"));
    }

    #[test]
    fn client_list_tolerates_bad_fields_and_lines() {
        let body = "id=2 addr=bogus numops=lots name=\r\n\r\n   \nnot-a-pair-line\nid=3 addr=[::1]:7000\n";
        let clients = parse_client_list(body);
        // The bare token line still yields a record with one attribute.
        assert_eq!(clients.len(), 3);
        assert_eq!(clients[0].endpoint, None);
        assert_eq!(clients[0].num_ops, 0);
        assert_eq!(clients[0].name.as_deref(), Some(""));
        assert_eq!(clients[1].get("not-a-pair-line"), Some(""));
        assert_eq!(clients[2].endpoint, Some("[::1]:7000".parse().unwrap()));
    }

    #[test]
    fn client_line_with_no_tokens_is_skipped() {
        assert!(ClientInfo::parse("   ").is_none());
        assert!(ClientInfo::parse("=x =y").is_none());
    }
}
