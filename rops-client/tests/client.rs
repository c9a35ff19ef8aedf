use std::io::{BufRead, BufReader, Read, Write};
use std::net::{SocketAddr, TcpListener, TcpStream};
use std::thread;
use std::time::{Duration, Instant};

use rops_client::{
    AdminClient, ClientConfig, ClientError, ConnectionPool, InfoSection, MigrateMode, SlotAction,
};

type Handler = fn(usize, Vec<Vec<u8>>, &mut TcpStream);

fn spawn_server(expected_commands: usize, handler: Handler) -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").expect("bind");
    let addr = listener.local_addr().expect("addr");

    thread::spawn(move || {
        let (mut stream, _) = listener.accept().expect("accept");
        let _ = stream.set_read_timeout(Some(Duration::from_secs(2)));
        let mut reader = BufReader::new(stream.try_clone().expect("clone"));
        for idx in 0..expected_commands {
            let args = match read_command(&mut reader) {
                Ok(args) => args,
                Err(_) => return,
            };
            handler(idx, args, &mut stream);
        }
    });

    addr
}

fn read_command(reader: &mut BufReader<TcpStream>) -> std::io::Result<Vec<Vec<u8>>> {
    let mut line = Vec::new();
    read_line(reader, &mut line)?.ok_or_else(|| std::io::Error::new(std::io::ErrorKind::UnexpectedEof, "eof"))?;
    if line.first() != Some(&b'*') {
        return Err(std::io::Error::new(std::io::ErrorKind::InvalidData, "expected array"));
    }
    let count = parse_usize(&line[1..])?;
    let mut args = Vec::with_capacity(count);
    for _ in 0..count {
        read_line(reader, &mut line)?.ok_or_else(|| std::io::Error::new(std::io::ErrorKind::UnexpectedEof, "eof"))?;
        if line.first() != Some(&b'$') {
            return Err(std::io::Error::new(std::io::ErrorKind::InvalidData, "expected bulk"));
        }
        let len = parse_usize(&line[1..])?;
        let mut data = vec![0u8; len];
        reader.read_exact(&mut data)?;
        let mut crlf = [0u8; 2];
        reader.read_exact(&mut crlf)?;
        if crlf != [b'\r', b'\n'] {
            return Err(std::io::Error::new(std::io::ErrorKind::InvalidData, "missing crlf"));
        }
        args.push(data);
    }
    Ok(args)
}

fn read_line(reader: &mut BufReader<TcpStream>, buf: &mut Vec<u8>) -> std::io::Result<Option<()>> {
    buf.clear();
    let bytes = reader.read_until(b'\n', buf)?;
    if bytes == 0 {
        return Ok(None);
    }
    if buf.len() < 2 || buf[buf.len() - 2] != b'\r' {
        return Err(std::io::Error::new(std::io::ErrorKind::InvalidData, "invalid line"));
    }
    buf.truncate(buf.len() - 2);
    Ok(Some(()))
}

fn parse_usize(data: &[u8]) -> std::io::Result<usize> {
    std::str::from_utf8(data)
        .ok()
        .and_then(|text| text.parse().ok())
        .ok_or_else(|| std::io::Error::new(std::io::ErrorKind::InvalidData, "digit"))
}

fn write_raw(stream: &mut TcpStream, bytes: &[u8]) {
    let _ = stream.write_all(bytes);
    let _ = stream.flush();
}

fn write_simple(stream: &mut TcpStream, msg: &str) {
    write_raw(stream, format!("+{msg}\r\n").as_bytes());
}

fn write_error(stream: &mut TcpStream, msg: &str) {
    write_raw(stream, format!("-{msg}\r\n").as_bytes());
}

fn write_bulk(stream: &mut TcpStream, data: &[u8]) {
    let mut frame = format!("${}\r\n", data.len()).into_bytes();
    frame.extend_from_slice(data);
    frame.extend_from_slice(b"\r\n");
    write_raw(stream, &frame);
}

fn write_integer(stream: &mut TcpStream, value: i64) {
    write_raw(stream, format!(":{value}\r\n").as_bytes());
}

fn text(args: &[Vec<u8>]) -> Vec<String> {
    args.iter()
        .map(|arg| String::from_utf8_lossy(arg).into_owned())
        .collect()
}

fn config_for(addr: SocketAddr) -> ClientConfig {
    let mut config = ClientConfig::new(addr.ip().to_string(), addr.port());
    config.connect_timeout_ms = 1_000;
    config.read_timeout_ms = 1_000;
    config.write_timeout_ms = 1_000;
    config.pool.max_idle = 1;
    config.pool.max_total = 1;
    config
}

fn client_with_addr(addr: SocketAddr) -> AdminClient {
    AdminClient::connect(&config_for(addr)).expect("client")
}

#[test]
fn client_set_get_roundtrip() {
    let addr = spawn_server(3, |idx, args, stream| match idx {
        0 => {
            assert_eq!(text(&args), ["SET", "key", "value"]);
            write_simple(stream, "OK");
        }
        1 => {
            assert_eq!(text(&args), ["GET", "key"]);
            write_bulk(stream, b"value");
        }
        _ => {
            assert_eq!(text(&args), ["GET", "missing"]);
            write_raw(stream, b"$-1\r\n");
        }
    });

    let mut client = client_with_addr(addr);
    client.set(b"key", b"value").expect("set");
    assert_eq!(client.get(b"key").expect("get"), Some(b"value".to_vec()));
    assert_eq!(client.get(b"missing").expect("get"), None);
    assert_eq!(client.requests_sent(), 3);
}

#[test]
fn password_is_sent_before_first_command() {
    let addr = spawn_server(2, |idx, args, stream| {
        if idx == 0 {
            assert_eq!(text(&args), ["AUTH", "s3cret"]);
            write_simple(stream, "OK");
        } else {
            assert_eq!(text(&args), ["PING"]);
            write_simple(stream, "PONG");
        }
    });

    let mut config = config_for(addr);
    config.password = Some("s3cret".to_string());
    let mut client = AdminClient::connect(&config).expect("client");
    assert!(client.ping().expect("ping"));
}

#[test]
fn rejected_password_fails_connect() {
    let addr = spawn_server(1, |_, _, stream| write_error(stream, "ERR invalid password"));

    let mut config = config_for(addr);
    config.password = Some("wrong".to_string());
    match AdminClient::connect(&config) {
        Err(ClientError::Server { message }) => assert!(message.contains("invalid password")),
        Err(other) => panic!("unexpected error: {other}"),
        Ok(_) => panic!("connect should fail"),
    }
}

#[test]
fn renamed_commands_reach_the_wire() {
    let addr = spawn_server(2, |idx, args, stream| {
        if idx == 0 {
            assert_eq!(text(&args), ["cfg-7f3a", "get", "maxmemory"]);
            write_raw(stream, b"*2\r\n$9\r\nmaxmemory\r\n$3\r\n100\r\n");
        } else {
            assert_eq!(text(&args), ["cli-22", "kill", "type", "normal"]);
            write_integer(stream, 0);
        }
    });

    let mut config = config_for(addr);
    config.command_renames.insert("CONFIG".into(), "cfg-7f3a".into());
    config.command_renames.insert("client".into(), "cli-22".into());
    let mut client = AdminClient::connect(&config).expect("client");

    assert_eq!(client.config_value("maxmemory").expect("config"), Some("100".to_string()));
    assert!(!client.kill_clients_of_type(rops_client::ClientType::Normal).expect("kill"));
}

#[test]
fn status_commands_map_error_replies_to_false() {
    let addr = spawn_server(3, |idx, args, stream| match idx {
        0 => {
            assert_eq!(text(&args), ["PING"]);
            write_error(stream, "LOADING dataset in memory");
        }
        1 => {
            assert_eq!(text(&args), ["DEBUG", "sleep", "0"]);
            write_simple(stream, "OK");
        }
        _ => write_integer(stream, 1),
    });

    let mut client = client_with_addr(addr);
    assert!(!client.ping().expect("ping"));
    assert!(client.perform_command(&["DEBUG", "sleep", "0"]).expect("debug"));
    assert!(matches!(client.ping(), Err(ClientError::UnexpectedResponse(_))));
    // A shape mismatch is not a transport fault.
    assert!(client.is_healthy());
}

#[test]
fn state_changing_commands_raise_server_errors() {
    let addr = spawn_server(2, |idx, args, stream| {
        if idx == 0 {
            assert_eq!(text(&args), ["CONFIG", "set", "maxmemory", "lots"]);
            write_error(stream, "ERR Invalid argument");
        } else {
            assert_eq!(text(&args), ["SLAVEOF", "NO", "ONE"]);
            write_simple(stream, "OK");
        }
    });

    let mut client = client_with_addr(addr);
    let err = client.config_set("maxmemory", "lots").unwrap_err();
    assert!(matches!(err, ClientError::Server { .. }));
    assert!(err.is_protocol());
    client.slave_of_no_one().expect("slaveof");
}

#[test]
fn info_and_client_list_are_parsed() {
    let addr = spawn_server(2, |idx, args, stream| {
        if idx == 0 {
            assert_eq!(text(&args), ["INFO", "replication"]);
            write_bulk(stream, b"# Replication\r\nrole:master\r\nconnected_slaves:1\r\n\r\n");
        } else {
            assert_eq!(text(&args), ["CLIENT", "list"]);
            write_bulk(
                stream,
                b"id=1 addr=127.0.0.1:6380 name=foo flags=N numops=42\nid=2 addr=10.0.0.9:5000 name= flags=S numops=x\n",
            );
        }
    });

    let mut client = client_with_addr(addr);
    let info = client.info_section(InfoSection::Replication).expect("info").expect("body");
    assert_eq!(info.get("role").map(String::as_str), Some("master"));
    assert_eq!(info.len(), 2);

    let clients = client.client_list().expect("client list");
    assert_eq!(clients.len(), 2);
    assert_eq!(clients[0].endpoint, Some("127.0.0.1:6380".parse().unwrap()));
    assert_eq!(clients[0].num_ops, 42);
    assert_eq!(clients[1].flags.as_deref(), Some("S"));
    assert_eq!(clients[1].num_ops, 0);
}

#[test]
fn promotion_handshake_phases() {
    let addr = spawn_server(3, |idx, args, stream| match idx {
        0 => {
            assert_eq!(text(&args), ["SLAVEOF", "PREPARE", "START"]);
            write_integer(stream, 12);
        }
        1 => write_error(stream, "ERR already preparing"),
        _ => {
            assert_eq!(text(&args), ["SLAVEOF", "PREPARE", "ABORT"]);
            write_simple(stream, "OK");
        }
    });

    let mut client = client_with_addr(addr);
    assert_eq!(client.prepare_promotion().expect("prepare"), Some(12));
    assert_eq!(client.prepare_promotion().expect("prepare"), None);
    assert!(client.abort_promotion().expect("abort"));
}

#[test]
fn cluster_slot_commands() {
    let addr = spawn_server(4, |idx, args, stream| match idx {
        0 => {
            assert_eq!(text(&args), ["CLUSTER", "COUNTKEYSINSLOT", "42"]);
            write_integer(stream, 3);
        }
        1 => {
            assert_eq!(text(&args), ["CLUSTER", "GETKEYSINSLOT", "42", "10"]);
            write_raw(stream, b"*2\r\n$2\r\nk1\r\n$2\r\nk2\r\n");
        }
        2 => {
            assert_eq!(text(&args), ["CLUSTER", "SETSLOT", "42", "NODE", "abc"]);
            write_simple(stream, "OK");
        }
        _ => {
            assert_eq!(
                text(&args),
                ["MIGRATE", "10.0.0.2", "7001", "", "0", "5000", "COPY", "KEYS", "k1", "k2"]
            );
            write_simple(stream, "OK");
        }
    });

    let mut client = client_with_addr(addr);
    assert_eq!(client.cluster_count_keys_in_slot(42).expect("count"), 3);
    assert_eq!(
        client.cluster_get_keys_in_slot(42, 10).expect("keys"),
        vec![b"k1".to_vec(), b"k2".to_vec()]
    );
    client
        .cluster_set_slot(42, &SlotAction::Node("abc".into()))
        .expect("setslot");
    client
        .migrate(
            "10.0.0.2",
            7001,
            Duration::from_secs(5),
            Some(MigrateMode::Copy),
            &[b"k1".as_slice(), b"k2".as_slice()],
        )
        .expect("migrate");
}

#[test]
fn get_and_forget_checks_the_reply() {
    let addr = spawn_server(2, |idx, _, stream| {
        if idx == 0 {
            write_bulk(stream, b"payload");
        } else {
            write_error(stream, "WRONGTYPE Operation against a key holding the wrong kind of value");
        }
    });

    let mut client = client_with_addr(addr);
    assert!(client.get_and_forget(b"key").expect("get"));
    assert!(!client.get_and_forget(b"key").expect("get"));
}

#[test]
fn truncated_bulk_reply_marks_client_unhealthy() {
    let addr = spawn_server(1, |_, _, stream| {
        write_raw(stream, b"$10\r\nabc");
        let _ = stream.shutdown(std::net::Shutdown::Both);
    });

    let mut client = client_with_addr(addr);
    let err = client.get(b"key").unwrap_err();
    assert!(matches!(err, ClientError::Closed), "got {err:?}");
    assert!(err.is_connection_broken());
    assert!(!client.is_healthy());
}

#[test]
fn shutdown_handle_interrupts_blocked_read() {
    let addr = spawn_server(1, |_, _, _| thread::sleep(Duration::from_secs(3)));

    let mut config = config_for(addr);
    config.read_timeout_ms = 0;
    let mut client = AdminClient::connect(&config).expect("client");
    let handle = client.shutdown_handle();
    let aborter = thread::spawn(move || {
        thread::sleep(Duration::from_millis(100));
        handle.shutdown();
    });

    let err = client.ping().unwrap_err();
    assert!(err.is_connection_broken(), "got {err:?}");
    aborter.join().unwrap();
}

#[test]
fn pool_reuses_connection_and_refuses_after_close() {
    let addr = spawn_server(2, |_, args, stream| {
        assert_eq!(text(&args), ["PING"]);
        write_simple(stream, "PONG");
    });

    let pool = ConnectionPool::new(config_for(addr));
    {
        let mut conn = pool.acquire().expect("acquire");
        assert!(conn.ping().expect("ping"));
        assert!(matches!(pool.acquire(), Err(ClientError::PoolExhausted)));
    }
    assert_eq!(pool.idle_count(), 1);
    {
        let mut conn = pool.acquire().expect("acquire");
        assert!(conn.ping().expect("ping"));
        assert_eq!(conn.requests_sent(), 2);
    }

    pool.close();
    assert_eq!(pool.total_count(), 0);
    assert!(matches!(pool.acquire(), Err(ClientError::Disposed)));
}

#[test]
fn managed_pool_serves_connections() {
    let addr = spawn_server(1, |_, _, stream| write_simple(stream, "PONG"));

    let manager = ConnectionPool::managed(config_for(addr));
    let pool = manager.connection().expect("pool");
    let mut conn = pool.acquire().expect("acquire");
    assert!(conn.ping().expect("ping"));
    assert_eq!(manager.reconnects(), 0);
}

#[test]
fn silent_tls_peer_fails_within_connect_timeout() {
    let listener = TcpListener::bind("127.0.0.1:0").expect("bind");
    let addr = listener.local_addr().expect("addr");
    thread::spawn(move || {
        // Accept both connections and never answer the client hello.
        let held: Vec<TcpStream> = listener.incoming().take(2).filter_map(Result::ok).collect();
        thread::sleep(Duration::from_secs(5));
        drop(held);
    });

    let mut config = config_for(addr);
    config.connect_timeout_ms = 300;
    config.read_timeout_ms = 0;
    config.write_timeout_ms = 0;
    config.tls.enabled = true;
    config.tls.trust_all_certificates = true;

    let started = Instant::now();
    let err = AdminClient::connect(&config).err().expect("handshake must fail");
    assert!(matches!(err, ClientError::Timeout), "got {err:?}");
    assert!(started.elapsed() < Duration::from_secs(2));

    let pool = ConnectionPool::new(config);
    let started = Instant::now();
    assert!(matches!(pool.acquire(), Err(ClientError::Timeout)));
    assert!(started.elapsed() < Duration::from_secs(2));
    assert_eq!(pool.total_count(), 0);
}
