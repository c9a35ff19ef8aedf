use std::io::{Read, Write};
use std::net::SocketAddr;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use rops_client::{AdminClient, AsyncAdminClient, ClientConfig, ClientError};
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpListener;
use tokio_rustls::rustls::pki_types::{CertificateDer, PrivateKeyDer, PrivatePkcs8KeyDer};
use tokio_rustls::rustls::{self, ServerConfig};
use tokio_rustls::TlsAcceptor;

/// Self-signed certificate for `localhost`, fresh for each server.
fn server_config() -> Arc<ServerConfig> {
    let rcgen::CertifiedKey { cert, key_pair } =
        rcgen::generate_simple_self_signed(vec!["localhost".to_string()]).expect("cert");
    let cert: CertificateDer<'static> = cert.der().clone();
    let key = PrivateKeyDer::Pkcs8(PrivatePkcs8KeyDer::from(key_pair.serialize_der()));

    let provider = Arc::new(rustls::crypto::ring::default_provider());
    let config = ServerConfig::builder_with_provider(provider)
        .with_safe_default_protocol_versions()
        .expect("versions")
        .with_no_client_auth()
        .with_single_cert(vec![cert], key)
        .expect("server config");
    Arc::new(config)
}

/// TLS server answering PING on each of `connections` accepted sockets.
async fn spawn_tls_server(connections: usize) -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
    let addr = listener.local_addr().expect("addr");
    let acceptor = TlsAcceptor::from(server_config());

    tokio::spawn(async move {
        for _ in 0..connections {
            let Ok((stream, _)) = listener.accept().await else {
                return;
            };
            let acceptor = acceptor.clone();
            tokio::spawn(async move {
                // Rejected handshakes simply end the connection.
                let Ok(tls) = acceptor.accept(stream).await else {
                    return;
                };
                let mut reader = BufReader::new(tls);
                while let Some(args) = read_command(&mut reader).await {
                    let reply: &[u8] = match args.first().map(String::as_str) {
                        Some("PING") => b"+PONG\r\n",
                        _ => b"-ERR unknown command\r\n",
                    };
                    if reader.get_mut().write_all(reply).await.is_err() {
                        return;
                    }
                    let _ = reader.get_mut().flush().await;
                }
            });
        }
    });

    addr
}

async fn read_command<R: AsyncBufRead + Unpin>(reader: &mut R) -> Option<Vec<String>> {
    let header = read_line(reader).await?;
    let count: usize = header.strip_prefix('*')?.parse().ok()?;
    let mut args = Vec::with_capacity(count);
    for _ in 0..count {
        let len: usize = read_line(reader).await?.strip_prefix('$')?.parse().ok()?;
        let mut data = vec![0u8; len + 2];
        reader.read_exact(&mut data).await.ok()?;
        data.truncate(len);
        args.push(String::from_utf8(data).ok()?);
    }
    Some(args)
}

async fn read_line<R: AsyncBufRead + Unpin>(reader: &mut R) -> Option<String> {
    let mut line = String::new();
    if reader.read_line(&mut line).await.ok()? == 0 {
        return None;
    }
    Some(line.trim_end_matches("\r\n").to_string())
}

fn tls_config_for(addr: SocketAddr, trust_all: bool) -> ClientConfig {
    let mut config = ClientConfig::new(addr.ip().to_string(), addr.port());
    config.connect_timeout_ms = 2_000;
    config.read_timeout_ms = 2_000;
    config.write_timeout_ms = 2_000;
    config.tls.enabled = true;
    config.tls.trust_all_certificates = trust_all;
    config.tls.server_name = Some("localhost".to_string());
    config
}

fn blocking_ping(config: ClientConfig) -> Result<bool, ClientError> {
    let mut client = AdminClient::connect(&config)?;
    client.ping()
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn trust_all_accepts_self_signed_certificate() {
    let addr = spawn_tls_server(2).await;

    let mut client = AsyncAdminClient::connect(&tls_config_for(addr, true))
        .await
        .expect("async connect");
    assert!(client.ping().await.expect("async ping"));
    client.close().await;

    let config = tls_config_for(addr, true);
    let pong = tokio::task::spawn_blocking(move || blocking_ping(config))
        .await
        .expect("join");
    assert!(pong.expect("blocking ping"));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn validating_policy_rejects_self_signed_certificate() {
    let addr = spawn_tls_server(2).await;

    let err = AsyncAdminClient::connect(&tls_config_for(addr, false))
        .await
        .err()
        .expect("async handshake must fail");
    assert!(matches!(err, ClientError::Tls(_)), "got {err:?}");
    assert!(err.is_connection_broken());

    let config = tls_config_for(addr, false);
    let err = tokio::task::spawn_blocking(move || blocking_ping(config))
        .await
        .expect("join")
        .expect_err("blocking handshake must fail");
    assert!(matches!(err, ClientError::Tls(_)), "got {err:?}");
}

/// Plain RESP server that answers whatever arrives with an error line.
fn spawn_plaintext_peer(connections: usize) -> SocketAddr {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").expect("bind");
    let addr = listener.local_addr().expect("addr");
    thread::spawn(move || {
        for stream in listener.incoming().take(connections) {
            let Ok(mut stream) = stream else {
                return;
            };
            let mut hello = [0u8; 512];
            let _ = stream.read(&mut hello);
            let _ = stream.write_all(b"-ERR unknown command\r\n");
            let _ = stream.flush();
            thread::sleep(Duration::from_millis(200));
        }
    });
    addr
}

#[test]
fn plaintext_peer_fails_blocking_handshake() {
    let addr = spawn_plaintext_peer(1);
    let started = Instant::now();
    let err = blocking_ping(tls_config_for(addr, true)).expect_err("handshake must fail");
    assert!(
        matches!(err, ClientError::Tls(_) | ClientError::Closed),
        "got {err:?}"
    );
    assert!(started.elapsed() < Duration::from_secs(2));
}

#[tokio::test]
async fn plaintext_peer_fails_async_handshake() {
    let addr = spawn_plaintext_peer(1);
    let started = Instant::now();
    let err = AsyncAdminClient::connect(&tls_config_for(addr, true))
        .await
        .err()
        .expect("handshake must fail");
    assert!(
        matches!(err, ClientError::Tls(_) | ClientError::Closed),
        "got {err:?}"
    );
    assert!(started.elapsed() < Duration::from_secs(2));
}
