//! # Blocking Transport
//!
//! Purpose: Own one TCP (optionally TLS) stream and provide the line,
//! exact-length and write-and-flush primitives the codec runs on.
//!
//! ## Design Principles
//! 1. **Buffer Reuse**: The reader, line buffer and write buffer live on the
//!    transport and are reused for every request.
//! 2. **Scoped Teardown**: `close` (also run on drop) releases the stream and
//!    its wrappers together and never fails.
//! 3. **Interruptible**: A `ShutdownHandle` can shut the socket down from
//!    another thread, waking a blocked read.

use std::io::{BufReader, Read, Write};
use std::net::{Shutdown, SocketAddr, TcpStream, ToSocketAddrs};
use std::sync::Arc;

use tracing::{debug, info};

use crate::config::ClientConfig;
use crate::error::{ClientError, ClientResult};
use crate::resp::{self, encode_request, latin1_decode, Reply, Request};
use crate::tls::{self, BlockingTlsStream};

/// Plain or TLS-wrapped byte stream.
pub enum Stream {
    Plain(TcpStream),
    Tls(Box<BlockingTlsStream>),
}

impl Read for Stream {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        match self {
            Stream::Plain(stream) => stream.read(buf),
            Stream::Tls(stream) => stream.read(buf),
        }
    }
}

impl Write for Stream {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        match self {
            Stream::Plain(stream) => stream.write(buf),
            Stream::Tls(stream) => stream.write(buf),
        }
    }

    fn flush(&mut self) -> std::io::Result<()> {
        match self {
            Stream::Plain(stream) => stream.flush(),
            Stream::Tls(stream) => stream.flush(),
        }
    }
}

/// Cloneable handle that aborts the transport's socket from any thread.
#[derive(Clone)]
pub struct ShutdownHandle {
    socket: Arc<TcpStream>,
}

impl ShutdownHandle {
    /// Shuts both directions down; in-progress reads return immediately.
    pub fn shutdown(&self) {
        let _ = self.socket.shutdown(Shutdown::Both);
    }
}

/// Blocking connection to one server.
pub struct Transport {
    // Buffered reader reduces syscalls while still allowing direct writes.
    reader: BufReader<Stream>,
    line_buf: Vec<u8>,
    write_buf: Vec<u8>,
    shutdown: ShutdownHandle,
    peer: String,
    closed: bool,
}

impl Transport {
    /// Connects, applies deadlines and negotiates TLS when configured.
    pub fn connect(config: &ClientConfig) -> ClientResult<Self> {
        let socket = connect_socket(config)?;
        // Disable Nagle to keep request latency low for small payloads.
        socket.set_nodelay(true)?;

        let shutdown = ShutdownHandle {
            socket: Arc::new(socket.try_clone()?),
        };

        let stream = if config.tls.enabled {
            // The handshake is part of connecting and shares its deadline.
            socket.set_read_timeout(config.connect_timeout())?;
            socket.set_write_timeout(config.connect_timeout())?;
            let name = config.tls.server_name.as_deref().unwrap_or(&config.host);
            let tls_config = tls::client_config(config.tls.trust_policy())?;
            let tls_stream = tls::handshake(tls_config, tls::server_name(name)?, socket)?;
            Stream::Tls(Box::new(tls_stream))
        } else {
            Stream::Plain(socket)
        };
        // The clone shares the descriptor, so this reaches the wrapped socket.
        shutdown.socket.set_read_timeout(config.read_timeout())?;
        shutdown.socket.set_write_timeout(config.write_timeout())?;

        info!(peer = %config.endpoint(), tls = config.tls.enabled, "connected");
        Ok(Transport {
            reader: BufReader::with_capacity(config.read_buffer_size.max(64), stream),
            line_buf: Vec::with_capacity(128),
            write_buf: Vec::with_capacity(256),
            shutdown,
            peer: config.endpoint(),
            closed: false,
        })
    }

    /// `host:port` of the server.
    pub fn peer(&self) -> &str {
        &self.peer
    }

    /// Handle for interrupting this transport from another thread.
    pub fn shutdown_handle(&self) -> ShutdownHandle {
        self.shutdown.clone()
    }

    /// Writes all bytes and flushes them to the socket.
    pub fn write_and_flush(&mut self, bytes: &[u8]) -> ClientResult<()> {
        self.ensure_open()?;
        let stream = self.reader.get_mut();
        stream.write_all(bytes)?;
        stream.flush()?;
        Ok(())
    }

    /// Reads one CRLF-terminated line as Latin-1 text.
    pub fn read_line(&mut self) -> ClientResult<String> {
        self.ensure_open()?;
        resp::read_line(&mut self.reader, &mut self.line_buf)?;
        Ok(latin1_decode(&self.line_buf))
    }

    /// Reads exactly `len` bytes, retrying short reads until satisfied.
    pub fn read_exactly(&mut self, len: usize) -> ClientResult<Vec<u8>> {
        self.ensure_open()?;
        let mut data = vec![0u8; len];
        self.reader.read_exact(&mut data)?;
        Ok(data)
    }

    /// Encodes and flushes one request.
    pub fn send(&mut self, request: &Request) -> ClientResult<()> {
        self.ensure_open()?;
        self.write_buf.clear();
        encode_request(request, &mut self.write_buf);

        let stream = self.reader.get_mut();
        stream.write_all(&self.write_buf)?;
        stream.flush()?;
        Ok(())
    }

    /// Decodes one complete reply.
    pub fn receive(&mut self) -> ClientResult<Reply> {
        self.ensure_open()?;
        resp::read_reply(&mut self.reader, &mut self.line_buf)
    }

    /// Releases the stream. Idempotent and infallible.
    pub fn close(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;
        if let Stream::Tls(stream) = self.reader.get_mut() {
            tls::close_notify(stream);
        }
        self.shutdown.shutdown();
        debug!(peer = %self.peer, "transport closed");
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }

    fn ensure_open(&self) -> ClientResult<()> {
        if self.closed {
            return Err(ClientError::Disposed);
        }
        Ok(())
    }
}

impl Drop for Transport {
    fn drop(&mut self) {
        self.close();
    }
}

fn connect_socket(config: &ClientConfig) -> ClientResult<TcpStream> {
    let addrs: Vec<SocketAddr> = (config.host.as_str(), config.port)
        .to_socket_addrs()
        .map_err(|_| ClientError::InvalidAddress(config.endpoint()))?
        .collect();
    if addrs.is_empty() {
        return Err(ClientError::InvalidAddress(config.endpoint()));
    }

    let mut last_err = None;
    for addr in addrs {
        let attempt = match config.connect_timeout() {
            Some(timeout) => TcpStream::connect_timeout(&addr, timeout),
            None => TcpStream::connect(addr),
        };
        match attempt {
            Ok(stream) => return Ok(stream),
            Err(err) => {
                debug!(%addr, error = %err, "connect attempt failed");
                last_err = Some(err);
            }
        }
    }
    Err(last_err
        .map(ClientError::from)
        .unwrap_or_else(|| ClientError::InvalidAddress(config.endpoint())))
}
