//! # Suspending Transport
//!
//! Purpose: Tokio counterpart of `Transport`. Every read and write yields to
//! the runtime instead of blocking the thread; calls on one instance stay
//! strictly sequential because they all take `&mut self`.
//!
//! Read and write deadlines are applied per call with `tokio::time::timeout`.
//! Bulk payloads are read by exact length into a fresh buffer, so reply size
//! is independent of `read_buffer_size`.

use std::future::Future;
use std::io;
use std::pin::Pin;
use std::task::{Context, Poll};
use std::time::Duration;

use bytes::BytesMut;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, BufReader, ReadBuf};
use tokio::net::TcpStream;
use tokio_rustls::client::TlsStream;
use tokio_rustls::TlsConnector;
use tracing::{debug, info};

use crate::config::ClientConfig;
use crate::error::{ClientError, ClientResult};
use crate::resp::{self, encode_request, latin1_decode, Reply, Request};
use crate::tls;

/// Plain or TLS-wrapped tokio stream.
pub enum AsyncStream {
    Plain(TcpStream),
    Tls(Box<TlsStream<TcpStream>>),
}

impl AsyncRead for AsyncStream {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        match self.get_mut() {
            AsyncStream::Plain(stream) => Pin::new(stream).poll_read(cx, buf),
            AsyncStream::Tls(stream) => Pin::new(stream.as_mut()).poll_read(cx, buf),
        }
    }
}

impl AsyncWrite for AsyncStream {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        match self.get_mut() {
            AsyncStream::Plain(stream) => Pin::new(stream).poll_write(cx, buf),
            AsyncStream::Tls(stream) => Pin::new(stream.as_mut()).poll_write(cx, buf),
        }
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        match self.get_mut() {
            AsyncStream::Plain(stream) => Pin::new(stream).poll_flush(cx),
            AsyncStream::Tls(stream) => Pin::new(stream.as_mut()).poll_flush(cx),
        }
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        match self.get_mut() {
            AsyncStream::Plain(stream) => Pin::new(stream).poll_shutdown(cx),
            AsyncStream::Tls(stream) => Pin::new(stream.as_mut()).poll_shutdown(cx),
        }
    }
}

/// Suspending connection to one server.
pub struct AsyncTransport {
    reader: BufReader<AsyncStream>,
    line_buf: Vec<u8>,
    write_buf: BytesMut,
    read_timeout: Option<Duration>,
    write_timeout: Option<Duration>,
    peer: String,
    closed: bool,
}

impl AsyncTransport {
    /// Connects, applies deadlines and negotiates TLS when configured.
    pub async fn connect(config: &ClientConfig) -> ClientResult<Self> {
        let target = (config.host.clone(), config.port);
        let socket = with_deadline(config.connect_timeout(), async move {
            Ok(TcpStream::connect(target).await?)
        })
        .await?;
        socket.set_nodelay(true)?;

        let stream = if config.tls.enabled {
            let name = config.tls.server_name.as_deref().unwrap_or(&config.host);
            let connector = TlsConnector::from(tls::client_config(config.tls.trust_policy())?);
            let server_name = tls::server_name(name)?;
            // A failed handshake drops `socket` inside the connector future.
            let tls_stream = with_deadline(config.connect_timeout(), async move {
                connector
                    .connect(server_name, socket)
                    .await
                    .map_err(|err| match ClientError::from(err) {
                        ClientError::Io(inner) => ClientError::Tls(inner.to_string()),
                        other => other,
                    })
            })
            .await?;
            AsyncStream::Tls(Box::new(tls_stream))
        } else {
            AsyncStream::Plain(socket)
        };

        info!(peer = %config.endpoint(), tls = config.tls.enabled, "connected (async)");
        Ok(AsyncTransport {
            reader: BufReader::with_capacity(config.read_buffer_size.max(64), stream),
            line_buf: Vec::with_capacity(128),
            write_buf: BytesMut::with_capacity(256),
            read_timeout: config.read_timeout(),
            write_timeout: config.write_timeout(),
            peer: config.endpoint(),
            closed: false,
        })
    }

    pub fn peer(&self) -> &str {
        &self.peer
    }

    /// Writes all bytes and flushes them to the socket.
    pub async fn write_and_flush(&mut self, bytes: &[u8]) -> ClientResult<()> {
        self.ensure_open()?;
        let stream = self.reader.get_mut();
        with_deadline(self.write_timeout, async move {
            stream.write_all(bytes).await?;
            stream.flush().await?;
            Ok(())
        })
        .await
    }

    /// Reads one CRLF-terminated line as Latin-1 text.
    pub async fn read_line(&mut self) -> ClientResult<String> {
        self.ensure_open()?;
        let (reader, line) = (&mut self.reader, &mut self.line_buf);
        with_deadline(self.read_timeout, resp::read_line_async(reader, line)).await?;
        Ok(latin1_decode(&self.line_buf))
    }

    /// Reads exactly `len` bytes.
    pub async fn read_exactly(&mut self, len: usize) -> ClientResult<Vec<u8>> {
        self.ensure_open()?;
        let reader = &mut self.reader;
        with_deadline(self.read_timeout, async move {
            let mut data = vec![0u8; len];
            reader.read_exact(&mut data).await?;
            Ok(data)
        })
        .await
    }

    /// Encodes and flushes one request.
    pub async fn send(&mut self, request: &Request) -> ClientResult<()> {
        self.ensure_open()?;
        self.write_buf.clear();
        encode_request(request, &mut self.write_buf);

        let (stream, bytes) = (self.reader.get_mut(), &self.write_buf);
        with_deadline(self.write_timeout, async move {
            stream.write_all(bytes).await?;
            stream.flush().await?;
            Ok(())
        })
        .await
    }

    /// Decodes one complete reply.
    pub async fn receive(&mut self) -> ClientResult<Reply> {
        self.ensure_open()?;
        let (reader, line) = (&mut self.reader, &mut self.line_buf);
        with_deadline(self.read_timeout, resp::read_reply_async(reader, line)).await
    }

    /// Shuts the stream down. Idempotent and infallible.
    pub async fn close(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;
        let _ = self.reader.get_mut().shutdown().await;
        debug!(peer = %self.peer, "async transport closed");
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

async fn with_deadline<T, F>(limit: Option<Duration>, fut: F) -> ClientResult<T>
where
    F: Future<Output = ClientResult<T>>,
{
    match limit {
        Some(limit) => tokio::time::timeout(limit, fut).await?,
        None => fut.await,
    }
}
