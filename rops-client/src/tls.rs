//! # TLS Negotiation
//!
//! Purpose: Build rustls client configurations for the two supported trust
//! policies and run the client handshake for blocking streams.
//!
//! `TrustPolicy::AcceptAny` keeps the lab behavior of accepting any server
//! certificate. Handshake signatures are still checked so the session keys
//! belong to whoever presented the certificate.

use std::io::Write;
use std::net::TcpStream;
use std::sync::Arc;

use rustls::client::danger::{HandshakeSignatureValid, ServerCertVerified, ServerCertVerifier};
use rustls::crypto::{verify_tls12_signature, verify_tls13_signature, CryptoProvider};
use rustls::pki_types::{CertificateDer, ServerName, UnixTime};
use rustls::{ClientConnection, DigitallySignedStruct, RootCertStore, SignatureScheme, StreamOwned};
use tracing::{debug, warn};

use crate::error::{ClientError, ClientResult};

/// How the server certificate is judged.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrustPolicy {
    /// Standard chain + hostname validation against the bundled web PKI roots.
    WebPki,
    /// Accept any certificate.
    AcceptAny,
}

/// Blocking TLS stream over TCP.
pub type BlockingTlsStream = StreamOwned<ClientConnection, TcpStream>;

/// Builds a client configuration for the given policy.
pub fn client_config(policy: TrustPolicy) -> ClientResult<Arc<rustls::ClientConfig>> {
    let provider = Arc::new(rustls::crypto::ring::default_provider());
    let builder = rustls::ClientConfig::builder_with_provider(provider.clone())
        .with_safe_default_protocol_versions()?;

    let config = match policy {
        TrustPolicy::WebPki => {
            let mut roots = RootCertStore::empty();
            roots.extend(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());
            builder.with_root_certificates(roots).with_no_client_auth()
        }
        TrustPolicy::AcceptAny => {
            warn!("tls certificate validation disabled (trust-all policy)");
            builder
                .dangerous()
                .with_custom_certificate_verifier(Arc::new(AcceptAnyServerCert { provider }))
                .with_no_client_auth()
        }
    };
    Ok(Arc::new(config))
}

/// Parses the SNI / verification name.
pub fn server_name(host: &str) -> ClientResult<ServerName<'static>> {
    ServerName::try_from(host.to_string())
        .map_err(|_| ClientError::Tls(format!("invalid server name {host:?}")))
}

/// Runs the client handshake to completion on a connected socket.
///
/// On failure the socket is dropped with the error, so nothing leaks.
pub fn handshake(
    config: Arc<rustls::ClientConfig>,
    name: ServerName<'static>,
    mut socket: TcpStream,
) -> ClientResult<BlockingTlsStream> {
    let mut conn = ClientConnection::new(config, name)?;
    while conn.is_handshaking() {
        conn.complete_io(&mut socket).map_err(handshake_error)?;
    }
    debug!(
        version = ?conn.protocol_version(),
        suite = ?conn.negotiated_cipher_suite().map(|suite| suite.suite()),
        "tls handshake complete"
    );
    Ok(StreamOwned::new(conn, socket))
}

/// Sends close_notify; errors are ignored because the peer may be gone.
pub fn close_notify(stream: &mut BlockingTlsStream) {
    stream.conn.send_close_notify();
    let _ = stream.flush();
}

fn handshake_error(err: std::io::Error) -> ClientError {
    match ClientError::from(err) {
        ClientError::Io(inner) => ClientError::Tls(inner.to_string()),
        other => other,
    }
}

#[derive(Debug)]
struct AcceptAnyServerCert {
    provider: Arc<CryptoProvider>,
}

impl ServerCertVerifier for AcceptAnyServerCert {
    fn verify_server_cert(
        &self,
        _end_entity: &CertificateDer<'_>,
        _intermediates: &[CertificateDer<'_>],
        _server_name: &ServerName<'_>,
        _ocsp_response: &[u8],
        _now: UnixTime,
    ) -> Result<ServerCertVerified, rustls::Error> {
        Ok(ServerCertVerified::assertion())
    }

    fn verify_tls12_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        verify_tls12_signature(message, cert, dss, &self.provider.signature_verification_algorithms)
    }

    fn verify_tls13_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        verify_tls13_signature(message, cert, dss, &self.provider.signature_verification_algorithms)
    }

    fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
        self.provider.signature_verification_algorithms.supported_schemes()
    }
}
