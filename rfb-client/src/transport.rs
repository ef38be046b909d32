//! Transport layer (TCP and TLS) for VNC connections.
//!
//! [`Transport`] is the single stream type the connection handshake reads and
//! writes through. It starts as a plain TCP socket and can be upgraded to TLS
//! in place, either eagerly (a server that only speaks RFB-over-TLS) or
//! mid-handshake once VeNCrypt tells us a subtype requires it. Implementing
//! [`AsyncRead`]/[`AsyncWrite`] directly on the enum (instead of boxing) keeps
//! the halves returned by [`Transport::split`] a single concrete type across
//! the upgrade, so callers never need `dyn` objects.

use std::io;
use std::path::PathBuf;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use rustls_pki_types::ServerName;
use tokio::io::{AsyncRead, AsyncWrite, ReadBuf, ReadHalf, WriteHalf};
use tokio::net::TcpStream;
use tokio_rustls::client::TlsStream;
use tokio_rustls::TlsConnector;

use crate::errors::RfbClientError;

/// TCP or TLS-wrapped TCP, selected dynamically at connect time or mid-handshake.
pub enum Transport {
    /// A plain, unencrypted TCP connection.
    Tcp(TcpStream),
    /// A TLS-wrapped TCP connection.
    Tls(Box<TlsStream<TcpStream>>),
}

impl std::fmt::Debug for Transport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Transport::Tcp(_) => f.write_str("Transport::Tcp(..)"),
            Transport::Tls(_) => f.write_str("Transport::Tls(..)"),
        }
    }
}

impl Transport {
    /// Connects a plain TCP socket.
    pub async fn connect_tcp(host: &str, port: u16) -> Result<Self, RfbClientError> {
        let stream = TcpStream::connect((host, port))
            .await
            .map_err(|e| RfbClientError::TransportError(format!("{host}:{port}: {e}")))?;
        stream.set_nodelay(true).map_err(RfbClientError::from)?;
        Ok(Transport::Tcp(stream))
    }

    /// Connects TCP and immediately performs a TLS handshake, for servers that
    /// speak RFB directly over TLS rather than negotiating it via VeNCrypt.
    pub async fn connect_tls(host: &str, port: u16, tls: TlsConfig) -> Result<Self, RfbClientError> {
        let transport = Self::connect_tcp(host, port).await?;
        transport.into_tls(&tls, host).await
    }

    /// Splits into independent read/write halves backed by the same transport.
    pub fn split(self) -> (ReadHalf<Transport>, WriteHalf<Transport>) {
        tokio::io::split(self)
    }

    /// Recombines a previously split transport and upgrades it to TLS,
    /// returning freshly split halves over the new TLS stream.
    ///
    /// Used for VeNCrypt subtypes that negotiate TLS mid-handshake: the
    /// caller has already exchanged the version and security-subtype bytes
    /// in plaintext and now hands the live socket back for the TLS handshake.
    pub async fn upgrade(
        read: ReadHalf<Transport>,
        write: WriteHalf<Transport>,
        tls: &TlsConfig,
        server_name: &str,
    ) -> Result<(ReadHalf<Transport>, WriteHalf<Transport>), RfbClientError> {
        let transport = read.unsplit(write);
        let upgraded = transport.into_tls(tls, server_name).await?;
        Ok(tokio::io::split(upgraded))
    }

    async fn into_tls(self, tls: &TlsConfig, server_name: &str) -> Result<Transport, RfbClientError> {
        let tcp = match self {
            Transport::Tcp(tcp) => tcp,
            Transport::Tls(_) => {
                return Err(RfbClientError::TransportError(
                    "transport is already TLS-wrapped".into(),
                ))
            }
        };
        let connector = TlsConnector::from(Arc::new(tls.client_config()?));
        let name = ServerName::try_from(server_name.to_owned())
            .map_err(|e| RfbClientError::TransportError(format!("invalid server name {server_name:?}: {e}")))?;
        let stream = connector
            .connect(name, tcp)
            .await
            .map_err(|e| RfbClientError::TransportError(e.to_string()))?;
        Ok(Transport::Tls(Box::new(stream)))
    }
}

impl AsyncRead for Transport {
    fn poll_read(self: Pin<&mut Self>, cx: &mut Context<'_>, buf: &mut ReadBuf<'_>) -> Poll<io::Result<()>> {
        match self.get_mut() {
            Transport::Tcp(s) => Pin::new(s).poll_read(cx, buf),
            Transport::Tls(s) => Pin::new(s.as_mut()).poll_read(cx, buf),
        }
    }
}

impl AsyncWrite for Transport {
    fn poll_write(self: Pin<&mut Self>, cx: &mut Context<'_>, buf: &[u8]) -> Poll<io::Result<usize>> {
        match self.get_mut() {
            Transport::Tcp(s) => Pin::new(s).poll_write(cx, buf),
            Transport::Tls(s) => Pin::new(s.as_mut()).poll_write(cx, buf),
        }
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        match self.get_mut() {
            Transport::Tcp(s) => Pin::new(s).poll_flush(cx),
            Transport::Tls(s) => Pin::new(s.as_mut()).poll_flush(cx),
        }
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        match self.get_mut() {
            Transport::Tcp(s) => Pin::new(s).poll_shutdown(cx),
            Transport::Tls(s) => Pin::new(s.as_mut()).poll_shutdown(cx),
        }
    }
}

/// Builder for the TLS parameters used by both eager (`connect_tls`) and
/// mid-handshake (VeNCrypt) TLS upgrades.
#[derive(Debug, Clone, Default)]
pub struct TlsConfig {
    verify: bool,
    ca_file: Option<PathBuf>,
}

impl TlsConfig {
    /// Creates a default config: verification enabled, no custom CA file.
    #[must_use]
    pub fn new() -> Self {
        Self {
            verify: true,
            ca_file: None,
        }
    }

    /// Skips server certificate verification entirely. Only for testing
    /// against self-signed servers; never enable this against a real network.
    #[must_use]
    pub fn disable_verification(mut self) -> Self {
        self.verify = false;
        self
    }

    /// Trusts a specific CA bundle instead of the platform's native roots.
    #[must_use]
    pub fn with_ca_file(mut self, path: PathBuf) -> Self {
        self.ca_file = Some(path);
        self
    }

    fn client_config(&self) -> Result<rustls::ClientConfig, RfbClientError> {
        let builder = rustls::ClientConfig::builder();

        if !self.verify {
            return Ok(builder
                .dangerous()
                .with_custom_certificate_verifier(Arc::new(danger::AcceptAnyServerCert))
                .with_no_client_auth());
        }

        let mut roots = rustls::RootCertStore::empty();
        if let Some(path) = &self.ca_file {
            let pem = std::fs::read(path).map_err(RfbClientError::from)?;
            for cert in rustls_pemfile::certs(&mut pem.as_slice()) {
                let cert = cert
                    .map_err(|e| RfbClientError::TransportError(format!("invalid CA certificate: {e}")))?;
                roots.add(cert).map_err(|e| {
                    RfbClientError::TransportError(format!("invalid CA certificate: {e}"))
                })?;
            }
        } else {
            let native = rustls_native_certs::load_native_certs();
            for error in &native.errors {
                tracing::warn!(%error, "skipping unreadable native root certificate");
            }
            for cert in native.certs {
                roots.add(cert).map_err(|e| {
                    RfbClientError::TransportError(format!("invalid native root certificate: {e}"))
                })?;
            }
        }

        Ok(builder.with_root_certificates(roots).with_no_client_auth())
    }
}

/// A [`rustls::client::danger::ServerCertVerifier`] that accepts any
/// certificate, for [`TlsConfig::disable_verification`].
mod danger {
    use rustls::client::danger::{HandshakeSignatureValid, ServerCertVerified, ServerCertVerifier};
    use rustls::{DigitallySignedStruct, SignatureScheme};
    use rustls_pki_types::{CertificateDer, ServerName, UnixTime};

    #[derive(Debug)]
    pub struct AcceptAnyServerCert;

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
            _message: &[u8],
            _cert: &CertificateDer<'_>,
            _dss: &DigitallySignedStruct,
        ) -> Result<HandshakeSignatureValid, rustls::Error> {
            Ok(HandshakeSignatureValid::assertion())
        }

        fn verify_tls13_signature(
            &self,
            _message: &[u8],
            _cert: &CertificateDer<'_>,
            _dss: &DigitallySignedStruct,
        ) -> Result<HandshakeSignatureValid, rustls::Error> {
            Ok(HandshakeSignatureValid::assertion())
        }

        fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
            rustls::crypto::ring::default_provider()
                .signature_verification_algorithms
                .supported_schemes()
        }
    }
}
