//! High-level connection management and handshake.
//!
//! Establishes a transport (TCP or TLS), performs the RFB version and security
//! handshakes, sends ClientInit, and reads ServerInit. Returns buffered RFB
//! input/output streams ready for normal operation.

use crate::{
    config::{Config, SecurityConfig},
    errors::RfbClientError,
    protocol,
    transport::{self, Transport},
};
use rfb_protocol::handshake::{
    finish_vencrypt, negotiate_security_ext, negotiate_version, NegotiatedVersion,
    SecurityOutcome, SecurityPreferences,
};
use rfb_protocol::io::counting::CountingReader;
use rfb_protocol::io::{RfbInStream, RfbOutStream};
use rfb_protocol::messages::ServerInit;
use tokio::io::{ReadHalf, WriteHalf};

/// Connected RFB session components.
#[derive(Debug)]
pub struct Connection {
    /// Buffered input stream for reading RFB data, wrapped in a byte counter
    /// so the bandwidth governor can measure throughput without touching the
    /// framing code.
    pub input: RfbInStream<CountingReader<ReadHalf<Transport>>>,
    /// Buffered output stream for writing RFB data.
    pub output: RfbOutStream<WriteHalf<Transport>>,
    /// Negotiated protocol version.
    pub version: NegotiatedVersion,
    /// Security type that was actually used (None or VNC Auth, possibly
    /// wrapped in Tight capability negotiation or a VeNCrypt TLS upgrade).
    pub security: SecurityOutcome,
    /// Initial server parameters (framebuffer size, pixel format, name).
    pub server_init: ServerInit,
}

impl Connection {
    /// Returns the negotiated framebuffer width and height.
    #[must_use]
    pub fn size(&self) -> (u16, u16) {
        (
            self.server_init.framebuffer_width,
            self.server_init.framebuffer_height,
        )
    }
}

/// Establish a new RFB connection using the given configuration.
///
/// Steps:
/// 1) Create transport (TCP, or TLS when the server speaks RFB-over-TLS directly)
/// 2) Split into read/write halves and wrap with RfbInStream/RfbOutStream
/// 3) Negotiate version (send client version)
/// 4) Negotiate security; if the server requires VeNCrypt and the chosen
///    subtype needs TLS, upgrade the transport in place and finish the
///    security handshake over the new TLS streams
/// 5) Send ClientInit (shared session)
/// 6) Read ServerInit (framebuffer params)
pub async fn establish(config: &Config) -> Result<Connection, RfbClientError> {
    // 1) Transport
    let host = &config.connection.host;
    let port = config.connection.port;

    let transport = if use_tls(&config.security) {
        let tls_cfg = to_transport_tls_config(&config.security);
        Transport::connect_tls(host, port, tls_cfg).await?
    } else {
        Transport::connect_tcp(host, port).await?
    };

    // 2) Streams
    let (read, write) = transport.split();
    let mut input = RfbInStream::new(CountingReader::new(read));
    let mut output = RfbOutStream::new(write);

    // 3) Version negotiation
    let version = negotiate_version(&mut input, &mut output)
        .await
        .map_err(RfbClientError::from)?;

    // 4) Security negotiation
    //
    // Routing through `RfbClientError::from` instead of stringifying the
    // `io::Error` here matters: a rejected VNC-Auth response surfaces as
    // `ErrorKind::PermissionDenied` and must become `AuthFailure`, not a
    // `TransportError` the orchestrator would retry with the same password.
    let prefs = to_security_preferences(config);
    let security = match negotiate_security_ext(&mut input, &mut output, version, &prefs)
        .await
        .map_err(RfbClientError::from)?
    {
        Ok(outcome) => outcome,
        Err(subtype) => {
            if !subtype.needs_tls() {
                return Err(RfbClientError::Unsupported(
                    "server selected a VeNCrypt subtype that needs TLS support we don't have".into(),
                ));
            }
            let read = input.into_inner().into_inner();
            let write = output.into_inner();
            let tls_cfg = to_transport_tls_config(&config.security);
            let (read, write) = Transport::upgrade(read, write, &tls_cfg, host).await?;
            input = RfbInStream::new(CountingReader::new(read));
            output = RfbOutStream::new(write);

            finish_vencrypt(&mut input, &mut output, subtype, &prefs)
                .await
                .map_err(RfbClientError::from)?
        }
    };

    // 5) ClientInit (shared = true)
    protocol::write_client_init(&mut output, true).await?;

    // 6) ServerInit
    let server_init = ServerInit::read_from(&mut input)
        .await
        .map_err(RfbClientError::from)?;

    Ok(Connection {
        input,
        output,
        version,
        security,
        server_init,
    })
}

fn use_tls(security: &SecurityConfig) -> bool {
    match &security.tls {
        Some(t) => t.enabled,
        None => false,
    }
}

fn to_security_preferences(config: &Config) -> SecurityPreferences {
    match &config.connection.password {
        Some(password) => SecurityPreferences::with_password(password.clone()),
        None => SecurityPreferences::none_only(),
    }
}

fn to_transport_tls_config(security: &SecurityConfig) -> transport::TlsConfig {
    let mut cfg = transport::TlsConfig::new();
    if let Some(tls) = &security.tls {
        if tls.danger_accept_invalid_certs {
            cfg = cfg.disable_verification();
        }
        if let Some(ca_file) = &tls.ca_file {
            cfg = cfg.with_ca_file(ca_file.clone());
        }
    }
    cfg
}

#[cfg(test)]
mod tests {
    use super::*;
    use rfb_protocol::io::{RfbInStream, RfbOutStream};
    use rfb_protocol::messages::types::SECURITY_TYPE_VNC_AUTH;
    use tokio::net::TcpListener;

    /// S7 - a real VNC-Auth rejection, driven all the way through
    /// `establish()` over an actual socket, must surface as
    /// `RfbClientError::AuthFailure`. `rfb-protocol`'s own handshake tests
    /// only check the raw `io::Error` one layer down; this exercises the
    /// `rfb-client` crate boundary where that error gets folded into
    /// `RfbClientError`.
    #[tokio::test]
    async fn establish_maps_vnc_auth_rejection_to_auth_failure() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        tokio::spawn(async move {
            let (socket, _) = listener.accept().await.unwrap();
            let (read, write) = socket.into_split();
            let mut instream = RfbInStream::new(read);
            let mut outstream = RfbOutStream::new(write);

            outstream.write_bytes(b"RFB 003.008\n");
            outstream.flush().await.unwrap();
            let mut client_version = [0u8; 12];
            instream.read_bytes(&mut client_version).await.unwrap();

            outstream.write_u8(1);
            outstream.write_u8(SECURITY_TYPE_VNC_AUTH);
            outstream.flush().await.unwrap();

            let _ = instream.read_u8().await.unwrap();
            outstream.write_bytes(&[0u8; 16]);
            outstream.flush().await.unwrap();

            let mut response = [0u8; 16];
            instream.read_bytes(&mut response).await.unwrap();

            outstream.write_u32(1);
            let reason = b"Authentication failed";
            outstream.write_u32(reason.len() as u32);
            outstream.write_bytes(reason);
            outstream.flush().await.unwrap();
        });

        let config = Config::builder()
            .host(&addr.ip().to_string())
            .port(addr.port())
            .password("wrong")
            .build()
            .unwrap();

        let err = establish(&config).await.unwrap_err();
        assert!(
            matches!(err, RfbClientError::AuthFailure(_)),
            "expected AuthFailure, got: {err:?}"
        );
        assert!(!err.is_retryable());
    }
}
