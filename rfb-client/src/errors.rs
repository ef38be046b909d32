//! Error types for the RFB client.
//!
//! [`RfbClientError`] is the boundary type every public client operation
//! returns. Decoder and protocol code inside the crate works with
//! `anyhow::Result` and `?` freely; the handful of places where that crosses
//! into `RfbClientError` (the decoder dispatch in `framebuffer.rs`, the
//! `io::Error` conversion below) fold the richer cause into one of these
//! variants instead of a generic string.

use std::io;
use thiserror::Error;

/// Errors that can occur during RFB client operation.
///
/// Every variant ends the current connection; `is_retryable()` tells the
/// orchestrator whether `ReconnectConfig` should be honoured, or whether the
/// cause needs different handling instead (a credential re-prompt, or giving
/// up outright).
#[derive(Debug, Error)]
pub enum RfbClientError {
    /// Malformed message or illegal value, on the wire or in local
    /// configuration. Reconnecting to the same server may just reproduce it.
    #[error("protocol violation: {0}")]
    ProtocolViolation(String),

    /// Socket error, TLS error, or unexpected EOF. Transient by nature, so
    /// `ReconnectConfig` may retry.
    #[error("transport error: {0}")]
    TransportError(String),

    /// Allocation, zlib context, or TLS context creation failed.
    #[error("resource exhausted: {0}")]
    ResourceExhaustion(String),

    /// `SecurityResult` was non-zero or the password was rejected. Carries
    /// the server-supplied reason. Not retried automatically; the
    /// orchestrator may re-prompt for credentials.
    #[error("authentication failed: {0}")]
    AuthFailure(String),

    /// The user closed a credential or certificate prompt. Handled like
    /// [`Self::AuthFailure`] but reconnect is never offered.
    #[error("cancelled by user")]
    UserCancelled,

    /// The server only advertised encodings or security types this client
    /// cannot satisfy, with no fallback available.
    #[error("unsupported: {0}")]
    Unsupported(String),

    /// A decoder failed and no more specific cause was recognised. Carries
    /// the encoding type id for diagnosis.
    #[error("decoding failed for encoding {encoding}: {source}")]
    Encoding {
        /// The RFB encoding type id that failed to decode.
        encoding: i32,
        /// The underlying decode error.
        #[source]
        source: anyhow::Error,
    },
}

impl RfbClientError {
    /// Whether `ReconnectConfig` should be consulted for this cause.
    ///
    /// Only transport and protocol-framing failures are worth retrying
    /// blindly; authentication, user cancellation, unsupported capabilities
    /// and decoder failures need a human, or a changed configuration, before
    /// trying again.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::TransportError(_) | Self::ProtocolViolation(_))
    }

    /// Returns true if this is a fatal error that should not be retried.
    #[must_use]
    pub fn is_fatal(&self) -> bool {
        !self.is_retryable()
    }
}

/// Converts a transport-level `io::Error` into the richer `RfbClientError`.
///
/// This can't be a `#[from]` attribute on a single variant because it needs
/// to inspect `ErrorKind`: a rejected VNC-Auth response surfaces from
/// `rfb-protocol`'s handshake code as `PermissionDenied` and must become
/// `AuthFailure` (fatal, no blind reconnect) rather than `TransportError`
/// (which `is_retryable()` would otherwise loop on with the same password).
impl From<io::Error> for RfbClientError {
    fn from(e: io::Error) -> Self {
        match e.kind() {
            io::ErrorKind::PermissionDenied => RfbClientError::AuthFailure(e.to_string()),
            io::ErrorKind::Unsupported => RfbClientError::Unsupported(e.to_string()),
            io::ErrorKind::InvalidData | io::ErrorKind::ConnectionRefused => {
                RfbClientError::ProtocolViolation(e.to_string())
            }
            _ => RfbClientError::TransportError(e.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_categorization() {
        assert!(RfbClientError::TransportError("eof".into()).is_retryable());
        assert!(RfbClientError::ProtocolViolation("bad rect".into()).is_retryable());

        assert!(RfbClientError::AuthFailure("wrong password".into()).is_fatal());
        assert!(RfbClientError::UserCancelled.is_fatal());
        assert!(RfbClientError::Unsupported("encoding 999".into()).is_fatal());
        assert!(RfbClientError::ResourceExhaustion("zlib init failed".into()).is_fatal());
        assert!(RfbClientError::Encoding {
            encoding: 7,
            source: anyhow::anyhow!("bad tile"),
        }
        .is_fatal());
    }

    #[test]
    fn test_error_display() {
        let err = RfbClientError::AuthFailure("wrong password".into());
        assert_eq!(err.to_string(), "authentication failed: wrong password");

        let err = RfbClientError::Encoding {
            encoding: 16,
            source: anyhow::anyhow!("trailing bytes"),
        };
        assert_eq!(err.to_string(), "decoding failed for encoding 16: trailing bytes");
    }

    /// S7 - a rejected VNC-Auth response must cross the crate boundary as
    /// `AuthFailure`, not the retryable `TransportError`, or auto-reconnect
    /// would hammer the server with the same bad password instead of
    /// re-prompting for a new one.
    #[test]
    fn test_permission_denied_io_error_becomes_auth_failure() {
        let io_err = io::Error::new(io::ErrorKind::PermissionDenied, "security handshake failed: bad password");
        let err: RfbClientError = io_err.into();
        assert!(matches!(err, RfbClientError::AuthFailure(_)));
        assert!(!err.is_retryable());
        assert!(err.to_string().contains("bad password"));
    }

    #[test]
    fn test_other_io_errors_stay_retryable_transport() {
        let io_err = io::Error::new(io::ErrorKind::ConnectionReset, "peer reset");
        let err: RfbClientError = io_err.into();
        assert!(matches!(err, RfbClientError::TransportError(_)));
        assert!(err.is_retryable());
    }

    #[test]
    fn test_unsupported_io_error_maps_to_unsupported() {
        let io_err = io::Error::new(io::ErrorKind::Unsupported, "server requires VeNCrypt");
        let err: RfbClientError = io_err.into();
        assert!(matches!(err, RfbClientError::Unsupported(_)));
        assert!(!err.is_retryable());
    }
}
