//! Connection state machine tracking where a session sits between opening a
//! socket and exchanging framebuffer messages.
//!
//! States move forward only: Disconnected -> ProtocolVersion -> Security ->
//! SecurityResult -> ClientInit -> ServerInit -> Normal, with Closing/Closed
//! reachable from anywhere. [`RfbConnection::transition_to`] rejects any move
//! that skips a step or goes backwards; the session layer above drives the
//! handshake one state at a time and relies on that rejection to catch bugs.

use crate::io::{RfbInStream, RfbOutStream};
use tokio::io::{AsyncRead, AsyncWrite};
use std::fmt;

/// A step in the handshake, or the terminal states either side can reach
/// by closing or erroring out.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConnectionState {
    Disconnected,
    ProtocolVersion,
    Security,
    SecurityResult,
    ClientInit,
    ServerInit,
    /// Handshake complete; exchanging framebuffer messages.
    Normal,
    Closing,
    Closed,
    Invalid,
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Disconnected => write!(f, "Disconnected"),
            Self::ProtocolVersion => write!(f, "ProtocolVersion"),
            Self::Security => write!(f, "Security"),
            Self::SecurityResult => write!(f, "SecurityResult"),
            Self::ClientInit => write!(f, "ClientInit"),
            Self::ServerInit => write!(f, "ServerInit"),
            Self::Normal => write!(f, "Normal"),
            Self::Closing => write!(f, "Closing"),
            Self::Closed => write!(f, "Closed"),
            Self::Invalid => write!(f, "Invalid"),
        }
    }
}

/// Owns the split read/write halves of a connection plus the state and
/// ServerInit fields (name, dimensions) learned during the handshake.
pub struct RfbConnection<R, W> {
    /// Input stream for reading from the server.
    instream: RfbInStream<R>,
    
    /// Output stream for writing to the server.
    outstream: RfbOutStream<W>,
    
    /// Current connection state.
    state: ConnectionState,
    
    /// Peer address (for logging/display).
    peer_address: String,
    
    /// Server name/description.
    server_name: Option<String>,
    
    /// Framebuffer width (set after ServerInit).
    width: Option<u16>,
    
    /// Framebuffer height (set after ServerInit).
    height: Option<u16>,
}

impl<R: AsyncRead + Unpin, W: AsyncWrite + Unpin> RfbConnection<R, W> {
    /// Creates a connection in the `Disconnected` state. Call
    /// [`begin_handshake()`](Self::begin_handshake) to start negotiating.
    pub fn new(reader: R, writer: W) -> Self {
        Self {
            instream: RfbInStream::new(reader),
            outstream: RfbOutStream::new(writer),
            state: ConnectionState::Disconnected,
            peer_address: String::new(),
            server_name: None,
            width: None,
            height: None,
        }
    }
    
    /// Set the peer address (for display purposes).
    pub fn set_peer_address(&mut self, address: String) {
        self.peer_address = address;
    }

    /// Get the current connection state.
    pub fn state(&self) -> ConnectionState {
        self.state
    }

    /// Check if the connection is in a specific state.
    pub fn is_state(&self, state: ConnectionState) -> bool {
        self.state == state
    }

    /// Check if the connection is active (not closed or closing).
    ///
    /// Returns `true` if the connection state is anything except
    /// `Closing`, `Closed`, or `Invalid`.
    pub fn is_active(&self) -> bool {
        !matches!(
            self.state,
            ConnectionState::Closing | ConnectionState::Closed | ConnectionState::Invalid
        )
    }

    /// Check if the connection is ready for normal operation.
    ///
    /// Returns `true` only when in the `Normal` state.
    pub fn is_ready(&self) -> bool {
        self.state == ConnectionState::Normal
    }

    /// Get the peer address.
    ///
    /// Returns the endpoint string (e.g., "192.168.1.100:5900").
    pub fn peer_address(&self) -> &str {
        &self.peer_address
    }

    /// Get the server name, if available.
    ///
    /// Returns `Some(&str)` after receiving ServerInit, `None` before.
    pub fn server_name(&self) -> Option<&str> {
        self.server_name.as_deref()
    }

    /// Get the framebuffer dimensions, if available.
    ///
    /// Returns `Some((width, height))` after receiving ServerInit, `None` before.
    pub fn dimensions(&self) -> Option<(u16, u16)> {
        self.width.and_then(|w| self.height.map(|h| (w, h)))
    }

    /// Moves from `Disconnected` to `ProtocolVersion`. Errors if not disconnected.
    pub fn begin_handshake(&mut self) -> anyhow::Result<()> {
        if self.state != ConnectionState::Disconnected {
            anyhow::bail!(
                "Cannot begin handshake from state: {}",
                self.state
            );
        }
        
        self.state = ConnectionState::ProtocolVersion;
        Ok(())
    }

    /// Moves to `new_state`, rejecting transitions that skip a step or go
    /// backwards (e.g. `Closed` to `Normal`).
    pub fn transition_to(&mut self, new_state: ConnectionState) -> anyhow::Result<()> {
        match (self.state, new_state) {
            // Can't transition from closed states
            (ConnectionState::Closed, _) => {
                anyhow::bail!("Cannot transition from Closed state");
            }
            (ConnectionState::Invalid, _) => {
                anyhow::bail!("Cannot transition from Invalid state");
            }
            
            // Can always close
            (_, ConnectionState::Closing | ConnectionState::Closed | ConnectionState::Invalid) => {},
            
            // Normal forward progression
            (ConnectionState::Disconnected, ConnectionState::ProtocolVersion) => {},
            (ConnectionState::ProtocolVersion, ConnectionState::Security) => {},
            (ConnectionState::Security, ConnectionState::SecurityResult) => {},
            (ConnectionState::SecurityResult, ConnectionState::ClientInit) => {},
            (ConnectionState::ClientInit, ConnectionState::ServerInit) => {},
            (ConnectionState::ServerInit, ConnectionState::Normal) => {},
            
            // Stay in Normal state
            (ConnectionState::Normal, ConnectionState::Normal) => {},
            
            // Invalid transition
            _ => {
                anyhow::bail!(
                    "Invalid state transition: {} -> {}",
                    self.state,
                    new_state
                );
            }
        }
        
        self.state = new_state;
        Ok(())
    }

    /// Set the server name (called after ServerInit).
    pub fn set_server_name(&mut self, name: String) {
        self.server_name = Some(name);
    }

    /// Set the framebuffer dimensions (called after ServerInit).
    pub fn set_dimensions(&mut self, width: u16, height: u16) {
        self.width = Some(width);
        self.height = Some(height);
    }

    /// Get a reference to the input stream.
    ///
    /// This allows reading from the connection directly if needed.
    pub fn instream(&mut self) -> &mut RfbInStream<R> {
        &mut self.instream
    }

    /// Get a reference to the output stream.
    ///
    /// This allows writing to the connection directly if needed.
    pub fn outstream(&mut self) -> &mut RfbOutStream<W> {
        &mut self.outstream
    }

    /// Close the connection.
    ///
    /// Transitions to the `Closing` state. The actual socket close
    /// will be handled when the connection is dropped.
    pub fn close(&mut self) {
        if self.state != ConnectionState::Closed {
            self.state = ConnectionState::Closing;
        }
    }

    /// Mark the connection as closed.
    ///
    /// This should be called after the socket has been fully closed.
    pub fn mark_closed(&mut self) {
        self.state = ConnectionState::Closed;
    }
}

// Note: We can't implement Drop with trait bounds on R and W
// because it requires those bounds on the struct itself.
// The connection cleanup will happen naturally when the streams are dropped.
