//! TCP and Unix-domain transports, unified behind [`VncSocket`] so the
//! handshake and session code above don't care which one they're holding.

use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::pin::Pin;
use std::task::{Context, Poll};
use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};
use tokio::net::{TcpStream, UnixStream};

/// Implemented by every transport the client can open: async I/O plus
/// enough addressing info for logging and diagnostics.
pub trait VncSocket: AsyncRead + AsyncWrite + Send + Unpin {
    /// Human-readable peer address (IP for TCP, path for Unix).
    fn peer_address(&self) -> String;

    /// Peer address plus port/path, e.g. `"192.168.1.100:5900"` or `"unix:/tmp/vnc.sock"`.
    fn peer_endpoint(&self) -> String;

    /// Raw fd for platform-specific socket options, where available.
    #[cfg(unix)]
    fn as_raw_fd(&self) -> Option<std::os::unix::io::RawFd>;
}

/// [`TcpStream`] wrapper with `TCP_NODELAY` always on - batching small
/// packets like mouse deltas would make the session feel laggy.
pub struct TcpSocket {
    stream: TcpStream,
    peer_addr: SocketAddr,
}

impl TcpSocket {
    /// Connects to `host:port` (port is usually `5900 + display number`).
    pub async fn connect(host: &str, port: u16) -> anyhow::Result<Self> {
        let addr = format!("{}:{}", host, port);
        let stream = TcpStream::connect(&addr).await?;
        let peer_addr = stream.peer_addr()?;
        stream.set_nodelay(true)?;
        Ok(Self { stream, peer_addr })
    }

    /// Unwraps to the raw stream for split read/write or socket options.
    pub fn into_inner(self) -> TcpStream {
        self.stream
    }
}

impl VncSocket for TcpSocket {
    fn peer_address(&self) -> String {
        self.peer_addr.ip().to_string()
    }

    fn peer_endpoint(&self) -> String {
        self.peer_addr.to_string()
    }

    #[cfg(unix)]
    fn as_raw_fd(&self) -> Option<std::os::unix::io::RawFd> {
        use std::os::unix::io::AsRawFd;
        Some(self.stream.as_raw_fd())
    }
}

impl AsyncRead for TcpSocket {
    fn poll_read(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<std::io::Result<()>> {
        Pin::new(&mut self.stream).poll_read(cx, buf)
    }
}

impl AsyncWrite for TcpSocket {
    fn poll_write(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<std::io::Result<usize>> {
        Pin::new(&mut self.stream).poll_write(cx, buf)
    }

    fn poll_flush(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<std::io::Result<()>> {
        Pin::new(&mut self.stream).poll_flush(cx)
    }

    fn poll_shutdown(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<std::io::Result<()>> {
        Pin::new(&mut self.stream).poll_shutdown(cx)
    }
}

/// [`UnixStream`] wrapper for local connections (e.g. through an SSH tunnel
/// or a display manager's socket) where a loopback TCP hop would be wasted.
#[cfg(unix)]
pub struct UnixSocket {
    stream: UnixStream,
    path: PathBuf,
}

#[cfg(unix)]
impl UnixSocket {
    /// Connects to the socket file at `path`.
    pub async fn connect(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let path_ref = path.as_ref();
        let stream = UnixStream::connect(path_ref).await?;
        Ok(Self {
            stream,
            path: path_ref.to_path_buf(),
        })
    }

    /// Unwraps to the raw stream.
    pub fn into_inner(self) -> UnixStream {
        self.stream
    }
}

#[cfg(unix)]
impl VncSocket for UnixSocket {
    fn peer_address(&self) -> String {
        self.path.display().to_string()
    }

    fn peer_endpoint(&self) -> String {
        format!("unix:{}", self.path.display())
    }

    fn as_raw_fd(&self) -> Option<std::os::unix::io::RawFd> {
        use std::os::unix::io::AsRawFd;
        Some(self.stream.as_raw_fd())
    }
}

#[cfg(unix)]
impl AsyncRead for UnixSocket {
    fn poll_read(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<std::io::Result<()>> {
        Pin::new(&mut self.stream).poll_read(cx, buf)
    }
}

#[cfg(unix)]
impl AsyncWrite for UnixSocket {
    fn poll_write(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<std::io::Result<usize>> {
        Pin::new(&mut self.stream).poll_write(cx, buf)
    }

    fn poll_flush(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<std::io::Result<()>> {
        Pin::new(&mut self.stream).poll_flush(cx)
    }

    fn poll_shutdown(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<std::io::Result<()>> {
        Pin::new(&mut self.stream).poll_shutdown(cx)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::net::TcpListener;

    #[tokio::test]
    async fn test_tcp_socket_connection() {
        // Start a test server
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        // Spawn server task
        tokio::spawn(async move {
            let (_socket, _addr) = listener.accept().await.unwrap();
            // Server accepts connection and immediately closes
        });

        // Connect client
        let socket = TcpSocket::connect("127.0.0.1", addr.port()).await.unwrap();

        // Verify peer address
        assert_eq!(socket.peer_address(), "127.0.0.1");
        assert!(socket.peer_endpoint().starts_with("127.0.0.1:"));
    }

    #[tokio::test]
    async fn test_tcp_socket_nodelay() {
        // Start a test server
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        tokio::spawn(async move {
            let (_socket, _addr) = listener.accept().await.unwrap();
        });

        // Connect and verify TCP_NODELAY is set
        let socket = TcpSocket::connect("127.0.0.1", addr.port()).await.unwrap();
        let stream = socket.into_inner();
        assert!(stream.nodelay().unwrap());
    }

    #[tokio::test]
    async fn test_tcp_socket_connection_refused() {
        // Try to connect to a port that's not listening
        let result = TcpSocket::connect("127.0.0.1", 1).await;
        assert!(result.is_err());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_unix_socket_connection() {
        use tempfile::TempDir;
        use tokio::net::UnixListener;

        // Create temporary directory for socket
        let temp_dir = TempDir::new().unwrap();
        let socket_path = temp_dir.path().join("test.sock");

        // Start a test server
        let listener = UnixListener::bind(&socket_path).unwrap();
        let socket_path_clone = socket_path.clone();

        tokio::spawn(async move {
            let (_socket, _addr) = listener.accept().await.unwrap();
        });

        // Connect client
        let socket = UnixSocket::connect(&socket_path_clone).await.unwrap();

        // Verify peer address
        assert_eq!(
            socket.peer_address(),
            socket_path_clone.display().to_string()
        );
        assert_eq!(
            socket.peer_endpoint(),
            format!("unix:{}", socket_path_clone.display())
        );
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_unix_socket_nonexistent() {
        // Try to connect to a socket that doesn't exist
        let result = UnixSocket::connect("/tmp/nonexistent-socket-12345.sock").await;
        assert!(result.is_err());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_raw_fd() {
        use tempfile::TempDir;
        use tokio::net::UnixListener;

        let temp_dir = TempDir::new().unwrap();
        let socket_path = temp_dir.path().join("test.sock");

        let listener = UnixListener::bind(&socket_path).unwrap();
        let socket_path_clone = socket_path.clone();

        tokio::spawn(async move {
            let (_socket, _addr) = listener.accept().await.unwrap();
        });

        let socket = UnixSocket::connect(&socket_path_clone).await.unwrap();

        // Verify we can get a raw file descriptor
        let fd = socket.as_raw_fd();
        assert!(fd.is_some());
        assert!(fd.unwrap() > 0);
    }
}
