use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};

use duplexrpc_transport::UnixDomainSocket;
use tracing::debug;

use crate::duplex::{Duplex, DuplexConfig};
use crate::error::Result;

/// Accepts connections and turns each into a responder [`Duplex`].
pub struct DuplexListener {
    socket: UnixDomainSocket,
    config: DuplexConfig,
    accepted: AtomicU64,
}

impl DuplexListener {
    /// Bind to a Unix domain socket path. Accepted connections use
    /// [`DuplexConfig::for_stream`] unless overridden.
    pub fn bind(path: impl AsRef<Path>) -> Result<Self> {
        let socket = UnixDomainSocket::bind(path)?;
        Ok(Self {
            socket,
            config: DuplexConfig::for_stream(),
            accepted: AtomicU64::new(0),
        })
    }

    /// Override the configuration used for accepted connections.
    pub fn with_config(mut self, config: DuplexConfig) -> Self {
        self.config = config;
        self
    }

    /// Accept the next connection.
    pub fn accept(&self) -> Result<Duplex> {
        let stream = self.socket.accept()?;
        let n = self.accepted.fetch_add(1, Ordering::Relaxed) + 1;
        debug!(connection = n, "accepted");
        Duplex::with_config(stream, false, self.config.clone())
    }

    /// Number of connections accepted so far.
    pub fn accepted(&self) -> u64 {
        self.accepted.load(Ordering::Relaxed)
    }

    /// Bound socket path.
    pub fn path(&self) -> &Path {
        self.socket.path()
    }
}

impl std::fmt::Debug for DuplexListener {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DuplexListener")
            .field("path", &self.path())
            .field("accepted", &self.accepted())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use std::path::PathBuf;
    use std::thread;

    use super::*;
    use crate::connector::connect;
    use crate::duplex::DuplexState;

    fn make_sock_path(tag: &str) -> PathBuf {
        let dir = std::path::PathBuf::from(format!(
            "/tmp/dxl-{}-{}-{}",
            tag,
            std::process::id(),
            std::time::SystemTime::now()
                .duration_since(std::time::UNIX_EPOCH)
                .expect("time should be after epoch")
                .as_nanos()
        ));
        std::fs::create_dir_all(&dir).expect("temp dir should be creatable");
        dir.join("listener.sock")
    }

    #[test]
    fn accepts_multiple_sequential_connections() {
        let sock_path = make_sock_path("multi");
        let listener = DuplexListener::bind(&sock_path).expect("listener should bind");
        assert_eq!(listener.path(), sock_path.as_path());

        let server = thread::spawn(move || {
            let first = listener.accept().expect("first accept should succeed");
            let second = listener.accept().expect("second accept should succeed");
            assert_eq!(listener.accepted(), 2);
            assert_eq!(first.state(), DuplexState::Open);
            assert_eq!(second.state(), DuplexState::Open);
        });

        let _c1 = connect(&sock_path).expect("first client should connect");
        let _c2 = connect(&sock_path).expect("second client should connect");
        server.join().expect("server thread should finish");

        if let Some(parent) = sock_path.parent() {
            let _ = std::fs::remove_dir_all(parent);
        }
    }

    #[test]
    fn dropping_listener_removes_socket() {
        let sock_path = make_sock_path("drop");
        let listener = DuplexListener::bind(&sock_path).expect("listener should bind");
        assert!(sock_path.exists());

        drop(listener);
        assert!(!sock_path.exists());

        if let Some(parent) = sock_path.parent() {
            let _ = std::fs::remove_dir_all(parent);
        }
    }
}
