use std::path::Path;

#[cfg(unix)]
use duplexrpc_transport::UnixDomainSocket;

use crate::duplex::{Duplex, DuplexConfig};
use crate::error::Result;

/// Dial a listening peer and start a duplex as the initiator, using
/// length-prefixed frames ([`DuplexConfig::for_stream`]).
pub fn connect(path: impl AsRef<Path>) -> Result<Duplex> {
    connect_with_config(path, DuplexConfig::for_stream())
}

/// Connect with explicit configuration. Both ends must agree on the frame
/// mode.
pub fn connect_with_config(path: impl AsRef<Path>, config: DuplexConfig) -> Result<Duplex> {
    #[cfg(not(unix))]
    {
        let _ = config;
        let path = path.as_ref().to_path_buf();
        return Err(duplexrpc_transport::TransportError::Connect {
            path,
            source: std::io::Error::new(
                std::io::ErrorKind::Unsupported,
                "duplexrpc-peer requires Unix domain sockets",
            ),
        }
        .into());
    }

    #[cfg(unix)]
    {
        let stream = UnixDomainSocket::connect(path)?;
        Duplex::with_config(stream, true, config)
    }
}

#[cfg(all(test, unix))]
mod tests {
    use std::path::PathBuf;
    use std::sync::Arc;
    use std::thread;
    use std::time::Duration;

    use serde_json::{json, Value};

    use super::*;
    use crate::duplex::Role;
    use crate::error::DuplexError;
    use crate::handshake::HandshakeConfig;
    use crate::listener::DuplexListener;
    use crate::server::ServiceBuilder;

    fn make_sock_path(tag: &str) -> PathBuf {
        let dir = std::env::temp_dir().join(format!(
            "dxc-{}-{}-{}",
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
    fn connect_and_call_listener_service() {
        let sock_path = make_sock_path("call");
        let listener = DuplexListener::bind(&sock_path).expect("listener should bind");

        let server = thread::spawn(move || {
            let duplex = Arc::new(listener.accept().expect("listener should accept"));
            assert_eq!(duplex.role(), Role::Responder);
            duplex
                .register(
                    ServiceBuilder::new("API")
                        .method("Echo", |value: Value| Ok::<_, String>(value))
                        .build(),
                )
                .expect("register should succeed");
            duplex.serve().expect("serve should end cleanly");
        });

        let client = connect(&sock_path).expect("client should connect");
        assert_eq!(client.role(), Role::Initiator);
        let reply: Value = client
            .call("API.Echo", &json!({ "name": "Anto" }))
            .expect("call should succeed");
        assert_eq!(reply, json!({ "name": "Anto" }));

        client.close().expect("close should succeed");
        server.join().expect("server thread should complete");
        let _ = std::fs::remove_dir_all(sock_path.parent().expect("socket has a parent"));
    }

    #[test]
    fn listener_can_call_the_dialer() {
        let sock_path = make_sock_path("reverse");
        let listener = DuplexListener::bind(&sock_path).expect("listener should bind");

        let server = thread::spawn(move || {
            let duplex = listener.accept().expect("listener should accept");
            let reply: String = duplex
                .call("Client.Hello", &())
                .expect("reverse call should succeed");
            duplex.close().expect("close should succeed");
            reply
        });

        let client = Arc::new(connect(&sock_path).expect("client should connect"));
        client
            .register(
                ServiceBuilder::new("Client")
                    .method("Hello", |_: Value| Ok::<_, String>("from dialer"))
                    .build(),
            )
            .expect("register should succeed");
        let serving = client.spawn_serve().expect("serve thread should start");

        assert_eq!(server.join().expect("server thread should complete"), "from dialer");
        serving
            .join()
            .expect("serve thread should complete")
            .expect("serve should end cleanly");
        let _ = std::fs::remove_dir_all(sock_path.parent().expect("socket has a parent"));
    }

    #[test]
    fn connect_with_handshake() {
        let sock_path = make_sock_path("hs");
        let handshake = HandshakeConfig::default().with_timeout(Duration::from_secs(2));
        let listener = DuplexListener::bind(&sock_path)
            .expect("listener should bind")
            .with_config(DuplexConfig::for_stream().with_handshake(handshake.clone()));

        let server = thread::spawn(move || {
            let duplex = listener.accept().expect("listener should accept");
            duplex.peer().map(|peer| peer.peer_role)
        });

        let client = connect_with_config(
            &sock_path,
            DuplexConfig::for_stream().with_handshake(handshake),
        )
        .expect("client should connect");
        assert_eq!(client.peer().map(|peer| peer.peer_role), Some(Role::Responder));
        assert_eq!(
            server.join().expect("server thread should complete"),
            Some(Role::Initiator)
        );
        let _ = std::fs::remove_dir_all(sock_path.parent().expect("socket has a parent"));
    }

    #[test]
    fn connect_to_missing_socket_fails() {
        let sock_path = make_sock_path("missing");
        let err = connect(&sock_path).expect_err("connect should fail");
        assert!(matches!(err, DuplexError::Transport(_)));
        let _ = std::fs::remove_dir_all(sock_path.parent().expect("socket has a parent"));
    }
}
