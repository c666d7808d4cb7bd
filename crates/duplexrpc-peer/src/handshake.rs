use std::io::ErrorKind;
use std::time::Duration;

use duplexrpc_transport::Connection;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::duplex::Role;
use crate::error::{DuplexError, Result};
use crate::message::{read_message_limited, write_message};

const MAX_PROTOCOL_LEN: usize = 32;
const MAX_VERSION_LEN: usize = 16;

/// Greeting each side writes on the raw connection before multiplexing.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Hello {
    /// Protocol name. Must be `duplexrpc` by default.
    pub protocol: String,
    /// Protocol version string, `<major>.<minor>`.
    pub version: String,
    /// The role the sender believes it has.
    pub role: Role,
}

/// What the peer announced.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HandshakeResult {
    pub peer_role: Role,
    pub peer_version: String,
}

/// Configuration for the role handshake.
#[derive(Debug, Clone)]
pub struct HandshakeConfig {
    /// How long to wait for the peer's greeting.
    pub timeout: Duration,
    /// Expected protocol name.
    pub protocol_name: String,
    /// Local protocol version.
    pub protocol_version: String,
    /// Maximum greeting size in bytes.
    pub max_handshake_payload: usize,
}

impl Default for HandshakeConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(5),
            protocol_name: "duplexrpc".to_string(),
            protocol_version: "1.0".to_string(),
            max_handshake_payload: 4 * 1024,
        }
    }
}

impl HandshakeConfig {
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_protocol_version(mut self, version: impl Into<String>) -> Self {
        self.protocol_version = version.into();
        self
    }
}

/// Exchange [`Hello`]s on `conn` and check that the peer speaks the same
/// protocol and holds the opposite role.
///
/// Both sides write first, then read, so neither waits on the other. The
/// read timeout on `conn` is cleared again before returning.
pub fn exchange_roles(
    conn: &dyn Connection,
    role: Role,
    config: &HandshakeConfig,
) -> Result<HandshakeResult> {
    validate_protocol_name(&config.protocol_name)?;
    validate_version(&config.protocol_version)?;

    conn.set_read_timeout(Some(config.timeout))?;
    let result = exchange(conn, role, config);
    if let Err(err) = conn.set_read_timeout(None) {
        debug!(error = %err, "failed to clear handshake read timeout");
    }
    result
}

fn exchange(conn: &dyn Connection, role: Role, config: &HandshakeConfig) -> Result<HandshakeResult> {
    let hello = Hello {
        protocol: config.protocol_name.clone(),
        version: config.protocol_version.clone(),
        role,
    };
    write_message(conn, &hello)?;

    let peer: Hello = match read_message_limited(conn, config.max_handshake_payload) {
        Ok(Some(peer)) => peer,
        Ok(None) | Err(DuplexError::ConnectionClosed) => {
            return Err(DuplexError::HandshakeFailed(
                "connection closed during handshake".to_string(),
            ));
        }
        Err(DuplexError::Io(err))
            if err.kind() == ErrorKind::WouldBlock || err.kind() == ErrorKind::TimedOut =>
        {
            return Err(DuplexError::Timeout(config.timeout));
        }
        Err(DuplexError::MessageTooLarge { size, max }) => {
            return Err(DuplexError::HandshakeFailed(format!(
                "handshake payload too large: {size} (max {max})"
            )));
        }
        Err(err) => return Err(err),
    };

    validate_protocol_name(&peer.protocol)?;
    validate_version(&peer.version)?;

    if peer.protocol != config.protocol_name {
        return Err(DuplexError::HandshakeFailed(format!(
            "unknown protocol '{}' (expected '{}')",
            peer.protocol, config.protocol_name
        )));
    }

    if !is_version_compatible(&config.protocol_version, &peer.version)? {
        return Err(DuplexError::HandshakeFailed(format!(
            "incompatible version '{}' (local '{}')",
            peer.version, config.protocol_version
        )));
    }

    if peer.role == role {
        return Err(DuplexError::HandshakeFailed(format!(
            "both peers claim the {role} role"
        )));
    }

    debug!(peer_role = %peer.role, peer_version = %peer.version, "handshake complete");
    Ok(HandshakeResult {
        peer_role: peer.role,
        peer_version: peer.version,
    })
}

fn validate_protocol_name(protocol: &str) -> Result<()> {
    if protocol.is_empty() || protocol.len() > MAX_PROTOCOL_LEN {
        return Err(DuplexError::HandshakeFailed(format!(
            "invalid protocol name length: {}",
            protocol.len()
        )));
    }
    Ok(())
}

fn validate_version(version: &str) -> Result<()> {
    if version.is_empty() || version.len() > MAX_VERSION_LEN {
        return Err(DuplexError::HandshakeFailed(format!(
            "invalid protocol version length: {}",
            version.len()
        )));
    }
    let _ = parse_version(version)?;
    Ok(())
}

/// Peers interoperate when their major versions agree.
fn is_version_compatible(local: &str, remote: &str) -> Result<bool> {
    let (local_major, _) = parse_version(local)?;
    let (remote_major, _) = parse_version(remote)?;
    Ok(local_major == remote_major)
}

fn parse_version(version: &str) -> Result<(u16, u16)> {
    let (major, minor) = version.split_once('.').ok_or_else(|| {
        DuplexError::HandshakeFailed(format!(
            "invalid version '{version}': expected '<major>.<minor>'"
        ))
    })?;

    let major = major.parse::<u16>().map_err(|_| {
        DuplexError::HandshakeFailed(format!("invalid version '{version}': non-numeric major"))
    })?;
    let minor = minor.parse::<u16>().map_err(|_| {
        DuplexError::HandshakeFailed(format!("invalid version '{version}': non-numeric minor"))
    })?;

    Ok((major, minor))
}
