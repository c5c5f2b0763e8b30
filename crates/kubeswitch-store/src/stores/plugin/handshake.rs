//! Plugin process handshake
//!
//! A plugin prints one line on stdout once its gRPC server listens:
//! `CORE-VERSION|APP-VERSION|NETWORK|ADDRESS|PROTOCOL`.

/// Environment variable a plugin checks before serving
pub const MAGIC_COOKIE_KEY: &str = "KUBESWITCH_PLUGIN_MAGIC_COOKIE";
pub const MAGIC_COOKIE_VALUE: &str = "kubeswitch-store-plugin-v1";

pub const CORE_PROTOCOL_VERSION: &str = "1";
pub const APP_PROTOCOL_VERSION: &str = "1";

/// Address a plugin serves on
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Handshake {
    pub address: String,
}

/// Parse and check a handshake line
pub fn parse(line: &str) -> Result<Handshake, String> {
    let parts: Vec<&str> = line.trim().split('|').collect();
    if parts.len() < 5 {
        return Err(format!("malformed handshake line '{}'", line.trim()));
    }

    if parts[0] != CORE_PROTOCOL_VERSION {
        return Err(format!(
            "unsupported core protocol version {} (expected {})",
            parts[0], CORE_PROTOCOL_VERSION
        ));
    }
    if parts[1] != APP_PROTOCOL_VERSION {
        return Err(format!(
            "unsupported plugin protocol version {} (expected {})",
            parts[1], APP_PROTOCOL_VERSION
        ));
    }
    if parts[2] != "tcp" {
        return Err(format!("unsupported network '{}'", parts[2]));
    }
    if parts[4] != "grpc" {
        return Err(format!("unsupported protocol '{}'", parts[4]));
    }
    if parts[3].is_empty() {
        return Err("handshake carries no address".to_string());
    }

    Ok(Handshake {
        address: parts[3].to_string(),
    })
}
