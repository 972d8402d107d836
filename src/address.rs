//! Connect-address parsing
//!
//! A host passes a single address string. When it starts with the secure
//! prefix (`ssl://` by default) the prefix is stripped and the channel uses
//! TLS; anything else is a plaintext host/port target.

use std::fmt;

use tonic::transport::Uri;

use crate::error::{BridgeError, Result};

/// Transport security chosen for a channel
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SecurityMode {
    Plaintext,
    Tls,
}

impl fmt::Display for SecurityMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SecurityMode::Plaintext => write!(f, "plaintext"),
            SecurityMode::Tls => write!(f, "tls"),
        }
    }
}

/// Resolved channel target
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChannelTarget {
    /// Host/port part of the address, prefix removed
    pub host_port: String,
    pub security: SecurityMode,
    /// URI handed to the transport
    pub uri: Uri,
}

impl ChannelTarget {
    /// Resolve `address` using `secure_prefix` to select TLS
    pub fn parse(address: &str, secure_prefix: &str) -> Result<Self> {
        let address = address.trim();
        let (host_port, security) = match address.strip_prefix(secure_prefix) {
            Some(rest) if !secure_prefix.is_empty() => (rest, SecurityMode::Tls),
            _ => (address, SecurityMode::Plaintext),
        };

        if host_port.is_empty() {
            return Err(BridgeError::invalid_parameter(format!(
                "address '{}' has no host",
                address
            )));
        }

        let uri_text = if host_port.contains("://") {
            host_port.to_string()
        } else {
            let scheme = match security {
                SecurityMode::Plaintext => "http",
                SecurityMode::Tls => "https",
            };
            format!("{}://{}", scheme, host_port)
        };

        let uri: Uri = uri_text.parse().map_err(|e| {
            BridgeError::invalid_parameter(format!("address '{}' is not a valid target: {}", address, e))
        })?;
        // tonic only negotiates TLS for https URIs
        if security == SecurityMode::Tls && uri.scheme_str() != Some("https") {
            return Err(BridgeError::invalid_parameter(format!(
                "address '{}' requests TLS but names scheme '{}'",
                address,
                uri.scheme_str().unwrap_or_default()
            )));
        }
        // an explicit https:// target is encrypted whatever the prefix
        let security = if uri.scheme_str() == Some("https") {
            SecurityMode::Tls
        } else {
            security
        };
        if uri.host().is_none() {
            return Err(BridgeError::invalid_parameter(format!(
                "address '{}' has no host",
                address
            )));
        }

        Ok(Self {
            host_port: host_port.to_string(),
            security,
            uri,
        })
    }

    /// Host name used for TLS server name checks
    pub fn host(&self) -> &str {
        self.uri.host().unwrap_or_default()
    }
}

impl fmt::Display for ChannelTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.uri, self.security)
    }
}
