//! Channel address parsing
//!
//! Addresses take the form `[proto://][auth@]host[:port][/path][?token]`.
//! The path selects the channel: empty or `/` means channel 1, a path
//! containing `x` is read as hex after the last `x`, anything else as decimal.

use std::fmt;

use winksock_protocol::ChannelId;

use crate::error::ChannelError;

/// Channel used when the address carries no path
pub const DEFAULT_CHANNEL: ChannelId = ChannelId(1);

/// A parsed channel address
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Address {
    /// Lowercased protocol, `http` when omitted
    pub protocol: String,
    /// Text before `@`, sent as the handshake request path
    pub auth: String,
    pub host: String,
    pub port: u16,
    /// Text after the first `/` (without the slash)
    pub path: String,
    /// Text after the last `?`
    pub token: Option<String>,
}

impl Address {
    /// Parse an address expression, assuming `default_port` when none is given
    pub fn parse(expr: &str, default_port: u16) -> Result<Self, ChannelError> {
        let (protocol, rest) = match expr.split_once("://") {
            Some((protocol, rest)) => (protocol.to_ascii_lowercase(), rest),
            None => ("http".to_string(), expr),
        };

        match protocol.as_str() {
            "http" => {}
            "https" => {
                return Err(ChannelError::UnsupportedProtocol(
                    "https is not supported".to_string(),
                ))
            }
            other => {
                return Err(ChannelError::UnsupportedProtocol(format!(
                    "unknown protocol \"{}\"",
                    other
                )))
            }
        }

        let (auth, rest) = match rest.split_once('@') {
            Some((auth, rest)) => (auth.to_string(), rest),
            None => (String::new(), rest),
        };

        let (rest, token) = match rest.rsplit_once('?') {
            Some((rest, token)) => (rest, Some(token.to_string())),
            None => (rest, None),
        };

        let (authority, path) = match rest.split_once('/') {
            Some((authority, path)) => (authority, path.to_string()),
            None => (rest, String::new()),
        };

        let (host, port) = match authority.rsplit_once(':') {
            Some((host, port)) => {
                let port = port
                    .parse::<u16>()
                    .map_err(|_| ChannelError::Address(format!("could not read the port \"{}\"", port)))?;
                (host, port)
            }
            None => (authority, default_port),
        };

        if host.is_empty() {
            return Err(ChannelError::Address(format!(
                "no host in address \"{}\"",
                expr
            )));
        }

        Ok(Self {
            protocol,
            auth,
            host: host.to_string(),
            port,
            path,
            token,
        })
    }

    /// Channel id selected by the path
    pub fn channel_id(&self) -> Result<ChannelId, ChannelError> {
        let path = self.path.as_str();
        if path.is_empty() || path == "/" {
            return Ok(DEFAULT_CHANNEL);
        }

        let parsed = match path.rfind('x') {
            Some(pos) => u32::from_str_radix(&path[pos + 1..], 16),
            None => path.parse::<u32>(),
        };

        match parsed {
            Ok(0) => Err(ChannelError::Address(
                "channel 0 is reserved for broadcast".to_string(),
            )),
            Ok(id) => Ok(ChannelId::new(id)),
            Err(_) => Err(ChannelError::Address(format!(
                "could not read the channel \"{}\"",
                path
            ))),
        }
    }

    /// Key under which connections to this address are shared
    pub fn endpoint(&self) -> EndpointKey {
        EndpointKey {
            host: self.host.clone(),
            port: self.port,
            auth: self.auth.clone(),
        }
    }
}

/// Identity of a shared connection
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct EndpointKey {
    pub host: String,
    pub port: u16,
    pub auth: String,
}

impl EndpointKey {
    pub fn new(host: impl Into<String>, port: u16, auth: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            port,
            auth: auth.into(),
        }
    }
}

impl fmt::Display for EndpointKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}/{}", self.host, self.port, self.auth)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_full_address() {
        let addr = Address::parse("HTTP://key@example.com:7010/x1F?secret", 80).unwrap();
        assert_eq!(addr.protocol, "http");
        assert_eq!(addr.auth, "key");
        assert_eq!(addr.host, "example.com");
        assert_eq!(addr.port, 7010);
        assert_eq!(addr.path, "x1F");
        assert_eq!(addr.token.as_deref(), Some("secret"));
        assert_eq!(addr.channel_id().unwrap(), ChannelId::new(0x1F));
    }

    #[test]
    fn test_minimal_address() {
        let addr = Address::parse("example.com", 80).unwrap();
        assert_eq!(addr.protocol, "http");
        assert_eq!(addr.auth, "");
        assert_eq!(addr.port, 80);
        assert_eq!(addr.token, None);
        assert_eq!(addr.channel_id().unwrap(), DEFAULT_CHANNEL);
    }

    #[test]
    fn test_channel_paths() {
        let id = |expr: &str| Address::parse(expr, 80).unwrap().channel_id();

        assert_eq!(id("host/").unwrap(), ChannelId::new(1));
        assert_eq!(id("host/1234").unwrap(), ChannelId::new(1234));
        assert_eq!(id("host/0xff").unwrap(), ChannelId::new(255));
        assert_eq!(id("host/4294967295").unwrap(), ChannelId::new(u32::MAX));
        assert!(matches!(id("host/0"), Err(ChannelError::Address(_))));
        assert!(matches!(id("host/x0"), Err(ChannelError::Address(_))));
        assert!(matches!(id("host/chat"), Err(ChannelError::Address(_))));
        assert!(matches!(id("host/4294967296"), Err(ChannelError::Address(_))));
    }

    #[test]
    fn test_unsupported_protocols() {
        assert!(matches!(
            Address::parse("https://example.com/1", 80),
            Err(ChannelError::UnsupportedProtocol(_))
        ));
        assert!(matches!(
            Address::parse("ftp://example.com/1", 80),
            Err(ChannelError::UnsupportedProtocol(_))
        ));
    }

    #[test]
    fn test_bad_port_and_host() {
        assert!(matches!(
            Address::parse("example.com:http/1", 80),
            Err(ChannelError::Address(_))
        ));
        assert!(matches!(
            Address::parse("http:///1", 80),
            Err(ChannelError::Address(_))
        ));
    }

    #[test]
    fn test_endpoint_key() {
        let a = Address::parse("auth@example.com/1", 80).unwrap().endpoint();
        let b = Address::parse("auth@example.com:80/2", 80).unwrap().endpoint();
        let c = Address::parse("other@example.com/1", 80).unwrap().endpoint();

        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_eq!(a.to_string(), "example.com:80/auth");
    }
}
