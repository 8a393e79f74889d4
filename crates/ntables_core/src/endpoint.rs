//! Network endpoint parsing.

use crate::error::{CoreError, CoreResult};
use std::fmt;

/// A host and TCP port.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Endpoint {
    /// Host name or IP address, without brackets.
    pub host: String,
    /// TCP port.
    pub port: u16,
}

impl Endpoint {
    /// Creates an endpoint.
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }

    /// Parses `host`, `host:port`, `tcp://host` or `tcp://host:port`.
    ///
    /// `default_port` is used when the address carries none. IPv6
    /// addresses with a port must be bracketed (`[::1]:1735`).
    ///
    /// # Errors
    ///
    /// `InvalidEndpoint` for an empty host or a port that is not a `u16`.
    pub fn parse(address: &str, default_port: u16) -> CoreResult<Self> {
        let invalid = || CoreError::InvalidEndpoint {
            address: address.to_string(),
        };

        let rest = match address.split_once("://") {
            Some((_scheme, rest)) => rest,
            None => address,
        };
        let authority = rest.split('/').next().unwrap_or_default().trim();

        let (host, port) = if let Some(bracketed) = authority.strip_prefix('[') {
            let (host, after) = bracketed.split_once(']').ok_or_else(invalid)?;
            let port = match after {
                "" => None,
                _ => Some(after.strip_prefix(':').ok_or_else(invalid)?),
            };
            (host, port)
        } else {
            match authority.split_once(':') {
                // More than one colon is a bare IPv6 address.
                Some((_, tail)) if tail.contains(':') => (authority, None),
                Some((host, port)) => (host, Some(port)),
                None => (authority, None),
            }
        };

        if host.is_empty() {
            return Err(invalid());
        }
        let port = match port {
            None | Some("") => default_port,
            Some(text) => text.parse::<u16>().map_err(|_| invalid())?,
        };
        Ok(Self::new(host, port))
    }

    /// Returns `host:port` in a form `TcpStream::connect` accepts.
    pub fn socket_addr(&self) -> String {
        self.to_string()
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.host.contains(':') {
            write!(f, "[{}]:{}", self.host, self.port)
        } else {
            write!(f, "{}:{}", self.host, self.port)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn host_only_uses_default_port() {
        assert_eq!(
            Endpoint::parse("localhost", 1735).unwrap(),
            Endpoint::new("localhost", 1735)
        );
    }

    #[test]
    fn host_and_port() {
        assert_eq!(
            Endpoint::parse("10.0.0.2:5800", 1735).unwrap(),
            Endpoint::new("10.0.0.2", 5800)
        );
    }

    #[test]
    fn scheme_is_stripped() {
        assert_eq!(
            Endpoint::parse("tcp://roborio-1234-frc.local", 1735).unwrap(),
            Endpoint::new("roborio-1234-frc.local", 1735)
        );
        assert_eq!(
            Endpoint::parse("tcp://127.0.0.1:9000", 1735).unwrap(),
            Endpoint::new("127.0.0.1", 9000)
        );
        assert_eq!(
            Endpoint::parse("tcp://127.0.0.1:9000/", 1735).unwrap(),
            Endpoint::new("127.0.0.1", 9000)
        );
    }

    #[test]
    fn ipv6() {
        assert_eq!(
            Endpoint::parse("[::1]:1800", 1735).unwrap(),
            Endpoint::new("::1", 1800)
        );
        assert_eq!(
            Endpoint::parse("::1", 1735).unwrap(),
            Endpoint::new("::1", 1735)
        );
        assert_eq!(Endpoint::new("::1", 1735).to_string(), "[::1]:1735");
    }

    #[test]
    fn empty_port_uses_default() {
        assert_eq!(Endpoint::parse("host:", 42).unwrap().port, 42);
    }

    #[test]
    fn invalid_addresses() {
        assert!(Endpoint::parse("", 1735).is_err());
        assert!(Endpoint::parse("tcp://", 1735).is_err());
        assert!(Endpoint::parse("host:notaport", 1735).is_err());
        assert!(Endpoint::parse("host:70000", 1735).is_err());
        assert!(Endpoint::parse("[::1", 1735).is_err());
    }

    #[test]
    fn display() {
        assert_eq!(Endpoint::new("localhost", 1735).socket_addr(), "localhost:1735");
    }
}
