use std::fmt;

use sault_types::{
    config::{DEFAULT_SERVER_NAME, DEFAULT_SERVER_PORT}, validation::parse_host_address
};

use crate::ClientResult;

/// Where the sault server lives: `[name@]host[:port]`.
///
/// `name` is the login used for control sessions and must match the server's configured
/// server name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerTarget {
    pub server_name: String,
    pub host: String,
    pub port: u16,
}

impl ServerTarget {
    pub fn parse(input: &str) -> ClientResult<Self> {
        let (server_name, address) = match input.rsplit_once('@') {
            Some((name, address)) if !name.is_empty() => (name.to_string(), address),
            Some((_, address)) => (DEFAULT_SERVER_NAME.to_string(), address),
            None => (DEFAULT_SERVER_NAME.to_string(), input),
        };
        let (host, port) = parse_host_address(address, DEFAULT_SERVER_PORT)?;
        Ok(Self { server_name, host, port })
    }
}

impl fmt::Display for ServerTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.host.contains(':') {
            write!(f, "{}@[{}]:{}", self.server_name, self.host, self.port)
        } else {
            write!(f, "{}@{}:{}", self.server_name, self.host, self.port)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_fill_missing_parts() {
        let target = ServerTarget::parse("bastion.example").unwrap();
        assert_eq!(target.server_name, "sault");
        assert_eq!(target.host, "bastion.example");
        assert_eq!(target.port, 2222);
        assert_eq!(target.to_string(), "sault@bastion.example:2222");
    }

    #[test]
    fn explicit_name_and_port() {
        let target = ServerTarget::parse("gate@10.0.0.1:2022").unwrap();
        assert_eq!(target.server_name, "gate");
        assert_eq!(target.host, "10.0.0.1");
        assert_eq!(target.port, 2022);

        let v6 = ServerTarget::parse("[::1]:2200").unwrap();
        assert_eq!(v6.host, "::1");
        assert_eq!(v6.to_string(), "sault@[::1]:2200");
    }

    #[test]
    fn bad_port_is_rejected() {
        assert!(ServerTarget::parse("host:notaport").is_err());
        assert!(ServerTarget::parse("").is_err());
    }
}
