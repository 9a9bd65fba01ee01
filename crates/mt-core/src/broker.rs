//! Broker address parsing
//!
//! Brokers are given as URLs. The scheme selects the transport:
//! `mqtt` (TCP), `mqtts` (TLS), `ws` (websocket) and `wss` (websocket over TLS).

use std::fmt;

use url::Url;

use crate::error::ConfigError;

/// Transport selected by the broker URL scheme
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BrokerScheme {
    Tcp,
    Tls,
    Ws,
    Wss,
}

impl BrokerScheme {
    fn from_scheme(scheme: &str) -> Option<Self> {
        match scheme {
            "mqtt" | "tcp" => Some(Self::Tcp),
            "mqtts" | "ssl" | "tls" => Some(Self::Tls),
            "ws" => Some(Self::Ws),
            "wss" => Some(Self::Wss),
            _ => None,
        }
    }

    /// Port used when the URL does not name one
    pub fn default_port(self) -> u16 {
        match self {
            Self::Tcp => 1883,
            Self::Tls => 8883,
            Self::Ws => 80,
            Self::Wss => 443,
        }
    }

    /// Whether the transport runs over websockets
    pub fn is_websocket(self) -> bool {
        matches!(self, Self::Ws | Self::Wss)
    }
}

/// A parsed broker address
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BrokerAddress {
    pub scheme: BrokerScheme,
    pub host: String,
    pub port: u16,
    /// Full URL, which websocket transports connect to directly
    pub url: String,
}

impl BrokerAddress {
    /// Parse a broker URL such as `wss://broker.example.com:8084/mqtt`
    pub fn parse(address: &str) -> Result<Self, ConfigError> {
        let invalid = |reason: &str| ConfigError::Broker {
            address: address.to_string(),
            reason: reason.to_string(),
        };

        let url = Url::parse(address).map_err(|e| invalid(&e.to_string()))?;
        let scheme = BrokerScheme::from_scheme(url.scheme())
            .ok_or_else(|| invalid("scheme must be one of mqtt, mqtts, ws, wss"))?;
        let host = url
            .host_str()
            .filter(|h| !h.is_empty())
            .ok_or_else(|| invalid("missing host"))?
            .to_string();
        let port = url.port().unwrap_or_else(|| scheme.default_port());

        Ok(Self {
            scheme,
            host,
            port,
            url: url.to_string(),
        })
    }
}

impl fmt::Display for BrokerAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.scheme.is_websocket() {
            write!(f, "{}", self.url)
        } else {
            write!(f, "{}:{}", self.host, self.port)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_tcp_default_port() {
        let addr = BrokerAddress::parse("mqtt://broker.local").unwrap();
        assert_eq!(addr.scheme, BrokerScheme::Tcp);
        assert_eq!(addr.host, "broker.local");
        assert_eq!(addr.port, 1883);
    }

    #[test]
    fn test_parse_wss_keeps_path() {
        let addr = BrokerAddress::parse("wss://broker.example.com:8084/mqtt").unwrap();
        assert_eq!(addr.scheme, BrokerScheme::Wss);
        assert_eq!(addr.port, 8084);
        assert_eq!(addr.url, "wss://broker.example.com:8084/mqtt");
        assert!(addr.scheme.is_websocket());
    }

    #[test]
    fn test_parse_mqtts() {
        let addr = BrokerAddress::parse("mqtts://10.0.0.5").unwrap();
        assert_eq!(addr.scheme, BrokerScheme::Tls);
        assert_eq!(addr.port, 8883);
        assert_eq!(addr.to_string(), "10.0.0.5:8883");
    }

    #[test]
    fn test_parse_rejects_unknown_scheme() {
        let err = BrokerAddress::parse("http://broker.local").unwrap_err();
        assert!(matches!(err, ConfigError::Broker { .. }));
    }

    #[test]
    fn test_parse_rejects_garbage() {
        assert!(BrokerAddress::parse("not a url").is_err());
    }
}
