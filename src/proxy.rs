//! Proxy selection from the configuration or the environment.

use std::fmt;

use url::Url;

use crate::config::{Config, DEFAULT_PROXY_PORT};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProxyKind {
    Http,
    Socks5,
}

impl ProxyKind {
    /// `"socks5"` selects SOCKS5. Every other value, including an empty one, is HTTP.
    pub fn from_type(proxy_type: &str) -> Self {
        if proxy_type == "socks5" {
            ProxyKind::Socks5
        } else {
            ProxyKind::Http
        }
    }

    fn scheme(self) -> &'static str {
        match self {
            ProxyKind::Http => "http",
            ProxyKind::Socks5 => "socks5",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProxyDescriptor {
    pub kind: ProxyKind,
    pub host: String,
    pub port: u16,
}

impl fmt::Display for ProxyDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}://{}:{}", self.kind.scheme(), self.host, self.port)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProxySetup {
    /// Defer to the system proxy configuration.
    System,
    Explicit(ProxyDescriptor),
}

impl ProxySetup {
    pub fn from_config(config: &Config) -> Self {
        match config.proxy_host.as_deref() {
            None | Some("") => ProxySetup::System,
            Some(host) => ProxySetup::Explicit(ProxyDescriptor {
                kind: ProxyKind::from_type(&config.proxy_type),
                host: host.to_string(),
                port: config.proxy_port,
            }),
        }
    }

    /// The proxy requests should go through, if any.
    pub fn effective(&self) -> Option<ProxyDescriptor> {
        match self {
            ProxySetup::Explicit(descriptor) => Some(descriptor.clone()),
            ProxySetup::System => system_proxy_with(|name| std::env::var(name).ok()),
        }
    }
}

const PROXY_VARIABLES: [&str; 6] = [
    "ALL_PROXY",
    "all_proxy",
    "HTTPS_PROXY",
    "https_proxy",
    "HTTP_PROXY",
    "http_proxy",
];

fn system_proxy_with(lookup: impl Fn(&str) -> Option<String>) -> Option<ProxyDescriptor> {
    PROXY_VARIABLES
        .iter()
        .filter_map(|name| lookup(name))
        .find(|value| !value.trim().is_empty())
        .and_then(|value| parse_proxy_url(value.trim()))
}

fn parse_proxy_url(value: &str) -> Option<ProxyDescriptor> {
    let url = if value.contains("://") {
        Url::parse(value).ok()?
    } else {
        Url::parse(&format!("http://{}", value)).ok()?
    };

    let kind = match url.scheme() {
        "socks5" | "socks5h" => ProxyKind::Socks5,
        _ => ProxyKind::Http,
    };

    Some(ProxyDescriptor {
        kind,
        host: url.host_str()?.to_string(),
        port: url.port_or_known_default().unwrap_or(DEFAULT_PROXY_PORT),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config_with(host: &str, port: u16, proxy_type: &str) -> Config {
        Config {
            proxy_host: Some(host.to_string()),
            proxy_port: port,
            proxy_type: proxy_type.to_string(),
            ..Default::default()
        }
    }

    #[test]
    fn test_socks5_selection() {
        let setup = ProxySetup::from_config(&config_with("10.1.1.1", 1080, "socks5"));
        assert_eq!(
            setup,
            ProxySetup::Explicit(ProxyDescriptor {
                kind: ProxyKind::Socks5,
                host: "10.1.1.1".to_string(),
                port: 1080,
            })
        );
    }

    #[test]
    fn test_everything_else_is_http() {
        for proxy_type in ["", "http", "SOCKS5", "none", "socks4"] {
            let setup = ProxySetup::from_config(&config_with("proxy", 3128, proxy_type));
            let ProxySetup::Explicit(descriptor) = setup else {
                panic!("expected explicit proxy for {:?}", proxy_type);
            };
            assert_eq!(descriptor.kind, ProxyKind::Http);
            assert_eq!(descriptor.host, "proxy");
            assert_eq!(descriptor.port, 3128);
        }
    }

    #[test]
    fn test_no_host_defers_to_system() {
        assert_eq!(ProxySetup::from_config(&Config::default()), ProxySetup::System);
    }

    #[test]
    fn test_system_proxy_from_environment() {
        let found = system_proxy_with(|name| {
            (name == "https_proxy").then(|| "socks5://gateway:9050".to_string())
        });
        assert_eq!(
            found,
            Some(ProxyDescriptor {
                kind: ProxyKind::Socks5,
                host: "gateway".to_string(),
                port: 9050,
            })
        );

        let bare = system_proxy_with(|name| (name == "HTTP_PROXY").then(|| "cache:8080".to_string()));
        assert_eq!(bare.unwrap().to_string(), "http://cache:8080");

        assert_eq!(system_proxy_with(|_| None), None);
    }
}
