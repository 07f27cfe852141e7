//! Remote inspector endpoint for debug sessions.

use std::net::{Ipv4Addr, SocketAddr, TcpListener};

use anyhow::{anyhow, Result};

/// A bound inspector port. Dropping it releases the port.
///
/// The endpoint only reserves the port and never accepts connections. It is
/// not wired to the page's V8 inspector, so a DevTools client that connects
/// will wait without a reply.
#[derive(Debug)]
pub struct Inspector {
    port: u16,
    listener: Option<TcpListener>,
}

impl Inspector {
    pub fn bind(port: u16) -> Result<Self> {
        let addr = SocketAddr::from((Ipv4Addr::LOCALHOST, port));
        let listener = TcpListener::bind(addr)
            .map_err(|e| anyhow!("Unable to bind remote inspector to {}: {}", addr, e))?;
        let port = listener.local_addr()?.port();

        tracing::info!(port, "remote inspector listening on 127.0.0.1:{}", port);
        Ok(Self {
            port,
            listener: Some(listener),
        })
    }

    /// An endpoint that records the port without holding a socket.
    pub fn detached(port: u16) -> Self {
        Self {
            port,
            listener: None,
        }
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn is_bound(&self) -> bool {
        self.listener.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bind_ephemeral_port() {
        let inspector = Inspector::bind(0).unwrap();
        assert!(inspector.is_bound());
        assert_ne!(inspector.port(), 0);
    }

    #[test]
    fn test_port_in_use_is_an_error() {
        let first = Inspector::bind(0).unwrap();
        let err = Inspector::bind(first.port()).unwrap_err();
        assert!(err.to_string().contains("Unable to bind remote inspector"));
    }

    #[test]
    fn test_detached() {
        let inspector = Inspector::detached(9000);
        assert_eq!(inspector.port(), 9000);
        assert!(!inspector.is_bound());
    }
}
