//! Auxiliary web server instances created from script.
//!
//! A server binds a port and holds it until closed. Request handling is not
//! provided.

use std::cell::RefCell;
use std::fmt;
use std::net::{Ipv4Addr, SocketAddr, TcpListener};
use std::rc::Rc;

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::config::Config;
use crate::error::Result;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ServerId(pub u32);

impl fmt::Display for ServerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Calls arriving from the `webserver` module.
#[derive(Debug, Deserialize)]
#[serde(tag = "op", rename_all = "camelCase")]
pub enum ServerCall {
    Listen { port: u16 },
    Port,
    Close,
}

#[derive(Debug)]
pub struct WebServer {
    id: ServerId,
    config: Rc<Config>,
    listener: RefCell<Option<TcpListener>>,
}

impl WebServer {
    pub fn new(id: ServerId, config: Rc<Config>) -> Self {
        Self {
            id,
            config,
            listener: RefCell::new(None),
        }
    }

    pub fn id(&self) -> ServerId {
        self.id
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Bind `127.0.0.1:port`, replacing any earlier binding. Port 0 picks a free port.
    pub fn listen(&self, port: u16) -> bool {
        self.close();
        let addr = SocketAddr::from((Ipv4Addr::LOCALHOST, port));
        match TcpListener::bind(addr) {
            Ok(listener) => {
                tracing::info!(server = %self.id, %addr, "web server listening");
                *self.listener.borrow_mut() = Some(listener);
                true
            }
            Err(err) => {
                tracing::warn!(server = %self.id, %addr, error = %err, "web server failed to listen");
                false
            }
        }
    }

    pub fn port(&self) -> Option<u16> {
        self.listener
            .borrow()
            .as_ref()
            .and_then(|listener| listener.local_addr().ok())
            .map(|addr| addr.port())
    }

    pub fn close(&self) {
        if self.listener.borrow_mut().take().is_some() {
            tracing::debug!(server = %self.id, "web server closed");
        }
    }

    pub fn dispatch(&self, call: ServerCall) -> Result<Value> {
        Ok(match call {
            ServerCall::Listen { port } => json!(self.listen(port)),
            ServerCall::Port => json!(self.port()),
            ServerCall::Close => {
                self.close();
                Value::Null
            }
        })
    }
}
