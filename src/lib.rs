//! # phantom-host
//!
//! A scriptable headless host built on deno_core.
//!
//! The [`Host`] boots a default page, exposes the `phantom` bridge object in
//! it, evaluates the bundled bootstrap script and then injects the user's
//! script. Scripts can create further pages, auxiliary web servers and a
//! filesystem service through the bridge, and end the run with
//! `phantom.exit(code)`.
//!
//! ## Execution modes
//!
//! - **Normal**: the script is injected and runs immediately. `phantom.exit()`
//!   ends the run.
//! - **Debug** (`--debug=yes` or `--remote-debugger-port=<port>`): the script is
//!   wrapped in a `__run()` harness, the V8 inspector is enabled and an
//!   endpoint is bound on the debug port. Only `phantom.debugExit()` ends the run.
//!
//! ## Usage
//!
//! ```rust,ignore
//! use phantom_host::{Config, Host, Terminal, V8Engine};
//! use std::rc::Rc;
//!
//! #[tokio::main(flavor = "current_thread")]
//! async fn main() {
//!     let config = Config::from_args(["hello.js"]);
//!     let host = Host::new(config, Rc::new(V8Engine::new()), Rc::new(Terminal::stdio()));
//!
//!     let code = if host.execute() {
//!         host.run_until_exit().await
//!     } else {
//!         host.return_code()
//!     };
//!     std::process::exit(code);
//! }
//! ```

mod bridge;
mod config;
mod encoding;
mod error;
mod filesystem;
mod host;
mod inspector;
mod loader;
mod ops;
mod page;
mod proxy;
mod registry;
mod resources;
mod runtime;
mod script;
mod server;
mod settings;
mod terminal;

#[cfg(test)]
mod testing;

pub use bridge::{Bridge, BridgeRef, Version, BRIDGE_NAME};
pub use config::{Config, DEFAULT_DEBUG_PORT, DEFAULT_PROXY_PORT, USAGE};
pub use encoding::Encoding;
pub use error::{HostError, Result};
pub use filesystem::{FileSystem, FsCall, WriteMode};
pub use host::{format_console_message, ExecutionMode, Host, TerminationState};
pub use inspector::Inspector;
pub use loader::{LibraryLoader, LibraryPath};
pub use page::{
    BackendOptions, ConsoleMessage, Engine, Interrupt, Page, PageBackend, PageCall, PageId, CONSOLE_QUEUE_LIMIT,
};
pub use proxy::{ProxyDescriptor, ProxyKind, ProxySetup};
pub use runtime::{V8Engine, V8Page, DEFAULT_USER_AGENT};
pub use script::ScriptFile;
pub use server::{ServerCall, ServerId, WebServer};
pub use settings::{PageSettings, SettingKey, SettingValue};
pub use terminal::Terminal;
