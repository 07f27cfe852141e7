//! phantom CLI
//!
//!   phantom [options] script.js [script arguments]
//!
//! Runs the script in the default page, then keeps pages alive until the
//! script calls `phantom.exit()` or no page has pending work. A debug session
//! stays open until `phantom.debugExit()`. The process exit
//! code is the code passed to `phantom.exit()`, or -1 when the script could not
//! be loaded.
//!
//! Set `PHANTOM_LOG` (e.g. `PHANTOM_LOG=debug`) for host diagnostics on stderr.

use std::io;
use std::rc::Rc;

use phantom_host::{Config, Host, Terminal, V8Engine};
use tracing_subscriber::EnvFilter;

fn init_logging(config: &Config) {
    let default = if config.debug { "info" } else { "warn" };
    let filter = EnvFilter::try_from_env("PHANTOM_LOG").unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(io::stderr)
        .init();
}

#[tokio::main(flavor = "current_thread")]
async fn main() {
    let config = Config::from_env();
    init_logging(&config);

    let host = Host::new(config, Rc::new(V8Engine::new()), Rc::new(Terminal::stdio()));
    let code = if host.execute() {
        host.run_until_exit().await
    } else {
        host.return_code()
    };

    // Pages must be released before the process exits.
    drop(host);
    std::process::exit(code);
}
