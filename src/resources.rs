//! Script resources bundled into the binary.
//!
//! Paths are relative to `src/js`:
//! - `bootstrap.js`: evaluated once in the default page after the bridge is exposed
//! - `bridge.js`: builds the bridge object over the page's ops
//! - `page.js`: console forwarding and timers, installed in every page
//! - `modules/<name>.js`: sources served to `require()`

use crate::error::{HostError, Result};

pub const MODULE_ROOT: &str = "modules";
pub const BOOTSTRAP: &str = "bootstrap.js";
pub const BRIDGE_GLUE: &str = "bridge.js";
pub const PAGE_GLUE: &str = "page.js";

static RESOURCES: &[(&str, &str)] = &[
    ("bootstrap.js", include_str!("js/bootstrap.js")),
    ("bridge.js", include_str!("js/bridge.js")),
    ("page.js", include_str!("js/page.js")),
    ("modules/fs.js", include_str!("js/modules/fs.js")),
    ("modules/system.js", include_str!("js/modules/system.js")),
    ("modules/webpage.js", include_str!("js/modules/webpage.js")),
    ("modules/webserver.js", include_str!("js/modules/webserver.js")),
];

pub fn lookup(path: &str) -> Option<&'static str> {
    RESOURCES
        .iter()
        .find(|(name, _)| *name == path)
        .map(|(_, source)| *source)
}

pub fn read(path: &str) -> Result<&'static str> {
    lookup(path).ok_or_else(|| HostError::MissingResource(path.to_string()))
}

/// Read a bundled resource as text. A missing resource reads as empty.
pub fn read_utf8(path: &str) -> String {
    match read(path) {
        Ok(source) => source.to_string(),
        Err(err) => {
            tracing::debug!(error = %err, "resource lookup failed");
            String::new()
        }
    }
}

pub fn module_path(name: &str) -> String {
    format!("{}/{}.js", MODULE_ROOT, name)
}
