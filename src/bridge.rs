//! The capability surface scripts see as the `phantom` global.

use std::fmt;
use std::rc::Rc;

use serde::Serialize;
use serde_json::Value;

use crate::error::Result;
use crate::filesystem::FsCall;
use crate::page::{ConsoleMessage, PageCall, PageId};
use crate::script::ScriptFile;
use crate::server::{ServerCall, ServerId};
use crate::settings::PageSettings;

/// Global name the bridge is exposed under.
pub const BRIDGE_NAME: &str = "phantom";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Version {
    pub major: u32,
    pub minor: u32,
    pub patch: u32,
}

impl Version {
    pub fn current() -> Self {
        let part = |s: &str| s.parse().unwrap_or(0);
        Self {
            major: part(env!("CARGO_PKG_VERSION_MAJOR")),
            minor: part(env!("CARGO_PKG_VERSION_MINOR")),
            patch: part(env!("CARGO_PKG_VERSION_PATCH")),
        }
    }
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}.{}", self.major, self.minor, self.patch)
    }
}

/// Host operations reachable from script.
///
/// Every method may be called while a page is executing, so implementations
/// must not assume exclusive access to any page.
pub trait Bridge {
    /// A console message emitted by `page`.
    fn console_message(&self, page: PageId, message: ConsoleMessage);

    /// An uncaught error from `page` that no script hook handled.
    fn report_error(&self, page: PageId, message: &str);

    fn exit(&self, code: i32);
    fn debug_exit(&self, code: i32);
    fn is_terminated(&self) -> bool;

    fn create_web_page(&self) -> Option<PageId>;
    fn create_web_server(&self) -> Option<ServerId>;
    fn create_filesystem(&self);

    /// Source of a built-in module, empty when there is none.
    fn load_module_source(&self, name: &str) -> String;

    /// Inject a file into the default page.
    fn inject_js(&self, path: &str) -> bool;

    fn default_page(&self) -> Option<PageId>;

    /// Read the file `inject_js` would run, without running it.
    fn resolve_injection(&self, path: &str) -> Result<ScriptFile>;

    fn version(&self) -> Version;
    fn args(&self) -> Vec<String>;
    fn default_page_settings(&self) -> PageSettings;
    fn library_path(&self) -> String;
    fn set_library_path(&self, path: &str);
    fn output_encoding(&self) -> String;
    fn set_output_encoding(&self, label: &str) -> bool;
    fn script_name(&self) -> String;

    fn filesystem(&self, call: FsCall) -> Result<Value>;
    fn page(&self, id: PageId, call: PageCall) -> Result<Value>;
    fn server(&self, id: ServerId, call: ServerCall) -> Result<Value>;
}

pub type BridgeRef = Rc<dyn Bridge>;
