//! Script environments ("pages") and the engine seam they are built on.

use std::cell::RefCell;
use std::collections::VecDeque;
use std::fmt;
use std::path::{Path, PathBuf};
use std::task::{Context, Poll};

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::bridge::BridgeRef;
use crate::encoding::Encoding;
use crate::error::{HostError, Result};
use crate::inspector::Inspector;
use crate::loader::LibraryPath;
use crate::script::ScriptFile;
use crate::settings::{PageSettings, SettingKey};

/// Handle by which scripts refer to a page.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PageId(pub u32);

impl fmt::Display for PageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ConsoleMessage {
    pub message: String,
    pub line: i32,
    pub source: String,
}

/// Everything a backend needs to build one page.
pub struct BackendOptions {
    pub id: PageId,
    pub bridge: BridgeRef,
    pub library_path: LibraryPath,
    /// Create the page with the V8 inspector attached.
    pub inspector: bool,
}

/// Messages kept for a page nobody relays. The oldest are dropped first.
pub const CONSOLE_QUEUE_LIMIT: usize = 1000;

/// Stops whatever script is running in a page. Callable while the page is busy.
pub type Interrupt = Box<dyn Fn()>;

/// Builds page backends. Creation cannot fail recoverably.
pub trait Engine {
    fn create_backend(&self, options: BackendOptions) -> Box<dyn PageBackend>;
}

/// One running script environment as seen by the host.
pub trait PageBackend {
    fn user_agent(&self) -> String;

    fn interrupt_handle(&self) -> Interrupt;

    /// Expose the bridge in the global scope under `name`.
    fn expose_bridge(&mut self, name: &str) -> anyhow::Result<()>;

    /// Evaluate `source` and return the result converted to a string.
    fn evaluate(&mut self, name: &str, source: &str) -> anyhow::Result<String>;

    /// Parse and run a script file in the root scope.
    fn inject(&mut self, script: &ScriptFile) -> anyhow::Result<()>;

    /// Load `script` in the debug harness, running `__run()` when `autorun` is set.
    fn load_for_debug(&mut self, script: &ScriptFile, autorun: bool) -> anyhow::Result<()>;

    fn open_inspector(&mut self, port: u16) -> anyhow::Result<Inspector>;

    fn poll_event_loop(&mut self, cx: &mut Context<'_>) -> Poll<anyhow::Result<()>>;
}

/// Calls arriving from the `webpage` module.
#[derive(Debug, Deserialize)]
#[serde(tag = "op", rename_all = "camelCase")]
pub enum PageCall {
    Evaluate { source: String },
    InjectJs { path: String },
    Settings,
    ApplySettings { settings: Value },
    LibraryPath,
    SetLibraryPath { path: String },
    UserAgent,
    ConsoleMessages,
}

pub struct Page {
    id: PageId,
    backend: RefCell<Box<dyn PageBackend>>,
    interrupt: Interrupt,
    settings: RefCell<PageSettings>,
    library_path: LibraryPath,
    default_user_agent: String,
    console: RefCell<VecDeque<ConsoleMessage>>,
    inspector: RefCell<Option<Inspector>>,
}

impl fmt::Debug for Page {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Page")
            .field("id", &self.id)
            .field("library_path", &self.library_path.get())
            .finish_non_exhaustive()
    }
}

impl Page {
    pub fn new(id: PageId, backend: Box<dyn PageBackend>, library_path: LibraryPath) -> Self {
        Self {
            id,
            interrupt: backend.interrupt_handle(),
            default_user_agent: backend.user_agent(),
            backend: RefCell::new(backend),
            settings: RefCell::new(PageSettings::default()),
            library_path,
            console: RefCell::new(VecDeque::new()),
            inspector: RefCell::new(None),
        }
    }

    pub fn id(&self) -> PageId {
        self.id
    }

    pub fn user_agent(&self) -> String {
        self.settings
            .borrow()
            .text(SettingKey::UserAgent)
            .map(str::to_string)
            .unwrap_or_else(|| self.default_user_agent.clone())
    }

    pub fn settings(&self) -> PageSettings {
        self.settings.borrow().clone()
    }

    /// Overlay `settings` onto the page's current settings.
    pub fn apply_settings(&self, settings: &PageSettings) {
        self.settings.borrow_mut().merge(settings);
    }

    pub fn library_path(&self) -> PathBuf {
        self.library_path.get()
    }

    pub fn set_library_path(&self, path: impl Into<PathBuf>) {
        self.library_path.set(path);
    }

    fn scripting_allowed(&self) -> Result<()> {
        match self.settings.borrow().flag(SettingKey::JavascriptEnabled) {
            Some(false) => Err(HostError::ScriptingDisabled(self.id)),
            _ => Ok(()),
        }
    }

    fn with_backend<T>(&self, f: impl FnOnce(&mut dyn PageBackend) -> anyhow::Result<T>) -> Result<T> {
        let mut backend = self
            .backend
            .try_borrow_mut()
            .map_err(|_| HostError::PageBusy(self.id))?;
        Ok(f(backend.as_mut())?)
    }

    pub fn expose_bridge(&self, name: &str) -> Result<()> {
        self.with_backend(|backend| backend.expose_bridge(name))
    }

    /// Evaluate embedded code regardless of the page's settings.
    pub fn evaluate_trusted(&self, name: &str, source: &str) -> Result<String> {
        self.with_backend(|backend| backend.evaluate(name, source))
    }

    pub fn evaluate(&self, source: &str) -> Result<String> {
        self.scripting_allowed()?;
        self.with_backend(|backend| backend.evaluate("<evaluate>", source))
    }

    pub fn inject(&self, script: &ScriptFile) -> Result<()> {
        self.scripting_allowed()?;
        self.with_backend(|backend| backend.inject(script))
    }

    pub fn load_for_debug(&self, script: &ScriptFile, autorun: bool) -> Result<()> {
        self.scripting_allowed()?;
        self.with_backend(|backend| backend.load_for_debug(script, autorun))
    }

    pub fn show_inspector(&self, port: u16) -> Result<()> {
        let inspector = self.with_backend(|backend| backend.open_inspector(port))?;
        *self.inspector.borrow_mut() = Some(inspector);
        Ok(())
    }

    pub fn inspector_port(&self) -> Option<u16> {
        self.inspector.borrow().as_ref().map(Inspector::port)
    }

    /// Detach the inspector and release its port.
    pub fn cleanup_debug(&self) {
        if let Some(inspector) = self.inspector.borrow_mut().take() {
            tracing::debug!(page = %self.id, port = inspector.port(), "inspector detached");
        }
    }

    pub fn interrupt(&self) {
        (self.interrupt)();
    }

    /// Polls the page's event loop. A page busy further up the stack stays pending.
    pub fn poll_event_loop(&self, cx: &mut Context<'_>) -> Poll<Result<()>> {
        match self.backend.try_borrow_mut() {
            Ok(mut backend) => backend.poll_event_loop(cx).map_err(HostError::from),
            Err(_) => {
                cx.waker().wake_by_ref();
                Poll::Pending
            }
        }
    }

    pub fn record_console_message(&self, message: ConsoleMessage) {
        let mut console = self.console.borrow_mut();
        if console.len() == CONSOLE_QUEUE_LIMIT {
            console.pop_front();
        }
        console.push_back(message);
    }

    pub fn take_console_messages(&self) -> Vec<ConsoleMessage> {
        self.console.borrow_mut().drain(..).collect()
    }

    /// Serve a call from the `webpage` module. Injection is resolved against
    /// this page's library path.
    pub fn dispatch(&self, call: PageCall) -> Result<Value> {
        Ok(match call {
            PageCall::Evaluate { source } => json!(self.evaluate(&source)?),
            PageCall::InjectJs { path } => {
                let base = self.library_path();
                let injected = ScriptFile::load(Path::new(&path), &Encoding::default(), &base)
                    .and_then(|script| self.inject(&script));
                if let Err(err) = &injected {
                    tracing::warn!(page = %self.id, error = %err, "injectJs failed");
                }
                json!(injected.is_ok())
            }
            PageCall::Settings => self.settings().to_json(),
            PageCall::ApplySettings { settings } => {
                let settings = PageSettings::from_json(settings)?;
                self.apply_settings(&settings);
                Value::Null
            }
            PageCall::LibraryPath => json!(self.library_path().display().to_string()),
            PageCall::SetLibraryPath { path } => {
                self.set_library_path(path);
                Value::Null
            }
            PageCall::UserAgent => json!(self.user_agent()),
            PageCall::ConsoleMessages => serde_json::to_value(self.take_console_messages())
                .map_err(anyhow::Error::from)?,
        })
    }
}
