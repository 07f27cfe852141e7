//! The host: owns configuration, pages and termination state, and serves the
//! bridge every page calls back into.
//!
//! All state lives on one thread. Script code may call back into the host at
//! any time a page is running, so the host never holds a borrow of its own
//! state while it calls into a page.

use std::cell::RefCell;
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::rc::{Rc, Weak};
use std::task::{Context, Poll, Waker};

use serde_json::Value;

use crate::bridge::{Bridge, BridgeRef, Version, BRIDGE_NAME};
use crate::config::{Config, USAGE};
use crate::encoding::Encoding;
use crate::error::{HostError, Result};
use crate::filesystem::{FileSystem, FsCall};
use crate::loader::LibraryPath;
use crate::page::{BackendOptions, ConsoleMessage, Engine, Page, PageCall, PageId};
use crate::proxy::ProxySetup;
use crate::registry::Registry;
use crate::resources;
use crate::script::ScriptFile;
use crate::server::{ServerCall, ServerId, WebServer};
use crate::settings::PageSettings;
use crate::terminal::Terminal;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TerminationState {
    pub terminated: bool,
    pub return_code: i32,
}

/// How scripts are loaded and how exit requests are honored.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecutionMode {
    Normal,
    /// Scripts run in the debug harness. Only `debugExit` ends the session.
    Debug { port: u16 },
}

impl ExecutionMode {
    pub fn from_config(config: &Config) -> Self {
        if config.debug {
            ExecutionMode::Debug {
                port: config.remote_debug_port,
            }
        } else {
            ExecutionMode::Normal
        }
    }

    pub fn is_debug(self) -> bool {
        matches!(self, ExecutionMode::Debug { .. })
    }

    fn honors_exit(self) -> bool {
        !self.is_debug()
    }

    fn load(self, page: &Page, script: &ScriptFile) -> Result<()> {
        match self {
            ExecutionMode::Normal => page.inject(script),
            ExecutionMode::Debug { port } => {
                page.load_for_debug(script, true)?;
                if let Err(err) = page.show_inspector(port) {
                    tracing::warn!(port, error = %err, "remote inspector unavailable");
                }
                Ok(())
            }
        }
    }
}

/// `"<source>:<line> <message>"`, or just the message when there is no source.
pub fn format_console_message(message: &str, line: i32, source: &str) -> String {
    if source.is_empty() {
        message.to_string()
    } else {
        format!("{}:{} {}", source, line, message)
    }
}

#[derive(Default)]
struct HostState {
    termination: TerminationState,
    default_page: Option<Rc<Page>>,
    registry: Registry,
    /// Pages removed by an exit that may still be on the call stack.
    retired: Vec<Rc<Page>>,
    default_settings: PageSettings,
    /// Pages whose console goes straight to the terminal.
    subscriptions: HashSet<PageId>,
    filesystem: Option<Rc<FileSystem>>,
    script_encoding: Encoding,
    /// Proxy every page's network access goes through.
    proxy: Option<ProxySetup>,
    /// Woken by an exit while an idle debug session waits.
    exit_waker: Option<Waker>,
}

impl Drop for HostState {
    fn drop(&mut self) {
        self.default_page = None;
        for page in self.registry.drain() {
            drop(page);
        }
        for page in self.retired.drain(..) {
            drop(page);
        }
    }
}

struct HostInner {
    config: Rc<Config>,
    engine: Rc<dyn Engine>,
    terminal: Rc<Terminal>,
    mode: ExecutionMode,
    bridge: BridgeRef,
    state: RefCell<HostState>,
}

pub struct Host {
    inner: Rc<HostInner>,
}

impl Host {
    pub fn new(config: Config, engine: Rc<dyn Engine>, terminal: Rc<Terminal>) -> Self {
        let config = Rc::new(config);
        let mode = ExecutionMode::from_config(&config);
        let inner = Rc::new_cyclic(|weak: &Weak<HostInner>| HostInner {
            bridge: Rc::new(HostBridge(weak.clone())),
            config,
            engine,
            terminal,
            mode,
            state: RefCell::new(HostState::default()),
        });

        let host = Host { inner };
        host.initialize();
        host
    }

    fn initialize(&self) {
        let config = self.inner.config.clone();
        let terminal = &self.inner.terminal;

        if config.version_flag {
            self.state_mut().termination.terminated = true;
            terminal.cout(&Version::current().to_string());
            return;
        }

        if let Some(err) = config.configuration_error() {
            terminal.cerr(&err.to_string());
            self.state_mut().termination.terminated = true;
            return;
        }

        let page = self.new_page();
        self.state_mut().default_page = Some(page.clone());

        let Some(script) = self.script_path() else {
            terminal.cout(USAGE);
            return;
        };

        let proxy = ProxySetup::from_config(&config);
        match proxy.effective() {
            Some(descriptor) => tracing::info!(proxy = %descriptor, "using proxy"),
            None => tracing::debug!("no proxy configured"),
        }
        self.state_mut().proxy = Some(proxy);

        if let Err(err) = terminal.set_encoding(&config.output_encoding) {
            tracing::warn!(error = %err, "keeping default output encoding");
        }
        match Encoding::for_label(&config.script_encoding) {
            Ok(encoding) => self.state_mut().script_encoding = encoding,
            Err(err) => tracing::warn!(error = %err, "keeping default script encoding"),
        }

        self.state_mut().subscriptions.insert(page.id());

        let defaults = PageSettings::defaults_from(&config, &page.user_agent());
        page.apply_settings(&defaults);
        self.state_mut().default_settings = defaults;

        page.set_library_path(script_directory(&script));

        self.on_initialized(&page);
    }

    /// Expose the bridge in `page` and evaluate the bootstrap script there.
    pub fn on_initialized(&self, page: &Page) {
        if let Err(err) = page.expose_bridge(BRIDGE_NAME) {
            tracing::error!(page = %page.id(), error = %err, "failed to expose bridge");
            return;
        }
        let bootstrap = resources::read_utf8(resources::BOOTSTRAP);
        if let Err(err) = page.evaluate_trusted(resources::BOOTSTRAP, &bootstrap) {
            tracing::error!(page = %page.id(), error = %err, "bootstrap script failed");
        }
    }

    /// Run the script in the default page. True when it loaded and did not ask to exit.
    pub fn execute(&self) -> bool {
        let executed = self.run_script();
        self.release_retired();
        executed
    }

    fn run_script(&self) -> bool {
        if self.is_terminated() {
            return false;
        }
        let Some(path) = self.script_path() else {
            return false;
        };
        let Some(page) = self.default_page() else {
            return false;
        };

        let encoding = self.state().script_encoding;
        let base = std::env::current_dir().unwrap_or_default();
        tracing::debug!(script = %path.display(), mode = ?self.inner.mode, "executing script");

        let loaded = ScriptFile::load(&path, &encoding, &base)
            .and_then(|script| self.inner.mode.load(&page, &script));
        drop(page);

        match loaded {
            Ok(()) => !self.is_terminated(),
            // The script asked to exit while it was loading; its code stands.
            Err(_) if self.is_terminated() => false,
            Err(err) => {
                self.inner.terminal.cerr(&err.to_string());
                self.state_mut().termination.return_code = -1;
                false
            }
        }
    }

    /// Drive every page until an exit is requested. Outside debug mode the run
    /// also ends once no page has work left.
    pub async fn run_until_exit(&self) -> i32 {
        std::future::poll_fn(|cx| self.poll_pages(cx)).await;
        self.release_retired();
        self.return_code()
    }

    fn poll_pages(&self, cx: &mut Context<'_>) -> Poll<()> {
        let pages = self.state().registry.pages().to_vec();
        let mut pending = false;

        for page in pages {
            if self.is_terminated() {
                return Poll::Ready(());
            }
            match page.poll_event_loop(cx) {
                Poll::Ready(Ok(())) => {}
                Poll::Ready(Err(err)) => {
                    self.report_page_error(&page, &err);
                    cx.waker().wake_by_ref();
                    pending = true;
                }
                Poll::Pending => pending = true,
            }
        }

        if self.is_terminated() {
            return Poll::Ready(());
        }
        if pending {
            return Poll::Pending;
        }
        if self.inner.mode.is_debug() {
            self.state_mut().exit_waker = Some(cx.waker().clone());
            return Poll::Pending;
        }
        Poll::Ready(())
    }

    fn report_page_error(&self, page: &Page, err: &HostError) {
        self.report_error(page.id(), &err.to_string());
    }

    /// An uncaught script error no `onError` hook handled.
    pub fn report_error(&self, page: PageId, message: &str) {
        if self.is_terminated() {
            return;
        }
        if self.state().subscriptions.contains(&page) {
            self.inner.terminal.cerr(message);
        } else {
            tracing::warn!(%page, error = message, "uncaught error in page");
        }
    }

    /// A new page with the default settings and the script's directory as its
    /// library path. The `phantom` bridge is not exposed in it.
    pub fn create_web_page(&self) -> Rc<Page> {
        let page = self.new_page();
        let defaults = self.state().default_settings.clone();
        page.apply_settings(&defaults);
        if let Some(script) = self.script_path() {
            page.set_library_path(script_directory(&script));
        }
        page
    }

    /// Servers get neither the default settings nor a library path.
    pub fn create_web_server(&self) -> Rc<WebServer> {
        let mut state = self.state_mut();
        let id = state.registry.next_server_id();
        let server = Rc::new(WebServer::new(id, self.inner.config.clone()));
        state.registry.add_server(server.clone());
        server
    }

    /// The host's filesystem service, created on first use.
    pub fn create_filesystem(&self) -> Rc<FileSystem> {
        self.state_mut()
            .filesystem
            .get_or_insert_with(|| Rc::new(FileSystem::new()))
            .clone()
    }

    pub fn load_module_source(&self, name: &str) -> String {
        resources::read_utf8(&resources::module_path(name))
    }

    /// Inject the file at `path`, relative to the default page's library path.
    pub fn inject_js(&self, path: &str) -> bool {
        let Some(page) = self.default_page() else {
            return false;
        };
        match self
            .resolve_injection(path)
            .and_then(|script| page.inject(&script))
        {
            Ok(()) => true,
            Err(err) => {
                tracing::warn!(path, error = %err, "injectJs failed");
                false
            }
        }
    }

    pub fn resolve_injection(&self, path: &str) -> Result<ScriptFile> {
        let base = self
            .default_page()
            .map(|page| page.library_path())
            .unwrap_or_default();
        ScriptFile::load(Path::new(path), &Encoding::default(), &base)
    }

    /// Terminate the run. Ignored in debug mode, where only `debug_exit` ends the session.
    pub fn exit(&self, code: i32) {
        if self.inner.mode.honors_exit() {
            self.do_exit(code);
        } else {
            self.inner
                .terminal
                .cout("phantom.exit() called but not quitting in debug mode.");
        }
    }

    pub fn debug_exit(&self, code: i32) {
        self.do_exit(code);
    }

    fn do_exit(&self, code: i32) {
        if self.is_terminated() {
            tracing::debug!(code, "exit requested after termination");
            self.state_mut().termination.return_code = code;
            return;
        }

        if self.inner.mode.is_debug() {
            let pages = self.state().registry.pages().to_vec();
            for page in pages {
                page.cleanup_debug();
            }
        }

        let pages = {
            let mut state = self.state_mut();
            state.termination = TerminationState {
                terminated: true,
                return_code: code,
            };
            state.default_page = None;
            state.subscriptions.clear();
            let pages = state.registry.drain();
            state.retired.extend(pages.iter().cloned());
            pages
        };

        for page in &pages {
            page.interrupt();
        }
        if let Some(waker) = self.state_mut().exit_waker.take() {
            waker.wake();
        }
        tracing::debug!(code, pages = pages.len(), "host terminated");
    }

    /// Drop pages retired by an exit, newest first. Call only when no page is running.
    fn release_retired(&self) {
        let retired = std::mem::take(&mut self.state_mut().retired);
        for page in retired {
            if Rc::strong_count(&page) > 1 {
                tracing::warn!(page = %page.id(), "retired page still referenced");
            }
            drop(page);
        }
    }

    pub fn print_console_message(&self, page: PageId, message: ConsoleMessage) {
        let (subscribed, target) = {
            let state = self.state();
            (state.subscriptions.contains(&page), state.registry.page(page))
        };

        if subscribed {
            self.inner.terminal.cout(&format_console_message(
                &message.message,
                message.line,
                &message.source,
            ));
        } else if let Some(target) = target {
            target.record_console_message(message);
        } else {
            tracing::debug!(%page, "console message from a released page");
        }
    }

    pub fn config(&self) -> &Config {
        &self.inner.config
    }

    pub fn mode(&self) -> ExecutionMode {
        self.inner.mode
    }

    pub fn bridge(&self) -> BridgeRef {
        self.inner.bridge.clone()
    }

    /// The proxy applied at startup. None until a script path is known.
    pub fn proxy(&self) -> Option<ProxySetup> {
        self.state().proxy.clone()
    }

    pub fn is_terminated(&self) -> bool {
        self.state().termination.terminated
    }

    pub fn return_code(&self) -> i32 {
        self.state().termination.return_code
    }

    pub fn termination(&self) -> TerminationState {
        self.state().termination
    }

    pub fn default_page(&self) -> Option<Rc<Page>> {
        self.state().default_page.clone()
    }

    pub fn default_page_settings(&self) -> PageSettings {
        self.state().default_settings.clone()
    }

    pub fn page(&self, id: PageId) -> Option<Rc<Page>> {
        self.state().registry.page(id)
    }

    pub fn server(&self, id: ServerId) -> Option<Rc<WebServer>> {
        self.state().registry.server(id)
    }

    pub fn page_count(&self) -> usize {
        self.state().registry.pages().len()
    }

    pub fn server_count(&self) -> usize {
        self.state().registry.servers().len()
    }

    fn script_path(&self) -> Option<PathBuf> {
        let config = &self.inner.config;
        if config.help_flag {
            return None;
        }
        config
            .script_file
            .clone()
            .filter(|path| !path.as_os_str().is_empty())
    }

    fn new_page(&self) -> Rc<Page> {
        let id = self.state_mut().registry.next_page_id();
        let library_path = LibraryPath::default();
        let backend = self.inner.engine.create_backend(BackendOptions {
            id,
            bridge: self.inner.bridge.clone(),
            library_path: library_path.clone(),
            inspector: self.inner.mode.is_debug(),
        });

        let page = Rc::new(Page::new(id, backend, library_path));
        self.state_mut().registry.add_page(page.clone());
        tracing::debug!(page = %id, "page created");
        page
    }

    fn state(&self) -> std::cell::Ref<'_, HostState> {
        self.inner.state.borrow()
    }

    fn state_mut(&self) -> std::cell::RefMut<'_, HostState> {
        self.inner.state.borrow_mut()
    }
}

fn script_directory(script: &Path) -> PathBuf {
    std::path::absolute(script)
        .ok()
        .and_then(|path| path.parent().map(Path::to_path_buf))
        .unwrap_or_default()
}

/// The bridge handed to pages. Holds the host weakly; once the host is gone
/// every call is a no-op.
pub(crate) struct HostBridge(Weak<HostInner>);

impl HostBridge {
    /// A bridge with no host behind it.
    #[cfg(test)]
    pub(crate) fn detached() -> Self {
        Self(Weak::new())
    }

    fn host(&self) -> Option<Host> {
        self.0.upgrade().map(|inner| Host { inner })
    }

    fn try_host(&self) -> Result<Host> {
        self.host()
            .ok_or_else(|| HostError::Engine(anyhow::anyhow!("host is shut down")))
    }
}

impl Bridge for HostBridge {
    fn console_message(&self, page: PageId, message: ConsoleMessage) {
        if let Some(host) = self.host() {
            host.print_console_message(page, message);
        }
    }

    fn report_error(&self, page: PageId, message: &str) {
        if let Some(host) = self.host() {
            host.report_error(page, message);
        }
    }

    fn exit(&self, code: i32) {
        if let Some(host) = self.host() {
            host.exit(code);
        }
    }

    fn debug_exit(&self, code: i32) {
        if let Some(host) = self.host() {
            host.debug_exit(code);
        }
    }

    fn is_terminated(&self) -> bool {
        self.host().map_or(true, |host| host.is_terminated())
    }

    fn create_web_page(&self) -> Option<PageId> {
        self.host().map(|host| host.create_web_page().id())
    }

    fn create_web_server(&self) -> Option<ServerId> {
        self.host().map(|host| host.create_web_server().id())
    }

    fn create_filesystem(&self) {
        if let Some(host) = self.host() {
            host.create_filesystem();
        }
    }

    fn load_module_source(&self, name: &str) -> String {
        self.host()
            .map(|host| host.load_module_source(name))
            .unwrap_or_default()
    }

    fn inject_js(&self, path: &str) -> bool {
        self.host().is_some_and(|host| host.inject_js(path))
    }

    fn default_page(&self) -> Option<PageId> {
        self.host()?.default_page().map(|page| page.id())
    }

    fn resolve_injection(&self, path: &str) -> Result<ScriptFile> {
        self.try_host()?.resolve_injection(path)
    }

    fn version(&self) -> Version {
        Version::current()
    }

    fn args(&self) -> Vec<String> {
        self.host()
            .map(|host| host.config().script_args.clone())
            .unwrap_or_default()
    }

    fn default_page_settings(&self) -> PageSettings {
        self.host()
            .map(|host| host.default_page_settings())
            .unwrap_or_default()
    }

    fn library_path(&self) -> String {
        self.host()
            .and_then(|host| host.default_page())
            .map(|page| page.library_path().display().to_string())
            .unwrap_or_default()
    }

    fn set_library_path(&self, path: &str) {
        if let Some(page) = self.host().and_then(|host| host.default_page()) {
            page.set_library_path(path);
        }
    }

    fn output_encoding(&self) -> String {
        self.host()
            .map(|host| host.inner.terminal.encoding().name().to_string())
            .unwrap_or_default()
    }

    fn set_output_encoding(&self, label: &str) -> bool {
        let Some(host) = self.host() else {
            return false;
        };
        match host.inner.terminal.set_encoding(label) {
            Ok(()) => true,
            Err(err) => {
                tracing::warn!(error = %err, "output encoding unchanged");
                false
            }
        }
    }

    fn script_name(&self) -> String {
        self.host()
            .and_then(|host| host.script_path())
            .and_then(|path| path.file_name().map(|name| name.to_string_lossy().into_owned()))
            .unwrap_or_default()
    }

    fn filesystem(&self, call: FsCall) -> Result<Value> {
        self.try_host()?.create_filesystem().dispatch(call)
    }

    fn page(&self, id: PageId, call: PageCall) -> Result<Value> {
        let page = self
            .try_host()?
            .page(id)
            .ok_or(HostError::UnknownPage(id.0))?;
        page.dispatch(call)
    }

    fn server(&self, id: ServerId, call: ServerCall) -> Result<Value> {
        let server = self
            .try_host()?
            .server(id)
            .ok_or(HostError::UnknownServer(id.0))?;
        server.dispatch(call)
    }
}
