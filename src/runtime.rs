//! V8 pages - one deno_core isolate per page.
//!
//! Each page gets:
//! - the `phantom_bridge` ops, with the host bridge and page id in op state
//! - console forwarding and timers from the page glue
//! - a module loader rooted at the page's library path
//!
//! Isolates created on one thread must be dropped newest first. The host
//! guarantees that order.

use std::rc::Rc;
use std::task::{Context, Poll};

use anyhow::Error;
use deno_core::{v8, JsRuntime, PollEventLoopOptions, RuntimeOptions};

use crate::inspector::Inspector;
use crate::loader::LibraryLoader;
use crate::ops::phantom_bridge;
use crate::page::{BackendOptions, Engine, Interrupt, PageBackend, PageId};
use crate::resources;
use crate::script::ScriptFile;

pub const DEFAULT_USER_AGENT: &str = concat!(
    "Mozilla/5.0 (Unknown; Linux x86_64) AppleWebKit/538.1 (KHTML, like Gecko) phantom-host/",
    env!("CARGO_PKG_VERSION"),
    " Safari/538.1"
);

/// Builds pages on deno_core.
#[derive(Debug, Default)]
pub struct V8Engine;

impl V8Engine {
    pub fn new() -> Self {
        Self
    }
}

impl Engine for V8Engine {
    fn create_backend(&self, options: BackendOptions) -> Box<dyn PageBackend> {
        Box::new(V8Page::new(options))
    }
}

pub struct V8Page {
    id: PageId,
    runtime: JsRuntime,
    isolate: v8::IsolateHandle,
}

impl V8Page {
    pub fn new(options: BackendOptions) -> Self {
        let loader = LibraryLoader::new(options.library_path);

        let mut runtime = JsRuntime::new(RuntimeOptions {
            module_loader: Some(Rc::new(loader)),
            extensions: vec![phantom_bridge::init_ops(options.bridge, options.id)],
            inspector: options.inspector,
            ..Default::default()
        });

        let glue = format!(
            "({}\n)(Deno.core.ops);",
            resources::read_utf8(resources::PAGE_GLUE)
        );
        if let Err(err) = runtime.execute_script(resources::PAGE_GLUE, glue) {
            tracing::error!(page = %options.id, error = %err, "page glue failed");
        }

        let isolate = runtime.v8_isolate().thread_safe_handle();
        Self {
            id: options.id,
            runtime,
            isolate,
        }
    }

    fn run(&mut self, name: String, source: String) -> Result<v8::Global<v8::Value>, Error> {
        self.runtime.execute_script(name.leak(), source)
    }
}

impl PageBackend for V8Page {
    fn user_agent(&self) -> String {
        DEFAULT_USER_AGENT.to_string()
    }

    fn interrupt_handle(&self) -> Interrupt {
        let isolate = self.isolate.clone();
        Box::new(move || {
            isolate.terminate_execution();
        })
    }

    fn expose_bridge(&mut self, name: &str) -> Result<(), Error> {
        let glue = format!(
            "globalThis[{}] = ({}\n)(Deno.core.ops);",
            serde_json::to_string(name)?,
            resources::read_utf8(resources::BRIDGE_GLUE)
        );
        self.runtime.execute_script(resources::BRIDGE_GLUE, glue)?;
        Ok(())
    }

    fn evaluate(&mut self, name: &str, source: &str) -> Result<String, Error> {
        let value = self.run(name.to_string(), source.to_string())?;
        let scope = &mut self.runtime.handle_scope();
        let local = v8::Local::new(scope, value);
        Ok(local.to_rust_string_lossy(scope))
    }

    fn inject(&mut self, script: &ScriptFile) -> Result<(), Error> {
        self.run(script.resource_name(), script.source.clone())?;
        Ok(())
    }

    fn load_for_debug(&mut self, script: &ScriptFile, autorun: bool) -> Result<(), Error> {
        self.run(script.resource_name(), script.debug_harness())?;
        if autorun {
            self.runtime.execute_script("<debug>", "__run();")?;
        }
        Ok(())
    }

    fn open_inspector(&mut self, port: u16) -> Result<Inspector, Error> {
        tracing::debug!(page = %self.id, port, "opening remote inspector");
        Inspector::bind(port)
    }

    fn poll_event_loop(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Error>> {
        self.runtime
            .poll_event_loop(cx, PollEventLoopOptions::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::host::Host;
    use crate::loader::LibraryPath;
    use crate::terminal::Terminal;
    use crate::testing::{null_bridge, SharedBuffer};
    use std::fs;
    use tempfile::tempdir;

    fn page() -> V8Page {
        V8Page::new(BackendOptions {
            id: PageId(1),
            bridge: null_bridge(),
            library_path: LibraryPath::default(),
            inspector: false,
        })
    }

    fn host_for(body: &str) -> (tempfile::TempDir, Host, SharedBuffer, SharedBuffer) {
        let dir = tempdir().unwrap();
        let path = dir.path().join("run.js");
        fs::write(&path, body).unwrap();

        let out = SharedBuffer::default();
        let err = SharedBuffer::default();
        let host = Host::new(
            Config {
                script_file: Some(path),
                ..Default::default()
            },
            Rc::new(V8Engine::new()),
            Rc::new(Terminal::new(out.clone(), err.clone())),
        );
        (dir, host, out, err)
    }

    #[test]
    fn test_evaluate_stringifies_result() {
        let mut page = page();
        assert_eq!(page.evaluate("<test>", "6 * 7").unwrap(), "42");
        assert_eq!(page.evaluate("<test>", "undefined").unwrap(), "undefined");

        let err = page.evaluate("<test>", "throw new Error('boom')").unwrap_err();
        assert!(err.to_string().contains("boom"));
    }

    #[test]
    fn test_bridge_is_exposed_by_name() {
        let mut page = page();
        page.expose_bridge("phantom").unwrap();
        assert_eq!(
            page.evaluate("<test>", "typeof phantom.exit").unwrap(),
            "function"
        );
    }

    #[test]
    fn test_debug_harness_autoruns() {
        let mut page = page();
        let script = ScriptFile {
            path: "run.js".into(),
            source: String::from("globalThis.ran = true;"),
        };
        page.load_for_debug(&script, false).unwrap();
        assert_eq!(page.evaluate("<test>", "String(globalThis.ran)").unwrap(), "undefined");

        page.load_for_debug(&script, true).unwrap();
        assert_eq!(page.evaluate("<test>", "String(globalThis.ran)").unwrap(), "true");
    }

    #[tokio::test]
    async fn test_script_logs_and_exits() {
        let (dir, host, out, _err) = host_for("console.log('hi');\nphantom.exit(3);\nconsole.log('never');");

        assert!(!host.execute());
        assert_eq!(host.return_code(), 3);
        let expected = format!("{}:1 hi", dir.path().join("run.js").display());
        assert_eq!(out.lines(), vec![expected]);
    }

    #[tokio::test]
    async fn test_require_and_timers() {
        let (_dir, host, out, _err) = host_for(
            "var system = require('system');\n\
             setTimeout(function () { console.log(system.args[0]); phantom.exit(0); }, 1);",
        );

        assert!(host.execute());
        assert_eq!(host.run_until_exit().await, 0);
        assert!(out.lines()[0].ends_with(" run.js"));
    }

    #[tokio::test]
    async fn test_unknown_module_is_a_script_error() {
        let (_dir, host, _out, err) = host_for("require('nope');");

        assert!(!host.execute());
        assert_eq!(host.return_code(), -1);
        assert!(err.lines()[0].contains("Unknown module nope for require()"));
    }

    #[tokio::test]
    async fn test_inject_js_runs_in_default_page() {
        let (dir, host, out, _err) = host_for("phantom.injectJs('lib.js');\nconsole.log(String(libLoaded));");
        fs::write(dir.path().join("lib.js"), "var libLoaded = true;").unwrap();

        assert!(host.execute());
        assert!(out.lines()[0].ends_with(":2 true"));
    }

    #[tokio::test]
    async fn test_inject_js_syntax_error_returns_false() {
        let (dir, host, out, err) = host_for("var r = phantom.injectJs('bad.js');\nconsole.log('result=' + r);");
        fs::write(dir.path().join("bad.js"), "syntax error(").unwrap();

        assert!(host.execute());
        assert_eq!(host.return_code(), 0);
        assert!(out.lines()[0].ends_with(":2 result=false"));
        assert!(err.lines()[0].starts_with("SyntaxError"));
    }

    #[tokio::test]
    async fn test_inject_js_error_reaches_on_error() {
        let (dir, host, out, err) = host_for(
            "phantom.onError = function (message) { console.log('hook ' + message); };\n\
             console.log('result=' + phantom.injectJs('throws.js'));",
        );
        fs::write(dir.path().join("throws.js"), "throw new Error('lib failed');").unwrap();

        assert!(host.execute());
        let lines = out.lines();
        assert!(lines[0].ends_with(":1 hook Error: lib failed"));
        assert!(lines[1].ends_with(":2 result=false"));
        assert!(err.lines().is_empty());
    }

    #[tokio::test]
    async fn test_injected_console_is_labeled_with_its_own_file() {
        let (dir, host, out, _err) = host_for("phantom.injectJs('lib.js');");
        fs::write(dir.path().join("lib.js"), "console.log('from lib');").unwrap();

        assert!(host.execute());
        let expected = format!("{}:1 from lib", dir.path().join("lib.js").display());
        assert_eq!(out.lines(), vec![expected]);
    }

    #[tokio::test]
    async fn test_timer_errors_go_to_on_error() {
        let (_dir, host, out, _err) = host_for(
            "phantom.onError = function (message) { console.log('caught ' + message); phantom.exit(4); };\n\
             setTimeout(function () { throw new Error('late'); }, 1);",
        );

        assert!(host.execute());
        assert_eq!(host.run_until_exit().await, 4);
        assert!(out.lines()[0].ends_with(":1 caught Error: late"));
    }

    #[tokio::test]
    async fn test_unhandled_timer_error_goes_to_stderr() {
        let (_dir, host, _out, err) = host_for("setTimeout(function () { throw new Error('late'); }, 1);");

        assert!(host.execute());
        assert_eq!(host.run_until_exit().await, 0);
        assert!(err.lines()[0].starts_with("Error: late"));
    }
}
