//! Test doubles shared by the unit tests.

use std::cell::{Cell, RefCell};
use std::io::{self, Write};
use std::path::PathBuf;
use std::rc::Rc;
use std::task::{Context, Poll};

use anyhow::anyhow;

use crate::bridge::BridgeRef;
use crate::host::HostBridge;
use crate::inspector::Inspector;
use crate::page::{BackendOptions, Engine, Interrupt, PageBackend, PageId};
use crate::script::ScriptFile;

pub const USER_AGENT: &str = "RecordingEngine/1.0";

/// An in-memory sink that can be inspected after being handed to a [`Terminal`](crate::terminal::Terminal).
#[derive(Debug, Clone, Default)]
pub struct SharedBuffer(Rc<RefCell<Vec<u8>>>);

impl SharedBuffer {
    pub fn bytes(&self) -> Vec<u8> {
        self.0.borrow().clone()
    }

    pub fn lines(&self) -> Vec<String> {
        String::from_utf8_lossy(&self.0.borrow())
            .lines()
            .map(str::to_string)
            .collect()
    }
}

impl Write for SharedBuffer {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0.borrow_mut().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

pub fn null_bridge() -> BridgeRef {
    Rc::new(HostBridge::detached())
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Recorded {
    Created { id: PageId, inspector: bool },
    ExposeBridge(PageId, String),
    Evaluate(PageId, String),
    Inject(PageId, PathBuf),
    LoadForDebug(PageId, PathBuf, bool),
    OpenInspector(PageId, u16),
    Interrupted(PageId),
    Dropped(PageId),
}

type InjectHook = Rc<dyn Fn(&BridgeRef)>;
type PollHook = Rc<dyn Fn(&BridgeRef, u32)>;

#[derive(Default)]
struct Shared {
    events: RefCell<Vec<Recorded>>,
    inject_failure: RefCell<Option<String>>,
    on_inject: RefCell<Option<InjectHook>>,
    on_poll: RefCell<Option<PollHook>>,
}

impl Shared {
    fn record(&self, event: Recorded) {
        self.events.borrow_mut().push(event);
    }
}

/// An engine whose pages record what the host asks of them.
#[derive(Clone, Default)]
pub struct RecordingEngine {
    shared: Rc<Shared>,
}

impl RecordingEngine {
    pub fn events(&self) -> Vec<Recorded> {
        self.shared.events.borrow().clone()
    }

    /// Make every injection fail with `message`.
    pub fn fail_inject(&self, message: &str) {
        *self.shared.inject_failure.borrow_mut() = Some(message.to_string());
    }

    /// Run `hook` with the page's bridge while a script is being injected.
    pub fn on_inject(&self, hook: impl Fn(&BridgeRef) + 'static) {
        *self.shared.on_inject.borrow_mut() = Some(Rc::new(hook));
    }

    /// Keep pages busy, running `hook` with the poll count on every poll.
    pub fn on_poll(&self, hook: impl Fn(&BridgeRef, u32) + 'static) {
        *self.shared.on_poll.borrow_mut() = Some(Rc::new(hook));
    }
}

impl Engine for RecordingEngine {
    fn create_backend(&self, options: BackendOptions) -> Box<dyn PageBackend> {
        self.shared.record(Recorded::Created {
            id: options.id,
            inspector: options.inspector,
        });
        Box::new(RecordingPage {
            id: options.id,
            bridge: options.bridge,
            shared: self.shared.clone(),
            interrupted: Rc::new(Cell::new(false)),
            polls: 0,
        })
    }
}

struct RecordingPage {
    id: PageId,
    bridge: BridgeRef,
    shared: Rc<Shared>,
    interrupted: Rc<Cell<bool>>,
    polls: u32,
}

impl RecordingPage {
    fn run(&self) -> anyhow::Result<()> {
        let hook = self.shared.on_inject.borrow().clone();
        if let Some(hook) = hook {
            hook(&self.bridge);
        }
        if self.interrupted.get() {
            return Err(anyhow!("Uncaught Error: execution terminated"));
        }
        match self.shared.inject_failure.borrow().as_deref() {
            Some(message) => Err(anyhow!("{}", message)),
            None => Ok(()),
        }
    }
}

impl PageBackend for RecordingPage {
    fn user_agent(&self) -> String {
        USER_AGENT.to_string()
    }

    fn interrupt_handle(&self) -> Interrupt {
        let (id, shared, interrupted) = (self.id, self.shared.clone(), self.interrupted.clone());
        Box::new(move || {
            interrupted.set(true);
            shared.record(Recorded::Interrupted(id));
        })
    }

    fn expose_bridge(&mut self, name: &str) -> anyhow::Result<()> {
        self.shared.record(Recorded::ExposeBridge(self.id, name.to_string()));
        Ok(())
    }

    fn evaluate(&mut self, name: &str, source: &str) -> anyhow::Result<String> {
        self.shared.record(Recorded::Evaluate(self.id, name.to_string()));
        Ok(source.to_string())
    }

    fn inject(&mut self, script: &ScriptFile) -> anyhow::Result<()> {
        self.shared.record(Recorded::Inject(self.id, script.path.clone()));
        self.run()
    }

    fn load_for_debug(&mut self, script: &ScriptFile, autorun: bool) -> anyhow::Result<()> {
        self.shared
            .record(Recorded::LoadForDebug(self.id, script.path.clone(), autorun));
        self.run()
    }

    fn open_inspector(&mut self, port: u16) -> anyhow::Result<Inspector> {
        self.shared.record(Recorded::OpenInspector(self.id, port));
        Ok(Inspector::detached(port))
    }

    fn poll_event_loop(&mut self, cx: &mut Context<'_>) -> Poll<anyhow::Result<()>> {
        let hook = self.shared.on_poll.borrow().clone();
        match hook {
            Some(hook) => {
                self.polls += 1;
                hook(&self.bridge, self.polls);
                cx.waker().wake_by_ref();
                Poll::Pending
            }
            None => Poll::Ready(Ok(())),
        }
    }
}

impl Drop for RecordingPage {
    fn drop(&mut self) {
        self.shared.record(Recorded::Dropped(self.id));
    }
}
