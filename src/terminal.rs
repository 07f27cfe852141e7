//! Line-oriented output sinks for everything the user sees.

use std::cell::{Cell, RefCell};
use std::io::Write;

use crate::encoding::Encoding;
use crate::error::Result;

/// Standard output and standard error, written through the output encoding.
pub struct Terminal {
    out: RefCell<Box<dyn Write>>,
    err: RefCell<Box<dyn Write>>,
    encoding: Cell<Encoding>,
}

impl Terminal {
    pub fn new(out: impl Write + 'static, err: impl Write + 'static) -> Self {
        Self {
            out: RefCell::new(Box::new(out)),
            err: RefCell::new(Box::new(err)),
            encoding: Cell::new(Encoding::default()),
        }
    }

    pub fn stdio() -> Self {
        Self::new(std::io::stdout(), std::io::stderr())
    }

    pub fn encoding(&self) -> Encoding {
        self.encoding.get()
    }

    /// Switch the output encoding. An unknown label leaves the current one in place.
    pub fn set_encoding(&self, label: &str) -> Result<()> {
        let encoding = Encoding::for_label(label)?;
        self.encoding.set(encoding);
        Ok(())
    }

    pub fn cout(&self, text: &str) {
        self.write_line(&self.out, text);
    }

    pub fn cerr(&self, text: &str) {
        self.write_line(&self.err, text);
    }

    fn write_line(&self, sink: &RefCell<Box<dyn Write>>, text: &str) {
        let mut bytes = self.encoding.get().encode(text);
        bytes.push(b'\n');

        let mut sink = sink.borrow_mut();
        if let Err(e) = sink.write_all(&bytes).and_then(|_| sink.flush()) {
            tracing::warn!(error = %e, "terminal write failed");
        }
    }
}
