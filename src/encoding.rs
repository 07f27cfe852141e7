//! Named text encodings for the terminal and the script-file reader.

use crate::error::{HostError, Result};

/// A resolved charset. Defaults to UTF-8.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Encoding {
    inner: &'static encoding_rs::Encoding,
}

impl Default for Encoding {
    fn default() -> Self {
        Self {
            inner: encoding_rs::UTF_8,
        }
    }
}

impl Encoding {
    /// Look up an encoding by label (`utf8`, `UTF-8`, `latin1`, `shift_jis`, ...).
    pub fn for_label(label: &str) -> Result<Self> {
        encoding_rs::Encoding::for_label(label.trim().as_bytes())
            .map(|inner| Self { inner })
            .ok_or_else(|| HostError::UnknownEncoding(label.to_string()))
    }

    /// Canonical name, e.g. `UTF-8`.
    pub fn name(&self) -> &'static str {
        self.inner.name()
    }

    pub fn decode(&self, bytes: &[u8]) -> String {
        let (text, _, _) = self.inner.decode(bytes);
        text.into_owned()
    }

    pub fn encode(&self, text: &str) -> Vec<u8> {
        let (bytes, _, _) = self.inner.encode(text);
        bytes.into_owned()
    }
}
