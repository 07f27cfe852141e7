//! Error taxonomy for the host.

use std::path::PathBuf;

use crate::page::PageId;

#[derive(Debug, thiserror::Error)]
pub enum HostError {
    /// Malformed arguments or configuration file.
    #[error("{0}")]
    Configuration(String),

    /// The script file is missing or unreadable.
    #[error("Can't open '{}': {source}", path.display())]
    ScriptLoad {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Missing resource: {0}")]
    MissingResource(String),

    /// The page is already executing further up the call stack.
    #[error("Page {0} is busy")]
    PageBusy(PageId),

    #[error("No such page: {0}")]
    UnknownPage(u32),

    #[error("No such server: {0}")]
    UnknownServer(u32),

    #[error("JavaScript is disabled on page {0}")]
    ScriptingDisabled(PageId),

    #[error("Unknown page setting '{0}'")]
    UnknownSetting(String),

    #[error("Invalid value for page setting '{key}': expected {expected}")]
    InvalidSettingValue { key: String, expected: &'static str },

    #[error("Unknown encoding '{0}'")]
    UnknownEncoding(String),

    #[error("{op} '{}': {source}", path.display())]
    Filesystem {
        op: &'static str,
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error(transparent)]
    Engine(#[from] anyhow::Error),
}

pub type Result<T, E = HostError> = std::result::Result<T, E>;
