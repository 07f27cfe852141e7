//! Filesystem access for scripts. One instance per host, created on first use.

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf, MAIN_SEPARATOR_STR};

use serde::Deserialize;
use serde_json::{json, Value};

use crate::error::{HostError, Result};

/// Calls arriving from the `fs` module.
#[derive(Debug, Deserialize)]
#[serde(tag = "op", rename_all = "camelCase")]
pub enum FsCall {
    Separator,
    WorkingDirectory,
    Exists { path: String },
    IsFile { path: String },
    IsDirectory { path: String },
    Read { path: String },
    Write {
        path: String,
        content: String,
        #[serde(default)]
        mode: WriteMode,
    },
    Remove { path: String },
    MakeDirectory { path: String },
    MakeTree { path: String },
    RemoveTree { path: String },
    List { path: String },
    Absolute { path: String },
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Deserialize)]
pub enum WriteMode {
    #[default]
    #[serde(rename = "w")]
    Truncate,
    #[serde(rename = "a")]
    Append,
}

#[derive(Debug, Default)]
pub struct FileSystem {}

fn io_error<'a>(op: &'static str, path: &'a Path) -> impl FnOnce(std::io::Error) -> HostError + 'a {
    move |source| HostError::Filesystem {
        op,
        path: path.to_path_buf(),
        source,
    }
}

impl FileSystem {
    pub fn new() -> Self {
        Self {}
    }

    pub fn dispatch(&self, call: FsCall) -> Result<Value> {
        Ok(match call {
            FsCall::Separator => json!(MAIN_SEPARATOR_STR),
            FsCall::WorkingDirectory => json!(self.working_directory()?.display().to_string()),
            FsCall::Exists { path } => json!(Path::new(&path).exists()),
            FsCall::IsFile { path } => json!(Path::new(&path).is_file()),
            FsCall::IsDirectory { path } => json!(Path::new(&path).is_dir()),
            FsCall::Read { path } => json!(self.read(Path::new(&path))?),
            FsCall::Write {
                path,
                content,
                mode,
            } => {
                self.write(Path::new(&path), &content, mode)?;
                Value::Null
            }
            FsCall::Remove { path } => {
                let path = Path::new(&path);
                fs::remove_file(path).map_err(io_error("Unable to remove file", path))?;
                Value::Null
            }
            FsCall::MakeDirectory { path } => json!(fs::create_dir(&path).is_ok()),
            FsCall::MakeTree { path } => json!(fs::create_dir_all(&path).is_ok()),
            FsCall::RemoveTree { path } => {
                let path = Path::new(&path);
                fs::remove_dir_all(path).map_err(io_error("Unable to remove directory", path))?;
                Value::Null
            }
            FsCall::List { path } => json!(self.list(Path::new(&path))?),
            FsCall::Absolute { path } => json!(self.absolute(Path::new(&path))?.display().to_string()),
        })
    }

    pub fn working_directory(&self) -> Result<PathBuf> {
        std::env::current_dir().map_err(io_error("Unable to read working directory", Path::new(".")))
    }

    pub fn read(&self, path: &Path) -> Result<String> {
        fs::read_to_string(path).map_err(io_error("Unable to read file", path))
    }

    pub fn write(&self, path: &Path, content: &str, mode: WriteMode) -> Result<()> {
        let mut file = fs::OpenOptions::new()
            .create(true)
            .write(true)
            .append(mode == WriteMode::Append)
            .truncate(mode == WriteMode::Truncate)
            .open(path)
            .map_err(io_error("Unable to open file", path))?;
        file.write_all(content.as_bytes())
            .map_err(io_error("Unable to write file", path))
    }

    /// Entry names including `.` and `..`, sorted.
    pub fn list(&self, path: &Path) -> Result<Vec<String>> {
        let mut names = vec![String::from("."), String::from("..")];
        for entry in fs::read_dir(path).map_err(io_error("Unable to list directory", path))? {
            let entry = entry.map_err(io_error("Unable to list directory", path))?;
            names.push(entry.file_name().to_string_lossy().into_owned());
        }
        names[2..].sort();
        Ok(names)
    }

    pub fn absolute(&self, path: &Path) -> Result<PathBuf> {
        std::path::absolute(path).map_err(io_error("Unable to resolve path", path))
    }
}
