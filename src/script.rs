//! Reading script files from disk.

use std::path::{Path, PathBuf};

use crate::encoding::Encoding;
use crate::error::{HostError, Result};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScriptFile {
    pub path: PathBuf,
    pub source: String,
}

impl ScriptFile {
    /// Read `path`, resolved against `base` when relative, decoded with `encoding`.
    pub fn load(path: &Path, encoding: &Encoding, base: &Path) -> Result<Self> {
        let path = if path.is_relative() {
            base.join(path)
        } else {
            path.to_path_buf()
        };

        let bytes = std::fs::read(&path).map_err(|source| HostError::ScriptLoad {
            path: path.clone(),
            source,
        })?;

        let mut source = encoding.decode(&bytes);
        // Keep line numbers intact: comment the interpreter line out instead of dropping it.
        if source.starts_with("#!") {
            source.insert_str(0, "//");
        }

        Ok(Self { path, source })
    }

    /// Name the engine reports in stack traces and console locations.
    pub fn resource_name(&self) -> String {
        self.path.display().to_string()
    }

    /// Source wrapped for step debugging: nothing runs until `__run()` is called.
    pub fn debug_harness(&self) -> String {
        format!("function __run() {{\ndebugger;\n{}\n}}", self.source)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::tempdir;

    #[test]
    fn test_relative_paths_resolve_against_base() {
        let dir = tempdir().unwrap();
        fs::write(dir.path().join("run.js"), "console.log(1);").unwrap();

        let script = ScriptFile::load(Path::new("run.js"), &Encoding::default(), dir.path()).unwrap();
        assert_eq!(script.path, dir.path().join("run.js"));
        assert_eq!(script.source, "console.log(1);");
    }

    #[test]
    fn test_shebang_is_commented_out() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("tool.js");
        fs::write(&path, "#!/usr/bin/env phantom\nphantom.exit();").unwrap();

        let script = ScriptFile::load(&path, &Encoding::default(), Path::new("/")).unwrap();
        assert_eq!(script.source, "//#!/usr/bin/env phantom\nphantom.exit();");
    }

    #[test]
    fn test_script_encoding_is_applied() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("latin.js");
        fs::write(&path, [b'\'', 0xe9, b'\'']).unwrap();

        let latin1 = Encoding::for_label("latin1").unwrap();
        let script = ScriptFile::load(&path, &latin1, dir.path()).unwrap();
        assert_eq!(script.source, "'é'");
    }

    #[test]
    fn test_missing_file() {
        let dir = tempdir().unwrap();
        let err = ScriptFile::load(Path::new("nope.js"), &Encoding::default(), dir.path()).unwrap_err();
        assert!(matches!(err, HostError::ScriptLoad { .. }));
        assert!(err.to_string().contains("nope.js"));
    }

    #[test]
    fn test_debug_harness_defers_execution() {
        let script = ScriptFile {
            path: PathBuf::from("run.js"),
            source: String::from("work();"),
        };
        assert_eq!(script.debug_harness(), "function __run() {\ndebugger;\nwork();\n}");
    }
}
