//! Module loader resolving imports against a page's library path.
//! Blocks remote specifiers and restricts loading to .js/.mjs files.

use deno_core::{
    anyhow::{anyhow, Error},
    ModuleLoadResponse, ModuleLoader, ModuleSource, ModuleSourceCode, ModuleSpecifier,
    ModuleType, RequestedModuleType, ResolutionKind,
};
use std::cell::RefCell;
use std::path::{Path, PathBuf};
use std::rc::Rc;

/// A page's library path, shared between the page and its module loader.
#[derive(Debug, Clone, Default)]
pub struct LibraryPath(Rc<RefCell<PathBuf>>);

impl LibraryPath {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self(Rc::new(RefCell::new(path.into())))
    }

    pub fn get(&self) -> PathBuf {
        self.0.borrow().clone()
    }

    pub fn set(&self, path: impl Into<PathBuf>) {
        *self.0.borrow_mut() = path.into();
    }

    /// `path` joined onto the library path when relative.
    pub fn resolve(&self, path: &Path) -> PathBuf {
        if path.is_relative() {
            self.0.borrow().join(path)
        } else {
            path.to_path_buf()
        }
    }
}

/// Prefixes that would reach outside the local filesystem.
const REMOTE_PREFIXES: [&str; 4] = ["http://", "https://", "data:", "blob:"];

pub struct LibraryLoader {
    library_path: LibraryPath,
}

impl LibraryLoader {
    pub fn new(library_path: LibraryPath) -> Self {
        Self { library_path }
    }

    fn is_script(path: &Path) -> bool {
        matches!(
            path.extension().and_then(|e| e.to_str()),
            Some("js" | "mjs")
        )
    }

    fn resolve_in_library(&self, specifier: &str) -> Result<ModuleSpecifier, Error> {
        let path = std::path::absolute(self.library_path.resolve(Path::new(specifier)))
            .map_err(|e| anyhow!("Failed to resolve '{}': {}", specifier, e))?;
        ModuleSpecifier::from_file_path(&path)
            .map_err(|_| anyhow!("Invalid module path: {}", path.display()))
    }

    fn script_path(specifier: &ModuleSpecifier) -> Result<PathBuf, Error> {
        if specifier.scheme() != "file" {
            return Err(anyhow!("Only file:// modules can be loaded, got: {}", specifier));
        }
        let path = specifier
            .to_file_path()
            .map_err(|_| anyhow!("Not a local path: {}", specifier))?;
        if !Self::is_script(&path) {
            return Err(anyhow!("Only .js and .mjs modules can be loaded, got: {}", path.display()));
        }
        Ok(path)
    }

    fn read(specifier: &ModuleSpecifier) -> Result<ModuleSource, Error> {
        let path = Self::script_path(specifier)?;
        let code = std::fs::read_to_string(&path)
            .map_err(|e| anyhow!("Cannot read module '{}': {}", path.display(), e))?;
        Ok(ModuleSource::new(
            ModuleType::JavaScript,
            ModuleSourceCode::String(code.into()),
            specifier,
            None,
        ))
    }
}

impl ModuleLoader for LibraryLoader {
    fn resolve(
        &self,
        specifier: &str,
        referrer: &str,
        _kind: ResolutionKind,
    ) -> Result<ModuleSpecifier, Error> {
        if REMOTE_PREFIXES.iter().any(|prefix| specifier.starts_with(prefix)) {
            return Err(anyhow!("Remote imports are not supported: {}", specifier));
        }

        let resolved = if specifier.starts_with("file://") {
            ModuleSpecifier::parse(specifier)
                .map_err(|e| anyhow!("Invalid file URL '{}': {}", specifier, e))?
        } else if specifier.starts_with("./") || specifier.starts_with("../") {
            // Relative to a module referrer, otherwise to the library path
            match ModuleSpecifier::parse(referrer) {
                Ok(base) if base.scheme() == "file" => base
                    .join(specifier)
                    .map_err(|e| anyhow!("Failed to resolve '{}': {}", specifier, e))?,
                _ => self.resolve_in_library(specifier)?,
            }
        } else {
            // Absolute paths and bare specifiers like "lib/util.js"
            self.resolve_in_library(specifier)?
        };

        Self::script_path(&resolved)?;
        Ok(resolved)
    }

    fn load(
        &self,
        module_specifier: &ModuleSpecifier,
        _maybe_referrer: Option<&ModuleSpecifier>,
        _is_dyn_import: bool,
        _requested_module_type: RequestedModuleType,
    ) -> ModuleLoadResponse {
        ModuleLoadResponse::Sync(Self::read(module_specifier))
    }
}
