//! Template source loading.
//! Resolves template names to source text, either from search directories on
//! the filesystem or from an in-memory registry.

use crate::constants::TEMPLATE_EXTENSIONS;
use crate::error::{Error, Result};
use indexmap::IndexMap;
use log::debug;
use std::fs;
use std::path::PathBuf;

/// Source text of a template together with the file it came from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoadedSource {
    pub source: String,
    pub path: Option<PathBuf>,
}

/// Trait for resolving template names to sources.
pub trait TemplateLoader: Send + Sync {
    /// Loads the source of the named template.
    ///
    /// # Arguments
    /// * `name` - Template name as used by `extends`, `rebase` and `include`
    ///
    /// # Returns
    /// * `Result<LoadedSource>` - Source text and its origin
    ///
    /// # Errors
    /// * `Error::TemplateNotFoundError` if no source exists for the name
    fn load(&self, name: &str) -> Result<LoadedSource>;
}

/// Loader searching a list of directories.
///
/// Each directory is tried in order, first for the bare name and then for the
/// name followed by each extension.
#[derive(Debug, Clone)]
pub struct FileSystemLoader {
    directories: Vec<PathBuf>,
    extensions: Vec<String>,
}

impl FileSystemLoader {
    /// Creates a loader with the default extensions.
    pub fn new<P: Into<PathBuf>>(directories: impl IntoIterator<Item = P>) -> Self {
        Self {
            directories: directories.into_iter().map(Into::into).collect(),
            extensions: TEMPLATE_EXTENSIONS.iter().map(|ext| ext.to_string()).collect(),
        }
    }

    /// Replaces the extensions tried after the bare name.
    pub fn with_extensions<S: Into<String>>(mut self, extensions: impl IntoIterator<Item = S>) -> Self {
        self.extensions = extensions.into_iter().map(Into::into).collect();
        self
    }

    pub fn directories(&self) -> &[PathBuf] {
        &self.directories
    }

    /// Paths tried for `name`, in search order.
    pub fn candidates(&self, name: &str) -> Vec<PathBuf> {
        self.directories
            .iter()
            .flat_map(|dir| {
                std::iter::once(dir.join(name)).chain(
                    self.extensions
                        .iter()
                        .map(move |ext| dir.join(format!("{name}{ext}"))),
                )
            })
            .collect()
    }
}

impl TemplateLoader for FileSystemLoader {
    fn load(&self, name: &str) -> Result<LoadedSource> {
        let Some(path) = self.candidates(name).into_iter().find(|path| path.is_file()) else {
            return Err(Error::TemplateNotFoundError {
                name: name.to_string(),
            });
        };
        debug!("Loading template '{}' from {}", name, path.display());
        let source = fs::read_to_string(&path).map_err(Error::IoError)?;
        Ok(LoadedSource {
            source,
            path: Some(path),
        })
    }
}

/// Loader serving sources registered in memory.
#[derive(Debug, Clone, Default)]
pub struct MemoryLoader {
    sources: IndexMap<String, String>,
}

impl MemoryLoader {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a source under `name`, replacing any previous one.
    pub fn with_source<N: Into<String>, S: Into<String>>(mut self, name: N, source: S) -> Self {
        self.sources.insert(name.into(), source.into());
        self
    }
}

impl<N: Into<String>, S: Into<String>> FromIterator<(N, S)> for MemoryLoader {
    fn from_iter<T: IntoIterator<Item = (N, S)>>(iter: T) -> Self {
        Self {
            sources: iter
                .into_iter()
                .map(|(name, source)| (name.into(), source.into()))
                .collect(),
        }
    }
}

impl TemplateLoader for MemoryLoader {
    fn load(&self, name: &str) -> Result<LoadedSource> {
        match self.sources.get(name) {
            Some(source) => Ok(LoadedSource {
                source: source.clone(),
                path: None,
            }),
            None => Err(Error::TemplateNotFoundError {
                name: name.to_string(),
            }),
        }
    }
}
