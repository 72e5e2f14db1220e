//! Template manager.
//! Compiles templates on first use, caches them by name and resolves the
//! names used by `extends`, `rebase` and `include`.

use crate::chunked::Chunked;
use crate::config::Config;
use crate::constants::DEFAULT_BUFFER_SIZE;
use crate::error::Result;
use crate::loader::{FileSystemLoader, TemplateLoader};
use crate::render::Fragments;
use crate::template::Template;
use indexmap::IndexMap;
use log::{debug, warn};
use serde::Serialize;
use std::fmt;
use std::path::PathBuf;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};

/// Name-to-template cache with pluggable source loading.
pub struct Manager {
    me: Weak<Manager>,
    loader: Box<dyn TemplateLoader>,
    templates: Mutex<IndexMap<String, Arc<Template>>>,
    buffer_size: usize,
}

impl fmt::Debug for Manager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Manager")
            .field("templates", &self.cached())
            .field("buffer_size", &self.buffer_size)
            .finish_non_exhaustive()
    }
}

impl Manager {
    /// Creates a manager searching `directories` with the default extensions.
    pub fn new<P: Into<PathBuf>>(directories: impl IntoIterator<Item = P>) -> Arc<Self> {
        Self::with_loader(FileSystemLoader::new(directories))
    }

    /// Creates a manager loading sources through `loader`.
    pub fn with_loader<L: TemplateLoader + 'static>(loader: L) -> Arc<Self> {
        Self::build(Box::new(loader), DEFAULT_BUFFER_SIZE)
    }

    /// Creates a manager from configuration settings.
    pub fn from_config(config: &Config) -> Arc<Self> {
        let loader = FileSystemLoader::new(config.directories.iter().cloned())
            .with_extensions(config.extensions.iter().cloned());
        Self::build(Box::new(loader), config.buffer_size)
    }

    fn build(loader: Box<dyn TemplateLoader>, buffer_size: usize) -> Arc<Self> {
        Arc::new_cyclic(|me| Self {
            me: me.clone(),
            loader,
            templates: Mutex::new(IndexMap::new()),
            buffer_size,
        })
    }

    fn templates(&self) -> MutexGuard<'_, IndexMap<String, Arc<Template>>> {
        self.templates.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Chunk size used by [`Manager::render_chunked`].
    pub fn buffer_size(&self) -> usize {
        self.buffer_size
    }

    /// Names of the cached templates, in insertion order.
    pub fn cached(&self) -> Vec<String> {
        self.templates().keys().cloned().collect()
    }

    /// Returns the named template, loading and compiling it on first use.
    ///
    /// # Arguments
    /// * `name` - Template name
    ///
    /// # Returns
    /// * `Result<Arc<Template>>` - The cached template
    ///
    /// # Errors
    /// * `Error::TemplateNotFoundError` if the loader has no source for `name`
    /// * `Error::SyntaxError` or `Error::ValueError` if the source does not compile
    pub fn get_template(&self, name: &str) -> Result<Arc<Template>> {
        if let Some(template) = self.templates().get(name) {
            return Ok(template.clone());
        }
        let loaded = self.loader.load(name)?;
        let template = Template::build(name, &loaded.source, loaded.path, Some(self.me.clone()))?;
        Ok(self.insert(name, template))
    }

    /// Compiles `source` and caches it under `name`, replacing any cached template.
    pub fn add_template(&self, name: &str, source: &str) -> Result<Arc<Template>> {
        let template = Arc::new(Template::build(name, source, None, Some(self.me.clone()))?);
        self.templates().insert(name.to_string(), template.clone());
        debug!("Registered template '{name}'");
        self.prewarm(&template);
        Ok(template)
    }

    fn insert(&self, name: &str, template: Template) -> Arc<Template> {
        let (template, fresh) = {
            let mut templates = self.templates();
            match templates.get(name) {
                // another thread compiled it first
                Some(cached) => (cached.clone(), false),
                None => {
                    let template = Arc::new(template);
                    templates.insert(name.to_string(), template.clone());
                    (template, true)
                }
            }
        };
        if fresh {
            debug!("Cached template '{name}'");
            self.prewarm(&template);
        }
        template
    }

    /// Loads the statically included templates of `template`, logging failures.
    fn prewarm(&self, template: &Template) {
        for include in template.program().includes() {
            if self.templates().contains_key(include) {
                continue;
            }
            if let Err(err) = self.get_template(include) {
                warn!(
                    "Could not preload '{}' included by '{}': {}",
                    include,
                    template.name(),
                    err
                );
            }
        }
    }

    /// Renders the named template lazily.
    pub fn render<S: Serialize>(&self, name: &str, env: S) -> Result<Fragments> {
        self.get_template(name)?.render(env)
    }

    pub fn render_to_string<S: Serialize>(&self, name: &str, env: S) -> Result<String> {
        self.get_template(name)?.render_to_string(env)
    }

    /// Renders the named template in chunks of the configured buffer size.
    pub fn render_chunked<S: Serialize>(&self, name: &str, env: S) -> Result<Chunked<Fragments>> {
        self.get_template(name)?.render_chunked(env, self.buffer_size)
    }

    /// Drops every cached template.
    pub fn reset(&self) {
        let mut templates = self.templates();
        debug!("Dropping {} cached templates", templates.len());
        templates.clear();
    }
}
