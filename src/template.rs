//! Compiled templates and their context pools.

use crate::chunked::Chunked;
use crate::context::Context;
use crate::error::{Error, Result};
use crate::manager::Manager;
use crate::program::Program;
use crate::render::Fragments;
use indexmap::IndexMap;
use log::{debug, trace};
use minijinja::value::ValueKind;
use minijinja::Value;
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError, Weak};

/// Free-list of idle contexts.
#[derive(Debug, Default)]
pub(crate) struct Pool {
    idle: Mutex<Vec<Context>>,
}

impl Pool {
    fn checkout(&self) -> Option<Context> {
        self.idle.lock().unwrap_or_else(PoisonError::into_inner).pop()
    }

    fn release(&self, context: Context) {
        self.idle
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(context);
    }

    fn len(&self) -> usize {
        self.idle.lock().unwrap_or_else(PoisonError::into_inner).len()
    }
}

/// A checked-out context, reset and returned to its pool on drop.
#[derive(Debug)]
pub(crate) struct PoolGuard {
    context: Option<Context>,
    pool: Arc<Pool>,
}

impl PoolGuard {
    fn new(context: Context, pool: Arc<Pool>) -> Self {
        Self {
            context: Some(context),
            pool,
        }
    }

    pub(crate) fn context(&self) -> Option<&Context> {
        self.context.as_ref()
    }

    pub(crate) fn context_mut(&mut self) -> Option<&mut Context> {
        self.context.as_mut()
    }
}

impl Drop for PoolGuard {
    fn drop(&mut self) {
        if let Some(mut context) = self.context.take() {
            context.reset(IndexMap::new());
            trace!("Released context {}", context.id());
            self.pool.release(context);
        }
    }
}

/// Converts a render environment into namespace bindings.
///
/// # Errors
/// * `Error::ContextError` if `env` does not serialize to a mapping
pub fn environment<S: Serialize>(env: S) -> Result<IndexMap<String, Value>> {
    let value = Value::from_serialize(&env);
    match value.kind() {
        ValueKind::Undefined | ValueKind::None => Ok(IndexMap::new()),
        ValueKind::Map => {
            let mut namespace = IndexMap::new();
            for key in value.try_iter()? {
                let item = value.get_item(&key)?;
                let name = match key.as_str() {
                    Some(name) => name.to_string(),
                    None => key.to_string(),
                };
                namespace.insert(name, item);
            }
            Ok(namespace)
        }
        kind => Err(Error::ContextError(format!(
            "Render environment must be a mapping, got {kind}"
        ))),
    }
}

/// A compiled template with a pool of reusable contexts.
#[derive(Debug)]
pub struct Template {
    name: String,
    source: String,
    path: Option<PathBuf>,
    program: Arc<Program>,
    manager: Option<Weak<Manager>>,
    pool: Arc<Pool>,
}

impl Template {
    /// Compiles a standalone template.
    ///
    /// Standalone templates cannot use `extends`, `rebase` or `include`;
    /// rendering one that does fails with `Error::ContextError`.
    ///
    /// # Errors
    /// * `Error::SyntaxError` or `Error::ValueError` for malformed sources
    pub fn new(name: &str, source: &str) -> Result<Self> {
        Self::build(name, source, None, None)
    }

    pub(crate) fn build(
        name: &str,
        source: &str,
        path: Option<PathBuf>,
        manager: Option<Weak<Manager>>,
    ) -> Result<Self> {
        let program = Program::compile(source, name)?;
        Ok(Self {
            name: name.to_string(),
            source: source.to_string(),
            path,
            program: Arc::new(program),
            manager,
            pool: Arc::new(Pool::default()),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    /// File the source was read from, if any.
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    pub fn program(&self) -> &Arc<Program> {
        &self.program
    }

    /// The compiled code listing.
    pub fn code(&self) -> &str {
        self.program.listing()
    }

    /// Number of contexts waiting in the pool.
    pub fn idle_contexts(&self) -> usize {
        self.pool.len()
    }

    /// Renders the template lazily.
    ///
    /// # Arguments
    /// * `env` - Mapping of names bound in every template namespace
    ///
    /// # Returns
    /// * `Result<Fragments>` - The output fragments, produced on demand
    ///
    /// # Errors
    /// * `Error::ContextError` if `env` is not a mapping or the inheritance
    ///   graph cannot be built
    pub fn render<S: Serialize>(&self, env: S) -> Result<Fragments> {
        let env = environment(env)?;
        let mut context = match self.pool.checkout() {
            Some(context) => {
                trace!("Reusing context {} of '{}'", context.id(), self.name);
                context
            }
            None => {
                let context = Context::new(self.program.clone(), self.manager.clone())?;
                debug!(
                    "Created context {} for '{}' with {} instances",
                    context.id(),
                    self.name,
                    context.len()
                );
                context
            }
        };
        context.reset(env);
        Ok(Fragments::new(PoolGuard::new(context, self.pool.clone())))
    }

    /// Renders the template into a single string.
    pub fn render_to_string<S: Serialize>(&self, env: S) -> Result<String> {
        self.render(env)?.collect()
    }

    /// Renders the template in chunks of `size` bytes.
    pub fn render_chunked<S: Serialize>(&self, env: S, size: usize) -> Result<Chunked<Fragments>> {
        Ok(Chunked::new(self.render(env)?, size))
    }
}
