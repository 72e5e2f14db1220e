//! Inheritance runtime.
//!
//! A [`Context`] is one execution instance of a template. It owns an arena of
//! [`Instance`]s: the template itself at [`ROOT`], the templates it extends or
//! rebases onto, and lazily created included templates. Instances link to each
//! other by [`InstanceId`].

use crate::error::{Error, Result};
use crate::host::{Body, GLOBALS};
use crate::manager::Manager;
use crate::program::Program;
use indexmap::IndexMap;
use log::trace;
use minijinja::Value;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

static NEXT_ID: AtomicU64 = AtomicU64::new(1);

/// Index of an instance inside a context arena.
pub type InstanceId = usize;

/// The instance a context was built for.
pub const ROOT: InstanceId = 0;

/// A template instance with its namespace and inheritance links.
#[derive(Debug)]
pub struct Instance {
    pub(crate) program: Arc<Program>,
    pub(crate) namespace: IndexMap<String, Value>,
    /// Instance this one extends
    pub(crate) parent: Option<InstanceId>,
    /// Instance extending this one
    pub(crate) child: Option<InstanceId>,
    /// Instance this one is rebased onto
    pub(crate) rebased: Option<InstanceId>,
    /// Instance rebased onto this one
    pub(crate) base: Option<InstanceId>,
    pub(crate) includes: IndexMap<String, InstanceId>,
}

impl Instance {
    fn new(program: Arc<Program>) -> Self {
        Self {
            program,
            namespace: IndexMap::new(),
            parent: None,
            child: None,
            rebased: None,
            base: None,
            includes: IndexMap::new(),
        }
    }

    fn reset(&mut self, env: &IndexMap<String, Value>) {
        self.namespace.clear();
        self.namespace
            .extend(GLOBALS.iter().map(|(name, value)| (name.clone(), value.clone())));
        self.namespace
            .extend(env.iter().map(|(name, value)| (name.clone(), value.clone())));
    }

    pub fn name(&self) -> &str {
        self.program.name()
    }

    pub fn namespace(&self) -> &IndexMap<String, Value> {
        &self.namespace
    }
}

/// One execution instance of a template and everything it is linked to.
#[derive(Debug)]
pub struct Context {
    id: u64,
    instances: Vec<Instance>,
    env: IndexMap<String, Value>,
    manager: Option<Weak<Manager>>,
}

impl Context {
    /// Builds a context, eagerly linking extended and rebase-target templates.
    ///
    /// # Arguments
    /// * `program` - Compiled program of the template
    /// * `manager` - Manager resolving other templates by name
    ///
    /// # Errors
    /// * `Error::ContextError` for cyclic inheritance, or for templates using
    ///   `extends`, `rebase` or `include` without a manager
    /// * Any error raised while loading a linked template
    pub fn new(program: Arc<Program>, manager: Option<Weak<Manager>>) -> Result<Self> {
        let mut context = Self {
            id: NEXT_ID.fetch_add(1, Ordering::Relaxed),
            instances: Vec::new(),
            env: IndexMap::new(),
            manager,
        };
        context.build(program, &mut Vec::new())?;
        Ok(context)
    }

    /// Process-unique identifier of this context.
    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn instance(&self, id: InstanceId) -> &Instance {
        &self.instances[id]
    }

    /// Number of instances in the arena.
    pub fn len(&self) -> usize {
        self.instances.len()
    }

    pub fn is_empty(&self) -> bool {
        self.instances.is_empty()
    }

    /// Namespace of the root instance.
    pub fn namespace(&self) -> &IndexMap<String, Value> {
        &self.instances[ROOT].namespace
    }

    /// Clears every namespace down to the globals and binds `env` in them.
    pub fn reset(&mut self, env: IndexMap<String, Value>) {
        for instance in &mut self.instances {
            instance.reset(&env);
        }
        self.env = env;
    }

    /// Binds `name` in the namespace of `id` unless it is already bound.
    ///
    /// # Returns
    /// * `Value` - The value bound to `name` afterwards
    pub fn set_default(&mut self, id: InstanceId, name: String, value: Value) -> Value {
        self.instances[id]
            .namespace
            .entry(name)
            .or_insert(value)
            .clone()
    }

    fn manager(&self) -> Result<Arc<Manager>> {
        self.manager
            .as_ref()
            .and_then(Weak::upgrade)
            .ok_or_else(|| Error::ContextError("No template manager available".to_string()))
    }

    fn build(&mut self, program: Arc<Program>, visiting: &mut Vec<String>) -> Result<InstanceId> {
        let name = program.name().to_string();
        if visiting.contains(&name) {
            return Err(Error::ContextError(format!(
                "Cyclic inheritance: {} -> {}",
                visiting.join(" -> "),
                name
            )));
        }
        let linked =
            program.extends().is_some() || program.rebase().is_some() || !program.includes().is_empty();
        if linked && self.manager.is_none() {
            return Err(Error::ContextError(format!(
                "Template '{name}' uses extends, rebase or include without a template manager"
            )));
        }

        visiting.push(name);
        let id = self.instances.len();
        self.instances.push(Instance::new(program.clone()));
        if let Some(parent) = program.extends() {
            let parent = self.load(parent, visiting)?;
            self.instances[id].parent = Some(parent);
            self.instances[parent].child = Some(id);
        }
        if let Some(target) = program.rebase() {
            let target = self.load(target, visiting)?;
            self.instances[id].rebased = Some(target);
            self.instances[target].base = Some(id);
        }
        visiting.pop();
        Ok(id)
    }

    fn load(&mut self, name: &str, visiting: &mut Vec<String>) -> Result<InstanceId> {
        let template = self.manager()?.get_template(name)?;
        self.build(template.program().clone(), visiting)
    }

    /// Instance whose program runs when `id` is rendered.
    pub fn effective(&self, id: InstanceId) -> InstanceId {
        let mut id = id;
        loop {
            let instance = &self.instances[id];
            match instance.rebased.or(instance.parent) {
                Some(next) => id = next,
                None => return id,
            }
        }
    }

    /// Most derived instance of the extends chain containing `id`.
    pub fn leaf(&self, id: InstanceId) -> InstanceId {
        let mut id = id;
        while let Some(child) = self.instances[id].child {
            id = child;
        }
        id
    }

    fn search(&self, start: Option<InstanceId>, name: &str) -> Option<(InstanceId, Body)> {
        let mut next = start;
        while let Some(id) = next {
            let instance = &self.instances[id];
            if let Some(body) = instance.program.block(name) {
                return Some((id, body.clone()));
            }
            next = instance.parent;
        }
        None
    }

    /// Most derived definition of a block visible from `from`.
    pub fn find_block(&self, from: InstanceId, name: &str) -> Option<(InstanceId, Body)> {
        self.search(Some(self.leaf(from)), name)
    }

    /// Next definition of a block above its owning instance.
    pub fn find_super(&self, owner: InstanceId, name: &str) -> Option<(InstanceId, Body)> {
        self.search(self.instances[owner].parent, name)
    }

    /// Instance whose output a `base` directive reached from `from` streams.
    pub fn find_base(&self, from: InstanceId) -> Option<InstanceId> {
        let mut next = Some(self.leaf(from));
        while let Some(id) = next {
            let instance = &self.instances[id];
            if let Some(wrapped) = instance.base {
                return Some(match self.instances[wrapped].parent {
                    Some(parent) => self.effective(parent),
                    None => wrapped,
                });
            }
            next = instance.parent;
        }
        None
    }

    /// Prepares an included template for rendering.
    ///
    /// The included instance is created on first use and cached per including
    /// instance. Its namespaces are reset to the render environment and `args`
    /// is bound on top.
    ///
    /// # Returns
    /// * `Result<InstanceId>` - Instance whose program renders the include
    pub fn include(
        &mut self,
        from: InstanceId,
        name: &str,
        args: IndexMap<String, Value>,
    ) -> Result<InstanceId> {
        let id = match self.instances[from].includes.get(name) {
            Some(&id) => id,
            None => {
                let id = self.load(name, &mut Vec::new())?;
                trace!("Context {} linked include '{}' as instance {}", self.id, name, id);
                self.instances[from].includes.insert(name.to_string(), id);
                id
            }
        };
        for member in self.group(id) {
            let instance = &mut self.instances[member];
            instance.reset(&self.env);
            instance
                .namespace
                .extend(args.iter().map(|(key, value)| (key.clone(), value.clone())));
        }
        Ok(self.effective(id))
    }

    /// Instances reachable from `id` through extends and rebase links.
    fn group(&self, id: InstanceId) -> Vec<InstanceId> {
        let mut group = Vec::new();
        let mut pending = vec![id];
        while let Some(id) = pending.pop() {
            if group.contains(&id) {
                continue;
            }
            group.push(id);
            let instance = &self.instances[id];
            pending.extend(instance.parent);
            pending.extend(instance.rebased);
        }
        group
    }
}
