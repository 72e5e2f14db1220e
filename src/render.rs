//! Lazy template execution.
//!
//! [`Fragments`] interprets compiled statement trees on an explicit call stack:
//! delegations (blocks, includes, `base`) push a call, loops push a frame, and
//! every output fragment is produced on demand.

use crate::constants::MAX_RECURSION;
use crate::context::{Context, InstanceId, ROOT};
use crate::error::{Error, Result};
use crate::host::{Body, Expr, HostCall, StmtKind};
use crate::template::PoolGuard;
use indexmap::IndexMap;
use log::trace;
use minijinja::Value;
use std::vec;

enum Frame {
    Suite { body: Body, pc: usize },
    /// Running `for` statement `owner[index]`
    For { owner: Body, index: usize, items: vec::IntoIter<Value> },
    /// Running `while` statement `owner[index]`
    While { owner: Body, index: usize },
    /// Remaining items of a `yield from`
    Each { items: vec::IntoIter<Value> },
}

struct Call {
    instance: InstanceId,
    /// Name of the block this call renders
    block: Option<String>,
    locals: IndexMap<String, Value>,
    frames: Vec<Frame>,
}

impl Call {
    fn new(instance: InstanceId, block: Option<String>, locals: IndexMap<String, Value>, body: Body) -> Self {
        Self {
            instance,
            block,
            locals,
            frames: vec![Frame::Suite { body, pc: 0 }],
        }
    }
}

/// Lazily produced output of one render.
///
/// The checked-out context goes back to its template's pool once the
/// sequence is exhausted, fails or is dropped.
pub struct Fragments {
    guard: Option<PoolGuard>,
    stack: Vec<Call>,
}

impl Fragments {
    pub(crate) fn new(guard: PoolGuard) -> Self {
        let stack = match guard.context() {
            Some(context) => {
                let instance = context.effective(ROOT);
                let body = context.instance(instance).program.body().clone();
                vec![Call::new(instance, None, IndexMap::new(), body)]
            }
            None => Vec::new(),
        };
        Self {
            guard: Some(guard),
            stack,
        }
    }

    /// Identifier of the context this render runs in, until it is released.
    pub fn context_id(&self) -> Option<u64> {
        self.guard
            .as_ref()
            .and_then(PoolGuard::context)
            .map(Context::id)
    }

    fn finish(&mut self) {
        self.stack.clear();
        self.guard = None;
    }

    fn advance(&mut self) -> Result<Option<String>> {
        let Some(context) = self.guard.as_mut().and_then(PoolGuard::context_mut) else {
            return Ok(None);
        };
        let stack = &mut self.stack;
        loop {
            let Some(call) = stack.last_mut() else {
                return Ok(None);
            };
            let Some(frame) = call.frames.last_mut() else {
                stack.pop();
                continue;
            };
            match frame {
                Frame::Suite { body, pc } => {
                    if *pc >= body.len() {
                        call.frames.pop();
                        continue;
                    }
                    let (body, index) = (body.clone(), *pc);
                    *pc += 1;
                    if let Some(fragment) = execute(context, stack, &body, index)? {
                        return Ok(Some(fragment));
                    }
                }
                Frame::For { owner, index, items } => {
                    let (owner, index) = (owner.clone(), *index);
                    let next = items.next();
                    let StmtKind::For { targets, body, orelse, .. } = &owner[index].kind else {
                        call.frames.pop();
                        continue;
                    };
                    match next {
                        Some(item) => {
                            targets
                                .bind(item, &mut call.locals)
                                .map_err(|err| failure(context, call.instance, owner[index].line, err))?;
                            call.frames.push(Frame::Suite {
                                body: body.clone(),
                                pc: 0,
                            });
                        }
                        None => {
                            call.frames.pop();
                            if let Some(orelse) = orelse {
                                call.frames.push(Frame::Suite {
                                    body: orelse.clone(),
                                    pc: 0,
                                });
                            }
                        }
                    }
                }
                Frame::While { owner, index } => {
                    let (owner, index) = (owner.clone(), *index);
                    let StmtKind::While { cond, body, orelse } = &owner[index].kind else {
                        call.frames.pop();
                        continue;
                    };
                    let line = owner[index].line;
                    if evaluate(context, call, cond, line)?.is_true() {
                        call.frames.push(Frame::Suite {
                            body: body.clone(),
                            pc: 0,
                        });
                    } else {
                        call.frames.pop();
                        if let Some(orelse) = orelse {
                            call.frames.push(Frame::Suite {
                                body: orelse.clone(),
                                pc: 0,
                            });
                        }
                    }
                }
                Frame::Each { items } => match items.next() {
                    Some(item) => return Ok(Some(item.to_string())),
                    None => {
                        call.frames.pop();
                    }
                },
            }
        }
    }
}

impl Iterator for Fragments {
    type Item = Result<String>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            match self.advance() {
                Ok(Some(fragment)) if fragment.is_empty() => continue,
                Ok(Some(fragment)) => return Some(Ok(fragment)),
                Ok(None) => {
                    self.finish();
                    return None;
                }
                Err(err) => {
                    self.finish();
                    return Some(Err(err));
                }
            }
        }
    }
}

fn failure(context: &Context, instance: InstanceId, line: usize, err: impl ToString) -> Error {
    Error::RenderError {
        template: context.instance(instance).name().to_string(),
        line,
        message: err.to_string(),
    }
}

/// Evaluates `expr` for `call`, applying a pending `setdefault`.
fn evaluate(context: &mut Context, call: &Call, expr: &Expr, line: usize) -> Result<Value> {
    let value = expr
        .eval(&context.instance(call.instance).namespace, &call.locals)
        .map_err(|err| failure(context, call.instance, line, err))?;
    let pending = match value.downcast_object_ref::<HostCall>() {
        Some(HostCall::SetDefault { name, value }) => Some((name.clone(), value.clone())),
        _ => None,
    };
    Ok(match pending {
        Some((name, default)) => context.set_default(call.instance, name, default),
        None => value,
    })
}

fn arguments(
    context: &mut Context,
    call: &Call,
    args: &[(String, Expr)],
    line: usize,
) -> Result<IndexMap<String, Value>> {
    args.iter()
        .map(|(key, expr)| Ok((key.clone(), evaluate(context, call, expr, line)?)))
        .collect()
}

fn push_call(context: &Context, stack: &mut Vec<Call>, call: Call, line: usize) -> Result<()> {
    if stack.len() >= MAX_RECURSION {
        let caller = stack.last().map_or(call.instance, |caller| caller.instance);
        return Err(failure(
            context,
            caller,
            line,
            "maximum recursion depth exceeded",
        ));
    }
    trace!(
        "Delegating to '{}'{}",
        context.instance(call.instance).name(),
        call.block
            .as_deref()
            .map(|block| format!(" block '{block}'"))
            .unwrap_or_default()
    );
    stack.push(call);
    Ok(())
}

fn delegate_block(
    context: &Context,
    stack: &mut Vec<Call>,
    from: InstanceId,
    name: &str,
    locals: IndexMap<String, Value>,
    line: usize,
) -> Result<()> {
    match context.find_block(from, name) {
        Some((owner, body)) => push_call(
            context,
            stack,
            Call::new(owner, Some(name.to_string()), locals, body),
            line,
        ),
        None => Ok(()),
    }
}

fn delegate_include(
    context: &mut Context,
    stack: &mut Vec<Call>,
    from: InstanceId,
    name: &str,
    args: IndexMap<String, Value>,
    line: usize,
) -> Result<()> {
    let target = context.include(from, name, args)?;
    let body = context.instance(target).program.body().clone();
    push_call(context, stack, Call::new(target, None, IndexMap::new(), body), line)
}

/// Carries out an `include` or `block` call made from an expression.
///
/// # Returns
/// * `Result<bool>` - Whether `value` was such a call
fn delegate_value(
    context: &mut Context,
    stack: &mut Vec<Call>,
    from: InstanceId,
    value: &Value,
    line: usize,
) -> Result<bool> {
    let Some(host_call) = value.downcast_object::<HostCall>() else {
        return Ok(false);
    };
    match &*host_call {
        HostCall::Include { name, args } => {
            delegate_include(context, stack, from, name, args.clone(), line)?
        }
        HostCall::Block { name, args } => {
            delegate_block(context, stack, from, name, args.clone(), line)?
        }
        HostCall::SetDefault { .. } => return Ok(false),
    }
    Ok(true)
}

/// Unwinds frames up to the innermost loop, removing it on `break`.
fn unwind(call: &mut Call, remove_loop: bool) {
    while let Some(frame) = call.frames.last() {
        if matches!(frame, Frame::For { .. } | Frame::While { .. }) {
            if remove_loop {
                call.frames.pop();
            }
            return;
        }
        call.frames.pop();
    }
}

/// Executes statement `body[index]` of the innermost call.
///
/// # Returns
/// * `Result<Option<String>>` - The fragment the statement produced, if any
fn execute(context: &mut Context, stack: &mut Vec<Call>, body: &Body, index: usize) -> Result<Option<String>> {
    let stmt = &body[index];
    let line = stmt.line;
    let Some(call) = stack.last_mut() else {
        return Ok(None);
    };
    match &stmt.kind {
        StmtKind::Text { literals, args } => {
            let mut fragment = String::new();
            for (position, literal) in literals.iter().enumerate() {
                fragment.push_str(literal);
                if let Some(arg) = args.get(position) {
                    fragment.push_str(&evaluate(context, call, arg, line)?.to_string());
                }
            }
            Ok(Some(fragment))
        }
        StmtKind::Emit(expr) => {
            let value = evaluate(context, call, expr, line)?;
            let instance = call.instance;
            if delegate_value(context, stack, instance, &value, line)? {
                return Ok(None);
            }
            Ok(Some(value.to_string()))
        }
        StmtKind::EmitEach(expr) => {
            let value = evaluate(context, call, expr, line)?;
            let instance = call.instance;
            if delegate_value(context, stack, instance, &value, line)? {
                return Ok(None);
            }
            let Some(call) = stack.last_mut() else {
                return Ok(None);
            };
            let items: Vec<Value> = value
                .try_iter()
                .map_err(|err| failure(context, call.instance, line, err))?
                .collect();
            call.frames.push(Frame::Each {
                items: items.into_iter(),
            });
            Ok(None)
        }
        StmtKind::Assign { targets, value } => {
            let value = evaluate(context, call, value, line)?;
            targets
                .bind(value, &mut call.locals)
                .map_err(|err| failure(context, call.instance, line, err))?;
            Ok(None)
        }
        StmtKind::Eval(expr) => {
            evaluate(context, call, expr, line)?;
            Ok(None)
        }
        StmtKind::If { branches, orelse } => {
            let mut chosen = orelse.clone();
            for (cond, branch) in branches {
                if evaluate(context, call, cond, line)?.is_true() {
                    chosen = Some(branch.clone());
                    break;
                }
            }
            if let Some(body) = chosen {
                call.frames.push(Frame::Suite { body, pc: 0 });
            }
            Ok(None)
        }
        StmtKind::For { iter, .. } => {
            let value = evaluate(context, call, iter, line)?;
            let items: Vec<Value> = value
                .try_iter()
                .map_err(|err| failure(context, call.instance, line, err))?
                .collect();
            call.frames.push(Frame::For {
                owner: body.clone(),
                index,
                items: items.into_iter(),
            });
            Ok(None)
        }
        StmtKind::While { .. } => {
            call.frames.push(Frame::While {
                owner: body.clone(),
                index,
            });
            Ok(None)
        }
        StmtKind::With { value, name, body } => {
            let value = evaluate(context, call, value, line)?;
            if let Some(name) = name {
                call.locals.insert(name.clone(), value);
            }
            call.frames.push(Frame::Suite {
                body: body.clone(),
                pc: 0,
            });
            Ok(None)
        }
        StmtKind::Break => {
            unwind(call, true);
            Ok(None)
        }
        StmtKind::Continue => {
            unwind(call, false);
            Ok(None)
        }
        StmtKind::Block { name, args } => {
            let locals = arguments(context, call, args, line)?;
            let instance = call.instance;
            delegate_block(context, stack, instance, name, locals, line)?;
            Ok(None)
        }
        StmtKind::BlockSuper => {
            let Some(name) = call.block.clone() else {
                return Ok(None);
            };
            if let Some((owner, body)) = context.find_super(call.instance, &name) {
                let parent = Call::new(owner, Some(name), IndexMap::new(), body);
                push_call(context, stack, parent, line)?;
            }
            Ok(None)
        }
        StmtKind::Include { name, args } => {
            let args = arguments(context, call, args, line)?;
            let instance = call.instance;
            delegate_include(context, stack, instance, name, args, line)?;
            Ok(None)
        }
        StmtKind::Base => {
            if let Some(wrapped) = context.find_base(call.instance) {
                let body = context.instance(wrapped).program.body().clone();
                push_call(context, stack, Call::new(wrapped, None, IndexMap::new(), body), line)?;
            }
            Ok(None)
        }
    }
}
