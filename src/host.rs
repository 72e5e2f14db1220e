//! Embedded host language.
//! Expressions are compiled once by a process-wide minijinja environment;
//! statements are parsed by the small grammar below into [`Stmt`] trees.

use crate::error::{Error, Result};
use indexmap::IndexMap;
use minijinja::value::{Kwargs, Object, ObjectRepr};
use minijinja::{Environment, ErrorKind, Expression, State, UndefinedBehavior, Value};
use regex::Regex;
use std::fmt;
use std::sync::{Arc, LazyLock};

static HOST: LazyLock<Environment<'static>> = LazyLock::new(|| {
    let mut env = Environment::new();
    env.set_undefined_behavior(UndefinedBehavior::Strict);
    env
});

static IDENTIFIER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Za-z_][A-Za-z0-9_]*$").expect("identifier pattern is a valid regex"));

static FOR_HEAD: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\s*(.+?)\s+in\s+(.+?)\s*$").expect("for pattern is a valid regex"));

static WITH_HEAD: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^\s*(.+?)\s+as\s+([A-Za-z_][A-Za-z0-9_]*)\s*$").expect("with pattern is a valid regex")
});

/// Statements of the host language that templates cannot use.
const UNSUPPORTED: [&str; 14] = [
    "def", "class", "try", "except", "finally", "import", "from", "return", "raise", "global",
    "nonlocal", "del", "assert", "async",
];

/// Names bound in every namespace on reset.
pub static GLOBALS: LazyLock<IndexMap<String, Value>> = LazyLock::new(|| {
    let mut globals = IndexMap::new();
    globals.insert("include".to_string(), Value::from_function(include));
    globals.insert("block".to_string(), Value::from_function(block));
    globals.insert("defined".to_string(), Value::from_function(defined));
    globals.insert("get".to_string(), Value::from_function(get));
    globals.insert("setdefault".to_string(), Value::from_function(setdefault));
    globals.insert("len".to_string(), Value::from_function(len));
    globals.insert("str".to_string(), Value::from_function(to_str));
    globals
});

/// Effect requested by a namespace function, carried out by the executor.
///
/// Expressions cannot reach the running context, so `include`, `block` and
/// `setdefault` return one of these and the statement that evaluated it
/// performs the delegation or the namespace update.
#[derive(Debug)]
pub enum HostCall {
    Include { name: String, args: IndexMap<String, Value> },
    Block { name: String, args: IndexMap<String, Value> },
    SetDefault { name: String, value: Value },
}

impl Object for HostCall {
    fn repr(self: &Arc<Self>) -> ObjectRepr {
        ObjectRepr::Plain
    }

    fn render(self: &Arc<Self>, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &**self {
            HostCall::Include { name, .. } => write!(f, "<include {name:?}>"),
            HostCall::Block { name, .. } => write!(f, "<block {name:?}>"),
            HostCall::SetDefault { value, .. } => fmt::Display::fmt(value, f),
        }
    }
}

fn keywords(kwargs: &Kwargs) -> std::result::Result<IndexMap<String, Value>, minijinja::Error> {
    kwargs
        .args()
        .map(|key| Ok((key.to_string(), kwargs.get::<Value>(key)?)))
        .collect()
}

fn include(name: &str, kwargs: Kwargs) -> std::result::Result<Value, minijinja::Error> {
    Ok(Value::from_object(HostCall::Include {
        name: name.to_string(),
        args: keywords(&kwargs)?,
    }))
}

fn block(name: &str, kwargs: Kwargs) -> std::result::Result<Value, minijinja::Error> {
    Ok(Value::from_object(HostCall::Block {
        name: name.to_string(),
        args: keywords(&kwargs)?,
    }))
}

fn setdefault(state: &State, name: &str, default: Value) -> Value {
    match state.lookup(name).filter(|value| !value.is_undefined()) {
        Some(value) => value,
        None => Value::from_object(HostCall::SetDefault {
            name: name.to_string(),
            value: default,
        }),
    }
}

fn defined(state: &State, name: &str) -> bool {
    state.lookup(name).is_some_and(|value| !value.is_undefined())
}

fn get(state: &State, name: &str, default: Option<Value>) -> Value {
    state
        .lookup(name)
        .filter(|value| !value.is_undefined())
        .or(default)
        .unwrap_or_else(|| Value::from(()))
}

fn len(value: &Value) -> std::result::Result<usize, minijinja::Error> {
    value.len().ok_or_else(|| {
        minijinja::Error::new(
            ErrorKind::InvalidOperation,
            format!("object of type {} has no len()", value.kind()),
        )
    })
}

fn to_str(value: &Value) -> String {
    value.to_string()
}

/// A compiled host expression.
pub struct Expr {
    source: String,
    compiled: Expression<'static, 'static>,
}

impl Expr {
    /// Compiles an expression.
    ///
    /// # Errors
    /// * `Error::SyntaxError` if the expression does not parse
    pub fn compile(source: &str, line: usize) -> Result<Self> {
        let source = source.trim().to_string();
        if source.is_empty() {
            return Err(Error::syntax("Expected an expression", line));
        }
        match HOST.compile_expression_owned(source.clone()) {
            Ok(compiled) => Ok(Self { source, compiled }),
            Err(err) => Err(Error::syntax(format!("Invalid expression `{source}`: {err}"), line)),
        }
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    /// Evaluates the expression with `locals` layered over `namespace`.
    pub fn eval(
        &self,
        namespace: &IndexMap<String, Value>,
        locals: &IndexMap<String, Value>,
    ) -> std::result::Result<Value, minijinja::Error> {
        let mut scope: IndexMap<&str, &Value> =
            IndexMap::with_capacity(namespace.len() + locals.len());
        for (name, value) in namespace.iter().chain(locals) {
            scope.insert(name.as_str(), value);
        }
        let value = self.compiled.eval(&scope)?;
        if value.is_undefined() {
            return Err(minijinja::Error::new(
                ErrorKind::UndefinedError,
                format!("`{}` is not defined", self.source),
            ));
        }
        Ok(value)
    }
}

impl fmt::Debug for Expr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Expr").field(&self.source).finish()
    }
}

/// Assignment targets: a single name or a tuple of names.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Targets {
    Name(String),
    Tuple(Vec<String>),
}

impl Targets {
    pub fn parse(text: &str, line: usize) -> Result<Self> {
        let text = text.trim();
        let inner = text
            .strip_prefix('(')
            .and_then(|t| t.strip_suffix(')'))
            .or_else(|| text.strip_prefix('[').and_then(|t| t.strip_suffix(']')));
        let tuple = inner.is_some() || text.contains(',');
        let names: Vec<&str> = inner
            .unwrap_or(text)
            .split(',')
            .map(str::trim)
            .collect();
        // a trailing comma makes a one-element tuple
        let names = match names.split_last() {
            Some((last, rest)) if last.is_empty() && !rest.is_empty() => rest,
            _ => &names[..],
        };
        if let Some(bad) = names.iter().find(|name| !IDENTIFIER.is_match(name)) {
            return Err(Error::syntax(format!("Cannot assign to `{bad}`"), line));
        }
        let names: Vec<String> = names.iter().map(|name| name.to_string()).collect();
        match (tuple, names.as_slice()) {
            (false, [name]) => Ok(Targets::Name(name.clone())),
            _ => Ok(Targets::Tuple(names)),
        }
    }

    /// Binds a value to the targets, unpacking it for tuples.
    pub fn bind(
        &self,
        value: Value,
        scope: &mut IndexMap<String, Value>,
    ) -> std::result::Result<(), minijinja::Error> {
        match self {
            Targets::Name(name) => {
                scope.insert(name.clone(), value);
            }
            Targets::Tuple(names) => {
                let items: Vec<Value> = value.try_iter()?.collect();
                if items.len() != names.len() {
                    return Err(minijinja::Error::new(
                        ErrorKind::InvalidOperation,
                        format!(
                            "cannot unpack {} values into {} targets",
                            items.len(),
                            names.len()
                        ),
                    ));
                }
                for (name, item) in names.iter().zip(items) {
                    scope.insert(name.clone(), item);
                }
            }
        }
        Ok(())
    }
}

impl fmt::Display for Targets {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Targets::Name(name) => f.write_str(name),
            Targets::Tuple(names) => write!(f, "({})", names.join(", ")),
        }
    }
}

/// A suite of statements, shared between compiled programs and running frames.
pub type Body = Arc<[Stmt]>;

/// A statement with the 1-based source line it came from.
#[derive(Debug)]
pub struct Stmt {
    pub line: usize,
    pub kind: StmtKind,
}

#[derive(Debug)]
pub enum StmtKind {
    /// Literal text with interleaved substitutions
    Text { literals: Vec<String>, args: Vec<Expr> },
    /// `yield expr`
    Emit(Expr),
    /// `yield from expr`
    EmitEach(Expr),
    Assign { targets: Targets, value: Expr },
    /// Expression evaluated for its side effects
    Eval(Expr),
    If { branches: Vec<(Expr, Body)>, orelse: Option<Body> },
    For { targets: Targets, iter: Expr, body: Body, orelse: Option<Body> },
    While { cond: Expr, body: Body, orelse: Option<Body> },
    With { value: Expr, name: Option<String>, body: Body },
    Break,
    Continue,
    Block { name: String, args: Vec<(String, Expr)> },
    BlockSuper,
    Include { name: String, args: Vec<(String, Expr)> },
    Base,
}

/// Opening line of a compound statement.
#[derive(Debug)]
pub enum Header {
    If(Expr),
    Elif(Expr),
    Else,
    For(Targets, Expr),
    While(Expr),
    With(Expr, Option<String>),
}

impl Header {
    pub fn keyword(&self) -> &'static str {
        match self {
            Header::If(_) => "if",
            Header::Elif(_) => "elif",
            Header::Else => "else",
            Header::For(..) => "for",
            Header::While(_) => "while",
            Header::With(..) => "with",
        }
    }
}

/// One logical statement line.
#[derive(Debug)]
pub enum Line {
    /// Blank lines, comments, `pass` and docstrings
    Empty,
    Simple(StmtKind),
    Header { header: Header, inline: Option<String> },
}

/// Lexical summary of a statement.
#[derive(Debug, Default)]
pub struct Scan {
    /// Characters outside strings and brackets, with their byte offsets
    pub top: Vec<(usize, char)>,
    /// Unclosed bracket depth at the end of the text
    pub depth: usize,
    /// A triple-quoted string is still open at the end of the text
    pub open_string: bool,
    /// Byte offset where a trailing comment starts
    pub code_end: usize,
}

impl Scan {
    /// Whether the statement continues on the next line.
    pub fn continues(&self) -> bool {
        self.depth > 0 || self.open_string
    }
}

pub fn scan(text: &str) -> Scan {
    let mut scan = Scan {
        code_end: text.len(),
        ..Scan::default()
    };
    let mut quote: Option<(char, bool)> = None;
    let mut chars = text.char_indices();
    while let Some((pos, c)) = chars.next() {
        if let Some((q, triple)) = quote {
            if c == '\\' {
                chars.next();
            } else if c == q {
                if !triple {
                    quote = None;
                } else if text[pos..].starts_with(&String::from(q).repeat(3)) {
                    chars.nth(1);
                    quote = None;
                }
            }
            continue;
        }
        match c {
            '#' => {
                scan.code_end = pos;
                break;
            }
            '\'' | '"' => {
                let triple = text[pos..].starts_with(&String::from(c).repeat(3));
                if triple {
                    chars.nth(1);
                }
                quote = Some((c, triple));
            }
            '(' | '[' | '{' => scan.depth += 1,
            ')' | ']' | '}' => scan.depth = scan.depth.saturating_sub(1),
            _ if scan.depth == 0 => scan.top.push((pos, c)),
            _ => {}
        }
    }
    scan.open_string = matches!(quote, Some((_, true)));
    scan
}

/// Splits leading identifier characters off a statement.
fn keyword(text: &str) -> (&str, &str) {
    let end = text
        .find(|c: char| !(c.is_ascii_alphanumeric() || c == '_'))
        .unwrap_or(text.len());
    text.split_at(end)
}

/// Finds the operator of an assignment statement.
///
/// # Returns
/// * `Option<(usize, usize, Option<&str>)>` - Start and end of the operator and
///   the binary operator of an augmented assignment
fn assignment<'a>(text: &'a str, scan: &Scan) -> Option<(usize, usize, Option<&'a str>)> {
    let bytes = text.as_bytes();
    for &(pos, c) in &scan.top {
        if c != '=' {
            continue;
        }
        let next = bytes.get(pos + 1).copied();
        let prev = pos.checked_sub(1).map(|p| bytes[p]);
        if next == Some(b'=') || matches!(prev, Some(b'=' | b'!' | b'<' | b'>')) {
            continue;
        }
        return match prev {
            Some(b'/') if pos >= 2 && bytes[pos - 2] == b'/' => {
                Some((pos - 2, pos + 1, Some(&text[pos - 2..pos])))
            }
            Some(b'+' | b'-' | b'*' | b'/' | b'%') => {
                Some((pos - 1, pos + 1, Some(&text[pos - 1..pos])))
            }
            _ => Some((pos, pos + 1, None)),
        };
    }
    None
}

fn is_string_literal(text: &str, scan: &Scan) -> bool {
    text.starts_with(['\'', '"']) && scan.top.iter().all(|(_, c)| c.is_whitespace())
}

/// Parses one logical statement line.
///
/// # Arguments
/// * `text` - Statement text, possibly spanning several physical lines
/// * `line` - Source line of the statement, for error reporting
///
/// # Errors
/// * `Error::SyntaxError` for malformed or unsupported statements
pub fn parse_line(text: &str, line: usize) -> Result<Line> {
    let scan = scan(text);
    let text = text[..scan.code_end].trim();
    if text.is_empty() || is_string_literal(text, &scan) {
        return Ok(Line::Empty);
    }
    let (word, rest) = keyword(text);
    match word {
        "if" | "elif" | "else" | "for" | "while" | "with" => parse_header(word, text, line),
        "pass" if rest.trim().is_empty() => Ok(Line::Empty),
        "break" if rest.trim().is_empty() => Ok(Line::Simple(StmtKind::Break)),
        "continue" if rest.trim().is_empty() => Ok(Line::Simple(StmtKind::Continue)),
        "yield" => {
            let (next, value) = keyword(rest.trim_start());
            if next == "from" {
                Ok(Line::Simple(StmtKind::EmitEach(Expr::compile(value, line)?)))
            } else {
                Ok(Line::Simple(StmtKind::Emit(Expr::compile(rest, line)?)))
            }
        }
        _ if UNSUPPORTED.contains(&word) => Err(Error::syntax(
            format!("Unsupported statement '{word}'"),
            line,
        )),
        _ => parse_simple(text, line),
    }
}

fn parse_simple(text: &str, line: usize) -> Result<Line> {
    let scan = scan(text);
    let Some((start, end, op)) = assignment(text, &scan) else {
        return Ok(Line::Simple(StmtKind::Eval(Expr::compile(text, line)?)));
    };
    let targets = Targets::parse(&text[..start], line)?;
    let rhs = text[end..].trim();
    let value = match (op, &targets) {
        (None, _) => Expr::compile(rhs, line)?,
        (Some(op), Targets::Name(name)) => Expr::compile(&format!("{name} {op} ({rhs})"), line)?,
        (Some(_), Targets::Tuple(_)) => {
            return Err(Error::syntax(
                "Augmented assignment needs a single target",
                line,
            ))
        }
    };
    Ok(Line::Simple(StmtKind::Assign { targets, value }))
}

fn parse_header(word: &str, text: &str, line: usize) -> Result<Line> {
    let scan = scan(text);
    let Some(&(colon, _)) = scan.top.iter().find(|(_, c)| *c == ':') else {
        return Err(Error::syntax(format!("Expected ':' after '{word}'"), line));
    };
    let head = text[word.len()..colon].trim();
    let inline = Some(text[colon + 1..].trim())
        .filter(|rest| !rest.is_empty())
        .map(str::to_string);
    let header = match word {
        "if" => Header::If(Expr::compile(head, line)?),
        "elif" => Header::Elif(Expr::compile(head, line)?),
        "while" => Header::While(Expr::compile(head, line)?),
        "else" if head.is_empty() => Header::Else,
        "else" => return Err(Error::syntax("Unexpected text after 'else'", line)),
        "for" => {
            let Some(captures) = FOR_HEAD.captures(head) else {
                return Err(Error::syntax("Expected 'for targets in iterable'", line));
            };
            Header::For(
                Targets::parse(&captures[1], line)?,
                Expr::compile(&captures[2], line)?,
            )
        }
        _ => match WITH_HEAD.captures(head) {
            Some(captures) => Header::With(
                Expr::compile(&captures[1], line)?,
                Some(captures[2].to_string()),
            ),
            None => Header::With(Expr::compile(head, line)?, None),
        },
    };
    Ok(Line::Header { header, inline })
}

/// Parses `key=expr` arguments of a delegating directive.
pub fn parse_args(text: &str, line: usize) -> Result<Vec<(String, Expr)>> {
    let scan = scan(text);
    let text = &text[..scan.code_end];
    let mut bounds: Vec<usize> = scan
        .top
        .iter()
        .filter(|(_, c)| *c == ',')
        .map(|(pos, _)| *pos)
        .collect();
    bounds.push(text.len());

    let mut args = Vec::new();
    let mut start = 0;
    for end in bounds {
        let part = &text[start..end];
        start = end + 1;
        if part.trim().is_empty() {
            continue;
        }
        let part_scan = self::scan(part);
        let Some((op, after, None)) = assignment(part, &part_scan) else {
            return Err(Error::syntax(
                format!("Expected a key=value argument, got `{}`", part.trim()),
                line,
            ));
        };
        let key = part[..op].trim();
        if !IDENTIFIER.is_match(key) {
            return Err(Error::syntax(format!("Invalid argument name `{key}`"), line));
        }
        args.push((key.to_string(), Expr::compile(&part[after..], line)?));
    }
    Ok(args)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn eval(source: &str, locals: &[(&str, Value)]) -> Value {
        let namespace = GLOBALS.clone();
        let locals = locals
            .iter()
            .map(|(name, value)| (name.to_string(), value.clone()))
            .collect();
        Expr::compile(source, 1).unwrap().eval(&namespace, &locals).unwrap()
    }

    #[test]
    fn test_expression_sees_locals_over_namespace() {
        let mut namespace = IndexMap::new();
        namespace.insert("x".to_string(), Value::from(1));
        let mut locals = IndexMap::new();
        locals.insert("x".to_string(), Value::from(2));
        let expr = Expr::compile("x * 10", 1).unwrap();
        assert_eq!(expr.eval(&namespace, &locals).unwrap(), Value::from(20));
    }

    #[test]
    fn test_undefined_name_is_an_error() {
        let expr = Expr::compile("missing", 1).unwrap();
        assert!(expr.eval(&IndexMap::new(), &IndexMap::new()).is_err());
    }

    #[test]
    fn test_globals() {
        assert_eq!(eval("defined('x')", &[("x", Value::from(1))]), Value::from(true));
        assert_eq!(eval("defined('y')", &[]), Value::from(false));
        assert_eq!(eval("get('y', 5)", &[]), Value::from(5));
        assert_eq!(eval("len(items)", &[("items", Value::from(vec![1, 2]))]), Value::from(2));
        assert_eq!(eval("str(3)", &[]), Value::from("3"));
    }

    #[test]
    fn test_delegating_globals_return_host_calls() {
        let value = eval("include('footer', year=2024)", &[]);
        let Some(call) = value.downcast_object::<HostCall>() else {
            panic!("Expected a host call");
        };
        let HostCall::Include { name, args } = &*call else {
            panic!("Expected an include");
        };
        assert_eq!(name, "footer");
        assert_eq!(args.get("year"), Some(&Value::from(2024)));

        let value = eval("block('title')", &[]);
        assert!(matches!(
            value.downcast_object::<HostCall>().as_deref(),
            Some(HostCall::Block { .. })
        ));
    }

    #[test]
    fn test_setdefault_keeps_existing_values() {
        assert_eq!(eval("setdefault('x', 5)", &[("x", Value::from(1))]), Value::from(1));
        let value = eval("setdefault('y', 5)", &[]);
        assert_eq!(value.to_string(), "5");
        assert!(value.downcast_object::<HostCall>().is_some());
    }

    #[test]
    fn test_invalid_expression_is_syntax_error() {
        let err = Expr::compile("1 +", 7).unwrap_err();
        assert!(matches!(err, Error::SyntaxError { line: 7, .. }));
    }

    #[test]
    fn test_scan_tracks_brackets_strings_and_comments() {
        assert!(scan("x = f('(', [1,").continues());
        assert!(scan("'''open").open_string);
        let summary = scan("a = 1 # note: yes");
        assert_eq!(summary.code_end, 6);
        assert!(!summary.continues());
    }

    #[test]
    fn test_assignments() {
        let Line::Simple(StmtKind::Assign { targets, value }) = parse_line("a, b = pair", 1).unwrap()
        else {
            panic!("Expected an assignment");
        };
        assert_eq!(targets, Targets::Tuple(vec!["a".to_string(), "b".to_string()]));
        assert_eq!(value.source(), "pair");

        let Line::Simple(StmtKind::Assign { value, .. }) = parse_line("n //= 2", 1).unwrap() else {
            panic!("Expected an assignment");
        };
        assert_eq!(value.source(), "n // (2)");

        assert!(matches!(
            parse_line("a == b", 1).unwrap(),
            Line::Simple(StmtKind::Eval(_))
        ));
    }

    #[test]
    fn test_headers() {
        let Line::Header { header: Header::For(targets, iter), inline } =
            parse_line("for k, v in items|items:", 1).unwrap()
        else {
            panic!("Expected a for header");
        };
        assert_eq!(targets.to_string(), "(k, v)");
        assert_eq!(iter.source(), "items|items");
        assert_eq!(inline, None);

        let Line::Header { header, inline } = parse_line("if d['a:b']: yield 1", 1).unwrap() else {
            panic!("Expected an if header");
        };
        assert_eq!(header.keyword(), "if");
        assert_eq!(inline.as_deref(), Some("yield 1"));
    }

    #[test]
    fn test_empty_statements() {
        for text in ["pass", "# comment", "'''docstring'''", "\"note\"", ""] {
            assert!(matches!(parse_line(text, 1).unwrap(), Line::Empty), "{text}");
        }
    }

    #[test]
    fn test_unsupported_statements() {
        for text in ["def f():", "import os", "return 1", "try:"] {
            assert!(matches!(
                parse_line(text, 3),
                Err(Error::SyntaxError { line: 3, .. })
            ));
        }
    }

    #[test]
    fn test_parse_args() {
        let args = parse_args("title='a, b', n=f(1, 2)", 1).unwrap();
        let keys: Vec<&str> = args.iter().map(|(key, _)| key.as_str()).collect();
        assert_eq!(keys, vec!["title", "n"]);
        assert_eq!(args[1].1.source(), "f(1, 2)");
        assert!(parse_args("positional", 1).is_err());
    }
}
