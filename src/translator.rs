//! Template-to-code translation.
//!
//! The translator walks a template source line by line and produces a code
//! listing: indented [`CodeLine`]s for the template body, one listing per
//! `block`, and the inheritance metadata declared by directives.
//!
//! Rules:
//! * Lines starting with `%` are embedded statements or directives.
//! * `% end` closes the innermost suite or block.
//! * Code regions start with `<%` and end with `%>`.
//! * Variable substitution starts with `{{` and ends with `}}`.
//!
//! Consecutive text lines collapse into a single [`Op::Text`] batch, and a
//! `pass` is only synthesized where a suite would otherwise be empty.

use crate::constants::{
    CODE_LINE_PREFIX, LITERAL_CLOSE, LITERAL_OPEN, TAB_WIDTH, VARIABLE_CLOSE, VARIABLE_OPEN,
};
use crate::error::{Error, Result};
use crate::params::token_params;
use crate::token::{classify, Directive, Token};
use indexmap::IndexMap;
use log::debug;
use regex::Regex;
use std::fmt;
use std::sync::LazyLock;

const LINESEP: &str = "\n";

static VARIABLE: LazyLock<Regex> = LazyLock::new(|| {
    let pattern = format!(
        "{}(.*?){}",
        regex::escape(VARIABLE_OPEN),
        regex::escape(VARIABLE_CLOSE)
    );
    Regex::new(&pattern).expect("variable pattern is a valid regex")
});

/// A run of literal text with positional substitutions.
///
/// `literals` always holds one more element than `args`; the rendered text is
/// `literals[0] + args[0] + literals[1] + ...`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TextBatch {
    pub literals: Vec<String>,
    pub args: Vec<String>,
}

impl TextBatch {
    fn new() -> Self {
        Self {
            literals: vec![String::new()],
            args: Vec::new(),
        }
    }

    fn push_text(&mut self, text: &str) {
        if let Some(last) = self.literals.last_mut() {
            last.push_str(text);
        }
    }

    fn push_arg(&mut self, expr: &str) {
        self.args.push(expr.to_string());
        self.literals.push(String::new());
    }

    /// Format string of the batch, `%s` marking each argument.
    pub fn format_string(&self) -> String {
        self.literals
            .iter()
            .map(|literal| literal.replace('%', "%%"))
            .collect::<Vec<_>>()
            .join("%s")
    }
}

/// One operation of the code listing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Op {
    /// Yield a batch of literal text
    Text(TextBatch),
    /// Embedded statement, with its indentation relative to the line level
    Code { indent: usize, text: String },
    /// No-op keeping a suite non-empty
    Pass,
    /// Yield the most derived definition of a block
    Block { name: String, args: String },
    /// Yield the parent definition of the enclosing block
    BlockSuper,
    /// Yield another template
    Include { name: String, args: String },
    /// Yield the output of the template rebased onto this one
    Base,
}

impl fmt::Display for Op {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fn delegate(f: &mut fmt::Formatter<'_>, func: &str, name: &str, args: &str) -> fmt::Result {
            if args.is_empty() {
                write!(f, "yield from {func}({name:?})")
            } else {
                write!(f, "yield from {func}({name:?}, {args})")
            }
        }

        match self {
            Op::Text(batch) if batch.args.is_empty() => {
                write!(f, "yield {:?}", batch.format_string())
            }
            Op::Text(batch) => write!(
                f,
                "yield {:?} % ({})",
                batch.format_string(),
                batch.args.join(", ")
            ),
            Op::Code { indent, text } => write!(f, "{}{}", " ".repeat(*indent), text),
            Op::Pass => f.write_str("pass"),
            Op::Block { name, args } => delegate(f, "block", name, args),
            Op::BlockSuper => f.write_str("yield from block.super()"),
            Op::Include { name, args } => delegate(f, "include", name, args),
            Op::Base => f.write_str("yield from base()"),
        }
    }
}

/// An operation placed at an indentation level, tagged with its source line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CodeLine {
    pub level: usize,
    pub line: usize,
    pub op: Op,
}

impl CodeLine {
    /// Absolute indentation column, counting the statement's own indentation.
    pub fn column(&self) -> usize {
        let extra = match &self.op {
            Op::Code { indent, .. } => *indent,
            _ => 0,
        };
        self.level * TAB_WIDTH + extra
    }
}

impl fmt::Display for CodeLine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", " ".repeat((self.level + 1) * TAB_WIDTH), self.op)
    }
}

/// Result of translating one template source.
#[derive(Debug, Default, Clone)]
pub struct Translation {
    /// Listing of the template body
    pub body: Vec<CodeLine>,
    /// Listings of every block, in definition order
    pub blocks: IndexMap<String, Vec<CodeLine>>,
    /// Names of statically included templates
    pub includes: Vec<String>,
    /// Template this one extends
    pub extends: Option<String>,
    /// Template this one rebases onto
    pub rebase: Option<String>,
}

impl fmt::Display for Translation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fn suite(f: &mut fmt::Formatter<'_>, lines: &[CodeLine]) -> fmt::Result {
            if lines.is_empty() {
                writeln!(f, "{}pass", " ".repeat(TAB_WIDTH))?;
            }
            for line in lines {
                writeln!(f, "{line}")?;
            }
            Ok(())
        }

        writeln!(f, "def __template__():")?;
        suite(f, &self.body)?;
        for (name, lines) in &self.blocks {
            writeln!(f, "def __block__({name:?}):")?;
            suite(f, lines)?;
        }
        writeln!(f, "__includes__ = {:?}", self.includes)?;
        writeln!(f, "__extends__ = {:?}", self.extends)?;
        writeln!(f, "__rebase__ = {:?}", self.rebase)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Mode {
    Template,
    Literal,
}

/// Line-by-line translator state.
#[derive(Debug)]
pub struct CodeTranslator {
    mode: Mode,
    /// Inside an inline code region: text lines get no line separator
    inline: bool,
    /// Current line had a line terminator in the source
    terminated: bool,
    /// Open text batch as (level, first line, batch)
    batch: Option<(usize, usize, TextBatch)>,
    /// Base indentation of the current code region
    base: Option<usize>,
    level: usize,
    level_touched: bool,
    /// Text preceded the current code region on its line
    previous_string: bool,
    /// Whitespace preceding the current code region on its line
    previous_indent: String,
    linenum: usize,
    /// Enclosing (level, name) of every open block
    block_stack: Vec<(usize, String)>,
    out: Translation,
}

impl Default for CodeTranslator {
    fn default() -> Self {
        CodeTranslator::new()
    }
}

impl CodeTranslator {
    pub fn new() -> Self {
        Self {
            mode: Mode::Template,
            inline: false,
            terminated: true,
            batch: None,
            base: None,
            level: 0,
            level_touched: false,
            previous_string: false,
            previous_indent: String::new(),
            linenum: 0,
            block_stack: Vec::new(),
            out: Translation::default(),
        }
    }

    /// Translates a whole template source.
    ///
    /// # Errors
    /// * `Error::SyntaxError` for misplaced or unmatched directives
    /// * `Error::ValueError` for directives missing their name
    pub fn translate(mut self, source: &str) -> Result<Translation> {
        let mut lines = source.split(LINESEP).peekable();
        while let Some(line) = lines.next() {
            let last = lines.peek().is_none();
            if last && line.is_empty() {
                break;
            }
            self.linenum += 1;
            self.terminated = !last;
            let line = line.strip_suffix('\r').unwrap_or(line);
            match self.mode {
                Mode::Template => self.template_line(line)?,
                Mode::Literal => self.literal_line(line)?,
            }
        }
        self.finish_string();
        if self.level > 0 && !self.level_touched {
            self.emit(Op::Pass);
        }
        debug!(
            "Translated {} lines into {} body operations and {} blocks",
            self.linenum,
            self.out.body.len(),
            self.out.blocks.len()
        );
        Ok(self.out)
    }

    fn trail(&self) -> &'static str {
        if self.inline || !self.terminated {
            ""
        } else {
            LINESEP
        }
    }

    fn emit(&mut self, op: Op) {
        let line = CodeLine {
            level: self.level,
            line: self.linenum,
            op,
        };
        self.route(line);
    }

    fn route(&mut self, line: CodeLine) {
        let target = match self.block_stack.last() {
            Some((_, name)) => self.out.blocks.entry(name.clone()).or_default(),
            None => &mut self.out.body,
        };
        target.push(line);
    }

    fn start_string(&mut self) -> &mut TextBatch {
        self.level_touched = true;
        let (level, line) = (self.level, self.linenum);
        let (_, _, batch) = self.batch.get_or_insert_with(|| (level, line, TextBatch::new()));
        batch
    }

    fn finish_string(&mut self) {
        if let Some((level, line, batch)) = self.batch.take() {
            self.level_touched = true;
            self.route(CodeLine {
                level,
                line,
                op: Op::Text(batch),
            });
        }
    }

    fn template_line(&mut self, data: &str) -> Result<()> {
        let (data, literal) = match data.split_once(LITERAL_OPEN) {
            Some((data, literal)) => {
                self.inline = true;
                (data, Some(literal))
            }
            None => (data, None),
        };
        let lstripped = data.trim_start();
        if let Some(code) = lstripped.strip_prefix(CODE_LINE_PREFIX) {
            self.finish_string();
            self.previous_string = false;
            self.code_line(code.trim_start())?;
        } else {
            if self.inline {
                if data.trim().is_empty() {
                    self.previous_string = false;
                    self.previous_indent = data[..data.len() - lstripped.len()].to_string();
                } else {
                    self.previous_string = true;
                    self.previous_indent.clear();
                }
            }
            self.string_line(data)?;
        }
        if let Some(literal) = literal {
            self.mode = Mode::Literal;
            self.literal_line(literal)?;
        }
        Ok(())
    }

    fn string_line(&mut self, data: &str) -> Result<()> {
        let trail = self.trail();
        if !data.trim().is_empty() {
            let line = self.linenum;
            let batch = self.start_string();
            let mut last = 0;
            for captures in VARIABLE.captures_iter(data) {
                let (Some(whole), Some(expr)) = (captures.get(0), captures.get(1)) else {
                    continue;
                };
                let expr = expr.as_str().trim();
                if expr.is_empty() {
                    return Err(Error::syntax("Empty variable substitution", line));
                }
                batch.push_text(&data[last..whole.start()]);
                batch.push_arg(expr);
                last = whole.end();
            }
            batch.push_text(&data[last..]);
            batch.push_text(trail);
        } else if !self.inline {
            let batch = self.start_string();
            batch.push_text(data);
            batch.push_text(trail);
        }
        Ok(())
    }

    fn literal_line(&mut self, data: &str) -> Result<()> {
        let (data, template) = match data.split_once(LITERAL_CLOSE) {
            Some((data, template)) => (data, Some(template)),
            None => (data, None),
        };
        let stripped = data.trim();
        if self.base.is_none() && !stripped.is_empty() {
            self.base = Some(leading_whitespace(data));
        }
        if !stripped.is_empty() {
            let code = strip_indent(data, self.base.unwrap_or(0));
            let indent = leading_whitespace(code);
            // a bare `pass` is redundant once the level has content
            if !(self.level_touched && indent == 0 && stripped == "pass") {
                self.finish_string();
                if indent == 0 && !stripped.starts_with('#') {
                    self.level_touched = true;
                }
                self.emit(Op::Code {
                    indent,
                    text: stripped.to_string(),
                });
            }
        } else {
            self.finish_string();
        }

        if let Some(template) = template {
            self.base = None;
            self.inline = false;
            self.mode = Mode::Template;
            if !template.trim().is_empty() {
                let indent = std::mem::take(&mut self.previous_indent);
                self.start_string().push_text(&indent);
                self.template_line(template)?;
            } else if self.previous_string {
                let trail = self.trail();
                self.start_string().push_text(trail);
            }
        }
        Ok(())
    }

    fn code_line(&mut self, code: &str) -> Result<()> {
        match classify(code) {
            Token::Directive { directive, params } => self.directive(directive, params),
            Token::Redent(keyword) => {
                if !self.level_touched {
                    self.emit(Op::Pass);
                }
                if self.level == 0 {
                    return Err(Error::syntax(
                        format!("Token '{keyword}' without an open statement"),
                        self.linenum,
                    ));
                }
                self.level -= 1;
                self.emit(Op::Code {
                    indent: 0,
                    text: code.trim_end().to_string(),
                });
                self.level += 1;
                self.level_touched = false;
                Ok(())
            }
            Token::Indent(_) => {
                self.emit(Op::Code {
                    indent: 0,
                    text: code.trim_end().to_string(),
                });
                self.level += 1;
                self.level_touched = false;
                Ok(())
            }
            Token::Statement => {
                let code = code.trim_end();
                if !code.is_empty() {
                    if !code.starts_with('#') {
                        self.level_touched = true;
                    }
                    self.emit(Op::Code {
                        indent: 0,
                        text: code.to_string(),
                    });
                }
                Ok(())
            }
        }
    }

    fn directive(&mut self, directive: Directive, params: Option<&str>) -> Result<()> {
        match directive {
            Directive::End => self.token_end(),
            Directive::Extends | Directive::Rebase => self.token_metadata(directive, params),
            Directive::Block => self.token_block(params),
            Directive::BlockSuper => {
                if self.block_stack.is_empty() {
                    return Err(Error::syntax(
                        "Token 'block.super' outside any block",
                        self.linenum,
                    ));
                }
                self.level_touched = true;
                self.emit(Op::BlockSuper);
                Ok(())
            }
            Directive::Include => {
                let (name, args) = self.named(directive, params)?;
                if !self.out.includes.contains(&name) {
                    self.out.includes.push(name.clone());
                }
                self.level_touched = true;
                self.emit(Op::Include { name, args });
                Ok(())
            }
            Directive::Base => {
                self.level_touched = true;
                self.emit(Op::Base);
                Ok(())
            }
        }
    }

    /// Name and trailing arguments of a delegating directive.
    fn named(&self, directive: Directive, params: Option<&str>) -> Result<(String, String)> {
        let params = token_params(params, Some(1));
        match params.name() {
            Some(name) => Ok((name.to_string(), params.extra.clone())),
            None => Err(Error::value(
                format!("Token '{directive}' receives at least one parameter: name"),
                self.linenum,
            )),
        }
    }

    fn token_end(&mut self) -> Result<()> {
        if !self.level_touched {
            self.emit(Op::Pass);
        }
        // the enclosing level already holds the opening line
        self.level_touched = true;
        if self.level > 0 {
            self.level -= 1;
            return Ok(());
        }
        match self.block_stack.pop() {
            Some((level, _)) => {
                self.level = level;
                Ok(())
            }
            None => Err(Error::syntax("Unmatched 'end' token", self.linenum)),
        }
    }

    fn token_metadata(&mut self, directive: Directive, params: Option<&str>) -> Result<()> {
        if self.level > 0 || !self.block_stack.is_empty() {
            return Err(Error::syntax(
                format!("Token '{directive}' must be outside any block"),
                self.linenum,
            ));
        }
        let declared = match directive {
            Directive::Rebase => &self.out.rebase,
            _ => &self.out.extends,
        };
        if declared.is_some() {
            return Err(Error::syntax(
                format!("Token '{directive}' cannot be defined twice"),
                self.linenum,
            ));
        }
        let params = token_params(params, None);
        let Some(name) = params.name().map(str::to_string) else {
            return Err(Error::value(
                format!("Token '{directive}' receives at least one parameter: name"),
                self.linenum,
            ));
        };
        match directive {
            Directive::Rebase => self.out.rebase = Some(name),
            _ => self.out.extends = Some(name),
        }
        Ok(())
    }

    fn token_block(&mut self, params: Option<&str>) -> Result<()> {
        let (name, args) = self.named(Directive::Block, params)?;
        let open = self.block_stack.iter().any(|(_, open)| *open == name);
        if open || self.out.blocks.contains_key(&name) {
            return Err(Error::syntax(
                format!("Block '{name}' defined twice"),
                self.linenum,
            ));
        }
        self.level_touched = true;
        self.emit(Op::Block {
            name: name.clone(),
            args,
        });
        self.out.blocks.insert(name.clone(), Vec::new());
        self.block_stack.push((self.level, name));
        self.level = 0;
        self.level_touched = false;
        Ok(())
    }
}

fn leading_whitespace(text: &str) -> usize {
    text.len() - text.trim_start().len()
}

/// Removes at most `width` bytes of leading whitespace.
fn strip_indent(text: &str, width: usize) -> &str {
    let mut width = width.min(leading_whitespace(text));
    while !text.is_char_boundary(width) {
        width -= 1;
    }
    &text[width..]
}

/// Translates a template source with a fresh translator.
pub fn translate(source: &str) -> Result<Translation> {
    CodeTranslator::new().translate(source)
}
