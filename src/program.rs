//! Compiled programs.
//! Assembles the translator's code listing into statement trees: continuation
//! lines are joined, suites are nested by indentation column and every
//! expression is compiled exactly once.

use crate::error::{Error, Result};
use crate::host::{parse_args, parse_line, scan, Body, Expr, Header, Line, Stmt, StmtKind};
use crate::translator::{translate, CodeLine, Op};
use indexmap::IndexMap;
use log::debug;
use std::iter::Peekable;
use std::vec::IntoIter;

/// The executable form of one template source.
#[derive(Debug)]
pub struct Program {
    name: String,
    body: Body,
    blocks: IndexMap<String, Body>,
    includes: Vec<String>,
    extends: Option<String>,
    rebase: Option<String>,
    listing: String,
}

impl Program {
    /// Compiles a template source.
    ///
    /// # Arguments
    /// * `source` - Template source text
    /// * `name` - Template name used in diagnostics
    ///
    /// # Returns
    /// * `Result<Program>` - The compiled program
    ///
    /// # Errors
    /// * `Error::SyntaxError` or `Error::ValueError` with the offending source line
    pub fn compile(source: &str, name: &str) -> Result<Self> {
        let translation = translate(source)?;
        let listing = translation.to_string();
        let body = assemble(translation.body)?;
        let mut blocks = IndexMap::with_capacity(translation.blocks.len());
        for (block, lines) in translation.blocks {
            blocks.insert(block, assemble(lines)?);
        }
        debug!(
            "Compiled template '{}' ({} blocks, extends: {:?}, rebase: {:?})",
            name,
            blocks.len(),
            translation.extends,
            translation.rebase
        );
        Ok(Self {
            name: name.to_string(),
            body,
            blocks,
            includes: translation.includes,
            extends: translation.extends,
            rebase: translation.rebase,
            listing,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn body(&self) -> &Body {
        &self.body
    }

    pub fn block(&self, name: &str) -> Option<&Body> {
        self.blocks.get(name)
    }

    /// Names of the blocks defined by this program, in definition order.
    pub fn blocks(&self) -> impl Iterator<Item = &str> {
        self.blocks.keys().map(String::as_str)
    }

    pub fn includes(&self) -> &[String] {
        &self.includes
    }

    pub fn extends(&self) -> Option<&str> {
        self.extends.as_deref()
    }

    pub fn rebase(&self) -> Option<&str> {
        self.rebase.as_deref()
    }

    /// The textual code listing.
    pub fn listing(&self) -> &str {
        &self.listing
    }
}

enum Item {
    Op(Op),
    Line(Line),
}

struct Entry {
    column: usize,
    line: usize,
    item: Item,
}

/// Joins statements spanning several lines and parses every statement.
fn entries(lines: Vec<CodeLine>) -> Result<Vec<Entry>> {
    let mut entries = Vec::with_capacity(lines.len());
    let mut pending: Option<(usize, usize, String)> = None;
    for code_line in lines {
        let column = code_line.column();
        match code_line.op {
            Op::Code { text, .. } => {
                let (column, line, text) = match pending.take() {
                    Some((column, line, mut joined)) => {
                        joined.push('\n');
                        joined.push_str(&text);
                        (column, line, joined)
                    }
                    None => (column, code_line.line, text),
                };
                if scan(&text).continues() {
                    pending = Some((column, line, text));
                    continue;
                }
                entries.push(Entry {
                    column,
                    line,
                    item: Item::Line(parse_line(&text, line)?),
                });
            }
            op => {
                if let Some((_, line, _)) = pending {
                    return Err(Error::syntax("Unterminated statement", line));
                }
                entries.push(Entry {
                    column,
                    line: code_line.line,
                    item: Item::Op(op),
                });
            }
        }
    }
    match pending {
        Some((_, line, _)) => Err(Error::syntax("Unterminated statement", line)),
        None => Ok(entries),
    }
}

fn assemble(lines: Vec<CodeLine>) -> Result<Body> {
    let mut assembler = Assembler {
        entries: entries(lines)?.into_iter().peekable(),
    };
    let body = assembler.suite(0, false)?;
    Ok(body.into())
}

struct Assembler {
    entries: Peekable<IntoIter<Entry>>,
}

impl Assembler {
    fn suite(&mut self, column: usize, in_loop: bool) -> Result<Vec<Stmt>> {
        let mut stmts = Vec::new();
        while let Some(entry) = self.entries.peek() {
            if entry.column < column {
                break;
            }
            if entry.column > column {
                return Err(Error::syntax("Unexpected indentation", entry.line));
            }
            self.statement(column, in_loop, &mut stmts)?;
        }
        Ok(stmts)
    }

    fn statement(&mut self, column: usize, in_loop: bool, out: &mut Vec<Stmt>) -> Result<()> {
        let Some(Entry { line, item, .. }) = self.entries.next() else {
            return Ok(());
        };
        let kind = match item {
            Item::Op(op) => match op_statement(op, line)? {
                Some(kind) => kind,
                None => return Ok(()),
            },
            Item::Line(Line::Empty) => return Ok(()),
            Item::Line(Line::Simple(kind)) => {
                check_loop(&kind, in_loop, line)?;
                kind
            }
            Item::Line(Line::Header { header, inline }) => {
                self.compound(header, inline, column, in_loop, line)?
            }
        };
        out.push(Stmt { line, kind });
        Ok(())
    }

    fn compound(
        &mut self,
        header: Header,
        inline: Option<String>,
        column: usize,
        in_loop: bool,
        line: usize,
    ) -> Result<StmtKind> {
        match header {
            Header::If(cond) => {
                let mut branches = vec![(cond, self.body(inline, column, in_loop, line)?)];
                while let Some((header, inline, line)) = self.clause(column, "elif") {
                    if let Header::Elif(cond) = header {
                        branches.push((cond, self.body(inline, column, in_loop, line)?));
                    }
                }
                let orelse = self.orelse(column, in_loop)?;
                Ok(StmtKind::If { branches, orelse })
            }
            Header::For(targets, iter) => {
                let body = self.body(inline, column, true, line)?;
                let orelse = self.orelse(column, in_loop)?;
                Ok(StmtKind::For {
                    targets,
                    iter,
                    body,
                    orelse,
                })
            }
            Header::While(cond) => {
                let body = self.body(inline, column, true, line)?;
                let orelse = self.orelse(column, in_loop)?;
                Ok(StmtKind::While { cond, body, orelse })
            }
            Header::With(value, name) => {
                let body = self.body(inline, column, in_loop, line)?;
                Ok(StmtKind::With { value, name, body })
            }
            header @ (Header::Elif(_) | Header::Else) => Err(Error::syntax(
                format!("'{}' without a matching statement", header.keyword()),
                line,
            )),
        }
    }

    /// Takes the next entry if it is a `keyword` clause at `column`.
    fn clause(&mut self, column: usize, keyword: &str) -> Option<(Header, Option<String>, usize)> {
        let entry = self.entries.next_if(|entry| {
            entry.column == column
                && matches!(&entry.item, Item::Line(Line::Header { header, .. }) if header.keyword() == keyword)
        })?;
        match entry.item {
            Item::Line(Line::Header { header, inline }) => Some((header, inline, entry.line)),
            _ => None,
        }
    }

    fn orelse(&mut self, column: usize, in_loop: bool) -> Result<Option<Body>> {
        match self.clause(column, "else") {
            Some((_, inline, line)) => Ok(Some(self.body(inline, column, in_loop, line)?)),
            None => Ok(None),
        }
    }

    /// Suite of a compound statement: the inline statement after the colon,
    /// followed by the lines indented deeper than the header.
    fn body(&mut self, inline: Option<String>, column: usize, in_loop: bool, line: usize) -> Result<Body> {
        let mut stmts = Vec::new();
        let has_inline = inline.is_some();
        if let Some(inline) = inline {
            match parse_line(&inline, line)? {
                Line::Header { .. } => {
                    return Err(Error::syntax("Compound statement after ':'", line));
                }
                Line::Empty => {}
                Line::Simple(kind) => {
                    check_loop(&kind, in_loop, line)?;
                    stmts.push(Stmt { line, kind });
                }
            }
        }
        match self.entries.peek().map(|entry| entry.column) {
            Some(nested) if nested > column => stmts.extend(self.suite(nested, in_loop)?),
            _ if !has_inline => return Err(Error::syntax("Expected an indented block", line)),
            _ => {}
        }
        Ok(stmts.into())
    }
}

fn check_loop(kind: &StmtKind, in_loop: bool, line: usize) -> Result<()> {
    let keyword = match kind {
        StmtKind::Break => "break",
        StmtKind::Continue => "continue",
        _ => return Ok(()),
    };
    if in_loop {
        Ok(())
    } else {
        Err(Error::syntax(format!("'{keyword}' outside loop"), line))
    }
}

fn op_statement(op: Op, line: usize) -> Result<Option<StmtKind>> {
    let kind = match op {
        Op::Text(batch) => StmtKind::Text {
            args: batch
                .args
                .iter()
                .map(|arg| Expr::compile(arg, line))
                .collect::<Result<_>>()?,
            literals: batch.literals,
        },
        Op::Code { .. } | Op::Pass => return Ok(None),
        Op::Block { name, args } => StmtKind::Block {
            name,
            args: parse_args(&args, line)?,
        },
        Op::BlockSuper => StmtKind::BlockSuper,
        Op::Include { name, args } => StmtKind::Include {
            name,
            args: parse_args(&args, line)?,
        },
        Op::Base => StmtKind::Base,
    };
    Ok(Some(kind))
}
