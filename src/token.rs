//! Keyword recognition for statement lines.
//! Classifies a code line (already stripped of the `%` prefix) into a suite
//! opener, a suite switch, one of the inheritance directives or a plain
//! embedded statement.

use crate::constants::{INDENT_TOKENS, REDENT_TOKENS};
use regex::Regex;
use std::sync::LazyLock;

/// Inheritance and structure directives understood by the translator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Directive {
    Block,
    BlockSuper,
    End,
    Extends,
    Include,
    Rebase,
    Base,
}

impl Directive {
    /// All directives, longest keyword first.
    pub const ALL: [Directive; 7] = [
        Directive::BlockSuper,
        Directive::Extends,
        Directive::Include,
        Directive::Rebase,
        Directive::Block,
        Directive::Base,
        Directive::End,
    ];

    /// Keyword as written in template sources.
    pub fn keyword(&self) -> &'static str {
        match self {
            Directive::Block => "block",
            Directive::BlockSuper => "block.super",
            Directive::End => "end",
            Directive::Extends => "extends",
            Directive::Include => "include",
            Directive::Rebase => "rebase",
            Directive::Base => "base",
        }
    }

    fn from_keyword(keyword: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|d| d.keyword() == keyword)
    }
}

impl std::fmt::Display for Directive {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.keyword())
    }
}

/// Classification of a single statement line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Token<'a> {
    /// Line starts with a keyword opening an indented suite (`if`, `for`, ...)
    Indent(&'a str),
    /// Line starts with a keyword continuing a suite (`else`, `elif`, ...)
    Redent(&'a str),
    /// Line is a custom directive with its raw, untrimmed parameter text
    Directive {
        directive: Directive,
        params: Option<&'a str>,
    },
    /// Anything else, passed through to the host language
    Statement,
}

fn alternation<'a>(words: impl IntoIterator<Item = &'a str>) -> String {
    let mut words: Vec<&str> = words.into_iter().collect();
    // longest first so `block.super` is tried before `block`
    words.sort_by(|a, b| b.len().cmp(&a.len()));
    words.iter().map(|w| regex::escape(w)).collect::<Vec<_>>().join("|")
}

static TOKENS: LazyLock<Regex> = LazyLock::new(|| {
    let indent = alternation(INDENT_TOKENS);
    let redent = alternation(REDENT_TOKENS);
    let custom = alternation(Directive::ALL.iter().map(|d| d.keyword()));
    let pattern = format!(
        r"^(?:(?P<indent>{indent})\b|(?P<redent>{redent})\b|(?P<custom>{custom})\b\s*(?P<params>(?:\s+.*|\(.*\))\s*)?$)"
    );
    Regex::new(&pattern).expect("token pattern is a valid regex")
});

/// Classifies a trimmed statement line.
///
/// # Arguments
/// * `line` - Statement text without the leading `%`
///
/// # Returns
/// * `Token` - The category of the line, borrowing keyword and parameter text
pub fn classify(line: &str) -> Token<'_> {
    let Some(captures) = TOKENS.captures(line) else {
        return Token::Statement;
    };
    if let Some(keyword) = captures.name("indent") {
        return Token::Indent(keyword.as_str());
    }
    if let Some(keyword) = captures.name("redent") {
        return Token::Redent(keyword.as_str());
    }
    match captures.name("custom").and_then(|m| Directive::from_keyword(m.as_str())) {
        Some(directive) => Token::Directive {
            directive,
            params: captures.name("params").map(|m| m.as_str()),
        },
        None => Token::Statement,
    }
}
