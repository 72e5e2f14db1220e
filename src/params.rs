//! Directive parameter parsing.
//! Splits the raw text following a directive keyword into positional
//! arguments, keyword arguments and an unparsed remainder.

use indexmap::IndexMap;

/// Character classes driving [`split`].
#[derive(Debug, Clone, Copy)]
pub struct Rules<'a> {
    /// Field separators
    pub seps: &'a str,
    /// Key-value separator for keyword fields (empty disables keywords)
    pub valuesep: &'a str,
    /// Characters dropped outside quotes
    pub strip: &'a str,
    /// Quote characters
    pub quote: &'a str,
    /// Escape characters
    pub escape: &'a str,
    /// Whether escapes are honored outside quoted values
    pub free_escape: bool,
}

/// Rules for `(a, b, key=value)` parameter lists.
pub const PARENTHESIZED: Rules<'static> = Rules {
    seps: ",",
    valuesep: "=",
    strip: ", ",
    quote: "'\"",
    escape: "\\",
    free_escape: false,
};

/// Rules for `a b, c` bare parameter lists.
pub const BARE: Rules<'static> = Rules {
    seps: ", ",
    valuesep: "",
    strip: ", ",
    quote: "'\"",
    escape: "\\",
    free_escape: true,
};

/// Parsed directive parameters.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct Params {
    /// Positional arguments in source order
    pub args: Vec<String>,
    /// Keyword arguments in source order
    pub kwargs: IndexMap<String, String>,
    /// Text left after `maxnum` arguments were consumed
    pub extra: String,
}

impl Params {
    /// The `name` keyword argument, or the first positional one.
    pub fn name(&self) -> Option<&str> {
        self.kwargs
            .get("name")
            .or_else(|| self.args.first())
            .map(String::as_str)
            .filter(|name| !name.is_empty())
    }
}

/// Splits a parameter string following the given rules.
///
/// # Arguments
/// * `params` - Parameter text, without surrounding parentheses
/// * `rules` - Separator, quoting and escaping configuration
/// * `maxnum` - Number of arguments to parse before stopping (`None` for all)
///
/// # Returns
/// * `Params` - Arguments, keyword arguments and the unparsed remainder
pub fn split(params: &str, rules: &Rules<'_>, maxnum: Option<usize>) -> Params {
    let maxnum = maxnum.unwrap_or(usize::MAX);
    let mut args: Vec<String> = vec![String::new()];
    let mut kwargs: IndexMap<String, String> = IndexMap::new();
    let mut key: Option<String> = None;
    let mut quoted: Option<char> = None;
    let mut escaped = false;
    let mut rest = "";

    for (pos, c) in params.char_indices() {
        if escaped {
            escaped = false;
        } else if rules.free_escape && rules.escape.contains(c) {
            escaped = true;
            continue;
        } else if let Some(q) = quoted {
            if rules.escape.contains(c) {
                escaped = true;
                continue;
            }
            if c == q {
                quoted = None;
                continue;
            }
        } else if key.is_none() && rules.valuesep.contains(c) {
            let name = args.pop().unwrap_or_default();
            kwargs.insert(name.clone(), String::new());
            key = Some(name);
            continue;
        } else if rules.quote.contains(c) {
            quoted = Some(c);
            continue;
        } else if rules.seps.contains(c)
            && (key.is_some() || args.last().is_some_and(|arg| !arg.is_empty()))
        {
            if args.len() + kwargs.len() < maxnum {
                key = None;
                args.push(String::new());
                continue;
            }
            rest = &params[pos + c.len_utf8()..];
            break;
        } else if rules.strip.contains(c) {
            continue;
        }

        match &key {
            Some(name) => kwargs.entry(name.clone()).or_default().push(c),
            None => match args.last_mut() {
                Some(arg) => arg.push(c),
                None => args.push(c.to_string()),
            },
        }
    }

    let extra = rules.strip.chars().fold(rest, |extra, c| extra.trim_matches(c));
    Params {
        args,
        kwargs,
        extra: extra.to_string(),
    }
}

/// Parses directive parameters, picking the parenthesized or bare grammar.
///
/// # Arguments
/// * `params` - Raw parameter text as captured after the directive keyword
/// * `maxnum` - Number of arguments to parse before stopping (`None` for all)
pub fn token_params(params: Option<&str>, maxnum: Option<usize>) -> Params {
    let params = params.map(str::trim).unwrap_or_default();
    if params.is_empty() {
        return Params::default();
    }
    match params.strip_prefix('(').and_then(|p| p.strip_suffix(')')) {
        Some(inner) => split(inner, &PARENTHESIZED, maxnum),
        None => split(params, &BARE, maxnum),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn strings(values: &[&str]) -> Vec<String> {
        values.iter().map(|v| v.to_string()).collect()
    }

    #[test]
    fn test_parenthesized_stops_after_maxnum() {
        let params = token_params(Some("(1, 2, 3, 4, k=1, w=2)"), Some(3));
        assert_eq!(params.args, strings(&["1", "2", "3"]));
        assert!(params.kwargs.is_empty());
        assert_eq!(params.extra, "4, k=1, w=2");
    }

    #[test]
    fn test_bare_words_with_quotes_and_escapes() {
        let params = token_params(Some(r"this is 'just a \' test'"), Some(3));
        assert_eq!(params.args, strings(&["this", "is", "just a ' test"]));
        assert!(params.kwargs.is_empty());
        assert_eq!(params.extra, "");
    }

    #[test]
    fn test_mixed_positional_and_keyword() {
        let params = token_params(Some("(mixed, key=value, params)"), Some(3));
        assert_eq!(params.args, strings(&["mixed", "params"]));
        assert_eq!(params.kwargs.get("key").map(String::as_str), Some("value"));
        assert_eq!(params.extra, "");
    }

    #[test]
    fn test_keyword_only_name() {
        let params = token_params(Some("(name=base2)"), None);
        assert!(params.args.is_empty());
        assert_eq!(params.name(), Some("base2"));
    }

    #[test]
    fn test_block_name_with_trailing_arguments() {
        let params = token_params(Some(" content, title='Home', n=1"), Some(1));
        assert_eq!(params.name(), Some("content"));
        assert_eq!(params.extra, "title='Home', n=1");

        let params = token_params(Some("(name=footer, year=2024)"), Some(1));
        assert_eq!(params.name(), Some("footer"));
        assert_eq!(params.extra, "year=2024");
    }

    #[test]
    fn test_empty_params_have_no_name() {
        assert_eq!(token_params(None, Some(1)).name(), None);
        assert_eq!(token_params(Some("   "), Some(1)).name(), None);
        assert_eq!(token_params(Some("''"), Some(1)).name(), None);
    }
}
