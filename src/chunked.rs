//! Fixed-size output chunks over a fragment stream.

use crate::error::Result;
use std::mem;

/// Regroups fragments into chunks of `size` bytes.
///
/// Chunks are cut on character boundaries, so a chunk is only shorter than
/// `size` when a multi-byte character straddles the cut, or when it is the
/// final remainder.
#[derive(Debug)]
pub struct Chunked<I> {
    inner: I,
    size: usize,
    buffer: String,
    done: bool,
}

impl<I> Chunked<I>
where
    I: Iterator<Item = Result<String>>,
{
    pub fn new(inner: I, size: usize) -> Self {
        Self {
            inner,
            size: size.max(1),
            buffer: String::new(),
            done: false,
        }
    }

    fn cut(&mut self) -> String {
        let mut at = self.size;
        while !self.buffer.is_char_boundary(at) {
            at -= 1;
        }
        if at == 0 {
            // a single character wider than the chunk size
            at = self.buffer.chars().next().map_or(0, char::len_utf8);
        }
        let rest = self.buffer.split_off(at);
        mem::replace(&mut self.buffer, rest)
    }
}

impl<I> Iterator for Chunked<I>
where
    I: Iterator<Item = Result<String>>,
{
    type Item = Result<String>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if self.buffer.len() > self.size {
                return Some(Ok(self.cut()));
            }
            if self.done {
                if self.buffer.is_empty() {
                    return None;
                }
                return Some(Ok(mem::take(&mut self.buffer)));
            }
            match self.inner.next() {
                Some(Ok(fragment)) => self.buffer.push_str(&fragment),
                Some(Err(err)) => {
                    self.done = true;
                    self.buffer.clear();
                    return Some(Err(err));
                }
                None => self.done = true,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;

    fn chunks(fragments: &[&str], size: usize) -> Vec<String> {
        let source = fragments.iter().map(|f| Ok(f.to_string()));
        Chunked::new(source, size).collect::<Result<Vec<_>>>().unwrap()
    }

    #[test]
    fn test_exact_multiple() {
        assert_eq!(chunks(&["abcd", "ef"], 3), vec!["abc", "def"]);
    }

    #[test]
    fn test_remainder_is_flushed() {
        assert_eq!(chunks(&["ab", "cdefg"], 3), vec!["abc", "def", "g"]);
    }

    #[test]
    fn test_small_output_is_one_chunk() {
        assert_eq!(chunks(&["ab"], 4096), vec!["ab"]);
        assert!(chunks(&[], 4).is_empty());
    }

    #[test]
    fn test_cuts_on_char_boundaries() {
        assert_eq!(chunks(&["aé", "b"], 2), vec!["a", "é", "b"]);
        assert_eq!(chunks(&["€€"], 1), vec!["€", "€"]);
    }

    #[test]
    fn test_error_ends_stream() {
        let source = vec![
            Ok("abc".to_string()),
            Err(Error::ContextError("boom".to_string())),
            Ok("def".to_string()),
        ];
        let mut chunked = Chunked::new(source.into_iter(), 2);
        assert_eq!(chunked.next().unwrap().unwrap(), "ab");
        assert!(chunked.next().unwrap().is_err());
        assert!(chunked.next().is_none());
    }
}
