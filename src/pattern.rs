//! Key path templates and the matcher that maps a dict key onto them.
//!
//! A template such as `shared/quota/$user` is parsed once into literal and
//! variable elements. A variable is `$` followed by a name that runs to the
//! next `/`; the name is only informative, captures are bound to map
//! attributes by position.

use std::fmt;

use crate::error::{DictError, Result};

#[derive(Debug, Clone, PartialEq, Eq)]
enum Element {
    Literal(String),
    Variable(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Pattern {
    source: String,
    elements: Vec<Element>,
}

impl Pattern {
    pub fn parse(source: &str) -> Result<Self> {
        let mut elements = Vec::new();
        let mut literal = String::new();
        let mut chars = source.chars().peekable();
        while let Some(c) = chars.next() {
            if c != '$' {
                literal.push(c);
                continue;
            }
            if !literal.is_empty() {
                elements.push(Element::Literal(std::mem::take(&mut literal)));
            }
            if matches!(elements.last(), Some(Element::Variable(_))) {
                return Err(DictError::Config(format!(
                    "pattern {source:?}: variables must be separated by literal text"
                )));
            }
            let mut name = String::new();
            while let Some(&next) = chars.peek() {
                if next == '/' {
                    break;
                }
                name.push(next);
                chars.next();
            }
            elements.push(Element::Variable(name));
        }
        if !literal.is_empty() {
            elements.push(Element::Literal(literal));
        }
        Ok(Self { source: source.to_string(), elements })
    }

    pub fn as_str(&self) -> &str {
        &self.source
    }

    /// Names of the variables in declaration order.
    pub fn variables(&self) -> impl Iterator<Item = &str> {
        self.elements.iter().filter_map(|e| match e {
            Element::Variable(name) => Some(name.as_str()),
            Element::Literal(_) => None,
        })
    }

    /// Match the whole of `key`, returning one capture per variable.
    pub fn match_key(&self, key: &str) -> Option<Vec<String>> {
        self.run(key, None)
    }

    /// Match `key` as a `/`-terminated prefix of what the template accepts.
    ///
    /// Without `recurse` exactly one trailing variable may remain unmatched.
    /// A final variable that does match drops a trailing `/` from its capture.
    /// A key that ends inside an inner variable captures the rest and counts
    /// the `/` following that variable as matched.
    pub fn match_prefix(&self, key: &str, recurse: bool) -> Option<Vec<String>> {
        self.run(key, Some(recurse))
    }

    fn run(&self, key: &str, prefix: Option<bool>) -> Option<Vec<String>> {
        let mut captures = Vec::new();
        let mut rest = key;
        // last pattern character consumed so far
        let mut last_consumed: Option<char> = None;

        for (i, element) in self.elements.iter().enumerate() {
            if rest.is_empty() {
                return self.accept_exhausted(i, 0, last_consumed, prefix).then_some(captures);
            }
            match element {
                Element::Literal(lit) => {
                    if let Some(after) = rest.strip_prefix(lit.as_str()) {
                        rest = after;
                        last_consumed = lit.chars().last();
                        continue;
                    }
                    // the key may run out in the middle of the literal
                    if lit.starts_with(rest) {
                        let consumed = rest.len();
                        let last = lit[..consumed].chars().last();
                        return self.accept_exhausted(i, consumed, last, prefix).then_some(captures);
                    }
                    return None;
                }
                Element::Variable(_) => {
                    let is_last = i + 1 == self.elements.len();
                    if is_last {
                        let value = match prefix {
                            Some(_) => rest.strip_suffix('/').unwrap_or(rest),
                            None => rest,
                        };
                        captures.push(value.to_string());
                        return Some(captures);
                    }
                    match rest.find('/') {
                        Some(pos) => {
                            captures.push(rest[..pos].to_string());
                            rest = &rest[pos..];
                        }
                        None => {
                            captures.push(rest.to_string());
                            // the key ended inside the variable; the separator
                            // after it counts as passed
                            let Element::Literal(next) = &self.elements[i + 1] else {
                                return None;
                            };
                            if !next.starts_with('/') {
                                return None;
                            }
                            let accepted = if next.len() == 1 {
                                self.accept_exhausted(i + 2, 0, Some('/'), prefix)
                            } else {
                                self.accept_exhausted(i + 1, 1, Some('/'), prefix)
                            };
                            return accepted.then_some(captures);
                        }
                    }
                    last_consumed = Some('$');
                }
            }
        }

        rest.is_empty().then_some(captures)
    }

    /// The key ran out while pattern elements from `index` (of which the
    /// first `consumed` bytes were already matched) are left over.
    fn accept_exhausted(
        &self,
        index: usize,
        consumed: usize,
        last_consumed: Option<char>,
        prefix: Option<bool>,
    ) -> bool {
        let Some(recurse) = prefix else {
            return false;
        };
        if index == self.elements.len() {
            return true;
        }
        if last_consumed != Some('/') {
            return false;
        }
        if recurse {
            return true;
        }
        consumed == 0
            && index + 1 == self.elements.len()
            && matches!(self.elements[index], Element::Variable(_))
    }
}

impl fmt::Display for Pattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.source)
    }
}

/// Scan `candidates` in order and return the first whose pattern matches
/// `key` exactly, together with its captures.
pub fn find_match<'a, T, F>(candidates: &'a [T], key: &str, pattern_of: F) -> Option<(&'a T, Vec<String>)>
where
    F: Fn(&T) -> &Pattern,
{
    candidates
        .iter()
        .find_map(|candidate| pattern_of(candidate).match_key(key).map(|captures| (candidate, captures)))
}
