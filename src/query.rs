//! Filter construction: `%{name}` expansion over a substitution table.
//!
//! Every substituted value is escaped for use inside a search filter
//! (RFC 4515), so a key can never widen or rewrite the filter it lands in.

use std::collections::HashMap;
use std::hash::BuildHasherDefault;

use lazy_static::lazy_static;
use regex::{Captures, Regex};
use seahash::SeaHasher;

use crate::dict::DictMap;

lazy_static! {
    static ref PLACEHOLDER: Regex = Regex::new(r"%(%|\{([^}]*)\})").unwrap();
}

/// Key prefix of per-user dict paths.
pub const PRIVATE_PREFIX: &str = "priv/";
/// Key prefix of paths shared between users.
pub const SHARED_PREFIX: &str = "shared/";

pub type Substitutions<'a> = HashMap<&'a str, &'a str, BuildHasherDefault<SeaHasher>>;

pub fn is_private(key: &str) -> bool {
    key.starts_with(PRIVATE_PREFIX)
}

/// Build the substitution table for `map`: `username` first, then each of
/// the map's attribute names bound to the capture at the same position.
pub fn substitutions<'a>(map: &'a DictMap, captures: &'a [String], username: &'a str) -> Substitutions<'a> {
    let mut table = Substitutions::default();
    table.insert("username", username);
    // earlier bindings win, so `username` cannot be shadowed by a capture
    for (name, value) in map.attributes.iter().zip(captures) {
        table.entry(name.as_str()).or_insert(value.as_str());
    }
    table
}

/// The filter template for `map`; private lookups are additionally pinned to
/// the caller's identity.
pub fn template(map: &DictMap, private: bool) -> String {
    if private {
        format!("(&({}=%{{username}}){})", map.username_attribute, map.filter)
    } else {
        map.filter.clone()
    }
}

/// Replace every `%{name}` in `template`. Unknown names expand to nothing.
pub fn expand(template: &str, table: &Substitutions<'_>) -> String {
    PLACEHOLDER
        .replace_all(template, |caps: &Captures| match caps.get(2) {
            Some(name) => escape_filter_value(table.get(name.as_str()).copied().unwrap_or_default()),
            None => "%".to_string(),
        })
        .into_owned()
}

/// Produce the concrete search filter for one lookup.
pub fn build(map: &DictMap, captures: &[String], username: &str, private: bool) -> String {
    let table = substitutions(map, captures, username);
    expand(&template(map, private), &table)
}

pub fn escape_filter_value(value: &str) -> String {
    let mut escaped = String::with_capacity(value.len());
    for c in value.chars() {
        match c {
            '\\' => escaped.push_str("\\5c"),
            '*' => escaped.push_str("\\2a"),
            '(' => escaped.push_str("\\28"),
            ')' => escaped.push_str("\\29"),
            '\0' => escaped.push_str("\\00"),
            _ => escaped.push(c),
        }
    }
    escaped
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn percent_escape_and_unknown_names() {
        let table = Substitutions::default();
        assert_eq!(expand("100%% (x=%{nope})", &table), "100% (x=)");
    }

    #[test]
    fn values_are_filter_escaped() {
        assert_eq!(escape_filter_value("a*(b)\\"), "a\\2a\\28b\\29\\5c");
        assert_eq!(escape_filter_value("plain"), "plain");
    }

    #[test]
    fn private_prefix_detection() {
        assert!(is_private("priv/passdb/bob"));
        assert!(!is_private("shared/priv/bob"));
        assert!(!is_private("private"));
    }
}
