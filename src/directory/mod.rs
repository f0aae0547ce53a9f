//! The directory service as seen from a dict: connect, search, close.
//!
//! Dicts never speak the directory protocol themselves. A [`Connector`]
//! turns [`ClientSettings`] into a [`DirectoryClient`], and every lookup
//! becomes exactly one [`DirectoryClient::search`] whose future resolves
//! once, either with the matching entries or with an error. Clients enforce
//! [`SearchInput::timeout`] themselves and report expiry as an error.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use futures_util::future::BoxFuture;
use serde::Deserialize;

use crate::error::Result;
use crate::settings::ClientSettings;

pub mod memory;
#[cfg(feature = "ldap")]
pub mod ldap;

pub use memory::{MemoryConnector, MemoryDirectory};
#[cfg(feature = "ldap")]
pub use ldap::LdapConnector;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SearchScope {
    Base,
    #[serde(rename = "one", alias = "onelevel")]
    OneLevel,
    #[default]
    Subtree,
}

impl fmt::Display for SearchScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SearchScope::Base => write!(f, "base"),
            SearchScope::OneLevel => write!(f, "one"),
            SearchScope::Subtree => write!(f, "subtree"),
        }
    }
}

/// One search request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SearchInput {
    pub base: String,
    pub scope: SearchScope,
    pub filter: String,
    pub attributes: Vec<String>,
    pub timeout: Duration,
}

/// An entry returned by a search.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DirectoryEntry {
    pub dn: String,
    pub attributes: HashMap<String, Vec<String>>,
}

impl DirectoryEntry {
    pub fn new(dn: impl Into<String>) -> Self {
        Self { dn: dn.into(), attributes: HashMap::new() }
    }

    pub fn with(mut self, name: impl Into<String>, values: &[&str]) -> Self {
        self.attributes
            .insert(name.into(), values.iter().map(|v| v.to_string()).collect());
        self
    }

    /// Values of `name`; attribute names compare case-insensitively.
    pub fn attribute(&self, name: &str) -> Option<&[String]> {
        self.attributes
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_slice())
    }
}

pub type SearchFuture = BoxFuture<'static, Result<Vec<DirectoryEntry>>>;

pub trait DirectoryClient: Send + Sync {
    /// Start a search. The returned future runs on whatever executor drives
    /// the owning dict.
    fn search(&self, input: SearchInput) -> SearchFuture;
    /// Release the connection. Searches started afterwards fail.
    fn close(&self);
}

pub trait Connector: Send + Sync {
    fn connect(&self, settings: &ClientSettings) -> Result<Arc<dyn DirectoryClient>>;
}
