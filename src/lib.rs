//! ldapdict – a read-only key-value dict answered by directory searches.
//!
//! Callers address values with hierarchical keys such as
//! `shared/quota/alice` or `priv/passdb/alice`. Each key is translated into
//! one directory search and answered with a single attribute value:
//! * A [`dict::DictMap`] pairs a key template (`shared/quota/$user`) with a
//!   search filter template (`(uid=%{user})`), a base and scope, and the
//!   attribute whose first value is the answer.
//! * The [`pattern`] matcher picks the first map whose template matches the
//!   whole key and extracts one capture per `$variable`.
//! * The [`query`] builder binds captures to the map's attribute names
//!   (plus `username`, the identity the dict was opened with) and expands
//!   the filter. Keys under `priv/` are additionally pinned to that identity.
//! * The [`dispatch`] layer issues the search and resolves the lookup
//!   exactly once, with a [`dict::LookupResult`].
//!
//! ## Driving lookups
//! Every [`dict::LdapDict`] owns a private single-threaded runtime. Lookups
//! started with `lookup_async` (callback) or `submit` (future) make progress
//! only while the instance is driven: [`dict::LdapDict::wait`] blocks until
//! nothing is pending, [`dict::LdapDict::lookup`] is the blocking
//! lookup-and-wait, and `drain`/`fetch` are the same for async callers.
//! Waiting on an instance that is already waiting is a contract violation
//! and panics.
//!
//! ## Instances
//! A [`registry::Registry`] keeps one instance per URI. The URI names the
//! settings file (see [`settings`]); opening the same URI again returns the
//! same instance. `close_all` closes every directory connection.
//!
//! ## Directory
//! The directory itself sits behind [`directory::DirectoryClient`]. The
//! `ldap` feature (on by default) provides [`directory::LdapConnector`] on
//! top of `ldap3`; [`directory::MemoryDirectory`] is a scripted in-process
//! directory for tests and benchmarks.
//!
//! ## Quick Start
//! ```
//! use std::sync::Arc;
//! use ldapdict::{DictOptions, DictSettings, LookupResult, Registry};
//! use ldapdict::directory::{DirectoryEntry, MemoryConnector};
//!
//! let connector = MemoryConnector::new();
//! connector.directory("ldap://localhost").respond(
//!     "(uid=alice)",
//!     vec![DirectoryEntry::new("uid=alice,dc=example").with("quota", &["100M"])],
//! );
//! let registry = Registry::with_loader(
//!     Arc::new(connector),
//!     Box::new(|_uri: &str| {
//!         DictSettings::from_toml_str(
//!             r#"
//!             uri = "ldap://localhost"
//!             [[map]]
//!             pattern = "shared/quota/$user"
//!             filter = "(uid=%{user})"
//!             value_attribute = "quota"
//!             attributes = ["user"]
//!             "#,
//!         )
//!     }),
//! );
//! let dict = registry.open("quota.toml", &DictOptions::new("svc")).unwrap();
//! assert_eq!(dict.lookup("shared/quota/alice"), LookupResult::Found("100M".into()));
//! ```
//!
//! Writes and iteration belong to the generic [`dict::Dict`] surface but are
//! not supported by this backend; they return
//! [`error::DictError::Unsupported`].

pub mod error;
pub mod settings;
pub mod pattern;
pub mod query;
pub mod directory;
pub mod dict;
pub mod dispatch;
pub mod bridge;
pub mod registry;
pub mod server;

pub use dict::{Dict, DictMap, LdapDict, LookupResult};
pub use dispatch::{LookupCallback, LookupHandle};
pub use error::{DictError, Result};
pub use registry::Registry;
pub use settings::{DictOptions, DictSettings};
