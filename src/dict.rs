//! The dict abstraction and its directory-backed instance.
//!
//! [`Dict`] is the generic key-value surface. [`LdapDict`] implements the
//! read half of it on top of a [`DirectoryClient`]: keys are matched against
//! the configured [`DictMap`]s, turned into searches, and answered with the
//! first value of the map's value attribute. Writes and iteration are not
//! supported by this backend and say so.
//!
//! Each instance owns a private single-threaded runtime. Searches dispatched
//! by [`LdapDict::lookup_async`] are spawned onto it and only make progress
//! while the instance is driven by [`LdapDict::wait`] (or its async form,
//! [`LdapDict::drain`]).

use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use tokio::runtime::{Builder, Handle, Runtime};
use tracing::{debug, info};

use crate::directory::{Connector, DirectoryClient, SearchScope};
use crate::dispatch::{InFlight, LookupCallback};
use crate::error::{DictError, Result};
use crate::pattern::Pattern;
use crate::settings::{DictOptions, DictSettings, MapSettings};

/// A configured rule translating a key template into a directory search.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DictMap {
    pub pattern: Pattern,
    pub filter: String,
    /// Names bound, in order, to the pattern's captures.
    pub attributes: Vec<String>,
    pub value_attribute: String,
    pub username_attribute: String,
    pub base_dn: String,
    pub scope: SearchScope,
}

impl DictMap {
    pub fn new(pattern: &str, filter: &str, value_attribute: &str) -> Result<Self> {
        Ok(Self {
            pattern: Pattern::parse(pattern)?,
            filter: filter.to_string(),
            attributes: Vec::new(),
            value_attribute: value_attribute.to_string(),
            username_attribute: "cn".to_string(),
            base_dn: String::new(),
            scope: SearchScope::Subtree,
        })
    }

    pub fn from_settings(set: &MapSettings, default_base: &str) -> Result<Self> {
        Ok(Self {
            pattern: Pattern::parse(&set.pattern)?,
            filter: set.filter.clone(),
            attributes: set.attributes.clone(),
            value_attribute: set.value_attribute.clone(),
            username_attribute: set.username_attribute.clone(),
            base_dn: set.base_dn.clone().unwrap_or_else(|| default_base.to_string()),
            scope: set.scope,
        })
    }

    pub fn attributes<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.attributes = names.into_iter().map(Into::into).collect();
        self
    }

    pub fn username_attribute(mut self, name: &str) -> Self {
        self.username_attribute = name.to_string();
        self
    }

    pub fn base(mut self, base_dn: &str, scope: SearchScope) -> Self {
        self.base_dn = base_dn.to_string();
        self.scope = scope;
        self
    }
}

/// Outcome of one lookup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LookupResult {
    /// First value of the value attribute on the first matching entry.
    Found(String),
    /// An entry matched but carries no value attribute.
    Null,
    /// The search matched no entry.
    NotFound,
    Failed(DictError),
}

impl LookupResult {
    pub fn value(&self) -> Option<&str> {
        match self {
            LookupResult::Found(value) => Some(value),
            _ => None,
        }
    }

    pub fn is_failed(&self) -> bool {
        matches!(self, LookupResult::Failed(_))
    }

    /// Collapse into a plain `Result`; `Null` and `NotFound` both become `None`.
    pub fn into_result(self) -> Result<Option<String>> {
        match self {
            LookupResult::Found(value) => Ok(Some(value)),
            LookupResult::Null | LookupResult::NotFound => Ok(None),
            LookupResult::Failed(e) => Err(e),
        }
    }
}

impl fmt::Display for LookupResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LookupResult::Found(value) => write!(f, "found: {value}"),
            LookupResult::Null => write!(f, "null"),
            LookupResult::NotFound => write!(f, "not found"),
            LookupResult::Failed(e) => write!(f, "failed: {e}"),
        }
    }
}

/// The generic dict surface. Only lookups are mandatory; the rest defaults
/// to [`DictError::Unsupported`].
pub trait Dict: Send + Sync {
    /// Blocking lookup.
    fn lookup(&self, key: &str) -> LookupResult;
    /// Start a lookup; `callback` runs exactly once with its result.
    fn lookup_async(&self, key: &str, callback: LookupCallback);
    /// Block until every outstanding asynchronous lookup has completed.
    fn wait(&self);

    fn set(&self, _key: &str, _value: &str) -> Result<()> {
        Err(DictError::Unsupported("set"))
    }
    fn unset(&self, _key: &str) -> Result<()> {
        Err(DictError::Unsupported("unset"))
    }
    fn append(&self, _key: &str, _value: &str) -> Result<()> {
        Err(DictError::Unsupported("append"))
    }
    fn atomic_inc(&self, _key: &str, _diff: i64) -> Result<()> {
        Err(DictError::Unsupported("atomic_inc"))
    }
    fn iterate(&self, _paths: &[&str]) -> Result<Vec<(String, String)>> {
        Err(DictError::Unsupported("iterate"))
    }
}

/// One dict instance per directory URI; see [`crate::registry::Registry`].
pub struct LdapDict {
    pub(crate) uri: String,
    pub(crate) username: String,
    pub(crate) settings: DictSettings,
    pub(crate) maps: Vec<Arc<DictMap>>,
    pub(crate) client: Arc<dyn DirectoryClient>,
    pub(crate) runtime: Mutex<Option<Runtime>>,
    pub(crate) handle: Handle,
    pub(crate) last_txid: AtomicU64,
    pub(crate) in_flight: Arc<InFlight>,
    pub(crate) waiting: AtomicBool,
    pub(crate) closed: AtomicBool,
}

impl LdapDict {
    /// Build an instance from already loaded settings. The registry is the
    /// usual way in; this is public for embedding a single dict directly.
    pub fn open(uri: &str, settings: DictSettings, options: &DictOptions, connector: &dyn Connector) -> Result<Self> {
        settings.validate()?;
        let maps = settings
            .maps
            .iter()
            .map(|set| DictMap::from_settings(set, &settings.base_dn).map(Arc::new))
            .collect::<Result<Vec<_>>>()?;
        let client = connector.connect(&settings.client_settings())?;
        let runtime = Builder::new_current_thread()
            .enable_all()
            .build()
            .map_err(|e| DictError::Connect(format!("cannot start dict runtime: {e}")))?;
        let handle = runtime.handle().clone();
        info!(uri, directory = %settings.uri, maps = maps.len(), "dict instance opened");
        Ok(Self {
            uri: uri.to_string(),
            username: options.username.clone(),
            settings,
            maps,
            client,
            runtime: Mutex::new(Some(runtime)),
            handle,
            last_txid: AtomicU64::new(0),
            in_flight: Arc::new(InFlight::default()),
            waiting: AtomicBool::new(false),
            closed: AtomicBool::new(false),
        })
    }

    pub fn uri(&self) -> &str {
        &self.uri
    }

    pub fn username(&self) -> &str {
        &self.username
    }

    pub fn settings(&self) -> &DictSettings {
        &self.settings
    }

    pub fn maps(&self) -> impl Iterator<Item = &DictMap> {
        self.maps.iter().map(|m| m.as_ref())
    }

    /// Dispatched lookups whose search has not completed yet.
    pub fn pending(&self) -> usize {
        self.in_flight.pending()
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Close the directory client and stop the private runtime. Lookups still
    /// in flight complete with [`DictError::Closed`].
    pub(crate) fn close(&self) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        self.client.close();
        let runtime = self.runtime.lock().unwrap_or_else(PoisonError::into_inner).take();
        if let Some(runtime) = runtime {
            runtime.shutdown_background();
        }
        debug!(uri = %self.uri, "dict instance closed");
    }
}

impl Drop for LdapDict {
    fn drop(&mut self) {
        // a runtime may not be dropped from async code, shutdown_background may
        let runtime = self.runtime.get_mut().unwrap_or_else(PoisonError::into_inner).take();
        if let Some(runtime) = runtime {
            runtime.shutdown_background();
        }
    }
}

impl fmt::Debug for LdapDict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LdapDict")
            .field("uri", &self.uri)
            .field("username", &self.username)
            .field("maps", &self.maps.len())
            .field("pending", &self.pending())
            .field("closed", &self.is_closed())
            .finish()
    }
}

impl Dict for LdapDict {
    fn lookup(&self, key: &str) -> LookupResult {
        LdapDict::lookup(self, key)
    }

    fn lookup_async(&self, key: &str, callback: LookupCallback) {
        LdapDict::lookup_async(self, key, callback)
    }

    fn wait(&self) {
        LdapDict::wait(self)
    }
}
