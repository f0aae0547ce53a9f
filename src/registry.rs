//! Instance registry: one [`LdapDict`] per URI.
//!
//! The registry owns every instance it opened; callers get shared handles.
//! Opening a URI that is already registered hands back the existing
//! instance and ignores the caller's options, so the first opener's
//! identity wins for that URI.

use std::collections::HashMap;
use std::hash::BuildHasherDefault;
use std::sync::{Arc, Mutex, MutexGuard};

use seahash::SeaHasher;
use tracing::{debug, info};

use crate::dict::LdapDict;
use crate::directory::Connector;
use crate::error::{DictError, Result};
use crate::settings::{DictOptions, DictSettings};

pub type UriHasher = BuildHasherDefault<SeaHasher>;

/// Resolves a dict URI into its settings.
pub type SettingsLoader = Box<dyn Fn(&str) -> Result<DictSettings> + Send + Sync>;

pub struct Registry {
    connector: Arc<dyn Connector>,
    loader: SettingsLoader,
    kept: Mutex<HashMap<String, Arc<LdapDict>, UriHasher>>,
}

impl Registry {
    /// A registry that treats each URI as the path of a settings file.
    pub fn new(connector: Arc<dyn Connector>) -> Self {
        Self::with_loader(connector, Box::new(DictSettings::load))
    }

    pub fn with_loader(connector: Arc<dyn Connector>, loader: SettingsLoader) -> Self {
        Self { connector, loader, kept: Mutex::new(HashMap::default()) }
    }

    fn kept(&self) -> Result<MutexGuard<'_, HashMap<String, Arc<LdapDict>, UriHasher>>> {
        self.kept
            .lock()
            .map_err(|_| DictError::Invariant("registry lock poisoned".into()))
    }

    /// Return the instance for `uri`, creating and registering it first if
    /// needed. Nothing is registered when loading or connecting fails.
    pub fn open(&self, uri: &str, options: &DictOptions) -> Result<Arc<LdapDict>> {
        let mut kept = self.kept()?;
        if let Some(dict) = kept.get(uri) {
            debug!(uri, "reusing dict instance");
            return Ok(Arc::clone(dict));
        }
        let settings = (self.loader)(uri)?;
        let dict = Arc::new(LdapDict::open(uri, settings, options, self.connector.as_ref())?);
        kept.insert(uri.to_string(), Arc::clone(&dict));
        info!(uri, instances = kept.len(), "dict instance registered");
        Ok(dict)
    }

    /// Give back a handle obtained from [`open`](Self::open). The instance
    /// itself stays registered until [`close_all`](Self::close_all).
    pub fn close(&self, dict: Arc<LdapDict>) {
        debug!(uri = dict.uri(), "dict handle released");
        drop(dict);
    }

    pub fn get(&self, uri: &str) -> Option<Arc<LdapDict>> {
        self.kept().ok()?.get(uri).cloned()
    }

    /// Close every instance and forget it. Lookups still in flight complete
    /// with [`DictError::Closed`].
    pub fn close_all(&self) -> Result<()> {
        let drained: Vec<_> = self.kept()?.drain().collect();
        for (uri, dict) in drained {
            dict.close();
            info!(%uri, "dict instance closed");
        }
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.kept().map(|kept| kept.len()).unwrap_or_default()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Drop for Registry {
    fn drop(&mut self) {
        if let Err(e) = self.close_all() {
            debug!(error = %e, "registry teardown skipped");
        }
    }
}
