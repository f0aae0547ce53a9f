//! Settings for dict instances and the HTTP front.
//!
//! A dict URI names a settings file. [`DictSettings::load`] reads it with the
//! `config` crate (format inferred from the extension, TOML when there is
//! none) and validates it. [`DictSettings::from_toml_str`] does the same for
//! inline text, which is what the tests use.
//!
//! ```toml
//! uri = "ldap://localhost"
//! bind_dn = "cn=admin,dc=example,dc=com"
//! password = "secret"
//! base_dn = "ou=people,dc=example,dc=com"
//!
//! [[map]]
//! pattern = "shared/quota/$user"
//! filter = "(uid=%{user})"
//! value_attribute = "quota"
//! attributes = ["user"]
//! ```

use std::time::Duration;

use serde::Deserialize;

use crate::directory::SearchScope;
use crate::error::{DictError, Result};

#[derive(Debug, Clone, Deserialize)]
pub struct DictSettings {
    pub uri: String,
    #[serde(default)]
    pub bind_dn: String,
    #[serde(default)]
    pub password: String,
    /// Per-request timeout in seconds.
    #[serde(default = "default_timeout")]
    pub timeout: u64,
    /// Seconds a connection may sit unused before it is re-established, 0 disables.
    #[serde(default)]
    pub max_idle_time: u64,
    #[serde(default)]
    pub debug: bool,
    #[serde(default, alias = "require_ssl")]
    pub require_tls: bool,
    #[serde(default)]
    pub base_dn: String,
    #[serde(default, rename = "map")]
    pub maps: Vec<MapSettings>,
}

/// One `[[map]]` block.
#[derive(Debug, Clone, Deserialize)]
pub struct MapSettings {
    pub pattern: String,
    #[serde(default = "default_filter")]
    pub filter: String,
    #[serde(default)]
    pub value_attribute: String,
    #[serde(default = "default_username_attribute")]
    pub username_attribute: String,
    #[serde(default)]
    pub base_dn: Option<String>,
    #[serde(default)]
    pub scope: SearchScope,
    #[serde(default)]
    pub attributes: Vec<String>,
}

fn default_timeout() -> u64 { 30 }
fn default_filter() -> String { "(objectClass=*)".to_string() }
fn default_username_attribute() -> String { "cn".to_string() }

impl DictSettings {
    /// Read and validate the settings file at `path`.
    pub fn load(path: &str) -> Result<Self> {
        let settings: Self = config::Config::builder()
            .add_source(config::File::with_name(path).required(true))
            .build()?
            .try_deserialize()?;
        settings.validate()?;
        Ok(settings)
    }

    pub fn from_toml_str(text: &str) -> Result<Self> {
        let settings: Self = config::Config::builder()
            .add_source(config::File::from_str(text, config::FileFormat::Toml))
            .build()?
            .try_deserialize()?;
        settings.validate()?;
        Ok(settings)
    }

    pub fn validate(&self) -> Result<()> {
        if self.uri.trim().is_empty() {
            return Err(DictError::Config("uri must not be empty".into()));
        }
        if self.timeout == 0 {
            return Err(DictError::Config("timeout must be at least one second".into()));
        }
        for (i, map) in self.maps.iter().enumerate() {
            if map.pattern.is_empty() {
                return Err(DictError::Config(format!("map #{i}: pattern is missing")));
            }
            if map.value_attribute.is_empty() {
                return Err(DictError::Config(format!(
                    "map #{i} ({}): value_attribute is missing",
                    map.pattern
                )));
            }
        }
        Ok(())
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout)
    }

    /// The part of the settings the directory client cares about.
    pub fn client_settings(&self) -> ClientSettings {
        ClientSettings {
            uri: self.uri.clone(),
            bind_dn: self.bind_dn.clone(),
            password: self.password.clone(),
            timeout: self.timeout(),
            max_idle_time: (self.max_idle_time > 0)
                .then(|| Duration::from_secs(self.max_idle_time)),
            debug: self.debug,
            require_tls: self.require_tls,
        }
    }
}

/// Connection parameters handed to a [`crate::directory::Connector`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientSettings {
    pub uri: String,
    pub bind_dn: String,
    pub password: String,
    pub timeout: Duration,
    pub max_idle_time: Option<Duration>,
    pub debug: bool,
    pub require_tls: bool,
}

/// Per-open options supplied by the caller of [`crate::registry::Registry::open`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DictOptions {
    /// Identity bound to `%{username}` in filters.
    pub username: String,
}

impl DictOptions {
    pub fn new(username: impl Into<String>) -> Self {
        Self { username: username.into() }
    }
}

/// Settings of the `ldapdict` binary.
#[derive(Debug, Clone, Deserialize)]
pub struct ServerSettings {
    #[serde(default = "default_listen")]
    pub listen: String,
    /// URI (settings file) of the dict to serve.
    pub dict: String,
    #[serde(default)]
    pub username: String,
}

fn default_listen() -> String { "127.0.0.1:8089".to_string() }

impl ServerSettings {
    pub fn load(path: &str) -> Result<Self> {
        config::Config::builder()
            .add_source(config::File::with_name(path).required(true))
            .build()?
            .try_deserialize()
            .map_err(Into::into)
    }
}
