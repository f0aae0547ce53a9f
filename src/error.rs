
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DictError {
    #[error("Config error: {0}")]
    Config(String),
    #[error("Connect error: {0}")]
    Connect(String),
    #[error("no such key: {0}")]
    NoSuchKey(String),
    #[error("Directory error: {0}")]
    Directory(String),
    #[error("Operation not supported by this dict: {0}")]
    Unsupported(&'static str),
    #[error("Dict instance was closed before the operation completed")]
    Closed,
    #[error("Internal invariant violated: {0}")]
    Invariant(String),
}

pub type Result<T> = std::result::Result<T, DictError>;

// Helper conversions
impl From<config::ConfigError> for DictError {
    fn from(e: config::ConfigError) -> Self { Self::Config(e.to_string()) }
}

#[cfg(feature = "ldap")]
impl From<ldap3::LdapError> for DictError {
    fn from(e: ldap3::LdapError) -> Self { Self::Directory(e.to_string()) }
}
