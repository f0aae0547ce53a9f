//! LDAP client on top of `ldap3`.
//!
//! The connection is opened (and bound, when a bind DN is configured) by the
//! first search, and re-opened when it has been idle longer than
//! `max_idle_time`, when the server has closed it, or after a search failed
//! below the protocol level (I/O, timeout, lost driver). The connection driver is spawned onto the executor that
//! runs that first search, which for dicts is the instance's own runtime.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Instant;

use ldap3::{Ldap, LdapConnAsync, LdapConnSettings, LdapError, ResultEntry, Scope, SearchEntry};
use tokio::sync::Mutex;
use tracing::{debug, warn};

use super::{Connector, DirectoryClient, DirectoryEntry, SearchFuture, SearchInput, SearchScope};
use crate::error::{DictError, Result};
use crate::settings::ClientSettings;

const SCHEMES: [&str; 3] = ["ldap://", "ldaps://", "ldapi://"];

#[derive(Debug, Clone, Copy, Default)]
pub struct LdapConnector;

impl Connector for LdapConnector {
    fn connect(&self, settings: &ClientSettings) -> Result<Arc<dyn DirectoryClient>> {
        if !SCHEMES.iter().any(|scheme| settings.uri.starts_with(scheme)) {
            return Err(DictError::Connect(format!(
                "unsupported directory uri {:?}, expected one of {}",
                settings.uri,
                SCHEMES.join(", ")
            )));
        }
        if settings.require_tls && settings.uri.starts_with("ldapi://") {
            return Err(DictError::Connect("TLS cannot be required on an ldapi:// socket".into()));
        }
        Ok(Arc::new(LdapClient {
            shared: Arc::new(Shared {
                settings: settings.clone(),
                connection: Mutex::new(None),
                closed: AtomicBool::new(false),
            }),
        }))
    }
}

struct Connection {
    ldap: Ldap,
    last_used: Instant,
}

struct Shared {
    settings: ClientSettings,
    connection: Mutex<Option<Connection>>,
    closed: AtomicBool,
}

impl Shared {
    async fn handle(&self) -> Result<Ldap> {
        if self.closed.load(Ordering::Acquire) {
            return Err(DictError::Directory("connection closed".into()));
        }
        let mut slot = self.connection.lock().await;
        if let Some(conn) = slot.as_mut() {
            let idle = self
                .settings
                .max_idle_time
                .is_some_and(|max| conn.last_used.elapsed() > max);
            let closed = conn.ldap.is_closed();
            if !idle && !closed {
                conn.last_used = Instant::now();
                return Ok(conn.ldap.clone());
            }
            if let Some(mut stale) = slot.take() {
                if closed {
                    debug!(uri = %self.settings.uri, "directory connection was closed, reconnecting");
                } else {
                    debug!(uri = %self.settings.uri, "re-opening idle directory connection");
                    if let Err(e) = stale.ldap.unbind().await {
                        debug!(error = %e, "unbind of idle connection failed");
                    }
                }
            }
        }
        let ldap = self.open().await?;
        *slot = Some(Connection { ldap: ldap.clone(), last_used: Instant::now() });
        Ok(ldap)
    }

    async fn open(&self) -> Result<Ldap> {
        let settings = &self.settings;
        let starttls = settings.require_tls && !settings.uri.starts_with("ldaps://");
        let conn_settings = LdapConnSettings::new()
            .set_conn_timeout(settings.timeout)
            .set_starttls(starttls);
        let (conn, mut ldap) = LdapConnAsync::with_settings(conn_settings, &settings.uri).await?;
        let uri = settings.uri.clone();
        tokio::spawn(async move {
            if let Err(e) = conn.drive().await {
                warn!(%uri, error = %e, "directory connection terminated");
            }
        });
        if !settings.bind_dn.is_empty() {
            ldap.with_timeout(settings.timeout)
                .simple_bind(&settings.bind_dn, &settings.password)
                .await?
                .success()?;
        }
        debug!(uri = %settings.uri, bind_dn = %settings.bind_dn, starttls, "directory connection established");
        Ok(ldap)
    }

    /// Forget the cached connection so the next search opens a fresh one.
    async fn invalidate(&self) {
        if self.connection.lock().await.take().is_some() {
            debug!(uri = %self.settings.uri, "dropped directory connection after failure");
        }
    }
}

/// Whether the connection that produced `error` is still fit for reuse.
/// Only a result code from the server proves the session is alive.
fn connection_survives(error: &LdapError) -> bool {
    matches!(error, LdapError::LdapResult { .. })
}

async fn run_search(ldap: &mut Ldap, input: SearchInput) -> std::result::Result<Vec<ResultEntry>, LdapError> {
    let scope = match input.scope {
        SearchScope::Base => Scope::Base,
        SearchScope::OneLevel => Scope::OneLevel,
        SearchScope::Subtree => Scope::Subtree,
    };
    let (entries, _) = ldap
        .with_timeout(input.timeout)
        .search(&input.base, scope, &input.filter, input.attributes)
        .await?
        .success()?;
    Ok(entries)
}

pub struct LdapClient {
    shared: Arc<Shared>,
}

impl DirectoryClient for LdapClient {
    fn search(&self, input: SearchInput) -> SearchFuture {
        let shared = Arc::clone(&self.shared);
        Box::pin(async move {
            let mut ldap = shared.handle().await?;
            if shared.settings.debug {
                debug!(base = %input.base, scope = %input.scope, filter = %input.filter, "ldap search");
            }
            let entries = match run_search(&mut ldap, input).await {
                Ok(entries) => entries,
                Err(e) => {
                    if !connection_survives(&e) {
                        shared.invalidate().await;
                    }
                    return Err(e.into());
                }
            };
            Ok(entries
                .into_iter()
                .map(|entry| {
                    let entry = SearchEntry::construct(entry);
                    DirectoryEntry { dn: entry.dn, attributes: entry.attrs }
                })
                .collect())
        })
    }

    fn close(&self) {
        self.shared.closed.store(true, Ordering::Release);
        // dropping the last handle ends the driver task
        if let Ok(mut slot) = self.shared.connection.try_lock() {
            slot.take();
        }
    }
}
