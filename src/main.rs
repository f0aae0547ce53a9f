use std::sync::Arc;

use ldapdict::directory::LdapConnector;
use ldapdict::error::{DictError, Result};
use ldapdict::registry::Registry;
use ldapdict::server;
use ldapdict::settings::{DictOptions, DictSettings, ServerSettings};
use tracing::info;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    let path = std::env::args().nth(1).unwrap_or_else(|| "ldapdict.toml".to_string());
    let server_settings = ServerSettings::load(&path)?;
    let dict_settings = DictSettings::load(&server_settings.dict)?;

    let default_level = if dict_settings.debug { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let registry = Registry::with_loader(
        Arc::new(LdapConnector),
        Box::new(move |_uri: &str| -> Result<DictSettings> { Ok(dict_settings.clone()) }),
    );
    let dict = registry.open(&server_settings.dict, &DictOptions::new(server_settings.username.clone()))?;

    let listener = tokio::net::TcpListener::bind(&server_settings.listen)
        .await
        .map_err(|e| DictError::Config(format!("cannot listen on {}: {e}", server_settings.listen)))?;
    info!(listen = %server_settings.listen, dict = %server_settings.dict, "serving lookups");

    axum::serve(listener, server::router(dict))
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
        })
        .await
        .map_err(|e| DictError::Invariant(format!("server failed: {e}")))?;

    registry.close_all()?;
    info!("shut down");
    Ok(())
}
