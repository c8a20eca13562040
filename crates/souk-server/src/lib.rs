//! Process wiring: configuration, store selection and the HTTP router.

use std::net::SocketAddr;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, bail};
use axum::{Router, routing::get};
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::info;

use souk_db::{Database, MemoryStore, MessageStore};
use souk_gateway::auth::JwtAuthenticator;
use souk_gateway::{Dispatcher, GatewayConfig, connection};

/// Secrets that ship in sample configs and must never reach production.
const PLACEHOLDER_SECRETS: &[&str] = &["", "changeme", "change-me", "secret", "dev-secret-change-me"];

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub jwt_secret: String,
    pub db_path: String,
    pub gateway: GatewayConfig,
}

impl ServerConfig {
    /// Read `SOUK_*` variables, after loading `.env` if present.
    pub fn from_env() -> anyhow::Result<Self> {
        let _ = dotenvy::dotenv();

        let jwt_secret = std::env::var("SOUK_JWT_SECRET").context("SOUK_JWT_SECRET must be set")?;
        if PLACEHOLDER_SECRETS.contains(&jwt_secret.trim()) {
            bail!("SOUK_JWT_SECRET is a placeholder value; set a real secret");
        }

        let defaults = GatewayConfig::default();
        Ok(Self {
            host: std::env::var("SOUK_HOST").unwrap_or_else(|_| "0.0.0.0".into()),
            port: env_parse("SOUK_PORT", 3000)?,
            jwt_secret,
            db_path: std::env::var("SOUK_DB_PATH").unwrap_or_else(|_| "souk.db".into()),
            gateway: GatewayConfig {
                heartbeat_interval: env_secs("SOUK_HEARTBEAT_SECS", defaults.heartbeat_interval)?,
                offline_debounce: env_secs("SOUK_OFFLINE_DEBOUNCE_SECS", defaults.offline_debounce)?,
                auth_timeout: env_secs("SOUK_AUTH_TIMEOUT_SECS", defaults.auth_timeout)?,
            },
        })
    }

    pub fn addr(&self) -> anyhow::Result<SocketAddr> {
        format!("{}:{}", self.host, self.port)
            .parse()
            .with_context(|| format!("invalid listen address {}:{}", self.host, self.port))
    }
}

fn env_parse<T: std::str::FromStr>(key: &str, default: T) -> anyhow::Result<T>
where
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match std::env::var(key) {
        Ok(v) => v.trim().parse().with_context(|| format!("{key} is not valid: {v:?}")),
        Err(_) => Ok(default),
    }
}

fn env_secs(key: &str, default: Duration) -> anyhow::Result<Duration> {
    env_parse(key, default.as_secs()).map(Duration::from_secs)
}

/// `:memory:` keeps messages in process memory only.
pub fn open_store(db_path: &str) -> anyhow::Result<Arc<dyn MessageStore>> {
    if db_path == ":memory:" {
        info!("using in-memory message store");
        return Ok(Arc::new(MemoryStore::new()));
    }
    let db = Database::open(Path::new(db_path))
        .with_context(|| format!("opening message store at {db_path}"))?;
    info!("message store at {}", db_path);
    Ok(Arc::new(db))
}

pub fn build_dispatcher(config: &ServerConfig, store: Arc<dyn MessageStore>) -> Dispatcher {
    Dispatcher::new(
        store,
        Arc::new(JwtAuthenticator::new(&config.jwt_secret)),
        config.gateway.clone(),
    )
}

/// REST routes plus the `/gateway` upgrade.
pub fn build_router(dispatcher: Dispatcher) -> Router {
    let ws_route = Router::new()
        .route("/gateway", get(connection::ws_upgrade))
        .with_state(dispatcher.clone());

    Router::new()
        .merge(souk_api::router(dispatcher))
        .merge(ws_route)
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
}

#[cfg(test)]
mod tests {
    use souk_types::models::{Message, MessageBody};
    use uuid::Uuid;

    use super::*;

    #[test]
    fn memory_store_is_selected_by_name() {
        let store = open_store(":memory:").unwrap();
        let msg = Message::new(Uuid::new_v4(), Uuid::new_v4(), MessageBody::text("hi"), None);
        store.persist(&msg).unwrap();
        assert_eq!(store.get(msg.id).unwrap(), Some(msg));
    }

    #[test]
    fn sqlite_store_persists_across_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("souk.db");
        let path = path.to_str().unwrap();
        let msg = Message::new(Uuid::new_v4(), Uuid::new_v4(), MessageBody::text("hi"), None);

        open_store(path).unwrap().persist(&msg).unwrap();
        let reopened = open_store(path).unwrap();
        assert_eq!(reopened.get(msg.id).unwrap().map(|m| m.id), Some(msg.id));
    }

    #[test]
    fn listen_address_is_validated() {
        let mut config = ServerConfig {
            host: "127.0.0.1".into(),
            port: 3000,
            jwt_secret: "s3cr3t".into(),
            db_path: ":memory:".into(),
            gateway: GatewayConfig::default(),
        };
        assert_eq!(config.addr().unwrap().port(), 3000);
        config.host = "not a host".into();
        assert!(config.addr().is_err());
    }
}
