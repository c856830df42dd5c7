// Relay server configuration.
//
// Centralizes environment variable parsing with defaults for local
// development. The database pool reads its own sizing variables in
// `db::pool`.

use std::net::SocketAddr;
use std::time::Duration;

use crate::sync::KeyPolicy;

const DEV_JWT_SECRET: &str = "diagram_sync_local_development_jwt_secret_32";
const DEFAULT_AGENT_API_URL: &str =
    "https://generativelanguage.googleapis.com/v1beta/models/gemini-2.0-flash:generateContent";
const DEFAULT_AGENT_TIMEOUT_SECS: u64 = 30;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    Text,
    Json,
}

/// Core relay server configuration.
///
/// Constructed via [`RelayConfig::from_env`] which reads environment
/// variables and falls back to development defaults.
#[derive(Debug, Clone)]
pub struct RelayConfig {
    pub listen_addr: SocketAddr,
    /// HS256 secret for WebSocket access tokens.
    pub jwt_secret: String,
    /// Base URL advertised in directory responses (e.g. `ws://localhost:8080`).
    pub ws_base_url: String,
    /// PostgreSQL connection string. `None` runs on the in-memory store.
    pub database_url: Option<String>,
    /// Comma-separated CORS origins (or `"*"` for any).
    pub cors_origins: Option<String>,
    pub log_filter: String,
    pub log_format: LogFormat,
    pub key_policy: KeyPolicy,
    pub agent: AgentConfig,
}

#[derive(Debug, Clone)]
pub struct AgentConfig {
    pub api_url: String,
    /// `None` disables `ai_update`.
    pub api_key: Option<String>,
    pub timeout: Duration,
}

impl RelayConfig {
    /// Parse configuration from environment variables.
    ///
    /// | Variable | Default |
    /// |---|---|
    /// | `DIAGRAM_SYNC_HOST` | `0.0.0.0` |
    /// | `DIAGRAM_SYNC_PORT` | `8080` |
    /// | `DIAGRAM_SYNC_JWT_SECRET` | dev-only placeholder |
    /// | `DIAGRAM_SYNC_WS_BASE_URL` | `ws://{host}:{port}` |
    /// | `DIAGRAM_SYNC_DATABASE_URL` | *(none, memory store)* |
    /// | `DIAGRAM_SYNC_CORS_ORIGINS` | *(none, local dev origins)* |
    /// | `DIAGRAM_SYNC_LOG_FILTER` | `info` |
    /// | `DIAGRAM_SYNC_LOG_FORMAT` | `text` |
    /// | `DIAGRAM_SYNC_KEY_POLICY` | `lazy` |
    /// | `DIAGRAM_SYNC_AGENT_API_URL` | Gemini flash `generateContent` |
    /// | `DIAGRAM_SYNC_AGENT_API_KEY` | *(none, agent disabled)* |
    /// | `DIAGRAM_SYNC_AGENT_TIMEOUT_SECS` | `30` |
    pub fn from_env() -> Self {
        Self::from_env_fn(|key| std::env::var(key))
    }

    fn from_env_fn<F>(env: F) -> Self
    where
        F: Fn(&str) -> Result<String, std::env::VarError>,
    {
        let host = env("DIAGRAM_SYNC_HOST").unwrap_or_else(|_| "0.0.0.0".into());
        let port: u16 =
            env("DIAGRAM_SYNC_PORT").ok().and_then(|v| v.parse().ok()).unwrap_or(8080);
        let listen_addr = format!("{host}:{port}")
            .parse()
            .unwrap_or_else(|_| SocketAddr::from(([0, 0, 0, 0], port)));

        let jwt_secret = env("DIAGRAM_SYNC_JWT_SECRET").unwrap_or_else(|_| DEV_JWT_SECRET.into());

        let ws_base_url =
            env("DIAGRAM_SYNC_WS_BASE_URL").unwrap_or_else(|_| format!("ws://{listen_addr}"));

        let database_url = env("DIAGRAM_SYNC_DATABASE_URL").ok().filter(|v| !v.is_empty());
        let cors_origins = env("DIAGRAM_SYNC_CORS_ORIGINS").ok();

        let log_filter = env("DIAGRAM_SYNC_LOG_FILTER").unwrap_or_else(|_| "info".into());
        let log_format = match env("DIAGRAM_SYNC_LOG_FORMAT").ok().as_deref() {
            Some("json") => LogFormat::Json,
            _ => LogFormat::Text,
        };

        let key_policy = env("DIAGRAM_SYNC_KEY_POLICY")
            .ok()
            .and_then(|v| KeyPolicy::parse(&v))
            .unwrap_or(KeyPolicy::Lazy);

        let agent = AgentConfig {
            api_url: env("DIAGRAM_SYNC_AGENT_API_URL")
                .unwrap_or_else(|_| DEFAULT_AGENT_API_URL.into()),
            api_key: env("DIAGRAM_SYNC_AGENT_API_KEY").ok().filter(|v| !v.is_empty()),
            timeout: Duration::from_secs(
                env("DIAGRAM_SYNC_AGENT_TIMEOUT_SECS")
                    .ok()
                    .and_then(|v| v.parse().ok())
                    .unwrap_or(DEFAULT_AGENT_TIMEOUT_SECS),
            ),
        };

        Self {
            listen_addr,
            jwt_secret,
            ws_base_url,
            database_url,
            cors_origins,
            log_filter,
            log_format,
            key_policy,
            agent,
        }
    }

    /// Returns true when using the development-only JWT secret.
    pub fn is_dev_jwt_secret(&self) -> bool {
        self.jwt_secret == DEV_JWT_SECRET
    }
}
