use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};
use serde::{Deserialize, Serialize};

pub const DEFAULT_API_BASE_PATH: &str = "/api";
pub const DEFAULT_TAVUS_BASE_URL: &str = "https://tavusapi.com";

#[derive(Debug, Deserialize, Serialize, Clone, Default)]
pub struct Config {
    pub server: ServerConfig,
    pub logging: LoggingConfig,
    pub cors: CorsConfig,
    pub api: ApiConfig,
    pub rate_limit: RateLimitConfig,
    pub tavus: TavusConfig,
    pub session: SessionConfig,
    pub webhook: WebhookConfig,
    pub guardrail: GuardrailConfig,
    pub script: ScriptConfig,
    pub app: AppConfig,
    pub storage: StorageConfig,
    pub cache: CacheConfig,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct ServerConfig {
    pub port: u16,
    pub address: String,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct LoggingConfig {
    pub level: String,
    pub json_format: bool,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct CorsConfig {
    pub allowed_origins: Vec<String>,
    pub allow_credentials: bool,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct ApiConfig {
    pub base_path: String,
    pub enable_swagger: bool,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct RateLimitConfig {
    /// Conversation creations allowed per client IP and window.
    pub conversation_limit: u32,
    /// Session reads allowed per client IP and window.
    pub read_limit: u32,
    pub window_seconds: u64,
    pub require_client_ip: bool,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct TavusConfig {
    pub api_key: Option<String>,
    pub base_url: String,
    pub persona_id: Option<String>,
    pub replica_id: Option<String>,
    pub request_timeout_secs: u64,
    /// Reject vendor responses that echo a different persona or replica than requested.
    pub verify_persona: bool,
    pub webhook_secret: Option<String>,
    pub webhook_verify: bool,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct SessionConfig {
    pub ttl_ms: u64,
    /// How long a creation claim blocks concurrent creates for the same session id.
    pub claim_lease_secs: u64,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct WebhookConfig {
    pub dedupe_ttl_ms: u64,
}

#[derive(Debug, Deserialize, Serialize, Clone, Default)]
pub struct GuardrailConfig {
    /// Terms that must never appear in the replica's side of a transcript.
    pub forbidden_terms: Vec<String>,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct ScriptConfig {
    pub product_name: String,
    pub greeting: String,
    pub context: String,
    pub language: String,
    pub max_call_duration_secs: u32,
}

#[derive(Debug, Deserialize, Serialize, Clone, Default)]
pub struct AppConfig {
    /// Externally reachable origin, used to build the vendor callback URL.
    pub public_base_url: Option<String>,
}

#[derive(Debug, Deserialize, Serialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum StorageBackend {
    #[default]
    Memory,
    Postgres,
}

#[derive(Debug, Deserialize, Serialize, Clone, Default)]
pub struct StorageConfig {
    pub backend: StorageBackend,
    pub database: DatabaseConfig,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
    pub min_connections: u32,
    pub acquire_timeout: u64,
    pub run_migrations: bool,
}

#[derive(Debug, Deserialize, Serialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum CacheBackend {
    #[default]
    Memory,
    Redis,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct CacheConfig {
    pub backend: CacheBackend,
    pub redis_url: String,
    pub cleanup_interval_seconds: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            port: 8000,
            address: "127.0.0.1".to_string(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json_format: false,
        }
    }
}

impl Default for CorsConfig {
    fn default() -> Self {
        Self {
            allowed_origins: vec!["*".to_string()],
            allow_credentials: false,
        }
    }
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            base_path: DEFAULT_API_BASE_PATH.to_string(),
            enable_swagger: false,
        }
    }
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            conversation_limit: 10,
            read_limit: 120,
            window_seconds: 60,
            require_client_ip: false,
        }
    }
}

impl Default for TavusConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            base_url: DEFAULT_TAVUS_BASE_URL.to_string(),
            persona_id: None,
            replica_id: None,
            request_timeout_secs: 15,
            verify_persona: true,
            webhook_secret: None,
            webhook_verify: false,
        }
    }
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            ttl_ms: 3_600_000,
            claim_lease_secs: 30,
        }
    }
}

impl Default for WebhookConfig {
    fn default() -> Self {
        Self { dedupe_ttl_ms: 600_000 }
    }
}

impl Default for ScriptConfig {
    fn default() -> Self {
        Self {
            product_name: "our product".to_string(),
            greeting: "Hi there! Thanks for stopping by the booth. What would you like to know?".to_string(),
            context: "You are a friendly booth assistant at a trade show. Only discuss the product, its features, \
                      pricing tiers and how to book a follow-up demo. Politely decline anything unrelated, never \
                      speculate about competitors and keep answers short because the call lasts under three minutes."
                .to_string(),
            language: "english".to_string(),
            max_call_duration_secs: 150,
        }
    }
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: "postgres://localhost/leadbooth".to_string(),
            max_connections: 8,
            min_connections: 1,
            acquire_timeout: 5,
            run_migrations: true,
        }
    }
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            backend: CacheBackend::Memory,
            redis_url: "redis://127.0.0.1:6379".to_string(),
            cleanup_interval_seconds: 60,
        }
    }
}

/// Plain environment variables accepted alongside the `LEADBOOTH_` prefixed ones.
const ENV_ALIASES: &[(&str, &str)] = &[
    ("TAVUS_API_KEY", "tavus.api_key"),
    ("TAVUS_BASE_URL", "tavus.base_url"),
    ("TAVUS_PERSONA_ID", "tavus.persona_id"),
    ("TAVUS_REPLICA_ID", "tavus.replica_id"),
    ("TAVUS_WEBHOOK_SECRET", "tavus.webhook_secret"),
    ("TAVUS_WEBHOOK_VERIFY", "tavus.webhook_verify"),
    ("SESSION_TTL_MS", "session.ttl_ms"),
    ("WEBHOOK_DEDUPE_TTL_MS", "webhook.dedupe_ttl_ms"),
    ("PUBLIC_BASE_URL", "app.public_base_url"),
    ("DATABASE_URL", "storage.database.url"),
    ("REDIS_URL", "cache.redis_url"),
];

impl Config {
    /// Load configuration from multiple sources in priority order:
    /// 1. Built-in defaults
    /// 2. Leadbooth.toml (optional)
    /// 3. Environment variables prefixed with LEADBOOTH_ (nested with `__`, e.g. LEADBOOTH_TAVUS__PERSONA_ID)
    /// 4. Plain aliases such as TAVUS_API_KEY or DATABASE_URL
    pub fn load() -> Result<Self, figment::Error> {
        Self::figment().extract()
    }

    pub fn figment() -> Figment {
        let mut figment = Figment::from(Serialized::defaults(Config::default()))
            .merge(Toml::file("Leadbooth.toml"))
            .merge(Env::prefixed("LEADBOOTH_").split("__"));

        for (var, path) in ENV_ALIASES {
            figment = figment.merge(Env::raw().only(&[*var]).map(move |_| (*path).into()));
        }

        figment
    }

    pub fn has_api_key(&self) -> bool {
        self.tavus.api_key.as_deref().is_some_and(|key| !key.trim().is_empty())
    }

    /// Whether incoming webhooks must carry a valid signature.
    pub fn webhook_verification_enabled(&self) -> bool {
        self.tavus.webhook_verify
    }
}
