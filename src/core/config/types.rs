use thiserror::Error;

#[derive(Debug, Clone)]
pub struct Settings {
    pub(super) runtime: RuntimeSettings,
    pub(super) database: DatabaseSettings,
    pub(super) providers: ProviderSettings,
    pub(super) renderer: RendererSettings,
    pub(super) s3: S3Settings,
    pub(super) partition: PartitionSettings,
    pub(super) cache: CacheSettings,
    pub(super) telemetry: TelemetrySettings,
}

#[derive(Debug, Clone)]
pub struct RuntimeSettings {
    pub environment: Environment,
    pub strict_config: bool,
}

#[derive(Debug, Clone)]
pub struct DatabaseSettings {
    pub postgres_server: String,
    pub postgres_port: u16,
    pub postgres_user: String,
    pub postgres_password: String,
    pub postgres_db: String,
    pub database_url: Option<String>,
}

/// One settings block per provider backend. An adapter joins the failover
/// chain only when its API key is configured.
#[derive(Debug, Clone)]
pub struct ProviderSettings {
    pub openai: OpenAiProviderSettings,
    pub gemini: GeminiProviderSettings,
}

#[derive(Debug, Clone)]
pub struct OpenAiProviderSettings {
    pub api_key: String,
    pub base_url: String,
    pub model: String,
    pub max_tokens: u32,
    pub timeout_seconds: u64,
    pub priority: u8,
}

#[derive(Debug, Clone)]
pub struct GeminiProviderSettings {
    pub api_key: String,
    pub base_url: String,
    pub model: String,
    pub timeout_seconds: u64,
    pub priority: u8,
}

#[derive(Debug, Clone)]
pub struct RendererSettings {
    pub api_key: String,
    pub base_url: String,
    pub dpi: u32,
    pub timeout_seconds: u64,
    pub poll_interval_seconds: u64,
    pub max_poll_attempts: u32,
    pub max_submit_retries: u32,
}

#[derive(Debug, Clone)]
pub struct S3Settings {
    pub endpoint: String,
    pub access_key: String,
    pub secret_key: String,
    pub bucket: String,
    pub region: String,
    pub public_base_url: String,
}

#[derive(Debug, Clone)]
pub struct PartitionSettings {
    pub min_pages_per_student: usize,
    pub max_pages_per_student: usize,
    pub min_group_confidence: f64,
}

#[derive(Debug, Clone)]
pub struct CacheSettings {
    pub render_ttl_seconds: u64,
}

#[derive(Debug, Clone)]
pub struct TelemetrySettings {
    pub log_level: String,
    pub json: bool,
    pub prometheus_enabled: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Environment {
    Development,
    Production,
    Staging,
    Test,
}

impl Environment {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Development => "development",
            Self::Production => "production",
            Self::Staging => "staging",
            Self::Test => "test",
        }
    }

    pub(super) fn is_production(self) -> bool {
        matches!(self, Self::Production)
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid value for {field}: {value}")]
    InvalidValue { field: &'static str, value: String },
    #[error("missing required secret for {0}")]
    MissingSecret(&'static str),
}

impl DatabaseSettings {
    pub fn database_url(&self) -> String {
        if let Some(url) = &self.database_url {
            return url.clone();
        }

        format!(
            "postgresql://{}:{}@{}:{}/{}",
            self.postgres_user,
            self.postgres_password,
            self.postgres_server,
            self.postgres_port,
            self.postgres_db
        )
    }
}
