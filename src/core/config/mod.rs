mod parsing;
mod settings;
mod types;

pub use types::{
    CacheSettings, ConfigError, DatabaseSettings, Environment, GeminiProviderSettings,
    OpenAiProviderSettings, PartitionSettings, ProviderSettings, RendererSettings,
    RuntimeSettings, S3Settings, Settings, TelemetrySettings,
};
