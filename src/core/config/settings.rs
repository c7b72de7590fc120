use super::parsing::{
    env_optional, env_or_default, parse_bool, parse_environment, parse_f64, parse_u16, parse_u32,
    parse_u64, parse_u8, parse_usize,
};
use super::types::{
    CacheSettings, ConfigError, DatabaseSettings, GeminiProviderSettings, OpenAiProviderSettings,
    PartitionSettings, ProviderSettings, RendererSettings, RuntimeSettings, S3Settings, Settings,
    TelemetrySettings,
};

impl Settings {
    pub fn load() -> Result<Self, ConfigError> {
        let environment = parse_environment(
            env_optional("SCRIPTMARK_ENV").or_else(|| env_optional("ENVIRONMENT")),
        );
        let strict_config = env_optional("SCRIPTMARK_STRICT_CONFIG")
            .map(|value| parse_bool(&value))
            .unwrap_or(false)
            || environment.is_production();

        let postgres_server = env_or_default("POSTGRES_SERVER", "localhost");
        let postgres_port = parse_u16("POSTGRES_PORT", env_or_default("POSTGRES_PORT", "5432"))?;
        let postgres_user = env_or_default("POSTGRES_USER", "scriptmark");
        let postgres_password = env_or_default("POSTGRES_PASSWORD", "");
        let postgres_db = env_or_default("POSTGRES_DB", "scriptmark_db");
        let database_url = env_optional("DATABASE_URL");

        let openai = OpenAiProviderSettings {
            api_key: env_or_default("OPENAI_API_KEY", ""),
            base_url: env_or_default("OPENAI_BASE_URL", "https://api.openai.com/v1"),
            model: env_or_default("OPENAI_MODEL", "gpt-4o"),
            max_tokens: parse_u32("OPENAI_MAX_TOKENS", env_or_default("OPENAI_MAX_TOKENS", "10000"))?,
            timeout_seconds: parse_u64(
                "OPENAI_TIMEOUT_SECONDS",
                env_or_default("OPENAI_TIMEOUT_SECONDS", "600"),
            )?,
            priority: parse_u8("OPENAI_PRIORITY", env_or_default("OPENAI_PRIORITY", "1"))?,
        };

        let gemini = GeminiProviderSettings {
            api_key: env_or_default("GEMINI_API_KEY", ""),
            base_url: env_or_default(
                "GEMINI_BASE_URL",
                "https://generativelanguage.googleapis.com/v1beta",
            ),
            model: env_or_default("GEMINI_MODEL", "gemini-2.0-flash"),
            timeout_seconds: parse_u64(
                "GEMINI_TIMEOUT_SECONDS",
                env_or_default("GEMINI_TIMEOUT_SECONDS", "600"),
            )?,
            priority: parse_u8("GEMINI_PRIORITY", env_or_default("GEMINI_PRIORITY", "2"))?,
        };

        let renderer = RendererSettings {
            api_key: env_or_default("RENDERER_API_KEY", ""),
            base_url: env_or_default("RENDERER_BASE_URL", ""),
            dpi: parse_u32("RENDERER_DPI", env_or_default("RENDERER_DPI", "150"))?,
            timeout_seconds: parse_u64(
                "RENDERER_TIMEOUT_SECONDS",
                env_or_default("RENDERER_TIMEOUT_SECONDS", "120"),
            )?,
            poll_interval_seconds: parse_u64(
                "RENDERER_POLL_INTERVAL_SECONDS",
                env_or_default("RENDERER_POLL_INTERVAL_SECONDS", "2"),
            )?,
            max_poll_attempts: parse_u32(
                "RENDERER_MAX_POLL_ATTEMPTS",
                env_or_default("RENDERER_MAX_POLL_ATTEMPTS", "120"),
            )?,
            max_submit_retries: parse_u32(
                "RENDERER_MAX_SUBMIT_RETRIES",
                env_or_default("RENDERER_MAX_SUBMIT_RETRIES", "3"),
            )?,
        };

        let s3 = S3Settings {
            endpoint: env_or_default("S3_ENDPOINT", ""),
            access_key: env_or_default("S3_ACCESS_KEY", ""),
            secret_key: env_or_default("S3_SECRET_KEY", ""),
            bucket: env_or_default("S3_BUCKET", "scriptmark-documents"),
            region: env_or_default("S3_REGION", "us-east-1"),
            public_base_url: env_or_default("S3_PUBLIC_BASE_URL", ""),
        };

        let partition = PartitionSettings {
            min_pages_per_student: parse_usize(
                "PARTITION_MIN_PAGES_PER_STUDENT",
                env_or_default("PARTITION_MIN_PAGES_PER_STUDENT", "1"),
            )?,
            max_pages_per_student: parse_usize(
                "PARTITION_MAX_PAGES_PER_STUDENT",
                env_or_default("PARTITION_MAX_PAGES_PER_STUDENT", "10"),
            )?,
            min_group_confidence: parse_f64(
                "PARTITION_MIN_GROUP_CONFIDENCE",
                env_or_default("PARTITION_MIN_GROUP_CONFIDENCE", "0.5"),
            )?,
        };

        let cache = CacheSettings {
            render_ttl_seconds: parse_u64(
                "RENDER_CACHE_TTL_SECONDS",
                env_or_default("RENDER_CACHE_TTL_SECONDS", "900"),
            )?,
        };

        let log_level = env_or_default("SCRIPTMARK_LOG_LEVEL", "info");
        let json = env_optional("SCRIPTMARK_LOG_JSON").map(|v| parse_bool(&v)).unwrap_or(false);
        let prometheus_enabled =
            env_optional("PROMETHEUS_ENABLED").map(|v| parse_bool(&v)).unwrap_or(false);

        let settings = Self {
            runtime: RuntimeSettings { environment, strict_config },
            database: DatabaseSettings {
                postgres_server,
                postgres_port,
                postgres_user,
                postgres_password,
                postgres_db,
                database_url,
            },
            providers: ProviderSettings { openai, gemini },
            renderer,
            s3,
            partition,
            cache,
            telemetry: TelemetrySettings { log_level, json, prometheus_enabled },
        };

        settings.validate()?;
        Ok(settings)
    }

    pub fn runtime(&self) -> &RuntimeSettings {
        &self.runtime
    }

    pub fn database(&self) -> &DatabaseSettings {
        &self.database
    }

    pub fn providers(&self) -> &ProviderSettings {
        &self.providers
    }

    pub fn renderer(&self) -> &RendererSettings {
        &self.renderer
    }

    pub fn s3(&self) -> &S3Settings {
        &self.s3
    }

    pub fn partition(&self) -> &PartitionSettings {
        &self.partition
    }

    pub fn cache(&self) -> &CacheSettings {
        &self.cache
    }

    pub fn telemetry(&self) -> &TelemetrySettings {
        &self.telemetry
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.partition.min_pages_per_student == 0 {
            return Err(ConfigError::InvalidValue {
                field: "PARTITION_MIN_PAGES_PER_STUDENT",
                value: "0".to_string(),
            });
        }

        if self.partition.max_pages_per_student < self.partition.min_pages_per_student {
            return Err(ConfigError::InvalidValue {
                field: "PARTITION_MAX_PAGES_PER_STUDENT",
                value: self.partition.max_pages_per_student.to_string(),
            });
        }

        if !(0.0..=1.0).contains(&self.partition.min_group_confidence) {
            return Err(ConfigError::InvalidValue {
                field: "PARTITION_MIN_GROUP_CONFIDENCE",
                value: self.partition.min_group_confidence.to_string(),
            });
        }

        if self.renderer.poll_interval_seconds == 0 {
            return Err(ConfigError::InvalidValue {
                field: "RENDERER_POLL_INTERVAL_SECONDS",
                value: "0".to_string(),
            });
        }

        if self.renderer.max_poll_attempts == 0 {
            return Err(ConfigError::InvalidValue {
                field: "RENDERER_MAX_POLL_ATTEMPTS",
                value: "0".to_string(),
            });
        }

        if self.providers.openai.priority == self.providers.gemini.priority {
            return Err(ConfigError::InvalidValue {
                field: "GEMINI_PRIORITY",
                value: self.providers.gemini.priority.to_string(),
            });
        }

        if !(self.runtime.strict_config || self.runtime.environment.is_production()) {
            return Ok(());
        }

        if self.database.database_url.is_none() && self.database.postgres_password.is_empty() {
            return Err(ConfigError::MissingSecret("POSTGRES_PASSWORD"));
        }
        if self.providers.openai.api_key.is_empty() && self.providers.gemini.api_key.is_empty() {
            return Err(ConfigError::MissingSecret("OPENAI_API_KEY/GEMINI_API_KEY"));
        }
        if self.renderer.api_key.is_empty() {
            return Err(ConfigError::MissingSecret("RENDERER_API_KEY"));
        }
        if self.renderer.base_url.is_empty() {
            return Err(ConfigError::MissingSecret("RENDERER_BASE_URL"));
        }
        if self.s3.access_key.is_empty() || self.s3.secret_key.is_empty() {
            return Err(ConfigError::MissingSecret("S3_ACCESS_KEY/S3_SECRET_KEY"));
        }
        if self.s3.public_base_url.is_empty() {
            return Err(ConfigError::MissingSecret("S3_PUBLIC_BASE_URL"));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::config::Environment;

    fn base_settings() -> Settings {
        Settings {
            runtime: RuntimeSettings {
                environment: Environment::Development,
                strict_config: false,
            },
            database: DatabaseSettings {
                postgres_server: "localhost".to_string(),
                postgres_port: 5432,
                postgres_user: "scriptmark".to_string(),
                postgres_password: String::new(),
                postgres_db: "scriptmark_db".to_string(),
                database_url: None,
            },
            providers: ProviderSettings {
                openai: OpenAiProviderSettings {
                    api_key: String::new(),
                    base_url: "https://api.openai.com/v1".to_string(),
                    model: "gpt-4o".to_string(),
                    max_tokens: 10_000,
                    timeout_seconds: 600,
                    priority: 1,
                },
                gemini: GeminiProviderSettings {
                    api_key: String::new(),
                    base_url: "https://generativelanguage.googleapis.com/v1beta".to_string(),
                    model: "gemini-2.0-flash".to_string(),
                    timeout_seconds: 600,
                    priority: 2,
                },
            },
            renderer: RendererSettings {
                api_key: String::new(),
                base_url: String::new(),
                dpi: 150,
                timeout_seconds: 120,
                poll_interval_seconds: 2,
                max_poll_attempts: 120,
                max_submit_retries: 3,
            },
            s3: S3Settings {
                endpoint: String::new(),
                access_key: String::new(),
                secret_key: String::new(),
                bucket: "scriptmark-documents".to_string(),
                region: "us-east-1".to_string(),
                public_base_url: String::new(),
            },
            partition: PartitionSettings {
                min_pages_per_student: 1,
                max_pages_per_student: 10,
                min_group_confidence: 0.5,
            },
            cache: CacheSettings { render_ttl_seconds: 900 },
            telemetry: TelemetrySettings {
                log_level: "info".to_string(),
                json: false,
                prometheus_enabled: false,
            },
        }
    }

    #[test]
    fn lenient_mode_accepts_empty_secrets() {
        assert!(base_settings().validate().is_ok());
    }

    #[test]
    fn strict_mode_requires_at_least_one_provider_key() {
        let mut settings = base_settings();
        settings.runtime.strict_config = true;
        settings.database.database_url = Some("postgresql://x".to_string());

        let err = settings.validate().unwrap_err();
        assert!(matches!(err, ConfigError::MissingSecret("OPENAI_API_KEY/GEMINI_API_KEY")));
    }

    #[test]
    fn partition_bounds_must_be_ordered() {
        let mut settings = base_settings();
        settings.partition.max_pages_per_student = 0;

        assert!(settings.validate().is_err());
    }

    #[test]
    fn provider_priorities_must_differ() {
        let mut settings = base_settings();
        settings.providers.gemini.priority = settings.providers.openai.priority;

        assert!(settings.validate().is_err());
    }

    #[test]
    fn confidence_threshold_must_be_a_ratio() {
        let mut settings = base_settings();
        settings.partition.min_group_confidence = 1.5;

        assert!(settings.validate().is_err());
    }
}
