use super::parsing::{
    env_optional, env_or_default, parse_bool, parse_cors_origins, parse_environment,
    parse_percentage, parse_store_backend, parse_u16, parse_u32, parse_u64, parse_usize,
};
use super::types::{
    AnalyticsSettings, ApiSettings, ConfigError, CorsSettings, DatabaseSettings, EngineSettings,
    RedisSettings, RuntimeSettings, ServerHost, ServerPort, ServerSettings, Settings,
    StoreBackend, StoreSettings, TelemetrySettings,
};

impl Settings {
    pub(crate) fn load() -> Result<Self, ConfigError> {
        let host = env_or_default("EXAMCORE_HOST", "0.0.0.0");
        let port = env_or_default("EXAMCORE_PORT", "8000");

        let environment = parse_environment(
            env_optional("EXAMCORE_ENV").or_else(|| env_optional("ENVIRONMENT")),
        );
        let strict_config =
            env_optional("EXAMCORE_STRICT_CONFIG").map(|value| parse_bool(&value)).unwrap_or(false)
                || environment.is_production();

        let project_name = env_or_default("PROJECT_NAME", "Examcore API");
        let version = env_or_default("VERSION", env!("CARGO_PKG_VERSION"));
        let api_v1_str = env_or_default("API_V1_STR", "/api/v1");

        let cors_origins = parse_cors_origins(env_optional("BACKEND_CORS_ORIGINS"))?;

        let postgres_server = env_or_default("POSTGRES_SERVER", "localhost");
        let postgres_port = parse_u16("POSTGRES_PORT", env_or_default("POSTGRES_PORT", "5432"))?;
        let postgres_user = env_or_default("POSTGRES_USER", "examcore");
        let postgres_password = env_or_default("POSTGRES_PASSWORD", "");
        let postgres_db = env_or_default("POSTGRES_DB", "examcore");
        let database_url = env_optional("DATABASE_URL");
        let max_connections =
            parse_u32("DATABASE_MAX_CONNECTIONS", env_or_default("DATABASE_MAX_CONNECTIONS", "30"))?;

        let redis_host = env_or_default("REDIS_HOST", "localhost");
        let redis_port = parse_u16("REDIS_PORT", env_or_default("REDIS_PORT", "6379"))?;
        let redis_db = parse_u16("REDIS_DB", env_or_default("REDIS_DB", "0"))?;
        let redis_password = env_or_default("REDIS_PASSWORD", "");

        let backend = parse_store_backend(env_optional("STORE_BACKEND"))?;

        let sweep_interval_seconds = parse_u64(
            "ENFORCER_SWEEP_INTERVAL_SECONDS",
            env_or_default("ENFORCER_SWEEP_INTERVAL_SECONDS", "5"),
        )?;
        let max_session_duration_minutes = parse_u32(
            "MAX_SESSION_DURATION_MINUTES",
            env_or_default("MAX_SESSION_DURATION_MINUTES", "600"),
        )?;
        let live_status_recent_limit = parse_usize(
            "LIVE_STATUS_RECENT_LIMIT",
            env_or_default("LIVE_STATUS_RECENT_LIMIT", "10"),
        )?;
        let mistake_examples_per_chapter = parse_usize(
            "MISTAKE_EXAMPLES_PER_CHAPTER",
            env_or_default("MISTAKE_EXAMPLES_PER_CHAPTER", "3"),
        )?;

        let trend_window =
            parse_usize("ANALYTICS_TREND_WINDOW", env_or_default("ANALYTICS_TREND_WINDOW", "10"))?;
        let weak_chapter_min_attempts = parse_usize(
            "ANALYTICS_WEAK_CHAPTER_MIN_ATTEMPTS",
            env_or_default("ANALYTICS_WEAK_CHAPTER_MIN_ATTEMPTS", "3"),
        )?;
        let weak_chapter_limit = parse_usize(
            "ANALYTICS_WEAK_CHAPTER_LIMIT",
            env_or_default("ANALYTICS_WEAK_CHAPTER_LIMIT", "5"),
        )?;
        let weak_chapter_max_accuracy = parse_percentage(
            "ANALYTICS_WEAK_CHAPTER_MAX_ACCURACY",
            env_or_default("ANALYTICS_WEAK_CHAPTER_MAX_ACCURACY", "70"),
        )?;
        let segment_window = parse_usize(
            "ANALYTICS_SEGMENT_WINDOW",
            env_or_default("ANALYTICS_SEGMENT_WINDOW", "5"),
        )?;
        let trend_tolerance = parse_percentage(
            "ANALYTICS_TREND_TOLERANCE",
            env_or_default("ANALYTICS_TREND_TOLERANCE", "5"),
        )?;
        let top_performer_min_average = parse_percentage(
            "ANALYTICS_TOP_PERFORMER_MIN_AVERAGE",
            env_or_default("ANALYTICS_TOP_PERFORMER_MIN_AVERAGE", "80"),
        )?;
        let at_risk_max_average = parse_percentage(
            "ANALYTICS_AT_RISK_MAX_AVERAGE",
            env_or_default("ANALYTICS_AT_RISK_MAX_AVERAGE", "50"),
        )?;
        let participation_drop_points = parse_percentage(
            "ANALYTICS_PARTICIPATION_DROP_POINTS",
            env_or_default("ANALYTICS_PARTICIPATION_DROP_POINTS", "20"),
        )?;
        let cache_ttl_seconds = parse_u64(
            "ANALYTICS_CACHE_TTL_SECONDS",
            env_or_default("ANALYTICS_CACHE_TTL_SECONDS", "60"),
        )?;

        let log_level = env_or_default("EXAMCORE_LOG_LEVEL", "info");
        let json = env_optional("EXAMCORE_LOG_JSON").map(|value| parse_bool(&value)).unwrap_or(false);
        let prometheus_enabled =
            env_optional("PROMETHEUS_ENABLED").map(|value| parse_bool(&value)).unwrap_or(false);

        let settings = Self {
            server: ServerSettings { host: ServerHost::parse(host)?, port: ServerPort::parse(port)? },
            runtime: RuntimeSettings { environment, strict_config },
            api: ApiSettings { project_name, version, api_v1_str },
            cors: CorsSettings { origins: cors_origins },
            database: DatabaseSettings {
                postgres_server,
                postgres_port,
                postgres_user,
                postgres_password,
                postgres_db,
                database_url,
                max_connections,
            },
            redis: RedisSettings {
                host: redis_host,
                port: redis_port,
                db: redis_db,
                password: redis_password,
            },
            store: StoreSettings { backend },
            engine: EngineSettings {
                sweep_interval_seconds,
                max_session_duration_minutes,
                live_status_recent_limit,
                mistake_examples_per_chapter,
            },
            analytics: AnalyticsSettings {
                trend_window,
                weak_chapter_min_attempts,
                weak_chapter_limit,
                weak_chapter_max_accuracy,
                segment_window,
                trend_tolerance,
                top_performer_min_average,
                at_risk_max_average,
                participation_drop_points,
                cache_ttl_seconds,
            },
            telemetry: TelemetrySettings { log_level, json, prometheus_enabled },
        };

        settings.validate()?;
        Ok(settings)
    }

    pub(crate) fn server_addr(&self) -> String {
        format!("{}:{}", self.server.host.0, self.server.port.0)
    }

    pub(crate) fn server_host(&self) -> &str {
        &self.server.host.0
    }

    pub(crate) fn server_port(&self) -> u16 {
        self.server.port.0
    }

    pub(crate) fn api(&self) -> &ApiSettings {
        &self.api
    }

    pub(crate) fn cors(&self) -> &CorsSettings {
        &self.cors
    }

    pub(crate) fn database(&self) -> &DatabaseSettings {
        &self.database
    }

    pub(crate) fn redis(&self) -> &RedisSettings {
        &self.redis
    }

    pub(crate) fn store(&self) -> &StoreSettings {
        &self.store
    }

    pub(crate) fn engine(&self) -> &EngineSettings {
        &self.engine
    }

    pub(crate) fn analytics(&self) -> &AnalyticsSettings {
        &self.analytics
    }

    pub(crate) fn telemetry(&self) -> &TelemetrySettings {
        &self.telemetry
    }

    pub(crate) fn runtime(&self) -> &RuntimeSettings {
        &self.runtime
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.engine.sweep_interval_seconds == 0 {
            return Err(ConfigError::InvalidValue {
                field: "ENFORCER_SWEEP_INTERVAL_SECONDS",
                value: "0".to_string(),
            });
        }

        let max_minutes = self.engine.max_session_duration_minutes;
        if max_minutes == 0 || i32::try_from(max_minutes).is_err() {
            return Err(ConfigError::InvalidValue {
                field: "MAX_SESSION_DURATION_MINUTES",
                value: max_minutes.to_string(),
            });
        }

        if self.analytics.trend_window == 0 {
            return Err(ConfigError::InvalidValue {
                field: "ANALYTICS_TREND_WINDOW",
                value: "0".to_string(),
            });
        }

        if self.analytics.segment_window < 2 {
            return Err(ConfigError::InvalidValue {
                field: "ANALYTICS_SEGMENT_WINDOW",
                value: self.analytics.segment_window.to_string(),
            });
        }

        if self.analytics.at_risk_max_average >= self.analytics.top_performer_min_average {
            return Err(ConfigError::InvalidValue {
                field: "ANALYTICS_AT_RISK_MAX_AVERAGE",
                value: self.analytics.at_risk_max_average.to_string(),
            });
        }

        if !(self.runtime.strict_config || self.runtime.environment.is_production()) {
            return Ok(());
        }

        if self.store.backend == StoreBackend::Memory {
            return Err(ConfigError::InvalidValue {
                field: "STORE_BACKEND",
                value: self.store.backend.as_str().to_string(),
            });
        }

        if self.database.database_url.is_none() && self.database.postgres_password.is_empty() {
            return Err(ConfigError::MissingSecret("POSTGRES_PASSWORD"));
        }

        Ok(())
    }
}
