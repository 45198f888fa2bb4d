mod parsing;
mod settings;
mod types;

pub(crate) use types::{AnalyticsSettings, ConfigError, EngineSettings, Settings, StoreBackend};
