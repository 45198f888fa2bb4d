use std::sync::Arc;

use crate::core::clock::Clock;
use crate::core::{config::Settings, redis::RedisHandle};
use crate::repositories::EngineStore;

#[derive(Clone)]
pub(crate) struct AppState {
    inner: Arc<InnerState>,
}

struct InnerState {
    settings: Settings,
    store: Arc<dyn EngineStore>,
    redis: RedisHandle,
    clock: Arc<dyn Clock>,
}

impl AppState {
    pub(crate) fn new(
        settings: Settings,
        store: Arc<dyn EngineStore>,
        redis: RedisHandle,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self { inner: Arc::new(InnerState { settings, store, redis, clock }) }
    }

    pub(crate) fn settings(&self) -> &Settings {
        &self.inner.settings
    }

    pub(crate) fn store(&self) -> &dyn EngineStore {
        self.inner.store.as_ref()
    }

    pub(crate) fn redis(&self) -> &RedisHandle {
        &self.inner.redis
    }

    pub(crate) fn clock(&self) -> &dyn Clock {
        self.inner.clock.as_ref()
    }
}
