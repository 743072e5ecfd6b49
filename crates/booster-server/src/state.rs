use std::sync::Arc;
use std::time::Instant;

use booster_core::chart::ChartStore;
use booster_core::config::Config;
use booster_core::context::ShutdownTrigger;
use booster_core::skill::SkillRegistry;

/// Shared application state passed to all route handlers.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub registry: SkillRegistry,
    pub store: Arc<ChartStore>,
    pub shutdown: ShutdownTrigger,
    pub started_at: Instant,
}

impl AppState {
    pub fn new(
        config: Arc<Config>,
        registry: SkillRegistry,
        store: Arc<ChartStore>,
        shutdown: ShutdownTrigger,
    ) -> Self {
        Self {
            config,
            registry,
            store,
            shutdown,
            started_at: Instant::now(),
        }
    }
}
