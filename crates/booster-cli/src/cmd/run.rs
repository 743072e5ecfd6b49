use std::path::Path;
use std::sync::Arc;

use anyhow::Context;
use booster_core::chart::ChartStore;
use booster_core::clients::{http_sink_pool, ApiClient, DispatcherClient, LeadBufferClient};
use booster_core::config::Config;
use booster_core::context::{shutdown_channel, RuntimeContext, ShutdownTrigger};
use booster_core::dispatch::{Dispatch, LeadDispatch};
use booster_core::manager::SkillManager;
use booster_core::mock::{mock_sink_pool, MockDispatcher, MockLeadBuffer};
use booster_core::skill::SkillRegistry;
use booster_core::source::{ActiveSkillSource, FeedbackSource, LeadSource};
use booster_server::state::AppState;

use crate::cmd::config::ensure_valid;

struct Sources {
    active: Arc<dyn ActiveSkillSource>,
    feedback: Arc<dyn FeedbackSource>,
    dispatch: Arc<dyn Dispatch>,
}

fn sources(config: &Config) -> anyhow::Result<Sources> {
    if config.mock_requests {
        tracing::warn!("mock_requests is on, no external service will be called");
        let dispatcher = Arc::new(MockDispatcher);
        let leads: Arc<dyn LeadSource> = Arc::new(MockLeadBuffer::default());
        let pool = mock_sink_pool(&config.origination.addresses)?;
        return Ok(Sources {
            active: dispatcher.clone(),
            feedback: dispatcher,
            dispatch: Arc::new(LeadDispatch::new(leads, Arc::new(pool))),
        });
    }

    let api = ApiClient::new(&config.http)?;
    let dispatcher = Arc::new(DispatcherClient::new(api.clone(), &config.dispatcher.address()));
    let leads: Arc<dyn LeadSource> =
        Arc::new(LeadBufferClient::new(api.clone(), &config.lead_buffer.address()));
    let pool = http_sink_pool(&api, &config.origination.addresses)?;
    tracing::info!(
        dispatcher = %config.dispatcher.base_url(),
        lead_buffer = %config.lead_buffer.base_url(),
        sinks = pool.len(),
        "external services configured"
    );
    Ok(Sources {
        active: dispatcher.clone(),
        feedback: dispatcher,
        dispatch: Arc::new(LeadDispatch::new(leads, Arc::new(pool))),
    })
}

pub(crate) fn open_store(config: &Config, no_persist: bool) -> anyhow::Result<ChartStore> {
    let store = if no_persist {
        ChartStore::in_memory(config.chart.max_rows)?
    } else {
        ChartStore::open(Path::new(&config.chart.path), config.chart.max_rows)
            .with_context(|| format!("failed to open chart store at {}", config.chart.path))?
    };
    Ok(store)
}

/// Fire the trigger on Ctrl-C.
pub(crate) fn watch_ctrl_c(trigger: ShutdownTrigger) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("interrupt received");
            trigger.fire();
        }
    })
}

pub fn run(config_path: &Path, no_api: bool, no_persist: bool) -> anyhow::Result<()> {
    let config = Config::load_or_default(config_path)
        .with_context(|| format!("failed to load config from {}", config_path.display()))?;
    ensure_valid(&config)?;

    let rt = tokio::runtime::Runtime::new()?;
    rt.block_on(serve(Arc::new(config), no_api, no_persist))
}

async fn serve(config: Arc<Config>, no_api: bool, no_persist: bool) -> anyhow::Result<()> {
    let store = Arc::new(open_store(&config, no_persist)?);
    let (trigger, signal) = shutdown_channel();
    let ctx = RuntimeContext::new(Arc::clone(&config), Arc::clone(&store), signal.clone());
    let registry = SkillRegistry::new();
    let Sources {
        active,
        feedback,
        dispatch,
    } = sources(&config)?;

    tracing::info!(app = %config.app, "starting");
    let ctrl_c = watch_ctrl_c(trigger.clone());
    let manager = SkillManager::new(ctx, registry.clone(), active, feedback, dispatch);
    let manager = tokio::spawn(manager.run());

    let mut result = Ok(());
    if !no_api {
        let state = AppState::new(Arc::clone(&config), registry, store, trigger.clone());
        result = booster_server::serve(state, signal).await;
        if let Err(e) = &result {
            tracing::error!(error = %e, "status API failed, shutting down");
            trigger.fire();
        }
    }

    manager.await?;
    ctrl_c.abort();
    tracing::info!("stopped");
    result
}
