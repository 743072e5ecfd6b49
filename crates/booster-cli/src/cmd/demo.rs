use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use booster_core::config::{Config, DemoConfig};
use booster_core::context::{shutdown_channel, RuntimeContext, ShutdownSignal};
use booster_core::controller::{Gains, OutputLimits};
use booster_core::pacing::{PacingSettings, SkillPacer};
use booster_core::simulator::{SimulatedSkill, SimulationStats};
use booster_core::skill::{SkillHandle, SkillRegistry, SkillStatus};
use booster_server::state::AppState;
use clap::Args;
use serde::Serialize;
use tokio::task::JoinSet;

use crate::cmd::config::ensure_valid;
use crate::cmd::run::{open_store, watch_ctrl_c};
use crate::output::{print_json, print_table};

#[derive(Args, Debug, Default)]
pub struct DemoArgs {
    /// Number of simulated skills
    #[arg(long)]
    pub skills: Option<u32>,

    /// Stop after this many seconds (runs until Ctrl-C when omitted)
    #[arg(long)]
    pub duration: Option<u64>,

    /// Seed for reproducible call timelines
    #[arg(long)]
    pub seed: Option<u64>,

    #[arg(long)]
    pub kp: Option<f64>,

    #[arg(long)]
    pub ki: Option<f64>,

    #[arg(long)]
    pub kd: Option<f64>,

    /// Target busy fraction of online operators
    #[arg(long)]
    pub wanted_ratio: Option<f64>,

    /// Seconds between control ticks
    #[arg(long)]
    pub update_time: Option<u64>,

    /// Operators per simulated skill
    #[arg(long)]
    pub operators: Option<u32>,

    /// Upper bound on the dial rate, calls per second
    #[arg(long)]
    pub max_output: Option<f64>,

    /// Serve the status API while the simulation runs
    #[arg(long)]
    pub api: bool,

    /// Keep chart samples in memory only
    #[arg(long)]
    pub no_persist: bool,
}

impl DemoArgs {
    /// Overlay command-line overrides on the configured demo section.
    fn apply(&self, demo: &mut DemoConfig) {
        if let Some(skills) = self.skills {
            demo.skills = skills;
        }
        if let Some(seed) = self.seed {
            demo.seed = Some(seed);
        }
        demo.gains = Gains::new(
            self.kp.unwrap_or(demo.gains.kp),
            self.ki.unwrap_or(demo.gains.ki),
            self.kd.unwrap_or(demo.gains.kd),
        );
        if let Some(ratio) = self.wanted_ratio {
            demo.wanted_ratio = ratio;
        }
        if let Some(secs) = self.update_time {
            demo.update_time_secs = secs;
        }
        if let Some(operators) = self.operators {
            demo.operators = operators;
        }
        if let Some(max) = self.max_output {
            demo.limits = OutputLimits::new(demo.limits.min, max);
        }
    }
}

#[derive(Debug, Serialize)]
struct DemoSummary {
    #[serde(flatten)]
    status: SkillStatus,
    #[serde(flatten)]
    stats: SimulationStats,
}

pub fn run(config_path: &Path, args: DemoArgs, json: bool) -> anyhow::Result<()> {
    let mut config = Config::load_or_default(config_path)
        .with_context(|| format!("failed to load config from {}", config_path.display()))?;
    args.apply(&mut config.demo);
    ensure_valid(&config)?;

    let rt = tokio::runtime::Runtime::new()?;
    let summaries = rt.block_on(simulate(Arc::new(config), &args))?;

    if json {
        print_json(&summaries)
    } else {
        print_summary(&summaries);
        Ok(())
    }
}

async fn simulate(config: Arc<Config>, args: &DemoArgs) -> anyhow::Result<Vec<DemoSummary>> {
    let store = Arc::new(open_store(&config, args.no_persist)?);
    let (trigger, signal) = shutdown_channel();
    let ctx = RuntimeContext::new(Arc::clone(&config), Arc::clone(&store), signal.clone());
    let registry = SkillRegistry::new();
    let demo = &config.demo;
    let settings = PacingSettings::from_demo(demo);

    let mut tasks = JoinSet::new();
    let mut skills: Vec<(SkillHandle, SimulatedSkill)> = Vec::new();
    for i in 0..demo.skills {
        let skill_id = demo.first_skill_id.saturating_add(i);
        let sim = SimulatedSkill::from_demo(skill_id, demo, config.pacing.occupancy);
        let sweeper = sim.spawn_sweeper(demo.sweep_interval(), signal.clone());

        let (handle, _) = registry.get_or_create(skill_id);
        handle.switch_active(true);
        let pacer = SkillPacer::new(
            &ctx,
            handle.clone(),
            Arc::new(sim.clone()),
            Arc::new(sim.clone()),
        )
        .with_settings(settings.clone());
        tasks.spawn(pacer.run());
        tasks.spawn(async move {
            if let Err(e) = sweeper.await {
                tracing::error!(error = %e, "sweeper task failed");
            }
        });
        skills.push((handle, sim));
    }
    tracing::info!(
        skills = demo.skills,
        operators = demo.operators,
        update_time_secs = demo.update_time_secs,
        wanted_ratio = demo.wanted_ratio,
        "simulation started"
    );

    tasks.spawn(report(skills.clone(), demo.update_time(), signal.clone()));

    let ctrl_c = watch_ctrl_c(trigger.clone());
    if let Some(secs) = args.duration {
        let trigger = trigger.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(secs)).await;
            trigger.fire();
        });
    }

    if args.api {
        let state = AppState::new(Arc::clone(&config), registry, store, trigger.clone());
        if let Err(e) = booster_server::serve(state, signal).await {
            tracing::error!(error = %e, "status API failed, stopping simulation");
            trigger.fire();
        }
    }

    while let Some(result) = tasks.join_next().await {
        result.context("simulation task failed")?;
    }
    ctrl_c.abort();

    let mut summaries = Vec::with_capacity(skills.len());
    for (handle, sim) in skills {
        summaries.push(DemoSummary {
            status: handle.status(),
            stats: sim.stats().await,
        });
    }
    Ok(summaries)
}

/// Log simulator state next to the pacer's own tick line.
async fn report(
    skills: Vec<(SkillHandle, SimulatedSkill)>,
    interval: Duration,
    mut shutdown: ShutdownSignal,
) {
    while !shutdown.sleep(interval).await {
        for (handle, sim) in &skills {
            let stats = sim.stats().await;
            tracing::info!(
                skill_id = handle.skill_id(),
                power = handle.status().power,
                in_flight = stats.in_flight,
                waiting = stats.waiting,
                overflow_total = stats.overflow_total,
                ended_total = stats.ended_total,
                "simulation"
            );
        }
    }
}

fn print_summary(summaries: &[DemoSummary]) {
    let rows = summaries
        .iter()
        .map(|s| {
            vec![
                s.status.skill_id.to_string(),
                format!("{:.2}", s.status.power),
                s.status.busy.to_string(),
                s.status
                    .approximate_busy
                    .map(|b| format!("{b:.2}"))
                    .unwrap_or_else(|| "-".to_string()),
                s.status.wait.to_string(),
                s.stats.overflow_total.to_string(),
                s.stats.ended_total.to_string(),
                s.stats.in_flight.to_string(),
            ]
        })
        .collect();
    print_table(
        &[
            "SKILL", "POWER", "BUSY", "APPROX", "WAIT", "OVERFLOW", "ENDED", "IN FLIGHT",
        ],
        rows,
    );
}
