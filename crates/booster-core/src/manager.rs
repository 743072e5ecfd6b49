//! Skill lifecycle manager.
//!
//! Polls the active-skill list and keeps exactly one pacing loop per skill
//! id. Skills that drop out of the list are switched inactive, never torn
//! down, so their controller state and chart history survive.

use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;
use std::time::Duration;

use tokio::task::{Id, JoinSet};
use tokio::time::Instant;

use crate::context::RuntimeContext;
use crate::dispatch::Dispatch;
use crate::pacing::SkillPacer;
use crate::skill::{SkillHandle, SkillRegistry};
use crate::source::{ActiveSkillSource, FeedbackSource};
use crate::types::SkillId;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PollReport {
    pub created: Vec<SkillId>,
    pub activated: Vec<SkillId>,
    pub deactivated: Vec<SkillId>,
}

pub struct SkillManager {
    ctx: RuntimeContext,
    registry: SkillRegistry,
    active: Arc<dyn ActiveSkillSource>,
    feedback: Arc<dyn FeedbackSource>,
    dispatch: Arc<dyn Dispatch>,
    loops: JoinSet<()>,
    owners: HashMap<Id, SkillId>,
    spawned: usize,
}

impl SkillManager {
    pub fn new(
        ctx: RuntimeContext,
        registry: SkillRegistry,
        active: Arc<dyn ActiveSkillSource>,
        feedback: Arc<dyn FeedbackSource>,
        dispatch: Arc<dyn Dispatch>,
    ) -> Self {
        Self {
            ctx,
            registry,
            active,
            feedback,
            dispatch,
            loops: JoinSet::new(),
            owners: HashMap::new(),
            spawned: 0,
        }
    }

    pub fn registry(&self) -> &SkillRegistry {
        &self.registry
    }

    /// Number of pacing loops started over the manager's lifetime.
    pub fn spawned(&self) -> usize {
        self.spawned
    }

    /// Reconcile tracked skills with one read of the active list.
    pub async fn poll_once(&mut self) -> PollReport {
        let active = match self.active.active_skills().await {
            Ok(ids) => ids,
            Err(e) => {
                tracing::warn!(error = %e, "active skill poll failed, treating as empty");
                Vec::new()
            }
        };
        let active: BTreeSet<SkillId> = active.into_iter().collect();
        let mut report = PollReport::default();

        for &skill_id in &active {
            let (handle, created) = self.registry.get_or_create(skill_id);
            if created {
                report.created.push(skill_id);
            }
            if !handle.is_active() {
                handle.switch_active(true);
                report.activated.push(skill_id);
            }
            if created {
                self.spawn(handle);
            }
        }

        for handle in self.registry.handles() {
            if !active.contains(&handle.skill_id()) && handle.is_active() {
                handle.switch_active(false);
                report.deactivated.push(handle.skill_id());
            }
        }

        report
    }

    fn spawn(&mut self, handle: SkillHandle) {
        let skill_id = handle.skill_id();
        let pacer = SkillPacer::new(
            &self.ctx,
            handle,
            Arc::clone(&self.feedback),
            Arc::clone(&self.dispatch),
        );
        let task = self.loops.spawn(pacer.run());
        self.owners.insert(task.id(), skill_id);
        self.spawned += 1;
        tracing::info!(skill_id, "pacing loop spawned");
    }

    fn poll_interval(&self) -> Duration {
        let manager = &self.ctx.config.manager;
        let secs = if self.registry.is_empty() {
            manager.idle_poll_secs
        } else {
            manager.busy_poll_secs
        };
        Duration::from_secs(secs)
    }

    /// Poll until shutdown, then wait for every pacing loop to stop.
    pub async fn run(mut self) {
        let mut shutdown = self.ctx.shutdown.clone();
        let alive_every = Duration::from_secs(self.ctx.config.manager.alive_report_secs);
        let mut last_alive = Instant::now();
        tracing::info!("skill manager started");

        while !shutdown.is_shutdown() {
            self.poll_once().await;
            self.reap();

            if last_alive.elapsed() >= alive_every {
                last_alive = Instant::now();
                let active: Vec<SkillId> = self
                    .registry
                    .handles()
                    .iter()
                    .filter(|h| h.is_active())
                    .map(SkillHandle::skill_id)
                    .collect();
                tracing::info!(tracked = ?self.registry.ids(), active = ?active, "alive");
            }

            if shutdown.sleep(self.poll_interval()).await {
                break;
            }
        }
        self.join().await;
    }

    /// Wait for every spawned pacing loop to observe shutdown.
    pub async fn join(&mut self) {
        let pending = self.loops.len();
        while let Some(result) = self.loops.join_next().await {
            if let Err(e) = result {
                tracing::error!(error = %e, "pacing loop ended abnormally");
            }
        }
        tracing::info!(loops = pending, "skill manager stopped");
    }

    /// Collect finished loops. A loop that died while the process is still
    /// running loses its registry entry, so the next poll respawns it.
    fn reap(&mut self) {
        while let Some(result) = self.loops.try_join_next_with_id() {
            match result {
                Ok((id, ())) => {
                    self.owners.remove(&id);
                }
                Err(e) => {
                    let skill_id = self.owners.remove(&e.id());
                    tracing::error!(
                        skill_id = ?skill_id,
                        error = %e,
                        "pacing loop ended abnormally"
                    );
                    if let Some(skill_id) = skill_id {
                        self.registry.remove(skill_id);
                    }
                }
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
