//! Turning an admission rate into outbound calls.
//!
//! The live path draws a lead batch and spreads one origination task per
//! lead across the tick window, each sent to a randomly chosen sink. The
//! simulator implements the same trait by admitting synthetic calls.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use rand::seq::SliceRandom;
use rand::Rng;
use tokio::task::JoinSet;

use crate::error::{BoosterError, Result};
use crate::source::{LeadSource, OriginationSink};
use crate::types::{Lead, SkillId};

// ---------------------------------------------------------------------------
// Dispatch
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchOutcome {
    /// This many calls were launched (possibly zero for an empty batch).
    Launched(usize),
    /// A non-empty batch was requested but no leads were available.
    Starved,
}

#[async_trait]
pub trait Dispatch: Send + Sync {
    /// Launch up to `batch_size` calls spread over `window`. Origination
    /// work that outlives the call is spawned into `tasks`.
    async fn dispatch(
        &self,
        skill_id: SkillId,
        batch_size: u32,
        window: Duration,
        tasks: &mut JoinSet<()>,
    ) -> Result<DispatchOutcome>;
}

// ---------------------------------------------------------------------------
// SinkPool
// ---------------------------------------------------------------------------

/// Fixed set of origination sinks; read-only after construction.
pub struct SinkPool {
    sinks: Vec<Arc<dyn OriginationSink>>,
}

impl SinkPool {
    pub fn new(sinks: Vec<Arc<dyn OriginationSink>>) -> Result<Self> {
        if sinks.is_empty() {
            return Err(BoosterError::NoOriginationSinks);
        }
        Ok(Self { sinks })
    }

    pub fn len(&self) -> usize {
        self.sinks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sinks.is_empty()
    }

    pub fn choose<R: Rng + ?Sized>(&self, rng: &mut R) -> Arc<dyn OriginationSink> {
        // `new` guarantees at least one sink.
        self.sinks
            .choose(rng)
            .cloned()
            .unwrap_or_else(|| Arc::clone(&self.sinks[0]))
    }
}

// ---------------------------------------------------------------------------
// LeadDispatch
// ---------------------------------------------------------------------------

pub struct LeadDispatch {
    leads: Arc<dyn LeadSource>,
    sinks: Arc<SinkPool>,
}

impl LeadDispatch {
    pub fn new(leads: Arc<dyn LeadSource>, sinks: Arc<SinkPool>) -> Self {
        Self { leads, sinks }
    }
}

#[async_trait]
impl Dispatch for LeadDispatch {
    async fn dispatch(
        &self,
        skill_id: SkillId,
        batch_size: u32,
        window: Duration,
        tasks: &mut JoinSet<()>,
    ) -> Result<DispatchOutcome> {
        if batch_size == 0 {
            return Ok(DispatchOutcome::Launched(0));
        }

        let leads = self.leads.leads(batch_size, skill_id).await?;
        if leads.is_empty() {
            return Ok(DispatchOutcome::Starved);
        }

        let planned: Vec<_> = {
            let mut rng = rand::thread_rng();
            let window = window.as_secs_f64();
            leads
                .into_iter()
                .map(|lead| {
                    let delay = if window > 0.0 {
                        Duration::from_secs_f64(rng.gen_range(0.0..window))
                    } else {
                        Duration::ZERO
                    };
                    (lead, delay, self.sinks.choose(&mut rng))
                })
                .collect()
        };

        let launched = planned.len();
        for (lead, delay, sink) in planned {
            tasks.spawn(originate(skill_id, lead, delay, sink));
        }
        Ok(DispatchOutcome::Launched(launched))
    }
}

async fn originate(
    skill_id: SkillId,
    lead: Lead,
    delay: Duration,
    sink: Arc<dyn OriginationSink>,
) {
    tokio::time::sleep(delay).await;
    match sink.start_call(&lead).await {
        Ok(true) => tracing::debug!(
            skill_id,
            lead_id = lead.lead_id,
            sink = sink.name(),
            delay_ms = delay.as_millis() as u64,
            "call started"
        ),
        Ok(false) => tracing::warn!(
            skill_id,
            lead_id = lead.lead_id,
            sink = sink.name(),
            "sink refused call"
        ),
        Err(e) => tracing::warn!(
            skill_id,
            lead_id = lead.lead_id,
            sink = sink.name(),
            error = %e,
            "call start failed"
        ),
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
