//! Per-skill pacing loop.
//!
//! One [`SkillPacer`] owns one skill's controller and origination task
//! group. Each tick reads occupancy feedback, updates the controller,
//! records a chart sample and dispatches the resulting batch:
//!
//! ```text
//!   feedback ─▶ RateController::update ─▶ set_setpoint(online * wanted)
//!                     │
//!                     ├─▶ ChartStore::append
//!                     └─▶ Dispatch::dispatch(round(rate * update_time))
//! ```
//!
//! An inactive or disabled skill short-circuits with power 0 and is polled
//! again after one second. An empty lead batch resets the controller and
//! forces power to 0 before the next full interval.

use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use futures::FutureExt;
use tokio::task::JoinSet;

use crate::chart::{ChartSample, ChartStore};
use crate::config::{DemoConfig, OriginationConfig, PacingConfig};
use crate::context::{RuntimeContext, ShutdownSignal};
use crate::controller::{ControllerSnapshot, Gains, OutputLimits, RateController};
use crate::dispatch::{Dispatch, DispatchOutcome};
use crate::skill::SkillHandle;
use crate::source::FeedbackSource;
use crate::types::SkillFeedback;

const INACTIVE_POLL: Duration = Duration::from_secs(1);

// ---------------------------------------------------------------------------
// PacingSettings
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq)]
pub struct PacingSettings {
    pub update_time: Duration,
    pub wanted_ratio: f64,
    pub gains: Gains,
    pub limits: OutputLimits,
    pub include_overflow: bool,
    /// Reset the controller on every inactive tick, not just when disabled.
    ///
    /// Off by default: a skill that drops out of the active list and comes
    /// back resumes with the integral it had. Turning this on resets it on
    /// every inactive tick, the same as an explicit disable.
    pub reset_when_inactive: bool,
    pub drain_timeout: Duration,
    pub inactive_poll: Duration,
}

impl PacingSettings {
    pub fn from_config(pacing: &PacingConfig, origination: &OriginationConfig) -> Self {
        Self {
            update_time: pacing.update_time(),
            wanted_ratio: pacing.wanted_ratio,
            gains: pacing.gains,
            limits: pacing.limits,
            include_overflow: pacing.include_overflow,
            reset_when_inactive: pacing.reset_when_inactive,
            drain_timeout: origination.drain_timeout(),
            inactive_poll: INACTIVE_POLL,
        }
    }

    /// Settings for a simulated skill. Overflow always counts as feedback
    /// there since the simulator is the only source that reports it.
    pub fn from_demo(demo: &DemoConfig) -> Self {
        Self {
            update_time: demo.update_time(),
            wanted_ratio: demo.wanted_ratio,
            gains: demo.gains,
            limits: demo.limits,
            include_overflow: true,
            reset_when_inactive: false,
            drain_timeout: Duration::ZERO,
            inactive_poll: INACTIVE_POLL,
        }
    }

    /// Leads requested for one tick at `rate` calls per second.
    pub fn batch_size(&self, rate: f64) -> u32 {
        let batch = (rate * self.update_time.as_secs_f64()).round();
        if batch.is_finite() && batch > 0.0 {
            batch.min(f64::from(u32::MAX)) as u32
        } else {
            0
        }
    }
}

// ---------------------------------------------------------------------------
// TickOutcome
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickOutcome {
    /// Inactive or disabled; power forced to 0.
    Idle,
    /// Feedback could not be fetched; power keeps its last value.
    FeedbackFailed,
    Dispatched { launched: usize },
    /// Lead source had nothing; controller reset, power 0.
    Starved,
    /// Lead fetch failed; logged, nothing dispatched.
    DispatchFailed,
    /// The tick panicked; logged, the loop carries on.
    Panicked,
}

// ---------------------------------------------------------------------------
// SkillPacer
// ---------------------------------------------------------------------------

pub struct SkillPacer {
    handle: SkillHandle,
    settings: PacingSettings,
    controller: RateController,
    feedback: Arc<dyn FeedbackSource>,
    dispatch: Arc<dyn Dispatch>,
    store: Arc<ChartStore>,
    shutdown: ShutdownSignal,
    tasks: JoinSet<()>,
    power: f64,
    last_overflow: u64,
}

impl SkillPacer {
    pub fn new(
        ctx: &RuntimeContext,
        handle: SkillHandle,
        feedback: Arc<dyn FeedbackSource>,
        dispatch: Arc<dyn Dispatch>,
    ) -> Self {
        let settings = PacingSettings::from_config(&ctx.config.pacing, &ctx.config.origination);
        Self {
            controller: RateController::new(settings.gains, settings.limits, 0.0),
            handle,
            settings,
            feedback,
            dispatch,
            store: Arc::clone(&ctx.store),
            shutdown: ctx.shutdown.clone(),
            tasks: JoinSet::new(),
            power: 0.0,
            last_overflow: 0,
        }
    }

    pub fn with_settings(mut self, settings: PacingSettings) -> Self {
        self.controller.configure(settings.gains, settings.limits);
        self.settings = settings;
        self
    }

    pub fn handle(&self) -> &SkillHandle {
        &self.handle
    }

    pub fn power(&self) -> f64 {
        self.power
    }

    pub fn controller(&self) -> ControllerSnapshot {
        self.controller.snapshot()
    }

    pub fn in_flight(&self) -> usize {
        self.tasks.len()
    }

    /// One pass of the control cycle. Never fails; every error is logged and
    /// mapped to an outcome.
    pub async fn tick(&mut self) -> TickOutcome {
        self.reap();
        let skill_id = self.handle.skill_id();

        if !self.handle.is_active() || self.handle.is_disabled() {
            if self.handle.is_disabled() || self.settings.reset_when_inactive {
                self.controller.reset();
            }
            self.set_power(0.0);
            return TickOutcome::Idle;
        }

        let feedback = match self.feedback.skill_feedback(skill_id).await {
            Ok(feedback) => feedback,
            Err(e) => {
                tracing::warn!(skill_id, error = %e, "feedback fetch failed, skipping tick");
                return TickOutcome::FeedbackFailed;
            }
        };

        let input = self.feedback_input(&feedback);
        let rate = self.controller.update(input, self.settings.update_time);
        let setpoint = (f64::from(feedback.online) * self.settings.wanted_ratio).round();
        self.controller.set_setpoint(setpoint);
        self.power = rate;

        self.handle.publish(|status| {
            status.all = feedback.all;
            status.online = feedback.online;
            status.busy = feedback.busy;
            status.wait = feedback.wait;
            status.approximate_busy = feedback.approximate_busy;
            status.power = rate;
            status.setpoint = setpoint;
            status.updated_at = Some(Utc::now());
        });
        self.record(&feedback);

        let batch = self.settings.batch_size(rate);
        tracing::info!(
            skill_id,
            online = feedback.online,
            busy = feedback.busy,
            approximate_busy = feedback.approximate_busy,
            wait = feedback.wait,
            feedback = input,
            setpoint,
            power = rate,
            batch,
            "tick"
        );

        match self
            .dispatch
            .dispatch(skill_id, batch, self.settings.update_time, &mut self.tasks)
            .await
        {
            Ok(DispatchOutcome::Launched(launched)) => TickOutcome::Dispatched { launched },
            Ok(DispatchOutcome::Starved) => {
                tracing::warn!(skill_id, batch, "no leads available, resetting controller");
                self.controller.reset();
                self.set_power(0.0);
                TickOutcome::Starved
            }
            Err(e) => {
                tracing::warn!(skill_id, batch, error = %e, "lead fetch failed");
                TickOutcome::DispatchFailed
            }
        }
    }

    /// Run until shutdown, then drain the origination task group.
    pub async fn run(mut self) {
        let skill_id = self.handle.skill_id();
        tracing::info!(skill_id, "pacing loop started");
        while !self.shutdown.is_shutdown() {
            let outcome = match AssertUnwindSafe(self.tick()).catch_unwind().await {
                Ok(outcome) => outcome,
                Err(panic) => {
                    tracing::error!(
                        skill_id,
                        panic = panic_message(panic.as_ref()),
                        "pacing tick panicked"
                    );
                    TickOutcome::Panicked
                }
            };
            let pause = match outcome {
                TickOutcome::Idle => self.settings.inactive_poll,
                _ => self.settings.update_time,
            };
            if self.shutdown.sleep(pause).await {
                break;
            }
        }
        self.drain().await;
        tracing::info!(skill_id, "pacing loop stopped");
    }

    fn feedback_input(&mut self, feedback: &SkillFeedback) -> f64 {
        let mut input = feedback.occupancy();
        if let Some(total) = feedback.overflow_total {
            let delta = total.saturating_sub(self.last_overflow);
            self.last_overflow = total;
            if self.settings.include_overflow {
                input += delta as f64;
            }
        }
        input
    }

    fn set_power(&mut self, power: f64) {
        self.power = power;
        self.handle.publish(|status| {
            status.power = power;
            status.updated_at = Some(Utc::now());
        });
    }

    fn record(&self, feedback: &SkillFeedback) {
        let sample = ChartSample {
            skill_id: self.handle.skill_id(),
            calc_time: Utc::now(),
            cnt_online: feedback.online,
            cnt_busy: feedback.busy,
            cnt_wait: feedback.wait,
            power: self.power,
        };
        if let Err(e) = self.store.append(&sample) {
            tracing::warn!(skill_id = sample.skill_id, error = %e, "chart sample dropped");
        }
    }

    fn reap(&mut self) {
        while let Some(result) = self.tasks.try_join_next() {
            if let Err(e) = result {
                if e.is_panic() {
                    tracing::error!(skill_id = self.handle.skill_id(), "origination task panicked");
                }
            }
        }
    }

    async fn drain(&mut self) {
        let skill_id = self.handle.skill_id();
        if self.tasks.is_empty() {
            return;
        }
        if self.settings.drain_timeout.is_zero() {
            tracing::debug!(skill_id, pending = self.tasks.len(), "detaching origination tasks");
            self.tasks.detach_all();
            return;
        }
        let tasks = &mut self.tasks;
        let drained = tokio::time::timeout(self.settings.drain_timeout, async {
            while tasks.join_next().await.is_some() {}
        })
        .await;
        if drained.is_err() {
            tracing::warn!(
                skill_id,
                pending = self.tasks.len(),
                "drain timeout elapsed, aborting origination tasks"
            );
            self.tasks.abort_all();
        }
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> &str {
    if let Some(msg) = panic.downcast_ref::<&str>() {
        *msg
    } else if let Some(msg) = panic.downcast_ref::<String>() {
        msg.as_str()
    } else {
        "non-string panic payload"
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::context::shutdown_channel;
    use crate::dispatch::{LeadDispatch, SinkPool};
    use crate::error::{BoosterError, Result};
    use crate::source::{LeadSource, OriginationSink};
    use crate::types::{Lead, SkillId};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    struct StaticFeedback(Mutex<SkillFeedback>);

    impl StaticFeedback {
        fn new(online: u32, busy: u32, wait: u32) -> Arc<Self> {
            Arc::new(Self(Mutex::new(SkillFeedback {
                all: online,
                online,
                busy,
                wait,
                ..Default::default()
            })))
        }
    }

    #[async_trait]
    impl FeedbackSource for StaticFeedback {
        async fn skill_feedback(&self, _skill_id: SkillId) -> Result<SkillFeedback> {
            Ok(*self.0.lock().unwrap())
        }
    }

    struct FailingFeedback;

    #[async_trait]
    impl FeedbackSource for FailingFeedback {
        async fn skill_feedback(&self, _skill_id: SkillId) -> Result<SkillFeedback> {
            Err(BoosterError::RequestFailed {
                url: "http://dispatcher/skill_details/1".into(),
                attempts: 3,
                reason: "connection refused".into(),
            })
        }
    }

    #[derive(Default)]
    struct RecordingDispatch(Mutex<Vec<u32>>);

    #[async_trait]
    impl Dispatch for RecordingDispatch {
        async fn dispatch(
            &self,
            _skill_id: SkillId,
            batch_size: u32,
            _window: Duration,
            _tasks: &mut JoinSet<()>,
        ) -> Result<DispatchOutcome> {
            self.0.lock().unwrap().push(batch_size);
            Ok(DispatchOutcome::Launched(batch_size as usize))
        }
    }

    /// Panics on its first call only.
    #[derive(Default)]
    struct PanicOnce(AtomicUsize);

    #[async_trait]
    impl Dispatch for PanicOnce {
        async fn dispatch(
            &self,
            _skill_id: SkillId,
            batch_size: u32,
            _window: Duration,
            _tasks: &mut JoinSet<()>,
        ) -> Result<DispatchOutcome> {
            if self.0.fetch_add(1, Ordering::SeqCst) == 0 {
                panic!("dispatcher blew up");
            }
            Ok(DispatchOutcome::Launched(batch_size as usize))
        }
    }

    struct NoLeads;

    #[async_trait]
    impl LeadSource for NoLeads {
        async fn leads(&self, _batch_size: u32, _skill_id: SkillId) -> Result<Vec<Lead>> {
            Ok(Vec::new())
        }
    }

    struct NullSink;

    #[async_trait]
    impl OriginationSink for NullSink {
        fn name(&self) -> &str {
            "null"
        }

        async fn start_call(&self, _lead: &Lead) -> Result<bool> {
            Ok(true)
        }
    }

    fn context() -> RuntimeContext {
        let (_trigger, signal) = shutdown_channel();
        RuntimeContext::new(
            Arc::new(Config::default()),
            Arc::new(ChartStore::in_memory(9999).unwrap()),
            signal,
        )
    }

    fn settings() -> PacingSettings {
        PacingSettings {
            update_time: Duration::from_secs(5),
            wanted_ratio: 0.9,
            gains: Gains::new(0.5, 0.05, 0.0),
            limits: OutputLimits::new(0.0, 200.0),
            include_overflow: false,
            reset_when_inactive: false,
            drain_timeout: Duration::ZERO,
            inactive_poll: INACTIVE_POLL,
        }
    }

    fn pacer(
        ctx: &RuntimeContext,
        feedback: Arc<dyn FeedbackSource>,
        dispatch: Arc<dyn Dispatch>,
    ) -> SkillPacer {
        let handle = SkillHandle::new(1);
        handle.switch_active(true);
        SkillPacer::new(ctx, handle, feedback, dispatch).with_settings(settings())
    }

    #[tokio::test]
    async fn setpoint_follows_online_and_output_settles() {
        let ctx = context();
        let dispatch = Arc::new(RecordingDispatch::default());
        let mut pacer = pacer(&ctx, StaticFeedback::new(10, 9, 0), dispatch.clone());

        pacer.tick().await;
        assert_eq!(pacer.controller().setpoint, 9.0);

        let mut outputs = Vec::new();
        for _ in 0..20 {
            assert!(matches!(pacer.tick().await, TickOutcome::Dispatched { .. }));
            outputs.push(pacer.power());
        }
        // Feedback sits on the setpoint: no error, no drift.
        let last = outputs[outputs.len() - 1];
        assert!(outputs.iter().all(|p| (p - last).abs() < 1e-9));
        assert!((0.0..=200.0).contains(&last));
        assert_eq!(ctx.store.count().unwrap(), 21);
        assert_eq!(pacer.handle().status().setpoint, 9.0);
    }

    #[tokio::test]
    async fn empty_lead_batches_reset_and_zero_power() {
        let ctx = context();
        let sink: Arc<dyn OriginationSink> = Arc::new(NullSink);
        let dispatch = Arc::new(LeadDispatch::new(
            Arc::new(NoLeads),
            Arc::new(SinkPool::new(vec![sink]).unwrap()),
        ));
        let mut pacer = pacer(&ctx, StaticFeedback::new(10, 0, 0), dispatch);

        // First tick only learns the setpoint.
        pacer.tick().await;

        for _ in 0..3 {
            assert_eq!(pacer.tick().await, TickOutcome::Starved);
            assert_eq!(pacer.power(), 0.0);
            assert_eq!(pacer.controller().integral, 0.0);
            assert_eq!(pacer.controller().last_output, None);
            assert_eq!(pacer.handle().status().power, 0.0);
        }
    }

    #[tokio::test]
    async fn deactivation_preserves_integral() {
        let ctx = context();
        let dispatch = Arc::new(RecordingDispatch::default());
        let mut pacer = pacer(&ctx, StaticFeedback::new(10, 2, 0), dispatch);

        for _ in 0..4 {
            pacer.tick().await;
        }
        let before = pacer.controller().integral;
        assert!(before > 0.0);

        pacer.handle().switch_active(false);
        assert_eq!(pacer.tick().await, TickOutcome::Idle);
        assert_eq!(pacer.power(), 0.0);
        assert_eq!(pacer.controller().integral, before);

        pacer.handle().switch_active(true);
        assert_eq!(pacer.controller().integral, before);
        assert!(matches!(pacer.tick().await, TickOutcome::Dispatched { .. }));
    }

    #[tokio::test]
    async fn reset_when_inactive_clears_integral() {
        let ctx = context();
        let dispatch = Arc::new(RecordingDispatch::default());
        let mut pacer = pacer(&ctx, StaticFeedback::new(10, 2, 0), dispatch);
        pacer.settings.reset_when_inactive = true;
        for _ in 0..3 {
            pacer.tick().await;
        }
        assert!(pacer.controller().integral > 0.0);

        pacer.handle().switch_active(false);
        assert_eq!(pacer.tick().await, TickOutcome::Idle);
        assert_eq!(pacer.controller().integral, 0.0);
    }

    #[tokio::test]
    async fn disabled_skill_resets_controller() {
        let ctx = context();
        let dispatch = Arc::new(RecordingDispatch::default());
        let mut pacer = pacer(&ctx, StaticFeedback::new(10, 2, 0), dispatch);
        for _ in 0..3 {
            pacer.tick().await;
        }
        pacer.handle().set_disabled(true);
        assert_eq!(pacer.tick().await, TickOutcome::Idle);
        assert_eq!(pacer.controller().integral, 0.0);
    }

    #[tokio::test]
    async fn failed_feedback_keeps_power() {
        let ctx = context();
        let dispatch = Arc::new(RecordingDispatch::default());
        let mut pacer = pacer(&ctx, StaticFeedback::new(10, 2, 0), dispatch.clone());
        pacer.tick().await;
        pacer.tick().await;
        let power = pacer.power();
        let sent = dispatch.0.lock().unwrap().len();

        pacer.feedback = Arc::new(FailingFeedback);
        assert_eq!(pacer.tick().await, TickOutcome::FeedbackFailed);
        assert_eq!(pacer.power(), power);
        assert_eq!(dispatch.0.lock().unwrap().len(), sent);
    }

    #[tokio::test]
    async fn batch_is_rate_times_interval() {
        let ctx = context();
        let dispatch = Arc::new(RecordingDispatch::default());
        let mut pacer = pacer(&ctx, StaticFeedback::new(10, 0, 0), dispatch.clone());
        pacer.tick().await;
        pacer.tick().await;
        let expected = pacer.settings.batch_size(pacer.power());
        assert!(expected > 0);
        assert_eq!(dispatch.0.lock().unwrap().last().copied(), Some(expected));
    }

    #[test]
    fn batch_size_rounds_and_clamps() {
        let s = settings();
        assert_eq!(s.batch_size(0.0), 0);
        assert_eq!(s.batch_size(0.09), 0);
        assert_eq!(s.batch_size(0.1), 1);
        assert_eq!(s.batch_size(2.0), 10);
        assert_eq!(s.batch_size(-3.0), 0);
        assert_eq!(s.batch_size(f64::NAN), 0);
    }

    #[tokio::test]
    async fn overflow_delta_is_added_when_enabled() {
        let ctx = context();
        let feedback = StaticFeedback::new(10, 0, 0);
        feedback.0.lock().unwrap().overflow_total = Some(4);
        let dispatch = Arc::new(RecordingDispatch::default());
        let mut pacer = SkillPacer::new(&ctx, SkillHandle::new(1), feedback.clone(), dispatch)
            .with_settings(PacingSettings {
                include_overflow: true,
                ..settings()
            });

        let observed = *feedback.0.lock().unwrap();
        assert_eq!(pacer.feedback_input(&observed), 4.0);
        // Same total again: no new overflow.
        assert_eq!(pacer.feedback_input(&observed), 0.0);
    }

    #[tokio::test]
    async fn run_stops_on_shutdown() {
        let (trigger, signal) = shutdown_channel();
        let ctx = RuntimeContext::new(
            Arc::new(Config::default()),
            Arc::new(ChartStore::in_memory(10).unwrap()),
            signal,
        );
        let dispatch = Arc::new(RecordingDispatch::default());
        let pacer = pacer(&ctx, StaticFeedback::new(10, 5, 0), dispatch);
        let join = tokio::spawn(pacer.run());
        tokio::time::sleep(Duration::from_millis(50)).await;
        trigger.fire();
        tokio::time::timeout(Duration::from_secs(5), join)
            .await
            .unwrap()
            .unwrap();
        assert!(ctx.store.count().unwrap() >= 1);
    }

    #[tokio::test]
    async fn panicking_tick_does_not_stop_the_loop() {
        let (trigger, signal) = shutdown_channel();
        let ctx = RuntimeContext::new(
            Arc::new(Config::default()),
            Arc::new(ChartStore::in_memory(100).unwrap()),
            signal,
        );
        let dispatch = Arc::new(PanicOnce::default());
        let handle = SkillHandle::new(1);
        handle.switch_active(true);
        let feedback = StaticFeedback::new(10, 5, 0);
        let pacer = SkillPacer::new(&ctx, handle, feedback, dispatch.clone()).with_settings(
            PacingSettings {
                update_time: Duration::from_millis(20),
                ..settings()
            },
        );

        let join = tokio::spawn(pacer.run());
        tokio::time::sleep(Duration::from_millis(300)).await;
        trigger.fire();
        tokio::time::timeout(Duration::from_secs(5), join)
            .await
            .unwrap()
            .unwrap();

        assert!(dispatch.0.load(Ordering::SeqCst) > 1);
        assert!(ctx.store.count().unwrap() > 1);
    }

    #[test]
    fn panic_payloads_render_as_text() {
        let payload: Box<dyn Any + Send> = Box::new("boom");
        assert_eq!(panic_message(payload.as_ref()), "boom");
        let payload: Box<dyn Any + Send> = Box::new(String::from("bang"));
        assert_eq!(panic_message(payload.as_ref()), "bang");
        let payload: Box<dyn Any + Send> = Box::new(7_u8);
        assert_eq!(panic_message(payload.as_ref()), "non-string panic payload");
    }
}
