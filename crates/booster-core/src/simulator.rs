//! Offline call lifecycle simulator.
//!
//! Stands in for the operator dispatcher when validating controller tuning:
//! admitted calls get randomized stage timestamps, a periodic sweep walks
//! them through searching / connected / overflow / ended against an
//! [`OccupancyTracker`], and the tracker's weighted occupancy becomes the
//! feedback the pacing loop would otherwise fetch over HTTP.
//!
//! ```text
//! admitted ─▶ ringing ─▶ ivr ─▶ searching ─┬─▶ connected ─▶ ended
//!                                         └─▶ overflow (hotline)
//! ```

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, TimeDelta, Utc};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tokio::task::{JoinHandle, JoinSet};

use crate::call::{Call, CallStage, CallTimeline};
use crate::config::DemoConfig;
use crate::context::ShutdownSignal;
use crate::dispatch::{Dispatch, DispatchOutcome};
use crate::error::Result;
use crate::occupancy::{OccupancyTracker, OccupancyWeights};
use crate::sampling::Normal;
use crate::source::FeedbackSource;
use crate::types::{CallId, SkillFeedback, SkillId};

// ---------------------------------------------------------------------------
// CallProfile
// ---------------------------------------------------------------------------

/// Stage durations (seconds) and conversion ratios of simulated calls.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CallProfile {
    /// Ring start to IVR start.
    #[serde(default = "default_ring")]
    pub ring: Normal,
    /// IVR start to operator search.
    #[serde(default = "default_ivr")]
    pub ivr: Normal,
    /// Operator search window before the call overflows.
    #[serde(default = "default_redirect")]
    pub redirect: Normal,
    /// Conversation length after the search window.
    #[serde(default = "default_talk")]
    pub talk: Normal,
    /// Share of dialed leads that answer.
    #[serde(default = "default_answer_ratio")]
    pub answer_ratio: Normal,
    /// Share of answered calls that leave the IVR for an operator.
    #[serde(default = "default_redirect_ratio")]
    pub redirect_ratio: Normal,
}

fn default_ring() -> Normal {
    Normal::new(14.3, 4.0, 2.0)
}

fn default_ivr() -> Normal {
    Normal::new(20.5, 5.0, 3.0)
}

fn default_redirect() -> Normal {
    Normal::new(25.5, 5.0, 5.0)
}

fn default_talk() -> Normal {
    Normal::new(90.0, 30.0, 10.0)
}

fn default_answer_ratio() -> Normal {
    Normal::new(0.21, 0.03, 0.0)
}

fn default_redirect_ratio() -> Normal {
    Normal::new(0.12, 0.02, 0.0)
}

impl Default for CallProfile {
    fn default() -> Self {
        Self {
            ring: default_ring(),
            ivr: default_ivr(),
            redirect: default_redirect(),
            talk: default_talk(),
            answer_ratio: default_answer_ratio(),
            redirect_ratio: default_redirect_ratio(),
        }
    }
}

/// Longest a single sampled stage may last.
pub const MAX_STAGE_SECS: f64 = 86_400.0;

fn seconds(secs: f64) -> TimeDelta {
    // NaN and negatives map to 0 through `max`.
    let secs = secs.max(0.0).min(MAX_STAGE_SECS);
    TimeDelta::milliseconds((secs * 1000.0).round() as i64)
}

fn after(t: DateTime<Utc>, secs: f64) -> DateTime<Utc> {
    t.checked_add_signed(seconds(secs))
        .unwrap_or(DateTime::<Utc>::MAX_UTC)
}

// ---------------------------------------------------------------------------
// Reports
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SweepReport {
    pub ended: u32,
    pub overflowed: u32,
    pub assigned: u32,
    pub waiting: u32,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SimulationStats {
    pub in_flight: usize,
    pub waiting: usize,
    pub admitted_total: u64,
    pub ended_total: u64,
    pub overflow_total: u64,
}

// ---------------------------------------------------------------------------
// CallSimulator
// ---------------------------------------------------------------------------

pub struct CallSimulator {
    skill_id: SkillId,
    profile: CallProfile,
    tracker: OccupancyTracker,
    calls: BTreeMap<CallId, Call>,
    waiting: BTreeSet<CallId>,
    next_call_id: CallId,
    ended_total: u64,
    overflow_total: u64,
    rng: StdRng,
}

impl CallSimulator {
    /// A `None` seed draws one from the OS.
    pub fn new(profile: CallProfile, tracker: OccupancyTracker, seed: Option<u64>) -> Self {
        let rng = match seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        Self {
            skill_id: tracker.skill_id(),
            profile,
            tracker,
            calls: BTreeMap::new(),
            waiting: BTreeSet::new(),
            next_call_id: 1,
            ended_total: 0,
            overflow_total: 0,
            rng,
        }
    }

    pub fn skill_id(&self) -> SkillId {
        self.skill_id
    }

    pub fn tracker(&self) -> &OccupancyTracker {
        &self.tracker
    }

    pub fn call(&self, id: CallId) -> Option<&Call> {
        self.calls.get(&id)
    }

    pub fn is_waiting(&self, id: CallId) -> bool {
        self.waiting.contains(&id)
    }

    /// Number of dialed leads in a batch that reach the operator search.
    pub fn connected_batch_size(&mut self, dialed: u32) -> u32 {
        let answer = self.profile.answer_ratio.sample(&mut self.rng).max(0.0).min(1.0);
        let redirect = self.profile.redirect_ratio.sample(&mut self.rng).max(0.0).min(1.0);
        (f64::from(dialed) * answer * redirect).round() as u32
    }

    /// Admit one tick's worth of calls, each with a random admission delay
    /// inside `window`. Returns the number admitted.
    pub fn admit_batch(&mut self, dialed: u32, window: Duration, now: DateTime<Utc>) -> u32 {
        let count = self.connected_batch_size(dialed);
        let window = window.as_secs_f64();
        for _ in 0..count {
            let delay = if window > 0.0 {
                self.rng.gen_range(0.0..window)
            } else {
                0.0
            };
            self.admit(after(now, delay));
        }
        count
    }

    /// Admit one call at `admitted` with sampled stage durations.
    pub fn admit(&mut self, admitted: DateTime<Utc>) -> CallId {
        let ring_start = admitted;
        let ivr_start = after(ring_start, self.profile.ring.sample(&mut self.rng));
        let redirect_search = after(ivr_start, self.profile.ivr.sample(&mut self.rng));
        let redirect_connect = after(redirect_search, self.profile.redirect.sample(&mut self.rng));
        let end = after(redirect_connect, self.profile.talk.sample(&mut self.rng));
        self.admit_with(CallTimeline {
            admitted,
            ring_start,
            ivr_start,
            redirect_search,
            redirect_connect,
            end,
        })
    }

    /// Admit a call with an explicit timeline.
    pub fn admit_with(&mut self, timeline: CallTimeline) -> CallId {
        let id = self.next_call_id;
        self.next_call_id += 1;
        self.calls.insert(id, Call::new(id, self.skill_id, timeline));
        id
    }

    /// Advance every in-flight call against `now`.
    pub fn sweep(&mut self, now: DateTime<Utc>) -> SweepReport {
        let mut report = SweepReport::default();
        let mut finished = Vec::new();

        for call in self.calls.values_mut() {
            match call.stage(now) {
                CallStage::Ended => {
                    if let Some(operator_id) = call.operator {
                        self.tracker.release(operator_id, now);
                    }
                    self.ended_total += 1;
                    report.ended += 1;
                    finished.push(call.id);
                }
                CallStage::Overflow => {
                    self.overflow_total += 1;
                    report.overflowed += 1;
                    finished.push(call.id);
                    tracing::debug!(
                        skill_id = self.skill_id,
                        call_id = call.id,
                        "call overflowed to hotline"
                    );
                }
                CallStage::SearchingOperator => match self.tracker.assign(call, now) {
                    Some(operator_id) => {
                        call.operator = Some(operator_id);
                        self.waiting.remove(&call.id);
                        report.assigned += 1;
                    }
                    None => {
                        self.waiting.insert(call.id);
                    }
                },
                CallStage::Admitted
                | CallStage::Ringing
                | CallStage::Ivr
                | CallStage::Connected => {}
            }
        }

        for id in finished {
            self.calls.remove(&id);
            self.waiting.remove(&id);
        }
        report.waiting = u32::try_from(self.waiting.len()).unwrap_or(u32::MAX);
        report
    }

    pub fn feedback(&self, now: DateTime<Utc>) -> SkillFeedback {
        let snap = self.tracker.snapshot(now);
        SkillFeedback {
            all: snap.total,
            online: snap.total,
            busy: snap.busy,
            wait: u32::try_from(self.waiting.len()).unwrap_or(u32::MAX),
            approximate_busy: Some(snap.approximate_busy),
            overflow_total: Some(self.overflow_total),
        }
    }

    pub fn stats(&self) -> SimulationStats {
        SimulationStats {
            in_flight: self.calls.len(),
            waiting: self.waiting.len(),
            admitted_total: self.next_call_id - 1,
            ended_total: self.ended_total,
            overflow_total: self.overflow_total,
        }
    }
}

// ---------------------------------------------------------------------------
// SimulatedSkill
// ---------------------------------------------------------------------------

/// Shared handle that plugs a simulator into a pacing loop as both its
/// feedback source and its dispatcher.
#[derive(Clone)]
pub struct SimulatedSkill {
    sim: Arc<Mutex<CallSimulator>>,
}

impl SimulatedSkill {
    pub fn new(sim: CallSimulator) -> Self {
        Self {
            sim: Arc::new(Mutex::new(sim)),
        }
    }

    /// Simulated skill with `demo.operators` operators numbered from 1.
    /// Each skill derives its own seed from the configured one.
    pub fn from_demo(skill_id: SkillId, demo: &DemoConfig, weights: OccupancyWeights) -> Self {
        let mut tracker = OccupancyTracker::new(skill_id, weights);
        for operator_id in 1..=demo.operators {
            tracker.add_operator(operator_id, demo.rest());
        }
        let seed = demo.seed.map(|seed| seed.wrapping_add(u64::from(skill_id)));
        Self::new(CallSimulator::new(demo.profile, tracker, seed))
    }

    pub async fn stats(&self) -> SimulationStats {
        self.sim.lock().await.stats()
    }

    /// Run the sweep every `interval` until shutdown.
    pub fn spawn_sweeper(&self, interval: Duration, mut shutdown: ShutdownSignal) -> JoinHandle<()> {
        let sim = Arc::clone(&self.sim);
        tokio::spawn(async move {
            while !shutdown.sleep(interval).await {
                let report = sim.lock().await.sweep(Utc::now());
                if report.overflowed > 0 {
                    tracing::debug!(
                        overflowed = report.overflowed,
                        waiting = report.waiting,
                        "sweep overflow"
                    );
                }
            }
        })
    }
}

#[async_trait]
impl FeedbackSource for SimulatedSkill {
    async fn skill_feedback(&self, _skill_id: SkillId) -> Result<SkillFeedback> {
        Ok(self.sim.lock().await.feedback(Utc::now()))
    }
}

#[async_trait]
impl Dispatch for SimulatedSkill {
    async fn dispatch(
        &self,
        _skill_id: SkillId,
        batch_size: u32,
        window: Duration,
        _tasks: &mut JoinSet<()>,
    ) -> Result<DispatchOutcome> {
        let admitted = self
            .sim
            .lock()
            .await
            .admit_batch(batch_size, window, Utc::now());
        Ok(DispatchOutcome::Launched(admitted as usize))
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn simulator(operators: u32, rest_secs: i64) -> CallSimulator {
        let mut tracker = OccupancyTracker::new(7, OccupancyWeights::default());
        for id in 1..=operators {
            tracker.add_operator(id, TimeDelta::seconds(rest_secs));
        }
        CallSimulator::new(CallProfile::default(), tracker, Some(11))
    }

    fn timeline(base: DateTime<Utc>, search: i64, deadline: i64, end: i64) -> CallTimeline {
        CallTimeline {
            admitted: base,
            ring_start: base,
            ivr_start: base,
            redirect_search: base + TimeDelta::seconds(search),
            redirect_connect: base + TimeDelta::seconds(deadline),
            end: base + TimeDelta::seconds(end),
        }
    }

    #[test]
    fn single_operator_serves_one_of_two_overlapping_calls() {
        let mut sim = simulator(1, 20);
        let base = Utc::now();
        let first = sim.admit_with(timeline(base, 10, 30, 100));
        let second = sim.admit_with(timeline(base, 10, 30, 100));

        let report = sim.sweep(base + TimeDelta::seconds(11));
        assert_eq!(report.assigned, 1);
        assert_eq!(report.waiting, 1);
        assert_eq!(sim.call(first).unwrap().operator, Some(1));
        assert!(sim.is_waiting(second));
        assert_eq!(sim.feedback(base + TimeDelta::seconds(11)).wait, 1);

        // Still waiting before the deadline, counted once.
        let report = sim.sweep(base + TimeDelta::seconds(20));
        assert_eq!(report.waiting, 1);
        assert_eq!(sim.feedback(base + TimeDelta::seconds(20)).wait, 1);

        let report = sim.sweep(base + TimeDelta::seconds(31));
        assert_eq!(report.overflowed, 1);
        assert_eq!(report.waiting, 0);
        assert!(sim.call(second).is_none());
        assert_eq!(sim.stats().overflow_total, 1);
        assert_eq!(sim.call(first).unwrap().operator, Some(1));
    }

    #[test]
    fn ended_call_releases_operator_into_rest() {
        let mut sim = simulator(1, 20);
        let base = Utc::now();
        sim.admit_with(timeline(base, 1, 10, 30));
        sim.sweep(base + TimeDelta::seconds(2));

        let after_end = base + TimeDelta::seconds(31);
        let report = sim.sweep(after_end);
        assert_eq!(report.ended, 1);
        assert_eq!(sim.stats().in_flight, 0);

        let operator = sim.tracker().operator(1).unwrap();
        assert!(!operator.is_assigned());
        assert!(operator.is_resting(after_end + TimeDelta::seconds(5)));

        let feedback = sim.feedback(after_end);
        assert_eq!(feedback.busy, 1);
        assert!(feedback.approximate_busy.unwrap() > 0.9);
    }

    #[test]
    fn waiting_call_is_assigned_once_an_operator_frees_up() {
        let mut sim = simulator(1, 0);
        let base = Utc::now();
        let first = sim.admit_with(timeline(base, 1, 5, 10));
        let second = sim.admit_with(timeline(base, 1, 30, 60));

        sim.sweep(base + TimeDelta::seconds(2));
        assert!(sim.is_waiting(second));

        // First call ends, its operator has no rest, second is picked up.
        sim.sweep(base + TimeDelta::seconds(11));
        sim.sweep(base + TimeDelta::seconds(12));
        assert!(sim.call(first).is_none());
        assert_eq!(sim.call(second).unwrap().operator, Some(1));
        assert!(!sim.is_waiting(second));
    }

    #[test]
    fn operator_assignments_never_overlap() {
        let mut sim = simulator(3, 5);
        let start = Utc::now();
        let mut held: BTreeMap<u32, (CallId, DateTime<Utc>)> = BTreeMap::new();
        let mut intervals: Vec<(u32, DateTime<Utc>, DateTime<Utc>)> = Vec::new();

        for step in 0..3_000 {
            let now = start + TimeDelta::milliseconds(step * 500);
            if step % 10 == 0 {
                sim.admit_batch(400, Duration::from_secs(5), now);
            }
            sim.sweep(now);
            for operator in sim.tracker().operators() {
                if let (Some(call_id), Some(assigned_at)) = (operator.call, operator.assigned_at) {
                    let end = sim.call(call_id).unwrap().timeline.end;
                    if held.insert(operator.id, (call_id, assigned_at)) != Some((call_id, assigned_at)) {
                        intervals.push((operator.id, assigned_at, end));
                    }
                }
            }
            let snap = sim.tracker().snapshot(now);
            assert!(snap.busy <= snap.total);
        }

        assert!(!intervals.is_empty());
        for operator_id in 1..=3 {
            let mut mine: Vec<_> = intervals.iter().filter(|(id, _, _)| *id == operator_id).collect();
            mine.sort_by_key(|(_, from, _)| *from);
            for pair in mine.windows(2) {
                assert!(pair[0].2 <= pair[1].1, "operator {operator_id} double-booked");
            }
        }
    }

    #[test]
    fn batch_size_scales_with_ratios() {
        let mut tracker = OccupancyTracker::new(7, OccupancyWeights::default());
        tracker.add_operator(1, TimeDelta::seconds(1));
        let profile = CallProfile {
            answer_ratio: Normal::new(0.5, 0.0, 0.0),
            redirect_ratio: Normal::new(0.2, 0.0, 0.0),
            ..CallProfile::default()
        };
        let mut sim = CallSimulator::new(profile, tracker, Some(3));
        assert_eq!(sim.connected_batch_size(100), 10);
        assert_eq!(sim.admit_batch(50, Duration::from_secs(10), Utc::now()), 5);
        assert_eq!(sim.stats().in_flight, 5);
    }

    #[test]
    fn negative_ratio_samples_floor_at_zero() {
        let tracker = OccupancyTracker::new(7, OccupancyWeights::default());
        let profile = CallProfile {
            answer_ratio: Normal::new(-1.0, 0.0, -5.0),
            ..CallProfile::default()
        };
        let mut sim = CallSimulator::new(profile, tracker, Some(3));
        assert_eq!(sim.connected_batch_size(1_000), 0);
    }

    #[test]
    fn runaway_durations_are_capped() {
        let mut tracker = OccupancyTracker::new(7, OccupancyWeights::default());
        tracker.add_operator(1, TimeDelta::seconds(1));
        let profile = CallProfile {
            talk: Normal::new(1e300, 1e300, 0.0),
            ring: Normal::new(f64::INFINITY, 0.0, 0.0),
            answer_ratio: Normal::new(1e9, 0.0, 0.0),
            redirect_ratio: Normal::new(1e9, 0.0, 0.0),
            ..CallProfile::default()
        };
        let mut sim = CallSimulator::new(profile, tracker, Some(5));
        let now = Utc::now();

        // Ratios cap at 1, so every dialed lead connects.
        assert_eq!(sim.admit_batch(3, Duration::from_secs(1), now), 3);
        let t = sim.call(1).unwrap().timeline;
        let cap = TimeDelta::seconds(MAX_STAGE_SECS as i64);
        assert!(t.ivr_start - t.ring_start <= cap);
        assert!(t.end - t.redirect_connect <= cap);
        assert_eq!(sim.sweep(now + TimeDelta::seconds(1)).ended, 0);
    }

    #[test]
    fn admission_near_the_end_of_time_saturates() {
        let mut sim = simulator(1, 1);
        let id = sim.admit(DateTime::<Utc>::MAX_UTC - TimeDelta::seconds(5));
        let t = sim.call(id).unwrap().timeline;
        assert_eq!(t.end, DateTime::<Utc>::MAX_UTC);
    }

    #[test]
    fn admitted_timelines_are_ordered_within_window() {
        let mut sim = simulator(1, 1);
        let now = Utc::now();
        sim.admit_batch(2_000, Duration::from_secs(10), now);
        let stats = sim.stats();
        assert!(stats.in_flight > 0);
        for id in 1..=stats.admitted_total {
            let t = sim.call(id).unwrap().timeline;
            assert!(t.admitted >= now && t.admitted < now + TimeDelta::seconds(10));
            assert!(t.ring_start <= t.ivr_start);
            assert!(t.ivr_start <= t.redirect_search);
            assert!(t.redirect_search <= t.redirect_connect);
            assert!(t.redirect_connect <= t.end);
        }
    }

    #[tokio::test]
    async fn demo_skill_has_configured_operators() {
        let demo = DemoConfig {
            operators: 4,
            seed: Some(1),
            ..DemoConfig::default()
        };
        let skill = SimulatedSkill::from_demo(9, &demo, OccupancyWeights::default());
        let feedback = skill.skill_feedback(9).await.unwrap();
        assert_eq!(feedback.online, 4);
        assert_eq!(feedback.busy, 0);
    }

    #[tokio::test]
    async fn simulated_skill_feeds_and_dispatches() {
        let skill = SimulatedSkill::new(simulator(5, 10));
        let mut tasks = JoinSet::new();
        let outcome = skill
            .dispatch(7, 1_000, Duration::from_millis(10), &mut tasks)
            .await
            .unwrap();
        let DispatchOutcome::Launched(admitted) = outcome else {
            panic!("simulator never starves");
        };
        assert_eq!(skill.stats().await.in_flight, admitted);

        let feedback = skill.skill_feedback(7).await.unwrap();
        assert_eq!(feedback.online, 5);
        assert_eq!(feedback.approximate_busy, Some(0.0));
        assert_eq!(feedback.overflow_total, Some(0));
    }
}
