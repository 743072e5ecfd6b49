//! Operator occupancy for one skill.
//!
//! Operators are kept ordered by their configured rest duration so the
//! greedy assignment scan never re-sorts. Ties are broken by operator id.

use std::collections::{BTreeMap, HashMap};

use chrono::{DateTime, TimeDelta, Utc};
use serde::{Deserialize, Serialize};

use crate::call::Call;
use crate::types::{CallId, OperatorId, SkillId};

// ---------------------------------------------------------------------------
// OccupancyWeights
// ---------------------------------------------------------------------------

/// Weighting used for the approximate-busy estimate.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct OccupancyWeights {
    /// Connected calls older than this count with `long_call_weight`.
    #[serde(default = "default_long_call_secs")]
    pub long_call_secs: u64,
    #[serde(default = "default_long_call_weight")]
    pub long_call_weight: f64,
}

fn default_long_call_secs() -> u64 {
    120
}

fn default_long_call_weight() -> f64 {
    0.9
}

impl Default for OccupancyWeights {
    fn default() -> Self {
        Self {
            long_call_secs: default_long_call_secs(),
            long_call_weight: default_long_call_weight(),
        }
    }
}

// ---------------------------------------------------------------------------
// Operator
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct Operator {
    pub id: OperatorId,
    pub skill_id: SkillId,
    pub call: Option<CallId>,
    pub assigned_at: Option<DateTime<Utc>>,
    pub rest_until: Option<DateTime<Utc>>,
    pub rest: TimeDelta,
}

impl Operator {
    pub fn is_assigned(&self) -> bool {
        self.call.is_some()
    }

    pub fn is_resting(&self, now: DateTime<Utc>) -> bool {
        self.call.is_none() && self.rest_until.is_some_and(|until| until > now)
    }

    pub fn is_available(&self, now: DateTime<Utc>) -> bool {
        self.call.is_none() && self.rest_until.map_or(true, |until| now >= until)
    }
}

// ---------------------------------------------------------------------------
// OccupancySnapshot
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct OccupancySnapshot {
    pub total: u32,
    pub assigned: u32,
    pub resting: u32,
    /// Operators either on a call or still resting.
    pub busy: u32,
    pub approximate_busy: f64,
}

// ---------------------------------------------------------------------------
// OccupancyTracker
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct OccupancyTracker {
    skill_id: SkillId,
    weights: OccupancyWeights,
    operators: BTreeMap<(TimeDelta, OperatorId), Operator>,
    rest_index: HashMap<OperatorId, TimeDelta>,
}

impl OccupancyTracker {
    pub fn new(skill_id: SkillId, weights: OccupancyWeights) -> Self {
        Self {
            skill_id,
            weights,
            operators: BTreeMap::new(),
            rest_index: HashMap::new(),
        }
    }

    pub fn skill_id(&self) -> SkillId {
        self.skill_id
    }

    /// Register an operator. Returns `false` if the id is already present.
    pub fn add_operator(&mut self, id: OperatorId, rest: TimeDelta) -> bool {
        if self.rest_index.contains_key(&id) {
            return false;
        }
        self.rest_index.insert(id, rest);
        self.operators.insert(
            (rest, id),
            Operator {
                id,
                skill_id: self.skill_id,
                call: None,
                assigned_at: None,
                rest_until: None,
                rest,
            },
        );
        true
    }

    pub fn len(&self) -> usize {
        self.operators.len()
    }

    pub fn is_empty(&self) -> bool {
        self.operators.is_empty()
    }

    pub fn operator(&self, id: OperatorId) -> Option<&Operator> {
        let rest = self.rest_index.get(&id)?;
        self.operators.get(&(*rest, id))
    }

    /// Operators in assignment scan order.
    pub fn operators(&self) -> impl Iterator<Item = &Operator> {
        self.operators.values()
    }

    /// Assign `call` to the first available operator in scan order.
    ///
    /// Calls that have already ended at `now` are never assigned.
    pub fn assign(&mut self, call: &Call, now: DateTime<Utc>) -> Option<OperatorId> {
        if call.timeline.end <= now {
            return None;
        }
        let operator = self
            .operators
            .values_mut()
            .find(|operator| operator.is_available(now))?;
        operator.call = Some(call.id);
        operator.assigned_at = Some(now);
        tracing::debug!(
            skill_id = self.skill_id,
            operator_id = operator.id,
            call_id = call.id,
            "operator assigned"
        );
        Some(operator.id)
    }

    /// Free an operator and start its rest period. Returns the call it held.
    pub fn release(&mut self, operator_id: OperatorId, now: DateTime<Utc>) -> Option<CallId> {
        let rest = *self.rest_index.get(&operator_id)?;
        let operator = self.operators.get_mut(&(rest, operator_id))?;
        let call = operator.call.take();
        operator.assigned_at = None;
        operator.rest_until = Some(now + operator.rest);
        tracing::debug!(
            skill_id = self.skill_id,
            operator_id,
            call_id = ?call,
            "operator released"
        );
        call
    }

    pub fn snapshot(&self, now: DateTime<Utc>) -> OccupancySnapshot {
        let long_call =
            TimeDelta::seconds(self.weights.long_call_secs.min(u64::from(u32::MAX)) as i64);
        let mut snap = OccupancySnapshot {
            total: u32::try_from(self.operators.len()).unwrap_or(u32::MAX),
            ..Default::default()
        };

        for operator in self.operators.values() {
            if let Some(assigned_at) = operator.assigned_at.filter(|_| operator.is_assigned()) {
                snap.assigned += 1;
                snap.approximate_busy += if now - assigned_at > long_call {
                    self.weights.long_call_weight
                } else {
                    1.0
                };
            } else if operator.is_resting(now) {
                snap.resting += 1;
                if let Some(until) = operator.rest_until {
                    let total_ms = operator.rest.num_milliseconds();
                    if total_ms > 0 {
                        let remaining_ms = (until - now).num_milliseconds();
                        snap.approximate_busy +=
                            (remaining_ms as f64 / total_ms as f64).clamp(0.0, 1.0);
                    }
                }
            }
        }
        snap.busy = snap.assigned + snap.resting;
        snap
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::call::CallTimeline;

    fn call_at(id: CallId, base: DateTime<Utc>, talk_secs: i64) -> Call {
        Call::new(
            id,
            1,
            CallTimeline {
                admitted: base,
                ring_start: base,
                ivr_start: base,
                redirect_search: base,
                redirect_connect: base + TimeDelta::seconds(10),
                end: base + TimeDelta::seconds(talk_secs),
            },
        )
    }

    fn tracker(rests: &[(OperatorId, i64)]) -> OccupancyTracker {
        let mut tracker = OccupancyTracker::new(1, OccupancyWeights::default());
        for (id, rest) in rests {
            assert!(tracker.add_operator(*id, TimeDelta::seconds(*rest)));
        }
        tracker
    }

    #[test]
    fn scan_order_follows_rest_configuration() {
        let mut tracker = tracker(&[(1, 30), (2, 10), (3, 20)]);
        let now = Utc::now();

        assert_eq!(tracker.assign(&call_at(100, now, 60), now), Some(2));
        assert_eq!(tracker.assign(&call_at(101, now, 60), now), Some(3));
        assert_eq!(tracker.assign(&call_at(102, now, 60), now), Some(1));
        assert_eq!(tracker.assign(&call_at(103, now, 60), now), None);
    }

    #[test]
    fn ties_break_by_operator_id() {
        let mut tracker = tracker(&[(9, 20), (4, 20)]);
        let now = Utc::now();
        assert_eq!(tracker.assign(&call_at(1, now, 60), now), Some(4));
    }

    #[test]
    fn duplicate_operator_is_rejected() {
        let mut tracker = tracker(&[(1, 20)]);
        assert!(!tracker.add_operator(1, TimeDelta::seconds(5)));
        assert_eq!(tracker.len(), 1);
    }

    #[test]
    fn released_operator_rests_before_reassignment() {
        let mut tracker = tracker(&[(1, 20)]);
        let now = Utc::now();
        assert_eq!(tracker.assign(&call_at(1, now, 60), now), Some(1));

        let end = now + TimeDelta::seconds(60);
        assert_eq!(tracker.release(1, end), Some(1));

        let during_rest = end + TimeDelta::seconds(5);
        assert_eq!(tracker.assign(&call_at(2, during_rest, 60), during_rest), None);

        let after_rest = end + TimeDelta::seconds(20);
        assert_eq!(tracker.assign(&call_at(3, after_rest, 60), after_rest), Some(1));
    }

    #[test]
    fn ended_call_is_never_assigned() {
        let mut tracker = tracker(&[(1, 20)]);
        let now = Utc::now();
        let call = call_at(1, now - TimeDelta::seconds(120), 60);
        assert_eq!(tracker.assign(&call, now), None);
        assert!(!tracker.operator(1).unwrap().is_assigned());
    }

    #[test]
    fn snapshot_weights_connected_and_resting_operators() {
        let mut tracker = tracker(&[(1, 20), (2, 20), (3, 20), (4, 20)]);
        let start = Utc::now();

        // Operator 1: long call (> 120s) -> 0.9
        tracker.assign(&call_at(1, start, 600), start);
        // Operator 2: fresh call -> 1.0
        let later = start + TimeDelta::seconds(200);
        tracker.assign(&call_at(2, later, 600), later);
        // Operator 3: released 5s ago with 20s rest -> 15/20 = 0.75
        tracker.assign(&call_at(3, start, 600), start);
        tracker.release(3, later - TimeDelta::seconds(5));
        // Operator 4: idle -> 0

        let snap = tracker.snapshot(later);
        assert_eq!(snap.total, 4);
        assert_eq!(snap.assigned, 2);
        assert_eq!(snap.resting, 1);
        assert_eq!(snap.busy, 3);
        assert!((snap.approximate_busy - 2.65).abs() < 1e-9, "{}", snap.approximate_busy);
    }

    #[test]
    fn busy_never_exceeds_total() {
        let mut tracker = tracker(&[(1, 5), (2, 5), (3, 5)]);
        let mut now = Utc::now();
        for id in 0..50 {
            tracker.assign(&call_at(id, now, 30), now);
            if id % 3 == 0 {
                let held: Vec<_> = tracker
                    .operators()
                    .filter(|o| o.is_assigned())
                    .map(|o| o.id)
                    .collect();
                for operator_id in held {
                    tracker.release(operator_id, now);
                }
            }
            let snap = tracker.snapshot(now);
            assert!(snap.busy <= snap.total);
            assert!(snap.assigned <= snap.total);
            now += TimeDelta::seconds(2);
        }
    }
}
