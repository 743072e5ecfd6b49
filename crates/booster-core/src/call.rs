//! Simulated call model.
//!
//! A call carries absolute stage timestamps fixed at admission; its stage at
//! any instant is derived from those timestamps and whether an operator has
//! been assigned.

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::types::{CallId, OperatorId, SkillId};

// ---------------------------------------------------------------------------
// CallTimeline
// ---------------------------------------------------------------------------

/// Absolute stage boundaries of one call, in chronological order.
///
/// `redirect_connect` is the deadline for finding an operator; a call still
/// unassigned after it overflows to the hotline.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct CallTimeline {
    pub admitted: DateTime<Utc>,
    pub ring_start: DateTime<Utc>,
    pub ivr_start: DateTime<Utc>,
    pub redirect_search: DateTime<Utc>,
    pub redirect_connect: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

// ---------------------------------------------------------------------------
// CallStage
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CallStage {
    Admitted,
    Ringing,
    Ivr,
    SearchingOperator,
    Connected,
    Overflow,
    Ended,
}

// ---------------------------------------------------------------------------
// Call
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize)]
pub struct Call {
    pub id: CallId,
    pub skill_id: SkillId,
    pub operator: Option<OperatorId>,
    pub timeline: CallTimeline,
}

impl Call {
    pub fn new(id: CallId, skill_id: SkillId, timeline: CallTimeline) -> Self {
        Self {
            id,
            skill_id,
            operator: None,
            timeline,
        }
    }

    pub fn stage(&self, now: DateTime<Utc>) -> CallStage {
        let t = &self.timeline;
        if now > t.end {
            return CallStage::Ended;
        }
        if self.operator.is_some() {
            return CallStage::Connected;
        }
        if now > t.redirect_connect {
            CallStage::Overflow
        } else if now > t.redirect_search {
            CallStage::SearchingOperator
        } else if now >= t.ivr_start {
            CallStage::Ivr
        } else if now >= t.ring_start {
            CallStage::Ringing
        } else {
            CallStage::Admitted
        }
    }
}
