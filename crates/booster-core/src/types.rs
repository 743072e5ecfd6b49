use serde::{Deserialize, Serialize};

pub type SkillId = u32;
pub type OperatorId = u32;
pub type CallId = u64;

/// A lead handed out by the lead buffer, forwarded verbatim to an
/// origination sink.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Lead {
    pub lead_id: u64,
    pub skill_id: SkillId,
    pub phone: String,
}

/// Operator counters reported for one skill, plus the optional extras only
/// the simulator can compute.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct SkillFeedback {
    pub all: u32,
    pub online: u32,
    pub busy: u32,
    pub wait: u32,
    /// Weighted occupancy; `None` for the live dispatcher, which only
    /// reports raw counts.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub approximate_busy: Option<f64>,
    /// Running total of calls that overflowed to the hotline.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub overflow_total: Option<u64>,
}

impl SkillFeedback {
    /// Occupancy fed to the rate controller: weighted busy when available,
    /// raw busy otherwise, plus the callers waiting for an operator.
    pub fn occupancy(&self) -> f64 {
        self.approximate_busy.unwrap_or(f64::from(self.busy)) + f64::from(self.wait)
    }
}
