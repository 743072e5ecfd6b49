//! Seams to the external services the pacing core talks to.
//!
//! HTTP clients, mock stand-ins and the call simulator all implement these
//! traits, so pacing loops and the manager never know which one they got.

use async_trait::async_trait;

use crate::error::Result;
use crate::types::{Lead, SkillFeedback, SkillId};

/// Source of the currently active skill ids.
#[async_trait]
pub trait ActiveSkillSource: Send + Sync {
    async fn active_skills(&self) -> Result<Vec<SkillId>>;
}

/// Source of operator occupancy for a skill.
#[async_trait]
pub trait FeedbackSource: Send + Sync {
    async fn skill_feedback(&self, skill_id: SkillId) -> Result<SkillFeedback>;
}

/// Source of leads to dial.
#[async_trait]
pub trait LeadSource: Send + Sync {
    async fn leads(&self, batch_size: u32, skill_id: SkillId) -> Result<Vec<Lead>>;
}

/// Endpoint that starts an outbound call for a lead.
#[async_trait]
pub trait OriginationSink: Send + Sync {
    /// Label used in logs, usually the sink address.
    fn name(&self) -> &str;

    async fn start_call(&self, lead: &Lead) -> Result<bool>;
}
